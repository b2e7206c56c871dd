//! Textual dump format for DEFLATE blocks.
//!
//! One block per record, whitespace-separated decimal integers:
//!
//! ```text
//! <bfinal 0|1> <btype 0|1|2>
//!   btype=0 stored: <len> <byte0> <byte1> ...
//!   btype=1 fixed:  <ntokens> <tok0> <tok1> ...
//!   btype=2 dynamic:
//!           <cl0> ... <cl18>
//!           <hlit> <LLEN[0]> ... <LLEN[hlit-1]>
//!           <hdist> <DLEN[0]> ... <DLEN[hdist-1]>
//!           <ntokens> <tok0> ... <tokN-1>
//!   token:  "L <byte>"  |  "M <length> <distance>"
//! ```

use std::io::Write;
use std::iter::Peekable;
use std::str::SplitAsciiWhitespace;

use crate::deflate::block::{Block, DynamicBlock, FixedBlock, StoredBlock, Token};
use crate::deflate::tables::CL_ALPHABET_SIZE;
use crate::error::{Error, Result};

/// Whitespace-token reader shared by the block and variable dump parsers
pub struct DumpReader<'a> {
    tokens: Peekable<SplitAsciiWhitespace<'a>>,
}

impl<'a> DumpReader<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { tokens: input.split_ascii_whitespace().peekable() }
    }

    pub fn at_end(&mut self) -> bool {
        self.tokens.peek().is_none()
    }

    pub fn next_str(&mut self) -> Result<&'a str> {
        self.tokens.next().ok_or_else(|| Error::Dump("unexpected end of input".into()))
    }

    pub fn next_u32(&mut self) -> Result<u32> {
        let token = self.next_str()?;
        token.parse().map_err(|_| Error::Dump(format!("expected integer, got {token:?}")))
    }

    pub fn next_usize(&mut self) -> Result<usize> {
        Ok(self.next_u32()? as usize)
    }

    pub fn next_byte(&mut self) -> Result<u8> {
        let value = self.next_u32()?;
        u8::try_from(value).map_err(|_| Error::Dump(format!("byte value {value} out of range")))
    }

    fn next_length(&mut self, max: u8, what: &str) -> Result<u8> {
        let value = self.next_u32()?;
        if value > max as u32 {
            return Err(Error::Dump(format!("{what} code length {value} exceeds {max}")));
        }
        Ok(value as u8)
    }
}

fn parse_token(reader: &mut DumpReader) -> Result<Token> {
    match reader.next_str()? {
        "L" => Ok(Token::Literal(reader.next_byte()?)),
        "M" => {
            let length = reader.next_u32()?;
            let distance = reader.next_u32()?;
            Token::copy(length, distance)
        }
        other => Err(Error::Dump(format!("invalid token type {other:?}"))),
    }
}

fn parse_tokens(reader: &mut DumpReader) -> Result<Vec<Token>> {
    let count = reader.next_usize()?;
    let mut tokens = Vec::with_capacity(count);
    for _ in 0..count {
        tokens.push(parse_token(reader)?);
    }
    Ok(tokens)
}

/// Parse one block record
pub fn parse_block(reader: &mut DumpReader) -> Result<Block> {
    let bfinal = match reader.next_u32()? {
        0 => false,
        1 => true,
        other => return Err(Error::Dump(format!("invalid bfinal value {other}"))),
    };
    match reader.next_u32()? {
        0 => {
            let len = reader.next_usize()?;
            let mut data = Vec::with_capacity(len);
            for _ in 0..len {
                data.push(reader.next_byte()?);
            }
            Ok(Block::Stored(StoredBlock { bfinal, data }))
        }
        1 => Ok(Block::Fixed(FixedBlock { bfinal, tokens: parse_tokens(reader)? })),
        2 => {
            let mut cl_lengths = Vec::with_capacity(CL_ALPHABET_SIZE);
            for _ in 0..CL_ALPHABET_SIZE {
                cl_lengths.push(reader.next_length(7, "CL")?);
            }
            let hlit = reader.next_usize()?;
            if !(257..=286).contains(&hlit) {
                return Err(Error::Dump(format!("literal table size {hlit} out of range")));
            }
            let mut lit_lengths = Vec::with_capacity(hlit);
            for _ in 0..hlit {
                lit_lengths.push(reader.next_length(15, "literal")?);
            }
            if lit_lengths[256] == 0 {
                return Err(Error::Dump("end-of-block symbol has no code".into()));
            }
            let hdist = reader.next_usize()?;
            if !(1..=32).contains(&hdist) {
                return Err(Error::Dump(format!("distance table size {hdist} out of range")));
            }
            let mut dist_lengths = Vec::with_capacity(hdist);
            for _ in 0..hdist {
                dist_lengths.push(reader.next_length(15, "distance")?);
            }
            let tokens = parse_tokens(reader)?;
            Ok(Block::Dynamic(DynamicBlock { bfinal, tokens, lit_lengths, dist_lengths, cl_lengths }))
        }
        other => Err(Error::InvalidBlockType(other)),
    }
}

/// Parse every block record in the input
pub fn parse_blocks(input: &str) -> Result<Vec<Block>> {
    let mut reader = DumpReader::new(input);
    let mut blocks = Vec::new();
    while !reader.at_end() {
        blocks.push(parse_block(&mut reader)?);
    }
    if blocks.is_empty() {
        return Err(Error::Dump("no blocks in input".into()));
    }
    Ok(blocks)
}

fn write_ints<W: Write, I: IntoIterator<Item = u32>>(out: &mut W, values: I) -> std::io::Result<()> {
    let mut first = true;
    for value in values {
        if first {
            write!(out, "{value}")?;
            first = false;
        } else {
            write!(out, " {value}")?;
        }
    }
    writeln!(out)
}

fn write_tokens<W: Write>(out: &mut W, tokens: &[Token]) -> std::io::Result<()> {
    writeln!(out, "{}", tokens.len())?;
    let mut first = true;
    for token in tokens {
        if !first {
            write!(out, " ")?;
        }
        first = false;
        match *token {
            Token::Literal(byte) => write!(out, "L {byte}")?,
            Token::Copy { length, distance } => write!(out, "M {length} {distance}")?,
        }
    }
    writeln!(out)
}

/// Serialize one block record
pub fn write_block<W: Write>(out: &mut W, block: &Block) -> std::io::Result<()> {
    match block {
        Block::Stored(b) => {
            writeln!(out, "{} 0", b.bfinal as u8)?;
            writeln!(out, "{}", b.data.len())?;
            write_ints(out, b.data.iter().map(|&byte| byte as u32))?;
        }
        Block::Fixed(b) => {
            writeln!(out, "{} 1", b.bfinal as u8)?;
            write_tokens(out, &b.tokens)?;
        }
        Block::Dynamic(b) => {
            writeln!(out, "{} 2", b.bfinal as u8)?;
            write_ints(out, b.cl_lengths.iter().map(|&len| len as u32))?;
            writeln!(out, "{}", b.lit_lengths.len())?;
            write_ints(out, b.lit_lengths.iter().map(|&len| len as u32))?;
            writeln!(out, "{}", b.dist_lengths.len())?;
            write_ints(out, b.dist_lengths.iter().map(|&len| len as u32))?;
            write_tokens(out, &b.tokens)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(block: &Block) -> Block {
        let mut buf = Vec::new();
        write_block(&mut buf, block).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let blocks = parse_blocks(&text).unwrap();
        assert_eq!(blocks.len(), 1);
        blocks.into_iter().next().unwrap()
    }

    #[test]
    fn test_stored_roundtrip() {
        let block = Block::Stored(StoredBlock { bfinal: true, data: vec![0, 1, 255, 10] });
        assert_eq!(roundtrip(&block), block);
    }

    #[test]
    fn test_fixed_roundtrip() {
        let block = Block::Fixed(FixedBlock {
            bfinal: false,
            tokens: vec![Token::Literal(65), Token::Copy { length: 258, distance: 32768 }],
        });
        assert_eq!(roundtrip(&block), block);
    }

    #[test]
    fn test_dynamic_roundtrip() {
        let mut lit_lengths = vec![0u8; 257];
        lit_lengths[65] = 1;
        lit_lengths[256] = 1;
        let block = Block::Dynamic(DynamicBlock {
            bfinal: true,
            tokens: vec![Token::Literal(65), Token::Copy { length: 3, distance: 1 }],
            lit_lengths,
            dist_lengths: vec![1, 1],
            cl_lengths: vec![0, 3, 0, 0, 0, 5, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 2, 2],
        });
        assert_eq!(roundtrip(&block), block);
    }

    #[test]
    fn test_multiple_blocks() {
        let text = "0 1\n2 L 97 L 98\n1 1\n1 L 99\n";
        let blocks = parse_blocks(text).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(!blocks[0].bfinal());
        assert!(blocks[1].bfinal());
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(parse_blocks("").is_err());
        assert!(parse_blocks("1 3\n").is_err()); // bad btype
        assert!(parse_blocks("1 1\n1 X 5\n").is_err()); // bad token tag
        assert!(parse_blocks("1 1\n1 M 2 1\n").is_err()); // length below minimum
        assert!(parse_blocks("1 1\n2 L 97\n").is_err()); // truncated
    }
}
