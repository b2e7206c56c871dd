//! DEFLATE block model: LZ77 tokens plus the three block kinds of
//! RFC 1951. Only dynamic-Huffman blocks carry code-length tables and
//! participate in optimization.

use crate::bits::BitWriter;
use crate::cl::{RleDpCache, COST_INF};
use crate::deflate::tables::{
    distance_extra_bits, distance_symbol, length_extra_bits, length_symbol, CL_ALPHABET_SIZE,
    CODE_LENGTH_ORDER,
};
use crate::embed;
use crate::error::{Error, Result};
use crate::huffman::{build_codes, lengths_from_frequencies};

/// Represents a single token in the LZ77 stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
    /// A literal byte
    Literal(u8),
    /// A back-reference: copy `length` bytes from `distance` bytes back
    Copy { length: u16, distance: u16 },
}

impl Token {
    /// Validated back-reference constructor
    pub fn copy(length: u32, distance: u32) -> Result<Token> {
        if !(3..=258).contains(&length) {
            return Err(Error::InvalidTokenLength(length));
        }
        if !(1..=32768).contains(&distance) {
            return Err(Error::InvalidTokenDistance(distance));
        }
        Ok(Token::Copy { length: length as u16, distance: distance as u16 })
    }

    /// Returns the uncompressed size this token represents
    pub fn uncompressed_size(&self) -> usize {
        match self {
            Token::Literal(_) => 1,
            Token::Copy { length, .. } => *length as usize,
        }
    }
}

/// Expand a token stream against an optional history context.
///
/// Panics on an out-of-window distance: the parser never produces one and
/// the dump loader validates ranges, so this is a coding bug.
pub fn decode_tokens(tokens: &[Token], context: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    for token in tokens {
        match *token {
            Token::Literal(byte) => out.push(byte),
            Token::Copy { length, distance } => {
                let total = context.len() + out.len();
                let distance = distance as usize;
                assert!(distance <= total, "copy distance {distance} exceeds window {total}");
                let mut pos = total - distance;
                for _ in 0..length {
                    let byte = if pos < context.len() {
                        context[pos]
                    } else {
                        out[pos - context.len()]
                    };
                    out.push(byte);
                    pos += 1;
                }
            }
        }
    }
    out
}

/// Stored (uncompressed) block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBlock {
    pub bfinal: bool,
    pub data: Vec<u8>,
}

impl StoredBlock {
    /// Bit length as if the payload were not byte-aligned; the alignment
    /// padding depends on the position in the stream.
    pub fn bit_length(&self) -> u64 {
        3 + 16 + 16 + self.data.len() as u64 * 8
    }
}

/// Code length of a literal/length symbol under the fixed Huffman code
/// (RFC 1951 section 3.2.6)
pub fn fixed_lit_len(symbol: usize) -> u32 {
    match symbol {
        0..=143 => 8,
        144..=255 => 9,
        256..=279 => 7,
        280..=287 => 8,
        _ => panic!("literal/length symbol {symbol} out of range"),
    }
}

/// Fixed-Huffman block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixedBlock {
    pub bfinal: bool,
    pub tokens: Vec<Token>,
}

impl FixedBlock {
    pub fn bit_length(&self) -> u64 {
        let mut bits = 3u64;
        for token in &self.tokens {
            match *token {
                Token::Literal(byte) => bits += fixed_lit_len(byte as usize) as u64,
                Token::Copy { length, distance } => {
                    bits += fixed_lit_len(length_symbol(length) as usize) as u64;
                    bits += length_extra_bits(length) as u64;
                    bits += 5 + distance_extra_bits(distance) as u64;
                }
            }
        }
        bits + fixed_lit_len(256) as u64
    }

    pub fn decode(&self, context: &[u8]) -> Vec<u8> {
        decode_tokens(&self.tokens, context)
    }

    /// Re-express as a dynamic block carrying the fixed code lengths, the
    /// starting point for optimization.
    pub fn to_dynamic(&self) -> DynamicBlock {
        let mut lit_lengths = vec![0u8; 288];
        lit_lengths[0..=143].fill(8);
        lit_lengths[144..=255].fill(9);
        lit_lengths[256..=279].fill(7);
        lit_lengths[280..=287].fill(8);
        DynamicBlock {
            bfinal: self.bfinal,
            tokens: self.tokens.clone(),
            lit_lengths,
            dist_lengths: vec![5; 32],
            cl_lengths: vec![5; CL_ALPHABET_SIZE],
        }
    }
}

/// Dynamic-Huffman block: tokens plus the three code-length tables
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicBlock {
    pub bfinal: bool,
    pub tokens: Vec<Token>,
    /// Literal/length code lengths (257..=286 entries)
    pub lit_lengths: Vec<u8>,
    /// Distance code lengths (1..=32 entries; a single zero entry when
    /// the block has no back-references)
    pub dist_lengths: Vec<u8>,
    /// Code-length alphabet lengths, exactly 19 entries in canonical
    /// symbol order
    pub cl_lengths: Vec<u8>,
}

impl DynamicBlock {
    /// Cost of a literal/length symbol, or `COST_INF` when it has no code.
    /// Used by the parser so forbidden transitions are never selected.
    pub fn lit_cost(&self, symbol: usize) -> u32 {
        match self.lit_lengths.get(symbol) {
            Some(&len) if len > 0 => len as u32,
            _ => COST_INF,
        }
    }

    /// Cost of a distance symbol, or `COST_INF` when it has no code
    pub fn dist_cost(&self, symbol: usize) -> u32 {
        match self.dist_lengths.get(symbol) {
            Some(&len) if len > 0 => len as u32,
            _ => COST_INF,
        }
    }

    fn lit_len_checked(&self, symbol: usize) -> u64 {
        match self.lit_lengths.get(symbol) {
            Some(&len) if len > 0 => len as u64,
            _ => panic!("literal/length symbol {symbol} has no code"),
        }
    }

    fn dist_len_checked(&self, symbol: usize) -> u64 {
        match self.dist_lengths.get(symbol) {
            Some(&len) if len > 0 => len as u64,
            _ => panic!("distance symbol {symbol} has no code"),
        }
    }

    pub fn decode(&self, context: &[u8]) -> Vec<u8> {
        decode_tokens(&self.tokens, context)
    }

    /// Number of CL header slots actually emitted (minimum 4)
    pub fn hclen(&self) -> usize {
        debug_assert_eq!(self.cl_lengths.len(), CL_ALPHABET_SIZE);
        for i in (0..CL_ALPHABET_SIZE).rev() {
            if self.cl_lengths[CODE_LENGTH_ORDER[i]] > 0 {
                return (i + 1).max(4);
            }
        }
        4
    }

    /// Optimal RLE representation of `LLEN || DLEN` under the current CL
    /// table
    pub fn rle_representation(&self, cache: &mut RleDpCache) -> Result<Vec<crate::cl::RleCode>> {
        let mut concat = self.lit_lengths.clone();
        concat.extend_from_slice(&self.dist_lengths);
        cache.parse_sequence(&concat, &self.cl_lengths)
    }

    /// Huffman lengths for the CL alphabet derived from the frequencies of
    /// the current RLE representation. Cheaper than the exhaustive
    /// chooser; used inside the coordinator's fixed-point loop.
    ///
    /// The result is always a complete prefix code no wider than the CL
    /// header can express: a lone used symbol gets a length-1 partner, and
    /// the rare frequency skews that drive plain Huffman past 7 bits fall
    /// back to the exhaustive chooser.
    pub fn derive_cl_lengths(&self, cache: &mut RleDpCache) -> Result<Vec<u8>> {
        let mut freqs = [0u32; CL_ALPHABET_SIZE];
        for code in self.rle_representation(cache)? {
            freqs[code.symbol()] += 1;
        }
        let mut lengths = lengths_from_frequencies(&freqs);
        if lengths.iter().filter(|&&len| len > 0).count() == 1 {
            let used = lengths.iter().position(|&len| len > 0).unwrap();
            let partner = (0..CL_ALPHABET_SIZE).find(|&sym| sym != used).unwrap();
            lengths[partner] = 1;
        }
        if lengths.iter().any(|&len| len > crate::cl::chooser::MAX_CL_WIDTH) {
            return crate::cl::choose_cl_lengths(&self.lit_lengths, &self.dist_lengths, cache);
        }
        Ok(lengths)
    }

    /// Bits spent on the token stream (including the end-of-block symbol)
    pub fn token_stream_bits(&self) -> u64 {
        let mut bits = 0u64;
        for token in &self.tokens {
            match *token {
                Token::Literal(byte) => bits += self.lit_len_checked(byte as usize),
                Token::Copy { length, distance } => {
                    bits += self.lit_len_checked(length_symbol(length) as usize);
                    bits += length_extra_bits(length) as u64;
                    bits += self.dist_len_checked(distance_symbol(distance) as usize);
                    bits += distance_extra_bits(distance) as u64;
                }
            }
        }
        bits + self.lit_len_checked(256)
    }

    /// Exact on-the-wire bit length of the block
    pub fn bit_length(&self, cache: &mut RleDpCache) -> Result<u64> {
        let mut bits = 3u64; // bfinal + btype
        bits += 5 + 5 + 4; // HLIT, HDIST, HCLEN
        bits += self.hclen() as u64 * 3;
        for code in self.rle_representation(cache)? {
            bits += self.cl_lengths[code.symbol()] as u64;
            bits += code.extra_bits() as u64;
        }
        Ok(bits + self.token_stream_bits())
    }

    /// Bit length plus the penalty for embedding the emitted bytes in a
    /// Python string literal: 8 bits per byte of escape expansion.
    pub fn bit_length_with_embed(&self, cache: &mut RleDpCache) -> Result<u64> {
        let (bytes, bits) = self.encode(cache)?;
        Ok(bits + embed::embed_overhead(&bytes) as u64 * 8)
    }

    /// Emit the block per RFC 1951 section 3.2.7. Returns the bytes
    /// (zero-padded to a byte boundary) and the exact bit length.
    ///
    /// Invariant violations (table sizes, Kraft problems surfacing as
    /// undefined symbols, missing end-of-block) abort: they indicate a
    /// coding bug, not a recoverable condition.
    pub fn encode(&self, cache: &mut RleDpCache) -> Result<(Vec<u8>, u64)> {
        assert!(
            (257..=286).contains(&self.lit_lengths.len()),
            "literal table has {} entries",
            self.lit_lengths.len()
        );
        assert!(
            (1..=32).contains(&self.dist_lengths.len()),
            "distance table has {} entries",
            self.dist_lengths.len()
        );
        assert_eq!(self.cl_lengths.len(), CL_ALPHABET_SIZE, "CL table size");
        assert!(self.lit_lengths[256] > 0, "end-of-block symbol has no code");

        let mut writer = BitWriter::with_capacity(self.tokens.len());
        writer.write_bit(self.bfinal);
        writer.write_bits(0b10, 2);

        writer.write_bits((self.lit_lengths.len() - 257) as u32, 5);
        writer.write_bits((self.dist_lengths.len() - 1) as u32, 5);

        let hclen = self.hclen();
        writer.write_bits((hclen - 4) as u32, 4);
        for &symbol in CODE_LENGTH_ORDER.iter().take(hclen) {
            let len = self.cl_lengths[symbol];
            assert!(len <= 7, "CL length {len} for symbol {symbol} exceeds 7");
            writer.write_bits(len as u32, 3);
        }

        let rle_codes = self.rle_representation(cache)?;
        let cl_codes = build_codes(&self.cl_lengths);
        for code in &rle_codes {
            let symbol = code.symbol();
            let len = self.cl_lengths[symbol];
            assert!(len > 0, "unused CL symbol {symbol} referenced");
            let (canonical, bits) = cl_codes[symbol];
            writer.write_code(canonical, bits);
            writer.write_bits(code.extra_value(), code.extra_bits());
        }

        let lit_codes = build_codes(&self.lit_lengths);
        let dist_codes = build_codes(&self.dist_lengths);

        for token in &self.tokens {
            match *token {
                Token::Literal(byte) => {
                    let _ = self.lit_len_checked(byte as usize);
                    let (canonical, bits) = lit_codes[byte as usize];
                    writer.write_code(canonical, bits);
                }
                Token::Copy { length, distance } => {
                    let len_sym = length_symbol(length) as usize;
                    let _ = self.lit_len_checked(len_sym);
                    let (canonical, bits) = lit_codes[len_sym];
                    writer.write_code(canonical, bits);
                    let extra = crate::deflate::tables::encode_length(length)
                        .expect("length validated at token construction");
                    writer.write_bits(extra.1 as u32, extra.2);

                    let dist_sym = distance_symbol(distance) as usize;
                    let _ = self.dist_len_checked(dist_sym);
                    let (canonical, bits) = dist_codes[dist_sym];
                    writer.write_code(canonical, bits);
                    let extra = crate::deflate::tables::encode_distance(distance)
                        .expect("distance validated at token construction");
                    writer.write_bits(extra.1 as u32, extra.2);
                }
            }
        }

        let (canonical, bits) = lit_codes[256];
        writer.write_code(canonical, bits);

        let bit_length = writer.bit_len();
        Ok((writer.finish(), bit_length))
    }

    /// The emitted bytes as they would appear inside a Python string
    /// literal
    pub fn embed_bytes(&self, cache: &mut RleDpCache) -> Result<Vec<u8>> {
        let (bytes, _) = self.encode(cache)?;
        Ok(embed::embed_string(&bytes))
    }

    /// Link to the bitstream visualizer for the emitted block
    pub fn viz_url(&self, cache: &mut RleDpCache) -> Result<String> {
        let (bytes, _) = self.encode(cache)?;
        let mut url = String::from("https://deflate-viz.pages.dev?deflate=");
        for ch in base64(&bytes).chars() {
            match ch {
                '+' => url.push_str("%2B"),
                '/' => url.push_str("%2F"),
                '=' => url.push_str("%3D"),
                _ => url.push(ch),
            }
        }
        Ok(url)
    }

    pub fn to_fixed(&self) -> FixedBlock {
        FixedBlock { bfinal: self.bfinal, tokens: self.tokens.clone() }
    }

    /// Divide the block text at `pos` into a non-final dynamic first part
    /// (inheriting this block's tables) and a fixed-Huffman remainder. A
    /// back-reference straddling the cut is split; halves shorter than the
    /// minimum match length become literals. Only valid with an empty
    /// history context.
    pub fn split_at(&self, pos: usize) -> (DynamicBlock, FixedBlock) {
        let text = self.decode(&[]);
        assert!(pos <= text.len(), "split position {pos} beyond text length {}", text.len());

        let mut first = DynamicBlock {
            bfinal: false,
            tokens: Vec::new(),
            lit_lengths: self.lit_lengths.clone(),
            dist_lengths: self.dist_lengths.clone(),
            cl_lengths: self.cl_lengths.clone(),
        };
        let mut second = FixedBlock { bfinal: self.bfinal, tokens: Vec::new() };

        let mut text_pos = 0usize;
        for &token in &self.tokens {
            let next_pos = text_pos + token.uncompressed_size();
            if next_pos <= pos {
                first.tokens.push(token);
                text_pos = next_pos;
                continue;
            }
            if text_pos >= pos {
                second.tokens.push(token);
                continue;
            }
            // Split within this token; a literal occupies one position and
            // cannot straddle the cut
            let Token::Copy { length, distance } = token else {
                unreachable!("literal token straddles split position");
            };
            let len1 = pos - text_pos;
            let len2 = length as usize - len1;
            if len1 >= 3 {
                first.tokens.push(Token::Copy { length: len1 as u16, distance });
            } else {
                for i in 0..len1 {
                    first.tokens.push(Token::Literal(text[text_pos + i]));
                }
            }
            if len2 >= 3 {
                second.tokens.push(Token::Copy { length: len2 as u16, distance });
            } else {
                for i in 0..len2 {
                    second.tokens.push(Token::Literal(text[pos + i]));
                }
            }
            text_pos = next_pos;
        }
        (first, second)
    }
}

fn base64(data: &[u8]) -> String {
    const ALPHABET: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((data.len() + 2) / 3 * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;
        out.push(ALPHABET[(triple >> 18) as usize & 0x3F] as char);
        out.push(ALPHABET[(triple >> 12) as usize & 0x3F] as char);
        if chunk.len() > 1 {
            out.push(ALPHABET[(triple >> 6) as usize & 0x3F] as char);
        } else {
            out.push('=');
        }
        if chunk.len() > 2 {
            out.push(ALPHABET[triple as usize & 0x3F] as char);
        } else {
            out.push('=');
        }
    }
    out
}

/// A DEFLATE block of any kind
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    Stored(StoredBlock),
    Fixed(FixedBlock),
    Dynamic(DynamicBlock),
}

impl Block {
    pub fn bfinal(&self) -> bool {
        match self {
            Block::Stored(b) => b.bfinal,
            Block::Fixed(b) => b.bfinal,
            Block::Dynamic(b) => b.bfinal,
        }
    }

    pub fn decode(&self, context: &[u8]) -> Vec<u8> {
        match self {
            Block::Stored(b) => b.data.clone(),
            Block::Fixed(b) => b.decode(context),
            Block::Dynamic(b) => b.decode(context),
        }
    }

    pub fn bit_length(&self, cache: &mut RleDpCache) -> Result<u64> {
        match self {
            Block::Stored(b) => Ok(b.bit_length()),
            Block::Fixed(b) => Ok(b.bit_length()),
            Block::Dynamic(b) => b.bit_length(cache),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern_block() -> DynamicBlock {
        // Tokens [L 'a', L 'b', M 3 2] decode to "ababa"
        let mut lit_lengths = vec![0u8; 258];
        lit_lengths[b'a' as usize] = 2;
        lit_lengths[b'b' as usize] = 2;
        lit_lengths[256] = 2;
        lit_lengths[257] = 2; // length 3
        let mut cl_lengths = vec![0u8; 19];
        cl_lengths[0] = 2;
        cl_lengths[1] = 3;
        cl_lengths[2] = 3;
        cl_lengths[16] = 3;
        cl_lengths[17] = 3;
        cl_lengths[18] = 2;
        DynamicBlock {
            bfinal: true,
            tokens: vec![
                Token::Literal(b'a'),
                Token::Literal(b'b'),
                Token::Copy { length: 3, distance: 2 },
            ],
            lit_lengths,
            dist_lengths: vec![1, 1],
            cl_lengths,
        }
    }

    #[test]
    fn test_decode_tokens_overlap() {
        let tokens = vec![Token::Literal(b'a'), Token::Copy { length: 5, distance: 1 }];
        assert_eq!(decode_tokens(&tokens, &[]), b"aaaaaa");
    }

    #[test]
    fn test_decode_tokens_context() {
        let tokens = vec![Token::Copy { length: 3, distance: 4 }, Token::Literal(b'!')];
        assert_eq!(decode_tokens(&tokens, b"wxyz"), b"xyz!");
    }

    #[test]
    fn test_pattern_decodes() {
        assert_eq!(pattern_block().decode(&[]), b"ababa");
    }

    #[test]
    fn test_token_copy_validation() {
        assert!(Token::copy(3, 1).is_ok());
        assert!(Token::copy(2, 1).is_err());
        assert!(Token::copy(259, 1).is_err());
        assert!(Token::copy(3, 0).is_err());
        assert!(Token::copy(3, 32769).is_err());
    }

    #[test]
    fn test_bit_length_matches_encode() {
        let block = pattern_block();
        let mut cache = RleDpCache::new();
        let computed = block.bit_length(&mut cache).unwrap();
        let (bytes, emitted) = block.encode(&mut cache).unwrap();
        assert_eq!(computed, emitted);
        assert_eq!(bytes.len(), (emitted as usize + 7) / 8);
    }

    #[test]
    fn test_fixed_to_dynamic_preserves_costs() {
        let fixed = FixedBlock {
            bfinal: true,
            tokens: vec![Token::Literal(b'H'), Token::Literal(b'i')],
        };
        let dynamic = fixed.to_dynamic();
        assert_eq!(dynamic.lit_lengths[b'H' as usize], 8);
        assert_eq!(dynamic.lit_lengths[200], 9);
        assert_eq!(dynamic.lit_lengths[256], 7);
        assert_eq!(dynamic.dist_lengths, vec![5; 32]);
        assert_eq!(fixed.bit_length(), 3 + 8 + 8 + 7);
    }

    #[test]
    fn test_split_at_copy_boundary() {
        let block = pattern_block();
        // "ababa": splitting at 3 cuts M 3 2 into 1 + 2, both too short
        // to stay matches
        let (first, second) = block.split_at(3);
        assert_eq!(
            first.tokens,
            vec![Token::Literal(b'a'), Token::Literal(b'b'), Token::Literal(b'a')]
        );
        assert_eq!(second.tokens, vec![Token::Literal(b'b'), Token::Literal(b'a')]);
        assert!(!first.bfinal);
        assert!(second.bfinal);
        let mut text = first.decode(&[]);
        let tail = second.decode(&text);
        text.extend(tail);
        assert_eq!(text, b"ababa");
    }

    #[test]
    fn test_base64() {
        assert_eq!(base64(b""), "");
        assert_eq!(base64(b"f"), "Zg==");
        assert_eq!(base64(b"fo"), "Zm8=");
        assert_eq!(base64(b"foo"), "Zm9v");
        assert_eq!(base64(b"foobar"), "Zm9vYmFy");
    }
}
