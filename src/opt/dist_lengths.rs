//! Optimal distance code-length assignment.
//!
//! Same objective as the literal/length DP but over the 30-symbol
//! distance alphabet at a width of 6 by default, which is small enough
//! for the cubic DP without the sliding-window machinery.

use crate::deflate::block::DynamicBlock;
use crate::error::{Error, Result};
use crate::opt::dist_frequencies;
use crate::opt::lit_lengths::{assign_code_lengths_naive, sanitized_cl_costs};

/// Default cap on distance code widths
pub const DEFAULT_DIST_WIDTH: u8 = 6;

/// Assign optimal distance code lengths to the block under its current CL
/// costs. A block with no back-references gets the single zero-length
/// entry RFC 1951 allows for an unused distance alphabet.
pub fn optimize_dist_lengths(block: &mut DynamicBlock, max_width: u8) -> Result<()> {
    let freqs = dist_frequencies(&block.tokens);
    if freqs.iter().all(|&freq| freq == 0) {
        block.dist_lengths = vec![0];
        return Ok(());
    }

    let costs = sanitized_cl_costs(&block.cl_lengths);
    match assign_code_lengths_naive(&freqs, &costs, max_width) {
        Some(lengths) => {
            block.dist_lengths = lengths;
            Ok(())
        }
        None => Err(Error::DistDpInfeasible),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate::Token;
    use crate::huffman::is_kraft_equal;

    fn block_with(tokens: Vec<Token>) -> DynamicBlock {
        DynamicBlock {
            bfinal: true,
            tokens,
            lit_lengths: Vec::new(),
            dist_lengths: Vec::new(),
            cl_lengths: vec![5; 19],
        }
    }

    #[test]
    fn test_no_copies_clears_table() {
        let mut block = block_with(vec![Token::Literal(b'x')]);
        optimize_dist_lengths(&mut block, 6).unwrap();
        assert_eq!(block.dist_lengths, vec![0]);
    }

    #[test]
    fn test_two_distances() {
        let mut block = block_with(vec![
            Token::Copy { length: 3, distance: 1 },
            Token::Copy { length: 3, distance: 1 },
            Token::Copy { length: 4, distance: 4 },
        ]);
        optimize_dist_lengths(&mut block, 6).unwrap();
        // Distances 1 and 4 map to codes 0 and 3
        assert_eq!(block.dist_lengths.len(), 4);
        assert!(block.dist_lengths[0] > 0);
        assert!(block.dist_lengths[3] > 0);
        assert!(is_kraft_equal(&block.dist_lengths, 6));
    }

    #[test]
    fn test_infeasible_cl_costs() {
        let mut block = block_with(vec![Token::Copy { length: 3, distance: 1 }]);
        block.cl_lengths = vec![0; 19];
        let err = optimize_dist_lengths(&mut block, 6).unwrap_err();
        assert!(matches!(err, Error::DistDpInfeasible));
    }

    #[test]
    fn test_trailing_codes_trimmed() {
        let mut block = block_with(vec![Token::Copy { length: 5, distance: 2 }]);
        optimize_dist_lengths(&mut block, 6).unwrap();
        // Distance 2 is code 1; nothing beyond it should be kept
        assert_eq!(block.dist_lengths.len(), 2);
        assert!(is_kraft_equal(&block.dist_lengths, 6));
    }
}
