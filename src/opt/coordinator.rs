//! Fixed-point iteration over the three DP subsystems.
//!
//! Each round reassigns literal and distance code lengths under the
//! current CL costs, then alternates optimal parsing with CL re-derivation
//! until the CL vector revisits a previous value. Rounds that fail to
//! improve revert to the best CL seen; stuck rounds perturb the CL vector
//! with a random Kraft-preserving move before retrying.

use rand::Rng;

use crate::cl::chooser::MAX_CL_WIDTH;
use crate::cl::RleDpCache;
use crate::deflate::block::DynamicBlock;
use crate::deflate::Token;
use crate::error::Result;
use crate::opt::dist_lengths::DEFAULT_DIST_WIDTH;
use crate::opt::lit_lengths::DEFAULT_LIT_WIDTH;
use crate::opt::perturb::perturb_lengths;
use crate::opt::{optimize_dist_lengths, optimize_lit_lengths, parse::optimal_parse};

const INNER_ITERATIONS: usize = 10;

/// Alternate optimal parsing with CL re-derivation until the CL vector
/// revisits a previous value, keeping the best (bit length, CL, tokens)
/// seen. The parse depends only on the literal/distance tables, which are
/// fixed here, so the tokens settle immediately and only the CL evolves.
fn parse_and_derive(
    block: &mut DynamicBlock,
    context: &[u8],
    cache: &mut RleDpCache,
) -> Result<()> {
    let mut best = (block.bit_length(cache)?, block.cl_lengths.clone(), block.tokens.clone());
    let mut tried = vec![block.cl_lengths.clone()];
    for _ in 0..INNER_ITERATIONS {
        block.tokens = optimal_parse(block, context);
        block.cl_lengths = block.derive_cl_lengths(cache)?;
        let bits = block.bit_length(cache)?;
        if bits <= best.0 {
            best = (bits, block.cl_lengths.clone(), block.tokens.clone());
        }
        if tried.contains(&block.cl_lengths) {
            break;
        }
        tried.push(block.cl_lengths.clone());
    }
    block.cl_lengths = best.1;
    block.tokens = best.2;
    Ok(())
}

/// State a coordinator round is judged by
type BestState = (u64, Vec<u8>, Vec<Token>);

/// Minimize the block's bit length by coordinate descent over the token
/// stream and the three code-length tables.
///
/// Runs at most `num_iter` rounds; the block is left at the best state
/// seen, with a final literal/distance pass keeping the tables consistent
/// with the tokens. When a round fails to improve, the CL vector reverts
/// to the best seen; with `perturbation` enabled the search keeps going
/// from a randomly perturbed CL instead of stopping. Returns the best bit
/// length observed, which never increases with more rounds.
pub fn optimize_block<R: Rng>(
    block: &mut DynamicBlock,
    context: &[u8],
    perturbation: bool,
    num_iter: usize,
    cache: &mut RleDpCache,
    rng: &mut R,
) -> Result<u64> {
    let mut best: BestState =
        (block.bit_length(cache)?, block.cl_lengths.clone(), block.tokens.clone());
    let mut updated = true;

    for _ in 0..num_iter {
        if !updated {
            perturb_lengths(&mut block.cl_lengths, MAX_CL_WIDTH, rng);
        }

        let round = optimize_lit_lengths(block, DEFAULT_LIT_WIDTH, cache)
            .and_then(|_| optimize_dist_lengths(block, DEFAULT_DIST_WIDTH));
        match round {
            Ok(()) => {}
            // A perturbed CL can price some run at infinity; discard the
            // move and search on from the best table
            Err(err) if err.is_dp_failure() && block.cl_lengths != best.1 => {
                block.cl_lengths = best.1.clone();
                updated = false;
                continue;
            }
            Err(err) => return Err(err),
        }

        let old_cl = block.cl_lengths.clone();
        let old_tokens = block.tokens.clone();
        parse_and_derive(block, context, cache)?;
        updated = old_cl != block.cl_lengths || old_tokens != block.tokens;

        let bits = block.bit_length(cache)?;
        if bits < best.0 {
            best = (bits, block.cl_lengths.clone(), block.tokens.clone());
        } else if bits > best.0 && !updated {
            block.cl_lengths = best.1.clone();
            if !perturbation {
                break;
            }
        }
    }

    block.cl_lengths = best.1.clone();
    block.tokens = best.2.clone();
    optimize_lit_lengths(block, DEFAULT_LIT_WIDTH, cache)?;
    optimize_dist_lengths(block, DEFAULT_DIST_WIDTH)?;
    Ok(best.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate::block::FixedBlock;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_block() -> DynamicBlock {
        let text = b"def f(x):return x+x\ndef g(x):return f(x)*f(x)\n";
        FixedBlock { bfinal: true, tokens: text.iter().map(|&b| Token::Literal(b)).collect() }
            .to_dynamic()
    }

    #[test]
    fn test_optimization_improves_bit_length() {
        let mut block = sample_block();
        let mut cache = RleDpCache::new();
        let mut rng = StdRng::seed_from_u64(1);
        let before = block.bit_length(&mut cache).unwrap();
        let achieved = optimize_block(&mut block, &[], false, 10, &mut cache, &mut rng).unwrap();
        assert!(achieved < before, "no improvement: {before} -> {achieved}");
        assert_eq!(block.decode(&[]), sample_block().decode(&[]));
    }

    #[test]
    fn test_best_bit_length_is_monotone_in_rounds() {
        // With the same seed the first k rounds are identical, so the best
        // seen can only improve as rounds are added
        let mut cache = RleDpCache::new();
        let mut previous = u64::MAX;
        for rounds in [1usize, 3, 6] {
            let mut block = sample_block();
            let mut rng = StdRng::seed_from_u64(9);
            let achieved =
                optimize_block(&mut block, &[], true, rounds, &mut cache, &mut rng).unwrap();
            assert!(achieved <= previous, "rounds={rounds} regressed: {previous} -> {achieved}");
            previous = achieved;
        }
    }

    #[test]
    fn test_rerun_does_not_regress() {
        let mut block = sample_block();
        let mut cache = RleDpCache::new();
        let mut rng = StdRng::seed_from_u64(5);
        optimize_block(&mut block, &[], false, 10, &mut cache, &mut rng).unwrap();
        let converged_bits = block.bit_length(&mut cache).unwrap();
        let converged_text = block.decode(&[]);

        let mut rng = StdRng::seed_from_u64(5);
        let rerun = optimize_block(&mut block, &[], false, 10, &mut cache, &mut rng).unwrap();
        assert!(rerun <= converged_bits);
        assert_eq!(block.decode(&[]), converged_text);
    }

    #[test]
    fn test_tables_consistent_after_optimization() {
        let mut block = sample_block();
        let mut cache = RleDpCache::new();
        let mut rng = StdRng::seed_from_u64(2);
        optimize_block(&mut block, &[], true, 8, &mut cache, &mut rng).unwrap();
        // Every symbol the tokens use must have a code; encoding must not
        // panic and must agree with the computed bit length
        let bits = block.bit_length(&mut cache).unwrap();
        let (bytes, emitted) = block.encode(&mut cache).unwrap();
        assert_eq!(bits, emitted);
        assert_eq!(bytes.len(), (emitted as usize + 7) / 8);
    }
}
