//! Property-based tests for redeflate.
//!
//! These exercise the invariants the optimizer leans on: perturbation
//! moves must preserve the Kraft sum, RLE parses must flatten back to
//! their input, and canonical codes built from any complete length vector
//! must form a prefix code.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use redeflate::cl::{run_groups, RleCode, RleDpCache};
use redeflate::huffman::{build_codes, kraft_sum};
use redeflate::opt::perturb_lengths;

/// Random complete prefix-code length vector, built by splitting leaves
fn random_complete_lengths(seed: u64, slots: usize, max_width: u8) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut leaves: Vec<u8> = vec![1, 1];
    let splits = rng.gen_range(0..slots - 1);
    for _ in 0..splits {
        if leaves.len() + 1 >= slots {
            break;
        }
        let splittable: Vec<usize> =
            (0..leaves.len()).filter(|&i| leaves[i] < max_width).collect();
        let Some(&leaf) = splittable.choose(&mut rng) else {
            break;
        };
        leaves[leaf] += 1;
        let len = leaves[leaf];
        leaves.push(len);
    }
    let mut lengths = vec![0u8; slots];
    let mut positions: Vec<usize> = (0..slots).collect();
    positions.shuffle(&mut rng);
    for (pos, len) in positions.into_iter().zip(leaves) {
        lengths[pos] = len;
    }
    lengths
}

/// Expand an RLE code sequence back into code lengths
fn flatten(codes: &[RleCode]) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    let mut prev: Option<u8> = None;
    for code in codes {
        match *code {
            RleCode::Literal(value) => {
                out.push(value);
                prev = Some(value);
            }
            RleCode::PrevRun(count) => {
                let value = prev.expect("PREV_RUN without a preceding length");
                out.extend(std::iter::repeat(value).take(count as usize));
            }
            RleCode::ZeroRun(count) => {
                out.extend(std::iter::repeat(0).take(count as usize));
                prev = Some(0);
            }
        }
    }
    out
}

proptest! {
    #[test]
    fn perturbation_preserves_kraft_sum(seed in any::<u64>(), moves in 1usize..30) {
        let mut lengths = random_complete_lengths(seed, 19, 7);
        let before = kraft_sum(&lengths, 7);
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
        for _ in 0..moves {
            perturb_lengths(&mut lengths, 7, &mut rng);
            prop_assert_eq!(kraft_sum(&lengths, 7), before);
            prop_assert!(lengths.iter().all(|&len| len <= 7));
        }
    }
}

proptest! {
    #[test]
    fn rle_parse_flattens_back(lengths in prop::collection::vec(0u8..=9, 1..200)) {
        let mut cache = RleDpCache::new();
        let cl = vec![5u8; 19];
        let codes = cache.parse_sequence(&lengths, &cl).unwrap();
        prop_assert_eq!(flatten(&codes), lengths);
    }
}

proptest! {
    #[test]
    fn rle_parse_never_beats_plain_literals(lengths in prop::collection::vec(0u8..=9, 1..100)) {
        // With a flat CL table every code costs the same; the optimal
        // parse can only improve on one-literal-per-length
        let mut cache = RleDpCache::new();
        let cl = vec![5u8; 19];
        let codes = cache.parse_sequence(&lengths, &cl).unwrap();
        let cost: u64 = codes.iter().map(|c| 5 + c.extra_bits() as u64).sum();
        prop_assert!(cost <= 5 * lengths.len() as u64);
    }
}

proptest! {
    #[test]
    fn canonical_codes_are_prefix_free(seed in any::<u64>(), slots in 2usize..40) {
        let lengths = random_complete_lengths(seed, slots, 12);
        prop_assert_eq!(kraft_sum(&lengths, 12), 1u64 << 12);
        let codes = build_codes(&lengths);
        for (i, &(code_a, len_a)) in codes.iter().enumerate() {
            if len_a == 0 {
                continue;
            }
            for (j, &(code_b, len_b)) in codes.iter().enumerate() {
                if i == j || len_b == 0 || len_a > len_b {
                    continue;
                }
                if len_a == len_b {
                    prop_assert_ne!(code_a, code_b, "duplicate code at length {}", len_a);
                } else {
                    let prefix = code_b >> (len_b - len_a);
                    prop_assert_ne!(
                        prefix, code_a,
                        "code {}:{} is a prefix of {}:{}", code_a, len_a, code_b, len_b
                    );
                }
            }
        }
    }
}

proptest! {
    #[test]
    fn run_groups_partition_the_input(lengths in prop::collection::vec(0u8..=15, 0..120)) {
        let groups = run_groups(&lengths);
        let total: usize = groups.iter().map(|run| run.count).sum();
        prop_assert_eq!(total, lengths.len());
        let mut rebuilt = Vec::new();
        for run in &groups {
            rebuilt.extend(std::iter::repeat(run.value).take(run.count));
        }
        prop_assert_eq!(rebuilt, lengths);
        for window in groups.windows(2) {
            prop_assert_ne!(window[0].value, window[1].value);
        }
    }
}
