//! Kraft-preserving random mutations on a code-length vector.
//!
//! Five moves, drawn uniformly and retried until one applies. Each move
//! leaves the Kraft sum of the vector unchanged, so a complete prefix
//! code stays complete; the length-changing moves rely on the identity
//! `2 * 2^k = 2^(k+1)`.

use rand::seq::SliceRandom;
use rand::Rng;

/// Apply one random Kraft-preserving move to `lengths` over widths
/// `[0, max_width]`. Leaves the vector unchanged when no move applies
/// (for example on an all-zero vector).
pub fn perturb_lengths<R: Rng>(lengths: &mut [u8], max_width: u8, rng: &mut R) {
    let w = max_width as usize;
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); w + 1];
    for (i, &len) in lengths.iter().enumerate() {
        buckets[len as usize].push(i);
    }

    for _ in 0..10_000 {
        match rng.gen_range(0..5u32) {
            0 => {
                // Swap an entry with one of adjacent length
                let target = rng.gen_range(0..lengths.len());
                let len = lengths[target] as usize;
                if len == 0 {
                    continue;
                }
                let mut candidates: Vec<usize> = Vec::new();
                if len > 1 {
                    candidates.extend_from_slice(&buckets[len - 1]);
                }
                if len < w {
                    candidates.extend_from_slice(&buckets[len + 1]);
                }
                let Some(&other) = candidates.choose(rng) else {
                    continue;
                };
                lengths.swap(target, other);
                return;
            }
            1 => {
                // Swap two entries of distinct non-zero lengths
                let a = rng.gen_range(0..lengths.len());
                let b = rng.gen_range(0..lengths.len());
                if a == b || lengths[a] == lengths[b] || lengths[a] == 0 || lengths[b] == 0 {
                    continue;
                }
                lengths.swap(a, b);
                return;
            }
            2 => {
                // Among an equal-length pair, drop one entry to zero and
                // shorten the other by one
                let candidate_lengths: Vec<usize> =
                    (1..=w).filter(|&len| buckets[len].len() >= 2).collect();
                let Some(&len) = candidate_lengths.choose(rng) else {
                    continue;
                };
                let mut pair = buckets[len].clone();
                pair.shuffle(rng);
                lengths[pair[0]] = 0;
                lengths[pair[1]] -= 1;
                return;
            }
            3 => {
                // A zero entry adopts the length of a non-zero entry,
                // which is extended by one to pay for it
                if buckets[0].is_empty() {
                    continue;
                }
                let donors: Vec<usize> =
                    (1..w).flat_map(|len| buckets[len].iter().copied()).collect();
                let Some(&donor) = donors.choose(rng) else {
                    continue;
                };
                let zero = *buckets[0].choose(rng).expect("zero bucket checked non-empty");
                let new_length = lengths[donor] + 1;
                if new_length > max_width {
                    continue;
                }
                lengths[donor] += 1;
                lengths[zero] = new_length;
                return;
            }
            _ => {
                // Three entries of equal length: shorten one, extend the
                // other two. A complete code never has three length-1
                // entries, so the shortened entry stays positive.
                let len = rng.gen_range(1..w);
                if buckets[len].len() < 3 {
                    continue;
                }
                let mut triple = buckets[len].clone();
                triple.shuffle(rng);
                lengths[triple[0]] -= 1;
                lengths[triple[1]] += 1;
                lengths[triple[2]] += 1;
                return;
            }
        }
    }
}
