//! Optimal literal/length code-length assignment.
//!
//! Chooses a Kraft-complete length vector minimizing token emission bits
//! plus the RLE meta-encoding bits of the vector itself under the block's
//! current CL costs. The DP state is (symbols assigned, Kraft budget
//! spent, previous code length); the previous length matters because the
//! repeat symbol 16 collapses runs only when they continue it.

use crate::cl::rle::sanitize_cost;
use crate::cl::{RleDpCache, COST_INF};
use crate::deflate::block::DynamicBlock;
use crate::deflate::tables::{
    distance_extra_bits, distance_symbol, length_extra_bits, length_symbol, CL_ALPHABET_SIZE,
};
use crate::deflate::Token;
use crate::error::{Error, Result};
use crate::huffman::lengths_from_frequencies;
use crate::opt::{dist_frequencies, lit_frequencies};

use std::collections::VecDeque;

/// Default cap on literal/length code widths. RFC 1951 allows 15, but
/// wider codes buy nothing on small blocks and blow up the DP.
pub const DEFAULT_LIT_WIDTH: u8 = 9;

/// CL symbol costs with absent symbols mapped to `COST_INF`
pub(crate) fn sanitized_cl_costs(cl_lengths: &[u8]) -> [u32; CL_ALPHABET_SIZE] {
    let mut costs = [COST_INF; CL_ALPHABET_SIZE];
    for (sym, slot) in costs.iter_mut().enumerate() {
        *slot = sanitize_cost(cl_lengths.get(sym).copied());
    }
    costs
}

/// Candidate source state for the zero-run sliding windows
#[derive(Clone, Copy)]
struct QueState {
    cost: u32,
    prev_code: u8,
    i: usize,
}

/// Fast length-assignment DP.
///
/// Zero-run transitions are folded through two monotone queues (one per
/// zero-run symbol) indexed by Kraft budget, single-symbol transitions
/// start from the precomputed minimum over the previous-code axis, and
/// states costlier than `score_ub` are pruned. Returns `None` when no
/// Kraft-complete assignment exists under the given CL costs.
pub(crate) fn assign_code_lengths_fast(
    freqs: &[u32],
    cost: &[u32; CL_ALPHABET_SIZE],
    max_width: u8,
    score_ub: u32,
) -> Option<Vec<u8>> {
    let n = freqs.len();
    let w = max_width as usize;
    let kraft_total = 1usize << w;
    let spend = |code: usize| -> usize { if code == 0 { 0 } else { 1 << (w - code) } };

    let states = (n + 1) * (kraft_total + 1) * (w + 1);
    let idx = |i: usize, j: usize, p: usize| (i * (kraft_total + 1) + j) * (w + 1) + p;
    let mut dp = vec![COST_INF; states];
    let mut last_run_code = vec![0u8; states];
    let mut last_run_length = vec![0u16; states];
    dp[idx(0, 0, 0)] = 0;

    let mut cumsum = vec![0u64; n + 1];
    for i in 0..n {
        cumsum[i + 1] = cumsum[i] + freqs[i] as u64;
    }

    let mut queue_17: Vec<VecDeque<QueState>> = vec![VecDeque::new(); kraft_total + 1];
    let mut queue_18: Vec<VecDeque<QueState>> = vec![VecDeque::new(); kraft_total + 1];

    for i in 0..=n {
        for j in 0..=kraft_total {
            if i > 0 && freqs[i - 1] != 0 {
                // A used symbol interrupts every zero run
                queue_17[j].clear();
                queue_18[j].clear();
            } else {
                if i >= 3 && cumsum[i] == cumsum[i - 3] {
                    let mut min_cost = COST_INF;
                    let mut min_prev = 0u8;
                    for prev in 0..=w {
                        if dp[idx(i - 3, j, prev)] < min_cost {
                            min_cost = dp[idx(i - 3, j, prev)];
                            min_prev = prev as u8;
                        }
                    }
                    if min_cost < COST_INF && cost[17] < COST_INF {
                        let state = QueState {
                            cost: min_cost + cost[17] + 3,
                            prev_code: min_prev,
                            i: i - 3,
                        };
                        while queue_17[j].back().is_some_and(|back| back.cost >= state.cost) {
                            queue_17[j].pop_back();
                        }
                        queue_17[j].push_back(state);
                    }
                    while queue_17[j].front().is_some_and(|front| i - front.i > 10) {
                        queue_17[j].pop_front();
                    }
                    if let Some(front) = queue_17[j].front() {
                        if front.cost < dp[idx(i, j, 0)] {
                            dp[idx(i, j, 0)] = front.cost;
                            last_run_code[idx(i, j, 0)] = front.prev_code;
                            last_run_length[idx(i, j, 0)] = (i - front.i) as u16;
                        }
                    }
                }
                if i >= 11 && cumsum[i] == cumsum[i - 11] {
                    let mut min_cost = COST_INF;
                    let mut min_prev = 0u8;
                    for prev in 0..=w {
                        if dp[idx(i - 11, j, prev)] < min_cost {
                            min_cost = dp[idx(i - 11, j, prev)];
                            min_prev = prev as u8;
                        }
                    }
                    if min_cost < COST_INF && cost[18] < COST_INF {
                        let state = QueState {
                            cost: min_cost + cost[18] + 7,
                            prev_code: min_prev,
                            i: i - 11,
                        };
                        while queue_18[j].back().is_some_and(|back| back.cost >= state.cost) {
                            queue_18[j].pop_back();
                        }
                        queue_18[j].push_back(state);
                    }
                    while queue_18[j].front().is_some_and(|front| i - front.i > 138) {
                        queue_18[j].pop_front();
                    }
                    if let Some(front) = queue_18[j].front() {
                        if front.cost < dp[idx(i, j, 0)] {
                            dp[idx(i, j, 0)] = front.cost;
                            last_run_code[idx(i, j, 0)] = front.prev_code;
                            last_run_length[idx(i, j, 0)] = (i - front.i) as u16;
                        }
                    }
                }
            }

            if i == n {
                continue;
            }

            let mut min_cost = COST_INF;
            let mut min_prev = 0u8;
            for prev in 0..=w {
                if dp[idx(i, j, prev)] < min_cost {
                    min_cost = dp[idx(i, j, prev)];
                    min_prev = prev as u8;
                }
            }
            if min_cost > score_ub {
                continue;
            }

            // Runs of length one never interact with the previous code,
            // so they all start from the per-(i, j) minimum
            for code in 0..=w {
                let next_j = j + spend(code);
                if next_j > kraft_total {
                    continue;
                }
                if freqs[i] != 0 && code == 0 {
                    continue;
                }
                let cand = min_cost + cost[code] + freqs[i] * code as u32;
                if cand < dp[idx(i + 1, next_j, code)] {
                    dp[idx(i + 1, next_j, code)] = cand;
                    last_run_code[idx(i + 1, next_j, code)] = min_prev;
                    last_run_length[idx(i + 1, next_j, code)] = 1;
                }
            }

            // Repeat runs extend the previous code by 3-6 symbols
            if i > 0 {
                let run_cost_16 = cost[16].saturating_add(2);
                for code in 0..=w {
                    let source = dp[idx(i, j, code)];
                    if source > score_ub {
                        continue;
                    }
                    for run in 3..=6usize {
                        if i + run > n {
                            break;
                        }
                        let next_j = j + spend(code) * run;
                        if next_j > kraft_total {
                            break;
                        }
                        let sum_freq = (cumsum[i + run] - cumsum[i]) as u32;
                        if sum_freq != 0 && code == 0 {
                            break;
                        }
                        let cand = source.saturating_add(run_cost_16 + sum_freq * code as u32);
                        if cand > score_ub {
                            break;
                        }
                        if cand < dp[idx(i + run, next_j, code)] {
                            dp[idx(i + run, next_j, code)] = cand;
                            last_run_code[idx(i + run, next_j, code)] = code as u8;
                            last_run_length[idx(i + run, next_j, code)] = run as u16;
                        }
                    }
                }
            }
        }
    }

    let mut best = (COST_INF, 0usize);
    for prev in 0..=w {
        let cand = (dp[idx(n, kraft_total, prev)], prev);
        if cand < best {
            best = cand;
        }
    }
    if best.0 >= COST_INF {
        return None;
    }

    let mut lengths = vec![0u8; n];
    let mut code = best.1;
    let mut i = n;
    let mut j = kraft_total;
    while i > 0 {
        let state = idx(i, j, code);
        let prev_code = last_run_code[state] as usize;
        let run_length = last_run_length[state] as usize;
        assert!(run_length > 0, "corrupt length DP backtrack at ({i}, {j}, {code})");
        for _ in 0..run_length {
            i -= 1;
            lengths[i] = code as u8;
            j -= spend(code);
        }
        code = prev_code;
    }
    Some(lengths)
}

/// Reference length-assignment DP: cubic transitions extending one run at
/// a time, no pruning. Shared with the distance table (whose alphabet is
/// small enough that the cubic form is fine) and with the equivalence
/// tests for the fast variant.
pub(crate) fn assign_code_lengths_naive(
    freqs: &[u32],
    cost: &[u32; CL_ALPHABET_SIZE],
    max_width: u8,
) -> Option<Vec<u8>> {
    let n = freqs.len();
    let w = max_width as usize;
    let kraft_total = 1usize << w;
    let spend = |code: usize| -> usize { if code == 0 { 0 } else { 1 << (w - code) } };

    // Cheapest single RLE code covering a run. Repeats need an emitted
    // length before them; zero runs do not.
    let run_cost = |at_start: bool, prev: usize, code: usize, run: usize| -> u32 {
        if run == 1 {
            return cost[code];
        }
        let mut best = COST_INF;
        if prev == code && !at_start && (3..=6).contains(&run) {
            best = best.min(cost[16].saturating_add(2));
        }
        if code == 0 {
            if (3..=10).contains(&run) {
                best = best.min(cost[17].saturating_add(3));
            }
            if (11..=138).contains(&run) {
                best = best.min(cost[18].saturating_add(7));
            }
        }
        best
    };

    let idx = |i: usize, j: usize, p: usize| (i * (kraft_total + 1) + j) * (w + 1) + p;
    let states = (n + 1) * (kraft_total + 1) * (w + 1);
    let mut dp = vec![COST_INF; states];
    let mut last_run_code = vec![0u8; states];
    let mut last_run_length = vec![0u16; states];
    dp[idx(0, 0, 0)] = 0;

    for i in 0..n {
        for j in 0..=kraft_total {
            for prev in 0..=w {
                let source = dp[idx(i, j, prev)];
                if source >= COST_INF {
                    continue;
                }
                for code in 0..=w {
                    let max_run = if code == 0 { 138 } else { 6 };
                    let mut next_j = j;
                    let mut sym_cost = 0u32;
                    for run in 1..=max_run {
                        if i + run > n {
                            break;
                        }
                        next_j += spend(code);
                        sym_cost += freqs[i + run - 1] * code as u32;
                        if freqs[i + run - 1] != 0 && code == 0 {
                            break;
                        }
                        if next_j > kraft_total {
                            break;
                        }
                        let rc = run_cost(i == 0, prev, code, run);
                        if rc >= COST_INF {
                            continue;
                        }
                        let cand = source + rc + sym_cost;
                        if cand < dp[idx(i + run, next_j, code)] {
                            dp[idx(i + run, next_j, code)] = cand;
                            last_run_code[idx(i + run, next_j, code)] = prev as u8;
                            last_run_length[idx(i + run, next_j, code)] = run as u16;
                        }
                    }
                }
            }
        }
    }

    let mut best = (COST_INF, 0usize);
    for prev in 0..=w {
        let cand = (dp[idx(n, kraft_total, prev)], prev);
        if cand < best {
            best = cand;
        }
    }
    if best.0 >= COST_INF {
        return None;
    }

    let mut lengths = vec![0u8; n];
    let mut code = best.1;
    let mut i = n;
    let mut j = kraft_total;
    while i > 0 {
        let state = idx(i, j, code);
        let prev_code = last_run_code[state] as usize;
        let run_length = last_run_length[state] as usize;
        assert!(run_length > 0, "corrupt length DP backtrack at ({i}, {j}, {code})");
        for _ in 0..run_length {
            i -= 1;
            lengths[i] = code as u8;
            j -= spend(code);
        }
        code = prev_code;
    }
    Some(lengths)
}

/// Upper bound on the achievable objective: the better of the block's
/// current tables and plain Huffman tables for the frequencies. DP states
/// beyond this bound cannot be part of an optimal solution. An estimate
/// whose literal widths exceed the DP's cap is not achievable by the DP
/// and must not be used as a bound.
fn score_upper_bound(
    block: &DynamicBlock,
    lit_freqs: &[u32],
    dist_freqs: &[u32],
    max_width: u8,
    cache: &mut RleDpCache,
) -> u32 {
    let score_with = |lit: &[u8], dist: &[u8], cache: &mut RleDpCache| -> u32 {
        if lit.iter().any(|&len| len > max_width) {
            return COST_INF - 1;
        }
        let mut concat = lit.to_vec();
        concat.extend_from_slice(dist);
        let rle = match cache.parse_sequence(&concat, &block.cl_lengths) {
            Ok(rle) => rle,
            Err(_) => return COST_INF - 1,
        };
        let mut score = 0u64;
        for code in &rle {
            score += block.cl_lengths[code.symbol()] as u64 + code.extra_bits() as u64;
        }
        let cost = |lengths: &[u8], sym: usize| -> u64 {
            match lengths.get(sym) {
                Some(&len) if len > 0 => len as u64,
                _ => COST_INF as u64,
            }
        };
        for token in &block.tokens {
            match *token {
                Token::Literal(byte) => score += cost(lit, byte as usize),
                Token::Copy { length, distance } => {
                    score += cost(lit, length_symbol(length) as usize);
                    score += length_extra_bits(length) as u64;
                    score += cost(dist, distance_symbol(distance) as usize);
                    score += distance_extra_bits(distance) as u64;
                }
            }
        }
        score.min(COST_INF as u64 - 1) as u32
    };

    let current = if block.lit_lengths.is_empty() {
        let mut lit = vec![0u8; 286];
        lit[0..=143].fill(8);
        lit[144..=255].fill(9);
        lit[256..=279].fill(7);
        lit[280..=285].fill(8);
        let dist =
            if block.dist_lengths.is_empty() { vec![5u8; 30] } else { block.dist_lengths.clone() };
        score_with(&lit, &dist, cache)
    } else {
        score_with(&block.lit_lengths, &block.dist_lengths, cache)
    };

    let huffman_lit = lengths_from_frequencies(lit_freqs);
    let huffman_dist = lengths_from_frequencies(dist_freqs);
    current.min(score_with(&huffman_lit, &huffman_dist, cache))
}

/// Assign optimal literal/length code lengths to the block under its
/// current CL costs.
pub fn optimize_lit_lengths(
    block: &mut DynamicBlock,
    max_width: u8,
    cache: &mut RleDpCache,
) -> Result<()> {
    let freqs = lit_frequencies(&block.tokens);
    let dist_freqs = dist_frequencies(&block.tokens);
    let score_ub = score_upper_bound(block, &freqs, &dist_freqs, max_width, cache);
    let costs = sanitized_cl_costs(&block.cl_lengths);
    match assign_code_lengths_fast(&freqs, &costs, max_width, score_ub) {
        Some(lengths) => {
            block.lit_lengths = lengths;
            Ok(())
        }
        None => Err(Error::LitDpInfeasible),
    }
}

/// Reference variant of [`optimize_lit_lengths`] without the sliding
/// windows or pruning.
pub fn optimize_lit_lengths_naive(block: &mut DynamicBlock, max_width: u8) -> Result<()> {
    let freqs = lit_frequencies(&block.tokens);
    let costs = sanitized_cl_costs(&block.cl_lengths);
    match assign_code_lengths_naive(&freqs, &costs, max_width) {
        Some(lengths) => {
            block.lit_lengths = lengths;
            Ok(())
        }
        None => Err(Error::LitDpInfeasible),
    }
}
