//! Optimal run-length encoding of code-length vectors over the CL
//! alphabet (symbols 0-15 literal, 16 repeat-previous, 17/18 zero runs).
//!
//! The DP tables are memoized per cost tuple and grown on demand; distinct
//! cost tuples produce disjoint entries, so the cache is never invalidated.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Sentinel cost for an unusable CL symbol. DP cells are either exact
/// costs strictly below this value or exactly this value.
pub const COST_INF: u32 = 1 << 28;

const DEFAULT_MAX_COUNT: usize = 300;

/// One code of the RLE meta-encoding for code-length tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RleCode {
    /// Emit a code length directly (CL symbols 0-15)
    Literal(u8),
    /// Repeat the previous code length 3-6 times (CL symbol 16, 2 extra bits)
    PrevRun(u8),
    /// Run of zeros: 3-10 (CL symbol 17, 3 extra bits) or
    /// 11-138 (CL symbol 18, 7 extra bits)
    ZeroRun(u8),
}

impl RleCode {
    /// CL alphabet symbol this code is written with
    pub fn symbol(&self) -> usize {
        match *self {
            RleCode::Literal(value) => value as usize,
            RleCode::PrevRun(_) => 16,
            RleCode::ZeroRun(count) => {
                if count <= 10 {
                    17
                } else {
                    18
                }
            }
        }
    }

    /// Width of the extra-bits field following the symbol
    pub fn extra_bits(&self) -> u8 {
        match *self {
            RleCode::Literal(_) => 0,
            RleCode::PrevRun(count) => {
                assert!((3..=6).contains(&count), "invalid PREV_RUN length {count}");
                2
            }
            RleCode::ZeroRun(count) => {
                assert!((3..=138).contains(&count), "invalid ZERO_RUN length {count}");
                if count <= 10 {
                    3
                } else {
                    7
                }
            }
        }
    }

    /// Value of the extra-bits field
    pub fn extra_value(&self) -> u32 {
        match *self {
            RleCode::Literal(_) => 0,
            RleCode::PrevRun(count) => (count - 3) as u32,
            RleCode::ZeroRun(count) => {
                if count <= 10 {
                    (count - 3) as u32
                } else {
                    (count - 11) as u32
                }
            }
        }
    }

    /// Number of code lengths this code expands to
    pub fn expanded_len(&self) -> usize {
        match *self {
            RleCode::Literal(_) => 1,
            RleCode::PrevRun(count) | RleCode::ZeroRun(count) => count as usize,
        }
    }
}

/// A maximal run of identical code lengths
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run {
    pub value: u8,
    pub count: usize,
}

/// Group a code-length vector into maximal equal-value runs
pub fn run_groups(lengths: &[u8]) -> Vec<Run> {
    let mut groups = Vec::new();
    let mut iter = lengths.iter().copied();
    let Some(mut prev) = iter.next() else {
        return groups;
    };
    let mut count = 1usize;
    for value in iter {
        if value == prev {
            count += 1;
        } else {
            groups.push(Run { value: prev, count });
            prev = value;
            count = 1;
        }
    }
    groups.push(Run { value: prev, count });
    groups
}

/// A CL symbol cost ready for the DP: the symbol's code length, or
/// `COST_INF` when the symbol is absent (length 0) and must not be used.
pub fn sanitize_cost(length: Option<u8>) -> u32 {
    match length {
        Some(len) if len > 0 => len as u32,
        _ => COST_INF,
    }
}

fn cost_at(cl_lengths: &[u8], symbol: usize) -> u32 {
    sanitize_cost(cl_lengths.get(symbol).copied())
}

/// One memoized DP table: `dp[j]` is the cheapest encoding of a run of
/// length `j`, `prev[j]` the consume-length of the chosen final code.
/// In the zero table positive values are zero runs and negative values
/// are repeat runs; 1 is always a literal.
struct Table {
    dp: Vec<u32>,
    prev: Vec<i16>,
}

impl Table {
    fn new() -> Self {
        Table { dp: vec![0], prev: vec![0] }
    }
}

/// Memoized RLE DP tables, keyed by sanitized cost tuple.
///
/// Owned by the optimizer and threaded through every call that prices a
/// code-length table; tables only ever grow. Single-threaded by design.
pub struct RleDpCache {
    nonzero: HashMap<(u32, u32), Table>,
    zero: HashMap<(u32, u32, u32, u32), Table>,
}

impl RleDpCache {
    pub fn new() -> Self {
        Self { nonzero: HashMap::new(), zero: HashMap::new() }
    }

    fn ensure_nonzero(table: &mut Table, single: u32, cost16: u32, required: usize) {
        let target = required.max(DEFAULT_MAX_COUNT);
        let current = table.dp.len() - 1;
        if target <= current {
            return;
        }
        table.dp.resize(target + 1, COST_INF);
        table.prev.resize(target + 1, 0);

        for j in current + 1..=target {
            let mut best = COST_INF;
            let mut choice = 0i16;

            if single < COST_INF && table.dp[j - 1] < COST_INF {
                let cand = table.dp[j - 1] + single;
                if cand < best {
                    best = cand;
                    choice = 1;
                }
            }

            if cost16 < COST_INF {
                let add16 = cost16 + 2;
                for run in 3..=6usize.min(j) {
                    // A repeat needs at least one emitted length before it
                    if j - run < 1 {
                        continue;
                    }
                    if table.dp[j - run] >= COST_INF {
                        continue;
                    }
                    let cand = table.dp[j - run] + add16;
                    if cand < best {
                        best = cand;
                        choice = run as i16;
                    }
                }
            }

            table.dp[j] = best;
            table.prev[j] = choice;
        }
    }

    fn ensure_zero(table: &mut Table, single: u32, cost16: u32, cost17: u32, cost18: u32, required: usize) {
        let target = required.max(DEFAULT_MAX_COUNT);
        let current = table.dp.len() - 1;
        if target <= current {
            return;
        }
        table.dp.resize(target + 1, COST_INF);
        table.prev.resize(target + 1, 0);

        for j in current + 1..=target {
            let mut best = COST_INF;
            let mut choice = 0i16;

            if single < COST_INF && table.dp[j - 1] < COST_INF {
                let cand = table.dp[j - 1] + single;
                if cand < best {
                    best = cand;
                    choice = 1;
                }
            }

            if cost17 < COST_INF {
                let add17 = cost17 + 3;
                for run in 3..=10usize.min(j) {
                    if table.dp[j - run] >= COST_INF {
                        continue;
                    }
                    let cand = table.dp[j - run] + add17;
                    if cand < best {
                        best = cand;
                        choice = run as i16;
                    }
                }
            }

            if cost18 < COST_INF {
                let add18 = cost18 + 7;
                for run in 11..=138usize.min(j) {
                    if table.dp[j - run] >= COST_INF {
                        continue;
                    }
                    let cand = table.dp[j - run] + add18;
                    if cand < best {
                        best = cand;
                        choice = run as i16;
                    }
                }
            }

            if cost16 < COST_INF {
                let add16 = cost16 + 2;
                for run in 3..=6usize.min(j) {
                    if j - run < 1 {
                        continue;
                    }
                    if table.dp[j - run] >= COST_INF {
                        continue;
                    }
                    let cand = table.dp[j - run] + add16;
                    if cand < best {
                        best = cand;
                        choice = -(run as i16);
                    }
                }
            }

            table.dp[j] = best;
            table.prev[j] = choice;
        }
    }

    fn nonzero_table(&mut self, single: u32, cost16: u32, required: usize) -> &Table {
        let table = self.nonzero.entry((single, cost16)).or_insert_with(Table::new);
        Self::ensure_nonzero(table, single, cost16, required);
        table
    }

    fn zero_table(&mut self, single: u32, cost16: u32, cost17: u32, cost18: u32, required: usize) -> &Table {
        let table = self.zero.entry((single, cost16, cost17, cost18)).or_insert_with(Table::new);
        Self::ensure_zero(table, single, cost16, cost17, cost18, required);
        table
    }

    /// Minimum cost of encoding a run of `count` copies of code length
    /// `value` under pre-sanitized CL symbol costs. Returns `COST_INF`
    /// when the run cannot be encoded at all.
    pub fn run_cost(
        &mut self,
        value: u8,
        count: usize,
        cost_value: u32,
        cost16: u32,
        cost17: u32,
        cost18: u32,
    ) -> u32 {
        if count == 0 {
            return 0;
        }
        if value != 0 {
            self.nonzero_table(cost_value, cost16, count).dp[count]
        } else {
            self.zero_table(cost_value, cost16, cost17, cost18, count).dp[count]
        }
    }

    /// Optimal RLE parse of one run under the given CL table.
    pub fn parse_run(&mut self, run: Run, cl_lengths: &[u8]) -> Result<Vec<RleCode>> {
        if run.count == 0 {
            return Ok(Vec::new());
        }

        let cost16 = cost_at(cl_lengths, 16);
        let mut codes = Vec::with_capacity(run.count);

        if run.value != 0 {
            let single = cost_at(cl_lengths, run.value as usize);
            let table = self.nonzero_table(single, cost16, run.count);
            if table.dp[run.count] >= COST_INF {
                return Err(Error::RleDpInfeasible { value: run.value, count: run.count });
            }
            let mut j = run.count;
            while j > 0 {
                match table.prev[j] {
                    1 => {
                        codes.push(RleCode::Literal(run.value));
                        j -= 1;
                    }
                    choice if choice >= 3 => {
                        codes.push(RleCode::PrevRun(choice as u8));
                        j -= choice as usize;
                    }
                    choice => panic!("corrupt RLE DP table (non-zero run, choice {choice})"),
                }
            }
        } else {
            let single = cost_at(cl_lengths, 0);
            let cost17 = cost_at(cl_lengths, 17);
            let cost18 = cost_at(cl_lengths, 18);
            let table = self.zero_table(single, cost16, cost17, cost18, run.count);
            if table.dp[run.count] >= COST_INF {
                return Err(Error::RleDpInfeasible { value: 0, count: run.count });
            }
            let mut j = run.count;
            while j > 0 {
                match table.prev[j] {
                    1 => {
                        codes.push(RleCode::Literal(0));
                        j -= 1;
                    }
                    choice if choice > 1 => {
                        codes.push(RleCode::ZeroRun(choice as u8));
                        j -= choice as usize;
                    }
                    choice if choice < 0 => {
                        codes.push(RleCode::PrevRun((-choice) as u8));
                        j -= (-choice) as usize;
                    }
                    choice => panic!("corrupt RLE DP table (zero run, choice {choice})"),
                }
            }
        }

        codes.reverse();
        Ok(codes)
    }

    /// Optimal RLE parse of a whole code-length sequence.
    pub fn parse_sequence(&mut self, lengths: &[u8], cl_lengths: &[u8]) -> Result<Vec<RleCode>> {
        let mut codes = Vec::new();
        for run in run_groups(lengths) {
            codes.extend(self.parse_run(run, cl_lengths)?);
        }
        Ok(codes)
    }
}

impl Default for RleDpCache {
    fn default() -> Self {
        Self::new()
    }
}
