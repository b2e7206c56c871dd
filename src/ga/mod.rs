//! Evolutionary search over (CL table, variable assignment) pairs.
//!
//! Individuals carry a dynamic block and its variables; fitness is the
//! emitted bit length plus the Python-embedding escape penalty. Mutation
//! composes a renaming move with the block coordinator, crossover adopts
//! one parent's CL table into the other's block, and rank selection keeps
//! the population diverse by hashing out duplicates.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::io::Write;

use rand::Rng;

use crate::cl::chooser::MAX_CL_WIDTH;
use crate::cl::{choose_cl_lengths, RleDpCache};
use crate::deflate::block::{Block, DynamicBlock};
use crate::deflate::dump::{parse_block, write_block, DumpReader};
use crate::error::{Error, Result};
use crate::opt::dist_lengths::DEFAULT_DIST_WIDTH;
use crate::opt::lit_lengths::DEFAULT_LIT_WIDTH;
use crate::opt::parse::optimal_parse;
use crate::opt::perturb::perturb_lengths;
use crate::opt::{optimize_block, optimize_dist_lengths, optimize_lit_lengths};
use crate::vars::{
    apply_renaming, change_var_set, optimize_variables, parse_variables, random_swap,
    write_variables, Assignment, FreqCount, TieBreak, Variable,
};

/// CL tables that have proven useful as starting points, harvested from
/// earlier optimization runs. The input's own CL joins them at seeding.
pub const SEED_CL_TABLES: [[u8; 19]; 45] = [
    [0, 0, 0, 5, 3, 2, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 2, 5, 4],
    [2, 0, 5, 5, 5, 4, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 5],
    [0, 0, 0, 4, 4, 2, 3, 0, 2, 0, 0, 0, 0, 0, 0, 0, 3, 4, 4],
    [1, 0, 5, 0, 3, 4, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 5],
    [0, 0, 6, 6, 4, 2, 5, 4, 2, 0, 0, 0, 0, 0, 0, 0, 3, 3, 4],
    [3, 0, 0, 5, 3, 0, 2, 0, 3, 0, 0, 0, 0, 0, 0, 0, 2, 5, 4],
    [0, 0, 0, 6, 0, 1, 6, 0, 2, 0, 0, 0, 0, 0, 0, 0, 3, 5, 4],
    [5, 0, 5, 5, 5, 2, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 4, 4],
    [0, 0, 5, 0, 3, 3, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 3, 5, 4],
    [1, 0, 5, 5, 5, 3, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 5],
    [1, 0, 5, 0, 3, 4, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 5],
    [2, 0, 0, 6, 5, 2, 2, 0, 4, 0, 0, 0, 0, 0, 0, 0, 4, 6, 4],
    [0, 0, 0, 6, 6, 2, 5, 0, 1, 0, 0, 0, 0, 0, 0, 0, 3, 5, 5],
    [5, 0, 5, 0, 2, 4, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 4],
    [0, 0, 0, 5, 3, 3, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 5, 3, 4],
    [0, 0, 5, 5, 5, 2, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 3, 5],
    [3, 0, 0, 4, 3, 2, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0, 2, 0, 4],
    [1, 0, 0, 5, 4, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 0, 5],
    [1, 0, 5, 5, 5, 3, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 5],
    [0, 0, 0, 5, 4, 5, 2, 0, 2, 0, 0, 0, 0, 0, 0, 0, 2, 4, 4],
    [2, 0, 5, 5, 3, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 5, 5],
    [0, 0, 0, 5, 0, 1, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 3, 4, 5],
    [0, 0, 0, 5, 3, 2, 3, 0, 2, 0, 0, 0, 0, 0, 0, 0, 3, 5, 4],
    [2, 0, 6, 6, 3, 2, 6, 0, 3, 0, 0, 0, 0, 0, 0, 0, 3, 6, 4],
    [1, 0, 5, 6, 6, 2, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4],
    [0, 0, 0, 5, 3, 3, 5, 2, 0, 0, 0, 0, 0, 0, 0, 0, 2, 3, 4],
    [6, 0, 6, 5, 5, 2, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 5, 4, 4],
    [0, 0, 5, 5, 4, 2, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 4],
    [1, 0, 6, 5, 4, 3, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 6],
    [5, 0, 0, 5, 0, 2, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 4, 4, 4],
    [6, 0, 5, 6, 4, 2, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 4],
    [2, 0, 0, 5, 3, 3, 3, 0, 3, 0, 0, 0, 0, 0, 0, 0, 3, 5, 4],
    [0, 0, 0, 4, 3, 3, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 3, 2, 4],
    [5, 0, 5, 5, 5, 2, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 4, 4],
    [0, 0, 5, 0, 6, 3, 2, 0, 2, 0, 0, 0, 0, 0, 0, 0, 2, 6, 4],
    [2, 5, 0, 5, 4, 2, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 5, 5, 4],
    [0, 0, 0, 4, 4, 2, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 4],
    [6, 0, 6, 5, 5, 1, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 4, 4, 5],
    [1, 0, 5, 5, 0, 2, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4],
    [1, 0, 0, 5, 5, 3, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 5, 0, 5],
    [0, 0, 0, 5, 5, 2, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 4, 4, 4],
    [2, 0, 0, 6, 6, 2, 3, 0, 3, 0, 0, 0, 0, 0, 0, 0, 3, 4, 5],
    [6, 0, 6, 5, 5, 2, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 3, 5],
    [2, 0, 5, 5, 3, 6, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 6, 5],
    [0, 0, 0, 4, 3, 2, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 3, 4, 3],
];

/// One individual: a block and the variables naming parts of its text
#[derive(Clone, Debug)]
pub struct GaState {
    pub block: DynamicBlock,
    pub variables: Vec<Variable>,
}

impl GaState {
    pub fn new(block: DynamicBlock, variables: Vec<Variable>) -> Self {
        Self { block, variables }
    }

    /// Bit length including the embedding escape penalty
    pub fn fitness(&self, cache: &mut RleDpCache) -> Result<u64> {
        self.block.bit_length_with_embed(cache)
    }

    /// The single-character variable names, in variable order
    pub fn var_assignments(&self) -> String {
        self.variables.iter().filter_map(|var| var.single_char()).map(char::from).collect()
    }

    /// Deduplication key over the CL table and the variable assignment
    pub fn state_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.block.cl_lengths.hash(&mut hasher);
        self.var_assignments().hash(&mut hasher);
        hasher.finish()
    }
}

/// Knobs of the evolutionary search
#[derive(Clone, Debug)]
pub struct GaOptions {
    pub population_size: usize,
    pub crossover_size: usize,
    /// Coordinator rounds inside iterative mutations
    pub num_iter: usize,
}

impl Default for GaOptions {
    fn default() -> Self {
        Self { population_size: 100, crossover_size: 100, num_iter: 10 }
    }
}

/// Evolutionary search state: a population plus the external conflict
/// matrix constraining renames.
pub struct Ga {
    options: GaOptions,
    conflicts: Vec<Vec<bool>>,
    population: Vec<GaState>,
}

impl Ga {
    /// Start from an existing population (for example a loaded snapshot)
    pub fn from_population(
        options: GaOptions,
        conflicts: Vec<Vec<bool>>,
        population: Vec<GaState>,
    ) -> Self {
        Self { options, conflicts, population }
    }

    /// Seed a fresh population from the given CL tables (usually
    /// [`SEED_CL_TABLES`]) plus the input's own, running one mutation over
    /// each survivor. Candidates whose DPs fail under a seed table are
    /// skipped.
    pub fn seeded<R: Rng>(
        initial: &GaState,
        options: GaOptions,
        conflicts: Vec<Vec<bool>>,
        seed_tables: &[[u8; 19]],
        cache: &mut RleDpCache,
        rng: &mut R,
        mut on_state: impl FnMut(&GaState, u64),
    ) -> Result<Self> {
        let mut seeds: Vec<Vec<u8>> = seed_tables.iter().map(|row| row.to_vec()).collect();
        seeds.push(initial.block.cl_lengths.clone());

        let mut ga = Self { options, conflicts, population: Vec::new() };
        for cl_lengths in seeds {
            let mut state = initial.clone();
            state.block.cl_lengths = cl_lengths;
            // A fresh CL table invalidates the length tables; reassigning
            // them must succeed before the state is worth mutating
            match optimize_lit_lengths(&mut state.block, DEFAULT_LIT_WIDTH, cache)
                .and_then(|_| optimize_dist_lengths(&mut state.block, DEFAULT_DIST_WIDTH))
            {
                Ok(()) => {}
                Err(err) if err.is_dp_failure() => continue,
                Err(err) => return Err(err),
            }
            match ga.mutate(&state, cache, rng) {
                Ok(mutated) => match mutated.fitness(cache) {
                    Ok(fitness) => {
                        on_state(&mutated, fitness);
                        ga.population.push(mutated);
                    }
                    Err(err) if err.is_dp_failure() => continue,
                    Err(err) => return Err(err),
                },
                Err(err) if err.is_dp_failure() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(ga)
    }

    pub fn population(&self) -> &[GaState] {
        &self.population
    }

    /// Fittest individual of the current population
    pub fn best(&self, cache: &mut RleDpCache) -> Option<(GaState, u64)> {
        let mut best: Option<(GaState, u64)> = None;
        for state in &self.population {
            let Ok(fitness) = state.fitness(cache) else {
                continue;
            };
            if best.as_ref().map_or(true, |(_, bf)| fitness < *bf) {
                best = Some((state.clone(), fitness));
            }
        }
        best
    }

    /// One generation: rank-select survivors, then produce crossover and
    /// mutation candidates. Returns the number of new states produced;
    /// zero means the search has converged.
    pub fn step<R: Rng>(
        &mut self,
        cache: &mut RleDpCache,
        rng: &mut R,
        mut on_state: impl FnMut(&GaState, u64),
    ) -> Result<usize> {
        self.population = rank_select(
            std::mem::take(&mut self.population),
            self.options.population_size,
            cache,
            rng,
        );
        if self.population.is_empty() {
            return Ok(0);
        }

        let mut next: Vec<GaState> = Vec::new();
        let mut produced = 0usize;

        if self.population.len() >= 2 {
            for _ in 0..self.options.crossover_size {
                let a = rng.gen_range(0..self.population.len());
                let mut b = rng.gen_range(0..self.population.len());
                while b == a {
                    b = rng.gen_range(0..self.population.len());
                }
                match self.crossover(&self.population[a], &self.population[b], cache, rng) {
                    Ok(child) => match child.fitness(cache) {
                        Ok(fitness) => {
                            on_state(&child, fitness);
                            next.push(child);
                            produced += 1;
                        }
                        Err(err) if err.is_dp_failure() => {}
                        Err(err) => return Err(err),
                    },
                    Err(err) if err.is_dp_failure() => {}
                    Err(err) => return Err(err),
                }
            }
        }

        for state in self.population.clone() {
            match self.mutate(&state, cache, rng) {
                Ok(mutated) => match mutated.fitness(cache) {
                    Ok(fitness) => {
                        on_state(&mutated, fitness);
                        next.push(mutated);
                        produced += 1;
                    }
                    Err(err) if err.is_dp_failure() => {}
                    Err(err) => return Err(err),
                },
                Err(err) if err.is_dp_failure() => {}
                Err(err) => return Err(err),
            }
            next.push(state);
        }

        self.population = next;
        Ok(produced)
    }

    /// Random combination of a renaming move and re-optimization
    fn mutate<R: Rng>(
        &self,
        parent: &GaState,
        cache: &mut RleDpCache,
        rng: &mut R,
    ) -> Result<GaState> {
        let freq_count =
            if rng.gen_bool(0.5) { FreqCount::NonVarAsLiteral } else { FreqCount::NonVarAll };
        let tie_break = match rng.gen_range(0..6u32) {
            0 => TieBreak::Bfs,
            1 => TieBreak::NonVarFreq,
            2 => TieBreak::NoUpdate,
            3 => TieBreak::RandomSwap,
            4 => TieBreak::ChangeVarSet,
            _ => TieBreak::RandomSwapCl,
        };
        let update_optimal_parse = rng.gen_bool(0.5);
        let finally_update_optimal_parse = rng.gen_bool(0.5);
        let assignment = if !self.conflicts.is_empty() && rng.gen_bool(0.5) {
            Assignment::Greedy
        } else {
            Assignment::Injective
        };
        let update_cl_code = rng.gen_bool(0.5);
        let iterative = rng.gen_bool(0.2);

        let mut block = parent.block.clone();
        let mut variables = parent.variables.clone();

        match tie_break {
            TieBreak::Bfs | TieBreak::NonVarFreq => {
                let mapping = optimize_variables(
                    &block,
                    &variables,
                    &self.conflicts,
                    freq_count,
                    tie_break,
                    assignment,
                )?;
                apply_renaming(&mut block, &mut variables, &mapping);
            }
            TieBreak::RandomSwap => {
                let swappable: Vec<usize> = variables
                    .iter()
                    .enumerate()
                    .filter(|(_, var)| var.single_char().is_some())
                    .map(|(i, _)| i)
                    .collect();
                let mapping = random_swap(&variables, &self.conflicts, &swappable, rng);
                apply_renaming(&mut block, &mut variables, &mapping);
            }
            TieBreak::ChangeVarSet => {
                let mapping = change_var_set(&block, &variables, rng)?;
                apply_renaming(&mut block, &mut variables, &mapping);
            }
            TieBreak::RandomSwapCl => {
                perturb_lengths(&mut block.cl_lengths, MAX_CL_WIDTH, rng);
            }
            TieBreak::NoUpdate => {
                if update_optimal_parse {
                    block.tokens = optimal_parse(&block, &[]);
                }
            }
        }

        if iterative {
            optimize_block(&mut block, &[], false, self.options.num_iter, cache, rng)?;
        } else {
            optimize_lit_lengths(&mut block, DEFAULT_LIT_WIDTH, cache)?;
            optimize_dist_lengths(&mut block, DEFAULT_DIST_WIDTH)?;
        }

        if update_cl_code {
            block.cl_lengths =
                choose_cl_lengths(&block.lit_lengths, &block.dist_lengths, cache)?;
            if iterative {
                optimize_block(&mut block, &[], false, self.options.num_iter, cache, rng)?;
            } else {
                optimize_lit_lengths(&mut block, DEFAULT_LIT_WIDTH, cache)?;
                optimize_dist_lengths(&mut block, DEFAULT_DIST_WIDTH)?;
            }
        }
        if finally_update_optimal_parse {
            block.tokens = optimal_parse(&block, &[]);
        }

        Ok(GaState::new(block, variables))
    }

    /// Copy one parent, optionally adopt the other's CL table, and
    /// re-optimize
    fn crossover<R: Rng>(
        &self,
        parent1: &GaState,
        parent2: &GaState,
        cache: &mut RleDpCache,
        rng: &mut R,
    ) -> Result<GaState> {
        let (base, donor) =
            if rng.gen_bool(0.5) { (parent1, parent2) } else { (parent2, parent1) };
        let update_optimal_parse = rng.gen_bool(0.5);
        let finally_update_optimal_parse = rng.gen_bool(0.5);
        let update_cl_code = rng.gen_bool(0.5);
        let iterative = rng.gen_bool(0.2);
        let adopt_donor_cl = rng.gen_bool(0.5);

        let mut block = base.block.clone();
        let variables = base.variables.clone();

        if adopt_donor_cl {
            block.cl_lengths = donor.block.cl_lengths.clone();
            optimize_lit_lengths(&mut block, DEFAULT_LIT_WIDTH, cache)?;
            optimize_dist_lengths(&mut block, DEFAULT_DIST_WIDTH)?;
        }
        if update_optimal_parse {
            block.tokens = optimal_parse(&block, &[]);
            optimize_lit_lengths(&mut block, DEFAULT_LIT_WIDTH, cache)?;
            optimize_dist_lengths(&mut block, DEFAULT_DIST_WIDTH)?;
        }
        if iterative {
            optimize_block(&mut block, &[], false, self.options.num_iter, cache, rng)?;
        }
        if update_cl_code {
            block.cl_lengths =
                choose_cl_lengths(&block.lit_lengths, &block.dist_lengths, cache)?;
            if iterative {
                optimize_block(&mut block, &[], false, self.options.num_iter, cache, rng)?;
            } else {
                optimize_lit_lengths(&mut block, DEFAULT_LIT_WIDTH, cache)?;
                optimize_dist_lengths(&mut block, DEFAULT_DIST_WIDTH)?;
            }
        }
        if finally_update_optimal_parse {
            block.tokens = optimal_parse(&block, &[]);
        }

        // Surfaces an RLE infeasibility before the child enters the pool
        block.bit_length(cache)?;
        Ok(GaState::new(block, variables))
    }
}

/// Sort ascending by fitness, drop duplicates by state key, then draw
/// `num_select` distinct survivors with triangular rank weights (rank i
/// of n drawn with weight n - i).
fn rank_select<R: Rng>(
    population: Vec<GaState>,
    num_select: usize,
    cache: &mut RleDpCache,
    rng: &mut R,
) -> Vec<GaState> {
    let mut scored: Vec<(GaState, u64)> = population
        .into_iter()
        .filter_map(|state| {
            let fitness = state.fitness(cache).ok()?;
            Some((state, fitness))
        })
        .collect();
    scored.sort_by_key(|(_, fitness)| *fitness);

    let mut seen = HashSet::new();
    scored.retain(|(state, _)| seen.insert(state.state_key()));

    let n = scored.len();
    let num_select = num_select.min(n);
    if num_select == n {
        return scored.into_iter().map(|(state, _)| state).collect();
    }

    let total_rank = n * (n + 1) / 2;
    let mut selected = HashSet::new();
    while selected.len() < num_select {
        let r = rng.gen_range(0..total_rank);
        let mut threshold = total_rank;
        for i in 0..n {
            threshold -= n - i;
            if r >= threshold {
                selected.insert(i);
                break;
            }
        }
    }
    let mut indices: Vec<usize> = selected.into_iter().collect();
    indices.sort_unstable();
    indices.into_iter().map(|i| scored[i].0.clone()).collect()
}

/// Serialize a population snapshot: `<n>` then each state as a block
/// record followed by its variables.
pub fn write_states<W: Write>(out: &mut W, states: &[GaState]) -> std::io::Result<()> {
    writeln!(out, "{}", states.len())?;
    for state in states {
        write_block(out, &Block::Dynamic(state.block.clone()))?;
        write_variables(out, &state.variables)?;
    }
    Ok(())
}

/// Parse a population snapshot written by [`write_states`]
pub fn parse_states(input: &str) -> Result<Vec<GaState>> {
    let mut reader = DumpReader::new(input);
    let count = reader.next_usize()?;
    let mut states = Vec::with_capacity(count);
    for _ in 0..count {
        let block = match parse_block(&mut reader)? {
            Block::Dynamic(block) => block,
            _ => {
                return Err(Error::Dump(
                    "population snapshots may only contain dynamic blocks".into(),
                ))
            }
        };
        let variables = parse_variables(&mut reader)?;
        states.push(GaState::new(block, variables));
    }
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate::block::FixedBlock;
    use crate::deflate::Token;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn initial_state() -> GaState {
        let text = b"for i in r(9):q+=i*i;q-=i\nfor j in r(9):q+=j*j\n";
        let block = FixedBlock {
            bfinal: true,
            tokens: text.iter().map(|&b| Token::Literal(b)).collect(),
        }
        .to_dynamic();
        let variables = vec![
            Variable { name: "q".into(), occurrences: vec![14, 21, 40] },
            Variable { name: "j".into(), occurrences: vec![30, 43, 45] },
        ];
        GaState::new(block, variables)
    }

    #[test]
    fn test_state_key_distinguishes_cl_and_names() {
        let state = initial_state();
        let mut other = state.clone();
        assert_eq!(state.state_key(), other.state_key());
        other.block.cl_lengths[4] ^= 1;
        assert_ne!(state.state_key(), other.state_key());

        let mut renamed = state.clone();
        renamed.variables[0].name = "z".into();
        assert_ne!(state.state_key(), renamed.state_key());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut state = initial_state();
        let mut cache = RleDpCache::new();
        optimize_lit_lengths(&mut state.block, DEFAULT_LIT_WIDTH, &mut cache).unwrap();
        optimize_dist_lengths(&mut state.block, DEFAULT_DIST_WIDTH).unwrap();
        state.block.cl_lengths = choose_cl_lengths(
            &state.block.lit_lengths,
            &state.block.dist_lengths,
            &mut cache,
        )
        .unwrap();

        let mut buf = Vec::new();
        write_states(&mut buf, std::slice::from_ref(&state)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let states = parse_states(&text).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].block, state.block);
        assert_eq!(states[0].variables, state.variables);
    }

    #[test]
    fn test_seeding_and_one_generation() {
        let initial = initial_state();
        let mut cache = RleDpCache::new();
        let mut rng = StdRng::seed_from_u64(77);
        let options = GaOptions { population_size: 4, crossover_size: 4, num_iter: 2 };

        let mut best_seen = u64::MAX;
        let mut ga = Ga::seeded(
            &initial,
            options,
            Vec::new(),
            &SEED_CL_TABLES[..3],
            &mut cache,
            &mut rng,
            |_, fitness| best_seen = best_seen.min(fitness),
        )
        .unwrap();
        assert!(!ga.population().is_empty());

        let produced = ga
            .step(&mut cache, &mut rng, |_, fitness| best_seen = best_seen.min(fitness))
            .unwrap();
        assert!(produced > 0);

        let (best, fitness) = ga.best(&mut cache).unwrap();
        assert_eq!(fitness, best.fitness(&mut cache).unwrap());
        assert!(best_seen <= fitness);
        // Renamings only substitute characters, so every individual keeps
        // the text length of the input
        assert_eq!(best.block.decode(&[]).len(), initial.block.decode(&[]).len());
    }
}
