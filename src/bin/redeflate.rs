use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;

use redeflate::deflate::dump::{parse_blocks, write_block, DumpReader};
use redeflate::deflate::{Block, DynamicBlock};
use redeflate::ga::{self, Ga, GaOptions, GaState, SEED_CL_TABLES};
use redeflate::vars::{
    apply_renaming, optimize_variables, parse_conflict_matrix, parse_variables, write_variables,
    write_variables_with_conflicts, Assignment, FreqCount, TieBreak, Variable,
};
use redeflate::{choose_cl_lengths, optimize_block, RleDpCache};

#[derive(Parser, Debug)]
#[command(name = "redeflate")]
#[command(about = "Re-encode DEFLATE blocks for minimum size")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Show optimization progress on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - suppress all diagnostics
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Seed for the random number generator (random when omitted)
    #[arg(long, global = true)]
    seed: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Optimize every dynamic block of a dump, writing the result to stdout
    Optimize {
        /// Block dump file (use - for stdin)
        input: PathBuf,

        /// Optional variable dump; enables rename rounds on single-block
        /// dumps
        #[arg(long)]
        vars: Option<PathBuf>,

        /// Coordinator rounds per block
        #[arg(short = 'n', long, default_value = "10")]
        iterations: usize,

        /// Rename-then-optimize rounds (only with --vars)
        #[arg(short = 'r', long, default_value = "10")]
        rounds: usize,
    },

    /// Optimize a single block and search for a profitable two-block split
    Split {
        /// Block dump file (use - for stdin)
        input: PathBuf,

        /// Variable dump file
        vars: PathBuf,

        /// Coordinator rounds per optimization
        #[arg(short = 'n', long, default_value = "5")]
        iterations: usize,

        /// Rename-then-optimize rounds per split candidate
        #[arg(short = 'r', long, default_value = "10")]
        rounds: usize,
    },

    /// Evolutionary search over CL tables and variable renamings
    Ga {
        /// Block dump file (use - for stdin)
        input: PathBuf,

        /// Variable dump file (with optional conflict matrix)
        vars: PathBuf,

        /// Path the best block dump is written to (also used to warm-start)
        #[arg(long)]
        out_block: PathBuf,

        /// Path the best variable dump is written to
        #[arg(long)]
        out_vars: PathBuf,

        /// Population snapshot path for resuming interrupted runs
        #[arg(long)]
        state: Option<PathBuf>,

        /// Stop after this many generations (default: run until converged)
        #[arg(long)]
        generations: Option<usize>,

        /// Coordinator rounds inside iterative mutations
        #[arg(short = 'n', long, default_value = "10")]
        iterations: usize,
    },
}

fn read_input(path: &Path) -> io::Result<String> {
    if path.to_str() == Some("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        fs::read_to_string(path)
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    match &args.command {
        Command::Optimize { input, vars, iterations, rounds } => {
            run_optimize(&args, input, vars.as_deref(), *iterations, *rounds, &mut rng)
        }
        Command::Split { input, vars, iterations, rounds } => {
            run_split(&args, input, vars, *iterations, *rounds, &mut rng)
        }
        Command::Ga { input, vars, out_block, out_vars, state, generations, iterations } => run_ga(
            &args,
            input,
            vars,
            out_block,
            out_vars,
            state.as_deref(),
            *generations,
            *iterations,
            &mut rng,
        ),
    }
}

fn write_blocks_stdout(blocks: &[Block]) -> io::Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    for block in blocks {
        write_block(&mut out, block)?;
    }
    out.flush()
}

fn run_optimize(
    args: &Args,
    input: &Path,
    vars: Option<&Path>,
    iterations: usize,
    rounds: usize,
    rng: &mut StdRng,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut blocks = parse_blocks(&read_input(input)?)?;
    let mut cache = RleDpCache::new();

    let mut input_bits = 0u64;
    for block in &blocks {
        input_bits += block.bit_length(&mut cache)?;
    }
    if !args.quiet {
        eprintln!("Total bit length (input): {input_bits}");
    }

    let mut variables = match vars {
        Some(path) => {
            let vars_text = read_input(path)?;
            let mut reader = DumpReader::new(&vars_text);
            let parsed = parse_variables(&mut reader)?;
            let _ = parse_conflict_matrix(&mut reader, parsed.len())?;
            Some(parsed)
        }
        None => None,
    };
    if variables.is_some() && blocks.len() != 1 {
        eprintln!("Warning: variable renaming needs a single-block dump, ignoring --vars");
        variables = None;
    }

    let mut output_bits = 0u64;
    let mut context: Vec<u8> = Vec::new();
    for block in &mut blocks {
        if let Block::Dynamic(dynamic) = block {
            match &mut variables {
                Some(variables) => {
                    rename_and_optimize(dynamic, variables, rounds, iterations, &mut cache, rng)?
                }
                None => {
                    optimize_block(dynamic, &context, true, iterations, &mut cache, rng)?;
                }
            }
        }
        let block_text = block.decode(&context);
        context.extend(block_text);
        output_bits += block.bit_length(&mut cache)?;
    }

    write_blocks_stdout(&blocks)?;
    if !args.quiet {
        eprintln!("Total bit length (output): {output_bits}");
    }
    Ok(())
}

/// Variables restricted to occurrences entirely before `pos`
fn vars_before(variables: &[Variable], pos: usize) -> Vec<Variable> {
    let mut result = Vec::new();
    for var in variables {
        let occurrences: Vec<usize> = var
            .occurrences
            .iter()
            .copied()
            .filter(|&occ| occ + var.name.len() <= pos)
            .collect();
        if !occurrences.is_empty() {
            result.push(Variable { name: var.name.clone(), occurrences });
        }
    }
    result
}

/// Alternate variable renaming with block optimization until a round
/// stops paying off
fn rename_and_optimize(
    block: &mut DynamicBlock,
    variables: &mut Vec<Variable>,
    rounds: usize,
    iterations: usize,
    cache: &mut RleDpCache,
    rng: &mut StdRng,
) -> redeflate::Result<()> {
    for _ in 0..rounds {
        let before_block = block.clone();
        let before_vars = variables.clone();
        let before = block.bit_length(cache)?;

        let mapping = optimize_variables(
            block,
            variables,
            &[],
            FreqCount::NonVarAsLiteral,
            TieBreak::Bfs,
            Assignment::Injective,
        )?;
        apply_renaming(block, variables, &mapping);
        optimize_block(block, &[], true, iterations, cache, rng)?;

        if block.bit_length(cache)? >= before {
            *block = before_block;
            *variables = before_vars;
            break;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_split(
    args: &Args,
    input: &Path,
    vars: &Path,
    iterations: usize,
    rounds: usize,
    rng: &mut StdRng,
) -> Result<(), Box<dyn std::error::Error>> {
    let blocks = parse_blocks(&read_input(input)?)?;
    let vars_text = read_input(vars)?;
    let mut reader = DumpReader::new(&vars_text);
    let mut variables = parse_variables(&mut reader)?;
    let _ = parse_conflict_matrix(&mut reader, variables.len())?;

    if blocks.len() != 1 {
        eprintln!("Warning: split optimization needs a single-block dump, passing input through");
        write_blocks_stdout(&blocks)?;
        return Ok(());
    }
    let Block::Dynamic(dynamic) = &blocks[0] else {
        eprintln!("Warning: split optimization needs a dynamic block, passing input through");
        write_blocks_stdout(&blocks)?;
        return Ok(());
    };

    let mut cache = RleDpCache::new();
    let mut block = dynamic.clone();
    rename_and_optimize(&mut block, &mut variables, rounds, iterations, &mut cache, rng)?;

    let whole_bits = block.bit_length(&mut cache)?;
    let mut best: (u64, Vec<Block>) = (whole_bits, vec![Block::Dynamic(block.clone())]);
    if !args.quiet {
        eprintln!("Unsplit bit length: {whole_bits}");
    }

    let text = block.decode(&[]);
    for split_pos in (1..text.len()).rev() {
        let (mut first, second) = block.split_at(split_pos);
        let mut first_vars = vars_before(&variables, split_pos);
        match rename_and_optimize(&mut first, &mut first_vars, rounds, iterations, &mut cache, rng)
        {
            Ok(()) => {}
            Err(err) if err.is_dp_failure() => continue,
            Err(err) => return Err(err.into()),
        }
        let total = match first.bit_length(&mut cache) {
            Ok(bits) => bits + second.bit_length(),
            Err(err) if err.is_dp_failure() => continue,
            Err(err) => return Err(err.into()),
        };
        if args.verbose {
            eprintln!("split at {split_pos}: {total} / {}", best.0);
        }
        if total < best.0 {
            if !args.quiet {
                eprintln!("Improved: {} -> {total} (split at {split_pos})", best.0);
            }
            best = (total, vec![Block::Dynamic(first), Block::Fixed(second)]);
        }
    }

    write_blocks_stdout(&best.1)?;
    if !args.quiet {
        eprintln!("Total bit length (output): {}", best.0);
    }
    Ok(())
}

/// Record an improved state: update the best tracker and write the output
/// files through
fn note_state(
    state: &GaState,
    fitness: u64,
    best: &mut (GaState, u64),
    out_block: &Path,
    out_vars: &Path,
    conflicts: &[Vec<bool>],
    quiet: bool,
) {
    if fitness > best.1 {
        return;
    }
    let improved = fitness < best.1;
    *best = (state.clone(), fitness);
    if !quiet {
        eprintln!("New best state: {fitness} bits (vars {})", state.var_assignments());
    }
    if improved {
        if let Err(err) = write_best_files(state, out_block, out_vars, conflicts) {
            eprintln!("Warning: could not write best state: {err}");
        }
    }
}

fn write_best_files(
    state: &GaState,
    out_block: &Path,
    out_vars: &Path,
    conflicts: &[Vec<bool>],
) -> io::Result<()> {
    let mut block_file = BufWriter::new(fs::File::create(out_block)?);
    write_block(&mut block_file, &Block::Dynamic(state.block.clone()))?;
    block_file.flush()?;

    let mut vars_file = BufWriter::new(fs::File::create(out_vars)?);
    if conflicts.is_empty() {
        write_variables(&mut vars_file, &state.variables)?;
    } else {
        write_variables_with_conflicts(&mut vars_file, &state.variables, conflicts)?;
    }
    vars_file.flush()
}

/// Parse a previously written best state from the output files
fn load_warm_start(out_block: &Path, out_vars: &Path) -> Option<GaState> {
    let block_text = fs::read_to_string(out_block).ok()?;
    let vars_text = fs::read_to_string(out_vars).ok()?;
    let blocks = parse_blocks(&block_text).ok()?;
    let [Block::Dynamic(block)] = blocks.as_slice() else {
        return None;
    };
    let mut reader = DumpReader::new(&vars_text);
    let variables = parse_variables(&mut reader).ok()?;
    Some(GaState::new(block.clone(), variables))
}

#[allow(clippy::too_many_arguments)]
fn run_ga(
    args: &Args,
    input: &Path,
    vars: &Path,
    out_block: &Path,
    out_vars: &Path,
    state_path: Option<&Path>,
    generations: Option<usize>,
    iterations: usize,
    rng: &mut StdRng,
) -> Result<(), Box<dyn std::error::Error>> {
    let blocks = parse_blocks(&read_input(input)?)?;
    let vars_text = read_input(vars)?;
    let mut reader = DumpReader::new(&vars_text);
    let variables = parse_variables(&mut reader)?;
    let conflicts = parse_conflict_matrix(&mut reader, variables.len())?.unwrap_or_default();

    if blocks.len() != 1 {
        eprintln!("Warning: the GA needs a single-block dump, passing input through");
        write_blocks_stdout(&blocks)?;
        return Ok(());
    }
    let Block::Dynamic(dynamic) = &blocks[0] else {
        eprintln!("Warning: the GA needs a dynamic block, passing input through");
        write_blocks_stdout(&blocks)?;
        return Ok(());
    };

    let mut cache = RleDpCache::new();
    let initial = GaState::new(dynamic.clone(), variables);
    let mut best = (initial.clone(), initial.fitness(&mut cache)?);

    if let Some(warm) = load_warm_start(out_block, out_vars) {
        if let Ok(fitness) = warm.fitness(&mut cache) {
            if fitness <= best.1 {
                if !args.quiet {
                    eprintln!("Warm start from output files: {fitness} bits");
                }
                best = (warm, fitness);
            }
        }
    }

    let options = GaOptions { num_iter: iterations, ..GaOptions::default() };
    let loaded = state_path
        .and_then(|path| fs::read_to_string(path).ok())
        .and_then(|text| ga::parse_states(&text).ok())
        .unwrap_or_default();

    let mut ga = if loaded.is_empty() {
        Ga::seeded(
            &initial,
            options,
            conflicts.clone(),
            &SEED_CL_TABLES,
            &mut cache,
            rng,
            |state, fitness| {
                note_state(state, fitness, &mut best, out_block, out_vars, &conflicts, args.quiet)
            },
        )?
    } else {
        if !args.quiet {
            eprintln!("Loaded {} states from snapshot", loaded.len());
        }
        for state in &loaded {
            if let Ok(fitness) = state.fitness(&mut cache) {
                note_state(state, fitness, &mut best, out_block, out_vars, &conflicts, args.quiet);
            }
        }
        Ga::from_population(options, conflicts.clone(), loaded)
    };

    let mut generation = 0usize;
    loop {
        let produced = ga.step(&mut cache, rng, |state, fitness| {
            note_state(state, fitness, &mut best, out_block, out_vars, &conflicts, args.quiet)
        })?;
        generation += 1;

        if let Some(path) = state_path {
            let mut file = BufWriter::new(fs::File::create(path)?);
            ga::write_states(&mut file, ga.population())?;
            file.flush()?;
        }
        if args.verbose {
            eprintln!(
                "Generation {generation}: population {}, produced {produced}, best {}",
                ga.population().len(),
                best.1
            );
        }
        if produced == 0 {
            if !args.quiet {
                eprintln!("No new states generated, stopping");
            }
            break;
        }
        if generations.map_or(false, |limit| generation >= limit) {
            break;
        }
    }

    // One last exhaustive CL pass over the winner. The search may carry
    // CL tables that only work as cost models; the chooser result is the
    // cheapest table that is also a complete, emittable prefix code.
    let mut final_block = best.0.block.clone();
    final_block.cl_lengths =
        choose_cl_lengths(&final_block.lit_lengths, &final_block.dist_lengths, &mut cache)?;
    let final_state = GaState::new(final_block, best.0.variables.clone());
    let final_fitness = final_state.fitness(&mut cache)?;
    best = (final_state, final_fitness);

    write_best_files(&best.0, out_block, out_vars, &conflicts)?;
    write_blocks_stdout(&[Block::Dynamic(best.0.block.clone())])?;
    if !args.quiet {
        eprintln!("Best bit length: {}", best.1);
    }
    Ok(())
}
