//! Variable renaming: choose replacement characters that concentrate
//! literal frequency mass onto cheap codes, subject to the external
//! conflict matrix, then rebuild and reparse the block text.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::deflate::block::DynamicBlock;
use crate::deflate::Token;
use crate::error::{Error, Result};
use crate::opt::parse::optimal_parse;
use crate::vars::Variable;

/// How character popularity is measured when ranking rename targets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreqCount {
    /// Literal occurrences not belonging to any variable
    NonVarAsLiteral,
    /// All non-variable occurrences, literal or match-covered
    NonVarAll,
}

/// Tie-breaking strategy when several characters share a code length
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TieBreak {
    /// Breadth-first over byte-adjacency from already-used characters,
    /// clustering renamings into contiguous byte ranges
    Bfs,
    /// Highest non-variable frequency first
    NonVarFreq,
    /// Leave the assignment untouched
    NoUpdate,
    /// Shuffle a few currently-assigned names
    RandomSwap,
    /// Perturb the CL table instead of the names
    RandomSwapCl,
    /// Move characters across the used-range boundaries
    ChangeVarSet,
}

/// How variables map onto target characters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Assignment {
    /// One variable per character, no merging
    Injective,
    /// Closest-ranked character that conflicts with nothing already
    /// mapped to it
    Greedy,
}

/// Per-character occurrence statistics, split by variable membership
#[derive(Clone, Copy, Debug, Default)]
pub struct CharStat {
    pub var_candidate: bool,
    pub var_literal: u32,
    pub nonvar_literal: u32,
    pub var_nonliteral: u32,
    pub nonvar_nonliteral: u32,
    pub lit_code_length: u8,
}

impl CharStat {
    fn var_total(&self) -> u32 {
        self.var_literal + self.var_nonliteral
    }

    fn nonvar_count(&self, freq_count: FreqCount) -> u32 {
        match freq_count {
            FreqCount::NonVarAsLiteral => self.nonvar_literal,
            FreqCount::NonVarAll => self.nonvar_literal + self.nonvar_nonliteral,
        }
    }
}

/// Whether the character `p` may be taken as a variable name: it must
/// occur as a standalone `[A-Za-z_]+` identifier at most once in the
/// block text.
pub fn is_p_replaceable(block: &DynamicBlock) -> bool {
    let mut text = block.decode(&[]);
    text.push(0);

    let is_word_char = |c: u8| c.is_ascii_alphabetic() || c == b'_';

    let mut p_occurrences = 0;
    let mut word_start: Option<usize> = None;
    for (i, &c) in text.iter().enumerate() {
        if is_word_char(c) {
            word_start.get_or_insert(i);
        } else if let Some(start) = word_start.take() {
            if i - start == 1 && text[start] == b'p' {
                p_occurrences += 1;
                if p_occurrences > 1 {
                    return false;
                }
            }
        }
    }
    p_occurrences <= 1
}

/// Gather per-character statistics for the block under its variables.
/// Fails when a variable's occurrences disagree with the block text.
pub fn char_stats(block: &DynamicBlock, variables: &[Variable]) -> Result<Vec<CharStat>> {
    let text = block.decode(&[]);
    let mut is_literal_position = vec![false; text.len()];
    let mut literal_freq = [0u32; 256];
    let mut nonliteral_freq = [0u32; 256];

    let mut pos = 0usize;
    for token in &block.tokens {
        match *token {
            Token::Literal(byte) => {
                is_literal_position[pos] = true;
                literal_freq[byte as usize] += 1;
                pos += 1;
            }
            Token::Copy { length, .. } => {
                for i in 0..length as usize {
                    nonliteral_freq[text[pos + i] as usize] += 1;
                }
                pos += length as usize;
            }
        }
    }

    let mut var_literal = vec![0u32; variables.len()];
    let mut var_nonliteral = vec![0u32; variables.len()];
    for (v, var) in variables.iter().enumerate() {
        for &occ in &var.occurrences {
            let span = occ..occ + var.name.len();
            if span.end > text.len() || &text[span.clone()] != var.name.as_bytes() {
                return Err(Error::Dump(format!(
                    "variable {:?} does not match block text at offset {occ}",
                    var.name
                )));
            }
            if is_literal_position[occ] {
                var_literal[v] += 1;
            } else {
                var_nonliteral[v] += 1;
            }
        }
    }

    let mut stats = vec![CharStat::default(); 256];
    for c in b'A'..=b'Z' {
        stats[c as usize].var_candidate = true;
    }
    let p_ok = is_p_replaceable(block);
    for c in b'a'..=b'z' {
        if c != b'p' || p_ok {
            stats[c as usize].var_candidate = true;
        }
    }
    stats[b'_' as usize].var_candidate = true;

    for c in 0..256 {
        stats[c].nonvar_literal = literal_freq[c];
        stats[c].nonvar_nonliteral = nonliteral_freq[c];
        stats[c].lit_code_length = block.lit_lengths.get(c).copied().unwrap_or(0);
    }

    for (v, var) in variables.iter().enumerate() {
        let Some(c) = var.single_char() else {
            continue;
        };
        let stat = &mut stats[c as usize];
        if !stat.var_candidate {
            continue;
        }
        stat.var_literal = var_literal[v];
        stat.nonvar_literal = stat.nonvar_literal.saturating_sub(var_literal[v]);
        stat.var_nonliteral = var_nonliteral[v];
        stat.nonvar_nonliteral = stat.nonvar_nonliteral.saturating_sub(var_nonliteral[v]);
    }
    Ok(stats)
}

/// Choose a new character for each renameable variable.
///
/// Characters are grouped by their current literal code length; classes
/// are filled shortest-code-first, with ties broken by the requested
/// strategy. Returns one entry per variable, `None` meaning unchanged.
pub fn optimize_variables(
    block: &DynamicBlock,
    variables: &[Variable],
    conflicts: &[Vec<bool>],
    freq_count: FreqCount,
    tie_break: TieBreak,
    assignment: Assignment,
) -> Result<Vec<Option<u8>>> {
    debug_assert!(
        assignment == Assignment::Injective || conflicts.len() == variables.len(),
        "greedy assignment needs a conflict matrix"
    );

    let stats = char_stats(block, variables)?;

    // Variables ranked by how much literal mass their current name carries
    let mut ranked_vars: Vec<usize> = Vec::new();
    for (v, var) in variables.iter().enumerate() {
        let Some(c) = var.single_char() else {
            continue;
        };
        if stats[c as usize].var_candidate {
            ranked_vars.push(v);
        }
    }
    ranked_vars.sort_by(|&a, &b| {
        let count = |v: usize| {
            let c = variables[v].single_char().expect("ranked variables are single-char") as usize;
            match freq_count {
                FreqCount::NonVarAsLiteral => stats[c].var_literal,
                FreqCount::NonVarAll => stats[c].var_literal + stats[c].var_nonliteral,
            }
        };
        count(b).cmp(&count(a))
    });
    if ranked_vars.is_empty() {
        return Ok(vec![None; variables.len()]);
    }

    // Candidate characters per current code length class
    let mut classes: Vec<Vec<usize>> = vec![Vec::new(); 17];
    for c in 0..256 {
        if stats[c].var_candidate {
            classes[stats[c].lit_code_length as usize].push(c);
        }
    }

    let mut targets: Vec<Option<u8>> = vec![None; variables.len()];
    let mut used = [false; 256];
    let mut rank = 0usize;

    'classes: for len in 1..=16usize {
        if classes[len].is_empty() {
            continue;
        }
        match tie_break {
            TieBreak::Bfs => {
                if rank == 0 {
                    // Seed with the most popular candidate in the class
                    let &seed = classes[len]
                        .iter()
                        .max_by_key(|&&c| stats[c].nonvar_count(freq_count))
                        .expect("class checked non-empty");
                    targets[rank] = Some(seed as u8);
                    used[seed] = true;
                    rank += 1;
                }

                // Breadth-first over byte adjacency from every used
                // character; class members join the assignment in pop
                // order, clustering them next to what is already taken
                let mut distance = [usize::MAX; 256];
                let mut queue = std::collections::VecDeque::new();
                for c in 0..256 {
                    if used[c] {
                        distance[c] = 0;
                        queue.push_back(c);
                    }
                }
                let mut taken = Vec::new();
                while let Some(v) = queue.pop_front() {
                    if stats[v].lit_code_length as usize == len && !used[v] && stats[v].var_candidate
                    {
                        used[v] = true;
                        taken.push(v);
                    }
                    for u in [v.wrapping_sub(1), v + 1] {
                        if u < 256 && distance[u] > distance[v] + 1 {
                            distance[u] = distance[v] + 1;
                            queue.push_back(u);
                        }
                    }
                }
                for c in taken {
                    if rank >= ranked_vars.len() {
                        break 'classes;
                    }
                    targets[rank] = Some(c as u8);
                    rank += 1;
                }
            }
            TieBreak::NonVarFreq => {
                let mut class = classes[len].clone();
                class.sort_by(|&a, &b| {
                    stats[b].nonvar_count(freq_count).cmp(&stats[a].nonvar_count(freq_count))
                });
                for c in class {
                    if used[c] {
                        continue;
                    }
                    if rank >= ranked_vars.len() {
                        break 'classes;
                    }
                    targets[rank] = Some(c as u8);
                    used[c] = true;
                    rank += 1;
                }
            }
            _ => break 'classes,
        }
        if rank >= ranked_vars.len() {
            break;
        }
    }

    let mut mapping: Vec<Option<u8>> = vec![None; variables.len()];
    match assignment {
        Assignment::Injective => {
            for (slot, &v) in ranked_vars.iter().enumerate() {
                let current = variables[v].single_char().expect("ranked variables are single-char");
                match targets.get(slot).copied().flatten() {
                    Some(new_char) if new_char != current => mapping[v] = Some(new_char),
                    _ => {}
                }
            }
        }
        Assignment::Greedy => {
            let mut occupants: Vec<Vec<usize>> = vec![Vec::new(); 256];
            for &v in &ranked_vars {
                let current = variables[v].single_char().expect("ranked variables are single-char");
                for target in targets.iter().copied().flatten() {
                    let clashes = occupants[target as usize]
                        .iter()
                        .any(|&other| conflicts[v][other] || conflicts[other][v]);
                    if clashes || target == current {
                        continue;
                    }
                    mapping[v] = Some(target);
                    occupants[target as usize].push(v);
                    break;
                }
            }
        }
    }
    Ok(mapping)
}

/// Shuffle the names of a few variables among themselves, rejecting
/// permutations that violate the conflict matrix. `swappable` lists the
/// indices of single-character variables.
pub fn random_swap<R: Rng>(
    variables: &[Variable],
    conflicts: &[Vec<bool>],
    swappable: &[usize],
    rng: &mut R,
) -> Vec<Option<u8>> {
    let mut mapping = vec![None; variables.len()];
    if swappable.len() < 2 {
        return mapping;
    }

    for _ in 0..100 {
        let swap_size = rng.gen_range(2..=swappable.len().min(4));
        let mut chosen = swappable.to_vec();
        chosen.shuffle(rng);
        chosen.truncate(swap_size);
        let mut permuted = chosen.clone();
        permuted.shuffle(rng);

        let mut new_char: Vec<Option<u8>> = variables.iter().map(|v| v.single_char()).collect();
        for (slot, &v) in chosen.iter().enumerate() {
            new_char[v] = variables[permuted[slot]].single_char();
        }

        // All variables collapsing onto one character must be mutually
        // conflict-free
        let mut per_char: Vec<Vec<usize>> = vec![Vec::new(); 256];
        for (v, c) in new_char.iter().enumerate() {
            if let Some(c) = c {
                per_char[*c as usize].push(v);
            }
        }
        let valid = per_char.iter().all(|vars| {
            vars.iter().enumerate().all(|(a, &va)| {
                vars.iter().skip(a + 1).all(|&vb| {
                    !conflicts.get(va).and_then(|row| row.get(vb)).copied().unwrap_or(false)
                })
            })
        });
        if !valid {
            continue;
        }

        for &v in &chosen {
            let target = new_char[v].expect("swappable variables are single-char");
            if Some(target) != variables[v].single_char() {
                mapping[v] = Some(target);
            }
        }
        return mapping;
    }
    mapping
}

/// Move variables across the boundaries of the used-character ranges:
/// run-edge characters carrying variables may migrate onto unused
/// candidates or just outside a run, nudging the used set toward denser
/// byte intervals.
pub fn change_var_set<R: Rng>(
    block: &DynamicBlock,
    variables: &[Variable],
    rng: &mut R,
) -> Result<Vec<Option<u8>>> {
    let text = block.decode(&[]);
    let stats = char_stats(block, variables)?;

    let mut used = [false; 256];
    for &c in &text {
        used[c as usize] = true;
    }
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut c = 0usize;
    while c < 256 {
        if !used[c] {
            c += 1;
            continue;
        }
        let start = c;
        while c + 1 < 256 && used[c + 1] {
            c += 1;
        }
        runs.push((start, c));
        c += 1;
    }

    let mut movable: Vec<usize> = Vec::new();
    for &(start, end) in &runs {
        if start > 0 && stats[start].var_total() > 0 {
            movable.push(start);
        }
        if end + 1 < 256 && stats[end].var_total() > 0 {
            movable.push(end);
        }
    }

    let mut destinations: Vec<usize> = Vec::new();
    for c in 0..256 {
        if !stats[c].var_candidate || stats[c].var_total() > 0 {
            continue;
        }
        if stats[c].nonvar_literal + stats[c].nonvar_nonliteral == 0 {
            continue;
        }
        destinations.push(c);
    }
    for &(start, end) in &runs {
        if start > 0 && stats[start - 1].var_candidate {
            destinations.push(start - 1);
        }
        if end + 1 < 256 && stats[end + 1].var_candidate {
            destinations.push(end + 1);
        }
    }
    destinations.sort_unstable();
    destinations.dedup();

    let mut mapping = vec![None; variables.len()];
    movable.shuffle(rng);
    destinations.shuffle(rng);
    let max_changes = movable.len().min(destinations.len()).min(3);
    if max_changes == 0 {
        return Ok(mapping);
    }
    let num_changes = rng.gen_range(1..=max_changes);

    let mut vars_on_char: Vec<Vec<usize>> = vec![Vec::new(); 256];
    for (v, var) in variables.iter().enumerate() {
        if let Some(c) = var.single_char() {
            vars_on_char[c as usize].push(v);
        }
    }
    for k in 0..num_changes {
        let from = movable[k];
        let to = destinations[k];
        if from == to {
            vars_on_char[from].clear();
            continue;
        }
        for &v in &vars_on_char[from] {
            mapping[v] = Some(to as u8);
        }
        vars_on_char[from].clear();
    }
    Ok(mapping)
}

/// Apply a renaming to the block: substitute the new characters at every
/// occurrence, rename the variables, and reparse the rebuilt text.
pub fn apply_renaming(
    block: &mut DynamicBlock,
    variables: &mut [Variable],
    mapping: &[Option<u8>],
) {
    let mut text = block.decode(&[]);
    for (v, target) in mapping.iter().enumerate() {
        let Some(new_char) = *target else {
            continue;
        };
        let var = &mut variables[v];
        for &occ in &var.occurrences {
            for slot in text.iter_mut().skip(occ).take(var.name.len()) {
                *slot = new_char;
            }
        }
        var.name = (new_char as char).to_string();
    }

    // The reparse prices literals with the current table; characters the
    // renaming just introduced may not have a code yet, so give them a
    // provisional one. The table is reassigned immediately afterwards.
    for &byte in &text {
        if block.lit_cost(byte as usize) >= crate::cl::COST_INF {
            if block.lit_lengths.len() <= byte as usize {
                block.lit_lengths.resize(byte as usize + 1, 0);
            }
            block.lit_lengths[byte as usize] = 15;
        }
    }

    block.tokens = text.iter().map(|&byte| Token::Literal(byte)).collect();
    block.tokens = optimal_parse(block, &[]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate::block::FixedBlock;

    fn block_for(text: &[u8]) -> DynamicBlock {
        FixedBlock { bfinal: true, tokens: text.iter().map(|&b| Token::Literal(b)).collect() }
            .to_dynamic()
    }

    fn var(name: &str, occurrences: Vec<usize>) -> Variable {
        Variable { name: name.into(), occurrences }
    }

    #[test]
    fn test_p_replaceable() {
        // One standalone p
        assert!(is_p_replaceable(&block_for(b"p=print;q(1)")));
        // Two standalone ps
        assert!(!is_p_replaceable(&block_for(b"p=1;p+2")));
        // p only inside longer identifiers does not count
        assert!(is_p_replaceable(&block_for(b"print(pos)")));
        // No p at all
        assert!(is_p_replaceable(&block_for(b"x=1")));
    }

    #[test]
    fn test_char_stats_split() {
        //         0123456789
        let text = b"q=1;q;q;zz";
        let block = block_for(text);
        let variables = vec![var("q", vec![0, 4, 6])];
        let stats = char_stats(&block, &variables).unwrap();
        assert_eq!(stats[b'q' as usize].var_literal, 3);
        assert_eq!(stats[b'q' as usize].nonvar_literal, 0);
        assert_eq!(stats[b'z' as usize].nonvar_literal, 2);
        assert!(stats[b'q' as usize].var_candidate);
        assert!(!stats[b'=' as usize].var_candidate);
    }

    #[test]
    fn test_char_stats_rejects_mismatch() {
        let block = block_for(b"abc");
        let variables = vec![var("z", vec![0])];
        assert!(char_stats(&block, &variables).is_err());
    }

    #[test]
    fn test_injective_assignment_prefers_cheap_codes() {
        // 'e' is frequent non-variable mass; the variable 'Q' should move
        // onto a character whose current code is short
        let text = b"eeee eeee Q=1;Q;Q";
        let mut block = block_for(text);
        // Give 'e' a short code and everything else longer ones
        for len in block.lit_lengths.iter_mut() {
            *len = 8;
        }
        block.lit_lengths[b'e' as usize] = 3;
        let variables = vec![var("Q", vec![10, 14, 16])];
        let mapping = optimize_variables(
            &block,
            &variables,
            &[],
            FreqCount::NonVarAsLiteral,
            TieBreak::NonVarFreq,
            Assignment::Injective,
        )
        .unwrap();
        assert_eq!(mapping[0], Some(b'e'));
    }

    #[test]
    fn test_apply_renaming_rewrites_text() {
        let text = b"Q=1;Q;Q and more text to parse";
        let mut block = block_for(text);
        let mut variables = vec![var("Q", vec![0, 4, 6])];
        apply_renaming(&mut block, &mut variables, &[Some(b'x')]);
        assert_eq!(block.decode(&[]), b"x=1;x;x and more text to parse");
        assert_eq!(variables[0].name, "x");
    }

    #[test]
    fn test_random_swap_respects_conflicts() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let text = b"a=1;b=2;a;b";
        let block = block_for(text);
        let variables = vec![var("a", vec![0, 8]), var("b", vec![4, 10])];
        // The two variables conflict: no swap may merge them, and a plain
        // exchange keeps them on distinct characters
        let conflicts = vec![vec![false, true], vec![true, false]];
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..20 {
            let mapping = random_swap(&variables, &conflicts, &[0, 1], &mut rng);
            let name_a = mapping[0].unwrap_or(b'a');
            let name_b = mapping[1].unwrap_or(b'b');
            assert_ne!(name_a, name_b);
        }
        let _ = block;
    }

    #[test]
    fn test_change_var_set_moves_boundary_chars() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let text = b"abcd abcd d=9;d";
        let block = block_for(text);
        let variables = vec![var("d", vec![10, 14])];
        let mut rng = StdRng::seed_from_u64(1);
        let mapping = change_var_set(&block, &variables, &mut rng).unwrap();
        if let Some(target) = mapping[0] {
            assert_ne!(target, b'd');
            assert!(target.is_ascii_alphabetic() || target == b'_');
        }
    }
}
