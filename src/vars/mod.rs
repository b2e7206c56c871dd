//! Renameable variables: named spans of the block text with their
//! occurrence offsets, an optional conflict matrix, and the textual dump
//! format both arrive in.

pub mod rename;

pub use rename::{
    apply_renaming, change_var_set, is_p_replaceable, optimize_variables, random_swap, Assignment,
    FreqCount, TieBreak,
};

use std::collections::HashMap;
use std::io::Write;

use crate::deflate::dump::DumpReader;
use crate::error::Result;

/// A named span with its textual occurrences (byte offsets)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub occurrences: Vec<usize>,
}

impl Variable {
    /// Single-character variables are the renaming targets
    pub fn single_char(&self) -> Option<u8> {
        match self.name.as_bytes() {
            [byte] => Some(*byte),
            _ => None,
        }
    }
}

/// Parse the variable dump: `<n>` then n records of
/// `<name> <m> <occ0> ... <occm-1>`
pub fn parse_variables(reader: &mut DumpReader) -> Result<Vec<Variable>> {
    let count = reader.next_usize()?;
    let mut variables = Vec::with_capacity(count);
    for _ in 0..count {
        let name = reader.next_str()?.to_string();
        let occ_count = reader.next_usize()?;
        let mut occurrences = Vec::with_capacity(occ_count);
        for _ in 0..occ_count {
            occurrences.push(reader.next_usize()?);
        }
        variables.push(Variable { name, occurrences });
    }
    Ok(variables)
}

/// Parse the optional conflict-matrix section: n*n 0/1 entries. Returns
/// `None` when the input ends before the matrix.
pub fn parse_conflict_matrix(
    reader: &mut DumpReader,
    count: usize,
) -> Result<Option<Vec<Vec<bool>>>> {
    if reader.at_end() {
        return Ok(None);
    }
    let mut matrix = vec![vec![false; count]; count];
    for row in matrix.iter_mut() {
        for cell in row.iter_mut() {
            *cell = reader.next_u32()? != 0;
        }
    }
    Ok(Some(matrix))
}

/// Merge variables sharing a name: occurrence lists are united and the
/// conflict matrix rows are OR-ed together.
pub fn merge_same_name(
    variables: &[Variable],
    conflicts: &[Vec<bool>],
) -> (Vec<Variable>, Vec<Vec<bool>>) {
    let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut ordered_names: Vec<&str> = Vec::new();
    for (i, var) in variables.iter().enumerate() {
        let bucket = by_name.entry(&var.name).or_default();
        if bucket.is_empty() {
            ordered_names.push(&var.name);
        }
        bucket.push(i);
    }
    if ordered_names.len() == variables.len() {
        return (variables.to_vec(), conflicts.to_vec());
    }

    let mut merged = Vec::with_capacity(ordered_names.len());
    for &name in &ordered_names {
        let mut occurrences = Vec::new();
        for &i in &by_name[name] {
            occurrences.extend_from_slice(&variables[i].occurrences);
        }
        occurrences.sort_unstable();
        merged.push(Variable { name: name.to_string(), occurrences });
    }

    let n = ordered_names.len();
    let mut merged_conflicts = vec![vec![false; n]; n];
    for (a, &name_a) in ordered_names.iter().enumerate() {
        for (b, &name_b) in ordered_names.iter().enumerate() {
            let conflicting = by_name[name_a].iter().any(|&i| {
                by_name[name_b]
                    .iter()
                    .any(|&j| conflicts.get(i).and_then(|row| row.get(j)).copied().unwrap_or(false))
            });
            merged_conflicts[a][b] = conflicting;
        }
    }
    (merged, merged_conflicts)
}

/// Serialize variables without a conflict matrix (population snapshots)
pub fn write_variables<W: Write>(out: &mut W, variables: &[Variable]) -> std::io::Result<()> {
    writeln!(out, "{}", variables.len())?;
    for var in variables {
        writeln!(out, "{} {}", var.name, var.occurrences.len())?;
        let mut first = true;
        for &occ in &var.occurrences {
            if first {
                write!(out, "{occ}")?;
                first = false;
            } else {
                write!(out, " {occ}")?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Serialize variables and their conflict matrix, merging same-name
/// variables first
pub fn write_variables_with_conflicts<W: Write>(
    out: &mut W,
    variables: &[Variable],
    conflicts: &[Vec<bool>],
) -> std::io::Result<()> {
    let (merged, merged_conflicts) = merge_same_name(variables, conflicts);
    write_variables(out, &merged)?;
    for row in &merged_conflicts {
        let mut first = true;
        for &cell in row {
            if first {
                write!(out, "{}", cell as u8)?;
                first = false;
            } else {
                write!(out, " {}", cell as u8)?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_write_roundtrip() {
        let text = "2\nx 3\n0 5 9\ny 1\n2\n0 1\n1 0\n";
        let mut reader = DumpReader::new(text);
        let variables = parse_variables(&mut reader).unwrap();
        assert_eq!(variables.len(), 2);
        assert_eq!(variables[0].name, "x");
        assert_eq!(variables[0].occurrences, vec![0, 5, 9]);
        let matrix = parse_conflict_matrix(&mut reader, 2).unwrap().unwrap();
        assert!(!matrix[0][0] && matrix[0][1] && matrix[1][0] && !matrix[1][1]);

        let mut buf = Vec::new();
        write_variables_with_conflicts(&mut buf, &variables, &matrix).unwrap();
        let round = String::from_utf8(buf).unwrap();
        let mut reader = DumpReader::new(&round);
        assert_eq!(parse_variables(&mut reader).unwrap(), variables);
        assert_eq!(parse_conflict_matrix(&mut reader, 2).unwrap().unwrap(), matrix);
    }

    #[test]
    fn test_missing_matrix_is_none() {
        let mut reader = DumpReader::new("1\nz 1\n4\n");
        let variables = parse_variables(&mut reader).unwrap();
        assert_eq!(parse_conflict_matrix(&mut reader, variables.len()).unwrap(), None);
    }

    #[test]
    fn test_merge_same_name() {
        let variables = vec![
            Variable { name: "a".into(), occurrences: vec![7] },
            Variable { name: "b".into(), occurrences: vec![1] },
            Variable { name: "a".into(), occurrences: vec![3] },
        ];
        let mut conflicts = vec![vec![false; 3]; 3];
        conflicts[2][1] = true;
        let (merged, merged_conflicts) = merge_same_name(&variables, &conflicts);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "a");
        assert_eq!(merged[0].occurrences, vec![3, 7]);
        assert!(merged_conflicts[0][1]); // inherited from the second "a"
    }

    #[test]
    fn test_single_char() {
        assert_eq!(Variable { name: "q".into(), occurrences: vec![] }.single_char(), Some(b'q'));
        assert_eq!(Variable { name: "qq".into(), occurrences: vec![] }.single_char(), None);
    }
}
