//! Python string-literal escaping for emitted DEFLATE bytes.
//!
//! The optimizer's embed-aware fitness needs the exact number of bytes a
//! block occupies once pasted into a Python source file as a quoted
//! literal. Four quotings are tried (single, double, triple-single,
//! triple-double) and the shortest valid one wins.

const PLACEHOLDER: &[u8] = b"%DOUBLE_ESCAPE%";

/// Two-byte sequences that Python would interpret as escapes; the leading
/// backslash must itself be escaped.
const ESCAPE_TAILS: &[u8] = b"\"'01234567NUabfnrtuvx";

fn replace_all(data: &mut Vec<u8>, from: &[u8], to: &[u8]) {
    if from.is_empty() {
        return;
    }
    let mut pos = 0;
    while pos + from.len() <= data.len() {
        if &data[pos..pos + from.len()] == from {
            data.splice(pos..pos + from.len(), to.iter().copied());
            pos += to.len();
        } else {
            pos += 1;
        }
    }
}

fn contains(data: &[u8], needle: &[u8]) -> bool {
    data.windows(needle.len()).any(|window| window == needle)
}

/// Shortest Python literal (including quotes) whose value is `input`
pub fn embed_string(input: &[u8]) -> Vec<u8> {
    let mut b = input.to_vec();
    replace_all(&mut b, b"\\\\", PLACEHOLDER);

    for &tail in ESCAPE_TAILS {
        replace_all(&mut b, &[b'\\', tail], &[b'\\', b'\\', tail]);
    }

    // A NUL before a digit must be written as \000 so the digit is not
    // swallowed into the octal escape
    for digit in b'0'..=b'7' {
        replace_all(&mut b, &[b'\\', 0, digit], &[b'\\', b'\\', b'\\', b'0', b'0', b'0', digit]);
        replace_all(&mut b, &[0, digit], &[b'\\', b'0', b'0', b'0', digit]);
    }
    replace_all(&mut b, &[b'\\', 0], &[b'\\', b'\\', b'\\', b'0']);
    replace_all(&mut b, &[0], &[b'\\', b'0']);

    replace_all(&mut b, &[b'\\', b'\r'], &[b'\\', b'\\', b'\\', b'r']);
    replace_all(&mut b, &[b'\r'], &[b'\\', b'r']);

    if b.last() == Some(&b'\\') {
        b.push(b'\\');
    }

    let mut candidates: Vec<Vec<u8>> = Vec::with_capacity(4);

    for sep in [b'\'', b'"'] {
        let mut t = b.clone();
        replace_all(&mut t, &[b'\\', b'\n'], &[b'\\', b'\\', b'\\', b'n']);
        replace_all(&mut t, &[b'\n'], &[b'\\', b'n']);
        replace_all(&mut t, &[sep], &[b'\\', sep]);
        replace_all(&mut t, PLACEHOLDER, b"\\\\\\\\");
        let mut candidate = vec![sep];
        candidate.extend_from_slice(&t);
        candidate.push(sep);
        candidates.push(candidate);
    }

    for sep in [&b"'''"[..], &b"\"\"\""[..]] {
        if contains(&b, sep) {
            continue;
        }
        let mut t = b.clone();
        replace_all(&mut t, &[b'\\', b'\n'], &[b'\\', b'\\', b'\n']);
        replace_all(&mut t, PLACEHOLDER, b"\\\\\\\\");
        if t.last() == Some(&sep[0]) {
            t.insert(t.len() - 1, b'\\');
        }
        let mut candidate = sep.to_vec();
        candidate.extend_from_slice(&t);
        candidate.extend_from_slice(sep);
        candidates.push(candidate);
    }

    candidates
        .into_iter()
        .min_by_key(|candidate| candidate.len())
        .unwrap_or_else(|| b"''".to_vec())
}

/// Extra bytes the embedding adds over the raw data, clamped at zero
pub fn embed_overhead(data: &[u8]) -> usize {
    embed_string(data).len().saturating_sub(data.len())
}
