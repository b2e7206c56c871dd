//! DEFLATE numeric tables (RFC 1951 section 3.2.5) and symbol lookups.
//!
//! Length codes 257-285 and distance codes 0-29 each cover a contiguous
//! range of values: a base plus a fixed number of extra bits. Both
//! directions of the mapping are driven off the same base/extra tables.

/// Base length and extra-bit width for length codes 257-285, indexed by
/// `code - 257`
pub const LENGTH_TABLE: [(u16, u8); 29] = [
    (3, 0),   // 257
    (4, 0),   // 258
    (5, 0),   // 259
    (6, 0),   // 260
    (7, 0),   // 261
    (8, 0),   // 262
    (9, 0),   // 263
    (10, 0),  // 264
    (11, 1),  // 265
    (13, 1),  // 266
    (15, 1),  // 267
    (17, 1),  // 268
    (19, 2),  // 269
    (23, 2),  // 270
    (27, 2),  // 271
    (31, 2),  // 272
    (35, 3),  // 273
    (43, 3),  // 274
    (51, 3),  // 275
    (59, 3),  // 276
    (67, 4),  // 277
    (83, 4),  // 278
    (99, 4),  // 279
    (115, 4), // 280
    (131, 5), // 281
    (163, 5), // 282
    (195, 5), // 283
    (227, 5), // 284
    (258, 0), // 285 - lone value, shadows the tail of 284's range
];

/// Base distance and extra-bit width for distance codes 0-29
pub const DISTANCE_TABLE: [(u16, u8); 30] = [
    (1, 0),      // 0
    (2, 0),      // 1
    (3, 0),      // 2
    (4, 0),      // 3
    (5, 1),      // 4
    (7, 1),      // 5
    (9, 2),      // 6
    (13, 2),     // 7
    (17, 3),     // 8
    (25, 3),     // 9
    (33, 4),     // 10
    (49, 4),     // 11
    (65, 5),     // 12
    (97, 5),     // 13
    (129, 6),    // 14
    (193, 6),    // 15
    (257, 7),    // 16
    (385, 7),    // 17
    (513, 8),    // 18
    (769, 8),    // 19
    (1025, 9),   // 20
    (1537, 9),   // 21
    (2049, 10),  // 22
    (3073, 10),  // 23
    (4097, 11),  // 24
    (6145, 11),  // 25
    (8193, 12),  // 26
    (12289, 12), // 27
    (16385, 13), // 28
    (24577, 13), // 29
];

/// Permuted order in which CL code lengths appear in a dynamic block
/// header
pub const CODE_LENGTH_ORDER: [usize; 19] =
    [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

/// Number of symbols in the code length alphabet
pub const CL_ALPHABET_SIZE: usize = 19;

/// Find the row of a base/extra table whose value range contains `value`.
/// Rows are sorted by base and each row spans `2^extra_bits` values, so
/// the candidate is the last row whose base does not exceed the value
/// (length 258 has its own one-value row shadowing the tail of the
/// 5-extra-bit row before it). Returns (row index, extra payload, extra
/// width).
fn covering_row(table: &[(u16, u8)], value: u16) -> Option<(u16, u16, u8)> {
    let row = table.partition_point(|&(base, _)| base <= value).checked_sub(1)?;
    let (base, extra_bits) = table[row];
    if u32::from(value) >= u32::from(base) + (1u32 << extra_bits) {
        return None;
    }
    Some((row as u16, value - base, extra_bits))
}

/// Symbol and extra-bit field for a match length.
/// Returns (code, extra_value, extra_bits); `None` outside 3-258.
pub fn encode_length(length: u16) -> Option<(u16, u16, u8)> {
    covering_row(&LENGTH_TABLE, length).map(|(row, extra, bits)| (row + 257, extra, bits))
}

/// Symbol and extra-bit field for a match distance.
/// Returns (code, extra_value, extra_bits); `None` outside 1-32768.
pub fn encode_distance(distance: u16) -> Option<(u16, u16, u8)> {
    covering_row(&DISTANCE_TABLE, distance)
}

/// Literal/length symbol for a match length. Lengths are validated at
/// token construction, so an out-of-range value is a coding bug.
pub fn length_symbol(length: u16) -> u16 {
    match encode_length(length) {
        Some((code, _, _)) => code,
        None => panic!("match length {length} out of range"),
    }
}

/// Distance symbol for a match distance. See `length_symbol`.
pub fn distance_symbol(distance: u16) -> u16 {
    match encode_distance(distance) {
        Some((code, _, _)) => code,
        None => panic!("match distance {distance} out of range"),
    }
}

/// Extra bits carried by a match length
pub fn length_extra_bits(length: u16) -> u8 {
    match encode_length(length) {
        Some((_, _, bits)) => bits,
        None => panic!("match length {length} out of range"),
    }
}

/// Extra bits carried by a match distance
pub fn distance_extra_bits(distance: u16) -> u8 {
    match encode_distance(distance) {
        Some((_, _, bits)) => bits,
        None => panic!("match distance {distance} out of range"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every length in 3-258 must land in exactly one code whose base and
    /// extra payload reconstruct it
    #[test]
    fn test_length_codes_tile_the_range() {
        let mut previous_code = 0;
        for length in 3..=258u16 {
            let (code, extra, bits) = encode_length(length).unwrap();
            assert!((257..=285).contains(&code), "length {length} got code {code}");
            assert!(code >= previous_code, "codes must be monotone in length");
            previous_code = code;
            let (base, table_bits) = LENGTH_TABLE[(code - 257) as usize];
            assert_eq!(bits, table_bits);
            assert!(u32::from(extra) < 1u32 << bits);
            assert_eq!(base + extra, length);
        }
    }

    #[test]
    fn test_distance_codes_tile_the_range() {
        let mut previous_code = 0;
        for distance in 1..=32768u32 {
            let (code, extra, bits) = encode_distance(distance as u16).unwrap();
            assert!(code <= 29, "distance {distance} got code {code}");
            assert!(code >= previous_code);
            previous_code = code;
            let (base, table_bits) = DISTANCE_TABLE[code as usize];
            assert_eq!(bits, table_bits);
            assert_eq!(u32::from(base) + u32::from(extra), distance);
        }
    }

    #[test]
    fn test_range_boundaries() {
        // The shortest and longest match both use zero extra bits
        assert_eq!(encode_length(3), Some((257, 0, 0)));
        assert_eq!(encode_length(258), Some((285, 0, 0)));
        // 257 is the last value of the widest ordinary row, not the
        // one-value 258 row
        assert_eq!(encode_length(257), Some((284, 30, 5)));
        // Two-value row: 18 shares code 268 with 17
        assert_eq!(encode_length(18), Some((268, 1, 1)));

        assert_eq!(encode_distance(1), Some((0, 0, 0)));
        assert_eq!(encode_distance(7), Some((5, 0, 1)));
        assert_eq!(encode_distance(32768), Some((29, 8191, 13)));
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        assert_eq!(encode_length(0), None);
        assert_eq!(encode_length(2), None);
        assert_eq!(encode_length(259), None);
        assert_eq!(encode_distance(0), None);
        assert_eq!(encode_distance(32769), None);
    }

    #[test]
    fn test_code_length_order_is_permutation() {
        let mut seen = [false; 19];
        for &sym in CODE_LENGTH_ORDER.iter() {
            assert!(!seen[sym]);
            seen[sym] = true;
        }
    }
}
