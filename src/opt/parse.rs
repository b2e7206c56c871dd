//! Cost-optimal LZ77 parsing of a block's text against itself plus an
//! optional history context, under the block's current code lengths.

use crate::cl::COST_INF;
use crate::deflate::block::DynamicBlock;
use crate::deflate::tables::{
    distance_extra_bits, distance_symbol, length_extra_bits, length_symbol,
};
use crate::deflate::Token;

/// DEFLATE match limits
const MIN_MATCH: usize = 3;
const MAX_MATCH: usize = 258;
const MAX_DISTANCE: usize = 32768;

/// Longest-common-prefix table between the block text and the
/// concatenation of context and text, capped at the maximum match length.
/// `lcp[i][j]` compares `text[i..]` with `concat[j..]`.
fn lcp_table(text: &[u8], concat: &[u8]) -> Vec<u16> {
    let n = text.len();
    let m = concat.len();
    let width = m + 1;
    let mut lcp = vec![0u16; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            if text[i] == concat[j] {
                let extended = lcp[(i + 1) * width + j + 1] + 1;
                lcp[i * width + j] = extended.min(MAX_MATCH as u16);
            }
        }
    }
    lcp
}

/// Parse the block text into the cheapest token sequence under the
/// block's current literal/length and distance code lengths.
///
/// Panics when no path exists; the all-literal path is always available
/// on a well-formed block, so this indicates a coding bug (a table that
/// cannot encode the block's own text).
pub fn optimal_parse(block: &DynamicBlock, context: &[u8]) -> Vec<Token> {
    let text = block.decode(context);
    let mut concat = context.to_vec();
    concat.extend_from_slice(&text);
    let n = text.len();
    let m = concat.len();
    let width = m + 1;
    let lcp = lcp_table(&text, &concat);

    // matches[i][len]: cheapest (bits, distance) covering text[i..i+len]
    let mut matches: Vec<Vec<(u32, u32)>> = (0..n)
        .map(|i| vec![(COST_INF, 0); MAX_MATCH.min(n - i) + 1])
        .collect();
    let mut max_match: Vec<usize> = vec![1; n];

    for i in 0..n {
        matches[i][1] = (block.lit_cost(text[i] as usize), 0);
        for ref_pos in 0..context.len() + i {
            let dist = i + context.len() - ref_pos;
            if dist > MAX_DISTANCE {
                continue;
            }
            let lcp_len = lcp[i * width + ref_pos] as usize;
            max_match[i] = max_match[i].max(lcp_len);
            let dist_sym = distance_symbol(dist as u16) as usize;
            let dist_cost =
                block.dist_cost(dist_sym).saturating_add(distance_extra_bits(dist as u16) as u32);
            if dist_cost >= COST_INF {
                continue;
            }
            for len in MIN_MATCH..=lcp_len {
                let len_sym = length_symbol(len as u16) as usize;
                let len_cost =
                    block.lit_cost(len_sym).saturating_add(length_extra_bits(len as u16) as u32);
                if len_cost >= COST_INF {
                    continue;
                }
                let cand = (len_cost + dist_cost, dist as u32);
                if cand < matches[i][len] {
                    matches[i][len] = cand;
                }
            }
        }
    }

    let mut dp = vec![COST_INF; n + 1];
    let mut prev = vec![usize::MAX; n + 1];
    dp[0] = 0;
    for i in 0..n {
        if dp[i] >= COST_INF {
            continue;
        }
        for len in 1..=max_match[i] {
            let (cost, _) = matches[i][len];
            if cost >= COST_INF {
                continue;
            }
            if dp[i] + cost <= dp[i + len] {
                dp[i + len] = dp[i] + cost;
                prev[i + len] = i;
            }
        }
    }
    assert!(dp[n] < COST_INF, "no path in matching graph");

    let mut tokens = Vec::new();
    let mut pos = n;
    while pos > 0 {
        let start = prev[pos];
        let len = pos - start;
        if len == 1 {
            tokens.push(Token::Literal(text[start]));
        } else {
            let (_, dist) = matches[start][len];
            assert!(dist > 0, "match token without distance");
            tokens.push(Token::Copy { length: len as u16, distance: dist as u16 });
        }
        pos = start;
    }
    tokens.reverse();
    tokens
}

/// Greedy longest-match parse: at each position take the longest match
/// available (cheapest distance on ties), falling back to a literal.
/// Cheaper to run than the optimal parse; used for quick baselines.
pub fn greedy_parse(block: &DynamicBlock, context: &[u8]) -> Vec<Token> {
    let text = block.decode(context);
    let mut concat = context.to_vec();
    concat.extend_from_slice(&text);
    let n = text.len();
    let width = concat.len() + 1;
    let lcp = lcp_table(&text, &concat);

    let mut tokens = Vec::new();
    let mut i = 0usize;
    while i < n {
        let mut best_len = 1usize;
        let mut best_cost = block.lit_cost(text[i] as usize);
        let mut best_dist = 0usize;
        for ref_pos in 0..context.len() + i {
            let dist = i + context.len() - ref_pos;
            if dist > MAX_DISTANCE {
                continue;
            }
            let len = lcp[i * width + ref_pos] as usize;
            if len < MIN_MATCH {
                continue;
            }
            let len_cost = block
                .lit_cost(length_symbol(len as u16) as usize)
                .saturating_add(length_extra_bits(len as u16) as u32);
            let dist_cost = block
                .dist_cost(distance_symbol(dist as u16) as usize)
                .saturating_add(distance_extra_bits(dist as u16) as u32);
            if len_cost >= COST_INF || dist_cost >= COST_INF {
                continue;
            }
            let cost = len_cost + dist_cost;
            let better = len > best_len
                || (len == best_len && cost < best_cost)
                || (len == best_len && cost == best_cost && best_dist != 0 && dist < best_dist);
            if better {
                best_len = len;
                best_cost = cost;
                best_dist = dist;
            }
        }
        if best_len >= MIN_MATCH {
            tokens.push(Token::Copy { length: best_len as u16, distance: best_dist as u16 });
        } else {
            tokens.push(Token::Literal(text[i]));
        }
        i += best_len;
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate::block::FixedBlock;

    /// Dynamic block carrying the fixed code lengths and an all-literal
    /// token stream for the given text
    fn literal_block(text: &[u8]) -> DynamicBlock {
        FixedBlock { bfinal: true, tokens: text.iter().map(|&b| Token::Literal(b)).collect() }
            .to_dynamic()
    }

    #[test]
    fn test_repeating_pattern() {
        let block = literal_block(b"abcabcabcabc");
        let tokens = optimal_parse(&block, &[]);
        assert_eq!(
            tokens,
            vec![
                Token::Literal(b'a'),
                Token::Literal(b'b'),
                Token::Literal(b'c'),
                Token::Copy { length: 9, distance: 3 },
            ]
        );
    }

    #[test]
    fn test_parse_reproduces_text() {
        let text = b"the quick brown fox, the quick brown fox, the quick brown fox";
        let block = literal_block(text);
        let mut parsed = block.clone();
        parsed.tokens = optimal_parse(&block, &[]);
        assert_eq!(parsed.decode(&[]), text);
        assert!(parsed.tokens.len() < text.len());
    }

    #[test]
    fn test_short_text_stays_literal() {
        let block = literal_block(b"ab");
        assert_eq!(
            optimal_parse(&block, &[]),
            vec![Token::Literal(b'a'), Token::Literal(b'b')]
        );
    }

    #[test]
    fn test_context_matches() {
        // The text repeats the context, so a single back-reference into
        // the context wins
        let context = b"hello world ";
        let block = literal_block(b"hello world ");
        let tokens = optimal_parse(&block, context);
        assert_eq!(tokens, vec![Token::Copy { length: 12, distance: 12 }]);
    }

    #[test]
    fn test_greedy_reproduces_text() {
        let text = b"xyxyxyxyxy-xyxyxyxyxy";
        let block = literal_block(text);
        let mut parsed = block.clone();
        parsed.tokens = greedy_parse(&block, &[]);
        assert_eq!(parsed.decode(&[]), text);
    }

    #[test]
    fn test_optimal_no_worse_than_greedy() {
        let text = b"aaabaaabaaabaaabcccc";
        let block = literal_block(text);
        let cost = |tokens: &[Token]| -> u32 {
            tokens
                .iter()
                .map(|token| match *token {
                    Token::Literal(byte) => block.lit_cost(byte as usize),
                    Token::Copy { length, distance } => {
                        block.lit_cost(length_symbol(length) as usize)
                            + length_extra_bits(length) as u32
                            + block.dist_cost(distance_symbol(distance) as usize)
                            + distance_extra_bits(distance) as u32
                    }
                })
                .sum()
        };
        let optimal = optimal_parse(&block, &[]);
        let greedy = greedy_parse(&block, &[]);
        assert!(cost(&optimal) <= cost(&greedy));
    }
}
