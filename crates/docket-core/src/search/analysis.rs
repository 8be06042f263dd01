//! Text analysis used by the in-memory index: tokenizing, edit distance and
//! phrase proximity.

use std::collections::HashMap;

/// Largest edit distance honoured for fuzzy matching.
pub const MAX_FUZZINESS: u32 = 2;

/// Lowercased alphanumeric runs of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Levenshtein distance over chars.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Whether `token` matches `term` within `fuzziness` edits (capped at
/// `MAX_FUZZINESS`).
pub fn fuzzy_matches(token: &str, term: &str, fuzziness: u32) -> bool {
    let budget = fuzziness.min(MAX_FUZZINESS) as usize;
    if budget == 0 {
        return token == term;
    }
    let length_gap = token.chars().count().abs_diff(term.chars().count());
    length_gap <= budget && edit_distance(token, term) <= budget
}

/// Positions of each distinct token in `tokens`.
pub fn positions(tokens: &[String]) -> HashMap<&str, Vec<usize>> {
    let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, token) in tokens.iter().enumerate() {
        positions.entry(token.as_str()).or_default().push(index);
    }
    positions
}

/// Whether the phrase terms appear in `tokens` with at most `slop` moves.
///
/// A placement assigns each phrase term a distinct position `p_i`. Its cost
/// is the spread of the offsets `p_i - i`, so an exact phrase costs 0 and a
/// swapped pair costs 2. The phrase matches when some window
/// `[start, start + slop]` holds every offset; `start` is always one of the
/// offsets, so only those are tried.
pub fn phrase_matches(tokens: &[String], phrase: &[String], slop: u32) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let index = positions(tokens);
    let mut candidates = Vec::with_capacity(phrase.len());
    for term in phrase {
        match index.get(term.as_str()) {
            Some(found) => candidates.push((term.as_str(), found.as_slice())),
            None => return false,
        }
    }
    let mut starts: Vec<i64> = candidates
        .iter()
        .enumerate()
        .flat_map(|(i, (_, found))| found.iter().map(move |&p| p as i64 - i as i64))
        .collect();
    starts.sort_unstable();
    starts.dedup();
    let slop = i64::from(slop);
    starts.into_iter().any(|start| fits_window(&candidates, start, slop))
}

/// Whether each phrase term `i` gets a distinct position in
/// `[start + i, start + i + slop]`. The ranges of a repeated term move right
/// with `i`, so taking its earliest free position is enough.
fn fits_window(candidates: &[(&str, &[usize])], start: i64, slop: i64) -> bool {
    let mut taken: HashMap<&str, i64> = HashMap::new();
    for (i, &(term, found)) in candidates.iter().enumerate() {
        let low = start + i as i64;
        let high = low + slop;
        let low = taken.get(term).map_or(low, |&last| low.max(last + 1));
        let next = found.partition_point(|&p| (p as i64) < low);
        match found.get(next) {
            Some(&p) if p as i64 <= high => {
                taken.insert(term, p as i64);
            }
            _ => return false,
        }
    }
    true
}
