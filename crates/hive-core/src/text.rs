//! Small string helpers shared by the agents.

use std::collections::BTreeSet;

const ELLIPSIS: &str = "…";

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub fn prefix_within(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Clip `s` to at most `max` bytes, marking the cut with an ellipsis when
/// there is room for one.
pub fn clip(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    if max < ELLIPSIS.len() {
        return prefix_within(s, max).to_string();
    }
    let head = prefix_within(s, max - ELLIPSIS.len()).trim_end();
    format!("{head}{ELLIPSIS}")
}

/// Rough token estimate (four bytes per token), never zero for non-empty text.
pub fn estimate_tokens(s: &str) -> u64 {
    (s.len() as u64).div_ceil(4)
}

/// Lowercased alphanumeric words of three or more characters.
pub fn keywords(s: &str) -> BTreeSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Jaccard overlap of two keyword sets.
pub fn overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    shared / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_respects_char_boundaries() {
        let s = "héllo";
        assert_eq!(prefix_within(s, 2), "h");
        assert_eq!(prefix_within(s, 3), "hé");
        assert_eq!(prefix_within(s, 100), s);
    }

    #[test]
    fn clip_stays_within_budget() {
        let s = "a".repeat(50);
        let out = clip(&s, 10);
        assert!(out.len() <= 10);
        assert!(out.ends_with(ELLIPSIS));
        assert_eq!(clip("short", 10), "short");
    }

    #[test]
    fn keywords_drop_short_words_and_case() {
        let k = keywords("Lithium supply in the EU, lithium!");
        assert!(k.contains("lithium"));
        assert!(k.contains("supply"));
        assert!(!k.contains("in"));
        assert_eq!(k.len(), 3);
    }

    #[test]
    fn overlap_of_disjoint_sets_is_zero() {
        assert_eq!(overlap(&keywords("alpha beta"), &keywords("gamma delta")), 0.0);
        assert_eq!(overlap(&keywords("alpha beta"), &keywords("alpha beta")), 1.0);
    }
}
