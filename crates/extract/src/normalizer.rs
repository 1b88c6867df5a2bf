use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Collapse internal whitespace and trim surrounding whitespace and punctuation.
pub fn clean_candidate(raw: &str) -> String {
    let collapsed = WHITESPACE.replace_all(raw, " ");
    collapsed
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '.' | ',' | ';' | ':' | '!' | '?'))
        .to_string()
}

/// Order-preserving exact deduplication.
pub fn dedup(candidates: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.clone()))
        .collect()
}
