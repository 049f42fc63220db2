// Keyword normalisation shared by the API (on product save) and the pipeline
// (when merging LLM expansions with seed keywords).

use std::collections::HashSet;

/// Longest keyword we will send to a search engine.
pub const MAX_KEYWORD_LEN: usize = 80;

/// Trim, lowercase, collapse internal whitespace and strip surrounding quotes.
/// Returns an empty string for input that is blank after cleanup.
pub fn normalize_keyword(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    let collapsed = trimmed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if collapsed.chars().count() > MAX_KEYWORD_LEN {
        collapsed.chars().take(MAX_KEYWORD_LEN).collect::<String>().trim_end().to_string()
    } else {
        collapsed
    }
}

/// Merge seed keywords with expanded ones. Seeds keep their order and come
/// first; duplicates (after normalisation) and empties are dropped; the
/// result holds at most `cap` entries.
pub fn merge_keywords(seed: &[String], expanded: &[String], cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for raw in seed.iter().chain(expanded.iter()) {
        if merged.len() >= cap {
            break;
        }
        let kw = normalize_keyword(raw);
        if kw.is_empty() {
            continue;
        }
        if seen.insert(kw.clone()) {
            merged.push(kw);
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn normalize_collapses_and_lowercases() {
        assert_eq!(normalize_keyword("  CRM   for   Startups "), "crm for startups");
        assert_eq!(normalize_keyword("\"invoice tool\""), "invoice tool");
        assert_eq!(normalize_keyword("   "), "");
    }

    #[test]
    fn normalize_caps_length() {
        let long = "a ".repeat(100);
        assert!(normalize_keyword(&long).chars().count() <= MAX_KEYWORD_LEN);
    }

    #[test]
    fn merge_keeps_seed_order_first() {
        let merged = merge_keywords(
            &s(&["Time Tracking", "invoicing"]),
            &s(&["freelancer invoicing", "time tracking", ""]),
            10,
        );
        assert_eq!(merged, s(&["time tracking", "invoicing", "freelancer invoicing"]));
    }

    #[test]
    fn merge_respects_cap() {
        let merged = merge_keywords(&s(&["a", "b"]), &s(&["c", "d", "e"]), 3);
        assert_eq!(merged, s(&["a", "b", "c"]));
    }

    #[test]
    fn merge_with_no_expansion_returns_seeds() {
        let merged = merge_keywords(&s(&["seo audit"]), &[], 15);
        assert_eq!(merged, s(&["seo audit"]));
    }
}
