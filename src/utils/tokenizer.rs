//! Deterministic tokenizer shared by the index builder and the query path.
//!
//! Any divergence between index-time and query-time tokenization is a
//! correctness bug, so there is exactly one implementation and it is a
//! pure function of the input text.

use unicode_segmentation::UnicodeSegmentation;

/// Tokenize text into lowercase terms.
///
/// Segments on Unicode word boundaries, then splits each segment into
/// maximal alphanumeric runs (so "Wikipedia's" yields "wikipedia", "s")
/// and lowercases with full Unicode case mapping. Terms are emitted in
/// left-to-right order with no deduplication.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_word_bounds()
        .flat_map(|segment| segment.split(|c: char| !c.is_alphanumeric()))
        .filter(|run| !run.is_empty())
        .map(|run| run.to_lowercase())
        .collect()
}

/// Number of terms `tokenize` would produce, without allocating them.
pub fn count_tokens(text: &str) -> usize {
    text.split_word_bounds()
        .flat_map(|segment| segment.split(|c: char| !c.is_alphanumeric()))
        .filter(|run| !run.is_empty())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tokenization() {
        let tokens = tokenize("Hello World! This is a test.");
        assert_eq!(tokens, vec!["hello", "world", "this", "is", "a", "test"]);
    }

    #[test]
    fn test_apostrophe_and_numbers() {
        let tokens = tokenize("Wikipedia's café 42");
        assert_eq!(tokens, vec!["wikipedia", "s", "café", "42"]);
    }

    #[test]
    fn test_unicode_case_folding() {
        assert_eq!(tokenize("Café"), tokenize("café"));
        assert_eq!(tokenize("Café"), vec!["café"]);
    }

    #[test]
    fn test_deterministic() {
        let text = "The quick brown fox, 42 times.";
        assert_eq!(tokenize(text), tokenize(text));
    }

    #[test]
    fn test_ascii_lowercase_identity() {
        let text = "MiXeD Case TEXT";
        assert_eq!(tokenize(&text.to_lowercase()), tokenize(text));
    }

    #[test]
    fn test_empty_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  \t\n ...!?").is_empty());
    }

    #[test]
    fn test_no_dedup_preserves_order() {
        let tokens = tokenize("cat dog cat");
        assert_eq!(tokens, vec!["cat", "dog", "cat"]);
    }

    #[test]
    fn test_count_matches_tokenize() {
        for text in ["", "one", "Wikipedia's café 42", "a b c d e"] {
            assert_eq!(count_tokens(text), tokenize(text).len());
        }
    }
}
