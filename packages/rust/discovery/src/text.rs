//! Tokenization shared by relevance scoring and local sparse embeddings.

use std::collections::BTreeSet;

/// Words too common to signal relevance.
const STOPWORDS: [&str; 48] = [
    "the", "and", "for", "with", "that", "this", "from", "your", "you", "are", "can", "how",
    "what", "when", "where", "which", "will", "into", "about", "more", "use", "using", "used",
    "all", "any", "its", "our", "not", "but", "have", "has", "was", "were", "been", "also",
    "than", "then", "them", "they", "their", "there", "these", "those", "such", "via", "per",
    "each", "other",
];

/// Lowercased alphanumeric tokens of three or more characters, stopwords removed.
///
/// Order and duplicates are preserved.
pub fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

/// Distinct tokens of `text`.
pub fn token_set(text: &str) -> BTreeSet<String> {
    tokens(text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_drop_short_words_and_stopwords() {
        let toks: Vec<String> = tokens("How to use the Alerting API for rules").collect();
        assert_eq!(toks, vec!["alerting", "api", "rules"]);
    }

    #[test]
    fn token_set_is_case_insensitive() {
        let set = token_set("Kibana kibana KIBANA dashboards");
        assert_eq!(set.len(), 2);
        assert!(set.contains("kibana"));
    }

    #[test]
    fn tokens_split_on_punctuation() {
        let toks: Vec<String> = tokens("index-lifecycle_management/policies").collect();
        assert_eq!(toks, vec!["index", "lifecycle", "management", "policies"]);
    }
}
