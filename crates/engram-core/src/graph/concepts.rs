//! Concept extraction and hierarchical key generation.
//!
//! Concepts are lowercase normalized tokens. A hierarchical key is a
//! dot-separated concept path (`sarah.likes.blue`) built from the salient
//! tokens of a sentence. Both operations are deterministic for the same
//! input.

/// Tokens that carry no associative signal and never become concepts.
const STOP_CONCEPTS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "but", "by", "can", "could", "did", "do", "does",
    "doing", "down", "during", "each", "few", "for", "from", "further", "had", "has", "have",
    "having", "he", "her", "here", "hers", "him", "his", "how", "i", "if", "in", "into", "is",
    "it", "its", "just", "me", "more", "most", "my", "no", "nor", "not", "now", "of", "off",
    "on", "once", "only", "or", "other", "our", "out", "over", "own", "s", "same", "she",
    "should", "so", "some", "such", "t", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "those", "through", "to", "too", "under", "until", "up", "very",
    "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
    "with", "would", "you", "your", "yours",
];

fn is_stop_concept(token: &str) -> bool {
    STOP_CONCEPTS.binary_search(&token).is_ok()
}

/// Tokenize text into an ordered, de-duplicated sequence of concept tokens:
/// lowercase, alphanumeric-plus-underscore, stop-concepts removed, single
/// characters dropped. Dots split tokens, so a key path re-tokenizes into
/// its segments.
pub fn extract_concepts(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    let lowered = text.to_lowercase();
    for raw in lowered.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_')) {
        if raw.len() < 2 || is_stop_concept(raw) {
            continue;
        }
        if seen.insert(raw.to_string()) {
            out.push(raw.to_string());
        }
    }
    out
}

/// Maximum path segments in a generated key
const MAX_KEY_SEGMENTS: usize = 3;

/// Build a dot-notation key from the salient tokens of `text`: the first
/// concepts in subject–verb–object order, capped at three segments. Output
/// contains only `[a-z0-9_.]` and the function is idempotent: feeding a
/// generated key back in returns it unchanged.
pub fn generate_hierarchical_key(text: &str) -> String {
    extract_concepts(text)
        .into_iter()
        .take(MAX_KEY_SEGMENTS)
        .collect::<Vec<_>>()
        .join(".")
}

/// Cumulative path nodes of a key: `sarah.likes.blue` yields
/// `["sarah", "sarah.likes", "sarah.likes.blue"]`.
pub fn key_path_nodes(key: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut acc = String::new();
    for segment in key.split('.').filter(|s| !s.is_empty()) {
        if acc.is_empty() {
            acc.push_str(segment);
        } else {
            acc.push('.');
            acc.push_str(segment);
        }
        out.push(acc.clone());
    }
    out
}

/// FNV-1a over a concept id; used for deterministic subsampling.
pub fn concept_hash(concept: &str) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in concept.bytes() {
        h ^= byte as u64;
        h = h.wrapping_mul(0x100_0000_01b3);
    }
    h
}

// ============================================================================
// TESTS
// ============================================================================
