//! Thread kinds and their keyword lexicons.
//!
//! The assistant's memory is organized into a fixed set of threads. Each
//! thread carries a small lexicon used two ways: routing a query to threads
//! during context assembly, and computing the per-thread dimensional score
//! breakdown.

use serde::{Deserialize, Serialize};

/// The fixed enumeration of memory threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadKind {
    /// Who the user and their people are
    Identity,
    /// Values, beliefs, and constraints
    Philosophy,
    /// Response style and formatting preferences
    Form,
    /// Standing routines, reminders, and automatic behaviors
    Reflex,
    /// What recently happened
    Log,
}

impl ThreadKind {
    pub const ALL: [ThreadKind; 5] = [
        ThreadKind::Identity,
        ThreadKind::Philosophy,
        ThreadKind::Form,
        ThreadKind::Reflex,
        ThreadKind::Log,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ThreadKind::Identity => "identity",
            ThreadKind::Philosophy => "philosophy",
            ThreadKind::Form => "form",
            ThreadKind::Reflex => "reflex",
            ThreadKind::Log => "log",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "identity" => Some(ThreadKind::Identity),
            "philosophy" => Some(ThreadKind::Philosophy),
            "form" => Some(ThreadKind::Form),
            "reflex" => Some(ThreadKind::Reflex),
            "log" => Some(ThreadKind::Log),
            _ => None,
        }
    }

    /// One-line summary used for Tier 1 metadata
    pub fn summary(&self) -> &'static str {
        match self {
            ThreadKind::Identity => "who the user and their people are",
            ThreadKind::Philosophy => "values, beliefs, and constraints",
            ThreadKind::Form => "response style and formatting preferences",
            ThreadKind::Reflex => "standing routines and automatic behaviors",
            ThreadKind::Log => "recent sessions and notable events",
        }
    }

    /// Keyword lexicon; content words only, stop-concepts never appear here.
    pub fn lexicon(&self) -> &'static [&'static str] {
        match self {
            ThreadKind::Identity => &[
                "name", "user", "identity", "family", "friend", "person", "people", "age",
                "birthday", "lives", "job", "work", "partner", "relationship", "likes", "loves",
                "favorite",
            ],
            ThreadKind::Philosophy => &[
                "value", "values", "believe", "belief", "beliefs", "principle", "principles",
                "ethics", "honesty", "philosophy", "meaning", "important", "matters", "priority",
            ],
            ThreadKind::Form => &[
                "style", "tone", "format", "brief", "short", "verbose", "detailed", "formal",
                "casual", "voice", "respond", "answer", "write", "bullet", "emoji",
            ],
            ThreadKind::Reflex => &[
                "always", "never", "remind", "reminder", "trigger", "schedule", "automatic",
                "routine", "habit", "alert", "daily", "weekly", "morning", "evening",
            ],
            ThreadKind::Log => &[
                "yesterday", "today", "last", "recent", "recently", "history", "log", "happened",
                "event", "conversation", "session", "earlier", "remember", "said", "told",
            ],
        }
    }

    /// Profile types whose facts belong to this thread
    pub fn profile_types(&self) -> &'static [&'static str] {
        match self {
            ThreadKind::Identity => &["user", "machine", "family", "friend"],
            ThreadKind::Philosophy => &["value", "constraint"],
            ThreadKind::Form => &["style"],
            ThreadKind::Reflex => &["reflex"],
            ThreadKind::Log => &["log"],
        }
    }
}

impl std::fmt::Display for ThreadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Fraction of `tokens` found in `lexicon`, scaled so a handful of hits
/// saturates. Returns a value in [0, 1].
pub fn lexicon_overlap(tokens: &[String], lexicon: &[&str]) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let hits = tokens
        .iter()
        .filter(|t| lexicon.contains(&t.as_str()))
        .count();
    (hits as f64 / 3.0).min(1.0)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::extract_concepts;

    #[test]
    fn test_thread_name_roundtrip() {
        for kind in ThreadKind::ALL {
            assert_eq!(ThreadKind::parse_name(kind.name()), Some(kind));
        }
        assert_eq!(ThreadKind::parse_name("unknown"), None);
    }

    #[test]
    fn test_lexicons_survive_concept_extraction() {
        // Routing tokenizes queries through extract_concepts, so lexicon
        // entries must not be stop-concepts or single characters.
        for kind in ThreadKind::ALL {
            for term in kind.lexicon() {
                let extracted = extract_concepts(term);
                assert_eq!(extracted, vec![term.to_string()], "thread {}", kind);
            }
        }
    }

    #[test]
    fn test_lexicon_overlap_saturates() {
        let tokens: Vec<String> = ["style", "tone", "format", "brief"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(lexicon_overlap(&tokens, ThreadKind::Form.lexicon()), 1.0);

        let one: Vec<String> = vec!["style".to_string()];
        let partial = lexicon_overlap(&one, ThreadKind::Form.lexicon());
        assert!(partial > 0.0 && partial < 1.0);

        assert_eq!(lexicon_overlap(&[], ThreadKind::Form.lexicon()), 0.0);
    }
}
