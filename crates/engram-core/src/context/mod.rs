//! Context Assembler
//!
//! Builds the prompt context for a single user turn. Each memory thread is
//! routed against the query, assigned a tier, and rendered under a strict
//! per-tier token budget:
//!
//! - **Tier 1** (metadata): thread name and a one-line summary
//! - **Tier 2** (keys): top fact keys, no values
//! - **Tier 3** (full): ranked facts with the verbosity variant that fits
//!
//! Tokens are whitespace tokens. Assembly is fully deterministic: identical
//! inputs produce byte-identical context.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;
use crate::embeddings::EmbeddingProvider;
use crate::events::{EventBus, kind as event_kind};
use crate::graph::extract_concepts;
use crate::scoring::{FactCandidate, ScoringEngine, ThreadKind};
use crate::storage::{FactRecord, Storage, StorageError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Context error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The store failed before any thread could be assembled
    #[error("context unavailable: {0}")]
    Unavailable(#[from] StorageError),
    /// A thread's scorer failed outright
    #[error("thread scorer failed: {0}")]
    Scoring(#[from] crate::scoring::ScoringError),
}

/// Context result type
pub type Result<T> = std::result::Result<T, ContextError>;

// ============================================================================
// TIERS
// ============================================================================

/// Route-score bands map each thread to one of three tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Metadata only: thread name and summary
    Metadata,
    /// Profile names and fact keys, no values
    Keys,
    /// Full facts under the level budget
    Full,
}

impl Tier {
    /// `[0, 3.5)` metadata, `[3.5, 7)` keys, `[7, 10]` full
    pub fn from_route_score(score: f64) -> Self {
        if score >= 7.0 {
            Tier::Full
        } else if score >= 3.5 {
            Tier::Keys
        } else {
            Tier::Metadata
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            Tier::Metadata => 1,
            Tier::Keys => 2,
            Tier::Full => 3,
        }
    }
}

// ============================================================================
// OUTPUT TYPES
// ============================================================================

/// One thread's contribution to the context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadContext {
    pub thread: ThreadKind,
    pub tier: Tier,
    pub route_score: f64,
    pub content: String,
    pub tokens: usize,
    /// True when this thread fell back to Tier 1 after a scorer failure
    pub degraded: bool,
}

/// The assembled context for one turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledContext {
    pub threads: Vec<ThreadContext>,
    pub total_tokens: usize,
}

impl AssembledContext {
    /// Render the context block handed to the prompt builder
    pub fn render(&self) -> String {
        self.threads
            .iter()
            .filter(|t| !t.content.is_empty())
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// TOKEN COUNTING
// ============================================================================

/// Whitespace tokens; the budgets are approximate by construction
pub(crate) fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Truncate to at most `budget` whitespace tokens
fn truncate_tokens(text: &str, budget: usize) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() <= budget {
        return tokens.join(" ");
    }
    tokens[..budget].join(" ")
}

// ============================================================================
// CONTEXT ASSEMBLER
// ============================================================================

/// Builds per-thread context under the configured budgets.
pub struct ContextAssembler {
    storage: Arc<Storage>,
    config: CoreConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    events: EventBus,
}

impl ContextAssembler {
    pub fn new(
        storage: Arc<Storage>,
        config: CoreConfig,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        events: EventBus,
    ) -> Self {
        Self {
            storage,
            config,
            embedder,
            events,
        }
    }

    /// Route a query over every thread's lexicon. Scores land in [0, 10].
    pub fn route_query(&self, query: &str) -> Vec<(ThreadKind, f64)> {
        let tokens = extract_concepts(query);
        ThreadKind::ALL
            .iter()
            .map(|kind| {
                let hits = tokens
                    .iter()
                    .filter(|t| kind.lexicon().contains(&t.as_str()))
                    .count();
                (*kind, (hits as f64 * 2.5).min(10.0))
            })
            .collect()
    }

    /// Assemble the full context for one turn.
    pub fn assemble(&self, query: &str) -> Result<AssembledContext> {
        let mut threads = Vec::with_capacity(ThreadKind::ALL.len());
        let mut total_tokens = 0;

        for (kind, route_score) in self.route_query(query) {
            let tier = Tier::from_route_score(route_score);
            let thread = match self.assemble_thread(query, kind, tier, route_score) {
                Ok(thread) => thread,
                Err(e) => {
                    // One thread failing never takes the others down
                    tracing::warn!(thread = %kind, error = %e, "thread degraded to metadata");
                    self.events.emit_best_effort(
                        &self.storage,
                        event_kind::CONTEXT_THREAD_DEGRADED,
                        "context",
                        &format!("thread {} degraded to tier 1", kind),
                        Some(serde_json::json!({"thread": kind.name()})),
                    );
                    let mut fallback = self.metadata_tier(kind, route_score);
                    fallback.degraded = true;
                    fallback
                }
            };
            total_tokens += thread.tokens;
            threads.push(thread);
        }

        Ok(AssembledContext {
            threads,
            total_tokens,
        })
    }

    fn assemble_thread(
        &self,
        query: &str,
        kind: ThreadKind,
        tier: Tier,
        route_score: f64,
    ) -> Result<ThreadContext> {
        match tier {
            Tier::Metadata => Ok(self.metadata_tier(kind, route_score)),
            Tier::Keys => self.keys_tier(kind, route_score),
            Tier::Full => self.full_tier(query, kind, route_score),
        }
    }

    fn metadata_tier(&self, kind: ThreadKind, route_score: f64) -> ThreadContext {
        let content = truncate_tokens(
            &format!("[{}] {}", kind.name(), kind.summary()),
            self.config.budget.l1_tokens,
        );
        ThreadContext {
            thread: kind,
            tier: Tier::Metadata,
            route_score,
            tokens: count_tokens(&content),
            content,
            degraded: false,
        }
    }

    fn keys_tier(&self, kind: ThreadKind, route_score: f64) -> Result<ThreadContext> {
        let mut facts = self.storage.facts_by_profile_types(kind.profile_types())?;
        // Heavier facts list first; key order settles ties
        facts.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.key.cmp(&b.key))
        });

        let header = format!("[{}]", kind.name());
        let budget = self.config.budget.l2_tokens;
        let mut content = header;
        let mut used = count_tokens(&content);
        for fact in &facts {
            let entry = format!("{}:{}", fact.profile, fact.key);
            if used + 1 > budget {
                break;
            }
            content.push(' ');
            content.push_str(&entry);
            used += 1;
        }

        Ok(ThreadContext {
            thread: kind,
            tier: Tier::Keys,
            route_score,
            tokens: count_tokens(&content),
            content,
            degraded: false,
        })
    }

    fn full_tier(&self, query: &str, kind: ThreadKind, route_score: f64) -> Result<ThreadContext> {
        let facts = self.storage.facts_by_profile_types(kind.profile_types())?;
        let by_key: std::collections::HashMap<(String, String), &FactRecord> = facts
            .iter()
            .map(|f| ((f.profile.clone(), f.key.clone()), f))
            .collect();

        let candidates: Vec<FactCandidate> = facts
            .iter()
            .map(|f| FactCandidate {
                profile: f.profile.clone(),
                key: f.key.clone(),
                text: f.text().to_string(),
                weight: f.weight,
            })
            .collect();

        let scorer = ScoringEngine::new(
            Arc::clone(&self.storage),
            self.config.clone(),
            self.embedder.clone(),
        );
        let scoring = scorer.score(query, &candidates)?;

        // Greedy top-K by descending final score; a fact that does not fit
        // is skipped, not truncated
        let budget = self.config.budget.l3_tokens;
        let mut content = format!("[{}]", kind.name());
        let mut used = count_tokens(&content);
        for scored in &scoring.ranked {
            let Some(fact) = by_key.get(&(scored.profile.clone(), scored.key.clone())) else {
                continue;
            };
            let variant = Self::variant_for_budget(fact, budget.saturating_sub(used));
            if variant.is_empty() {
                continue;
            }
            let line = format!("{}: {}", fact.key, variant);
            let line_tokens = count_tokens(&line);
            if used + line_tokens > budget {
                continue;
            }
            content.push('\n');
            content.push_str(&line);
            used += line_tokens;
        }

        Ok(ThreadContext {
            thread: kind,
            tier: Tier::Full,
            route_score,
            tokens: count_tokens(&content),
            content,
            degraded: false,
        })
    }

    /// Richest variant that still fits the remaining budget
    fn variant_for_budget(fact: &FactRecord, remaining: usize) -> &str {
        for variant in [&fact.v3, &fact.v2, &fact.v1] {
            if !variant.is_empty() && count_tokens(variant) + 2 <= remaining {
                return variant;
            }
        }
        ""
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Mode;
    use tempfile::tempdir;

    fn create_test_assembler() -> (tempfile::TempDir, Arc<Storage>, ContextAssembler) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(Mode::Primary, Some(dir.path().to_path_buf())).unwrap());
        let assembler = ContextAssembler::new(
            Arc::clone(&storage),
            CoreConfig::default(),
            None,
            EventBus::new(),
        );
        (dir, storage, assembler)
    }

    fn seed_fact(storage: &Storage, profile: &str, ptype: &str, key: &str, v1: &str, v2: &str) {
        storage.ensure_profile(profile, ptype).unwrap();
        let now = chrono::Utc::now();
        storage
            .upsert_fact(&FactRecord {
                profile: profile.into(),
                key: key.into(),
                kind: "fact".into(),
                v1: v1.into(),
                v2: v2.into(),
                v3: String::new(),
                weight: 0.6,
                access_count: 0,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
    }

    #[test]
    fn test_tier_bands() {
        assert_eq!(Tier::from_route_score(0.0), Tier::Metadata);
        assert_eq!(Tier::from_route_score(3.4), Tier::Metadata);
        assert_eq!(Tier::from_route_score(3.5), Tier::Keys);
        assert_eq!(Tier::from_route_score(6.9), Tier::Keys);
        assert_eq!(Tier::from_route_score(7.0), Tier::Full);
        assert_eq!(Tier::from_route_score(10.0), Tier::Full);
    }

    #[test]
    fn test_route_query_scores_matching_thread() {
        let (_dir, _storage, assembler) = create_test_assembler();
        let routes = assembler.route_query("what style tone and format for answers");
        let form = routes.iter().find(|(k, _)| *k == ThreadKind::Form).unwrap();
        let reflex = routes.iter().find(|(k, _)| *k == ThreadKind::Reflex).unwrap();
        assert!(form.1 >= 7.0);
        assert!(form.1 > reflex.1);
    }

    #[test]
    fn test_unrouted_query_yields_metadata_everywhere() {
        let (_dir, _storage, assembler) = create_test_assembler();
        let context = assembler.assemble("zzyzx qwerty").unwrap();
        for thread in &context.threads {
            assert_eq!(thread.tier, Tier::Metadata);
            assert!(thread.tokens <= 10);
            assert!(thread.content.starts_with('['));
        }
    }

    #[test]
    fn test_full_tier_respects_budget() {
        let (_dir, storage, assembler) = create_test_assembler();
        for i in 0..30 {
            seed_fact(
                &storage,
                "primary_user",
                "user",
                &format!("person.fact{:02}", i),
                "short note",
                "a person fact with a handful of filler words to eat the budget quickly",
            );
        }

        // Three identity-lexicon hits push the identity thread to Tier 3
        let context = assembler
            .assemble("family friend birthday details please")
            .unwrap();
        let identity = context
            .threads
            .iter()
            .find(|t| t.thread == ThreadKind::Identity)
            .unwrap();
        assert_eq!(identity.tier, Tier::Full);
        assert!(identity.tokens <= 200, "tokens = {}", identity.tokens);
        assert!(identity.content.lines().count() > 1);

        // Total never exceeds the sum of per-thread budgets
        assert!(context.total_tokens <= 5 * 200);
    }

    #[test]
    fn test_keys_tier_lists_keys_without_values() {
        let (_dir, storage, assembler) = create_test_assembler();
        seed_fact(
            &storage,
            "primary_user",
            "user",
            "sarah.likes.blue",
            "blue",
            "Sarah likes blue mugs best",
        );

        // Two hits = 5.0 = Tier 2
        let context = assembler.assemble("family friend").unwrap();
        let identity = context
            .threads
            .iter()
            .find(|t| t.thread == ThreadKind::Identity)
            .unwrap();
        assert_eq!(identity.tier, Tier::Keys);
        assert!(identity.content.contains("sarah.likes.blue"));
        assert!(!identity.content.contains("mugs"));
        assert!(identity.tokens <= 50);
    }

    #[test]
    fn test_assembly_is_byte_identical() {
        let (_dir, storage, assembler) = create_test_assembler();
        seed_fact(&storage, "primary_user", "user", "sarah.likes.blue", "blue", "Sarah likes blue");
        seed_fact(&storage, "core.values", "value", "honesty.first", "honesty", "Honesty comes first");

        let a = assembler.assemble("family friend birthday details").unwrap();
        let b = assembler.assemble("family friend birthday details").unwrap();
        assert_eq!(a.render(), b.render());
        assert_eq!(a.total_tokens, b.total_tokens);
    }

    #[test]
    fn test_render_skips_empty_threads() {
        let (_dir, _storage, assembler) = create_test_assembler();
        let context = assembler.assemble("nothing in particular").unwrap();
        let rendered = context.render();
        assert_eq!(rendered.lines().count(), context.threads.len());
    }
}
