//! Core context
//!
//! The explicitly constructed entry point for every operation: storage,
//! config, event bus, and the optional embedding provider live here, and the
//! graph / scoring / consolidation / context components are built per call
//! as stateless views. There is no global state; hosts create one `Core`
//! and pass `Arc<Core>` wherever it is needed.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;
use crate::consolidation::{ConsolidationError, ConsolidationReport, Consolidator};
use crate::context::{AssembledContext, ContextAssembler, ContextError};
use crate::embeddings::{CachedEmbedder, EmbeddingProvider};
use crate::events::{EventBus, kind as event_kind};
use crate::graph::{
    ActivationMap, ConceptGraph, GraphError, GraphView, extract_concepts,
    generate_hierarchical_key,
};
use crate::scoring::{FactCandidate, ScoringEngine, ScoringError, ScoringOutcome};
use crate::storage::{
    DecayOutcome, DeferredConfirmation, DeferredStatus, EventRecord, FactRecord, HealthCounts,
    Mode, ProfileRecord, Storage, StorageError, StorageManager, TempFactRecord,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Core error type: the stable categories surfaced to callers
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Consolidation(#[from] ConsolidationError),
    #[error(transparent)]
    Context(#[from] ContextError),
    /// Validation failed at a public entry point; nothing reached storage
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Core result type
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Spread activation for a query, with the concepts the query produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationResult {
    pub input_concepts: Vec<String>,
    pub activation: ActivationMap,
}

/// One health sweep's view of the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub mode: Mode,
    pub counts: HealthCounts,
    pub pending_sessions: Vec<String>,
    pub version: String,
}

// ============================================================================
// CORE
// ============================================================================

/// Variant token caps applied when observing raw text
const V1_TOKEN_CAP: usize = 10;
const V2_TOKEN_CAP: usize = 50;
const V3_TOKEN_CAP: usize = 200;

/// The linking core. One instance per process; `Send + Sync`.
pub struct Core {
    config: CoreConfig,
    storage: StorageManager,
    events: EventBus,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    consolidation_gate: Mutex<()>,
}

impl Core {
    /// Open the core with the configured storage mode.
    pub fn open(config: CoreConfig, data_dir: Option<PathBuf>) -> Result<Self> {
        let storage = StorageManager::open(config.storage_mode, data_dir)?;
        Ok(Self {
            config,
            storage,
            events: EventBus::new(),
            embedder: None,
            consolidation_gate: Mutex::new(()),
        })
    }

    /// Wire in an embedding provider. The provider is wrapped in an LRU
    /// cache so repeated queries are not re-embedded.
    pub fn with_embedder(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(Arc::new(CachedEmbedder::new(provider)));
        self.config.embedding_enabled = true;
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The current storage handle. Held for one operation at a time.
    pub fn storage(&self) -> Arc<Storage> {
        self.storage.current()
    }

    fn graph_on(&self, storage: Arc<Storage>) -> ConceptGraph {
        ConceptGraph::new(
            storage,
            self.config.hebbian_rate,
            self.config.spread,
            self.config.decay,
        )
    }

    // ========================================================================
    // GRAPH SURFACE
    // ========================================================================

    /// Snapshot-consistent graph view capped by node count
    pub fn get_graph(&self, max_nodes: usize) -> Result<GraphView> {
        Ok(self.graph_on(self.storage()).view(max_nodes)?)
    }

    /// Spread activation for a query against the live graph
    pub fn activate(&self, query: &str) -> Result<ActivationResult> {
        let input_concepts = extract_concepts(query);
        if input_concepts.is_empty() {
            return Err(CoreError::InvalidInput(
                "query contains no concepts".to_string(),
            ));
        }
        let activation = self.graph_on(self.storage()).spread(&input_concepts)?;
        Ok(ActivationResult {
            input_concepts,
            activation,
        })
    }

    /// Apply a bounded delta to a link, clamped to [0, 1]. Audited through
    /// the event log.
    pub fn strengthen(&self, a: &str, b: &str, delta: f64) -> Result<f64> {
        let a = normalize_concept(a)?;
        let b = normalize_concept(b)?;
        if a == b {
            return Err(CoreError::InvalidInput(
                "cannot link a concept to itself".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&delta) {
            return Err(CoreError::InvalidInput(format!(
                "delta {} outside [-1, 1]",
                delta
            )));
        }
        let storage = self.storage();
        let (lo, hi) = if a <= b { (&a, &b) } else { (&b, &a) };
        let strength = storage.adjust_link(lo, hi, delta)?;
        self.events.emit_best_effort(
            &storage,
            event_kind::GRAPH_STRENGTHENED,
            "introspection",
            &format!("link {}~{} adjusted by {:+.3}", lo, hi, delta),
            Some(serde_json::json!({"a": lo, "b": hi, "delta": delta, "strength": strength})),
        );
        Ok(strength)
    }

    /// Rebuild concept indexing from all stored facts. Returns the resulting
    /// link count.
    pub fn reindex(&self) -> Result<usize> {
        let storage = self.storage();
        let count = self.graph_on(Arc::clone(&storage)).reindex()?;
        self.events.emit_best_effort(
            &storage,
            event_kind::GRAPH_REINDEXED,
            "introspection",
            &format!("graph reindexed: {} links", count),
            Some(serde_json::json!({"links": count})),
        );
        Ok(count)
    }

    /// Fuzzy concept search for UIs
    pub fn find_concepts(&self, terms: &[String], limit: usize) -> Result<Vec<String>> {
        Ok(self
            .graph_on(self.storage())
            .find_by_substring(terms, limit.clamp(1, 500))?)
    }

    // ========================================================================
    // SCORING SURFACE
    // ========================================================================

    /// Rank facts against a query with the full per-dimension breakdown.
    /// `fact_refs` limits scoring to specific `(profile, key)` pairs; `None`
    /// scores every stored fact.
    pub fn score(
        &self,
        query: &str,
        fact_refs: Option<&[(String, String)]>,
    ) -> Result<ScoringOutcome> {
        if query.trim().is_empty() {
            return Err(CoreError::InvalidInput("empty query".to_string()));
        }
        let storage = self.storage();
        let facts: Vec<FactRecord> = match fact_refs {
            Some(refs) => {
                let mut out = Vec::with_capacity(refs.len());
                for (profile, key) in refs {
                    match storage.get_fact(profile, key)? {
                        Some(fact) => out.push(fact),
                        None => {
                            return Err(CoreError::InvalidInput(format!(
                                "unknown fact {}:{}",
                                profile, key
                            )));
                        }
                    }
                }
                out
            }
            None => storage.all_facts()?,
        };
        let candidates: Vec<FactCandidate> = facts
            .iter()
            .map(|f| FactCandidate {
                profile: f.profile.clone(),
                key: f.key.clone(),
                text: f.text().to_string(),
                weight: f.weight,
            })
            .collect();
        let scorer = ScoringEngine::new(storage, self.config.clone(), self.embedder.clone());
        Ok(scorer.score(query, &candidates)?)
    }

    // ========================================================================
    // FACT SURFACE
    // ========================================================================

    pub fn list_profiles(&self, profile_type: Option<&str>) -> Result<Vec<ProfileRecord>> {
        Ok(self.storage().list_profiles(profile_type)?)
    }

    pub fn list_facts(&self, profile: &str) -> Result<Vec<FactRecord>> {
        Ok(self.storage().list_facts(profile)?)
    }

    /// Insert or replace a fact, enforcing the data-model invariants, and
    /// index it into the concept graph.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_fact(
        &self,
        profile: &str,
        key: &str,
        kind: &str,
        v1: &str,
        v2: &str,
        v3: &str,
        weight: f64,
    ) -> Result<FactRecord> {
        if profile.trim().is_empty() {
            return Err(CoreError::InvalidInput("empty profile".to_string()));
        }
        validate_key(key)?;
        if v1.is_empty() && v2.is_empty() && v3.is_empty() {
            return Err(CoreError::InvalidInput(
                "at least one verbosity variant must be non-empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&weight) {
            return Err(CoreError::InvalidInput(format!(
                "weight {} outside [0, 1]",
                weight
            )));
        }

        let storage = self.storage();
        storage.ensure_profile(profile, "user")?;
        let now = chrono::Utc::now();
        let fact = FactRecord {
            profile: profile.to_string(),
            key: key.to_string(),
            kind: if kind.is_empty() { "fact" } else { kind }.to_string(),
            v1: v1.to_string(),
            v2: v2.to_string(),
            v3: v3.to_string(),
            weight,
            access_count: 0,
            created_at: now,
            updated_at: now,
        };
        storage.upsert_fact(&fact)?;
        self.graph_on(Arc::clone(&storage))
            .index_key_in_graph(&fact.key, fact.text())?;
        Ok(fact)
    }

    /// Delete a fact and drop graph references its key no longer justifies.
    pub fn delete_fact(&self, profile: &str, key: &str) -> Result<bool> {
        let storage = self.storage();
        let deleted = storage.delete_fact(profile, key)?;
        if deleted {
            self.graph_on(storage).remove_key_references(key)?;
        }
        Ok(deleted)
    }

    // ========================================================================
    // OBSERVATION INTAKE
    // ========================================================================

    /// Record a session observation as a pending temp fact. The hierarchical
    /// key is generated from the text; the three verbosity variants are
    /// token-capped cuts of it.
    pub fn observe(&self, session_id: &str, profile: &str, text: &str) -> Result<TempFactRecord> {
        if session_id.trim().is_empty() || profile.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "session and profile are required".to_string(),
            ));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::InvalidInput("empty observation".to_string()));
        }
        let key = generate_hierarchical_key(text);
        if key.is_empty() {
            return Err(CoreError::InvalidInput(
                "observation contains no concepts".to_string(),
            ));
        }
        let v1 = cap_tokens(text, V1_TOKEN_CAP);
        let v2 = cap_tokens(text, V2_TOKEN_CAP);
        let v3 = cap_tokens(text, V3_TOKEN_CAP);
        Ok(self
            .storage()
            .insert_temp_fact(session_id, profile, &key, &v1, &v2, &v3)?)
    }

    // ========================================================================
    // CONSOLIDATION SURFACE
    // ========================================================================

    fn consolidator(&self, storage: Arc<Storage>) -> Consolidator {
        Consolidator::new(
            storage,
            self.config.clone(),
            self.embedder.clone(),
            self.events.clone(),
        )
    }

    /// Consolidate one session. Overlapping runs are refused, not queued.
    pub fn consolidate(&self, session_id: &str) -> Result<ConsolidationReport> {
        let _gate = self
            .consolidation_gate
            .try_lock()
            .map_err(|_| CoreError::Consolidation(ConsolidationError::AlreadyRunning))?;
        Ok(self.consolidator(self.storage()).run(session_id)?)
    }

    /// Consolidate every session with pending temp facts. Used by the
    /// background sweep and the manual trigger.
    pub fn consolidate_all(&self) -> Result<Vec<ConsolidationReport>> {
        let _gate = self
            .consolidation_gate
            .try_lock()
            .map_err(|_| CoreError::Consolidation(ConsolidationError::AlreadyRunning))?;
        Ok(self.consolidator(self.storage()).run_all()?)
    }

    // ========================================================================
    // DEFERRED CONFIRMATIONS
    // ========================================================================

    pub fn list_deferred(&self) -> Result<Vec<DeferredConfirmation>> {
        Ok(self.storage().list_deferred()?)
    }

    /// Resolve a parked conflict. Accepting overwrites the stored value with
    /// the proposed one; rejecting discards the challenger. Either way the
    /// queue row reaches a terminal status exactly once.
    pub fn resolve_deferred(&self, id: &str, accept: bool) -> Result<bool> {
        let storage = self.storage();
        let Some(confirmation) = storage.get_deferred(id)? else {
            return Ok(false);
        };
        if confirmation.status != DeferredStatus::Pending {
            return Ok(false);
        }

        if accept {
            if let Some(mut fact) = storage.get_fact(&confirmation.profile, &confirmation.key)? {
                fact.v1 = String::new();
                fact.v2 = confirmation.proposed_value.clone();
                fact.v3 = String::new();
                storage.upsert_fact(&fact)?;
                self.graph_on(Arc::clone(&storage))
                    .index_key_in_graph(&fact.key, &fact.v2)?;
            }
        }

        let status = if accept {
            DeferredStatus::Accepted
        } else {
            DeferredStatus::Rejected
        };
        let resolved = storage.resolve_deferred(id, status)?;
        if resolved {
            self.events.emit_best_effort(
                &storage,
                event_kind::CONFLICT_RESOLVED,
                "introspection",
                &format!(
                    "conflict on {}.{} {}",
                    confirmation.profile,
                    confirmation.key,
                    if accept { "accepted" } else { "rejected" }
                ),
                Some(serde_json::json!({
                    "confirmationId": id,
                    "accepted": accept,
                })),
            );
        }
        Ok(resolved)
    }

    // ========================================================================
    // CONTEXT SURFACE
    // ========================================================================

    /// Build the per-thread context for one turn.
    pub fn assemble_context(&self, query: &str) -> Result<AssembledContext> {
        if query.trim().is_empty() {
            return Err(CoreError::InvalidInput("empty query".to_string()));
        }
        let assembler = ContextAssembler::new(
            self.storage(),
            self.config.clone(),
            self.embedder.clone(),
            self.events.clone(),
        );
        Ok(assembler.assemble(query)?)
    }

    // ========================================================================
    // MODE, EVENTS, HEALTH
    // ========================================================================

    /// Atomic process-wide switch between primary and demo storage.
    pub fn switch_mode(&self, mode: Mode) -> Result<Mode> {
        let switched = self.storage.switch_mode(mode)?;
        let storage = self.storage();
        self.events.emit_best_effort(
            &storage,
            event_kind::MODE_SWITCHED,
            "storage",
            &format!("storage mode switched to {}", switched),
            Some(serde_json::json!({"mode": switched.as_str()})),
        );
        Ok(switched)
    }

    pub fn mode(&self) -> Mode {
        self.storage.mode()
    }

    /// Events with id greater than `since_id`
    pub fn events_since(&self, since_id: i64, limit: usize) -> Result<Vec<EventRecord>> {
        Ok(self.storage().list_events(since_id, limit.clamp(1, 1000))?)
    }

    /// Live event stream receiver
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    /// Aggregate health snapshot
    pub fn health(&self) -> Result<HealthSnapshot> {
        let storage = self.storage();
        Ok(HealthSnapshot {
            mode: storage.mode(),
            counts: storage.health_counts()?,
            pending_sessions: storage.sessions_with_pending()?,
            version: crate::VERSION.to_string(),
        })
    }

    // ========================================================================
    // BACKGROUND SWEEPS
    // ========================================================================

    /// One consolidation sweep: every pending session, plus deferred-queue
    /// expiry. Returns how many sessions were processed.
    pub fn run_consolidation_sweep(&self) -> Result<usize> {
        let reports = self.consolidate_all()?;
        Ok(reports.iter().filter(|r| !r.results.is_empty()).count())
    }

    /// One decay sweep over the concept graph.
    pub fn run_decay_sweep(&self) -> Result<DecayOutcome> {
        let storage = self.storage();
        let outcome = self.graph_on(Arc::clone(&storage)).decay()?;
        if outcome.ran {
            self.events.emit_best_effort(
                &storage,
                event_kind::GRAPH_DECAYED,
                "runtime",
                &format!(
                    "decay sweep: {} links decayed, {} pruned",
                    outcome.decayed, outcome.pruned
                ),
                Some(serde_json::json!({
                    "decayed": outcome.decayed,
                    "pruned": outcome.pruned,
                })),
            );
        }
        Ok(outcome)
    }

    /// One health sweep: snapshot counts and enforce the event-log cap.
    pub fn run_health_sweep(&self) -> Result<HealthSnapshot> {
        let storage = self.storage();
        let pruned = storage.prune_events(self.config.runtime.event_log_cap)?;
        if pruned > 0 {
            tracing::debug!(pruned, "event log rotated");
        }
        self.health()
    }
}

// ============================================================================
// VALIDATION HELPERS
// ============================================================================

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CoreError::InvalidInput("empty key".to_string()));
    }
    let valid = key
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.');
    if !valid || key.starts_with('.') || key.ends_with('.') {
        return Err(CoreError::InvalidInput(format!(
            "key '{}' must be a dot path of [a-z0-9_] segments",
            key
        )));
    }
    Ok(())
}

fn normalize_concept(concept: &str) -> Result<String> {
    let c = concept.trim().to_lowercase();
    if c.is_empty() {
        return Err(CoreError::InvalidInput("empty concept".to_string()));
    }
    Ok(c)
}

/// First `cap` whitespace tokens of `text`
fn cap_tokens(text: &str, cap: usize) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() <= cap {
        tokens.join(" ")
    } else {
        tokens[..cap].join(" ")
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_core() -> (tempfile::TempDir, Core) {
        let dir = tempdir().unwrap();
        let core = Core::open(CoreConfig::default(), Some(dir.path().to_path_buf())).unwrap();
        (dir, core)
    }

    #[test]
    fn test_upsert_fact_validates_input() {
        let (_dir, core) = create_test_core();

        // Empty variants rejected
        let err = core.upsert_fact("primary_user", "some.key", "fact", "", "", "", 0.5);
        assert!(matches!(err, Err(CoreError::InvalidInput(_))));

        // Bad key charset rejected
        let err = core.upsert_fact("primary_user", "Bad Key!", "fact", "x", "", "", 0.5);
        assert!(matches!(err, Err(CoreError::InvalidInput(_))));

        // Out-of-range weight rejected
        let err = core.upsert_fact("primary_user", "some.key", "fact", "x", "", "", 1.5);
        assert!(matches!(err, Err(CoreError::InvalidInput(_))));

        // Valid input lands, with graph indexing
        let fact = core
            .upsert_fact("primary_user", "sarah.likes.blue", "fact", "blue", "Sarah likes blue", "", 0.8)
            .unwrap();
        assert_eq!(fact.key, "sarah.likes.blue");
        assert!(
            core.storage()
                .get_link("sarah", "sarah.likes")
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_delete_fact_cascades_graph() {
        let (_dir, core) = create_test_core();
        core.upsert_fact("primary_user", "sarah.likes.blue", "fact", "blue", "", "", 0.8)
            .unwrap();

        assert!(core.delete_fact("primary_user", "sarah.likes.blue").unwrap());
        assert!(
            core.storage()
                .get_link("sarah", "sarah.likes")
                .unwrap()
                .is_none()
        );
        // Second delete reports false
        assert!(!core.delete_fact("primary_user", "sarah.likes.blue").unwrap());
    }

    #[test]
    fn test_observe_generates_key_and_variants() {
        let (_dir, core) = create_test_core();
        let long_text = (0..80).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        let temp = core.observe("s1", "primary_user", &long_text).unwrap();

        assert!(!temp.key.is_empty());
        assert!(temp.key.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_'));
        assert_eq!(temp.v1.split_whitespace().count(), 10);
        assert_eq!(temp.v2.split_whitespace().count(), 50);
        assert_eq!(temp.v3.split_whitespace().count(), 80);
    }

    #[test]
    fn test_observe_rejects_empty_input() {
        let (_dir, core) = create_test_core();
        assert!(core.observe("s1", "primary_user", "   ").is_err());
        assert!(core.observe("", "primary_user", "text").is_err());
        // Stop-words only
        assert!(core.observe("s1", "primary_user", "the of and").is_err());
    }

    #[test]
    fn test_observe_then_consolidate_then_context() {
        let (_dir, core) = create_test_core();
        core.observe("s1", "primary_user", "Sarah likes blue coffee mugs")
            .unwrap();
        let report = core.consolidate("s1").unwrap();
        assert_eq!(report.promoted, 1);

        let context = core.assemble_context("family friend birthday sarah").unwrap();
        assert!(context.total_tokens > 0);
    }

    #[test]
    fn test_strengthen_validates_and_audits() {
        let (_dir, core) = create_test_core();
        assert!(core.strengthen("a", "a", 0.5).is_err());
        assert!(core.strengthen("a", "b", 2.0).is_err());

        let strength = core.strengthen("Coffee", "sarah", 0.4).unwrap();
        assert!((strength - 0.4).abs() < 1e-9);

        let events = core.events_since(0, 10).unwrap();
        assert!(events.iter().any(|e| e.kind == event_kind::GRAPH_STRENGTHENED));
    }

    #[test]
    fn test_activate_requires_concepts() {
        let (_dir, core) = create_test_core();
        assert!(core.activate("the of and").is_err());

        core.strengthen("coffee", "sarah", 0.8).unwrap();
        let result = core.activate("sarah").unwrap();
        assert_eq!(result.input_concepts, vec!["sarah"]);
        assert!(result.activation.contains_key("sarah"));
        assert!(result.activation.contains_key("coffee"));
    }

    #[test]
    fn test_score_over_all_facts() {
        let (_dir, core) = create_test_core();
        core.upsert_fact("primary_user", "sarah.likes.blue", "fact", "", "Sarah likes blue", "", 0.8)
            .unwrap();
        core.upsert_fact("primary_user", "weather.rain", "fact", "", "It rained yesterday", "", 0.4)
            .unwrap();

        let outcome = core.score("what does sarah like", None).unwrap();
        assert_eq!(outcome.ranked.len(), 2);
        assert_eq!(outcome.ranked[0].key, "sarah.likes.blue");

        // Scoped scoring rejects unknown refs
        let err = core.score("query", Some(&[("nobody".into(), "nothing".into())]));
        assert!(matches!(err, Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn test_resolve_deferred_accept_overwrites() {
        let (_dir, core) = create_test_core();
        core.upsert_fact("primary_user", "favorite_color", "fact", "", "blue", "", 0.9)
            .unwrap();
        let confirmation = core
            .storage()
            .enqueue_deferred("primary_user", "favorite_color", "blue", "green", 7)
            .unwrap();

        assert!(core.resolve_deferred(&confirmation.id, true).unwrap());
        let fact = core
            .storage()
            .get_fact("primary_user", "favorite_color")
            .unwrap()
            .unwrap();
        assert_eq!(fact.v2, "green");

        // Already terminal
        assert!(!core.resolve_deferred(&confirmation.id, false).unwrap());
    }

    #[test]
    fn test_resolve_deferred_reject_keeps_stored() {
        let (_dir, core) = create_test_core();
        core.upsert_fact("primary_user", "favorite_color", "fact", "", "blue", "", 0.9)
            .unwrap();
        let confirmation = core
            .storage()
            .enqueue_deferred("primary_user", "favorite_color", "blue", "green", 7)
            .unwrap();

        assert!(core.resolve_deferred(&confirmation.id, false).unwrap());
        let fact = core
            .storage()
            .get_fact("primary_user", "favorite_color")
            .unwrap()
            .unwrap();
        assert_eq!(fact.v2, "blue");
    }

    #[test]
    fn test_switch_mode_emits_event() {
        let (_dir, core) = create_test_core();
        core.switch_mode(Mode::Demo).unwrap();
        assert_eq!(core.mode(), Mode::Demo);

        // Event lands in the demo store's log
        let events = core.events_since(0, 10).unwrap();
        assert!(events.iter().any(|e| e.kind == event_kind::MODE_SWITCHED));
    }

    #[test]
    fn test_health_snapshot() {
        let (_dir, core) = create_test_core();
        core.observe("s1", "primary_user", "Sarah likes blue").unwrap();
        let health = core.health().unwrap();
        assert_eq!(health.counts.temp_pending, 1);
        assert_eq!(health.pending_sessions, vec!["s1".to_string()]);
        assert_eq!(health.mode, Mode::Primary);
    }

    #[test]
    fn test_sweeps_run_clean() {
        let (_dir, core) = create_test_core();
        core.observe("s1", "primary_user", "Sarah likes blue coffee")
            .unwrap();

        assert_eq!(core.run_consolidation_sweep().unwrap(), 1);
        let decay = core.run_decay_sweep().unwrap();
        assert!(decay.ran);
        let health = core.run_health_sweep().unwrap();
        assert_eq!(health.counts.temp_pending, 0);
    }
}
