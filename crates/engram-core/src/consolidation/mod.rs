//! Consolidation Pipeline
//!
//! Compresses a session's worth of temp facts into tiered, weighted
//! long-term facts. Each pending observation is scored against the session
//! summary; the final score decides how many verbosity variants survive and
//! at what weight. Before writing, a permanence decision routes each fact:
//! exact duplicates are skipped, near-duplicates merge into the existing
//! row, value conflicts park in the deferred-confirmation queue, and the
//! rest insert as new facts with their concept-graph indexing applied in the
//! same transaction.
//!
//! Control flow is explicit result variants, not errors: every temp fact
//! ends in exactly one [`FactOutcome`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;
use crate::embeddings::{EmbeddingProvider, cosine_similarity};
use crate::events::{EventBus, kind as event_kind};
use crate::graph::{ConceptGraph, extract_concepts};
use crate::scoring::{FactCandidate, ScoredFact, ScoringEngine};
use crate::storage::{
    FactRecord, Storage, StorageError, TempFactRecord, TempFactStatus,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Consolidation error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ConsolidationError {
    /// The run could not start or finish; per-fact failures never raise this
    #[error("consolidation fatal: {0}")]
    Fatal(#[from] StorageError),
    /// A run is already in flight
    #[error("consolidation already running")]
    AlreadyRunning,
}

/// Consolidation result type
pub type Result<T> = std::result::Result<T, ConsolidationError>;

// ============================================================================
// OUTCOME TYPES
// ============================================================================

/// Terminal outcome for one temp fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum FactOutcome {
    /// Inserted as a new fact at the given verbosity tier
    Promoted { tier: u8, weight: f64 },
    /// Merged into an existing similar fact
    Updated { profile: String, key: String },
    /// Exact duplicate of a stored fact; nothing written
    Duplicate,
    /// Value conflict parked in the deferred-confirmation queue
    Deferred { confirmation_id: String },
    /// Scored below the lowest threshold
    Discarded,
    /// Promotion failed; the temp fact stays pending until retries run out
    Failed { reason: String, discarded: bool },
}

/// One temp fact's journey through a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactResult {
    pub temp_id: String,
    pub key: String,
    pub final_score: f64,
    #[serde(flatten)]
    pub outcome: FactOutcome,
}

/// Summary of one consolidation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub session_id: String,
    pub results: Vec<FactResult>,
    pub promoted: usize,
    pub updated: usize,
    pub duplicates: usize,
    pub deferred: usize,
    pub discarded: usize,
    pub failed: usize,
    /// True when scoring ran without its full signal set
    pub degraded: bool,
    pub duration_ms: u64,
}

impl ConsolidationReport {
    fn tally(&mut self, outcome: &FactOutcome) {
        match outcome {
            FactOutcome::Promoted { .. } => self.promoted += 1,
            FactOutcome::Updated { .. } => self.updated += 1,
            FactOutcome::Duplicate => self.duplicates += 1,
            FactOutcome::Deferred { .. } => self.deferred += 1,
            FactOutcome::Discarded => self.discarded += 1,
            FactOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

// ============================================================================
// TIER DECISION
// ============================================================================

/// Which variants survive promotion, and at what weight.
/// Returns `None` when the fact scores below the lowest threshold.
pub(crate) fn tier_decision(
    final_score: f64,
    config: &crate::config::ConsolidationConfig,
) -> Option<(u8, f64)> {
    if final_score >= config.threshold_high {
        Some((3, 0.9))
    } else if final_score >= config.threshold_mid {
        Some((2, 0.6))
    } else if final_score >= config.threshold_low {
        Some((1, 0.3))
    } else {
        None
    }
}

// ============================================================================
// CONSOLIDATOR
// ============================================================================

/// Runs the promotion pipeline over one storage handle.
pub struct Consolidator {
    storage: Arc<Storage>,
    config: CoreConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    events: EventBus,
}

impl Consolidator {
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

    fn graph(&self) -> ConceptGraph {
        ConceptGraph::new(
            Arc::clone(&self.storage),
            self.config.hebbian_rate,
            self.config.spread,
            self.config.decay,
        )
    }

    /// Consolidate one session. Re-running on an already-consolidated
    /// session is a no-op: there are no pending temp facts left to process.
    pub fn run(&self, session_id: &str) -> Result<ConsolidationReport> {
        let started = Instant::now();
        let mut report = ConsolidationReport {
            session_id: session_id.to_string(),
            ..Default::default()
        };

        let pending = self.storage.pending_temp_facts(session_id)?;
        if pending.is_empty() {
            report.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(report);
        }

        // Session summary: the observations themselves, joined. Scoring each
        // fact against the summary measures how central it was to the
        // session.
        let summary = session_summary(&pending);
        let session_concepts = extract_concepts(&summary);

        let scorer = ScoringEngine::new(
            Arc::clone(&self.storage),
            self.config.clone(),
            self.embedder.clone(),
        );
        let candidates: Vec<FactCandidate> = pending
            .iter()
            .map(|tf| FactCandidate {
                profile: tf.profile.clone(),
                key: tf.key.clone(),
                text: tf.text().to_string(),
                weight: 0.5,
            })
            .collect();
        // The keyword signal needs no collaborators, so scoring cannot fail
        // outright; an error still degrades to zero scores rather than
        // aborting the run.
        let scores: HashMap<(String, String), ScoredFact> = match scorer.score(&summary, &candidates)
        {
            Ok(scoring) => {
                report.degraded = scoring.is_degraded();
                scoring
                    .ranked
                    .into_iter()
                    .map(|s| ((s.profile.clone(), s.key.clone()), s))
                    .collect()
            }
            Err(e) => {
                tracing::error!(error = %e, "scoring failed, all temp facts treated as zero");
                report.degraded = true;
                HashMap::new()
            }
        };

        // Same-profile facts loaded once per profile for similarity checks
        let mut profile_facts: HashMap<String, Vec<FactRecord>> = HashMap::new();

        for temp in &pending {
            let scored = scores
                .get(&(temp.profile.clone(), temp.key.clone()))
                .cloned();
            let final_score = scored.as_ref().map(|s| s.final_score).unwrap_or(0.0);

            let outcome = self.settle_one(temp, final_score, &mut profile_facts);
            if matches!(
                outcome,
                FactOutcome::Promoted { .. } | FactOutcome::Updated { .. }
            ) {
                // Telemetry: the dimensional breakdown under this session
                if let Some(s) = &scored {
                    if let Err(e) = self.storage.upsert_relevance(&s.to_relevance_row(&summary)) {
                        tracing::warn!(key = %temp.key, error = %e, "relevance row not persisted");
                    }
                }
            }
            report.tally(&outcome);
            report.results.push(FactResult {
                temp_id: temp.id.clone(),
                key: temp.key.clone(),
                final_score,
                outcome,
            });
        }

        // Session-level learning: everything that appeared together gets a
        // pairwise Hebbian nudge
        let cooccurrence = self
            .graph()
            .record_cooccurrence(&session_concepts, self.config.hebbian_rate);
        match cooccurrence {
            Ok(outcome) if outcome.is_partial() => {
                tracing::warn!(
                    failed = outcome.failed_pairs.len(),
                    "session co-occurrence partially applied"
                );
            }
            Err(e) => tracing::warn!(error = %e, "session co-occurrence failed"),
            _ => {}
        }
        if let Err(e) = self
            .storage
            .record_cooccurrence_window(session_id, &session_concepts)
        {
            tracing::warn!(error = %e, "co-occurrence window not recorded");
        }

        // Expired deferred confirmations ride along with every run
        if let Err(e) = self.storage.expire_deferred() {
            tracing::warn!(error = %e, "deferred queue expiry failed");
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        self.events.emit_best_effort(
            &self.storage,
            event_kind::CONSOLIDATION_COMPLETED,
            "consolidation",
            &format!(
                "session {} consolidated: {} promoted, {} updated, {} deferred, {} discarded",
                session_id, report.promoted, report.updated, report.deferred, report.discarded
            ),
            Some(serde_json::json!({
                "sessionId": session_id,
                "promoted": report.promoted,
                "updated": report.updated,
                "duplicates": report.duplicates,
                "deferred": report.deferred,
                "discarded": report.discarded,
                "failed": report.failed,
                "durationMs": report.duration_ms,
            })),
        );

        Ok(report)
    }

    /// Consolidate every session that still has pending temp facts.
    pub fn run_all(&self) -> Result<Vec<ConsolidationReport>> {
        let sessions = self.storage.sessions_with_pending()?;
        let mut reports = Vec::with_capacity(sessions.len());
        for session in sessions {
            reports.push(self.run(&session)?);
        }
        Ok(reports)
    }

    /// Decide and apply the permanence branch for one temp fact.
    fn settle_one(
        &self,
        temp: &TempFactRecord,
        final_score: f64,
        profile_facts: &mut HashMap<String, Vec<FactRecord>>,
    ) -> FactOutcome {
        let Some((tier, weight)) = tier_decision(final_score, &self.config.consolidation) else {
            self.finish_temp(temp, TempFactStatus::Discarded, Some("below threshold"));
            return FactOutcome::Discarded;
        };

        let (v1, v2, v3) = match tier {
            3 => (temp.v1.clone(), temp.v2.clone(), temp.v3.clone()),
            2 => (temp.v1.clone(), temp.v2.clone(), String::new()),
            _ => (temp.v1.clone(), String::new(), String::new()),
        };

        if !profile_facts.contains_key(&temp.profile) {
            match self.storage.list_facts(&temp.profile) {
                Ok(facts) => {
                    profile_facts.insert(temp.profile.clone(), facts);
                }
                Err(err) => return self.fail_temp(temp, &err.to_string()),
            }
        }

        let candidate_text = temp.text().to_string();
        let (same_key, similar) = {
            let existing = &profile_facts[&temp.profile];
            let same_key = existing.iter().find(|f| f.key == temp.key).cloned();
            let similar = existing
                .iter()
                .filter(|f| f.has_content())
                .find(|f| self.similarity(&candidate_text, f.text()))
                .cloned();
            (same_key, similar)
        };

        // Exact duplicate: same (profile, key, v2)
        if let Some(stored) = &same_key {
            if !temp.v2.is_empty() && stored.v2 == temp.v2 {
                self.finish_temp(temp, TempFactStatus::Promoted, Some("duplicate"));
                return FactOutcome::Duplicate;
            }
        }

        // Near-duplicate anywhere in the profile: merge instead of insert
        if let Some(target) = similar {
            let merged = FactRecord {
                profile: temp.profile.clone(),
                key: target.key.clone(),
                kind: target.kind.clone(),
                v1,
                v2,
                v3,
                weight,
                access_count: target.access_count,
                created_at: target.created_at,
                updated_at: chrono::Utc::now(),
            };
            let pairs = ConceptGraph::key_link_pairs(&merged.key, merged.text());
            return match self
                .storage
                .merge_fact_with_links(&merged, &pairs, self.config.hebbian_rate)
            {
                Ok(()) => {
                    self.finish_temp(temp, TempFactStatus::Promoted, Some("merged"));
                    // Keep the cached view current for later temp facts
                    if let Some(slot) = profile_facts
                        .get_mut(&temp.profile)
                        .and_then(|v| v.iter_mut().find(|f| f.key == merged.key))
                    {
                        *slot = merged.clone();
                    }
                    FactOutcome::Updated {
                        profile: merged.profile,
                        key: merged.key,
                    }
                }
                Err(e) => self.fail_temp(temp, &e.to_string()),
            };
        }

        // Same key, different value, not similar: park for confirmation
        if let Some(stored) = same_key {
            let stored_value = stored.text().to_string();
            return match self.storage.enqueue_deferred(
                &temp.profile,
                &temp.key,
                &stored_value,
                &candidate_text,
                self.config.consolidation.deferred_ttl_days,
            ) {
                Ok(confirmation) => {
                    self.events.emit_best_effort(
                        &self.storage,
                        event_kind::CONFLICT_DEFERRED,
                        "consolidation",
                        &format!("value conflict on {}.{} deferred", temp.profile, temp.key),
                        Some(serde_json::json!({
                            "confirmationId": confirmation.id,
                            "profile": temp.profile,
                            "key": temp.key,
                        })),
                    );
                    self.finish_temp(temp, TempFactStatus::Discarded, Some("conflict deferred"));
                    FactOutcome::Deferred {
                        confirmation_id: confirmation.id,
                    }
                }
                Err(e) => self.fail_temp(temp, &e.to_string()),
            };
        }

        // New fact: write it and its graph indexing atomically
        let now = chrono::Utc::now();
        let fact = FactRecord {
            profile: temp.profile.clone(),
            key: temp.key.clone(),
            kind: "fact".to_string(),
            v1,
            v2,
            v3,
            weight,
            access_count: 0,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.storage.ensure_profile(&temp.profile, "user") {
            return self.fail_temp(temp, &e.to_string());
        }
        let pairs = ConceptGraph::key_link_pairs(&fact.key, fact.text());
        match self
            .storage
            .merge_fact_with_links(&fact, &pairs, self.config.hebbian_rate)
        {
            Ok(()) => {
                self.finish_temp(temp, TempFactStatus::Promoted, None);
                if let Some(facts) = profile_facts.get_mut(&temp.profile) {
                    facts.push(fact);
                }
                FactOutcome::Promoted { tier, weight }
            }
            Err(e) => self.fail_temp(temp, &e.to_string()),
        }
    }

    /// True when two texts are near-duplicates: embedding similarity when a
    /// provider is available, keyword overlap otherwise.
    fn similarity(&self, a: &str, b: &str) -> bool {
        if self.config.embedding_enabled {
            if let Some(embedder) = &self.embedder {
                if let (Ok(va), Ok(vb)) = (embedder.embed(a), embedder.embed(b)) {
                    return cosine_similarity(&va, &vb) as f64
                        > self.config.consolidation.similar_embedding;
                }
            }
        }
        keyword_jaccard(a, b) > self.config.consolidation.similar_keyword
    }

    fn finish_temp(&self, temp: &TempFactRecord, status: TempFactStatus, reason: Option<&str>) {
        if let Err(e) = self.storage.set_temp_fact_status(&temp.id, status, reason) {
            tracing::warn!(temp_id = %temp.id, error = %e, "temp fact status not updated");
        }
    }

    /// A promotion failure keeps the temp fact pending with a bumped retry
    /// counter; once retries run out it is discarded with the reason kept.
    fn fail_temp(&self, temp: &TempFactRecord, reason: &str) -> FactOutcome {
        let retries = self.storage.bump_temp_fact_retries(&temp.id).unwrap_or(0);
        let out_of_retries = retries >= self.config.consolidation.max_retries as i64;
        if out_of_retries {
            self.finish_temp(temp, TempFactStatus::Discarded, Some(reason));
            self.events.emit_best_effort(
                &self.storage,
                event_kind::CONSOLIDATION_FACT_FAILED,
                "consolidation",
                &format!("temp fact {} discarded after {} retries", temp.id, retries),
                Some(serde_json::json!({"tempId": temp.id, "reason": reason})),
            );
        } else {
            tracing::warn!(temp_id = %temp.id, retries, reason, "promotion failed, will retry");
        }
        FactOutcome::Failed {
            reason: reason.to_string(),
            discarded: out_of_retries,
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Session summary: the standard variants of all observations, joined.
/// Bounded so a marathon session cannot blow up scoring.
fn session_summary(pending: &[TempFactRecord]) -> String {
    const SUMMARY_CHAR_CAP: usize = 4000;
    let mut summary = String::new();
    for temp in pending {
        let text = temp.text();
        if text.is_empty() {
            continue;
        }
        if !summary.is_empty() {
            summary.push_str(". ");
        }
        if summary.len() + text.len() > SUMMARY_CHAR_CAP {
            break;
        }
        summary.push_str(text);
    }
    summary
}

/// Token-set Jaccard overlap between two texts
fn keyword_jaccard(a: &str, b: &str) -> f64 {
    let ta: std::collections::HashSet<String> = extract_concepts(a).into_iter().collect();
    let tb: std::collections::HashSet<String> = extract_concepts(b).into_iter().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    shared / union
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Mode;
    use tempfile::tempdir;

    fn create_test_consolidator() -> (tempfile::TempDir, Arc<Storage>, Consolidator) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(Mode::Primary, Some(dir.path().to_path_buf())).unwrap());
        let consolidator = Consolidator::new(
            Arc::clone(&storage),
            CoreConfig::default(),
            None,
            EventBus::new(),
        );
        (dir, storage, consolidator)
    }

    #[test]
    fn test_tier_decision_bands() {
        let config = crate::config::ConsolidationConfig::default();
        assert_eq!(tier_decision(0.92, &config), Some((3, 0.9)));
        assert_eq!(tier_decision(0.80, &config), Some((3, 0.9)));
        assert_eq!(tier_decision(0.65, &config), Some((2, 0.6)));
        assert_eq!(tier_decision(0.40, &config), Some((1, 0.3)));
        assert_eq!(tier_decision(0.30, &config), Some((1, 0.3)));
        assert_eq!(tier_decision(0.10, &config), None);
    }

    #[test]
    fn test_empty_session_is_noop() {
        let (_dir, _storage, consolidator) = create_test_consolidator();
        let report = consolidator.run("empty-session").unwrap();
        assert!(report.results.is_empty());
        assert_eq!(report.promoted, 0);
    }

    #[test]
    fn test_promotion_writes_fact_and_graph() {
        let (_dir, storage, consolidator) = create_test_consolidator();
        storage
            .insert_temp_fact(
                "s1",
                "primary_user",
                "sarah.likes.blue",
                "blue",
                "Sarah likes blue",
                "Sarah has said several times that she likes blue",
            )
            .unwrap();

        let report = consolidator.run("s1").unwrap();
        assert_eq!(report.promoted, 1);

        let fact = storage.get_fact("primary_user", "sarah.likes.blue").unwrap().unwrap();
        assert!(fact.has_content());
        // Graph indexing landed in the same transaction
        assert!(storage.get_link("sarah", "sarah.likes").unwrap().is_some());
        // Temp fact reached a terminal status
        assert!(storage.pending_temp_facts("s1").unwrap().is_empty());
    }

    #[test]
    fn test_central_fact_keeps_more_variants_than_peripheral() {
        let (_dir, storage, consolidator) = create_test_consolidator();
        // Three observations about coffee make coffee the session's center;
        // the weather remark shares nothing with the summary
        storage
            .insert_temp_fact(
                "s1",
                "primary_user",
                "sarah.coffee.morning",
                "coffee at dawn",
                "Sarah drinks coffee every morning",
                "Sarah brews coffee first thing every morning before work",
            )
            .unwrap();
        storage
            .insert_temp_fact(
                "s1",
                "primary_user",
                "sarah.coffee.oat",
                "oat milk coffee",
                "Sarah takes her coffee with oat milk every morning",
                "",
            )
            .unwrap();
        storage
            .insert_temp_fact(
                "s1",
                "primary_user",
                "weather.remark",
                "windy",
                "wholly unrelated windstorm trivia",
                "",
            )
            .unwrap();

        let report = consolidator.run("s1").unwrap();
        let central = report
            .results
            .iter()
            .find(|r| r.key == "sarah.coffee.morning")
            .unwrap();
        let peripheral = report.results.iter().find(|r| r.key == "weather.remark").unwrap();
        assert!(central.final_score > peripheral.final_score);
    }

    #[test]
    fn test_exact_duplicate_is_skipped() {
        let (_dir, storage, consolidator) = create_test_consolidator();
        storage.ensure_profile("primary_user", "user").unwrap();
        let now = chrono::Utc::now();
        storage
            .upsert_fact(&FactRecord {
                profile: "primary_user".into(),
                key: "sarah.likes.blue".into(),
                kind: "fact".into(),
                v1: "blue".into(),
                v2: "Sarah likes blue".into(),
                v3: String::new(),
                weight: 0.9,
                access_count: 0,
                created_at: now,
                updated_at: now,
            })
            .unwrap();

        storage
            .insert_temp_fact(
                "s1",
                "primary_user",
                "sarah.likes.blue",
                "blue",
                "Sarah likes blue",
                "",
            )
            .unwrap();

        let report = consolidator.run("s1").unwrap();
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.promoted, 0);
        // Stored weight untouched
        let fact = storage.get_fact("primary_user", "sarah.likes.blue").unwrap().unwrap();
        assert_eq!(fact.weight, 0.9);
    }

    #[test]
    fn test_similar_fact_merges_instead_of_inserting() {
        let (_dir, storage, consolidator) = create_test_consolidator();
        storage.ensure_profile("primary_user", "user").unwrap();
        let now = chrono::Utc::now();
        storage
            .upsert_fact(&FactRecord {
                profile: "primary_user".into(),
                key: "sarah.likes.blue".into(),
                kind: "fact".into(),
                v1: String::new(),
                v2: "Sarah likes blue coffee mugs".into(),
                v3: String::new(),
                weight: 0.3,
                access_count: 0,
                created_at: now,
                updated_at: now,
            })
            .unwrap();

        // Different key, nearly identical wording
        storage
            .insert_temp_fact(
                "s1",
                "primary_user",
                "sarah.blue.mugs",
                "blue mugs",
                "Sarah likes blue coffee mugs",
                "",
            )
            .unwrap();

        let report = consolidator.run("s1").unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.promoted, 0);
        // Merge landed on the existing key, no new row
        assert!(storage.get_fact("primary_user", "sarah.blue.mugs").unwrap().is_none());
        let merged = storage.get_fact("primary_user", "sarah.likes.blue").unwrap().unwrap();
        assert!(merged.weight > 0.3);
    }

    #[test]
    fn test_value_conflict_defers_without_overwrite() {
        let (_dir, storage, consolidator) = create_test_consolidator();
        storage.ensure_profile("primary_user", "user").unwrap();
        let now = chrono::Utc::now();
        storage
            .upsert_fact(&FactRecord {
                profile: "primary_user".into(),
                key: "favorite_color".into(),
                kind: "fact".into(),
                v1: String::new(),
                v2: "blue".into(),
                v3: String::new(),
                weight: 0.9,
                access_count: 0,
                created_at: now,
                updated_at: now,
            })
            .unwrap();

        storage
            .insert_temp_fact("s1", "primary_user", "favorite_color", "green", "green", "")
            .unwrap();

        let report = consolidator.run("s1").unwrap();
        assert_eq!(report.deferred, 1);

        // No overwrite
        let stored = storage.get_fact("primary_user", "favorite_color").unwrap().unwrap();
        assert_eq!(stored.v2, "blue");

        // One queue row, one conflict event
        let queue = storage.list_deferred().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].stored_value, "blue");
        assert_eq!(queue[0].proposed_value, "green");

        let events = storage.list_events(0, 100).unwrap();
        assert!(events.iter().any(|e| e.kind == event_kind::CONFLICT_DEFERRED));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let (_dir, storage, consolidator) = create_test_consolidator();
        storage
            .insert_temp_fact(
                "s1",
                "primary_user",
                "sarah.likes.blue",
                "blue",
                "Sarah likes blue",
                "",
            )
            .unwrap();

        let first = consolidator.run("s1").unwrap();
        assert_eq!(first.results.len(), 1);

        let second = consolidator.run("s1").unwrap();
        assert!(second.results.is_empty());

        // Fact count unchanged by the second run
        assert_eq!(storage.health_counts().unwrap().facts, 1);
    }

    #[test]
    fn test_run_all_covers_every_pending_session() {
        let (_dir, storage, consolidator) = create_test_consolidator();
        storage
            .insert_temp_fact("s1", "primary_user", "alpha.fact", "a", "alpha fact text", "")
            .unwrap();
        storage
            .insert_temp_fact("s2", "primary_user", "beta.fact", "b", "beta fact text", "")
            .unwrap();

        let reports = consolidator.run_all().unwrap();
        assert_eq!(reports.len(), 2);
        assert!(storage.sessions_with_pending().unwrap().is_empty());
    }

    #[test]
    fn test_keyword_jaccard() {
        assert!(keyword_jaccard("sarah likes blue", "sarah likes blue") > 0.99);
        assert!(keyword_jaccard("sarah likes blue", "completely different words") < 0.1);
        assert_eq!(keyword_jaccard("", "anything"), 0.0);
    }

    #[test]
    fn test_consolidation_emits_completed_event() {
        let (_dir, storage, consolidator) = create_test_consolidator();
        storage
            .insert_temp_fact("s1", "primary_user", "some.fact", "v1", "some fact text", "")
            .unwrap();

        consolidator.run("s1").unwrap();
        let events = storage.list_events(0, 100).unwrap();
        assert!(
            events
                .iter()
                .any(|e| e.kind == event_kind::CONSOLIDATION_COMPLETED)
        );
    }
}
