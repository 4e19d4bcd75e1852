//! Scoring Engine
//!
//! Ranks candidate facts against a query by fusing up to four signals:
//! embedding cosine similarity, concept-link co-occurrence, spread
//! activation, and IDF-weighted keyword overlap. Alongside the final score,
//! every fact gets a per-thread dimensional breakdown that consolidation
//! persists as telemetry.
//!
//! The output is fully deterministic for a fixed (query, candidates, graph
//! snapshot, embedding cache, config); ties resolve by higher weight, then
//! lower key.

mod lexicon;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use lexicon::{ThreadKind, lexicon_overlap};

use crate::config::CoreConfig;
use crate::embeddings::{EmbeddingProvider, cosine_similarity};
use crate::graph::{ConceptGraph, extract_concepts, key_path_nodes};
use crate::storage::{FactRelevanceRow, Storage};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Scoring error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    /// No signal produced any score. Unreachable in practice: keyword
    /// overlap needs no collaborators.
    #[error("no scoring signal available")]
    Failed,
}

/// Scoring result type
pub type Result<T> = std::result::Result<T, ScoringError>;

// ============================================================================
// TYPES
// ============================================================================

/// A fact offered to the scorer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactCandidate {
    pub profile: String,
    pub key: String,
    pub text: String,
    pub weight: f64,
}

/// The individual signals that feed the final score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Embedding,
    Cooccurrence,
    Spread,
    Keyword,
}

/// Per-signal and per-thread scores for one fact
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub embedding: f64,
    pub cooccurrence: f64,
    pub spread: f64,
    pub keyword: f64,
    pub identity: f64,
    pub log: f64,
    pub form: f64,
    pub philosophy: f64,
    pub reflex: f64,
}

/// A ranked fact with its final score and breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredFact {
    pub profile: String,
    pub key: String,
    pub weight: f64,
    pub final_score: f64,
    pub breakdown: ScoreBreakdown,
}

impl ScoredFact {
    /// Project into the telemetry row persisted by consolidation
    pub fn to_relevance_row(&self, query_context: &str) -> FactRelevanceRow {
        FactRelevanceRow {
            profile: self.profile.clone(),
            key: self.key.clone(),
            query_context: query_context.to_string(),
            identity: self.breakdown.identity,
            log: self.breakdown.log,
            form: self.breakdown.form,
            philosophy: self.breakdown.philosophy,
            reflex: self.breakdown.reflex,
            cooccurrence: self.breakdown.cooccurrence,
            embedding: self.breakdown.embedding,
            spread: self.breakdown.spread,
            keyword: self.breakdown.keyword,
            final_score: self.final_score,
            scored_at: chrono::Utc::now(),
        }
    }
}

/// Ranking plus degradation flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringOutcome {
    pub ranked: Vec<ScoredFact>,
    /// Signals that were unavailable for this call
    pub missing_signals: Vec<SignalKind>,
}

impl ScoringOutcome {
    /// True when at least one signal was unavailable
    pub fn is_degraded(&self) -> bool {
        !self.missing_signals.is_empty()
    }
}

// ============================================================================
// SCORING ENGINE
// ============================================================================

/// Stateless scorer over one storage handle. The activation working set is
/// built per call and never shared.
pub struct ScoringEngine {
    storage: Arc<Storage>,
    config: CoreConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl ScoringEngine {
    pub fn new(
        storage: Arc<Storage>,
        config: CoreConfig,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self {
            storage,
            config,
            embedder,
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

    /// Rank `candidates` against `query`. Always returns a ranking; missing
    /// collaborators degrade individual signals instead of failing the call.
    pub fn score(&self, query: &str, candidates: &[FactCandidate]) -> Result<ScoringOutcome> {
        let mut missing: Vec<SignalKind> = Vec::new();
        let query_concepts = extract_concepts(query);

        // One graph snapshot per call: link strengths for co-occurrence plus
        // a spread activation map from the query concepts.
        let link_strengths: HashMap<(String, String), f64> = match self.storage.all_links() {
            Ok(links) => links
                .into_iter()
                .map(|l| ((l.concept_a, l.concept_b), l.strength))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "link snapshot unavailable, co-occurrence degraded");
                missing.push(SignalKind::Cooccurrence);
                HashMap::new()
            }
        };
        let spread_map = match self.graph().spread(&query_concepts) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(error = %e, "spread activation unavailable, degraded");
                missing.push(SignalKind::Spread);
                Default::default()
            }
        };

        // Embedding availability is decided once per call and stays
        // consistent for every candidate.
        let query_vector = match (&self.embedder, self.config.embedding_enabled) {
            (Some(embedder), true) => match embedder.embed(query) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(error = %e, "query embedding failed, renormalizing weights");
                    missing.push(SignalKind::Embedding);
                    None
                }
            },
            _ => None,
        };
        let embeddings_configured = self.embedder.is_some() && self.config.embedding_enabled;

        let idf = build_idf(candidates);

        let mut ranked: Vec<ScoredFact> = candidates
            .iter()
            .map(|fact| {
                self.score_one(
                    fact,
                    &query_concepts,
                    &link_strengths,
                    &spread_map,
                    query_vector.as_deref(),
                    embeddings_configured,
                    &idf,
                )
            })
            .collect();

        // Deterministic ordering: final desc, weight desc, key asc
        ranked.sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then_with(|| b.weight.total_cmp(&a.weight))
                .then_with(|| a.key.cmp(&b.key))
        });

        Ok(ScoringOutcome {
            ranked,
            missing_signals: missing,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn score_one(
        &self,
        fact: &FactCandidate,
        query_concepts: &[String],
        link_strengths: &HashMap<(String, String), f64>,
        spread_map: &crate::graph::ActivationMap,
        query_vector: Option<&[f32]>,
        embeddings_configured: bool,
        idf: &HashMap<String, f64>,
    ) -> ScoredFact {
        let key_concepts = extract_concepts(&fact.key);
        let fact_tokens = fact_tokens(fact);

        // Co-occurrence: summed link strength between query concepts and key
        // concepts, normalized by query concept count
        let cooccurrence = if query_concepts.is_empty() {
            0.0
        } else {
            let mut total = 0.0;
            for qc in query_concepts {
                for fc in &key_concepts {
                    let pair = if qc <= fc {
                        (qc.clone(), fc.clone())
                    } else {
                        (fc.clone(), qc.clone())
                    };
                    total += link_strengths.get(&pair).copied().unwrap_or(0.0);
                }
            }
            (total / query_concepts.len() as f64).clamp(0.0, 1.0)
        };

        // Spread: best activation reached by any node of the fact's key path
        let spread = key_concepts
            .iter()
            .chain(key_path_nodes(&fact.key).iter())
            .filter_map(|c| spread_map.get(c.as_str()))
            .fold(0.0f64, |acc, a| acc.max(*a));

        // Embedding: cosine similarity, negative similarity floors at zero
        let embedding = match query_vector {
            Some(qv) => match self.embedder.as_ref().map(|e| e.embed(&fact.text)) {
                Some(Ok(fv)) => (cosine_similarity(qv, &fv) as f64).clamp(0.0, 1.0),
                _ => 0.0,
            },
            None => 0.0,
        };

        let keyword = keyword_overlap(query_concepts, &fact_tokens, idf);

        let weights = &self.config.score;
        let final_score = if !embeddings_configured {
            // Fallback blend: keyword carries the whole score
            keyword
        } else if query_vector.is_none() {
            // Provider failed: renormalize the blended weights across the
            // remaining signals, keyword stays additive
            let blended = weights.cooccurrence + weights.spread;
            let (wc, ws) = if blended > 0.0 {
                (weights.cooccurrence / blended, weights.spread / blended)
            } else {
                (0.5, 0.5)
            };
            (cooccurrence * wc + spread * ws + keyword * weights.keyword).clamp(0.0, 1.0)
        } else {
            (embedding * weights.embedding
                + cooccurrence * weights.cooccurrence
                + spread * weights.spread
                + keyword * weights.keyword)
                .clamp(0.0, 1.0)
        };

        // Per-thread dimensions: the keyword base colored by each thread's
        // lexicon. Telemetry only; the final score ignores them.
        let dim = |kind: ThreadKind| -> f64 {
            (0.6 * keyword + 0.4 * lexicon_overlap(&fact_tokens, kind.lexicon())).clamp(0.0, 1.0)
        };

        ScoredFact {
            profile: fact.profile.clone(),
            key: fact.key.clone(),
            weight: fact.weight,
            final_score,
            breakdown: ScoreBreakdown {
                embedding,
                cooccurrence,
                spread,
                keyword,
                identity: dim(ThreadKind::Identity),
                log: dim(ThreadKind::Log),
                form: dim(ThreadKind::Form),
                philosophy: dim(ThreadKind::Philosophy),
                reflex: dim(ThreadKind::Reflex),
            },
        }
    }
}

// ============================================================================
// KEYWORD SIGNAL
// ============================================================================

fn fact_tokens(fact: &FactCandidate) -> Vec<String> {
    let mut tokens = extract_concepts(&fact.text);
    for t in extract_concepts(&fact.key) {
        if !tokens.contains(&t) {
            tokens.push(t);
        }
    }
    tokens
}

/// Document frequencies over the candidate set, turned into mild IDF
/// weights: `ln(1 + N / (1 + df))`.
fn build_idf(candidates: &[FactCandidate]) -> HashMap<String, f64> {
    let n = candidates.len().max(1) as f64;
    let mut df: HashMap<String, usize> = HashMap::new();
    for fact in candidates {
        let unique: HashSet<String> = fact_tokens(fact).into_iter().collect();
        for token in unique {
            *df.entry(token).or_default() += 1;
        }
    }
    df.into_iter()
        .map(|(token, count)| (token, (1.0 + n / (1.0 + count as f64)).ln()))
        .collect()
}

/// IDF-weighted token overlap between the query and one fact, in [0, 1].
/// Tokens unseen in the candidate set get a neutral weight of 1.0.
fn keyword_overlap(
    query_tokens: &[String],
    fact_tokens: &[String],
    idf: &HashMap<String, f64>,
) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let fact_set: HashSet<&str> = fact_tokens.iter().map(String::as_str).collect();
    let mut shared = 0.0;
    let mut total = 0.0;
    for token in query_tokens {
        let weight = idf.get(token).copied().unwrap_or(1.0);
        total += weight;
        if fact_set.contains(token.as_str()) {
            shared += weight;
        }
    }
    if total == 0.0 {
        0.0
    } else {
        (shared / total).clamp(0.0, 1.0)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::{FailingEmbedder, HashEmbedder};
    use crate::storage::Mode;
    use tempfile::tempdir;

    fn create_test_engine(
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> (tempfile::TempDir, Arc<Storage>, ScoringEngine) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(Mode::Primary, Some(dir.path().to_path_buf())).unwrap());
        let mut config = CoreConfig::default();
        config.embedding_enabled = embedder.is_some();
        config.spread.max_hops = 2;
        let engine = ScoringEngine::new(Arc::clone(&storage), config, embedder);
        (dir, storage, engine)
    }

    fn candidate(key: &str, text: &str) -> FactCandidate {
        FactCandidate {
            profile: "primary_user".to_string(),
            key: key.to_string(),
            text: text.to_string(),
            weight: 0.5,
        }
    }

    #[test]
    fn test_keyword_fallback_ranks_overlapping_fact_first() {
        let (_dir, _storage, engine) = create_test_engine(None);
        let facts = vec![
            candidate("weather.rain", "It rained all of last week"),
            candidate("sarah.likes.blue", "Sarah likes blue coffee mugs"),
        ];

        let outcome = engine.score("what does sarah like", &facts).unwrap();
        assert_eq!(outcome.ranked[0].key, "sarah.likes.blue");
        assert!(outcome.ranked[0].final_score > outcome.ranked[1].final_score);
        // Disabled embeddings are a normal mode, not degradation
        assert!(!outcome.is_degraded());
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let (_dir, storage, engine) = create_test_engine(None);
        storage.fire_link("coffee", "sarah", 0.8).unwrap();

        let facts = vec![
            candidate("sarah.coffee", "Sarah drinks coffee every morning"),
            candidate("sarah.tea", "Sarah drinks tea at night"),
            candidate("coffee.shop", "The coffee shop on main street"),
        ];

        let first = engine.score("sarah coffee habits", &facts).unwrap();
        let second = engine.score("sarah coffee habits", &facts).unwrap();
        let keys_a: Vec<&str> = first.ranked.iter().map(|f| f.key.as_str()).collect();
        let keys_b: Vec<&str> = second.ranked.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys_a, keys_b);
        for (a, b) in first.ranked.iter().zip(second.ranked.iter()) {
            assert_eq!(a.final_score, b.final_score);
        }
    }

    #[test]
    fn test_ties_break_by_weight_then_key() {
        let (_dir, _storage, engine) = create_test_engine(None);
        let mut heavy = candidate("zeta.fact", "completely unrelated text");
        heavy.weight = 0.9;
        let light = candidate("alpha.fact", "equally unrelated words");

        // Neither fact overlaps the query, so both score 0.0
        let outcome = engine.score("quantum chromodynamics", &[light, heavy]).unwrap();
        assert_eq!(outcome.ranked[0].key, "zeta.fact");
        assert_eq!(outcome.ranked[1].key, "alpha.fact");

        let mut same_weight_a = candidate("beta.fact", "nothing shared here");
        same_weight_a.weight = 0.5;
        let mut same_weight_b = candidate("alpha.fact", "nothing shared here");
        same_weight_b.weight = 0.5;
        let outcome = engine
            .score("quantum chromodynamics", &[same_weight_a, same_weight_b])
            .unwrap();
        assert_eq!(outcome.ranked[0].key, "alpha.fact");
    }

    #[test]
    fn test_cooccurrence_signal_uses_links() {
        let (_dir, storage, engine) = create_test_engine(None);
        storage.fire_link("blue", "sarah", 0.9).unwrap();

        let facts = vec![
            candidate("sarah.likes.blue", "a preference"),
            candidate("weather.rain", "a preference"),
        ];
        let outcome = engine.score("sarah", &facts).unwrap();
        let linked = outcome.ranked.iter().find(|f| f.key == "sarah.likes.blue").unwrap();
        let unlinked = outcome.ranked.iter().find(|f| f.key == "weather.rain").unwrap();
        assert!(linked.breakdown.cooccurrence > 0.0);
        assert_eq!(unlinked.breakdown.cooccurrence, 0.0);
    }

    #[test]
    fn test_spread_signal_reaches_indirect_facts() {
        let (_dir, storage, engine) = create_test_engine(None);
        storage.fire_link("coffee", "sarah", 0.8).unwrap();
        storage.fire_link("coffee", "morning", 0.6).unwrap();

        let facts = vec![candidate("morning.routine", "the morning routine")];
        let outcome = engine.score("sarah", &facts).unwrap();
        // sarah -> coffee (0.8) -> morning (0.48)
        assert!((outcome.ranked[0].breakdown.spread - 0.48).abs() < 1e-9);
    }

    #[test]
    fn test_embedding_signal_contributes() {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new());
        let (_dir, _storage, engine) = create_test_engine(Some(embedder));

        let facts = vec![
            candidate("sarah.likes.blue", "sarah likes blue"),
            candidate("other.fact", "unrelated content entirely"),
        ];
        let outcome = engine.score("sarah likes blue", &facts).unwrap();
        assert!(!outcome.is_degraded());
        let top = &outcome.ranked[0];
        assert_eq!(top.key, "sarah.likes.blue");
        assert!(top.breakdown.embedding > 0.9);
    }

    #[test]
    fn test_failed_provider_degrades_and_renormalizes() {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FailingEmbedder);
        let (_dir, storage, engine) = create_test_engine(Some(embedder));
        storage.fire_link("blue", "sarah", 0.9).unwrap();

        let facts = vec![candidate("sarah.likes.blue", "sarah likes blue")];
        let outcome = engine.score("sarah blue", &facts).unwrap();
        assert!(outcome.is_degraded());
        assert!(outcome.missing_signals.contains(&SignalKind::Embedding));
        // Ranking still happens on the remaining signals
        assert!(outcome.ranked[0].final_score > 0.0);
        assert_eq!(outcome.ranked[0].breakdown.embedding, 0.0);
    }

    #[test]
    fn test_breakdown_thread_dimensions() {
        let (_dir, _storage, engine) = create_test_engine(None);
        let facts = vec![candidate(
            "style.response",
            "keep answers brief and casual in tone",
        )];
        let outcome = engine.score("response style", &facts).unwrap();
        let b = outcome.ranked[0].breakdown;
        // Style vocabulary pushes the form dimension above identity
        assert!(b.form > b.identity);
    }

    #[test]
    fn test_relevance_row_projection() {
        let (_dir, _storage, engine) = create_test_engine(None);
        let facts = vec![candidate("sarah.likes.blue", "Sarah likes blue")];
        let outcome = engine.score("sarah", &facts).unwrap();
        let row = outcome.ranked[0].to_relevance_row("sarah");
        assert_eq!(row.key, "sarah.likes.blue");
        assert_eq!(row.final_score, outcome.ranked[0].final_score);
        assert_eq!(row.query_context, "sarah");
    }
}
