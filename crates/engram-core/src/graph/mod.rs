//! Concept Graph
//!
//! A weighted, undirected graph over normalized concept tokens. Link
//! strengths grow under Hebbian updates when concepts fire together and fade
//! under daily decay; spread activation walks the graph outward from a set of
//! seed concepts with bounded depth, threshold, and node count.
//!
//! The graph is a stateless view over storage: every operation reads and
//! writes the `links` table, and the spread working set is built from a
//! single snapshot taken at the start of the call.

mod concepts;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use concepts::{concept_hash, extract_concepts, generate_hierarchical_key, key_path_nodes};

use crate::config::{DecayConfig, SpreadConfig};
use crate::storage::{DecayOutcome, LinkRecord, Storage, StorageError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Graph error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The underlying store failed
    #[error("graph unavailable: {0}")]
    Unavailable(#[from] StorageError),
    /// Some pairs in a batch update failed; the rest were applied
    #[error("partial graph update: {} pairs failed", failed_pairs.len())]
    PartialUpdate { failed_pairs: Vec<(String, String)> },
}

/// Graph result type
pub type Result<T> = std::result::Result<T, GraphError>;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// `concept -> activation in (0, 1]`, ordered by concept id
pub type ActivationMap = BTreeMap<String, f64>;

/// Outcome of a co-occurrence batch
#[derive(Debug, Clone, Default)]
pub struct CooccurrenceOutcome {
    /// Pairs whose links fired
    pub pairs_fired: usize,
    /// Pairs skipped because the storage write failed
    pub failed_pairs: Vec<(String, String)>,
    /// True when the concept set was subsampled to the pair cap
    pub subsampled: bool,
}

impl CooccurrenceOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failed_pairs.is_empty()
    }
}

/// One node in a graph view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptNode {
    pub id: String,
    pub degree: usize,
    pub total_strength: f64,
}

/// Aggregate graph statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub concept_count: usize,
    pub link_count: usize,
    pub avg_strength: f64,
    pub max_strength: f64,
    pub total_fires: i64,
}

/// Snapshot-consistent view of the graph, capped by node count
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphView {
    pub nodes: Vec<ConceptNode>,
    pub links: Vec<LinkRecord>,
    pub stats: GraphStats,
}

// ============================================================================
// CONCEPT GRAPH
// ============================================================================

/// Concept sets larger than this are subsampled before pairwise linking to
/// bound the O(N²) fan-out.
const COOCCURRENCE_CAP: usize = 32;

/// Activation passed down from a concept to its dot-path children.
const CHILD_ACTIVATION_FACTOR: f64 = 0.8;

/// Stateless graph operations over one storage handle.
pub struct ConceptGraph {
    storage: Arc<Storage>,
    hebbian_rate: f64,
    spread: SpreadConfig,
    decay: DecayConfig,
}

impl ConceptGraph {
    pub fn new(
        storage: Arc<Storage>,
        hebbian_rate: f64,
        spread: SpreadConfig,
        decay: DecayConfig,
    ) -> Self {
        Self {
            storage,
            hebbian_rate,
            spread,
            decay,
        }
    }

    /// Canonical unordered pair: lexicographically smaller concept first.
    fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
        if a <= b { (a, b) } else { (b, a) }
    }

    /// Fire a link between two concepts with a Hebbian update
    /// (`s' = s + (1 - s)·rate`, clamped to [0, 1]). Commutative:
    /// `link(a, b)` and `link(b, a)` touch the same row. Returns the new
    /// strength.
    pub fn link(&self, a: &str, b: &str, rate: f64) -> Result<f64> {
        let (a, b) = Self::canonical_pair(a, b);
        if a == b {
            return Ok(0.0);
        }
        Ok(self.storage.fire_link(a, b, rate)?)
    }

    /// Fire a link at the configured Hebbian rate
    pub fn link_default(&self, a: &str, b: &str) -> Result<f64> {
        self.link(a, b, self.hebbian_rate)
    }

    /// Fire every unordered pair of a concept set. Sets above the pair cap
    /// are subsampled deterministically by concept hash. Pair failures are
    /// collected, not fatal.
    pub fn record_cooccurrence(&self, concepts: &[String], rate: f64) -> Result<CooccurrenceOutcome> {
        let mut unique: Vec<&str> = Vec::new();
        for c in concepts {
            if !c.is_empty() && !unique.contains(&c.as_str()) {
                unique.push(c);
            }
        }

        let mut outcome = CooccurrenceOutcome::default();
        if unique.len() > COOCCURRENCE_CAP {
            unique.sort_by(|x, y| {
                concept_hash(x)
                    .cmp(&concept_hash(y))
                    .then_with(|| x.cmp(y))
            });
            unique.truncate(COOCCURRENCE_CAP);
            outcome.subsampled = true;
        }

        for i in 0..unique.len() {
            for j in (i + 1)..unique.len() {
                match self.link(unique[i], unique[j], rate) {
                    Ok(_) => outcome.pairs_fired += 1,
                    Err(e) => {
                        tracing::warn!(
                            a = unique[i],
                            b = unique[j],
                            error = %e,
                            "co-occurrence pair failed"
                        );
                        let (a, b) = Self::canonical_pair(unique[i], unique[j]);
                        outcome.failed_pairs.push((a.to_string(), b.to_string()));
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Decay all link strengths by the configured per-day rate and prune
    /// links below the minimum. Idempotent within a UTC day.
    pub fn decay(&self) -> Result<DecayOutcome> {
        Ok(self
            .storage
            .decay_links(self.decay.rate_per_day, self.decay.min_strength)?)
    }

    /// Spread activation from seed concepts using the configured bounds.
    pub fn spread(&self, seeds: &[String]) -> Result<ActivationMap> {
        self.spread_with(
            seeds,
            self.spread.max_hops,
            self.spread.threshold,
            self.spread.limit,
        )
    }

    /// Spread activation with explicit bounds.
    ///
    /// BFS from each seed at activation 1.0; a neighbor receives
    /// `a_source · s_edge`. Concepts whose id extends an activated concept's
    /// dot path receive `0.8 · a_parent` without consuming a hop, and do not
    /// propagate further themselves. Expansion stops past `max_hops`, below
    /// `threshold`, or once `limit` concepts are activated; equal-activation
    /// ties resolve in lexicographic concept order.
    pub fn spread_with(
        &self,
        seeds: &[String],
        max_hops: u32,
        threshold: f64,
        limit: usize,
    ) -> Result<ActivationMap> {
        let mut activation = ActivationMap::new();
        if seeds.is_empty() || limit == 0 {
            return Ok(activation);
        }

        // Single snapshot of link strengths for the whole call
        let links = self.storage.all_links()?;
        let mut adjacency: BTreeMap<&str, Vec<(&str, f64)>> = BTreeMap::new();
        for link in &links {
            adjacency
                .entry(link.concept_a.as_str())
                .or_default()
                .push((link.concept_b.as_str(), link.strength));
            adjacency
                .entry(link.concept_b.as_str())
                .or_default()
                .push((link.concept_a.as_str(), link.strength));
        }
        for neighbors in adjacency.values_mut() {
            neighbors.sort_by(|x, y| x.0.cmp(y.0));
        }
        let concept_ids: Vec<&str> = adjacency.keys().copied().collect();

        // Seeds enter at 1.0, deduplicated, in lexicographic order
        let mut frontier: Vec<String> = Vec::new();
        let mut sorted_seeds: Vec<&String> = seeds.iter().collect();
        sorted_seeds.sort();
        sorted_seeds.dedup();
        for seed in sorted_seeds {
            if seed.is_empty() || activation.len() >= limit {
                break;
            }
            if !activation.contains_key(seed.as_str()) {
                activation.insert(seed.clone(), 1.0);
                frontier.push(seed.clone());
            }
        }
        Self::activate_children(&mut activation, &frontier, &concept_ids, threshold, limit);

        let mut depth = 0;
        while depth < max_hops && !frontier.is_empty() && activation.len() <= limit {
            let mut next: Vec<String> = Vec::new();
            for node in &frontier {
                let source_activation = match activation.get(node.as_str()) {
                    Some(a) => *a,
                    None => continue,
                };
                let Some(neighbors) = adjacency.get(node.as_str()) else {
                    continue;
                };
                for (neighbor, strength) in neighbors {
                    let value = source_activation * strength;
                    if value < threshold {
                        continue;
                    }
                    match activation.get(*neighbor) {
                        Some(existing) if *existing >= value => continue,
                        Some(_) => {
                            activation.insert((*neighbor).to_string(), value);
                            if !next.contains(&(*neighbor).to_string()) {
                                next.push((*neighbor).to_string());
                            }
                        }
                        None => {
                            if activation.len() >= limit {
                                continue;
                            }
                            activation.insert((*neighbor).to_string(), value);
                            next.push((*neighbor).to_string());
                        }
                    }
                }
            }
            next.sort();
            next.dedup();
            Self::activate_children(&mut activation, &next, &concept_ids, threshold, limit);
            frontier = next;
            depth += 1;
        }

        Ok(activation)
    }

    /// Hierarchical activation: dot-path children of each newly activated
    /// concept receive a fraction of the parent's activation. Children do
    /// not join the frontier.
    fn activate_children(
        activation: &mut ActivationMap,
        parents: &[String],
        concept_ids: &[&str],
        threshold: f64,
        limit: usize,
    ) {
        for parent in parents {
            let parent_activation = match activation.get(parent.as_str()) {
                Some(a) => *a,
                None => continue,
            };
            let child_value = parent_activation * CHILD_ACTIVATION_FACTOR;
            if child_value < threshold {
                continue;
            }
            let prefix = format!("{}.", parent);
            for concept in concept_ids {
                if !concept.starts_with(&prefix) {
                    continue;
                }
                match activation.get(*concept) {
                    Some(existing) if *existing >= child_value => {}
                    Some(_) => {
                        activation.insert((*concept).to_string(), child_value);
                    }
                    None if activation.len() < limit => {
                        activation.insert((*concept).to_string(), child_value);
                    }
                    None => {}
                }
            }
        }
    }

    /// Fuzzy concept lookup for UI search
    pub fn find_by_substring(&self, terms: &[String], limit: usize) -> Result<Vec<String>> {
        Ok(self.storage.find_concepts_like(terms, limit)?)
    }

    /// Index a written fact into the graph: link parent↔child along the dot
    /// path, then link the full key to concepts extracted from the value.
    /// Returns the canonical link pairs so callers can fire them inside a
    /// fact-write transaction.
    pub fn key_link_pairs(key: &str, value: &str) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let path = key_path_nodes(key);
        for window in path.windows(2) {
            let (a, b) = Self::canonical_pair(&window[0], &window[1]);
            pairs.push((a.to_string(), b.to_string()));
        }
        if let Some(full_key) = path.last() {
            for concept in extract_concepts(value) {
                if path.iter().any(|p| p == &concept) {
                    continue;
                }
                let (a, b) = Self::canonical_pair(full_key, &concept);
                pairs.push((a.to_string(), b.to_string()));
            }
        }
        pairs.sort();
        pairs.dedup();
        pairs
    }

    /// Index a fact key and value directly (outside a fact-write
    /// transaction). Returns how many links fired.
    pub fn index_key_in_graph(&self, key: &str, value: &str) -> Result<usize> {
        let pairs = Self::key_link_pairs(key, value);
        let mut fired = 0;
        let mut failed: Vec<(String, String)> = Vec::new();
        for (a, b) in &pairs {
            match self.link(a, b, self.hebbian_rate) {
                Ok(_) => fired += 1,
                Err(_) => failed.push((a.clone(), b.clone())),
            }
        }
        if !failed.is_empty() {
            return Err(GraphError::PartialUpdate {
                failed_pairs: failed,
            });
        }
        Ok(fired)
    }

    /// Remove graph references to a deleted fact's key: any path node no
    /// longer used by a remaining fact loses all its links.
    pub fn remove_key_references(&self, key: &str) -> Result<usize> {
        let mut removed = 0;
        for node in key_path_nodes(key).into_iter().rev() {
            if !self.storage.concept_in_use(&node)? {
                removed += self.storage.delete_links_touching(&node)?;
            }
        }
        Ok(removed)
    }

    /// Rebuild the link table from every stored fact. Returns the resulting
    /// link count.
    pub fn reindex(&self) -> Result<usize> {
        let facts = self.storage.all_facts()?;
        self.storage.clear_links()?;
        for fact in &facts {
            // Partial failures leave the rest of the rebuild running
            if let Err(e) = self.index_key_in_graph(&fact.key, fact.text()) {
                tracing::warn!(key = %fact.key, error = %e, "reindex: fact skipped");
            }
        }
        Ok(self.storage.count_links()? as usize)
    }

    /// Snapshot-consistent graph view capped by node count.
    pub fn view(&self, max_nodes: usize) -> Result<GraphView> {
        let links = self.storage.all_links()?;

        let mut aggregates: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
        let mut total_strength = 0.0;
        let mut max_strength = 0.0f64;
        let mut total_fires = 0i64;
        for link in &links {
            total_strength += link.strength;
            max_strength = max_strength.max(link.strength);
            total_fires += link.fire_count;
            let a = aggregates.entry(link.concept_a.as_str()).or_default();
            a.0 += 1;
            a.1 += link.strength;
            let b = aggregates.entry(link.concept_b.as_str()).or_default();
            b.0 += 1;
            b.1 += link.strength;
        }

        let stats = GraphStats {
            concept_count: aggregates.len(),
            link_count: links.len(),
            avg_strength: if links.is_empty() {
                0.0
            } else {
                total_strength / links.len() as f64
            },
            max_strength,
            total_fires,
        };

        // Strongest concepts first; ties resolve by id
        let mut nodes: Vec<ConceptNode> = aggregates
            .into_iter()
            .map(|(id, (degree, strength))| ConceptNode {
                id: id.to_string(),
                degree,
                total_strength: strength,
            })
            .collect();
        nodes.sort_by(|x, y| {
            y.total_strength
                .total_cmp(&x.total_strength)
                .then_with(|| x.id.cmp(&y.id))
        });
        nodes.truncate(max_nodes);

        let kept: std::collections::HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let links = links
            .into_iter()
            .filter(|l| kept.contains(l.concept_a.as_str()) && kept.contains(l.concept_b.as_str()))
            .collect();

        Ok(GraphView {
            nodes,
            links,
            stats,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::storage::Mode;
    use tempfile::tempdir;

    fn create_test_graph() -> (tempfile::TempDir, Arc<Storage>, ConceptGraph) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(Mode::Primary, Some(dir.path().to_path_buf())).unwrap());
        let cfg = CoreConfig::default();
        let graph = ConceptGraph::new(storage.clone(), cfg.hebbian_rate, cfg.spread, cfg.decay);
        (dir, storage, graph)
    }

    #[test]
    fn test_first_cooccurrence_creates_weak_link() {
        let (_dir, storage, graph) = create_test_graph();
        let outcome = graph
            .record_cooccurrence(&["sarah".into(), "coffee".into()], 0.1)
            .unwrap();
        assert_eq!(outcome.pairs_fired, 1);
        assert!(!outcome.is_partial());

        let link = storage.get_link("coffee", "sarah").unwrap().unwrap();
        assert!((link.strength - 0.10).abs() < 1e-9);
        assert_eq!(link.fire_count, 1);
    }

    #[test]
    fn test_link_is_commutative() {
        let (_dir, storage, graph) = create_test_graph();
        graph.link("b", "a", 0.1).unwrap();
        graph.link("a", "b", 0.1).unwrap();

        // Both orders hit the same canonical row
        let links = storage.all_links().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].concept_a, "a");
        assert_eq!(links[0].concept_b, "b");
        assert_eq!(links[0].fire_count, 2);
    }

    #[test]
    fn test_hebbian_saturation() {
        let (_dir, _storage, graph) = create_test_graph();

        let mut strength = 0.0;
        for _ in 0..10 {
            strength = graph.link("a", "b", 0.1).unwrap();
        }
        assert!((strength - 0.6513).abs() < 1e-3);

        for _ in 0..90 {
            strength = graph.link("a", "b", 0.1).unwrap();
        }
        assert!(strength > 0.99);
        assert!(strength <= 1.0);
    }

    #[test]
    fn test_link_clamp_under_extreme_rates() {
        let (_dir, _storage, graph) = create_test_graph();
        for _ in 0..5 {
            let s = graph.link("a", "b", 1.0).unwrap();
            assert!((0.0..=1.0).contains(&s));
        }
        assert_eq!(graph.link("a", "b", 1.0).unwrap(), 1.0);
    }

    #[test]
    fn test_self_link_is_ignored() {
        let (_dir, storage, graph) = create_test_graph();
        graph.link("same", "same", 0.5).unwrap();
        assert_eq!(storage.count_links().unwrap(), 0);
    }

    #[test]
    fn test_cooccurrence_subsamples_large_sets() {
        let (_dir, _storage, graph) = create_test_graph();
        let concepts: Vec<String> = (0..40).map(|i| format!("concept{:02}", i)).collect();
        let outcome = graph.record_cooccurrence(&concepts, 0.1).unwrap();
        assert!(outcome.subsampled);
        // 32 choose 2
        assert_eq!(outcome.pairs_fired, 32 * 31 / 2);

        // Deterministic: same set subsamples identically
        let again = graph.record_cooccurrence(&concepts, 0.1).unwrap();
        assert_eq!(again.pairs_fired, outcome.pairs_fired);
    }

    #[test]
    fn test_decay_curve_thirty_days() {
        let (_dir, storage, graph) = create_test_graph();
        graph.link("a", "b", 1.0).unwrap();
        storage
            .set_link_last_fired("a", "b", chrono::Utc::now() - chrono::Duration::days(30))
            .unwrap();

        let outcome = graph.decay().unwrap();
        assert!(outcome.ran);
        assert_eq!(outcome.decayed, 1);

        let link = storage.get_link("a", "b").unwrap().unwrap();
        assert!((link.strength - 0.215).abs() < 5e-3, "got {}", link.strength);
    }

    #[test]
    fn test_decay_prunes_weak_links() {
        let (_dir, storage, graph) = create_test_graph();
        graph.link("a", "b", 0.06).unwrap();
        storage
            .set_link_last_fired("a", "b", chrono::Utc::now() - chrono::Duration::days(30))
            .unwrap();

        let outcome = graph.decay().unwrap();
        assert_eq!(outcome.pruned, 1);
        assert!(storage.get_link("a", "b").unwrap().is_none());
    }

    #[test]
    fn test_decay_is_monotone() {
        let (_dir, storage, graph) = create_test_graph();
        graph.link("a", "b", 0.9).unwrap();
        storage
            .set_link_last_fired("a", "b", chrono::Utc::now() - chrono::Duration::days(3))
            .unwrap();

        let before = storage.get_link("a", "b").unwrap().unwrap().strength;
        graph.decay().unwrap();
        let after = storage.get_link("a", "b").unwrap().unwrap().strength;
        assert!(after <= before);
    }

    #[test]
    fn test_spread_two_hops() {
        let (_dir, storage, graph) = create_test_graph();
        storage.fire_link("coffee", "sarah", 0.8).unwrap();
        storage.fire_link("coffee", "morning", 0.6).unwrap();

        let map = graph.spread_with(&["sarah".into()], 2, 0.1, 50).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["sarah"], 1.0);
        assert!((map["coffee"] - 0.8).abs() < 1e-9);
        assert!((map["morning"] - 0.48).abs() < 1e-9);
    }

    #[test]
    fn test_spread_one_hop_bound() {
        let (_dir, storage, graph) = create_test_graph();
        storage.fire_link("coffee", "sarah", 0.8).unwrap();
        storage.fire_link("coffee", "morning", 0.6).unwrap();

        let map = graph.spread_with(&["sarah".into()], 1, 0.1, 50).unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("sarah"));
        assert!(map.contains_key("coffee"));
        assert!(!map.contains_key("morning"));
    }

    #[test]
    fn test_spread_threshold_cuts_weak_paths() {
        let (_dir, storage, graph) = create_test_graph();
        storage.fire_link("a", "b", 0.2).unwrap();
        storage.fire_link("b", "c", 0.2).unwrap();

        // b enters at 0.2; c would be 0.04, below the 0.1 threshold
        let map = graph.spread_with(&["a".into()], 3, 0.1, 50).unwrap();
        assert!(map.contains_key("b"));
        assert!(!map.contains_key("c"));
    }

    #[test]
    fn test_spread_limit_caps_node_count() {
        let (_dir, storage, graph) = create_test_graph();
        for i in 0..10 {
            storage.fire_link("hub", &format!("leaf{}", i), 0.9).unwrap();
        }

        let map = graph.spread_with(&["hub".into()], 1, 0.1, 4).unwrap();
        assert_eq!(map.len(), 4);
        // Lexicographic tie-break keeps the smallest ids
        assert!(map.contains_key("hub"));
        assert!(map.contains_key("leaf0"));
        assert!(map.contains_key("leaf1"));
        assert!(map.contains_key("leaf2"));
    }

    #[test]
    fn test_spread_activates_hierarchical_children() {
        let (_dir, storage, graph) = create_test_graph();
        storage.fire_link("sarah", "sarah.likes", 0.9).unwrap();
        storage.fire_link("sarah.likes", "sarah.likes.blue", 0.9).unwrap();

        let map = graph.spread_with(&["sarah".into()], 0, 0.1, 50).unwrap();
        // No hops taken, but children along the dot path still light up
        assert_eq!(map["sarah"], 1.0);
        assert!((map["sarah.likes"] - 0.8).abs() < 1e-9);
        assert!((map["sarah.likes.blue"] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_index_key_links_path_and_value() {
        let (_dir, storage, graph) = create_test_graph();
        graph
            .index_key_in_graph("sarah.likes.blue", "Sarah likes blue mugs")
            .unwrap();

        // Path edges
        assert!(storage.get_link("sarah", "sarah.likes").unwrap().is_some());
        assert!(storage
            .get_link("sarah.likes", "sarah.likes.blue")
            .unwrap()
            .is_some());
        // Value concept edge (concepts already on the path are skipped)
        assert!(storage.get_link("mugs", "sarah.likes.blue").unwrap().is_some());
    }

    #[test]
    fn test_reindex_rebuilds_from_facts() {
        let (_dir, storage, graph) = create_test_graph();
        storage.ensure_profile("primary_user", "user").unwrap();
        let now = chrono::Utc::now();
        storage
            .upsert_fact(&crate::storage::FactRecord {
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

        // Pollute the graph, then rebuild
        storage.fire_link("stale", "junk", 0.9).unwrap();
        let count = graph.reindex().unwrap();
        assert!(count > 0);
        assert!(storage.get_link("junk", "stale").unwrap().is_none());
        assert!(storage.get_link("sarah", "sarah.likes").unwrap().is_some());
    }

    #[test]
    fn test_remove_key_references() {
        let (_dir, storage, graph) = create_test_graph();
        storage.ensure_profile("primary_user", "user").unwrap();
        graph
            .index_key_in_graph("sarah.likes.blue", "Sarah likes blue")
            .unwrap();

        // Fact was never stored, so nothing keeps the path alive
        let removed = graph.remove_key_references("sarah.likes.blue").unwrap();
        assert!(removed > 0);
        assert!(storage.get_link("sarah", "sarah.likes").unwrap().is_none());
    }

    #[test]
    fn test_view_caps_nodes_and_reports_stats() {
        let (_dir, storage, graph) = create_test_graph();
        storage.fire_link("a", "b", 0.9).unwrap();
        storage.fire_link("b", "c", 0.5).unwrap();
        storage.fire_link("c", "d", 0.1).unwrap();

        let view = graph.view(2).unwrap();
        assert_eq!(view.nodes.len(), 2);
        assert_eq!(view.stats.link_count, 3);
        assert_eq!(view.stats.concept_count, 4);
        assert!(view.stats.avg_strength > 0.0);
        // Only links between kept nodes survive the cap
        for link in &view.links {
            assert!(view.nodes.iter().any(|n| n.id == link.concept_a));
            assert!(view.nodes.iter().any(|n| n.id == link.concept_b));
        }
    }
}
