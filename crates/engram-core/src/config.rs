//! Core configuration
//!
//! Every tunable the engine recognizes, with the documented defaults.
//! The struct is plain serde data so hosts can load it from a JSON file and
//! override individual sections; anything omitted falls back to the default.

use serde::{Deserialize, Serialize};

use crate::storage::Mode;

/// Top-level configuration for the linking core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    /// Which database file the core opens at startup
    pub storage_mode: Mode,
    /// Whether an embedding provider is wired in
    pub embedding_enabled: bool,
    /// Hebbian learning rate η applied on every link firing
    pub hebbian_rate: f64,
    pub decay: DecayConfig,
    pub spread: SpreadConfig,
    pub score: ScoreWeights,
    pub consolidation: ConsolidationConfig,
    pub budget: BudgetConfig,
    pub runtime: RuntimeConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            storage_mode: Mode::Primary,
            embedding_enabled: false,
            hebbian_rate: 0.10,
            decay: DecayConfig::default(),
            spread: SpreadConfig::default(),
            score: ScoreWeights::default(),
            consolidation: ConsolidationConfig::default(),
            budget: BudgetConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Temporal decay of link strengths.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecayConfig {
    /// Multiplicative shrinkage per idle day
    pub rate_per_day: f64,
    /// Links below this strength are pruned after decay
    pub min_strength: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            rate_per_day: 0.95,
            min_strength: 0.05,
        }
    }
}

/// Bounded spread activation over the concept graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpreadConfig {
    /// Maximum BFS depth from any seed
    pub max_hops: u32,
    /// Activations below this are not recorded
    pub threshold: f64,
    /// Hard cap on activated concepts per call
    pub limit: usize,
}

impl Default for SpreadConfig {
    fn default() -> Self {
        Self {
            max_hops: 1,
            threshold: 0.10,
            limit: 50,
        }
    }
}

/// Signal weights for the fact scorer.
///
/// The keyword weight is additive on top of the three blended signals; the
/// final score is clipped to [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreWeights {
    pub embedding: f64,
    pub cooccurrence: f64,
    pub spread: f64,
    pub keyword: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            embedding: 0.50,
            cooccurrence: 0.30,
            spread: 0.20,
            keyword: 0.10,
        }
    }
}

/// Consolidation thresholds and permanence knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsolidationConfig {
    /// Final score at or above which all three verbosity variants are kept
    pub threshold_high: f64,
    /// Final score at or above which v1 + v2 are kept
    pub threshold_mid: f64,
    /// Final score at or above which v1 alone is kept
    pub threshold_low: f64,
    /// Embedding similarity above which an existing fact is updated in place
    pub similar_embedding: f64,
    /// Keyword overlap above which an existing fact is updated in place
    pub similar_keyword: f64,
    /// Per-fact promotion retries before the temp fact is discarded
    pub max_retries: u32,
    /// Days a deferred confirmation stays alive before expiring
    pub deferred_ttl_days: i64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            threshold_high: 0.80,
            threshold_mid: 0.50,
            threshold_low: 0.30,
            similar_embedding: 0.92,
            similar_keyword: 0.8,
            max_retries: 3,
            deferred_ttl_days: 7,
        }
    }
}

/// Per-tier token budgets for context assembly.
///
/// Tokens are whitespace tokens, not model tokens; the budgets are
/// approximate by construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BudgetConfig {
    pub l1_tokens: usize,
    pub l2_tokens: usize,
    pub l3_tokens: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            l1_tokens: 10,
            l2_tokens: 50,
            l3_tokens: 200,
        }
    }
}

/// Background runtime tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Bounded worker pool for storage I/O dispatched off the event loop
    pub worker_pool: usize,
    /// How long shutdown waits for in-flight handlers before giving up
    pub shutdown_grace_ms: u64,
    pub loop_periods: LoopPeriods,
    /// Seconds a loop sleeps after a failed handler invocation
    pub error_cooldown_secs: u64,
    /// Consecutive failures before a loop disables itself
    pub max_consecutive_errors: u32,
    /// Maximum rows retained in the event log (older rows pruned by health sweep)
    pub event_log_cap: i64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_pool: 4,
            shutdown_grace_ms: 5000,
            loop_periods: LoopPeriods::default(),
            error_cooldown_secs: 30,
            max_consecutive_errors: 5,
            event_log_cap: 10_000,
        }
    }
}

/// Periods for the three built-in loops, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoopPeriods {
    pub consolidation_secs: u64,
    pub decay_secs: u64,
    pub health_secs: u64,
}

impl Default for LoopPeriods {
    fn default() -> Self {
        Self {
            consolidation_secs: 300,
            decay_secs: 86_400,
            health_secs: 60,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_defaults() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.hebbian_rate, 0.10);
        assert_eq!(cfg.decay.rate_per_day, 0.95);
        assert_eq!(cfg.decay.min_strength, 0.05);
        assert_eq!(cfg.spread.max_hops, 1);
        assert_eq!(cfg.spread.limit, 50);
        assert_eq!(cfg.score.embedding, 0.50);
        assert_eq!(cfg.consolidation.threshold_high, 0.80);
        assert_eq!(cfg.budget.l3_tokens, 200);
        assert_eq!(cfg.runtime.worker_pool, 4);
        assert_eq!(cfg.runtime.loop_periods.consolidation_secs, 300);
    }

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let cfg: CoreConfig =
            serde_json::from_str(r#"{"hebbianRate": 0.2, "spread": {"maxHops": 3}}"#).unwrap();
        assert_eq!(cfg.hebbian_rate, 0.2);
        assert_eq!(cfg.spread.max_hops, 3);
        // Untouched sections keep their defaults
        assert_eq!(cfg.spread.threshold, 0.10);
        assert_eq!(cfg.decay.rate_per_day, 0.95);
    }
}
