//! # Engram Core
//!
//! Associative memory engine for local-LLM assistants. Decides, for each user
//! turn, which stored facts are relevant now, how concepts are linked and how
//! those links evolve, and how raw session observations are compressed into
//! durable, prioritized memory.
//!
//! - **Concept graph**: Hebbian link strengthening (`s' = s + (1 - s)·η`),
//!   per-day multiplicative decay with pruning, and bounded spread activation
//! - **Scoring engine**: embedding, co-occurrence, spread, and keyword signals
//!   fused into one deterministic ranking with a per-thread breakdown
//! - **Consolidation**: temp facts promoted into three verbosity tiers
//!   (brief / standard / full) with duplicate merging and conflict deferral
//! - **Context assembly**: per-thread tier gating under strict token budgets
//! - **Background runtime**: consolidation, decay, and health sweeps with
//!   bounded concurrency, error backoff, and cooperative shutdown
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{Core, CoreConfig, Mode};
//!
//! let core = Core::open(CoreConfig::default(), None)?;
//!
//! // Observe a session turn
//! core.observe("session-1", "primary_user", "Sarah likes blue coffee mugs")?;
//!
//! // Promote session observations into long-term memory
//! let report = core.consolidate("session-1")?;
//!
//! // Build the prompt context for the next turn
//! let context = core.assemble_context("what does sarah like?")?;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod consolidation;
pub mod context;
pub mod core;
pub mod embeddings;
pub mod events;
pub mod graph;
pub mod runtime;
pub mod scoring;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::{
    BudgetConfig, ConsolidationConfig, CoreConfig, DecayConfig, LoopPeriods, RuntimeConfig,
    ScoreWeights, SpreadConfig,
};

pub use storage::{
    DecayOutcome, DeferredConfirmation, DeferredStatus, EventRecord, FactRecord, FactRelevanceRow,
    HealthCounts, LinkRecord, Mode, ProfileRecord, Result, Storage, StorageError, StorageManager,
    TempFactRecord, TempFactStatus,
};

pub use graph::{
    ActivationMap, ConceptGraph, CooccurrenceOutcome, GraphError, GraphStats, GraphView,
    extract_concepts, generate_hierarchical_key,
};

pub use scoring::{
    FactCandidate, ScoreBreakdown, ScoredFact, ScoringEngine, ScoringError, ScoringOutcome,
    SignalKind, ThreadKind,
};

pub use consolidation::{ConsolidationError, ConsolidationReport, Consolidator, FactOutcome};

pub use context::{AssembledContext, ContextAssembler, ContextError, ThreadContext, Tier};

pub use runtime::{
    LoopDescriptor, LoopKind, LoopStatus, Runtime, RuntimeError, TriggerDescriptor, TriggerKind,
    TriggerStatus,
};

pub use embeddings::{CachedEmbedder, EmbeddingError, EmbeddingProvider, cosine_similarity};

pub use events::{EventBus, kind as event_kind};

pub use crate::core::{ActivationResult, Core, CoreError, HealthSnapshot};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        AssembledContext, ConceptGraph, ConsolidationReport, Core, CoreConfig, CoreError,
        EventRecord, FactCandidate, FactOutcome, FactRecord, Mode, Result, ScoredFact,
        ScoringEngine, Storage, StorageError, ThreadKind, Tier,
    };
}
