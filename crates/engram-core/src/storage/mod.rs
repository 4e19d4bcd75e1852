//! Storage Module
//!
//! Embedded SQLite storage layer with:
//! - Primary / demo database files selectable at open time
//! - Single-writer, pooled-reader connection discipline
//! - Idempotent versioned migrations
//! - Busy/corrupt classification with bounded-wait retries

mod manager;
mod migrations;
mod sqlite;

pub use manager::StorageManager;
pub use migrations::MIGRATIONS;
pub use sqlite::{
    DecayOutcome, DeferredConfirmation, DeferredStatus, EventRecord, FactRecord, FactRelevanceRow,
    HealthCounts, LinkRecord, Mode, ProfileRecord, Result, Storage, StorageError, TempFactRecord,
    TempFactStatus,
};
