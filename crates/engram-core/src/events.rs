//! Event log and live event broadcast.
//!
//! Every notable operation appends one row to the append-only `events` table
//! and mirrors it onto a tokio broadcast channel so connected UIs see it
//! live. Ids come from the store and are strictly increasing within a
//! process.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::storage::{EventRecord, Result, Storage};

/// Well-known event kinds
pub mod kind {
    pub const CONSOLIDATION_COMPLETED: &str = "consolidation.completed";
    pub const CONSOLIDATION_FACT_FAILED: &str = "consolidation.fact_failed";
    pub const CONFLICT_DEFERRED: &str = "conflict.deferred";
    pub const CONFLICT_RESOLVED: &str = "conflict.resolved";
    pub const CONTEXT_THREAD_DEGRADED: &str = "context.thread_degraded";
    pub const GRAPH_STRENGTHENED: &str = "graph.strengthened";
    pub const GRAPH_REINDEXED: &str = "graph.reindexed";
    pub const GRAPH_DECAYED: &str = "graph.decayed";
    pub const LOOP_ERROR: &str = "loop.error";
    pub const LOOP_DISABLED: &str = "loop.disabled";
    pub const LOOP_ENABLED: &str = "loop.enabled";
    pub const TRIGGER_FIRED: &str = "trigger.fired";
    pub const MODE_SWITCHED: &str = "storage.mode_switched";
}

/// Broadcast channel capacity: how many events can buffer before slow
/// subscribers start missing them.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Persists events and fans them out to live subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventRecord>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Append to the durable log, then broadcast. Broadcast failures (no
    /// subscribers) are not errors.
    pub fn emit(
        &self,
        storage: &Arc<Storage>,
        kind: &str,
        source: &str,
        message: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<EventRecord> {
        let record = storage.append_event(kind, source, message, payload.as_ref())?;
        let _ = self.tx.send(record.clone());
        Ok(record)
    }

    /// Like [`EventBus::emit`] but never fails the caller: a storage error is
    /// logged and swallowed. Used on paths where event emission must not mask
    /// the primary outcome.
    pub fn emit_best_effort(
        &self,
        storage: &Arc<Storage>,
        kind: &str,
        source: &str,
        message: &str,
        payload: Option<serde_json::Value>,
    ) {
        if let Err(e) = self.emit(storage, kind, source, message, payload) {
            tracing::warn!(kind, error = %e, "failed to persist event");
        }
    }

    /// New receiver for the live stream
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
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

    #[test]
    fn test_emit_persists_and_broadcasts() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(Mode::Primary, Some(dir.path().to_path_buf())).unwrap());
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let ev = bus
            .emit(
                &storage,
                kind::CONSOLIDATION_COMPLETED,
                "consolidation",
                "session s1 consolidated",
                Some(serde_json::json!({"promoted": 2})),
            )
            .unwrap();
        assert!(ev.id > 0);

        let live = rx.try_recv().unwrap();
        assert_eq!(live.id, ev.id);
        assert_eq!(live.kind, kind::CONSOLIDATION_COMPLETED);

        let stored = storage.list_events(0, 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].payload, Some(serde_json::json!({"promoted": 2})));
    }
}
