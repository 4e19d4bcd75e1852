//! Database Migrations
//!
//! Schema migration definitions for the storage layer.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: profiles, facts, links, temp facts, events",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Relevance telemetry, co-occurrence windows, deferred confirmations",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Graph metadata and loop state for the background runtime",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL
);
INSERT INTO schema_version (version, applied_at)
SELECT 0, datetime('now')
WHERE NOT EXISTS (SELECT 1 FROM schema_version);

-- Profiles group facts; deleting a profile deletes its facts
CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    profile_type TEXT NOT NULL DEFAULT 'user',
    trust_level REAL NOT NULL DEFAULT 0.5,
    context_priority INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One assertion per (profile, key); three verbosity variants
CREATE TABLE IF NOT EXISTS facts (
    profile TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'fact',
    v1 TEXT NOT NULL DEFAULT '',
    v2 TEXT NOT NULL DEFAULT '',
    v3 TEXT NOT NULL DEFAULT '',
    weight REAL NOT NULL DEFAULT 0.5,
    access_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (profile, key)
);

CREATE INDEX IF NOT EXISTS idx_facts_key ON facts(key);

-- Undirected concept links; concept_a < concept_b canonically
CREATE TABLE IF NOT EXISTS links (
    concept_a TEXT NOT NULL,
    concept_b TEXT NOT NULL,
    strength REAL NOT NULL DEFAULT 0.0,
    fire_count INTEGER NOT NULL DEFAULT 0,
    first_seen TEXT NOT NULL,
    last_fired TEXT NOT NULL,
    PRIMARY KEY (concept_a, concept_b)
);

CREATE INDEX IF NOT EXISTS idx_links_last_fired ON links(last_fired);
CREATE INDEX IF NOT EXISTS idx_links_concept_b ON links(concept_b);

-- Session observations awaiting consolidation
CREATE TABLE IF NOT EXISTS temp_facts (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    profile TEXT NOT NULL,
    key TEXT NOT NULL,
    v1 TEXT NOT NULL DEFAULT '',
    v2 TEXT NOT NULL DEFAULT '',
    v3 TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'pending',
    retries INTEGER NOT NULL DEFAULT 0,
    reason TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_temp_facts_status ON temp_facts(status, session_id);

-- Append-only event log; AUTOINCREMENT keeps ids monotonic
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    at TEXT NOT NULL,
    kind TEXT NOT NULL,
    source TEXT NOT NULL,
    message TEXT NOT NULL,
    payload TEXT
);

CREATE INDEX IF NOT EXISTS idx_events_at ON events(at);
CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);

UPDATE schema_version SET version = 1, applied_at = datetime('now');
"#;

/// V2: Scoring telemetry and the consolidation side tables
const MIGRATION_V2_UP: &str = r#"
-- Last-computed dimensional scores per fact (telemetry, not ranking input)
CREATE TABLE IF NOT EXISTS fact_relevance (
    profile TEXT NOT NULL,
    key TEXT NOT NULL,
    query_context TEXT NOT NULL DEFAULT '',
    identity REAL NOT NULL DEFAULT 0.0,
    log REAL NOT NULL DEFAULT 0.0,
    form REAL NOT NULL DEFAULT 0.0,
    philosophy REAL NOT NULL DEFAULT 0.0,
    reflex REAL NOT NULL DEFAULT 0.0,
    cooccurrence REAL NOT NULL DEFAULT 0.0,
    embedding REAL NOT NULL DEFAULT 0.0,
    spread REAL NOT NULL DEFAULT 0.0,
    keyword REAL NOT NULL DEFAULT 0.0,
    final_score REAL NOT NULL DEFAULT 0.0,
    scored_at TEXT NOT NULL,
    PRIMARY KEY (profile, key)
);

-- Which concepts appeared together inside a consolidation window
CREATE TABLE IF NOT EXISTS cooccurrence_windows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    concepts TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cooccurrence_session ON cooccurrence_windows(session_id);

-- Conflicting writes parked for user confirmation, with TTL
CREATE TABLE IF NOT EXISTS deferred_confirmations (
    id TEXT PRIMARY KEY,
    profile TEXT NOT NULL,
    key TEXT NOT NULL,
    stored_value TEXT NOT NULL,
    proposed_value TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_deferred_status ON deferred_confirmations(status, expires_at);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: Graph metadata and loop bookkeeping
const MIGRATION_V3_UP: &str = r#"
-- Small key/value store for graph-wide state (e.g. last decay day)
CREATE TABLE IF NOT EXISTS graph_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Background loop state survives restarts so a disabled loop stays disabled
CREATE TABLE IF NOT EXISTS loop_state (
    name TEXT PRIMARY KEY,
    enabled INTEGER NOT NULL DEFAULT 1,
    last_run_at TEXT,
    consecutive_errors INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_and_are_idempotent() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();

        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
        assert_eq!(
            get_current_version(&conn).unwrap(),
            MIGRATIONS.last().unwrap().version
        );

        // Re-running is a no-op
        let applied_again = apply_migrations(&conn).unwrap();
        assert_eq!(applied_again, 0);
    }

    #[test]
    fn test_versions_are_strictly_increasing() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }
}
