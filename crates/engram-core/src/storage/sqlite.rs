//! SQLite Storage Implementation
//!
//! All durable state lives here: profiles, facts, links, temp facts, events,
//! relevance telemetry, the deferred-confirmation queue, and loop bookkeeping.
//! The concept graph, scorer, and consolidator are stateless views over this
//! layer.
//!
//! Connection discipline: one writer connection and one reader connection,
//! each behind its own mutex. Every method acquires a connection inside the
//! narrowest possible scope and releases it on all exit paths; explicit
//! transactions roll back on early return.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use directories::ProjectDirs;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The store could not be opened or a lock was poisoned
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// Lock contention persisted past the bounded wait
    #[error("storage busy")]
    Busy,
    /// The database file failed integrity checks
    #[error("storage corrupt: {0}")]
    Corrupt(String),
    /// Any other database error
    #[error("database error: {0}")]
    Database(rusqlite::Error),
    /// Row not found
    #[error("not found: {0}")]
    NotFound(String),
    /// Validation failed before reaching the database
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Invalid stored timestamp
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(err, ref detail) = e {
            match err.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    return StorageError::Busy;
                }
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                    return StorageError::Corrupt(
                        detail.clone().unwrap_or_else(|| "integrity failure".into()),
                    );
                }
                _ => {}
            }
        }
        StorageError::Database(e)
    }
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// MODE
// ============================================================================

/// Which database file the store is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The real store
    #[default]
    Primary,
    /// A throwaway store for demos and experiments
    Demo,
}

impl Mode {
    /// File name for this mode's database
    pub fn db_file_name(&self) -> &'static str {
        match self {
            Mode::Primary => "engram.db",
            Mode::Demo => "engram-demo.db",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Primary => "primary",
            Mode::Demo => "demo",
        }
    }

    /// Parse from string name; unknown names fall back to primary
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "demo" => Mode::Demo,
            _ => Mode::Primary,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RECORD TYPES
// ============================================================================

/// A profile groups facts under one subject
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub id: String,
    pub profile_type: String,
    pub trust_level: f64,
    pub context_priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single stored assertion with three verbosity variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactRecord {
    pub profile: String,
    /// Dot-separated concept path, e.g. `sarah.likes.blue`
    pub key: String,
    pub kind: String,
    /// Brief variant (~10 tokens)
    pub v1: String,
    /// Standard variant (~50 tokens)
    pub v2: String,
    /// Full variant (~200 tokens)
    pub v3: String,
    pub weight: f64,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FactRecord {
    /// The richest non-empty variant
    pub fn text(&self) -> &str {
        if !self.v3.is_empty() {
            &self.v3
        } else if !self.v2.is_empty() {
            &self.v2
        } else {
            &self.v1
        }
    }

    /// At least one variant must be non-empty
    pub fn has_content(&self) -> bool {
        !self.v1.is_empty() || !self.v2.is_empty() || !self.v3.is_empty()
    }
}

/// An undirected weighted edge between two concepts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRecord {
    pub concept_a: String,
    pub concept_b: String,
    pub strength: f64,
    pub fire_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_fired: DateTime<Utc>,
}

/// Lifecycle status of a temp fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempFactStatus {
    Pending,
    Promoted,
    Discarded,
}

impl TempFactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TempFactStatus::Pending => "pending",
            TempFactStatus::Promoted => "promoted",
            TempFactStatus::Discarded => "discarded",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "promoted" => TempFactStatus::Promoted,
            "discarded" => TempFactStatus::Discarded,
            _ => TempFactStatus::Pending,
        }
    }
}

/// A short-lived observation extracted from a conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempFactRecord {
    pub id: String,
    pub session_id: String,
    pub profile: String,
    pub key: String,
    pub v1: String,
    pub v2: String,
    pub v3: String,
    pub status: TempFactStatus,
    pub retries: i64,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TempFactRecord {
    /// The richest non-empty variant
    pub fn text(&self) -> &str {
        if !self.v3.is_empty() {
            &self.v3
        } else if !self.v2.is_empty() {
            &self.v2
        } else {
            &self.v1
        }
    }
}

/// Status of a deferred confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeferredStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl DeferredStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeferredStatus::Pending => "pending",
            DeferredStatus::Accepted => "accepted",
            DeferredStatus::Rejected => "rejected",
            DeferredStatus::Expired => "expired",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "accepted" => DeferredStatus::Accepted,
            "rejected" => DeferredStatus::Rejected,
            "expired" => DeferredStatus::Expired,
            _ => DeferredStatus::Pending,
        }
    }
}

/// A conflicting write parked for user confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredConfirmation {
    pub id: String,
    pub profile: String,
    pub key: String,
    pub stored_value: String,
    pub proposed_value: String,
    pub status: DeferredStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A record in the append-only event log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: i64,
    pub at: DateTime<Utc>,
    pub kind: String,
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Last-computed dimensional scores for a fact under some query context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactRelevanceRow {
    pub profile: String,
    pub key: String,
    pub query_context: String,
    pub identity: f64,
    pub log: f64,
    pub form: f64,
    pub philosophy: f64,
    pub reflex: f64,
    pub cooccurrence: f64,
    pub embedding: f64,
    pub spread: f64,
    pub keyword: f64,
    pub final_score: f64,
    pub scored_at: DateTime<Utc>,
}

/// Result of a decay sweep
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayOutcome {
    pub decayed: usize,
    pub pruned: usize,
    /// False when the sweep already ran today and nothing changed
    pub ran: bool,
}

/// Aggregate store counts for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCounts {
    pub profiles: i64,
    pub facts: i64,
    pub links: i64,
    pub temp_pending: i64,
    pub temp_promoted: i64,
    pub temp_discarded: i64,
    pub deferred_pending: i64,
    pub events: i64,
    pub avg_link_strength: f64,
}

// ============================================================================
// STORAGE
// ============================================================================

const GRAPH_META_LAST_DECAY_DAY: &str = "last_decay_day";

/// Embedded SQLite store bound to one mode's database file.
///
/// All methods take `&self`; the writer and reader connections live behind
/// mutexes so `Arc<Storage>` is `Send + Sync`.
pub struct Storage {
    mode: Mode,
    path: PathBuf,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Storage {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -32000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open the store for `mode`, creating the data directory and schema as
    /// needed. `data_dir` overrides the platform default location.
    pub fn open(mode: Mode, data_dir: Option<PathBuf>) -> Result<Self> {
        let dir = match data_dir {
            Some(d) => d,
            None => {
                let proj_dirs = ProjectDirs::from("ai", "engram", "engram").ok_or_else(|| {
                    StorageError::Unavailable("could not determine project directories".to_string())
                })?;
                proj_dirs.data_dir().to_path_buf()
            }
        };
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(mode.db_file_name());

        let writer_conn = Connection::open(&path).map_err(|e| match StorageError::from(e) {
            StorageError::Database(inner) => {
                StorageError::Unavailable(format!("cannot open {}: {}", path.display(), inner))
            }
            other => other,
        })?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        tracing::info!(mode = %mode, path = %path.display(), "storage opened");

        Ok(Self {
            mode,
            path,
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    /// Which mode this store is bound to
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Path of the database file
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Run `f` with the writer connection. The connection is released on all
    /// exit paths.
    fn write<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .writer
            .lock()
            .map_err(|_| StorageError::Unavailable("writer lock poisoned".into()))?;
        f(&mut conn)
    }

    /// Run `f` with the reader connection.
    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .reader
            .lock()
            .map_err(|_| StorageError::Unavailable("reader lock poisoned".into()))?;
        f(&conn)
    }

    // ========================================================================
    // PROFILES
    // ========================================================================

    /// Insert or update a profile
    pub fn upsert_profile(&self, id: &str, profile_type: &str, trust_level: f64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.write(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, profile_type, trust_level, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     profile_type = excluded.profile_type,
                     trust_level = excluded.trust_level,
                     updated_at = excluded.updated_at",
                params![id, profile_type, trust_level, now],
            )?;
            Ok(())
        })
    }

    /// Create the profile if it does not exist yet, leaving an existing row
    /// untouched.
    pub fn ensure_profile(&self, id: &str, profile_type: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.write(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO profiles (id, profile_type, trust_level, created_at, updated_at)
                 VALUES (?1, ?2, 0.5, ?3, ?3)",
                params![id, profile_type, now],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRecord>> {
        self.read(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, profile_type, trust_level, context_priority, created_at, updated_at
                     FROM profiles WHERE id = ?1",
                    params![id],
                    Self::row_to_profile,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// List profiles, optionally filtered by type
    pub fn list_profiles(&self, profile_type: Option<&str>) -> Result<Vec<ProfileRecord>> {
        self.read(|conn| {
            let mut out = Vec::new();
            match profile_type {
                Some(t) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, profile_type, trust_level, context_priority, created_at, updated_at
                         FROM profiles WHERE profile_type = ?1 ORDER BY id",
                    )?;
                    let rows = stmt.query_map(params![t], Self::row_to_profile)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, profile_type, trust_level, context_priority, created_at, updated_at
                         FROM profiles ORDER BY id",
                    )?;
                    let rows = stmt.query_map([], Self::row_to_profile)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
            }
            Ok(out)
        })
    }

    /// Delete a profile and, via cascade, all its facts
    pub fn delete_profile(&self, id: &str) -> Result<bool> {
        self.write(|conn| {
            let n = conn.execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
    }

    fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRecord> {
        Ok(ProfileRecord {
            id: row.get(0)?,
            profile_type: row.get(1)?,
            trust_level: row.get(2)?,
            context_priority: row.get(3)?,
            created_at: parse_ts_sql(row.get::<_, String>(4)?, 4)?,
            updated_at: parse_ts_sql(row.get::<_, String>(5)?, 5)?,
        })
    }

    // ========================================================================
    // FACTS
    // ========================================================================

    /// Insert or replace a fact. Replace semantics: incoming variants win.
    pub fn upsert_fact(&self, fact: &FactRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.write(|conn| {
            conn.execute(
                "INSERT INTO facts (profile, key, kind, v1, v2, v3, weight, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(profile, key) DO UPDATE SET
                     kind = excluded.kind,
                     v1 = excluded.v1,
                     v2 = excluded.v2,
                     v3 = excluded.v3,
                     weight = excluded.weight,
                     updated_at = excluded.updated_at",
                params![
                    fact.profile,
                    fact.key,
                    fact.kind,
                    fact.v1,
                    fact.v2,
                    fact.v3,
                    fact.weight,
                    now
                ],
            )?;
            Ok(())
        })
    }

    /// Merge a fact into an existing row: non-empty incoming variants win,
    /// empty ones keep the stored text, and the weight takes the max.
    pub fn merge_fact(&self, fact: &FactRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.write(|conn| {
            conn.execute(
                "INSERT INTO facts (profile, key, kind, v1, v2, v3, weight, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(profile, key) DO UPDATE SET
                     v1 = CASE WHEN excluded.v1 != '' THEN excluded.v1 ELSE facts.v1 END,
                     v2 = CASE WHEN excluded.v2 != '' THEN excluded.v2 ELSE facts.v2 END,
                     v3 = CASE WHEN excluded.v3 != '' THEN excluded.v3 ELSE facts.v3 END,
                     weight = MAX(facts.weight, excluded.weight),
                     updated_at = excluded.updated_at",
                params![
                    fact.profile,
                    fact.key,
                    fact.kind,
                    fact.v1,
                    fact.v2,
                    fact.v3,
                    fact.weight,
                    now
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_fact(&self, profile: &str, key: &str) -> Result<Option<FactRecord>> {
        self.read(|conn| {
            let row = conn
                .query_row(
                    "SELECT profile, key, kind, v1, v2, v3, weight, access_count, created_at, updated_at
                     FROM facts WHERE profile = ?1 AND key = ?2",
                    params![profile, key],
                    Self::row_to_fact,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// All facts belonging to one profile, ordered by key
    pub fn list_facts(&self, profile: &str) -> Result<Vec<FactRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT profile, key, kind, v1, v2, v3, weight, access_count, created_at, updated_at
                 FROM facts WHERE profile = ?1 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![profile], Self::row_to_fact)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Every fact in the store, ordered by (profile, key)
    pub fn all_facts(&self) -> Result<Vec<FactRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT profile, key, kind, v1, v2, v3, weight, access_count, created_at, updated_at
                 FROM facts ORDER BY profile, key",
            )?;
            let rows = stmt.query_map([], Self::row_to_fact)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Facts whose profile type is one of `types`, ordered by (profile, key)
    pub fn facts_by_profile_types(&self, types: &[&str]) -> Result<Vec<FactRecord>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=types.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT f.profile, f.key, f.kind, f.v1, f.v2, f.v3, f.weight, f.access_count,
                    f.created_at, f.updated_at
             FROM facts f JOIN profiles p ON p.id = f.profile
             WHERE p.profile_type IN ({})
             ORDER BY f.profile, f.key",
            placeholders
        );
        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(types.iter()), Self::row_to_fact)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Bump the access counter of a fact
    pub fn touch_fact(&self, profile: &str, key: &str) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "UPDATE facts SET access_count = access_count + 1 WHERE profile = ?1 AND key = ?2",
                params![profile, key],
            )?;
            Ok(())
        })
    }

    pub fn delete_fact(&self, profile: &str, key: &str) -> Result<bool> {
        self.write(|conn| {
            let n = conn.execute(
                "DELETE FROM facts WHERE profile = ?1 AND key = ?2",
                params![profile, key],
            )?;
            Ok(n > 0)
        })
    }

    /// True if some other fact's key path still passes through `concept`
    pub fn concept_in_use(&self, concept: &str) -> Result<bool> {
        let prefix = format!("{}.%", concept);
        self.read(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM facts WHERE key = ?1 OR key LIKE ?2",
                params![concept, prefix],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// Atomically write a promoted fact and fire its graph links in one
    /// transaction. The fact and its indexing are observed together or not
    /// at all.
    pub fn merge_fact_with_links(
        &self,
        fact: &FactRecord,
        link_pairs: &[(String, String)],
        rate: f64,
    ) -> Result<()> {
        let now = Utc::now();
        let now_s = now.to_rfc3339();
        self.write(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO facts (profile, key, kind, v1, v2, v3, weight, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(profile, key) DO UPDATE SET
                     v1 = CASE WHEN excluded.v1 != '' THEN excluded.v1 ELSE facts.v1 END,
                     v2 = CASE WHEN excluded.v2 != '' THEN excluded.v2 ELSE facts.v2 END,
                     v3 = CASE WHEN excluded.v3 != '' THEN excluded.v3 ELSE facts.v3 END,
                     weight = MAX(facts.weight, excluded.weight),
                     updated_at = excluded.updated_at",
                params![
                    fact.profile,
                    fact.key,
                    fact.kind,
                    fact.v1,
                    fact.v2,
                    fact.v3,
                    fact.weight,
                    now_s
                ],
            )?;
            for (a, b) in link_pairs {
                Self::fire_link_tx(&tx, a, b, rate, now)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<FactRecord> {
        Ok(FactRecord {
            profile: row.get(0)?,
            key: row.get(1)?,
            kind: row.get(2)?,
            v1: row.get(3)?,
            v2: row.get(4)?,
            v3: row.get(5)?,
            weight: row.get(6)?,
            access_count: row.get(7)?,
            created_at: parse_ts_sql(row.get::<_, String>(8)?, 8)?,
            updated_at: parse_ts_sql(row.get::<_, String>(9)?, 9)?,
        })
    }

    // ========================================================================
    // LINKS
    // ========================================================================

    /// Hebbian update inside a held transaction: `s' = s + (1 - s)·rate`,
    /// clamped to [0, 1]. Pair order is canonicalized by the caller.
    fn fire_link_tx(
        tx: &rusqlite::Transaction<'_>,
        a: &str,
        b: &str,
        rate: f64,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        let now_s = now.to_rfc3339();
        let current: Option<f64> = tx
            .query_row(
                "SELECT strength FROM links WHERE concept_a = ?1 AND concept_b = ?2",
                params![a, b],
                |row| row.get(0),
            )
            .optional()?;
        let new_strength = match current {
            Some(s) => (s + (1.0 - s) * rate).clamp(0.0, 1.0),
            None => rate.clamp(0.0, 1.0),
        };
        tx.execute(
            "INSERT INTO links (concept_a, concept_b, strength, fire_count, first_seen, last_fired)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)
             ON CONFLICT(concept_a, concept_b) DO UPDATE SET
                 strength = ?3,
                 fire_count = links.fire_count + 1,
                 last_fired = ?4",
            params![a, b, new_strength, now_s],
        )?;
        Ok(new_strength)
    }

    /// Fire one link with a Hebbian update. Returns the new strength.
    /// Concurrent calls on the same pair are serialized by the writer lock.
    pub fn fire_link(&self, a: &str, b: &str, rate: f64) -> Result<f64> {
        let now = Utc::now();
        self.write(|conn| {
            let tx = conn.transaction()?;
            let s = Self::fire_link_tx(&tx, a, b, rate, now)?;
            tx.commit()?;
            Ok(s)
        })
    }

    /// Apply a bounded delta to a link's strength, creating it if absent.
    /// Returns the clamped new strength.
    pub fn adjust_link(&self, a: &str, b: &str, delta: f64) -> Result<f64> {
        let now_s = Utc::now().to_rfc3339();
        self.write(|conn| {
            let tx = conn.transaction()?;
            let current: Option<f64> = tx
                .query_row(
                    "SELECT strength FROM links WHERE concept_a = ?1 AND concept_b = ?2",
                    params![a, b],
                    |row| row.get(0),
                )
                .optional()?;
            let new_strength = (current.unwrap_or(0.0) + delta).clamp(0.0, 1.0);
            tx.execute(
                "INSERT INTO links (concept_a, concept_b, strength, fire_count, first_seen, last_fired)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)
                 ON CONFLICT(concept_a, concept_b) DO UPDATE SET
                     strength = ?3,
                     last_fired = ?4",
                params![a, b, new_strength, now_s],
            )?;
            tx.commit()?;
            Ok(new_strength)
        })
    }

    pub fn get_link(&self, a: &str, b: &str) -> Result<Option<LinkRecord>> {
        self.read(|conn| {
            let row = conn
                .query_row(
                    "SELECT concept_a, concept_b, strength, fire_count, first_seen, last_fired
                     FROM links WHERE concept_a = ?1 AND concept_b = ?2",
                    params![a, b],
                    Self::row_to_link,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Snapshot of the entire link table, ordered canonically
    pub fn all_links(&self) -> Result<Vec<LinkRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT concept_a, concept_b, strength, fire_count, first_seen, last_fired
                 FROM links ORDER BY concept_a, concept_b",
            )?;
            let rows = stmt.query_map([], Self::row_to_link)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// The strongest links, for graph views
    pub fn top_links(&self, limit: usize) -> Result<Vec<LinkRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT concept_a, concept_b, strength, fire_count, first_seen, last_fired
                 FROM links ORDER BY strength DESC, concept_a, concept_b LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], Self::row_to_link)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Distinct concepts appearing in the link table, ordered
    pub fn distinct_concepts(&self) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT concept_a AS c FROM links UNION SELECT concept_b FROM links ORDER BY c",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Concepts containing any of `terms` as a substring
    pub fn find_concepts_like(&self, terms: &[String], limit: usize) -> Result<Vec<String>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let concepts = self.distinct_concepts()?;
        let lowered: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        Ok(concepts
            .into_iter()
            .filter(|c| lowered.iter().any(|t| !t.is_empty() && c.contains(t.as_str())))
            .take(limit)
            .collect())
    }

    /// Delete every link touching `concept`. Returns how many were removed.
    pub fn delete_links_touching(&self, concept: &str) -> Result<usize> {
        self.write(|conn| {
            let n = conn.execute(
                "DELETE FROM links WHERE concept_a = ?1 OR concept_b = ?1",
                params![concept],
            )?;
            Ok(n)
        })
    }

    /// Wipe the link table (used by reindex)
    pub fn clear_links(&self) -> Result<usize> {
        self.write(|conn| {
            let n = conn.execute("DELETE FROM links", [])?;
            Ok(n)
        })
    }

    pub fn count_links(&self) -> Result<i64> {
        self.read(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
            Ok(n)
        })
    }

    /// Decay every link by `rate^idle_days` and prune below `min_strength`.
    ///
    /// Idle days are UTC floor-days since the later of the link's last firing
    /// and the previous decay sweep, so running twice the same day is a
    /// no-op. The whole sweep runs in one transaction.
    pub fn decay_links(&self, rate: f64, min_strength: f64) -> Result<DecayOutcome> {
        let today = Utc::now().date_naive();
        self.write(|conn| {
            let tx = conn.transaction()?;

            let last_decay: Option<NaiveDate> = tx
                .query_row(
                    "SELECT value FROM graph_meta WHERE key = ?1",
                    params![GRAPH_META_LAST_DECAY_DAY],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .and_then(|s| s.parse().ok());

            if last_decay == Some(today) {
                return Ok(DecayOutcome {
                    ran: false,
                    ..DecayOutcome::default()
                });
            }

            let mut decayed = 0usize;
            let mut pruned = 0usize;
            {
                let mut stmt = tx.prepare(
                    "SELECT concept_a, concept_b, strength, last_fired FROM links",
                )?;
                let rows: Vec<(String, String, f64, String)> = stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<rusqlite::Result<_>>()?;

                for (a, b, strength, last_fired) in rows {
                    let fired_day = parse_ts(&last_fired)?.date_naive();
                    let since = match last_decay {
                        Some(d) if d > fired_day => d,
                        _ => fired_day,
                    };
                    let idle_days = (today - since).num_days().max(0);
                    if idle_days == 0 {
                        continue;
                    }
                    let new_strength = strength * rate.powi(idle_days as i32);
                    if new_strength < min_strength {
                        tx.execute(
                            "DELETE FROM links WHERE concept_a = ?1 AND concept_b = ?2",
                            params![a, b],
                        )?;
                        pruned += 1;
                    } else {
                        tx.execute(
                            "UPDATE links SET strength = ?3 WHERE concept_a = ?1 AND concept_b = ?2",
                            params![a, b, new_strength],
                        )?;
                        decayed += 1;
                    }
                }
            }

            tx.execute(
                "INSERT INTO graph_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![GRAPH_META_LAST_DECAY_DAY, today.to_string()],
            )?;
            tx.commit()?;
            Ok(DecayOutcome {
                decayed,
                pruned,
                ran: true,
            })
        })
    }

    /// Backdate a link's last firing; only tests need to move the clock.
    #[cfg(test)]
    pub(crate) fn set_link_last_fired(&self, a: &str, b: &str, when: DateTime<Utc>) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "UPDATE links SET last_fired = ?3 WHERE concept_a = ?1 AND concept_b = ?2",
                params![a, b, when.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    fn row_to_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<LinkRecord> {
        Ok(LinkRecord {
            concept_a: row.get(0)?,
            concept_b: row.get(1)?,
            strength: row.get(2)?,
            fire_count: row.get(3)?,
            first_seen: parse_ts_sql(row.get::<_, String>(4)?, 4)?,
            last_fired: parse_ts_sql(row.get::<_, String>(5)?, 5)?,
        })
    }

    // ========================================================================
    // TEMP FACTS
    // ========================================================================

    /// Record a new pending temp fact. Returns the generated id.
    pub fn insert_temp_fact(
        &self,
        session_id: &str,
        profile: &str,
        key: &str,
        v1: &str,
        v2: &str,
        v3: &str,
    ) -> Result<TempFactRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.write(|conn| {
            conn.execute(
                "INSERT INTO temp_facts (id, session_id, profile, key, v1, v2, v3, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
                params![id, session_id, profile, key, v1, v2, v3, now.to_rfc3339()],
            )?;
            Ok(())
        })?;
        Ok(TempFactRecord {
            id,
            session_id: session_id.to_string(),
            profile: profile.to_string(),
            key: key.to_string(),
            v1: v1.to_string(),
            v2: v2.to_string(),
            v3: v3.to_string(),
            status: TempFactStatus::Pending,
            retries: 0,
            reason: None,
            created_at: now,
        })
    }

    /// All pending temp facts for one session, oldest first
    pub fn pending_temp_facts(&self, session_id: &str) -> Result<Vec<TempFactRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, profile, key, v1, v2, v3, status, retries, reason, created_at
                 FROM temp_facts WHERE session_id = ?1 AND status = 'pending'
                 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![session_id], Self::row_to_temp_fact)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Sessions that still have pending temp facts
    pub fn sessions_with_pending(&self) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT session_id FROM temp_facts WHERE status = 'pending' ORDER BY session_id",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Move a temp fact to a terminal status. Terminal rows are never
    /// mutated again.
    pub fn set_temp_fact_status(
        &self,
        id: &str,
        status: TempFactStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "UPDATE temp_facts SET status = ?2, reason = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![id, status.as_str(), reason],
            )?;
            Ok(())
        })
    }

    /// Bump the retry counter of a still-pending temp fact; returns the new
    /// count.
    pub fn bump_temp_fact_retries(&self, id: &str) -> Result<i64> {
        self.write(|conn| {
            conn.execute(
                "UPDATE temp_facts SET retries = retries + 1 WHERE id = ?1",
                params![id],
            )?;
            let n: i64 = conn.query_row(
                "SELECT retries FROM temp_facts WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }

    fn row_to_temp_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<TempFactRecord> {
        Ok(TempFactRecord {
            id: row.get(0)?,
            session_id: row.get(1)?,
            profile: row.get(2)?,
            key: row.get(3)?,
            v1: row.get(4)?,
            v2: row.get(5)?,
            v3: row.get(6)?,
            status: TempFactStatus::parse_name(&row.get::<_, String>(7)?),
            retries: row.get(8)?,
            reason: row.get(9)?,
            created_at: parse_ts_sql(row.get::<_, String>(10)?, 10)?,
        })
    }

    // ========================================================================
    // CO-OCCURRENCE WINDOWS
    // ========================================================================

    /// Record which concepts appeared together in a consolidation window
    pub fn record_cooccurrence_window(&self, session_id: &str, concepts: &[String]) -> Result<()> {
        let json = serde_json::to_string(concepts)
            .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
        self.write(|conn| {
            conn.execute(
                "INSERT INTO cooccurrence_windows (session_id, concepts, created_at)
                 VALUES (?1, ?2, ?3)",
                params![session_id, json, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    // ========================================================================
    // FACT RELEVANCE
    // ========================================================================

    /// Persist the last-computed dimensional scores for a fact
    pub fn upsert_relevance(&self, row: &FactRelevanceRow) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "INSERT INTO fact_relevance
                     (profile, key, query_context, identity, log, form, philosophy, reflex,
                      cooccurrence, embedding, spread, keyword, final_score, scored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(profile, key) DO UPDATE SET
                     query_context = excluded.query_context,
                     identity = excluded.identity,
                     log = excluded.log,
                     form = excluded.form,
                     philosophy = excluded.philosophy,
                     reflex = excluded.reflex,
                     cooccurrence = excluded.cooccurrence,
                     embedding = excluded.embedding,
                     spread = excluded.spread,
                     keyword = excluded.keyword,
                     final_score = excluded.final_score,
                     scored_at = excluded.scored_at",
                params![
                    row.profile,
                    row.key,
                    row.query_context,
                    row.identity,
                    row.log,
                    row.form,
                    row.philosophy,
                    row.reflex,
                    row.cooccurrence,
                    row.embedding,
                    row.spread,
                    row.keyword,
                    row.final_score,
                    row.scored_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_relevance(&self, profile: &str, key: &str) -> Result<Option<FactRelevanceRow>> {
        self.read(|conn| {
            let row = conn
                .query_row(
                    "SELECT profile, key, query_context, identity, log, form, philosophy, reflex,
                            cooccurrence, embedding, spread, keyword, final_score, scored_at
                     FROM fact_relevance WHERE profile = ?1 AND key = ?2",
                    params![profile, key],
                    |row| {
                        Ok(FactRelevanceRow {
                            profile: row.get(0)?,
                            key: row.get(1)?,
                            query_context: row.get(2)?,
                            identity: row.get(3)?,
                            log: row.get(4)?,
                            form: row.get(5)?,
                            philosophy: row.get(6)?,
                            reflex: row.get(7)?,
                            cooccurrence: row.get(8)?,
                            embedding: row.get(9)?,
                            spread: row.get(10)?,
                            keyword: row.get(11)?,
                            final_score: row.get(12)?,
                            scored_at: parse_ts_sql(row.get::<_, String>(13)?, 13)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // ========================================================================
    // DEFERRED CONFIRMATIONS
    // ========================================================================

    /// Park a conflicting write for user confirmation
    pub fn enqueue_deferred(
        &self,
        profile: &str,
        key: &str,
        stored_value: &str,
        proposed_value: &str,
        ttl_days: i64,
    ) -> Result<DeferredConfirmation> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires = now + chrono::Duration::days(ttl_days);
        self.write(|conn| {
            conn.execute(
                "INSERT INTO deferred_confirmations
                     (id, profile, key, stored_value, proposed_value, status, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7)",
                params![
                    id,
                    profile,
                    key,
                    stored_value,
                    proposed_value,
                    now.to_rfc3339(),
                    expires.to_rfc3339()
                ],
            )?;
            Ok(())
        })?;
        Ok(DeferredConfirmation {
            id,
            profile: profile.to_string(),
            key: key.to_string(),
            stored_value: stored_value.to_string(),
            proposed_value: proposed_value.to_string(),
            status: DeferredStatus::Pending,
            created_at: now,
            expires_at: expires,
        })
    }

    /// Pending confirmations, oldest first
    pub fn list_deferred(&self) -> Result<Vec<DeferredConfirmation>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, profile, key, stored_value, proposed_value, status, created_at, expires_at
                 FROM deferred_confirmations WHERE status = 'pending' ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map([], Self::row_to_deferred)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn get_deferred(&self, id: &str) -> Result<Option<DeferredConfirmation>> {
        self.read(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, profile, key, stored_value, proposed_value, status, created_at, expires_at
                     FROM deferred_confirmations WHERE id = ?1",
                    params![id],
                    Self::row_to_deferred,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Move a pending confirmation to a terminal status. Returns false if it
    /// was not pending.
    pub fn resolve_deferred(&self, id: &str, status: DeferredStatus) -> Result<bool> {
        self.write(|conn| {
            let n = conn.execute(
                "UPDATE deferred_confirmations SET status = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![id, status.as_str()],
            )?;
            Ok(n > 0)
        })
    }

    /// Expire pending confirmations past their TTL. Returns how many.
    pub fn expire_deferred(&self) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        self.write(|conn| {
            let n = conn.execute(
                "UPDATE deferred_confirmations SET status = 'expired'
                 WHERE status = 'pending' AND expires_at < ?1",
                params![now],
            )?;
            Ok(n)
        })
    }

    fn row_to_deferred(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeferredConfirmation> {
        Ok(DeferredConfirmation {
            id: row.get(0)?,
            profile: row.get(1)?,
            key: row.get(2)?,
            stored_value: row.get(3)?,
            proposed_value: row.get(4)?,
            status: DeferredStatus::parse_name(&row.get::<_, String>(5)?),
            created_at: parse_ts_sql(row.get::<_, String>(6)?, 6)?,
            expires_at: parse_ts_sql(row.get::<_, String>(7)?, 7)?,
        })
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// Append a row to the event log. Ids are monotonic within a process.
    pub fn append_event(
        &self,
        kind: &str,
        source: &str,
        message: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<EventRecord> {
        let at = Utc::now();
        let payload_s = payload.map(|p| p.to_string());
        let id = self.write(|conn| {
            conn.execute(
                "INSERT INTO events (at, kind, source, message, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![at.to_rfc3339(), kind, source, message, payload_s],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(EventRecord {
            id,
            at,
            kind: kind.to_string(),
            source: source.to_string(),
            message: message.to_string(),
            payload: payload.cloned(),
        })
    }

    /// Events with id greater than `since_id`, oldest first
    pub fn list_events(&self, since_id: i64, limit: usize) -> Result<Vec<EventRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, at, kind, source, message, payload
                 FROM events WHERE id > ?1 ORDER BY id LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![since_id, limit as i64], |row| {
                let payload: Option<String> = row.get(5)?;
                Ok(EventRecord {
                    id: row.get(0)?,
                    at: parse_ts_sql(row.get::<_, String>(1)?, 1)?,
                    kind: row.get(2)?,
                    source: row.get(3)?,
                    message: row.get(4)?,
                    payload: payload.and_then(|s| serde_json::from_str(&s).ok()),
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Drop the oldest rows so at most `cap` remain. Returns how many were
    /// pruned.
    pub fn prune_events(&self, cap: i64) -> Result<usize> {
        self.write(|conn| {
            let n = conn.execute(
                "DELETE FROM events WHERE id <= (SELECT COALESCE(MAX(id), 0) - ?1 FROM events)",
                params![cap],
            )?;
            Ok(n)
        })
    }

    // ========================================================================
    // LOOP STATE
    // ========================================================================

    /// Persist a loop's enabled flag and error bookkeeping
    pub fn save_loop_state(
        &self,
        name: &str,
        enabled: bool,
        consecutive_errors: u32,
        last_error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.write(|conn| {
            conn.execute(
                "INSERT INTO loop_state (name, enabled, last_run_at, consecutive_errors, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                     enabled = excluded.enabled,
                     last_run_at = excluded.last_run_at,
                     consecutive_errors = excluded.consecutive_errors,
                     last_error = excluded.last_error",
                params![name, enabled as i64, now, consecutive_errors as i64, last_error],
            )?;
            Ok(())
        })
    }

    /// Whether a loop was left disabled by a previous run. Unknown loops
    /// default to enabled.
    pub fn loop_enabled(&self, name: &str) -> Result<bool> {
        self.read(|conn| {
            let enabled: Option<i64> = conn
                .query_row(
                    "SELECT enabled FROM loop_state WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(enabled.map(|e| e != 0).unwrap_or(true))
        })
    }

    // ========================================================================
    // HEALTH
    // ========================================================================

    /// Aggregate store counts for health reporting
    pub fn health_counts(&self) -> Result<HealthCounts> {
        self.read(|conn| {
            let single = |sql: &str| -> rusqlite::Result<i64> {
                conn.query_row(sql, [], |row| row.get(0))
            };
            Ok(HealthCounts {
                profiles: single("SELECT COUNT(*) FROM profiles")?,
                facts: single("SELECT COUNT(*) FROM facts")?,
                links: single("SELECT COUNT(*) FROM links")?,
                temp_pending: single("SELECT COUNT(*) FROM temp_facts WHERE status = 'pending'")?,
                temp_promoted: single("SELECT COUNT(*) FROM temp_facts WHERE status = 'promoted'")?,
                temp_discarded: single(
                    "SELECT COUNT(*) FROM temp_facts WHERE status = 'discarded'",
                )?,
                deferred_pending: single(
                    "SELECT COUNT(*) FROM deferred_confirmations WHERE status = 'pending'",
                )?,
                events: single("SELECT COUNT(*) FROM events")?,
                avg_link_strength: conn.query_row(
                    "SELECT COALESCE(AVG(strength), 0.0) FROM links",
                    [],
                    |row| row.get(0),
                )?,
            })
        })
    }
}

// ============================================================================
// TIMESTAMP HELPERS
// ============================================================================

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidTimestamp(s.to_string()))
}

/// Timestamp parser usable inside rusqlite row mappers
fn parse_ts_sql(s: String, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}

// ============================================================================
// TESTS
// ============================================================================
