//! SQLite-based stats storage.
//!
//! Provides persistent storage for:
//! - The practice stats record (JSON under the `stats` key of the kv table)
//! - A local history of completed sessions

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::PersistenceError;
use crate::stats::{StatsRecord, StatsStore};

const STATS_KEY: &str = "stats";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub mode_id: String,
    pub duration_secs: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// SQLite database for stats and session history.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at `~/.config/respira/respira.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    pub fn open() -> Result<Self, PersistenceError> {
        let dir = data_dir().map_err(|e| PersistenceError::Load(e.to_string()))?;
        Self::open_at(&dir.join("respira.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path).map_err(|source| PersistenceError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests and ephemeral runs).
    pub fn open_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                mode_id       TEXT NOT NULL,
                duration_secs INTEGER NOT NULL,
                started_at    TEXT NOT NULL,
                completed_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_completed_at ON sessions(completed_at);",
        )?;
        Ok(())
    }

    /// Record a completed session.
    pub fn record_session(
        &self,
        mode_id: &str,
        duration_secs: u64,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<i64, rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO sessions (mode_id, duration_secs, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                mode_id,
                duration_secs,
                started_at.to_rfc3339(),
                completed_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent completed sessions, newest first.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, mode_id, duration_secs, started_at, completed_at
             FROM sessions
             ORDER BY completed_at DESC, id DESC
             LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| {
            Ok(SessionRecord {
                id: row.get(0)?,
                mode_id: row.get(1)?,
                duration_secs: row.get(2)?,
                started_at: parse_ts(row, 3)?,
                completed_at: parse_ts(row, 4)?,
            })
        })?;

        let sessions = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, rusqlite::Error> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get::<_, String>(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

/// RFC 3339 column to UTC. A malformed value is a conversion error, not the epoch.
fn parse_ts(row: &Row<'_>, idx: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// [`StatsStore`] backed by the kv table.
pub struct SqliteStatsStore {
    db: Mutex<Database>,
}

impl SqliteStatsStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open() -> Result<Self, PersistenceError> {
        Ok(Self::new(Database::open()?))
    }
}

impl StatsStore for SqliteStatsStore {
    fn load(&self) -> Result<StatsRecord, PersistenceError> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        match db.kv_get(STATS_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(StatsRecord::default()),
        }
    }

    fn save(&self, record: &StatsRecord) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(record)?;
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        db.kv_set(STATS_KEY, &json)?;
        Ok(())
    }
}
