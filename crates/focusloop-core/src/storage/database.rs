//! SQLite-based session storage.
//!
//! Provides persistent storage for:
//! - Finished focus and break intervals (a local session ledger)
//! - Key-value store for the timer snapshot

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::data_dir;
use super::kv::{Applied, Guard, KeyValueStore};
use crate::error::{DatabaseError, LedgerError};
use crate::recorder::{SessionId, SessionLedger};
use crate::timer::{IntervalKind, SessionRecord};

/// A session row as stored in the local ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub id: i64,
    pub kind: String,
    pub activity_label: String,
    pub duration_secs: u64,
    pub completed: bool,
    pub started_at: DateTime<Utc>,
}

/// SQLite database for session storage.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at `~/.config/focusloop/focusloop.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::DataDir(e.to_string()))?;
        Self::open_at(&dir.join("focusloop.db"))
    }

    /// Open (or create) the database at `path`.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        // Another focusloop process may hold the write lock briefly.
        conn.busy_timeout(std::time::Duration::from_secs(2))?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    id             INTEGER PRIMARY KEY AUTOINCREMENT,
                    kind           TEXT NOT NULL,
                    activity_label TEXT NOT NULL DEFAULT '',
                    duration_secs  INTEGER NOT NULL,
                    completed      INTEGER NOT NULL,
                    started_at     TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS kv (
                    key   TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at);",
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))
    }

    /// Record a finished interval.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub fn record_session(&self, record: &SessionRecord) -> Result<i64, DatabaseError> {
        self.conn.execute(
            "INSERT INTO sessions (kind, activity_label, duration_secs, completed, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.kind.as_str(),
                record.activity_label,
                record.duration_secs,
                record.completed,
                record.started_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent sessions first.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<StoredSession>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, activity_label, duration_secs, completed, started_at
             FROM sessions
             ORDER BY started_at DESC, id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let started_at: String = row.get(5)?;
            Ok(StoredSession {
                id: row.get(0)?,
                kind: row.get(1)?,
                activity_label: row.get(2)?,
                duration_secs: row.get(3)?,
                completed: row.get(4)?,
                started_at: DateTime::parse_from_rfc3339(&started_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_default(),
            })
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    /// Count of completed focus intervals in the ledger.
    pub fn completed_focus_count(&self) -> Result<u64, DatabaseError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE kind = ?1 AND completed = 1",
            params![IntervalKind::Focus.as_str()],
            |row| row.get::<_, u64>(0),
        )?;
        Ok(count)
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

    /// Delete a key from the kv store.
    pub fn kv_delete(&self, key: &str) -> Result<(), rusqlite::Error> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self.kv_get(key)?)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        Ok(self.kv_set(key, value)?)
    }

    fn remove(&self, key: &str) -> Result<(), DatabaseError> {
        Ok(self.kv_delete(key)?)
    }

    fn apply(&self, writes: &[(&str, &str)], removals: &[&str]) -> Result<(), DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        write_batch(&tx, writes, removals)?;
        tx.commit()?;
        Ok(())
    }

    fn apply_if(
        &self,
        guard_key: &str,
        accept: Guard<'_>,
        writes: &[(&str, &str)],
        removals: &[&str],
    ) -> Result<Applied, DatabaseError> {
        // IMMEDIATE takes the write lock before the guard is read.
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        let outcome = match self.guarded_batch(guard_key, accept, writes, removals) {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                return Err(e);
            }
        };
        let finish = match outcome {
            Applied::Committed => "COMMIT",
            Applied::Rejected { .. } => "ROLLBACK",
        };
        if let Err(e) = self.conn.execute_batch(finish) {
            let _ = self.conn.execute_batch("ROLLBACK");
            return Err(e.into());
        }
        Ok(outcome)
    }
}

impl Database {
    fn guarded_batch(
        &self,
        guard_key: &str,
        accept: Guard<'_>,
        writes: &[(&str, &str)],
        removals: &[&str],
    ) -> Result<Applied, DatabaseError> {
        let found = self.kv_get(guard_key)?;
        if !accept(found.as_deref()) {
            return Ok(Applied::Rejected { found });
        }
        write_batch(&self.conn, writes, removals)?;
        Ok(Applied::Committed)
    }
}

fn write_batch(
    conn: &Connection,
    writes: &[(&str, &str)],
    removals: &[&str],
) -> Result<(), rusqlite::Error> {
    for (key, value) in writes {
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }
    for key in removals {
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
    }
    Ok(())
}

impl SessionLedger for Database {
    fn save_session(&mut self, record: &SessionRecord) -> Result<SessionId, LedgerError> {
        let id = self.record_session(record)?;
        Ok(SessionId(id.to_string()))
    }
}
