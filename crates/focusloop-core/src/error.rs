//! Core error types for focusloop-core.
//!
//! This module defines the error hierarchy using thiserror. Most of these
//! never reach a user: snapshot and playback failures are logged and
//! swallowed at the visibility and notification boundaries.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for focusloop-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Snapshot persistence errors
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Session ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The timer service task has shut down.
    #[error("timer service is no longer running")]
    ServiceClosed,
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// The data directory could not be resolved or created.
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown dot-path key
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors raised by the snapshot persistence adapter.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The backing key-value store failed.
    #[error("snapshot store failed: {0}")]
    Store(String),

    /// A stored snapshot could not be decoded.
    #[error("malformed snapshot: {0}")]
    Malformed(String),

    /// Another writer committed a newer snapshot since this writer last read it.
    #[error("snapshot revision conflict: expected {expected}, found {found}")]
    Conflict { expected: u64, found: u64 },
}

/// Errors raised by an external session ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The ledger could not be reached; the record should be retried.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger refused the record.
    #[error("ledger rejected record: {0}")]
    Rejected(String),
}

/// Completion cue playback failure.
#[derive(Error, Debug)]
#[error("completion sound failed: {0}")]
pub struct NotifyError(pub String);

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

impl From<DatabaseError> for SnapshotError {
    fn from(err: DatabaseError) -> Self {
        SnapshotError::Store(err.to_string())
    }
}

impl From<DatabaseError> for LedgerError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Locked => LedgerError::Unavailable("database is locked".into()),
            other => LedgerError::Rejected(other.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
