//! TaskStore error types

use thiserror::Error;

/// Errors that can occur during persistence operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record not found: {collection}/{id}")]
    NotFound { collection: &'static str, id: String },

    #[error("uniqueness violation on {collection}: {field} already has value {value}")]
    UniquenessViolation {
        collection: &'static str,
        field: String,
        value: String,
    },

    #[error("lock could not be acquired on store at {path}")]
    LockUnavailable { path: String },

    #[error("migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
