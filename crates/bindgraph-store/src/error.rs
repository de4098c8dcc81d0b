//! Storage error types for bindgraph-store.
//!
//! [`StoreError`] covers serialization, SQLite and migration failures, file
//! access, and snapshots that fail entity-model validation.

use bindgraph_core::CoreError;
use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The SQLite backend reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Reading or writing a snapshot file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A loaded snapshot violates the entity model.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[from] CoreError),

    /// No snapshot has been stored yet.
    #[error("no snapshot stored")]
    NoSnapshot,

    /// A data integrity violation was detected.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },
}
