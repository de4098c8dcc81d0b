//! Storage for bindgraph entity snapshots and the persistent app store.
//!
//! Provides the [`EntitySnapshotProvider`] and [`StorageAdapter`] traits the
//! evaluation engine consumes, plus content hashing and snapshot diffing.
//!
//! # Modules
//!
//! - [`error`]: StoreError enum with all failure modes
//! - [`hash`]: blake3 content hashes of property values
//! - [`diff`]: path-level snapshot diffing
//! - [`traits`]: EntitySnapshotProvider and StorageAdapter
//! - [`memory`]: in-memory backends
//! - [`file`]: JSON file snapshot provider
//! - [`schema`]: SQL schema and migration setup
//! - [`sqlite`]: SqliteStore implementation

pub mod diff;
pub mod error;
pub mod file;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

// Re-export key types for ergonomic use.
pub use diff::{diff_hashes, diff_snapshots, SnapshotDiff};
pub use error::StoreError;
pub use file::JsonFileProvider;
pub use hash::{hash_entity, hash_snapshot, hash_value, PathHashes};
pub use memory::{MemoryProvider, MemoryStorage};
pub use sqlite::SqliteStore;
pub use traits::{EntitySnapshotProvider, StorageAdapter};
