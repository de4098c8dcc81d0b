//! The storage contracts the evaluation engine consumes.
//!
//! - [`EntitySnapshotProvider`] yields the current entity snapshot; the
//!   engine calls it once per logical mutation batch.
//! - [`StorageAdapter`] persists the app store's key-value pairs. Only
//!   trigger side effects write through it; evaluation passes never do.
//!
//! Both traits are synchronous. Implementations must be `Send` so the
//! engine worker can own them across await points.

use std::collections::BTreeMap;

use serde_json::Value;

use bindgraph_core::EntitySnapshot;

use crate::error::StoreError;

/// Source of the current entity snapshot.
pub trait EntitySnapshotProvider: Send {
    /// Returns the current snapshot, validated against the entity model.
    fn snapshot(&self) -> Result<EntitySnapshot, StoreError>;
}

/// Persistent key-value storage for the app store.
pub trait StorageAdapter: Send {
    /// All stored entries, in key order.
    fn load(&self) -> Result<BTreeMap<String, Value>, StoreError>;

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Inserts or overwrites one entry.
    fn set(&mut self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Removes one entry. Returns whether it existed.
    fn remove(&mut self, key: &str) -> Result<bool, StoreError>;

    /// Removes every entry.
    fn clear(&mut self) -> Result<(), StoreError>;
}
