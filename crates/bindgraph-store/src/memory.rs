//! In-memory backends.
//!
//! [`MemoryProvider`] and [`MemoryStorage`] are first-class backends for
//! tests and embedders that keep state elsewhere. Semantics match the file
//! and SQLite backends.

use std::collections::BTreeMap;

use serde_json::Value;

use bindgraph_core::{CoreError, EntitySnapshot, Mutation};

use crate::error::StoreError;
use crate::traits::{EntitySnapshotProvider, StorageAdapter};

/// Holds one snapshot and advances it batch by batch.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    current: EntitySnapshot,
}

impl MemoryProvider {
    pub fn new(snapshot: EntitySnapshot) -> Self {
        MemoryProvider { current: snapshot }
    }

    /// Applies one logical batch; on error the current snapshot is kept.
    pub fn apply(&mut self, batch: &[Mutation]) -> Result<&EntitySnapshot, CoreError> {
        self.current = self.current.apply(batch)?;
        Ok(&self.current)
    }

    pub fn replace(&mut self, snapshot: EntitySnapshot) {
        self.current = snapshot;
    }

    pub fn current(&self) -> &EntitySnapshot {
        &self.current
    }
}

impl EntitySnapshotProvider for MemoryProvider {
    fn snapshot(&self) -> Result<EntitySnapshot, StoreError> {
        Ok(self.current.clone())
    }
}

/// App-store entries kept in a map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: BTreeMap<String, Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: BTreeMap<String, Value>) -> Self {
        MemoryStorage { entries }
    }
}

impl StorageAdapter for MemoryStorage {
    fn load(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        Ok(self.entries.clone())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindgraph_core::{Entity, PropertyPath, PropertyValue};
    use serde_json::json;

    #[test]
    fn test_provider_apply_is_all_or_nothing() {
        let snapshot = EntitySnapshot::from_entities([Entity::widget("A").with_literal("x", 1)]).unwrap();
        let mut provider = MemoryProvider::new(snapshot);
        let bad = provider.apply(&[
            Mutation::SetProperty {
                path: PropertyPath::parse("A.x").unwrap(),
                value: PropertyValue::literal(2),
            },
            Mutation::RemoveEntity { name: "Nope".into() },
        ]);
        assert!(bad.is_err());
        assert_eq!(provider.snapshot().unwrap().version, 0);

        provider
            .apply(&[Mutation::RemoveEntity { name: "A".into() }])
            .unwrap();
        assert_eq!(provider.current().version, 1);
    }

    #[test]
    fn test_storage_crud() {
        let mut storage = MemoryStorage::new();
        storage.set("k", &json!({"a": 1})).unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(json!({"a": 1})));
        assert!(storage.remove("k").unwrap());
        assert!(!storage.remove("k").unwrap());
        storage.set("a", &json!(1)).unwrap();
        storage.clear().unwrap();
        assert!(storage.load().unwrap().is_empty());
    }
}
