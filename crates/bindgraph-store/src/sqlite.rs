//! SQLite implementation of [`StorageAdapter`] and [`EntitySnapshotProvider`].
//!
//! [`SqliteStore`] keeps app-store entries per namespace and a history of
//! entity snapshots. Complex values are stored as JSON TEXT columns via
//! serde_json; every write runs in its own transaction.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use bindgraph_core::EntitySnapshot;

use crate::error::StoreError;
use crate::hash::hash_snapshot;
use crate::traits::{EntitySnapshotProvider, StorageAdapter};

/// SQLite-backed store.
///
/// App-store rows are scoped by `namespace` (typically application id plus
/// branch) so several apps can share one database file.
pub struct SqliteStore {
    conn: Connection,
    namespace: String,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str, namespace: &str) -> Result<Self, StoreError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore {
            conn,
            namespace: namespace.to_string(),
        })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory(namespace: &str) -> Result<Self, StoreError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore {
            conn,
            namespace: namespace.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    // -----------------------------------------------------------------------
    // Snapshot history
    // -----------------------------------------------------------------------

    /// Stores `snapshot` under its version, replacing any previous row for
    /// the same version.
    pub fn save_snapshot(&mut self, snapshot: &EntitySnapshot) -> Result<(), StoreError> {
        let body = serde_json::to_string(snapshot)?;
        let content_hash = snapshot_hash(snapshot);
        let version = i64::try_from(snapshot.version).map_err(|_| StoreError::IntegrityError {
            reason: format!("snapshot version {} exceeds i64", snapshot.version),
        })?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO snapshots (version, content_hash, body) VALUES (?1, ?2, ?3)",
            params![version, content_hash, body],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Loads one stored version.
    pub fn load_snapshot(&self, version: u64) -> Result<Option<EntitySnapshot>, StoreError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT content_hash, body FROM snapshots WHERE version = ?1",
                params![version as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(hash, body)| decode_snapshot(&hash, &body)).transpose()
    }

    /// Stored versions, ascending.
    pub fn versions(&self) -> Result<Vec<u64>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT version FROM snapshots ORDER BY version")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row? as u64);
        }
        Ok(result)
    }

    /// Drops every stored version older than `keep_from`.
    pub fn prune_snapshots(&mut self, keep_from: u64) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM snapshots WHERE version < ?1",
            params![keep_from as i64],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}

/// Order-independent digest of every path hash in the snapshot.
fn snapshot_hash(snapshot: &EntitySnapshot) -> String {
    let mut hasher = blake3::Hasher::new();
    for (path, hash) in hash_snapshot(snapshot) {
        hasher.update(path.as_str().as_bytes());
        hasher.update(hash.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

fn decode_snapshot(expected_hash: &str, body: &str) -> Result<EntitySnapshot, StoreError> {
    let snapshot: EntitySnapshot = serde_json::from_str(body)?;
    snapshot.validate()?;
    if snapshot_hash(&snapshot) != expected_hash {
        return Err(StoreError::IntegrityError {
            reason: format!("snapshot {} does not match its content hash", snapshot.version),
        });
    }
    Ok(snapshot)
}

impl EntitySnapshotProvider for SqliteStore {
    /// The highest stored version.
    fn snapshot(&self) -> Result<EntitySnapshot, StoreError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT content_hash, body FROM snapshots ORDER BY version DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (hash, body) = row.ok_or(StoreError::NoSnapshot)?;
        decode_snapshot(&hash, &body)
    }
}

impl StorageAdapter for SqliteStore {
    fn load(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, value FROM app_store WHERE namespace = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![self.namespace], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut result = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            result.insert(key, serde_json::from_str(&value)?);
        }
        Ok(result)
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM app_store WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(|v| serde_json::from_str(&v)).transpose()?)
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(value)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO app_store (namespace, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (namespace, key) DO UPDATE SET value = excluded.value",
            params![self.namespace, key, encoded],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM app_store WHERE namespace = ?1 AND key = ?2",
            params![self.namespace, key],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM app_store WHERE namespace = ?1",
            params![self.namespace],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindgraph_core::{Entity, Mutation, PropertyPath, PropertyValue};
    use serde_json::json;

    fn snapshot() -> EntitySnapshot {
        EntitySnapshot::from_entities([
            Entity::widget("A").with_literal("x", 5),
            Entity::widget("B").with_binding("y", "{{A.x + 1}}"),
        ])
        .unwrap()
    }

    #[test]
    fn test_app_store_roundtrip() {
        let mut store = SqliteStore::in_memory("app-1:main").unwrap();
        store.set("user", &json!({"name": "Ada"})).unwrap();
        store.set("count", &json!(3)).unwrap();
        store.set("count", &json!(4)).unwrap();

        assert_eq!(store.get("count").unwrap(), Some(json!(4)));
        let all = store.load().unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["count", "user"]);

        assert!(store.remove("user").unwrap());
        assert_eq!(store.get("user").unwrap(), None);
        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("store.db");
        let db = db.to_str().unwrap();

        let mut a = SqliteStore::new(db, "app-a").unwrap();
        a.set("k", &json!("a")).unwrap();
        let mut b = SqliteStore::new(db, "app-b").unwrap();
        b.set("k", &json!("b")).unwrap();

        assert_eq!(a.get("k").unwrap(), Some(json!("a")));
        assert_eq!(b.get("k").unwrap(), Some(json!("b")));
    }

    #[test]
    fn test_snapshot_history() {
        let mut store = SqliteStore::in_memory("app").unwrap();
        assert!(matches!(store.snapshot(), Err(StoreError::NoSnapshot)));

        let v0 = snapshot();
        let v1 = v0
            .apply(&[Mutation::SetProperty {
                path: PropertyPath::parse("A.x").unwrap(),
                value: PropertyValue::literal(10),
            }])
            .unwrap();
        store.save_snapshot(&v0).unwrap();
        store.save_snapshot(&v1).unwrap();

        assert_eq!(store.snapshot().unwrap(), v1);
        assert_eq!(store.load_snapshot(0).unwrap(), Some(v0));
        assert_eq!(store.versions().unwrap(), vec![0, 1]);
        assert_eq!(store.prune_snapshots(1).unwrap(), 1);
        assert_eq!(store.versions().unwrap(), vec![1]);
    }

    #[test]
    fn test_tampered_snapshot_fails_integrity_check() {
        let mut store = SqliteStore::in_memory("app").unwrap();
        store.save_snapshot(&snapshot()).unwrap();
        let body = serde_json::to_string(&snapshot())
            .unwrap()
            .replace("\"value\":5", "\"value\":6");
        store
            .conn
            .execute("UPDATE snapshots SET body = ?1 WHERE version = 0", params![body])
            .unwrap();
        assert!(matches!(
            store.snapshot(),
            Err(StoreError::IntegrityError { .. })
        ));
    }
}
