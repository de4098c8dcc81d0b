//! JSON file snapshot provider.
//!
//! Reads an [`EntitySnapshot`] from disk on every call, so external edits
//! to the file are picked up by the next batch.

use std::fs;
use std::path::{Path, PathBuf};

use bindgraph_core::EntitySnapshot;

use crate::error::StoreError;
use crate::traits::EntitySnapshotProvider;

#[derive(Debug, Clone)]
pub struct JsonFileProvider {
    path: PathBuf,
}

impl JsonFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileProvider { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `snapshot` as pretty JSON, replacing the file atomically.
    pub fn save(&self, snapshot: &EntitySnapshot) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl EntitySnapshotProvider for JsonFileProvider {
    fn snapshot(&self) -> Result<EntitySnapshot, StoreError> {
        let body = fs::read(&self.path)?;
        let snapshot: EntitySnapshot = serde_json::from_slice(&body)?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}
