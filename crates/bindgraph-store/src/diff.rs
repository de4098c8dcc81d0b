//! Path-level snapshot diffing.
//!
//! Compares content hashes of two snapshots and classifies every data path
//! as added, modified or removed. Entity-level changes (added, removed, or
//! metadata and trigger edits) are tracked separately because they drive
//! graph restructuring and page-load planning rather than value updates.

use std::collections::{BTreeMap, BTreeSet};

use bindgraph_core::{EntitySnapshot, PropertyPath};

use crate::hash::{hash_entity, hash_snapshot, PathHashes};

/// Everything that differs between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// Paths present only in the next snapshot.
    pub added: BTreeSet<PropertyPath>,
    /// Paths whose value, binding text, or literal/binding kind changed.
    pub modified: BTreeSet<PropertyPath>,
    /// Paths present only in the previous snapshot.
    pub removed: BTreeSet<PropertyPath>,
    pub entities_added: BTreeSet<String>,
    pub entities_removed: BTreeSet<String>,
    /// Entities whose kind, page-load flag, page or trigger code changed.
    pub entities_changed: BTreeSet<String>,
}

impl SnapshotDiff {
    /// Added and modified paths.
    pub fn changed(&self) -> BTreeSet<PropertyPath> {
        self.added.union(&self.modified).cloned().collect()
    }

    /// Every path touched in any way.
    pub fn touched(&self) -> BTreeSet<PropertyPath> {
        let mut all = self.changed();
        all.extend(self.removed.iter().cloned());
        all
    }

    /// True if the path set itself changed, not only values.
    pub fn is_structural(&self) -> bool {
        !self.added.is_empty()
            || !self.removed.is_empty()
            || !self.entities_added.is_empty()
            || !self.entities_removed.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.removed.is_empty()
            && self.entities_added.is_empty()
            && self.entities_removed.is_empty()
            && self.entities_changed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

/// Diffs two precomputed hash maps (path level only).
pub fn diff_hashes(previous: &PathHashes, next: &PathHashes) -> SnapshotDiff {
    let mut diff = SnapshotDiff::default();
    for (path, hash) in next {
        match previous.get(path) {
            Some(prev) if prev == hash => {}
            Some(_) => {
                diff.modified.insert(path.clone());
            }
            None => {
                diff.added.insert(path.clone());
            }
        }
    }
    for path in previous.keys() {
        if !next.contains_key(path) {
            diff.removed.insert(path.clone());
        }
    }
    diff
}

/// Diffs two snapshots at path and entity level.
pub fn diff_snapshots(previous: &EntitySnapshot, next: &EntitySnapshot) -> SnapshotDiff {
    let mut diff = diff_hashes(&hash_snapshot(previous), &hash_snapshot(next));

    let prev_entities: BTreeMap<&str, blake3::Hash> = previous
        .entities
        .values()
        .map(|e| (e.name.as_str(), hash_entity(e)))
        .collect();
    for entity in next.entities.values() {
        match prev_entities.get(entity.name.as_str()) {
            None => {
                diff.entities_added.insert(entity.name.clone());
            }
            Some(prev) if *prev != hash_entity(entity) => {
                diff.entities_changed.insert(entity.name.clone());
            }
            Some(_) => {}
        }
    }
    for name in prev_entities.keys() {
        if !next.contains_entity(name) {
            diff.entities_removed.insert((*name).to_string());
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindgraph_core::{Entity, Mutation, PropertyValue};

    fn path(raw: &str) -> PropertyPath {
        PropertyPath::parse(raw).unwrap()
    }

    fn base() -> EntitySnapshot {
        EntitySnapshot::from_entities([
            Entity::widget("A").with_literal("x", 5),
            Entity::widget("B").with_binding("y", "{{A.x + 1}}"),
        ])
        .unwrap()
    }

    #[test]
    fn test_identical_snapshots_are_clean() {
        let diff = diff_snapshots(&base(), &base());
        assert!(diff.is_clean());
        assert_eq!(diff.total(), 0);
    }

    #[test]
    fn test_literal_change_is_modified() {
        let next = base()
            .apply(&[Mutation::SetProperty {
                path: path("A.x"),
                value: PropertyValue::literal(10),
            }])
            .unwrap();
        let diff = diff_snapshots(&base(), &next);
        assert_eq!(diff.modified, [path("A.x")].into());
        assert!(!diff.is_structural());
    }

    #[test]
    fn test_entity_removal_and_addition() {
        let next = base()
            .apply(&[
                Mutation::RemoveEntity { name: "A".into() },
                Mutation::AddEntity {
                    entity: Entity::action("Api1").with_literal("data", 1),
                },
            ])
            .unwrap();
        let diff = diff_snapshots(&base(), &next);
        assert_eq!(diff.removed, [path("A.x")].into());
        assert_eq!(diff.added, [path("Api1.data")].into());
        assert!(diff.entities_removed.contains("A"));
        assert!(diff.entities_added.contains("Api1"));
        assert!(diff.is_structural());
    }

    #[test]
    fn test_trigger_edit_changes_entity_only() {
        let next = base()
            .apply(&[Mutation::SetTriggerProperty {
                path: path("B.onClick"),
                code: "showAlert('hi')".into(),
            }])
            .unwrap();
        let diff = diff_snapshots(&base(), &next);
        assert_eq!(diff.total(), 0);
        assert!(diff.entities_changed.contains("B"));
    }
}
