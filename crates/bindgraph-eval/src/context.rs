//! The value layer expressions read from.
//!
//! Literal paths read straight from the snapshot; binding paths read the
//! newest result (staged in the running pass, else committed). A lookup on a
//! path that has known descendants merges them into one nested value so
//! `{{Table1}}` and `{{Table1.primaryColumns}}` see the full computed tree.

use std::collections::BTreeMap;
use std::ops::Bound;

use serde_json::{Map, Value};

use bindgraph_core::{EntityKind, EntitySnapshot, PropertyPath, PropertyValue, Segment};

use crate::evaluator::EvaluationResult;
use crate::interpreter::EvalContext;

/// Arrays are never grown past this index when materializing descendants.
const MAX_MATERIALIZED_INDEX: usize = 4096;

pub struct SnapshotContext<'a> {
    snapshot: &'a EntitySnapshot,
    staged: Option<&'a BTreeMap<PropertyPath, EvaluationResult>>,
    committed: &'a BTreeMap<PropertyPath, EvaluationResult>,
}

impl<'a> SnapshotContext<'a> {
    pub fn new(
        snapshot: &'a EntitySnapshot,
        committed: &'a BTreeMap<PropertyPath, EvaluationResult>,
    ) -> Self {
        SnapshotContext {
            snapshot,
            staged: None,
            committed,
        }
    }

    pub fn with_staged(mut self, staged: &'a BTreeMap<PropertyPath, EvaluationResult>) -> Self {
        self.staged = Some(staged);
        self
    }

    fn result(&self, path: &PropertyPath) -> Option<&'a EvaluationResult> {
        self.staged
            .and_then(|staged| staged.get(path))
            .or_else(|| self.committed.get(path))
    }

    fn value_of(&self, path: &PropertyPath, value: &PropertyValue) -> Value {
        match value {
            PropertyValue::Literal(v) => v.clone(),
            // Never evaluated yet reads as undefined.
            PropertyValue::Binding(_) => self
                .result(path)
                .map(|r| r.value.clone())
                .unwrap_or(Value::Null),
        }
    }
}

impl EvalContext for SnapshotContext<'_> {
    fn entity_kind(&self, name: &str) -> Option<EntityKind> {
        self.snapshot.entity(name).map(|e| e.kind)
    }

    fn lookup(&self, path: &PropertyPath) -> Option<Value> {
        let entity = self.snapshot.entity(path.entity())?;
        let key = path.property_key();
        let mut found = entity
            .properties
            .get(key)
            .map(|value| self.value_of(path, value));

        let depth = path.segments().len();
        let below = entity
            .properties
            .range::<str, _>((Bound::Included(key), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(key))
            .filter(|(k, _)| {
                k.len() > key.len() && (key.is_empty() || matches!(k.as_bytes()[key.len()], b'.' | b'['))
            });
        for (k, value) in below {
            let Ok(child) = PropertyPath::of(path.entity(), k) else {
                continue;
            };
            let segments = child.segments();
            let base = found.get_or_insert_with(|| Value::Object(Map::new()));
            insert_at(base, &segments[depth..], self.value_of(&child, value));
        }
        found
    }
}

fn insert_at(target: &mut Value, segments: &[Segment], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    match first {
        Segment::Key(key) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                insert_at(map.entry(key.clone()).or_insert(Value::Null), rest, value);
            }
        }
        Segment::Index(i) if *i <= MAX_MATERIALIZED_INDEX => {
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            if let Value::Array(items) = target {
                if items.len() <= *i {
                    items.resize(*i + 1, Value::Null);
                }
                insert_at(&mut items[*i], rest, value);
            }
        }
        Segment::Index(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindgraph_core::Entity;
    use serde_json::json;

    fn path(raw: &str) -> PropertyPath {
        PropertyPath::parse(raw).unwrap()
    }

    fn snapshot() -> EntitySnapshot {
        EntitySnapshot::from_entities([Entity::widget("Table1")
            .with_literal("primaryColumns", json!({"status": {"label": "Status"}}))
            .with_binding("primaryColumns.status.computedValue", "{{1}}")
            .with_literal("xy", 1)
            .with_literal("x", 2)])
        .unwrap()
    }

    #[test]
    fn descendants_merge_into_parent() {
        let snapshot = snapshot();
        let mut committed = BTreeMap::new();
        committed.insert(
            path("Table1.primaryColumns.status.computedValue"),
            EvaluationResult::ok(json!(["a"])),
        );
        let ctx = SnapshotContext::new(&snapshot, &committed);
        assert_eq!(
            ctx.lookup(&path("Table1.primaryColumns")).unwrap(),
            json!({"status": {"label": "Status", "computedValue": ["a"]}})
        );
        // `xy` is a sibling of `x`, not a descendant.
        assert_eq!(ctx.lookup(&path("Table1.x")).unwrap(), json!(2));
    }

    #[test]
    fn staged_results_shadow_committed() {
        let snapshot = snapshot();
        let committed = BTreeMap::new();
        let mut staged = BTreeMap::new();
        let computed = path("Table1.primaryColumns.status.computedValue");
        staged.insert(computed.clone(), EvaluationResult::ok(json!(7)));
        let ctx = SnapshotContext::new(&snapshot, &committed).with_staged(&staged);
        assert_eq!(ctx.lookup(&computed).unwrap(), json!(7));
        assert!(ctx.lookup(&path("Table1.nothing")).is_none());
        assert_eq!(ctx.lookup(&path("Table1")).unwrap()["x"], json!(2));
    }

    #[test]
    fn unevaluated_binding_reads_as_null() {
        let snapshot = snapshot();
        let committed = BTreeMap::new();
        let ctx = SnapshotContext::new(&snapshot, &committed);
        assert_eq!(
            ctx.lookup(&path("Table1.primaryColumns.status.computedValue")),
            Some(Value::Null)
        );
    }
}
