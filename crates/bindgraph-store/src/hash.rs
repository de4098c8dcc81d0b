//! Deterministic content hashing for property values using blake3.
//!
//! Hashes are derived state used to diff snapshots cheaply; they are never
//! the source of truth.
//!
//! # Determinism
//!
//! Values are fed to the hasher through a tagged, length-prefixed walk
//! rather than their JSON text, so `1` and `"1"` never collide and object
//! keys are visited in sorted order regardless of map implementation.

use std::collections::BTreeMap;

use serde_json::Value;

use bindgraph_core::{Entity, EntitySnapshot, PropertyPath, PropertyValue};

/// Content hash of every data path in a snapshot.
pub type PathHashes = BTreeMap<PropertyPath, blake3::Hash>;

/// Hashes one property value, distinguishing literals from bindings.
pub fn hash_value(value: &PropertyValue) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    match value {
        PropertyValue::Literal(v) => {
            hasher.update(b"L");
            feed(&mut hasher, v);
        }
        PropertyValue::Binding(text) => {
            hasher.update(b"B");
            feed_str(&mut hasher, text);
        }
    }
    hasher.finalize()
}

/// Hashes every data path of every entity.
pub fn hash_snapshot(snapshot: &EntitySnapshot) -> PathHashes {
    snapshot
        .paths()
        .map(|(path, value)| (path, hash_value(value)))
        .collect()
}

/// Hashes an entity's metadata and trigger code, excluding data properties.
///
/// A change here matters to the trigger scheduler but not to evaluation.
pub fn hash_entity(entity: &Entity) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    feed_str(&mut hasher, &entity.name);
    hasher.update(&[entity.kind as u8]);
    hasher.update(match entity.run_on_page_load {
        None => b"-",
        Some(true) => b"1",
        Some(false) => b"0",
    });
    feed_str(&mut hasher, entity.page_id.as_deref().unwrap_or(""));
    for (key, code) in &entity.trigger_properties {
        feed_str(&mut hasher, key);
        feed_str(&mut hasher, code);
    }
    hasher.finalize()
}

fn feed_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn feed(hasher: &mut blake3::Hasher, value: &Value) {
    match value {
        Value::Null => {
            hasher.update(b"n");
        }
        Value::Bool(b) => {
            hasher.update(if *b { b"t" } else { b"f" });
        }
        Value::Number(n) => {
            hasher.update(b"#");
            // Integral floats hash like integers so `2.0` equals `2`.
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 => {
                    hasher.update(&(f as i64).to_le_bytes());
                }
                Some(f) => {
                    hasher.update(&f.to_le_bytes());
                }
                None => {
                    feed_str(hasher, &n.to_string());
                }
            }
        }
        Value::String(s) => {
            hasher.update(b"s");
            feed_str(hasher, s);
        }
        Value::Array(items) => {
            hasher.update(b"[");
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                feed(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.update(b"{");
            hasher.update(&(map.len() as u64).to_le_bytes());
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                feed_str(hasher, key);
                feed(hasher, &map[key]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindgraph_core::EntityKind;
    use serde_json::json;

    #[test]
    fn test_hash_is_deterministic() {
        let a = PropertyValue::literal(json!({"b": [1, 2], "a": null}));
        let b = PropertyValue::literal(json!({"a": null, "b": [1, 2]}));
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn test_hash_distinguishes_types_and_kinds() {
        assert_ne!(
            hash_value(&PropertyValue::literal(1)),
            hash_value(&PropertyValue::literal("1"))
        );
        assert_ne!(
            hash_value(&PropertyValue::literal("{{A.x}}")),
            hash_value(&PropertyValue::binding("{{A.x}}"))
        );
        assert_ne!(
            hash_value(&PropertyValue::literal(json!(["ab", "c"]))),
            hash_value(&PropertyValue::literal(json!(["a", "bc"])))
        );
    }

    #[test]
    fn test_integral_floats_match_integers() {
        assert_eq!(
            hash_value(&PropertyValue::literal(json!(2.0))),
            hash_value(&PropertyValue::literal(json!(2)))
        );
    }

    #[test]
    fn test_entity_hash_ignores_data_properties() {
        let a = Entity::new("Api1", EntityKind::Action).with_literal("data", 1);
        let b = Entity::new("Api1", EntityKind::Action).with_literal("data", 2);
        assert_eq!(hash_entity(&a), hash_entity(&b));
        assert_ne!(hash_entity(&a), hash_entity(&a.clone().with_run_on_page_load(true)));
    }
}
