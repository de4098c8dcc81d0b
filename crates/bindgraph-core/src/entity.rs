//! The entity model: widgets, actions, JS objects and the app store.
//!
//! An [`EntitySnapshot`] is an explicitly owned, versioned value. Mutations
//! never happen in place: [`EntitySnapshot::apply`] consumes a batch of
//! [`Mutation`]s and returns the next version.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::expr::reserved::is_reserved;
use crate::expr::rewrite::{rename_in_trigger, rename_references};
use crate::path::{is_identifier, PropertyPath};

/// Name of the entity that exposes the global app store.
pub const APP_STORE_ENTITY: &str = "appsmith";
/// Property of [`APP_STORE_ENTITY`] holding the merged key-value store.
pub const APP_STORE_PROPERTY: &str = "store";

/// Kind of a bindable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Widget,
    Action,
    JsObject,
    AppStore,
}

/// Value held at one property path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// A plain value, never re-evaluated.
    Literal(Value),
    /// Template text with zero or more `{{ }}` expressions.
    Binding(String),
}

impl PropertyValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        PropertyValue::Literal(value.into())
    }

    pub fn binding(text: impl Into<String>) -> Self {
        PropertyValue::Binding(text.into())
    }

    /// Classifies raw property-pane text: anything containing `{{` is a
    /// binding, everything else is a string literal.
    pub fn from_text(text: &str) -> Self {
        if text.contains("{{") {
            PropertyValue::Binding(text.to_string())
        } else {
            PropertyValue::Literal(Value::String(text.to_string()))
        }
    }

    pub fn is_binding(&self) -> bool {
        matches!(self, PropertyValue::Binding(_))
    }

    pub fn as_binding(&self) -> Option<&str> {
        match self {
            PropertyValue::Binding(text) => Some(text),
            PropertyValue::Literal(_) => None,
        }
    }
}

/// A named unit exposing bindable property paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
    /// Relative property key (e.g. `primaryColumns.status`) to value.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Side-effecting code (e.g. `onClick`) kept out of the data graph.
    #[serde(default)]
    pub trigger_properties: BTreeMap<String, String>,
    /// `None` lets page-load analysis decide from widget dependencies.
    #[serde(default)]
    pub run_on_page_load: Option<bool>,
    #[serde(default)]
    pub page_id: Option<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Entity {
            name: name.into(),
            kind,
            properties: BTreeMap::new(),
            trigger_properties: BTreeMap::new(),
            run_on_page_load: None,
            page_id: None,
        }
    }

    pub fn widget(name: impl Into<String>) -> Self {
        Self::new(name, EntityKind::Widget)
    }

    pub fn action(name: impl Into<String>) -> Self {
        Self::new(name, EntityKind::Action)
    }

    pub fn js_object(name: impl Into<String>) -> Self {
        Self::new(name, EntityKind::JsObject)
    }

    /// The app store entity with an initial store object.
    pub fn app_store(store: BTreeMap<String, Value>) -> Self {
        let mut entity = Self::new(APP_STORE_ENTITY, EntityKind::AppStore);
        entity.properties.insert(
            APP_STORE_PROPERTY.to_string(),
            PropertyValue::Literal(Value::Object(store.into_iter().collect())),
        );
        entity
    }

    pub fn with_literal(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties
            .insert(key.to_string(), PropertyValue::Literal(value.into()));
        self
    }

    pub fn with_binding(mut self, key: &str, text: &str) -> Self {
        self.properties
            .insert(key.to_string(), PropertyValue::Binding(text.to_string()));
        self
    }

    pub fn with_trigger(mut self, key: &str, code: &str) -> Self {
        self.trigger_properties
            .insert(key.to_string(), code.to_string());
        self
    }

    pub fn with_run_on_page_load(mut self, run: bool) -> Self {
        self.run_on_page_load = Some(run);
        self
    }

    pub fn on_page(mut self, page_id: &str) -> Self {
        self.page_id = Some(page_id.to_string());
        self
    }

    /// Iterates `(path, value)` for every data property.
    pub fn paths(&self) -> impl Iterator<Item = (PropertyPath, &PropertyValue)> + '_ {
        self.properties
            .iter()
            .filter_map(move |(key, value)| PropertyPath::of(&self.name, key).ok().map(|p| (p, value)))
    }

    fn validate(&self) -> Result<(), CoreError> {
        validate_entity_name(&self.name)?;
        for key in self.properties.keys().chain(self.trigger_properties.keys()) {
            let path = PropertyPath::of(&self.name, key)?;
            if path.property_key() != key {
                return Err(CoreError::InvalidPath {
                    path: format!("{}.{key}", self.name),
                    reason: format!("property key is not canonical (expected '{}')", path.property_key()),
                });
            }
        }
        Ok(())
    }
}

/// Validates a user-supplied entity name.
pub fn validate_entity_name(name: &str) -> Result<(), CoreError> {
    if !is_identifier(name) {
        return Err(CoreError::InvalidEntityName {
            name: name.to_string(),
        });
    }
    if is_reserved(name) {
        return Err(CoreError::ReservedName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// One edit in a logical update batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    AddEntity { entity: Entity },
    RemoveEntity { name: String },
    /// Renames an entity and rewrites every reference to it.
    RenameEntity { from: String, to: String },
    SetProperty { path: PropertyPath, value: PropertyValue },
    RemoveProperty { path: PropertyPath },
    SetTriggerProperty { path: PropertyPath, code: String },
}

/// A versioned, immutable view of every entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub version: u64,
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
}

impl EntitySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds version 0 from a list of entities, validating names and keys.
    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Result<Self, CoreError> {
        let mut snapshot = EntitySnapshot::new();
        for entity in entities {
            entity.validate()?;
            if snapshot.entities.contains_key(&entity.name) {
                return Err(CoreError::EntityExists { name: entity.name });
            }
            snapshot.entities.insert(entity.name.clone(), entity);
        }
        Ok(snapshot)
    }

    /// Re-checks every entity; used after deserializing external snapshots.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, entity) in &self.entities {
            if name != &entity.name {
                return Err(CoreError::InvalidEntityName { name: name.clone() });
            }
            entity.validate()?;
        }
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    pub fn contains_entity(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn property(&self, path: &PropertyPath) -> Option<&PropertyValue> {
        self.entities
            .get(path.entity())?
            .properties
            .get(path.property_key())
    }

    pub fn trigger(&self, path: &PropertyPath) -> Option<&str> {
        self.entities
            .get(path.entity())?
            .trigger_properties
            .get(path.property_key())
            .map(String::as_str)
    }

    /// Every data path in lexical entity order.
    pub fn paths(&self) -> impl Iterator<Item = (PropertyPath, &PropertyValue)> + '_ {
        self.entities.values().flat_map(Entity::paths)
    }

    pub fn binding_paths(&self) -> impl Iterator<Item = (PropertyPath, &str)> + '_ {
        self.paths()
            .filter_map(|(path, value)| value.as_binding().map(|text| (path, text)))
    }

    pub fn entities_of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.values().filter(move |e| e.kind == kind)
    }

    /// Applies one logical batch, producing `version + 1`.
    ///
    /// The batch is all-or-nothing: on error `self` is untouched and no new
    /// version exists.
    pub fn apply(&self, batch: &[Mutation]) -> Result<EntitySnapshot, CoreError> {
        let mut next = self.clone();
        for mutation in batch {
            next.apply_one(mutation)?;
        }
        next.version = self.version + 1;
        Ok(next)
    }

    fn apply_one(&mut self, mutation: &Mutation) -> Result<(), CoreError> {
        match mutation {
            Mutation::AddEntity { entity } => {
                entity.validate()?;
                if self.entities.contains_key(&entity.name) {
                    return Err(CoreError::EntityExists {
                        name: entity.name.clone(),
                    });
                }
                self.entities.insert(entity.name.clone(), entity.clone());
            }
            Mutation::RemoveEntity { name } => {
                self.entities
                    .remove(name)
                    .ok_or_else(|| CoreError::EntityNotFound { name: name.clone() })?;
            }
            Mutation::RenameEntity { from, to } => self.rename(from, to)?,
            Mutation::SetProperty { path, value } => {
                let key = property_key(path)?;
                self.entity_mut(path.entity())?
                    .properties
                    .insert(key, value.clone());
            }
            Mutation::RemoveProperty { path } => {
                let key = property_key(path)?;
                self.entity_mut(path.entity())?
                    .properties
                    .remove(&key)
                    .ok_or_else(|| CoreError::PropertyNotFound { path: path.clone() })?;
            }
            Mutation::SetTriggerProperty { path, code } => {
                let key = property_key(path)?;
                self.entity_mut(path.entity())?
                    .trigger_properties
                    .insert(key, code.clone());
            }
        }
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), CoreError> {
        validate_entity_name(to)?;
        if self.entities.contains_key(to) {
            return Err(CoreError::EntityExists {
                name: to.to_string(),
            });
        }
        let mut entity = self
            .entities
            .remove(from)
            .ok_or_else(|| CoreError::EntityNotFound {
                name: from.to_string(),
            })?;
        entity.name = to.to_string();
        self.entities.insert(to.to_string(), entity);

        for entity in self.entities.values_mut() {
            for value in entity.properties.values_mut() {
                if let PropertyValue::Binding(text) = value {
                    *text = rename_references(text, from, to);
                }
            }
            for code in entity.trigger_properties.values_mut() {
                *code = rename_in_trigger(code, from, to);
            }
        }
        Ok(())
    }

    fn entity_mut(&mut self, name: &str) -> Result<&mut Entity, CoreError> {
        self.entities
            .get_mut(name)
            .ok_or_else(|| CoreError::EntityNotFound {
                name: name.to_string(),
            })
    }
}

fn property_key(path: &PropertyPath) -> Result<String, CoreError> {
    if path.is_entity_root() {
        return Err(CoreError::NotAProperty { path: path.clone() });
    }
    Ok(path.property_key().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> PropertyPath {
        PropertyPath::parse(raw).unwrap()
    }

    fn sample() -> EntitySnapshot {
        EntitySnapshot::from_entities([
            Entity::widget("Input1").with_literal("text", "hello"),
            Entity::widget("Text1").with_binding("text", "{{Input1.text.toUpperCase()}}"),
            Entity::action("Api1").with_literal("data", json!([])),
        ])
        .unwrap()
    }

    #[test]
    fn from_text_classifies_bindings() {
        assert!(PropertyValue::from_text("Hi {{A.x}}").is_binding());
        assert_eq!(PropertyValue::from_text("plain"), PropertyValue::literal("plain"));
    }

    #[test]
    fn paths_are_lexical_and_qualified() {
        let snapshot = sample();
        let paths: Vec<String> = snapshot.paths().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, vec!["Api1.data", "Input1.text", "Text1.text"]);
        let bindings: Vec<_> = snapshot.binding_paths().map(|(p, _)| p.to_string()).collect();
        assert_eq!(bindings, vec!["Text1.text"]);
    }

    #[test]
    fn apply_bumps_version_once_per_batch() {
        let snapshot = sample();
        let next = snapshot
            .apply(&[
                Mutation::SetProperty {
                    path: path("Input1.text"),
                    value: PropertyValue::literal("a"),
                },
                Mutation::SetProperty {
                    path: path("Input1.placeholder"),
                    value: PropertyValue::literal("b"),
                },
            ])
            .unwrap();
        assert_eq!(next.version, snapshot.version + 1);
        assert_eq!(
            next.property(&path("Input1.text")),
            Some(&PropertyValue::literal("a"))
        );
    }

    #[test]
    fn failed_batch_leaves_snapshot_untouched() {
        let snapshot = sample();
        let err = snapshot
            .apply(&[
                Mutation::RemoveEntity { name: "Api1".into() },
                Mutation::RemoveEntity { name: "Missing".into() },
            ])
            .unwrap_err();
        assert!(matches!(err, CoreError::EntityNotFound { .. }));
        assert!(snapshot.contains_entity("Api1"));
    }

    #[test]
    fn rename_rewrites_references() {
        let snapshot = sample();
        let next = snapshot
            .apply(&[Mutation::RenameEntity {
                from: "Input1".into(),
                to: "NameInput".into(),
            }])
            .unwrap();
        assert!(!next.contains_entity("Input1"));
        assert_eq!(
            next.property(&path("Text1.text")),
            Some(&PropertyValue::binding("{{NameInput.text.toUpperCase()}}"))
        );
    }

    #[test]
    fn rejects_reserved_and_duplicate_names() {
        let err = EntitySnapshot::from_entities([Entity::widget("Math")]).unwrap_err();
        assert!(matches!(err, CoreError::ReservedName { .. }));

        let err = sample()
            .apply(&[Mutation::RenameEntity {
                from: "Input1".into(),
                to: "Text1".into(),
            }])
            .unwrap_err();
        assert!(matches!(err, CoreError::EntityExists { .. }));
    }

    #[test]
    fn rejects_non_canonical_keys() {
        let entity = Entity::widget("W").with_literal("a['b']", 1);
        assert!(EntitySnapshot::from_entities([entity]).is_err());
    }

    #[test]
    fn set_property_requires_property_path() {
        let err = sample()
            .apply(&[Mutation::SetProperty {
                path: path("Input1"),
                value: PropertyValue::literal(1),
            }])
            .unwrap_err();
        assert!(matches!(err, CoreError::NotAProperty { .. }));
    }

    #[test]
    fn snapshot_serde_roundtrip() {
        let snapshot = sample();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: EntitySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
