//! Canonical property paths.
//!
//! A [`PropertyPath`] identifies one property of one entity, e.g.
//! `Table1.primaryColumns.status.computedValue` or `List1.items[0].label`.
//! Paths are stored in canonical string form so that two spellings of the
//! same property (`A["x"]` and `A.x`) compare equal and sort lexically.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::CoreError;

/// One step below the entity name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, ".{key}"),
            Segment::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// A canonical dotted/bracketed path string.
///
/// Ordering is plain string ordering, which the dependency graph relies on
/// for deterministic tie-breaking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PropertyPath(String);

impl PropertyPath {
    /// Parses and canonicalizes a path string.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let (entity, segments) = split_raw(raw)?;
        Ok(Self::from_segments(entity, &segments))
    }

    /// Builds a path for a single entity with no property segments.
    pub fn entity_root(name: &str) -> Result<Self, CoreError> {
        if !is_identifier(name) {
            return Err(CoreError::InvalidEntityName {
                name: name.to_string(),
            });
        }
        Ok(PropertyPath(name.to_string()))
    }

    /// Builds the path of property `key` (itself a relative path such as
    /// `primaryColumns.status`) on entity `entity`.
    pub fn of(entity: &str, key: &str) -> Result<Self, CoreError> {
        if key.starts_with('[') {
            Self::parse(&format!("{entity}{key}"))
        } else {
            Self::parse(&format!("{entity}.{key}"))
        }
    }

    pub fn from_segments(entity: &str, segments: &[Segment]) -> Self {
        let mut out = String::with_capacity(entity.len() + segments.len() * 8);
        out.push_str(entity);
        for segment in segments {
            match segment {
                Segment::Key(key) => {
                    out.push('.');
                    out.push_str(key);
                }
                Segment::Index(index) => {
                    out.push('[');
                    out.push_str(&index.to_string());
                    out.push(']');
                }
            }
        }
        PropertyPath(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The owning entity's name.
    pub fn entity(&self) -> &str {
        let end = self.0.find(['.', '[']).unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// The property part relative to the entity (`""` for an entity root).
    pub fn property_key(&self) -> &str {
        let rest = &self.0[self.entity().len()..];
        rest.strip_prefix('.').unwrap_or(rest)
    }

    pub fn is_entity_root(&self) -> bool {
        self.entity().len() == self.0.len()
    }

    /// Segments below the entity name.
    pub fn segments(&self) -> SmallVec<[Segment; 4]> {
        // Canonical paths always re-split cleanly.
        split_raw(&self.0)
            .map(|(_, segments)| segments)
            .unwrap_or_default()
    }

    pub fn parent(&self) -> Option<PropertyPath> {
        let segments = self.segments();
        if segments.is_empty() {
            return None;
        }
        Some(Self::from_segments(
            self.entity(),
            &segments[..segments.len() - 1],
        ))
    }

    pub fn child(&self, key: &str) -> PropertyPath {
        PropertyPath(format!("{}.{key}", self.0))
    }

    pub fn index(&self, index: usize) -> PropertyPath {
        PropertyPath(format!("{}[{index}]", self.0))
    }

    /// True when `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &PropertyPath) -> bool {
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(&ancestor.0)
            && matches!(self.0.as_bytes()[ancestor.0.len()], b'.' | b'[')
    }

    /// True when `self` equals `other` or lies below it.
    pub fn is_within(&self, other: &PropertyPath) -> bool {
        self == other || self.is_descendant_of(other)
    }

    /// Returns the same path under a different entity name.
    pub fn rename_entity(&self, new_entity: &str) -> PropertyPath {
        PropertyPath(format!("{new_entity}{}", &self.0[self.entity().len()..]))
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PropertyPath {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PropertyPath::parse(&value)
    }
}

// Ord and Hash come from the inner string, so borrowed lookups agree.
impl std::borrow::Borrow<str> for PropertyPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<PropertyPath> for String {
    fn from(path: PropertyPath) -> Self {
        path.0
    }
}

impl std::str::FromStr for PropertyPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PropertyPath::parse(s)
    }
}

/// Returns true if `name` is a valid JS-style identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn invalid(raw: &str, reason: &str) -> CoreError {
    CoreError::InvalidPath {
        path: raw.to_string(),
        reason: reason.to_string(),
    }
}

fn split_raw(raw: &str) -> Result<(&str, SmallVec<[Segment; 4]>), CoreError> {
    let entity_end = raw.find(['.', '[']).unwrap_or(raw.len());
    let entity = &raw[..entity_end];
    if !is_identifier(entity) {
        return Err(invalid(raw, "entity name is not an identifier"));
    }

    let bytes = raw.as_bytes();
    let mut segments = SmallVec::new();
    let mut i = entity_end;
    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                let start = i + 1;
                let end = raw[start..]
                    .find(['.', '['])
                    .map_or(raw.len(), |offset| start + offset);
                let key = &raw[start..end];
                if key.is_empty() {
                    return Err(invalid(raw, "empty key segment"));
                }
                if key.contains(']') {
                    return Err(invalid(raw, "unbalanced ']'"));
                }
                segments.push(Segment::Key(key.to_string()));
                i = end;
            }
            b'[' => {
                let close = raw[i..]
                    .find(']')
                    .map(|offset| i + offset)
                    .ok_or_else(|| invalid(raw, "unterminated '['"))?;
                let inner = raw[i + 1..close].trim();
                let segment = if let Ok(index) = inner.parse::<usize>() {
                    Segment::Index(index)
                } else if let Some(key) = unquote(inner) {
                    if key.is_empty() || key.contains(['.', '[', ']']) {
                        return Err(invalid(raw, "bracket key cannot be expressed canonically"));
                    }
                    Segment::Key(key.to_string())
                } else {
                    return Err(invalid(raw, "bracket segment must be an index or quoted key"));
                };
                segments.push(segment);
                i = close + 1;
            }
            _ => return Err(invalid(raw, "expected '.' or '['")),
        }
    }
    Ok((entity, segments))
}

fn unquote(inner: &str) -> Option<&str> {
    let quoted = (inner.starts_with('"') && inner.ends_with('"'))
        || (inner.starts_with('\'') && inner.ends_with('\''));
    (quoted && inner.len() >= 2).then(|| &inner[1..inner.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(raw: &str) -> PropertyPath {
        PropertyPath::parse(raw).unwrap()
    }

    #[test]
    fn canonicalizes_quoted_brackets() {
        assert_eq!(p("Table1[\"data\"][0]['name']").as_str(), "Table1.data[0].name");
        assert_eq!(p("A.x"), p("A['x']"));
    }

    #[test]
    fn entity_and_property_key() {
        let path = p("Table1.primaryColumns.status.computedValue");
        assert_eq!(path.entity(), "Table1");
        assert_eq!(path.property_key(), "primaryColumns.status.computedValue");
        assert!(!path.is_entity_root());
        assert!(p("Api1").is_entity_root());
        assert_eq!(p("List1[2].x").property_key(), "[2].x");
    }

    #[test]
    fn descendant_checks_respect_segment_boundaries() {
        let parent = p("Table1.data");
        assert!(p("Table1.data.rows").is_descendant_of(&parent));
        assert!(p("Table1.data[3]").is_descendant_of(&parent));
        assert!(!p("Table1.dataset").is_descendant_of(&parent));
        assert!(!parent.is_descendant_of(&parent));
        assert!(parent.is_within(&parent));
    }

    #[test]
    fn parent_and_child() {
        let path = p("A.b[1].c");
        assert_eq!(path.parent(), Some(p("A.b[1]")));
        assert_eq!(p("A").parent(), None);
        assert_eq!(p("A.b").child("c"), p("A.b.c"));
        assert_eq!(p("A.b").index(4), p("A.b[4]"));
    }

    #[test]
    fn rename_keeps_segments() {
        assert_eq!(p("Old.x[0].y").rename_entity("New"), p("New.x[0].y"));
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(PropertyPath::parse("1abc.x").is_err());
        assert!(PropertyPath::parse("A..x").is_err());
        assert!(PropertyPath::parse("A[").is_err());
        assert!(PropertyPath::parse("A[foo]").is_err());
        assert!(PropertyPath::parse("A.x]").is_err());
    }

    #[test]
    fn serde_uses_canonical_string() {
        let json = serde_json::to_string(&p("A['x']")).unwrap();
        assert_eq!(json, "\"A.x\"");
        let back: PropertyPath = serde_json::from_str("\"B[0]\"").unwrap();
        assert_eq!(back.as_str(), "B[0]");
        assert!(serde_json::from_str::<PropertyPath>("\"..\"").is_err());
    }
}
