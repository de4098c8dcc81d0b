//! Dependency extraction.
//!
//! Turns binding text into the set of property paths it reads. Extraction is
//! pure: it looks only at the parsed template and a [`PathIndex`] of the
//! snapshot being evaluated, and malformed text is reported to the caller as
//! a [`SyntaxError`] rather than raised.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use bindgraph_core::expr::reserved::is_reserved;
use bindgraph_core::expr::{parse_template, Template};
use bindgraph_core::{EntityKind, EntitySnapshot, PropertyPath, SyntaxError};

use crate::reference::{references, Reference};

/// Entity names and data paths known in one snapshot.
#[derive(Debug, Clone, Default)]
pub struct PathIndex {
    entities: BTreeMap<String, EntityKind>,
    paths: BTreeSet<PropertyPath>,
}

impl PathIndex {
    pub fn from_snapshot(snapshot: &EntitySnapshot) -> Self {
        PathIndex {
            entities: snapshot
                .entities
                .values()
                .map(|e| (e.name.clone(), e.kind))
                .collect(),
            paths: snapshot.paths().map(|(path, _)| path).collect(),
        }
    }

    pub fn is_entity(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn entity_kind(&self, name: &str) -> Option<EntityKind> {
        self.entities.get(name).copied()
    }

    pub fn contains(&self, path: &PropertyPath) -> bool {
        self.paths.contains(path)
    }

    /// `prefix` itself (if known) and every known path below it.
    pub fn within<'a>(&'a self, prefix: &'a PropertyPath) -> impl Iterator<Item = &'a PropertyPath> + 'a {
        self.paths
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .take_while(move |p| p.as_str().starts_with(prefix.as_str()))
            .filter(move |p| p.is_within(prefix))
    }
}

/// Binding text with its parse result, cached per path between passes.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBinding {
    pub text: String,
    pub template: Result<Template, SyntaxError>,
}

impl ParsedBinding {
    pub fn parse(text: &str) -> Self {
        ParsedBinding {
            text: text.to_string(),
            template: parse_template(text),
        }
    }
}

/// What one binding reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub dependencies: BTreeSet<PropertyPath>,
    /// Root identifiers that matched neither an entity nor a global. When an
    /// entity with one of these names appears the binding must be
    /// re-extracted.
    pub unresolved: BTreeSet<String>,
}

/// Extracts the dependencies of the binding at `path`.
///
/// The union over every `{{ }}` part is returned. References are resolved
/// against `index`:
///
/// - roots that are not entities are ignored (globals, locals, typos);
/// - a bare entity name depends on every known path of that entity other
///   than `path` itself;
/// - a deeper reference depends on its longest known prefix plus every known
///   path below it;
/// - a reference with no known prefix or descendant becomes a placeholder
///   on the full referenced path.
pub fn extract_dependencies(path: &PropertyPath, template: &Template, index: &PathIndex) -> Extraction {
    let mut extraction = Extraction::default();
    for expr in template.expressions() {
        for reference in references(expr) {
            resolve(path, &reference, index, &mut extraction);
        }
    }
    extraction
}

/// Parses `text` and extracts its dependencies.
pub fn extract(path: &PropertyPath, text: &str, index: &PathIndex) -> Result<Extraction, SyntaxError> {
    let template = parse_template(text)?;
    Ok(extract_dependencies(path, &template, index))
}

fn resolve(dependent: &PropertyPath, reference: &Reference<'_>, index: &PathIndex, out: &mut Extraction) {
    if !index.is_entity(reference.root) {
        if !is_reserved(reference.root) {
            out.unresolved.insert(reference.root.to_string());
        }
        return;
    }
    let full = PropertyPath::from_segments(reference.root, &reference.segments);

    if reference.segments.is_empty() {
        let before = out.dependencies.len();
        out.dependencies.extend(
            index
                .within(&full)
                .filter(|p| *p != dependent && !p.is_entity_root())
                .cloned(),
        );
        if out.dependencies.len() == before {
            out.dependencies.insert(full);
        }
        return;
    }

    let mut found = false;
    for depth in (1..=reference.segments.len()).rev() {
        let prefix = PropertyPath::from_segments(reference.root, &reference.segments[..depth]);
        if index.contains(&prefix) {
            out.dependencies.insert(prefix);
            found = true;
            break;
        }
    }
    for below in index.within(&full).filter(|p| *p != &full) {
        out.dependencies.insert(below.clone());
        found = true;
    }
    if !found {
        out.dependencies.insert(full);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindgraph_core::Entity;

    fn path(raw: &str) -> PropertyPath {
        PropertyPath::parse(raw).unwrap()
    }

    fn index() -> PathIndex {
        let snapshot = EntitySnapshot::from_entities([
            Entity::widget("A").with_literal("x", 5),
            Entity::widget("Table1")
                .with_literal("data", serde_json::json!([]))
                .with_binding("selectedRow", "{{Table1.data[0]}}")
                .with_literal("primaryColumns.status.label", "Status"),
            Entity::action("Api1").with_literal("data", 1),
        ])
        .unwrap();
        PathIndex::from_snapshot(&snapshot)
    }

    fn deps(text: &str) -> BTreeSet<PropertyPath> {
        extract(&path("B.y"), text, &index()).unwrap().dependencies
    }

    #[test]
    fn simple_reference() {
        assert_eq!(deps("{{A.x + 1}}"), [path("A.x")].into());
    }

    #[test]
    fn union_across_template_parts() {
        assert_eq!(
            deps("{{A.x}} rows: {{Api1.data.length}}"),
            [path("A.x"), path("Api1.data")].into()
        );
    }

    #[test]
    fn bare_entity_depends_on_every_path() {
        assert_eq!(
            deps("{{Table1}}"),
            [
                path("Table1.data"),
                path("Table1.primaryColumns.status.label"),
                path("Table1.selectedRow"),
            ]
            .into()
        );
    }

    #[test]
    fn bare_entity_skips_the_dependent_itself() {
        let extraction = extract(&path("Table1.selectedRow"), "{{Object.keys(Table1)}}", &index()).unwrap();
        assert!(!extraction.dependencies.contains(&path("Table1.selectedRow")));
        assert!(extraction.dependencies.contains(&path("Table1.data")));
    }

    #[test]
    fn partial_path_expands_to_descendants() {
        assert_eq!(
            deps("{{Table1.primaryColumns}}"),
            [path("Table1.primaryColumns.status.label")].into()
        );
    }

    #[test]
    fn deep_reference_uses_longest_known_prefix() {
        assert_eq!(deps("{{Table1.data[3].name}}"), [path("Table1.data")].into());
    }

    #[test]
    fn unknown_property_becomes_placeholder() {
        assert_eq!(deps("{{A.missing}}"), [path("A.missing")].into());
    }

    #[test]
    fn globals_and_unknown_roots_are_ignored() {
        let extraction = extract(
            &path("B.y"),
            "{{Math.max(A.x, 3) + Later.value + items.map(i => i)}}",
            &index(),
        )
        .unwrap();
        assert_eq!(extraction.dependencies, [path("A.x")].into());
        assert_eq!(
            extraction.unresolved,
            ["Later".to_string(), "items".to_string()].into()
        );
    }

    #[test]
    fn identifiers_inside_strings_are_not_references() {
        assert!(deps("{{'A.x'}}").is_empty());
    }

    #[test]
    fn parse_errors_are_returned() {
        let err = extract(&path("B.y"), "{{A.x +}}", &index()).unwrap_err();
        assert!(err.span.start >= 2);
    }
}
