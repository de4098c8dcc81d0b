//! Diff/invalidation engine.
//!
//! Folds the difference between two snapshots into the dependency graph and
//! returns the set of paths a pass must recompute. The graph passed in is the
//! pass's private copy, so nothing here is visible until the pass commits.
//!
//! The result is always a superset of the minimal set. How far it may
//! over-invalidate on structural changes is the [`InvalidationPolicy`].

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use bindgraph_core::{DependencyGraph, EntitySnapshot, NodeKind, PropertyPath, PropertyValue};
use bindgraph_store::diff_snapshots;

use crate::extract::{extract_dependencies, ParsedBinding, PathIndex};

/// Which bindings are re-extracted when the set of known paths changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationPolicy {
    /// Changed bindings, bindings that read a path of an entity that gained
    /// or lost paths, and bindings naming a newly added entity.
    #[default]
    Precise,
    /// Every binding on any structural change.
    Conservative,
}

impl FromStr for InvalidationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "precise" => Ok(InvalidationPolicy::Precise),
            "conservative" => Ok(InvalidationPolicy::Conservative),
            other => Err(format!(
                "unknown invalidation policy '{other}' (expected precise or conservative)"
            )),
        }
    }
}

/// Paths a pass must recompute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedSet {
    /// Changed literal paths; their committed value is simply replaced.
    pub literals: BTreeSet<PropertyPath>,
    /// Binding paths the evaluator re-executes.
    pub bindings: BTreeSet<PropertyPath>,
    /// Paths that no longer exist.
    pub removed: BTreeSet<PropertyPath>,
}

impl AffectedSet {
    /// Every path whose result is recomputed.
    pub fn invalidated(&self) -> BTreeSet<PropertyPath> {
        self.literals.union(&self.bindings).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty() && self.bindings.is_empty() && self.removed.is_empty()
    }
}

/// Parsed text and unresolved roots of one binding.
#[derive(Debug, Clone)]
pub struct BindingState {
    pub parsed: Arc<ParsedBinding>,
    pub unresolved: BTreeSet<String>,
}

pub type BindingTable = BTreeMap<PropertyPath, BindingState>;

/// Applies `previous -> next` to `graph` and `bindings`, returning what must
/// be recomputed.
///
/// `arrived` names entities that exist in `next` without showing up in the
/// diff, i.e. rename targets already folded into `previous`. Bindings still
/// waiting on one of those names are re-extracted under either policy.
pub fn invalidate(
    previous: &EntitySnapshot,
    next: &EntitySnapshot,
    graph: &mut DependencyGraph,
    bindings: &mut BindingTable,
    arrived: &BTreeSet<String>,
    policy: InvalidationPolicy,
) -> AffectedSet {
    let diff = diff_snapshots(previous, next);
    let index = PathIndex::from_snapshot(next);
    let mut affected = AffectedSet::default();
    let mut reextract: BTreeSet<PropertyPath> = BTreeSet::new();
    let mut orphans: BTreeSet<PropertyPath> = BTreeSet::new();
    let mut seeds: BTreeSet<PropertyPath> = BTreeSet::new();

    for path in &diff.removed {
        bindings.remove(path);
        orphans.extend(graph.remove_path(path));
        affected.removed.insert(path.clone());
    }
    for name in &diff.entities_removed {
        orphans.extend(graph.remove_entity(name));
    }

    for path in diff.added.iter().chain(&diff.modified) {
        match next.property(path) {
            Some(PropertyValue::Literal(_)) => {
                if graph.kind(path) == Some(NodeKind::Binding) {
                    graph.add_or_replace_edges(path, Vec::new());
                }
                graph.declare(path, NodeKind::Literal);
                bindings.remove(path);
                affected.literals.insert(path.clone());
                seeds.insert(path.clone());
            }
            Some(PropertyValue::Binding(_)) => {
                graph.declare(path, NodeKind::Binding);
                affected.bindings.insert(path.clone());
                reextract.insert(path.clone());
            }
            None => {}
        }
    }

    if diff.is_structural() {
        match policy {
            InvalidationPolicy::Conservative => {
                reextract.extend(next.binding_paths().map(|(path, _)| path));
            }
            InvalidationPolicy::Precise => {
                let touched: BTreeSet<&str> = diff
                    .added
                    .iter()
                    .chain(&diff.removed)
                    .map(PropertyPath::entity)
                    .chain(diff.entities_added.iter().map(String::as_str))
                    .collect();
                for entity in touched {
                    for path in graph.paths_of_entity(entity) {
                        reextract.extend(graph.dependents_of(path));
                    }
                }
                for name in &diff.entities_added {
                    reextract.extend(
                        bindings
                            .iter()
                            .filter(|(_, state)| state.unresolved.contains(name))
                            .map(|(path, _)| path.clone()),
                    );
                }
            }
        }
    }
    reextract.extend(
        bindings
            .iter()
            .filter(|(_, state)| state.unresolved.iter().any(|name| arrived.contains(name)))
            .map(|(path, _)| path.clone()),
    );
    reextract.extend(orphans.iter().cloned());

    for path in &reextract {
        let Some(PropertyValue::Binding(text)) = next.property(path) else {
            continue;
        };
        let parsed = match bindings.get(path) {
            Some(state) if state.parsed.text == *text => state.parsed.clone(),
            _ => Arc::new(ParsedBinding::parse(text)),
        };
        let extraction = match &parsed.template {
            Ok(template) => extract_dependencies(path, template, &index),
            Err(_) => Default::default(),
        };
        graph.declare(path, NodeKind::Binding);
        if graph.add_or_replace_edges(path, extraction.dependencies) {
            affected.bindings.insert(path.clone());
        }
        bindings.insert(
            path.clone(),
            BindingState {
                parsed,
                unresolved: extraction.unresolved,
            },
        );
    }
    affected
        .bindings
        .extend(orphans.into_iter().filter(|p| next.property(p).is_some_and(PropertyValue::is_binding)));

    seeds.extend(affected.bindings.iter().cloned());
    let downstream = graph.transitive_dependents(&seeds);
    affected
        .bindings
        .extend(downstream.into_iter().filter(|p| graph.kind(p) == Some(NodeKind::Binding)));
    affected
        .bindings
        .retain(|p| next.property(p).is_some_and(PropertyValue::is_binding));

    debug!(
        added = diff.added.len(),
        modified = diff.modified.len(),
        removed = diff.removed.len(),
        reextracted = reextract.len(),
        literals = affected.literals.len(),
        bindings = affected.bindings.len(),
        "invalidation computed"
    );
    affected
}
