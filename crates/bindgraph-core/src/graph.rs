//! DependencyGraph: the directed graph of property-path dependencies.
//!
//! Nodes are [`PropertyPath`]s; an edge `d -> p` means "`p` reads `d`", so
//! edges run from dependency to dependent and a topological order lists
//! dependencies first.
//!
//! # Incremental maintenance
//!
//! - [`DependencyGraph::add_or_replace_edges`] swaps the whole dependency
//!   set of one path and records the path as *pending*.
//! - [`DependencyGraph::detect_cycles`] only searches the forward-reachable
//!   region of the pending paths, absorbing previously known cycles that
//!   intersect it. When the region grows past `localized_limit` of the graph
//!   it falls back to a full Tarjan scan.
//! - [`DependencyGraph::sort_order`] caches a [`SortOrder`] keyed by the
//!   structure version, so value-only changes never trigger a re-sort.
//!
//! Cyclic paths are excluded from the sort order and reported through
//! [`Cycle`]s; everything else, including paths downstream of a cycle,
//! keeps a valid position.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use indexmap::IndexSet;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CoreError;
use crate::path::PropertyPath;

/// Regions at or below this many nodes are always searched locally.
const LOCALIZED_FLOOR: usize = 64;

/// What a graph node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A binding; the only kind with incoming edges from extraction.
    Binding,
    /// A literal value that bindings may read.
    Literal,
    /// Referenced but not (yet) defined. Pruned once no edge touches it.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathNode {
    pub path: PropertyPath,
    pub kind: NodeKind,
}

/// One strongly connected set of paths that depend on each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cycle {
    pub paths: BTreeSet<PropertyPath>,
}

impl Cycle {
    pub fn contains(&self, path: &PropertyPath) -> bool {
        self.paths.contains(path)
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_paths(f, &self.paths)
    }
}

/// Returned by [`DependencyGraph::topological_order`] while any cycle remains.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("cyclic dependency between {}", DisplayPaths(.paths))]
pub struct CyclicDependencyError {
    pub paths: BTreeSet<PropertyPath>,
}

struct DisplayPaths<'a>(&'a BTreeSet<PropertyPath>);

impl fmt::Display for DisplayPaths<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_paths(f, self.0)
    }
}

fn write_paths(f: &mut fmt::Formatter<'_>, paths: &BTreeSet<PropertyPath>) -> fmt::Result {
    f.write_str("{")?;
    for (i, path) in paths.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{path}")?;
    }
    f.write_str("}")
}

/// The cached linear order over all acyclic paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortOrder {
    /// Dependencies before dependents; ties broken lexically.
    pub order: IndexSet<PropertyPath>,
    /// Paths excluded from `order` because they sit on a cycle.
    pub cyclic: BTreeSet<PropertyPath>,
    /// Structure version this order was computed for.
    pub version: u64,
}

impl SortOrder {
    pub fn position(&self, path: &PropertyPath) -> Option<usize> {
        self.order.get_index_of(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyPath> + '_ {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// How the last [`DependencyGraph::detect_cycles`] call searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleScan {
    /// Nothing pending; the known cycles were returned as-is.
    #[default]
    Cached,
    /// Only `region` nodes were searched.
    Localized { region: usize },
    Full,
}

fn default_localized_limit() -> f64 {
    0.5
}

/// The path dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyGraph {
    graph: StableGraph<PathNode, (), Directed, u32>,
    /// Ordered so prefix ranges find every path under an entity or property.
    index: BTreeMap<PropertyPath, NodeIndex<u32>>,
    /// Bumped whenever a node or edge is added or removed.
    version: u64,
    cycles: Vec<Cycle>,
    #[serde(default = "default_localized_limit")]
    localized_limit: f64,
    #[serde(skip)]
    pending: BTreeSet<PropertyPath>,
    #[serde(skip)]
    sort_cache: Option<SortOrder>,
    #[serde(skip)]
    last_scan: CycleScan,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph {
            graph: StableGraph::new(),
            index: BTreeMap::new(),
            version: 0,
            cycles: Vec::new(),
            localized_limit: default_localized_limit(),
            pending: BTreeSet::new(),
            sort_cache: None,
            last_scan: CycleScan::Cached,
        }
    }

    /// Fraction of the graph a localized cycle search may cover before a
    /// full scan is used instead.
    pub fn set_localized_limit(&mut self, limit: f64) {
        self.localized_limit = limit.clamp(0.0, 1.0);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn contains(&self, path: &PropertyPath) -> bool {
        self.index.contains_key(path)
    }

    pub fn kind(&self, path: &PropertyPath) -> Option<NodeKind> {
        self.index.get(path).map(|&idx| self.graph[idx].kind)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Structure version; changes only when nodes or edges do.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_scan(&self) -> CycleScan {
        self.last_scan
    }

    /// All known paths in lexical order.
    pub fn paths(&self) -> impl Iterator<Item = &PropertyPath> + '_ {
        self.index.keys()
    }

    /// Known paths equal to or below `prefix`, lexically.
    pub fn within<'a>(&'a self, prefix: &'a PropertyPath) -> impl Iterator<Item = &'a PropertyPath> + 'a {
        self.index
            .range(prefix.clone()..)
            .map(|(path, _)| path)
            .take_while(move |path| path.as_str().starts_with(prefix.as_str()))
            .filter(move |path| path.is_within(prefix))
    }

    /// Known paths of one entity, lexically.
    pub fn paths_of_entity<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a PropertyPath> + 'a {
        self.index
            .range::<str, _>((std::ops::Bound::Included(entity), std::ops::Bound::Unbounded))
            .map(|(path, _)| path)
            .take_while(move |path| path.as_str().starts_with(entity))
            .filter(move |path| path.entity() == entity)
    }

    /// Direct dependencies of `path`, lexically.
    pub fn dependencies_of(&self, path: &PropertyPath) -> BTreeSet<PropertyPath> {
        self.neighbors(path, Direction::Incoming)
    }

    /// Direct dependents of `path`, lexically.
    pub fn dependents_of(&self, path: &PropertyPath) -> BTreeSet<PropertyPath> {
        self.neighbors(path, Direction::Outgoing)
    }

    fn neighbors(&self, path: &PropertyPath, dir: Direction) -> BTreeSet<PropertyPath> {
        let Some(&idx) = self.index.get(path) else {
            return BTreeSet::new();
        };
        self.graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].path.clone())
            .collect()
    }

    /// Every path that transitively reads any of `seeds`, excluding the
    /// seeds themselves unless they are reached again through a cycle.
    pub fn transitive_dependents<'a>(
        &self,
        seeds: impl IntoIterator<Item = &'a PropertyPath>,
    ) -> BTreeSet<PropertyPath> {
        self.reach(seeds, Direction::Outgoing)
    }

    /// Every path that any of `seeds` transitively reads.
    pub fn transitive_dependencies<'a>(
        &self,
        seeds: impl IntoIterator<Item = &'a PropertyPath>,
    ) -> BTreeSet<PropertyPath> {
        self.reach(seeds, Direction::Incoming)
    }

    fn reach<'a>(
        &self,
        seeds: impl IntoIterator<Item = &'a PropertyPath>,
        dir: Direction,
    ) -> BTreeSet<PropertyPath> {
        let mut seen: HashSet<NodeIndex<u32>> = HashSet::new();
        let mut queue: VecDeque<NodeIndex<u32>> = seeds
            .into_iter()
            .filter_map(|p| self.index.get(p).copied())
            .collect();
        while let Some(idx) = queue.pop_front() {
            for next in self.graph.neighbors_directed(idx, dir) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen.into_iter()
            .map(|idx| self.graph[idx].path.clone())
            .collect()
    }

    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    pub fn cyclic_paths(&self) -> BTreeSet<PropertyPath> {
        self.cycles
            .iter()
            .flat_map(|c| c.paths.iter().cloned())
            .collect()
    }

    pub fn is_cyclic(&self, path: &PropertyPath) -> bool {
        self.cycles.iter().any(|c| c.contains(path))
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Registers `path` with `kind`, upgrading a placeholder in place.
    pub fn declare(&mut self, path: &PropertyPath, kind: NodeKind) {
        let idx = self.ensure(path, kind);
        self.graph[idx].kind = kind;
    }

    /// Replaces every dependency of `path` with `dependencies`.
    ///
    /// Unknown dependencies become placeholder nodes. Returns `false` when
    /// the set is unchanged, in which case nothing is touched.
    pub fn add_or_replace_edges(
        &mut self,
        path: &PropertyPath,
        dependencies: impl IntoIterator<Item = PropertyPath>,
    ) -> bool {
        let next: BTreeSet<PropertyPath> = dependencies.into_iter().collect();
        let previous = self.dependencies_of(path);
        if self.contains(path) && previous == next {
            return false;
        }
        let node = self.ensure(path, NodeKind::Placeholder);

        let stale: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .map(|e| e.id())
            .collect();
        for edge in stale {
            self.graph.remove_edge(edge);
        }
        for dependency in &next {
            let dep = self.ensure(dependency, NodeKind::Placeholder);
            self.graph.add_edge(dep, node, ());
        }
        for dropped in previous.difference(&next) {
            self.prune_placeholder(dropped);
        }

        self.pending.insert(path.clone());
        self.touch();
        true
    }

    /// Removes `path` and every edge touching it. Returns its former
    /// dependents, which now reference a missing path.
    pub fn remove_path(&mut self, path: &PropertyPath) -> BTreeSet<PropertyPath> {
        let Some(idx) = self.index.remove(path) else {
            return BTreeSet::new();
        };
        let dependents: BTreeSet<PropertyPath> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .filter(|&n| n != idx)
            .map(|n| self.graph[n].path.clone())
            .collect();
        let dependencies: Vec<PropertyPath> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .filter(|&n| n != idx)
            .map(|n| self.graph[n].path.clone())
            .collect();
        self.graph.remove_node(idx);
        self.pending.remove(path);

        // Cycles through the removed node may now be broken; re-check the
        // survivors on the next detection.
        let (broken, kept): (Vec<Cycle>, Vec<Cycle>) = std::mem::take(&mut self.cycles)
            .into_iter()
            .partition(|c| c.contains(path));
        self.cycles = kept;
        for cycle in broken {
            self.pending
                .extend(cycle.paths.into_iter().filter(|p| p != path));
        }

        for dependency in &dependencies {
            self.prune_placeholder(dependency);
        }
        self.touch();
        dependents
    }

    /// Removes every path of `entity`. Returns the dependents outside the
    /// entity that lost a dependency.
    pub fn remove_entity(&mut self, entity: &str) -> BTreeSet<PropertyPath> {
        let paths: Vec<PropertyPath> = self.paths_of_entity(entity).cloned().collect();
        let mut orphaned = BTreeSet::new();
        for path in &paths {
            orphaned.extend(self.remove_path(path));
        }
        orphaned.retain(|p| p.entity() != entity);
        orphaned
    }

    /// Moves every path of `from` under `to` in one step.
    ///
    /// Fails without touching the graph if `to` already owns paths.
    pub fn rename_entity(&mut self, from: &str, to: &str) -> Result<(), CoreError> {
        if from == to {
            return Ok(());
        }
        if self.paths_of_entity(to).next().is_some() {
            return Err(CoreError::EntityExists {
                name: to.to_string(),
            });
        }
        let moved: Vec<(PropertyPath, NodeIndex<u32>)> = self
            .paths_of_entity(from)
            .map(|p| (p.clone(), self.index[p]))
            .collect();
        if moved.is_empty() {
            return Ok(());
        }
        let rename = |p: &PropertyPath| {
            if p.entity() == from {
                p.rename_entity(to)
            } else {
                p.clone()
            }
        };
        for (old, idx) in moved {
            self.index.remove(&old);
            let new = old.rename_entity(to);
            self.graph[idx].path = new.clone();
            self.index.insert(new, idx);
        }
        for cycle in &mut self.cycles {
            cycle.paths = cycle.paths.iter().map(rename).collect();
        }
        self.pending = self.pending.iter().map(rename).collect();
        self.touch();
        Ok(())
    }

    fn ensure(&mut self, path: &PropertyPath, kind: NodeKind) -> NodeIndex<u32> {
        if let Some(&idx) = self.index.get(path) {
            return idx;
        }
        let idx = self.graph.add_node(PathNode {
            path: path.clone(),
            kind,
        });
        self.index.insert(path.clone(), idx);
        self.touch();
        idx
    }

    fn prune_placeholder(&mut self, path: &PropertyPath) {
        let Some(&idx) = self.index.get(path) else {
            return;
        };
        if self.graph[idx].kind != NodeKind::Placeholder {
            return;
        }
        let touched = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .chain(self.graph.neighbors_directed(idx, Direction::Outgoing))
            .next()
            .is_some();
        if !touched {
            self.graph.remove_node(idx);
            self.index.remove(path);
            self.pending.remove(path);
            self.touch();
        }
    }

    fn touch(&mut self) {
        self.version += 1;
        self.sort_cache = None;
    }

    // -----------------------------------------------------------------------
    // Cycle detection
    // -----------------------------------------------------------------------

    /// Brings the known cycle set up to date with every pending change and
    /// returns it.
    pub fn detect_cycles(&mut self) -> &[Cycle] {
        if self.pending.is_empty() {
            self.last_scan = CycleScan::Cached;
            return &self.cycles;
        }
        let pending = std::mem::take(&mut self.pending);
        let seeds: Vec<NodeIndex<u32>> = pending
            .iter()
            .filter_map(|p| self.index.get(p).copied())
            .collect();

        let mut region = self.forward_closure(seeds);
        let mut absorbed = vec![false; self.cycles.len()];
        loop {
            let mut grew = false;
            for (i, cycle) in self.cycles.iter().enumerate() {
                if absorbed[i] {
                    continue;
                }
                let members: Vec<NodeIndex<u32>> = cycle
                    .paths
                    .iter()
                    .filter_map(|p| self.index.get(p).copied())
                    .collect();
                if members.iter().any(|m| region.contains(m)) {
                    absorbed[i] = true;
                    region.extend(self.forward_closure(members));
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        let limit = ((self.graph.node_count() as f64) * self.localized_limit).ceil() as usize;
        if region.len() > limit.max(LOCALIZED_FLOOR) {
            self.full_scan();
            return &self.cycles;
        }

        let mut cycles: Vec<Cycle> = self
            .cycles
            .iter()
            .zip(&absorbed)
            .filter(|(_, gone)| !**gone)
            .map(|(c, _)| c.clone())
            .collect();
        cycles.extend(self.scan_region(&region));
        cycles.sort();
        if cycles != self.cycles {
            self.sort_cache = None;
        }
        self.cycles = cycles;
        self.last_scan = CycleScan::Localized {
            region: region.len(),
        };
        &self.cycles
    }

    /// Recomputes every cycle from scratch.
    pub fn full_scan(&mut self) -> &[Cycle] {
        self.pending.clear();
        let mut cycles: Vec<Cycle> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| self.is_cyclic_scc(scc))
            .map(|scc| self.cycle_of(scc.into_iter()))
            .collect();
        cycles.sort();
        if cycles != self.cycles {
            self.sort_cache = None;
        }
        self.cycles = cycles;
        self.last_scan = CycleScan::Full;
        &self.cycles
    }

    fn forward_closure(&self, seeds: Vec<NodeIndex<u32>>) -> HashSet<NodeIndex<u32>> {
        let mut seen: HashSet<NodeIndex<u32>> = seeds.iter().copied().collect();
        let mut queue: VecDeque<NodeIndex<u32>> = seeds.into();
        while let Some(idx) = queue.pop_front() {
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Tarjan over the subgraph induced by a forward-closed region. Any
    /// cycle through a region node lies entirely inside the region.
    fn scan_region(&self, region: &HashSet<NodeIndex<u32>>) -> Vec<Cycle> {
        let mut sub: DiGraph<NodeIndex<u32>, ()> = DiGraph::with_capacity(region.len(), 0);
        let mut local: HashMap<NodeIndex<u32>, NodeIndex<u32>> = HashMap::with_capacity(region.len());
        for &idx in region {
            local.insert(idx, sub.add_node(idx));
        }
        for &idx in region {
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(&to) = local.get(&next) {
                    sub.add_edge(local[&idx], to, ());
                }
            }
        }
        tarjan_scc(&sub)
            .into_iter()
            .map(|scc| scc.into_iter().map(|n| sub[n]).collect::<Vec<_>>())
            .filter(|scc| self.is_cyclic_scc(scc))
            .map(|scc| self.cycle_of(scc.into_iter()))
            .collect()
    }

    fn is_cyclic_scc(&self, scc: &[NodeIndex<u32>]) -> bool {
        match scc {
            [single] => self.graph.find_edge(*single, *single).is_some(),
            _ => true,
        }
    }

    fn cycle_of(&self, nodes: impl Iterator<Item = NodeIndex<u32>>) -> Cycle {
        Cycle {
            paths: nodes.map(|n| self.graph[n].path.clone()).collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    /// The cached evaluation order over every acyclic path.
    ///
    /// Pending changes are folded into the cycle set first; cyclic paths are
    /// listed in [`SortOrder::cyclic`] instead of the order.
    pub fn sort_order(&mut self) -> &SortOrder {
        self.detect_cycles();
        let fresh = self
            .sort_cache
            .as_ref()
            .is_some_and(|cached| cached.version == self.version);
        if !fresh {
            let order = match self.kahn() {
                Some(order) => order,
                None => {
                    // Only reachable if a cycle slipped past detection.
                    self.full_scan();
                    self.kahn().unwrap_or_else(|| SortOrder {
                        order: IndexSet::new(),
                        cyclic: self.cyclic_paths(),
                        version: self.version,
                    })
                }
            };
            self.sort_cache = Some(order);
        }
        self.sort_cache.get_or_insert_with(|| SortOrder {
            order: IndexSet::new(),
            cyclic: BTreeSet::new(),
            version: 0,
        })
    }

    /// Strict total order; fails while any cycle remains.
    pub fn topological_order(&mut self) -> Result<&SortOrder, CyclicDependencyError> {
        self.detect_cycles();
        if !self.cycles.is_empty() {
            return Err(CyclicDependencyError {
                paths: self.cyclic_paths(),
            });
        }
        Ok(self.sort_order())
    }

    /// Kahn's algorithm over the non-cyclic nodes with a lexical ready set.
    /// Returns `None` if some non-cyclic node never becomes ready.
    fn kahn(&self) -> Option<SortOrder> {
        let cyclic = self.cyclic_paths();
        let is_cyclic = |idx: NodeIndex<u32>| cyclic.contains(&self.graph[idx].path);

        let mut indegree: HashMap<NodeIndex<u32>, usize> = HashMap::new();
        let mut ready: BTreeMap<&PropertyPath, NodeIndex<u32>> = BTreeMap::new();
        for (path, &idx) in &self.index {
            if is_cyclic(idx) {
                continue;
            }
            let degree = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter(|&n| !is_cyclic(n))
                .count();
            if degree == 0 {
                ready.insert(path, idx);
            } else {
                indegree.insert(idx, degree);
            }
        }

        let mut order = IndexSet::with_capacity(self.index.len() - cyclic.len());
        while let Some((path, idx)) = ready.pop_first() {
            order.insert(path.clone());
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = indegree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        indegree.remove(&next);
                        ready.insert(&self.graph[next].path, next);
                    }
                }
            }
        }

        indegree.is_empty().then_some(SortOrder {
            order,
            cyclic,
            version: self.version,
        })
    }
}
