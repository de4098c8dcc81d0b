//! Staged evaluation passes.
//!
//! A [`Pass`] is built from the committed state and a newer snapshot:
//! graph changes and invalidation happen on the pass's private copy of the
//! graph, then affected bindings are evaluated in sort order, a chunk at a
//! time, into a staging map. Nothing is visible to readers until
//! [`Evaluator::commit`] swaps the staged state in. A pass that is dropped
//! instead leaves no trace.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use bindgraph_core::expr::parse_trigger;
use bindgraph_core::{
    Cycle, DependencyGraph, EntitySnapshot, Mutation, PropertyPath, PropertyValue, SortOrder,
};

use crate::context::SnapshotContext;
use crate::diagnostic::Diagnostic;
use crate::error::PassError;
use crate::extract::ParsedBinding;
use crate::interpreter::{
    evaluate, run_trigger, Interpreter, InterpreterConfig, InterpreterError, Mode, TriggerOutcome,
};
use crate::invalidate::{invalidate, AffectedSet, BindingTable, InvalidationPolicy};

/// Committed state of one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Last good value. Errors never overwrite it.
    pub value: Value,
    pub errors: Vec<Diagnostic>,
    /// Set when the last committed pass changed `value` or `errors`.
    pub is_dirty: bool,
}

impl EvaluationResult {
    pub fn ok(value: Value) -> Self {
        EvaluationResult {
            value,
            errors: Vec::new(),
            is_dirty: false,
        }
    }

    fn errored(value: Value, error: Diagnostic) -> Self {
        EvaluationResult {
            value,
            errors: vec![error],
            is_dirty: false,
        }
    }

    pub fn is_errored(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Summary of one committed pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    /// Snapshot version now committed.
    pub version: u64,
    /// Evaluator generation after the commit.
    pub generation: u64,
    /// Every path recomputed by the pass.
    pub affected: BTreeSet<PropertyPath>,
    /// Recomputed paths whose value or errors changed.
    pub changed: BTreeSet<PropertyPath>,
    pub removed: BTreeSet<PropertyPath>,
    /// Errors of recomputed paths.
    pub errors: BTreeMap<PropertyPath, Vec<Diagnostic>>,
    /// Cycles that contain a recomputed path.
    pub cycles: Vec<Cycle>,
}

/// One in-flight evaluation pass.
pub struct Pass {
    base_generation: u64,
    snapshot: EntitySnapshot,
    graph: DependencyGraph,
    bindings: BindingTable,
    affected: AffectedSet,
    /// Affected, acyclic bindings in sort order.
    order: Vec<PropertyPath>,
    cursor: usize,
    staged: BTreeMap<PropertyPath, EvaluationResult>,
    cycles: Vec<Cycle>,
}

impl Pass {
    pub fn version(&self) -> u64 {
        self.snapshot.version
    }

    pub fn affected(&self) -> &AffectedSet {
        &self.affected
    }

    /// Bindings in the order they are evaluated.
    pub fn order(&self) -> &[PropertyPath] {
        &self.order
    }

    pub fn remaining(&self) -> usize {
        self.order.len() - self.cursor
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.order.len()
    }

    /// Staged result for `path`, if the pass produced one so far.
    pub fn staged(&self, path: &PropertyPath) -> Option<&EvaluationResult> {
        self.staged.get(path)
    }

    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }
}

/// Owns the committed graph, parse cache and results.
pub struct Evaluator {
    config: InterpreterConfig,
    policy: InvalidationPolicy,
    localized_limit: Option<f64>,
    generation: u64,
    snapshot: EntitySnapshot,
    graph: DependencyGraph,
    bindings: BindingTable,
    results: BTreeMap<PropertyPath, EvaluationResult>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(InterpreterConfig::default(), InvalidationPolicy::default())
    }
}

impl Evaluator {
    pub fn new(config: InterpreterConfig, policy: InvalidationPolicy) -> Self {
        Evaluator {
            config,
            policy,
            localized_limit: None,
            generation: 0,
            snapshot: EntitySnapshot::new(),
            graph: DependencyGraph::new(),
            bindings: BindingTable::new(),
            results: BTreeMap::new(),
        }
    }

    /// See [`DependencyGraph::set_localized_limit`].
    pub fn with_localized_cycle_limit(mut self, limit: f64) -> Self {
        self.graph.set_localized_limit(limit);
        self.localized_limit = Some(limit);
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> &EntitySnapshot {
        &self.snapshot
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn sort_order(&mut self) -> &SortOrder {
        self.graph.sort_order()
    }

    pub fn result(&self, path: &PropertyPath) -> Option<&EvaluationResult> {
        self.results.get(path)
    }

    pub fn results(&self) -> &BTreeMap<PropertyPath, EvaluationResult> {
        &self.results
    }

    /// Drops all derived state. The next pass evaluates everything.
    pub fn reset(&mut self) {
        self.graph = DependencyGraph::new();
        if let Some(limit) = self.localized_limit {
            self.graph.set_localized_limit(limit);
        }
        self.bindings.clear();
        self.results.clear();
        self.snapshot = EntitySnapshot::new();
        self.generation += 1;
        info!(generation = self.generation, "evaluation cache reset");
    }

    /// Prepares a pass from the committed state to `next`.
    ///
    /// `renames` lists the entity renames applied between the two, in order;
    /// they move graph nodes and results instead of recomputing them.
    pub fn begin_pass(&self, next: EntitySnapshot, renames: &[(String, String)]) -> Pass {
        self.prepare(Cow::Borrowed(&self.snapshot), next, renames)
    }

    /// Prepares a pass that recomputes every path of the committed snapshot.
    pub fn begin_full_pass(&self) -> Pass {
        self.prepare(Cow::Owned(EntitySnapshot::new()), self.snapshot.clone(), &[])
    }

    fn prepare(
        &self,
        mut previous: Cow<'_, EntitySnapshot>,
        next: EntitySnapshot,
        renames: &[(String, String)],
    ) -> Pass {
        let mut graph = self.graph.clone();
        let mut bindings = self.bindings.clone();
        let mut staged = BTreeMap::new();

        // Original entity name -> current name, so chained renames resolve.
        let mut aliases: BTreeMap<String, String> = BTreeMap::new();
        for (from, to) in renames {
            if graph.rename_entity(from, to).is_err() {
                warn!(%from, %to, "rename collides with existing paths, recomputing instead");
                continue;
            }
            let rename = Mutation::RenameEntity {
                from: from.clone(),
                to: to.clone(),
            };
            match previous.apply(std::slice::from_ref(&rename)) {
                Ok(renamed) => previous = Cow::Owned(renamed),
                Err(_) => {
                    let _ = graph.rename_entity(to, from);
                    continue;
                }
            }
            let moved: Vec<PropertyPath> = bindings
                .keys()
                .filter(|p| p.entity() == from)
                .cloned()
                .collect();
            for path in moved {
                if let Some(state) = bindings.remove(&path) {
                    bindings.insert(path.rename_entity(to), state);
                }
            }
            let mut chained = false;
            for current in aliases.values_mut() {
                if current == from {
                    *current = to.clone();
                    chained = true;
                }
            }
            if !chained {
                aliases.insert(from.clone(), to.clone());
            }
        }
        if !aliases.is_empty() {
            for (path, result) in &self.results {
                if let Some(to) = aliases.get(path.entity()) {
                    staged.insert(path.rename_entity(to), result.clone());
                }
            }
            // Rewritten binding texts need fresh syntax trees; their edges
            // were already moved with the graph.
            for (path, text) in next.binding_paths() {
                if let Some(state) = bindings.get_mut(&path) {
                    if state.parsed.text != text {
                        state.parsed = Arc::new(ParsedBinding::parse(text));
                    }
                }
            }
        }

        let arrived: BTreeSet<String> = aliases.values().cloned().collect();
        let affected = invalidate(&previous, &next, &mut graph, &mut bindings, &arrived, self.policy);

        for path in &affected.literals {
            if let Some(PropertyValue::Literal(v)) = next.property(path) {
                staged.insert(path.clone(), EvaluationResult::ok(v.clone()));
            }
        }

        let sort = graph.sort_order();
        let mut positioned: Vec<(usize, &PropertyPath)> = affected
            .bindings
            .iter()
            .filter_map(|p| sort.position(p).map(|i| (i, p)))
            .collect();
        positioned.sort_unstable_by_key(|(i, _)| *i);
        let order: Vec<PropertyPath> = positioned.into_iter().map(|(_, p)| p.clone()).collect();

        let mut cycles = Vec::new();
        for cycle in graph.cycles() {
            let members: Vec<&PropertyPath> = cycle
                .paths
                .iter()
                .filter(|p| affected.bindings.contains(*p))
                .collect();
            if members.is_empty() {
                continue;
            }
            for path in members {
                let prior = staged
                    .get(path)
                    .or_else(|| self.results.get(path))
                    .map(|r| r.value.clone())
                    .unwrap_or(Value::Null);
                staged.insert(
                    path.clone(),
                    EvaluationResult::errored(prior, Diagnostic::cyclic(path, cycle)),
                );
            }
            warn!(cycle = %cycle, "cyclic dependency");
            cycles.push(cycle.clone());
        }

        debug!(
            version = next.version,
            literals = affected.literals.len(),
            bindings = order.len(),
            cyclic = cycles.len(),
            "pass prepared"
        );
        Pass {
            base_generation: self.generation,
            snapshot: next,
            graph,
            bindings,
            affected,
            order,
            cursor: 0,
            staged,
            cycles,
        }
    }

    /// Evaluates up to `budget` more bindings. Returns true once the pass
    /// has nothing left to evaluate.
    pub fn step(&self, pass: &mut Pass, budget: usize) -> bool {
        let end = pass.cursor.saturating_add(budget.max(1)).min(pass.order.len());
        while pass.cursor < end {
            let path = pass.order[pass.cursor].clone();
            let result = self.evaluate_path(pass, &path);
            pass.staged.insert(path, result);
            pass.cursor += 1;
        }
        debug!(done = pass.cursor, total = pass.order.len(), "pass step");
        pass.is_complete()
    }

    pub fn run_to_completion(&self, pass: &mut Pass) {
        while !self.step(pass, usize::MAX) {}
    }

    fn evaluate_path(&self, pass: &Pass, path: &PropertyPath) -> EvaluationResult {
        let prior = pass
            .staged
            .get(path)
            .or_else(|| self.results.get(path))
            .map(|r| r.value.clone())
            .unwrap_or(Value::Null);

        let parsed = match pass.bindings.get(path) {
            Some(state) => state.parsed.clone(),
            None => match pass.snapshot.property(path) {
                Some(PropertyValue::Binding(text)) => Arc::new(ParsedBinding::parse(text)),
                _ => return EvaluationResult::ok(prior),
            },
        };
        let template = match &parsed.template {
            Ok(template) => template,
            Err(e) => return EvaluationResult::errored(prior, Diagnostic::parse(path, e)),
        };

        for dep in pass.graph.dependencies_of(path) {
            let upstream = pass.staged.get(&dep).or_else(|| self.results.get(&dep));
            if let Some(upstream) = upstream.filter(|r| r.is_errored()) {
                return EvaluationResult::errored(prior, Diagnostic::dependency(&dep, &upstream.errors));
            }
        }

        let ctx = SnapshotContext::new(&pass.snapshot, &self.results).with_staged(&pass.staged);
        let mut interpreter = Interpreter::new(&ctx, self.config, Mode::Data);
        match interpreter.evaluate_template(template) {
            Ok(value) => EvaluationResult::ok(value),
            Err(e) => EvaluationResult::errored(prior, Diagnostic::eval(path, &e)),
        }
    }

    /// Swaps a finished pass in as the committed state.
    pub fn commit(&mut self, pass: Pass) -> Result<PassReport, PassError> {
        if pass.base_generation != self.generation {
            return Err(PassError::Stale {
                base: pass.base_generation,
                current: self.generation,
            });
        }
        if !pass.is_complete() {
            return Err(PassError::Incomplete {
                remaining: pass.remaining(),
            });
        }
        let Pass {
            snapshot,
            graph,
            bindings,
            affected,
            staged,
            cycles,
            ..
        } = pass;

        for result in self.results.values_mut() {
            result.is_dirty = false;
        }
        let mut report = PassReport {
            version: snapshot.version,
            generation: self.generation + 1,
            affected: affected.invalidated(),
            removed: affected.removed,
            cycles,
            ..PassReport::default()
        };
        for (path, mut result) in staged {
            result.is_dirty = self
                .results
                .get(&path)
                .map_or(true, |prev| prev.value != result.value || prev.errors != result.errors);
            if result.is_dirty {
                report.changed.insert(path.clone());
            }
            if result.is_errored() {
                report.errors.insert(path.clone(), result.errors.clone());
            }
            self.results.insert(path, result);
        }
        self.results
            .retain(|path, _| snapshot.property(path).is_some());

        self.snapshot = snapshot;
        self.graph = graph;
        self.bindings = bindings;
        self.generation += 1;
        info!(
            version = report.version,
            affected = report.affected.len(),
            changed = report.changed.len(),
            errors = report.errors.len(),
            "pass committed"
        );
        Ok(report)
    }

    /// Prepares, runs and commits one pass.
    pub fn evaluate(&mut self, next: EntitySnapshot, renames: &[(String, String)]) -> PassReport {
        let mut pass = self.begin_pass(next, renames);
        self.run_to_completion(&mut pass);
        // Fresh and complete, so only a broken pass lifecycle is rejected.
        let committed = self.commit(pass);
        debug_assert!(committed.is_ok(), "evaluated pass rejected at commit: {committed:?}");
        committed.unwrap_or_else(|e| {
            warn!(error = %e, "evaluated pass rejected at commit");
            PassReport::default()
        })
    }

    /// Runs trigger code against the committed state.
    pub fn run_trigger_code(
        &self,
        source: &PropertyPath,
        code: &str,
    ) -> Result<TriggerOutcome, Diagnostic> {
        let template = parse_trigger(code).map_err(|e| Diagnostic::parse(source, &e))?;
        let ctx = SnapshotContext::new(&self.snapshot, &self.results);
        run_trigger(&template, &ctx, self.config).map_err(|e| Diagnostic::eval(source, &e))
    }

    /// Evaluates ad-hoc template text against the committed state.
    pub fn evaluate_text(&self, text: &str) -> Result<Value, InterpreterError> {
        let ctx = SnapshotContext::new(&self.snapshot, &self.results);
        evaluate(text, &ctx)
    }
}
