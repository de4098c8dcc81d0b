//! Pass orchestration.
//!
//! [`Engine`] owns one [`Evaluator`] plus the newest snapshot submitted to
//! it. Mutation batches are staged onto that snapshot; a pass then carries
//! the committed state forward to it. Subscribers and cycle reporters are
//! notified once per committed pass, never for a pass that was dropped.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use bindgraph_core::{EntitySnapshot, Mutation, PropertyPath};
use bindgraph_eval::{EvalContext, EvaluationResult, Evaluator, Pass, PassReport, SnapshotContext, TriggerOutcome};
use bindgraph_store::EntitySnapshotProvider;

use crate::config::EngineConfig;
use crate::error::{RuntimeError, SchedulerError};
use crate::scheduler::{plan_page_load, PageLoadPlan, ACTION_OUTPUT_KEYS};

pub type PassCallback = Box<dyn Fn(&PassReport) + Send + Sync>;
pub type CycleCallback = Box<dyn Fn(&BTreeSet<PropertyPath>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

/// A pass begun by the engine, tagged with the staging sequence it covers.
pub struct StagedPass {
    pass: Pass,
    seq: u64,
}

impl StagedPass {
    pub fn pass(&self) -> &Pass {
        &self.pass
    }
}

pub struct Engine {
    config: EngineConfig,
    evaluator: Evaluator,
    latest: EntitySnapshot,
    /// Bumped by every staged batch, replacement and cache reset.
    seq: u64,
    committed_seq: u64,
    /// Renames staged since the last commit, tagged with their sequence.
    renames: Vec<(u64, String, String)>,
    subscribers: Vec<(SubscriptionId, PassCallback)>,
    cycle_reporters: Vec<CycleCallback>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let evaluator = Evaluator::new(config.interpreter, config.invalidation)
            .with_localized_cycle_limit(config.localized_cycle_limit);
        Engine {
            config,
            evaluator,
            latest: EntitySnapshot::new(),
            seq: 0,
            committed_seq: 0,
            renames: Vec::new(),
            subscribers: Vec::new(),
            cycle_reporters: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// The committed snapshot.
    pub fn snapshot(&self) -> &EntitySnapshot {
        self.evaluator.snapshot()
    }

    /// The newest staged snapshot, possibly not yet evaluated.
    pub fn latest(&self) -> &EntitySnapshot {
        &self.latest
    }

    /// Whether staged changes are waiting for a pass.
    pub fn has_pending(&self) -> bool {
        self.seq != self.committed_seq
    }

    pub fn evaluation_result(&self, path: &PropertyPath) -> Option<&EvaluationResult> {
        self.evaluator.result(path)
    }

    /// Registers a callback fired once per committed pass.
    pub fn subscribe(&mut self, callback: impl Fn(&PassReport) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    /// Registers a callback for cyclic path sets found during a pass or a
    /// page-load plan.
    pub fn on_cyclic_dependency(&mut self, callback: impl Fn(&BTreeSet<PropertyPath>) + Send + Sync + 'static) {
        self.cycle_reporters.push(Box::new(callback));
    }

    pub fn report_cyclic_dependency(&self, paths: &BTreeSet<PropertyPath>) {
        warn!(paths = ?paths, "cyclic dependency reported");
        for report in &self.cycle_reporters {
            report(paths);
        }
    }

    /// Applies a mutation batch to the newest snapshot without evaluating.
    /// Returns the new snapshot version.
    pub fn stage(&mut self, batch: &[Mutation]) -> Result<u64, RuntimeError> {
        let next = self.latest.apply(batch)?;
        self.seq += 1;
        for mutation in batch {
            if let Mutation::RenameEntity { from, to } = mutation {
                self.renames.push((self.seq, from.clone(), to.clone()));
            }
        }
        self.latest = next;
        debug!(version = self.latest.version, mutations = batch.len(), "batch staged");
        Ok(self.latest.version)
    }

    /// Replaces the newest snapshot wholesale. Renames inside it are seen
    /// as removals plus additions.
    pub fn replace(&mut self, snapshot: EntitySnapshot) -> u64 {
        self.seq += 1;
        self.renames.clear();
        self.latest = snapshot;
        self.latest.version
    }

    /// Drops committed results and the cached graph so the next pass
    /// evaluates every path.
    pub fn clear_cache(&mut self) {
        self.evaluator.reset();
        self.renames.clear();
        self.seq += 1;
    }

    /// Starts a pass from the committed state to the newest snapshot.
    pub fn begin(&self) -> StagedPass {
        let renames: Vec<(String, String)> = self
            .renames
            .iter()
            .map(|(_, from, to)| (from.clone(), to.clone()))
            .collect();
        StagedPass {
            pass: self.evaluator.begin_pass(self.latest.clone(), &renames),
            seq: self.seq,
        }
    }

    /// Evaluates up to `budget` bindings of `pass`. Returns true when done.
    pub fn step(&self, pass: &mut StagedPass, budget: usize) -> bool {
        self.evaluator.step(&mut pass.pass, budget)
    }

    /// Commits a completed pass and notifies subscribers.
    pub fn finish(&mut self, pass: StagedPass) -> Result<PassReport, RuntimeError> {
        let StagedPass { pass, seq } = pass;
        let report = self.evaluator.commit(pass)?;
        self.committed_seq = seq;
        self.renames.retain(|(tag, _, _)| *tag > seq);

        for cycle in &report.cycles {
            self.report_cyclic_dependency(&cycle.paths);
        }
        for (_, callback) in &self.subscribers {
            callback(&report);
        }
        Ok(report)
    }

    /// Runs one pass over everything staged, in chunks of
    /// [`EngineConfig::chunk_size`].
    pub fn run_pending(&mut self) -> Result<PassReport, RuntimeError> {
        let mut pass = self.begin();
        while !self.step(&mut pass, self.config.chunk_size) {}
        self.finish(pass)
    }

    /// Stages `batch` and evaluates it.
    pub fn apply(&mut self, batch: &[Mutation]) -> Result<PassReport, RuntimeError> {
        self.stage(batch)?;
        self.run_pending()
    }

    /// Replaces the snapshot and evaluates it.
    pub fn load(&mut self, snapshot: EntitySnapshot) -> Result<PassReport, RuntimeError> {
        self.replace(snapshot);
        self.run_pending()
    }

    pub fn load_from(&mut self, provider: &dyn EntitySnapshotProvider) -> Result<PassReport, RuntimeError> {
        let snapshot = provider.snapshot()?;
        self.load(snapshot)
    }

    /// Clears the evaluation cache and re-evaluates the newest snapshot.
    pub fn reset(&mut self) -> Result<PassReport, RuntimeError> {
        self.clear_cache();
        self.run_pending()
    }

    /// Evaluates the trigger property at `path` against committed values.
    pub fn run_trigger(&self, path: &PropertyPath) -> Result<TriggerOutcome, SchedulerError> {
        let code = self
            .snapshot()
            .trigger(path)
            .ok_or_else(|| SchedulerError::UnknownTrigger { path: path.clone() })?;
        self.evaluator
            .run_trigger_code(path, code)
            .map_err(SchedulerError::Trigger)
    }

    /// The resolved inputs of an action: every top-level property other
    /// than its outputs, with bindings replaced by their committed values.
    pub fn action_params(&self, action: &str) -> Value {
        let Some(entity) = self.snapshot().entity(action) else {
            return Value::Null;
        };
        let ctx = SnapshotContext::new(self.snapshot(), self.evaluator.results());
        let tops: BTreeSet<&str> = entity
            .properties
            .keys()
            .filter_map(|key| key.split(['.', '[']).next())
            .filter(|top| !top.is_empty() && !ACTION_OUTPUT_KEYS.contains(top))
            .collect();
        let mut params = Map::new();
        for top in tops {
            let Ok(path) = PropertyPath::of(action, top) else {
                continue;
            };
            if let Some(value) = ctx.lookup(&path) {
                params.insert(top.to_string(), value);
            }
        }
        Value::Object(params)
    }

    pub fn plan_page_load(&self, page_id: Option<&str>) -> PageLoadPlan {
        plan_page_load(&self.evaluator, page_id)
    }
}
