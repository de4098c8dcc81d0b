//! Trigger scheduling.
//!
//! Side effects never run inside an evaluation pass. Page-load actions and
//! user triggers are sequenced here instead, each step moving through
//! `Pending -> Running -> {Completed, Failed}`.
//!
//! Page loads follow a [`PageLoadPlan`]: the actions to run, layered by their
//! mutual data dependencies. Actions in one layer are independent and are
//! dispatched concurrently; every result is written back to
//! `<Action>.data` and evaluated before the next layer starts. A failed
//! action fails its dependents without running them, while independent
//! actions continue.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::task::{self, JoinSet};
use tracing::{debug, info, warn};

use bindgraph_core::{
    DependencyGraph, Entity, EntityKind, EntitySnapshot, Mutation, NodeKind, PropertyPath,
    PropertyValue, APP_STORE_ENTITY, APP_STORE_PROPERTY,
};
use bindgraph_eval::{Evaluator, TriggerEffect};
use bindgraph_store::StorageAdapter;

use crate::dispatcher::ActionDispatcher;
use crate::error::{ActionExecutionError, RuntimeError, SchedulerError};
use crate::handle::EngineHandle;

/// Action properties written by the scheduler rather than read as inputs.
pub const ACTION_OUTPUT_KEYS: &[&str] = &["data", "isLoading", "responseMeta"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TriggerState {
    Pending,
    Running,
    Completed,
    Failed { reason: String },
}

impl TriggerState {
    pub fn is_failed(&self) -> bool {
        matches!(self, TriggerState::Failed { .. })
    }
}

/// Which actions run on page load, and in what order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLoadPlan {
    pub page_id: Option<String>,
    /// Layers run in order; actions within a layer run concurrently.
    pub layers: Vec<Vec<String>>,
    /// Planned actions each action reads from, directly or through other
    /// paths.
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
    /// Groups of actions that depend on each other. They never run.
    pub cycles: Vec<BTreeSet<String>>,
}

impl PageLoadPlan {
    /// Every planned action, including cyclic ones.
    pub fn actions(&self) -> impl Iterator<Item = &String> + '_ {
        self.dependencies.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// Builds the page-load plan from the committed graph.
///
/// An action runs on load when `run_on_page_load` is `Some(true)`, or when
/// it is unset and a widget binding on the page (or another planned action)
/// transitively reads one of its paths. Entities without a page belong to
/// every page.
pub fn plan_page_load(evaluator: &Evaluator, page_id: Option<&str>) -> PageLoadPlan {
    let snapshot = evaluator.snapshot();
    let graph = evaluator.graph();
    let on_page = |entity: &Entity| match (page_id, entity.page_id.as_deref()) {
        (Some(page), Some(own)) => page == own,
        _ => true,
    };
    let actions: BTreeMap<&str, &Entity> = snapshot
        .entities_of_kind(EntityKind::Action)
        .filter(|e| on_page(e))
        .map(|e| (e.name.as_str(), e))
        .collect();

    let reads = |entity: &Entity| -> BTreeSet<String> {
        let seeds = binding_paths(entity);
        graph
            .transitive_dependencies(seeds.iter())
            .into_iter()
            .map(|p| p.entity().to_string())
            .filter(|name| name != &entity.name && actions.contains_key(name.as_str()))
            .collect()
    };

    let mut read_by_widgets = BTreeSet::new();
    for widget in snapshot.entities_of_kind(EntityKind::Widget).filter(|e| on_page(e)) {
        read_by_widgets.extend(reads(widget));
    }

    let mut selected: BTreeSet<&str> = actions
        .values()
        .filter(|a| {
            a.run_on_page_load
                .unwrap_or_else(|| read_by_widgets.contains(&a.name))
        })
        .map(|a| a.name.as_str())
        .collect();
    let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut queue: Vec<&str> = selected.iter().copied().collect();
    while let Some(name) = queue.pop() {
        let Some(action) = actions.get(name) else {
            continue;
        };
        let upstream = reads(action);
        for dep in &upstream {
            let Some(dep_action) = actions.get(dep.as_str()) else {
                continue;
            };
            if dep_action.run_on_page_load != Some(false) && selected.insert(dep_action.name.as_str()) {
                queue.push(dep_action.name.as_str());
            }
        }
        dependencies.insert(name.to_string(), upstream);
    }
    for deps in dependencies.values_mut() {
        deps.retain(|d| selected.contains(d.as_str()));
    }

    let mut order_graph = DependencyGraph::new();
    for (action, deps) in &dependencies {
        let Ok(root) = PropertyPath::entity_root(action) else {
            continue;
        };
        order_graph.declare(&root, NodeKind::Binding);
        order_graph.add_or_replace_edges(
            &root,
            deps.iter().filter_map(|d| PropertyPath::entity_root(d).ok()),
        );
    }
    let sort = order_graph.sort_order().clone();
    let cycles: Vec<BTreeSet<String>> = order_graph
        .cycles()
        .iter()
        .map(|c| c.paths.iter().map(|p| p.entity().to_string()).collect())
        .collect();

    let mut depth: BTreeMap<&str, usize> = BTreeMap::new();
    let mut layers: Vec<Vec<String>> = Vec::new();
    for root in sort.iter() {
        let name = root.entity();
        let level = dependencies
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|d| depth.get(d.as_str()))
            .map(|d| d + 1)
            .max()
            .unwrap_or(0);
        depth.insert(name, level);
        if layers.len() <= level {
            layers.resize_with(level + 1, Vec::new);
        }
        layers[level].push(name.to_string());
    }
    for layer in &mut layers {
        layer.sort();
    }

    PageLoadPlan {
        page_id: page_id.map(str::to_string),
        layers,
        dependencies,
        cycles,
    }
}

fn binding_paths(entity: &Entity) -> Vec<PropertyPath> {
    entity
        .paths()
        .filter(|(_, value)| value.is_binding())
        .map(|(path, _)| path)
        .collect()
}

/// Final state of every step of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub states: BTreeMap<String, TriggerState>,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = (&String, &TriggerState)> + '_ {
        self.states.iter().filter(|(_, s)| s.is_failed())
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// One effect of a user trigger and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRun {
    pub effect: TriggerEffect,
    pub state: TriggerState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerReport {
    pub source: PropertyPath,
    /// Value of the trigger code's last expression.
    pub value: Value,
    pub effects: Vec<EffectRun>,
}

impl TriggerReport {
    /// Completed effects the host has to carry out: navigation, alerts,
    /// modals and the like.
    pub fn external(&self) -> impl Iterator<Item = &TriggerEffect> + '_ {
        self.effects
            .iter()
            .filter(|run| run.state == TriggerState::Completed && is_external(&run.effect))
            .map(|run| &run.effect)
    }
}

fn is_external(effect: &TriggerEffect) -> bool {
    !matches!(
        effect,
        TriggerEffect::RunAction { .. } | TriggerEffect::StoreValue { .. } | TriggerEffect::ClearStore
    )
}

pub struct TriggerScheduler {
    engine: EngineHandle,
    dispatcher: Arc<dyn ActionDispatcher>,
    storage: Option<Arc<Mutex<Box<dyn StorageAdapter>>>>,
    /// Latest state of every action this scheduler has touched.
    states: Arc<DashMap<String, TriggerState>>,
}

impl TriggerScheduler {
    pub fn new(engine: EngineHandle, dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        TriggerScheduler {
            engine,
            dispatcher,
            storage: None,
            states: Arc::new(DashMap::new()),
        }
    }

    /// Persistent backing for `storeValue(key, value, true)`.
    pub fn with_storage(mut self, storage: Box<dyn StorageAdapter>) -> Self {
        self.storage = Some(Arc::new(Mutex::new(storage)));
        self
    }

    pub fn state(&self, action: &str) -> Option<TriggerState> {
        self.states.get(action).map(|s| s.value().clone())
    }

    fn set_state(&self, action: &str, state: TriggerState) {
        debug!(action, state = ?state, "trigger state");
        self.states.insert(action.to_string(), state);
    }

    /// Merges the persisted app store into the transient one.
    pub async fn restore_app_store(&self) -> Result<(), SchedulerError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let persisted = storage.lock().await.load()?;
        if persisted.is_empty() {
            return Ok(());
        }
        info!(keys = persisted.len(), "restoring persisted app store");
        self.engine
            .update(move |snapshot| {
                app_store_mutations(snapshot, |store| {
                    store.extend(persisted);
                })
            })
            .await?;
        self.engine.flush().await?;
        Ok(())
    }

    /// Runs the page-load actions of `page_id`.
    ///
    /// Action failures are reported in the returned [`RunReport`]; only a
    /// stopped engine is an error.
    pub async fn run_page_load(&self, page_id: Option<&str>) -> Result<RunReport, SchedulerError> {
        self.engine.flush().await?;
        let plan = self.engine.with_engine(|e| e.plan_page_load(page_id)).await;
        info!(
            page = page_id.unwrap_or("*"),
            actions = plan.dependencies.len(),
            layers = plan.layers.len(),
            "running page-load actions"
        );

        let mut report = RunReport::default();
        for action in plan.actions() {
            self.set_state(action, TriggerState::Pending);
            report.states.insert(action.clone(), TriggerState::Pending);
        }
        for cycle in &plan.cycles {
            let paths: BTreeSet<PropertyPath> = cycle
                .iter()
                .filter_map(|a| PropertyPath::entity_root(a).ok())
                .collect();
            self.engine
                .with_engine(|e| e.report_cyclic_dependency(&paths))
                .await;
            for action in cycle {
                let state = TriggerState::Failed {
                    reason: "cyclic dependency between page-load actions".to_string(),
                };
                self.set_state(action, state.clone());
                report.states.insert(action.clone(), state);
            }
        }

        for layer in &plan.layers {
            let mut runnable = Vec::new();
            for action in layer {
                let failed_dep = plan.dependencies.get(action).and_then(|deps| {
                    deps.iter()
                        .find(|d| report.states.get(*d).is_some_and(TriggerState::is_failed))
                });
                match failed_dep {
                    Some(dep) => {
                        let state = TriggerState::Failed {
                            reason: format!("dependency {dep} failed"),
                        };
                        self.set_state(action, state.clone());
                        report.states.insert(action.clone(), state);
                    }
                    None => runnable.push(action.clone()),
                }
            }
            if runnable.is_empty() {
                continue;
            }

            let outcomes = self.dispatch_all(&runnable).await?;
            for (action, outcome) in outcomes {
                let state = match outcome {
                    Ok(()) => TriggerState::Completed,
                    Err(e) => TriggerState::Failed { reason: e.message },
                };
                report.states.insert(action, state);
            }
        }

        let failed = report.failed().count();
        if failed > 0 {
            warn!(failed, "page load finished with failed actions");
        } else {
            info!(actions = report.states.len(), "page load finished");
        }
        Ok(report)
    }

    /// Dispatches `actions` concurrently and commits their results in one
    /// batch.
    async fn dispatch_all(
        &self,
        actions: &[String],
    ) -> Result<Vec<(String, Result<(), ActionExecutionError>)>, SchedulerError> {
        self.write(actions.iter().flat_map(|a| loading(a, true)).collect())
            .await?;

        let mut tasks = JoinSet::new();
        let mut spawned: HashMap<task::Id, String> = HashMap::with_capacity(actions.len());
        for action in actions {
            self.set_state(action, TriggerState::Running);
            let params = self.engine.with_engine(|e| e.action_params(action)).await;
            let response = self.dispatcher.dispatch(action, params);
            let id = tasks.spawn(response).id();
            spawned.insert(id, action.clone());
        }

        let mut outcomes = Vec::with_capacity(actions.len());
        let mut writes = Vec::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, response) = match joined {
                Ok((id, response)) => (id, response),
                Err(e) => {
                    warn!(error = %e, "action task aborted");
                    let aborted = ActionExecutionError {
                        action: spawned.get(&e.id()).cloned().unwrap_or_default(),
                        message: "action task aborted".to_string(),
                    };
                    (e.id(), Err(aborted))
                }
            };
            let Some(action) = spawned.remove(&id) else {
                continue;
            };
            writes.extend(loading(&action, false));
            match response {
                Ok(data) => {
                    writes.extend(data_mutation(&action, data));
                    self.set_state(&action, TriggerState::Completed);
                    outcomes.push((action, Ok(())));
                }
                Err(e) => {
                    warn!(action = %action, error = %e.message, "action failed");
                    self.set_state(&action, TriggerState::Failed { reason: e.message.clone() });
                    outcomes.push((action, Err(e)));
                }
            }
        }

        self.write(writes).await?;
        Ok(outcomes)
    }

    /// Stages `batch` and waits for the pass that evaluates it. A batch the
    /// entity model rejects (say, the action was deleted meanwhile) is
    /// logged and skipped.
    async fn write(&self, batch: Vec<Mutation>) -> Result<(), SchedulerError> {
        if batch.is_empty() {
            return Ok(());
        }
        match self.engine.apply(batch).await {
            Ok(_) => {}
            Err(RuntimeError::Core(e)) => warn!(error = %e, "dropping action result"),
            Err(e) => return Err(e.into()),
        }
        self.engine.flush().await?;
        Ok(())
    }

    /// Evaluates the trigger property at `path` and performs its effects in
    /// order. Once an effect fails, the remaining ones are marked failed
    /// without running.
    pub async fn execute_trigger(&self, path: &PropertyPath) -> Result<TriggerReport, SchedulerError> {
        self.engine.flush().await?;
        let outcome = self.engine.with_engine(|e| e.run_trigger(path)).await?;
        info!(trigger = %path, effects = outcome.effects.len(), "executing trigger");

        let mut effects = Vec::with_capacity(outcome.effects.len());
        let mut failure: Option<String> = None;
        for effect in outcome.effects {
            let state = match &failure {
                Some(label) => TriggerState::Failed {
                    reason: format!("earlier effect {label} failed"),
                },
                None => match self.perform(&effect).await {
                    Ok(()) => TriggerState::Completed,
                    Err(e) => {
                        warn!(trigger = %path, effect = %effect.label(), error = %e, "trigger effect failed");
                        failure = Some(effect.label());
                        TriggerState::Failed {
                            reason: e.to_string(),
                        }
                    }
                },
            };
            effects.push(EffectRun { effect, state });
        }
        Ok(TriggerReport {
            source: path.clone(),
            value: outcome.value,
            effects,
        })
    }

    async fn perform(&self, effect: &TriggerEffect) -> Result<(), SchedulerError> {
        match effect {
            TriggerEffect::RunAction { action } => {
                let outcomes = self.dispatch_all(std::slice::from_ref(action)).await?;
                for (_, outcome) in outcomes {
                    outcome.map_err(SchedulerError::Action)?;
                }
                Ok(())
            }
            TriggerEffect::StoreValue {
                key,
                value,
                persist,
            } => {
                if *persist {
                    if let Some(storage) = &self.storage {
                        storage.lock().await.set(key, value)?;
                    }
                }
                let (key, value) = (key.clone(), value.clone());
                self.engine
                    .update(move |snapshot| {
                        app_store_mutations(snapshot, |store| {
                            store.insert(key, value);
                        })
                    })
                    .await?;
                self.engine.flush().await?;
                Ok(())
            }
            TriggerEffect::ClearStore => {
                if let Some(storage) = &self.storage {
                    storage.lock().await.clear()?;
                }
                self.engine
                    .update(|snapshot| app_store_mutations(snapshot, BTreeMap::clear))
                    .await?;
                self.engine.flush().await?;
                Ok(())
            }
            // Carried out by the host.
            _ => Ok(()),
        }
    }
}

fn loading(action: &str, on: bool) -> Option<Mutation> {
    Some(Mutation::SetProperty {
        path: PropertyPath::of(action, "isLoading").ok()?,
        value: PropertyValue::literal(on),
    })
}

fn data_mutation(action: &str, data: Value) -> Option<Mutation> {
    Some(Mutation::SetProperty {
        path: PropertyPath::of(action, "data").ok()?,
        value: PropertyValue::Literal(data),
    })
}

/// The batch that replaces the app store with `edit` applied to it.
fn app_store_mutations(
    snapshot: &EntitySnapshot,
    edit: impl FnOnce(&mut BTreeMap<String, Value>),
) -> Vec<Mutation> {
    let Ok(path) = PropertyPath::of(APP_STORE_ENTITY, APP_STORE_PROPERTY) else {
        return Vec::new();
    };
    let mut store: BTreeMap<String, Value> = match snapshot.property(&path) {
        Some(PropertyValue::Literal(Value::Object(map))) => {
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        }
        _ => BTreeMap::new(),
    };
    edit(&mut store);
    if snapshot.contains_entity(APP_STORE_ENTITY) {
        vec![Mutation::SetProperty {
            path,
            value: PropertyValue::Literal(Value::Object(store.into_iter().collect::<Map<_, _>>())),
        }]
    } else {
        vec![Mutation::AddEntity {
            entity: Entity::app_store(store),
        }]
    }
}
