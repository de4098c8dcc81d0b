//! The async engine worker.
//!
//! [`EngineHandle`] sends commands to one background task that owns the
//! pass lifecycle. Commands queued together are staged together, so a burst
//! of edits costs one pass. Long passes are evaluated in chunks with a
//! yield between them; if new edits arrive at a yield point the running
//! pass is dropped uncommitted and a fresh one is started over everything
//! staged so far.
//!
//! The [`Engine`] itself sits behind `Arc<tokio::sync::Mutex<_>>`. The
//! worker only holds the lock for one chunk at a time, so readers always
//! get in between chunks and only ever see committed results.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use bindgraph_core::{EntitySnapshot, Mutation, PropertyPath};
use bindgraph_eval::{EvaluationResult, PassReport};

use crate::engine::{Engine, SubscriptionId};
use crate::error::RuntimeError;

/// Computes a batch from the newest staged snapshot, atomically with
/// respect to other commands.
pub type Update = Box<dyn FnOnce(&EntitySnapshot) -> Vec<Mutation> + Send>;

enum Command {
    Apply {
        batch: Vec<Mutation>,
        reply: oneshot::Sender<Result<u64, RuntimeError>>,
    },
    Update {
        update: Update,
        reply: oneshot::Sender<Result<u64, RuntimeError>>,
    },
    Replace(EntitySnapshot),
    Reset,
    Flush(oneshot::Sender<Option<PassReport>>),
}

#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<Mutex<Engine>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    /// Moves `engine` onto a background task. The task ends once every
    /// handle has been dropped.
    pub fn spawn(engine: Engine) -> (Self, JoinHandle<()>) {
        let engine = Arc::new(Mutex::new(engine));
        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(engine.clone(), receiver));
        (EngineHandle { engine, commands }, worker)
    }

    fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.commands.send(command).map_err(|_| RuntimeError::Closed)
    }

    /// Stages a mutation batch. Resolves once the batch is staged (not
    /// evaluated) with the new snapshot version.
    pub async fn apply(&self, batch: Vec<Mutation>) -> Result<u64, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Apply { batch, reply })?;
        rx.await.map_err(|_| RuntimeError::Closed)?
    }

    /// Stages the batch `update` computes from the newest snapshot.
    pub async fn update(
        &self,
        update: impl FnOnce(&EntitySnapshot) -> Vec<Mutation> + Send + 'static,
    ) -> Result<u64, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Update {
            update: Box::new(update),
            reply,
        })?;
        rx.await.map_err(|_| RuntimeError::Closed)?
    }

    pub fn replace(&self, snapshot: EntitySnapshot) -> Result<(), RuntimeError> {
        self.send(Command::Replace(snapshot))
    }

    /// Clears the evaluation cache; the next pass evaluates everything.
    pub fn reset(&self) -> Result<(), RuntimeError> {
        self.send(Command::Reset)
    }

    /// Waits until everything sent before this call is committed. Returns
    /// the report of the pass that committed it, or `None` if nothing was
    /// pending.
    pub async fn flush(&self) -> Result<Option<PassReport>, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Flush(reply))?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    pub async fn evaluation_result(&self, path: &PropertyPath) -> Option<EvaluationResult> {
        self.engine.lock().await.evaluation_result(path).cloned()
    }

    pub async fn subscribe(
        &self,
        callback: impl Fn(&PassReport) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.engine.lock().await.subscribe(callback)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.engine.lock().await.unsubscribe(id)
    }

    pub async fn on_cyclic_dependency(
        &self,
        callback: impl Fn(&BTreeSet<PropertyPath>) + Send + Sync + 'static,
    ) {
        self.engine.lock().await.on_cyclic_dependency(callback)
    }

    /// Runs `f` against the committed engine state.
    pub async fn with_engine<R>(&self, f: impl FnOnce(&Engine) -> R) -> R {
        let engine = self.engine.lock().await;
        f(&engine)
    }
}

async fn run(engine: Arc<Mutex<Engine>>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut waiters = Vec::new();
    while let Some(command) = commands.recv().await {
        stage(&engine, command, &mut waiters).await;
        while let Ok(command) = commands.try_recv() {
            stage(&engine, command, &mut waiters).await;
        }
        let pending = engine.lock().await.has_pending();
        let report = if pending {
            drive(&engine, &mut commands, &mut waiters).await
        } else {
            None
        };
        for waiter in waiters.drain(..) {
            let _ = waiter.send(report.clone());
        }
    }
    debug!("engine worker stopped");
}

/// Applies one command to the engine. Returns whether staged state changed.
async fn stage(
    engine: &Mutex<Engine>,
    command: Command,
    waiters: &mut Vec<oneshot::Sender<Option<PassReport>>>,
) -> bool {
    let mut engine = engine.lock().await;
    match command {
        Command::Apply { batch, reply } => {
            let staged = engine.stage(&batch);
            if let Err(e) = &staged {
                warn!(error = %e, "mutation batch rejected");
            }
            let changed = staged.is_ok();
            let _ = reply.send(staged);
            changed
        }
        Command::Update { update, reply } => {
            let batch = update(engine.latest());
            let staged = if batch.is_empty() {
                Ok(engine.latest().version)
            } else {
                engine.stage(&batch)
            };
            if let Err(e) = &staged {
                warn!(error = %e, "computed batch rejected");
            }
            let changed = staged.is_ok() && !batch.is_empty();
            let _ = reply.send(staged);
            changed
        }
        Command::Replace(snapshot) => {
            engine.replace(snapshot);
            true
        }
        Command::Reset => {
            engine.clear_cache();
            true
        }
        Command::Flush(waiter) => {
            waiters.push(waiter);
            false
        }
    }
}

/// Runs passes until one commits over everything staged.
async fn drive(
    engine: &Mutex<Engine>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    waiters: &mut Vec<oneshot::Sender<Option<PassReport>>>,
) -> Option<PassReport> {
    let (mut pass, chunk) = {
        let engine = engine.lock().await;
        (engine.begin(), engine.config().chunk_size)
    };
    let mut superseded = 0usize;
    loop {
        let done = engine.lock().await.step(&mut pass, chunk);
        if done {
            return match engine.lock().await.finish(pass) {
                Ok(report) => {
                    if superseded > 0 {
                        debug!(superseded, version = report.version, "committed after supersession");
                    }
                    Some(report)
                }
                Err(e) => {
                    error!(error = %e, "pass commit failed");
                    None
                }
            };
        }
        tokio::task::yield_now().await;

        let mut changed = false;
        while let Ok(command) = commands.try_recv() {
            changed |= stage(engine, command, waiters).await;
        }
        if changed {
            superseded += 1;
            debug!("pass superseded by newer edits");
            pass = engine.lock().await.begin();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use bindgraph_core::{Entity, PropertyValue};
    use serde_json::json;

    fn path(raw: &str) -> PropertyPath {
        PropertyPath::parse(raw).unwrap()
    }

    fn set(raw: &str, value: i64) -> Mutation {
        Mutation::SetProperty {
            path: path(raw),
            value: PropertyValue::literal(value),
        }
    }

    #[tokio::test]
    async fn queued_batches_share_one_pass() {
        let (handle, _worker) = EngineHandle::spawn(Engine::new(EngineConfig::default()));
        let passes = Arc::new(std::sync::Mutex::new(0));
        let counter = passes.clone();
        handle
            .subscribe(move |_| *counter.lock().unwrap() += 1)
            .await;
        handle
            .apply(vec![
                Mutation::AddEntity {
                    entity: Entity::widget("A").with_literal("x", 1),
                },
                Mutation::AddEntity {
                    entity: Entity::widget("B").with_binding("y", "{{A.x * 10}}"),
                },
            ])
            .await
            .unwrap();
        handle.flush().await.unwrap();
        assert_eq!(*passes.lock().unwrap(), 1);

        // Sent back to back, staged before the worker evaluates.
        let first = handle.commands.send(Command::Apply {
            batch: vec![set("A.x", 2)],
            reply: oneshot::channel().0,
        });
        let second = handle.commands.send(Command::Apply {
            batch: vec![set("A.x", 3)],
            reply: oneshot::channel().0,
        });
        assert!(first.is_ok() && second.is_ok());
        let report = handle.flush().await.unwrap().unwrap();
        assert_eq!(report.version, 3);
        assert_eq!(*passes.lock().unwrap(), 2);
        assert_eq!(
            handle.evaluation_result(&path("B.y")).await.unwrap().value,
            json!(30)
        );
    }

    #[tokio::test]
    async fn flush_without_pending_work_returns_none() {
        let (handle, _worker) = EngineHandle::spawn(Engine::new(EngineConfig::default()));
        assert!(handle.flush().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_batch_is_reported_to_sender() {
        let (handle, _worker) = EngineHandle::spawn(Engine::new(EngineConfig::default()));
        let err = handle.apply(vec![set("Missing.x", 1)]).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Core(_)));
    }

    #[tokio::test]
    async fn worker_stops_when_handles_drop() {
        let (handle, worker) = EngineHandle::spawn(Engine::new(EngineConfig::default()));
        drop(handle);
        worker.await.unwrap();
    }
}
