//! Runtime and scheduler error types.

use bindgraph_core::{CoreError, PropertyPath};
use bindgraph_eval::{Diagnostic, PassError};
use bindgraph_store::StoreError;

/// Errors from driving evaluation passes.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A mutation batch was rejected by the entity model.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pass(#[from] PassError),

    /// The engine worker has shut down.
    #[error("engine worker is no longer running")]
    Closed,
}

/// Errors from page-load and user-triggered execution.
///
/// Page-load action failures are not errors here: they are recorded as
/// [`TriggerState::Failed`](crate::scheduler::TriggerState::Failed) in the
/// run report so independent chains keep going.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("no trigger property at {path}")]
    UnknownTrigger { path: PropertyPath },

    /// Trigger code failed to parse or evaluate.
    #[error("trigger {}: {}", .0.source, .0.message)]
    Trigger(Diagnostic),

    /// An action run by a user trigger failed.
    #[error(transparent)]
    Action(#[from] ActionExecutionError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure reported by an [`ActionDispatcher`](crate::dispatcher::ActionDispatcher).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("action {action} failed: {message}")]
pub struct ActionExecutionError {
    pub action: String,
    pub message: String,
}
