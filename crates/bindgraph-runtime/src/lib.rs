//! Runtime for the bindgraph evaluation engine.
//!
//! # Modules
//!
//! - [`engine`]: pass orchestration, subscriptions and cycle reporting
//! - [`handle`]: the async worker with batching and pass supersession
//! - [`scheduler`]: page-load plans and trigger execution
//! - [`dispatcher`]: the action execution seam
//! - [`config`]: EngineConfig and its environment overlay
//! - [`error`]: RuntimeError and SchedulerError

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod handle;
pub mod scheduler;

pub use config::EngineConfig;
pub use dispatcher::{ActionDispatcher, DispatchFuture, Fixture, FixtureDispatcher};
pub use engine::{Engine, StagedPass, SubscriptionId};
pub use error::{ActionExecutionError, RuntimeError, SchedulerError};
pub use handle::EngineHandle;
pub use scheduler::{
    plan_page_load, EffectRun, PageLoadPlan, RunReport, TriggerReport, TriggerScheduler, TriggerState,
};
