//! The action execution seam.
//!
//! The engine never performs network calls itself. Running a query or server
//! action goes through an [`ActionDispatcher`]; its completion is written
//! back as an ordinary mutation.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ActionExecutionError;

pub type DispatchFuture = Pin<Box<dyn Future<Output = Result<Value, ActionExecutionError>> + Send>>;

/// Executes a named action with its resolved inputs.
///
/// Failures are reported once; the scheduler never retries.
pub trait ActionDispatcher: Send + Sync {
    fn dispatch(&self, action: &str, params: Value) -> DispatchFuture;
}

/// Canned response for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fixture {
    Ok(Value),
    Err(String),
}

/// Dispatcher answering from a fixed table, recording every call.
///
/// Used by the CLI to dry-run page loads and by tests.
#[derive(Debug, Default)]
pub struct FixtureDispatcher {
    fixtures: BTreeMap<String, Fixture>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl FixtureDispatcher {
    pub fn new(fixtures: BTreeMap<String, Fixture>) -> Self {
        FixtureDispatcher {
            fixtures,
            ..Default::default()
        }
    }

    pub fn with(mut self, action: &str, fixture: Fixture) -> Self {
        self.fixtures.insert(action.to_string(), fixture);
        self
    }

    /// Delays every response, so concurrent dispatches overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Actions dispatched so far, in call order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ActionDispatcher for FixtureDispatcher {
    fn dispatch(&self, action: &str, params: Value) -> DispatchFuture {
        match self.calls.lock() {
            Ok(mut calls) => calls.push((action.to_string(), params)),
            Err(poisoned) => poisoned.into_inner().push((action.to_string(), params)),
        }
        let response = match self.fixtures.get(action) {
            Some(Fixture::Ok(value)) => Ok(value.clone()),
            Some(Fixture::Err(message)) => Err(message.clone()),
            None => Err("no fixture for action".to_string()),
        };
        let action = action.to_string();
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            response.map_err(|message| ActionExecutionError { action, message })
        })
    }
}
