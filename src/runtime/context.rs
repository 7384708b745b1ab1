//! Per-run context types
//!
//! `Runtime` travels alongside the mutable state of one run. It carries the
//! engine handle closures use for nested steps, host metadata readable from
//! templates through the `runtime.` prefix, and the run's cancellation token.

use crate::runtime::engine::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Host-supplied context for one execution
#[derive(Clone, Default)]
pub struct Runtime {
    /// Engine handle for recursive step execution; `execute` always installs one
    engine: Option<Engine>,
    /// Request/trigger/plugin metadata, addressable as `${runtime.*}`
    values: Map<String, Value>,
    /// Cancels the run between steps and while a closure is pending
    cancel: CancellationToken,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: Map<String, Value>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Tie the run to an external cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Attach an engine handle explicitly (e.g. for direct `run_steps` calls).
    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn engine(&self) -> Option<&Engine> {
        self.engine.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn attach_engine(&mut self, engine: Engine) {
        self.engine = Some(engine);
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("has_engine", &self.engine.is_some())
            .field("values", &self.values)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Outcome of a top-level `execute` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Final state of the run
    pub state: Value,
    /// Result of the last step that actually executed, null if none did
    pub last_result: Value,
}
