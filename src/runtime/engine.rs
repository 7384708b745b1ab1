//! Flow execution engine
//!
//! Owns the closure and flow registries and exposes the top-level `execute`
//! entry point. Step semantics live in `executor.rs`; the engine only sets up
//! a run (fresh state, runtime with an engine handle, run id) and reports on it.

use crate::{
    closures::{builtins, ClosureDefinition, FlowClosure},
    error::{ConfigurationError, EngineError},
    registry::Registry,
    runtime::context::{ExecutionResult, Runtime},
    workflow::FlowDefinition,
};
use serde_json::{json, Map, Value};
use std::{fmt, sync::Arc, time::Instant};
use tracing::Instrument;
use uuid::Uuid;

/// Cheaply cloneable engine handle
///
/// All clones share the same registries. Registration is expected during
/// startup and plugin loading; lookups during execution never block.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    closures: Registry<ClosureDefinition>,
    flows: Registry<FlowDefinition>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Create an engine with the built-in closures registered
    pub fn new() -> Self {
        let engine = Self {
            inner: Arc::new(EngineInner {
                closures: Registry::new("closure"),
                flows: Registry::new("flow"),
            }),
        };
        engine.install_builtins();
        engine
    }

    fn install_builtins(&self) {
        // Registries start empty here, so the built-in names cannot collide
        if let Err(e) = builtins::register_builtins(&self.inner.closures) {
            tracing::error!("❌ Failed to register built-in closures: {}", e);
        }
    }

    /// Register a flow; fails if the name is already taken
    pub fn register_flow(&self, flow: FlowDefinition) -> Result<(), ConfigurationError> {
        let name = flow.name.clone();
        let step_count = flow.steps.len();
        self.inner.flows.register(name.clone(), Arc::new(flow))?;
        tracing::info!("📋 Registered flow '{}' ({} steps)", name, step_count);
        Ok(())
    }

    /// Register a closure; fails if the name is already taken
    pub fn register_closure(&self, closure: ClosureDefinition) -> Result<(), ConfigurationError> {
        let name = closure.name.clone();
        self.inner.closures.register(name.clone(), Arc::new(closure))?;
        tracing::debug!("🔧 Registered closure '{}'", name);
        Ok(())
    }

    /// Expose a flow as a closure that runs its steps against the caller's state.
    ///
    /// The flow is resolved when the closure runs, so it may be registered later.
    pub fn register_flow_closure(
        &self,
        name: impl Into<String>,
        flow: impl Into<String>,
    ) -> Result<(), ConfigurationError> {
        self.register_closure(ClosureDefinition::new(name, FlowClosure::new(flow)))
    }

    pub fn flow(&self, name: &str) -> Option<Arc<FlowDefinition>> {
        self.inner.flows.get(name)
    }

    /// Resolve a closure by name
    pub fn closure(&self, name: &str) -> Result<Arc<ClosureDefinition>, ConfigurationError> {
        self.inner
            .closures
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownClosure(name.to_string()))
    }

    pub fn flow_names(&self) -> Vec<String> {
        self.inner.flows.names()
    }

    pub fn closure_names(&self) -> Vec<String> {
        self.inner.closures.names()
    }

    /// Drop every registered flow and closure, then restore the built-ins.
    ///
    /// Test isolation only; production code registers once and never resets.
    #[doc(hidden)]
    pub fn reset(&self) {
        self.inner.flows.clear();
        self.inner.closures.clear();
        self.install_builtins();
    }

    /// Execute a registered flow
    ///
    /// Creates the run's state (`{}` when none is given) and runtime, installs
    /// this engine into the runtime for nested execution, then runs the flow's
    /// steps in order. The returned `last_result` is the result of the last step
    /// that actually executed.
    pub async fn execute(
        &self,
        flow_name: &str,
        initial_state: Option<Value>,
        runtime: Option<Runtime>,
    ) -> Result<ExecutionResult, EngineError> {
        let flow = self
            .flow(flow_name)
            .ok_or_else(|| ConfigurationError::UnknownFlow(flow_name.to_string()))?;

        let mut state = match initial_state {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(state) => state,
        };

        let mut runtime = runtime.unwrap_or_default();
        runtime.attach_engine(self.clone());
        if runtime.value("run").is_none() {
            runtime.insert(
                "run",
                json!({"id": Uuid::new_v4().to_string(), "flow": flow_name}),
            );
        }
        let run_id = runtime
            .value("run")
            .and_then(|run| run.get("id"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let span = tracing::info_span!("flow", flow = %flow_name, run = %run_id);
        let start_time = Instant::now();
        tracing::info!(
            parent: &span,
            "🚀 Starting flow '{}' ({} steps)",
            flow_name,
            flow.steps.len()
        );

        let outcome = self
            .run_steps(&flow.steps, &mut state, &runtime)
            .instrument(span.clone())
            .await;

        let duration = start_time.elapsed();
        match outcome {
            Ok(last) => {
                tracing::info!(
                    parent: &span,
                    "🎉 Flow '{}' completed in {:?}",
                    flow_name,
                    duration
                );
                Ok(ExecutionResult {
                    state,
                    last_result: last.unwrap_or(Value::Null),
                })
            }
            Err(e) => {
                tracing::error!(
                    parent: &span,
                    "❌ Flow '{}' failed after {:?}: {}",
                    flow_name,
                    duration,
                    e
                );
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("flows", &self.inner.flows.len())
            .field("closures", &self.inner.closures.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::InvokeStep;

    #[test]
    fn test_builtins_registered() {
        let engine = Engine::new();
        for name in builtins::BUILTIN_CLOSURES {
            assert!(engine.closure(name).is_ok(), "missing built-in {name}");
        }
        assert!(matches!(
            engine.closure("nope"),
            Err(ConfigurationError::UnknownClosure(_))
        ));
    }

    #[test]
    fn test_builtin_names_cannot_be_shadowed() {
        let engine = Engine::new();
        let shadow = ClosureDefinition::from_fn("assign", |_, _| Ok(Value::Null));
        assert!(matches!(
            engine.register_closure(shadow),
            Err(ConfigurationError::DuplicateName { kind: "closure", .. })
        ));
    }

    #[test]
    fn test_reset_restores_builtins_only() {
        let engine = Engine::new();
        engine.register_flow(FlowDefinition::new("f", vec![])).unwrap();
        engine
            .register_closure(ClosureDefinition::from_fn("custom", |_, _| Ok(Value::Null)))
            .unwrap();

        engine.reset();

        assert!(engine.flow_names().is_empty());
        assert!(engine.closure("custom").is_err());
        assert_eq!(engine.closure_names().len(), builtins::BUILTIN_CLOSURES.len());
        engine.register_flow(FlowDefinition::new("f", vec![])).unwrap();
    }

    #[tokio::test]
    async fn test_execute_records_run_metadata() {
        let engine = Engine::new();
        engine
            .register_flow(FlowDefinition::new(
                "meta",
                vec![InvokeStep::new("assign")
                    .param("path", json!("seen"))
                    .param("value", json!("${runtime.run.flow}"))
                    .into()],
            ))
            .unwrap();

        let result = engine.execute("meta", None, None).await.unwrap();
        assert_eq!(result.state, json!({"seen": "meta"}));
        assert_eq!(result.last_result, json!("meta"));
    }

    #[tokio::test]
    async fn test_unknown_flow() {
        let engine = Engine::new();
        let err = engine.execute("ghost", None, None).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Configuration(ConfigurationError::UnknownFlow(ref name)) if name == "ghost"
        ));
    }
}
