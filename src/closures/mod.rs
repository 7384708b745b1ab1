//! Closures: named handlers invoked by flow steps
//!
//! A closure receives the run's mutable state plus a context holding the
//! resolved parameters and the runtime. Closures that take step sequences as
//! parameters declare them as functional so they reach the handler unresolved.

// Built-in closures registered on every engine
pub mod builtins;

use crate::{
    error::ConfigurationError,
    runtime::{context::Runtime, engine::Engine},
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::{fmt, sync::Arc};

/// Call-time context handed to a closure handler.
#[derive(Debug)]
pub struct ClosureContext<'a> {
    /// Runtime of the current run (engine handle, host metadata, cancellation)
    pub runtime: &'a Runtime,
    /// Parameters after template resolution
    pub parameters: Map<String, Value>,
}

impl<'a> ClosureContext<'a> {
    pub fn new(runtime: &'a Runtime, parameters: Map<String, Value>) -> Self {
        Self { runtime, parameters }
    }

    /// Parameter value, null when absent
    pub fn param(&self, name: &str) -> &Value {
        self.parameters.get(name).unwrap_or(&Value::Null)
    }

    /// Engine handle for nested step execution.
    pub fn engine(&self, closure: &str) -> Result<&'a Engine, ConfigurationError> {
        self.runtime
            .engine()
            .ok_or_else(|| ConfigurationError::MissingEngineReference(closure.to_string()))
    }
}

/// Closure implementation
///
/// Handlers may mutate `state` directly and return a value; the step decides
/// whether that value is also written into state through `assign`.
#[async_trait]
pub trait ClosureHandler: Send + Sync {
    async fn call(&self, state: &mut Value, ctx: ClosureContext<'_>) -> anyhow::Result<Value>;
}

/// Adapter for synchronous handler functions
pub struct FnClosure<F>(pub F);

#[async_trait]
impl<F> ClosureHandler for FnClosure<F>
where
    F: Fn(&mut Value, &ClosureContext<'_>) -> anyhow::Result<Value> + Send + Sync,
{
    async fn call(&self, state: &mut Value, ctx: ClosureContext<'_>) -> anyhow::Result<Value> {
        (self.0)(state, &ctx)
    }
}

/// Runs another registered flow's steps against the caller's state
#[derive(Debug, Clone)]
pub struct FlowClosure {
    flow: String,
}

impl FlowClosure {
    pub fn new(flow: impl Into<String>) -> Self {
        Self { flow: flow.into() }
    }
}

#[async_trait]
impl ClosureHandler for FlowClosure {
    async fn call(&self, state: &mut Value, ctx: ClosureContext<'_>) -> anyhow::Result<Value> {
        let engine = ctx.engine(&self.flow)?;
        let flow = engine
            .flow(&self.flow)
            .ok_or_else(|| ConfigurationError::UnknownFlow(self.flow.clone()))?;
        let last = engine.run_steps(&flow.steps, state, ctx.runtime).await?;
        Ok(last.unwrap_or(Value::Null))
    }
}

/// A closure registration: name, handler and functional parameter names
#[derive(Clone)]
pub struct ClosureDefinition {
    pub name: String,
    pub handler: Arc<dyn ClosureHandler>,
    /// Parameters passed as raw step sequences rather than resolved values
    pub functional_params: Vec<String>,
}

impl ClosureDefinition {
    pub fn new(name: impl Into<String>, handler: impl ClosureHandler + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            functional_params: Vec::new(),
        }
    }

    /// Build a definition from a synchronous function.
    pub fn from_fn<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Value, &ClosureContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, FnClosure(handler))
    }

    pub fn with_functional_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.functional_params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_functional(&self, param: &str) -> bool {
        self.functional_params.iter().any(|p| p == param)
    }
}

impl fmt::Debug for ClosureDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureDefinition")
            .field("name", &self.name)
            .field("functional_params", &self.functional_params)
            .finish_non_exhaustive()
    }
}
