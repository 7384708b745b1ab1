//! Init input: runs flows once while the host starts

use crate::{
    input::{parse_config, InputContext, InputHandle, InputPlugin},
    runtime::context::Runtime,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct InitInputConfig {
    #[serde(default)]
    pub flows: Vec<InitFlow>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitFlow {
    pub flow: String,
    #[serde(default)]
    pub initial_state: Option<Value>,
}

/// The `init` input plugin
///
/// Flows run sequentially in declaration order; the first failure aborts startup.
#[derive(Debug, Default, Clone, Copy)]
pub struct InitInput;

#[async_trait]
impl InputPlugin for InitInput {
    fn plugin_type(&self) -> &str {
        "init"
    }

    async fn initialize(&self, config: Value, ctx: InputContext) -> Result<InputHandle> {
        let config: InitInputConfig = parse_config("init", config)?;

        for (index, entry) in config.flows.iter().enumerate() {
            tracing::info!("🏁 Running init flow '{}'", entry.flow);
            let runtime = Runtime::with_values(ctx.metadata.clone())
                .with_value("init", json!({"index": index}));
            ctx.engine
                .execute(&entry.flow, entry.initial_state.clone(), Some(runtime))
                .await
                .with_context(|| format!("init flow '{}' failed", entry.flow))?;
        }

        Ok(InputHandle::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{ConfigurationError, EngineError},
        runtime::{engine::Engine, events::NoopEventSink},
        workflow::{FlowDefinition, InvokeStep},
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unknown_flow_is_fatal() {
        let ctx = InputContext::new(Engine::new(), Arc::new(NoopEventSink));
        let err = InitInput
            .initialize(json!({"flows": [{"flow": "missing"}]}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Configuration(ConfigurationError::UnknownFlow(_)))
        ));
    }

    #[tokio::test]
    async fn test_runs_flows_with_initial_state() {
        let engine = Engine::new();
        engine
            .register_flow(FlowDefinition::new(
                "seed",
                vec![InvokeStep::new("log").param("message", json!("seeded ${count}")).into()],
            ))
            .unwrap();

        let ctx = InputContext::new(engine, Arc::new(NoopEventSink));
        let handle = InitInput
            .initialize(json!({"flows": [{"flow": "seed", "initialState": {"count": 3}}]}), ctx)
            .await
            .unwrap();
        assert!(handle.service_names().is_empty());
    }
}
