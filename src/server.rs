//! Runner setup and lifecycle
//!
//! Wires together the engine, the flow definitions and the input plugins.
//! Provides the application factory used by the binary and by tests.

use crate::{
    config::{Config, Definitions},
    input::{cleanup_all, InputContext, InputHandle, InputRegistry},
    runtime::{engine::Engine, events::TracingEventSink},
};
use anyhow::Result;
use serde_json::{json, Map};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// A running application: the engine plus every started input
pub struct App {
    pub engine: Engine,
    pub inputs: Vec<InputHandle>,
}

impl App {
    /// Run every input cleanup, last started first
    pub async fn shutdown(mut self) {
        tracing::info!("⏹️ Shutting down {} inputs", self.inputs.len());
        cleanup_all(&mut self.inputs).await;
        tracing::info!("✅ Shutdown complete");
    }
}

/// Register `definitions` on a fresh engine and start its inputs
pub async fn create_app(definitions: Definitions, registry: &InputRegistry) -> Result<App> {
    let engine = Engine::new();

    tracing::info!("📋 Registering {} flows", definitions.flows.len());
    for flow in definitions.flows {
        engine.register_flow(flow)?;
    }

    let mut metadata = Map::new();
    metadata.insert(
        "host".to_string(),
        json!({"name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION")}),
    );
    let ctx = InputContext::new(engine.clone(), Arc::new(TracingEventSink)).with_metadata(metadata);

    tracing::info!("🔌 Starting {} inputs", definitions.inputs.len());
    let inputs = registry.initialize_all(&definitions.inputs, &ctx).await?;

    tracing::info!("✅ Application initialized successfully");
    Ok(App { engine, inputs })
}

/// Load the configured definitions, start the app and run until Ctrl-C
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    let filter =
        EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Ruleway from {}", config.definitions.display());
    let definitions = Definitions::load(&config.definitions)?;
    let app = create_app(definitions, &InputRegistry::with_builtins()).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received");
    app.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ConfigurationError, input::InputConfig, workflow::FlowDefinition};

    #[tokio::test]
    async fn test_duplicate_flow_definitions_fail() {
        let definitions = Definitions {
            flows: vec![FlowDefinition::new("a", vec![]), FlowDefinition::new("a", vec![])],
            inputs: vec![],
        };
        let err = create_app(definitions, &InputRegistry::with_builtins())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::DuplicateName { kind: "flow", .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_input_type_is_fatal() {
        let definitions = Definitions {
            flows: vec![],
            inputs: vec![InputConfig::new("mqtt", json!({"broker": "localhost"}))],
        };
        let err = create_app(definitions, &InputRegistry::with_builtins())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::UnknownInputType(kind)) if kind == "mqtt"
        ));
    }
}
