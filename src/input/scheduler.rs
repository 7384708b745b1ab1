//! Scheduler input: starts interval, cron and timeout jobs

use crate::{
    error::EngineError,
    input::{parse_config, InputContext, InputHandle, InputPlugin},
    runtime::{
        context::{ExecutionResult, Runtime},
        engine::Engine,
        scheduler::{FlowExecutor, JobConfig, Scheduler},
    },
};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerInputConfig {
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// The `scheduler` input plugin
///
/// Exposes a `jobStates` service when at least one job is enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulerInput;

#[async_trait]
impl InputPlugin for SchedulerInput {
    fn plugin_type(&self) -> &str {
        "scheduler"
    }

    async fn initialize(&self, config: Value, ctx: InputContext) -> Result<InputHandle> {
        let config: SchedulerInputConfig = parse_config("scheduler", config)?;
        let executor: Arc<dyn FlowExecutor> = Arc::new(MetadataExecutor {
            engine: ctx.engine.clone(),
            metadata: ctx.metadata.clone(),
        });

        let started = Scheduler::start(config.jobs, executor, Arc::clone(&ctx.events)).await?;
        let Some(mut scheduler) = started else {
            return Ok(InputHandle::new());
        };

        Ok(InputHandle::new()
            .with_service("jobStates", scheduler.job_states())
            .with_cleanup(move || async move {
                scheduler.stop().await;
                Ok(())
            }))
    }
}

/// Adds the plugin's host metadata to each scheduled run's runtime
struct MetadataExecutor {
    engine: Engine,
    metadata: Map<String, Value>,
}

#[async_trait]
impl FlowExecutor for MetadataExecutor {
    async fn execute_flow(
        &self,
        flow: &str,
        state: Value,
        mut runtime: Runtime,
    ) -> Result<ExecutionResult, EngineError> {
        for (key, value) in &self.metadata {
            if runtime.value(key).is_none() {
                runtime.insert(key.clone(), value.clone());
            }
        }
        self.engine.execute_flow(flow, state, runtime).await
    }
}
