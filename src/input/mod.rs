//! Input plugins: trigger sources wired to `Engine::execute`
//!
//! Each input config names a plugin by its `type`. The plugin receives the
//! rest of the config plus an engine handle, starts whatever listener or
//! timer it owns, and hands back services other parts of the host may query
//! and an optional cleanup hook.

// HTTP routes mapped to flows (axum)
pub mod http;

// One-shot flows run during startup
pub mod init;

// Interval/cron/timeout jobs
pub mod scheduler;

use crate::{
    error::ConfigurationError,
    registry::Registry,
    runtime::{engine::Engine, events::EventSink},
};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{any::Any, collections::HashMap, fmt, future::Future, sync::Arc};

/// What a plugin gets at initialization
#[derive(Clone)]
pub struct InputContext {
    pub engine: Engine,
    /// Host metadata merged into the runtime of every run the plugin starts
    pub metadata: Map<String, Value>,
    pub events: Arc<dyn EventSink>,
}

impl InputContext {
    pub fn new(engine: Engine, events: Arc<dyn EventSink>) -> Self {
        Self {
            engine,
            metadata: Map::new(),
            events,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

type Cleanup = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Result of initializing an input: named services and a cleanup hook
#[derive(Default)]
pub struct InputHandle {
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
    cleanup: Option<Cleanup>,
}

impl InputHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service<T: Any + Send + Sync>(
        mut self,
        name: impl Into<String>,
        service: T,
    ) -> Self {
        self.services.insert(name.into(), Arc::new(service));
        self
    }

    pub fn with_cleanup<F, Fut>(mut self, cleanup: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.cleanup = Some(Box::new(move || -> BoxFuture<'static, Result<()>> {
            Box::pin(cleanup())
        }));
        self
    }

    /// Typed service lookup; `None` if absent or of another type
    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let service = Arc::clone(self.services.get(name)?);
        service.downcast::<T>().ok()
    }

    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run the cleanup hook once; later calls are no-ops
    pub async fn cleanup(&mut self) -> Result<()> {
        match self.cleanup.take() {
            Some(cleanup) => cleanup().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for InputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputHandle")
            .field("services", &self.service_names())
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

/// A trigger source
#[async_trait]
pub trait InputPlugin: Send + Sync {
    /// Value of the `type` field this plugin handles
    fn plugin_type(&self) -> &str;

    /// Start the input from its config (the input entry minus `type`)
    async fn initialize(&self, config: Value, ctx: InputContext) -> Result<InputHandle>;
}

/// One entry of the `inputs` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl InputConfig {
    pub fn new(kind: impl Into<String>, options: Value) -> Self {
        let options = match options {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            kind: kind.into(),
            options,
        }
    }
}

/// Plugins keyed by type
pub struct InputRegistry {
    plugins: Registry<dyn InputPlugin>,
}

impl Default for InputRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InputRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            plugins: Registry::new("input"),
        }
    }

    /// Registry with the `http`, `scheduler` and `init` plugins
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let builtins: [Arc<dyn InputPlugin>; 3] = [
            Arc::new(http::HttpInput),
            Arc::new(scheduler::SchedulerInput),
            Arc::new(init::InitInput),
        ];
        for plugin in builtins {
            if let Err(e) = registry.register(plugin) {
                tracing::error!("❌ Failed to register built-in input: {}", e);
            }
        }
        registry
    }

    pub fn register(&self, plugin: Arc<dyn InputPlugin>) -> Result<(), ConfigurationError> {
        let kind = plugin.plugin_type().to_string();
        self.plugins.register(kind.clone(), plugin)?;
        tracing::debug!("🔌 Registered input plugin '{}'", kind);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn InputPlugin>> {
        self.plugins.get(kind)
    }

    pub fn types(&self) -> Vec<String> {
        self.plugins.names()
    }

    /// Initialize a single input
    pub async fn initialize(&self, config: &InputConfig, ctx: InputContext) -> Result<InputHandle> {
        let plugin = self
            .get(&config.kind)
            .ok_or_else(|| ConfigurationError::UnknownInputType(config.kind.clone()))?;
        tracing::info!("🔌 Initializing '{}' input", config.kind);
        plugin
            .initialize(Value::Object(config.options.clone()), ctx)
            .await
    }

    /// Initialize every input in order.
    ///
    /// All types are checked before any plugin starts. If one fails, inputs
    /// already started are cleaned up before the error is returned.
    pub async fn initialize_all(
        &self,
        configs: &[InputConfig],
        ctx: &InputContext,
    ) -> Result<Vec<InputHandle>> {
        if let Some(unknown) = configs.iter().find(|c| !self.plugins.contains(&c.kind)) {
            return Err(ConfigurationError::UnknownInputType(unknown.kind.clone()).into());
        }

        let mut handles = Vec::with_capacity(configs.len());
        for config in configs {
            match self.initialize(config, ctx.clone()).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    tracing::error!("❌ Input '{}' failed to initialize: {:#}", config.kind, e);
                    cleanup_all(&mut handles).await;
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }
}

/// Clean up handles in reverse start order, logging failures
pub async fn cleanup_all(handles: &mut [InputHandle]) {
    for handle in handles.iter_mut().rev() {
        if let Err(e) = handle.cleanup().await {
            tracing::warn!("⚠️ Input cleanup failed: {:#}", e);
        }
    }
}

/// Deserialize a plugin's config, naming the plugin on failure
pub(crate) fn parse_config<T: serde::de::DeserializeOwned>(kind: &str, config: Value) -> Result<T> {
    serde_json::from_value(config)
        .map_err(|e| ConfigurationError::InvalidDefinition(format!("{kind} input: {e}")).into())
}
