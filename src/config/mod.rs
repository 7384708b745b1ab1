//! Configuration for the Ruleway runner
//!
//! Env vars pick the definitions file and log filter; the definitions file
//! holds the flows to register and the inputs to start.

use crate::{error::ConfigurationError, input::InputConfig, workflow::FlowDefinition};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the JSON definitions file
    pub definitions: PathBuf,
    /// `tracing-subscriber` env filter directive (e.g. "info", "ruleway=debug")
    pub log_filter: String,
}

impl Default for Config {
    /// Defaults with ENV_VAR overrides for container deployment
    fn default() -> Self {
        Self {
            definitions: std::env::var("RULEWAY_DEFINITIONS")
                .unwrap_or_else(|_| "ruleway.json".to_string())
                .into(),
            log_filter: std::env::var("RULEWAY_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

/// Contents of the definitions file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Definitions {
    #[serde(default)]
    pub flows: Vec<FlowDefinition>,
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
}

impl Definitions {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ConfigurationError::InvalidDefinition(e.to_string()).into())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read definitions from {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid definitions in {}", path.display()))
    }
}
