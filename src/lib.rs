//! Ruleway: pluggable rule and flow execution engine
//!
//! Flows are ordered, conditional steps that invoke named closures against a
//! mutable JSON state. Inputs (HTTP routes, scheduled jobs, startup hooks)
//! turn external triggers into flow runs.

// Core configuration and definitions file loading
pub mod config;

// Error taxonomy (configuration, closure execution, scheduled runs)
pub mod error;

// Write-once name registries shared by closures, flows and inputs
pub mod registry;

// Path access and coercion over serde_json values
pub mod value;

// `${...}` placeholder resolution
pub mod template;

// Flow definition layer - flows, steps and conditions
pub mod workflow;

// Closure handlers and the built-in closure set
pub mod closures;

// Runtime execution engine - interpreter, scheduler and events
pub mod runtime;

// Input plugins - http, scheduler, init
pub mod input;

// Runner setup and lifecycle
pub mod server;

// Re-export commonly used types for external consumers
pub use closures::{ClosureContext, ClosureDefinition, ClosureHandler};
pub use error::{ConfigurationError, EngineError, PathError, SchedulerRunError};
pub use input::{InputConfig, InputContext, InputHandle, InputPlugin, InputRegistry};
pub use runtime::{Engine, ExecutionResult, JobConfig, JobState, JobStates, Runtime, Scheduler};
pub use server::start_server;
pub use workflow::{BranchCase, BranchStep, Condition, FlowDefinition, InvokeStep, Step, When};
