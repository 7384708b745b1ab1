//! Error taxonomy for the engine
//!
//! Configuration errors are fatal where they happen and never retried.
//! Closure failures travel up through `run_steps`/`execute` to the caller of
//! that one run. Scheduled-run failures are captured per job and never escape
//! the scheduler.

use thiserror::Error;

/// Problems with definitions, registrations or wiring.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A closure, flow or input plugin name was registered twice
    #[error("{kind} '{name}' is already registered")]
    DuplicateName { kind: &'static str, name: String },

    #[error("unknown closure: {0}")]
    UnknownClosure(String),

    #[error("unknown flow: {0}")]
    UnknownFlow(String),

    #[error("unknown input type: {0}")]
    UnknownInputType(String),

    /// Scheduler job declares none of interval, cron or timeout
    #[error("job '{0}' must declare one of interval, cron or timeout")]
    MissingTrigger(String),

    #[error("job '{job}' declares more than one trigger: {triggers}")]
    ConflictingTriggers { job: String, triggers: String },

    #[error("job name '{0}' is used more than once")]
    DuplicateJob(String),

    #[error("invalid schedule for job '{job}': {message}")]
    InvalidSchedule { job: String, message: String },

    /// A closure with nested steps ran under a runtime that has no engine handle
    #[error("runtime carries no engine reference, '{0}' cannot run nested steps")]
    MissingEngineReference(String),

    #[error("invalid definition: {0}")]
    InvalidDefinition(String),
}

/// Failure of a single flow run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// A closure handler returned an error
    #[error("closure '{closure}' failed: {source}")]
    ClosureExecution {
        closure: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("execution cancelled")]
    Cancelled,
}

impl EngineError {
    /// Wrap a handler error, unwrapping engine errors raised by nested runs.
    ///
    /// Handlers that recurse into `run_steps` hand back the inner
    /// `EngineError` through `anyhow`; that error surfaces unchanged so a
    /// nested unknown closure is still a configuration error at the top.
    pub fn from_closure(closure: &str, source: anyhow::Error) -> Self {
        let source = match source.downcast::<EngineError>() {
            Ok(inner) => return inner,
            Err(source) => source,
        };
        match source.downcast::<ConfigurationError>() {
            Ok(inner) => EngineError::Configuration(inner),
            Err(source) => EngineError::ClosureExecution {
                closure: closure.to_string(),
                source,
            },
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, EngineError::Configuration(_))
    }
}

/// A write through a state path that cannot be carried out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// Writing would grow an array past the allowed index
    #[error("array index {index} in path '{path}' exceeds the limit of {limit}")]
    IndexTooLarge {
        path: String,
        index: usize,
        limit: usize,
    },
}

/// Failure of one scheduled trigger, recorded into the job's state.
#[derive(Debug, Clone, Error)]
#[error("scheduled run of job '{job}' (flow '{flow}') failed: {message}")]
pub struct SchedulerRunError {
    pub job: String,
    pub flow: String,
    pub message: String,
}
