//! Runtime: flow execution and scheduling
//!
//! - Engine: registries plus the `execute` entry point
//! - Executor: step interpretation (invoke, branch, nested sequences)
//! - Scheduler: interval, cron and timeout jobs with per-job run history

// Per-run context (runtime values, cancellation) and execution results
pub mod context;

// Engine handle and flow execution entry point
pub mod engine;

// Step interpreter
pub mod executor;

// Scheduler lifecycle events and sinks
pub mod events;

// Background job scheduler
pub mod scheduler;

pub use context::{ExecutionResult, Runtime};
pub use engine::Engine;
pub use events::{ChannelEventSink, EventSink, NoopEventSink, SchedulerEvent, TracingEventSink};
pub use scheduler::{
    FlowExecutor, JobConfig, JobState, JobStates, ScheduleDuration, Scheduler, Trigger,
};
