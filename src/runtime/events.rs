//! Scheduler lifecycle events
//!
//! Every scheduled trigger emits `job:started` and then exactly one of
//! `job:completed` or `job:failed`. Sinks decide where those go.

use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    JobStarted {
        job: String,
        flow: String,
    },
    JobCompleted {
        job: String,
        flow: String,
        duration: Duration,
    },
    JobFailed {
        job: String,
        flow: String,
        duration: Duration,
        error: String,
    },
}

impl SchedulerEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job:started",
            Self::JobCompleted { .. } => "job:completed",
            Self::JobFailed { .. } => "job:failed",
        }
    }

    pub fn job(&self) -> &str {
        match self {
            Self::JobStarted { job, .. }
            | Self::JobCompleted { job, .. }
            | Self::JobFailed { job, .. } => job,
        }
    }

    pub fn flow(&self) -> &str {
        match self {
            Self::JobStarted { flow, .. }
            | Self::JobCompleted { flow, .. }
            | Self::JobFailed { flow, .. } => flow,
        }
    }
}

/// Receiver of scheduler events; must never block the caller
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SchedulerEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: SchedulerEvent) {}
}

/// Forwards events over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<SchedulerEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: SchedulerEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.sender.send(event);
    }
}

/// Writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SchedulerEvent) {
        match &event {
            SchedulerEvent::JobStarted { job, flow } => {
                tracing::debug!("🔔 {} job={} flow={}", event.name(), job, flow);
            }
            SchedulerEvent::JobCompleted { job, flow, duration } => {
                tracing::info!("✅ {} job={} flow={} in {:?}", event.name(), job, flow, duration);
            }
            SchedulerEvent::JobFailed { job, flow, duration, error } => {
                tracing::warn!(
                    "❌ {} job={} flow={} after {:?}: {}",
                    event.name(),
                    job,
                    flow,
                    duration,
                    error
                );
            }
        }
    }
}
