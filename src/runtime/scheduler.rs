//! Background job scheduler
//!
//! Turns job configurations into flow executions on an interval, a cron
//! schedule, or a one-shot timeout. Every fire runs on its own task against
//! deep copies of the job's state and runtime templates, so a slow flow never
//! holds up the clock or other jobs. Fires of the same job may overlap; their
//! JobState writes race and the last one to finish wins.

use crate::{
    error::{ConfigurationError, EngineError, SchedulerRunError},
    runtime::{
        context::{ExecutionResult, Runtime},
        engine::Engine,
        events::{EventSink, SchedulerEvent},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};
use tokio::{
    sync::RwLock,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

/// Runs a flow on behalf of the scheduler
#[async_trait]
pub trait FlowExecutor: Send + Sync {
    async fn execute_flow(
        &self,
        flow: &str,
        state: Value,
        runtime: Runtime,
    ) -> Result<ExecutionResult, EngineError>;
}

#[async_trait]
impl FlowExecutor for Engine {
    async fn execute_flow(
        &self,
        flow: &str,
        state: Value,
        runtime: Runtime,
    ) -> Result<ExecutionResult, EngineError> {
        self.execute(flow, Some(state), Some(runtime)).await
    }
}

/// Interval or timeout length: integer milliseconds or an expression like `"10s"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleDuration {
    Millis(u64),
    Expression(String),
}

impl ScheduleDuration {
    pub fn to_duration(&self) -> Result<Duration, String> {
        match self {
            Self::Millis(ms) => Ok(Duration::from_millis(*ms)),
            Self::Expression(expr) => parse_duration(expr),
        }
    }
}

impl From<u64> for ScheduleDuration {
    fn from(ms: u64) -> Self {
        Self::Millis(ms)
    }
}

impl From<&str> for ScheduleDuration {
    fn from(expr: &str) -> Self {
        Self::Expression(expr.to_string())
    }
}

/// Parse a duration expression.
///
/// Accepts bare milliseconds (`"250"`) and one or more `<number><unit>`
/// terms (`"500ms"`, `"1.5s"`, `"1h 30m"`, `"10 seconds"`).
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(ms) = text.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return Err(format!("expected a number in '{input}'"));
        }
        let amount: f64 = rest[..number_end]
            .parse()
            .map_err(|_| format!("invalid number in '{input}'"))?;
        rest = rest[number_end..].trim_start();

        let unit_end = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        let unit_ms =
            unit_millis(unit).ok_or_else(|| format!("unknown unit '{unit}' in '{input}'"))?;
        let term = Duration::try_from_secs_f64(amount * unit_ms / 1000.0)
            .map_err(|_| format!("duration out of range: '{input}'"))?;
        total = total
            .checked_add(term)
            .ok_or_else(|| format!("duration out of range: '{input}'"))?;
        rest = rest[unit_end..].trim_start();
    }
    Ok(total)
}

fn unit_millis(unit: &str) -> Option<f64> {
    let ms = match unit.to_ascii_lowercase().as_str() {
        "" | "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
        "d" | "day" | "days" => 86_400_000.0,
        "w" | "week" | "weeks" => 604_800_000.0,
        _ => return None,
    };
    Some(ms)
}

/// Expand a 5-field cron expression to the seconds-first form
fn normalize_cron(job: &str, expr: &str) -> Result<String, ConfigurationError> {
    let expr = expr.trim();
    match expr.split_whitespace().count() {
        5 => Ok(format!("0 {expr}")),
        6 | 7 => Ok(expr.to_string()),
        n => Err(ConfigurationError::InvalidSchedule {
            job: job.to_string(),
            message: format!("cron expression '{expr}' has {n} fields, expected 5 to 7"),
        }),
    }
}

fn default_enabled() -> bool {
    true
}

/// One scheduled job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub name: String,
    pub flow: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<ScheduleDuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<ScheduleDuration>,
    /// Template for each run's state; deep-copied per fire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<Value>,
    /// Template for each run's runtime values; deep-copied per fire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<Map<String, Value>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl JobConfig {
    fn named(name: impl Into<String>, flow: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flow: flow.into(),
            interval: None,
            cron: None,
            timeout: None,
            initial_state: None,
            runtime: None,
            enabled: true,
        }
    }

    pub fn every(
        name: impl Into<String>,
        flow: impl Into<String>,
        interval: impl Into<ScheduleDuration>,
    ) -> Self {
        Self {
            interval: Some(interval.into()),
            ..Self::named(name, flow)
        }
    }

    pub fn cron(name: impl Into<String>, flow: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            cron: Some(expr.into()),
            ..Self::named(name, flow)
        }
    }

    pub fn after(
        name: impl Into<String>,
        flow: impl Into<String>,
        timeout: impl Into<ScheduleDuration>,
    ) -> Self {
        Self {
            timeout: Some(timeout.into()),
            ..Self::named(name, flow)
        }
    }

    pub fn with_initial_state(mut self, state: Value) -> Self {
        self.initial_state = Some(state);
        self
    }

    pub fn with_runtime(mut self, runtime: Map<String, Value>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Validate and return the job's single trigger
    pub fn trigger(&self) -> Result<Trigger, ConfigurationError> {
        let declared: Vec<&str> = [
            ("interval", self.interval.is_some()),
            ("cron", self.cron.is_some()),
            ("timeout", self.timeout.is_some()),
        ]
        .into_iter()
        .filter_map(|(kind, set)| set.then_some(kind))
        .collect();

        if declared.len() > 1 {
            return Err(ConfigurationError::ConflictingTriggers {
                job: self.name.clone(),
                triggers: declared.join(", "),
            });
        }

        let invalid = |message: String| ConfigurationError::InvalidSchedule {
            job: self.name.clone(),
            message,
        };
        let positive = |duration: &ScheduleDuration| -> Result<Duration, ConfigurationError> {
            let duration = duration.to_duration().map_err(invalid)?;
            if duration.is_zero() {
                return Err(invalid("duration must be greater than zero".to_string()));
            }
            Ok(duration)
        };

        if let Some(interval) = &self.interval {
            return positive(interval).map(Trigger::Interval);
        }
        if let Some(expr) = &self.cron {
            return normalize_cron(&self.name, expr).map(Trigger::Cron);
        }
        if let Some(timeout) = &self.timeout {
            return positive(timeout).map(Trigger::Timeout);
        }
        Err(ConfigurationError::MissingTrigger(self.name.clone()))
    }
}

/// Validated trigger of a job
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Interval(Duration),
    /// Seconds-first cron expression
    Cron(String),
    Timeout(Duration),
}

/// Run history of one job
#[derive(Debug, Clone, Default)]
pub struct JobState {
    /// Number of fires, counted when the run starts
    pub runs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<ExecutionResult>,
    pub last_error: Option<SchedulerRunError>,
}

/// Shared per-job state map
///
/// Entries are created on a job's first fire and live as long as the map.
#[derive(Debug, Clone, Default)]
pub struct JobStates {
    entries: Arc<RwLock<HashMap<String, Arc<Mutex<JobState>>>>>,
}

fn lock(entry: &Mutex<JobState>) -> MutexGuard<'_, JobState> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobStates {
    async fn entry(&self, job: &str) -> Arc<Mutex<JobState>> {
        if let Some(entry) = self.entries.read().await.get(job) {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write().await;
        Arc::clone(entries.entry(job.to_string()).or_default())
    }

    pub async fn get(&self, job: &str) -> Option<JobState> {
        let entries = self.entries.read().await;
        entries.get(job).map(|entry| lock(entry).clone())
    }

    pub async fn snapshot(&self) -> HashMap<String, JobState> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(name, entry)| (name.clone(), lock(entry).clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Everything one job needs to fire
struct JobRunner {
    job: JobConfig,
    executor: Arc<dyn FlowExecutor>,
    events: Arc<dyn EventSink>,
    states: JobStates,
}

impl JobRunner {
    /// Start a run on its own task and return immediately
    fn fire(self: &Arc<Self>) {
        let runner = Arc::clone(self);
        tokio::spawn(async move { runner.trigger().await });
    }

    async fn trigger(&self) {
        let job = &self.job;
        let triggered_at = Utc::now();

        let state = job.initial_state.clone().unwrap_or_else(|| json!({}));
        let runtime = Runtime::with_values(job.runtime.clone().unwrap_or_default()).with_value(
            "scheduler",
            json!({
                "job": job.name,
                "triggeredAt": triggered_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            }),
        );

        self.events.emit(SchedulerEvent::JobStarted {
            job: job.name.clone(),
            flow: job.flow.clone(),
        });
        let entry = self.states.entry(&job.name).await;
        {
            let mut state = lock(&entry);
            state.runs += 1;
            state.last_run = Some(triggered_at);
        }

        tracing::debug!("🔔 Job '{}' fired, running flow '{}'", job.name, job.flow);
        let started = Instant::now();
        let outcome = self.executor.execute_flow(&job.flow, state, runtime).await;
        let duration = started.elapsed();

        match outcome {
            Ok(result) => {
                {
                    let mut state = lock(&entry);
                    state.last_result = Some(result);
                    state.last_error = None;
                }
                self.events.emit(SchedulerEvent::JobCompleted {
                    job: job.name.clone(),
                    flow: job.flow.clone(),
                    duration,
                });
            }
            Err(e) => {
                let error = SchedulerRunError {
                    job: job.name.clone(),
                    flow: job.flow.clone(),
                    message: e.to_string(),
                };
                tracing::error!("❌ {}", error);
                lock(&entry).last_error = Some(error);
                self.events.emit(SchedulerEvent::JobFailed {
                    job: job.name.clone(),
                    flow: job.flow.clone(),
                    duration,
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Running scheduler
///
/// Dropping it stops future fires, same as `stop`.
pub struct Scheduler {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    cron: Option<JobScheduler>,
    states: JobStates,
    jobs: Vec<String>,
}

impl Scheduler {
    /// Validate `jobs` and start every enabled one.
    ///
    /// Returns `Ok(None)` when no job is enabled.
    pub async fn start(
        jobs: Vec<JobConfig>,
        executor: Arc<dyn FlowExecutor>,
        events: Arc<dyn EventSink>,
    ) -> Result<Option<Self>, ConfigurationError> {
        let mut seen = HashSet::new();
        for job in &jobs {
            if !seen.insert(job.name.as_str()) {
                return Err(ConfigurationError::DuplicateJob(job.name.clone()));
            }
        }

        let mut planned = Vec::new();
        for job in jobs.into_iter().filter(|job| job.enabled) {
            let trigger = job.trigger()?;
            planned.push((job, trigger));
        }
        if planned.is_empty() {
            tracing::info!("⏰ No enabled jobs, scheduler not created");
            return Ok(None);
        }

        let cancel = CancellationToken::new();
        let states = JobStates::default();
        let names: Vec<String> = planned.iter().map(|(job, _)| job.name.clone()).collect();
        let runners: Vec<(Arc<JobRunner>, Trigger)> = planned
            .into_iter()
            .map(|(job, trigger)| {
                let runner = Arc::new(JobRunner {
                    job,
                    executor: Arc::clone(&executor),
                    events: Arc::clone(&events),
                    states: states.clone(),
                });
                (runner, trigger)
            })
            .collect();

        // Cron is the only trigger that can still fail, so it is settled
        // before any interval or timeout task exists.
        let cron = match start_cron(&runners, &cancel).await {
            Ok(cron) => cron,
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };

        let mut tasks = Vec::new();
        for (runner, trigger) in runners {
            match trigger {
                Trigger::Interval(period) => {
                    tracing::info!("⏰ Job '{}' every {:?}", runner.job.name, period);
                    tasks.push(spawn_interval(runner, period, cancel.child_token()));
                }
                Trigger::Timeout(delay) => {
                    tracing::info!("⏰ Job '{}' once after {:?}", runner.job.name, delay);
                    tasks.push(spawn_timeout(runner, delay, cancel.child_token()));
                }
                Trigger::Cron(_) => {}
            }
        }

        tracing::info!("✅ Scheduler started with {} jobs", names.len());
        Ok(Some(Self {
            cancel,
            tasks,
            cron,
            states,
            jobs: names,
        }))
    }

    /// Per-job run history
    pub fn job_states(&self) -> JobStates {
        self.states.clone()
    }

    pub fn job_names(&self) -> &[String] {
        &self.jobs
    }

    /// Stop all timers. Runs already in flight keep going and are not awaited.
    pub async fn stop(&mut self) {
        tracing::info!("⏹️ Stopping scheduler ({} jobs)", self.jobs.len());
        self.cancel.cancel();
        self.tasks.clear();
        if let Some(mut cron) = self.cron.take() {
            if let Err(e) = cron.shutdown().await {
                tracing::warn!("⚠️ Cron scheduler shutdown failed: {}", e);
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(mut cron) = self.cron.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = cron.shutdown().await;
                });
            }
        }
    }
}

fn spawn_interval(
    runner: Arc<JobRunner>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => runner.fire(),
            }
        }
    })
}

fn spawn_timeout(
    runner: Arc<JobRunner>,
    delay: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => runner.fire(),
        }
    })
}

/// Build every cron job, then register and start them on one `JobScheduler`.
///
/// Expressions are all checked before the scheduler exists. A scheduler that
/// fails part way is shut down before the error is returned.
async fn start_cron(
    runners: &[(Arc<JobRunner>, Trigger)],
    cancel: &CancellationToken,
) -> Result<Option<JobScheduler>, ConfigurationError> {
    let mut jobs = Vec::new();
    for (runner, trigger) in runners {
        if let Trigger::Cron(expr) = trigger {
            let job = cron_job(expr, Arc::clone(runner), cancel.child_token())?;
            tracing::info!("⏰ Job '{}' on cron '{}'", runner.job.name, expr);
            jobs.push(job);
        }
    }
    if jobs.is_empty() {
        return Ok(None);
    }

    let cron_names = runners
        .iter()
        .filter(|(_, trigger)| matches!(trigger, Trigger::Cron(_)))
        .map(|(runner, _)| runner.job.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let unavailable = |message: String| ConfigurationError::InvalidSchedule {
        job: cron_names.clone(),
        message,
    };

    let mut scheduler = JobScheduler::new()
        .await
        .map_err(|e| unavailable(format!("cron scheduler unavailable: {e}")))?;

    let registered = async {
        for job in jobs {
            scheduler
                .add(job)
                .await
                .map_err(|e| unavailable(format!("failed to register cron job: {e}")))?;
        }
        scheduler
            .start()
            .await
            .map_err(|e| unavailable(format!("failed to start cron scheduler: {e}")))
    }
    .await;

    match registered {
        Ok(()) => Ok(Some(scheduler)),
        Err(e) => {
            if let Err(shutdown) = scheduler.shutdown().await {
                tracing::warn!("⚠️ Cron scheduler shutdown failed: {}", shutdown);
            }
            Err(e)
        }
    }
}

fn cron_job(
    expr: &str,
    runner: Arc<JobRunner>,
    cancel: CancellationToken,
) -> Result<Job, ConfigurationError> {
    let name = runner.job.name.clone();
    Job::new_async(expr, move |_uuid, _scheduler| {
        let runner = Arc::clone(&runner);
        let cancel = cancel.clone();
        Box::pin(async move {
            if !cancel.is_cancelled() {
                runner.trigger().await;
            }
        })
    })
    .map_err(|e| ConfigurationError::InvalidSchedule {
        job: name,
        message: format!("invalid cron expression '{expr}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_forms() {
        let cases = [
            ("250", 250),
            ("500ms", 500),
            ("10s", 10_000),
            ("1.5s", 1_500),
            ("5m", 300_000),
            ("1h", 3_600_000),
            ("2d", 172_800_000),
            ("10 seconds", 10_000),
            ("1h 30m", 5_400_000),
            (" 2 Minutes ", 120_000),
        ];
        for (input, ms) in cases {
            assert_eq!(parse_duration(input), Ok(Duration::from_millis(ms)), "{input}");
        }
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for input in ["", "soon", "10 parsecs", "ms", "1..2s"] {
            assert!(parse_duration(input).is_err(), "{input}");
        }
    }

    #[test]
    fn test_trigger_validation() {
        assert_eq!(
            JobConfig::every("a", "f", 10u64).trigger().unwrap(),
            Trigger::Interval(Duration::from_millis(10))
        );
        assert_eq!(
            JobConfig::after("a", "f", "2s").trigger().unwrap(),
            Trigger::Timeout(Duration::from_secs(2))
        );
        assert_eq!(
            JobConfig::cron("a", "f", "*/5 * * * *").trigger().unwrap(),
            Trigger::Cron("0 */5 * * * *".to_string())
        );

        let missing = JobConfig {
            interval: None,
            ..JobConfig::every("a", "f", 10u64)
        };
        assert!(matches!(missing.trigger(), Err(ConfigurationError::MissingTrigger(_))));

        let both = JobConfig {
            cron: Some("* * * * *".into()),
            ..JobConfig::every("a", "f", 10u64)
        };
        assert!(matches!(both.trigger(), Err(ConfigurationError::ConflictingTriggers { .. })));

        assert!(matches!(
            JobConfig::every("a", "f", 0u64).trigger(),
            Err(ConfigurationError::InvalidSchedule { .. })
        ));
        assert!(matches!(
            JobConfig::cron("a", "f", "* *").trigger(),
            Err(ConfigurationError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_job_config_wire_shape() {
        let job: JobConfig = serde_json::from_value(json!({
            "name": "tick",
            "flow": "heartbeat",
            "interval": "30s",
            "initialState": {"count": 0},
            "runtime": {"source": "test"}
        }))
        .unwrap();

        assert!(job.enabled);
        assert_eq!(job.interval, Some(ScheduleDuration::Expression("30s".into())));
        assert_eq!(job.initial_state, Some(json!({"count": 0})));

        let raw = json!({"name": "n", "flow": "f", "timeout": 5, "enabled": false});
        let job: JobConfig = serde_json::from_value(raw).unwrap();
        assert!(!job.enabled);
        assert_eq!(job.timeout, Some(ScheduleDuration::Millis(5)));
    }

    #[tokio::test]
    async fn test_job_states_create_entries_once() {
        let states = JobStates::default();
        assert!(states.is_empty().await);

        let first = states.entry("a").await;
        let second = states.entry("a").await;
        lock(&first).runs += 1;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(states.len().await, 1);
        assert_eq!(states.get("a").await.map(|s| s.runs), Some(1));
        assert!(states.get("b").await.is_none());
    }
}
