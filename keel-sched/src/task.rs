//! Task definitions and status reporting.

use crate::breaker::{CircuitBreakerConfig, CircuitState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Error type returned by task handlers.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed future produced by a handler invocation.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;

/// A task handler: invoked once per scheduled run.
pub type TaskHandler = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Definition of a periodic background task.
#[derive(Clone)]
pub struct TaskSpec {
    /// Unique id used by the control operations.
    pub id: String,
    /// Human-readable name for logs.
    pub name: String,
    /// Base interval between runs.
    pub interval: Duration,
    /// Uniform jitter applied to each delay, in `[-jitter, +jitter]`.
    pub jitter: Duration,
    /// Tasks sharing a group never run at the same instant.
    pub mutex_group: Option<String>,
    /// Breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Whether the task is scheduled at start.
    pub enabled: bool,
    /// The handler.
    pub handler: TaskHandler,
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("jitter", &self.jitter)
            .field("mutex_group", &self.mutex_group)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl TaskSpec {
    /// Define a task running `handler` every `interval`.
    pub fn new<F, Fut>(id: &str, name: &str, interval: Duration, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            interval,
            jitter: Duration::ZERO,
            mutex_group: None,
            circuit_breaker: CircuitBreakerConfig::default(),
            enabled: true,
            handler: Arc::new(move || Box::pin(handler()) as TaskFuture),
        }
    }

    /// Apply uniform jitter to each scheduled delay.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Join a mutual-exclusion group.
    pub fn with_mutex_group(mut self, group: &str) -> Self {
        self.mutex_group = Some(group.to_string());
        self
    }

    /// Override the breaker thresholds.
    pub fn with_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Register the task disabled; `enable` gates it in later.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Lifecycle state reported for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for its next tick.
    Idle,
    /// Handler currently executing.
    Running,
    /// Breaker open; ticks are skipped.
    CircuitOpen,
    /// Gated off by `disable`.
    Disabled,
}

/// Point-in-time status of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    /// Task id.
    pub id: String,
    /// Task name.
    pub name: String,
    /// Lifecycle state.
    pub state: TaskState,
    /// Breaker state.
    pub circuit: CircuitState,
    /// When the task last started a run.
    pub last_run: Option<DateTime<Utc>>,
    /// When the task last succeeded.
    pub last_success: Option<DateTime<Utc>>,
    /// Consecutive failures so far.
    pub consecutive_failures: u32,
    /// Total completed runs (success or failure).
    pub runs: u64,
}
