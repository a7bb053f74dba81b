//! Cooperative scheduler driving the substrate's background tasks.
//!
//! Each registered task loops on `interval ± jitter` (clamped to at least
//! one second), gated by a per-task circuit breaker and an optional mutex
//! group. Handler failures are caught and counted; they never propagate to
//! other tasks. A task whose group is busy reschedules itself rather than
//! blocking the runner.

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::task::{TaskSpec, TaskState, TaskStatus};
use chrono::Utc;
use keel_common::errors::ErrorCode;
use keel_common::events::{EventBus, EventKind};
use rand::RngExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Scheduler-wide settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Lower bound on any scheduled delay.
    pub min_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
        }
    }
}

/// Errors surfaced by the control operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No task registered under this id.
    #[error("no task registered with id '{id}'")]
    UnknownTask {
        /// The unknown id.
        id: String,
    },

    /// A task with this id is already registered.
    #[error("task id '{id}' is already registered")]
    DuplicateTask {
        /// The duplicated id.
        id: String,
    },
}

impl SchedulerError {
    /// Catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownTask { .. } => ErrorCode::SchedulerUnknownTask,
            Self::DuplicateTask { .. } => ErrorCode::SchedulerDuplicateTask,
        }
    }
}

struct TaskRuntime {
    breaker: CircuitBreaker,
    state: TaskState,
    last_run: Option<chrono::DateTime<Utc>>,
    last_success: Option<chrono::DateTime<Utc>>,
    runs: u64,
}

struct TaskSlot {
    spec: TaskSpec,
    runtime: Mutex<TaskRuntime>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    tasks: RwLock<HashMap<String, Arc<TaskSlot>>>,
    groups: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    running: AtomicBool,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    events: Option<EventBus>,
}

/// Registry and runner for named periodic tasks.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    /// Create an idle scheduler.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_events(config, None)
    }

    /// Create an idle scheduler with a substrate event bus attached.
    pub fn with_events(config: SchedulerConfig, events: Option<EventBus>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                tasks: RwLock::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                handles: std::sync::Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    /// Register a task. If the scheduler is already started, the task's
    /// loop spawns immediately.
    pub async fn register(&self, spec: TaskSpec) -> Result<(), SchedulerError> {
        let id = spec.id.clone();
        let slot = Arc::new(TaskSlot {
            runtime: Mutex::new(TaskRuntime {
                breaker: CircuitBreaker::new(spec.circuit_breaker.clone()),
                state: if spec.enabled {
                    TaskState::Idle
                } else {
                    TaskState::Disabled
                },
                last_run: None,
                last_success: None,
                runs: 0,
            }),
            spec,
        });

        {
            let mut tasks = self.inner.tasks.write().await;
            if tasks.contains_key(&id) {
                return Err(SchedulerError::DuplicateTask { id });
            }
            tasks.insert(id, slot.clone());
        }
        if self.inner.running.load(Ordering::SeqCst) {
            self.spawn_loop(slot);
        }
        Ok(())
    }

    /// Start every registered task's loop.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let tasks = self.inner.tasks.read().await;
        for slot in tasks.values() {
            self.spawn_loop(slot.clone());
        }
        debug!(tasks = tasks.len(), "scheduler started");
    }

    /// Stop scheduling. In-flight handlers are aborted with their loops.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let mut handles = self.inner.handles.lock().unwrap_or_else(|e| e.into_inner());
        for handle in handles.drain(..) {
            handle.abort();
        }
        debug!("scheduler stopped");
    }

    /// Run a task immediately, waiting for its mutex group if it has one.
    ///
    /// Manual runs bypass the breaker gate and the disabled gate; their
    /// outcome still feeds the breaker.
    pub async fn trigger(&self, id: &str) -> Result<(), SchedulerError> {
        let slot = self.slot(id).await?;
        self.inner.clone().tick(slot, true).await;
        Ok(())
    }

    /// Gate a task off; its loop keeps ticking but skips every run.
    pub async fn disable(&self, id: &str) -> Result<(), SchedulerError> {
        let slot = self.slot(id).await?;
        let mut rt = slot.runtime.lock().await;
        rt.state = TaskState::Disabled;
        Ok(())
    }

    /// Re-enable a disabled task.
    pub async fn enable(&self, id: &str) -> Result<(), SchedulerError> {
        let slot = self.slot(id).await?;
        let mut rt = slot.runtime.lock().await;
        if rt.state == TaskState::Disabled {
            rt.state = TaskState::Idle;
        }
        Ok(())
    }

    /// Clear a task's failure count and close its breaker.
    pub async fn reset_circuit_breaker(&self, id: &str) -> Result<(), SchedulerError> {
        let slot = self.slot(id).await?;
        let mut rt = slot.runtime.lock().await;
        rt.breaker.reset();
        if rt.state == TaskState::CircuitOpen {
            rt.state = TaskState::Idle;
        }
        Ok(())
    }

    /// Status of one task.
    pub async fn status(&self, id: &str) -> Result<TaskStatus, SchedulerError> {
        let slot = self.slot(id).await?;
        Ok(Self::snapshot(&slot).await)
    }

    /// Status of every task, ordered by id.
    pub async fn status_all(&self) -> Vec<TaskStatus> {
        let tasks = self.inner.tasks.read().await;
        let mut slots: Vec<_> = tasks.values().cloned().collect();
        slots.sort_by(|a, b| a.spec.id.cmp(&b.spec.id));
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(Self::snapshot(&slot).await);
        }
        out
    }

    async fn snapshot(slot: &TaskSlot) -> TaskStatus {
        let rt = slot.runtime.lock().await;
        TaskStatus {
            id: slot.spec.id.clone(),
            name: slot.spec.name.clone(),
            state: rt.state,
            circuit: rt.breaker.state(),
            last_run: rt.last_run,
            last_success: rt.last_success,
            consecutive_failures: rt.breaker.consecutive_failures(),
            runs: rt.runs,
        }
    }

    async fn slot(&self, id: &str) -> Result<Arc<TaskSlot>, SchedulerError> {
        let tasks = self.inner.tasks.read().await;
        tasks
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownTask { id: id.to_string() })
    }

    fn spawn_loop(&self, slot: Arc<TaskSlot>) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                let delay = inner.next_delay(&slot.spec);
                tokio::time::sleep(delay).await;
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                inner.clone().tick(slot.clone(), false).await;
            }
        });
        self.inner
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }
}

impl SchedulerInner {
    /// Delay until the next tick: `interval + U(-jitter, +jitter)`, clamped.
    fn next_delay(&self, spec: &TaskSpec) -> Duration {
        let base = spec.interval.as_millis() as i64;
        let jitter = spec.jitter.as_millis() as i64;
        let offset = if jitter > 0 {
            rand::rng().random_range(-jitter..=jitter)
        } else {
            0
        };
        let floor = self.config.min_delay.as_millis() as i64;
        Duration::from_millis((base + offset).max(floor) as u64)
    }

    async fn group_mutex(&self, name: &str) -> Arc<Mutex<()>> {
        let mut groups = self.groups.lock().await;
        groups
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// One attempt at running a task, scheduled or manual.
    async fn tick(self: Arc<Self>, slot: Arc<TaskSlot>, manual: bool) {
        let was_disabled;
        {
            let mut rt = slot.runtime.lock().await;
            was_disabled = rt.state == TaskState::Disabled;
            if rt.state == TaskState::Running {
                return;
            }
            if !manual {
                if was_disabled {
                    return;
                }
                if !rt.breaker.should_attempt(Instant::now()) {
                    rt.state = TaskState::CircuitOpen;
                    debug!(task = %slot.spec.id, "tick skipped; circuit open");
                    return;
                }
            }
        }

        // Mutex group: scheduled ticks yield and try again next interval;
        // manual triggers wait their turn.
        let _group_guard: Option<OwnedMutexGuard<()>> = match &slot.spec.mutex_group {
            Some(group) => {
                let mutex = self.group_mutex(group).await;
                if manual {
                    Some(mutex.lock_owned().await)
                } else {
                    match mutex.try_lock_owned() {
                        Ok(guard) => Some(guard),
                        Err(_) => {
                            debug!(task = %slot.spec.id, group = %group, "group busy; rescheduled");
                            return;
                        }
                    }
                }
            }
            None => None,
        };

        {
            let mut rt = slot.runtime.lock().await;
            rt.state = TaskState::Running;
            rt.last_run = Some(Utc::now());
        }

        // Run on a separate task so a panicking handler is contained and
        // counted like any other failure.
        let handler = slot.spec.handler.clone();
        let joined = tokio::spawn(async move { handler().await }).await;
        let outcome: Result<(), String> = match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(join_err) => Err(format!("handler panicked: {join_err}")),
        };

        let mut rt = slot.runtime.lock().await;
        rt.runs += 1;
        match outcome {
            Ok(()) => {
                rt.breaker.record_success();
                rt.last_success = Some(Utc::now());
                rt.state = if was_disabled {
                    TaskState::Disabled
                } else {
                    TaskState::Idle
                };
            }
            Err(message) => {
                warn!(task = %slot.spec.id, failures = rt.breaker.consecutive_failures() + 1,
                    "task failed: {message}");
                let opened = rt.breaker.record_failure(Instant::now());
                rt.state = if was_disabled {
                    TaskState::Disabled
                } else if rt.breaker.state() == CircuitState::Open {
                    TaskState::CircuitOpen
                } else {
                    TaskState::Idle
                };
                if opened {
                    warn!(task = %slot.spec.id, "circuit opened");
                    if let Some(events) = &self.events {
                        events.emit(
                            EventKind::CircuitOpen,
                            "scheduler",
                            &json!({ "task": slot.spec.id, "error": message }),
                        );
                    }
                }
            }
        }
    }
}
