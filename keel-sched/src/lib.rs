//! **keel-sched** – cooperative scheduler for substrate maintenance tasks.
//!
//! Journal sync, audit rotation checks, idempotency eviction, and sideline
//! GC all run as registered tasks: jittered intervals, per-task circuit
//! breakers, and named mutex groups keeping exclusive work from overlapping.

pub mod breaker;
pub mod scheduler;
pub mod task;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError};
pub use task::{TaskError, TaskFuture, TaskHandler, TaskSpec, TaskState, TaskStatus};
