//! **keel** – the durable-state substrate, assembled.
//!
//! An autonomous agent's external side effects flow through one protocol:
//! idempotency check → audit `intent` → execute → audit `result` →
//! idempotency terminal mark → journal entry for any produced file. The
//! member crates implement the artifacts; this crate wires them together
//! under a single root directory and registers the background tasks that
//! keep them synced, evicted, and garbage-collected.

pub mod config;
pub mod substrate;
pub mod tasks;

pub use config::{SubstrateConfig, TaskIntervals};
pub use substrate::{
    ActionOutcome, ActionRequest, Substrate, SubstrateError, SubstrateStatus,
};

pub use keel_audit::{
    fingerprint, AuditConfig, AuditPhase, AuditRecord, AuditTrail, ChainReport,
    CompensationStrategy, IdempotencyConfig, IdempotencyEntry, IdempotencyIndex,
    IdempotencyStatus, IntentOutcome,
};
pub use keel_common::errors::{ErrorCode, ErrorEntry};
pub use keel_common::{EventBus, EventKind, RedactRule, Redactor, ScopedMutex};
pub use keel_journal::{
    CursorKind, JournalConfig, SyncTarget, SyncTargetError, Wal, WalOp, WalRecord,
};
pub use keel_sched::{CircuitBreakerConfig, Scheduler, TaskSpec, TaskState, TaskStatus};
pub use keel_store::{Migration, MigrationRegistry, ResilientStore, StoreConfig, StoreError};
