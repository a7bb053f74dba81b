//! **keel-audit** – tamper-evident audit trail and idempotency index.
//!
//! The trail is an append-only JSONL file whose records chain through
//! SHA-256 with an optional keyed MAC; intents pair with results so every
//! side effect has a before and an after on disk. The idempotency index
//! remembers fingerprinted side effects across crashes and reconciles its
//! pending entries against the trail at boot.

pub mod chain;
pub mod idempotency;
pub mod record;
pub mod trail;

pub use chain::{canonical_form, chain_hash, chain_hmac, verify_chain, ChainReport};
pub use idempotency::{
    fingerprint, CompensationStrategy, EvictStats, IdempotencyConfig, IdempotencyEntry,
    IdempotencyError, IdempotencyIndex, IdempotencyStatus,
};
pub use record::{AuditPhase, AuditRecord, IntentOutcome, GENESIS};
pub use trail::{AuditConfig, AuditError, AuditStatus, AuditTrail};
