//! Persistent idempotency index keyed by action fingerprints.
//!
//! Every side effect is fingerprinted from `(action, scope, resource,
//! params)`; the index remembers whether that exact effect is pending,
//! completed, or failed, so a crashed or retried agent never performs the
//! same external mutation twice. `failed` is terminal — the only way out is
//! a new fingerprint.

use crate::record::IntentOutcome;
use chrono::{DateTime, Utc};
use keel_common::canonical::{canonical_string, sha256_hex};
use keel_common::errors::ErrorCode;
use keel_store::{ResilientStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default entry time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default entry cap.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Configuration for the idempotency index.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Entries older than this are evicted.
    pub ttl: Duration,
    /// Hard cap on stored entries; oldest-by-creation are dropped first.
    pub max_entries: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Lifecycle of a deduplicated side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    /// Intent declared, outcome unknown.
    Pending,
    /// The side effect completed.
    Completed,
    /// The side effect failed; terminal.
    Failed,
}

impl IdempotencyStatus {
    /// True for states with no outgoing transitions to `pending`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// How a pending entry should be compensated after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStrategy {
    /// The action is safe to repeat blindly.
    SafeRetry,
    /// Probe the external system before repeating.
    CheckThenRetry,
    /// Do not repeat; surface to an operator.
    Skip,
}

/// One tracked side effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    /// The fingerprint key.
    pub key: String,
    /// Current lifecycle state.
    pub status: IdempotencyStatus,
    /// When the entry was first created.
    pub created_at: DateTime<Utc>,
    /// When it completed, if it did.
    pub completed_at: Option<DateTime<Utc>>,
    /// When it failed, if it did.
    pub failed_at: Option<DateTime<Utc>>,
    /// Audit seq of the declaring intent.
    pub intent_seq: Option<u64>,
    /// Recovery policy for a pending entry found at boot.
    pub compensation_strategy: CompensationStrategy,
    /// Last recorded error.
    pub last_error: Option<String>,
    /// Times the action was attempted.
    pub attempts: u32,
}

/// Errors surfaced by index operations.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// Attempted transition out of `failed`.
    #[error("entry '{key}' is failed; no transition out of failed is permitted")]
    TerminalTransition {
        /// The offending key.
        key: String,
    },

    /// Completion or failure marked for a key that was never pending.
    #[error("no entry for key '{key}'")]
    UnknownKey {
        /// The missing key.
        key: String,
    },

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// State serialization failed.
    #[error("index serialization failed")]
    Serialize(#[from] serde_json::Error),
}

impl IdempotencyError {
    /// Catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TerminalTransition { .. } => ErrorCode::IdempotencyTerminalTransition,
            Self::UnknownKey { .. } => ErrorCode::IdempotencyUnknownKey,
            // Backing-store failures keep their more specific code.
            Self::Store(inner) => inner.code(),
            Self::Serialize(_) => ErrorCode::IdempotencyPersistFailed,
        }
    }
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictStats {
    /// Entries dropped because their TTL expired.
    pub expired: usize,
    /// Entries dropped to get back under the cap.
    pub capped: usize,
}

/// Build the deterministic fingerprint for an action.
///
/// `params` are canonicalized (sorted keys at every level), so insertion
/// order never changes the key.
pub fn fingerprint(action: &str, scope: &str, resource: &str, params: &Value) -> String {
    let canonical = canonical_string(params).unwrap_or_else(|_| "null".to_string());
    let digest = sha256_hex(canonical.as_bytes());
    format!("{action}:{scope}/{resource}:{}", &digest[..16])
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexState {
    entries: BTreeMap<String, IdempotencyEntry>,
}

/// Persistent fingerprint → entry mapping with TTL eviction and a FIFO cap.
pub struct IdempotencyIndex {
    store: ResilientStore,
    config: IdempotencyConfig,
}

impl IdempotencyIndex {
    /// Create an index backed by `store`.
    pub fn new(store: ResilientStore, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }

    /// Look up an entry.
    pub async fn check(&self, key: &str) -> Result<Option<IdempotencyEntry>, IdempotencyError> {
        let state = self.load().await?;
        Ok(state.entries.get(key).cloned())
    }

    /// Create (or refresh) a pending entry.
    ///
    /// A terminal entry is returned unchanged — the caller must not repeat
    /// the side effect. An existing pending entry counts another attempt.
    pub async fn mark_pending(
        &self,
        key: &str,
        intent_seq: Option<u64>,
        strategy: CompensationStrategy,
    ) -> Result<IdempotencyEntry, IdempotencyError> {
        let mut state = self.load().await?;

        if let Some(existing) = state.entries.get_mut(key) {
            if existing.status.is_terminal() {
                debug!(key, status = ?existing.status, "mark_pending hit a terminal entry");
                return Ok(existing.clone());
            }
            existing.attempts += 1;
            existing.intent_seq = intent_seq.or(existing.intent_seq);
            let updated = existing.clone();
            self.persist(&state).await?;
            return Ok(updated);
        }

        let entry = IdempotencyEntry {
            key: key.to_string(),
            status: IdempotencyStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            failed_at: None,
            intent_seq,
            compensation_strategy: strategy,
            last_error: None,
            attempts: 1,
        };
        state.entries.insert(key.to_string(), entry.clone());

        // Inline FIFO cap: growth never exceeds the limit between scheduled
        // eviction passes.
        let over = state.entries.len().saturating_sub(self.config.max_entries);
        if over > 0 {
            drop_oldest(&mut state, over);
        }

        self.persist(&state).await?;
        Ok(entry)
    }

    /// Mark an entry completed. Rejected for `failed` entries.
    pub async fn mark_completed(&self, key: &str) -> Result<IdempotencyEntry, IdempotencyError> {
        let mut state = self.load().await?;
        let entry = state
            .entries
            .get_mut(key)
            .ok_or_else(|| IdempotencyError::UnknownKey {
                key: key.to_string(),
            })?;
        if entry.status == IdempotencyStatus::Failed {
            return Err(IdempotencyError::TerminalTransition {
                key: key.to_string(),
            });
        }
        entry.status = IdempotencyStatus::Completed;
        entry.completed_at = Some(Utc::now());
        let updated = entry.clone();
        self.persist(&state).await?;
        Ok(updated)
    }

    /// Mark an entry failed. Accepts pending or completed entries; an
    /// already-failed entry is returned unchanged.
    pub async fn mark_failed(
        &self,
        key: &str,
        error: &str,
    ) -> Result<IdempotencyEntry, IdempotencyError> {
        let mut state = self.load().await?;
        let entry = state
            .entries
            .get_mut(key)
            .ok_or_else(|| IdempotencyError::UnknownKey {
                key: key.to_string(),
            })?;
        if entry.status == IdempotencyStatus::Failed {
            return Ok(entry.clone());
        }
        entry.status = IdempotencyStatus::Failed;
        entry.failed_at = Some(Utc::now());
        entry.last_error = Some(error.to_string());
        let updated = entry.clone();
        self.persist(&state).await?;
        Ok(updated)
    }

    /// Drop expired entries, then enforce the cap.
    pub async fn evict(&self) -> Result<EvictStats, IdempotencyError> {
        let mut state = self.load().await?;
        let mut stats = EvictStats::default();
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.ttl).unwrap_or(chrono::Duration::zero());

        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.created_at > cutoff);
        stats.expired = before - state.entries.len();

        let over = state.entries.len().saturating_sub(self.config.max_entries);
        if over > 0 {
            drop_oldest(&mut state, over);
            stats.capped = over;
        }

        if stats.expired + stats.capped > 0 {
            info!(expired = stats.expired, capped = stats.capped, "idempotency entries evicted");
            self.persist(&state).await?;
        }
        Ok(stats)
    }

    /// Boot-time reconciliation of pending entries.
    ///
    /// With an audit query, each pending entry with an intent seq is
    /// resolved: a recorded error promotes it to `failed`, a recorded
    /// success to `completed`. Entries the audit trail knows nothing about
    /// stay pending and are returned for compensation. `failed` entries are
    /// never returned.
    pub async fn reconcile_pending(
        &self,
        audit_query: Option<&dyn Fn(u64) -> Option<IntentOutcome>>,
    ) -> Result<Vec<IdempotencyEntry>, IdempotencyError> {
        let mut state = self.load().await?;
        let mut unresolved = Vec::new();
        let mut changed = false;

        for entry in state.entries.values_mut() {
            if entry.status != IdempotencyStatus::Pending {
                continue;
            }
            let outcome = audit_query
                .zip(entry.intent_seq)
                .and_then(|(query, seq)| query(seq));
            match outcome {
                Some(IntentOutcome {
                    error: Some(error), ..
                }) => {
                    warn!(key = %entry.key, %error, "pending entry resolved to failed");
                    entry.status = IdempotencyStatus::Failed;
                    entry.failed_at = Some(Utc::now());
                    entry.last_error = Some(error);
                    changed = true;
                }
                Some(IntentOutcome { has_result: true, .. }) => {
                    debug!(key = %entry.key, "pending entry resolved to completed");
                    entry.status = IdempotencyStatus::Completed;
                    entry.completed_at = Some(Utc::now());
                    changed = true;
                }
                _ => unresolved.push(entry.clone()),
            }
        }

        if changed {
            self.persist(&state).await?;
        }
        Ok(unresolved)
    }

    /// Number of stored entries.
    pub async fn len(&self) -> Result<usize, IdempotencyError> {
        Ok(self.load().await?.entries.len())
    }

    /// True when no entries are stored.
    pub async fn is_empty(&self) -> Result<bool, IdempotencyError> {
        Ok(self.len().await? == 0)
    }

    async fn load(&self) -> Result<IndexState, IdempotencyError> {
        match self.store.get().await? {
            Some(map) => Ok(serde_json::from_value(Value::Object(map))?),
            None => Ok(IndexState::default()),
        }
    }

    async fn persist(&self, state: &IndexState) -> Result<(), IdempotencyError> {
        let Value::Object(map) = serde_json::to_value(state)? else {
            unreachable!("index state serializes to an object");
        };
        self.store.set(map).await?;
        Ok(())
    }
}

/// Remove the `count` oldest entries by creation time.
fn drop_oldest(state: &mut IndexState, count: usize) {
    let mut by_age: Vec<(DateTime<Utc>, String)> = state
        .entries
        .values()
        .map(|e| (e.created_at, e.key.clone()))
        .collect();
    by_age.sort();
    for (_, key) in by_age.into_iter().take(count) {
        state.entries.remove(&key);
    }
}
