//! The composition root: every durable artifact wired behind one handle.

use crate::config::SubstrateConfig;
use keel_audit::{
    fingerprint, AuditError, AuditStatus, AuditTrail, CompensationStrategy, IdempotencyEntry,
    IdempotencyError, IdempotencyIndex,
};
use keel_common::config::EnvError;
use keel_common::errors::ErrorCode;
use keel_common::events::EventBus;
use keel_common::redact::Redactor;
use keel_journal::{JournalError, Wal, WalOp, WalStatus};
use keel_sched::{Scheduler, TaskStatus};
use keel_store::{ResilientStore, StoreError};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors surfaced by substrate operations.
#[derive(Debug, Error)]
pub enum SubstrateError {
    /// Environment configuration was invalid.
    #[error("configuration errors: {0:?}")]
    Config(Vec<EnvError>),

    /// The substrate root could not be prepared.
    #[error("substrate root {root} is unavailable")]
    RootUnavailable {
        /// The root that failed.
        root: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Audit trail failure.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// Idempotency index failure.
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    /// Journal failure.
    #[error(transparent)]
    Journal(#[from] JournalError),

    /// Resilient-store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Result serialization failure.
    #[error("action result serialization failed")]
    Serialize(#[from] serde_json::Error),

    /// The executed action itself failed; recorded in the trail and index.
    #[error("action failed: {message}")]
    ActionFailed {
        /// Redaction-safe failure message.
        message: String,
    },
}

impl SubstrateError {
    /// Catalog code for this error.
    ///
    /// `None` for failures that belong to the caller's action rather than
    /// the substrate itself.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Config(_) => Some(ErrorCode::ConfigEnvError),
            Self::RootUnavailable { .. } => Some(ErrorCode::ConfigRootUnavailable),
            Self::Audit(inner) => Some(inner.code()),
            Self::Idempotency(inner) => Some(inner.code()),
            Self::Journal(inner) => Some(inner.code()),
            Self::Store(inner) => Some(inner.code()),
            Self::Serialize(_) | Self::ActionFailed { .. } => None,
        }
    }
}

/// A side-effectful action about to be executed through the substrate.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Action name, e.g. `create_pr`.
    pub action: String,
    /// Dedup scope, e.g. a provider name.
    pub scope: String,
    /// Resource within the scope, e.g. a repository.
    pub resource: String,
    /// Action parameters; redacted before any durable write.
    pub params: Value,
    /// How a pending entry should be compensated after a crash.
    pub strategy: CompensationStrategy,
}

impl ActionRequest {
    /// The audit target string for this request.
    pub fn target(&self) -> String {
        format!("{}/{}", self.scope, self.resource)
    }

    /// The deterministic dedupe key for this request.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.action, &self.scope, &self.resource, &self.params)
    }
}

/// Outcome of [`Substrate::run_action`].
#[derive(Debug)]
pub enum ActionOutcome<T> {
    /// The action ran; the value is its result.
    Executed(T),
    /// A terminal entry already covered this fingerprint; nothing ran.
    Deduplicated(IdempotencyEntry),
}

/// Aggregate status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SubstrateStatus {
    /// Journal progress and cursor lag.
    pub journal: WalStatus,
    /// Trail sequence and pending intents.
    pub audit: AuditStatus,
    /// Stored idempotency entries.
    pub idempotency_entries: usize,
    /// Background task states.
    pub tasks: Vec<TaskStatus>,
}

/// Crash-resilient memory, tamper-evident auditing, and deduplicated
/// mutation behind a single handle.
pub struct Substrate {
    config: SubstrateConfig,
    events: EventBus,
    redactor: Arc<Redactor>,
    audit: AuditTrail,
    journal: Wal,
    idempotency: IdempotencyIndex,
    scheduler: Scheduler,
}

impl Substrate {
    /// Open with defaults plus `KEEL_*` environment overrides.
    pub async fn open_from_env(root: impl Into<PathBuf>) -> Result<Self, SubstrateError> {
        let config = SubstrateConfig::from_env(root).map_err(SubstrateError::Config)?;
        Self::open(config).await
    }

    /// Open every artifact under the configured root.
    pub async fn open(config: SubstrateConfig) -> Result<Self, SubstrateError> {
        let events = EventBus::default();
        let redactor = Arc::new(Redactor::new());

        std::fs::create_dir_all(config.state_dir()).map_err(|source| {
            SubstrateError::RootUnavailable {
                root: config.root.clone(),
                source,
            }
        })?;

        let audit = AuditTrail::open_with_events(
            config.audit_path(),
            config.audit.clone(),
            redactor.clone(),
            Some(events.clone()),
        )
        .await?;

        let journal = Wal::open_with_events(
            config.journal_dir(),
            config.journal.clone(),
            Some(events.clone()),
        )
        .await?;

        let idempotency_store = ResilientStore::open(
            config.state_dir().join("idempotency.json"),
            config.store.clone(),
        )
        .with_events(events.clone());
        let idempotency =
            IdempotencyIndex::new(idempotency_store, config.idempotency.clone());

        let scheduler =
            Scheduler::with_events(config.scheduler.clone(), Some(events.clone()));

        info!(root = %config.root.display(), "substrate opened");
        Ok(Self {
            config,
            events,
            redactor,
            audit,
            journal,
            idempotency,
            scheduler,
        })
    }

    /// Execute a side-effectful action under the full protocol:
    /// idempotency check → audit intent → execute → audit result →
    /// idempotency terminal mark.
    ///
    /// A terminal entry for the same fingerprint short-circuits to
    /// [`ActionOutcome::Deduplicated`] without touching the outside world.
    pub async fn run_action<T, F, Fut>(
        &self,
        request: ActionRequest,
        execute: F,
    ) -> Result<ActionOutcome<T>, SubstrateError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Box<dyn std::error::Error + Send + Sync>>>,
    {
        let key = request.fingerprint();
        let target = request.target();

        if let Some(entry) = self.idempotency.check(&key).await? {
            if entry.status.is_terminal() {
                info!(key = %key, status = ?entry.status, "action deduplicated");
                return Ok(ActionOutcome::Deduplicated(entry));
            }
        }

        let intent_seq = self
            .audit
            .record_intent(
                &request.action,
                &target,
                request.params.clone(),
                Some(key.clone()),
            )
            .await?;
        self.idempotency
            .mark_pending(&key, Some(intent_seq), request.strategy)
            .await?;

        match execute().await {
            Ok(value) => {
                let rendered = serde_json::to_value(&value)?;
                self.audit
                    .record_result(intent_seq, &request.action, &target, Ok(rendered))
                    .await?;
                self.idempotency.mark_completed(&key).await?;
                Ok(ActionOutcome::Executed(value))
            }
            Err(err) => {
                let message = self.redactor.redact(&err.to_string());
                warn!(key = %key, "action failed: {message}");
                self.audit
                    .record_result(intent_seq, &request.action, &target, Err(message.clone()))
                    .await?;
                self.idempotency.mark_failed(&key, &message).await?;
                Err(SubstrateError::ActionFailed { message })
            }
        }
    }

    /// Journal a produced file so the sync cursors mirror it downstream.
    pub async fn record_artifact(&self, path: &str, data: &[u8]) -> Result<u64, SubstrateError> {
        Ok(self.journal.append(WalOp::Write, path, Some(data)).await?)
    }

    /// Boot-time reconciliation: resolve pending idempotency entries
    /// against the trail, returning the ones still needing compensation.
    pub async fn reconcile(&self) -> Result<Vec<IdempotencyEntry>, SubstrateError> {
        let outcomes = self.audit.intent_outcomes().await;
        let query = move |seq: u64| outcomes.get(&seq).cloned();
        let unresolved = self.idempotency.reconcile_pending(Some(&query)).await?;
        if !unresolved.is_empty() {
            warn!(
                count = unresolved.len(),
                "pending side effects need compensation"
            );
        }
        Ok(unresolved)
    }

    /// Aggregate status snapshot.
    pub async fn status(&self) -> Result<SubstrateStatus, SubstrateError> {
        let journal = self.journal.status().await;
        if journal.object_store.stale || journal.version_control.stale {
            warn!(
                object_store_lag = journal.object_store.lag,
                version_control_lag = journal.version_control.lag,
                "journal cursor is stale"
            );
        }
        Ok(SubstrateStatus {
            journal,
            audit: self.audit.status().await,
            idempotency_entries: self.idempotency.len().await?,
            tasks: self.scheduler.status_all().await,
        })
    }

    /// Open an additional resilient-store document under `state/`.
    pub fn state_document(&self, name: &str) -> ResilientStore {
        ResilientStore::open(self.config.state_dir().join(name), self.config.store.clone())
            .with_events(self.events.clone())
    }

    /// The substrate configuration.
    pub fn config(&self) -> &SubstrateConfig {
        &self.config
    }

    /// The substrate event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The shared redactor.
    pub fn redactor(&self) -> &Arc<Redactor> {
        &self.redactor
    }

    /// The audit trail.
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// The journal.
    pub fn journal(&self) -> &Wal {
        &self.journal
    }

    /// The idempotency index.
    pub fn idempotency(&self) -> &IdempotencyIndex {
        &self.idempotency
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}
