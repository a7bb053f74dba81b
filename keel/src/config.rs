//! Aggregate substrate configuration with environment overrides.

use keel_audit::{AuditConfig, IdempotencyConfig};
use keel_common::config::{EnvError, EnvParser};
use keel_journal::JournalConfig;
use keel_sched::SchedulerConfig;
use keel_store::StoreConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Cadence of the standard background tasks.
#[derive(Debug, Clone)]
pub struct TaskIntervals {
    /// Journal drain interval per cursor.
    pub sync: Duration,
    /// Idempotency eviction interval.
    pub evict: Duration,
    /// Sideline/archive GC interval.
    pub gc: Duration,
}

impl Default for TaskIntervals {
    fn default() -> Self {
        Self {
            sync: Duration::from_secs(30),
            evict: Duration::from_secs(60 * 60),
            gc: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// Configuration for a whole [`Substrate`](crate::Substrate).
///
/// Artifacts live under `root`:
///
/// ```text
/// <root>/
/// ├── audit.jsonl          # active audit trail (+ rotated siblings)
/// ├── journal/             # WAL segments and checkpoint
/// └── state/               # resilient-store documents (idempotency, ...)
/// ```
#[derive(Debug, Clone)]
pub struct SubstrateConfig {
    /// Directory owning every durable artifact.
    pub root: PathBuf,
    /// Resilient-store settings for `state/` documents.
    pub store: StoreConfig,
    /// Journal settings.
    pub journal: JournalConfig,
    /// Audit-trail settings.
    pub audit: AuditConfig,
    /// Idempotency-index settings.
    pub idempotency: IdempotencyConfig,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Standard task cadence.
    pub intervals: TaskIntervals,
}

impl SubstrateConfig {
    /// Defaults rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            store: StoreConfig::default(),
            journal: JournalConfig::default(),
            audit: AuditConfig::default(),
            idempotency: IdempotencyConfig::default(),
            scheduler: SchedulerConfig::default(),
            intervals: TaskIntervals::default(),
        }
    }

    /// Defaults plus `KEEL_*` environment overrides.
    ///
    /// All parse problems are collected and reported together.
    pub fn from_env(root: impl Into<PathBuf>) -> Result<Self, Vec<EnvError>> {
        let mut config = Self::new(root);
        let mut parser = EnvParser::new();

        config.store.max_size_bytes = parser
            .get_u64_range(
                "STORE_MAX_SIZE_BYTES",
                config.store.max_size_bytes as u64,
                1024,
                1024 * 1024 * 1024,
            )
            .value as usize;

        config.journal.max_segment_bytes = parser
            .get_u64_range(
                "JOURNAL_MAX_SEGMENT_BYTES",
                config.journal.max_segment_bytes,
                1024,
                1024 * 1024 * 1024,
            )
            .value;
        config.journal.max_segment_entries = parser
            .get_u64_range(
                "JOURNAL_MAX_SEGMENT_ENTRIES",
                config.journal.max_segment_entries,
                1,
                10_000_000,
            )
            .value;

        config.audit.max_size_bytes = parser
            .get_u64_range(
                "AUDIT_MAX_SIZE_BYTES",
                config.audit.max_size_bytes,
                1024,
                1024 * 1024 * 1024,
            )
            .value;
        if let Some(key) = parser.get_opt_string("AUDIT_HMAC_KEY") {
            config.audit.hmac_key = Some(key.value.into_bytes());
        }
        config.audit.dry_run_flush = parser
            .get_duration_ms(
                "AUDIT_DRY_RUN_FLUSH_MS",
                config.audit.dry_run_flush,
                Duration::from_millis(1),
                Duration::from_secs(10),
            )
            .value;

        config.idempotency.ttl = parser
            .get_duration_ms(
                "IDEMPOTENCY_TTL_MS",
                config.idempotency.ttl,
                Duration::from_secs(1),
                Duration::from_secs(365 * 24 * 60 * 60),
            )
            .value;
        config.idempotency.max_entries = parser
            .get_usize_range(
                "IDEMPOTENCY_MAX_ENTRIES",
                config.idempotency.max_entries,
                1,
                10_000_000,
            )
            .value;

        config.intervals.sync = parser
            .get_duration_ms(
                "SYNC_INTERVAL_MS",
                config.intervals.sync,
                Duration::from_secs(1),
                Duration::from_secs(24 * 60 * 60),
            )
            .value;
        config.intervals.evict = parser
            .get_duration_ms(
                "EVICT_INTERVAL_MS",
                config.intervals.evict,
                Duration::from_secs(1),
                Duration::from_secs(7 * 24 * 60 * 60),
            )
            .value;
        config.intervals.gc = parser
            .get_duration_ms(
                "GC_INTERVAL_MS",
                config.intervals.gc,
                Duration::from_secs(1),
                Duration::from_secs(7 * 24 * 60 * 60),
            )
            .value;

        if parser.has_errors() {
            return Err(parser.take_errors());
        }
        Ok(config)
    }

    /// Path of the active audit file.
    pub fn audit_path(&self) -> PathBuf {
        self.root.join("audit.jsonl")
    }

    /// Directory holding journal segments and the checkpoint.
    pub fn journal_dir(&self) -> PathBuf {
        self.root.join("journal")
    }

    /// Directory holding resilient-store documents.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }
}
