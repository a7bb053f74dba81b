//! Append-only hash-chained audit trail.
//!
//! Every side-effectful action records an `intent` before executing and a
//! `result` after; `denied` and `dry_run` phases capture refusals and
//! evaluations. Records chain through SHA-256 (`prevHash` → `hash`) with an
//! optional keyed MAC, so any tampering, reordering, or truncation in the
//! middle of the file is detectable. Open-time recovery truncates a torn
//! tail at the last valid record and atomically rewrites the surviving
//! prefix.

use crate::chain::{canonical_form, chain_hash, chain_hmac, check_record, ChainReport, RecordCheck};
use crate::record::{AuditPhase, AuditRecord, IntentOutcome, GENESIS};
use chrono::Utc;
use keel_common::errors::ErrorCode;
use keel_common::events::{EventBus, EventKind};
use keel_common::lock::ScopedMutex;
use keel_common::redact::Redactor;
use keel_common::util::filesystem_timestamp;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default rotation threshold.
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Default delay for the batched `dry_run` fsync.
pub const DEFAULT_DRY_RUN_FLUSH: Duration = Duration::from_millis(100);

/// Bounded retries for short writes.
const SHORT_WRITE_RETRIES: u32 = 3;

/// Default retention for rotated audit files.
pub const DEFAULT_ARCHIVE_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Configuration for an [`AuditTrail`].
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Rotate once the file reaches this size and no intents are pending.
    pub max_size_bytes: u64,
    /// When set, every record carries an HMAC-SHA256 over its canonical form.
    pub hmac_key: Option<Vec<u8>>,
    /// Batch window for `dry_run` durability.
    pub dry_run_flush: Duration,
    /// Rotated files older than this are garbage-collected.
    pub archive_max_age: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            hmac_key: None,
            dry_run_flush: DEFAULT_DRY_RUN_FLUSH,
            archive_max_age: DEFAULT_ARCHIVE_MAX_AGE,
        }
    }
}

/// Errors surfaced by trail operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A critical filesystem operation failed.
    #[error("{operation} failed for {path}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// The path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Record serialization failed.
    #[error("record serialization failed")]
    Serialize(#[from] serde_json::Error),
}

impl AuditError {
    /// Catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Io { .. } | Self::Serialize(_) => ErrorCode::AuditAppendFailed,
        }
    }
}

/// Snapshot of trail progress.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditStatus {
    /// Highest sequence in the current file.
    pub seq: u64,
    /// Intents still awaiting a result.
    pub pending_intents: usize,
    /// Current file size in bytes.
    pub file_bytes: u64,
}

struct TrailInner {
    seq: u64,
    prev_hash: String,
    file: File,
    file_bytes: u64,
    pending_intents: HashSet<u64>,
    intent_results: HashMap<u64, IntentOutcome>,
    dry_run_flush_scheduled: bool,
}

/// Append-only audit log with intent/result pairing and a queryable index.
pub struct AuditTrail {
    path: PathBuf,
    config: AuditConfig,
    redactor: Arc<Redactor>,
    inner: ScopedMutex<TrailInner>,
    events: Option<EventBus>,
}

impl AuditTrail {
    /// Open (or create) the trail at `path`, recovering from torn writes.
    pub async fn open(
        path: impl Into<PathBuf>,
        config: AuditConfig,
        redactor: Arc<Redactor>,
    ) -> Result<Self, AuditError> {
        Self::open_with_events(path, config, redactor, None).await
    }

    /// Open with a substrate event bus attached.
    pub async fn open_with_events(
        path: impl Into<PathBuf>,
        config: AuditConfig,
        redactor: Arc<Redactor>,
        events: Option<EventBus>,
    ) -> Result<Self, AuditError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_err("create dir", parent, e))?;
        }

        let recovery = recover_file(&path, config.hmac_key.as_deref())?;
        if recovery.discarded > 0 {
            warn!(
                code = %ErrorCode::AuditChainBroken,
                path = %path.display(),
                surviving = recovery.records.len(),
                discarded = recovery.discarded,
                parse_errors = recovery.parse_errors,
                chain_breaks = recovery.chain_breaks,
                "audit trail truncated at last valid record"
            );
            if let Some(bus) = &events {
                bus.emit(
                    EventKind::Recovery,
                    "audit",
                    &json!({
                        "surviving": recovery.records.len(),
                        "parse_errors": recovery.parse_errors,
                        "chain_breaks": recovery.chain_breaks,
                    }),
                );
            }
        }

        let mut pending_intents = HashSet::new();
        let mut intent_results = HashMap::new();
        for record in &recovery.records {
            index_record(record, &mut pending_intents, &mut intent_results);
        }

        let (seq, prev_hash) = recovery
            .records
            .last()
            .map(|r| (r.seq, r.hash.clone()))
            .unwrap_or((0, GENESIS.to_string()));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err("open", &path, e))?;
        let file_bytes = file
            .metadata()
            .map_err(|e| io_err("stat", &path, e))?
            .len();

        let inner = TrailInner {
            seq,
            prev_hash,
            file,
            file_bytes,
            pending_intents,
            intent_results,
            dry_run_flush_scheduled: false,
        };
        debug!(path = %path.display(), seq, "audit trail opened");
        Ok(Self {
            path: path.clone(),
            config,
            redactor,
            inner: ScopedMutex::new(format!("audit:{}", path.display()), inner),
            events,
        })
    }

    /// Record an intent to perform a side effect. Returns its `seq`.
    pub async fn record_intent(
        &self,
        action: &str,
        target: &str,
        params: Value,
        dedupe_key: Option<String>,
    ) -> Result<u64, AuditError> {
        self.append(AuditPhase::Intent, None, action, target, params, dedupe_key, None, None)
            .await
    }

    /// Record the outcome of a previously declared intent.
    pub async fn record_result(
        &self,
        intent_seq: u64,
        action: &str,
        target: &str,
        outcome: Result<Value, String>,
    ) -> Result<u64, AuditError> {
        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(message) => (None, Some(message)),
        };
        self.append(
            AuditPhase::Result,
            Some(intent_seq),
            action,
            target,
            Value::Object(serde_json::Map::new()),
            None,
            result,
            error,
        )
        .await
    }

    /// Record a policy refusal.
    pub async fn record_denied(
        &self,
        action: &str,
        target: &str,
        params: Value,
        reason: &str,
    ) -> Result<u64, AuditError> {
        self.append(
            AuditPhase::Denied,
            None,
            action,
            target,
            params,
            None,
            None,
            Some(reason.to_string()),
        )
        .await
    }

    /// Record a dry-run evaluation. Durability is batched, not immediate.
    pub async fn record_dry_run(
        &self,
        action: &str,
        target: &str,
        params: Value,
    ) -> Result<u64, AuditError> {
        self.append(AuditPhase::DryRun, None, action, target, params, None, None, None)
            .await
    }

    /// Look up the outcome recorded for an intent.
    pub async fn find_result_by_intent_seq(&self, intent_seq: u64) -> Option<IntentOutcome> {
        let inner = self.inner.acquire().await;
        inner.intent_results.get(&intent_seq).cloned()
    }

    /// Snapshot of the whole intent→result index, for boot-time
    /// reconciliation.
    pub async fn intent_outcomes(&self) -> HashMap<u64, IntentOutcome> {
        let inner = self.inner.acquire().await;
        inner.intent_results.clone()
    }

    /// Re-read the file and verify the chain.
    ///
    /// `key` defaults to the configured MAC key; pass `Some(..)` to check
    /// against a different one.
    pub async fn verify_chain(&self, key: Option<&[u8]>) -> std::io::Result<ChainReport> {
        // Settle any batched dry-run durability before reading back.
        {
            let inner = self.inner.acquire().await;
            let _ = inner.file.sync_all();
        }
        let effective = key.or(self.config.hmac_key.as_deref());
        let report = crate::chain::verify_chain(&self.path, effective)?;
        if !report.valid {
            let code = if report.hmac_error {
                ErrorCode::AuditHmacMismatch
            } else {
                ErrorCode::AuditChainBroken
            };
            warn!(
                code = %code,
                path = %self.path.display(),
                broken_at = report.broken_at,
                "audit chain verification failed"
            );
        }
        Ok(report)
    }

    /// Snapshot of sequence and pending-intent state.
    pub async fn status(&self) -> AuditStatus {
        let inner = self.inner.acquire().await;
        AuditStatus {
            seq: inner.seq,
            pending_intents: inner.pending_intents.len(),
            file_bytes: inner.file_bytes,
        }
    }

    /// Path of the active audit file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove rotated audit files older than the configured retention.
    pub async fn gc_archives(&self) -> Result<u32, AuditError> {
        let _inner = self.inner.acquire().await;
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let active = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = active.strip_suffix(".jsonl").unwrap_or(&active).to_string();

        let mut removed = 0u32;
        let now = std::time::SystemTime::now();
        let entries = fs::read_dir(&parent).map_err(|e| io_err("read dir", &parent, e))?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_archive =
                name.starts_with(&format!("{stem}.")) && name.ends_with(".jsonl") && name != active;
            if !is_archive {
                continue;
            }
            let old_enough = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .map(|age| age > self.config.archive_max_age)
                .unwrap_or(false);
            if old_enough {
                let path = entry.path();
                fs::remove_file(&path).map_err(|e| io_err("remove archive", &path, e))?;
                info!(archive = %path.display(), "rotated audit file removed");
                removed += 1;
            }
        }
        if removed > 0 {
            if let Some(bus) = &self.events {
                bus.emit(EventKind::SidelineGc, "audit", &json!({ "removed": removed }));
            }
        }
        Ok(removed)
    }

    // ── Append protocol ────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn append(
        &self,
        phase: AuditPhase,
        intent_seq: Option<u64>,
        action: &str,
        target: &str,
        params: Value,
        dedupe_key: Option<String>,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<u64, AuditError> {
        // Step 1: redact everything that will be persisted.
        let params = self.redactor.redact_value(&params);
        let result = result.map(|v| self.redactor.redact_value(&v));
        let error = error.map(|e| self.redactor.redact(&e));

        let mut inner = self.inner.acquire().await;

        // Step 2: assign seq and link to the running chain.
        let seq = inner.seq + 1;
        let mut record = AuditRecord {
            seq,
            prev_hash: inner.prev_hash.clone(),
            hash: String::new(),
            hmac: None,
            phase,
            intent_seq,
            ts: Utc::now(),
            action: action.to_string(),
            target: target.to_string(),
            params,
            dedupe_key,
            result,
            error,
            dry_run: phase == AuditPhase::DryRun,
        };

        // Steps 3-4: canonical form, hash, optional MAC.
        let canonical = canonical_form(&record)?;
        record.hash = chain_hash(&canonical);
        if let Some(key) = &self.config.hmac_key {
            record.hmac = Some(chain_hmac(&canonical, key));
        }

        // Step 5: one line, LF-terminated.
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        // Steps 6-7: bounded-retry write, then phase-dependent durability.
        // A failure leaves seq and prevHash untouched and truncates any
        // partial line so the in-process handle stays consistent.
        let committed_len = inner.file_bytes;
        let write_outcome = write_with_retry(&mut inner.file, line.as_bytes()).and_then(|()| {
            if phase == AuditPhase::DryRun {
                Ok(())
            } else {
                inner.file.sync_all()
            }
        });
        if let Err(source) = write_outcome {
            let _ = inner.file.set_len(committed_len);
            return Err(io_err("append", &self.path, source));
        }

        inner.seq = seq;
        inner.prev_hash = record.hash.clone();
        inner.file_bytes += line.len() as u64;

        // Step 8: maintain the pending set and intent→result index.
        {
            let state = &mut *inner;
            index_record(&record, &mut state.pending_intents, &mut state.intent_results);
        }

        // Step 9: evaluate rotation while still holding the lock, so the
        // pending view is consistent with what was just appended.
        self.maybe_rotate(&mut inner)?;

        if phase == AuditPhase::DryRun && !inner.dry_run_flush_scheduled {
            inner.dry_run_flush_scheduled = true;
            self.schedule_dry_run_flush();
        }
        Ok(seq)
    }

    fn schedule_dry_run_flush(&self) {
        let lock = self.inner.clone();
        let delay = self.config.dry_run_flush;
        let path = self.path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = lock.acquire().await;
            if let Err(err) = inner.file.sync_all() {
                warn!(path = %path.display(), "batched fsync failed: {err}");
            }
            inner.dry_run_flush_scheduled = false;
        });
    }

    // ── Rotation ───────────────────────────────────────────────────────────

    fn maybe_rotate(
        &self,
        inner: &mut keel_common::lock::ScopedGuard<'_, TrailInner>,
    ) -> Result<(), AuditError> {
        if inner.file_bytes < self.config.max_size_bytes {
            return Ok(());
        }
        if !inner.pending_intents.is_empty() {
            // Deferring keeps every pending intent and its eventual result
            // readable from a single file.
            debug!(
                pending = inner.pending_intents.len(),
                "audit rotation deferred until pending intents resolve"
            );
            return Ok(());
        }

        inner
            .file
            .sync_all()
            .map_err(|e| io_err("fsync", &self.path, e))?;
        let archive = self.archive_path();
        fs::rename(&self.path, &archive).map_err(|e| io_err("rotate", &archive, e))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fsync_dir(parent)?;
        }

        inner.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err("open", &self.path, e))?;
        inner.file_bytes = 0;
        inner.seq = 0;
        inner.prev_hash = GENESIS.to_string();
        inner.pending_intents.clear();
        inner.intent_results.clear();

        info!(archive = %archive.display(), "audit trail rotated");
        if let Some(bus) = &self.events {
            bus.emit(
                EventKind::Rotation,
                "audit",
                &json!({ "archive": archive.display().to_string() }),
            );
        }
        Ok(())
    }

    fn archive_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audit.jsonl".to_string());
        let stem = stem.strip_suffix(".jsonl").unwrap_or(&stem).to_string();
        let name = format!("{stem}.{}.jsonl", filesystem_timestamp(Utc::now()));
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.join(&name))
            .unwrap_or_else(|| PathBuf::from(&name))
    }
}

// ── Open-time recovery ─────────────────────────────────────────────────────

struct FileRecovery {
    records: Vec<AuditRecord>,
    discarded: u64,
    parse_errors: u64,
    chain_breaks: u64,
}

/// Validate the file line by line; on the first failure, truncate at the
/// last valid record and atomically rewrite the surviving prefix.
fn recover_file(path: &Path, key: Option<&[u8]>) -> Result<FileRecovery, AuditError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(FileRecovery {
                records: Vec::new(),
                discarded: 0,
                parse_errors: 0,
                chain_breaks: 0,
            });
        }
        Err(err) => return Err(io_err("read", path, err)),
    };

    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut records = Vec::new();
    let mut expected_prev = GENESIS.to_string();
    let mut parse_errors = 0u64;
    let mut chain_breaks = 0u64;
    let mut surviving_lines = 0usize;

    for (index, line) in lines.iter().enumerate() {
        let valid = match serde_json::from_str::<AuditRecord>(line) {
            Ok(record) => match check_record(&record, &expected_prev, key) {
                RecordCheck::Ok => {
                    expected_prev = record.hash.clone();
                    records.push(record);
                    surviving_lines = index + 1;
                    true
                }
                RecordCheck::ParseError => {
                    parse_errors += 1;
                    false
                }
                _ => {
                    chain_breaks += 1;
                    false
                }
            },
            Err(_) => {
                parse_errors += 1;
                false
            }
        };
        if !valid {
            // Classify the rest of the tail for the summary, then stop.
            for rest in &lines[index + 1..] {
                if serde_json::from_str::<AuditRecord>(rest).is_ok() {
                    chain_breaks += 1;
                } else {
                    parse_errors += 1;
                }
            }
            break;
        }
    }

    let discarded = (lines.len() - surviving_lines) as u64;
    let clean_tail = discarded == 0 && (raw.is_empty() || raw.ends_with('\n'));
    if !clean_tail {
        rewrite_prefix(path, &records)?;
    }

    Ok(FileRecovery {
        records,
        discarded,
        parse_errors,
        chain_breaks,
    })
}

/// Atomically replace the file with the surviving records
/// (tmp + fsync + rename + dir-fsync).
fn rewrite_prefix(path: &Path, records: &[AuditRecord]) -> Result<(), AuditError> {
    let tmp = {
        let name = format!(
            "{}.{}.recover.tmp",
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            std::process::id()
        );
        path.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.join(&name))
            .unwrap_or_else(|| PathBuf::from(&name))
    };

    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }

    let mut file = File::create(&tmp).map_err(|e| io_err("create tmp", &tmp, e))?;
    file.write_all(body.as_bytes())
        .map_err(|e| io_err("write tmp", &tmp, e))?;
    file.sync_all().map_err(|e| io_err("fsync tmp", &tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| io_err("rename tmp", path, e))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fsync_dir(parent)?;
    }
    Ok(())
}

fn index_record(
    record: &AuditRecord,
    pending: &mut HashSet<u64>,
    results: &mut HashMap<u64, IntentOutcome>,
) {
    match record.phase {
        AuditPhase::Intent => {
            pending.insert(record.seq);
        }
        AuditPhase::Result => {
            if let Some(intent_seq) = record.intent_seq {
                pending.remove(&intent_seq);
                results.insert(
                    intent_seq,
                    IntentOutcome {
                        has_result: true,
                        error: record.error.clone(),
                    },
                );
            }
        }
        AuditPhase::Denied | AuditPhase::DryRun => {}
    }
}

/// Write the full buffer, retrying short writes a bounded number of times.
/// A write that makes zero progress fails immediately.
fn write_with_retry(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    let mut written = 0usize;
    let mut retries = 0u32;
    while written < bytes.len() {
        match file.write(&bytes[written..]) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "zero-progress write",
                ));
            }
            Ok(n) => {
                written += n;
                if written < bytes.len() {
                    retries += 1;
                    if retries > SHORT_WRITE_RETRIES {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::WriteZero,
                            "short write persisted past retry limit",
                        ));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn fsync_dir(dir: &Path) -> Result<(), AuditError> {
    let handle = File::open(dir).map_err(|e| io_err("open dir", dir, e))?;
    handle.sync_all().map_err(|e| io_err("fsync dir", dir, e))
}

fn io_err(operation: &'static str, path: &Path, source: std::io::Error) -> AuditError {
    AuditError::Io {
        operation,
        path: path.to_path_buf(),
        source,
    }
}
