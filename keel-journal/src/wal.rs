//! Segmented write-ahead log.
//!
//! Records append to an active `segment.jsonl`; when the segment exceeds the
//! size or entry threshold *and* both downstream cursors have caught up to
//! its last sequence, it rotates to an archive name and a fresh segment
//! opens. The checkpoint document (cursor positions, active segment, entry
//! count) persists through the resilient store, so cursor advances survive a
//! crash without replaying the downstream.

use crate::checkpoint::{CursorKind, WalCheckpoint};
use crate::record::{WalOp, WalRecord};
use crate::sync::{DrainStats, SyncTarget};
use chrono::Utc;
use keel_common::errors::ErrorCode;
use keel_common::events::{EventBus, EventKind};
use keel_common::lock::ScopedMutex;
use keel_common::util::filesystem_timestamp;
use serde_json::json;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// File name of the active segment.
pub const ACTIVE_SEGMENT: &str = "segment.jsonl";

/// File name of the checkpoint document.
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Configuration for the journal.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Rotate when the active segment exceeds this many bytes.
    pub max_segment_bytes: u64,
    /// Rotate when the active segment holds this many records.
    pub max_segment_entries: u64,
    /// Archived segments older than this are garbage-collected.
    pub archive_max_age: Duration,
    /// A cursor that has not advanced for this long while lagging is
    /// reported stale in status output.
    pub cursor_stale_after: Duration,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            max_segment_bytes: 8 * 1024 * 1024,
            max_segment_entries: 10_000,
            archive_max_age: Duration::from_secs(7 * 24 * 60 * 60),
            cursor_stale_after: Duration::from_secs(60 * 60),
        }
    }
}

/// Errors surfaced by journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The record path is absolute or escapes the root.
    #[error("path '{path}' is not a safe relative path")]
    PathTraversal {
        /// The rejected path.
        path: String,
    },

    /// A `write` record was appended without a payload.
    #[error("write records require a payload")]
    MissingPayload,

    /// A payload was supplied for an op that takes none.
    #[error("{op:?} records do not carry a payload")]
    UnexpectedPayload {
        /// The offending op.
        op: WalOp,
    },

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

    /// The checkpoint document could not be read or written.
    #[error("checkpoint persistence failed")]
    Checkpoint(#[from] keel_store::StoreError),

    /// A downstream target rejected a record.
    #[error("sync to {target} failed at seq {seq}")]
    Sync {
        /// Target name.
        target: String,
        /// Sequence of the failing record.
        seq: u64,
        /// The target's error.
        #[source]
        source: crate::sync::SyncTargetError,
    },
}

impl JournalError {
    /// Catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::PathTraversal { .. } => ErrorCode::JournalPathTraversal,
            Self::MissingPayload | Self::UnexpectedPayload { .. } => {
                ErrorCode::JournalInvalidRecord
            }
            Self::Io { .. } | Self::Serialize(_) => ErrorCode::JournalAppendFailed,
            // Checkpoint persistence rides on the resilient store; keep its
            // more specific code.
            Self::Checkpoint(inner) => inner.code(),
            Self::Sync { .. } => ErrorCode::JournalSyncFailed,
        }
    }
}

/// Per-cursor view in a [`WalStatus`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct CursorStatus {
    /// Last sequence applied downstream.
    pub seq: u64,
    /// Records not yet applied downstream.
    pub lag: u64,
    /// True when the cursor lags and has not advanced within the stale window.
    pub stale: bool,
}

/// Snapshot of journal progress.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WalStatus {
    /// Highest appended sequence.
    pub last_seq: u64,
    /// Records in the active segment.
    pub entry_count: u64,
    /// Object-store cursor.
    pub object_store: CursorStatus,
    /// Version-control cursor.
    pub version_control: CursorStatus,
}

struct WalInner {
    seq: u64,
    segment_bytes: u64,
    checkpoint: WalCheckpoint,
    file: File,
}

/// Append-only journal of filesystem side effects with two downstream cursors.
pub struct Wal {
    dir: PathBuf,
    config: JournalConfig,
    checkpoint_store: keel_store::ResilientStore,
    inner: ScopedMutex<WalInner>,
    events: Option<EventBus>,
}

impl Wal {
    /// Open (or create) the journal in `dir`.
    ///
    /// Recovery scans the active segment for the highest durable record; a
    /// torn trailing line is truncated. The next append issues that
    /// sequence plus one.
    pub async fn open(dir: impl Into<PathBuf>, config: JournalConfig) -> Result<Self, JournalError> {
        Self::open_with_events(dir, config, None).await
    }

    /// Open with a substrate event bus attached.
    pub async fn open_with_events(
        dir: impl Into<PathBuf>,
        config: JournalConfig,
        events: Option<EventBus>,
    ) -> Result<Self, JournalError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_err("create dir", &dir, e))?;

        let checkpoint_store = keel_store::ResilientStore::open(
            dir.join(CHECKPOINT_FILE),
            keel_store::StoreConfig::default(),
        );
        let mut checkpoint = load_checkpoint(&checkpoint_store).await?;
        if checkpoint.current_segment.is_empty() {
            checkpoint.current_segment = ACTIVE_SEGMENT.to_string();
        }

        let active = dir.join(ACTIVE_SEGMENT);
        let scan = recover_segment(&active)?;
        let last_seq = match scan.last_seq {
            Some(seq) => seq,
            // Fresh segment right after a rotation: the archives carry the
            // sequence history.
            None => last_seq_in_archives(&dir)?.unwrap_or(0),
        };
        checkpoint.entry_count = scan.entries;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active)
            .map_err(|e| io_err("open segment", &active, e))?;

        let inner = WalInner {
            seq: last_seq,
            segment_bytes: scan.bytes,
            checkpoint,
            file,
        };
        let wal = Self {
            dir: dir.clone(),
            config,
            checkpoint_store,
            inner: ScopedMutex::new(format!("journal:{}", dir.display()), inner),
            events,
        };
        if scan.truncated_bytes > 0 {
            warn!(
                dir = %dir.display(),
                truncated = scan.truncated_bytes,
                "torn trailing line removed from active segment"
            );
            wal.emit(EventKind::Recovery, &json!({ "truncated_bytes": scan.truncated_bytes }));
        }
        debug!(dir = %dir.display(), last_seq, entries = scan.entries, "journal opened");
        Ok(wal)
    }

    /// Append one record; returns its sequence number.
    ///
    /// `write` ops require `data`; `delete` and `mkdir` take none. The
    /// record is fsynced before the call returns. Downstream syncing is
    /// cooperative and happens in [`drain`](Self::drain).
    pub async fn append(
        &self,
        op: WalOp,
        path: &str,
        data: Option<&[u8]>,
    ) -> Result<u64, JournalError> {
        let path = safe_relative(path)?;
        let mut inner = self.inner.acquire().await;

        let seq = inner.seq + 1;
        let record = match (op, data) {
            (WalOp::Write, Some(bytes)) => WalRecord::write(seq, path, bytes),
            (WalOp::Write, None) => return Err(JournalError::MissingPayload),
            (op, Some(_)) => return Err(JournalError::UnexpectedPayload { op }),
            (WalOp::Delete, None) => WalRecord::delete(seq, path),
            (WalOp::Mkdir, None) => WalRecord::mkdir(seq, path),
        };

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        // Nothing in `inner` is mutated until the line is durable, so an
        // error here leaves the sequence untouched.
        let segment = self.dir.join(ACTIVE_SEGMENT);
        inner
            .file
            .write_all(line.as_bytes())
            .map_err(|e| io_err("append", &segment, e))?;
        inner
            .file
            .sync_all()
            .map_err(|e| io_err("fsync", &segment, e))?;

        inner.seq = seq;
        inner.segment_bytes += line.len() as u64;
        inner.checkpoint.entry_count += 1;
        self.persist_checkpoint_best_effort(&inner.checkpoint).await;

        self.maybe_rotate(&mut inner).await?;
        Ok(seq)
    }

    /// Drain records past the cursor into `target`, advancing the cursor
    /// after each applied record.
    ///
    /// A target failure stalls this cursor only; progress made before the
    /// failure is kept.
    pub async fn drain(
        &self,
        kind: CursorKind,
        target: &dyn SyncTarget,
    ) -> Result<DrainStats, JournalError> {
        let cursor = {
            let inner = self.inner.acquire().await;
            inner.checkpoint.cursor_seq(kind)
        };
        let pending = self.records_after(cursor)?;
        let mut stats = DrainStats {
            applied: 0,
            cursor,
        };

        for record in &pending {
            if let Err(source) = target.apply(record).await {
                warn!(
                    sync_target = target.name(),
                    seq = record.seq,
                    "downstream apply failed; cursor stalls here"
                );
                return Err(JournalError::Sync {
                    target: target.name().to_string(),
                    seq: record.seq,
                    source,
                });
            }
            let mut inner = self.inner.acquire().await;
            inner.checkpoint.advance(kind, record.seq, Utc::now());
            persist_checkpoint(&self.checkpoint_store, &inner.checkpoint).await?;
            stats.applied += 1;
            stats.cursor = record.seq;
        }

        if stats.applied > 0 {
            debug!(
                cursor = kind.label(),
                applied = stats.applied,
                at = stats.cursor,
                "cursor advanced"
            );
            self.emit(
                EventKind::SyncAdvance,
                &json!({ "cursor": kind.label(), "seq": stats.cursor, "applied": stats.applied }),
            );
            // The slower cursor may just have unblocked a deferred rotation.
            let mut inner = self.inner.acquire().await;
            self.maybe_rotate(&mut inner).await?;
        }
        Ok(stats)
    }

    /// All records with `seq > after`, across archives and the active
    /// segment, in sequence order.
    pub fn records_after(&self, after: u64) -> Result<Vec<WalRecord>, JournalError> {
        let mut records = Vec::new();
        for segment in self.segment_files()? {
            for record in read_records(&segment)? {
                if record.seq > after {
                    records.push(record);
                }
            }
        }
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }

    /// Snapshot of sequence and cursor progress.
    pub async fn status(&self) -> WalStatus {
        let inner = self.inner.acquire().await;
        let now = Utc::now();
        let cursor = |kind: CursorKind| {
            let seq = inner.checkpoint.cursor_seq(kind);
            let lag = inner.seq.saturating_sub(seq);
            let stale = lag > 0
                && inner
                    .checkpoint
                    .cursor_ts(kind)
                    .map(|ts| {
                        (now - ts).to_std().unwrap_or_default() > self.config.cursor_stale_after
                    })
                    .unwrap_or(true);
            CursorStatus { seq, lag, stale }
        };
        WalStatus {
            last_seq: inner.seq,
            entry_count: inner.checkpoint.entry_count,
            object_store: cursor(CursorKind::ObjectStore),
            version_control: cursor(CursorKind::VersionControl),
        }
    }

    /// Current checkpoint contents.
    pub async fn checkpoint(&self) -> WalCheckpoint {
        self.inner.acquire().await.checkpoint.clone()
    }

    /// Remove archived segments older than the configured age.
    ///
    /// Archives only exist once both cursors passed their last record, so
    /// age is the sole criterion.
    pub async fn gc_archives(&self) -> Result<u32, JournalError> {
        let _inner = self.inner.acquire().await;
        let mut removed = 0u32;
        let now = std::time::SystemTime::now();
        for archive in self.archive_files()? {
            let old_enough = fs::metadata(&archive)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .map(|age| age > self.config.archive_max_age)
                .unwrap_or(false);
            if old_enough {
                fs::remove_file(&archive).map_err(|e| io_err("remove archive", &archive, e))?;
                info!(archive = %archive.display(), "archived segment removed");
                removed += 1;
            }
        }
        if removed > 0 {
            self.emit(EventKind::SidelineGc, &json!({ "removed": removed }));
        }
        Ok(removed)
    }

    // ── Rotation ───────────────────────────────────────────────────────────

    async fn maybe_rotate(
        &self,
        inner: &mut keel_common::lock::ScopedGuard<'_, WalInner>,
    ) -> Result<(), JournalError> {
        let over_threshold = inner.segment_bytes >= self.config.max_segment_bytes
            || inner.checkpoint.entry_count >= self.config.max_segment_entries;
        if !over_threshold || inner.checkpoint.entry_count == 0 {
            return Ok(());
        }
        if inner.checkpoint.min_cursor() < inner.seq {
            debug!(
                last_seq = inner.seq,
                min_cursor = inner.checkpoint.min_cursor(),
                "rotation deferred until both cursors catch up"
            );
            return Ok(());
        }

        let active = self.dir.join(ACTIVE_SEGMENT);
        let archive = self
            .dir
            .join(format!("segment.{}.jsonl", filesystem_timestamp(Utc::now())));
        inner
            .file
            .sync_all()
            .map_err(|e| io_err("fsync", &active, e))?;
        fs::rename(&active, &archive).map_err(|e| io_err("rotate", &archive, e))?;
        fsync_dir(&self.dir)?;

        inner.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active)
            .map_err(|e| io_err("open segment", &active, e))?;
        inner.segment_bytes = 0;
        inner.checkpoint.entry_count = 0;
        self.persist_checkpoint_best_effort(&inner.checkpoint).await;

        info!(archive = %archive.display(), "segment rotated");
        self.emit(
            EventKind::Rotation,
            &json!({ "archive": archive.display().to_string(), "last_seq": inner.seq }),
        );
        Ok(())
    }

    // ── Helpers ────────────────────────────────────────────────────────────

    fn segment_files(&self) -> Result<Vec<PathBuf>, JournalError> {
        let mut segments = self.archive_files()?;
        let active = self.dir.join(ACTIVE_SEGMENT);
        if active.exists() {
            segments.push(active);
        }
        Ok(segments)
    }

    fn archive_files(&self) -> Result<Vec<PathBuf>, JournalError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| io_err("read dir", &self.dir, e))?;
        let mut archives: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                let name = p.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                name.starts_with("segment.") && name.ends_with(".jsonl") && name != ACTIVE_SEGMENT
            })
            .collect();
        // Archive names embed a filesystem-safe timestamp, so lexicographic
        // order is chronological order.
        archives.sort();
        Ok(archives)
    }

    async fn persist_checkpoint_best_effort(&self, checkpoint: &WalCheckpoint) {
        if let Err(err) = persist_checkpoint(&self.checkpoint_store, checkpoint).await {
            // The segment itself is the source of truth for sequence and
            // entry count; a missed checkpoint write only costs a rescan.
            warn!("checkpoint persistence failed: {err}");
        }
    }

    fn emit(&self, kind: EventKind, data: &serde_json::Value) {
        if let Some(events) = &self.events {
            events.emit(kind, "journal", data);
        }
    }

    pub(crate) fn event_bus(&self) -> Option<&EventBus> {
        self.events.as_ref()
    }
}

// ── Checkpoint persistence ─────────────────────────────────────────────────

async fn load_checkpoint(
    store: &keel_store::ResilientStore,
) -> Result<WalCheckpoint, JournalError> {
    match store.get().await? {
        Some(map) => Ok(serde_json::from_value(serde_json::Value::Object(map))?),
        None => Ok(WalCheckpoint {
            current_segment: ACTIVE_SEGMENT.to_string(),
            ..WalCheckpoint::default()
        }),
    }
}

async fn persist_checkpoint(
    store: &keel_store::ResilientStore,
    checkpoint: &WalCheckpoint,
) -> Result<(), JournalError> {
    let serde_json::Value::Object(map) = serde_json::to_value(checkpoint)? else {
        unreachable!("checkpoint serializes to an object");
    };
    store.set(map).await?;
    Ok(())
}

// ── Segment scanning ───────────────────────────────────────────────────────

struct SegmentScan {
    last_seq: Option<u64>,
    entries: u64,
    bytes: u64,
    truncated_bytes: u64,
}

/// Scan the active segment, truncating a torn trailing line.
fn recover_segment(path: &Path) -> Result<SegmentScan, JournalError> {
    if !path.exists() {
        return Ok(SegmentScan {
            last_seq: None,
            entries: 0,
            bytes: 0,
            truncated_bytes: 0,
        });
    }
    let raw = fs::read_to_string(path).map_err(|e| io_err("read segment", path, e))?;
    let mut good_bytes = 0usize;
    let mut entries = 0u64;
    let mut last_seq = None;

    let mut offset = 0usize;
    for line in raw.split_inclusive('\n') {
        let complete = line.ends_with('\n');
        let parsed = serde_json::from_str::<WalRecord>(line.trim_end());
        match (complete, parsed) {
            (true, Ok(record)) => {
                entries += 1;
                last_seq = Some(record.seq);
                good_bytes = offset + line.len();
            }
            // First torn or unparseable line ends the durable prefix.
            _ => break,
        }
        offset += line.len();
    }

    let truncated_bytes = (raw.len() - good_bytes) as u64;
    if truncated_bytes > 0 {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| io_err("open segment", path, e))?;
        file.set_len(good_bytes as u64)
            .map_err(|e| io_err("truncate segment", path, e))?;
        file.sync_all().map_err(|e| io_err("fsync", path, e))?;
    }

    Ok(SegmentScan {
        last_seq,
        entries,
        bytes: good_bytes as u64,
        truncated_bytes,
    })
}

fn last_seq_in_archives(dir: &Path) -> Result<Option<u64>, JournalError> {
    let entries = fs::read_dir(dir).map_err(|e| io_err("read dir", dir, e))?;
    let mut archives: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            name.starts_with("segment.") && name.ends_with(".jsonl") && name != ACTIVE_SEGMENT
        })
        .collect();
    archives.sort();
    for archive in archives.iter().rev() {
        let records = read_records(archive)?;
        if let Some(last) = records.last() {
            return Ok(Some(last.seq));
        }
    }
    Ok(None)
}

/// Parse the records of one segment, skipping unparseable lines.
pub(crate) fn read_records(path: &Path) -> Result<Vec<WalRecord>, JournalError> {
    let file = File::open(path).map_err(|e| io_err("open segment", path, e))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| io_err("read segment", path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WalRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(path = %path.display(), "skipping unparseable journal line: {err}");
            }
        }
    }
    Ok(records)
}

// ── Path safety ────────────────────────────────────────────────────────────

/// Reject absolute paths and any `..` component at append time.
pub(crate) fn safe_relative(path: &str) -> Result<String, JournalError> {
    let rejected = || JournalError::PathTraversal {
        path: path.to_string(),
    };
    if path.is_empty() {
        return Err(rejected());
    }
    let parsed = Path::new(path);
    if parsed.is_absolute() {
        return Err(rejected());
    }
    for component in parsed.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(rejected());
            }
        }
    }
    Ok(path.to_string())
}

pub(crate) fn io_err(
    operation: &'static str,
    path: &Path,
    source: std::io::Error,
) -> JournalError {
    JournalError::Io {
        operation,
        path: path.to_path_buf(),
        source,
    }
}

pub(crate) fn fsync_dir(dir: &Path) -> Result<(), JournalError> {
    let handle = File::open(dir).map_err(|e| io_err("open dir", dir, e))?;
    handle.sync_all().map_err(|e| io_err("fsync dir", dir, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn catch_up(wal: &Wal) {
        // Drive both cursors to the head so rotation is unblocked.
        struct Sink;
        #[async_trait::async_trait]
        impl SyncTarget for Sink {
            fn name(&self) -> &str {
                "sink"
            }
            async fn apply(&self, _: &WalRecord) -> Result<(), crate::sync::SyncTargetError> {
                Ok(())
            }
        }
        wal.drain(CursorKind::ObjectStore, &Sink).await.unwrap();
        wal.drain(CursorKind::VersionControl, &Sink).await.unwrap();
    }

    #[tokio::test]
    async fn sequences_are_monotonic_and_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let wal = Wal::open(dir.path(), JournalConfig::default()).await.unwrap();
            assert_eq!(wal.append(WalOp::Write, "a.txt", Some(b"1")).await.unwrap(), 1);
            assert_eq!(wal.append(WalOp::Delete, "b.txt", None).await.unwrap(), 2);
        }
        let wal = Wal::open(dir.path(), JournalConfig::default()).await.unwrap();
        assert_eq!(wal.append(WalOp::Mkdir, "c", None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn torn_trailing_line_is_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        {
            let wal = Wal::open(dir.path(), JournalConfig::default()).await.unwrap();
            wal.append(WalOp::Write, "a.txt", Some(b"1")).await.unwrap();
        }
        let segment = dir.path().join(ACTIVE_SEGMENT);
        let mut raw = fs::read_to_string(&segment).unwrap();
        raw.push_str("{\"ts\":\"2025-01-");
        fs::write(&segment, raw).unwrap();

        let wal = Wal::open(dir.path(), JournalConfig::default()).await.unwrap();
        assert_eq!(wal.append(WalOp::Delete, "a.txt", None).await.unwrap(), 2);
        let records = wal.records_after(0).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), JournalConfig::default()).await.unwrap();
        for bad in ["../escape", "a/../../b", "/absolute"] {
            let err = wal.append(WalOp::Mkdir, bad, None).await.unwrap_err();
            assert!(matches!(err, JournalError::PathTraversal { .. }), "{bad}");
        }
    }

    #[tokio::test]
    async fn payload_rules_are_enforced() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), JournalConfig::default()).await.unwrap();
        assert!(matches!(
            wal.append(WalOp::Write, "a", None).await.unwrap_err(),
            JournalError::MissingPayload
        ));
        assert!(matches!(
            wal.append(WalOp::Delete, "a", Some(b"x")).await.unwrap_err(),
            JournalError::UnexpectedPayload { .. }
        ));
    }

    #[tokio::test]
    async fn rotation_waits_for_both_cursors() {
        let dir = TempDir::new().unwrap();
        let config = JournalConfig {
            max_segment_entries: 2,
            ..JournalConfig::default()
        };
        let wal = Wal::open(dir.path(), config).await.unwrap();
        wal.append(WalOp::Write, "a", Some(b"1")).await.unwrap();
        wal.append(WalOp::Write, "b", Some(b"2")).await.unwrap();

        // Threshold reached, but no cursor has moved: the segment stays.
        assert_eq!(wal.status().await.entry_count, 2);
        assert!(wal.archive_files().unwrap().is_empty());

        catch_up(&wal).await;
        assert_eq!(wal.status().await.entry_count, 0);
        assert_eq!(wal.archive_files().unwrap().len(), 1);

        // Sequences continue across the rotation.
        assert_eq!(wal.append(WalOp::Write, "c", Some(b"3")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn sequences_continue_after_rotation_and_reopen() {
        let dir = TempDir::new().unwrap();
        let config = JournalConfig {
            max_segment_entries: 1,
            ..JournalConfig::default()
        };
        {
            let wal = Wal::open(dir.path(), config.clone()).await.unwrap();
            wal.append(WalOp::Write, "a", Some(b"1")).await.unwrap();
            catch_up(&wal).await;
        }
        let wal = Wal::open(dir.path(), config).await.unwrap();
        assert_eq!(wal.append(WalOp::Write, "b", Some(b"2")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn drain_failure_keeps_progress_and_spares_other_cursor() {
        struct FailAt {
            seq: u64,
        }
        #[async_trait::async_trait]
        impl SyncTarget for FailAt {
            fn name(&self) -> &str {
                "flaky"
            }
            async fn apply(&self, record: &WalRecord) -> Result<(), crate::sync::SyncTargetError> {
                if record.seq == self.seq {
                    Err("downstream unavailable".into())
                } else {
                    Ok(())
                }
            }
        }
        struct Sink;
        #[async_trait::async_trait]
        impl SyncTarget for Sink {
            fn name(&self) -> &str {
                "sink"
            }
            async fn apply(&self, _: &WalRecord) -> Result<(), crate::sync::SyncTargetError> {
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), JournalConfig::default()).await.unwrap();
        for name in ["a", "b", "c"] {
            wal.append(WalOp::Write, name, Some(b"x")).await.unwrap();
        }

        let err = wal
            .drain(CursorKind::ObjectStore, &FailAt { seq: 3 })
            .await
            .unwrap_err();
        assert!(matches!(err, JournalError::Sync { seq: 3, .. }));
        // Records 1 and 2 were applied and the cursor kept them.
        assert_eq!(wal.checkpoint().await.object_store_seq, 2);

        // The other cursor drains fully regardless.
        let stats = wal.drain(CursorKind::VersionControl, &Sink).await.unwrap();
        assert_eq!(stats.cursor, 3);
    }

    #[tokio::test]
    async fn status_reports_lag() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), JournalConfig::default()).await.unwrap();
        wal.append(WalOp::Write, "a", Some(b"1")).await.unwrap();
        let status = wal.status().await;
        assert_eq!(status.last_seq, 1);
        assert_eq!(status.object_store.lag, 1);
        assert!(status.object_store.stale);
    }

    #[test]
    fn errors_resolve_into_the_catalog() {
        let err = JournalError::PathTraversal {
            path: "../x".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::JournalPathTraversal);
        assert_eq!(
            JournalError::MissingPayload.code().entry().code,
            "KEEL-E203"
        );
    }

    #[test]
    fn safe_relative_accepts_normal_paths() {
        assert!(safe_relative("a/b/c.txt").is_ok());
        assert!(safe_relative("./a").is_ok());
        assert!(safe_relative("").is_err());
    }
}
