//! Resilient single-document JSON store.
//!
//! One store instance owns one `name.json` document plus its recovery
//! siblings (`.bak`, in-flight `.tmp` files, `.quarantine.<ms>` sidelines).
//! Writes follow an atomic tmp → fsync → rename protocol; reads recover from
//! whichever candidate carries the highest parseable write epoch. A document
//! that cannot be recovered from any candidate is quarantined, not deleted.

use crate::envelope::Envelope;
use crate::migrate::{MigrationFailure, MigrationRegistry};
use chrono::Utc;
use keel_common::errors::ErrorCode;
use keel_common::events::{EventBus, EventKind};
use keel_common::lock::ScopedMutex;
use keel_common::util::epoch_millis;
use serde_json::{json, Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default size bound for a serialized document.
pub const DEFAULT_MAX_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Default retention for quarantine files and stale tmp files.
pub const DEFAULT_QUARANTINE_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Configuration for a [`ResilientStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Expected envelope schema version; migrations run to reach it.
    pub schema_version: u32,
    /// Writes whose serialized form exceeds this are rejected.
    pub max_size_bytes: usize,
    /// Quarantine/tmp files older than this are garbage-collected.
    pub quarantine_max_age: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            quarantine_max_age: DEFAULT_QUARANTINE_MAX_AGE,
        }
    }
}

/// Errors surfaced to store callers.
///
/// Parse failures and torn writes never appear here: those are recovery
/// decisions handled internally (backup adoption, quarantine) and reported
/// through the logger and event bus.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The serialized document exceeds the configured bound.
    #[error("document is {size} bytes, exceeding the {max} byte bound")]
    SizeExceeded {
        /// Serialized size of the rejected document.
        size: usize,
        /// Configured bound.
        max: usize,
    },

    /// No migration is registered for a recovered schema version.
    #[error("no migration registered from schema version {from}")]
    MigrationMissing {
        /// The version with no registered step.
        from: u32,
    },

    /// A registered migration step failed.
    #[error("migration from schema version {from} failed: {reason}")]
    MigrationFailed {
        /// The version whose step failed.
        from: u32,
        /// The step's error message.
        reason: String,
    },

    /// A critical filesystem operation failed.
    #[error("{operation} failed for {path}")]
    Io {
        /// The operation that failed (open, write, fsync, rename, ...).
        operation: &'static str,
        /// The path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Serialization failed.
    #[error("document serialization failed")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    /// Catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SizeExceeded { .. } => ErrorCode::StoreSizeExceeded,
            Self::MigrationMissing { .. } => ErrorCode::StoreMigrationMissing,
            Self::MigrationFailed { .. } => ErrorCode::StoreMigrationFailed,
            Self::Io { .. } => ErrorCode::StoreIoError,
            Self::Serialize(_) => ErrorCode::StoreSerializeFailed,
        }
    }
}

/// Where a recovered document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoverySource {
    Primary,
    Backup,
    Tmp,
}

/// Atomic read/write of a single JSON document with envelope, backup,
/// tmp-scan recovery, quarantine, and migration hooks.
pub struct ResilientStore {
    path: PathBuf,
    config: StoreConfig,
    migrations: MigrationRegistry,
    lock: ScopedMutex,
    /// Highest known write epoch; mutated only under `lock`.
    epoch: AtomicU64,
    events: Option<EventBus>,
}

impl ResilientStore {
    /// Open a store for the document at `path`.
    ///
    /// The document is not read here; the first `get` performs recovery.
    /// The in-memory epoch starts from the highest epoch visible on disk so
    /// a `set` before any `get` still advances monotonically.
    pub fn open(path: impl Into<PathBuf>, config: StoreConfig) -> Self {
        let path = path.into();
        let initial_epoch = scan_max_epoch(&path);
        let lock_name = format!("store:{}", path.display());
        Self {
            path,
            config,
            migrations: MigrationRegistry::default(),
            lock: ScopedMutex::new(lock_name, ()),
            epoch: AtomicU64::new(initial_epoch),
            events: None,
        }
    }

    /// Attach a migration registry.
    pub fn with_migrations(mut self, migrations: MigrationRegistry) -> Self {
        self.migrations = migrations;
        self
    }

    /// Attach the substrate event bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Path of the primary document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current in-memory write epoch.
    pub fn write_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Write `payload` as the new document.
    pub async fn set(&self, payload: Map<String, Value>) -> Result<(), StoreError> {
        let _guard = self.lock.acquire().await;

        // Step 1: advance the epoch and build the envelope.
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = Envelope::new(self.config.schema_version, epoch, payload);
        let document = match envelope.to_document() {
            Ok(doc) => doc,
            Err(err) => {
                self.epoch.store(epoch - 1, Ordering::SeqCst);
                return Err(StoreError::Serialize(err));
            }
        };

        // Step 2: size bound, rolling the epoch back on violation.
        if document.len() > self.config.max_size_bytes {
            self.epoch.store(epoch - 1, Ordering::SeqCst);
            return Err(StoreError::SizeExceeded {
                size: document.len(),
                max: self.config.max_size_bytes,
            });
        }

        // Steps 3-7: filesystem protocol; any failure rolls the epoch back.
        if let Err(err) = self.write_document(&document, epoch) {
            self.epoch.store(epoch - 1, Ordering::SeqCst);
            return Err(err);
        }
        debug!(path = %self.path.display(), epoch, "document written");
        Ok(())
    }

    /// Read the document, recovering from backup and tmp candidates as needed.
    ///
    /// Returns `None` when no candidate parses (after quarantining them) or
    /// when the document has never been written.
    pub async fn get(&self) -> Result<Option<Map<String, Value>>, StoreError> {
        let _guard = self.lock.acquire().await;
        self.recover_locked()
    }

    /// True when a primary or backup file exists on disk.
    pub async fn exists(&self) -> bool {
        let _guard = self.lock.acquire().await;
        self.path.exists() || backup_path(&self.path).exists()
    }

    /// Remove the document, its backup, and any in-flight tmp files.
    ///
    /// Quarantine files are retained for forensics; the sideline GC removes
    /// them by age.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.acquire().await;
        for path in [self.path.clone(), backup_path(&self.path)] {
            remove_if_present(&path)?;
        }
        for (tmp, _) in tmp_candidates(&self.path) {
            remove_if_present(&tmp)?;
        }
        info!(path = %self.path.display(), "document cleared");
        Ok(())
    }

    /// Remove quarantine and stale tmp files older than the configured age.
    pub async fn gc_sidelines(&self) -> crate::maintenance::GcStats {
        let _guard = self.lock.acquire().await;
        let stats = crate::maintenance::sideline_gc(&self.path, self.config.quarantine_max_age);
        if stats.removed > 0 {
            if let Some(events) = &self.events {
                events.emit(
                    EventKind::SidelineGc,
                    "store",
                    &json!({ "path": self.path.display().to_string(), "removed": stats.removed }),
                );
            }
        }
        stats
    }

    // ── Write protocol ─────────────────────────────────────────────────────

    fn write_document(&self, document: &str, epoch: u64) -> Result<(), StoreError> {
        let parent = parent_dir(&self.path);
        fs::create_dir_all(&parent).map_err(|e| io_err("create_dir", &parent, e))?;

        // Step 4: exclusive-create the tmp file. The name embeds pid and
        // epoch, so a stale tmp from a crashed write cannot collide.
        let tmp = tmp_path(&self.path, epoch);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .map_err(|e| io_err("create tmp", &tmp, e))?;

        // Step 5: write and fsync the tmp file.
        file.write_all(document.as_bytes())
            .map_err(|e| io_err("write tmp", &tmp, e))?;
        file.sync_all().map_err(|e| io_err("fsync tmp", &tmp, e))?;
        drop(file);

        // Step 6: demote the current primary to backup.
        if self.path.exists() {
            let bak = backup_path(&self.path);
            fs::rename(&self.path, &bak).map_err(|e| io_err("rename to bak", &bak, e))?;
            fsync_dir(&parent)?;
        }

        // Step 7: promote the tmp file and make the rename durable.
        fs::rename(&tmp, &self.path).map_err(|e| io_err("rename tmp", &self.path, e))?;
        fsync_dir(&parent)?;
        Ok(())
    }

    // ── Recovery ───────────────────────────────────────────────────────────

    fn recover_locked(&self) -> Result<Option<Map<String, Value>>, StoreError> {
        let primary = read_envelope(&self.path);
        let primary_exists = self.path.exists();
        let bak = backup_path(&self.path);
        let backup_exists = bak.exists();

        let mut chosen: Option<(Envelope, RecoverySource)> = match primary {
            Some(env) => Some((env, RecoverySource::Primary)),
            None => read_envelope(&bak).map(|env| (env, RecoverySource::Backup)),
        };

        // Tmp scan: adopt a strictly higher epoch than anything recovered so
        // far. A tmp the writer never got to rename may carry the newest
        // committed-by-the-caller state.
        let mut adopted_tmp: Option<PathBuf> = None;
        for (tmp, _) in tmp_candidates(&self.path) {
            if let Some(env) = read_envelope(&tmp) {
                let beats = chosen
                    .as_ref()
                    .map(|(best, _)| env.write_epoch > best.write_epoch)
                    .unwrap_or(true);
                if beats {
                    chosen = Some((env, RecoverySource::Tmp));
                    adopted_tmp = Some(tmp);
                }
            }
        }

        let Some((envelope, source)) = chosen else {
            // Nothing parsed. If any candidate file exists, move them all
            // aside and report absence.
            if primary_exists || backup_exists || tmp_candidates(&self.path).next().is_some() {
                self.quarantine_all()?;
            }
            return Ok(None);
        };

        let chosen_epoch = envelope.write_epoch;
        match source {
            RecoverySource::Primary => {}
            RecoverySource::Backup => {
                // The primary, if present, is unreadable; sideline it so the
                // next read goes straight to a clean state.
                if primary_exists {
                    self.quarantine_file(&self.path)?;
                }
                self.note_recovery("backup", chosen_epoch);
            }
            RecoverySource::Tmp => {
                // Finish the interrupted write: demote a readable primary,
                // sideline an unreadable one, then promote the tmp.
                if primary_exists {
                    if read_envelope(&self.path).is_some() {
                        fs::rename(&self.path, &bak)
                            .map_err(|e| io_err("rename to bak", &bak, e))?;
                    } else {
                        self.quarantine_file(&self.path)?;
                    }
                }
                let tmp = adopted_tmp.expect("tmp source implies an adopted path");
                fs::rename(&tmp, &self.path).map_err(|e| io_err("rename tmp", &self.path, e))?;
                fsync_dir(&parent_dir(&self.path))?;
                self.note_recovery("tmp", chosen_epoch);
            }
        }

        // Stale tmp files at or below the chosen epoch are dead.
        for (tmp, _) in tmp_candidates(&self.path) {
            let stale = read_envelope(&tmp)
                .map(|env| env.write_epoch <= chosen_epoch)
                .unwrap_or(true);
            if stale {
                remove_if_present(&tmp)?;
            }
        }

        self.epoch.fetch_max(chosen_epoch, Ordering::SeqCst);
        self.finish_with_migrations(envelope).map(Some)
    }

    fn finish_with_migrations(
        &self,
        envelope: Envelope,
    ) -> Result<Map<String, Value>, StoreError> {
        if envelope.schema_version > self.config.schema_version {
            warn!(
                path = %self.path.display(),
                on_disk = envelope.schema_version,
                configured = self.config.schema_version,
                "document is from a newer schema; returning as-is"
            );
            return Ok(envelope.payload);
        }
        if envelope.schema_version == self.config.schema_version {
            return Ok(envelope.payload);
        }

        let from = envelope.schema_version;
        let migrated = self
            .migrations
            .run(envelope.payload, from, self.config.schema_version)
            .map_err(|failure| match failure {
                MigrationFailure::Missing { from } => StoreError::MigrationMissing { from },
                MigrationFailure::Step { from, reason } => {
                    StoreError::MigrationFailed { from, reason }
                }
            })?;

        // Re-persist before handing the migrated value back, so the next
        // open does not repeat the migration.
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = Envelope::new(self.config.schema_version, epoch, migrated.clone());
        let document = envelope.to_document()?;
        if let Err(err) = self.write_document(&document, epoch) {
            self.epoch.store(epoch - 1, Ordering::SeqCst);
            return Err(err);
        }
        info!(
            path = %self.path.display(),
            from,
            to = self.config.schema_version,
            "document migrated and re-persisted"
        );
        Ok(migrated)
    }

    // ── Quarantine ─────────────────────────────────────────────────────────

    fn quarantine_all(&self) -> Result<(), StoreError> {
        let mut moved = 0u32;
        if self.path.exists() {
            self.quarantine_file(&self.path)?;
            moved += 1;
        }
        let bak = backup_path(&self.path);
        if bak.exists() {
            self.quarantine_file(&bak)?;
            moved += 1;
        }
        for (tmp, _) in tmp_candidates(&self.path) {
            self.quarantine_file(&tmp)?;
            moved += 1;
        }
        warn!(
            code = %ErrorCode::StoreQuarantined,
            path = %self.path.display(),
            moved,
            "no recovery candidate parsed; all candidates quarantined"
        );
        Ok(())
    }

    fn quarantine_file(&self, victim: &Path) -> Result<(), StoreError> {
        let target = next_quarantine_path(&self.path);
        fs::rename(victim, &target).map_err(|e| io_err("quarantine", victim, e))?;
        warn!(from = %victim.display(), to = %target.display(), "file quarantined");
        if let Some(events) = &self.events {
            events.emit(
                EventKind::Quarantine,
                "store",
                &json!({
                    "path": self.path.display().to_string(),
                    "quarantined": target.display().to_string(),
                }),
            );
        }
        Ok(())
    }

    fn note_recovery(&self, source: &str, epoch: u64) {
        info!(path = %self.path.display(), source, epoch, "document recovered");
        if let Some(events) = &self.events {
            events.emit(
                EventKind::Recovery,
                "store",
                &json!({
                    "path": self.path.display().to_string(),
                    "source": source,
                    "epoch": epoch,
                }),
            );
        }
    }
}

// ── Path helpers ───────────────────────────────────────────────────────────

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn backup_path(path: &Path) -> PathBuf {
    sibling(path, ".bak")
}

fn tmp_path(path: &Path, epoch: u64) -> PathBuf {
    sibling(path, &format!(".{}.{}.tmp", std::process::id(), epoch))
}

fn next_quarantine_path(path: &Path) -> PathBuf {
    let millis = epoch_millis(Utc::now());
    let mut candidate = sibling(path, &format!(".quarantine.{millis}"));
    let mut bump = 0u32;
    while candidate.exists() {
        bump += 1;
        candidate = sibling(path, &format!(".quarantine.{millis}-{bump}"));
    }
    candidate
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    parent_dir(path).join(name)
}

/// Tmp files belonging to `path`, with the epoch parsed from the file name.
fn tmp_candidates(path: &Path) -> impl Iterator<Item = (PathBuf, u64)> {
    let prefix = format!(
        "{}.",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    );
    let entries = fs::read_dir(parent_dir(path)).ok();
    entries
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(move |entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || !name.ends_with(".tmp") {
                return None;
            }
            // <name>.<pid>.<epoch>.tmp
            let middle = &name[prefix.len()..name.len() - ".tmp".len()];
            let mut parts = middle.split('.');
            let _pid = parts.next()?.parse::<u32>().ok()?;
            let epoch = parts.next()?.parse::<u64>().ok()?;
            if parts.next().is_some() {
                return None;
            }
            Some((entry.path(), epoch))
        })
}

fn read_envelope(path: &Path) -> Option<Envelope> {
    let raw = fs::read_to_string(path).ok()?;
    match Envelope::parse(&raw) {
        Ok(env) => Some(env),
        Err(err) => {
            debug!(path = %path.display(), "candidate did not parse: {err}");
            None
        }
    }
}

fn scan_max_epoch(path: &Path) -> u64 {
    let mut max = 0u64;
    for candidate in [path.to_path_buf(), backup_path(path)] {
        if let Some(env) = read_envelope(&candidate) {
            max = max.max(env.write_epoch);
        }
    }
    for (tmp, _) in tmp_candidates(path) {
        if let Some(env) = read_envelope(&tmp) {
            max = max.max(env.write_epoch);
        }
    }
    max
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err("remove", path, e)),
    }
}

fn fsync_dir(dir: &Path) -> Result<(), StoreError> {
    let handle = File::open(dir).map_err(|e| io_err("open dir", dir, e))?;
    handle.sync_all().map_err(|e| io_err("fsync dir", dir, e))
}

fn io_err(operation: &'static str, path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        operation,
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn payload(value: i64) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("x".to_string(), json!(value));
        m
    }

    fn store_in(dir: &TempDir) -> ResilientStore {
        ResilientStore::open(dir.path().join("state.json"), StoreConfig::default())
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set(payload(1)).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(payload(1)));
    }

    #[tokio::test]
    async fn get_on_fresh_store_is_absent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.get().await.unwrap(), None);
        assert!(!store.exists().await);
    }

    #[tokio::test]
    async fn epoch_advances_per_write_and_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set(payload(1)).await.unwrap();
        store.set(payload(2)).await.unwrap();
        assert_eq!(store.write_epoch(), 2);

        let reopened = store_in(&dir);
        assert_eq!(reopened.write_epoch(), 2);
        reopened.set(payload(3)).await.unwrap();
        assert_eq!(reopened.write_epoch(), 3);
    }

    #[tokio::test]
    async fn size_guard_rejects_and_rolls_back_epoch() {
        let dir = TempDir::new().unwrap();
        let store = ResilientStore::open(
            dir.path().join("state.json"),
            StoreConfig {
                max_size_bytes: 64,
                ..StoreConfig::default()
            },
        );
        store.set(payload(1)).await.unwrap();
        let epoch_before = store.write_epoch();

        let mut big = Map::new();
        big.insert("blob".to_string(), json!("y".repeat(256)));
        let err = store.set(big).await.unwrap_err();
        assert!(matches!(err, StoreError::SizeExceeded { .. }));
        assert_eq!(store.write_epoch(), epoch_before);
        assert_eq!(store.get().await.unwrap(), Some(payload(1)));
    }

    #[tokio::test]
    async fn backup_holds_previous_payload() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set(payload(1)).await.unwrap();
        store.set(payload(2)).await.unwrap();

        let bak = dir.path().join("state.json.bak");
        let env = read_envelope(&bak).expect("backup should parse");
        assert_eq!(env.payload, payload(1));
    }

    #[tokio::test]
    async fn corrupt_primary_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set(payload(1)).await.unwrap();
        store.set(payload(2)).await.unwrap();
        fs::write(dir.path().join("state.json"), "{\"broken").unwrap();

        assert_eq!(store.get().await.unwrap(), Some(payload(1)));
        // The corrupt primary is sidelined, not left in place.
        assert!(!dir.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn unrecoverable_candidates_are_quarantined() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(dir.path().join("state.json"), "not json").unwrap();
        fs::write(dir.path().join("state.json.bak"), "also not json").unwrap();

        assert_eq!(store.get().await.unwrap(), None);
        assert!(!dir.path().join("state.json").exists());
        assert!(!dir.path().join("state.json.bak").exists());
        let quarantined = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().contains(".quarantine."))
            .count();
        assert_eq!(quarantined, 2);
    }

    #[tokio::test]
    async fn fresh_state_is_writable_after_quarantine() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(dir.path().join("state.json"), "not json").unwrap();
        assert_eq!(store.get().await.unwrap(), None);

        store.set(payload(9)).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(payload(9)));
    }

    #[tokio::test]
    async fn clear_removes_document_and_backup() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set(payload(1)).await.unwrap();
        store.set(payload(2)).await.unwrap();
        store.clear().await.unwrap();
        assert!(!store.exists().await);
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn gc_sidelines_removes_aged_quarantines() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(dir.path().join("state.json"), "not json").unwrap();
        assert_eq!(store.get().await.unwrap(), None);

        // Age the quarantine file past the retention window.
        let past = std::time::SystemTime::now() - Duration::from_secs(60 * 60);
        for entry in fs::read_dir(dir.path()).unwrap().flatten() {
            if entry.file_name().to_string_lossy().contains(".quarantine.") {
                fs::File::options()
                    .write(true)
                    .open(entry.path())
                    .unwrap()
                    .set_modified(past)
                    .unwrap();
            }
        }

        let store = ResilientStore::open(
            dir.path().join("state.json"),
            StoreConfig {
                quarantine_max_age: Duration::from_secs(60),
                ..StoreConfig::default()
            },
        );
        let stats = store.gc_sidelines().await;
        assert_eq!(stats.removed, 1);
    }

    #[tokio::test]
    async fn migration_runs_and_repersists() {
        let dir = TempDir::new().unwrap();
        {
            let store = store_in(&dir);
            store.set(payload(5)).await.unwrap();
        }

        let mut migrations = MigrationRegistry::default();
        migrations.register(crate::migrate::Migration::step(1, |mut p| {
            let old = p.remove("x").ok_or("missing x")?;
            p.insert("value".to_string(), old);
            Ok(p)
        }));
        let store = ResilientStore::open(
            dir.path().join("state.json"),
            StoreConfig {
                schema_version: 2,
                ..StoreConfig::default()
            },
        )
        .with_migrations(migrations);

        let migrated = store.get().await.unwrap().unwrap();
        assert_eq!(migrated.get("value"), Some(&json!(5)));

        // The migrated document is already on disk at the new version.
        let env = read_envelope(&dir.path().join("state.json")).unwrap();
        assert_eq!(env.schema_version, 2);
    }

    #[tokio::test]
    async fn missing_migration_is_fatal() {
        let dir = TempDir::new().unwrap();
        {
            let store = store_in(&dir);
            store.set(payload(5)).await.unwrap();
        }
        let store = ResilientStore::open(
            dir.path().join("state.json"),
            StoreConfig {
                schema_version: 3,
                ..StoreConfig::default()
            },
        );
        let err = store.get().await.unwrap_err();
        assert!(matches!(err, StoreError::MigrationMissing { from: 1 }));
    }

    #[test]
    fn errors_resolve_into_the_catalog() {
        let err = StoreError::SizeExceeded { size: 2, max: 1 };
        assert_eq!(err.code(), ErrorCode::StoreSizeExceeded);
        assert_eq!(err.code().entry().code, "KEEL-E100");
        assert_eq!(
            StoreError::MigrationMissing { from: 1 }.code(),
            ErrorCode::StoreMigrationMissing
        );
    }

    #[test]
    fn tmp_candidates_parse_pid_and_epoch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(dir.path().join("state.json.123.7.tmp"), "{}").unwrap();
        fs::write(dir.path().join("state.json.not-a-tmp"), "{}").unwrap();
        fs::write(dir.path().join("other.json.123.9.tmp"), "{}").unwrap();

        let found: Vec<_> = tmp_candidates(&path).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, 7);
    }
}
