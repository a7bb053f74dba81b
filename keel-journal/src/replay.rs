//! Replay journal records against a target tree.

use crate::record::{WalOp, WalRecord};
use crate::wal::{io_err, safe_relative, JournalError, Wal};
use keel_common::errors::ErrorCode;
use keel_common::events::EventKind;
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Outcome of a replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records applied to the target tree.
    pub applied: u64,
    /// `write` records skipped because their checksum did not verify.
    pub checksum_skipped: u64,
}

impl Wal {
    /// Apply every record, in sequence order, to `target_root`.
    ///
    /// Replay is idempotent: `write` overwrites, `delete` tolerates absence,
    /// `mkdir` is recursive. Records failing checksum verification are
    /// logged and skipped, never fatal.
    pub async fn replay(&self, target_root: &Path) -> Result<ReplayStats, JournalError> {
        let records = self.records_after(0)?;
        let mut stats = ReplayStats::default();

        for record in &records {
            if !record.verify_checksum() {
                warn!(
                    code = %ErrorCode::JournalChecksumMismatch,
                    seq = record.seq,
                    path = %record.path,
                    "checksum mismatch; record skipped during replay"
                );
                self.emit_checksum_skip(record);
                stats.checksum_skipped += 1;
                continue;
            }
            apply_record(target_root, record)?;
            stats.applied += 1;
        }

        info!(
            root = %target_root.display(),
            applied = stats.applied,
            skipped = stats.checksum_skipped,
            "journal replayed"
        );
        Ok(stats)
    }

    fn emit_checksum_skip(&self, record: &WalRecord) {
        if let Some(events) = self.event_bus() {
            events.emit(
                EventKind::ChecksumSkip,
                "journal",
                &json!({ "seq": record.seq, "path": record.path }),
            );
        }
    }
}

/// Apply one verified record to the tree rooted at `root`.
///
/// Paths are re-validated here: replayed segments may come from a foreign
/// journal directory.
pub fn apply_record(root: &Path, record: &WalRecord) -> Result<(), JournalError> {
    let rel = safe_relative(&record.path)?;
    let target = root.join(rel);

    match record.op {
        WalOp::Write => {
            let bytes = match record.decode_data() {
                Some(Ok(bytes)) => bytes,
                // verify_checksum() already rejected undecodable payloads.
                _ => return Ok(()),
            };
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| io_err("create dir", parent, e))?;
            }
            fs::write(&target, bytes).map_err(|e| io_err("write", &target, e))?;
        }
        WalOp::Delete => {
            let outcome = if target.is_dir() {
                fs::remove_dir_all(&target)
            } else {
                fs::remove_file(&target)
            };
            match outcome {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err("delete", &target, e)),
            }
        }
        WalOp::Mkdir => {
            fs::create_dir_all(&target).map_err(|e| io_err("mkdir", &target, e))?;
        }
    }
    Ok(())
}
