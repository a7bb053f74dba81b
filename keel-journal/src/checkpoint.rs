//! Persisted checkpoint tracking both downstream cursors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two independent downstream consumers of the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    /// Object-store mirror.
    ObjectStore,
    /// Version-control mirror.
    VersionControl,
}

impl CursorKind {
    /// Short label used in logs and task names.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ObjectStore => "object-store",
            Self::VersionControl => "version-control",
        }
    }
}

/// Durable record of how far each cursor has consumed the journal.
///
/// Cursors advance independently; rotation of the active segment is safe
/// only when both have reached the segment's last sequence number.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WalCheckpoint {
    /// Last sequence applied to the object store.
    pub object_store_seq: u64,
    /// Last sequence applied to version control.
    pub version_control_seq: u64,
    /// When the object-store cursor last advanced.
    pub object_store_ts: Option<DateTime<Utc>>,
    /// When the version-control cursor last advanced.
    pub version_control_ts: Option<DateTime<Utc>>,
    /// File name of the active segment.
    pub current_segment: String,
    /// Records appended to the active segment.
    pub entry_count: u64,
}

impl WalCheckpoint {
    /// Last sequence applied by the given cursor.
    pub fn cursor_seq(&self, kind: CursorKind) -> u64 {
        match kind {
            CursorKind::ObjectStore => self.object_store_seq,
            CursorKind::VersionControl => self.version_control_seq,
        }
    }

    /// When the given cursor last advanced.
    pub fn cursor_ts(&self, kind: CursorKind) -> Option<DateTime<Utc>> {
        match kind {
            CursorKind::ObjectStore => self.object_store_ts,
            CursorKind::VersionControl => self.version_control_ts,
        }
    }

    /// Advance a cursor; sequences never move backwards.
    pub fn advance(&mut self, kind: CursorKind, seq: u64, ts: DateTime<Utc>) {
        let (slot, slot_ts) = match kind {
            CursorKind::ObjectStore => (&mut self.object_store_seq, &mut self.object_store_ts),
            CursorKind::VersionControl => {
                (&mut self.version_control_seq, &mut self.version_control_ts)
            }
        };
        if seq > *slot {
            *slot = seq;
            *slot_ts = Some(ts);
        }
    }

    /// The slower of the two cursors; rotation gates on this.
    pub fn min_cursor(&self) -> u64 {
        self.object_store_seq.min(self.version_control_seq)
    }
}
