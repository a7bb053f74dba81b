//! Downstream sync targets draining the journal.

use crate::record::WalRecord;
use async_trait::async_trait;

/// Error type returned by sync targets.
pub type SyncTargetError = Box<dyn std::error::Error + Send + Sync>;

/// A downstream consumer of journal records (object store, version control).
///
/// Implementations live outside the substrate; the journal only needs to
/// apply records in order and report failures. A failing target stalls its
/// own cursor and never the other one.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// Diagnostic name used in logs and errors.
    fn name(&self) -> &str;

    /// Apply one record to the downstream.
    ///
    /// Called in strict sequence order. Implementations should be idempotent:
    /// after a crash between apply and cursor persistence, the same record is
    /// delivered again.
    async fn apply(&self, record: &WalRecord) -> Result<(), SyncTargetError>;
}

/// Outcome of one drain pass for a cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Records applied this pass.
    pub applied: u64,
    /// Cursor position after the pass.
    pub cursor: u64,
}
