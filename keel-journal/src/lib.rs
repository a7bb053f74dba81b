//! **keel-journal** – segmented write-ahead log for filesystem side effects.
//!
//! Every produced file lands here first: one checksummed JSON line per
//! operation, appended to a rolling segment. Two independent downstream
//! cursors (object store, version control) drain records at their own pace;
//! the active segment rotates only once both have caught up. Replay rebuilds
//! the target tree from the records alone.

pub mod checkpoint;
pub mod record;
pub mod replay;
pub mod sync;
pub mod wal;

pub use checkpoint::{CursorKind, WalCheckpoint};
pub use record::{WalOp, WalRecord};
pub use replay::{apply_record, ReplayStats};
pub use sync::{DrainStats, SyncTarget, SyncTargetError};
pub use wal::{CursorStatus, JournalConfig, JournalError, Wal, WalStatus, ACTIVE_SEGMENT};
