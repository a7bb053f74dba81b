//! **keel-store** – resilient single-document JSON store.
//!
//! Small singleton state files (checkpoints, indexes, counters) are written
//! through an atomic tmp+fsync+rename protocol and wrapped in an envelope
//! carrying a schema version and a monotonic write epoch. Reads recover from
//! the primary, its backup, or an in-flight tmp file — whichever parses with
//! the highest epoch — and quarantine anything unrecoverable instead of
//! deleting it.

pub mod envelope;
pub mod maintenance;
pub mod migrate;
pub mod store;

pub use envelope::Envelope;
pub use maintenance::{sideline_gc, sideline_sweep, GcStats};
pub use migrate::{Migration, MigrationFailure, MigrationRegistry};
pub use store::{ResilientStore, StoreConfig, StoreError, DEFAULT_MAX_SIZE_BYTES};
