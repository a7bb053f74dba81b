//! **keel-common** – shared building blocks for the Keel durable-state substrate.
//!
//! Everything here is a leaf: secret redaction, canonical JSON, scoped
//! locking, the substrate event bus, the logging bootstrap, the error
//! catalog, and the environment-driven configuration machinery. The durable
//! artifacts themselves (store, journal, audit trail) live in their own
//! crates and build on these pieces.

pub mod canonical;
pub mod config;
pub mod errors;
pub mod events;
pub mod lock;
pub mod logging;
pub mod redact;
pub mod util;

pub use canonical::{canonical_string, canonical_string_excluding, sha256_canonical, sha256_hex};
pub use events::{EventBus, EventKind};
pub use lock::{ScopedGuard, ScopedMutex};
pub use redact::{RedactRule, RedactedError, Redactor};
