//! Configuration system for the Keel substrate.
//!
//! Each subsystem crate owns its config struct with built-in defaults; this
//! module provides the shared machinery:
//! - Environment variable parsing with type safety (`KEEL_` prefix)
//! - Error collection so all problems are reported at once
//! - Source tracking for debugging

pub mod env;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
}
