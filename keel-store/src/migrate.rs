//! Schema migrations applied to recovered documents.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A single-step migration transforming a payload from version `from` to
/// `from + 1`.
pub struct Migration {
    /// Version this migration upgrades from.
    pub from: u32,
    apply: Box<dyn Fn(Map<String, Value>) -> Result<Map<String, Value>, String> + Send + Sync>,
}

impl Migration {
    /// Define the step upgrading version `from` to `from + 1`.
    pub fn step<F>(from: u32, apply: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Result<Map<String, Value>, String> + Send + Sync + 'static,
    {
        Self {
            from,
            apply: Box::new(apply),
        }
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

/// Ordered set of migration steps, indexed by source version.
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    steps: BTreeMap<u32, Migration>,
}

/// Why a migration run could not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationFailure {
    /// No step registered for this source version. Fatal: the document
    /// cannot be brought to the configured version.
    Missing {
        /// The version with no registered step.
        from: u32,
    },
    /// A registered step returned an error.
    Step {
        /// The version whose step failed.
        from: u32,
        /// The step's error message.
        reason: String,
    },
}

impl MigrationRegistry {
    /// Register a step; later registrations for the same version replace
    /// earlier ones.
    pub fn register(&mut self, migration: Migration) {
        self.steps.insert(migration.from, migration);
    }

    /// Number of registered steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when no steps are registered.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply steps in order to bring `payload` from `from` to `to`.
    pub fn run(
        &self,
        mut payload: Map<String, Value>,
        from: u32,
        to: u32,
    ) -> Result<Map<String, Value>, MigrationFailure> {
        for version in from..to {
            let step = self
                .steps
                .get(&version)
                .ok_or(MigrationFailure::Missing { from: version })?;
            payload = (step.apply)(payload).map_err(|reason| MigrationFailure::Step {
                from: version,
                reason,
            })?;
        }
        Ok(payload)
    }
}
