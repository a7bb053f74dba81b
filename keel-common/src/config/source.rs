//! Source tracking for configuration values.

use serde::{Deserialize, Serialize};

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum ConfigSource {
    /// Built-in default.
    Default,
    /// Environment variable override.
    Env {
        /// The variable that supplied the value.
        var: String,
    },
    /// Set programmatically by the embedding process.
    Explicit,
}

/// A configuration value together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sourced<T> {
    /// The effective value.
    pub value: T,
    /// Where it came from.
    pub source: ConfigSource,
}

impl<T> Sourced<T> {
    /// A value from the built-in defaults.
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
        }
    }

    /// A value parsed from an environment variable.
    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Env { var: var.into() },
        }
    }

    /// A value set programmatically.
    pub fn explicit(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Explicit,
        }
    }

    /// True when the value did not come from the defaults.
    pub fn is_overridden(&self) -> bool {
        !matches!(self.source, ConfigSource::Default)
    }
}
