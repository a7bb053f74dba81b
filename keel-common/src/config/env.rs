//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for `KEEL_` environment variables with
//! validation, error collection, and source tracking. Parsing never aborts
//! early: every problem is collected so the operator sees all of them at once.

use super::source::Sourced;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        /// Full variable name.
        var: String,
        /// Description of the expected shape.
        expected: String,
        /// The offending value.
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        /// Full variable name.
        var: String,
        /// The offending value.
        value: String,
        /// Lower bound, inclusive.
        min: String,
        /// Upper bound, inclusive.
        max: String,
    },
}

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    /// Create a new parser with the KEEL_ prefix.
    pub fn new() -> Self {
        Self {
            prefix: "KEEL_",
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Get the full variable name with prefix.
    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get a string value with default.
    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => Sourced::from_env(value, var_name),
            Err(_) => Sourced::default_value(default.to_string()),
        }
    }

    /// Get an optional string value (no default).
    pub fn get_opt_string(&mut self, name: &str) -> Option<Sourced<String>> {
        let var_name = self.var_name(name);
        env::var(&var_name)
            .ok()
            .map(|value| Sourced::from_env(value, var_name))
    }

    /// Get a boolean value with default.
    ///
    /// Truthy spellings are `1`, `true`, `yes`, `on`; falsy are `0`,
    /// `false`, `no`, `off`, and the empty string (case-insensitive,
    /// surrounding whitespace ignored). Any other value keeps the default
    /// and records an error.
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let var_name = self.var_name(name);
        let Ok(raw) = env::var(&var_name) else {
            return Sourced::default_value(default);
        };
        match parse_bool(&raw) {
            Some(parsed) => Sourced::from_env(parsed, var_name),
            None => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name.clone(),
                    expected: "boolean (1/0, true/false, yes/no, on/off)".to_string(),
                    value: raw,
                });
                Sourced::from_env(default, var_name)
            }
        }
    }

    /// Get a u64 value with default and range validation.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.parse::<u64>() {
                Ok(parsed) if (min..=max).contains(&parsed) => {
                    Sourced::from_env(parsed, var_name)
                }
                Ok(parsed) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name,
                        value: parsed.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::default_value(default)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name,
                        expected: "unsigned integer".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get a u32 value with default and range validation.
    pub fn get_u32_range(&mut self, name: &str, default: u32, min: u32, max: u32) -> Sourced<u32> {
        let wide =
            self.get_u64_range(name, u64::from(default), u64::from(min), u64::from(max));
        Sourced {
            value: wide.value as u32,
            source: wide.source,
        }
    }

    /// Get a usize value with default and range validation.
    pub fn get_usize_range(
        &mut self,
        name: &str,
        default: usize,
        min: usize,
        max: usize,
    ) -> Sourced<usize> {
        let wide = self.get_u64_range(name, default as u64, min as u64, max as u64);
        Sourced {
            value: wide.value as usize,
            source: wide.source,
        }
    }

    /// Get a millisecond duration with default and range validation.
    pub fn get_duration_ms(
        &mut self,
        name: &str,
        default: Duration,
        min: Duration,
        max: Duration,
    ) -> Sourced<Duration> {
        let wide = self.get_u64_range(
            name,
            default.as_millis() as u64,
            min.as_millis() as u64,
            max.as_millis() as u64,
        );
        Sourced {
            value: Duration::from_millis(wide.value),
            source: wide.source,
        }
    }
}

/// Classify a boolean spelling; `None` when it is neither truthy nor falsy.
fn parse_bool(raw: &str) -> Option<bool> {
    const TRUTHY: &[&str] = &["1", "true", "yes", "on"];
    const FALSY: &[&str] = &["0", "false", "no", "off", ""];
    let lowered = raw.trim().to_ascii_lowercase();
    if TRUTHY.contains(&lowered.as_str()) {
        Some(true)
    } else if FALSY.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}
