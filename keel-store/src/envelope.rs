//! Document envelope: schema version and write epoch wrapped around the payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelope wrapping every stored document.
///
/// The write epoch increases on every successful write and disambiguates
/// recovery candidates: among primary, backup, and in-flight tmp files, the
/// highest parseable epoch wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Schema version of the payload; migrations run when this is behind
    /// the configured version.
    #[serde(rename = "_schemaVersion")]
    pub schema_version: u32,
    /// Monotonic write generation for this document.
    #[serde(rename = "_writeEpoch")]
    pub write_epoch: u64,
    /// The caller's document, merged alongside the marker fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Wrap `payload` at the given version and epoch.
    pub fn new(schema_version: u32, write_epoch: u64, payload: Map<String, Value>) -> Self {
        Self {
            schema_version,
            write_epoch,
            payload,
        }
    }

    /// Serialize with sorted keys and two-space indentation.
    ///
    /// Conversion through [`Value`] forces lexicographic key order at every
    /// level, marker fields included — the on-disk format is a wire contract.
    pub fn to_document(&self) -> Result<String, serde_json::Error> {
        let tree = serde_json::to_value(self)?;
        let mut rendered = serde_json::to_string_pretty(&tree)?;
        rendered.push('\n');
        Ok(rendered)
    }

    /// Parse an envelope, requiring both marker fields.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
