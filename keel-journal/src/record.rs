//! Journal record shape and integrity helpers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use keel_common::sha256_hex;
use serde::{Deserialize, Serialize};

/// Filesystem operation captured by a journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalOp {
    /// Write `data` to `path`, overwriting.
    Write,
    /// Remove `path`; absence is tolerated on replay.
    Delete,
    /// Recursively create the directory at `path`.
    Mkdir,
}

/// One journal record, serialized as a single JSON line.
///
/// `data` is base64 for binary safety; `checksum` is the SHA-256 of the raw
/// bytes (before encoding) and is present exactly for `write` records. The
/// `synced_*` flags are part of the wire format for external readers; this
/// writer never rewrites appended lines, so they are carried through
/// untouched when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Record timestamp.
    pub ts: DateTime<Utc>,
    /// Monotonic sequence number, strictly increasing across segments.
    pub seq: u64,
    /// The captured operation.
    pub op: WalOp,
    /// Path relative to the journal's target root.
    pub path: String,
    /// SHA-256 hex of the decoded payload (write records only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Base64 payload (write records only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// External object-store sync marker; not maintained by this writer.
    #[serde(rename = "synced_A", default, skip_serializing_if = "Option::is_none")]
    pub synced_object_store: Option<bool>,
    /// External version-control sync marker; not maintained by this writer.
    #[serde(rename = "synced_B", default, skip_serializing_if = "Option::is_none")]
    pub synced_version_control: Option<bool>,
}

impl WalRecord {
    /// Build a `write` record, encoding the payload and computing its checksum.
    pub fn write(seq: u64, path: String, data: &[u8]) -> Self {
        Self {
            ts: Utc::now(),
            seq,
            op: WalOp::Write,
            path,
            checksum: Some(sha256_hex(data)),
            data: Some(BASE64.encode(data)),
            synced_object_store: None,
            synced_version_control: None,
        }
    }

    /// Build a `delete` record.
    pub fn delete(seq: u64, path: String) -> Self {
        Self::data_free(seq, path, WalOp::Delete)
    }

    /// Build a `mkdir` record.
    pub fn mkdir(seq: u64, path: String) -> Self {
        Self::data_free(seq, path, WalOp::Mkdir)
    }

    fn data_free(seq: u64, path: String, op: WalOp) -> Self {
        Self {
            ts: Utc::now(),
            seq,
            op,
            path,
            checksum: None,
            data: None,
            synced_object_store: None,
            synced_version_control: None,
        }
    }

    /// Decode the base64 payload of a `write` record.
    pub fn decode_data(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        self.data.as_deref().map(|d| BASE64.decode(d))
    }

    /// True when the decoded payload matches the recorded checksum.
    ///
    /// Records without a payload verify trivially.
    pub fn verify_checksum(&self) -> bool {
        match (&self.data, &self.checksum) {
            (Some(_), Some(expected)) => match self.decode_data() {
                Some(Ok(bytes)) => &sha256_hex(&bytes) == expected,
                _ => false,
            },
            (None, None) => true,
            // A payload without a checksum (or the reverse) is malformed.
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_record_checksum_verifies() {
        let record = WalRecord::write(1, "a/b.txt".to_string(), b"hello");
        assert!(record.verify_checksum());
        assert_eq!(record.decode_data().unwrap().unwrap(), b"hello");
    }

    #[test]
    fn tampered_data_fails_verification() {
        let mut record = WalRecord::write(1, "a/b.txt".to_string(), b"hello");
        record.data = Some(BASE64.encode(b"hellp"));
        assert!(!record.verify_checksum());
    }

    #[test]
    fn data_free_ops_verify_trivially() {
        assert!(WalRecord::delete(2, "a".to_string()).verify_checksum());
        assert!(WalRecord::mkdir(3, "b".to_string()).verify_checksum());
    }

    #[test]
    fn checksum_without_data_is_malformed() {
        let mut record = WalRecord::delete(1, "a".to_string());
        record.checksum = Some("00".repeat(32));
        assert!(!record.verify_checksum());
    }

    #[test]
    fn line_round_trips_with_sync_markers() {
        let raw = r#"{"ts":"2025-01-01T00:00:00Z","seq":4,"op":"delete","path":"x","synced_A":true}"#;
        let record: WalRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.synced_object_store, Some(true));
        let rendered = serde_json::to_string(&record).unwrap();
        assert!(rendered.contains("\"synced_A\":true"));
        assert!(!rendered.contains("synced_B"));
    }

    #[test]
    fn binary_payload_survives_encoding() {
        let bytes: Vec<u8> = (0u16..=255).map(|b| b as u8).collect();
        let record = WalRecord::write(9, "bin".to_string(), &bytes);
        let line = serde_json::to_string(&record).unwrap();
        let parsed: WalRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.decode_data().unwrap().unwrap(), bytes);
        assert!(parsed.verify_checksum());
    }
}
