//! Hash-chain construction and verification.

use crate::record::{AuditRecord, GENESIS};
use hmac::{Hmac, Mac};
use keel_common::canonical::{canonical_string_excluding, sha256_hex};
use serde::Serialize;
use sha2::Sha256;
use std::fs;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Canonical form of a record: sorted top-level keys, `hash` and `hmac`
/// removed at the top level only.
pub fn canonical_form(record: &AuditRecord) -> Result<String, serde_json::Error> {
    canonical_string_excluding(record, &["hash", "hmac"])
}

/// SHA-256 hex over a canonical form.
pub fn chain_hash(canonical: &str) -> String {
    sha256_hex(canonical.as_bytes())
}

/// HMAC-SHA256 hex over a canonical form.
pub fn chain_hmac(canonical: &str, key: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Result of a full-file chain verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    /// True when every record links and hashes correctly.
    pub valid: bool,
    /// Records examined.
    pub record_count: u64,
    /// Zero-based index of the first broken record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<u64>,
    /// Expected value at the break (hash or prevHash).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Observed value at the break.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    /// True when the break was an HMAC mismatch.
    pub hmac_error: bool,
}

/// What a single-record check found.
pub(crate) enum RecordCheck {
    Ok,
    ParseError,
    LinkBreak { expected: String, actual: String },
    HashMismatch { expected: String, actual: String },
    HmacMismatch { expected: String, actual: String },
}

/// Verify one parsed record against the running chain state.
///
/// `expected_prev` is the hash of the previous record (or [`GENESIS`]).
/// The HMAC is checked only when a key is provided *and* the record carries
/// one.
pub(crate) fn check_record(
    record: &AuditRecord,
    expected_prev: &str,
    key: Option<&[u8]>,
) -> RecordCheck {
    if record.prev_hash != expected_prev {
        return RecordCheck::LinkBreak {
            expected: expected_prev.to_string(),
            actual: record.prev_hash.clone(),
        };
    }
    let Ok(canonical) = canonical_form(record) else {
        return RecordCheck::ParseError;
    };
    let computed = chain_hash(&canonical);
    if computed != record.hash {
        return RecordCheck::HashMismatch {
            expected: computed,
            actual: record.hash.clone(),
        };
    }
    if let (Some(key), Some(recorded)) = (key, record.hmac.as_deref()) {
        let computed = chain_hmac(&canonical, key);
        if computed != recorded {
            return RecordCheck::HmacMismatch {
                expected: computed,
                actual: recorded.to_string(),
            };
        }
    }
    RecordCheck::Ok
}

/// Re-read an audit file and verify the whole chain.
///
/// When `key` is absent, HMACs are not checked even on records that bear
/// one.
pub fn verify_chain(path: &Path, key: Option<&[u8]>) -> std::io::Result<ChainReport> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ChainReport {
                valid: true,
                ..ChainReport::default()
            });
        }
        Err(err) => return Err(err),
    };

    let mut report = ChainReport {
        valid: true,
        ..ChainReport::default()
    };
    let mut expected_prev = GENESIS.to_string();

    for (index, line) in raw.lines().filter(|l| !l.trim().is_empty()).enumerate() {
        let index = index as u64;
        let record = match serde_json::from_str::<AuditRecord>(line) {
            Ok(record) => record,
            Err(_) => {
                report.valid = false;
                report.broken_at = Some(index);
                return Ok(report);
            }
        };
        match check_record(&record, &expected_prev, key) {
            RecordCheck::Ok => {
                report.record_count += 1;
                expected_prev = record.hash.clone();
            }
            RecordCheck::ParseError => {
                report.valid = false;
                report.broken_at = Some(index);
                return Ok(report);
            }
            RecordCheck::LinkBreak { expected, actual }
            | RecordCheck::HashMismatch { expected, actual } => {
                report.valid = false;
                report.broken_at = Some(index);
                report.expected = Some(expected);
                report.actual = Some(actual);
                return Ok(report);
            }
            RecordCheck::HmacMismatch { expected, actual } => {
                report.valid = false;
                report.broken_at = Some(index);
                report.expected = Some(expected);
                report.actual = Some(actual);
                report.hmac_error = true;
                return Ok(report);
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AuditPhase;
    use chrono::Utc;
    use serde_json::json;

    fn record(seq: u64, prev_hash: &str) -> AuditRecord {
        let mut record = AuditRecord {
            seq,
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
            hmac: None,
            phase: AuditPhase::Intent,
            intent_seq: None,
            ts: Utc::now(),
            action: "act".to_string(),
            target: "tgt".to_string(),
            params: json!({ "k": "v" }),
            dedupe_key: None,
            result: None,
            error: None,
            dry_run: false,
        };
        let canonical = canonical_form(&record).unwrap();
        record.hash = chain_hash(&canonical);
        record
    }

    #[test]
    fn canonical_form_excludes_hash_fields_at_top_level_only() {
        let mut r = record(1, GENESIS);
        r.params = json!({ "hash": "abc123", "z": 1 });
        let canonical = canonical_form(&r).unwrap();
        assert!(canonical.contains("\"hash\":\"abc123\""));
        // The top-level hash field itself is excluded.
        assert!(!canonical.contains(&r.hash));
    }

    #[test]
    fn canonical_form_is_stable_for_a_given_record() {
        let r = record(1, GENESIS);
        assert_eq!(canonical_form(&r).unwrap(), canonical_form(&r).unwrap());
    }

    #[test]
    fn check_detects_link_break() {
        let r = record(2, "not-the-prev-hash");
        assert!(matches!(
            check_record(&r, "expected-hash", None),
            RecordCheck::LinkBreak { .. }
        ));
    }

    #[test]
    fn check_detects_tampered_content() {
        let mut r = record(1, GENESIS);
        r.action = "tampered".to_string();
        assert!(matches!(
            check_record(&r, GENESIS, None),
            RecordCheck::HashMismatch { .. }
        ));
    }

    #[test]
    fn hmac_is_only_checked_with_a_key() {
        let mut r = record(1, GENESIS);
        let canonical = canonical_form(&r).unwrap();
        r.hmac = Some("0".repeat(64));
        // Without a key, the bogus MAC is ignored.
        assert!(matches!(check_record(&r, GENESIS, None), RecordCheck::Ok));
        // With the key, it is a mismatch.
        assert!(matches!(
            check_record(&r, GENESIS, Some(b"k")),
            RecordCheck::HmacMismatch { .. }
        ));
        // A correct MAC passes.
        r.hmac = Some(chain_hmac(&canonical, b"k"));
        assert!(matches!(
            check_record(&r, GENESIS, Some(b"k")),
            RecordCheck::Ok
        ));
    }

    #[test]
    fn verify_chain_on_missing_file_is_valid_and_empty() {
        let report = verify_chain(Path::new("/nonexistent/audit.jsonl"), None).unwrap();
        assert!(report.valid);
        assert_eq!(report.record_count, 0);
    }
}
