//! Audit record shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The hash chained into the first record of every audit file.
pub const GENESIS: &str = "genesis";

/// Phase of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPhase {
    /// Declared before a side effect executes.
    Intent,
    /// Outcome of a previously declared intent.
    Result,
    /// The action was refused by policy.
    Denied,
    /// The action was evaluated without executing.
    DryRun,
}

/// One hash-chained audit record, serialized as a single JSON line.
///
/// `hash` covers the canonical form of the record with `hash` and `hmac`
/// removed at the top level only; nested fields with those names (a commit
/// SHA in `params`, say) are part of the hashed content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Sequence within the current file, starting at 1.
    pub seq: u64,
    /// Hash of the previous record, or [`GENESIS`] for the first.
    #[serde(rename = "prevHash")]
    pub prev_hash: String,
    /// SHA-256 hex of this record's canonical form.
    pub hash: String,
    /// Keyed MAC of the canonical form, when a key is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
    /// Record phase.
    pub phase: AuditPhase,
    /// For `result` records, the seq of the paired intent.
    #[serde(rename = "intentSeq", skip_serializing_if = "Option::is_none")]
    pub intent_seq: Option<u64>,
    /// Record timestamp.
    pub ts: DateTime<Utc>,
    /// Action name, e.g. `create_pr`.
    pub action: String,
    /// Target of the action, e.g. a repository.
    pub target: String,
    /// Redacted action parameters.
    pub params: Value,
    /// Idempotency fingerprint, when the action is deduplicated.
    #[serde(rename = "dedupeKey", skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    /// Redacted result payload, for `result` records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Redacted error message, when the action failed or was denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True for `dry_run` records.
    #[serde(rename = "dryRun")]
    pub dry_run: bool,
}

/// Outcome view served by the intent→result index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentOutcome {
    /// True once a `result` record paired with the intent.
    pub has_result: bool,
    /// The result's error, if it carried one.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_names_are_camel_case() {
        let record = AuditRecord {
            seq: 1,
            prev_hash: GENESIS.to_string(),
            hash: "h".to_string(),
            hmac: None,
            phase: AuditPhase::Intent,
            intent_seq: None,
            ts: Utc::now(),
            action: "create_pr".to_string(),
            target: "repo".to_string(),
            params: json!({ "title": "t" }),
            dedupe_key: Some("k".to_string()),
            result: None,
            error: None,
            dry_run: false,
        };
        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains("\"prevHash\":\"genesis\""));
        assert!(line.contains("\"dedupeKey\""));
        assert!(line.contains("\"dryRun\":false"));
        assert!(!line.contains("intentSeq"));
        assert!(!line.contains("\"hmac\""));
    }

    #[test]
    fn phases_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&AuditPhase::DryRun).unwrap(),
            "\"dry_run\""
        );
    }
}
