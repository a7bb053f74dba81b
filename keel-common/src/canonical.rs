//! Canonical JSON serialization used for hashing and fingerprinting.
//!
//! Canonical form is a wire contract: keys are emitted in lexicographic order
//! at every level, with no insignificant whitespace. `serde_json`'s default
//! `BTreeMap`-backed object representation provides the ordering; callers must
//! convert through [`serde_json::Value`] rather than serializing structs
//! directly, since derive-based serialization follows field declaration order.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a value in canonical form.
pub fn canonical_string<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let tree = serde_json::to_value(value)?;
    serde_json::to_string(&tree)
}

/// Canonical form with the named top-level fields removed.
///
/// Only the top level is stripped: nested fields with the same names (for
/// example a commit SHA stored under `params.hash`) are preserved.
pub fn canonical_string_excluding<T: Serialize>(
    value: &T,
    exclude: &[&str],
) -> Result<String, serde_json::Error> {
    let mut tree = serde_json::to_value(value)?;
    if let Value::Object(map) = &mut tree {
        for field in exclude {
            map.remove(*field);
        }
    }
    serde_json::to_string(&tree)
}

/// Lowercase hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Lowercase hex SHA-256 of a value's canonical form.
pub fn sha256_canonical<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_string(value)?.as_bytes()))
}
