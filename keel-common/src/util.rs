//! Shared utilities for Keel.

use chrono::{DateTime, Utc};

/// Render a timestamp safe for use in a file name.
///
/// RFC 3339 output contains `:` and `.`, which are replaced with `-` so
/// archive names stay portable across filesystems.
pub fn filesystem_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// Milliseconds since the Unix epoch, used for quarantine file suffixes.
pub fn epoch_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filesystem_timestamp_has_no_reserved_characters() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        let rendered = filesystem_timestamp(ts);
        assert!(!rendered.contains(':'));
        assert!(!rendered.contains('.'));
        assert!(rendered.starts_with("2025-03-14T09-26-53"));
    }

    #[test]
    fn epoch_millis_matches_chrono() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(epoch_millis(ts), 1_700_000_000_123);
    }
}
