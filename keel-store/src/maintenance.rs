//! Age-based cleanup of quarantine and stale tmp sidelines.
//!
//! Two granularities: [`sideline_gc`] sweeps the siblings of one document
//! (used by [`ResilientStore::gc_sidelines`](crate::ResilientStore), under
//! that document's lock), and [`sideline_sweep`] sweeps an entire directory
//! of documents, which is what the scheduled retention task runs against a
//! state directory holding any number of them.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Stats for one sideline GC pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    /// Files removed this pass.
    pub removed: u32,
    /// Sideline files younger than the retention window.
    pub retained: u32,
    /// Files that could not be inspected or removed.
    pub errors: u32,
}

/// True for file names shaped like a store sideline.
fn is_sideline_name(name: &str) -> bool {
    name.contains(".quarantine.") || name.ends_with(".tmp")
}

/// Remove sidelines of `document` older than `max_age`.
///
/// Sidelines are siblings whose names extend the document's file name with
/// `.quarantine.` or a `.tmp` suffix. Other documents in the same directory
/// are left alone.
pub fn sideline_gc(document: &Path, max_age: Duration) -> GcStats {
    let Some(doc_name) = document.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return GcStats::default();
    };
    let parent = document
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    sweep(parent, max_age, |name| {
        name.starts_with(&doc_name) && is_sideline_name(name)
    })
}

/// Remove every document's sidelines under `dir` older than `max_age`.
///
/// Matches on name shape alone, so it covers documents the caller opened ad
/// hoc and has long since dropped. It does not hold any document's lock;
/// the age window is what keeps it away from in-flight tmp files.
pub fn sideline_sweep(dir: &Path, max_age: Duration) -> GcStats {
    sweep(dir, max_age, is_sideline_name)
}

/// Shared pass: remove matching entries older than `max_age`.
///
/// Recency is judged by filesystem modification time; files whose metadata
/// cannot be read are counted as errors and left in place.
fn sweep(dir: &Path, max_age: Duration, matches: impl Fn(&str) -> bool) -> GcStats {
    let mut stats = GcStats::default();
    let Ok(entries) = fs::read_dir(dir) else {
        return stats;
    };

    let now = SystemTime::now();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !matches(&name) {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| now.duration_since(mtime).ok());
        match age {
            Some(age) if age > max_age => match fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!(file = %entry.path().display(), "sideline removed");
                    stats.removed += 1;
                }
                Err(err) => {
                    warn!(file = %entry.path().display(), "sideline removal failed: {err}");
                    stats.errors += 1;
                }
            },
            Some(_) => stats.retained += 1,
            None => stats.errors += 1,
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backdate(path: &Path) {
        let past = SystemTime::now() - Duration::from_secs(60 * 60);
        let handle = fs::File::options().write(true).open(path).unwrap();
        handle.set_modified(past).unwrap();
    }

    #[test]
    fn removes_only_old_sidelines() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("state.json");
        fs::write(&doc, "{}").unwrap();
        let old = dir.path().join("state.json.quarantine.1700000000000");
        let fresh = dir.path().join("state.json.quarantine.1800000000000");
        fs::write(&old, "x").unwrap();
        fs::write(&fresh, "x").unwrap();
        backdate(&old);

        let stats = sideline_gc(&doc, Duration::from_secs(60));
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.retained, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        // The document itself is never a GC candidate.
        assert!(doc.exists());
    }

    #[test]
    fn document_scoped_gc_ignores_unrelated_files() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("state.json");
        fs::write(dir.path().join("other.json.quarantine.1"), "x").unwrap();

        let stats = sideline_gc(&doc, Duration::from_secs(0));
        assert_eq!(stats, GcStats::default());
        assert!(dir.path().join("other.json.quarantine.1").exists());
    }

    #[test]
    fn directory_sweep_covers_every_document() {
        let dir = TempDir::new().unwrap();
        for name in ["idempotency.json", "cursor.json", "notes.json"] {
            fs::write(dir.path().join(name), "{}").unwrap();
            let sideline = dir.path().join(format!("{name}.quarantine.1700000000000"));
            fs::write(&sideline, "x").unwrap();
            backdate(&sideline);
        }
        let stale_tmp = dir.path().join("cursor.json.42.3.tmp");
        fs::write(&stale_tmp, "{}").unwrap();
        backdate(&stale_tmp);

        let stats = sideline_sweep(dir.path(), Duration::from_secs(60));
        assert_eq!(stats.removed, 4);
        assert_eq!(stats.errors, 0);
        // The documents themselves survive.
        for name in ["idempotency.json", "cursor.json", "notes.json"] {
            assert!(dir.path().join(name).exists());
        }
    }

    #[test]
    fn directory_sweep_spares_fresh_sidelines() {
        let dir = TempDir::new().unwrap();
        let fresh = dir.path().join("a.json.9.1.tmp");
        fs::write(&fresh, "{}").unwrap();

        let stats = sideline_sweep(dir.path(), Duration::from_secs(60));
        assert_eq!(stats.removed, 0);
        assert_eq!(stats.retained, 1);
        assert!(fresh.exists());
    }
}
