//! End-to-end replay: the journal alone must be able to rebuild the tree.

use keel_journal::{CursorKind, JournalConfig, SyncTarget, SyncTargetError, Wal, WalOp, WalRecord};
use std::fs;
use std::sync::Mutex;
use tempfile::TempDir;

struct Sink;

#[async_trait::async_trait]
impl SyncTarget for Sink {
    fn name(&self) -> &str {
        "sink"
    }
    async fn apply(&self, _: &WalRecord) -> Result<(), SyncTargetError> {
        Ok(())
    }
}

#[tokio::test]
async fn replay_reproduces_the_original_tree() {
    let journal_dir = TempDir::new().unwrap();
    let original = TempDir::new().unwrap();
    let rebuilt = TempDir::new().unwrap();

    let wal = Wal::open(journal_dir.path(), JournalConfig::default())
        .await
        .unwrap();

    // Apply operations to the original tree and journal each one.
    let ops: &[(WalOp, &str, Option<&[u8]>)] = &[
        (WalOp::Mkdir, "docs", None),
        (WalOp::Write, "docs/a.txt", Some(b"alpha")),
        (WalOp::Write, "docs/b.bin", Some(&[0u8, 159, 146, 150])),
        (WalOp::Write, "docs/a.txt", Some(b"alpha-2")),
        (WalOp::Delete, "docs/b.bin", None),
        (WalOp::Write, "notes.md", Some(b"# notes")),
    ];
    for (op, path, data) in ops {
        wal.append(*op, path, *data).await.unwrap();
        match op {
            WalOp::Mkdir => fs::create_dir_all(original.path().join(path)).unwrap(),
            WalOp::Write => {
                if let Some(parent) = original.path().join(path).parent() {
                    fs::create_dir_all(parent).unwrap();
                }
                fs::write(original.path().join(path), data.unwrap()).unwrap()
            }
            WalOp::Delete => fs::remove_file(original.path().join(path)).unwrap(),
        }
    }

    let stats = wal.replay(rebuilt.path()).await.unwrap();
    assert_eq!(stats.applied, ops.len() as u64);
    assert_eq!(stats.checksum_skipped, 0);

    assert_eq!(
        fs::read(rebuilt.path().join("docs/a.txt")).unwrap(),
        b"alpha-2"
    );
    assert_eq!(fs::read(rebuilt.path().join("notes.md")).unwrap(), b"# notes");
    assert!(!rebuilt.path().join("docs/b.bin").exists());
    assert!(rebuilt.path().join("docs").is_dir());
}

#[tokio::test]
async fn replay_spans_rotated_segments() {
    let journal_dir = TempDir::new().unwrap();
    let rebuilt = TempDir::new().unwrap();
    let config = JournalConfig {
        max_segment_entries: 2,
        ..JournalConfig::default()
    };
    let wal = Wal::open(journal_dir.path(), config).await.unwrap();

    for i in 0..5u8 {
        wal.append(WalOp::Write, &format!("f{i}.txt"), Some(&[b'0' + i]))
            .await
            .unwrap();
        // Keep both cursors at the head so segments rotate as they fill.
        wal.drain(CursorKind::ObjectStore, &Sink).await.unwrap();
        wal.drain(CursorKind::VersionControl, &Sink).await.unwrap();
    }

    let stats = wal.replay(rebuilt.path()).await.unwrap();
    assert_eq!(stats.applied, 5);
    for i in 0..5u8 {
        assert_eq!(
            fs::read(rebuilt.path().join(format!("f{i}.txt"))).unwrap(),
            vec![b'0' + i]
        );
    }
}

#[tokio::test]
async fn corrupted_record_is_skipped_not_fatal() {
    let journal_dir = TempDir::new().unwrap();
    let rebuilt = TempDir::new().unwrap();
    let wal = Wal::open(journal_dir.path(), JournalConfig::default())
        .await
        .unwrap();
    wal.append(WalOp::Write, "good.txt", Some(b"ok")).await.unwrap();
    wal.append(WalOp::Write, "bad.txt", Some(b"tampered")).await.unwrap();
    wal.append(WalOp::Write, "tail.txt", Some(b"ok")).await.unwrap();
    drop(wal);

    // Corrupt the middle record's payload on disk, keeping valid JSON.
    let segment = journal_dir.path().join(keel_journal::ACTIVE_SEGMENT);
    let raw = fs::read_to_string(&segment).unwrap();
    let patched: Vec<String> = raw
        .lines()
        .map(|line| {
            if line.contains("bad.txt") {
                let mut record: serde_json::Value = serde_json::from_str(line).unwrap();
                record["data"] = serde_json::Value::String("dGFtcGVyZWQt".to_string());
                serde_json::to_string(&record).unwrap()
            } else {
                line.to_string()
            }
        })
        .collect();
    fs::write(&segment, patched.join("\n") + "\n").unwrap();

    let wal = Wal::open(journal_dir.path(), JournalConfig::default())
        .await
        .unwrap();
    let stats = wal.replay(rebuilt.path()).await.unwrap();
    assert_eq!(stats.applied, 2);
    assert_eq!(stats.checksum_skipped, 1);
    assert!(rebuilt.path().join("good.txt").exists());
    assert!(!rebuilt.path().join("bad.txt").exists());
    assert!(rebuilt.path().join("tail.txt").exists());
}

#[tokio::test]
async fn replay_is_idempotent() {
    let journal_dir = TempDir::new().unwrap();
    let rebuilt = TempDir::new().unwrap();
    let wal = Wal::open(journal_dir.path(), JournalConfig::default())
        .await
        .unwrap();
    wal.append(WalOp::Mkdir, "d", None).await.unwrap();
    wal.append(WalOp::Write, "d/x.txt", Some(b"x")).await.unwrap();
    wal.append(WalOp::Delete, "never-existed.txt", None).await.unwrap();

    let first = wal.replay(rebuilt.path()).await.unwrap();
    let second = wal.replay(rebuilt.path()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read(rebuilt.path().join("d/x.txt")).unwrap(), b"x");
}

#[tokio::test]
async fn drained_records_match_written_payloads() {
    struct Capture(Mutex<Vec<(u64, String)>>);

    #[async_trait::async_trait]
    impl SyncTarget for Capture {
        fn name(&self) -> &str {
            "capture"
        }
        async fn apply(&self, record: &WalRecord) -> Result<(), SyncTargetError> {
            self.0.lock().unwrap().push((record.seq, record.path.clone()));
            Ok(())
        }
    }

    let journal_dir = TempDir::new().unwrap();
    let wal = Wal::open(journal_dir.path(), JournalConfig::default())
        .await
        .unwrap();
    wal.append(WalOp::Write, "one", Some(b"1")).await.unwrap();
    wal.append(WalOp::Write, "two", Some(b"2")).await.unwrap();

    let capture = Capture(Mutex::new(Vec::new()));
    let stats = wal.drain(CursorKind::ObjectStore, &capture).await.unwrap();
    assert_eq!(stats.applied, 2);
    assert_eq!(
        *capture.0.lock().unwrap(),
        vec![(1, "one".to_string()), (2, "two".to_string())]
    );

    // A second drain has nothing left.
    let again = wal.drain(CursorKind::ObjectStore, &capture).await.unwrap();
    assert_eq!(again.applied, 0);
}
