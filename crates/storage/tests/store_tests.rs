use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use saveguard_core::{decode_backup_name, BackupRecord, BackupTrigger};
use saveguard_storage::{BackupEvent, BackupStore, EventSink, StoreConfig, StoreError};
use tempfile::TempDir;

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn save(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn backup_dir(&self) -> PathBuf {
        self.dir.path().join("Backups")
    }

    fn config(&self) -> StoreConfig {
        StoreConfig {
            backup_dir: self.backup_dir(),
            compress: false,
            max_backups_per_file: 100,
            cooldown: Duration::from_secs(60),
        }
    }

    fn store(&self) -> BackupStore {
        BackupStore::new(self.config())
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<BackupEvent>>);

impl EventSink for RecordingSink {
    fn emit(&self, event: &BackupEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

impl RecordingSink {
    fn events(&self) -> Vec<BackupEvent> {
        self.0.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn create_copies_source_into_backup_dir() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Amazon.d2s", &[1u8; 6000]);
    let store = sandbox.store();

    let outcome = store
        .create(&source, BackupTrigger::ManualSingle)
        .await
        .unwrap();

    let record = &outcome.record;
    assert_eq!(record.original_name, "Amazon.d2s");
    assert_eq!(record.size_bytes, 6000);
    assert!(!record.compressed);

    let decoded = decode_backup_name(&record.backup_name).unwrap();
    assert_eq!(decoded.original_name, "Amazon.d2s");
    assert_eq!(decoded.timestamp, record.timestamp);

    let stored = fs::read(sandbox.backup_dir().join(&record.backup_name)).unwrap();
    assert_eq!(stored, vec![1u8; 6000]);
}

#[tokio::test]
async fn create_of_missing_source_fails_with_started_and_failed_events() {
    let sandbox = Sandbox::new();
    let sink = Arc::new(RecordingSink::default());
    let store = BackupStore::with_sink(sandbox.config(), sink.clone());

    let missing = sandbox.dir.path().join("Ghost.d2s");
    let err = store
        .create(&missing, BackupTrigger::ManualSingle)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SourceNotFound(_)));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], BackupEvent::Started { .. }));
    assert!(matches!(events[1], BackupEvent::Failed { .. }));
    assert!(store.list_all().await.is_empty());
}

#[tokio::test]
async fn compressed_create_writes_single_entry_zip() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Sorc.d2s", b"sorceress bytes");
    let store = BackupStore::new(StoreConfig {
        compress: true,
        ..sandbox.config()
    });

    let outcome = store
        .create(&source, BackupTrigger::ManualSingle)
        .await
        .unwrap();
    let record = &outcome.record;
    assert!(record.compressed);
    assert!(record.backup_name.ends_with(".d2s.zip"));
    assert_eq!(record.size_bytes, b"sorceress bytes".len() as i64);

    let archive = File::open(sandbox.backup_dir().join(&record.backup_name)).unwrap();
    let mut zip = zip::ZipArchive::new(archive).unwrap();
    assert_eq!(zip.len(), 1);
    let mut entry = zip.by_index(0).unwrap();
    assert_eq!(entry.name(), "Sorc.d2s");
    let mut content = Vec::new();
    std::io::Read::read_to_end(&mut entry, &mut content).unwrap();
    assert_eq!(content, b"sorceress bytes");
}

#[tokio::test]
async fn listing_reports_logical_size_for_compressed_backups() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Pally.d2s", &[9u8; 4096]);
    let store = BackupStore::new(StoreConfig {
        compress: true,
        ..sandbox.config()
    });
    store
        .create(&source, BackupTrigger::ManualSingle)
        .await
        .unwrap();

    let records = store.list_for("Pally.d2s").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].size_bytes, 4096);
}

#[tokio::test]
async fn retention_keeps_only_the_newest_backups() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Amazon.d2s", b"v1");
    let store = BackupStore::new(StoreConfig {
        max_backups_per_file: 3,
        ..sandbox.config()
    });

    let mut names = Vec::new();
    for round in 0..5u8 {
        fs::write(&source, [round; 16]).unwrap();
        let outcome = store
            .create(&source, BackupTrigger::ManualSingle)
            .await
            .unwrap();
        names.push(outcome.record.backup_name.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let records = store.list_for("Amazon.d2s").await;
    assert_eq!(records.len(), 3);

    let kept: Vec<&String> = records.iter().map(|r| &r.backup_name).collect();
    assert!(kept.contains(&&names[4]));
    assert!(kept.contains(&&names[3]));
    assert!(kept.contains(&&names[2]));
    assert!(!sandbox.backup_dir().join(&names[0]).exists());
    assert!(!sandbox.backup_dir().join(&names[1]).exists());
}

#[tokio::test]
async fn same_second_backups_get_distinct_names() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Druid.d2s", b"shapeshifter");
    let store = sandbox.store();

    let first = store
        .create(&source, BackupTrigger::ManualSingle)
        .await
        .unwrap();
    let second = store
        .create(&source, BackupTrigger::ManualSingle)
        .await
        .unwrap();

    assert_ne!(first.record.backup_name, second.record.backup_name);
    assert_eq!(store.list_for("Druid.d2s").await.len(), 2);
}

#[tokio::test]
async fn cooldown_gates_automatic_triggers_only() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Amazon.d2s", b"content");
    let other = sandbox.save("Sorc.d2s", b"content");
    let store = sandbox.store();

    assert!(store.can_create(&source, BackupTrigger::DangerThreshold));
    store
        .create(&source, BackupTrigger::DangerThreshold)
        .await
        .unwrap();

    // Inside the 60s window: automatic refused, manual allowed, and an
    // untouched file is unaffected.
    assert!(!store.can_create(&source, BackupTrigger::DangerThreshold));
    assert!(!store.can_create(&source, BackupTrigger::PeriodicAutomatic));
    assert!(store.can_create(&source, BackupTrigger::ManualSingle));
    assert!(store.can_create(&source, BackupTrigger::ManualBulk));
    assert!(store.can_create(&other, BackupTrigger::DangerThreshold));
}

#[tokio::test]
async fn failed_create_does_not_start_a_cooldown() {
    let sandbox = Sandbox::new();
    let missing = sandbox.dir.path().join("Ghost.d2s");
    let store = sandbox.store();

    let _ = store.create(&missing, BackupTrigger::DangerThreshold).await;
    assert!(store.can_create(&missing, BackupTrigger::DangerThreshold));
}

#[tokio::test]
async fn restore_takes_a_pre_restore_backup_first() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Amazon.d2s", b"good state");
    let store = sandbox.store();

    let backup = store
        .create(&source, BackupTrigger::ManualSingle)
        .await
        .unwrap()
        .record;

    fs::write(&source, b"corrupted state").unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let outcome = store.restore(&backup, &source, true).await.unwrap();
    assert_eq!(fs::read(&source).unwrap(), b"good state");

    let pre = outcome.pre_restore.expect("pre-restore backup expected");
    let snapshot = fs::read(sandbox.backup_dir().join(&pre.backup_name)).unwrap();
    assert_eq!(snapshot, b"corrupted state");

    // Both the original backup and the safety copy are listed.
    assert_eq!(store.list_for("Amazon.d2s").await.len(), 2);
}

#[tokio::test]
async fn restore_without_pre_backup_leaves_no_extra_records() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Amazon.d2s", b"good state");
    let store = sandbox.store();

    let backup = store
        .create(&source, BackupTrigger::ManualSingle)
        .await
        .unwrap()
        .record;
    fs::write(&source, b"bad state").unwrap();

    let outcome = store.restore(&backup, &source, false).await.unwrap();
    assert!(outcome.pre_restore.is_none());
    assert_eq!(fs::read(&source).unwrap(), b"good state");
    assert_eq!(store.list_for("Amazon.d2s").await.len(), 1);
}

#[tokio::test]
async fn restore_of_compressed_backup_decompresses() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Sorc.d2s", &[42u8; 2048]);
    let store = BackupStore::new(StoreConfig {
        compress: true,
        ..sandbox.config()
    });

    let backup = store
        .create(&source, BackupTrigger::ManualSingle)
        .await
        .unwrap()
        .record;
    fs::write(&source, b"overwritten").unwrap();

    store.restore(&backup, &source, false).await.unwrap();
    assert_eq!(fs::read(&source).unwrap(), vec![42u8; 2048]);
}

#[tokio::test]
async fn restore_with_missing_backup_fails_without_touching_target() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Amazon.d2s", b"precious");
    let store = sandbox.store();

    let phantom = BackupRecord {
        original_name: "Amazon.d2s".to_owned(),
        backup_name: "Amazon.d2s_20200101_000000.d2s".to_owned(),
        timestamp: chrono::NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        size_bytes: 8,
        compressed: false,
    };

    let err = store.restore(&phantom, &source, true).await.unwrap_err();
    assert!(matches!(err, StoreError::BackupNotFound(_)));
    assert_eq!(fs::read(&source).unwrap(), b"precious");
    assert!(store.list_for("Amazon.d2s").await.is_empty());
}

#[tokio::test]
async fn delete_reports_whether_a_file_was_removed() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Amazon.d2s", b"content");
    let store = sandbox.store();

    let record = store
        .create(&source, BackupTrigger::ManualSingle)
        .await
        .unwrap()
        .record;

    assert!(store.delete(&record).await.unwrap());
    assert!(!sandbox.backup_dir().join(&record.backup_name).exists());
    assert!(!store.delete(&record).await.unwrap());
}

#[tokio::test]
async fn listing_is_idempotent_and_skips_undecodable_names() {
    let sandbox = Sandbox::new();
    let amazon = sandbox.save("Amazon.d2s", b"a");
    let sorc = sandbox.save("Sorc.d2s", b"s");
    let store = sandbox.store();

    store
        .create(&amazon, BackupTrigger::ManualSingle)
        .await
        .unwrap();
    store
        .create(&sorc, BackupTrigger::ManualSingle)
        .await
        .unwrap();

    fs::write(sandbox.backup_dir().join("notes.txt"), b"junk").unwrap();
    fs::write(
        sandbox.backup_dir().join("Amazon.d2s_2025_0828.d2s"),
        b"junk",
    )
    .unwrap();

    let first = store.list_all().await;
    let second = store.list_all().await;
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[tokio::test]
async fn listing_survives_a_missing_backup_directory() {
    let sandbox = Sandbox::new();
    let store = sandbox.store();
    assert!(store.list_all().await.is_empty());
}

#[tokio::test]
async fn concurrent_creates_for_distinct_files_both_succeed() {
    let sandbox = Sandbox::new();
    let amazon = sandbox.save("Amazon.d2s", b"a");
    let sorc = sandbox.save("Sorc.d2s", b"s");
    let store = Arc::new(sandbox.store());

    let a = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.create(&amazon, BackupTrigger::ManualBulk).await })
    };
    let b = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.create(&sorc, BackupTrigger::ManualBulk).await })
    };

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();
    assert_eq!(store.list_all().await.len(), 2);
}

#[tokio::test]
async fn concurrent_creates_for_the_same_file_serialize_cleanly() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Amazon.d2s", b"content");
    let store = Arc::new(sandbox.store());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        let source = source.clone();
        handles.push(tokio::spawn(async move {
            store.create(&source, BackupTrigger::ManualBulk).await
        }));
    }

    let mut names = Vec::new();
    for handle in handles {
        names.push(handle.await.unwrap().unwrap().record.backup_name);
    }
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 4, "each create must pick a distinct name");
}

#[tokio::test]
async fn bulk_create_reports_progress_in_order() {
    let sandbox = Sandbox::new();
    let amazon = sandbox.save("Amazon.d2s", b"a");
    let sorc = sandbox.save("Sorc.d2s", b"s");
    let sink = Arc::new(RecordingSink::default());
    let store = BackupStore::with_sink(sandbox.config(), sink.clone());

    let results = store
        .create_bulk(&[amazon, sorc], BackupTrigger::ManualBulk)
        .await;
    assert!(results.iter().all(|r| r.is_ok()));

    let events = sink.events();
    let progress: Vec<(usize, usize, String)> = events
        .iter()
        .filter_map(|e| match e {
            BackupEvent::Progress {
                current,
                total,
                current_file,
            } => Some((*current, *total, current_file.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        progress,
        vec![
            (1, 2, "Amazon.d2s".to_owned()),
            (2, 2, "Sorc.d2s".to_owned()),
        ]
    );

    // Progress for an item precedes its started/completed pair.
    assert!(matches!(events[0], BackupEvent::Progress { current: 1, .. }));
    assert!(matches!(events[1], BackupEvent::Started { .. }));
    assert!(matches!(events[2], BackupEvent::Completed { .. }));
    assert!(matches!(events[3], BackupEvent::Progress { current: 2, .. }));
}

#[tokio::test]
async fn pre_restore_backups_count_toward_retention() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Amazon.d2s", b"v1");
    let store = BackupStore::new(StoreConfig {
        max_backups_per_file: 2,
        ..sandbox.config()
    });

    let backup = store
        .create(&source, BackupTrigger::ManualSingle)
        .await
        .unwrap()
        .record;

    for round in 0..3u8 {
        fs::write(&source, [round; 8]).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.restore(&backup, &source, true).await.unwrap();
    }

    assert!(store.list_for("Amazon.d2s").await.len() <= 2);
}

fn sorted_names(records: &[BackupRecord]) -> Vec<String> {
    records.iter().map(|r| r.backup_name.clone()).collect()
}

#[tokio::test]
async fn listing_is_newest_first() {
    let sandbox = Sandbox::new();
    let source = sandbox.save("Amazon.d2s", b"x");
    let store = sandbox.store();

    for _ in 0..3 {
        store
            .create(&source, BackupTrigger::ManualSingle)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let records = store.list_for("Amazon.d2s").await;
    let mut resorted = records.clone();
    resorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    assert_eq!(sorted_names(&records), sorted_names(&resorted));
}
