//! Integration tests for datezip
//!
//! Multi-archive scenarios: chains with deletions, both restore types,
//! retention, writer contention and damaged stores.

use ::datezip::lock::StoreLock;
use ::datezip::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Test harness with a workspace, a separate store and a manual clock
pub struct DatezipTestHarness {
    pub temp_dir: TempDir,
    pub storage_dir: TempDir,
    pub datezip: Datezip,
    clock: Timestamp,
}

impl DatezipTestHarness {
    /// Harness over a fresh filesystem store
    pub fn new() -> Self {
        Self::with_builder(DatezipBuilder::new().compression_strategy(CompressionStrategy::Fast))
    }

    /// Harness over a fresh store built by `builder`
    pub fn with_builder(builder: DatezipBuilder) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let storage_dir = TempDir::new().unwrap();
        let datezip = builder
            .build(temp_dir.path().to_path_buf(), storage_dir.path().join("store"))
            .unwrap();

        Self {
            temp_dir,
            storage_dir,
            datezip,
            clock: "20240216_140000".parse().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write(&self, path: &str, content: &str) {
        let full = self.root().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    pub fn read(&self, path: &str) -> String {
        fs::read_to_string(self.root().join(path)).unwrap()
    }

    pub fn remove(&self, path: &str) {
        fs::remove_file(self.root().join(path)).unwrap();
    }

    /// Back up one minute after the previous backup
    pub fn backup(&mut self, mode: BackupMode) -> BackupReport {
        self.clock = self.clock.plus_seconds(60);
        self.datezip.create_backup_at(mode, self.clock).unwrap()
    }

    /// Back up `days` days after the previous backup
    pub fn backup_after_days(&mut self, mode: BackupMode, days: i64) -> BackupReport {
        self.clock = self.clock.plus_seconds(days * 86_400);
        self.datezip.create_backup_at(mode, self.clock).unwrap()
    }

    pub fn now(&self) -> Timestamp {
        self.clock
    }

    pub fn history_lines(&self, query: &HistoryQuery) -> Vec<String> {
        self.datezip
            .get_history(query)
            .unwrap()
            .iter()
            .map(|e| e.to_string())
            .collect()
    }
}

/// Read every file below `dir` into a path to content map
pub fn read_tree(dir: &Path) -> BTreeMap<String, String> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(dir).unwrap().to_string_lossy().replace('\\', "/");
            (rel, fs::read_to_string(e.path()).unwrap())
        })
        .collect()
}

#[test]
fn test_two_archive_scenario() {
    let mut h = DatezipTestHarness::new();

    h.write("a.txt", "1");
    let t1 = h.backup(BackupMode::Auto).archive;
    assert_eq!(t1.kind, ArchiveKind::Full);

    h.write("a.txt", "2");
    h.write("b.txt", "x");
    let t2 = h.backup(BackupMode::Auto).archive;
    assert_eq!(t2.kind, ArchiveKind::Incremental);

    let listed: Vec<ArchiveKind> = h.datezip.list_backups().unwrap().iter().map(|a| a.kind).collect();
    assert_eq!(listed, [ArchiveKind::Full, ArchiveKind::Incremental]);

    assert_eq!(
        h.history_lines(&HistoryQuery::new()),
        [
            format!("{}  +  a.txt", t1.timestamp),
            format!("{}  .  a.txt", t2.timestamp),
            format!("{}  +  b.txt", t2.timestamp),
        ]
    );
    assert_eq!(
        h.history_lines(&HistoryQuery::new().files(["b.txt"])),
        [format!("{}  +  b.txt", t2.timestamp)]
    );

    // e at T1 brings back the first content
    h.datezip.restore(&RestoreRequest::new(t1.timestamp)).unwrap();
    assert_eq!(h.read("a.txt"), "1");

    // j at T2 is just the incremental's own content
    let dest = TempDir::new().unwrap();
    h.datezip
        .restore(
            &RestoreRequest::new(t2.timestamp)
                .restore_type(RestoreType::Just)
                .destination(dest.path()),
        )
        .unwrap();
    assert_eq!(
        read_tree(dest.path()),
        BTreeMap::from([("a.txt".to_string(), "2".to_string()), ("b.txt".to_string(), "x".to_string())])
    );

    let err = h.datezip.historical_content(t1.timestamp, "b.txt").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileNotInArchive);
    assert_eq!(h.datezip.historical_content(t2.timestamp, "b.txt").unwrap(), "x");
}

#[test]
fn test_deletion_then_recreation() {
    let mut h = DatezipTestHarness::new();

    h.write("src/lib.rs", "v1");
    h.write("src/main.rs", "main");
    let t1 = h.backup(BackupMode::Full).archive.timestamp;

    h.remove("src/lib.rs");
    let deletion = h.backup(BackupMode::Auto);
    assert_eq!(deletion.files_deleted, 1);
    let t2 = deletion.archive.timestamp;

    h.write("src/lib.rs", "v1");
    let t3 = h.backup(BackupMode::Auto).archive.timestamp;

    // Recreated after a deletion counts as new again
    assert_eq!(
        h.history_lines(&HistoryQuery::new().files(["src/lib.rs"])),
        [format!("{}  +  src/lib.rs", t1), format!("{}  +  src/lib.rs", t3)]
    );

    // The intermediate state honours the deletion
    let dest = TempDir::new().unwrap();
    h.datezip
        .restore(&RestoreRequest::new(t2).destination(dest.path()))
        .unwrap();
    assert_eq!(
        read_tree(dest.path()),
        BTreeMap::from([("src/main.rs".to_string(), "main".to_string())])
    );
    let err = h.datezip.read_file_at(t2, "src/lib.rs").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileNotInArchive);
}

#[test]
fn test_partial_restore_reports_every_missing_path() {
    let mut h = DatezipTestHarness::new();
    h.write("a.txt", "a");
    let t1 = h.backup(BackupMode::Full).archive.timestamp;

    h.write("a.txt", "changed");
    let err = h
        .datezip
        .restore(&RestoreRequest::new(t1).files(["a.txt", "x.txt", "y.txt"]))
        .unwrap_err();
    match err {
        DatezipError::FileNotInArchive { paths, .. } => assert_eq!(paths, ["x.txt", "y.txt"]),
        other => panic!("unexpected error: {}", other),
    }
    // Nothing was written
    assert_eq!(h.read("a.txt"), "changed");
}

#[test]
fn test_auto_policy_starts_new_chain() {
    let mut h = DatezipTestHarness::with_builder(DatezipBuilder::new().auto_policy(AutoPolicy {
        max_incrementals: 2,
        max_full_age_days: 7,
        max_incremental_ratio: 100.0,
    }));

    let mut kinds = Vec::new();
    for i in 0..5 {
        h.write("counter.txt", &i.to_string());
        kinds.push(h.backup(BackupMode::Auto).archive.kind);
    }
    assert_eq!(
        kinds,
        [
            ArchiveKind::Full,
            ArchiveKind::Incremental,
            ArchiveKind::Incremental,
            ArchiveKind::Full,
            ArchiveKind::Incremental,
        ]
    );

    // An old FULL forces a new chain too
    h.write("counter.txt", "late");
    let report = h.backup_after_days(BackupMode::Auto, 8);
    assert_eq!(report.archive.kind, ArchiveKind::Full);
    assert_eq!(h.datezip.index().unwrap().chain_count(), 3);
}

#[test]
fn test_cleanup_keeps_newest_restorable_chain() {
    let mut h = DatezipTestHarness::new();

    for day in 0..3 {
        h.write("a.txt", &format!("day {}", day));
        h.backup_after_days(BackupMode::Full, 1);
        h.write("b.txt", &format!("inc {}", day));
        h.backup(BackupMode::Inc);
    }
    assert_eq!(h.datezip.list_backups().unwrap().len(), 6);

    let report = h
        .datezip
        .cleanup_at(
            &RetentionPolicy {
                keep_full: 1,
                keep_days: 0,
            },
            h.now(),
        )
        .unwrap();
    assert_eq!(report.removed.len(), 4);
    assert_eq!(report.chains_removed, 2);
    assert_eq!(report.chains_kept, 1);

    let remaining = h.datezip.list_backups().unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0].kind, ArchiveKind::Full);

    // The surviving chain still restores end to end
    let dest = TempDir::new().unwrap();
    h.datezip
        .restore(&RestoreRequest::new(remaining[1].timestamp).destination(dest.path()))
        .unwrap();
    assert_eq!(
        read_tree(dest.path()),
        BTreeMap::from([
            ("a.txt".to_string(), "day 2".to_string()),
            ("b.txt".to_string(), "inc 2".to_string()),
        ])
    );

    // Removed timestamps are gone for good
    let err = h
        .datezip
        .restore(&RestoreRequest::new(report.removed[0].timestamp))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimestampNotFound);
}

#[test]
fn test_writer_lock_contention() {
    let mut h = DatezipTestHarness::with_builder(DatezipBuilder::new().lock_wait(Duration::ZERO));
    h.write("a.txt", "a");
    h.backup(BackupMode::Full);

    let held = StoreLock::try_acquire(h.datezip.store_root()).unwrap();

    let err = h.datezip.create_backup(BackupMode::Auto).unwrap_err();
    assert!(matches!(err, DatezipError::Locked));
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);

    let err = h.datezip.cleanup(&RetentionPolicy::default()).unwrap_err();
    assert!(matches!(err, DatezipError::Locked));

    // Readers never wait for writers
    assert_eq!(h.datezip.list_backups().unwrap().len(), 1);
    assert_eq!(h.datezip.get_history(&HistoryQuery::new()).unwrap().len(), 1);

    drop(held);
    h.write("a.txt", "b");
    assert_eq!(h.backup(BackupMode::Auto).archive.kind, ArchiveKind::Incremental);
}

#[test]
fn test_failed_write_publishes_nothing() {
    let backend = Arc::new(MemoryBackend::new());
    let mut h = DatezipTestHarness::with_builder(DatezipBuilder::new().backend(backend.clone()));

    h.write("a.txt", "a");
    let first = h.backup(BackupMode::Full);
    let head_before = h.datezip.head();

    h.write("a.txt", "b");
    backend.fail_next_writes(1);
    let err = h
        .datezip
        .create_backup_at(BackupMode::Auto, h.now().plus_seconds(60))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteFailed);

    assert_eq!(backend.len(), 1);
    assert_eq!(h.datezip.head(), head_before);
    assert_eq!(h.datezip.list_backups().unwrap(), [first.archive]);

    // The next attempt succeeds and links to the surviving head
    let retry = h.backup(BackupMode::Auto);
    assert_eq!(retry.archive.kind, ArchiveKind::Incremental);
    assert_eq!(backend.len(), 2);
}

#[test]
fn test_corrupted_archive_is_reported() {
    let backend = Arc::new(MemoryBackend::new());
    let mut h = DatezipTestHarness::with_builder(DatezipBuilder::new().backend(backend.clone()));

    h.write("a.txt", "a");
    let full = h.backup(BackupMode::Full).archive;
    h.write("a.txt", "b");
    let inc = h.backup(BackupMode::Auto).archive;

    backend.overwrite_raw(&full.id(), b"definitely not an archive".to_vec());

    let err = h.datezip.get_history(&HistoryQuery::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);

    // Folding through the damaged FULL fails, the incremental alone still reads
    let err = h.datezip.restore(&RestoreRequest::new(inc.timestamp)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    let dest = TempDir::new().unwrap();
    h.datezip
        .restore(
            &RestoreRequest::new(inc.timestamp)
                .restore_type(RestoreType::Just)
                .destination(dest.path()),
        )
        .unwrap();
    assert_eq!(read_tree(dest.path())["a.txt"], "b");
}

#[test]
fn test_concurrent_readers_during_backups() {
    let mut h = DatezipTestHarness::new();
    h.write("a.txt", "0");
    let first = h.backup(BackupMode::Full).archive.timestamp;

    let datezip = Arc::new(h.datezip);
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let datezip = Arc::clone(&datezip);
            std::thread::spawn(move || {
                for _ in 0..20 {
                    assert_eq!(datezip.historical_content(first, "a.txt").unwrap(), "0");
                    assert!(!datezip.list_backups().unwrap().is_empty());
                }
            })
        })
        .collect();

    let mut rng = StdRng::seed_from_u64(7);
    for i in 0..10 {
        fs::write(h.temp_dir.path().join("a.txt"), rng.random_range(0..1000u32).to_string()).unwrap();
        datezip
            .create_backup_at(BackupMode::Auto, first.plus_seconds(60 * (i + 1)))
            .unwrap();
    }

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(datezip.list_backups().unwrap().len(), 11);
}

#[test]
fn test_history_readable_during_cleanup() {
    let mut h = DatezipTestHarness::new();
    for chain in 0..30 {
        for step in 0..4 {
            h.write("a.txt", &format!("{}-{}", chain, step));
            h.write(&format!("chain_{}.txt", chain), "x");
            let mode = if step == 0 { BackupMode::Full } else { BackupMode::Inc };
            h.backup(mode);
        }
    }
    let cleanup_at = h.now();

    let datezip = Arc::new(h.datezip);
    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let datezip = Arc::clone(&datezip);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut runs = 0;
            while !done.load(Ordering::SeqCst) || runs == 0 {
                let history = datezip.get_history(&HistoryQuery::new());
                assert!(history.is_ok(), "history failed during cleanup: {:?}", history.err());
                runs += 1;
            }
            runs
        })
    };

    let policy = RetentionPolicy {
        keep_full: 1,
        keep_days: 0,
    };
    let report = datezip.cleanup_at(&policy, cleanup_at).unwrap();
    done.store(true, Ordering::SeqCst);
    assert!(reader.join().unwrap() > 0);

    assert_eq!(report.removed.len(), 116);
    let history = datezip.get_history(&HistoryQuery::new()).unwrap();
    assert!(history.iter().all(|e| e.timestamp >= report.removed.last().unwrap().timestamp));
}
