//! Main test module for datezip
//!
//! This module includes all test suites:
//! - Integration tests for multi-archive scenarios
//! - Property-based tests for invariants

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::datezip::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir, Datezip) {
        let temp_dir = TempDir::new().unwrap();
        let storage_dir = TempDir::new().unwrap();
        let datezip = DatezipBuilder::new()
            .build(temp_dir.path().to_path_buf(), storage_dir.path().join("store"))
            .unwrap();
        (temp_dir, storage_dir, datezip)
    }

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_directory() {
        let (temp_dir, _storage_dir, datezip) = setup();

        let report = datezip.create_backup_at(BackupMode::Full, ts("20240101_000000")).unwrap();
        assert_eq!(report.files_stored, 0);

        fs::write(temp_dir.path().join("file.txt"), "content").unwrap();

        // Pruning restore of an empty state removes the new file
        let result = datezip
            .restore(&RestoreRequest::new(report.archive.timestamp).prune(true))
            .unwrap();
        assert_eq!(result.files_restored, 0);
        assert_eq!(result.files_removed, 1);
        assert!(!temp_dir.path().join("file.txt").exists());
    }

    #[test]
    fn test_special_filenames() {
        let (temp_dir, _storage_dir, datezip) = setup();

        let names = ["with space.txt", "ünïcödé.md", "dash-and_underscore.rs", "nested dir/a b.txt"];
        for name in names {
            let path = temp_dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, name).unwrap();
        }

        let report = datezip.create_backup_at(BackupMode::Full, ts("20240101_000000")).unwrap();
        assert_eq!(report.files_stored, names.len());

        for name in names {
            let content = datezip.historical_content(report.archive.timestamp, name).unwrap();
            assert_eq!(content, name);
        }
    }

    #[test]
    fn test_deleted_directory_is_recreated() {
        let (temp_dir, _storage_dir, datezip) = setup();

        let deep = temp_dir.path().join("a/b/c");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("leaf.txt"), "leaf").unwrap();

        let first = datezip.create_backup_at(BackupMode::Full, ts("20240101_000000")).unwrap();
        fs::remove_dir_all(temp_dir.path().join("a")).unwrap();

        let second = datezip.create_backup_at(BackupMode::Auto, ts("20240101_000100")).unwrap();
        assert_eq!(second.archive.kind, ArchiveKind::Incremental);
        assert_eq!(second.files_deleted, 1);

        datezip.restore(&RestoreRequest::new(first.archive.timestamp)).unwrap();
        assert_eq!(fs::read_to_string(deep.join("leaf.txt")).unwrap(), "leaf");
    }

    #[test]
    fn test_ignore_patterns_are_not_archived() {
        let temp_dir = TempDir::new().unwrap();
        let storage_dir = TempDir::new().unwrap();
        let datezip = DatezipBuilder::new()
            .ignore_patterns(vec!["*.log".to_string(), "target/".to_string()])
            .build(temp_dir.path().to_path_buf(), storage_dir.path().join("store"))
            .unwrap();

        fs::write(temp_dir.path().join("keep.rs"), "fn main() {}").unwrap();
        fs::write(temp_dir.path().join("debug.log"), "noise").unwrap();
        fs::create_dir_all(temp_dir.path().join("target")).unwrap();
        fs::write(temp_dir.path().join("target/out.bin"), "binary").unwrap();

        let report = datezip.create_backup_at(BackupMode::Full, ts("20240101_000000")).unwrap();
        assert_eq!(report.files_stored, 1);

        let err = datezip
            .read_file_at(report.archive.timestamp, "debug.log")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotInArchive);
    }

    #[test]
    fn test_store_inside_workspace_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let datezip = Datezip::init(root.clone(), root.join(DEFAULT_STORE_DIR)).unwrap();

        fs::write(root.join("a.txt"), "a").unwrap();
        let first = datezip.create_backup_at(BackupMode::Full, ts("20240101_000000")).unwrap();
        assert_eq!(first.files_stored, 1);

        // The first archive now lives in the workspace; it must not show up as a change
        let second = datezip.create_backup_at(BackupMode::Auto, ts("20240101_000100")).unwrap();
        assert_eq!(second.files_stored, 0);
        assert_eq!(second.files_deleted, 0);
    }

    #[test]
    fn test_empty_store_reads() {
        let (_temp_dir, _storage_dir, datezip) = setup();

        assert!(datezip.list_backups().unwrap().is_empty());
        assert!(datezip.get_history(&HistoryQuery::new()).unwrap().is_empty());

        let err = datezip
            .restore(&RestoreRequest::new(ts("20240101_000000")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimestampNotFound);

        let err = datezip.create_backup(BackupMode::Inc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoActiveChain);
    }

    #[test]
    fn test_paths_escaping_the_workspace_are_rejected() {
        let (temp_dir, _storage_dir, datezip) = setup();
        fs::write(temp_dir.path().join("a.txt"), "a").unwrap();
        let report = datezip.create_backup_at(BackupMode::Full, ts("20240101_000000")).unwrap();

        for bad in ["../a.txt", "/etc/passwd", ""] {
            let err = datezip
                .restore(&RestoreRequest::new(report.archive.timestamp).files([bad]))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "accepted {:?}", bad);
        }

        // Equivalent spellings resolve to the same manifest path
        let content = datezip.historical_content(report.archive.timestamp, "./a.txt").unwrap();
        assert_eq!(content, "a");
    }

    #[test]
    fn test_open_requires_initialized_store() {
        let temp_dir = TempDir::new().unwrap();
        let err = Datezip::open(temp_dir.path().to_path_buf(), temp_dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }

    #[test]
    fn test_binary_content_round_trips() {
        let (temp_dir, _storage_dir, datezip) = setup();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        fs::write(temp_dir.path().join("blob.bin"), &data).unwrap();

        let report = datezip.create_backup_at(BackupMode::Full, ts("20240101_000000")).unwrap();
        assert_eq!(datezip.read_file_at(report.archive.timestamp, "blob.bin").unwrap(), data);
    }
}
