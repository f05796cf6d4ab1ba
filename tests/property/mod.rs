//! Property-based testing for datezip
//!
//! Uses proptest to check store invariants over random sequences of
//! workspace states and backup modes.

use ::datezip::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Workspace contents: path to bytes
type State = BTreeMap<String, Vec<u8>>;

/// Paths never collide as file and directory
const PATHS: &[&str] = &["a.txt", "b.txt", "src/lib.rs", "src/main.rs", "docs/guide.md"];

fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[a-z0-9 \n]{0,64}".prop_map(|s| s.into_bytes()),
        prop::collection::vec(any::<u8>(), 0..256),
    ]
}

fn state_strategy() -> impl Strategy<Value = State> {
    prop::collection::btree_map(
        prop::sample::select(PATHS).prop_map(str::to_string),
        content_strategy(),
        0..=PATHS.len(),
    )
}

fn mode_strategy() -> impl Strategy<Value = BackupMode> {
    prop_oneof![Just(BackupMode::Auto), Just(BackupMode::Full), Just(BackupMode::Inc)]
}

/// Make the workspace hold exactly `state`
fn apply_state(root: &Path, state: &State) {
    for path in PATHS {
        let full = root.join(path);
        if !state.contains_key(*path) && full.exists() {
            fs::remove_file(full).unwrap();
        }
    }
    for (path, content) in state {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
}

fn read_state(root: &Path) -> State {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

/// Store with one archive per state; returns each backup with the state it captured
fn record(states: &[State], modes: &[BackupMode]) -> (TempDir, TempDir, Datezip, Vec<(BackupReport, State)>) {
    let temp_dir = TempDir::new().unwrap();
    let storage_dir = TempDir::new().unwrap();
    let datezip = DatezipBuilder::new()
        .compression_strategy(CompressionStrategy::Fast)
        .build(temp_dir.path().to_path_buf(), storage_dir.path().join("store"))
        .unwrap();

    let start: Timestamp = "20240301_090000".parse().unwrap();
    let mut recorded = Vec::new();
    for (i, state) in states.iter().enumerate() {
        apply_state(temp_dir.path(), state);
        // the first backup has no chain to extend
        let mode = if i == 0 { BackupMode::Auto } else { modes[i % modes.len()] };
        let at = start.plus_seconds(60 * i as i64);
        let report = datezip.create_backup_at(mode, at).unwrap();
        recorded.push((report, state.clone()));
    }
    (temp_dir, storage_dir, datezip, recorded)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Restoring any archive with `e` reproduces the workspace it captured
    #[test]
    fn backup_restore_identity(
        states in prop::collection::vec(state_strategy(), 1..6),
        modes in prop::collection::vec(mode_strategy(), 1..4),
    ) {
        let (_temp_dir, _storage_dir, datezip, recorded) = record(&states, &modes);

        for (report, state) in &recorded {
            let dest = TempDir::new().unwrap();
            datezip
                .restore(&RestoreRequest::new(report.archive.timestamp).destination(dest.path()))
                .unwrap();
            prop_assert_eq!(&read_state(dest.path()), state);
        }
    }

    /// `j` output is exactly the archive's own changes
    #[test]
    fn just_restore_is_archive_local(
        states in prop::collection::vec(state_strategy(), 2..6),
        modes in prop::collection::vec(mode_strategy(), 1..4),
    ) {
        let (_temp_dir, _storage_dir, datezip, recorded) = record(&states, &modes);

        let mut previous = State::new();
        for (report, state) in &recorded {
            let expected: State = match report.archive.kind {
                ArchiveKind::Full => state.clone(),
                ArchiveKind::Incremental => state
                    .iter()
                    .filter(|(path, content)| previous.get(*path) != Some(*content))
                    .map(|(path, content)| (path.clone(), content.clone()))
                    .collect(),
            };

            let dest = TempDir::new().unwrap();
            datezip
                .restore(
                    &RestoreRequest::new(report.archive.timestamp)
                        .restore_type(RestoreType::Just)
                        .destination(dest.path()),
                )
                .unwrap();
            prop_assert_eq!(read_state(dest.path()), expected);
            previous = state.clone();
        }
    }

    /// Every chain opens with a FULL archive and timestamps strictly increase
    #[test]
    fn chains_are_well_formed(
        states in prop::collection::vec(state_strategy(), 1..8),
        modes in prop::collection::vec(mode_strategy(), 1..4),
    ) {
        let (_temp_dir, _storage_dir, datezip, recorded) = record(&states, &modes);

        let listed = datezip.list_backups().unwrap();
        prop_assert_eq!(listed.len(), recorded.len());
        prop_assert!(listed.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        let index = datezip.index().unwrap();
        prop_assert_eq!(index.orphans().count(), 0);
        let fulls = listed.iter().filter(|a| a.kind == ArchiveKind::Full).count();
        prop_assert_eq!(index.chain_count(), fulls);
        for chain in index.chains() {
            prop_assert_eq!(chain.full().kind, ArchiveKind::Full);
            prop_assert!(chain.archives().skip(1).all(|a| a.kind == ArchiveKind::Incremental));
        }

        // An incremental always links to the archive written just before it
        let mut newest: Option<Timestamp> = None;
        for (report, _) in &recorded {
            match report.archive.kind {
                ArchiveKind::Full => prop_assert_eq!(report.predecessor, None),
                ArchiveKind::Incremental => prop_assert_eq!(report.predecessor, newest),
            }
            newest = Some(report.archive.timestamp);
        }
    }

    /// Filtering the history equals filtering the full history
    #[test]
    fn history_filters_commute(
        states in prop::collection::vec(state_strategy(), 1..6),
        modes in prop::collection::vec(mode_strategy(), 1..4),
        files in prop::collection::btree_set(prop::sample::select(PATHS).prop_map(str::to_string), 0..3),
        from in 0i64..6,
        span in 0i64..6,
    ) {
        let (_temp_dir, _storage_dir, datezip, _recorded) = record(&states, &modes);

        let start: Timestamp = "20240301_090000".parse().unwrap();
        let mut query = HistoryQuery::new()
            .from(start.plus_seconds(60 * from))
            .to(start.plus_seconds(60 * (from + span)));
        if !files.is_empty() {
            query = query.files(files);
        }

        let everything = datezip.get_history(&HistoryQuery::new()).unwrap();
        let filtered = datezip.get_history(&query).unwrap();
        let expected: Vec<HistoryEntry> = everything.into_iter().filter(|e| query.matches(e)).collect();
        prop_assert_eq!(filtered, expected);
    }
}
