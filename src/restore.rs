//! Restore Engine
//!
//! Resolves a timestamp to exactly one archive, composes the effective file
//! set, and materializes it into a destination directory.
//!
//! - `e` folds manifests from the chain's FULL archive forward to the target.
//!   Content entries overwrite, deletion markers remove.
//! - `j` uses the target archive's own manifest and nothing else.
//!
//! Content is pulled from whichever archive last wrote each path, loading each
//! archive at most once.

use crate::archive::ArchiveHeader;
use crate::backend::ArchiveBackend;
use crate::chain::ChainIndex;
use crate::error::{DatezipError, Result};
use crate::scanner::Scanner;
use crate::types::{ArchiveInfo, ManifestEntry, RestoreRequest, RestoreResult, RestoreType, Timestamp};
use crate::utils::{normalize_request_path, remove_empty_parents, safe_join, write_with_retry, CancelFlag};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where a path's effective content lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// Archive holding the content
    pub source: Timestamp,
    /// Content hash
    pub hash: String,
    /// Content length
    pub size: u64,
}

/// Effective path set at a timestamp
pub type ResolvedState = BTreeMap<String, ResolvedFile>;

/// Load the headers along `path`, checking that predecessor links agree
pub fn load_chain_headers(backend: &dyn ArchiveBackend, path: &[&ArchiveInfo]) -> Result<Vec<ArchiveHeader>> {
    let mut headers: Vec<ArchiveHeader> = Vec::with_capacity(path.len());
    for info in path {
        let header = backend.read_header(&info.id())?;
        if header.id != info.id() {
            return Err(DatezipError::invalid_archive(
                info.file_name.as_str(),
                format!("header says {}", header.id),
            ));
        }
        let expected = headers.last().map(|h| h.id.timestamp);
        if header.predecessor != expected {
            return Err(DatezipError::broken_chain(format!(
                "{} expects predecessor {:?}, chain has {:?}",
                info.file_name,
                header.predecessor.map(|t| t.to_string()),
                expected.map(|t| t.to_string())
            )));
        }
        headers.push(header);
    }
    Ok(headers)
}

/// Fold manifests in order: content overwrites, deletions remove
pub fn fold_manifests<'a, I>(headers: I) -> ResolvedState
where
    I: IntoIterator<Item = &'a ArchiveHeader>,
{
    let mut state = ResolvedState::new();
    for header in headers {
        for (path, entry) in header.manifest.iter() {
            match entry {
                ManifestEntry::Content { hash, size } => {
                    state.insert(
                        path.clone(),
                        ResolvedFile {
                            source: header.id.timestamp,
                            hash: hash.clone(),
                            size: *size,
                        },
                    );
                }
                ManifestEntry::Deleted => {
                    state.remove(path);
                }
            }
        }
    }
    state
}

/// Effective state at `timestamp` for the given restore type
pub fn resolve_state(
    backend: &dyn ArchiveBackend,
    index: &ChainIndex,
    timestamp: Timestamp,
    restore_type: RestoreType,
) -> Result<ResolvedState> {
    match restore_type {
        RestoreType::Everything => {
            let path = index.fold_path(timestamp)?;
            let headers = load_chain_headers(backend, &path)?;
            Ok(fold_manifests(&headers))
        }
        RestoreType::Just => {
            let info = index.resolve(timestamp)?;
            let header = backend.read_header(&info.id())?;
            Ok(fold_manifests([&header]))
        }
    }
}

/// Keep only `files`, failing with every missing path at once
pub fn select_files(state: ResolvedState, files: &[String], timestamp: Timestamp) -> Result<ResolvedState> {
    let wanted: BTreeSet<String> = files
        .iter()
        .map(|f| normalize_request_path(f))
        .collect::<Result<_>>()?;
    let missing: Vec<String> = wanted.iter().filter(|f| !state.contains_key(*f)).cloned().collect();
    if !missing.is_empty() {
        return Err(DatezipError::FileNotInArchive {
            timestamp,
            paths: missing,
        });
    }
    Ok(state.into_iter().filter(|(path, _)| wanted.contains(path)).collect())
}

/// Read the effective content of every resolved path into memory
pub fn collect_contents(backend: &dyn ArchiveBackend, index: &ChainIndex, state: &ResolvedState) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut by_source: BTreeMap<Timestamp, Vec<&str>> = BTreeMap::new();
    for (path, file) in state {
        by_source.entry(file.source).or_default().push(path);
    }

    let mut contents = BTreeMap::new();
    for (source, paths) in by_source {
        let info = index.resolve(source)?;
        let archive = backend.extract(&info.id())?;
        for path in paths {
            let data = archive.content(path).ok_or_else(|| {
                DatezipError::invalid_archive(info.file_name.as_str(), format!("missing content for {}", path))
            })?;
            contents.insert(path.to_string(), data.to_vec());
        }
    }
    Ok(contents)
}

/// Settings the restore engine needs from the store configuration
#[derive(Debug, Clone)]
pub struct RestoreSettings {
    /// Used when the request names no destination
    pub workspace_root: PathBuf,
    /// Never pruned or scanned
    pub store_root: PathBuf,
    /// Scanner ignore patterns, for pruning
    pub ignore_patterns: Vec<String>,
    /// Attempts per written file
    pub write_retries: u32,
    /// Delay between attempts
    pub retry_backoff: Duration,
}

/// Runs restore requests against a backend
pub struct RestoreEngine<'a> {
    backend: &'a dyn ArchiveBackend,
    settings: &'a RestoreSettings,
    cancel: CancelFlag,
}

impl<'a> RestoreEngine<'a> {
    /// Engine over `backend`
    pub fn new(backend: &'a dyn ArchiveBackend, settings: &'a RestoreSettings) -> Self {
        Self {
            backend,
            settings,
            cancel: CancelFlag::new(),
        }
    }

    /// Stop before writing once `cancel` is raised
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve and materialize `request`
    ///
    /// Nothing is written when any requested path is missing, or when the
    /// cancel flag is raised before every content blob is in memory. Once
    /// writing starts the restore runs to completion.
    pub fn restore(&self, index: &ChainIndex, request: &RestoreRequest) -> Result<RestoreResult> {
        let start = Instant::now();
        let timestamp = request.timestamp;
        let destination = request
            .destination
            .clone()
            .unwrap_or_else(|| self.settings.workspace_root.clone());

        let mut state = resolve_state(self.backend, index, timestamp, request.restore_type)?;
        if let Some(files) = &request.files {
            state = select_files(state, files, timestamp)?;
        }
        debug!("Restore {} ({}) resolved {} files", timestamp, request.restore_type, state.len());

        self.cancel.check("restore")?;
        let contents = collect_contents(self.backend, index, &state)?;
        self.cancel.check("restore")?;
        fs::create_dir_all(&destination)?;

        let mut bytes_written = 0u64;
        for (path, data) in &contents {
            let target = safe_join(&destination, path)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            write_with_retry(&target, data, self.settings.write_retries, self.settings.retry_backoff)?;
            bytes_written += data.len() as u64;
        }

        let files_removed = if request.prune && request.files.is_none() {
            self.prune(&destination, &state)?
        } else {
            0
        };

        let result = RestoreResult {
            timestamp,
            restore_type: request.restore_type,
            destination,
            files_restored: contents.len(),
            files_removed,
            bytes_written,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Restored {} files ({} bytes, {} removed) from {} into {}",
            result.files_restored,
            result.bytes_written,
            result.files_removed,
            timestamp,
            result.destination.display()
        );
        Ok(result)
    }

    /// Delete destination files absent from `state`
    fn prune(&self, destination: &Path, state: &ResolvedState) -> Result<usize> {
        let current = Scanner::new(destination.to_path_buf())
            .with_excluded_dir(self.settings.store_root.clone())
            .with_ignore_patterns(self.settings.ignore_patterns.clone())
            .scan()?;

        let mut removed = 0;
        for (path, file) in current.iter() {
            if state.contains_key(path) {
                continue;
            }
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    removed += 1;
                    if let Some(parent) = file.path.parent() {
                        remove_empty_parents(parent, destination);
                    }
                }
                Err(e) => warn!("Could not prune {}: {}", path, e),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Archive;
    use crate::backend::MemoryBackend;
    use tempfile::TempDir;

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    /// FULL {a:1, c:keep} -> INC {a:2, b:x} -> INC {-c, b:y}
    fn sample_store() -> (MemoryBackend, ChainIndex) {
        let backend = MemoryBackend::new();
        backend
            .write_full(
                &Archive::full(ts("20240101_000000"))
                    .add_file("a.txt", b"1".to_vec())
                    .add_file("c.txt", b"keep".to_vec())
                    .build(),
            )
            .unwrap();
        backend
            .write_incremental(
                &Archive::incremental(ts("20240102_000000"), ts("20240101_000000"))
                    .add_file("a.txt", b"2".to_vec())
                    .add_file("b.txt", b"x".to_vec())
                    .build(),
            )
            .unwrap();
        backend
            .write_incremental(
                &Archive::incremental(ts("20240103_000000"), ts("20240102_000000"))
                    .add_file("b.txt", b"y".to_vec())
                    .delete("c.txt")
                    .build(),
            )
            .unwrap();
        let index = ChainIndex::build(backend.list().unwrap());
        (backend, index)
    }

    fn settings(root: &Path) -> RestoreSettings {
        RestoreSettings {
            workspace_root: root.to_path_buf(),
            store_root: root.join(".datezip"),
            ignore_patterns: Vec::new(),
            write_retries: 2,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn read_all(state: &ResolvedState, backend: &MemoryBackend, index: &ChainIndex) -> BTreeMap<String, String> {
        collect_contents(backend, index, state)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k, String::from_utf8(v).unwrap()))
            .collect()
    }

    #[test]
    fn test_fold_honours_deletions() {
        let (backend, index) = sample_store();
        let state = resolve_state(&backend, &index, ts("20240103_000000"), RestoreType::Everything).unwrap();
        let files = read_all(&state, &backend, &index);
        assert_eq!(files.len(), 2);
        assert_eq!(files["a.txt"], "2");
        assert_eq!(files["b.txt"], "y");
        assert_eq!(state["a.txt"].source, ts("20240102_000000"));
    }

    #[test]
    fn test_fold_at_intermediate_timestamp() {
        let (backend, index) = sample_store();
        let state = resolve_state(&backend, &index, ts("20240102_000000"), RestoreType::Everything).unwrap();
        let files = read_all(&state, &backend, &index);
        assert_eq!(files["a.txt"], "2");
        assert_eq!(files["b.txt"], "x");
        assert_eq!(files["c.txt"], "keep");
    }

    #[test]
    fn test_just_mode_uses_single_manifest() {
        let (backend, index) = sample_store();
        let state = resolve_state(&backend, &index, ts("20240103_000000"), RestoreType::Just).unwrap();
        let files = read_all(&state, &backend, &index);
        assert_eq!(files.len(), 1);
        assert_eq!(files["b.txt"], "y");
    }

    #[test]
    fn test_select_reports_every_missing_path() {
        let (backend, index) = sample_store();
        let state = resolve_state(&backend, &index, ts("20240101_000000"), RestoreType::Everything).unwrap();
        let err = select_files(
            state,
            &["a.txt".to_string(), "b.txt".to_string(), "zz.txt".to_string()],
            ts("20240101_000000"),
        )
        .unwrap_err();
        match err {
            DatezipError::FileNotInArchive { paths, .. } => assert_eq!(paths, ["b.txt", "zz.txt"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_broken_link_is_detected() {
        let backend = MemoryBackend::new();
        backend
            .write_full(&Archive::full(ts("20240101_000000")).add_file("a", b"1".to_vec()).build())
            .unwrap();
        // claims a predecessor that is not the previous archive
        backend
            .write_incremental(
                &Archive::incremental(ts("20240102_000000"), ts("20231231_000000"))
                    .add_file("a", b"2".to_vec())
                    .build(),
            )
            .unwrap();
        let index = ChainIndex::build(backend.list().unwrap());
        assert!(matches!(
            resolve_state(&backend, &index, ts("20240102_000000"), RestoreType::Everything),
            Err(DatezipError::BrokenChain(_))
        ));
    }

    #[test]
    fn test_restore_writes_destination_and_prunes() {
        let (backend, index) = sample_store();
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        fs::create_dir_all(dir.path().join("stale/deep")).unwrap();
        fs::write(dir.path().join("stale/deep/old.txt"), "old").unwrap();
        fs::write(dir.path().join("c.txt"), "local").unwrap();

        let engine = RestoreEngine::new(&backend, &settings);
        let result = engine
            .restore(&index, &RestoreRequest::new(ts("20240103_000000")).prune(true))
            .unwrap();

        assert_eq!(result.files_restored, 2);
        assert_eq!(result.files_removed, 2);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "2");
        assert!(!dir.path().join("c.txt").exists());
        assert!(!dir.path().join("stale").exists());
    }

    #[test]
    fn test_restore_missing_file_writes_nothing() {
        let (backend, index) = sample_store();
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        let dest = dir.path().join("out");

        let engine = RestoreEngine::new(&backend, &settings);
        let err = engine
            .restore(
                &index,
                &RestoreRequest::new(ts("20240101_000000"))
                    .files(["a.txt", "b.txt"])
                    .destination(&dest),
            )
            .unwrap_err();
        assert!(matches!(err, DatezipError::FileNotInArchive { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_cancelled_restore_leaves_workspace_alone() {
        let (backend, index) = sample_store();
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        fs::write(dir.path().join("a.txt"), "local").unwrap();
        fs::write(dir.path().join("extra.txt"), "mine").unwrap();

        let cancel = CancelFlag::new();
        cancel.cancel();
        let engine = RestoreEngine::new(&backend, &settings).with_cancel(cancel);
        let err = engine
            .restore(&index, &RestoreRequest::new(ts("20240103_000000")).prune(true))
            .unwrap_err();
        assert!(matches!(err, DatezipError::Cancelled { .. }));
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "local");
        assert!(dir.path().join("extra.txt").exists());
        assert!(!dir.path().join("b.txt").exists());
    }
}
