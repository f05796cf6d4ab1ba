//! Workspace scanning
//!
//! Walks the workspace with the `ignore` crate (so `.gitignore` files are
//! honoured even outside a git repository), skips the store directory, and
//! hashes every regular file in parallel.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use datezip::scanner::Scanner;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let state = Scanner::new(PathBuf::from("./project"))
//!     .with_excluded_dir(PathBuf::from("./project/.datezip"))
//!     .with_ignore_patterns(vec!["target/".to_string()])
//!     .scan()?;
//! println!("{} files, {} bytes", state.len(), state.total_size());
//! # Ok(())
//! # }
//! ```

use crate::error::{DatezipError, Result};
use crate::utils::normalize_rel_path;
use ignore::{overrides::OverrideBuilder, WalkBuilder, WalkState};
use parking_lot::Mutex;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// A regular file found in the workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Absolute (or root-joined) location
    pub path: PathBuf,
    /// SHA-256 of the content, hex encoded
    pub hash: String,
    /// Content length
    pub size: u64,
}

/// Current workspace content keyed by manifest path
///
/// Paths the walker saw but could not read are kept apart in `unreadable`;
/// they still exist, their content is just unknown to this scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceState {
    files: BTreeMap<String, ScannedFile>,
    unreadable: BTreeSet<String>,
}

impl WorkspaceState {
    /// File at manifest path `path`
    pub fn get(&self, path: &str) -> Option<&ScannedFile> {
        self.files.get(path)
    }

    /// Whether `path` exists in the workspace
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Files in path order
    pub fn iter(&self) -> btree_map::Iter<'_, String, ScannedFile> {
        self.files.iter()
    }

    /// Number of files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the workspace has no files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Whether `path` exists but could not be read
    ///
    /// Also true for anything below an unreadable directory.
    pub fn is_unreadable(&self, path: &str) -> bool {
        self.unreadable.iter().any(|p| {
            path == p || (path.starts_with(p.as_str()) && path.as_bytes().get(p.len()) == Some(&b'/'))
        })
    }

    /// Paths that exist but could not be read
    pub fn unreadable(&self) -> impl Iterator<Item = &str> {
        self.unreadable.iter().map(String::as_str)
    }

    /// Treat `path` as present but unreadable
    pub(crate) fn mark_unreadable(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.files.remove(&path);
        self.unreadable.insert(path);
    }

    /// Summed file size
    pub fn total_size(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }

    /// Read the current content of `path`
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let file = self
            .files
            .get(path)
            .ok_or_else(|| DatezipError::InvalidPath(path.to_string()))?;
        Ok(fs::read(&file.path)?)
    }
}

/// Workspace walker
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    excluded_dirs: Vec<PathBuf>,
    ignore_patterns: Vec<String>,
    max_file_size: Option<u64>,
    follow_symlinks: bool,
    parallel_workers: usize,
}

impl Scanner {
    /// Scanner over `root` with default settings
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            excluded_dirs: Vec::new(),
            ignore_patterns: Vec::new(),
            max_file_size: None,
            follow_symlinks: false,
            parallel_workers: num_cpus::get(),
        }
    }

    /// Never descend into `dir` (the store directory)
    pub fn with_excluded_dir(mut self, dir: PathBuf) -> Self {
        self.excluded_dirs.push(dir);
        self
    }

    /// Extra ignore patterns in gitignore syntax
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    /// Skip files larger than `size` bytes
    pub fn with_max_file_size(mut self, size: Option<u64>) -> Self {
        self.max_file_size = size;
        self
    }

    /// Follow symbolic links
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Walker threads
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers.max(1);
        self
    }

    /// Walk the workspace and hash every eligible file
    pub fn scan(&self) -> Result<WorkspaceState> {
        let start = Instant::now();
        if !self.root.is_dir() {
            return Err(DatezipError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("workspace {} is not a directory", self.root.display()),
            )));
        }

        let mut walker_builder = WalkBuilder::new(&self.root);
        walker_builder
            .follow_links(self.follow_symlinks)
            .hidden(false)
            .parents(true)
            .ignore(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .threads(self.parallel_workers);

        let excluded = self.excluded_forms();
        walker_builder.filter_entry(move |entry| !excluded.iter().any(|dir| entry.path() == dir));

        if !self.ignore_patterns.is_empty() {
            let mut override_builder = OverrideBuilder::new(&self.root);
            for pattern in &self.ignore_patterns {
                // override globs are whitelists unless negated
                let pattern = pattern.trim_start_matches('!');
                if let Err(e) = override_builder.add(&format!("!{}", pattern)) {
                    warn!("Invalid ignore pattern '{}': {}", pattern, e);
                }
            }
            match override_builder.build() {
                Ok(overrides) => {
                    walker_builder.overrides(overrides);
                }
                Err(e) => warn!("Ignoring custom patterns: {}", e),
            }
        }

        let found = Arc::new(Mutex::new(Vec::<PathBuf>::new()));
        let failed = Arc::new(Mutex::new(Vec::<PathBuf>::new()));
        walker_builder.build_parallel().run(|| {
            let found = Arc::clone(&found);
            let failed = Arc::clone(&failed);
            Box::new(move |entry| {
                match entry {
                    Ok(entry) => {
                        if entry.file_type().is_some_and(|ft| ft.is_file()) {
                            found.lock().push(entry.into_path());
                        }
                    }
                    Err(e) => {
                        warn!("Walk error: {}", e);
                        if let Some(path) = error_path(&e) {
                            failed.lock().push(path.to_path_buf());
                        }
                    }
                }
                WalkState::Continue
            })
        });

        let paths = std::mem::take(&mut *found.lock());
        let scanned: Vec<(PathBuf, Result<Option<(String, ScannedFile)>>)> = paths
            .into_par_iter()
            .map(|path| {
                let entry = self.process_file(&path);
                (path, entry)
            })
            .collect();

        let mut state = WorkspaceState::default();
        for (path, entry) in scanned {
            match entry {
                Ok(Some((rel, file))) => {
                    state.files.insert(rel, file);
                }
                Ok(None) => {}
                // removed between the walk and hashing
                Err(DatezipError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    trace!("{:?} vanished during scan", path);
                }
                Err(e) => {
                    warn!("Cannot read {:?}: {}", path, e);
                    if let Some(rel) = self.rel_path(&path) {
                        state.unreadable.insert(rel);
                    }
                }
            }
        }
        for path in std::mem::take(&mut *failed.lock()) {
            if let Some(rel) = self.rel_path(&path) {
                state.unreadable.insert(rel);
            }
        }

        debug!(
            "Scanned {} files ({} bytes, {} unreadable) in {:?}",
            state.len(),
            state.total_size(),
            state.unreadable.len(),
            start.elapsed()
        );
        Ok(state)
    }

    /// Excluded directories as the walker will spell them
    fn excluded_forms(&self) -> Vec<PathBuf> {
        let root = canonical_or_self(self.root.clone());
        let mut forms = Vec::new();
        for dir in &self.excluded_dirs {
            let canonical = canonical_or_self(dir.clone());
            if let Ok(rel) = canonical.strip_prefix(&root) {
                forms.push(self.root.join(rel));
            }
            forms.push(canonical);
            forms.push(dir.clone());
        }
        forms
    }

    /// Manifest path of `path`, `None` for the root itself or outside it
    fn rel_path(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        normalize_rel_path(rel).ok().filter(|rel| !rel.is_empty())
    }

    fn process_file(&self, path: &Path) -> Result<Option<(String, ScannedFile)>> {
        let rel = path
            .strip_prefix(&self.root)
            .map_err(|_| DatezipError::InvalidPath(path.to_string_lossy().to_string()))?;
        let rel = normalize_rel_path(rel)?;

        let metadata = fs::metadata(path)?;
        if let Some(limit) = self.max_file_size {
            if metadata.len() > limit {
                trace!("Skipping {} ({} bytes over limit)", rel, metadata.len());
                return Ok(None);
            }
        }

        let (hash, size) = hash_file(path)?;
        Ok(Some((
            rel,
            ScannedFile {
                path: path.to_path_buf(),
                hash,
                size,
            },
        )))
    }
}

/// Stream a file through SHA-256
pub fn hash_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}

/// Path a walk error refers to, if it names one
fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => error_path(err),
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        _ => None,
    }
}

fn canonical_or_self(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}
