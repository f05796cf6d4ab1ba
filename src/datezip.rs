//! Main Datezip implementation
//!
//! [`Datezip`] ties the engines together for one workspace and one store. It
//! owns the store configuration, the archive backend and the active chain head,
//! and serializes writers through the store lock.
//!
//! ## Locking
//!
//! Backups and cleanups hold the exclusive store lock for their whole run.
//! History, listing and restores never take it: archives are published
//! atomically, so readers see the store either before or after a write.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use datezip::{BackupMode, Datezip, HistoryQuery, RestoreRequest};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let datezip = Datezip::init(PathBuf::from("./project"), PathBuf::from("./project/.datezip"))?;
//!
//! let first = datezip.create_backup(BackupMode::Full)?;
//! let second = datezip.create_backup(BackupMode::Auto)?;
//!
//! for entry in datezip.get_history(&HistoryQuery::new())? {
//!     println!("{}", entry);
//! }
//!
//! datezip.restore(&RestoreRequest::new(first.archive.timestamp))?;
//! # let _ = second;
//! # Ok(())
//! # }
//! ```

use crate::backend::{ArchiveBackend, FsBackend};
use crate::chain::{ChainIndex, IndexStats};
use crate::compression::CompressionStrategy;
use crate::error::{DatezipError, Result};
use crate::history::compute_history;
use crate::lock::StoreLock;
use crate::restore::{RestoreEngine, RestoreSettings};
use crate::retention::{execute_cleanup, plan_cleanup};
use crate::scanner::Scanner;
use crate::snapshot::{next_timestamp, SnapshotEngine};
use crate::types::*;
use crate::utils::CancelFlag;
use crate::utils::{self, normalize_request_path};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, instrument};

/// Store metadata file name
pub const METADATA_FILE: &str = "datezip.json";

/// Default store directory inside the workspace
pub const DEFAULT_STORE_DIR: &str = ".datezip";

const FORMAT_VERSION: u32 = 1;

/// Backup and restore engine for one workspace
///
/// `Datezip` is `Send + Sync`; share it behind an `Arc` to run reads from
/// several threads while a backup is in progress.
pub struct Datezip {
    /// Workspace being backed up
    root: PathBuf,
    /// Store directory (metadata and lock, and archives for the fs backend)
    store_root: PathBuf,
    /// Effective configuration
    config: StoreConfig,
    /// Archive storage
    backend: Arc<dyn ArchiveBackend>,
    /// Active chain head
    head: RwLock<Option<HeadState>>,
}

impl std::fmt::Debug for Datezip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datezip")
            .field("root", &self.root)
            .field("store_root", &self.store_root)
            .field("config", &self.config)
            .field("head", &*self.head.read())
            .finish()
    }
}

/// Snapshot of store health for `status` output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatus {
    /// Workspace root
    pub workspace: PathBuf,
    /// Store directory
    pub store: PathBuf,
    /// Archive, chain and orphan counts
    pub archives: usize,
    /// Number of chains
    pub chains: usize,
    /// Archives that belong to no chain
    pub orphans: usize,
    /// Summed archive size
    pub archive_bytes: u64,
    /// Everything under the store directory
    pub store_bytes: u64,
    /// Active chain head
    pub head: Option<HeadState>,
    /// Newest archive, orphans included
    pub newest: Option<ArchiveInfo>,
}

impl Datezip {
    /// Initialize a new store with the default configuration
    ///
    /// Fails if `store_root` already holds a store.
    pub fn init(root: PathBuf, store_root: PathBuf) -> Result<Self> {
        DatezipBuilder::new().init(root, store_root)
    }

    /// Open an existing store using its persisted configuration
    pub fn open(root: PathBuf, store_root: PathBuf) -> Result<Self> {
        DatezipBuilder::new().open(root, store_root)
    }

    /// Builder for custom configuration
    pub fn builder() -> DatezipBuilder {
        DatezipBuilder::new()
    }

    /// Whether `store_root` holds an initialized store
    pub fn is_initialized(store_root: &Path) -> bool {
        store_root.join(METADATA_FILE).is_file()
    }

    fn assemble(
        root: PathBuf,
        store_root: PathBuf,
        config: StoreConfig,
        backend: Option<Arc<dyn ArchiveBackend>>,
    ) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn ArchiveBackend> = match backend {
            Some(backend) => backend,
            None => Arc::new(FsBackend::new(&store_root, &config)),
        };
        let index = ChainIndex::build(backend.list()?);
        let head = index.head_state();
        debug!("Loaded head state {:?}", head);

        Ok(Self {
            root,
            store_root,
            config,
            backend,
            head: RwLock::new(head),
        })
    }

    /// Workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store directory
    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    /// Effective configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Archive backend
    pub fn backend(&self) -> &dyn ArchiveBackend {
        self.backend.as_ref()
    }

    /// Active chain head as last loaded or advanced
    pub fn head(&self) -> Option<HeadState> {
        *self.head.read()
    }

    /// Fresh chain index from the backend listing
    pub fn index(&self) -> Result<ChainIndex> {
        Ok(ChainIndex::build(self.backend.list()?))
    }

    fn scanner(&self) -> Scanner {
        Scanner::new(self.root.clone())
            .with_excluded_dir(self.store_root.clone())
            .with_ignore_patterns(self.config.ignore_patterns.clone())
            .with_max_file_size(self.config.max_file_size)
            .with_follow_symlinks(self.config.follow_symlinks)
            .with_parallel_workers(self.config.parallel_workers)
    }

    fn restore_settings(&self) -> RestoreSettings {
        RestoreSettings {
            workspace_root: self.root.clone(),
            store_root: self.store_root.clone(),
            ignore_patterns: self.config.ignore_patterns.clone(),
            write_retries: self.config.write_retries,
            retry_backoff: self.config.retry_backoff(),
        }
    }

    /// Back up the workspace now
    ///
    /// The archive timestamp is the current UTC second, bumped past the newest
    /// archive when needed.
    #[instrument(skip(self))]
    pub fn create_backup(&self, mode: BackupMode) -> Result<BackupReport> {
        self.backup_locked(mode, None, &CancelFlag::new())
    }

    /// [`Datezip::create_backup`] that gives up once `cancel` is raised
    ///
    /// A cancelled backup fails with [`DatezipError::Cancelled`] and publishes
    /// nothing. Cancellation raised after publishing has no effect.
    #[instrument(skip(self, cancel))]
    pub fn create_backup_cancellable(&self, mode: BackupMode, cancel: &CancelFlag) -> Result<BackupReport> {
        self.backup_locked(mode, None, cancel)
    }

    /// Back up the workspace under an explicit timestamp
    ///
    /// Fails with [`DatezipError::InvalidTimestamp`] unless `timestamp` is
    /// later than every archive in the store.
    #[instrument(skip(self))]
    pub fn create_backup_at(&self, mode: BackupMode, timestamp: Timestamp) -> Result<BackupReport> {
        self.backup_locked(mode, Some(timestamp), &CancelFlag::new())
    }

    fn backup_locked(&self, mode: BackupMode, at: Option<Timestamp>, cancel: &CancelFlag) -> Result<BackupReport> {
        info!("Creating {} backup of {:?}", mode, self.root);
        cancel.check("create_backup")?;
        let _lock = StoreLock::acquire(&self.store_root, self.config.lock_wait())?;

        let index = self.index()?;
        *self.head.write() = index.head_state();
        let at = at.unwrap_or_else(|| next_timestamp(&index, Timestamp::now()));

        cancel.check("create_backup")?;
        let workspace = self.scanner().scan()?;
        let report = SnapshotEngine::new(self.backend.as_ref(), self.config.auto)
            .with_cancel(cancel.clone())
            .create(mode, &workspace, &index, at)?;

        let mut head = self.head.write();
        *head = Some(match (report.archive.kind, *head) {
            (ArchiveKind::Incremental, Some(prev)) => HeadState {
                full: prev.full,
                head: report.archive.id(),
                incrementals: prev.incrementals + 1,
            },
            _ => HeadState {
                full: report.archive.timestamp,
                head: report.archive.id(),
                incrementals: 0,
            },
        });
        Ok(report)
    }

    /// Stored archives, oldest first
    pub fn list_backups(&self) -> Result<Vec<ArchiveInfo>> {
        self.backend.list()
    }

    /// Change history filtered by `query`
    #[instrument(skip(self))]
    pub fn get_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>> {
        let index = self.index()?;
        compute_history(self.backend.as_ref(), &index, query)
    }

    /// Materialize the state at `request.timestamp`
    ///
    /// Without a destination this writes into the workspace itself.
    #[instrument(skip(self))]
    pub fn restore(&self, request: &RestoreRequest) -> Result<RestoreResult> {
        self.restore_cancellable(request, &CancelFlag::new())
    }

    /// [`Datezip::restore`] that writes nothing once `cancel` is raised before
    /// the write phase
    #[instrument(skip(self, cancel))]
    pub fn restore_cancellable(&self, request: &RestoreRequest, cancel: &CancelFlag) -> Result<RestoreResult> {
        info!("Restoring {} ({})", request.timestamp, request.restore_type);
        let index = self.index()?;
        let settings = self.restore_settings();
        RestoreEngine::new(self.backend.as_ref(), &settings)
            .with_cancel(cancel.clone())
            .restore(&index, request)
    }

    /// Content of `path` as of `timestamp`
    ///
    /// Restores into a scratch directory owned by this call, which is removed
    /// on every exit path. The workspace is never touched.
    #[instrument(skip(self))]
    pub fn read_file_at(&self, timestamp: Timestamp, path: &str) -> Result<Vec<u8>> {
        let path = normalize_request_path(path)?;
        let scratch = TempDir::new()?;
        let request = RestoreRequest::new(timestamp)
            .files([path.clone()])
            .destination(scratch.path());
        self.restore(&request)?;
        Ok(fs::read(utils::safe_join(scratch.path(), &path)?)?)
    }

    /// [`Datezip::read_file_at`] decoded as text (lossy for non-UTF-8)
    pub fn historical_content(&self, timestamp: Timestamp, path: &str) -> Result<String> {
        let bytes = self.read_file_at(timestamp, path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Apply `policy` relative to the current time
    #[instrument(skip(self))]
    pub fn cleanup(&self, policy: &RetentionPolicy) -> Result<CleanupReport> {
        self.cleanup_at(policy, Timestamp::now())
    }

    /// Apply `policy` as if the current time were `now`
    pub fn cleanup_at(&self, policy: &RetentionPolicy, now: Timestamp) -> Result<CleanupReport> {
        self.cleanup_locked(policy, now, &CancelFlag::new())
    }

    /// [`Datezip::cleanup`] that removes nothing once `cancel` is raised
    /// before removal starts
    #[instrument(skip(self, cancel))]
    pub fn cleanup_cancellable(&self, policy: &RetentionPolicy, cancel: &CancelFlag) -> Result<CleanupReport> {
        self.cleanup_locked(policy, Timestamp::now(), cancel)
    }

    fn cleanup_locked(&self, policy: &RetentionPolicy, now: Timestamp, cancel: &CancelFlag) -> Result<CleanupReport> {
        let start = Instant::now();
        cancel.check("cleanup_backups")?;
        let _lock = StoreLock::acquire(&self.store_root, self.config.lock_wait())?;
        let index = self.index()?;
        let plan = plan_cleanup(&index, policy, now);
        cancel.check("cleanup_backups")?;
        let report = execute_cleanup(self.backend.as_ref(), &plan)?;
        info!(
            "Cleanup kept {} chains, removed {} archives in {:?}",
            report.chains_kept,
            report.removed.len(),
            start.elapsed()
        );
        Ok(report)
    }

    /// Store health summary
    pub fn status(&self) -> Result<StoreStatus> {
        let index = self.index()?;
        let IndexStats {
            archives,
            chains,
            orphans,
            total_bytes,
        } = index.stats();
        Ok(StoreStatus {
            workspace: self.root.clone(),
            store: self.store_root.clone(),
            archives,
            chains,
            orphans,
            archive_bytes: total_bytes,
            store_bytes: utils::dir_size(&self.store_root),
            head: index.head_state(),
            newest: index.newest().cloned(),
        })
    }
}

/// Builder for [`Datezip`] with custom configuration
///
/// Settings apply to a new store and are persisted in `datezip.json`. When
/// opening an existing store they override the persisted values for this
/// instance only; archive naming always comes from the store.
///
/// # Examples
///
/// ```rust,no_run
/// use datezip::{DatezipBuilder, RetentionPolicy};
/// use std::path::PathBuf;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let datezip = DatezipBuilder::new()
///     .ignore_patterns(vec!["target/".to_string(), "*.log".to_string()])
///     .retention(RetentionPolicy { keep_full: 3, keep_days: 30 })
///     .build(PathBuf::from("./project"), PathBuf::from("./project/.datezip"))?;
/// # let _ = datezip;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct DatezipBuilder {
    naming: Option<ArchiveNaming>,
    compression: Option<CompressionStrategy>,
    auto: Option<AutoPolicy>,
    retention: Option<RetentionPolicy>,
    ignore_patterns: Option<Vec<String>>,
    max_file_size: Option<Option<u64>>,
    follow_symlinks: Option<bool>,
    parallel_workers: Option<usize>,
    lock_wait: Option<Duration>,
    write_retries: Option<u32>,
    operation_timeout: Option<Duration>,
    backend: Option<Arc<dyn ArchiveBackend>>,
}

impl std::fmt::Debug for DatezipBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatezipBuilder")
            .field("naming", &self.naming)
            .field("compression", &self.compression)
            .field("auto", &self.auto)
            .field("retention", &self.retention)
            .field("backend", &self.backend.is_some())
            .finish_non_exhaustive()
    }
}

impl DatezipBuilder {
    /// Builder with nothing overridden
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive file prefix and extension (new stores only)
    pub fn naming(mut self, prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        self.naming = Some(ArchiveNaming {
            prefix: prefix.into(),
            extension: extension.into(),
        });
        self
    }

    /// Section compression for new archives
    pub fn compression_strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.compression = Some(strategy);
        self
    }

    /// Thresholds for [`BackupMode::Auto`]
    pub fn auto_policy(mut self, policy: AutoPolicy) -> Self {
        self.auto = Some(policy);
        self
    }

    /// Default retention for callers that do not pass one
    pub fn retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = Some(policy);
        self
    }

    /// Extra ignore patterns, gitignore syntax
    ///
    /// The store directory is always excluded.
    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = Some(patterns);
        self
    }

    /// Skip files larger than `size` bytes; `None` for no limit
    pub fn max_file_size(mut self, size: Option<u64>) -> Self {
        self.max_file_size = Some(size);
        self
    }

    /// Follow symbolic links while scanning
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = Some(follow);
        self
    }

    /// Scanner threads (minimum 1)
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.parallel_workers = Some(count.max(1));
        self
    }

    /// How long writers wait for the store lock; zero fails fast
    pub fn lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = Some(wait);
        self
    }

    /// Attempts per published file (minimum 1)
    pub fn write_retries(mut self, attempts: u32) -> Self {
        self.write_retries = Some(attempts.max(1));
        self
    }

    /// Budget for one tool-surface operation
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Use `backend` for archives instead of files in the store directory
    pub fn backend(mut self, backend: Arc<dyn ArchiveBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    fn apply(&self, config: &mut StoreConfig) {
        if let Some(compression) = &self.compression {
            config.compression = compression.clone();
        }
        if let Some(auto) = self.auto {
            config.auto = auto;
        }
        if let Some(retention) = self.retention {
            config.retention = retention;
        }
        if let Some(patterns) = &self.ignore_patterns {
            config.ignore_patterns = patterns.clone();
        }
        if let Some(size) = self.max_file_size {
            config.max_file_size = size;
        }
        if let Some(follow) = self.follow_symlinks {
            config.follow_symlinks = follow;
        }
        if let Some(workers) = self.parallel_workers {
            config.parallel_workers = workers;
        }
        if let Some(wait) = self.lock_wait {
            config.lock_wait_ms = wait.as_millis() as u64;
        }
        if let Some(attempts) = self.write_retries {
            config.write_retries = attempts;
        }
        if let Some(timeout) = self.operation_timeout {
            config.operation_timeout_ms = timeout.as_millis() as u64;
        }
    }

    /// Create a new store at `store_root` for workspace `root`
    #[instrument(skip(self))]
    pub fn init(self, root: PathBuf, store_root: PathBuf) -> Result<Datezip> {
        info!("Initializing datezip store at {:?}", store_root);
        if !root.is_dir() {
            return Err(DatezipError::InvalidPath(format!(
                "workspace {} is not a directory",
                root.display()
            )));
        }
        if Datezip::is_initialized(&store_root) {
            return Err(DatezipError::InvalidConfiguration(format!(
                "store {} is already initialized",
                store_root.display()
            )));
        }

        let mut config = StoreConfig::default();
        if let Some(naming) = &self.naming {
            config.naming = naming.clone();
        }
        self.apply(&mut config);
        config.validate()?;

        fs::create_dir_all(&store_root)?;
        let metadata = StoreMetadata {
            format_version: FORMAT_VERSION,
            created_at: Utc::now(),
            config: config.clone(),
        };
        let json = serde_json::to_vec_pretty(&metadata)?;
        utils::atomic_write(&store_root.join(METADATA_FILE), &json)?;

        Datezip::assemble(root, store_root, config, self.backend)
    }

    /// Open the existing store at `store_root`
    #[instrument(skip(self))]
    pub fn open(self, root: PathBuf, store_root: PathBuf) -> Result<Datezip> {
        debug!("Opening datezip store at {:?}", store_root);
        let path = store_root.join(METADATA_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DatezipError::unavailable(&store_root, "not a datezip store"));
            }
            Err(e) => return Err(DatezipError::unavailable(&store_root, e.to_string())),
        };
        let metadata: StoreMetadata = serde_json::from_slice(&bytes)
            .map_err(|e| DatezipError::unavailable(&store_root, format!("corrupt {}: {}", METADATA_FILE, e)))?;
        if metadata.format_version != FORMAT_VERSION {
            return Err(DatezipError::unavailable(
                &store_root,
                format!("unsupported store format {}", metadata.format_version),
            ));
        }
        if !root.is_dir() {
            return Err(DatezipError::InvalidPath(format!(
                "workspace {} is not a directory",
                root.display()
            )));
        }

        let mut config = metadata.config;
        self.apply(&mut config);
        Datezip::assemble(root, store_root, config, self.backend)
    }

    /// Open the store if it exists, otherwise initialize it
    pub fn build(self, root: PathBuf, store_root: PathBuf) -> Result<Datezip> {
        if Datezip::is_initialized(&store_root) {
            self.open(root, store_root)
        } else {
            self.init(root, store_root)
        }
    }
}
