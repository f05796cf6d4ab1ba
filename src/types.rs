//! Core data types used throughout datezip
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Identity**: `Timestamp`, `ArchiveKind`, `ArchiveId`, `ArchiveNaming` - how archives are named on disk
//! - **Content**: `Manifest`, `ManifestEntry`, `ArchiveMeta` - what an archive records
//! - **Queries and results**: `HistoryQuery`, `HistoryEntry`, `RestoreRequest`, `RestoreResult`,
//!   `BackupReport`, `CleanupReport`
//! - **Configuration**: `StoreConfig`, `AutoPolicy`, `RetentionPolicy`, `StoreMetadata`
//!
//! ## Examples
//!
//! ```rust
//! use datezip::types::{ArchiveId, ArchiveKind, ArchiveNaming, Timestamp};
//!
//! let ts: Timestamp = "20240216_143000".parse().unwrap();
//! let id = ArchiveId::new(ts, ArchiveKind::Full);
//! let naming = ArchiveNaming::default();
//!
//! let name = naming.file_name(&id);
//! assert_eq!(name, "datezip_20240216_143000_FULL.dzip");
//! assert_eq!(naming.parse(&name), Some(id));
//! ```

use crate::compression::CompressionStrategy;
use crate::error::{DatezipError, Result};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Textual timestamp layout shared by file names, history output and requests
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Second-resolution UTC instant, rendered as `YYYYMMDD_HHMMSS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    /// Current UTC time truncated to whole seconds
    pub fn now() -> Self {
        Self(Utc::now().naive_utc().trunc_subsecs(0))
    }

    /// Wrap a UTC datetime, dropping sub-second precision
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.naive_utc().trunc_subsecs(0))
    }

    /// The instant as a UTC datetime
    pub fn to_datetime(&self) -> DateTime<Utc> {
        self.0.and_utc()
    }

    /// Timestamp `secs` seconds later
    pub fn plus_seconds(&self, secs: i64) -> Self {
        Self(self.0 + chrono::Duration::seconds(secs))
    }

    /// Timestamp `days` days earlier
    pub fn minus_days(&self, days: i64) -> Self {
        Self(self.0 - chrono::Duration::days(days))
    }

    /// Elapsed time from `self` until `now` (negative if `self` is later)
    pub fn age_at(&self, now: Timestamp) -> chrono::Duration {
        now.0 - self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl FromStr for Timestamp {
    type Err = DatezipError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        // chrono accepts shorter numeric fields, the on-disk format does not
        if s.len() != 15 || s.as_bytes()[8] != b'_' {
            return Err(DatezipError::InvalidTimestamp(s.to_string()));
        }
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .map(Timestamp)
            .map_err(|_| DatezipError::InvalidTimestamp(s.to_string()))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Archive kind: complete workspace copy or delta against its predecessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ArchiveKind {
    /// Complete workspace copy, head of a chain
    #[serde(rename = "FULL")]
    Full,
    /// Changes since the previous archive in the chain
    #[serde(rename = "INC")]
    Incremental,
}

impl ArchiveKind {
    /// Tag used in file names
    pub fn tag(&self) -> &'static str {
        match self {
            ArchiveKind::Full => "FULL",
            ArchiveKind::Incremental => "INC",
        }
    }

    /// Parse a file-name tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "FULL" => Some(ArchiveKind::Full),
            "INC" => Some(ArchiveKind::Incremental),
            _ => None,
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Identity of an archive within a store
///
/// Ordering is by timestamp first, which is the replay order of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArchiveId {
    /// Creation instant
    pub timestamp: Timestamp,
    /// Full or incremental
    pub kind: ArchiveKind,
}

impl ArchiveId {
    /// Create an archive id
    pub fn new(timestamp: Timestamp, kind: ArchiveKind) -> Self {
        Self { timestamp, kind }
    }

    /// Whether this archive starts a chain
    pub fn is_full(&self) -> bool {
        self.kind == ArchiveKind::Full
    }
}

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.timestamp, self.kind)
    }
}

/// File naming scheme `<prefix>_<timestamp>_<FULL|INC>.<ext>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveNaming {
    /// Leading component of every archive file name
    pub prefix: String,
    /// Extension without the dot
    pub extension: String,
}

impl Default for ArchiveNaming {
    fn default() -> Self {
        Self {
            prefix: "datezip".to_string(),
            extension: "dzip".to_string(),
        }
    }
}

impl ArchiveNaming {
    /// File name for `id`
    pub fn file_name(&self, id: &ArchiveId) -> String {
        format!("{}_{}_{}.{}", self.prefix, id.timestamp, id.kind.tag(), self.extension)
    }

    /// Parse a file name produced by [`ArchiveNaming::file_name`]
    ///
    /// Returns `None` for anything else, including temporary files.
    pub fn parse(&self, file_name: &str) -> Option<ArchiveId> {
        let stem = file_name
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('_')?
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')?;
        let (timestamp, tag) = stem.rsplit_once('_')?;
        let kind = ArchiveKind::from_tag(tag)?;
        let timestamp = timestamp.parse().ok()?;
        Some(ArchiveId::new(timestamp, kind))
    }
}

/// An archive as seen in a store listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    /// File name in the store
    #[serde(rename = "filename")]
    pub file_name: String,
    /// Creation instant
    pub timestamp: Timestamp,
    /// FULL or INC
    #[serde(rename = "type")]
    pub kind: ArchiveKind,
    /// Size of the archive file in bytes
    pub size_bytes: u64,
}

impl ArchiveInfo {
    /// The archive's identity
    pub fn id(&self) -> ArchiveId {
        ArchiveId::new(self.timestamp, self.kind)
    }
}

/// One manifest record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestEntry {
    /// The archive carries this content for the path
    Content {
        /// SHA-256 of the content, hex encoded
        hash: String,
        /// Content length in bytes
        size: u64,
    },
    /// The path was removed since the predecessor
    Deleted,
}

impl ManifestEntry {
    /// Content hash, if this entry carries content
    pub fn hash(&self) -> Option<&str> {
        match self {
            ManifestEntry::Content { hash, .. } => Some(hash),
            ManifestEntry::Deleted => None,
        }
    }
}

/// Path to content mapping recorded by a single archive
///
/// Paths are workspace-relative and `/`-separated. Iteration order is
/// lexicographic, which keeps every derived output deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    /// Empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Record content for `path`
    pub fn insert_content(&mut self, path: impl Into<String>, hash: impl Into<String>, size: u64) {
        self.entries.insert(
            path.into(),
            ManifestEntry::Content {
                hash: hash.into(),
                size,
            },
        );
    }

    /// Record that `path` was deleted
    pub fn mark_deleted(&mut self, path: impl Into<String>) {
        self.entries.insert(path.into(), ManifestEntry::Deleted);
    }

    /// Entry for `path`
    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    /// All entries in path order
    pub fn iter(&self) -> btree_map::Iter<'_, String, ManifestEntry> {
        self.entries.iter()
    }

    /// Entries that carry content
    pub fn contents(&self) -> impl Iterator<Item = (&str, &str, u64)> + '_ {
        self.entries.iter().filter_map(|(path, entry)| match entry {
            ManifestEntry::Content { hash, size } => Some((path.as_str(), hash.as_str(), *size)),
            ManifestEntry::Deleted => None,
        })
    }

    /// Paths marked deleted
    pub fn deletions(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().filter_map(|(path, entry)| match entry {
            ManifestEntry::Deleted => Some(path.as_str()),
            ManifestEntry::Content { .. } => None,
        })
    }

    /// Number of entries, deletions included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, ManifestEntry)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (String, ManifestEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Descriptive data stored alongside a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    /// Host that produced the archive
    pub host: String,
    /// Crate version that wrote the archive
    pub version: String,
    /// Paths with content in this archive
    pub file_count: usize,
    /// Paths marked deleted in this archive
    pub deleted_count: usize,
    /// Uncompressed content bytes carried by this archive
    pub total_size: u64,
}

impl Default for ArchiveMeta {
    fn default() -> Self {
        Self {
            host: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            file_count: 0,
            deleted_count: 0,
            total_size: 0,
        }
    }
}

/// History status of a path at an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// First seen, or seen again after a deletion
    New,
    /// Present before with different content
    Modified,
}

impl ChangeStatus {
    /// One-character marker used in line output: `+` new, `.` modified
    pub fn symbol(&self) -> char {
        match self {
            ChangeStatus::New => '+',
            ChangeStatus::Modified => '.',
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeStatus::New => f.write_str("new"),
            ChangeStatus::Modified => f.write_str("modified"),
        }
    }
}

/// One derived history record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Archive in which the change was observed
    pub timestamp: Timestamp,
    /// New or modified
    pub status: ChangeStatus,
    /// Workspace-relative path
    pub file: String,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}  {}  {}", self.timestamp, self.status.symbol(), self.file)
    }
}

/// Filters for [`crate::Datezip::get_history`]
///
/// All filters are optional; an empty query returns the whole history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Exact paths to keep
    pub files: Option<BTreeSet<String>>,
    /// Inclusive lower bound
    pub from: Option<Timestamp>,
    /// Inclusive upper bound
    pub to: Option<Timestamp>,
}

impl HistoryQuery {
    /// Unfiltered query
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to these paths
    pub fn files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = Some(files.into_iter().map(Into::into).collect());
        self
    }

    /// Inclusive lower bound
    pub fn from(mut self, ts: Timestamp) -> Self {
        self.from = Some(ts);
        self
    }

    /// Inclusive upper bound
    pub fn to(mut self, ts: Timestamp) -> Self {
        self.to = Some(ts);
        self
    }

    /// Whether `entry` passes every filter
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        if let Some(files) = &self.files {
            if !files.contains(&entry.file) {
                return false;
            }
        }
        if self.from.is_some_and(|from| entry.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.timestamp > to) {
            return false;
        }
        true
    }
}

/// How a restore composes archives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RestoreType {
    /// `e`: fold the chain from its FULL archive up to the target
    #[default]
    #[serde(rename = "e")]
    Everything,
    /// `j`: only the target archive's own manifest
    #[serde(rename = "j")]
    Just,
}

impl FromStr for RestoreType {
    type Err = DatezipError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "e" => Ok(RestoreType::Everything),
            "j" => Ok(RestoreType::Just),
            other => Err(DatezipError::InvalidConfiguration(format!(
                "unknown restore type '{}', expected 'e' or 'j'",
                other
            ))),
        }
    }
}

impl fmt::Display for RestoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreType::Everything => f.write_str("e"),
            RestoreType::Just => f.write_str("j"),
        }
    }
}

/// How [`crate::Datezip::create_backup`] chooses the archive kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    /// Let the [`AutoPolicy`] decide
    #[default]
    Auto,
    /// Always start a new chain
    Full,
    /// Always extend the active chain
    Inc,
}

impl FromStr for BackupMode {
    type Err = DatezipError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(BackupMode::Auto),
            "full" => Ok(BackupMode::Full),
            "inc" => Ok(BackupMode::Inc),
            other => Err(DatezipError::InvalidConfiguration(format!(
                "unknown backup mode '{}', expected auto, full or inc",
                other
            ))),
        }
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupMode::Auto => f.write_str("auto"),
            BackupMode::Full => f.write_str("full"),
            BackupMode::Inc => f.write_str("inc"),
        }
    }
}

/// Result of a successful backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupReport {
    /// The archive that was published
    pub archive: ArchiveInfo,
    /// Previous archive in the chain, `None` for FULL
    pub predecessor: Option<Timestamp>,
    /// Paths with content in the archive
    pub files_stored: usize,
    /// Paths marked deleted in the archive
    pub files_deleted: usize,
    /// Uncompressed bytes stored
    pub bytes_stored: u64,
    /// Files in the workspace at snapshot time
    pub workspace_files: usize,
    /// Wall time in milliseconds
    pub duration_ms: u64,
}

/// Parameters for [`crate::Datezip::restore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    /// Exact archive timestamp
    pub timestamp: Timestamp,
    /// Restrict output to these paths
    pub files: Option<Vec<String>>,
    /// Fold the chain or use the single archive
    pub restore_type: RestoreType,
    /// Output directory, defaults to the workspace root
    pub destination: Option<PathBuf>,
    /// Delete workspace files absent from a whole-project restore
    pub prune: bool,
}

impl RestoreRequest {
    /// Whole-project `e` restore into the workspace
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            files: None,
            restore_type: RestoreType::Everything,
            destination: None,
            prune: false,
        }
    }

    /// Restrict to these paths
    pub fn files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = Some(files.into_iter().map(Into::into).collect());
        self
    }

    /// Choose `e` or `j`
    pub fn restore_type(mut self, restore_type: RestoreType) -> Self {
        self.restore_type = restore_type;
        self
    }

    /// Write somewhere other than the workspace
    pub fn destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Remove files the reconstructed state does not contain
    pub fn prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }
}

/// Result of a restore operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResult {
    /// Archive the restore resolved to
    pub timestamp: Timestamp,
    /// Mode used
    pub restore_type: RestoreType,
    /// Directory written
    pub destination: PathBuf,
    /// Files written
    pub files_restored: usize,
    /// Files removed by pruning
    pub files_removed: usize,
    /// Bytes written
    pub bytes_written: u64,
    /// Wall time in milliseconds
    pub duration_ms: u64,
}

/// Count and age limits for [`crate::Datezip::cleanup`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Newest chains kept regardless of age
    pub keep_full: usize,
    /// Older chains are kept while their FULL archive is younger than this
    pub keep_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_full: 10,
            keep_days: 14,
        }
    }
}

/// Result of a cleanup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Archives deleted, oldest first
    pub removed: Vec<ArchiveInfo>,
    /// Whole chains deleted
    pub chains_removed: usize,
    /// Chains left in the store
    pub chains_kept: usize,
    /// Sum of removed archive sizes
    pub bytes_reclaimed: u64,
}

/// Thresholds for [`BackupMode::Auto`]
///
/// A FULL archive is written when there is no chain, or when any threshold
/// is reached by the active chain; otherwise an incremental one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoPolicy {
    /// Incrementals allowed after a FULL before starting a new chain
    pub max_incrementals: usize,
    /// Maximum age of the active FULL archive in days
    pub max_full_age_days: u32,
    /// Summed incremental size relative to the FULL size
    pub max_incremental_ratio: f64,
}

impl Default for AutoPolicy {
    fn default() -> Self {
        Self {
            max_incrementals: 20,
            max_full_age_days: 7,
            max_incremental_ratio: 1.0,
        }
    }
}

/// Store configuration, persisted in `datezip.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Archive file naming
    pub naming: ArchiveNaming,
    /// Section compression
    pub compression: CompressionStrategy,
    /// Thresholds for auto mode
    pub auto: AutoPolicy,
    /// Retention used when a caller does not pass one
    pub retention: RetentionPolicy,
    /// Extra ignore patterns (gitignore syntax)
    pub ignore_patterns: Vec<String>,
    /// Files above this size are skipped while scanning
    pub max_file_size: Option<u64>,
    /// Follow symlinks while scanning
    pub follow_symlinks: bool,
    /// Scanner threads
    pub parallel_workers: usize,
    /// How long a writer waits for the store lock
    pub lock_wait_ms: u64,
    /// Attempts for each published file
    pub write_retries: u32,
    /// Delay between attempts, doubled each time
    pub retry_backoff_ms: u64,
    /// Budget for one tool-surface operation
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            naming: ArchiveNaming::default(),
            compression: CompressionStrategy::default(),
            auto: AutoPolicy::default(),
            retention: RetentionPolicy::default(),
            ignore_patterns: Vec::new(),
            max_file_size: None,
            follow_symlinks: false,
            parallel_workers: num_cpus::get(),
            lock_wait_ms: 2_000,
            write_retries: 3,
            retry_backoff_ms: 50,
            operation_timeout_ms: 120_000,
        }
    }
}

impl StoreConfig {
    /// Lock wait as a duration
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    /// Retry backoff as a duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Operation timeout as a duration
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.naming.prefix.is_empty() || self.naming.extension.is_empty() {
            return Err(DatezipError::InvalidConfiguration(
                "archive prefix and extension must be non-empty".to_string(),
            ));
        }
        if self.naming.extension.contains('.') || self.naming.prefix.contains('/') {
            return Err(DatezipError::InvalidConfiguration(
                "archive prefix and extension must be plain names".to_string(),
            ));
        }
        if self.write_retries == 0 {
            return Err(DatezipError::InvalidConfiguration(
                "write_retries must be at least 1".to_string(),
            ));
        }
        let ratio = self.auto.max_incremental_ratio;
        if ratio.is_nan() || ratio <= 0.0 {
            return Err(DatezipError::InvalidConfiguration(
                "max_incremental_ratio must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Contents of `datezip.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Store layout version
    pub format_version: u32,
    /// When the store was initialized
    pub created_at: DateTime<Utc>,
    /// Persisted configuration
    pub config: StoreConfig,
}

/// Active chain head, owned by the facade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadState {
    /// FULL archive that opened the active chain
    pub full: Timestamp,
    /// Newest archive of the active chain
    pub head: ArchiveId,
    /// Incrementals after the FULL archive
    pub incrementals: usize,
}
