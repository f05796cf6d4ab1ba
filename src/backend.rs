//! Archive storage backends
//!
//! The engine never touches archive files directly. It talks to an
//! [`ArchiveBackend`], which can write a FULL or incremental archive, list what
//! is stored, extract an archive, and remove one. Two implementations ship
//! with the crate:
//!
//! - [`FsBackend`]: one file per archive in a store directory, published with
//!   temp-file-then-rename so readers never observe a partial archive
//! - [`MemoryBackend`]: an in-process map, used by tests and benchmarks
//!
//! ## Store layout
//!
//! ```text
//! .datezip/
//! ├── datezip.json                         # store metadata and config
//! ├── LOCK                                 # writer lock file
//! ├── datezip_20240216_143000_FULL.dzip
//! └── datezip_20240216_150000_INC.dzip
//! ```

use crate::archive::{Archive, ArchiveHeader};
use crate::compression::CompressionEngine;
use crate::error::{DatezipError, Result};
use crate::types::{ArchiveId, ArchiveInfo, ArchiveKind, ArchiveNaming, StoreConfig};
use crate::utils::write_with_retry;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Capability set the engine needs from archive storage
///
/// Implementations must publish archives atomically: after `write_*` returns
/// `Ok` the archive is fully visible to `list`/`extract`, and after it returns
/// `Err` nothing new is visible.
pub trait ArchiveBackend: Send + Sync {
    /// File naming used by this backend
    fn naming(&self) -> &ArchiveNaming;

    /// Publish a FULL archive
    fn write_full(&self, archive: &Archive) -> Result<ArchiveInfo>;

    /// Publish an incremental archive
    fn write_incremental(&self, archive: &Archive) -> Result<ArchiveInfo>;

    /// All stored archives, ordered by timestamp
    fn list(&self) -> Result<Vec<ArchiveInfo>>;

    /// Load an archive with its content
    fn extract(&self, id: &ArchiveId) -> Result<Archive>;

    /// Load only an archive's header
    fn read_header(&self, id: &ArchiveId) -> Result<ArchiveHeader> {
        Ok(self.extract(id)?.header().clone())
    }

    /// Delete an archive; removing a missing archive is not an error
    fn remove(&self, id: &ArchiveId) -> Result<()>;
}

fn expect_kind(archive: &Archive, kind: ArchiveKind) -> Result<()> {
    if archive.id().kind != kind {
        return Err(DatezipError::internal(format!(
            "expected a {} archive, got {}",
            kind,
            archive.id()
        )));
    }
    Ok(())
}

/// Archives stored as individual files in a directory
#[derive(Debug)]
pub struct FsBackend {
    root: PathBuf,
    naming: ArchiveNaming,
    engine: CompressionEngine,
    write_retries: u32,
    retry_backoff: Duration,
}

impl FsBackend {
    /// Backend over an existing store directory
    pub fn new(root: impl Into<PathBuf>, config: &StoreConfig) -> Self {
        Self {
            root: root.into(),
            naming: config.naming.clone(),
            engine: CompressionEngine::new(config.compression.clone()),
            write_retries: config.write_retries,
            retry_backoff: config.retry_backoff(),
        }
    }

    /// Store directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `id`
    pub fn archive_path(&self, id: &ArchiveId) -> PathBuf {
        self.root.join(self.naming.file_name(id))
    }

    fn publish(&self, archive: &Archive) -> Result<ArchiveInfo> {
        let id = archive.id();
        let path = self.archive_path(&id);
        if path.exists() {
            return Err(DatezipError::internal(format!(
                "archive {} already exists",
                self.naming.file_name(&id)
            )));
        }

        let bytes = archive.encode(&self.engine)?;
        write_with_retry(&path, &bytes, self.write_retries, self.retry_backoff)?;
        debug!("Published {} ({} bytes)", path.display(), bytes.len());

        Ok(ArchiveInfo {
            file_name: self.naming.file_name(&id),
            timestamp: id.timestamp,
            kind: id.kind,
            size_bytes: bytes.len() as u64,
        })
    }

    fn open_archive(&self, id: &ArchiveId) -> Result<File> {
        File::open(self.archive_path(id)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DatezipError::TimestampNotFound(id.timestamp),
            _ => DatezipError::Io(e),
        })
    }
}

impl ArchiveBackend for FsBackend {
    fn naming(&self) -> &ArchiveNaming {
        &self.naming
    }

    fn write_full(&self, archive: &Archive) -> Result<ArchiveInfo> {
        expect_kind(archive, ArchiveKind::Full)?;
        self.publish(archive)
    }

    fn write_incremental(&self, archive: &Archive) -> Result<ArchiveInfo> {
        expect_kind(archive, ArchiveKind::Incremental)?;
        self.publish(archive)
    }

    fn list(&self) -> Result<Vec<ArchiveInfo>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| DatezipError::unavailable(&self.root, e.to_string()))?;

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DatezipError::unavailable(&self.root, e.to_string()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(id) = self.naming.parse(name) else {
                trace!("Skipping non-archive entry {}", name);
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                // removed by a concurrent cleanup between readdir and stat
                _ => continue,
            };
            archives.push(ArchiveInfo {
                file_name: name.to_string(),
                timestamp: id.timestamp,
                kind: id.kind,
                size_bytes: metadata.len(),
            });
        }

        archives.sort_by_key(|a| a.id());
        Ok(archives)
    }

    fn extract(&self, id: &ArchiveId) -> Result<Archive> {
        let mut bytes = Vec::new();
        io::Read::read_to_end(&mut self.open_archive(id)?, &mut bytes)?;
        Archive::decode(&bytes, &self.naming.file_name(id))
    }

    fn read_header(&self, id: &ArchiveId) -> Result<ArchiveHeader> {
        let file = self.open_archive(id)?;
        Archive::read_header(BufReader::new(file), &self.naming.file_name(id))
    }

    fn remove(&self, id: &ArchiveId) -> Result<()> {
        match fs::remove_file(self.archive_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DatezipError::Io(e)),
        }
    }
}

/// Archives held in memory, encoded exactly as [`FsBackend`] would write them
#[derive(Debug, Default)]
pub struct MemoryBackend {
    naming: ArchiveNaming,
    engine: CompressionEngine,
    archives: RwLock<BTreeMap<ArchiveId, Vec<u8>>>,
    failing_writes: AtomicU32,
}

impl MemoryBackend {
    /// Empty backend with default naming
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with [`DatezipError::WriteFailed`]
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Number of stored archives
    pub fn len(&self) -> usize {
        self.archives.read().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.archives.read().is_empty()
    }

    /// Replace stored bytes for `id` (used to simulate corruption)
    pub fn overwrite_raw(&self, id: &ArchiveId, bytes: Vec<u8>) {
        self.archives.write().insert(*id, bytes);
    }

    fn publish(&self, archive: &Archive) -> Result<ArchiveInfo> {
        let id = archive.id();
        let name = self.naming.file_name(&id);
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DatezipError::WriteFailed {
                path: PathBuf::from(&name),
                attempts: 1,
                source: io::Error::other("injected failure"),
            });
        }

        let bytes = archive.encode(&self.engine)?;
        let size_bytes = bytes.len() as u64;
        let mut archives = self.archives.write();
        if archives.contains_key(&id) {
            return Err(DatezipError::internal(format!("archive {} already exists", name)));
        }
        archives.insert(id, bytes);

        Ok(ArchiveInfo {
            file_name: name,
            timestamp: id.timestamp,
            kind: id.kind,
            size_bytes,
        })
    }
}

impl ArchiveBackend for MemoryBackend {
    fn naming(&self) -> &ArchiveNaming {
        &self.naming
    }

    fn write_full(&self, archive: &Archive) -> Result<ArchiveInfo> {
        expect_kind(archive, ArchiveKind::Full)?;
        self.publish(archive)
    }

    fn write_incremental(&self, archive: &Archive) -> Result<ArchiveInfo> {
        expect_kind(archive, ArchiveKind::Incremental)?;
        self.publish(archive)
    }

    fn list(&self) -> Result<Vec<ArchiveInfo>> {
        Ok(self
            .archives
            .read()
            .iter()
            .map(|(id, bytes)| ArchiveInfo {
                file_name: self.naming.file_name(id),
                timestamp: id.timestamp,
                kind: id.kind,
                size_bytes: bytes.len() as u64,
            })
            .collect())
    }

    fn extract(&self, id: &ArchiveId) -> Result<Archive> {
        let archives = self.archives.read();
        let bytes = archives
            .get(id)
            .ok_or(DatezipError::TimestampNotFound(id.timestamp))?;
        Archive::decode(bytes, &self.naming.file_name(id))
    }

    fn remove(&self, id: &ArchiveId) -> Result<()> {
        self.archives.write().remove(id);
        Ok(())
    }
}
