//! Utility functions for datezip
//!
//! ## Categories of Utilities
//!
//! ### File Operations
//! - Atomic publication (temp file in the target directory, then rename)
//! - Bounded retry for transient write failures
//! - Directory size accounting and empty-directory cleanup
//!
//! ### Paths
//! - Normalizing workspace-relative paths to the `/`-separated manifest form
//! - Joining manifest paths onto a destination without escaping it
//!
//! ### Cancellation
//! - [`CancelFlag`], checked by long operations before they take effect
//!
//! ### Data Processing
//! - SHA-256 hashing
//! - Human-readable byte sizes

use crate::error::{DatezipError, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

/// Hash arbitrary data using SHA-256, hex encoded
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Format bytes as human-readable string
///
/// # Example
///
/// ```rust
/// use datezip::utils::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write (temp file in the same directory, then rename)
///
/// Readers of `path` observe either the previous content or the complete new
/// content, never a partial file. The temporary file is named
/// `<name>.<random>.tmp` and is removed if any step fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut temp = temp_file_for(path, dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn temp_file_for(path: &Path, dir: &Path) -> io::Result<NamedTempFile> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Builder::new()
        .prefix(&format!("{}.", name))
        .suffix(".tmp")
        .tempfile_in(dir)
}

/// Whether an I/O error is worth another attempt
fn is_transient(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => true,
        // sharing violations surface as permission errors on Windows
        io::ErrorKind::PermissionDenied => cfg!(windows),
        _ => false,
    }
}

/// [`atomic_write`] with up to `attempts` tries on transient failures
///
/// The delay starts at `backoff` and doubles after each failed attempt.
/// Exhausted or non-transient failures become [`DatezipError::WriteFailed`].
pub fn write_with_retry(path: &Path, content: &[u8], attempts: u32, backoff: Duration) -> Result<()> {
    let attempts = attempts.max(1);
    let mut delay = backoff;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match atomic_write(path, content) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts && is_transient(&e) => {
                debug!("transient write failure on {:?} (attempt {}): {}", path, attempt, e);
                thread::sleep(delay);
                delay = delay.saturating_mul(2);
            }
            Err(e) => {
                warn!("giving up on {:?} after {} attempt(s): {}", path, attempt, e);
                return Err(DatezipError::WriteFailed {
                    path: path.to_path_buf(),
                    attempts: attempt,
                    source: e,
                });
            }
        }
    }
}

/// Convert a relative path to manifest form (`/`-separated, no `.` or `..`)
pub fn normalize_rel_path(path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| DatezipError::InvalidPath(path.to_string_lossy().to_string()))?;
                parts.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(DatezipError::InvalidPath(path.to_string_lossy().to_string()));
            }
        }
    }
    if parts.is_empty() {
        return Err(DatezipError::InvalidPath(path.to_string_lossy().to_string()));
    }
    Ok(parts.join("/"))
}

/// Normalize a caller-supplied path string
pub fn normalize_request_path(path: &str) -> Result<String> {
    normalize_rel_path(Path::new(path))
}

/// Join a manifest path onto `root`, refusing anything that would escape it
pub fn safe_join(root: &Path, rel: &str) -> Result<PathBuf> {
    let normalized = normalize_request_path(rel)?;
    let mut out = root.to_path_buf();
    for part in normalized.split('/') {
        out.push(part);
    }
    Ok(out)
}

/// Total size of regular files below `path`
pub fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Remove empty directories from `start` upwards, stopping at `stop_at`
pub fn remove_empty_parents(start: &Path, stop_at: &Path) {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir == stop_at || !dir.starts_with(stop_at) {
            break;
        }
        // fails on non-empty directories, which ends the walk
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

/// Shared stop request for a running operation
///
/// Clones observe the same flag. Operations call [`CancelFlag::check`] at the
/// points where stopping still leaves no trace.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that has not been raised
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the operation to stop
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`DatezipError::Cancelled`] once a stop was requested
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            debug!("{} cancelled", operation);
            return Err(DatezipError::Cancelled {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}
