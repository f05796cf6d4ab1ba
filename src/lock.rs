//! Store-level writer lock
//!
//! Backups and cleanups take an exclusive advisory lock on `<store>/LOCK` for
//! their whole duration. Readers never take it. The lock is released when the
//! guard is dropped, or by the OS if the process dies.

use crate::error::{DatezipError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const LOCK_FILE: &str = "LOCK";
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Held exclusive lock on a store
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Try to lock `store_root` once
    ///
    /// Fails with [`DatezipError::Locked`] when another writer holds it.
    pub fn try_acquire(store_root: &Path) -> Result<Self> {
        let path = store_root.join(LOCK_FILE);
        let file = open_lock_file(&path, store_root)?;
        file.try_lock_exclusive().map_err(|_| DatezipError::Locked)?;
        debug!("Acquired store lock {}", path.display());
        Ok(Self { file, path })
    }

    /// Lock `store_root`, polling for at most `wait`
    ///
    /// A zero `wait` fails fast with [`DatezipError::Locked`]; otherwise an
    /// expired wait is reported as [`DatezipError::Timeout`].
    pub fn acquire(store_root: &Path, wait: Duration) -> Result<Self> {
        let path = store_root.join(LOCK_FILE);
        let file = open_lock_file(&path, store_root)?;
        let deadline = Instant::now() + wait;

        loop {
            if file.try_lock_exclusive().is_ok() {
                debug!("Acquired store lock {}", path.display());
                return Ok(Self { file, path });
            }
            if wait.is_zero() {
                return Err(DatezipError::Locked);
            }
            if Instant::now() >= deadline {
                return Err(DatezipError::Timeout {
                    operation: "store lock".to_string(),
                    after: wait,
                });
            }
            trace!("Store lock busy, retrying");
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Lock file location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        trace!("Released store lock {}", self.path.display());
    }
}

fn open_lock_file(path: &Path, store_root: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| DatezipError::unavailable(store_root, format!("cannot open lock file: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let held = StoreLock::try_acquire(dir.path()).unwrap();
        assert!(matches!(
            StoreLock::try_acquire(dir.path()),
            Err(DatezipError::Locked)
        ));
        assert!(matches!(
            StoreLock::acquire(dir.path(), Duration::ZERO),
            Err(DatezipError::Locked)
        ));
        drop(held);
        assert!(StoreLock::try_acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_lock_wait_times_out() {
        let dir = TempDir::new().unwrap();
        let _held = StoreLock::try_acquire(dir.path()).unwrap();
        let start = Instant::now();
        let err = StoreLock::acquire(dir.path(), Duration::from_millis(60)).unwrap_err();
        assert!(matches!(err, DatezipError::Timeout { .. }));
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_lock_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let held = StoreLock::try_acquire(dir.path()).unwrap();
        let root = dir.path().to_path_buf();
        let waiter = thread::spawn(move || StoreLock::acquire(&root, Duration::from_secs(5)).is_ok());
        thread::sleep(Duration::from_millis(50));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_missing_store_is_unavailable() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            StoreLock::try_acquire(&dir.path().join("missing")),
            Err(DatezipError::StoreUnavailable { .. })
        ));
    }
}
