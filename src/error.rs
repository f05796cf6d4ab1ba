//! Error types for datezip
//!
//! Every fallible operation in the crate returns [`DatezipError`]. Callers that
//! only care about the broad class of failure (for example the tool surface,
//! which reports a structured `kind` to agents) use [`DatezipError::kind`].

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Type alias for Results in the datezip library
pub type Result<T> = std::result::Result<T, DatezipError>;

/// Main error type for all datezip operations
#[derive(Debug, Error)]
pub enum DatezipError {
    /// An incremental backup was requested but the store has no chain to extend
    #[error("No active chain: create a full backup first")]
    NoActiveChain,

    /// No archive carries exactly this timestamp
    #[error("No archive with timestamp {0}")]
    TimestampNotFound(Timestamp),

    /// One or more requested paths are absent from the resolved manifest
    #[error("Not in archive {timestamp}: {}", .paths.join(", "))]
    FileNotInArchive {
        /// Timestamp of the resolved archive
        timestamp: Timestamp,
        /// Every requested path that was missing
        paths: Vec<String>,
    },

    /// Publishing a file failed after all retries
    #[error("Write failed for {path:?} after {attempts} attempt(s): {source}")]
    WriteFailed {
        /// Destination that could not be written
        path: PathBuf,
        /// Number of attempts made
        attempts: u32,
        /// Last underlying error
        #[source]
        source: std::io::Error,
    },

    /// The store directory is missing, unreadable or not initialized
    #[error("Store unavailable at {path:?}: {reason}")]
    StoreUnavailable {
        /// Store root
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// An operation exceeded its time budget
    #[error("{operation} timed out after {}", format_budget(.after))]
    Timeout {
        /// Operation name
        operation: String,
        /// Budget that was exceeded
        after: Duration,
    },

    /// The operation was stopped before it changed anything
    #[error("{operation} was cancelled before taking effect")]
    Cancelled {
        /// Operation name
        operation: String,
    },

    /// Another writer holds the store lock
    #[error("Store is locked by another backup or cleanup")]
    Locked,

    /// A chain is missing its full archive or its links disagree
    #[error("Broken chain: {0}")]
    BrokenChain(String),

    /// Text could not be parsed as `YYYYMMDD_HHMMSS`, or is out of order
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A manifest or request path escapes the workspace
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// An archive file could not be decoded
    #[error("Invalid archive {name}: {reason}")]
    InvalidArchive {
        /// Archive file name
        name: String,
        /// Decoding failure
        reason: String,
    },

    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// Compression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Decompression errors
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::error::DecodeError> for DatezipError {
    fn from(err: bincode::error::DecodeError) -> Self {
        DatezipError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for DatezipError {
    fn from(err: bincode::error::EncodeError) -> Self {
        DatezipError::Bincode(err.to_string())
    }
}

fn format_budget(after: &Duration) -> String {
    humantime::format_duration(*after).to_string()
}

/// Broad failure classes reported to callers of the tool surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`DatezipError::NoActiveChain`]
    NoActiveChain,
    /// See [`DatezipError::TimestampNotFound`]
    TimestampNotFound,
    /// See [`DatezipError::FileNotInArchive`]
    FileNotInArchive,
    /// Archive or restore output could not be written
    WriteFailed,
    /// Store missing, locked, corrupt or unreadable
    StoreUnavailable,
    /// Operation exceeded its time budget
    Timeout,
    /// Malformed request
    InvalidInput,
    /// Anything else
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NoActiveChain => "NoActiveChain",
            ErrorKind::TimestampNotFound => "TimestampNotFound",
            ErrorKind::FileNotInArchive => "FileNotInArchive",
            ErrorKind::WriteFailed => "WriteFailed",
            ErrorKind::StoreUnavailable => "StoreUnavailable",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

impl DatezipError {
    /// Create a store-unavailable error for `path`
    pub fn unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        DatezipError::StoreUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a broken-chain error with a custom message
    pub fn broken_chain(msg: impl Into<String>) -> Self {
        DatezipError::BrokenChain(msg.into())
    }

    /// Create an invalid-archive error
    pub fn invalid_archive(name: impl Into<String>, reason: impl Into<String>) -> Self {
        DatezipError::InvalidArchive {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        DatezipError::Internal(msg.into())
    }

    /// Map this error onto the caller-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            DatezipError::NoActiveChain => ErrorKind::NoActiveChain,
            DatezipError::TimestampNotFound(_) => ErrorKind::TimestampNotFound,
            DatezipError::FileNotInArchive { .. } => ErrorKind::FileNotInArchive,
            DatezipError::WriteFailed { .. } => ErrorKind::WriteFailed,
            DatezipError::StoreUnavailable { .. }
            | DatezipError::Locked
            | DatezipError::BrokenChain(_)
            | DatezipError::InvalidArchive { .. }
            | DatezipError::Bincode(_)
            | DatezipError::Decompression(_) => ErrorKind::StoreUnavailable,
            DatezipError::Timeout { .. } | DatezipError::Cancelled { .. } => ErrorKind::Timeout,
            DatezipError::InvalidTimestamp(_)
            | DatezipError::InvalidPath(_)
            | DatezipError::InvalidConfiguration(_) => ErrorKind::InvalidInput,
            DatezipError::Io(_)
            | DatezipError::Json(_)
            | DatezipError::Compression(_)
            | DatezipError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if retrying the same call later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DatezipError::Locked
                | DatezipError::Timeout { .. }
                | DatezipError::Cancelled { .. }
                | DatezipError::WriteFailed { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            DatezipError::NoActiveChain => {
                "No backup chain exists yet. Run a full backup ('datezip backup --full') first.".to_string()
            }
            DatezipError::TimestampNotFound(ts) => {
                format!("No archive was taken at {}. Use 'datezip history' or 'datezip list' to find exact timestamps.", ts)
            }
            DatezipError::Locked => {
                "Another backup or cleanup is running against this store. Try again later.".to_string()
            }
            DatezipError::StoreUnavailable { path, .. } => {
                format!("No usable store at {:?}. Run 'datezip init' first.", path)
            }
            _ => self.to_string(),
        }
    }
}
