//! # datezip - Chained full and incremental workspace backups
//!
//! A point-in-time backup and restore engine for a single project workspace.
//! Snapshots are immutable archives named by timestamp; restores fold a chain
//! of archives back into the exact state at any archived instant.
//!
//! ## Overview
//!
//! datezip lets you:
//! - Snapshot a workspace as a FULL archive or as an incremental delta
//! - Let an auto policy decide when a chain has grown enough to start over
//! - Derive a per-file change history from archive manifests alone
//! - Restore the whole project, or single files, as of any archive
//! - Read a past file version without touching the live workspace
//! - Prune old chains without ever stranding an incremental archive
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use datezip::{BackupMode, Datezip, HistoryQuery, RestoreRequest, RestoreType};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let datezip = Datezip::init(
//!     PathBuf::from("./my_project"),
//!     PathBuf::from("./my_project/.datezip"),
//! )?;
//!
//! let first = datezip.create_backup(BackupMode::Full)?;
//! // ... edit files ...
//! let second = datezip.create_backup(BackupMode::Auto)?;
//!
//! for entry in datezip.get_history(&HistoryQuery::new().files(["src/main.rs"]))? {
//!     println!("{}", entry);
//! }
//!
//! let old_main = datezip.historical_content(first.archive.timestamp, "src/main.rs")?;
//! println!("{}", old_main);
//!
//! datezip.restore(
//!     &RestoreRequest::new(second.archive.timestamp)
//!         .restore_type(RestoreType::Just)
//!         .files(["src/main.rs"]),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Archives and chains
//!
//! Every archive is either FULL (the complete workspace) or INC (the paths that
//! changed or disappeared since its predecessor). A chain is one FULL archive
//! followed by its incrementals. Archive files are named
//! `<prefix>_<YYYYMMDD_HHMMSS>_<FULL|INC>.<ext>`.
//!
//! ### Restore types
//!
//! - `e` folds the chain from its FULL archive up to the target, honouring
//!   deletion markers on the way
//! - `j` uses only the target archive's own manifest
//!
//! ### Concurrency
//!
//! Backups and cleanups take an exclusive store lock. Reads never do; archives
//! are published by rename, so a reader sees a store either before or after a
//! write.
//!
//! ## Module Organization
//!
//! - [`datezip`]: the [`Datezip`] facade and its builder
//! - [`archive`] and [`backend`]: archive container and storage backends
//! - [`chain`]: chain index over a store listing
//! - [`snapshot`], [`history`], [`restore`], [`retention`]: the engines
//! - [`tools`]: async request/response surface for agents
//! - [`types`] and [`error`]: shared data types and errors

pub mod archive;
pub mod backend;
pub mod chain;
pub mod compression;
pub mod datezip;
pub mod error;
pub mod history;
pub mod lock;
pub mod restore;
pub mod retention;
pub mod scanner;
pub mod snapshot;
pub mod tools;
pub mod types;
pub mod utils;

pub use archive::{Archive, ArchiveHeader};
pub use backend::{ArchiveBackend, FsBackend, MemoryBackend};
pub use chain::ChainIndex;
pub use compression::{CompressionEngine, CompressionStrategy};
pub use datezip::{Datezip, DatezipBuilder, StoreStatus, DEFAULT_STORE_DIR};
pub use error::{DatezipError, ErrorKind, Result};
pub use tools::{DatezipTools, ToolFailure};
pub use types::*;
pub use utils::CancelFlag;
