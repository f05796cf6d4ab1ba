//! Tool-call surface
//!
//! Six request/response operations over a shared [`Datezip`] for agents and
//! RPC adapters. Each call runs the blocking engine work on tokio's blocking
//! pool under the store's operation timeout, and every failure comes back as
//! a [`ToolFailure`] carrying the error kind and a readable detail. Empty
//! results (no backups, no history) are successes.
//!
//! Read-only calls are abandoned when their time runs out. Calls that change
//! the store or the workspace are cancelled instead and awaited: a `Timeout`
//! failure means they stopped before taking effect, and a call that got past
//! its last cancellation point reports its real outcome.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use datezip::tools::{DatezipTools, GetHistoryRequest};
//! use datezip::Datezip;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let datezip = Datezip::open(PathBuf::from("."), PathBuf::from("./.datezip"))?;
//! let tools = DatezipTools::new(Arc::new(datezip));
//!
//! let history = tools
//!     .get_history(GetHistoryRequest {
//!         files: Some(vec!["src/main.rs".to_string()]),
//!         ..Default::default()
//!     })
//!     .await?;
//! for entry in history {
//!     println!("{}", entry);
//! }
//! # Ok(())
//! # }
//! ```

use crate::datezip::Datezip;
use crate::error::{DatezipError, ErrorKind, Result};
use crate::types::{
    ArchiveInfo, BackupMode, BackupReport, CleanupReport, HistoryEntry, HistoryQuery, RestoreRequest,
    RestoreResult, RestoreType, RetentionPolicy, Timestamp,
};
use crate::utils::CancelFlag;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Structured failure returned to tool callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    /// Failure class
    pub kind: ErrorKind,
    /// Human-readable explanation
    pub detail: String,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for ToolFailure {}

impl From<DatezipError> for ToolFailure {
    fn from(err: DatezipError) -> Self {
        ToolFailure {
            kind: err.kind(),
            detail: err.user_message(),
        }
    }
}

/// Result type of every tool operation
pub type ToolResult<T> = std::result::Result<T, ToolFailure>;

/// Parameters for `create_backup`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct CreateBackupRequest {
    /// `auto` (default), `full` or `inc`
    pub mode: Option<String>,
}

/// Parameters for `get_history`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct GetHistoryRequest {
    /// Exact workspace-relative paths to keep
    pub files: Option<Vec<String>>,
    /// Inclusive lower bound, `YYYYMMDD_HHMMSS`
    pub from_ts: Option<String>,
    /// Inclusive upper bound, `YYYYMMDD_HHMMSS`
    pub to_ts: Option<String>,
}

/// Parameters for `get_historical_content`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct GetHistoricalContentRequest {
    /// Exact archive timestamp, `YYYYMMDD_HHMMSS`
    pub timestamp: String,
    /// Workspace-relative path
    pub filename: String,
}

/// Parameters for `restore_state`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct RestoreStateRequest {
    /// Exact archive timestamp, `YYYYMMDD_HHMMSS`
    pub timestamp: String,
    /// Paths to restore; the whole project when omitted
    pub files: Option<Vec<String>>,
    /// `e` (default) or `j`
    pub restore_type: Option<String>,
    /// Output directory; the workspace when omitted
    pub destination: Option<String>,
    /// Delete workspace files absent from a whole-project restore
    pub prune: Option<bool>,
}

/// Parameters for `cleanup_backups`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "mcp", derive(schemars::JsonSchema))]
pub struct CleanupBackupsRequest {
    /// Newest chains kept regardless of age
    pub keep_full: Option<usize>,
    /// Age in days after which other chains are removed
    pub keep_days: Option<u32>,
}

/// Response of `get_historical_content`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalContent {
    /// Archive the content was read from
    pub timestamp: Timestamp,
    /// Path that was read
    pub filename: String,
    /// File content, lossily decoded as UTF-8
    pub content: String,
}

/// Async operations for agents over one store
#[derive(Debug, Clone)]
pub struct DatezipTools {
    engine: Arc<Datezip>,
    timeout: Duration,
}

impl DatezipTools {
    /// Tools over `engine` using its configured operation timeout
    pub fn new(engine: Arc<Datezip>) -> Self {
        let timeout = engine.config().operation_timeout();
        Self { engine, timeout }
    }

    /// Override the per-operation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The wrapped engine
    pub fn engine(&self) -> &Arc<Datezip> {
        &self.engine
    }

    fn timed_out(&self, operation: &str) -> ToolFailure {
        ToolFailure::from(DatezipError::Timeout {
            operation: operation.to_string(),
            after: self.timeout,
        })
    }

    fn finish<T>(operation: &str, joined: std::result::Result<Result<T>, tokio::task::JoinError>) -> ToolResult<T> {
        match joined {
            Ok(result) => result.map_err(|e| {
                debug!("{} failed: {}", operation, e);
                ToolFailure::from(e)
            }),
            Err(join_error) => Err(ToolFailure::from(DatezipError::internal(format!(
                "{} aborted: {}",
                operation, join_error
            )))),
        }
    }

    /// Run a read-only task, abandoning it on timeout
    async fn run<T, F>(&self, operation: &'static str, task: F) -> ToolResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Datezip) -> Result<T> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let handle = tokio::task::spawn_blocking(move || task(&engine));
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(joined) => Self::finish(operation, joined),
            Err(_) => {
                warn!("{} exceeded {:?}", operation, self.timeout);
                Err(self.timed_out(operation))
            }
        }
    }

    /// Run a task with side effects, cancelling it on timeout
    ///
    /// The task is awaited after cancellation so a `Timeout` is only reported
    /// once it has stopped without taking effect.
    async fn run_cancellable<T, F>(&self, operation: &'static str, task: F) -> ToolResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Datezip, &CancelFlag) -> Result<T> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let cancel = CancelFlag::new();
        let task_cancel = cancel.clone();
        let mut handle = tokio::task::spawn_blocking(move || task(&engine, &task_cancel));

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(joined) => Self::finish(operation, joined),
            Err(_) => {
                warn!("{} exceeded {:?}, cancelling", operation, self.timeout);
                cancel.cancel();
                match handle.await {
                    Ok(Err(DatezipError::Cancelled { .. })) => Err(self.timed_out(operation)),
                    joined => {
                        warn!("{} completed after its timeout", operation);
                        Self::finish(operation, joined)
                    }
                }
            }
        }
    }

    /// Snapshot the workspace
    pub async fn create_backup(&self, request: CreateBackupRequest) -> ToolResult<BackupReport> {
        let mode: BackupMode = match request.mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => BackupMode::Auto,
        };
        self.run_cancellable("create_backup", move |engine, cancel| {
            engine.create_backup_cancellable(mode, cancel)
        })
        .await
    }

    /// All archives, oldest first
    pub async fn list_backups(&self) -> ToolResult<Vec<ArchiveInfo>> {
        self.run("list_backups", |engine| engine.list_backups()).await
    }

    /// Change history with optional filters
    pub async fn get_history(&self, request: GetHistoryRequest) -> ToolResult<Vec<HistoryEntry>> {
        let mut query = HistoryQuery::new();
        if let Some(files) = request.files {
            query = query.files(files);
        }
        if let Some(from) = request.from_ts.as_deref() {
            query = query.from(from.parse()?);
        }
        if let Some(to) = request.to_ts.as_deref() {
            query = query.to(to.parse()?);
        }
        self.run("get_history", move |engine| engine.get_history(&query)).await
    }

    /// Read one file as of a timestamp without touching the workspace
    pub async fn get_historical_content(
        &self,
        request: GetHistoricalContentRequest,
    ) -> ToolResult<HistoricalContent> {
        let timestamp: Timestamp = request.timestamp.parse()?;
        let filename = request.filename;
        self.run("get_historical_content", move |engine| {
            let content = engine.historical_content(timestamp, &filename)?;
            Ok(HistoricalContent {
                timestamp,
                filename,
                content,
            })
        })
        .await
    }

    /// Overwrite workspace (or destination) files with a past state
    pub async fn restore_state(&self, request: RestoreStateRequest) -> ToolResult<RestoreResult> {
        let timestamp: Timestamp = request.timestamp.parse()?;
        let restore_type: RestoreType = match request.restore_type.as_deref() {
            Some(t) => t.parse()?,
            None => RestoreType::Everything,
        };
        let mut restore = RestoreRequest::new(timestamp)
            .restore_type(restore_type)
            .prune(request.prune.unwrap_or(false));
        if let Some(files) = request.files.filter(|f| !f.is_empty()) {
            restore = restore.files(files);
        }
        if let Some(destination) = request.destination {
            restore = restore.destination(PathBuf::from(destination));
        }
        self.run_cancellable("restore_state", move |engine, cancel| {
            engine.restore_cancellable(&restore, cancel)
        })
        .await
    }

    /// Apply retention, defaulting to the store's configured policy
    pub async fn cleanup_backups(&self, request: CleanupBackupsRequest) -> ToolResult<CleanupReport> {
        let defaults = self.engine.config().retention;
        let policy = RetentionPolicy {
            keep_full: request.keep_full.unwrap_or(defaults.keep_full),
            keep_days: request.keep_days.unwrap_or(defaults.keep_days),
        };
        self.run_cancellable("cleanup_backups", move |engine, cancel| {
            engine.cleanup_cancellable(&policy, cancel)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datezip::DEFAULT_STORE_DIR;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tools() -> (TempDir, DatezipTools) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let datezip = Datezip::init(root.clone(), root.join(DEFAULT_STORE_DIR)).unwrap();
        (temp_dir, DatezipTools::new(Arc::new(datezip)))
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let (dir, tools) = create_test_tools();
        fs::write(dir.path().join("a.txt"), "1").unwrap();

        assert!(tools.list_backups().await.unwrap().is_empty());
        let report = tools
            .create_backup(CreateBackupRequest {
                mode: Some("full".to_string()),
            })
            .await
            .unwrap();
        let ts = report.archive.timestamp.to_string();

        let listed = tools.list_backups().await.unwrap();
        assert_eq!(listed.len(), 1);

        let content = tools
            .get_historical_content(GetHistoricalContentRequest {
                timestamp: ts.clone(),
                filename: "a.txt".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(content.content, "1");

        let missing = tools
            .get_historical_content(GetHistoricalContentRequest {
                timestamp: ts,
                filename: "b.txt".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(missing.kind, ErrorKind::FileNotInArchive);
    }

    #[tokio::test]
    async fn test_tool_failures_are_structured() {
        let (_dir, tools) = create_test_tools();
        let err = tools
            .create_backup(CreateBackupRequest {
                mode: Some("inc".to_string()),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoActiveChain);

        let err = tools
            .restore_state(RestoreStateRequest {
                timestamp: "20240101_000000".to_string(),
                files: None,
                restore_type: None,
                destination: None,
                prune: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TimestampNotFound);

        let err = tools
            .get_history(GetHistoryRequest {
                from_ts: Some("yesterday".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_tool_timeout() {
        let (dir, tools) = create_test_tools();
        for i in 0..50 {
            fs::write(dir.path().join(format!("f{}.txt", i)), vec![b'x'; 4096]).unwrap();
        }
        let timed = tools.clone().with_timeout(Duration::ZERO);
        let err = timed.create_backup(CreateBackupRequest::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);

        // the backup stopped before publishing, even after it had time to finish
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(tools.engine().list_backups().unwrap().is_empty());
        assert!(tools.list_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_timeout_leaves_workspace() {
        let (dir, tools) = create_test_tools();
        fs::write(dir.path().join("a.txt"), "old").unwrap();
        let report = tools
            .create_backup(CreateBackupRequest {
                mode: Some("full".to_string()),
            })
            .await
            .unwrap();
        fs::write(dir.path().join("a.txt"), "new").unwrap();

        let timed = tools.clone().with_timeout(Duration::ZERO);
        let err = timed
            .restore_state(RestoreStateRequest {
                timestamp: report.archive.timestamp.to_string(),
                files: None,
                restore_type: None,
                destination: None,
                prune: Some(true),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "new");
    }
}
