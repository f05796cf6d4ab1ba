//! Snapshot Engine
//!
//! Turns a scanned workspace into a new archive. The engine decides the
//! archive kind, materializes the active chain's state from manifests alone,
//! diffs it against the workspace and publishes the result through the
//! backend. It never touches the store lock; callers serialize writers.

use crate::archive::{Archive, ArchiveBuilder};
use crate::backend::ArchiveBackend;
use crate::chain::{Chain, ChainIndex};
use crate::error::{DatezipError, Result};
use crate::restore::{fold_manifests, load_chain_headers, ResolvedState};
use crate::scanner::WorkspaceState;
use crate::types::{ArchiveKind, AutoPolicy, BackupMode, BackupReport, Timestamp};
use crate::utils::CancelFlag;
use std::io;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Why a kind was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanReason {
    /// The caller asked for this kind
    Requested,
    /// No chain exists yet
    NoChain,
    /// Incremental count reached `max_incrementals`
    IncrementalLimit,
    /// FULL archive reached `max_full_age_days`
    FullAge,
    /// Incremental bytes reached `max_incremental_ratio` of the FULL size
    SizeRatio,
    /// Every threshold is below its limit
    WithinPolicy,
}

/// Archive kind decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPlan {
    /// Kind to write
    pub kind: ArchiveKind,
    /// What decided it
    pub reason: PlanReason,
}

/// Choose the archive kind for a backup taken at `at`
pub fn plan(mode: BackupMode, index: &ChainIndex, policy: &AutoPolicy, at: Timestamp) -> Result<SnapshotPlan> {
    let chain = index.latest_chain();
    let (kind, reason) = match (mode, chain) {
        (BackupMode::Full, _) => (ArchiveKind::Full, PlanReason::Requested),
        (BackupMode::Inc, None) => return Err(DatezipError::NoActiveChain),
        (BackupMode::Inc, Some(_)) => (ArchiveKind::Incremental, PlanReason::Requested),
        (BackupMode::Auto, None) => (ArchiveKind::Full, PlanReason::NoChain),
        (BackupMode::Auto, Some(chain)) => match threshold_reached(&chain, policy, at) {
            Some(reason) => (ArchiveKind::Full, reason),
            None => (ArchiveKind::Incremental, PlanReason::WithinPolicy),
        },
    };
    Ok(SnapshotPlan { kind, reason })
}

fn threshold_reached(chain: &Chain<'_>, policy: &AutoPolicy, at: Timestamp) -> Option<PlanReason> {
    if chain.incrementals() >= policy.max_incrementals {
        return Some(PlanReason::IncrementalLimit);
    }
    if chain.full().timestamp.age_at(at) >= chrono::Duration::days(i64::from(policy.max_full_age_days)) {
        return Some(PlanReason::FullAge);
    }
    let full_size = chain.full().size_bytes as f64;
    if chain.incrementals() > 0 && chain.incremental_bytes() as f64 >= policy.max_incremental_ratio * full_size {
        return Some(PlanReason::SizeRatio);
    }
    None
}

/// Timestamp for a backup requested at `now`
///
/// Bumped to one second after the newest archive when `now` is not later.
pub fn next_timestamp(index: &ChainIndex, now: Timestamp) -> Timestamp {
    match index.newest() {
        Some(newest) if newest.timestamp >= now => newest.timestamp.plus_seconds(1),
        _ => now,
    }
}

/// Creates archives from workspace scans
pub struct SnapshotEngine<'a> {
    backend: &'a dyn ArchiveBackend,
    policy: AutoPolicy,
    cancel: CancelFlag,
}

impl<'a> SnapshotEngine<'a> {
    /// Engine publishing through `backend`
    pub fn new(backend: &'a dyn ArchiveBackend, policy: AutoPolicy) -> Self {
        Self {
            backend,
            policy,
            cancel: CancelFlag::new(),
        }
    }

    /// Stop before publishing once `cancel` is raised
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// State of the active chain's head, folded from manifests
    pub fn head_state(&self, index: &ChainIndex) -> Result<ResolvedState> {
        let Some(chain) = index.latest_chain() else {
            return Ok(ResolvedState::new());
        };
        let path: Vec<_> = chain.archives().collect();
        let headers = load_chain_headers(self.backend, &path)?;
        Ok(fold_manifests(&headers))
    }

    /// Write one archive for `workspace` at timestamp `at`
    ///
    /// `at` must be later than every archive in `index`.
    pub fn create(
        &self,
        mode: BackupMode,
        workspace: &WorkspaceState,
        index: &ChainIndex,
        at: Timestamp,
    ) -> Result<BackupReport> {
        let start = Instant::now();
        if let Some(newest) = index.newest() {
            if at <= newest.timestamp {
                return Err(DatezipError::InvalidTimestamp(format!(
                    "{} is not later than the newest archive {}",
                    at, newest.timestamp
                )));
            }
        }

        let plan = plan(mode, index, &self.policy, at)?;
        debug!("Backup at {} will be {} ({:?})", at, plan.kind, plan.reason);
        let unreadable = workspace.unreadable().count();
        if unreadable > 0 {
            warn!("{} unreadable paths are left out of {}", unreadable, at);
        }

        let (archive, predecessor) = match plan.kind {
            ArchiveKind::Full => (self.build_full(workspace, at)?, None),
            ArchiveKind::Incremental => {
                let head = index.latest_chain().ok_or(DatezipError::NoActiveChain)?.head().timestamp;
                let state = self.head_state(index)?;
                (self.build_incremental(workspace, &state, at, head)?, Some(head))
            }
        };

        // last point where stopping leaves the store untouched
        self.cancel.check("create_backup")?;
        let info = match plan.kind {
            ArchiveKind::Full => self.backend.write_full(&archive)?,
            ArchiveKind::Incremental => self.backend.write_incremental(&archive)?,
        };

        let meta = &archive.header().meta;
        let report = BackupReport {
            archive: info,
            predecessor,
            files_stored: meta.file_count,
            files_deleted: meta.deleted_count,
            bytes_stored: meta.total_size,
            workspace_files: workspace.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Created {} ({} stored, {} deleted, {} bytes) in {:?}",
            report.archive.file_name,
            report.files_stored,
            report.files_deleted,
            report.bytes_stored,
            start.elapsed()
        );
        Ok(report)
    }

    fn build_full(&self, workspace: &WorkspaceState, at: Timestamp) -> Result<Archive> {
        let mut builder = Archive::full(at);
        for (path, _) in workspace.iter() {
            if let Some(content) = read_current(workspace, path)? {
                builder.push_file(path.as_str(), content);
            }
        }
        Ok(builder.build())
    }

    fn build_incremental(
        &self,
        workspace: &WorkspaceState,
        state: &ResolvedState,
        at: Timestamp,
        predecessor: Timestamp,
    ) -> Result<Archive> {
        let mut builder: ArchiveBuilder = Archive::incremental(at, predecessor);

        for (path, file) in workspace.iter() {
            if state.get(path).is_some_and(|prev| prev.hash == file.hash) {
                continue;
            }
            match read_current(workspace, path)? {
                Some(content) => builder.push_file(path.as_str(), content),
                None if state.contains_key(path) => builder.push_deletion(path.as_str()),
                None => {}
            }
        }
        for path in state.keys() {
            if workspace.is_unreadable(path) {
                // still present; the folded state keeps its last content
                continue;
            }
            if !workspace.contains(path) {
                builder.push_deletion(path.as_str());
            }
        }

        Ok(builder.build())
    }
}

/// Content of a scanned file, `None` if it vanished after the scan
fn read_current(workspace: &WorkspaceState, path: &str) -> Result<Option<Vec<u8>>> {
    match workspace.read(path) {
        Ok(content) => Ok(Some(content)),
        Err(DatezipError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            warn!("{} disappeared during backup", path);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
