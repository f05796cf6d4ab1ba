//! Retention Manager
//!
//! Chains are ranked by their FULL archive, newest first. The `keep_full`
//! newest chains always survive, as does the newest chain overall. Any other
//! chain whose FULL archive is at least `keep_days` old is removed as a whole.
//! Orphaned archives are always removed.
//!
//! Inside a chain archives are deleted newest-first, so an interrupted cleanup
//! leaves a restorable prefix rather than incrementals without their FULL.

use crate::backend::ArchiveBackend;
use crate::chain::ChainIndex;
use crate::error::Result;
use crate::types::{ArchiveInfo, CleanupReport, RetentionPolicy, Timestamp};
use tracing::{debug, info};

/// Archives selected for deletion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupPlan {
    /// Whole chains to delete, each listed newest archive first
    pub chains: Vec<Vec<ArchiveInfo>>,
    /// Archives belonging to no chain
    pub orphans: Vec<ArchiveInfo>,
    /// Chains that survive
    pub chains_kept: usize,
}

impl CleanupPlan {
    /// Whether nothing would be removed
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty() && self.orphans.is_empty()
    }

    /// Number of archives to remove
    pub fn archive_count(&self) -> usize {
        self.chains.iter().map(Vec::len).sum::<usize>() + self.orphans.len()
    }
}

/// Select what `policy` removes from `index` at time `now`
pub fn plan_cleanup(index: &ChainIndex, policy: &RetentionPolicy, now: Timestamp) -> CleanupPlan {
    let max_age = chrono::Duration::days(i64::from(policy.keep_days));
    let mut plan = CleanupPlan {
        orphans: index.orphans().cloned().collect(),
        ..Default::default()
    };

    for (rank, chain) in index.chains().rev().enumerate() {
        // rank 0 is the newest chain and is never removed
        let protected = rank == 0 || rank < policy.keep_full;
        // bumped timestamps can sit slightly ahead of `now`; zero days still expires them
        let expired = policy.keep_days == 0 || chain.full().timestamp.age_at(now) >= max_age;
        if !protected && expired {
            debug!(
                "Chain {} ({} archives) expired at {}",
                chain.full().timestamp,
                chain.len(),
                now
            );
            plan.chains.push(chain.archives().rev().cloned().collect());
        } else {
            plan.chains_kept += 1;
        }
    }
    plan
}

/// Delete everything in `plan`
pub fn execute_cleanup(backend: &dyn ArchiveBackend, plan: &CleanupPlan) -> Result<CleanupReport> {
    let mut report = CleanupReport {
        chains_kept: plan.chains_kept,
        ..Default::default()
    };

    for chain in &plan.chains {
        for archive in chain {
            backend.remove(&archive.id())?;
            report.bytes_reclaimed += archive.size_bytes;
            report.removed.push(archive.clone());
        }
        report.chains_removed += 1;
    }
    for orphan in &plan.orphans {
        backend.remove(&orphan.id())?;
        report.bytes_reclaimed += orphan.size_bytes;
        report.removed.push(orphan.clone());
    }

    report.removed.sort_by_key(|a| a.id());
    if !report.removed.is_empty() {
        info!(
            "Removed {} archives ({} chains, {} bytes)",
            report.removed.len(),
            report.chains_removed,
            report.bytes_reclaimed
        );
    }
    Ok(report)
}
