//! History Engine
//!
//! Derives per-file change records by replaying every restorable archive in
//! timestamp order against a running path-to-hash state. A path is `New` when
//! the state does not hold it, `Modified` when the hash differs, and omitted
//! when unchanged. Deletion markers drop the path from the state, so a file
//! that comes back is `New` again. A FULL archive replaces the state wholesale.
//!
//! Only manifests are read; content bodies are never decoded.
//!
//! Cleanup may run concurrently and removes whole chains, newest archive
//! first. A chain with an archive that vanished between listing and replay is
//! dropped as a unit, so the result reflects that chain either fully present
//! or fully removed.

use crate::backend::ArchiveBackend;
use crate::chain::ChainIndex;
use crate::error::{DatezipError, Result};
use crate::types::{ArchiveKind, ChangeStatus, HistoryEntry, HistoryQuery, ManifestEntry};
use std::collections::BTreeMap;
use tracing::debug;

/// Replay the store and return entries passing `query`, oldest first
pub fn compute_history(
    backend: &dyn ArchiveBackend,
    index: &ChainIndex,
    query: &HistoryQuery,
) -> Result<Vec<HistoryEntry>> {
    let mut state: BTreeMap<String, String> = BTreeMap::new();
    let mut entries = Vec::new();
    let mut replayed = 0usize;

    'chains: for chain in index.chains() {
        let emitted = entries.len();
        let before = state.clone();

        for info in chain.archives() {
            let header = match backend.read_header(&info.id()) {
                Ok(header) => header,
                Err(DatezipError::TimestampNotFound(_)) => {
                    debug!(
                        "Chain {} was removed during replay, skipping it",
                        chain.full().timestamp
                    );
                    entries.truncate(emitted);
                    state = before;
                    continue 'chains;
                }
                Err(e) => return Err(e),
            };
            replayed += 1;

            let mut next = if header.id.kind == ArchiveKind::Full {
                BTreeMap::new()
            } else {
                state.clone()
            };

            for (path, entry) in header.manifest.iter() {
                match entry {
                    ManifestEntry::Content { hash, .. } => {
                        let status = match state.get(path) {
                            None => Some(ChangeStatus::New),
                            Some(prev) if prev != hash => Some(ChangeStatus::Modified),
                            Some(_) => None,
                        };
                        if let Some(status) = status {
                            let entry = HistoryEntry {
                                timestamp: header.id.timestamp,
                                status,
                                file: path.clone(),
                            };
                            if query.matches(&entry) {
                                entries.push(entry);
                            }
                        }
                        next.insert(path.clone(), hash.clone());
                    }
                    ManifestEntry::Deleted => {
                        next.remove(path);
                    }
                }
            }
            state = next;
        }
    }

    debug!("History replayed {} archives, {} entries", replayed, entries.len());
    Ok(entries)
}
