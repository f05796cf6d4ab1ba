//! Chain index over a store listing
//!
//! Archives are kept in an arena ordered by timestamp. Each chain is a
//! flattened list of arena positions, FULL first, so folding a chain up to a
//! target is a slice walk rather than a predecessor-pointer chase.
//!
//! ## Structure
//!
//! ```text
//! arena:   [F1] [I1] [I2] [F2] [I3]
//! chains:  #0 = [0, 1, 2]    #1 = [3, 4]
//! ```
//!
//! An incremental archive joins the chain opened by the nearest preceding FULL
//! archive. Incrementals with no FULL before them, and archives reusing a
//! timestamp already taken, are orphans: visible in listings, never
//! restorable.
//!
//! ## Examples
//!
//! ```rust
//! use datezip::chain::ChainIndex;
//! use datezip::types::{ArchiveInfo, ArchiveKind, Timestamp};
//!
//! let info = |ts: &str, kind| ArchiveInfo {
//!     file_name: String::new(),
//!     timestamp: ts.parse().unwrap(),
//!     kind,
//!     size_bytes: 1,
//! };
//! let index = ChainIndex::build(vec![
//!     info("20240101_000000", ArchiveKind::Full),
//!     info("20240101_010000", ArchiveKind::Incremental),
//! ]);
//!
//! let target: Timestamp = "20240101_010000".parse().unwrap();
//! let path = index.fold_path(target).unwrap();
//! assert_eq!(path.len(), 2);
//! assert_eq!(index.chain_count(), 1);
//! ```

use crate::error::{DatezipError, Result};
use crate::types::{ArchiveInfo, ArchiveKind, HeadState, Timestamp};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Ordered view of the archives in a store
#[derive(Debug, Clone, Default)]
pub struct ChainIndex {
    archives: Vec<ArchiveInfo>,
    chains: Vec<Vec<usize>>,
    positions: Vec<Option<(usize, usize)>>,
    by_timestamp: BTreeMap<Timestamp, usize>,
    orphans: Vec<usize>,
}

/// One chain: a FULL archive and its incrementals in timestamp order
#[derive(Debug, Clone, Copy)]
pub struct Chain<'a> {
    index: &'a ChainIndex,
    ordinal: usize,
    members: &'a [usize],
}

impl<'a> Chain<'a> {
    /// Position of this chain, oldest chain first
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// The FULL archive heading the chain
    pub fn full(&self) -> &'a ArchiveInfo {
        &self.index.archives[self.members[0]]
    }

    /// Newest archive in the chain
    pub fn head(&self) -> &'a ArchiveInfo {
        &self.index.archives[self.members[self.members.len() - 1]]
    }

    /// Archives in the chain, FULL first
    pub fn archives(&self) -> impl DoubleEndedIterator<Item = &'a ArchiveInfo> + 'a {
        let index = self.index;
        self.members.iter().map(move |&i| &index.archives[i])
    }

    /// Number of archives, FULL included
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false: a chain holds at least its FULL archive
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of incrementals after the FULL archive
    pub fn incrementals(&self) -> usize {
        self.members.len() - 1
    }

    /// Summed size of the chain's incremental archives
    pub fn incremental_bytes(&self) -> u64 {
        self.archives().skip(1).map(|a| a.size_bytes).sum()
    }

    /// Summed size of every archive in the chain
    pub fn total_bytes(&self) -> u64 {
        self.archives().map(|a| a.size_bytes).sum()
    }
}

/// Aggregate numbers for status output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// All listed archives
    pub archives: usize,
    /// Chains
    pub chains: usize,
    /// Archives belonging to no chain
    pub orphans: usize,
    /// Summed archive size
    pub total_bytes: u64,
}

impl ChainIndex {
    /// Build the index from a listing (any order)
    pub fn build(mut listing: Vec<ArchiveInfo>) -> Self {
        listing.sort_by_key(|a| a.id());

        let mut index = ChainIndex {
            positions: vec![None; listing.len()],
            ..Default::default()
        };

        for (i, info) in listing.iter().enumerate() {
            if index.by_timestamp.contains_key(&info.timestamp) {
                warn!("Duplicate archive timestamp {}; treating {} as orphan", info.timestamp, info.file_name);
                index.orphans.push(i);
                continue;
            }
            index.by_timestamp.insert(info.timestamp, i);

            match info.kind {
                ArchiveKind::Full => {
                    index.positions[i] = Some((index.chains.len(), 0));
                    index.chains.push(vec![i]);
                }
                ArchiveKind::Incremental => {
                    let chain_count = index.chains.len();
                    match index.chains.last_mut() {
                    Some(chain) => {
                        index.positions[i] = Some((chain_count - 1, chain.len()));
                        chain.push(i);
                    }
                    None => {
                        warn!("Incremental archive {} has no full ancestor", info.file_name);
                        index.orphans.push(i);
                    }
                    }
                }
            }
        }

        index.archives = listing;
        debug!(
            "Indexed {} archives into {} chains ({} orphans)",
            index.archives.len(),
            index.chains.len(),
            index.orphans.len()
        );
        index
    }

    /// Every listed archive in timestamp order, orphans included
    pub fn archives(&self) -> &[ArchiveInfo] {
        &self.archives
    }

    /// Number of listed archives
    pub fn len(&self) -> usize {
        self.archives.len()
    }

    /// Whether the store holds no archives
    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }

    /// Number of chains
    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Chains, oldest first
    pub fn chains(&self) -> impl DoubleEndedIterator<Item = Chain<'_>> + '_ {
        self.chains.iter().enumerate().map(move |(ordinal, members)| Chain {
            index: self,
            ordinal,
            members,
        })
    }

    /// The chain new incrementals extend
    pub fn latest_chain(&self) -> Option<Chain<'_>> {
        self.chains().next_back()
    }

    /// Active chain head as explicit state
    pub fn head_state(&self) -> Option<HeadState> {
        self.latest_chain().map(|chain| HeadState {
            full: chain.full().timestamp,
            head: chain.head().id(),
            incrementals: chain.incrementals(),
        })
    }

    /// Newest archive in the store, orphans included
    pub fn newest(&self) -> Option<&ArchiveInfo> {
        self.archives.last()
    }

    /// Archives that belong to no chain
    pub fn orphans(&self) -> impl Iterator<Item = &ArchiveInfo> + '_ {
        self.orphans.iter().map(move |&i| &self.archives[i])
    }

    /// The archive carrying exactly `timestamp`
    pub fn resolve(&self, timestamp: Timestamp) -> Result<&ArchiveInfo> {
        self.by_timestamp
            .get(&timestamp)
            .map(|&i| &self.archives[i])
            .ok_or(DatezipError::TimestampNotFound(timestamp))
    }

    /// Archives to fold for a restore at `timestamp`: FULL through the target
    pub fn fold_path(&self, timestamp: Timestamp) -> Result<Vec<&ArchiveInfo>> {
        let &i = self
            .by_timestamp
            .get(&timestamp)
            .ok_or(DatezipError::TimestampNotFound(timestamp))?;
        let (chain, position) = self.positions[i].ok_or_else(|| {
            DatezipError::broken_chain(format!(
                "archive {} has no full ancestor",
                self.archives[i].file_name
            ))
        })?;
        Ok(self.chains[chain][..=position]
            .iter()
            .map(|&j| &self.archives[j])
            .collect())
    }

    /// The chain containing `timestamp`, if it is not an orphan
    pub fn chain_of(&self, timestamp: Timestamp) -> Option<Chain<'_>> {
        let &i = self.by_timestamp.get(&timestamp)?;
        let (chain, _) = self.positions[i]?;
        self.chains().nth(chain)
    }

    /// Aggregate numbers
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            archives: self.archives.len(),
            chains: self.chains.len(),
            orphans: self.orphans.len(),
            total_bytes: self.archives.iter().map(|a| a.size_bytes).sum(),
        }
    }
}
