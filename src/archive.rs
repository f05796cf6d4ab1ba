//! Archive container
//!
//! An archive is the immutable unit of backup. On disk it is laid out as:
//!
//! ```text
//! +------+------------+----------------------+----------------------+
//! | DZA1 | header len | header section       | body section         |
//! | 4 B  | u32 LE     | manifest + metadata  | content blobs        |
//! +------+------------+----------------------+----------------------+
//! ```
//!
//! Both sections are bincode values run through the [`CompressionEngine`].
//! History and chain folding only need manifests, so [`Archive::read_header`]
//! stops after the header section.

use crate::compression::CompressionEngine;
use crate::error::{DatezipError, Result};
use crate::types::{ArchiveId, ArchiveKind, ArchiveMeta, Manifest, ManifestEntry, Timestamp};
use crate::utils::hash_data;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

const ARCHIVE_MAGIC: &[u8; 4] = b"DZA1";

/// Everything about an archive except its content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    /// Kind and timestamp
    pub id: ArchiveId,
    /// Timestamp of the previous archive in the chain, `None` for FULL
    pub predecessor: Option<Timestamp>,
    /// Paths this archive is responsible for
    pub manifest: Manifest,
    /// Descriptive data
    pub meta: ArchiveMeta,
}

/// A complete archive: header plus content blobs keyed by hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    header: ArchiveHeader,
    blobs: BTreeMap<String, Vec<u8>>,
}

impl Archive {
    /// Start building a FULL archive
    pub fn full(timestamp: Timestamp) -> ArchiveBuilder {
        ArchiveBuilder::new(ArchiveId::new(timestamp, ArchiveKind::Full), None)
    }

    /// Start building an incremental archive on top of `predecessor`
    pub fn incremental(timestamp: Timestamp, predecessor: Timestamp) -> ArchiveBuilder {
        ArchiveBuilder::new(
            ArchiveId::new(timestamp, ArchiveKind::Incremental),
            Some(predecessor),
        )
    }

    /// Header (identity, manifest, metadata)
    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// Kind and timestamp
    pub fn id(&self) -> ArchiveId {
        self.header.id
    }

    /// This archive's own manifest
    pub fn manifest(&self) -> &Manifest {
        &self.header.manifest
    }

    /// Content stored under `hash`
    pub fn blob(&self, hash: &str) -> Option<&[u8]> {
        self.blobs.get(hash).map(Vec::as_slice)
    }

    /// Content recorded for `path` by this archive, if any
    pub fn content(&self, path: &str) -> Option<&[u8]> {
        match self.header.manifest.get(path)? {
            ManifestEntry::Content { hash, .. } => self.blob(hash),
            ManifestEntry::Deleted => None,
        }
    }

    /// Serialize to the on-disk layout
    pub fn encode(&self, engine: &CompressionEngine) -> Result<Vec<u8>> {
        let config = bincode::config::standard();
        let header = engine.compress(&bincode::serde::encode_to_vec(&self.header, config)?)?;
        let body = engine.compress(&bincode::serde::encode_to_vec(&self.blobs, config)?)?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| DatezipError::Compression("archive header exceeds 4 GiB".to_string()))?;

        let mut out = Vec::with_capacity(8 + header.len() + body.len());
        out.extend_from_slice(ARCHIVE_MAGIC);
        out.extend_from_slice(&header_len.to_le_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a complete archive, checking its structure and content hashes
    ///
    /// `name` is only used in error messages.
    pub fn decode(bytes: &[u8], name: &str) -> Result<Archive> {
        let engine = CompressionEngine::default();
        let (header, body) = split_sections(bytes, name)?;
        let header = decode_header_section(&engine, header, name)?;

        let raw = engine
            .decompress(body)
            .map_err(|e| DatezipError::invalid_archive(name, e.to_string()))?;
        let (blobs, _): (BTreeMap<String, Vec<u8>>, usize) =
            bincode::serde::decode_from_slice(&raw, bincode::config::standard())
                .map_err(|e| DatezipError::invalid_archive(name, e.to_string()))?;

        for (hash, data) in &blobs {
            if &hash_data(data) != hash {
                return Err(DatezipError::invalid_archive(name, format!("blob {} is corrupt", hash)));
            }
        }
        for (path, hash, _) in header.manifest.contents() {
            if !blobs.contains_key(hash) {
                return Err(DatezipError::invalid_archive(
                    name,
                    format!("missing content for {}", path),
                ));
            }
        }

        Ok(Archive { header, blobs })
    }

    /// Read only the header section from `reader`
    pub fn read_header<R: Read>(mut reader: R, name: &str) -> Result<ArchiveHeader> {
        let mut prefix = [0u8; 8];
        reader
            .read_exact(&mut prefix)
            .map_err(|e| DatezipError::invalid_archive(name, e.to_string()))?;
        let header_len = parse_prefix(&prefix, name)?;

        // the length prefix is untrusted; buffer only what the file holds
        let mut header = Vec::new();
        reader
            .take(header_len as u64)
            .read_to_end(&mut header)
            .map_err(|e| DatezipError::invalid_archive(name, e.to_string()))?;
        if header.len() < header_len {
            return Err(DatezipError::invalid_archive(name, "truncated header"));
        }
        decode_header_section(&CompressionEngine::default(), &header, name)
    }
}

fn parse_prefix(prefix: &[u8], name: &str) -> Result<usize> {
    if prefix.len() < 8 || &prefix[..4] != ARCHIVE_MAGIC {
        return Err(DatezipError::invalid_archive(name, "not a datezip archive"));
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&prefix[4..8]);
    Ok(u32::from_le_bytes(len) as usize)
}

fn split_sections<'a>(bytes: &'a [u8], name: &str) -> Result<(&'a [u8], &'a [u8])> {
    let header_len = parse_prefix(bytes, name)?;
    let rest = &bytes[8..];
    if rest.len() < header_len {
        return Err(DatezipError::invalid_archive(name, "truncated header"));
    }
    Ok(rest.split_at(header_len))
}

fn decode_header_section(engine: &CompressionEngine, section: &[u8], name: &str) -> Result<ArchiveHeader> {
    let raw = engine
        .decompress(section)
        .map_err(|e| DatezipError::invalid_archive(name, e.to_string()))?;
    let (header, _): (ArchiveHeader, usize) =
        bincode::serde::decode_from_slice(&raw, bincode::config::standard())
            .map_err(|e| DatezipError::invalid_archive(name, e.to_string()))?;

    match (header.id.kind, header.predecessor) {
        (ArchiveKind::Full, Some(_)) => {
            return Err(DatezipError::invalid_archive(name, "full archive with a predecessor"));
        }
        (ArchiveKind::Incremental, None) => {
            return Err(DatezipError::invalid_archive(name, "incremental archive without a predecessor"));
        }
        (ArchiveKind::Incremental, Some(pred)) if pred >= header.id.timestamp => {
            return Err(DatezipError::invalid_archive(name, "predecessor is not older than the archive"));
        }
        _ => {}
    }
    if header.id.kind == ArchiveKind::Full && header.manifest.deletions().next().is_some() {
        return Err(DatezipError::invalid_archive(name, "full archive with deletion markers"));
    }
    Ok(header)
}

/// Accumulates files and deletions for a new archive
#[derive(Debug)]
pub struct ArchiveBuilder {
    id: ArchiveId,
    predecessor: Option<Timestamp>,
    manifest: Manifest,
    blobs: BTreeMap<String, Vec<u8>>,
}

impl ArchiveBuilder {
    fn new(id: ArchiveId, predecessor: Option<Timestamp>) -> Self {
        Self {
            id,
            predecessor,
            manifest: Manifest::new(),
            blobs: BTreeMap::new(),
        }
    }

    /// Store `content` for `path`, hashing it
    pub fn add_file(mut self, path: impl Into<String>, content: Vec<u8>) -> Self {
        self.push_file(path, content);
        self
    }

    /// In-place variant of [`ArchiveBuilder::add_file`]
    pub fn push_file(&mut self, path: impl Into<String>, content: Vec<u8>) {
        let hash = hash_data(&content);
        self.manifest.insert_content(path, hash.clone(), content.len() as u64);
        self.blobs.entry(hash).or_insert(content);
    }

    /// Record a deletion (ignored for FULL archives, which list only live paths)
    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.push_deletion(path);
        self
    }

    /// In-place variant of [`ArchiveBuilder::delete`]
    pub fn push_deletion(&mut self, path: impl Into<String>) {
        if self.id.kind == ArchiveKind::Incremental {
            self.manifest.mark_deleted(path);
        }
    }

    /// Finish the archive, filling in metadata
    pub fn build(self) -> Archive {
        let mut meta = ArchiveMeta::default();
        for (_, _, size) in self.manifest.contents() {
            meta.file_count += 1;
            meta.total_size += size;
        }
        meta.deleted_count = self.manifest.deletions().count();

        Archive {
            header: ArchiveHeader {
                id: self.id,
                predecessor: self.predecessor,
                manifest: self.manifest,
                meta,
            },
            blobs: self.blobs,
        }
    }
}
