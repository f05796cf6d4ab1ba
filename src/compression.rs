//! LZ4 section codec for archive files
//!
//! Archive headers and bodies are compressed independently so a reader can
//! decode a manifest without touching the content blobs.
//!
//! ## Format
//!
//! Every encoded section starts with a 4-byte marker:
//! - `LZ4D`: LZ4 compressed data (size-prepended block) follows
//! - `\0\0\0\0`: uncompressed data follows
//!
//! ## Examples
//!
//! ```rust
//! use datezip::compression::{CompressionEngine, CompressionStrategy};
//!
//! let engine = CompressionEngine::new(CompressionStrategy::Fast);
//! let data = b"fn main() { println!(\"hello\"); }".repeat(20);
//! let encoded = engine.compress(&data).unwrap();
//! assert_eq!(engine.decompress(&encoded).unwrap(), data);
//! ```

use crate::error::{DatezipError, Result};
use lz4_flex::compress_prepend_size;
use serde::{Deserialize, Serialize};
use tracing::trace;

const LZ4_MAGIC: &[u8; 4] = b"LZ4D";
const RAW_MAGIC: &[u8; 4] = b"\0\0\0\0";

/// Upper bound on the LZ4 block expansion ratio
const MAX_LZ4_RATIO: usize = 255;

/// When sections are compressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    /// Store sections raw
    None,
    /// Compress every section
    Fast,
    /// Compress sections of at least `min_size` bytes, and only when it helps
    Adaptive {
        /// Smallest section worth compressing
        min_size: usize,
    },
}

impl Default for CompressionStrategy {
    fn default() -> Self {
        CompressionStrategy::Adaptive { min_size: 512 }
    }
}

/// Stateless section encoder/decoder
#[derive(Debug, Clone, Default)]
pub struct CompressionEngine {
    strategy: CompressionStrategy,
}

impl CompressionEngine {
    /// Create an engine with the given strategy
    pub fn new(strategy: CompressionStrategy) -> Self {
        Self { strategy }
    }

    /// Strategy in use
    pub fn strategy(&self) -> &CompressionStrategy {
        &self.strategy
    }

    /// Encode `content`, choosing raw or LZ4 per the strategy
    pub fn compress(&self, content: &[u8]) -> Result<Vec<u8>> {
        let wants_lz4 = match &self.strategy {
            CompressionStrategy::None => false,
            CompressionStrategy::Fast => true,
            CompressionStrategy::Adaptive { min_size } => content.len() >= *min_size,
        };

        if wants_lz4 {
            let compressed = compress_prepend_size(content);
            let adaptive = matches!(self.strategy, CompressionStrategy::Adaptive { .. });
            if !adaptive || compressed.len() < content.len() {
                trace!("lz4 section {} -> {} bytes", content.len(), compressed.len());
                let mut out = Vec::with_capacity(LZ4_MAGIC.len() + compressed.len());
                out.extend_from_slice(LZ4_MAGIC);
                out.extend_from_slice(&compressed);
                return Ok(out);
            }
        }

        let mut out = Vec::with_capacity(RAW_MAGIC.len() + content.len());
        out.extend_from_slice(RAW_MAGIC);
        out.extend_from_slice(content);
        Ok(out)
    }

    /// Decode a section produced by [`CompressionEngine::compress`]
    ///
    /// Works regardless of the strategy the section was written with.
    pub fn decompress(&self, content: &[u8]) -> Result<Vec<u8>> {
        if content.len() < 4 {
            return Err(DatezipError::Decompression(format!(
                "section too short ({} bytes)",
                content.len()
            )));
        }
        let (marker, payload) = content.split_at(4);
        if marker == LZ4_MAGIC {
            decompress_lz4(payload)
        } else if marker == RAW_MAGIC {
            Ok(payload.to_vec())
        } else {
            Err(DatezipError::Decompression("unknown section marker".to_string()))
        }
    }
}

/// Decode a size-prepended LZ4 block, rejecting sizes the block cannot produce
fn decompress_lz4(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() < 4 {
        return Err(DatezipError::Decompression("missing size prefix".to_string()));
    }
    let (size, block) = payload.split_at(4);
    let mut len = [0u8; 4];
    len.copy_from_slice(size);
    let expected = u32::from_le_bytes(len) as usize;

    let limit = block.len().saturating_mul(MAX_LZ4_RATIO).saturating_add(16);
    if expected > limit {
        return Err(DatezipError::Decompression(format!(
            "declared size {} exceeds what {} compressed bytes can hold",
            expected,
            block.len()
        )));
    }
    lz4_flex::decompress(block, expected).map_err(|e| DatezipError::Decompression(e.to_string()))
}
