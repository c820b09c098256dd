//! LZ4 compression engine for stored snapshot objects
//!
//! Objects are framed with a 4-byte magic header so compressed and raw
//! content can coexist in the store:
//!
//! - `LZ4T`: LZ4 data with prepended size follows
//! - `\0\0\0\0`: uncompressed data follows
//!
//! Compression is chosen per object: tiny payloads and payloads that do not
//! shrink are stored raw.

use crate::error::{Result, RewindError};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use std::path::Path;
use tracing::trace;

/// Magic bytes marking LZ4-compressed content
const LZ4_MAGIC: &[u8; 4] = b"LZ4T";

/// Magic bytes marking uncompressed content
const RAW_MAGIC: &[u8; 4] = &[0, 0, 0, 0];

/// Content below this size is stored raw; LZ4 overhead dominates under it
const MIN_COMPRESS_SIZE: usize = 64;

/// When compression is applied to snapshot objects
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CompressionStrategy {
    /// Never compress
    None,
    /// Compress everything above a small fixed threshold
    #[default]
    Fast,
    /// Skip small files and already-compressed extensions
    Adaptive {
        /// Minimum size worth compressing
        min_size: usize,
        /// File extensions to store raw (case-insensitive)
        skip_extensions: Vec<String>,
    },
}

impl CompressionStrategy {
    /// Adaptive strategy with sensible defaults for source trees
    pub fn adaptive() -> Self {
        CompressionStrategy::Adaptive {
            min_size: 1024,
            skip_extensions: ["gz", "zst", "zip", "png", "jpg", "jpeg", "webp", "mp4", "woff2"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Running statistics of one engine instance
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressionStats {
    /// Objects stored compressed
    pub objects_compressed: usize,
    /// Objects stored raw
    pub objects_raw: usize,
    /// Bytes saved by compression
    pub bytes_saved: u64,
}

/// Compresses and decompresses store objects according to a strategy
#[derive(Debug, Default)]
pub struct CompressionEngine {
    strategy: CompressionStrategy,
    stats: CompressionStats,
}

impl CompressionEngine {
    /// Create an engine with the given strategy
    pub fn new(strategy: CompressionStrategy) -> Self {
        Self {
            strategy,
            stats: CompressionStats::default(),
        }
    }

    /// Statistics accumulated so far
    pub fn stats(&self) -> CompressionStats {
        self.stats
    }

    /// Frame `content` for storage, compressing when beneficial
    pub fn compress(&mut self, path: &Path, content: &[u8]) -> Result<Vec<u8>> {
        if content.len() < MIN_COMPRESS_SIZE || !self.should_compress(path, content.len()) {
            trace!("storing {:?} raw ({} bytes)", path, content.len());
            self.stats.objects_raw += 1;
            return Ok(frame(RAW_MAGIC, content));
        }

        let compressed = compress_prepend_size(content);
        if compressed.len() < content.len() {
            self.stats.bytes_saved += (content.len() - compressed.len()) as u64;
            self.stats.objects_compressed += 1;
            trace!(
                "compressed {:?}: {} -> {} bytes",
                path,
                content.len(),
                compressed.len()
            );
            Ok(frame(LZ4_MAGIC, &compressed))
        } else {
            self.stats.objects_raw += 1;
            Ok(frame(RAW_MAGIC, content))
        }
    }

    /// Recover the original content from framed storage bytes
    pub fn decompress(&mut self, content: &[u8]) -> Result<Vec<u8>> {
        if content.len() < 4 {
            return Err(RewindError::decompression("content too short"));
        }
        if content.starts_with(LZ4_MAGIC) {
            decompress_size_prepended(&content[LZ4_MAGIC.len()..])
                .map_err(|e| RewindError::decompression(format!("LZ4 decompression failed: {}", e)))
        } else if content.starts_with(RAW_MAGIC) {
            Ok(content[4..].to_vec())
        } else {
            Err(RewindError::decompression("unknown object framing"))
        }
    }

    fn should_compress(&self, path: &Path, size: usize) -> bool {
        match &self.strategy {
            CompressionStrategy::None => false,
            CompressionStrategy::Fast => true,
            CompressionStrategy::Adaptive {
                min_size,
                skip_extensions,
            } => {
                if size < *min_size {
                    return false;
                }
                match path.extension().and_then(|e| e.to_str()) {
                    Some(ext) => !skip_extensions.iter().any(|s| s.eq_ignore_ascii_case(ext)),
                    None => true,
                }
            }
        }
    }
}

fn frame(magic: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(magic);
    out.extend_from_slice(payload);
    out
}
