use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, HashAlgorithm, Result};

/// How a file is split into chunks.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkingStrategy {
    /// Chunks of exactly the target size, last one may be shorter.
    Fixed,
    /// Content-defined chunking with a rolling-hash boundary detector.
    Cdc,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChunkingPolicy {
    pub strategy: ChunkingStrategy,
    /// Target chunk size in bytes (exact for fixed, average for cdc).
    pub chunk_size: usize,
    pub hash_algorithm: HashAlgorithm,
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::Fixed,
            chunk_size: 4 * 1024 * 1024,
            hash_algorithm: HashAlgorithm::Sha256,
        }
    }
}

impl ChunkingPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < 4 * 1024 {
            return Err(Error::InvalidInput(format!(
                "chunk size {} below minimum of 4096 bytes",
                self.chunk_size
            )));
        }
        if self.chunk_size > 256 * 1024 * 1024 {
            return Err(Error::InvalidInput(format!(
                "chunk size {} above maximum of 256 MiB",
                self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Compression applied to a chunk before encryption.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionAlgorithm {
    None,
    Gzip,
    Zstd,
}

impl CompressionAlgorithm {
    pub fn is_none(self) -> bool {
        matches!(self, CompressionAlgorithm::None)
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompressionAlgorithm::None => write!(f, "none"),
            CompressionAlgorithm::Gzip => write!(f, "gzip"),
            CompressionAlgorithm::Zstd => write!(f, "zstd"),
        }
    }
}

/// Deduplication behavior and garbage collection scheduling.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DedupPolicy {
    pub enabled: bool,
    /// Lower bound for content-defined chunk sizes.
    pub min_chunk_size: usize,
    /// Upper bound for content-defined chunk sizes.
    pub max_chunk_size: usize,
    /// Run a scheduled GC after this many deletes.
    pub gc_threshold: u64,
    /// Keep the persistent hash index. When off, every chunk is stored
    /// as if unique and GC falls back to manifest scanning.
    pub index_enabled: bool,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_chunk_size: 1024 * 1024,
            max_chunk_size: 16 * 1024 * 1024,
            gc_threshold: 100,
            index_enabled: true,
        }
    }
}

/// Free-form vault metadata.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VaultMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Sort order for file listings.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    Name,
    Size,
    Time,
    Path,
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "name" => Ok(SortKey::Name),
            "size" => Ok(SortKey::Size),
            "time" => Ok(SortKey::Time),
            "path" => Ok(SortKey::Path),
            other => Err(Error::InvalidInput(format!("unknown sort key '{other}'"))),
        }
    }
}

/// Summary the dedup index reports for `dedup stats`.
///
/// `total_size` counts each unique chunk once; `saved_space` is the
/// plaintext volume dedup avoided writing, `sum((refcount - 1) * size)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DedupStats {
    pub total_chunks: u64,
    pub total_size: u64,
    pub saved_space: u64,
    pub unreferenced_count: u64,
}

/// Garbage collection accounting, written to the GC log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GcStatus {
    pub manifest_count: u64,
    pub reachable_chunks: u64,
    pub disk_chunks: u64,
    pub disk_bytes: u64,
    pub removed_chunks: u64,
    pub removed_bytes: u64,
    pub removed_entries: u64,
    pub corrected_refcounts: u64,
}
