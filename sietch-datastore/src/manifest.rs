//! Per-file manifests.
//!
//! One JSON document per logical file, describing how to reassemble
//! and verify it: the ordered chunk list with per-chunk hashes, sizes
//! and compression tags. Manifests are replace-only; `add` writes a
//! new document, `delete` removes it, nothing mutates one in place.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use sietch_api_types::{CompressionAlgorithm, Error, Result};

/// Characters kept verbatim in manifest file names. Everything else,
/// in particular path separators, is percent-encoded, so two files
/// with equal basenames under different destinations can never fold
/// onto the same manifest name.
const MANIFEST_NAME_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.');

pub const MANIFEST_EXTENSION: &str = ".json";

/// One chunk occurrence within a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChunkRef {
    /// Position within the file, `0..n-1` without gaps.
    pub index: u32,
    /// Hex hash of the plaintext chunk - the dedup key and integrity
    /// witness.
    pub hash: String,
    /// Hex hash of the encrypted blob; the on-disk blob id when
    /// present, else `hash` names the blob.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub encrypted_hash: Option<String>,
    pub plaintext_size: u64,
    pub encrypted_size: u64,
    pub compressed: bool,
    pub compression: CompressionAlgorithm,
    /// Per-chunk nonce; empty here because the nonce is stored in the
    /// blob header.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub nonce: Option<String>,
}

impl ChunkRef {
    /// Name of the blob holding this chunk.
    pub fn blob_id(&self) -> &str {
        self.encrypted_hash.as_deref().unwrap_or(&self.hash)
    }
}

/// One per logical file in the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileManifest {
    /// Basename of the file.
    pub file_name: String,
    /// Directory prefix of the in-vault path; empty for the vault
    /// root. Kept separate from `file_name` so display code joins
    /// them.
    pub dir: String,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Modification time of the source file.
    pub mtime: i64,
    /// Destination prefix as supplied to `add`.
    pub destination: String,
    pub chunks: Vec<ChunkRef>,
    pub added_at: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub tags: Vec<String>,
}

fn join_path(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl FileManifest {
    /// The in-vault path (directory prefix joined with the basename).
    pub fn vault_path(&self) -> String {
        join_path(&self.dir, &self.file_name)
    }

    /// Destination prefix joined with the basename.
    pub fn full_path(&self) -> String {
        join_path(&self.destination, &self.file_name)
    }

    /// File name of this manifest's document under `manifests/`.
    pub fn manifest_name(&self) -> String {
        manifest_name_for_path(&self.vault_path())
    }

    /// Multi-strategy path match, tried in this order: full
    /// destination+path, exact vault path, basename of the stored
    /// path, basename of the query against the full path.
    pub fn match_strategy(&self, query: &str) -> Option<u8> {
        let query = query.trim_end_matches('/');
        if self.full_path() == query {
            Some(0)
        } else if self.vault_path() == query {
            Some(1)
        } else if self.file_name == query {
            Some(2)
        } else if basename(query) == self.file_name {
            Some(3)
        } else {
            None
        }
    }

    /// Chunk indices must form `0..n-1` without gaps.
    pub fn validate(&self) -> Result<()> {
        for (pos, chunk) in self.chunks.iter().enumerate() {
            if chunk.index as usize != pos {
                return Err(Error::format(
                    self.manifest_name(),
                    format!("chunk index {} at position {pos}", chunk.index),
                ));
            }
        }
        Ok(())
    }

    /// Serialize with stable key order and two-space indentation.
    pub fn to_document(&self) -> Result<Vec<u8>> {
        let mut data = serde_json::to_vec_pretty(self)
            .map_err(|err| Error::format(self.manifest_name(), err))?;
        data.push(b'\n');
        Ok(data)
    }
}

/// Manifest document name for an in-vault path. The whole path is
/// folded into one file name with separators percent-encoded.
pub fn manifest_name_for_path(vault_path: &str) -> String {
    let encoded = utf8_percent_encode(vault_path, MANIFEST_NAME_SET).to_string();
    format!("{encoded}{MANIFEST_EXTENSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(dir: &str, file_name: &str, destination: &str) -> FileManifest {
        FileManifest {
            file_name: file_name.into(),
            dir: dir.into(),
            size: 0,
            mtime: 0,
            destination: destination.into(),
            chunks: Vec::new(),
            added_at: 0,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_equal_basenames_get_distinct_manifest_names() {
        let a = manifest("docs", "report.pdf", "docs");
        let b = manifest("archive", "report.pdf", "archive");

        assert_ne!(a.manifest_name(), b.manifest_name());
        assert_eq!(a.manifest_name(), "docs%2Freport.pdf.json");
    }

    #[test]
    fn test_percent_literal_does_not_collide() {
        // a literal "%2F" in a name must not alias a separator
        let a = manifest("", "a%2Fb.txt", "");
        let b = manifest("a", "b.txt", "a");
        assert_ne!(a.manifest_name(), b.manifest_name());
    }

    #[test]
    fn test_match_strategies() {
        let m = manifest("docs", "report.pdf", "docs");

        assert_eq!(m.match_strategy("docs/report.pdf"), Some(0));
        assert_eq!(m.match_strategy("report.pdf"), Some(2));
        assert_eq!(m.match_strategy("elsewhere/report.pdf"), Some(3));
        assert_eq!(m.match_strategy("other.pdf"), None);
    }

    #[test]
    fn test_validate_rejects_gaps() {
        let mut m = manifest("", "x.bin", "");
        m.chunks.push(ChunkRef {
            index: 1,
            hash: "aa".into(),
            encrypted_hash: None,
            plaintext_size: 1,
            encrypted_size: 1,
            compressed: false,
            compression: CompressionAlgorithm::None,
            nonce: None,
        });
        assert!(m.validate().is_err());

        m.chunks[0].index = 0;
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_blob_id_fallback() {
        let mut chunk = ChunkRef {
            index: 0,
            hash: "aabb".into(),
            encrypted_hash: Some("ccdd".into()),
            plaintext_size: 1,
            encrypted_size: 1,
            compressed: false,
            compression: CompressionAlgorithm::None,
            nonce: None,
        };
        assert_eq!(chunk.blob_id(), "ccdd");
        chunk.encrypted_hash = None;
        assert_eq!(chunk.blob_id(), "aabb");
    }
}
