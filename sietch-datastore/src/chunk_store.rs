//! File system based chunk store.
//!
//! Blobs live flat under `.sietch/chunks/`, named by the hex encoded
//! content hash, no extension. All writes and deletes are staged
//! through a transaction; only `get` and `exists` touch the disk
//! directly.

use std::path::PathBuf;

use sietch_api_types::{Error, Result};

use crate::data_blob::DataBlob;
use crate::layout::{VaultLayout, SIETCH_DIR_NAME};
use crate::transaction::Transaction;

pub struct ChunkStore {
    chunk_dir: PathBuf,
}

/// Vault-root relative path of a blob, used for journal records.
pub fn blob_rel_path(blob_id: &str) -> String {
    format!("{SIETCH_DIR_NAME}/chunks/{blob_id}")
}

impl ChunkStore {
    pub fn open(layout: &VaultLayout) -> Result<Self> {
        let chunk_dir = layout.chunks_dir();
        if let Err(err) = std::fs::metadata(&chunk_dir) {
            return Err(Error::io(&chunk_dir, err));
        }
        Ok(Self { chunk_dir })
    }

    fn blob_path(&self, blob_id: &str) -> PathBuf {
        self.chunk_dir.join(blob_id)
    }

    /// Stage a blob write; the bytes become visible on commit.
    pub fn stage_insert(&self, blob_id: &str, blob: &DataBlob, txn: &mut Transaction) -> Result<()> {
        txn.stage_write(&blob_rel_path(blob_id), blob.raw_data())
    }

    /// Stage a blob removal.
    pub fn stage_remove(&self, blob_id: &str, txn: &mut Transaction) -> Result<()> {
        txn.stage_delete(&blob_rel_path(blob_id))
    }

    /// Read and CRC-check a blob.
    pub fn get(&self, blob_id: &str) -> Result<DataBlob> {
        let path = self.blob_path(blob_id);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::MissingChunk {
                    digest: blob_id.to_string(),
                })
            }
            Err(err) => return Err(Error::io(&path, err)),
        };

        let blob = DataBlob::from_raw(raw).map_err(|err| Error::format(&path, err))?;
        blob.verify_crc().map_err(|_| Error::IntegrityFailure {
            digest: blob_id.to_string(),
        })?;
        Ok(blob)
    }

    /// Cheap existence check.
    pub fn exists(&self, blob_id: &str) -> bool {
        self.blob_path(blob_id).is_file()
    }

    /// On-disk size of a blob.
    pub fn stat(&self, blob_id: &str) -> Result<u64> {
        let path = self.blob_path(blob_id);
        let metadata = std::fs::metadata(&path).map_err(|err| Error::io(&path, err))?;
        Ok(metadata.len())
    }

    /// Hex named blobs currently on disk (GC sweep input).
    pub fn list_blob_ids(&self) -> Result<Vec<String>> {
        let names = sietch_tools::fs::read_dir_file_names(&self.chunk_dir)?;
        Ok(names
            .into_iter()
            .filter(|name| name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionMeta;
    use sietch_api_types::CompressionAlgorithm;

    fn test_layout(name: &str) -> VaultLayout {
        let dir =
            std::env::temp_dir().join(format!("sietch-chunks-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        VaultLayout::create(dir).unwrap()
    }

    #[test]
    fn test_chunk_store_staged_insert_and_remove() {
        let layout = test_layout("insert");
        let store = ChunkStore::open(&layout).unwrap();

        let (blob, _) =
            DataBlob::encode(b"some chunk payload", None, CompressionAlgorithm::None).unwrap();
        let blob_id = "aa".repeat(32);

        // staged but not yet committed: invisible
        let mut txn = Transaction::begin(&layout, TransactionMeta::new("test", "put")).unwrap();
        store.stage_insert(&blob_id, &blob, &mut txn).unwrap();
        assert!(!store.exists(&blob_id));

        txn.commit().unwrap();
        assert!(store.exists(&blob_id));
        let loaded = store.get(&blob_id).unwrap();
        assert_eq!(loaded.decode(None, None).unwrap(), b"some chunk payload");

        let mut txn = Transaction::begin(&layout, TransactionMeta::new("test", "del")).unwrap();
        store.stage_remove(&blob_id, &mut txn).unwrap();
        txn.commit().unwrap();
        assert!(!store.exists(&blob_id));
        assert!(matches!(
            store.get(&blob_id),
            Err(Error::MissingChunk { .. })
        ));

        let _ = std::fs::remove_dir_all(layout.root());
    }

    #[test]
    fn test_list_blob_ids_filters_foreign_files() {
        let layout = test_layout("list");
        let store = ChunkStore::open(&layout).unwrap();

        std::fs::write(layout.chunks_dir().join("bb".repeat(32)), b"x").unwrap();
        std::fs::write(layout.chunks_dir().join("README"), b"not a blob").unwrap();

        assert_eq!(store.list_blob_ids().unwrap(), vec!["bb".repeat(32)]);

        let _ = std::fs::remove_dir_all(layout.root());
    }
}
