//! Persistent deduplication index.
//!
//! Maps the plaintext content hash of every stored chunk to its blob
//! id and reference count. The index is loaded on vault open, mutated
//! on a working copy during a transaction and written back through the
//! same transaction, so an abort leaves no trace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sietch_api_types::{DedupStats, Error, Result};

use crate::layout::{VaultLayout, SIETCH_DIR_NAME};
use crate::transaction::Transaction;

/// Vault-root relative path of the index document.
pub fn index_rel_path() -> String {
    format!("{SIETCH_DIR_NAME}/state/dedup-index.json")
}

/// One entry per unique plaintext hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DedupEntry {
    /// File name under the chunk directory.
    pub blob_id: String,
    pub refcount: u64,
    pub plaintext_size: u64,
    pub encrypted_size: u64,
    pub first_seen: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct IndexDocument {
    /// Deletes since the last GC run, drives the scheduled GC.
    #[serde(default)]
    deletes_since_gc: u64,
    /// Sorted map keyed by hex plaintext hash.
    entries: BTreeMap<String, DedupEntry>,
}

/// In-memory dedup index. Cheap to clone for transaction-scoped
/// working copies.
#[derive(Debug, Default, Clone)]
pub struct DedupIndex {
    entries: BTreeMap<String, DedupEntry>,
    deletes_since_gc: u64,
}

impl DedupIndex {
    /// Load the index from disk; a missing document is an empty index.
    pub fn load(layout: &VaultLayout) -> Result<Self> {
        let path = layout.dedup_index_path();
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default())
            }
            Err(err) => return Err(Error::io(&path, err)),
        };

        let document: IndexDocument =
            serde_json::from_slice(&raw).map_err(|err| Error::format(&path, err))?;
        Ok(Self {
            entries: document.entries,
            deletes_since_gc: document.deletes_since_gc,
        })
    }

    /// Record one chunk occurrence.
    ///
    /// Returns `true` when the hash was already present (the caller
    /// must not stage a blob write), `false` for a fresh entry (the
    /// caller stages the blob under `blob_id`).
    pub fn process_chunk(
        &mut self,
        digest: &str,
        blob_id: &str,
        plaintext_size: u64,
        encrypted_size: u64,
    ) -> bool {
        if let Some(entry) = self.entries.get_mut(digest) {
            entry.refcount += 1;
            return true;
        }

        self.entries.insert(
            digest.to_string(),
            DedupEntry {
                blob_id: blob_id.to_string(),
                refcount: 1,
                plaintext_size,
                encrypted_size,
                first_seen: sietch_tools::epoch_i64(),
            },
        );
        false
    }

    /// Drop one reference to `digest`.
    ///
    /// Returns the blob id to delete when the refcount reached zero;
    /// the entry is removed in the same step so blob and entry always
    /// disappear in one transaction.
    pub fn release_chunk(&mut self, digest: &str) -> Option<String> {
        let entry = match self.entries.get_mut(digest) {
            Some(entry) => entry,
            None => {
                log::warn!("release for unknown chunk {digest}");
                return None;
            }
        };

        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            let blob_id = entry.blob_id.clone();
            self.entries.remove(digest);
            Some(blob_id)
        } else {
            None
        }
    }

    /// Read path: blob id for a plaintext hash.
    pub fn resolve(&self, digest: &str) -> Option<&DedupEntry> {
        self.entries.get(digest)
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.entries.contains_key(digest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DedupEntry)> {
        self.entries.iter()
    }

    pub fn stats(&self) -> DedupStats {
        let mut stats = DedupStats::default();
        for entry in self.entries.values() {
            stats.total_chunks += 1;
            stats.total_size += entry.plaintext_size;
            stats.saved_space += entry.refcount.saturating_sub(1) * entry.plaintext_size;
            if entry.refcount == 0 {
                stats.unreferenced_count += 1;
            }
        }
        stats
    }

    /// Remove entries with refcount zero (orphans of failed
    /// transactions or manual index edits); returns their blob ids.
    pub fn garbage_collect(&mut self) -> Vec<String> {
        let orphaned: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.refcount == 0)
            .map(|(digest, _)| digest.clone())
            .collect();

        let mut blob_ids = Vec::with_capacity(orphaned.len());
        for digest in orphaned {
            if let Some(entry) = self.entries.remove(&digest) {
                blob_ids.push(entry.blob_id);
            }
        }
        blob_ids
    }

    /// Reconcile against refcounts recomputed from the manifests.
    ///
    /// Entries absent from `reachable` are dropped (their blob ids are
    /// returned for deletion); drifted refcounts are corrected.
    /// Returns `(removed_blob_ids, corrected_count)`.
    pub fn reconcile(&mut self, reachable: &BTreeMap<String, u64>) -> (Vec<String>, u64) {
        let mut removed = Vec::new();
        let mut corrected = 0;

        let digests: Vec<String> = self.entries.keys().cloned().collect();
        for digest in digests {
            match reachable.get(&digest) {
                None => {
                    if let Some(entry) = self.entries.remove(&digest) {
                        removed.push(entry.blob_id);
                    }
                }
                Some(&expected) => {
                    let entry = self.entries.get_mut(&digest).unwrap();
                    if entry.refcount != expected {
                        log::info!(
                            "correcting refcount of {digest}: {} -> {expected}",
                            entry.refcount
                        );
                        entry.refcount = expected;
                        corrected += 1;
                    }
                }
            }
        }

        (removed, corrected)
    }

    /// Re-insert an entry scan-driven GC rebuilt from the manifests.
    pub fn restore_entry(&mut self, digest: &str, entry: DedupEntry) {
        self.entries.insert(digest.to_string(), entry);
    }

    pub fn record_deletes(&mut self, count: u64) {
        self.deletes_since_gc += count;
    }

    pub fn reset_gc_counter(&mut self) {
        self.deletes_since_gc = 0;
    }

    /// Scheduled GC trigger: deletes since the last run exceed the
    /// policy threshold.
    pub fn gc_due(&self, threshold: u64) -> bool {
        threshold > 0 && self.deletes_since_gc > threshold
    }

    /// Stage the index document into `txn`.
    pub fn stage_store(&self, txn: &mut Transaction) -> Result<()> {
        let document = IndexDocument {
            deletes_since_gc: self.deletes_since_gc,
            entries: self.entries.clone(),
        };
        let mut data = serde_json::to_vec_pretty(&document)
            .map_err(|err| Error::format(index_rel_path(), err))?;
        data.push(b'\n');
        txn.stage_write(&index_rel_path(), &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionMeta;

    #[test]
    fn test_process_and_release() {
        let mut index = DedupIndex::default();

        assert!(!index.process_chunk("d1", "b1", 100, 120));
        assert!(index.process_chunk("d1", "b1", 100, 120));
        assert!(!index.process_chunk("d2", "b2", 50, 60));

        assert_eq!(index.resolve("d1").unwrap().refcount, 2);

        assert_eq!(index.release_chunk("d1"), None);
        assert_eq!(index.release_chunk("d1"), Some("b1".to_string()));
        assert!(!index.contains("d1"));

        // releasing an unknown chunk is tolerated
        assert_eq!(index.release_chunk("d1"), None);
    }

    #[test]
    fn test_stats_saved_space() {
        let mut index = DedupIndex::default();
        index.process_chunk("d1", "b1", 100, 120);
        index.process_chunk("d1", "b1", 100, 120);
        index.process_chunk("d1", "b1", 100, 120);
        index.process_chunk("d2", "b2", 40, 50);

        let stats = index.stats();
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.total_size, 140);
        assert_eq!(stats.saved_space, 200);
        assert_eq!(stats.unreferenced_count, 0);
    }

    #[test]
    fn test_reconcile_corrects_drift() {
        let mut index = DedupIndex::default();
        index.process_chunk("d1", "b1", 100, 120);
        index.process_chunk("d2", "b2", 100, 120);
        index.process_chunk("d2", "b2", 100, 120);

        // manifests say: d1 twice, d2 gone
        let mut reachable = BTreeMap::new();
        reachable.insert("d1".to_string(), 2u64);

        let (removed, corrected) = index.reconcile(&reachable);
        assert_eq!(removed, vec!["b2".to_string()]);
        assert_eq!(corrected, 1);
        assert_eq!(index.resolve("d1").unwrap().refcount, 2);
    }

    #[test]
    fn test_index_persistence_via_transaction() {
        let dir =
            std::env::temp_dir().join(format!("sietch-index-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let layout = VaultLayout::create(dir).unwrap();

        let mut index = DedupIndex::load(&layout).unwrap();
        assert!(index.is_empty());

        index.process_chunk("d1", "b1", 10, 12);
        index.record_deletes(3);

        let mut txn = Transaction::begin(&layout, TransactionMeta::new("test", "index")).unwrap();
        index.stage_store(&mut txn).unwrap();
        txn.commit().unwrap();

        let reloaded = DedupIndex::load(&layout).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.resolve("d1").unwrap().blob_id, "b1");
        assert!(reloaded.gc_due(2));
        assert!(!reloaded.gc_due(5));

        let _ = std::fs::remove_dir_all(layout.root());
    }
}
