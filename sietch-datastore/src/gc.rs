//! Garbage collection.
//!
//! Two modes. Index-driven GC drops entries whose refcount already
//! reached zero - constant work per entry. Scan-driven GC is the
//! authoritative mode: it rebuilds the reachable set from every
//! manifest, reconciles drifted refcounts, rebuilds lost index
//! entries, and sweeps any blob on disk that no manifest references.
//! Both run inside their own transaction, so a crash mid-GC recovers
//! like any other mutation.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use sietch_api_types::{GcStatus, Result};
use sietch_tools::AbortFlag;

use crate::chunk_store::ChunkStore;
use crate::dedup_index::{DedupEntry, DedupIndex};
use crate::layout::VaultLayout;
use crate::manifest_store::ManifestStore;
use crate::transaction::{Transaction, TransactionMeta};

/// Index-driven GC: remove zero-refcount entries and their blobs.
pub fn index_driven_gc(
    layout: &VaultLayout,
    chunk_store: &ChunkStore,
    index: &mut DedupIndex,
) -> Result<GcStatus> {
    let mut status = GcStatus::default();

    let mut work = index.clone();
    let blob_ids = work.garbage_collect();
    work.reset_gc_counter();

    let mut txn = Transaction::begin(layout, TransactionMeta::new("gc", "index"))?;
    for blob_id in &blob_ids {
        status.removed_chunks += 1;
        status.removed_bytes += blob_size(chunk_store, blob_id);
        chunk_store.stage_remove(blob_id, &mut txn)?;
    }
    status.removed_entries = blob_ids.len() as u64;
    work.stage_store(&mut txn)?;
    txn.commit()?;

    *index = work;

    log_gc_run(layout, "index", &status);
    Ok(status)
}

/// Scan-driven GC: recompute reachability from the manifests.
///
/// Also the fallback when the dedup index is disabled - reachability
/// then comes from manifests alone and the index stays empty.
pub fn scan_driven_gc(
    layout: &VaultLayout,
    chunk_store: &ChunkStore,
    manifest_store: &ManifestStore,
    index: &mut DedupIndex,
    index_enabled: bool,
    abort: &AbortFlag,
) -> Result<GcStatus> {
    let mut status = GcStatus::default();

    // phase 1: mark - rebuild the reachable set from all manifests
    let mut reachable_refcounts: BTreeMap<String, u64> = BTreeMap::new();
    let mut reachable_blobs: BTreeSet<String> = BTreeSet::new();
    let mut chunk_details: BTreeMap<String, (String, u64, u64)> = BTreeMap::new();

    for (_, manifest) in manifest_store.load_all()? {
        abort.check()?;
        status.manifest_count += 1;
        for chunk in &manifest.chunks {
            *reachable_refcounts.entry(chunk.hash.clone()).or_insert(0) += 1;
            reachable_blobs.insert(chunk.blob_id().to_string());
            chunk_details.entry(chunk.hash.clone()).or_insert((
                chunk.blob_id().to_string(),
                chunk.plaintext_size,
                chunk.encrypted_size,
            ));
        }
    }
    status.reachable_chunks = reachable_refcounts.len() as u64;

    let mut work = index.clone();

    // phase 2: reconcile the index against the recomputed refcounts
    let (unreachable_blobs, corrected) = work.reconcile(&reachable_refcounts);
    status.corrected_refcounts = corrected;
    status.removed_entries = unreachable_blobs.len() as u64;

    if index_enabled {
        // rebuild entries an aborted commit may have lost
        for (digest, refcount) in &reachable_refcounts {
            if !work.contains(digest) {
                let (blob_id, plaintext_size, encrypted_size) = chunk_details[digest].clone();
                log::info!("rebuilding index entry for chunk {digest}");
                work.restore_entry(
                    digest,
                    DedupEntry {
                        blob_id,
                        refcount: *refcount,
                        plaintext_size,
                        encrypted_size,
                        first_seen: sietch_tools::epoch_i64(),
                    },
                );
                status.corrected_refcounts += 1;
            }
        }
    }

    // phase 3: sweep - every on-disk blob outside the reachable set goes
    let mut doomed: BTreeSet<String> = unreachable_blobs.into_iter().collect();
    for blob_id in chunk_store.list_blob_ids()? {
        abort.check()?;
        if !reachable_blobs.contains(&blob_id) {
            doomed.insert(blob_id);
        }
    }

    let mut txn = Transaction::begin(layout, TransactionMeta::new("gc", "scan"))?;
    for blob_id in &doomed {
        status.removed_chunks += 1;
        status.removed_bytes += blob_size(chunk_store, blob_id);
        chunk_store.stage_remove(blob_id, &mut txn)?;
    }
    work.reset_gc_counter();
    work.stage_store(&mut txn)?;
    txn.commit()?;

    *index = work;

    for blob_id in chunk_store.list_blob_ids()? {
        status.disk_chunks += 1;
        status.disk_bytes += blob_size(chunk_store, &blob_id);
    }

    log_gc_run(layout, "scan", &status);
    Ok(status)
}

fn blob_size(chunk_store: &ChunkStore, blob_id: &str) -> u64 {
    chunk_store.stat(blob_id).unwrap_or(0)
}

/// Append one summary line to `.sietch/logs/gc.log`. Logging failures
/// are not fatal to the collection itself.
fn log_gc_run(layout: &VaultLayout, mode: &str, status: &GcStatus) {
    log::info!(
        "gc({mode}): removed {} chunks ({} bytes), {} entries dropped, {} refcounts corrected, {} chunks on disk",
        status.removed_chunks,
        status.removed_bytes,
        status.removed_entries,
        status.corrected_refcounts,
        status.disk_chunks,
    );

    let line = format!(
        "[{}] gc({mode}): manifests={} reachable={} removed-chunks={} removed-bytes={} removed-entries={} corrected-refcounts={} disk-chunks={} disk-bytes={}\n",
        sietch_tools::epoch_i64(),
        status.manifest_count,
        status.reachable_chunks,
        status.removed_chunks,
        status.removed_bytes,
        status.removed_entries,
        status.corrected_refcounts,
        status.disk_chunks,
        status.disk_bytes,
    );

    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(layout.gc_log_path())
        .and_then(|mut file| file.write_all(line.as_bytes()));
    if let Err(err) = result {
        log::warn!("unable to append to gc log: {err}");
    }
}
