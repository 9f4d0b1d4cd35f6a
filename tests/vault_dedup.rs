mod common;

use common::*;

use sietch::{
    AbortFlag, ChunkingStrategy, CipherSuite, CompressionAlgorithm, DeleteOptions, GetOptions,
    HashAlgorithm, SortKey, Vault,
};

fn dedup_vault(name: &str) -> (std::path::PathBuf, Vault) {
    let root = test_root(name);
    let vault = Vault::create(
        &root,
        small_chunk_params(
            CipherSuite::AesGcm,
            CompressionAlgorithm::None,
            ChunkingStrategy::Fixed,
            HashAlgorithm::Sha256,
        ),
    )
    .unwrap();
    (root, vault)
}

#[test]
fn test_identical_files_share_all_blobs() {
    // adding the same content twice must store every blob exactly once
    let (root, vault) = dedup_vault("pair");
    let abort = AbortFlag::new();

    // 5.5 chunks worth of data -> 6 unique chunks
    let data = patterned(5 * 4096 + 2048);
    let a = write_source(&root, "a.bin", &data);
    let b = write_source(&root, "b.bin", &data);

    let manifest_a = vault.add(&a, "", &[], &abort).unwrap();
    let manifest_b = vault.add(&b, "", &[], &abort).unwrap();

    assert_eq!(manifest_a.chunks.len(), 6);
    assert_eq!(manifest_b.chunks.len(), 6);

    // same content, same blob ids
    for (x, y) in manifest_a.chunks.iter().zip(manifest_b.chunks.iter()) {
        assert_eq!(x.hash, y.hash);
        assert_eq!(x.blob_id(), y.blob_id());
    }

    assert_eq!(vault.list(None, SortKey::Name).unwrap().len(), 2);
    assert_eq!(blob_count(&vault), 6);

    let stats = vault.dedup_stats();
    assert_eq!(stats.total_chunks, 6);
    assert_eq!(stats.saved_space, data.len() as u64);
    assert_eq!(stats.unreferenced_count, 0);

    cleanup(&root);
}

#[test]
fn test_delete_preserves_shared_chunks() {
    let (root, vault) = dedup_vault("shared");
    let abort = AbortFlag::new();

    let data = patterned(5 * 4096 + 2048);
    let a = write_source(&root, "a.bin", &data);
    let b = write_source(&root, "b.bin", &data);
    vault.add(&a, "", &[], &abort).unwrap();
    vault.add(&b, "", &[], &abort).unwrap();

    vault.delete("a.bin", &DeleteOptions::default()).unwrap();

    // one manifest left, all blobs still present for b.bin
    assert_eq!(vault.list(None, SortKey::Name).unwrap().len(), 1);
    assert_eq!(blob_count(&vault), 6);

    let stats = vault.dedup_stats();
    assert_eq!(stats.total_chunks, 6);
    assert_eq!(stats.saved_space, 0);

    let out = a.with_extension("out");
    vault
        .get("b.bin", &out, &GetOptions::default(), &abort)
        .unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), data);

    // deleting the last reference removes the blobs with it
    vault.delete("b.bin", &DeleteOptions::default()).unwrap();
    assert_eq!(blob_count(&vault), 0);
    assert_eq!(vault.dedup_stats().total_chunks, 0);

    cleanup(&root);
}

#[test]
fn test_delete_is_idempotent() {
    let (root, vault) = dedup_vault("idempotent");
    let abort = AbortFlag::new();

    let a = write_source(&root, "a.bin", &patterned(8192));
    vault.add(&a, "", &[], &abort).unwrap();

    vault.delete("a.bin", &DeleteOptions::default()).unwrap();
    // the second attempt finds no manifest
    assert!(matches!(
        vault.delete("a.bin", &DeleteOptions::default()),
        Err(sietch::Error::ManifestNotFound(_))
    ));

    cleanup(&root);
}

#[test]
fn test_keep_chunks_leaves_blobs_for_gc() {
    let (root, vault) = dedup_vault("keep");
    let abort = AbortFlag::new();

    let a = write_source(&root, "a.bin", &patterned(3 * 4096));
    vault.add(&a, "", &[], &abort).unwrap();
    let blobs_before = blob_count(&vault);

    vault
        .delete(
            "a.bin",
            &DeleteOptions { keep_chunks: true },
        )
        .unwrap();

    // manifest gone, blobs kept
    assert_eq!(vault.list(None, SortKey::Name).unwrap().len(), 0);
    assert_eq!(blob_count(&vault), blobs_before);

    // the authoritative scan reclaims them
    let status = vault.optimize(&abort).unwrap();
    assert_eq!(status.removed_chunks as usize, blobs_before);
    assert_eq!(blob_count(&vault), 0);

    cleanup(&root);
}

#[test]
fn test_gc_after_selective_delete() {
    // three files, delete the middle one, gc: exactly the union of
    // the remaining manifests stays on disk
    let (root, vault) = dedup_vault("gc");
    let abort = AbortFlag::new();

    let a = write_source(&root, "a.bin", &patterned(2 * 4096));
    let b = write_source(&root, "b.bin", &patterned(3 * 4096 + 17));
    let c = write_source(&root, "c.bin", &patterned(4 * 4096 + 100));
    vault.add(&a, "", &[], &abort).unwrap();
    vault.add(&b, "", &[], &abort).unwrap();
    vault.add(&c, "", &[], &abort).unwrap();

    vault.delete("b.bin", &DeleteOptions::default()).unwrap();

    let status = vault.optimize(&abort).unwrap();
    assert_eq!(status.manifest_count, 2);

    let expected: std::collections::BTreeSet<String> = vault
        .list(None, SortKey::Name)
        .unwrap()
        .iter()
        .flat_map(|m| m.chunks.iter().map(|c| c.blob_id().to_string()))
        .collect();
    assert_eq!(blob_count(&vault), expected.len());

    let stats = vault.dedup_stats();
    assert_eq!(stats.unreferenced_count, 0);
    assert_eq!(stats.total_chunks as usize, expected.len());

    cleanup(&root);
}

#[test]
fn test_scan_gc_corrects_refcount_drift() {
    let (root, vault) = dedup_vault("drift");
    let abort = AbortFlag::new();

    let data = patterned(2 * 4096);
    let a = write_source(&root, "a.bin", &data);
    let b = write_source(&root, "b.bin", &data);
    vault.add(&a, "", &[], &abort).unwrap();
    vault.add(&b, "", &[], &abort).unwrap();

    // forge drifted refcounts in the index document
    let index_path = vault.layout().dedup_index_path();
    let text = std::fs::read_to_string(&index_path).unwrap();
    let forged = text.replace("\"refcount\": 2", "\"refcount\": 7");
    assert_ne!(text, forged);
    std::fs::write(&index_path, forged).unwrap();
    drop(vault);

    let vault = Vault::open(&root, sietch::AccessMode::ReadWrite, None).unwrap();
    let status = vault.optimize(&abort).unwrap();
    assert_eq!(status.corrected_refcounts, 2);

    // back to the true counts
    let stats = vault.dedup_stats();
    assert_eq!(stats.saved_space, data.len() as u64);

    cleanup(&root);
}
