#![allow(dead_code)]

use std::path::PathBuf;

use sietch::{
    ChunkingPolicy, ChunkingStrategy, CipherSuite, CompressionAlgorithm, CreateParams,
    DedupPolicy, HashAlgorithm, Vault,
};

/// Fresh (removed) directory for one test vault.
pub fn test_root(name: &str) -> PathBuf {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = std::env::temp_dir().join(format!("sietch-it-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// Create params scaled down for tests: 4 KiB chunks so a few tens of
/// kilobytes already exercise the multi-chunk paths.
pub fn small_chunk_params(
    cipher: CipherSuite,
    compression: CompressionAlgorithm,
    strategy: ChunkingStrategy,
    hash: HashAlgorithm,
) -> CreateParams {
    let mut params = CreateParams::new("it-vault");
    params.cipher = cipher;
    params.compression = compression;
    params.chunking = ChunkingPolicy {
        strategy,
        chunk_size: 4096,
        hash_algorithm: hash,
    };
    params.dedup = DedupPolicy {
        enabled: true,
        min_chunk_size: 1024,
        max_chunk_size: 16 * 1024,
        gc_threshold: 100,
        index_enabled: true,
    };
    params
}

/// Deterministic, non-repeating payload; distinct at every chunk
/// offset so fixed chunking yields unique chunks.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7919) % 251) as u8).collect()
}

/// Write a source file outside the vault tree.
pub fn write_source(root: &std::path::Path, name: &str, data: &[u8]) -> PathBuf {
    let dir = root.with_file_name(format!(
        "{}-src",
        root.file_name().unwrap().to_string_lossy()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Number of blobs currently on disk.
pub fn blob_count(vault: &Vault) -> usize {
    std::fs::read_dir(vault.layout().chunks_dir())
        .unwrap()
        .filter(|entry| entry.as_ref().unwrap().file_type().unwrap().is_file())
        .count()
}

/// Remove the vault and its source directory.
pub fn cleanup(root: &std::path::Path) {
    let _ = std::fs::remove_dir_all(root);
    let src = root.with_file_name(format!(
        "{}-src",
        root.file_name().unwrap().to_string_lossy()
    ));
    let _ = std::fs::remove_dir_all(src);
}
