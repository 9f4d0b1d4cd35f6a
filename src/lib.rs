//! Sietch - a local, offline-first encrypted vault.
//!
//! Files are split into content-addressed chunks, compressed,
//! encrypted and deduplicated on disk; per-file manifests record how
//! to reassemble and verify them. This crate is the caller-facing
//! layer over the storage core in `sietch-datastore`: it resolves
//! passphrase sources and drives batched operations the way the CLI
//! and the sync layer consume them.

pub mod ops;
pub mod passphrase;

pub use sietch_api_types::{
    check_passphrase_strength, ChunkingPolicy, ChunkingStrategy, CipherSuite,
    CompressionAlgorithm, DedupPolicy, DedupStats, Error, GcStatus, HashAlgorithm, Result,
    SortKey, VaultMetadata,
};
pub use sietch_datastore::{
    AccessMode, CreateParams, DeleteOptions, FileManifest, GetOptions, RecoveryReport, Vault,
    VaultDescriptor, VaultLayout, VerifyReport,
};
pub use sietch_key_config::Kdf;
pub use sietch_tools::AbortFlag;
