//! Shared types for the sietch vault crates.
//!
//! This crate defines the policy vocabulary stored in the vault
//! descriptor (cipher suite, chunking, compression, deduplication),
//! the statistics structures reported by the dedup index and the
//! garbage collector, and the error taxonomy every vault operation
//! returns.

mod crypto;
mod error;
mod passphrase;
mod policy;

pub use crypto::{CipherSuite, Fingerprint, HashAlgorithm};
pub use error::{Error, Result};
pub use passphrase::check_passphrase_strength;
pub use policy::{
    ChunkingPolicy, ChunkingStrategy, CompressionAlgorithm, DedupPolicy, DedupStats, GcStatus,
    SortKey, VaultMetadata,
};
