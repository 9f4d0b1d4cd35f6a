//! This crate implements the vault storage and access layer.
//!
//! # Data formats
//!
//! Sietch splits user files into chunks and stores them deduplicated
//! in a content addressable chunk directory. Each chunk is compressed,
//! encrypted per the vault policy and written as a blob named by its
//! content hash.
//!
//! Every logical file is described by a manifest document listing its
//! chunks in order, with the plaintext hash of each chunk serving both
//! as deduplication key and as integrity witness on reassembly.
//!
//! A persistent dedup index maps plaintext hashes to blob ids and
//! reference counts, so chunks shared between files survive partial
//! deletes.
//!
//! # Crash safety
//!
//! Multi-file mutations (blobs + index + manifest) go through a
//! journal based transaction: all writes are staged and fsynced below
//! `.sietch/txn/<id>/`, then published with atomic renames. A crash
//! before the journal reaches the `committing` state rolls back; a
//! crash after it is replayed idempotently by the recovery pass that
//! runs on every writable open.
//!
//! # Garbage collection
//!
//! Deleting a file drops chunk references; blobs are removed in the
//! same transaction once their refcount reaches zero. The scan-driven
//! collector additionally rebuilds the reachable set from all
//! manifests, corrects refcount drift and sweeps orphaned blobs, so
//! leftovers of interrupted transactions never accumulate.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod chunk_store;
pub mod chunker;
pub mod data_blob;
pub mod dedup_index;
pub mod file_formats;
pub mod gc;
pub mod layout;
pub mod manifest;
pub mod manifest_store;
pub mod pipeline;
pub mod transaction;
pub mod vault_config;

pub use chunk_store::ChunkStore;
pub use chunker::{ChunkStream, Chunker};
pub use data_blob::DataBlob;
pub use dedup_index::{DedupEntry, DedupIndex};
pub use layout::VaultLayout;
pub use manifest::{ChunkRef, FileManifest};
pub use manifest_store::ManifestStore;
pub use transaction::{RecoveryReport, Transaction, TransactionMeta};
pub use vault_config::{EncryptionPolicy, VaultDescriptor};

mod vault;
pub use vault::{
    AccessMode, CreateParams, DeleteOptions, GetOptions, Vault, VerifyReport,
};
