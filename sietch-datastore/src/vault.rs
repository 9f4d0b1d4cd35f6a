//! The vault handle and the public file pipeline.
//!
//! A [`Vault`] value is created at the entry points and passed into
//! every operation; there is no ambient "current vault" state. Opening
//! for write acquires the single-writer lock and runs a recovery pass
//! over the transaction journals; read-only handles observe published
//! state without locking.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sietch_api_types::{
    check_passphrase_strength, ChunkingPolicy, ChunkingStrategy, CipherSuite,
    CompressionAlgorithm, DedupPolicy, DedupStats, Error, GcStatus, HashAlgorithm, Result,
    SortKey, VaultMetadata,
};
use sietch_key_config::{create_key_check, verify_key_check, Kdf, KeyConfig, SyncIdentity};
use sietch_tools::{AbortFlag, CryptConfig, VaultLock};

use crate::chunk_store::ChunkStore;
use crate::chunker::ChunkStream;
use crate::dedup_index::DedupIndex;
use crate::gc;
use crate::layout::VaultLayout;
use crate::manifest::{ChunkRef, FileManifest};
use crate::manifest_store::ManifestStore;
use crate::pipeline;
use crate::transaction::{
    recover_all, RecoveryReport, Transaction, TransactionMeta, DEFAULT_JOURNAL_RETENTION,
};
use crate::vault_config::{
    generate_vault_id, EncryptionPolicy, SyncIdentityConfig, VaultDescriptor,
    VAULT_SCHEMA_VERSION,
};

const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Retries per chunk on transient read errors during `get`.
const GET_CHUNK_RETRIES: usize = 2;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// Parameters for `Vault::create`.
pub struct CreateParams {
    pub name: String,
    pub cipher: CipherSuite,
    pub kdf: Kdf,
    pub passphrase: Option<String>,
    pub chunking: ChunkingPolicy,
    pub compression: CompressionAlgorithm,
    pub dedup: DedupPolicy,
    pub metadata: VaultMetadata,
    pub force: bool,
}

impl CreateParams {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            cipher: CipherSuite::AesGcm,
            kdf: Kdf::Scrypt,
            passphrase: None,
            chunking: ChunkingPolicy::default(),
            compression: CompressionAlgorithm::Zstd,
            dedup: DedupPolicy::default(),
            metadata: VaultMetadata::default(),
            force: false,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct GetOptions {
    /// Overwrite an existing output file.
    pub force: bool,
    /// Write the stored blob bytes without decrypting.
    pub skip_decryption: bool,
    /// Skip the per-chunk hash comparison.
    pub skip_verification: bool,
}

#[derive(Debug, Default, Clone)]
pub struct DeleteOptions {
    /// Keep all chunks; only the manifest goes away.
    pub keep_chunks: bool,
}

/// Per-file verification outcome of `Vault::verify`.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub files_ok: u64,
    pub failures: Vec<(String, String)>,
}

pub struct Vault {
    layout: VaultLayout,
    descriptor: VaultDescriptor,
    chunk_store: ChunkStore,
    manifest_store: ManifestStore,
    crypt: Option<Arc<CryptConfig>>,
    index: Mutex<DedupIndex>,
    lock: Option<VaultLock>,
}

impl Vault {
    /// Initialize a new vault at `root` and return a writer handle.
    pub fn create(root: &Path, params: CreateParams) -> Result<Self> {
        params.chunking.validate()?;

        let layout = VaultLayout::create(root.to_owned())?;
        if layout.descriptor_path().exists() && !params.force {
            return Err(Error::InvalidInput(format!(
                "vault at {root:?} is already initialized (use force to overwrite)"
            )));
        }

        let lock = VaultLock::acquire(layout.lock_path(), LOCK_TIMEOUT)?;

        // key material
        let mut kdf_config = None;
        let mut key_check = None;
        let crypt = if params.cipher.is_encrypted() {
            let key = match &params.passphrase {
                Some(passphrase) => {
                    check_passphrase_strength(passphrase)?;
                    let (key, key_config) =
                        KeyConfig::new(passphrase.as_bytes(), params.kdf, params.cipher)?;
                    kdf_config = key_config.kdf.clone();
                    key_config
                        .store(layout.keys_dir().join(sietch_key_config::VAULT_KEY_NAME), params.force)?;
                    key
                }
                None => {
                    let mut key = [0u8; 32];
                    sietch_tools::crypt_config::fill_with_random_data(&mut key)?;
                    let key_config = KeyConfig::without_password(key, params.cipher)?;
                    key_config
                        .store(layout.keys_dir().join(sietch_key_config::VAULT_KEY_NAME), params.force)?;
                    key
                }
            };

            let config = CryptConfig::new(key, params.cipher)?;
            key_check = Some(create_key_check(&config)?);
            Some(Arc::new(config))
        } else {
            None
        };

        let identity = SyncIdentity::generate(&layout.keys_dir())?;

        let descriptor = VaultDescriptor {
            vault_id: generate_vault_id()?,
            name: params.name,
            created: sietch_tools::epoch_i64(),
            schema_version: VAULT_SCHEMA_VERSION,
            encryption: EncryptionPolicy {
                cipher: params.cipher,
                passphrase_protected: params.passphrase.is_some(),
                kdf: kdf_config,
                key_check,
            },
            chunking: params.chunking,
            compression: params.compression,
            dedup: params.dedup,
            metadata: params.metadata,
            sync: SyncIdentityConfig {
                private_key_path: Some(
                    identity.private_key_path.to_string_lossy().into_owned(),
                ),
                public_key_path: Some(identity.public_key_path.to_string_lossy().into_owned()),
                trusted_peers: Vec::new(),
            },
        };

        let mut txn = Transaction::begin(&layout, TransactionMeta::new("init", &descriptor.name))?;
        descriptor.stage_store(&mut txn)?;
        txn.commit()?;

        log::info!("initialized vault '{}' at {root:?}", descriptor.name);

        Ok(Self {
            chunk_store: ChunkStore::open(&layout)?,
            manifest_store: ManifestStore::open(&layout)?,
            crypt,
            index: Mutex::new(DedupIndex::default()),
            lock: Some(lock),
            descriptor,
            layout,
        })
    }

    /// Open the vault containing `start`.
    ///
    /// Writer handles take the single-writer lock and run journal
    /// recovery first, so every operation starts from a consistent
    /// tree. `passphrase` is only invoked for passphrase protected
    /// vaults.
    pub fn open(
        start: &Path,
        mode: AccessMode,
        passphrase: Option<&dyn Fn() -> Result<String>>,
    ) -> Result<Self> {
        let layout = VaultLayout::discover(start)?;
        layout.check_permissions()?;

        let lock = match mode {
            AccessMode::ReadWrite => Some(VaultLock::acquire(layout.lock_path(), LOCK_TIMEOUT)?),
            AccessMode::ReadOnly => None,
        };

        if lock.is_some() {
            let report = recover_all(&layout, DEFAULT_JOURNAL_RETENTION)?;
            if report.rolled_back + report.replayed > 0 {
                log::info!(
                    "journal recovery: {} rolled back, {} replayed",
                    report.rolled_back,
                    report.replayed
                );
            }
        }

        let descriptor = VaultDescriptor::load(&layout)?;

        let crypt = if descriptor.encryption.cipher.is_encrypted() {
            let key_path = layout.keys_dir().join(sietch_key_config::VAULT_KEY_NAME);
            let key_config = KeyConfig::load(&key_path)?;

            let key = if key_config.kdf.is_some() {
                let provider = passphrase.ok_or_else(|| {
                    Error::InvalidInput(
                        "vault is passphrase protected - a passphrase is required".into(),
                    )
                })?;
                key_config.decrypt(
                    &|| provider().map(|p| p.into_bytes()),
                    descriptor.encryption.cipher,
                )?
            } else {
                key_config.decrypt(&|| Ok(Vec::new()), descriptor.encryption.cipher)?
            };

            let config = CryptConfig::new(key, descriptor.encryption.cipher)?;
            if let Some(ref check) = descriptor.encryption.key_check {
                verify_key_check(&config, check)?;
            }
            Some(Arc::new(config))
        } else {
            None
        };

        let index = DedupIndex::load(&layout)?;

        Ok(Self {
            chunk_store: ChunkStore::open(&layout)?,
            manifest_store: ManifestStore::open(&layout)?,
            crypt,
            index: Mutex::new(index),
            lock,
            descriptor,
            layout,
        })
    }

    pub fn descriptor(&self) -> &VaultDescriptor {
        &self.descriptor
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }

    fn require_writer(&self) -> Result<()> {
        if self.lock.is_none() {
            return Err(Error::InvalidInput(
                "operation requires a writable vault handle".into(),
            ));
        }
        Ok(())
    }

    fn use_index(&self) -> bool {
        self.descriptor.dedup.enabled && self.descriptor.dedup.index_enabled
    }

    /// Ingest one file.
    ///
    /// Streams the source through chunking, compression, encryption
    /// and dedup lookup, then commits blobs, index and manifest in one
    /// transaction. Any error before the commit leaves the vault
    /// untouched.
    pub fn add(
        &self,
        source: &Path,
        destination: &str,
        tags: &[String],
        abort: &AbortFlag,
    ) -> Result<FileManifest> {
        self.require_writer()?;

        let metadata = std::fs::metadata(source).map_err(|err| Error::io(source, err))?;
        if !metadata.is_file() {
            return Err(Error::InvalidInput(format!(
                "{source:?} is not a regular file"
            )));
        }
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("{source:?} has no usable file name")))?
            .to_string();
        let dir = destination.trim_matches('/').to_string();

        let mut txn = Transaction::begin(
            &self.layout,
            TransactionMeta::new("add", format!("{dir}/{file_name}")),
        )?;

        match self.add_staged(&mut txn, source, &dir, destination, file_name, mtime, tags, abort) {
            Ok((manifest, work_index)) => {
                txn.commit()?;
                *self.index.lock().unwrap() = work_index;
                log::info!(
                    "added '{}' ({} chunks, {} bytes)",
                    manifest.vault_path(),
                    manifest.chunks.len(),
                    manifest.size
                );
                Ok(manifest)
            }
            Err(err) => {
                let _ = txn.rollback();
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_staged(
        &self,
        txn: &mut Transaction,
        source: &Path,
        dir: &str,
        destination: &str,
        file_name: String,
        mtime: i64,
        tags: &[String],
        abort: &AbortFlag,
    ) -> Result<(FileManifest, DedupIndex)> {
        let chunking = &self.descriptor.chunking;
        let dedup = &self.descriptor.dedup;
        let use_index = self.use_index();

        let file = std::fs::File::open(source).map_err(|err| Error::io(source, err))?;
        let reader = std::io::BufReader::new(file);
        let stream = match chunking.strategy {
            ChunkingStrategy::Fixed => {
                ChunkStream::fixed(reader, source.to_owned(), chunking.chunk_size)
            }
            ChunkingStrategy::Cdc => ChunkStream::content_defined(
                reader,
                source.to_owned(),
                chunking.chunk_size,
                dedup.min_chunk_size,
                dedup.max_chunk_size,
            ),
        };

        let mut work_index = self.index.lock().unwrap().clone();
        let mut chunks: Vec<ChunkRef> = Vec::new();
        let mut total_size = 0u64;
        let compression = self.descriptor.compression;
        let encrypted = self.crypt.is_some();

        {
            let chunk_store = &self.chunk_store;
            let work_index = &mut work_index;
            let chunks = &mut chunks;
            let total_size = &mut total_size;
            let txn_ref = &mut *txn;

            pipeline::process_chunks(
                stream,
                self.crypt.clone(),
                compression,
                chunking.hash_algorithm,
                abort,
                move |outcome| {
                    *total_size += outcome.plaintext_size;

                    // a duplicate chunk must reference the blob that is
                    // already on disk, not this encoding of it (the
                    // fresh nonce gives it a different ciphertext hash)
                    let (blob_id, store_blob) = if use_index {
                        let was_duplicate = work_index.process_chunk(
                            &outcome.digest,
                            outcome.blob_id(),
                            outcome.plaintext_size,
                            outcome.encrypted_size,
                        );
                        let entry = work_index.resolve(&outcome.digest).unwrap();
                        (entry.blob_id.clone(), !was_duplicate)
                    } else {
                        (outcome.blob_id().to_string(), true)
                    };
                    if store_blob {
                        chunk_store.stage_insert(&blob_id, &outcome.blob, txn_ref)?;
                    }

                    chunks.push(ChunkRef {
                        index: outcome.index as u32,
                        hash: outcome.digest.clone(),
                        encrypted_hash: encrypted.then(|| blob_id.clone()),
                        plaintext_size: outcome.plaintext_size,
                        encrypted_size: outcome.encrypted_size,
                        compressed: outcome.compressed,
                        compression: if outcome.compressed {
                            compression
                        } else {
                            CompressionAlgorithm::None
                        },
                        nonce: None,
                    });
                    Ok(())
                },
            )?;
        }

        let manifest = FileManifest {
            file_name,
            dir: dir.to_string(),
            size: total_size,
            mtime,
            destination: destination.to_string(),
            chunks,
            added_at: sietch_tools::epoch_i64(),
            tags: tags.to_vec(),
        };

        // replace-only: adding over an existing path releases the old
        // manifest's references after the new ones are counted
        if let Ok(old) = self.manifest_store.load(&manifest.manifest_name()) {
            if use_index {
                for chunk in &old.chunks {
                    if let Some(blob_id) = work_index.release_chunk(&chunk.hash) {
                        self.chunk_store.stage_remove(&blob_id, txn)?;
                    }
                }
            }
        }

        self.manifest_store.stage_store(&manifest, txn)?;
        work_index.stage_store(txn)?;

        Ok((manifest, work_index))
    }

    /// Reassemble one file into `output`.
    pub fn get(
        &self,
        vault_path: &str,
        output: &Path,
        options: &GetOptions,
        abort: &AbortFlag,
    ) -> Result<()> {
        let (_, manifest) = self.manifest_store.find(vault_path)?;

        if output.exists() && !options.force {
            return Err(Error::InvalidInput(format!(
                "refusing to overwrite existing {output:?} (use force)"
            )));
        }

        let mut writer =
            std::fs::File::create(output).map_err(|err| Error::io(output, err))?;

        let result = self.restore_chunks(&manifest, &mut writer, options, abort);
        drop(writer);
        if result.is_err() {
            // never leave a torn output file behind
            let _ = std::fs::remove_file(output);
        }
        result
    }

    fn restore_chunks(
        &self,
        manifest: &FileManifest,
        writer: &mut dyn Write,
        options: &GetOptions,
        abort: &AbortFlag,
    ) -> Result<()> {
        let hash_algorithm = self.descriptor.chunking.hash_algorithm;
        let index = self.index.lock().unwrap();

        for chunk in &manifest.chunks {
            abort.check()?;

            let blob_id = index
                .resolve(&chunk.hash)
                .map(|entry| entry.blob_id.clone())
                .unwrap_or_else(|| chunk.blob_id().to_string());

            let mut attempt = 0;
            let data = loop {
                match self.read_chunk(chunk, &blob_id, options, hash_algorithm) {
                    Ok(data) => break data,
                    Err(err @ (Error::Io { .. } | Error::IntegrityFailure { .. }))
                        if attempt + 1 < GET_CHUNK_RETRIES =>
                    {
                        // transient read errors deserve one more look;
                        // a stable mismatch fails on the retry
                        log::warn!(
                            "retrying chunk {} of '{}' after: {err}",
                            chunk.index,
                            manifest.vault_path()
                        );
                        attempt += 1;
                    }
                    Err(err) => return Err(err),
                }
            };

            writer
                .write_all(&data)
                .map_err(|err| Error::io(manifest.vault_path(), err))?;
        }

        writer
            .flush()
            .map_err(|err| Error::io(manifest.vault_path(), err))?;
        Ok(())
    }

    fn read_chunk(
        &self,
        chunk: &ChunkRef,
        blob_id: &str,
        options: &GetOptions,
        hash_algorithm: HashAlgorithm,
    ) -> Result<Vec<u8>> {
        let blob = self.chunk_store.get(blob_id)?;

        if options.skip_decryption {
            // raw blob bytes; verify against the ciphertext hash when
            // the manifest carries one
            let raw = blob.into_inner();
            if !options.skip_verification {
                if let Some(ref expected) = chunk.encrypted_hash {
                    let digest = hex::encode(pipeline::hash_chunk(hash_algorithm, &raw));
                    if &digest != expected {
                        return Err(Error::IntegrityFailure {
                            digest: expected.clone(),
                        });
                    }
                }
            }
            return Ok(raw);
        }

        let compressed = chunk.compressed.then_some(chunk.compression);
        let data = blob.decode(self.crypt.as_deref(), compressed)?;

        if !options.skip_verification {
            let digest = hex::encode(pipeline::hash_chunk(hash_algorithm, &data));
            if digest != chunk.hash {
                return Err(Error::IntegrityFailure {
                    digest: chunk.hash.clone(),
                });
            }
            if data.len() as u64 != chunk.plaintext_size {
                return Err(Error::IntegrityFailure {
                    digest: chunk.hash.clone(),
                });
            }
        }

        Ok(data)
    }

    /// Remove one file.
    ///
    /// Blob deletions are staged only for chunks whose refcount drops
    /// to zero; shared chunks survive. Retrying a delete fails with
    /// *ManifestNotFound* because the manifest is already gone.
    pub fn delete(&self, vault_path: &str, options: &DeleteOptions) -> Result<()> {
        self.require_writer()?;

        let (name, manifest) = self.manifest_store.find(vault_path)?;
        let use_index = self.use_index();

        let mut txn = Transaction::begin(
            &self.layout,
            TransactionMeta::new("delete", manifest.vault_path()),
        )?;

        let staged = (|| -> Result<DedupIndex> {
            let mut work_index = self.index.lock().unwrap().clone();

            self.manifest_store.stage_delete(&name, &mut txn)?;

            if !options.keep_chunks && use_index {
                for chunk in &manifest.chunks {
                    if let Some(blob_id) = work_index.release_chunk(&chunk.hash) {
                        self.chunk_store.stage_remove(&blob_id, &mut txn)?;
                    }
                }
            }

            work_index.record_deletes(1);
            work_index.stage_store(&mut txn)?;
            Ok(work_index)
        })();

        match staged {
            Ok(work_index) => {
                txn.commit()?;
                *self.index.lock().unwrap() = work_index;
                log::info!("deleted '{}'", manifest.vault_path());
            }
            Err(err) => {
                let _ = txn.rollback();
                return Err(err);
            }
        }

        self.run_scheduled_gc();
        Ok(())
    }

    /// List manifests, optionally filtered by destination prefix.
    pub fn list(&self, prefix: Option<&str>, sort: SortKey) -> Result<Vec<FileManifest>> {
        let mut result: Vec<FileManifest> = self
            .manifest_store
            .load_all()?
            .into_iter()
            .map(|(_, manifest)| manifest)
            .filter(|manifest| match prefix {
                Some(prefix) => manifest.full_path().starts_with(prefix.trim_end_matches('/')),
                None => true,
            })
            .collect();

        match sort {
            SortKey::Name => result.sort_by(|a, b| a.file_name.cmp(&b.file_name)),
            SortKey::Size => result.sort_by(|a, b| b.size.cmp(&a.size)),
            SortKey::Time => result.sort_by(|a, b| b.added_at.cmp(&a.added_at)),
            SortKey::Path => result.sort_by(|a, b| a.full_path().cmp(&b.full_path())),
        }

        Ok(result)
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.index.lock().unwrap().stats()
    }

    /// Index-driven GC; falls back to a manifest scan when the index
    /// is disabled.
    pub fn gc(&self, abort: &AbortFlag) -> Result<GcStatus> {
        self.require_writer()?;
        let mut index = self.index.lock().unwrap();
        if self.use_index() {
            gc::index_driven_gc(&self.layout, &self.chunk_store, &mut index)
        } else {
            gc::scan_driven_gc(
                &self.layout,
                &self.chunk_store,
                &self.manifest_store,
                &mut index,
                false,
                abort,
            )
        }
    }

    /// Authoritative scan-driven GC: rebuild reachability, reconcile
    /// refcounts, sweep unreferenced blobs.
    pub fn optimize(&self, abort: &AbortFlag) -> Result<GcStatus> {
        self.require_writer()?;
        let mut index = self.index.lock().unwrap();
        gc::scan_driven_gc(
            &self.layout,
            &self.chunk_store,
            &self.manifest_store,
            &mut index,
            self.use_index(),
            abort,
        )
    }

    fn run_scheduled_gc(&self) {
        let due = {
            let index = self.index.lock().unwrap();
            index.gc_due(self.descriptor.dedup.gc_threshold)
        };
        if !due {
            return;
        }

        log::info!("delete threshold reached, running scheduled gc");
        let abort = AbortFlag::new();
        if let Err(err) = self.optimize(&abort) {
            // the delete itself already committed; reclaim later
            log::warn!("scheduled gc failed: {err}");
        }
    }

    /// Verify every file end to end: blob presence, CRC, decrypt,
    /// decompress, hash comparison.
    pub fn verify(&self, abort: &AbortFlag) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let options = GetOptions::default();

        for (_, manifest) in self.manifest_store.load_all()? {
            abort.check()?;

            let mut sink = std::io::sink();
            match self.restore_chunks(&manifest, &mut sink, &options, abort) {
                Ok(()) => report.files_ok += 1,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    report
                        .failures
                        .push((manifest.vault_path(), err.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Replay or roll back pending journals, purge committed ones
    /// older than `retention`.
    pub fn recover(&self, retention: Option<Duration>) -> Result<RecoveryReport> {
        self.require_writer()?;
        let report = recover_all(
            &self.layout,
            retention.unwrap_or(DEFAULT_JOURNAL_RETENTION),
        )?;

        // replayed transactions may have changed the index document
        *self.index.lock().unwrap() = DedupIndex::load(&self.layout)?;
        Ok(report)
    }

    /// Apply a config mutation to the descriptor and persist it.
    pub fn update_descriptor<F>(&mut self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut VaultDescriptor),
    {
        self.require_writer()?;

        let mut updated = self.descriptor.clone();
        mutate(&mut updated);
        updated.schema_version = VAULT_SCHEMA_VERSION;

        let mut txn =
            Transaction::begin(&self.layout, TransactionMeta::new("config", &updated.name))?;
        updated.stage_store(&mut txn)?;
        txn.commit()?;

        self.descriptor = updated;
        Ok(())
    }
}
