//! The vault descriptor document.
//!
//! Stored as pretty-printed JSON at the vault root; key order follows
//! the struct definition, so rewrites are stable and diffable. All
//! writes go through a transaction's staged write, never a direct
//! overwrite.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sietch_api_types::{
    ChunkingPolicy, CipherSuite, CompressionAlgorithm, DedupPolicy, Error, Result, VaultMetadata,
};
use sietch_key_config::KeyDerivationConfig;

use crate::layout::VaultLayout;
use crate::transaction::Transaction;

/// Current descriptor schema version.
pub const VAULT_SCHEMA_VERSION: u32 = 2;

/// Encryption section of the descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EncryptionPolicy {
    pub cipher: CipherSuite,
    pub passphrase_protected: bool,
    /// KDF parameters, present on passphrase protected vaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub kdf: Option<KeyDerivationConfig>,
    /// Key check value: a constant encrypted at init, verified before
    /// any data decrypt.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub key_check: Option<String>,
}

/// Sync identity section; consumed by the peer-to-peer layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncIdentityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub public_key_path: Option<String>,
    #[serde(default)]
    pub trusted_peers: Vec<String>,
}

/// One per vault, stored at the vault root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VaultDescriptor {
    /// Stable opaque vault identifier.
    pub vault_id: String,
    pub name: String,
    pub created: i64,
    pub schema_version: u32,
    pub encryption: EncryptionPolicy,
    pub chunking: ChunkingPolicy,
    pub compression: CompressionAlgorithm,
    pub dedup: DedupPolicy,
    #[serde(default)]
    pub metadata: VaultMetadata,
    #[serde(default)]
    pub sync: SyncIdentityConfig,
}

impl VaultDescriptor {
    /// Load the descriptor, migrating older schema versions in memory.
    pub fn load(layout: &VaultLayout) -> Result<Self> {
        let path = layout.descriptor_path();

        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotInitialized(layout.root().to_owned()))
            }
            Err(err) => return Err(Error::io(&path, err)),
        };

        let mut document: Value =
            serde_json::from_slice(&raw).map_err(|err| Error::format(&path, err))?;

        let found = document["schema-version"].as_u64().unwrap_or(0) as u32;
        if found > VAULT_SCHEMA_VERSION {
            return Err(Error::SchemaTooNew {
                found,
                supported: VAULT_SCHEMA_VERSION,
            });
        }
        if found < VAULT_SCHEMA_VERSION {
            migrate(&mut document, found);
        }

        serde_json::from_value(document).map_err(|err| Error::format(&path, err))
    }

    /// Serialize with stable key order and two-space indentation.
    pub fn to_document(&self) -> Result<Vec<u8>> {
        let mut data = serde_json::to_vec_pretty(self)
            .map_err(|err| Error::format(VaultLayout::descriptor_rel_path(), err))?;
        data.push(b'\n');
        Ok(data)
    }

    /// Stage the descriptor into `txn`; visible after commit.
    pub fn stage_store(&self, txn: &mut Transaction) -> Result<()> {
        txn.stage_write(&VaultLayout::descriptor_rel_path(), &self.to_document()?)
    }
}

/// In-memory migration of older descriptor documents.
fn migrate(document: &mut Value, from: u32) {
    if from < 2 {
        // schema 1 had no compression policy and no gc threshold
        if document.get("compression").is_none() {
            document["compression"] = Value::String("none".into());
        }
        if let Some(dedup) = document.get_mut("dedup") {
            if dedup.get("gc-threshold").is_none() {
                dedup["gc-threshold"] = Value::from(100u64);
            }
        }
    }
    document["schema-version"] = Value::from(VAULT_SCHEMA_VERSION);
}

/// Generate a fresh opaque vault id.
pub fn generate_vault_id() -> Result<String> {
    let mut raw = [0u8; 16];
    sietch_tools::crypt_config::fill_with_random_data(&mut raw)?;
    Ok(hex::encode(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sietch_api_types::{ChunkingStrategy, HashAlgorithm};

    fn descriptor() -> VaultDescriptor {
        VaultDescriptor {
            vault_id: "cafebabe".into(),
            name: "test".into(),
            created: 1_700_000_000,
            schema_version: VAULT_SCHEMA_VERSION,
            encryption: EncryptionPolicy {
                cipher: CipherSuite::AesGcm,
                passphrase_protected: false,
                kdf: None,
                key_check: None,
            },
            chunking: ChunkingPolicy {
                strategy: ChunkingStrategy::Fixed,
                chunk_size: 4 * 1024 * 1024,
                hash_algorithm: HashAlgorithm::Sha256,
            },
            compression: CompressionAlgorithm::Zstd,
            dedup: DedupPolicy::default(),
            metadata: VaultMetadata::default(),
            sync: SyncIdentityConfig::default(),
        }
    }

    #[test]
    fn test_descriptor_document_roundtrip() {
        let desc = descriptor();
        let data = desc.to_document().unwrap();
        let text = std::str::from_utf8(&data).unwrap();
        assert!(text.starts_with("{\n  \"vault-id\""));

        let back: VaultDescriptor = serde_json::from_str(text).unwrap();
        assert_eq!(back.vault_id, desc.vault_id);
        assert_eq!(back.compression, CompressionAlgorithm::Zstd);
    }

    #[test]
    fn test_schema_too_new_is_rejected() {
        let dir = std::env::temp_dir().join(format!("sietch-config-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let layout = VaultLayout::create(dir.clone()).unwrap();

        let mut doc = serde_json::to_value(descriptor()).unwrap();
        doc["schema-version"] = Value::from(VAULT_SCHEMA_VERSION + 1);
        std::fs::write(
            layout.descriptor_path(),
            serde_json::to_vec_pretty(&doc).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            VaultDescriptor::load(&layout),
            Err(Error::SchemaTooNew { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_schema_migration_fills_defaults() {
        let dir = std::env::temp_dir().join(format!("sietch-migrate-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let layout = VaultLayout::create(dir.clone()).unwrap();

        let mut doc = serde_json::to_value(descriptor()).unwrap();
        doc["schema-version"] = Value::from(1u64);
        doc.as_object_mut().unwrap().remove("compression");
        std::fs::write(
            layout.descriptor_path(),
            serde_json::to_vec_pretty(&doc).unwrap(),
        )
        .unwrap();

        let loaded = VaultDescriptor::load(&layout).unwrap();
        assert_eq!(loaded.schema_version, VAULT_SCHEMA_VERSION);
        assert_eq!(loaded.compression, CompressionAlgorithm::None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_descriptor_is_not_initialized() {
        let dir = std::env::temp_dir().join(format!("sietch-noinit-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let layout = VaultLayout::create(dir.clone()).unwrap();

        assert!(matches!(
            VaultDescriptor::load(&layout),
            Err(Error::NotInitialized(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
