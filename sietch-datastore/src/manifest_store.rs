//! Manifest persistence under `.sietch/manifests/`.

use std::path::PathBuf;

use sietch_api_types::{Error, Result};

use crate::layout::{VaultLayout, SIETCH_DIR_NAME};
use crate::manifest::{FileManifest, MANIFEST_EXTENSION};
use crate::transaction::Transaction;

/// Vault-root relative path of a manifest document.
pub fn manifest_rel_path(name: &str) -> String {
    format!("{SIETCH_DIR_NAME}/manifests/{name}")
}

pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub fn open(layout: &VaultLayout) -> Result<Self> {
        let dir = layout.manifests_dir();
        if let Err(err) = std::fs::metadata(&dir) {
            return Err(Error::io(&dir, err));
        }
        Ok(Self { dir })
    }

    /// Names of all manifest documents, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let names = sietch_tools::fs::read_dir_file_names(&self.dir)?;
        Ok(names
            .into_iter()
            .filter(|name| name.ends_with(MANIFEST_EXTENSION))
            .collect())
    }

    /// Load one manifest by document name.
    pub fn load(&self, name: &str) -> Result<FileManifest> {
        let path = self.dir.join(name);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ManifestNotFound(name.to_string()))
            }
            Err(err) => return Err(Error::io(&path, err)),
        };

        let manifest: FileManifest =
            serde_json::from_slice(&raw).map_err(|err| Error::format(&path, err))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load every manifest, in document name order.
    pub fn load_all(&self) -> Result<Vec<(String, FileManifest)>> {
        let mut result = Vec::new();
        for name in self.list()? {
            result.push((name.clone(), self.load(&name)?));
        }
        Ok(result)
    }

    /// Resolve a user supplied path to one manifest.
    ///
    /// Tries the match strategies in order - full destination+path,
    /// exact path, basename of the stored path, basename of the full
    /// path - and returns the first hit of the best strategy.
    pub fn find(&self, query: &str) -> Result<(String, FileManifest)> {
        let all = self.load_all()?;

        let mut best: Option<(u8, String, FileManifest)> = None;
        for (name, manifest) in all {
            if let Some(strategy) = manifest.match_strategy(query) {
                match &best {
                    Some((found, _, _)) if *found <= strategy => (),
                    _ => best = Some((strategy, name, manifest)),
                }
            }
        }

        match best {
            Some((_, name, manifest)) => Ok((name, manifest)),
            None => Err(Error::ManifestNotFound(query.to_string())),
        }
    }

    /// Stage a manifest document write.
    pub fn stage_store(&self, manifest: &FileManifest, txn: &mut Transaction) -> Result<()> {
        manifest.validate()?;
        txn.stage_write(
            &manifest_rel_path(&manifest.manifest_name()),
            &manifest.to_document()?,
        )
    }

    /// Stage a manifest document removal.
    pub fn stage_delete(&self, name: &str, txn: &mut Transaction) -> Result<()> {
        txn.stage_delete(&manifest_rel_path(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionMeta;
    use sietch_api_types::CompressionAlgorithm;
    use crate::manifest::ChunkRef;

    fn test_layout(name: &str) -> VaultLayout {
        let dir =
            std::env::temp_dir().join(format!("sietch-mstore-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        VaultLayout::create(dir).unwrap()
    }

    fn manifest(dir: &str, file_name: &str) -> FileManifest {
        FileManifest {
            file_name: file_name.into(),
            dir: dir.into(),
            size: 4,
            mtime: 1,
            destination: dir.into(),
            chunks: vec![ChunkRef {
                index: 0,
                hash: "ab".repeat(32),
                encrypted_hash: None,
                plaintext_size: 4,
                encrypted_size: 4,
                compressed: false,
                compression: CompressionAlgorithm::None,
                nonce: None,
            }],
            added_at: 2,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_store_load_find_delete() {
        let layout = test_layout("roundtrip");
        let store = ManifestStore::open(&layout).unwrap();

        let a = manifest("docs", "report.pdf");
        let b = manifest("archive", "report.pdf");

        let mut txn = Transaction::begin(&layout, TransactionMeta::new("test", "add")).unwrap();
        store.stage_store(&a, &mut txn).unwrap();
        store.stage_store(&b, &mut txn).unwrap();
        txn.commit().unwrap();

        // both survive despite the shared basename
        assert_eq!(store.list().unwrap().len(), 2);

        let (_, found) = store.find("docs/report.pdf").unwrap();
        assert_eq!(found.dir, "docs");

        // basename match is ambiguous; first hit in name order wins
        let (_, found) = store.find("report.pdf").unwrap();
        assert_eq!(found.dir, "archive");

        assert!(matches!(
            store.find("nothing.here"),
            Err(Error::ManifestNotFound(_))
        ));

        let mut txn = Transaction::begin(&layout, TransactionMeta::new("test", "del")).unwrap();
        store.stage_delete(&a.manifest_name(), &mut txn).unwrap();
        txn.commit().unwrap();

        assert_eq!(store.list().unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(layout.root());
    }
}
