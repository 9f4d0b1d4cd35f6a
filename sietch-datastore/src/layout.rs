//! The fixed on-disk tree of a vault.
//!
//! ```text
//! <root>/
//!   sietch.vault.json    # vault descriptor
//!   .sietch/
//!     keys/       # local secret material (0700)
//!     chunks/     # content-addressed blobs (0755)
//!     manifests/  # one document per file
//!     state/      # dedup index, lock
//!     txn/        # transaction journals and staged files
//!     logs/       # gc log
//! ```

use std::path::{Path, PathBuf};

use sietch_api_types::{Error, Result};
use sietch_tools::fs::{ensure_dir, path_mode};

/// File name of the vault descriptor at the vault root.
pub const VAULT_DESCRIPTOR_NAME: &str = "sietch.vault.json";

/// Name of the vault state directory.
pub const SIETCH_DIR_NAME: &str = ".sietch";

/// Resolved vault root with accessors for the fixed tree below it.
#[derive(Clone, Debug)]
pub struct VaultLayout {
    root: PathBuf,
}

impl VaultLayout {
    /// Use `root` as the vault root without further checks (init path).
    pub fn from_root<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Walk up from `start` until a directory holding both `.sietch/`
    /// and the descriptor file is found.
    pub fn discover<P: AsRef<Path>>(start: P) -> Result<Self> {
        let start = start.as_ref();
        let start_abs = if start.is_absolute() {
            start.to_owned()
        } else {
            std::env::current_dir()
                .map_err(|err| Error::io(start, err))?
                .join(start)
        };

        let mut current = start_abs.as_path();
        loop {
            if current.join(SIETCH_DIR_NAME).is_dir()
                && current.join(VAULT_DESCRIPTOR_NAME).is_file()
            {
                return Ok(Self {
                    root: current.to_owned(),
                });
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => return Err(Error::NotInVault(start_abs)),
            }
        }
    }

    /// Create the directory tree with secure permissions.
    pub fn create(root: PathBuf) -> Result<Self> {
        let layout = Self { root };

        ensure_dir(&layout.root, 0o755)?;
        ensure_dir(layout.sietch_dir(), 0o755)?;
        ensure_dir(layout.keys_dir(), 0o700)?;
        ensure_dir(layout.chunks_dir(), 0o755)?;
        ensure_dir(layout.manifests_dir(), 0o755)?;
        ensure_dir(layout.state_dir(), 0o755)?;
        ensure_dir(layout.txn_dir(), 0o755)?;
        ensure_dir(layout.logs_dir(), 0o755)?;

        layout.check_permissions()?;
        Ok(layout)
    }

    /// Stricter permissions than requested are tolerated; a
    /// world-writable key directory is not.
    pub fn check_permissions(&self) -> Result<()> {
        let keys_dir = self.keys_dir();
        let mode = path_mode(&keys_dir)?;
        if mode & 0o002 != 0 {
            return Err(Error::io(
                keys_dir,
                std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "key directory is world-writable",
                ),
            ));
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.root.join(VAULT_DESCRIPTOR_NAME)
    }

    pub fn sietch_dir(&self) -> PathBuf {
        self.root.join(SIETCH_DIR_NAME)
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.sietch_dir().join("keys")
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.sietch_dir().join("chunks")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.sietch_dir().join("manifests")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.sietch_dir().join("state")
    }

    pub fn txn_dir(&self) -> PathBuf {
        self.sietch_dir().join("txn")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.sietch_dir().join("logs")
    }

    pub fn dedup_index_path(&self) -> PathBuf {
        self.state_dir().join("dedup-index.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join("lock")
    }

    pub fn gc_log_path(&self) -> PathBuf {
        self.logs_dir().join("gc.log")
    }

    /// Turn a vault-root relative path into an absolute one.
    pub fn absolute(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    /// Vault-root relative location of the descriptor.
    pub fn descriptor_rel_path() -> String {
        VAULT_DESCRIPTOR_NAME.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn testdir(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("sietch-layout-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_discover_walks_up() {
        let root = testdir("discover");
        let layout = VaultLayout::create(root.clone()).unwrap();
        std::fs::write(layout.descriptor_path(), "{}").unwrap();

        let nested = root.join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        let found = VaultLayout::discover(&nested).unwrap();
        assert_eq!(found.root(), root.as_path());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_discover_fails_outside() {
        let dir = testdir("outside");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(matches!(
            VaultLayout::discover(&dir),
            Err(Error::NotInVault(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_sietch_dir_is_not_a_vault() {
        let dir = testdir("descriptor-only");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(VAULT_DESCRIPTOR_NAME), "{}").unwrap();
        assert!(VaultLayout::discover(&dir).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
