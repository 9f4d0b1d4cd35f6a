use std::path::PathBuf;

/// Result type used across the vault crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy of the vault core.
///
/// Every operation surfaces one of these kinds; recoverable conditions
/// never panic. Callers (the CLI, the sync layer) map the kinds to exit
/// codes and messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No vault root found along the directory ancestry.
    #[error("not inside a sietch vault (searched upwards from {0:?})")]
    NotInVault(PathBuf),

    /// The vault root exists but carries no descriptor.
    #[error("vault at {0:?} is not initialized")]
    NotInitialized(PathBuf),

    /// The descriptor was written by a newer implementation.
    #[error("vault schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: u32, supported: u32 },

    /// Any disk read/write/stat problem, with the path involved.
    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// AEAD authentication failed: wrong key, wrong passphrase or
    /// tampered ciphertext.
    #[error("decryption failed - wrong passphrase or tampered data")]
    DecryptAuth,

    /// A blob header names a cipher family the vault policy does not use.
    #[error("blob cipher '{found}' does not match vault policy '{expected}'")]
    CipherMismatch { expected: String, found: String },

    /// Recomputed chunk hash differs from the manifest.
    #[error("chunk {digest} failed integrity verification")]
    IntegrityFailure { digest: String },

    /// A manifest references a blob that is not present on disk.
    #[error("missing chunk {digest}")]
    MissingChunk { digest: String },

    /// Path resolution returned no manifest.
    #[error("no file matches '{0}' in the vault")]
    ManifestNotFound(String),

    /// A journal is in a state recovery cannot interpret; requires
    /// operator intervention.
    #[error("transaction '{id}' is inconsistent: {detail}")]
    TransactionInconsistent { id: String, detail: String },

    /// The passphrase policy rejected the provided passphrase.
    #[error("weak passphrase: {0}")]
    PassphraseWeak(String),

    /// The operation was interrupted by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// A cryptographic primitive failed outside of authentication.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// A stored document could not be parsed or encoded.
    #[error("malformed document {path:?}: {detail}")]
    Format { path: PathBuf, detail: String },

    /// Invalid caller input (bad policy values, bad paths).
    #[error("{0}")]
    InvalidInput(String),
}

impl Error {
    /// Attach a path to a raw I/O error.
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn format<P: Into<PathBuf>, D: std::fmt::Display>(path: P, detail: D) -> Self {
        Error::Format {
            path: path.into(),
            detail: detail.to_string(),
        }
    }
}
