//! Filesystem, locking and crypto helpers shared by the sietch crates.

pub mod crypt_config;
pub mod fs;
pub mod lock;
pub mod worker;

pub use crypt_config::CryptConfig;
pub use lock::VaultLock;
pub use worker::AbortFlag;

/// Seconds since the epoch.
pub fn epoch_i64() -> i64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => duration.as_secs() as i64,
        Err(_) => 0,
    }
}
