//! Vault key material.
//!
//! The vault's 256-bit chunk encryption key lives in a JSON key file
//! under `.sietch/keys/`. For passphrase protected vaults the key is
//! wrapped with AES-256-GCM under a key derived from the passphrase
//! (scrypt or PBKDF2); unprotected vaults store the raw key with file
//! mode 0600. A key check value stored in the vault descriptor detects
//! a wrong passphrase before any chunk is touched.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sietch_api_types::{CipherSuite, Error, Fingerprint, Result};
use sietch_tools::crypt_config::{fill_with_random_data, CryptConfig};

/// Name of the key file below the vault's key directory.
pub const VAULT_KEY_NAME: &str = "vault.key";

/// Constant plaintext encrypted once at init; decrypting it verifies
/// the key before any data decrypt is attempted.
const KEY_CHECK_PLAINTEXT: &[u8] = b"sietch vault key check v1";

/// Key derivation function selection for new keys.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kdf {
    Scrypt,
    #[serde(rename = "pbkdf2")]
    PBKDF2,
}

/// Key derivation function configuration
#[derive(Deserialize, Serialize, Clone, Debug)]
pub enum KeyDerivationConfig {
    Scrypt {
        n: u64,
        r: u64,
        p: u64,
        #[serde(with = "bytes_as_base64")]
        salt: Vec<u8>,
    },
    PBKDF2 {
        iter: usize,
        #[serde(with = "bytes_as_base64")]
        salt: Vec<u8>,
    },
}

impl KeyDerivationConfig {
    /// Build a fresh configuration with a random 32 byte salt and the
    /// standard cost parameters.
    pub fn new(kdf: Kdf) -> Result<Self> {
        let mut salt = vec![0u8; 32];
        fill_with_random_data(&mut salt)?;

        Ok(match kdf {
            Kdf::Scrypt => KeyDerivationConfig::Scrypt {
                n: 65536,
                r: 8,
                p: 1,
                salt,
            },
            Kdf::PBKDF2 => KeyDerivationConfig::PBKDF2 { iter: 65535, salt },
        })
    }

    /// Derive a key from provided passphrase
    pub fn derive_key(&self, passphrase: &[u8]) -> Result<[u8; 32]> {
        let mut key = [0u8; 32];

        match self {
            KeyDerivationConfig::Scrypt { n, r, p, salt } => {
                // estimated scrypt memory usage is 128*r*n*p
                openssl::pkcs5::scrypt(passphrase, salt, *n, *r, *p, 1025 * 1024 * 1024, &mut key)
                    .map_err(|err| Error::Crypto(err.to_string()))?;
            }
            KeyDerivationConfig::PBKDF2 { iter, salt } => {
                openssl::pkcs5::pbkdf2_hmac(
                    passphrase,
                    salt,
                    *iter,
                    openssl::hash::MessageDigest::sha256(),
                    &mut key,
                )
                .map_err(|err| Error::Crypto(err.to_string()))?;
            }
        }

        Ok(key)
    }
}

/// Encryption Key Configuration
///
/// Stores the vault's secret key. When built with a key derivation
/// function the key data is wrapped (AES-256-GCM) and the passphrase is
/// needed to restore the plain key.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct KeyConfig {
    pub kdf: Option<KeyDerivationConfig>,
    pub created: i64,
    pub modified: i64,
    #[serde(with = "bytes_as_base64")]
    pub data: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub fingerprint: Option<Fingerprint>,
}

impl KeyConfig {
    /// Creates a new random key protected by passphrase.
    pub fn new(passphrase: &[u8], kdf: Kdf, suite: CipherSuite) -> Result<([u8; 32], Self)> {
        let mut key = [0u8; 32];
        fill_with_random_data(&mut key)?;
        let key_config = Self::with_key(&key, passphrase, kdf, suite)?;
        Ok((key, key_config))
    }

    /// Creates a new, unprotected key.
    pub fn without_password(raw_key: [u8; 32], suite: CipherSuite) -> Result<Self> {
        // always compute the fingerprint
        let crypt_config = CryptConfig::new(raw_key, suite)?;
        let fingerprint = Some(Fingerprint::new(crypt_config.fingerprint()));

        let created = sietch_tools::epoch_i64();
        Ok(Self {
            kdf: None,
            created,
            modified: created,
            data: raw_key.to_vec(),
            fingerprint,
        })
    }

    /// Creates a new instance, wrapping raw_key under the passphrase.
    pub fn with_key(
        raw_key: &[u8; 32],
        passphrase: &[u8],
        kdf: Kdf,
        suite: CipherSuite,
    ) -> Result<Self> {
        let kdf = KeyDerivationConfig::new(kdf)?;
        let derived_key = kdf.derive_key(passphrase)?;

        let cipher = openssl::symm::Cipher::aes_256_gcm();

        let mut iv = vec![0u8; 16];
        fill_with_random_data(&mut iv)?;
        let mut tag = [0u8; 16];

        let encrypted_key =
            openssl::symm::encrypt_aead(cipher, &derived_key, Some(&iv), b"", raw_key, &mut tag)
                .map_err(|err| Error::Crypto(err.to_string()))?;

        let mut enc_data = vec![];
        enc_data.extend_from_slice(&iv);
        enc_data.extend_from_slice(&tag);
        enc_data.extend_from_slice(&encrypted_key);

        let created = sietch_tools::epoch_i64();

        let crypt_config = CryptConfig::new(*raw_key, suite)?;
        let fingerprint = Some(Fingerprint::new(crypt_config.fingerprint()));

        Ok(Self {
            kdf: Some(kdf),
            created,
            modified: created,
            data: enc_data,
            fingerprint,
        })
    }

    /// Loads a KeyConfig from path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<KeyConfig> {
        let path = path.as_ref();
        let keydata = sietch_tools::fs::file_get_contents(path)?;
        let key_config: KeyConfig =
            serde_json::from_slice(&keydata).map_err(|err| Error::format(path, err))?;
        Ok(key_config)
    }

    /// Unwrap the raw key data.
    ///
    /// `suite` is the vault's cipher family, needed to recompute the
    /// fingerprint for the stored-fingerprint cross check.
    pub fn decrypt(
        &self,
        passphrase: &dyn Fn() -> Result<Vec<u8>>,
        suite: CipherSuite,
    ) -> Result<[u8; 32]> {
        let raw_data = &self.data;

        let key = if let Some(ref kdf) = self.kdf {
            let passphrase = passphrase()?;

            let derived_key = kdf.derive_key(&passphrase)?;

            if raw_data.len() < 32 {
                return Err(Error::Crypto("key file too short to unwrap".into()));
            }
            let iv = &raw_data[0..16];
            let tag = &raw_data[16..32];
            let enc_data = &raw_data[32..];

            let cipher = openssl::symm::Cipher::aes_256_gcm();

            openssl::symm::decrypt_aead(cipher, &derived_key, Some(iv), b"", enc_data, tag)
                .map_err(|_| Error::DecryptAuth)?
        } else {
            raw_data.clone()
        };

        if key.len() != 32 {
            return Err(Error::Crypto(format!(
                "got strange key length ({} != 32)",
                key.len()
            )));
        }
        let mut result = [0u8; 32];
        result.copy_from_slice(&key);

        let crypt_config = CryptConfig::new(result, suite)?;
        let fingerprint = Fingerprint::new(crypt_config.fingerprint());
        if let Some(ref stored_fingerprint) = self.fingerprint {
            if &fingerprint != stored_fingerprint {
                return Err(Error::Crypto(format!(
                    "key file fingerprint {stored_fingerprint} does not match contained key ({fingerprint})"
                )));
            }
        }

        Ok(result)
    }

    /// Store a KeyConfig to path (mode 0600).
    pub fn store<P: AsRef<Path>>(&self, path: P, replace: bool) -> Result<()> {
        let path = path.as_ref();

        let data =
            serde_json::to_string_pretty(self).map_err(|err| Error::format(path, err))?;

        if replace {
            sietch_tools::fs::replace_file(path, data.as_bytes(), Some(0o600), true)?;
        } else {
            use std::os::unix::fs::OpenOptionsExt;

            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .mode(0o600)
                .create_new(true)
                .open(path)
                .map_err(|err| Error::io(path, err))?;

            file.write_all(data.as_bytes())
                .map_err(|err| Error::io(path, err))?;
        }

        Ok(())
    }
}

/// Encrypt the key check constant; the result is stored in the vault
/// descriptor at init.
pub fn create_key_check(config: &CryptConfig) -> Result<String> {
    let (iv, tag, ciphertext) = config.encrypt(KEY_CHECK_PLAINTEXT)?;
    let mut data = Vec::with_capacity(32 + ciphertext.len());
    data.extend_from_slice(&iv);
    data.extend_from_slice(&tag);
    data.extend_from_slice(&ciphertext);
    Ok(base64::encode(data))
}

/// Verify the key check value. Fails with `DecryptAuth` for a wrong
/// key, without touching any chunk.
pub fn verify_key_check(config: &CryptConfig, check: &str) -> Result<()> {
    let data = base64::decode(check)
        .map_err(|err| Error::Crypto(format!("malformed key check value - {err}")))?;
    if data.len() < 32 {
        return Err(Error::Crypto("malformed key check value".into()));
    }
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&data[0..16]);
    let mut tag = [0u8; 16];
    tag.copy_from_slice(&data[16..32]);

    let plaintext = config.decrypt(&iv, &tag, &data[32..])?;
    if plaintext != KEY_CHECK_PLAINTEXT {
        return Err(Error::DecryptAuth);
    }
    Ok(())
}

/// RSA keypair identifying this vault towards sync peers.
///
/// Generated at init; only the paths are recorded in the descriptor.
/// The sync transport consumes the keys, the core only manages them.
pub struct SyncIdentity {
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
}

impl SyncIdentity {
    /// Generate a fresh RSA keypair below `keys_dir`.
    pub fn generate(keys_dir: &Path) -> Result<Self> {
        let rsa = openssl::rsa::Rsa::generate(2048)
            .map_err(|err| Error::Crypto(err.to_string()))?;

        let private_pem = rsa
            .private_key_to_pem()
            .map_err(|err| Error::Crypto(err.to_string()))?;
        let public_pem = rsa
            .public_key_to_pem()
            .map_err(|err| Error::Crypto(err.to_string()))?;

        let identity = Self {
            private_key_path: keys_dir.join("sync_identity.pem"),
            public_key_path: keys_dir.join("sync_identity.pub.pem"),
        };

        sietch_tools::fs::replace_file(&identity.private_key_path, &private_pem, Some(0o600), true)?;
        sietch_tools::fs::replace_file(&identity.public_key_path, &public_pem, Some(0o644), true)?;

        Ok(identity)
    }

    /// Load the private half.
    pub fn load_private(&self) -> Result<openssl::rsa::Rsa<openssl::pkey::Private>> {
        let pem = sietch_tools::fs::file_get_contents(&self.private_key_path)?;
        openssl::rsa::Rsa::private_key_from_pem(&pem)
            .map_err(|err| Error::Crypto(err.to_string()))
    }

    /// Load the public half.
    pub fn load_public(&self) -> Result<openssl::rsa::Rsa<openssl::pkey::Public>> {
        let pem = sietch_tools::fs::file_get_contents(&self.public_key_path)?;
        openssl::rsa::Rsa::public_key_from_pem(&pem)
            .map_err(|err| Error::Crypto(err.to_string()))
    }
}

mod bytes_as_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&base64::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        base64::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_is_deterministic() {
        let kdf = KeyDerivationConfig::PBKDF2 {
            iter: 100,
            salt: vec![1, 2, 3, 4],
        };
        let a = kdf.derive_key(b"passphrase").unwrap();
        let b = kdf.derive_key(b"passphrase").unwrap();
        assert_eq!(a, b);
        let c = kdf.derive_key(b"other").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_wrap_roundtrip() {
        let (key, config) =
            KeyConfig::new(b"Correct-Horse-42", Kdf::PBKDF2, CipherSuite::AesGcm).unwrap();

        let unwrapped = config
            .decrypt(&|| Ok(b"Correct-Horse-42".to_vec()), CipherSuite::AesGcm)
            .unwrap();
        assert_eq!(key, unwrapped);

        let wrong = config.decrypt(&|| Ok(b"Wrong-Horse-42!!".to_vec()), CipherSuite::AesGcm);
        assert!(matches!(wrong, Err(Error::DecryptAuth)));
    }

    #[test]
    fn test_key_config_json_roundtrip() {
        let config = KeyConfig::without_password([3u8; 32], CipherSuite::Chacha20Poly1305).unwrap();
        let text = serde_json::to_string_pretty(&config).unwrap();
        let back: KeyConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(config.data, back.data);
        assert_eq!(config.fingerprint, back.fingerprint);
    }

    #[test]
    fn test_key_check_value() {
        let config = CryptConfig::new([5u8; 32], CipherSuite::AesGcm).unwrap();
        let check = create_key_check(&config).unwrap();
        verify_key_check(&config, &check).unwrap();

        let other = CryptConfig::new([6u8; 32], CipherSuite::AesGcm).unwrap();
        assert!(matches!(
            verify_key_check(&other, &check),
            Err(Error::DecryptAuth)
        ));
    }
}
