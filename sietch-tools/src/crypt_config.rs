//! Wrappers for OpenSSL crypto functions
//!
//! We use this to encrypt and decrypt data chunks. Two AEAD cipher
//! families are supported, AES-256-GCM and ChaCha20-Poly1305, selected
//! by the vault's encryption policy. Both use 256-bit keys and provide
//! authenticated encryption.

use openssl::hash::MessageDigest;
use openssl::pkcs5::pbkdf2_hmac;
use openssl::symm::Cipher;

use sietch_api_types::{CipherSuite, Error, Result};

// openssl::sha::sha256(b"Sietch Vault Encryption Key Fingerprint")
/// This constant is used to compute key fingerprints.
const FINGERPRINT_INPUT: [u8; 32] = [
    0xec, 0x87, 0x43, 0xbf, 0x16, 0x8c, 0xcc, 0x87, 0x9e, 0xcf, 0x91, 0x4a, 0x2e, 0xa7, 0x18,
    0xe8, 0x86, 0x9c, 0x1f, 0xa5, 0x09, 0x27, 0x22, 0x89, 0x8e, 0x74, 0x74, 0x2f, 0x37, 0x91,
    0x97, 0x36,
];

/// Width of the IV field stored with every encrypted blob. AES-256-GCM
/// uses all 16 bytes; ChaCha20-Poly1305 uses the first 12 and the rest
/// stays zero.
pub const BLOB_IV_LEN: usize = 16;

/// Fill `buf` with cryptographically secure random bytes.
pub fn fill_with_random_data(buf: &mut [u8]) -> Result<()> {
    openssl::rand::rand_bytes(buf).map_err(|err| Error::Crypto(err.to_string()))
}

/// Encryption Configuration with secret key
///
/// This structure stores the secret key and provides helpers for
/// authenticated encryption with the vault's cipher family.
pub struct CryptConfig {
    // the cipher as selected by the vault policy
    cipher: Cipher,
    suite: CipherSuite,
    // A derived key used only for fingerprint computation.
    id_key: [u8; 32],
    // The private key used by the cipher.
    enc_key: [u8; 32],
}

impl CryptConfig {
    /// Create a new instance for the given cipher family.
    ///
    /// A secondary 32 byte key is derived with pbkdf2_hmac and used in
    /// `fingerprint`, so fingerprints do not expose a plain hash of the
    /// encryption key.
    pub fn new(enc_key: [u8; 32], suite: CipherSuite) -> Result<Self> {
        let cipher = match suite {
            CipherSuite::AesGcm => Cipher::aes_256_gcm(),
            CipherSuite::Chacha20Poly1305 => Cipher::chacha20_poly1305(),
            CipherSuite::None => {
                return Err(Error::InvalidInput(
                    "cannot build a crypt config for cipher 'none'".into(),
                ))
            }
        };

        let mut id_key = [0u8; 32];
        pbkdf2_hmac(
            &enc_key,
            b"_fingerprint",
            10,
            MessageDigest::sha256(),
            &mut id_key,
        )
        .map_err(|err| Error::Crypto(err.to_string()))?;

        Ok(Self {
            cipher,
            suite,
            id_key,
            enc_key,
        })
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    /// Number of IV bytes the cipher actually consumes.
    pub fn nonce_len(&self) -> usize {
        match self.suite {
            CipherSuite::AesGcm => 16,
            CipherSuite::Chacha20Poly1305 => 12,
            CipherSuite::None => unreachable!(),
        }
    }

    /// Computes a fingerprint for the secret key.
    ///
    /// Uses the derived id_key so the result cannot be brute-forced
    /// into the encryption key.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = openssl::sha::Sha256::new();
        hasher.update(&FINGERPRINT_INPUT);
        hasher.update(&self.id_key);
        hasher.finish()
    }

    /// Encrypt `data` with a fresh random nonce.
    ///
    /// Returns the stored-width IV, the 16 byte authentication tag and
    /// the ciphertext.
    pub fn encrypt(&self, data: &[u8]) -> Result<([u8; BLOB_IV_LEN], [u8; 16], Vec<u8>)> {
        let mut iv = [0u8; BLOB_IV_LEN];
        let nonce_len = self.nonce_len();
        fill_with_random_data(&mut iv[..nonce_len])?;

        let mut tag = [0u8; 16];
        let ciphertext = openssl::symm::encrypt_aead(
            self.cipher,
            &self.enc_key,
            Some(&iv[..nonce_len]),
            b"",
            data,
            &mut tag,
        )
        .map_err(|err| Error::Crypto(err.to_string()))?;

        Ok((iv, tag, ciphertext))
    }

    /// Decrypt and authenticate. Any OpenSSL failure here means the key
    /// is wrong or the ciphertext was tampered with, never silent data.
    pub fn decrypt(&self, iv: &[u8; BLOB_IV_LEN], tag: &[u8; 16], data: &[u8]) -> Result<Vec<u8>> {
        let nonce_len = self.nonce_len();
        openssl::symm::decrypt_aead(
            self.cipher,
            &self.enc_key,
            Some(&iv[..nonce_len]),
            b"",
            data,
            tag,
        )
        .map_err(|_| Error::DecryptAuth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_both_suites() {
        for suite in [CipherSuite::AesGcm, CipherSuite::Chacha20Poly1305] {
            let config = CryptConfig::new([7u8; 32], suite).unwrap();
            let (iv, tag, ciphertext) = config.encrypt(b"the spice must flow").unwrap();
            let plaintext = config.decrypt(&iv, &tag, &ciphertext).unwrap();
            assert_eq!(plaintext, b"the spice must flow");
        }
    }

    #[test]
    fn test_decrypt_wrong_key_fails_auth() {
        let config = CryptConfig::new([7u8; 32], CipherSuite::AesGcm).unwrap();
        let (iv, tag, ciphertext) = config.encrypt(b"payload").unwrap();

        let other = CryptConfig::new([8u8; 32], CipherSuite::AesGcm).unwrap();
        assert!(matches!(
            other.decrypt(&iv, &tag, &ciphertext),
            Err(Error::DecryptAuth)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails_auth() {
        let config = CryptConfig::new([7u8; 32], CipherSuite::Chacha20Poly1305).unwrap();
        let (iv, tag, mut ciphertext) = config.encrypt(b"payload payload payload").unwrap();
        ciphertext[0] ^= 0x01;
        assert!(matches!(
            config.decrypt(&iv, &tag, &ciphertext),
            Err(Error::DecryptAuth)
        ));
    }

    #[test]
    fn test_fingerprint_is_stable_and_keyed() {
        let a = CryptConfig::new([1u8; 32], CipherSuite::AesGcm).unwrap();
        let b = CryptConfig::new([2u8; 32], CipherSuite::AesGcm).unwrap();
        assert_eq!(a.fingerprint(), a.fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
