use std::fmt;

use serde::{Deserialize, Serialize};

/// AEAD cipher family used for chunk encryption.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherSuite {
    /// AES-256-GCM.
    AesGcm,
    /// ChaCha20-Poly1305.
    Chacha20Poly1305,
    /// Store chunks unencrypted.
    None,
}

impl CipherSuite {
    pub fn is_encrypted(self) -> bool {
        !matches!(self, CipherSuite::None)
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CipherSuite::AesGcm => write!(f, "aes-gcm"),
            CipherSuite::Chacha20Poly1305 => write!(f, "chacha20-poly1305"),
            CipherSuite::None => write!(f, "none"),
        }
    }
}

/// Content hash used for chunk addressing and integrity checks.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Blake3,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

#[derive(Debug, Eq, PartialEq, Hash, Clone, Deserialize, Serialize)]
#[serde(transparent)]
/// 32-byte key fingerprint, calculated with SHA256.
pub struct Fingerprint {
    #[serde(with = "bytes_as_fingerprint")]
    bytes: [u8; 32],
}

impl Fingerprint {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

/// Display as short key ID (first 8 hex digits).
impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.bytes[0..4]))
    }
}

mod bytes_as_fingerprint {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = String::with_capacity(32 * 3);
        for (pos, byte) in bytes.iter().enumerate() {
            if pos > 0 {
                s.push(':');
            }
            s.push_str(&format!("{byte:02x}"));
        }
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        // silently allow hex fingerprints without colons as well
        let s: String = String::deserialize(deserializer)?;
        let s = s.replace(':', "");

        let mut out = [0u8; 32];
        hex::decode_to_slice(s.as_bytes(), &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}

#[test]
fn fingerprint_serde_roundtrip() {
    let fp = Fingerprint::new([0xab; 32]);
    let text = serde_json::to_string(&fp).unwrap();
    assert!(text.contains("ab:ab:"));
    let back: Fingerprint = serde_json::from_str(&text).unwrap();
    assert_eq!(fp, back);
}
