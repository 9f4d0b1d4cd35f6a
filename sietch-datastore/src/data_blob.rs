use std::io::{Read, Write};

use sietch_api_types::{CipherSuite, CompressionAlgorithm, Error, Result};
use sietch_tools::crypt_config::{CryptConfig, BLOB_IV_LEN};

use super::file_formats::*;

const MAX_BLOB_SIZE: usize = 512 * 1024 * 1024;

/// Blob binary storage format
///
/// Blobs hold one encoded chunk: the payload is compressed (when that
/// makes it smaller), encrypted per the vault policy, and prefixed
/// with the header described in [`file_formats`](super::file_formats).
pub struct DataBlob {
    raw_data: Vec<u8>, // tagged, compressed, encrypted data
}

impl DataBlob {
    /// accessor to raw_data field
    pub fn raw_data(&self) -> &[u8] {
        &self.raw_data
    }

    /// Returns raw_data size
    pub fn raw_size(&self) -> u64 {
        self.raw_data.len() as u64
    }

    /// Consume self and returns raw_data
    pub fn into_inner(self) -> Vec<u8> {
        self.raw_data
    }

    /// accessor to the magic number
    pub fn magic(&self) -> &[u8; 8] {
        self.raw_data[0..8].try_into().unwrap()
    }

    /// accessor to the crc32 checksum
    pub fn crc(&self) -> u32 {
        let crc_o = BLOB_CRC_OFFSET;
        u32::from_le_bytes(self.raw_data[crc_o..crc_o + 4].try_into().unwrap())
    }

    // set the CRC checksum field
    pub fn set_crc(&mut self, crc: u32) {
        let crc_o = BLOB_CRC_OFFSET;
        self.raw_data[crc_o..crc_o + 4].copy_from_slice(&crc.to_le_bytes());
    }

    /// compute the CRC32 checksum
    pub fn compute_crc(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        let start = PLAIN_BLOB_HEADER_SIZE; // start after MAGIC || CRC32
        hasher.update(&self.raw_data[start..]);
        hasher.finalize()
    }

    // verify the CRC32 checksum
    pub fn verify_crc(&self) -> Result<()> {
        if self.compute_crc() != self.crc() {
            return Err(Error::InvalidInput("blob has wrong CRC checksum".into()));
        }
        Ok(())
    }

    /// Create a DataBlob from a chunk payload.
    ///
    /// The payload is compressed with `compression` and the result kept
    /// only when it is actually shorter; encryption follows when a
    /// `CryptConfig` is given. Returns the blob and whether the stored
    /// payload is compressed, which the caller records in the manifest.
    pub fn encode(
        data: &[u8],
        config: Option<&CryptConfig>,
        compression: CompressionAlgorithm,
    ) -> Result<(Self, bool)> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(Error::InvalidInput(format!(
                "data blob too large ({} bytes)",
                data.len()
            )));
        }

        let compr_data;
        let (compressed, payload) = if compression.is_none() {
            (false, data)
        } else {
            compr_data = compress(compression, data)?;
            // Note: We only use compression if the result is shorter
            if compr_data.len() < data.len() {
                (true, &compr_data[..])
            } else {
                (false, data)
            }
        };

        let mut blob = if let Some(config) = config {
            let (iv, tag, ciphertext) = config.encrypt(payload)?;

            let mut raw_data =
                Vec::with_capacity(ENCRYPTED_BLOB_HEADER_SIZE + ciphertext.len());
            raw_data.extend_from_slice(&cipher_magic(config.cipher_suite()));
            raw_data.extend_from_slice(&[0u8; 4]);
            raw_data.extend_from_slice(&iv);
            raw_data.extend_from_slice(&tag);
            raw_data.extend_from_slice(&ciphertext);

            DataBlob { raw_data }
        } else {
            let mut raw_data = Vec::with_capacity(PLAIN_BLOB_HEADER_SIZE + payload.len());
            raw_data.extend_from_slice(&PLAIN_BLOB_MAGIC_1_0);
            raw_data.extend_from_slice(&[0u8; 4]);
            raw_data.extend_from_slice(payload);

            DataBlob { raw_data }
        };

        blob.set_crc(blob.compute_crc());

        Ok((blob, compressed))
    }

    /// Cipher family this blob was written with.
    pub fn cipher_suite(&self) -> Result<CipherSuite> {
        magic_cipher_suite(self.magic())
            .ok_or_else(|| Error::InvalidInput("invalid blob magic number".into()))
    }

    /// Returns if the blob is encrypted
    pub fn is_encrypted(&self) -> bool {
        matches!(
            self.cipher_suite(),
            Ok(CipherSuite::AesGcm) | Ok(CipherSuite::Chacha20Poly1305)
        )
    }

    /// Decode the blob back into the chunk payload.
    ///
    /// `compressed` names the compression recorded in the manifest
    /// entry, `None` when the payload was stored uncompressed. The
    /// cipher family of the blob must match the vault policy implied
    /// by `config`, otherwise this fails with *CipherMismatch*.
    pub fn decode(
        &self,
        config: Option<&CryptConfig>,
        compressed: Option<CompressionAlgorithm>,
    ) -> Result<Vec<u8>> {
        let found = self.cipher_suite()?;
        let expected = config.map_or(CipherSuite::None, |c| c.cipher_suite());

        if found != expected {
            return Err(Error::CipherMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }

        let payload = if let Some(config) = config {
            if self.raw_data.len() < ENCRYPTED_BLOB_HEADER_SIZE {
                return Err(Error::InvalidInput("encrypted blob too small".into()));
            }
            let mut iv = [0u8; BLOB_IV_LEN];
            iv.copy_from_slice(
                &self.raw_data[ENCRYPTED_BLOB_IV_OFFSET..ENCRYPTED_BLOB_IV_OFFSET + 16],
            );
            let mut tag = [0u8; 16];
            tag.copy_from_slice(
                &self.raw_data[ENCRYPTED_BLOB_TAG_OFFSET..ENCRYPTED_BLOB_TAG_OFFSET + 16],
            );

            config.decrypt(&iv, &tag, &self.raw_data[ENCRYPTED_BLOB_HEADER_SIZE..])?
        } else {
            self.raw_data[PLAIN_BLOB_HEADER_SIZE..].to_vec()
        };

        match compressed {
            Some(algorithm) => decompress(algorithm, &payload),
            None => Ok(payload),
        }
    }

    /// Load blob from ``reader``, verify CRC
    pub fn load_from_reader(reader: &mut dyn Read) -> Result<Self> {
        let mut data = Vec::with_capacity(1024 * 1024);
        reader
            .read_to_end(&mut data)
            .map_err(|err| Error::InvalidInput(format!("unable to read blob - {err}")))?;

        let blob = Self::from_raw(data)?;
        blob.verify_crc()?;
        Ok(blob)
    }

    /// Create Instance from raw data
    pub fn from_raw(data: Vec<u8>) -> Result<Self> {
        if data.len() < PLAIN_BLOB_HEADER_SIZE {
            return Err(Error::InvalidInput(format!(
                "blob too small ({} bytes)",
                data.len()
            )));
        }

        let magic: [u8; 8] = data[0..8].try_into().unwrap();
        let header_size = header_size(&magic)
            .ok_or_else(|| Error::InvalidInput("unable to parse blob - wrong magic".into()))?;

        if data.len() < header_size {
            return Err(Error::InvalidInput(format!(
                "encrypted blob too small ({} bytes)",
                data.len()
            )));
        }

        Ok(DataBlob { raw_data: data })
    }
}

/// Compress a chunk payload.
pub fn compress(algorithm: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Zstd => zstd::bulk::compress(data, 1)
            .map_err(|err| Error::InvalidInput(format!("zstd compression failed - {err}"))),
        CompressionAlgorithm::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(
                Vec::with_capacity(data.len() / 2),
                flate2::Compression::default(),
            );
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|err| Error::InvalidInput(format!("gzip compression failed - {err}")))
        }
    }
}

/// Decompress a chunk payload.
pub fn decompress(algorithm: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Zstd => {
            let mut reader = data;
            zstd::stream::decode_all(&mut reader)
                .map_err(|err| Error::InvalidInput(format!("zstd decompression failed - {err}")))
        }
        CompressionAlgorithm::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut out = Vec::with_capacity(data.len() * 2);
            decoder
                .read_to_end(&mut out)
                .map_err(|err| Error::InvalidInput(format!("gzip decompression failed - {err}")))?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_payload() -> Vec<u8> {
        // repetitive content so every algorithm actually compresses
        b"the spice extends life, the spice expands consciousness "
            .iter()
            .copied()
            .cycle()
            .take(16 * 1024)
            .collect()
    }

    #[test]
    fn test_blob_plain_roundtrip() {
        let data = test_payload();
        for compression in [
            CompressionAlgorithm::None,
            CompressionAlgorithm::Gzip,
            CompressionAlgorithm::Zstd,
        ] {
            let (blob, compressed) = DataBlob::encode(&data, None, compression).unwrap();
            assert_eq!(compressed, !compression.is_none());
            blob.verify_crc().unwrap();

            let reloaded = DataBlob::from_raw(blob.raw_data().to_vec()).unwrap();
            let decoded = reloaded
                .decode(None, compressed.then_some(compression))
                .unwrap();
            assert_eq!(decoded, data);
        }
    }

    #[test]
    fn test_blob_encrypted_roundtrip() {
        let data = test_payload();
        for suite in [CipherSuite::AesGcm, CipherSuite::Chacha20Poly1305] {
            let config = CryptConfig::new([11u8; 32], suite).unwrap();
            let (blob, compressed) =
                DataBlob::encode(&data, Some(&config), CompressionAlgorithm::Zstd).unwrap();
            assert!(compressed);
            assert!(blob.is_encrypted());

            let decoded = blob
                .decode(Some(&config), Some(CompressionAlgorithm::Zstd))
                .unwrap();
            assert_eq!(decoded, data);
        }
    }

    #[test]
    fn test_blob_incompressible_payload_stays_plain() {
        // high entropy data: compression would grow it
        let mut data = vec![0u8; 4096];
        sietch_tools::crypt_config::fill_with_random_data(&mut data).unwrap();

        let (_, compressed) = DataBlob::encode(&data, None, CompressionAlgorithm::Zstd).unwrap();
        assert!(!compressed);
    }

    #[test]
    fn test_blob_cipher_mismatch() {
        let data = test_payload();
        let aes = CryptConfig::new([1u8; 32], CipherSuite::AesGcm).unwrap();
        let chacha = CryptConfig::new([1u8; 32], CipherSuite::Chacha20Poly1305).unwrap();

        let (blob, _) = DataBlob::encode(&data, Some(&aes), CompressionAlgorithm::None).unwrap();

        assert!(matches!(
            blob.decode(Some(&chacha), None),
            Err(Error::CipherMismatch { .. })
        ));
        assert!(matches!(
            blob.decode(None, None),
            Err(Error::CipherMismatch { .. })
        ));
    }

    #[test]
    fn test_blob_crc_detects_corruption() {
        let data = test_payload();
        let (blob, _) = DataBlob::encode(&data, None, CompressionAlgorithm::None).unwrap();

        let mut raw = blob.into_inner();
        let last = raw.len() - 1;
        raw[last] ^= 0x40;

        let tampered = DataBlob::from_raw(raw).unwrap();
        assert!(tampered.verify_crc().is_err());
    }

    #[test]
    fn test_blob_tamper_fails_decrypt() {
        let data = test_payload();
        let config = CryptConfig::new([2u8; 32], CipherSuite::AesGcm).unwrap();
        let (blob, _) =
            DataBlob::encode(&data, Some(&config), CompressionAlgorithm::None).unwrap();

        let mut raw = blob.into_inner();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;

        let tampered = DataBlob::from_raw(raw).unwrap();
        assert!(matches!(
            tampered.decode(Some(&config), None),
            Err(Error::DecryptAuth)
        ));
    }
}
