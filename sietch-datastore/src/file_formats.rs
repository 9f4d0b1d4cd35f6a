use sietch_api_types::CipherSuite;

// WARNING: PLEASE DO NOT MODIFY THOSE MAGIC VALUES

// openssl::sha::sha256(b"Sietch plain blob v1.0")[0..8]
pub const PLAIN_BLOB_MAGIC_1_0: [u8; 8] = [74, 71, 101, 182, 222, 97, 90, 132];

// openssl::sha::sha256(b"Sietch AES-256-GCM blob v1.0")[0..8]
pub const AES_GCM_BLOB_MAGIC_1_0: [u8; 8] = [57, 121, 51, 92, 31, 223, 16, 59];

// openssl::sha::sha256(b"Sietch ChaCha20-Poly1305 blob v1.0")[0..8]
pub const CHACHA_BLOB_MAGIC_1_0: [u8; 8] = [116, 42, 171, 129, 92, 238, 112, 112];

/// Blob binary storage format
///
/// Every blob starts with an 8 byte magic number identifying the
/// cipher family, followed by a 4 byte CRC32 (little endian) over the
/// rest of the file:
///
/// (MAGIC || CRC32 || Data)
///
/// Encrypted blobs additionally carry a 16 byte IV and the 16 byte
/// authentication tag in front of the ciphertext:
///
/// (MAGIC || CRC32 || IV || TAG || EncryptedData)
///
/// Whether the payload is compressed, and with which algorithm, is
/// recorded in the referencing manifest entry, not in the blob.
pub const BLOB_MAGIC_LEN: usize = 8;
pub const BLOB_CRC_OFFSET: usize = 8;
pub const PLAIN_BLOB_HEADER_SIZE: usize = 12;
pub const ENCRYPTED_BLOB_IV_OFFSET: usize = 12;
pub const ENCRYPTED_BLOB_TAG_OFFSET: usize = 28;
pub const ENCRYPTED_BLOB_HEADER_SIZE: usize = 44;

/// Header size for a known magic number.
pub fn header_size(magic: &[u8; 8]) -> Option<usize> {
    match *magic {
        PLAIN_BLOB_MAGIC_1_0 => Some(PLAIN_BLOB_HEADER_SIZE),
        AES_GCM_BLOB_MAGIC_1_0 => Some(ENCRYPTED_BLOB_HEADER_SIZE),
        CHACHA_BLOB_MAGIC_1_0 => Some(ENCRYPTED_BLOB_HEADER_SIZE),
        _ => None,
    }
}

/// Cipher family a magic number announces. `None` for unknown magics,
/// `Some(CipherSuite::None)` for plain blobs.
pub fn magic_cipher_suite(magic: &[u8; 8]) -> Option<CipherSuite> {
    match *magic {
        PLAIN_BLOB_MAGIC_1_0 => Some(CipherSuite::None),
        AES_GCM_BLOB_MAGIC_1_0 => Some(CipherSuite::AesGcm),
        CHACHA_BLOB_MAGIC_1_0 => Some(CipherSuite::Chacha20Poly1305),
        _ => None,
    }
}

/// Magic number to write for a cipher family.
pub fn cipher_magic(suite: CipherSuite) -> [u8; 8] {
    match suite {
        CipherSuite::None => PLAIN_BLOB_MAGIC_1_0,
        CipherSuite::AesGcm => AES_GCM_BLOB_MAGIC_1_0,
        CipherSuite::Chacha20Poly1305 => CHACHA_BLOB_MAGIC_1_0,
    }
}
