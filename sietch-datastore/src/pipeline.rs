//! The per-chunk ingest pipeline.
//!
//! A bounded pool of worker threads overlaps hashing, compression and
//! encryption of successive chunks of one file. Work items are tagged
//! with their chunk index and the consumer reassembles results in
//! index order, so the manifest's ChunkRef ordering is deterministic
//! regardless of worker scheduling. Cancellation is checked at chunk
//! boundaries, never inside a chunk.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use sietch_api_types::{CompressionAlgorithm, Error, HashAlgorithm, Result};
use sietch_tools::{AbortFlag, CryptConfig};

use crate::chunker::ChunkStream;
use crate::data_blob::DataBlob;

/// Worker threads encoding chunks concurrently.
pub const PIPELINE_WORKERS: usize = 4;

/// Encoded data chunk with digest and positional information.
pub struct ChunkOutcome {
    pub index: usize,
    /// Hex plaintext hash.
    pub digest: String,
    /// Hex hash of the encoded blob; set for encrypted vaults and used
    /// as the blob id there.
    pub encrypted_digest: Option<String>,
    pub blob: DataBlob,
    pub plaintext_size: u64,
    pub encrypted_size: u64,
    pub compressed: bool,
}

impl ChunkOutcome {
    pub fn blob_id(&self) -> &str {
        self.encrypted_digest.as_deref().unwrap_or(&self.digest)
    }
}

/// Hash a chunk payload with the vault's configured algorithm.
pub fn hash_chunk(algorithm: HashAlgorithm, data: &[u8]) -> [u8; 32] {
    match algorithm {
        HashAlgorithm::Sha256 => openssl::sha::sha256(data),
        HashAlgorithm::Blake3 => *blake3::hash(data).as_bytes(),
    }
}

/// Encode one chunk: hash, compress, encrypt, in that order.
pub fn encode_chunk(
    index: usize,
    data: &[u8],
    crypt: Option<&CryptConfig>,
    compression: CompressionAlgorithm,
    hash_algorithm: HashAlgorithm,
) -> Result<ChunkOutcome> {
    let digest = hex::encode(hash_chunk(hash_algorithm, data));

    let (blob, compressed) = DataBlob::encode(data, crypt, compression)?;

    let encrypted_digest = crypt
        .map(|_| hex::encode(hash_chunk(hash_algorithm, blob.raw_data())));

    Ok(ChunkOutcome {
        index,
        digest,
        encrypted_digest,
        plaintext_size: data.len() as u64,
        encrypted_size: blob.raw_size(),
        compressed,
        blob,
    })
}

/// Drive `stream` through the worker pool, handing each encoded chunk
/// to `consume` in index order.
pub fn process_chunks<R, F>(
    stream: ChunkStream<R>,
    crypt: Option<Arc<CryptConfig>>,
    compression: CompressionAlgorithm,
    hash_algorithm: HashAlgorithm,
    abort: &AbortFlag,
    mut consume: F,
) -> Result<()>
where
    R: Read + Send,
    F: FnMut(ChunkOutcome) -> Result<()>,
{
    let (input_tx, input_rx) =
        crossbeam_channel::bounded::<Result<(usize, Vec<u8>)>>(PIPELINE_WORKERS * 2);
    let (output_tx, output_rx) =
        crossbeam_channel::bounded::<(usize, Result<ChunkOutcome>)>(PIPELINE_WORKERS * 2);

    let mut first_error: Option<Error> = None;

    std::thread::scope(|scope| {
        // producer: split the input into chunks
        let producer_abort = abort.clone();
        scope.spawn(move || {
            let mut index = 0;
            for chunk in stream {
                if producer_abort.is_aborted() {
                    break;
                }
                let item = chunk.map(|data| {
                    let tagged = (index, data);
                    index += 1;
                    tagged
                });
                let failed = item.is_err();
                if input_tx.send(item).is_err() || failed {
                    break;
                }
            }
            // closing the channel stops the workers
        });

        // bounded worker pool
        for _ in 0..PIPELINE_WORKERS {
            let input_rx = input_rx.clone();
            let output_tx = output_tx.clone();
            let crypt = crypt.clone();
            let worker_abort = abort.clone();
            scope.spawn(move || {
                for item in input_rx {
                    if worker_abort.is_aborted() {
                        break;
                    }
                    match item {
                        Ok((index, data)) => {
                            let outcome = encode_chunk(
                                index,
                                &data,
                                crypt.as_deref(),
                                compression,
                                hash_algorithm,
                            );
                            if output_tx.send((index, outcome)).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            let _ = output_tx.send((usize::MAX, Err(err)));
                            break;
                        }
                    }
                }
            });
        }
        drop(input_rx);
        drop(output_tx);

        // consumer: restore index order, stop producing on failure
        let mut pending: BTreeMap<usize, ChunkOutcome> = BTreeMap::new();
        let mut next_index = 0;

        for (index, outcome) in output_rx {
            if first_error.is_some() {
                // drain so the workers never block on a full channel
                continue;
            }
            match outcome {
                Ok(outcome) => {
                    pending.insert(index, outcome);
                    while let Some(ready) = pending.remove(&next_index) {
                        if let Err(err) = consume(ready) {
                            first_error = Some(err);
                            abort.abort();
                            break;
                        }
                        next_index += 1;
                    }
                }
                Err(err) => {
                    first_error = Some(err);
                    abort.abort();
                }
            }
        }

        if first_error.is_none() && !pending.is_empty() {
            first_error = Some(Error::InvalidInput(
                "chunk pipeline lost an intermediate chunk".into(),
            ));
        }
    });

    match first_error {
        Some(err) => Err(err),
        None => abort.check(),
    }
}
