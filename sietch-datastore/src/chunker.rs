use std::io::Read;
use std::path::PathBuf;

use sietch_api_types::{Error, Result};

/// Rolling-hash window width. A power of two keeps the ring-buffer
/// index a cheap mask, and 64 bytes is wide enough that the boundary
/// decision only sees local content.
const WINDOW_SIZE: usize = 64;

/// Content-defined chunk boundary detector.
///
/// Maintains a cyclic-polynomial rolling hash over the last
/// [`WINDOW_SIZE`] bytes and cuts whenever the hash, masked to the
/// target size rounded up to a power of two, is all ones. Boundaries
/// therefore depend only on the window contents: an edit moves the
/// cuts around it but the stream re-synchronizes at the next unedited
/// window. Cuts are clamped to the dedup policy's `[min, max]` bounds;
/// a constant run, whose hash settles into a short cycle that rarely
/// matches the mask, is simply cut at the max bound.
pub struct Chunker {
    h: u32,
    window: [u8; WINDOW_SIZE],
    /// Bytes in the window during warm-up after a cut.
    filled: usize,
    /// Bytes consumed for the chunk currently being scanned.
    chunk_len: usize,

    chunk_len_min: usize,
    chunk_len_max: usize,
    boundary_mask: u32,
}

/// Per-byte mixing values for the rolling hash: the low 32 bits of 256
/// successive splitmix64 outputs, seeded with 0x7369657463682d31
/// (ASCII "sietch-1").
const MIX_TABLE: [u32; 256] = [
    0x5020dfeb, 0xf97a5b14, 0x5dca8d4a, 0x4da4f52c, 0xf451df36, 0x3822a024, 0xca8563b1, 0x4ae8bcb5,
    0x04989981, 0x04db68a1, 0x7f0ce228, 0x145c1b64, 0xb62a0714, 0x3d044eb6, 0x665d2029, 0x02b8a2e2,
    0x6b25686f, 0x4a575f9c, 0x8ed1261c, 0xe9cbfa10, 0x8653b013, 0xddc3f4f8, 0x2e1fabae, 0xc189ff73,
    0x6edead37, 0x26dfd8eb, 0x70fd0083, 0xa9068eba, 0xd0f8f71d, 0x5faf6030, 0xa4248444, 0x20ff9ccc,
    0x652399d4, 0x327c2d8c, 0x1e2515a0, 0x9ab73052, 0xc44223c3, 0xb9633bc0, 0xf732075b, 0x77bfbf3c,
    0x539f66ff, 0xff44989f, 0x66a4db25, 0x32a0ebd8, 0xd0f4ec6b, 0xf757ee3b, 0x89ead763, 0x5b665692,
    0xa1513bd0, 0x9c1b35c0, 0x4db25d2a, 0x678e4a8a, 0x31e6c890, 0xd5391f74, 0xd7c9486e, 0xbba1e6b7,
    0xcaaaa05c, 0x939e3144, 0x5cbb840d, 0xfed2ee66, 0xa1c9a20b, 0x84ce27e2, 0xede33d4c, 0x3d534dbe,
    0x5a493702, 0xc8f3800d, 0x1faee351, 0x39157284, 0x0c995de2, 0x79010ff4, 0x80a75fed, 0xa013a167,
    0x53d72042, 0x3cf08a07, 0xf5cf7398, 0x06901f89, 0x32d7aaee, 0x86c2d6a4, 0x98beebc6, 0x93278070,
    0xb80c694f, 0x07fe9d84, 0x717dd99d, 0x5828fe62, 0xd35526f4, 0xd72f7fce, 0xb4322ee8, 0x16a01a2a,
    0xfd4ae1dd, 0x093d6a11, 0xe9a79fa5, 0x74fc225d, 0x91172b8e, 0x54d6713d, 0x56c9842e, 0xdb70c711,
    0xae720c80, 0xc3b6db09, 0x5113f541, 0x57befafd, 0xaebe026a, 0x79a72b5e, 0xa31df929, 0x0a6e364e,
    0xf7e32b22, 0x12a7e63c, 0x969c246a, 0xb3a1541c, 0xccfd3d87, 0x357e09fa, 0x9253b389, 0x65e9cedd,
    0xdfa80585, 0x8954dc1f, 0x2680c79c, 0xc7c63756, 0x885be2f6, 0xdeca9279, 0x042ee313, 0x78541ff8,
    0x1ce680f1, 0x8d9e7f7f, 0xb7f013b9, 0x122182b4, 0xa1a9497b, 0x76c0107d, 0x3d76aa72, 0xefe54656,
    0xfeff39bd, 0x5536f5a8, 0x1156a2ed, 0xc839a6ef, 0xf471ec77, 0x8fb91fa5, 0x2b1970db, 0xc085030d,
    0x1d20acfd, 0xefaba77e, 0x192c5bcc, 0x5df6d78b, 0x0f3d6a7b, 0x3ae386b7, 0xfdc86fc7, 0xc941d215,
    0x49a7cdcb, 0x3145032c, 0x0ec792f8, 0xe3394d5d, 0x4c008749, 0x8cc1b76e, 0xad6695ca, 0x3fe66f33,
    0xa53664c5, 0xc5fe9f51, 0x6c866a65, 0x2d397e83, 0x51edd28c, 0x9485f8a2, 0x4d01972f, 0x3164156d,
    0x8527d775, 0xa215e4a1, 0x2f746f93, 0xa71b51f6, 0x03ac5bb7, 0xf59366c1, 0x3aa1e2d1, 0x1ae79a6b,
    0xf19f3a32, 0xc143abc8, 0x32a03479, 0x4cb9527a, 0xe192ddae, 0xdac3bc94, 0x49b4ca3a, 0xedbf557a,
    0x2304017b, 0xdf0f69da, 0x831385df, 0x7c9bab7a, 0x56adcf90, 0x147b6373, 0x3e78c5a5, 0xa2fdcfb5,
    0x774dbf90, 0xa143678a, 0x744bf053, 0xc42422c3, 0x51e25394, 0xb4e3b73b, 0xb5dab88b, 0x787d2f56,
    0x649f78b2, 0x0ba4e82b, 0x83a83eb1, 0xa6b33ecc, 0xe5180860, 0xea35dcbd, 0xf0bdb16b, 0x4a657d57,
    0x3b6dc7c0, 0x4b252698, 0x15921d8b, 0x7a1bb2e4, 0x2eaf3e2b, 0x565935fe, 0x4bcf10c9, 0x18db690b,
    0xd1f2feff, 0x1e40762a, 0x79ba27f0, 0x1552ce04, 0x160fd2a0, 0xe44d5c7d, 0x2bf19238, 0xf9d0ab2d,
    0x899a7fe6, 0x2f86911b, 0x7eaf5882, 0x48d51717, 0xd59e9145, 0xcffd2389, 0xf3007564, 0x3342b451,
    0x68fe5769, 0x569af1b7, 0x597d53fe, 0xef27ce7f, 0xe5582816, 0x33e2aa15, 0x69bc031d, 0xb1acef52,
    0xc7b98241, 0xc792742b, 0x2989ac57, 0x1c505ef3, 0xba055bc7, 0x6c86b61c, 0x6b34ef76, 0xd8e5cff1,
    0x65a4f13d, 0xfb713ff8, 0x7ea70c8e, 0xe248dab2, 0xbd3b943a, 0x5a6345c2, 0x59588819, 0xa430c85a,
    0x0920e0e5, 0xc0687733, 0x60098716, 0xf2c2b3a6, 0x413c6bbb, 0x18cf8f3a, 0x3cb5290c, 0xe01b7803,
];

impl Chunker {
    /// Create a detector cutting near `chunk_size_target` on average,
    /// clamped to `[min, max]` from the dedup policy.
    pub fn new(chunk_size_target: usize, chunk_size_min: usize, chunk_size_max: usize) -> Self {
        let boundary_mask = (chunk_size_target.next_power_of_two() - 1) as u32;

        // below a few windows the hash has nothing to work with
        let chunk_len_min = chunk_size_min.max(4 * WINDOW_SIZE);
        let chunk_len_max = chunk_size_max.max(chunk_len_min + 1);

        Self {
            h: 0,
            window: [0u8; WINDOW_SIZE],
            filled: 0,
            chunk_len: 0,
            chunk_len_min,
            chunk_len_max,
            boundary_mask,
        }
    }

    /// Consume `data` and report the next chunk boundary.
    ///
    /// Returns the offset just past the boundary within `data`, or 0
    /// when `data` is exhausted without finding one (feed more input
    /// and call again). State carries over between calls, so feeding
    /// one byte at a time finds the same boundaries as feeding bulk
    /// slices.
    pub fn scan(&mut self, data: &[u8]) -> usize {
        for (consumed, &byte) in data.iter().enumerate() {
            let slot = self.chunk_len & (WINDOW_SIZE - 1);

            if self.filled == WINDOW_SIZE {
                // cyclic polynomial step. Evicting the oldest byte
                // needs its mix value rotated by the window width,
                // which for 64 on a u32 hash is the identity.
                let evicted = self.window[slot];
                self.h = self.h.rotate_left(1)
                    ^ MIX_TABLE[evicted as usize]
                    ^ MIX_TABLE[byte as usize];
            } else {
                self.h = self.h.rotate_left(1) ^ MIX_TABLE[byte as usize];
                self.filled += 1;
            }

            self.window[slot] = byte;
            self.chunk_len += 1;

            if self.cut_here() {
                self.h = 0;
                self.filled = 0;
                self.chunk_len = 0;
                return consumed + 1;
            }
        }

        0
    }

    fn cut_here(&self) -> bool {
        if self.chunk_len >= self.chunk_len_max {
            return true;
        }
        if self.chunk_len < self.chunk_len_min || self.filled < WINDOW_SIZE {
            return false;
        }

        (self.h & self.boundary_mask) == self.boundary_mask
    }
}

const READ_BUFFER_SIZE: usize = 256 * 1024;

enum SplitMode {
    Fixed(usize),
    ContentDefined(Chunker),
}

/// Split a blocking reader into chunk payloads.
///
/// The iterator yields owned chunks in source order; boundaries depend
/// only on the configured strategy, so the same input always produces
/// the same chunks.
pub struct ChunkStream<R> {
    input: R,
    path: PathBuf,
    mode: SplitMode,
    buffer: Vec<u8>,
    scan_pos: usize,
    eof: bool,
}

impl<R: Read> ChunkStream<R> {
    /// Fixed sized chunks of exactly `chunk_size` bytes.
    pub fn fixed(input: R, path: PathBuf, chunk_size: usize) -> Self {
        Self {
            input,
            path,
            mode: SplitMode::Fixed(chunk_size),
            buffer: Vec::new(),
            scan_pos: 0,
            eof: false,
        }
    }

    /// Content-defined chunks with the given target and bounds.
    pub fn content_defined(input: R, path: PathBuf, target: usize, min: usize, max: usize) -> Self {
        Self {
            input,
            path,
            mode: SplitMode::ContentDefined(Chunker::new(target, min, max)),
            buffer: Vec::new(),
            scan_pos: 0,
            eof: false,
        }
    }

    fn fill(&mut self) -> Result<usize> {
        let mut read_buf = [0u8; READ_BUFFER_SIZE];
        let count = self
            .input
            .read(&mut read_buf)
            .map_err(|err| Error::io(&self.path, err))?;
        self.buffer.extend_from_slice(&read_buf[..count]);
        if count == 0 {
            self.eof = true;
        }
        Ok(count)
    }

    fn take(&mut self, len: usize) -> Vec<u8> {
        let rest = self.buffer.split_off(len);
        let chunk = std::mem::replace(&mut self.buffer, rest);
        self.scan_pos = 0;
        chunk
    }
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.mode {
                SplitMode::Fixed(chunk_size) => {
                    let chunk_size = *chunk_size;
                    if self.buffer.len() >= chunk_size {
                        return Some(Ok(self.take(chunk_size)));
                    }
                }
                SplitMode::ContentDefined(chunker) => {
                    if self.scan_pos < self.buffer.len() {
                        let boundary = chunker.scan(&self.buffer[self.scan_pos..]);
                        if boundary == 0 {
                            self.scan_pos = self.buffer.len();
                        } else {
                            let chunk_size = self.scan_pos + boundary;
                            return Some(Ok(self.take(chunk_size)));
                        }
                    }
                }
            }

            if self.eof {
                if self.buffer.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut self.buffer);
                self.scan_pos = 0;
                return Some(Ok(rest));
            }

            if let Err(err) = self.fill() {
                return Some(Err(err));
            }
        }
    }
}
