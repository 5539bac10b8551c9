// appreader.rs from nusclient
//
// Hashed/unhashed .app block reader: 4-level SHA-1 Merkle verification for
// hashed content, AES-CBC decryption chained across blocks, and a
// random-access get_data() built on top. Grounded on
// original_source/nus_tools/content/app/{read,decrypt}.py.

use std::io;

use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::crypto::{self, new_cbc_decryptor};

pub const HASH_TABLES_SIZE: usize = 0x400;
pub const DATA_SIZE: usize = 0xfc00;
const HASHES_PER_TABLE: usize = 16;
const HASH_LEN: usize = 20;
const UNHASHED_MEMORY_CAP: u64 = 128 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum AppReaderError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("checksum mismatch in `{field}`: expected {expected}, got {got}")]
    ChecksumMismatch { field: &'static str, expected: String, got: String },
    #[error("stream is not seekable and the requested position is behind the current one")]
    Unseekable,
    #[error("unhashed .app exceeds the {0}-byte in-memory cap")]
    TooLarge(u64),
    #[error("real app size {real} is smaller than the tmd app size {tmd}")]
    SizeInvariant { real: u64, tmd: u64 },
}

fn verify_sha1(field: &'static str, data: &[u8], expected: &[u8]) -> Result<(), AppReaderError> {
    let got = Sha1::digest(data);
    if got.as_slice() != expected {
        return Err(AppReaderError::ChecksumMismatch { field, expected: hex::encode(expected), got: hex::encode(got) });
    }
    Ok(())
}

/// A byte source an [`AppReader`] reads fixed-size blocks from. Implemented
/// directly for the two concrete sources this crate reads `.app` files from:
/// a local file (true seek) and a streamed [`crate::request::Reader`]
/// (forward-only, via [`ReaderSource`]).
pub trait BlockSource {
    fn read_exact_into(&mut self, buf: &mut [u8]) -> io::Result<()>;
    fn seek_to(&mut self, offset: u64) -> Result<(), AppReaderError>;
}

impl BlockSource for std::fs::File {
    fn read_exact_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
        use std::io::Read;
        self.read_exact(buf)
    }

    fn seek_to(&mut self, offset: u64) -> Result<(), AppReaderError> {
        use std::io::Seek;
        self.seek(io::SeekFrom::Start(offset))?;
        Ok(())
    }
}

/// Adapts a [`crate::request::Reader`] to [`BlockSource`]. The reader's
/// `read_chunk` is sized by `chunk_size`, which rarely lines up with the
/// fixed block sizes read here, so a small leftover buffer carries any
/// excess forward to the next read.
pub struct ReaderSource {
    reader: crate::request::Reader,
    leftover: Vec<u8>,
}

impl ReaderSource {
    pub fn new(reader: crate::request::Reader) -> Self {
        ReaderSource { reader, leftover: Vec::new() }
    }

    pub fn into_inner(self) -> crate::request::Reader {
        self.reader
    }

    fn consumed(&self) -> u64 {
        self.reader.current_offset() - self.leftover.len() as u64
    }
}

impl BlockSource for ReaderSource {
    fn read_exact_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        if !self.leftover.is_empty() {
            let take = self.leftover.len().min(buf.len());
            buf[..take].copy_from_slice(&self.leftover[..take]);
            self.leftover.drain(..take);
            filled += take;
        }
        while filled < buf.len() {
            let chunk = self
                .reader
                .read_chunk()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            if chunk.is_empty() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended before block was fully read"));
            }
            let take = chunk.len().min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&chunk[..take]);
            filled += take;
            if take < chunk.len() {
                self.leftover.extend_from_slice(&chunk[take..]);
            }
        }
        Ok(())
    }

    fn seek_to(&mut self, offset: u64) -> Result<(), AppReaderError> {
        let current = self.consumed();
        if offset < current {
            return Err(AppReaderError::Unseekable);
        }
        let mut remaining = offset - current;
        if !self.leftover.is_empty() {
            let drop = (self.leftover.len() as u64).min(remaining) as usize;
            self.leftover.drain(..drop);
            remaining -= drop as u64;
        }
        while remaining > 0 {
            let chunk = self
                .reader
                .read_chunk()
                .map_err(|e| AppReaderError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
            if chunk.is_empty() {
                break;
            }
            if chunk.len() as u64 > remaining {
                self.leftover.extend_from_slice(&chunk[remaining as usize..]);
                remaining = 0;
            } else {
                remaining -= chunk.len() as u64;
            }
        }
        Ok(())
    }
}

/// Decryption/verification parameters for one content entry, derived from
/// its TMD record and (if present) ticket title key.
#[derive(Debug, Clone)]
pub struct AppParams {
    pub encrypted: bool,
    pub content_hash: [u8; 20],
    pub title_key: Option<[u8; 16]>,
    pub content_index: u16,
    pub real_app_size: u64,
    pub tmd_app_size: u64,
}

/// Reads a single `.app` content stream, verifying and (if needed)
/// decrypting it block by block. Hashed streams use the 4-level H0-H3
/// Merkle tree (spec §4.8); unhashed streams buffer the whole decrypted
/// file once, capped at 128 MiB.
pub struct AppReader<S: BlockSource> {
    source: S,
    params: AppParams,
    verify: bool,
    h3_table: Option<Vec<u8>>,
    current_block: u64,
    unhashed_blob: Option<Vec<Vec<u8>>>,
    /// The most recently read block, reused by `get_data` so that two reads
    /// landing in the same block (e.g. two small sibling files) don't
    /// re-seek the underlying source. Mirrors `AppDataReader.__cache`.
    cached_block: Option<(u64, Vec<u8>)>,
}

impl<S: BlockSource> AppReader<S> {
    /// `h3` is `Some` for hashed content (and is itself verified against
    /// `params.content_hash` here), `None` for unhashed content.
    pub fn new(source: S, params: AppParams, h3: Option<Vec<u8>>, verify: bool) -> Result<Self, AppReaderError> {
        if params.real_app_size < params.tmd_app_size {
            return Err(AppReaderError::SizeInvariant { real: params.real_app_size, tmd: params.tmd_app_size });
        }
        if let (Some(h3), true) = (&h3, verify) {
            verify_sha1("content_hash", h3, &params.content_hash)?;
        }
        Ok(AppReader { source, params, verify, h3_table: h3, current_block: 0, unhashed_blob: None, cached_block: None })
    }

    pub fn is_hashed(&self) -> bool {
        self.h3_table.is_some()
    }

    fn data_size(&self) -> usize {
        DATA_SIZE
    }

    fn block_size(&self) -> usize {
        if self.is_hashed() { DATA_SIZE + HASH_TABLES_SIZE } else { DATA_SIZE }
    }

    fn hash_table_indices(block_index: u64) -> (usize, usize, usize, usize) {
        (
            (block_index & 0xf) as usize,
            ((block_index >> 4) & 0xf) as usize,
            ((block_index >> 8) & 0xf) as usize,
            ((block_index >> 12) & 0xf) as usize,
        )
    }

    /// Seeks (for hashed streams) to block `index` and reads it. Unhashed
    /// streams ignore `index` ordering beyond loading the whole blob once.
    pub fn load_block(&mut self, index: u64) -> Result<Vec<u8>, AppReaderError> {
        if self.is_hashed() && self.current_block != index {
            self.source.seek_to(index * self.block_size() as u64)?;
            self.current_block = index;
        }
        self.load_next_block()
    }

    /// Reads and verifies the next block in sequence.
    pub fn load_next_block(&mut self) -> Result<Vec<u8>, AppReaderError> {
        if self.is_hashed() {
            self.load_next_block_hashed()
        } else {
            self.load_next_block_unhashed()
        }
    }

    fn load_next_block_hashed(&mut self) -> Result<Vec<u8>, AppReaderError> {
        let mut hash_table = vec![0u8; HASH_TABLES_SIZE];
        self.source.read_exact_into(&mut hash_table)?;
        if self.params.encrypted {
            let mut decryptor = new_cbc_decryptor(self.params.title_key.unwrap_or([0u8; 16]), [0u8; 16]);
            for chunk in hash_table.chunks_exact_mut(16) {
                crypto::decrypt_block(&mut decryptor, chunk);
            }
        }

        let h0_table = &hash_table[0..HASHES_PER_TABLE * HASH_LEN];
        let h1_table = &hash_table[HASHES_PER_TABLE * HASH_LEN..2 * HASHES_PER_TABLE * HASH_LEN];
        let h2_table = &hash_table[2 * HASHES_PER_TABLE * HASH_LEN..3 * HASHES_PER_TABLE * HASH_LEN];

        let (i0, i1, i2, i3) = Self::hash_table_indices(self.current_block);
        let h0 = h0_table[i0 * HASH_LEN..(i0 + 1) * HASH_LEN].to_vec();
        let h1 = h1_table[i1 * HASH_LEN..(i1 + 1) * HASH_LEN].to_vec();
        let h2 = h2_table[i2 * HASH_LEN..(i2 + 1) * HASH_LEN].to_vec();
        let h3 = {
            let table = self.h3_table.as_ref().expect("hashed reader always has an h3 table");
            table[i3 * HASH_LEN..(i3 + 1) * HASH_LEN].to_vec()
        };

        if self.verify {
            verify_sha1("h3", h2_table, &h3)?;
            verify_sha1("h2", h1_table, &h2)?;
            verify_sha1("h1", h0_table, &h1)?;
        }

        let mut data = vec![0u8; DATA_SIZE];
        self.source.read_exact_into(&mut data)?;
        if self.params.encrypted {
            let iv: [u8; 16] = h0[..16].try_into().unwrap();
            let mut decryptor = new_cbc_decryptor(self.params.title_key.unwrap_or([0u8; 16]), iv);
            for chunk in data.chunks_exact_mut(16) {
                crypto::decrypt_block(&mut decryptor, chunk);
            }
        }
        if self.verify {
            verify_sha1("h0", &data, &h0)?;
        }

        self.current_block += 1;
        Ok(data)
    }

    fn load_next_block_unhashed(&mut self) -> Result<Vec<u8>, AppReaderError> {
        if self.unhashed_blob.is_none() {
            if self.params.real_app_size > UNHASHED_MEMORY_CAP {
                return Err(AppReaderError::TooLarge(UNHASHED_MEMORY_CAP));
            }
            let block_size = self.block_size();
            let num_blocks = self.params.real_app_size.div_ceil(block_size as u64) as usize;
            let mut blocks = Vec::with_capacity(num_blocks);

            let mut decryptor = self.params.encrypted.then(|| {
                let mut iv = [0u8; 16];
                iv[..2].copy_from_slice(&self.params.content_index.to_be_bytes());
                new_cbc_decryptor(self.params.title_key.unwrap_or([0u8; 16]), iv)
            });

            let mut hasher = Sha1::new();
            let mut hash_bytes_left = self.params.tmd_app_size;

            for _ in 0..num_blocks {
                let mut chunk = vec![0u8; block_size];
                self.source.read_exact_into(&mut chunk)?;
                if let Some(dec) = &mut decryptor {
                    for block in chunk.chunks_exact_mut(16) {
                        crypto::decrypt_block(dec, block);
                    }
                }
                if self.verify {
                    let take = (chunk.len() as u64).min(hash_bytes_left) as usize;
                    hasher.update(&chunk[..take]);
                    hash_bytes_left -= take as u64;
                }
                blocks.push(chunk);
            }

            if self.verify {
                let got = hasher.finalize();
                if got.as_slice() != self.params.content_hash {
                    return Err(AppReaderError::ChecksumMismatch {
                        field: "content_hash",
                        expected: hex::encode(self.params.content_hash),
                        got: hex::encode(got),
                    });
                }
            }
            self.unhashed_blob = Some(blocks);
        }

        let blob = self.unhashed_blob.as_ref().unwrap();
        let data = blob[self.current_block as usize].clone();
        self.current_block += 1;
        Ok(data)
    }

    /// Returns block `index`, reusing `cached_block` when it already holds
    /// that index instead of seeking and re-reading it.
    fn cached_block_for(&mut self, index: u64) -> Result<Vec<u8>, AppReaderError> {
        if let Some((cached_index, data)) = &self.cached_block {
            if *cached_index == index {
                return Ok(data.clone());
            }
        }
        let data = self.load_block(index)?;
        self.cached_block = Some((index, data.clone()));
        Ok(data)
    }

    /// Random-access read: advances block by block, concatenating the
    /// requested slice across as many blocks as needed. The first block is
    /// served from `cached_block` when possible, matching the original's
    /// `AppDataReader.get_data`, so two reads into the same block (the usual
    /// case for small sibling files sharing a 0xfc00 chunk) never re-seek
    /// the underlying source.
    pub fn get_data(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, AppReaderError> {
        let data_size = self.data_size() as u64;
        let mut remaining = length;
        let mut out = Vec::with_capacity(length as usize);

        let mut block_index = offset / data_size;
        let mut block = self.cached_block_for(block_index)?;
        let mut offset_in_block = (offset % data_size) as usize;

        loop {
            let take = remaining.min((block.len() - offset_in_block) as u64) as usize;
            out.extend_from_slice(&block[offset_in_block..offset_in_block + take]);
            remaining -= take as u64;
            if remaining == 0 {
                break;
            }
            block = self.load_next_block()?;
            block_index += 1;
            self.cached_block = Some((block_index, block.clone()));
            offset_in_block = 0;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor as IoCursor;

    /// Builds a single-block (index 0) hashed `.app` stream with a valid
    /// H0->H1->H2->H3 chain, per spec §4.8 step 5: `SHA1(H2)==h3`,
    /// `SHA1(H1)==h2`, `SHA1(H0)==h1`, `SHA1(data)==h0`.
    fn build_hashed_app(data: &[u8; DATA_SIZE]) -> (Vec<u8>, Vec<u8>) {
        let mut h0_table = vec![0u8; HASHES_PER_TABLE * HASH_LEN];
        let mut h1_table = vec![0u8; HASHES_PER_TABLE * HASH_LEN];
        let mut h2_table = vec![0u8; HASHES_PER_TABLE * HASH_LEN];

        h0_table[..HASH_LEN].copy_from_slice(&Sha1::digest(data));
        h1_table[..HASH_LEN].copy_from_slice(&Sha1::digest(&h0_table));
        h2_table[..HASH_LEN].copy_from_slice(&Sha1::digest(&h1_table));
        let h3 = Sha1::digest(&h2_table).to_vec();

        let mut hash_table = vec![0u8; HASH_TABLES_SIZE];
        hash_table[0..HASHES_PER_TABLE * HASH_LEN].copy_from_slice(&h0_table);
        hash_table[HASHES_PER_TABLE * HASH_LEN..2 * HASHES_PER_TABLE * HASH_LEN].copy_from_slice(&h1_table);
        hash_table[2 * HASHES_PER_TABLE * HASH_LEN..3 * HASHES_PER_TABLE * HASH_LEN].copy_from_slice(&h2_table);

        let mut stream = hash_table;
        stream.extend_from_slice(data);

        (stream, h3)
    }

    fn params(content_hash: [u8; 20], size: u64) -> AppParams {
        AppParams {
            encrypted: false,
            content_hash,
            title_key: None,
            content_index: 0,
            real_app_size: size,
            tmd_app_size: size,
        }
    }

    struct VecSource(IoCursor<Vec<u8>>);

    impl BlockSource for VecSource {
        fn read_exact_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
            use std::io::Read;
            self.0.read_exact(buf)
        }

        fn seek_to(&mut self, offset: u64) -> Result<(), AppReaderError> {
            use std::io::Seek;
            self.0.seek(io::SeekFrom::Start(offset))?;
            Ok(())
        }
    }

    #[test]
    fn hashed_block_verifies_and_returns_data() {
        let mut block = [0u8; DATA_SIZE];
        block[0] = 0x42;
        let (stream, h3) = build_hashed_app(&block);
        let content_hash: [u8; 20] = Sha1::digest(&h3).into();

        let mut reader = AppReader::new(VecSource(IoCursor::new(stream)), params(content_hash, DATA_SIZE as u64), Some(h3), true).unwrap();
        let data = reader.load_block(0).unwrap();
        assert_eq!(data[0], 0x42);
    }

    #[test]
    fn tampered_data_fails_h0_checksum() {
        let mut block = [0u8; DATA_SIZE];
        block[0] = 1;
        let (mut stream, h3) = build_hashed_app(&block);
        let content_hash: [u8; 20] = Sha1::digest(&h3).into();
        // flip a byte inside the data region, after the hash table
        let data_start = HASH_TABLES_SIZE;
        stream[data_start] ^= 0xff;

        let mut reader = AppReader::new(VecSource(IoCursor::new(stream)), params(content_hash, DATA_SIZE as u64), Some(h3), true).unwrap();
        let err = reader.load_block(0).unwrap_err();
        assert!(matches!(err, AppReaderError::ChecksumMismatch { field: "h0", .. }));
    }

    #[test]
    fn tampered_h0_table_fails_h1_checksum() {
        let block = [0u8; DATA_SIZE];
        let (mut stream, h3) = build_hashed_app(&block);
        let content_hash: [u8; 20] = Sha1::digest(&h3).into();
        // flip a byte inside the H0 table, within the hash-table prefix
        stream[0] ^= 0xff;

        let mut reader = AppReader::new(VecSource(IoCursor::new(stream)), params(content_hash, DATA_SIZE as u64), Some(h3), true).unwrap();
        let err = reader.load_block(0).unwrap_err();
        assert!(matches!(err, AppReaderError::ChecksumMismatch { field: "h1", .. }));
    }

    #[test]
    fn unhashed_get_data_spans_blocks() {
        let size = DATA_SIZE as u64 + 100;
        let mut stream = vec![0xABu8; DATA_SIZE];
        stream.extend(vec![0xCDu8; 100]);
        let content_hash: [u8; 20] = Sha1::digest(&stream).into();

        let mut reader = AppReader::new(VecSource(IoCursor::new(stream)), params(content_hash, size), None, true).unwrap();
        let data = reader.get_data(DATA_SIZE as u64 - 10, 20).unwrap();
        assert_eq!(&data[..10], &[0xAB; 10]);
        assert_eq!(&data[10..], &[0xCD; 10]);
    }

    #[test]
    fn size_invariant_violation_is_rejected() {
        let params = AppParams {
            encrypted: false,
            content_hash: [0u8; 20],
            title_key: None,
            content_index: 0,
            real_app_size: 10,
            tmd_app_size: 20,
        };
        let result = AppReader::new(VecSource(IoCursor::new(vec![0u8; 10])), params, None, true);
        assert!(matches!(result, Err(AppReaderError::SizeInvariant { .. })));
    }

    /// A forward-only source, like `ReaderSource`: `seek_to` with an offset
    /// behind the current position fails instead of rewinding.
    struct ForwardOnlySource {
        data: Vec<u8>,
        pos: usize,
    }

    impl BlockSource for ForwardOnlySource {
        fn read_exact_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
            let end = self.pos + buf.len();
            if end > self.data.len() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected eof"));
            }
            buf.copy_from_slice(&self.data[self.pos..end]);
            self.pos = end;
            Ok(())
        }

        fn seek_to(&mut self, offset: u64) -> Result<(), AppReaderError> {
            let offset = offset as usize;
            if offset < self.pos {
                return Err(AppReaderError::Unseekable);
            }
            self.pos = offset;
            Ok(())
        }
    }

    #[test]
    fn get_data_reuses_cached_block_for_sibling_reads() {
        // Two small sibling files both land in block 0; a forward-only
        // source must not be re-seeked to serve the second one.
        let mut block = [0u8; DATA_SIZE];
        block[0] = 0xAA;
        block[10] = 0xBB;
        let (stream, h3) = build_hashed_app(&block);
        let content_hash: [u8; 20] = Sha1::digest(&h3).into();

        let source = ForwardOnlySource { data: stream, pos: 0 };
        let mut reader = AppReader::new(source, params(content_hash, DATA_SIZE as u64), Some(h3), true).unwrap();

        let first = reader.get_data(0, 1).unwrap();
        assert_eq!(first[0], 0xAA);
        let second = reader.get_data(10, 1).unwrap();
        assert_eq!(second[0], 0xBB);
    }
}
