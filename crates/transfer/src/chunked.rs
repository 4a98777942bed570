use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::types::Chunk;
use crate::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub async fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a file in fixed-size chunks with SHA-256 digests.
///
/// Every file yields at least one chunk: an empty file produces a single
/// empty chunk marked last.
pub struct ChunkReader {
    file: File,
    chunk_size: usize,
    offset: u64,
    file_size: u64,
    done: bool,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// A `chunk_size` of 0 selects [`DEFAULT_CHUNK_SIZE`]; larger values are
    /// capped at [`MAX_CHUNK_SIZE`].
    pub async fn open(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = File::open(path).await?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(TransferError::InvalidPath(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let chunk_size = match chunk_size {
            0 => DEFAULT_CHUNK_SIZE,
            n => n.min(MAX_CHUNK_SIZE),
        };
        Ok(Self {
            file,
            chunk_size,
            offset: 0,
            file_size: meta.len(),
            done: false,
        })
    }

    /// Reads the next chunk, or `None` after the last one.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.done {
            return Ok(None);
        }

        let remaining = self.file_size.saturating_sub(self.offset);
        let window = remaining.min(self.chunk_size as u64);
        let mut data = Vec::with_capacity(window as usize);
        let n = (&mut self.file).take(window).read_to_end(&mut data).await? as u64;

        // A short read means the file shrank underneath us; end here and let
        // the receiver's size check report it.
        let is_last = n < window || self.offset + n >= self.file_size;
        let chunk = Chunk {
            offset: self.offset,
            digest: checksum_bytes(&data),
            data,
            is_last,
        };
        self.offset += n;
        self.done = is_last;
        Ok(Some(chunk))
    }

    /// Current read offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the file when it was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}
