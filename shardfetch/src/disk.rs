//! Destination file handling.
//!
//! The destination is pre-allocated to its final size before any shard
//! starts, so shards can write concurrently at disjoint offsets through
//! independent file handles without locking.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::error::{FetchError, FetchResult};

/// Write buffer size for streaming response bodies to disk (64 KiB).
pub const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Create the destination file and truncate it to exactly `size` bytes.
///
/// Reserves the full span up front (best-effort on the host filesystem) and
/// gives every shard a valid seek target.
pub async fn allocate_blank_file(path: &Path, size: u64) -> FetchResult<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .map_err(|e| FetchError::io(path, e))?;
    file.set_len(size)
        .await
        .map_err(|e| FetchError::io(path, e))?;
    debug!(path = %path.display(), size, "pre-allocated destination file");
    Ok(())
}

/// Streams bytes into a fixed region of the destination file.
///
/// Each chunk is written and flushed immediately; after an abrupt
/// termination the bytes on disk never lag the recorded progress by more
/// than one chunk.
pub struct RegionWriter {
    writer: BufWriter<tokio::fs::File>,
    path: PathBuf,
}

impl RegionWriter {
    /// Open the destination for writing and position it at `offset`.
    pub async fn open(path: &Path, offset: u64) -> FetchResult<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| FetchError::io(path, e))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| FetchError::io(path, e))?;
        }
        Ok(Self {
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            path: path.to_path_buf(),
        })
    }

    /// Write one chunk and flush it to the file.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> FetchResult<()> {
        self.writer
            .write_all(chunk)
            .await
            .map_err(|e| FetchError::io(&self.path, e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| FetchError::io(&self.path, e))?;
        Ok(())
    }
}
