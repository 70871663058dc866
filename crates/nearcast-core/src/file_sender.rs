//! Lazy outbound file sender over the binary sub-protocol.
//!
//! Re-targets `original_source/file_transfer.py::FileSender` at the binary
//! protocol (`binary.rs`) instead of its legacy Base64/JSON path: one meta
//! frame up front, then chunks of up to `CHUNK_SIZE` materialized one at a
//! time as the caller pulls them. There is no retry or acknowledgment
//! logic — a disconnect mid-transfer simply stops the sequence.

use crate::binary::{self, BinaryProtocolError, Compression};
use crate::types::FileId;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Chunk size used by the binary file-transfer path: 512 KiB.
pub const CHUNK_SIZE: usize = 512 * 1024;

#[derive(Debug, Error)]
pub enum FileSenderError {
    #[error("I/O error reading {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("binary protocol error: {0}")]
    Protocol(#[from] BinaryProtocolError),

    #[error("filename is not valid UTF-8: {0}")]
    FilenameNotUtf8(PathBuf),
}

/// Holds an open file and the cursor needed to emit its chunks in order.
pub struct FileSender {
    file_id: FileId,
    file: File,
    chunk_index: u32,
    size: u64,
    filename: String,
    path: PathBuf,
}

impl FileSender {
    /// Opens `path`, stats its size, and assigns a fresh `file_id`. Does not
    /// read any file data yet.
    pub async fn open(path: &Path) -> Result<Self, FileSenderError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FileSenderError::FilenameNotUtf8(path.to_path_buf()))?
            .to_string();

        let file = File::open(path).await.map_err(|source| FileSenderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let metadata = file.metadata().await.map_err(|source| FileSenderError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            file_id: FileId::generate(),
            file,
            chunk_index: 0,
            size: metadata.len(),
            filename,
            path: path.to_path_buf(),
        })
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Builds the meta frame payload that must be sent before any chunk.
    pub fn meta_frame(&self) -> Result<Vec<u8>, FileSenderError> {
        Ok(binary::encode_meta(self.file_id, self.size, Compression::None, &self.filename)?)
    }

    /// Reads and encodes the next chunk, or `None` once EOF is reached.
    ///
    /// Each call materializes exactly one `CHUNK_SIZE`-or-smaller chunk —
    /// the whole file is never buffered in memory at once.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, FileSenderError> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut read_total = 0;
        while read_total < CHUNK_SIZE {
            let n = self
                .file
                .read(&mut buf[read_total..])
                .await
                .map_err(|source| FileSenderError::Io { path: self.path.clone(), source })?;
            if n == 0 {
                break;
            }
            read_total += n;
        }
        if read_total == 0 {
            return Ok(None);
        }
        buf.truncate(read_total);
        let frame = binary::encode_chunk(self.file_id, self.chunk_index, &buf)?;
        self.chunk_index += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::decode_chunk;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    async fn write_temp_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).await.unwrap();
        f.write_all(contents).await.unwrap();
        f.flush().await.unwrap();
        path
    }

    #[tokio::test]
    async fn small_file_produces_one_chunk() {
        let tmp = TempDir::new().unwrap();
        let path = write_temp_file(tmp.path(), "hello.bin", &[0x41u8; 2048]).await;

        let mut sender = FileSender::open(&path).await.unwrap();
        let meta = sender.meta_frame().unwrap();
        let decoded_meta = crate::binary::decode_meta(&meta).unwrap();
        assert_eq!(decoded_meta.size, 2048);

        let chunk = sender.next_chunk().await.unwrap().unwrap();
        let decoded = decode_chunk(&chunk).unwrap();
        assert_eq!(decoded.data.len(), 2048);
        assert!(decoded.data.iter().all(|&b| b == 0x41));

        assert!(sender.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn large_file_chunks_at_512kib_boundaries() {
        let tmp = TempDir::new().unwrap();
        let contents = vec![0x7au8; 1_500_000];
        let path = write_temp_file(tmp.path(), "big.bin", &contents).await;

        let mut sender = FileSender::open(&path).await.unwrap();
        let _meta = sender.meta_frame().unwrap();

        let mut chunk_sizes = Vec::new();
        while let Some(frame) = sender.next_chunk().await.unwrap() {
            let decoded = decode_chunk(&frame).unwrap();
            chunk_sizes.push(decoded.data.len());
        }

        assert_eq!(chunk_sizes, vec![524288, 524288, 451424]);
        assert_eq!(chunk_sizes.iter().sum::<usize>(), 1_500_000);
    }

    #[tokio::test]
    async fn chunk_indices_are_monotonic() {
        let tmp = TempDir::new().unwrap();
        let contents = vec![0u8; CHUNK_SIZE * 2 + 10];
        let path = write_temp_file(tmp.path(), "idx.bin", &contents).await;

        let mut sender = FileSender::open(&path).await.unwrap();
        let mut indices = Vec::new();
        while let Some(frame) = sender.next_chunk().await.unwrap() {
            indices.push(decode_chunk(&frame).unwrap().chunk_index);
        }
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
