//! Streaming inbound file receiver.
//!
//! One `FileReceiver` is created per `file_id` on meta receipt and destroyed
//! once `bytes_written >= total_size`. Chunks are written to disk in arrival
//! order — there is no reordering buffer, so the wire order is the byte
//! order on disk (`original_source/file_transfer.py::FileReceiver`, adapted
//! from its legacy Base64 path onto the binary sub-protocol).

use crate::binary::ChunkFrame;
use crate::types::FileId;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Directory name, relative to the data directory, files are written into.
pub const RECEIVED_DIR: &str = "received";

/// Name substituted when sanitization would otherwise produce an empty,
/// `.`, or `..` filename.
const FALLBACK_FILENAME: &str = "unnamed_file";

/// Filenames are clamped to this many bytes, preserving the extension.
const MAX_SANITIZED_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum FileReceiverError {
    #[error("I/O error writing {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

/// Strips directory components and NULs, then clamps the remainder to
/// `MAX_SANITIZED_LEN` bytes while preserving the file extension.
///
/// Falls back to `"unnamed_file"` for an empty, `.`, or `..` result —
/// mirroring the same three edge cases `os.path.basename` alone wouldn't
/// catch in the original.
pub fn sanitize_filename(raw: &str) -> String {
    let base = Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let cleaned: String = base.chars().filter(|&c| c != '\0').collect();

    let candidate = if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned
    };

    clamp_preserving_extension(&candidate)
}

fn clamp_preserving_extension(name: &str) -> String {
    if name.len() <= MAX_SANITIZED_LEN {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 && dot < name.len() - 1 => {
            let ext = &name[dot..];
            let stem_budget = MAX_SANITIZED_LEN.saturating_sub(ext.len());
            let stem = truncate_at_char_boundary(&name[..dot], stem_budget);
            format!("{stem}{ext}")
        }
        _ => truncate_at_char_boundary(name, MAX_SANITIZED_LEN),
    }
}

fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// One in-flight inbound file transfer.
pub struct FileReceiver {
    file_id: FileId,
    path: PathBuf,
    file: File,
    total_size: u64,
    bytes_written: u64,
    received_chunk_indices: HashSet<u32>,
    last_chunk_index: Option<u32>,
}

impl FileReceiver {
    /// Creates the `received/` directory under `data_dir` if needed, opens
    /// the sanitized output path for writing, and records `total_size`.
    ///
    /// Follows the documented path-collision policy: an existing file at
    /// the sanitized path is overwritten.
    pub async fn create(
        data_dir: &Path,
        file_id: FileId,
        filename: &str,
        total_size: u64,
    ) -> Result<Self, FileReceiverError> {
        let dir = data_dir.join(RECEIVED_DIR);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| FileReceiverError::Io { path: dir.clone(), source })?;

        let sanitized = sanitize_filename(filename);
        let path = dir.join(sanitized);
        let file = File::create(&path)
            .await
            .map_err(|source| FileReceiverError::Io { path: path.clone(), source })?;

        Ok(Self {
            file_id,
            path,
            file,
            total_size,
            bytes_written: 0,
            received_chunk_indices: HashSet::new(),
            last_chunk_index: None,
        })
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_written >= self.total_size
    }

    /// Writes one chunk's bytes in arrival order (no reordering) and
    /// returns whether the transfer is now complete.
    pub async fn write_chunk(&mut self, chunk: &ChunkFrame) -> Result<bool, FileReceiverError> {
        self.file
            .write_all(&chunk.data)
            .await
            .map_err(|source| FileReceiverError::Io { path: self.path.clone(), source })?;
        self.bytes_written += chunk.data.len() as u64;
        self.received_chunk_indices.insert(chunk.chunk_index);
        self.last_chunk_index = Some(chunk.chunk_index);
        Ok(self.is_complete())
    }

    /// Flushes and closes the output handle, returning the final path.
    pub async fn finish(mut self) -> Result<PathBuf, FileReceiverError> {
        self.file
            .flush()
            .await
            .map_err(|source| FileReceiverError::Io { path: self.path.clone(), source })?;
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary;
    use tempfile::TempDir;

    #[test]
    fn sanitize_strips_directory_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("a/b/c.txt"), "c.txt");
    }

    #[test]
    fn sanitize_removes_nuls() {
        assert_eq!(sanitize_filename("evil\0name.txt"), "evilname.txt");
    }

    #[test]
    fn sanitize_falls_back_on_empty_or_dot() {
        assert_eq!(sanitize_filename(""), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("."), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename(".."), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("a/.."), FALLBACK_FILENAME);
    }

    #[test]
    fn sanitize_clamps_long_names_preserving_extension() {
        let long_stem = "a".repeat(300);
        let name = format!("{long_stem}.txt");
        let sanitized = sanitize_filename(&name);
        assert!(sanitized.len() <= MAX_SANITIZED_LEN);
        assert!(sanitized.ends_with(".txt"));
    }

    #[tokio::test]
    async fn receives_2048_byte_file_in_one_chunk() {
        let tmp = TempDir::new().unwrap();
        let file_id = FileId::generate();
        let data = vec![0x41u8; 2048];

        let mut receiver = FileReceiver::create(tmp.path(), file_id, "hello.bin", 2048)
            .await
            .unwrap();

        let chunk_frame = binary::encode_chunk(file_id, 0, &data).unwrap();
        let decoded = binary::decode_chunk(&chunk_frame).unwrap();
        let complete = receiver.write_chunk(&decoded).await.unwrap();
        assert!(complete);

        let path = receiver.finish().await.unwrap();
        let on_disk = tokio::fs::read(&path).await.unwrap();
        assert_eq!(on_disk.len(), 2048);
        assert!(on_disk.iter().all(|&b| b == 0x41));
    }

    #[tokio::test]
    async fn receives_chunked_transfer_in_arrival_order() {
        let tmp = TempDir::new().unwrap();
        let file_id = FileId::generate();
        let sizes = [524288usize, 524288, 451424];
        let total: u64 = sizes.iter().sum::<usize>() as u64;

        let mut receiver = FileReceiver::create(tmp.path(), file_id, "big.bin", total)
            .await
            .unwrap();

        for (i, size) in sizes.iter().enumerate() {
            let data = vec![(i as u8) + 1; *size];
            let frame = binary::encode_chunk(file_id, i as u32, &data).unwrap();
            let decoded = binary::decode_chunk(&frame).unwrap();
            receiver.write_chunk(&decoded).await.unwrap();
        }
        assert!(receiver.is_complete());

        let path = receiver.finish().await.unwrap();
        let on_disk = tokio::fs::read(&path).await.unwrap();
        assert_eq!(on_disk.len(), total as usize);
    }
}
