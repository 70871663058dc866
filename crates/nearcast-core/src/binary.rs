//! Binary file-transfer sub-protocol.
//!
//! Binary frames share the outer `framing.rs` length prefix but carry their
//! own inner magic, type byte, and per-frame CRC32 checksum instead of JSON.
//! Two frame types are implemented: `meta` (announces an incoming file) and
//! `chunk` (one slice of file data). `ack` is reserved on the wire but never
//! produced or consumed here.

use crate::types::FileId;
use thiserror::Error;

/// Three-byte magic that opens every binary frame: `b"BIN"`.
pub const MAGIC: [u8; 3] = *b"BIN";

pub const FRAME_TYPE_META: u8 = 0x01;
pub const FRAME_TYPE_CHUNK: u8 = 0x02;
/// Reserved; no frame of this type is ever produced or accepted.
pub const FRAME_TYPE_ACK: u8 = 0x03;

/// Largest file this protocol will announce or accept: 5 GiB.
pub const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;
/// Largest filename, in UTF-8 bytes, carried by a meta frame.
pub const MAX_FILENAME: usize = 1024;
/// Largest chunk payload accepted by the decoder.
pub const MAX_CHUNK: usize = 10 * 1024 * 1024;
/// Smallest chunk payload a *non-terminal* chunk may carry. The decoder does
/// not enforce this — it cannot tell a terminal chunk from a short one — so
/// it's the sender's responsibility (see `file_sender.rs` and DESIGN.md's
/// note on the original's off-by-one around the final chunk).
pub const MIN_CHUNK: usize = 1024;

/// Compression applied to a file's bytes. Only `None` is ever produced;
/// receivers may reject anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lz4,
    Gzip,
}

impl Compression {
    fn to_byte(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
            Compression::Gzip => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self, BinaryProtocolError> {
        match b {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            2 => Ok(Compression::Gzip),
            other => Err(BinaryProtocolError::UnsupportedCompression { value: other }),
        }
    }
}

#[derive(Debug, Error)]
pub enum BinaryProtocolError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },

    #[error("bad magic bytes")]
    BadMagic,

    #[error("unexpected frame type 0x{0:02x}")]
    UnexpectedType(u8),

    #[error("frame length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("CRC32 mismatch: expected {expected:08x}, computed {computed:08x}")]
    CrcMismatch { expected: u32, computed: u32 },

    #[error("file size {size} exceeds the {MAX_FILE_SIZE}-byte limit")]
    FileTooLarge { size: u64 },

    #[error("filename length {len} exceeds the {MAX_FILENAME}-byte limit")]
    FilenameTooLong { len: usize },

    #[error("filename is not valid UTF-8")]
    FilenameNotUtf8,

    #[error("chunk size {size} exceeds the {MAX_CHUNK}-byte limit")]
    ChunkTooLarge { size: usize },

    #[error("unsupported compression flag {value}")]
    UnsupportedCompression { value: u8 },
}

/// A parsed `meta` frame: announces an incoming file transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaFrame {
    pub file_id: FileId,
    pub size: u64,
    pub compression: Compression,
    pub filename: String,
}

/// A parsed `chunk` frame: one slice of file data, in send order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFrame {
    pub file_id: FileId,
    pub chunk_index: u32,
    pub data: Vec<u8>,
}

/// Encodes a `meta` frame's inner payload (everything the outer frame codec
/// treats as an opaque byte string).
///
/// Layout: `magic(3) type(1) file_id(16) size(8) compression(1)
/// filename_len(2) filename_bytes(N) crc32(4)`, with the CRC32 computed over
/// every byte after the magic and before the trailing checksum.
pub fn encode_meta(
    file_id: FileId,
    size: u64,
    compression: Compression,
    filename: &str,
) -> Result<Vec<u8>, BinaryProtocolError> {
    if size > MAX_FILE_SIZE {
        return Err(BinaryProtocolError::FileTooLarge { size });
    }
    let filename_bytes = filename.as_bytes();
    if filename_bytes.len() > MAX_FILENAME {
        return Err(BinaryProtocolError::FilenameTooLong { len: filename_bytes.len() });
    }

    let mut body = Vec::with_capacity(1 + 16 + 8 + 1 + 2 + filename_bytes.len());
    body.push(FRAME_TYPE_META);
    body.extend_from_slice(file_id.as_bytes());
    body.extend_from_slice(&size.to_be_bytes());
    body.push(compression.to_byte());
    body.extend_from_slice(&(filename_bytes.len() as u16).to_be_bytes());
    body.extend_from_slice(filename_bytes);

    let crc = crc32fast::hash(&body);

    let mut frame = Vec::with_capacity(3 + body.len() + 4);
    frame.extend_from_slice(&MAGIC);
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&crc.to_be_bytes());
    Ok(frame)
}

/// Decodes a `meta` frame, validating magic, type, declared lengths, limits,
/// CRC, and filename UTF-8 validity.
pub fn decode_meta(frame: &[u8]) -> Result<MetaFrame, BinaryProtocolError> {
    // magic(3) + type(1) + file_id(16) + size(8) + compression(1) + filename_len(2) + crc(4)
    const FIXED_LEN: usize = 3 + 1 + 16 + 8 + 1 + 2 + 4;
    if frame.len() < FIXED_LEN {
        return Err(BinaryProtocolError::TooShort { len: frame.len() });
    }
    if frame[0..3] != MAGIC {
        return Err(BinaryProtocolError::BadMagic);
    }
    let frame_type = frame[3];
    if frame_type != FRAME_TYPE_META {
        return Err(BinaryProtocolError::UnexpectedType(frame_type));
    }

    let mut file_id_bytes = [0u8; 16];
    file_id_bytes.copy_from_slice(&frame[4..20]);
    let size = u64::from_be_bytes(frame[20..28].try_into().unwrap());
    let compression = Compression::from_byte(frame[28])?;
    let filename_len = u16::from_be_bytes(frame[29..31].try_into().unwrap()) as usize;

    let expected_len = FIXED_LEN + filename_len;
    if frame.len() != expected_len {
        return Err(BinaryProtocolError::LengthMismatch {
            declared: expected_len,
            actual: frame.len(),
        });
    }
    if filename_len > MAX_FILENAME {
        return Err(BinaryProtocolError::FilenameTooLong { len: filename_len });
    }
    if size > MAX_FILE_SIZE {
        return Err(BinaryProtocolError::FileTooLarge { size });
    }

    let filename_start = 31;
    let filename_end = filename_start + filename_len;
    let filename_bytes = &frame[filename_start..filename_end];

    let crc_start = filename_end;
    let expected_crc = u32::from_be_bytes(frame[crc_start..crc_start + 4].try_into().unwrap());
    let computed_crc = crc32fast::hash(&frame[3..crc_start]);
    if expected_crc != computed_crc {
        return Err(BinaryProtocolError::CrcMismatch { expected: expected_crc, computed: computed_crc });
    }

    let filename = std::str::from_utf8(filename_bytes)
        .map_err(|_| BinaryProtocolError::FilenameNotUtf8)?
        .to_string();

    Ok(MetaFrame {
        file_id: FileId::from_bytes(file_id_bytes),
        size,
        compression,
        filename,
    })
}

/// Encodes a `chunk` frame's inner payload.
///
/// Layout: `magic(3) type(1) file_id(16) chunk_index(4) chunk_size(4)
/// chunk_bytes(N) crc32(4)`, with the CRC32 computed over `chunk_bytes`
/// alone (unlike the meta frame, whose CRC spans the whole header).
pub fn encode_chunk(file_id: FileId, chunk_index: u32, data: &[u8]) -> Result<Vec<u8>, BinaryProtocolError> {
    if data.len() > MAX_CHUNK {
        return Err(BinaryProtocolError::ChunkTooLarge { size: data.len() });
    }

    let crc = crc32fast::hash(data);

    let mut frame = Vec::with_capacity(3 + 1 + 16 + 4 + 4 + data.len() + 4);
    frame.extend_from_slice(&MAGIC);
    frame.push(FRAME_TYPE_CHUNK);
    frame.extend_from_slice(file_id.as_bytes());
    frame.extend_from_slice(&chunk_index.to_be_bytes());
    frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
    frame.extend_from_slice(data);
    frame.extend_from_slice(&crc.to_be_bytes());
    Ok(frame)
}

/// Decodes a `chunk` frame, validating the exact declared-vs-actual length,
/// magic, type, the chunk-size upper bound, and the CRC of the data bytes.
///
/// The lower bound `MIN_CHUNK` is deliberately not enforced here — the
/// decoder has no way to know whether a short chunk is the legitimate final
/// chunk of a file or a malformed one (see DESIGN.md's Open Question note).
pub fn decode_chunk(frame: &[u8]) -> Result<ChunkFrame, BinaryProtocolError> {
    // magic(3) + type(1) + file_id(16) + chunk_index(4) + chunk_size(4)
    const HEADER_LEN: usize = 3 + 1 + 16 + 4 + 4;
    if frame.len() < HEADER_LEN + 4 {
        return Err(BinaryProtocolError::TooShort { len: frame.len() });
    }
    if frame[0..3] != MAGIC {
        return Err(BinaryProtocolError::BadMagic);
    }
    let frame_type = frame[3];
    if frame_type != FRAME_TYPE_CHUNK {
        return Err(BinaryProtocolError::UnexpectedType(frame_type));
    }

    let mut file_id_bytes = [0u8; 16];
    file_id_bytes.copy_from_slice(&frame[4..20]);
    let chunk_index = u32::from_be_bytes(frame[20..24].try_into().unwrap());
    let chunk_size = u32::from_be_bytes(frame[24..28].try_into().unwrap()) as usize;

    let expected_len = HEADER_LEN + chunk_size + 4;
    if frame.len() != expected_len {
        return Err(BinaryProtocolError::LengthMismatch {
            declared: expected_len,
            actual: frame.len(),
        });
    }
    if chunk_size > MAX_CHUNK {
        return Err(BinaryProtocolError::ChunkTooLarge { size: chunk_size });
    }

    let data_start = HEADER_LEN;
    let data_end = data_start + chunk_size;
    let data = &frame[data_start..data_end];

    let crc_start = data_end;
    let expected_crc = u32::from_be_bytes(frame[crc_start..crc_start + 4].try_into().unwrap());
    let computed_crc = crc32fast::hash(data);
    if expected_crc != computed_crc {
        return Err(BinaryProtocolError::CrcMismatch { expected: expected_crc, computed: computed_crc });
    }

    Ok(ChunkFrame {
        file_id: FileId::from_bytes(file_id_bytes),
        chunk_index,
        data: data.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_roundtrip() {
        let file_id = FileId::generate();
        let frame = encode_meta(file_id, 2048, Compression::None, "hello.bin").unwrap();
        let decoded = decode_meta(&frame).unwrap();
        assert_eq!(decoded.file_id, file_id);
        assert_eq!(decoded.size, 2048);
        assert_eq!(decoded.compression, Compression::None);
        assert_eq!(decoded.filename, "hello.bin");
    }

    #[test]
    fn chunk_roundtrip() {
        let file_id = FileId::generate();
        let data = vec![0x41u8; 2048];
        let frame = encode_chunk(file_id, 0, &data).unwrap();
        let decoded = decode_chunk(&frame).unwrap();
        assert_eq!(decoded.file_id, file_id);
        assert_eq!(decoded.chunk_index, 0);
        assert_eq!(decoded.data, data);
    }

    #[test]
    fn chunk_below_min_still_decodes() {
        // The decoder can't tell a short terminal chunk from a malformed
        // one, so it must accept it (the sender is responsible for only
        // emitting short chunks at EOF).
        let file_id = FileId::generate();
        let data = vec![0x42u8; 5];
        let frame = encode_chunk(file_id, 3, &data).unwrap();
        let decoded = decode_chunk(&frame).unwrap();
        assert_eq!(decoded.data, data);
    }

    #[test]
    fn bad_crc_is_rejected() {
        let file_id = FileId::generate();
        let data = vec![0x41u8; 16];
        let mut frame = encode_chunk(file_id, 0, &data).unwrap();
        // Flip a byte inside the chunk data, invalidating the trailing CRC.
        let data_start = 3 + 1 + 16 + 4 + 4;
        frame[data_start] ^= 0xFF;
        assert!(matches!(decode_chunk(&frame), Err(BinaryProtocolError::CrcMismatch { .. })));
    }

    #[test]
    fn oversize_filename_rejected() {
        let file_id = FileId::generate();
        let long_name = "a".repeat(MAX_FILENAME + 1);
        assert!(matches!(
            encode_meta(file_id, 10, Compression::None, &long_name),
            Err(BinaryProtocolError::FilenameTooLong { .. })
        ));
    }

    #[test]
    fn oversize_filename_len_rejected_on_decode() {
        // Craft a frame whose declared filename_len (2000) exceeds MAX_FILENAME,
        // without actually including 2000 bytes of filename — the length check
        // must fire before any attempt to slice that far.
        let mut frame = Vec::new();
        frame.extend_from_slice(&MAGIC);
        frame.push(FRAME_TYPE_META);
        frame.extend_from_slice(&[0u8; 16]);
        frame.extend_from_slice(&100u64.to_be_bytes());
        frame.push(0);
        frame.extend_from_slice(&2000u16.to_be_bytes());
        assert!(matches!(decode_meta(&frame), Err(BinaryProtocolError::LengthMismatch { .. })));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut frame = encode_chunk(FileId::generate(), 0, b"x").unwrap();
        frame[0] = 0;
        assert!(matches!(decode_chunk(&frame), Err(BinaryProtocolError::BadMagic)));
    }

    #[test]
    fn wrong_frame_type_rejected() {
        let mut frame = encode_chunk(FileId::generate(), 0, b"x").unwrap();
        frame[3] = FRAME_TYPE_META;
        assert!(matches!(decode_chunk(&frame), Err(BinaryProtocolError::UnexpectedType(_))));
    }

    #[test]
    fn five_byte_file_padded_to_min_chunk() {
        // "HELLO" is 5 bytes, below MIN_CHUNK; a sender must pad non-terminal
        // chunks, but as the sole (terminal) chunk it's accepted verbatim.
        let file_id = FileId::generate();
        let frame = encode_chunk(file_id, 0, b"HELLO").unwrap();
        let decoded = decode_chunk(&frame).unwrap();
        assert_eq!(decoded.data, b"HELLO");
    }

    #[test]
    fn chunk_too_large_rejected() {
        let oversized = vec![0u8; MAX_CHUNK + 1];
        assert!(matches!(
            encode_chunk(FileId::generate(), 0, &oversized),
            Err(BinaryProtocolError::ChunkTooLarge { .. })
        ));
    }
}
