//! Length-prefixed frame codec shared by the JSON envelope and binary
//! sub-protocols.
//!
//! # Wire Format
//!
//! ```text
//! +-------------------+------------------------------+
//! | Length (4 bytes)   | Payload                     |
//! | big-endian u32     | (variable length)            |
//! +-------------------+------------------------------+
//! ```
//!
//! The length prefix excludes itself: it is the number of payload bytes that
//! follow. Both JSON control frames and binary data frames share this same
//! outer framing; the first byte(s) of the payload tell a reader which one
//! it got (see [`classify`]).

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum acceptable framed payload: 11 MiB. Exceeding this is a fatal
/// protocol error on that connection.
pub const MAX_FRAME_SIZE: u32 = 11 * 1024 * 1024;

/// Errors that can occur while reading or writing a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {size} bytes (max {MAX_FRAME_SIZE})")]
    TooLarge { size: u32 },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("unrecognized frame payload (first byte 0x{0:02x})")]
    UnknownKind(u8),
}

/// Which sub-protocol a frame's payload belongs to, per the demultiplexing
/// rule: `0x7B` ('{') is JSON, `b"BIN"` is the binary sub-protocol, anything
/// else is a fatal protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Json,
    Binary,
}

/// Classifies a frame payload by inspecting its leading bytes.
///
/// An empty payload has no byte to classify and is the caller's
/// responsibility to skip (see the peer connection's read loop).
pub fn classify(payload: &[u8]) -> Result<FrameKind, FrameError> {
    match payload.first() {
        Some(0x7B) => Ok(FrameKind::Json),
        Some(b'B') if payload.len() >= 3 && &payload[1..3] == b"IN" => Ok(FrameKind::Binary),
        Some(other) => Err(FrameError::UnknownKind(*other)),
        None => Err(FrameError::UnknownKind(0)),
    }
}

/// Writes a length-prefixed frame to an async writer, flushing immediately.
///
/// A single atomic `write_all` keeps the prefix and payload from being
/// interleaved with a concurrent writer on the same stream; callers must
/// still hold the peer's write-exclusion primitive across this call.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), FrameError> {
    let length = payload.len() as u32;
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge { size: length });
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame from an async reader.
///
/// Reads exactly `length` bytes — no more, no less — before returning
/// control to the caller for the next frame. A clean close while reading
/// the length prefix, or mid-payload, is reported as
/// [`FrameError::ConnectionClosed`]; a length prefix over
/// [`MAX_FRAME_SIZE`] is [`FrameError::TooLarge`]. The returned payload may
/// be empty (a zero-length frame); skipping it is the caller's decision.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }
    let length = u32::from_be_bytes(len_buf);
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge { size: length });
    }

    let mut payload = vec![0u8; length as usize];
    match reader.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_json() {
        assert_eq!(classify(b"{\"type\":\"handshake\"}").unwrap(), FrameKind::Json);
    }

    #[test]
    fn classify_binary() {
        let mut payload = vec![b'B', b'I', b'N', 0x01];
        payload.extend_from_slice(&[0u8; 16]);
        assert_eq!(classify(&payload).unwrap(), FrameKind::Binary);
    }

    #[test]
    fn classify_unknown_is_error() {
        assert!(classify(b"\x00garbage").is_err());
    }

    #[test]
    fn classify_empty_is_error() {
        assert!(classify(b"").is_err());
    }

    #[tokio::test]
    async fn write_read_roundtrip() {
        let (mut writer, mut reader) = tokio::io::duplex(4096);
        write_frame(&mut writer, b"hello frame").await.unwrap();
        let payload = read_frame(&mut reader).await.unwrap();
        assert_eq!(payload, b"hello frame");
    }

    #[tokio::test]
    async fn read_exact_and_no_more() {
        let (mut writer, mut reader) = tokio::io::duplex(4096);
        write_frame(&mut writer, b"first").await.unwrap();
        write_frame(&mut writer, b"second").await.unwrap();
        let a = read_frame(&mut reader).await.unwrap();
        let b = read_frame(&mut reader).await.unwrap();
        assert_eq!(a, b"first");
        assert_eq!(b, b"second");
    }

    #[tokio::test]
    async fn zero_length_frame_is_not_an_error() {
        let (mut writer, mut reader) = tokio::io::duplex(64);
        write_frame(&mut writer, b"").await.unwrap();
        let payload = read_frame(&mut reader).await.unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn oversize_frame_is_rejected_on_write() {
        let (mut writer, _reader) = tokio::io::duplex(64);
        let oversized = vec![0u8; (MAX_FRAME_SIZE + 1) as usize];
        let result = write_frame(&mut writer, &oversized).await;
        assert!(matches!(result, Err(FrameError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn clean_close_before_length_prefix_is_reported() {
        let (writer, mut reader) = tokio::io::duplex(64);
        drop(writer);
        let result = read_frame(&mut reader).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }
}
