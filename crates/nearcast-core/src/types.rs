//! Domain types for nearcast.
//!
//! All core identifiers are defined here as **newtypes** — thin wrappers
//! around primitive types that give them distinct identities in the type
//! system. This prevents accidentally passing a `MessageId` where a
//! `DeviceId` is expected, which would compile fine if both were plain
//! `String`s.
//!
//! # Design Pattern: Newtype
//!
//! In Rust, a "newtype" is a single-field tuple struct like `DeviceId(String)`.
//! It has zero runtime cost (same memory layout as the inner type) but gives
//! us compile-time type safety. We derive `Serialize`/`Deserialize` so these
//! types work seamlessly with the JSON envelope wire format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// DeviceId — uniquely identifies a machine running nearcast
// ---------------------------------------------------------------------------

/// A unique, stable identifier for a device on the network.
///
/// Generated once on first run (UUID v4) and persisted locally. Two
/// different machines will always have different `DeviceId`s, even if
/// they share a display name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a `DeviceId` from an existing string (e.g., loaded from disk).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new random `DeviceId` using UUID v4.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// MessageId — "<device_id>-<timestamp>", sender-generated
// ---------------------------------------------------------------------------

/// A message identifier, used only for future deduplication — receivers do
/// not currently enforce uniqueness on it.
///
/// Wire form is `"<device_id>-<timestamp>"`, matching the original sender's
/// scheme so ids round-trip unchanged across a relay hop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps an existing id string (e.g., one received over the wire).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds a message id in the canonical `"<device_id>-<timestamp>"` form.
    pub fn generate(device_id: &DeviceId, timestamp: Timestamp) -> Self {
        Self(format!("{device_id}-{}", timestamp.as_secs()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// GroupId — identifies an ad-hoc chat group
// ---------------------------------------------------------------------------

/// A unique identifier for a chat group (UUID form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// FileId — canonical 16-byte file-transfer identifier
// ---------------------------------------------------------------------------

/// The wire form of a file transfer identifier: 16 raw bytes.
///
/// The legacy JSON `file_meta`/`file_chunk` path leaks a UUID string through
/// the envelope, truncated or NUL-padded to 16 bytes; the binary protocol
/// carries these bytes directly. This type is the canonical in-memory
/// representation either path converges on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId([u8; 16]);

impl FileId {
    /// Generates a new random file id from a UUID v4's raw bytes.
    pub fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Wraps a raw 16-byte id as received on the wire.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Builds a `FileId` from a UUID string carried by the legacy JSON path,
    /// truncating or NUL-padding to 16 bytes as the original sub-protocol does.
    pub fn from_legacy_string(s: &str) -> Self {
        let mut bytes = [0u8; 16];
        let src = s.as_bytes();
        let n = src.len().min(16);
        bytes[..n].copy_from_slice(&src[..n]);
        Self(bytes)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Timestamp — Unix seconds since epoch
// ---------------------------------------------------------------------------

/// A point in time represented as whole seconds since the Unix epoch.
///
/// The envelope wire format carries `timestamp` as `int64 seconds`
/// (see `envelope.rs`), so this type intentionally does not carry
/// sub-second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a `Timestamp` from a raw Unix-seconds value.
    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    /// Returns the current time as a `Timestamp`.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self(secs)
    }

    /// Returns the raw seconds value.
    pub fn as_secs(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// DisplayName — a human-readable name for a device
// ---------------------------------------------------------------------------

/// A human-readable name chosen by the user (or defaulted to the hostname)
/// for their device.
///
/// Validated on creation:
/// - Must not be empty
/// - Maximum 50 characters
/// - Leading/trailing whitespace is trimmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayName(String);

/// Errors that can occur when creating a `DisplayName`.
#[derive(Debug, thiserror::Error)]
pub enum DisplayNameError {
    #[error("display name cannot be empty")]
    Empty,
    #[error("display name cannot exceed {max} characters (got {got})")]
    TooLong { max: usize, got: usize },
}

impl DisplayName {
    /// Maximum allowed length for a display name.
    pub const MAX_LENGTH: usize = 50;

    /// Creates a new `DisplayName`, validating the input.
    ///
    /// The name is trimmed of leading/trailing whitespace before validation.
    pub fn new(name: impl Into<String>) -> Result<Self, DisplayNameError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(DisplayNameError::Empty);
        }
        if name.len() > Self::MAX_LENGTH {
            return Err(DisplayNameError::TooLong {
                max: Self::MAX_LENGTH,
                got: name.len(),
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_generate_is_unique() {
        let a = DeviceId::generate();
        let b = DeviceId::generate();
        assert_ne!(a, b, "two generated DeviceIds should be different");
    }

    #[test]
    fn device_id_display() {
        let id = DeviceId::new("abc-123");
        assert_eq!(id.to_string(), "abc-123");
    }

    #[test]
    fn device_id_ord_is_lexicographic() {
        let a = DeviceId::new("aaa");
        let b = DeviceId::new("bbb");
        assert!(a < b);
    }

    #[test]
    fn message_id_canonical_form() {
        let device = DeviceId::new("device-1");
        let ts = Timestamp::from_secs(1_700_000_000);
        let id = MessageId::generate(&device, ts);
        assert_eq!(id.as_str(), "device-1-1700000000");
    }

    #[test]
    fn file_id_legacy_string_truncates() {
        let id = FileId::from_legacy_string("550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(id.as_bytes().len(), 16);
    }

    #[test]
    fn file_id_legacy_string_pads_short() {
        let id = FileId::from_legacy_string("abc");
        assert_eq!(id.as_bytes(), &[b'a', b'b', b'c', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn timestamp_now_is_positive() {
        let ts = Timestamp::now();
        assert!(ts.as_secs() > 0);
    }

    #[test]
    fn timestamp_ordering() {
        let earlier = Timestamp::from_secs(1000);
        let later = Timestamp::from_secs(2000);
        assert!(earlier < later);
    }

    #[test]
    fn display_name_valid() {
        let name = DisplayName::new("PC-Sala").unwrap();
        assert_eq!(name.as_str(), "PC-Sala");
    }

    #[test]
    fn display_name_trimmed() {
        let name = DisplayName::new("  Laptop  ").unwrap();
        assert_eq!(name.as_str(), "Laptop");
    }

    #[test]
    fn display_name_empty_rejected() {
        assert!(DisplayName::new("").is_err());
        assert!(DisplayName::new("   ").is_err());
    }

    #[test]
    fn display_name_too_long_rejected() {
        let long = "a".repeat(51);
        assert!(DisplayName::new(long).is_err());
    }

    #[test]
    fn device_id_serde_json_roundtrip() {
        let id = DeviceId::new("test-device-123");
        let json = serde_json::to_string(&id).unwrap();
        let parsed: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
