//! JSON control-message envelope.
//!
//! Every non-binary frame on a peer connection is a JSON object with a
//! fixed header (`type, device_id, device_name, platform, timestamp`) and a
//! `payload` object whose shape depends on `type`. Messages are modeled as
//! a tagged variant over `type` with fixed payload shapes; decoding
//! dispatches by tag and never exposes an untyped map beyond this module's
//! wire boundary.

use crate::types::{DeviceId, GroupId, MessageId, Timestamp};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Errors that can occur while encoding or decoding an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope JSON malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unknown envelope type `{0}`")]
    UnknownType(String),

    #[error("envelope type `{type_}` missing payload field `{field}`")]
    MissingPayloadField { type_: &'static str, field: &'static str },

    #[error("payload field `{field}` has the wrong shape for type `{type_}`")]
    MalformedPayloadField { type_: &'static str, field: &'static str },

    #[error("invalid base64 in `data`: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A fully parsed control-message envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// The immediate sender of this frame — never a forwarded origin. For
    /// relayed group messages the logical sender is `Payload::from_id`.
    pub device_id: DeviceId,
    pub device_name: String,
    pub platform: String,
    pub timestamp: Timestamp,
    pub payload: Payload,
}

/// The type-specific body of an envelope, one variant per wire `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Handshake,
    Message {
        message_id: MessageId,
        text: String,
    },
    /// Legacy JSON file-metadata path (superseded by the binary protocol).
    FileMeta {
        file_id: String,
        filename: String,
        size: u64,
    },
    /// Legacy JSON file-chunk path: base64 data, no size field — completion
    /// is detected purely from accumulated byte count vs. the declared total.
    FileChunk {
        file_id: String,
        data: Vec<u8>,
        chunk_index: Option<u32>,
    },
    GroupInvite {
        group_id: GroupId,
        name: String,
        master_id: DeviceId,
        inviter_id: DeviceId,
    },
    GroupJoin {
        group_id: GroupId,
        name: String,
        from_id: DeviceId,
    },
    GroupJoinAck {
        group_id: GroupId,
        name: String,
        members: Vec<DeviceId>,
        master_id: DeviceId,
        epoch: Timestamp,
    },
    GroupJoinReject {
        group_id: GroupId,
        from_id: DeviceId,
    },
    GroupMaster {
        group_id: GroupId,
        name: String,
        members: Vec<DeviceId>,
        master_id: DeviceId,
        epoch: Timestamp,
    },
    GroupMessage {
        group_id: GroupId,
        message_id: MessageId,
        text: String,
        from_id: DeviceId,
    },
}

impl Payload {
    /// The wire `type` string for this payload's variant.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Payload::Handshake => "handshake",
            Payload::Message { .. } => "message",
            Payload::FileMeta { .. } => "file_meta",
            Payload::FileChunk { .. } => "file_chunk",
            Payload::GroupInvite { .. } => "group_invite",
            Payload::GroupJoin { .. } => "group_join",
            Payload::GroupJoinAck { .. } => "group_join_ack",
            Payload::GroupJoinReject { .. } => "group_join_reject",
            Payload::GroupMaster { .. } => "group_master",
            Payload::GroupMessage { .. } => "group_message",
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Payload::Handshake => json!({}),
            Payload::Message { message_id, text } => json!({
                "message_id": message_id.as_str(),
                "text": text,
            }),
            Payload::FileMeta { file_id, filename, size } => json!({
                "file_id": file_id,
                "filename": filename,
                "size": size,
            }),
            Payload::FileChunk { file_id, data, chunk_index } => json!({
                "file_id": file_id,
                "data": STANDARD.encode(data),
                "chunk_index": chunk_index,
            }),
            Payload::GroupInvite { group_id, name, master_id, inviter_id } => json!({
                "group_id": group_id.as_str(),
                "name": name,
                "master_id": master_id.as_str(),
                "inviter_id": inviter_id.as_str(),
            }),
            Payload::GroupJoin { group_id, name, from_id } => json!({
                "group_id": group_id.as_str(),
                "name": name,
                "from_id": from_id.as_str(),
            }),
            Payload::GroupJoinAck { group_id, name, members, master_id, epoch } => json!({
                "group_id": group_id.as_str(),
                "name": name,
                "members": members.iter().map(DeviceId::as_str).collect::<Vec<_>>(),
                "master_id": master_id.as_str(),
                "epoch": epoch.as_secs(),
            }),
            Payload::GroupJoinReject { group_id, from_id } => json!({
                "group_id": group_id.as_str(),
                "from_id": from_id.as_str(),
            }),
            Payload::GroupMaster { group_id, name, members, master_id, epoch } => json!({
                "group_id": group_id.as_str(),
                "name": name,
                "members": members.iter().map(DeviceId::as_str).collect::<Vec<_>>(),
                "master_id": master_id.as_str(),
                "epoch": epoch.as_secs(),
            }),
            Payload::GroupMessage { group_id, message_id, text, from_id } => json!({
                "group_id": group_id.as_str(),
                "message_id": message_id.as_str(),
                "text": text,
                "from_id": from_id.as_str(),
            }),
        }
    }

    fn from_wire(type_tag: &str, value: &Value) -> Result<Self, EnvelopeError> {
        fn field<'a>(type_: &'static str, value: &'a Value, name: &'static str) -> Result<&'a Value, EnvelopeError> {
            value
                .get(name)
                .ok_or(EnvelopeError::MissingPayloadField { type_, field: name })
        }
        fn str_field(type_: &'static str, value: &Value, name: &'static str) -> Result<String, EnvelopeError> {
            field(type_, value, name)?
                .as_str()
                .map(str::to_string)
                .ok_or(EnvelopeError::MalformedPayloadField { type_, field: name })
        }
        fn u64_field(type_: &'static str, value: &Value, name: &'static str) -> Result<u64, EnvelopeError> {
            field(type_, value, name)?
                .as_u64()
                .ok_or(EnvelopeError::MalformedPayloadField { type_, field: name })
        }
        fn i64_field(type_: &'static str, value: &Value, name: &'static str) -> Result<i64, EnvelopeError> {
            field(type_, value, name)?
                .as_i64()
                .ok_or(EnvelopeError::MalformedPayloadField { type_, field: name })
        }
        fn members_field(type_: &'static str, value: &Value, name: &'static str) -> Result<Vec<DeviceId>, EnvelopeError> {
            field(type_, value, name)?
                .as_array()
                .ok_or(EnvelopeError::MalformedPayloadField { type_, field: name })?
                .iter()
                .map(|m| {
                    m.as_str()
                        .map(DeviceId::new)
                        .ok_or(EnvelopeError::MalformedPayloadField { type_, field: name })
                })
                .collect()
        }

        Ok(match type_tag {
            "handshake" => Payload::Handshake,
            "message" => Payload::Message {
                message_id: MessageId::new(str_field("message", value, "message_id")?),
                text: str_field("message", value, "text")?,
            },
            "file_meta" => Payload::FileMeta {
                file_id: str_field("file_meta", value, "file_id")?,
                filename: str_field("file_meta", value, "filename")?,
                size: u64_field("file_meta", value, "size")?,
            },
            "file_chunk" => {
                let file_id = str_field("file_chunk", value, "file_id")?;
                let data_b64 = str_field("file_chunk", value, "data")?;
                let data = STANDARD.decode(data_b64)?;
                let chunk_index = value.get("chunk_index").and_then(Value::as_u64).map(|n| n as u32);
                Payload::FileChunk { file_id, data, chunk_index }
            }
            "group_invite" => Payload::GroupInvite {
                group_id: GroupId::new(str_field("group_invite", value, "group_id")?),
                name: str_field("group_invite", value, "name")?,
                master_id: DeviceId::new(str_field("group_invite", value, "master_id")?),
                inviter_id: DeviceId::new(str_field("group_invite", value, "inviter_id")?),
            },
            "group_join" => Payload::GroupJoin {
                group_id: GroupId::new(str_field("group_join", value, "group_id")?),
                name: str_field("group_join", value, "name")?,
                from_id: DeviceId::new(str_field("group_join", value, "from_id")?),
            },
            "group_join_ack" => Payload::GroupJoinAck {
                group_id: GroupId::new(str_field("group_join_ack", value, "group_id")?),
                name: str_field("group_join_ack", value, "name")?,
                members: members_field("group_join_ack", value, "members")?,
                master_id: DeviceId::new(str_field("group_join_ack", value, "master_id")?),
                epoch: Timestamp::from_secs(i64_field("group_join_ack", value, "epoch")?),
            },
            "group_join_reject" => Payload::GroupJoinReject {
                group_id: GroupId::new(str_field("group_join_reject", value, "group_id")?),
                from_id: DeviceId::new(str_field("group_join_reject", value, "from_id")?),
            },
            "group_master" => Payload::GroupMaster {
                group_id: GroupId::new(str_field("group_master", value, "group_id")?),
                name: str_field("group_master", value, "name")?,
                members: members_field("group_master", value, "members")?,
                master_id: DeviceId::new(str_field("group_master", value, "master_id")?),
                epoch: Timestamp::from_secs(i64_field("group_master", value, "epoch")?),
            },
            "group_message" => Payload::GroupMessage {
                group_id: GroupId::new(str_field("group_message", value, "group_id")?),
                message_id: MessageId::new(str_field("group_message", value, "message_id")?),
                text: str_field("group_message", value, "text")?,
                from_id: DeviceId::new(str_field("group_message", value, "from_id")?),
            },
            other => return Err(EnvelopeError::UnknownType(other.to_string())),
        })
    }
}

/// The raw wire shape: a flat header plus an opaque `payload` object. Never
/// exposed outside this module — callers only see [`Envelope`]/[`Payload`].
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    type_: String,
    device_id: String,
    #[serde(default)]
    device_name: String,
    #[serde(default)]
    platform: String,
    timestamp: i64,
    #[serde(default = "default_payload")]
    payload: Value,
}

fn default_payload() -> Value {
    json!({})
}

/// Encodes an envelope as compact, UTF-8 JSON.
///
/// Identifiers and text pass through untouched (full UTF-8, not
/// ASCII-escaped) since `serde_json`'s default output is already
/// ASCII-safe for control characters and valid UTF-8 throughout.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EnvelopeError> {
    let wire = WireEnvelope {
        type_: envelope.payload.type_tag().to_string(),
        device_id: envelope.device_id.as_str().to_string(),
        device_name: envelope.device_name.clone(),
        platform: envelope.platform.clone(),
        timestamp: envelope.timestamp.as_secs(),
        payload: envelope.payload.to_value(),
    };
    Ok(serde_json::to_vec(&wire)?)
}

/// Decodes and validates a JSON envelope.
///
/// Rejects frames missing `type`, `device_id`, or `timestamp` — the three
/// fields every downstream dispatch relies on — before attempting to
/// interpret the type-specific payload.
pub fn decode(bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
    let raw: Value = serde_json::from_slice(bytes)?;
    if !raw.get("type").map(Value::is_string).unwrap_or(false) {
        return Err(EnvelopeError::MissingField("type"));
    }
    if !raw.get("device_id").map(Value::is_string).unwrap_or(false) {
        return Err(EnvelopeError::MissingField("device_id"));
    }
    if raw.get("timestamp").and_then(Value::as_i64).is_none() {
        return Err(EnvelopeError::MissingField("timestamp"));
    }

    let wire: WireEnvelope = serde_json::from_value(raw)?;
    let payload = Payload::from_wire(&wire.type_, &wire.payload)?;
    Ok(Envelope {
        device_id: DeviceId::new(wire.device_id),
        device_name: wire.device_name,
        platform: wire.platform,
        timestamp: Timestamp::from_secs(wire.timestamp),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_envelope(payload: Payload) -> Envelope {
        Envelope {
            device_id: DeviceId::new("device-a"),
            device_name: "PC-Sala".to_string(),
            platform: "linux".to_string(),
            timestamp: Timestamp::from_secs(1_700_000_000),
            payload,
        }
    }

    #[test]
    fn handshake_roundtrip() {
        let env = base_envelope(Payload::Handshake);
        let bytes = encode(&env).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn message_roundtrip_with_spanish_text() {
        let env = base_envelope(Payload::Message {
            message_id: MessageId::new("device-a-1700000000"),
            text: "¡Hola! ¿Qué tal, ñandú?".to_string(),
        });
        let bytes = encode(&env).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn group_master_roundtrip() {
        let env = base_envelope(Payload::GroupMaster {
            group_id: GroupId::new("group-1"),
            name: "Family".to_string(),
            members: vec![DeviceId::new("a"), DeviceId::new("b")],
            master_id: DeviceId::new("a"),
            epoch: Timestamp::from_secs(1_700_000_001),
        });
        let bytes = encode(&env).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn file_chunk_base64_roundtrip() {
        let env = base_envelope(Payload::FileChunk {
            file_id: "abc123".to_string(),
            data: vec![0x41; 2048],
            chunk_index: Some(0),
        });
        let bytes = encode(&env).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn missing_type_is_rejected() {
        let bytes = br#"{"device_id":"a","timestamp":1}"#;
        assert!(matches!(decode(bytes), Err(EnvelopeError::MissingField("type"))));
    }

    #[test]
    fn missing_device_id_is_rejected() {
        let bytes = br#"{"type":"handshake","timestamp":1}"#;
        assert!(matches!(decode(bytes), Err(EnvelopeError::MissingField("device_id"))));
    }

    #[test]
    fn missing_timestamp_is_rejected() {
        let bytes = br#"{"type":"handshake","device_id":"a"}"#;
        assert!(matches!(decode(bytes), Err(EnvelopeError::MissingField("timestamp"))));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let bytes = br#"{"type":"bogus","device_id":"a","timestamp":1}"#;
        assert!(matches!(decode(bytes), Err(EnvelopeError::UnknownType(_))));
    }

    #[test]
    fn handshake_payload_defaults_to_empty_object() {
        let bytes = br#"{"type":"handshake","device_id":"a","timestamp":1}"#;
        let decoded = decode(bytes).unwrap();
        assert_eq!(decoded.payload, Payload::Handshake);
    }
}
