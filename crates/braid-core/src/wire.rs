//! Wire protocol for the multiplexed WebSocket channel.
//!
//! Every message on the channel is an envelope tagged with a message type,
//! so chat deltas, telemetry pushes and in-band errors can share one
//! connection and be routed by type on the far side.
//!
//! # Wire Format
//!
//! Server → client envelopes:
//!
//! ```json
//! { "type": "chat",   "payload": { "type": "update", "messageId": "…", "content": "Hel" } }
//! { "type": "system", "payload": { "ram": { … }, "cpu": { … }, … } }
//! { "type": "error",  "payload": { "message": "generation failed" } }
//! ```
//!
//! Client → server commands reuse the same outer shape:
//!
//! ```json
//! { "type": "chat",   "payload": { "model": "llama3", "content": "hi" } }
//! { "type": "system" }
//! ```
//!
//! Decoding is total: an unrecognized `type` yields
//! [`DecodeError::UnknownType`] and a bad payload shape yields
//! [`DecodeError::Malformed`]. Neither may tear down the connection.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::telemetry::SystemSnapshot;

/// A decode failure for an inbound frame.
///
/// Callers log these and drop the frame (usually replying with an in-band
/// error envelope); they are never fatal to the connection.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The `type` tag was present but not one we understand.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The frame was not valid JSON, or the payload did not match the
    /// shape its `type` tag demands.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Discriminant of an [`Envelope`], used as the subscription key on the
/// client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Chat,
    System,
    Error,
}

/// Server → client wire message.
///
/// The payload shape is fully determined by the `type` tag; consumption
/// sites get an exhaustive match instead of reading fields off an untyped
/// blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Envelope {
    /// One incremental unit of a chat generation.
    Chat(ChatDelta),
    /// A host telemetry snapshot.
    System(SystemSnapshot),
    /// An in-band error (failed generation, rejected command, …).
    Error(ErrorPayload),
}

impl Envelope {
    /// The envelope's type tag as a routing key.
    #[must_use]
    pub const fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Chat(_) => EnvelopeKind::Chat,
            Self::System(_) => EnvelopeKind::System,
            Self::Error(_) => EnvelopeKind::Error,
        }
    }

    /// Shorthand for an error envelope with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

/// Payload of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// One incremental unit of generated text plus its phase marker.
///
/// Per request id, subscribers observe exactly one `start`, any number of
/// `update`s in emission order, then exactly one `end`, or an `error`
/// envelope instead of `end` when the generation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatDelta {
    Start {
        #[serde(rename = "messageId")]
        message_id: Uuid,
    },
    Update {
        #[serde(rename = "messageId")]
        message_id: Uuid,
        content: String,
    },
    End {
        #[serde(rename = "messageId")]
        message_id: Uuid,
    },
}

impl ChatDelta {
    /// The request this delta belongs to.
    #[must_use]
    pub const fn message_id(&self) -> Uuid {
        match self {
            Self::Start { message_id }
            | Self::Update { message_id, .. }
            | Self::End { message_id } => *message_id,
        }
    }
}

/// A chat generation request as sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model name to run.
    pub model: String,
    /// The prompt text. Carried as `content` on the wire.
    #[serde(rename = "content")]
    pub prompt: String,
}

/// Client → server command, decoded from an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Start a chat generation.
    Chat(ChatRequest),
    /// Request one telemetry snapshot.
    System,
}

/// Encode an envelope as a single self-delimiting JSON frame.
pub fn encode(envelope: &Envelope) -> serde_json::Result<String> {
    serde_json::to_string(envelope)
}

/// Decode a server → client envelope.
///
/// Goes through `serde_json::Value` first so an unrecognized type tag can
/// be distinguished from a payload that merely has the wrong shape.
pub fn decode_envelope(raw: &str) -> Result<Envelope, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    match type_tag(&value)? {
        "chat" | "system" | "error" => {
            serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
        }
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

/// Decode a client → server command.
pub fn decode_command(raw: &str) -> Result<ClientCommand, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    match type_tag(&value)? {
        "chat" => {
            let payload = value
                .get("payload")
                .cloned()
                .ok_or_else(|| DecodeError::Malformed("chat command missing payload".into()))?;
            serde_json::from_value(payload)
                .map(ClientCommand::Chat)
                .map_err(|e| DecodeError::Malformed(e.to_string()))
        }
        // Snapshot requests carry no meaningful payload; tolerate any.
        "system" => Ok(ClientCommand::System),
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

fn type_tag(value: &serde_json::Value) -> Result<&str, DecodeError> {
    value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| DecodeError::Malformed("missing type tag".into()))
}

/// Wrap one JSON frame as a server-sent-event record.
#[must_use]
pub fn sse_frame(json: &str) -> String {
    format!("data: {json}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_delta_wire_shape_is_stable() {
        let id = Uuid::new_v4();
        let delta = ChatDelta::Update {
            message_id: id,
            content: "Hel".into(),
        };
        let json = serde_json::to_value(Envelope::Chat(delta)).unwrap();

        assert_eq!(json["type"], "chat");
        assert_eq!(json["payload"]["type"], "update");
        assert_eq!(json["payload"]["messageId"], id.to_string());
        assert_eq!(json["payload"]["content"], "Hel");
    }

    #[test]
    fn start_and_end_deltas_carry_no_content() {
        let id = Uuid::new_v4();
        let start = serde_json::to_value(ChatDelta::Start { message_id: id }).unwrap();
        let end = serde_json::to_value(ChatDelta::End { message_id: id }).unwrap();
        assert!(start.get("content").is_none());
        assert!(end.get("content").is_none());
    }

    #[test]
    fn envelope_roundtrip() {
        let envelope = Envelope::error("boom");
        let raw = encode(&envelope).unwrap();
        let back = decode_envelope(&raw).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn unknown_type_is_a_typed_error_not_a_panic() {
        let err = decode_envelope(r#"{"type":"telepathy","payload":{}}"#).unwrap_err();
        match err {
            DecodeError::UnknownType(tag) => assert_eq!(tag, "telepathy"),
            DecodeError::Malformed(_) => panic!("expected UnknownType"),
        }

        let err = decode_command(r#"{"type":"telepathy"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(_)));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(matches!(
            decode_command("not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_command(r#"{"payload":{}}"#),
            Err(DecodeError::Malformed(_))
        ));
        // Right tag, wrong payload shape.
        assert!(matches!(
            decode_command(r#"{"type":"chat","payload":{"model":"m"}}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn chat_command_decodes_model_and_prompt() {
        let cmd =
            decode_command(r#"{"type":"chat","payload":{"model":"llama3","content":"hi"}}"#)
                .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Chat(ChatRequest {
                model: "llama3".into(),
                prompt: "hi".into(),
            })
        );
    }

    #[test]
    fn system_command_tolerates_any_payload() {
        assert_eq!(
            decode_command(r#"{"type":"system"}"#).unwrap(),
            ClientCommand::System
        );
        assert_eq!(
            decode_command(r#"{"type":"system","payload":{"whatever":1}}"#).unwrap(),
            ClientCommand::System
        );
    }

    #[test]
    fn sse_frame_is_self_delimiting() {
        assert_eq!(sse_frame(r#"{"content":"x"}"#), "data: {\"content\":\"x\"}\n\n");
    }
}
