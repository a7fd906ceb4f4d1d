//! Events produced by the process stream bridge.
//!
//! The bridge emits these internally; each transport adapter translates
//! them to its own framing (raw bytes, SSE records, or wire envelopes).

use uuid::Uuid;

use crate::wire::{ChatDelta, Envelope};

/// One event in a bridged generation's lifecycle.
///
/// Per request: exactly one `Start`, zero or more `Chunk`s in process
/// stdout arrival order, then exactly one of `End` / `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Start {
        request_id: Uuid,
    },
    Chunk {
        request_id: Uuid,
        content: String,
    },
    End {
        request_id: Uuid,
    },
    Failed {
        request_id: Uuid,
        /// Exit code of the inference process, when it exited at all.
        exit_code: Option<i32>,
        message: String,
    },
}

impl BridgeEvent {
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        match self {
            Self::Start { request_id }
            | Self::Chunk { request_id, .. }
            | Self::End { request_id }
            | Self::Failed { request_id, .. } => *request_id,
        }
    }

    /// True for `End` and `Failed`, the last event a request emits.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Failed { .. })
    }
}

impl From<BridgeEvent> for Envelope {
    /// Translate to the wire protocol: lifecycle events become chat
    /// deltas, a failure becomes the terminal error envelope.
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Start { request_id } => Self::Chat(ChatDelta::Start {
                message_id: request_id,
            }),
            BridgeEvent::Chunk {
                request_id,
                content,
            } => Self::Chat(ChatDelta::Update {
                message_id: request_id,
                content,
            }),
            BridgeEvent::End { request_id } => Self::Chat(ChatDelta::End {
                message_id: request_id,
            }),
            BridgeEvent::Failed { message, .. } => Self::error(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::EnvelopeKind;

    #[test]
    fn terminal_classification() {
        let id = Uuid::new_v4();
        assert!(!BridgeEvent::Start { request_id: id }.is_terminal());
        assert!(!BridgeEvent::Chunk {
            request_id: id,
            content: "x".into()
        }
        .is_terminal());
        assert!(BridgeEvent::End { request_id: id }.is_terminal());
        assert!(BridgeEvent::Failed {
            request_id: id,
            exit_code: Some(1),
            message: "exit 1".into()
        }
        .is_terminal());
    }

    #[test]
    fn failure_maps_to_error_envelope() {
        let event = BridgeEvent::Failed {
            request_id: Uuid::new_v4(),
            exit_code: Some(1),
            message: "process exited with code 1".into(),
        };
        let envelope: Envelope = event.into();
        assert_eq!(envelope.kind(), EnvelopeKind::Error);
    }

    #[test]
    fn lifecycle_maps_to_chat_envelopes() {
        let id = Uuid::new_v4();
        let envelope: Envelope = BridgeEvent::Chunk {
            request_id: id,
            content: "lo".into(),
        }
        .into();
        match envelope {
            Envelope::Chat(ChatDelta::Update {
                message_id,
                content,
            }) => {
                assert_eq!(message_id, id);
                assert_eq!(content, "lo");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
