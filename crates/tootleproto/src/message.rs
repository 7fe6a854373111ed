//! Server-to-client messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A parameter the service dropped instead of failing the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedField {
    pub field: String,
    pub value: Value,
    pub reason: String,
}

impl RejectedField {
    pub fn new(field: impl Into<String>, value: Value, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value,
            reason: reason.into(),
        }
    }
}

/// Parameters echoed back in the `start` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartParams {
    pub seed: u64,
    pub gen_events: u64,
    pub temp: f64,
    pub instruments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedField>,
}

/// Everything a streaming session sends.
///
/// The error variant goes out as `{"status":"error","error":...}`, every
/// other variant carries a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Wire", from = "Wire")]
pub enum StreamMessage {
    Start {
        params: StartParams,
    },
    Event {
        /// 1-based, contiguous within a session.
        index: u64,
        event: Value,
        tokens: Vec<u32>,
    },
    Snapshot {
        index: u64,
        /// Buffer length, prompt included.
        total_events: u64,
        midi_b64: String,
        size_bytes: u64,
    },
    Complete {
        total_events: u64,
    },
    Error {
        error: String,
    },
}

impl StreamMessage {
    pub fn error(message: impl Into<String>) -> Self {
        StreamMessage::Error {
            error: message.into(),
        }
    }

    /// `complete` and error end a session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamMessage::Complete { .. } | StreamMessage::Error { .. }
        )
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Wire {
    Typed(Typed),
    Status(Status),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Typed {
    Start {
        params: StartParams,
    },
    Event {
        index: u64,
        event: Value,
        tokens: Vec<u32>,
    },
    Snapshot {
        index: u64,
        total_events: u64,
        midi_b64: String,
        size_bytes: u64,
    },
    Complete {
        total_events: u64,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Status {
    Error { error: String },
}

impl From<StreamMessage> for Wire {
    fn from(msg: StreamMessage) -> Self {
        match msg {
            StreamMessage::Start { params } => Wire::Typed(Typed::Start { params }),
            StreamMessage::Event {
                index,
                event,
                tokens,
            } => Wire::Typed(Typed::Event {
                index,
                event,
                tokens,
            }),
            StreamMessage::Snapshot {
                index,
                total_events,
                midi_b64,
                size_bytes,
            } => Wire::Typed(Typed::Snapshot {
                index,
                total_events,
                midi_b64,
                size_bytes,
            }),
            StreamMessage::Complete { total_events } => {
                Wire::Typed(Typed::Complete { total_events })
            }
            StreamMessage::Error { error } => Wire::Status(Status::Error { error }),
        }
    }
}

impl From<Wire> for StreamMessage {
    fn from(wire: Wire) -> Self {
        match wire {
            Wire::Typed(Typed::Start { params }) => StreamMessage::Start { params },
            Wire::Typed(Typed::Event {
                index,
                event,
                tokens,
            }) => StreamMessage::Event {
                index,
                event,
                tokens,
            },
            Wire::Typed(Typed::Snapshot {
                index,
                total_events,
                midi_b64,
                size_bytes,
            }) => StreamMessage::Snapshot {
                index,
                total_events,
                midi_b64,
                size_bytes,
            },
            Wire::Typed(Typed::Complete { total_events }) => {
                StreamMessage::Complete { total_events }
            }
            Wire::Status(Status::Error { error }) => StreamMessage::Error { error },
        }
    }
}

/// The single reply to a `generate-midi` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerateReply {
    Ok {
        events: u64,
        midi_b64: String,
        size_bytes: u64,
    },
    Error {
        error: String,
    },
}
