//! tootleproto - wire types for the Tootle streaming service
//!
//! Clients send one JSON request per text frame:
//!
//! ```json
//! {"action": "stream-events", "params": {"gen_events": 25, "seed": 1}}
//! ```
//!
//! `stream-events` answers with a `start` message, one `event` per generated
//! token (with a `snapshot` every so often), and exactly one terminal
//! `complete` or error message. `generate-midi` answers with a single reply
//! carrying the whole file.
//!
//! Parameters are kept as raw JSON until the service resolves them, so a bad
//! value can be reported against the field it came from.

pub mod message;
pub mod request;

pub use message::{GenerateReply, RejectedField, StartParams, StreamMessage};
pub use request::{Action, RawParams, Request};

use thiserror::Error;

/// Problems with a client frame. Reported inline; the connection stays open.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Request must be a JSON object")]
    NotAnObject,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidField { field: &'static str, message: String },
}
