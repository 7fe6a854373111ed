//! Streams MIDI events to WebSocket clients as they are sampled.
//!
//! A client sends `stream-events` and receives a `start`, one `event` per
//! generated token, a `snapshot` of the whole piece every twenty events and
//! at the end, then `complete`. `generate-midi` answers with a finished file
//! in one reply.

pub mod context;
pub mod error;
pub mod keepalive;
pub mod params;
pub mod prompt;
pub mod session;
pub mod snapshot;
pub mod telemetry;
pub mod web;
pub mod worker;

pub use context::ServiceContext;
pub use error::ConnectionError;
pub use params::GenerationRequest;
pub use prompt::{build_prompt, Prompt};
pub use session::{Connection, MessageSink, SessionState};
pub use web::{router, serve};
