//! miditok - symbolic music tokens for Tootle
//!
//! A piece of music is a sequence of fixed-width [`Token`]s. Each token
//! encodes one event (a note, a patch change, a tempo change, ...) as an
//! event-type id followed by one id per event parameter, padded to the
//! tokenizer's width.
//!
//! ```text
//! tokens ──detokenize──▶ Score ──score_to_midi──▶ SMF bytes
//!   ▲                                                │
//!   └────────tokenize◀── Score ◀──midi_to_score──────┘
//! ```
//!
//! Generation is behind the [`Generator`] trait. [`SamplingGenerator`] runs
//! the masked, event-by-event sampling loop over any [`TokenModel`];
//! [`HeuristicModel`] is the built-in model used when no inference backend
//! is wired in.

pub mod generator;
pub mod gm;
pub mod heuristic;
pub mod midi;
pub mod sampling;
pub mod score;
pub mod token;
pub mod tokenizer;

pub use generator::{GenerateError, Generator, SamplingGenerator, SamplingParams, TokenModel, TokenStream};
pub use heuristic::HeuristicModel;
pub use midi::{midi_to_score, score_to_midi};
pub use score::{Score, ScoreEvent, ScoreEventKind};
pub use token::Token;
pub use tokenizer::{Event, EventKind, MidiTokenizer, Param, TokenizerVersion};

/// Errors from encoding or decoding tokens.
#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    #[error("{kind} is not supported by tokenizer {version}")]
    UnsupportedEvent {
        kind: EventKind,
        version: TokenizerVersion,
    },

    #[error("{kind} expects {expected} parameters, got {actual}")]
    Arity {
        kind: EventKind,
        expected: usize,
        actual: usize,
    },

    #[error("{param} value {value} out of range 0..{size}")]
    OutOfRange { param: Param, value: u32, size: u32 },

    #[error("Failed to read tokenizer config {path}: {message}")]
    Config { path: String, message: String },
}

/// Errors from converting between scores and Standard MIDI Files.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("{field} value {value} out of range for MIDI")]
    OutOfRange { field: &'static str, value: u32 },

    #[error("MIDI write error: {0}")]
    Write(String),

    #[error("MIDI parse error: {0}")]
    Parse(String),
}
