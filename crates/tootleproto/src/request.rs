//! Request frames.

use crate::RequestError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Incremental delivery: one message per generated event.
    StreamEvents,
    /// One reply with the finished MIDI file.
    GenerateMidi,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::StreamEvents => "stream-events",
            Action::GenerateMidi => "generate-midi",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stream-events" => Some(Action::StreamEvents),
            "generate-midi" => Some(Action::GenerateMidi),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request parameters exactly as the client sent them.
///
/// Every field is optional and untyped here; `null` counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawParams {
    /// Random seed (integer).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<Value>,

    /// Number of events to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gen_events: Option<Value>,

    /// Alias for `gen_events`, used when `gen_events` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_len: Option<Value>,

    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<Value>,

    /// Tempo in beats per minute. 0 omits the tempo event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<Value>,

    /// General MIDI instrument names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruments: Option<Value>,

    /// Drum kit name, or "None".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drum_kit: Option<Value>,

    /// Time signature such as "3/4".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_sig: Option<Value>,

    /// Key name such as "F♯m", or a 1-based key table index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_sig: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_cc: Option<Value>,

    /// Wins over `allow_cc` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_control_change: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_patch_change: Option<Value>,

    /// MIDI channels (0-15) the generator may not use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_channels: Option<Value>,
}

/// One parsed client frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub action: Action,
    pub params: RawParams,
}

impl Request {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, RequestError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| RequestError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, RequestError> {
        let Value::Object(mut map) = value else {
            return Err(RequestError::NotAnObject);
        };

        let action = match map.get("action") {
            Some(Value::String(s)) => {
                Action::parse(s).ok_or_else(|| RequestError::UnknownAction(s.clone()))?
            }
            Some(other) => return Err(RequestError::UnknownAction(other.to_string())),
            None => return Err(RequestError::UnknownAction("null".to_string())),
        };

        let params = match map.remove("params") {
            None | Some(Value::Null) => RawParams::default(),
            Some(v @ Value::Object(_)) => serde_json::from_value(v)
                .map_err(|e| RequestError::InvalidParams(e.to_string()))?,
            Some(other) => {
                return Err(RequestError::InvalidParams(format!(
                    "expected an object, got {}",
                    other
                )))
            }
        };

        Ok(Self { action, params })
    }
}
