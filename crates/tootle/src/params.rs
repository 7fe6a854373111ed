//! Request parameter resolution.
//!
//! Raw client params become a [`GenerationRequest`] exactly once per request.
//! Numeric fields that cannot be coerced fail the request. Optional musical
//! metadata that is merely malformed is dropped and recorded as a
//! [`RejectedField`] instead.

use miditok::SamplingParams;
use serde_json::Value;
use tootleproto::{Action, RawParams, RejectedField, RequestError, StartParams};

pub const DEFAULT_SEED: u64 = 999;
pub const DEFAULT_STREAM_EVENTS: u64 = 200;
pub const DEFAULT_GENERATE_EVENTS: u64 = 80;
pub const DEFAULT_TEMP: f64 = 0.85;
pub const DEFAULT_TOP_P: f64 = 0.95;
pub const DEFAULT_TOP_K: u64 = 50;
pub const DEFAULT_BPM: u64 = 120;
pub const DEFAULT_INSTRUMENT: &str = "Acoustic Grand";
pub const NO_DRUMS: &str = "None";

/// Number of MIDI channels.
pub const CHANNELS: u8 = 16;

/// A key signature as the client gave it.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySig {
    /// Entry name in the key table, e.g. `"F♯m"`.
    Name(String),
    /// 1-based index into the key table; 0 means none.
    Index(i64),
}

impl KeySig {
    pub fn to_value(&self) -> Value {
        match self {
            KeySig::Name(name) => Value::String(name.clone()),
            KeySig::Index(index) => Value::from(*index),
        }
    }
}

/// Fully resolved parameters for one request. Never mutated after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub seed: u64,
    pub gen_events: u64,
    pub temp: f64,
    pub top_p: f64,
    pub top_k: u64,
    pub bpm: u64,
    pub instruments: Vec<String>,
    pub drum_kit: String,
    pub time_sig: Option<String>,
    pub key_sig: Option<KeySig>,
    pub disable_control_change: bool,
    /// `None` when the client left the choice to the service.
    pub disable_patch_change: Option<bool>,
    pub disable_channels: Option<Vec<u8>>,
    pub rejected: Vec<RejectedField>,
}

impl GenerationRequest {
    pub fn resolve(action: Action, raw: &RawParams) -> Result<Self, RequestError> {
        let mut rejected = Vec::new();

        let default_events = match action {
            Action::StreamEvents => DEFAULT_STREAM_EVENTS,
            Action::GenerateMidi => DEFAULT_GENERATE_EVENTS,
        };
        let gen_events = match present(&raw.gen_events) {
            Some(v) => to_u64("gen_events", v)?,
            None => match present(&raw.max_len) {
                Some(v) => to_u64("max_len", v)?,
                None => default_events,
            },
        };

        let seed = opt_u64("seed", &raw.seed)?.unwrap_or(DEFAULT_SEED);
        let temp = opt_f64("temp", &raw.temp)?.unwrap_or(DEFAULT_TEMP);
        let top_p = opt_f64("top_p", &raw.top_p)?.unwrap_or(DEFAULT_TOP_P);
        let top_k = opt_u64("top_k", &raw.top_k)?.unwrap_or(DEFAULT_TOP_K);
        let bpm = opt_u64("bpm", &raw.bpm)?.unwrap_or(DEFAULT_BPM);

        let allow_cc = opt_bool("allow_cc", &raw.allow_cc)?.unwrap_or(true);
        let disable_control_change =
            opt_bool("disable_control_change", &raw.disable_control_change)?.unwrap_or(!allow_cc);
        let disable_patch_change = opt_bool("disable_patch_change", &raw.disable_patch_change)?;

        let instruments = match present(&raw.instruments) {
            None => vec![DEFAULT_INSTRUMENT.to_string()],
            Some(Value::Array(items)) => {
                let mut names = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(name) => names.push(name.clone()),
                        other => rejected.push(RejectedField::new(
                            "instruments",
                            other.clone(),
                            "instrument names must be strings",
                        )),
                    }
                }
                names
            }
            Some(other) => {
                rejected.push(RejectedField::new(
                    "instruments",
                    other.clone(),
                    "expected a list of instrument names",
                ));
                vec![DEFAULT_INSTRUMENT.to_string()]
            }
        };

        let drum_kit = match present(&raw.drum_kit) {
            None => NO_DRUMS.to_string(),
            Some(Value::String(kit)) => kit.clone(),
            Some(other) => {
                rejected.push(RejectedField::new(
                    "drum_kit",
                    other.clone(),
                    "expected a drum kit name",
                ));
                NO_DRUMS.to_string()
            }
        };

        let time_sig = match present(&raw.time_sig) {
            None => None,
            Some(Value::String(sig)) => Some(sig.clone()),
            Some(other) => {
                rejected.push(RejectedField::new(
                    "time_sig",
                    other.clone(),
                    "expected a string such as \"3/4\"",
                ));
                None
            }
        };

        let key_sig = match present(&raw.key_sig) {
            None => None,
            Some(Value::String(name)) => Some(KeySig::Name(name.clone())),
            Some(Value::Number(n)) => match n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)) {
                Some(index) => Some(KeySig::Index(index)),
                None => {
                    rejected.push(RejectedField::new(
                        "key_sig",
                        Value::Number(n.clone()),
                        "key index out of range",
                    ));
                    None
                }
            },
            Some(other) => {
                rejected.push(RejectedField::new(
                    "key_sig",
                    other.clone(),
                    "expected a key name or a 1-based index",
                ));
                None
            }
        };

        let disable_channels = match present(&raw.disable_channels) {
            None => None,
            Some(Value::Array(items)) => {
                let mut channels = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_u64().filter(|c| *c < u64::from(CHANNELS)) {
                        Some(c) => channels.push(c as u8),
                        None => rejected.push(RejectedField::new(
                            "disable_channels",
                            item.clone(),
                            "channels must be integers in 0..16",
                        )),
                    }
                }
                Some(channels)
            }
            Some(other) => {
                rejected.push(RejectedField::new(
                    "disable_channels",
                    other.clone(),
                    "expected a list of channels",
                ));
                None
            }
        };

        Ok(Self {
            seed,
            gen_events,
            temp,
            top_p,
            top_k,
            bpm,
            instruments,
            drum_kit,
            time_sig,
            key_sig,
            disable_control_change,
            disable_patch_change,
            disable_channels,
            rejected,
        })
    }

    /// Sampling settings once the prompt's channel assignment is known.
    ///
    /// Constraints the client left open follow the prompt: if it assigned
    /// any channels, patch changes are disabled and so is every channel it
    /// did not assign.
    pub fn sampling_params(&self, assigned_channels: &[u8]) -> SamplingParams {
        let mut disable_patch_change = self.disable_patch_change;
        let mut disable_channels = self.disable_channels.clone();

        if !assigned_channels.is_empty() {
            disable_patch_change.get_or_insert(true);
            if disable_channels.is_none() {
                disable_channels = Some(
                    (0..CHANNELS)
                        .filter(|c| !assigned_channels.contains(c))
                        .collect(),
                );
            }
        }

        SamplingParams {
            temperature: self.temp as f32,
            top_p: self.top_p as f32,
            top_k: usize::try_from(self.top_k).unwrap_or(usize::MAX),
            disable_patch_change: disable_patch_change.unwrap_or(false),
            disable_control_change: self.disable_control_change,
            disable_channels: disable_channels.unwrap_or_default(),
        }
    }

    /// The subset echoed in the `start` message.
    pub fn start_params(&self, extra_rejected: &[RejectedField]) -> StartParams {
        let mut rejected = self.rejected.clone();
        rejected.extend_from_slice(extra_rejected);
        StartParams {
            seed: self.seed,
            gen_events: self.gen_events,
            temp: self.temp,
            instruments: self.instruments.clone(),
            rejected,
        }
    }
}

/// `null` counts as absent.
fn present(value: &Option<Value>) -> Option<&Value> {
    value.as_ref().filter(|v| !v.is_null())
}

fn invalid(field: &'static str, message: impl Into<String>) -> RequestError {
    RequestError::InvalidField {
        field,
        message: message.into(),
    }
}

/// Integers, floats (truncated) and numeric strings.
fn to_u64(field: &'static str, value: &Value) -> Result<u64, RequestError> {
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() && n >= 0.0 && n < u64::MAX as f64 => Ok(n.trunc() as u64),
        Some(n) => Err(invalid(field, format!("{} is out of range", n))),
        None => Err(invalid(field, format!("expected a non-negative integer, got {}", value))),
    }
}

fn opt_u64(field: &'static str, value: &Option<Value>) -> Result<Option<u64>, RequestError> {
    present(value).map(|v| to_u64(field, v)).transpose()
}

fn opt_f64(field: &'static str, value: &Option<Value>) -> Result<Option<f64>, RequestError> {
    let Some(value) = present(value) else {
        return Ok(None);
    };
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(invalid(field, format!("expected a number, got {}", value))),
    }
}

fn opt_bool(field: &'static str, value: &Option<Value>) -> Result<Option<bool>, RequestError> {
    let Some(value) = present(value) else {
        return Ok(None);
    };
    match value {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Number(n) => Ok(Some(n.as_f64().is_some_and(|f| f != 0.0))),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(invalid(field, format!("expected a boolean, got {}", value))),
        },
        other => Err(invalid(field, format!("expected a boolean, got {}", other))),
    }
}
