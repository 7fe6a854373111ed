//! Event vocabulary and the token ⇄ event ⇄ score conversions.
//!
//! Id layout: `pad=0, bos=1, eos=2`, then one id per event type, then one
//! contiguous range per parameter in [`Param::ALL`] order. Version 1 of the
//! vocabulary has no signature events and none of their parameters.

use crate::score::{Score, ScoreEvent, ScoreEventKind};
use crate::token::Token;
use crate::TokenizerError;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::path::Path;

/// Ticks per beat of every detokenized score.
pub const TICKS_PER_BEAT: u16 = 480;

/// Sixteenth-note subdivisions per beat used by `time2` and `duration`.
const SUBDIVISIONS: u64 = 16;

/// Largest tempo a MIDI set-tempo message can hold.
const MAX_TEMPO_MICROS: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerVersion {
    V1,
    #[default]
    V2,
}

impl fmt::Display for TokenizerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenizerVersion::V1 => write!(f, "v1"),
            TokenizerVersion::V2 => write!(f, "v2"),
        }
    }
}

impl std::str::FromStr for TokenizerVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "v1" => Ok(TokenizerVersion::V1),
            "v2" => Ok(TokenizerVersion::V2),
            other => Err(format!("unknown tokenizer version '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Note,
    PatchChange,
    ControlChange,
    SetTempo,
    TimeSignature,
    KeySignature,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Note,
        EventKind::PatchChange,
        EventKind::ControlChange,
        EventKind::SetTempo,
        EventKind::TimeSignature,
        EventKind::KeySignature,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Note => "note",
            EventKind::PatchChange => "patch_change",
            EventKind::ControlChange => "control_change",
            EventKind::SetTempo => "set_tempo",
            EventKind::TimeSignature => "time_signature",
            EventKind::KeySignature => "key_signature",
        }
    }

    /// Parameters in token order.
    pub fn params(&self) -> &'static [Param] {
        use Param::*;
        match self {
            EventKind::Note => &[Time1, Time2, Track, Channel, Pitch, Velocity, Duration],
            EventKind::PatchChange => &[Time1, Time2, Track, Channel, Patch],
            EventKind::ControlChange => &[Time1, Time2, Track, Channel, Controller, Value],
            EventKind::SetTempo => &[Time1, Time2, Track, Bpm],
            EventKind::TimeSignature => &[Time1, Time2, Track, Nn, Dd],
            EventKind::KeySignature => &[Time1, Time2, Track, Sf, Mi],
        }
    }

    fn in_version(&self, version: TokenizerVersion) -> bool {
        !matches!(
            (self, version),
            (EventKind::TimeSignature | EventKind::KeySignature, TokenizerVersion::V1)
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Param {
    Time1,
    Time2,
    Duration,
    Track,
    Channel,
    Pitch,
    Velocity,
    Patch,
    Controller,
    Value,
    Bpm,
    Nn,
    Dd,
    Sf,
    Mi,
}

impl Param {
    pub const ALL: [Param; 15] = [
        Param::Time1,
        Param::Time2,
        Param::Duration,
        Param::Track,
        Param::Channel,
        Param::Pitch,
        Param::Velocity,
        Param::Patch,
        Param::Controller,
        Param::Value,
        Param::Bpm,
        Param::Nn,
        Param::Dd,
        Param::Sf,
        Param::Mi,
    ];

    /// Number of distinct values.
    pub fn size(&self) -> u32 {
        match self {
            Param::Time1 => 128,
            Param::Time2 => 16,
            Param::Duration => 2048,
            Param::Track => 128,
            Param::Channel => 16,
            Param::Pitch => 128,
            Param::Velocity => 128,
            Param::Patch => 128,
            Param::Controller => 128,
            Param::Value => 128,
            Param::Bpm => 384,
            Param::Nn => 16,
            Param::Dd => 4,
            Param::Sf => 15,
            Param::Mi => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Param::Time1 => "time1",
            Param::Time2 => "time2",
            Param::Duration => "duration",
            Param::Track => "track",
            Param::Channel => "channel",
            Param::Pitch => "pitch",
            Param::Velocity => "velocity",
            Param::Patch => "patch",
            Param::Controller => "controller",
            Param::Value => "value",
            Param::Bpm => "bpm",
            Param::Nn => "nn",
            Param::Dd => "dd",
            Param::Sf => "sf",
            Param::Mi => "mi",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }

    fn in_version(&self, version: TokenizerVersion) -> bool {
        !matches!(
            (self, version),
            (Param::Nn | Param::Dd | Param::Sf | Param::Mi, TokenizerVersion::V1)
        )
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded event: its kind plus one value per parameter, in token order.
///
/// Serializes as `["note", time1, time2, track, channel, pitch, velocity, duration]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub values: Vec<u32>,
}

impl Event {
    pub fn new(kind: EventKind, values: Vec<u32>) -> Self {
        Self { kind, values }
    }

    /// Value of `param`, if this kind of event carries it.
    pub fn get(&self, param: Param) -> Option<u32> {
        let pos = self.kind.params().iter().position(|p| *p == param)?;
        self.values.get(pos).copied()
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.values.len() + 1))?;
        seq.serialize_element(self.kind.name())?;
        for v in &self.values {
            seq.serialize_element(v)?;
        }
        seq.end()
    }
}

/// Vocabulary and conversions for one tokenizer version.
#[derive(Debug, Clone)]
pub struct MidiTokenizer {
    version: TokenizerVersion,
    kinds: Vec<EventKind>,
    param_offsets: [Option<u32>; 15],
    vocab_size: u32,
    max_token_seq: usize,
}

impl MidiTokenizer {
    pub const PAD_ID: u32 = 0;
    pub const BOS_ID: u32 = 1;
    pub const EOS_ID: u32 = 2;

    pub fn new(version: TokenizerVersion) -> Self {
        let kinds: Vec<EventKind> = EventKind::ALL
            .iter()
            .copied()
            .filter(|k| k.in_version(version))
            .collect();

        let mut next = 3 + kinds.len() as u32;
        let mut param_offsets = [None; 15];
        for param in Param::ALL.iter().filter(|p| p.in_version(version)) {
            param_offsets[param.index()] = Some(next);
            next += param.size();
        }

        let max_token_seq = 1 + kinds.iter().map(|k| k.params().len()).max().unwrap_or(0);

        Self {
            version,
            kinds,
            param_offsets,
            vocab_size: next,
            max_token_seq,
        }
    }

    pub fn v2() -> Self {
        Self::new(TokenizerVersion::V2)
    }

    /// Build from a model `config.json`, reading `tokenizer.version`.
    ///
    /// A config without a tokenizer version gets v2.
    pub fn from_config_file(path: &Path) -> Result<Self, TokenizerError> {
        let contents = std::fs::read_to_string(path).map_err(|e| TokenizerError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_config_json(&contents).map_err(|message| TokenizerError::Config {
            path: path.display().to_string(),
            message,
        })
    }

    pub fn from_config_json(contents: &str) -> Result<Self, String> {
        let value: serde_json::Value =
            serde_json::from_str(contents).map_err(|e| e.to_string())?;
        let version = match value.pointer("/tokenizer/version").and_then(|v| v.as_str()) {
            Some(v) => v.parse()?,
            None => TokenizerVersion::default(),
        };
        Ok(Self::new(version))
    }

    pub fn version(&self) -> TokenizerVersion {
        self.version
    }

    pub fn vocab_size(&self) -> u32 {
        self.vocab_size
    }

    /// Token width: one event id plus the widest event's parameters.
    pub fn max_token_seq(&self) -> usize {
        self.max_token_seq
    }

    /// Whether time and key signature events exist in this vocabulary.
    pub fn supports_meta_events(&self) -> bool {
        self.supports(EventKind::TimeSignature) && self.supports(EventKind::KeySignature)
    }

    pub fn supports(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn event_id(&self, kind: EventKind) -> Option<u32> {
        self.kinds
            .iter()
            .position(|k| *k == kind)
            .map(|i| 3 + i as u32)
    }

    pub fn kind_for_id(&self, id: u32) -> Option<EventKind> {
        let idx = id.checked_sub(3)? as usize;
        self.kinds.get(idx).copied()
    }

    /// All event ids with their kinds.
    pub fn event_ids(&self) -> impl Iterator<Item = (EventKind, u32)> + '_ {
        self.kinds
            .iter()
            .enumerate()
            .map(|(i, k)| (*k, 3 + i as u32))
    }

    /// Id range for `param`, or `None` if this version lacks it.
    pub fn param_range(&self, param: Param) -> Option<Range<u32>> {
        let start = self.param_offsets[param.index()]?;
        Some(start..start + param.size())
    }

    pub fn bos_token(&self) -> Token {
        let mut ids = vec![Self::PAD_ID; self.max_token_seq];
        ids[0] = Self::BOS_ID;
        Token::new(ids)
    }

    pub fn eos_token(&self) -> Token {
        let mut ids = vec![Self::PAD_ID; self.max_token_seq];
        ids[0] = Self::EOS_ID;
        Token::new(ids)
    }

    pub fn is_eos(&self, token: &[u32]) -> bool {
        token.first() == Some(&Self::EOS_ID)
    }

    /// Encode one event. Fails on an unsupported kind, a wrong parameter
    /// count, or any value outside its parameter range.
    pub fn event_to_tokens(&self, event: &Event) -> Result<Token, TokenizerError> {
        let event_id = self
            .event_id(event.kind)
            .ok_or(TokenizerError::UnsupportedEvent {
                kind: event.kind,
                version: self.version,
            })?;

        let params = event.kind.params();
        if params.len() != event.values.len() {
            return Err(TokenizerError::Arity {
                kind: event.kind,
                expected: params.len(),
                actual: event.values.len(),
            });
        }

        let mut ids = Vec::with_capacity(self.max_token_seq);
        ids.push(event_id);
        for (param, value) in params.iter().zip(&event.values) {
            let range = self
                .param_range(*param)
                .ok_or(TokenizerError::UnsupportedEvent {
                    kind: event.kind,
                    version: self.version,
                })?;
            if *value >= param.size() {
                return Err(TokenizerError::OutOfRange {
                    param: *param,
                    value: *value,
                    size: param.size(),
                });
            }
            ids.push(range.start + value);
        }
        ids.resize(self.max_token_seq, Self::PAD_ID);
        Ok(Token::new(ids))
    }

    /// Decode one token. Anything that is not a well-formed event (bos, eos,
    /// pad, unknown ids, short tokens, ids outside a parameter's range)
    /// decodes to `None`.
    pub fn tokens_to_event(&self, ids: &[u32]) -> Option<Event> {
        let kind = self.kind_for_id(*ids.first()?)?;
        let params = kind.params();
        if ids.len() < params.len() + 1 {
            return None;
        }

        let mut values = Vec::with_capacity(params.len());
        for (param, id) in params.iter().zip(&ids[1..]) {
            let range = self.param_range(*param)?;
            if !range.contains(id) {
                return None;
            }
            values.push(id - range.start);
        }
        Some(Event::new(kind, values))
    }

    /// Decode a token buffer into a timed score at [`TICKS_PER_BEAT`].
    pub fn detokenize(&self, tokens: &[Token]) -> Score {
        let tpb = u64::from(TICKS_PER_BEAT);
        let mut tracks: BTreeMap<u32, Vec<ScoreEvent>> = BTreeMap::new();
        let mut beat: u64 = 0;

        for token in tokens {
            let Some(event) = self.tokens_to_event(token) else {
                continue;
            };
            let v = &event.values;
            beat += u64::from(v[0]);
            let sixteenths = beat * SUBDIVISIONS + u64::from(v[1]);
            let tick = u32::try_from(sixteenths * tpb / SUBDIVISIONS).unwrap_or(u32::MAX);
            let track = v[2];

            let kind = match event.kind {
                EventKind::Note => ScoreEventKind::Note {
                    channel: v[3] as u8,
                    pitch: v[4] as u8,
                    velocity: v[5] as u8,
                    duration: (u64::from(v[6]) * tpb / SUBDIVISIONS) as u32,
                },
                EventKind::PatchChange => ScoreEventKind::PatchChange {
                    channel: v[3] as u8,
                    program: v[4] as u8,
                },
                EventKind::ControlChange => ScoreEventKind::ControlChange {
                    channel: v[3] as u8,
                    controller: v[4] as u8,
                    value: v[5] as u8,
                },
                EventKind::SetTempo => ScoreEventKind::Tempo {
                    micros_per_beat: (60_000_000 / v[3].max(1)).min(MAX_TEMPO_MICROS),
                },
                EventKind::TimeSignature => ScoreEventKind::TimeSignature {
                    numerator: v[3] as u8 + 1,
                    denominator_pow: v[4] as u8 + 1,
                },
                EventKind::KeySignature => ScoreEventKind::KeySignature {
                    sharps_flats: v[3] as i8 - 7,
                    minor: v[4] == 1,
                },
            };
            tracks.entry(track).or_default().push(ScoreEvent { tick, kind });
        }

        let mut score = Score::new(TICKS_PER_BEAT);
        score.tracks = tracks.into_values().collect();
        score.truncate_overlaps();
        score
    }

    /// Encode a score: a bos token, then one token per representable event
    /// in time order. Values beyond a parameter's range are clamped.
    pub fn tokenize(&self, score: &Score) -> Vec<Token> {
        let tpb = u64::from(score.ticks_per_beat.max(1));
        let mut ordered: Vec<(u32, usize, &ScoreEvent)> = score
            .tracks
            .iter()
            .enumerate()
            .flat_map(|(t, events)| events.iter().map(move |e| (e.tick, t, e)))
            .collect();
        ordered.sort_by_key(|(tick, track, _)| (*tick, *track));

        let to_sixteenths = |ticks: u64| ticks * SUBDIVISIONS / tpb;
        let mut tokens = vec![self.bos_token()];
        let mut last_beat: u64 = 0;

        for (tick, track, event) in ordered {
            let sixteenths = to_sixteenths(u64::from(tick));
            let beat = sixteenths / SUBDIVISIONS;
            let time1 = clamp(beat.saturating_sub(last_beat), Param::Time1);
            let time2 = (sixteenths % SUBDIVISIONS) as u32;
            last_beat = beat;
            let track = clamp(track as u64, Param::Track);

            let (kind, rest) = match event.kind {
                ScoreEventKind::Note {
                    channel,
                    pitch,
                    velocity,
                    duration,
                } => (
                    EventKind::Note,
                    vec![
                        u32::from(channel),
                        u32::from(pitch),
                        u32::from(velocity),
                        clamp(to_sixteenths(u64::from(duration)), Param::Duration),
                    ],
                ),
                ScoreEventKind::PatchChange { channel, program } => (
                    EventKind::PatchChange,
                    vec![u32::from(channel), u32::from(program)],
                ),
                ScoreEventKind::ControlChange {
                    channel,
                    controller,
                    value,
                } => (
                    EventKind::ControlChange,
                    vec![u32::from(channel), u32::from(controller), u32::from(value)],
                ),
                ScoreEventKind::Tempo { micros_per_beat } => {
                    let bpm = (60_000_000.0 / f64::from(micros_per_beat.max(1))).round() as u64;
                    (EventKind::SetTempo, vec![clamp(bpm, Param::Bpm)])
                }
                ScoreEventKind::TimeSignature {
                    numerator,
                    denominator_pow,
                } => (
                    EventKind::TimeSignature,
                    vec![
                        clamp(u64::from(numerator.saturating_sub(1)), Param::Nn),
                        clamp(u64::from(denominator_pow.saturating_sub(1)), Param::Dd),
                    ],
                ),
                ScoreEventKind::KeySignature {
                    sharps_flats,
                    minor,
                } => (
                    EventKind::KeySignature,
                    vec![
                        clamp((i64::from(sharps_flats) + 7).max(0) as u64, Param::Sf),
                        u32::from(minor),
                    ],
                ),
            };

            if !self.supports(kind) {
                continue;
            }

            let mut values = vec![time1, time2, track];
            values.extend(rest);
            let params = kind.params();
            for (value, param) in values.iter_mut().zip(params) {
                *value = (*value).min(param.size() - 1);
            }

            match self.event_to_tokens(&Event::new(kind, values)) {
                Ok(token) => tokens.push(token),
                Err(e) => tracing::debug!(error = %e, "skipping unencodable score event"),
            }
        }

        tokens
    }
}

fn clamp(value: u64, param: Param) -> u32 {
    value.min(u64::from(param.size() - 1)) as u32
}

impl Default for MidiTokenizer {
    fn default() -> Self {
        Self::v2()
    }
}
