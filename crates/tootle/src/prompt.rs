//! Prompt construction: the seed tokens that open every generation.
//!
//! A prompt is a bos token, optional time and key signatures (v2 only), an
//! optional tempo, and one patch change per assigned channel. Malformed
//! optional fields never fail the request; they are skipped and reported.

use crate::params::{GenerationRequest, KeySig, CHANNELS, NO_DRUMS};
use miditok::gm::{self, DRUM_CHANNEL};
use miditok::{Event, EventKind, MidiTokenizer, Param, Token};
use serde_json::Value;
use tootleproto::RejectedField;

/// Key signatures in circle-of-fifths order, major then relative minor.
///
/// Entry `i` has `i / 2 - 7` sharps (negative for flats) and is minor when
/// `i` is odd.
pub const KEY_SIGNATURES: [&str; 30] = [
    "C♭", "A♭m", "G♭", "E♭m", "D♭", "B♭m", "A♭", "Fm", "E♭", "Cm", "B♭", "Gm", "F", "Dm", "C",
    "Am", "G", "Em", "D", "Bm", "A", "F♯m", "E", "C♯m", "B", "G♯m", "F♯", "D♯m", "C♯", "A♯m",
];

/// One channel the prompt sets an instrument on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPatch {
    pub channel: u8,
    pub program: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub tokens: Vec<Token>,
    /// In assignment order; the drum channel, if any, comes last.
    pub patches: Vec<ChannelPatch>,
    pub rejected: Vec<RejectedField>,
}

impl Prompt {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn channels(&self) -> Vec<u8> {
        self.patches.iter().map(|p| p.channel).collect()
    }
}

/// Meta values use the empty string, `auto` and `none` for "not set".
fn is_unset(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "" | "auto" | "none")
}

/// `"N/D"` to `(N, code)` with D in {2, 4, 8} mapping to codes 1, 2, 3.
pub fn parse_time_sig(sig: &str) -> Option<(u32, u32)> {
    let (nn, dd) = sig.trim().split_once('/')?;
    let nn: u32 = nn.trim().parse().ok()?;
    let dd: u32 = dd.trim().parse().ok()?;
    let code = match dd {
        2 => 1,
        4 => 2,
        8 => 3,
        _ => return None,
    };
    (1..=Param::Nn.size()).contains(&nn).then_some((nn, code))
}

/// Key table entry to `(sf, mi)`: sharps/flats and minor flag.
pub fn parse_key_sig(key: &KeySig) -> Option<(i32, u32)> {
    let idx = match key {
        KeySig::Name(name) => KEY_SIGNATURES.iter().position(|k| *k == name.trim())?,
        KeySig::Index(i) if *i >= 1 && (*i as usize) <= KEY_SIGNATURES.len() => (*i - 1) as usize,
        KeySig::Index(_) => return None,
    };
    Some((idx as i32 / 2 - 7, (idx % 2) as u32))
}

/// Channels for the requested instruments, then the drum kit on channel 9.
///
/// Melodic channels count up from 0 and skip 9.
pub fn assign_channels(
    instruments: &[String],
    drum_kit: &str,
    rejected: &mut Vec<RejectedField>,
) -> Vec<ChannelPatch> {
    let mut patches = Vec::new();
    let mut next = 0u8;

    for name in instruments {
        let Some(program) = gm::program_for_name(name) else {
            rejected.push(RejectedField::new(
                "instruments",
                Value::String(name.clone()),
                "unknown instrument",
            ));
            continue;
        };
        if next >= CHANNELS {
            rejected.push(RejectedField::new(
                "instruments",
                Value::String(name.clone()),
                "no free channel",
            ));
            continue;
        }
        patches.push(ChannelPatch {
            channel: next,
            program,
        });
        next = if next == DRUM_CHANNEL - 1 { DRUM_CHANNEL + 1 } else { next + 1 };
    }

    if drum_kit != NO_DRUMS {
        match gm::drum_kit_program(drum_kit) {
            Some(program) => patches.push(ChannelPatch {
                channel: DRUM_CHANNEL,
                program,
            }),
            None => rejected.push(RejectedField::new(
                "drum_kit",
                Value::String(drum_kit.to_string()),
                "unknown drum kit",
            )),
        }
    }

    patches
}

/// Build the prompt for `request`. Deterministic.
pub fn build_prompt(tokenizer: &MidiTokenizer, request: &GenerationRequest) -> Prompt {
    let mut rejected = Vec::new();
    let mut events = Vec::new();

    if let Some(sig) = request.time_sig.as_deref().filter(|s| !is_unset(s)) {
        match parse_time_sig(sig) {
            Some(_) if !tokenizer.supports_meta_events() => rejected.push(RejectedField::new(
                "time_sig",
                Value::String(sig.to_string()),
                "tokenizer has no time signature events",
            )),
            Some((nn, code)) => events.push(Event::new(
                EventKind::TimeSignature,
                vec![0, 0, 0, nn - 1, code - 1],
            )),
            None => rejected.push(RejectedField::new(
                "time_sig",
                Value::String(sig.to_string()),
                "expected N/D with D in 2, 4 or 8",
            )),
        }
    }

    let key = request.key_sig.as_ref().filter(|k| match k {
        KeySig::Name(name) => !is_unset(name),
        KeySig::Index(i) => *i != 0,
    });
    if let Some(key) = key {
        match parse_key_sig(key) {
            Some(_) if !tokenizer.supports_meta_events() => rejected.push(RejectedField::new(
                "key_sig",
                key.to_value(),
                "tokenizer has no key signature events",
            )),
            Some((sf, mi)) => events.push(Event::new(
                EventKind::KeySignature,
                vec![0, 0, 0, (sf + 7) as u32, mi],
            )),
            None => rejected.push(RejectedField::new(
                "key_sig",
                key.to_value(),
                "not in the key table",
            )),
        }
    }

    if request.bpm != 0 {
        let max = u64::from(Param::Bpm.size() - 1);
        if request.bpm > max {
            rejected.push(RejectedField::new(
                "bpm",
                Value::from(request.bpm),
                format!("clamped to {}", max),
            ));
        }
        events.push(Event::new(
            EventKind::SetTempo,
            vec![0, 0, 0, request.bpm.min(max) as u32],
        ));
    }

    let patches = assign_channels(&request.instruments, &request.drum_kit, &mut rejected);
    for (k, patch) in patches.iter().enumerate() {
        events.push(Event::new(
            EventKind::PatchChange,
            vec![
                0,
                0,
                k as u32 + 1,
                u32::from(patch.channel),
                u32::from(patch.program),
            ],
        ));
    }

    let mut tokens = Vec::with_capacity(events.len() + 1);
    tokens.push(tokenizer.bos_token());
    for event in &events {
        match tokenizer.event_to_tokens(event) {
            Ok(token) => tokens.push(token),
            Err(e) => {
                tracing::warn!(event = ?event, error = %e, "dropping prompt event");
                rejected.push(RejectedField::new(
                    event.kind.name(),
                    serde_json::to_value(event).unwrap_or(Value::Null),
                    e.to_string(),
                ));
            }
        }
    }

    Prompt {
        tokens,
        patches,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tootleproto::{Action, RawParams};

    fn request() -> GenerationRequest {
        GenerationRequest::resolve(Action::StreamEvents, &RawParams::default()).unwrap()
    }

    fn decode(tokenizer: &MidiTokenizer, prompt: &Prompt) -> Vec<Event> {
        prompt
            .tokens
            .iter()
            .filter_map(|t| tokenizer.tokens_to_event(t))
            .collect()
    }

    #[test]
    fn test_default_prompt() {
        let tok = MidiTokenizer::v2();
        let prompt = build_prompt(&tok, &request());

        assert_eq!(prompt.len(), 3);
        assert_eq!(prompt.tokens[0], tok.bos_token());
        assert!(prompt.tokens.iter().all(|t| t.len() == tok.max_token_seq()));
        assert_eq!(
            decode(&tok, &prompt),
            vec![
                Event::new(EventKind::SetTempo, vec![0, 0, 0, 120]),
                Event::new(EventKind::PatchChange, vec![0, 0, 1, 0, 0]),
            ]
        );
        assert_eq!(prompt.channels(), vec![0]);
        assert!(prompt.rejected.is_empty());
    }

    #[test]
    fn test_meta_events() {
        let tok = MidiTokenizer::v2();
        let mut req = request();
        req.time_sig = Some("3/4".into());
        req.key_sig = Some(KeySig::Name("Dm".into()));
        req.bpm = 0;
        req.instruments.clear();

        let prompt = build_prompt(&tok, &req);
        assert_eq!(
            decode(&tok, &prompt),
            vec![
                Event::new(EventKind::TimeSignature, vec![0, 0, 0, 2, 1]),
                // Dm is entry 13: one flat, minor
                Event::new(EventKind::KeySignature, vec![0, 0, 0, 6, 1]),
            ]
        );
    }

    #[test]
    fn test_key_index_is_one_based() {
        assert_eq!(parse_key_sig(&KeySig::Index(15)), Some((0, 0)));
        assert_eq!(parse_key_sig(&KeySig::Index(1)), Some((-7, 0)));
        assert_eq!(parse_key_sig(&KeySig::Index(30)), Some((7, 1)));
        assert_eq!(parse_key_sig(&KeySig::Index(31)), None);
        assert_eq!(parse_key_sig(&KeySig::Index(-2)), None);
        assert_eq!(parse_key_sig(&KeySig::Name("H".into())), None);
    }

    #[test]
    fn test_time_sig_parsing() {
        assert_eq!(parse_time_sig("4/4"), Some((4, 2)));
        assert_eq!(parse_time_sig("6/8"), Some((6, 3)));
        assert_eq!(parse_time_sig("2/2"), Some((2, 1)));
        assert_eq!(parse_time_sig("5/5"), None);
        assert_eq!(parse_time_sig("x/4"), None);
        assert_eq!(parse_time_sig("0/4"), None);
        assert_eq!(parse_time_sig("44"), None);
    }

    #[test]
    fn test_unsupported_time_sig_is_reported_only() {
        let tok = MidiTokenizer::v2();
        let mut req = request();
        req.time_sig = Some("5/5".into());

        let prompt = build_prompt(&tok, &req);
        assert_eq!(prompt.len(), 3);
        assert_eq!(prompt.rejected.len(), 1);
        assert_eq!(prompt.rejected[0].field, "time_sig");
    }

    #[test]
    fn test_auto_values_are_silent() {
        let tok = MidiTokenizer::v2();
        let mut req = request();
        req.time_sig = Some("auto".into());
        req.key_sig = Some(KeySig::Index(0));

        let prompt = build_prompt(&tok, &req);
        assert_eq!(prompt.len(), 3);
        assert!(prompt.rejected.is_empty());
    }

    #[test]
    fn test_v1_skips_meta_events() {
        let tok = MidiTokenizer::new(miditok::TokenizerVersion::V1);
        let mut req = request();
        req.time_sig = Some("3/4".into());
        req.key_sig = Some(KeySig::Name("C".into()));

        let prompt = build_prompt(&tok, &req);
        assert_eq!(prompt.len(), 3);
        assert_eq!(prompt.rejected.len(), 2);
    }

    #[test]
    fn test_channel_assignment_skips_drum_channel() {
        let names: Vec<String> = std::iter::repeat("Violin".to_string()).take(10).collect();
        let mut rejected = Vec::new();
        let patches = assign_channels(&names, "None", &mut rejected);
        let channels: Vec<u8> = patches.iter().map(|p| p.channel).collect();
        assert_eq!(channels, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 10]);
        assert!(rejected.is_empty());
    }

    #[test]
    fn test_drums_take_channel_nine() {
        let names = vec!["Violin".to_string(), "Cello".to_string()];
        let mut rejected = Vec::new();
        let patches = assign_channels(&names, "TR-808", &mut rejected);
        assert_eq!(
            patches,
            vec![
                ChannelPatch { channel: 0, program: 40 },
                ChannelPatch { channel: 1, program: 42 },
                ChannelPatch { channel: 9, program: 25 },
            ]
        );
    }

    #[test]
    fn test_drums_keep_channel_nine_with_many_instruments() {
        let names: Vec<String> = [
            "Acoustic Grand",
            "Bright Acoustic",
            "Electric Grand",
            "Harpsichord",
            "Clav",
            "Celesta",
            "Glockenspiel",
            "Music Box",
            "Vibraphone",
            "Marimba",
            "Xylophone",
            "Tubular Bells",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let mut rejected = Vec::new();
        let patches = assign_channels(&names, "Standard", &mut rejected);
        assert!(rejected.is_empty());

        let melodic: Vec<u8> = patches[..names.len()].iter().map(|p| p.channel).collect();
        assert_eq!(melodic, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 11, 12]);
        for (patch, name) in patches.iter().zip(&names) {
            assert_eq!(Some(patch.program), gm::program_for_name(name));
        }

        let on_nine: Vec<&ChannelPatch> = patches.iter().filter(|p| p.channel == 9).collect();
        assert_eq!(on_nine, vec![&ChannelPatch { channel: 9, program: 0 }]);
        assert_eq!(patches.last(), Some(&ChannelPatch { channel: 9, program: 0 }));
    }

    #[test]
    fn test_melodic_channels_run_out_after_fifteen() {
        let names = vec!["Violin".to_string(); 16];
        let mut rejected = Vec::new();
        let patches = assign_channels(&names, "Jazz", &mut rejected);

        assert_eq!(patches.len(), 16);
        assert_eq!(patches.iter().filter(|p| p.channel == 9).count(), 1);
        assert!(patches.iter().filter(|p| p.channel == 9).all(|p| p.program == 32));
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].reason, "no free channel");
    }

    #[test]
    fn test_unknown_names_are_skipped() {
        let names = vec!["Kazoo".to_string(), "Violin".to_string()];
        let mut rejected = Vec::new();
        let patches = assign_channels(&names, "Marching", &mut rejected);
        assert_eq!(patches, vec![ChannelPatch { channel: 0, program: 40 }]);
        assert_eq!(rejected.len(), 2);
    }

    #[test]
    fn test_patch_change_tracks_follow_assignment_order() {
        let tok = MidiTokenizer::v2();
        let mut req = request();
        req.instruments = vec!["Violin".into(), "Cello".into()];
        req.drum_kit = "Jazz".into();

        let events = decode(&tok, &build_prompt(&tok, &req));
        let patches: Vec<&Event> = events
            .iter()
            .filter(|e| e.kind == EventKind::PatchChange)
            .collect();
        assert_eq!(patches[0].values, vec![0, 0, 1, 0, 40]);
        assert_eq!(patches[1].values, vec![0, 0, 2, 1, 42]);
        assert_eq!(patches[2].values, vec![0, 0, 3, 9, 32]);
    }

    #[test]
    fn test_bpm_is_clamped() {
        let tok = MidiTokenizer::v2();
        let mut req = request();
        req.bpm = 900;

        let prompt = build_prompt(&tok, &req);
        let events = decode(&tok, &prompt);
        assert_eq!(events[0], Event::new(EventKind::SetTempo, vec![0, 0, 0, 383]));
        assert_eq!(prompt.rejected[0].field, "bpm");
    }
}
