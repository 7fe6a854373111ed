//! A rule-based [`TokenModel`] for running without an inference backend.
//!
//! Favors notes over other events, short on-grid time steps, stepwise motion
//! within the key signature, steady velocities, and tracks/channels already
//! introduced by patch changes.

use crate::generator::{GenerateError, TokenModel};
use crate::gm::DRUM_CHANNEL;
use crate::token::Token;
use crate::tokenizer::{Event, EventKind, MidiTokenizer, Param};

const MAJOR_STEPS: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];
const MINOR_STEPS: [u8; 7] = [0, 2, 3, 5, 7, 8, 10];
const KICK_SNARE_HAT: [u32; 4] = [36, 38, 42, 46];
/// Leading tokens always read; covers bos, signatures, tempo and one patch
/// change per channel.
const HEAD_TOKENS: usize = 24;
/// Trailing tokens read on each call.
const TAIL_TOKENS: usize = 64;

#[derive(Debug, Clone)]
pub struct HeuristicModel {
    /// Standard deviation of the melodic step, in semitones.
    pub pitch_spread: f32,
    pub velocity_spread: f32,
}

impl Default for HeuristicModel {
    fn default() -> Self {
        Self {
            pitch_spread: 4.0,
            velocity_spread: 12.0,
        }
    }
}

/// What the model remembers about the piece so far.
#[derive(Debug, Default)]
struct Context {
    last_pitch: Option<u32>,
    last_velocity: Option<u32>,
    /// (track, channel) pairs announced by patch changes.
    voices: Vec<(u32, u32)>,
    /// Pitch classes of the current key, if a key signature was seen.
    scale: Option<[u8; 7]>,
    last_bpm: Option<u32>,
}

impl Context {
    /// Reads the head and the most recent tail of `history`, so the cost per
    /// call does not grow with the piece.
    fn read(tokenizer: &MidiTokenizer, history: &[Token]) -> Self {
        let head = history.len().min(HEAD_TOKENS);
        let tail_start = history.len().saturating_sub(TAIL_TOKENS).max(head);
        let mut ctx = Context::default();
        for token in history[..head].iter().chain(&history[tail_start..]) {
            let Some(event) = tokenizer.tokens_to_event(token) else {
                continue;
            };
            match event.kind {
                EventKind::Note => {
                    ctx.last_pitch = event.get(Param::Pitch);
                    ctx.last_velocity = event.get(Param::Velocity);
                }
                EventKind::PatchChange => {
                    if let (Some(track), Some(channel)) =
                        (event.get(Param::Track), event.get(Param::Channel))
                    {
                        if !ctx.voices.contains(&(track, channel)) {
                            ctx.voices.push((track, channel));
                        }
                    }
                }
                EventKind::KeySignature => ctx.scale = scale_for(&event),
                EventKind::SetTempo => ctx.last_bpm = event.get(Param::Bpm),
                _ => {}
            }
        }
        ctx
    }
}

fn scale_for(event: &Event) -> Option<[u8; 7]> {
    let sf = event.get(Param::Sf)? as i32 - 7;
    let minor = event.get(Param::Mi)? == 1;
    // circle of fifths: each sharp moves the major tonic up a fifth
    let major_tonic = (sf * 7).rem_euclid(12);
    let (tonic, steps) = if minor {
        ((major_tonic + 9) % 12, MINOR_STEPS)
    } else {
        (major_tonic, MAJOR_STEPS)
    };
    let mut pcs = [0u8; 7];
    for (pc, step) in pcs.iter_mut().zip(steps) {
        *pc = ((tonic as u8) + step) % 12;
    }
    Some(pcs)
}

impl HeuristicModel {
    fn score(&self, ctx: &Context, param: Param, value: u32, partial: &[u32]) -> f32 {
        let v = value as f32;
        match param {
            Param::Time1 => match value {
                0 => 0.0,
                1 => 0.5,
                2 => -0.5,
                _ => -1.0 * v,
            },
            Param::Time2 => match value % 4 {
                0 => 1.5,
                2 => 0.5,
                _ => -1.0,
            },
            Param::Track => {
                if ctx.voices.is_empty() {
                    -0.05 * v
                } else if ctx.voices.iter().any(|(t, _)| *t == value) {
                    3.0
                } else {
                    -3.0
                }
            }
            Param::Channel => {
                let track = partial.get(2).copied();
                match track.and_then(|t| ctx.voices.iter().find(|(vt, _)| *vt == t)) {
                    Some((_, ch)) if *ch == value => 4.0,
                    Some(_) => -2.0,
                    None => 0.0,
                }
            }
            Param::Pitch => {
                if partial.get(3).copied() == Some(u32::from(DRUM_CHANNEL)) {
                    return if KICK_SNARE_HAT.contains(&value) { 3.0 } else { -2.0 };
                }
                // drift back toward the middle register
                let center = match ctx.last_pitch {
                    Some(last) => 0.8 * last as f32 + 0.2 * 64.0,
                    None => 60.0,
                };
                let d = v - center;
                let motion = -(d * d) / (2.0 * self.pitch_spread * self.pitch_spread);
                let in_key = match ctx.scale {
                    Some(scale) => scale.contains(&((value % 12) as u8)),
                    None => MAJOR_STEPS.contains(&((value % 12) as u8)),
                };
                motion + if in_key { 0.8 } else { -0.8 }
            }
            Param::Velocity => {
                if value == 0 {
                    return -10.0;
                }
                let center = match ctx.last_velocity {
                    Some(last) => 0.7 * last as f32 + 0.3 * 80.0,
                    None => 80.0,
                };
                let d = v - center;
                -(d * d) / (2.0 * self.velocity_spread * self.velocity_spread)
            }
            Param::Duration => match value {
                2 | 4 | 8 => 1.5,
                1 | 6 | 12 | 16 => 0.5,
                0 => -3.0,
                _ => -0.01 * v,
            },
            Param::Bpm => {
                let center = ctx.last_bpm.unwrap_or(120) as f32;
                -(v - center).abs() / 10.0
            }
            _ => 0.0,
        }
    }
}

impl TokenModel for HeuristicModel {
    fn next_logits(
        &self,
        tokenizer: &MidiTokenizer,
        history: &[Token],
        partial: &[u32],
        logits: &mut [f32],
    ) -> Result<(), GenerateError> {
        logits.fill(0.0);

        let Some(&head) = partial.first() else {
            for (kind, id) in tokenizer.event_ids() {
                if let Some(slot) = logits.get_mut(id as usize) {
                    *slot = match kind {
                        EventKind::Note => 5.0,
                        EventKind::ControlChange => -2.0,
                        _ => -1.0,
                    };
                }
            }
            if let Some(slot) = logits.get_mut(MidiTokenizer::EOS_ID as usize) {
                *slot = -8.0;
            }
            return Ok(());
        };

        let kind = tokenizer
            .kind_for_id(head)
            .ok_or_else(|| GenerateError::Model(format!("unknown event id {}", head)))?;
        let Some(param) = kind.params().get(partial.len() - 1).copied() else {
            return Ok(());
        };
        let Some(range) = tokenizer.param_range(param) else {
            return Ok(());
        };

        // values decoded so far, aligned with kind.params()
        let values: Vec<u32> = partial[1..]
            .iter()
            .zip(kind.params())
            .map(|(id, p)| {
                tokenizer
                    .param_range(*p)
                    .map(|r| id.saturating_sub(r.start))
                    .unwrap_or(0)
            })
            .collect();

        let ctx = Context::read(tokenizer, history);
        for (value, id) in range.enumerate() {
            if let Some(slot) = logits.get_mut(id as usize) {
                *slot = self.score(&ctx, param, value as u32, &values);
            }
        }
        Ok(())
    }
}
