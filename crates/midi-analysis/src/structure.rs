use crate::note::Clock;
use crate::rhythm::mean_std;
use miditok::tokenizer::TICKS_PER_BEAT;
use miditok::{Event, EventKind, Param};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDistribution {
    pub notes: usize,
    pub control_changes: usize,
    pub program_changes: usize,
    pub time_signatures: usize,
    pub key_signatures: usize,
    pub tempo_changes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramChange {
    pub tick: u64,
    pub channel: u32,
    pub program: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoChange {
    pub tick: u64,
    pub bpm: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureAnalysis {
    pub total_events: usize,
    /// Time to the last event onset, at the first tempo (120 BPM if none).
    pub duration_seconds: f64,
    pub event_distribution: EventDistribution,
    pub note_density: f64,
    pub cc_density: f64,
    pub pitch_range: u32,
    pub pitch_mean: f64,
    pub pitch_std: f64,
    pub velocity_mean: f64,
    pub velocity_std: f64,
    pub program_changes: Vec<ProgramChange>,
    pub tempo_changes: Vec<TempoChange>,
}

pub fn analyze_structure(events: &[Event]) -> StructureAnalysis {
    let mut clock = Clock::new();
    let mut dist = EventDistribution::default();
    let mut pitches = Vec::new();
    let mut velocities = Vec::new();
    let mut program_changes = Vec::new();
    let mut tempo_changes = Vec::new();
    let mut last_tick = 0u64;

    for event in events {
        let tick = clock.tick(event);
        last_tick = tick;
        let field = |p| event.get(p).unwrap_or(0);

        match event.kind {
            EventKind::Note => {
                dist.notes += 1;
                pitches.push(f64::from(field(Param::Pitch)));
                velocities.push(f64::from(field(Param::Velocity)));
            }
            EventKind::ControlChange => dist.control_changes += 1,
            EventKind::PatchChange => {
                dist.program_changes += 1;
                program_changes.push(ProgramChange {
                    tick,
                    channel: field(Param::Channel),
                    program: field(Param::Patch),
                });
            }
            EventKind::TimeSignature => dist.time_signatures += 1,
            EventKind::KeySignature => dist.key_signatures += 1,
            EventKind::SetTempo => {
                dist.tempo_changes += 1;
                tempo_changes.push(TempoChange {
                    tick,
                    bpm: field(Param::Bpm),
                });
            }
        }
    }

    let bpm = tempo_changes
        .first()
        .map(|t| t.bpm)
        .filter(|bpm| *bpm > 0)
        .unwrap_or(120);
    let beats = last_tick as f64 / f64::from(TICKS_PER_BEAT);
    let duration_seconds = beats * 60.0 / f64::from(bpm);
    let per_second = |count: usize| count as f64 / duration_seconds.max(0.1);

    let (pitch_mean, pitch_std) = if pitches.is_empty() {
        (60.0, 0.0)
    } else {
        mean_std(&pitches)
    };
    let (velocity_mean, velocity_std) = if velocities.is_empty() {
        (64.0, 0.0)
    } else {
        mean_std(&velocities)
    };
    let pitch_range = pitches
        .iter()
        .copied()
        .fold(None, |acc: Option<(f64, f64)>, p| match acc {
            None => Some((p, p)),
            Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
        })
        .map(|(lo, hi)| (hi - lo) as u32)
        .unwrap_or(0);

    StructureAnalysis {
        total_events: events.len(),
        duration_seconds,
        note_density: per_second(dist.notes),
        cc_density: per_second(dist.control_changes),
        event_distribution: dist,
        pitch_range,
        pitch_mean,
        pitch_std,
        velocity_mean,
        velocity_std,
        program_changes,
        tempo_changes,
    }
}
