//! Timed, multi-track score: the intermediate form between tokens and SMF.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoreEventKind {
    Note {
        channel: u8,
        pitch: u8,
        velocity: u8,
        /// Length in ticks.
        duration: u32,
    },
    PatchChange {
        channel: u8,
        program: u8,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    Tempo {
        micros_per_beat: u32,
    },
    TimeSignature {
        numerator: u8,
        /// Denominator as a power of two (2 = quarter note).
        denominator_pow: u8,
    },
    KeySignature {
        sharps_flats: i8,
        minor: bool,
    },
}

/// One event at an absolute tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub tick: u32,
    pub kind: ScoreEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub ticks_per_beat: u16,
    pub tracks: Vec<Vec<ScoreEvent>>,
}

impl Score {
    pub fn new(ticks_per_beat: u16) -> Self {
        Self {
            ticks_per_beat,
            tracks: Vec::new(),
        }
    }

    pub fn event_count(&self) -> usize {
        self.tracks.iter().map(Vec::len).sum()
    }

    pub fn note_count(&self) -> usize {
        self.tracks
            .iter()
            .flatten()
            .filter(|e| matches!(e.kind, ScoreEventKind::Note { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.event_count() == 0
    }

    /// Cut each note short where the next note of the same channel and
    /// pitch on the same track begins.
    pub fn truncate_overlaps(&mut self) {
        for track in &mut self.tracks {
            let mut by_key: HashMap<(u8, u8), Vec<usize>> = HashMap::new();
            for (i, event) in track.iter().enumerate() {
                if let ScoreEventKind::Note { channel, pitch, .. } = event.kind {
                    by_key.entry((channel, pitch)).or_default().push(i);
                }
            }

            for mut indices in by_key.into_values() {
                indices.sort_by_key(|i| track[*i].tick);
                for pair in indices.windows(2) {
                    let next_start = track[pair[1]].tick;
                    let event = &mut track[pair[0]];
                    let start = event.tick;
                    if let ScoreEventKind::Note { duration, .. } = &mut event.kind {
                        if start + *duration > next_start {
                            *duration = next_start - start;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(tick: u32, pitch: u8, duration: u32) -> ScoreEvent {
        ScoreEvent {
            tick,
            kind: ScoreEventKind::Note {
                channel: 0,
                pitch,
                velocity: 90,
                duration,
            },
        }
    }

    fn duration_of(event: &ScoreEvent) -> u32 {
        match event.kind {
            ScoreEventKind::Note { duration, .. } => duration,
            _ => panic!("not a note"),
        }
    }

    #[test]
    fn test_truncate_overlapping_same_pitch() {
        let mut score = Score::new(480);
        score.tracks.push(vec![note(0, 60, 960), note(480, 60, 240), note(0, 64, 960)]);
        score.truncate_overlaps();

        assert_eq!(duration_of(&score.tracks[0][0]), 480);
        assert_eq!(duration_of(&score.tracks[0][1]), 240);
        assert_eq!(duration_of(&score.tracks[0][2]), 960);
    }

    #[test]
    fn test_counts() {
        let mut score = Score::new(480);
        assert!(score.is_empty());
        score.tracks.push(vec![
            ScoreEvent {
                tick: 0,
                kind: ScoreEventKind::Tempo {
                    micros_per_beat: 500_000,
                },
            },
            note(0, 60, 10),
        ]);
        assert_eq!(score.event_count(), 2);
        assert_eq!(score.note_count(), 1);
    }
}
