use miditok::tokenizer::TICKS_PER_BEAT;
use miditok::{Event, EventKind, Param};
use serde::{Deserialize, Serialize};

/// A single note with absolute tick timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedNote {
    pub onset_tick: u64,
    pub pitch: u8,
    pub velocity: u8,
    pub channel: u8,
    pub duration_ticks: u64,
}

/// Ticks per sixteenth on the token grid.
const TICKS_PER_SIXTEENTH: u64 = TICKS_PER_BEAT as u64 / 16;

/// Walks decoded events, tracking absolute time.
///
/// `time1` advances the beat; `time2` is the sixteenth within that beat.
pub(crate) struct Clock {
    beat: u64,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Self { beat: 0 }
    }

    /// Absolute tick of `event`, advancing the clock.
    pub(crate) fn tick(&mut self, event: &Event) -> u64 {
        self.beat += u64::from(event.get(Param::Time1).unwrap_or(0));
        let sixteenth = u64::from(event.get(Param::Time2).unwrap_or(0));
        (self.beat * 16 + sixteenth) * TICKS_PER_SIXTEENTH
    }
}

/// Pull every note out of a decoded event list, in event order.
pub fn extract_notes(events: &[Event]) -> Vec<TimedNote> {
    let mut clock = Clock::new();
    let mut notes = Vec::new();

    for event in events {
        let tick = clock.tick(event);
        if event.kind != EventKind::Note {
            continue;
        }
        let field = |p| event.get(p).unwrap_or(0);
        notes.push(TimedNote {
            onset_tick: tick,
            pitch: field(Param::Pitch) as u8,
            velocity: field(Param::Velocity) as u8,
            channel: field(Param::Channel) as u8,
            duration_ticks: u64::from(field(Param::Duration)) * TICKS_PER_SIXTEENTH,
        });
    }

    notes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_notes_accumulates_beats() {
        let events = vec![
            Event::new(EventKind::SetTempo, vec![0, 0, 0, 120]),
            Event::new(EventKind::Note, vec![0, 0, 1, 0, 60, 100, 4]),
            Event::new(EventKind::Note, vec![1, 8, 1, 0, 62, 90, 2]),
            Event::new(EventKind::Note, vec![2, 0, 1, 0, 64, 80, 2]),
        ];

        let notes = extract_notes(&events);
        assert_eq!(notes.len(), 3);
        assert_eq!(notes[0].onset_tick, 0);
        assert_eq!(notes[0].duration_ticks, 120);
        assert_eq!(notes[1].onset_tick, 480 + 240);
        assert_eq!(notes[2].onset_tick, 3 * 480);
        assert_eq!(notes[2].pitch, 64);
    }
}
