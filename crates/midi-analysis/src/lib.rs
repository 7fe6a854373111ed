//! Statistics over finished pieces.
//!
//! Everything here works on decoded event lists, the same shape the
//! tokenizer hands out, so a generated piece can be analyzed straight from
//! its token buffer or from the MIDI file it was rendered to.

pub mod harmony;
pub mod key;
pub mod note;
pub mod rhythm;
pub mod structure;

pub use harmony::{analyze_harmony, HarmonyAnalysis};
pub use key::{analyze_key_stability, detect_key, KeyDetection, KeyStability};
pub use note::{extract_notes, TimedNote};
pub use rhythm::{analyze_rhythm, RhythmAnalysis};
pub use structure::{analyze_structure, EventDistribution, StructureAnalysis};

use miditok::tokenizer::TICKS_PER_BEAT;
use miditok::{Event, MidiTokenizer};
use serde::{Deserialize, Serialize};

/// Errors from MIDI analysis operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("MIDI parse error: {0}")]
    MidiParse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveAnalysis {
    pub key_analysis: KeyStability,
    pub harmonic_analysis: HarmonyAnalysis,
    pub rhythmic_analysis: RhythmAnalysis,
    pub structural_analysis: StructureAnalysis,
    pub note_count: usize,
}

/// Run every analyzer over one decoded piece.
pub fn comprehensive_analysis(events: &[Event]) -> ComprehensiveAnalysis {
    let notes = extract_notes(events);
    ComprehensiveAnalysis {
        key_analysis: analyze_key_stability(&notes, key::DEFAULT_WINDOW),
        harmonic_analysis: analyze_harmony(&notes),
        rhythmic_analysis: analyze_rhythm(&notes, u64::from(TICKS_PER_BEAT)),
        structural_analysis: analyze_structure(events),
        note_count: notes.len(),
    }
}

/// Parse a Standard MIDI File, tokenize it and analyze the decoded events.
pub fn analyze_midi(bytes: &[u8], tokenizer: &MidiTokenizer) -> Result<ComprehensiveAnalysis> {
    let score = miditok::midi_to_score(bytes).map_err(|e| Error::MidiParse(e.to_string()))?;
    let events: Vec<Event> = tokenizer
        .tokenize(&score)
        .iter()
        .filter_map(|token| tokenizer.tokens_to_event(token.ids()))
        .collect();
    Ok(comprehensive_analysis(&events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use miditok::{EventKind, Score, ScoreEvent, ScoreEventKind};
    use pretty_assertions::assert_eq;

    fn c_major_events() -> Vec<Event> {
        let mut events = vec![Event::new(EventKind::SetTempo, vec![0, 0, 0, 120])];
        for pitch in [60, 62, 64, 65, 67, 69, 71, 72] {
            events.push(Event::new(EventKind::Note, vec![1, 0, 0, 0, pitch, 90, 4]));
        }
        events
    }

    #[test]
    fn test_comprehensive_counts_notes() {
        let analysis = comprehensive_analysis(&c_major_events());
        assert_eq!(analysis.note_count, 8);
        assert_eq!(analysis.structural_analysis.total_events, 9);
        assert_eq!(analysis.key_analysis.primary_key, "C");
        assert_eq!(analysis.rhythmic_analysis.rhythmic_consistency, 100.0);
    }

    #[test]
    fn test_analyze_midi_file() {
        let mut score = Score::new(TICKS_PER_BEAT);
        score.tracks.push(
            [60u8, 64, 67, 72]
                .iter()
                .enumerate()
                .map(|(i, pitch)| ScoreEvent {
                    tick: i as u32 * 480,
                    kind: ScoreEventKind::Note {
                        channel: 0,
                        pitch: *pitch,
                        velocity: 100,
                        duration: 240,
                    },
                })
                .collect(),
        );
        let bytes = miditok::score_to_midi(&score).unwrap();

        let analysis = analyze_midi(&bytes, &MidiTokenizer::v2()).unwrap();
        assert_eq!(analysis.note_count, 4);
        // one note per beat
        assert!((analysis.rhythmic_analysis.tempo_bpm - 60.0).abs() < 1e-9);
        assert_eq!(analysis.rhythmic_analysis.syncopation_score, 0.0);
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let err = analyze_midi(b"not midi", &MidiTokenizer::v2()).unwrap_err();
        assert!(matches!(err, Error::MidiParse(_)));
    }
}
