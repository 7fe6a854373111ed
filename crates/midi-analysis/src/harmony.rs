use crate::note::TimedNote;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Notes whose onsets fall in the same window of this many ticks sound together.
pub const SLICE_TICKS: u64 = 100;

/// Consonance of an interval class, 0 (harsh) to 1 (pure).
const CONSONANCE: [f64; 12] = [1.0, 0.1, 0.3, 0.5, 0.7, 0.6, 0.2, 0.8, 0.6, 0.7, 0.4, 0.3];

const DISSONANT_BELOW: f64 = 0.4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonyAnalysis {
    /// 0-100
    pub harmonic_coherence: f64,
    pub avg_consonance: f64,
    pub dissonance_count: usize,
    pub chord_diversity: f64,
    pub total_chords: usize,
}

pub fn analyze_harmony(notes: &[TimedNote]) -> HarmonyAnalysis {
    if notes.is_empty() {
        return HarmonyAnalysis {
            harmonic_coherence: 0.0,
            avg_consonance: 0.0,
            dissonance_count: 0,
            chord_diversity: 0.0,
            total_chords: 0,
        };
    }

    let mut slices: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
    for note in notes {
        slices
            .entry(note.onset_tick / SLICE_TICKS)
            .or_default()
            .push(note.pitch);
    }

    let mut consonance = Vec::new();
    let mut chords: Vec<BTreeSet<u8>> = Vec::new();
    for pitches in slices.values().filter(|p| p.len() >= 2) {
        let mut sum = 0.0;
        let mut pairs = 0usize;
        for (i, a) in pitches.iter().enumerate() {
            for b in &pitches[i + 1..] {
                sum += CONSONANCE[usize::from(a.abs_diff(*b) % 12)];
                pairs += 1;
            }
        }
        consonance.push(sum / pairs as f64);
        chords.push(pitches.iter().map(|p| p % 12).collect());
    }

    let avg_consonance = if consonance.is_empty() {
        0.5
    } else {
        consonance.iter().sum::<f64>() / consonance.len() as f64
    };
    let dissonance_count = consonance.iter().filter(|c| **c < DISSONANT_BELOW).count();
    let distinct: HashSet<&BTreeSet<u8>> = chords.iter().collect();
    let chord_diversity = distinct.len() as f64 / chords.len().max(1) as f64;

    // too much variety is penalized by capping its contribution
    let harmonic_coherence = (avg_consonance * 0.6
        + (1.0 - dissonance_count as f64 / consonance.len().max(1) as f64) * 0.3
        + chord_diversity.min(0.5) * 0.2)
        * 100.0;

    HarmonyAnalysis {
        harmonic_coherence,
        avg_consonance,
        dissonance_count,
        chord_diversity,
        total_chords: chords.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(onset: u64, pitch: u8) -> TimedNote {
        TimedNote {
            onset_tick: onset,
            pitch,
            velocity: 100,
            channel: 0,
            duration_ticks: 240,
        }
    }

    #[test]
    fn test_melody_has_no_chords() {
        let notes: Vec<TimedNote> = (0..8).map(|i| note(i * 480, 60 + i as u8)).collect();
        let h = analyze_harmony(&notes);
        assert_eq!(h.total_chords, 0);
        assert_eq!(h.avg_consonance, 0.5);
        // 0.5*0.6 + 1.0*0.3 + 0
        assert!((h.harmonic_coherence - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_fifths_are_consonant() {
        let notes = vec![note(0, 60), note(10, 67), note(480, 62), note(490, 69)];
        let h = analyze_harmony(&notes);
        assert_eq!(h.total_chords, 2);
        assert!((h.avg_consonance - 0.8).abs() < 1e-9);
        assert_eq!(h.dissonance_count, 0);
        // {0,7} and {2,9} are different chords
        assert_eq!(h.chord_diversity, 1.0);
    }

    #[test]
    fn test_clusters_are_dissonant() {
        let notes = vec![note(0, 60), note(0, 61), note(480, 64), note(480, 65)];
        let h = analyze_harmony(&notes);
        assert_eq!(h.dissonance_count, 2);
        assert!(h.harmonic_coherence < 40.0);
    }

    #[test]
    fn test_empty() {
        let h = analyze_harmony(&[]);
        assert_eq!(h.harmonic_coherence, 0.0);
        assert_eq!(h.total_chords, 0);
    }
}
