use crate::note::TimedNote;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RhythmAnalysis {
    /// 0-100, from the coefficient of variation of inter-onset intervals.
    pub rhythmic_consistency: f64,
    /// Tempo implied by treating the mean interval as one beat.
    pub tempo_bpm: f64,
    /// Standard deviation of intervals, in beats.
    pub tempo_variance: f64,
    /// Share of onsets that miss the beat grid.
    pub syncopation_score: f64,
    /// Notes per second.
    pub note_density: f64,
    pub mean_ioi_ticks: f64,
    pub ioi_cv: f64,
}

impl RhythmAnalysis {
    fn flat() -> Self {
        Self {
            rhythmic_consistency: 0.0,
            tempo_bpm: 120.0,
            tempo_variance: 0.0,
            syncopation_score: 0.0,
            note_density: 0.0,
            mean_ioi_ticks: 0.0,
            ioi_cv: 0.0,
        }
    }
}

pub fn analyze_rhythm(notes: &[TimedNote], ticks_per_beat: u64) -> RhythmAnalysis {
    if notes.len() < 2 || ticks_per_beat == 0 {
        return RhythmAnalysis::flat();
    }

    let iois: Vec<f64> = notes
        .windows(2)
        .filter_map(|w| w[1].onset_tick.checked_sub(w[0].onset_tick))
        .filter(|ioi| *ioi > 0)
        .map(|ioi| ioi as f64)
        .collect();
    if iois.is_empty() {
        return RhythmAnalysis::flat();
    }

    let (mean, std) = mean_std(&iois);
    let cv = if mean > 0.0 { std / mean } else { 0.0 };
    let tpb = ticks_per_beat as f64;
    let tempo_bpm = if mean > 0.0 { 60.0 / (mean / tpb) } else { 120.0 };

    let on_grid = notes
        .iter()
        .filter(|n| ((n.onset_tick % ticks_per_beat) as f64) < tpb * 0.1)
        .count();
    let syncopation_score = (notes.len() - on_grid) as f64 / notes.len() as f64;

    let span_ticks = notes[notes.len() - 1]
        .onset_tick
        .saturating_sub(notes[0].onset_tick) as f64;
    let span_seconds = span_ticks / tpb / (tempo_bpm / 60.0);
    let note_density = notes.len() as f64 / span_seconds.max(0.1);

    RhythmAnalysis {
        rhythmic_consistency: (100.0 - cv * 100.0).max(0.0),
        tempo_bpm,
        tempo_variance: std / tpb,
        syncopation_score,
        note_density,
        mean_ioi_ticks: mean,
        ioi_cv: cv,
    }
}

/// Mean and population standard deviation.
pub(crate) fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(onset: u64) -> TimedNote {
        TimedNote {
            onset_tick: onset,
            pitch: 60,
            velocity: 100,
            channel: 0,
            duration_ticks: 240,
        }
    }

    #[test]
    fn test_steady_quarters() {
        let notes: Vec<TimedNote> = (0..8).map(|i| note(i * 480)).collect();
        let r = analyze_rhythm(&notes, 480);
        assert_eq!(r.rhythmic_consistency, 100.0);
        assert!((r.tempo_bpm - 60.0).abs() < 1e-9);
        assert_eq!(r.syncopation_score, 0.0);
        assert_eq!(r.tempo_variance, 0.0);
        // 8 notes over 7 seconds
        assert!((r.note_density - 8.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_offbeats_count_as_syncopation() {
        let notes = vec![note(0), note(240), note(480), note(720)];
        let r = analyze_rhythm(&notes, 480);
        assert_eq!(r.syncopation_score, 0.5);
    }

    #[test]
    fn test_uneven_intervals_lower_consistency() {
        let notes = vec![note(0), note(60), note(480), note(500), note(1440)];
        let r = analyze_rhythm(&notes, 480);
        assert!(r.rhythmic_consistency < 50.0);
        assert!(r.ioi_cv > 0.5);
    }

    #[test]
    fn test_too_few_notes() {
        let r = analyze_rhythm(&[note(0)], 480);
        assert_eq!(r.tempo_bpm, 120.0);
        assert_eq!(r.note_density, 0.0);

        let chord = vec![note(0), note(0)];
        assert_eq!(analyze_rhythm(&chord, 480).rhythmic_consistency, 0.0);
    }
}
