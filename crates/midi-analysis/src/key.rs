use crate::note::TimedNote;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Krumhansl-Kessler major key profile.
const MAJOR_PROFILE: [f64; 12] = [6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88];

/// Krumhansl-Kessler minor key profile.
const MINOR_PROFILE: [f64; 12] = [6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17];

const KEY_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

pub const DEFAULT_WINDOW: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDetection {
    /// Tonic name, with an `m` suffix for minor keys.
    pub key: String,
    /// Best correlation mapped from [-1, 1] to [0, 1].
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStability {
    pub primary_key: String,
    pub key_changes: usize,
    pub stability_score: f64,
    pub key_distribution: BTreeMap<String, f64>,
    pub keys_timeline: Vec<String>,
}

/// Krumhansl-Schmuckler key finding on a velocity-weighted pitch-class
/// histogram, correlated against all 24 major and minor profiles.
pub fn detect_key(notes: &[TimedNote]) -> KeyDetection {
    if notes.is_empty() {
        return KeyDetection {
            key: "C".into(),
            confidence: 0.0,
        };
    }

    let mut histogram = [0.0_f64; 12];
    for note in notes {
        histogram[usize::from(note.pitch % 12)] += f64::from(note.velocity);
    }
    let total: f64 = histogram.iter().sum();
    if total > 0.0 {
        for h in &mut histogram {
            *h /= total;
        }
    }

    let mut best_corr = -1.0_f64;
    let mut best_key = String::from("C");

    for tonic in 0..12 {
        for (profile, suffix) in [(&MAJOR_PROFILE, ""), (&MINOR_PROFILE, "m")] {
            // profile rolled so its first degree lands on the tonic
            let mut rolled = [0.0; 12];
            for (i, weight) in profile.iter().enumerate() {
                rolled[(i + tonic) % 12] = *weight;
            }
            let corr = pearson(&histogram, &rolled);
            if corr > best_corr {
                best_corr = corr;
                best_key = format!("{}{}", KEY_NAMES[tonic], suffix);
            }
        }
    }

    KeyDetection {
        key: best_key,
        confidence: (best_corr + 1.0) / 2.0,
    }
}

/// Key over sliding windows of `window` notes, hopping half a window.
pub fn analyze_key_stability(notes: &[TimedNote], window: usize) -> KeyStability {
    let window = window.max(2);
    if notes.len() < window {
        let detection = detect_key(notes);
        return KeyStability {
            primary_key: detection.key.clone(),
            key_changes: 0,
            stability_score: detection.confidence,
            key_distribution: BTreeMap::from([(detection.key.clone(), 1.0)]),
            keys_timeline: vec![detection.key],
        };
    }

    let hop = window / 2;
    let timeline: Vec<String> = (0..=notes.len() - window)
        .step_by(hop)
        .map(|start| detect_key(&notes[start..start + window]).key)
        .collect();

    let key_changes = timeline.windows(2).filter(|w| w[0] != w[1]).count();

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for key in &timeline {
        *counts.entry(key.clone()).or_default() += 1;
    }

    // ties go to the key that appeared first
    let mut primary_key = timeline[0].clone();
    let mut primary_count = 0;
    for key in &timeline {
        let count = counts[key];
        if count > primary_count {
            primary_count = count;
            primary_key = key.clone();
        }
    }

    let total = timeline.len() as f64;
    KeyStability {
        primary_key,
        key_changes,
        stability_score: primary_count as f64 / total,
        key_distribution: counts
            .into_iter()
            .map(|(k, c)| (k, c as f64 / total))
            .collect(),
        keys_timeline: timeline,
    }
}

/// Pearson correlation coefficient between two 12-element arrays.
fn pearson(x: &[f64; 12], y: &[f64; 12]) -> f64 {
    let x_mean: f64 = x.iter().sum::<f64>() / 12.0;
    let y_mean: f64 = y.iter().sum::<f64>() / 12.0;

    let mut num = 0.0;
    let mut x_sq = 0.0;
    let mut y_sq = 0.0;

    for i in 0..12 {
        let xd = x[i] - x_mean;
        let yd = y[i] - y_mean;
        num += xd * yd;
        x_sq += xd * xd;
        y_sq += yd * yd;
    }

    let denom = (x_sq * y_sq).sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    num / denom
}
