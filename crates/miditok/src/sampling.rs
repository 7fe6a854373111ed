//! Temperature softmax with nucleus and top-k truncation.

use rand::Rng;
use std::cmp::Ordering;

/// Softmax of `logits / temperature` over the whole vocabulary.
///
/// `-inf` logits get probability zero.
pub fn softmax(logits: &[f32], temperature: f32) -> Vec<f32> {
    let max = logits
        .iter()
        .copied()
        .filter(|l| l.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![0.0; logits.len()];
    }

    let mut probs: Vec<f32> = logits
        .iter()
        .map(|l| ((l - max) / temperature).exp())
        .collect();
    let sum: f32 = probs.iter().sum();
    if sum > 0.0 {
        for p in &mut probs {
            *p /= sum;
        }
    }
    probs
}

/// Draw one id from `(id, probability)` candidates.
///
/// Candidates are sorted by descending probability; everything after the
/// cumulative mass first exceeds `top_p` is dropped, then only the first
/// `top_k` survive. The rest are renormalized and sampled. Returns `None`
/// when no probability mass is left.
pub fn sample_top_p_k<R: Rng + ?Sized>(
    mut candidates: Vec<(u32, f32)>,
    top_p: f32,
    top_k: usize,
    rng: &mut R,
) -> Option<u32> {
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut cumulative = 0.0f32;
    let mut kept = 0usize;
    for (_, p) in &candidates {
        if cumulative > top_p {
            break;
        }
        cumulative += p;
        kept += 1;
    }
    candidates.truncate(kept.min(top_k.max(1)));

    let total: f32 = candidates.iter().map(|(_, p)| *p).sum();
    if !total.is_finite() || total <= 0.0 {
        return None;
    }

    let mut draw = rng.gen::<f32>() * total;
    for (id, p) in &candidates {
        if draw < *p {
            return Some(*id);
        }
        draw -= p;
    }
    candidates.iter().rev().find(|(_, p)| *p > 0.0).map(|(id, _)| *id)
}

/// Sample an id from `allowed` given full-vocabulary `logits`.
///
/// Probabilities come from a softmax over the whole vocabulary and are then
/// restricted to `allowed` without renormalizing first, so `top_p` is
/// measured against the model's total mass. If every allowed id has
/// underflowed to zero, the allowed id with the highest logit wins.
pub fn sample_masked<R: Rng + ?Sized>(
    logits: &[f32],
    allowed: &[u32],
    temperature: f32,
    top_p: f32,
    top_k: usize,
    rng: &mut R,
) -> Option<u32> {
    if allowed.is_empty() {
        return None;
    }

    let probs = softmax(logits, temperature);
    let candidates: Vec<(u32, f32)> = allowed
        .iter()
        .map(|id| (*id, probs.get(*id as usize).copied().unwrap_or(0.0)))
        .collect();

    sample_top_p_k(candidates, top_p, top_k, rng).or_else(|| {
        allowed
            .iter()
            .copied()
            .max_by(|a, b| {
                let la = logits.get(*a as usize).copied().unwrap_or(f32::NEG_INFINITY);
                let lb = logits.get(*b as usize).copied().unwrap_or(f32::NEG_INFINITY);
                la.partial_cmp(&lb).unwrap_or(Ordering::Equal)
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0], 1.0);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_all_masked() {
        let probs = softmax(&[f32::NEG_INFINITY; 3], 1.0);
        assert_eq!(probs, vec![0.0; 3]);
    }

    #[test]
    fn test_top_k_one_is_greedy() {
        let mut rng = Pcg32::seed_from_u64(7);
        for _ in 0..20 {
            let id = sample_top_p_k(vec![(4, 0.1), (9, 0.6), (2, 0.3)], 1.0, 1, &mut rng);
            assert_eq!(id, Some(9));
        }
    }

    #[test]
    fn test_top_p_drops_tail() {
        // cumulative mass passes 0.5 after the first candidate
        let mut rng = Pcg32::seed_from_u64(1);
        for _ in 0..50 {
            let id = sample_top_p_k(vec![(1, 0.7), (2, 0.2), (3, 0.1)], 0.5, 50, &mut rng);
            assert_eq!(id, Some(1));
        }
    }

    #[test]
    fn test_no_mass_is_none() {
        let mut rng = Pcg32::seed_from_u64(1);
        assert_eq!(sample_top_p_k(vec![(1, 0.0)], 0.9, 5, &mut rng), None);
        assert_eq!(sample_top_p_k(vec![], 0.9, 5, &mut rng), None);
    }

    #[test]
    fn test_sample_masked_stays_in_allowed() {
        let mut rng = Pcg32::seed_from_u64(42);
        let logits = vec![5.0, 0.0, 1.0, 0.5, 4.0];
        for _ in 0..100 {
            let id = sample_masked(&logits, &[1, 2, 3], 1.0, 0.95, 50, &mut rng).unwrap();
            assert!([1, 2, 3].contains(&id));
        }
    }

    #[test]
    fn test_sample_masked_underflow_falls_back_to_argmax() {
        let mut rng = Pcg32::seed_from_u64(42);
        let logits = vec![1000.0, 0.0, 1.0];
        let id = sample_masked(&logits, &[1, 2], 0.01, 0.95, 50, &mut rng);
        assert_eq!(id, Some(2));
    }

    #[test]
    fn test_same_seed_same_draws() {
        let logits: Vec<f32> = (0..32).map(|i| (i % 5) as f32).collect();
        let allowed: Vec<u32> = (0..32).collect();
        let draw = |seed| {
            let mut rng = Pcg32::seed_from_u64(seed);
            (0..10)
                .map(|_| sample_masked(&logits, &allowed, 0.85, 0.95, 50, &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(999), draw(999));
    }
}
