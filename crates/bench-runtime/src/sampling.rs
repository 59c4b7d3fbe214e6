// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Next-token selection for the compiled decode step.
//!
//! Logits are temperature-scaled, optionally restricted to the top `k`
//! values, normalised with softmax and then sampled with the exponential
//! race `argmax(p / q), q ~ Exp(1)`, which draws from the categorical
//! distribution without a cumulative sum.

use crate::BackendError;
use rand::Rng;

/// Temperatures below this are clamped to avoid dividing by zero.
pub const MIN_TEMPERATURE: f32 = 1e-5;

/// Temperature and top-k settings for sampled decoding.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SamplingConfig {
    pub temperature: f32,
    /// Keep only the `k` largest logits; `None` keeps all.
    pub top_k: Option<usize>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            top_k: Some(5),
        }
    }
}

/// Converts raw logits into a probability distribution.
///
/// Values strictly below the `k`-th largest scaled logit are masked out;
/// values tied with it survive.
pub fn logits_to_probs(logits: &[f32], config: &SamplingConfig) -> Result<Vec<f32>, BackendError> {
    if logits.is_empty() {
        return Err(BackendError::EmptyLogits);
    }

    let temperature = config.temperature.max(MIN_TEMPERATURE);
    let mut scaled: Vec<f32> = logits.iter().map(|l| l / temperature).collect();

    if let Some(k) = config.top_k {
        let k = k.clamp(1, scaled.len());
        if k < scaled.len() {
            let mut sorted = scaled.clone();
            sorted.select_nth_unstable_by(k - 1, |a, b| b.total_cmp(a));
            let pivot = sorted[k - 1];
            for v in scaled.iter_mut().filter(|v| **v < pivot) {
                *v = f32::NEG_INFINITY;
            }
        }
    }

    Ok(softmax(&scaled))
}

/// Numerically stable softmax.
pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        let uniform = 1.0 / values.len().max(1) as f32;
        return vec![uniform; values.len()];
    }
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Draws one index from `probs` using the exponential race.
///
/// Zero-probability entries never win.
pub fn multinomial_sample_one<R: Rng + ?Sized>(probs: &[f32], rng: &mut R) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &p) in probs.iter().enumerate() {
        if p <= 0.0 {
            continue;
        }
        let u: f32 = rng.gen();
        let q = (-(1.0 - u).ln()).max(f32::MIN_POSITIVE);
        let score = p / q;
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

/// Samples the next token id from raw logits.
pub fn sample<R: Rng + ?Sized>(
    logits: &[f32],
    config: &SamplingConfig,
    rng: &mut R,
) -> Result<u32, BackendError> {
    let probs = logits_to_probs(logits, config)?;
    let index = multinomial_sample_one(&probs, rng)
        .or_else(|| argmax(&probs))
        .ok_or(BackendError::EmptyLogits)?;
    token_id(index)
}

/// Index of the largest value; the first one on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Greedy token choice from raw logits.
pub fn greedy(logits: &[f32]) -> Result<u32, BackendError> {
    argmax(logits)
        .ok_or(BackendError::EmptyLogits)
        .and_then(token_id)
}

fn token_id(index: usize) -> Result<u32, BackendError> {
    u32::try_from(index).map_err(|_| BackendError::Runtime {
        op: "sample",
        detail: format!("token index {index} exceeds u32"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn test_top_k_masks_below_pivot() {
        let cfg = SamplingConfig {
            temperature: 1.0,
            top_k: Some(2),
        };
        let p = logits_to_probs(&[0.1, 5.0, 3.0, -1.0], &cfg).unwrap();
        assert_eq!(p[0], 0.0);
        assert_eq!(p[3], 0.0);
        assert!(p[1] > 0.0 && p[2] > 0.0);
    }

    #[test]
    fn test_top_k_keeps_ties_with_pivot() {
        let cfg = SamplingConfig {
            temperature: 1.0,
            top_k: Some(1),
        };
        let p = logits_to_probs(&[2.0, 2.0, 1.0], &cfg).unwrap();
        assert!((p[0] - 0.5).abs() < 1e-6);
        assert!((p[1] - 0.5).abs() < 1e-6);
        assert_eq!(p[2], 0.0);
    }

    #[test]
    fn test_top_k_larger_than_vocab() {
        let cfg = SamplingConfig {
            temperature: 1.0,
            top_k: Some(100),
        };
        let p = logits_to_probs(&[1.0, 1.0], &cfg).unwrap();
        assert!(p.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn test_zero_temperature_is_clamped() {
        let cfg = SamplingConfig {
            temperature: 0.0,
            top_k: None,
        };
        let p = logits_to_probs(&[1.0, 1.5], &cfg).unwrap();
        assert!(p.iter().all(|v| v.is_finite()));
        assert!(p[1] > 0.999);
    }

    #[test]
    fn test_empty_logits() {
        let cfg = SamplingConfig::default();
        assert!(matches!(
            logits_to_probs(&[], &cfg),
            Err(BackendError::EmptyLogits)
        ));
        assert!(matches!(greedy(&[]), Err(BackendError::EmptyLogits)));
    }

    #[test]
    fn test_sample_never_picks_masked_token() {
        let mut rng = StdRng::seed_from_u64(7);
        let cfg = SamplingConfig {
            temperature: 0.6,
            top_k: Some(2),
        };
        let logits = [0.0, 4.0, 3.9, -2.0, 1.0];
        for _ in 0..500 {
            let t = sample(&logits, &cfg, &mut rng).unwrap();
            assert!(t == 1 || t == 2, "picked masked token {t}");
        }
    }

    #[test]
    fn test_multinomial_follows_distribution() {
        let mut rng = StdRng::seed_from_u64(42);
        let probs = [0.8, 0.2, 0.0];
        let mut counts = [0usize; 3];
        for _ in 0..5000 {
            counts[multinomial_sample_one(&probs, &mut rng).unwrap()] += 1;
        }
        assert_eq!(counts[2], 0);
        let frac = counts[0] as f64 / 5000.0;
        assert!((frac - 0.8).abs() < 0.05, "frequency {frac}");
    }

    #[test]
    fn test_multinomial_all_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(multinomial_sample_one(&[0.0, 0.0], &mut rng), None);
    }

    #[test]
    fn test_argmax_first_on_ties() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), Some(1));
        assert_eq!(argmax(&[]), None);
        assert_eq!(greedy(&[0.5, -1.0]).unwrap(), 0);
    }
}
