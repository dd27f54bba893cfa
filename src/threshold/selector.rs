//! Threshold search
//!
//! Bounded 1-D grid search: candidate thresholds descend from the observed
//! max-abs, each candidate quantize-dequantizes the distribution, and the
//! minimizer of the configured error metric wins. Ties prefer the larger
//! threshold (retains more range). Pure functions; callers commit the result
//! into the node's quantization config.

use super::metrics::{histogram_error, slice_error, ErrorMetric};
use crate::qconfig::{
    next_power_of_two, symmetric_step, QuantMethod, QuantScheme, TensorQuantConfig, Thresholds,
    THRESHOLD_EPS,
};
use crate::stats::TensorStats;

/// Grid resolution: candidates per octave below max-abs
const STEPS_PER_OCTAVE: usize = 4;
/// Octaves searched below max-abs
const SEARCH_OCTAVES: usize = 10;
/// Lloyd iterations for lookup-table center fitting
const LUT_ITERATIONS: usize = 8;

/// Descending threshold candidates `max_abs · 2^(-i / STEPS_PER_OCTAVE)`
fn candidate_grid(max_abs: f32) -> Vec<f32> {
    let max_abs = max_abs.max(THRESHOLD_EPS);
    (0..=STEPS_PER_OCTAVE * SEARCH_OCTAVES)
        .map(|i| max_abs * 2f32.powf(-(i as f32) / STEPS_PER_OCTAVE as f32))
        .collect()
}

/// Descending power-of-two candidates starting at the snap of max-abs
fn pot_candidate_grid(max_abs: f32) -> Vec<f32> {
    let top = next_power_of_two(max_abs.max(THRESHOLD_EPS));
    (0..=SEARCH_OCTAVES).map(|i| top * 2f32.powi(-(i as i32))).collect()
}

fn qdq_symmetric(v: f32, threshold: f32, bits: u8) -> f32 {
    let step = symmetric_step(threshold, bits).max(THRESHOLD_EPS);
    let qmin = -(1i64 << (bits - 1)) as f32;
    let qmax = ((1i64 << (bits - 1)) - 1) as f32;
    (v / step).round().clamp(qmin, qmax) * step
}

/// Search the scalar threshold minimizing `metric` over raw values
pub fn search_threshold(
    values: &[f32],
    bits: u8,
    metric: ErrorMetric,
    power_of_two: bool,
) -> f32 {
    let max_abs = values
        .iter()
        .fold(0.0f32, |m, &v| m.max(v.abs()))
        .max(THRESHOLD_EPS);

    if metric == ErrorMetric::NoClipping {
        return if power_of_two {
            next_power_of_two(max_abs)
        } else {
            max_abs
        };
    }

    let candidates = if power_of_two {
        pot_candidate_grid(max_abs)
    } else {
        candidate_grid(max_abs)
    };

    let mut best_t = candidates[0];
    let mut best_err = f64::INFINITY;
    let mut quantized = vec![0.0f32; values.len()];
    for &t in &candidates {
        for (q, &v) in quantized.iter_mut().zip(values) {
            *q = qdq_symmetric(v, t, bits);
        }
        let err = slice_error(values, &quantized, metric);
        // Strict improvement only: first (largest) candidate wins ties
        if err < best_err {
            best_err = err;
            best_t = t;
        }
    }
    best_t
}

/// Search a threshold against histogram statistics
///
/// `shift` recenters the distribution before quantization (shift-negative
/// correction); the returned threshold applies to the shifted domain.
pub fn search_histogram_threshold(
    stats: &TensorStats,
    bits: u8,
    metric: ErrorMetric,
    power_of_two: bool,
    shift: f32,
) -> f32 {
    let max_abs = (stats.min + shift)
        .abs()
        .max((stats.max + shift).abs())
        .max(THRESHOLD_EPS);

    if metric == ErrorMetric::NoClipping {
        return if power_of_two {
            next_power_of_two(max_abs)
        } else {
            max_abs
        };
    }

    let candidates = if power_of_two {
        pot_candidate_grid(max_abs)
    } else {
        candidate_grid(max_abs)
    };

    let mut best_t = candidates[0];
    let mut best_err = f64::INFINITY;
    for &t in &candidates {
        let err = histogram_error(&stats.histogram, metric, |v| {
            qdq_symmetric(v + shift, t, bits) - shift
        });
        if err < best_err {
            best_err = err;
            best_t = t;
        }
    }
    best_t
}

/// Channel slice of a row-major tensor (column convention)
fn channel_values(values: &[f32], num_channels: usize, channel: usize) -> Vec<f32> {
    values
        .iter()
        .enumerate()
        .filter(|(i, _)| i % num_channels == channel)
        .map(|(_, &v)| v)
        .collect()
}

/// Select a committed scheme for a weight tensor held in memory
///
/// Per-channel mode repeats the scalar search independently per output
/// channel (weight columns).
pub fn select_weight_scheme(
    values: &[f32],
    num_channels: usize,
    cfg: &TensorQuantConfig,
) -> QuantScheme {
    match cfg.method {
        QuantMethod::Symmetric | QuantMethod::PowerOfTwo => {
            let pot = cfg.method == QuantMethod::PowerOfTwo;
            let threshold = if cfg.per_channel && num_channels > 1 {
                let ts = (0..num_channels)
                    .map(|ch| {
                        let slice = channel_values(values, num_channels, ch);
                        search_threshold(&slice, cfg.bits, cfg.metric, pot)
                    })
                    .collect();
                Thresholds::PerChannel(ts).floored()
            } else {
                Thresholds::PerTensor(search_threshold(values, cfg.bits, cfg.metric, pot))
                    .floored()
            };
            if pot {
                QuantScheme::PowerOfTwo { threshold }
            } else {
                QuantScheme::Symmetric { threshold }
            }
        }
        QuantMethod::Uniform => {
            let (min, max) = values
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            let (min, max) = if min.is_finite() && max > min {
                (min, max)
            } else {
                (0.0, THRESHOLD_EPS)
            };
            QuantScheme::Uniform { min, max }
        }
        QuantMethod::LookupTable => QuantScheme::LookupTable {
            centers: fit_centers(values, cfg.bits),
        },
    }
}

/// Select a committed scheme for an activation from collected statistics
///
/// Activation thresholds are always per-tensor; `cfg.per_channel` is a
/// weight-only knob and config validation rejects it on activation halves.
///
/// Returns the scheme plus the applied range shift (non-zero only when
/// `allow_shift` is set and the observed range reaches below zero).
pub fn select_activation_scheme(
    stats: &TensorStats,
    cfg: &TensorQuantConfig,
    allow_shift: bool,
) -> (QuantScheme, f32) {
    let shift = if allow_shift && stats.min < 0.0 {
        -stats.min
    } else {
        0.0
    };

    match cfg.method {
        QuantMethod::Symmetric | QuantMethod::PowerOfTwo => {
            let pot = cfg.method == QuantMethod::PowerOfTwo;
            let t = search_histogram_threshold(stats, cfg.bits, cfg.metric, pot, shift);
            let threshold = Thresholds::PerTensor(t).floored();
            let scheme = if pot {
                QuantScheme::PowerOfTwo { threshold }
            } else {
                QuantScheme::Symmetric { threshold }
            };
            (scheme, shift)
        }
        QuantMethod::Uniform => {
            let (min, max) = if stats.max > stats.min {
                (stats.min, stats.max)
            } else {
                (stats.min, stats.min + THRESHOLD_EPS)
            };
            (QuantScheme::Uniform { min, max }, 0.0)
        }
        QuantMethod::LookupTable => {
            let weighted: Vec<(f32, f64)> = stats.histogram.iter().collect();
            (
                QuantScheme::LookupTable {
                    centers: fit_centers_weighted(&weighted, cfg.bits),
                },
                0.0,
            )
        }
    }
}

/// Fit `2^min(bits,6)` lookup-table centers with Lloyd iterations
fn fit_centers(values: &[f32], bits: u8) -> Vec<f32> {
    let weighted: Vec<(f32, f64)> = values.iter().map(|&v| (v, 1.0)).collect();
    fit_centers_weighted(&weighted, bits)
}

fn fit_centers_weighted(weighted: &[(f32, f64)], bits: u8) -> Vec<f32> {
    // Cap the table size; beyond 64 entries a LUT stops paying for itself
    let k = 1usize << bits.min(6);
    let (min, max) = weighted
        .iter()
        .filter(|(_, w)| *w > 0.0)
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &(v, _)| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() || max <= min {
        return vec![if min.is_finite() { min } else { 0.0 }];
    }

    // Deterministic init: evenly spaced over the range
    let mut centers: Vec<f32> = (0..k)
        .map(|i| min + (max - min) * (i as f32 + 0.5) / k as f32)
        .collect();

    for _ in 0..LUT_ITERATIONS {
        let mut sums = vec![0.0f64; k];
        let mut mass = vec![0.0f64; k];
        for &(v, w) in weighted {
            if w <= 0.0 {
                continue;
            }
            let nearest = centers
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    (v - **a)
                        .abs()
                        .partial_cmp(&(v - **b).abs())
                        .expect("finite centers")
                })
                .map(|(i, _)| i)
                .unwrap_or(0);
            sums[nearest] += v as f64 * w;
            mass[nearest] += w;
        }
        for i in 0..k {
            if mass[i] > 0.0 {
                centers[i] = (sums[i] / mass[i]) as f32;
            }
        }
    }
    centers.sort_by(|a, b| a.partial_cmp(b).expect("finite centers"));
    centers
}
