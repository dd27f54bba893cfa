//! Error criteria for threshold search
//!
//! Each metric scores a quantize-dequantize result against the original
//! distribution; the selector keeps the threshold minimizing the score.

use crate::stats::Histogram;
use serde::{Deserialize, Serialize};

const KL_EPS: f64 = 1e-10;

/// Error criterion minimized by the threshold selector
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum ErrorMetric {
    /// Mean-square error
    #[default]
    Mse,
    /// Mean-absolute error
    Mae,
    /// Lp-norm error
    Lp {
        /// Norm order (p >= 1)
        p: f32,
    },
    /// Kullback-Leibler divergence between float and quantized histograms
    Kl,
    /// No clipping: use the full observed range, no search
    NoClipping,
}

/// Score a quantized slice against the original values
///
/// KL is distribution-based; on raw slices it is evaluated by histogramming
/// both sides over the original range.
pub fn slice_error(original: &[f32], quantized: &[f32], metric: ErrorMetric) -> f64 {
    debug_assert_eq!(original.len(), quantized.len());
    if original.is_empty() {
        return 0.0;
    }
    let n = original.len() as f64;

    match metric {
        ErrorMetric::Mse => {
            original
                .iter()
                .zip(quantized)
                .map(|(&a, &b)| {
                    let d = (a - b) as f64;
                    d * d
                })
                .sum::<f64>()
                / n
        }
        ErrorMetric::Mae => {
            original
                .iter()
                .zip(quantized)
                .map(|(&a, &b)| ((a - b) as f64).abs())
                .sum::<f64>()
                / n
        }
        ErrorMetric::Lp { p } => {
            let p = p.max(1.0) as f64;
            (original
                .iter()
                .zip(quantized)
                .map(|(&a, &b)| ((a - b) as f64).abs().powf(p))
                .sum::<f64>()
                / n)
                .powf(1.0 / p)
        }
        ErrorMetric::Kl => {
            let min = original.iter().copied().fold(f32::INFINITY, f32::min);
            let max = original.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let bins = (original.len() / 4).clamp(16, 256);
            let p = Histogram::build(original.iter().copied(), min, max, bins);
            let q = Histogram::build(quantized.iter().copied(), min, max, bins);
            histogram_kl(&p, &q)
        }
        ErrorMetric::NoClipping => 0.0,
    }
}

/// Score a candidate threshold against a histogram: quantize every bin
/// center and accumulate the metric weighted by bin mass
pub fn histogram_error(
    hist: &Histogram,
    metric: ErrorMetric,
    quantize: impl Fn(f32) -> f32,
) -> f64 {
    let total = hist.total();
    if total <= 0.0 {
        return 0.0;
    }

    match metric {
        ErrorMetric::Kl => {
            // Re-bin the quantized mass over the same support
            let mut q_counts = vec![0.0f64; hist.num_bins()];
            let lo = hist.center(0);
            let hi = hist.center(hist.num_bins() - 1);
            let width = ((hi - lo) / hist.num_bins().max(1) as f32).max(f32::EPSILON);
            for (center, count) in hist.iter() {
                let qv = quantize(center);
                let idx = (((qv - lo) / width) as isize)
                    .clamp(0, hist.num_bins() as isize - 1) as usize;
                q_counts[idx] += count;
            }
            kl_counts(
                &hist.iter().map(|(_, c)| c).collect::<Vec<_>>(),
                &q_counts,
                total,
            )
        }
        ErrorMetric::NoClipping => 0.0,
        _ => {
            let mut acc = 0.0f64;
            for (center, count) in hist.iter() {
                if count <= 0.0 {
                    continue;
                }
                let d = (center - quantize(center)) as f64;
                let e = match metric {
                    ErrorMetric::Mse => d * d,
                    ErrorMetric::Mae => d.abs(),
                    ErrorMetric::Lp { p } => d.abs().powf(p.max(1.0) as f64),
                    _ => unreachable!(),
                };
                acc += e * count;
            }
            acc / total
        }
    }
}

fn histogram_kl(p: &Histogram, q: &Histogram) -> f64 {
    let p_counts: Vec<f64> = p.iter().map(|(_, c)| c).collect();
    let q_counts: Vec<f64> = q.iter().map(|(_, c)| c).collect();
    kl_counts(&p_counts, &q_counts, p.total())
}

/// KL(p || q) over raw count vectors with epsilon smoothing
fn kl_counts(p_counts: &[f64], q_counts: &[f64], p_total: f64) -> f64 {
    let q_total: f64 = q_counts.iter().sum();
    if p_total <= 0.0 || q_total <= 0.0 {
        return 0.0;
    }

    let mut kl = 0.0;
    for (&pc, &qc) in p_counts.iter().zip(q_counts) {
        let pi = pc / p_total;
        if pi > KL_EPS {
            let qi = (qc / q_total).max(KL_EPS);
            kl += pi * (pi / qi).ln();
        }
    }
    kl.max(0.0)
}
