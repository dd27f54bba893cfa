//! Quantization schemes and their quantize/dequantize kernels
//!
//! Each scheme is a tagged variant so invalid method/parameter combinations
//! are unrepresentable: a symmetric scheme always carries thresholds, a
//! uniform scheme always carries a min/max range, and a lookup table always
//! carries its centers.

use serde::{Deserialize, Serialize};

/// Smallest admissible threshold; floors degenerate (all-zero) tensors
pub const THRESHOLD_EPS: f32 = 1e-8;

/// Scalar or per-output-channel threshold values
///
/// Per-channel thresholds follow the column convention: for a row-major
/// tensor of shape `[rows, channels]`, element `i` belongs to channel
/// `i % channels`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Thresholds {
    /// Single threshold for the whole tensor
    PerTensor(f32),
    /// One threshold per output channel
    PerChannel(Vec<f32>),
}

impl Thresholds {
    /// Threshold for a given channel index
    pub fn get(&self, channel: usize) -> f32 {
        match self {
            Thresholds::PerTensor(t) => *t,
            Thresholds::PerChannel(ts) => ts[channel % ts.len().max(1)],
        }
    }

    /// Number of independent thresholds
    pub fn num_channels(&self) -> usize {
        match self {
            Thresholds::PerTensor(_) => 1,
            Thresholds::PerChannel(ts) => ts.len(),
        }
    }

    /// All thresholds strictly positive
    pub fn all_positive(&self) -> bool {
        match self {
            Thresholds::PerTensor(t) => *t > 0.0,
            Thresholds::PerChannel(ts) => ts.iter().all(|&t| t > 0.0),
        }
    }

    /// Floor every threshold at [`THRESHOLD_EPS`]
    pub fn floored(self) -> Self {
        match self {
            Thresholds::PerTensor(t) => Thresholds::PerTensor(t.max(THRESHOLD_EPS)),
            Thresholds::PerChannel(ts) => {
                Thresholds::PerChannel(ts.into_iter().map(|t| t.max(THRESHOLD_EPS)).collect())
            }
        }
    }
}

/// A committed quantization scheme for one tensor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum QuantScheme {
    /// Symmetric fixed-point grid over `[-t, t)`
    Symmetric { threshold: Thresholds },
    /// Symmetric grid with the threshold snapped up to a power of two
    PowerOfTwo { threshold: Thresholds },
    /// Asymmetric uniform grid over `[min, max]`
    Uniform { min: f32, max: f32 },
    /// Nearest-center lookup table
    LookupTable { centers: Vec<f32> },
}

/// Quantization step for a symmetric grid: `threshold / 2^(bits-1)`
pub fn symmetric_step(threshold: f32, bits: u8) -> f32 {
    threshold / (1u32 << (bits - 1)) as f32
}

/// Snap a threshold up to the nearest power of two
pub fn next_power_of_two(threshold: f32) -> f32 {
    let t = threshold.max(THRESHOLD_EPS);
    2f32.powf(t.log2().ceil())
}

impl QuantScheme {
    /// Symmetric scheme with a single per-tensor threshold
    pub fn symmetric(threshold: f32) -> Self {
        QuantScheme::Symmetric {
            threshold: Thresholds::PerTensor(threshold).floored(),
        }
    }

    /// Quantize-dequantize a row-major tensor with `num_channels` columns
    ///
    /// Returns values rounded onto the scheme's grid at the given bit-width.
    pub fn apply(&self, values: &[f32], bits: u8, num_channels: usize) -> Vec<f32> {
        match self {
            QuantScheme::Symmetric { threshold } | QuantScheme::PowerOfTwo { threshold } => {
                let qmin = -(1i32 << (bits - 1));
                let qmax = (1i32 << (bits - 1)) - 1;
                let nc = num_channels.max(1);
                values
                    .iter()
                    .enumerate()
                    .map(|(i, &v)| {
                        let t = threshold.get(i % nc);
                        let step = symmetric_step(t, bits).max(THRESHOLD_EPS);
                        let q = (v / step).round().clamp(qmin as f32, qmax as f32);
                        q * step
                    })
                    .collect()
            }
            QuantScheme::Uniform { min, max } => {
                let qmax = ((1u32 << bits) - 1) as f32;
                let range = (max - min).max(THRESHOLD_EPS);
                let scale = range / qmax;
                values
                    .iter()
                    .map(|&v| {
                        let q = ((v - min) / scale).round().clamp(0.0, qmax);
                        min + q * scale
                    })
                    .collect()
            }
            QuantScheme::LookupTable { centers } => values
                .iter()
                .map(|&v| nearest_center(v, centers))
                .collect(),
        }
    }

    /// Per-channel symmetric step sizes (scalar schemes return one entry)
    ///
    /// Used by the fine-tuner to seed trainable scale tensors.
    pub fn steps(&self, bits: u8) -> Vec<f32> {
        match self {
            QuantScheme::Symmetric { threshold } | QuantScheme::PowerOfTwo { threshold } => {
                match threshold {
                    Thresholds::PerTensor(t) => vec![symmetric_step(*t, bits)],
                    Thresholds::PerChannel(ts) => {
                        ts.iter().map(|&t| symmetric_step(t, bits)).collect()
                    }
                }
            }
            QuantScheme::Uniform { min, max } => {
                let qmax = ((1u32 << bits) - 1) as f32;
                vec![(max - min).max(THRESHOLD_EPS) / qmax]
            }
            QuantScheme::LookupTable { centers } => {
                // No uniform step; approximate with the smallest center gap
                let mut sorted = centers.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite centers"));
                let gap = sorted
                    .windows(2)
                    .map(|w| w[1] - w[0])
                    .fold(f32::INFINITY, f32::min);
                vec![if gap.is_finite() { gap } else { THRESHOLD_EPS }]
            }
        }
    }

    /// Threshold values, if the scheme carries any
    pub fn thresholds(&self) -> Option<&Thresholds> {
        match self {
            QuantScheme::Symmetric { threshold } | QuantScheme::PowerOfTwo { threshold } => {
                Some(threshold)
            }
            _ => None,
        }
    }

    /// Replace the thresholds of a threshold-bearing scheme
    ///
    /// No-op for schemes without thresholds. Power-of-two schemes snap the
    /// new values back onto the power-of-two grid.
    pub fn set_thresholds(&mut self, new: Thresholds) {
        match self {
            QuantScheme::Symmetric { threshold } => *threshold = new.floored(),
            QuantScheme::PowerOfTwo { threshold } => {
                *threshold = match new.floored() {
                    Thresholds::PerTensor(t) => Thresholds::PerTensor(next_power_of_two(t)),
                    Thresholds::PerChannel(ts) => {
                        Thresholds::PerChannel(ts.into_iter().map(next_power_of_two).collect())
                    }
                };
            }
            _ => {}
        }
    }
}

fn nearest_center(v: f32, centers: &[f32]) -> f32 {
    centers
        .iter()
        .copied()
        .min_by(|a, b| {
            (v - a)
                .abs()
                .partial_cmp(&(v - b).abs())
                .expect("finite centers")
        })
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    // ========================================================================
    // PROPERTY TESTS
    // ========================================================================

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(200))]

        /// Symmetric round-trip error is at most one quantization step
        #[test]
        fn prop_symmetric_error_within_one_step(
            values in prop::collection::vec(-1.0f32..1.0, 1..64),
            bits in 2u8..12,
        ) {
            let scheme = QuantScheme::symmetric(1.0);
            let out = scheme.apply(&values, bits, 1);

            let step = symmetric_step(1.0, bits);
            for (&v, &q) in values.iter().zip(out.iter()) {
                prop_assert!((v - q).abs() <= step + 1e-6);
            }
        }

        /// Power-of-two snapping never shrinks the threshold
        #[test]
        fn prop_pot_snap_is_upper_bound(t in 1e-6f32..1e6) {
            let snapped = next_power_of_two(t);
            prop_assert!(snapped >= t * 0.999);
            let log = snapped.log2();
            prop_assert!((log - log.round()).abs() < 1e-4);
        }

        /// Uniform scheme output stays within [min, max]
        #[test]
        fn prop_uniform_output_in_range(
            values in prop::collection::vec(-10.0f32..10.0, 1..32),
            bits in 2u8..9,
        ) {
            let scheme = QuantScheme::Uniform { min: -1.0, max: 1.0 };
            let out = scheme.apply(&values, bits, 1);
            for &v in &out {
                prop_assert!((-1.0 - 1e-5..=1.0 + 1e-5).contains(&v));
            }
        }

        /// Lookup-table output is always one of the centers
        #[test]
        fn prop_lut_output_is_center(
            values in prop::collection::vec(-5.0f32..5.0, 1..32),
        ) {
            let centers = vec![-1.0, -0.25, 0.0, 0.5, 2.0];
            let scheme = QuantScheme::LookupTable { centers: centers.clone() };
            let out = scheme.apply(&values, 8, 1);
            for &v in &out {
                prop_assert!(centers.iter().any(|&c| (c - v).abs() < 1e-6));
            }
        }
    }

    // ========================================================================
    // UNIT TESTS
    // ========================================================================

    #[test]
    fn test_symmetric_step() {
        // 8 bits, threshold 1.0: step = 1/128
        assert_abs_diff_eq!(symmetric_step(1.0, 8), 1.0 / 128.0, epsilon = 1e-9);
    }

    #[test]
    fn test_threshold_floor() {
        let t = Thresholds::PerTensor(0.0).floored();
        assert!(t.all_positive());
        assert_abs_diff_eq!(t.get(0), THRESHOLD_EPS, epsilon = 1e-12);
    }

    #[test]
    fn test_per_channel_indexing() {
        let t = Thresholds::PerChannel(vec![1.0, 2.0]);
        assert_abs_diff_eq!(t.get(0), 1.0);
        assert_abs_diff_eq!(t.get(1), 2.0);
        assert_abs_diff_eq!(t.get(2), 1.0); // wraps by column
    }

    #[test]
    fn test_per_channel_apply() {
        // Two columns with very different ranges
        let values = vec![0.9, 90.0, -0.9, -90.0];
        let scheme = QuantScheme::Symmetric {
            threshold: Thresholds::PerChannel(vec![1.0, 100.0]),
        };
        let out = scheme.apply(&values, 8, 2);

        assert_abs_diff_eq!(out[0], 0.9, epsilon = 1.0 / 128.0);
        assert_abs_diff_eq!(out[1], 90.0, epsilon = 100.0 / 128.0);
    }

    #[test]
    fn test_next_power_of_two() {
        assert_abs_diff_eq!(next_power_of_two(1.0), 1.0);
        assert_abs_diff_eq!(next_power_of_two(1.1), 2.0);
        assert_abs_diff_eq!(next_power_of_two(0.3), 0.5);
    }

    #[test]
    fn test_symmetric_clamps_above_threshold() {
        let scheme = QuantScheme::symmetric(1.0);
        let out = scheme.apply(&[10.0], 8, 1);
        // Top of grid is (2^7 - 1) * step
        let step = symmetric_step(1.0, 8);
        assert_abs_diff_eq!(out[0], 127.0 * step, epsilon = 1e-6);
    }

    #[test]
    fn test_uniform_round_trip() {
        let scheme = QuantScheme::Uniform { min: 0.0, max: 4.0 };
        let out = scheme.apply(&[0.0, 1.0, 2.5, 4.0], 8, 1);
        let step = 4.0 / 255.0;
        for (&v, &q) in [0.0f32, 1.0, 2.5, 4.0].iter().zip(out.iter()) {
            assert!((v - q).abs() <= step);
        }
    }

    #[test]
    fn test_steps_per_channel() {
        let scheme = QuantScheme::Symmetric {
            threshold: Thresholds::PerChannel(vec![1.0, 2.0]),
        };
        let steps = scheme.steps(8);
        assert_eq!(steps.len(), 2);
        assert_abs_diff_eq!(steps[0], 1.0 / 128.0, epsilon = 1e-9);
        assert_abs_diff_eq!(steps[1], 2.0 / 128.0, epsilon = 1e-9);
    }
}
