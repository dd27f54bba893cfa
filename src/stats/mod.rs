//! Tensor statistics over representative data
//!
//! Statistics are accumulated batch by batch (observe, then compute), and
//! summarize the value distribution the threshold selector searches over:
//! min/max, per-channel extrema, and a fixed-bin histogram.

mod histogram;

pub use histogram::{Histogram, DEFAULT_BINS};

use crate::qconfig::THRESHOLD_EPS;

/// Statistical summary of one tensor's observed values
#[derive(Clone, Debug)]
pub struct TensorStats {
    /// Global minimum
    pub min: f32,
    /// Global maximum
    pub max: f32,
    /// Per-channel minima (column convention)
    pub channel_min: Vec<f32>,
    /// Per-channel maxima
    pub channel_max: Vec<f32>,
    /// Per-channel mean (used by bias correction)
    pub channel_mean: Vec<f32>,
    /// Value histogram over `[min, max]`
    pub histogram: Histogram,
    /// Number of observed elements
    pub count: usize,
}

impl TensorStats {
    /// Largest absolute observed value, floored for degenerate tensors
    pub fn max_abs(&self) -> f32 {
        self.min.abs().max(self.max.abs()).max(THRESHOLD_EPS)
    }

    /// Per-channel largest absolute value
    pub fn channel_max_abs(&self, channel: usize) -> f32 {
        self.channel_min[channel]
            .abs()
            .max(self.channel_max[channel].abs())
            .max(THRESHOLD_EPS)
    }

    /// Number of channels tracked
    pub fn num_channels(&self) -> usize {
        self.channel_min.len()
    }
}

/// Accumulates batches of row-major values with `num_channels` columns
#[derive(Clone, Debug)]
pub struct StatsCollector {
    num_channels: usize,
    min: f32,
    max: f32,
    channel_min: Vec<f32>,
    channel_max: Vec<f32>,
    channel_sum: Vec<f64>,
    channel_count: Vec<usize>,
    samples: Vec<f32>,
    count: usize,
}

impl StatsCollector {
    /// New collector for tensors with `num_channels` columns
    pub fn new(num_channels: usize) -> Self {
        let nc = num_channels.max(1);
        Self {
            num_channels: nc,
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            channel_min: vec![f32::INFINITY; nc],
            channel_max: vec![f32::NEG_INFINITY; nc],
            channel_sum: vec![0.0; nc],
            channel_count: vec![0; nc],
            samples: Vec::new(),
            count: 0,
        }
    }

    /// Observe one row-major batch
    pub fn observe(&mut self, values: &[f32]) {
        for (i, &v) in values.iter().enumerate() {
            let ch = i % self.num_channels;
            self.min = self.min.min(v);
            self.max = self.max.max(v);
            self.channel_min[ch] = self.channel_min[ch].min(v);
            self.channel_max[ch] = self.channel_max[ch].max(v);
            self.channel_sum[ch] += v as f64;
            self.channel_count[ch] += 1;
        }
        self.samples.extend_from_slice(values);
        self.count += values.len();
    }

    /// Whether any values have been observed
    pub fn has_data(&self) -> bool {
        self.count > 0
    }

    /// Finalize into a [`TensorStats`] summary
    pub fn compute(&self) -> TensorStats {
        let (min, max) = if self.has_data() {
            (self.min, self.max)
        } else {
            (0.0, 0.0)
        };

        let histogram = Histogram::build(self.samples.iter().copied(), min, max, DEFAULT_BINS);

        let channel_mean = self
            .channel_sum
            .iter()
            .zip(self.channel_count.iter())
            .map(|(&s, &n)| if n > 0 { (s / n as f64) as f32 } else { 0.0 })
            .collect();

        TensorStats {
            min,
            max,
            channel_min: self
                .channel_min
                .iter()
                .map(|&v| if v.is_finite() { v } else { 0.0 })
                .collect(),
            channel_max: self
                .channel_max
                .iter()
                .map(|&v| if v.is_finite() { v } else { 0.0 })
                .collect(),
            channel_mean,
            histogram,
            count: self.count,
        }
    }
}

/// Convenience: statistics of a single in-memory tensor
pub fn stats_of(values: &[f32], num_channels: usize) -> TensorStats {
    let mut collector = StatsCollector::new(num_channels);
    collector.observe(values);
    collector.compute()
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
        #![proptest_config(proptest::test_runner::Config::with_cases(100))]

        /// Multi-batch accumulation matches single-batch observation
        #[test]
        fn prop_multi_batch_accumulates(
            batch1 in prop::collection::vec(-5.0f32..5.0, 2..32),
            batch2 in prop::collection::vec(-10.0f32..10.0, 2..32),
        ) {
            let mut collector = StatsCollector::new(1);
            collector.observe(&batch1);
            collector.observe(&batch2);
            let stats = collector.compute();

            let all: Vec<f32> = batch1.iter().chain(batch2.iter()).copied().collect();
            let expected_min = all.iter().copied().fold(f32::INFINITY, f32::min);
            let expected_max = all.iter().copied().fold(f32::NEG_INFINITY, f32::max);

            prop_assert!((stats.min - expected_min).abs() < 1e-6);
            prop_assert!((stats.max - expected_max).abs() < 1e-6);
            prop_assert_eq!(stats.count, all.len());
        }

        /// max_abs is a bound on every observed value
        #[test]
        fn prop_max_abs_bounds_values(
            values in prop::collection::vec(-100.0f32..100.0, 1..64),
        ) {
            let stats = stats_of(&values, 1);
            for &v in &values {
                prop_assert!(v.abs() <= stats.max_abs() + 1e-6);
            }
        }
    }

    // ========================================================================
    // UNIT TESTS
    // ========================================================================

    #[test]
    fn test_per_channel_extrema() {
        // Two columns: [1, 100], [-2, 50]
        let values = vec![1.0, 100.0, -2.0, 50.0];
        let stats = stats_of(&values, 2);

        assert_abs_diff_eq!(stats.channel_min[0], -2.0);
        assert_abs_diff_eq!(stats.channel_max[0], 1.0);
        assert_abs_diff_eq!(stats.channel_max[1], 100.0);
        assert_abs_diff_eq!(stats.channel_max_abs(0), 2.0);
    }

    #[test]
    fn test_channel_mean() {
        let values = vec![1.0, 10.0, 3.0, 30.0];
        let stats = stats_of(&values, 2);

        assert_abs_diff_eq!(stats.channel_mean[0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(stats.channel_mean[1], 20.0, epsilon = 1e-6);
    }

    #[test]
    fn test_all_zero_tensor_floored() {
        let stats = stats_of(&[0.0; 32], 1);
        assert!(stats.max_abs() > 0.0);
        assert_abs_diff_eq!(stats.max_abs(), THRESHOLD_EPS, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_collector() {
        let collector = StatsCollector::new(1);
        assert!(!collector.has_data());
        let stats = collector.compute();
        assert_eq!(stats.count, 0);
    }
}
