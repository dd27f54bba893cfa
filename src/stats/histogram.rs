//! Fixed-bin value histogram

use serde::{Deserialize, Serialize};

/// Default bin count for activation histograms
pub const DEFAULT_BINS: usize = 512;

/// Fixed-width histogram over an observed value range
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Histogram {
    min: f32,
    bin_width: f32,
    counts: Vec<f64>,
}

impl Histogram {
    /// Build a histogram of `values` over `[min, max]` with `bins` bins
    ///
    /// A degenerate range (max <= min) produces a single bin holding all mass.
    pub fn build(values: impl Iterator<Item = f32>, min: f32, max: f32, bins: usize) -> Self {
        let bins = bins.max(1);
        let range = max - min;
        if range <= 0.0 {
            let mut h = Self {
                min,
                bin_width: 1.0,
                counts: vec![0.0],
            };
            h.counts[0] = values.count() as f64;
            return h;
        }

        let bin_width = range / bins as f32;
        let mut counts = vec![0.0f64; bins];
        for v in values {
            let idx = (((v - min) / bin_width) as usize).min(bins - 1);
            counts[idx] += 1.0;
        }
        Self {
            min,
            bin_width,
            counts,
        }
    }

    /// Number of bins
    pub fn num_bins(&self) -> usize {
        self.counts.len()
    }

    /// Center value of bin `i`
    pub fn center(&self, i: usize) -> f32 {
        self.min + (i as f32 + 0.5) * self.bin_width
    }

    /// Mass of bin `i`
    pub fn count(&self, i: usize) -> f64 {
        self.counts[i]
    }

    /// Total observed mass
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Iterate (center, count) pairs
    pub fn iter(&self) -> impl Iterator<Item = (f32, f64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .map(|(i, &c)| (self.center(i), c))
    }
}
