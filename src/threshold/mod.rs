//! Threshold selection
//!
//! Converts observed float ranges to fixed-point grids: a bounded 1-D search
//! over candidate thresholds minimizing a configurable error criterion
//! (MSE, MAE, Lp, KL divergence, or no-clipping full range), per-tensor or
//! per-output-channel, with optional power-of-two snapping and
//! shift-negative range correction.

mod metrics;
mod selector;

pub use metrics::{histogram_error, slice_error, ErrorMetric};
pub use selector::{
    search_histogram_threshold, search_threshold, select_activation_scheme,
    select_weight_scheme,
};
