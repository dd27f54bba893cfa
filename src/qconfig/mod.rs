//! Quantization configuration data model
//!
//! Tagged schemes (symmetric, power-of-two, uniform, lookup-table) plus the
//! per-tensor and per-node configuration the pipeline mutates as thresholds
//! and bit-widths are committed.

mod config;
mod scheme;

pub use config::{NodeQuantConfig, QuantMethod, TensorQuantConfig, MAX_BITS, MIN_BITS};
pub use scheme::{
    next_power_of_two, symmetric_step, QuantScheme, Thresholds, THRESHOLD_EPS,
};
