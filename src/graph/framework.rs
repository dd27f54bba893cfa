//! Host framework operation taxonomy

use super::node::OpKind;
use crate::qconfig::{NodeQuantConfig, TensorQuantConfig};
use std::collections::BTreeSet;

/// Static description of the host framework's operation semantics
///
/// Shared read-only by every pipeline stage: which ops carry weights, which
/// are eligible for shift-negative range correction, and the per-op default
/// quantization settings. The channel axis convention is fixed: output
/// channels are weight columns.
#[derive(Clone, Debug)]
pub struct FrameworkInfo {
    weighted_ops: BTreeSet<OpKind>,
    shift_eligible_ops: BTreeSet<OpKind>,
    default_bits: u8,
}

impl FrameworkInfo {
    /// Taxonomy with the given default bit-width
    pub fn with_default_bits(default_bits: u8) -> Self {
        Self {
            weighted_ops: BTreeSet::from([OpKind::Dense]),
            shift_eligible_ops: BTreeSet::from([OpKind::Dense, OpKind::Add]),
            default_bits,
        }
    }

    /// Whether this op kind carries quantizable weights
    pub fn is_weighted(&self, op: OpKind) -> bool {
        self.weighted_ops.contains(&op)
    }

    /// Whether shift-negative correction may recenter this op's output range
    pub fn is_shift_eligible(&self, op: OpKind) -> bool {
        self.shift_eligible_ops.contains(&op)
    }

    /// Default bit-width before any search or override
    pub fn default_bits(&self) -> u8 {
        self.default_bits
    }

    /// Default quantization config for an op kind
    ///
    /// Weighted ops quantize weights per-channel and activations per-tensor;
    /// inputs and pure activations only quantize their output.
    pub fn default_config(&self, op: OpKind) -> NodeQuantConfig {
        let mut cfg = NodeQuantConfig::with_bits(self.default_bits);
        if self.is_weighted(op) {
            cfg.weights.per_channel = true;
        } else {
            cfg.weights = TensorQuantConfig::disabled();
        }
        cfg
    }
}

impl Default for FrameworkInfo {
    fn default() -> Self {
        Self::with_default_bits(8)
    }
}
