//! Candidate bit-width configurations

use super::kpi::ResourceCost;
use crate::graph::{Graph, NodeId};
use serde::{Deserialize, Serialize};

/// One (node, bit-width) pairing considered by the solver
///
/// Immutable once scored: the distortion comes from the sensitivity report,
/// the cost from the resource model below.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CandidateConfig {
    pub node: NodeId,
    pub bits: u8,
    /// Model-output distortion when only this node runs at `bits`
    pub distortion: f64,
    pub cost: ResourceCost,
}

/// Resource model: cost of running one node at one bit-width
///
/// Weight memory scales with parameter count, activation memory with the
/// node's output width, and BOPS with MACs times bits squared (weights and
/// activations share the node's bit-width).
pub fn candidate_cost(graph: &Graph, node: NodeId, bits: u8) -> ResourceCost {
    let n = graph.node(node);
    let bits = bits as f64;
    ResourceCost {
        weights_memory: n.num_weight_params() as f64 * bits / 8.0,
        activation_memory: n.out_width as f64 * bits / 8.0,
        bops: n.macs() as f64 * bits * bits,
    }
}
