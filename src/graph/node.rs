//! Graph nodes

use crate::qconfig::NodeQuantConfig;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Arena index of a node within its graph
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Operation performed by a node
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// Graph input placeholder
    Input,
    /// Fully-connected layer: `x · W + b`
    Dense,
    /// ReLU activation
    Relu,
    /// Element-wise sum of two inputs
    Add,
}

/// One operation in the computational graph
///
/// Weighted nodes own their weight (`[in, out]`) and bias (`[out]`) tensors;
/// the quantization config is mutated by the threshold selector, the
/// bit-allocation solver, and the graph editor.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op: OpKind,
    /// Ordered input edges (always earlier node ids)
    pub inputs: Vec<NodeId>,
    /// Output feature width
    pub out_width: usize,
    pub weight: Option<Array2<f32>>,
    pub bias: Option<Array1<f32>>,
    pub qconfig: NodeQuantConfig,
}

impl Node {
    /// Number of weight parameters (0 for unweighted ops)
    pub fn num_weight_params(&self) -> usize {
        self.weight.as_ref().map_or(0, Array2::len)
    }

    /// Multiply-accumulate count for one sample
    pub fn macs(&self) -> usize {
        match self.op {
            OpKind::Dense => self.weight.as_ref().map_or(0, |w| w.nrows() * w.ncols()),
            _ => 0,
        }
    }
}
