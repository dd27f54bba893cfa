//! Directed acyclic graph with arena-allocated nodes

use super::framework::FrameworkInfo;
use super::node::{Node, NodeId, OpKind};
use crate::error::{Error, Result};
use crate::qconfig::{NodeQuantConfig, QuantScheme};
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;

/// Computational graph: exclusive owner of its nodes
///
/// Nodes are arena-allocated and referenced by index. Edges always point to
/// earlier indices, so insertion order is a topological order and cycles are
/// unrepresentable.
#[derive(Clone, Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    output: Option<NodeId>,
}

impl Graph {
    /// Empty graph
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            output: None,
        }
    }

    fn push(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        self.nodes.push(node);
        id
    }

    fn check_input(&self, id: NodeId) -> Result<()> {
        if id.0 >= self.nodes.len() {
            return Err(Error::Graph(format!("input {id} does not exist yet")));
        }
        Ok(())
    }

    /// Add a graph input of the given feature width
    pub fn add_input(&mut self, name: &str, width: usize) -> NodeId {
        self.push(Node {
            id: NodeId(0),
            name: name.to_string(),
            op: OpKind::Input,
            inputs: vec![],
            out_width: width,
            weight: None,
            bias: None,
            qconfig: NodeQuantConfig::default(),
        })
    }

    /// Add a dense layer `x · W + b`
    pub fn add_dense(
        &mut self,
        name: &str,
        input: NodeId,
        weight: Array2<f32>,
        bias: Array1<f32>,
    ) -> Result<NodeId> {
        self.check_input(input)?;
        let in_width = self.nodes[input.0].out_width;
        if weight.nrows() != in_width || bias.len() != weight.ncols() {
            return Err(Error::ShapeMismatch {
                expected: vec![in_width, bias.len()],
                got: vec![weight.nrows(), weight.ncols()],
            });
        }
        let out_width = weight.ncols();
        Ok(self.push(Node {
            id: NodeId(0),
            name: name.to_string(),
            op: OpKind::Dense,
            inputs: vec![input],
            out_width,
            weight: Some(weight),
            bias: Some(bias),
            qconfig: NodeQuantConfig::default(),
        }))
    }

    /// Add a ReLU activation
    pub fn add_relu(&mut self, name: &str, input: NodeId) -> Result<NodeId> {
        self.check_input(input)?;
        let out_width = self.nodes[input.0].out_width;
        Ok(self.push(Node {
            id: NodeId(0),
            name: name.to_string(),
            op: OpKind::Relu,
            inputs: vec![input],
            out_width,
            weight: None,
            bias: None,
            qconfig: NodeQuantConfig::default(),
        }))
    }

    /// Add an element-wise sum of two nodes
    pub fn add_add(&mut self, name: &str, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.check_input(a)?;
        self.check_input(b)?;
        let wa = self.nodes[a.0].out_width;
        let wb = self.nodes[b.0].out_width;
        if wa != wb {
            return Err(Error::ShapeMismatch {
                expected: vec![wa],
                got: vec![wb],
            });
        }
        Ok(self.push(Node {
            id: NodeId(0),
            name: name.to_string(),
            op: OpKind::Add,
            inputs: vec![a, b],
            out_width: wa,
            weight: None,
            bias: None,
            qconfig: NodeQuantConfig::default(),
        }))
    }

    /// Mark the graph output
    pub fn set_output(&mut self, id: NodeId) -> Result<()> {
        self.check_input(id)?;
        self.output = Some(id);
        Ok(())
    }

    /// Graph output node
    pub fn output(&self) -> Result<NodeId> {
        self.output
            .ok_or_else(|| Error::Graph("no output node set".into()))
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Topological order (insertion order, by construction)
    pub fn topo_order(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Immutable node access
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Mutable node access
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Iterate nodes in topological order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Iterate nodes mutably
    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    /// Nodes carrying quantizable weights under the given taxonomy
    pub fn weighted_nodes(&self, info: &FrameworkInfo) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| info.is_weighted(n.op) && n.weight.is_some())
            .map(|n| n.id)
            .collect()
    }

    /// Float forward pass: activations of every node
    pub fn forward(&self, x: &Array2<f32>) -> Result<BTreeMap<NodeId, Array2<f32>>> {
        self.run(x, false)
    }

    /// Quantized forward pass honoring each node's committed config
    pub fn forward_quantized(&self, x: &Array2<f32>) -> Result<BTreeMap<NodeId, Array2<f32>>> {
        self.run(x, true)
    }

    fn run(&self, x: &Array2<f32>, quantized: bool) -> Result<BTreeMap<NodeId, Array2<f32>>> {
        self.output()?;
        let mut acts: BTreeMap<NodeId, Array2<f32>> = BTreeMap::new();

        for node in &self.nodes {
            let mut out = match node.op {
                OpKind::Input => {
                    if x.ncols() != node.out_width {
                        return Err(Error::ShapeMismatch {
                            expected: vec![node.out_width],
                            got: vec![x.ncols()],
                        });
                    }
                    x.clone()
                }
                OpKind::Dense => {
                    let input = &acts[&node.inputs[0]];
                    let weight = node.weight.as_ref().expect("dense node has weight");
                    let bias = node.bias.as_ref().expect("dense node has bias");
                    let w = if quantized {
                        self.effective_weight(node, weight)
                    } else {
                        weight.clone()
                    };
                    input.dot(&w) + &bias.clone().insert_axis(ndarray::Axis(0))
                }
                OpKind::Relu => acts[&node.inputs[0]].mapv(|v| v.max(0.0)),
                OpKind::Add => &acts[&node.inputs[0]] + &acts[&node.inputs[1]],
            };

            if quantized {
                out = self.quantize_activation(node, out);
            }
            acts.insert(node.id, out);
        }
        Ok(acts)
    }

    /// Weight tensor with the committed quantization applied
    fn effective_weight(&self, node: &Node, weight: &Array2<f32>) -> Array2<f32> {
        let cfg = &node.qconfig.weights;
        match (&cfg.scheme, cfg.enabled) {
            (Some(scheme), true) => {
                quantize_array(weight, scheme, cfg.bits, weight.ncols())
            }
            _ => weight.clone(),
        }
    }

    fn quantize_activation(&self, node: &Node, out: Array2<f32>) -> Array2<f32> {
        let cfg = &node.qconfig.activation;
        match (&cfg.scheme, cfg.enabled) {
            (Some(scheme), true) => {
                let shift = node.qconfig.activation_shift;
                let shifted = out.mapv(|v| v + shift);
                let q = quantize_array(&shifted, scheme, cfg.bits, out.ncols());
                q.mapv(|v| v - shift)
            }
            _ => out,
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// Quantize-dequantize a 2-D array with the column channel convention
pub fn quantize_array(
    a: &Array2<f32>,
    scheme: &QuantScheme,
    bits: u8,
    num_channels: usize,
) -> Array2<f32> {
    let flat: Vec<f32> = a.iter().copied().collect();
    let q = scheme.apply(&flat, bits, num_channels);
    Array2::from_shape_vec(a.raw_dim(), q).expect("quantized array keeps shape")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qconfig::Thresholds;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    fn two_layer_graph() -> (Graph, NodeId, NodeId) {
        let mut g = Graph::new();
        let input = g.add_input("input", 2);
        let d1 = g
            .add_dense(
                "fc1",
                input,
                arr2(&[[1.0, 0.0], [0.0, 1.0]]),
                arr1(&[0.0, 0.0]),
            )
            .unwrap();
        let r = g.add_relu("relu1", d1).unwrap();
        let d2 = g
            .add_dense("fc2", r, arr2(&[[0.5], [0.5]]), arr1(&[0.1]))
            .unwrap();
        g.set_output(d2).unwrap();
        (g, d1, d2)
    }

    #[test]
    fn test_forward_float() {
        let (g, _, d2) = two_layer_graph();
        let acts = g.forward(&arr2(&[[1.0, 2.0]])).unwrap();

        // relu(x·I) = [1, 2] → ·[0.5, 0.5] + 0.1 = 1.6
        assert_abs_diff_eq!(acts[&d2][[0, 0]], 1.6, epsilon = 1e-6);
    }

    #[test]
    fn test_forward_quantized_without_schemes_matches_float() {
        let (g, _, d2) = two_layer_graph();
        let x = arr2(&[[1.0, 2.0]]);

        // No scheme committed yet: quantized run degrades to float
        let f = g.forward(&x).unwrap();
        let q = g.forward_quantized(&x).unwrap();
        assert_abs_diff_eq!(f[&d2][[0, 0]], q[&d2][[0, 0]], epsilon = 1e-6);
    }

    #[test]
    fn test_forward_quantized_applies_weight_scheme() {
        let (mut g, d1, _) = two_layer_graph();
        g.node_mut(d1).qconfig.weights.scheme = Some(QuantScheme::Symmetric {
            threshold: Thresholds::PerTensor(1.0),
        });
        g.node_mut(d1).qconfig.weights.bits = 2;

        let x = arr2(&[[0.3, 0.3]]);
        let q = g.forward_quantized(&x).unwrap();
        let f = g.forward(&x).unwrap();

        // 2-bit grid (step 0.5) perturbs the identity weights' effect
        let out = g.output().unwrap();
        assert!((q[&out][[0, 0]] - f[&out][[0, 0]]).abs() > 1e-6);
    }

    #[test]
    fn test_shape_validation() {
        let mut g = Graph::new();
        let input = g.add_input("input", 3);
        let err = g.add_dense("bad", input, arr2(&[[1.0], [1.0]]), arr1(&[0.0]));
        assert!(matches!(err, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_add_requires_matching_widths() {
        let mut g = Graph::new();
        let a = g.add_input("a", 2);
        let b = g.add_input("b", 3);
        assert!(g.add_add("sum", a, b).is_err());
    }

    #[test]
    fn test_forward_without_output_fails() {
        let mut g = Graph::new();
        g.add_input("input", 2);
        assert!(g.forward(&arr2(&[[0.0, 0.0]])).is_err());
    }

    #[test]
    fn test_weighted_nodes() {
        let (g, d1, d2) = two_layer_graph();
        let info = FrameworkInfo::default();
        assert_eq!(g.weighted_nodes(&info), vec![d1, d2]);
    }

    #[test]
    fn test_add_op_forward() {
        let mut g = Graph::new();
        let input = g.add_input("input", 2);
        let r = g.add_relu("relu", input).unwrap();
        let s = g.add_add("sum", input, r).unwrap();
        g.set_output(s).unwrap();

        let acts = g.forward(&arr2(&[[-1.0, 2.0]])).unwrap();
        // relu(-1)=0, relu(2)=2 → sum = [-1, 4]
        assert_abs_diff_eq!(acts[&s][[0, 0]], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(acts[&s][[0, 1]], 4.0, epsilon = 1e-6);
    }
}
