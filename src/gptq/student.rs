//! Differentiable student model
//!
//! Shadow copy of the graph's quantized parameters as autograd tensors. The
//! float weights stay the canonical trainable storage; the forward pass
//! routes them through the straight-through fake-quantize op so the student
//! computes with grid values while gradients reach the float weights (and,
//! when enabled, the quantization step sizes).

use super::GradientPtqConfig;
use crate::autograd::{add, add_bias, fake_quantize, matmul, relu, Tensor};
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId, OpKind};
use crate::qconfig::Thresholds;
use ndarray::{Array1, Array2, Axis};
use std::collections::BTreeMap;

struct NodeSlots {
    node: NodeId,
    bits: u8,
    weight_idx: usize,
    bias_idx: usize,
    scale_idx: usize,
}

/// Trainable shadow of every quantized weighted node
pub struct StudentModel {
    tensors: Vec<Tensor>,
    slots: Vec<NodeSlots>,
}

impl StudentModel {
    /// Build shadow parameters from the graph's committed configuration
    ///
    /// Every enabled weighted node must already carry a committed scheme;
    /// fine-tuning without thresholds is a pipeline-ordering bug surfaced
    /// here as a configuration error.
    pub fn new(graph: &Graph, config: &GradientPtqConfig) -> Result<Self> {
        let mut tensors = Vec::new();
        let mut slots = Vec::new();

        for node in graph.nodes() {
            let (weight, bias) = match (&node.weight, &node.bias) {
                (Some(w), Some(b)) => (w, b),
                _ => continue,
            };
            let cfg = &node.qconfig.weights;
            if !cfg.enabled {
                continue;
            }
            let scheme = cfg.scheme.as_ref().ok_or_else(|| {
                Error::Config(format!(
                    "node {} has no committed threshold; run calibration before fine-tuning",
                    node.name
                ))
            })?;

            let steps = scheme.steps(cfg.bits);
            let scale = if steps.len() == 1 {
                Tensor::scalar(steps[0], config.train_thresholds)
            } else {
                Tensor::from_vec(steps, config.train_thresholds)
            };

            let weight_idx = tensors.len();
            tensors.push(Tensor::new(weight.clone(), true));
            let bias_idx = tensors.len();
            tensors.push(Tensor::from_row(bias, config.train_bias));
            let scale_idx = tensors.len();
            tensors.push(scale);

            slots.push(NodeSlots {
                node: node.id,
                bits: cfg.bits,
                weight_idx,
                bias_idx,
                scale_idx,
            });
        }
        Ok(Self { tensors, slots })
    }

    /// Number of shadowed nodes
    pub fn num_nodes(&self) -> usize {
        self.slots.len()
    }

    /// All shadow tensors, trainable or frozen
    pub fn tensors_mut(&mut self) -> &mut [Tensor] {
        &mut self.tensors
    }

    fn slot_for(&self, id: NodeId) -> Option<&NodeSlots> {
        self.slots.iter().find(|s| s.node == id)
    }

    /// Forward pass through the graph with fake-quantized shadow weights
    ///
    /// Activations of unshadowed nodes use the graph's float parameters.
    pub fn forward(&self, graph: &Graph, x: &Array2<f32>) -> Result<BTreeMap<NodeId, Tensor>> {
        graph.output()?;
        let mut acts: BTreeMap<NodeId, Tensor> = BTreeMap::new();

        for node in graph.nodes() {
            let out = match node.op {
                OpKind::Input => {
                    if x.ncols() != node.out_width {
                        return Err(Error::ShapeMismatch {
                            expected: vec![node.out_width],
                            got: vec![x.ncols()],
                        });
                    }
                    Tensor::new(x.clone(), false)
                }
                OpKind::Dense => {
                    let input = &acts[&node.inputs[0]];
                    match self.slot_for(node.id) {
                        Some(slot) => {
                            let qmin = -(1i32 << (slot.bits - 1));
                            let qmax = (1i32 << (slot.bits - 1)) - 1;
                            let w_q = fake_quantize(
                                &self.tensors[slot.weight_idx],
                                &self.tensors[slot.scale_idx],
                                qmin,
                                qmax,
                            );
                            add_bias(&matmul(input, &w_q), &self.tensors[slot.bias_idx])
                        }
                        None => {
                            let w = node.weight.as_ref().expect("dense node has weight");
                            let b = node.bias.as_ref().expect("dense node has bias");
                            let w = Tensor::new(w.clone(), false);
                            let b = Tensor::from_row(b, false);
                            add_bias(&matmul(input, &w), &b)
                        }
                    }
                }
                OpKind::Relu => relu(&acts[&node.inputs[0]]),
                OpKind::Add => add(&acts[&node.inputs[0]], &acts[&node.inputs[1]]),
            };
            acts.insert(node.id, out);
        }
        Ok(acts)
    }

    /// Write trained parameters back into the graph
    ///
    /// Float weights and biases land in the node tensors; trained step sizes
    /// become updated thresholds on the committed schemes.
    pub fn finalize(self, graph: &mut Graph, config: &GradientPtqConfig) {
        for slot in &self.slots {
            let node = graph.node_mut(slot.node);
            node.weight = Some(self.tensors[slot.weight_idx].data().clone());

            if config.train_bias {
                let bias: Array1<f32> = self.tensors[slot.bias_idx]
                    .data()
                    .index_axis(Axis(0), 0)
                    .to_owned();
                node.bias = Some(bias);
            }

            if config.train_thresholds {
                let scale = &self.tensors[slot.scale_idx];
                let factor = (1u32 << (slot.bits - 1)) as f32;
                let thresholds = if scale.len() == 1 {
                    Thresholds::PerTensor(scale.item() * factor)
                } else {
                    Thresholds::PerChannel(
                        scale.data().iter().map(|&s| s * factor).collect(),
                    )
                }
                .floored();
                if let Some(scheme) = node.qconfig.weights.scheme.as_mut() {
                    scheme.set_thresholds(thresholds);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd;
    use crate::autograd::mse_against;
    use crate::qconfig::QuantScheme;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    fn calibrated_graph() -> (Graph, NodeId) {
        let mut g = Graph::new();
        let input = g.add_input("input", 2);
        let d = g
            .add_dense(
                "fc",
                input,
                arr2(&[[0.4, -0.2], [0.1, 0.3]]),
                arr1(&[0.0, 0.1]),
            )
            .unwrap();
        g.set_output(d).unwrap();
        g.node_mut(d).qconfig.weights.scheme = Some(QuantScheme::symmetric(0.5));
        (g, d)
    }

    #[test]
    fn test_requires_committed_scheme() {
        let (mut g, d) = calibrated_graph();
        g.node_mut(d).qconfig.weights.scheme = None;
        let cfg = GradientPtqConfig::default();
        assert!(matches!(
            StudentModel::new(&g, &cfg),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_forward_matches_quantized_graph() {
        let (g, d) = calibrated_graph();
        let cfg = GradientPtqConfig::default();
        let student = StudentModel::new(&g, &cfg).unwrap();

        let x = arr2(&[[1.0, -0.5]]);
        let student_acts = student.forward(&g, &x).unwrap();
        let graph_acts = g.forward_quantized(&x).unwrap();

        for (a, b) in student_acts[&d].data().iter().zip(graph_acts[&d].iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_gradients_reach_float_weights() {
        let (g, d) = calibrated_graph();
        let cfg = GradientPtqConfig::default();
        let mut student = StudentModel::new(&g, &cfg).unwrap();

        let x = arr2(&[[1.0, -0.5]]);
        let target = arr2(&[[0.0, 0.0]]);
        let acts = student.forward(&g, &x).unwrap();
        let mut loss = mse_against(&acts[&d], &target, 1.0);
        autograd::backward(&mut loss, None);

        let weight_grad = student.tensors_mut()[0].grad();
        assert!(weight_grad.is_some());
        assert!(weight_grad.unwrap().iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_finalize_writes_back_weights_and_thresholds() {
        let (mut g, d) = calibrated_graph();
        let mut cfg = GradientPtqConfig::default();
        cfg.train_thresholds = true;
        let mut student = StudentModel::new(&g, &cfg).unwrap();

        // Simulate a training step
        *student.tensors_mut()[0].data_mut() = arr2(&[[0.1, 0.1], [0.1, 0.1]]);
        *student.tensors_mut()[2].data_mut() = arr2(&[[0.01]]);

        student.finalize(&mut g, &cfg);
        assert_abs_diff_eq!(g.node(d).weight.as_ref().unwrap()[[0, 0]], 0.1);
        // Threshold = step * 2^(bits-1) = 0.01 * 128 at the default 8 bits
        match g.node(d).qconfig.weights.thresholds().unwrap() {
            Thresholds::PerTensor(t) => assert_abs_diff_eq!(*t, 1.28, epsilon = 1e-6),
            other => panic!("unexpected thresholds {other:?}"),
        }
    }

    #[test]
    fn test_unquantized_node_not_shadowed() {
        let (mut g, d) = calibrated_graph();
        g.node_mut(d).qconfig.weights.enabled = false;
        let cfg = GradientPtqConfig::default();
        let student = StudentModel::new(&g, &cfg).unwrap();
        assert_eq!(student.num_nodes(), 0);
    }
}
