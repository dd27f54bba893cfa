//! Per-node sensitivity analysis
//!
//! Scores how much model-output distortion each (node, bit-width) choice
//! introduces on its own: one node is reconfigured at a time, the graph is
//! run over the representative sample, and the output distance to the
//! all-baseline run is recorded. The isolation keeps the resulting matrix
//! decomposable, which is what lets the bit-allocation solver treat the
//! total distortion as a sum of independent per-node terms.

use crate::data::{materialize, RepresentativeDataset};
use crate::error::Result;
use crate::graph::{FrameworkInfo, Graph, NodeId};
use crate::threshold::select_weight_scheme;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Distance between baseline and perturbed model outputs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Mean squared error
    #[default]
    Mse,
    /// Mean absolute error
    Mae,
}

impl DistanceMetric {
    fn between(&self, a: &Array2<f32>, b: &Array2<f32>) -> f64 {
        let n = a.len().max(1) as f64;
        match self {
            DistanceMetric::Mse => a
                .iter()
                .zip(b.iter())
                .map(|(&x, &y)| ((x - y) as f64).powi(2))
                .sum::<f64>()
                .max(0.0)
                / n,
            DistanceMetric::Mae => a
                .iter()
                .zip(b.iter())
                .map(|(&x, &y)| ((x - y) as f64).abs())
                .sum::<f64>()
                / n,
        }
    }
}

/// Mapping from (node, bit-width) to scalar output distortion
///
/// Built once per search run, read-only input to the solver.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SensitivityReport {
    scores: BTreeMap<(NodeId, u8), f64>,
}

impl SensitivityReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeId, bits: u8, distortion: f64) {
        self.scores.insert((node, bits), distortion);
    }

    pub fn get(&self, node: NodeId, bits: u8) -> Option<f64> {
        self.scores.get(&(node, bits)).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Entries in (node, bits) order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, u8, f64)> + '_ {
        self.scores.iter().map(|(&(n, b), &d)| (n, b, d))
    }
}

/// Score every (weighted node, candidate bit-width) pair in isolation
///
/// The baseline run uses the graph's current configuration; each candidate
/// evaluation quantizes only that node's weights at the candidate bit-width
/// with a freshly searched threshold, then restores the node's original
/// configuration before moving on. Restoring makes the scores independent of
/// evaluation order.
///
/// An empty representative sample is a configuration error, never an
/// all-zero report.
pub fn analyze(
    graph: &mut Graph,
    info: &FrameworkInfo,
    dataset: &mut dyn RepresentativeDataset,
    candidate_bits: &[u8],
    distance: DistanceMetric,
) -> Result<SensitivityReport> {
    let batches = materialize(dataset)?;
    let output = graph.output()?;

    let baseline: Vec<Array2<f32>> = batches
        .iter()
        .map(|x| graph.forward_quantized(x).map(|acts| acts[&output].clone()))
        .collect::<Result<_>>()?;

    let mut report = SensitivityReport::new();
    for id in graph.weighted_nodes(info) {
        let original = graph.node(id).qconfig.clone();
        for &bits in candidate_bits {
            configure_candidate(graph, id, bits);
            let mut total = 0.0;
            for (x, base) in batches.iter().zip(&baseline) {
                let acts = graph.forward_quantized(x)?;
                total += distance.between(&acts[&output], base);
            }
            report.insert(id, bits, total / batches.len() as f64);
            graph.node_mut(id).qconfig = original.clone();
        }
    }
    Ok(report)
}

/// Point one node's configuration at the candidate bit-width
///
/// Weights get a scheme fit for exactly that width. The activation half moves
/// with the node too: committed activation thresholds stay, only the grid
/// step follows the candidate, so the score reflects what committing the
/// candidate to the node would actually do.
fn configure_candidate(graph: &mut Graph, id: NodeId, bits: u8) {
    let node = graph.node(id);
    let weight = match node.weight.as_ref() {
        Some(w) => w,
        None => return,
    };
    let flat: Vec<f32> = weight.iter().copied().collect();
    let num_channels = weight.ncols();

    let mut cfg = node.qconfig.weights.clone();
    cfg.enabled = true;
    cfg.bits = bits;
    cfg.scheme = Some(select_weight_scheme(&flat, num_channels, &cfg));

    let node = graph.node_mut(id);
    node.qconfig.weights = cfg;
    if node.qconfig.activation.enabled && node.qconfig.activation.scheme.is_some() {
        node.qconfig.activation.bits = bits;
    }
}
