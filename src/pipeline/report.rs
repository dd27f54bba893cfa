//! Quantization report and telemetry sinks

use crate::error::{Error, Result};
use crate::gptq::FineTuneResult;
use crate::graph::{FrameworkInfo, Graph, OpKind};
use crate::mixed_precision::{candidate_cost, Allocation, ResourceCost};
use crate::qconfig::{QuantMethod, Thresholds};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Final quantization decisions for one node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeReport {
    pub name: String,
    pub op: OpKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_bits: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_method: Option<QuantMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_thresholds: Option<Thresholds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_bits: Option<u8>,
    pub activation_shift: f32,
}

/// Outcome summary of the mixed-precision stage
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub distortion: f64,
    pub total_bits: u32,
}

impl From<&Allocation> for AllocationSummary {
    fn from(a: &Allocation) -> Self {
        Self {
            distortion: a.distortion,
            total_bits: a.total_bits,
        }
    }
}

/// Outcome summary of the fine-tuning stage
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FineTuneSummary {
    pub iterations_run: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_loss: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_loss: Option<f32>,
    pub stopped_early: bool,
}

impl From<&FineTuneResult> for FineTuneSummary {
    fn from(r: &FineTuneResult) -> Self {
        Self {
            iterations_run: r.iterations_run,
            initial_loss: r.initial_loss,
            final_loss: r.final_loss,
            stopped_early: r.stopped_early,
        }
    }
}

/// Emitted record of one pipeline run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuantizationReport {
    pub nodes: Vec<NodeReport>,
    /// Aggregated cost of the final configuration
    pub resource_totals: ResourceCost,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixed_precision: Option<AllocationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fine_tune: Option<FineTuneSummary>,
}

impl QuantizationReport {
    /// Snapshot the graph's committed configuration
    pub fn from_graph(
        graph: &Graph,
        info: &FrameworkInfo,
        allocation: Option<&Allocation>,
        fine_tune: Option<&FineTuneResult>,
    ) -> Self {
        let mut totals = ResourceCost::zero();
        let mut nodes = Vec::with_capacity(graph.len());

        for node in graph.nodes() {
            let weighted = info.is_weighted(node.op) && node.weight.is_some();
            let w = &node.qconfig.weights;
            let a = &node.qconfig.activation;

            if weighted && w.enabled {
                totals = totals.plus(&candidate_cost(graph, node.id, w.bits));
            }

            nodes.push(NodeReport {
                name: node.name.clone(),
                op: node.op,
                weight_bits: (weighted && w.enabled).then_some(w.bits),
                weight_method: (weighted && w.enabled).then_some(w.method),
                weight_thresholds: (weighted && w.enabled)
                    .then(|| w.thresholds().cloned())
                    .flatten(),
                activation_bits: a.enabled.then_some(a.bits),
                activation_shift: node.qconfig.activation_shift,
            });
        }

        Self {
            nodes,
            resource_totals: totals,
            mixed_precision: allocation.map(AllocationSummary::from),
            fine_tune: fine_tune.map(FineTuneSummary::from),
        }
    }
}

/// Destination for emitted reports
pub trait TelemetrySink {
    fn emit(&mut self, report: &QuantizationReport) -> Result<()>;
}

/// Writes the report as pretty-printed JSON to a file
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TelemetrySink for JsonFileSink {
    fn emit(&mut self, report: &QuantizationReport) -> Result<()> {
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Discards every report; default when no sink is configured
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&mut self, _report: &QuantizationReport) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn quantized_graph() -> Graph {
        let mut g = Graph::new();
        let input = g.add_input("input", 2);
        let d = g
            .add_dense("fc", input, arr2(&[[1.0, 0.0], [0.0, 1.0]]), arr1(&[0.0, 0.0]))
            .unwrap();
        g.set_output(d).unwrap();
        g.node_mut(d).qconfig.weights.scheme =
            Some(crate::qconfig::QuantScheme::symmetric(1.0));
        g
    }

    #[test]
    fn test_report_snapshot() {
        let g = quantized_graph();
        let info = FrameworkInfo::default();
        let report = QuantizationReport::from_graph(&g, &info, None, None);

        assert_eq!(report.nodes.len(), 2);
        let fc = &report.nodes[1];
        assert_eq!(fc.name, "fc");
        assert_eq!(fc.weight_bits, Some(8));
        assert!(fc.weight_thresholds.is_some());
        // 4 params at 8 bits
        assert_eq!(report.resource_totals.weights_memory, 4.0);
        // Input node carries no weights
        assert!(report.nodes[0].weight_bits.is_none());
    }

    #[test]
    fn test_json_file_sink_round_trip() {
        let g = quantized_graph();
        let info = FrameworkInfo::default();
        let report = QuantizationReport::from_graph(&g, &info, None, None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut sink = JsonFileSink::new(&path);
        sink.emit(&report).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back: QuantizationReport = serde_json::from_str(&text).unwrap();
        assert_eq!(back.nodes.len(), report.nodes.len());
        assert_eq!(back.resource_totals, report.resource_totals);
    }
}
