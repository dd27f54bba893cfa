//! Pipeline orchestration
//!
//! Stage order: graph preparation (framework defaults + editor rules) →
//! eager validation → statistics collection → threshold calibration →
//! optional mixed-precision allocation (then re-calibration at the final
//! bit-widths) → bias correction → optional gradient fine-tuning → report.

use super::config::PipelineConfig;
use super::report::{NullSink, QuantizationReport, TelemetrySink};
use crate::data::{materialize, RepresentativeDataset};
use crate::error::{Error, Result};
use crate::gptq::{FineTuneResult, GptqTrainer};
use crate::graph::{apply_rules, quantize_array, FrameworkInfo, Graph, NodeId};
use crate::mixed_precision::{allocate_bits, Allocation};
use crate::sensitivity::{self, DistanceMetric};
use crate::stats::{StatsCollector, TensorStats};
use crate::threshold::{select_activation_scheme, select_weight_scheme};
use ndarray::Array2;
use std::collections::BTreeMap;

/// End-to-end post-training quantization runner
pub struct PtqPipeline {
    config: PipelineConfig,
}

impl PtqPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    fn log(&self, msg: &str) {
        if self.config.verbose {
            println!("[pipeline] {msg}");
        }
    }

    /// Run every configured stage, discarding telemetry
    pub fn run(
        &self,
        graph: &mut Graph,
        info: &FrameworkInfo,
        dataset: &mut dyn RepresentativeDataset,
    ) -> Result<QuantizationReport> {
        self.run_with_sink(graph, info, dataset, &mut NullSink)
    }

    /// Run every configured stage and emit the report through the sink
    pub fn run_with_sink(
        &self,
        graph: &mut Graph,
        info: &FrameworkInfo,
        dataset: &mut dyn RepresentativeDataset,
        sink: &mut dyn TelemetrySink,
    ) -> Result<QuantizationReport> {
        prepare(graph, info, &self.config)?;

        let batches = materialize(dataset)?;
        self.log(&format!(
            "collecting statistics over {} batches",
            batches.len()
        ));
        let stats = collect_stats(graph, &batches)?;

        self.log("selecting thresholds");
        calibrate(graph, info, &stats)?;

        let mut allocation: Option<Allocation> = None;
        if let Some(mp) = &self.config.mixed_precision {
            self.log("running sensitivity analysis");
            let report =
                sensitivity::analyze(graph, info, dataset, &mp.candidate_bits, DistanceMetric::Mse)?;

            self.log("solving bit allocation");
            let alloc = allocate_bits(graph, info, &report, mp)?;
            self.log(&format!(
                "allocation committed: distortion {:.6}, total bits {}",
                alloc.distortion, alloc.total_bits
            ));

            // Thresholds were fit at the old bit-widths; redo them
            calibrate(graph, info, &stats)?;
            allocation = Some(alloc);
        }

        apply_bias_correction(graph, info, &stats)?;

        let mut fine_tune: Option<FineTuneResult> = None;
        if let Some(gptq) = &self.config.gptq {
            self.log(&format!("fine-tuning for {} iterations", gptq.iterations));
            let mut trainer = GptqTrainer::new(gptq.clone())?;
            fine_tune = Some(trainer.run(graph, info, dataset)?);
        }

        let report =
            QuantizationReport::from_graph(graph, info, allocation.as_ref(), fine_tune.as_ref());
        sink.emit(&report)?;
        self.log("done");
        Ok(report)
    }
}

/// Install framework defaults, apply editor rules, validate eagerly
fn prepare(graph: &mut Graph, info: &FrameworkInfo, config: &PipelineConfig) -> Result<()> {
    for node in graph.nodes_mut() {
        node.qconfig = info.default_config(node.op);
    }
    apply_rules(graph, &config.edit_rules);
    for node in graph.nodes() {
        node.qconfig
            .validate()
            .map_err(|e| Error::Config(format!("node {}: {e}", node.name)))?;
    }
    Ok(())
}

/// Observe every node's float output over the whole sample
fn collect_stats(
    graph: &Graph,
    batches: &[Array2<f32>],
) -> Result<BTreeMap<NodeId, TensorStats>> {
    let mut collectors: BTreeMap<NodeId, StatsCollector> = graph
        .nodes()
        .map(|n| (n.id, StatsCollector::new(n.out_width)))
        .collect();

    for x in batches {
        let acts = graph.forward(x)?;
        for (id, out) in &acts {
            let flat: Vec<f32> = out.iter().copied().collect();
            if let Some(collector) = collectors.get_mut(id) {
                collector.observe(&flat);
            }
        }
    }

    Ok(collectors
        .into_iter()
        .map(|(id, c)| (id, c.compute()))
        .collect())
}

/// Commit a scheme for every enabled tensor at its current bit-width
fn calibrate(
    graph: &mut Graph,
    info: &FrameworkInfo,
    stats: &BTreeMap<NodeId, TensorStats>,
) -> Result<()> {
    let ids: Vec<NodeId> = graph.topo_order().collect();
    for id in ids {
        let node = graph.node(id);

        let weight_scheme = match (&node.weight, node.qconfig.weights.enabled) {
            (Some(w), true) if info.is_weighted(node.op) => {
                let flat: Vec<f32> = w.iter().copied().collect();
                Some(select_weight_scheme(&flat, w.ncols(), &node.qconfig.weights))
            }
            _ => None,
        };

        let activation_scheme = if node.qconfig.activation.enabled {
            let node_stats = stats
                .get(&id)
                .ok_or_else(|| Error::Graph(format!("no statistics for node {}", node.name)))?;
            let allow_shift = node.qconfig.shift_negative && info.is_shift_eligible(node.op);
            Some(select_activation_scheme(
                node_stats,
                &node.qconfig.activation,
                allow_shift,
            ))
        } else {
            None
        };

        let node = graph.node_mut(id);
        if let Some(scheme) = weight_scheme {
            node.qconfig.weights.scheme = Some(scheme);
        }
        if let Some((scheme, shift)) = activation_scheme {
            node.qconfig.activation.scheme = Some(scheme);
            node.qconfig.activation_shift = shift;
        }
    }
    Ok(())
}

/// Compensate the mean weight-quantization error through the bias
///
/// For `y = x·W + b`, quantizing W adds `E[x]·(W_q − W)` to the expected
/// output; nodes with the correction enabled subtract it from the bias.
fn apply_bias_correction(
    graph: &mut Graph,
    info: &FrameworkInfo,
    stats: &BTreeMap<NodeId, TensorStats>,
) -> Result<()> {
    let ids: Vec<NodeId> = graph.topo_order().collect();
    for id in ids {
        let node = graph.node(id);
        if !node.qconfig.bias_correction || !info.is_weighted(node.op) {
            continue;
        }
        let cfg = &node.qconfig.weights;
        let (weight, scheme) = match (&node.weight, &cfg.scheme, cfg.enabled) {
            (Some(w), Some(s), true) => (w, s),
            _ => continue,
        };

        let input_id = node.inputs[0];
        let mean_in = &stats
            .get(&input_id)
            .ok_or_else(|| Error::Graph(format!("no statistics for node {input_id}")))?
            .channel_mean;

        let wq = quantize_array(weight, scheme, cfg.bits, weight.ncols());
        let error = &wq - weight;
        // delta[j] = Σ_i E[x_i] · error[i, j]
        let delta: Vec<f32> = (0..weight.ncols())
            .map(|j| {
                (0..weight.nrows())
                    .map(|i| mean_in[i % mean_in.len()] * error[[i, j]])
                    .sum()
            })
            .collect();

        let node = graph.node_mut(id);
        if let Some(bias) = node.bias.as_mut() {
            for (b, d) in bias.iter_mut().zip(delta.iter()) {
                *b -= d;
            }
        }
    }
    Ok(())
}
