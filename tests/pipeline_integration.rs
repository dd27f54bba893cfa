//! End-to-end pipeline scenarios

use approx::assert_abs_diff_eq;
use comprimir::graph::{quantize_array, EditAction, EditRule, NodeFilter};
use comprimir::pipeline::JsonFileSink;
use comprimir::{
    Error, FrameworkInfo, GradientPtqConfig, Graph, InMemoryDataset, Kpi, MixedPrecisionConfig,
    NodeId, PipelineConfig, PtqPipeline, RepresentativeDataset, Thresholds,
};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn uniform_dataset(seed: u64, batches: usize, rows: usize, cols: usize) -> InMemoryDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..batches)
        .map(|_| Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0f32..1.0)))
        .collect();
    InMemoryDataset::new(data)
}

/// Single dense layer whose weights span [-1, 1] evenly, endpoints included
fn unit_range_graph() -> (Graph, NodeId) {
    let n = 32;
    let values: Vec<f32> = (0..n).map(|i| -1.0 + 2.0 * i as f32 / (n - 1) as f32).collect();
    let weight = Array2::from_shape_vec((8, 4), values).unwrap();

    let mut g = Graph::new();
    let input = g.add_input("input", 8);
    let d = g.add_dense("fc", input, weight, Array1::zeros(4)).unwrap();
    g.set_output(d).unwrap();
    (g, d)
}

#[test]
fn uniform_unit_range_selects_full_range_threshold() {
    let (mut g, d) = unit_range_graph();
    let info = FrameworkInfo::default();

    // Per-tensor search so one threshold covers the whole [-1, 1] tensor
    let mut config = PipelineConfig::default();
    config.edit_rules = vec![EditRule::new(
        NodeFilter::NameEquals("fc".into()),
        EditAction::SetWeightPerChannel(false),
    )];

    PtqPipeline::new(config)
        .unwrap()
        .run(&mut g, &info, &mut uniform_dataset(1, 4, 16, 8))
        .unwrap();

    let node = g.node(d);
    let threshold = match node.qconfig.weights.thresholds().unwrap() {
        Thresholds::PerTensor(t) => *t,
        other => panic!("expected per-tensor thresholds, got {other:?}"),
    };
    // Evenly spread data gains nothing from clipping: the full range wins
    assert_abs_diff_eq!(threshold, 1.0, epsilon = 0.05);

    // 8-bit round-trip error stays within one step of the grid
    let scheme = node.qconfig.weights.scheme.as_ref().unwrap();
    let weight = node.weight.as_ref().unwrap();
    let q = quantize_array(weight, scheme, 8, weight.ncols());
    let max_step = threshold / 128.0;
    for (orig, quant) in weight.iter().zip(q.iter()) {
        assert!(
            (orig - quant).abs() <= max_step + 1e-6,
            "round-trip error {} exceeds {}",
            (orig - quant).abs(),
            max_step
        );
    }
}

#[test]
fn impossible_budget_reports_infeasible() {
    let (mut g, _) = unit_range_graph();
    let info = FrameworkInfo::default();

    // 32 params at the 2-bit minimum still need 8 bytes
    let mut config = PipelineConfig::default();
    config.mixed_precision = Some(MixedPrecisionConfig::new(Kpi::weights_only(1.0)));

    let err = PtqPipeline::new(config)
        .unwrap()
        .run(&mut g, &info, &mut uniform_dataset(2, 4, 16, 8));
    assert!(matches!(err, Err(Error::Infeasible(_))));
}

#[test]
fn empty_sample_reports_configuration_error() {
    let (mut g, _) = unit_range_graph();
    let info = FrameworkInfo::default();
    let mut empty = InMemoryDataset::new(vec![]);

    let err = PtqPipeline::new(PipelineConfig::default())
        .unwrap()
        .run(&mut g, &info, &mut empty);
    assert!(matches!(err, Err(Error::EmptyDataset)));
}

#[test]
fn zero_iteration_fine_tuning_is_a_no_op() {
    let (mut g, d) = unit_range_graph();
    let info = FrameworkInfo::default();
    let before = g.node(d).weight.clone().unwrap();
    let bias_before = g.node(d).bias.clone().unwrap();

    let mut config = PipelineConfig::default();
    config.gptq = Some(GradientPtqConfig::with_iterations(0));

    let report = PtqPipeline::new(config)
        .unwrap()
        .run(&mut g, &info, &mut uniform_dataset(3, 4, 16, 8))
        .unwrap();

    assert_eq!(report.fine_tune.unwrap().iterations_run, 0);
    let after = g.node(d).weight.clone().unwrap();
    for (a, b) in before.iter().zip(after.iter()) {
        assert_abs_diff_eq!(a, b);
    }
    for (a, b) in bias_before.iter().zip(g.node(d).bias.as_ref().unwrap().iter()) {
        assert_abs_diff_eq!(a, b);
    }
}

#[test]
fn fine_tuning_does_not_worsen_output_distortion() {
    let (mut tuned, _) = unit_range_graph();
    let (mut plain, _) = unit_range_graph();
    let info = FrameworkInfo::default();
    let out_id = tuned.output().unwrap();

    let mut plain_cfg = PipelineConfig::default();
    plain_cfg.edit_rules = vec![EditRule::new(
        NodeFilter::NameEquals("fc".into()),
        EditAction::SetWeightBits(3),
    )];
    let mut tuned_cfg = plain_cfg.clone();
    let mut gptq = GradientPtqConfig::with_iterations(150);
    gptq.optimizer = comprimir::gptq::OptimizerSpec::Adam { lr: 0.005 };
    tuned_cfg.gptq = Some(gptq);

    PtqPipeline::new(plain_cfg)
        .unwrap()
        .run(&mut plain, &info, &mut uniform_dataset(4, 4, 16, 8))
        .unwrap();
    PtqPipeline::new(tuned_cfg)
        .unwrap()
        .run(&mut tuned, &info, &mut uniform_dataset(4, 4, 16, 8))
        .unwrap();

    // Distortion of the quantized output vs the ORIGINAL float model
    let (reference, _) = unit_range_graph();
    let mut eval = uniform_dataset(4, 4, 16, 8);
    let mut err_plain = 0.0f64;
    let mut err_tuned = 0.0f64;
    while let Some(x) = eval.next_batch() {
        let f = reference.forward(&x).unwrap();
        let qp = plain.forward_quantized(&x).unwrap();
        let qt = tuned.forward_quantized(&x).unwrap();
        for ((a, b), c) in f[&out_id].iter().zip(qp[&out_id].iter()).zip(qt[&out_id].iter()) {
            err_plain += ((a - b) as f64).powi(2);
            err_tuned += ((a - c) as f64).powi(2);
        }
    }
    assert!(
        err_tuned <= err_plain * 1.05,
        "fine-tuning worsened distortion: {err_plain} -> {err_tuned}"
    );
}

#[test]
fn budgeted_run_fits_and_report_round_trips() {
    let mut rng = StdRng::seed_from_u64(9);
    let mut g = Graph::new();
    let input = g.add_input("input", 8);
    let w1 = Array2::from_shape_fn((8, 16), |_| rng.gen_range(-0.5f32..0.5));
    let d1 = g.add_dense("fc1", input, w1, Array1::zeros(16)).unwrap();
    let r = g.add_relu("relu", d1).unwrap();
    let w2 = Array2::from_shape_fn((16, 4), |_| rng.gen_range(-0.5f32..0.5));
    let d2 = g.add_dense("fc2", r, w2, Array1::zeros(4)).unwrap();
    g.set_output(d2).unwrap();
    let info = FrameworkInfo::default();

    // 192 params: full 8-bit needs 192 bytes, cap below that
    let mut config = PipelineConfig::default();
    config.mixed_precision = Some(MixedPrecisionConfig::new(Kpi::weights_only(150.0)));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let mut sink = JsonFileSink::new(&path);

    let report = PtqPipeline::new(config)
        .unwrap()
        .run_with_sink(&mut g, &info, &mut uniform_dataset(5, 4, 16, 8), &mut sink)
        .unwrap();

    assert!(report.resource_totals.weights_memory <= 150.0);
    // At least one node was forced below 8 bits
    assert!(g
        .nodes()
        .filter(|n| n.weight.is_some())
        .any(|n| n.qconfig.weights.bits < 8));

    let text = std::fs::read_to_string(&path).unwrap();
    let back: comprimir::QuantizationReport = serde_json::from_str(&text).unwrap();
    assert_eq!(back.nodes.len(), report.nodes.len());
}
