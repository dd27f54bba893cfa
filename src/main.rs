//! Comprimir CLI
//!
//! Single-command quantization entry point for the comprimir library.
//!
//! # Usage
//!
//! ```bash
//! # Quantize the built-in demo model with a pipeline config
//! comprimir run config.yaml --output report.json
//!
//! # Validate a pipeline config
//! comprimir validate config.yaml
//! ```

use clap::{Args, Parser, Subcommand};
use comprimir::pipeline::JsonFileSink;
use comprimir::{
    FrameworkInfo, Graph, InMemoryDataset, PipelineConfig, PtqPipeline, Result,
};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "comprimir", version, about = "Post-training quantization engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the quantization pipeline on a synthetic demo model
    Run(RunArgs),
    /// Parse and validate a pipeline config
    Validate { config: PathBuf },
}

#[derive(Args)]
struct RunArgs {
    /// Pipeline config (YAML)
    config: PathBuf,
    /// Where to write the quantization report (JSON)
    #[arg(long, default_value = "report.json")]
    output: PathBuf,
    /// RNG seed for the demo model and representative sample
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Number of representative batches
    #[arg(long, default_value_t = 8)]
    batches: usize,
    /// Rows per batch
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run(args) => run(args),
        Command::Validate { config } => validate(config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn validate(config: PathBuf) -> Result<()> {
    PipelineConfig::from_yaml_file(&config)?;
    println!("Config OK: {}", config.display());
    Ok(())
}

fn run(args: RunArgs) -> Result<()> {
    let config = PipelineConfig::from_yaml_file(&args.config)?;
    let pipeline = PtqPipeline::new(config)?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut graph = demo_graph(&mut rng)?;
    let mut dataset = demo_dataset(&mut rng, args.batches, args.batch_size);
    let info = FrameworkInfo::default();

    let mut sink = JsonFileSink::new(&args.output);
    let report = pipeline.run_with_sink(&mut graph, &info, &mut dataset, &mut sink)?;

    println!(
        "Quantized {} nodes; weight memory {:.1} B, BOPS {:.0}",
        report.nodes.len(),
        report.resource_totals.weights_memory,
        report.resource_totals.bops
    );
    if let Some(mp) = report.mixed_precision {
        println!(
            "Mixed precision: distortion {:.6}, total bits {}",
            mp.distortion, mp.total_bits
        );
    }
    if let Some(ft) = report.fine_tune {
        println!(
            "Fine-tuning: {} iterations, loss {:?} -> {:?}",
            ft.iterations_run, ft.initial_loss, ft.final_loss
        );
    }
    println!("Report written to {}", args.output.display());
    Ok(())
}

/// Two-hidden-layer MLP with seeded random parameters
fn demo_graph(rng: &mut StdRng) -> Result<Graph> {
    let mut g = Graph::new();
    let input = g.add_input("input", 16);
    let d1 = g.add_dense("fc1", input, random_weight(rng, 16, 32), random_bias(rng, 32))?;
    let r1 = g.add_relu("relu1", d1)?;
    let d2 = g.add_dense("fc2", r1, random_weight(rng, 32, 32), random_bias(rng, 32))?;
    let r2 = g.add_relu("relu2", d2)?;
    let d3 = g.add_dense("head", r2, random_weight(rng, 32, 8), random_bias(rng, 8))?;
    g.set_output(d3)?;
    Ok(g)
}

fn demo_dataset(rng: &mut StdRng, batches: usize, batch_size: usize) -> InMemoryDataset {
    let data = (0..batches)
        .map(|_| Array2::from_shape_fn((batch_size, 16), |_| rng.gen_range(-1.0f32..1.0)))
        .collect();
    InMemoryDataset::new(data)
}

fn random_weight(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f32> {
    let scale = (2.0 / rows as f32).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-scale..scale))
}

fn random_bias(rng: &mut StdRng, len: usize) -> Array1<f32> {
    Array1::from_shape_fn(len, |_| rng.gen_range(-0.1f32..0.1))
}
