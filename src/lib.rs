//! # Comprimir: Post-Training Quantization Engine
//!
//! Comprimir converts trained floating-point networks to low-bit fixed-point
//! representations while minimizing accuracy loss, optionally under a
//! memory/compute budget.
//!
//! ## Architecture
//!
//! - **graph**: Explicit DAG abstraction over the host model (arena nodes,
//!   topological traversal, rule-based config editor)
//! - **qconfig**: Quantization schemes (symmetric, power-of-two, uniform,
//!   lookup-table) and per-node configuration
//! - **stats**: Tensor statistics (min/max, histograms) over representative data
//! - **threshold**: Error-metric-driven threshold search (MSE/MAE/Lp/KL)
//! - **sensitivity**: Per-(layer, bit-width) output distortion scoring
//! - **mixed_precision**: Budget-constrained bit-allocation solver
//! - **gptq**: Gradient-based fine-tuning with a straight-through estimator
//! - **autograd**: Tape-based automatic differentiation
//! - **optim**: Optimizers (SGD, Adam)
//! - **pipeline**: End-to-end orchestration and reporting

pub mod autograd;
pub mod data;
pub mod gptq;
pub mod graph;
pub mod mixed_precision;
pub mod optim;
pub mod pipeline;
pub mod qconfig;
pub mod sensitivity;
pub mod stats;
pub mod threshold;

pub mod error;

// Re-export commonly used types
pub use autograd::{backward, Tensor};
pub use data::{InMemoryDataset, RepresentativeDataset};
pub use error::{Error, Result};
pub use graph::{FrameworkInfo, Graph, Node, NodeId, OpKind};
pub use gptq::{GptqTrainer, GradientPtqConfig};
pub use mixed_precision::{Kpi, MixedPrecisionConfig, SearchMode};
pub use pipeline::{PipelineConfig, PtqPipeline, QuantizationReport};
pub use qconfig::{NodeQuantConfig, QuantScheme, TensorQuantConfig, Thresholds};
pub use sensitivity::SensitivityReport;
pub use threshold::ErrorMetric;
