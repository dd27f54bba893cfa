//! Gradient-based post-training quantization
//!
//! Refines an already-calibrated quantized graph by distilling it against
//! its own float version over the representative sample.

mod config;
mod student;
mod trainer;

pub use config::{GradientPtqConfig, OptimizerSpec, PlateauConfig};
pub use student::StudentModel;
pub use trainer::{
    FineTuneCallback, FineTuneResult, GptqTrainer, IterationContext, TrainerState,
};
