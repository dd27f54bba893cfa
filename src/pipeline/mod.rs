//! Quantization pipeline orchestration, reporting, and telemetry

mod config;
mod report;
mod runner;

pub use config::PipelineConfig;
pub use report::{
    AllocationSummary, FineTuneSummary, JsonFileSink, NodeReport, NullSink, QuantizationReport,
    TelemetrySink,
};
pub use runner::PtqPipeline;
