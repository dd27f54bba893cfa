//! Declarative pipeline configuration

use crate::error::{Error, Result};
use crate::gptq::GradientPtqConfig;
use crate::graph::{EditAction, EditRule};
use crate::mixed_precision::MixedPrecisionConfig;
use crate::qconfig::{MAX_BITS, MIN_BITS};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Full configuration of one quantization run
///
/// Deserializable from YAML for the binary surface, constructible directly
/// for the library surface. Validation is eager: a bad config fails before
/// any statistics are collected.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Editor rules applied to the graph before anything else runs
    #[serde(default)]
    pub edit_rules: Vec<EditRule>,
    /// Optional mixed-precision stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixed_precision: Option<MixedPrecisionConfig>,
    /// Optional gradient fine-tuning stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gptq: Option<GradientPtqConfig>,
    /// Print stage progress to stdout
    #[serde(default)]
    pub verbose: bool,
}

impl PipelineConfig {
    /// Parse from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        for rule in &self.edit_rules {
            let bits = match rule.action {
                EditAction::SetWeightBits(b) | EditAction::SetActivationBits(b) => b,
                _ => continue,
            };
            if !(MIN_BITS..=MAX_BITS).contains(&bits) {
                return Err(Error::Config(format!(
                    "edit rule sets bit-width {bits} outside allowed range {MIN_BITS}..={MAX_BITS}"
                )));
            }
        }
        if let Some(mp) = &self.mixed_precision {
            mp.validate()?;
        }
        if let Some(gptq) = &self.gptq {
            gptq.validate()?;
        }
        Ok(())
    }
}
