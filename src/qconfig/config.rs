//! Per-tensor and per-node quantization configuration

use super::scheme::{QuantScheme, Thresholds};
use crate::error::{Error, Result};
use crate::threshold::ErrorMetric;
use serde::{Deserialize, Serialize};

/// Admissible bit-width range for any tensor
pub const MIN_BITS: u8 = 2;
pub const MAX_BITS: u8 = 16;

/// Which quantization method to use when committing a scheme
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum QuantMethod {
    /// Symmetric fixed-point grid
    #[default]
    Symmetric,
    /// Symmetric grid with power-of-two threshold
    PowerOfTwo,
    /// Asymmetric uniform grid over observed min/max
    Uniform,
    /// Nearest-center lookup table
    LookupTable,
}

/// Quantization configuration for one tensor (weights or activation)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TensorQuantConfig {
    /// Whether this tensor is quantized at all
    pub enabled: bool,
    /// Bit-width
    pub bits: u8,
    /// Method used to derive the committed scheme
    pub method: QuantMethod,
    /// Search thresholds independently per output channel
    pub per_channel: bool,
    /// Error criterion minimized during threshold search
    pub metric: ErrorMetric,
    /// Committed scheme; `None` until the threshold selector has run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<QuantScheme>,
}

impl TensorQuantConfig {
    /// Enabled config with the given bit-width and defaults elsewhere
    pub fn with_bits(bits: u8) -> Self {
        Self {
            enabled: true,
            bits,
            method: QuantMethod::default(),
            per_channel: false,
            metric: ErrorMetric::default(),
            scheme: None,
        }
    }

    /// Disabled config (tensor stays float)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::with_bits(8)
        }
    }

    /// Validate the bit-width range and threshold positivity invariants
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BITS..=MAX_BITS).contains(&self.bits) {
            return Err(Error::Config(format!(
                "bit-width {} outside allowed range {}..={}",
                self.bits, MIN_BITS, MAX_BITS
            )));
        }
        if self.enabled {
            if let Some(thresholds) = self.scheme.as_ref().and_then(QuantScheme::thresholds) {
                if !thresholds.all_positive() {
                    return Err(Error::Config(
                        "quantization enabled with non-positive threshold".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Committed thresholds, if a threshold-bearing scheme is set
    pub fn thresholds(&self) -> Option<&Thresholds> {
        self.scheme.as_ref().and_then(QuantScheme::thresholds)
    }
}

impl Default for TensorQuantConfig {
    fn default() -> Self {
        Self::with_bits(8)
    }
}

/// Quantization configuration attached to one graph node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeQuantConfig {
    /// Weight tensor quantization
    pub weights: TensorQuantConfig,
    /// Output activation quantization
    pub activation: TensorQuantConfig,
    /// Adjust the bias to compensate mean weight-quantization error
    pub bias_correction: bool,
    /// Recenter negative-reaching activation ranges before threshold search
    pub shift_negative: bool,
    /// Shift applied to the activation range (recorded by the selector)
    pub activation_shift: f32,
}

impl NodeQuantConfig {
    /// Config with both tensors quantized at the given bit-width
    pub fn with_bits(bits: u8) -> Self {
        Self {
            weights: TensorQuantConfig::with_bits(bits),
            activation: TensorQuantConfig::with_bits(bits),
            bias_correction: false,
            shift_negative: false,
            activation_shift: 0.0,
        }
    }

    /// Fully disabled config (float node)
    pub fn float() -> Self {
        Self {
            weights: TensorQuantConfig::disabled(),
            activation: TensorQuantConfig::disabled(),
            bias_correction: false,
            shift_negative: false,
            activation_shift: 0.0,
        }
    }

    /// Validate both tensor halves
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        self.activation.validate()?;
        // Activations carry no channel axis through the selector; only
        // weights support per-channel thresholds
        if self.activation.enabled && self.activation.per_channel {
            return Err(Error::Config(
                "per-channel activation quantization is not supported".into(),
            ));
        }
        Ok(())
    }
}

impl Default for NodeQuantConfig {
    fn default() -> Self {
        Self::with_bits(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_range_validation() {
        let mut cfg = TensorQuantConfig::with_bits(8);
        assert!(cfg.validate().is_ok());

        cfg.bits = 1;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        cfg.bits = 17;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_threshold_positivity_checked_only_when_enabled() {
        let mut cfg = TensorQuantConfig::with_bits(8);
        cfg.scheme = Some(QuantScheme::Symmetric {
            threshold: Thresholds::PerTensor(-1.0),
        });
        assert!(cfg.validate().is_err());

        cfg.enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_disabled_config() {
        let cfg = TensorQuantConfig::disabled();
        assert!(!cfg.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_per_channel_activation_rejected() {
        let mut cfg = NodeQuantConfig::default();
        cfg.activation.per_channel = true;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        // A disabled activation half may keep the flag; it never runs
        cfg.activation.enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_node_config_defaults() {
        let cfg = NodeQuantConfig::default();
        assert_eq!(cfg.weights.bits, 8);
        assert_eq!(cfg.activation.bits, 8);
        assert!(!cfg.bias_correction);
        assert!(cfg.validate().is_ok());
    }
}
