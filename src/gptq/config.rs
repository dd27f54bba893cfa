//! Fine-tuning run configuration

use crate::error::{Error, Result};
use crate::optim::{Adam, Optimizer, SGD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optimizer choice for the fine-tuning loop
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerSpec {
    Adam { lr: f32 },
    Sgd { lr: f32, momentum: f32 },
}

impl OptimizerSpec {
    pub fn build(&self) -> Box<dyn Optimizer> {
        match *self {
            OptimizerSpec::Adam { lr } => Box::new(Adam::default_params(lr)),
            OptimizerSpec::Sgd { lr, momentum } => Box::new(SGD::new(lr, momentum)),
        }
    }

    fn lr(&self) -> f32 {
        match *self {
            OptimizerSpec::Adam { lr } | OptimizerSpec::Sgd { lr, .. } => lr,
        }
    }
}

impl Default for OptimizerSpec {
    fn default() -> Self {
        OptimizerSpec::Adam { lr: 1e-3 }
    }
}

/// Early stop on a loss plateau
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlateauConfig {
    /// Iterations without improvement before stopping
    pub patience: usize,
    /// Minimum loss decrease that counts as improvement
    pub min_delta: f32,
}

/// Configuration of one gradient fine-tuning run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GradientPtqConfig {
    /// Number of optimization iterations (one batch each)
    pub iterations: usize,
    /// Optimizer applied to the trainable parameters
    #[serde(default)]
    pub optimizer: OptimizerSpec,
    /// Train bias tensors alongside weights
    #[serde(default = "default_true")]
    pub train_bias: bool,
    /// Train quantization thresholds (via their step sizes)
    #[serde(default)]
    pub train_thresholds: bool,
    /// Include intermediate weighted-node outputs in the distillation loss
    #[serde(default = "default_true")]
    pub compare_intermediates: bool,
    /// Per-node multipliers on the loss terms, keyed by node name;
    /// unlisted compared nodes weigh 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_weights: Option<BTreeMap<String, f32>>,
    /// Early stop once the loss plateaus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plateau: Option<PlateauConfig>,
    /// Print loss every N iterations (0 = silent)
    #[serde(default)]
    pub log_interval: usize,
}

fn default_true() -> bool {
    true
}

impl GradientPtqConfig {
    /// Config with the given iteration count and defaults elsewhere
    pub fn with_iterations(iterations: usize) -> Self {
        Self {
            iterations,
            optimizer: OptimizerSpec::default(),
            train_bias: true,
            train_thresholds: false,
            compare_intermediates: true,
            loss_weights: None,
            plateau: None,
            log_interval: 0,
        }
    }

    /// Loss multiplier applied to a compared node's term
    pub fn loss_weight_for(&self, name: &str) -> f32 {
        self.loss_weights
            .as_ref()
            .and_then(|weights| weights.get(name))
            .copied()
            .unwrap_or(1.0)
    }

    pub fn validate(&self) -> Result<()> {
        let lr = self.optimizer.lr();
        if lr <= 0.0 || !lr.is_finite() {
            return Err(Error::Config(format!(
                "learning rate must be positive and finite, got {lr}"
            )));
        }
        if let Some(weights) = &self.loss_weights {
            for (name, &w) in weights {
                if w < 0.0 || !w.is_finite() {
                    return Err(Error::Config(format!(
                        "loss weight for '{name}' must be non-negative and finite, got {w}"
                    )));
                }
            }
        }
        if let Some(p) = &self.plateau {
            if p.patience == 0 {
                return Err(Error::Config("plateau patience must be at least 1".into()));
            }
            if p.min_delta < 0.0 || !p.min_delta.is_finite() {
                return Err(Error::Config(format!(
                    "plateau min_delta must be non-negative, got {}",
                    p.min_delta
                )));
            }
        }
        Ok(())
    }
}

impl Default for GradientPtqConfig {
    fn default() -> Self {
        Self::with_iterations(100)
    }
}
