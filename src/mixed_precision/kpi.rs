//! Resource budgets and costs

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Aggregated resource cost of an allocation (or one candidate)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceCost {
    /// Weight memory in bytes
    pub weights_memory: f64,
    /// Activation memory in bytes
    pub activation_memory: f64,
    /// Bit-operations per sample
    pub bops: f64,
}

impl ResourceCost {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Componentwise sum
    pub fn plus(&self, other: &ResourceCost) -> ResourceCost {
        ResourceCost {
            weights_memory: self.weights_memory + other.weights_memory,
            activation_memory: self.activation_memory + other.activation_memory,
            bops: self.bops + other.bops,
        }
    }

    /// Componentwise minimum
    pub fn min_with(&self, other: &ResourceCost) -> ResourceCost {
        ResourceCost {
            weights_memory: self.weights_memory.min(other.weights_memory),
            activation_memory: self.activation_memory.min(other.activation_memory),
            bops: self.bops.min(other.bops),
        }
    }
}

/// Resource ceilings for the bit-allocation search
///
/// `None` components are unconstrained. A candidate allocation is feasible
/// iff its aggregated cost fits every constrained component (strict mode) or
/// the scalarized budget (weighted mode).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    /// Total weight memory ceiling, bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights_memory: Option<f64>,
    /// Total activation memory ceiling, bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_memory: Option<f64>,
    /// Total bit-operations ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bops: Option<f64>,
}

impl Kpi {
    /// Unconstrained budget
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Budget constraining only weight memory
    pub fn weights_only(bytes: f64) -> Self {
        Self {
            weights_memory: Some(bytes),
            ..Self::default()
        }
    }

    /// All components non-negative
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("weights_memory", self.weights_memory),
            ("activation_memory", self.activation_memory),
            ("bops", self.bops),
        ] {
            if let Some(v) = v {
                if v < 0.0 || !v.is_finite() {
                    return Err(Error::Config(format!(
                        "budget component {name} must be non-negative and finite, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether no component is constrained
    pub fn is_unbounded(&self) -> bool {
        self.weights_memory.is_none() && self.activation_memory.is_none() && self.bops.is_none()
    }

    /// Componentwise feasibility of a cost under this budget
    pub fn fits(&self, cost: &ResourceCost) -> bool {
        self.weights_memory.map_or(true, |b| cost.weights_memory <= b)
            && self
                .activation_memory
                .map_or(true, |b| cost.activation_memory <= b)
            && self.bops.map_or(true, |b| cost.bops <= b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_fits_everything() {
        let kpi = Kpi::unbounded();
        assert!(kpi.is_unbounded());
        assert!(kpi.fits(&ResourceCost {
            weights_memory: 1e12,
            activation_memory: 1e12,
            bops: 1e18,
        }));
    }

    #[test]
    fn test_componentwise_feasibility() {
        let kpi = Kpi {
            weights_memory: Some(100.0),
            activation_memory: None,
            bops: Some(1000.0),
        };
        let ok = ResourceCost {
            weights_memory: 100.0,
            activation_memory: 1e9,
            bops: 999.0,
        };
        assert!(kpi.fits(&ok));

        let over = ResourceCost {
            weights_memory: 100.1,
            ..ok
        };
        assert!(!kpi.fits(&over));
    }

    #[test]
    fn test_negative_budget_rejected() {
        let kpi = Kpi::weights_only(-1.0);
        assert!(matches!(kpi.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_cost_accumulation() {
        let a = ResourceCost {
            weights_memory: 1.0,
            activation_memory: 2.0,
            bops: 3.0,
        };
        let sum = a.plus(&a);
        assert_eq!(sum.weights_memory, 2.0);
        assert_eq!(sum.bops, 6.0);
    }
}
