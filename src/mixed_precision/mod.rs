//! Mixed-precision bit-width allocation
//!
//! Combines the sensitivity report with a per-candidate resource model and
//! selects one bit-width per eligible node under the configured budget.

mod candidate;
mod kpi;
mod solver;

pub use candidate::{candidate_cost, CandidateConfig};
pub use kpi::{Kpi, ResourceCost};
pub use solver::{solve, Allocation};

use crate::error::{Error, Result};
use crate::graph::{FrameworkInfo, Graph};
use crate::qconfig::{MAX_BITS, MIN_BITS};
use crate::sensitivity::SensitivityReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the budget constrains the search
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SearchMode {
    /// Every constrained budget component must hold componentwise
    #[default]
    StrictConstraints,
    /// Single scalarized constraint: weighted cost sum within the weighted
    /// budget sum, over the constrained components only
    WeightedObjective {
        weights_memory: f64,
        activation_memory: f64,
        bops: f64,
    },
}

/// Per-node importance applied to sensitivity scores before solving
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityWeighting {
    /// All nodes weigh equally
    #[default]
    Uniform,
    /// Explicit multiplier per node name; unlisted nodes weigh 1.0
    ByNodeName(BTreeMap<String, f64>),
}

impl SensitivityWeighting {
    fn weight_of(&self, name: &str) -> f64 {
        match self {
            SensitivityWeighting::Uniform => 1.0,
            SensitivityWeighting::ByNodeName(map) => map.get(name).copied().unwrap_or(1.0),
        }
    }
}

/// Configuration of one mixed-precision search run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MixedPrecisionConfig {
    /// Bit-widths considered for every eligible node
    pub candidate_bits: Vec<u8>,
    /// Resource ceilings
    #[serde(default)]
    pub kpi: Kpi,
    /// Importance multipliers on the sensitivity scores
    #[serde(default)]
    pub weighting: SensitivityWeighting,
    /// Budget interpretation
    #[serde(default)]
    pub search_mode: SearchMode,
}

impl MixedPrecisionConfig {
    /// Default candidate set over the given budget
    pub fn new(kpi: Kpi) -> Self {
        Self {
            candidate_bits: vec![8, 4, 2],
            kpi,
            weighting: SensitivityWeighting::default(),
            search_mode: SearchMode::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.candidate_bits.is_empty() {
            return Err(Error::Config("empty candidate bit-width set".into()));
        }
        for &bits in &self.candidate_bits {
            if !(MIN_BITS..=MAX_BITS).contains(&bits) {
                return Err(Error::Config(format!(
                    "candidate bit-width {bits} outside allowed range {MIN_BITS}..={MAX_BITS}"
                )));
            }
        }
        let mut seen = self.candidate_bits.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.candidate_bits.len() {
            return Err(Error::Config("duplicate candidate bit-width".into()));
        }
        if let SensitivityWeighting::ByNodeName(map) = &self.weighting {
            for (name, w) in map {
                if *w < 0.0 || !w.is_finite() {
                    return Err(Error::Config(format!(
                        "importance weight for {name} must be non-negative and finite, got {w}"
                    )));
                }
            }
        }
        self.kpi.validate()
    }
}

/// Assemble the per-node candidate groups the solver consumes
///
/// One group per weighted node, one candidate per configured bit-width,
/// distortion from the report scaled by the node's importance weight.
pub fn build_candidates(
    graph: &Graph,
    info: &FrameworkInfo,
    report: &SensitivityReport,
    config: &MixedPrecisionConfig,
) -> Result<Vec<Vec<CandidateConfig>>> {
    config.validate()?;
    let mut groups = Vec::new();
    for id in graph.weighted_nodes(info) {
        let name = &graph.node(id).name;
        let weight = config.weighting.weight_of(name);
        let mut group = Vec::with_capacity(config.candidate_bits.len());
        for &bits in &config.candidate_bits {
            let distortion = report.get(id, bits).ok_or_else(|| {
                Error::Config(format!(
                    "sensitivity report missing entry for node {name} at {bits} bits"
                ))
            })?;
            group.push(CandidateConfig {
                node: id,
                bits,
                distortion: distortion * weight,
                cost: candidate_cost(graph, id, bits),
            });
        }
        groups.push(group);
    }
    Ok(groups)
}

/// Run the full search and write the selected bit-widths into the graph
///
/// Only the bit-widths change here; thresholds must be re-selected afterwards
/// since a committed scheme is only valid for the bit-width it was fit at.
pub fn allocate_bits(
    graph: &mut Graph,
    info: &FrameworkInfo,
    report: &SensitivityReport,
    config: &MixedPrecisionConfig,
) -> Result<Allocation> {
    let groups = build_candidates(graph, info, report, config)?;
    let allocation = solve(&groups, &config.kpi, &config.search_mode)?;
    for (&id, &bits) in &allocation.bits {
        let node = graph.node_mut(id);
        node.qconfig.weights.bits = bits;
        node.qconfig.weights.scheme = None;
        node.qconfig.activation.bits = bits;
        node.qconfig.activation.scheme = None;
    }
    Ok(allocation)
}
