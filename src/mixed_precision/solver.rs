//! Budget-constrained bit-allocation solver
//!
//! Exact 0/1 multiple-choice selection: one bit-width per node, minimizing
//! total weighted distortion subject to the resource budget. Solved by
//! depth-first branch and bound with admissible bounds (suffix minima of
//! distortion and cost), which is exact and deterministic: nodes are visited
//! in index order, candidates in descending bit-width order, and equal
//! objectives resolve toward the higher aggregate bit-width.

use super::candidate::CandidateConfig;
use super::kpi::{Kpi, ResourceCost};
use super::SearchMode;
use crate::error::{Error, Result};
use crate::graph::NodeId;
use std::collections::BTreeMap;

/// Committed result of a solver run
#[derive(Clone, Debug)]
pub struct Allocation {
    /// Selected bit-width per node
    pub bits: BTreeMap<NodeId, u8>,
    /// Total distortion of the selection
    pub distortion: f64,
    /// Aggregated resource cost
    pub cost: ResourceCost,
    /// Sum of selected bit-widths (tie-break witness)
    pub total_bits: u32,
}

/// Select one candidate per node minimizing total distortion within budget
///
/// `candidates` holds one non-empty group per eligible node. Returns
/// [`Error::Infeasible`] when no selection satisfies the budget; a partial or
/// degraded allocation is never produced.
pub fn solve(
    candidates: &[Vec<CandidateConfig>],
    kpi: &Kpi,
    mode: &SearchMode,
) -> Result<Allocation> {
    kpi.validate()?;
    for group in candidates {
        if group.is_empty() {
            return Err(Error::Config(
                "node with empty candidate bit-width set".into(),
            ));
        }
    }
    if candidates.is_empty() {
        return Ok(Allocation {
            bits: BTreeMap::new(),
            distortion: 0.0,
            cost: ResourceCost::zero(),
            total_bits: 0,
        });
    }

    // Candidates in descending bit-width order per node
    let mut groups: Vec<Vec<CandidateConfig>> = candidates.to_vec();
    for group in &mut groups {
        group.sort_by(|a, b| b.bits.cmp(&a.bits));
    }

    // Admissible suffix bounds over the remaining nodes
    let n = groups.len();
    let mut suffix_min_dist = vec![0.0f64; n + 1];
    let mut suffix_min_cost = vec![ResourceCost::zero(); n + 1];
    for level in (0..n).rev() {
        let group = &groups[level];
        let min_dist = group
            .iter()
            .map(|c| c.distortion)
            .fold(f64::INFINITY, f64::min);
        let min_cost = group
            .iter()
            .map(|c| c.cost)
            .reduce(|a, b| a.min_with(&b))
            .expect("non-empty group");
        suffix_min_dist[level] = suffix_min_dist[level + 1] + min_dist;
        suffix_min_cost[level] = suffix_min_cost[level + 1].plus(&min_cost);
    }

    // Cheapest possible allocation must fit, otherwise the budget is
    // structurally infeasible and we can report it precisely
    if !feasible(kpi, mode, &suffix_min_cost[0]) {
        return Err(Error::Infeasible(format!(
            "budget {kpi:?} below minimum achievable cost {:?} at the lowest candidate bit-widths",
            suffix_min_cost[0]
        )));
    }

    let mut best: Option<Allocation> = None;
    let mut selection: Vec<usize> = Vec::with_capacity(n);
    dfs(
        &groups,
        kpi,
        mode,
        &suffix_min_dist,
        &suffix_min_cost,
        0,
        ResourceCost::zero(),
        0.0,
        0,
        &mut selection,
        &mut best,
    );

    best.ok_or_else(|| {
        Error::Infeasible(format!(
            "no bit-width assignment satisfies budget {kpi:?}"
        ))
    })
}

fn feasible(kpi: &Kpi, mode: &SearchMode, cost: &ResourceCost) -> bool {
    match mode {
        SearchMode::StrictConstraints => kpi.fits(cost),
        SearchMode::WeightedObjective {
            weights_memory,
            activation_memory,
            bops,
        } => {
            let mut scalar_cost = 0.0;
            let mut scalar_budget = 0.0;
            let mut constrained = false;
            if let Some(b) = kpi.weights_memory {
                scalar_cost += weights_memory * cost.weights_memory;
                scalar_budget += weights_memory * b;
                constrained = true;
            }
            if let Some(b) = kpi.activation_memory {
                scalar_cost += activation_memory * cost.activation_memory;
                scalar_budget += activation_memory * b;
                constrained = true;
            }
            if let Some(b) = kpi.bops {
                scalar_cost += bops * cost.bops;
                scalar_budget += bops * b;
                constrained = true;
            }
            !constrained || scalar_cost <= scalar_budget
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn dfs(
    groups: &[Vec<CandidateConfig>],
    kpi: &Kpi,
    mode: &SearchMode,
    suffix_min_dist: &[f64],
    suffix_min_cost: &[ResourceCost],
    level: usize,
    cost: ResourceCost,
    distortion: f64,
    total_bits: u32,
    selection: &mut Vec<usize>,
    best: &mut Option<Allocation>,
) {
    // Bound: even the cheapest completion cannot become feasible
    let optimistic_cost = cost.plus(&suffix_min_cost[level]);
    if !feasible(kpi, mode, &optimistic_cost) {
        return;
    }
    // Bound: even the best completion cannot beat the incumbent
    if let Some(b) = best {
        if distortion + suffix_min_dist[level] > b.distortion {
            return;
        }
    }

    if level == groups.len() {
        if !feasible(kpi, mode, &cost) {
            return;
        }
        let better = match best {
            None => true,
            Some(b) => {
                distortion < b.distortion
                    || (distortion == b.distortion && total_bits > b.total_bits)
            }
        };
        if better {
            let bits = groups
                .iter()
                .zip(selection.iter())
                .map(|(group, &idx)| (group[idx].node, group[idx].bits))
                .collect();
            *best = Some(Allocation {
                bits,
                distortion,
                cost,
                total_bits,
            });
        }
        return;
    }

    for (idx, cand) in groups[level].iter().enumerate() {
        selection.push(idx);
        dfs(
            groups,
            kpi,
            mode,
            suffix_min_dist,
            suffix_min_cost,
            level + 1,
            cost.plus(&cand.cost),
            distortion + cand.distortion,
            total_bits + cand.bits as u32,
            selection,
            best,
        );
        selection.pop();
    }
}
