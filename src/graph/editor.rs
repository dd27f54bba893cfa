//! Rule-based graph editor
//!
//! Declarative predicate + action pairs applied once during graph
//! preparation, overriding default quantization choices before any search
//! runs. Rules are evaluated in order; later rules win on conflict.

use super::graph::Graph;
use super::node::{Node, OpKind};
use crate::qconfig::QuantMethod;
use crate::threshold::ErrorMetric;
use serde::{Deserialize, Serialize};

/// Predicate selecting the nodes a rule applies to
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NodeFilter {
    /// Exact node name match
    NameEquals(String),
    /// Name-scope match: node name contains the pattern
    NameContains(String),
    /// All nodes of one operation kind
    OpKindIs(OpKind),
}

impl NodeFilter {
    /// Whether a node matches this filter
    pub fn matches(&self, node: &Node) -> bool {
        match self {
            NodeFilter::NameEquals(name) => node.name == *name,
            NodeFilter::NameContains(pattern) => node.name.contains(pattern.as_str()),
            NodeFilter::OpKindIs(op) => node.op == *op,
        }
    }
}

/// Attribute override applied to matched nodes
///
/// Per-channel thresholds are a weight-only knob; activations are always
/// quantized per-tensor and configs saying otherwise fail validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EditAction {
    SetWeightBits(u8),
    SetActivationBits(u8),
    SetWeightMethod(QuantMethod),
    SetActivationMethod(QuantMethod),
    SetWeightMetric(ErrorMetric),
    SetActivationMetric(ErrorMetric),
    SetWeightPerChannel(bool),
    DisableWeightQuantization,
    DisableActivationQuantization,
    SetBiasCorrection(bool),
    SetShiftNegative(bool),
}

/// One editor rule: a filter plus the action applied to matches
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EditRule {
    pub filter: NodeFilter,
    pub action: EditAction,
}

impl EditRule {
    pub fn new(filter: NodeFilter, action: EditAction) -> Self {
        Self { filter, action }
    }

    fn apply_to(&self, node: &mut Node) {
        let cfg = &mut node.qconfig;
        match &self.action {
            EditAction::SetWeightBits(bits) => cfg.weights.bits = *bits,
            EditAction::SetActivationBits(bits) => cfg.activation.bits = *bits,
            EditAction::SetWeightMethod(m) => cfg.weights.method = *m,
            EditAction::SetActivationMethod(m) => cfg.activation.method = *m,
            EditAction::SetWeightMetric(m) => cfg.weights.metric = *m,
            EditAction::SetActivationMetric(m) => cfg.activation.metric = *m,
            EditAction::SetWeightPerChannel(v) => cfg.weights.per_channel = *v,
            EditAction::DisableWeightQuantization => cfg.weights.enabled = false,
            EditAction::DisableActivationQuantization => cfg.activation.enabled = false,
            EditAction::SetBiasCorrection(v) => cfg.bias_correction = *v,
            EditAction::SetShiftNegative(v) => cfg.shift_negative = *v,
        }
    }
}

/// Apply all rules to the graph, in order
pub fn apply_rules(graph: &mut Graph, rules: &[EditRule]) {
    for rule in rules {
        for node in graph.nodes_mut() {
            if rule.filter.matches(node) {
                rule.apply_to(node);
            }
        }
    }
}
