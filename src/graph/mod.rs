//! Graph abstraction layer
//!
//! Wraps the host computational graph as an explicit DAG: arena-allocated
//! nodes referenced by index, topological traversal, float and quantized
//! execution, the host op taxonomy, and the rule-based config editor.

mod editor;
mod framework;
#[allow(clippy::module_inception)]
mod graph;
mod node;

pub use editor::{apply_rules, EditAction, EditRule, NodeFilter};
pub use framework::FrameworkInfo;
pub use graph::{quantize_array, Graph};
pub use node::{Node, NodeId, OpKind};
