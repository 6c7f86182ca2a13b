mod context;
mod graph_impl;
mod helpers;
pub mod topology;
mod traits;
pub mod types;

#[cfg(test)]
mod tests;

pub use context::NodeContext;
pub use graph_impl::{Graph, GraphError, NodeData};
pub use helpers::{FunctionNode, PassThrough};
pub use traits::{AsAny, Node};
pub use types::{AttributeDirection, AttributeKey, AttributeKind, GraphStats, NodeKey};
