use std::any::Any;

use super::context::NodeContext;
use super::graph_impl::GraphError;
use super::types::AttributeKey;

pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Behaviour of a node in the graph.
///
/// The graph owns the node's attributes; a node only sees them through the
/// [`NodeContext`] handed to each callback.
pub trait Node: AsAny {
    fn type_name(&self) -> &'static str;

    /// Declares static attributes and affect edges. Called once, right after the
    /// node is inserted.
    fn init(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), GraphError> {
        Ok(())
    }

    /// Recomputes outputs. `attribute` is the dirty output whose read triggered
    /// the call. Inputs affecting the written outputs that are still dirty
    /// afterwards are pulled by the graph, whether or not the update read them.
    fn update(&mut self, ctx: &mut NodeContext<'_>, attribute: AttributeKey);

    /// Called when an attribute registered with
    /// [`NodeContext::catch_attribute_dirtied`] becomes dirty.
    fn attribute_dirtied(&mut self, _ctx: &mut NodeContext<'_>, _attribute: AttributeKey) {}

    fn allows_dynamic_attributes(&self) -> bool {
        false
    }

    /// When true, a new dynamic output is affected by every input the node has
    /// at the time it is added.
    fn wires_new_outputs(&self) -> bool {
        true
    }
}
