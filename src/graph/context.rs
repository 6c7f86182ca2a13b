use super::graph_impl::{Graph, GraphError};
use super::types::{AttributeDirection, AttributeKey, AttributeKind, NodeKey};
use crate::value::Value;

/// Access to the graph on behalf of a single node.
///
/// Reads through the context pull upstream values like [`Graph::value`]. Output
/// writes are recorded so the engine can clear their dirty flags once the
/// callback returns.
pub struct NodeContext<'g> {
    graph: &'g mut Graph,
    node: NodeKey,
    updated: Vec<AttributeKey>,
}

impl<'g> NodeContext<'g> {
    pub(crate) fn new(graph: &'g mut Graph, node: NodeKey) -> Self {
        Self {
            graph,
            node,
            updated: Vec::new(),
        }
    }

    pub(crate) fn into_updated(self) -> Vec<AttributeKey> {
        self.updated
    }

    pub fn node(&self) -> NodeKey {
        self.node
    }

    pub fn graph(&self) -> &Graph {
        &*self.graph
    }

    pub fn add_input_attribute(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<AttributeKey, GraphError> {
        self.graph.insert_attribute(
            self.node,
            name,
            AttributeDirection::Input,
            AttributeKind::Static,
            value.into(),
        )
    }

    pub fn add_output_attribute(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<AttributeKey, GraphError> {
        self.graph.insert_attribute(
            self.node,
            name,
            AttributeDirection::Output,
            AttributeKind::Static,
            value.into(),
        )
    }

    /// Registers `attribute` so that [`Node::attribute_dirtied`](super::Node::attribute_dirtied)
    /// fires whenever it becomes dirty.
    pub fn catch_attribute_dirtied(&mut self, attribute: AttributeKey) {
        self.graph.watch_attribute(self.node, attribute);
    }

    pub fn set_attribute_affect(
        &mut self,
        from: AttributeKey,
        to: AttributeKey,
    ) -> Result<bool, GraphError> {
        self.graph.set_attribute_affect(from, to)
    }

    /// Current value of `attribute`, recomputing it first if it is dirty.
    pub fn value(&mut self, attribute: AttributeKey) -> Option<&Value> {
        self.graph.value(attribute)
    }

    /// Stored value without triggering evaluation.
    pub fn stored_value(&self, attribute: AttributeKey) -> Option<&Value> {
        self.graph.stored_value(attribute)
    }

    /// Stores a freshly computed value on one of this node's attributes.
    pub fn set_output_value(&mut self, attribute: AttributeKey, value: impl Into<Value>) -> bool {
        if self.graph.owner(attribute) != Some(self.node) {
            return false;
        }
        if self.graph.write_computed(attribute, value.into()) {
            self.updated.push(attribute);
            true
        } else {
            false
        }
    }

    pub fn direction(&self, attribute: AttributeKey) -> Option<AttributeDirection> {
        self.graph.direction(attribute)
    }

    pub fn static_attributes(&self) -> Vec<AttributeKey> {
        self.graph.static_attributes(self.node).to_vec()
    }

    pub fn dynamic_attributes(&self) -> Vec<AttributeKey> {
        self.graph.dynamic_attributes(self.node).to_vec()
    }

    pub fn input_attributes(&self) -> Vec<AttributeKey> {
        self.graph.input_attributes(self.node)
    }

    pub fn output_attributes(&self) -> Vec<AttributeKey> {
        self.graph.output_attributes(self.node)
    }
}
