use std::collections::HashMap;
use std::fmt;

use slotmap::{SecondaryMap, SlotMap};
use thiserror::Error;
use tracing::{debug, trace};

use super::context::NodeContext;
use super::topology::{self, TopologyError};
use super::traits::Node;
use super::types::{
    AttributeData, AttributeDirection, AttributeKey, AttributeKind, GraphStats, NodeKey,
};
use crate::value::Value;

impl fmt::Debug for NodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeData")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("node", &"<Node>")
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("static_attributes", &self.static_attributes)
            .field("dynamic_attributes", &self.dynamic_attributes)
            .finish()
    }
}

pub struct NodeData {
    pub name: String,
    pub type_name: &'static str,
    pub parent: Option<NodeKey>,
    pub children: Vec<NodeKey>,
    pub static_attributes: Vec<AttributeKey>,
    pub dynamic_attributes: Vec<AttributeKey>,
    pub allows_dynamic_attributes: bool,
    pub wires_new_outputs: bool,
    watched: Vec<AttributeKey>,
    // Taken out while one of its callbacks runs.
    node: Option<Box<dyn Node>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node {0:?} not found")]
    NodeNotFound(NodeKey),
    #[error("attribute {0:?} not found")]
    AttributeNotFound(AttributeKey),
    #[error("node '{node}' already has an attribute named '{name}'")]
    DuplicateAttribute { node: String, name: String },
    #[error("node '{0}' does not accept dynamic attributes")]
    DynamicAttributesNotAllowed(String),
    #[error("attribute '{0}' is an output and cannot be set directly")]
    NotAnInput(String),
    #[error("attribute '{0}' is driven by a connection and cannot be set directly")]
    DrivenInput(String),
    #[error("cannot connect '{from}' to '{to}': {reason}")]
    InvalidConnection {
        from: String,
        to: String,
        reason: &'static str,
    },
    #[error("output '{from}' cannot affect input '{to}' of the same node")]
    OutputAffectsOwnInput { from: String, to: String },
    #[error("affect would close a cycle through {} attributes", .0.len())]
    CycleDetected(Vec<AttributeKey>),
}

#[derive(Debug, Default)]
pub struct Graph {
    pub nodes: SlotMap<NodeKey, NodeData>,
    pub attributes: SlotMap<AttributeKey, AttributeData>,
    affects: SecondaryMap<AttributeKey, Vec<AttributeKey>>,
    affected_by: SecondaryMap<AttributeKey, Vec<AttributeKey>>,
    attribute_to_node: SecondaryMap<AttributeKey, NodeKey>,
    // driven input -> driving output
    sources: SecondaryMap<AttributeKey, AttributeKey>,
    stats: GraphStats,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node, runs its `init` to declare static attributes, and links it
    /// under `parent`. A failing `init` leaves no trace of the node behind.
    pub fn add_node<T: Node + 'static>(
        &mut self,
        name: impl Into<String>,
        node: T,
        parent: Option<NodeKey>,
    ) -> Result<NodeKey, GraphError> {
        if let Some(parent) = parent {
            if !self.nodes.contains_key(parent) {
                return Err(GraphError::NodeNotFound(parent));
            }
        }

        let node_key = self.nodes.insert(NodeData {
            name: name.into(),
            type_name: node.type_name(),
            parent,
            children: Vec::new(),
            static_attributes: Vec::new(),
            dynamic_attributes: Vec::new(),
            allows_dynamic_attributes: node.allows_dynamic_attributes(),
            wires_new_outputs: node.wires_new_outputs(),
            watched: Vec::new(),
            node: None,
        });

        if let Some(parent_data) = parent.and_then(|p| self.nodes.get_mut(p)) {
            parent_data.children.push(node_key);
        }

        let mut node: Box<dyn Node> = Box::new(node);
        let result = {
            let mut ctx = NodeContext::new(self, node_key);
            node.init(&mut ctx)
        };

        if let Err(err) = result {
            self.remove_node(node_key);
            return Err(err);
        }

        if let Some(data) = self.nodes.get_mut(node_key) {
            data.node = Some(node);
        }

        Ok(node_key)
    }

    /// Removes a node together with its children and every attribute they own.
    pub fn remove_node(&mut self, node_key: NodeKey) -> bool {
        let Some(node) = self.nodes.remove(node_key) else {
            return false;
        };

        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|&child| child != node_key);
        }

        for child in node.children {
            self.remove_node(child);
        }

        for attribute in node
            .static_attributes
            .into_iter()
            .chain(node.dynamic_attributes)
        {
            self.remove_attribute_edges(attribute);
            self.attributes.remove(attribute);
            self.attribute_to_node.remove(attribute);
        }

        true
    }

    pub(crate) fn insert_attribute(
        &mut self,
        node_key: NodeKey,
        name: &str,
        direction: AttributeDirection,
        kind: AttributeKind,
        value: Value,
    ) -> Result<AttributeKey, GraphError> {
        let node = self
            .nodes
            .get(node_key)
            .ok_or(GraphError::NodeNotFound(node_key))?;

        if self.find_attribute(node_key, name).is_some() {
            return Err(GraphError::DuplicateAttribute {
                node: node.name.clone(),
                name: name.to_owned(),
            });
        }

        let key = self
            .attributes
            .insert(AttributeData::new(name, direction, kind, value));
        self.attribute_to_node.insert(key, node_key);

        if let Some(node) = self.nodes.get_mut(node_key) {
            match kind {
                AttributeKind::Static => node.static_attributes.push(key),
                AttributeKind::Dynamic => node.dynamic_attributes.push(key),
            }
        }

        Ok(key)
    }

    /// Appends a runtime attribute. A new output is wired to every input the node
    /// currently has (unless the node opts out) and starts dirty.
    pub fn add_dynamic_attribute(
        &mut self,
        node_key: NodeKey,
        name: &str,
        direction: AttributeDirection,
        value: impl Into<Value>,
    ) -> Result<AttributeKey, GraphError> {
        let node = self
            .nodes
            .get(node_key)
            .ok_or(GraphError::NodeNotFound(node_key))?;

        if !node.allows_dynamic_attributes {
            return Err(GraphError::DynamicAttributesNotAllowed(node.name.clone()));
        }

        let wired_inputs = if direction.is_output() && node.wires_new_outputs {
            self.input_attributes(node_key)
        } else {
            Vec::new()
        };

        let key = self.insert_attribute(
            node_key,
            name,
            direction,
            AttributeKind::Dynamic,
            value.into(),
        )?;

        for input in wired_inputs {
            self.set_attribute_affect(input, key)?;
        }

        if direction.is_output() {
            self.set_dirty(key);
        }

        Ok(key)
    }

    pub fn remove_dynamic_attribute(&mut self, node_key: NodeKey, attribute: AttributeKey) -> bool {
        let Some(node) = self.nodes.get_mut(node_key) else {
            return false;
        };
        let Some(position) = node.dynamic_attributes.iter().position(|&a| a == attribute) else {
            return false;
        };

        node.dynamic_attributes.remove(position);
        node.watched.retain(|&a| a != attribute);

        self.remove_attribute_edges(attribute);
        self.attributes.remove(attribute);
        self.attribute_to_node.remove(attribute);

        true
    }

    fn remove_attribute_edges(&mut self, attribute: AttributeKey) {
        for target in self.affects.remove(attribute).unwrap_or_default() {
            if let Some(sources) = self.affected_by.get_mut(target) {
                sources.retain(|&source| source != attribute);
            }
        }
        for source in self.affected_by.remove(attribute).unwrap_or_default() {
            if let Some(targets) = self.affects.get_mut(source) {
                targets.retain(|&target| target != attribute);
            }
        }

        self.sources.remove(attribute);
        let driven: Vec<AttributeKey> = self
            .sources
            .iter()
            .filter(|(_, source)| **source == attribute)
            .map(|(input, _)| input)
            .collect();
        for input in driven {
            self.sources.remove(input);
        }
    }

    pub(crate) fn watch_attribute(&mut self, node_key: NodeKey, attribute: AttributeKey) {
        if let Some(node) = self.nodes.get_mut(node_key) {
            if !node.watched.contains(&attribute) {
                node.watched.push(attribute);
            }
        }
    }

    /// Declares that a change to `from` makes `to` stale. Returns `Ok(false)` when
    /// the edge already exists. Edges that would close a cycle are rejected.
    pub fn set_attribute_affect(
        &mut self,
        from: AttributeKey,
        to: AttributeKey,
    ) -> Result<bool, GraphError> {
        let from_data = self
            .attributes
            .get(from)
            .ok_or(GraphError::AttributeNotFound(from))?;
        let to_data = self
            .attributes
            .get(to)
            .ok_or(GraphError::AttributeNotFound(to))?;

        if self.affects(from).contains(&to) {
            return Ok(false);
        }

        if from_data.direction.is_output()
            && to_data.direction.is_input()
            && self.owner(from) == self.owner(to)
        {
            return Err(GraphError::OutputAffectsOwnInput {
                from: from_data.name.clone(),
                to: to_data.name.clone(),
            });
        }

        if let Some(path) = topology::find_path(
            to,
            &from,
            |key| self.affects(*key).to_vec(),
            |key| self.affected_by(*key).to_vec(),
        ) {
            return Err(GraphError::CycleDetected(path));
        }

        if let Some(entry) = self.affects.entry(from) {
            entry.or_default().push(to);
        }
        if let Some(entry) = self.affected_by.entry(to) {
            entry.or_default().push(from);
        }

        Ok(true)
    }

    pub fn remove_attribute_affect(&mut self, from: AttributeKey, to: AttributeKey) -> bool {
        let Some(targets) = self.affects.get_mut(from) else {
            return false;
        };
        let original_len = targets.len();
        targets.retain(|&target| target != to);
        if original_len == targets.len() {
            return false;
        }
        if let Some(sources) = self.affected_by.get_mut(to) {
            sources.retain(|&source| source != from);
        }
        true
    }

    /// Attributes whose change makes `attribute` stale.
    pub fn affected_by(&self, attribute: AttributeKey) -> &[AttributeKey] {
        self.affected_by
            .get(attribute)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn affects(&self, attribute: AttributeKey) -> &[AttributeKey] {
        self.affects
            .get(attribute)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Drives input `to` from output `from`. An existing connection on `to` is
    /// replaced. Reading `to` afterwards pulls `from`.
    pub fn connect(&mut self, from: AttributeKey, to: AttributeKey) -> Result<(), GraphError> {
        let from_data = self
            .attributes
            .get(from)
            .ok_or(GraphError::AttributeNotFound(from))?;
        let to_data = self
            .attributes
            .get(to)
            .ok_or(GraphError::AttributeNotFound(to))?;

        let reason = if !from_data.direction.is_output() {
            Some("source must be an output")
        } else if !to_data.direction.is_input() {
            Some("target must be an input")
        } else if self.owner(from) == self.owner(to) {
            Some("source and target belong to the same node")
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(GraphError::InvalidConnection {
                from: from_data.name.clone(),
                to: to_data.name.clone(),
                reason,
            });
        }

        if let Some(previous) = self.sources.get(to).copied() {
            if previous == from {
                return Ok(());
            }
            self.disconnect(to);
        }

        self.set_attribute_affect(from, to)?;
        self.sources.insert(to, from);
        self.set_dirty(to);

        Ok(())
    }

    /// Detaches a driven input. The input keeps the last value it pulled.
    pub fn disconnect(&mut self, to: AttributeKey) -> bool {
        let Some(from) = self.sources.remove(to) else {
            return false;
        };
        self.remove_attribute_affect(from, to);
        self.set_dirty(to);
        true
    }

    pub fn source_of(&self, input: AttributeKey) -> Option<AttributeKey> {
        self.sources.get(input).copied()
    }

    /// External write to an input. Outputs and driven inputs are rejected.
    pub fn set_value(
        &mut self,
        attribute: AttributeKey,
        value: impl Into<Value>,
    ) -> Result<(), GraphError> {
        let driven = self.sources.contains_key(attribute);
        let data = self
            .attributes
            .get_mut(attribute)
            .ok_or(GraphError::AttributeNotFound(attribute))?;

        if data.direction.is_output() {
            return Err(GraphError::NotAnInput(data.name.clone()));
        }
        if driven {
            return Err(GraphError::DrivenInput(data.name.clone()));
        }

        data.value = value.into();
        self.set_dirty(attribute);
        Ok(())
    }

    /// Marks `attribute` and everything downstream of it dirty. Attributes that
    /// are already dirty stop the walk, so repeated invalidation of a stale
    /// subgraph costs nothing.
    pub fn set_dirty(&mut self, attribute: AttributeKey) {
        let mut newly_dirty = Vec::new();
        let mut stack = vec![attribute];

        while let Some(key) = stack.pop() {
            let Some(data) = self.attributes.get_mut(key) else {
                continue;
            };
            if data.dirty {
                continue;
            }
            data.dirty = true;
            self.stats.propagations += 1;
            trace!(attribute = %data.name, "marked dirty");

            newly_dirty.push(key);
            if let Some(targets) = self.affects.get(key) {
                stack.extend(targets.iter().rev().copied());
            }
        }

        self.notify_dirtied(&newly_dirty);
    }

    fn notify_dirtied(&mut self, attributes: &[AttributeKey]) {
        for &attribute in attributes {
            let Some(&node_key) = self.attribute_to_node.get(attribute) else {
                continue;
            };
            let watched = self
                .nodes
                .get(node_key)
                .is_some_and(|node| node.watched.contains(&attribute));
            if watched {
                self.with_node(node_key, |node, ctx| node.attribute_dirtied(ctx, attribute));
            }
        }
    }

    /// Runs `f` with the node's behaviour temporarily detached from the arena.
    /// Returns `None` when the node is gone or already inside a callback.
    fn with_node<R>(
        &mut self,
        node_key: NodeKey,
        f: impl FnOnce(&mut dyn Node, &mut NodeContext<'_>) -> R,
    ) -> Option<(R, Vec<AttributeKey>)> {
        let mut node = self.nodes.get_mut(node_key)?.node.take()?;

        let (result, updated) = {
            let mut ctx = NodeContext::new(self, node_key);
            let result = f(node.as_mut(), &mut ctx);
            (result, ctx.into_updated())
        };

        if let Some(data) = self.nodes.get_mut(node_key) {
            data.node = Some(node);
        }

        Some((result, updated))
    }

    /// Current value of `attribute`, recomputing it first if it is dirty.
    pub fn value(&mut self, attribute: AttributeKey) -> Option<&Value> {
        self.evaluate(attribute);
        self.stored_value(attribute)
    }

    /// Stored value without triggering evaluation.
    pub fn stored_value(&self, attribute: AttributeKey) -> Option<&Value> {
        self.attributes.get(attribute).map(|data| &data.value)
    }

    fn evaluate(&mut self, attribute: AttributeKey) {
        let Some(data) = self.attributes.get(attribute) else {
            return;
        };
        if !data.dirty {
            return;
        }
        let direction = data.direction;

        if let Some(source) = self.sources.get(attribute).copied() {
            self.evaluate(source);
            let pulled = self.stored_value(source).cloned();
            if let Some(data) = self.attributes.get_mut(attribute) {
                if let Some(value) = pulled {
                    data.value = value;
                }
                data.dirty = false;
            }
            return;
        }

        match direction {
            AttributeDirection::Input => self.mark_clean(attribute),
            AttributeDirection::Output => self.recompute(attribute),
        }
    }

    fn recompute(&mut self, attribute: AttributeKey) {
        let Some(&node_key) = self.attribute_to_node.get(attribute) else {
            self.mark_clean(attribute);
            return;
        };

        match self.with_node(node_key, |node, ctx| node.update(ctx, attribute)) {
            Some(((), updated)) => {
                self.stats.recomputes += 1;
                debug!(
                    node = ?node_key,
                    attribute = ?attribute,
                    updated = updated.len(),
                    "node recomputed"
                );
                self.mark_clean(attribute);
                for &key in &updated {
                    self.mark_clean(key);
                }

                // Pull inputs the update left stale.
                let stale: Vec<AttributeKey> = std::iter::once(attribute)
                    .chain(updated)
                    .flat_map(|key| self.affected_by(key).to_vec())
                    .filter(|&input| self.is_dirty(input))
                    .collect();
                for input in stale {
                    self.evaluate(input);
                }
            }
            // Reentrant read of an attribute whose node is mid-update: the outer
            // update owns the dirty flag.
            None => debug!(node = ?node_key, "skipping reentrant update"),
        }
    }

    fn mark_clean(&mut self, attribute: AttributeKey) {
        if let Some(data) = self.attributes.get_mut(attribute) {
            data.dirty = false;
        }
    }

    /// Stores a value produced by a node. Writing an attribute that was not stale
    /// invalidates its downstream instead.
    pub(crate) fn write_computed(&mut self, attribute: AttributeKey, value: Value) -> bool {
        let Some(data) = self.attributes.get_mut(attribute) else {
            return false;
        };
        data.value = value;

        if !data.dirty {
            let targets = self.affects(attribute).to_vec();
            for target in targets {
                self.set_dirty(target);
            }
        }

        true
    }

    pub fn is_dirty(&self, attribute: AttributeKey) -> bool {
        self.attributes
            .get(attribute)
            .is_some_and(|data| data.dirty)
    }

    pub fn find_attribute(&self, node_key: NodeKey, name: &str) -> Option<AttributeKey> {
        let node = self.nodes.get(node_key)?;
        node.static_attributes
            .iter()
            .chain(node.dynamic_attributes.iter())
            .copied()
            .find(|&key| {
                self.attributes
                    .get(key)
                    .is_some_and(|data| data.name == name)
            })
    }

    /// `base` if free on the node, otherwise `base` followed by the first free number.
    pub fn unique_attribute_name(&self, node_key: NodeKey, base: &str) -> String {
        if self.find_attribute(node_key, base).is_none() {
            return base.to_owned();
        }
        let mut suffix = 1;
        loop {
            let candidate = format!("{}{}", base, suffix);
            if self.find_attribute(node_key, &candidate).is_none() {
                return candidate;
            }
            suffix += 1;
        }
    }

    pub fn attribute_name(&self, attribute: AttributeKey) -> Option<&str> {
        self.attributes.get(attribute).map(|data| data.name.as_str())
    }

    pub fn direction(&self, attribute: AttributeKey) -> Option<AttributeDirection> {
        self.attributes.get(attribute).map(|data| data.direction)
    }

    pub fn owner(&self, attribute: AttributeKey) -> Option<NodeKey> {
        self.attribute_to_node.get(attribute).copied()
    }

    pub fn static_attributes(&self, node_key: NodeKey) -> &[AttributeKey] {
        self.nodes
            .get(node_key)
            .map(|node| node.static_attributes.as_slice())
            .unwrap_or(&[])
    }

    pub fn dynamic_attributes(&self, node_key: NodeKey) -> &[AttributeKey] {
        self.nodes
            .get(node_key)
            .map(|node| node.dynamic_attributes.as_slice())
            .unwrap_or(&[])
    }

    fn attributes_with_direction(
        &self,
        node_key: NodeKey,
        direction: AttributeDirection,
    ) -> Vec<AttributeKey> {
        self.static_attributes(node_key)
            .iter()
            .chain(self.dynamic_attributes(node_key))
            .copied()
            .filter(|&key| self.direction(key) == Some(direction))
            .collect()
    }

    /// Static inputs followed by dynamic inputs, each in declaration order.
    pub fn input_attributes(&self, node_key: NodeKey) -> Vec<AttributeKey> {
        self.attributes_with_direction(node_key, AttributeDirection::Input)
    }

    pub fn output_attributes(&self, node_key: NodeKey) -> Vec<AttributeKey> {
        self.attributes_with_direction(node_key, AttributeDirection::Output)
    }

    pub fn node_name(&self, node_key: NodeKey) -> Option<&str> {
        self.nodes.get(node_key).map(|node| node.name.as_str())
    }

    pub fn node_type_name(&self, node_key: NodeKey) -> Option<&'static str> {
        self.nodes.get(node_key).map(|node| node.type_name)
    }

    pub fn parent(&self, node_key: NodeKey) -> Option<NodeKey> {
        self.nodes.get(node_key).and_then(|node| node.parent)
    }

    pub fn children(&self, node_key: NodeKey) -> &[NodeKey] {
        self.nodes
            .get(node_key)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Typed access to a node's behaviour, e.g. to read a compute node's build info.
    pub fn node_as<T: Node>(&self, node_key: NodeKey) -> Option<&T> {
        let node: &dyn Node = self.nodes.get(node_key)?.node.as_deref()?;
        node.as_any().downcast_ref::<T>()
    }

    pub fn node_as_mut<T: Node>(&mut self, node_key: NodeKey) -> Option<&mut T> {
        let node: &mut dyn Node = self.nodes.get_mut(node_key)?.node.as_deref_mut()?;
        node.as_any_mut().downcast_mut::<T>()
    }

    /// Attributes ordered so that every affect edge points forward.
    pub fn validate(&self) -> Result<Vec<AttributeKey>, GraphError> {
        let mut dependencies: HashMap<AttributeKey, Vec<AttributeKey>> = HashMap::new();
        for (from, targets) in self.affects.iter() {
            for &to in targets {
                dependencies.entry(to).or_default().push(from);
            }
        }

        topological_sort_attributes(self.attributes.keys(), &dependencies)
    }

    pub fn stats(&self) -> GraphStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = GraphStats::default();
    }
}

fn topological_sort_attributes(
    attributes: impl Iterator<Item = AttributeKey>,
    dependencies: &HashMap<AttributeKey, Vec<AttributeKey>>,
) -> Result<Vec<AttributeKey>, GraphError> {
    topology::topological_sort(attributes, |key| {
        dependencies.get(key).cloned().unwrap_or_default()
    })
    .map_err(|e| match e {
        TopologyError::CycleDetected { path } => GraphError::CycleDetected(path),
    })
}
