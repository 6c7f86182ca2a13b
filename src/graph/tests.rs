use super::*;
use crate::value::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Doubler {
    updates: Arc<AtomicUsize>,
    input: AttributeKey,
    output: AttributeKey,
}

impl Doubler {
    fn new(updates: Arc<AtomicUsize>) -> Self {
        Self {
            updates,
            input: AttributeKey::default(),
            output: AttributeKey::default(),
        }
    }
}

impl Node for Doubler {
    fn type_name(&self) -> &'static str {
        "Doubler"
    }

    fn init(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), GraphError> {
        self.input = ctx.add_input_attribute("input", 0.0)?;
        self.output = ctx.add_output_attribute("output", 0.0)?;
        ctx.set_attribute_affect(self.input, self.output)?;
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext<'_>, _attribute: AttributeKey) {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let value = ctx
            .value(self.input)
            .and_then(Value::as_float)
            .unwrap_or_default();
        ctx.set_output_value(self.output, value * 2.0);
    }
}

/// Two outputs written by a single update.
#[derive(Debug)]
struct SumAndProduct {
    updates: Arc<AtomicUsize>,
    keys: Vec<AttributeKey>,
}

impl Node for SumAndProduct {
    fn type_name(&self) -> &'static str {
        "SumAndProduct"
    }

    fn init(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), GraphError> {
        let a = ctx.add_input_attribute("a", 0.0)?;
        let b = ctx.add_input_attribute("b", 0.0)?;
        let sum = ctx.add_output_attribute("sum", 0.0)?;
        let product = ctx.add_output_attribute("product", 0.0)?;
        for input in [a, b] {
            for output in [sum, product] {
                ctx.set_attribute_affect(input, output)?;
            }
        }
        self.keys = vec![a, b, sum, product];
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext<'_>, _attribute: AttributeKey) {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let a = ctx.value(self.keys[0]).and_then(Value::as_float).unwrap_or_default();
        let b = ctx.value(self.keys[1]).and_then(Value::as_float).unwrap_or_default();
        ctx.set_output_value(self.keys[2], a + b);
        ctx.set_output_value(self.keys[3], a * b);
    }
}

/// Accepts dynamic attributes and copies the first float input to every output.
#[derive(Debug, Default)]
struct Dynamic;

impl Node for Dynamic {
    fn type_name(&self) -> &'static str {
        "Dynamic"
    }

    fn init(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), GraphError> {
        ctx.add_input_attribute("seed", 0.0)?;
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext<'_>, _attribute: AttributeKey) {
        let inputs = ctx.input_attributes();
        let value = inputs
            .first()
            .and_then(|&input| ctx.value(input).cloned())
            .unwrap_or_default();
        for output in ctx.output_attributes() {
            ctx.set_output_value(output, value.clone());
        }
    }

    fn allows_dynamic_attributes(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct Watcher {
    dirtied: Arc<AtomicUsize>,
}

impl Node for Watcher {
    fn type_name(&self) -> &'static str {
        "Watcher"
    }

    fn init(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), GraphError> {
        let source = ctx.add_input_attribute("source", "")?;
        ctx.catch_attribute_dirtied(source);
        Ok(())
    }

    fn update(&mut self, _ctx: &mut NodeContext<'_>, _attribute: AttributeKey) {}

    fn attribute_dirtied(&mut self, _ctx: &mut NodeContext<'_>, _attribute: AttributeKey) {
        self.dirtied.fetch_add(1, Ordering::SeqCst);
    }
}

/// A single input, used to build long attribute chains.
#[derive(Debug, Default)]
struct Slot;

impl Node for Slot {
    fn type_name(&self) -> &'static str {
        "Slot"
    }

    fn init(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), GraphError> {
        ctx.add_input_attribute("value", 0.0)?;
        Ok(())
    }

    fn update(&mut self, _ctx: &mut NodeContext<'_>, _attribute: AttributeKey) {}
}

/// Writes a constant without looking at its input.
#[derive(Debug, Default)]
struct Constant {
    input: AttributeKey,
    output: AttributeKey,
}

impl Node for Constant {
    fn type_name(&self) -> &'static str {
        "Constant"
    }

    fn init(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), GraphError> {
        self.input = ctx.add_input_attribute("input", 0.0)?;
        self.output = ctx.add_output_attribute("output", 0.0)?;
        ctx.set_attribute_affect(self.input, self.output)?;
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext<'_>, _attribute: AttributeKey) {
        ctx.set_output_value(self.output, 1.0);
    }
}

fn slot_chain(graph: &mut Graph, len: usize) -> Vec<AttributeKey> {
    (0..len)
        .map(|i| {
            let node = graph.add_node(format!("slot{}", i), Slot, None).unwrap();
            attr(graph, node, "value")
        })
        .collect()
}

#[derive(Debug, Default)]
struct BrokenInit;

impl Node for BrokenInit {
    fn type_name(&self) -> &'static str {
        "BrokenInit"
    }

    fn init(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), GraphError> {
        ctx.add_input_attribute("value", 0.0)?;
        ctx.add_input_attribute("value", 0.0)?;
        Ok(())
    }

    fn update(&mut self, _ctx: &mut NodeContext<'_>, _attribute: AttributeKey) {}
}

fn attr(graph: &Graph, node: NodeKey, name: &str) -> AttributeKey {
    graph
        .find_attribute(node, name)
        .unwrap_or_else(|| panic!("missing attribute {}", name))
}

fn float(graph: &mut Graph, attribute: AttributeKey) -> f32 {
    graph.value(attribute).and_then(Value::as_float).unwrap()
}

#[test]
fn test_chain_pulls_through_connections() {
    let mut graph = Graph::new();
    let updates = Arc::new(AtomicUsize::new(0));

    let a = graph.add_node("a", Doubler::new(updates.clone()), None).unwrap();
    let b = graph.add_node("b", Doubler::new(updates.clone()), None).unwrap();
    let c = graph.add_node("c", Doubler::new(updates.clone()), None).unwrap();

    graph.connect(attr(&graph, a, "output"), attr(&graph, b, "input")).unwrap();
    graph.connect(attr(&graph, b, "output"), attr(&graph, c, "input")).unwrap();

    graph.set_value(attr(&graph, a, "input"), 1.5).unwrap();

    let c_out = attr(&graph, c, "output");
    assert_eq!(float(&mut graph, c_out), 12.0);
    assert_eq!(updates.load(Ordering::SeqCst), 3);
}

#[test]
fn test_clean_read_does_not_recompute() {
    let mut graph = Graph::new();
    let updates = Arc::new(AtomicUsize::new(0));

    let a = graph.add_node("a", Doubler::new(updates.clone()), None).unwrap();
    let input = attr(&graph, a, "input");
    let output = attr(&graph, a, "output");

    graph.set_value(input, 4.0).unwrap();
    assert!(graph.is_dirty(output));
    assert_eq!(float(&mut graph, output), 8.0);
    assert!(!graph.is_dirty(output));

    assert_eq!(float(&mut graph, output), 8.0);
    assert_eq!(float(&mut graph, output), 8.0);
    assert_eq!(updates.load(Ordering::SeqCst), 1);
}

#[test]
fn test_propagation_stops_at_dirty_attributes() {
    let mut graph = Graph::new();
    let updates = Arc::new(AtomicUsize::new(0));

    let a = graph.add_node("a", Doubler::new(updates.clone()), None).unwrap();
    let b = graph.add_node("b", Doubler::new(updates.clone()), None).unwrap();
    let c = graph.add_node("c", Doubler::new(updates), None).unwrap();

    graph.connect(attr(&graph, a, "output"), attr(&graph, b, "input")).unwrap();
    graph.connect(attr(&graph, b, "output"), attr(&graph, c, "input")).unwrap();

    let a_in = attr(&graph, a, "input");
    let c_out = attr(&graph, c, "output");
    graph.value(c_out);
    graph.reset_stats();

    graph.set_value(a_in, 1.0).unwrap();
    assert_eq!(graph.stats().propagations, 6);

    // Everything downstream is already stale.
    graph.set_value(a_in, 2.0).unwrap();
    assert_eq!(graph.stats().propagations, 6);

    assert_eq!(float(&mut graph, c_out), 16.0);
    assert_eq!(graph.stats().recomputes, 3);
}

#[test]
fn test_single_update_serves_all_outputs() {
    let mut graph = Graph::new();
    let updates = Arc::new(AtomicUsize::new(0));

    let node = graph
        .add_node(
            "math",
            SumAndProduct {
                updates: updates.clone(),
                keys: Vec::new(),
            },
            None,
        )
        .unwrap();

    graph.set_value(attr(&graph, node, "a"), 3.0).unwrap();
    graph.set_value(attr(&graph, node, "b"), 4.0).unwrap();

    let sum = attr(&graph, node, "sum");
    let product = attr(&graph, node, "product");
    assert_eq!(float(&mut graph, sum), 7.0);
    assert_eq!(float(&mut graph, product), 12.0);
    assert_eq!(updates.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dynamic_output_wired_to_existing_inputs_only() {
    let mut graph = Graph::new();
    let node = graph.add_node("dyn", Dynamic, None).unwrap();
    let seed = attr(&graph, node, "seed");

    let early = graph
        .add_dynamic_attribute(node, "early", AttributeDirection::Input, 0.0)
        .unwrap();
    let out = graph
        .add_dynamic_attribute(node, "out", AttributeDirection::Output, 0.0)
        .unwrap();
    let late = graph
        .add_dynamic_attribute(node, "late", AttributeDirection::Input, 0.0)
        .unwrap();

    assert!(graph.is_dirty(out));
    assert_eq!(graph.affects(seed), &[out]);
    assert_eq!(graph.affects(early), &[out]);
    assert!(graph.affects(late).is_empty());

    graph.set_value(seed, 5.0).unwrap();
    assert_eq!(float(&mut graph, out), 5.0);

    graph.set_value(late, 1.0).unwrap();
    assert!(!graph.is_dirty(out));

    graph.set_value(early, 1.0).unwrap();
    assert!(graph.is_dirty(out));
}

#[test]
fn test_dynamic_attribute_order_and_removal() {
    let mut graph = Graph::new();
    let node = graph.add_node("dyn", Dynamic, None).unwrap();

    let a = graph
        .add_dynamic_attribute(node, "a", AttributeDirection::Input, 0.0)
        .unwrap();
    let b = graph
        .add_dynamic_attribute(node, "b", AttributeDirection::Output, 0.0)
        .unwrap();
    assert_eq!(graph.dynamic_attributes(node), &[a, b]);
    assert_eq!(graph.static_attributes(node).len(), 1);

    assert!(graph.remove_dynamic_attribute(node, a));
    assert!(!graph.remove_dynamic_attribute(node, a));
    assert_eq!(graph.dynamic_attributes(node), &[b]);
    assert!(graph.find_attribute(node, "a").is_none());
    assert!(graph.stored_value(a).is_none());
}

#[test]
fn test_dynamic_attributes_rejected_and_duplicates() {
    let mut graph = Graph::new();
    let pass = graph.add_node("pass", PassThrough::new(0.0), None).unwrap();
    let result = graph.add_dynamic_attribute(pass, "extra", AttributeDirection::Input, 0.0);
    assert!(matches!(
        result,
        Err(GraphError::DynamicAttributesNotAllowed(_))
    ));

    let node = graph.add_node("dyn", Dynamic, None).unwrap();
    let result = graph.add_dynamic_attribute(node, "seed", AttributeDirection::Input, 0.0);
    assert!(matches!(result, Err(GraphError::DuplicateAttribute { .. })));
}

#[test]
fn test_unique_attribute_name() {
    let mut graph = Graph::new();
    let node = graph.add_node("dyn", Dynamic, None).unwrap();

    assert_eq!(graph.unique_attribute_name(node, "input"), "input");
    graph
        .add_dynamic_attribute(node, "input", AttributeDirection::Input, 0.0)
        .unwrap();
    assert_eq!(graph.unique_attribute_name(node, "input"), "input1");
    graph
        .add_dynamic_attribute(node, "input1", AttributeDirection::Input, 0.0)
        .unwrap();
    assert_eq!(graph.unique_attribute_name(node, "input"), "input2");
}

#[test]
fn test_invalid_cycle_rejected() {
    let mut graph = Graph::new();
    let p = graph.add_node("p", PassThrough::new(0.0), None).unwrap();
    let q = graph.add_node("q", PassThrough::new(0.0), None).unwrap();

    graph.connect(attr(&graph, p, "output"), attr(&graph, q, "input")).unwrap();
    let result = graph.connect(attr(&graph, q, "output"), attr(&graph, p, "input"));

    if let Err(GraphError::CycleDetected(path)) = result {
        assert_eq!(path.len(), 4);
    } else {
        panic!("expected cycle error, got {:?}", result);
    }
    assert!(graph.source_of(attr(&graph, p, "input")).is_none());
    assert!(graph.validate().is_ok());
}

#[test]
fn test_output_cannot_affect_own_input() {
    let mut graph = Graph::new();
    let p = graph.add_node("p", PassThrough::new(0.0), None).unwrap();

    let result = graph.set_attribute_affect(attr(&graph, p, "output"), attr(&graph, p, "input"));
    assert!(matches!(
        result,
        Err(GraphError::OutputAffectsOwnInput { .. })
    ));
}

#[test]
fn test_duplicate_affect_is_noop() {
    let mut graph = Graph::new();
    let p = graph.add_node("p", PassThrough::new(0.0), None).unwrap();
    let input = attr(&graph, p, "input");
    let output = attr(&graph, p, "output");

    assert_eq!(graph.set_attribute_affect(input, output), Ok(false));
    assert_eq!(graph.affects(input), &[output]);
    assert!(graph.remove_attribute_affect(input, output));
    assert!(graph.affects(input).is_empty());
}

#[test]
fn test_connect_rejects_bad_directions() {
    let mut graph = Graph::new();
    let p = graph.add_node("p", PassThrough::new(0.0), None).unwrap();
    let q = graph.add_node("q", PassThrough::new(0.0), None).unwrap();

    let result = graph.connect(attr(&graph, p, "input"), attr(&graph, q, "input"));
    assert!(matches!(result, Err(GraphError::InvalidConnection { .. })));

    let result = graph.connect(attr(&graph, p, "output"), attr(&graph, q, "output"));
    assert!(matches!(result, Err(GraphError::InvalidConnection { .. })));
}

#[test]
fn test_set_value_rejects_outputs_and_driven_inputs() {
    let mut graph = Graph::new();
    let p = graph.add_node("p", PassThrough::new(0.0), None).unwrap();
    let q = graph.add_node("q", PassThrough::new(0.0), None).unwrap();
    let q_in = attr(&graph, q, "input");

    let result = graph.set_value(attr(&graph, p, "output"), 1.0);
    assert!(matches!(result, Err(GraphError::NotAnInput(_))));

    graph.connect(attr(&graph, p, "output"), q_in).unwrap();
    let result = graph.set_value(q_in, 1.0);
    assert!(matches!(result, Err(GraphError::DrivenInput(_))));
}

#[test]
fn test_disconnect_keeps_last_value() {
    let mut graph = Graph::new();
    let p = graph.add_node("p", PassThrough::new(0.0), None).unwrap();
    let q = graph.add_node("q", PassThrough::new(0.0), None).unwrap();
    let p_in = attr(&graph, p, "input");
    let q_in = attr(&graph, q, "input");
    let q_out = attr(&graph, q, "output");

    assert!(!graph.disconnect(q_in));

    graph.connect(attr(&graph, p, "output"), q_in).unwrap();
    graph.set_value(p_in, 3.0).unwrap();
    assert_eq!(float(&mut graph, q_out), 3.0);

    assert!(graph.disconnect(q_in));
    assert!(!graph.disconnect(q_in));

    graph.set_value(p_in, 9.0).unwrap();
    assert_eq!(float(&mut graph, q_out), 3.0);

    graph.set_value(q_in, 5.0).unwrap();
    assert_eq!(float(&mut graph, q_out), 5.0);
}

#[test]
fn test_remove_node_clears_connections() {
    let mut graph = Graph::new();
    let p = graph.add_node("p", PassThrough::new(0.0), None).unwrap();
    let q = graph.add_node("q", PassThrough::new(0.0), None).unwrap();
    let p_out = attr(&graph, p, "output");
    let q_in = attr(&graph, q, "input");

    graph.connect(p_out, q_in).unwrap();
    assert!(graph.remove_node(p));
    assert!(!graph.remove_node(p));

    assert!(graph.source_of(q_in).is_none());
    assert!(graph.stored_value(p_out).is_none());
    assert!(graph.set_value(q_in, 2.0).is_ok());
    assert!(graph.validate().is_ok());
}

#[test]
fn test_remove_parent_removes_children() {
    let mut graph = Graph::new();
    let root = graph.add_node("root", PassThrough::new(0.0), None).unwrap();
    let child = graph.add_node("child", PassThrough::new(0.0), Some(root)).unwrap();
    let grandchild = graph
        .add_node("grandchild", PassThrough::new(0.0), Some(child))
        .unwrap();

    assert_eq!(graph.children(root), &[child]);
    assert_eq!(graph.parent(grandchild), Some(child));

    assert!(graph.remove_node(root));
    assert!(graph.nodes.is_empty());
    assert!(graph.attributes.is_empty());
}

#[test]
fn test_failed_init_leaves_no_node() {
    let mut graph = Graph::new();
    let root = graph.add_node("root", PassThrough::new(0.0), None).unwrap();

    let result = graph.add_node("broken", BrokenInit, Some(root));
    assert!(matches!(result, Err(GraphError::DuplicateAttribute { .. })));
    assert_eq!(graph.nodes.len(), 1);
    assert!(graph.children(root).is_empty());
    assert_eq!(graph.attributes.len(), 2);
}

#[test]
fn test_attribute_dirtied_fires_on_transition() {
    let mut graph = Graph::new();
    let dirtied = Arc::new(AtomicUsize::new(0));
    let node = graph
        .add_node(
            "watcher",
            Watcher {
                dirtied: dirtied.clone(),
            },
            None,
        )
        .unwrap();
    let source = attr(&graph, node, "source");

    graph.set_value(source, "a").unwrap();
    graph.set_value(source, "b").unwrap();
    assert_eq!(dirtied.load(Ordering::SeqCst), 1);

    assert_eq!(graph.value(source), Some(&Value::string("b")));
    graph.set_value(source, "c").unwrap();
    assert_eq!(dirtied.load(Ordering::SeqCst), 2);
}

#[test]
fn test_validate_orders_affects() {
    let mut graph = Graph::new();
    let p = graph.add_node("p", PassThrough::new(0.0), None).unwrap();
    let q = graph.add_node("q", PassThrough::new(0.0), None).unwrap();
    let p_in = attr(&graph, p, "input");
    let q_out = attr(&graph, q, "output");

    graph.connect(attr(&graph, p, "output"), attr(&graph, q, "input")).unwrap();

    let order = graph.validate().unwrap();
    let position = |key| order.iter().position(|&k| k == key).unwrap();
    assert_eq!(order.len(), 4);
    assert!(position(p_in) < position(q_out));
}

#[test]
fn test_node_downcast() {
    let mut graph = Graph::new();
    let f = graph
        .add_node("add", FunctionNode::binary(|a, b| a + b), None)
        .unwrap();

    assert_eq!(graph.node_type_name(f), Some("FunctionNode"));
    assert_eq!(graph.node_name(f), Some("add"));
    assert!(graph.node_as::<PassThrough>(f).is_none());

    let (lhs, rhs, output) = {
        let node = graph.node_as::<FunctionNode>(f).unwrap();
        (node.inputs()[0], node.inputs()[1], node.output())
    };
    graph.set_value(lhs, 2.0).unwrap();
    graph.set_value(rhs, 0.5).unwrap();
    assert_eq!(float(&mut graph, output), 2.5);
}

#[test]
fn test_long_chain_declared_from_the_tail() {
    const LEN: usize = 100_000;
    let mut graph = Graph::new();
    let chain = slot_chain(&mut graph, LEN);

    for pair in chain.windows(2).rev() {
        assert_eq!(graph.set_attribute_affect(pair[0], pair[1]), Ok(true));
    }
    assert_eq!(graph.affected_by(chain[1]), &[chain[0]]);

    let result = graph.set_attribute_affect(chain[LEN - 1], chain[0]);
    if let Err(GraphError::CycleDetected(path)) = result {
        assert_eq!(path.len(), LEN);
        assert_eq!(path.first(), Some(&chain[0]));
        assert_eq!(path.last(), Some(&chain[LEN - 1]));
    } else {
        panic!("expected cycle error, got {:?}", result.map_err(|e| e.to_string()));
    }

    graph.set_value(chain[0], 1.0).unwrap();
    assert!(graph.is_dirty(chain[LEN - 1]));
    assert_eq!(graph.stats().propagations, LEN as u64);
}

#[test]
fn test_validate_long_chain() {
    const LEN: usize = 100_000;
    let mut graph = Graph::new();
    let chain = slot_chain(&mut graph, LEN);

    for pair in chain.windows(2) {
        graph.set_attribute_affect(pair[0], pair[1]).unwrap();
    }

    let order = graph.validate().unwrap();
    assert_eq!(order, chain);
}

#[test]
fn test_removed_attribute_leaves_no_reverse_edges() {
    let mut graph = Graph::new();
    let chain = slot_chain(&mut graph, 3);
    graph.set_attribute_affect(chain[0], chain[1]).unwrap();
    graph.set_attribute_affect(chain[1], chain[2]).unwrap();

    let middle = graph.owner(chain[1]).unwrap();
    assert!(graph.remove_node(middle));
    assert!(graph.affects(chain[0]).is_empty());
    assert!(graph.affected_by(chain[2]).is_empty());

    assert!(graph.set_attribute_affect(chain[2], chain[0]).unwrap());
    assert!(graph.remove_attribute_affect(chain[2], chain[0]));
    assert!(graph.affected_by(chain[0]).is_empty());
}

#[test]
fn test_unread_input_still_propagates() {
    let mut graph = Graph::new();
    let node = graph.add_node("constant", Constant::default(), None).unwrap();
    let input = attr(&graph, node, "input");
    let output = attr(&graph, node, "output");

    graph.set_value(input, 2.0).unwrap();
    assert_eq!(float(&mut graph, output), 1.0);
    assert!(!graph.is_dirty(input));

    graph.set_value(input, 3.0).unwrap();
    assert!(graph.is_dirty(output));
}
