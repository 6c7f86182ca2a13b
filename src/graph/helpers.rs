use std::fmt;

use super::context::NodeContext;
use super::graph_impl::GraphError;
use super::traits::Node;
use super::types::AttributeKey;
use crate::value::Value;

type Function = Box<dyn Fn(&[Value]) -> Value>;

/// Node computing a single `output` from any number of named inputs.
pub struct FunctionNode {
    input_names: Vec<String>,
    initial: Vec<Value>,
    func: Function,
    inputs: Vec<AttributeKey>,
    output: AttributeKey,
}

impl FunctionNode {
    pub fn new<F>(inputs: &[(&str, Value)], func: F) -> Self
    where
        F: Fn(&[Value]) -> Value + 'static,
    {
        Self {
            input_names: inputs.iter().map(|(name, _)| (*name).to_owned()).collect(),
            initial: inputs.iter().map(|(_, value)| value.clone()).collect(),
            func: Box::new(func),
            inputs: Vec::new(),
            output: AttributeKey::default(),
        }
    }

    /// Single float input named `input`.
    pub fn unary(f: fn(f32) -> f32) -> Self {
        Self::new(&[("input", Value::float(0.0))], move |values| {
            Value::float(f(values[0].as_float().unwrap_or_default()))
        })
    }

    /// Float inputs named `lhs` and `rhs`.
    pub fn binary(f: fn(f32, f32) -> f32) -> Self {
        Self::new(
            &[("lhs", Value::float(0.0)), ("rhs", Value::float(0.0))],
            move |values| {
                let lhs = values[0].as_float().unwrap_or_default();
                let rhs = values[1].as_float().unwrap_or_default();
                Value::float(f(lhs, rhs))
            },
        )
    }

    pub fn inputs(&self) -> &[AttributeKey] {
        &self.inputs
    }

    pub fn output(&self) -> AttributeKey {
        self.output
    }
}

impl fmt::Debug for FunctionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionNode")
            .field("inputs", &self.input_names)
            .field("func", &"<fn>")
            .finish()
    }
}

impl Node for FunctionNode {
    fn type_name(&self) -> &'static str {
        "FunctionNode"
    }

    fn init(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), GraphError> {
        self.output = ctx.add_output_attribute("output", Value::default())?;
        for (name, value) in self.input_names.iter().zip(self.initial.drain(..)) {
            let input = ctx.add_input_attribute(name, value)?;
            ctx.set_attribute_affect(input, self.output)?;
            self.inputs.push(input);
        }
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext<'_>, _attribute: AttributeKey) {
        let values: Vec<Value> = self
            .inputs
            .iter()
            .map(|&input| ctx.value(input).cloned().unwrap_or_default())
            .collect();
        let result = (self.func)(&values);
        ctx.set_output_value(self.output, result);
    }
}

/// Forwards `input` to `output` unchanged.
#[derive(Debug, Default)]
pub struct PassThrough {
    initial: Value,
    input: AttributeKey,
    output: AttributeKey,
}

impl PassThrough {
    pub fn new(initial: impl Into<Value>) -> Self {
        Self {
            initial: initial.into(),
            ..Self::default()
        }
    }

    pub fn input(&self) -> AttributeKey {
        self.input
    }

    pub fn output(&self) -> AttributeKey {
        self.output
    }
}

impl Node for PassThrough {
    fn type_name(&self) -> &'static str {
        "PassThrough"
    }

    fn init(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), GraphError> {
        self.input = ctx.add_input_attribute("input", self.initial.clone())?;
        self.output = ctx.add_output_attribute("output", self.initial.clone())?;
        ctx.set_attribute_affect(self.input, self.output)?;
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext<'_>, _attribute: AttributeKey) {
        if let Some(value) = ctx.value(self.input).cloned() {
            ctx.set_output_value(self.output, value);
        }
    }
}
