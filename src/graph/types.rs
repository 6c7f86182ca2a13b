use std::fmt;

use slotmap::new_key_type;

use crate::value::Value;

new_key_type! { pub struct NodeKey; }
new_key_type! { pub struct AttributeKey; }

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AttributeDirection {
    Input,
    Output,
}

impl AttributeDirection {
    pub fn is_input(self) -> bool {
        self == Self::Input
    }

    pub fn is_output(self) -> bool {
        self == Self::Output
    }
}

impl fmt::Display for AttributeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Whether an attribute was declared by the node itself or added at runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttributeKind {
    Static,
    Dynamic,
}

#[derive(Clone, Debug)]
pub struct AttributeData {
    pub name: String,
    pub direction: AttributeDirection,
    pub kind: AttributeKind,
    pub value: Value,
    pub dirty: bool,
}

impl AttributeData {
    pub fn new(
        name: impl Into<String>,
        direction: AttributeDirection,
        kind: AttributeKind,
        value: Value,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            kind,
            value,
            dirty: false,
        }
    }
}

/// Counters for the dirty engine. `propagations` counts attributes newly marked
/// dirty, `recomputes` counts node `update` calls.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub propagations: u64,
    pub recomputes: u64,
}
