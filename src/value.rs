use std::fmt;

/// Width in bytes of every numeric element; kernels see all arrays as 32-bit lanes.
pub const ELEMENT_BYTES: usize = std::mem::size_of::<f32>();

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueType {
    Int,
    Float,
    IntArray,
    FloatArray,
    String,
}

impl ValueType {
    pub fn is_array(self) -> bool {
        matches!(self, Self::IntArray | Self::FloatArray)
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::String)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "Int",
            Self::Float => "Float",
            Self::IntArray => "IntArray",
            Self::FloatArray => "FloatArray",
            Self::String => "String",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Scalar {
    Int(i32),
    Float(f32),
}

#[derive(Clone, Debug, PartialEq)]
pub enum NumericArray {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

impl NumericArray {
    pub fn len(&self) -> usize {
        match self {
            Self::Int(values) => values.len(),
            Self::Float(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw element bytes, native endian.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Int(values) => bytemuck::cast_slice(values),
            Self::Float(values) => bytemuck::cast_slice(values),
        }
    }
}

/// Data held by a single attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Array(NumericArray),
    String(String),
}

impl Default for Value {
    fn default() -> Self {
        Self::Scalar(Scalar::Float(0.0))
    }
}

impl Value {
    pub fn int(value: i32) -> Self {
        Self::Scalar(Scalar::Int(value))
    }

    pub fn float(value: f32) -> Self {
        Self::Scalar(Scalar::Float(value))
    }

    pub fn int_array(values: impl Into<Vec<i32>>) -> Self {
        Self::Array(NumericArray::Int(values.into()))
    }

    pub fn float_array(values: impl Into<Vec<f32>>) -> Self {
        Self::Array(NumericArray::Float(values.into()))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Scalar(Scalar::Int(_)) => ValueType::Int,
            Self::Scalar(Scalar::Float(_)) => ValueType::Float,
            Self::Array(NumericArray::Int(_)) => ValueType::IntArray,
            Self::Array(NumericArray::Float(_)) => ValueType::FloatArray,
            Self::String(_) => ValueType::String,
        }
    }

    /// Element count. Scalars and strings count as one element.
    pub fn size(&self) -> usize {
        match self {
            Self::Scalar(_) | Self::String(_) => 1,
            Self::Array(array) => array.len(),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Self::Scalar(scalar) => Some(*scalar),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Scalar(Scalar::Float(v)) => Some(*v),
            Self::Scalar(Scalar::Int(v)) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_float_slice(&self) -> Option<&[f32]> {
        match self {
            Self::Array(NumericArray::Float(values)) => Some(values),
            _ => None,
        }
    }

    pub fn as_int_slice(&self) -> Option<&[i32]> {
        match self {
            Self::Array(NumericArray::Int(values)) => Some(values),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Element bytes of an array value, truncated to the first `elements` entries.
    /// Returns `None` for scalars and strings.
    pub fn array_bytes(&self, elements: usize) -> Option<&[u8]> {
        match self {
            Self::Array(array) => {
                let bytes = array.as_bytes();
                let len = (elements * ELEMENT_BYTES).min(bytes.len());
                Some(&bytes[..len])
            }
            Self::Scalar(_) | Self::String(_) => None,
        }
    }

    /// Builds a fresh array of this value's element type from raw device bytes.
    /// Non-array values have no device representation and yield `None`.
    pub fn array_from_bytes(&self, bytes: &[u8]) -> Option<Value> {
        let elements = bytes.len() / ELEMENT_BYTES;
        match self {
            Self::Array(NumericArray::Int(_)) => {
                let mut values = vec![0i32; elements];
                bytemuck::cast_slice_mut(&mut values)
                    .copy_from_slice(&bytes[..elements * ELEMENT_BYTES]);
                Some(Self::Array(NumericArray::Int(values)))
            }
            Self::Array(NumericArray::Float(_)) => {
                let mut values = vec![0f32; elements];
                bytemuck::cast_slice_mut(&mut values)
                    .copy_from_slice(&bytes[..elements * ELEMENT_BYTES]);
                Some(Self::Array(NumericArray::Float(values)))
            }
            Self::Scalar(_) | Self::String(_) => None,
        }
    }

    /// Parses text into a value of the requested type. Arrays are comma separated,
    /// optionally wrapped in brackets. Strings are taken verbatim.
    pub fn parse_as(value_type: ValueType, text: &str) -> Option<Value> {
        let text = text.trim();
        match value_type {
            ValueType::Int => text.parse().ok().map(Self::int),
            ValueType::Float => text.parse().ok().map(Self::float),
            ValueType::IntArray => parse_list(text).map(Self::int_array),
            ValueType::FloatArray => parse_list(text).map(Self::float_array),
            ValueType::String => Some(Self::string(text)),
        }
    }

    /// Single-line rendering; newlines inside strings are escaped.
    pub fn as_escaped_string(&self) -> String {
        match self {
            Self::String(value) => value.replace('\n', "\\n"),
            other => other.to_string(),
        }
    }
}

fn parse_list<T: std::str::FromStr>(text: &str) -> Option<Vec<T>> {
    let inner = text
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(text)
        .trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }
    inner.split(',').map(|item| item.trim().parse().ok()).collect()
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", value)?;
    }
    f.write_str("]")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(Scalar::Int(v)) => write!(f, "{}", v),
            Self::Scalar(Scalar::Float(v)) => write!(f, "{}", v),
            Self::Array(NumericArray::Int(values)) => write_list(f, values),
            Self::Array(NumericArray::Float(values)) => write_list(f, values),
            Self::String(value) => f.write_str(value),
        }
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::float(value)
    }
}

// Narrowed: attributes hold single precision floats.
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::float(value as f32)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::int(value)
    }
}

impl From<Vec<f32>> for Value {
    fn from(values: Vec<f32>) -> Self {
        Self::float_array(values)
    }
}

impl From<Vec<i32>> for Value {
    fn from(values: Vec<i32>) -> Self {
        Self::int_array(values)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}
