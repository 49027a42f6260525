//! Value Model
//!
//! The state tree is built from a small structural value type. Primitives are
//! stored inline; containers (objects, arrays, maps and sets) live in a
//! [`Heap`] and are referenced by [`NodeId`] handles.
//!
//! # Identity
//!
//! A `Value::Node` compares by handle, so two values are equal exactly when
//! they reference the same container. This is the reference identity the
//! proxy layer uses for its reuse cache and the identity registry uses for
//! tokens.
//!
//! # Equality
//!
//! Equality follows SameValueZero: `NaN` equals `NaN` and `+0` equals `-0`.
//! This makes `Value` usable as a map key and a set member.

mod heap;

pub use heap::{Heap, Node, NodeId, NodeKind};

use std::hash::{Hash, Hasher};

/// Handle for a symbol created through the identity registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u64);

impl SymbolId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A value stored in the state tree.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// A missing value (absent key, array hole).
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Symbol(SymbolId),
    /// A reference to a container node in the heap.
    Node(NodeId),
}

impl Value {
    /// Whether this value references a container node.
    pub fn is_node(&self) -> bool {
        matches!(self, Value::Node(_))
    }

    /// Whether this value is a node or symbol, i.e. a key that needs an
    /// identity token rather than a plain string rendering.
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Node(_) | Value::Symbol(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Value::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Short name of the value's type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Node(_) => "node",
        }
    }

    /// Canonical string form of a non-reference value.
    ///
    /// Returns `None` for nodes and symbols, which only have identity tokens.
    pub fn canonical_key(&self) -> Option<String> {
        match self {
            Value::Undefined => Some("undefined".to_string()),
            Value::Null => Some("null".to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(format_number(*n)),
            Value::String(s) => Some(s.clone()),
            Value::Symbol(_) | Value::Node(_) => None,
        }
    }
}

/// Render a number the way a script runtime prints it: integral values
/// without a fractional part, `-0` as `0`.
pub(crate) fn format_number(n: f64) -> String {
    if n == 0.0 {
        "0".to_string()
    } else if n.is_nan() {
        "NaN".to_string()
    } else if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        format!("{n}")
    }
}

fn number_bits(n: f64) -> u64 {
    if n == 0.0 {
        0.0f64.to_bits()
    } else if n.is_nan() {
        f64::NAN.to_bits()
    } else {
        n.to_bits()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => number_bits(*a) == number_bits(*b),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Undefined | Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Number(n) => number_bits(*n).hash(state),
            Value::String(s) => s.hash(state),
            Value::Symbol(id) => id.hash(state),
            Value::Node(id) => id.hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<NodeId> for Value {
    fn from(id: NodeId) -> Self {
        Value::Node(id)
    }
}

impl From<SymbolId> for Value {
    fn from(id: SymbolId) -> Self {
        Value::Symbol(id)
    }
}

/// Input data for a write.
///
/// `Data::Value` passes an existing value through unchanged (including node
/// references). The container variants are literals: each write allocates
/// fresh nodes, so a literal is never equal to the value it replaces.
#[derive(Debug, Clone)]
pub enum Data {
    Value(Value),
    Array(Vec<Data>),
    Object(Vec<(String, Data)>),
    Map(Vec<(Data, Data)>),
    Set(Vec<Data>),
}

impl Data {
    /// Build a map literal from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<Data>,
        V: Into<Data>,
        I: IntoIterator<Item = (K, V)>,
    {
        Data::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a set literal from members.
    pub fn set<T, I>(members: I) -> Self
    where
        T: Into<Data>,
        I: IntoIterator<Item = T>,
    {
        Data::Set(members.into_iter().map(Into::into).collect())
    }

    /// The passthrough value, if this is not a literal.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Data::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl Default for Data {
    fn default() -> Self {
        Data::Value(Value::Undefined)
    }
}

impl From<Value> for Data {
    fn from(v: Value) -> Self {
        Data::Value(v)
    }
}

impl From<bool> for Data {
    fn from(b: bool) -> Self {
        Data::Value(b.into())
    }
}

impl From<f64> for Data {
    fn from(n: f64) -> Self {
        Data::Value(n.into())
    }
}

impl From<i32> for Data {
    fn from(n: i32) -> Self {
        Data::Value(n.into())
    }
}

impl From<i64> for Data {
    fn from(n: i64) -> Self {
        Data::Value(n.into())
    }
}

impl From<usize> for Data {
    fn from(n: usize) -> Self {
        Data::Value(n.into())
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::Value(s.into())
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::Value(s.into())
    }
}

impl From<NodeId> for Data {
    fn from(id: NodeId) -> Self {
        Data::Value(id.into())
    }
}

impl From<SymbolId> for Data {
    fn from(id: SymbolId) -> Self {
        Data::Value(id.into())
    }
}

impl<T: Into<Data>> From<Vec<T>> for Data {
    fn from(items: Vec<T>) -> Self {
        Data::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Data {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Data::Value(Value::Null),
            serde_json::Value::Bool(b) => Data::Value(Value::Bool(b)),
            serde_json::Value::Number(n) => {
                Data::Value(Value::Number(n.as_f64().unwrap_or(f64::NAN)))
            }
            serde_json::Value::String(s) => Data::Value(Value::String(s)),
            serde_json::Value::Array(items) => {
                Data::Array(items.into_iter().map(Data::from).collect())
            }
            serde_json::Value::Object(entries) => Data::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Data::from(v)))
                    .collect(),
            ),
        }
    }
}
