//! Key Paths
//!
//! A key path is the sequence of keys leading from the store root to a
//! location in the tree. Raw keys are kept as-is; rendering to a string goes
//! through the identity registry so node and symbol keys become tokens.

use std::fmt;

use smallvec::SmallVec;

use crate::value::Value;

/// One segment of a key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathKey {
    /// An object property name or a synthetic key (`length`, `size`).
    Str(String),
    /// An array index.
    Index(usize),
    /// A non-string map key or set member.
    Value(Value),
}

impl PathKey {
    /// Build a segment from a map key or set member. String values become
    /// plain string segments.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) => PathKey::Str(s),
            other => PathKey::Value(other),
        }
    }

    /// Convert back into a value usable as a map key or set member.
    pub fn into_value(self) -> Value {
        match self {
            PathKey::Str(s) => Value::String(s),
            PathKey::Index(i) => Value::Number(i as f64),
            PathKey::Value(v) => v,
        }
    }

    /// Interpret this segment as an array index.
    ///
    /// Indices at or past [`MAX_ARRAY_LENGTH`] are not indices.
    pub fn as_index(&self) -> Option<usize> {
        let index = match self {
            PathKey::Index(i) => Some(*i),
            PathKey::Str(s) => s.parse::<usize>().ok().filter(|i| i.to_string() == *s),
            PathKey::Value(Value::Number(n)) if n.fract() == 0.0 && *n >= 0.0 => {
                array_length(*n)
            }
            PathKey::Value(_) => None,
        };
        index.filter(|i| *i < MAX_ARRAY_LENGTH)
    }

    /// Whether this segment is a node or symbol key that needs a token.
    pub fn is_reference(&self) -> bool {
        matches!(self, PathKey::Value(v) if v.is_reference())
    }

    pub fn is_str(&self, name: &str) -> bool {
        matches!(self, PathKey::Str(s) if s == name)
    }
}

impl fmt::Display for PathKey {
    /// Registry-free rendering; reference keys print by handle.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathKey::Str(s) => f.write_str(s),
            PathKey::Index(i) => write!(f, "{i}"),
            PathKey::Value(v) => match v.canonical_key() {
                Some(key) => f.write_str(&key),
                None => write!(f, "<{}>", v.type_name()),
            },
        }
    }
}

impl From<&str> for PathKey {
    fn from(s: &str) -> Self {
        PathKey::Str(s.to_string())
    }
}

impl From<String> for PathKey {
    fn from(s: String) -> Self {
        PathKey::Str(s)
    }
}

impl From<usize> for PathKey {
    fn from(i: usize) -> Self {
        PathKey::Index(i)
    }
}

impl From<Value> for PathKey {
    fn from(v: Value) -> Self {
        PathKey::from_value(v)
    }
}

/// Largest array length; valid indices are below it.
pub const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

/// Convert a number to an array length, if it is one.
pub fn array_length(n: f64) -> Option<usize> {
    (n >= 0.0 && n.fract() == 0.0 && n <= MAX_ARRAY_LENGTH as f64).then_some(n as usize)
}

/// Synthetic key recorded for array length reads and writes.
pub const LENGTH_KEY: &str = "length";

/// Synthetic key recorded for map and set size reads and writes.
pub const SIZE_KEY: &str = "size";

/// Ordered sequence of keys from the root.
pub type KeyPath = SmallVec<[PathKey; 4]>;

/// Extend `parent` by one key.
pub fn child_path(parent: &KeyPath, key: PathKey) -> KeyPath {
    let mut path = KeyPath::with_capacity(parent.len() + 1);
    path.extend(parent.iter().cloned());
    path.push(key);
    path
}

/// A key path rendered to its string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPath {
    /// Segments joined with `.`.
    pub text: String,
    /// Segments that resolve through the identity registry.
    pub tokens: SmallVec<[String; 2]>,
}
