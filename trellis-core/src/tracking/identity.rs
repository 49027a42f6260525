//! Identity Registry
//!
//! Paths are compared as strings, but map keys and set members can be nodes
//! or symbols, which have no string form. The registry hands out a stable
//! token for each such reference the first time it is seen and returns the
//! same token on every later lookup.
//!
//! Node entries are pruned when the heap collects the node; symbols live as
//! long as the registry.

use std::collections::HashMap;

use indexmap::IndexMap;

use super::path::{KeyPath, PathKey, RenderedPath};
use crate::value::{NodeId, SymbolId, Value};

const NODE_TOKEN_PREFIX: &str = "@ref:";
const SYMBOL_TOKEN_PREFIX: &str = "@sym:";

/// Per-store map from reference keys to identity tokens.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    tokens: HashMap<Value, String>,
    reverse: HashMap<String, Value>,
    next_token: u64,
    symbols: IndexMap<SymbolId, String>,
    next_symbol: u64,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new symbol with the given description.
    pub fn symbol(&mut self, description: impl Into<String>) -> SymbolId {
        let id = SymbolId::from_raw(self.next_symbol);
        self.next_symbol += 1;
        self.symbols.insert(id, description.into());
        id
    }

    pub fn symbol_description(&self, id: SymbolId) -> Option<&str> {
        self.symbols.get(&id).map(String::as_str)
    }

    /// Human-readable form of a symbol, as used in snapshots.
    pub fn describe_symbol(&self, id: SymbolId) -> String {
        format!("Symbol({})", self.symbol_description(id).unwrap_or(""))
    }

    /// The string form of a path segment.
    ///
    /// Strings pass through, indices and primitive keys render canonically,
    /// and node or symbol keys get (or reuse) an identity token.
    pub fn token_for(&mut self, key: &PathKey) -> String {
        match key {
            PathKey::Str(s) => s.clone(),
            PathKey::Index(i) => i.to_string(),
            PathKey::Value(v) => self.value_token(v),
        }
    }

    /// The string form of a value used as a key.
    pub fn value_token(&mut self, value: &Value) -> String {
        if let Some(key) = value.canonical_key() {
            return key;
        }
        if let Some(token) = self.tokens.get(value) {
            return token.clone();
        }

        let prefix = match value {
            Value::Symbol(_) => SYMBOL_TOKEN_PREFIX,
            _ => NODE_TOKEN_PREFIX,
        };
        let token = format!("{prefix}{}", self.next_token);
        self.next_token += 1;
        self.tokens.insert(value.clone(), token.clone());
        self.reverse.insert(token.clone(), value.clone());
        token
    }

    /// Whether `segment` is a token issued by this registry.
    pub fn is_token(&self, segment: &str) -> bool {
        self.reverse.contains_key(segment)
    }

    /// The reference behind a token.
    pub fn resolve(&self, token: &str) -> Option<&Value> {
        self.reverse.get(token)
    }

    /// Render a key path, collecting the tokens of its node and symbol keys.
    pub fn render(&mut self, path: &KeyPath) -> RenderedPath {
        let mut rendered = RenderedPath {
            text: String::new(),
            tokens: Default::default(),
        };
        for (i, key) in path.iter().enumerate() {
            let segment = self.token_for(key);
            if i > 0 {
                rendered.text.push('.');
            }
            rendered.text.push_str(&segment);
            if key.is_reference() {
                rendered.tokens.push(segment);
            }
        }
        rendered
    }

    /// Drop the entries of nodes for which `is_live` returns false.
    ///
    /// Returns the number of entries removed.
    pub fn retain_nodes(&mut self, is_live: impl Fn(NodeId) -> bool) -> usize {
        let before = self.tokens.len();
        let reverse = &mut self.reverse;
        self.tokens.retain(|value, token| match value {
            Value::Node(id) if !is_live(*id) => {
                reverse.remove(token.as_str());
                false
            }
            _ => true,
        });
        before - self.tokens.len()
    }

    /// Number of issued tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Heap, Node};
    use smallvec::smallvec;

    #[test]
    fn strings_pass_through() {
        let mut registry = IdentityRegistry::new();
        assert_eq!(registry.token_for(&PathKey::from("name")), "name");
        assert_eq!(registry.token_for(&PathKey::Index(4)), "4");
        assert!(registry.is_empty());
    }

    #[test]
    fn references_get_stable_tokens() {
        let mut heap = Heap::new();
        let a = Value::Node(heap.alloc(Node::Array(Vec::new())));
        let b = Value::Node(heap.alloc(Node::Array(Vec::new())));
        let mut registry = IdentityRegistry::new();

        let token_a = registry.value_token(&a);
        assert_eq!(registry.value_token(&a), token_a);
        assert_ne!(registry.value_token(&b), token_a);
        assert!(registry.is_token(&token_a));
        assert_eq!(registry.resolve(&token_a), Some(&a));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn primitives_render_without_entries() {
        let mut registry = IdentityRegistry::new();
        assert_eq!(registry.value_token(&Value::from(7)), "7");
        assert_eq!(registry.value_token(&Value::Bool(false)), "false");
        assert!(registry.is_empty());
    }

    #[test]
    fn symbols_are_tokenized() {
        let mut registry = IdentityRegistry::new();
        let sym = registry.symbol("marker");
        let token = registry.value_token(&Value::Symbol(sym));

        assert!(token.starts_with(SYMBOL_TOKEN_PREFIX));
        assert_eq!(registry.describe_symbol(sym), "Symbol(marker)");
    }

    #[test]
    fn render_collects_tokens() {
        let mut heap = Heap::new();
        let key = Value::Node(heap.alloc(Node::Object(Default::default())));
        let mut registry = IdentityRegistry::new();

        let path: KeyPath = smallvec![PathKey::from("m"), PathKey::Value(key.clone())];
        let rendered = registry.render(&path);
        let token = registry.value_token(&key);

        assert_eq!(rendered.text, format!("m.{token}"));
        assert_eq!(rendered.tokens.as_slice(), &[token]);
    }

    #[test]
    fn string_keys_that_look_like_tokens_are_not_tokens() {
        let mut heap = Heap::new();
        let key = Value::Node(heap.alloc(Node::Object(Default::default())));
        let mut registry = IdentityRegistry::new();
        let token = registry.value_token(&key);

        let path: KeyPath = smallvec![PathKey::from("m"), PathKey::Str(token.clone())];
        let rendered = registry.render(&path);

        assert_eq!(rendered.text, format!("m.{token}"));
        assert!(rendered.tokens.is_empty());
    }

    #[test]
    fn collected_nodes_are_pruned() {
        let mut heap = Heap::new();
        let keep = Value::Node(heap.alloc(Node::Array(Vec::new())));
        let gone = Value::Node(heap.alloc(Node::Array(Vec::new())));
        let mut registry = IdentityRegistry::new();
        registry.value_token(&keep);
        let dropped = registry.value_token(&gone);

        heap.collect(&[keep.clone()]);
        assert_eq!(registry.retain_nodes(|id| heap.contains(id)), 1);
        assert!(!registry.is_token(&dropped));
        assert_eq!(registry.len(), 1);
    }
}
