//! Node Heap
//!
//! Containers are stored in an arena of generational slots. A [`NodeId`] is
//! an index plus the generation of the slot when the node was allocated, so
//! a handle to a collected node never aliases whatever reuses its slot: it
//! simply stops resolving.

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};

use super::{Data, SymbolId, Value};
use crate::error::{Result, StoreError};

/// Handle to a container node in the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Get the raw slot index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Get the slot generation this handle was issued for.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// The kind of container a node holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Object,
    Array,
    Map,
    Set,
}

/// A container node.
#[derive(Debug, Clone)]
pub enum Node {
    /// String-keyed record, in insertion order.
    Object(IndexMap<String, Value>),
    Array(Vec<Value>),
    /// Keyed collection accepting any value as key, in insertion order.
    Map(IndexMap<Value, Value>),
    Set(IndexSet<Value>),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Object(_) => NodeKind::Object,
            Node::Array(_) => NodeKind::Array,
            Node::Map(_) => NodeKind::Map,
            Node::Set(_) => NodeKind::Set,
        }
    }

    /// Number of entries (keys, items, or members).
    pub fn len(&self) -> usize {
        match self {
            Node::Object(map) => map.len(),
            Node::Array(items) => items.len(),
            Node::Map(map) => map.len(),
            Node::Set(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every value directly referenced by this node, keys included.
    fn children(&self) -> Vec<&Value> {
        match self {
            Node::Object(map) => map.values().collect(),
            Node::Array(items) => items.iter().collect(),
            Node::Map(map) => map.iter().flat_map(|(k, v)| [k, v]).collect(),
            Node::Set(set) => set.iter().collect(),
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena of container nodes.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Allocate a node and return its handle.
    pub fn alloc(&mut self, node: Node) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.get(id).map(Node::kind)
    }

    /// Allocate the containers described by `data` and return the value.
    pub fn materialize(&mut self, data: Data) -> Value {
        match data {
            Data::Value(v) => v,
            Data::Array(items) => {
                let items = items.into_iter().map(|d| self.materialize(d)).collect();
                Value::Node(self.alloc(Node::Array(items)))
            }
            Data::Object(entries) => {
                let map = entries
                    .into_iter()
                    .map(|(k, d)| (k, self.materialize(d)))
                    .collect();
                Value::Node(self.alloc(Node::Object(map)))
            }
            Data::Map(entries) => {
                let map = entries
                    .into_iter()
                    .map(|(k, d)| {
                        let key = self.materialize(k);
                        (key, self.materialize(d))
                    })
                    .collect();
                Value::Node(self.alloc(Node::Map(map)))
            }
            Data::Set(members) => {
                let set = members.into_iter().map(|d| self.materialize(d)).collect();
                Value::Node(self.alloc(Node::Set(set)))
            }
        }
    }

    /// Export a value as JSON.
    ///
    /// Maps become arrays of `[key, value]` pairs and sets become arrays.
    /// `describe` renders symbols. Shared sub-graphs are exported once per
    /// reference; cycles fail with [`StoreError::CyclicValue`].
    pub fn export(
        &self,
        value: &Value,
        describe: &dyn Fn(SymbolId) -> String,
    ) -> Result<serde_json::Value> {
        let mut in_progress = HashSet::new();
        self.export_inner(value, describe, &mut in_progress)
    }

    fn export_inner(
        &self,
        value: &Value,
        describe: &dyn Fn(SymbolId) -> String,
        in_progress: &mut HashSet<NodeId>,
    ) -> Result<serde_json::Value> {
        use serde_json::Value as Json;

        let id = match value {
            Value::Undefined | Value::Null => return Ok(Json::Null),
            Value::Bool(b) => return Ok(Json::Bool(*b)),
            Value::Number(n) => return Ok(export_number(*n)),
            Value::String(s) => return Ok(Json::String(s.clone())),
            Value::Symbol(sym) => return Ok(Json::String(describe(*sym))),
            Value::Node(id) => *id,
        };

        let Some(node) = self.get(id) else {
            return Ok(Json::Null);
        };
        if !in_progress.insert(id) {
            return Err(StoreError::CyclicValue);
        }

        let json = match node {
            Node::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.export_inner(v, describe, in_progress)?);
                }
                Json::Object(out)
            }
            Node::Array(items) => Json::Array(
                items
                    .iter()
                    .map(|v| self.export_inner(v, describe, in_progress))
                    .collect::<Result<_>>()?,
            ),
            Node::Map(map) => Json::Array(
                map.iter()
                    .map(|(k, v)| {
                        Ok(Json::Array(vec![
                            self.export_inner(k, describe, in_progress)?,
                            self.export_inner(v, describe, in_progress)?,
                        ]))
                    })
                    .collect::<Result<_>>()?,
            ),
            Node::Set(set) => Json::Array(
                set.iter()
                    .map(|v| self.export_inner(v, describe, in_progress))
                    .collect::<Result<_>>()?,
            ),
        };

        in_progress.remove(&id);
        Ok(json)
    }

    /// Free every node unreachable from `roots`.
    ///
    /// Returns the handles that were freed so dependent registries can drop
    /// their entries.
    pub fn collect(&mut self, roots: &[Value]) -> Vec<NodeId> {
        let mut marked = HashSet::new();
        let mut stack: Vec<NodeId> = roots.iter().filter_map(Value::as_node).collect();

        while let Some(id) = stack.pop() {
            if !marked.insert(id) {
                continue;
            }
            if let Some(node) = self.get(id) {
                stack.extend(node.children().into_iter().filter_map(Value::as_node));
            }
        }

        let mut freed = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.node.is_none() {
                continue;
            }
            let id = NodeId {
                index: index as u32,
                generation: slot.generation,
            };
            if marked.contains(&id) {
                continue;
            }
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
            self.live -= 1;
            freed.push(id);
        }
        freed
    }
}

fn export_number(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_symbols(sym: SymbolId) -> String {
        format!("Symbol({})", sym.raw())
    }

    #[test]
    fn materialize_and_export_round_trip() {
        let mut heap = Heap::new();
        let source = json!({"data": [2, 6, 3, 1], "obj": {"name": "a"}, "ratio": 0.5});
        let root = heap.materialize(Data::from(source.clone()));

        assert!(root.is_node());
        assert_eq!(heap.len(), 3);
        assert_eq!(heap.export(&root, &no_symbols).unwrap(), source);
    }

    #[test]
    fn maps_and_sets_export_as_arrays() {
        let mut heap = Heap::new();
        let value = heap.materialize(Data::Object(vec![
            ("m".to_string(), Data::map([(1, "one")])),
            ("s".to_string(), Data::set(["x", "y"])),
        ]));

        assert_eq!(
            heap.export(&value, &no_symbols).unwrap(),
            json!({"m": [[1, "one"]], "s": ["x", "y"]})
        );
    }

    #[test]
    fn cyclic_export_fails() {
        let mut heap = Heap::new();
        let id = heap.alloc(Node::Array(Vec::new()));
        if let Some(Node::Array(items)) = heap.get_mut(id) {
            items.push(Value::Node(id));
        }

        assert!(matches!(
            heap.export(&Value::Node(id), &no_symbols),
            Err(StoreError::CyclicValue)
        ));
    }

    #[test]
    fn collect_frees_unreachable_nodes() {
        let mut heap = Heap::new();
        let root = heap.materialize(Data::from(json!({"keep": {"x": 1}})));
        let orphan = heap.alloc(Node::Object(IndexMap::new()));
        assert_eq!(heap.len(), 3);

        let freed = heap.collect(&[root.clone()]);
        assert_eq!(freed, vec![orphan]);
        assert_eq!(heap.len(), 2);
        assert!(!heap.contains(orphan));
        assert!(heap.contains(root.as_node().unwrap()));
    }

    #[test]
    fn reused_slot_does_not_alias_stale_handle() {
        let mut heap = Heap::new();
        let stale = heap.alloc(Node::Array(Vec::new()));
        heap.collect(&[]);

        let fresh = heap.alloc(Node::Set(IndexSet::new()));
        assert_eq!(fresh.index(), stale.index());
        assert_ne!(fresh, stale);
        assert!(heap.get(stale).is_none());
        assert_eq!(heap.kind(fresh), Some(NodeKind::Set));
    }
}
