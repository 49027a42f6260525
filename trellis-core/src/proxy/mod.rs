//! Reactive Proxies
//!
//! A [`ProxyNode`] is the tracked view of one container node for one session.
//! Every read through it reports a get event with the absolute key path, and
//! every write goes through the strict-mode gate, is applied to the raw node,
//! and reports a set, add or delete event.
//!
//! # Concepts
//!
//! ## Sessions
//!
//! All proxies created while wrapping one tree share a [`ProxyContext`]. The
//! context owns the observer that receives events and a cache that keeps at
//! most one live proxy per node, so a node read twice in the same session
//! yields the same proxy.
//!
//! ## Nested reads
//!
//! Reading a container value wraps it on the fly with the parent path
//! extended by the key. Reading a primitive reports the event and returns the
//! value. Map values and set members are only wrapped when the context's
//! `proxy_set_deep` flag is on.
//!
//! ## Writes
//!
//! Writing a value equal to the current one does nothing. Otherwise the
//! write is gated, applied, the cached proxy of the replaced value is
//! dropped, and the event is reported. Array methods report one event per
//! index whose value changed plus a `length` event; map and set mutations
//! that change the entry count report a `size` event.

mod array;
mod collection;
mod context;

pub use context::{wrap, NullObserver, ProxyContext, ProxyObserver};

use std::fmt;
use std::sync::Arc;

use crate::error::{MutationKind, Result};
use crate::tracking::{child_path, KeyPath, PathKey};
use crate::value::{Data, Node, NodeId, NodeKind, SymbolId, Value};

pub(crate) struct ProxyNodeInner {
    target: NodeId,
    path: KeyPath,
    ctx: Arc<ProxyContext>,
}

/// Tracked view of one container node.
///
/// Clones are cheap and refer to the same proxy.
#[derive(Clone)]
pub struct ProxyNode {
    inner: Arc<ProxyNodeInner>,
}

/// Result of a tracked read.
#[derive(Clone)]
pub enum Read {
    /// A primitive, or a container that was not wrapped.
    Value(Value),
    /// A wrapped container.
    Node(ProxyNode),
}

impl ProxyNode {
    /// The wrapped node.
    pub fn id(&self) -> NodeId {
        self.inner.target
    }

    /// Absolute path of this node in the session.
    pub fn path(&self) -> &KeyPath {
        &self.inner.path
    }

    pub fn context(&self) -> &Arc<ProxyContext> {
        &self.inner.ctx
    }

    /// The node as a raw value (for identity comparison or reuse as a key).
    pub fn raw(&self) -> Value {
        Value::Node(self.inner.target)
    }

    /// Kind of the wrapped node, or `None` if it was collected.
    pub fn kind(&self) -> Option<NodeKind> {
        self.ctx().heap.read().kind(self.id())
    }

    /// Whether two handles are the same proxy.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn ctx(&self) -> &Arc<ProxyContext> {
        &self.inner.ctx
    }

    fn child(&self, key: PathKey) -> KeyPath {
        child_path(&self.inner.path, key)
    }

    fn with_node<R>(&self, f: impl FnOnce(&Node) -> R) -> Option<R> {
        self.ctx().heap.read().get(self.id()).map(f)
    }

    fn with_node_mut<R>(&self, f: impl FnOnce(&mut Node) -> R) -> Option<R> {
        self.ctx().heap.write().get_mut(self.id()).map(f)
    }

    /// Report a read of `key` and wrap container values.
    fn read_child(&self, key: PathKey, value: Value, deep: bool) -> Read {
        let path = self.child(key);
        self.ctx().observer.on_get(&value, &path);

        if let Value::Node(id) = value {
            let live = self.ctx().heap.read().contains(id);
            if deep && live {
                return Read::Node(self.ctx().proxy_for(id, path));
            }
        }
        Read::Value(value)
    }

    /// Report a read of a synthetic count key (`length`, `size`).
    fn read_count(&self, key: &str, count: usize) -> usize {
        self.ctx()
            .observer
            .on_get(&Value::from(count), &self.child(PathKey::from(key)));
        count
    }

    /// Object property name for `key`. Non-string keys use their token.
    fn property_name(&self, key: PathKey) -> String {
        match key {
            PathKey::Str(s) => s,
            other => self.ctx().registry.lock().token_for(&other),
        }
    }

    /// Path segment for the property stored under `name`. Properties keyed
    /// by a node or symbol map back to that reference.
    fn property_key(&self, name: &str) -> PathKey {
        match self.ctx().registry.lock().resolve(name) {
            Some(reference) => PathKey::Value(reference.clone()),
            None => PathKey::Str(name.to_string()),
        }
    }

    /// Read `key`.
    ///
    /// Objects read a property, arrays an index or `length`, maps the entry
    /// for the key, and sets the member itself when present.
    pub fn get(&self, key: impl Into<PathKey>) -> Read {
        let key = key.into();
        match self.kind() {
            Some(NodeKind::Object) => self.get_property(key),
            Some(NodeKind::Array) => self.get_element(key),
            Some(NodeKind::Map) => self.map_get(key),
            Some(NodeKind::Set) => self.set_get(key),
            None => Read::Value(Value::Undefined),
        }
    }

    /// Write `data` at `key`. On a set, `data` is added as a member.
    pub fn set(&self, key: impl Into<PathKey>, data: impl Into<Data>) -> Result<()> {
        let key = key.into();
        let data = data.into();
        match self.kind() {
            Some(NodeKind::Object) => self.set_property(key, data),
            Some(NodeKind::Array) => self.set_element(key, data),
            Some(NodeKind::Map) => self.map_set(key, data),
            Some(NodeKind::Set) => self.add(data).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Remove `key`. Returns false if there was nothing to remove.
    pub fn delete(&self, key: impl Into<PathKey>) -> Result<bool> {
        let key = key.into();
        match self.kind() {
            Some(NodeKind::Object) => self.delete_property(key),
            Some(NodeKind::Array) => self.delete_element(key),
            Some(NodeKind::Map) => self.map_delete(key.into_value()),
            Some(NodeKind::Set) => self.set_delete(key.into_value()),
            None => Ok(false),
        }
    }

    /// Whether `key` is present. Counts as a read of its path.
    pub fn has(&self, key: impl Into<PathKey>) -> bool {
        let key = key.into();
        match self.kind() {
            Some(NodeKind::Object) => {
                let name = self.property_name(key);
                let value = self
                    .with_node(|node| match node {
                        Node::Object(map) => map.get(&name).cloned(),
                        _ => None,
                    })
                    .flatten();
                let present = value.is_some();
                self.read_child(self.property_key(&name), value.unwrap_or_default(), false);
                present
            }
            Some(NodeKind::Array) => match key.as_index() {
                Some(index) => !self.get_element(PathKey::Index(index)).is_undefined(),
                None => false,
            },
            Some(NodeKind::Map) => self.map_has(key.into_value()),
            Some(NodeKind::Set) => self.set_has(key.into_value()),
            None => false,
        }
    }

    /// Number of entries: array `length`, map or set `size`, or the number
    /// of object keys.
    pub fn len(&self) -> usize {
        match self.kind() {
            Some(NodeKind::Array) => self.array_len(),
            Some(NodeKind::Map) | Some(NodeKind::Set) => self.size(),
            Some(NodeKind::Object) => self.entries().len(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entry as `(key, value)`, in order. Counts as a read of every
    /// entry, plus `length` or `size` for arrays and collections.
    ///
    /// Set entries use the member as both key and value.
    pub fn entries(&self) -> Vec<(Value, Read)> {
        match self.kind() {
            Some(NodeKind::Object) => {
                let pairs = self
                    .with_node(|node| match node {
                        Node::Object(map) => map
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect::<Vec<_>>(),
                        _ => Vec::new(),
                    })
                    .unwrap_or_default();
                pairs
                    .into_iter()
                    .map(|(k, v)| {
                        let read = self.read_child(self.property_key(&k), v, true);
                        (Value::String(k), read)
                    })
                    .collect()
            }
            Some(NodeKind::Array) => self
                .iter()
                .into_iter()
                .enumerate()
                .map(|(i, read)| (Value::from(i), read))
                .collect(),
            Some(NodeKind::Map) | Some(NodeKind::Set) => self.collection_entries(),
            None => Vec::new(),
        }
    }

    /// Keys of every entry; see [`ProxyNode::entries`].
    pub fn keys(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    /// Values of every entry; see [`ProxyNode::entries`].
    pub fn values(&self) -> Vec<Read> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// Call `f` for every entry; see [`ProxyNode::entries`].
    pub fn for_each(&self, mut f: impl FnMut(&Value, Read)) {
        for (key, value) in self.entries() {
            f(&key, value);
        }
    }

    /// Allocate a detached node from `data` without emitting events.
    ///
    /// The result can be used as a map key or set member, or written into
    /// the tree later.
    pub fn alloc(&self, data: impl Into<Data>) -> Value {
        self.ctx().heap.write().materialize(data.into())
    }

    /// Untracked JSON export of this node.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let registry = self.ctx().registry.lock();
        let describe = |sym: SymbolId| registry.describe_symbol(sym);
        self.ctx().heap.read().export(&self.raw(), &describe)
    }

    fn get_property(&self, key: PathKey) -> Read {
        let name = self.property_name(key);
        let value = self
            .with_node(|node| match node {
                Node::Object(map) => map.get(&name).cloned(),
                _ => None,
            })
            .flatten()
            .unwrap_or_default();
        self.read_child(self.property_key(&name), value, true)
    }

    fn set_property(&self, key: PathKey, data: Data) -> Result<()> {
        let name = self.property_name(key);
        let path = self.child(self.property_key(&name));
        let old = self
            .with_node(|node| match node {
                Node::Object(map) => map.get(&name).cloned(),
                _ => None,
            })
            .flatten();

        if let Some(new) = data.as_value() {
            if old.clone().unwrap_or_default() == *new {
                return Ok(());
            }
        }

        let op = if old.is_some() {
            MutationKind::Set
        } else {
            MutationKind::Add
        };
        self.ctx().guard(op, &path)?;

        let value = {
            let mut heap = self.ctx().heap.write();
            let value = heap.materialize(data);
            if let Some(Node::Object(map)) = heap.get_mut(self.id()) {
                map.insert(name, value.clone());
            }
            value
        };

        if let Some(old) = &old {
            self.ctx().forget(old);
        }
        self.ctx().emit(op, &value, &path);
        Ok(())
    }

    fn delete_property(&self, key: PathKey) -> Result<bool> {
        let name = self.property_name(key);
        let present = self
            .with_node(|node| matches!(node, Node::Object(map) if map.contains_key(&name)))
            .unwrap_or(false);
        if !present {
            return Ok(false);
        }

        let path = self.child(self.property_key(&name));
        self.ctx().guard(MutationKind::Delete, &path)?;

        let old = self
            .with_node_mut(|node| match node {
                Node::Object(map) => map.shift_remove(&name),
                _ => None,
            })
            .flatten();
        if let Some(old) = old {
            self.ctx().forget(&old);
            self.ctx().emit(MutationKind::Delete, &old, &path);
        }
        Ok(true)
    }
}

impl fmt::Debug for ProxyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyNode")
            .field("target", &self.inner.target)
            .field("path", &self.inner.path)
            .finish()
    }
}

impl Read {
    /// The raw value; wrapped containers become `Value::Node`.
    pub fn value(&self) -> Value {
        match self {
            Read::Value(v) => v.clone(),
            Read::Node(node) => node.raw(),
        }
    }

    pub fn as_node(&self) -> Option<&ProxyNode> {
        match self {
            Read::Node(node) => Some(node),
            Read::Value(_) => None,
        }
    }

    pub fn into_node(self) -> Option<ProxyNode> {
        match self {
            Read::Node(node) => Some(node),
            Read::Value(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Read::Value(v) => v.as_f64(),
            Read::Node(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Read::Value(v) => v.as_str(),
            Read::Node(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Read::Value(v) => v.as_bool(),
            Read::Node(_) => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Read::Value(Value::Undefined))
    }

    /// Read `key` from a wrapped container; undefined for anything else.
    pub fn get(&self, key: impl Into<PathKey>) -> Read {
        match self {
            Read::Node(node) => node.get(key),
            Read::Value(_) => Read::Value(Value::Undefined),
        }
    }
}

impl fmt::Debug for Read {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Read::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Read::Node(node) => f.debug_tuple("Node").field(node).finish(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gate::StrictModeGate;
    use crate::tracking::IdentityRegistry;
    use crate::value::Heap;
    use parking_lot::{Mutex, RwLock};
    use serde_json::json;

    /// One recorded proxy event.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Event {
        Get(String),
        Set(String, Value),
        Add(String, Value),
        Delete(String),
    }

    /// Observer that records rendered events in order.
    pub(crate) struct Recorder {
        registry: Arc<Mutex<IdentityRegistry>>,
        pub(crate) events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn render(&self, path: &KeyPath) -> String {
            self.registry.lock().render(path).text
        }

        pub(crate) fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock())
        }

        pub(crate) fn mutations(&self) -> Vec<Event> {
            self.take()
                .into_iter()
                .filter(|e| !matches!(e, Event::Get(_)))
                .collect()
        }
    }

    impl ProxyObserver for Recorder {
        fn on_get(&self, _value: &Value, path: &KeyPath) {
            let path = self.render(path);
            self.events.lock().push(Event::Get(path));
        }
        fn on_set(&self, value: &Value, path: &KeyPath) {
            let path = self.render(path);
            self.events.lock().push(Event::Set(path, value.clone()));
        }
        fn on_add(&self, value: &Value, path: &KeyPath) {
            let path = self.render(path);
            self.events.lock().push(Event::Add(path, value.clone()));
        }
        fn on_delete(&self, _value: &Value, path: &KeyPath) {
            let path = self.render(path);
            self.events.lock().push(Event::Delete(path));
        }
    }

    /// Build a session over `data` with a recording observer.
    pub(crate) fn session(data: serde_json::Value, strict: bool) -> (ProxyNode, Arc<Recorder>) {
        let heap = Arc::new(RwLock::new(Heap::new()));
        let registry = Arc::new(Mutex::new(IdentityRegistry::new()));
        let root = heap.write().materialize(Data::from(data));
        let recorder = Arc::new(Recorder {
            registry: registry.clone(),
            events: Mutex::new(Vec::new()),
        });
        let ctx = Arc::new(ProxyContext::new(
            heap,
            registry,
            StrictModeGate::new(strict),
            recorder.clone(),
        ));
        let id = root.as_node().expect("root is a container");
        (wrap(id, &ctx), recorder)
    }

    #[test]
    fn symbol_keyed_properties_track_their_token() {
        let heap = Arc::new(RwLock::new(Heap::new()));
        let registry = Arc::new(Mutex::new(IdentityRegistry::new()));
        let root = heap.write().materialize(Data::from(json!({"plain": 1})));
        let tracker = Arc::new(crate::tracking::PathTracker::new(registry.clone()));
        let ctx = Arc::new(ProxyContext::new(
            heap,
            registry.clone(),
            StrictModeGate::new(false),
            tracker.clone(),
        ));
        let state = wrap(root.as_node().expect("root is a container"), &ctx);

        let sym = registry.lock().symbol("key");
        state.set(Value::Symbol(sym), 5).unwrap();
        assert_eq!(state.get(Value::Symbol(sym)).as_f64(), Some(5.0));
        state.get("plain");

        let token = registry.lock().value_token(&Value::Symbol(sym));
        let paths = tracker.take();
        assert!(paths.contains(&token));
        assert!(paths.references_token(&token));
        assert!(!paths.references_token("plain"));
    }

    #[test]
    fn nested_reads_report_full_paths() {
        let (state, recorder) = session(json!({"obj": {"name": "a"}}), false);

        let name = state.get("obj").get("name");
        assert_eq!(name.as_str(), Some("a"));
        assert_eq!(
            recorder.take(),
            vec![Event::Get("obj".into()), Event::Get("obj.name".into())]
        );
    }

    #[test]
    fn proxies_are_reused_within_a_session() {
        let (state, _) = session(json!({"obj": {"name": "a"}}), false);

        let first = state.get("obj").into_node().unwrap();
        let second = state.get("obj").into_node().unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(state.context().cached_proxies(), 2);
    }

    #[test]
    fn equal_writes_are_no_ops() {
        let (state, recorder) = session(json!({"count": 1, "obj": {}}), true);
        let obj = state.get("obj").value();
        recorder.take();

        // Strict mode would reject a real mutation, so success proves no-op
        state.set("count", 1).unwrap();
        state.set("obj", obj).unwrap();
        assert!(recorder.mutations().is_empty());
    }

    #[test]
    fn writes_report_set_or_add() {
        let (state, recorder) = session(json!({"obj": {"name": "a"}}), false);
        let obj = state.get("obj").into_node().unwrap();
        recorder.take();

        obj.set("name", "b").unwrap();
        obj.set("age", 3).unwrap();
        assert_eq!(
            recorder.mutations(),
            vec![
                Event::Set("obj.name".into(), Value::from("b")),
                Event::Add("obj.age".into(), Value::from(3)),
            ]
        );
        assert_eq!(state.to_json().unwrap(), json!({"obj": {"name": "b", "age": 3}}));
    }

    #[test]
    fn replacing_an_object_drops_the_cached_proxy() {
        let (state, recorder) = session(json!({"a": {"x": 1}}), false);
        let old = state.get("a").into_node().unwrap();

        state.set("a", json!({"x": 2})).unwrap();
        let new = state.get("a").into_node().unwrap();

        assert!(!old.ptr_eq(&new));
        assert_ne!(old.id(), new.id());
        assert_eq!(new.get("x").as_f64(), Some(2.0));
        assert!(recorder
            .take()
            .iter()
            .any(|e| matches!(e, Event::Set(p, _) if p == "a")));
    }

    #[test]
    fn delete_reports_and_removes() {
        let (state, recorder) = session(json!({"a": 1, "b": 2}), false);

        assert!(state.delete("a").unwrap());
        assert!(!state.delete("missing").unwrap());
        assert_eq!(recorder.mutations(), vec![Event::Delete("a".into())]);
        assert_eq!(state.to_json().unwrap(), json!({"b": 2}));
    }

    #[test]
    fn strict_mode_blocks_writes_without_applying() {
        let (state, recorder) = session(json!({"x": 1}), true);

        let err = state.set("x", 2).unwrap_err();
        assert!(err.is_mutation_not_allowed());
        assert!(state.delete("x").unwrap_err().is_mutation_not_allowed());
        assert!(recorder.mutations().is_empty());
        assert_eq!(state.to_json().unwrap(), json!({"x": 1}));
    }

    #[test]
    fn has_and_entries_record_reads() {
        let (state, recorder) = session(json!({"a": 1, "b": {"c": true}}), false);

        assert!(state.has("a"));
        assert!(!state.has("z"));
        let keys = state.keys();
        assert_eq!(keys, vec![Value::from("a"), Value::from("b")]);

        let reads: Vec<_> = recorder
            .take()
            .into_iter()
            .filter_map(|e| match e {
                Event::Get(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(reads, vec!["a", "z", "a", "b"]);
    }
}
