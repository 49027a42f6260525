//! Proxy Context
//!
//! A context is the state shared by every proxy created in one session: the
//! heap and registry of the store, the gate, the observer receiving events,
//! the path prefix the session starts from, and the reuse cache that keeps
//! one proxy per node.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::{ProxyNode, ProxyNodeInner};
use crate::error::{MutationKind, Result};
use crate::gate::StrictModeGate;
use crate::tracking::{IdentityRegistry, KeyPath};
use crate::value::{Heap, NodeId, Value};

/// Receives the events emitted by proxy traps.
///
/// Each callback gets the value involved (the new value for get/set/add, the
/// removed value for delete) and the absolute key path.
pub trait ProxyObserver: Send + Sync {
    fn on_get(&self, _value: &Value, _path: &KeyPath) {}
    fn on_set(&self, _value: &Value, _path: &KeyPath) {}
    fn on_add(&self, _value: &Value, _path: &KeyPath) {}
    fn on_delete(&self, _value: &Value, _path: &KeyPath) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ProxyObserver for NullObserver {}

/// Shared state for the proxies of one session.
pub struct ProxyContext {
    pub(crate) heap: Arc<RwLock<Heap>>,
    pub(crate) registry: Arc<Mutex<IdentityRegistry>>,
    pub(crate) gate: StrictModeGate,
    pub(crate) observer: Arc<dyn ProxyObserver>,
    keys_stack: KeyPath,
    proxy_map: Mutex<HashMap<NodeId, Weak<ProxyNodeInner>>>,
    proxy_set_deep: bool,
}

impl ProxyContext {
    pub fn new(
        heap: Arc<RwLock<Heap>>,
        registry: Arc<Mutex<IdentityRegistry>>,
        gate: StrictModeGate,
        observer: Arc<dyn ProxyObserver>,
    ) -> Self {
        Self {
            heap,
            registry,
            gate,
            observer,
            keys_stack: KeyPath::new(),
            proxy_map: Mutex::new(HashMap::new()),
            proxy_set_deep: true,
        }
    }

    /// Start paths from `prefix` instead of the root, for wrapping a
    /// sub-tree while keeping absolute paths.
    pub fn with_keys_stack(mut self, prefix: KeyPath) -> Self {
        self.keys_stack = prefix;
        self
    }

    /// Whether map values and set members are wrapped as tracked proxies.
    pub fn with_proxy_set_deep(mut self, deep: bool) -> Self {
        self.proxy_set_deep = deep;
        self
    }

    pub fn keys_stack(&self) -> &KeyPath {
        &self.keys_stack
    }

    pub fn proxy_set_deep(&self) -> bool {
        self.proxy_set_deep
    }

    /// Number of live proxies in the reuse cache.
    pub fn cached_proxies(&self) -> usize {
        self.proxy_map
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Return the session's proxy for `target`, creating it at `path` if
    /// none is live.
    pub(crate) fn proxy_for(self: &Arc<Self>, target: NodeId, path: KeyPath) -> ProxyNode {
        let mut map = self.proxy_map.lock();
        if let Some(inner) = map.get(&target).and_then(Weak::upgrade) {
            return ProxyNode { inner };
        }

        let inner = Arc::new(ProxyNodeInner {
            target,
            path,
            ctx: Arc::clone(self),
        });
        map.insert(target, Arc::downgrade(&inner));
        ProxyNode { inner }
    }

    /// Drop the cached proxy of a value that was superseded by a write.
    pub(crate) fn forget(&self, value: &Value) {
        if let Value::Node(id) = value {
            self.proxy_map.lock().remove(id);
        }
    }

    /// Ask the gate whether a mutation at `path` may proceed.
    pub(crate) fn guard(&self, op: MutationKind, path: &KeyPath) -> Result<()> {
        self.gate.guard(op, || self.registry.lock().render(path).text)
    }

    pub(crate) fn emit(&self, op: MutationKind, value: &Value, path: &KeyPath) {
        tracing::trace!(%op, depth = path.len(), "proxy mutation");
        match op {
            MutationKind::Set => self.observer.on_set(value, path),
            MutationKind::Add => self.observer.on_add(value, path),
            MutationKind::Delete => self.observer.on_delete(value, path),
        }
    }
}

impl std::fmt::Debug for ProxyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyContext")
            .field("keys_stack", &self.keys_stack)
            .field("proxy_set_deep", &self.proxy_set_deep)
            .field("cached_proxies", &self.cached_proxies())
            .finish()
    }
}

/// Wrap `target` for one session.
///
/// The returned proxy reports paths starting from the context's keys stack.
/// Wrapping the same node twice in a session returns the same proxy while
/// the first one is alive.
pub fn wrap(target: NodeId, context: &Arc<ProxyContext>) -> ProxyNode {
    context.proxy_for(target, context.keys_stack.clone())
}
