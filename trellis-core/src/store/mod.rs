//! Store
//!
//! A [`Store`] owns one state tree, a table of named actions and the
//! subscribers that select from the tree.
//!
//! # Concepts
//!
//! ## Cycles
//!
//! Every [`Store::dispatch`] and [`Store::mutate`] runs as a cycle: the
//! callback gets a fresh proxy of the root, every write it makes is appended
//! to the store's effect log, and when the outermost cycle finishes the log
//! is drained and matched against each subscriber's cached path set.
//! Subscribers that are affected re-run their selector and receive the new
//! selection. Cycles nest: dispatching from inside an action, or from a
//! change callback, joins or starts a cycle on the same thread.
//!
//! ## Reset
//!
//! Every store carries a built-in `reset` action. Without arguments it
//! rebuilds the initial state (calling the factory again when one was
//! given); with an argument it installs that value as the new root. A user
//! action named `reset` is ignored.
//!
//! ## Strictness
//!
//! With `strict_mode` on, writes are only accepted while an action runs.
//! Writes through [`Store::mutate`] or [`Store::state`] are then rejected
//! with [`StoreError::MutationNotAllowed`].

mod options;
mod subscriber;

pub use options::StoreOptions;
pub use subscriber::{SubscriberId, Subscription};

use std::cell::Cell;
use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::gate::StrictModeGate;
use crate::proxy::{wrap, ProxyContext, ProxyNode, ProxyObserver, Read};
use crate::tracking::{
    EffectLog, Effects, IdentityRegistry, Invalidation, KeyPath, PathKey, PathSet, PathTracker,
    LENGTH_KEY, SIZE_KEY,
};
use crate::value::{Data, Heap, Node, NodeId, SymbolId, Value};
use subscriber::{Evaluation, SubscriberEntry};

/// Name of the built-in reset action.
pub const RESET_ACTION: &str = "reset";

/// A user action: receives the proxied root and the dispatch arguments.
pub type ActionFn = Arc<dyn Fn(&ProxyNode, &[Data]) -> Result<()> + Send + Sync>;

/// How the initial state is produced.
#[derive(Clone)]
pub enum InitState {
    /// A fixed tree, materialized again on every reset.
    Data(Data),
    /// A factory called on build and on every argument-less reset.
    Factory(Arc<dyn Fn() -> Data + Send + Sync>),
}

impl InitState {
    fn produce(&self) -> Data {
        match self {
            InitState::Data(data) => data.clone(),
            InitState::Factory(factory) => factory(),
        }
    }
}

impl Default for InitState {
    fn default() -> Self {
        InitState::Data(Data::Object(Vec::new()))
    }
}

enum Action {
    Reset,
    User(ActionFn),
}

/// Routes one session's events: reads to the tracker, writes to the log.
struct SessionObserver {
    tracker: Option<Arc<PathTracker>>,
    log: Arc<Mutex<EffectLog>>,
}

impl ProxyObserver for SessionObserver {
    fn on_get(&self, _value: &Value, path: &KeyPath) {
        if let Some(tracker) = &self.tracker {
            tracker.record(path);
        }
    }

    fn on_set(&self, _value: &Value, path: &KeyPath) {
        self.log.lock().add_changed(path.clone());
    }

    fn on_add(&self, _value: &Value, path: &KeyPath) {
        self.log.lock().add_added(path.clone());
    }

    fn on_delete(&self, _value: &Value, path: &KeyPath) {
        self.log.lock().add_deleted(path.clone());
    }
}

/// Builder for a [`Store`].
pub struct StoreBuilder {
    name: String,
    init: InitState,
    actions: Vec<(String, ActionFn)>,
    options: StoreOptions,
}

impl StoreBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            init: InitState::default(),
            actions: Vec::new(),
            options: StoreOptions::default(),
        }
    }

    /// Set the initial state.
    pub fn init(mut self, data: impl Into<Data>) -> Self {
        self.init = InitState::Data(data.into());
        self
    }

    /// Produce the initial state from a factory.
    pub fn init_with(mut self, factory: impl Fn() -> Data + Send + Sync + 'static) -> Self {
        self.init = InitState::Factory(Arc::new(factory));
        self
    }

    /// Declare an action. A later declaration with the same name replaces
    /// the earlier one.
    pub fn action(
        mut self,
        name: impl Into<String>,
        action: impl Fn(&ProxyNode, &[Data]) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.actions.push((name.into(), Arc::new(action)));
        self
    }

    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn strict_mode(mut self, strict: bool) -> Self {
        self.options.strict_mode = strict;
        self
    }

    pub fn proxy_set_deep(mut self, deep: bool) -> Self {
        self.options.proxy_set_deep = deep;
        self
    }

    pub fn build(self) -> Result<Store> {
        let mut heap = Heap::new();
        let root = root_node(heap.materialize(self.init.produce()))?;

        let mut actions = IndexMap::new();
        actions.insert(RESET_ACTION.to_string(), Action::Reset);
        for (name, action) in self.actions {
            if name == RESET_ACTION {
                warn!(store = %self.name, "ignoring user-declared `reset` action");
                continue;
            }
            actions.insert(name, Action::User(action));
        }

        debug!(
            store = %self.name,
            actions = actions.len(),
            strict = self.options.strict_mode,
            "store created"
        );

        Ok(Store {
            inner: Arc::new(StoreInner {
                gate: StrictModeGate::new(self.options.strict_mode),
                name: self.name,
                options: self.options,
                init: self.init,
                heap: Arc::new(RwLock::new(heap)),
                root: RwLock::new(root),
                registry: Arc::new(Mutex::new(IdentityRegistry::new())),
                log: Arc::new(Mutex::new(EffectLog::new())),
                actions,
                subscribers: Mutex::new(IndexMap::new()),
                cycle: ReentrantMutex::new(Cell::new(0)),
            }),
        })
    }
}

pub(crate) struct StoreInner {
    name: String,
    options: StoreOptions,
    init: InitState,
    heap: Arc<RwLock<Heap>>,
    root: RwLock<NodeId>,
    registry: Arc<Mutex<IdentityRegistry>>,
    log: Arc<Mutex<EffectLog>>,
    gate: StrictModeGate,
    actions: IndexMap<String, Action>,
    subscribers: Mutex<IndexMap<SubscriberId, Arc<SubscriberEntry>>>,
    /// Depth of the running cycle on the thread holding the lock.
    cycle: ReentrantMutex<Cell<usize>>,
}

impl StoreInner {
    pub(crate) fn remove_subscriber(&self, id: SubscriberId) {
        if self.subscribers.lock().shift_remove(&id).is_some() {
            debug!(store = %self.name, subscriber = ?id, "unsubscribed");
        }
    }
}

/// Decrements the cycle depth even if the callback panics.
struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// A reactive state store.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn builder(name: impl Into<String>) -> StoreBuilder {
        StoreBuilder::new(name.into())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> StoreOptions {
        self.inner.options
    }

    /// Declared action names, `reset` first.
    pub fn action_names(&self) -> Vec<&str> {
        self.inner.actions.keys().map(String::as_str).collect()
    }

    pub fn root(&self) -> NodeId {
        *self.inner.root.read()
    }

    /// Create a symbol usable as a key or value in this store.
    pub fn symbol(&self, description: impl Into<String>) -> SymbolId {
        self.inner.registry.lock().symbol(description)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    fn context(&self, tracker: Option<Arc<PathTracker>>) -> Arc<ProxyContext> {
        let observer = Arc::new(SessionObserver {
            tracker,
            log: Arc::clone(&self.inner.log),
        });
        Arc::new(
            ProxyContext::new(
                Arc::clone(&self.inner.heap),
                Arc::clone(&self.inner.registry),
                self.inner.gate.clone(),
                observer,
            )
            .with_proxy_set_deep(self.inner.options.proxy_set_deep),
        )
    }

    /// Untracked proxy of the root.
    ///
    /// Writes through it are logged and delivered on the next
    /// [`Store::flush`] or at the end of the next cycle.
    pub fn state(&self) -> ProxyNode {
        wrap(self.root(), &self.context(None))
    }

    /// Run `f` against a tracked proxy and return what it read.
    ///
    /// Bindings that hold on to a selection should use
    /// [`Store::read_selection`].
    pub fn read<T>(&self, f: impl FnOnce(&ProxyNode) -> T) -> (T, PathSet) {
        let tracker = Arc::new(PathTracker::new(Arc::clone(&self.inner.registry)));
        let state = wrap(self.root(), &self.context(Some(Arc::clone(&tracker))));
        let out = f(&state);
        (out, tracker.take())
    }

    /// Run a selector against a tracked proxy, as [`Store::subscribe`] does.
    ///
    /// A selection that is an array also depends on its `length`.
    pub fn read_selection(&self, f: impl FnOnce(&ProxyNode) -> Read) -> (Read, PathSet) {
        let tracker = Arc::new(PathTracker::new(Arc::clone(&self.inner.registry)));
        let state = wrap(self.root(), &self.context(Some(Arc::clone(&tracker))));
        let selected = f(&state);
        tracker.record_root(&selected);
        (selected, tracker.take())
    }

    /// Run a named action as one cycle.
    ///
    /// Errors raised by the action are returned after the cycle commits;
    /// writes it made before failing are kept.
    pub fn dispatch(&self, name: &str, args: &[Data]) -> Result<()> {
        let action = match self.inner.actions.get(name) {
            Some(Action::Reset) => None,
            Some(Action::User(action)) => Some(Arc::clone(action)),
            None => return Err(StoreError::UnknownAction(name.to_string())),
        };
        debug!(store = %self.inner.name, action = name, args = args.len(), "dispatch");

        self.cycle(true, |state| match &action {
            Some(action) => action(state, args),
            None => self.replace_root(args.first().cloned()),
        })
    }

    /// Restore the initial state.
    pub fn reset(&self) -> Result<()> {
        self.dispatch(RESET_ACTION, &[])
    }

    /// Replace the whole state with `data`.
    pub fn reset_to(&self, data: impl Into<Data>) -> Result<()> {
        self.dispatch(RESET_ACTION, &[data.into()])
    }

    /// Run `f` as a cycle outside any action.
    pub fn mutate<T>(&self, f: impl FnOnce(&ProxyNode) -> Result<T>) -> Result<T> {
        self.cycle(false, f)
    }

    fn cycle<T>(&self, in_action: bool, f: impl FnOnce(&ProxyNode) -> Result<T>) -> Result<T> {
        let depth = self.inner.cycle.lock();
        depth.set(depth.get() + 1);
        let result = {
            let _depth = DepthGuard(&*depth);
            let _scope = in_action.then(|| self.inner.gate.enter_action());
            f(&self.state())
        };
        if depth.get() == 0 {
            self.commit();
        }
        result
    }

    /// Deliver pending writes to subscribers.
    ///
    /// Inside a running cycle this does nothing; the outermost cycle
    /// commits when it ends. Returns the number of subscribers notified.
    pub fn flush(&self) -> usize {
        let depth = self.inner.cycle.lock();
        if depth.get() > 0 {
            return 0;
        }
        self.commit()
    }

    /// Take the pending effects without notifying anyone.
    pub fn drain(&self) -> Effects {
        self.inner.log.lock().drain()
    }

    fn commit(&self) -> usize {
        let effects = self.inner.log.lock().drain();
        if effects.is_empty() {
            return 0;
        }
        let invalidation = Invalidation::compile(&effects, &mut self.inner.registry.lock());
        debug!(
            store = %self.inner.name,
            added = effects.added.len(),
            changed = effects.changed.len(),
            deleted = effects.deleted.len(),
            root_replaced = effects.root_replaced,
            "commit"
        );
        if invalidation.is_empty() {
            return 0;
        }

        let subscribers: Vec<_> = self.inner.subscribers.lock().values().cloned().collect();
        let mut notified = 0;
        for entry in subscribers {
            if !entry.is_active() {
                continue;
            }
            let reason = entry.with_last(|last| {
                let root_changed = last
                    .root
                    .as_ref()
                    .is_some_and(|(path, value)| self.resolve(path) != *value);
                invalidation.affects(&last.paths, root_changed)
            });
            if let Some(reason) = reason {
                debug!(store = %self.inner.name, subscriber = ?entry.id(), ?reason, "invalidated");
                self.evaluate(&entry, true);
                notified += 1;
            }
        }
        notified
    }

    /// Run a subscriber's selector in a tracked session and cache what it read.
    fn evaluate(&self, entry: &SubscriberEntry, notify: bool) {
        let tracker = Arc::new(PathTracker::new(Arc::clone(&self.inner.registry)));
        let state = wrap(self.root(), &self.context(Some(Arc::clone(&tracker))));
        let selected = entry.select(&state);
        tracker.record_root(&selected);
        let root = selected
            .as_node()
            .map(|node| (node.path().clone(), node.raw()));
        entry.store_evaluation(Evaluation {
            paths: tracker.take(),
            root,
        });
        if notify {
            entry.notify(&selected);
        }
    }

    /// Untracked lookup of `path` from the root.
    fn resolve(&self, path: &KeyPath) -> Value {
        // Property names of reference keys, taken before the heap lock.
        let names: Vec<Option<String>> = {
            let mut registry = self.inner.registry.lock();
            path.iter()
                .map(|key| match key {
                    PathKey::Value(value) if value.is_reference() => {
                        Some(registry.value_token(value))
                    }
                    _ => None,
                })
                .collect()
        };

        let heap = self.inner.heap.read();
        let mut current = Value::Node(self.root());
        for (key, name) in path.iter().zip(&names) {
            let Some(id) = current.as_node() else {
                return Value::Undefined;
            };
            current = match heap.get(id) {
                Some(Node::Object(map)) => match (key, name) {
                    (PathKey::Str(name), _) | (_, Some(name)) => map.get(name).cloned(),
                    _ => None,
                },
                Some(Node::Array(items)) => key.as_index().and_then(|i| items.get(i).cloned()),
                Some(Node::Map(map)) => map.get(&key.clone().into_value()).cloned(),
                Some(Node::Set(set)) => {
                    let member = key.clone().into_value();
                    set.contains(&member).then_some(member)
                }
                None => None,
            }
            .unwrap_or_default();
        }
        current
    }

    fn replace_root(&self, data: Option<Data>) -> Result<()> {
        let data = data.unwrap_or_else(|| self.inner.init.produce());
        let (old_keys, new_keys) = {
            let mut heap = self.inner.heap.write();
            let new_root = root_node(heap.materialize(data))?;
            let old_root = std::mem::replace(&mut *self.inner.root.write(), new_root);
            (child_keys(&heap, old_root), child_keys(&heap, new_root))
        };

        let mut log = self.inner.log.lock();
        log.mark_root_replaced();
        for key in &old_keys {
            log.add_changed(std::iter::once(key.clone()).collect());
        }
        for key in new_keys.into_iter().filter(|key| !old_keys.contains(key)) {
            log.add_added(std::iter::once(key).collect());
        }
        debug!(store = %self.inner.name, "root replaced");
        Ok(())
    }

    /// Subscribe to a selection of the state.
    ///
    /// The selector runs once immediately to record what it reads, and again
    /// after every commit that touches one of those paths; `on_change`
    /// receives each new selection.
    pub fn subscribe<S, C>(&self, selector: S, on_change: C) -> Subscription
    where
        S: Fn(&ProxyNode) -> Read + Send + Sync + 'static,
        C: Fn(&Read) + Send + Sync + 'static,
    {
        let entry = Arc::new(SubscriberEntry::new(Box::new(selector), Box::new(on_change)));
        self.evaluate(&entry, false);
        self.inner
            .subscribers
            .lock()
            .insert(entry.id(), Arc::clone(&entry));
        debug!(store = %self.inner.name, subscriber = ?entry.id(), "subscribed");
        Subscription::new(entry, Arc::downgrade(&self.inner))
    }

    /// Plain JSON copy of the current state.
    pub fn snapshot(&self) -> Result<serde_json::Value> {
        let registry = self.inner.registry.lock();
        let describe = |sym: SymbolId| registry.describe_symbol(sym);
        self.inner
            .heap
            .read()
            .export(&Value::Node(self.root()), &describe)
    }

    /// Whether the current state exports to exactly `expected`.
    pub fn deep_eq_snapshot(&self, expected: &serde_json::Value) -> Result<bool> {
        Ok(self.snapshot()? == *expected)
    }

    /// Free nodes no longer reachable from the root and forget their tokens.
    ///
    /// Returns the number of nodes freed.
    pub fn collect_garbage(&self) -> usize {
        let _cycle = self.inner.cycle.lock();
        let mut roots = vec![Value::Node(self.root())];
        if let InitState::Data(data) = &self.inner.init {
            data_refs(data, &mut roots);
        }

        let freed: HashSet<NodeId> = self.inner.heap.write().collect(&roots).into_iter().collect();
        if freed.is_empty() {
            return 0;
        }
        let pruned = self
            .inner
            .registry
            .lock()
            .retain_nodes(|id| !freed.contains(&id));
        debug!(store = %self.inner.name, freed = freed.len(), pruned, "collected garbage");
        freed.len()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("root", &self.root())
            .field("options", &self.inner.options)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn root_node(value: Value) -> Result<NodeId> {
    match value {
        Value::Node(id) => Ok(id),
        other => Err(StoreError::InvalidRoot(other.type_name())),
    }
}

/// Top-level keys of a node as path keys, including its count key.
fn child_keys(heap: &Heap, id: NodeId) -> Vec<PathKey> {
    match heap.get(id) {
        Some(Node::Object(map)) => map.keys().map(|k| PathKey::Str(k.clone())).collect(),
        Some(Node::Array(items)) => (0..items.len())
            .map(PathKey::Index)
            .chain(std::iter::once(PathKey::from(LENGTH_KEY)))
            .collect(),
        Some(Node::Map(map)) => map
            .keys()
            .map(|k| PathKey::from_value(k.clone()))
            .chain(std::iter::once(PathKey::from(SIZE_KEY)))
            .collect(),
        Some(Node::Set(set)) => set
            .iter()
            .map(|m| PathKey::from_value(m.clone()))
            .chain(std::iter::once(PathKey::from(SIZE_KEY)))
            .collect(),
        None => Vec::new(),
    }
}

/// Node references embedded in an input tree.
fn data_refs(data: &Data, out: &mut Vec<Value>) {
    match data {
        Data::Value(value) => {
            if value.is_node() {
                out.push(value.clone());
            }
        }
        Data::Array(items) | Data::Set(items) => items.iter().for_each(|d| data_refs(d, out)),
        Data::Object(fields) => fields.iter().for_each(|(_, d)| data_refs(d, out)),
        Data::Map(entries) => entries.iter().for_each(|(k, v)| {
            data_refs(k, out);
            data_refs(v, out);
        }),
    }
}
