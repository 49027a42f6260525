//! Subscriber types for the store.
//!
//! A subscriber is a selector over the proxied state plus a callback. The
//! store evaluates the selector in a tracked session, keeps the resulting
//! path set, and re-evaluates it whenever a commit cycle invalidates it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::StoreInner;
use crate::proxy::{ProxyNode, Read};
use crate::tracking::{KeyPath, PathSet};
use crate::value::Value;

/// Unique identifier for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) type Selector = Box<dyn Fn(&ProxyNode) -> Read + Send + Sync>;
pub(crate) type ChangeCallback = Box<dyn Fn(&Read) + Send + Sync>;

/// What one evaluation of a selector read.
#[derive(Debug, Clone, Default)]
pub(crate) struct Evaluation {
    pub(crate) paths: PathSet,
    /// Path and raw value of the selected node, if the selector returned one.
    pub(crate) root: Option<(KeyPath, Value)>,
}

pub(crate) struct SubscriberEntry {
    id: SubscriberId,
    selector: Selector,
    on_change: ChangeCallback,
    last: Mutex<Evaluation>,
    active: AtomicBool,
    runs: AtomicUsize,
}

impl SubscriberEntry {
    pub(crate) fn new(selector: Selector, on_change: ChangeCallback) -> Self {
        Self {
            id: SubscriberId::new(),
            selector,
            on_change,
            last: Mutex::new(Evaluation::default()),
            active: AtomicBool::new(true),
            runs: AtomicUsize::new(0),
        }
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn select(&self, state: &ProxyNode) -> Read {
        self.runs.fetch_add(1, Ordering::SeqCst);
        (self.selector)(state)
    }

    pub(crate) fn notify(&self, selected: &Read) {
        (self.on_change)(selected);
    }

    /// Inspect the last evaluation without cloning it.
    pub(crate) fn with_last<R>(&self, f: impl FnOnce(&Evaluation) -> R) -> R {
        f(&self.last.lock())
    }

    pub(crate) fn store_evaluation(&self, evaluation: Evaluation) {
        *self.last.lock() = evaluation;
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Handle to a registered subscriber.
///
/// Dropping this handle unsubscribes.
pub struct Subscription {
    entry: Arc<SubscriberEntry>,
    store: Weak<StoreInner>,
}

impl Subscription {
    pub(crate) fn new(entry: Arc<SubscriberEntry>, store: Weak<StoreInner>) -> Self {
        Self { entry, store }
    }

    pub fn id(&self) -> SubscriberId {
        self.entry.id
    }

    /// Paths read during the last evaluation.
    pub fn paths(&self) -> PathSet {
        self.entry.with_last(|last| last.paths.clone())
    }

    /// Number of times the selector has been evaluated.
    pub fn run_count(&self) -> usize {
        self.entry.runs.load(Ordering::SeqCst)
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.entry.deactivate();
        if let Some(store) = self.store.upgrade() {
            store.remove_subscriber(self.entry.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.entry.id)
            .field("run_count", &self.run_count())
            .finish()
    }
}
