//! Path Tracker
//!
//! A tracker accumulates the key paths touched during one read session. The
//! resulting [`PathSet`] is what a subscriber caches between evaluations and
//! what the matcher compares against each drained effect log.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;

use super::identity::IdentityRegistry;
use super::path::{child_path, KeyPath, PathKey, LENGTH_KEY};
use crate::proxy::{ProxyObserver, Read};
use crate::value::{NodeKind, Value};

/// The rendered paths read during one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSet {
    paths: IndexSet<String>,
    /// Identity tokens appearing in any recorded path.
    tokens: HashSet<String>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rendered path. Returns false if it was already present.
    pub fn insert(&mut self, path: impl Into<String>) -> bool {
        self.paths.insert(path.into())
    }

    /// Note that a recorded path goes through an identity token.
    pub fn insert_token(&mut self, token: impl Into<String>) {
        self.tokens.insert(token.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// Whether any recorded path goes through `token`.
    pub fn references_token(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Recorded paths in first-read order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for PathSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = PathSet::new();
        for path in iter {
            set.insert(path);
        }
        set
    }
}

/// Accumulator for one read session.
pub struct PathTracker {
    registry: Arc<Mutex<IdentityRegistry>>,
    paths: Mutex<PathSet>,
}

impl PathTracker {
    pub fn new(registry: Arc<Mutex<IdentityRegistry>>) -> Self {
        Self {
            registry,
            paths: Mutex::new(PathSet::new()),
        }
    }

    /// Record a read of `path`. Recording the same path again is a no-op.
    pub fn record(&self, path: &KeyPath) {
        let rendered = self.registry.lock().render(path);
        let mut paths = self.paths.lock();
        for token in rendered.tokens {
            paths.insert_token(token);
        }
        if paths.insert(rendered.text.clone()) {
            tracing::trace!(path = %rendered.text, "recorded read");
        }
    }

    /// Apply the root-read rule: a selection that yields an array also
    /// depends on that array's length.
    pub fn record_root(&self, read: &Read) {
        if let Read::Node(node) = read {
            if node.kind() == Some(NodeKind::Array) {
                self.record(&child_path(node.path(), PathKey::from(LENGTH_KEY)));
            }
        }
    }

    /// A copy of the paths recorded so far.
    pub fn path_set(&self) -> PathSet {
        self.paths.lock().clone()
    }

    /// Take the recorded paths, leaving the tracker empty.
    pub fn take(&self) -> PathSet {
        std::mem::take(&mut *self.paths.lock())
    }
}

impl ProxyObserver for PathTracker {
    fn on_get(&self, _value: &Value, path: &KeyPath) {
        self.record(path);
    }
}

impl std::fmt::Debug for PathTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathTracker")
            .field("recorded", &self.paths.lock().len())
            .finish()
    }
}
