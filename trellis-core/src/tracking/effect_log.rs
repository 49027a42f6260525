//! Mutation Effect Log
//!
//! Each store owns one log. Every mutation made during a commit cycle lands
//! in one of three buckets, and the whole log is drained exactly once when
//! the cycle completes.

use super::path::KeyPath;

/// Paths touched during one commit cycle.
#[derive(Debug, Clone, Default)]
pub struct Effects {
    pub added: Vec<KeyPath>,
    pub changed: Vec<KeyPath>,
    pub deleted: Vec<KeyPath>,
    /// The store root was replaced wholesale.
    pub root_replaced: bool,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        !self.root_replaced
            && self.added.is_empty()
            && self.changed.is_empty()
            && self.deleted.is_empty()
    }

    /// Total number of recorded paths.
    pub fn len(&self) -> usize {
        self.added.len() + self.changed.len() + self.deleted.len()
    }
}

/// Per-store accumulator for the current commit cycle.
#[derive(Debug, Default)]
pub struct EffectLog {
    pending: Effects,
}

impl EffectLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_changed(&mut self, path: KeyPath) {
        self.pending.changed.push(path);
    }

    pub fn add_added(&mut self, path: KeyPath) {
        self.pending.added.push(path);
    }

    pub fn add_deleted(&mut self, path: KeyPath) {
        self.pending.deleted.push(path);
    }

    pub fn mark_root_replaced(&mut self) {
        self.pending.root_replaced = true;
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Return everything recorded since the last drain and start a new cycle.
    pub fn drain(&mut self) -> Effects {
        std::mem::take(&mut self.pending)
    }
}
