//! Invalidation Matcher
//!
//! Decides which subscribers a drained effect log affects.
//!
//! # Rules
//!
//! 1. A subscriber whose root selection changed identity is always affected,
//!    and so is every subscriber when the store root was replaced.
//! 2. Changed and deleted paths that go through an identity token are
//!    *update-class*: they affect any subscriber whose path set references
//!    that token at all. Tokens are assigned lazily, so an exact string match
//!    is not enough to rule those subscribers out.
//! 3. Remaining (*pure*) paths affect a subscriber only on an exact match.
//! 4. Added paths never affect existing subscribers on their own.
//!
//! The rules over-invalidate rather than risk a stale read.

use std::collections::HashSet;

use super::effect_log::Effects;
use super::identity::IdentityRegistry;
use super::tracker::PathSet;

/// Why a subscriber was judged affected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidated {
    /// The store root was replaced.
    RootReplaced,
    /// The subscriber's root selection resolves to a different value.
    RootChanged,
    /// A changed or deleted path was read exactly.
    Path(String),
    /// A changed or deleted path went through a token the subscriber touched.
    Token(String),
}

/// A drained log, rendered and classified once for matching against many
/// subscribers.
#[derive(Debug, Clone, Default)]
pub struct Invalidation {
    root_replaced: bool,
    /// Every rendered changed/deleted path, update-class ones included.
    paths: HashSet<String>,
    /// Tokens appearing in update-class paths.
    tokens: HashSet<String>,
}

impl Invalidation {
    /// Render and classify the changed and deleted buckets of `effects`.
    pub fn compile(effects: &Effects, registry: &mut IdentityRegistry) -> Self {
        let mut invalidation = Invalidation {
            root_replaced: effects.root_replaced,
            ..Default::default()
        };

        for path in effects.changed.iter().chain(&effects.deleted) {
            let rendered = registry.render(path);
            invalidation.tokens.extend(rendered.tokens);
            invalidation.paths.insert(rendered.text);
        }

        tracing::trace!(
            pure = invalidation.paths.len(),
            tokens = invalidation.tokens.len(),
            root_replaced = invalidation.root_replaced,
            "compiled invalidation"
        );
        invalidation
    }

    /// Whether nothing in the log can affect any subscriber.
    pub fn is_empty(&self) -> bool {
        !self.root_replaced && self.paths.is_empty()
    }

    /// Decide whether a subscriber with `paths` is affected.
    ///
    /// `root_changed` reports whether the subscriber's root selection
    /// resolves to a different value than when it was evaluated.
    pub fn affects(&self, paths: &PathSet, root_changed: bool) -> Option<Invalidated> {
        if self.root_replaced {
            return Some(Invalidated::RootReplaced);
        }
        if root_changed {
            return Some(Invalidated::RootChanged);
        }
        if let Some(token) = self.tokens.iter().find(|t| paths.references_token(t)) {
            return Some(Invalidated::Token(token.clone()));
        }
        paths
            .iter()
            .find(|p| self.paths.contains(*p))
            .map(|p| Invalidated::Path(p.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{KeyPath, PathKey};
    use crate::value::{Heap, Node, Value};
    use smallvec::smallvec;

    fn path(keys: &[&str]) -> KeyPath {
        keys.iter().map(|k| PathKey::from(*k)).collect()
    }

    #[test]
    fn pure_paths_match_exactly() {
        let mut registry = IdentityRegistry::new();
        let effects = Effects {
            changed: vec![path(&["obj", "name"])],
            ..Default::default()
        };
        let invalidation = Invalidation::compile(&effects, &mut registry);

        let reads_name: PathSet = ["obj", "obj.name"].into_iter().collect();
        let reads_obj: PathSet = ["obj"].into_iter().collect();

        assert_eq!(
            invalidation.affects(&reads_name, false),
            Some(Invalidated::Path("obj.name".into()))
        );
        assert_eq!(invalidation.affects(&reads_obj, false), None);
    }

    #[test]
    fn added_paths_do_not_invalidate() {
        let mut registry = IdentityRegistry::new();
        let effects = Effects {
            added: vec![path(&["list", "3"])],
            ..Default::default()
        };
        let invalidation = Invalidation::compile(&effects, &mut registry);
        let reads: PathSet = ["list", "list.3"].into_iter().collect();

        assert!(invalidation.is_empty());
        assert_eq!(invalidation.affects(&reads, false), None);
    }

    #[test]
    fn root_changes_skip_path_matching() {
        let mut registry = IdentityRegistry::new();
        let invalidation = Invalidation::compile(&Effects::default(), &mut registry);

        assert_eq!(
            invalidation.affects(&PathSet::new(), true),
            Some(Invalidated::RootChanged)
        );

        let replaced = Invalidation::compile(
            &Effects {
                root_replaced: true,
                ..Default::default()
            },
            &mut registry,
        );
        assert_eq!(
            replaced.affects(&PathSet::new(), false),
            Some(Invalidated::RootReplaced)
        );
    }

    #[test]
    fn token_paths_match_any_reference() {
        let mut heap = Heap::new();
        let key = Value::Node(heap.alloc(Node::Object(Default::default())));
        let other = Value::Node(heap.alloc(Node::Object(Default::default())));
        let mut registry = IdentityRegistry::new();
        let token = registry.value_token(&key);
        let other_token = registry.value_token(&other);

        let effects = Effects {
            deleted: vec![smallvec![PathKey::from("m"), PathKey::Value(key)]],
            ..Default::default()
        };
        let invalidation = Invalidation::compile(&effects, &mut registry);

        // Reads the same key through a different container path.
        let mut aliased = PathSet::new();
        aliased.insert(format!("alias.{token}.name"));
        aliased.insert_token(token.clone());
        assert_eq!(
            invalidation.affects(&aliased, false),
            Some(Invalidated::Token(token))
        );

        let mut unrelated = PathSet::new();
        unrelated.insert(format!("n.{other_token}"));
        unrelated.insert_token(other_token);
        assert_eq!(invalidation.affects(&unrelated, false), None);
    }
}
