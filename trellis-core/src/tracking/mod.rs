//! Dependency Tracking
//!
//! This module holds everything that turns proxy events into invalidation
//! decisions.
//!
//! # Concepts
//!
//! ## Key paths and identity tokens
//!
//! Every read and write is reported with the full [`KeyPath`] from the store
//! root. Paths are compared in rendered string form; the
//! [`IdentityRegistry`] supplies stable tokens for keys that have no string
//! form (nodes used as map keys, symbols).
//!
//! ## Read side
//!
//! A [`PathTracker`] collects the paths read during one session into a
//! [`PathSet`]. A subscriber keeps the set from its last evaluation.
//!
//! ## Write side
//!
//! The [`EffectLog`] collects added, changed and deleted paths for one
//! commit cycle. After the cycle it is drained and compiled into an
//! [`Invalidation`], which is matched against every live path set.

mod effect_log;
mod identity;
mod matcher;
mod path;
mod tracker;

pub use effect_log::{EffectLog, Effects};
pub use identity::IdentityRegistry;
pub use matcher::{Invalidated, Invalidation};
pub use path::{
    array_length, child_path, KeyPath, PathKey, RenderedPath, LENGTH_KEY, MAX_ARRAY_LENGTH,
    SIZE_KEY,
};
pub use tracker::{PathSet, PathTracker};
