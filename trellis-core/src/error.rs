//! Error types for the store.

use std::fmt;

use thiserror::Error;

/// The kind of mutation a trap attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Set,
    Add,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationKind::Set => "set",
            MutationKind::Add => "add",
            MutationKind::Delete => "delete",
        })
    }
}

/// Errors raised by the store and its proxies.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A mutating trap ran outside an action while strict mode is on.
    #[error("strict mode: {op} of `{path}` is not allowed outside an action")]
    MutationNotAllowed { op: MutationKind, path: String },

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    /// The initial or reset state was not a container.
    #[error("state root must be an object, array, map or set, got {0}")]
    InvalidRoot(&'static str),

    #[error("cannot snapshot a cyclic value")]
    CyclicValue,

    #[error("invalid store options: {0}")]
    Config(#[from] serde_json::Error),

    /// An error raised by user action code, passed through untouched.
    #[error(transparent)]
    Action(Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap an error raised inside an action.
    pub fn action(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StoreError::Action(err.into())
    }

    /// Whether this is a strict-mode rejection.
    pub fn is_mutation_not_allowed(&self) -> bool {
        matches!(self, StoreError::MutationNotAllowed { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
