//! Strict-Mode Gate
//!
//! In strict mode, state may only change while an action runs. The
//! dispatcher marks action execution by entering an [`ActionScope`]; every
//! mutating trap asks the gate before touching the raw tree.
//!
//! # Implementation
//!
//! The gate counts open action scopes. Scopes nest (an action may dispatch
//! another), and the count drops when each guard is dropped, so a failing
//! action cannot leave the gate open.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{MutationKind, Result, StoreError};

#[derive(Debug)]
struct GateState {
    strict: bool,
    depth: AtomicUsize,
}

/// Per-store mutation gate. Clones share state.
#[derive(Debug, Clone)]
pub struct StrictModeGate {
    state: Arc<GateState>,
}

impl StrictModeGate {
    pub fn new(strict: bool) -> Self {
        Self {
            state: Arc::new(GateState {
                strict,
                depth: AtomicUsize::new(0),
            }),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.state.strict
    }

    /// Whether an action is currently executing.
    pub fn in_action(&self) -> bool {
        self.state.depth.load(Ordering::SeqCst) > 0
    }

    /// Mark the start of an action. The scope ends when the guard drops.
    pub fn enter_action(&self) -> ActionScope {
        self.state.depth.fetch_add(1, Ordering::SeqCst);
        ActionScope {
            state: Arc::clone(&self.state),
        }
    }

    /// Check whether a mutation may proceed.
    ///
    /// `path` is only rendered when the mutation is rejected.
    pub fn guard(&self, op: MutationKind, path: impl FnOnce() -> String) -> Result<()> {
        if self.state.strict && !self.in_action() {
            let path = path();
            tracing::debug!(%op, %path, "strict mode rejected mutation");
            return Err(StoreError::MutationNotAllowed { op, path });
        }
        Ok(())
    }
}

/// Guard for one action execution.
pub struct ActionScope {
    state: Arc<GateState>,
}

impl Drop for ActionScope {
    fn drop(&mut self) {
        let previous = self.state.depth.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "ActionScope dropped with no open scope");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_strict_gate_always_allows() {
        let gate = StrictModeGate::new(false);
        assert!(gate.guard(MutationKind::Set, || "x".into()).is_ok());
        assert!(gate.guard(MutationKind::Delete, || "x".into()).is_ok());
    }

    #[test]
    fn strict_gate_rejects_outside_action() {
        let gate = StrictModeGate::new(true);
        let err = gate.guard(MutationKind::Add, || "list.0".into()).unwrap_err();

        match err {
            StoreError::MutationNotAllowed { op, path } => {
                assert_eq!(op, MutationKind::Add);
                assert_eq!(path, "list.0");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn scopes_nest_and_close_on_drop() {
        let gate = StrictModeGate::new(true);
        {
            let _outer = gate.enter_action();
            {
                let _inner = gate.enter_action();
                assert!(gate.guard(MutationKind::Set, || "x".into()).is_ok());
            }
            // Outer scope is still open
            assert!(gate.in_action());
        }
        assert!(!gate.in_action());
        assert!(gate.guard(MutationKind::Set, || "x".into()).is_err());
    }

    #[test]
    fn clones_share_scope_state() {
        let gate = StrictModeGate::new(true);
        let clone = gate.clone();
        let _scope = gate.enter_action();
        assert!(clone.in_action());
    }
}
