//! Trellis Core
//!
//! This crate provides the core of the Trellis state store: a fine-grained
//! reactive store built on deep proxies over a shared state tree.
//! It implements:
//!
//! - A node heap and structural values (objects, arrays, maps, sets)
//! - Tracked proxies that report every read and write with its key path
//! - Path tracking, effect logging and invalidation matching
//! - A strict-mode gate that confines writes to actions
//! - A store with named actions, a built-in `reset` and subscribers
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: The value model and the node heap
//! - `proxy`: Tracked views over heap nodes
//! - `tracking`: Identity tokens, path sets, effect logs and the matcher
//! - `gate`: Strict-mode enforcement
//! - `store`: The store, its builder and subscriptions
//!
//! # Example
//!
//! ```rust
//! use trellis_core::store::Store;
//! use serde_json::json;
//!
//! let store = Store::builder("counter")
//!     .init(json!({"count": 0}))
//!     .action("increment", |state, _args| {
//!         let count = state.get("count").as_f64().unwrap_or(0.0);
//!         state.set("count", count + 1.0)
//!     })
//!     .build()
//!     .unwrap();
//!
//! let _sub = store.subscribe(
//!     |state| state.get("count"),
//!     |count| println!("count: {:?}", count.as_f64()),
//! );
//!
//! store.dispatch("increment", &[]).unwrap();
//! // Subscriber runs, prints: "count: Some(1.0)"
//! ```

pub mod error;
pub mod gate;
pub mod proxy;
pub mod store;
pub mod tracking;
pub mod value;

pub use error::{MutationKind, Result, StoreError};
pub use gate::{ActionScope, StrictModeGate};
pub use proxy::{wrap, ProxyContext, ProxyNode, ProxyObserver, Read};
pub use store::{Store, StoreBuilder, StoreOptions, Subscription};
pub use tracking::{Effects, Invalidated, KeyPath, PathKey, PathSet, PathTracker};
pub use value::{Data, NodeId, NodeKind, SymbolId, Value};
