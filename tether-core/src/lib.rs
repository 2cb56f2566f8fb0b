//! Tether Core
//!
//! Dependency-tracked computed properties over a graph of change-notifying
//! objects. It implements:
//!
//! - Access path expressions, instrumented and compiled once per path
//! - A change tracker that observes exactly what an evaluation read
//! - Scalar property adapters with Immediate, Lazy and OnDemand retrieval
//! - Collection property adapters publishing identity-stable projections
//! - An identity cache deduplicating wrappers by value equality
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `object`: the dynamic object graph and change notification contracts
//! - `path`: access path expressions and their compilation
//! - `tracking`: the change tracker and its weak subscriptions
//! - `adapter`: computed properties built on the tracker
//! - `cache`: the identity cache used by collection projections
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use tether_core::adapter::{RetrievalMode, ScalarProperty};
//! use tether_core::object::{Model, Object};
//! use tether_core::path::Expr;
//!
//! let person = Model::new("Person").with("First", "Ada").with("Last", "Lovelace");
//!
//! // A computed property over two members
//! let full_name = ScalarProperty::new(
//!     "FullName",
//!     Expr::root().member("First") + Expr::constant(" ") + Expr::root().member("Last"),
//!     RetrievalMode::Immediate,
//! );
//! person.attach("FullName", Arc::new(full_name));
//!
//! assert_eq!(person.get("FullName")?, "Ada Lovelace".into());
//!
//! // Changing a dependency recomputes and re-raises FullName on the owner
//! person.set_field("Last", "King");
//! assert_eq!(person.get("FullName")?, "Ada King".into());
//! ```

pub mod adapter;
pub mod cache;
pub mod error;
pub mod object;
pub mod path;
pub mod tracking;

pub use adapter::{
    AdapterOptions, BindingStrength, CollectionProperty, OwnedProperty, ProjectedSequence,
    RetrievalMode, ScalarProperty, SharedScalarProperty,
};
pub use cache::IdentityCache;
pub use error::{Error, Result};
pub use object::{ChangeEvent, Model, Object, ObjectRef, ObservableVec, Value};
pub use path::{AccessPath, Expr};
pub use tracking::ChangeTracker;
