//! Property Adapters
//!
//! Adapters turn an [`AccessPath`](crate::path::AccessPath) into a computed
//! property of some owner object. Each adapter keeps a
//! [`ChangeTracker`](crate::tracking::ChangeTracker) armed over the last
//! evaluation and reacts to its single firing according to its
//! [`RetrievalMode`]:
//!
//! | Mode        | On dependency change               | On read                     |
//! |-------------|------------------------------------|-----------------------------|
//! | `Immediate` | recompute, notify if value changed | cached value                |
//! | `Lazy`      | mark dirty, notify                 | recompute if dirty          |
//! | `OnDemand`  | notify                             | always recompute            |
//!
//! # Kinds
//!
//! - [`ScalarProperty`]: one instance per owner. The simplest form.
//! - [`SharedScalarProperty`]: one instance per type, with per-owner state
//!   in a side-table.
//! - [`CollectionProperty`]: a sequence-valued getter projected through an
//!   identity cache into a live [`ProjectedSequence`], kept up to date with
//!   a minimal identity-preserving diff ([`reconcile`]).
//!
//! All kinds implement [`OwnedProperty`] so they can be attached to a
//! [`Model`](crate::object::Model) and read like any other member.

mod collection;
mod diff;
mod guard;
mod options;
mod scalar;
mod shared;
mod slot;

pub use collection::{CollectionProperty, ProjectedSequence, Projection};
pub use diff::{apply, reconcile, Edit};
pub use options::{AdapterOptions, BindingStrength, RetrievalMode};
pub use scalar::{ScalarProperty, WeakScalarProperty};
pub use shared::SharedScalarProperty;
pub use slot::CacheState;

use crate::error::{Error, Result};
use crate::object::{Listener, ListenerId, ObjectRef, Value};

/// A computed property that can be hosted by an owner object.
///
/// The owner passes itself on every call; an adapter binds to the first
/// owner it sees (per-instance kinds) or keys its state on it (shared kinds).
pub trait OwnedProperty: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, owner: &ObjectRef) -> Result<Value>;

    /// Write through the setter path. Read-only unless overridden.
    fn set(&self, _owner: &ObjectRef, _value: Value) -> Result<()> {
        Err(Error::ReadOnly {
            property: self.name().to_string(),
        })
    }

    /// Listen for change notifications of this property on `owner`.
    fn watch(&self, owner: &ObjectRef, listener: Listener) -> ListenerId;

    fn unwatch(&self, owner: &ObjectRef, id: ListenerId) -> bool;
}
