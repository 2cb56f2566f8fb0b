//! Per-type scalar property.
//!
//! One [`SharedScalarProperty`] serves every instance of a type. The getter
//! path is instrumented and compiled once; evaluation state lives in a
//! side-table keyed by the owner's identity.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::options::AdapterOptions;
use super::slot::{CacheState, ScalarDecl, Slot};
use super::OwnedProperty;
use crate::error::Result;
use crate::object::{ChangeEvent, Listener, ListenerId, Notifier, NotifyHub, ObjectId, ObjectRef, Value};
use crate::path::AccessPath;

/// Side-table size below which dead owners are not pruned.
const MIN_PRUNE_THRESHOLD: usize = 16;

struct SharedInner {
    decl: Arc<ScalarDecl>,
    slots: DashMap<ObjectId, Slot>,
    prune_at: AtomicUsize,
}

#[derive(Clone)]
pub struct SharedScalarProperty {
    inner: Arc<SharedInner>,
}

impl SharedScalarProperty {
    pub fn new(
        name: impl Into<Arc<str>>,
        getter: impl Into<AccessPath>,
        options: impl Into<AdapterOptions>,
    ) -> Self {
        Self::build(name.into(), getter.into(), None, options.into())
    }

    pub fn read_write(
        name: impl Into<Arc<str>>,
        getter: impl Into<AccessPath>,
        setter: impl Into<AccessPath>,
        options: impl Into<AdapterOptions>,
    ) -> Self {
        Self::build(name.into(), getter.into(), Some(setter.into()), options.into())
    }

    fn build(
        name: Arc<str>,
        getter: AccessPath,
        setter: Option<AccessPath>,
        options: AdapterOptions,
    ) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                decl: Arc::new(ScalarDecl {
                    name,
                    getter,
                    setter,
                    options,
                }),
                slots: DashMap::new(),
                prune_at: AtomicUsize::new(MIN_PRUNE_THRESHOLD),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.decl.name
    }

    pub fn getter(&self) -> &AccessPath {
        &self.inner.decl.getter
    }

    pub fn get_value(&self, owner: &ObjectRef) -> Result<Value> {
        self.slot_for(owner).get(owner)
    }

    pub fn set_value(&self, owner: &ObjectRef, value: Value) -> Result<()> {
        self.slot_for(owner).set(owner, value)
    }

    /// Listen for changes of this property on `owner` only.
    pub fn subscribe<F>(&self, owner: &ObjectRef, listener: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.slot_for(owner).changed().subscribe_fn(listener)
    }

    pub fn unsubscribe(&self, owner: &ObjectRef, id: ListenerId) -> bool {
        self.existing_slot(owner)
            .is_some_and(|slot| slot.changed().unsubscribe(id))
    }

    pub fn state(&self, owner: &ObjectRef) -> CacheState {
        self.existing_slot(owner)
            .map_or(CacheState::Uncached, |slot| slot.state())
    }

    /// Drop the state kept for `owner`. Returns whether there was any.
    pub fn forget(&self, owner: &ObjectRef) -> bool {
        // Removed outside the shard lock; dropping a slot unsubscribes.
        let removed = self.inner.slots.remove(&ObjectId::of_ref(owner));
        removed.is_some()
    }

    /// Number of owners with state in the side-table.
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Remove the state of owners that no longer exist.
    pub fn prune(&self) -> usize {
        let dead: Vec<ObjectId> = self
            .inner
            .slots
            .iter()
            .filter(|entry| !entry.value().owner_alive())
            .map(|entry| *entry.key())
            .collect();

        let mut removed = 0;
        for id in dead {
            if self
                .inner
                .slots
                .remove_if(&id, |_, slot| !slot.owner_alive())
                .is_some()
            {
                removed += 1;
            }
        }
        tracing::trace!(property = %self.inner.decl.name, removed, "pruned side-table");
        removed
    }

    fn existing_slot(&self, owner: &ObjectRef) -> Option<Slot> {
        let slot = self.inner.slots.get(&ObjectId::of_ref(owner))?.clone();
        slot.is_bound_to(owner).then_some(slot)
    }

    fn slot_for(&self, owner: &ObjectRef) -> Slot {
        if let Some(slot) = self.existing_slot(owner) {
            return slot;
        }

        let fresh = || {
            Slot::new(
                Arc::clone(&self.inner.decl),
                owner,
                Arc::new(NotifyHub::new()),
            )
        };
        let (slot, stale) = {
            let mut entry = self.inner.slots.entry(ObjectId::of_ref(owner)).or_insert_with(fresh);
            if entry.is_bound_to(owner) {
                (entry.clone(), None)
            } else {
                // Same address, earlier owner.
                let stale = std::mem::replace(&mut *entry, fresh());
                (entry.clone(), Some(stale))
            }
        };
        drop(stale);

        self.maybe_prune();
        slot
    }

    fn maybe_prune(&self) {
        let len = self.inner.slots.len();
        if len < self.inner.prune_at.load(Ordering::Relaxed) {
            return;
        }
        self.prune();
        let next = (self.inner.slots.len() * 2).max(MIN_PRUNE_THRESHOLD);
        self.inner.prune_at.store(next, Ordering::Relaxed);
    }
}

impl OwnedProperty for SharedScalarProperty {
    fn name(&self) -> &str {
        SharedScalarProperty::name(self)
    }

    fn get(&self, owner: &ObjectRef) -> Result<Value> {
        self.get_value(owner)
    }

    fn set(&self, owner: &ObjectRef, value: Value) -> Result<()> {
        self.set_value(owner, value)
    }

    fn watch(&self, owner: &ObjectRef, listener: Listener) -> ListenerId {
        self.slot_for(owner).changed().subscribe(listener)
    }

    fn unwatch(&self, owner: &ObjectRef, id: ListenerId) -> bool {
        self.unsubscribe(owner, id)
    }
}

impl fmt::Debug for SharedScalarProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedScalarProperty")
            .field("name", &self.inner.decl.name)
            .field("getter", &self.inner.decl.getter)
            .field("options", &self.inner.decl.options)
            .field("owners", &self.inner.slots.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RetrievalMode;
    use crate::object::{Model, Object};
    use crate::path::Expr;
    use std::sync::atomic::AtomicI32;

    fn total() -> SharedScalarProperty {
        SharedScalarProperty::new(
            "Total",
            Expr::root().member("Price") * Expr::root().member("Qty"),
            RetrievalMode::Immediate,
        )
    }

    fn line(price: i64, qty: i64) -> Arc<Model> {
        Model::new("Line").with("Price", price).with("Qty", qty)
    }

    #[test]
    fn owners_have_independent_state() {
        let property = total();
        let a = line(2, 3);
        let b = line(5, 1);
        let (owner_a, owner_b): (ObjectRef, ObjectRef) = (a.clone(), b.clone());

        assert_eq!(property.get_value(&owner_a).unwrap(), Value::Int(6));
        assert_eq!(property.get_value(&owner_b).unwrap(), Value::Int(5));
        assert_eq!(property.len(), 2);

        let notified_a = Arc::new(AtomicI32::new(0));
        let notified_clone = notified_a.clone();
        property.subscribe(&owner_a, move |event| {
            assert_eq!(event.property_name(), Some("Total"));
            notified_clone.fetch_add(1, Ordering::SeqCst);
        });

        b.set_field("Qty", 4);
        assert_eq!(notified_a.load(Ordering::SeqCst), 0);
        assert_eq!(property.get_value(&owner_b).unwrap(), Value::Int(20));

        a.set_field("Qty", 4);
        assert_eq!(notified_a.load(Ordering::SeqCst), 1);
        assert_eq!(property.get_value(&owner_a).unwrap(), Value::Int(8));
    }

    #[test]
    fn attached_to_many_models() {
        let property = total();
        let a = line(1, 1);
        let b = line(3, 3);
        a.attach("Total", Arc::new(property.clone()));
        b.attach("Total", Arc::new(property.clone()));

        assert_eq!(a.get("Total").unwrap(), Value::Int(1));
        assert_eq!(b.get("Total").unwrap(), Value::Int(9));

        let raised_on_b = Arc::new(AtomicI32::new(0));
        let raised_clone = raised_on_b.clone();
        b.property_notifier()
            .map(|notifier| {
                notifier.subscribe(Arc::new(move |event: &ChangeEvent| {
                    if event.property_name() == Some("Total") {
                        raised_clone.fetch_add(1, Ordering::SeqCst);
                    }
                }))
            })
            .unwrap();

        a.set_field("Price", 2);
        assert_eq!(raised_on_b.load(Ordering::SeqCst), 0);
        assert_eq!(a.get("Total").unwrap(), Value::Int(2));
    }

    #[test]
    fn prune_removes_dead_owners() {
        let property = total();
        let kept = line(1, 2);
        let kept_owner: ObjectRef = kept.clone();
        property.get_value(&kept_owner).unwrap();

        {
            let gone: ObjectRef = line(1, 1);
            property.get_value(&gone).unwrap();
        }
        assert_eq!(property.len(), 2);
        assert_eq!(property.prune(), 1);
        assert_eq!(property.len(), 1);
        assert_eq!(property.state(&kept_owner), CacheState::Clean);
    }

    #[test]
    fn forget_unsubscribes() {
        let property = total();
        let a = line(1, 1);
        let owner: ObjectRef = a.clone();
        property.get_value(&owner).unwrap();
        assert_eq!(a.listener_count(), 2);

        assert!(property.forget(&owner));
        assert_eq!(a.listener_count(), 0);
        assert!(!property.forget(&owner));
    }
}
