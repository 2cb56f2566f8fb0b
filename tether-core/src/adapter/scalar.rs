//! Per-instance scalar property.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::options::AdapterOptions;
use super::slot::{CacheState, ScalarDecl, Slot};
use super::OwnedProperty;
use crate::error::Result;
use crate::object::{ChangeEvent, Listener, ListenerId, Notifier, NotifyHub, ObjectRef, Value};
use crate::path::AccessPath;

struct ScalarInner {
    decl: Arc<ScalarDecl>,
    changed: Arc<NotifyHub>,
    slot: Mutex<Option<Slot>>,
}

/// A cached computed property owned by one object.
///
/// The value is read through a getter [`AccessPath`] rooted at the owner.
/// Whatever the getter touched is tracked, and the property reacts to
/// changes according to its [`RetrievalMode`](super::RetrievalMode).
///
/// # Example
///
/// ```rust,ignore
/// let person = Model::new("Person").with("First", "Ada").with("Last", "Lovelace");
/// let full = ScalarProperty::new(
///     "FullName",
///     Expr::root().member("First") + Expr::constant(" ") + Expr::root().member("Last"),
///     RetrievalMode::Immediate,
/// );
/// person.attach("FullName", Arc::new(full));
/// ```
#[derive(Clone)]
pub struct ScalarProperty {
    inner: Arc<ScalarInner>,
}

impl ScalarProperty {
    pub fn new(
        name: impl Into<Arc<str>>,
        getter: impl Into<AccessPath>,
        options: impl Into<AdapterOptions>,
    ) -> Self {
        Self::build(name.into(), getter.into(), None, options.into())
    }

    /// A property that can also be written, through `setter`.
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
            inner: Arc::new(ScalarInner {
                decl: Arc::new(ScalarDecl {
                    name,
                    getter,
                    setter,
                    options,
                }),
                changed: Arc::new(NotifyHub::new()),
                slot: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.decl.name
    }

    pub fn options(&self) -> AdapterOptions {
        self.inner.decl.options
    }

    /// Read the value for `owner`.
    pub fn get_value(&self, owner: &ObjectRef) -> Result<Value> {
        self.slot_for(owner).get(owner)
    }

    pub fn set_value(&self, owner: &ObjectRef, value: Value) -> Result<()> {
        self.slot_for(owner).set(owner, value)
    }

    /// Listen for change notifications of this property.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.inner.changed.subscribe_fn(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.changed.unsubscribe(id)
    }

    pub fn state(&self) -> CacheState {
        self.current_slot()
            .map_or(CacheState::Uncached, |slot| slot.state())
    }

    /// Number of `(object, member)` pairs observed by the current cycle.
    pub fn tracked_member_count(&self) -> usize {
        self.current_slot()
            .map_or(0, |slot| slot.touched_member_count())
    }

    /// Forget the cached value and stop observing. The next read
    /// recomputes.
    pub fn invalidate(&self) {
        if let Some(slot) = self.current_slot() {
            slot.invalidate();
        }
    }

    pub fn downgrade(&self) -> WeakScalarProperty {
        WeakScalarProperty {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn current_slot(&self) -> Option<Slot> {
        self.inner.slot.lock().clone()
    }

    fn slot_for(&self, owner: &ObjectRef) -> Slot {
        let (slot, replaced) = {
            let mut current = self.inner.slot.lock();
            match &*current {
                Some(slot) if slot.is_bound_to(owner) => (slot.clone(), None),
                _ => {
                    let slot = Slot::new(
                        Arc::clone(&self.inner.decl),
                        owner,
                        Arc::clone(&self.inner.changed),
                    );
                    let replaced = current.replace(slot.clone());
                    (slot, replaced)
                }
            }
        };
        if replaced.is_some() {
            tracing::debug!(property = %self.inner.decl.name, "rebinding to a new owner");
        }
        slot
    }
}

impl OwnedProperty for ScalarProperty {
    fn name(&self) -> &str {
        ScalarProperty::name(self)
    }

    fn get(&self, owner: &ObjectRef) -> Result<Value> {
        self.get_value(owner)
    }

    fn set(&self, owner: &ObjectRef, value: Value) -> Result<()> {
        self.set_value(owner, value)
    }

    fn watch(&self, _owner: &ObjectRef, listener: Listener) -> ListenerId {
        self.inner.changed.subscribe(listener)
    }

    fn unwatch(&self, _owner: &ObjectRef, id: ListenerId) -> bool {
        self.inner.changed.unsubscribe(id)
    }
}

impl fmt::Debug for ScalarProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarProperty")
            .field("name", &self.inner.decl.name)
            .field("getter", &self.inner.decl.getter)
            .field("options", &self.inner.decl.options)
            .field("slot", &self.current_slot())
            .finish()
    }
}

/// Non-owning handle to a [`ScalarProperty`].
#[derive(Clone)]
pub struct WeakScalarProperty {
    inner: Weak<ScalarInner>,
}

impl WeakScalarProperty {
    pub fn upgrade(&self) -> Option<ScalarProperty> {
        self.inner.upgrade().map(|inner| ScalarProperty { inner })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{BindingStrength, RetrievalMode};
    use crate::error::Error;
    use crate::object::{Model, Object};
    use crate::path::Expr;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counter(property: &ScalarProperty) -> Arc<AtomicI32> {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        property.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    /// A getter that counts its evaluations.
    fn counted(path: Expr) -> (Expr, Arc<AtomicI32>) {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let expr = Expr::apply("counted", vec![path], move |args| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(args[0].clone())
        });
        (expr, runs)
    }

    #[test]
    fn immediate_notifies_only_when_the_result_changes() {
        let model = Model::new("Stock").with("Level", 5);
        let owner: ObjectRef = model.clone();
        let property = ScalarProperty::new(
            "InStock",
            Expr::root().member("Level").greater_than(Expr::constant(0)),
            RetrievalMode::Immediate,
        );
        let notified = counter(&property);

        assert_eq!(property.get_value(&owner).unwrap(), Value::Bool(true));
        model.set_field("Level", 3);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(property.state(), CacheState::Clean);

        model.set_field("Level", 0);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(property.get_value(&owner).unwrap(), Value::Bool(false));
    }

    #[test]
    fn lazy_marks_dirty_and_recomputes_on_read() {
        let model = Model::new("Counter").with("N", 1);
        let owner: ObjectRef = model.clone();
        let (getter, runs) = counted(Expr::root().member("N"));
        let property = ScalarProperty::new("Value", getter, RetrievalMode::Lazy);
        let notified = counter(&property);

        assert_eq!(property.get_value(&owner).unwrap(), Value::Int(1));
        model.set_field("N", 2);
        model.set_field("N", 3);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(property.state(), CacheState::Dirty);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        assert_eq!(property.get_value(&owner).unwrap(), Value::Int(3));
        assert_eq!(property.get_value(&owner).unwrap(), Value::Int(3));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(property.state(), CacheState::Clean);
    }

    #[test]
    fn on_demand_never_caches() {
        let model = Model::new("Counter").with("N", 1);
        let owner: ObjectRef = model.clone();
        let (getter, runs) = counted(Expr::root().member("N"));
        let property = ScalarProperty::new("Value", getter, RetrievalMode::OnDemand);
        let notified = counter(&property);

        property.get_value(&owner).unwrap();
        property.get_value(&owner).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(property.state(), CacheState::Uncached);

        model.set_field("N", 2);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failures_are_cached_and_replayed() {
        let model = Model::new("Person").with("Manager", Value::Null);
        let owner: ObjectRef = model.clone();
        let (getter, runs) = counted(Expr::root().member("Manager").member("Name"));
        let property = ScalarProperty::new("ManagerName", getter, RetrievalMode::Lazy);

        let first = property.get_value(&owner).unwrap_err();
        let second = property.get_value(&owner).unwrap_err();
        assert_eq!(first, second);
        assert_eq!(
            first,
            Error::NullReference {
                member: "Name".into()
            }
        );
        // The failure happened inside the argument, before the counted body.
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(property.state(), CacheState::Clean);

        model.set_field("Manager", Model::new("Person").with("Name", "Grace"));
        assert_eq!(property.get_value(&owner).unwrap(), Value::from("Grace"));
    }

    #[test]
    fn immediate_compares_failures() {
        let model = Model::new("Person").with("Manager", Value::Null).with("Other", 1);
        let owner: ObjectRef = model.clone();
        let property = ScalarProperty::new(
            "ManagerName",
            Expr::root().member("Other") + Expr::root().member("Manager").member("Name"),
            RetrievalMode::Immediate,
        );
        let notified = counter(&property);

        assert!(property.get_value(&owner).is_err());
        model.set_field("Other", 2);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn self_reference_is_a_circular_dependency() {
        let model = Model::new("Loop");
        model.attach(
            "P",
            Arc::new(ScalarProperty::new(
                "P",
                Expr::root().member("P"),
                RetrievalMode::Immediate,
            )),
        );

        let err = model.get("P").unwrap_err();
        assert!(err.is_circular());
        assert_eq!(
            err,
            Error::CircularDependency {
                property: "P".into()
            }
        );
    }

    #[test]
    fn setter_writes_through_the_path() {
        let address = Model::new("Address").with("City", "Oslo");
        let person = Model::new("Person").with("Address", address.clone());
        let owner: ObjectRef = person.clone();
        let property = ScalarProperty::read_write(
            "City",
            AccessPath::parse("Address.City").unwrap(),
            AccessPath::parse("Address.City").unwrap(),
            RetrievalMode::Immediate,
        );
        let notified = counter(&property);

        assert_eq!(property.get_value(&owner).unwrap(), Value::from("Oslo"));
        property.set_value(&owner, Value::from("Bergen")).unwrap();
        assert_eq!(address.field("City"), Some(Value::from("Bergen")));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(property.get_value(&owner).unwrap(), Value::from("Bergen"));
    }

    #[test]
    fn properties_without_setter_are_read_only() {
        let owner: ObjectRef = Model::new("Person").with("Name", "Ann");
        let property = ScalarProperty::new("Name", Expr::root().member("Name"), RetrievalMode::Lazy);
        assert_eq!(
            property.set_value(&owner, Value::from("Bob")).unwrap_err(),
            Error::ReadOnly {
                property: "Name".into()
            }
        );
    }

    #[test]
    fn weak_property_is_collectible_while_armed() {
        let model = Model::new("Person").with("Name", "Ann");
        let owner: ObjectRef = model.clone();
        let property = ScalarProperty::new("Name", Expr::root().member("Name"), RetrievalMode::Lazy);
        property.get_value(&owner).unwrap();
        assert_eq!(model.listener_count(), 1);

        let weak = property.downgrade();
        drop(property);
        assert!(weak.upgrade().is_none());
        assert_eq!(model.listener_count(), 0);
    }

    #[test]
    fn strong_property_lives_until_its_cycle_ends() {
        let model = Model::new("Person").with("Name", "Ann");
        let owner: ObjectRef = model.clone();
        let options = AdapterOptions::new()
            .mode(RetrievalMode::Lazy)
            .binding(BindingStrength::Strong);
        let property = ScalarProperty::new("Name", Expr::root().member("Name"), options);
        let notified = counter(&property);
        property.get_value(&owner).unwrap();

        drop(property);
        assert_eq!(model.listener_count(), 1);

        model.set_field("Name", "Bob");
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(model.listener_count(), 0);
    }

    #[test]
    fn invalidate_drops_cache_and_subscriptions() {
        let model = Model::new("Person").with("Name", "Ann");
        let owner: ObjectRef = model.clone();
        let property = ScalarProperty::new("Name", Expr::root().member("Name"), RetrievalMode::Lazy);
        property.get_value(&owner).unwrap();
        assert_eq!(property.tracked_member_count(), 1);

        property.invalidate();
        assert_eq!(property.state(), CacheState::Uncached);
        assert_eq!(model.listener_count(), 0);
    }

    #[test]
    fn attached_property_is_reraised_by_the_owner() {
        let model = Model::new("Person").with("First", "Ada").with("Last", "Byron");
        let full = ScalarProperty::new(
            "FullName",
            Expr::root().member("First") + Expr::constant(" ") + Expr::root().member("Last"),
            RetrievalMode::Immediate,
        );
        model.attach("FullName", Arc::new(full));

        let raised = Arc::new(Mutex::new(Vec::<String>::new()));
        let raised_clone = raised.clone();
        model
            .property_notifier()
            .map(|notifier| {
                notifier.subscribe(Arc::new(move |event: &ChangeEvent| {
                    if let Some(name) = event.property_name() {
                        raised_clone.lock().push(name.to_string());
                    }
                }))
            })
            .unwrap();

        assert_eq!(model.get("FullName").unwrap(), Value::from("Ada Byron"));
        model.set_field("Last", "Lovelace");
        assert_eq!(*raised.lock(), vec!["Last".to_string(), "FullName".to_string()]);
        assert_eq!(model.get("FullName").unwrap(), Value::from("Ada Lovelace"));
    }

    #[test]
    fn immediate_settles_after_concurrent_changes() {
        let model = Model::new("Pair").with("P", 1).with("Q", 2);
        let owner: ObjectRef = model.clone();
        let property = ScalarProperty::new(
            "Sum",
            Expr::root().member("P") + Expr::root().member("Q"),
            RetrievalMode::Immediate,
        );
        let notified = counter(&property);
        assert_eq!(property.get_value(&owner).unwrap(), Value::Int(3));

        let barrier = Arc::new(std::sync::Barrier::new(2));
        let writers: Vec<_> = [("P", 200), ("Q", 300)]
            .into_iter()
            .map(|(member, last)| {
                let model = model.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for value in 10..=last {
                        model.set_field(member, value);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert!(notified.load(Ordering::SeqCst) >= 1);
        assert_eq!(property.get_value(&owner).unwrap(), Value::Int(500));
        assert_eq!(property.state(), CacheState::Clean);
        assert!(property.tracked_member_count() <= 2);
    }
}
