//! Dynamic Model Objects
//!
//! A [`Model`] is a change-notifying object whose members are declared at
//! runtime: plain fields, methods, and computed properties backed by
//! adapters. It is the reference implementation of the owner contract:
//! whenever an attached adapter reports a change, the model re-raises it as
//! a property change under the name the property was attached with.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::notify::{ChangeEvent, ListenerId, Notifier, NotifyHub};
use super::{Object, ObjectId, ObjectRef, Value};
use crate::adapter::OwnedProperty;
use crate::error::{Error, Result};

/// A method callable through an access path.
pub type Method = Arc<dyn Fn(&Model, &[Value]) -> Result<Value> + Send + Sync>;

struct Attached {
    property: Arc<dyn OwnedProperty>,
    watch: ListenerId,
}

pub struct Model {
    type_name: Arc<str>,

    /// Weak self reference, used as the owner handed to adapters.
    this: Weak<Model>,

    /// Field whose value defines equality, if any.
    key: Option<Arc<str>>,

    fields: RwLock<IndexMap<Arc<str>, Value>>,
    methods: RwLock<IndexMap<Arc<str>, Method>>,
    computed: RwLock<IndexMap<Arc<str>, Attached>>,

    hub: NotifyHub,
}

impl Model {
    /// Create a model compared by identity.
    pub fn new(type_name: impl Into<Arc<str>>) -> Arc<Self> {
        Self::build(type_name.into(), None)
    }

    /// Create a model compared by the value of its `key` field.
    pub fn keyed(type_name: impl Into<Arc<str>>, key: impl Into<Arc<str>>) -> Arc<Self> {
        Self::build(type_name.into(), Some(key.into()))
    }

    fn build(type_name: Arc<str>, key: Option<Arc<str>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            type_name,
            this: this.clone(),
            key,
            fields: RwLock::new(IndexMap::new()),
            methods: RwLock::new(IndexMap::new()),
            computed: RwLock::new(IndexMap::new()),
            hub: NotifyHub::new(),
        })
    }

    /// Builder-style field initialization. Raises nothing.
    pub fn with(self: Arc<Self>, name: impl Into<Arc<str>>, value: impl Into<Value>) -> Arc<Self> {
        self.fields.write().insert(name.into(), value.into());
        self
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::of(self)
    }

    /// This model as a shared object reference.
    pub fn as_object(self: &Arc<Self>) -> ObjectRef {
        self.clone()
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    /// Store a field, raising a change if the value differs.
    ///
    /// Returns whether a change was raised.
    pub fn set_field(&self, name: impl Into<Arc<str>>, value: impl Into<Value>) -> bool {
        let name = name.into();
        let value = value.into();
        {
            let mut fields = self.fields.write();
            if fields.get(&name) == Some(&value) {
                return false;
            }
            fields.insert(name.clone(), value);
        }
        self.raise(name);
        true
    }

    /// Raise a change for `name` without modifying anything.
    pub fn touch(&self, name: impl Into<Arc<str>>) {
        self.raise(name);
    }

    pub fn raise(&self, name: impl Into<Arc<str>>) {
        self.hub.emit(&ChangeEvent::property(self.id(), name));
    }

    pub fn define_method<F>(&self, name: impl Into<Arc<str>>, method: F)
    where
        F: Fn(&Model, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.methods.write().insert(name.into(), Arc::new(method));
    }

    /// Attach a computed property under `name`.
    ///
    /// Reads and writes of `name` are forwarded to the property with this
    /// model as owner, and the property's change notifications are re-raised
    /// as changes of `name`. Attaching over an existing name detaches the
    /// previous property.
    pub fn attach(&self, name: impl Into<Arc<str>>, property: Arc<dyn OwnedProperty>) {
        let Some(owner) = self.this.upgrade() else {
            return;
        };
        let owner: ObjectRef = owner;
        let name = name.into();

        let model = self.this.clone();
        let reraised = name.clone();
        let watch = property.watch(
            &owner,
            Arc::new(move |_event: &ChangeEvent| {
                if let Some(model) = model.upgrade() {
                    model.raise(reraised.clone());
                }
            }),
        );

        let previous = self
            .computed
            .write()
            .insert(name, Attached { property, watch });
        if let Some(previous) = previous {
            previous.property.unwatch(&owner, previous.watch);
        }
    }

    /// Detach a computed property. Returns whether one was attached.
    pub fn detach(&self, name: &str) -> bool {
        let removed = self.computed.write().shift_remove(name);
        match (removed, self.this.upgrade()) {
            (Some(attached), Some(owner)) => {
                let owner: ObjectRef = owner;
                attached.property.unwatch(&owner, attached.watch);
                true
            }
            (removed, _) => removed.is_some(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.hub.listener_count()
    }

    fn computed_property(&self, name: &str) -> Option<Arc<dyn OwnedProperty>> {
        self.computed
            .read()
            .get(name)
            .map(|attached| Arc::clone(&attached.property))
    }

    fn owner(&self) -> Result<ObjectRef> {
        match self.this.upgrade() {
            Some(owner) => Ok(owner),
            None => Err(Error::evaluation(format!(
                "{} is being dropped",
                self.type_name
            ))),
        }
    }

    fn key_value(&self) -> Option<Value> {
        self.key.as_ref().and_then(|key| self.field(key))
    }
}

impl Object for Model {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn get(&self, member: &str) -> Result<Value> {
        if let Some(property) = self.computed_property(member) {
            return property.get(&self.owner()?);
        }

        self.field(member).ok_or_else(|| Error::MissingMember {
            type_name: self.type_name.to_string(),
            member: member.to_string(),
        })
    }

    fn set(&self, member: &str, value: Value) -> Result<()> {
        if let Some(property) = self.computed_property(member) {
            return property.set(&self.owner()?, value);
        }

        self.set_field(member, value);
        Ok(())
    }

    fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        let found = self.methods.read().get(method).cloned();
        match found {
            Some(method) => method(self, args),
            None => Err(Error::MissingMethod {
                type_name: self.type_name.to_string(),
                method: method.to_string(),
            }),
        }
    }

    fn property_notifier(&self) -> Option<&dyn Notifier> {
        Some(&self.hub)
    }

    fn equals(&self, other: &dyn Object) -> bool {
        let (Some(key), Some(mine)) = (self.key.as_ref(), self.key_value()) else {
            return ObjectId::of(self) == ObjectId::of(other);
        };
        other.type_name() == &*self.type_name && other.get(key).ok() == Some(mine)
    }

    fn hash_code(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        match self.key_value() {
            Some(key) => {
                self.type_name.hash(&mut hasher);
                key.hash(&mut hasher);
            }
            None => self.id().hash(&mut hasher),
        }
        hasher.finish()
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("type_name", &self.type_name)
            .field("fields", &*self.fields.read())
            .field("computed", &self.computed.read().keys().collect::<Vec<_>>())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
