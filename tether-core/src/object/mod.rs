//! Object Model
//!
//! Access paths navigate a graph of dynamically typed values. This module
//! defines that graph and the contracts producers implement so the change
//! tracker can observe them.
//!
//! # Concepts
//!
//! ## Values
//!
//! A [`Value`] is a scalar, an immutable list, or a reference to an
//! [`Object`]. Values compare by *value*: two objects are equal when their
//! [`Object::equals`] says so, which lets domain objects override equality
//! (the identity cache relies on this).
//!
//! ## Identity
//!
//! [`ObjectId`] is the address of an object. Everything that must not be
//! fooled by overridden equality (the tracker's touched set, the shared
//! adapter side-table, the diff of projected wrappers) keys on it instead.
//!
//! ## Producers
//!
//! A change-notifying object returns a [`Notifier`] from
//! [`Object::property_notifier`] and raises a property [`ChangeEvent`] after
//! each externally visible property changes. An observable collection also
//! implements [`Sequence`] and returns a notifier from
//! [`Object::collection_notifier`] that raises [`CollectionChange`] edits.

mod collection;
mod model;
mod notify;

pub use collection::ObservableVec;
pub use model::{Method, Model};
pub use notify::{
    ChangeEvent, ChangePayload, CollectionChange, Listener, ListenerId, Notifier, NotifyHub,
};

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Shared reference to an object in the graph.
pub type ObjectRef = Arc<dyn Object>;

/// Reference identity of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    /// Identity of the object behind `object`.
    pub fn of<T: ?Sized>(object: &T) -> Self {
        Self(object as *const T as *const () as usize)
    }

    /// Identity of a shared object reference.
    pub fn of_ref(object: &ObjectRef) -> Self {
        Self(Arc::as_ptr(object) as *const () as usize)
    }

    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> usize {
        self.0
    }
}

/// An element of the navigable object graph.
///
/// Only [`Object::type_name`] and [`Object::get`] are required.
pub trait Object: Send + Sync + 'static {
    fn type_name(&self) -> &str;

    /// Read a member.
    fn get(&self, member: &str) -> Result<Value>;

    /// Write a member.
    fn set(&self, member: &str, _value: Value) -> Result<()> {
        Err(Error::ReadOnly {
            property: member.to_string(),
        })
    }

    /// Invoke a side-effect-free method.
    fn call(&self, method: &str, _args: &[Value]) -> Result<Value> {
        Err(Error::MissingMethod {
            type_name: self.type_name().to_string(),
            method: method.to_string(),
        })
    }

    /// Property change notifications, if this object raises them.
    fn property_notifier(&self) -> Option<&dyn Notifier> {
        None
    }

    /// Structural change notifications, if this object is an observable
    /// collection.
    fn collection_notifier(&self) -> Option<&dyn Notifier> {
        None
    }

    fn as_sequence(&self) -> Option<&dyn Sequence> {
        None
    }

    /// Value equality. Defaults to reference identity.
    fn equals(&self, other: &dyn Object) -> bool {
        ObjectId::of(self) == ObjectId::of(other)
    }

    /// Hash consistent with [`Object::equals`].
    fn hash_code(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        ObjectId::of(self).hash(&mut hasher);
        hasher.finish()
    }
}

/// Ordered, indexable contents of a collection object.
pub trait Sequence: Send + Sync {
    fn len(&self) -> usize;

    fn item(&self, index: usize) -> Option<Value>;

    /// Copy of the current contents.
    fn snapshot(&self) -> Vec<Value>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
    List(Arc<[Value]>),
    Object(ObjectRef),
}

impl Value {
    pub fn object<T: Object>(object: Arc<T>) -> Self {
        Self::Object(object)
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(items.into_iter().collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }

    /// Materialize the elements of a list or sequence object.
    pub fn items(&self) -> Result<Vec<Value>> {
        match self {
            Self::List(items) => Ok(items.to_vec()),
            Self::Object(object) => object
                .as_sequence()
                .map(Sequence::snapshot)
                .ok_or(Error::NotASequence {
                    found: self.kind(),
                }),
            other => Err(Error::NotASequence {
                found: other.kind(),
            }),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b) || a.equals(&**b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(value) => value.hash(state),
            Self::Int(value) => value.hash(state),
            Self::Str(value) => value.hash(state),
            Self::List(items) => items.hash(state),
            Self::Object(object) => object.hash_code().hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(value) => write!(f, "Bool({value})"),
            Self::Int(value) => write!(f, "Int({value})"),
            Self::Str(value) => write!(f, "Str({value:?})"),
            Self::List(items) => f.debug_list().entries(items.iter()).finish(),
            Self::Object(object) => {
                write!(f, "{}@{:#x}", object.type_name(), ObjectId::of_ref(object).raw())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(object) => f.write_str(object.type_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}

impl From<Arc<str>> for Value {
    fn from(value: Arc<str>) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items.into())
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        Self::Object(object)
    }
}

impl<T: Object> From<Arc<T>> for Value {
    fn from(object: Arc<T>) -> Self {
        Self::Object(object)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
