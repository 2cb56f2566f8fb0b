//! Observable Vector
//!
//! An ordered collection that raises a [`CollectionChange`] for every
//! structural edit. It is both a source for tracked access paths and the
//! storage behind projected sequences published by collection adapters.

use std::sync::Arc;

use parking_lot::RwLock;

use super::notify::{ChangeEvent, CollectionChange, Notifier, NotifyHub};
use super::{Object, ObjectId, Sequence, Value};
use crate::error::{Error, Result};

pub struct ObservableVec {
    type_name: Arc<str>,
    items: RwLock<Vec<Value>>,
    hub: NotifyHub,
}

impl ObservableVec {
    pub fn new() -> Arc<Self> {
        Self::from_items(Vec::new())
    }

    pub fn from_items(items: impl IntoIterator<Item = Value>) -> Arc<Self> {
        Arc::new(Self::with_name("ObservableVec", items))
    }

    pub(crate) fn with_name(type_name: &str, items: impl IntoIterator<Item = Value>) -> Self {
        Self {
            type_name: type_name.into(),
            items: RwLock::new(items.into_iter().collect()),
            hub: NotifyHub::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::of(self)
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.read().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.items.read().clone()
    }

    pub fn push(&self, item: impl Into<Value>) {
        let item = item.into();
        let index = {
            let mut items = self.items.write();
            items.push(item.clone());
            items.len() - 1
        };
        self.raise(CollectionChange::Insert { index, item });
    }

    /// Insert at `index`, clamped to the current length.
    pub fn insert(&self, index: usize, item: impl Into<Value>) {
        let item = item.into();
        let index = {
            let mut items = self.items.write();
            let index = index.min(items.len());
            items.insert(index, item.clone());
            index
        };
        self.raise(CollectionChange::Insert { index, item });
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        let item = {
            let mut items = self.items.write();
            if index >= items.len() {
                return None;
            }
            items.remove(index)
        };
        self.raise(CollectionChange::Remove {
            index,
            item: item.clone(),
        });
        Some(item)
    }

    /// Move the item at `from` so that it ends up at `to`.
    ///
    /// Returns `false` if either index is out of range.
    pub fn move_item(&self, from: usize, to: usize) -> bool {
        {
            let mut items = self.items.write();
            if from >= items.len() || to >= items.len() {
                return false;
            }
            if from == to {
                return true;
            }
            let item = items.remove(from);
            items.insert(to, item);
        }
        self.raise(CollectionChange::Move { from, to });
        true
    }

    /// Replace the item at `index`, raised as a removal followed by an
    /// insertion.
    pub fn set(&self, index: usize, item: impl Into<Value>) -> Option<Value> {
        let item = item.into();
        let previous = {
            let mut items = self.items.write();
            let slot = items.get_mut(index)?;
            std::mem::replace(slot, item.clone())
        };
        self.raise(CollectionChange::Remove {
            index,
            item: previous.clone(),
        });
        self.raise(CollectionChange::Insert { index, item });
        Some(previous)
    }

    pub fn replace_all(&self, items: impl IntoIterator<Item = Value>) {
        *self.items.write() = items.into_iter().collect();
        self.raise(CollectionChange::Reset);
    }

    pub fn clear(&self) {
        self.replace_all(std::iter::empty());
    }

    pub fn listener_count(&self) -> usize {
        self.hub.listener_count()
    }

    fn raise(&self, change: CollectionChange) {
        self.hub.emit(&ChangeEvent::collection(self.id(), change));
    }
}

impl Object for ObservableVec {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn get(&self, member: &str) -> Result<Value> {
        match member {
            "Count" => Ok(Value::Int(self.len() as i64)),
            _ => Err(Error::MissingMember {
                type_name: self.type_name.to_string(),
                member: member.to_string(),
            }),
        }
    }

    fn collection_notifier(&self) -> Option<&dyn Notifier> {
        Some(&self.hub)
    }

    fn as_sequence(&self) -> Option<&dyn Sequence> {
        Some(self)
    }
}

impl Sequence for ObservableVec {
    fn len(&self) -> usize {
        ObservableVec::len(self)
    }

    fn item(&self, index: usize) -> Option<Value> {
        ObservableVec::get(self, index)
    }

    fn snapshot(&self) -> Vec<Value> {
        self.to_vec()
    }
}

impl std::fmt::Debug for ObservableVec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableVec")
            .field("items", &*self.items.read())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
