//! Change Notification
//!
//! Producers (change-notifying objects and observable collections) expose a
//! [`Notifier`]. Consumers register a [`Listener`] and receive every
//! [`ChangeEvent`] the producer raises until they unsubscribe.
//!
//! # Dispatch
//!
//! [`NotifyHub`] takes a snapshot of its listeners before invoking them and
//! never holds its lock while a listener runs. Listeners are therefore free
//! to unsubscribe themselves (the tracker does exactly that when it fires)
//! or subscribe new listeners from inside a callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::{ObjectId, Value};

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A structural edit on an observable collection.
///
/// Indices are relative to the collection state right before the edit is
/// applied, so a sequence of edits replays correctly in order.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionChange {
    Insert { index: usize, item: Value },
    Remove { index: usize, item: Value },
    Move { from: usize, to: usize },
    /// The contents changed in a way not described incrementally.
    Reset,
}

/// What changed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangePayload {
    /// A named property changed. An empty name means every property may
    /// have changed.
    Property(Arc<str>),
    Collection(CollectionChange),
}

/// A change raised by a producer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Identity of the object that raised the event.
    pub sender: ObjectId,
    pub payload: ChangePayload,
}

impl ChangeEvent {
    pub fn property(sender: ObjectId, name: impl Into<Arc<str>>) -> Self {
        Self {
            sender,
            payload: ChangePayload::Property(name.into()),
        }
    }

    pub fn collection(sender: ObjectId, change: CollectionChange) -> Self {
        Self {
            sender,
            payload: ChangePayload::Collection(change),
        }
    }

    /// The property name, if this is a property change.
    pub fn property_name(&self) -> Option<&str> {
        match &self.payload {
            ChangePayload::Property(name) => Some(name),
            ChangePayload::Collection(_) => None,
        }
    }

    /// Whether this event reports a change of `member`.
    pub fn affects(&self, member: &str) -> bool {
        match &self.payload {
            ChangePayload::Property(name) => name.is_empty() || &**name == member,
            ChangePayload::Collection(_) => false,
        }
    }
}

/// Callback invoked with every event a producer raises.
pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Registration surface of a producer.
pub trait Notifier: Send + Sync {
    /// Register a listener. It stays registered until [`Notifier::unsubscribe`].
    fn subscribe(&self, listener: Listener) -> ListenerId;

    /// Remove a listener. Returns `false` if it was not registered.
    fn unsubscribe(&self, id: ListenerId) -> bool;

    /// Number of currently registered listeners.
    fn listener_count(&self) -> usize;
}

/// A list of listeners with snapshot dispatch.
#[derive(Default)]
pub struct NotifyHub {
    listeners: Mutex<SmallVec<[(ListenerId, Listener); 4]>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plain closure.
    pub fn subscribe_fn<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(listener))
    }

    /// Deliver `event` to every listener registered at the time of the call.
    pub fn emit(&self, event: &ChangeEvent) {
        let snapshot: SmallVec<[Listener; 4]> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener(event);
        }
    }
}

impl Notifier for NotifyHub {
    fn subscribe(&self, listener: Listener) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.lock().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl std::fmt::Debug for NotifyHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyHub")
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
