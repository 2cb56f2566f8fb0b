//! Subscriptions and back-references.
//!
//! A [`Subscription`] is the tracker's handle on one listener registered
//! with a producer. Dropping it removes the listener. It refers to the
//! producer weakly, so an armed tracker never keeps the graph it observes
//! alive.
//!
//! A [`BackRef`] is the opposite direction: what a registered listener
//! holds to reach the tracker.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::object::{ListenerId, Notifier, Object, ObjectRef};

use super::tracker::TrackerState;

/// Opaque state a strong listener keeps alive alongside the tracker.
pub(crate) type Keepalive = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    Property,
    Collection,
}

impl Channel {
    fn notifier(self, producer: &dyn Object) -> Option<&dyn Notifier> {
        match self {
            Self::Property => producer.property_notifier(),
            Self::Collection => producer.collection_notifier(),
        }
    }
}

pub(crate) struct Subscription {
    producer: Weak<dyn Object>,
    channel: Channel,
    id: ListenerId,
}

impl Subscription {
    pub fn new(producer: &ObjectRef, channel: Channel, id: ListenerId) -> Self {
        Self {
            producer: Arc::downgrade(producer),
            channel,
            id,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // A dead producer took its listeners with it.
        if let Some(producer) = self.producer.upgrade() {
            if let Some(notifier) = self.channel.notifier(&*producer) {
                notifier.unsubscribe(self.id);
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("producer_alive", &(self.producer.strong_count() > 0))
            .finish()
    }
}

/// How a producer's listener reaches its tracker.
#[derive(Clone)]
pub(crate) enum BackRef {
    /// Does not extend the tracker's lifetime. A listener whose tracker is
    /// gone does nothing.
    Weak(Weak<TrackerState>),
    /// Keeps the tracker, and whatever owns its handler, alive for as long
    /// as the listener stays registered.
    Strong {
        state: Arc<TrackerState>,
        #[allow(dead_code)] // only held
        keepalive: Option<Keepalive>,
    },
}

impl BackRef {
    pub fn upgrade(&self) -> Option<Arc<TrackerState>> {
        match self {
            Self::Weak(state) => state.upgrade(),
            Self::Strong { state, .. } => Some(Arc::clone(state)),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
