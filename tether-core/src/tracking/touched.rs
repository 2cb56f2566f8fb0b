//! The touched set of one evaluation.
//!
//! Keys are reference identities ([`ObjectId`]), never values. Two distinct
//! objects that claim to be equal are still two entries, each with its own
//! subscription.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::object::ObjectId;

use super::subscription::Subscription;

pub(crate) type MemberKey = (ObjectId, Arc<str>);

#[derive(Debug, Default)]
pub(crate) struct TouchedSet {
    members: IndexMap<MemberKey, Subscription>,
    collections: IndexMap<ObjectId, Subscription>,
}

impl TouchedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_member(&self, key: &MemberKey) -> bool {
        self.members.contains_key(key)
    }

    pub fn has_collection(&self, id: ObjectId) -> bool {
        self.collections.contains_key(&id)
    }

    /// Record a member touch. If the key is already present the new
    /// subscription is handed back so the caller can drop it outside any
    /// lock.
    pub fn add_member(&mut self, key: MemberKey, subscription: Subscription) -> Option<Subscription> {
        if self.members.contains_key(&key) {
            return Some(subscription);
        }
        self.members.insert(key, subscription);
        None
    }

    /// Record a collection touch, with the same contract as
    /// [`TouchedSet::add_member`].
    pub fn add_collection(&mut self, id: ObjectId, subscription: Subscription) -> Option<Subscription> {
        if self.collections.contains_key(&id) {
            return Some(subscription);
        }
        self.collections.insert(id, subscription);
        None
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.collections.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
