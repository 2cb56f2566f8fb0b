//! Scalar Evaluation State
//!
//! A [`Slot`] is the cache and change tracker of one computed property for
//! one owner. Per-instance adapters hold a single slot; shared adapters keep
//! one per owner in a side-table.
//!
//! # State Machine
//!
//! ```text
//!              get()                          tracker fires
//! Uncached ─────────────▶ Clean(result) ─────────────────────────┐
//!                             ▲                                  │
//!                             │ get() / Immediate recompute      ▼
//!                             └─────────────────────────────── Dirty
//! ```
//!
//! - Immediate: a fire recomputes right away and notifies only if the new
//!   result differs from the cached one. The slot stays clean.
//! - Lazy: a fire marks the slot dirty and notifies. The next read
//!   recomputes.
//! - OnDemand: nothing is cached. Every read recomputes, every fire
//!   notifies.
//!
//! A failed evaluation is a cached result like any other and is replayed
//! until the next recomputation.

use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::guard::{Entry, Evaluating, EvaluationGuard};
use super::options::{AdapterOptions, BindingStrength, RetrievalMode};
use crate::error::{Error, Result};
use crate::object::{ChangeEvent, NotifyHub, Object, ObjectId, ObjectRef, Value};
use crate::path::AccessPath;
use crate::tracking::{ChangeTracker, ChangedHandler, Keepalive};

/// Everything declared about a scalar property. Shared by all its slots.
pub(crate) struct ScalarDecl {
    pub name: Arc<str>,
    pub getter: AccessPath,
    pub setter: Option<AccessPath>,
    pub options: AdapterOptions,
}

/// Observable cache state of a scalar property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Uncached,
    Dirty,
    Clean,
}

enum Cache {
    Uncached,
    Dirty,
    Clean(Result<Value>),
}

struct SlotState {
    cache: Cache,
    evaluating: Option<ThreadId>,
}

impl Evaluating for SlotState {
    fn evaluating(&mut self) -> &mut Option<ThreadId> {
        &mut self.evaluating
    }
}

pub(crate) struct SlotInner {
    decl: Arc<ScalarDecl>,
    owner: Weak<dyn Object>,
    owner_id: ObjectId,
    tracker: ChangeTracker,
    state: Mutex<SlotState>,
    changed: Arc<NotifyHub>,
}

#[derive(Clone)]
pub(crate) struct Slot(Arc<SlotInner>);

impl Slot {
    /// Create the slot of `decl` for `owner`. Change notifications are
    /// raised on `changed`.
    pub fn new(decl: Arc<ScalarDecl>, owner: &ObjectRef, changed: Arc<NotifyHub>) -> Self {
        Self(Arc::new_cyclic(|this: &Weak<SlotInner>| {
            let this = this.clone();
            let handler: ChangedHandler = Arc::new(move |event: &ChangeEvent| {
                if let Some(inner) = this.upgrade() {
                    Slot(inner).dependency_changed(event);
                }
            });
            SlotInner {
                tracker: ChangeTracker::with_handler(
                    decl.getter.clone(),
                    decl.options.binding,
                    handler,
                ),
                decl,
                owner: Arc::downgrade(owner),
                owner_id: ObjectId::of_ref(owner),
                state: Mutex::new(SlotState {
                    cache: Cache::Uncached,
                    evaluating: None,
                }),
                changed,
            }
        }))
    }

    pub fn is_bound_to(&self, owner: &ObjectRef) -> bool {
        self.0.owner_id == ObjectId::of_ref(owner) && self.owner_alive()
    }

    pub fn owner_alive(&self) -> bool {
        self.0.owner.strong_count() > 0
    }

    pub fn changed(&self) -> &NotifyHub {
        &self.0.changed
    }

    pub fn state(&self) -> CacheState {
        match self.0.state.lock().cache {
            Cache::Uncached => CacheState::Uncached,
            Cache::Dirty => CacheState::Dirty,
            Cache::Clean(_) => CacheState::Clean,
        }
    }

    pub fn touched_member_count(&self) -> usize {
        self.0.tracker.touched_member_count()
    }

    /// Read the property for `owner`.
    pub fn get(&self, owner: &ObjectRef) -> Result<Value> {
        {
            let state = self.0.state.lock();
            if state.evaluating == Some(thread::current().id()) {
                drop(state);
                return Err(self.circular());
            }
            if self.0.decl.options.mode != RetrievalMode::OnDemand {
                if let Cache::Clean(cached) = &state.cache {
                    return cached.clone();
                }
            }
        }

        let root = Value::Object(Arc::clone(owner));
        match self.evaluate(&root) {
            Some(result) => result,
            None => Err(self.circular()),
        }
    }

    /// Write through the setter path.
    pub fn set(&self, owner: &ObjectRef, value: Value) -> Result<()> {
        let Some(setter) = &self.0.decl.setter else {
            return Err(Error::ReadOnly {
                property: self.0.decl.name.to_string(),
            });
        };
        setter.assign(&Value::Object(Arc::clone(owner)), value)
    }

    /// Drop the cached result and every subscription.
    pub fn invalidate(&self) {
        self.0.tracker.reset();
        self.0.state.lock().cache = Cache::Uncached;
    }

    /// Evaluate with tracking and store the outcome.
    ///
    /// Returns `None` on re-entry from the evaluating thread. A concurrent
    /// evaluation on another thread is answered untracked and not stored.
    fn evaluate(&self, root: &Value) -> Option<Result<Value>> {
        let guard = match EvaluationGuard::enter(&self.0.state) {
            Entry::Started(guard) => guard,
            Entry::Reentered => return None,
            Entry::Busy => return Some(self.0.decl.getter.evaluate(root)),
        };

        let mode = self.0.decl.options.mode;
        tracing::debug!(property = %self.0.decl.name, ?mode, "evaluating");

        let keepalive: Option<Keepalive> = match self.0.decl.options.binding {
            BindingStrength::Strong => Some(Arc::clone(&self.0) as Keepalive),
            BindingStrength::Weak => None,
        };
        let result = self.0.tracker.arm_retaining(root, keepalive.as_ref());
        // A change that arrived mid-evaluation already fired the tracker.
        let armed = self.0.tracker.is_armed();

        guard.finish(|state| {
            state.cache = match mode {
                RetrievalMode::OnDemand => Cache::Uncached,
                _ if armed => Cache::Clean(result.clone()),
                _ => Cache::Dirty,
            };
        });
        Some(result)
    }

    fn dependency_changed(&self, event: &ChangeEvent) {
        tracing::trace!(property = %self.0.decl.name, sender = ?event.sender, "dependency changed");

        match self.0.decl.options.mode {
            RetrievalMode::OnDemand => self.notify(),
            RetrievalMode::Lazy => {
                self.0.state.lock().cache = Cache::Dirty;
                self.notify();
            }
            RetrievalMode::Immediate => {
                let previous = {
                    let mut state = self.0.state.lock();
                    let in_progress = state.evaluating.is_some();
                    match std::mem::replace(&mut state.cache, Cache::Dirty) {
                        Cache::Clean(previous) if !in_progress => Some(Some(previous)),
                        _ if !in_progress => Some(None),
                        _ => None,
                    }
                };
                // The running evaluation finishes dirty; the next read catches up.
                let Some(previous) = previous else {
                    self.notify();
                    return;
                };
                let Some(root) = self.0.owner.upgrade().map(Value::Object) else {
                    return;
                };

                match (previous, self.evaluate(&root)) {
                    (Some(previous), Some(current)) if current == previous => {
                        tracing::trace!(property = %self.0.decl.name, "recomputed to the same result");
                    }
                    _ => self.notify(),
                }
            }
        }
    }

    fn notify(&self) {
        self.0.changed.emit(&ChangeEvent::property(
            self.0.owner_id,
            self.0.decl.name.clone(),
        ));
    }

    fn circular(&self) -> Error {
        tracing::warn!(
            property = %self.0.decl.name,
            owner = ?self.0.owner_id,
            "circular dependency detected"
        );
        Error::CircularDependency {
            property: self.0.decl.name.to_string(),
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("property", &self.0.decl.name)
            .field("owner", &self.0.owner_id)
            .field("state", &self.state())
            .field("tracker", &self.0.tracker)
            .finish()
    }
}
