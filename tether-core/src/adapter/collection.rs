//! Collection Property
//!
//! A [`CollectionProperty`] evaluates a getter yielding a sequence, projects
//! every item through an [`IdentityCache`] into a wrapper, and publishes the
//! wrappers in a live [`ProjectedSequence`]. Successive materializations
//! are reconciled by wrapper identity, so a wrapper published once stays the
//! same instance for as long as its source item is present.
//!
//! # Recomputation
//!
//! ```text
//! getter ──▶ source items ──IdentityCache──▶ wrappers ──reconcile──▶ edits
//!                                                                    │
//!                        ProjectedSequence ◀── Reset | Insert/Remove/Move
//! ```
//!
//! A reset is published instead of edits when the mode is OnDemand, on the
//! first materialization for an owner, or when there would be more edits
//! than items. An empty sequence that was already published is diffed like
//! any other, so a first item arrives as a single insert.
//!
//! Recomputation is single-flight: a change arriving while a recomputation
//! runs or publishes is remembered, and the running one goes around again
//! after publishing.

use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use parking_lot::Mutex;

use super::diff::{reconcile, Edit};
use super::guard::{Entry, Evaluating, EvaluationGuard};
use super::options::{AdapterOptions, BindingStrength, RetrievalMode};
use super::OwnedProperty;
use crate::cache::IdentityCache;
use crate::error::{Error, Result};
use crate::object::{
    ChangeEvent, Listener, ListenerId, Notifier, NotifyHub, Object, ObjectId, ObjectRef,
    ObservableVec, Sequence, Value,
};
use crate::path::AccessPath;
use crate::tracking::{ChangeTracker, ChangedHandler, Keepalive};

/// The live, read-only sequence a [`CollectionProperty`] publishes.
///
/// It is an observable collection: structural edits are raised as
/// [`CollectionChange`](crate::object::CollectionChange) events.
#[repr(transparent)]
pub struct ProjectedSequence(ObservableVec);

impl ProjectedSequence {
    fn new() -> Arc<Self> {
        Arc::new(Self(ObservableVec::with_name("ProjectedSequence", Vec::new())))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.get(index)
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.0.to_vec()
    }

    pub fn listener_count(&self) -> usize {
        self.0.listener_count()
    }

    fn apply(&self, edits: &[Edit], published: &[Value]) {
        for edit in edits {
            match *edit {
                Edit::Insert { index, source } => self.0.insert(index, published[source].clone()),
                Edit::Remove { index } => {
                    self.0.remove(index);
                }
                Edit::Move { from, to } => {
                    self.0.move_item(from, to);
                }
            }
        }
    }

    fn reset(&self, published: Vec<Value>) {
        self.0.replace_all(published);
    }
}

impl Object for ProjectedSequence {
    fn type_name(&self) -> &str {
        self.0.type_name()
    }

    fn get(&self, member: &str) -> Result<Value> {
        Object::get(&self.0, member)
    }

    fn collection_notifier(&self) -> Option<&dyn Notifier> {
        self.0.collection_notifier()
    }

    fn as_sequence(&self) -> Option<&dyn Sequence> {
        self.0.as_sequence()
    }
}

impl fmt::Debug for ProjectedSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProjectedSequence").field(&self.0).finish()
    }
}

/// Builds the wrapper of one source item.
pub type Projection<W> = Arc<dyn Fn(&Value) -> Arc<W> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Unmaterialized,
    Current,
    Dirty,
}

enum Publication {
    Reset,
    Edits(Vec<Edit>),
}

struct CollectionState<W> {
    owner: Option<Weak<dyn Object>>,
    owner_id: Option<ObjectId>,
    /// What the target holds: source items and their wrappers.
    previous: Vec<(Value, Option<Arc<W>>)>,
    /// Whether `previous` was published for the bound owner.
    materialized: bool,
    status: Status,
    failure: Option<Error>,
    evaluating: Option<ThreadId>,
    publishing: bool,
    pending: bool,
}

impl<W> Evaluating for CollectionState<W> {
    fn evaluating(&mut self) -> &mut Option<ThreadId> {
        &mut self.evaluating
    }
}

struct CollectionInner<W: Object> {
    name: Arc<str>,
    options: AdapterOptions,
    cache: IdentityCache<Value, W>,
    target: Arc<ProjectedSequence>,
    tracker: ChangeTracker,
    state: Mutex<CollectionState<W>>,
    changed: NotifyHub,
}

/// A computed, identity-stable projection of a source sequence.
pub struct CollectionProperty<W: Object> {
    inner: Arc<CollectionInner<W>>,
}

impl<W: Object> Clone for CollectionProperty<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Object> CollectionProperty<W> {
    /// `getter` must yield a list or a sequence object. Each item is turned
    /// into a wrapper by `projection`, once per distinct (by value) item.
    pub fn new<F>(
        name: impl Into<Arc<str>>,
        getter: impl Into<AccessPath>,
        options: impl Into<AdapterOptions>,
        projection: F,
    ) -> Self
    where
        F: Fn(&Value) -> Arc<W> + Send + Sync + 'static,
    {
        let name = name.into();
        let getter = getter.into();
        let options = options.into();
        let projection: Projection<W> = Arc::new(projection);

        let inner = Arc::new_cyclic(|this: &Weak<CollectionInner<W>>| {
            let this = this.clone();
            let handler: ChangedHandler = Arc::new(move |event: &ChangeEvent| {
                if let Some(inner) = this.upgrade() {
                    CollectionProperty { inner }.dependency_changed(event);
                }
            });
            CollectionInner {
                name,
                options,
                cache: IdentityCache::from_shared(move |item: &Value| projection(item)),
                target: ProjectedSequence::new(),
                tracker: ChangeTracker::with_handler(getter, options.binding, handler),
                state: Mutex::new(CollectionState {
                    owner: None,
                    owner_id: None,
                    previous: Vec::new(),
                    materialized: false,
                    status: Status::Unmaterialized,
                    failure: None,
                    evaluating: None,
                    publishing: false,
                    pending: false,
                }),
                changed: NotifyHub::new(),
            }
        });
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The published sequence for `owner`, recomputed first if needed.
    ///
    /// A failed recomputation leaves the published contents as they were
    /// and returns the failure until the next recomputation.
    pub fn get_collection(&self, owner: &ObjectRef) -> Result<Arc<ProjectedSequence>> {
        let id = ObjectId::of_ref(owner);
        let stale = {
            let mut state = self.inner.state.lock();
            let bound = state.owner_id == Some(id)
                && state.owner.as_ref().is_some_and(|owner| owner.strong_count() > 0);
            if bound {
                let cached = self.inner.options.mode != RetrievalMode::OnDemand
                    && state.status == Status::Current
                    && state.evaluating.is_none();
                if cached {
                    return self.published(&state);
                }
                None
            } else {
                state.owner = Some(Arc::downgrade(owner));
                state.owner_id = Some(id);
                state.status = Status::Unmaterialized;
                state.materialized = false;
                state.failure = None;
                Some(std::mem::take(&mut state.previous))
            }
        };
        if let Some(stale) = stale {
            tracing::debug!(property = %self.inner.name, "binding to a new owner");
            self.inner.tracker.reset();
            drop(stale);
        }

        self.refresh(&Value::Object(Arc::clone(owner)), false)
    }

    /// The published sequence, as is.
    pub fn target(&self) -> Arc<ProjectedSequence> {
        Arc::clone(&self.inner.target)
    }

    /// Published wrappers, in order. Null source items have none.
    pub fn wrappers(&self) -> Vec<Option<Arc<W>>> {
        self.inner
            .state
            .lock()
            .previous
            .iter()
            .map(|(_, wrapper)| wrapper.clone())
            .collect()
    }

    /// The cache wrappers are drawn from.
    pub fn cache(&self) -> &IdentityCache<Value, W> {
        &self.inner.cache
    }

    /// Whether the published contents reflect the source.
    pub fn is_current(&self) -> bool {
        self.inner.state.lock().status == Status::Current
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

    fn published(&self, state: &CollectionState<W>) -> Result<Arc<ProjectedSequence>> {
        match &state.failure {
            Some(err) => Err(err.clone()),
            None => Ok(self.target()),
        }
    }

    /// Recompute and publish. `trigger` is set when a dependency change
    /// asked for it, rather than a read.
    fn refresh(&self, root: &Value, trigger: bool) -> Result<Arc<ProjectedSequence>> {
        let guard = match EvaluationGuard::enter(&self.inner.state) {
            Entry::Started(guard) => guard,
            Entry::Reentered => {
                let state = self.inner.state.lock();
                if state.publishing {
                    return Ok(self.target());
                }
                drop(state);
                return Err(self.circular());
            }
            Entry::Busy => {
                let mut state = self.inner.state.lock();
                state.pending |= trigger;
                return self.published(&state);
            }
        };

        let mode = self.inner.options.mode;
        let keepalive: Option<Keepalive> = match self.inner.options.binding {
            BindingStrength::Strong => Some(Arc::clone(&self.inner) as Keepalive),
            BindingStrength::Weak => None,
        };

        loop {
            tracing::debug!(property = %self.inner.name, ?mode, "recomputing collection");
            let outcome = self
                .inner
                .tracker
                .arm_retaining(root, keepalive.as_ref())
                .and_then(|source| source.items());
            let armed = self.inner.tracker.is_armed();
            let status = if armed { Status::Current } else { Status::Dirty };

            let items = match outcome {
                Ok(items) => items,
                Err(err) => {
                    tracing::debug!(property = %self.inner.name, %err, "collection getter failed");
                    return guard.finish(|state| {
                        state.failure = Some(err.clone());
                        state.status = status;
                        state.pending = false;
                        Err(err)
                    });
                }
            };

            let wrappers: Vec<Option<Arc<W>>> = items
                .iter()
                .map(|item| self.inner.cache.get_or_create(item))
                .collect();
            let published: Vec<Value> = wrappers
                .iter()
                .map(|wrapper| match wrapper {
                    Some(wrapper) => Value::Object(Arc::clone(wrapper) as ObjectRef),
                    None => Value::Null,
                })
                .collect();
            let new_keys: Vec<Option<ObjectId>> = wrappers.iter().map(wrapper_key).collect();

            let (publication, stale) = {
                let mut state = self.inner.state.lock();
                let old_keys: Vec<Option<ObjectId>> = state
                    .previous
                    .iter()
                    .map(|(_, wrapper)| wrapper_key(wrapper))
                    .collect();
                let publication = decide(mode, state.materialized, &old_keys, &new_keys);

                let stale = std::mem::replace(
                    &mut state.previous,
                    items.into_iter().zip(wrappers).collect(),
                );
                state.materialized = true;
                state.failure = None;
                state.status = status;
                state.publishing = true;
                (publication, stale)
            };
            drop(stale);

            match publication {
                Publication::Reset => {
                    tracing::debug!(property = %self.inner.name, len = published.len(), "publishing reset");
                    self.inner.target.reset(published);
                }
                Publication::Edits(edits) => {
                    tracing::trace!(property = %self.inner.name, edits = edits.len(), "publishing edits");
                    self.inner.target.apply(&edits, &published);
                }
            }

            let rerun = {
                let mut state = self.inner.state.lock();
                state.publishing = false;
                std::mem::take(&mut state.pending)
            };
            if !rerun {
                break;
            }
        }

        guard.finish(|_| ());
        Ok(self.target())
    }

    fn dependency_changed(&self, event: &ChangeEvent) {
        tracing::trace!(property = %self.inner.name, sender = ?event.sender, "dependency changed");

        match self.inner.options.mode {
            RetrievalMode::OnDemand => self.notify(),
            RetrievalMode::Lazy => {
                {
                    let mut state = self.inner.state.lock();
                    if state.status == Status::Current {
                        state.status = Status::Dirty;
                    }
                }
                self.notify();
            }
            RetrievalMode::Immediate => {
                let root = {
                    let mut state = self.inner.state.lock();
                    if state.evaluating.is_some() {
                        state.pending = true;
                        return;
                    }
                    state.owner.as_ref().and_then(Weak::upgrade)
                };
                if let Some(owner) = root {
                    // A failure is kept as the published state; nobody is
                    // waiting for it here.
                    let _ = self.refresh(&Value::Object(owner), true);
                }
            }
        }
    }

    fn notify(&self) {
        let Some(owner) = self.inner.state.lock().owner_id else {
            return;
        };
        self.inner
            .changed
            .emit(&ChangeEvent::property(owner, self.inner.name.clone()));
    }

    fn circular(&self) -> Error {
        tracing::warn!(property = %self.inner.name, "circular dependency detected");
        Error::CircularDependency {
            property: self.inner.name.to_string(),
        }
    }
}

fn wrapper_key<W>(wrapper: &Option<Arc<W>>) -> Option<ObjectId> {
    wrapper.as_ref().map(|wrapper| ObjectId::of(&**wrapper))
}

fn decide(
    mode: RetrievalMode,
    materialized: bool,
    old: &[Option<ObjectId>],
    new: &[Option<ObjectId>],
) -> Publication {
    if mode == RetrievalMode::OnDemand || !materialized {
        return Publication::Reset;
    }
    let edits = reconcile(old, new);
    if edits.len() > old.len().max(new.len()) {
        Publication::Reset
    } else {
        Publication::Edits(edits)
    }
}

impl<W: Object> OwnedProperty for CollectionProperty<W> {
    fn name(&self) -> &str {
        CollectionProperty::name(self)
    }

    fn get(&self, owner: &ObjectRef) -> Result<Value> {
        let target: ObjectRef = self.get_collection(owner)?;
        Ok(Value::Object(target))
    }

    fn watch(&self, _owner: &ObjectRef, listener: Listener) -> ListenerId {
        self.inner.changed.subscribe(listener)
    }

    fn unwatch(&self, _owner: &ObjectRef, id: ListenerId) -> bool {
        self.inner.changed.unsubscribe(id)
    }
}

impl<W: Object> fmt::Debug for CollectionProperty<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CollectionProperty")
            .field("name", &self.inner.name)
            .field("options", &self.inner.options)
            .field("status", &state.status)
            .field("len", &state.previous.len())
            .field("tracker", &self.inner.tracker)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
