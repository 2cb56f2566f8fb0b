//! Change Tracker
//!
//! # Cycle
//!
//! ```text
//!           arm(root)                first matching change
//!   Idle ──────────────▶ Armed ─────────────────────────────▶ Fired
//!    ▲                    │  ▲                                  │
//!    └──── reset() ───────┘  └──────────── arm(root) ───────────┘
//! ```
//!
//! Each `arm` starts a new epoch with an empty touched set. Listeners carry
//! the epoch they were installed under, so a change delivered late for an
//! older cycle is ignored.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::adapter::BindingStrength;
use crate::error::Result;
use crate::object::{ChangeEvent, ChangePayload, ObjectId, ObjectRef, Value};
use crate::path::{AccessPath, Probe};

use super::subscription::{BackRef, Channel, Keepalive, Subscription};
use super::touched::TouchedSet;

/// Callback raised when a tracked change arrives.
pub type ChangedHandler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Armed,
    Fired,
}

struct Cycle {
    phase: Phase,
    epoch: u64,
    touched: TouchedSet,
}

impl Cycle {
    fn accepts(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.phase == Phase::Armed
    }
}

pub(crate) struct TrackerState {
    path: AccessPath,
    binding: BindingStrength,
    on_changed: ChangedHandler,
    cycle: Mutex<Cycle>,
}

impl TrackerState {
    /// First matching change of `epoch`: tear down and raise `changed`.
    fn fire(&self, epoch: u64, event: &ChangeEvent) {
        let touched = {
            let mut cycle = self.cycle.lock();
            if !cycle.accepts(epoch) {
                return;
            }
            cycle.phase = Phase::Fired;
            std::mem::take(&mut cycle.touched)
        };

        tracing::debug!(
            path = %self.path,
            sender = ?event.sender,
            members = touched.member_count(),
            collections = touched.collection_count(),
            "change tracker fired"
        );

        // Dropping the set unsubscribes every listener of this cycle.
        drop(touched);
        (self.on_changed)(event);
    }
}

/// Records what one evaluation reads and subscribes to it.
struct ArmProbe<'a> {
    state: &'a Arc<TrackerState>,
    epoch: u64,
    keepalive: Option<&'a Keepalive>,
}

impl ArmProbe<'_> {
    fn back_ref(&self) -> BackRef {
        match self.state.binding {
            BindingStrength::Weak => BackRef::Weak(Arc::downgrade(self.state)),
            BindingStrength::Strong => BackRef::Strong {
                state: Arc::clone(self.state),
                keepalive: self.keepalive.cloned(),
            },
        }
    }
}

impl Probe for ArmProbe<'_> {
    fn record(&self, target: &ObjectRef, member: &Arc<str>) {
        let Some(notifier) = target.property_notifier() else {
            return;
        };
        let sender = ObjectId::of_ref(target);
        let key = (sender, member.clone());
        {
            let cycle = self.state.cycle.lock();
            if !cycle.accepts(self.epoch) || cycle.touched.has_member(&key) {
                return;
            }
        }

        let back = self.back_ref();
        let epoch = self.epoch;
        let watched = member.clone();
        let id = notifier.subscribe(Arc::new(move |event: &ChangeEvent| {
            if event.sender != sender || !event.affects(&watched) {
                return;
            }
            if let Some(state) = back.upgrade() {
                state.fire(epoch, event);
            }
        }));
        let subscription = Subscription::new(target, Channel::Property, id);

        let rejected = {
            let mut cycle = self.state.cycle.lock();
            if cycle.accepts(self.epoch) {
                cycle.touched.add_member(key, subscription)
            } else {
                Some(subscription)
            }
        };
        if rejected.is_none() {
            tracing::trace!(path = %self.state.path, ?sender, %member, "member touched");
        }
    }

    fn inspect(&self, value: &Value) {
        let Value::Object(object) = value else {
            return;
        };
        let Some(notifier) = object.collection_notifier() else {
            return;
        };
        let sender = ObjectId::of_ref(object);
        {
            let cycle = self.state.cycle.lock();
            if !cycle.accepts(self.epoch) || cycle.touched.has_collection(sender) {
                return;
            }
        }

        let back = self.back_ref();
        let epoch = self.epoch;
        let id = notifier.subscribe(Arc::new(move |event: &ChangeEvent| {
            if event.sender != sender || !matches!(event.payload, ChangePayload::Collection(_)) {
                return;
            }
            if let Some(state) = back.upgrade() {
                state.fire(epoch, event);
            }
        }));
        let subscription = Subscription::new(object, Channel::Collection, id);

        let rejected = {
            let mut cycle = self.state.cycle.lock();
            if cycle.accepts(self.epoch) {
                cycle.touched.add_collection(sender, subscription)
            } else {
                Some(subscription)
            }
        };
        if rejected.is_none() {
            tracing::trace!(path = %self.state.path, ?sender, "collection touched");
        }
    }
}

/// Evaluates an access path once and raises `changed` on the first change
/// to anything that evaluation read.
///
/// After firing, every subscription is gone; observing resumes only with
/// the next [`ChangeTracker::arm`].
///
/// Under [`BindingStrength::Weak`] dropping the tracker removes its
/// subscriptions. Under [`BindingStrength::Strong`] the registered listeners
/// keep the tracker alive until they fire.
pub struct ChangeTracker {
    state: Arc<TrackerState>,
}

impl ChangeTracker {
    pub fn new<F>(path: impl Into<AccessPath>, binding: BindingStrength, on_changed: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        Self::with_handler(path.into(), binding, Arc::new(on_changed))
    }

    pub(crate) fn with_handler(
        path: AccessPath,
        binding: BindingStrength,
        on_changed: ChangedHandler,
    ) -> Self {
        Self {
            state: Arc::new(TrackerState {
                path,
                binding,
                on_changed,
                cycle: Mutex::new(Cycle {
                    phase: Phase::Idle,
                    epoch: 0,
                    touched: TouchedSet::new(),
                }),
            }),
        }
    }

    pub fn path(&self) -> &AccessPath {
        &self.state.path
    }

    pub fn binding(&self) -> BindingStrength {
        self.state.binding
    }

    /// Evaluate the path against `root` and observe everything it reads.
    ///
    /// Any previous cycle is discarded first. A failed evaluation still
    /// leaves the tracker armed on whatever was read before the failure.
    pub fn arm(&self, root: &Value) -> Result<Value> {
        self.arm_retaining(root, None)
    }

    /// Like [`ChangeTracker::arm`]; strong listeners also hold `keepalive`
    /// until the cycle ends.
    pub(crate) fn arm_retaining(&self, root: &Value, keepalive: Option<&Keepalive>) -> Result<Value> {
        let (epoch, previous) = {
            let mut cycle = self.state.cycle.lock();
            cycle.epoch += 1;
            cycle.phase = Phase::Armed;
            (cycle.epoch, std::mem::take(&mut cycle.touched))
        };
        drop(previous);

        tracing::trace!(path = %self.state.path, epoch, "arming change tracker");
        let probe = ArmProbe {
            state: &self.state,
            epoch,
            keepalive,
        };
        self.state.path.evaluate_with(root, &probe)
    }

    /// Discard the current cycle without firing.
    pub fn reset(&self) {
        let previous = {
            let mut cycle = self.state.cycle.lock();
            cycle.epoch += 1;
            cycle.phase = Phase::Idle;
            std::mem::take(&mut cycle.touched)
        };
        if !previous.is_empty() {
            tracing::trace!(path = %self.state.path, "change tracker reset");
        }
        drop(previous);
    }

    pub fn is_armed(&self) -> bool {
        self.state.cycle.lock().phase == Phase::Armed
    }

    pub fn touched_member_count(&self) -> usize {
        self.state.cycle.lock().touched.member_count()
    }

    pub fn touched_collection_count(&self) -> usize {
        self.state.cycle.lock().touched.collection_count()
    }
}

impl fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cycle = self.state.cycle.lock();
        f.debug_struct("ChangeTracker")
            .field("path", &self.state.path.to_string())
            .field("binding", &self.state.binding)
            .field("phase", &cycle.phase)
            .field("members", &cycle.touched.member_count())
            .field("collections", &cycle.touched.collection_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Model, ObservableVec};
    use crate::path::Expr;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counting(path: Expr, binding: BindingStrength) -> (ChangeTracker, Arc<AtomicI32>) {
        let fired = Arc::new(AtomicI32::new(0));
        let fired_clone = fired.clone();
        let tracker = ChangeTracker::new(path, binding, move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        (tracker, fired)
    }

    #[test]
    fn fires_once_for_a_member_on_the_path() {
        let address = Model::new("Address").with("City", "Oslo");
        let person = Model::new("Person")
            .with("Address", address.clone())
            .with("Age", 30);

        let (tracker, fired) = counting(
            Expr::root().member("Address").member("City"),
            BindingStrength::Weak,
        );
        let value = tracker.arm(&Value::from(person.clone())).unwrap();
        assert_eq!(value, Value::from("Oslo"));
        assert_eq!(tracker.touched_member_count(), 2);

        person.set_field("Age", 31);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        address.set_field("City", "Bergen");
        address.set_field("City", "Trondheim");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!tracker.is_armed());
    }

    #[test]
    fn repeated_reads_share_one_subscription() {
        let a = Model::new("A").with("P", 1).with("Q", 2);
        let path = Expr::root().member("P") + Expr::root().member("P") + Expr::root().member("Q");
        let (tracker, fired) = counting(path, BindingStrength::Weak);

        assert_eq!(tracker.arm(&Value::from(a.clone())).unwrap(), Value::Int(4));
        assert_eq!(tracker.touched_member_count(), 2);
        assert_eq!(a.listener_count(), 2);

        a.set_field("P", 5);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn firing_removes_every_subscription() {
        let a = Model::new("A").with("P", 1).with("Q", 2);
        let (tracker, _fired) = counting(
            Expr::root().member("P") + Expr::root().member("Q"),
            BindingStrength::Weak,
        );
        tracker.arm(&Value::from(a.clone())).unwrap();
        assert_eq!(a.listener_count(), 2);

        a.set_field("Q", 3);
        assert_eq!(a.listener_count(), 0);
        assert_eq!(tracker.touched_member_count(), 0);

        tracker.arm(&Value::from(a.clone())).unwrap();
        assert_eq!(a.listener_count(), 2);
    }

    #[test]
    fn changed_preserves_the_original_event() {
        let a = Model::new("A").with("P", 1);
        let seen = Arc::new(Mutex::new(None::<ChangeEvent>));
        let seen_clone = seen.clone();
        let tracker = ChangeTracker::new(
            Expr::root().member("P"),
            BindingStrength::Weak,
            move |event: &ChangeEvent| *seen_clone.lock() = Some(event.clone()),
        );
        tracker.arm(&Value::from(a.clone())).unwrap();

        a.set_field("P", 2);
        assert_eq!(*seen.lock(), Some(ChangeEvent::property(a.id(), "P")));
    }

    #[test]
    fn empty_property_name_fires() {
        let a = Model::new("A").with("P", 1);
        let (tracker, fired) = counting(Expr::root().member("P"), BindingStrength::Weak);
        tracker.arm(&Value::from(a.clone())).unwrap();

        a.touch("");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn collections_reached_by_the_path_are_observed() {
        let items = ObservableVec::from_items([Value::Int(1)]);
        let owner = Model::new("Owner").with("Items", items.clone());
        let (tracker, fired) = counting(
            Expr::root().member("Items").count(),
            BindingStrength::Weak,
        );
        assert_eq!(tracker.arm(&Value::from(owner)).unwrap(), Value::Int(1));
        assert_eq!(tracker.touched_collection_count(), 1);

        items.push(2);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(items.listener_count(), 0);
    }

    #[test]
    fn reset_discards_the_cycle() {
        let a = Model::new("A").with("P", 1);
        let (tracker, fired) = counting(Expr::root().member("P"), BindingStrength::Weak);
        tracker.arm(&Value::from(a.clone())).unwrap();

        tracker.reset();
        assert_eq!(a.listener_count(), 0);
        a.set_field("P", 2);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_evaluation_stays_armed() {
        let a = Model::new("A").with("Next", Value::Null);
        let (tracker, fired) = counting(
            Expr::root().member("Next").member("Name"),
            BindingStrength::Weak,
        );
        assert!(tracker.arm(&Value::from(a.clone())).is_err());
        assert!(tracker.is_armed());

        a.set_field("Next", Model::new("B").with("Name", "b"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_a_weak_tracker_unsubscribes() {
        let a = Model::new("A").with("P", 1);
        let (tracker, fired) = counting(Expr::root().member("P"), BindingStrength::Weak);
        tracker.arm(&Value::from(a.clone())).unwrap();
        assert_eq!(a.listener_count(), 1);

        drop(tracker);
        assert_eq!(a.listener_count(), 0);
        a.set_field("P", 2);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn a_strong_tracker_outlives_its_handle_until_it_fires() {
        let a = Model::new("A").with("P", 1);
        let (tracker, fired) = counting(Expr::root().member("P"), BindingStrength::Strong);
        tracker.arm(&Value::from(a.clone())).unwrap();

        drop(tracker);
        assert_eq!(a.listener_count(), 1);
        a.set_field("P", 2);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(a.listener_count(), 0);
    }

    #[test]
    fn static_reads_are_not_observed() {
        let (tracker, _fired) = counting(
            Expr::static_member("Config", "Limit", || Ok(Value::Int(3))),
            BindingStrength::Weak,
        );
        assert_eq!(tracker.arm(&Value::Null).unwrap(), Value::Int(3));
        assert_eq!(tracker.touched_member_count(), 0);
        assert!(tracker.is_armed());
    }

    #[test]
    fn concurrent_changes_fire_once_per_cycle() {
        const WRITERS: usize = 4;

        let a = Model::new("A").with("P", 0).with("Q", 0);
        let (tracker, fired) = counting(
            Expr::root().member("P") + Expr::root().member("Q"),
            BindingStrength::Weak,
        );

        for round in 1..=50 {
            tracker.arm(&Value::from(a.clone())).unwrap();
            assert_eq!(a.listener_count(), 2);

            let barrier = Arc::new(std::sync::Barrier::new(WRITERS));
            let writers: Vec<_> = (0..WRITERS)
                .map(|writer| {
                    let a = a.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        let member = if writer % 2 == 0 { "P" } else { "Q" };
                        barrier.wait();
                        a.set_field(member, round * 100 + writer as i64);
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }

            assert_eq!(fired.load(Ordering::SeqCst), round as i32);
            assert!(!tracker.is_armed());
            assert_eq!(a.listener_count(), 0);
        }
    }
}
