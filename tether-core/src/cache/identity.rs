//! Identity Cache
//!
//! Maps keys, compared by value, to lazily created instances held weakly.
//! Logically equal keys get the same instance for as long as somebody else
//! keeps it alive. A collected entry is indistinguishable from one never
//! created: the next lookup makes a new instance.
//!
//! # Sweeping
//!
//! Dead entries are pruned opportunistically. Every [`SWEEP_INTERVAL`]
//! lookups a background thread is started that takes the lock once and
//! drops them; lookups never wait for it. A dead entry that survives a
//! little longer costs nothing but memory.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::Mutex;

use crate::object::{ObjectId, Value};

/// Lookups between background sweeps. Each sweep runs on a freshly spawned
/// thread, so this also bounds how often a lookup starts one.
pub const SWEEP_INTERVAL: usize = 64;

/// Keys with a null state. Null keys are never cached.
pub trait NullableKey {
    fn is_null_key(&self) -> bool;
}

impl NullableKey for Value {
    fn is_null_key(&self) -> bool {
        self.is_null()
    }
}

impl<T> NullableKey for Option<T> {
    fn is_null_key(&self) -> bool {
        self.is_none()
    }
}

impl<A: NullableKey, B: NullableKey> NullableKey for (A, B) {
    fn is_null_key(&self) -> bool {
        self.0.is_null_key() || self.1.is_null_key()
    }
}

macro_rules! never_null {
    ($($ty:ty),*) => {
        $(impl NullableKey for $ty {
            fn is_null_key(&self) -> bool {
                false
            }
        })*
    };
}

never_null!(String, Arc<str>, i64, u64, usize, ObjectId);

type Factory<K, V> = Box<dyn Fn(&K) -> Arc<V> + Send + Sync>;

struct CacheInner<K, V> {
    entries: Mutex<HashMap<K, Weak<V>>>,
    factory: Factory<K, V>,
    lookups: AtomicUsize,
    sweep_scheduled: AtomicBool,
}

impl<K: Eq + Hash, V> CacheInner<K, V> {
    fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, value| value.strong_count() > 0);
        before - entries.len()
    }
}

pub struct IdentityCache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> IdentityCache<K, V>
where
    K: NullableKey + Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create a cache producing instances with `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        Self::from_shared(move |key: &K| Arc::new(factory(key)))
    }

    /// Create a cache whose factory hands out shared instances, for types
    /// that are only ever built behind an `Arc`.
    pub fn from_shared<F>(factory: F) -> Self
    where
        F: Fn(&K) -> Arc<V> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                factory: Box::new(factory),
                lookups: AtomicUsize::new(0),
                sweep_scheduled: AtomicBool::new(false),
            }),
        }
    }

    /// The live instance for `key`, created if there is none.
    ///
    /// Returns `None` only for a null key.
    pub fn get_or_create(&self, key: &K) -> Option<Arc<V>> {
        if key.is_null_key() {
            return None;
        }
        self.maybe_sweep();

        if let Some(existing) = self.lookup(key) {
            return Some(existing);
        }

        // The factory runs unlocked; a racing creator may win.
        let created = (self.inner.factory)(key);
        let winner = {
            let mut entries = self.inner.entries.lock();
            match entries.get(key).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    entries.insert(key.clone(), Arc::downgrade(&created));
                    Arc::clone(&created)
                }
            }
        };
        Some(winner)
    }

    /// The live instance for `key`, without creating one.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        if key.is_null_key() {
            return None;
        }
        self.maybe_sweep();
        self.lookup(key)
    }

    /// Drop the entry for `key`. Instances already handed out stay alive.
    pub fn forget(&self, key: &K) -> bool {
        self.inner.entries.lock().remove(key).is_some()
    }

    /// Number of entries, dead ones included.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries whose instance is still alive.
    pub fn live_count(&self) -> usize {
        self.inner
            .entries
            .lock()
            .values()
            .filter(|value| value.strong_count() > 0)
            .count()
    }

    /// Remove dead entries now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    fn lookup(&self, key: &K) -> Option<Arc<V>> {
        self.inner.entries.lock().get(key).and_then(Weak::upgrade)
    }

    fn maybe_sweep(&self) {
        let lookups = self.inner.lookups.fetch_add(1, Ordering::Relaxed) + 1;
        if lookups % SWEEP_INTERVAL != 0 || self.inner.sweep_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let spawned = thread::Builder::new()
            .name("identity-cache-sweep".into())
            .spawn(move || {
                if let Some(inner) = weak.upgrade() {
                    let removed = inner.sweep();
                    inner.sweep_scheduled.store(false, Ordering::Release);
                    tracing::trace!(removed, "identity cache swept");
                }
            });

        if let Err(err) = spawned {
            self.inner.sweep_scheduled.store(false, Ordering::Release);
            tracing::debug!(%err, "could not start identity cache sweep");
        }
    }
}

impl<K, V> Clone for IdentityCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for IdentityCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("entries", &self.inner.entries.lock().len())
            .field("lookups", &self.inner.lookups.load(Ordering::Relaxed))
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
