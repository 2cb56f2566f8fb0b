//! Re-entrancy guard.
//!
//! An adapter marks the thread that is evaluating it. Reading the same
//! adapter for the same owner again on that thread is a circular
//! dependency; a read from any other thread is merely concurrent.

use std::thread::{self, ThreadId};

use parking_lot::Mutex;

/// State that carries an "evaluation in progress" marker.
pub(crate) trait Evaluating {
    fn evaluating(&mut self) -> &mut Option<ThreadId>;
}

/// Result of trying to start an evaluation.
pub(crate) enum Entry<'a, S: Evaluating> {
    Started(EvaluationGuard<'a, S>),
    /// The current thread is already evaluating.
    Reentered,
    /// Another thread is evaluating.
    Busy,
}

/// Clears the marker when dropped, including on unwind.
pub(crate) struct EvaluationGuard<'a, S: Evaluating> {
    state: &'a Mutex<S>,
    finished: bool,
}

impl<'a, S: Evaluating> EvaluationGuard<'a, S> {
    /// Mark the current thread as evaluating.
    ///
    /// `state` must not be locked by the caller.
    pub fn enter(state: &'a Mutex<S>) -> Entry<'a, S> {
        let current = thread::current().id();
        let mut locked = state.lock();
        match *locked.evaluating() {
            Some(owner) if owner == current => Entry::Reentered,
            Some(_) => Entry::Busy,
            None => {
                *locked.evaluating() = Some(current);
                Entry::Started(Self {
                    state,
                    finished: false,
                })
            }
        }
    }

    /// Store the evaluation's outcome and clear the marker under one lock.
    pub fn finish<R>(mut self, store: impl FnOnce(&mut S) -> R) -> R {
        let mut locked = self.state.lock();
        *locked.evaluating() = None;
        self.finished = true;
        store(&mut *locked)
    }
}

impl<S: Evaluating> Drop for EvaluationGuard<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            *self.state.lock().evaluating() = None;
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct State {
        evaluating: Option<ThreadId>,
        value: i32,
    }

    impl Evaluating for State {
        fn evaluating(&mut self) -> &mut Option<ThreadId> {
            &mut self.evaluating
        }
    }

    #[test]
    fn same_thread_reentry_is_detected() {
        let state = Mutex::new(State::default());
        let Entry::Started(guard) = EvaluationGuard::enter(&state) else {
            panic!("first entry should start");
        };
        assert!(matches!(EvaluationGuard::enter(&state), Entry::Reentered));

        guard.finish(|state| state.value = 7);
        assert_eq!(state.lock().value, 7);
        assert!(state.lock().evaluating.is_none());
    }

    #[test]
    fn other_threads_see_busy() {
        let state = Arc::new(Mutex::new(State::default()));
        let Entry::Started(guard) = EvaluationGuard::enter(&*state) else {
            panic!("first entry should start");
        };

        let state_clone = state.clone();
        let busy = std::thread::spawn(move || {
            matches!(EvaluationGuard::enter(&*state_clone), Entry::Busy)
        })
        .join()
        .unwrap();
        assert!(busy);
        drop(guard);
    }

    #[test]
    fn drop_clears_the_marker() {
        let state = Mutex::new(State::default());
        if let Entry::Started(guard) = EvaluationGuard::enter(&state) {
            drop(guard);
        }
        assert!(state.lock().evaluating.is_none());
        assert!(matches!(EvaluationGuard::enter(&state), Entry::Started(_)));
    }
}
