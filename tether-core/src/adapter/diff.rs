//! Identity-preserving reconciliation.
//!
//! [`reconcile`] computes the edits that turn an old ordered sequence of
//! keys into a new one. Keys compare by identity (the collection adapter
//! uses wrapper addresses), and equal keys may repeat.
//!
//! # Algorithm
//!
//! 1. **Pair** every new occurrence with an old occurrence of the same key.
//!    The earliest unpaired old occurrence after the previously paired old
//!    index wins; otherwise the earliest unpaired one. Repeated keys are
//!    therefore matched positionally, never all at once.
//! 2. **Remove** unpaired old items, highest index first.
//! 3. **Keep** the longest run of paired items whose old indices increase
//!    in new order. They never move.
//! 4. Walk the new sequence **right to left**. Every other item is moved
//!    (if paired) or inserted (if not) directly in front of its successor.
//!
//! Indices of each edit refer to the sequence as left by the previous edit,
//! matching [`ObservableVec`](crate::object::ObservableVec) semantics.

use std::collections::HashMap;
use std::hash::Hash;

use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    /// Insert `new[source]` at `index`.
    Insert { index: usize, source: usize },
    Remove { index: usize },
    /// Remove the item at `from`, then insert it at `to`.
    Move { from: usize, to: usize },
}

/// Edits turning `old` into `new`.
pub fn reconcile<K>(old: &[K], new: &[K]) -> Vec<Edit>
where
    K: Copy + Eq + Hash,
{
    let new_to_old = pair(old, new);

    let mut paired_old = vec![false; old.len()];
    for &o in new_to_old.iter().flatten() {
        paired_old[o] = true;
    }

    let mut edits = Vec::new();
    for index in (0..old.len()).rev() {
        if !paired_old[index] {
            edits.push(Edit::Remove { index });
        }
    }

    // Survivors, in old order, named by their new index.
    let mut old_to_new = vec![None; old.len()];
    for (n, o) in new_to_old.iter().enumerate() {
        if let Some(o) = *o {
            old_to_new[o] = Some(n);
        }
    }
    let mut work: Vec<usize> = old_to_new.into_iter().flatten().collect();

    let stable = stable_set(&new_to_old);

    for n in (0..new.len()).rev() {
        if stable[n] {
            continue;
        }
        let successor = |work: &[usize]| {
            if n + 1 == new.len() {
                work.len()
            } else {
                position(work, n + 1)
            }
        };

        match new_to_old[n] {
            Some(_) => {
                let from = position(&work, n);
                work.remove(from);
                let to = successor(&work);
                work.insert(to, n);
                if from != to {
                    edits.push(Edit::Move { from, to });
                }
            }
            None => {
                let index = successor(&work);
                work.insert(index, n);
                edits.push(Edit::Insert { index, source: n });
            }
        }
    }

    edits
}

/// Replay `edits` on `base`, taking inserted items from `new`.
pub fn apply<T: Clone>(base: &mut Vec<T>, edits: &[Edit], new: &[T]) {
    for edit in edits {
        match *edit {
            Edit::Insert { index, source } => base.insert(index, new[source].clone()),
            Edit::Remove { index } => {
                base.remove(index);
            }
            Edit::Move { from, to } => {
                let item = base.remove(from);
                base.insert(to, item);
            }
        }
    }
}

fn position(work: &[usize], n: usize) -> usize {
    work.iter()
        .position(|&item| item == n)
        .unwrap_or(work.len())
}

/// For each new index, the old index it is paired with.
fn pair<K>(old: &[K], new: &[K]) -> Vec<Option<usize>>
where
    K: Copy + Eq + Hash,
{
    let mut unpaired: HashMap<K, SmallVec<[usize; 2]>> = HashMap::with_capacity(old.len());
    for (index, key) in old.iter().enumerate() {
        unpaired.entry(*key).or_default().push(index);
    }

    let mut last: Option<usize> = None;
    new.iter()
        .map(|key| {
            let candidates = unpaired.get_mut(key)?;
            if candidates.is_empty() {
                return None;
            }
            // Candidates stay sorted ascending.
            let at = last
                .and_then(|last| candidates.iter().position(|&o| o > last))
                .unwrap_or(0);
            let o = candidates.remove(at);
            last = Some(o);
            Some(o)
        })
        .collect()
}

/// Marks the new indices on a longest increasing run of old indices.
fn stable_set(new_to_old: &[Option<usize>]) -> Vec<bool> {
    // tails[k]: index into `new_to_old` ending the best run of length k + 1.
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; new_to_old.len()];

    for (n, o) in new_to_old.iter().enumerate() {
        let Some(o) = *o else { continue };
        let k = tails.partition_point(|&t| new_to_old[t].is_some_and(|v| v < o));
        if k > 0 {
            previous[n] = Some(tails[k - 1]);
        }
        if k == tails.len() {
            tails.push(n);
        } else {
            tails[k] = n;
        }
    }

    let mut stable = vec![false; new_to_old.len()];
    let mut cursor = tails.last().copied();
    while let Some(n) = cursor {
        stable[n] = true;
        cursor = previous[n];
    }
    stable
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
