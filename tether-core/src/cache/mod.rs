//! Caching
//!
//! The [`IdentityCache`] deduplicates wrapper instances by *value* equality
//! of their keys. The change tracker's touched set keys on *reference*
//! identity instead: the cache merges logically equal keys, the tracker
//! never merges distinct objects.

mod identity;

pub use identity::{IdentityCache, NullableKey, SWEEP_INTERVAL};
