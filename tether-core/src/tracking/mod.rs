//! Change Tracking
//!
//! The [`ChangeTracker`] evaluates an access path once, remembers every
//! `(object, member)` pair and every observable collection the evaluation
//! read, and subscribes exactly one listener to each. The first change to
//! any of them raises the tracker's `changed` callback once and tears every
//! subscription down.
//!
//! # Ownership
//!
//! ```text
//! ChangeTracker ──Arc──▶ TrackerState ──owns──▶ TouchedSet ──▶ Subscription
//!                             ▲                                    │
//!                             │ BackRef (Weak | Strong)            │ Weak
//!                             │                                    ▼
//!                        listener ◀──────────── held by ──────── producer
//! ```
//!
//! Subscriptions never keep producers alive. Listeners reach the tracker
//! through a [`BindingStrength`](crate::adapter::BindingStrength)-dependent
//! back-reference.

mod subscription;
mod touched;
mod tracker;

pub(crate) use subscription::Keepalive;
pub use tracker::{ChangeTracker, ChangedHandler};
