//! Error Types
//!
//! Every failure produced while evaluating an access path or driving an
//! adapter is an [`Error`]. Errors are `Clone + PartialEq` because a failed
//! evaluation is a legitimate cached value: scalar adapters replay it
//! verbatim until the next recomputation, and Immediate mode compares a new
//! failure against the previous one before notifying.

use std::sync::Arc;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{type_name} has no member `{member}`")]
    MissingMember { type_name: String, member: String },

    #[error("{type_name} has no method `{method}`")]
    MissingMethod { type_name: String, method: String },

    #[error("cannot read `{member}` of null")]
    NullReference { member: String },

    #[error("cannot read `{member}` of a {found} value")]
    NotAnObject { member: String, found: &'static str },

    #[error("expected a sequence, found {found}")]
    NotASequence { found: &'static str },

    #[error("index {index} is out of range for a sequence of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("operator `{op}` does not apply to {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("division by zero")]
    DivideByZero,

    #[error("integer overflow in `{op}`")]
    Overflow { op: &'static str },

    #[error("`item` referenced outside of a map or filter body")]
    UnboundItem,

    #[error("path `{path}` does not end in a member access and cannot be assigned")]
    NotAssignable { path: String },

    #[error("property `{property}` is read-only")]
    ReadOnly { property: String },

    #[error("invalid access path `{path}`")]
    InvalidPath { path: String },

    /// A failure raised by domain code (a method, a static getter, an
    /// applied function).
    #[error("{0}")]
    Evaluation(Arc<str>),

    /// The property was read again while its own evaluation was still
    /// running on the same thread.
    #[error("circular dependency while evaluating `{property}`")]
    CircularDependency { property: String },
}

impl Error {
    /// Build a domain evaluation failure.
    pub fn evaluation(message: impl Into<Arc<str>>) -> Self {
        Self::Evaluation(message.into())
    }

    /// Whether this is the dedicated re-entrancy failure.
    pub fn is_circular(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }
}
