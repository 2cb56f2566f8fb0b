//! Access Paths
//!
//! An access path is a read-only expression that navigates from a root
//! value to a derived value. Adapters declare their getters as access
//! paths so the change tracker can see every member the read touches.
//!
//! # Lifecycle
//!
//! ```text
//! Expr tree ──instrument──▶ tracked tree ──compile──▶ closure tree
//!                                                       │
//!                              evaluate(root, probe) ◀──┘  (many times)
//! ```
//!
//! Instrumentation and compilation happen once per [`AccessPath`], on first
//! evaluation, and the result is shared by every clone of the path.

mod compile;
mod expr;
mod instrument;

pub use expr::{BinaryOp, Expr, PureFn, StaticRead, UnaryOp};
pub use instrument::instrument;

pub(crate) use compile::{Frame, NoProbe, Probe};

use std::fmt;
use std::sync::{Arc, OnceLock};

use compile::Compiled;

use crate::error::{Error, Result};
use crate::object::Value;

struct PathInner {
    source: Expr,
    compiled: OnceLock<Compiled>,
    /// Target and member of the final member access, for assignment.
    assign: OnceLock<Option<(Compiled, Arc<str>)>>,
}

/// A shared, lazily compiled access path.
#[derive(Clone)]
pub struct AccessPath {
    inner: Arc<PathInner>,
}

impl AccessPath {
    pub fn new(expr: Expr) -> Self {
        Self {
            inner: Arc::new(PathInner {
                source: expr,
                compiled: OnceLock::new(),
                assign: OnceLock::new(),
            }),
        }
    }

    /// Parse a dotted member chain such as `"Address.City"`, read from the
    /// root.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidPath {
            path: text.to_string(),
        };

        let mut expr = Expr::root();
        for segment in text.split('.') {
            let segment = segment.trim();
            if !is_identifier(segment) {
                return Err(invalid());
            }
            expr = expr.member(segment);
        }
        Ok(Self::new(expr))
    }

    /// The path as declared, without instrumentation.
    pub fn expr(&self) -> &Expr {
        &self.inner.source
    }

    pub(crate) fn compiled(&self) -> &Compiled {
        self.inner
            .compiled
            .get_or_init(|| compile::compile(&instrument(&self.inner.source)))
    }

    /// Evaluate without tracking.
    pub fn evaluate(&self, root: &Value) -> Result<Value> {
        self.evaluate_with(root, &NoProbe)
    }

    /// Evaluate, reporting touches to `probe`.
    pub(crate) fn evaluate_with(&self, root: &Value, probe: &dyn Probe) -> Result<Value> {
        let compiled = self.compiled();
        compiled(&Frame {
            root,
            item: None,
            probe,
        })
    }

    /// Write `value` through this path.
    ///
    /// The path must end in a member access. Its target is evaluated
    /// without tracking and the member is set on the resulting object.
    pub fn assign(&self, root: &Value, value: Value) -> Result<()> {
        let Some((target, member)) = self.inner.assign.get_or_init(|| match self.expr() {
            Expr::Member { target, member } => Some((compile::compile(target), member.clone())),
            _ => None,
        }) else {
            return Err(Error::NotAssignable {
                path: self.to_string(),
            });
        };

        let frame = Frame {
            root,
            item: None,
            probe: &NoProbe,
        };
        match target(&frame)? {
            Value::Object(object) => object.set(member, value),
            Value::Null => Err(Error::NullReference {
                member: member.to_string(),
            }),
            other => Err(Error::NotAnObject {
                member: member.to_string(),
                found: other.kind(),
            }),
        }
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl From<Expr> for AccessPath {
    fn from(expr: Expr) -> Self {
        Self::new(expr)
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.source)
    }
}

impl fmt::Debug for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPath")
            .field("source", &self.to_string())
            .field("compiled", &self.inner.compiled.get().is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Model;

    #[test]
    fn parse_builds_member_chains() {
        let path = AccessPath::parse("Address.City").unwrap();
        assert_eq!(path.to_string(), "root.Address.City");
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        for text in ["", "A..B", "1st", "A.B-C", "."] {
            assert_eq!(
                AccessPath::parse(text).unwrap_err(),
                Error::InvalidPath {
                    path: text.to_string()
                },
                "{text:?} should not parse"
            );
        }
    }

    #[test]
    fn evaluate_reads_through_objects() {
        let address = Model::new("Address").with("City", "Oslo");
        let person = Model::new("Person").with("Address", address);

        let path = AccessPath::parse("Address.City").unwrap();
        assert_eq!(
            path.evaluate(&Value::from(person)).unwrap(),
            Value::from("Oslo")
        );
    }

    #[test]
    fn clones_share_the_compiled_tree() {
        let path = AccessPath::parse("Name").unwrap();
        let clone = path.clone();
        let first = path.compiled() as *const Compiled;
        let second = clone.compiled() as *const Compiled;
        assert_eq!(first, second);
    }

    #[test]
    fn assign_sets_the_final_member() {
        let address = Model::new("Address").with("City", "Oslo");
        let person = Model::new("Person").with("Address", address.clone());

        let path = AccessPath::parse("Address.City").unwrap();
        path.assign(&Value::from(person), Value::from("Bergen"))
            .unwrap();
        assert_eq!(address.field("City"), Some(Value::from("Bergen")));
    }

    #[test]
    fn assign_requires_a_member_access() {
        let path = AccessPath::new(Expr::root().member("A") + Expr::constant(1));
        assert!(matches!(
            path.assign(&Value::Null, Value::Int(1)),
            Err(Error::NotAssignable { .. })
        ));
    }
}
