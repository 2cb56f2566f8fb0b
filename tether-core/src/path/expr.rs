//! Access Path Trees
//!
//! An [`Expr`] is an immutable description of a side-effect-free read over
//! a root value. Trees are built with the fluent helpers on [`Expr`] and
//! the arithmetic operator impls, then wrapped in an
//! [`AccessPath`](super::AccessPath) which instruments and compiles them
//! once.

use std::fmt;
use std::ops;
use std::sync::Arc;

use crate::error::Result;
use crate::object::Value;

/// A static (instance-less) getter.
pub type StaticRead = Arc<dyn Fn() -> Result<Value> + Send + Sync>;

/// A pure function applied to evaluated arguments.
pub type PureFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    /// Number of elements of a list or sequence.
    Count,
    IsNull,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Short-circuiting
    And,
    Or,
    Coalesce,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Coalesce => "??",
        }
    }
}

/// A node of an access path.
#[derive(Clone)]
pub enum Expr {
    /// The root value the path is evaluated against.
    Root,
    /// The element bound by the innermost `Map` or `Filter`.
    Item,
    Const(Value),
    Member {
        target: Box<Expr>,
        member: Arc<str>,
    },
    /// A static member read. It has no instance and is never observed.
    Static {
        owner: Arc<str>,
        member: Arc<str>,
        read: StaticRead,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        target: Box<Expr>,
        method: Arc<str>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Map {
        source: Box<Expr>,
        body: Box<Expr>,
    },
    Filter {
        source: Box<Expr>,
        predicate: Box<Expr>,
    },
    Apply {
        name: Arc<str>,
        args: Vec<Expr>,
        f: PureFn,
    },

    // Instrumentation nodes, produced by `instrument`.
    /// A member read whose target and member name are reported to the
    /// tracker before the read.
    Track {
        target: Box<Expr>,
        member: Arc<str>,
    },
    /// Reports the result of the inner node to the tracker.
    Inspect(Box<Expr>),
}

impl Expr {
    pub fn root() -> Self {
        Self::Root
    }

    pub fn item() -> Self {
        Self::Item
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Const(value.into())
    }

    pub fn static_member<F>(owner: impl Into<Arc<str>>, member: impl Into<Arc<str>>, read: F) -> Self
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        Self::Static {
            owner: owner.into(),
            member: member.into(),
            read: Arc::new(read),
        }
    }

    pub fn apply<F>(name: impl Into<Arc<str>>, args: Vec<Expr>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::Apply {
            name: name.into(),
            args,
            f: Arc::new(f),
        }
    }

    pub fn conditional(test: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn member(self, member: impl Into<Arc<str>>) -> Self {
        Self::Member {
            target: Box::new(self),
            member: member.into(),
        }
    }

    pub fn index(self, index: Expr) -> Self {
        Self::Index {
            target: Box::new(self),
            index: Box::new(index),
        }
    }

    pub fn at(self, index: i64) -> Self {
        self.index(Self::Const(Value::Int(index)))
    }

    pub fn call(self, method: impl Into<Arc<str>>, args: Vec<Expr>) -> Self {
        Self::Call {
            target: Box::new(self),
            method: method.into(),
            args,
        }
    }

    pub fn count(self) -> Self {
        Self::unary(UnaryOp::Count, self)
    }

    pub fn is_null(self) -> Self {
        Self::unary(UnaryOp::IsNull, self)
    }

    pub fn equals(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Eq, self, rhs)
    }

    pub fn not_equals(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Ne, self, rhs)
    }

    pub fn less_than(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Lt, self, rhs)
    }

    pub fn less_or_equal(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Le, self, rhs)
    }

    pub fn greater_than(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Gt, self, rhs)
    }

    pub fn greater_or_equal(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Ge, self, rhs)
    }

    pub fn and_also(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::And, self, rhs)
    }

    pub fn or_else(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Or, self, rhs)
    }

    pub fn coalesce(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Coalesce, self, rhs)
    }

    /// Project every element of this sequence through `body`, where
    /// [`Expr::item`] denotes the element.
    pub fn map(self, body: Expr) -> Self {
        Self::Map {
            source: Box::new(self),
            body: Box::new(body),
        }
    }

    /// Keep the elements of this sequence for which `predicate` is true.
    pub fn filter(self, predicate: Expr) -> Self {
        Self::Filter {
            source: Box::new(self),
            predicate: Box::new(predicate),
        }
    }

    /// Whether the tree already carries instrumentation nodes.
    pub fn is_instrumented(&self) -> bool {
        matches!(self, Self::Track { .. } | Self::Inspect(_))
    }
}

impl ops::Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, self, rhs)
    }
}

impl ops::Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Sub, self, rhs)
    }
}

impl ops::Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Mul, self, rhs)
    }
}

impl ops::Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Div, self, rhs)
    }
}

impl ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::unary(UnaryOp::Not, self)
    }
}

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("root"),
            Self::Item => f.write_str("item"),
            Self::Const(Value::Str(s)) => write!(f, "{s:?}"),
            Self::Const(value) => write!(f, "{value}"),
            Self::Member { target, member } | Self::Track { target, member } => {
                write!(f, "{target}.{member}")
            }
            Self::Static { owner, member, .. } => write!(f, "{owner}::{member}"),
            Self::Index { target, index } => write!(f, "{target}[{index}]"),
            Self::Call {
                target,
                method,
                args,
            } => {
                write!(f, "{target}.{method}(")?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Self::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
                UnaryOp::Count => write!(f, "{operand}.count()"),
                UnaryOp::IsNull => write!(f, "{operand}.is_null()"),
            },
            Self::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Self::Conditional {
                test,
                then,
                otherwise,
            } => write!(f, "({test} ? {then} : {otherwise})"),
            Self::Map { source, body } => write!(f, "{source}.map({body})"),
            Self::Filter { source, predicate } => write!(f, "{source}.filter({predicate})"),
            Self::Apply { name, args, .. } => {
                write!(f, "{name}(")?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Self::Inspect(inner) => write!(f, "{inner}"),
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({self})")
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_member_chains() {
        let expr = Expr::root().member("Address").member("City");
        assert_eq!(expr.to_string(), "root.Address.City");
    }

    #[test]
    fn display_renders_operators() {
        let expr = Expr::root().member("A") + Expr::constant(1);
        assert_eq!(expr.to_string(), "(root.A + 1)");

        let expr = Expr::root()
            .member("Items")
            .filter(Expr::item().member("Active"))
            .count();
        assert_eq!(expr.to_string(), "root.Items.filter(item.Active).count()");
    }

    #[test]
    fn static_members_render_with_owner() {
        let expr = Expr::static_member("Clock", "Now", || Ok(Value::Int(0))).member("Ticks");
        assert_eq!(expr.to_string(), "Clock::Now.Ticks");
    }
}
