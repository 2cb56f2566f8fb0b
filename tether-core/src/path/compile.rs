//! Path Compilation
//!
//! Turns an (instrumented) [`Expr`] tree into a tree of closures. The walk
//! over the syntax tree happens once; evaluating the compiled path is a
//! chain of direct calls with no matching on node kinds.
//!
//! Instrumentation hooks are reached through the [`Probe`] carried by the
//! evaluation [`Frame`], so the same compiled path serves both tracked
//! evaluations (the change tracker's probe) and plain ones ([`NoProbe`]).

use std::sync::Arc;

use smallvec::SmallVec;

use super::expr::{BinaryOp, Expr, UnaryOp};
use crate::error::{Error, Result};
use crate::object::{ObjectRef, Value};

/// Receives the touches of a tracked evaluation.
pub(crate) trait Probe {
    /// `member` is about to be read from `target`.
    fn record(&self, target: &ObjectRef, member: &Arc<str>);

    /// A node produced `value`.
    fn inspect(&self, value: &Value);
}

/// Probe for untracked evaluations.
pub(crate) struct NoProbe;

impl Probe for NoProbe {
    fn record(&self, _target: &ObjectRef, _member: &Arc<str>) {}

    fn inspect(&self, _value: &Value) {}
}

/// Evaluation environment.
pub(crate) struct Frame<'a> {
    pub root: &'a Value,
    pub item: Option<&'a Value>,
    pub probe: &'a dyn Probe,
}

impl<'a> Frame<'a> {
    fn with_item<'b>(&'b self, item: &'b Value) -> Frame<'b> {
        Frame {
            root: self.root,
            item: Some(item),
            probe: self.probe,
        }
    }
}

/// A compiled node.
pub(crate) type Compiled = Arc<dyn Fn(&Frame<'_>) -> Result<Value> + Send + Sync>;

/// Compile `expr` into a callable.
pub(crate) fn compile(expr: &Expr) -> Compiled {
    match expr {
        Expr::Root => Arc::new(|frame: &Frame<'_>| Ok(frame.root.clone())),

        Expr::Item => Arc::new(|frame: &Frame<'_>| frame.item.cloned().ok_or(Error::UnboundItem)),

        Expr::Const(value) => {
            let value = value.clone();
            Arc::new(move |_: &Frame<'_>| Ok(value.clone()))
        }

        Expr::Member { target, member } => {
            let target = compile(target);
            let member = member.clone();
            Arc::new(move |frame: &Frame<'_>| read_member(target(frame)?, &member, None))
        }

        Expr::Track { target, member } => {
            let target = compile(target);
            let member = member.clone();
            Arc::new(move |frame: &Frame<'_>| {
                read_member(target(frame)?, &member, Some(frame.probe))
            })
        }

        Expr::Static { read, .. } => {
            let read = read.clone();
            Arc::new(move |_: &Frame<'_>| read())
        }

        Expr::Index { target, index } => {
            let target = compile(target);
            let index = compile(index);
            Arc::new(move |frame: &Frame<'_>| {
                let target = target(frame)?;
                let index = index(frame)?;
                read_index(&target, &index)
            })
        }

        Expr::Call {
            target,
            method,
            args,
        } => {
            let target = compile(target);
            let method = method.clone();
            let args: Vec<Compiled> = args.iter().map(compile).collect();
            Arc::new(move |frame: &Frame<'_>| {
                let target = target(frame)?;
                let values = eval_all(&args, frame)?;
                match target {
                    Value::Object(object) => object.call(&method, &values),
                    Value::Null => Err(Error::NullReference {
                        member: method.to_string(),
                    }),
                    other => Err(Error::NotAnObject {
                        member: method.to_string(),
                        found: other.kind(),
                    }),
                }
            })
        }

        Expr::Unary { op, operand } => {
            let op = *op;
            let operand = compile(operand);
            Arc::new(move |frame: &Frame<'_>| unary(op, operand(frame)?))
        }

        Expr::Binary { op, lhs, rhs } => compile_binary(*op, compile(lhs), compile(rhs)),

        Expr::Conditional {
            test,
            then,
            otherwise,
        } => {
            let test = compile(test);
            let then = compile(then);
            let otherwise = compile(otherwise);
            Arc::new(move |frame: &Frame<'_>| match test(frame)? {
                Value::Bool(true) => then(frame),
                Value::Bool(false) => otherwise(frame),
                other => Err(Error::TypeMismatch {
                    op: "?:",
                    lhs: other.kind(),
                    rhs: "bool",
                }),
            })
        }

        Expr::Map { source, body } => {
            let source = compile(source);
            let body = compile(body);
            Arc::new(move |frame: &Frame<'_>| {
                let items = source(frame)?.items()?;
                let mut out = Vec::with_capacity(items.len());
                for item in &items {
                    out.push(body(&frame.with_item(item))?);
                }
                Ok(Value::List(out.into()))
            })
        }

        Expr::Filter { source, predicate } => {
            let source = compile(source);
            let predicate = compile(predicate);
            Arc::new(move |frame: &Frame<'_>| {
                let items = source(frame)?.items()?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match predicate(&frame.with_item(&item))? {
                        Value::Bool(true) => out.push(item),
                        Value::Bool(false) => {}
                        other => {
                            return Err(Error::TypeMismatch {
                                op: "filter",
                                lhs: other.kind(),
                                rhs: "bool",
                            })
                        }
                    }
                }
                Ok(Value::List(out.into()))
            })
        }

        Expr::Apply { args, f, .. } => {
            let args: Vec<Compiled> = args.iter().map(compile).collect();
            let f = f.clone();
            Arc::new(move |frame: &Frame<'_>| {
                let values = eval_all(&args, frame)?;
                f(&values[..])
            })
        }

        Expr::Inspect(inner) => {
            let inner = compile(inner);
            Arc::new(move |frame: &Frame<'_>| {
                let value = inner(frame)?;
                frame.probe.inspect(&value);
                Ok(value)
            })
        }
    }
}

fn eval_all(args: &[Compiled], frame: &Frame<'_>) -> Result<SmallVec<[Value; 4]>> {
    args.iter().map(|arg| arg(frame)).collect()
}

fn read_member(target: Value, member: &Arc<str>, probe: Option<&dyn Probe>) -> Result<Value> {
    match target {
        Value::Object(object) => {
            if let Some(probe) = probe {
                probe.record(&object, member);
            }
            object.get(member)
        }
        Value::List(items) if &**member == "Count" => Ok(Value::Int(items.len() as i64)),
        Value::Null => Err(Error::NullReference {
            member: member.to_string(),
        }),
        other => Err(Error::NotAnObject {
            member: member.to_string(),
            found: other.kind(),
        }),
    }
}

fn read_index(target: &Value, index: &Value) -> Result<Value> {
    let Value::Int(i) = index else {
        return Err(Error::TypeMismatch {
            op: "[]",
            lhs: target.kind(),
            rhs: index.kind(),
        });
    };

    let out_of_range = |len: usize| Error::IndexOutOfRange { index: *i, len };
    match target {
        Value::List(items) => usize::try_from(*i)
            .ok()
            .and_then(|at| items.get(at).cloned())
            .ok_or_else(|| out_of_range(items.len())),
        Value::Object(object) => {
            let sequence = object.as_sequence().ok_or(Error::NotASequence {
                found: target.kind(),
            })?;
            usize::try_from(*i)
                .ok()
                .and_then(|at| sequence.item(at))
                .ok_or_else(|| out_of_range(sequence.len()))
        }
        Value::Null => Err(Error::NullReference {
            member: format!("[{i}]"),
        }),
        other => Err(Error::NotASequence {
            found: other.kind(),
        }),
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value> {
    match (op, value) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or(Error::Overflow { op: "-" }),
        (UnaryOp::Count, value) => {
            let len = match &value {
                Value::List(items) => items.len(),
                Value::Object(object) => match object.as_sequence() {
                    Some(sequence) => sequence.len(),
                    None => return Err(Error::NotASequence { found: value.kind() }),
                },
                other => return Err(Error::NotASequence { found: other.kind() }),
            };
            Ok(Value::Int(len as i64))
        }
        (UnaryOp::IsNull, value) => Ok(Value::Bool(value.is_null())),
        (op, value) => Err(Error::TypeMismatch {
            op: match op {
                UnaryOp::Not => "!",
                _ => "-",
            },
            lhs: value.kind(),
            rhs: value.kind(),
        }),
    }
}

fn compile_binary(op: BinaryOp, lhs: Compiled, rhs: Compiled) -> Compiled {
    match op {
        BinaryOp::And | BinaryOp::Or => Arc::new(move |frame: &Frame<'_>| {
            let left = expect_bool(op, lhs(frame)?)?;
            // Short-circuit: the right side is not evaluated, so not tracked.
            match (op, left) {
                (BinaryOp::And, false) => Ok(Value::Bool(false)),
                (BinaryOp::Or, true) => Ok(Value::Bool(true)),
                _ => Ok(Value::Bool(expect_bool(op, rhs(frame)?)?)),
            }
        }),
        BinaryOp::Coalesce => Arc::new(move |frame: &Frame<'_>| match lhs(frame)? {
            Value::Null => rhs(frame),
            value => Ok(value),
        }),
        _ => Arc::new(move |frame: &Frame<'_>| binary(op, lhs(frame)?, rhs(frame)?)),
    }
}

fn expect_bool(op: BinaryOp, value: Value) -> Result<bool> {
    value.as_bool().ok_or(Error::TypeMismatch {
        op: op.symbol(),
        lhs: value.kind(),
        rhs: "bool",
    })
}

pub(crate) fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    let mismatch = |lhs: &Value, rhs: &Value| Error::TypeMismatch {
        op: op.symbol(),
        lhs: lhs.kind(),
        rhs: rhs.kind(),
    };

    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),

        BinaryOp::Add => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or(Error::Overflow { op: "+" }),
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::from(format!("{lhs}{rhs}"))),
            _ => Err(mismatch(&lhs, &rhs)),
        },

        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) else {
                return Err(mismatch(&lhs, &rhs));
            };
            let result = match op {
                BinaryOp::Sub => a.checked_sub(*b),
                BinaryOp::Mul => a.checked_mul(*b),
                _ if *b == 0 => return Err(Error::DivideByZero),
                _ => a.checked_div(*b),
            };
            result.map(Value::Int).ok_or(Error::Overflow { op: op.symbol() })
        }

        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => return Err(mismatch(&lhs, &rhs)),
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }

        BinaryOp::And | BinaryOp::Or => {
            let left = expect_bool(op, lhs)?;
            let right = expect_bool(op, rhs)?;
            Ok(Value::Bool(if op == BinaryOp::And {
                left && right
            } else {
                left || right
            }))
        }

        BinaryOp::Coalesce => Ok(if lhs.is_null() { rhs } else { lhs }),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn run(expr: &Expr, root: &Value) -> Result<Value> {
        let compiled = compile(expr);
        compiled(&Frame {
            root,
            item: None,
            probe: &NoProbe,
        })
    }

    #[test]
    fn arithmetic_and_comparison() {
        let expr = (Expr::constant(6) - Expr::constant(2)) * Expr::constant(3);
        assert_eq!(run(&expr, &Value::Null).unwrap(), Value::Int(12));

        let expr = Expr::constant(2).less_than(Expr::constant(3));
        assert_eq!(run(&expr, &Value::Null).unwrap(), Value::Bool(true));
    }

    #[test]
    fn string_concatenation() {
        let expr = Expr::constant("n=") + Expr::constant(4);
        assert_eq!(run(&expr, &Value::Null).unwrap(), Value::from("n=4"));
    }

    #[test]
    fn division_by_zero_fails() {
        let expr = Expr::constant(1) / Expr::constant(0);
        assert_eq!(run(&expr, &Value::Null).unwrap_err(), Error::DivideByZero);
    }

    #[test]
    fn short_circuit_skips_right_side() {
        let failing = Expr::apply("fail", vec![], |_| Err(Error::evaluation("evaluated")));
        let expr = Expr::constant(false).and_also(failing.clone());
        assert_eq!(run(&expr, &Value::Null).unwrap(), Value::Bool(false));

        let expr = Expr::constant(true).and_also(failing);
        assert_eq!(
            run(&expr, &Value::Null).unwrap_err(),
            Error::evaluation("evaluated")
        );
    }

    #[test]
    fn map_and_filter_bind_items() {
        let root = Value::list([Value::Int(1), Value::Int(2), Value::Int(3)]);
        let expr = Expr::root()
            .filter(Expr::item().greater_than(Expr::constant(1)))
            .map(Expr::item() * Expr::constant(10));

        assert_eq!(
            run(&expr, &root).unwrap(),
            Value::list([Value::Int(20), Value::Int(30)])
        );
    }

    #[test]
    fn item_outside_map_is_unbound() {
        assert_eq!(run(&Expr::item(), &Value::Null).unwrap_err(), Error::UnboundItem);
    }

    #[test]
    fn indexing_checks_bounds() {
        let root = Value::list([Value::Int(5)]);
        assert_eq!(run(&Expr::root().at(0), &root).unwrap(), Value::Int(5));
        assert_eq!(
            run(&Expr::root().at(2), &root).unwrap_err(),
            Error::IndexOutOfRange { index: 2, len: 1 }
        );
    }

    #[test]
    fn member_of_null_is_a_null_reference() {
        let expr = Expr::root().member("Name");
        assert_eq!(
            run(&expr, &Value::Null).unwrap_err(),
            Error::NullReference {
                member: "Name".into()
            }
        );
    }

    #[test]
    fn conditional_and_coalesce() {
        let expr = Expr::conditional(
            Expr::root().is_null(),
            Expr::constant("none"),
            Expr::constant("some"),
        );
        assert_eq!(run(&expr, &Value::Null).unwrap(), Value::from("none"));

        let expr = Expr::root().coalesce(Expr::constant(9));
        assert_eq!(run(&expr, &Value::Null).unwrap(), Value::Int(9));
        assert_eq!(run(&expr, &Value::Int(1)).unwrap(), Value::Int(1));
    }

    #[test]
    fn list_count() {
        let root = Value::list([Value::Int(1), Value::Int(2)]);
        assert_eq!(run(&Expr::root().count(), &root).unwrap(), Value::Int(2));
        assert_eq!(
            run(&Expr::root().member("Count"), &root).unwrap(),
            Value::Int(2)
        );
    }
}
