//! Path Instrumentation
//!
//! Rewrites an access path so that evaluation reports what it touches:
//!
//! 1. Every `Member` node becomes a `Track` node, which hands its evaluated
//!    target object and the member name to the tracker before reading.
//! 2. Every node's result is wrapped in `Inspect`, which hands the value to
//!    the tracker so observable collections can be subscribed.
//!
//! `Static` reads have no instance to observe. They are left untracked;
//! their *result* is still inspected, so members read off a static value
//! are tracked as usual.

use super::expr::Expr;

/// Produce the instrumented copy of `expr`.
///
/// Already instrumented trees are returned unchanged.
pub fn instrument(expr: &Expr) -> Expr {
    if expr.is_instrumented() {
        return expr.clone();
    }

    let rewritten = match expr {
        Expr::Root | Expr::Item | Expr::Const(_) => expr.clone(),
        Expr::Member { target, member } => Expr::Track {
            target: Box::new(instrument(target)),
            member: member.clone(),
        },
        Expr::Static { owner, member, .. } => {
            tracing::debug!(%owner, %member, "static member read is not observed");
            expr.clone()
        }
        Expr::Index { target, index } => Expr::Index {
            target: Box::new(instrument(target)),
            index: Box::new(instrument(index)),
        },
        Expr::Call {
            target,
            method,
            args,
        } => Expr::Call {
            target: Box::new(instrument(target)),
            method: method.clone(),
            args: args.iter().map(instrument).collect(),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op: *op,
            operand: Box::new(instrument(operand)),
        },
        Expr::Binary { op, lhs, rhs } => Expr::Binary {
            op: *op,
            lhs: Box::new(instrument(lhs)),
            rhs: Box::new(instrument(rhs)),
        },
        Expr::Conditional {
            test,
            then,
            otherwise,
        } => Expr::Conditional {
            test: Box::new(instrument(test)),
            then: Box::new(instrument(then)),
            otherwise: Box::new(instrument(otherwise)),
        },
        Expr::Map { source, body } => Expr::Map {
            source: Box::new(instrument(source)),
            body: Box::new(instrument(body)),
        },
        Expr::Filter { source, predicate } => Expr::Filter {
            source: Box::new(instrument(source)),
            predicate: Box::new(instrument(predicate)),
        },
        Expr::Apply { name, args, f } => Expr::Apply {
            name: name.clone(),
            args: args.iter().map(instrument).collect(),
            f: f.clone(),
        },
        Expr::Track { .. } | Expr::Inspect(_) => expr.clone(),
    };

    Expr::Inspect(Box::new(rewritten))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
