//! Symbolic interval arithmetic.
//!
//! Bounds inference evaluates index expressions over a scope mapping loop
//! variables to closed intervals. Endpoints are expressions: a variable
//! bound outside the region under analysis stays symbolic, which is what
//! lets a producer's bounds depend on its consumer's outer loop.
//!
//! Endpoints fold through the builder canonicalizations, so constant
//! ranges come out as literals.

use rustc_hash::FxHashMap;
use weft_diagnostic::{CompileError, CompileResult};
use weft_ir::{BinOp, Expr, ExprKind, Name};

/// A closed interval `[min, max]` with symbolic endpoints.
#[derive(Clone, Debug, PartialEq)]
pub struct Interval {
    pub min: Expr,
    pub max: Expr,
}

impl Interval {
    pub fn new(min: Expr, max: Expr) -> Interval {
        Interval { min, max }
    }

    /// The interval containing exactly one point.
    pub fn single_point(e: Expr) -> Interval {
        Interval {
            min: e.clone(),
            max: e,
        }
    }

    /// The smallest interval containing both operands.
    pub fn union(self, other: Interval) -> CompileResult<Interval> {
        Ok(Interval {
            min: Expr::min(self.min, other.min)?,
            max: Expr::max(self.max, other.max)?,
        })
    }

    /// `max - min + 1` as an extent expression.
    pub fn extent(&self) -> CompileResult<Expr> {
        Expr::binary(
            BinOp::Add,
            Expr::binary(BinOp::Sub, self.max.clone(), self.min.clone())?,
            Expr::int(1),
        )
    }
}

/// Loop-variable and let bindings in scope during a bounds walk.
#[derive(Default, Clone)]
pub struct Scope {
    bindings: FxHashMap<Name, Interval>,
}

impl Scope {
    pub fn new() -> Scope {
        Scope::default()
    }

    pub fn push(&mut self, name: Name, interval: Interval) -> Option<Interval> {
        self.bindings.insert(name, interval)
    }

    /// Remove a binding, restoring `previous` if the name was shadowed.
    pub fn pop(&mut self, name: &Name, previous: Option<Interval>) {
        match previous {
            Some(interval) => {
                self.bindings.insert(name.clone(), interval);
            }
            None => {
                self.bindings.remove(name);
            }
        }
    }

    pub fn get(&self, name: &Name) -> Option<&Interval> {
        self.bindings.get(name)
    }
}

/// The interval of values `expr` takes over `scope`.
///
/// Unbound variables are symbolic single points. Expressions whose range
/// cannot be expressed (data-dependent loads, unbounded divisions) fail
/// with `BoundsInferenceFailure`.
pub fn bounds_of_expr(expr: &Expr, scope: &Scope) -> CompileResult<Interval> {
    match expr.kind() {
        ExprKind::IntImm(_) | ExprKind::UIntImm(_) | ExprKind::FloatImm(_) => {
            Ok(Interval::single_point(expr.clone()))
        }

        ExprKind::Var(name) => match scope.get(name) {
            Some(interval) => Ok(interval.clone()),
            None => Ok(Interval::single_point(expr.clone())),
        },

        ExprKind::Cast(value) => {
            // Index casts are monotone; analyze the operand.
            bounds_of_expr(value, scope)
        }

        ExprKind::Binary { op, a, b } => {
            let ia = bounds_of_expr(a, scope)?;
            let ib = bounds_of_expr(b, scope)?;
            bounds_of_binary(*op, &ia, &ib, expr)
        }

        ExprKind::Select {
            true_value,
            false_value,
            ..
        } => {
            let it = bounds_of_expr(true_value, scope)?;
            let if_ = bounds_of_expr(false_value, scope)?;
            it.union(if_)
        }

        ExprKind::Ramp { base, stride, lanes } => {
            let ib = bounds_of_expr(base, scope)?;
            let last = Expr::binary(
                BinOp::Mul,
                stride.clone(),
                Expr::int(i64::from(*lanes) - 1),
            )?;
            let ie = bounds_of_expr(&Expr::binary(BinOp::Add, base.clone(), last)?, scope)?;
            ib.union(ie)
        }

        ExprKind::Broadcast { value, .. } => bounds_of_expr(value, scope),

        ExprKind::Let { name, value, body } => {
            let value_interval = bounds_of_expr(value, scope)?;
            let mut inner = scope.clone();
            inner.push(name.clone(), value_interval);
            bounds_of_expr(body, &inner)
        }

        ExprKind::Cmp { .. }
        | ExprKind::And { .. }
        | ExprKind::Or { .. }
        | ExprKind::Not(_) => Err(CompileError::bounds(
            "boolean expression used as an index",
            expr.to_string(),
        )),

        ExprKind::StringImm(_) | ExprKind::Load { .. } | ExprKind::Call { .. } => {
            Err(CompileError::bounds(
                "cannot bound a data-dependent index",
                expr.to_string(),
            ))
        }
    }
}

fn bounds_of_binary(
    op: BinOp,
    a: &Interval,
    b: &Interval,
    source: &Expr,
) -> CompileResult<Interval> {
    match op {
        BinOp::Add => Ok(Interval::new(
            Expr::binary(BinOp::Add, a.min.clone(), b.min.clone())?,
            Expr::binary(BinOp::Add, a.max.clone(), b.max.clone())?,
        )),
        BinOp::Sub => Ok(Interval::new(
            Expr::binary(BinOp::Sub, a.min.clone(), b.max.clone())?,
            Expr::binary(BinOp::Sub, a.max.clone(), b.min.clone())?,
        )),
        BinOp::Mul => {
            // All four corner products; min/max folds collapse the
            // constant cases.
            let corners = [
                Expr::binary(BinOp::Mul, a.min.clone(), b.min.clone())?,
                Expr::binary(BinOp::Mul, a.min.clone(), b.max.clone())?,
                Expr::binary(BinOp::Mul, a.max.clone(), b.min.clone())?,
                Expr::binary(BinOp::Mul, a.max.clone(), b.max.clone())?,
            ];
            let mut min = corners[0].clone();
            let mut max = corners[0].clone();
            for c in &corners[1..] {
                min = Expr::min(min, c.clone())?;
                max = Expr::max(max, c.clone())?;
            }
            Ok(Interval::new(min, max))
        }
        BinOp::Div => {
            // Division by a positive constant is monotone.
            match b.min.as_const_int() {
                Some(c) if c > 0 && b.min == b.max => Ok(Interval::new(
                    Expr::binary(BinOp::Div, a.min.clone(), b.min.clone())?,
                    Expr::binary(BinOp::Div, a.max.clone(), b.min.clone())?,
                )),
                _ => Err(CompileError::bounds(
                    "cannot bound a division by a non-constant",
                    source.to_string(),
                )),
            }
        }
        BinOp::Mod => match b.min.as_const_int() {
            Some(c) if c > 0 && b.min == b.max => {
                Ok(Interval::new(Expr::int(0), Expr::int(c - 1)))
            }
            _ => Err(CompileError::bounds(
                "cannot bound a modulo by a non-constant",
                source.to_string(),
            )),
        },
        BinOp::Min => Ok(Interval::new(
            Expr::min(a.min.clone(), b.min.clone())?,
            Expr::min(a.max.clone(), b.max.clone())?,
        )),
        BinOp::Max => Ok(Interval::new(
            Expr::max(a.min.clone(), b.min.clone())?,
            Expr::max(a.max.clone(), b.max.clone())?,
        )),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use weft_ir::Expr;

    fn scope_with(name: &str, min: i64, max: i64) -> Scope {
        let mut s = Scope::new();
        s.push(
            Name::new(name),
            Interval::new(Expr::int(min), Expr::int(max)),
        );
        s
    }

    #[test]
    fn stencil_footprint() {
        // x - 1 .. x + 1 over x in [0, 9] is [-1, 10].
        let scope = scope_with("x", 0, 9);
        let lo = bounds_of_expr(&(Expr::var("x") - 1), &scope).unwrap();
        let hi = bounds_of_expr(&(Expr::var("x") + 1), &scope).unwrap();
        let u = lo.union(hi).unwrap();
        assert_eq!(u.min.as_const_int(), Some(-1));
        assert_eq!(u.max.as_const_int(), Some(10));
        assert_eq!(u.extent().unwrap().as_const_int(), Some(12));
    }

    #[test]
    fn unbound_variables_stay_symbolic() {
        let scope = scope_with("x", 0, 7);
        let i = bounds_of_expr(&(Expr::var("x") + Expr::var("yo")), &scope).unwrap();
        assert_eq!(i.min.to_string(), "yo");
        assert_eq!(i.max.to_string(), "(7 + yo)");
    }

    #[test]
    fn multiplication_by_negative_constant_swaps() {
        let scope = scope_with("x", 0, 4);
        let i = bounds_of_expr(&(Expr::var("x") * -2), &scope).unwrap();
        assert_eq!(i.min.as_const_int(), Some(-8));
        assert_eq!(i.max.as_const_int(), Some(0));
    }

    #[test]
    fn division_by_positive_constant() {
        let scope = scope_with("x", -8, 8);
        let i = bounds_of_expr(&(Expr::var("x") / 4), &scope).unwrap();
        assert_eq!(i.min.as_const_int(), Some(-2));
        assert_eq!(i.max.as_const_int(), Some(2));
    }

    #[test]
    fn data_dependent_index_fails() {
        let scope = Scope::new();
        let load = Expr::load(weft_ir::Type::int32(), "lut", Expr::var("i")).unwrap();
        assert!(bounds_of_expr(&load, &scope).is_err());
    }

    #[test]
    fn select_unions_branches() {
        let scope = scope_with("x", 0, 3);
        let cond = Expr::cmp(weft_ir::CmpOp::Lt, Expr::var("x"), Expr::int(2)).unwrap();
        let e = Expr::select(cond, Expr::var("x"), Expr::var("x") + 10).unwrap();
        let i = bounds_of_expr(&e, &scope).unwrap();
        assert_eq!(i.min.as_const_int(), Some(0));
        assert_eq!(i.max.as_const_int(), Some(13));
    }
}
