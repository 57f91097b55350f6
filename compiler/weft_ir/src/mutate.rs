//! IR mutator.
//!
//! Rebuilding traversal: each `mutate_*` returns a possibly-new tree. When
//! no child changes (observed by node identity), the *original* node is
//! returned rather than a reconstruction. Fixed-point passes terminate
//! because of this property; do not rebuild unchanged nodes.
//!
//! Changed nodes are rebuilt through the checked builders, so mutation
//! re-runs type checking and canonicalization. Nodes whose type depends on
//! their children (loads, casts, arithmetic) widen automatically when a
//! mutation vectorizes a child, which is how the vectorization pass
//! broadcasts scalar operations.

use weft_diagnostic::CompileResult;

use crate::{Expr, ExprKind, Range, Stmt, StmtKind};

/// IR mutator trait.
pub trait Mutator {
    /// Mutate an expression. The default rebuilds children.
    fn mutate_expr(&mut self, expr: &Expr) -> CompileResult<Expr> {
        mutate_expr_children(self, expr)
    }

    /// Mutate a statement. The default rebuilds children.
    fn mutate_stmt(&mut self, stmt: &Stmt) -> CompileResult<Stmt> {
        mutate_stmt_children(self, stmt)
    }
}

/// Rebuild an expression from mutated children, preserving identity when
/// nothing changed.
pub fn mutate_expr_children<M: Mutator + ?Sized>(
    mutator: &mut M,
    expr: &Expr,
) -> CompileResult<Expr> {
    let ty = expr.ty();
    match expr.kind() {
        ExprKind::IntImm(_)
        | ExprKind::UIntImm(_)
        | ExprKind::FloatImm(_)
        | ExprKind::StringImm(_)
        | ExprKind::Var(_) => Ok(expr.clone()),

        ExprKind::Cast(value) => {
            let new = mutator.mutate_expr(value)?;
            if new.ptr_eq(value) {
                Ok(expr.clone())
            } else {
                Expr::cast(ty.with_lanes(new.ty().lanes), new)
            }
        }

        ExprKind::Binary { op, a, b } => {
            let new_a = mutator.mutate_expr(a)?;
            let new_b = mutator.mutate_expr(b)?;
            if new_a.ptr_eq(a) && new_b.ptr_eq(b) {
                Ok(expr.clone())
            } else {
                Expr::binary(*op, new_a, new_b)
            }
        }

        ExprKind::Cmp { op, a, b } => {
            let new_a = mutator.mutate_expr(a)?;
            let new_b = mutator.mutate_expr(b)?;
            if new_a.ptr_eq(a) && new_b.ptr_eq(b) {
                Ok(expr.clone())
            } else {
                Expr::cmp(*op, new_a, new_b)
            }
        }

        ExprKind::And { a, b } => {
            let new_a = mutator.mutate_expr(a)?;
            let new_b = mutator.mutate_expr(b)?;
            if new_a.ptr_eq(a) && new_b.ptr_eq(b) {
                Ok(expr.clone())
            } else {
                Expr::and(new_a, new_b)
            }
        }

        ExprKind::Or { a, b } => {
            let new_a = mutator.mutate_expr(a)?;
            let new_b = mutator.mutate_expr(b)?;
            if new_a.ptr_eq(a) && new_b.ptr_eq(b) {
                Ok(expr.clone())
            } else {
                Expr::or(new_a, new_b)
            }
        }

        ExprKind::Not(value) => {
            let new = mutator.mutate_expr(value)?;
            if new.ptr_eq(value) {
                Ok(expr.clone())
            } else {
                Expr::not(new)
            }
        }

        ExprKind::Select {
            condition,
            true_value,
            false_value,
        } => {
            let new_c = mutator.mutate_expr(condition)?;
            let new_t = mutator.mutate_expr(true_value)?;
            let new_f = mutator.mutate_expr(false_value)?;
            if new_c.ptr_eq(condition) && new_t.ptr_eq(true_value) && new_f.ptr_eq(false_value) {
                Ok(expr.clone())
            } else {
                Expr::select(new_c, new_t, new_f)
            }
        }

        ExprKind::Load { name, index } => {
            let new = mutator.mutate_expr(index)?;
            if new.ptr_eq(index) {
                Ok(expr.clone())
            } else {
                Expr::load(ty.with_lanes(new.ty().lanes), name.clone(), new)
            }
        }

        ExprKind::Ramp { base, stride, lanes } => {
            let new_base = mutator.mutate_expr(base)?;
            let new_stride = mutator.mutate_expr(stride)?;
            if new_base.ptr_eq(base) && new_stride.ptr_eq(stride) {
                Ok(expr.clone())
            } else {
                Expr::ramp(new_base, new_stride, *lanes)
            }
        }

        ExprKind::Broadcast { value, lanes } => {
            let new = mutator.mutate_expr(value)?;
            if new.ptr_eq(value) {
                Ok(expr.clone())
            } else {
                Expr::broadcast(new, *lanes)
            }
        }

        ExprKind::Let { name, value, body } => {
            let new_value = mutator.mutate_expr(value)?;
            let new_body = mutator.mutate_expr(body)?;
            if new_value.ptr_eq(value) && new_body.ptr_eq(body) {
                Ok(expr.clone())
            } else {
                Ok(Expr::let_in(name.clone(), new_value, new_body))
            }
        }

        ExprKind::Call {
            name,
            args,
            kind,
            value_index,
        } => {
            let mut changed = false;
            let mut new_args = Vec::with_capacity(args.len());
            for arg in args {
                let new = mutator.mutate_expr(arg)?;
                changed |= !new.ptr_eq(arg);
                new_args.push(new);
            }
            if !changed {
                return Ok(expr.clone());
            }
            // A call whose arguments vectorized widens its result.
            let arg_lanes = new_args.iter().map(|a| a.ty().lanes).max().unwrap_or(1);
            let new_ty = if ty.is_scalar() && arg_lanes > 1 {
                ty.with_lanes(arg_lanes)
            } else {
                ty
            };
            Expr::call(new_ty, name.clone(), new_args, *kind, *value_index)
        }
    }
}

/// Rebuild a statement from mutated children, preserving identity when
/// nothing changed.
pub fn mutate_stmt_children<M: Mutator + ?Sized>(
    mutator: &mut M,
    stmt: &Stmt,
) -> CompileResult<Stmt> {
    match stmt.kind() {
        StmtKind::LetStmt { name, value, body } => {
            let new_value = mutator.mutate_expr(value)?;
            let new_body = mutator.mutate_stmt(body)?;
            if new_value.ptr_eq(value) && new_body.ptr_eq(body) {
                Ok(stmt.clone())
            } else {
                Ok(Stmt::let_stmt(name.clone(), new_value, new_body))
            }
        }

        StmtKind::AssertStmt { condition, message } => {
            let new = mutator.mutate_expr(condition)?;
            if new.ptr_eq(condition) {
                Ok(stmt.clone())
            } else {
                Stmt::assert_stmt(new, message.clone())
            }
        }

        StmtKind::For {
            name,
            min,
            extent,
            for_type,
            device,
            body,
        } => {
            let new_min = mutator.mutate_expr(min)?;
            let new_extent = mutator.mutate_expr(extent)?;
            let new_body = mutator.mutate_stmt(body)?;
            if new_min.ptr_eq(min) && new_extent.ptr_eq(extent) && new_body.ptr_eq(body) {
                Ok(stmt.clone())
            } else {
                Stmt::for_loop(name.clone(), new_min, new_extent, *for_type, *device, new_body)
            }
        }

        StmtKind::Store { name, index, value } => {
            let new_index = mutator.mutate_expr(index)?;
            let new_value = mutator.mutate_expr(value)?;
            if new_index.ptr_eq(index) && new_value.ptr_eq(value) {
                Ok(stmt.clone())
            } else {
                Stmt::store(name.clone(), new_index, new_value)
            }
        }

        StmtKind::Provide { name, values, args } => {
            let mut changed = false;
            let mut new_values = Vec::with_capacity(values.len());
            for v in values {
                let new = mutator.mutate_expr(v)?;
                changed |= !new.ptr_eq(v);
                new_values.push(new);
            }
            let mut new_args = Vec::with_capacity(args.len());
            for a in args {
                let new = mutator.mutate_expr(a)?;
                changed |= !new.ptr_eq(a);
                new_args.push(new);
            }
            if changed {
                Ok(Stmt::provide(name.clone(), new_values, new_args))
            } else {
                Ok(stmt.clone())
            }
        }

        StmtKind::Allocate {
            name,
            ty,
            extents,
            body,
        } => {
            let mut changed = false;
            let mut new_extents = Vec::with_capacity(extents.len());
            for e in extents {
                let new = mutator.mutate_expr(e)?;
                changed |= !new.ptr_eq(e);
                new_extents.push(new);
            }
            let new_body = mutator.mutate_stmt(body)?;
            changed |= !new_body.ptr_eq(body);
            if changed {
                Ok(Stmt::allocate(name.clone(), *ty, new_extents, new_body))
            } else {
                Ok(stmt.clone())
            }
        }

        StmtKind::Free { .. } => Ok(stmt.clone()),

        StmtKind::Realize {
            name,
            types,
            bounds,
            body,
        } => {
            let mut changed = false;
            let mut new_bounds = Vec::with_capacity(bounds.len());
            for b in bounds {
                let new_min = mutator.mutate_expr(&b.min)?;
                let new_extent = mutator.mutate_expr(&b.extent)?;
                changed |= !new_min.ptr_eq(&b.min) || !new_extent.ptr_eq(&b.extent);
                new_bounds.push(Range::new(new_min, new_extent));
            }
            let new_body = mutator.mutate_stmt(body)?;
            changed |= !new_body.ptr_eq(body);
            if changed {
                Ok(Stmt::realize(name.clone(), types.clone(), new_bounds, new_body))
            } else {
                Ok(stmt.clone())
            }
        }

        StmtKind::Block { first, rest } => {
            let new_first = mutator.mutate_stmt(first)?;
            let new_rest = mutator.mutate_stmt(rest)?;
            if new_first.ptr_eq(first) && new_rest.ptr_eq(rest) {
                Ok(stmt.clone())
            } else {
                Ok(Stmt::block(new_first, new_rest))
            }
        }

        StmtKind::IfThenElse {
            condition,
            then_case,
            else_case,
        } => {
            let new_c = mutator.mutate_expr(condition)?;
            let new_t = mutator.mutate_stmt(then_case)?;
            let new_e = match else_case {
                Some(e) => Some(mutator.mutate_stmt(e)?),
                None => None,
            };
            let unchanged = new_c.ptr_eq(condition)
                && new_t.ptr_eq(then_case)
                && match (&new_e, else_case) {
                    (Some(a), Some(b)) => a.ptr_eq(b),
                    (None, None) => true,
                    _ => false,
                };
            if unchanged {
                Ok(stmt.clone())
            } else {
                Stmt::if_then_else(new_c, new_t, new_e)
            }
        }

        StmtKind::Evaluate(expr) => {
            let new = mutator.mutate_expr(expr)?;
            if new.ptr_eq(expr) {
                Ok(stmt.clone())
            } else {
                Ok(Stmt::evaluate(new))
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::{Name, Type};

    /// Mutator that renames one variable.
    struct Rename {
        from: Name,
        to: Name,
    }

    impl Mutator for Rename {
        fn mutate_expr(&mut self, expr: &Expr) -> CompileResult<Expr> {
            if let ExprKind::Var(name) = expr.kind() {
                if *name == self.from {
                    return Ok(Expr::var_of(expr.ty(), self.to.clone()));
                }
            }
            mutate_expr_children(self, expr)
        }
    }

    /// Mutator that changes nothing.
    struct Identity;

    impl Mutator for Identity {}

    #[test]
    fn unchanged_tree_preserves_identity() {
        let e = (Expr::var("x") + Expr::var("y")) * Expr::int(3);
        let out = Identity.mutate_expr(&e).unwrap();
        assert!(out.ptr_eq(&e));
    }

    #[test]
    fn unchanged_stmt_preserves_identity() {
        let s = Stmt::serial_for(
            "x",
            Expr::int(0),
            Expr::int(10),
            Stmt::store("out", Expr::var("x"), Expr::var("x")).unwrap(),
        )
        .unwrap();
        let out = Identity.mutate_stmt(&s).unwrap();
        assert!(out.ptr_eq(&s));
    }

    #[test]
    fn rename_rebuilds_only_the_spine() {
        let shared = Expr::var("y") * 2;
        let e = Expr::var("x") + shared.clone();
        let mut rename = Rename {
            from: Name::new("x"),
            to: Name::new("z"),
        };
        let out = rename.mutate_expr(&e).unwrap();
        assert!(!out.ptr_eq(&e));
        // The untouched operand keeps its identity.
        match out.kind() {
            ExprKind::Binary { b, .. } => assert!(b.ptr_eq(&shared)),
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn load_widens_with_vector_index() {
        struct VectorizeVar {
            name: Name,
        }
        impl Mutator for VectorizeVar {
            fn mutate_expr(&mut self, expr: &Expr) -> CompileResult<Expr> {
                if let ExprKind::Var(name) = expr.kind() {
                    if *name == self.name {
                        return Expr::ramp(expr.clone(), Expr::int(1), 4);
                    }
                }
                mutate_expr_children(self, expr)
            }
        }

        let load = Expr::load(Type::uint(16), "input", Expr::var("x")).unwrap();
        let mut v = VectorizeVar { name: Name::new("x") };
        let out = v.mutate_expr(&load).unwrap();
        assert_eq!(out.ty(), Type::uint(16).with_lanes(4));
    }
}
