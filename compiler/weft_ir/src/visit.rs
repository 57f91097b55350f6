//! IR visitor.
//!
//! Read-only traversal over expression and statement trees. Override the
//! `visit_*` methods to add behavior at specific nodes and call the
//! matching `walk_*` function to continue into children. The visitor can
//! mutate its own state; the IR remains immutable.
//!
//! Children are walked depth-first, left to right.

use crate::{Expr, ExprKind, Stmt, StmtKind};

/// IR visitor trait.
pub trait Visitor {
    /// Visit an expression.
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    /// Visit a statement.
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }
}

/// Walk an expression's children.
pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match expr.kind() {
        // Leaves
        ExprKind::IntImm(_)
        | ExprKind::UIntImm(_)
        | ExprKind::FloatImm(_)
        | ExprKind::StringImm(_)
        | ExprKind::Var(_) => {}

        ExprKind::Cast(value) | ExprKind::Not(value) => {
            visitor.visit_expr(value);
        }

        ExprKind::Binary { a, b, .. }
        | ExprKind::Cmp { a, b, .. }
        | ExprKind::And { a, b }
        | ExprKind::Or { a, b } => {
            visitor.visit_expr(a);
            visitor.visit_expr(b);
        }

        ExprKind::Select {
            condition,
            true_value,
            false_value,
        } => {
            visitor.visit_expr(condition);
            visitor.visit_expr(true_value);
            visitor.visit_expr(false_value);
        }

        ExprKind::Load { index, .. } => {
            visitor.visit_expr(index);
        }

        ExprKind::Ramp { base, stride, .. } => {
            visitor.visit_expr(base);
            visitor.visit_expr(stride);
        }

        ExprKind::Broadcast { value, .. } => {
            visitor.visit_expr(value);
        }

        ExprKind::Let { value, body, .. } => {
            visitor.visit_expr(value);
            visitor.visit_expr(body);
        }

        ExprKind::Call { args, .. } => {
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
    }
}

/// Walk a statement's children.
pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match stmt.kind() {
        StmtKind::LetStmt { value, body, .. } => {
            visitor.visit_expr(value);
            visitor.visit_stmt(body);
        }
        StmtKind::AssertStmt { condition, .. } => {
            visitor.visit_expr(condition);
        }
        StmtKind::For {
            min, extent, body, ..
        } => {
            visitor.visit_expr(min);
            visitor.visit_expr(extent);
            visitor.visit_stmt(body);
        }
        StmtKind::Store { index, value, .. } => {
            visitor.visit_expr(index);
            visitor.visit_expr(value);
        }
        StmtKind::Provide { values, args, .. } => {
            for v in values {
                visitor.visit_expr(v);
            }
            for a in args {
                visitor.visit_expr(a);
            }
        }
        StmtKind::Allocate { extents, body, .. } => {
            for e in extents {
                visitor.visit_expr(e);
            }
            visitor.visit_stmt(body);
        }
        StmtKind::Free { .. } => {}
        StmtKind::Realize { bounds, body, .. } => {
            for b in bounds {
                visitor.visit_expr(&b.min);
                visitor.visit_expr(&b.extent);
            }
            visitor.visit_stmt(body);
        }
        StmtKind::Block { first, rest } => {
            visitor.visit_stmt(first);
            visitor.visit_stmt(rest);
        }
        StmtKind::IfThenElse {
            condition,
            then_case,
            else_case,
        } => {
            visitor.visit_expr(condition);
            visitor.visit_stmt(then_case);
            if let Some(else_case) = else_case {
                visitor.visit_stmt(else_case);
            }
        }
        StmtKind::Evaluate(expr) => {
            visitor.visit_expr(expr);
        }
    }
}
