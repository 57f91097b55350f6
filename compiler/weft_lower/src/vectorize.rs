//! Loop vectorization.
//!
//! A `For` marked `Vectorized` with constant extent `w` is replaced by a
//! single iteration of width-`w` IR: the loop variable becomes
//! `Ramp(min, 1, w)`, scalar operations broadcast as the rebuilt nodes
//! promote, and loads and stores widen with their indices. A `LetStmt`
//! whose value vectorizes widens every reference to it.
//!
//! Vectorizing a loop of non-constant extent, or a body containing
//! control flow that would need a vector condition, is a target error;
//! the schedule should have used a tail strategy that keeps the
//! vector body dense.

use rustc_hash::FxHashMap;
use weft_diagnostic::{CompileError, CompileResult};
use weft_ir::{
    mutate_expr_children, mutate_stmt_children, Expr, ExprKind, ForType, Mutator, Name, Stmt,
    StmtKind,
};

/// Vectorize every `Vectorized` loop in the tree.
pub fn vectorize_loops(stmt: &Stmt) -> CompileResult<Stmt> {
    let mut pass = FindVectorLoops;
    pass.mutate_stmt(stmt)
}

struct FindVectorLoops;

impl Mutator for FindVectorLoops {
    fn mutate_stmt(&mut self, stmt: &Stmt) -> CompileResult<Stmt> {
        if let StmtKind::For {
            name,
            min,
            extent,
            for_type: ForType::Vectorized,
            body,
            ..
        } = stmt.kind()
        {
            let Some(lanes) = extent.as_const_int() else {
                return Err(CompileError::unsupported(format!(
                    "vectorized loop `{name}` has non-constant extent {extent}"
                )));
            };
            let lanes = u16::try_from(lanes).map_err(|_| {
                CompileError::unsupported(format!(
                    "vectorized loop `{name}` has extent {extent}, beyond vector width"
                ))
            })?;
            if lanes < 2 {
                // A one-lane vector loop is just a serial iteration.
                let body = self.mutate_stmt(body)?;
                return weft_ir::substitute_in_stmt(name, min, &body);
            }
            // Vectorize inner loops first, innermost out.
            let body = self.mutate_stmt(body)?;
            let ramp = Expr::ramp(min.clone(), Expr::int(1), lanes)?;
            let mut v = VectorizeBody {
                var: name.clone(),
                ramp,
                widened: FxHashMap::default(),
            };
            return v.mutate_stmt(&body);
        }
        mutate_stmt_children(self, stmt)
    }
}

struct VectorizeBody {
    var: Name,
    ramp: Expr,
    /// Let bindings whose value became a vector, and its lane count.
    widened: FxHashMap<Name, u16>,
}

impl Mutator for VectorizeBody {
    fn mutate_expr(&mut self, expr: &Expr) -> CompileResult<Expr> {
        if let ExprKind::Var(name) = expr.kind() {
            if *name == self.var {
                return Ok(self.ramp.clone());
            }
            if let Some(lanes) = self.widened.get(name) {
                return Ok(Expr::var_of(expr.ty().with_lanes(*lanes), name.clone()));
            }
            return Ok(expr.clone());
        }
        mutate_expr_children(self, expr)
    }

    fn mutate_stmt(&mut self, stmt: &Stmt) -> CompileResult<Stmt> {
        match stmt.kind() {
            StmtKind::LetStmt { name, value, body } => {
                let new_value = self.mutate_expr(value)?;
                let previous = if new_value.ty().is_vector() {
                    self.widened.insert(name.clone(), new_value.ty().lanes)
                } else {
                    self.widened.remove(name)
                };
                let new_body = self.mutate_stmt(body)?;
                match previous {
                    Some(lanes) => {
                        self.widened.insert(name.clone(), lanes);
                    }
                    None => {
                        self.widened.remove(name);
                    }
                }
                Ok(Stmt::let_stmt(name.clone(), new_value, new_body))
            }
            StmtKind::IfThenElse { condition, .. } => {
                let new_cond = self.mutate_expr(condition)?;
                if new_cond.ty().is_vector() {
                    return Err(CompileError::unsupported(format!(
                        "vectorizing loop `{}` would need a vector branch condition {new_cond}",
                        self.var
                    )));
                }
                mutate_stmt_children(self, stmt)
            }
            StmtKind::For { name, .. } if *name == self.var => Err(CompileError::unsupported(
                format!("nested loop shadows vectorized variable `{name}`"),
            )),
            _ => mutate_stmt_children(self, stmt),
        }
    }
}
