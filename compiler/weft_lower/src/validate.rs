//! Binding-closure validation.
//!
//! After lowering, every `Var` in the output tree must be bound by an
//! enclosing `For`, `Let`, or `LetStmt`, or be a declared parameter: a
//! scalar parameter of the pipeline, or a field of a buffer argument's
//! descriptor (`name.min.0`, `name.stride.1`, `name.extent.2`,
//! `name.elem_size`, `name.device_dirty`, `name.buffer`). Anything else
//! is a compiler bug surfaced as `UnboundVariable` rather than silently
//! handed to the code generator.

use rustc_hash::FxHashMap;
use weft_diagnostic::{CompileError, CompileResult};
use weft_ir::{walk_expr, walk_stmt, Expr, ExprKind, Name, Stmt, StmtKind, Visitor};

use crate::asserts::buffer_args;
use crate::env::PipelineEnv;

/// Check that the lowered tree is closed over its bindings.
pub fn check_binding_closure(env: &PipelineEnv, stmt: &Stmt) -> CompileResult<()> {
    let buffer_names: Vec<String> = buffer_args(env)
        .into_iter()
        .map(|(name, _, _)| name.to_string())
        .chain(env.images.keys().map(ToString::to_string))
        .collect();

    let mut check = Check {
        env,
        buffer_names,
        bound: FxHashMap::default(),
        error: None,
    };
    check.visit_stmt(stmt);
    match check.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

struct Check<'a> {
    env: &'a PipelineEnv,
    buffer_names: Vec<String>,
    bound: FxHashMap<Name, usize>,
    error: Option<CompileError>,
}

impl Check<'_> {
    fn push(&mut self, name: &Name) {
        *self.bound.entry(name.clone()).or_insert(0) += 1;
    }

    fn pop(&mut self, name: &Name) {
        if let Some(count) = self.bound.get_mut(name) {
            *count -= 1;
            if *count == 0 {
                self.bound.remove(name);
            }
        }
    }

    fn is_parameter(&self, name: &Name) -> bool {
        if self.env.scalar_params.contains_key(name) {
            return true;
        }
        let s = name.as_str();
        self.buffer_names.iter().any(|b| {
            s.strip_prefix(b.as_str())
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|field| {
                    field == "elem_size"
                        || field == "device_dirty"
                        || field == "buffer"
                        || ["min.", "extent.", "stride."].iter().any(|prefix| {
                            field
                                .strip_prefix(prefix)
                                .is_some_and(|d| d.parse::<u8>().is_ok())
                        })
                })
        })
    }
}

impl Visitor for Check<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if self.error.is_some() {
            return;
        }
        match expr.kind() {
            ExprKind::Var(name) => {
                if !self.bound.contains_key(name) && !self.is_parameter(name) {
                    self.error = Some(CompileError::unbound(name.as_str(), expr.to_string()));
                }
            }
            ExprKind::Let { name, value, body } => {
                self.visit_expr(value);
                self.push(name);
                self.visit_expr(body);
                self.pop(name);
            }
            _ => walk_expr(self, expr),
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        if self.error.is_some() {
            return;
        }
        match stmt.kind() {
            StmtKind::LetStmt { name, value, body } => {
                self.visit_expr(value);
                self.push(name);
                self.visit_stmt(body);
                self.pop(name);
            }
            StmtKind::For {
                name,
                min,
                extent,
                body,
                ..
            } => {
                self.visit_expr(min);
                self.visit_expr(extent);
                self.push(name);
                self.visit_stmt(body);
                self.pop(name);
            }
            _ => walk_stmt(self, stmt),
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use weft_func::{Func, Var};
    use weft_ir::Type;

    fn empty_env() -> PipelineEnv {
        let mut out = Func::new("out");
        out.define(&[Var::new("x")], vec![Expr::int(0)]).unwrap();
        let mut funcs = FxHashMap::default();
        funcs.insert(out.name().clone(), out);
        PipelineEnv {
            funcs,
            images: FxHashMap::default(),
            scalar_params: FxHashMap::default(),
            output: Name::new("out"),
        }
    }

    #[test]
    fn loop_and_let_bindings_close() {
        let env = empty_env();
        let body = Stmt::let_stmt(
            "t",
            Expr::var("i") * 2,
            Stmt::store("out", Expr::var("i"), Expr::var_of(Type::int32(), "t")).unwrap(),
        );
        let stmt = Stmt::serial_for("i", Expr::int(0), Expr::int(4), body).unwrap();
        assert!(check_binding_closure(&env, &stmt).is_ok());
    }

    #[test]
    fn buffer_descriptor_fields_are_parameters() {
        let env = empty_env();
        let stmt = Stmt::serial_for(
            "i",
            Expr::var("out.min.0"),
            Expr::var("out.extent.0"),
            Stmt::store("out", Expr::var("i"), Expr::var("i")).unwrap(),
        )
        .unwrap();
        assert!(check_binding_closure(&env, &stmt).is_ok());
    }

    #[test]
    fn stray_variables_are_reported() {
        let env = empty_env();
        let stmt = Stmt::store("out", Expr::var("ghost"), Expr::int(1)).unwrap();
        let err = check_binding_closure(&env, &stmt).unwrap_err();
        assert!(matches!(err, CompileError::UnboundVariable { .. }));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn bindings_do_not_leak_out_of_scope() {
        let env = empty_env();
        let inner = Stmt::serial_for(
            "i",
            Expr::int(0),
            Expr::int(4),
            Stmt::store("out", Expr::var("i"), Expr::var("i")).unwrap(),
        )
        .unwrap();
        // A second use of `i` outside the loop is unbound.
        let stmt = Stmt::block(inner, Stmt::store("out", Expr::var("i"), Expr::int(0)).unwrap());
        assert!(check_binding_closure(&env, &stmt).is_err());
    }
}
