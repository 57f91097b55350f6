//! Function inlining.
//!
//! A producer scheduled `Inline` never materializes: every call to it is
//! replaced by its definition with the formal arguments substituted by the
//! actual coordinate expressions. Substitution runs to a fixed point
//! through chains of inline producers; the realization passes then only
//! see materialized functions.
//!
//! A function with update definitions cannot be inlined; its stages have
//! ordering the call site cannot express.

use rustc_hash::FxHashMap;
use weft_diagnostic::{CompileError, CompileResult};
use weft_func::{Func, Level};
use weft_ir::{mutate_expr_children, CallKind, Expr, ExprKind, Mutator, Name, substitute};

use crate::env::PipelineEnv;

struct InlineCalls<'a> {
    inlined: &'a FxHashMap<Name, Func>,
}

impl Mutator for InlineCalls<'_> {
    fn mutate_expr(&mut self, expr: &Expr) -> CompileResult<Expr> {
        if let ExprKind::Call {
            name,
            args,
            kind: CallKind::Func,
            value_index,
        } = expr.kind()
        {
            if let Some(func) = self.inlined.get(name) {
                // Inline producers may call other inline producers.
                let mut body = self.mutate_expr(&func.values()[*value_index])?;
                // Rename formals to fresh temporaries before binding the
                // actual coordinates, so an actual that mentions another
                // formal's name (as in `f(y, x)`) is not captured.
                let temps: Vec<Name> = func
                    .args()
                    .iter()
                    .map(|f| name.dotted(f.as_str()).with_suffix("$inl"))
                    .collect();
                for (formal, temp) in func.args().iter().zip(&temps) {
                    body = substitute(formal, &Expr::var(temp.clone()), &body)?;
                }
                for (temp, actual) in temps.iter().zip(args) {
                    let actual = self.mutate_expr(actual)?;
                    body = substitute(temp, &actual, &body)?;
                }
                return Ok(body);
            }
        }
        mutate_expr_children(self, expr)
    }
}

/// Substitute all inline producers away, returning the reduced
/// environment of materialized functions.
pub fn inline_pass(env: &PipelineEnv) -> CompileResult<PipelineEnv> {
    let mut inlined: FxHashMap<Name, Func> = FxHashMap::default();
    for (name, func) in &env.funcs {
        if *name == env.output {
            continue;
        }
        if *func.schedule().compute_level() == Level::Inline {
            if !func.updates().is_empty() {
                return Err(CompileError::schedule(
                    name.as_str(),
                    "a function with update definitions cannot be inlined",
                ));
            }
            inlined.insert(name.clone(), func.clone());
        }
    }

    let mut mutator = InlineCalls { inlined: &inlined };
    let mut funcs = FxHashMap::default();
    for (name, func) in &env.funcs {
        if inlined.contains_key(name) {
            continue;
        }
        let mut rewritten = func.clone();
        rewritten.map_definitions(|e| mutator.mutate_expr(e))?;
        funcs.insert(name.clone(), rewritten);
    }

    Ok(PipelineEnv {
        funcs,
        images: env.images.clone(),
        scalar_params: env.scalar_params.clone(),
        output: env.output.clone(),
    })
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use weft_func::{ImageParam, Var};
    use weft_ir::Type;

    #[test]
    fn inline_producer_disappears() {
        let x = Var::new("x");
        let input = ImageParam::new(Type::int32(), 1, "in");

        let mut g = Func::new("g");
        g.define(&[x.clone()], vec![input.at([x.expr()]) * 2]).unwrap();
        g.compute_inline();

        let mut f = Func::new("f");
        f.define(&[x.clone()], vec![g.at([x.expr() + 1]) + 1]).unwrap();

        let mut funcs = FxHashMap::default();
        funcs.insert(g.name().clone(), g);
        funcs.insert(f.name().clone(), f);
        let mut images = FxHashMap::default();
        images.insert(Name::new("in"), input);
        let env = PipelineEnv {
            funcs,
            images,
            scalar_params: FxHashMap::default(),
            output: Name::new("f"),
        };

        let reduced = inline_pass(&env).unwrap();
        assert!(!reduced.funcs.contains_key(&Name::new("g")));
        let f = &reduced.funcs[&Name::new("f")];
        // f(x) = in(x+1)*2 + 1 after substitution.
        assert_eq!(f.values()[0].to_string(), "((in((x + 1)) * 2) + 1)");
    }

    #[test]
    fn inlining_a_reduction_is_rejected() {
        let x = Var::new("x");
        let mut g = Func::new("g");
        g.define(&[x.clone()], vec![Expr::int(0)]).unwrap();
        let r = weft_func::RDom::over("r", Expr::int(0), Expr::int(4)).unwrap();
        let rhs = g.at([x.expr()]) + r.x().expr();
        g.update(vec![x.expr()], vec![rhs], Some(&r)).unwrap();
        g.compute_inline();

        let mut f = Func::new("f");
        f.define(&[x.clone()], vec![g.at([x.expr()])]).unwrap();

        let mut funcs = FxHashMap::default();
        funcs.insert(g.name().clone(), g);
        funcs.insert(f.name().clone(), f);
        let env = PipelineEnv {
            funcs,
            images: FxHashMap::default(),
            scalar_params: FxHashMap::default(),
            output: Name::new("f"),
        };

        assert!(inline_pass(&env).is_err());
    }
}
