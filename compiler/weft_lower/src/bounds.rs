//! Bounds inference.
//!
//! A backward pass over the realization tree: for every `Realize`, the
//! interval of each of the function's coordinates demanded by its
//! transitive consumers is computed by interval arithmetic over the
//! enclosing loop scopes. Two regions matter per function:
//!
//! - at the **store site** (the `Realize` itself): the union over all
//!   iterations of the loops between store and compute level, which sizes
//!   the allocation, and its endpoints stay symbolic in loop variables
//!   bound outside the `Realize`;
//! - at the **compute site**: the region demanded per iteration of the
//!   compute loop, bound to the `<func>.<dim>.min` / `.extent` variables
//!   the production nest loops over, via `LetStmt`s wrapped around it.
//!
//! Walks into a function's own production loops are skipped when
//! collecting its demand; a function never demands itself.

use weft_diagnostic::{CompileError, CompileResult};
use weft_func::Func;
use weft_ir::{
    mutate_stmt_children, BinOp, CallKind, Expr, ExprKind, Mutator, Name, Range, Stmt, StmtKind,
};

use crate::env::PipelineEnv;
use crate::inject::SiteTable;
use crate::interval::{bounds_of_expr, Interval, Scope};

/// Run bounds inference over the whole tree.
pub fn infer_bounds(env: &PipelineEnv, sites: &SiteTable, stmt: &Stmt) -> CompileResult<Stmt> {
    let mut pass = BoundsInference { env, sites };
    pass.mutate_stmt(stmt)
}

struct BoundsInference<'a> {
    env: &'a PipelineEnv,
    sites: &'a SiteTable,
}

impl Mutator for BoundsInference<'_> {
    fn mutate_stmt(&mut self, stmt: &Stmt) -> CompileResult<Stmt> {
        if let StmtKind::Realize {
            name, types, body, ..
        } = stmt.kind()
        {
            let func = self.env.funcs.get(name).ok_or_else(|| {
                CompileError::bounds(
                    format!("realization of unknown function `{name}`"),
                    name.to_string(),
                )
            })?;

            // Region demanded over the whole lifetime of the allocation.
            let store_region = demanded_region(name, func, body)?;
            let mut new_bounds = Vec::with_capacity(store_region.len());
            for interval in &store_region {
                new_bounds.push(Range::new(interval.min.clone(), interval.extent()?));
            }
            tracing::debug!(func = %name, bounds = ?new_bounds, "inferred realize bounds");

            // Region demanded per iteration of the compute loop, bound
            // around the production nest.
            let site = self.sites.get(name).cloned().flatten();
            let new_body = bind_production_bounds(name, func, site.as_ref(), body)?;

            let node = Stmt::realize(name.clone(), types.clone(), new_bounds, new_body);
            return mutate_stmt_children(self, &node);
        }
        mutate_stmt_children(self, stmt)
    }
}

/// Collect the union of coordinate intervals demanded of `func` within
/// `stmt`, skipping the function's own production loops, then apply any
/// explicit bound overrides.
fn demanded_region(name: &Name, func: &Func, stmt: &Stmt) -> CompileResult<Vec<Interval>> {
    let mut collector = DemandCollector {
        func: name,
        prefix: format!("{name}."),
        scope: Scope::new(),
        region: None,
    };
    collector.collect_stmt(stmt)?;
    let mut region = collector.region.ok_or_else(|| {
        CompileError::bounds(
            format!("`{name}` is realized but never read in scope"),
            name.to_string(),
        )
    })?;

    for b in func.schedule().bounds() {
        if let Some(index) = func.args().iter().position(|a| *a == b.var) {
            let max = Expr::binary(
                BinOp::Sub,
                Expr::binary(BinOp::Add, b.min.clone(), b.extent.clone())?,
                Expr::int(1),
            )?;
            region[index] = Interval::new(b.min.clone(), max);
        }
    }
    Ok(region)
}

struct DemandCollector<'a> {
    func: &'a Name,
    prefix: String,
    scope: Scope,
    region: Option<Vec<Interval>>,
}

impl DemandCollector<'_> {
    fn collect_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt.kind() {
            StmtKind::LetStmt { name, value, body } => {
                self.collect_expr(value)?;
                let interval = bounds_of_expr(value, &self.scope).ok();
                let prev = interval.and_then(|i| self.scope.push(name.clone(), i));
                self.collect_stmt(body)?;
                self.scope.pop(name, prev);
                Ok(())
            }
            StmtKind::For {
                name,
                min,
                extent,
                body,
                ..
            } => {
                if name.as_str().starts_with(&self.prefix) {
                    // The function's own production; no self-demand.
                    return Ok(());
                }
                self.collect_expr(min)?;
                self.collect_expr(extent)?;
                let last = Expr::binary(
                    BinOp::Sub,
                    Expr::binary(BinOp::Add, min.clone(), extent.clone())?,
                    Expr::int(1),
                )?;
                let lo = bounds_of_expr(min, &self.scope)?;
                let hi = bounds_of_expr(&last, &self.scope)?;
                let prev = self.scope.push(name.clone(), Interval::new(lo.min, hi.max));
                self.collect_stmt(body)?;
                self.scope.pop(name, prev);
                Ok(())
            }
            StmtKind::AssertStmt { condition, .. } => self.collect_expr(condition),
            StmtKind::Store { index, value, .. } => {
                self.collect_expr(index)?;
                self.collect_expr(value)
            }
            StmtKind::Provide { values, args, .. } => {
                for v in values {
                    self.collect_expr(v)?;
                }
                for a in args {
                    self.collect_expr(a)?;
                }
                Ok(())
            }
            StmtKind::Allocate { extents, body, .. } => {
                for e in extents {
                    self.collect_expr(e)?;
                }
                self.collect_stmt(body)
            }
            StmtKind::Free { .. } => Ok(()),
            StmtKind::Realize { bounds, body, .. } => {
                for b in bounds {
                    self.collect_expr(&b.min)?;
                    self.collect_expr(&b.extent)?;
                }
                self.collect_stmt(body)
            }
            StmtKind::Block { first, rest } => {
                self.collect_stmt(first)?;
                self.collect_stmt(rest)
            }
            StmtKind::IfThenElse {
                condition,
                then_case,
                else_case,
            } => {
                self.collect_expr(condition)?;
                self.collect_stmt(then_case)?;
                if let Some(e) = else_case {
                    self.collect_stmt(e)?;
                }
                Ok(())
            }
            StmtKind::Evaluate(expr) => self.collect_expr(expr),
        }
    }

    fn collect_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        if let ExprKind::Call {
            name,
            args,
            kind: CallKind::Func,
            ..
        } = expr.kind()
        {
            if name == self.func {
                let mut intervals = Vec::with_capacity(args.len());
                for arg in args {
                    intervals.push(bounds_of_expr(arg, &self.scope)?);
                }
                self.region = Some(match self.region.take() {
                    None => intervals,
                    Some(current) => {
                        let mut merged = Vec::with_capacity(current.len());
                        for (a, b) in current.into_iter().zip(intervals) {
                            merged.push(a.union(b)?);
                        }
                        merged
                    }
                });
                return Ok(());
            }
        }
        if let ExprKind::Let { name, value, body } = expr.kind() {
            self.collect_expr(value)?;
            let interval = bounds_of_expr(value, &self.scope).ok();
            let prev = interval.and_then(|i| self.scope.push(name.clone(), i));
            self.collect_expr(body)?;
            self.scope.pop(name, prev);
            return Ok(());
        }
        // Recurse into children looking for more call sites.
        let mut result = Ok(());
        weft_ir::visit::walk_expr(
            &mut CollectShim {
                collector: self,
                result: &mut result,
            },
            expr,
        );
        result
    }
}

/// Adapter so the infallible visitor walk can drive the fallible
/// collector; the first error wins and later sites are ignored.
struct CollectShim<'a, 'b> {
    collector: &'a mut DemandCollector<'b>,
    result: &'a mut CompileResult<()>,
}

impl weft_ir::Visitor for CollectShim<'_, '_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if self.result.is_err() {
            return;
        }
        *self.result = self.collector.collect_expr(expr);
    }
}

/// Wrap the production nest at the compute site with `LetStmt`s binding
/// the `<func>.<dim>.min` / `.extent` variables its loops reference.
fn bind_production_bounds(
    name: &Name,
    func: &Func,
    site: Option<&Name>,
    body: &Stmt,
) -> CompileResult<Stmt> {
    match site {
        None => wrap_first_of_block(name, func, body),
        Some(loop_name) => {
            let mut wrapper = WrapAtComputeLoop {
                func_name: name,
                func,
                target: loop_name,
                found: false,
            };
            let out = wrapper.mutate_stmt(body)?;
            if !wrapper.found {
                return Err(CompileError::bounds(
                    format!("compute site `{loop_name}` of `{name}` disappeared before bounds inference"),
                    name.to_string(),
                ));
            }
            Ok(out)
        }
    }
}

fn wrap_first_of_block(name: &Name, func: &Func, body: &Stmt) -> CompileResult<Stmt> {
    let StmtKind::Block { first, rest } = body.kind() else {
        return Err(CompileError::bounds(
            format!("realization of `{name}` has no consumer block"),
            name.to_string(),
        ));
    };
    let region = demanded_region(name, func, rest)?;
    let wrapped = lets_around(name, func, &region, first)?;
    Ok(Stmt::block(wrapped, rest.clone()))
}

struct WrapAtComputeLoop<'a> {
    func_name: &'a Name,
    func: &'a Func,
    target: &'a Name,
    found: bool,
}

impl Mutator for WrapAtComputeLoop<'_> {
    fn mutate_stmt(&mut self, stmt: &Stmt) -> CompileResult<Stmt> {
        if let StmtKind::For {
            name,
            min,
            extent,
            for_type,
            device,
            body,
        } = stmt.kind()
        {
            if name == self.target {
                self.found = true;
                let new_body = wrap_first_of_block(self.func_name, self.func, body)?;
                return Stmt::for_loop(
                    name.clone(),
                    min.clone(),
                    extent.clone(),
                    *for_type,
                    *device,
                    new_body,
                );
            }
        }
        mutate_stmt_children(self, stmt)
    }
}

fn lets_around(
    name: &Name,
    func: &Func,
    region: &[Interval],
    nest: &Stmt,
) -> CompileResult<Stmt> {
    if region.len() != func.args().len() {
        return Err(CompileError::bounds(
            format!(
                "`{name}` has {} dimensions but its demand has {}",
                func.args().len(),
                region.len()
            ),
            name.to_string(),
        ));
    }
    let mut out = nest.clone();
    for (arg, interval) in func.args().iter().zip(region).rev() {
        let base = name.dotted(arg.as_str());
        out = Stmt::let_stmt(base.dotted("extent"), interval.extent()?, out);
        out = Stmt::let_stmt(base.dotted("min"), interval.min.clone(), out);
    }
    Ok(out)
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;
    use weft_func::{ImageParam, Var};
    use weft_ir::Type;

    use crate::inject::build_and_inject;

    fn blur_env(schedule: impl FnOnce(&mut Func, &Func)) -> PipelineEnv {
        let (x, y) = (Var::new("x"), Var::new("y"));
        let input = ImageParam::new(Type::uint(16), 2, "input");

        let mut blur_x = Func::new("blur_x");
        blur_x
            .define(
                &[x.clone(), y.clone()],
                vec![
                    (input.at([x.expr() - 1, y.expr()])
                        + input.at([x.expr(), y.expr()])
                        + input.at([x.expr() + 1, y.expr()]))
                        / 3,
                ],
            )
            .unwrap();

        let mut blur_y = Func::new("blur_y");
        blur_y
            .define(
                &[x.clone(), y.clone()],
                vec![
                    (blur_x.at([x.expr(), y.expr() - 1])
                        + blur_x.at([x.expr(), y.expr()])
                        + blur_x.at([x.expr(), y.expr() + 1]))
                        / 3,
                ],
            )
            .unwrap();
        blur_y.bound(&Var::new("x"), 0, 64);
        blur_y.bound(&Var::new("y"), 0, 16);

        schedule(&mut blur_x, &blur_y);

        let mut funcs = FxHashMap::default();
        funcs.insert(blur_x.name().clone(), blur_x);
        funcs.insert(blur_y.name().clone(), blur_y);
        let mut images = FxHashMap::default();
        images.insert(Name::new("input"), input);
        PipelineEnv {
            funcs,
            images,
            scalar_params: FxHashMap::default(),
            output: Name::new("blur_y"),
        }
    }

    #[test]
    fn root_producer_gets_the_full_stencil_footprint() {
        let env = blur_env(|bx, _| {
            bx.compute_root();
        });
        let (stmt, sites) = build_and_inject(&env).unwrap();
        let stmt = infer_bounds(&env, &sites, &stmt).unwrap();
        let printed = stmt.to_string();
        // y demanded over [-1, 16]: extent 18.
        assert!(
            printed.contains("realize blur_x([0, 64), [-1, 18))"),
            "{printed}"
        );
        assert!(printed.contains("let blur_x.y.min = -1"), "{printed}");
        assert!(printed.contains("let blur_x.y.extent = 18"), "{printed}");
    }

    #[test]
    fn compute_at_bounds_are_per_iteration() {
        let env = blur_env(|bx, by| {
            bx.compute_at(by, &Var::new("y"));
        });
        let (stmt, sites) = build_and_inject(&env).unwrap();
        let stmt = infer_bounds(&env, &sites, &stmt).unwrap();
        let printed = stmt.to_string();
        // Inside the y loop, the demand is rows [y-1, y+1]: extent 3,
        // min symbolic in the consumer's loop variable.
        assert!(printed.contains("let blur_x.y.extent = 3"), "{printed}");
        assert!(
            printed.contains("let blur_x.y.min = (blur_y.y + -1)"),
            "{printed}"
        );
    }

    #[test]
    fn unread_realization_is_an_error() {
        let env = blur_env(|bx, _| {
            bx.compute_root();
        });
        let (stmt, mut sites) = build_and_inject(&env).unwrap();
        // Sever the consumer by asking bounds for a function that the
        // tree never calls.
        let mut bogus = Func::new("ghost");
        bogus.define(&[Var::new("x")], vec![Expr::int(0)]).unwrap();
        let mut env2 = env.clone();
        env2.funcs.insert(Name::new("ghost"), bogus);
        sites.insert(Name::new("ghost"), None);
        let ghost_realize = Stmt::realize(
            "ghost",
            vec![Type::int32()],
            vec![Range::new(Expr::var("ghost.x.min"), Expr::var("ghost.x.extent"))],
            Stmt::block(Stmt::evaluate(Expr::int(0)), stmt),
        );
        assert!(infer_bounds(&env2, &sites, &ghost_realize).is_err());
    }
}
