//! Scheduled loop-nest construction.
//!
//! Builds, for one function, the `For` nest over its pure variables with a
//! `Provide` at the innermost level, then applies the function's schedule:
//! splits and fusions rewrite dimensions (with the selected tail policy),
//! and each final dimension carries its `for_type` and device from the
//! schedule. Update stages become additional nests sequenced after the
//! pure stage, reduction loops outside the pure loops, first reduction
//! dimension innermost.
//!
//! Loop variables are qualified with the function name (`blur_y.xo`), so
//! later passes can attribute any loop to its function by prefix. Where a
//! split consumed a dimension, the original coordinate is rebuilt from the
//! final loop variables and bound with a `LetStmt` when its qualified name
//! is still free, or substituted inline when the split reused the name for
//! the outer loop.

use rustc_hash::FxHashMap;
use weft_diagnostic::{CompileError, CompileResult};
use weft_func::{DimTransform, Func, TailStrategy};
use weft_ir::{substitute, BinOp, CmpOp, Expr, Name, Stmt};

/// Where a function's loop bounds come from.
pub enum BoundsSource {
    /// The pipeline output: bounds are the output buffer's descriptor
    /// parameters (`name.min.0`, `name.extent.0`, …).
    OutputBuffer,
    /// An internal producer: bounds are the symbolic `<func>.<dim>.min` /
    /// `.extent` variables that bounds inference binds at the compute
    /// site.
    Inferred,
}

/// The `(min, extent)` a pure dimension loops over, before splitting.
fn dim_bounds(func: &Func, source: &BoundsSource, arg: &Name, index: usize) -> (Expr, Expr) {
    for b in func.schedule().bounds() {
        if b.var == *arg {
            return (b.min.clone(), b.extent.clone());
        }
    }
    match source {
        BoundsSource::OutputBuffer => (
            Expr::var(func.name().dotted(&format!("min.{index}"))),
            Expr::var(func.name().dotted(&format!("extent.{index}"))),
        ),
        BoundsSource::Inferred => (
            Expr::var(func.name().dotted(arg.as_str()).dotted("min")),
            Expr::var(func.name().dotted(arg.as_str()).dotted("extent")),
        ),
    }
}

/// `(extent + factor - 1) / factor`, folded when exact.
fn ceil_div(extent: &Expr, factor: &Expr) -> CompileResult<Expr> {
    if let (Some(e), Some(f)) = (extent.as_const_int(), factor.as_const_int()) {
        if f > 0 && e % f == 0 {
            return Expr::imm(extent.ty(), e / f);
        }
    }
    let bumped = Expr::binary(
        BinOp::Add,
        extent.clone(),
        Expr::binary(BinOp::Sub, factor.clone(), Expr::int(1))?,
    )?;
    Expr::binary(BinOp::Div, bumped, factor.clone())
}

/// Is `extent` provably a multiple of `factor`?
fn divides_exactly(extent: &Expr, factor: &Expr) -> bool {
    match (extent.as_const_int(), factor.as_const_int()) {
        (Some(e), Some(f)) => f > 0 && e % f == 0,
        _ => false,
    }
}

struct AppliedTransform {
    transform: DimTransform,
    /// Bounds of the consumed dimension(s) at the time the transform
    /// applied, needed to rebuild the original coordinate.
    old_bounds: Vec<(Expr, Expr)>,
}

/// One stage's worth of loop construction state.
pub struct NestBuilder<'a> {
    func: &'a Func,
    source: BoundsSource,
    /// Final-dimension bounds after all transforms, keyed by dim name.
    final_bounds: FxHashMap<Name, (Expr, Expr)>,
    applied: Vec<AppliedTransform>,
}

impl<'a> NestBuilder<'a> {
    pub fn new(func: &'a Func, source: BoundsSource) -> CompileResult<NestBuilder<'a>> {
        let mut bounds: FxHashMap<Name, (Expr, Expr)> = FxHashMap::default();
        for (i, arg) in func.args().iter().enumerate() {
            bounds.insert(arg.clone(), dim_bounds(func, &source, arg, i));
        }

        let mut applied = Vec::new();
        for transform in func.schedule().transforms() {
            match transform {
                DimTransform::Split {
                    old,
                    outer,
                    inner,
                    factor,
                    ..
                } => {
                    let old_bounds = bounds.remove(old).ok_or_else(|| {
                        CompileError::schedule(
                            func.name().as_str(),
                            format!("split of unknown dimension `{old}`"),
                        )
                    })?;
                    let outer_extent = ceil_div(&old_bounds.1, factor)?;
                    bounds.insert(outer.clone(), (Expr::int(0), outer_extent));
                    bounds.insert(inner.clone(), (Expr::int(0), factor.clone()));
                    applied.push(AppliedTransform {
                        transform: transform.clone(),
                        old_bounds: vec![old_bounds],
                    });
                }
                DimTransform::Fuse {
                    outer,
                    inner,
                    fused,
                } => {
                    let ob = bounds.remove(outer).ok_or_else(|| {
                        CompileError::schedule(
                            func.name().as_str(),
                            format!("fuse of unknown dimension `{outer}`"),
                        )
                    })?;
                    let ib = bounds.remove(inner).ok_or_else(|| {
                        CompileError::schedule(
                            func.name().as_str(),
                            format!("fuse of unknown dimension `{inner}`"),
                        )
                    })?;
                    let product = Expr::binary(BinOp::Mul, ob.1.clone(), ib.1.clone())?;
                    bounds.insert(fused.clone(), (Expr::int(0), product));
                    applied.push(AppliedTransform {
                        transform: transform.clone(),
                        old_bounds: vec![ob, ib],
                    });
                }
            }
        }

        Ok(NestBuilder {
            func,
            source,
            final_bounds: bounds,
            applied,
        })
    }

    fn qualified(&self, dim: &Name) -> Name {
        self.func.name().dotted(dim.as_str())
    }

    /// Rebuild each original pure coordinate as an expression over the
    /// final loop variables, collecting tail guards along the way. A
    /// guard is `(consumed dimension, last valid coordinate)`; the
    /// caller compares against whatever binding that dimension ends up
    /// with.
    fn coordinates(&self) -> CompileResult<(FxHashMap<Name, Expr>, Vec<(Name, Expr)>)> {
        // Start from the final dims as themselves.
        let mut coords: FxHashMap<Name, Expr> = self
            .final_bounds
            .keys()
            .map(|d| (d.clone(), Expr::var(self.qualified(d))))
            .collect();
        let mut guards = Vec::new();

        for at in self.applied.iter().rev() {
            match &at.transform {
                DimTransform::Split {
                    old,
                    outer,
                    inner,
                    factor,
                    tail,
                } => {
                    let (old_min, old_extent) = &at.old_bounds[0];
                    let outer_coord = coords[outer].clone();
                    let inner_coord = coords[inner].clone();
                    let base = Expr::binary(BinOp::Mul, outer_coord, factor.clone())?;
                    let coord = match tail {
                        TailStrategy::ShiftInwards => {
                            // Clamp the tile base so the last tile re-covers
                            // already-computed sites instead of running over.
                            let limit =
                                Expr::binary(BinOp::Sub, old_extent.clone(), factor.clone())?;
                            let clamped = if divides_exactly(old_extent, factor) {
                                base
                            } else {
                                Expr::min(base, limit)?
                            };
                            Expr::binary(
                                BinOp::Add,
                                Expr::binary(BinOp::Add, clamped, inner_coord)?,
                                old_min.clone(),
                            )?
                        }
                        TailStrategy::GuardWithIf | TailStrategy::RoundUp => {
                            let coord = Expr::binary(
                                BinOp::Add,
                                Expr::binary(BinOp::Add, base, inner_coord)?,
                                old_min.clone(),
                            )?;
                            if !divides_exactly(old_extent, factor) {
                                let last = Expr::binary(
                                    BinOp::Sub,
                                    Expr::binary(
                                        BinOp::Add,
                                        old_min.clone(),
                                        old_extent.clone(),
                                    )?,
                                    Expr::int(1),
                                )?;
                                guards.push((old.clone(), last));
                            }
                            coord
                        }
                    };
                    coords.insert(old.clone(), coord);
                }
                DimTransform::Fuse {
                    outer,
                    inner,
                    fused,
                } => {
                    let (outer_min, _) = &at.old_bounds[0];
                    let (inner_min, inner_extent) = &at.old_bounds[1];
                    let fused_coord = coords[fused].clone();
                    let inner_coord = Expr::binary(
                        BinOp::Add,
                        Expr::binary(BinOp::Mod, fused_coord.clone(), inner_extent.clone())?,
                        inner_min.clone(),
                    )?;
                    let outer_coord = Expr::binary(
                        BinOp::Add,
                        Expr::binary(BinOp::Div, fused_coord, inner_extent.clone())?,
                        outer_min.clone(),
                    )?;
                    coords.insert(inner.clone(), inner_coord);
                    coords.insert(outer.clone(), outer_coord);
                }
            }
        }

        Ok((coords, guards))
    }

    /// Build the pure stage.
    pub fn build_pure(&self) -> CompileResult<Stmt> {
        let (coords, guards) = self.coordinates()?;

        let final_names: Vec<Name> = self
            .func
            .schedule()
            .dims()
            .iter()
            .map(|d| d.name.clone())
            .collect();

        // Substitution for each original argument, and the lets to emit
        // where the qualified name is still free.
        let mut subst_map: Vec<(Name, Expr)> = Vec::new();
        let mut lets: Vec<(Name, Expr)> = Vec::new();
        for arg in self.func.args() {
            let coord = coords
                .get(arg)
                .cloned()
                .unwrap_or_else(|| Expr::var(self.qualified(arg)));
            if final_names.contains(arg) {
                // The dimension survives (or a split reused its name for
                // the outer loop); substitute the coordinate inline.
                subst_map.push((arg.clone(), coord));
            } else {
                let q = self.qualified(arg);
                lets.push((q.clone(), coord));
                subst_map.push((arg.clone(), Expr::var(q)));
            }
        }

        // Provide at the coordinates of the original arguments.
        let mut values = Vec::with_capacity(self.func.values().len());
        for v in self.func.values() {
            values.push(apply_subst(v, &subst_map)?);
        }
        let args: Vec<Expr> = subst_map.iter().map(|(_, e)| e.clone()).collect();
        let mut body = Stmt::provide(self.func.name().clone(), values, args);

        // Tail guards, innermost, comparing each consumed dimension's
        // binding (the let where one was emitted) to its last valid
        // coordinate.
        let mut guard_exprs = Vec::with_capacity(guards.len());
        for (dim, last) in guards {
            let binding = subst_map
                .iter()
                .find(|(name, _)| *name == dim)
                .map(|(_, e)| e.clone())
                .or_else(|| coords.get(&dim).cloned())
                .unwrap_or_else(|| Expr::var(self.qualified(&dim)));
            guard_exprs.push(Expr::cmp(CmpOp::Le, binding, last)?);
        }
        if let Some(guard) = conjoin(guard_exprs)? {
            body = Stmt::if_then_else(guard, body, None)?;
        }

        // Coordinate lets.
        for (name, value) in lets.into_iter().rev() {
            body = Stmt::let_stmt(name, value, body);
        }

        // Loops, innermost first.
        for dim in self.func.schedule().dims().iter().rev() {
            let (min, extent) = self.final_bounds.get(&dim.name).ok_or_else(|| {
                CompileError::schedule(
                    self.func.name().as_str(),
                    format!("dimension `{}` has no bounds", dim.name),
                )
            })?;
            body = Stmt::for_loop(
                self.qualified(&dim.name),
                min.clone(),
                extent.clone(),
                dim.for_type,
                dim.device,
                body,
            )?;
        }

        Ok(body)
    }

    /// Build one update stage. Reduction loops sit outside the pure
    /// loops; the first reduction dimension is the innermost of its
    /// group.
    pub fn build_update(&self, stage: usize) -> CompileResult<Stmt> {
        let update = &self.func.updates()[stage];

        // Pure variables referenced by the left-hand side get loops.
        let mut pure_loops: Vec<Name> = Vec::new();
        for arg in self.func.args() {
            let used = update
                .args
                .iter()
                .any(|a| a.as_var().is_some_and(|v| v == arg));
            if used {
                pure_loops.push(arg.clone());
            }
        }

        let mut subst_map: Vec<(Name, Expr)> = Vec::new();
        for arg in &pure_loops {
            subst_map.push((arg.clone(), Expr::var(self.qualified(arg))));
        }
        if let Some(rdom) = &update.rdom {
            for rv in rdom.vars() {
                subst_map.push((rv.name.clone(), Expr::var(self.qualified(&rv.name))));
            }
        }

        let mut values = Vec::with_capacity(update.values.len());
        for v in &update.values {
            values.push(apply_subst(v, &subst_map)?);
        }
        let mut args = Vec::with_capacity(update.args.len());
        for a in &update.args {
            args.push(apply_subst(a, &subst_map)?);
        }
        let mut body = Stmt::provide(self.func.name().clone(), values, args);

        // Pure loops, innermost: first argument fastest.
        for (i, arg) in pure_loops.iter().enumerate().rev() {
            let index = self
                .func
                .args()
                .iter()
                .position(|a| a == arg)
                .unwrap_or(i);
            let (min, extent) = dim_bounds(self.func, &self.source, arg, index);
            body = Stmt::serial_for(self.qualified(arg), min, extent, body)?;
        }

        // Reduction loops outside, first dimension innermost, traversing
        // the domain in lexicographic order.
        if let Some(rdom) = &update.rdom {
            for rv in rdom.vars() {
                body = Stmt::serial_for(
                    self.qualified(&rv.name),
                    rv.min.clone(),
                    rv.extent.clone(),
                    body,
                )?;
            }
        }

        Ok(body)
    }

    /// Build the whole stage sequence for this function.
    pub fn build(&self) -> CompileResult<Stmt> {
        let mut stages = vec![self.build_pure()?];
        for i in 0..self.func.updates().len() {
            stages.push(self.build_update(i)?);
        }
        Ok(Stmt::block_of(stages).unwrap_or_else(|| Stmt::evaluate(Expr::int(0))))
    }
}

fn apply_subst(expr: &Expr, map: &[(Name, Expr)]) -> CompileResult<Expr> {
    let mut out = expr.clone();
    for (name, replacement) in map {
        out = substitute(name, replacement, &out)?;
    }
    Ok(out)
}

fn conjoin(guards: Vec<Expr>) -> CompileResult<Option<Expr>> {
    let mut it = guards.into_iter();
    let Some(first) = it.next() else {
        return Ok(None);
    };
    let mut out = first;
    for g in it {
        out = Expr::and(out, g)?;
    }
    Ok(Some(out))
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use weft_func::Var;
    use weft_ir::StmtKind;

    fn simple_func() -> Func {
        let (x, y) = (Var::new("x"), Var::new("y"));
        let mut f = Func::new("f");
        f.define(&[x, y], vec![Expr::var("x") + Expr::var("y")])
            .unwrap();
        f
    }

    fn loop_names(stmt: &Stmt) -> Vec<String> {
        let mut names = Vec::new();
        let mut cur = stmt.clone();
        loop {
            match cur.kind() {
                StmtKind::For { name, body, .. } => {
                    names.push(name.to_string());
                    cur = body.clone();
                }
                StmtKind::LetStmt { body, .. } => cur = body.clone(),
                StmtKind::IfThenElse { then_case, .. } => cur = then_case.clone(),
                _ => break,
            }
        }
        names
    }

    #[test]
    fn default_nest_is_row_major() {
        let f = simple_func();
        let nest = NestBuilder::new(&f, BoundsSource::OutputBuffer)
            .unwrap()
            .build_pure()
            .unwrap();
        assert_eq!(loop_names(&nest), ["f.y", "f.x"]);
    }

    #[test]
    fn split_emits_guard_for_inexact_division() {
        let mut f = simple_func();
        // Extent is a buffer parameter, so divisibility is unknown.
        f.split(
            &Var::new("x"),
            &Var::new("xo"),
            &Var::new("xi"),
            4,
            TailStrategy::GuardWithIf,
        )
        .unwrap();
        let nest = NestBuilder::new(&f, BoundsSource::OutputBuffer)
            .unwrap()
            .build_pure()
            .unwrap();
        assert_eq!(loop_names(&nest), ["f.y", "f.xo", "f.xi"]);
        // A guard exists somewhere inside.
        let printed = nest.to_string();
        assert!(printed.contains("if ("), "expected a tail guard:\n{printed}");
        // The consumed dimension is rebuilt by a let.
        assert!(printed.contains("let f.x ="), "expected a coordinate let:\n{printed}");
    }

    #[test]
    fn bounded_split_of_exact_multiple_has_no_guard() {
        let mut f = simple_func();
        f.bound(&Var::new("x"), 0, 16);
        f.split(
            &Var::new("x"),
            &Var::new("xo"),
            &Var::new("xi"),
            4,
            TailStrategy::GuardWithIf,
        )
        .unwrap();
        let nest = NestBuilder::new(&f, BoundsSource::OutputBuffer)
            .unwrap()
            .build_pure()
            .unwrap();
        assert!(!nest.to_string().contains("if ("));
    }

    #[test]
    fn round_up_split_runs_twelve_guarded_iterations() {
        // Extent 10 split by 4: three outer iterations of four, with a
        // guard making the last two inner iterations no-ops.
        let mut f = Func::new("g");
        f.define(&[Var::new("x")], vec![Expr::var("x")]).unwrap();
        f.bound(&Var::new("x"), 0, 10);
        f.split(
            &Var::new("x"),
            &Var::new("xo"),
            &Var::new("xi"),
            4,
            TailStrategy::RoundUp,
        )
        .unwrap();
        let nest = NestBuilder::new(&f, BoundsSource::OutputBuffer)
            .unwrap()
            .build_pure()
            .unwrap();
        let printed = nest.to_string();
        // ceil(10/4) = 3 outer iterations.
        assert!(printed.contains("g.xo in [0, 0 + 3)"), "{printed}");
        assert!(printed.contains("g.xi in [0, 0 + 4)"), "{printed}");
        assert!(printed.contains("if ("), "{printed}");
    }

    #[test]
    fn shift_inwards_clamps_instead_of_guarding() {
        let mut f = Func::new("g");
        f.define(&[Var::new("x")], vec![Expr::var("x")]).unwrap();
        f.bound(&Var::new("x"), 0, 10);
        f.split(
            &Var::new("x"),
            &Var::new("xo"),
            &Var::new("xi"),
            4,
            TailStrategy::ShiftInwards,
        )
        .unwrap();
        let printed = NestBuilder::new(&f, BoundsSource::OutputBuffer)
            .unwrap()
            .build_pure()
            .unwrap()
            .to_string();
        assert!(!printed.contains("if ("), "{printed}");
        assert!(printed.contains("min("), "{printed}");
    }

    #[test]
    fn update_stage_puts_reduction_loops_outside() {
        let x = Var::new("x");
        let mut f = Func::new("sum");
        f.define(&[x.clone()], vec![Expr::int(0)]).unwrap();
        let r = weft_func::RDom::over("r", Expr::int(0), Expr::int(100)).unwrap();
        let rhs = f.at([x.expr()]) + r.x().expr();
        f.update(vec![x.expr()], vec![rhs], Some(&r)).unwrap();

        let nest = NestBuilder::new(&f, BoundsSource::OutputBuffer)
            .unwrap()
            .build_update(0)
            .unwrap();
        assert_eq!(loop_names(&nest), ["sum.r.x$r", "sum.x"]);
    }

    #[test]
    fn stages_sequence_in_a_block() {
        let x = Var::new("x");
        let mut f = Func::new("sum");
        f.define(&[x.clone()], vec![Expr::int(0)]).unwrap();
        let r = weft_func::RDom::over("r", Expr::int(0), Expr::int(10)).unwrap();
        let rhs = f.at([x.expr()]) + r.x().expr();
        f.update(vec![x.expr()], vec![rhs], Some(&r)).unwrap();

        let whole = NestBuilder::new(&f, BoundsSource::OutputBuffer)
            .unwrap()
            .build()
            .unwrap();
        assert!(matches!(whole.kind(), StmtKind::Block { .. }));
    }
}
