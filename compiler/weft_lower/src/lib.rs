//! The lowering pipeline.
//!
//! Turns an algorithm (a set of [`weft_func::Func`]s) plus its schedules
//! into a flat, annotated loop nest ready for a code generator. The pass
//! sequence is fixed and deterministic:
//!
//! 1.  inline producers substitute into their consumers
//! 2.  the output's scheduled loop nest is built (splits, tails,
//!     reorders, marks applied per function as each nest is built)
//! 3.  every materialized producer's realization is injected at its
//!     store and compute levels
//! 4.  bounds inference sizes each realization from consumer demand
//! 5.  sliding-window storage folding
//! 6.  storage lowering (`Realize`→`Allocate`, accesses flattened)
//! 7.  vectorization
//! 8.  unrolling
//! 9.  GPU loop canonicalization
//! 10. back-end intrinsic injection (textures, lerp)
//! 11. entry assertions
//!
//! followed by a binding-closure check. Every pass is total over
//! well-formed input and preserves expression types.

mod asserts;
mod bounds;
mod env;
mod flatten;
mod fold;
mod gpu;
mod inject;
mod inline;
mod interval;
mod lerp;
mod nest;
mod textures;
mod unroll;
mod validate;
mod vectorize;

pub use asserts::buffer_args;
pub use env::PipelineEnv;
pub use interval::{bounds_of_expr, Interval, Scope};

use weft_diagnostic::CompileResult;
use weft_ir::Stmt;
use weft_target::Target;

/// Lower a pipeline to its annotated loop nest for `target`.
pub fn lower(env: &PipelineEnv, target: &Target) -> CompileResult<Stmt> {
    let span = tracing::debug_span!("lower", output = %env.output, target = %target);
    let _guard = span.enter();

    let env = inline::inline_pass(env)?;
    tracing::debug!(funcs = env.funcs.len(), "inlined producers substituted");

    let (stmt, sites) = inject::build_and_inject(&env)?;
    tracing::debug!("realization tree built");

    let stmt = bounds::infer_bounds(&env, &sites, &stmt)?;
    tracing::debug!("bounds inferred");

    let folds = fold::detect_folds(&env, &sites, &stmt)?;
    tracing::debug!(folds = folds.len(), "storage folds detected");

    let stmt = flatten::flatten_storage(&env, target, &folds, &stmt)?;
    tracing::debug!("storage flattened");

    let stmt = vectorize::vectorize_loops(&stmt)?;
    let stmt = unroll::unroll_loops(&stmt)?;
    let stmt = gpu::canonicalize_gpu_loops(&stmt)?;

    let stmt = if target.uses_textures() {
        textures::inject_texture_intrinsics(&env, &stmt)?
    } else {
        stmt
    };
    let stmt = lerp::lower_lerps(&stmt)?;

    let stmt = asserts::inject_asserts(&env, target, &stmt)?;

    validate::check_binding_closure(&env, &stmt)?;
    Ok(stmt)
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;
    use weft_func::{Func, ImageParam, Var};
    use weft_ir::{Expr, Name, Type, Visitor};

    fn blur_env(schedule: impl FnOnce(&mut Func, &mut Func)) -> PipelineEnv {
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
        blur_y.bound(&Var::new("x"), 1, 64);
        blur_y.bound(&Var::new("y"), 1, 32);

        schedule(&mut blur_x, &mut blur_y);

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
    fn inlined_pipeline_lowers_to_loads_of_the_input() {
        let target = Target::parse("x86-64-linux").unwrap();
        let env = blur_env(|bx, _| {
            bx.compute_inline();
        });
        let stmt = lower(&env, &target).unwrap();
        let printed = stmt.to_string();
        assert!(!printed.contains("blur_x"), "{printed}");
        assert!(printed.contains("input["), "{printed}");
        assert!(printed.contains("blur_y["), "{printed}");
    }

    #[test]
    fn tiled_vectorized_parallel_schedule_lowers() {
        let target = Target::parse("x86-64-linux").unwrap();
        let env = blur_env(|bx, by| {
            let (x, y) = (Var::new("x"), Var::new("y"));
            let (xo, yo, xi, yi) = (
                Var::new("xo"),
                Var::new("yo"),
                Var::new("xi"),
                Var::new("yi"),
            );
            by.tile(&x, &y, &xo, &yo, &xi, &yi, 16, 8).unwrap();
            by.vectorize(&xi, 8).unwrap();
            by.parallel(&yo).unwrap();
            bx.compute_at(by, &xo);
            bx.vectorize(&x, 8).unwrap();
        });
        let stmt = lower(&env, &target).unwrap();
        let printed = stmt.to_string();
        assert!(printed.contains("parallel for blur_y.yo"), "{printed}");
        assert!(printed.contains("ramp("), "{printed}");
        assert!(printed.contains("allocate blur_x"), "{printed}");
        assert!(!printed.contains("realize"), "{printed}");
        assert!(!printed.contains("vectorized for"), "{printed}");
    }

    #[test]
    fn reduction_pipeline_lowers() {
        let target = Target::parse("x86-64-linux").unwrap();
        let x = Var::new("x");
        let input = ImageParam::new(Type::int32(), 1, "input");

        let mut total = Func::new("total");
        total.define(&[x.clone()], vec![Expr::int(0)]).unwrap();
        let r = weft_func::RDom::over("r", Expr::int(0), Expr::int(100)).unwrap();
        let rhs = total.at([x.expr()]) + input.at([r.x().expr()]);
        total.update(vec![x.expr()], vec![rhs], Some(&r)).unwrap();
        total.bound(&x, 0, 4);

        let mut funcs = FxHashMap::default();
        funcs.insert(total.name().clone(), total);
        let mut images = FxHashMap::default();
        images.insert(Name::new("input"), input);
        let env = PipelineEnv {
            funcs,
            images,
            scalar_params: FxHashMap::default(),
            output: Name::new("total"),
        };

        let stmt = lower(&env, &target).unwrap();
        let printed = stmt.to_string();
        // Initialization loop, then the reduction loop over r.
        assert!(printed.contains("for total.r.x$r"), "{printed}");
        assert!(printed.contains("total["), "{printed}");
    }

    #[test]
    fn type_preservation_across_lowering() {
        let target = Target::parse("x86-64-linux").unwrap();
        let env = blur_env(|bx, _| {
            bx.compute_root();
        });
        let stmt = lower(&env, &target).unwrap();
        // Every store into blur_y carries the uint16 the algorithm
        // defines.
        struct StoreTypes {
            seen: Vec<Type>,
        }
        impl weft_ir::Visitor for StoreTypes {
            fn visit_stmt(&mut self, stmt: &weft_ir::Stmt) {
                if let weft_ir::StmtKind::Store { name, value, .. } = stmt.kind() {
                    if name.as_str() == "blur_y" {
                        self.seen.push(value.ty());
                    }
                }
                weft_ir::walk_stmt(self, stmt);
            }
        }
        let mut v = StoreTypes { seen: vec![] };
        v.visit_stmt(&stmt);
        assert!(!v.seen.is_empty());
        assert!(v.seen.iter().all(|t| *t == Type::uint(16)));
    }
}
