//! Entry precondition assertions.
//!
//! The compiled pipeline validates its buffer arguments before any work:
//! element sizes must match the compiled types, every used dimension must
//! be non-empty, the innermost stride must be one (the dense layout the
//! flattened addressing assumes), and no buffer may arrive with its
//! device copy newer than its host copy. Targets built with `no_asserts`
//! skip the checks entirely.

use weft_diagnostic::CompileResult;
use weft_ir::{CmpOp, Expr, Name, Stmt, Type};
use weft_target::{Features, Target};

use crate::env::PipelineEnv;

/// The buffer arguments of the pipeline: name, element type, dimensions.
pub fn buffer_args(env: &PipelineEnv) -> Vec<(Name, Type, usize)> {
    let mut buffers = Vec::new();
    if let Some(output) = env.funcs.get(&env.output) {
        let outputs = output.outputs();
        for (i, ty) in output.output_types().into_iter().enumerate() {
            let name = if outputs > 1 {
                env.output.dotted(&i.to_string())
            } else {
                env.output.clone()
            };
            buffers.push((name, ty, output.args().len()));
        }
    }
    let mut images: Vec<_> = env.images.values().collect();
    images.sort_by(|a, b| a.name().cmp(b.name()));
    for image in images {
        buffers.push((image.name().clone(), image.ty(), image.dimensions()));
    }
    buffers
}

/// Wrap the pipeline body with its entry assertions.
pub fn inject_asserts(env: &PipelineEnv, target: &Target, stmt: &Stmt) -> CompileResult<Stmt> {
    if target.has_feature(Features::NO_ASSERTS) {
        return Ok(stmt.clone());
    }

    let mut checks = Vec::new();
    for (name, ty, dims) in buffer_args(env) {
        let bytes = i64::from((ty.bits + 7) / 8);
        checks.push(Stmt::assert_stmt(
            Expr::cmp(
                CmpOp::Eq,
                Expr::var(name.dotted("elem_size")),
                Expr::int(bytes),
            )?,
            format!("{name} has the wrong element size"),
        )?);
        checks.push(Stmt::assert_stmt(
            Expr::cmp(
                CmpOp::Eq,
                Expr::var(name.dotted("stride.0")),
                Expr::int(1),
            )?,
            format!("{name} must be dense in its innermost dimension"),
        )?);
        for d in 0..dims {
            checks.push(Stmt::assert_stmt(
                Expr::cmp(
                    CmpOp::Ge,
                    Expr::var(name.dotted(&format!("extent.{d}"))),
                    Expr::int(1),
                )?,
                format!("{name} is empty along dimension {d}"),
            )?);
        }
        checks.push(Stmt::assert_stmt(
            Expr::not(Expr::var_of(Type::bool_type(), name.dotted("device_dirty")))?,
            format!("{name} has unflushed device writes"),
        )?);
    }

    checks.push(stmt.clone());
    Ok(Stmt::block_of(checks).unwrap_or_else(|| stmt.clone()))
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;
    use weft_func::{Func, ImageParam, Var};

    fn env() -> PipelineEnv {
        let x = Var::new("x");
        let input = ImageParam::new(Type::uint(16), 2, "input");
        let mut out = Func::new("out");
        out.define(&[x.clone()], vec![input.at([x.expr(), x.expr()]) + 1])
            .unwrap();
        let mut funcs = FxHashMap::default();
        funcs.insert(out.name().clone(), out);
        let mut images = FxHashMap::default();
        images.insert(Name::new("input"), input);
        PipelineEnv {
            funcs,
            images,
            scalar_params: FxHashMap::default(),
            output: Name::new("out"),
        }
    }

    #[test]
    fn asserts_cover_size_layout_and_dirtiness() {
        let target = Target::parse("x86-64-linux").unwrap();
        let body = Stmt::evaluate(Expr::int(0));
        let printed = inject_asserts(&env(), &target, &body).unwrap().to_string();
        assert!(printed.contains("(out.elem_size == 2)"), "{printed}");
        assert!(printed.contains("(input.elem_size == 2)"), "{printed}");
        assert!(printed.contains("(input.stride.0 == 1)"), "{printed}");
        assert!(printed.contains("(input.extent.1 >= 1)"), "{printed}");
        assert!(printed.contains("!input.device_dirty"), "{printed}");
    }

    #[test]
    fn no_asserts_target_skips_them() {
        let target = Target::parse("x86-64-linux-no_asserts").unwrap();
        let body = Stmt::evaluate(Expr::int(0));
        let out = inject_asserts(&env(), &target, &body).unwrap();
        assert!(out.ptr_eq(&body));
    }
}
