//! Texture intrinsic injection.
//!
//! On targets that read and write pipeline data through textures, the
//! abstract accesses left inside device loops become intrinsics the
//! device code generator understands:
//!
//! - a `Call` to a pipeline function or image becomes
//!   `gpu_texture_load(name, name.buffer, coords…)`, the first two
//!   spatial coordinates normalized to texture space as
//!   `(c − min + 0.5) / extent`;
//! - a `Provide` becomes `gpu_texture_store(name, name.buffer, coords…,
//!   value)` with raw coordinates.
//!
//! A third load coordinate passes through shifted by its minimum. Images
//! must declare that minimum; a missing constraint warns and defaults to
//! zero.

use weft_diagnostic::{CompileError, CompileResult};
use weft_ir::{
    mutate_expr_children, mutate_stmt_children, BinOp, CallKind, DeviceApi, Expr, ExprKind,
    Mutator, Name, Stmt, StmtKind, Type,
};

use crate::env::PipelineEnv;

/// Rewrite device-loop accesses into texture intrinsics.
pub fn inject_texture_intrinsics(env: &PipelineEnv, stmt: &Stmt) -> CompileResult<Stmt> {
    let mut pass = InjectTextures {
        env,
        inside_kernel: false,
    };
    pass.mutate_stmt(stmt)
}

struct InjectTextures<'a> {
    env: &'a PipelineEnv,
    inside_kernel: bool,
}

impl InjectTextures<'_> {
    fn buffer_handle(name: &Name) -> Expr {
        Expr::var_of(Type::handle(), name.dotted("buffer"))
    }

    fn texture_load(&self, name: &Name, args: &[Expr], ty: Type, index: usize)
        -> CompileResult<Expr>
    {
        let mut tagged = name.clone();
        if index != 0 {
            tagged = tagged.dotted(&index.to_string());
        }

        let mut call_args = Vec::with_capacity(args.len() + 2);
        call_args.push(Expr::string(tagged.clone()));
        call_args.push(Self::buffer_handle(&tagged));

        for (d, coord) in args.iter().enumerate() {
            let mut min: Expr = Expr::var(tagged.dotted(&format!("min.{d}")));
            if d >= 2 {
                if let Some(image) = self.env.images.get(name) {
                    match image.min_constraint(d) {
                        Some(c) => min = Expr::int(c),
                        None => {
                            tracing::warn!(
                                image = %name,
                                dim = d,
                                "no min constraint on texture layer coordinate; assuming 0"
                            );
                            min = Expr::int(0);
                        }
                    }
                }
            }
            if d < 2 {
                // Normalize to the texel center in texture space.
                let extent = Expr::var(tagged.dotted(&format!("extent.{d}")));
                let shifted = Expr::cast(
                    Type::float(32),
                    Expr::binary(BinOp::Sub, coord.clone(), min)?,
                )?;
                let centered =
                    Expr::binary(BinOp::Add, shifted, Expr::float(0.5))?;
                call_args.push(Expr::binary(BinOp::Div, centered, extent)?);
            } else {
                call_args.push(Expr::binary(BinOp::Sub, coord.clone(), min)?);
            }
        }

        Ok(Expr::intrinsic(ty, "gpu_texture_load", call_args))
    }
}

impl Mutator for InjectTextures<'_> {
    fn mutate_expr(&mut self, expr: &Expr) -> CompileResult<Expr> {
        if !self.inside_kernel {
            return mutate_expr_children(self, expr);
        }
        if let ExprKind::Call {
            name,
            args,
            kind: CallKind::Func | CallKind::Image,
            value_index,
        } = expr.kind()
        {
            let mut new_args = Vec::with_capacity(args.len());
            for a in args {
                new_args.push(self.mutate_expr(a)?);
            }
            return self.texture_load(name, &new_args, expr.ty(), *value_index);
        }
        mutate_expr_children(self, expr)
    }

    fn mutate_stmt(&mut self, stmt: &Stmt) -> CompileResult<Stmt> {
        match stmt.kind() {
            StmtKind::For { device, .. } if *device != DeviceApi::Host => {
                let saved = self.inside_kernel;
                self.inside_kernel = true;
                let out = mutate_stmt_children(self, stmt);
                self.inside_kernel = saved;
                out
            }
            StmtKind::Provide { name, values, args } if self.inside_kernel => {
                if values.len() != 1 {
                    return Err(CompileError::unsupported(format!(
                        "texture store to `{name}` must be single-valued, found {}",
                        values.len()
                    )));
                }
                let value = self.mutate_expr(&values[0])?;
                let mut call_args = Vec::with_capacity(args.len() + 3);
                call_args.push(Expr::string(name.clone()));
                call_args.push(Self::buffer_handle(name));
                for a in args {
                    call_args.push(self.mutate_expr(a)?);
                }
                let ty = value.ty();
                call_args.push(value);
                Ok(Stmt::evaluate(Expr::intrinsic(
                    ty,
                    "gpu_texture_store",
                    call_args,
                )))
            }
            _ => mutate_stmt_children(self, stmt),
        }
    }
}
