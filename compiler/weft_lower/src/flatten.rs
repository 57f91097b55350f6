//! Storage lowering.
//!
//! Rewrites each `Realize` into an `Allocate`/`Free` pair (one per output
//! of the function) and flattens the abstract multidimensional accesses:
//! `Provide` becomes `Store`, pipeline and image `Call`s become `Load`s,
//! each with a row-major flat index.
//!
//! Internal allocations index as `Σ (coordᵢ − minᵢ)·strideᵢ` with strides
//! computed from the allocation extents; a dimension folded by the
//! sliding-window pass indexes `coordᵢ mod window` instead. Buffers that
//! cross the pipeline boundary (the output and input images) index
//! through their descriptor parameters (`name.min.d`, `name.stride.d`).
//!
//! On texture targets, accesses inside device loops are left abstract for
//! the intrinsic-injection pass.

use rustc_hash::FxHashMap;
use weft_diagnostic::{CompileError, CompileResult};
use weft_ir::{
    mutate_expr_children, mutate_stmt_children, BinOp, CallKind, DeviceApi, Expr, ExprKind,
    Mutator, Name, Stmt, StmtKind, Type,
};
use weft_target::Target;

use crate::env::PipelineEnv;
use crate::fold::FoldMap;

/// Flatten all storage in the tree.
pub fn flatten_storage(
    env: &PipelineEnv,
    target: &Target,
    folds: &FoldMap,
    stmt: &Stmt,
) -> CompileResult<Stmt> {
    let mut pass = Flatten {
        env,
        textures: target.uses_textures(),
        folds,
        allocs: FxHashMap::default(),
        device_depth: 0,
    };
    pass.mutate_stmt(stmt)
}

struct AllocInfo {
    mins: Vec<Expr>,
    extents: Vec<Expr>,
    folds: Vec<Option<i64>>,
    types: Vec<Type>,
}

impl AllocInfo {
    /// Allocation name for output `i`; tuple-valued functions allocate
    /// one buffer per output.
    fn alloc_name(func: &Name, index: usize, outputs: usize) -> Name {
        if outputs > 1 {
            func.dotted(&index.to_string())
        } else {
            func.clone()
        }
    }
}

struct Flatten<'a> {
    env: &'a PipelineEnv,
    textures: bool,
    folds: &'a FoldMap,
    allocs: FxHashMap<Name, AllocInfo>,
    device_depth: usize,
}

impl Flatten<'_> {
    fn in_device_loop(&self) -> bool {
        self.device_depth > 0
    }

    /// Flat index into an internal allocation.
    fn alloc_index(&self, info: &AllocInfo, args: &[Expr]) -> CompileResult<Expr> {
        if args.len() != info.mins.len() {
            return Err(CompileError::ir_type_bare(format!(
                "access has {} coordinates, allocation has {} dimensions",
                args.len(),
                info.mins.len()
            )));
        }
        let mut index = Expr::int(0);
        let mut stride = Expr::int(1);
        for (d, arg) in args.iter().enumerate() {
            let term = match info.folds[d] {
                Some(window) => Expr::binary(BinOp::Mod, arg.clone(), Expr::int(window))?,
                None => Expr::binary(BinOp::Sub, arg.clone(), info.mins[d].clone())?,
            };
            index = Expr::binary(
                BinOp::Add,
                index,
                Expr::binary(BinOp::Mul, term, stride.clone())?,
            )?;
            stride = Expr::binary(BinOp::Mul, stride, info.extents[d].clone())?;
        }
        Ok(index)
    }

    /// Flat index into an external buffer via its descriptor parameters.
    fn buffer_index(name: &Name, args: &[Expr]) -> CompileResult<Expr> {
        let mut index = Expr::int(0);
        for (d, arg) in args.iter().enumerate() {
            let min = Expr::var(name.dotted(&format!("min.{d}")));
            let stride = Expr::var(name.dotted(&format!("stride.{d}")));
            let term = Expr::binary(BinOp::Sub, arg.clone(), min)?;
            index = Expr::binary(
                BinOp::Add,
                index,
                Expr::binary(BinOp::Mul, term, stride)?,
            )?;
        }
        Ok(index)
    }

    fn flatten_access(&self, name: &Name, args: &[Expr], ty: Type, index: usize)
        -> CompileResult<Expr>
    {
        if self.env.is_buffer(name) {
            let flat = Self::buffer_index(name, args)?;
            Expr::load(ty, name.clone(), flat)
        } else {
            let info = self.allocs.get(name).ok_or_else(|| {
                CompileError::unbound(name.as_str(), format!("{name}(…) before its allocation"))
            })?;
            let flat = self.alloc_index(info, args)?;
            let outputs = info.types.len();
            Expr::load(ty, AllocInfo::alloc_name(name, index, outputs), flat)
        }
    }
}

impl Mutator for Flatten<'_> {
    fn mutate_stmt(&mut self, stmt: &Stmt) -> CompileResult<Stmt> {
        match stmt.kind() {
            StmtKind::Realize {
                name,
                types,
                bounds,
                body,
            } => {
                let folds: Vec<Option<i64>> = (0..bounds.len())
                    .map(|d| self.folds.get(&(name.clone(), d)).copied())
                    .collect();
                let extents: Vec<Expr> = bounds
                    .iter()
                    .zip(&folds)
                    .map(|(b, fold)| match fold {
                        Some(w) => Expr::int(*w),
                        None => b.extent.clone(),
                    })
                    .collect();
                self.allocs.insert(
                    name.clone(),
                    AllocInfo {
                        mins: bounds.iter().map(|b| b.min.clone()).collect(),
                        extents: extents.clone(),
                        folds,
                        types: types.clone(),
                    },
                );

                let body = self.mutate_stmt(body)?;
                let outputs = types.len();
                let mut frees = Vec::with_capacity(outputs);
                for i in 0..outputs {
                    frees.push(Stmt::free(AllocInfo::alloc_name(name, i, outputs)));
                }
                let mut out = Stmt::block_of(
                    std::iter::once(body).chain(frees).collect(),
                )
                .unwrap_or_else(|| Stmt::evaluate(Expr::int(0)));
                for (i, ty) in types.iter().enumerate().rev() {
                    out = Stmt::allocate(
                        AllocInfo::alloc_name(name, i, outputs),
                        *ty,
                        extents.clone(),
                        out,
                    );
                }
                Ok(out)
            }

            StmtKind::Provide { name, values, args } => {
                if self.textures && self.in_device_loop() {
                    // Texture stores are injected later; just flatten
                    // inside the value expressions.
                    return mutate_stmt_children(self, stmt);
                }
                let mut new_values = Vec::with_capacity(values.len());
                for v in values {
                    new_values.push(self.mutate_expr(v)?);
                }
                let mut new_args = Vec::with_capacity(args.len());
                for a in args {
                    new_args.push(self.mutate_expr(a)?);
                }

                let outputs = new_values.len();
                let mut stores = Vec::with_capacity(outputs);
                if self.env.is_buffer(name) {
                    let flat = Self::buffer_index(name, &new_args)?;
                    for (i, v) in new_values.into_iter().enumerate() {
                        stores.push(Stmt::store(
                            AllocInfo::alloc_name(name, i, outputs),
                            flat.clone(),
                            v,
                        )?);
                    }
                } else {
                    let info = self.allocs.get(name).ok_or_else(|| {
                        CompileError::unbound(
                            name.as_str(),
                            format!("provide to `{name}` before its allocation"),
                        )
                    })?;
                    let flat = self.alloc_index(info, &new_args)?;
                    for (i, v) in new_values.into_iter().enumerate() {
                        stores.push(Stmt::store(
                            AllocInfo::alloc_name(name, i, outputs),
                            flat.clone(),
                            v,
                        )?);
                    }
                }
                Ok(Stmt::block_of(stores)
                    .unwrap_or_else(|| Stmt::evaluate(Expr::int(0))))
            }

            StmtKind::For { device, .. } => {
                if *device == DeviceApi::Host {
                    mutate_stmt_children(self, stmt)
                } else {
                    self.device_depth += 1;
                    let out = mutate_stmt_children(self, stmt);
                    self.device_depth -= 1;
                    out
                }
            }

            _ => mutate_stmt_children(self, stmt),
        }
    }

    fn mutate_expr(&mut self, expr: &Expr) -> CompileResult<Expr> {
        if let ExprKind::Call {
            name,
            args,
            kind: CallKind::Func | CallKind::Image,
            value_index,
        } = expr.kind()
        {
            if self.textures && self.in_device_loop() {
                return mutate_expr_children(self, expr);
            }
            let mut new_args = Vec::with_capacity(args.len());
            for a in args {
                new_args.push(self.mutate_expr(a)?);
            }
            return self.flatten_access(name, &new_args, expr.ty(), *value_index);
        }
        mutate_expr_children(self, expr)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use weft_func::{Func, ImageParam, Var};
    use weft_target::Target;

    use crate::bounds::infer_bounds;
    use crate::fold::detect_folds;
    use crate::inject::build_and_inject;

    fn lower_through_flatten(env: &PipelineEnv) -> Stmt {
        let (stmt, sites) = build_and_inject(env).unwrap();
        let stmt = infer_bounds(env, &sites, &stmt).unwrap();
        let folds = detect_folds(env, &sites, &stmt).unwrap();
        let target = Target::parse("x86-64-linux").unwrap();
        flatten_storage(env, &target, &folds, &stmt).unwrap()
    }

    fn simple_env() -> PipelineEnv {
        let x = Var::new("x");
        let input = ImageParam::new(Type::int32(), 1, "input");

        let mut double = Func::new("double");
        double
            .define(&[x.clone()], vec![input.at([x.expr()]) * 2])
            .unwrap();
        double.compute_root();

        let mut out = Func::new("out");
        out.define(&[x.clone()], vec![double.at([x.expr()]) + 1])
            .unwrap();
        out.bound(&Var::new("x"), 0, 8);

        let mut funcs = FxHashMap::default();
        funcs.insert(double.name().clone(), double);
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
    fn realize_becomes_allocate_and_free() {
        let stmt = lower_through_flatten(&simple_env());
        let printed = stmt.to_string();
        assert!(printed.contains("allocate double[int32 * 8]"), "{printed}");
        assert!(printed.contains("free double"), "{printed}");
        assert!(!printed.contains("realize"), "{printed}");
    }

    #[test]
    fn accesses_flatten_to_loads_and_stores() {
        let stmt = lower_through_flatten(&simple_env());
        let printed = stmt.to_string();
        // Producer store into its allocation; the zero minimum folds out
        // of the address.
        assert!(printed.contains("double[double.x]"), "{printed}");
        // Image load through descriptor parameters.
        assert!(
            printed.contains("input[((double.x - input.min.0) * input.stride.0)]"),
            "{printed}"
        );
        // Output store through its own descriptor.
        assert!(printed.contains("out[((out.x - out.min.0) * out.stride.0)]"), "{printed}");
        assert!(!printed.contains("out(") && !printed.contains("double("), "{printed}");
    }
}
