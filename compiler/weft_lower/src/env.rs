//! The pipeline environment lowering runs against.
//!
//! Collects every function reachable from the output, the input images,
//! and any scalar parameters, and answers the dependency queries the
//! passes share: who calls whom, and in what order realizations nest.

use rustc_hash::{FxHashMap, FxHashSet};
use weft_diagnostic::{CompileError, CompileResult};
use weft_func::{Func, ImageParam};
use weft_ir::{walk_expr, CallKind, Expr, ExprKind, Name, Type, Visitor};

/// Everything lowering needs to know about one pipeline.
#[derive(Clone)]
pub struct PipelineEnv {
    pub funcs: FxHashMap<Name, Func>,
    pub images: FxHashMap<Name, ImageParam>,
    pub scalar_params: FxHashMap<Name, Type>,
    pub output: Name,
}

impl PipelineEnv {
    pub fn output_func(&self) -> CompileResult<&Func> {
        self.funcs.get(&self.output).ok_or_else(|| {
            CompileError::ir_type_bare(format!("output function `{}` is not defined", self.output))
        })
    }

    /// Is `name` backed by an external buffer (an image or the output)?
    pub fn is_buffer(&self, name: &Name) -> bool {
        *name == self.output || self.images.contains_key(name)
    }

    /// The pipeline-function names `func`'s definitions call.
    pub fn callees(func: &Func) -> FxHashSet<Name> {
        struct Collect {
            names: FxHashSet<Name>,
        }
        impl Visitor for Collect {
            fn visit_expr(&mut self, expr: &Expr) {
                if let ExprKind::Call {
                    name,
                    kind: CallKind::Func,
                    ..
                } = expr.kind()
                {
                    self.names.insert(name.clone());
                }
                walk_expr(self, expr);
            }
        }
        let mut c = Collect {
            names: FxHashSet::default(),
        };
        for v in func.values() {
            c.visit_expr(v);
        }
        for u in func.updates() {
            for v in &u.values {
                c.visit_expr(v);
            }
            for a in &u.args {
                c.visit_expr(a);
            }
        }
        // A reduction referencing its own current value is not a
        // dependency edge.
        c.names.remove(func.name());
        c.names
    }

    /// Functions reachable from the output, consumers before producers,
    /// output first. Fails on a call to an undefined function.
    pub fn realization_order(&self) -> CompileResult<Vec<Name>> {
        let mut order = Vec::new();
        let mut state: FxHashMap<Name, u8> = FxHashMap::default(); // 1 = visiting, 2 = done
        self.visit_for_order(&self.output.clone(), &mut state, &mut order)?;
        order.reverse(); // producers were pushed first
        Ok(order)
    }

    fn visit_for_order(
        &self,
        name: &Name,
        state: &mut FxHashMap<Name, u8>,
        order: &mut Vec<Name>,
    ) -> CompileResult<()> {
        match state.get(name) {
            Some(2) => return Ok(()),
            Some(_) => {
                return Err(CompileError::ir_type_bare(format!(
                    "pipeline functions form a cycle through `{name}`"
                )))
            }
            None => {}
        }
        state.insert(name.clone(), 1);
        let func = self.funcs.get(name).ok_or_else(|| {
            CompileError::ir_type_bare(format!(
                "`{name}` is called but has no definition in the pipeline"
            ))
        })?;
        for callee in Self::callees(func) {
            self.visit_for_order(&callee, state, order)?;
        }
        state.insert(name.clone(), 2);
        order.push(name.clone());
        Ok(())
    }
}
