//! Pipeline functions.
//!
//! A [`Func`] is a named pure function over integer coordinates: one pure
//! definition plus zero or more update definitions, each scoped by a
//! reduction domain. The pure definition fixes the output arity and value
//! types; later stages must agree.
//!
//! The schedule directives on `Func` forward to its [`Schedule`], naming
//! the function in any error.

use weft_diagnostic::{CompileError, CompileResult};
use weft_ir::{CallKind, Expr, Name, Type};

use crate::{RDom, ReductionDomain, Schedule, TailStrategy};

/// A pure variable, usable as an expression and as a dimension name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Var {
    name: Name,
}

impl Var {
    pub fn new(name: impl Into<Name>) -> Var {
        Var { name: name.into() }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// This variable as a 32-bit integer expression.
    pub fn expr(&self) -> Expr {
        Expr::var(self.name.clone())
    }
}

impl From<&Var> for Expr {
    fn from(v: &Var) -> Expr {
        v.expr()
    }
}

/// An update stage: left-hand-side coordinates, right-hand-side values,
/// and the reduction domain scoping any reduction variables.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateDef {
    pub args: Vec<Expr>,
    pub values: Vec<Expr>,
    pub rdom: Option<ReductionDomain>,
}

/// A named function in the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct Func {
    name: Name,
    args: Vec<Name>,
    values: Vec<Expr>,
    updates: Vec<UpdateDef>,
    schedule: Schedule,
}

impl Func {
    /// A new, undefined function.
    pub fn new(name: impl Into<Name>) -> Func {
        Func {
            name: name.into(),
            args: Vec::new(),
            values: Vec::new(),
            updates: Vec::new(),
            schedule: Schedule::new(&[]),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// The pure variables, innermost (fastest-varying) first.
    pub fn args(&self) -> &[Name] {
        &self.args
    }

    /// The pure definition's values; one per output.
    pub fn values(&self) -> &[Expr] {
        &self.values
    }

    pub fn updates(&self) -> &[UpdateDef] {
        &self.updates
    }

    pub fn defined(&self) -> bool {
        !self.values.is_empty()
    }

    /// The number of outputs. Zero until defined.
    pub fn outputs(&self) -> usize {
        self.values.len()
    }

    /// The value types, one per output.
    pub fn output_types(&self) -> Vec<Type> {
        self.values.iter().map(Expr::ty).collect()
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn schedule_mut(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    /// Set the pure definition. Fixes the argument list and output arity.
    pub fn define(&mut self, args: &[Var], values: Vec<Expr>) -> CompileResult<()> {
        if self.defined() {
            return Err(CompileError::ir_type_bare(format!(
                "function `{}` already has a pure definition",
                self.name
            )));
        }
        if values.is_empty() {
            return Err(CompileError::arity(self.name.as_str(), 1, 0));
        }
        self.args = args.iter().map(|v| v.name().clone()).collect();
        self.schedule = Schedule::new(&self.args);
        self.values = values;
        Ok(())
    }

    /// Append an update definition. The right-hand side may reference this
    /// function's current value, making the stage a reduction.
    pub fn update(
        &mut self,
        args: Vec<Expr>,
        values: Vec<Expr>,
        rdom: Option<&RDom>,
    ) -> CompileResult<()> {
        if !self.defined() {
            return Err(CompileError::ir_type_bare(format!(
                "function `{}` needs a pure definition before updates",
                self.name
            )));
        }
        if values.len() != self.values.len() {
            return Err(CompileError::arity(
                self.name.as_str(),
                self.values.len(),
                values.len(),
            ));
        }
        if args.len() != self.args.len() {
            return Err(CompileError::arity(
                self.name.as_str(),
                self.args.len(),
                args.len(),
            ));
        }
        for (i, (new, pure)) in values.iter().zip(&self.values).enumerate() {
            if new.ty() != pure.ty() {
                return Err(CompileError::ir_type(
                    format!(
                        "update value {i} of `{}` has type `{}`, the pure definition has `{}`",
                        self.name,
                        new.ty(),
                        pure.ty()
                    ),
                    new.to_string(),
                ));
            }
        }
        let mut args_cast = Vec::with_capacity(args.len());
        for a in args {
            args_cast.push(Expr::cast(Type::int32(), a)?);
        }
        self.updates.push(UpdateDef {
            args: args_cast,
            values,
            rdom: rdom.map(|r| r.domain().clone()),
        });
        Ok(())
    }

    /// Call this function at the given coordinates.
    ///
    /// Panics when the function is undefined or the coordinate count is
    /// wrong; sugar for algorithm construction, like the arithmetic
    /// operators.
    pub fn at(&self, coords: impl IntoIterator<Item = Expr>) -> Expr {
        match self.try_at_index(0, coords) {
            Ok(e) => e,
            Err(e) => panic!("{e}"),
        }
    }

    /// Call output `index` of a tuple-valued function.
    pub fn at_index(&self, index: usize, coords: impl IntoIterator<Item = Expr>) -> Expr {
        match self.try_at_index(index, coords) {
            Ok(e) => e,
            Err(e) => panic!("{e}"),
        }
    }

    /// Checked form of [`Func::at`] and [`Func::at_index`].
    pub fn try_at_index(
        &self,
        index: usize,
        coords: impl IntoIterator<Item = Expr>,
    ) -> CompileResult<Expr> {
        if !self.defined() {
            return Err(CompileError::ir_type_bare(format!(
                "function `{}` called before it is defined",
                self.name
            )));
        }
        let Some(value) = self.values.get(index) else {
            return Err(CompileError::arity(self.name.as_str(), self.values.len(), index));
        };
        let mut args = Vec::with_capacity(self.args.len());
        for coord in coords {
            args.push(Expr::cast(Type::int32(), coord)?);
        }
        if args.len() != self.args.len() {
            return Err(CompileError::arity(
                self.name.as_str(),
                self.args.len(),
                args.len(),
            ));
        }
        Expr::call(value.ty(), self.name.clone(), args, CallKind::Func, index)
    }

    /// Rewrite every definition expression through `f`. Lowering uses
    /// this to substitute inline producers into their consumers.
    pub fn map_definitions<F>(&mut self, mut f: F) -> CompileResult<()>
    where
        F: FnMut(&Expr) -> CompileResult<Expr>,
    {
        for v in &mut self.values {
            *v = f(v)?;
        }
        for u in &mut self.updates {
            for v in &mut u.values {
                *v = f(v)?;
            }
            for a in &mut u.args {
                *a = f(a)?;
            }
        }
        Ok(())
    }

    // Schedule directives, forwarding with this function's name.

    pub fn split(
        &mut self,
        old: &Var,
        outer: &Var,
        inner: &Var,
        factor: i64,
        tail: TailStrategy,
    ) -> CompileResult<&mut Func> {
        let name = self.name.clone();
        self.schedule.split(
            &name,
            old.name(),
            outer.name().clone(),
            inner.name().clone(),
            Expr::int(factor),
            tail,
        )?;
        Ok(self)
    }

    #[allow(clippy::too_many_arguments, reason = "mirrors the directive's arity")]
    pub fn tile(
        &mut self,
        x: &Var,
        y: &Var,
        xo: &Var,
        yo: &Var,
        xi: &Var,
        yi: &Var,
        xfactor: i64,
        yfactor: i64,
    ) -> CompileResult<&mut Func> {
        let name = self.name.clone();
        self.schedule.tile(
            &name,
            x.name(),
            y.name(),
            xo.name().clone(),
            yo.name().clone(),
            xi.name().clone(),
            yi.name().clone(),
            Expr::int(xfactor),
            Expr::int(yfactor),
        )?;
        Ok(self)
    }

    pub fn reorder(&mut self, order: &[&Var]) -> CompileResult<&mut Func> {
        let name = self.name.clone();
        let order: Vec<&str> = order.iter().map(|v| v.name().as_str()).collect();
        self.schedule.reorder(&name, &order)?;
        Ok(self)
    }

    /// Swap two adjacent loops. Non-adjacent pairs are rejected.
    pub fn transpose(&mut self, a: &Var, b: &Var) -> CompileResult<&mut Func> {
        let name = self.name.clone();
        self.schedule.transpose(&name, a.name(), b.name())?;
        Ok(self)
    }

    pub fn fuse(&mut self, outer: &Var, inner: &Var, fused: &Var) -> CompileResult<&mut Func> {
        let name = self.name.clone();
        self.schedule
            .fuse(&name, outer.name(), inner.name(), fused.name().clone())?;
        Ok(self)
    }

    pub fn parallel(&mut self, var: &Var) -> CompileResult<&mut Func> {
        let name = self.name.clone();
        self.schedule.parallel(&name, var.name())?;
        Ok(self)
    }

    pub fn vectorize(&mut self, var: &Var, width: u16) -> CompileResult<&mut Func> {
        let name = self.name.clone();
        self.schedule.vectorize(&name, var.name(), width)?;
        Ok(self)
    }

    pub fn unroll(&mut self, var: &Var, factor: u16) -> CompileResult<&mut Func> {
        let name = self.name.clone();
        self.schedule.unroll(&name, var.name(), factor)?;
        Ok(self)
    }

    pub fn gpu_blocks(&mut self, vars: &[&Var]) -> CompileResult<&mut Func> {
        let name = self.name.clone();
        let names: Vec<Name> = vars.iter().map(|v| v.name().clone()).collect();
        self.schedule.gpu_blocks(&name, &names)?;
        Ok(self)
    }

    pub fn gpu_threads(&mut self, vars: &[&Var]) -> CompileResult<&mut Func> {
        let name = self.name.clone();
        let names: Vec<Name> = vars.iter().map(|v| v.name().clone()).collect();
        self.schedule.gpu_threads(&name, &names)?;
        Ok(self)
    }

    pub fn compute_at(&mut self, consumer: &Func, var: &Var) -> &mut Func {
        self.schedule
            .compute_at(consumer.name().clone(), var.name().clone());
        self
    }

    pub fn store_at(&mut self, consumer: &Func, var: &Var) -> &mut Func {
        self.schedule
            .store_at(consumer.name().clone(), var.name().clone());
        self
    }

    pub fn store_root(&mut self) -> &mut Func {
        self.schedule.store_root();
        self
    }

    pub fn compute_root(&mut self) -> &mut Func {
        self.schedule.compute_root();
        self
    }

    pub fn compute_inline(&mut self) -> &mut Func {
        self.schedule.compute_inline();
        self
    }

    pub fn bound(&mut self, var: &Var, min: i64, extent: i64) -> &mut Func {
        self.schedule
            .bound(var.name().clone(), Expr::int(min), Expr::int(extent));
        self
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::RDom;
    use pretty_assertions::assert_eq;

    #[test]
    fn define_fixes_arity() {
        let x = Var::new("x");
        let mut f = Func::new("f");
        f.define(&[x.clone()], vec![Expr::int(0)]).unwrap();
        assert_eq!(f.outputs(), 1);
        assert!(f.define(&[x], vec![Expr::int(1)]).is_err());
    }

    #[test]
    fn update_arity_must_match() {
        let x = Var::new("x");
        let mut f = Func::new("f");
        f.define(&[x.clone()], vec![Expr::int(0)]).unwrap();
        let err = f
            .update(vec![x.expr()], vec![Expr::int(1), Expr::int(2)], None)
            .unwrap_err();
        assert_eq!(err, CompileError::arity("f", 1, 2));
    }

    #[test]
    fn update_value_types_must_match() {
        let x = Var::new("x");
        let mut f = Func::new("f");
        f.define(&[x.clone()], vec![Expr::int(0)]).unwrap();
        assert!(f
            .update(vec![x.expr()], vec![Expr::float(1.0)], None)
            .is_err());
    }

    #[test]
    fn reduction_updates_may_reference_self() {
        let x = Var::new("x");
        let mut f = Func::new("f");
        f.define(&[x.clone()], vec![Expr::int(0)]).unwrap();
        let r = RDom::over("r", Expr::int(0), Expr::int(10)).unwrap();
        let rhs = f.at([x.expr()]) + r.x().expr();
        f.update(vec![x.expr()], vec![rhs], Some(&r)).unwrap();
        assert_eq!(f.updates().len(), 1);
        assert!(f.updates()[0].rdom.is_some());
    }

    #[test]
    #[should_panic(expected = "called before it is defined")]
    fn calling_undefined_function_panics() {
        let f = Func::new("f");
        let _ = f.at([Expr::var("x")]);
    }

    #[test]
    fn call_carries_value_index() {
        let x = Var::new("x");
        let mut f = Func::new("f");
        f.define(&[x.clone()], vec![Expr::int(0), Expr::float(0.0)])
            .unwrap();
        let second = f.at_index(1, [x.expr()]);
        assert_eq!(second.ty(), weft_ir::Type::float(32));
    }

    #[test]
    fn directives_flow_through_to_the_schedule() {
        let (x, y) = (Var::new("x"), Var::new("y"));
        let mut f = Func::new("f");
        f.define(&[x.clone(), y.clone()], vec![Expr::int(0)]).unwrap();
        f.parallel(&y).unwrap();
        f.vectorize(&x, 8).unwrap();
        let names: Vec<_> = f
            .schedule()
            .dims()
            .iter()
            .map(|d| d.name.to_string())
            .collect();
        assert_eq!(names, ["y", "x", "x.v"]);
    }
}
