//! The schedule model.
//!
//! A [`Schedule`] records, for one function: the ordered loop nest over its
//! pure dimensions (outermost first), the dimension transforms (splits and
//! fusions, applied in directive order), explicit bound overrides, and the
//! store and compute levels that place the function relative to a consumer.
//!
//! Directives compose left to right and validate locally; placement
//! validity (does the consumer actually enclose the named loop?) is
//! checked at lowering, where the whole pipeline is in view.

use smallvec::SmallVec;
use weft_diagnostic::{CompileError, CompileResult};
use weft_ir::{DeviceApi, Expr, ForType, Name};

/// What happens to the iterations a split leaves over when the extent is
/// not a multiple of the factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TailStrategy {
    /// Round the outer extent up and guard the body with an `if`.
    GuardWithIf,
    /// Round the outer extent up; the tail iterations run as no-ops under
    /// the same guard, keeping the inner loop dense.
    RoundUp,
    /// Shift the last tile inwards so it re-covers already-computed sites.
    /// Only legal for pure definitions.
    ShiftInwards,
}

/// Where a function is stored or computed, relative to a consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Level {
    /// Substituted into every call site; never materialized.
    Inline,
    /// Materialized once, outside all consumer loops.
    Root,
    /// Materialized inside the loop `var` of `func`.
    At { func: Name, var: Name },
}

/// One dimension of the loop nest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dim {
    pub name: Name,
    pub for_type: ForType,
    pub device: DeviceApi,
}

/// A recorded split or fusion, applied in directive order at lowering.
#[derive(Clone, Debug, PartialEq)]
pub enum DimTransform {
    Split {
        old: Name,
        outer: Name,
        inner: Name,
        factor: Expr,
        tail: TailStrategy,
    },
    Fuse {
        outer: Name,
        inner: Name,
        fused: Name,
    },
}

/// An explicit bound override for one pure dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct Bound {
    pub var: Name,
    pub min: Expr,
    pub extent: Expr,
}

/// The complete schedule state for one function.
#[derive(Clone, Debug, PartialEq)]
pub struct Schedule {
    dims: SmallVec<[Dim; 4]>,
    transforms: Vec<DimTransform>,
    bounds: Vec<Bound>,
    store_level: Level,
    compute_level: Level,
}

impl Schedule {
    /// The default schedule over the given pure dimensions: serial host
    /// loops, innermost dimension first in `args` order, inline placement.
    pub fn new(args: &[Name]) -> Schedule {
        // args lists dimensions innermost-first (x varies fastest); the
        // loop nest stores outermost-first.
        let dims = args
            .iter()
            .rev()
            .map(|name| Dim {
                name: name.clone(),
                for_type: ForType::Serial,
                device: DeviceApi::Host,
            })
            .collect();
        Schedule {
            dims,
            transforms: Vec::new(),
            bounds: Vec::new(),
            store_level: Level::Inline,
            compute_level: Level::Inline,
        }
    }

    /// The loop nest, outermost first.
    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn transforms(&self) -> &[DimTransform] {
        &self.transforms
    }

    pub fn bounds(&self) -> &[Bound] {
        &self.bounds
    }

    pub fn store_level(&self) -> &Level {
        &self.store_level
    }

    pub fn compute_level(&self) -> &Level {
        &self.compute_level
    }

    fn dim_index(&self, func: &Name, name: &Name) -> CompileResult<usize> {
        self.dims
            .iter()
            .position(|d| d.name == *name)
            .ok_or_else(|| {
                CompileError::schedule(
                    func.as_str(),
                    format!("no dimension named `{name}` in the current loop nest"),
                )
            })
    }

    /// Replace `old` with `outer` and `inner`; `inner` iterates `factor`
    /// times per `outer` iteration.
    pub fn split(
        &mut self,
        func: &Name,
        old: &Name,
        outer: impl Into<Name>,
        inner: impl Into<Name>,
        factor: Expr,
        tail: TailStrategy,
    ) -> CompileResult<()> {
        let outer = outer.into();
        let inner = inner.into();
        if let Some(c) = factor.as_const_int() {
            if c < 1 {
                return Err(CompileError::schedule(
                    func.as_str(),
                    format!("split factor must be at least 1, found {c}"),
                ));
            }
        }
        // Applying the same split twice fails here: the first application
        // removed `old` from the nest.
        let idx = self.dim_index(func, old)?;
        if outer == inner {
            return Err(CompileError::schedule(
                func.as_str(),
                format!("split outer and inner share the name `{outer}`"),
            ));
        }
        // The outer child may reuse the consumed dimension's name (the
        // `vectorize`/`unroll` shorthand relies on it); any other
        // collision is an error.
        for name in [&outer, &inner] {
            if self
                .dims
                .iter()
                .enumerate()
                .any(|(i, d)| i != idx && d.name == *name)
            {
                return Err(CompileError::schedule(
                    func.as_str(),
                    format!("split would duplicate dimension `{name}`"),
                ));
            }
        }
        let old_dim = self.dims[idx].clone();
        self.dims[idx] = Dim {
            name: outer.clone(),
            ..old_dim.clone()
        };
        self.dims.insert(
            idx + 1,
            Dim {
                name: inner.clone(),
                ..old_dim
            },
        );
        self.transforms.push(DimTransform::Split {
            old: old.clone(),
            outer,
            inner,
            factor,
            tail,
        });
        Ok(())
    }

    /// Two splits plus a reorder, yielding the nest `yo, xo, yi, xi`
    /// (outermost first).
    #[allow(clippy::too_many_arguments, reason = "mirrors the directive's arity")]
    pub fn tile(
        &mut self,
        func: &Name,
        x: &Name,
        y: &Name,
        xo: impl Into<Name>,
        yo: impl Into<Name>,
        xi: impl Into<Name>,
        yi: impl Into<Name>,
        xfactor: Expr,
        yfactor: Expr,
    ) -> CompileResult<()> {
        let (xo, yo, xi, yi) = (xo.into(), yo.into(), xi.into(), yi.into());
        self.split(func, x, xo.clone(), xi.clone(), xfactor, TailStrategy::GuardWithIf)?;
        self.split(func, y, yo.clone(), yi.clone(), yfactor, TailStrategy::GuardWithIf)?;
        self.reorder(func, &[yo, xo, yi, xi])
    }

    /// Permute the named dimensions into the given order (outermost
    /// first), leaving unnamed dimensions where they are.
    pub fn reorder(&mut self, func: &Name, order: &[impl AsRef<str>]) -> CompileResult<()> {
        let mut positions = Vec::with_capacity(order.len());
        for name in order {
            let name = Name::new(name.as_ref());
            positions.push(self.dim_index(func, &name)?);
        }
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(CompileError::schedule(
                func.as_str(),
                "reorder names a dimension twice",
            ));
        }
        // Place the named dims into the named slots, in the given order.
        let picked: Vec<Dim> = positions.iter().map(|&i| self.dims[i].clone()).collect();
        for (slot, dim) in sorted.into_iter().zip(picked) {
            self.dims[slot] = dim;
        }
        Ok(())
    }

    /// Swap two adjacent dimensions. Rejects non-adjacent pairs: the
    /// intended tie-break for a distant pair is ambiguous, so the
    /// directive refuses to guess.
    pub fn transpose(&mut self, func: &Name, a: &Name, b: &Name) -> CompileResult<()> {
        let ia = self.dim_index(func, a)?;
        let ib = self.dim_index(func, b)?;
        if ia.abs_diff(ib) != 1 {
            return Err(CompileError::schedule(
                func.as_str(),
                format!("transpose of `{a}` and `{b}` requires adjacent loops"),
            ));
        }
        self.dims.swap(ia, ib);
        Ok(())
    }

    /// Replace the adjacent pair (`outer`, `inner`) with one loop of
    /// product extent.
    pub fn fuse(
        &mut self,
        func: &Name,
        outer: &Name,
        inner: &Name,
        fused: impl Into<Name>,
    ) -> CompileResult<()> {
        let fused = fused.into();
        let io = self.dim_index(func, outer)?;
        let ii = self.dim_index(func, inner)?;
        if ii != io + 1 {
            return Err(CompileError::schedule(
                func.as_str(),
                format!("fuse requires `{inner}` immediately inside `{outer}`"),
            ));
        }
        if self.dims.iter().any(|d| d.name == fused) {
            return Err(CompileError::schedule(
                func.as_str(),
                format!("fuse would duplicate dimension `{fused}`"),
            ));
        }
        let dim = self.dims[io].clone();
        self.dims.remove(ii);
        self.dims[io] = Dim {
            name: fused.clone(),
            ..dim
        };
        self.transforms.push(DimTransform::Fuse {
            outer: outer.clone(),
            inner: inner.clone(),
            fused,
        });
        Ok(())
    }

    fn mark(&mut self, func: &Name, name: &Name, for_type: ForType) -> CompileResult<()> {
        let idx = self.dim_index(func, name)?;
        self.dims[idx].for_type = for_type;
        Ok(())
    }

    /// Run iterations of `name` across worker threads.
    pub fn parallel(&mut self, func: &Name, name: &Name) -> CompileResult<()> {
        self.mark(func, name, ForType::Parallel)
    }

    /// Split `name` by `width` and execute the inner loop as one vector.
    /// The shift-inwards tail keeps the vector body dense; a tail guard
    /// would need a per-lane condition.
    pub fn vectorize(&mut self, func: &Name, name: &Name, width: u16) -> CompileResult<()> {
        let inner = name.dotted("v");
        self.split(
            func,
            name,
            name.clone(),
            inner.clone(),
            Expr::int(i64::from(width)),
            TailStrategy::ShiftInwards,
        )?;
        self.mark(func, &inner, ForType::Vectorized)
    }

    /// Split `name` by `factor` and fully unroll the inner loop.
    pub fn unroll(&mut self, func: &Name, name: &Name, factor: u16) -> CompileResult<()> {
        let inner = name.dotted("u");
        self.split(
            func,
            name,
            name.clone(),
            inner.clone(),
            Expr::int(i64::from(factor)),
            TailStrategy::ShiftInwards,
        )?;
        self.mark(func, &inner, ForType::Unrolled)
    }

    fn map_device(&mut self, func: &Name, names: &[Name], device: DeviceApi) -> CompileResult<()> {
        if names.len() > 3 {
            return Err(CompileError::schedule(
                func.as_str(),
                "at most three dimensions can map to GPU indices",
            ));
        }
        for name in names {
            let idx = self.dim_index(func, name)?;
            self.dims[idx].device = device;
            self.dims[idx].for_type = ForType::Parallel;
        }
        Ok(())
    }

    /// Map up to three dimensions to GPU block indices.
    pub fn gpu_blocks(&mut self, func: &Name, names: &[Name]) -> CompileResult<()> {
        self.map_device(func, names, DeviceApi::GpuBlock)
    }

    /// Map up to three dimensions to GPU thread indices.
    pub fn gpu_threads(&mut self, func: &Name, names: &[Name]) -> CompileResult<()> {
        self.map_device(func, names, DeviceApi::GpuThread)
    }

    /// Compute this function inside the loop `var` of `consumer`.
    pub fn compute_at(&mut self, consumer: impl Into<Name>, var: impl Into<Name>) {
        self.compute_level = Level::At {
            func: consumer.into(),
            var: var.into(),
        };
        if self.store_level == Level::Inline {
            self.store_level = self.compute_level.clone();
        }
    }

    /// Allocate this function's storage at the loop `var` of `consumer`.
    pub fn store_at(&mut self, consumer: impl Into<Name>, var: impl Into<Name>) {
        self.store_level = Level::At {
            func: consumer.into(),
            var: var.into(),
        };
    }

    /// Allocate at the root level while computing deeper.
    pub fn store_root(&mut self) {
        self.store_level = Level::Root;
    }

    /// Materialize once, outside all consumers.
    pub fn compute_root(&mut self) {
        self.compute_level = Level::Root;
        self.store_level = Level::Root;
    }

    /// Substitute into every call site.
    pub fn compute_inline(&mut self) {
        self.compute_level = Level::Inline;
        self.store_level = Level::Inline;
    }

    /// Override the inferred bounds of one pure dimension.
    pub fn bound(&mut self, var: impl Into<Name>, min: Expr, extent: Expr) {
        self.bounds.push(Bound {
            var: var.into(),
            min,
            extent,
        });
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(s: &Schedule) -> Vec<String> {
        s.dims().iter().map(|d| d.name.to_string()).collect()
    }

    fn new_schedule() -> (Name, Schedule) {
        let f = Name::new("f");
        let s = Schedule::new(&[Name::new("x"), Name::new("y")]);
        (f, s)
    }

    #[test]
    fn default_nest_is_outermost_last_arg() {
        let (_, s) = new_schedule();
        assert_eq!(names(&s), ["y", "x"]);
    }

    #[test]
    fn split_replaces_the_dimension_in_place() {
        let (f, mut s) = new_schedule();
        s.split(
            &f,
            &Name::new("x"),
            "xo",
            "xi",
            Expr::int(8),
            TailStrategy::GuardWithIf,
        )
        .unwrap();
        assert_eq!(names(&s), ["y", "xo", "xi"]);
    }

    #[test]
    fn same_split_twice_is_an_error() {
        let (f, mut s) = new_schedule();
        let x = Name::new("x");
        s.split(&f, &x, "xo", "xi", Expr::int(8), TailStrategy::GuardWithIf)
            .unwrap();
        let err = s
            .split(&f, &x, "xo2", "xi2", Expr::int(8), TailStrategy::GuardWithIf)
            .unwrap_err();
        assert!(err.to_string().contains("no dimension named `x`"));
    }

    #[test]
    fn split_factor_below_one_is_rejected() {
        let (f, mut s) = new_schedule();
        assert!(s
            .split(
                &f,
                &Name::new("x"),
                "xo",
                "xi",
                Expr::int(0),
                TailStrategy::GuardWithIf
            )
            .is_err());
    }

    #[test]
    fn tile_orders_the_nest() {
        let (f, mut s) = new_schedule();
        s.tile(
            &f,
            &Name::new("x"),
            &Name::new("y"),
            "xo",
            "yo",
            "xi",
            "yi",
            Expr::int(256),
            Expr::int(32),
        )
        .unwrap();
        assert_eq!(names(&s), ["yo", "xo", "yi", "xi"]);
    }

    #[test]
    fn noop_reorder_is_a_noop() {
        let (f, mut s) = new_schedule();
        let before = s.clone();
        s.reorder(&f, &["y", "x"]).unwrap();
        assert_eq!(s, before);
    }

    #[test]
    fn reorder_unknown_dim_fails() {
        let (f, mut s) = new_schedule();
        assert!(s.reorder(&f, &["z", "x"]).is_err());
    }

    #[test]
    fn vectorize_splits_and_marks() {
        let (f, mut s) = new_schedule();
        s.vectorize(&f, &Name::new("x"), 8).unwrap();
        assert_eq!(names(&s), ["y", "x", "x.v"]);
        assert_eq!(s.dims()[2].for_type, ForType::Vectorized);
    }

    #[test]
    fn transpose_requires_adjacency() {
        let f = Name::new("f");
        let mut s = Schedule::new(&[Name::new("x"), Name::new("y"), Name::new("z")]);
        // Nest is z, y, x; z and x are not adjacent.
        let err = s.transpose(&f, &Name::new("z"), &Name::new("x")).unwrap_err();
        assert!(err.to_string().contains("adjacent"));
        s.transpose(&f, &Name::new("z"), &Name::new("y")).unwrap();
        assert_eq!(names(&s), ["y", "z", "x"]);
    }

    #[test]
    fn fuse_requires_inner_inside_outer() {
        let (f, mut s) = new_schedule();
        s.fuse(&f, &Name::new("y"), &Name::new("x"), "yx").unwrap();
        assert_eq!(names(&s), ["yx"]);

        let (f, mut s) = new_schedule();
        assert!(s.fuse(&f, &Name::new("x"), &Name::new("y"), "xy").is_err());
    }

    #[test]
    fn gpu_mapping_limits_dimensions() {
        let f = Name::new("f");
        let mut s = Schedule::new(&[
            Name::new("a"),
            Name::new("b"),
            Name::new("c"),
            Name::new("d"),
        ]);
        let all: Vec<Name> = ["a", "b", "c", "d"].iter().map(|n| Name::new(n)).collect();
        assert!(s.gpu_blocks(&f, &all).is_err());
        assert!(s.gpu_blocks(&f, &all[..2]).is_ok());
        assert_eq!(s.dims()[3].device, DeviceApi::GpuBlock);
    }

    #[test]
    fn compute_at_defaults_store_level() {
        let (_, mut s) = new_schedule();
        s.compute_at("consumer", "xo");
        assert_eq!(s.store_level(), s.compute_level());
        s.store_at("consumer", "yo");
        assert_eq!(
            *s.store_level(),
            Level::At {
                func: Name::new("consumer"),
                var: Name::new("yo")
            }
        );
    }
}
