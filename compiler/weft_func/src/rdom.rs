//! Reduction domains.
//!
//! A [`ReductionDomain`] is a rectangular integer iteration space traversed
//! in lexicographic order by each update definition that uses it. Its
//! dimensions are [`RVar`]s.
//!
//! Reduction variables share the user's namespace with pure variables, so
//! every internal name carries the `$r` suffix (`sum.x$r`). Pure variables
//! can never collide with that spelling, which is what prevents an update
//! like `f(x) += g(r)` from accidentally capturing a pure `r`.

use smallvec::SmallVec;
use weft_diagnostic::{CompileError, CompileResult};
use weft_ir::{Expr, Name, Type};

/// One dimension of a reduction domain: a name and a half-open interval.
#[derive(Clone, Debug, PartialEq)]
pub struct ReductionVariable {
    pub name: Name,
    pub min: Expr,
    pub extent: Expr,
}

/// An ordered rectangular iteration space.
#[derive(Clone, Debug, PartialEq)]
pub struct ReductionDomain {
    vars: SmallVec<[ReductionVariable; 4]>,
}

impl ReductionDomain {
    pub fn vars(&self) -> &[ReductionVariable] {
        &self.vars
    }

    pub fn dimensions(&self) -> usize {
        self.vars.len()
    }
}

/// A reduction variable, usable as an expression inside an update.
#[derive(Clone, Debug, PartialEq)]
pub struct RVar {
    name: Name,
    min: Expr,
    extent: Expr,
}

impl RVar {
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn min(&self) -> &Expr {
        &self.min
    }

    pub fn extent(&self) -> &Expr {
        &self.extent
    }

    /// This variable as a 32-bit integer expression.
    pub fn expr(&self) -> Expr {
        Expr::var(self.name.clone())
    }
}

impl From<&RVar> for Expr {
    fn from(v: &RVar) -> Expr {
        v.expr()
    }
}

/// A multi-dimensional reduction domain with up to four dimensions.
#[derive(Clone, Debug, PartialEq)]
pub struct RDom {
    name: Name,
    dom: ReductionDomain,
}

/// Dimension suffixes, in order.
const DIM_NAMES: [&str; 4] = ["x", "y", "z", "w"];

impl RDom {
    /// Build a domain from `(min, extent)` pairs, at most four.
    ///
    /// Bounds are cast to 32-bit integers; each dimension is named
    /// `<name>.<dim>$r`.
    pub fn new(
        name: impl Into<Name>,
        ranges: impl IntoIterator<Item = (Expr, Expr)>,
    ) -> CompileResult<RDom> {
        let name = name.into();
        let mut vars = SmallVec::new();
        for (i, (min, extent)) in ranges.into_iter().enumerate() {
            let Some(dim) = DIM_NAMES.get(i) else {
                return Err(CompileError::schedule(
                    name.as_str(),
                    "reduction domains have at most four dimensions",
                ));
            };
            let min = Expr::cast(Type::int32(), min)?;
            let extent = Expr::cast(Type::int32(), extent)?;
            vars.push(ReductionVariable {
                name: name.dotted(dim).with_suffix("$r"),
                min,
                extent,
            });
        }
        if vars.is_empty() {
            return Err(CompileError::schedule(
                name.as_str(),
                "reduction domain has no dimensions",
            ));
        }
        Ok(RDom {
            name,
            dom: ReductionDomain { vars },
        })
    }

    /// A one-dimensional domain over `[min, min+extent)`.
    pub fn over(name: impl Into<Name>, min: Expr, extent: Expr) -> CompileResult<RDom> {
        RDom::new(name, [(min, extent)])
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn domain(&self) -> &ReductionDomain {
        &self.dom
    }

    pub fn dimensions(&self) -> usize {
        self.dom.dimensions()
    }

    /// Dimension `i`, if present.
    pub fn dim(&self, i: usize) -> Option<RVar> {
        self.dom.vars.get(i).map(|v| RVar {
            name: v.name.clone(),
            min: v.min.clone(),
            extent: v.extent.clone(),
        })
    }

    /// The first dimension.
    ///
    /// Panics when absent, which cannot happen for a constructed domain.
    pub fn x(&self) -> RVar {
        self.require_dim(0)
    }

    /// The second dimension. Panics when the domain is one-dimensional.
    pub fn y(&self) -> RVar {
        self.require_dim(1)
    }

    /// The third dimension. Panics when absent.
    pub fn z(&self) -> RVar {
        self.require_dim(2)
    }

    /// The fourth dimension. Panics when absent.
    pub fn w(&self) -> RVar {
        self.require_dim(3)
    }

    fn require_dim(&self, i: usize) -> RVar {
        match self.dim(i) {
            Some(v) => v,
            None => panic!(
                "reduction domain `{}` has {} dimensions, no `{}`",
                self.name,
                self.dimensions(),
                DIM_NAMES[i]
            ),
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn one_dimensional_domain() {
        let r = RDom::over("r", Expr::int(0), Expr::int(1000)).unwrap();
        assert_eq!(r.dimensions(), 1);
        assert_eq!(r.x().name().as_str(), "r.x$r");
        assert_eq!(r.x().extent().as_const_int(), Some(1000));
    }

    #[test]
    fn names_carry_the_reduction_suffix() {
        let r = RDom::new(
            "r",
            [
                (Expr::int(0), Expr::int(4)),
                (Expr::int(0), Expr::int(8)),
            ],
        )
        .unwrap();
        let names: Vec<_> = r
            .domain()
            .vars()
            .iter()
            .map(|v| v.name.to_string())
            .collect();
        assert_eq!(names, ["r.x$r", "r.y$r"]);
    }

    #[test]
    fn bounds_are_cast_to_int32() {
        let r = RDom::over("r", Expr::uint(0), Expr::uint(10)).unwrap();
        assert_eq!(r.x().min().ty(), Type::int32());
    }

    #[test]
    fn too_many_dimensions_fail() {
        let ranges = (0..5).map(|_| (Expr::int(0), Expr::int(2)));
        assert!(RDom::new("r", ranges).is_err());
    }

    #[test]
    #[should_panic(expected = "no `y`")]
    fn missing_dimension_panics() {
        let r = RDom::over("r", Expr::int(0), Expr::int(4)).unwrap();
        let _ = r.y();
    }
}
