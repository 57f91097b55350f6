//! Input image parameters.
//!
//! An [`ImageParam`] names a buffer the pipeline reads but does not
//! define. Accessing one builds an image-kind call that storage lowering
//! turns into a flat load; bounds inference sizes the required region the
//! same way it does for producer functions.

use smallvec::SmallVec;
use weft_diagnostic::{CompileError, CompileResult};
use weft_ir::{CallKind, Expr, Name, Type};

/// A buffer argument to the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageParam {
    name: Name,
    ty: Type,
    dimensions: usize,
    /// Constrained minimum per dimension, where the user has declared one.
    min_constraints: SmallVec<[Option<i64>; 4]>,
}

impl ImageParam {
    pub fn new(ty: Type, dimensions: usize, name: impl Into<Name>) -> ImageParam {
        ImageParam {
            name: name.into(),
            ty,
            dimensions,
            min_constraints: (0..dimensions).map(|_| None).collect(),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Declare the minimum coordinate of one dimension. Texture targets
    /// require this on a third dimension; see the intrinsic injection
    /// pass.
    pub fn set_min(&mut self, dim: usize, min: i64) -> CompileResult<()> {
        match self.min_constraints.get_mut(dim) {
            Some(slot) => {
                *slot = Some(min);
                Ok(())
            }
            None => Err(CompileError::schedule(
                self.name.as_str(),
                format!("image has {} dimensions, no dimension {dim}", self.dimensions),
            )),
        }
    }

    pub fn min_constraint(&self, dim: usize) -> Option<i64> {
        self.min_constraints.get(dim).copied().flatten()
    }

    /// Read this image at the given coordinates.
    ///
    /// Panics when the coordinate count disagrees with the image's
    /// dimensionality; this is sugar for algorithm construction, like the
    /// arithmetic operators.
    pub fn at(&self, coords: impl IntoIterator<Item = Expr>) -> Expr {
        match self.try_at(coords) {
            Ok(e) => e,
            Err(e) => panic!("{e}"),
        }
    }

    /// Checked form of [`ImageParam::at`].
    pub fn try_at(&self, coords: impl IntoIterator<Item = Expr>) -> CompileResult<Expr> {
        let mut args = Vec::with_capacity(self.dimensions);
        for coord in coords {
            args.push(Expr::cast(Type::int32(), coord)?);
        }
        if args.len() != self.dimensions {
            return Err(CompileError::ir_type_bare(format!(
                "image `{}` has {} dimensions, called with {}",
                self.name,
                self.dimensions,
                args.len()
            )));
        }
        Expr::call(self.ty, self.name.clone(), args, CallKind::Image, 0)
    }
}
