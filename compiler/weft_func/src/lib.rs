//! Pipeline functions, reduction domains, and the schedule model.
//!
//! An algorithm is a set of [`Func`]s defined pointwise over integer
//! coordinates, reading each other and any [`ImageParam`] inputs. How each
//! function executes (tiling, vectorization, parallelism, and where it
//! materializes relative to its consumers) lives in its [`Schedule`],
//! mutated by directives until lowering reads it.

mod func;
mod image;
mod rdom;
mod schedule;

pub use func::{Func, UpdateDef, Var};
pub use image::ImageParam;
pub use rdom::{RDom, RVar, ReductionDomain, ReductionVariable};
pub use schedule::{Bound, Dim, DimTransform, Level, Schedule, TailStrategy};
