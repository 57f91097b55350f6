//! Demo pipelines for the command line.
//!
//! The 3×3 box blur in its classic schedules, reused by the CLI to show
//! lowered output and by manual benchmarking.

use weft_diagnostic::CompileResult;
use weft_func::{Func, ImageParam, Var};
use weft_ir::Type;

use crate::Pipeline;

/// How the blur should be scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlurSchedule {
    /// Tile the consumer, vectorize the inner columns, parallelize the
    /// outer rows, compute the first stage per tile column.
    Tiled,
    /// Substitute the first stage into the second everywhere.
    Inline,
    /// Both stages at the root, materialized in full.
    Breadth,
}

/// The two-stage box blur over a `width` × `height` output whose
/// coordinates start at (1, 1), so the stencil stays inside an input of
/// `width + 2` × `height + 2`. The tiled schedule wants `width` a
/// multiple of 16 and `height` a multiple of 8, keeping the vector body
/// free of tail guards.
pub fn blur(schedule: BlurSchedule, width: i64, height: i64) -> CompileResult<Pipeline> {
    let (x, y) = (Var::new("x"), Var::new("y"));
    let (xo, yo, xi, yi) = (
        Var::new("xo"),
        Var::new("yo"),
        Var::new("xi"),
        Var::new("yi"),
    );
    let input = ImageParam::new(Type::uint(16), 2, "input");

    let mut blur_x = Func::new("blur_x");
    blur_x.define(
        &[x.clone(), y.clone()],
        vec![
            (input.at([x.expr() - 1, y.expr()])
                + input.at([x.expr(), y.expr()])
                + input.at([x.expr() + 1, y.expr()]))
                / 3,
        ],
    )?;

    let mut blur_y = Func::new("blur_y");
    blur_y.define(
        &[x.clone(), y.clone()],
        vec![
            (blur_x.at([x.expr(), y.expr() - 1])
                + blur_x.at([x.expr(), y.expr()])
                + blur_x.at([x.expr(), y.expr() + 1]))
                / 3,
        ],
    )?;
    blur_y.bound(&x, 1, width);
    blur_y.bound(&y, 1, height);

    match schedule {
        BlurSchedule::Tiled => {
            blur_y.tile(&x, &y, &xo, &yo, &xi, &yi, 16, 8)?;
            blur_y.vectorize(&xi, 8)?;
            blur_y.parallel(&yo)?;
            blur_x.compute_at(&blur_y, &xo);
            blur_x.vectorize(&x, 8)?;
        }
        BlurSchedule::Inline => {
            blur_x.compute_inline();
        }
        BlurSchedule::Breadth => {
            blur_x.compute_root();
        }
    }

    Ok(Pipeline::new(blur_y).with_func(blur_x).with_image(input))
}
