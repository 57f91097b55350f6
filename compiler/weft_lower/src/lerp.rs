//! Lerp expansion.
//!
//! Code generators without a native lerp get the `lerp(zero, one,
//! weight)` intrinsic expanded here.
//!
//! An unsigned weight of `b` bits means fixed-point interpolation with
//! denominator `2^b − 1`: the products are computed at the smallest
//! standard integer width that holds `zero_bits + b + 1` bits (so the
//! weight loses no precision), with `+ (2^b − 1)/2` before the divide
//! for round-to-nearest. A floating-point weight interpolates in float
//! and rounds back to the endpoint type.

use weft_diagnostic::{CompileError, CompileResult};
use weft_ir::{
    mutate_expr_children, BinOp, CallKind, Expr, ExprKind, Mutator, Stmt, Type, TypeCode,
};

/// Expand every `lerp` intrinsic in the tree.
pub fn lower_lerps(stmt: &Stmt) -> CompileResult<Stmt> {
    let mut pass = LowerLerp;
    pass.mutate_stmt(stmt)
}

struct LowerLerp;

impl Mutator for LowerLerp {
    fn mutate_expr(&mut self, expr: &Expr) -> CompileResult<Expr> {
        if let ExprKind::Call {
            name,
            args,
            kind: CallKind::Intrinsic,
            ..
        } = expr.kind()
        {
            if name.as_str() == "lerp" && args.len() == 3 {
                let zero = self.mutate_expr(&args[0])?;
                let one = self.mutate_expr(&args[1])?;
                let weight = self.mutate_expr(&args[2])?;
                return expand_lerp(zero, one, weight);
            }
        }
        mutate_expr_children(self, expr)
    }
}

/// The smallest standard width holding `bits`.
fn standard_width(bits: u8) -> CompileResult<u8> {
    [16u8, 32, 64]
        .into_iter()
        .find(|w| *w >= bits)
        .ok_or_else(|| {
            CompileError::unsupported(format!("lerp intermediate needs {bits} bits"))
        })
}

fn expand_lerp(zero: Expr, one: Expr, weight: Expr) -> CompileResult<Expr> {
    let ty = zero.ty();

    if weight.ty().is_float() {
        // Interpolate in float: zero + (one - zero) * weight.
        let fty = Type::float(weight.ty().bits).with_lanes(ty.lanes);
        let zf = Expr::cast(fty, zero)?;
        let of = Expr::cast(fty, one)?;
        let span = Expr::binary(BinOp::Sub, of, zf.clone())?;
        let scaled = Expr::binary(BinOp::Mul, span, weight)?;
        let result = Expr::binary(BinOp::Add, zf, scaled)?;
        if ty.is_float() {
            return Expr::cast(ty, result);
        }
        // Round to nearest before converting back to the integer type.
        let rounded = Expr::binary(BinOp::Add, result, Expr::float(0.5))?;
        return Expr::cast(ty, rounded);
    }

    if !weight.ty().is_uint() {
        return Err(CompileError::ir_type(
            format!("lerp weight must be unsigned or float, found `{}`", weight.ty()),
            weight.to_string(),
        ));
    }
    if !ty.is_uint() || ty.bits == 1 {
        return Err(CompileError::unsupported(format!(
            "fixed-point lerp expects unsigned endpoints wider than a bit, found `{ty}`"
        )));
    }

    let weight_bits = weight.ty().bits;
    let wide_bits = standard_width(
        ty.bits
            .checked_add(weight_bits)
            .and_then(|b| b.checked_add(1))
            .ok_or_else(|| CompileError::unsupported("lerp intermediate overflows"))?,
    )?;
    let wide = Type::new(TypeCode::UInt, wide_bits, ty.lanes);

    let ones = (1i64 << weight_bits) - 1;
    let ones_wide = Expr::imm(wide.element_of(), ones)?;
    let half = Expr::imm(wide.element_of(), ones / 2)?;

    let zw = Expr::cast(wide, zero)?;
    let ow = Expr::cast(wide, one)?;
    let ww = Expr::cast(wide, weight)?;
    let inverse = Expr::binary(BinOp::Sub, ones_wide.clone(), ww.clone())?;

    let acc = Expr::binary(
        BinOp::Add,
        Expr::binary(
            BinOp::Add,
            Expr::binary(BinOp::Mul, zw, inverse)?,
            Expr::binary(BinOp::Mul, ow, ww)?,
        )?,
        half,
    )?;
    let scaled = Expr::binary(BinOp::Div, acc, ones_wide)?;
    Expr::cast(ty, scaled)
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn eval_fixed_lerp(zero: i64, one: i64, weight: i64) -> i64 {
        // Build with literal operands; the folding constructors evaluate
        // the whole expansion down to an immediate.
        let z = Expr::cast(Type::uint(8), Expr::int(zero)).unwrap();
        let o = Expr::cast(Type::uint(8), Expr::int(one)).unwrap();
        let w = Expr::cast(Type::uint(8), Expr::int(weight)).unwrap();
        let lerp = Expr::lerp(z, o, w).unwrap();
        let out = lower_lerps(&Stmt::evaluate(lerp)).unwrap();
        match out.kind() {
            weft_ir::StmtKind::Evaluate(e) => {
                i64::try_from(e.as_const_uint().unwrap_or_else(|| {
                    e.as_const_int().map(|v| u64::try_from(v).unwrap()).unwrap()
                }))
                .unwrap()
            }
            other => panic!("expected evaluate, got {other:?}"),
        }
    }

    #[test]
    fn endpoints_are_exact() {
        assert_eq!(eval_fixed_lerp(10, 250, 0), 10);
        assert_eq!(eval_fixed_lerp(10, 250, 255), 250);
    }

    #[test]
    fn midpoint_rounds_to_nearest() {
        // weight 128 of 255 is just past the midpoint of [0, 255].
        assert_eq!(eval_fixed_lerp(0, 255, 128), 128);
        assert_eq!(eval_fixed_lerp(0, 100, 128), 50);
    }

    #[test]
    fn intermediate_width_holds_the_weight() {
        // u8 endpoints with a u8 weight need 17 bits: the expansion
        // must compute in u32.
        let z = Expr::var_of(Type::uint(8), "z");
        let o = Expr::var_of(Type::uint(8), "o");
        let w = Expr::var_of(Type::uint(8), "w");
        let lerp = Expr::lerp(z, o, w).unwrap();
        let out = lower_lerps(&Stmt::evaluate(lerp)).unwrap();
        let printed = out.to_string();
        assert!(printed.contains("uint32("), "{printed}");
        assert!(!printed.contains("lerp"), "{printed}");
    }

    #[test]
    fn float_weight_uses_float_arithmetic() {
        let z = Expr::var_of(Type::uint(8), "z");
        let o = Expr::var_of(Type::uint(8), "o");
        let w = Expr::var_of(Type::float(32), "w");
        let lerp = Expr::lerp(z, o, w).unwrap();
        let printed = lower_lerps(&Stmt::evaluate(lerp)).unwrap().to_string();
        assert!(printed.contains("float32("), "{printed}");
        assert!(printed.contains("+ 0.5f"), "{printed}");
    }
}
