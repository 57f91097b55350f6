//! Checked node builders.
//!
//! Every construction entry point type-checks its operands and performs the
//! simple algebraic canonicalizations the rest of the compiler depends on:
//! literal operands fold, identity operations (`x + 0`, `x * 1`) vanish,
//! and subtraction of a literal normalizes to addition of its negation.
//! Passes that rebuild nodes through these builders therefore re-simplify
//! for free; there is no separate simplifier.
//!
//! Integer division and modulo fold with round-toward-negative-infinity
//! semantics, which is what the lowered code computes.
//!
//! The operator impls at the bottom are sugar for algorithm construction;
//! they promote operand types and panic only when no promotion exists
//! (documented on each impl). Compiler passes use the `CompileResult`
//! builders and `?` instead.

use weft_diagnostic::{CompileError, CompileResult};

use crate::{BinOp, CallKind, CmpOp, Expr, ExprKind, Name, Type, TypeCode};

impl Expr {
    /// A 32-bit signed integer immediate.
    pub fn int(value: i64) -> Expr {
        Expr::from_node(Type::int32(), ExprKind::IntImm(value))
    }

    /// A 32-bit unsigned integer immediate.
    pub fn uint(value: u64) -> Expr {
        Expr::from_node(Type::uint(32), ExprKind::UIntImm(value))
    }

    /// A 32-bit float immediate.
    pub fn float(value: f64) -> Expr {
        Expr::from_node(Type::float(32), ExprKind::FloatImm(value))
    }

    /// A string immediate, used for assert messages and intrinsic tags.
    pub fn string(value: impl Into<Name>) -> Expr {
        Expr::from_node(Type::handle(), ExprKind::StringImm(value.into()))
    }

    /// The boolean constants.
    pub fn const_true() -> Expr {
        Expr::from_node(Type::bool_type(), ExprKind::UIntImm(1))
    }

    pub fn const_false() -> Expr {
        Expr::from_node(Type::bool_type(), ExprKind::UIntImm(0))
    }

    /// An immediate of an arbitrary scalar type holding `value`, wrapped
    /// to the type's width so folded constants match what the compiled
    /// arithmetic computes.
    pub fn imm(ty: Type, value: i64) -> CompileResult<Expr> {
        if !ty.is_scalar() {
            return Err(CompileError::ir_type_bare(format!(
                "immediate of vector type `{ty}`"
            )));
        }
        let kind = match ty.code {
            TypeCode::Int => {
                let v = if ty.bits < 64 {
                    let shift = 64 - u32::from(ty.bits);
                    (value << shift) >> shift
                } else {
                    value
                };
                ExprKind::IntImm(v)
            }
            #[allow(clippy::cast_sign_loss, reason = "wrapping conversion is the immediate semantics")]
            TypeCode::UInt => {
                let v = value as u64;
                let v = if ty.bits < 64 {
                    v & ((1u64 << ty.bits) - 1)
                } else {
                    v
                };
                ExprKind::UIntImm(v)
            }
            #[allow(clippy::cast_precision_loss, reason = "float immediates are f64")]
            TypeCode::Float => ExprKind::FloatImm(value as f64),
            TypeCode::Handle => {
                return Err(CompileError::ir_type_bare("immediate of handle type"))
            }
        };
        Ok(Expr::from_node(ty, kind))
    }

    /// A loop-index variable: a 32-bit integer `Var`.
    pub fn var(name: impl Into<Name>) -> Expr {
        Expr::var_of(Type::int32(), name)
    }

    /// A variable of an arbitrary type (e.g. a `handle` buffer reference).
    pub fn var_of(ty: Type, name: impl Into<Name>) -> Expr {
        Expr::from_node(ty, ExprKind::Var(name.into()))
    }

    /// Convert `value` to `ty`. Lane counts must agree; converting to the
    /// value's own type is the identity; literal operands fold.
    pub fn cast(ty: Type, value: Expr) -> CompileResult<Expr> {
        if ty.lanes != value.ty().lanes {
            return Err(CompileError::ir_type(
                format!("cast from `{}` to `{ty}` changes lanes", value.ty()),
                value.to_string(),
            ));
        }
        if ty == value.ty() {
            return Ok(value);
        }
        if ty.is_scalar() {
            match (value.kind(), ty.code) {
                (&ExprKind::IntImm(v), TypeCode::Int | TypeCode::UInt) => {
                    return Expr::imm(ty, v);
                }
                (&ExprKind::IntImm(v), TypeCode::Float) => {
                    #[allow(clippy::cast_precision_loss, reason = "immediate conversion")]
                    return Ok(Expr::from_node(ty, ExprKind::FloatImm(v as f64)));
                }
                (&ExprKind::UIntImm(v), TypeCode::Int | TypeCode::UInt) => {
                    #[allow(clippy::cast_possible_wrap, reason = "wrapping conversion")]
                    return Expr::imm(ty, v as i64);
                }
                (&ExprKind::UIntImm(v), TypeCode::Float) => {
                    #[allow(clippy::cast_precision_loss, reason = "immediate conversion")]
                    return Ok(Expr::from_node(ty, ExprKind::FloatImm(v as f64)));
                }
                (&ExprKind::FloatImm(v), TypeCode::Int | TypeCode::UInt) => {
                    #[allow(clippy::cast_possible_truncation, reason = "cast truncates toward zero")]
                    return Expr::imm(ty, v as i64);
                }
                (&ExprKind::FloatImm(v), TypeCode::Float) => {
                    return Ok(Expr::from_node(ty, ExprKind::FloatImm(v)));
                }
                _ => {}
            }
        }
        Ok(Expr::from_node(ty, ExprKind::Cast(value)))
    }

    /// Binary arithmetic with promotion, folding, and identity elimination.
    pub fn binary(op: BinOp, a: Expr, b: Expr) -> CompileResult<Expr> {
        let ty = Type::match_types(a.ty(), b.ty()).map_err(|e| match e {
            CompileError::IrType { message, .. } => {
                CompileError::ir_type(message, format!("({a} {} {b})", op.symbol()))
            }
            other => other,
        })?;
        if ty.is_handle() {
            return Err(CompileError::ir_type(
                "arithmetic on handle type",
                format!("({a} {} {b})", op.symbol()),
            ));
        }
        let a = broadcast_to(a, ty)?;
        let b = broadcast_to(b, ty)?;

        // Literal folding.
        if let Some(folded) = fold_binary(op, ty, &a, &b)? {
            return Ok(folded);
        }

        // Identity elimination.
        match op {
            BinOp::Add => {
                if b.is_zero() {
                    return Ok(a);
                }
                if a.is_zero() {
                    return Ok(b);
                }
            }
            BinOp::Sub => {
                if b.is_zero() {
                    return Ok(a);
                }
                // Normalize subtraction of a literal to addition of the
                // negated literal, so bounds expressions take one shape.
                match b.kind() {
                    &ExprKind::IntImm(c) if ty.is_int() => {
                        return Expr::binary(BinOp::Add, a, Expr::imm(ty, -c)?);
                    }
                    &ExprKind::FloatImm(c) => {
                        return Expr::binary(
                            BinOp::Add,
                            a,
                            Expr::from_node(ty, ExprKind::FloatImm(-c)),
                        );
                    }
                    _ => {}
                }
            }
            BinOp::Mul => {
                if b.is_one() {
                    return Ok(a);
                }
                if a.is_one() {
                    return Ok(b);
                }
                if a.is_zero() {
                    return Ok(a);
                }
                if b.is_zero() {
                    return Ok(b);
                }
            }
            BinOp::Div => {
                if b.is_one() {
                    return Ok(a);
                }
            }
            BinOp::Mod => {
                if b.is_one() {
                    return Expr::imm(ty, 0);
                }
            }
            BinOp::Min | BinOp::Max => {
                if a == b {
                    return Ok(a);
                }
            }
        }

        Ok(Expr::from_node(ty, ExprKind::Binary { op, a, b }))
    }

    /// Shorthand for `binary(Min, ..)`.
    pub fn min(a: Expr, b: Expr) -> CompileResult<Expr> {
        Expr::binary(BinOp::Min, a, b)
    }

    /// Shorthand for `binary(Max, ..)`.
    pub fn max(a: Expr, b: Expr) -> CompileResult<Expr> {
        Expr::binary(BinOp::Max, a, b)
    }

    /// Comparison; the result is boolean with the promoted lane count.
    pub fn cmp(op: CmpOp, a: Expr, b: Expr) -> CompileResult<Expr> {
        let ty = Type::match_types(a.ty(), b.ty()).map_err(|e| match e {
            CompileError::IrType { message, .. } => {
                CompileError::ir_type(message, format!("({a} {} {b})", op.symbol()))
            }
            other => other,
        })?;
        let a = broadcast_to(a, ty)?;
        let b = broadcast_to(b, ty)?;
        let result_ty = Type::bool_type().with_lanes(ty.lanes);

        if let Some(ord) = const_compare(&a, &b) {
            let holds = match op {
                CmpOp::Eq => ord == std::cmp::Ordering::Equal,
                CmpOp::Ne => ord != std::cmp::Ordering::Equal,
                CmpOp::Lt => ord == std::cmp::Ordering::Less,
                CmpOp::Le => ord != std::cmp::Ordering::Greater,
                CmpOp::Gt => ord == std::cmp::Ordering::Greater,
                CmpOp::Ge => ord != std::cmp::Ordering::Less,
            };
            return Ok(Expr::from_node(result_ty, ExprKind::UIntImm(u64::from(holds))));
        }

        Ok(Expr::from_node(result_ty, ExprKind::Cmp { op, a, b }))
    }

    /// Logical and. Operands must be boolean with matching lanes.
    pub fn and(a: Expr, b: Expr) -> CompileResult<Expr> {
        check_boolean("&&", &a, &b)?;
        if let Some(v) = a.as_const_uint() {
            return Ok(if v != 0 { b } else { a });
        }
        if let Some(v) = b.as_const_uint() {
            return Ok(if v != 0 { a } else { b });
        }
        let ty = a.ty();
        Ok(Expr::from_node(ty, ExprKind::And { a, b }))
    }

    /// Logical or.
    pub fn or(a: Expr, b: Expr) -> CompileResult<Expr> {
        check_boolean("||", &a, &b)?;
        if let Some(v) = a.as_const_uint() {
            return Ok(if v != 0 { a } else { b });
        }
        if let Some(v) = b.as_const_uint() {
            return Ok(if v != 0 { b } else { a });
        }
        let ty = a.ty();
        Ok(Expr::from_node(ty, ExprKind::Or { a, b }))
    }

    /// Logical not.
    pub fn not(value: Expr) -> CompileResult<Expr> {
        if !value.ty().element_of().is_bool() {
            return Err(CompileError::ir_type(
                format!("`!` requires a boolean operand, found `{}`", value.ty()),
                value.to_string(),
            ));
        }
        if let Some(v) = value.as_const_uint() {
            let ty = value.ty();
            return Ok(Expr::from_node(ty, ExprKind::UIntImm(u64::from(v == 0))));
        }
        if let ExprKind::Not(inner) = value.kind() {
            return Ok(inner.clone());
        }
        let ty = value.ty();
        Ok(Expr::from_node(ty, ExprKind::Not(value)))
    }

    /// Select between two values of a common type.
    pub fn select(condition: Expr, true_value: Expr, false_value: Expr) -> CompileResult<Expr> {
        if !condition.ty().element_of().is_bool() {
            return Err(CompileError::ir_type(
                format!("select condition must be boolean, found `{}`", condition.ty()),
                condition.to_string(),
            ));
        }
        let ty = Type::match_types(true_value.ty(), false_value.ty())?;
        let true_value = broadcast_to(true_value, ty)?;
        let false_value = broadcast_to(false_value, ty)?;
        if condition.ty().lanes != 1 && condition.ty().lanes != ty.lanes {
            return Err(CompileError::ir_type_bare(format!(
                "select condition has {} lanes but values have {}",
                condition.ty().lanes,
                ty.lanes
            )));
        }
        if let Some(v) = condition.as_const_uint() {
            return Ok(if v != 0 { true_value } else { false_value });
        }
        if true_value == false_value {
            return Ok(true_value);
        }
        Ok(Expr::from_node(
            ty,
            ExprKind::Select {
                condition,
                true_value,
                false_value,
            },
        ))
    }

    /// A read of `name` at `index`, producing a value of type `ty`.
    /// Vector loads carry a vector index with matching lanes.
    pub fn load(ty: Type, name: impl Into<Name>, index: Expr) -> CompileResult<Expr> {
        if !index.ty().element_of().is_int() {
            return Err(CompileError::ir_type(
                format!("load index must be an integer, found `{}`", index.ty()),
                index.to_string(),
            ));
        }
        if index.ty().lanes != ty.lanes {
            return Err(CompileError::ir_type(
                format!(
                    "load of `{ty}` requires a {}-lane index, found {}",
                    ty.lanes,
                    index.ty().lanes
                ),
                index.to_string(),
            ));
        }
        Ok(Expr::from_node(ty, ExprKind::Load { name: name.into(), index }))
    }

    /// The vector `[base, base+stride, …]` over `lanes` lanes.
    pub fn ramp(base: Expr, stride: Expr, lanes: u16) -> CompileResult<Expr> {
        if lanes < 2 {
            return Err(CompileError::ir_type_bare("ramp needs at least two lanes"));
        }
        if !base.ty().is_scalar() || !base.ty().is_int() {
            return Err(CompileError::ir_type(
                format!("ramp base must be a scalar integer, found `{}`", base.ty()),
                base.to_string(),
            ));
        }
        let stride = Expr::cast(base.ty(), stride)?;
        let ty = base.ty().with_lanes(lanes);
        Ok(Expr::from_node(ty, ExprKind::Ramp { base, stride, lanes }))
    }

    /// `value` replicated across `lanes` lanes.
    pub fn broadcast(value: Expr, lanes: u16) -> CompileResult<Expr> {
        if lanes < 2 {
            return Err(CompileError::ir_type_bare(
                "broadcast needs at least two lanes",
            ));
        }
        if !value.ty().is_scalar() {
            return Err(CompileError::ir_type(
                format!("broadcast of non-scalar `{}`", value.ty()),
                value.to_string(),
            ));
        }
        let ty = value.ty().with_lanes(lanes);
        Ok(Expr::from_node(ty, ExprKind::Broadcast { value, lanes }))
    }

    /// `let name = value in body`.
    pub fn let_in(name: impl Into<Name>, value: Expr, body: Expr) -> Expr {
        let ty = body.ty();
        Expr::from_node(
            ty,
            ExprKind::Let {
                name: name.into(),
                value,
                body,
            },
        )
    }

    /// A call node. `value_index` selects the output of a tuple-valued
    /// function and must be 0 for the other call kinds.
    pub fn call(
        ty: Type,
        name: impl Into<Name>,
        args: Vec<Expr>,
        kind: CallKind,
        value_index: usize,
    ) -> CompileResult<Expr> {
        if value_index != 0 && kind != CallKind::Func {
            return Err(CompileError::ir_type_bare(
                "value_index is only meaningful on pipeline function calls",
            ));
        }
        Ok(Expr::from_node(
            ty,
            ExprKind::Call {
                name: name.into(),
                args,
                kind,
                value_index,
            },
        ))
    }

    /// An intrinsic call.
    pub fn intrinsic(ty: Type, name: impl Into<Name>, args: Vec<Expr>) -> Expr {
        Expr::from_node(
            ty,
            ExprKind::Call {
                name: name.into(),
                args,
                kind: CallKind::Intrinsic,
                value_index: 0,
            },
        )
    }

    /// Build a call to an external C symbol returning `ty`.
    ///
    /// This is the variadic replacement for per-arity extern macros: one
    /// builder, any argument count, and optional per-argument checking via
    /// [`Expr::extern_call_checked`].
    pub fn extern_call(ty: Type, name: impl Into<Name>, args: Vec<Expr>) -> Expr {
        Expr::from_node(
            ty,
            ExprKind::Call {
                name: name.into(),
                args,
                kind: CallKind::Extern,
                value_index: 0,
            },
        )
    }

    /// Like [`Expr::extern_call`], but validates each argument against a
    /// declared parameter signature.
    pub fn extern_call_checked(
        ty: Type,
        name: impl Into<Name>,
        args: Vec<Expr>,
        params: &[Type],
    ) -> CompileResult<Expr> {
        let name = name.into();
        if args.len() != params.len() {
            return Err(CompileError::ir_type_bare(format!(
                "extern function `{name}` takes {} arguments, found {}",
                params.len(),
                args.len()
            )));
        }
        for (i, (arg, want)) in args.iter().zip(params).enumerate() {
            if arg.ty() != *want {
                return Err(CompileError::ir_type(
                    format!(
                        "argument {} to extern function `{name}` has type `{}`, expected `{want}`",
                        i + 1,
                        arg.ty()
                    ),
                    arg.to_string(),
                ));
            }
        }
        Ok(Expr::extern_call(ty, name, args))
    }

    /// The `lerp(zero, one, weight)` intrinsic. The back-end expansion in
    /// the lowering pipeline turns this into fixed-point arithmetic.
    pub fn lerp(zero: Expr, one: Expr, weight: Expr) -> CompileResult<Expr> {
        if zero.ty() != one.ty() {
            return Err(CompileError::ir_type(
                format!(
                    "lerp endpoints must share a type: `{}` vs `{}`",
                    zero.ty(),
                    one.ty()
                ),
                format!("lerp({zero}, {one}, {weight})"),
            ));
        }
        if !weight.ty().is_uint() && !weight.ty().is_float() {
            return Err(CompileError::ir_type(
                format!("lerp weight must be unsigned or float, found `{}`", weight.ty()),
                weight.to_string(),
            ));
        }
        let ty = zero.ty();
        Ok(Expr::intrinsic(ty, "lerp", vec![zero, one, weight]))
    }
}

/// Cast-or-broadcast `e` to exactly `ty` (same element type, maybe wider
/// lanes). Used after `match_types` has chosen the common type.
fn broadcast_to(e: Expr, ty: Type) -> CompileResult<Expr> {
    if e.ty() == ty {
        return Ok(e);
    }
    if e.ty().lanes == ty.lanes {
        return Expr::cast(ty, e);
    }
    let scalar = Expr::cast(ty.element_of(), e)?;
    Expr::broadcast(scalar, ty.lanes)
}

/// Round-toward-negative-infinity division, the integer semantics the
/// lowered code computes.
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn floor_mod(a: i64, b: i64) -> i64 {
    a - floor_div(a, b) * b
}

/// Fold a binary op over two literals, or return `None` when either operand
/// is not a literal (or folding would divide by zero).
fn fold_binary(op: BinOp, ty: Type, a: &Expr, b: &Expr) -> CompileResult<Option<Expr>> {
    match (a.kind(), b.kind()) {
        (ExprKind::IntImm(x), ExprKind::IntImm(y)) => {
            let (x, y) = (*x, *y);
            let v = match op {
                BinOp::Add => x.wrapping_add(y),
                BinOp::Sub => x.wrapping_sub(y),
                BinOp::Mul => x.wrapping_mul(y),
                BinOp::Div if y != 0 => floor_div(x, y),
                BinOp::Mod if y != 0 => floor_mod(x, y),
                BinOp::Min => x.min(y),
                BinOp::Max => x.max(y),
                BinOp::Div | BinOp::Mod => return Ok(None),
            };
            Expr::imm(ty, v).map(Some)
        }
        (ExprKind::UIntImm(x), ExprKind::UIntImm(y)) => {
            let (x, y) = (*x, *y);
            let v = match op {
                BinOp::Add => x.wrapping_add(y),
                BinOp::Sub => x.wrapping_sub(y),
                BinOp::Mul => x.wrapping_mul(y),
                BinOp::Div if y != 0 => x / y,
                BinOp::Mod if y != 0 => x % y,
                BinOp::Min => x.min(y),
                BinOp::Max => x.max(y),
                BinOp::Div | BinOp::Mod => return Ok(None),
            };
            #[allow(clippy::cast_possible_wrap, reason = "immediate storage is wrapping")]
            Expr::imm(ty, v as i64).map(Some)
        }
        (ExprKind::FloatImm(x), ExprKind::FloatImm(y)) => {
            let (x, y) = (*x, *y);
            let v = match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                BinOp::Mod => x - (x / y).floor() * y,
                BinOp::Min => x.min(y),
                BinOp::Max => x.max(y),
            };
            Ok(Some(Expr::from_node(ty, ExprKind::FloatImm(v))))
        }
        _ => Ok(None),
    }
}

/// Compare two literals of a common type.
fn const_compare(a: &Expr, b: &Expr) -> Option<std::cmp::Ordering> {
    match (a.kind(), b.kind()) {
        (ExprKind::IntImm(x), ExprKind::IntImm(y)) => Some(x.cmp(y)),
        (ExprKind::UIntImm(x), ExprKind::UIntImm(y)) => Some(x.cmp(y)),
        (ExprKind::FloatImm(x), ExprKind::FloatImm(y)) => x.partial_cmp(y),
        _ => None,
    }
}

fn check_boolean(op: &str, a: &Expr, b: &Expr) -> CompileResult<()> {
    for e in [a, b] {
        if !e.ty().element_of().is_bool() {
            return Err(CompileError::ir_type(
                format!("`{op}` requires boolean operands, found `{}`", e.ty()),
                e.to_string(),
            ));
        }
    }
    if a.ty().lanes != b.ty().lanes {
        return Err(CompileError::ir_type_bare(format!(
            "`{op}` operands have {} and {} lanes",
            a.ty().lanes,
            b.ty().lanes
        )));
    }
    Ok(())
}

/// Panic with the builder's error. The arithmetic operator impls are sugar
/// for algorithm construction, where a type mismatch is a bug in the
/// embedded program; compiler passes use the checked builders instead.
fn build_or_panic(result: CompileResult<Expr>) -> Expr {
    match result {
        Ok(e) => e,
        Err(e) => panic!("{e}"),
    }
}

macro_rules! expr_binop {
    ($trait_:ident, $method:ident, $op:expr) => {
        impl std::ops::$trait_ for Expr {
            type Output = Expr;

            /// Panics when the operand types cannot be promoted.
            fn $method(self, rhs: Expr) -> Expr {
                build_or_panic(Expr::binary($op, self, rhs))
            }
        }

        impl std::ops::$trait_<i64> for Expr {
            type Output = Expr;

            /// Panics when the operand types cannot be promoted.
            fn $method(self, rhs: i64) -> Expr {
                let rhs = build_or_panic(Expr::imm(self.ty().element_of(), rhs));
                build_or_panic(Expr::binary($op, self, rhs))
            }
        }

        impl std::ops::$trait_<Expr> for i64 {
            type Output = Expr;

            /// Panics when the operand types cannot be promoted.
            fn $method(self, rhs: Expr) -> Expr {
                let lhs = build_or_panic(Expr::imm(rhs.ty().element_of(), self));
                build_or_panic(Expr::binary($op, lhs, rhs))
            }
        }
    };
}

expr_binop!(Add, add, BinOp::Add);
expr_binop!(Sub, sub, BinOp::Sub);
expr_binop!(Mul, mul, BinOp::Mul);
expr_binop!(Div, div, BinOp::Div);
expr_binop!(Rem, rem, BinOp::Mod);

impl std::ops::Neg for Expr {
    type Output = Expr;

    /// Panics on handle operands.
    fn neg(self) -> Expr {
        let zero = build_or_panic(Expr::imm(self.ty().element_of(), 0));
        build_or_panic(Expr::binary(BinOp::Sub, zero, self))
    }
}
