//! Scalar and vector types.
//!
//! A [`Type`] is a type code (int, uint, float, handle), a bit width, and a
//! lane count. Scalars have one lane; vector types are written `int32x8`.
//!
//! Arithmetic between two expressions first runs both types through
//! [`Type::match_types`], which implements the promotion rules: equal types
//! pass through, scalars broadcast to the other operand's lanes, floats beat
//! integers, wider widths beat narrower ones, and signed beats unsigned at
//! equal width. Mismatched vector lane counts never promote.

use std::fmt;

use weft_diagnostic::{CompileError, CompileResult};

/// The four kinds of scalar element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeCode {
    /// Signed two's-complement integer.
    Int,
    /// Unsigned integer. `UInt` with one bit is the boolean type.
    UInt,
    /// IEEE floating point.
    Float,
    /// An opaque pointer-sized handle. Never promotes.
    Handle,
}

/// An element type together with a vector lane count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Type {
    pub code: TypeCode,
    pub bits: u8,
    pub lanes: u16,
}

impl Type {
    pub const fn new(code: TypeCode, bits: u8, lanes: u16) -> Type {
        Type { code, bits, lanes }
    }

    /// Signed integer scalar of the given width.
    pub const fn int(bits: u8) -> Type {
        Type::new(TypeCode::Int, bits, 1)
    }

    /// Unsigned integer scalar of the given width.
    pub const fn uint(bits: u8) -> Type {
        Type::new(TypeCode::UInt, bits, 1)
    }

    /// Floating-point scalar of the given width.
    pub const fn float(bits: u8) -> Type {
        Type::new(TypeCode::Float, bits, 1)
    }

    /// The boolean type: a one-bit unsigned scalar.
    pub const fn bool_type() -> Type {
        Type::uint(1)
    }

    /// A 64-bit opaque handle, used for buffer references.
    pub const fn handle() -> Type {
        Type::new(TypeCode::Handle, 64, 1)
    }

    /// The default loop-index and coordinate type.
    pub const fn int32() -> Type {
        Type::int(32)
    }

    /// This type with a different lane count.
    pub const fn with_lanes(self, lanes: u16) -> Type {
        Type {
            code: self.code,
            bits: self.bits,
            lanes,
        }
    }

    /// The scalar element of this type.
    pub const fn element_of(self) -> Type {
        self.with_lanes(1)
    }

    pub const fn is_scalar(self) -> bool {
        self.lanes == 1
    }

    pub const fn is_vector(self) -> bool {
        self.lanes > 1
    }

    pub const fn is_int(self) -> bool {
        matches!(self.code, TypeCode::Int)
    }

    pub const fn is_uint(self) -> bool {
        matches!(self.code, TypeCode::UInt)
    }

    pub const fn is_float(self) -> bool {
        matches!(self.code, TypeCode::Float)
    }

    pub const fn is_handle(self) -> bool {
        matches!(self.code, TypeCode::Handle)
    }

    pub const fn is_bool(self) -> bool {
        self.is_uint() && self.bits == 1
    }

    /// Promote two operand types for binary arithmetic.
    ///
    /// Returns the common type both operands are cast to, or an error when
    /// no promotion exists (distinct vector lane counts, or handles).
    pub fn match_types(a: Type, b: Type) -> CompileResult<Type> {
        if a == b {
            return Ok(a);
        }

        // Scalars broadcast to the other operand's lanes.
        let lanes = match (a.lanes, b.lanes) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            (x, y) => {
                return Err(CompileError::ir_type_bare(format!(
                    "cannot match vector types with {x} and {y} lanes"
                )))
            }
        };
        let a = a.with_lanes(lanes);
        let b = b.with_lanes(lanes);
        if a == b {
            return Ok(a);
        }

        if a.is_handle() || b.is_handle() {
            return Err(CompileError::ir_type_bare(format!(
                "no promotion between `{a}` and `{b}`"
            )));
        }

        // Floats beat integers; otherwise width wins; int beats uint at
        // equal width.
        let ty = match (a.is_float(), b.is_float()) {
            (true, true) => Type::float(a.bits.max(b.bits)).with_lanes(lanes),
            (true, false) => a,
            (false, true) => b,
            (false, false) => {
                let bits = a.bits.max(b.bits);
                let code = if a.bits == b.bits {
                    if a.is_int() || b.is_int() {
                        TypeCode::Int
                    } else {
                        TypeCode::UInt
                    }
                } else if a.bits > b.bits {
                    a.code
                } else {
                    b.code
                };
                Type::new(code, bits, lanes)
            }
        };
        Ok(ty)
    }

    /// Largest value representable in an integer type, for overflow checks
    /// and lerp fixed-point width selection. Saturates at `i64::MAX`.
    pub fn max_int_value(self) -> i64 {
        match self.code {
            TypeCode::Int => {
                if self.bits >= 64 {
                    i64::MAX
                } else {
                    (1i64 << (self.bits - 1)) - 1
                }
            }
            TypeCode::UInt => {
                if self.bits >= 64 {
                    i64::MAX
                } else {
                    (1i64 << self.bits) - 1
                }
            }
            TypeCode::Float | TypeCode::Handle => i64::MAX,
        }
    }

    /// Can this integer type hold `value` exactly?
    pub fn can_represent(self, value: i64) -> bool {
        match self.code {
            TypeCode::Int => {
                if self.bits >= 64 {
                    true
                } else {
                    let max = (1i64 << (self.bits - 1)) - 1;
                    let min = -(1i64 << (self.bits - 1));
                    value >= min && value <= max
                }
            }
            TypeCode::UInt => value >= 0 && value <= self.max_int_value(),
            TypeCode::Float | TypeCode::Handle => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            TypeCode::Int => write!(f, "int{}", self.bits)?,
            TypeCode::UInt => {
                if self.is_bool() {
                    write!(f, "bool")?;
                } else {
                    write!(f, "uint{}", self.bits)?;
                }
            }
            TypeCode::Float => write!(f, "float{}", self.bits)?,
            TypeCode::Handle => write!(f, "handle")?,
        }
        if self.lanes > 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}
