//! Runtime values.
//!
//! The executor carries scalars and vectors uniformly as lane vectors;
//! a scalar is one lane. Integer lanes hold the widened representation;
//! arithmetic wraps back to the expression's declared width after each
//! operation, so narrow unsigned overflow behaves exactly as compiled
//! code would.

use weft_ir::{Type, TypeCode};

use crate::error::{RunError, RunResult};

/// A scalar or vector runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f64>),
}

impl Value {
    pub fn int(v: i64) -> Value {
        Value::Int(vec![v])
    }

    pub fn uint(v: u64) -> Value {
        Value::UInt(vec![v])
    }

    pub fn float(v: f64) -> Value {
        Value::Float(vec![v])
    }

    pub fn lanes(&self) -> usize {
        match self {
            Value::Int(v) => v.len(),
            Value::UInt(v) => v.len(),
            Value::Float(v) => v.len(),
        }
    }

    /// The single lane of a scalar, as a signed integer.
    pub fn as_scalar_i64(&self) -> RunResult<i64> {
        match self {
            Value::Int(v) if v.len() == 1 => Ok(v[0]),
            Value::UInt(v) if v.len() == 1 => Ok(v[0] as i64),
            _ => Err(RunError::eval(format!("expected a scalar integer, got {self:?}"))),
        }
    }

    /// A scalar boolean: any non-zero unsigned lane is true.
    pub fn as_scalar_bool(&self) -> RunResult<bool> {
        match self {
            Value::UInt(v) if v.len() == 1 => Ok(v[0] != 0),
            Value::Int(v) if v.len() == 1 => Ok(v[0] != 0),
            _ => Err(RunError::eval(format!("expected a scalar condition, got {self:?}"))),
        }
    }

    /// The lane indices as signed integers; used for load/store indices.
    pub fn index_lanes(&self) -> RunResult<Vec<i64>> {
        match self {
            Value::Int(v) => Ok(v.clone()),
            Value::UInt(v) => Ok(v.iter().map(|x| *x as i64).collect()),
            Value::Float(_) => Err(RunError::eval("floating-point index")),
        }
    }

    /// Wrap every lane to the representation of `ty`: mask unsigned
    /// lanes, sign-extend signed lanes, round float lanes to their
    /// width.
    pub fn wrap_to(self, ty: Type) -> Value {
        let bits = u32::from(ty.bits);
        match self {
            Value::Int(v) if bits < 64 => Value::Int(
                v.into_iter()
                    .map(|x| {
                        let shift = 64 - bits;
                        (x << shift) >> shift
                    })
                    .collect(),
            ),
            Value::UInt(v) if bits < 64 => {
                let mask = (1u64 << bits) - 1;
                Value::UInt(v.into_iter().map(|x| x & mask).collect())
            }
            Value::Float(v) if bits == 32 => {
                Value::Float(v.into_iter().map(|x| f64::from(x as f32)).collect())
            }
            other => other,
        }
    }

    /// Convert to the element domain of `ty`, then wrap to its width.
    pub fn convert_to(self, ty: Type) -> RunResult<Value> {
        let converted = match (self, ty.code) {
            (v @ Value::Int(_), TypeCode::Int)
            | (v @ Value::UInt(_), TypeCode::UInt)
            | (v @ Value::Float(_), TypeCode::Float) => v,
            (Value::Int(v), TypeCode::UInt) => {
                Value::UInt(v.into_iter().map(|x| x as u64).collect())
            }
            (Value::Int(v), TypeCode::Float) => {
                Value::Float(v.into_iter().map(|x| x as f64).collect())
            }
            (Value::UInt(v), TypeCode::Int) => {
                Value::Int(v.into_iter().map(|x| x as i64).collect())
            }
            (Value::UInt(v), TypeCode::Float) => {
                Value::Float(v.into_iter().map(|x| x as f64).collect())
            }
            (Value::Float(v), TypeCode::Int) => {
                Value::Int(v.into_iter().map(|x| x as i64).collect())
            }
            (Value::Float(v), TypeCode::UInt) => {
                Value::UInt(v.into_iter().map(|x| x as u64).collect())
            }
            (_, TypeCode::Handle) => {
                return Err(RunError::eval("cannot convert a value to a handle"))
            }
        };
        Ok(converted.wrap_to(ty))
    }
}
