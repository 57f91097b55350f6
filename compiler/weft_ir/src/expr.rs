//! Expression nodes.
//!
//! An [`Expr`] is an immutable, reference-counted tree node carrying its
//! [`Type`]. Cloning an `Expr` shares the node; equal subtrees may be the
//! same allocation, and [`Expr::ptr_eq`] observes that identity, but no
//! operation relies on it for correctness.
//!
//! Construction goes through the checked builders in [`crate::build`],
//! which type-check, constant-fold, and canonicalize. The raw `ExprKind`
//! layout here is what visitors and mutators match on.

use std::fmt;
use std::sync::Arc;

use crate::{Name, Type};

/// Binary arithmetic operators. Comparison lives in [`CmpOp`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Min => "min",
            BinOp::Max => "max",
        }
    }
}

/// Comparison operators. Results are boolean with the operands' lanes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// What a [`ExprKind::Call`] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// A pipeline function; resolved by name through the pipeline
    /// environment during lowering.
    Func,
    /// An input image; becomes a [`ExprKind::Load`] after storage lowering.
    Image,
    /// A compiler-internal intrinsic (`lerp`, `gpu_texture_load`, …).
    Intrinsic,
    /// A call to an external C symbol, passed through to the code generator.
    Extern,
}

/// The tagged variants of an expression.
#[derive(Debug, PartialEq)]
pub enum ExprKind {
    IntImm(i64),
    UIntImm(u64),
    FloatImm(f64),
    StringImm(Name),
    /// Value conversion to the node's type.
    Cast(Expr),
    /// A reference to a loop variable, parameter, or let binding.
    Var(Name),
    Binary {
        op: BinOp,
        a: Expr,
        b: Expr,
    },
    Cmp {
        op: CmpOp,
        a: Expr,
        b: Expr,
    },
    And {
        a: Expr,
        b: Expr,
    },
    Or {
        a: Expr,
        b: Expr,
    },
    Not(Expr),
    Select {
        condition: Expr,
        true_value: Expr,
        false_value: Expr,
    },
    /// A read of `name` at a flat index. Vector loads have a vector index.
    Load {
        name: Name,
        index: Expr,
    },
    /// The vector `[base, base+stride, ... base+(lanes-1)*stride]`.
    Ramp {
        base: Expr,
        stride: Expr,
        lanes: u16,
    },
    /// A scalar value replicated across lanes.
    Broadcast {
        value: Expr,
        lanes: u16,
    },
    Let {
        name: Name,
        value: Expr,
        body: Expr,
    },
    Call {
        name: Name,
        args: Vec<Expr>,
        kind: CallKind,
        /// Which output of a tuple-valued function this call selects.
        value_index: usize,
    },
}

#[derive(Debug, PartialEq)]
pub struct ExprNode {
    pub ty: Type,
    pub kind: ExprKind,
}

/// A shared, immutable expression.
#[derive(Clone, PartialEq)]
pub struct Expr(Arc<ExprNode>);

impl Expr {
    /// Wrap a raw node. Callers outside `build` should prefer the checked
    /// builders.
    pub(crate) fn from_node(ty: Type, kind: ExprKind) -> Expr {
        Expr(Arc::new(ExprNode { ty, kind }))
    }

    pub fn ty(&self) -> Type {
        self.0.ty
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// Node identity: do `self` and `other` share an allocation?
    ///
    /// Mutators use this to detect that no child changed and hand back the
    /// original node, which is what keeps fixed-point passes terminating.
    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The constant value of an `IntImm`, if this is one.
    pub fn as_const_int(&self) -> Option<i64> {
        match self.kind() {
            ExprKind::IntImm(v) => Some(*v),
            _ => None,
        }
    }

    /// The constant value of a `UIntImm`, if this is one.
    pub fn as_const_uint(&self) -> Option<u64> {
        match self.kind() {
            ExprKind::UIntImm(v) => Some(*v),
            _ => None,
        }
    }

    /// The constant value of a `FloatImm`, if this is one.
    pub fn as_const_float(&self) -> Option<f64> {
        match self.kind() {
            ExprKind::FloatImm(v) => Some(*v),
            _ => None,
        }
    }

    /// Is this the integer or float literal zero?
    pub fn is_zero(&self) -> bool {
        match self.kind() {
            ExprKind::IntImm(0) | ExprKind::UIntImm(0) => true,
            ExprKind::FloatImm(v) => *v == 0.0,
            _ => false,
        }
    }

    /// Is this the integer or float literal one?
    pub fn is_one(&self) -> bool {
        match self.kind() {
            ExprKind::IntImm(1) | ExprKind::UIntImm(1) => true,
            ExprKind::FloatImm(v) => *v == 1.0,
            _ => false,
        }
    }

    /// The variable name, if this is a `Var`.
    pub fn as_var(&self) -> Option<&Name> {
        match self.kind() {
            ExprKind::Var(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The Display form is the useful one in assertions and logs.
        write!(f, "{self}")
    }
}
