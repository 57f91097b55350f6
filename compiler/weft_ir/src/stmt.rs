//! Statement nodes.
//!
//! Statements share the reference-counted immutability of expressions.
//! `Provide` and `Realize` are the abstract forms produced early in
//! lowering; storage lowering rewrites them to `Store` and
//! `Allocate`/`Free` once concrete extents are known.

use std::fmt;
use std::sync::Arc;

use weft_diagnostic::{CompileError, CompileResult};

use crate::{Expr, Name, Type};

/// How a `For` loop executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ForType {
    Serial,
    Parallel,
    Vectorized,
    Unrolled,
}

/// Where a `For` loop runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceApi {
    Host,
    GpuBlock,
    GpuThread,
}

/// A half-open interval `[min, min+extent)` with symbolic endpoints.
#[derive(Clone, Debug, PartialEq)]
pub struct Range {
    pub min: Expr,
    pub extent: Expr,
}

impl Range {
    pub fn new(min: Expr, extent: Expr) -> Range {
        Range { min, extent }
    }
}

/// The tagged variants of a statement.
#[derive(Debug, PartialEq)]
pub enum StmtKind {
    LetStmt {
        name: Name,
        value: Expr,
        body: Stmt,
    },
    /// Evaluate `condition` at runtime; route `message` through the error
    /// hook when it does not hold.
    AssertStmt {
        condition: Expr,
        message: Name,
    },
    For {
        name: Name,
        min: Expr,
        extent: Expr,
        for_type: ForType,
        device: DeviceApi,
        body: Stmt,
    },
    /// A write of `value` to `name` at a flat index.
    Store {
        name: Name,
        index: Expr,
        value: Expr,
    },
    /// Abstract multidimensional write; becomes `Store` after storage
    /// lowering. `values` has one entry per output of the function.
    Provide {
        name: Name,
        values: Vec<Expr>,
        args: Vec<Expr>,
    },
    Allocate {
        name: Name,
        ty: Type,
        extents: Vec<Expr>,
        body: Stmt,
    },
    Free {
        name: Name,
    },
    /// Abstract allocation of `name` over `bounds` for the duration of
    /// `body`; becomes `Allocate` once bounds inference has run.
    Realize {
        name: Name,
        types: Vec<Type>,
        bounds: Vec<Range>,
        body: Stmt,
    },
    Block {
        first: Stmt,
        rest: Stmt,
    },
    IfThenElse {
        condition: Expr,
        then_case: Stmt,
        else_case: Option<Stmt>,
    },
    Evaluate(Expr),
}

#[derive(Debug, PartialEq)]
pub struct StmtNode {
    pub kind: StmtKind,
}

/// A shared, immutable statement.
#[derive(Clone, PartialEq)]
pub struct Stmt(Arc<StmtNode>);

impl Stmt {
    pub(crate) fn from_node(kind: StmtKind) -> Stmt {
        Stmt(Arc::new(StmtNode { kind }))
    }

    pub fn kind(&self) -> &StmtKind {
        &self.0.kind
    }

    /// Node identity; see [`Expr::ptr_eq`].
    pub fn ptr_eq(&self, other: &Stmt) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl Stmt {
    /// `let name = value in body`.
    pub fn let_stmt(name: impl Into<Name>, value: Expr, body: Stmt) -> Stmt {
        Stmt::from_node(StmtKind::LetStmt {
            name: name.into(),
            value,
            body,
        })
    }

    /// A runtime assertion. The condition must be a scalar boolean.
    pub fn assert_stmt(condition: Expr, message: impl Into<Name>) -> CompileResult<Stmt> {
        if condition.ty() != Type::bool_type() {
            return Err(CompileError::ir_type(
                format!(
                    "assert condition must be a scalar boolean, found `{}`",
                    condition.ty()
                ),
                condition.to_string(),
            ));
        }
        Ok(Stmt::from_node(StmtKind::AssertStmt {
            condition,
            message: message.into(),
        }))
    }

    /// A loop over `[min, min+extent)`. Bounds must be scalar integers.
    pub fn for_loop(
        name: impl Into<Name>,
        min: Expr,
        extent: Expr,
        for_type: ForType,
        device: DeviceApi,
        body: Stmt,
    ) -> CompileResult<Stmt> {
        for bound in [&min, &extent] {
            if !bound.ty().is_scalar() || !bound.ty().is_int() {
                return Err(CompileError::ir_type(
                    format!("loop bound must be a scalar integer, found `{}`", bound.ty()),
                    bound.to_string(),
                ));
            }
        }
        Ok(Stmt::from_node(StmtKind::For {
            name: name.into(),
            min,
            extent,
            for_type,
            device,
            body,
        }))
    }

    /// A serial host loop; the common case in lowering.
    pub fn serial_for(
        name: impl Into<Name>,
        min: Expr,
        extent: Expr,
        body: Stmt,
    ) -> CompileResult<Stmt> {
        Stmt::for_loop(name, min, extent, ForType::Serial, DeviceApi::Host, body)
    }

    /// A flat store. Index and value lane counts must agree.
    pub fn store(name: impl Into<Name>, index: Expr, value: Expr) -> CompileResult<Stmt> {
        if index.ty().lanes != value.ty().lanes {
            return Err(CompileError::ir_type(
                format!(
                    "store of `{}` with a {}-lane index",
                    value.ty(),
                    index.ty().lanes
                ),
                index.to_string(),
            ));
        }
        if !index.ty().element_of().is_int() {
            return Err(CompileError::ir_type(
                format!("store index must be an integer, found `{}`", index.ty()),
                index.to_string(),
            ));
        }
        Ok(Stmt::from_node(StmtKind::Store {
            name: name.into(),
            index,
            value,
        }))
    }

    /// An abstract multidimensional write of `values` at coordinates `args`.
    pub fn provide(name: impl Into<Name>, values: Vec<Expr>, args: Vec<Expr>) -> Stmt {
        Stmt::from_node(StmtKind::Provide {
            name: name.into(),
            values,
            args,
        })
    }

    /// A concrete allocation live for `body`.
    pub fn allocate(name: impl Into<Name>, ty: Type, extents: Vec<Expr>, body: Stmt) -> Stmt {
        Stmt::from_node(StmtKind::Allocate {
            name: name.into(),
            ty,
            extents,
            body,
        })
    }

    pub fn free(name: impl Into<Name>) -> Stmt {
        Stmt::from_node(StmtKind::Free { name: name.into() })
    }

    /// An abstract allocation over symbolic bounds.
    pub fn realize(
        name: impl Into<Name>,
        types: Vec<Type>,
        bounds: Vec<Range>,
        body: Stmt,
    ) -> Stmt {
        Stmt::from_node(StmtKind::Realize {
            name: name.into(),
            types,
            bounds,
            body,
        })
    }

    /// Sequence two statements.
    pub fn block(first: Stmt, rest: Stmt) -> Stmt {
        Stmt::from_node(StmtKind::Block { first, rest })
    }

    /// Sequence any number of statements, or `None` for an empty list.
    pub fn block_of(stmts: Vec<Stmt>) -> Option<Stmt> {
        let mut it = stmts.into_iter().rev();
        let last = it.next()?;
        Some(it.fold(last, |rest, first| Stmt::block(first, rest)))
    }

    /// A conditional. The condition must be a scalar boolean.
    pub fn if_then_else(
        condition: Expr,
        then_case: Stmt,
        else_case: Option<Stmt>,
    ) -> CompileResult<Stmt> {
        if condition.ty() != Type::bool_type() {
            return Err(CompileError::ir_type(
                format!(
                    "branch condition must be a scalar boolean, found `{}`",
                    condition.ty()
                ),
                condition.to_string(),
            ));
        }
        Ok(Stmt::from_node(StmtKind::IfThenElse {
            condition,
            then_case,
            else_case,
        }))
    }

    /// Evaluate an expression for its effect.
    pub fn evaluate(expr: Expr) -> Stmt {
        Stmt::from_node(StmtKind::Evaluate(expr))
    }
}
