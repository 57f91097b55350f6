//! Weft IR: expression and statement trees.
//!
//! This crate contains the core data structures the rest of the compiler
//! operates on:
//!
//! - [`Type`]: scalar/vector element types with promotion rules
//! - [`Expr`] / [`Stmt`]: immutable, reference-counted tagged-variant trees
//! - checked builders that type-check and canonicalize at construction
//! - [`Visitor`] / [`Mutator`] traversal, with the structural-sharing
//!   guarantee that an unchanged subtree keeps its node identity
//! - [`substitute`] for capture-aware variable replacement
//!
//! # Design
//!
//! Nodes are shared by `Arc`, never mutated in place; every operation
//! returns new nodes and equal subtrees may alias. Passes may exploit
//! node identity ([`Expr::ptr_eq`]) for speed but must not rely on it for
//! correctness; value equality is structural.

mod build;
mod display;
mod expr;
mod mutate;
mod name;
mod stmt;
mod subst;
mod ty;
pub mod visit;

pub use expr::{BinOp, CallKind, CmpOp, Expr, ExprKind, ExprNode};
pub use mutate::{mutate_expr_children, mutate_stmt_children, Mutator};
pub use name::Name;
pub use stmt::{DeviceApi, ForType, Range, Stmt, StmtKind, StmtNode};
pub use subst::{substitute, substitute_in_stmt};
pub use ty::{Type, TypeCode};
pub use visit::{walk_expr, walk_stmt, Visitor};
