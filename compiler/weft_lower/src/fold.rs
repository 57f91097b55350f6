//! Storage folding detection.
//!
//! A producer stored outside a consumer loop but computed inside it is
//! re-demanded each iteration. When the demanded minimum along some
//! dimension advances monotonically with that loop (`min = v + c`) and
//! the demanded extent is a constant `E`, only `E` entries are ever live
//! at once: the allocation folds to a window of `E` entries addressed
//! modulo `E`.
//!
//! This pass only detects; the storage lowering applies the window to
//! allocation extents and addressing.

use rustc_hash::FxHashMap;
use weft_diagnostic::CompileResult;
use weft_ir::{BinOp, Expr, ExprKind, Name, Stmt, StmtKind, Visitor};

use crate::env::PipelineEnv;
use crate::inject::SiteTable;

/// `(function, dimension index)` → window size.
pub type FoldMap = FxHashMap<(Name, usize), i64>;

/// Scan the tree for foldable realizations.
pub fn detect_folds(env: &PipelineEnv, sites: &SiteTable, stmt: &Stmt) -> CompileResult<FoldMap> {
    let mut folds = FoldMap::default();
    scan(env, sites, stmt, &mut Vec::new(), &mut folds);
    Ok(folds)
}

fn scan(
    env: &PipelineEnv,
    sites: &SiteTable,
    stmt: &Stmt,
    enclosing: &mut Vec<Name>,
    folds: &mut FoldMap,
) {
    match stmt.kind() {
        StmtKind::For { name, body, .. } => {
            enclosing.push(name.clone());
            scan(env, sites, body, enclosing, folds);
            enclosing.pop();
        }
        StmtKind::Realize { name, body, .. } => {
            if let (Some(Some(compute_loop)), Some(func)) =
                (sites.get(name), env.funcs.get(name))
            {
                // Only a loop between the store and compute levels can
                // slide the window; a loop enclosing the whole realize
                // re-allocates each iteration instead.
                if !enclosing.contains(compute_loop) {
                    for (index, arg) in func.args().iter().enumerate() {
                        let base = name.dotted(arg.as_str());
                        let min = find_let(body, &base.dotted("min"));
                        let extent = find_let(body, &base.dotted("extent"));
                        let (Some(min), Some(extent)) = (min, extent) else {
                            continue;
                        };
                        let Some(window) = extent.as_const_int() else {
                            continue;
                        };
                        if window >= 1 && advances_with(&min, compute_loop) {
                            tracing::debug!(
                                func = %name, dim = %arg, window,
                                "folding storage to a sliding window"
                            );
                            folds.insert((name.clone(), index), window);
                        }
                    }
                }
            }
            scan(env, sites, body, enclosing, folds);
        }
        StmtKind::LetStmt { body, .. } | StmtKind::Allocate { body, .. } => {
            scan(env, sites, body, enclosing, folds);
        }
        StmtKind::Block { first, rest } => {
            scan(env, sites, first, enclosing, folds);
            scan(env, sites, rest, enclosing, folds);
        }
        StmtKind::IfThenElse {
            then_case,
            else_case,
            ..
        } => {
            scan(env, sites, then_case, enclosing, folds);
            if let Some(e) = else_case {
                scan(env, sites, e, enclosing, folds);
            }
        }
        StmtKind::AssertStmt { .. }
        | StmtKind::Store { .. }
        | StmtKind::Provide { .. }
        | StmtKind::Free { .. }
        | StmtKind::Evaluate(_) => {}
    }
}

/// The bound value of the first `LetStmt` named `target` in the subtree.
fn find_let(stmt: &Stmt, target: &Name) -> Option<Expr> {
    struct Find<'a> {
        target: &'a Name,
        found: Option<Expr>,
    }
    impl Visitor for Find<'_> {
        fn visit_stmt(&mut self, stmt: &Stmt) {
            if self.found.is_some() {
                return;
            }
            if let StmtKind::LetStmt { name, value, .. } = stmt.kind() {
                if name == self.target {
                    self.found = Some(value.clone());
                    return;
                }
            }
            weft_ir::walk_stmt(self, stmt);
        }
    }
    let mut f = Find {
        target,
        found: None,
    };
    f.visit_stmt(stmt);
    f.found
}

/// Does `min` advance by one per iteration of `loop_var`? Accepts
/// `loop_var` and `loop_var + c`.
fn advances_with(min: &Expr, loop_var: &Name) -> bool {
    match min.kind() {
        ExprKind::Var(n) => n == loop_var,
        ExprKind::Binary {
            op: BinOp::Add,
            a,
            b,
        } => {
            (a.as_var() == Some(loop_var) && b.as_const_int().is_some())
                || (b.as_var() == Some(loop_var) && a.as_const_int().is_some())
        }
        _ => false,
    }
}
