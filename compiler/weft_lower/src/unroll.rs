//! Loop unrolling.
//!
//! A `For` marked `Unrolled` with constant extent `n` is replaced by `n`
//! copies of its body sequenced in a `Block`, the loop variable
//! substituted by `min + i` in the `i`th copy.

use weft_diagnostic::{CompileError, CompileResult};
use weft_ir::{
    mutate_stmt_children, substitute_in_stmt, BinOp, Expr, ForType, Mutator, Stmt, StmtKind,
};

/// Fully unroll every `Unrolled` loop in the tree.
pub fn unroll_loops(stmt: &Stmt) -> CompileResult<Stmt> {
    let mut pass = Unroll;
    pass.mutate_stmt(stmt)
}

struct Unroll;

impl Mutator for Unroll {
    fn mutate_stmt(&mut self, stmt: &Stmt) -> CompileResult<Stmt> {
        if let StmtKind::For {
            name,
            min,
            extent,
            for_type: ForType::Unrolled,
            body,
            ..
        } = stmt.kind()
        {
            let Some(n) = extent.as_const_int() else {
                return Err(CompileError::unsupported(format!(
                    "unrolled loop `{name}` has non-constant extent {extent}"
                )));
            };
            if n < 1 {
                return Err(CompileError::unsupported(format!(
                    "unrolled loop `{name}` has extent {n}"
                )));
            }
            // Unroll inner loops first.
            let body = self.mutate_stmt(body)?;
            let mut copies = Vec::with_capacity(usize::try_from(n).unwrap_or(1));
            for i in 0..n {
                let value = Expr::binary(BinOp::Add, min.clone(), Expr::int(i))?;
                copies.push(substitute_in_stmt(name, &value, &body)?);
            }
            return Ok(Stmt::block_of(copies)
                .unwrap_or_else(|| Stmt::evaluate(Expr::int(0))));
        }
        mutate_stmt_children(self, stmt)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use weft_ir::DeviceApi;

    #[test]
    fn unrolls_to_a_block_of_copies() {
        let body = Stmt::store("out", Expr::var("x"), Expr::var("x")).unwrap();
        let loop_ = Stmt::for_loop(
            "x",
            Expr::int(10),
            Expr::int(3),
            ForType::Unrolled,
            DeviceApi::Host,
            body,
        )
        .unwrap();
        let out = unroll_loops(&loop_).unwrap();
        assert_eq!(
            out.to_string(),
            "out[10] = 10\nout[11] = 11\nout[12] = 12\n"
        );
    }

    #[test]
    fn non_constant_extent_is_rejected() {
        let body = Stmt::store("out", Expr::var("x"), Expr::var("x")).unwrap();
        let loop_ = Stmt::for_loop(
            "x",
            Expr::int(0),
            Expr::var("n"),
            ForType::Unrolled,
            DeviceApi::Host,
            body,
        )
        .unwrap();
        assert!(unroll_loops(&loop_).is_err());
    }
}
