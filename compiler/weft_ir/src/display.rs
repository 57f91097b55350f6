//! Human-readable IR rendering.
//!
//! Expressions print on one line; statements print as an indented block.
//! This is the form embedded in diagnostics and logged by the lowering
//! passes, not a parseable syntax.

use std::fmt;

use crate::{CallKind, Expr, ExprKind, ForType, Stmt, StmtKind};

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::IntImm(v) => write!(f, "{v}"),
            ExprKind::UIntImm(v) => {
                if self.ty().is_bool() {
                    write!(f, "{}", if *v != 0 { "true" } else { "false" })
                } else {
                    write!(f, "{v}")
                }
            }
            ExprKind::FloatImm(v) => write!(f, "{v:?}f"),
            ExprKind::StringImm(s) => write!(f, "{s:?}"),
            ExprKind::Cast(value) => write!(f, "{}({value})", self.ty()),
            ExprKind::Var(name) => write!(f, "{name}"),
            ExprKind::Binary { op, a, b } => match op {
                crate::BinOp::Min | crate::BinOp::Max => {
                    write!(f, "{}({a}, {b})", op.symbol())
                }
                _ => write!(f, "({a} {} {b})", op.symbol()),
            },
            ExprKind::Cmp { op, a, b } => write!(f, "({a} {} {b})", op.symbol()),
            ExprKind::And { a, b } => write!(f, "({a} && {b})"),
            ExprKind::Or { a, b } => write!(f, "({a} || {b})"),
            ExprKind::Not(value) => write!(f, "!{value}"),
            ExprKind::Select {
                condition,
                true_value,
                false_value,
            } => write!(f, "select({condition}, {true_value}, {false_value})"),
            ExprKind::Load { name, index } => write!(f, "{name}[{index}]"),
            ExprKind::Ramp { base, stride, lanes } => {
                write!(f, "ramp({base}, {stride}, {lanes})")
            }
            ExprKind::Broadcast { value, lanes } => write!(f, "x{lanes}({value})"),
            ExprKind::Let { name, value, body } => {
                write!(f, "(let {name} = {value} in {body})")
            }
            ExprKind::Call {
                name,
                args,
                kind,
                value_index,
            } => {
                write!(f, "{name}")?;
                if *value_index != 0 {
                    write!(f, ".{value_index}")?;
                }
                f.write_str("(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")?;
                if *kind == CallKind::Extern {
                    f.write_str("<extern>")?;
                }
                Ok(())
            }
        }
    }
}

struct Indent(usize);

impl fmt::Display for Indent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.0 {
            f.write_str("  ")?;
        }
        Ok(())
    }
}

fn fmt_stmt(stmt: &Stmt, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let pad = Indent(depth);
    match stmt.kind() {
        StmtKind::LetStmt { name, value, body } => {
            writeln!(f, "{pad}let {name} = {value}")?;
            fmt_stmt(body, depth, f)
        }
        StmtKind::AssertStmt { condition, message } => {
            writeln!(f, "{pad}assert({condition}, {message:?})")
        }
        StmtKind::For {
            name,
            min,
            extent,
            for_type,
            device,
            body,
        } => {
            let marker = match for_type {
                ForType::Serial => "for",
                ForType::Parallel => "parallel for",
                ForType::Vectorized => "vectorized for",
                ForType::Unrolled => "unrolled for",
            };
            let dev = match device {
                crate::DeviceApi::Host => "",
                crate::DeviceApi::GpuBlock => "<gpu_block> ",
                crate::DeviceApi::GpuThread => "<gpu_thread> ",
            };
            writeln!(f, "{pad}{marker} {dev}{name} in [{min}, {min} + {extent}) {{")?;
            fmt_stmt(body, depth + 1, f)?;
            writeln!(f, "{pad}}}")
        }
        StmtKind::Store { name, index, value } => {
            writeln!(f, "{pad}{name}[{index}] = {value}")
        }
        StmtKind::Provide { name, values, args } => {
            write!(f, "{pad}{name}(")?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{a}")?;
            }
            f.write_str(") = ")?;
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{v}")?;
            }
            writeln!(f)
        }
        StmtKind::Allocate {
            name,
            ty,
            extents,
            body,
        } => {
            write!(f, "{pad}allocate {name}[{ty}")?;
            for e in extents {
                write!(f, " * {e}")?;
            }
            writeln!(f, "]")?;
            fmt_stmt(body, depth, f)
        }
        StmtKind::Free { name } => writeln!(f, "{pad}free {name}"),
        StmtKind::Realize {
            name,
            types,
            bounds,
            body,
        } => {
            write!(f, "{pad}realize {name}(")?;
            for (i, b) in bounds.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "[{}, {})", b.min, b.extent)?;
            }
            write!(f, ") of ")?;
            for (i, t) in types.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{t}")?;
            }
            writeln!(f, " {{")?;
            fmt_stmt(body, depth + 1, f)?;
            writeln!(f, "{pad}}}")
        }
        StmtKind::Block { first, rest } => {
            fmt_stmt(first, depth, f)?;
            fmt_stmt(rest, depth, f)
        }
        StmtKind::IfThenElse {
            condition,
            then_case,
            else_case,
        } => {
            writeln!(f, "{pad}if ({condition}) {{")?;
            fmt_stmt(then_case, depth + 1, f)?;
            if let Some(else_case) = else_case {
                writeln!(f, "{pad}}} else {{")?;
                fmt_stmt(else_case, depth + 1, f)?;
            }
            writeln!(f, "{pad}}}")
        }
        StmtKind::Evaluate(expr) => writeln!(f, "{pad}{expr}"),
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_stmt(self, 0, f)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::{DeviceApi, Type};
    use pretty_assertions::assert_eq;

    #[test]
    fn expr_forms() {
        let x = Expr::var("x");
        assert_eq!((x.clone() + 1).to_string(), "(x + 1)");
        assert_eq!(Expr::min(x.clone(), Expr::int(7)).unwrap().to_string(), "min(x, 7)");
        let load = Expr::load(Type::uint(16), "input", x).unwrap();
        assert_eq!(load.to_string(), "input[x]");
    }

    #[test]
    fn stmt_nesting_indents() {
        let body = Stmt::store("out", Expr::var("x"), Expr::var_of(Type::int32(), "v")).unwrap();
        let loop_ = Stmt::for_loop(
            "x",
            Expr::int(0),
            Expr::int(8),
            ForType::Serial,
            DeviceApi::Host,
            body,
        )
        .unwrap();
        assert_eq!(loop_.to_string(), "for x in [0, 0 + 8) {\n  out[x] = v\n}\n");
    }
}
