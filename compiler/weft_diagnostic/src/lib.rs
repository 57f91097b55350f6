//! Compile-time error types for the Weft compiler.
//!
//! Every error raised during IR construction, scheduling, or lowering is one
//! of the kinds below. Errors are surfaced synchronously to the caller and
//! are never recovered internally; each carries a human-readable message
//! and, where one exists, a rendered fragment of the IR that triggered it.
//!
//! Runtime errors (buffer preconditions, allocation failures, device error
//! codes) live in `weft_rt` and flow through the process-level error hook
//! instead, and never appear as `CompileError`.

use thiserror::Error;

/// Result alias used throughout the compiler crates.
pub type CompileResult<T> = Result<T, CompileError>;

/// An error raised while building IR, mutating a schedule, or lowering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Operand or result types do not line up at a node construction site.
    #[error("type error: {message}{}", render_fragment(.fragment))]
    IrType {
        message: String,
        fragment: Option<String>,
    },

    /// A `Var` reference with no enclosing loop, let, or parameter binding.
    #[error("unbound variable `{name}`{}", render_fragment(.fragment))]
    UnboundVariable {
        name: String,
        fragment: Option<String>,
    },

    /// A schedule directive that contradicts the schedule's current state.
    #[error("schedule inconsistency for `{func}`: {message}")]
    ScheduleInconsistency { func: String, message: String },

    /// A definition whose output arity or type disagrees with the pure
    /// definition of the same function.
    #[error("arity mismatch for `{func}`: expected {expected}, found {found}")]
    ArityMismatch {
        func: String,
        expected: usize,
        found: usize,
    },

    /// Bounds inference could not express a required interval.
    #[error("bounds inference failed: {message}{}", render_fragment(.fragment))]
    BoundsInference {
        message: String,
        fragment: Option<String>,
    },

    /// A construct the selected target cannot express.
    #[error("unsupported by target: {message}")]
    UnsupportedByTarget { message: String },
}

impl CompileError {
    /// Type error with a rendered IR fragment.
    pub fn ir_type(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        CompileError::IrType {
            message: message.into(),
            fragment: Some(fragment.into()),
        }
    }

    /// Type error with no useful fragment (e.g. raised before a node exists).
    pub fn ir_type_bare(message: impl Into<String>) -> Self {
        CompileError::IrType {
            message: message.into(),
            fragment: None,
        }
    }

    /// Unbound variable reference detected during lowering.
    pub fn unbound(name: impl Into<String>, fragment: impl Into<String>) -> Self {
        CompileError::UnboundVariable {
            name: name.into(),
            fragment: Some(fragment.into()),
        }
    }

    /// Schedule directive rejected.
    pub fn schedule(func: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::ScheduleInconsistency {
            func: func.into(),
            message: message.into(),
        }
    }

    /// Output arity disagreement between definitions of one function.
    pub fn arity(func: impl Into<String>, expected: usize, found: usize) -> Self {
        CompileError::ArityMismatch {
            func: func.into(),
            expected,
            found,
        }
    }

    /// Bounds inference failure over the given fragment.
    pub fn bounds(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        CompileError::BoundsInference {
            message: message.into(),
            fragment: Some(fragment.into()),
        }
    }

    /// Construct an `UnsupportedByTarget` error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        CompileError::UnsupportedByTarget {
            message: message.into(),
        }
    }
}

fn render_fragment(fragment: &Option<String>) -> String {
    match fragment {
        Some(f) => format!("\n  in: {f}"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn type_error_renders_fragment() {
        let err = CompileError::ir_type("lanes mismatch: 4 vs 8", "(x + y)");
        assert_eq!(
            err.to_string(),
            "type error: lanes mismatch: 4 vs 8\n  in: (x + y)"
        );
    }

    #[test]
    fn type_error_without_fragment() {
        let err = CompileError::ir_type_bare("handle types cannot be added");
        assert_eq!(err.to_string(), "type error: handle types cannot be added");
    }

    #[test]
    fn schedule_error_names_function() {
        let err = CompileError::schedule("blur_y", "split of unknown dimension `z`");
        assert_eq!(
            err.to_string(),
            "schedule inconsistency for `blur_y`: split of unknown dimension `z`"
        );
    }

    #[test]
    fn arity_mismatch_counts() {
        let err = CompileError::arity("f", 2, 1);
        assert_eq!(err.to_string(), "arity mismatch for `f`: expected 2, found 1");
    }
}
