//! Execution errors.
//!
//! These mirror the runtime error tier: what a compiled pipeline would
//! report through the process error hook, the executor returns as a
//! `Result` so tests can assert on it.

use thiserror::Error;

pub type RunResult<T> = Result<T, RunError>;

/// A failure while executing a lowered pipeline.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    /// A buffer argument does not satisfy the pipeline's layout
    /// expectations, or an access fell outside it.
    #[error("buffer precondition failed: {0}")]
    BufferPrecondition(String),

    /// An internal allocation could not be made.
    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    /// The device bridge returned a non-success code.
    #[error("device error {code}")]
    DeviceError { code: i32 },

    /// An injected `AssertStmt` failed.
    #[error("assertion failed: {0}")]
    AssertionFailure(String),

    /// The tree was not fully lowered, or evaluation hit an undefined
    /// operation (unbound variable, division by zero).
    #[error("evaluation error: {0}")]
    Evaluation(String),
}

impl RunError {
    pub fn eval(msg: impl Into<String>) -> RunError {
        RunError::Evaluation(msg.into())
    }
}
