//! Reference executor for lowered Weft pipelines.
//!
//! Walks the `Stmt` tree the lowering pipeline produces, against real
//! [`weft_rt::BufferT`] descriptors, dispatching `Parallel` loops
//! through the runtime's worker pool. It stands in for the external
//! code generator during development and testing: same argument
//! protocol, same runtime entry points, same arithmetic (narrow integer
//! ops wrap exactly as compiled code's would).

mod error;
mod exec;
mod value;

pub use error::{RunError, RunResult};
pub use exec::Executor;
pub use value::Value;
