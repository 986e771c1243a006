//! Execution context interface and the scoped guards that wrap it.
//!
//! The command evaluator never touches processes or descriptors directly.
//! It calls an `ExecutionContext`, and brackets every call that acquires
//! a resource in a guard from `guards`.

mod context;
mod guards;
pub mod testing;

pub use context::{Builtin, Constant, Echo, ExecutionContext, NoOpContext, RedirectValue};
pub use guards::{FlushGuard, ProcessSubGuard, RedirectGuard};
