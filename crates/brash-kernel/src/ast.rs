//! Command AST consumed by the evaluators.
//!
//! The grammar that produces it lives outside this crate; tests build nodes
//! directly.

mod types;

pub use types::*;
