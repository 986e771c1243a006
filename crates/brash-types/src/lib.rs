//! Pure data types for brash: source handles, tokens, values and statuses.
//!
//! This crate is a leaf dependency with no interpreter logic and no I/O.
//! It exists so that AST producers and diagnostics consumers can hold
//! `SpanId`s and `SourceLine`s without pulling in the kernel.

pub mod source;
pub mod status;
pub mod value;

pub use source::*;
pub use status::*;
pub use value::*;
