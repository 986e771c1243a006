//! brash-kernel: the runtime core of the brash shell.
//!
//! This crate provides:
//!
//! - **Arena**: Ownership of every physical line and token, with provenance
//!   tracking and verbatim source reconstruction
//! - **Lexer**: Registers lines and tokens with the arena using logos
//! - **AST**: The command tree the evaluators walk
//! - **Interpreter**: Scopes, control-flow signals and the evaluator set
//! - **Exec**: The `ExecutionContext` seam and the RAII guards that keep
//!   its stacks balanced
//! - **Wiring**: Two-phase construction of the mutually-referencing evaluators
//! - **Kernel**: Configuration and top-level statement execution

pub mod arena;
pub mod ast;
pub mod exec;
pub mod interpreter;
pub mod kernel;
pub mod lexer;
pub mod wiring;

pub use arena::{ArenaError, ArenaResult, ArenaStats, SourceArena, SourceGuard};
pub use exec::{
    Builtin, ExecutionContext, FlushGuard, NoOpContext, ProcessSubGuard, RedirectGuard,
    RedirectValue,
};
pub use interpreter::{
    ControlFlow, ControlSignal, RuntimeError, Scope, SignalKind, truncate_status,
};
pub use kernel::{Diagnostic, ExecOutcome, Kernel, KernelConfig};
pub use lexer::{LexedLine, LineLexer};
pub use wiring::{Evaluators, Link, WiringError};

// Pure types, for embedders that only depend on this crate
pub use brash_types::{LineId, Provenance, SourceId, SpanId, StatusArray, Token, TokenKind, Value};
