//! Interpreter core: scopes, control flow and the evaluator set.
//!
//! # Architecture
//!
//! - **ControlFlow**: the value every command evaluation returns; `break`,
//!   `continue` and `return` travel as `ControlFlow::Raise(ControlSignal)`
//! - **Scope**: variable frames, functions, `$?` and shell options
//! - **Evaluators**: `ArithEvaluator`, `BoolEvaluator`, `WordEvaluator`,
//!   `ExprEvaluator`, `CommandEvaluator`, `PromptEvaluator` and `Tracer`
//!
//! The evaluators reference each other, so they are built and linked by
//! `crate::wiring::Evaluators` rather than constructed individually.

mod command;
mod control_flow;
mod eval;
mod expr;
mod prompt;
mod scope;
mod tracer;

pub use command::CommandEvaluator;
pub use control_flow::{
    ControlFlow, ControlSignal, LoopAction, ReturnPayload, SignalKind, truncate_status,
};
pub use eval::{ArithEvaluator, BoolEvaluator, EvalResult, RuntimeError, WordEvaluator};
pub use expr::{Callable, ExprEvaluator};
pub use prompt::{PromptEvaluator, RENDER_PROMPT_HOOK};
pub use scope::Scope;
pub use tracer::{Tracer, XTRACE_TARGET};
