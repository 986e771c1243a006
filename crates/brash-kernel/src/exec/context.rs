//! The side-effecting half of the interpreter, as seen by the evaluators.

use std::io::{self, Write};

use brash_types::{CommandStatus, SpanId, StatusArray};

use crate::ast::{Command, Pipeline, RedirectOp};
use crate::interpreter::RuntimeError;
use crate::wiring::{Evaluators, WiringError};

/// A redirection with its target word already evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectValue {
    pub fd: i32,
    pub op: RedirectOp,
    pub target: String,
    pub span: SpanId,
}

/// Capabilities the command evaluator needs from the runtime.
///
/// Process creation and waiting, the descriptor table and builtin
/// implementations all live behind this trait. Methods take `&self`;
/// implementations keep their mutable state in cells, since the evaluator
/// may re-enter them (a subshell running a command substitution).
pub trait ExecutionContext {
    /// Run an external command or builtin. `argv[0]` is the name.
    fn run_simple_command(&self, argv: &[String], span: SpanId) -> Result<i32, RuntimeError>;

    /// Run `builtin NAME …`: only builtins are considered.
    fn run_builtin(&self, name: &str, argv: &[String], span: SpanId) -> Result<i32, RuntimeError>;

    /// Start `node` in the background. Returns the status of the launch.
    fn run_background_job(&self, node: &Command) -> Result<i32, RuntimeError>;

    /// Run every stage of `pipeline`, filling `status.pipe_status`.
    fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        status: &mut CommandStatus,
    ) -> Result<(), RuntimeError>;

    fn run_subshell(&self, node: &Command) -> Result<i32, RuntimeError>;

    /// Run `node` and return what it wrote to stdout.
    fn run_command_sub(&self, node: &Command) -> Result<String, RuntimeError>;

    /// Start `node` with its output connected to a descriptor and return
    /// the descriptor path. The process is waited on by `pop_process_sub`.
    fn run_process_sub(&self, node: &Command, span: SpanId) -> Result<String, RuntimeError>;

    /// Apply redirections. On failure prior state is restored and `false`
    /// is returned; the caller must then skip the command. On success the
    /// caller owes exactly one `pop_redirects(redirects.len())`.
    fn push_redirects(&self, redirects: &[RedirectValue]) -> bool;

    fn pop_redirects(&self, count: usize);

    /// Open a frame for the process substitutions of one command.
    fn push_process_sub(&self);

    /// Wait on every process substitution of the innermost frame and
    /// append their statuses.
    fn pop_process_sub(&self, statuses: &mut StatusArray);

    fn flush_stdout(&self) -> io::Result<()> {
        Ok(())
    }

    /// Wiring pass hook for contexts that call back into the evaluators.
    fn wire(&self, _evaluators: &Evaluators) -> Result<(), WiringError> {
        Ok(())
    }

    fn check_circular_deps(&self) -> Result<(), WiringError> {
        Ok(())
    }
}

/// Context that runs nothing: every command succeeds with no output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpContext;

impl ExecutionContext for NoOpContext {
    fn run_simple_command(&self, _argv: &[String], _span: SpanId) -> Result<i32, RuntimeError> {
        Ok(0)
    }

    fn run_builtin(
        &self,
        _name: &str,
        _argv: &[String],
        _span: SpanId,
    ) -> Result<i32, RuntimeError> {
        Ok(0)
    }

    fn run_background_job(&self, _node: &Command) -> Result<i32, RuntimeError> {
        Ok(0)
    }

    fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        status: &mut CommandStatus,
    ) -> Result<(), RuntimeError> {
        status.pipe_status = vec![0; pipeline.commands.len()];
        status.negated = pipeline.negated;
        Ok(())
    }

    fn run_subshell(&self, _node: &Command) -> Result<i32, RuntimeError> {
        Ok(0)
    }

    fn run_command_sub(&self, _node: &Command) -> Result<String, RuntimeError> {
        Ok(String::new())
    }

    fn run_process_sub(&self, _node: &Command, _span: SpanId) -> Result<String, RuntimeError> {
        Ok("/dev/null".to_string())
    }

    fn push_redirects(&self, _redirects: &[RedirectValue]) -> bool {
        true
    }

    fn pop_redirects(&self, _count: usize) {}

    fn push_process_sub(&self) {}

    fn pop_process_sub(&self, _statuses: &mut StatusArray) {}
}

/// A builtin command that writes to a byte sink.
pub trait Builtin {
    /// `argv[0]` is the builtin's name.
    fn run(&self, argv: &[String], out: &mut dyn Write) -> io::Result<i32>;
}

impl<F> Builtin for F
where
    F: Fn(&[String], &mut dyn Write) -> io::Result<i32>,
{
    fn run(&self, argv: &[String], out: &mut dyn Write) -> io::Result<i32> {
        self(argv, out)
    }
}

/// `echo [ARG]…`
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Builtin for Echo {
    fn run(&self, argv: &[String], out: &mut dyn Write) -> io::Result<i32> {
        let args = argv.get(1..).unwrap_or_default();
        writeln!(out, "{}", args.join(" "))?;
        Ok(0)
    }
}

/// `true` and `false`.
#[derive(Debug, Clone, Copy)]
pub struct Constant(pub i32);

impl Builtin for Constant {
    fn run(&self, _argv: &[String], _out: &mut dyn Write) -> io::Result<i32> {
        Ok(self.0)
    }
}
