//! The Kernel: the heart of brash.
//!
//! The Kernel owns and coordinates the core components:
//! - The source arena (lines, tokens, provenance)
//! - The line lexer that registers input with the arena
//! - The wired evaluator set and its shared scope
//! - The execution context supplied by the embedder
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          Kernel                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │ SourceArena  │  │  LineLexer   │  │ KernelConfig   │  │
//! │  │ (lines,spans)│  │              │  │                │  │
//! │  └──────────────┘  └──────────────┘  └────────────────┘  │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │ Evaluators: arith, bool, word, expr, command,      │  │
//! │  │ prompt, tracer ──► ExecutionContext                │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use anyhow::{Context, Result};
use brash_types::{Provenance, SpanId};
use serde::{Deserialize, Serialize};

use crate::arena::SourceArena;
use crate::ast::Program;
use crate::exec::{ExecutionContext, NoOpContext};
use crate::interpreter::{ControlFlow, RuntimeError, Scope};
use crate::lexer::{LexedLine, LineLexer};
use crate::wiring::Evaluators;

/// Saved-lines soft limit used by interactive sessions.
pub const DEFAULT_SAVED_LINES_SOFT_LIMIT: usize = 10_000;

/// Status of a statement that failed with a runtime error.
const ERROR_STATUS: i32 = 1;

/// Configuration for kernel initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Name of this kernel (for identification in logs).
    pub name: String,

    /// The root source, pushed onto the arena when the kernel starts.
    pub provenance: Provenance,

    /// Clear the arena's active window after each top-level statement.
    ///
    /// Interactive sessions set this so that linear scans stay short
    /// however long the session runs.
    pub discard_after_statement: bool,

    /// Warn when the saved-lines log grows past this many lines.
    pub saved_lines_soft_limit: Option<usize>,

    /// Start with `set -x` enabled.
    pub xtrace: bool,

    /// Prefix template for traced lines.
    pub ps4: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            provenance: Provenance::Stdin,
            discard_after_statement: false,
            saved_lines_soft_limit: None,
            xtrace: false,
            ps4: "+ ".to_string(),
        }
    }
}

impl KernelConfig {
    /// An interactive session: discards after every statement.
    pub fn interactive() -> Self {
        Self {
            name: "interactive".to_string(),
            provenance: Provenance::Interactive,
            discard_after_statement: true,
            saved_lines_soft_limit: Some(DEFAULT_SAVED_LINES_SOFT_LIMIT),
            ..Self::default()
        }
    }

    /// Running a script file.
    pub fn script(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: path.clone(),
            provenance: Provenance::MainFile { path },
            ..Self::default()
        }
    }

    /// A throwaway kernel for tests and one-off evaluation.
    pub fn transient() -> Self {
        Self {
            name: "transient".to_string(),
            provenance: Provenance::Synthetic { label: "transient".to_string() },
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_discard_after_statement(mut self, discard: bool) -> Self {
        self.discard_after_statement = discard;
        self
    }

    pub fn with_saved_lines_soft_limit(mut self, limit: Option<usize>) -> Self {
        self.saved_lines_soft_limit = limit;
        self
    }

    pub fn with_xtrace(mut self, xtrace: bool) -> Self {
        self.xtrace = xtrace;
        self
    }

    pub fn with_ps4(mut self, ps4: impl Into<String>) -> Self {
        self.ps4 = ps4.into();
        self
    }
}

/// A user-visible runtime error from a top-level statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub message: String,
    /// `source:line:col`, when the error has a resolvable token.
    pub location: Option<String>,
    pub token: Option<SpanId>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{location}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Result of executing a program.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ExecOutcome {
    /// Status of the last statement.
    pub status: i32,
    pub diagnostics: Vec<Diagnostic>,
}

/// The kernel.
pub struct Kernel {
    config: KernelConfig,
    arena: SourceArena,
    lexer: LineLexer,
    /// Line number of the last line fed through `feed_line`.
    line_number: u32,
    evaluators: Evaluators,
}

impl Kernel {
    /// Build the evaluators, wire them, and push the root source.
    ///
    /// Fails if the wiring pass leaves any link unset; no command can run
    /// on a kernel that failed to build.
    #[tracing::instrument(level = "debug", skip(config, ctx), fields(name = %config.name))]
    pub fn new(config: KernelConfig, ctx: Rc<dyn ExecutionContext>) -> Result<Self> {
        let mut arena =
            SourceArena::new().with_saved_lines_soft_limit(config.saved_lines_soft_limit);
        arena.push_source_raw(config.provenance.clone());

        let evaluators = Evaluators::new(ctx, config.ps4.clone());
        evaluators.scope.borrow_mut().set_xtrace(config.xtrace);
        evaluators
            .init_circular_deps()
            .context("failed to wire evaluators")?;

        Ok(Self {
            config,
            arena,
            lexer: LineLexer::new(),
            line_number: 0,
            evaluators,
        })
    }

    /// A transient kernel whose commands do nothing.
    pub fn transient() -> Result<Self> {
        Self::new(KernelConfig::transient(), Rc::new(NoOpContext))
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn arena(&self) -> &SourceArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut SourceArena {
        &mut self.arena
    }

    pub fn evaluators(&self) -> &Evaluators {
        &self.evaluators
    }

    pub fn scope(&self) -> &Rc<RefCell<Scope>> {
        &self.evaluators.scope
    }

    pub fn last_status(&self) -> i32 {
        self.evaluators.scope.borrow().last_status()
    }

    /// Register the next physical line of the root source.
    pub fn feed_line(&mut self, text: &str) -> Result<LexedLine> {
        self.line_number += 1;
        self.lexer
            .feed_line(&mut self.arena, text, self.line_number)
            .with_context(|| format!("failed to register line {}", self.line_number))
    }

    /// Register a nested source (a sourced file, an `eval` string, an
    /// alias body). Its lines are numbered from 1.
    pub fn lex_source(&mut self, provenance: Provenance, source: &str) -> Result<Vec<LexedLine>> {
        LineLexer::new()
            .lex_source(&mut self.arena, provenance, source)
            .context("failed to register source")
    }

    /// Execute top-level statements in order.
    ///
    /// A control signal that escapes a statement, or a runtime error in
    /// the user's program, becomes a `Diagnostic` with status 1, and
    /// execution continues with the next statement. Internal errors
    /// (arena and wiring violations) abort.
    #[tracing::instrument(
        level = "info",
        skip(self, program),
        fields(statements = program.statements.len())
    )]
    pub fn execute(&mut self, program: &Program) -> Result<ExecOutcome> {
        let mut outcome = ExecOutcome::default();
        for stmt in &program.statements {
            let span = tracing::debug_span!("statement", kind = stmt.kind_name());
            let _enter = span.enter();

            let status = match self.evaluators.command.execute(stmt) {
                Ok(ControlFlow::Normal(status)) => status,
                Ok(ControlFlow::Raise(signal)) => {
                    let err = RuntimeError::UnmatchedControl {
                        keyword: signal.keyword(),
                        token: signal.token,
                    };
                    self.report(&err, &mut outcome)
                }
                Err(err) if err.is_fatal() => {
                    return Err(anyhow::Error::new(err)
                        .context("internal error while executing statement"));
                }
                Err(err) => self.report(&err, &mut outcome),
            };
            outcome.status = status;
            self.evaluators.scope.borrow_mut().set_last_status(status);

            if self.config.discard_after_statement {
                self.arena.discard_lines();
            }
        }
        Ok(outcome)
    }

    /// `source:line:col` of a token, 1-based.
    pub fn locate(&self, token: SpanId) -> Option<String> {
        let tok = self.arena.get_token(token).ok()?;
        let line_number = self.arena.get_line_number(tok.line_id).ok()?;
        let source = self.arena.get_line_source(tok.line_id).ok()?;
        Some(format!("{source}:{line_number}:{}", tok.col + 1))
    }

    fn report(&self, err: &RuntimeError, outcome: &mut ExecOutcome) -> i32 {
        let location = err.token().and_then(|token| self.locate(token));
        tracing::warn!(location = location.as_deref().unwrap_or("?"), "{err}");
        outcome.diagnostics.push(Diagnostic {
            message: err.to_string(),
            location,
            token: err.token(),
        });
        ERROR_STATUS
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("arena", &self.arena.stats())
            .finish_non_exhaustive()
    }
}
