//! Control flow as values.
//!
//! Every evaluation step returns a `ControlFlow`. `break`, `continue` and
//! `return` produce `ControlFlow::Raise` with a `ControlSignal`, which each
//! enclosing frame inspects and either consumes or hands back to its caller:
//!
//! - loop frames (`for`, `while`, `until`) call `ControlSignal::handle_loop`
//!   and act on the returned `LoopAction`;
//! - function frames consume `Return` and reject everything else;
//! - a signal that reaches the top level is reported as an error.

use std::fmt;

use brash_types::{ControlKeyword, SpanId, Value};

/// Outcome of evaluating a command.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    /// Completed with an exit status.
    Normal(i32),
    /// A control signal on its way to an enclosing frame.
    Raise(ControlSignal),
}

impl ControlFlow {
    pub fn ok() -> Self {
        ControlFlow::Normal(0)
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, ControlFlow::Normal(_))
    }
}

/// A transfer of control, raised at a keyword.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSignal {
    /// The `break` / `continue` / `return` token.
    pub token: SpanId,
    pub kind: SignalKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalKind {
    /// Number of enclosing loops still to leave.
    Break(u32),
    /// Number of enclosing loops still to unwind before continuing.
    Continue(u32),
    Return(ReturnPayload),
}

/// What a `return` carries. Exactly one form per signal, chosen by the
/// call site: procs return statuses, typed funcs return values.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnPayload {
    Status(u8),
    Value(Value),
}

/// What a loop frame should do with an intercepted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Leave this loop.
    Break,
    /// Go on with this loop's next iteration.
    Continue,
    /// Pass the (updated) signal to the next enclosing frame.
    Raise,
}

impl ControlSignal {
    pub fn break_n(levels: u32, token: SpanId) -> Self {
        Self { token, kind: SignalKind::Break(levels) }
    }

    pub fn continue_n(levels: u32, token: SpanId) -> Self {
        Self { token, kind: SignalKind::Continue(levels) }
    }

    /// `return N`, with N truncated to 8 bits.
    pub fn return_status(status: i64, token: SpanId) -> Self {
        Self {
            token,
            kind: SignalKind::Return(ReturnPayload::Status(truncate_status(status))),
        }
    }

    pub fn return_value(value: Value, token: SpanId) -> Self {
        Self { token, kind: SignalKind::Return(ReturnPayload::Value(value)) }
    }

    pub fn keyword(&self) -> ControlKeyword {
        match self.kind {
            SignalKind::Break(_) => ControlKeyword::Break,
            SignalKind::Continue(_) => ControlKeyword::Continue,
            SignalKind::Return(_) => ControlKeyword::Return,
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self.kind, SignalKind::Return(_))
    }

    /// Exit status of a status-carrying `return`.
    pub fn status_code(&self) -> Option<u8> {
        match &self.kind {
            SignalKind::Return(ReturnPayload::Status(code)) => Some(*code),
            _ => None,
        }
    }

    /// Called once by each loop frame the signal passes through.
    ///
    /// Decrements the level of `break`/`continue`; when it reaches zero this
    /// loop is the target. `return` always passes through loops untouched.
    pub fn handle_loop(&mut self) -> LoopAction {
        match &mut self.kind {
            SignalKind::Break(level) => {
                *level = level.saturating_sub(1);
                if *level == 0 {
                    return LoopAction::Break;
                }
            }
            SignalKind::Continue(level) => {
                *level = level.saturating_sub(1);
                if *level == 0 {
                    return LoopAction::Continue;
                }
            }
            SignalKind::Return(_) => {}
        }
        LoopAction::Raise
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SignalKind::Break(n) => write!(f, "break {n}"),
            SignalKind::Continue(n) => write!(f, "continue {n}"),
            SignalKind::Return(ReturnPayload::Status(s)) => write!(f, "return {s}"),
            SignalKind::Return(ReturnPayload::Value(v)) => write!(f, "return ({v})"),
        }
    }
}

/// Truncate an exit status to its low 8 bits: 257 → 1, -1 → 255.
///
/// All shells except dash do this.
pub fn truncate_status(status: i64) -> u8 {
    (status & 0xff) as u8
}
