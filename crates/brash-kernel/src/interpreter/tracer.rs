//! `set -x` tracing.
//!
//! Each traced line is prefixed with the expansion of `PS4`, emitted as a
//! `tracing` event on the `brash::xtrace` target, and kept in memory.

use std::cell::RefCell;
use std::rc::Rc;

use super::control_flow::ControlSignal;
use super::eval::{EvalResult, WordEvaluator};
use super::scope::Scope;
use crate::ast::Word;
use crate::wiring::{Link, WiringError};

pub const XTRACE_TARGET: &str = "brash::xtrace";

pub struct Tracer {
    scope: Rc<RefCell<Scope>>,
    ps4: String,
    lines: RefCell<Vec<String>>,
    pub(crate) word_ev: Link<WordEvaluator>,
}

impl Tracer {
    pub fn new(scope: Rc<RefCell<Scope>>, ps4: impl Into<String>) -> Self {
        Self {
            scope,
            ps4: ps4.into(),
            lines: RefCell::new(Vec::new()),
            word_ev: Link::new("Tracer", "word_ev"),
        }
    }

    pub fn check_circular_deps(&self) -> Result<(), WiringError> {
        self.word_ev.check()
    }

    pub fn on_simple_command(&self, argv: &[String]) -> EvalResult<()> {
        if !self.enabled() {
            return Ok(());
        }
        let line = argv.iter().map(|a| quote(a)).collect::<Vec<_>>().join(" ");
        self.emit(&line)
    }

    pub fn on_control_flow(&self, signal: &ControlSignal) -> EvalResult<()> {
        if !self.enabled() {
            return Ok(());
        }
        self.emit(&signal.to_string())
    }

    /// Lines traced so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    fn enabled(&self) -> bool {
        self.scope.borrow().xtrace_enabled()
    }

    fn emit(&self, text: &str) -> EvalResult<()> {
        let prefix = self.word_ev.get()?.eval_word(&Word::Prompt(self.ps4.clone()))?;
        let line = format!("{prefix}{text}");
        tracing::info!(target: XTRACE_TARGET, "{line}");
        self.lines.borrow_mut().push(line);
        Ok(())
    }
}

/// Quote an argument so the traced line can be pasted back into a shell.
fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(quote("plain-word"), "plain-word");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("two words"), "'two words'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }
}
