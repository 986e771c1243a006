//! Prompt-string expansion (`PS1`, `PS4`, `${x@P}`).

use std::cell::RefCell;
use std::iter::Peekable;
use std::rc::Rc;
use std::str::Chars;

use brash_types::{NO_SPAN, Value};

use super::eval::{EvalResult, RuntimeError, WordEvaluator};
use super::expr::ExprEvaluator;
use super::scope::Scope;
use crate::ast::Word;
use crate::wiring::{Link, WiringError};

/// If a callable or typed func with this name exists, `render_ps1` uses
/// its return value instead of expanding `PS1`.
pub const RENDER_PROMPT_HOOK: &str = "renderPrompt";

pub struct PromptEvaluator {
    scope: Rc<RefCell<Scope>>,
    pub(crate) word_ev: Link<WordEvaluator>,
    pub(crate) expr_ev: Link<ExprEvaluator>,
}

impl PromptEvaluator {
    pub fn new(scope: Rc<RefCell<Scope>>) -> Self {
        Self {
            scope,
            word_ev: Link::new("PromptEvaluator", "word_ev"),
            expr_ev: Link::new("PromptEvaluator", "expr_ev"),
        }
    }

    pub fn check_circular_deps(&self) -> Result<(), WiringError> {
        self.word_ev.check()?;
        self.expr_ev.check()
    }

    /// Expand backslash escapes and `$NAME` / `${NAME}` in a prompt template.
    ///
    /// Supported escapes: `\n`, `\\`, `\$`, `\s` (shell name), `\u` (`$USER`),
    /// `\h` (`$HOSTNAME`), `\w` (`$PWD`). Unknown escapes are kept verbatim.
    pub fn eval_prompt(&self, template: &str) -> EvalResult<String> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('\\') => out.push('\\'),
                    Some('$') => out.push('$'),
                    Some('s') => out.push_str("brash"),
                    Some('u') => out.push_str(&self.var("USER")?),
                    Some('h') => out.push_str(&self.var("HOSTNAME")?),
                    Some('w') => out.push_str(&self.var("PWD")?),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => out.push('\\'),
                },
                '$' => match read_var_name(&mut chars) {
                    Some(name) => out.push_str(&self.var(&name)?),
                    None => out.push('$'),
                },
                c => out.push(c),
            }
        }
        Ok(out)
    }

    /// The primary prompt: the render hook's result if one is defined,
    /// otherwise the expansion of `$PS1`.
    pub fn render_ps1(&self) -> EvalResult<String> {
        let expr_ev = self.expr_ev.get()?;
        if expr_ev.has_function(RENDER_PROMPT_HOOK) {
            return match expr_ev.call_named(RENDER_PROMPT_HOOK, Vec::new(), NO_SPAN)? {
                Value::Str(s) => Ok(s),
                other => Err(RuntimeError::Type {
                    expected: "Str",
                    got: other.type_name().to_string(),
                }),
            };
        }
        let ps1 = self.scope.borrow().get("PS1").map(|v| v.to_string());
        self.eval_prompt(ps1.as_deref().unwrap_or("\\s\\$ "))
    }

    fn var(&self, name: &str) -> EvalResult<String> {
        self.word_ev.get()?.eval_word(&Word::var(name))
    }
}

/// Reads `NAME`, `{NAME}` or a special parameter after a `$`.
fn read_var_name(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    match chars.peek().copied()? {
        '{' => {
            chars.next();
            let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
            Some(name)
        }
        c @ ('?' | '#' | '@') => {
            chars.next();
            Some(c.to_string())
        }
        c if c.is_ascii_alphanumeric() || c == '_' => {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if !(c.is_ascii_alphanumeric() || c == '_') {
                    break;
                }
                name.push(c);
                chars.next();
            }
            Some(name)
        }
        _ => None,
    }
}
