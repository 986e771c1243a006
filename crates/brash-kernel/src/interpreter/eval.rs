//! Word, arithmetic and test evaluation.
//!
//! Evaluators reduce AST pieces to strings, integers and booleans. They
//! read variables from the shared `Scope` and reach the other evaluators
//! and the execution context through `Link`s set by the wiring pass.

use std::cell::RefCell;
use std::rc::Rc;

use brash_types::{ControlKeyword, SpanId, Value};
use thiserror::Error;

use super::expr::ExprEvaluator;
use super::prompt::PromptEvaluator;
use super::scope::Scope;
use crate::arena::ArenaError;
use crate::ast::{ArithExpr, ArithOp, BoolExpr, CmpOp, Word};
use crate::exec::ExecutionContext;
use crate::wiring::{Link, WiringError};

/// Errors raised while evaluating commands.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// A control signal reached a frame that cannot consume it.
    #[error("'{keyword}' cannot be used outside {}", .keyword.frame_name())]
    UnmatchedControl { keyword: ControlKeyword, token: SpanId },
    #[error("{keyword}: numeric argument required, got '{arg}'")]
    NumericArgRequired { keyword: ControlKeyword, arg: String, token: SpanId },
    #[error("{keyword}: loop count out of range: {level}")]
    BadLoopLevel { keyword: ControlKeyword, level: i64, token: SpanId },
    #[error("proc '{name}' cannot return a typed value")]
    TypedReturnInProc { name: String, token: SpanId },
    #[error("undefined function: {name}")]
    UndefinedFunction { name: String, token: SpanId },
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
    #[error("type error: expected {expected}, got {got}")]
    Type { expected: &'static str, got: String },
    #[error("i/o error: {0}")]
    Io(String),
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error(transparent)]
    Wiring(#[from] WiringError),
}

impl RuntimeError {
    /// Internal bugs that must stop the kernel, as opposed to errors in the
    /// user's program.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::Arena(_) | RuntimeError::Wiring(_))
    }

    /// The token the error is attributed to, if any.
    pub fn token(&self) -> Option<SpanId> {
        match self {
            RuntimeError::UnmatchedControl { token, .. }
            | RuntimeError::NumericArgRequired { token, .. }
            | RuntimeError::BadLoopLevel { token, .. }
            | RuntimeError::TypedReturnInProc { token, .. }
            | RuntimeError::UndefinedFunction { token, .. } => Some(*token),
            _ => None,
        }
    }
}

pub type EvalResult<T> = Result<T, RuntimeError>;

// ═══════════════════════════════════════════════════════════════════════════
// Arithmetic
// ═══════════════════════════════════════════════════════════════════════════

/// Evaluates `$(( … ))`. Integers are 64-bit and wrap on overflow.
pub struct ArithEvaluator {
    scope: Rc<RefCell<Scope>>,
    pub(crate) word_ev: Link<WordEvaluator>,
}

impl ArithEvaluator {
    pub fn new(scope: Rc<RefCell<Scope>>) -> Self {
        Self { scope, word_ev: Link::new("ArithEvaluator", "word_ev") }
    }

    pub fn check_circular_deps(&self) -> Result<(), WiringError> {
        self.word_ev.check()
    }

    pub fn eval(&self, expr: &ArithExpr) -> EvalResult<i64> {
        match expr {
            ArithExpr::Num(n) => Ok(*n),
            ArithExpr::Word(word) => {
                let text = self.word_ev.get()?.eval_word(word)?;
                self.to_int(&text)
            }
            ArithExpr::Neg(inner) => Ok(self.eval(inner)?.wrapping_neg()),
            ArithExpr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                match op {
                    ArithOp::Add => Ok(l.wrapping_add(r)),
                    ArithOp::Sub => Ok(l.wrapping_sub(r)),
                    ArithOp::Mul => Ok(l.wrapping_mul(r)),
                    ArithOp::Div | ArithOp::Rem if r == 0 => {
                        Err(RuntimeError::Arithmetic(format!("division by zero ({l} {op} 0)")))
                    }
                    ArithOp::Div => Ok(l.wrapping_div(r)),
                    ArithOp::Rem => Ok(l.wrapping_rem(r)),
                }
            }
        }
    }

    /// An operand: a decimal literal, or a variable name whose value is one.
    /// Empty and unset are 0.
    fn to_int(&self, text: &str) -> EvalResult<i64> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(0);
        }
        if let Ok(n) = text.parse::<i64>() {
            return Ok(n);
        }
        if !is_var_name(text) {
            return Err(RuntimeError::Arithmetic(format!("invalid integer '{text}'")));
        }
        let value = self.scope.borrow().lookup(text);
        match value {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Int(n)) => Ok(n),
            Some(Value::Bool(b)) => Ok(i64::from(b)),
            Some(other) => {
                let s = other.to_string();
                let s = s.trim();
                if s.is_empty() {
                    return Ok(0);
                }
                s.parse().map_err(|_| {
                    RuntimeError::Arithmetic(format!("{text}: invalid integer '{s}'"))
                })
            }
        }
    }
}

fn is_var_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ═══════════════════════════════════════════════════════════════════════════
// Conditionals
// ═══════════════════════════════════════════════════════════════════════════

/// Evaluates `[[ … ]]` expressions.
pub struct BoolEvaluator {
    pub(crate) word_ev: Link<WordEvaluator>,
}

impl BoolEvaluator {
    pub fn new() -> Self {
        Self { word_ev: Link::new("BoolEvaluator", "word_ev") }
    }

    pub fn check_circular_deps(&self) -> Result<(), WiringError> {
        self.word_ev.check()
    }

    pub fn eval(&self, expr: &BoolExpr) -> EvalResult<bool> {
        match expr {
            BoolExpr::Compare { op, left, right } => {
                let word_ev = self.word_ev.get()?;
                let l = word_ev.eval_word(left)?;
                let r = word_ev.eval_word(right)?;
                compare(*op, &l, &r)
            }
            BoolExpr::Empty(word) => Ok(self.word_ev.get()?.eval_word(word)?.is_empty()),
            BoolExpr::NonEmpty(word) => Ok(!self.word_ev.get()?.eval_word(word)?.is_empty()),
            BoolExpr::Not(inner) => Ok(!self.eval(inner)?),
            BoolExpr::And(a, b) => Ok(self.eval(a)? && self.eval(b)?),
            BoolExpr::Or(a, b) => Ok(self.eval(a)? || self.eval(b)?),
        }
    }
}

impl Default for BoolEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn compare(op: CmpOp, l: &str, r: &str) -> EvalResult<bool> {
    let int = |s: &str| {
        s.trim().parse::<i64>().map_err(|_| RuntimeError::Type {
            expected: "integer",
            got: format!("'{s}'"),
        })
    };
    Ok(match op {
        CmpOp::StrEq => l == r,
        CmpOp::StrNe => l != r,
        CmpOp::IntEq => int(l)? == int(r)?,
        CmpOp::IntNe => int(l)? != int(r)?,
        CmpOp::IntLt => int(l)? < int(r)?,
        CmpOp::IntLe => int(l)? <= int(r)?,
        CmpOp::IntGt => int(l)? > int(r)?,
        CmpOp::IntGe => int(l)? >= int(r)?,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Words
// ═══════════════════════════════════════════════════════════════════════════

/// Evaluates words to strings: variables, arithmetic, command and process
/// substitution, prompt expansion and typed expressions.
pub struct WordEvaluator {
    scope: Rc<RefCell<Scope>>,
    pub(crate) arith_ev: Link<ArithEvaluator>,
    pub(crate) expr_ev: Link<ExprEvaluator>,
    pub(crate) prompt_ev: Link<PromptEvaluator>,
    pub(crate) shell_ex: Link<dyn ExecutionContext>,
}

impl WordEvaluator {
    pub fn new(scope: Rc<RefCell<Scope>>) -> Self {
        Self {
            scope,
            arith_ev: Link::new("WordEvaluator", "arith_ev"),
            expr_ev: Link::new("WordEvaluator", "expr_ev"),
            prompt_ev: Link::new("WordEvaluator", "prompt_ev"),
            shell_ex: Link::new("WordEvaluator", "shell_ex"),
        }
    }

    pub fn check_circular_deps(&self) -> Result<(), WiringError> {
        self.arith_ev.check()?;
        self.expr_ev.check()?;
        self.prompt_ev.check()?;
        self.shell_ex.check()
    }

    pub fn eval_word(&self, word: &Word) -> EvalResult<String> {
        match word {
            Word::Literal(s) => Ok(s.clone()),
            Word::Var(name) => Ok(self
                .scope
                .borrow()
                .lookup(name)
                .map(|v| v.to_string())
                .unwrap_or_default()),
            Word::Arith(expr) => Ok(self.arith_ev.get()?.eval(expr)?.to_string()),
            Word::CommandSub(body) => {
                let out = self.shell_ex.get()?.run_command_sub(body)?;
                Ok(strip_trailing_newlines(out))
            }
            Word::ProcessSub { body, span } => self.shell_ex.get()?.run_process_sub(body, *span),
            Word::Prompt(template) => self.prompt_ev.get()?.eval_prompt(template),
            Word::Expr(expr) => Ok(self.expr_ev.get()?.eval_expr(expr)?.to_string()),
            Word::Concat(parts) => parts.iter().map(|p| self.eval_word(p)).collect(),
        }
    }

    /// One string per word. No field splitting is done.
    pub fn eval_words(&self, words: &[Word]) -> EvalResult<Vec<String>> {
        words.iter().map(|w| self.eval_word(w)).collect()
    }
}

/// `$(…)` drops every trailing newline of the output.
pub(crate) fn strip_trailing_newlines(mut out: String) -> String {
    let len = out.trim_end_matches('\n').len();
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::NoOpContext;
    use crate::wiring::Evaluators;

    fn wired() -> Evaluators {
        let evs = Evaluators::new(Rc::new(NoOpContext), "+ ");
        evs.init_circular_deps().unwrap();
        evs
    }

    fn bin(op: ArithOp, l: ArithExpr, r: ArithExpr) -> ArithExpr {
        ArithExpr::Binary { op, left: Box::new(l), right: Box::new(r) }
    }

    #[test]
    fn arithmetic_wraps_and_reads_variables() {
        let evs = wired();
        evs.scope.borrow_mut().set("N", Value::Str("40".into()));
        let expr = bin(ArithOp::Add, ArithExpr::Word(Word::literal("N")), ArithExpr::Num(2));
        assert_eq!(evs.arith.eval(&expr).unwrap(), 42);

        let overflow = bin(ArithOp::Add, ArithExpr::Num(i64::MAX), ArithExpr::Num(1));
        assert_eq!(evs.arith.eval(&overflow).unwrap(), i64::MIN);

        let unset = ArithExpr::Word(Word::var("MISSING"));
        assert_eq!(evs.arith.eval(&unset).unwrap(), 0);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let evs = wired();
        let expr = bin(ArithOp::Rem, ArithExpr::Num(1), ArithExpr::Num(0));
        assert!(matches!(evs.arith.eval(&expr), Err(RuntimeError::Arithmetic(_))));
    }

    #[test]
    fn bad_operand_is_an_error() {
        let evs = wired();
        let expr = ArithExpr::Word(Word::literal("1x"));
        assert!(matches!(evs.arith.eval(&expr), Err(RuntimeError::Arithmetic(_))));
    }

    #[test]
    fn tests_compare_strings_and_integers() {
        let evs = wired();
        evs.scope.borrow_mut().set("i", Value::Int(2));
        let eq = BoolExpr::Compare {
            op: CmpOp::StrEq,
            left: Word::var("i"),
            right: Word::literal("2"),
        };
        assert!(evs.boolean.eval(&eq).unwrap());

        let lt = BoolExpr::Compare {
            op: CmpOp::IntLt,
            left: Word::literal(" 10"),
            right: Word::literal("9"),
        };
        assert!(!evs.boolean.eval(&lt).unwrap());
        assert!(evs.boolean.eval(&BoolExpr::Not(Box::new(lt))).unwrap());

        let bad = BoolExpr::Compare {
            op: CmpOp::IntGe,
            left: Word::literal("x"),
            right: Word::literal("1"),
        };
        assert!(matches!(evs.boolean.eval(&bad), Err(RuntimeError::Type { .. })));
    }

    #[test]
    fn concat_joins_parts() {
        let evs = wired();
        evs.scope.borrow_mut().set("X", Value::Str("mid".into()));
        let word =
            Word::Concat(vec![Word::literal("pre-"), Word::var("X"), Word::literal("-post")]);
        assert_eq!(evs.word.eval_word(&word).unwrap(), "pre-mid-post");
    }

    #[test]
    fn unmatched_control_message_names_the_frame() {
        let err =
            RuntimeError::UnmatchedControl { keyword: ControlKeyword::Break, token: SpanId(3) };
        assert_eq!(err.to_string(), "'break' cannot be used outside a loop");
        assert_eq!(err.token(), Some(SpanId(3)));
        assert!(!err.is_fatal());
        assert!(RuntimeError::from(ArenaError::NoSpan).is_fatal());
    }

    #[test]
    fn command_sub_strips_trailing_newlines() {
        assert_eq!(strip_trailing_newlines("a\nb\n\n".into()), "a\nb");
        assert_eq!(strip_trailing_newlines("\n".into()), "");
    }
}
