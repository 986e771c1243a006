//! AST type definitions.
//!
//! Nodes refer to source text only through `SpanId`s allocated by the
//! arena; the arena resolves them for diagnostics.

use std::fmt;
use std::rc::Rc;

use brash_types::{ControlKeyword, SpanId, Value};

/// A complete program is a sequence of top-level commands.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Command>,
}

/// A command node.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `name arg1 arg2`
    Simple(SimpleCommand),
    /// `NAME=value` or `local NAME=value`
    Assignment(Assignment),
    /// `{ a; b; }` or a plain command list
    Sequence(Vec<Command>),
    /// `left && right`
    AndChain { left: Box<Command>, right: Box<Command> },
    /// `left || right`
    OrChain { left: Box<Command>, right: Box<Command> },
    /// `a | b | c`, optionally negated with `!`
    Pipeline(Pipeline),
    /// `( body )`
    Subshell(Box<Command>),
    /// `body &`
    Background(Box<Command>),
    If(IfStmt),
    For(ForLoop),
    /// `while` and `until`
    While(WhileLoop),
    /// `name() { body }` or `func name() { body }`
    FuncDef(FuncDef),
    /// `break`, `continue`, `return`
    Control(ControlStmt),
    /// A compound command with redirections: `{ … } > out`
    Redirected { body: Box<Command>, redirects: Vec<Redirect> },
}

impl Command {
    /// Short name of the node kind, for tracing spans.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Command::Simple(_) => "simple",
            Command::Assignment(_) => "assignment",
            Command::Sequence(_) => "sequence",
            Command::AndChain { .. } => "and_chain",
            Command::OrChain { .. } => "or_chain",
            Command::Pipeline(_) => "pipeline",
            Command::Subshell(_) => "subshell",
            Command::Background(_) => "background",
            Command::If(_) => "if",
            Command::For(_) => "for",
            Command::While(w) if w.until => "until",
            Command::While(_) => "while",
            Command::FuncDef(_) => "func_def",
            Command::Control(_) => "control",
            Command::Redirected { .. } => "redirected",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleCommand {
    pub words: Vec<Word>,
    /// Token of the command name.
    pub span: SpanId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub value: Word,
    /// True if declared with `local`.
    pub local: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    pub negated: bool,
}

/// A condition: either a test expression or the status of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Test(BoolExpr),
    Command(Box<Command>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfArm {
    pub condition: Condition,
    pub body: Vec<Command>,
}

/// `if … then … elif … else … fi`
#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub arms: Vec<IfArm>,
    pub else_body: Option<Vec<Command>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    pub variable: String,
    /// Each word is one item; there is no implicit splitting.
    pub items: Vec<Word>,
    pub body: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileLoop {
    pub condition: Condition,
    pub body: Vec<Command>,
    /// `until`: loop while the condition is false.
    pub until: bool,
}

/// A function definition.
///
/// Procs (`name() { … }`) return exit statuses. Typed funcs
/// (`func name() { … }`) are called from expressions and return values.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Rc<Vec<Command>>,
    pub typed: bool,
    pub span: SpanId,
}

/// `break [N]`, `continue [N]`, `return [N]`, `return (expr)`
#[derive(Debug, Clone, PartialEq)]
pub struct ControlStmt {
    pub keyword: ControlKeyword,
    pub arg: Option<ControlArg>,
    /// The keyword token.
    pub token: SpanId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlArg {
    /// A loop level or exit status word.
    Status(Word),
    /// A typed return value, valid only in funcs.
    Value(Expr),
}

/// A word, evaluated to a single string.
#[derive(Debug, Clone, PartialEq)]
pub enum Word {
    Literal(String),
    /// `$NAME`
    Var(String),
    /// `$(( expr ))`
    Arith(Box<ArithExpr>),
    /// `$( command )`
    CommandSub(Box<Command>),
    /// `<( command )`, evaluated to a descriptor path
    ProcessSub { body: Box<Command>, span: SpanId },
    /// `${template@P}`: prompt-style expansion of a template
    Prompt(String),
    /// `$[ expr ]`: a typed expression rendered as a string
    Expr(Box<Expr>),
    /// Adjacent parts: `"pre${X}post"`
    Concat(Vec<Word>),
}

impl Word {
    pub fn literal(s: impl Into<String>) -> Self {
        Word::Literal(s.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Word::Var(name.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Rem => "%",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArithExpr {
    Num(i64),
    /// A word whose value is parsed as an integer (empty is 0).
    Word(Word),
    Neg(Box<ArithExpr>),
    Binary {
        op: ArithOp,
        left: Box<ArithExpr>,
        right: Box<ArithExpr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==` on strings
    StrEq,
    /// `!=` on strings
    StrNe,
    /// `-eq`
    IntEq,
    /// `-ne`
    IntNe,
    /// `-lt`
    IntLt,
    /// `-le`
    IntLe,
    /// `-gt`
    IntGt,
    /// `-ge`
    IntGe,
}

/// `[[ … ]]` / `test` expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum BoolExpr {
    Compare { op: CmpOp, left: Word, right: Word },
    /// `-z word`
    Empty(Word),
    /// `-n word`
    NonEmpty(Word),
    Not(Box<BoolExpr>),
    And(Box<BoolExpr>, Box<BoolExpr>),
    Or(Box<BoolExpr>, Box<BoolExpr>),
}

/// Typed expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Word(Word),
    Arith(ArithExpr),
    List(Vec<Expr>),
    /// `$(command)` inside an expression, as a string
    CommandSub(Box<Command>),
    /// `name(args)`: a native callable or a typed func
    Call { name: String, args: Vec<Expr>, span: SpanId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    /// `<`
    Read,
    /// `>`
    Write,
    /// `>>`
    Append,
    /// `>&N` / `<&N`
    Dup,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    pub fd: i32,
    pub op: RedirectOp,
    pub target: Word,
    /// The operator token.
    pub span: SpanId,
}
