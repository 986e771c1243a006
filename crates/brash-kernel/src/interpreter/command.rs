//! Command evaluation and the frames that intercept control signals.
//!
//! Every method returns `Result<ControlFlow, RuntimeError>`. Errors
//! propagate with `?`; control signals travel as `ControlFlow::Raise`
//! values until a frame consumes them:
//!
//! - `for`, `while` and `until` bodies: `break` and `continue`
//! - function calls (`call_function`, `ExprEvaluator::call_func`): `return`
//!
//! Resources acquired around a command (redirects, process substitution
//! frames, output flushing) are held in guards, so they are released
//! whichever way the command exits.

use std::cell::RefCell;
use std::rc::Rc;

use brash_types::{CommandStatus, ControlKeyword, SpanId, StatusArray, Value};

use super::control_flow::{ControlFlow, ControlSignal, LoopAction, ReturnPayload, SignalKind};
use super::eval::{BoolEvaluator, EvalResult, RuntimeError, WordEvaluator};
use super::expr::ExprEvaluator;
use super::scope::Scope;
use super::tracer::Tracer;
use crate::ast::{
    Assignment, Command, Condition, ControlArg, ControlStmt, ForLoop, FuncDef, IfStmt, Pipeline,
    Redirect, SimpleCommand, WhileLoop, Word,
};
use crate::exec::{ExecutionContext, FlushGuard, ProcessSubGuard, RedirectGuard, RedirectValue};
use crate::wiring::{Link, WiringError};

/// Status of a command whose redirections could not be applied.
const REDIRECT_FAILED: i32 = 1;

/// What a loop does after one pass over its body or condition.
enum Step {
    Next(i32),
    Exit(i32),
    Raise(ControlSignal),
}

/// Loop frame interception.
fn loop_step(flow: ControlFlow) -> Step {
    match flow {
        ControlFlow::Normal(status) => Step::Next(status),
        ControlFlow::Raise(mut signal) => match signal.handle_loop() {
            LoopAction::Break => Step::Exit(0),
            LoopAction::Continue => Step::Next(0),
            LoopAction::Raise => Step::Raise(signal),
        },
    }
}

pub struct CommandEvaluator {
    scope: Rc<RefCell<Scope>>,
    pub(crate) shell_ex: Link<dyn ExecutionContext>,
    pub(crate) bool_ev: Link<BoolEvaluator>,
    pub(crate) word_ev: Link<WordEvaluator>,
    pub(crate) expr_ev: Link<ExprEvaluator>,
    pub(crate) tracer: Link<Tracer>,
}

impl CommandEvaluator {
    pub fn new(scope: Rc<RefCell<Scope>>) -> Self {
        Self {
            scope,
            shell_ex: Link::new("CommandEvaluator", "shell_ex"),
            bool_ev: Link::new("CommandEvaluator", "bool_ev"),
            word_ev: Link::new("CommandEvaluator", "word_ev"),
            expr_ev: Link::new("CommandEvaluator", "expr_ev"),
            tracer: Link::new("CommandEvaluator", "tracer"),
        }
    }

    pub fn check_circular_deps(&self) -> Result<(), WiringError> {
        self.shell_ex.check()?;
        self.bool_ev.check()?;
        self.word_ev.check()?;
        self.expr_ev.check()?;
        self.tracer.check()
    }

    pub fn scope(&self) -> &Rc<RefCell<Scope>> {
        &self.scope
    }

    /// Execute one command, updating `$?` when it completes normally.
    pub fn execute(&self, node: &Command) -> EvalResult<ControlFlow> {
        tracing::trace!(kind = node.kind_name(), "execute");
        let flow = match node {
            Command::Simple(cmd) => self.execute_simple(cmd)?,
            Command::Assignment(assign) => self.execute_assignment(assign)?,
            Command::Sequence(list) => self.execute_list(list)?,
            Command::AndChain { left, right } => match self.execute(left)? {
                ControlFlow::Normal(0) => self.execute(right)?,
                other => other,
            },
            Command::OrChain { left, right } => match self.execute(left)? {
                ControlFlow::Normal(status) if status != 0 => self.execute(right)?,
                other => other,
            },
            Command::Pipeline(pipeline) => self.execute_pipeline(pipeline)?,
            Command::Subshell(body) => {
                ControlFlow::Normal(self.shell_ex.get()?.run_subshell(body)?)
            }
            Command::Background(body) => {
                ControlFlow::Normal(self.shell_ex.get()?.run_background_job(body)?)
            }
            Command::If(stmt) => self.execute_if(stmt)?,
            Command::For(for_loop) => self.execute_for(for_loop)?,
            Command::While(while_loop) => self.execute_while(while_loop)?,
            Command::FuncDef(def) => {
                self.scope.borrow_mut().define_function(def.clone());
                ControlFlow::ok()
            }
            Command::Control(stmt) => self.eval_control(stmt)?,
            Command::Redirected { body, redirects } => self.execute_redirected(body, redirects)?,
        };
        if let ControlFlow::Normal(status) = flow {
            self.scope.borrow_mut().set_last_status(status);
        }
        Ok(flow)
    }

    /// Execute commands in order, stopping at the first raised signal.
    pub fn execute_list(&self, list: &[Command]) -> EvalResult<ControlFlow> {
        let mut flow = ControlFlow::ok();
        for node in list {
            flow = self.execute(node)?;
            if !flow.is_normal() {
                break;
            }
        }
        Ok(flow)
    }

    /// Execute `node` as a subshell: scope changes are discarded, and any
    /// control signal ends the subshell with the status it carries (or 0).
    pub fn execute_isolated(&self, node: &Command) -> EvalResult<i32> {
        let snapshot = self.scope.borrow().clone();
        let result = self.execute(node);
        *self.scope.borrow_mut() = snapshot;
        match result? {
            ControlFlow::Normal(status) => Ok(status),
            ControlFlow::Raise(signal) => {
                tracing::debug!(%signal, "signal ended subshell");
                Ok(signal.status_code().map_or(0, i32::from))
            }
        }
    }

    /// Run `run` inside a process substitution frame. Substitutions started
    /// while it runs are waited on when it returns, on every exit path, and
    /// their statuses become `_process_sub_status`.
    fn with_process_subs(
        &self,
        run: impl FnOnce(&dyn ExecutionContext) -> EvalResult<ControlFlow>,
    ) -> EvalResult<ControlFlow> {
        let shell_ex = self.shell_ex.get()?;
        let mut statuses = StatusArray::default();
        let result = {
            let _psub = ProcessSubGuard::new(shell_ex.as_ref(), &mut statuses);
            run(shell_ex.as_ref())
        };
        self.scope.borrow_mut().set_process_sub_status(statuses);
        result
    }

    fn execute_simple(&self, cmd: &SimpleCommand) -> EvalResult<ControlFlow> {
        self.with_process_subs(|shell_ex| self.run_simple(cmd, shell_ex))
    }

    fn run_simple(
        &self,
        cmd: &SimpleCommand,
        shell_ex: &dyn ExecutionContext,
    ) -> EvalResult<ControlFlow> {
        let argv = self.word_ev.get()?.eval_words(&cmd.words)?;
        let Some(name) = argv.first() else {
            return Ok(ControlFlow::ok());
        };
        self.tracer.get()?.on_simple_command(&argv)?;

        if name == "builtin" {
            let Some(builtin) = argv.get(1) else {
                return Ok(ControlFlow::ok());
            };
            let _flush = FlushGuard::new(shell_ex);
            return Ok(ControlFlow::Normal(shell_ex.run_builtin(builtin, &argv[1..], cmd.span)?));
        }

        let func = self.scope.borrow().function(name);
        if let Some(def) = func {
            return Ok(ControlFlow::Normal(self.call_function(&def, &argv)?));
        }
        Ok(ControlFlow::Normal(shell_ex.run_simple_command(&argv, cmd.span)?))
    }

    fn execute_assignment(&self, assign: &Assignment) -> EvalResult<ControlFlow> {
        let value = Value::Str(self.word_ev.get()?.eval_word(&assign.value)?);
        let mut scope = self.scope.borrow_mut();
        if assign.local {
            scope.set(assign.name.clone(), value);
        } else {
            scope.set_global(assign.name.clone(), value);
        }
        Ok(ControlFlow::ok())
    }

    fn execute_pipeline(&self, pipeline: &Pipeline) -> EvalResult<ControlFlow> {
        let mut status = CommandStatus::default();
        self.shell_ex.get()?.run_pipeline(pipeline, &mut status)?;
        let code = status.status();
        self.scope.borrow_mut().set_pipe_status(status.pipe_status);
        Ok(ControlFlow::Normal(code))
    }

    /// Redirect targets may contain process substitutions, which stay open
    /// until the body has finished.
    fn execute_redirected(
        &self,
        body: &Command,
        redirects: &[Redirect],
    ) -> EvalResult<ControlFlow> {
        self.with_process_subs(|shell_ex| {
            let values = self.eval_redirects(redirects)?;
            let Some(_redirects) = RedirectGuard::push(shell_ex, &values) else {
                return Ok(ControlFlow::Normal(REDIRECT_FAILED));
            };
            self.execute(body)
        })
    }

    fn eval_redirects(&self, redirects: &[Redirect]) -> EvalResult<Vec<RedirectValue>> {
        let word_ev = self.word_ev.get()?;
        redirects
            .iter()
            .map(|r| {
                Ok(RedirectValue {
                    fd: r.fd,
                    op: r.op,
                    target: word_ev.eval_word(&r.target)?,
                    span: r.span,
                })
            })
            .collect()
    }

    /// `Normal(0)` for true, `Normal(1)` for false, or a signal raised while
    /// running a command condition.
    fn eval_condition(&self, condition: &Condition) -> EvalResult<ControlFlow> {
        match condition {
            Condition::Test(expr) => {
                let truth = self.bool_ev.get()?.eval(expr)?;
                Ok(ControlFlow::Normal(i32::from(!truth)))
            }
            Condition::Command(node) => self.execute(node),
        }
    }

    fn execute_if(&self, stmt: &IfStmt) -> EvalResult<ControlFlow> {
        for arm in &stmt.arms {
            match self.eval_condition(&arm.condition)? {
                ControlFlow::Normal(0) => return self.execute_list(&arm.body),
                ControlFlow::Normal(_) => {}
                raised => return Ok(raised),
            }
        }
        match &stmt.else_body {
            Some(body) => self.execute_list(body),
            None => Ok(ControlFlow::ok()),
        }
    }

    /// Process substitutions in the item list stay open for the whole loop.
    fn execute_for(&self, for_loop: &ForLoop) -> EvalResult<ControlFlow> {
        self.with_process_subs(|_| self.run_for(for_loop))
    }

    fn run_for(&self, for_loop: &ForLoop) -> EvalResult<ControlFlow> {
        let items = self.word_ev.get()?.eval_words(&for_loop.items)?;
        let mut status = 0;
        for item in items {
            self.scope
                .borrow_mut()
                .set_global(for_loop.variable.clone(), Value::Str(item));
            match loop_step(self.execute_list(&for_loop.body)?) {
                Step::Next(s) => status = s,
                Step::Exit(s) => {
                    status = s;
                    break;
                }
                Step::Raise(signal) => return Ok(ControlFlow::Raise(signal)),
            }
        }
        Ok(ControlFlow::Normal(status))
    }

    fn execute_while(&self, while_loop: &WhileLoop) -> EvalResult<ControlFlow> {
        let mut status = 0;
        loop {
            let cond = match self.eval_condition(&while_loop.condition)? {
                ControlFlow::Normal(s) => s,
                raised => match loop_step(raised) {
                    Step::Next(_) => continue,
                    Step::Exit(s) => {
                        status = s;
                        break;
                    }
                    Step::Raise(signal) => return Ok(ControlFlow::Raise(signal)),
                },
            };
            if (cond == 0) == while_loop.until {
                break;
            }
            match loop_step(self.execute_list(&while_loop.body)?) {
                Step::Next(s) => status = s,
                Step::Exit(s) => {
                    status = s;
                    break;
                }
                Step::Raise(signal) => return Ok(ControlFlow::Raise(signal)),
            }
        }
        Ok(ControlFlow::Normal(status))
    }

    /// Turn `break`, `continue` or `return` into a raised signal.
    fn eval_control(&self, stmt: &ControlStmt) -> EvalResult<ControlFlow> {
        let token = stmt.token;
        let signal = match (stmt.keyword, &stmt.arg) {
            (ControlKeyword::Return, Some(ControlArg::Value(expr))) => {
                ControlSignal::return_value(self.expr_ev.get()?.eval_expr(expr)?, token)
            }
            (keyword, Some(ControlArg::Value(_))) => {
                return Err(RuntimeError::Type {
                    expected: "a loop count",
                    got: format!("a typed argument to '{keyword}'"),
                });
            }
            (ControlKeyword::Return, Some(ControlArg::Status(word))) => {
                let status = self.numeric_arg(ControlKeyword::Return, word, token)?;
                ControlSignal::return_status(status, token)
            }
            (ControlKeyword::Return, None) => {
                let last = self.scope.borrow().last_status();
                ControlSignal::return_status(i64::from(last), token)
            }
            (keyword, arg) => {
                let level = match arg {
                    Some(ControlArg::Status(word)) => self.numeric_arg(keyword, word, token)?,
                    _ => 1,
                };
                let levels = u32::try_from(level)
                    .ok()
                    .filter(|&n| n >= 1)
                    .ok_or(RuntimeError::BadLoopLevel { keyword, level, token })?;
                if keyword == ControlKeyword::Break {
                    ControlSignal::break_n(levels, token)
                } else {
                    ControlSignal::continue_n(levels, token)
                }
            }
        };
        self.tracer.get()?.on_control_flow(&signal)?;
        Ok(ControlFlow::Raise(signal))
    }

    fn numeric_arg(&self, keyword: ControlKeyword, word: &Word, token: SpanId) -> EvalResult<i64> {
        let text = self.word_ev.get()?.eval_word(word)?;
        text.trim()
            .parse()
            .map_err(|_| RuntimeError::NumericArgRequired { keyword, arg: text, token })
    }

    /// Call a proc with `argv[0]` as its name. This is the function frame
    /// for status returns.
    pub fn call_function(&self, def: &FuncDef, argv: &[String]) -> EvalResult<i32> {
        if def.typed {
            return Err(RuntimeError::Type {
                expected: "proc",
                got: format!("func '{}'", def.name),
            });
        }
        let args: Vec<Value> = argv.iter().skip(1).map(|a| Value::Str(a.clone())).collect();
        match self.run_function_frame(def, args)? {
            ControlFlow::Normal(status) => Ok(status),
            ControlFlow::Raise(signal) => match signal.kind {
                SignalKind::Return(ReturnPayload::Status(code)) => Ok(i32::from(code)),
                SignalKind::Return(ReturnPayload::Value(_)) => Err(RuntimeError::TypedReturnInProc {
                    name: def.name.clone(),
                    token: signal.token,
                }),
                SignalKind::Break(_) => Err(RuntimeError::UnmatchedControl {
                    keyword: ControlKeyword::Break,
                    token: signal.token,
                }),
                SignalKind::Continue(_) => Err(RuntimeError::UnmatchedControl {
                    keyword: ControlKeyword::Continue,
                    token: signal.token,
                }),
            },
        }
    }

    /// Run a function body in a new frame. The frame is popped and the
    /// caller's positional parameters restored on every exit path.
    pub(crate) fn run_function_frame(
        &self,
        def: &FuncDef,
        args: Vec<Value>,
    ) -> EvalResult<ControlFlow> {
        let _frame = FunctionFrame::enter(&self.scope, def, args);
        self.execute_list(&def.body)
    }
}

struct FunctionFrame<'a> {
    scope: &'a RefCell<Scope>,
    saved: (String, Vec<String>),
}

impl<'a> FunctionFrame<'a> {
    fn enter(scope: &'a RefCell<Scope>, def: &FuncDef, args: Vec<Value>) -> Self {
        let mut s = scope.borrow_mut();
        let saved = s.save_positional();
        s.push_frame();
        s.set_positional(def.name.clone(), args.iter().map(Value::to_string).collect());
        for (param, value) in def.params.iter().zip(args) {
            s.set(param.clone(), value);
        }
        drop(s);
        Self { scope, saved }
    }
}

impl Drop for FunctionFrame<'_> {
    fn drop(&mut self) {
        let mut scope = self.scope.borrow_mut();
        scope.pop_frame();
        let (name, args) = std::mem::take(&mut self.saved);
        scope.set_positional(name, args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::ScriptedContext;
    use crate::wiring::Evaluators;
    use brash_types::NO_SPAN;

    fn wired() -> (Rc<ScriptedContext>, Evaluators) {
        let ctx = Rc::new(ScriptedContext::new());
        let evs = Evaluators::new(ctx.clone(), "+ ");
        evs.init_circular_deps().unwrap();
        (ctx, evs)
    }

    fn simple(words: &[&str]) -> Command {
        Command::Simple(SimpleCommand {
            words: words.iter().map(|w| Word::literal(*w)).collect(),
            span: NO_SPAN,
        })
    }

    fn control(keyword: ControlKeyword, arg: Option<&str>) -> Command {
        Command::Control(ControlStmt {
            keyword,
            arg: arg.map(|a| ControlArg::Status(Word::literal(a))),
            token: SpanId(1),
        })
    }

    #[test]
    fn and_or_chains_short_circuit() {
        let (ctx, evs) = wired();
        let node = Command::OrChain {
            left: Box::new(Command::AndChain {
                left: Box::new(simple(&["false"])),
                right: Box::new(simple(&["echo", "skipped"])),
            }),
            right: Box::new(simple(&["echo", "fallback"])),
        };
        assert_eq!(evs.command.execute(&node).unwrap(), ControlFlow::Normal(0));
        assert_eq!(ctx.output(), "fallback\n");
    }

    #[test]
    fn last_status_tracks_commands() {
        let (_ctx, evs) = wired();
        evs.command.execute(&simple(&["false"])).unwrap();
        assert_eq!(evs.scope.borrow().last_status(), 1);
    }

    #[test]
    fn break_with_bad_level_is_an_error() {
        let (_ctx, evs) = wired();
        let err = evs.command.execute(&control(ControlKeyword::Break, Some("0"))).unwrap_err();
        assert!(matches!(err, RuntimeError::BadLoopLevel { level: 0, .. }));

        let err = evs.command.execute(&control(ControlKeyword::Continue, Some("x"))).unwrap_err();
        assert!(matches!(err, RuntimeError::NumericArgRequired { .. }));
    }

    #[test]
    fn return_without_argument_uses_last_status() {
        let (_ctx, evs) = wired();
        evs.scope.borrow_mut().set_last_status(4);
        let flow = evs.command.execute(&control(ControlKeyword::Return, None)).unwrap();
        match flow {
            ControlFlow::Raise(signal) => assert_eq!(signal.status_code(), Some(4)),
            other => panic!("expected a signal, got {other:?}"),
        }
    }

    #[test]
    fn function_frame_restores_positionals() {
        let (ctx, evs) = wired();
        evs.scope.borrow_mut().set_positional("script", vec!["outer".into()]);
        let def = FuncDef {
            name: "f".into(),
            params: vec![],
            body: Rc::new(vec![Command::Simple(SimpleCommand {
                words: vec![Word::literal("echo"), Word::var("1")],
                span: NO_SPAN,
            })]),
            typed: false,
            span: NO_SPAN,
        };
        let status = evs.command.call_function(&def, &["f".into(), "inner".into()]).unwrap();
        assert_eq!(status, 0);
        assert_eq!(ctx.output(), "inner\n");
        assert_eq!(evs.scope.borrow().get_positional(1), Some("outer"));
        assert_eq!(evs.scope.borrow().depth(), 1);
    }

    #[test]
    fn isolated_execution_discards_scope_changes() {
        let (_ctx, evs) = wired();
        let assign = Command::Assignment(Assignment {
            name: "X".into(),
            value: Word::literal("1"),
            local: false,
        });
        assert_eq!(evs.command.execute_isolated(&assign).unwrap(), 0);
        assert!(!evs.scope.borrow().contains("X"));
    }

    #[test]
    fn while_loop_runs_until_condition_fails() {
        let (ctx, evs) = wired();
        evs.scope.borrow_mut().set("n", Value::Str("0".into()));
        let cond = Condition::Test(crate::ast::BoolExpr::Compare {
            op: crate::ast::CmpOp::IntLt,
            left: Word::var("n"),
            right: Word::literal("3"),
        });
        let body = vec![
            Command::Simple(SimpleCommand {
                words: vec![Word::literal("echo"), Word::var("n")],
                span: NO_SPAN,
            }),
            Command::Assignment(Assignment {
                name: "n".into(),
                value: Word::Arith(Box::new(crate::ast::ArithExpr::Binary {
                    op: crate::ast::ArithOp::Add,
                    left: Box::new(crate::ast::ArithExpr::Word(Word::var("n"))),
                    right: Box::new(crate::ast::ArithExpr::Num(1)),
                })),
                local: false,
            }),
        ];
        let node = Command::While(WhileLoop { condition: cond, body, until: false });
        assert_eq!(evs.command.execute(&node).unwrap(), ControlFlow::Normal(0));
        assert_eq!(ctx.output(), "0\n1\n2\n");
    }
}
