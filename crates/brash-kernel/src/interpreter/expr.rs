//! Typed expressions and function calls.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use brash_types::{SpanId, Value};

use super::command::CommandEvaluator;
use super::control_flow::{ControlFlow, ReturnPayload, SignalKind};
use super::eval::{
    ArithEvaluator, EvalResult, RuntimeError, WordEvaluator, strip_trailing_newlines,
};
use super::scope::Scope;
use crate::ast::{Expr, FuncDef};
use crate::exec::ExecutionContext;
use crate::wiring::{Link, WiringError};

/// A function implemented in Rust, callable from expressions.
pub trait Callable {
    fn call(&self, args: &[Value]) -> EvalResult<Value>;
}

impl<F> Callable for F
where
    F: Fn(&[Value]) -> EvalResult<Value>,
{
    fn call(&self, args: &[Value]) -> EvalResult<Value> {
        self(args)
    }
}

/// Evaluates typed expressions and dispatches `name(args)` calls.
///
/// Calls go to registered callables first, then to typed funcs defined in
/// the scope.
pub struct ExprEvaluator {
    scope: Rc<RefCell<Scope>>,
    callables: RefCell<HashMap<String, Rc<dyn Callable>>>,
    pub(crate) shell_ex: Link<dyn ExecutionContext>,
    pub(crate) cmd_ev: Link<CommandEvaluator>,
    pub(crate) word_ev: Link<WordEvaluator>,
    pub(crate) arith_ev: Link<ArithEvaluator>,
}

impl ExprEvaluator {
    pub fn new(scope: Rc<RefCell<Scope>>) -> Self {
        Self {
            scope,
            callables: RefCell::new(HashMap::new()),
            shell_ex: Link::new("ExprEvaluator", "shell_ex"),
            cmd_ev: Link::new("ExprEvaluator", "cmd_ev"),
            word_ev: Link::new("ExprEvaluator", "word_ev"),
            arith_ev: Link::new("ExprEvaluator", "arith_ev"),
        }
    }

    pub fn check_circular_deps(&self) -> Result<(), WiringError> {
        self.shell_ex.check()?;
        self.cmd_ev.check()?;
        self.word_ev.check()?;
        self.arith_ev.check()
    }

    pub fn register_callable(&self, name: impl Into<String>, callable: impl Callable + 'static) {
        self.callables.borrow_mut().insert(name.into(), Rc::new(callable));
    }

    /// True if `name(…)` would resolve to a callable or a typed func.
    pub fn has_function(&self, name: &str) -> bool {
        self.callables.borrow().contains_key(name)
            || self.scope.borrow().function(name).is_some_and(|def| def.typed)
    }

    pub fn eval_expr(&self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Word(word) => Ok(Value::Str(self.word_ev.get()?.eval_word(word)?)),
            Expr::Arith(arith) => Ok(Value::Int(self.arith_ev.get()?.eval(arith)?)),
            Expr::List(items) => Ok(Value::List(
                items.iter().map(|item| self.eval_expr(item)).collect::<EvalResult<_>>()?,
            )),
            Expr::CommandSub(body) => {
                let out = self.shell_ex.get()?.run_command_sub(body)?;
                Ok(Value::Str(strip_trailing_newlines(out)))
            }
            Expr::Call { name, args, span } => {
                let args = args.iter().map(|a| self.eval_expr(a)).collect::<EvalResult<Vec<_>>>()?;
                self.call_named(name, args, *span)
            }
        }
    }

    pub fn call_named(&self, name: &str, args: Vec<Value>, span: SpanId) -> EvalResult<Value> {
        let callable = self.callables.borrow().get(name).cloned();
        if let Some(callable) = callable {
            return callable.call(&args);
        }

        let def = self.scope.borrow().function(name);
        match def {
            Some(def) if def.typed => self.call_func(&def, args),
            Some(_) => Err(RuntimeError::Type {
                expected: "func",
                got: format!("proc '{name}'"),
            }),
            None => Err(RuntimeError::UndefinedFunction { name: name.to_string(), token: span }),
        }
    }

    /// Call a typed func. This is the function frame for value returns:
    /// `return (v)` yields `v`, `return N` yields `Int(N)`, falling off
    /// the end yields `Null`.
    pub fn call_func(&self, def: &FuncDef, args: Vec<Value>) -> EvalResult<Value> {
        let flow = self.cmd_ev.get()?.run_function_frame(def, args)?;
        match flow {
            ControlFlow::Normal(_) => Ok(Value::Null),
            ControlFlow::Raise(signal) => {
                let keyword = signal.keyword();
                match signal.kind {
                    SignalKind::Return(ReturnPayload::Value(value)) => Ok(value),
                    SignalKind::Return(ReturnPayload::Status(code)) => {
                        Ok(Value::Int(i64::from(code)))
                    }
                    SignalKind::Break(_) | SignalKind::Continue(_) => {
                        Err(RuntimeError::UnmatchedControl { keyword, token: signal.token })
                    }
                }
            }
        }
    }
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

    #[test]
    fn callables_take_evaluated_arguments() {
        let evs = wired();
        evs.expr.register_callable("len", |args: &[Value]| -> EvalResult<Value> {
            match args {
                [Value::List(items)] => Ok(Value::Int(items.len() as i64)),
                _ => Err(RuntimeError::Type { expected: "List", got: "other".into() }),
            }
        });
        let call = Expr::Call {
            name: "len".into(),
            args: vec![Expr::List(vec![Expr::Literal(Value::Int(1)), Expr::Literal(Value::Null)])],
            span: SpanId(0),
        };
        assert_eq!(evs.expr.eval_expr(&call).unwrap(), Value::Int(2));
        assert!(evs.expr.has_function("len"));
    }

    #[test]
    fn unknown_call_names_its_token() {
        let evs = wired();
        let call = Expr::Call { name: "nope".into(), args: vec![], span: SpanId(9) };
        assert_eq!(
            evs.expr.eval_expr(&call),
            Err(RuntimeError::UndefinedFunction { name: "nope".into(), token: SpanId(9) })
        );
    }
}
