//! Two-phase construction of the evaluator set.
//!
//! The evaluators call each other: words contain arithmetic and command
//! substitutions, commands evaluate words, typed funcs run command bodies,
//! and so on. They are built in two phases:
//!
//! 1. `Evaluators::new` constructs every component with its links unset.
//!    The `Evaluators` struct holds the only strong references.
//! 2. `Evaluators::init_circular_deps` sets every link once (as a `Weak`),
//!    then validates that nothing was missed.
//!
//! A `Link` can be set exactly once, so the wiring pass cannot run twice.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use thiserror::Error;

use crate::exec::ExecutionContext;
use crate::interpreter::{
    ArithEvaluator, BoolEvaluator, CommandEvaluator, ExprEvaluator, PromptEvaluator, Scope, Tracer,
    WordEvaluator,
};

/// Wiring protocol violations. All of them are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WiringError {
    #[error("{component}.{link} was never wired")]
    MissingLink { component: &'static str, link: &'static str },
    #[error("{component}.{link} was wired twice")]
    AlreadyWired { component: &'static str, link: &'static str },
    #[error("{component}.{link} points at a component that was dropped")]
    Dangling { component: &'static str, link: &'static str },
}

/// A non-owning reference to another component, set once during wiring.
pub struct Link<T: ?Sized> {
    component: &'static str,
    name: &'static str,
    target: OnceCell<Weak<T>>,
}

impl<T: ?Sized> Link<T> {
    pub fn new(component: &'static str, name: &'static str) -> Self {
        Self { component, name, target: OnceCell::new() }
    }

    pub fn set(&self, target: &Rc<T>) -> Result<(), WiringError> {
        self.target.set(Rc::downgrade(target)).map_err(|_| WiringError::AlreadyWired {
            component: self.component,
            link: self.name,
        })
    }

    pub fn get(&self) -> Result<Rc<T>, WiringError> {
        let weak = self.target.get().ok_or(WiringError::MissingLink {
            component: self.component,
            link: self.name,
        })?;
        weak.upgrade().ok_or(WiringError::Dangling {
            component: self.component,
            link: self.name,
        })
    }

    pub fn is_set(&self) -> bool {
        self.target.get().is_some()
    }

    /// Validation step: the link is set and its target is alive.
    pub fn check(&self) -> Result<(), WiringError> {
        self.get().map(drop)
    }
}

impl<T: ?Sized> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("link", &format_args!("{}.{}", self.component, self.name))
            .field("set", &self.is_set())
            .finish()
    }
}

/// Owner of every evaluator, the shared scope and the execution context.
pub struct Evaluators {
    pub scope: Rc<RefCell<Scope>>,
    pub arith: Rc<ArithEvaluator>,
    pub boolean: Rc<BoolEvaluator>,
    pub word: Rc<WordEvaluator>,
    pub expr: Rc<ExprEvaluator>,
    pub command: Rc<CommandEvaluator>,
    pub prompt: Rc<PromptEvaluator>,
    pub tracer: Rc<Tracer>,
    pub shell_ex: Rc<dyn ExecutionContext>,
}

impl Evaluators {
    /// Phase one: construct every component, links unset.
    pub fn new(shell_ex: Rc<dyn ExecutionContext>, ps4: impl Into<String>) -> Self {
        let scope = Rc::new(RefCell::new(Scope::new()));
        Self {
            arith: Rc::new(ArithEvaluator::new(scope.clone())),
            boolean: Rc::new(BoolEvaluator::new()),
            word: Rc::new(WordEvaluator::new(scope.clone())),
            expr: Rc::new(ExprEvaluator::new(scope.clone())),
            command: Rc::new(CommandEvaluator::new(scope.clone())),
            prompt: Rc::new(PromptEvaluator::new(scope.clone())),
            tracer: Rc::new(Tracer::new(scope.clone(), ps4)),
            scope,
            shell_ex,
        }
    }

    /// Phase two: assign every cross-reference, then validate.
    ///
    /// Must run exactly once, before any command executes. A second call
    /// fails with `WiringError::AlreadyWired`.
    pub fn init_circular_deps(&self) -> Result<(), WiringError> {
        self.arith.word_ev.set(&self.word)?;

        self.boolean.word_ev.set(&self.word)?;

        self.word.arith_ev.set(&self.arith)?;
        self.word.expr_ev.set(&self.expr)?;
        self.word.prompt_ev.set(&self.prompt)?;
        self.word.shell_ex.set(&self.shell_ex)?;

        self.expr.shell_ex.set(&self.shell_ex)?;
        self.expr.cmd_ev.set(&self.command)?;
        self.expr.word_ev.set(&self.word)?;
        self.expr.arith_ev.set(&self.arith)?;

        self.command.shell_ex.set(&self.shell_ex)?;
        self.command.bool_ev.set(&self.boolean)?;
        self.command.word_ev.set(&self.word)?;
        self.command.expr_ev.set(&self.expr)?;
        self.command.tracer.set(&self.tracer)?;

        self.prompt.word_ev.set(&self.word)?;
        self.prompt.expr_ev.set(&self.expr)?;

        self.tracer.word_ev.set(&self.word)?;

        self.shell_ex.wire(self)?;

        self.check_circular_deps()?;
        tracing::debug!("evaluators wired");
        Ok(())
    }

    /// Validation pass: every component asserts its links are set.
    pub fn check_circular_deps(&self) -> Result<(), WiringError> {
        self.arith.check_circular_deps()?;
        self.boolean.check_circular_deps()?;
        self.word.check_circular_deps()?;
        self.expr.check_circular_deps()?;
        self.command.check_circular_deps()?;
        self.prompt.check_circular_deps()?;
        self.tracer.check_circular_deps()?;
        self.shell_ex.check_circular_deps()
    }
}

impl fmt::Debug for Evaluators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluators")
            .field("scope_depth", &self.scope.borrow().depth())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::NoOpContext;

    #[test]
    fn link_is_set_once() {
        let target = Rc::new(5u32);
        let link: Link<u32> = Link::new("Test", "number");
        assert_eq!(
            link.check(),
            Err(WiringError::MissingLink { component: "Test", link: "number" })
        );
        link.set(&target).unwrap();
        assert_eq!(*link.get().unwrap(), 5);
        assert_eq!(
            link.set(&target),
            Err(WiringError::AlreadyWired { component: "Test", link: "number" })
        );
    }

    #[test]
    fn link_to_dropped_target_is_dangling() {
        let link: Link<u32> = Link::new("Test", "number");
        {
            let target = Rc::new(1u32);
            link.set(&target).unwrap();
        }
        assert!(link.is_set());
        assert!(matches!(link.check(), Err(WiringError::Dangling { .. })));
    }

    #[test]
    fn links_do_not_keep_targets_alive() {
        let evs = Evaluators::new(Rc::new(NoOpContext), "+ ");
        evs.init_circular_deps().unwrap();
        assert_eq!(Rc::strong_count(&evs.word), 1);
        assert_eq!(Rc::strong_count(&evs.command), 1);
    }

    #[test]
    fn validation_fails_before_wiring_and_passes_after() {
        let evs = Evaluators::new(Rc::new(NoOpContext), "+ ");
        assert!(matches!(
            evs.check_circular_deps(),
            Err(WiringError::MissingLink { component: "ArithEvaluator", .. })
        ));
        evs.init_circular_deps().unwrap();
        evs.check_circular_deps().unwrap();
    }

    #[test]
    fn wiring_runs_once() {
        let evs = Evaluators::new(Rc::new(NoOpContext), "+ ");
        evs.init_circular_deps().unwrap();
        assert!(matches!(
            evs.init_circular_deps(),
            Err(WiringError::AlreadyWired { .. })
        ));
    }
}
