//! In-memory execution context for tests and embedding.
//!
//! `ScriptedContext` runs builtins in-process, simulates a descriptor table
//! with in-memory files, and records every call it receives so tests can
//! assert on push/pop pairing.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::io;
use std::rc::Rc;

use brash_types::{CommandStatus, SpanId, StatusArray};

use super::context::{Builtin, Constant, Echo, ExecutionContext, RedirectValue};
use crate::ast::{Command, Pipeline, RedirectOp};
use crate::interpreter::{CommandEvaluator, RuntimeError};
use crate::wiring::{Evaluators, Link, WiringError};

/// Status of a command that could not be found.
pub const NOT_FOUND: i32 = 127;

#[derive(Debug, Default)]
struct State {
    calls: Vec<String>,
    stdout: String,
    stderr: String,
    /// Output buffers of running command and process substitutions.
    captures: Vec<String>,
    files: BTreeMap<String, String>,
    /// Redirected descriptors and the file each one points at.
    fds: HashMap<i32, String>,
    /// Previous binding of each pushed descriptor, innermost last.
    saved_fds: Vec<(i32, Option<String>)>,
    unopenable: HashSet<String>,
    /// Statuses of finished process substitutions, per open frame.
    psub_frames: Vec<Vec<(i32, SpanId)>>,
    next_fd: i32,
}

/// A scriptable `ExecutionContext`.
pub struct ScriptedContext {
    state: RefCell<State>,
    builtins: RefCell<HashMap<String, Rc<dyn Builtin>>>,
    cmd_ev: Link<CommandEvaluator>,
}

impl ScriptedContext {
    /// A context with `echo`, `true` and `false`.
    pub fn new() -> Self {
        let ctx = Self {
            state: RefCell::new(State { next_fd: 63, ..State::default() }),
            builtins: RefCell::new(HashMap::new()),
            cmd_ev: Link::new("ScriptedContext", "cmd_ev"),
        };
        ctx.register_builtin("echo", Echo);
        ctx.register_builtin("true", Constant(0));
        ctx.register_builtin("false", Constant(1));
        ctx
    }

    pub fn register_builtin(&self, name: impl Into<String>, builtin: impl Builtin + 'static) {
        self.builtins.borrow_mut().insert(name.into(), Rc::new(builtin));
    }

    /// Make every redirect to `path` fail to open.
    pub fn fail_redirect_to(&self, path: impl Into<String>) {
        self.state.borrow_mut().unopenable.insert(path.into());
    }

    /// Create an in-memory file.
    pub fn add_file(&self, path: impl Into<String>, contents: impl Into<String>) {
        self.state.borrow_mut().files.insert(path.into(), contents.into());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state.borrow().files.get(path).cloned()
    }

    /// Everything written to the top-level stdout.
    pub fn output(&self) -> String {
        self.state.borrow().stdout.clone()
    }

    pub fn stderr(&self) -> String {
        self.state.borrow().stderr.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls_matching(prefix).len()
    }

    /// Number of redirections currently pushed.
    pub fn redirect_depth(&self) -> usize {
        self.state.borrow().saved_fds.len()
    }

    /// Number of open process substitution frames.
    pub fn process_sub_depth(&self) -> usize {
        self.state.borrow().psub_frames.len()
    }

    fn record(&self, call: impl Into<String>) {
        self.state.borrow_mut().calls.push(call.into());
    }

    fn write_fd(&self, fd: i32, text: &str) {
        let mut state = self.state.borrow_mut();
        if let Some(path) = state.fds.get(&fd).cloned() {
            state.files.entry(path).or_default().push_str(text);
        } else if fd == 2 {
            state.stderr.push_str(text);
        } else if let Some(buf) = state.captures.last_mut() {
            buf.push_str(text);
        } else {
            state.stdout.push_str(text);
        }
    }

    fn run_in_process(&self, builtin: &dyn Builtin, argv: &[String]) -> Result<i32, RuntimeError> {
        let mut out = Vec::new();
        let status = builtin
            .run(argv, &mut out)
            .map_err(|e| RuntimeError::Io(e.to_string()))?;
        self.write_fd(1, &String::from_utf8_lossy(&out));
        Ok(status)
    }

    fn builtin(&self, name: &str) -> Option<Rc<dyn Builtin>> {
        self.builtins.borrow().get(name).cloned()
    }

    /// Run `node` with stdout captured, as a subshell.
    fn capture(&self, node: &Command) -> Result<(i32, String), RuntimeError> {
        let cmd_ev = self.cmd_ev.get()?;
        let saved_stdout = {
            let mut state = self.state.borrow_mut();
            state.captures.push(String::new());
            state.fds.remove(&1)
        };
        let result = cmd_ev.execute_isolated(node);
        let output = {
            let mut state = self.state.borrow_mut();
            if let Some(path) = saved_stdout {
                state.fds.insert(1, path);
            }
            state.captures.pop().unwrap_or_default()
        };
        Ok((result?, output))
    }

    /// Apply one redirection, recording the previous binding.
    fn apply(state: &mut State, redirect: &RedirectValue) -> bool {
        let target = match redirect.op {
            RedirectOp::Dup => match redirect.target.parse::<i32>() {
                Ok(fd) => state.fds.get(&fd).cloned().unwrap_or_else(|| format!("/dev/fd/{fd}")),
                Err(_) => return false,
            },
            _ if state.unopenable.contains(&redirect.target) => return false,
            RedirectOp::Read if !state.files.contains_key(&redirect.target) => return false,
            RedirectOp::Read => redirect.target.clone(),
            RedirectOp::Write => {
                state.files.insert(redirect.target.clone(), String::new());
                redirect.target.clone()
            }
            RedirectOp::Append => {
                state.files.entry(redirect.target.clone()).or_default();
                redirect.target.clone()
            }
        };
        let previous = state.fds.insert(redirect.fd, target);
        state.saved_fds.push((redirect.fd, previous));
        true
    }

    fn restore(state: &mut State, count: usize) {
        for _ in 0..count {
            let Some((fd, previous)) = state.saved_fds.pop() else {
                tracing::warn!("pop_redirects with nothing pushed");
                return;
            };
            match previous {
                Some(path) => state.fds.insert(fd, path),
                None => state.fds.remove(&fd),
            };
        }
    }
}

impl Default for ScriptedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScriptedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedContext")
            .field("state", &self.state)
            .field("builtins", &self.builtins.borrow().keys().collect::<Vec<_>>())
            .field("cmd_ev", &self.cmd_ev)
            .finish()
    }
}

impl ExecutionContext for ScriptedContext {
    fn run_simple_command(&self, argv: &[String], _span: SpanId) -> Result<i32, RuntimeError> {
        self.record(format!("run {}", argv.join(" ")));
        let Some(name) = argv.first() else {
            return Ok(0);
        };
        match self.builtin(name) {
            Some(builtin) => self.run_in_process(builtin.as_ref(), argv),
            None => {
                self.write_fd(2, &format!("brash: {name}: command not found\n"));
                Ok(NOT_FOUND)
            }
        }
    }

    fn run_builtin(&self, name: &str, argv: &[String], _span: SpanId) -> Result<i32, RuntimeError> {
        self.record(format!("builtin {}", argv.join(" ")));
        match self.builtin(name) {
            Some(builtin) => self.run_in_process(builtin.as_ref(), argv),
            None => {
                self.write_fd(2, &format!("brash: builtin: {name}: not a shell builtin\n"));
                Ok(1)
            }
        }
    }

    fn run_background_job(&self, node: &Command) -> Result<i32, RuntimeError> {
        self.record(format!("background {}", node.kind_name()));
        // Jobs finish before the launch returns.
        let status = self.cmd_ev.get()?.execute_isolated(node)?;
        tracing::debug!(status, "background job finished");
        Ok(0)
    }

    fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        status: &mut CommandStatus,
    ) -> Result<(), RuntimeError> {
        self.record(format!("pipeline {}", pipeline.commands.len()));
        let cmd_ev = self.cmd_ev.get()?;
        for stage in &pipeline.commands {
            status.pipe_status.push(cmd_ev.execute_isolated(stage)?);
        }
        status.negated = pipeline.negated;
        Ok(())
    }

    fn run_subshell(&self, node: &Command) -> Result<i32, RuntimeError> {
        self.record("subshell");
        self.cmd_ev.get()?.execute_isolated(node)
    }

    fn run_command_sub(&self, node: &Command) -> Result<String, RuntimeError> {
        self.record("command_sub");
        let (_, output) = self.capture(node)?;
        Ok(output)
    }

    fn run_process_sub(&self, node: &Command, span: SpanId) -> Result<String, RuntimeError> {
        self.record("process_sub");
        let (status, output) = self.capture(node)?;
        let mut state = self.state.borrow_mut();
        let path = format!("/dev/fd/{}", state.next_fd);
        state.next_fd += 1;
        state.files.insert(path.clone(), output);
        match state.psub_frames.last_mut() {
            Some(frame) => frame.push((status, span)),
            None => {
                return Err(RuntimeError::Io(
                    "process substitution started outside a command".to_string(),
                ));
            }
        }
        Ok(path)
    }

    fn push_redirects(&self, redirects: &[RedirectValue]) -> bool {
        let mut state = self.state.borrow_mut();
        for (applied, redirect) in redirects.iter().enumerate() {
            if !Self::apply(&mut state, redirect) {
                Self::restore(&mut state, applied);
                state.calls.push(format!("push_redirects failed at {}", redirect.target));
                return false;
            }
        }
        state.calls.push(format!("push_redirects {}", redirects.len()));
        true
    }

    fn pop_redirects(&self, count: usize) {
        let mut state = self.state.borrow_mut();
        Self::restore(&mut state, count);
        state.calls.push(format!("pop_redirects {count}"));
    }

    fn push_process_sub(&self) {
        let mut state = self.state.borrow_mut();
        state.psub_frames.push(Vec::new());
        state.calls.push("push_process_sub".to_string());
    }

    fn pop_process_sub(&self, statuses: &mut StatusArray) {
        let mut state = self.state.borrow_mut();
        let frame = state.psub_frames.pop().unwrap_or_default();
        state.calls.push(format!("pop_process_sub {}", frame.len()));
        for (status, span) in frame {
            statuses.push(status, span);
        }
    }

    fn flush_stdout(&self) -> io::Result<()> {
        self.record("flush");
        Ok(())
    }

    fn wire(&self, evaluators: &Evaluators) -> Result<(), WiringError> {
        self.cmd_ev.set(&evaluators.command)
    }

    fn check_circular_deps(&self) -> Result<(), WiringError> {
        self.cmd_ev.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redirect(fd: i32, op: RedirectOp, target: &str) -> RedirectValue {
        RedirectValue { fd, op, target: target.into(), span: SpanId(0) }
    }

    #[test]
    fn unknown_command_is_127() {
        let ctx = ScriptedContext::new();
        let status = ctx.run_simple_command(&["frobnicate".to_string()], SpanId(0)).unwrap();
        assert_eq!(status, NOT_FOUND);
        assert_eq!(ctx.stderr(), "brash: frobnicate: command not found\n");
    }

    #[test]
    fn redirected_output_goes_to_file() {
        let ctx = ScriptedContext::new();
        assert!(ctx.push_redirects(&[redirect(1, RedirectOp::Write, "out.txt")]));
        ctx.run_simple_command(&["echo".into(), "hi".into()], SpanId(0)).unwrap();
        ctx.pop_redirects(1);
        ctx.run_simple_command(&["echo".into(), "there".into()], SpanId(0)).unwrap();
        assert_eq!(ctx.file("out.txt").as_deref(), Some("hi\n"));
        assert_eq!(ctx.output(), "there\n");
    }

    #[test]
    fn failed_push_restores_earlier_redirects() {
        let ctx = ScriptedContext::new();
        assert!(ctx.push_redirects(&[redirect(1, RedirectOp::Write, "outer")]));
        let ok = ctx.push_redirects(&[
            redirect(1, RedirectOp::Write, "inner"),
            redirect(0, RedirectOp::Read, "missing"),
        ]);
        assert!(!ok);
        assert_eq!(ctx.redirect_depth(), 1);
        ctx.run_simple_command(&["echo".into(), "x".into()], SpanId(0)).unwrap();
        assert_eq!(ctx.file("outer").as_deref(), Some("x\n"));
    }

    #[test]
    fn dup_copies_the_binding() {
        let ctx = ScriptedContext::new();
        assert!(ctx.push_redirects(&[
            redirect(2, RedirectOp::Write, "err.log"),
            redirect(1, RedirectOp::Dup, "2"),
        ]));
        ctx.run_simple_command(&["echo".into(), "both".into()], SpanId(0)).unwrap();
        ctx.pop_redirects(2);
        assert_eq!(ctx.file("err.log").as_deref(), Some("both\n"));
        assert_eq!(ctx.redirect_depth(), 0);
    }

    #[test]
    fn empty_process_sub_frame_collects_nothing() {
        let ctx = ScriptedContext::new();
        let mut statuses = StatusArray::default();
        ctx.push_process_sub();
        ctx.pop_process_sub(&mut statuses);
        assert!(statuses.is_empty());
        assert_eq!(ctx.process_sub_depth(), 0);
    }
}
