//! Scoped acquisition of execution-context resources.
//!
//! Each guard releases in `Drop`, so the release runs on every exit path:
//! normal completion, `?` propagation, a control signal returned as a
//! value, and panic unwinding.

use brash_types::StatusArray;

use super::context::{ExecutionContext, RedirectValue};

/// Pops redirections pushed by a successful `push_redirects`.
///
/// Acquisition is asymmetric: `push` returns `None` when the push failed,
/// and no pop is owed.
#[must_use = "redirects are popped when the guard is dropped"]
pub struct RedirectGuard<'a> {
    ctx: &'a dyn ExecutionContext,
    count: usize,
}

impl<'a> RedirectGuard<'a> {
    pub fn push(ctx: &'a dyn ExecutionContext, redirects: &[RedirectValue]) -> Option<Self> {
        if ctx.push_redirects(redirects) {
            Some(Self { ctx, count: redirects.len() })
        } else {
            tracing::debug!(count = redirects.len(), "redirect push failed; body skipped");
            None
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl Drop for RedirectGuard<'_> {
    fn drop(&mut self) {
        self.ctx.pop_redirects(self.count);
    }
}

/// Brackets the process substitutions started while evaluating one command.
#[must_use = "process substitutions are waited on when the guard is dropped"]
pub struct ProcessSubGuard<'a> {
    ctx: &'a dyn ExecutionContext,
    statuses: &'a mut StatusArray,
}

impl<'a> ProcessSubGuard<'a> {
    pub fn new(ctx: &'a dyn ExecutionContext, statuses: &'a mut StatusArray) -> Self {
        ctx.push_process_sub();
        Self { ctx, statuses }
    }
}

impl Drop for ProcessSubGuard<'_> {
    fn drop(&mut self) {
        self.ctx.pop_process_sub(self.statuses);
    }
}

/// Flushes buffered stdout when dropped, so builtin output stays ordered
/// with the output of child processes.
#[must_use = "stdout is flushed when the guard is dropped"]
pub struct FlushGuard<'a> {
    ctx: &'a dyn ExecutionContext,
}

impl<'a> FlushGuard<'a> {
    pub fn new(ctx: &'a dyn ExecutionContext) -> Self {
        Self { ctx }
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.flush_stdout() {
            tracing::warn!("failed to flush stdout: {e}");
        }
    }
}
