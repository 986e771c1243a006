//! Execution-context seam: redirect and process-substitution stacks stay
//! balanced on every exit path, and the evaluator wiring is validated.

use std::rc::Rc;

use brash_kernel::ast::{
    Command, ControlArg, ControlStmt, Expr, ForLoop, Pipeline, Program, Redirect, RedirectOp,
    SimpleCommand, Word,
};
use brash_kernel::exec::testing::{NOT_FOUND, ScriptedContext};
use brash_kernel::{Evaluators, ExecOutcome, Kernel, KernelConfig, NoOpContext, WiringError};
use brash_types::{ControlKeyword, NO_SPAN, SpanId};

fn shell() -> (Rc<ScriptedContext>, Kernel) {
    let ctx = Rc::new(ScriptedContext::new());
    let kernel = Kernel::new(KernelConfig::transient(), ctx.clone()).unwrap();
    (ctx, kernel)
}

fn run(kernel: &mut Kernel, statements: Vec<Command>) -> ExecOutcome {
    kernel.execute(&Program { statements }).unwrap()
}

fn simple(words: &[&str]) -> Command {
    Command::Simple(SimpleCommand {
        words: words.iter().map(|w| Word::literal(*w)).collect(),
        span: NO_SPAN,
    })
}

fn echo(word: Word) -> Command {
    Command::Simple(SimpleCommand { words: vec![Word::literal("echo"), word], span: NO_SPAN })
}

fn to_file(fd: i32, op: RedirectOp, path: &str) -> Redirect {
    Redirect { fd, op, target: Word::literal(path), span: NO_SPAN }
}

fn redirected(body: Vec<Command>, redirects: Vec<Redirect>) -> Command {
    Command::Redirected { body: Box::new(Command::Sequence(body)), redirects }
}

fn psub(body: Command, span: u32) -> Word {
    Word::ProcessSub { body: Box::new(body), span: SpanId(span) }
}

fn brk() -> Command {
    Command::Control(ControlStmt { keyword: ControlKeyword::Break, arg: None, token: NO_SPAN })
}

// ============================================================================
// Redirects
// ============================================================================

#[test]
fn failed_redirect_skips_the_body_and_is_never_popped() {
    let (ctx, mut kernel) = shell();
    ctx.fail_redirect_to("/readonly/out");

    let outcome = run(
        &mut kernel,
        vec![redirected(
            vec![echo(Word::literal("hi"))],
            vec![to_file(1, RedirectOp::Write, "/readonly/out")],
        )],
    );
    assert_eq!(outcome.status, 1);
    assert_eq!(ctx.output(), "");
    assert_eq!(ctx.calls_matching("push_redirects"), ["push_redirects failed at /readonly/out"]);
    assert_eq!(ctx.count_calls("pop_redirects"), 0);
    assert_eq!(ctx.count_calls("run"), 0);
}

#[test]
fn partial_redirect_failure_restores_earlier_descriptors() {
    let (ctx, mut kernel) = shell();
    ctx.fail_redirect_to("/dev/full");

    run(
        &mut kernel,
        vec![
            redirected(
                vec![echo(Word::literal("lost"))],
                vec![
                    to_file(1, RedirectOp::Write, "out.txt"),
                    to_file(2, RedirectOp::Write, "/dev/full"),
                ],
            ),
            echo(Word::literal("visible")),
        ],
    );
    assert_eq!(ctx.redirect_depth(), 0);
    assert_eq!(ctx.output(), "visible\n");
    assert_eq!(ctx.file("out.txt").as_deref(), Some(""));
}

#[test]
fn reading_a_missing_file_fails_the_redirect() {
    let (ctx, mut kernel) = shell();
    let outcome = run(
        &mut kernel,
        vec![redirected(vec![simple(&["true"])], vec![to_file(0, RedirectOp::Read, "missing")])],
    );
    assert_eq!(outcome.status, 1);
    assert_eq!(ctx.count_calls("pop_redirects"), 0);
}

#[test]
fn reading_an_existing_file() {
    let (ctx, mut kernel) = shell();
    ctx.add_file("in.txt", "data\n");
    let outcome = run(
        &mut kernel,
        vec![redirected(vec![simple(&["true"])], vec![to_file(0, RedirectOp::Read, "in.txt")])],
    );
    assert_eq!(outcome.status, 0);
    assert_eq!(ctx.calls_matching("push_redirects"), ["push_redirects 1"]);
    assert_eq!(ctx.calls_matching("pop_redirects"), ["pop_redirects 1"]);
    assert_eq!(ctx.file("in.txt").as_deref(), Some("data\n"));
}

#[test]
fn break_inside_a_redirected_block_pops_once() {
    let (ctx, mut kernel) = shell();
    let body = redirected(
        vec![echo(Word::var("i")), brk()],
        vec![to_file(1, RedirectOp::Append, "log.txt")],
    );
    run(
        &mut kernel,
        vec![Command::For(ForLoop {
            variable: "i".into(),
            items: vec![Word::literal("1"), Word::literal("2")],
            body: vec![body],
        })],
    );
    assert_eq!(ctx.file("log.txt").as_deref(), Some("1\n"));
    assert_eq!(ctx.calls_matching("pop_redirects"), ["pop_redirects 1"]);
    assert_eq!(ctx.redirect_depth(), 0);
    assert_eq!(ctx.output(), "");
}

#[test]
fn runtime_error_inside_a_redirected_block_still_pops() {
    let (ctx, mut kernel) = shell();
    let failing = echo(Word::Expr(Box::new(Expr::Call {
        name: "nope".into(),
        args: vec![],
        span: NO_SPAN,
    })));
    let outcome = run(
        &mut kernel,
        vec![redirected(vec![failing], vec![to_file(1, RedirectOp::Write, "out.txt")])],
    );
    assert_eq!(outcome.diagnostics[0].message, "undefined function: nope");
    assert_eq!(ctx.count_calls("pop_redirects"), 1);
    assert_eq!(ctx.redirect_depth(), 0);
}

#[test]
fn return_from_a_redirected_function_body_pops_once() {
    let (ctx, mut kernel) = shell();
    let ret = Command::Control(ControlStmt {
        keyword: ControlKeyword::Return,
        arg: Some(ControlArg::Status(Word::literal("4"))),
        token: NO_SPAN,
    });
    let def = Command::FuncDef(brash_kernel::ast::FuncDef {
        name: "f".into(),
        params: vec![],
        body: Rc::new(vec![redirected(
            vec![echo(Word::literal("quiet")), ret],
            vec![to_file(1, RedirectOp::Write, "f.out")],
        )]),
        typed: false,
        span: NO_SPAN,
    });
    run(&mut kernel, vec![def, simple(&["f"]), echo(Word::var("?"))]);
    assert_eq!(ctx.output(), "4\n");
    assert_eq!(ctx.file("f.out").as_deref(), Some("quiet\n"));
    assert_eq!(ctx.count_calls("pop_redirects"), 1);
}

// ============================================================================
// Process substitution
// ============================================================================

#[test]
fn process_sub_statuses_are_collected_per_command() {
    let (ctx, mut kernel) = shell();
    run(
        &mut kernel,
        vec![Command::Simple(SimpleCommand {
            words: vec![
                Word::literal("echo"),
                psub(simple(&["false"]), 1),
                psub(echo(Word::literal("x")), 2),
            ],
            span: NO_SPAN,
        })],
    );
    assert_eq!(ctx.output(), "/dev/fd/63 /dev/fd/64\n");
    assert_eq!(ctx.file("/dev/fd/64").as_deref(), Some("x\n"));
    assert_eq!(
        ctx.calls_matching("pop_process_sub").last().map(String::as_str),
        Some("pop_process_sub 2")
    );
    assert_eq!(ctx.process_sub_depth(), 0);

    {
        let scope = kernel.scope().borrow();
        let statuses = scope.process_sub_status();
        assert_eq!(statuses.codes, [1, 0]);
        assert_eq!(statuses.locations, [SpanId(1), SpanId(2)]);
    }

    // Visible to the next command while its words are evaluated.
    run(&mut kernel, vec![echo(Word::var("_process_sub_status"))]);
    assert!(ctx.output().ends_with("[1,0]\n"));
    assert!(kernel.scope().borrow().process_sub_status().is_empty());
}

#[test]
fn process_sub_in_a_redirect_target_outlives_the_body() {
    let (ctx, mut kernel) = shell();
    let redirect = Redirect {
        fd: 0,
        op: RedirectOp::Read,
        target: psub(echo(Word::literal("x")), 1),
        span: NO_SPAN,
    };
    let body = vec![echo(Word::literal("hi"))];
    let outcome = run(&mut kernel, vec![redirected(body, vec![redirect])]);

    assert!(outcome.diagnostics.is_empty(), "{:?}", outcome.diagnostics);
    assert_eq!(outcome.status, 0);
    assert_eq!(ctx.output(), "hi\n");
    assert_eq!(ctx.file("/dev/fd/63").as_deref(), Some("x\n"));

    // Redirects are undone before the substitution is waited on.
    let calls = ctx.calls();
    let popped_redirects = calls.iter().rposition(|c| c == "pop_redirects 1").unwrap();
    let waited = calls.iter().rposition(|c| c == "pop_process_sub 1").unwrap();
    assert!(popped_redirects < waited, "{calls:?}");
    assert_eq!(ctx.process_sub_depth(), 0);
    assert_eq!(kernel.scope().borrow().process_sub_status().codes, [0]);
}

#[test]
fn failing_process_sub_in_a_redirect_target_is_recorded() {
    let (ctx, mut kernel) = shell();
    let redirect = Redirect {
        fd: 0,
        op: RedirectOp::Read,
        target: psub(simple(&["false"]), 4),
        span: NO_SPAN,
    };
    let outcome = run(&mut kernel, vec![redirected(vec![simple(&["true"])], vec![redirect])]);

    assert_eq!(outcome.status, 0);
    assert_eq!(ctx.redirect_depth(), 0);
    let scope = kernel.scope().borrow();
    assert_eq!(scope.process_sub_status().codes, [1]);
    assert_eq!(scope.process_sub_status().locations, [SpanId(4)]);
}

#[test]
fn process_sub_in_for_items_stays_open_for_the_loop() {
    let (ctx, mut kernel) = shell();
    let outcome = run(
        &mut kernel,
        vec![Command::For(ForLoop {
            variable: "f".into(),
            items: vec![psub(echo(Word::literal("x")), 2)],
            body: vec![echo(Word::var("f"))],
        })],
    );

    assert!(outcome.diagnostics.is_empty(), "{:?}", outcome.diagnostics);
    assert_eq!(ctx.output(), "/dev/fd/63\n");
    assert_eq!(ctx.file("/dev/fd/63").as_deref(), Some("x\n"));

    // The loop body ran before the substitution was waited on.
    let calls = ctx.calls();
    let body = calls.iter().position(|c| c == "run echo /dev/fd/63").unwrap();
    let waited = calls.iter().rposition(|c| c == "pop_process_sub 1").unwrap();
    assert!(body < waited, "{calls:?}");
    assert_eq!(ctx.process_sub_depth(), 0);
    assert_eq!(kernel.scope().borrow().process_sub_status().codes, [0]);
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn builtin_output_is_flushed() {
    let (ctx, mut kernel) = shell();
    run(&mut kernel, vec![simple(&["builtin", "echo", "hi"])]);
    let calls = ctx.calls();
    let at = calls.iter().position(|c| c == "builtin echo hi").unwrap();
    assert_eq!(calls[at + 1], "flush");
    assert_eq!(ctx.output(), "hi\n");
}

#[test]
fn unknown_commands() {
    let (ctx, mut kernel) = shell();
    let outcome = run(&mut kernel, vec![simple(&["frobnicate"])]);
    assert_eq!(outcome.status, NOT_FOUND);
    assert_eq!(ctx.stderr(), "brash: frobnicate: command not found\n");

    let outcome = run(&mut kernel, vec![simple(&["builtin", "frobnicate"])]);
    assert_eq!(outcome.status, 1);
}

#[test]
fn pipeline_records_every_stage() {
    let (ctx, mut kernel) = shell();
    let pipeline = |negated| {
        let commands = vec![simple(&["false"]), simple(&["true"])];
        Command::Pipeline(Pipeline { commands, negated })
    };
    let outcome = run(&mut kernel, vec![pipeline(false), echo(Word::var("PIPESTATUS"))]);
    assert_eq!(outcome.status, 0);
    assert_eq!(ctx.output(), "[1,0]\n");

    let outcome = run(&mut kernel, vec![pipeline(true)]);
    assert_eq!(outcome.status, 1);
}

#[test]
fn command_sub_captures_output() {
    let (ctx, mut kernel) = shell();
    let sub = Word::CommandSub(Box::new(echo(Word::literal("inner"))));
    run(&mut kernel, vec![echo(Word::Concat(vec![Word::literal("<"), sub, Word::literal(">")]))]);
    assert_eq!(ctx.output(), "<inner>\n");
}

#[test]
fn background_jobs_run_to_completion() {
    let (ctx, mut kernel) = shell();
    let outcome = run(&mut kernel, vec![Command::Background(Box::new(simple(&["false"])))]);
    assert_eq!(outcome.status, 0);
    assert_eq!(ctx.calls_matching("background"), ["background simple"]);
}

// ============================================================================
// Wiring
// ============================================================================

#[test]
fn validation_fails_until_wired() {
    let evs = Evaluators::new(Rc::new(NoOpContext), "+ ");
    assert!(matches!(
        evs.check_circular_deps(),
        Err(WiringError::MissingLink { component: "ArithEvaluator", .. })
    ));
    evs.init_circular_deps().unwrap();
    evs.check_circular_deps().unwrap();
    assert!(matches!(evs.init_circular_deps(), Err(WiringError::AlreadyWired { .. })));
}

#[test]
fn a_context_cannot_serve_two_kernels() {
    let ctx = Rc::new(ScriptedContext::new());
    let _first = Kernel::new(KernelConfig::transient(), ctx.clone()).unwrap();
    let err = Kernel::new(KernelConfig::transient(), ctx).unwrap_err();
    assert_eq!(
        err.downcast_ref::<WiringError>(),
        Some(&WiringError::AlreadyWired { component: "ScriptedContext", link: "cmd_ev" })
    );
}
