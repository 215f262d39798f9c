//! Loops, thrown labels, traps, and halt-class behavior.

mod common;

use common::*;
use core_eval::{ErrId, MachineConfig, Raise};
use core_value::Kind;

#[test]
fn catch_receives_a_throw_through_nested_loops() {
    let mut m = machine();
    let molded = eval_mold(&mut m, "catch [repeat 3 [repeat 3 [throw 'done]]]");
    assert_eq!(molded, "done");
}

#[test]
fn break_stops_only_the_innermost_loop() {
    let mut m = machine();
    let source = "
        total: 0
        repeat 3 [
            repeat 10 [break]
            total: total + 1
        ]
        total
    ";
    assert_eq!(eval_int(&mut m, source), 3);
}

#[test]
fn continue_skips_to_the_next_iteration() {
    let mut m = machine();
    let source = "
        total: 0
        n: 0
        while [n < 5] [
            n: n + 1
            if equal? n 3 [continue]
            total: total + n
        ]
        total
    ";
    assert_eq!(eval_int(&mut m, source), 12); // 1+2+4+5
}

#[test]
fn while_result_is_the_last_body_value() {
    let mut m = machine();
    let source = "n: 0 while [n < 3] [n: n + 1 n * 10]";
    assert_eq!(eval_int(&mut m, source), 30);
}

#[test]
fn uncaught_throw_is_a_no_catch_error() {
    let mut m = machine();
    assert_eq!(
        eval_error_code(&mut m, "throw 'loose"),
        code(ErrId::NoCatch)
    );
}

#[test]
fn break_outside_a_loop_is_a_no_catch_error() {
    let mut m = machine();
    assert_eq!(eval_error_code(&mut m, "break"), code(ErrId::NoCatch));
    // CATCH is not a loop; break passes it.
    assert_eq!(
        eval_error_code(&mut m, "catch [break]"),
        code(ErrId::NoCatch)
    );
}

#[test]
fn trap_converts_an_error_to_a_value() {
    let mut m = machine();
    assert!(eval_logic(&mut m, "error? trap [divide 1 0]"));
    assert_eq!(eval_int(&mut m, "trap [1 + 2]"), 3);
    // The error object carries the catalog code.
    assert_eq!(
        eval_int(&mut m, "e: trap [divide 1 0] e/code"),
        ErrId::DivideByZero.code()
    );
}

#[test]
fn attempt_swallows_the_error_entirely() {
    let mut m = machine();
    let result = m.run_source("attempt [divide 1 0]", None).expect("runs");
    assert_eq!(result.map(|c| c.kind()), Some(Kind::Null));
    assert_eq!(eval_int(&mut m, "attempt [40 + 2]"), 42);
}

#[test]
fn throws_pass_through_traps() {
    let mut m = machine();
    // The trap must not eat the throw; the catch outside gets it.
    assert_eq!(
        eval_int(&mut m, "catch [trap [throw 9] 0]"),
        9
    );
}

#[test]
fn error_object_shape_has_near_and_where() {
    let mut m = machine();
    let source = "
        f: func [] [no-such-thing]
        e: trap [f]
        reduce [e/code first e/where]
    ";
    let molded = eval_mold(&mut m, source);
    assert_eq!(molded, format!("[{} f]", ErrId::UnboundWord.code()));
}

#[test]
fn stack_overflow_raises_the_preallocated_error() {
    let mut m = machine_with(MachineConfig {
        depth_ceiling: 64,
        ..MachineConfig::default()
    });
    assert_eq!(
        eval_error_code(&mut m, "f: func [] [f] f"),
        code(ErrId::StackOverflow)
    );
    // The machine stays usable afterwards.
    assert_eq!(eval_int(&mut m, "1 + 1"), 2);
}

#[test]
fn halt_passes_ordinary_traps() {
    let mut m = machine();
    m.request_halt();
    match m.run_source("trap [repeat 1000000 [1]] 7", None) {
        Err(Raise::Error(ctx)) => assert!(m.is_halt(ctx)),
        other => panic!("expected halt, got {other:?}"),
    }
}

#[test]
fn balanced_state_after_trap_recovery() {
    let mut m = machine();
    let ds = m.heap.ds_depth();
    let guards = m.heap.guard_depth();
    let depth = m.depth();
    let _ = eval_int(&mut m, "trap [divide 1 0] 5");
    assert_eq!(m.heap.ds_depth(), ds);
    assert_eq!(m.heap.guard_depth(), guards);
    assert_eq!(m.depth(), depth);
}

#[test]
fn quit_surfaces_with_its_code() {
    let mut m = machine();
    match m.run_source_outcome("quit 3", None) {
        Ok(core_eval::RunOutcome::Quit(3)) => {}
        other => panic!("expected quit 3, got {other:?}"),
    }
}
