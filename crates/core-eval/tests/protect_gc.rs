//! Mutation protection and collector behavior under evaluation.

mod common;

use common::*;
use core_eval::{ErrId, MachineConfig};

#[test]
fn protect_deep_locks_the_whole_tree() {
    let mut m = machine();
    eval(&mut m, "blk: [1 [2 3]] protect/deep blk");
    assert_eq!(
        eval_error_code(&mut m, "append blk 4"),
        code(ErrId::LockedSeries)
    );
    // The nested block is locked too.
    assert_eq!(
        eval_error_code(&mut m, "append pick blk 2 4"),
        code(ErrId::LockedSeries)
    );
}

#[test]
fn copy_deep_of_a_locked_tree_is_writable() {
    let mut m = machine();
    eval(&mut m, "blk: [1 [2]] protect/deep blk");
    assert_eq!(eval_int(&mut m, "c: copy/deep blk append c 9 length-of c"), 3);
    // The copy's nested block is independent and writable.
    assert_eq!(eval_int(&mut m, "append pick c 2 7 length-of pick c 2"), 2);
    // The original stays intact.
    assert_eq!(eval_int(&mut m, "length-of blk"), 2);
}

#[test]
fn shallow_protect_leaves_nested_series_writable() {
    let mut m = machine();
    eval(&mut m, "blk: [1 [2]] protect blk");
    assert_eq!(
        eval_error_code(&mut m, "append blk 3"),
        code(ErrId::LockedSeries)
    );
    assert_eq!(eval_int(&mut m, "append pick blk 2 3 length-of pick blk 2"), 2);
}

#[test]
fn unprotect_restores_writability() {
    let mut m = machine();
    eval(&mut m, "blk: [1] protect blk unprotect blk");
    assert_eq!(eval_int(&mut m, "append blk 2 length-of blk"), 2);
}

#[test]
fn const_is_per_reference_not_per_series() {
    let mut m = machine();
    eval(&mut m, "blk: [1] ro: const blk");
    // Writes through the const reference fail...
    assert_eq!(
        eval_error_code(&mut m, "append ro 2"),
        code(ErrId::LockedSeries)
    );
    // ...but the series itself is not frozen.
    assert_eq!(eval_int(&mut m, "append blk 2 length-of blk"), 2);
    // An explicit mutable view opens the const reference back up.
    assert_eq!(eval_int(&mut m, "append mutable ro 3 length-of blk"), 3);
}

#[test]
fn protected_variables_refuse_assignment() {
    let mut m = machine();
    eval(&mut m, "x: 1 protect 'x");
    assert_eq!(eval_error_code(&mut m, "x: 2"), code(ErrId::Protected));
    eval(&mut m, "unprotect 'x");
    assert_eq!(eval_int(&mut m, "x: 2 x"), 2);
}

#[test]
fn collection_during_evaluation_keeps_live_values() {
    // A tiny watermark forces collections mid-script.
    let mut m = machine_with(MachineConfig {
        watermark: 8 * 1024,
        ..MachineConfig::default()
    });
    let source = "
        keep: copy [1 2 3]
        n: 0
        while [n < 200] [
            n: n + 1
            copy [a b c d e f g h]
        ]
        append keep n
        length-of keep
    ";
    assert_eq!(eval_int(&mut m, source), 4);
    assert!(m.heap.gc_runs() > 0, "the watermark should have tripped");
    assert_eq!(eval_mold(&mut m, "keep"), "[1 2 3 200]");
}

#[test]
fn reduce_results_survive_a_forced_collection() {
    let mut m = machine_with(MachineConfig {
        watermark: 8 * 1024,
        ..MachineConfig::default()
    });
    let molded = eval_mold(
        &mut m,
        "reduce [copy \"aaaaaaaaaaaaaaaaaaaaaaaa\" copy \"b\" copy \"c\"]",
    );
    assert_eq!(molded, "[\"aaaaaaaaaaaaaaaaaaaaaaaa\" \"b\" \"c\"]");
}

#[test]
fn explicit_recycle_between_runs_is_harmless() {
    let mut m = machine();
    eval(&mut m, "x: [1 2 3]");
    for _ in 0..3 {
        m.recycle();
    }
    assert_eq!(eval_mold(&mut m, "x"), "[1 2 3]");
    assert_eq!(eval_int(&mut m, "f: func [n] [n + 1] f 1"), 2);
}

#[test]
fn actions_survive_collection_while_referenced() {
    let mut m = machine();
    eval(&mut m, "f: func [x] [x * 2]");
    m.recycle();
    assert_eq!(eval_int(&mut m, "f 21"), 42);
}

#[test]
fn case_and_any_all_combinators() {
    let mut m = machine();
    assert_eq!(
        eval_int(&mut m, "case [false [1] true [2] true [3]]"),
        2
    );
    assert_eq!(eval_int(&mut m, "any [false 7 8]"), 7);
    assert_eq!(eval_int(&mut m, "all [1 2 3]"), 3);
    let nulled = m.run_source("all [1 false 3]", None).expect("runs");
    assert_eq!(nulled.map(|c| c.kind()), Some(core_value::Kind::Null));
}

#[test]
fn objects_hold_state_across_calls() {
    let mut m = machine();
    let source = "
        counter: make object! [n: 0]
        bump: func [] [counter/n: counter/n + 1]
        bump bump bump
        counter/n
    ";
    assert_eq!(eval_int(&mut m, source), 3);
}
