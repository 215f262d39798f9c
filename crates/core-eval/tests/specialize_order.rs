//! Specialization and partial-refinement ordering.

mod common;

use common::*;
use core_eval::ErrId;

const FOO: &str = "foo: func [/a arg-a /b arg-b /c arg-c] [reduce [arg-a arg-b arg-c]]";

#[test]
fn callsite_path_order_assigns_arguments() {
    let mut m = machine();
    eval(&mut m, FOO);
    assert_eq!(
        eval_mold(&mut m, "foo/b/c \"x\" \"y\""),
        "[_ \"x\" \"y\"]"
    );
    assert_eq!(
        eval_mold(&mut m, "foo/c/b \"x\" \"y\""),
        "[_ \"y\" \"x\"]"
    );
}

#[test]
fn partial_specialization_preserves_order() {
    let mut m = machine();
    eval(&mut m, FOO);
    eval(&mut m, "foo23: :foo/b/c");
    eval(&mut m, "foo32: :foo/c/b");
    assert_eq!(eval_mold(&mut m, "foo23 \"x\" \"y\""), "[_ \"x\" \"y\"]");
    assert_eq!(eval_mold(&mut m, "foo32 \"x\" \"y\""), "[_ \"y\" \"x\"]");
}

#[test]
fn partials_stack_under_later_callsite_refinements() {
    let mut m = machine();
    eval(&mut m, FOO);
    // The stored partial (b) outranks the fresh callsite push (a).
    eval(&mut m, "foob: :foo/b");
    assert_eq!(
        eval_mold(&mut m, "foob/a \"bee\" \"ay\""),
        "[\"ay\" \"bee\" _]"
    );
}

#[test]
fn empty_specialization_behaves_identically() {
    let mut m = machine();
    eval(&mut m, FOO);
    eval(&mut m, "foo0: specialize :foo []");
    assert_eq!(
        eval_mold(&mut m, "foo0/b/c \"x\" \"y\""),
        eval_mold(&mut m, "foo/b/c \"x\" \"y\"")
    );
    assert_eq!(eval_mold(&mut m, "foo0"), "[_ _ _]");
}

#[test]
fn specialize_fixes_arguments_and_hides_them() {
    let mut m = machine();
    eval(&mut m, "padd: func [a [integer!] b [integer!]] [a + b]");
    eval(&mut m, "add-ten: specialize :padd [b: 10]");
    assert_eq!(eval_int(&mut m, "add-ten 5"), 15);
    assert_eq!(eval_int(&mut m, "add-ten 32"), 42);
}

#[test]
fn specialization_of_a_specialization_chains() {
    let mut m = machine();
    eval(&mut m, "p3: func [a [integer!] b [integer!] c [integer!]] [a + b * c]");
    eval(&mut m, "q: specialize :p3 [a: 1]");
    eval(&mut m, "r: specialize :q [b: 2]");
    // (1 + 2) * 5, left-fold evaluation.
    assert_eq!(eval_int(&mut m, "r 5"), 15);
}

#[test]
fn specialized_refinement_switches_fully_on() {
    let mut m = machine();
    eval(&mut m, FOO);
    eval(&mut m, "foo-on-b: specialize :foo [arg-b: \"fixed\"]");
    assert_eq!(eval_mold(&mut m, "foo-on-b"), "[_ \"fixed\" _]");
}

#[test]
fn evoked_partial_takes_lowest_priority() {
    let mut m = machine();
    eval(
        &mut m,
        "two: func [/p arg-p1 arg-p2] [reduce [arg-p1 arg-p2]]",
    );
    // One argument set by example leaves the refinement partial.
    eval(&mut m, "half: specialize :two [arg-p1: \"given\"]");
    assert_eq!(
        eval_mold(&mut m, "half \"later\""),
        "[\"given\" \"later\"]"
    );
}

#[test]
fn double_evocation_is_an_error() {
    let mut m = machine();
    eval(
        &mut m,
        "pq: func [/p a1 a2 /q b1 b2] [reduce [a1 a2 b1 b2]]",
    );
    assert_eq!(
        eval_error_code(&mut m, "specialize :pq [a1: 1 b1: 2]"),
        code(ErrId::DoubleEvoke)
    );
}

#[test]
fn unknown_refinement_is_rejected() {
    let mut m = machine();
    eval(&mut m, FOO);
    assert_eq!(
        eval_error_code(&mut m, "foo/zed 1"),
        code(ErrId::BadRefinement)
    );
    assert_eq!(
        eval_error_code(&mut m, "nope: :foo/zed"),
        code(ErrId::BadRefinement)
    );
}

#[test]
fn apply_with_named_refinement_args_matches_path_order() {
    let mut m = machine();
    eval(&mut m, FOO);
    let by_path = eval_mold(&mut m, "foo/b/c \"x\" \"y\"");
    let by_apply = eval_mold(&mut m, "apply :foo [arg-b: \"x\" arg-c: \"y\"]");
    assert_eq!(by_path, by_apply);
}

#[test]
fn make_frame_do_frame_round_trip() {
    let mut m = machine();
    eval(&mut m, "padd: func [a [integer!] b [integer!]] [a + b]");
    let source = "
        f: make frame! :padd
        f/a: 30
        f/b: 12
        do f
    ";
    assert_eq!(eval_int(&mut m, source), 42);
}

#[test]
fn frames_may_be_reused() {
    let mut m = machine();
    eval(&mut m, "padd: func [a [integer!] b [integer!]] [a + b]");
    eval(&mut m, "f: make frame! :padd f/a: 1 f/b: 2");
    assert_eq!(eval_int(&mut m, "do f"), 3);
    // Mutate and run again; the frame was copied per run.
    assert_eq!(eval_int(&mut m, "f/a: 10 do f"), 12);
}

#[test]
fn exemplar_and_facade_stay_parallel() {
    let mut m = machine();
    eval(&mut m, FOO);
    eval(&mut m, "foos: specialize :foo [arg-b: \"s\"]");
    // Specialized-out slots are invisible to a fresh frame.
    let molded = eval_mold(&mut m, "mold make frame! :foos");
    assert!(
        !molded.contains("arg-b"),
        "hidden slot leaked into the facade: {molded}"
    );
}
