//! FUNC and definitional RETURN.

mod common;

use common::*;
use core_eval::ErrId;

#[test]
fn definitional_return_doubles() {
    let mut m = machine();
    assert_eq!(eval_int(&mut m, "f: func [x] [return x * 2] f 5"), 10);
}

#[test]
fn body_tail_value_is_the_result_without_return() {
    let mut m = machine();
    assert_eq!(eval_int(&mut m, "f: func [x] [x + 1] f 4"), 5);
}

#[test]
fn return_exits_only_its_own_frame() {
    let mut m = machine();
    // The inner call's return must not blow away the outer frame.
    let source = "
        inner: func [x] [return x + 1]
        outer: func [x] [add inner x 100]
        outer 1
    ";
    assert_eq!(eval_int(&mut m, source), 102);
}

#[test]
fn recursion_matches_return_by_frame_identity() {
    let mut m = machine();
    let source = "
        fact: func [n] [
            if n <= 1 [return 1]
            n * fact n - 1
        ]
        fact 5
    ";
    assert_eq!(eval_int(&mut m, source), 120);
}

#[test]
fn locals_do_not_leak_between_calls() {
    let mut m = machine();
    let source = "
        count: func [n <local> acc] [
            acc: n + 1
            acc
        ]
        count count 0
    ";
    assert_eq!(eval_int(&mut m, source), 2);
}

#[test]
fn arguments_shadow_module_variables() {
    let mut m = machine();
    let source = "x: 99 f: func [x] [x] f 1";
    assert_eq!(eval_int(&mut m, source), 1);
    assert_eq!(eval_int(&mut m, "x"), 99);
}

#[test]
fn return_with_no_argument_yields_null() {
    let mut m = machine();
    let outcome = m.run_source("f: func [] [return] f", None).expect("runs");
    assert!(outcome.is_none() || outcome.unwrap().kind() == core_value::Kind::Null);
}

#[test]
fn saved_return_from_a_dead_frame_is_stale() {
    let mut m = machine();
    let source = "
        leak: func [] [return :return]
        saved: leak
        saved 1
    ";
    assert_eq!(eval_error_code(&mut m, source), code(ErrId::StaleFrame));
}

#[test]
fn return_short_circuits_the_rest_of_the_body() {
    let mut m = machine();
    assert_eq!(
        eval_int(&mut m, "f: func [x] [return 42 print \"unreached\"] f 1"),
        42
    );
}

#[test]
fn type_constraints_are_enforced_on_arguments() {
    let mut m = machine();
    assert_eq!(
        eval_error_code(&mut m, "f: func [n [integer!]] [n] f \"nope\""),
        code(ErrId::TypeMismatch)
    );
}

#[test]
fn missing_argument_is_an_error() {
    let mut m = machine();
    assert_eq!(
        eval_error_code(&mut m, "f: func [a b] [a] f 1"),
        code(ErrId::ExpectArg)
    );
}
