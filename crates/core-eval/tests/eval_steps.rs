//! Step-machine behavior: inert values, words, assignment, groups,
//! enfix lookahead, barriers, and invisibility.

mod common;

use common::*;
use core_eval::ErrId;
use core_value::Kind;

#[test]
fn integer_addition_through_infix_dispatch() {
    let mut m = machine();
    assert_eq!(eval_int(&mut m, "1 + 2"), 3);
}

#[test]
fn prefix_and_infix_agree() {
    let mut m = machine();
    assert_eq!(eval_int(&mut m, "add 1 2"), 3);
    assert_eq!(eval_int(&mut m, "add 1 multiply 2 3"), 7);
    assert_eq!(eval_int(&mut m, "1 + 2 * 3"), 9, "infix folds left to right");
}

#[test]
fn inert_values_evaluate_to_themselves() {
    let mut m = machine();
    assert_eq!(eval_mold(&mut m, "\"hello\""), "\"hello\"");
    assert_eq!(eval_mold(&mut m, "[1 2 3]"), "[1 2 3]");
    assert_eq!(eval_int(&mut m, "7"), 7);
}

#[test]
fn set_word_captures_the_full_infix_chain() {
    let mut m = machine();
    assert_eq!(eval_int(&mut m, "x: 1 + 2 x"), 3);
    assert_eq!(eval_int(&mut m, "a: b: 10 a + b"), 20);
}

#[test]
fn get_word_fetches_without_invoking() {
    let mut m = machine();
    // :add is the action itself, not a call.
    assert_eq!(eval_mold(&mut m, ":add"), "#[action! add]");
    assert_eq!(eval_int(&mut m, "plus: :add plus 2 3"), 5);
}

#[test]
fn groups_evaluate_eagerly() {
    let mut m = machine();
    assert_eq!(eval_int(&mut m, "(1 + 2) * 3"), 9);
    assert_eq!(eval_int(&mut m, "add (1 + 1) (2 + 2)"), 6);
}

#[test]
fn quoted_values_drop_one_level() {
    let mut m = machine();
    let word = eval(&mut m, "'foo");
    assert_eq!(word.kind(), Kind::Word);
    assert!(!word.is_quoted());
    let quoted = eval(&mut m, "''foo");
    assert_eq!(quoted.quote_byte(), 2);
}

#[test]
fn unset_word_errors() {
    let mut m = machine();
    assert_eq!(
        eval_error_code(&mut m, "definitely-not-defined"),
        code(ErrId::UnboundWord)
    );
}

#[test]
fn set_then_get_round_trips() {
    let mut m = machine();
    assert_eq!(eval_int(&mut m, "set 'w 42 get 'w"), 42);
    assert_eq!(eval_mold(&mut m, "set 'v [1 2] get 'v"), "[1 2]");
}

#[test]
fn comma_is_an_expression_barrier() {
    let mut m = machine();
    // The barrier seals the previous output against enfix reach-back.
    assert_eq!(eval_int(&mut m, "x: 1, 5"), 5);
    let failed = m.run_source("1, + 2", None);
    assert!(failed.is_err(), "enfix may not cross a barrier");
}

#[test]
fn invisible_left_retains_previous_output() {
    let mut m = machine();
    // An empty group vanishes; the enfix addition still sees the 1.
    assert_eq!(eval_int(&mut m, "1 () + 2"), 3);
    // A block whose last step vanishes yields its prior value.
    assert_eq!(eval_int(&mut m, "do [5 ()]"), 5);
    // COMMENT is the invisible-native form of the same thing.
    assert_eq!(eval_int(&mut m, "1 comment \"noise\" + 2"), 3);
    assert_eq!(eval_int(&mut m, "do [7 comment [ignored]]"), 7);
}

#[test]
fn infix_chains_stay_left_to_right() {
    let mut m = machine();
    // The enfix argument defers its lookahead to the outer step.
    assert!(eval_logic(&mut m, "1 + 2 = 3"));
    assert_eq!(eval_int(&mut m, "10 - 4 - 3"), 3);
    // A prefix argument completes an infix chain inside itself.
    assert_eq!(eval_int(&mut m, "add 1 + 2 3"), 6);
}

#[test]
fn shove_stages_enfix_explicitly() {
    let mut m = machine();
    assert_eq!(eval_int(&mut m, "shove 1 'add 2"), 3);
}

#[test]
fn paths_select_into_objects_and_blocks() {
    let mut m = machine();
    assert_eq!(
        eval_int(&mut m, "obj: make object! [x: 41] obj/x + 1"),
        42
    );
    assert_eq!(eval_int(&mut m, "blk: [10 20 30] blk/2"), 20);
    assert_eq!(eval_int(&mut m, "blk: [10 20 30] blk/2: 25 blk/2"), 25);
}

#[test]
fn let_splices_a_fresh_variable_onto_the_feed() {
    let mut m = machine();
    assert_eq!(eval_int(&mut m, "let tmp: 5 tmp + 1"), 6);
    // The let variable shadows a module-level one for the rest of the
    // feed only.
    assert_eq!(eval_int(&mut m, "shadowed: 1 do [let shadowed: 2 shadowed]"), 2);
    assert_eq!(eval_int(&mut m, "shadowed"), 1);
}

#[test]
fn reduce_evaluates_each_expression() {
    let mut m = machine();
    assert_eq!(eval_mold(&mut m, "reduce [1 + 1 2 + 2]"), "[2 4]");
}

#[test]
fn compose_fills_template_groups() {
    let mut m = machine();
    assert_eq!(eval_mold(&mut m, "compose [a (1 + 2) b]"), "[a 3 b]");
    // Nulls vanish from the output.
    assert_eq!(eval_mold(&mut m, "compose [x (if false [1]) y]"), "[x y]");
}

#[test]
fn mold_load_round_trip() {
    let mut m = machine();
    for source in ["[1 2 [3 4]]", "\"text\"", "[a b/c :d e: 'f]", "-17"] {
        let molded = eval_mold(&mut m, source);
        // Loading the molded form scans back to an equal value.
        let check = format!("equal? first [{molded}] first [{source}]");
        assert!(
            eval_logic(&mut m, &check),
            "round trip failed for {source} (molded {molded})"
        );
    }
}
