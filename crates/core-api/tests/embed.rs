//! Embedding surface behavior.

use core_api::{Engine, EngineError, EngineOutcome};
use core_heap::HandleData;
use std::sync::atomic::{AtomicU32, Ordering};

#[test]
fn run_and_unbox() {
    let mut engine = Engine::startup().unwrap();
    let value = engine.run("add 40 2").unwrap().expect("value");
    assert_eq!(engine.unbox_integer(&value).unwrap(), 42);
    engine.shutdown(true);
}

#[test]
fn template_call_splices_by_identity() {
    let mut engine = Engine::startup().unwrap();
    let ten = engine.integer(10).unwrap();
    let four = engine.integer(4).unwrap();
    let result = engine
        .call("subtract {} {}", &[&ten, &four])
        .unwrap()
        .expect("value");
    assert_eq!(engine.unbox_integer(&result).unwrap(), 6);
}

#[test]
fn template_slot_count_is_checked() {
    let mut engine = Engine::startup().unwrap();
    let one = engine.integer(1).unwrap();
    assert!(matches!(
        engine.call("add {} {}", &[&one]),
        Err(EngineError::Script { .. })
    ));
}

#[test]
fn script_errors_carry_codes_and_messages() {
    let mut engine = Engine::startup().unwrap();
    match engine.run("no-such-word") {
        Err(EngineError::Script { code, message }) => {
            assert_eq!(code, 200);
            assert!(message.starts_with("** Script Error:"), "{message}");
        }
        other => panic!("expected a script error, got {other:?}"),
    }
}

#[test]
fn exit_status_convention() {
    let mut engine = Engine::startup().unwrap();
    let outcome = engine.run_outcome("7");
    assert_eq!(engine.exit_status(&outcome), 7);
    let outcome = engine.run_outcome("");
    assert_eq!(engine.exit_status(&outcome), 0);
    let outcome = engine.run_outcome("\"text\"");
    assert_eq!(engine.exit_status(&outcome), 1);
    let outcome = engine.run_outcome("quit 5");
    assert!(matches!(outcome, Ok(EngineOutcome::Quit(5))));
    assert_eq!(engine.exit_status(&outcome), 5);
    let outcome = engine.run_outcome("divide 1 0");
    assert_eq!(engine.exit_status(&outcome), 301);
}

#[test]
fn owned_values_survive_collection_until_released() {
    let mut engine = Engine::startup().unwrap();
    let text = engine.run("copy \"pinned\"").unwrap().expect("value");
    engine.collect_garbage().unwrap();
    assert_eq!(engine.unbox_text(&text).unwrap(), "pinned");
    engine.release(text);
    engine.collect_garbage().unwrap();
}

static CLEANED: AtomicU32 = AtomicU32::new(0);

fn note_cleanup(_data: HandleData) {
    CLEANED.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn handle_cleanup_runs_at_clean_shutdown() {
    CLEANED.store(0, Ordering::SeqCst);
    let mut engine = Engine::startup().unwrap();
    let handle = engine
        .handle(HandleData::Word(0xBEEF), Some(note_cleanup))
        .unwrap();
    engine.collect_garbage().unwrap();
    assert_eq!(CLEANED.load(Ordering::SeqCst), 0, "pinned handle survives");
    engine.release(handle);
    engine.shutdown(true);
    assert_eq!(CLEANED.load(Ordering::SeqCst), 1);
}

#[test]
fn halt_handle_cancels_from_outside() {
    let mut engine = Engine::startup().unwrap();
    let remote = engine.halt_handle().unwrap();
    remote.request_halt();
    match engine.run("n: 0 while [true] [n: n + 1]") {
        Err(EngineError::Script { code, .. }) => assert_eq!(code, 2), // internal/halt
        other => panic!("expected halt, got {other:?}"),
    }
    // The engine remains usable after a halt.
    let value = engine.run("1 + 1").unwrap().expect("value");
    assert_eq!(engine.unbox_integer(&value).unwrap(), 2);
}

#[test]
fn machines_are_independent() {
    let mut a = Engine::startup().unwrap();
    let mut b = Engine::startup().unwrap();
    a.run("x: 1").unwrap();
    b.run("x: 2").unwrap();
    let xa = a.run("x").unwrap().expect("value");
    let xb = b.run("x").unwrap().expect("value");
    assert_eq!(a.unbox_integer(&xa).unwrap(), 1);
    assert_eq!(b.unbox_integer(&xb).unwrap(), 2);
}
