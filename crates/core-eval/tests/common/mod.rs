#![allow(dead_code)] // Shared across integration tests; each binary uses a subset.

use core_eval::{ErrId, Machine, MachineConfig, Raise};
use core_value::Cell;

pub fn machine() -> Machine {
    Machine::startup().expect("boot")
}

pub fn machine_with(config: MachineConfig) -> Machine {
    Machine::startup_with(config).expect("boot")
}

/// Evaluate source, expecting a value.
pub fn eval(m: &mut Machine, source: &str) -> Cell {
    match m.run_source(source, None) {
        Ok(Some(cell)) => cell,
        Ok(None) => panic!("no value from {source:?}"),
        Err(Raise::Error(ctx)) => panic!("{} from {source:?}", m.mold_error(ctx)),
        Err(Raise::Thrown) => panic!("unexpected throw from {source:?}"),
    }
}

pub fn eval_int(m: &mut Machine, source: &str) -> i64 {
    let cell = eval(m, source);
    cell.as_integer()
        .unwrap_or_else(|| panic!("{source:?} gave {:?}, wanted integer", cell.kind()))
}

pub fn eval_logic(m: &mut Machine, source: &str) -> bool {
    let cell = eval(m, source);
    cell.as_logic()
        .unwrap_or_else(|| panic!("{source:?} gave {:?}, wanted logic", cell.kind()))
}

/// Evaluate and mold the result.
pub fn eval_mold(m: &mut Machine, source: &str) -> String {
    let cell = eval(m, source);
    m.mold(&cell)
}

/// Evaluate source expecting a raised error; returns its numeric code.
pub fn eval_error_code(m: &mut Machine, source: &str) -> i64 {
    match m.run_source(source, None) {
        Err(Raise::Error(ctx)) => m.error_code(ctx),
        Ok(value) => panic!("{source:?} gave {value:?}, wanted an error"),
        Err(Raise::Thrown) => panic!("{source:?} threw, wanted an error"),
    }
}

pub fn code(id: ErrId) -> i64 {
    id.code()
}
