//! Arithmetic and comparison natives.

use core_value::{Cell, Kind};

use crate::error::ErrId;
use crate::machine::Machine;
use crate::raise::{Bounce, Raise};

fn int_args(m: &Machine) -> (i64, i64) {
    // Typechecking constrained both slots to integer! already.
    let a = m.arg(1).as_integer().unwrap_or(0);
    let b = m.arg(2).as_integer().unwrap_or(0);
    (a, b)
}

pub(crate) fn native_add(m: &mut Machine) -> Result<Bounce, Raise> {
    let (a, b) = int_args(m);
    match a.checked_add(b) {
        Some(sum) => m.out_done(Cell::integer(sum)),
        None => Err(m.fail(ErrId::Overflow, &[])),
    }
}

pub(crate) fn native_subtract(m: &mut Machine) -> Result<Bounce, Raise> {
    let (a, b) = int_args(m);
    match a.checked_sub(b) {
        Some(diff) => m.out_done(Cell::integer(diff)),
        None => Err(m.fail(ErrId::Overflow, &[])),
    }
}

pub(crate) fn native_multiply(m: &mut Machine) -> Result<Bounce, Raise> {
    let (a, b) = int_args(m);
    match a.checked_mul(b) {
        Some(product) => m.out_done(Cell::integer(product)),
        None => Err(m.fail(ErrId::Overflow, &[])),
    }
}

pub(crate) fn native_divide(m: &mut Machine) -> Result<Bounce, Raise> {
    let (a, b) = int_args(m);
    if b == 0 {
        return Err(m.fail(ErrId::DivideByZero, &[Cell::integer(a)]));
    }
    match a.checked_div(b) {
        Some(quotient) => m.out_done(Cell::integer(quotient)),
        None => Err(m.fail(ErrId::Overflow, &[])),
    }
}

pub(crate) fn native_negate(m: &mut Machine) -> Result<Bounce, Raise> {
    let a = m.arg(1).as_integer().unwrap_or(0);
    match a.checked_neg() {
        Some(negated) => m.out_done(Cell::integer(negated)),
        None => Err(m.fail(ErrId::Overflow, &[])),
    }
}

pub(crate) fn native_not(m: &mut Machine) -> Result<Bounce, Raise> {
    let value = m.arg(1);
    match value.truthiness() {
        Some(truthy) => m.out_done(Cell::logic(!truthy)),
        None => Err(m.fail(ErrId::InvalidArg, &[value])),
    }
}

/// Structural equality in the language's sense: case-insensitive for
/// words and strings, recursive for arrays, identity for contexts and
/// actions.
pub(crate) fn values_equal(m: &Machine, a: &Cell, b: &Cell) -> bool {
    if a.kind() != b.kind() || a.quote_byte() != b.quote_byte() {
        return false;
    }
    match a.kind() {
        Kind::Null | Kind::Blank | Kind::Trash | Kind::Comma | Kind::Nihil => true,
        Kind::Logic => a.as_logic() == b.as_logic(),
        Kind::Integer => a.as_integer() == b.as_integer(),
        Kind::Text => {
            let text_of = |cell: &Cell| {
                cell.as_text().and_then(|(series, index)| {
                    m.heap
                        .text_str(series)
                        .ok()
                        .map(|s| s.get(index as usize..).unwrap_or("").to_string())
                })
            };
            match (text_of(a), text_of(b)) {
                (Some(ta), Some(tb)) => ta.eq_ignore_ascii_case(&tb),
                _ => false,
            }
        }
        kind if kind.is_word() => match (a.word_symbol(), b.word_symbol()) {
            (Some(sa), Some(sb)) => m.heap.symbols.same_spelling(sa, sb),
            _ => false,
        },
        kind if kind.is_array() => {
            let view = |cell: &Cell| {
                cell.as_array().and_then(|(series, index, _)| {
                    m.heap
                        .array_view(series)
                        .ok()
                        .map(|cells| cells.get(index as usize..).unwrap_or(&[]).to_vec())
                })
            };
            match (view(a), view(b)) {
                (Some(va), Some(vb)) => {
                    va.len() == vb.len()
                        && va.iter().zip(vb.iter()).all(|(x, y)| values_equal(m, x, y))
                }
                _ => false,
            }
        }
        kind if kind.is_context() => a.as_context() == b.as_context(),
        Kind::Action => {
            matches!((a.as_action(), b.as_action()), (Some((x, _)), Some((y, _))) if x == y)
        }
        _ => false,
    }
}

pub(crate) fn native_equal_q(m: &mut Machine) -> Result<Bounce, Raise> {
    let (a, b) = (m.arg(1), m.arg(2));
    let equal = values_equal(m, &a, &b);
    m.out_done(Cell::logic(equal))
}

pub(crate) fn native_not_equal_q(m: &mut Machine) -> Result<Bounce, Raise> {
    let (a, b) = (m.arg(1), m.arg(2));
    let equal = values_equal(m, &a, &b);
    m.out_done(Cell::logic(!equal))
}

pub(crate) fn native_lesser_q(m: &mut Machine) -> Result<Bounce, Raise> {
    let (a, b) = int_args(m);
    m.out_done(Cell::logic(a < b))
}

pub(crate) fn native_greater_q(m: &mut Machine) -> Result<Bounce, Raise> {
    let (a, b) = int_args(m);
    m.out_done(Cell::logic(a > b))
}

pub(crate) fn native_lesser_or_equal_q(m: &mut Machine) -> Result<Bounce, Raise> {
    let (a, b) = int_args(m);
    m.out_done(Cell::logic(a <= b))
}

pub(crate) fn native_greater_or_equal_q(m: &mut Machine) -> Result<Bounce, Raise> {
    let (a, b) = int_args(m);
    m.out_done(Cell::logic(a >= b))
}
