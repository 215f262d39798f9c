//! FUNC, definitional RETURN, and UNWIND.
//!
//! FUNC copies its body deeply and rebinds every word naming a formal
//! parameter *relative* to the new action's identity. The copy is what
//! licenses the relative cells: they are only ever evaluated under a
//! specifier that reaches a frame running this action, which grounds
//! them to that call's varlist.
//!
//! RETURN is not a keyword. Each call's frame gets an action value in
//! its return slot whose binding is that very frame; invoking it throws
//! a label carrying the frame identity, and only the matching frame's
//! trampoline converts the throw back into a plain result. Recursion
//! works because the label matches by identity, not by name.

use std::rc::Rc;

use core_heap::{Param, ParamClass, SeriesFlags};
use core_value::{Binding, Cell, ContextId, Kind, SeriesId, typesets};

use crate::error::ErrId;
use crate::level::Pending;
use crate::machine::Machine;
use crate::raise::{Bounce, Raise};

/// Dispatcher for FUNC-made actions: evaluate the stored body with this
/// frame grounding its relative cells.
pub(crate) fn dispatch_func(m: &mut Machine) -> Result<Bounce, Raise> {
    let phase = m.top_ref().phase.expect("func dispatch without phase");
    let ctx = m.top_ref().varlist.expect("func dispatch without frame");
    let details = match m.heap.action(phase) {
        Ok(action) => action.details,
        Err(fault) => return Err(m.fault(fault)),
    };
    let body = match m.heap.array_cell(details, 0) {
        Ok(body) => body.clone(),
        Err(fault) => return Err(m.fault(fault)),
    };
    m.top().pending = Some(Pending::Block {
        value: body,
        specifier: core_value::Specifier::Context(ctx),
    });
    Ok(Bounce::Delegate)
}

pub(crate) fn native_func(m: &mut Machine) -> Result<Bounce, Raise> {
    let spec = m.arg(1);
    let body = m.arg(2);

    let mut params = vec![Param::new(
        m.syms.return_,
        ParamClass::Return,
        typesets::ANY_VALUE,
    )];
    params.extend(m.parse_param_spec(&spec)?);
    let params = Rc::new(core_heap::ParamList { params });

    // Deep-copy the body so the relative rebinding below never mutates
    // the caller's source.
    let Some((body_series, body_index, _)) = body.as_array() else {
        return Err(m.fail(ErrId::BadSpec, &[body]));
    };
    let copied = m
        .heap
        .copy_array_deep(
            body_series,
            body_index as usize,
            typesets::ANY_ARRAY,
            SeriesFlags::MANAGED,
        )
        .map_err(|fault| m.fault(fault))?;

    let details = m
        .heap
        .make_array(1, SeriesFlags::MANAGED)
        .map_err(|fault| m.fault(fault))?;
    let dispatcher = m.func_dispatcher;
    let action = m.heap.make_action(Rc::clone(&params), details, dispatcher, None);

    relativize_array(m, copied, action, &params)?;
    m.heap
        .array_push(details, Cell::array(Kind::Block, copied))
        .map_err(|fault| m.fault(fault))?;

    m.out_done(Cell::action(action))
}

/// Rewrite words that name formals as relative bindings on the action.
fn relativize_array(
    m: &mut Machine,
    series: SeriesId,
    action: core_value::ActionId,
    params: &core_heap::ParamList,
) -> Result<(), Raise> {
    let len = m.heap.array_len(series).map_err(|fault| m.fault(fault))?;
    for i in 0..len {
        let cell = m
            .heap
            .array_cell(series, i)
            .map(Clone::clone)
            .map_err(|fault| m.fault(fault))?;
        if cell.kind().is_word() {
            if let Some((symbol, Binding::Unbound, _)) = cell.as_word() {
                if let Some(index) = params.find(&m.heap, symbol) {
                    let mut bound = cell.clone();
                    bound.update_word_binding(Binding::Relative(action), index as u32 + 1);
                    m.heap
                        .array_set(series, i, bound)
                        .map_err(|fault| m.fault(fault))?;
                }
            }
        } else if cell.kind().is_array() || cell.kind().is_path() {
            if let Some((nested, _, _)) = cell.as_array() {
                relativize_array(m, nested, action, params)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn native_return(m: &mut Machine) -> Result<Bounce, Raise> {
    let value = m.arg(1);
    let target = match m.top_ref().binding {
        Binding::Specific(ctx) => ctx,
        _ => return Err(m.fail(ErrId::StaleFrame, &[])),
    };
    throw_to_frame(m, target, value)
}

pub(crate) fn native_unwind(m: &mut Machine) -> Result<Bounce, Raise> {
    let frame = m.arg(1);
    let value = m.arg(2);
    let Some(target) = frame.as_context() else {
        return Err(m.fail(ErrId::InvalidArg, &[frame]));
    };
    throw_to_frame(m, target, value)
}

fn throw_to_frame(m: &mut Machine, target: ContextId, value: Cell) -> Result<Bounce, Raise> {
    match m.heap.frame_is_expired(target) {
        Ok(false) => {}
        Ok(true) => {
            let invoked = m
                .heap
                .context(target)
                .map(|context| context.invoked)
                .unwrap_or(true);
            let id = if invoked {
                ErrId::StaleFrame
            } else {
                ErrId::ExpiredFrame
            };
            return Err(m.fail(id, &[]));
        }
        Err(fault) => return Err(m.fault(fault)),
    }
    let label = Cell::bound_word(
        Kind::Word,
        m.syms.unwind,
        Binding::Specific(target),
        0,
    );
    Err(m.throw_labeled(label, value))
}
