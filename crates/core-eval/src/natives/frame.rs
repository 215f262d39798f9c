//! SPECIALIZE and APPLY.

use core_value::Specifier;

use crate::machine::Machine;
use crate::raise::{Bounce, Raise};

pub(crate) fn native_specialize(m: &mut Machine) -> Result<Bounce, Raise> {
    let action = m.arg(1);
    let def = m.arg(2);
    let specialized = m.specialize_with_block(&action, &def)?;
    m.out_done(specialized)
}

/// Build a frame for the action, fill it by evaluating the block with
/// the frame overlaid (set-words assign parameters by name), then run
/// it. Refinements whose arguments were assigned switch on implicitly.
pub(crate) fn native_apply(m: &mut Machine) -> Result<Bounce, Raise> {
    let action = m.arg(1);
    let def = m.arg(2);
    let frame = m.make_frame_for_action(&action)?;
    let ctx = frame.as_context().expect("frame context");
    m.eval_block_cell(&def, Specifier::Context(ctx))?;
    let result = m.do_frame(&frame)?;
    let value = m.decay_cell(result)?;
    m.out_done(value)
}
