//! Non-local exits as ordinary `Result` propagation.
//!
//! Nothing long-jumps. A dispatcher or evaluator step that cannot
//! produce a value returns `Err(Raise)`, and every frame it crosses
//! unwinds through normal `?` returns. Traps are the points that stop
//! an `Error`; thrown labels keep going until a catcher recognizes
//! them (the label value and its argument ride in the machine's
//! task-local thrown slots, since the raising stack is about to vanish).

use core_value::ContextId;

/// Why evaluation is unwinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Raise {
    /// An error value was raised; the context is the error object.
    Error(ContextId),
    /// A thrown label (break/continue/return/throw/quit) is in flight;
    /// the label and argument are parked in the machine's thrown slots.
    Thrown,
}

/// A dispatcher's return classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bounce {
    /// The result is in the level's out slot.
    Out,
    /// Leave the previous output untouched (the invocation vanishes).
    Invisible,
    /// Re-enter dispatch against the (possibly substituted) phase.
    /// `checked` re-runs argument typechecking first.
    Redo { checked: bool },
    /// Run the level's pending request into `spare`, then call the
    /// dispatcher again (its state byte tells it where to resume).
    Continue,
    /// Run the level's pending request straight into `out` and finish.
    Delegate,
}
