//! Levels: the call-frame stack entries.
//!
//! A level is one step of evaluation in progress: the feed being
//! consumed, the out slot the step resolves into, a spare scratch cell
//! for continuation results, and — during an action invocation — the
//! varlist being filled, the phase (acting action identity), and a
//! state byte the dispatcher uses to resume after a continuation.

use bitflags::bitflags;
use core_value::{ActionId, Binding, Cell, ContextId, Specifier, SymbolId};

use crate::feed::Feed;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LevelFlags: u16 {
        /// The out slot holds content from before this step (survived an
        /// invisible evaluation or a barrier); enfix may not consume it.
        const OUT_STALE = 1 << 0;
    }
}

/// What a dispatcher asked the trampoline to evaluate before re-entry.
#[derive(Debug, Clone)]
pub enum Pending {
    /// Evaluate a value as a branch: blocks run, actions invoke with
    /// the given argument, anything else passes through.
    Branch { value: Cell, with: Option<Cell> },
    /// Evaluate an array to completion under a specifier.
    Block { value: Cell, specifier: Specifier },
}

#[derive(Debug)]
pub struct Level {
    /// Stable identity for this invocation; frame back-pointers and
    /// varargs refer to levels by serial so a dead level is detectable.
    pub serial: u64,
    pub feed: Feed,
    pub out: Cell,
    pub spare: Cell,
    /// Dispatcher-owned resumption state.
    pub state: u8,
    pub flags: LevelFlags,
    /// The action identity this level is running as (specializations
    /// substitute it before redoing).
    pub phase: Option<ActionId>,
    /// The action as originally invoked, for diagnostics.
    pub original: Option<ActionId>,
    /// The word this action was invoked through, if any.
    pub label: Option<SymbolId>,
    /// The frame context being filled (then consulted) by an action.
    pub varlist: Option<ContextId>,
    /// Coupling carried by the invoked action value (definitional
    /// RETURN's target).
    pub binding: Binding,
    /// Request staged for the trampoline by Continue/Delegate bounces.
    pub pending: Option<Pending>,
}

impl Level {
    pub fn new(serial: u64, feed: Feed) -> Self {
        Level {
            serial,
            feed,
            out: Cell::trash(),
            spare: Cell::trash(),
            state: 0,
            flags: LevelFlags::empty(),
            phase: None,
            original: None,
            label: None,
            varlist: None,
            binding: Binding::Unbound,
            pending: None,
        }
    }
}
