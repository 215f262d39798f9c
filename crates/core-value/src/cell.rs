//! The fixed-width tagged value slot.
//!
//! A cell's meaning is the tuple `(kind, quote byte, payload, flags)`.
//! Writers go through the constructors (or `reset`), which stamp the
//! header flags that make a slot recognizable as a live cell; partial
//! writes that leave a stale kind with a new payload cannot be expressed.
//!
//! Stability classes:
//! * **stable values** may sit in variables and arrays;
//! * **atoms** additionally admit the unstable isotopes `Pack` and
//!   `Nihil`, which may only live transiently in evaluator output slots
//!   and must be `decay`ed before storage;
//! * **elements** are stable values permitted inside arrays.

use bitflags::bitflags;

use crate::binding::Binding;
use crate::ids::{ActionId, ContextId, SeriesId, SymbolId};
use crate::kind::Kind;

bitflags! {
    /// Category bits carried alongside the kind tag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CellFlags: u16 {
        /// Slot participates in node-identity checks (always set by
        /// constructors; absent only on the implicit array end marker's
        /// CELL bit, see `Cell::END`).
        const NODE = 1 << 0;
        /// Slot is a full cell (writes permitted when unprotected).
        const CELL = 1 << 1;
        /// Variable-level write protection (PROTECT without /deep).
        const PROTECTED = 1 << 2;
        /// Value came from a quoting construct; the evaluator must not
        /// re-evaluate it.
        const UNEVALUATED = 1 << 3;
        /// On a variable slot holding an action: dispatch it infix,
        /// taking its first argument from the previous output.
        const ENFIXED = 1 << 4;
        /// Output slot content survived an invisible evaluation; it is
        /// not the product of the most recent step.
        const STALE = 1 << 5;
        /// Read-only through this reference (does not freeze the
        /// underlying series).
        const CONST = 1 << 6;
        /// Mutability was explicitly requested, overriding inherited
        /// constness.
        const EXPLICITLY_MUTABLE = 1 << 7;
        /// Molding hint recorded by the scanner.
        const NEWLINE_BEFORE = 1 << 8;
    }
}

/// Quote byte value for isotopes ("antiforms").
pub const QUOTE_ISOTOPE: u8 = 0;
/// Quote byte value for a plain, unquoted value.
pub const QUOTE_PLAIN: u8 = 1;

/// Payload storage. Inline scalars or heap ids; never owning in a unique
/// sense — reachability of referenced nodes is the collector's business.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    #[default]
    None,
    Logic(bool),
    Integer(i64),
    Text {
        series: SeriesId,
        index: u32,
    },
    Word {
        symbol: SymbolId,
        binding: Binding,
        /// Position within the binding target's keylist. Zero means
        /// "never cached"; lookup verifies before trusting it.
        index: u32,
    },
    Array {
        series: SeriesId,
        index: u32,
        binding: Binding,
    },
    Context(ContextId),
    Action {
        action: ActionId,
        /// Coupling for definitional RETURN: the frame this action's
        /// RETURN should exit.
        binding: Binding,
    },
    Handle(SeriesId),
    Varargs {
        /// Serial of the level whose feed this varargs drains. Dead
        /// serials make the varargs error rather than dangle.
        level_serial: u64,
    },
}

/// A fixed-width tagged value slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    kind: Kind,
    quote: u8,
    flags: CellFlags,
    payload: Payload,
}

impl Default for Cell {
    fn default() -> Self {
        Cell::trash()
    }
}

impl Cell {
    /// The shared implicit end marker. Carries the NODE bit but not the
    /// CELL bit: readable as "end of sequence" anywhere, never writable.
    pub const END: Cell = Cell {
        kind: Kind::End,
        quote: QUOTE_PLAIN,
        flags: CellFlags::NODE,
        payload: Payload::None,
    };

    /// The stamp the allocator writes into dead slots.
    pub const FREE: Cell = Cell {
        kind: Kind::Free,
        quote: QUOTE_PLAIN,
        flags: CellFlags::empty(),
        payload: Payload::None,
    };

    fn new(kind: Kind, payload: Payload) -> Self {
        debug_assert!(kind.is_valid_live());
        Cell {
            kind,
            quote: if kind.is_unstable_isotope() {
                QUOTE_ISOTOPE
            } else {
                QUOTE_PLAIN
            },
            flags: CellFlags::NODE | CellFlags::CELL,
            payload,
        }
    }

    pub fn trash() -> Self {
        Cell::new(Kind::Trash, Payload::None)
    }

    pub fn null() -> Self {
        Cell::new(Kind::Null, Payload::None)
    }

    pub fn blank() -> Self {
        Cell::new(Kind::Blank, Payload::None)
    }

    pub fn comma() -> Self {
        Cell::new(Kind::Comma, Payload::None)
    }

    pub fn nihil() -> Self {
        Cell::new(Kind::Nihil, Payload::None)
    }

    pub fn pack(series: SeriesId) -> Self {
        Cell::new(
            Kind::Pack,
            Payload::Array {
                series,
                index: 0,
                binding: Binding::Unbound,
            },
        )
    }

    pub fn logic(value: bool) -> Self {
        Cell::new(Kind::Logic, Payload::Logic(value))
    }

    pub fn integer(value: i64) -> Self {
        Cell::new(Kind::Integer, Payload::Integer(value))
    }

    pub fn text(series: SeriesId) -> Self {
        Cell::new(Kind::Text, Payload::Text { series, index: 0 })
    }

    pub fn word(kind: Kind, symbol: SymbolId) -> Self {
        debug_assert!(kind.is_word());
        Cell::new(
            kind,
            Payload::Word {
                symbol,
                binding: Binding::Unbound,
                index: 0,
            },
        )
    }

    pub fn bound_word(kind: Kind, symbol: SymbolId, binding: Binding, index: u32) -> Self {
        debug_assert!(kind.is_word());
        Cell::new(
            kind,
            Payload::Word {
                symbol,
                binding,
                index,
            },
        )
    }

    pub fn array(kind: Kind, series: SeriesId) -> Self {
        debug_assert!(kind.is_array());
        Cell::new(
            kind,
            Payload::Array {
                series,
                index: 0,
                binding: Binding::Unbound,
            },
        )
    }

    pub fn array_at(kind: Kind, series: SeriesId, index: u32, binding: Binding) -> Self {
        debug_assert!(kind.is_array());
        Cell::new(
            kind,
            Payload::Array {
                series,
                index,
                binding,
            },
        )
    }

    pub fn context(kind: Kind, context: ContextId) -> Self {
        debug_assert!(kind.is_context());
        Cell::new(kind, Payload::Context(context))
    }

    pub fn action(action: ActionId) -> Self {
        Cell::new(
            Kind::Action,
            Payload::Action {
                action,
                binding: Binding::Unbound,
            },
        )
    }

    pub fn bound_action(action: ActionId, binding: Binding) -> Self {
        Cell::new(Kind::Action, Payload::Action { action, binding })
    }

    pub fn handle(series: SeriesId) -> Self {
        Cell::new(Kind::Handle, Payload::Handle(series))
    }

    pub fn varargs(level_serial: u64) -> Self {
        Cell::new(Kind::Varargs, Payload::Varargs { level_serial })
    }

    // --- header access ---------------------------------------------------

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The kind underneath any quoting (same as `kind`; quoting never
    /// changes the tag, only the quote byte).
    pub fn heart(&self) -> Kind {
        self.kind
    }

    pub fn quote_byte(&self) -> u8 {
        self.quote
    }

    pub fn flags(&self) -> CellFlags {
        self.flags
    }

    pub fn set_flag(&mut self, flag: CellFlags) {
        self.flags |= flag;
    }

    pub fn clear_flag(&mut self, flag: CellFlags) {
        self.flags &= !flag;
    }

    pub fn has_flag(&self, flag: CellFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    // --- classification --------------------------------------------------

    pub fn is_end(&self) -> bool {
        self.kind == Kind::End
    }

    pub fn is_free(&self) -> bool {
        self.kind == Kind::Free
    }

    /// Well-formedness of a live cell header. The free and end stamps can
    /// never be confused with a live cell because they lack the CELL bit.
    pub fn is_live(&self) -> bool {
        self.kind.is_valid_live() && self.flags.contains(CellFlags::NODE | CellFlags::CELL)
    }

    pub fn is_quoted(&self) -> bool {
        self.quote > QUOTE_PLAIN
    }

    pub fn is_isotope(&self) -> bool {
        self.quote == QUOTE_ISOTOPE
    }

    /// Stable cells may be stored into variables and arrays.
    pub fn is_stable(&self) -> bool {
        !self.kind.is_unstable_isotope()
    }

    pub fn is_nihil(&self) -> bool {
        self.kind == Kind::Nihil
    }

    pub fn is_action(&self) -> bool {
        self.kind == Kind::Action && !self.is_quoted()
    }

    /// Conditional truth. `Trash` has no truth value; callers raise on
    /// `None`.
    pub fn truthiness(&self) -> Option<bool> {
        match self.kind {
            Kind::Null | Kind::Blank => Some(false),
            Kind::Logic => match self.payload {
                Payload::Logic(b) => Some(b),
                _ => Some(true),
            },
            Kind::Trash => None,
            _ => Some(true),
        }
    }

    // --- quoting ---------------------------------------------------------

    /// Add `levels` quote levels.
    pub fn quoted(mut self, levels: u8) -> Self {
        debug_assert!(!self.kind.is_unstable_isotope());
        self.quote = self.quote.saturating_add(levels);
        self
    }

    /// Remove one quote level; evaluating a quoted value produces this.
    pub fn unquoted(mut self) -> Self {
        debug_assert!(self.is_quoted());
        self.quote -= 1;
        // A synthesized unquote is not "as written" anymore.
        self.flags.remove(CellFlags::UNEVALUATED);
        self
    }

    // --- payload shortcuts ----------------------------------------------

    pub fn as_integer(&self) -> Option<i64> {
        match self.payload {
            Payload::Integer(n) if self.kind == Kind::Integer => Some(n),
            _ => None,
        }
    }

    pub fn as_logic(&self) -> Option<bool> {
        match self.payload {
            Payload::Logic(b) if self.kind == Kind::Logic => Some(b),
            _ => None,
        }
    }

    pub fn as_word(&self) -> Option<(SymbolId, Binding, u32)> {
        match self.payload {
            Payload::Word {
                symbol,
                binding,
                index,
            } if self.kind.is_word() => Some((symbol, binding, index)),
            _ => None,
        }
    }

    pub fn word_symbol(&self) -> Option<SymbolId> {
        self.as_word().map(|(s, _, _)| s)
    }

    pub fn as_array(&self) -> Option<(SeriesId, u32, Binding)> {
        match self.payload {
            Payload::Array {
                series,
                index,
                binding,
            } => Some((series, index, binding)),
            _ => None,
        }
    }

    pub fn as_context(&self) -> Option<ContextId> {
        match self.payload {
            Payload::Context(id) if self.kind.is_context() => Some(id),
            _ => None,
        }
    }

    pub fn as_action(&self) -> Option<(ActionId, Binding)> {
        match self.payload {
            Payload::Action { action, binding } => Some((action, binding)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<(SeriesId, u32)> {
        match self.payload {
            Payload::Text { series, index } if self.kind == Kind::Text => Some((series, index)),
            _ => None,
        }
    }

    /// Rewrite a word's binding in place (cache-back after a verified
    /// lookup, or explicit `bind`).
    pub fn update_word_binding(&mut self, new_binding: Binding, new_index: u32) {
        if let Payload::Word { binding, index, .. } = &mut self.payload {
            *binding = new_binding;
            *index = new_index;
        }
    }

    pub fn set_array_binding(&mut self, new_binding: Binding) {
        if let Payload::Array { binding, .. } = &mut self.payload {
            *binding = new_binding;
        }
    }

    pub fn set_action_binding(&mut self, new_binding: Binding) {
        if let Payload::Action { binding, .. } = &mut self.payload {
            *binding = new_binding;
        }
    }

    // --- movement --------------------------------------------------------

    /// Transfer the value out, leaving a detectable moved-from state.
    pub fn take(&mut self) -> Cell {
        std::mem::replace(self, Cell::trash())
    }

    /// Overwrite this slot. Equivalent to a reset-then-fill: the old
    /// header is gone entirely; flags do not leak from the previous
    /// occupant.
    pub fn write(&mut self, value: Cell) {
        debug_assert!(!self.flags.contains(CellFlags::PROTECTED));
        *self = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_stamp_live_headers() {
        let cell = Cell::integer(7);
        assert!(cell.is_live());
        assert_eq!(cell.kind(), Kind::Integer);
        assert_eq!(cell.quote_byte(), QUOTE_PLAIN);
        assert_eq!(cell.as_integer(), Some(7));
    }

    #[test]
    fn end_and_free_are_not_live() {
        assert!(!Cell::END.is_live());
        assert!(Cell::END.is_end());
        assert!(!Cell::FREE.is_live());
        assert!(Cell::FREE.is_free());
        // The end marker keeps the NODE bit but not the CELL bit.
        assert!(Cell::END.flags().contains(CellFlags::NODE));
        assert!(!Cell::END.flags().contains(CellFlags::CELL));
    }

    #[test]
    fn quote_byte_round_trip() {
        let quoted = Cell::integer(1).quoted(2);
        assert!(quoted.is_quoted());
        assert_eq!(quoted.quote_byte(), 3);
        let back = quoted.unquoted().unquoted();
        assert!(!back.is_quoted());
        assert_eq!(back.quote_byte(), QUOTE_PLAIN);
    }

    #[test]
    fn isotopes_carry_quote_zero() {
        assert!(Cell::nihil().is_isotope());
        assert!(!Cell::nihil().is_stable());
        assert!(Cell::integer(1).is_stable());
    }

    #[test]
    fn take_leaves_trash() {
        let mut slot = Cell::integer(42);
        let moved = slot.take();
        assert_eq!(moved.as_integer(), Some(42));
        assert_eq!(slot.kind(), Kind::Trash);
    }

    #[test]
    fn truthiness_classes() {
        assert_eq!(Cell::logic(false).truthiness(), Some(false));
        assert_eq!(Cell::null().truthiness(), Some(false));
        assert_eq!(Cell::blank().truthiness(), Some(false));
        assert_eq!(Cell::integer(0).truthiness(), Some(true));
        assert_eq!(Cell::trash().truthiness(), None);
    }
}
