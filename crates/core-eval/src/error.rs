//! The error catalog and error-object construction.
//!
//! Errors are ordinary context values shaped
//! `{code type id arg1 arg2 arg3 near where}`. The catalog maps a
//! `(category, offset)` pair to a message template whose `arg1 arg2
//! arg3` slots are substituted at display time, and `code` is
//! `category * 100 + offset`.
//!
//! Three errors are built during boot so that raising them requires no
//! allocation: out-of-memory, stack overflow, and halt.

use core_heap::{ContextKind, HeapFault};
use core_value::{Cell, ContextId, Kind};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::machine::Machine;
use crate::raise::Raise;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Category {
    Internal = 0,
    Syntax = 1,
    Script = 2,
    Math = 3,
    Access = 4,
    User = 5,
}

impl Category {
    pub fn name(self) -> &'static str {
        match self {
            Category::Internal => "internal",
            Category::Syntax => "syntax",
            Category::Script => "script",
            Category::Math => "math",
            Category::Access => "access",
            Category::User => "user",
        }
    }
}

/// Every error the core can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrId {
    // internal
    StackOverflow,
    OutOfMemory,
    Halt,
    MiscInternal,
    // syntax
    Scan,
    // script
    UnboundWord,
    NeedsValue,
    NotAnAction,
    TypeMismatch,
    ExpectArg,
    InvalidArg,
    NoCatch,
    LockedSeries,
    Protected,
    Hidden,
    PastEnd,
    StaleFrame,
    BadRefinement,
    DoubleEvoke,
    BadPath,
    ExpiredFrame,
    BadSpec,
    // math
    Overflow,
    DivideByZero,
    // access
    Security,
    // user
    User,
}

impl ErrId {
    pub fn category(self) -> Category {
        use ErrId::*;
        match self {
            StackOverflow | OutOfMemory | Halt | MiscInternal => Category::Internal,
            Scan => Category::Syntax,
            UnboundWord | NeedsValue | NotAnAction | TypeMismatch | ExpectArg | InvalidArg
            | NoCatch | LockedSeries | Protected | Hidden | PastEnd | StaleFrame
            | BadRefinement | DoubleEvoke | BadPath | ExpiredFrame | BadSpec => Category::Script,
            Overflow | DivideByZero => Category::Math,
            Security => Category::Access,
            User => Category::User,
        }
    }

    pub fn offset(self) -> u8 {
        use ErrId::*;
        match self {
            StackOverflow => 0,
            OutOfMemory => 1,
            Halt => 2,
            MiscInternal => 3,
            Scan => 0,
            UnboundWord => 0,
            NeedsValue => 1,
            NotAnAction => 2,
            TypeMismatch => 3,
            ExpectArg => 4,
            InvalidArg => 5,
            NoCatch => 6,
            LockedSeries => 7,
            Protected => 8,
            Hidden => 9,
            PastEnd => 10,
            StaleFrame => 11,
            BadRefinement => 12,
            DoubleEvoke => 13,
            BadPath => 14,
            ExpiredFrame => 15,
            BadSpec => 16,
            Overflow => 0,
            DivideByZero => 1,
            Security => 0,
            User => 0,
        }
    }

    pub fn code(self) -> i64 {
        self.category() as u8 as i64 * 100 + self.offset() as i64
    }

    /// Identifier word for the error's `id` field.
    pub fn id_name(self) -> &'static str {
        use ErrId::*;
        match self {
            StackOverflow => "stack-overflow",
            OutOfMemory => "no-memory",
            Halt => "halt",
            MiscInternal => "misc",
            Scan => "invalid",
            UnboundWord => "no-value",
            NeedsValue => "need-value",
            NotAnAction => "not-an-action",
            TypeMismatch => "expect-arg",
            ExpectArg => "no-arg",
            InvalidArg => "invalid-arg",
            NoCatch => "no-catch",
            LockedSeries => "locked-series",
            Protected => "protected",
            Hidden => "hidden",
            PastEnd => "past-end",
            StaleFrame => "stale-frame",
            BadRefinement => "bad-refine",
            DoubleEvoke => "double-evoke",
            BadPath => "bad-path",
            ExpiredFrame => "expired-frame",
            BadSpec => "bad-func-def",
            Overflow => "overflow",
            DivideByZero => "zero-divide",
            Security => "security",
            User => "user",
        }
    }

    pub fn template(self) -> &'static str {
        use ErrId::*;
        match self {
            StackOverflow => "stack overflow",
            OutOfMemory => "not enough memory to complete operation",
            Halt => "halted by user or script",
            MiscInternal => "internal error: arg1",
            Scan => "syntax error: arg1",
            UnboundWord => "arg1 word is not bound to a value",
            NeedsValue => "arg1 needs a value",
            NotAnAction => "arg1 does not look up to an action",
            TypeMismatch => "arg1 does not allow arg2 for its arg3 argument",
            ExpectArg => "arg1 is missing its arg2 argument",
            InvalidArg => "invalid argument: arg1",
            NoCatch => "no catch for throw: arg1",
            LockedSeries => "locked series - modification not allowed",
            Protected => "protected variable - cannot modify: arg1",
            Hidden => "cannot access arg1 - hidden by protect/hide",
            PastEnd => "out of range or past end",
            StaleFrame => "frame has already returned - cannot return from it",
            BadRefinement => "incompatible or duplicate refinement: arg1",
            DoubleEvoke => "refinement arg1 and arg2 both evoked by example",
            BadPath => "cannot follow path: arg1",
            ExpiredFrame => "frame is no longer on the stack",
            BadSpec => "invalid function definition: arg1",
            Overflow => "math or number overflow",
            DivideByZero => "attempt to divide by zero",
            Security => "security policy violation: arg1",
            User => "arg1",
        }
    }

    /// Catalog listing used by boot to build `system/catalog/errors`.
    pub fn all() -> &'static [ErrId] {
        use ErrId::*;
        &[
            StackOverflow,
            OutOfMemory,
            Halt,
            MiscInternal,
            Scan,
            UnboundWord,
            NeedsValue,
            NotAnAction,
            TypeMismatch,
            ExpectArg,
            InvalidArg,
            NoCatch,
            LockedSeries,
            Protected,
            Hidden,
            PastEnd,
            StaleFrame,
            BadRefinement,
            DoubleEvoke,
            BadPath,
            ExpiredFrame,
            BadSpec,
            Overflow,
            DivideByZero,
            Security,
            User,
        ]
    }
}

impl Machine {
    /// Build an error context. `args` fills `arg1 arg2 arg3` in order;
    /// `near` and `where` come from the live level stack.
    pub fn make_error(&mut self, id: ErrId, args: &[Cell]) -> ContextId {
        let near = self.capture_near();
        let wheres = self.capture_where();
        self.build_error_object(id, args, near, wheres)
            .unwrap_or(self.oom_error)
    }

    pub(crate) fn build_error_object(
        &mut self,
        id: ErrId,
        args: &[Cell],
        near: Option<Cell>,
        wheres: Option<Cell>,
    ) -> Result<ContextId, HeapFault> {
        let ctx = self.heap.make_context(ContextKind::Error, 8)?;
        let fields = [
            ("code", Cell::integer(id.code())),
            (
                "type",
                Cell::word(Kind::Word, self.heap.symbols.intern(id.category().name())),
            ),
            (
                "id",
                Cell::word(Kind::Word, self.heap.symbols.intern(id.id_name())),
            ),
            ("arg1", args.first().cloned().unwrap_or_else(Cell::null)),
            ("arg2", args.get(1).cloned().unwrap_or_else(Cell::null)),
            ("arg3", args.get(2).cloned().unwrap_or_else(Cell::null)),
            ("near", near.unwrap_or_else(Cell::null)),
            ("where", wheres.unwrap_or_else(Cell::null)),
        ];
        for (name, value) in fields {
            let sym = self.heap.symbols.intern(name);
            self.heap.context_append(ctx, sym, value)?;
        }
        self.heap.manage_context(ctx)?;
        Ok(ctx)
    }

    /// Raise an error by catalog id.
    pub fn fail(&mut self, id: ErrId, args: &[Cell]) -> Raise {
        let ctx = self.make_error(id, args);
        Raise::Error(ctx)
    }

    /// Translate a heap fault into the corresponding catalog error. The
    /// pre-allocated out-of-memory error is used so reporting exhaustion
    /// allocates nothing.
    pub fn fault(&mut self, fault: HeapFault) -> Raise {
        match fault {
            HeapFault::LockedSeries | HeapFault::FixedSize => self.fail(ErrId::LockedSeries, &[]),
            HeapFault::PastEnd => self.fail(ErrId::PastEnd, &[]),
            HeapFault::Inaccessible => self.fail(ErrId::ExpiredFrame, &[]),
            HeapFault::OutOfMemory(_) => Raise::Error(self.oom_error),
            HeapFault::Protected => self.fail(ErrId::Protected, &[]),
            HeapFault::StaleId => self.fail(ErrId::MiscInternal, &[]),
        }
    }

    pub fn is_halt(&self, error: ContextId) -> bool {
        error == self.halt_error
    }

    /// The input neighborhood of the innermost feed that has one (the
    /// deepest level is often a dispatch-only level over nothing).
    fn capture_near(&mut self) -> Option<Cell> {
        let window = self
            .levels
            .iter()
            .rev()
            .map(|level| level.feed.near_window(&self.heap, 3))
            .find(|window| !window.is_empty())?;
        let array = self
            .heap
            .make_array(window.len(), core_heap::SeriesFlags::MANAGED)
            .ok()?;
        for cell in window {
            self.heap.array_push(array, cell).ok()?;
        }
        Some(Cell::array(Kind::Block, array))
    }

    /// Labels of the levels on the stack, callee first, as a block.
    fn capture_where(&mut self) -> Option<Cell> {
        let labels: Vec<Cell> = self
            .levels
            .iter()
            .rev()
            .filter_map(|level| level.label)
            .map(|sym| Cell::word(Kind::Word, sym))
            .collect();
        let array = self
            .heap
            .make_array(labels.len().max(1), core_heap::SeriesFlags::MANAGED)
            .ok()?;
        for cell in labels {
            self.heap.array_push(array, cell).ok()?;
        }
        Some(Cell::array(Kind::Block, array))
    }

    // --- reading error objects -------------------------------------------

    pub fn error_field(&self, error: ContextId, name: &str) -> Option<Cell> {
        let context = self.heap.context(error).ok()?;
        let index = context
            .keylist
            .keys
            .iter()
            .position(|k| self.heap.symbols.text(k.symbol) == name)?;
        self.heap
            .context_var(error, index + 1)
            .ok()
            .cloned()
    }

    pub fn error_code(&self, error: ContextId) -> i64 {
        self.error_field(error, "code")
            .and_then(|c| c.as_integer())
            .unwrap_or(Category::Internal as u8 as i64 * 100)
    }

    /// Render an error for display, substituting the template's
    /// `arg1 arg2 arg3` slots.
    pub fn mold_error(&self, error: ContextId) -> String {
        let category = self
            .error_field(error, "type")
            .and_then(|c| c.word_symbol())
            .map(|s| self.heap.symbols.text(s).to_string())
            .unwrap_or_else(|| "internal".into());
        let id = self
            .error_field(error, "id")
            .and_then(|c| c.word_symbol())
            .map(|s| self.heap.symbols.text(s).to_string())
            .unwrap_or_default();
        let template = ErrId::all()
            .iter()
            .find(|e| e.id_name() == id && e.category().name() == category)
            .map(|e| e.template())
            .unwrap_or("arg1");

        let mut message = String::new();
        for (i, token) in template.split(' ').enumerate() {
            if i > 0 {
                message.push(' ');
            }
            match token {
                "arg1" | "arg2" | "arg3" => {
                    let arg = self.error_field(error, token).unwrap_or_else(Cell::null);
                    message.push_str(&self.mold(&arg));
                }
                other => message.push_str(other),
            }
        }

        let mut capitalized = category.to_string();
        if let Some(first) = capitalized.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        format!("** {capitalized} Error: {message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_compose_category_and_offset() {
        assert_eq!(ErrId::StackOverflow.code(), 0);
        assert_eq!(ErrId::UnboundWord.code(), 200);
        assert_eq!(ErrId::NoCatch.code(), 206);
        assert_eq!(ErrId::DivideByZero.code(), 301);
        assert_eq!(ErrId::User.code(), 500);
    }

    #[test]
    fn catalog_offsets_are_unique_per_category() {
        let all = ErrId::all();
        for a in all {
            for b in all {
                if a != b {
                    assert!(
                        !(a.category() == b.category() && a.offset() == b.offset()),
                        "{a:?} and {b:?} collide"
                    );
                }
            }
        }
    }
}
