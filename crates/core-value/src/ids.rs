//! Index newtypes for heap entities.
//!
//! Heap objects are addressed by plain `u32` indices into their arenas
//! rather than by pointer. A freed arena slot is stamped with the free
//! pattern, so a stale id is detectable at the access site instead of
//! aliasing whatever got allocated next.

/// Identity of a series header node (byte buffer or array).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesId(pub u32);

/// Identity of a context (object, module, frame, error, port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u32);

/// Identity of an action (the callable, not any one invocation of it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(pub u32);

/// Identity of an interned symbol. Two words with the same spelling
/// always carry the same `SymbolId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

/// Identity of a virtual-binding patch (one overlay link in a specifier
/// chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchId(pub u32);

/// Index into the machine's dispatcher table. Actions store this instead
/// of a function pointer so the heap crate never names evaluator types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatcherId(pub u16);

impl std::fmt::Display for SeriesId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "series#{}", self.0)
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "action#{}", self.0)
    }
}
