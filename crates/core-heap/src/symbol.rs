//! Interned symbols.
//!
//! Spellings intern once and live for the life of the heap; word
//! comparison is id comparison. Case-insensitive matching goes through a
//! canon id (the first-interned spelling of the case-folded form), which
//! keeps "equal?"-style word comparison O(1) without losing the original
//! casing for molding.
//!
//! A symbol also anchors the variables of module-style "sea" contexts:
//! each module variable is a singular array hitched onto its symbol, so
//! attached-word lookup is a walk of the symbol's hitch chain instead of
//! a positional index.

use std::collections::HashMap;

use core_value::{ContextId, SeriesId, SymbolId};

/// One module variable hitched onto a symbol.
#[derive(Debug, Clone, Copy)]
pub struct Hitch {
    pub module: ContextId,
    /// Singular array whose only cell is the variable.
    pub var: SeriesId,
}

#[derive(Debug)]
pub struct Symbol {
    pub text: Box<str>,
    /// Canon id for case-insensitive comparison.
    pub canon: SymbolId,
    pub hitches: Vec<Hitch>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: Vec<Symbol>,
    by_exact: HashMap<Box<str>, SymbolId>,
    by_folded: HashMap<String, SymbolId>,
}

impl SymbolTable {
    pub fn intern(&mut self, spelling: &str) -> SymbolId {
        if let Some(id) = self.by_exact.get(spelling) {
            return *id;
        }
        let id = SymbolId(self.entries.len() as u32);
        let folded = spelling.to_lowercase();
        let canon = *self.by_folded.entry(folded).or_insert(id);
        self.entries.push(Symbol {
            text: spelling.into(),
            canon,
            hitches: Vec::new(),
        });
        self.by_exact.insert(spelling.into(), id);
        id
    }

    pub fn text(&self, id: SymbolId) -> &str {
        &self.entries[id.0 as usize].text
    }

    pub fn canon(&self, id: SymbolId) -> SymbolId {
        self.entries[id.0 as usize].canon
    }

    /// Case-insensitive symbol equivalence.
    pub fn same_spelling(&self, a: SymbolId, b: SymbolId) -> bool {
        a == b || self.canon(a) == self.canon(b)
    }

    pub fn hitches(&self, id: SymbolId) -> &[Hitch] {
        &self.entries[id.0 as usize].hitches
    }

    pub fn add_hitch(&mut self, id: SymbolId, hitch: Hitch) {
        self.entries[id.0 as usize].hitches.push(hitch);
    }

    pub fn find_hitch(&self, id: SymbolId, module: ContextId) -> Option<SeriesId> {
        self.entries[id.0 as usize]
            .hitches
            .iter()
            .find(|h| h.module == module)
            .map(|h| h.var)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut table = SymbolTable::default();
        let a = table.intern("append");
        let b = table.intern("append");
        assert_eq!(a, b);
        assert_eq!(table.text(a), "append");
    }

    #[test]
    fn canon_links_case_variants() {
        let mut table = SymbolTable::default();
        let lower = table.intern("foo");
        let upper = table.intern("FOO");
        assert_ne!(lower, upper);
        assert!(table.same_spelling(lower, upper));
        assert_eq!(table.text(upper), "FOO");
        let other = table.intern("bar");
        assert!(!table.same_spelling(lower, other));
    }
}
