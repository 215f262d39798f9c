//! Contexts: keyed variable stores (objects, frames, modules, errors).
//!
//! A context pairs a varlist (array series whose slot 0 is the archetype
//! and slots 1..=N the variables) with a keylist of symbol entries shared
//! by reference. Appending to a context whose keylist is shared forces a
//! private copy first, so siblings built from one template diverge
//! without disturbing each other.
//!
//! FRAME contexts carry a back-pointer to the live call level while the
//! call is on the stack. The pointer is a serial number, not an owning
//! reference: when the call returns it is nulled and the context is
//! "expired" — captured variables still read through the varlist, but
//! frame-relative features fault.
//!
//! MODULE contexts are "seas": their variables are not positional slots
//! but singular arrays hitched onto the symbols themselves.

use std::rc::Rc;

use bitflags::bitflags;
use core_value::{ActionId, Cell, ContextId, Kind, PatchId, SeriesId, Specifier, SymbolId};

use crate::series::SeriesFlags;
use crate::symbol::Hitch;
use crate::{Heap, HeapFault};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeyFlags: u8 {
        /// Slot is not visible through the facade (specialized out).
        const HIDDEN = 1 << 0;
        /// Slot may not be bound to by user code.
        const UNBINDABLE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Key {
    pub symbol: SymbolId,
    pub flags: KeyFlags,
}

#[derive(Debug, Default, Clone)]
pub struct KeyList {
    pub keys: Vec<Key>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Object,
    Module,
    Frame,
    Error,
    Port,
}

impl ContextKind {
    pub fn cell_kind(self) -> Kind {
        match self {
            ContextKind::Object => Kind::Object,
            ContextKind::Module => Kind::Module,
            ContextKind::Frame => Kind::Frame,
            ContextKind::Error => Kind::Error,
            ContextKind::Port => Kind::Port,
        }
    }
}

#[derive(Debug)]
pub struct Context {
    pub kind: ContextKind,
    pub varlist: SeriesId,
    pub keylist: Rc<KeyList>,
    /// Frames: the action this invocation is running as.
    pub phase: Option<ActionId>,
    /// Frames: serial of the live level, while one exists.
    pub frame_serial: Option<u64>,
    /// Frames: set once the dispatcher has run; RETURN against an
    /// expired-and-invoked frame is the stale-frame error.
    pub invoked: bool,
    /// Modules: owned variable list, parallel to the symbol hitches.
    pub module_vars: Vec<(SymbolId, SeriesId)>,
    pub managed: bool,
    pub(crate) marked: bool,
}

pub(crate) enum CtxSlot {
    Free { next: Option<u32> },
    Live(Context),
}

/// A virtual-binding overlay node: one link of a specifier chain.
#[derive(Debug)]
pub struct Patch {
    pub next: Specifier,
    /// The context consulted before the rest of the chain.
    pub overlay: ContextId,
    pub(crate) marked: bool,
}

pub(crate) enum PatchSlot {
    Free { next: Option<u32> },
    Live(Patch),
}

impl Heap {
    fn alloc_context_slot(&mut self, context: Context) -> ContextId {
        match self.contexts_free.take() {
            Some(idx) => {
                if let CtxSlot::Free { next } = self.contexts[idx as usize] {
                    self.contexts_free = next;
                }
                self.contexts[idx as usize] = CtxSlot::Live(context);
                ContextId(idx)
            }
            None => {
                self.contexts.push(CtxSlot::Live(context));
                ContextId(self.contexts.len() as u32 - 1)
            }
        }
    }

    pub fn context(&self, id: ContextId) -> Result<&Context, HeapFault> {
        match self.contexts.get(id.0 as usize) {
            Some(CtxSlot::Live(context)) => Ok(context),
            _ => Err(HeapFault::StaleId),
        }
    }

    pub fn context_mut(&mut self, id: ContextId) -> Result<&mut Context, HeapFault> {
        match self.contexts.get_mut(id.0 as usize) {
            Some(CtxSlot::Live(context)) => Ok(context),
            _ => Err(HeapFault::StaleId),
        }
    }

    /// Make an empty context with capacity hints. Unmanaged until
    /// `manage_context` (or construction-complete paths) promotes it.
    pub fn make_context(
        &mut self,
        kind: ContextKind,
        capacity: usize,
    ) -> Result<ContextId, HeapFault> {
        let varlist = self.make_array(capacity + 1, SeriesFlags::MANAGED)?;
        let id = self.alloc_context_slot(Context {
            kind,
            varlist,
            keylist: Rc::new(KeyList::default()),
            phase: None,
            frame_serial: None,
            invoked: false,
            module_vars: Vec::new(),
            managed: false,
            marked: false,
        });
        // Slot 0: the archetype, a self-referencing context cell.
        self.array_push(varlist, Cell::context(kind.cell_kind(), id))?;
        Ok(id)
    }

    pub fn manage_context(&mut self, id: ContextId) -> Result<(), HeapFault> {
        self.context_mut(id)?.managed = true;
        Ok(())
    }

    /// Free an unmanaged context (e.g. a specialization exemplar whose
    /// construction was abandoned by a trap).
    pub fn free_unmanaged_context(&mut self, id: ContextId) -> Result<(), HeapFault> {
        let context = self.context(id)?;
        debug_assert!(!context.managed);
        let slot = &mut self.contexts[id.0 as usize];
        *slot = CtxSlot::Free {
            next: self.contexts_free,
        };
        self.contexts_free = Some(id.0);
        Ok(())
    }

    /// Number of variables (excluding the archetype slot).
    pub fn context_len(&self, id: ContextId) -> Result<usize, HeapFault> {
        Ok(self.context(id)?.keylist.keys.len())
    }

    pub fn context_key(&self, id: ContextId, index: usize) -> Result<Key, HeapFault> {
        let context = self.context(id)?;
        context
            .keylist
            .keys
            .get(index.checked_sub(1).ok_or(HeapFault::PastEnd)?)
            .copied()
            .ok_or(HeapFault::PastEnd)
    }

    /// Variable slot by 1-based index.
    pub fn context_var(&self, id: ContextId, index: usize) -> Result<&Cell, HeapFault> {
        let context = self.context(id)?;
        if index == 0 || index > context.keylist.keys.len() {
            return Err(HeapFault::PastEnd);
        }
        self.array_cell(context.varlist, index)
    }

    pub fn context_var_set(
        &mut self,
        id: ContextId,
        index: usize,
        value: Cell,
    ) -> Result<(), HeapFault> {
        let context = self.context(id)?;
        if index == 0 || index > context.keylist.keys.len() {
            return Err(HeapFault::PastEnd);
        }
        let varlist = context.varlist;
        let slot = self.array_cell(varlist, index)?;
        if slot.has_flag(core_value::CellFlags::PROTECTED) {
            return Err(HeapFault::Protected);
        }
        self.array_set(varlist, index, value)
    }

    /// Find a variable's 1-based index by symbol. Hidden keys never
    /// match; facades rely on that to make specialized slots invisible.
    pub fn context_find(
        &self,
        id: ContextId,
        symbol: SymbolId,
        case_sensitive: bool,
    ) -> Result<Option<usize>, HeapFault> {
        let context = self.context(id)?;
        for (i, key) in context.keylist.keys.iter().enumerate() {
            if key.flags.contains(KeyFlags::HIDDEN) {
                continue;
            }
            let matches = if case_sensitive {
                key.symbol == symbol
            } else {
                self.symbols.same_spelling(key.symbol, symbol)
            };
            if matches {
                return Ok(Some(i + 1));
            }
        }
        Ok(None)
    }

    /// Verify that `index` in this context really carries `symbol`;
    /// lookup trusts a word's cached index only after this passes.
    pub fn context_verify(
        &self,
        id: ContextId,
        symbol: SymbolId,
        index: usize,
    ) -> Result<bool, HeapFault> {
        let context = self.context(id)?;
        match index.checked_sub(1).and_then(|i| context.keylist.keys.get(i)) {
            Some(key) => Ok(!key.flags.contains(KeyFlags::HIDDEN)
                && self.symbols.same_spelling(key.symbol, symbol)),
            None => Ok(false),
        }
    }

    /// Append a key/variable pair in lockstep, copying a shared keylist
    /// first so divergence stays private.
    pub fn context_append(
        &mut self,
        id: ContextId,
        symbol: SymbolId,
        value: Cell,
    ) -> Result<usize, HeapFault> {
        let varlist = self.context(id)?.varlist;
        self.ensure_mutable(varlist)?;
        let context = self.context_mut(id)?;
        let keys = Rc::make_mut(&mut context.keylist);
        keys.keys.push(Key {
            symbol,
            flags: KeyFlags::empty(),
        });
        let index = keys.keys.len();
        self.array_push(varlist, value)?;
        Ok(index)
    }

    /// Mutable access to this context's key flags, copying a shared
    /// keylist first.
    pub fn context_key_flags_mut(
        &mut self,
        id: ContextId,
        index: usize,
    ) -> Result<&mut KeyFlags, HeapFault> {
        let context = self.context_mut(id)?;
        let keys = Rc::make_mut(&mut context.keylist);
        keys.keys
            .get_mut(index.checked_sub(1).ok_or(HeapFault::PastEnd)?)
            .map(|k| &mut k.flags)
            .ok_or(HeapFault::PastEnd)
    }

    /// Whether two contexts still share one keylist (test hook).
    pub fn contexts_share_keylist(&self, a: ContextId, b: ContextId) -> Result<bool, HeapFault> {
        Ok(Rc::ptr_eq(
            &self.context(a)?.keylist,
            &self.context(b)?.keylist,
        ))
    }

    /// Clone a context's shape (keylist shared, variables copied).
    pub fn context_clone_shape(
        &mut self,
        source: ContextId,
        kind: ContextKind,
    ) -> Result<ContextId, HeapFault> {
        let len = self.context_len(source)?;
        let id = self.make_context(kind, len)?;
        let keylist = Rc::clone(&self.context(source)?.keylist);
        self.context_mut(id)?.keylist = keylist;
        let src_varlist = self.context(source)?.varlist;
        let dst_varlist = self.context(id)?.varlist;
        for i in 1..=len {
            let cell = self.array_cell(src_varlist, i)?.clone();
            self.array_push(dst_varlist, cell)?;
        }
        Ok(id)
    }

    // --- frames ----------------------------------------------------------

    /// A frame context is expired once its live level has dropped.
    pub fn frame_is_expired(&self, id: ContextId) -> Result<bool, HeapFault> {
        let context = self.context(id)?;
        Ok(context.kind == ContextKind::Frame && context.frame_serial.is_none())
    }

    /// Null the live-level back-pointer; called exactly when the level
    /// drops, atomically with the drop from the caller's point of view.
    pub fn expire_frame(&mut self, id: ContextId) -> Result<(), HeapFault> {
        let context = self.context_mut(id)?;
        context.frame_serial = None;
        Ok(())
    }

    // --- modules (sea contexts) ------------------------------------------

    /// Look up a module variable through the symbol's hitch chain.
    pub fn module_var(&self, module: ContextId, symbol: SymbolId) -> Option<SeriesId> {
        self.symbols.find_hitch(symbol, module).or_else(|| {
            // Case-insensitive fallback across the module's own list.
            let context = self.context(module).ok()?;
            context
                .module_vars
                .iter()
                .find(|(s, _)| self.symbols.same_spelling(*s, symbol))
                .map(|(_, v)| *v)
        })
    }

    /// Create (or find) a module variable. Auto-creation is refused on a
    /// frozen module.
    pub fn module_var_ensure(
        &mut self,
        module: ContextId,
        symbol: SymbolId,
    ) -> Result<SeriesId, HeapFault> {
        if let Some(var) = self.module_var(module, symbol) {
            return Ok(var);
        }
        let varlist = self.context(module)?.varlist;
        if self.series(varlist)?.is_frozen() {
            return Err(HeapFault::LockedSeries);
        }
        let var = self.make_singular(Cell::trash(), SeriesFlags::MANAGED)?;
        self.symbols.add_hitch(symbol, Hitch { module, var });
        self.context_mut(module)?.module_vars.push((symbol, var));
        Ok(var)
    }

    pub fn module_read(&self, module: ContextId, symbol: SymbolId) -> Option<&Cell> {
        let var = self.module_var(module, symbol)?;
        self.array_cell(var, 0).ok()
    }

    pub fn module_write(
        &mut self,
        module: ContextId,
        symbol: SymbolId,
        value: Cell,
    ) -> Result<(), HeapFault> {
        let var = self.module_var_ensure(module, symbol)?;
        let slot = self.array_cell(var, 0)?;
        if slot.has_flag(core_value::CellFlags::PROTECTED) {
            return Err(HeapFault::Protected);
        }
        self.array_set(var, 0, value)
    }

    // --- virtual binding patches -----------------------------------------

    pub fn make_patch(&mut self, overlay: ContextId, next: Specifier) -> PatchId {
        let patch = Patch {
            next,
            overlay,
            marked: false,
        };
        match self.patches_free.take() {
            Some(idx) => {
                if let PatchSlot::Free { next } = self.patches[idx as usize] {
                    self.patches_free = next;
                }
                self.patches[idx as usize] = PatchSlot::Live(patch);
                PatchId(idx)
            }
            None => {
                self.patches.push(PatchSlot::Live(patch));
                PatchId(self.patches.len() as u32 - 1)
            }
        }
    }

    pub fn patch(&self, id: PatchId) -> Result<&Patch, HeapFault> {
        match self.patches.get(id.0 as usize) {
            Some(PatchSlot::Live(patch)) => Ok(patch),
            _ => Err(HeapFault::StaleId),
        }
    }

    /// Splice a fresh single-variable overlay (a LET) onto `next`.
    pub fn make_let_patch(
        &mut self,
        symbol: SymbolId,
        value: Cell,
        next: Specifier,
    ) -> Result<PatchId, HeapFault> {
        let overlay = self.make_context(ContextKind::Object, 1)?;
        self.context_append(overlay, symbol, value)?;
        self.manage_context(overlay)?;
        Ok(self.make_patch(overlay, next))
    }

    /// Resolve a symbol against one overlay chain link, returning the
    /// context and index that hold it.
    pub fn patch_find(
        &self,
        id: PatchId,
        symbol: SymbolId,
    ) -> Result<Option<(ContextId, usize)>, HeapFault> {
        let patch = self.patch(id)?;
        match self.context_find(patch.overlay, symbol, false)? {
            Some(index) => Ok(Some((patch.overlay, index))),
            None => Ok(None),
        }
    }
}

/// The archetype cell for a context (its slot-0 self-reference).
pub fn archetype(heap: &Heap, id: ContextId) -> Result<Cell, HeapFault> {
    let context = heap.context(id)?;
    Ok(heap.array_cell(context.varlist, 0)?.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Heap;

    fn heap() -> Heap {
        Heap::with_defaults()
    }

    #[test]
    fn archetype_self_references() {
        let mut h = heap();
        let ctx = h.make_context(ContextKind::Object, 4).unwrap();
        let arch = archetype(&h, ctx).unwrap();
        assert_eq!(arch.kind(), Kind::Object);
        assert_eq!(arch.as_context(), Some(ctx));
    }

    #[test]
    fn append_and_find() {
        let mut h = heap();
        let ctx = h.make_context(ContextKind::Object, 4).unwrap();
        let sym = h.symbols.intern("alpha");
        let index = h.context_append(ctx, sym, Cell::integer(10)).unwrap();
        assert_eq!(index, 1);
        assert_eq!(h.context_find(ctx, sym, true).unwrap(), Some(1));
        assert_eq!(h.context_var(ctx, 1).unwrap().as_integer(), Some(10));
        let upper = h.symbols.intern("ALPHA");
        assert_eq!(h.context_find(ctx, upper, false).unwrap(), Some(1));
        assert_eq!(h.context_find(ctx, upper, true).unwrap(), None);
    }

    #[test]
    fn shared_keylist_copies_on_divergence() {
        let mut h = heap();
        let a = h.make_context(ContextKind::Object, 2).unwrap();
        let sym = h.symbols.intern("x");
        h.context_append(a, sym, Cell::integer(1)).unwrap();
        let b = h.context_clone_shape(a, ContextKind::Object).unwrap();
        assert!(h.contexts_share_keylist(a, b).unwrap());
        let extra = h.symbols.intern("y");
        h.context_append(b, extra, Cell::integer(2)).unwrap();
        assert!(!h.contexts_share_keylist(a, b).unwrap());
        // The original is untouched by the divergent append.
        assert_eq!(h.context_len(a).unwrap(), 1);
        assert_eq!(h.context_len(b).unwrap(), 2);
    }

    #[test]
    fn hidden_keys_do_not_match() {
        let mut h = heap();
        let ctx = h.make_context(ContextKind::Object, 2).unwrap();
        let sym = h.symbols.intern("secret");
        h.context_append(ctx, sym, Cell::integer(5)).unwrap();
        *h.context_key_flags_mut(ctx, 1).unwrap() = KeyFlags::HIDDEN | KeyFlags::UNBINDABLE;
        assert_eq!(h.context_find(ctx, sym, true).unwrap(), None);
        assert!(!h.context_verify(ctx, sym, 1).unwrap());
    }

    #[test]
    fn module_vars_ride_symbol_hitches() {
        let mut h = heap();
        let module = h.make_context(ContextKind::Module, 0).unwrap();
        let sym = h.symbols.intern("config");
        h.module_write(module, sym, Cell::integer(7)).unwrap();
        assert_eq!(h.module_read(module, sym).unwrap().as_integer(), Some(7));
        // Another module sees its own variable, not this one.
        let other = h.make_context(ContextKind::Module, 0).unwrap();
        assert!(h.module_read(other, sym).is_none());
    }

    #[test]
    fn frozen_module_refuses_auto_create() {
        let mut h = heap();
        let module = h.make_context(ContextKind::Module, 0).unwrap();
        let varlist = h.context(module).unwrap().varlist;
        h.freeze_shallow(varlist).unwrap();
        let sym = h.symbols.intern("newvar");
        assert!(matches!(
            h.module_var_ensure(module, sym),
            Err(HeapFault::LockedSeries)
        ));
    }

    #[test]
    fn let_patch_overlays_resolve() {
        let mut h = heap();
        let sym = h.symbols.intern("loopvar");
        let patch = h
            .make_let_patch(sym, Cell::integer(3), Specifier::Specified)
            .unwrap();
        let (ctx, index) = h.patch_find(patch, sym).unwrap().unwrap();
        assert_eq!(h.context_var(ctx, index).unwrap().as_integer(), Some(3));
        let miss = h.symbols.intern("other");
        assert!(h.patch_find(patch, miss).unwrap().is_none());
    }
}
