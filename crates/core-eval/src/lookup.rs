//! Word resolution: `(word, specifier) -> variable`.
//!
//! Resolution is a pure walk — no global search order. The word's own
//! binding says where to start; the specifier chain supplies overlays
//! (LET patches, loop variables) and the frame that grounds relative
//! bindings. A cached index inside a word is never trusted blindly: the
//! keylist entry is verified to still carry the word's symbol, because
//! facades hide slots after the fact.
//!
//! Unbound words fall back to attachment: they resolve against the
//! machine's user module, and a set-word auto-creates its variable
//! there (a frozen module refuses).

use core_heap::HeapFault;
use core_value::{Binding, Cell, CellFlags, ContextId, Payload, SeriesId, Specifier, SymbolId};

use crate::error::ErrId;
use crate::machine::Machine;
use crate::raise::Raise;

/// Where a word's variable lives, once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarLocation {
    Slot { ctx: ContextId, index: usize },
    ModuleVar { var: SeriesId },
}

impl Machine {
    /// Walk the specifier chain looking for a by-name overlay match.
    fn specifier_find(
        &self,
        mut specifier: Specifier,
        symbol: SymbolId,
    ) -> Result<Option<VarLocation>, HeapFault> {
        loop {
            match specifier {
                Specifier::Specified => return Ok(None),
                Specifier::Patch(patch) => {
                    if let Some((ctx, index)) = self.heap.patch_find(patch, symbol)? {
                        return Ok(Some(VarLocation::Slot { ctx, index }));
                    }
                    specifier = self.heap.patch(patch)?.next;
                }
                Specifier::Context(ctx) => {
                    return Ok(match self.heap.context_find(ctx, symbol, false)? {
                        Some(index) => Some(VarLocation::Slot { ctx, index }),
                        None => None,
                    });
                }
            }
        }
    }

    /// Find the frame in the specifier chain whose phase grounds a
    /// relative binding to `action`.
    pub(crate) fn specifier_frame_for(
        &self,
        mut specifier: Specifier,
        action: core_value::ActionId,
    ) -> Result<Option<ContextId>, HeapFault> {
        let target = self.heap.action_core(action)?;
        loop {
            match specifier {
                Specifier::Specified => return Ok(None),
                Specifier::Patch(patch) => specifier = self.heap.patch(patch)?.next,
                Specifier::Context(ctx) => {
                    let context = self.heap.context(ctx)?;
                    match context.phase {
                        Some(phase) if self.heap.action_core(phase)? == target => {
                            return Ok(Some(ctx));
                        }
                        _ => return Ok(None),
                    }
                }
            }
        }
    }

    /// Resolve a word cell to its variable location.
    pub(crate) fn locate_word(
        &mut self,
        cell: &Cell,
        specifier: Specifier,
        for_write: bool,
    ) -> Result<VarLocation, Raise> {
        let Some((symbol, binding, index)) = cell.as_word() else {
            return Err(self.fail(ErrId::InvalidArg, &[cell.clone()]));
        };
        match binding {
            Binding::Unbound => {
                // Overlays can capture even unbound words (LET, loop
                // variables, object-construction scopes).
                match self.specifier_find(specifier, symbol) {
                    Ok(Some(location)) => return Ok(location),
                    Ok(None) => {}
                    Err(fault) => return Err(self.fault(fault)),
                }
                let lib = self.lib;
                if for_write {
                    match self.heap.module_var_ensure(lib, symbol) {
                        Ok(var) => Ok(VarLocation::ModuleVar { var }),
                        Err(fault) => Err(self.fault(fault)),
                    }
                } else {
                    match self.heap.module_var(lib, symbol) {
                        Some(var) => Ok(VarLocation::ModuleVar { var }),
                        None => Err(self.unbound_error(symbol)),
                    }
                }
            }
            Binding::Relative(action) => {
                match self.specifier_find(specifier, symbol) {
                    Ok(Some(location)) => return Ok(location),
                    Ok(None) => {}
                    Err(fault) => return Err(self.fault(fault)),
                }
                let frame = match self.specifier_frame_for(specifier, action) {
                    Ok(frame) => frame,
                    Err(fault) => return Err(self.fault(fault)),
                };
                let Some(ctx) = frame else {
                    return Err(self.unbound_error(symbol));
                };
                self.slot_in(ctx, symbol, index)
            }
            Binding::Specific(ctx) => self.slot_in(ctx, symbol, index),
            Binding::Sea(module) => {
                if for_write {
                    match self.heap.module_var_ensure(module, symbol) {
                        Ok(var) => Ok(VarLocation::ModuleVar { var }),
                        Err(fault) => Err(self.fault(fault)),
                    }
                } else {
                    match self.heap.module_var(module, symbol) {
                        Some(var) => Ok(VarLocation::ModuleVar { var }),
                        None => Err(self.unbound_error(symbol)),
                    }
                }
            }
            Binding::Let(patch) => {
                let chain = Specifier::Patch(patch);
                match self.specifier_find(chain, symbol) {
                    Ok(Some(location)) => Ok(location),
                    Ok(None) => Err(self.unbound_error(symbol)),
                    Err(fault) => Err(self.fault(fault)),
                }
            }
        }
    }

    /// Trust-but-verify a positional slot; fall back to a symbol search
    /// when the cached index lies (facade hid it, keylist diverged).
    fn slot_in(
        &mut self,
        ctx: ContextId,
        symbol: SymbolId,
        index: u32,
    ) -> Result<VarLocation, Raise> {
        let verified = match self.heap.context_verify(ctx, symbol, index as usize) {
            Ok(v) => v,
            Err(fault) => return Err(self.fault(fault)),
        };
        if verified {
            return Ok(VarLocation::Slot {
                ctx,
                index: index as usize,
            });
        }
        match self.heap.context_find(ctx, symbol, false) {
            Ok(Some(found)) => Ok(VarLocation::Slot { ctx, index: found }),
            Ok(None) => Err(self.unbound_error(symbol)),
            Err(fault) => Err(self.fault(fault)),
        }
    }

    fn unbound_error(&mut self, symbol: SymbolId) -> Raise {
        let word = Cell::word(core_value::Kind::Word, symbol);
        self.fail(ErrId::UnboundWord, &[word])
    }

    pub(crate) fn read_location(&mut self, location: VarLocation) -> Result<Cell, Raise> {
        let cell = match location {
            VarLocation::Slot { ctx, index } => self.heap.context_var(ctx, index).cloned(),
            VarLocation::ModuleVar { var } => self.heap.array_cell(var, 0).cloned(),
        };
        cell.map_err(|fault| self.fault(fault))
    }

    pub(crate) fn write_location(
        &mut self,
        location: VarLocation,
        value: Cell,
    ) -> Result<(), Raise> {
        let outcome = match location {
            VarLocation::Slot { ctx, index } => self.heap.context_var_set(ctx, index, value),
            VarLocation::ModuleVar { var } => {
                let slot = match self.heap.array_cell(var, 0) {
                    Ok(slot) => slot,
                    Err(fault) => return Err(self.fault(fault)),
                };
                if slot.has_flag(CellFlags::PROTECTED) {
                    Err(HeapFault::Protected)
                } else {
                    self.heap.array_set(var, 0, value)
                }
            }
        };
        outcome.map_err(|fault| self.fault(fault))
    }

    /// Read a word's value. Also reports whether the *variable slot*
    /// carries the enfix flag — dispatch style is a property of the
    /// variable, never of the action it holds.
    pub(crate) fn get_var(
        &mut self,
        cell: &Cell,
        specifier: Specifier,
    ) -> Result<(Cell, bool), Raise> {
        let location = self.locate_word(cell, specifier, false)?;
        let value = self.read_location(location)?;
        let enfix = value.has_flag(CellFlags::ENFIXED);
        if value.kind() == core_value::Kind::Trash {
            let symbol = cell.word_symbol().expect("word cell");
            return Err(self.unbound_error(symbol));
        }
        Ok((value, enfix))
    }

    /// Write a word's value. `enfix` of `Some` also rewrites the slot's
    /// dispatch style.
    pub(crate) fn set_var(
        &mut self,
        cell: &Cell,
        specifier: Specifier,
        mut value: Cell,
        enfix: Option<bool>,
    ) -> Result<(), Raise> {
        if let Some(enfix) = enfix {
            if enfix && !value.is_action() {
                return Err(self.fail(ErrId::NotAnAction, &[cell.clone()]));
            }
            if enfix {
                value.set_flag(CellFlags::ENFIXED);
            } else {
                value.clear_flag(CellFlags::ENFIXED);
            }
        }
        let location = self.locate_word(cell, specifier, true)?;
        self.write_location(location, value)
    }

    /// Convert a relative cell fetched under `specifier` into a specific
    /// one that can outlive the feed.
    pub(crate) fn derelativize(&self, mut cell: Cell, specifier: Specifier) -> Cell {
        match cell.payload() {
            Payload::Word {
                binding: Binding::Relative(action),
                ..
            } => {
                let action = *action;
                if let Ok(Some(ctx)) = self.specifier_frame_for(specifier, action) {
                    let index = match cell.payload() {
                        Payload::Word { index, .. } => *index,
                        _ => 0,
                    };
                    cell.update_word_binding(Binding::Specific(ctx), index);
                }
                cell
            }
            Payload::Array {
                binding: Binding::Unbound,
                ..
            } => {
                if !specifier.is_specified() {
                    cell.set_array_binding(Binding::from_specifier(specifier));
                }
                cell
            }
            _ => cell,
        }
    }
}
