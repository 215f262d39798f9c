//! Value and variable natives: get/set, series editing, protection,
//! molding, traps, and MAKE.

use std::io::Write;

use core_value::{Cell, CellFlags, Kind, Payload, Specifier, typesets};

use crate::error::ErrId;
use crate::lookup::VarLocation;
use crate::machine::Machine;
use crate::raise::{Bounce, Raise};

pub(crate) fn native_set(m: &mut Machine) -> Result<Bounce, Raise> {
    let target = m.arg(1);
    let value = m.arg(2);
    m.set_var(&target, Specifier::Specified, value.clone(), None)?;
    m.out_done(value)
}

pub(crate) fn native_get(m: &mut Machine) -> Result<Bounce, Raise> {
    let source = m.arg(1);
    let (value, _) = m.get_var(&source, Specifier::Specified)?;
    m.out_done(value)
}

pub(crate) fn native_the(m: &mut Machine) -> Result<Bounce, Raise> {
    let mut value = m.arg(1);
    value.clear_flag(CellFlags::UNEVALUATED);
    m.out_done(value)
}

/// Splice a fresh variable onto the caller's feed specifier; the rest
/// of that feed sees the new name.
pub(crate) fn native_let(m: &mut Machine) -> Result<Bounce, Raise> {
    let target = m.arg(1);
    let value = m.arg(2);
    let Some(symbol) = target.word_symbol() else {
        return Err(m.fail(ErrId::InvalidArg, &[target]));
    };
    let initial = if value.kind() == Kind::Null && target.kind() != Kind::SetWord {
        Cell::trash()
    } else {
        value.clone()
    };

    // The native's own level sits above the feed the LET belongs to.
    let depth = m.depth();
    if depth < 2 {
        return Err(m.fail(ErrId::InvalidArg, &[target]));
    }
    let next = m.levels[depth - 2].feed.specifier;
    let patch = m
        .heap
        .make_let_patch(symbol, initial, next)
        .map_err(|fault| m.fault(fault))?;
    m.levels[depth - 2].feed.specifier = Specifier::Patch(patch);
    m.out_done(value)
}

pub(crate) fn native_copy(m: &mut Machine) -> Result<Bounce, Raise> {
    let value = m.arg(1);
    let deep = m.arg(2).truthiness() == Some(true);
    let copied = match value.payload() {
        Payload::Array { series, index, .. } => {
            let (series, index) = (*series, *index);
            let result = if deep {
                m.heap.copy_array_deep(
                    series,
                    index as usize,
                    typesets::ANY_ARRAY,
                    core_heap::SeriesFlags::MANAGED,
                )
            } else {
                m.heap
                    .copy_array_shallow(series, index as usize, core_heap::SeriesFlags::MANAGED)
            };
            match result {
                Ok(copy) => Cell::array(value.kind(), copy),
                Err(fault) => return Err(m.fault(fault)),
            }
        }
        Payload::Text { series, index } => {
            let text = match m.heap.text_str(*series) {
                Ok(text) => text.get(*index as usize..).unwrap_or("").to_string(),
                Err(fault) => return Err(m.fault(fault)),
            };
            match m.heap.make_text(&text, core_heap::SeriesFlags::MANAGED) {
                Ok(copy) => Cell::text(copy),
                Err(fault) => return Err(m.fault(fault)),
            }
        }
        _ => value.clone(),
    };
    m.out_done(copied)
}

/// Value-level constness: read-only through this reference, without
/// freezing the series other references see.
pub(crate) fn native_const(m: &mut Machine) -> Result<Bounce, Raise> {
    let mut value = m.arg(1);
    value.set_flag(CellFlags::CONST);
    value.clear_flag(CellFlags::EXPLICITLY_MUTABLE);
    m.out_done(value)
}

pub(crate) fn native_mutable(m: &mut Machine) -> Result<Bounce, Raise> {
    let mut value = m.arg(1);
    value.clear_flag(CellFlags::CONST);
    value.set_flag(CellFlags::EXPLICITLY_MUTABLE);
    m.out_done(value)
}

fn ensure_reference_mutable(m: &mut Machine, series_value: &Cell) -> Result<(), Raise> {
    if series_value.has_flag(CellFlags::CONST)
        && !series_value.has_flag(CellFlags::EXPLICITLY_MUTABLE)
    {
        return Err(m.fail(ErrId::LockedSeries, &[]));
    }
    Ok(())
}

pub(crate) fn native_append(m: &mut Machine) -> Result<Bounce, Raise> {
    let series_value = m.arg(1);
    let value = m.arg(2);
    ensure_reference_mutable(m, &series_value)?;
    let dup = m.arg(3).truthiness() == Some(true);
    let count = if dup {
        m.arg(4).as_integer().unwrap_or(1).max(0)
    } else {
        1
    };
    for _ in 0..count {
        match series_value.payload() {
            Payload::Array { series, .. } => {
                if let Err(fault) = m.heap.array_push(*series, value.clone()) {
                    return Err(m.fault(fault));
                }
            }
            Payload::Text { series, .. } => {
                let appended = m.form(&value);
                if let Err(fault) = m.heap.text_append_str(*series, &appended) {
                    return Err(m.fault(fault));
                }
            }
            _ => return Err(m.fail(ErrId::InvalidArg, &[series_value.clone()])),
        }
    }
    m.out_done(series_value)
}

pub(crate) fn native_insert(m: &mut Machine) -> Result<Bounce, Raise> {
    let series_value = m.arg(1);
    let value = m.arg(2);
    ensure_reference_mutable(m, &series_value)?;
    match series_value.payload() {
        Payload::Array { series, index, .. } => {
            if let Err(fault) = m.heap.array_insert(*series, *index as usize, value) {
                return Err(m.fault(fault));
            }
        }
        Payload::Text { series, .. } => {
            let inserted = m.form(&value);
            let existing = match m.heap.text_str(*series) {
                Ok(text) => text.to_string(),
                Err(fault) => return Err(m.fault(fault)),
            };
            let combined = format!("{inserted}{existing}");
            let series = *series;
            if let Err(fault) = m
                .heap
                .remake_series(series, combined.len(), false)
                .and_then(|_| m.heap.bytes_append(series, combined.as_bytes()))
            {
                return Err(m.fault(fault));
            }
        }
        _ => return Err(m.fail(ErrId::InvalidArg, &[series_value.clone()])),
    }
    m.out_done(series_value)
}

pub(crate) fn native_pick(m: &mut Machine) -> Result<Bounce, Raise> {
    let series_value = m.arg(1);
    let index = m.arg(2).as_integer().unwrap_or(0);
    let Some((series, base, _)) = series_value.as_array() else {
        return Err(m.fail(ErrId::InvalidArg, &[series_value]));
    };
    if index < 1 {
        return m.out_done(Cell::null());
    }
    let at = base as usize + (index - 1) as usize;
    match m.heap.array_cell(series, at) {
        Ok(cell) if !cell.is_end() => {
            let picked = cell.clone();
            m.out_done(picked)
        }
        Ok(_) => m.out_done(Cell::null()),
        Err(_) => m.out_done(Cell::null()),
    }
}

pub(crate) fn native_first(m: &mut Machine) -> Result<Bounce, Raise> {
    let series_value = m.arg(1);
    let Some((series, base, _)) = series_value.as_array() else {
        return Err(m.fail(ErrId::InvalidArg, &[series_value]));
    };
    match m.heap.array_cell(series, base as usize) {
        Ok(cell) if !cell.is_end() => {
            let picked = cell.clone();
            m.out_done(picked)
        }
        Ok(_) => m.out_done(Cell::null()),
        Err(fault) => Err(m.fault(fault)),
    }
}

pub(crate) fn native_length_of(m: &mut Machine) -> Result<Bounce, Raise> {
    let series_value = m.arg(1);
    let length = match series_value.payload() {
        Payload::Array { series, index, .. } => m
            .heap
            .array_len(*series)
            .map(|len| len.saturating_sub(*index as usize)),
        Payload::Text { series, index } => m
            .heap
            .text_str(*series)
            .map(|text| text.len().saturating_sub(*index as usize)),
        _ => return Err(m.fail(ErrId::InvalidArg, &[series_value])),
    };
    match length {
        Ok(length) => m.out_done(Cell::integer(length as i64)),
        Err(fault) => Err(m.fault(fault)),
    }
}

pub(crate) fn native_protect(m: &mut Machine) -> Result<Bounce, Raise> {
    let target = m.arg(1);
    let deep = m.arg(2).truthiness() == Some(true);
    match target.kind() {
        Kind::Word => {
            let location = m.locate_word(&target, Specifier::Specified, false)?;
            let mut value = m.read_location(location)?;
            value.set_flag(CellFlags::PROTECTED);
            protect_slot_write(m, location, value)?;
        }
        _ => {
            let Some((series, _, _)) = target.as_array().or_else(|| {
                target.as_text().map(|(s, i)| (s, i, core_value::Binding::Unbound))
            }) else {
                return Err(m.fail(ErrId::InvalidArg, &[target]));
            };
            let result = if deep {
                m.heap.freeze_deep(series)
            } else {
                m.heap.freeze_shallow(series)
            };
            if let Err(fault) = result {
                return Err(m.fault(fault));
            }
        }
    }
    m.out_done(target)
}

pub(crate) fn native_unprotect(m: &mut Machine) -> Result<Bounce, Raise> {
    let target = m.arg(1);
    let deep = m.arg(2).truthiness() == Some(true);
    match target.kind() {
        Kind::Word => {
            let location = m.locate_word(&target, Specifier::Specified, false)?;
            let mut value = m.read_location(location)?;
            value.clear_flag(CellFlags::PROTECTED);
            protect_slot_write(m, location, value)?;
        }
        _ => {
            let Some((series, _, _)) = target.as_array().or_else(|| {
                target.as_text().map(|(s, i)| (s, i, core_value::Binding::Unbound))
            }) else {
                return Err(m.fail(ErrId::InvalidArg, &[target]));
            };
            if let Err(fault) = m.heap.unfreeze(series, deep) {
                return Err(m.fault(fault));
            }
        }
    }
    m.out_done(target)
}

/// Write a slot regardless of its current protection bit (that bit is
/// exactly what we are toggling).
fn protect_slot_write(
    m: &mut Machine,
    location: VarLocation,
    value: Cell,
) -> Result<(), Raise> {
    let result = match location {
        VarLocation::Slot { ctx, index } => {
            let varlist = match m.heap.context(ctx) {
                Ok(context) => context.varlist,
                Err(fault) => return Err(m.fault(fault)),
            };
            m.heap.array_set(varlist, index, value)
        }
        VarLocation::ModuleVar { var } => m.heap.array_set(var, 0, value),
    };
    result.map_err(|fault| m.fault(fault))
}

pub(crate) fn native_mold(m: &mut Machine) -> Result<Bounce, Raise> {
    let value = m.arg(1);
    let molded = m.mold(&value);
    match m.heap.make_text(&molded, core_heap::SeriesFlags::MANAGED) {
        Ok(series) => m.out_done(Cell::text(series)),
        Err(fault) => Err(m.fault(fault)),
    }
}

pub(crate) fn native_form(m: &mut Machine) -> Result<Bounce, Raise> {
    let value = m.arg(1);
    let formed = m.form(&value);
    match m.heap.make_text(&formed, core_heap::SeriesFlags::MANAGED) {
        Ok(series) => m.out_done(Cell::text(series)),
        Err(fault) => Err(m.fault(fault)),
    }
}

pub(crate) fn native_print(m: &mut Machine) -> Result<Bounce, Raise> {
    let value = m.arg(1);
    let formed = m.form(&value);
    let _ = writeln!(m.sink, "{formed}");
    m.out_done(Cell::trash())
}

pub(crate) fn native_type_of(m: &mut Machine) -> Result<Bounce, Raise> {
    let value = m.arg(1);
    let word = m.word_cell(value.heart().name());
    m.out_done(word)
}

pub(crate) fn native_error_q(m: &mut Machine) -> Result<Bounce, Raise> {
    let value = m.arg(1);
    m.out_done(Cell::logic(value.kind() == Kind::Error))
}

pub(crate) fn native_trap(m: &mut Machine) -> Result<Bounce, Raise> {
    let block = m.arg(1);
    let result = m.with_trap(false, |m| {
        let atom = m.eval_block_cell(&block, Specifier::Specified)?;
        m.decay_cell(atom)
    })?;
    match result {
        Ok(value) => m.out_done(value),
        Err(error) => m.out_done(Cell::context(Kind::Error, error)),
    }
}

pub(crate) fn native_attempt(m: &mut Machine) -> Result<Bounce, Raise> {
    let block = m.arg(1);
    let result = m.with_trap(false, |m| {
        let atom = m.eval_block_cell(&block, Specifier::Specified)?;
        m.decay_cell(atom)
    })?;
    match result {
        Ok(value) => m.out_done(value),
        Err(_) => m.out_done(Cell::null()),
    }
}

pub(crate) fn native_make(m: &mut Machine) -> Result<Bounce, Raise> {
    let type_word = m.arg(1);
    let def = m.arg(2);
    let Some(symbol) = type_word.word_symbol() else {
        return Err(m.fail(ErrId::InvalidArg, &[type_word]));
    };
    let spelling = m.heap.symbols.text(symbol).to_lowercase();
    match spelling.as_str() {
        "frame!" => {
            let frame = m.make_frame_for_action(&def)?;
            m.out_done(frame)
        }
        "object!" => {
            let object = m.make_object_from_block(&def)?;
            m.out_done(object)
        }
        "error!" => {
            let message = match def.kind() {
                Kind::Text => def,
                _ => {
                    let formed = m.form(&def);
                    match m.heap.make_text(&formed, core_heap::SeriesFlags::MANAGED) {
                        Ok(series) => Cell::text(series),
                        Err(fault) => return Err(m.fault(fault)),
                    }
                }
            };
            let error = m.make_error(ErrId::User, &[message]);
            m.out_done(Cell::context(Kind::Error, error))
        }
        _ => Err(m.fail(ErrId::InvalidArg, &[type_word])),
    }
}

/// `left >> 'name` — explicit enfix staging at an arbitrary callsite:
/// move the left value into out and fulfill the named action as if the
/// variable had been enfix.
pub(crate) fn native_shove(m: &mut Machine) -> Result<Bounce, Raise> {
    let left = m.arg(1);
    let right = m.arg(2);
    let (value, _) = m.get_var(&right, Specifier::Specified)?;
    if !value.is_action() {
        return Err(m.fail(ErrId::NotAnAction, &[right]));
    }
    // Stage into the *caller's* out and run the invocation there, so
    // remaining arguments come from the caller's feed.
    let depth = m.depth();
    if depth < 2 {
        return Err(m.fail(ErrId::InvalidArg, &[right]));
    }
    m.levels[depth - 2].out = left;
    let label = right.word_symbol();
    let result = m.invoke_in_caller(&value, label)?;
    m.out_done(result)
}

impl Machine {
    /// Build an object: collect the block's set-words as keys, then run
    /// the block with the new context overlaid so assignments land in
    /// it.
    pub(crate) fn make_object_from_block(&mut self, block: &Cell) -> Result<Cell, Raise> {
        let Some((series, index, _)) = block.as_array() else {
            return Err(self.fail(ErrId::InvalidArg, &[block.clone()]));
        };
        let ctx = self
            .heap
            .make_context(core_heap::ContextKind::Object, 4)
            .map_err(|fault| self.fault(fault))?;
        let view = match self.heap.array_view(series) {
            Ok(view) => view,
            Err(fault) => return Err(self.fault(fault)),
        };
        let cells: Vec<Cell> = view
            .get(index as usize..)
            .map(|s| s.to_vec())
            .unwrap_or_default();
        for cell in &cells {
            if cell.kind() == Kind::SetWord {
                let symbol = cell.word_symbol().expect("set-word");
                let exists = self
                    .heap
                    .context_find(ctx, symbol, false)
                    .map_err(|fault| self.fault(fault))?;
                if exists.is_none() {
                    self.heap
                        .context_append(ctx, symbol, Cell::trash())
                        .map_err(|fault| self.fault(fault))?;
                }
            }
        }
        self.heap
            .manage_context(ctx)
            .map_err(|fault| self.fault(fault))?;
        self.eval_block_cell(block, Specifier::Context(ctx))?;
        Ok(Cell::context(Kind::Object, ctx))
    }

    /// Invoke an action as if it appeared at the caller's position,
    /// with enfix staging already set up in the caller's out.
    pub(crate) fn invoke_in_caller(
        &mut self,
        action_value: &Cell,
        label: Option<core_value::SymbolId>,
    ) -> Result<Cell, Raise> {
        let native_level = self.pop_level();
        let result = self.invoke_action(action_value, label, true, None);
        let out = self.top_ref().out.clone();
        self.levels.push(native_level);
        result.map(|_| out)
    }
}
