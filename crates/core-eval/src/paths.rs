//! Path, get-path, and set-path resolution.
//!
//! A path is resolved component by component against the value of its
//! head. When the head looks up to an action, the remaining segments
//! are refinements: they push onto the data stack in path order and
//! the invocation picks them up in that priority. A get-path over an
//! action does the same pushes but produces a *specialization* instead
//! of invoking. Over data values (contexts, arrays), segments select.

use core_value::{Cell, Kind, Specifier, SymbolId};

use crate::error::ErrId;
use crate::machine::Machine;
use crate::raise::Raise;
use crate::step::Step;

enum PathHead {
    Action { value: Cell, label: Option<SymbolId> },
    Data(Cell),
}

impl Machine {
    fn path_segments(&mut self, cell: &Cell) -> Result<Vec<Cell>, Raise> {
        let Some((series, index, _)) = cell.as_array() else {
            return Err(self.fail(ErrId::BadPath, &[cell.clone()]));
        };
        match self.heap.array_view(series) {
            Ok(cells) => Ok(cells
                .get(index as usize..)
                .map(|s| s.to_vec())
                .unwrap_or_default()),
            Err(fault) => Err(self.fault(fault)),
        }
    }

    fn path_head(
        &mut self,
        segments: &[Cell],
        specifier: Specifier,
    ) -> Result<PathHead, Raise> {
        let Some(head) = segments.first() else {
            return Err(self.fail(ErrId::BadPath, &[]));
        };
        if head.kind() != Kind::Word {
            return Err(self.fail(ErrId::BadPath, &[head.clone()]));
        }
        let (value, _) = self.get_var(head, specifier)?;
        if value.is_action() {
            Ok(PathHead::Action {
                value,
                label: head.word_symbol(),
            })
        } else {
            Ok(PathHead::Data(value))
        }
    }

    /// Select one step into a data value.
    fn path_pick(&mut self, base: &Cell, segment: &Cell) -> Result<Cell, Raise> {
        match (base.kind(), segment.kind()) {
            (kind, Kind::Word) if kind.is_context() => {
                let ctx = base.as_context().expect("context kind");
                let symbol = segment.word_symbol().expect("word segment");
                if self.heap.context(ctx).ok().map(|c| c.kind)
                    == Some(core_heap::ContextKind::Module)
                {
                    return match self.heap.module_read(ctx, symbol) {
                        Some(cell) => Ok(cell.clone()),
                        None => Err(self.fail(ErrId::BadPath, &[segment.clone()])),
                    };
                }
                let index = match self.heap.context_find(ctx, symbol, false) {
                    Ok(Some(index)) => index,
                    Ok(None) => return Err(self.fail(ErrId::BadPath, &[segment.clone()])),
                    Err(fault) => return Err(self.fault(fault)),
                };
                match self.heap.context_var(ctx, index) {
                    Ok(cell) => Ok(cell.clone()),
                    Err(fault) => Err(self.fault(fault)),
                }
            }
            (kind, Kind::Integer) if kind.is_array() => {
                let (series, index, _) = base.as_array().expect("array kind");
                let pick = segment.as_integer().expect("integer segment");
                if pick < 1 {
                    return Err(self.fail(ErrId::PastEnd, &[segment.clone()]));
                }
                let at = index as usize + (pick - 1) as usize;
                match self.heap.array_cell(series, at) {
                    Ok(cell) if !cell.is_end() => Ok(cell.clone()),
                    Ok(_) => Ok(Cell::null()),
                    Err(fault) => Err(self.fault(fault)),
                }
            }
            _ => Err(self.fail(ErrId::BadPath, &[segment.clone()])),
        }
    }

    /// `foo/ref/ref args...` — refinement invocation or data selection.
    pub(crate) fn eval_path(&mut self, cell: &Cell, specifier: Specifier) -> Result<(), Raise> {
        let segments = self.path_segments(cell)?;
        match self.path_head(&segments, specifier)? {
            PathHead::Action { value, label } => {
                let base = self.heap.ds_depth();
                for segment in &segments[1..] {
                    let Some(symbol) = segment.word_symbol() else {
                        return Err(self.fail(ErrId::BadRefinement, &[segment.clone()]));
                    };
                    self.heap.ds_push(Cell::word(Kind::Refinement, symbol));
                }
                self.invoke_action(&value, label, false, Some(base))
            }
            PathHead::Data(mut value) => {
                for segment in &segments[1..] {
                    value = self.path_pick(&value, segment)?;
                }
                if value.is_action() {
                    // A selected method invokes like a plain word would.
                    let label = segments.last().and_then(|s| s.word_symbol());
                    self.invoke_action(&value, label, false, None)
                } else {
                    self.set_out(value);
                    Ok(())
                }
            }
        }
    }

    /// `:foo/ref/ref` — partial specialization without invocation, or
    /// plain selection on data.
    pub(crate) fn eval_get_path(
        &mut self,
        cell: &Cell,
        specifier: Specifier,
    ) -> Result<(), Raise> {
        let segments = self.path_segments(cell)?;
        match self.path_head(&segments, specifier)? {
            PathHead::Action { value, label } => {
                let mut refinements = Vec::new();
                for segment in &segments[1..] {
                    let Some(symbol) = segment.word_symbol() else {
                        return Err(self.fail(ErrId::BadRefinement, &[segment.clone()]));
                    };
                    refinements.push(symbol);
                }
                let specialized = self.specialize_partials(&value, &refinements, label)?;
                self.set_out(specialized);
                Ok(())
            }
            PathHead::Data(mut value) => {
                for segment in &segments[1..] {
                    value = self.path_pick(&value, segment)?;
                }
                self.set_out(value);
                Ok(())
            }
        }
    }

    /// `obj/field: value`, `block/2: value`.
    pub(crate) fn eval_set_path(
        &mut self,
        cell: &Cell,
        specifier: Specifier,
    ) -> Result<(), Raise> {
        let segments = self.path_segments(cell)?;
        if segments.len() < 2 {
            return Err(self.fail(ErrId::BadPath, &[cell.clone()]));
        }

        // Right-hand side evaluates first.
        match self.eval_step()? {
            Step::Done => {}
            Step::End => return Err(self.fail(ErrId::NeedsValue, &[cell.clone()])),
        }
        let out = self.top_ref().out.clone();
        let value = self.decay_cell(out)?;

        let PathHead::Data(mut base) = self.path_head(&segments, specifier)? else {
            return Err(self.fail(ErrId::BadPath, &[cell.clone()]));
        };
        for segment in &segments[1..segments.len() - 1] {
            base = self.path_pick(&base, segment)?;
        }
        let last = segments.last().expect("length checked");
        match (base.kind(), last.kind()) {
            (kind, Kind::Word) if kind.is_context() => {
                let ctx = base.as_context().expect("context kind");
                let symbol = last.word_symbol().expect("word segment");
                if self.heap.context(ctx).ok().map(|c| c.kind)
                    == Some(core_heap::ContextKind::Module)
                {
                    if let Err(fault) = self.heap.module_write(ctx, symbol, value.clone()) {
                        return Err(self.fault(fault));
                    }
                } else {
                    let index = match self.heap.context_find(ctx, symbol, false) {
                        Ok(Some(index)) => index,
                        Ok(None) => return Err(self.fail(ErrId::BadPath, &[last.clone()])),
                        Err(fault) => return Err(self.fault(fault)),
                    };
                    if let Err(fault) = self.heap.context_var_set(ctx, index, value.clone()) {
                        return Err(self.fault(fault));
                    }
                }
            }
            (kind, Kind::Integer) if kind.is_array() => {
                let (series, index, _) = base.as_array().expect("array kind");
                let pick = last.as_integer().expect("integer segment");
                if pick < 1 {
                    return Err(self.fail(ErrId::PastEnd, &[last.clone()]));
                }
                let at = index as usize + (pick - 1) as usize;
                if let Err(fault) = self.heap.array_set(series, at, value.clone()) {
                    return Err(self.fault(fault));
                }
            }
            _ => return Err(self.fail(ErrId::BadPath, &[last.clone()])),
        }
        self.set_out(value);
        Ok(())
    }
}
