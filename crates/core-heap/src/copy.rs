//! Copying cells and arrays, shallowly or deeply by type mask.

use core_value::{Cell, Payload, SeriesId, TypeSet};

use crate::series::SeriesFlags;
use crate::{Heap, HeapFault};

impl Heap {
    /// Shallow copy of an array's cells from `index` to tail into a new
    /// series.
    pub fn copy_array_shallow(
        &mut self,
        source: SeriesId,
        index: usize,
        flags: SeriesFlags,
    ) -> Result<SeriesId, HeapFault> {
        let cells: Vec<Cell> = self
            .array_view(source)?
            .get(index..)
            .ok_or(HeapFault::PastEnd)?
            .to_vec();
        let copy = self.make_array(cells.len(), flags)?;
        for cell in cells {
            self.array_push(copy, cell)?;
        }
        Ok(copy)
    }

    /// Recursive copy: cells whose kind is in `types` get their series
    /// payloads copied too; everything else aliases the original. The
    /// clone is writable even when the source tree was deep-frozen.
    pub fn copy_array_deep(
        &mut self,
        source: SeriesId,
        index: usize,
        types: TypeSet,
        flags: SeriesFlags,
    ) -> Result<SeriesId, HeapFault> {
        let cells: Vec<Cell> = self
            .array_view(source)?
            .get(index..)
            .ok_or(HeapFault::PastEnd)?
            .to_vec();
        let copy = self.make_array(cells.len(), flags)?;
        for cell in cells {
            let cloned = self.clonify(cell, types, flags)?;
            self.array_push(copy, cloned)?;
        }
        Ok(copy)
    }

    /// Clone one cell under the type mask.
    pub fn clonify(
        &mut self,
        cell: Cell,
        types: TypeSet,
        flags: SeriesFlags,
    ) -> Result<Cell, HeapFault> {
        if !types.has(cell.heart()) {
            return Ok(cell);
        }
        match cell.payload() {
            Payload::Array { series, index, .. } => {
                let kind = cell.kind();
                let (series, index) = (*series, *index);
                let copied = self.copy_array_deep(series, index as usize, types, flags)?;
                let mut out = Cell::array(kind, copied);
                out.set_array_binding(match cell.payload() {
                    Payload::Array { binding, .. } => *binding,
                    _ => unreachable!(),
                });
                Ok(out)
            }
            Payload::Text { series, index } => {
                let text = self.text_str(*series)?[*index as usize..].to_string();
                let copied = self.make_text(&text, flags)?;
                Ok(Cell::text(copied))
            }
            _ => Ok(cell),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_value::{Kind, typesets};

    #[test]
    fn deep_copy_detaches_nested_arrays() {
        let mut h = Heap::with_defaults();
        let inner = h.make_array(2, SeriesFlags::empty()).unwrap();
        h.array_push(inner, Cell::integer(1)).unwrap();
        let outer = h.make_array(2, SeriesFlags::empty()).unwrap();
        h.array_push(outer, Cell::array(Kind::Block, inner)).unwrap();

        let copy = h
            .copy_array_deep(outer, 0, typesets::ANY_ARRAY, SeriesFlags::empty())
            .unwrap();
        let copied_inner = match h.array_cell(copy, 0).unwrap().as_array() {
            Some((id, _, _)) => id,
            None => panic!("expected nested block"),
        };
        assert_ne!(copied_inner, inner);
        h.array_push(copied_inner, Cell::integer(2)).unwrap();
        assert_eq!(h.array_len(inner).unwrap(), 1, "original untouched");
    }

    #[test]
    fn shallow_copy_aliases_nested_arrays() {
        let mut h = Heap::with_defaults();
        let inner = h.make_array(2, SeriesFlags::empty()).unwrap();
        let outer = h.make_array(2, SeriesFlags::empty()).unwrap();
        h.array_push(outer, Cell::array(Kind::Block, inner)).unwrap();
        let copy = h.copy_array_shallow(outer, 0, SeriesFlags::empty()).unwrap();
        let aliased = h.array_cell(copy, 0).unwrap().as_array().unwrap().0;
        assert_eq!(aliased, inner);
    }

    #[test]
    fn deep_copy_of_frozen_tree_is_writable() {
        let mut h = Heap::with_defaults();
        let outer = h.make_array(2, SeriesFlags::empty()).unwrap();
        h.array_push(outer, Cell::integer(1)).unwrap();
        h.freeze_deep(outer).unwrap();
        let copy = h
            .copy_array_deep(outer, 0, typesets::ANY_ARRAY, SeriesFlags::empty())
            .unwrap();
        assert!(h.array_push(copy, Cell::integer(2)).is_ok());
    }
}
