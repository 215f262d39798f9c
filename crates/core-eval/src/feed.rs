//! Feeds: the lazy input stream the evaluator consumes.
//!
//! A feed walks an array one cell at a time under a specifier. It
//! remembers the most recently fetched value (`lookback`) for
//! diagnostics, and reports the current file/line window for error
//! "near" construction.

use bitflags::bitflags;
use core_heap::Heap;
use core_value::{Cell, SeriesId, Specifier};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeedFlags: u16 {
        /// A comma was hit; the expression may not continue across it.
        const BARRIER_HIT = 1 << 0;
    }
}

#[derive(Debug, Clone)]
pub struct Feed {
    pub array: SeriesId,
    pub index: u32,
    pub specifier: Specifier,
    pub flags: FeedFlags,
    /// The value most recently fetched, for error reporting.
    pub lookback: Option<Cell>,
}

impl Feed {
    pub fn new(array: SeriesId, index: u32, specifier: Specifier) -> Self {
        Feed {
            array,
            index,
            specifier,
            flags: FeedFlags::empty(),
            lookback: None,
        }
    }

    /// An exhausted feed over an empty array; used by dispatch-only
    /// levels that gather no arguments.
    pub fn exhausted(empty_array: SeriesId) -> Self {
        Feed::new(empty_array, 0, Specifier::Specified)
    }

    /// Peek the pending cell without advancing.
    pub fn peek<'h>(&self, heap: &'h Heap) -> Option<&'h Cell> {
        let cell = heap.array_cell(self.array, self.index as usize).ok()?;
        if cell.is_end() { None } else { Some(cell) }
    }

    /// Fetch the pending cell and advance past it.
    pub fn fetch(&mut self, heap: &Heap) -> Option<Cell> {
        let cell = self.peek(heap)?.clone();
        self.index += 1;
        self.lookback = Some(cell.clone());
        Some(cell)
    }

    /// The source neighborhood around the cursor, for error "near".
    pub fn near_window(&self, heap: &Heap, span: usize) -> Vec<Cell> {
        let len = match heap.array_len(self.array) {
            Ok(len) => len,
            Err(_) => return Vec::new(),
        };
        let at = (self.index as usize).min(len);
        let start = at.saturating_sub(span);
        let end = (at + span).min(len);
        match heap.array_view(self.array) {
            Ok(cells) => cells[start..end].to_vec(),
            Err(_) => Vec::new(),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use core_heap::SeriesFlags;

    #[test]
    fn fetch_advances_and_records_lookback() {
        let mut h = Heap::with_defaults();
        let array = h.make_array(4, SeriesFlags::MANAGED).unwrap();
        h.array_push(array, Cell::integer(1)).unwrap();
        h.array_push(array, Cell::integer(2)).unwrap();
        let mut feed = Feed::new(array, 0, Specifier::Specified);
        assert_eq!(feed.peek(&h).unwrap().as_integer(), Some(1));
        assert_eq!(feed.fetch(&h).unwrap().as_integer(), Some(1));
        assert_eq!(feed.lookback.as_ref().unwrap().as_integer(), Some(1));
        assert_eq!(feed.fetch(&h).unwrap().as_integer(), Some(2));
        assert!(feed.fetch(&h).is_none());
        assert!(feed.peek(&h).is_none());
    }

    #[test]
    fn near_window_clamps_to_bounds() {
        let mut h = Heap::with_defaults();
        let array = h.make_array(4, SeriesFlags::MANAGED).unwrap();
        for n in 0..4 {
            h.array_push(array, Cell::integer(n)).unwrap();
        }
        let mut feed = Feed::new(array, 0, Specifier::Specified);
        feed.fetch(&h);
        let window = feed.near_window(&h, 3);
        assert_eq!(window.len(), 4);
    }
}
