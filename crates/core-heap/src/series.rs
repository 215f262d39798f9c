//! Series: resizable buffers with a persistent header node.
//!
//! A series header lives in the heap's slot arena for as long as anything
//! references it, even after its data is released (`decay` leaves an
//! INACCESSIBLE husk so stale references fault instead of dangling).
//! Content starts inline when it fits (two cell slots, or a small byte
//! run) and moves to a pooled dynamic block on growth.
//!
//! Dynamic content carries `bias` (unused head slack), `len` (valid
//! elements), and `rest` (total usable capacity). Head insertion eats
//! bias before shifting; removal from the head donates slack back to
//! bias, so queue-like usage stays O(1) per element.
//!
//! Arrays present an implicit end: reading index `len` yields a marker
//! cell that says "end of sequence" but is not writable. A dynamic array
//! keeps the slot after its last element stamped as that marker, so a
//! capacity-N request reserves one extra slot for the stamp.

use bitflags::bitflags;
use core_value::{Cell, SeriesId, SymbolId};

use crate::pool::BIG_UNIT;
use crate::{Heap, HeapFault};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SeriesFlags: u32 {
        /// Elements are cells.
        const ARRAY = 1 << 0;
        /// Expansion is forbidden.
        const FIXED_SIZE = 1 << 1;
        /// Reallocation sizes round up to 2 KiB then double.
        const POWER_OF_2 = 1 << 2;
        /// Top level is immutable.
        const FROZEN_SHALLOW = 1 << 3;
        /// Whole tree is immutable. Implies FROZEN_SHALLOW.
        const FROZEN_DEEP = 1 << 4;
        /// Data released; header kept alive for outstanding references.
        const INACCESSIBLE = 1 << 5;
        /// Header's link slot carries source file/line annotation.
        const FILE_LINE = 1 << 6;
        /// Owned by the collector; absent means the manuals discipline
        /// owns it.
        const MANAGED = 1 << 7;
        /// Collector mark bit, meaningful only mid-collection.
        const MARKED = 1 << 8;
        /// Singular handle whose cleanup runs when collected.
        const HANDLE = 1 << 9;
    }
}

/// Inline byte capacity of a header node.
pub const INLINE_BYTE_CAP: usize = 16;
/// Inline cell capacity of a header node.
pub const INLINE_CELL_CAP: usize = 2;

/// Opaque payload carried by a handle series, surrendered to the cleanup
/// function when the handle is collected.
pub enum HandleData {
    Word(u64),
    Boxed(Box<dyn std::any::Any>),
}

impl std::fmt::Debug for HandleData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleData::Word(w) => write!(f, "HandleData::Word({w})"),
            HandleData::Boxed(_) => write!(f, "HandleData::Boxed(..)"),
        }
    }
}

pub type HandleCleaner = fn(HandleData);

/// What the header's link slot is being used for.
#[derive(Debug, Default)]
pub enum Link {
    #[default]
    None,
    FileLine {
        file: SymbolId,
        line: u32,
    },
    Handle {
        data: Option<HandleData>,
        cleaner: Option<HandleCleaner>,
    },
}

#[derive(Debug)]
pub(crate) enum Store {
    Bytes(Box<[u8]>),
    Cells(Box<[Cell]>),
}

#[derive(Debug)]
pub(crate) struct Dynamic {
    pub bias: u32,
    pub len: u32,
    pub store: Store,
}

impl Dynamic {
    /// Usable capacity. Arrays reserve the final slot for the end stamp.
    fn rest(&self, is_array: bool) -> usize {
        match &self.store {
            Store::Bytes(data) => data.len() - self.bias as usize,
            Store::Cells(cells) => {
                (cells.len() - self.bias as usize).saturating_sub(if is_array { 1 } else { 0 })
            }
        }
    }
}

#[derive(Debug)]
pub(crate) enum Content {
    InlineBytes { len: u8, data: [u8; INLINE_BYTE_CAP] },
    InlineCells { len: u8, cells: [Cell; INLINE_CELL_CAP] },
    Dynamic(Dynamic),
    Inaccessible,
}

/// A series header node.
#[derive(Debug)]
pub struct Series {
    pub flags: SeriesFlags,
    /// Element byte width for byte-backed series; cell-width for arrays.
    pub width: u16,
    pub(crate) content: Content,
    pub link: Link,
}

pub(crate) enum SeriesSlot {
    Free { next: Option<u32> },
    Live(Series),
}

impl Series {
    pub fn is_array(&self) -> bool {
        self.flags.contains(SeriesFlags::ARRAY)
    }

    pub fn is_frozen(&self) -> bool {
        self.flags
            .intersects(SeriesFlags::FROZEN_SHALLOW | SeriesFlags::FROZEN_DEEP)
    }

    pub fn is_accessible(&self) -> bool {
        !self.flags.contains(SeriesFlags::INACCESSIBLE)
    }

    pub fn len(&self) -> usize {
        match &self.content {
            Content::InlineBytes { len, .. } | Content::InlineCells { len, .. } => *len as usize,
            Content::Dynamic(dynamic) => dynamic.len as usize,
            Content::Inaccessible => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining usable capacity (`rest`), inline or dynamic.
    pub fn rest(&self) -> usize {
        let is_array = self.is_array();
        match &self.content {
            Content::InlineBytes { .. } => INLINE_BYTE_CAP,
            Content::InlineCells { .. } => INLINE_CELL_CAP,
            Content::Dynamic(dynamic) => dynamic.rest(is_array),
            Content::Inaccessible => 0,
        }
    }

    pub fn bias(&self) -> usize {
        match &self.content {
            Content::Dynamic(dynamic) => dynamic.bias as usize,
            _ => 0,
        }
    }

    pub(crate) fn cells(&self) -> &[Cell] {
        match &self.content {
            Content::InlineCells { len, cells } => &cells[..*len as usize],
            Content::Dynamic(Dynamic {
                bias,
                len,
                store: Store::Cells(cells),
            }) => &cells[*bias as usize..(*bias + *len) as usize],
            _ => &[],
        }
    }

    pub(crate) fn cells_mut(&mut self) -> &mut [Cell] {
        match &mut self.content {
            Content::InlineCells { len, cells } => &mut cells[..*len as usize],
            Content::Dynamic(Dynamic {
                bias,
                len,
                store: Store::Cells(cells),
            }) => &mut cells[*bias as usize..(*bias + *len) as usize],
            _ => &mut [],
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        match &self.content {
            Content::InlineBytes { len, data } => &data[..*len as usize],
            Content::Dynamic(Dynamic {
                bias,
                len,
                store: Store::Bytes(data),
            }) => &data[*bias as usize..(*bias + *len) as usize],
            _ => &[],
        }
    }
}

/// Compute a dynamic allocation size under the growth policy.
fn alloc_units(requested: usize, unit_width: usize, pow2: bool) -> usize {
    if !pow2 {
        return requested;
    }
    let mut bytes = 2 * BIG_UNIT;
    while bytes < requested * unit_width {
        bytes *= 2;
    }
    bytes / unit_width
}

impl Heap {
    fn alloc_series_slot(&mut self, series: Series) -> SeriesId {
        match self.series_free.take() {
            Some(idx) => {
                let slot = &mut self.series[idx as usize];
                if let SeriesSlot::Free { next } = slot {
                    self.series_free = *next;
                } else {
                    unreachable!("freelist points at live series");
                }
                *slot = SeriesSlot::Live(series);
                SeriesId(idx)
            }
            None => {
                self.series.push(SeriesSlot::Live(series));
                SeriesId(self.series.len() as u32 - 1)
            }
        }
    }

    pub fn series(&self, id: SeriesId) -> Result<&Series, HeapFault> {
        match self.series.get(id.0 as usize) {
            Some(SeriesSlot::Live(series)) => Ok(series),
            _ => Err(HeapFault::StaleId),
        }
    }

    pub fn series_mut(&mut self, id: SeriesId) -> Result<&mut Series, HeapFault> {
        match self.series.get_mut(id.0 as usize) {
            Some(SeriesSlot::Live(series)) => Ok(series),
            _ => Err(HeapFault::StaleId),
        }
    }

    fn register_new(&mut self, id: SeriesId, flags: SeriesFlags) {
        if !flags.contains(SeriesFlags::MANAGED) {
            self.manuals.push(id);
        }
    }

    /// Make a byte-backed series with room for `capacity` elements of
    /// `width` bytes each. Byte series measure `bias`/`len`/`rest` in
    /// bytes; `width` records the client's element stride.
    pub fn make_bytes_series(
        &mut self,
        capacity: usize,
        width: u16,
        flags: SeriesFlags,
    ) -> Result<SeriesId, HeapFault> {
        debug_assert!(!flags.contains(SeriesFlags::ARRAY));
        debug_assert!((1..=256).contains(&(width as usize)));
        let byte_cap = capacity * width as usize;
        let content = if byte_cap <= INLINE_BYTE_CAP {
            Content::InlineBytes {
                len: 0,
                data: [0u8; INLINE_BYTE_CAP],
            }
        } else {
            let bytes = alloc_units(byte_cap, 1, flags.contains(SeriesFlags::POWER_OF_2));
            let store = self.pools.alloc_bytes(bytes, &mut self.signals)?;
            Content::Dynamic(Dynamic {
                bias: 0,
                len: 0,
                store: Store::Bytes(store),
            })
        };
        let id = self.alloc_series_slot(Series {
            flags,
            width,
            content,
            link: Link::None,
        });
        self.register_new(id, flags);
        Ok(id)
    }

    /// Make an array with usable capacity for `capacity` cells.
    pub fn make_array(
        &mut self,
        capacity: usize,
        flags: SeriesFlags,
    ) -> Result<SeriesId, HeapFault> {
        let flags = flags | SeriesFlags::ARRAY;
        let content = if capacity <= INLINE_CELL_CAP {
            Content::InlineCells {
                len: 0,
                cells: [Cell::FREE, Cell::FREE],
            }
        } else {
            // One extra slot for the end stamp.
            let units = alloc_units(
                capacity + 1,
                size_of::<Cell>(),
                flags.contains(SeriesFlags::POWER_OF_2),
            );
            let mut store = self.pools.alloc_cells(units, &mut self.signals)?;
            store[0] = Cell::END;
            Content::Dynamic(Dynamic {
                bias: 0,
                len: 0,
                store: Store::Cells(store),
            })
        };
        let id = self.alloc_series_slot(Series {
            flags,
            width: size_of::<Cell>() as u16,
            content,
            link: Link::None,
        });
        self.register_new(id, flags);
        Ok(id)
    }

    pub fn make_text(&mut self, text: &str, flags: SeriesFlags) -> Result<SeriesId, HeapFault> {
        let id = self.make_bytes_series(text.len().max(1), 1, flags)?;
        self.bytes_append(id, text.as_bytes())?;
        Ok(id)
    }

    /// A one-cell array, the backing shape for handles and LET variables.
    pub fn make_singular(&mut self, cell: Cell, flags: SeriesFlags) -> Result<SeriesId, HeapFault> {
        let id = self.make_array(1, flags)?;
        self.array_push(id, cell)?;
        Ok(id)
    }

    /// Make a handle series owning `data`. The archetype cell points back
    /// at its own series; only that identity runs the cleaner when
    /// collected, so copies of the handle cell are inert.
    pub fn make_handle(
        &mut self,
        data: HandleData,
        cleaner: Option<HandleCleaner>,
        flags: SeriesFlags,
    ) -> Result<SeriesId, HeapFault> {
        let id = self.make_array(1, flags | SeriesFlags::HANDLE)?;
        self.array_push(id, Cell::handle(id))?;
        let series = self.series_mut(id)?;
        series.link = Link::Handle {
            data: Some(data),
            cleaner,
        };
        Ok(id)
    }

    // --- mutation guards -------------------------------------------------

    /// Check a series is writable at all (not frozen, not inaccessible).
    pub fn ensure_mutable(&self, id: SeriesId) -> Result<(), HeapFault> {
        let series = self.series(id)?;
        if !series.is_accessible() {
            return Err(HeapFault::Inaccessible);
        }
        if series.is_frozen() {
            return Err(HeapFault::LockedSeries);
        }
        Ok(())
    }

    // --- array access ----------------------------------------------------

    pub fn array_len(&self, id: SeriesId) -> Result<usize, HeapFault> {
        Ok(self.series(id)?.len())
    }

    /// Read a cell; index `len` yields the implicit end marker.
    pub fn array_cell(&self, id: SeriesId, index: usize) -> Result<&Cell, HeapFault> {
        let series = self.series(id)?;
        if !series.is_accessible() {
            return Err(HeapFault::Inaccessible);
        }
        let cells = series.cells();
        if index < cells.len() {
            Ok(&cells[index])
        } else if index == cells.len() {
            Ok(&Cell::END)
        } else {
            Err(HeapFault::PastEnd)
        }
    }

    pub fn array_view(&self, id: SeriesId) -> Result<&[Cell], HeapFault> {
        let series = self.series(id)?;
        if !series.is_accessible() {
            return Err(HeapFault::Inaccessible);
        }
        Ok(series.cells())
    }

    pub fn array_set(&mut self, id: SeriesId, index: usize, cell: Cell) -> Result<(), HeapFault> {
        debug_assert!(cell.is_stable(), "unstable isotope written to array");
        self.ensure_mutable(id)?;
        let series = self.series_mut(id)?;
        let cells = series.cells_mut();
        if index >= cells.len() {
            return Err(HeapFault::PastEnd);
        }
        cells[index] = cell;
        Ok(())
    }

    pub fn array_push(&mut self, id: SeriesId, cell: Cell) -> Result<(), HeapFault> {
        let len = self.array_len(id)?;
        self.array_insert(id, len, cell)
    }

    pub fn array_insert(&mut self, id: SeriesId, at: usize, cell: Cell) -> Result<(), HeapFault> {
        debug_assert!(cell.is_stable(), "unstable isotope written to array");
        self.ensure_mutable(id)?;
        let len = self.array_len(id)?;
        if at > len {
            return Err(HeapFault::PastEnd);
        }
        self.expand_series(id, at, 1)?;
        let series = self.series_mut(id)?;
        series.cells_mut()[at] = cell;
        Ok(())
    }

    pub fn array_remove(&mut self, id: SeriesId, at: usize) -> Result<Cell, HeapFault> {
        self.ensure_mutable(id)?;
        let series = self.series_mut(id)?;
        let len = series.len();
        if at >= len {
            return Err(HeapFault::PastEnd);
        }
        match &mut series.content {
            Content::InlineCells { len, cells } => {
                let taken = cells[at].take();
                for i in at..*len as usize - 1 {
                    cells[i] = cells[i + 1].clone();
                }
                *len -= 1;
                cells[*len as usize] = Cell::FREE;
                Ok(taken)
            }
            Content::Dynamic(Dynamic {
                bias,
                len,
                store: Store::Cells(cells),
            }) => {
                let start = *bias as usize;
                let taken = cells[start + at].take();
                if at == 0 {
                    // Head removal donates the slot to bias.
                    cells[start] = Cell::FREE;
                    *bias += 1;
                } else {
                    for i in start + at..start + *len as usize - 1 {
                        cells[i] = cells[i + 1].clone();
                    }
                }
                *len -= 1;
                let end_at = *bias as usize + *len as usize;
                cells[end_at] = Cell::END;
                Ok(taken)
            }
            _ => Err(HeapFault::Inaccessible),
        }
    }

    /// Drop elements from `at` to the tail.
    pub fn array_truncate(&mut self, id: SeriesId, at: usize) -> Result<(), HeapFault> {
        self.ensure_mutable(id)?;
        let series = self.series_mut(id)?;
        let len = series.len();
        if at >= len {
            return Ok(());
        }
        match &mut series.content {
            Content::InlineCells { len, cells } => {
                for cell in cells[at..*len as usize].iter_mut() {
                    *cell = Cell::FREE;
                }
                *len = at as u8;
            }
            Content::Dynamic(Dynamic {
                bias,
                len,
                store: Store::Cells(cells),
            }) => {
                let start = *bias as usize;
                for cell in cells[start + at..start + *len as usize].iter_mut() {
                    *cell = Cell::FREE;
                }
                *len = at as u32;
                cells[start + at] = Cell::END;
            }
            _ => return Err(HeapFault::Inaccessible),
        }
        Ok(())
    }

    // --- byte access ------------------------------------------------------

    pub fn bytes_view(&self, id: SeriesId) -> Result<&[u8], HeapFault> {
        let series = self.series(id)?;
        if !series.is_accessible() {
            return Err(HeapFault::Inaccessible);
        }
        Ok(series.bytes())
    }

    pub fn text_str(&self, id: SeriesId) -> Result<&str, HeapFault> {
        let bytes = self.bytes_view(id)?;
        std::str::from_utf8(bytes).map_err(|_| HeapFault::Inaccessible)
    }

    pub fn bytes_append(&mut self, id: SeriesId, bytes: &[u8]) -> Result<(), HeapFault> {
        self.ensure_mutable(id)?;
        let len = self.series(id)?.len();
        self.expand_series(id, len, bytes.len())?;
        let series = self.series_mut(id)?;
        match &mut series.content {
            Content::InlineBytes { data, .. } => {
                data[len..len + bytes.len()].copy_from_slice(bytes);
            }
            Content::Dynamic(Dynamic {
                bias,
                store: Store::Bytes(data),
                ..
            }) => {
                let start = *bias as usize + len;
                data[start..start + bytes.len()].copy_from_slice(bytes);
            }
            _ => return Err(HeapFault::Inaccessible),
        }
        Ok(())
    }

    pub fn text_append_str(&mut self, id: SeriesId, text: &str) -> Result<(), HeapFault> {
        self.bytes_append(id, text.as_bytes())
    }

    // --- growth ----------------------------------------------------------

    /// Open a gap of `delta` elements at position `at`, growing storage
    /// as needed. New slots are unspecified for byte series and stamped
    /// free for arrays (callers fill them immediately).
    pub fn expand_series(
        &mut self,
        id: SeriesId,
        at: usize,
        delta: usize,
    ) -> Result<(), HeapFault> {
        if delta == 0 {
            return Ok(());
        }
        self.ensure_mutable(id)?;
        let series = self.series(id)?;
        if series.flags.contains(SeriesFlags::FIXED_SIZE) {
            return Err(HeapFault::FixedSize);
        }
        let len = series.len();
        if at > len {
            return Err(HeapFault::PastEnd);
        }
        let is_array = series.is_array();
        let rest = series.rest();
        let inline = matches!(
            series.content,
            Content::InlineBytes { .. } | Content::InlineCells { .. }
        );

        // Head insertion can reuse bias slack without any copying.
        if at == 0 && !inline {
            if let Content::Dynamic(dynamic) = &series.content {
                if dynamic.bias as usize >= delta {
                    let series = self.series_mut(id)?;
                    if let Content::Dynamic(dynamic) = &mut series.content {
                        dynamic.bias -= delta as u32;
                        dynamic.len += delta as u32;
                        if let Store::Cells(cells) = &mut dynamic.store {
                            for slot in
                                cells[dynamic.bias as usize..dynamic.bias as usize + delta].iter_mut()
                            {
                                *slot = Cell::FREE;
                            }
                        }
                    }
                    return Ok(());
                }
            }
        }

        if len + delta <= rest {
            // In-place: shift the tail up.
            let series = self.series_mut(id)?;
            match &mut series.content {
                Content::InlineBytes { len: ilen, data } => {
                    data.copy_within(at..*ilen as usize, at + delta);
                    *ilen += delta as u8;
                }
                Content::InlineCells { len: ilen, cells } => {
                    for i in (at..*ilen as usize).rev() {
                        cells[i + delta] = cells[i].take();
                    }
                    *ilen += delta as u8;
                }
                Content::Dynamic(dynamic) => {
                    let start = dynamic.bias as usize;
                    match &mut dynamic.store {
                        Store::Bytes(data) => {
                            data.copy_within(start + at..start + len, start + at + delta);
                        }
                        Store::Cells(cells) => {
                            for i in (at..len).rev() {
                                cells[start + i + delta] = cells[start + i].take();
                            }
                        }
                    }
                    dynamic.len += delta as u32;
                    if is_array {
                        if let Store::Cells(cells) = &mut dynamic.store {
                            cells[start + len + delta] = Cell::END;
                        }
                    }
                }
                Content::Inaccessible => return Err(HeapFault::Inaccessible),
            }
            return Ok(());
        }

        // Reallocate. A series seen in the recent-expansion ring gets a
        // doubling bonus to amortize append loops.
        let bonus = if self.expansion_ring.contains(&Some(id)) {
            len
        } else {
            0
        };
        self.remake_series(id, len + delta + bonus, true)?;
        self.expansion_ring[self.ring_cursor] = Some(id);
        self.ring_cursor = (self.ring_cursor + 1) % self.expansion_ring.len();

        // Now guaranteed to fit in place.
        let series = self.series_mut(id)?;
        if let Content::Dynamic(dynamic) = &mut series.content {
            let start = dynamic.bias as usize;
            match &mut dynamic.store {
                Store::Bytes(data) => {
                    data.copy_within(start + at..start + len, start + at + delta);
                }
                Store::Cells(cells) => {
                    for i in (at..len).rev() {
                        cells[start + i + delta] = cells[start + i].take();
                    }
                }
            }
            dynamic.len += delta as u32;
            if is_array {
                if let Store::Cells(cells) = &mut dynamic.store {
                    cells[start + len + delta] = Cell::END;
                }
            }
        }
        Ok(())
    }

    /// Reallocate to `new_cap` usable elements, optionally preserving
    /// content. Always lands on dynamic storage.
    pub fn remake_series(
        &mut self,
        id: SeriesId,
        new_cap: usize,
        preserve: bool,
    ) -> Result<(), HeapFault> {
        let series = self.series(id)?;
        if !series.is_accessible() {
            return Err(HeapFault::Inaccessible);
        }
        let is_array = series.is_array();
        let pow2 = series.flags.contains(SeriesFlags::POWER_OF_2);
        let len = series.len();

        if is_array {
            let units = alloc_units(new_cap + 1, size_of::<Cell>(), pow2);
            let mut store = self.pools.alloc_cells(units, &mut self.signals)?;
            let series = self.series_mut(id)?;
            let kept = if preserve { len.min(new_cap) } else { 0 };
            for (i, cell) in series.cells_mut().iter_mut().take(kept).enumerate() {
                store[i] = cell.take();
            }
            store[kept] = Cell::END;
            let old = std::mem::replace(
                &mut series.content,
                Content::Dynamic(Dynamic {
                    bias: 0,
                    len: kept as u32,
                    store: Store::Cells(store),
                }),
            );
            self.release_content(old);
        } else {
            let bytes = alloc_units(new_cap.max(1), 1, pow2);
            let mut store = self.pools.alloc_bytes(bytes, &mut self.signals)?;
            let series = self.series_mut(id)?;
            let kept = if preserve { len.min(new_cap) } else { 0 };
            store[..kept].copy_from_slice(&series.bytes()[..kept]);
            let old = std::mem::replace(
                &mut series.content,
                Content::Dynamic(Dynamic {
                    bias: 0,
                    len: kept as u32,
                    store: Store::Bytes(store),
                }),
            );
            self.release_content(old);
        }
        Ok(())
    }

    pub(crate) fn release_content(&mut self, content: Content) {
        if let Content::Dynamic(dynamic) = content {
            match dynamic.store {
                Store::Bytes(data) => self.pools.free_bytes(data),
                Store::Cells(cells) => self.pools.free_cells(cells),
            }
        }
    }

    // --- lifecycle -------------------------------------------------------

    /// Promote to collector ownership and drop it from the manuals list.
    pub fn manage_series(&mut self, id: SeriesId) -> Result<(), HeapFault> {
        let series = self.series_mut(id)?;
        if series.flags.contains(SeriesFlags::MANAGED) {
            return Ok(());
        }
        series.flags |= SeriesFlags::MANAGED;
        if let Some(pos) = self.manuals.iter().position(|m| *m == id) {
            self.manuals.remove(pos);
        }
        Ok(())
    }

    /// Free an unmanaged series entirely (header and data).
    pub fn free_unmanaged_series(&mut self, id: SeriesId) -> Result<(), HeapFault> {
        let series = self.series(id)?;
        debug_assert!(!series.flags.contains(SeriesFlags::MANAGED));
        if let Some(pos) = self.manuals.iter().position(|m| *m == id) {
            self.manuals.remove(pos);
        }
        self.kill_series_slot(id);
        Ok(())
    }

    /// Release the data but keep the header so outstanding references
    /// fault with "inaccessible" rather than dangling.
    pub fn decay_series(&mut self, id: SeriesId) -> Result<(), HeapFault> {
        let series = self.series_mut(id)?;
        let old = std::mem::replace(&mut series.content, Content::Inaccessible);
        let series = self.series_mut(id)?;
        series.flags |= SeriesFlags::INACCESSIBLE;
        self.release_content(old);
        Ok(())
    }

    /// Collector-only full reclamation of header and data.
    pub(crate) fn kill_series_slot(&mut self, id: SeriesId) {
        let slot = &mut self.series[id.0 as usize];
        if let SeriesSlot::Live(series) = slot {
            let content = std::mem::replace(&mut series.content, Content::Inaccessible);
            *slot = SeriesSlot::Free {
                next: self.series_free,
            };
            self.series_free = Some(id.0);
            self.release_content(content);
        }
    }

    // --- freezing --------------------------------------------------------

    pub fn freeze_shallow(&mut self, id: SeriesId) -> Result<(), HeapFault> {
        self.series_mut(id)?.flags |= SeriesFlags::FROZEN_SHALLOW;
        Ok(())
    }

    /// Deep-freeze this series and every array reachable from it. A
    /// deep-frozen series is always shallow-frozen too.
    pub fn freeze_deep(&mut self, id: SeriesId) -> Result<(), HeapFault> {
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let Ok(series) = self.series_mut(next) else {
                continue;
            };
            if series.flags.contains(SeriesFlags::FROZEN_DEEP) {
                continue;
            }
            series.flags |= SeriesFlags::FROZEN_DEEP | SeriesFlags::FROZEN_SHALLOW;
            if series.is_array() {
                for cell in self.series(next)?.cells() {
                    if let Some((sub, _, _)) = cell.as_array() {
                        pending.push(sub);
                    } else if let Some((sub, _)) = cell.as_text() {
                        pending.push(sub);
                    }
                }
            }
        }
        Ok(())
    }

    /// Reverse a protect: clear the frozen bits, walking the tree when
    /// `deep`.
    pub fn unfreeze(&mut self, id: SeriesId, deep: bool) -> Result<(), HeapFault> {
        let mut pending = vec![id];
        let mut seen = Vec::new();
        while let Some(next) = pending.pop() {
            if seen.contains(&next) {
                continue;
            }
            seen.push(next);
            let Ok(series) = self.series_mut(next) else {
                continue;
            };
            series
                .flags
                .remove(SeriesFlags::FROZEN_SHALLOW | SeriesFlags::FROZEN_DEEP);
            if deep && series.is_array() {
                for cell in self.series(next)?.cells() {
                    if let Some((sub, _, _)) = cell.as_array() {
                        pending.push(sub);
                    } else if let Some((sub, _)) = cell.as_text() {
                        pending.push(sub);
                    }
                }
            }
        }
        Ok(())
    }

    // --- misc ------------------------------------------------------------

    /// Exchange the entire contents of two series. The one place element
    /// width may legally change.
    pub fn swap_content(&mut self, a: SeriesId, b: SeriesId) -> Result<(), HeapFault> {
        self.ensure_mutable(a)?;
        self.ensure_mutable(b)?;
        if a == b {
            return Ok(());
        }
        let (low, high) = if a.0 < b.0 { (a, b) } else { (b, a) };
        let (head, tail) = self.series.split_at_mut(high.0 as usize);
        let (SeriesSlot::Live(first), SeriesSlot::Live(second)) =
            (&mut head[low.0 as usize], &mut tail[0])
        else {
            return Err(HeapFault::StaleId);
        };
        std::mem::swap(&mut first.content, &mut second.content);
        std::mem::swap(&mut first.width, &mut second.width);
        let array_bits = SeriesFlags::ARRAY;
        let first_was = first.flags.contains(array_bits);
        let second_was = second.flags.contains(array_bits);
        first.flags.set(array_bits, second_was);
        second.flags.set(array_bits, first_was);
        Ok(())
    }

    pub fn set_file_line(
        &mut self,
        id: SeriesId,
        file: SymbolId,
        line: u32,
    ) -> Result<(), HeapFault> {
        let series = self.series_mut(id)?;
        series.flags |= SeriesFlags::FILE_LINE;
        series.link = Link::FileLine { file, line };
        Ok(())
    }

    pub fn file_line(&self, id: SeriesId) -> Option<(SymbolId, u32)> {
        match self.series(id).ok()?.link {
            Link::FileLine { file, line } => Some((file, line)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Heap;

    fn heap() -> Heap {
        Heap::with_defaults()
    }

    #[test]
    fn small_arrays_start_inline() {
        let mut h = heap();
        let id = h.make_array(2, SeriesFlags::empty()).unwrap();
        h.array_push(id, Cell::integer(1)).unwrap();
        h.array_push(id, Cell::integer(2)).unwrap();
        assert!(matches!(
            h.series(id).unwrap().content,
            Content::InlineCells { .. }
        ));
        // Third push promotes to dynamic storage.
        h.array_push(id, Cell::integer(3)).unwrap();
        assert!(matches!(
            h.series(id).unwrap().content,
            Content::Dynamic(_)
        ));
        assert_eq!(h.array_cell(id, 2).unwrap().as_integer(), Some(3));
    }

    #[test]
    fn implicit_end_is_readable_not_writable() {
        let mut h = heap();
        let id = h.make_array(8, SeriesFlags::empty()).unwrap();
        h.array_push(id, Cell::integer(1)).unwrap();
        let end = h.array_cell(id, 1).unwrap();
        assert!(end.is_end());
        assert!(h.array_cell(id, 2).is_err());
        assert!(matches!(
            h.array_set(id, 1, Cell::integer(9)),
            Err(HeapFault::PastEnd)
        ));
    }

    #[test]
    fn dynamic_array_keeps_tail_stamp() {
        let mut h = heap();
        let id = h.make_array(8, SeriesFlags::empty()).unwrap();
        for n in 0..5 {
            h.array_push(id, Cell::integer(n)).unwrap();
        }
        let series = h.series(id).unwrap();
        if let Content::Dynamic(Dynamic {
            bias,
            len,
            store: Store::Cells(cells),
        }) = &series.content
        {
            assert!(cells[(*bias + *len) as usize].is_end());
        } else {
            panic!("expected dynamic content");
        }
    }

    #[test]
    fn head_removal_builds_bias_and_head_insert_reuses_it() {
        let mut h = heap();
        let id = h.make_array(8, SeriesFlags::empty()).unwrap();
        for n in 0..6 {
            h.array_push(id, Cell::integer(n)).unwrap();
        }
        let removed = h.array_remove(id, 0).unwrap();
        assert_eq!(removed.as_integer(), Some(0));
        assert_eq!(h.series(id).unwrap().bias(), 1);
        h.array_insert(id, 0, Cell::integer(99)).unwrap();
        assert_eq!(h.series(id).unwrap().bias(), 0);
        assert_eq!(h.array_cell(id, 0).unwrap().as_integer(), Some(99));
        assert_eq!(h.array_cell(id, 1).unwrap().as_integer(), Some(1));
    }

    #[test]
    fn fixed_size_series_refuse_expansion() {
        let mut h = heap();
        let id = h.make_array(2, SeriesFlags::FIXED_SIZE).unwrap();
        h.array_push(id, Cell::integer(1)).unwrap();
        h.array_push(id, Cell::integer(2)).unwrap();
        assert!(matches!(
            h.array_push(id, Cell::integer(3)),
            Err(HeapFault::FixedSize)
        ));
    }

    #[test]
    fn frozen_series_refuse_writes() {
        let mut h = heap();
        let id = h.make_array(4, SeriesFlags::empty()).unwrap();
        h.array_push(id, Cell::integer(1)).unwrap();
        h.freeze_shallow(id).unwrap();
        assert!(matches!(
            h.array_push(id, Cell::integer(2)),
            Err(HeapFault::LockedSeries)
        ));
    }

    #[test]
    fn deep_freeze_implies_shallow_and_propagates() {
        let mut h = heap();
        let inner = h.make_array(4, SeriesFlags::empty()).unwrap();
        h.array_push(inner, Cell::integer(1)).unwrap();
        let outer = h.make_array(4, SeriesFlags::empty()).unwrap();
        h.array_push(outer, Cell::array(core_value::Kind::Block, inner))
            .unwrap();
        h.freeze_deep(outer).unwrap();
        let flags = h.series(outer).unwrap().flags;
        assert!(flags.contains(SeriesFlags::FROZEN_DEEP | SeriesFlags::FROZEN_SHALLOW));
        assert!(matches!(
            h.array_push(inner, Cell::integer(2)),
            Err(HeapFault::LockedSeries)
        ));
    }

    #[test]
    fn decay_leaves_inaccessible_husk() {
        let mut h = heap();
        let id = h.make_array(8, SeriesFlags::empty()).unwrap();
        h.array_push(id, Cell::integer(1)).unwrap();
        h.decay_series(id).unwrap();
        assert!(matches!(h.array_cell(id, 0), Err(HeapFault::Inaccessible)));
        // Header stays alive; the id is not stale.
        assert!(h.series(id).is_ok());
    }

    #[test]
    fn expansion_ring_grants_doubling_bonus() {
        let mut h = heap();
        let id = h.make_array(4, SeriesFlags::empty()).unwrap();
        for n in 0..64 {
            h.array_push(id, Cell::integer(n)).unwrap();
        }
        // After repeated expansion the rest outruns len, showing the
        // bonus kicked in.
        let series = h.series(id).unwrap();
        assert!(series.rest() > 64);
        for n in 0..64 {
            assert_eq!(h.array_cell(id, n).unwrap().as_integer(), Some(n as i64));
        }
    }

    #[test]
    fn power_of_two_series_round_up() {
        let mut h = heap();
        let id = h
            .make_bytes_series(3000, 1, SeriesFlags::POWER_OF_2)
            .unwrap();
        assert!(h.series(id).unwrap().rest() >= 4096);
    }

    #[test]
    fn text_round_trip() {
        let mut h = heap();
        let id = h.make_text("hello", SeriesFlags::empty()).unwrap();
        assert_eq!(h.text_str(id).unwrap(), "hello");
        h.text_append_str(id, " world").unwrap();
        assert_eq!(h.text_str(id).unwrap(), "hello world");
    }

    #[test]
    fn swap_content_exchanges_widths() {
        let mut h = heap();
        let a = h.make_text("abc", SeriesFlags::empty()).unwrap();
        let b = h.make_array(4, SeriesFlags::empty()).unwrap();
        h.array_push(b, Cell::integer(7)).unwrap();
        h.swap_content(a, b).unwrap();
        assert!(h.series(a).unwrap().is_array());
        assert!(!h.series(b).unwrap().is_array());
        assert_eq!(h.array_cell(a, 0).unwrap().as_integer(), Some(7));
        assert_eq!(h.text_str(b).unwrap(), "abc");
    }
}
