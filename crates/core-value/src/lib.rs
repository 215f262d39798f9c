//! Tagged value cells, kinds, and bindings — the vocabulary every other
//! runtime crate speaks.
//!
//! This crate is deliberately heap-free: cells reference series, contexts,
//! actions, and symbols by index newtype only. Allocation, interning, and
//! collection live in `core-heap`; resolution of bindings against live
//! frames lives in `core-eval`.

pub mod binding;
pub mod cell;
pub mod ids;
pub mod kind;

pub use binding::{Binding, Specifier};
pub use cell::{Cell, CellFlags, Payload, QUOTE_ISOTOPE, QUOTE_PLAIN};
pub use ids::{ActionId, ContextId, DispatcherId, PatchId, SeriesId, SymbolId};
pub use kind::{Kind, TypeSet, typesets};
