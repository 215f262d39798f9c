//! Mark-and-sweep collection.
//!
//! Roots: the data stack, the guard stack, boot-time root cells, any
//! extra roots the caller passes (the evaluator contributes every live
//! level's cells), plus — conservatively — the manuals list and
//! unmanaged contexts, since those are mid-construction objects whose
//! interior references must not be swept out from under them.
//!
//! The collector never runs reentrantly and is suppressed while the
//! disable counter is nonzero; a request arriving while disabled stays
//! queued in the signal mask and is honored at the next boundary.

use core_value::{ActionId, Binding, Cell, ContextId, PatchId, Payload, SeriesId, Specifier};
use tracing::debug;

use crate::action::ActSlot;
use crate::context::{CtxSlot, PatchSlot};
use crate::series::{Link, SeriesFlags, SeriesSlot};
use crate::signal::SignalFlags;
use crate::Heap;

/// An external reference to keep alive across a collection.
#[derive(Debug, Clone, Copy)]
pub enum Root<'a> {
    Cell(&'a Cell),
    Series(SeriesId),
    Context(ContextId),
    Action(ActionId),
    Specifier(Specifier),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub swept_series: usize,
    pub swept_contexts: usize,
    pub swept_actions: usize,
    pub swept_patches: usize,
}

enum Work {
    Series(SeriesId),
    Context(ContextId),
    Action(ActionId),
    Patch(PatchId),
}

impl Heap {
    pub fn gc_disable(&mut self) {
        self.gc_disabled += 1;
    }

    pub fn gc_enable(&mut self) {
        debug_assert!(self.gc_disabled > 0);
        self.gc_disabled -= 1;
    }

    pub fn gc_is_disabled(&self) -> bool {
        self.gc_disabled > 0
    }

    pub fn gc_disabled_depth(&self) -> u32 {
        self.gc_disabled
    }

    /// Restore a previously captured disable depth (trap recovery).
    pub fn gc_restore_disabled(&mut self, depth: u32) {
        self.gc_disabled = depth;
    }

    /// Run a collection unless disabled (in which case the request stays
    /// queued and `None` is returned).
    pub fn collect(&mut self, extra_roots: &[Root<'_>]) -> Option<CollectStats> {
        if self.gc_disabled > 0 {
            self.signals.raise(SignalFlags::RECYCLE);
            return None;
        }

        let mut work: Vec<Work> = Vec::new();

        // Interior root sets first; then caller roots.
        for cell in &self.data_stack {
            push_cell_refs(cell, &mut work);
        }
        for cell in &self.guarded {
            push_cell_refs(cell, &mut work);
        }
        for cell in &self.root_cells {
            push_cell_refs(cell, &mut work);
        }
        for id in &self.manuals {
            work.push(Work::Series(*id));
        }
        for (idx, slot) in self.contexts.iter().enumerate() {
            if let CtxSlot::Live(context) = slot {
                if !context.managed {
                    work.push(Work::Context(ContextId(idx as u32)));
                }
            }
        }
        for root in extra_roots {
            match root {
                Root::Cell(cell) => push_cell_refs(cell, &mut work),
                Root::Series(id) => work.push(Work::Series(*id)),
                Root::Context(id) => work.push(Work::Context(*id)),
                Root::Action(id) => work.push(Work::Action(*id)),
                Root::Specifier(spec) => push_specifier(*spec, &mut work),
            }
        }

        // Propagate.
        while let Some(item) = work.pop() {
            match item {
                Work::Series(id) => self.mark_series(id, &mut work),
                Work::Context(id) => self.mark_context(id, &mut work),
                Work::Action(id) => self.mark_action(id, &mut work),
                Work::Patch(id) => self.mark_patch(id, &mut work),
            }
        }

        let stats = self.sweep();
        self.pools.replenish_ballast();
        self.signals.take(SignalFlags::RECYCLE);
        self.gc_runs += 1;
        debug!(
            swept_series = stats.swept_series,
            swept_contexts = stats.swept_contexts,
            swept_actions = stats.swept_actions,
            ballast = self.pools.ballast(),
            "recycle"
        );
        Some(stats)
    }

    fn mark_series(&mut self, id: SeriesId, work: &mut Vec<Work>) {
        let Ok(series) = self.series_mut(id) else {
            return;
        };
        if series.flags.contains(SeriesFlags::MARKED) {
            return;
        }
        series.flags |= SeriesFlags::MARKED;
        let Ok(series) = self.series(id) else { return };
        if series.is_array() {
            for cell in series.cells() {
                push_cell_refs(cell, work);
            }
        }
    }

    fn mark_context(&mut self, id: ContextId, work: &mut Vec<Work>) {
        let Ok(context) = self.context_mut(id) else {
            return;
        };
        if context.marked {
            return;
        }
        context.marked = true;
        let Ok(context) = self.context(id) else { return };
        work.push(Work::Series(context.varlist));
        if let Some(phase) = context.phase {
            work.push(Work::Action(phase));
        }
        for (_, var) in &context.module_vars {
            work.push(Work::Series(*var));
        }
    }

    fn mark_action(&mut self, id: ActionId, work: &mut Vec<Work>) {
        let Ok(action) = self.action_mut(id) else {
            return;
        };
        if action.marked {
            return;
        }
        action.marked = true;
        let Ok(action) = self.action(id) else { return };
        work.push(Work::Series(action.details));
        if let Some(exemplar) = action.exemplar {
            work.push(Work::Context(exemplar));
        }
        if let Some(underlying) = action.underlying {
            work.push(Work::Action(underlying));
        }
    }

    fn mark_patch(&mut self, id: PatchId, work: &mut Vec<Work>) {
        let Some(PatchSlot::Live(patch)) = self.patches.get_mut(id.0 as usize) else {
            return;
        };
        if patch.marked {
            return;
        }
        patch.marked = true;
        let overlay = patch.overlay;
        let next = patch.next;
        work.push(Work::Context(overlay));
        push_specifier(next, work);
    }

    fn sweep(&mut self) -> CollectStats {
        let mut stats = CollectStats::default();

        // Handle cleanups run before their series die, and only for the
        // identity owner: the handle cell stored in the series must point
        // back at that same series, which copies of the cell never do.
        let mut doomed_series = Vec::new();
        for (idx, slot) in self.series.iter_mut().enumerate() {
            let SeriesSlot::Live(series) = slot else {
                continue;
            };
            if series.flags.contains(SeriesFlags::MARKED) {
                series.flags.remove(SeriesFlags::MARKED);
                continue;
            }
            if !series.flags.contains(SeriesFlags::MANAGED) {
                continue;
            }
            let id = SeriesId(idx as u32);
            if series.flags.contains(SeriesFlags::HANDLE) {
                let owner = matches!(
                    series.cells().first().map(|c| c.payload()),
                    Some(Payload::Handle(pointee)) if *pointee == id
                );
                if owner {
                    if let Link::Handle { data, cleaner } = &mut series.link {
                        if let (Some(data), Some(cleaner)) = (data.take(), *cleaner) {
                            cleaner(data);
                        }
                    }
                }
            }
            doomed_series.push(id);
        }
        for id in doomed_series {
            self.kill_series_slot(id);
            stats.swept_series += 1;
        }

        let mut free_head = self.contexts_free;
        for (idx, slot) in self.contexts.iter_mut().enumerate() {
            if let CtxSlot::Live(context) = slot {
                if context.marked || !context.managed {
                    context.marked = false;
                    continue;
                }
                *slot = CtxSlot::Free { next: free_head };
                free_head = Some(idx as u32);
                stats.swept_contexts += 1;
            }
        }
        self.contexts_free = free_head;

        let mut free_head = self.actions_free;
        for (idx, slot) in self.actions.iter_mut().enumerate() {
            if let ActSlot::Live(action) = slot {
                if action.marked {
                    action.marked = false;
                    continue;
                }
                *slot = ActSlot::Free { next: free_head };
                free_head = Some(idx as u32);
                stats.swept_actions += 1;
            }
        }
        self.actions_free = free_head;

        let mut free_head = self.patches_free;
        for (idx, slot) in self.patches.iter_mut().enumerate() {
            if let PatchSlot::Live(patch) = slot {
                if patch.marked {
                    patch.marked = false;
                    continue;
                }
                *slot = PatchSlot::Free { next: free_head };
                free_head = Some(idx as u32);
                stats.swept_patches += 1;
            }
        }
        self.patches_free = free_head;

        stats
    }
}

fn push_specifier(spec: Specifier, work: &mut Vec<Work>) {
    match spec {
        Specifier::Specified => {}
        Specifier::Context(id) => work.push(Work::Context(id)),
        Specifier::Patch(id) => work.push(Work::Patch(id)),
    }
}

fn push_binding(binding: Binding, work: &mut Vec<Work>) {
    match binding {
        Binding::Unbound => {}
        Binding::Relative(action) => work.push(Work::Action(action)),
        Binding::Specific(ctx) | Binding::Sea(ctx) => work.push(Work::Context(ctx)),
        Binding::Let(patch) => work.push(Work::Patch(patch)),
    }
}

fn push_cell_refs(cell: &Cell, work: &mut Vec<Work>) {
    match cell.payload() {
        Payload::None | Payload::Logic(_) | Payload::Integer(_) | Payload::Varargs { .. } => {}
        Payload::Text { series, .. } => work.push(Work::Series(*series)),
        Payload::Word { binding, .. } => push_binding(*binding, work),
        Payload::Array {
            series, binding, ..
        } => {
            work.push(Work::Series(*series));
            push_binding(*binding, work);
        }
        Payload::Context(id) => work.push(Work::Context(*id)),
        Payload::Action { action, binding } => {
            work.push(Work::Action(*action));
            push_binding(*binding, work);
        }
        Payload::Handle(series) => work.push(Work::Series(*series)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{HandleData, SeriesFlags};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn heap() -> Heap {
        Heap::with_defaults()
    }

    #[test]
    fn unreachable_managed_series_are_swept() {
        let mut h = heap();
        let dead = h.make_array(8, SeriesFlags::MANAGED).unwrap();
        let live = h.make_array(8, SeriesFlags::MANAGED).unwrap();
        let keeper = Cell::array(core_value::Kind::Block, live);
        let stats = h.collect(&[Root::Cell(&keeper)]).unwrap();
        assert!(stats.swept_series >= 1);
        assert!(h.series(dead).is_err());
        assert!(h.series(live).is_ok());
    }

    #[test]
    fn reachability_propagates_through_nesting() {
        let mut h = heap();
        let inner = h.make_array(2, SeriesFlags::MANAGED).unwrap();
        h.array_push(inner, Cell::integer(1)).unwrap();
        let outer = h.make_array(2, SeriesFlags::MANAGED).unwrap();
        h.array_push(outer, Cell::array(core_value::Kind::Block, inner))
            .unwrap();
        let keeper = Cell::array(core_value::Kind::Block, outer);
        h.collect(&[Root::Cell(&keeper)]).unwrap();
        assert!(h.series(inner).is_ok());
        assert_eq!(h.array_cell(inner, 0).unwrap().as_integer(), Some(1));
    }

    #[test]
    fn guarded_cells_are_roots() {
        let mut h = heap();
        let id = h.make_array(2, SeriesFlags::MANAGED).unwrap();
        let mark = h.guard_cell(Cell::array(core_value::Kind::Block, id));
        h.collect(&[]).unwrap();
        assert!(h.series(id).is_ok());
        h.drop_guards_to(mark);
        h.collect(&[]).unwrap();
        assert!(h.series(id).is_err());
    }

    #[test]
    fn manuals_survive_until_freed_or_managed() {
        let mut h = heap();
        let id = h.make_array(8, SeriesFlags::empty()).unwrap();
        h.collect(&[]).unwrap();
        assert!(h.series(id).is_ok(), "unmanaged series are not swept");
        h.manage_series(id).unwrap();
        h.collect(&[]).unwrap();
        assert!(h.series(id).is_err(), "managed and unreachable: swept");
    }

    #[test]
    fn disabled_collection_queues_the_request() {
        let mut h = heap();
        let id = h.make_array(8, SeriesFlags::MANAGED).unwrap();
        h.gc_disable();
        assert!(h.collect(&[]).is_none());
        assert!(h.signals.test(SignalFlags::RECYCLE));
        assert!(h.series(id).is_ok());
        h.gc_enable();
        assert!(h.collect(&[]).is_some());
        assert!(h.series(id).is_err());
    }

    static CLEANED: AtomicU32 = AtomicU32::new(0);

    fn count_cleanup(_data: HandleData) {
        CLEANED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn handle_cleanup_runs_only_for_the_identity_owner() {
        CLEANED.store(0, Ordering::SeqCst);
        let mut h = heap();
        let handle = h
            .make_handle(
                HandleData::Word(42),
                Some(count_cleanup),
                SeriesFlags::MANAGED,
            )
            .unwrap();
        // A copy of the handle cell lives in another collected array; it
        // must not trigger a second cleanup.
        let copy_holder = h.make_array(2, SeriesFlags::MANAGED).unwrap();
        h.array_push(copy_holder, Cell::handle(handle)).unwrap();
        h.collect(&[]).unwrap();
        assert_eq!(CLEANED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn contexts_and_actions_collect_with_their_references() {
        let mut h = heap();
        let ctx = h
            .make_context(crate::context::ContextKind::Object, 2)
            .unwrap();
        let sym = h.symbols.intern("x");
        h.context_append(ctx, sym, Cell::integer(9)).unwrap();
        h.manage_context(ctx).unwrap();
        let keeper = Cell::context(core_value::Kind::Object, ctx);
        h.collect(&[Root::Cell(&keeper)]).unwrap();
        assert_eq!(h.context_var(ctx, 1).unwrap().as_integer(), Some(9));
        // Dropping the root sweeps context and varlist together.
        h.collect(&[]).unwrap();
        assert!(h.context(ctx).is_err());
    }
}
