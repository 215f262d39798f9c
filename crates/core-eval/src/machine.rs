//! The interpreter instance.
//!
//! All state that the original design kept in globals lives here as
//! owned fields, so multiple machines can coexist in one process. The
//! machine owns the heap, the level stack, the dispatcher table, and
//! the task-local thrown slots; the evaluator and natives are written
//! as methods against it.

use core_heap::gc::Root;
use core_heap::{CollectStats, Heap, SignalFlags};
use core_value::{ActionId, Cell, ContextId, Kind, Payload, SeriesId, Specifier, SymbolId};
use tracing::debug;

use crate::feed::Feed;
use crate::level::Level;
use crate::raise::{Bounce, Raise};

pub type NativeFn = fn(&mut Machine) -> Result<Bounce, Raise>;

/// Symbols the runtime compares against constantly.
#[derive(Debug, Clone, Copy)]
pub struct CommonSyms {
    pub return_: SymbolId,
    pub break_: SymbolId,
    pub continue_: SymbolId,
    pub throw: SymbolId,
    pub quit: SymbolId,
    pub unwind: SymbolId,
}

#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    /// Bytes of allocation between collections.
    pub watermark: usize,
    /// Largest single allocation honored.
    pub max_request: usize,
    /// Level-stack depth ceiling.
    pub depth_ceiling: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            watermark: core_heap::DEFAULT_WATERMARK,
            max_request: core_heap::DEFAULT_MAX_REQUEST,
            depth_ceiling: 4096,
        }
    }
}

pub struct Machine {
    pub heap: Heap,
    pub(crate) levels: Vec<Level>,
    pub(crate) dispatchers: Vec<NativeFn>,
    /// The user module words attach to by default.
    pub lib: ContextId,
    /// The boot-time system object.
    pub system: ContextId,
    pub(crate) syms: CommonSyms,
    pub(crate) thrown_label: Option<Cell>,
    pub(crate) thrown_arg: Cell,
    pub(crate) next_serial: u64,
    pub(crate) depth_ceiling: usize,
    pub(crate) halt_error: ContextId,
    pub(crate) stack_overflow_error: ContextId,
    pub(crate) oom_error: ContextId,
    /// The RETURN native, stamped into every frame's return slot with a
    /// per-call binding.
    pub(crate) return_action: ActionId,
    /// Dispatcher table index of the specializer.
    pub(crate) specializer_dispatcher: core_value::DispatcherId,
    /// Dispatcher table index of the function-body runner.
    pub(crate) func_dispatcher: core_value::DispatcherId,
    /// Shared zero-length array for dispatch-only feeds.
    pub(crate) empty_array: SeriesId,
    /// Where PRINT writes; tests substitute a buffer.
    pub(crate) sink: Box<dyn std::io::Write>,
}

impl Machine {
    pub(crate) fn bump_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub(crate) fn push_level(&mut self, feed: Feed) -> Result<(), Raise> {
        if self.levels.len() >= self.depth_ceiling {
            return Err(Raise::Error(self.stack_overflow_error));
        }
        let serial = self.bump_serial();
        self.levels.push(Level::new(serial, feed));
        Ok(())
    }

    pub(crate) fn pop_level(&mut self) -> Level {
        let level = self.levels.pop().expect("level stack underflow");
        // The frame back-pointer nulls atomically with the drop; the
        // context outlives the call only as an expired husk. The data
        // stack is NOT truncated here: operations own their balance
        // (accumulators intentionally leave pushes behind), and error
        // unwind restores depth at the trap.
        if let Some(ctx) = level.varlist {
            let _ = self.heap.expire_frame(ctx);
        }
        level
    }

    pub(crate) fn top(&mut self) -> &mut Level {
        self.levels.last_mut().expect("no active level")
    }

    pub(crate) fn top_ref(&self) -> &Level {
        self.levels.last().expect("no active level")
    }

    // --- frame variable access for natives --------------------------------

    /// Clone the current frame's variable at 1-based `index`.
    pub fn arg(&self, index: usize) -> Cell {
        let varlist = self.top_ref().varlist.expect("native outside a frame");
        self.heap
            .context_var(varlist, index)
            .cloned()
            .unwrap_or_else(|_| Cell::trash())
    }

    pub fn set_out(&mut self, cell: Cell) {
        let top = self.top();
        top.flags.remove(crate::level::LevelFlags::OUT_STALE);
        top.out = cell;
    }

    // --- signals ----------------------------------------------------------

    /// Polled before each evaluator step.
    pub fn poll_signals(&mut self) -> Result<(), Raise> {
        if self.heap.signals.take(SignalFlags::HALT) {
            return Err(Raise::Error(self.halt_error));
        }
        if self.heap.signals.test(SignalFlags::RECYCLE) && !self.heap.gc_is_disabled() {
            self.recycle();
        }
        Ok(())
    }

    /// Run the collector with every live level contributing roots.
    pub fn recycle(&mut self) -> Option<CollectStats> {
        let Machine {
            heap,
            levels,
            thrown_label,
            thrown_arg,
            ..
        } = self;
        let mut roots: Vec<Root<'_>> = Vec::new();
        for level in levels.iter() {
            roots.push(Root::Series(level.feed.array));
            roots.push(Root::Specifier(level.feed.specifier));
            roots.push(Root::Cell(&level.out));
            roots.push(Root::Cell(&level.spare));
            if let Some(lookback) = &level.feed.lookback {
                roots.push(Root::Cell(lookback));
            }
            if let Some(ctx) = level.varlist {
                roots.push(Root::Context(ctx));
            }
            if let Some(action) = level.phase {
                roots.push(Root::Action(action));
            }
            if let Some(action) = level.original {
                roots.push(Root::Action(action));
            }
            match &level.pending {
                Some(crate::level::Pending::Branch { value, with }) => {
                    roots.push(Root::Cell(value));
                    if let Some(with) = with {
                        roots.push(Root::Cell(with));
                    }
                }
                Some(crate::level::Pending::Block { value, specifier }) => {
                    roots.push(Root::Cell(value));
                    roots.push(Root::Specifier(*specifier));
                }
                None => {}
            }
        }
        if let Some(label) = thrown_label {
            roots.push(Root::Cell(label));
        }
        roots.push(Root::Cell(thrown_arg));
        let stats = heap.collect(&roots);
        if let Some(stats) = stats {
            debug!(levels = levels.len(), ?stats, "recycled");
        }
        stats
    }

    // --- thrown label machinery -------------------------------------------

    /// Park a thrown label and argument and start unwinding.
    pub(crate) fn throw_labeled(&mut self, label: Cell, arg: Cell) -> Raise {
        debug_assert!(self.thrown_label.is_none(), "throw while throw in flight");
        self.thrown_label = Some(label);
        self.thrown_arg = arg;
        Raise::Thrown
    }

    /// Inspect the in-flight label without consuming it.
    pub(crate) fn thrown_label_ref(&self) -> Option<&Cell> {
        self.thrown_label.as_ref()
    }

    /// Consume the in-flight throw, converting it back to plain values.
    pub(crate) fn take_thrown(&mut self) -> (Cell, Cell) {
        let label = self.thrown_label.take().expect("no throw in flight");
        let arg = self.thrown_arg.take();
        (label, arg)
    }

    /// Does the in-flight throw target the given frame identity?
    pub(crate) fn thrown_targets_frame(&self, varlist: ContextId) -> bool {
        match self.thrown_label_ref().map(|c| c.payload()) {
            Some(Payload::Word { binding, .. }) => {
                matches!(binding, core_value::Binding::Specific(ctx) if *ctx == varlist)
            }
            _ => false,
        }
    }

    // --- traps ------------------------------------------------------------

    /// Run `body` with a recovery boundary. On a raised error the
    /// interpreter state is unwound to the depths captured at entry and
    /// the error is returned in the `Err` of the inner result. Thrown
    /// labels pass through (they are not errors), and halt passes every
    /// trap not marked haltable.
    pub fn with_trap<T>(
        &mut self,
        haltable: bool,
        body: impl FnOnce(&mut Machine) -> Result<T, Raise>,
    ) -> Result<Result<T, ContextId>, Raise> {
        let level_depth = self.levels.len();
        let ds_depth = self.heap.ds_depth();
        let guard_depth = self.heap.guard_depth();
        let manuals_mark = self.heap.manuals_mark();
        let gc_disabled = self.heap.gc_disabled_depth();

        match body(self) {
            Ok(value) => Ok(Ok(value)),
            Err(Raise::Thrown) => Err(Raise::Thrown),
            Err(Raise::Error(error)) => {
                if self.is_halt(error) && !haltable {
                    return Err(Raise::Error(error));
                }
                while self.levels.len() > level_depth {
                    self.pop_level();
                }
                self.heap.ds_drop_to(ds_depth);
                self.heap.drop_guards_to(guard_depth);
                self.heap.manuals_release_to(manuals_mark);
                self.heap.gc_restore_disabled(gc_disabled);
                Ok(Err(error))
            }
        }
    }

    // --- misc -------------------------------------------------------------

    /// A feed that immediately reports end; used by dispatch-only levels.
    pub(crate) fn exhausted_feed(&self) -> Feed {
        Feed::exhausted(self.empty_array)
    }

    pub(crate) fn dispatcher_fn(&self, id: core_value::DispatcherId) -> NativeFn {
        self.dispatchers[id.0 as usize]
    }

    pub fn word_cell(&mut self, spelling: &str) -> Cell {
        let sym = self.heap.symbols.intern(spelling);
        Cell::word(Kind::Word, sym)
    }

    /// Replace PRINT's output sink (tests capture with a buffer).
    pub fn set_sink(&mut self, sink: Box<dyn std::io::Write>) {
        self.sink = sink;
    }

    /// Honor a request arriving from outside: halt at the next step.
    pub fn request_halt(&mut self) {
        self.heap.signals.raise(SignalFlags::HALT);
    }

    pub(crate) fn specifier_of_top(&self) -> Specifier {
        self.levels
            .last()
            .map(|l| l.feed.specifier)
            .unwrap_or(Specifier::Specified)
    }
}
