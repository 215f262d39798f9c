//! The step state machine: fetch, dispatch by kind, lookahead.
//!
//! One step consumes one expression (or one action invocation chain —
//! lookahead folds trailing enfix calls into the same step, which is
//! what lets `x: 1 + 2` capture `3` rather than `1`).
//!
//! Enfix dispatch is decided here, by observing the flag on the
//! *variable* that holds an action during lookahead; the action itself
//! carries no infixness.

use core_value::{Cell, CellFlags, Kind, Payload, Specifier};
use tracing::trace;

use crate::error::ErrId;
use crate::feed::FeedFlags;
use crate::level::LevelFlags;
use crate::machine::Machine;
use crate::raise::Raise;

/// Result of one evaluator step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// A value (or invisible result) was produced; more input remains
    /// possible.
    Done,
    /// The feed was already exhausted.
    End,
}

/// What a top-level run produced, QUIT distinguished for the host's
/// exit-status mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Value(Option<Cell>),
    Quit(i64),
}

impl Machine {
    /// Scan and evaluate a complete source string. `Ok(None)` means the
    /// source evaluated to nothing at all (empty input or all-invisible).
    pub fn run_source(&mut self, text: &str, file: Option<&str>) -> Result<Option<Cell>, Raise> {
        match self.run_source_outcome(text, file)? {
            RunOutcome::Value(value) => Ok(value),
            RunOutcome::Quit(code) => Ok(Some(Cell::integer(code))),
        }
    }

    /// Like `run_source`, but QUIT surfaces as its own outcome.
    pub fn run_source_outcome(
        &mut self,
        text: &str,
        file: Option<&str>,
    ) -> Result<RunOutcome, Raise> {
        let block = match core_scan::scan_source(&mut self.heap, text, file) {
            Ok(block) => block,
            Err(err) => {
                let message = err.to_string();
                let text = match self.heap.make_text(&message, core_heap::SeriesFlags::MANAGED) {
                    Ok(series) => Cell::text(series),
                    Err(fault) => return Err(self.fault(fault)),
                };
                return Err(self.fail(ErrId::Scan, &[text]));
            }
        };
        let cell = Cell::array(Kind::Block, block);
        let ds_base = self.heap.ds_depth();
        let guard = self.heap.guard_cell(cell.clone());
        let result = self.eval_block_cell(&cell, Specifier::Specified);
        self.heap.drop_guards_to(guard);
        if result.is_err() {
            // Unwound without a trap; rebalance the shared stacks.
            self.heap.ds_drop_to(ds_base.min(self.heap.ds_depth()));
        }
        match result {
            Ok(out) => {
                if out.is_nihil() || out.kind() == Kind::Trash {
                    Ok(RunOutcome::Value(None))
                } else {
                    let stable = self.decay_cell(out)?;
                    Ok(RunOutcome::Value(Some(stable)))
                }
            }
            Err(Raise::Thrown) => {
                let quits = matches!(
                    self.thrown_label_ref().and_then(|c| c.word_symbol()),
                    Some(symbol) if self.heap.symbols.same_spelling(symbol, self.syms.quit)
                );
                let (label, arg) = self.take_thrown();
                if quits {
                    return Ok(RunOutcome::Quit(arg.as_integer().unwrap_or(0)));
                }
                // Any other uncaught throw at the top level is an error.
                Err(self.fail(ErrId::NoCatch, &[arg, label]))
            }
            Err(err) => Err(err),
        }
    }

    /// Evaluate an array cell (block or group) to completion, returning
    /// the final output atom. The cell's own binding wins over
    /// `fallback` when it carries one.
    pub fn eval_block_cell(
        &mut self,
        cell: &Cell,
        fallback: Specifier,
    ) -> Result<Cell, Raise> {
        let Some((series, index, binding)) = cell.as_array() else {
            return Err(self.fail(ErrId::InvalidArg, &[cell.clone()]));
        };
        let specifier = match binding.as_specifier() {
            Specifier::Specified => fallback,
            carried => carried,
        };
        self.push_level(crate::feed::Feed::new(series, index, specifier))?;
        let result = self.eval_feed_to_end();
        let mut level = self.pop_level();
        result?;
        if level.flags.contains(LevelFlags::OUT_STALE) && level.out.kind() == Kind::Trash {
            return Ok(Cell::nihil());
        }
        if level.out.kind() == Kind::Trash {
            // Nothing produced (empty block).
            return Ok(Cell::nihil());
        }
        Ok(level.out.take())
    }

    pub(crate) fn eval_feed_to_end(&mut self) -> Result<(), Raise> {
        loop {
            self.poll_signals()?;
            match self.eval_step()? {
                Step::Done => continue,
                Step::End => return Ok(()),
            }
        }
    }

    /// Fetch the pending feed item on the top level without advancing.
    fn peek_top(&self) -> Option<Cell> {
        let level = self.levels.last()?;
        level.feed.peek(&self.heap).cloned()
    }

    fn fetch_top(&mut self) -> Option<Cell> {
        let Machine { heap, levels, .. } = self;
        levels.last_mut()?.feed.fetch(heap)
    }

    /// One full step, with lookahead, resolving into the top level's
    /// out slot.
    pub(crate) fn eval_step(&mut self) -> Result<Step, Raise> {
        self.eval_step_maybe_lookahead(true)
    }

    /// One step with lookahead optionally suppressed: fulfilling an
    /// enfix invocation's arguments defers trailing enfix to the outer
    /// step, which is what keeps `1 + 2 * 3` left to right.
    pub(crate) fn eval_step_maybe_lookahead(
        &mut self,
        lookahead: bool,
    ) -> Result<Step, Raise> {
        // A barrier only seals the step it ended; the next expression
        // starts unencumbered.
        self.top().feed.flags.remove(FeedFlags::BARRIER_HIT);
        let Some(cell) = self.fetch_top() else {
            return Ok(Step::End);
        };
        let specifier = self.specifier_of_top();
        trace!(kind = ?cell.kind(), "eval step");

        match cell.kind() {
            // An expression barrier vanishes but seals the out slot
            // against enfix continuation.
            Kind::Comma => {
                let top = self.top();
                top.feed.flags.insert(FeedFlags::BARRIER_HIT);
                top.flags.insert(LevelFlags::OUT_STALE);
                return Ok(Step::Done);
            }
            _ => {}
        }

        if cell.is_quoted() {
            let mut value = self.derelativize(cell.unquoted(), specifier);
            value.set_flag(CellFlags::UNEVALUATED);
            self.set_out(value);
            if lookahead {
                self.lookahead()?;
            }
            return Ok(Step::Done);
        }

        match cell.kind() {
            Kind::Word => {
                let (value, enfix) = self.get_var(&cell, specifier)?;
                if value.is_action() {
                    let label = cell.word_symbol();
                    // A directly fetched enfix variable reaches back for
                    // the previous output — unless a barrier (or an
                    // invisible step) already sealed it.
                    let sealed = self.top_ref().flags.contains(LevelFlags::OUT_STALE);
                    self.invoke_action(&value, label, enfix && !sealed, None)?;
                } else {
                    let mut value = value;
                    value.clear_flag(CellFlags::ENFIXED);
                    self.set_out(value);
                }
                if lookahead {
                    self.lookahead()?;
                }
                Ok(Step::Done)
            }
            Kind::GetWord => {
                let location = self.locate_word(&cell, specifier, false)?;
                let mut value = self.read_location(location)?;
                value.clear_flag(CellFlags::ENFIXED);
                self.set_out(value);
                if lookahead {
                    self.lookahead()?;
                }
                Ok(Step::Done)
            }
            Kind::SetWord => {
                match self.eval_step()? {
                    Step::Done => {}
                    Step::End => return Err(self.fail(ErrId::NeedsValue, &[cell.clone()])),
                }
                let out = self.top_ref().out.clone();
                let value = self.decay_cell(out)?;
                self.set_var(&cell, specifier, value.clone(), None)?;
                self.set_out(value);
                Ok(Step::Done)
            }
            Kind::Group => {
                let result = self.eval_block_cell(&cell, specifier)?;
                if result.is_nihil() {
                    self.top().flags.insert(LevelFlags::OUT_STALE);
                } else {
                    self.set_out(result);
                }
                if lookahead {
                    self.lookahead()?;
                }
                Ok(Step::Done)
            }
            Kind::Path => {
                self.eval_path(&cell, specifier)?;
                if lookahead {
                    self.lookahead()?;
                }
                Ok(Step::Done)
            }
            Kind::GetPath => {
                self.eval_get_path(&cell, specifier)?;
                if lookahead {
                    self.lookahead()?;
                }
                Ok(Step::Done)
            }
            Kind::SetPath => {
                self.eval_set_path(&cell, specifier)?;
                Ok(Step::Done)
            }
            kind if kind.is_inert() => {
                let value = self.derelativize(cell, specifier);
                self.set_out(value);
                if lookahead {
                    self.lookahead()?;
                }
                Ok(Step::Done)
            }
            Kind::Null | Kind::Trash => {
                self.set_out(cell);
                if lookahead {
                    self.lookahead()?;
                }
                Ok(Step::Done)
            }
            Kind::Action => {
                // A literal action in a feed invokes (APPLY-style reuse
                // of reified feeds relies on this).
                self.invoke_action(&cell, None, false, None)?;
                if lookahead {
                    self.lookahead()?;
                }
                Ok(Step::Done)
            }
            other => {
                let _ = other;
                Err(self.fail(ErrId::InvalidArg, &[cell]))
            }
        }
    }

    /// Peek for a trailing enfix-flagged variable and fold its
    /// invocation into the current step.
    fn lookahead(&mut self) -> Result<(), Raise> {
        loop {
            if self
                .top_ref()
                .feed
                .flags
                .contains(FeedFlags::BARRIER_HIT)
            {
                return Ok(());
            }
            let Some(next) = self.peek_top() else {
                return Ok(());
            };
            if next.kind() != Kind::Word {
                return Ok(());
            }
            let specifier = self.specifier_of_top();
            // Unbound or erroring lookups are not lookahead's concern;
            // the next step will surface them.
            let Ok(location) = self.locate_word(&next, specifier, false) else {
                return Ok(());
            };
            let Ok(value) = self.read_location(location) else {
                return Ok(());
            };
            if !value.has_flag(CellFlags::ENFIXED) || !value.is_action() {
                return Ok(());
            }
            let fetched = self.fetch_top().expect("peeked value fetches");
            let label = fetched.word_symbol();
            self.invoke_action(&value, label, true, None)?;
        }
    }

    /// Settle an evaluator output atom for storage or for handing to an
    /// embedder: `None` when it evaluated to nothing.
    pub fn settle(&mut self, out: Cell) -> Result<Option<Cell>, Raise> {
        if out.is_nihil() || out.kind() == Kind::Trash {
            return Ok(None);
        }
        self.decay_cell(out).map(Some)
    }

    /// Force unstable isotopes into storable values: packs yield their
    /// first element, nihil becomes blank.
    pub(crate) fn decay_cell(&mut self, cell: Cell) -> Result<Cell, Raise> {
        match cell.kind() {
            Kind::Nihil => Ok(Cell::blank()),
            Kind::Pack => {
                let Payload::Array { series, .. } = cell.payload() else {
                    return Ok(Cell::blank());
                };
                let first = match self.heap.array_cell(*series, 0) {
                    Ok(first) if !first.is_end() => first.clone(),
                    Ok(_) => return Ok(Cell::blank()),
                    Err(fault) => return Err(self.fault(fault)),
                };
                self.decay_cell(first)
            }
            _ => Ok(cell),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;

    #[test]
    fn unstable_isotopes_decay_before_storage() {
        let mut m = Machine::startup().expect("boot");
        assert_eq!(m.settle(Cell::nihil()).unwrap(), None);

        // A pack decays to its first element; an empty pack to blank.
        let tuple = m
            .heap
            .make_array(2, core_heap::SeriesFlags::MANAGED)
            .unwrap();
        m.heap.array_push(tuple, Cell::integer(5)).unwrap();
        m.heap.array_push(tuple, Cell::integer(6)).unwrap();
        let decayed = m.decay_cell(Cell::pack(tuple)).unwrap();
        assert_eq!(decayed.as_integer(), Some(5));

        let empty = m
            .heap
            .make_array(0, core_heap::SeriesFlags::MANAGED)
            .unwrap();
        let decayed = m.decay_cell(Cell::pack(empty)).unwrap();
        assert_eq!(decayed.kind(), Kind::Blank);
    }
}
