//! Action invocation: frame construction, argument fulfillment,
//! refinement pickup ordering, and the dispatch trampoline.
//!
//! Fulfillment walks the paramlist in order. Arguments of refinements
//! that were supplied out of order (callsite paths like `foo/b/a`, or
//! partials kept by a specialization) are not gathered during the main
//! walk; instead each such refinement is queued, and after the walk the
//! queue is drained *in priority order* — exemplar partials first, then
//! callsite pushes in push order. The queue rides the data stack
//! protocol: path evaluation pushes refinement words above `dsp_base`
//! and fulfillment consumes them.

use std::rc::Rc;

use core_heap::{ContextKind, KeyFlags, Param, ParamClass, ParamFlags, ParamList};
use core_value::{Binding, Cell, CellFlags, ContextId, Kind, Specifier, SymbolId};
use tracing::trace;

use crate::error::ErrId;
use crate::level::{LevelFlags, Pending};
use crate::machine::Machine;
use crate::raise::{Bounce, Raise};
use crate::step::Step;

/// Everything one invocation's fulfillment walk needs to know.
struct FulfillPlan<'a> {
    ctx: ContextId,
    params: &'a Rc<ParamList>,
    exemplar: Option<ContextId>,
    ordered: &'a [usize],
    hidden: &'a [bool],
    label: Option<SymbolId>,
    first_from_out: bool,
    dsp_base: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgScope {
    /// Arguments gather from the feed as the walk reaches them.
    Positional,
    /// Refinement is off; its arguments stay blank.
    SkipArgs,
    /// Refinement is scheduled for pickup; arguments wait.
    DeferArgs,
}

impl Machine {
    /// Invoke an action value, leaving the result in the current top
    /// level's out slot. `first_from_out` is the enfix staging: the
    /// first visible argument comes from `out` instead of the feed.
    /// `dsp_base` bounds the callsite refinement pushes (path calls).
    pub(crate) fn invoke_action(
        &mut self,
        action_value: &Cell,
        label: Option<SymbolId>,
        first_from_out: bool,
        dsp_base: Option<usize>,
    ) -> Result<(), Raise> {
        let Some((action_id, coupling)) = action_value.as_action() else {
            return Err(self.fail(ErrId::NotAnAction, &[action_value.clone()]));
        };
        let dsp_base = dsp_base.unwrap_or_else(|| self.heap.ds_depth());

        let (params, exemplar, partials, dispatcher, default_label) = {
            let action = match self.heap.action(action_id) {
                Ok(action) => action,
                Err(fault) => return Err(self.fault(fault)),
            };
            (
                Rc::clone(&action.params),
                action.exemplar,
                action.partials.clone(),
                action.dispatcher,
                action.label,
            )
        };
        let label = label.or(default_label);
        trace!(label = ?label.map(|s| self.heap.symbols.text(s).to_string()), "invoke");

        // Callsite refinement pushes, in push order.
        let mut callsite: Vec<SymbolId> = Vec::new();
        for i in dsp_base..self.heap.ds_depth() {
            match self.heap.ds_at(i).word_symbol() {
                Some(symbol) => callsite.push(symbol),
                None => return Err(self.fail(ErrId::BadRefinement, &[self.heap.ds_at(i).clone()])),
            }
        }

        // The combined priority order: stored partials outrank fresh
        // callsite refinements.
        let mut ordered: Vec<usize> = Vec::new();
        for symbol in partials.iter().chain(callsite.iter()) {
            let word = Cell::word(Kind::Refinement, *symbol);
            let Some(index) = params.find(&self.heap, *symbol) else {
                return Err(self.fail(ErrId::BadRefinement, &[word]));
            };
            if !params.params[index].is_refinement() || ordered.contains(&index) {
                return Err(self.fail(ErrId::BadRefinement, &[word]));
            }
            ordered.push(index);
        }

        let hidden = self.hidden_mask(&params, exemplar);

        // Frame construction: keys and vars in lockstep, then hide the
        // facade-invisible slots.
        let ctx = match self.heap.make_context(ContextKind::Frame, params.len()) {
            Ok(ctx) => ctx,
            Err(fault) => return Err(self.fault(fault)),
        };
        for (i, param) in params.params.iter().enumerate() {
            let initial = self.initial_var(param, i, exemplar, &hidden, ctx);
            if let Err(fault) = self.heap.context_append(ctx, param.symbol, initial) {
                return Err(self.fault(fault));
            }
        }
        for (i, param) in params.params.iter().enumerate() {
            if hidden[i] || param.flags.contains(ParamFlags::HIDDEN) {
                match self.heap.context_key_flags_mut(ctx, i + 1) {
                    Ok(flags) => *flags = KeyFlags::HIDDEN | KeyFlags::UNBINDABLE,
                    Err(fault) => return Err(self.fault(fault)),
                }
            }
        }

        // Manage now and pin the frame for the duration: argument
        // sub-evaluations below can trigger a collection, and nothing
        // else references this context yet.
        if let Err(fault) = self.heap.manage_context(ctx) {
            return Err(self.fault(fault));
        }
        let guard = self.heap.guard_cell(Cell::context(Kind::Frame, ctx));
        let result = self
            .fulfill_frame(FulfillPlan {
                ctx,
                params: &params,
                exemplar,
                ordered: &ordered,
                hidden: &hidden,
                label,
                first_from_out,
                dsp_base,
            })
            .and_then(|_| self.dispatch_frame(ctx, action_id, coupling, label, dispatcher));
        self.heap.drop_guards_to(guard);
        result
    }

    /// The fulfillment walk and pickups, filling `ctx`'s variable slots
    /// from the exemplar, the staged out cell, and the feed.
    fn fulfill_frame(&mut self, plan: FulfillPlan<'_>) -> Result<(), Raise> {
        let FulfillPlan {
            ctx,
            params,
            exemplar,
            ordered,
            hidden,
            label,
            first_from_out,
            dsp_base,
        } = plan;
        // Arguments of an enfix invocation defer their trailing
        // lookahead to the outer step; this keeps infix chains left to
        // right.
        let defer = first_from_out;
        // Main fulfillment walk.
        let mut scope = ArgScope::Positional;
        let mut take_from_out = first_from_out;
        let mut checked: Vec<usize> = Vec::new();
        for (i, param) in params.params.iter().enumerate() {
            if hidden[i] {
                checked.push(i);
                // A specialized-on refinement still demands its unfilled
                // arguments positionally; a specialized-off one skips
                // them.
                if param.is_refinement() {
                    scope = if self.exemplar_logic(exemplar, i) == Some(true) {
                        ArgScope::Positional
                    } else {
                        ArgScope::SkipArgs
                    };
                }
                continue;
            }
            match param.class {
                ParamClass::Return | ParamClass::Local => {}
                ParamClass::Refinement => {
                    if ordered.contains(&i) {
                        self.write_frame_var(ctx, i + 1, Cell::logic(true))?;
                        scope = ArgScope::DeferArgs;
                    } else if self.exemplar_logic(exemplar, i) == Some(true) {
                        self.write_frame_var(ctx, i + 1, Cell::logic(true))?;
                        scope = ArgScope::Positional;
                    } else {
                        self.write_frame_var(ctx, i + 1, Cell::blank())?;
                        scope = ArgScope::SkipArgs;
                    }
                }
                _ if param.flags.contains(ParamFlags::VARIADIC) => {
                    let serial = self.top_ref().serial;
                    self.write_frame_var(ctx, i + 1, Cell::varargs(serial))?;
                }
                _ => match scope {
                    ArgScope::SkipArgs => {
                        self.write_frame_var(ctx, i + 1, Cell::blank())?;
                    }
                    ArgScope::DeferArgs => {}
                    ArgScope::Positional => {
                        let value = if take_from_out {
                            take_from_out = false;
                            let out = self.top_ref().out.clone();
                            self.decay_cell(out)?
                        } else {
                            self.fulfill_from_feed(param, label, defer)?
                        };
                        self.write_frame_var(ctx, i + 1, value)?;
                        checked.push(i);
                    }
                },
            }
        }

        // Pickups: divert fulfillment to each scheduled refinement's
        // argument slots, highest priority first.
        for &refinement in ordered {
            for arg in params.refinement_args(refinement) {
                if hidden[arg] {
                    continue;
                }
                let value = self.fulfill_from_feed(&params.params[arg], label, defer)?;
                self.write_frame_var(ctx, arg + 1, value)?;
                checked.push(arg);
            }
        }

        self.heap.ds_drop_to(dsp_base);

        // Typecheck everything gathered (exemplar-specialized values
        // were checked when the specialization was made).
        for &i in &checked {
            let param = &params.params[i];
            if !param.takes_argument() {
                continue;
            }
            let value = match self.heap.context_var(ctx, i + 1) {
                Ok(value) => value.clone(),
                Err(fault) => return Err(self.fault(fault)),
            };
            // An endable parameter's end-of-feed null stands outside the
            // declared types.
            if value.kind() == Kind::Null && param.flags.contains(ParamFlags::ENDABLE) {
                continue;
            }
            if !param.types.has(value.heart()) {
                let action_word = label
                    .map(|s| Cell::word(Kind::Word, s))
                    .unwrap_or_else(Cell::blank);
                let type_word = self.word_cell(value.heart().name());
                let param_word = Cell::word(Kind::Word, param.symbol);
                return Err(self.fail(
                    ErrId::TypeMismatch,
                    &[action_word, type_word, param_word],
                ));
            }
        }

        Ok(())
    }

    /// Visibility mask: slots hidden by the exemplar's facade.
    fn hidden_mask(&self, params: &ParamList, exemplar: Option<ContextId>) -> Vec<bool> {
        let mut hidden = vec![false; params.len()];
        if let Some(exemplar) = exemplar {
            if let Ok(context) = self.heap.context(exemplar) {
                for (i, key) in context.keylist.keys.iter().enumerate() {
                    if i < hidden.len() && key.flags.contains(KeyFlags::HIDDEN) {
                        hidden[i] = true;
                    }
                }
            }
        }
        hidden
    }

    fn exemplar_logic(&self, exemplar: Option<ContextId>, index: usize) -> Option<bool> {
        let exemplar = exemplar?;
        self.heap
            .context_var(exemplar, index + 1)
            .ok()
            .and_then(|cell| cell.as_logic())
    }

    fn initial_var(
        &mut self,
        param: &Param,
        index: usize,
        exemplar: Option<ContextId>,
        hidden: &[bool],
        ctx: ContextId,
    ) -> Cell {
        if hidden[index] {
            if let Some(exemplar) = exemplar {
                if let Ok(value) = self.heap.context_var(exemplar, index + 1) {
                    return value.clone();
                }
            }
        }
        match param.class {
            ParamClass::Return => {
                Cell::bound_action(self.return_action, Binding::Specific(ctx))
            }
            _ => Cell::trash(),
        }
    }

    fn write_frame_var(&mut self, ctx: ContextId, index: usize, value: Cell) -> Result<(), Raise> {
        self.heap
            .context_var_set(ctx, index, value)
            .map_err(|fault| self.fault(fault))
    }

    /// Gather one argument from the feed according to the parameter's
    /// quoting class.
    fn fulfill_from_feed(
        &mut self,
        param: &Param,
        label: Option<SymbolId>,
        defer_lookahead: bool,
    ) -> Result<Cell, Raise> {
        let specifier = self.specifier_of_top();
        match param.class {
            ParamClass::Normal => match self.eval_step_maybe_lookahead(!defer_lookahead)? {
                Step::Done => {
                    let out = self.top_ref().out.clone();
                    self.decay_cell(out)
                }
                Step::End => self.end_of_args(param, label),
            },
            ParamClass::HardQuote => match self.fetch_for_quote() {
                Some(cell) => {
                    let mut value = self.derelativize(cell, specifier);
                    value.set_flag(CellFlags::UNEVALUATED);
                    Ok(value)
                }
                None => self.end_of_args(param, label),
            },
            ParamClass::SoftQuote => match self.fetch_for_quote() {
                Some(cell) => match cell.kind() {
                    Kind::Group => {
                        let result = self.eval_block_cell(&cell, specifier)?;
                        self.decay_cell(result)
                    }
                    Kind::GetWord => {
                        let location = self.locate_word(&cell, specifier, false)?;
                        self.read_location(location)
                    }
                    _ => {
                        let mut value = self.derelativize(cell, specifier);
                        value.set_flag(CellFlags::UNEVALUATED);
                        Ok(value)
                    }
                },
                None => self.end_of_args(param, label),
            },
            _ => Ok(Cell::trash()),
        }
    }

    fn fetch_for_quote(&mut self) -> Option<Cell> {
        let Machine { heap, levels, .. } = self;
        levels.last_mut()?.feed.fetch(heap)
    }

    fn end_of_args(&mut self, param: &Param, label: Option<SymbolId>) -> Result<Cell, Raise> {
        if param.flags.contains(ParamFlags::ENDABLE) {
            return Ok(Cell::null());
        }
        let action_word = label
            .map(|s| Cell::word(Kind::Word, s))
            .unwrap_or_else(Cell::blank);
        let param_word = Cell::word(Kind::Word, param.symbol);
        Err(self.fail(ErrId::ExpectArg, &[action_word, param_word]))
    }

    /// Push the dispatch level and drive the trampoline until the
    /// dispatcher produces a result (or unwinds).
    pub(crate) fn dispatch_frame(
        &mut self,
        ctx: ContextId,
        action_id: core_value::ActionId,
        coupling: Binding,
        label: Option<SymbolId>,
        dispatcher: core_value::DispatcherId,
    ) -> Result<(), Raise> {
        let feed = self.exhausted_feed();
        self.push_level(feed)?;
        let serial = {
            let top = self.top();
            top.varlist = Some(ctx);
            top.phase = Some(action_id);
            top.original = Some(action_id);
            top.label = label;
            top.binding = coupling;
            top.serial
        };
        {
            let context = self
                .heap
                .context_mut(ctx)
                .expect("frame context just built");
            context.phase = Some(action_id);
            context.frame_serial = Some(serial);
        }

        let mut current = dispatcher;
        let mut invisible = false;
        loop {
            let function = self.dispatcher_fn(current);
            match function(self) {
                Ok(Bounce::Out) => break,
                Ok(Bounce::Invisible) => {
                    invisible = true;
                    break;
                }
                Ok(Bounce::Redo { checked }) => {
                    // The phase was substituted (specializer); rerun
                    // against its dispatcher on the same varlist.
                    let phase = self.top_ref().phase.expect("redo without phase");
                    if checked {
                        if let Err(raise) = self.typecheck_frame(ctx, phase, label) {
                            return self.abort_invocation(ctx, raise);
                        }
                    }
                    current = match self.heap.action(phase) {
                        Ok(action) => action.dispatcher,
                        Err(fault) => {
                            let raise = self.fault(fault);
                            return self.abort_invocation(ctx, raise);
                        }
                    };
                }
                Ok(bounce @ (Bounce::Continue | Bounce::Delegate)) => {
                    let pending = self
                        .top()
                        .pending
                        .take()
                        .expect("continuation bounce without pending request");
                    match self.run_pending(pending) {
                        Ok(value) => {
                            if matches!(bounce, Bounce::Delegate) {
                                self.top().out = value;
                                break;
                            }
                            self.top().spare = value;
                        }
                        Err(Raise::Thrown) if self.thrown_targets_frame(ctx) => {
                            let (_, arg) = self.take_thrown();
                            self.top().out = arg;
                            break;
                        }
                        Err(raise) => return self.abort_invocation(ctx, raise),
                    }
                }
                Err(Raise::Thrown) if self.thrown_targets_frame(ctx) => {
                    let (_, arg) = self.take_thrown();
                    self.top().out = arg;
                    break;
                }
                Err(raise) => return self.abort_invocation(ctx, raise),
            }
        }

        self.retire_frame(ctx);
        let level = self.pop_level();
        if invisible {
            self.top().flags.insert(LevelFlags::OUT_STALE);
        } else {
            let top = self.top();
            top.flags.remove(LevelFlags::OUT_STALE);
            top.out = level.out;
        }
        Ok(())
    }

    /// Re-verify a frame's filled arguments against a (possibly
    /// substituted) phase's parameter types; the checked form of redo.
    fn typecheck_frame(
        &mut self,
        ctx: ContextId,
        phase: core_value::ActionId,
        label: Option<SymbolId>,
    ) -> Result<(), Raise> {
        let params = match self.heap.action(phase) {
            Ok(action) => Rc::clone(&action.params),
            Err(fault) => return Err(self.fault(fault)),
        };
        for (i, param) in params.params.iter().enumerate() {
            if !param.takes_argument() {
                continue;
            }
            let value = match self.heap.context_var(ctx, i + 1) {
                Ok(value) => value.clone(),
                Err(fault) => return Err(self.fault(fault)),
            };
            if matches!(value.kind(), Kind::Blank | Kind::Trash) {
                continue; // skipped refinement arguments
            }
            if value.kind() == Kind::Null && param.flags.contains(ParamFlags::ENDABLE) {
                continue;
            }
            if !param.types.has(value.heart()) {
                let action_word = label
                    .map(|s| Cell::word(Kind::Word, s))
                    .unwrap_or_else(Cell::blank);
                let type_word = self.word_cell(value.heart().name());
                let param_word = Cell::word(Kind::Word, param.symbol);
                return Err(self.fail(
                    ErrId::TypeMismatch,
                    &[action_word, type_word, param_word],
                ));
            }
        }
        Ok(())
    }

    fn retire_frame(&mut self, ctx: ContextId) {
        if let Ok(context) = self.heap.context_mut(ctx) {
            context.invoked = true;
        }
    }

    fn abort_invocation(&mut self, ctx: ContextId, raise: Raise) -> Result<(), Raise> {
        self.retire_frame(ctx);
        self.pop_level();
        Err(raise)
    }

    /// Execute a continuation request staged by a dispatcher.
    pub(crate) fn run_pending(&mut self, pending: Pending) -> Result<Cell, Raise> {
        match pending {
            Pending::Block { value, specifier } => self.eval_block_cell(&value, specifier),
            Pending::Branch { value, with } => match value.kind() {
                Kind::Block | Kind::Group => self.eval_block_cell(&value, Specifier::Specified),
                Kind::Action => {
                    let args: Vec<Cell> = with.into_iter().collect();
                    self.invoke_with_values(&value, &args)
                }
                _ => Ok(value),
            },
        }
    }

    /// Invoke an action against a reified feed of literal values.
    pub(crate) fn invoke_with_values(
        &mut self,
        action_value: &Cell,
        args: &[Cell],
    ) -> Result<Cell, Raise> {
        let array = match self
            .heap
            .make_array(args.len(), core_heap::SeriesFlags::MANAGED)
        {
            Ok(array) => array,
            Err(fault) => return Err(self.fault(fault)),
        };
        for arg in args {
            let quoted = arg.clone().quoted(1);
            if let Err(fault) = self.heap.array_push(array, quoted) {
                return Err(self.fault(fault));
            }
        }
        self.push_level(crate::feed::Feed::new(array, 0, Specifier::Specified))?;
        let result = self.invoke_action(action_value, None, false, None);
        let level = self.pop_level();
        result.map(|_| level.out)
    }
}
