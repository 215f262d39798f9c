//! Specialization: new callables with some arguments fixed.
//!
//! The exemplar frame carries the fixed values; its keylist's hidden
//! flags are the facade (callers never see specialized slots). Partial
//! refinements — supplied without all their arguments — keep ordering
//! priority in the action's partials list: their position *is* the
//! order in which a later callsite's arguments reach them.
//!
//! The resulting action dispatches through the specializer, which only
//! substitutes the phase to the underlying action and asks for an
//! unchecked redo; the underlying dispatcher then runs against the
//! already-merged varlist.

use std::rc::Rc;

use core_heap::{ContextKind, KeyFlags, ParamClass};
use core_value::{Binding, Cell, ContextId, Kind, Specifier, SymbolId};

use crate::error::ErrId;
use crate::machine::Machine;
use crate::raise::{Bounce, Raise};

/// The dispatcher for specialized actions.
pub(crate) fn dispatch_specializer(m: &mut Machine) -> Result<Bounce, Raise> {
    let phase = m.top_ref().phase.expect("specializer without phase");
    let underlying = match m.heap.action(phase) {
        Ok(action) => action.underlying.expect("specializer without underlying"),
        Err(fault) => return Err(m.fault(fault)),
    };
    m.top().phase = Some(underlying);
    Ok(Bounce::Redo { checked: false })
}

impl Machine {
    /// `:action/ref/ref` — a specialization that fixes nothing but adds
    /// partial refinements, ordered after any the action already had.
    pub(crate) fn specialize_partials(
        &mut self,
        action_value: &Cell,
        refinements: &[SymbolId],
        label: Option<SymbolId>,
    ) -> Result<Cell, Raise> {
        let Some((base_id, _)) = action_value.as_action() else {
            return Err(self.fail(ErrId::NotAnAction, &[action_value.clone()]));
        };
        let (params, exemplar, mut partials, details, base_label) = {
            let base = match self.heap.action(base_id) {
                Ok(base) => base,
                Err(fault) => return Err(self.fault(fault)),
            };
            (
                Rc::clone(&base.params),
                base.exemplar,
                base.partials.clone(),
                base.details,
                base.label,
            )
        };
        for symbol in refinements {
            let word = Cell::word(Kind::Refinement, *symbol);
            let Some(index) = params.find(&self.heap, *symbol) else {
                return Err(self.fail(ErrId::BadRefinement, &[word]));
            };
            if !params.params[index].is_refinement() {
                return Err(self.fail(ErrId::BadRefinement, &[word]));
            }
            if partials
                .iter()
                .any(|p| self.heap.symbols.same_spelling(*p, *symbol))
            {
                return Err(self.fail(ErrId::BadRefinement, &[word]));
            }
            partials.push(*symbol);
        }

        let id = self
            .heap
            .make_action(params, details, self.specializer_dispatcher, label.or(base_label));
        {
            let action = self.heap.action_mut(id).expect("action just made");
            action.exemplar = exemplar;
            action.partials = partials;
            action.underlying = Some(base_id);
        }
        Ok(Cell::action(id))
    }

    /// The SPECIALIZE machinery: build an exemplar frame, let user code
    /// fill it, then classify slots into hidden / partial / visible.
    pub(crate) fn specialize_with_block(
        &mut self,
        action_value: &Cell,
        block: &Cell,
    ) -> Result<Cell, Raise> {
        let Some((base_id, _)) = action_value.as_action() else {
            return Err(self.fail(ErrId::NotAnAction, &[action_value.clone()]));
        };
        let (params, base_exemplar, base_partials, details, base_label) = {
            let base = match self.heap.action(base_id) {
                Ok(base) => base,
                Err(fault) => return Err(self.fault(fault)),
            };
            (
                Rc::clone(&base.params),
                base.exemplar,
                base.partials.clone(),
                base.details,
                base.label,
            )
        };

        // Exemplar under construction: owned by this function until the
        // build completes; a trap mid-way frees it instead of leaking.
        let exemplar = self.make_exemplar(&params, base_exemplar, &base_partials)?;
        let filled = self.eval_block_cell(block, Specifier::Context(exemplar));
        if let Err(raise) = filled {
            let _ = self.heap.free_unmanaged_context(exemplar);
            return Err(raise);
        }

        // Classify. Partials keep their integer-marker order; an evoked
        // refinement (arguments set, switch untouched) goes to lowest
        // priority, and only one evocation is allowed.
        let mut partials: Vec<(i64, SymbolId)> = Vec::new();
        let mut evoked: Option<SymbolId> = None;
        let mut hide: Vec<usize> = Vec::new();
        for (i, param) in params.params.iter().enumerate() {
            if param.class != ParamClass::Refinement {
                continue;
            }
            let slot = match self.heap.context_var(exemplar, i + 1) {
                Ok(slot) => slot.clone(),
                Err(fault) => return Err(self.fault(fault)),
            };
            let args = params.refinement_args(i);
            let args_filled: Vec<bool> = args
                .iter()
                .map(|&a| {
                    self.heap
                        .context_var(exemplar, a + 1)
                        .map(|c| !matches!(c.kind(), Kind::Trash | Kind::Null))
                        .unwrap_or(false)
                })
                .collect();
            let any_filled = args_filled.iter().any(|f| *f);
            let all_filled = args_filled.iter().all(|f| *f);

            match slot.kind() {
                Kind::Integer => {
                    // Ordering marker from a partial specialization.
                    // If the code block filled every argument anyway,
                    // the refinement transitions to fully on.
                    if all_filled && !args.is_empty() {
                        self.set_exemplar_slot(exemplar, i, Cell::logic(true))?;
                        hide.push(i);
                        hide.extend(args.iter().copied());
                    } else {
                        let marker = slot.as_integer().unwrap_or(i64::MAX);
                        partials.push((marker, param.symbol));
                        self.set_exemplar_slot(exemplar, i, Cell::null())?;
                    }
                }
                Kind::Logic => {
                    hide.push(i);
                    if slot.as_logic() == Some(false) {
                        hide.extend(args.iter().copied());
                    } else {
                        for (&a, &filled) in args.iter().zip(args_filled.iter()) {
                            if filled {
                                hide.push(a);
                            }
                        }
                    }
                }
                Kind::Refinement => {
                    // Explicit partial: active, but arguments arrive at
                    // call time.
                    partials.push((i64::MAX - 1, param.symbol));
                    self.set_exemplar_slot(exemplar, i, Cell::null())?;
                }
                _ => {
                    if any_filled {
                        // Evoked by example: switch on implicitly.
                        if all_filled {
                            self.set_exemplar_slot(exemplar, i, Cell::logic(true))?;
                            hide.push(i);
                            hide.extend(args.iter().copied());
                        } else {
                            if evoked.is_some() {
                                let first = Cell::word(Kind::Refinement, evoked.unwrap());
                                let second = Cell::word(Kind::Refinement, param.symbol);
                                let _ = self.heap.free_unmanaged_context(exemplar);
                                return Err(self.fail(ErrId::DoubleEvoke, &[first, second]));
                            }
                            evoked = Some(param.symbol);
                        }
                    }
                }
            }
        }

        // Plain arguments that got values become hidden (and typecheck
        // now, so callers never see a mistyped specialization).
        for (i, param) in params.params.iter().enumerate() {
            if !param.takes_argument() {
                continue;
            }
            if hide.contains(&i) {
                continue;
            }
            let slot = match self.heap.context_var(exemplar, i + 1) {
                Ok(slot) => slot.clone(),
                Err(fault) => return Err(self.fault(fault)),
            };
            if matches!(slot.kind(), Kind::Trash | Kind::Null) {
                continue;
            }
            if !param.types.has(slot.heart()) {
                let type_word = self.word_cell(slot.heart().name());
                let param_word = Cell::word(Kind::Word, param.symbol);
                let _ = self.heap.free_unmanaged_context(exemplar);
                return Err(self.fail(
                    ErrId::TypeMismatch,
                    &[Cell::blank(), type_word, param_word],
                ));
            }
            hide.push(i);
        }

        for i in hide {
            match self.heap.context_key_flags_mut(exemplar, i + 1) {
                Ok(flags) => *flags = KeyFlags::HIDDEN | KeyFlags::UNBINDABLE,
                Err(fault) => return Err(self.fault(fault)),
            }
        }

        partials.sort_by_key(|(marker, _)| *marker);
        let mut partial_syms: Vec<SymbolId> = partials.into_iter().map(|(_, s)| s).collect();
        if let Some(symbol) = evoked {
            partial_syms.push(symbol);
        }

        if let Err(fault) = self.heap.manage_context(exemplar) {
            return Err(self.fault(fault));
        }
        let id = self.heap.make_action(
            params,
            details,
            self.specializer_dispatcher,
            base_label,
        );
        {
            let action = self.heap.action_mut(id).expect("action just made");
            action.exemplar = Some(exemplar);
            action.partials = partial_syms;
            action.underlying = Some(base_id);
        }
        Ok(Cell::action(id))
    }

    /// Build the exemplar varlist for an action: previously specialized
    /// slots copied, partial refinements stamped with ordering markers
    /// and hidden from the fill code, the rest left null and bindable.
    pub(crate) fn make_exemplar(
        &mut self,
        params: &Rc<core_heap::ParamList>,
        base_exemplar: Option<ContextId>,
        base_partials: &[SymbolId],
    ) -> Result<ContextId, Raise> {
        let ctx = match self.heap.make_context(ContextKind::Frame, params.len()) {
            Ok(ctx) => ctx,
            Err(fault) => return Err(self.fault(fault)),
        };
        let base_hidden: Vec<bool> = match base_exemplar {
            Some(base) => match self.heap.context(base) {
                Ok(context) => context
                    .keylist
                    .keys
                    .iter()
                    .map(|k| k.flags.contains(KeyFlags::HIDDEN))
                    .collect(),
                Err(fault) => return Err(self.fault(fault)),
            },
            None => vec![false; params.len()],
        };
        for (i, param) in params.params.iter().enumerate() {
            let initial = if base_hidden.get(i).copied().unwrap_or(false) {
                match base_exemplar.map(|b| self.heap.context_var(b, i + 1)) {
                    Some(Ok(cell)) => cell.clone(),
                    _ => Cell::null(),
                }
            } else if let Some(position) = base_partials
                .iter()
                .position(|p| self.heap.symbols.same_spelling(*p, param.symbol))
            {
                Cell::integer(position as i64)
            } else {
                Cell::null()
            };
            if let Err(fault) = self.heap.context_append(ctx, param.symbol, initial) {
                return Err(self.fault(fault));
            }
        }
        // Hide what the base facade hid, plus the ordering markers, so
        // the fill code can neither see nor rebind them.
        for (i, param) in params.params.iter().enumerate() {
            let is_partial_marker = base_partials
                .iter()
                .any(|p| self.heap.symbols.same_spelling(*p, param.symbol));
            if base_hidden.get(i).copied().unwrap_or(false) || is_partial_marker {
                match self.heap.context_key_flags_mut(ctx, i + 1) {
                    Ok(flags) => *flags = KeyFlags::HIDDEN | KeyFlags::UNBINDABLE,
                    Err(fault) => return Err(self.fault(fault)),
                }
            }
        }
        Ok(ctx)
    }

    fn set_exemplar_slot(
        &mut self,
        exemplar: ContextId,
        index: usize,
        value: Cell,
    ) -> Result<(), Raise> {
        self.heap
            .context_var_set(exemplar, index + 1, value)
            .map_err(|fault| self.fault(fault))
    }

    // --- user-visible frames ----------------------------------------------

    /// MAKE FRAME! — a user-visible frame whose slots mirror the
    /// action's facade.
    pub(crate) fn make_frame_for_action(&mut self, action_value: &Cell) -> Result<Cell, Raise> {
        let Some((action_id, _)) = action_value.as_action() else {
            return Err(self.fail(ErrId::NotAnAction, &[action_value.clone()]));
        };
        let (params, exemplar, partials) = {
            let action = match self.heap.action(action_id) {
                Ok(action) => action,
                Err(fault) => return Err(self.fault(fault)),
            };
            (
                Rc::clone(&action.params),
                action.exemplar,
                action.partials.clone(),
            )
        };
        let ctx = self.make_exemplar(&params, exemplar, &partials)?;
        if let Err(fault) = self.heap.manage_context(ctx) {
            return Err(self.fault(fault));
        }
        {
            let context = self.heap.context_mut(ctx).expect("frame just built");
            context.phase = Some(action_id);
        }
        Ok(Cell::context(Kind::Frame, ctx))
    }

    /// Run a frame: clone it, turn filled refinement arguments into
    /// active refinements, and dispatch the frame's action against it.
    pub(crate) fn do_frame(&mut self, frame_value: &Cell) -> Result<Cell, Raise> {
        let Some(frame_ctx) = frame_value.as_context() else {
            return Err(self.fail(ErrId::InvalidArg, &[frame_value.clone()]));
        };
        let action_id = match self.heap.context(frame_ctx) {
            Ok(context) => match context.phase {
                Some(action_id) => action_id,
                None => return Err(self.fail(ErrId::ExpiredFrame, &[frame_value.clone()])),
            },
            Err(fault) => return Err(self.fault(fault)),
        };
        let params = {
            let action = match self.heap.action(action_id) {
                Ok(action) => action,
                Err(fault) => return Err(self.fault(fault)),
            };
            Rc::clone(&action.params)
        };

        // A frame may be reused; each run gets a private copy.
        let ctx = match self.heap.context_clone_shape(frame_ctx, ContextKind::Frame) {
            Ok(ctx) => ctx,
            Err(fault) => return Err(self.fault(fault)),
        };
        let mut skipped: Vec<usize> = Vec::new();
        for (i, param) in params.params.iter().enumerate() {
            let slot = match self.heap.context_var(ctx, i + 1) {
                Ok(slot) => slot.clone(),
                Err(fault) => return Err(self.fault(fault)),
            };
            match param.class {
                ParamClass::Return => {
                    self.set_exemplar_slot(ctx, i, Cell::bound_action(
                        self.return_action,
                        Binding::Specific(ctx),
                    ))?;
                }
                ParamClass::Refinement => {
                    let args = params.refinement_args(i);
                    let any_filled = args.iter().any(|&a| {
                        self.heap
                            .context_var(ctx, a + 1)
                            .map(|c| !matches!(c.kind(), Kind::Trash | Kind::Null))
                            .unwrap_or(false)
                    });
                    if slot.truthiness() == Some(true) || any_filled {
                        self.set_exemplar_slot(ctx, i, Cell::logic(true))?;
                    } else {
                        self.set_exemplar_slot(ctx, i, Cell::blank())?;
                        for &a in &args {
                            self.set_exemplar_slot(ctx, a, Cell::blank())?;
                            skipped.push(a);
                        }
                    }
                }
                _ if param.takes_argument() => {
                    if skipped.contains(&i) {
                        continue;
                    }
                    if matches!(slot.kind(), Kind::Trash | Kind::Null) {
                        let word = Cell::word(Kind::Word, param.symbol);
                        return Err(self.fail(ErrId::NeedsValue, &[word]));
                    }
                    if !param.types.has(slot.heart()) {
                        let type_word = self.word_cell(slot.heart().name());
                        let param_word = Cell::word(Kind::Word, param.symbol);
                        return Err(self.fail(
                            ErrId::TypeMismatch,
                            &[Cell::blank(), type_word, param_word],
                        ));
                    }
                }
                _ => {}
            }
        }
        if let Err(fault) = self.heap.manage_context(ctx) {
            return Err(self.fault(fault));
        }

        let dispatcher = match self.heap.action(action_id) {
            Ok(action) => action.dispatcher,
            Err(fault) => return Err(self.fault(fault)),
        };
        let feed = self.exhausted_feed();
        self.push_level(feed)?;
        let result = self.dispatch_frame(ctx, action_id, Binding::Unbound, None, dispatcher);
        let level = self.pop_level();
        result.map(|_| level.out)
    }
}
