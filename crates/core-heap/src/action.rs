//! Action storage: parameter lists, exemplars, details.
//!
//! An action is a callable identity. Its paramlist is shared by
//! reference along a specialization chain; what distinguishes each link
//! is the exemplar (prefilled arguments plus hidden-key facade) and the
//! ordered list of partial refinements. The dispatcher is an index into
//! the machine's dispatcher table, so this crate stores callables
//! without naming evaluator types.

use std::rc::Rc;

use bitflags::bitflags;
use core_value::{ActionId, ContextId, DispatcherId, SeriesId, SymbolId, TypeSet};

use crate::{Heap, HeapFault};

/// How a formal argument acquires its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamClass {
    /// Evaluate one expression from the feed.
    Normal,
    /// Take the next feed item literally.
    HardQuote,
    /// Take literally, except groups and get-words evaluate.
    SoftQuote,
    /// No argument gathered; starts unset.
    Local,
    /// The definitional RETURN slot; bound per-call to the live frame.
    Return,
    /// A refinement switch; its own slot holds on/off, any following
    /// non-refinement params are its arguments.
    Refinement,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ParamFlags: u16 {
        /// Reaching end-of-feed supplies null instead of erroring.
        const ENDABLE = 1 << 0;
        /// Binds the rest of the feed as a varargs value.
        const VARIADIC = 1 << 1;
        /// Argument arrives const-flagged.
        const CONST = 1 << 2;
        /// Not visible through the facade (specialized out).
        const HIDDEN = 1 << 3;
        /// May not be bound to by user code.
        const UNBINDABLE = 1 << 4;
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub symbol: SymbolId,
    pub class: ParamClass,
    pub types: TypeSet,
    pub flags: ParamFlags,
    /// Parameter description from the spec block, if any.
    pub summary: Option<String>,
}

impl Param {
    pub fn new(symbol: SymbolId, class: ParamClass, types: TypeSet) -> Self {
        Param {
            symbol,
            class,
            types,
            flags: ParamFlags::empty(),
            summary: None,
        }
    }

    pub fn is_refinement(&self) -> bool {
        self.class == ParamClass::Refinement
    }

    /// Does fulfillment gather anything from the callsite for this slot?
    pub fn takes_argument(&self) -> bool {
        matches!(
            self.class,
            ParamClass::Normal | ParamClass::HardQuote | ParamClass::SoftQuote
        )
    }
}

#[derive(Debug, Default)]
pub struct ParamList {
    pub params: Vec<Param>,
}

impl ParamList {
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn find(&self, heap: &Heap, symbol: SymbolId) -> Option<usize> {
        self.params
            .iter()
            .position(|p| heap.symbols.same_spelling(p.symbol, symbol))
    }

    /// Indices of the argument slots belonging to the refinement at
    /// `refinement_index`: the run of argument-taking params directly
    /// after it.
    pub fn refinement_args(&self, refinement_index: usize) -> Vec<usize> {
        let mut args = Vec::new();
        for (i, param) in self.params.iter().enumerate().skip(refinement_index + 1) {
            if param.is_refinement() {
                break;
            }
            if param.takes_argument() {
                args.push(i);
            }
        }
        args
    }
}

#[derive(Debug)]
pub struct Action {
    pub params: Rc<ParamList>,
    /// Prefilled arguments; `None` for an unspecialized action.
    pub exemplar: Option<ContextId>,
    /// Partial refinements in priority order (first = consumed first).
    pub partials: Vec<SymbolId>,
    /// Dispatcher-private data (e.g. the body block).
    pub details: SeriesId,
    pub dispatcher: DispatcherId,
    pub label: Option<SymbolId>,
    /// The action a specialization stands in front of.
    pub underlying: Option<ActionId>,
    pub(crate) marked: bool,
}

pub(crate) enum ActSlot {
    Free { next: Option<u32> },
    Live(Action),
}

impl Heap {
    pub fn make_action(
        &mut self,
        params: Rc<ParamList>,
        details: SeriesId,
        dispatcher: DispatcherId,
        label: Option<SymbolId>,
    ) -> ActionId {
        let action = Action {
            params,
            exemplar: None,
            partials: Vec::new(),
            details,
            dispatcher,
            label,
            underlying: None,
            marked: false,
        };
        match self.actions_free.take() {
            Some(idx) => {
                if let ActSlot::Free { next } = self.actions[idx as usize] {
                    self.actions_free = next;
                }
                self.actions[idx as usize] = ActSlot::Live(action);
                ActionId(idx)
            }
            None => {
                self.actions.push(ActSlot::Live(action));
                ActionId(self.actions.len() as u32 - 1)
            }
        }
    }

    pub fn action(&self, id: ActionId) -> Result<&Action, HeapFault> {
        match self.actions.get(id.0 as usize) {
            Some(ActSlot::Live(action)) => Ok(action),
            _ => Err(HeapFault::StaleId),
        }
    }

    pub fn action_mut(&mut self, id: ActionId) -> Result<&mut Action, HeapFault> {
        match self.actions.get_mut(id.0 as usize) {
            Some(ActSlot::Live(action)) => Ok(action),
            _ => Err(HeapFault::StaleId),
        }
    }

    /// Follow the specialization chain down to the action whose
    /// dispatcher actually implements the behavior.
    pub fn action_core(&self, id: ActionId) -> Result<ActionId, HeapFault> {
        let mut current = id;
        while let Some(under) = self.action(current)?.underlying {
            current = under;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Heap;
    use crate::series::SeriesFlags;
    use core_value::typesets;

    #[test]
    fn refinement_argument_runs() {
        let mut h = Heap::with_defaults();
        let a = h.symbols.intern("a");
        let ra = h.symbols.intern("dup");
        let b = h.symbols.intern("count");
        let rb = h.symbols.intern("only");
        let params = ParamList {
            params: vec![
                Param::new(a, ParamClass::Normal, typesets::ANY_VALUE),
                Param::new(ra, ParamClass::Refinement, TypeSet::of(core_value::Kind::Logic)),
                Param::new(b, ParamClass::Normal, typesets::ANY_NUMBER),
                Param::new(rb, ParamClass::Refinement, TypeSet::of(core_value::Kind::Logic)),
            ],
        };
        assert_eq!(params.refinement_args(1), vec![2]);
        assert!(params.refinement_args(3).is_empty());
        let details = h.make_array(0, SeriesFlags::MANAGED).unwrap();
        let id = h.make_action(Rc::new(params), details, DispatcherId(0), Some(a));
        assert_eq!(h.action(id).unwrap().params.len(), 4);
        assert_eq!(h.action_core(id).unwrap(), id);
    }
}
