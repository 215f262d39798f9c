//! Bindings and specifiers.
//!
//! A word cell records *where its name should be resolved* as a `Binding`.
//! Relative bindings name only an action identity; they cannot be followed
//! without a specifier saying which invocation of that action is meant.
//! Specifiers form a cons-list of overlays (virtual-bind patches and frame
//! contexts) so that resolution is a pure function of `(word, specifier)`.

use crate::ids::{ActionId, ContextId, PatchId};

/// Where a word resolves, or how an array's cells should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Binding {
    /// No binding; lookup raises an unbound-word error.
    #[default]
    Unbound,
    /// Bound relative to an action's body copy. Must be resolved through
    /// a specifier that reaches a frame running that action.
    Relative(ActionId),
    /// Bound to a definite varlist (object, frame, error...). The index
    /// cached in the word still has to be verified against the keylist.
    Specific(ContextId),
    /// Attached to a module-style "sea" context; resolution searches the
    /// symbol's hitch chain rather than a positional slot.
    Sea(ContextId),
    /// Carries a virtual-binding overlay chain (a LET or loop-variable
    /// patch); arrays passed out of such scopes keep their view.
    Let(PatchId),
}

impl Binding {
    pub fn is_unbound(self) -> bool {
        matches!(self, Binding::Unbound)
    }

    pub fn is_relative(self) -> bool {
        matches!(self, Binding::Relative(_))
    }

    /// The specifier view of a binding carried by an array cell.
    pub fn as_specifier(self) -> Specifier {
        match self {
            Binding::Specific(ctx) | Binding::Sea(ctx) => Specifier::Context(ctx),
            Binding::Let(patch) => Specifier::Patch(patch),
            Binding::Unbound | Binding::Relative(_) => Specifier::Specified,
        }
    }

    /// The binding an array cell should carry to preserve a specifier.
    pub fn from_specifier(specifier: Specifier) -> Binding {
        match specifier {
            Specifier::Specified => Binding::Unbound,
            Specifier::Context(ctx) => Binding::Specific(ctx),
            Specifier::Patch(patch) => Binding::Let(patch),
        }
    }
}

/// One link of the overlay chain used to resolve relative cells.
///
/// `Specified` terminates the chain (nothing to overlay). A `Context`
/// link is a frame (resolving relative bindings whose action matches the
/// frame's phase) or a plain varlist overlay from `bind`. A `Patch` link
/// is a heap-allocated virtual-binding node carrying its own next link,
/// spliced in by LET and by virtual-bind loop constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Specifier {
    #[default]
    Specified,
    Context(ContextId),
    Patch(PatchId),
}

impl Specifier {
    pub fn is_specified(self) -> bool {
        matches!(self, Specifier::Specified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binding_is_unbound() {
        assert!(Binding::default().is_unbound());
        assert!(Binding::Relative(ActionId(3)).is_relative());
        assert!(!Binding::Specific(ContextId(0)).is_unbound());
    }
}
