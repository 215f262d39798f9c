//! The native catalog: name, parameter spec, dispatcher, and dispatch
//! style for every boot-time action.
//!
//! Specs are written in the language's own notation and run through the
//! scanner at boot, so natives and user functions share one parameter
//! parser. `'word` hard-quotes, `:word` soft-quotes, `/word` opens a
//! refinement, a block constrains types, `<end>` marks the previous
//! parameter endable, and `<local>` switches to frame locals.

pub(crate) mod control;
pub(crate) mod data;
pub(crate) mod frame;
pub(crate) mod func;
pub(crate) mod math;

use crate::machine::{Machine, NativeFn};
use crate::raise::{Bounce, Raise};
use core_value::Cell;

pub(crate) struct NativeDef {
    pub name: &'static str,
    pub spec: &'static str,
    pub func: NativeFn,
    pub enfix: bool,
}

const fn native(name: &'static str, spec: &'static str, func: NativeFn) -> NativeDef {
    NativeDef {
        name,
        spec,
        func,
        enfix: false,
    }
}

const fn enfix(name: &'static str, spec: &'static str, func: NativeFn) -> NativeDef {
    NativeDef {
        name,
        spec,
        func,
        enfix: true,
    }
}

pub(crate) const CATALOG: &[NativeDef] = &[
    // math
    native("add", "value1 [integer!] value2 [integer!]", math::native_add),
    native("subtract", "value1 [integer!] value2 [integer!]", math::native_subtract),
    native("multiply", "value1 [integer!] value2 [integer!]", math::native_multiply),
    native("divide", "value1 [integer!] value2 [integer!]", math::native_divide),
    native("negate", "value [integer!]", math::native_negate),
    native("not", "value [any-value!]", math::native_not),
    native("equal?", "value1 [any-value!] value2 [any-value!]", math::native_equal_q),
    native("not-equal?", "value1 [any-value!] value2 [any-value!]", math::native_not_equal_q),
    native("lesser?", "value1 [integer!] value2 [integer!]", math::native_lesser_q),
    native("greater?", "value1 [integer!] value2 [integer!]", math::native_greater_q),
    native(
        "lesser-or-equal?",
        "value1 [integer!] value2 [integer!]",
        math::native_lesser_or_equal_q,
    ),
    native(
        "greater-or-equal?",
        "value1 [integer!] value2 [integer!]",
        math::native_greater_or_equal_q,
    ),
    enfix("+", "value1 [integer!] value2 [integer!]", math::native_add),
    enfix("-", "value1 [integer!] value2 [integer!]", math::native_subtract),
    enfix("*", "value1 [integer!] value2 [integer!]", math::native_multiply),
    enfix("=", "value1 [any-value!] value2 [any-value!]", math::native_equal_q),
    enfix("<>", "value1 [any-value!] value2 [any-value!]", math::native_not_equal_q),
    enfix("<", "value1 [integer!] value2 [integer!]", math::native_lesser_q),
    enfix(">", "value1 [integer!] value2 [integer!]", math::native_greater_q),
    enfix("<=", "value1 [integer!] value2 [integer!]", math::native_lesser_or_equal_q),
    enfix(">=", "value1 [integer!] value2 [integer!]", math::native_greater_or_equal_q),
    // control
    native(
        "if",
        "condition [any-value!] branch [any-branch!]",
        control::native_if,
    ),
    native(
        "either",
        "condition [any-value!] true-branch [any-branch!] false-branch [any-branch!]",
        control::native_either,
    ),
    native("any", "conditions [block!]", control::native_any),
    native("all", "conditions [block!]", control::native_all),
    native("case", "cases [block!]", control::native_case),
    native(
        "repeat",
        "count [integer!] body [block!]",
        control::native_repeat,
    ),
    native(
        "while",
        "condition [block!] body [block!]",
        control::native_while,
    ),
    native("catch", "block [block!]", control::native_catch),
    native("throw", "value [any-value!]", control::native_throw),
    native("break", "", control::native_break),
    native("continue", "", control::native_continue),
    native("comment", "'discarded [any-value!]", control::native_comment),
    native("quit", "value [integer!] <end>", control::native_quit),
    native("do", "source [any-value!]", control::native_do),
    native("reduce", "block [block!]", control::native_reduce),
    native(
        "compose",
        "template [block!] <local> position output",
        control::native_compose,
    ),
    // functions
    native("func", "spec [block!] body [block!]", func::native_func),
    native("return", "value [any-value!] <end>", func::native_return),
    native(
        "unwind",
        "target [frame!] value [any-value!] <end>",
        func::native_unwind,
    ),
    // data
    native("set", "target [word! set-word!] value [any-value!]", data::native_set),
    native("get", "source [word! get-word!]", data::native_get),
    native("the", "'value [any-value!]", data::native_the),
    native("let", "'target [word! set-word!] value [any-value!] <end>", data::native_let),
    native("const", "value [any-value!]", data::native_const),
    native("mutable", "value [any-value!]", data::native_mutable),
    native("copy", "value [any-value!] /deep", data::native_copy),
    native(
        "append",
        "series [block! text!] value [any-value!] /dup count [integer!]",
        data::native_append,
    ),
    native(
        "insert",
        "series [block! text!] value [any-value!]",
        data::native_insert,
    ),
    native("pick", "series [block!] index [integer!]", data::native_pick),
    native("first", "series [block!]", data::native_first),
    native("length-of", "series [block! text!]", data::native_length_of),
    native("protect", "target [word! block! text!] /deep", data::native_protect),
    native("unprotect", "target [word! block! text!] /deep", data::native_unprotect),
    native("mold", "value [any-value!]", data::native_mold),
    native("form", "value [any-value!]", data::native_form),
    native("print", "value [any-value!]", data::native_print),
    native("type-of", "value [any-value!]", data::native_type_of),
    native("error?", "value [any-value!]", data::native_error_q),
    native("trap", "block [block!]", data::native_trap),
    native("attempt", "block [block!]", data::native_attempt),
    // Soft quote: `make frame! ...` reads naturally, while a group
    // still computes the type.
    native("make", ":type [word!] def [any-value!]", data::native_make),
    native("shove", "left [any-value!] 'right [word!]", data::native_shove),
    // frames and specialization
    native(
        "specialize",
        "action [action!] def [block!]",
        frame::native_specialize,
    ),
    native("apply", "action [action!] def [block!]", frame::native_apply),
];

impl Machine {
    /// Finish a native with a value in the out slot.
    pub(crate) fn out_done(&mut self, cell: Cell) -> Result<Bounce, Raise> {
        self.top().out = cell;
        Ok(Bounce::Out)
    }
}
