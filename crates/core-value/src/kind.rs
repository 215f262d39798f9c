//! Value kinds and type bitsets.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The datatype tag of a cell.
///
/// `Free` and `End` are distinguished members of the enum rather than
/// out-of-band header patterns: a freed cell slot is stamped `Free` (never
/// valid in a live position) and array tails are stamped `End` (readable
/// as "no more elements" from any iteration context, never writable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Kind {
    /// Canonical stamp for a dead cell slot. Observing it outside the
    /// allocator is a fault.
    Free = 0,
    /// Implicit array terminator.
    End = 1,

    /// Moved-from or not-yet-initialized variable state.
    Trash = 2,
    Null = 3,
    Blank = 4,
    /// Expression barrier (`,`).
    Comma = 5,
    Logic = 6,
    Integer = 7,
    Text = 8,

    Word = 9,
    SetWord = 10,
    GetWord = 11,
    Refinement = 12,

    Block = 13,
    Group = 14,
    Path = 15,
    SetPath = 16,
    GetPath = 17,

    Action = 18,
    Frame = 19,
    Object = 20,
    Module = 21,
    Error = 22,
    Port = 23,

    Handle = 24,
    Varargs = 25,

    /// Block-isotope tuple produced by multi-return evaluation. Unstable:
    /// must be decayed before reaching a variable or array slot.
    Pack = 26,
    /// The empty pack; evaluates invisibly. Unstable like `Pack`.
    Nihil = 27,
}

/// Number of kinds; bounds the bitset width below.
pub const KIND_COUNT: u8 = 28;

impl Kind {
    /// Kinds that may legally appear in a live cell slot.
    pub fn is_valid_live(self) -> bool {
        !matches!(self, Kind::Free | Kind::End)
    }

    /// Kinds that evaluate to themselves.
    pub fn is_inert(self) -> bool {
        matches!(
            self,
            Kind::Blank
                | Kind::Logic
                | Kind::Integer
                | Kind::Text
                | Kind::Block
                | Kind::Refinement
                | Kind::Object
                | Kind::Module
                | Kind::Error
                | Kind::Port
                | Kind::Handle
                | Kind::Frame
        )
    }

    pub fn is_word(self) -> bool {
        matches!(
            self,
            Kind::Word | Kind::SetWord | Kind::GetWord | Kind::Refinement
        )
    }

    pub fn is_array(self) -> bool {
        matches!(
            self,
            Kind::Block | Kind::Group | Kind::Path | Kind::SetPath | Kind::GetPath
        )
    }

    pub fn is_path(self) -> bool {
        matches!(self, Kind::Path | Kind::SetPath | Kind::GetPath)
    }

    pub fn is_context(self) -> bool {
        matches!(
            self,
            Kind::Frame | Kind::Object | Kind::Module | Kind::Error | Kind::Port
        )
    }

    /// Unstable isotopes: legal only in evaluator output slots.
    pub fn is_unstable_isotope(self) -> bool {
        matches!(self, Kind::Pack | Kind::Nihil)
    }

    /// Canonical lowercase name used by molding and the boot catalog
    /// (`integer!`, `set-word!`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Kind::Free => "free",
            Kind::End => "end",
            Kind::Trash => "trash!",
            Kind::Null => "null!",
            Kind::Blank => "blank!",
            Kind::Comma => "comma!",
            Kind::Logic => "logic!",
            Kind::Integer => "integer!",
            Kind::Text => "text!",
            Kind::Word => "word!",
            Kind::SetWord => "set-word!",
            Kind::GetWord => "get-word!",
            Kind::Refinement => "refinement!",
            Kind::Block => "block!",
            Kind::Group => "group!",
            Kind::Path => "path!",
            Kind::SetPath => "set-path!",
            Kind::GetPath => "get-path!",
            Kind::Action => "action!",
            Kind::Frame => "frame!",
            Kind::Object => "object!",
            Kind::Module => "module!",
            Kind::Error => "error!",
            Kind::Port => "port!",
            Kind::Handle => "handle!",
            Kind::Varargs => "varargs!",
            Kind::Pack => "pack!",
            Kind::Nihil => "nihil!",
        }
    }
}

/// A bitset over `Kind`, used for parameter type constraints and for
/// `clonify`'s "copy types deeply" mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeSet(pub u64);

impl TypeSet {
    pub const EMPTY: TypeSet = TypeSet(0);

    pub const fn of(kind: Kind) -> TypeSet {
        TypeSet(1 << kind as u8)
    }

    pub const fn union(self, other: TypeSet) -> TypeSet {
        TypeSet(self.0 | other.0)
    }

    pub const fn has(self, kind: Kind) -> bool {
        self.0 & (1 << kind as u8) != 0
    }

    pub fn insert(&mut self, kind: Kind) {
        self.0 |= 1 << kind as u8;
    }

    pub fn iter(self) -> impl Iterator<Item = Kind> {
        (0..KIND_COUNT).filter_map(move |n| {
            if self.0 & (1 << n) != 0 {
                Kind::try_from(n).ok()
            } else {
                None
            }
        })
    }
}

macro_rules! typeset {
    ($($kind:ident)|+) => {
        TypeSet(0 $( | (1 << Kind::$kind as u8) )+)
    };
}

/// The boot typeset catalog. Name strings here are the spellings the
/// system object exposes under `system/catalog/typesets`.
pub mod typesets {
    use super::{Kind, TypeSet};

    pub const ANY_WORD: TypeSet = typeset!(Word | SetWord | GetWord | Refinement);
    pub const ANY_ARRAY: TypeSet = typeset!(Block | Group | Path | SetPath | GetPath);
    pub const ANY_PATH: TypeSet = typeset!(Path | SetPath | GetPath);
    pub const ANY_CONTEXT: TypeSet = typeset!(Frame | Object | Module | Error | Port);
    pub const ANY_SCALAR: TypeSet = typeset!(Logic | Integer);
    pub const ANY_NUMBER: TypeSet = typeset!(Integer);
    pub const ANY_STRING: TypeSet = typeset!(Text);
    pub const ANY_BRANCH: TypeSet = typeset!(Block | Group | Action);

    /// Every kind a variable may hold.
    pub const ANY_VALUE: TypeSet = TypeSet(
        ((1u64 << super::KIND_COUNT) - 1)
            & !typeset!(Free | End | Pack | Nihil).0,
    );

    pub const CATALOG: &[(&str, TypeSet)] = &[
        ("any-value!", ANY_VALUE),
        ("any-word!", ANY_WORD),
        ("any-array!", ANY_ARRAY),
        ("any-path!", ANY_PATH),
        ("any-context!", ANY_CONTEXT),
        ("any-scalar!", ANY_SCALAR),
        ("any-number!", ANY_NUMBER),
        ("any-string!", ANY_STRING),
        ("any-branch!", ANY_BRANCH),
    ];

    /// Resolve a spelling used in a parameter spec block, either a single
    /// datatype name (`integer!`) or a typeset name (`any-value!`).
    pub fn lookup(name: &str) -> Option<TypeSet> {
        for (spelling, set) in CATALOG {
            if *spelling == name {
                return Some(*set);
            }
        }
        for n in 0..super::KIND_COUNT {
            let kind = Kind::try_from(n).ok()?;
            if kind.name() == name {
                return Some(TypeSet::of(kind));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_u8() {
        for n in 0..KIND_COUNT {
            let kind = Kind::try_from(n).unwrap();
            assert_eq!(u8::from(kind), n);
        }
        assert!(Kind::try_from(KIND_COUNT).is_err());
    }

    #[test]
    fn typeset_membership() {
        assert!(typesets::ANY_WORD.has(Kind::SetWord));
        assert!(!typesets::ANY_WORD.has(Kind::Block));
        assert!(typesets::ANY_VALUE.has(Kind::Integer));
        assert!(!typesets::ANY_VALUE.has(Kind::Free));
        assert!(!typesets::ANY_VALUE.has(Kind::Pack));
    }

    #[test]
    fn typeset_lookup_by_name() {
        assert_eq!(typesets::lookup("integer!"), Some(TypeSet::of(Kind::Integer)));
        assert_eq!(typesets::lookup("any-array!"), Some(typesets::ANY_ARRAY));
        assert_eq!(typesets::lookup("bogus!"), None);
    }
}
