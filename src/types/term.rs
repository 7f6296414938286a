//! Structural type and value terms.
//!
//! Front-end types are immutable structural nodes deduplicated by a
//! [`TypeStore`](crate::types::TypeStore): two structurally equal terms
//! always share one [`TermId`], so equality is an integer comparison and
//! substitution can report "unchanged" by returning the same id.

/// Unique identifier for an interned term.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(pub(crate) u32);

impl TermId {
    /// Returns the underlying index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for TermId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Opaque identity of a declaration (an interface, struct, generic parameter
/// or witness-producing decl). The front-end owns the actual declarations;
/// this model only needs their identity for substitution keying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub u32);

/// One expanded specialization argument: a value plus the witness that it
/// satisfies the constraint it is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecializationArg {
    /// The argument value (usually a type).
    pub val: TermId,
    /// The conformance witness, when the slot is constrained.
    pub witness: Option<TermId>,
}

/// A structural type or value node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    /// Reference to a named declaration applied to arguments
    /// (`Texture2D<float4>`, a struct, an interface).
    DeclRef {
        /// The referenced declaration.
        decl: DeclId,
        /// Generic arguments, empty for non-generic references.
        args: Vec<TermId>,
    },
    /// A generic type parameter awaiting substitution.
    Param {
        /// The parameter declaration.
        decl: DeclId,
    },
    /// A generic type-pack parameter awaiting substitution with a pack.
    PackParam {
        /// The parameter declaration.
        decl: DeclId,
    },
    /// Function type.
    Func {
        /// Parameter types in order.
        params: Vec<TermId>,
        /// Result type.
        result: TermId,
        /// Error type (bottom when the function cannot throw).
        error: TermId,
    },
    /// `each T` — the element-wise projection of a pack under expansion.
    Each {
        /// The pack-typed element expression.
        element: TermId,
    },
    /// `expand P` — a pattern replicated once per element of the captured
    /// type packs.
    Expand {
        /// The pattern type, containing `each` references to the captures.
        pattern: TermId,
        /// The captured type packs the expansion ranges over.
        captured: Vec<TermId>,
    },
    /// A concrete, fully known type pack.
    Pack {
        /// Element types.
        elements: Vec<TermId>,
    },
    /// The concrete type opened from an existential value
    /// (`someInterfaceValue.This`).
    ExtractExistential {
        /// The declaration of the opened value.
        decl: DeclId,
        /// The interface type the value was typed as.
        interface: TermId,
    },
    /// An interface type specialized with concrete existential arguments.
    ExistentialSpecialized {
        /// The base (interface) type.
        base: TermId,
        /// The expanded specialization arguments.
        args: Vec<SpecializationArg>,
    },
    /// Conjunction of two constraint types (`A & B`).
    And {
        /// Left conjunct.
        left: TermId,
        /// Right conjunct.
        right: TermId,
    },
    /// The error type produced by failed checking.
    Error,
    /// The uninhabited bottom type.
    Bottom,
    /// A compile-time integer value.
    IntVal {
        /// The value.
        value: i64,
    },
    /// A subtype conformance witness.
    Witness {
        /// The declaration the witness is rooted at.
        decl: DeclId,
    },
}
