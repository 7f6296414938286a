//! Structural type model.
//!
//! Front-end types and compile-time values as immutable, structurally
//! deduplicated terms supporting substitution and canonicalization. The
//! autodiff pipeline depends on the same fundamental idea — structural
//! rewriting with memoized canonical forms — and the semantic checker uses
//! this model for generic specialization, variadic type packs and
//! existential ("interface") types.
//!
//! # Architecture
//!
//! - [`term`] - The structural nodes ([`Term`], [`TermId`], [`DeclId`])
//! - [`store`] - Lock-free hash-consing interner ([`TypeStore`])
//! - [`subst`] - [`substitute`] and [`canonicalize`]

mod store;
mod subst;
mod term;

pub use store::TypeStore;
pub use subst::{canonicalize, substitute, SubstitutionSet};
pub use term::{DeclId, SpecializationArg, Term, TermId};
