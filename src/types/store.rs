//! Hash-consing term store.
//!
//! Terms are interned get-or-create style: structurally equal nodes share an
//! id for the lifetime of the store. The store is lock-free (`DashMap` index
//! over an append-only `boxcar` arena) so concurrent semantic checking
//! threads can intern without coordination.

use dashmap::DashMap;

use crate::types::{Term, TermId};

/// Interning store for structural terms.
///
/// # Thread Safety
///
/// `get_or_create` and `term` take `&self` and are safe to call from any
/// thread; ids handed out are stable forever.
#[derive(Debug, Default)]
pub struct TypeStore {
    terms: boxcar::Vec<Term>,
    dedup: DashMap<Term, TermId>,
    canonical: DashMap<TermId, TermId>,
}

impl TypeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a term, returning the id shared by all structurally equal
    /// terms.
    pub fn get_or_create(&self, term: Term) -> TermId {
        if let Some(existing) = self.dedup.get(&term) {
            return *existing;
        }
        *self
            .dedup
            .entry(term.clone())
            .or_insert_with(|| TermId(self.terms.push(term) as u32))
    }

    /// Returns the term for an id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this store.
    #[must_use]
    pub fn term(&self, id: TermId) -> &Term {
        &self.terms[id.index()]
    }

    /// Returns the number of distinct interned terms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.count()
    }

    /// Returns `true` if nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.count() == 0
    }

    pub(crate) fn cached_canonical(&self, id: TermId) -> Option<TermId> {
        self.canonical.get(&id).map(|c| *c)
    }

    pub(crate) fn cache_canonical(&self, id: TermId, canonical: TermId) {
        self.canonical.insert(id, canonical);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeclId;

    #[test]
    fn test_structural_dedup() {
        let store = TypeStore::new();
        let a = store.get_or_create(Term::Param { decl: DeclId(0) });
        let b = store.get_or_create(Term::Param { decl: DeclId(0) });
        let c = store.get_or_create(Term::Param { decl: DeclId(1) });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_compound_dedup() {
        let store = TypeStore::new();
        let p = store.get_or_create(Term::Param { decl: DeclId(0) });
        let err = store.get_or_create(Term::Bottom);
        let f1 = store.get_or_create(Term::Func {
            params: vec![p],
            result: p,
            error: err,
        });
        let f2 = store.get_or_create(Term::Func {
            params: vec![p],
            result: p,
            error: err,
        });
        assert_eq!(f1, f2);
    }
}
