//! Substitution and canonicalization over structural terms.
//!
//! Substitution binds generic (and generic pack) parameter declarations to
//! terms and rewrites a term bottom-up, returning the rewritten id plus a
//! `changed` flag. An unchanged subtree always reports `false` and returns
//! the *identical* interned id, which callers rely on both for memoization
//! and to avoid spuriously rebuilding enclosing nodes.
//!
//! # Pack expansion
//!
//! `Expand(pattern, captured)` only expands into a concrete [`Term::Pack`]
//! once *every* captured pack parameter has been substituted with a concrete
//! pack; until then substitution rebuilds the expansion with the partially
//! substituted captures. During expansion the pattern is substituted once per
//! element with [`SubstitutionSet::pack_expansion_index`] set, which is what
//! makes an inner `each` select the indexed element.

use std::collections::HashMap;

use crate::types::{DeclId, SpecializationArg, Term, TermId, TypeStore};

/// A set of bindings applied by [`substitute`].
#[derive(Debug, Clone, Default)]
pub struct SubstitutionSet {
    /// Bindings from generic parameter declarations to replacement terms.
    pub bindings: HashMap<DeclId, TermId>,
    /// When expanding a pack, the element index the current pattern
    /// instantiation is for.
    pub pack_expansion_index: Option<usize>,
}

impl SubstitutionSet {
    /// Creates an empty substitution.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding.
    pub fn bind(&mut self, decl: DeclId, term: TermId) -> &mut Self {
        self.bindings.insert(decl, term);
        self
    }
}

/// Substitutes `subst` into the term `id`.
///
/// Returns the substituted term and whether anything changed. When nothing
/// changed the returned id is identical to the input.
pub fn substitute(store: &TypeStore, subst: &SubstitutionSet, id: TermId) -> (TermId, bool) {
    match store.term(id).clone() {
        Term::Param { decl } | Term::PackParam { decl } => match subst.bindings.get(&decl) {
            Some(&bound) => (bound, true),
            None => (id, false),
        },

        Term::DeclRef { decl, args } => {
            let mut changed = false;
            let args = args
                .iter()
                .map(|&a| {
                    let (s, c) = substitute(store, subst, a);
                    changed |= c;
                    s
                })
                .collect();
            if !changed {
                return (id, false);
            }
            (store.get_or_create(Term::DeclRef { decl, args }), true)
        }

        Term::Func {
            params,
            result,
            error,
        } => {
            let mut changed = false;
            let params = params
                .iter()
                .map(|&p| {
                    let (s, c) = substitute(store, subst, p);
                    changed |= c;
                    s
                })
                .collect();
            let (result, c) = substitute(store, subst, result);
            changed |= c;
            let (error, c) = substitute(store, subst, error);
            changed |= c;
            if !changed {
                return (id, false);
            }
            (
                store.get_or_create(Term::Func {
                    params,
                    result,
                    error,
                }),
                true,
            )
        }

        Term::Each { element } => {
            let (subst_element, changed) = substitute(store, subst, element);
            if !changed {
                return (id, false);
            }
            match store.term(subst_element) {
                Term::Pack { elements } => {
                    if let Some(index) = subst.pack_expansion_index {
                        if index < elements.len() {
                            return (elements[index], true);
                        }
                    }
                }
                Term::Expand { pattern, .. } => {
                    // `each (expand (each x))` collapses to the inner `each`.
                    if matches!(store.term(*pattern), Term::Each { .. }) {
                        return (*pattern, true);
                    }
                }
                _ => {}
            }
            (
                store.get_or_create(Term::Each {
                    element: subst_element,
                }),
                true,
            )
        }

        Term::Expand { pattern, captured } => {
            // The expansion can only be resolved into a concrete pack if all
            // captured pack parameters substitute to concrete packs.
            let mut changed = false;
            let mut captured_packs = Vec::new();
            let mut concrete = 0usize;
            for &capture in &captured {
                let (subst_capture, c) = substitute(store, subst, capture);
                changed |= c;
                match store.term(subst_capture) {
                    Term::Expand {
                        captured: inner, ..
                    } => captured_packs.extend(inner.iter().copied()),
                    _ => {
                        captured_packs.push(subst_capture);
                        if matches!(store.term(subst_capture), Term::Pack { .. }) {
                            concrete += 1;
                        }
                    }
                }
            }

            if !changed || concrete != captured_packs.len() {
                let (subst_pattern, c) = substitute(store, subst, pattern);
                changed |= c;
                if !changed {
                    return (id, false);
                }
                // Some capture or the pattern changed, but not every capture
                // is a concrete pack yet: rebuild the expansion instead of
                // expanding it.
                return (
                    store.get_or_create(Term::Expand {
                        pattern: subst_pattern,
                        captured: captured_packs,
                    }),
                    true,
                );
            }

            assert!(
                !captured_packs.is_empty(),
                "expansion with no captured packs"
            );
            let count = match store.term(captured_packs[0]) {
                Term::Pack { elements } => elements.len(),
                _ => unreachable!("counted as concrete above"),
            };

            let mut expanded = Vec::with_capacity(count);
            for index in 0..count {
                let mut element_subst = subst.clone();
                element_subst.pack_expansion_index = Some(index);
                let (element, c) = substitute(store, &element_subst, pattern);
                changed |= c;
                expanded.push(element);
            }
            if !changed {
                return (id, false);
            }
            (store.get_or_create(Term::Pack { elements: expanded }), true)
        }

        Term::Pack { elements } => {
            let mut changed = false;
            let mut subst_elements = Vec::with_capacity(elements.len());
            for &element in &elements {
                let (s, c) = substitute(store, subst, element);
                changed |= c;
                match store.term(s) {
                    // A nested pack is spliced into its parent element-wise.
                    Term::Pack { elements: inner } => subst_elements.extend(inner.iter().copied()),
                    _ => subst_elements.push(s),
                }
            }
            if !changed {
                return (id, false);
            }
            (
                store.get_or_create(Term::Pack {
                    elements: subst_elements,
                }),
                true,
            )
        }

        Term::ExtractExistential { decl, interface } => {
            let (subst_interface, changed) = substitute(store, subst, interface);
            if !changed {
                return (id, false);
            }
            (
                store.get_or_create(Term::ExtractExistential {
                    decl,
                    interface: subst_interface,
                }),
                true,
            )
        }

        Term::ExistentialSpecialized { base, args } => {
            let (subst_base, mut changed) = substitute(store, subst, base);
            let args = args
                .iter()
                .map(|arg| {
                    let (val, c) = substitute(store, subst, arg.val);
                    changed |= c;
                    let witness = arg.witness.map(|w| {
                        let (w, c) = substitute(store, subst, w);
                        changed |= c;
                        w
                    });
                    SpecializationArg { val, witness }
                })
                .collect();
            if !changed {
                return (id, false);
            }
            (
                store.get_or_create(Term::ExistentialSpecialized {
                    base: subst_base,
                    args,
                }),
                true,
            )
        }

        Term::And { left, right } => {
            let (left, cl) = substitute(store, subst, left);
            let (right, cr) = substitute(store, subst, right);
            if !cl && !cr {
                return (id, false);
            }
            (store.get_or_create(Term::And { left, right }), true)
        }

        Term::Error | Term::Bottom | Term::IntVal { .. } | Term::Witness { .. } => (id, false),
    }
}

/// Returns the canonical form of `id`, memoized in the store.
///
/// Canonicalization recursively canonicalizes children and rebuilds. `&`
/// types are NOT re-associated, commuted or deduplicated: proper
/// canonicalization of conjunctions requires a total order on types and
/// knowledge of implied conformances, and the simplified behavior here is a
/// known incompleteness kept intact deliberately.
pub fn canonicalize(store: &TypeStore, id: TermId) -> TermId {
    if let Some(cached) = store.cached_canonical(id) {
        return cached;
    }
    let canonical = match store.term(id).clone() {
        Term::Param { .. }
        | Term::PackParam { .. }
        | Term::Each { .. }
        | Term::ExtractExistential { .. }
        | Term::Error
        | Term::Bottom
        | Term::IntVal { .. }
        | Term::Witness { .. } => id,

        Term::DeclRef { decl, args } => {
            let args = args.iter().map(|&a| canonicalize(store, a)).collect();
            store.get_or_create(Term::DeclRef { decl, args })
        }

        Term::Func {
            params,
            result,
            error,
        } => {
            let params = params.iter().map(|&p| canonicalize(store, p)).collect();
            store.get_or_create(Term::Func {
                params,
                result: canonicalize(store, result),
                error: canonicalize(store, error),
            })
        }

        Term::Expand { pattern, captured } => {
            let canonical_pattern = canonicalize(store, pattern);
            if canonical_pattern == pattern {
                id
            } else {
                store.get_or_create(Term::Expand {
                    pattern: canonical_pattern,
                    captured,
                })
            }
        }

        Term::Pack { elements } => {
            let elements = elements.iter().map(|&e| canonicalize(store, e)).collect();
            store.get_or_create(Term::Pack { elements })
        }

        Term::ExistentialSpecialized { base, args } => {
            let args = args
                .iter()
                .map(|arg| SpecializationArg {
                    val: canonicalize(store, arg.val),
                    witness: arg.witness.map(|w| canonicalize(store, w)),
                })
                .collect();
            store.get_or_create(Term::ExistentialSpecialized {
                base: canonicalize(store, base),
                args,
            })
        }

        Term::And { left, right } => {
            let left = canonicalize(store, left);
            let right = canonicalize(store, right);
            store.get_or_create(Term::And { left, right })
        }
    };
    store.cache_canonical(id, canonical);
    canonical
}
