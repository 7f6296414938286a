//! Basic blocks.
//!
//! A block owns an ordered parameter list (phi values fed by predecessor
//! branch arguments) and an ordered instruction list whose last element is
//! the terminator. Blocks carry decorations just like instructions do — the
//! differential marker and the recompute-block marker both live here.

use crate::ir::{Decoration, InstId};

/// A basic block record.
///
/// Owned by a [`Func`](crate::ir::Func); the id-based accessors there are the
/// primary interface. Instances expose read-only views of the block contents.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub(crate) params: Vec<InstId>,
    pub(crate) insts: Vec<InstId>,
    pub(crate) decorations: Vec<Decoration>,
}

impl Block {
    /// Returns the block parameters in declaration order.
    #[must_use]
    pub fn params(&self) -> &[InstId] {
        &self.params
    }

    /// Returns the ordinary instructions (terminator last).
    #[must_use]
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }

    /// Returns the attached decorations.
    #[must_use]
    pub fn decorations(&self) -> &[Decoration] {
        &self.decorations
    }

    /// Returns `true` if a decoration matching the predicate is attached.
    pub fn has_decoration(&self, pred: impl Fn(&Decoration) -> bool) -> bool {
        self.decorations.iter().any(pred)
    }
}
