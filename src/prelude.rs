//! Convenient re-exports of the most commonly used types.
//!
//! ```rust,ignore
//! use glaze::prelude::*;
//!
//! let hoisted = apply_checkpoint_policy(&mut func)?;
//! # Ok::<(), glaze::Error>(())
//! ```

pub use crate::autodiff::{
    apply_checkpoint_policy, process_module, BlockIndexInfo, CheckpointSetInfo, CountStatus,
    DefaultCheckpointPolicy, HoistedPrimalsInfo, IndexTrackingInfo, LoopInductionValueInfo,
};
pub use crate::ir::{
    Block, BlockId, Builder, Decoration, DominatorTree, Func, Inst, InstId, Module, Opcode,
    Operand, OutOfOrderCloneContext, PrimalLink, TypeId, TypeKind, TypeTable, UseRef,
};
pub use crate::types::{
    canonicalize, substitute, DeclId, SpecializationArg, SubstitutionSet, Term, TermId, TypeStore,
};
pub use crate::{Error, Result};
