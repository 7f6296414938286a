//! Intermediate representation substrate.
//!
//! This module provides the instruction graph the autodiff pipeline operates
//! on: arena-owned functions with explicit basic blocks, phi-style block
//! parameters fed by predecessor branch arguments, per-value use lists, and
//! attachable decorations.
//!
//! # Architecture
//!
//! - [`inst`] - Opcodes, operand/use records, decorations
//! - [`block`] - Basic block records
//! - [`func`] - The function arena and CFG queries
//! - [`builder`] - Insertion-point instruction builder
//! - [`clone`] - Two-phase out-of-order cloning
//! - [`dominator`] - Dominator tree
//! - [`ty`] - Interned IR-level types
//!
//! # Control flow shape
//!
//! The pipeline consumes *normalized* control flow as produced by earlier
//! lowering: a loop terminator names its condition block (which ends in a
//! two-way conditional whose true side is the loop body), the body branches
//! back to the condition block, and the false side is the loop exit.

mod block;
mod builder;
mod clone;
mod dominator;
mod func;
mod inst;
mod ty;

pub use block::Block;
pub use builder::Builder;
pub use clone::OutOfOrderCloneContext;
pub use dominator::{reverse_postorder, DominatorTree};
pub use func::{Func, Module};
pub use inst::{
    BlockId, ConstValue, Decoration, Inst, InstId, OpFlags, Opcode, Operand, PrimalLink, UseRef,
};
pub use ty::{TypeId, TypeKind, TypeTable};
