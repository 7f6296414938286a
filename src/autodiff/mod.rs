//! Reverse-mode autodiff checkpointing.
//!
//! Given a function whose blocks are partitioned into a primal (forward)
//! region and a differential (reverse) region by an earlier transcription
//! pass, decide per primal value whether the differential code should read a
//! stored copy or a recomputed one, then rewrite the function so every such
//! access is legal under dominance.
//!
//! # Pipeline
//!
//! [`apply_checkpoint_policy`] sequences the phases:
//!
//! 1. [`index::build_indexed_blocks`] - pair primal/differential loops,
//!    synthesize forward and backward iteration counters, assign every block
//!    its stack of enclosing loop regions.
//! 2. [`index::split_loop_condition_insts`] - split condition-block values
//!    used both inside and after their loop.
//! 3. [`recompute::create_primal_recompute_blocks`] - mirror the primal CFG
//!    shape in front of the differential code.
//! 4. [`checkpoint::DefaultCheckpointPolicy`] - classify every needed primal
//!    value as store or recompute and apply the decisions.
//! 5. [`availability::ensure_primal_availability`] - synthesize indexed
//!    storage and loads for everything still out of scope.
//! 6. [`lower_checkpoint_object_insts`] - strip the marker instructions.
//!
//! The pass mutates the function in place and is single-threaded per
//! function; [`process_module`] fans independent functions out across a
//! thread pool.

pub mod availability;
pub mod checkpoint;
pub mod index;
pub mod induction;
pub mod recompute;
mod region;

#[cfg(test)]
pub(crate) mod testutil;

use rayon::prelude::*;
use std::collections::HashSet;

use crate::ir::{
    reverse_postorder, Func, Module, Opcode, OutOfOrderCloneContext,
};
use crate::Result;

pub use availability::ensure_primal_availability;
pub use checkpoint::{
    should_store_inst, CheckpointSetInfo, DefaultCheckpointPolicy, HoistResult, HoistedPrimalsInfo,
    InversionInfo,
};
pub use index::{
    build_indexed_blocks, split_loop_condition_insts, BlockIndexInfo, CountStatus,
    IndexTrackingInfo,
};
pub use induction::{
    collect_induction_values, collect_loop_exit_conditions, ImplicationResult,
    LoopInductionValueInfo,
};
pub use recompute::create_primal_recompute_blocks;
pub use region::IndexedRegionMap;

/// Reorders the function's blocks into reverse postorder, keeping
/// unreachable blocks at the end in their existing relative order.
///
/// Run after structural phases so primal blocks, recompute blocks and
/// differential blocks appear in execution order.
pub fn sort_blocks(func: &mut Func) {
    let entry = func.entry_block();
    let mut order = reverse_postorder(func, entry);
    let placed: HashSet<_> = order.iter().copied().collect();
    for block in func.block_ids() {
        if !placed.contains(&block) {
            order.push(block);
        }
    }
    func.set_block_order(order);
}

/// Replaces every [`Opcode::CheckpointObject`] and [`Opcode::LoopExitValue`]
/// with its operand and removes the marker.
///
/// Downstream lowering stages never see these instructions. Running this on
/// a function without markers is a no-op.
pub fn lower_checkpoint_object_insts(func: &mut Func) {
    for block in func.block_ids() {
        for inst in func.inst_ids_in(block) {
            if matches!(
                func.inst(inst).op(),
                Opcode::CheckpointObject | Opcode::LoopExitValue
            ) {
                let val = func.inst_operand(inst, 0);
                func.replace_uses_with(inst, val);
                func.remove_inst(inst);
            }
        }
    }
}

/// Runs the full checkpointing pipeline on one function.
///
/// For each primal value used by differential code, decides whether to store
/// or recompute it, then makes it accessible from the differential region.
/// The function is mutated in place; the returned [`HoistedPrimalsInfo`]
/// names the synthesized storage and recompute clones for later lowering
/// stages.
///
/// # Errors
///
/// Returns [`crate::Error::UnboundedLoop`] when a value must be stored under
/// a loop region with no static iteration bound.
pub fn apply_checkpoint_policy(func: &mut Func) -> Result<HoistedPrimalsInfo> {
    sort_blocks(func);

    // Insert loop counters and establish loop regions; the reverse loops now
    // count down from the final forward count.
    let mut indexed_block_info = build_indexed_blocks(func);

    split_loop_condition_insts(func, &indexed_block_info);

    // Mirror the primal control flow in front of the differential code.
    let mut clone_ctx = OutOfOrderCloneContext::new();
    let recompute_map =
        create_primal_recompute_blocks(func, &mut indexed_block_info, &mut clone_ctx);

    sort_blocks(func);

    // Decide store versus recompute per needed primal value and apply the
    // decisions, emitting recompute clones into their blocks.
    let mut policy = DefaultCheckpointPolicy::new();
    policy.prepare(func);
    let primals_info = policy.process_func(func, &recompute_map, &mut clone_ctx, &indexed_block_info);

    // Legalize remaining out-of-scope accesses with indexed storage.
    let hoisted = ensure_primal_availability(func, primals_info, &indexed_block_info)?;

    lower_checkpoint_object_insts(func);

    Ok(hoisted)
}

/// Applies the checkpoint policy to every differentiated function of a
/// module in parallel.
///
/// Each function is processed with exclusive mutable access; the per-function
/// pass itself stays single-threaded.
///
/// # Errors
///
/// Returns the first error any function produced.
pub fn process_module(module: &mut Module) -> Result<Vec<HoistedPrimalsInfo>> {
    module
        .funcs
        .par_iter_mut()
        .filter(|func| {
            func.block_ids()
                .into_iter()
                .any(|block| func.is_differential_block(block))
        })
        .map(apply_checkpoint_policy)
        .collect()
}
