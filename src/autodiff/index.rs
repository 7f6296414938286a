//! Loop counter synthesis and per-block index tracking.
//!
//! Every matched primal/differential loop pair gets an explicit iteration
//! counter on each side: the primal counter counts `0..N` forward and the
//! differential counter inherits `N-1` and counts down to `-1`, sharing one
//! phi slot each. Both are tagged with the loop-counter decoration so later
//! passes never try to checkpoint them as ordinary values.
//!
//! After counters exist, [`build_indexed_blocks`] assigns every block the
//! list of [`IndexTrackingInfo`] for all loop regions that structurally
//! contain it, ordered outer-to-inner. Two blocks are in compatible regions
//! iff the shorter list is an index-wise prefix of the longer one, compared
//! on primal counter identity.

use std::collections::HashMap;

use crate::autodiff::region::IndexedRegionMap;
use crate::ir::{BlockId, Builder, Decoration, Func, InstId, Opcode, PrimalLink};

/// Resolution state of a loop region's iteration bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountStatus {
    /// No static bound is known; storage sizing for this region must fail.
    Unresolved,
    /// The loop runs at most the given number of iterations.
    Static(u32),
}

/// Per-(block, enclosing-loop) tracking data.
///
/// Equality compares the primal counter identity only: all copies describing
/// the same loop region are interchangeable.
#[derive(Debug, Clone)]
pub struct IndexTrackingInfo {
    /// Phi value counting `0..N` on the primal side.
    pub primal_count_param: InstId,
    /// Phi value counting `N-1..-1` on the differential side.
    pub diff_count_param: InstId,
    /// The primal loop's condition block.
    pub loop_header_block: BlockId,
    /// Iteration bound resolution.
    pub status: CountStatus,
}

impl PartialEq for IndexTrackingInfo {
    fn eq(&self, other: &Self) -> bool {
        self.primal_count_param == other.primal_count_param
    }
}

impl Eq for IndexTrackingInfo {}

/// Per-block index lists, outer-to-inner.
pub type BlockIndexInfo = HashMap<BlockId, Vec<IndexTrackingInfo>>;

/// Returns the condition block of a loop terminator.
///
/// # Panics
///
/// Panics if the target block is not terminated by a two-way conditional —
/// the CFG is expected to be normalized before checkpointing runs.
pub(crate) fn loop_condition_block(func: &Func, loop_inst: InstId) -> BlockId {
    let cond = func.loop_target(loop_inst);
    let term = func
        .terminator(cond)
        .expect("loop condition block must be terminated");
    assert_eq!(
        func.inst(term).op(),
        Opcode::IfElse,
        "loop condition block must end in a two-way conditional"
    );
    cond
}

/// Returns the body block of a loop region (the true side of the condition).
pub(crate) fn loop_body_block(func: &Func, loop_inst: InstId) -> BlockId {
    let cond = loop_condition_block(func, loop_inst);
    let term = func.terminator(cond).expect("condition block terminated");
    func.if_else_true_block(term)
}

/// Returns the last in-loop block branching back to the condition block.
///
/// # Panics
///
/// Panics if the condition block has no in-loop predecessor; a loop with no
/// back edge is a defect in an earlier pass.
pub(crate) fn loop_update_block(func: &Func, loop_inst: InstId) -> BlockId {
    let init_block = func
        .inst(loop_inst)
        .parent()
        .expect("loop terminator must be placed");
    let cond = func.loop_target(loop_inst);
    let mut last = None;
    for pred in func.predecessors(cond) {
        if pred != init_block {
            last = Some(pred);
        }
    }
    last.expect("no predecessor found for condition block")
}

/// Returns `true` if the instruction's value can live in checkpoint storage.
pub(crate) fn can_inst_be_stored(func: &Func, inst: InstId) -> bool {
    match func.inst(inst).ty() {
        Some(ty) => func.types().can_be_stored(ty),
        None => false,
    }
}

/// Returns `true` if `a` is an index-wise prefix of `b`.
pub(crate) fn indices_subset_of(a: &[IndexTrackingInfo], b: &[IndexTrackingInfo]) -> bool {
    if a.len() > b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

/// Inserts forward and backward iteration counters for one loop pair.
///
/// Returns `(primal_count_param, diff_count_param)`.
fn lower_indexed_region(func: &mut Func, primal_loop: InstId, diff_loop: InstId) -> (InstId, InstId) {
    let int = func.types_mut().int();

    // Primal side: phi slot initialized to 0 at the loop entry edge, with
    // `counter + 1` fed into the back edge.
    let primal_cond = func.loop_target(primal_loop);
    let zero = func.get_int_value(int, 0);
    let entry_index = func.push_branch_arg(primal_loop, zero);

    let primal_count_param = {
        let mut builder = Builder::new(func);
        builder.emit_param(primal_cond, int)
    };
    assert_eq!(
        func.param_index(primal_cond, primal_count_param),
        Some(entry_index),
        "counter phi slot must line up with its entry argument"
    );
    func.add_decoration(primal_count_param, Decoration::LoopCounter);
    func.add_decoration(primal_count_param, Decoration::NameHint("_pc"));

    let primal_update = loop_update_block(func, primal_loop);
    let update_term = func
        .terminator(primal_update)
        .expect("update block terminated");
    let one = func.get_int_value(int, 1);
    let inc = {
        let mut builder = Builder::new(func);
        builder.set_insert_before(update_term);
        builder.emit_add(int, primal_count_param, one)
    };
    let cycle_index = func.push_branch_arg(update_term, inc);
    assert_eq!(entry_index, cycle_index);

    // Differential side: the reverse loop inherits `primal_count - 1`, steps
    // by -1 and exits once the counter goes negative.
    let diff_cond = func.loop_target(diff_loop);
    let diff_init_term = diff_loop;
    let rev_init = {
        let mut builder = Builder::new(func);
        builder.set_insert_before(diff_init_term);
        builder.emit_sub(int, primal_count_param, one)
    };
    let diff_entry_index = func.push_branch_arg(diff_loop, rev_init);

    let diff_count_param = {
        let mut builder = Builder::new(func);
        builder.emit_param(diff_cond, int)
    };
    assert_eq!(
        func.param_index(diff_cond, diff_count_param),
        Some(diff_entry_index)
    );
    func.add_decoration(diff_count_param, Decoration::LoopCounter);
    func.add_decoration(diff_count_param, Decoration::NameHint("_dc"));

    let diff_update = loop_update_block(func, diff_loop);
    let diff_update_term = func
        .terminator(diff_update)
        .expect("update block terminated");
    let dec = {
        let mut builder = Builder::new(func);
        builder.set_insert_before(diff_update_term);
        builder.emit_sub(int, diff_count_param, one)
    };
    let diff_cycle_index = func.push_branch_arg(diff_update_term, dec);
    assert_eq!(diff_entry_index, diff_cycle_index);

    let if_else = func
        .terminator(diff_cond)
        .expect("condition block terminated");
    let exit_condition = {
        let mut builder = Builder::new(func);
        builder.set_insert_before(if_else);
        builder.emit_geq(diff_count_param, zero)
    };
    func.set_operand(if_else, 0, crate::ir::Operand::Inst(exit_condition));

    (primal_count_param, diff_count_param)
}

/// Inserts iteration counters for all matched loop pairs and assigns every
/// block its enclosing-region index list.
///
/// A loop carrying a max-iterations decoration (on either side of the pair)
/// resolves to [`CountStatus::Static`]; anything else stays
/// [`CountStatus::Unresolved`] and later storage sizing for the region fails
/// loudly.
pub fn build_indexed_blocks(func: &mut Func) -> BlockIndexInfo {
    // Find differential loops and pair them with their primal counterparts
    // via the back-link decoration.
    let mut pairs = Vec::new();
    for block in func.block_ids() {
        let Some(term) = func.terminator(block) else {
            continue;
        };
        if func.inst(term).op() != Opcode::Loop {
            continue;
        }
        let Some(primal) = func.inst(term).decorations().iter().find_map(|d| match d {
            Decoration::Differential {
                primal: Some(PrimalLink::Inst(p)),
            } => Some(*p),
            _ => None,
        }) else {
            continue;
        };
        if func.inst(primal).op() != Opcode::Loop {
            continue;
        }
        pairs.push((primal, term));
    }

    let mut loop_to_info: HashMap<InstId, IndexTrackingInfo> = HashMap::new();
    for (primal_loop, diff_loop) in pairs {
        let (primal_count_param, diff_count_param) =
            lower_indexed_region(func, primal_loop, diff_loop);
        let status = match func
            .loop_max_iters(primal_loop)
            .or_else(|| func.loop_max_iters(diff_loop))
        {
            Some(n) => CountStatus::Static(n),
            None => CountStatus::Unresolved,
        };
        let info = IndexTrackingInfo {
            primal_count_param,
            diff_count_param,
            loop_header_block: loop_condition_block(func, primal_loop),
            status,
        };
        loop_to_info.insert(primal_loop, info.clone());
        loop_to_info.insert(diff_loop, info);
    }

    let region_map = IndexedRegionMap::build(func);
    let mut result = BlockIndexInfo::new();
    for block in func.block_ids() {
        let mut infos = Vec::new();
        for loop_inst in region_map.ancestor_loops(block) {
            if let Some(info) = loop_to_info.get(&loop_inst) {
                infos.push(info.clone());
            }
        }
        result.insert(block, infos);
    }
    result
}

/// Splits loop-condition-block values used both inside and after their loop.
///
/// A value computed in a primal condition block is visible to two distinct
/// regions: the loop body and everything after the loop. When both kinds of
/// use exist, the after-loop uses are redirected through a
/// [`Opcode::LoopExitValue`] marker so the two classes can be checkpointed
/// independently (the marker is lowered away at the end of the pipeline).
pub fn split_loop_condition_insts(func: &mut Func, indexed_block_info: &BlockIndexInfo) {
    // Collect primal loop condition blocks.
    let mut condition_blocks = Vec::new();
    for block in func.block_ids() {
        let Some(term) = func.terminator(block) else {
            continue;
        };
        if func.inst(term).op() != Opcode::Loop {
            continue;
        }
        let cond = loop_condition_block(func, term);
        if !func.is_differential_block(cond) {
            condition_blocks.push(cond);
        }
    }

    for cond_block in condition_blocks {
        let cond_indices = indexed_block_info
            .get(&cond_block)
            .cloned()
            .unwrap_or_default();

        for inst in func.inst_ids_in(cond_block) {
            if func.inst(inst).op().is_terminator() || !can_inst_be_stored(func, inst) {
                continue;
            }
            assert_ne!(
                func.inst(inst).op(),
                Opcode::Var,
                "loop condition blocks must not declare variables"
            );

            let mut loop_uses = Vec::new();
            let mut after_loop_uses = Vec::new();
            for use_ref in func.uses_of(inst) {
                let Some(user_block) = func.inst(use_ref.user).parent() else {
                    continue;
                };
                let user_indices = indexed_block_info
                    .get(&user_block)
                    .cloned()
                    .unwrap_or_default();
                // The user is inside the loop iff every region enclosing the
                // condition block also encloses the user.
                if indices_subset_of(&cond_indices, &user_indices) {
                    loop_uses.push(use_ref);
                } else {
                    after_loop_uses.push(use_ref);
                }
            }

            if !loop_uses.is_empty() && !after_loop_uses.is_empty() {
                let copy = {
                    let mut builder = Builder::new(func);
                    builder.set_insert_after_ordinary_inst(inst);
                    builder.emit_loop_exit_value(inst)
                };
                for use_ref in after_loop_uses {
                    func.set_operand(
                        use_ref.user,
                        use_ref.index as usize,
                        crate::ir::Operand::Inst(copy),
                    );
                }
            }
        }
    }
}
