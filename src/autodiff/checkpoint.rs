//! Checkpoint classification.
//!
//! For every primal value the differential code needs, decide whether to
//! store it to memory or recompute it in a recompute block. The decision is
//! made per distinct use, memoized per value, and propagated transitively:
//! recomputing a value obligates its operands, recomputing a variable drags
//! along the calls and stores that write it (and vice versa), and recomputing
//! a loop phi either resolves to induction information or walks into the
//! predecessor branch arguments.
//!
//! The policy never fails to decide: [`should_store_inst`] and
//! [`DefaultCheckpointPolicy::can_recompute`] always combine into a verdict,
//! and the worklist terminates because the store/recompute sets only grow.

use std::collections::{HashMap, HashSet};

use crate::autodiff::index::BlockIndexInfo;
use crate::autodiff::induction::{
    collect_induction_values, collect_loop_exit_conditions, LoopInductionValueInfo,
};
use crate::ir::{
    BlockId, Builder, Decoration, DominatorTree, Func, InstId, OpFlags, Opcode, Operand,
    OutOfOrderCloneContext, TypeKind, TypeTable, UseRef,
};
use crate::utils::OrderedSet;

/// A use of a primal value from the differential side: either a concrete
/// operand slot or a pseudo-use (a decoration reference, or the dependence of
/// a variable on its writer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct UseOrPseudoUse {
    /// The value whose availability is being decided.
    pub used_val: InstId,
    /// The consuming instruction (for pseudo-uses, the instruction the
    /// dependence hangs off).
    pub user: InstId,
    /// The concrete operand slot, when the use is a real IR use.
    pub ir_use: Option<UseRef>,
}

/// Operands required to invert an invertible instruction.
#[derive(Debug, Clone)]
pub struct InversionInfo {
    /// The instruction to run backwards.
    pub inst_to_invert: InstId,
    /// Operand values the inversion needs available.
    pub required_operands: Vec<InstId>,
}

/// The classifier's verdict for one value.
#[derive(Debug, Clone)]
pub enum HoistResult {
    /// Store the value to (possibly indexed) memory.
    Store(InstId),
    /// Re-execute the value's computation in a recompute block.
    Recompute(InstId),
    /// Invert a reversible computation instead of storing its inputs.
    Invert {
        /// The value recovered by inversion.
        inst: InstId,
        /// What the inversion requires.
        info: InversionInfo,
    },
}

/// The classification output: disjoint store/recompute/invert sets plus
/// derived loop facts.
#[derive(Debug, Default)]
pub struct CheckpointSetInfo {
    /// Values to store.
    pub store_set: OrderedSet<InstId>,
    /// Values to recompute.
    pub recompute_set: OrderedSet<InstId>,
    /// Values to invert.
    pub invert_set: OrderedSet<InstId>,
    /// Inversion requirements, keyed by inverted value.
    pub invert_info_map: HashMap<InstId, InversionInfo>,
    /// Loop phis with known induction structure.
    pub loop_induction_info: HashMap<InstId, LoopInductionValueInfo>,
    /// Loop phis (and counters) with known exit values.
    pub loop_exit_value_insts: HashMap<InstId, InstId>,
}

impl CheckpointSetInfo {
    /// Records a store decision.
    ///
    /// # Panics
    ///
    /// Panics if the value was already decided as recompute; a value in both
    /// sets is a classifier defect.
    pub fn add_store(&mut self, inst: InstId) {
        assert!(
            !self.recompute_set.contains(inst),
            "{inst:?} classified both store and recompute"
        );
        self.store_set.insert(inst);
    }

    /// Records a recompute decision.
    ///
    /// # Panics
    ///
    /// Panics if the value was already decided as store.
    pub fn add_recompute(&mut self, inst: InstId) {
        assert!(
            !self.store_set.contains(inst),
            "{inst:?} classified both store and recompute"
        );
        self.recompute_set.insert(inst);
    }
}

/// The legalizer's output: synthesized storage, recompute clones and
/// inversion bookkeeping.
#[derive(Debug, Default)]
pub struct HoistedPrimalsInfo {
    /// After legalization, the synthesized local variables holding stored
    /// values (before legalization, the raw values to store).
    pub store_set: OrderedSet<InstId>,
    /// Cloned instructions placed in recompute blocks.
    pub recompute_set: OrderedSet<InstId>,
    /// Cloned values recovered by inversion.
    pub invert_set: OrderedSet<InstId>,
    /// Instructions to run backwards.
    pub insts_to_invert: OrderedSet<InstId>,
    /// Inversion requirements keyed by cloned target.
    pub invert_info_map: HashMap<InstId, InversionInfo>,
}

/// Explicit per-callee checkpointing preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckpointPreference {
    None,
    PreferCheckpoint,
    PreferRecompute,
}

fn checkpoint_preference(func: &Func, callee: InstId) -> CheckpointPreference {
    for deco in func.inst(callee).decorations() {
        match deco {
            Decoration::PreferCheckpoint => return CheckpointPreference::PreferCheckpoint,
            Decoration::PreferRecompute => return CheckpointPreference::PreferRecompute,
            _ => {}
        }
    }
    CheckpointPreference::None
}

/// Returns `true` if values of `ty` can be written to checkpoint storage.
///
/// Pointers are excluded on top of the type table's own exclusions: an
/// address is never checkpointed as a value, it is re-derived instead.
pub(crate) fn can_type_be_stored(types: &TypeTable, ty: crate::ir::TypeId) -> bool {
    types.can_be_stored(ty) && !types.is_ptr_like(ty)
}

/// Follows element/field addressing back to the root address.
pub(crate) fn get_root_addr(func: &Func, mut addr: InstId) -> InstId {
    while matches!(
        func.inst(addr).op(),
        Opcode::ElementAddr | Opcode::FieldAddr
    ) {
        addr = func.inst_operand(addr, 0);
    }
    addr
}

fn is_global_or_unknown_mutable_address(func: &Func, ptr: InstId) -> bool {
    let root = get_root_addr(func, ptr);
    !matches!(func.inst(root).op(), Opcode::Var | Opcode::Param)
}

/// Returns `true` if the instruction sits in the function's parameter block
/// or the parameter prelude block that follows it.
fn is_inst_in_primal_parameter_blocks(func: &Func, inst: InstId) -> bool {
    let Some(parent) = func.inst(inst).parent() else {
        return false;
    };
    let entry = func.entry_block();
    if parent == entry {
        return true;
    }
    let Some(term) = func.terminator(entry) else {
        return false;
    };
    func.inst(term).op() == Opcode::Branch && func.operand(term, 0) == Operand::Block(parent)
}

/// The opcode-keyed storage decision.
///
/// Construction, extraction, cast, arithmetic, comparison and load opcodes
/// are never stored (cheap or free to re-derive); calls follow the callee's
/// preference, defaulting to storage unless the callee is known side-effect
/// free; an explicit checkpoint marker is always stored.
#[must_use]
pub fn should_store_inst(func: &Func, inst: InstId) -> bool {
    let record = func.inst(inst);
    let Some(ty) = record.ty() else {
        return false;
    };
    if !can_type_be_stored(func.types(), ty) {
        return false;
    }
    if record.op().flags().contains(OpFlags::NEVER_STORE) {
        return false;
    }

    match record.op() {
        Opcode::Call => {
            let callee = func.inst_operand(inst, 0);
            match checkpoint_preference(func, callee) {
                CheckpointPreference::PreferRecompute => false,
                CheckpointPreference::PreferCheckpoint => true,
                CheckpointPreference::None => {
                    // Recompute only callees a prior data-flow pass proved
                    // side-effect free and non-escaping.
                    !func
                        .inst(callee)
                        .has_decoration(|d| matches!(d, Decoration::ReadNone))
                }
            }
        }
        Opcode::CheckpointObject => true,
        _ => true,
    }
}

fn write_uses(func: &Func, var: InstId) -> Vec<UseRef> {
    func.uses_of(var)
        .into_iter()
        .filter(|u| {
            let op = func.inst(u.user).op();
            (op == Opcode::Store && u.index == 0) || op == Opcode::Call
        })
        .collect()
}

pub(crate) fn find_earliest_unique_write_use(func: &Func, var: InstId) -> Option<UseRef> {
    write_uses(func, var)
        .into_iter()
        .min_by_key(|u| func.inst_order_key(u.user))
}

pub(crate) fn find_latest_unique_write_use(func: &Func, var: InstId) -> Option<UseRef> {
    write_uses(func, var)
        .into_iter()
        .max_by_key(|u| func.inst_order_key(u.user))
}

/// Returns `true` if the variable holds a callee's primal context.
pub(crate) fn is_derivative_context_var(func: &Func, var: InstId) -> bool {
    func.inst(var)
        .has_decoration(|d| matches!(d, Decoration::PrimalContext(_)))
}

fn should_store_var(func: &Func, var: InstId) -> bool {
    let Some(store_use) = find_latest_unique_write_use(func, var) else {
        // Never written: nothing worth storing.
        return false;
    };
    let var_ty = func.inst(var).ty().expect("var must be typed");
    let Some(pointee) = func.types().pointee(var_ty) else {
        return false;
    };
    if !can_type_be_stored(func.types(), pointee) {
        return false;
    }
    if func.inst(store_use.user).op() == Opcode::Call {
        // A variable written by a call travels with the call's decision.
        return should_store_inst(func, store_use.user);
    }
    false
}

/// The default checkpointing policy.
///
/// Prepared once per function ([`DefaultCheckpointPolicy::prepare`] collects
/// induction and loop-exit facts), then driven by
/// [`DefaultCheckpointPolicy::process_func`].
#[derive(Debug, Default)]
pub struct DefaultCheckpointPolicy {
    induction_value_insts: HashMap<InstId, LoopInductionValueInfo>,
    loop_exit_value_insts: HashMap<InstId, InstId>,
}

impl DefaultCheckpointPolicy {
    /// Creates an unprepared policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the loop facts the policy consults.
    pub fn prepare(&mut self, func: &mut Func) {
        self.induction_value_insts = collect_induction_values(func);
        self.loop_exit_value_insts =
            collect_loop_exit_conditions(func, &self.induction_value_insts);
    }

    /// Returns `true` if the used value may be recomputed rather than stored.
    ///
    /// Vetoes recomputation for loads through global or unknown-mutable
    /// addresses, loads through parameter-prelude state (already mutated by
    /// the time differential code runs) except through const-ref roots, loop
    /// entry phis without induction structure, and loop-exit markers without
    /// a derived closed form.
    #[must_use]
    pub fn can_recompute(&self, func: &Func, used_val: InstId) -> bool {
        match func.inst(used_val).op() {
            Opcode::Load => {
                let ptr = func.inst_operand(used_val, 0);
                if is_global_or_unknown_mutable_address(func, ptr) {
                    return false;
                }
                if matches!(func.inst(ptr).op(), Opcode::Param | Opcode::Var) {
                    let root = get_root_addr(func, ptr);
                    if let Some(root_ty) = func.inst(root).ty() {
                        // A const-ref referent cannot change for the duration
                        // of the function; reloading it is always safe.
                        if matches!(func.types().kind(root_ty), TypeKind::ConstRef { .. }) {
                            return true;
                        }
                    }
                    if is_inst_in_primal_parameter_blocks(func, ptr) {
                        return false;
                    }
                }
                true
            }
            Opcode::Param => {
                if self.induction_value_insts.contains_key(&used_val) {
                    return true;
                }
                // A loop-entry phi carries state that cannot be re-derived
                // out of iteration order.
                let parent = func.inst(used_val).parent().expect("param must be placed");
                for pred in func.predecessors(parent) {
                    if let Some(term) = func.terminator(pred) {
                        if func.inst(term).op() == Opcode::Loop && func.loop_target(term) == parent
                        {
                            return false;
                        }
                    }
                }
                true
            }
            Opcode::LoopExitValue => {
                let val = func.inst_operand(used_val, 0);
                self.loop_exit_value_insts.contains_key(&val)
            }
            _ => true,
        }
    }

    /// Classifies one use. Always yields a verdict.
    pub(crate) fn classify(&self, func: &Func, use_: UseOrPseudoUse) -> HoistResult {
        if func.inst(use_.used_val).op() == Opcode::Var {
            if should_store_var(func, use_.used_val) {
                HoistResult::Store(use_.used_val)
            } else {
                HoistResult::Recompute(use_.used_val)
            }
        } else if should_store_inst(func, use_.used_val) {
            HoistResult::Store(use_.used_val)
        } else if self.can_recompute(func, use_.used_val) {
            HoistResult::Recompute(use_.used_val)
        } else {
            // Recomputation is vetoed; the fallback is storage.
            HoistResult::Store(use_.used_val)
        }
    }

    /// Classifies every primal value the differential code depends on, then
    /// applies the decisions: store-set members are collected for the
    /// legalizer, recompute-set members are cloned into their recompute
    /// blocks (with induction phis replaced by counter expressions), and
    /// differential uses are snapped to the clones.
    pub fn process_func(
        &self,
        func: &mut Func,
        recompute_map: &HashMap<BlockId, BlockId>,
        clone_ctx: &mut OutOfOrderCloneContext,
        block_index_info: &BlockIndexInfo,
    ) -> HoistedPrimalsInfo {
        let dom = DominatorTree::compute(func);

        let mut checkpoint_info = CheckpointSetInfo::default();
        checkpoint_info.loop_exit_value_insts = self.loop_exit_value_insts.clone();

        let mut worklist: Vec<UseOrPseudoUse> = Vec::new();
        let mut processed: HashSet<UseOrPseudoUse> = HashSet::new();
        let mut uses_to_replace: HashSet<UseRef> = HashSet::new();

        // Seed with every primal operand consumed from differential blocks.
        let entry = func.entry_block();
        for block in func.block_ids() {
            if block == entry || !func.is_differential_block(block) {
                continue;
            }
            let mut children = func.block(block).params().to_vec();
            children.extend(func.inst_ids_in(block));
            for child in children {
                // The primals feeding the return pair are results, not
                // dependencies of the differential computation.
                if func.inst(child).op() == Opcode::MakeDifferentialPair {
                    let uses = func.uses_of(child);
                    if uses
                        .first()
                        .is_some_and(|u| func.inst(u.user).op() == Opcode::Return)
                    {
                        assert_eq!(uses.len(), 1, "return pair must have a single use");
                        continue;
                    }
                }

                add_primal_operands_to_worklist(func, child, &mut worklist);

                if func.inst(child).op() == Opcode::DifferentiableTypeAnnotation {
                    checkpoint_info.add_recompute(child);
                }

                // Only these decorations count as differential uses of a
                // primal value; anything else risks phantom obligations.
                for deco in func.inst(child).decorations().to_vec() {
                    match deco {
                        Decoration::PrimalContext(var) => worklist.push(UseOrPseudoUse {
                            used_val: var,
                            user: child,
                            ir_use: None,
                        }),
                        Decoration::LoopExitPrimalValue(val) => worklist.push(UseOrPseudoUse {
                            used_val: val,
                            user: child,
                            ir_use: None,
                        }),
                        _ => {}
                    }
                }
            }
        }

        loop {
            while let Some(use_) = worklist.pop() {
                if !processed.insert(use_) {
                    continue;
                }

                // A value seen through a different use may already be decided.
                let result = if checkpoint_info.recompute_set.contains(use_.used_val) {
                    HoistResult::Recompute(use_.used_val)
                } else if checkpoint_info.store_set.contains(use_.used_val) {
                    HoistResult::Store(use_.used_val)
                } else {
                    self.classify(func, use_)
                };

                match result {
                    HoistResult::Store(inst) => checkpoint_info.add_store(inst),
                    HoistResult::Recompute(inst) => {
                        checkpoint_info.add_recompute(inst);

                        if func.is_differential_inst(use_.user) {
                            if let Some(ir_use) = use_.ir_use {
                                uses_to_replace.insert(ir_use);
                            }
                        }

                        match func.inst(inst).op() {
                            Opcode::Param => {
                                if let Some(&info) = self.induction_value_insts.get(&inst) {
                                    checkpoint_info
                                        .loop_induction_info
                                        .entry(inst)
                                        .or_insert(info);
                                    continue;
                                }

                                // Chase the phi into every predecessor's
                                // branch argument.
                                let param_block =
                                    func.inst(inst).parent().expect("param must be placed");
                                let param_index = func
                                    .param_index(param_block, inst)
                                    .expect("param belongs to its block");
                                for pred in func.predecessors(param_block) {
                                    // Recomputing values across a loop region
                                    // boundary is not supported (and would be
                                    // inefficient if it were).
                                    assert!(
                                        !dom.dominates(param_block, pred),
                                        "cannot recompute phi {inst:?} across a loop region boundary"
                                    );
                                    let term = func
                                        .terminator(pred)
                                        .expect("predecessor must be terminated");
                                    assert!(func.branch_arg_count(term) > param_index);
                                    let arg = func.branch_arg(term, param_index);
                                    let fixed = match func.inst(term).op() {
                                        Opcode::Branch => 1,
                                        Opcode::Loop => 3,
                                        other => panic!("phi predecessor terminator {other:?}"),
                                    };
                                    worklist.push(UseOrPseudoUse {
                                        used_val: arg,
                                        user: term,
                                        ir_use: Some(UseRef {
                                            user: term,
                                            index: (fixed + param_index) as u32,
                                        }),
                                    });
                                }
                            }
                            Opcode::LoopExitValue => {
                                // Nothing further to enqueue: the marker
                                // resolves to the derived constant.
                                let val = func.inst_operand(inst, 0);
                                debug_assert!(
                                    checkpoint_info.loop_exit_value_insts.contains_key(&val)
                                );
                            }
                            Opcode::Var => {
                                // The variable and its writers travel
                                // together; surface each writer as a
                                // pseudo-use.
                                for var_use in func.uses_of(inst) {
                                    match func.inst(var_use.user).op() {
                                        Opcode::Store | Opcode::Call => {
                                            worklist.push(UseOrPseudoUse {
                                                used_val: var_use.user,
                                                user: inst,
                                                ir_use: None,
                                            });
                                        }
                                        _ => {}
                                    }
                                }
                            }
                            _ => add_primal_operands_to_worklist(func, inst, &mut worklist),
                        }
                    }
                    HoistResult::Invert { inst, info } => {
                        checkpoint_info.invert_set.insert(inst);
                        checkpoint_info.invert_info_map.insert(inst, info);
                    }
                }
            }

            // Retroactive correction: a recomputed variable promotes the
            // calls/stores writing it (and a recomputed call promotes its
            // variable arguments) out of the store set, to a fixed point.
            let mut call_var_worklist: Vec<InstId> = Vec::new();
            let mut call_var_seen: HashSet<InstId> = HashSet::new();
            for inst in checkpoint_info.recompute_set.iter() {
                if matches!(func.inst(inst).op(), Opcode::Call | Opcode::Var)
                    && call_var_seen.insert(inst)
                {
                    call_var_worklist.push(inst);
                }
            }

            let mut index = 0;
            while index < call_var_worklist.len() {
                let inst = call_var_worklist[index];
                index += 1;

                match func.inst(inst).op() {
                    Opcode::Var => {
                        for use_ref in func.uses_of(inst) {
                            let user = use_ref.user;
                            match func.inst(user).op() {
                                Opcode::Call => {
                                    checkpoint_info.store_set.remove(user);
                                    checkpoint_info.add_recompute(user);
                                    if call_var_seen.insert(user) {
                                        call_var_worklist.push(user);
                                    }
                                }
                                Opcode::Store => {
                                    checkpoint_info.store_set.remove(user);
                                    checkpoint_info.add_recompute(user);
                                }
                                _ => {}
                            }
                        }
                        for use_ref in func.uses_of(inst) {
                            if func.is_differential_inst(use_ref.user) {
                                uses_to_replace.insert(use_ref);
                            }
                        }
                    }
                    Opcode::Call => {
                        for arg_index in 1..func.inst(inst).operands().len() {
                            let Operand::Inst(arg) = func.operand(inst, arg_index) else {
                                continue;
                            };
                            if func.inst(arg).op() == Opcode::Var {
                                checkpoint_info.store_set.remove(arg);
                                checkpoint_info.add_recompute(arg);
                                if call_var_seen.insert(arg) {
                                    call_var_worklist.push(arg);
                                }
                            }
                        }

                        let callee = func.inst_operand(inst, 0);
                        let callee_use = UseOrPseudoUse {
                            used_val: callee,
                            user: inst,
                            ir_use: Some(UseRef {
                                user: inst,
                                index: 0,
                            }),
                        };
                        if func.inst(callee).parent().is_some() && !processed.contains(&callee_use)
                        {
                            add_primal_operands_to_worklist(func, inst, &mut worklist);
                        }

                        for use_ref in func.uses_of(inst) {
                            if func.is_differential_inst(use_ref.user) {
                                uses_to_replace.insert(use_ref);
                            }
                        }
                    }
                    _ => {}
                }
            }

            if worklist.is_empty() {
                break;
            }
        }

        apply_checkpoint_set(
            func,
            &checkpoint_info,
            &uses_to_replace,
            recompute_map,
            clone_ctx,
            block_index_info,
        )
    }
}

fn add_primal_operands_to_worklist(
    func: &Func,
    inst: InstId,
    worklist: &mut Vec<UseOrPseudoUse>,
) {
    for (index, operand) in func.inst(inst).operands().iter().enumerate() {
        let Operand::Inst(val) = *operand else {
            continue;
        };
        // Module-scope values (constants, callee and global references) are
        // visible everywhere and never need hoisting.
        if func.inst(val).parent().is_none() {
            continue;
        }
        if matches!(func.inst(val).op(), Opcode::FuncRef | Opcode::GlobalVarRef) {
            continue;
        }
        if func.is_differential_inst(val) {
            continue;
        }
        worklist.push(UseOrPseudoUse {
            used_val: val,
            user: inst,
            ir_use: Some(UseRef {
                user: inst,
                index: index as u32,
            }),
        });
    }
}

/// Applies the classification: moves store-set members into the hoist info,
/// clones recompute-set members into their recompute blocks and rewires phi
/// arguments and pending differential uses.
fn apply_checkpoint_set(
    func: &mut Func,
    checkpoint_info: &CheckpointSetInfo,
    pending_uses: &HashSet<UseRef>,
    recompute_map: &HashMap<BlockId, BlockId>,
    clone_ctx: &mut OutOfOrderCloneContext,
    block_index_info: &BlockIndexInfo,
) -> HoistedPrimalsInfo {
    let mut hoist = HoistedPrimalsInfo::default();

    for &use_ref in pending_uses {
        clone_ctx.add_pending_use(use_ref);
    }

    let entry = func.entry_block();
    let prelude = func.next_block(entry);

    for block in func.block_ids() {
        if block == entry || Some(block) == prelude {
            continue;
        }
        if func.is_differential_block(block) || func.is_recompute_block(block) {
            continue;
        }

        let recompute_block = recompute_map.get(&block).copied().unwrap_or(block);
        let anchor = func
            .first_ordinary_inst(recompute_block)
            .expect("recompute block must be terminated");

        let params = func.block(block).params().to_vec();
        for (ii, &param) in params.iter().enumerate() {
            let is_recomputed = checkpoint_info.recompute_set.contains(param);
            let is_inverted = checkpoint_info.invert_set.contains(param);
            let has_induction = checkpoint_info.loop_induction_info.contains_key(&param);
            if !is_recomputed && !is_inverted {
                continue;
            }

            if !has_induction {
                assert!(
                    recompute_block != block,
                    "recomputed param should belong to a block that has a recompute block"
                );
            }

            apply_to_inst(
                func,
                checkpoint_info,
                &mut hoist,
                clone_ctx,
                block_index_info,
                anchor,
                param,
            );

            if has_induction {
                continue;
            }

            // Feed the primal phi argument into each recompute predecessor;
            // the patch-up pass below swaps in recomputed versions where they
            // exist.
            let mut seen_preds: HashSet<BlockId> = HashSet::new();
            for pred in func.predecessors(block) {
                if !seen_preds.insert(pred) {
                    continue;
                }
                let pred_term = func
                    .terminator(pred)
                    .expect("predecessor must be terminated");
                let primal_phi_arg = func.branch_arg(pred_term, ii);
                let recompute_pred = *recompute_map
                    .get(&pred)
                    .expect("phi predecessor must have a recompute block");
                let recompute_term = func
                    .terminator(recompute_pred)
                    .expect("recompute predecessor must be terminated");
                func.push_branch_arg(recompute_term, primal_phi_arg);
            }
        }

        // Params reappear here so store-set params are collected; repeat
        // visits are no-ops through the clone map and set dedup.
        let mut children = params;
        children.extend(func.inst_ids_in(block));
        for child in children {
            apply_to_inst(
                func,
                checkpoint_info,
                &mut hoist,
                clone_ctx,
                block_index_info,
                anchor,
                child,
            );
        }
    }

    // Swap recompute-block phi arguments over to their recomputed versions.
    for block in func.block_ids() {
        if !func.is_recompute_block(block) {
            continue;
        }
        let Some(term) = func.terminator(block) else {
            continue;
        };
        let operands = func.inst(term).operands().to_vec();
        for (index, operand) in operands.iter().enumerate() {
            if let Operand::Inst(arg) = *operand {
                if let Some(recomputed) = clone_ctx.lookup(arg) {
                    func.set_operand(term, index, Operand::Inst(recomputed));
                }
            }
        }
    }

    hoist
}

fn apply_to_inst(
    func: &mut Func,
    checkpoint_info: &CheckpointSetInfo,
    hoist: &mut HoistedPrimalsInfo,
    clone_ctx: &mut OutOfOrderCloneContext,
    block_index_info: &BlockIndexInfo,
    anchor: InstId,
    inst: InstId,
) {
    if checkpoint_info.store_set.contains(inst) {
        hoist.store_set.insert(inst);
        return;
    }

    if checkpoint_info.recompute_set.contains(inst) && clone_ctx.lookup(inst).is_none() {
        let op = func.inst(inst).op();
        if op == Opcode::LoopExitValue {
            let val = func.inst_operand(inst, 0);
            let Some(&exit_value) = checkpoint_info.loop_exit_value_insts.get(&val) else {
                // A LoopExitValue only classifies as recompute when an exit
                // value was derived for its operand.
                panic!("no loop exit value found for {inst:?}");
            };
            clone_ctx.register(func, inst, exit_value);
            return;
        }

        if op == Opcode::Param {
            // First-block parameters dominate everything; nothing to do.
            if func.inst(inst).parent() == Some(func.entry_block()) {
                return;
            }
            if let Some(&induction) = checkpoint_info.loop_induction_info.get(&inst) {
                let replacement = match induction {
                    LoopInductionValueInfo::AlwaysTrue => {
                        // The continue flag is true on every reverse
                        // iteration that runs.
                        func.get_bool_value(true)
                    }
                    LoopInductionValueInfo::AffineFunctionOfCounter {
                        loop_inst,
                        counter_offset,
                        counter_factor,
                    } => {
                        let target = func.loop_target(loop_inst);
                        let indices = block_index_info
                            .get(&target)
                            .expect("indexed info for loop condition block");
                        assert!(!indices.is_empty());
                        let mut replacement =
                            indices.last().expect("innermost index").diff_count_param;
                        let ty = func.inst(replacement).ty().expect("counter is typed");
                        if counter_factor != 1 {
                            let factor = func.get_int_value(ty, counter_factor);
                            let mut builder = Builder::new(func);
                            builder.set_insert_after_ordinary_inst(replacement);
                            replacement = builder.emit_mul(ty, replacement, factor);
                        }
                        let mut builder = Builder::new(func);
                        builder.set_insert_after_ordinary_inst(replacement);
                        builder.emit_add(ty, replacement, counter_offset)
                    }
                };

                // Bridge signedness/width differences with an int cast.
                let inst_ty = func.inst(inst).ty().expect("param must be typed");
                let replacement = if func.inst(replacement).ty() == Some(inst_ty) {
                    replacement
                } else {
                    let mut builder = Builder::new(func);
                    builder.set_insert_after_ordinary_inst(replacement);
                    builder.emit_cast(inst_ty, replacement)
                };

                clone_ctx.register(func, inst, replacement);
                return;
            }
        }

        let recompute_inst = {
            let mut builder = Builder::new(func);
            builder.set_insert_before(anchor);
            clone_ctx.clone_inst_out_of_order(&mut builder, inst)
        };
        hoist.recompute_set.insert(recompute_inst);
    }

    if checkpoint_info.invert_set.contains(inst) {
        let info = checkpoint_info.invert_info_map[&inst].clone();
        let cloned_target = {
            let mut builder = Builder::new(func);
            builder.set_insert_before(anchor);
            clone_ctx.clone_inst_out_of_order(&mut builder, info.inst_to_invert)
        };
        let required_operands = info
            .required_operands
            .iter()
            .map(|&operand| clone_ctx.lookup(operand).unwrap_or(operand))
            .collect();
        hoist.invert_info_map.insert(
            cloned_target,
            InversionInfo {
                inst_to_invert: info.inst_to_invert,
                required_operands,
            },
        );
        hoist.insts_to_invert.insert(cloned_target);
        let cloned = {
            let mut builder = Builder::new(func);
            builder.set_insert_before(anchor);
            clone_ctx.clone_inst_out_of_order(&mut builder, inst)
        };
        hoist.invert_set.insert(cloned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::testutil::build_paired_loop_func;
    use crate::ir::TypeKind;
    use strum::IntoEnumIterator;

    #[test]
    fn test_should_store_is_total() {
        // Every opcode must yield a decision without panicking, for a
        // representative typed instruction shape.
        let mut func = Func::new();
        let int = func.types_mut().int();
        let block = func.alloc_block();
        func.insert_block_at_end(block);
        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(block);
        let probe = builder.emit(Opcode::Undefined, Some(int), &[]);
        let _ = should_store_inst(&func, probe);
        for op in Opcode::iter() {
            // The flags table is consulted for every opcode.
            let _ = op.flags().contains(OpFlags::NEVER_STORE);
        }
    }

    #[test]
    fn test_call_without_read_none_is_stored() {
        let mut func = Func::new();
        let float = func.types_mut().float();
        let block = func.alloc_block();
        func.insert_block_at_end(block);

        let plain_callee = func.create_func_ref(vec![]);
        let pure_callee = func.create_func_ref(vec![Decoration::ReadNone]);
        let prefer_recompute = func.create_func_ref(vec![Decoration::PreferRecompute]);
        let prefer_store = func.create_func_ref(vec![
            Decoration::ReadNone,
            Decoration::PreferCheckpoint,
        ]);

        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(block);
        let plain = builder.emit_call(Some(float), plain_callee, &[]);
        let pure = builder.emit_call(Some(float), pure_callee, &[]);
        let recompute = builder.emit_call(Some(float), prefer_recompute, &[]);
        let store = builder.emit_call(Some(float), prefer_store, &[]);

        assert!(should_store_inst(&func, plain));
        assert!(!should_store_inst(&func, pure));
        assert!(!should_store_inst(&func, recompute));
        assert!(should_store_inst(&func, store));
    }

    #[test]
    fn test_const_ref_load_always_recomputable() {
        let mut func = Func::new();
        let float = func.types_mut().float();
        let cref = func.types_mut().const_ref(float);
        let entry = func.alloc_block();
        func.insert_block_at_end(entry);
        let body = func.alloc_block();
        func.insert_block_at_end(body);

        let mut builder = Builder::new(&mut func);
        let param = builder.emit_param(entry, cref);
        builder.set_insert_into(entry);
        builder.emit_branch(body, &[]);
        builder.set_insert_into(body);
        let load = builder.emit_load(param);
        builder.emit_return(Some(load));

        let policy = DefaultCheckpointPolicy::new();
        assert!(policy.can_recompute(&func, load));
    }

    #[test]
    fn test_prelude_mutable_param_load_not_recomputable() {
        let mut func = Func::new();
        let float = func.types_mut().float();
        let ptr = func.types_mut().ptr(float);
        let entry = func.alloc_block();
        func.insert_block_at_end(entry);
        let body = func.alloc_block();
        func.insert_block_at_end(body);

        let mut builder = Builder::new(&mut func);
        let param = builder.emit_param(entry, ptr);
        builder.set_insert_into(entry);
        builder.emit_branch(body, &[]);
        builder.set_insert_into(body);
        let load = builder.emit_load(param);
        builder.emit_return(Some(load));

        let policy = DefaultCheckpointPolicy::new();
        assert!(!policy.can_recompute(&func, load));
    }

    #[test]
    fn test_global_load_not_recomputable() {
        let mut func = Func::new();
        let float = func.types_mut().float();
        let global = func.create_global_var_ref(float);
        let block = func.alloc_block();
        func.insert_block_at_end(block);

        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(block);
        let load = builder.emit_load(global);
        builder.emit_return(Some(load));

        let policy = DefaultCheckpointPolicy::new();
        assert!(!policy.can_recompute(&func, load));
    }

    #[test]
    fn test_loop_entry_phi_not_recomputable() {
        let mut fixture = build_paired_loop_func(5);
        let _ = crate::autodiff::index::build_indexed_blocks(&mut fixture.func);
        let mut policy = DefaultCheckpointPolicy::new();
        policy.prepare(&mut fixture.func);

        // The float accumulator phi has no induction structure and sits at a
        // loop entry block: recomputation is vetoed.
        assert!(!policy.can_recompute(&fixture.func, fixture.sum_phi));
        // The integer induction phi resolves through the counter.
        assert!(policy.can_recompute(&fixture.func, fixture.i_phi));
    }

    #[test]
    #[should_panic(expected = "classified both store and recompute")]
    fn test_partition_violation_asserts() {
        let mut info = CheckpointSetInfo::default();
        let inst = InstId::new(1);
        info.add_store(inst);
        info.add_recompute(inst);
    }

    #[test]
    fn test_can_type_be_stored_excludes_pointers() {
        let mut types = TypeTable::new();
        let float = types.float();
        let ptr = types.ptr(float);
        let cref = types.const_ref(float);
        let func_ty = types.intern(TypeKind::Func);

        assert!(can_type_be_stored(&types, float));
        assert!(!can_type_be_stored(&types, ptr));
        assert!(!can_type_be_stored(&types, cref));
        assert!(!can_type_be_stored(&types, func_ty));
    }
}
