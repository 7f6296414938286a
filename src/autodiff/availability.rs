//! Primal availability legalization.
//!
//! After classification and recompute-block construction, differential code
//! still references primal values whose definitions no longer dominate the
//! uses (a value computed inside the forward loop, read by the reverse
//! loop). This pass makes every such access legal:
//!
//! - store-set values get a synthesized local variable, one array dimension
//!   per enclosing loop region (sized `max_iters + 1`, which requires the
//!   region bound to be static), written once right after the definition and
//!   addressed by the primal counters;
//! - out-of-scope uses are replaced by loads addressed by the differential
//!   counter (same region) or the previous primal iteration's counter
//!   (outside the region), with the loop header block using the counter
//!   directly;
//! - pass-through instructions are never materialized; their operands absorb
//!   the obligation;
//! - uses reached through chains of pass-through instructions are rewritten
//!   by cloning the chain onto the new load, out of order.
//!
//! Loop counters are pulled out of the store set and legalized after
//! everything else in descending nest-depth order: a counter at level N is
//! stored indexed by the shallower counters, so the loads created for it
//! become uses the shallower counters' own legalization must still see.

use std::collections::{BTreeMap, HashSet};

use crate::autodiff::checkpoint::{
    find_earliest_unique_write_use, find_latest_unique_write_use, is_derivative_context_var,
    HoistedPrimalsInfo,
};
use crate::autodiff::index::{
    can_inst_be_stored, indices_subset_of, BlockIndexInfo, CountStatus, IndexTrackingInfo,
};
use crate::ir::{
    BlockId, Builder, Decoration, DominatorTree, Func, InstId, OpFlags, Opcode, Operand,
    OutOfOrderCloneContext, TypeId, UseRef,
};
use crate::utils::OrderedSet;
use crate::{Error, Result};

/// Returns `true` if uses must be looked up *through* this instruction: it
/// cannot be stored as a unit, so its consumers are the real audience.
fn is_passthrough_inst(func: &Func, inst: InstId) -> bool {
    let op = func.inst(inst).op();
    if op.is_terminator() {
        return false;
    }
    if !can_inst_be_stored(func, inst) {
        return true;
    }
    op.flags().contains(OpFlags::PASS_THROUGH)
}

fn value_at(func: &Func, use_ref: UseRef) -> InstId {
    func.inst_operand(use_ref.user, use_ref.index as usize)
}

/// A path of uses from a base value to one relevant terminal use, stored in
/// reverse: element 0 is the terminal use, the last element is the direct use
/// of the base value.
#[derive(Debug, Clone)]
struct UseChain {
    chain: Vec<UseRef>,
}

impl UseChain {
    fn collect(
        func: &Func,
        base_use: UseRef,
        is_relevant: &dyn Fn(&Func, UseRef) -> bool,
        depth: usize,
    ) -> Vec<UseChain> {
        // Terminal case: a relevant use ends the chain.
        if is_relevant(func, base_use) {
            return vec![UseChain {
                chain: vec![base_use],
            }];
        }
        // An irrelevant use that is not a pass-through is a dead end.
        let user = base_use.user;
        if !is_passthrough_inst(func, user) {
            return Vec::new();
        }
        assert!(depth < 1024, "pass-through chain too deep");

        let mut result = Vec::new();
        for use_ref in func.uses_of(user) {
            for mut chain in Self::collect(func, use_ref, is_relevant, depth + 1) {
                chain.chain.push(base_use);
                result.push(chain);
            }
        }
        result
    }

    /// Clones the intermediate pass-through links (everything but the base
    /// value and the terminal link) at the builder's position.
    fn replace_inner_links(
        &self,
        func: &mut Func,
        ctx: &mut OutOfOrderCloneContext,
        before: InstId,
    ) {
        assert!(!self.chain.is_empty());
        let count = self.chain.len();
        for i in (1..count.saturating_sub(1)).rev() {
            let val = value_at(func, self.chain[i]);
            let mut builder = Builder::new(func);
            builder.set_insert_before(before);
            ctx.clone_inst_out_of_order(&mut builder, val);
        }
    }
}

/// All chains from one base value to its relevant uses, grouped by terminal
/// use. Shared intermediate nodes are handled by out-of-order cloning at
/// replacement time.
#[derive(Debug)]
struct UseGraph {
    chain_sets: Vec<(UseRef, Vec<UseChain>)>,
}

impl UseGraph {
    fn from(
        func: &Func,
        base_inst: InstId,
        is_relevant: &dyn Fn(&Func, UseRef) -> bool,
    ) -> UseGraph {
        let mut chain_sets: Vec<(UseRef, Vec<UseChain>)> = Vec::new();
        for use_ref in func.uses_of(base_inst) {
            for chain in UseChain::collect(func, use_ref, is_relevant, 0) {
                let terminal = chain.chain[0];
                match chain_sets.iter_mut().find(|(u, _)| *u == terminal) {
                    Some((_, chains)) => chains.push(chain),
                    None => chain_sets.push((terminal, vec![chain])),
                }
            }
        }
        UseGraph { chain_sets }
    }

    fn unique_uses(&self) -> Vec<UseRef> {
        self.chain_sets.iter().map(|(u, _)| *u).collect()
    }

    /// Substitutes `replacement` for the base value along every chain leading
    /// to `relevant_use`, cloning the pass-through links and finally swapping
    /// the terminal operand.
    fn replace(&self, func: &mut Func, relevant_use: UseRef, replacement: InstId) {
        let chains = &self
            .chain_sets
            .iter()
            .find(|(u, _)| *u == relevant_use)
            .expect("use must belong to this graph")
            .1;

        let mut ctx = OutOfOrderCloneContext::new();
        for chain in chains.iter() {
            let base_val = value_at(func, *chain.chain.last().expect("chain is never empty"));
            ctx.register(func, base_val, replacement);
        }
        for chain in chains.iter() {
            chain.replace_inner_links(func, &mut ctx, relevant_use.user);
        }

        let terminal_val = value_at(func, relevant_use);
        let last = {
            let mut builder = Builder::new(func);
            builder.set_insert_before(relevant_use.user);
            ctx.clone_inst_out_of_order(&mut builder, terminal_val)
        };
        func.set_operand(
            relevant_use.user,
            relevant_use.index as usize,
            Operand::Inst(last),
        );
    }
}

/// Drops array dimensions no out-of-scope use is actually nested under.
fn maybe_trim_indices(
    func: &Func,
    def_block_indices: &[IndexTrackingInfo],
    indexed_block_info: &BlockIndexInfo,
    out_of_scope_uses: &[UseRef],
) -> Vec<IndexTrackingInfo> {
    let mut result = Vec::new();
    for index in def_block_indices {
        let found = out_of_scope_uses.iter().any(|use_ref| {
            let Some(use_block) = func.inst(use_ref.user).parent() else {
                return false;
            };
            indexed_block_info
                .get(&use_block)
                .is_some_and(|indices| indices.contains(index))
        });
        if found {
            result.push(index.clone());
        }
    }
    result
}

/// How many loop regions enclose the definition, with loop counters not
/// counting their own loop.
fn inst_region_nest_level(
    func: &Func,
    indexed_block_info: &BlockIndexInfo,
    def_block: BlockId,
    inst: InstId,
) -> usize {
    let mut level = indexed_block_info
        .get(&def_block)
        .map_or(0, std::vec::Vec::len);
    if level > 0 && func.is_loop_counter(inst) {
        level -= 1;
    }
    level
}

struct Legalizer<'a> {
    func: &'a mut Func,
    dom: DominatorTree,
    indexed: &'a BlockIndexInfo,
    default_var_block: BlockId,
    default_recompute_var_block: BlockId,
    processed_store_set: OrderedSet<InstId>,
}

impl Legalizer<'_> {
    fn block_indices(&self, block: BlockId) -> Vec<IndexTrackingInfo> {
        self.indexed.get(&block).cloned().unwrap_or_default()
    }

    fn storage_type(&mut self, base: TypeId, indices: &[IndexTrackingInfo]) -> Result<TypeId> {
        let mut ty = base;
        // Outer dimensions wrap last so the address chain (emitted outer
        // first) peels dimensions in loop-nesting order.
        for index in indices.iter().rev() {
            let CountStatus::Static(max_iters) = index.status else {
                return Err(Error::UnboundedLoop {
                    block: index.loop_header_block.index(),
                });
            };
            ty = self.func.types_mut().array(ty, max_iters + 1);
        }
        Ok(ty)
    }

    fn emit_indexed_local_var(
        &mut self,
        var_block: BlockId,
        base_ty: TypeId,
        indices: &[IndexTrackingInfo],
    ) -> Result<InstId> {
        // Pointer and type values must have been filtered out by the
        // classifier; reaching here with one is a defect.
        assert!(
            !self.func.types().is_ptr_like(base_ty),
            "cannot store pointers"
        );
        assert!(
            self.func.types().can_be_stored(base_ty),
            "cannot store type-like values"
        );

        let storage_ty = self.storage_type(base_ty, indices)?;
        let mut builder = Builder::new(self.func);
        match builder.func().first_ordinary_inst(var_block) {
            Some(first) => builder.set_insert_before(first),
            None => builder.set_insert_into(var_block),
        }
        let var = builder.emit_var(storage_ty);
        let init = builder.emit_default_construct(storage_ty);
        builder.emit_store(var, init);
        Ok(var)
    }

    /// Synthesizes storage for `value` and writes it immediately after
    /// `after`, addressed by the primal counters. Returns the local variable.
    fn store_indexed_value(
        &mut self,
        after: InstId,
        var_block: BlockId,
        value: InstId,
        indices: &[IndexTrackingInfo],
    ) -> Result<InstId> {
        let value_ty = self
            .func
            .inst(value)
            .ty()
            .expect("stored value must be typed");
        let local_var = self.emit_indexed_local_var(var_block, value_ty, indices)?;

        let mut builder = Builder::new(self.func);
        builder.set_insert_after_ordinary_inst(after);
        let mut addr = local_var;
        for index in indices {
            addr = builder.emit_element_address(addr, index.primal_count_param);
        }
        builder.emit_store(addr, value);
        Ok(local_var)
    }

    /// Emits the address for reading `local_var` at a use site.
    ///
    /// Per dimension: a use inside the same indexed region reads the current
    /// reverse iteration (differential counter); a use outside reads the last
    /// written element (`primal counter - 1`), except when the definition
    /// sits in the loop header block, which runs one extra time and uses the
    /// counter directly.
    fn emit_indexed_load_address(
        &mut self,
        before: InstId,
        local_var: InstId,
        def_block: BlockId,
        def_indices: &[IndexTrackingInfo],
        use_indices: &[IndexTrackingInfo],
    ) -> InstId {
        let mut builder = Builder::new(self.func);
        builder.set_insert_before(before);
        let mut addr = local_var;
        for index in def_indices {
            if use_indices.contains(index) {
                addr = builder.emit_element_address(addr, index.diff_count_param);
            } else {
                let counter = index.primal_count_param;
                let last_value = if index.loop_header_block == def_block {
                    counter
                } else {
                    let ty = builder
                        .func()
                        .inst(counter)
                        .ty()
                        .expect("counter is typed");
                    let one = builder.get_int_value(ty, 1);
                    builder.emit_sub(ty, counter, one)
                };
                addr = builder.emit_element_address(addr, last_value);
            }
        }
        addr
    }

    fn ensure_available(&mut self, inst_set: &OrderedSet<InstId>, is_recompute: bool) -> Result<()> {
        assert!(!self.func.is_differential_block(self.default_var_block));

        let mut worklist: Vec<InstId> = inst_set.iter().collect();
        let mut seen: HashSet<InstId> = HashSet::new();

        while let Some(inst_to_store) = worklist.pop() {
            if seen.contains(&inst_to_store) {
                continue;
            }

            let def_block = if self.func.inst(inst_to_store).op() == Opcode::Var {
                let write = find_earliest_unique_write_use(self.func, inst_to_store)
                    .expect("checkpointed variable must be written");
                self.func
                    .inst(write.user)
                    .parent()
                    .expect("write must be placed")
            } else {
                self.func
                    .inst(inst_to_store)
                    .parent()
                    .expect("checkpointed value must be placed")
            };

            // Discover uses that are out of scope at their site: differential
            // or recompute consumers the definition does not (compatibly)
            // dominate.
            let out_of_scope_uses;
            let use_graph;
            {
                let func: &Func = self.func;
                let dom = &self.dom;
                let indexed = self.indexed;
                let def_indices = self.block_indices(def_block);
                let nest_level = inst_region_nest_level(func, indexed, def_block, inst_to_store);
                let def_is_diff_or_recompute = func.is_differential_or_recompute_block(def_block);
                let ptr_typed = func
                    .inst(inst_to_store)
                    .ty()
                    .is_some_and(|ty| func.types().is_ptr_like(ty));

                let is_relevant = move |func: &Func, use_ref: UseRef| -> bool {
                    let Some(user_block) = func.inst(use_ref.user).parent() else {
                        return false;
                    };
                    if !func.is_differential_or_recompute_block(user_block) {
                        return false;
                    }
                    if !is_recompute {
                        return true;
                    }
                    if !dom.dominates(def_block, user_block) {
                        return true;
                    }
                    let user_indices = indexed.get(&user_block).cloned().unwrap_or_default();
                    if !indices_subset_of(&def_indices, &user_indices) {
                        return true;
                    }
                    if nest_level > 0 && !def_is_diff_or_recompute {
                        return true;
                    }
                    if ptr_typed && !def_is_diff_or_recompute {
                        return true;
                    }
                    false
                };

                let graph = UseGraph::from(func, inst_to_store, &is_relevant);
                out_of_scope_uses = graph.unique_uses();
                use_graph = graph;
            }

            if out_of_scope_uses.is_empty() {
                if !is_recompute {
                    self.processed_store_set.insert(inst_to_store);
                }
                seen.insert(inst_to_store);
                continue;
            }

            let mut def_block_indices = self.block_indices(def_block);
            let mut var_block = self.default_var_block;
            if is_recompute {
                var_block = self.default_recompute_var_block;
                if let Some(innermost) = def_block_indices.last() {
                    // Recompute storage lives at the innermost differential
                    // condition block and is re-written per reverse
                    // iteration, so it needs no array dimensions.
                    var_block = self
                        .func
                        .inst(innermost.diff_count_param)
                        .parent()
                        .expect("differential counter is placed");
                    def_block_indices.clear();
                }
            }

            if self.func.inst(inst_to_store).op() == Opcode::Var {
                let store_use = find_latest_unique_write_use(self.func, inst_to_store);
                let is_indexed_store = store_use.is_some() && !def_block_indices.is_empty();

                // A derivative-context variable with unindexed storage only
                // needs to dominate its uses; move it up front.
                if !is_indexed_store && is_derivative_context_var(self.func, inst_to_store) {
                    self.func
                        .move_inst_to_front(inst_to_store, self.default_var_block);
                    if !is_recompute {
                        self.processed_store_set.insert(inst_to_store);
                    }
                    continue;
                }

                let store_use = store_use.expect("checkpointed variable must be written");
                def_block_indices = maybe_trim_indices(
                    self.func,
                    &def_block_indices,
                    self.indexed,
                    &out_of_scope_uses,
                );

                // Read the variable's value right after its final write and
                // checkpoint that.
                let loaded = {
                    let mut builder = Builder::new(self.func);
                    builder.set_insert_after_ordinary_inst(store_use.user);
                    builder.emit_load(inst_to_store)
                };
                let local_var =
                    self.store_indexed_value(loaded, var_block, loaded, &def_block_indices)?;

                for use_ref in &out_of_scope_uses {
                    let use_block = self
                        .func
                        .inst(use_ref.user)
                        .parent()
                        .expect("use must be placed");
                    let use_indices = self.block_indices(use_block);
                    // Variable uses want an address, not a value.
                    let load_addr = self.emit_indexed_load_address(
                        use_ref.user,
                        local_var,
                        def_block,
                        &def_block_indices,
                        &use_indices,
                    );
                    use_graph.replace(self.func, *use_ref, load_addr);
                }

                if !is_recompute {
                    self.processed_store_set.insert(local_var);
                }
            } else if is_passthrough_inst(self.func, inst_to_store) {
                // Not materialized: the operands inherit the obligation.
                let mut pending_operands = Vec::new();
                for operand in self.func.inst(inst_to_store).operands() {
                    let Operand::Inst(operand) = *operand else {
                        continue;
                    };
                    if inst_set.contains(operand) || seen.contains(&operand) {
                        continue;
                    }
                    if self.func.inst(operand).parent().is_some() {
                        pending_operands.push(operand);
                    }
                }
                for operand in pending_operands.into_iter().rev() {
                    worklist.push(operand);
                }
            } else {
                let is_loop_counter = self.func.is_loop_counter(inst_to_store);
                if is_loop_counter {
                    // A counter is not part of the region its own loop
                    // starts; it is indexed only by the enclosing levels.
                    def_block_indices.pop();
                } else {
                    def_block_indices = maybe_trim_indices(
                        self.func,
                        &def_block_indices,
                        self.indexed,
                        &out_of_scope_uses,
                    );
                }

                let local_var = self.store_indexed_value(
                    inst_to_store,
                    var_block,
                    inst_to_store,
                    &def_block_indices,
                )?;
                if is_loop_counter {
                    self.func.add_decoration(local_var, Decoration::LoopCounter);
                }

                for use_ref in &out_of_scope_uses {
                    let use_block = self
                        .func
                        .inst(use_ref.user)
                        .parent()
                        .expect("use must be placed");
                    let use_indices = self.block_indices(use_block);
                    let load_addr = self.emit_indexed_load_address(
                        use_ref.user,
                        local_var,
                        def_block,
                        &def_block_indices,
                        &use_indices,
                    );
                    let loaded = {
                        let mut builder = Builder::new(self.func);
                        builder.set_insert_before(use_ref.user);
                        builder.emit_load(load_addr)
                    };
                    use_graph.replace(self.func, *use_ref, loaded);
                }

                if !is_recompute {
                    self.processed_store_set.insert(local_var);
                }
            }

            seen.insert(inst_to_store);
        }

        Ok(())
    }
}

/// Legalizes all accesses to primal values from recompute and differential
/// blocks, replacing the store set with the synthesized local variables.
///
/// # Errors
///
/// Returns [`Error::UnboundedLoop`] when indexed storage is required under a
/// loop region without a static iteration bound.
pub fn ensure_primal_availability(
    func: &mut Func,
    mut hoist_info: HoistedPrimalsInfo,
    indexed_block_info: &BlockIndexInfo,
) -> Result<HoistedPrimalsInfo> {
    let dom = DominatorTree::compute(func);
    let default_var_block = func
        .next_block(func.entry_block())
        .ok_or_else(|| Error::GraphError("function has no parameter prelude block".to_string()))?;
    let default_recompute_var_block = func
        .block_ids()
        .into_iter()
        .find(|&b| func.is_differential_or_recompute_block(b))
        .ok_or_else(|| Error::GraphError("function has no differential region".to_string()))?;

    // Loop counters come out of the main store set; they are legalized after
    // the plain values, deepest nesting level first, because the loads those
    // values emit reference the counters and the counters at level N load
    // the counters at the levels above.
    let mut loop_counters: BTreeMap<usize, OrderedSet<InstId>> = BTreeMap::new();
    let counter_insts: Vec<InstId> = hoist_info
        .store_set
        .iter()
        .filter(|&inst| func.is_loop_counter(inst))
        .collect();
    for &inst in &counter_insts {
        let block = func.inst(inst).parent().expect("counter must be placed");
        let nest_depth = indexed_block_info
            .get(&block)
            .map_or(0, std::vec::Vec::len)
            .saturating_sub(1);
        loop_counters.entry(nest_depth).or_default().insert(inst);
        hoist_info.store_set.remove(inst);
    }

    let mut legalizer = Legalizer {
        func,
        dom,
        indexed: indexed_block_info,
        default_var_block,
        default_recompute_var_block,
        processed_store_set: OrderedSet::new(),
    };

    legalizer.ensure_available(&hoist_info.store_set, false)?;
    for (_, counters) in loop_counters.iter().rev() {
        legalizer.ensure_available(counters, false)?;
    }
    legalizer.ensure_available(&hoist_info.recompute_set, true)?;

    hoist_info.store_set = legalizer.processed_store_set;
    Ok(hoist_info)
}
