//! Recompute-block construction.
//!
//! Clones the primal CFG's *shape* (not its instructions) into a parallel set
//! of recompute blocks threaded in front of the differential code, so that
//! recomputed primal values execute in primal order right where the
//! differential code needs them.
//!
//! Jumps into the differential region are redirected through the recompute
//! chain; a loop's body recompute block is spliced into the differential
//! loop's body (the differential loop re-runs the primal body per reverse
//! iteration), and the primal condition block maps directly onto the
//! differential condition block rather than getting a block of its own.

use std::collections::HashMap;

use crate::autodiff::index::{loop_body_block, loop_condition_block, BlockIndexInfo};
use crate::ir::{
    BlockId, Builder, Decoration, Func, InstId, Opcode, Operand, OutOfOrderCloneContext,
    PrimalLink,
};

/// Allocates a recompute block shadowing `primal_block`, inheriting its
/// index list.
fn create_recompute_block(
    func: &mut Func,
    indexed_block_info: &mut BlockIndexInfo,
    recompute_map: &mut HashMap<BlockId, BlockId>,
    primal_block: BlockId,
) -> BlockId {
    let recompute_block = func.alloc_block();
    func.insert_block_at_end(recompute_block);
    func.add_block_decoration(recompute_block, Decoration::RecomputeBlock);
    recompute_map.insert(primal_block, recompute_block);
    let indices = indexed_block_info
        .get(&primal_block)
        .cloned()
        .unwrap_or_default();
    indexed_block_info.insert(recompute_block, indices);
    recompute_block
}

#[derive(Debug, Clone, Copy)]
struct WorkItem {
    /// First primal block of the region.
    primal_block: BlockId,
    /// The recompute block created for it.
    recompute_block: BlockId,
    /// The block marking the end of the primal region.
    region_end_block: BlockId,
    /// The first differential block of the region.
    first_diff_block: BlockId,
}

/// Builds one recompute block per primal block (loop condition and exit
/// blocks excepted) and rewires control flow through them.
///
/// Returns the primal-to-recompute block map. New recompute blocks inherit
/// the index list of the primal block they shadow.
pub fn create_primal_recompute_blocks(
    func: &mut Func,
    indexed_block_info: &mut BlockIndexInfo,
    clone_ctx: &mut OutOfOrderCloneContext,
) -> HashMap<BlockId, BlockId> {
    let Some(first_diff_block) = func
        .block_ids()
        .into_iter()
        .find(|&b| func.is_differential_block(b))
    else {
        return HashMap::new();
    };

    // Pair differential loops with their primal counterparts.
    let mut primal_to_diff_loop: HashMap<InstId, InstId> = HashMap::new();
    for block in func.block_ids() {
        if !func.is_differential_block(block) {
            continue;
        }
        let Some(term) = func.terminator(block) else {
            continue;
        };
        if func.inst(term).op() != Opcode::Loop {
            continue;
        }
        if let Some(PrimalLink::Inst(primal)) =
            func.inst(term).decorations().iter().find_map(|d| match d {
                Decoration::Differential { primal } => *primal,
                _ => None,
            })
        {
            primal_to_diff_loop.insert(primal, term);
        }
    }

    let mut recompute_map: HashMap<BlockId, BlockId> = HashMap::new();

    // The first recompute block takes over the first differential block's
    // position: params move across and every prior jump into the
    // differential region lands on the recompute chain instead.
    let entry = func.entry_block();
    let first_recompute_block =
        create_recompute_block(func, indexed_block_info, &mut recompute_map, entry);
    func.insert_block_before(first_recompute_block, first_diff_block);
    func.move_params(first_recompute_block, first_diff_block);
    func.replace_block_uses(first_diff_block, first_recompute_block);

    let mut worklist = vec![WorkItem {
        primal_block: entry,
        recompute_block: first_recompute_block,
        region_end_block: first_recompute_block,
        first_diff_block,
    }];

    let mut index = 0;
    while index < worklist.len() {
        let item = worklist[index];
        index += 1;

        if !indexed_block_info.contains_key(&item.primal_block) {
            continue;
        }

        let terminator = func
            .terminator(item.primal_block)
            .expect("primal block must be terminated");

        if func.inst(terminator).op() == Opcode::Loop {
            // The terminator starts a sub loop region: queue the region after
            // the loop at this level, and the loop body as a nested region.
            let sub_region_end = func.loop_break(terminator);
            if sub_region_end == item.region_end_block {
                // End of the top-level region: hand off to the differential
                // code.
                let mut builder = Builder::new(func);
                builder.set_insert_into(item.recompute_block);
                builder.emit_branch(item.first_diff_block, &[]);
            } else if let Some(&existing) = recompute_map.get(&sub_region_end) {
                let mut builder = Builder::new(func);
                builder.set_insert_into(item.recompute_block);
                builder.emit_branch(existing, &[]);
            } else {
                let next_region_block = create_recompute_block(
                    func,
                    indexed_block_info,
                    &mut recompute_map,
                    sub_region_end,
                );
                func.insert_block_after(next_region_block, item.recompute_block);
                let mut builder = Builder::new(func);
                builder.set_insert_into(item.recompute_block);
                builder.emit_branch(next_region_block, &[]);
                worklist.push(WorkItem {
                    primal_block: sub_region_end,
                    recompute_block: next_region_block,
                    region_end_block: item.region_end_block,
                    first_diff_block: item.first_diff_block,
                });
            }

            let body_block = loop_body_block(func, terminator);
            let diff_loop = *primal_to_diff_loop
                .get(&terminator)
                .expect("primal loop must have a differential counterpart");
            let diff_body_block = loop_body_block(func, diff_loop);
            let body_recompute_block =
                create_recompute_block(func, indexed_block_info, &mut recompute_map, body_block);
            func.insert_block_before(body_recompute_block, diff_body_block);
            func.replace_block_uses(diff_body_block, body_recompute_block);

            // The primal condition block maps directly onto the differential
            // condition block; it never gets a recompute block of its own.
            recompute_map.insert(
                loop_condition_block(func, terminator),
                loop_condition_block(func, diff_loop),
            );

            func.move_params(body_recompute_block, diff_body_block);

            // After CFG normalization the loop body only jumps back to the
            // condition block, so the condition block bounds the sub-region.
            worklist.push(WorkItem {
                primal_block: body_block,
                recompute_block: body_recompute_block,
                region_end_block: func.loop_target(terminator),
                first_diff_block: diff_body_block,
            });
        } else {
            // Ordinary control flow: mirror the terminator's structure.
            let new_terminator = match func.inst(terminator).op() {
                Opcode::Switch | Opcode::IfElse => {
                    let mut builder = Builder::new(func);
                    builder.set_insert_into(item.recompute_block);
                    clone_ctx.clone_inst_out_of_order(&mut builder, terminator)
                }
                Opcode::Branch => {
                    let target = func.operand(terminator, 0).as_block().expect("branch target");
                    let mut builder = Builder::new(func);
                    builder.set_insert_into(item.recompute_block);
                    builder.emit_branch(target, &[])
                }
                other => unreachable!("unexpected region terminator {other:?}"),
            };

            let operands = func.inst(new_terminator).operands().to_vec();
            for (op_index, operand) in operands.iter().enumerate() {
                let Operand::Block(target) = *operand else {
                    continue;
                };
                if target == item.region_end_block {
                    // End of the region: jump to the differential code.
                    func.set_operand(
                        new_terminator,
                        op_index,
                        Operand::Block(item.first_diff_block),
                    );
                    continue;
                }
                if let Some(&existing) = recompute_map.get(&target) {
                    func.set_operand(new_terminator, op_index, Operand::Block(existing));
                    continue;
                }

                let target_recompute_block =
                    create_recompute_block(func, indexed_block_info, &mut recompute_map, target);
                func.insert_block_before(target_recompute_block, item.first_diff_block);
                func.set_operand(
                    new_terminator,
                    op_index,
                    Operand::Block(target_recompute_block),
                );
                worklist.push(WorkItem {
                    primal_block: target,
                    recompute_block: target_recompute_block,
                    region_end_block: item.region_end_block,
                    first_diff_block: item.first_diff_block,
                });
            }
        }
    }

    recompute_map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::index::build_indexed_blocks;
    use crate::autodiff::testutil::build_paired_loop_func;

    #[test]
    fn test_recompute_blocks_for_paired_loop() {
        let mut fixture = build_paired_loop_func(5);
        let mut indexed = build_indexed_blocks(&mut fixture.func);
        let mut ctx = OutOfOrderCloneContext::new();
        let map = create_primal_recompute_blocks(&mut fixture.func, &mut indexed, &mut ctx);
        let func = &fixture.func;

        // The condition block maps onto the differential condition block.
        assert_eq!(map[&fixture.primal_cond], fixture.diff_cond);

        // The body's recompute block was spliced into the differential loop:
        // the differential condition's true edge reaches it, and it branches
        // on to the differential body.
        let body_rb = map[&fixture.primal_body];
        assert!(func.is_recompute_block(body_rb));
        let diff_if = func.terminator(fixture.diff_cond).unwrap();
        assert_eq!(func.if_else_true_block(diff_if), body_rb);
        let body_rb_term = func.terminator(body_rb).unwrap();
        assert_eq!(
            func.operand(body_rb_term, 0),
            Operand::Block(fixture.diff_body)
        );

        // The entry's recompute block absorbed the jumps that previously
        // entered the differential region.
        let entry_rb = map[&fixture.primal_entry];
        let break_term = func.terminator(fixture.primal_break).unwrap();
        assert_eq!(func.operand(break_term, 0), Operand::Block(entry_rb));

        // Recompute blocks inherit the shadowed block's index lists.
        assert_eq!(indexed[&body_rb].len(), indexed[&fixture.primal_body].len());

        // Every primal block except the loop condition block maps to a
        // dedicated recompute block.
        for block in [
            fixture.primal_entry,
            fixture.prelude,
            fixture.primal_init,
            fixture.primal_body,
            fixture.primal_break,
        ] {
            let rb = map[&block];
            assert!(func.is_recompute_block(rb), "{block:?} -> {rb:?}");
        }
    }
}
