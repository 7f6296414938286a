//! Loop region assignment.
//!
//! The checkpointing passes need to know, for every block, the stack of
//! loops that structurally contain it. Regions are assigned by a worklist
//! walk of the normalized CFG: a loop terminator opens a child region at its
//! condition (target) block, the loop's break block continues the parent
//! region, and every other edge propagates the current region unchanged.
//! The first assignment a block receives wins; the normalized CFG makes that
//! assignment unique.

use std::collections::HashMap;

use crate::ir::{BlockId, Func, InstId, Opcode};

/// Identifier of one loop region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RegionId(u32);

#[derive(Debug)]
struct Region {
    loop_inst: InstId,
    parent: Option<RegionId>,
}

/// Block-to-region map with ancestor queries.
#[derive(Debug)]
pub struct IndexedRegionMap {
    regions: Vec<Region>,
    block_region: HashMap<BlockId, Option<RegionId>>,
}

impl IndexedRegionMap {
    /// Builds the region map for `func`.
    #[must_use]
    pub fn build(func: &Func) -> Self {
        let mut map = Self {
            regions: Vec::new(),
            block_region: HashMap::new(),
        };

        let mut worklist: Vec<(BlockId, Option<RegionId>)> = vec![(func.entry_block(), None)];
        while let Some((block, region)) = worklist.pop() {
            if map.block_region.contains_key(&block) {
                continue;
            }
            map.block_region.insert(block, region);

            let Some(term) = func.terminator(block) else {
                continue;
            };
            if func.inst(term).op() == Opcode::Loop {
                let child = RegionId(map.regions.len() as u32);
                map.regions.push(Region {
                    loop_inst: term,
                    parent: region,
                });
                let break_block = func.loop_break(term);
                worklist.push((break_block, map.escape(func, break_block, region)));
                worklist.push((func.loop_target(term), Some(child)));
            } else {
                for succ in func.successors(block) {
                    worklist.push((succ, map.escape(func, succ, region)));
                }
            }
        }

        map
    }

    /// Pops every region whose loop `block` is the break target of: an edge
    /// jumping to a break block leaves that loop's region (and, for
    /// multi-level breaks, every region in between).
    fn escape(&self, func: &Func, block: BlockId, from: Option<RegionId>) -> Option<RegionId> {
        let mut current = from;
        while let Some(region) = current {
            let record = &self.regions[region.0 as usize];
            if func.loop_break(record.loop_inst) == block {
                current = record.parent;
            } else {
                break;
            }
        }
        current
    }

    /// Returns the loops enclosing `block`, ordered outer-to-inner.
    ///
    /// Blocks never reached from the entry report no enclosing loops.
    #[must_use]
    pub fn ancestor_loops(&self, block: BlockId) -> Vec<InstId> {
        let mut chain = Vec::new();
        let mut current = self.block_region.get(&block).copied().flatten();
        while let Some(region) = current {
            let record = &self.regions[region.0 as usize];
            chain.push(record.loop_inst);
            current = record.parent;
        }
        chain.reverse();
        chain
    }
}
