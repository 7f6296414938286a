//! Dominator tree.
//!
//! Computed with the iterative algorithm of Cooper, Harvey and Kennedy
//! ("A Simple, Fast Dominance Algorithm"): process blocks in reverse
//! postorder, intersecting predecessor dominators until a fixed point.
//! The checkpointing passes recompute the tree after each structural phase
//! rather than maintaining it incrementally.

use std::collections::HashMap;

use crate::ir::{BlockId, Func};

/// Immediate-dominator tree over a function's blocks.
#[derive(Debug)]
pub struct DominatorTree {
    idom: HashMap<BlockId, BlockId>,
    entry: BlockId,
}

impl DominatorTree {
    /// Computes the dominator tree for `func`.
    ///
    /// Blocks unreachable from the entry have no dominator information and
    /// report `false` for every non-reflexive query.
    #[must_use]
    pub fn compute(func: &Func) -> Self {
        let entry = func.entry_block();
        let rpo = reverse_postorder(func, entry);
        let mut order_index: HashMap<BlockId, usize> = HashMap::new();
        for (i, &b) in rpo.iter().enumerate() {
            order_index.insert(b, i);
        }

        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        idom.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for pred in func.predecessors(block) {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &order_index, pred, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        Self { idom, entry }
    }

    /// Returns the immediate dominator of `block`, or `None` for the entry
    /// block and unreachable blocks.
    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        if block == self.entry {
            return None;
        }
        self.idom.get(&block).copied()
    }

    /// Returns `true` if `dominator` dominates `dominated`.
    ///
    /// Every block dominates itself.
    #[must_use]
    pub fn dominates(&self, dominator: BlockId, dominated: BlockId) -> bool {
        let mut current = dominated;
        loop {
            if current == dominator {
                return true;
            }
            match self.idom.get(&current) {
                Some(&next) if next != current => current = next,
                _ => return false,
            }
        }
    }
}

fn intersect(
    idom: &HashMap<BlockId, BlockId>,
    order_index: &HashMap<BlockId, usize>,
    a: BlockId,
    b: BlockId,
) -> BlockId {
    let mut a = a;
    let mut b = b;
    while a != b {
        while order_index[&a] > order_index[&b] {
            a = idom[&a];
        }
        while order_index[&b] > order_index[&a] {
            b = idom[&b];
        }
    }
    a
}

/// Returns blocks reachable from `entry` in reverse postorder.
#[must_use]
pub fn reverse_postorder(func: &Func, entry: BlockId) -> Vec<BlockId> {
    let mut postorder = Vec::new();
    let mut visited = std::collections::HashSet::new();
    // Iterative DFS with an explicit phase marker to produce postorder.
    let mut stack = vec![(entry, false)];
    while let Some((block, processed)) = stack.pop() {
        if processed {
            postorder.push(block);
            continue;
        }
        if !visited.insert(block) {
            continue;
        }
        stack.push((block, true));
        let succs = func.successors(block);
        for &succ in succs.iter().rev() {
            if !visited.contains(&succ) {
                stack.push((succ, false));
            }
        }
    }
    postorder.reverse();
    postorder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Builder;

    /// Builds a diamond: entry -> (left | right) -> merge.
    fn diamond() -> (Func, [BlockId; 4]) {
        let mut func = Func::new();
        let entry = func.alloc_block();
        let left = func.alloc_block();
        let right = func.alloc_block();
        let merge = func.alloc_block();
        for b in [entry, left, right, merge] {
            func.insert_block_at_end(b);
        }

        let cond = func.get_bool_value(true);
        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(entry);
        builder.emit_if_else(cond, left, right, merge);
        builder.set_insert_into(left);
        builder.emit_branch(merge, &[]);
        builder.set_insert_into(right);
        builder.emit_branch(merge, &[]);
        builder.set_insert_into(merge);
        builder.emit_return(None);

        (func, [entry, left, right, merge])
    }

    #[test]
    fn test_diamond_dominance() {
        let (func, [entry, left, right, merge]) = diamond();
        let dom = DominatorTree::compute(&func);

        assert!(dom.dominates(entry, left));
        assert!(dom.dominates(entry, right));
        assert!(dom.dominates(entry, merge));
        assert!(!dom.dominates(left, merge));
        assert!(!dom.dominates(right, merge));
        assert!(dom.dominates(merge, merge));

        assert_eq!(dom.immediate_dominator(entry), None);
        assert_eq!(dom.immediate_dominator(merge), Some(entry));
    }

    #[test]
    fn test_loop_dominance() {
        // entry -> header; header -> body | exit; body -> header
        let mut func = Func::new();
        let entry = func.alloc_block();
        let header = func.alloc_block();
        let body = func.alloc_block();
        let exit = func.alloc_block();
        for b in [entry, header, body, exit] {
            func.insert_block_at_end(b);
        }

        let cond = func.get_bool_value(true);
        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(entry);
        builder.emit_branch(header, &[]);
        builder.set_insert_into(header);
        builder.emit_if_else(cond, body, exit, exit);
        builder.set_insert_into(body);
        builder.emit_branch(header, &[]);
        builder.set_insert_into(exit);
        builder.emit_return(None);

        let dom = DominatorTree::compute(&func);
        assert!(dom.dominates(header, body));
        assert!(dom.dominates(header, exit));
        assert!(!dom.dominates(body, exit));
        assert_eq!(dom.immediate_dominator(body), Some(header));
    }
}
