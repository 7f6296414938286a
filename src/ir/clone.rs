//! Out-of-order instruction cloning.
//!
//! The recompute-block builder clones instructions whose operands have not
//! been cloned yet (a value can be referenced before its dependency is
//! materialized, and phi cycles make any dependency-first order impossible).
//! Cloning is therefore split into two phases: allocate the clone immediately
//! with whatever operand mappings exist, and record the unmapped operand
//! slots in a pending map that is patched when the missing value is
//! eventually cloned or registered.
//!
//! The context also carries a set of *pending uses*: original operand slots
//! that should be redirected to the cloned value once it exists. The
//! checkpoint classifier marks differential uses of recomputed values this
//! way, and the uses snap over to the recomputed clones as the clones appear.

use std::collections::{HashMap, HashSet};

use crate::ir::{Builder, Func, InstId, Opcode, Operand, UseRef};

/// Two-phase cloning context with deferred operand patching.
#[derive(Debug, Default)]
pub struct OutOfOrderCloneContext {
    /// Mapping from original values to their clones (or replacements).
    map: HashMap<InstId, InstId>,
    /// Original uses that must be redirected to the clone of their operand
    /// once that clone is registered.
    pending_uses: HashSet<UseRef>,
    /// Operand slots inside already-created clones that still reference an
    /// uncloned original, keyed by that original.
    unresolved: HashMap<InstId, Vec<UseRef>>,
}

impl OutOfOrderCloneContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the clone previously registered for `original`, if any.
    #[must_use]
    pub fn lookup(&self, original: InstId) -> Option<InstId> {
        self.map.get(&original).copied()
    }

    /// Marks an original use to be redirected once its operand is cloned.
    pub fn add_pending_use(&mut self, use_ref: UseRef) {
        self.pending_uses.insert(use_ref);
    }

    /// Returns `true` if the use is marked pending.
    #[must_use]
    pub fn is_pending(&self, use_ref: UseRef) -> bool {
        self.pending_uses.contains(&use_ref)
    }

    /// Clones `original` at the builder's insertion point, patching operands
    /// later as their definitions get cloned.
    ///
    /// Operands already mapped are rewritten immediately; unmapped operands
    /// keep referencing the original value and are recorded for patch-up.
    /// Cloning an already-mapped value returns the existing clone.
    ///
    /// Parameters clone into the insertion block's parameter list; everything
    /// else is placed at the insertion point.
    pub fn clone_inst_out_of_order(&mut self, builder: &mut Builder<'_>, original: InstId) -> InstId {
        if let Some(existing) = self.lookup(original) {
            return existing;
        }

        let (op, ty, value, operands, decorations) = {
            let record = builder.func().inst(original);
            (
                record.op(),
                record.ty(),
                record.value(),
                record.operands().to_vec(),
                record.decorations().to_vec(),
            )
        };

        let clone = builder.alloc_detached(op, ty, value);
        for deco in decorations {
            builder.func().add_decoration(clone, deco);
        }

        if op == Opcode::Param {
            let block = builder
                .current_block()
                .expect("cloning a param requires a block insertion point");
            builder.func().append_param(block, clone);
        } else {
            builder.place_at_current_point(clone);
        }

        for (index, operand) in operands.iter().enumerate() {
            match *operand {
                Operand::Block(b) => builder.func().push_operand(clone, Operand::Block(b)),
                Operand::Inst(v) => {
                    if let Some(mapped) = self.lookup(v) {
                        builder.func().push_operand(clone, Operand::Inst(mapped));
                    } else {
                        builder.func().push_operand(clone, Operand::Inst(v));
                        self.unresolved.entry(v).or_default().push(UseRef {
                            user: clone,
                            index: index as u32,
                        });
                    }
                }
            }
        }

        self.register(builder.func(), original, clone);
        clone
    }

    /// Registers `replacement` as the clone of `original`, patching every
    /// deferred operand slot and every pending original use.
    ///
    /// Also used to register non-clone replacements (an induction parameter
    /// replaced by a counter expression, a loop-exit marker replaced by its
    /// inferred constant).
    pub fn register(&mut self, func: &mut Func, original: InstId, replacement: InstId) {
        self.map.insert(original, replacement);

        if let Some(slots) = self.unresolved.remove(&original) {
            for slot in slots {
                func.set_operand(slot.user, slot.index as usize, Operand::Inst(replacement));
            }
        }

        for use_ref in func.uses_of(original) {
            if self.pending_uses.remove(&use_ref) {
                func.set_operand(
                    use_ref.user,
                    use_ref.index as usize,
                    Operand::Inst(replacement),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_patches_forward_reference() {
        let mut func = Func::new();
        let int = func.types_mut().int();
        let block = func.alloc_block();
        func.insert_block_at_end(block);
        let target = func.alloc_block();
        func.insert_block_at_end(target);

        let one = func.get_int_value(int, 1);
        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(block);
        let a = builder.emit_add(int, one, one);
        let b = builder.emit_mul(int, a, one);
        builder.emit_branch(target, &[]);

        // Clone the user before its operand: the clone of `b` initially
        // references the original `a`, then snaps to the clone of `a`.
        let mut ctx = OutOfOrderCloneContext::new();
        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(target);
        let b_clone = ctx.clone_inst_out_of_order(&mut builder, b);
        assert_eq!(func.inst_operand(b_clone, 0), a);

        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(target);
        let a_clone = ctx.clone_inst_out_of_order(&mut builder, a);
        assert_eq!(func.inst_operand(b_clone, 0), a_clone);
    }

    #[test]
    fn test_pending_use_redirected_on_register() {
        let mut func = Func::new();
        let int = func.types_mut().int();
        let block = func.alloc_block();
        func.insert_block_at_end(block);

        let one = func.get_int_value(int, 1);
        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(block);
        let a = builder.emit_add(int, one, one);
        let user = builder.emit_mul(int, a, a);

        let mut ctx = OutOfOrderCloneContext::new();
        ctx.add_pending_use(UseRef { user, index: 0 });

        let replacement = func.get_int_value(int, 9);
        ctx.register(&mut func, a, replacement);

        // Slot 0 was pending and snapped over; slot 1 was not.
        assert_eq!(func.inst_operand(user, 0), replacement);
        assert_eq!(func.inst_operand(user, 1), a);
    }

    #[test]
    fn test_clone_is_memoized() {
        let mut func = Func::new();
        let int = func.types_mut().int();
        let block = func.alloc_block();
        func.insert_block_at_end(block);
        let one = func.get_int_value(int, 1);
        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(block);
        let a = builder.emit_add(int, one, one);

        let mut ctx = OutOfOrderCloneContext::new();
        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(block);
        let c1 = ctx.clone_inst_out_of_order(&mut builder, a);
        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(block);
        let c2 = ctx.clone_inst_out_of_order(&mut builder, a);
        assert_eq!(c1, c2);
    }
}
