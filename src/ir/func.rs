//! Function bodies: the instruction/block arena.
//!
//! A [`Func`] owns every instruction and block of one function, plus the
//! interned [`TypeTable`] the instructions reference. Instructions reference
//! operands by id; uses form per-value lists maintained automatically by the
//! operand mutators, so passes can walk from any value to all of its
//! consumers in O(uses).
//!
//! # Mutation discipline
//!
//! The autodiff passes insert blocks and relink instructions mid-traversal.
//! Accessors that would be invalidated by structural insertion
//! ([`Func::block_ids`], [`Func::inst_ids_in`]) therefore return snapshots
//! rather than live iterators; mutating the function never invalidates a
//! previously returned snapshot, it only makes it stale.
//!
//! # Module-scope values
//!
//! Constants, callee references and global-variable references have no parent
//! block ([`Inst::parent`] is `None`). The checkpointing passes use this to
//! recognize values that need no hoisting: a module-scope value is visible
//! everywhere by construction.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::ir::{
    Block, BlockId, ConstValue, Decoration, Inst, InstId, Opcode, Operand, TypeId, TypeTable,
    UseRef,
};

/// Key for module-scope constant deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConstKey {
    Int(TypeId, i64),
    Bool(bool),
    Float(TypeId, u64),
}

/// A function under transformation.
///
/// Create one with [`Func::new`], then populate it through a
/// [`Builder`](crate::ir::Builder).
#[derive(Debug, Default)]
pub struct Func {
    insts: Vec<Inst>,
    blocks: Vec<Block>,
    block_order: Vec<BlockId>,
    constants: HashMap<ConstKey, InstId>,
    pub(crate) types: TypeTable,
}

impl Func {
    /// Creates an empty function with a fresh type table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the function's type table.
    #[must_use]
    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    /// Returns the function's type table mutably.
    pub fn types_mut(&mut self) -> &mut TypeTable {
        &mut self.types
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    /// Allocates a new block without placing it in the block order.
    ///
    /// Use the `insert_block_*` methods to position it.
    pub fn alloc_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Block::default());
        id
    }

    /// Appends a block to the end of the block order.
    pub fn insert_block_at_end(&mut self, block: BlockId) {
        self.unlink_block(block);
        self.block_order.push(block);
    }

    /// Inserts `block` immediately before `before` in the block order.
    ///
    /// # Panics
    ///
    /// Panics if `before` is not in the block order.
    pub fn insert_block_before(&mut self, block: BlockId, before: BlockId) {
        self.unlink_block(block);
        let pos = self
            .block_order
            .iter()
            .position(|b| *b == before)
            .expect("insert_block_before: anchor not in block order");
        self.block_order.insert(pos, block);
    }

    /// Inserts `block` immediately after `after` in the block order.
    ///
    /// # Panics
    ///
    /// Panics if `after` is not in the block order.
    pub fn insert_block_after(&mut self, block: BlockId, after: BlockId) {
        self.unlink_block(block);
        let pos = self
            .block_order
            .iter()
            .position(|b| *b == after)
            .expect("insert_block_after: anchor not in block order");
        self.block_order.insert(pos + 1, block);
    }

    fn unlink_block(&mut self, block: BlockId) {
        self.block_order.retain(|b| *b != block);
    }

    /// Replaces the block order wholesale (used by the block sorter).
    ///
    /// # Panics
    ///
    /// Panics if the new order is not a permutation of the old one.
    pub(crate) fn set_block_order(&mut self, order: Vec<BlockId>) {
        assert_eq!(
            order.len(),
            self.block_order.len(),
            "block order must be a permutation"
        );
        self.block_order = order;
    }

    /// Returns the entry block.
    ///
    /// # Panics
    ///
    /// Panics if the function has no blocks.
    #[must_use]
    pub fn entry_block(&self) -> BlockId {
        self.block_order[0]
    }

    /// Returns the block following `block` in the block order.
    #[must_use]
    pub fn next_block(&self, block: BlockId) -> Option<BlockId> {
        let pos = self.block_order.iter().position(|b| *b == block)?;
        self.block_order.get(pos + 1).copied()
    }

    /// Returns a snapshot of the block order.
    ///
    /// Safe to hold across structural mutation; see the module docs.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.block_order.clone()
    }

    /// Returns the number of blocks placed in the block order.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.block_order.len()
    }

    /// Returns a block record.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Attaches a decoration to a block.
    pub fn add_block_decoration(&mut self, block: BlockId, deco: Decoration) {
        self.blocks[block.index()].decorations.push(deco);
    }

    /// Returns `true` if the block carries the differential marker.
    #[must_use]
    pub fn is_differential_block(&self, block: BlockId) -> bool {
        self.block(block)
            .has_decoration(|d| matches!(d, Decoration::Differential { .. }))
    }

    /// Returns `true` if the block is a synthesized recompute block.
    #[must_use]
    pub fn is_recompute_block(&self, block: BlockId) -> bool {
        self.block(block)
            .has_decoration(|d| matches!(d, Decoration::RecomputeBlock))
    }

    /// Returns `true` if the block is differential or a recompute block.
    #[must_use]
    pub fn is_differential_or_recompute_block(&self, block: BlockId) -> bool {
        self.is_differential_block(block) || self.is_recompute_block(block)
    }

    /// Returns the primal block back-linked from a differential block.
    #[must_use]
    pub fn primal_of_block(&self, block: BlockId) -> Option<BlockId> {
        self.block(block).decorations.iter().find_map(|d| match d {
            Decoration::Differential {
                primal: Some(crate::ir::PrimalLink::Block(b)),
            } => Some(*b),
            _ => None,
        })
    }

    // ------------------------------------------------------------------
    // Instructions
    // ------------------------------------------------------------------

    /// Returns an instruction record.
    #[must_use]
    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.index()]
    }

    pub(crate) fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id.index()]
    }

    /// Allocates an instruction record without placing it in a block.
    pub(crate) fn alloc_inst(
        &mut self,
        op: Opcode,
        ty: Option<TypeId>,
        value: Option<ConstValue>,
    ) -> InstId {
        let id = InstId::new(self.insts.len());
        self.insts.push(Inst {
            op,
            ty,
            operands: Vec::new(),
            decorations: Vec::new(),
            parent: None,
            uses: Vec::new(),
            value,
        });
        id
    }

    /// Returns a snapshot of a block's ordinary instructions.
    #[must_use]
    pub fn inst_ids_in(&self, block: BlockId) -> Vec<InstId> {
        self.block(block).insts.clone()
    }

    /// Returns the first ordinary (non-parameter) instruction of a block.
    #[must_use]
    pub fn first_ordinary_inst(&self, block: BlockId) -> Option<InstId> {
        self.block(block).insts.first().copied()
    }

    /// Returns the block's terminator, if the block is terminated.
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = *self.block(block).insts.last()?;
        self.inst(last).op.is_terminator().then_some(last)
    }

    /// Attaches a decoration to an instruction.
    pub fn add_decoration(&mut self, inst: InstId, deco: Decoration) {
        self.insts[inst.index()].decorations.push(deco);
    }

    /// Returns `true` if the instruction or its containing block is differential.
    #[must_use]
    pub fn is_differential_inst(&self, inst: InstId) -> bool {
        if let Some(parent) = self.inst(inst).parent {
            if self.is_differential_block(parent) {
                return true;
            }
        }
        self.inst(inst)
            .has_decoration(|d| matches!(d, Decoration::Differential { .. }))
    }

    /// Returns the primal instruction back-linked from a differential instruction.
    #[must_use]
    pub fn primal_of_inst(&self, inst: InstId) -> Option<InstId> {
        self.inst(inst).decorations.iter().find_map(|d| match d {
            Decoration::Differential {
                primal: Some(crate::ir::PrimalLink::Inst(i)),
            } => Some(*i),
            _ => None,
        })
    }

    /// Returns `true` if the instruction carries the loop counter marker.
    #[must_use]
    pub fn is_loop_counter(&self, inst: InstId) -> bool {
        self.inst(inst)
            .has_decoration(|d| matches!(d, Decoration::LoopCounter))
    }

    /// Returns the static iteration bound attached to a loop terminator.
    #[must_use]
    pub fn loop_max_iters(&self, loop_inst: InstId) -> Option<u32> {
        self.inst(loop_inst).decorations.iter().find_map(|d| match d {
            Decoration::LoopMaxIters(n) => Some(*n),
            _ => None,
        })
    }

    // ------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------

    /// Appends an instruction to a block's parameter list.
    pub(crate) fn append_param(&mut self, block: BlockId, inst: InstId) {
        debug_assert_eq!(self.inst(inst).op, Opcode::Param);
        self.insts[inst.index()].parent = Some(block);
        self.blocks[block.index()].params.push(inst);
    }

    /// Moves every parameter of `src` to the end of `dest`'s parameter list.
    pub fn move_params(&mut self, dest: BlockId, src: BlockId) {
        let moved = std::mem::take(&mut self.blocks[src.index()].params);
        for &param in &moved {
            self.insts[param.index()].parent = Some(dest);
        }
        self.blocks[dest.index()].params.extend(moved);
    }

    /// Returns the position of `param` in its block's parameter list.
    #[must_use]
    pub fn param_index(&self, block: BlockId, param: InstId) -> Option<usize> {
        self.block(block).params.iter().position(|p| *p == param)
    }

    /// Appends an instruction to the end of a block.
    pub(crate) fn append_inst(&mut self, block: BlockId, inst: InstId) {
        self.insts[inst.index()].parent = Some(block);
        self.blocks[block.index()].insts.push(inst);
    }

    /// Inserts an instruction immediately before another within its block.
    ///
    /// # Panics
    ///
    /// Panics if `before` is not placed in a block.
    pub(crate) fn insert_inst_before(&mut self, inst: InstId, before: InstId) {
        let block = self
            .inst(before)
            .parent
            .expect("insert_inst_before: anchor has no parent block");
        self.detach_inst(inst);
        self.insts[inst.index()].parent = Some(block);
        let list = &mut self.blocks[block.index()].insts;
        let pos = list
            .iter()
            .position(|i| *i == before)
            .expect("insert_inst_before: anchor not in its block");
        list.insert(pos, inst);
    }

    /// Moves an already-placed instruction before another (possibly in a
    /// different block).
    pub fn move_inst_before(&mut self, inst: InstId, before: InstId) {
        self.insert_inst_before(inst, before);
    }

    /// Moves an instruction to the front of a block's ordinary instructions.
    pub fn move_inst_to_front(&mut self, inst: InstId, block: BlockId) {
        self.detach_inst(inst);
        self.insts[inst.index()].parent = Some(block);
        self.blocks[block.index()].insts.insert(0, inst);
    }

    fn detach_inst(&mut self, inst: InstId) {
        if let Some(parent) = self.inst(inst).parent {
            self.blocks[parent.index()].insts.retain(|i| *i != inst);
            self.blocks[parent.index()].params.retain(|i| *i != inst);
        }
        self.insts[inst.index()].parent = None;
    }

    /// Removes an instruction from its block and drops its operand uses.
    ///
    /// The record itself stays in the arena (ids are never reused); any
    /// remaining uses of the removed value keep referring to it, which is a
    /// caller bug.
    pub fn remove_inst(&mut self, inst: InstId) {
        let operands = self.inst(inst).operands.clone();
        for (index, operand) in operands.iter().enumerate() {
            if let Operand::Inst(def) = operand {
                self.remove_use(
                    *def,
                    UseRef {
                        user: inst,
                        index: index as u32,
                    },
                );
            }
        }
        self.insts[inst.index()].operands.clear();
        self.detach_inst(inst);
    }

    // ------------------------------------------------------------------
    // Operands and uses
    // ------------------------------------------------------------------

    /// Appends an operand to an instruction, registering the use.
    pub fn push_operand(&mut self, user: InstId, operand: Operand) {
        let index = self.inst(user).operands.len() as u32;
        self.insts[user.index()].operands.push(operand);
        if let Operand::Inst(def) = operand {
            self.insts[def.index()].uses.push(UseRef { user, index });
        }
    }

    /// Replaces the operand at `index`, keeping use lists consistent.
    pub fn set_operand(&mut self, user: InstId, index: usize, operand: Operand) {
        let old = self.insts[user.index()].operands[index];
        if old == operand {
            return;
        }
        if let Operand::Inst(def) = old {
            self.remove_use(
                def,
                UseRef {
                    user,
                    index: index as u32,
                },
            );
        }
        self.insts[user.index()].operands[index] = operand;
        if let Operand::Inst(def) = operand {
            self.insts[def.index()].uses.push(UseRef {
                user,
                index: index as u32,
            });
        }
    }

    fn remove_use(&mut self, def: InstId, use_ref: UseRef) {
        let uses = &mut self.insts[def.index()].uses;
        if let Some(pos) = uses.iter().position(|u| *u == use_ref) {
            uses.remove(pos);
        }
    }

    /// Returns the operand at `index`.
    #[must_use]
    pub fn operand(&self, inst: InstId, index: usize) -> Operand {
        self.inst(inst).operands[index]
    }

    /// Returns the value operand at `index`.
    ///
    /// # Panics
    ///
    /// Panics if the operand is a block reference.
    #[must_use]
    pub fn inst_operand(&self, inst: InstId, index: usize) -> InstId {
        self.operand(inst, index)
            .as_inst()
            .expect("expected a value operand")
    }

    /// Returns a snapshot of the uses of a value.
    #[must_use]
    pub fn uses_of(&self, inst: InstId) -> Vec<UseRef> {
        self.inst(inst).uses.clone()
    }

    /// Replaces every use of `old` with `new`.
    pub fn replace_uses_with(&mut self, old: InstId, new: InstId) {
        for use_ref in self.uses_of(old) {
            self.set_operand(use_ref.user, use_ref.index as usize, Operand::Inst(new));
        }
    }

    /// Replaces every block operand referencing `old` with `new`.
    ///
    /// Block operands are not use-tracked, so this scans all instructions;
    /// the recompute-block builder calls it a bounded number of times.
    pub fn replace_block_uses(&mut self, old: BlockId, new: BlockId) {
        for inst_index in 0..self.insts.len() {
            for op_index in 0..self.insts[inst_index].operands.len() {
                if self.insts[inst_index].operands[op_index] == Operand::Block(old) {
                    self.insts[inst_index].operands[op_index] = Operand::Block(new);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // CFG queries
    // ------------------------------------------------------------------

    /// Returns the successor blocks of `block`, one entry per edge.
    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        let Some(term) = self.terminator(block) else {
            return Vec::new();
        };
        match self.inst(term).op {
            // A loop's continue operand is not a control flow edge; it only
            // names the region's continue point.
            Opcode::Loop => vec![self.loop_target(term)],
            _ => self
                .inst(term)
                .operands
                .iter()
                .filter_map(|op| op.as_block())
                .collect(),
        }
    }

    /// Returns the predecessor blocks of `block`, one entry per edge, in
    /// block order.
    #[must_use]
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        let mut preds = Vec::new();
        for &candidate in &self.block_order {
            for succ in self.successors(candidate) {
                if succ == block {
                    preds.push(candidate);
                }
            }
        }
        preds
    }

    /// Returns a total order key for an instruction: (block position, slot).
    ///
    /// Parameters order before ordinary instructions. Module-scope values
    /// order before everything.
    #[must_use]
    pub fn inst_order_key(&self, inst: InstId) -> (usize, usize) {
        let Some(parent) = self.inst(inst).parent else {
            return (0, 0);
        };
        let block_pos = self
            .block_order
            .iter()
            .position(|b| *b == parent)
            .unwrap_or(usize::MAX);
        let block = self.block(parent);
        if let Some(pos) = block.params.iter().position(|p| *p == inst) {
            return (block_pos + 1, pos);
        }
        let pos = block
            .insts
            .iter()
            .position(|i| *i == inst)
            .unwrap_or(usize::MAX);
        (block_pos + 1, block.params.len() + pos)
    }

    // ------------------------------------------------------------------
    // Terminator structure
    // ------------------------------------------------------------------

    /// Returns a loop terminator's target (condition) block.
    #[must_use]
    pub fn loop_target(&self, loop_inst: InstId) -> BlockId {
        debug_assert_eq!(self.inst(loop_inst).op, Opcode::Loop);
        self.operand(loop_inst, 0).as_block().expect("loop target")
    }

    /// Returns a loop terminator's break (exit) block.
    #[must_use]
    pub fn loop_break(&self, loop_inst: InstId) -> BlockId {
        debug_assert_eq!(self.inst(loop_inst).op, Opcode::Loop);
        self.operand(loop_inst, 1).as_block().expect("loop break")
    }

    /// Returns the condition operand of an if-else terminator.
    #[must_use]
    pub fn if_else_condition(&self, inst: InstId) -> InstId {
        debug_assert_eq!(self.inst(inst).op, Opcode::IfElse);
        self.inst_operand(inst, 0)
    }

    /// Returns the true-side block of an if-else terminator.
    #[must_use]
    pub fn if_else_true_block(&self, inst: InstId) -> BlockId {
        self.operand(inst, 1).as_block().expect("if-else true block")
    }

    /// Returns the false-side block of an if-else terminator.
    #[must_use]
    pub fn if_else_false_block(&self, inst: InstId) -> BlockId {
        self.operand(inst, 2).as_block().expect("if-else false block")
    }

    /// Returns the number of phi arguments a branch-like terminator carries.
    ///
    /// Supported for [`Opcode::Branch`] (args follow the target) and
    /// [`Opcode::Loop`] (args follow target/break/continue).
    #[must_use]
    pub fn branch_arg_count(&self, inst: InstId) -> usize {
        let fixed = match self.inst(inst).op {
            Opcode::Branch => 1,
            Opcode::Loop => 3,
            _ => return 0,
        };
        self.inst(inst).operands.len().saturating_sub(fixed)
    }

    /// Returns a branch-like terminator's phi argument at `index`.
    #[must_use]
    pub fn branch_arg(&self, inst: InstId, index: usize) -> InstId {
        let fixed = match self.inst(inst).op {
            Opcode::Branch => 1,
            Opcode::Loop => 3,
            other => panic!("branch_arg on non-branch terminator {other:?}"),
        };
        self.inst_operand(inst, fixed + index)
    }

    /// Appends a phi argument to a branch-like terminator, returning its
    /// argument index.
    pub fn push_branch_arg(&mut self, inst: InstId, value: InstId) -> usize {
        debug_assert!(matches!(self.inst(inst).op, Opcode::Branch | Opcode::Loop));
        let index = self.branch_arg_count(inst);
        self.push_operand(inst, Operand::Inst(value));
        index
    }

    // ------------------------------------------------------------------
    // Module-scope constants
    // ------------------------------------------------------------------

    /// Returns the interned integer literal of the given type and value.
    pub fn get_int_value(&mut self, ty: TypeId, value: i64) -> InstId {
        let key = ConstKey::Int(ty, value);
        if let Some(&id) = self.constants.get(&key) {
            return id;
        }
        let id = self.alloc_inst(Opcode::IntLit, Some(ty), Some(ConstValue::Int(value)));
        self.constants.insert(key, id);
        id
    }

    /// Returns the interned boolean literal.
    pub fn get_bool_value(&mut self, value: bool) -> InstId {
        let key = ConstKey::Bool(value);
        if let Some(&id) = self.constants.get(&key) {
            return id;
        }
        let ty = self.types.bool();
        let id = self.alloc_inst(Opcode::BoolLit, Some(ty), Some(ConstValue::Bool(value)));
        self.constants.insert(key, id);
        id
    }

    /// Returns the interned float literal.
    pub fn get_float_value(&mut self, ty: TypeId, value: f64) -> InstId {
        let key = ConstKey::Float(ty, value.to_bits());
        if let Some(&id) = self.constants.get(&key) {
            return id;
        }
        let id = self.alloc_inst(Opcode::FloatLit, Some(ty), Some(ConstValue::Float(value)));
        self.constants.insert(key, id);
        id
    }

    /// Creates a module-scope callee reference carrying the given decorations.
    pub fn create_func_ref(&mut self, decorations: Vec<Decoration>) -> InstId {
        let ty = self.types.intern(crate::ir::TypeKind::Func);
        let id = self.alloc_inst(Opcode::FuncRef, Some(ty), None);
        self.insts[id.index()].decorations = decorations;
        id
    }

    /// Creates a module-scope global variable reference.
    pub fn create_global_var_ref(&mut self, pointee: TypeId) -> InstId {
        let ty = self.types.ptr(pointee);
        self.alloc_inst(Opcode::GlobalVarRef, Some(ty), None)
    }

    // ------------------------------------------------------------------
    // Debug dump
    // ------------------------------------------------------------------

    /// Renders the function as readable text, one block per paragraph.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for &block in &self.block_order {
            let _ = write!(out, "{block:?}(");
            for (i, &param) in self.block(block).params.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{param:?}");
            }
            out.push_str("):");
            if self.is_differential_block(block) {
                out.push_str(" [diff]");
            }
            if self.is_recompute_block(block) {
                out.push_str(" [recompute]");
            }
            out.push('\n');
            for &inst in &self.block(block).insts {
                let record = self.inst(inst);
                let _ = write!(out, "  {inst:?} = {:?}", record.op);
                for operand in &record.operands {
                    match operand {
                        Operand::Inst(i) => {
                            let _ = write!(out, " {i:?}");
                        }
                        Operand::Block(b) => {
                            let _ = write!(out, " {b:?}");
                        }
                    }
                }
                if let Some(value) = record.value {
                    let _ = write!(out, " ; {value:?}");
                }
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

/// A translation unit: a named collection of functions.
///
/// Each [`Func`] is self-contained (it owns its types, constants and
/// module-scope references), so functions can be transformed independently
/// and in parallel.
#[derive(Debug, Default)]
pub struct Module {
    /// Module name, for diagnostics.
    pub name: String,
    /// The functions of the module.
    pub funcs: Vec<Func>,
}

impl Module {
    /// Creates an empty module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            funcs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Builder;

    #[test]
    fn test_use_tracking_on_set_operand() {
        let mut func = Func::new();
        let int = func.types_mut().int();
        let block = func.alloc_block();
        func.insert_block_at_end(block);

        let a = func.get_int_value(int, 1);
        let b = func.get_int_value(int, 2);

        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(block);
        let sum = builder.emit_add(int, a, b);

        assert_eq!(func.uses_of(a).len(), 1);
        assert_eq!(func.uses_of(b).len(), 1);

        let c = func.get_int_value(int, 3);
        func.set_operand(sum, 0, Operand::Inst(c));
        assert!(func.uses_of(a).is_empty());
        assert_eq!(func.uses_of(c).len(), 1);
    }

    #[test]
    fn test_replace_uses_with() {
        let mut func = Func::new();
        let int = func.types_mut().int();
        let block = func.alloc_block();
        func.insert_block_at_end(block);

        let a = func.get_int_value(int, 1);
        let b = func.get_int_value(int, 2);

        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(block);
        let x = builder.emit_add(int, a, a);
        let _y = builder.emit_mul(int, x, a);

        func.replace_uses_with(a, b);
        assert!(func.uses_of(a).is_empty());
        assert_eq!(func.uses_of(b).len(), 3);
    }

    #[test]
    fn test_constant_dedup() {
        let mut func = Func::new();
        let int = func.types_mut().int();
        assert_eq!(func.get_int_value(int, 7), func.get_int_value(int, 7));
        assert_ne!(func.get_int_value(int, 7), func.get_int_value(int, 8));
        assert_eq!(func.get_bool_value(true), func.get_bool_value(true));
    }

    #[test]
    fn test_block_ordering() {
        let mut func = Func::new();
        let a = func.alloc_block();
        let b = func.alloc_block();
        let c = func.alloc_block();
        func.insert_block_at_end(a);
        func.insert_block_at_end(c);
        func.insert_block_before(b, c);

        assert_eq!(func.block_ids(), vec![a, b, c]);
        assert_eq!(func.entry_block(), a);
        assert_eq!(func.next_block(a), Some(b));
        assert_eq!(func.next_block(c), None);
    }
}
