//! Instruction builder.
//!
//! The builder tracks an insertion point and provides `emit_*` constructors
//! for the instructions the middle-end synthesizes: arithmetic and
//! comparisons for counters, variables and load/store/element-address chains
//! for checkpoint storage, branches for recompute-block wiring, and the
//! autodiff marker instructions.

use crate::ir::{BlockId, ConstValue, Func, InstId, Opcode, Operand, TypeId, TypeKind};

/// Where newly emitted instructions are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertPoint {
    /// No placement configured; emitting is a bug.
    None,
    /// Append to the end of a block.
    AtEnd(BlockId),
    /// Insert immediately before an existing instruction.
    Before(InstId),
}

/// Emits instructions into a [`Func`] at a configurable insertion point.
#[derive(Debug)]
pub struct Builder<'f> {
    func: &'f mut Func,
    insert: InsertPoint,
}

impl<'f> Builder<'f> {
    /// Creates a builder with no insertion point.
    pub fn new(func: &'f mut Func) -> Self {
        Self {
            func,
            insert: InsertPoint::None,
        }
    }

    /// Returns the function being built.
    #[must_use]
    pub fn func(&mut self) -> &mut Func {
        self.func
    }

    /// Emits subsequent instructions at the end of `block`.
    pub fn set_insert_into(&mut self, block: BlockId) {
        self.insert = InsertPoint::AtEnd(block);
    }

    /// Emits subsequent instructions immediately before `inst`.
    pub fn set_insert_before(&mut self, inst: InstId) {
        self.insert = InsertPoint::Before(inst);
    }

    /// Emits subsequent instructions immediately after `inst`.
    ///
    /// If `inst` is a block parameter or a module-scope value, the insertion
    /// point becomes the start of the relevant block's ordinary instructions
    /// (a parameter has no "after" slot of its own).
    pub fn set_insert_after_ordinary_inst(&mut self, inst: InstId) {
        let Some(parent) = self.func.inst(inst).parent else {
            panic!("set_insert_after_ordinary_inst: value has no parent block");
        };
        if self.func.block(parent).params.contains(&inst) {
            self.insert = match self.func.first_ordinary_inst(parent) {
                Some(first) => InsertPoint::Before(first),
                None => InsertPoint::AtEnd(parent),
            };
            return;
        }
        let insts = self.func.block(parent).insts();
        let pos = insts
            .iter()
            .position(|i| *i == inst)
            .expect("instruction not in its parent block");
        self.insert = match insts.get(pos + 1) {
            Some(next) => InsertPoint::Before(*next),
            None => InsertPoint::AtEnd(parent),
        };
    }

    /// Allocates a new block (not yet placed in the block order).
    pub fn create_block(&mut self) -> BlockId {
        self.func.alloc_block()
    }

    fn place(&mut self, inst: InstId) {
        match self.insert {
            InsertPoint::None => panic!("builder has no insertion point"),
            InsertPoint::AtEnd(block) => self.func.append_inst(block, inst),
            InsertPoint::Before(anchor) => self.func.insert_inst_before(inst, anchor),
        }
    }

    /// Emits an instruction with the given opcode, type and operands.
    pub fn emit(&mut self, op: Opcode, ty: Option<TypeId>, operands: &[Operand]) -> InstId {
        let inst = self.func.alloc_inst(op, ty, None);
        for &operand in operands {
            self.func.push_operand(inst, operand);
        }
        self.place(inst);
        inst
    }

    /// Appends a new parameter of the given type to `block`.
    pub fn emit_param(&mut self, block: BlockId, ty: TypeId) -> InstId {
        let inst = self.func.alloc_inst(Opcode::Param, Some(ty), None);
        self.func.append_param(block, inst);
        inst
    }

    /// Emits a local variable holding a value of `pointee` type.
    pub fn emit_var(&mut self, pointee: TypeId) -> InstId {
        let ty = self.func.types.ptr(pointee);
        self.emit(Opcode::Var, Some(ty), &[])
    }

    /// Emits a load through `addr`.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not pointer-typed.
    pub fn emit_load(&mut self, addr: InstId) -> InstId {
        let addr_ty = self.func.inst(addr).ty.expect("load address must be typed");
        let pointee = self
            .func
            .types
            .pointee(addr_ty)
            .expect("load address must be pointer-like");
        self.emit(Opcode::Load, Some(pointee), &[Operand::Inst(addr)])
    }

    /// Emits a store of `value` through `addr`.
    pub fn emit_store(&mut self, addr: InstId, value: InstId) -> InstId {
        self.emit(
            Opcode::Store,
            None,
            &[Operand::Inst(addr), Operand::Inst(value)],
        )
    }

    /// Emits the address of element `index` of the aggregate behind `base`.
    ///
    /// # Panics
    ///
    /// Panics if `base` does not point at an array.
    pub fn emit_element_address(&mut self, base: InstId, index: InstId) -> InstId {
        let base_ty = self.func.inst(base).ty.expect("base must be typed");
        let pointee = self
            .func
            .types
            .pointee(base_ty)
            .expect("base must be pointer-like");
        let element = match *self.func.types.kind(pointee) {
            TypeKind::Array { element, .. } => element,
            ref other => panic!("element address into non-array type {other:?}"),
        };
        let ty = self.func.types.ptr(element);
        self.emit(
            Opcode::ElementAddr,
            Some(ty),
            &[Operand::Inst(base), Operand::Inst(index)],
        )
    }

    /// Emits `a + b`.
    pub fn emit_add(&mut self, ty: TypeId, a: InstId, b: InstId) -> InstId {
        self.emit(
            Opcode::Add,
            Some(ty),
            &[Operand::Inst(a), Operand::Inst(b)],
        )
    }

    /// Emits `a - b`.
    pub fn emit_sub(&mut self, ty: TypeId, a: InstId, b: InstId) -> InstId {
        self.emit(
            Opcode::Sub,
            Some(ty),
            &[Operand::Inst(a), Operand::Inst(b)],
        )
    }

    /// Emits `a * b`.
    pub fn emit_mul(&mut self, ty: TypeId, a: InstId, b: InstId) -> InstId {
        self.emit(
            Opcode::Mul,
            Some(ty),
            &[Operand::Inst(a), Operand::Inst(b)],
        )
    }

    /// Emits `a >= b`.
    pub fn emit_geq(&mut self, a: InstId, b: InstId) -> InstId {
        let ty = self.func.types.bool();
        self.emit(
            Opcode::Geq,
            Some(ty),
            &[Operand::Inst(a), Operand::Inst(b)],
        )
    }

    /// Emits `a < b`.
    pub fn emit_less(&mut self, a: InstId, b: InstId) -> InstId {
        let ty = self.func.types.bool();
        self.emit(
            Opcode::Less,
            Some(ty),
            &[Operand::Inst(a), Operand::Inst(b)],
        )
    }

    /// Emits an integer cast of `value` to `ty`.
    pub fn emit_cast(&mut self, ty: TypeId, value: InstId) -> InstId {
        self.emit(Opcode::IntCast, Some(ty), &[Operand::Inst(value)])
    }

    /// Emits a default-constructed value of `ty`.
    pub fn emit_default_construct(&mut self, ty: TypeId) -> InstId {
        self.emit(Opcode::DefaultConstruct, Some(ty), &[])
    }

    /// Emits a call. Operands are `[callee, args...]`.
    pub fn emit_call(&mut self, ty: Option<TypeId>, callee: InstId, args: &[InstId]) -> InstId {
        let mut operands = vec![Operand::Inst(callee)];
        operands.extend(args.iter().map(|a| Operand::Inst(*a)));
        self.emit(Opcode::Call, ty, &operands)
    }

    /// Emits a checkpoint marker forcing `value` to be stored.
    pub fn emit_checkpoint_object(&mut self, value: InstId) -> InstId {
        let ty = self.func.inst(value).ty;
        self.emit(Opcode::CheckpointObject, ty, &[Operand::Inst(value)])
    }

    /// Emits a loop-exit-value marker splitting `value` for after-loop uses.
    pub fn emit_loop_exit_value(&mut self, value: InstId) -> InstId {
        let ty = self.func.inst(value).ty;
        self.emit(Opcode::LoopExitValue, ty, &[Operand::Inst(value)])
    }

    /// Emits an unconditional branch to `target` with phi arguments.
    pub fn emit_branch(&mut self, target: BlockId, args: &[InstId]) -> InstId {
        let mut operands = vec![Operand::Block(target)];
        operands.extend(args.iter().map(|a| Operand::Inst(*a)));
        self.emit(Opcode::Branch, None, &operands)
    }

    /// Emits a loop terminator with phi arguments for the target block.
    pub fn emit_loop(
        &mut self,
        target: BlockId,
        break_block: BlockId,
        continue_block: BlockId,
        args: &[InstId],
    ) -> InstId {
        let mut operands = vec![
            Operand::Block(target),
            Operand::Block(break_block),
            Operand::Block(continue_block),
        ];
        operands.extend(args.iter().map(|a| Operand::Inst(*a)));
        self.emit(Opcode::Loop, None, &operands)
    }

    /// Emits a two-way conditional terminator.
    pub fn emit_if_else(
        &mut self,
        cond: InstId,
        true_block: BlockId,
        false_block: BlockId,
        after_block: BlockId,
    ) -> InstId {
        self.emit(
            Opcode::IfElse,
            None,
            &[
                Operand::Inst(cond),
                Operand::Block(true_block),
                Operand::Block(false_block),
                Operand::Block(after_block),
            ],
        )
    }

    /// Emits a return terminator.
    pub fn emit_return(&mut self, value: Option<InstId>) -> InstId {
        match value {
            Some(v) => self.emit(Opcode::Return, None, &[Operand::Inst(v)]),
            None => self.emit(Opcode::Return, None, &[]),
        }
    }

    /// Returns the interned integer literal (module scope, insertion point
    /// unaffected).
    pub fn get_int_value(&mut self, ty: TypeId, value: i64) -> InstId {
        self.func.get_int_value(ty, value)
    }

    /// Returns the interned boolean literal.
    pub fn get_bool_value(&mut self, value: bool) -> InstId {
        self.func.get_bool_value(value)
    }

    pub(crate) fn alloc_detached(
        &mut self,
        op: Opcode,
        ty: Option<TypeId>,
        value: Option<ConstValue>,
    ) -> InstId {
        self.func.alloc_inst(op, ty, value)
    }

    pub(crate) fn place_at_current_point(&mut self, inst: InstId) {
        self.place(inst);
    }

    pub(crate) fn current_block(&self) -> Option<BlockId> {
        match self.insert {
            InsertPoint::None => None,
            InsertPoint::AtEnd(block) => Some(block),
            InsertPoint::Before(anchor) => self.func.inst(anchor).parent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_into_block() {
        let mut func = Func::new();
        let int = func.types_mut().int();
        let block = func.alloc_block();
        func.insert_block_at_end(block);

        let one = func.get_int_value(int, 1);
        let two = func.get_int_value(int, 2);

        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(block);
        let sum = builder.emit_add(int, one, two);
        let term = builder.emit_return(Some(sum));

        assert_eq!(func.inst_ids_in(block), vec![sum, term]);
        assert_eq!(func.terminator(block), Some(term));
    }

    #[test]
    fn test_insert_before() {
        let mut func = Func::new();
        let int = func.types_mut().int();
        let block = func.alloc_block();
        func.insert_block_at_end(block);

        let one = func.get_int_value(int, 1);

        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(block);
        let ret = builder.emit_return(Some(one));

        builder.set_insert_before(ret);
        let extra = builder.emit_add(int, one, one);

        assert_eq!(func.inst_ids_in(block), vec![extra, ret]);
    }

    #[test]
    fn test_insert_after_param_lands_at_block_start() {
        let mut func = Func::new();
        let int = func.types_mut().int();
        let block = func.alloc_block();
        func.insert_block_at_end(block);

        let mut builder = Builder::new(&mut func);
        let param = builder.emit_param(block, int);
        builder.set_insert_into(block);
        let ret = builder.emit_return(Some(param));

        builder.set_insert_after_ordinary_inst(param);
        let doubled = builder.emit_add(int, param, param);

        assert_eq!(func.inst_ids_in(block), vec![doubled, ret]);
    }

    #[test]
    fn test_load_store_element_address_types() {
        let mut func = Func::new();
        let float = func.types_mut().float();
        let arr = func.types_mut().array(float, 5);
        let int = func.types_mut().int();
        let block = func.alloc_block();
        func.insert_block_at_end(block);

        let zero = func.get_int_value(int, 0);

        let mut builder = Builder::new(&mut func);
        builder.set_insert_into(block);
        let var = builder.emit_var(arr);
        let addr = builder.emit_element_address(var, zero);
        let loaded = builder.emit_load(addr);

        assert_eq!(func.inst(loaded).ty(), Some(float));
        let addr_ty = func.inst(addr).ty().unwrap();
        assert_eq!(func.types().pointee(addr_ty), Some(float));
    }
}
