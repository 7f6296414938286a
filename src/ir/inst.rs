//! IR instructions, opcodes and decorations.
//!
//! Instructions are arena-owned by a [`Func`](crate::ir::Func) and referenced
//! by [`InstId`]. Each instruction records an opcode, an optional result
//! type, an ordered operand list, its attached decorations and the uses of
//! its result value (maintained by the owning function).
//!
//! # Decorations
//!
//! Auxiliary facts about an instruction ("this is differential", "this is a
//! loop counter", "this callee reads no global state") are attached as tagged
//! metadata rather than expressed through a type hierarchy. Passes query
//! decorations with the accessors on [`Func`](crate::ir::Func); downstream
//! stages that don't care about a decoration simply never look at it.

use bitflags::bitflags;
use strum::{EnumCount, EnumIter};

use crate::ir::TypeId;

/// Unique identifier for an instruction within a function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(u32);

impl InstId {
    /// Creates an instruction id from a raw index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Returns the underlying index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for InstId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Unique identifier for a basic block within a function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    /// Creates a block id from a raw index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Returns the underlying index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// An operand slot of an instruction.
///
/// Terminators reference blocks; everything else references values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// A value operand.
    Inst(InstId),
    /// A jump-target operand.
    Block(BlockId),
}

impl Operand {
    /// Returns the value id if this is a value operand.
    #[must_use]
    pub const fn as_inst(self) -> Option<InstId> {
        match self {
            Self::Inst(id) => Some(id),
            Self::Block(_) => None,
        }
    }

    /// Returns the block id if this is a jump-target operand.
    #[must_use]
    pub const fn as_block(self) -> Option<BlockId> {
        match self {
            Self::Block(id) => Some(id),
            Self::Inst(_) => None,
        }
    }
}

/// A single use of a value: the consuming instruction and the operand slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UseRef {
    /// The instruction consuming the value.
    pub user: InstId,
    /// The operand position within the user.
    pub index: u32,
}

/// Literal payload carried by constant instructions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    /// Integer literal.
    Int(i64),
    /// Boolean literal.
    Bool(bool),
    /// Floating point literal.
    Float(f64),
}

/// The target of a differential back-link decoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimalLink {
    /// The primal counterpart is an instruction.
    Inst(InstId),
    /// The primal counterpart is a block.
    Block(BlockId),
}

/// Tagged metadata attachable to instructions and blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoration {
    /// Marks an instruction or block as part of the reverse-mode derivative
    /// computation, optionally back-linking the primal counterpart it was
    /// derived from.
    Differential {
        /// The primal instruction or block this was transcribed from.
        primal: Option<PrimalLink>,
    },
    /// Marks a block as a synthesized primal recompute block.
    RecomputeBlock,
    /// Marks a phi parameter (or its checkpoint storage) as a loop iteration
    /// counter. Counters are bookkeeping, never checkpointed as ordinary
    /// values.
    LoopCounter,
    /// Static upper bound on a loop's iteration count.
    LoopMaxIters(u32),
    /// The callee prefers its results to be stored rather than recomputed.
    PreferCheckpoint,
    /// The callee prefers its results to be recomputed rather than stored.
    PreferRecompute,
    /// The callee has no side effects and reads no non-local state.
    ///
    /// Produced by an upstream interprocedural analysis; this crate only
    /// reads it.
    ReadNone,
    /// Links a differential instruction to the variable holding its callee's
    /// primal context.
    PrimalContext(InstId),
    /// Records the primal value a loop phi holds at loop exit.
    LoopExitPrimalValue(InstId),
    /// Human-readable name hint for debugging and IR dumps.
    NameHint(&'static str),
}

bitflags! {
    /// Static properties of an opcode, driving the checkpoint decision table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpFlags: u8 {
        /// Ends a basic block.
        const TERMINATOR = 1 << 0;
        /// Never checkpointed to storage: either not a real computation
        /// (casts, constructors, extractions) or trivially recomputable
        /// (arithmetic, comparisons, bit ops).
        const NEVER_STORE = 1 << 1;
        /// Cannot be materialized as a stored unit; its storage obligation
        /// is delegated to its operands.
        const PASS_THROUGH = 1 << 2;
    }
}

/// Instruction opcodes.
///
/// The set mirrors what survives into the middle-end after specialization:
/// scalar/aggregate data flow, memory, structured control flow, and the
/// autodiff marker instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, EnumIter)]
pub enum Opcode {
    // Values.
    /// Block parameter (phi).
    Param,
    /// Integer literal.
    IntLit,
    /// Boolean literal.
    BoolLit,
    /// Floating point literal.
    FloatLit,
    /// Undefined value.
    Undefined,
    /// Module-scope reference to a function (callee of [`Opcode::Call`]).
    FuncRef,
    /// Module-scope reference to a global mutable variable.
    GlobalVarRef,

    // Memory.
    /// Local variable (address-producing).
    Var,
    /// Load through an address.
    Load,
    /// Store through an address. Operands: `[addr, value]`.
    Store,
    /// Address of an array element. Operands: `[base, index]`.
    ElementAddr,
    /// Address of a struct field. Operands: `[base, field-index-literal]`.
    FieldAddr,

    // Arithmetic.
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Negation.
    Neg,
    /// Integer remainder.
    IRem,
    /// Floating point remainder.
    FRem,

    // Comparison.
    /// Equality.
    Eql,
    /// Inequality.
    Neq,
    /// Less-than.
    Less,
    /// Less-or-equal.
    Leq,
    /// Greater-than.
    Greater,
    /// Greater-or-equal.
    Geq,

    // Logic and bits.
    /// Logical and.
    And,
    /// Logical or.
    Or,
    /// Logical not.
    Not,
    /// Bitwise and.
    BitAnd,
    /// Bitwise or.
    BitOr,
    /// Bitwise xor.
    BitXor,
    /// Bitwise not.
    BitNot,
    /// Shift left.
    Shl,
    /// Shift right.
    Shr,
    /// Ternary select. Operands: `[cond, on-true, on-false]`.
    Select,

    // Casts.
    /// Integer width/signedness cast.
    IntCast,
    /// Floating point width cast.
    FloatCast,
    /// Integer to float conversion.
    CastIntToFloat,
    /// Float to integer conversion.
    CastFloatToInt,
    /// Bit-pattern reinterpretation.
    BitCast,
    /// Layout-compatible reinterpretation.
    Reinterpret,

    // Construction.
    /// Struct construction.
    MakeStruct,
    /// Tuple construction.
    MakeTuple,
    /// Array construction.
    MakeArray,
    /// Vector construction.
    MakeVector,
    /// Vector splat from a scalar.
    MakeVectorFromScalar,
    /// Array splat from an element.
    MakeArrayFromElement,
    /// Zero/default construction.
    DefaultConstruct,
    /// Pairs a primal value with its differential.
    MakeDifferentialPair,
    /// Wraps a value in an optional.
    MakeOptionalValue,
    /// The empty optional.
    MakeOptionalNone,
    /// Packages a value with its witness into an existential.
    MakeExistential,

    // Extraction.
    /// Array/vector element read.
    GetElement,
    /// Struct field read.
    FieldExtract,
    /// Tuple element read.
    GetTupleElement,
    /// Vector component shuffle.
    Swizzle,
    /// Functional array/vector update.
    UpdateElement,
    /// Optional discriminant read.
    OptionalHasValue,
    /// Optional payload read.
    GetOptionalValue,
    /// Primal half of a differential pair.
    DifferentialPairGetPrimal,
    /// Differential half of a differential pair.
    DifferentialPairGetDifferential,
    /// Concrete value inside an existential.
    ExtractExistentialValue,
    /// Concrete type inside an existential.
    ExtractExistentialType,
    /// Witness table inside an existential.
    ExtractExistentialWitnessTable,
    /// Sequential conformance id of an existential.
    GetSequentialID,

    // Generics.
    /// Specializes a generic to concrete arguments.
    Specialize,
    /// Looks a method up through a witness table.
    LookupWitnessMethod,

    // Calls.
    /// Function call. Operands: `[callee, args...]`.
    Call,

    // Autodiff markers.
    /// Forces its operand to be checkpointed to storage. Lowered to a no-op
    /// before the pipeline returns.
    CheckpointObject,
    /// Splits a loop-condition-block value for its after-loop uses. Lowered
    /// to a no-op before the pipeline returns.
    LoopExitValue,
    /// Detaches a value from derivative propagation.
    DetachDerivative,
    /// Records a differentiable-type witness needed by the function context.
    DifferentiableTypeAnnotation,

    // Terminators.
    /// Unconditional branch. Operands: `[target, args...]`.
    Branch,
    /// Two-way conditional. Operands: `[cond, true-block, false-block, after-block]`.
    IfElse,
    /// Multi-way switch. Operands: `[cond, break-block, default-block, (case-lit, case-block)...]`.
    Switch,
    /// Structured loop entry. Operands: `[target, break-block, continue-block, args...]`.
    Loop,
    /// Function return. Operands: `[value?]`.
    Return,
    /// Unreachable terminator.
    Unreachable,
}

impl Opcode {
    /// Returns the static property flags for this opcode.
    #[must_use]
    pub const fn flags(self) -> OpFlags {
        match self {
            Self::Branch
            | Self::IfElse
            | Self::Switch
            | Self::Loop
            | Self::Return
            | Self::Unreachable => OpFlags::TERMINATOR,

            // Not real computations: literals, references, casts, constructors,
            // extractions, generic lookups.
            Self::Param
            | Self::IntLit
            | Self::BoolLit
            | Self::FloatLit
            | Self::Undefined
            | Self::IntCast
            | Self::FloatCast
            | Self::CastIntToFloat
            | Self::CastFloatToInt
            | Self::BitCast
            | Self::Reinterpret
            | Self::MakeStruct
            | Self::MakeTuple
            | Self::MakeArray
            | Self::MakeVector
            | Self::MakeVectorFromScalar
            | Self::MakeArrayFromElement
            | Self::DefaultConstruct
            | Self::MakeDifferentialPair
            | Self::MakeOptionalValue
            | Self::MakeOptionalNone
            | Self::MakeExistential
            | Self::GetElement
            | Self::FieldExtract
            | Self::GetTupleElement
            | Self::Swizzle
            | Self::UpdateElement
            | Self::OptionalHasValue
            | Self::GetOptionalValue
            | Self::DifferentialPairGetPrimal
            | Self::DifferentialPairGetDifferential
            | Self::ExtractExistentialType
            | Self::Specialize
            | Self::LookupWitnessMethod
            | Self::DetachDerivative
            | Self::LoopExitValue
            | Self::DifferentiableTypeAnnotation => OpFlags::NEVER_STORE,

            // Trivial to recompute.
            Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Neg
            | Self::IRem
            | Self::FRem
            | Self::Eql
            | Self::Neq
            | Self::Less
            | Self::Leq
            | Self::Greater
            | Self::Geq
            | Self::And
            | Self::Or
            | Self::Not
            | Self::BitAnd
            | Self::BitOr
            | Self::BitXor
            | Self::BitNot
            | Self::Shl
            | Self::Shr
            | Self::Select => OpFlags::NEVER_STORE,

            // Loads are re-issued rather than stored; the exceptions (global
            // or mutated addresses) are vetoed by `can_recompute` instead.
            Self::Load => OpFlags::NEVER_STORE,

            // Storage obligation delegated to the operand.
            Self::ExtractExistentialValue
            | Self::ExtractExistentialWitnessTable
            | Self::GetSequentialID => OpFlags::NEVER_STORE.union(OpFlags::PASS_THROUGH),

            Self::FuncRef
            | Self::GlobalVarRef
            | Self::Var
            | Self::Store
            | Self::ElementAddr
            | Self::FieldAddr
            | Self::Call
            | Self::CheckpointObject => OpFlags::empty(),
        }
    }

    /// Returns `true` if this opcode ends a basic block.
    #[must_use]
    pub const fn is_terminator(self) -> bool {
        self.flags().contains(OpFlags::TERMINATOR)
    }
}

/// An instruction record.
///
/// Fields are crate-private; instructions are created through the
/// [`Builder`](crate::ir::Builder) and inspected through accessors on
/// [`Func`](crate::ir::Func) and [`Inst`].
#[derive(Debug, Clone)]
pub struct Inst {
    pub(crate) op: Opcode,
    pub(crate) ty: Option<TypeId>,
    pub(crate) operands: Vec<Operand>,
    pub(crate) decorations: Vec<Decoration>,
    pub(crate) parent: Option<BlockId>,
    pub(crate) uses: Vec<UseRef>,
    pub(crate) value: Option<ConstValue>,
}

impl Inst {
    /// Returns the opcode.
    #[must_use]
    pub const fn op(&self) -> Opcode {
        self.op
    }

    /// Returns the result type, if the instruction produces a value.
    #[must_use]
    pub const fn ty(&self) -> Option<TypeId> {
        self.ty
    }

    /// Returns the operand list.
    #[must_use]
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// Returns the containing block, or `None` for module-scope values.
    #[must_use]
    pub const fn parent(&self) -> Option<BlockId> {
        self.parent
    }

    /// Returns the uses of this instruction's result.
    #[must_use]
    pub fn uses(&self) -> &[UseRef] {
        &self.uses
    }

    /// Returns the attached decorations.
    #[must_use]
    pub fn decorations(&self) -> &[Decoration] {
        &self.decorations
    }

    /// Returns the literal payload for constant instructions.
    #[must_use]
    pub const fn value(&self) -> Option<ConstValue> {
        self.value
    }

    /// Returns the integer payload if this is an integer literal.
    #[must_use]
    pub fn as_int_lit(&self) -> Option<i64> {
        match (self.op, self.value) {
            (Opcode::IntLit, Some(ConstValue::Int(v))) => Some(v),
            _ => None,
        }
    }

    /// Returns the boolean payload if this is a boolean literal.
    #[must_use]
    pub fn as_bool_lit(&self) -> Option<bool> {
        match (self.op, self.value) {
            (Opcode::BoolLit, Some(ConstValue::Bool(v))) => Some(v),
            _ => None,
        }
    }

    /// Returns `true` if a decoration matching the predicate is attached.
    pub fn has_decoration(&self, pred: impl Fn(&Decoration) -> bool) -> bool {
        self.decorations.iter().any(pred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_terminator_flags() {
        assert!(Opcode::Branch.is_terminator());
        assert!(Opcode::Loop.is_terminator());
        assert!(Opcode::Return.is_terminator());
        assert!(!Opcode::Add.is_terminator());
        assert!(!Opcode::Call.is_terminator());
    }

    #[test]
    fn test_pass_through_implies_never_store() {
        for op in Opcode::iter() {
            if op.flags().contains(OpFlags::PASS_THROUGH) {
                assert!(
                    op.flags().contains(OpFlags::NEVER_STORE),
                    "{op:?} is pass-through but storable"
                );
            }
        }
    }

    #[test]
    fn test_every_opcode_has_flags() {
        // The flags table is a total function over the opcode set; iterating
        // all variants exercises every match arm.
        for op in Opcode::iter() {
            let _ = op.flags();
        }
    }
}
