//! IR-level types.
//!
//! Instruction result types are interned into a per-function [`TypeTable`]
//! and referenced by [`TypeId`]. Interning keeps type equality a single
//! integer comparison, which the checkpointing passes rely on when deciding
//! whether a recomputed replacement needs an integer cast.
//!
//! This is deliberately a much smaller type language than the front-end's
//! structural type model (see [`crate::types`]): by the time a function
//! reaches the autodiff pipeline, generics have been specialized and only
//! the shapes relevant to storage layout and addressing remain.

use std::collections::HashMap;
use std::fmt;

/// Unique identifier for an interned IR type.
///
/// Lightweight handle into a [`TypeTable`]. Equal ids always denote
/// structurally equal types within one table.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

impl TypeId {
    /// Creates a type id from a raw index.
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

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// The structural kind of an IR type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Boolean.
    Bool,
    /// Signed or unsigned integer of the given bit width.
    Int {
        /// Bit width (8, 16, 32 or 64).
        bits: u8,
        /// Signedness.
        signed: bool,
    },
    /// IEEE floating point of the given bit width.
    Float {
        /// Bit width (16, 32 or 64).
        bits: u8,
    },
    /// Fixed-length vector of a scalar element.
    Vector {
        /// Element type.
        element: TypeId,
        /// Lane count.
        count: u32,
    },
    /// Fixed-length array.
    Array {
        /// Element type.
        element: TypeId,
        /// Element count.
        count: u32,
    },
    /// Aggregate with ordered fields.
    Struct {
        /// Field types in declaration order.
        fields: Vec<TypeId>,
    },
    /// Pair of a primal value and its differential.
    DifferentialPair {
        /// The primal half's type (the differential half shares it here).
        primal: TypeId,
    },
    /// Mutable pointer to a value of the pointee type.
    Ptr {
        /// Pointee type.
        pointee: TypeId,
    },
    /// Immutable by-reference parameter type.
    ///
    /// A load through a `ConstRef` root is always recomputable: the referent
    /// cannot change for the duration of the function.
    ConstRef {
        /// Pointee type.
        pointee: TypeId,
    },
    /// Function type. Never storable.
    Func,
    /// A witness table for an interface conformance. Never storable.
    WitnessTable,
    /// A first-class type value. Never storable.
    TypeValue,
}

/// Interning table for IR types.
///
/// Owned by a [`Func`](crate::ir::Func); each function carries its own table
/// so that the checkpointing pass holds exclusive mutable access to
/// everything it touches (functions are processed independently, possibly in
/// parallel across a module).
#[derive(Debug, Default)]
pub struct TypeTable {
    kinds: Vec<TypeKind>,
    dedup: HashMap<TypeKind, TypeId>,
}

impl TypeTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a type kind, returning its id.
    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.dedup.get(&kind) {
            return id;
        }
        let id = TypeId::new(self.kinds.len());
        self.kinds.push(kind.clone());
        self.dedup.insert(kind, id);
        id
    }

    /// Returns the kind for an id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this table.
    #[must_use]
    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id.index()]
    }

    /// Interns the 32-bit signed integer type (the loop counter type).
    pub fn int(&mut self) -> TypeId {
        self.intern(TypeKind::Int {
            bits: 32,
            signed: true,
        })
    }

    /// Interns the boolean type.
    pub fn bool(&mut self) -> TypeId {
        self.intern(TypeKind::Bool)
    }

    /// Interns the 32-bit float type.
    pub fn float(&mut self) -> TypeId {
        self.intern(TypeKind::Float { bits: 32 })
    }

    /// Interns a pointer type.
    pub fn ptr(&mut self, pointee: TypeId) -> TypeId {
        self.intern(TypeKind::Ptr { pointee })
    }

    /// Interns a const-ref type.
    pub fn const_ref(&mut self, pointee: TypeId) -> TypeId {
        self.intern(TypeKind::ConstRef { pointee })
    }

    /// Interns an array type.
    pub fn array(&mut self, element: TypeId, count: u32) -> TypeId {
        self.intern(TypeKind::Array { element, count })
    }

    /// Returns `true` if `id` is a scalar integer type.
    #[must_use]
    pub fn is_scalar_integer(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Int { .. })
    }

    /// Returns `true` if `id` is a pointer or const-ref type.
    #[must_use]
    pub fn is_ptr_like(&self, id: TypeId) -> bool {
        matches!(
            self.kind(id),
            TypeKind::Ptr { .. } | TypeKind::ConstRef { .. }
        )
    }

    /// Returns the pointee of a pointer-like type, if any.
    #[must_use]
    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Ptr { pointee } | TypeKind::ConstRef { pointee } => Some(*pointee),
            _ => None,
        }
    }

    /// Returns `true` if values of this type can be written to checkpoint storage.
    ///
    /// Types, witness tables and functions lower to target-specific logic and
    /// cannot be stored into variables or context structs as normal values.
    #[must_use]
    pub fn can_be_stored(&self, id: TypeId) -> bool {
        !matches!(
            self.kind(id),
            TypeKind::Func | TypeKind::WitnessTable | TypeKind::TypeValue
        )
    }

    /// Returns `true` if an integer value fits the given integer type.
    ///
    /// Non-integer types report `false`. 64-bit widths always fit because
    /// inferred values are themselves 64-bit.
    #[must_use]
    pub fn value_in_range(&self, value: i64, id: TypeId) -> bool {
        let TypeKind::Int { bits, signed } = *self.kind(id) else {
            return false;
        };
        if bits >= 64 {
            return true;
        }
        if signed {
            let max = (1i64 << (bits - 1)) - 1;
            value >= -max && value <= max
        } else {
            let max = (1i64 << bits) - 1;
            value >= 0 && value <= max
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_dedup() {
        let mut table = TypeTable::new();
        let a = table.int();
        let b = table.int();
        assert_eq!(a, b);

        let f = table.float();
        assert_ne!(a, f);
        assert_eq!(table.array(f, 4), table.array(f, 4));
        assert_ne!(table.array(f, 4), table.array(f, 5));
    }

    #[test]
    fn test_storability() {
        let mut table = TypeTable::new();
        let int = table.int();
        let func = table.intern(TypeKind::Func);
        let wt = table.intern(TypeKind::WitnessTable);
        let tv = table.intern(TypeKind::TypeValue);

        assert!(table.can_be_stored(int));
        assert!(!table.can_be_stored(func));
        assert!(!table.can_be_stored(wt));
        assert!(!table.can_be_stored(tv));
    }

    #[test]
    fn test_value_in_range() {
        let mut table = TypeTable::new();
        let i8t = table.intern(TypeKind::Int {
            bits: 8,
            signed: true,
        });
        let u8t = table.intern(TypeKind::Int {
            bits: 8,
            signed: false,
        });
        let i32t = table.int();

        assert!(table.value_in_range(127, i8t));
        assert!(!table.value_in_range(128, i8t));
        assert!(table.value_in_range(255, u8t));
        assert!(!table.value_in_range(-1, u8t));
        assert!(table.value_in_range(1 << 30, i32t));

        let float = table.float();
        assert!(!table.value_in_range(0, float));
    }
}
