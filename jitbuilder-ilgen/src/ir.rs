//! The minimal concrete IR surface this crate emits onto.
//!
//! spec.md treats the node/tree/block/CFG primitives as an external
//! collaborator (§2 "C3 IR Surface (iface)") that the core is opaque to. A
//! from-scratch reimplementation still needs *something* concrete to flatten
//! builders onto and to let the scenario tests in spec.md §8 observe actual
//! results, so this module provides a small, self-contained basic-block IR:
//! a block is a sequence of value-producing [`Stmt`]s ended by one
//! [`Terminator`]. It deliberately stops well short of a real compiler IR —
//! no instruction selection, no register allocation, no optimization passes
//! (all explicitly out of scope per spec.md §1) — it exists only so that
//! flattening, CFG wiring, and VM-state merging have something real to act
//! on.

use jitbuilder_entity::{entity_impl, PrimaryMap};
use jitbuilder_types::{PrimitiveType, TypeId};
use smallvec::SmallVec;

/// A stable handle for a computed or loaded intermediate result (spec.md §3
/// "Value"). Copy, not Clone-only: values are handed around by the host
/// freely, and carry their type directly so comparisons/conversions don't
/// need to re-query the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value {
    id: ValueId,
    ty: PrimitiveType,
}

impl Value {
    pub(crate) fn new(id: ValueId, ty: PrimitiveType) -> Self {
        Value { id, ty }
    }

    pub fn id(self) -> ValueId {
        self.id
    }

    pub fn ty(self) -> PrimitiveType {
        self.ty
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(u32);
entity_impl!(ValueId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u32);
entity_impl!(BlockId);

/// The six comparison flavors of spec.md §4.1's Compare group, plus their
/// unsigned counterparts, collapsed into one enum (see the "Dynamic-dispatch
/// operator maps" redesign note: one closed enum instead of per-op classes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    UnsignedLt,
    UnsignedLe,
    UnsignedGt,
    UnsignedGe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    ShiftL,
    ShiftR,
    UnsignedShiftR,
}

/// A numeric literal, tagged by the primitive type it was constructed for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f32),
    Double(f64),
    Address(u64),
}

/// A value-producing operation. Each `Op` becomes exactly one `Stmt` in the
/// owning block, in program order (spec.md §5: "emitted operations execute
/// in issue order").
#[derive(Debug, Clone)]
pub enum Op {
    Const(Literal),
    NullAddress,
    Param(u32),
    LoadLocal(u32),
    LoadAt {
        address: ValueId,
        ty: PrimitiveType,
    },
    /// `IlBuilder::VectorLoad` (SPEC_FULL.md §C.1): a vector-width variant of
    /// `LoadAt` carrying an explicit lane count alongside the vector type.
    VectorLoadAt {
        address: ValueId,
        ty: PrimitiveType,
        lanes: u32,
    },
    LoadIndirect {
        struct_ty: TypeId,
        field: String,
        object: ValueId,
    },
    /// `IlBuilder::IndexAt`: scaled pointer arithmetic. `word_ty` is the
    /// target's natural word type (`TypeDictionary::word_type()` at the time
    /// the op was built) and decides whether the scale multiply/add lowers
    /// as 32-bit (`aiadd`/`imul`) or 64-bit (`aladd`/`lmul`) arithmetic.
    IndexAt {
        base: ValueId,
        index: ValueId,
        elem_ty: PrimitiveType,
        word_ty: PrimitiveType,
    },
    Arith(ArithOp, ValueId, ValueId),
    /// Overflow-checked arithmetic; the handler is reached via a separate
    /// exception edge from the owning block, not encoded in the `Op` itself.
    /// `unsigned` distinguishes `AddWithOverflow`/`SubWithOverflow` from
    /// their `*WithUnsignedOverflow` counterparts (same operation, different
    /// overflow-detection semantics).
    CheckedArith(ArithOp, ValueId, ValueId, bool),
    Compare(CompareOp, ValueId, ValueId),
    Convert {
        value: ValueId,
        to: PrimitiveType,
        unsigned: bool,
    },
    Call {
        name: String,
        args: SmallVec<[ValueId; 4]>,
    },
    ComputedCall {
        target: ValueId,
        args: SmallVec<[ValueId; 4]>,
    },
    AtomicAdd {
        address: ValueId,
        delta: ValueId,
        offset: Option<ValueId>,
    },
    CreateLocalArray {
        count: u32,
        elem_ty: PrimitiveType,
    },
    CreateLocalStruct {
        struct_ty: TypeId,
    },
}

/// A side-effecting or value-producing statement inside a block.
#[derive(Debug, Clone)]
pub enum Stmt {
    Eval { result: ValueId, op: Op },
    StoreLocal { slot: u32, value: ValueId },
    StoreOver { dest: ValueId, value: ValueId },
    StoreAt { address: ValueId, value: ValueId },
    /// `IlBuilder::VectorStore` (SPEC_FULL.md §C.1): the vector-width
    /// counterpart of `StoreAt`, carrying the same explicit lane count as
    /// `Op::VectorLoadAt`.
    VectorStoreAt { address: ValueId, value: ValueId, lanes: u32 },
    StoreIndirect {
        struct_ty: TypeId,
        field: String,
        object: ValueId,
        value: ValueId,
    },
    TransactionAbort,
}

/// How control leaves a block. `Unset` is a temporary state during
/// construction; flattening requires every reachable block to have a real
/// terminator or to fall through to its successor in sequence.
#[derive(Debug, Clone, Default)]
pub enum Terminator {
    #[default]
    Unset,
    FallsThrough,
    Goto(BlockId),
    Return(Option<ValueId>),
    IfCmp {
        op: CompareOp,
        lhs: ValueId,
        rhs: ValueId,
        then_target: BlockId,
        else_target: BlockId,
    },
    Switch {
        selector: ValueId,
        cases: SmallVec<[(i32, BlockId); 4]>,
        default: BlockId,
    },
    /// `IlBuilder::Transaction` (spec.md §4.1 Transaction group) on a
    /// platform with a TM evaluator: the hardware `tstart` instruction picks
    /// one of three continuations at runtime rather than branching on a
    /// computed condition, so none of `persist`/`transient`/`body` is a
    /// "fallthrough" in the `IfCmp`/`Switch` sense.
    Transaction {
        persist: BlockId,
        transient: BlockId,
        body: BlockId,
    },
}

#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub stmts: Vec<Stmt>,
    pub terminator: Terminator,
    pub bci: Option<i32>,
    pub cold: bool,
    pub catch_type: Option<u32>,
}

/// The concrete control-flow graph: block storage plus the explicit edge
/// list flattening produces. Owned by the [`crate::MethodBuilder`]; builders
/// never own blocks directly, only indices into this arena (Design Notes:
/// "cross-references between builders are indices").
#[derive(Debug, Default)]
pub struct Cfg {
    pub blocks: PrimaryMap<BlockId, BlockData>,
    pub values: PrimaryMap<ValueId, PrimitiveType>,
    pub edges: Vec<(BlockId, BlockId)>,
}

impl Cfg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_block(&mut self) -> BlockId {
        self.blocks.push(BlockData::default())
    }

    pub fn new_value(&mut self, ty: PrimitiveType) -> Value {
        let id = self.values.push(ty);
        Value::new(id, ty)
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.edges.push((from, to));
    }

    pub fn successors(&self, block: BlockId) -> SmallVec<[BlockId; 4]> {
        let mut out: SmallVec<[BlockId; 4]> = self
            .edges
            .iter()
            .filter(|(f, _)| *f == block)
            .map(|(_, t)| *t)
            .collect();
        match &self.blocks[block].terminator {
            Terminator::Goto(t) => out.push(*t),
            Terminator::IfCmp {
                then_target,
                else_target,
                ..
            } => {
                out.push(*then_target);
                out.push(*else_target);
            }
            Terminator::Switch { cases, default, .. } => {
                out.extend(cases.iter().map(|(_, b)| *b));
                out.push(*default);
            }
            Terminator::Transaction { persist, transient, body } => {
                out.push(*persist);
                out.push(*transient);
                out.push(*body);
            }
            _ => {}
        }
        out
    }
}
