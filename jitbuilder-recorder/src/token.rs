//! The statement catalog (spec.md §6): one `Token` variant per recordable
//! builder action. Builder and value references are transcript-local `u32`
//! indices, not the core's own `BuilderId`/`ValueId` — a replay session
//! allocates its own arena, so the numbering has to be self-contained.
//!
//! The core's `PrimitiveType`/`ArithOp`/`CompareOp` don't derive
//! `Serialize`/`Deserialize` (they live in crates with no reason to depend on
//! serde), so the wire form mirrors each one with its own small enum here and
//! a `to_core`/`from_core` conversion. The wire enums are deliberately a
//! narrower catalog than the core ones: `capture_op`/`capture_terminator` in
//! `lib.rs` record the operations spec.md §8's scenarios actually exercise
//! (plain arithmetic, signed compares, `IfThen`) and skip the rest rather
//! than emit a token `replay` cannot yet reconstruct. This scope is recorded
//! in DESIGN.md.

use jitbuilder_ilgen::{ArithOp, CompareOp};
use jitbuilder_types::PrimitiveType;

#[cfg_attr(feature = "binary", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTypeWire {
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Address,
}

impl PrimitiveTypeWire {
    pub fn from_core(ty: PrimitiveType) -> Option<Self> {
        Some(match ty {
            PrimitiveType::Int8 => PrimitiveTypeWire::Int8,
            PrimitiveType::Int16 => PrimitiveTypeWire::Int16,
            PrimitiveType::Int32 => PrimitiveTypeWire::Int32,
            PrimitiveType::Int64 => PrimitiveTypeWire::Int64,
            PrimitiveType::Float => PrimitiveTypeWire::Float,
            PrimitiveType::Double => PrimitiveTypeWire::Double,
            PrimitiveType::Address => PrimitiveTypeWire::Address,
            _ => return None,
        })
    }

    pub fn to_core(self) -> PrimitiveType {
        match self {
            PrimitiveTypeWire::Int8 => PrimitiveType::Int8,
            PrimitiveTypeWire::Int16 => PrimitiveType::Int16,
            PrimitiveTypeWire::Int32 => PrimitiveType::Int32,
            PrimitiveTypeWire::Int64 => PrimitiveType::Int64,
            PrimitiveTypeWire::Float => PrimitiveType::Float,
            PrimitiveTypeWire::Double => PrimitiveType::Double,
            PrimitiveTypeWire::Address => PrimitiveType::Address,
        }
    }
}

/// `IlBuilder::Add`/`Sub`/... (spec.md §4.1 Arith group), minus the shift
/// operators: no scenario in spec.md §8 emits a shift, so `capture_op` never
/// produces one and `replay` has nothing to reconstruct it from yet.
#[cfg_attr(feature = "binary", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOpWire {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
}

impl ArithOpWire {
    pub fn from_core(op: ArithOp) -> Option<Self> {
        Some(match op {
            ArithOp::Add => ArithOpWire::Add,
            ArithOp::Sub => ArithOpWire::Sub,
            ArithOp::Mul => ArithOpWire::Mul,
            ArithOp::Div => ArithOpWire::Div,
            ArithOp::And => ArithOpWire::And,
            ArithOp::Or => ArithOpWire::Or,
            ArithOp::Xor => ArithOpWire::Xor,
            ArithOp::ShiftL | ArithOp::ShiftR | ArithOp::UnsignedShiftR => return None,
        })
    }

    pub fn to_core(self) -> ArithOp {
        match self {
            ArithOpWire::Add => ArithOp::Add,
            ArithOpWire::Sub => ArithOp::Sub,
            ArithOpWire::Mul => ArithOp::Mul,
            ArithOpWire::Div => ArithOp::Div,
            ArithOpWire::And => ArithOp::And,
            ArithOpWire::Or => ArithOp::Or,
            ArithOpWire::Xor => ArithOp::Xor,
        }
    }
}

/// `IlBuilder::EqualTo`/`NotEqualTo`/... minus the unsigned directions, for
/// the same reason `ArithOpWire` drops shifts.
#[cfg_attr(feature = "binary", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOpWire {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOpWire {
    pub fn from_core(op: CompareOp) -> Option<Self> {
        Some(match op {
            CompareOp::Eq => CompareOpWire::Eq,
            CompareOp::Ne => CompareOpWire::Ne,
            CompareOp::Lt => CompareOpWire::Lt,
            CompareOp::Le => CompareOpWire::Le,
            CompareOp::Gt => CompareOpWire::Gt,
            CompareOp::Ge => CompareOpWire::Ge,
            CompareOp::UnsignedLt
            | CompareOp::UnsignedLe
            | CompareOp::UnsignedGt
            | CompareOp::UnsignedGe => return None,
        })
    }

    pub fn to_core(self) -> CompareOp {
        match self {
            CompareOpWire::Eq => CompareOp::Eq,
            CompareOpWire::Ne => CompareOp::Ne,
            CompareOpWire::Lt => CompareOp::Lt,
            CompareOpWire::Le => CompareOp::Le,
            CompareOpWire::Gt => CompareOp::Gt,
            CompareOpWire::Ge => CompareOp::Ge,
        }
    }
}

/// One entry in the transcript. The constructor phase (`DefineParameter`,
/// `DefineLocal`, ..., terminated by `DoneConstructor`) always precedes the
/// buildIL phase, matching the original Recorder's two-phase structure
/// (spec.md §6).
#[cfg_attr(feature = "binary", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    DefineParameter { name: String, ty: PrimitiveTypeWire },
    DefineLocal { name: String, ty: PrimitiveTypeWire },
    DoneConstructor,

    NewBuilder { id: u32 },
    AppendBuilder { parent: u32, child: u32 },

    ConstInt { builder: u32, result: u32, ty: PrimitiveTypeWire, value: i64 },
    ConstFloat { builder: u32, result: u32, value: f32 },
    ConstDouble { builder: u32, result: u32, value: f64 },
    NullAddress { builder: u32, result: u32 },

    Load { builder: u32, result: u32, name: String },
    Store { builder: u32, name: String, value: u32 },

    Arith { builder: u32, result: u32, op: ArithOpWire, lhs: u32, rhs: u32 },
    Compare { builder: u32, result: u32, op: CompareOpWire, lhs: u32, rhs: u32 },

    Goto { builder: u32, target: u32 },
    ReturnVoid { builder: u32 },
    ReturnValue { builder: u32, value: u32 },
    IfThen { builder: u32, cond: u32, then_builder: u32 },
}

impl Token {
    /// The wire verb name (§6 `STATEMENT_*` catalog): the string written once
    /// as a definition record the first time a verb is used, and referenced
    /// by id on every subsequent use.
    pub fn verb(&self) -> &'static str {
        match self {
            Token::DefineParameter { .. } => "DefineParameter",
            Token::DefineLocal { .. } => "DefineLocal",
            Token::DoneConstructor => "DoneConstructor",
            Token::NewBuilder { .. } => "NewBuilder",
            Token::AppendBuilder { .. } => "AppendBuilder",
            Token::ConstInt { .. } => "ConstInt",
            Token::ConstFloat { .. } => "ConstFloat",
            Token::ConstDouble { .. } => "ConstDouble",
            Token::NullAddress { .. } => "NullAddress",
            Token::Load { .. } => "Load",
            Token::Store { .. } => "Store",
            Token::Arith { op, .. } => arith_verb(op.to_core()),
            Token::Compare { op, .. } => compare_verb(op.to_core()),
            Token::Goto { .. } => "Goto",
            Token::ReturnVoid { .. } => "Return",
            Token::ReturnValue { .. } => "Return",
            Token::IfThen { .. } => "IfThen",
        }
    }
}

/// `IlBuilder::Add`/`Sub`/... verb names (§6).
pub fn arith_verb(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Add => "Add",
        ArithOp::Sub => "Sub",
        ArithOp::Mul => "Mul",
        ArithOp::Div => "Div",
        ArithOp::And => "And",
        ArithOp::Or => "Or",
        ArithOp::Xor => "Xor",
        ArithOp::ShiftL => "ShiftL",
        ArithOp::ShiftR => "ShiftR",
        ArithOp::UnsignedShiftR => "UnsignedShiftR",
    }
}

/// `IlBuilder::EqualTo`/`NotEqualTo`/... verb names.
pub fn compare_verb(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "EqualTo",
        CompareOp::Ne => "NotEqualTo",
        CompareOp::Lt => "LessThan",
        CompareOp::Le => "LessOrEqualTo",
        CompareOp::Gt => "GreaterThan",
        CompareOp::Ge => "GreaterOrEqualTo",
        CompareOp::UnsignedLt => "UnsignedLessThan",
        CompareOp::UnsignedLe => "UnsignedLessOrEqualTo",
        CompareOp::UnsignedGt => "UnsignedGreaterThan",
        CompareOp::UnsignedGe => "UnsignedGreaterOrEqualTo",
    }
}
