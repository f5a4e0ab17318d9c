//! spec.md §7's error taxonomy: usage errors and host-contract errors are
//! both fail-fast and carry the offending operation/builder; transcript
//! errors live in `jitbuilder-recorder` since only replay produces them.

use crate::builder::BuilderId;
use jitbuilder_types::{PrimitiveType, TypeError};
use thiserror::Error;

/// Fail-fast errors raised while constructing IL. There is no retry path:
/// every variant here aborts the current compilation (spec.md §7
/// "Propagation policy").
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("builder {builder}: type mismatch in `{op}`: {lhs:?} vs {rhs:?}")]
    TypeMismatch {
        builder: BuilderId,
        op: &'static str,
        lhs: PrimitiveType,
        rhs: PrimitiveType,
    },

    #[error("builder {builder}: `{op}` does not accept operand of type {ty:?}")]
    UnsupportedOperandType {
        builder: BuilderId,
        op: &'static str,
        ty: PrimitiveType,
    },

    #[error("builder {builder}: no local named `{name}`")]
    UnknownSymbol { builder: BuilderId, name: String },

    #[error("local `{name}` already declared with type {existing:?}, cannot redeclare as {requested:?}")]
    InconsistentLocalType {
        name: String,
        existing: PrimitiveType,
        requested: PrimitiveType,
    },

    #[error("builder {0} is already part of another builder's sequence")]
    DuplicateAppend(BuilderId),

    #[error("illegal conversion from {from:?} to {to:?}")]
    IllegalConversion {
        from: PrimitiveType,
        to: PrimitiveType,
    },

    #[error("function `{0}` could not be resolved, even after RequestFunction")]
    UnresolvedFunction(String),

    #[error("call to `{name}` passed {actual} arguments, expected {expected}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("platform does not support atomic operations")]
    AtomicsUnsupported,

    #[error("platform lacks a hardware transactional-memory evaluator")]
    TransactionsUnsupported,

    #[error("switch selector must be Int32, got {0:?}")]
    InvalidSwitchSelector(PrimitiveType),

    #[error("a control-flow target builder must not be null")]
    NullTarget,

    #[error("builder {0} does not have a fall-through path (comesBack is false)")]
    NoFallThrough(BuilderId),

    #[error(transparent)]
    Type(#[from] TypeError),
}
