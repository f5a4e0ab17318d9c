//! The builder arena: `IlBuilder`'s storage, independent of the host-facing
//! API (see `il_builder.rs`/`bytecode_builder.rs`/`method_builder.rs`).
//!
//! Design Notes in spec.md §9 call for replacing the source's
//! `IlInjector -> IlBuilder -> BytecodeBuilder` inheritance chain with one
//! tagged record type. [`BuilderCore`] is that record: every builder, plain
//! or bytecode-flavored or the method root, is one arena slot here, indexed
//! by [`BuilderId`].

use crate::ir::BlockId;
use crate::vm_state::VmStateHandle;
use jitbuilder_entity::{entity_impl, PrimaryMap};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuilderId(u32);
entity_impl!(BuilderId);

#[derive(Debug, Clone, Copy)]
pub enum SequenceEntry {
    Block(BlockId),
    Nested(BuilderId),
}

/// Per-builder state specific to bytecode-indexed builders (spec.md §4.2).
#[derive(Debug, Default)]
pub struct BytecodeExt {
    pub bc_index: i32,
    pub name: Option<String>,
    pub initial_state: Option<VmStateHandle>,
    pub current_state: Option<VmStateHandle>,
    pub fall_through_builder: Option<BuilderId>,
    pub successor_builders: SmallVec<[BuilderId; 4]>,
}

#[derive(Debug)]
pub enum BuilderKind {
    Plain,
    Bytecode(BytecodeExt),
}

/// One arena slot: a scoped, ordered sequence of entries plus the flags
/// from spec.md §3's IlBuilder invariants (`partOfSequence`, `comesBack`,
/// cached `_count`, one-shot `_connectedTrees`).
#[derive(Debug)]
pub struct BuilderCore {
    pub sequence: Vec<SequenceEntry>,
    pub entry_block: BlockId,
    pub exit_block: BlockId,
    pub part_of_sequence: bool,
    pub comes_back: bool,
    pub count: Option<u32>,
    pub connected_trees: bool,
    pub kind: BuilderKind,
    pub is_method_root: bool,
}

impl BuilderCore {
    pub fn new_plain(entry_block: BlockId, exit_block: BlockId, is_method_root: bool) -> Self {
        BuilderCore {
            sequence: Vec::new(),
            entry_block,
            exit_block,
            part_of_sequence: is_method_root,
            comes_back: true,
            count: None,
            connected_trees: false,
            kind: BuilderKind::Plain,
            is_method_root,
        }
    }

    pub fn new_bytecode(entry_block: BlockId, exit_block: BlockId, bc_index: i32, name: Option<String>) -> Self {
        BuilderCore {
            sequence: Vec::new(),
            entry_block,
            exit_block,
            part_of_sequence: false,
            comes_back: true,
            count: None,
            connected_trees: false,
            kind: BuilderKind::Bytecode(BytecodeExt {
                bc_index,
                name,
                initial_state: None,
                current_state: None,
                fall_through_builder: None,
                successor_builders: SmallVec::new(),
            }),
            is_method_root: false,
        }
    }

    pub fn bytecode(&self) -> Option<&BytecodeExt> {
        match &self.kind {
            BuilderKind::Bytecode(ext) => Some(ext),
            BuilderKind::Plain => None,
        }
    }

    pub fn bytecode_mut(&mut self) -> Option<&mut BytecodeExt> {
        match &mut self.kind {
            BuilderKind::Bytecode(ext) => Some(ext),
            BuilderKind::Plain => None,
        }
    }
}

pub type BuilderArena = PrimaryMap<BuilderId, BuilderCore>;
