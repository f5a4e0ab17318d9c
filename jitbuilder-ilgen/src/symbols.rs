//! The method-scoped symbol table (spec.md §3 "MethodBuilder" /
//! §4.3 "Symbol protocol"): locals, parameters, memory-pinned slots, and the
//! callable-function table.

use jitbuilder_types::{PrimitiveType, TypeId};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub name: String,
    pub file: String,
    pub line: String,
    /// Out-of-scope native code generation means this is just an opaque
    /// address the host attaches meaning to (spec.md SPEC_FULL §C.2).
    pub entry_point: usize,
    pub return_type: PrimitiveType,
    pub param_types: Vec<PrimitiveType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Parameter(u32),
    Local,
    Array,
    Memory,
}

#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub slot: u32,
    pub ty: PrimitiveType,
    pub kind: SlotKind,
}

#[derive(Debug, Clone)]
pub struct MemoryLocation {
    pub ty: PrimitiveType,
    pub address: usize,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    pub(crate) slots: HashMap<String, SlotInfo>,
    pub(crate) slot_names_by_index: HashMap<u32, String>,
    pub(crate) next_slot: u32,
    pub(crate) parameters: Vec<(String, PrimitiveType)>,
    pub(crate) memory_locations: HashMap<String, MemoryLocation>,
    pub(crate) functions: HashMap<String, FunctionDescriptor>,
    pub(crate) struct_types: HashMap<String, TypeId>,
}

impl SymbolTable {
    pub fn is_array(&self, name: &str) -> bool {
        matches!(self.slots.get(name), Some(info) if info.kind == SlotKind::Array)
    }

    pub fn lookup(&self, name: &str) -> Option<&SlotInfo> {
        self.slots.get(name)
    }

    pub fn symbol_name(&self, slot: u32) -> Option<&str> {
        self.slot_names_by_index.get(&slot).map(|s| s.as_str())
    }
}
