//! `MethodBuilder`: the single owner of the builder arena, CFG, VM-state
//! arena, and symbol tables (spec.md §3 "MethodBuilder", §5 "Shared
//! resources"). Every `IlBuilder`/`BytecodeBuilder` handle is a thin
//! `(&mut MethodBuilder, BuilderId)` pair (`il_builder.rs`,
//! `bytecode_builder.rs`); this module holds the actual logic they delegate
//! to, plus the worklist-driven flattening protocol (spec.md §4.4, §9
//! "Lazy, one-shot flattening").

use crate::builder::{BuilderArena, BuilderCore, BuilderId, SequenceEntry};
use crate::error::BuildError;
use crate::il_builder::IlBuilder;
use crate::ir::{BlockId, Cfg, Op, Stmt, Terminator, Value};
use crate::symbols::{FunctionDescriptor, MemoryLocation, SlotInfo, SlotKind, SymbolTable};
use crate::vm_state::{VirtualMachineState, VmStateArena, VmStateHandle};
use jitbuilder_types::{PrimitiveType, TypeDictionary, TypeId};
use log::{debug, trace};
use std::collections::{BTreeSet, HashSet, VecDeque};

pub type RequestFunctionHook = Box<dyn FnMut(&str) -> Option<FunctionDescriptor>>;

/// The method under construction: arenas for builders, blocks/values, VM
/// states, and the symbol table, plus the worklists that drive lazy
/// flattening and bytecode-worklist-ordered traversal to a fixpoint.
pub struct MethodBuilder {
    pub(crate) types: TypeDictionary,
    pub(crate) arena: BuilderArena,
    pub(crate) cfg: Cfg,
    pub(crate) vm_states: VmStateArena,
    pub(crate) symbols: SymbolTable,
    pub(crate) root: BuilderId,
    pub(crate) may_have_loops: bool,
    pub(crate) all_locals_defined: bool,
    supports_atomic_add: bool,
    has_tm_evaluator: bool,
    supports_tm: bool,
    request_function: Option<RequestFunctionHook>,
    name: String,
    file: String,
    line: String,
    return_type: PrimitiveType,

    block_count_worklist: VecDeque<BuilderId>,
    tree_connect_worklist: VecDeque<BuilderId>,
    bytecode_ever_queued: HashSet<i32>,
    bytecode_pending: BTreeSet<i32>,
    bytecode_by_index: std::collections::HashMap<i32, BuilderId>,
}

impl MethodBuilder {
    pub fn new(name: impl Into<String>, file: impl Into<String>, line: impl Into<String>, types: TypeDictionary) -> Self {
        let mut cfg = Cfg::new();
        let entry = cfg.new_block();
        let exit = cfg.new_block();
        let mut arena = BuilderArena::new();
        let root = arena.push(BuilderCore::new_plain(entry, exit, true));

        let name = name.into();
        let file = file.into();
        let line = line.into();

        let mut symbols = SymbolTable::default();
        symbols.functions.insert(
            name.clone(),
            FunctionDescriptor {
                name: name.clone(),
                file: file.clone(),
                line: line.clone(),
                entry_point: 0,
                return_type: PrimitiveType::NoType,
                param_types: Vec::new(),
            },
        );

        MethodBuilder {
            types,
            arena,
            cfg,
            vm_states: VmStateArena::new(),
            symbols,
            root,
            may_have_loops: false,
            all_locals_defined: false,
            supports_atomic_add: true,
            has_tm_evaluator: true,
            supports_tm: true,
            request_function: None,
            name,
            file,
            line,
            return_type: PrimitiveType::NoType,
            block_count_worklist: VecDeque::new(),
            tree_connect_worklist: VecDeque::new(),
            bytecode_ever_queued: HashSet::new(),
            bytecode_pending: BTreeSet::new(),
            bytecode_by_index: std::collections::HashMap::new(),
        }
    }

    pub fn root(&self) -> BuilderId {
        self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn return_type(&self) -> PrimitiveType {
        self.return_type
    }

    /// Sets the method's declared return type (`DefineReturnType` in the
    /// statement catalog, spec.md §6) and keeps the method's own
    /// self-callable entry in the function table (used for recursive
    /// `Call`s, spec.md Scenario 3) in sync.
    pub fn define_return_type(&mut self, ty: PrimitiveType) {
        self.return_type = ty;
        self.refresh_self_function_descriptor();
    }

    /// Keeps the function-table entry the method registered for itself at
    /// construction time up to date as its return type and parameter list
    /// are declared, so a recursive `Call(self_name, ...)` type-checks
    /// correctly instead of always seeing the placeholder `NoType`/no-args
    /// signature from `new`.
    fn refresh_self_function_descriptor(&mut self) {
        let return_type = self.return_type;
        let param_types = self.symbols.parameters.iter().map(|(_, ty)| *ty).collect();
        if let Some(desc) = self.symbols.functions.get_mut(&self.name) {
            desc.return_type = return_type;
            desc.param_types = param_types;
        }
    }

    pub fn types(&self) -> &TypeDictionary {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeDictionary {
        &mut self.types
    }

    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    pub fn builder_sequence(&self, b: BuilderId) -> &[SequenceEntry] {
        &self.arena[b].sequence
    }

    /// The block a builder starts at, i.e. the jump target any `Goto`/
    /// `IfCmp`/`Switch`/`Transaction` terminator into it actually names
    /// (recorder/lib.rs walks this in reverse to turn a terminator's raw
    /// `BlockId` back into the `BuilderId` it belongs to).
    pub fn builder_entry_block(&self, b: BuilderId) -> BlockId {
        self.arena[b].entry_block
    }

    /// Every builder allocated so far, in creation order. Includes orphans
    /// never spliced into any sequence (e.g. a `CheckedArith` exception
    /// handler reachable only via a CFG edge), which a structural transcript
    /// walk would otherwise never visit.
    pub fn builder_ids(&self) -> impl Iterator<Item = BuilderId> + '_ {
        self.arena.keys()
    }

    pub fn local_name_of(&self, slot: u32) -> Option<&str> {
        self.symbols.symbol_name(slot)
    }

    /// Every parameter in declaration order (spec.md §4.3 "Symbol
    /// protocol"); the transcript's constructor phase emits one
    /// `DefineParameter` token per entry, in this order.
    pub fn parameters(&self) -> &[(String, PrimitiveType)] {
        &self.symbols.parameters
    }

    /// Every plain local in slot-declaration order, whether declared
    /// explicitly via [`Self::define_local`] or implicitly by the first
    /// [`Self::store`] of an undeclared name. Excludes parameters, arrays,
    /// and memory-pinned slots, which are declared through their own
    /// constructs rather than `DefineLocal`.
    pub fn locals(&self) -> impl Iterator<Item = (&str, PrimitiveType)> + '_ {
        (0..self.symbols.next_slot).filter_map(move |slot| {
            let name = self.symbols.slot_names_by_index.get(&slot)?;
            let info = self.symbols.slots.get(name)?;
            (info.kind == SlotKind::Local).then(|| (name.as_str(), info.ty))
        })
    }

    pub fn set_request_function_hook(&mut self, hook: RequestFunctionHook) {
        self.request_function = Some(hook);
    }

    pub fn define_function(&mut self, desc: FunctionDescriptor) {
        self.symbols.functions.insert(desc.name.clone(), desc);
    }

    pub fn define_memory(&mut self, name: impl Into<String>, ty: PrimitiveType, address: usize) {
        self.symbols.memory_locations.insert(name.into(), MemoryLocation { ty, address });
    }

    pub fn define_struct_type(&mut self, name: impl Into<String>, ty: TypeId) {
        self.symbols.struct_types.insert(name.into(), ty);
    }

    pub fn set_may_have_loops(&mut self, yes: bool) {
        self.may_have_loops = yes;
    }

    /// Reports whether the target code generator supports `AtomicAdd`
    /// (spec.md §4.1 Atomic group: "platform must report atomic-add
    /// support"). Defaults to `true`; a host targeting a platform without
    /// lock-add support should clear this before building any `AtomicAdd`.
    pub fn set_supports_atomic_add(&mut self, yes: bool) {
        self.supports_atomic_add = yes;
    }

    /// Reports whether the target has a `tstart`/`tfinish` evaluator at all.
    /// A platform without one can't express `Transaction` in any form, so
    /// building one is a host-contract error (spec.md §7).
    pub fn set_has_tm_evaluator(&mut self, yes: bool) {
        self.has_tm_evaluator = yes;
    }

    /// Reports whether the target's processor actually supports hardware
    /// transactional memory. Distinct from [`Self::set_has_tm_evaluator`]:
    /// a target can have the evaluator (so `Transaction` typechecks) while
    /// the running processor lacks TM, in which case `Transaction` silently
    /// degrades to an unconditional branch to the persistent-failure builder
    /// (spec.md §4.1).
    pub fn set_supports_tm(&mut self, yes: bool) {
        self.supports_tm = yes;
    }

    /// Heuristic used by optimizer phases downstream (spec.md §3
    /// "BytecodeBuilder": "a successor with a strictly smaller bytecode
    /// index marks the enclosing method as possibly containing loops").
    pub fn may_have_loops(&self) -> bool {
        self.may_have_loops
    }

    // ---- symbol protocol -------------------------------------------------

    fn declare_slot(&mut self, name: &str, ty: PrimitiveType, kind: SlotKind) -> u32 {
        let slot = self.symbols.next_slot;
        self.symbols.next_slot += 1;
        self.symbols.slots.insert(name.to_string(), SlotInfo { slot, ty, kind });
        self.symbols.slot_names_by_index.insert(slot, name.to_string());
        slot
    }

    /// Explicit local declaration. Idempotent if the type matches
    /// (spec.md §4.3 "redeclaring a local with the same type is a no-op").
    pub fn define_local(&mut self, name: &str, ty: PrimitiveType) -> Result<(), BuildError> {
        if let Some(info) = self.symbols.lookup(name) {
            if info.ty != ty {
                return Err(BuildError::InconsistentLocalType {
                    name: name.to_string(),
                    existing: info.ty,
                    requested: ty,
                });
            }
            return Ok(());
        }
        self.declare_slot(name, ty, SlotKind::Local);
        Ok(())
    }

    pub fn define_array(&mut self, name: &str, elem_ty: PrimitiveType) -> Result<(), BuildError> {
        if self.symbols.lookup(name).is_some() {
            return Ok(());
        }
        self.declare_slot(name, elem_ty, SlotKind::Array);
        Ok(())
    }

    /// Parameters are numbered in declaration order, and primed into their
    /// local slot once [`Self::all_locals_have_been_defined`] is called, so
    /// `Load(name)` behaves uniformly for parameters and locals.
    pub fn define_parameter(&mut self, name: &str, ty: PrimitiveType) {
        let index = self.symbols.parameters.len() as u32;
        self.symbols.parameters.push((name.to_string(), ty));
        self.declare_slot(name, ty, SlotKind::Parameter(index));
    }

    /// Marks the end of parameter/local declaration and materializes the
    /// parameter-priming stores into the root builder's entry block.
    pub fn all_locals_have_been_defined(&mut self) -> Result<(), BuildError> {
        if self.all_locals_defined {
            return Ok(());
        }
        self.all_locals_defined = true;
        self.refresh_self_function_descriptor();
        let params = self.symbols.parameters.clone();
        for (index, (name, ty)) in params.into_iter().enumerate() {
            let value = self.push_op(self.root, ty, Op::Param(index as u32));
            self.store(self.root, &name, value)?;
        }
        Ok(())
    }

    // ---- block/value plumbing --------------------------------------------

    fn ensure_open_block(&mut self, b: BuilderId) -> BlockId {
        if let Some(block) = self.open_block_of(b) {
            return block;
        }
        let block = if self.arena[b].sequence.is_empty() {
            self.arena[b].entry_block
        } else {
            self.cfg.new_block()
        };
        self.arena[b].sequence.push(SequenceEntry::Block(block));
        self.set_open_block(b, block);
        block
    }

    fn open_block_of(&self, b: BuilderId) -> Option<BlockId> {
        match self.arena[b].sequence.last() {
            Some(SequenceEntry::Block(block)) if !self.is_terminated(*block) => Some(*block),
            _ => None,
        }
    }

    fn set_open_block(&mut self, _b: BuilderId, _block: BlockId) {
        // Openness is derived from the sequence tail + terminator state
        // (`open_block_of`), so there is nothing extra to record here; kept
        // as a named seam in case a future host needs an explicit cursor.
    }

    fn is_terminated(&self, block: BlockId) -> bool {
        !matches!(self.cfg.blocks[block].terminator, Terminator::Unset)
    }

    fn push_op(&mut self, b: BuilderId, ty: PrimitiveType, op: Op) -> Value {
        let block = self.ensure_open_block(b);
        let value = self.cfg.new_value(ty);
        self.cfg.blocks[block].stmts.push(Stmt::Eval { result: value.id(), op });
        value
    }

    fn push_stmt(&mut self, b: BuilderId, stmt: Stmt) {
        let block = self.ensure_open_block(b);
        self.cfg.blocks[block].stmts.push(stmt);
    }

    fn set_terminator(&mut self, b: BuilderId, term: Terminator) -> BlockId {
        let block = self.ensure_open_block(b);
        self.cfg.blocks[block].terminator = term;
        block
    }

    // ---- orphaning / appending (spec.md §4.1 "Scoping & appending") ------

    pub fn orphan_builder(&mut self) -> BuilderId {
        let entry = self.cfg.new_block();
        let exit = self.cfg.new_block();
        self.arena.push(BuilderCore::new_plain(entry, exit, false))
    }

    pub fn orphan_bytecode_builder(&mut self, bc_index: i32, name: Option<String>) -> BuilderId {
        let entry = self.cfg.new_block();
        let exit = self.cfg.new_block();
        let id = self.arena.push(BuilderCore::new_bytecode(entry, exit, bc_index, name));
        self.bytecode_by_index.insert(bc_index, id);
        self.enqueue_bytecode_index(bc_index);
        id
    }

    pub fn bytecode_builder_at(&self, bc_index: i32) -> Option<BuilderId> {
        self.bytecode_by_index.get(&bc_index).copied()
    }

    /// Splices `child` into `parent`'s sequence, wires the unconditional
    /// fall-in edge, and opens a fresh continuation block in `parent` for
    /// any code appended afterward — which is unreachable unless `child`
    /// comes back, matching spec.md §4.1's "expected, non-error condition".
    pub fn append_builder(&mut self, parent: BuilderId, child: BuilderId) -> Result<(), BuildError> {
        if self.arena[child].part_of_sequence {
            return Err(BuildError::DuplicateAppend(child));
        }
        trace!("append_builder: {child} into {parent}");
        self.arena[child].part_of_sequence = true;
        let cur = self.ensure_open_block(parent);
        let child_entry = self.arena[child].entry_block;
        self.cfg.blocks[cur].terminator = Terminator::Goto(child_entry);
        self.cfg.add_edge(cur, child_entry);
        self.arena[parent].sequence.push(SequenceEntry::Nested(child));

        let cont = self.cfg.new_block();
        self.arena[parent].sequence.push(SequenceEntry::Block(cont));
        if self.arena[child].comes_back {
            let child_exit = self.arena[child].exit_block;
            self.cfg.add_edge(child_exit, cont);
        }
        Ok(())
    }

    // ---- constants ---------------------------------------------------------

    pub fn const_op(&mut self, b: BuilderId, ty: PrimitiveType, op: Op) -> Value {
        self.push_op(b, ty, op)
    }

    // ---- locals --------------------------------------------------------

    pub fn load(&mut self, b: BuilderId, name: &str) -> Result<Value, BuildError> {
        let info = self
            .symbols
            .lookup(name)
            .cloned()
            .ok_or_else(|| BuildError::UnknownSymbol { builder: b, name: name.to_string() })?;
        Ok(self.push_op(b, info.ty, Op::LoadLocal(info.slot)))
    }

    pub fn store(&mut self, b: BuilderId, name: &str, value: Value) -> Result<(), BuildError> {
        let slot = match self.symbols.lookup(name) {
            Some(info) if info.ty != value.ty() => {
                return Err(BuildError::InconsistentLocalType {
                    name: name.to_string(),
                    existing: info.ty,
                    requested: value.ty(),
                })
            }
            Some(info) => info.slot,
            None => self.declare_slot(name, value.ty(), SlotKind::Local),
        };
        self.push_stmt(b, Stmt::StoreLocal { slot, value: value.id() });
        Ok(())
    }

    pub fn store_over(&mut self, b: BuilderId, dest: Value, value: Value) -> Result<(), BuildError> {
        if dest.ty() != value.ty() {
            return Err(BuildError::TypeMismatch { builder: b, op: "StoreOver", lhs: dest.ty(), rhs: value.ty() });
        }
        self.push_stmt(b, Stmt::StoreOver { dest: dest.id(), value: value.id() });
        Ok(())
    }

    // ---- arithmetic / compare / convert ---------------------------------

    fn common_type(&self, op: &'static str, b: BuilderId, lhs: Value, rhs: Value) -> Result<PrimitiveType, BuildError> {
        if lhs.ty() == rhs.ty() {
            Ok(lhs.ty())
        } else {
            Err(BuildError::TypeMismatch { builder: b, op, lhs: lhs.ty(), rhs: rhs.ty() })
        }
    }

    pub fn arith(&mut self, b: BuilderId, op: crate::ir::ArithOp, name: &'static str, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        use crate::ir::ArithOp::*;
        let ty = if matches!(op, Add | Sub) && lhs.ty() == PrimitiveType::Address && rhs.ty().is_integer() {
            PrimitiveType::Address
        } else {
            self.common_type(name, b, lhs, rhs)?
        };
        if !ty.is_integer() && !ty.is_floating_point() && ty != PrimitiveType::Address {
            return Err(BuildError::UnsupportedOperandType { builder: b, op: name, ty });
        }
        Ok(self.push_op(b, ty, Op::Arith(op, lhs.id(), rhs.id())))
    }

    pub fn checked_arith(&mut self, b: BuilderId, op: crate::ir::ArithOp, name: &'static str, lhs: Value, rhs: Value, handler: BuilderId, unsigned: bool) -> Result<Value, BuildError> {
        let ty = self.common_type(name, b, lhs, rhs)?;
        if !ty.is_integer() {
            return Err(BuildError::UnsupportedOperandType { builder: b, op: name, ty });
        }
        let value = self.push_op(b, ty, Op::CheckedArith(op, lhs.id(), rhs.id(), unsigned));
        let block = self.open_block_of(b).expect("checked op always opens a block");
        let handler_entry = self.arena[handler].entry_block;
        self.cfg.add_edge(block, handler_entry);
        Ok(value)
    }

    pub fn compare(&mut self, b: BuilderId, op: crate::ir::CompareOp, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.common_type("Compare", b, lhs, rhs)?;
        Ok(self.push_op(b, PrimitiveType::Int32, Op::Compare(op, lhs.id(), rhs.id())))
    }

    pub fn convert_to(&mut self, b: BuilderId, to: PrimitiveType, value: Value, unsigned: bool) -> Result<Value, BuildError> {
        if value.ty() == to {
            return Ok(value);
        }
        if value.ty().is_vector() != to.is_vector() {
            return Err(BuildError::IllegalConversion { from: value.ty(), to });
        }
        Ok(self.push_op(b, to, Op::Convert { value: value.id(), to, unsigned }))
    }

    // ---- memory ----------------------------------------------------------

    pub fn load_at(&mut self, b: BuilderId, ty: PrimitiveType, address: Value) -> Result<Value, BuildError> {
        if address.ty() != PrimitiveType::Address {
            return Err(BuildError::UnsupportedOperandType { builder: b, op: "LoadAt", ty: address.ty() });
        }
        Ok(self.push_op(b, ty, Op::LoadAt { address: address.id(), ty }))
    }

    pub fn store_at(&mut self, b: BuilderId, address: Value, value: Value) -> Result<(), BuildError> {
        if address.ty() != PrimitiveType::Address {
            return Err(BuildError::UnsupportedOperandType { builder: b, op: "StoreAt", ty: address.ty() });
        }
        self.push_stmt(b, Stmt::StoreAt { address: address.id(), value: value.id() });
        Ok(())
    }

    /// `IlBuilder::VectorLoad` (SPEC_FULL.md §C.1): same shape as `LoadAt`,
    /// but `ty` must be one of the vector primitives and the lane count is
    /// carried explicitly rather than implied by a fixed vector width.
    pub fn vector_load_at(&mut self, b: BuilderId, ty: PrimitiveType, address: Value, lanes: u32) -> Result<Value, BuildError> {
        if address.ty() != PrimitiveType::Address {
            return Err(BuildError::UnsupportedOperandType { builder: b, op: "VectorLoad", ty: address.ty() });
        }
        if !ty.is_vector() {
            return Err(BuildError::UnsupportedOperandType { builder: b, op: "VectorLoad", ty });
        }
        Ok(self.push_op(b, ty, Op::VectorLoadAt { address: address.id(), ty, lanes }))
    }

    /// `IlBuilder::VectorStore` (SPEC_FULL.md §C.1).
    pub fn vector_store_at(&mut self, b: BuilderId, address: Value, value: Value, lanes: u32) -> Result<(), BuildError> {
        if address.ty() != PrimitiveType::Address {
            return Err(BuildError::UnsupportedOperandType { builder: b, op: "VectorStore", ty: address.ty() });
        }
        if !value.ty().is_vector() {
            return Err(BuildError::UnsupportedOperandType { builder: b, op: "VectorStore", ty: value.ty() });
        }
        self.push_stmt(b, Stmt::VectorStoreAt { address: address.id(), value: value.id(), lanes });
        Ok(())
    }

    /// Chooses `aiadd`/`imul` on a 32-bit target and `aladd`/`lmul` on a
    /// 64-bit one by recording the dictionary's word type on the op itself,
    /// matching `TR::IlBuilder::IndexAt`'s `Int32`/`Int64` scale-multiply
    /// split in `genIndexAt`.
    pub fn index_at(&mut self, b: BuilderId, elem_ty: PrimitiveType, base: Value, index: Value) -> Result<Value, BuildError> {
        if base.ty() != PrimitiveType::Address {
            return Err(BuildError::UnsupportedOperandType { builder: b, op: "IndexAt", ty: base.ty() });
        }
        if !index.ty().is_integer() {
            return Err(BuildError::UnsupportedOperandType { builder: b, op: "IndexAt", ty: index.ty() });
        }
        let word_ty = self.types.kind_of(self.types.word_type());
        Ok(self.push_op(b, PrimitiveType::Address, Op::IndexAt { base: base.id(), index: index.id(), elem_ty, word_ty }))
    }

    pub fn load_indirect(&mut self, b: BuilderId, struct_ty: TypeId, field: &str, object: Value) -> Result<Value, BuildError> {
        let field_type_id = self.types.field_type(struct_ty, field)?;
        let field_ty = self.types.kind_of(field_type_id);
        Ok(self.push_op(b, field_ty, Op::LoadIndirect { struct_ty, field: field.to_string(), object: object.id() }))
    }

    pub fn store_indirect(&mut self, b: BuilderId, struct_ty: TypeId, field: &str, object: Value, value: Value) -> Result<(), BuildError> {
        let field_type_id = self.types.field_type(struct_ty, field)?;
        let field_ty = self.types.kind_of(field_type_id);
        if field_ty != value.ty() {
            return Err(BuildError::TypeMismatch { builder: b, op: "StoreIndirect", lhs: field_ty, rhs: value.ty() });
        }
        self.push_stmt(b, Stmt::StoreIndirect { struct_ty, field: field.to_string(), object: object.id(), value: value.id() });
        Ok(())
    }

    pub fn create_local_array(&mut self, b: BuilderId, count: u32, elem_ty: PrimitiveType) -> Value {
        self.push_op(b, PrimitiveType::Address, Op::CreateLocalArray { count, elem_ty })
    }

    pub fn create_local_struct(&mut self, b: BuilderId, struct_ty: TypeId) -> Value {
        self.push_op(b, PrimitiveType::Address, Op::CreateLocalStruct { struct_ty })
    }

    // ---- calls -------------------------------------------------------------

    pub fn call(&mut self, b: BuilderId, name: &str, args: &[Value]) -> Result<Value, BuildError> {
        if !self.symbols.functions.contains_key(name) {
            let resolved = self.request_function.as_mut().and_then(|hook| hook(name));
            match resolved {
                Some(desc) => {
                    self.symbols.functions.insert(name.to_string(), desc);
                }
                None => return Err(BuildError::UnresolvedFunction(name.to_string())),
            }
        }
        let desc = self.symbols.functions.get(name).expect("just resolved or present");
        if desc.param_types.len() != args.len() {
            return Err(BuildError::ArityMismatch { name: name.to_string(), expected: desc.param_types.len(), actual: args.len() });
        }
        for (expected, actual) in desc.param_types.iter().zip(args) {
            if *expected != actual.ty() {
                return Err(BuildError::TypeMismatch { builder: b, op: "Call", lhs: *expected, rhs: actual.ty() });
            }
        }
        let return_type = desc.return_type;
        let ids = args.iter().map(|v| v.id()).collect();
        Ok(self.push_op(b, return_type, Op::Call { name: name.to_string(), args: ids }))
    }

    pub fn computed_call(&mut self, b: BuilderId, target: Value, return_type: PrimitiveType, args: &[Value]) -> Result<Value, BuildError> {
        if target.ty() != PrimitiveType::Address {
            return Err(BuildError::UnsupportedOperandType { builder: b, op: "ComputedCall", ty: target.ty() });
        }
        let ids = args.iter().map(|v| v.id()).collect();
        Ok(self.push_op(b, return_type, Op::ComputedCall { target: target.id(), args: ids }))
    }

    // ---- atomics / transactions -------------------------------------------

    pub fn atomic_add(&mut self, b: BuilderId, address: Value, delta: Value, offset: Option<Value>) -> Result<Value, BuildError> {
        if !self.supports_atomic_add {
            return Err(BuildError::AtomicsUnsupported);
        }
        if address.ty() != PrimitiveType::Address {
            return Err(BuildError::UnsupportedOperandType { builder: b, op: "AtomicAdd", ty: address.ty() });
        }
        let ty = delta.ty();
        if ty != PrimitiveType::Int32 && ty != PrimitiveType::Int64 {
            return Err(BuildError::UnsupportedOperandType { builder: b, op: "AtomicAdd", ty });
        }
        Ok(self.push_op(b, ty, Op::AtomicAdd { address: address.id(), delta: delta.id(), offset: offset.map(Value::id) }))
    }

    pub fn transaction_abort(&mut self, b: BuilderId) {
        self.push_stmt(b, Stmt::TransactionAbort);
    }

    /// `IlBuilder::Transaction(persistFail, transientFail, body)` (spec.md
    /// §4.1 Transaction group). Requires a target with a TM evaluator at all
    /// (a host-contract error otherwise, spec.md §7); if the evaluator
    /// exists but the running processor lacks TM support, silently degrades
    /// to an unconditional branch into `persist_fail` while still sequencing
    /// (typechecking) `body` and `transient_fail` as dead successors.
    pub fn transaction(&mut self, b: BuilderId, persist_fail: BuilderId, transient_fail: BuilderId, body: BuilderId) -> Result<(), BuildError> {
        if !self.has_tm_evaluator {
            return Err(BuildError::TransactionsUnsupported);
        }
        for builder in [persist_fail, transient_fail, body] {
            if self.arena[builder].part_of_sequence {
                return Err(BuildError::DuplicateAppend(builder));
            }
        }
        self.arena[persist_fail].part_of_sequence = true;
        self.arena[transient_fail].part_of_sequence = true;
        self.arena[body].part_of_sequence = true;

        let cur = self.ensure_open_block(b);
        let persist_entry = self.arena[persist_fail].entry_block;
        let transient_entry = self.arena[transient_fail].entry_block;
        let body_entry = self.arena[body].entry_block;
        let cont = self.cfg.new_block();

        if !self.supports_tm {
            debug!("transaction: platform lacks TM support, degrading to an unconditional branch into the persistent-failure builder");
            self.cfg.blocks[cur].terminator = Terminator::Goto(persist_entry);
            self.cfg.add_edge(cur, persist_entry);
            self.arena[b].sequence.push(SequenceEntry::Nested(body));
            self.arena[b].sequence.push(SequenceEntry::Nested(transient_fail));
            self.arena[b].sequence.push(SequenceEntry::Nested(persist_fail));
            self.arena[b].sequence.push(SequenceEntry::Block(cont));
            if self.arena[persist_fail].comes_back {
                let exit = self.arena[persist_fail].exit_block;
                self.cfg.add_edge(exit, cont);
            }
            return Ok(());
        }

        trace!("transaction: builder {b} branches to persist={persist_fail}, transient={transient_fail}, body={body}");
        self.cfg.blocks[cur].terminator = Terminator::Transaction { persist: persist_entry, transient: transient_entry, body: body_entry };
        self.cfg.add_edge(cur, persist_entry);
        self.cfg.add_edge(cur, transient_entry);
        self.cfg.add_edge(cur, body_entry);
        self.arena[b].sequence.push(SequenceEntry::Nested(transient_fail));
        self.arena[b].sequence.push(SequenceEntry::Nested(persist_fail));
        self.arena[b].sequence.push(SequenceEntry::Nested(body));
        self.arena[b].sequence.push(SequenceEntry::Block(cont));
        if self.arena[transient_fail].comes_back {
            let exit = self.arena[transient_fail].exit_block;
            self.cfg.add_edge(exit, cont);
        }
        if self.arena[persist_fail].comes_back {
            let exit = self.arena[persist_fail].exit_block;
            self.cfg.add_edge(exit, cont);
        }
        Ok(())
    }

    // ---- control flow ------------------------------------------------------

    pub fn goto(&mut self, b: BuilderId, target: BuilderId) -> Result<(), BuildError> {
        let cur = self.ensure_open_block(b);
        let target_entry = self.arena[target].entry_block;
        self.cfg.blocks[cur].terminator = Terminator::Goto(target_entry);
        self.cfg.add_edge(cur, target_entry);
        self.arena[b].comes_back = false;
        Ok(())
    }

    pub fn return_void(&mut self, b: BuilderId) {
        self.set_terminator(b, Terminator::Return(None));
        self.arena[b].comes_back = false;
    }

    pub fn return_value(&mut self, b: BuilderId, value: Value) {
        self.set_terminator(b, Terminator::Return(Some(value.id())));
        self.arena[b].comes_back = false;
    }

    /// Raw conditional branch to an already-existing builder, used for loop
    /// back-edges (spec.md §4.1 IfCmp* group) — unlike `IfThen`, it never
    /// splices `target` into the current sequence.
    pub fn if_cmp(&mut self, b: BuilderId, op: crate::ir::CompareOp, lhs: Value, rhs: Value, target: BuilderId) -> Result<(), BuildError> {
        self.common_type("IfCmp", b, lhs, rhs)?;
        let cur = self.ensure_open_block(b);
        let target_entry = self.arena[target].entry_block;
        let cont = self.cfg.new_block();
        self.cfg.blocks[cur].terminator = Terminator::IfCmp { op, lhs: lhs.id(), rhs: rhs.id(), then_target: target_entry, else_target: cont };
        self.cfg.add_edge(cur, target_entry);
        self.cfg.add_edge(cur, cont);
        self.arena[b].sequence.push(SequenceEntry::Block(cont));
        Ok(())
    }

    /// `IfThen(cond, then)`: splices `then` into the sequence as the taken
    /// branch; the untaken path falls through to a fresh continuation block
    /// that also becomes `then`'s merge point if it comes back.
    pub fn if_then(&mut self, b: BuilderId, cond: Value, then_builder: BuilderId) -> Result<(), BuildError> {
        if self.arena[then_builder].part_of_sequence {
            return Err(BuildError::DuplicateAppend(then_builder));
        }
        self.arena[then_builder].part_of_sequence = true;
        let cur = self.ensure_open_block(b);
        let then_entry = self.arena[then_builder].entry_block;
        let cont = self.cfg.new_block();
        let zero = self.cfg.new_value(cond.ty());
        self.cfg.blocks[cur].stmts.push(Stmt::Eval { result: zero.id(), op: Op::Const(crate::ir::Literal::Int(0)) });
        self.cfg.blocks[cur].terminator = Terminator::IfCmp { op: crate::ir::CompareOp::Ne, lhs: cond.id(), rhs: zero.id(), then_target: then_entry, else_target: cont };
        self.cfg.add_edge(cur, then_entry);
        self.cfg.add_edge(cur, cont);
        self.arena[b].sequence.push(SequenceEntry::Nested(then_builder));
        self.arena[b].sequence.push(SequenceEntry::Block(cont));
        if self.arena[then_builder].comes_back {
            let then_exit = self.arena[then_builder].exit_block;
            self.cfg.add_edge(then_exit, cont);
        }
        Ok(())
    }

    pub fn if_then_else(&mut self, b: BuilderId, cond: Value, then_builder: BuilderId, else_builder: BuilderId) -> Result<(), BuildError> {
        if self.arena[then_builder].part_of_sequence {
            return Err(BuildError::DuplicateAppend(then_builder));
        }
        if self.arena[else_builder].part_of_sequence {
            return Err(BuildError::DuplicateAppend(else_builder));
        }
        self.arena[then_builder].part_of_sequence = true;
        self.arena[else_builder].part_of_sequence = true;
        let cur = self.ensure_open_block(b);
        let then_entry = self.arena[then_builder].entry_block;
        let else_entry = self.arena[else_builder].entry_block;
        let cont = self.cfg.new_block();
        let zero = self.cfg.new_value(cond.ty());
        self.cfg.blocks[cur].stmts.push(Stmt::Eval { result: zero.id(), op: Op::Const(crate::ir::Literal::Int(0)) });
        self.cfg.blocks[cur].terminator = Terminator::IfCmp { op: crate::ir::CompareOp::Ne, lhs: cond.id(), rhs: zero.id(), then_target: then_entry, else_target: else_entry };
        self.cfg.add_edge(cur, then_entry);
        self.cfg.add_edge(cur, else_entry);
        self.arena[b].sequence.push(SequenceEntry::Nested(then_builder));
        self.arena[b].sequence.push(SequenceEntry::Nested(else_builder));
        self.arena[b].sequence.push(SequenceEntry::Block(cont));
        if self.arena[then_builder].comes_back {
            let exit = self.arena[then_builder].exit_block;
            self.cfg.add_edge(exit, cont);
        }
        if self.arena[else_builder].comes_back {
            let exit = self.arena[else_builder].exit_block;
            self.cfg.add_edge(exit, cont);
        }
        Ok(())
    }

    /// Short-circuit conjunction: any false condition jumps straight to
    /// `else_builder`; falling off the end means every condition held.
    pub fn if_and(&mut self, b: BuilderId, conds: &[Value], then_builder: BuilderId, else_builder: BuilderId) -> Result<(), BuildError> {
        for &cond in conds {
            self.if_cmp_condition_false_goes(b, cond, else_builder)?;
        }
        self.goto(b, then_builder)
    }

    /// Short-circuit disjunction: any true condition jumps straight to
    /// `then_builder`; falling off the end means every condition failed.
    pub fn if_or(&mut self, b: BuilderId, conds: &[Value], then_builder: BuilderId, else_builder: BuilderId) -> Result<(), BuildError> {
        for &cond in conds {
            self.if_cmp_condition_true_goes(b, cond, then_builder)?;
        }
        self.goto(b, else_builder)
    }

    fn if_cmp_condition_false_goes(&mut self, b: BuilderId, cond: Value, target: BuilderId) -> Result<(), BuildError> {
        let zero = self.push_op(b, cond.ty(), Op::Const(crate::ir::Literal::Int(0)));
        self.if_cmp(b, crate::ir::CompareOp::Eq, cond, zero, target)
    }

    fn if_cmp_condition_true_goes(&mut self, b: BuilderId, cond: Value, target: BuilderId) -> Result<(), BuildError> {
        let zero = self.push_op(b, cond.ty(), Op::Const(crate::ir::Literal::Int(0)));
        self.if_cmp(b, crate::ir::CompareOp::Ne, cond, zero, target)
    }

    pub fn switch(&mut self, b: BuilderId, selector: Value, cases: &[(i32, BuilderId)], default: BuilderId) -> Result<(), BuildError> {
        if selector.ty() != PrimitiveType::Int32 {
            return Err(BuildError::InvalidSwitchSelector(selector.ty()));
        }
        let cur = self.ensure_open_block(b);
        let mut block_cases = smallvec::SmallVec::<[(i32, BlockId); 4]>::new();
        for &(value, case_builder) in cases {
            if self.arena[case_builder].part_of_sequence {
                return Err(BuildError::DuplicateAppend(case_builder));
            }
            self.arena[case_builder].part_of_sequence = true;
            let entry = self.arena[case_builder].entry_block;
            block_cases.push((value, entry));
            self.cfg.add_edge(cur, entry);
            self.arena[b].sequence.push(SequenceEntry::Nested(case_builder));
        }
        if self.arena[default].part_of_sequence {
            return Err(BuildError::DuplicateAppend(default));
        }
        self.arena[default].part_of_sequence = true;
        let default_entry = self.arena[default].entry_block;
        self.cfg.add_edge(cur, default_entry);
        self.arena[b].sequence.push(SequenceEntry::Nested(default));

        self.cfg.blocks[cur].terminator = Terminator::Switch { selector: selector.id(), cases: block_cases, default: default_entry };

        let cont = self.cfg.new_block();
        self.arena[b].sequence.push(SequenceEntry::Block(cont));
        for &(_, case_builder) in cases {
            if self.arena[case_builder].comes_back {
                let exit = self.arena[case_builder].exit_block;
                self.cfg.add_edge(exit, cont);
            }
        }
        if self.arena[default].comes_back {
            let exit = self.arena[default].exit_block;
            self.cfg.add_edge(exit, cont);
        }
        Ok(())
    }

    // ---- structured loops (spec.md §4.1 Control group) --------------------

    pub fn for_loop_up(
        &mut self,
        parent: BuilderId,
        var: &str,
        initial: Value,
        end: Value,
        increment: Value,
        body: impl FnOnce(&mut MethodBuilder, BuilderId) -> Result<(), BuildError>,
    ) -> Result<(), BuildError> {
        self.may_have_loops = true;
        self.store(parent, var, initial)?;
        let cond = self.orphan_builder();
        let body_builder = self.orphan_builder();
        self.append_builder(parent, cond)?;

        let v = self.load(cond, var)?;
        let test = self.compare(cond, crate::ir::CompareOp::Lt, v, end)?;
        self.if_then(cond, test, body_builder)?;

        body(self, body_builder)?;
        let v = self.load(body_builder, var)?;
        let incremented = self.arith(body_builder, crate::ir::ArithOp::Add, "ForLoopIncrement", v, increment)?;
        self.store(body_builder, var, incremented)?;
        self.goto(body_builder, cond)?;
        Ok(())
    }

    pub fn while_do_loop(
        &mut self,
        parent: BuilderId,
        cond_fn: impl FnOnce(&mut MethodBuilder, BuilderId) -> Result<Value, BuildError>,
        body: impl FnOnce(&mut MethodBuilder, BuilderId) -> Result<(), BuildError>,
    ) -> Result<(), BuildError> {
        self.may_have_loops = true;
        let cond = self.orphan_builder();
        let body_builder = self.orphan_builder();
        self.append_builder(parent, cond)?;

        let test = cond_fn(self, cond)?;
        self.if_then(cond, test, body_builder)?;

        body(self, body_builder)?;
        self.goto(body_builder, cond)?;
        Ok(())
    }

    pub fn do_while_loop(
        &mut self,
        parent: BuilderId,
        body: impl FnOnce(&mut MethodBuilder, BuilderId) -> Result<(), BuildError>,
        cond_fn: impl FnOnce(&mut MethodBuilder, BuilderId) -> Result<Value, BuildError>,
    ) -> Result<(), BuildError> {
        self.may_have_loops = true;
        let body_builder = self.orphan_builder();
        self.append_builder(parent, body_builder)?;

        body(self, body_builder)?;
        let test = cond_fn(self, body_builder)?;
        let zero = self.push_op(body_builder, test.ty(), Op::Const(crate::ir::Literal::Int(0)));
        self.if_cmp(body_builder, crate::ir::CompareOp::Ne, test, zero, body_builder)?;
        Ok(())
    }

    // ---- VM state / successor propagation (spec.md §4.2, §4.6) -------------

    pub fn set_initial_vm_state(&mut self, b: BuilderId, state: Box<dyn VirtualMachineState>) {
        let handle = self.vm_states.insert(state);
        let ext = self.arena[b].bytecode_mut().expect("set_initial_vm_state on a non-bytecode builder");
        ext.initial_state = Some(handle);
        ext.current_state = Some(handle);
    }

    pub fn bc_index_of(&self, b: BuilderId) -> Option<i32> {
        self.arena[b].bytecode().map(|e| e.bc_index)
    }

    pub fn vm_state(&self, b: BuilderId) -> Option<&dyn VirtualMachineState> {
        let handle = self.arena[b].bytecode().and_then(|e| e.current_state)?;
        Some(self.vm_states.get(handle))
    }

    pub fn append_exception_handler(&mut self, catch_type: u32) -> BuilderId {
        let handler = self.orphan_builder();
        let entry = self.arena[handler].entry_block;
        self.cfg.blocks[entry].catch_type = Some(catch_type);
        handler
    }

    /// Records `to` as a control-flow successor of the bytecode builder
    /// `from` (fall-through or explicit), propagates `from`'s VM state into
    /// it, and enqueues `to`'s bytecode index for translation. Returns the
    /// builder the host should actually branch to: `to` itself the first
    /// time it is reached, or a freshly spliced synchronization builder that
    /// reconciles state on every subsequent merge (spec.md §4.6).
    pub fn add_successor(&mut self, from: BuilderId, to: BuilderId, is_fall_through: bool) -> Result<BuilderId, BuildError> {
        let current = self.arena[from].bytecode().and_then(|e| e.current_state);
        let actual_target = self.route_vm_state(to, current)?;

        let from_bc_index = self.arena[from].bytecode().map(|e| e.bc_index);
        let to_bc_index = self.arena[to].bytecode().map(|e| e.bc_index);
        if let (Some(from_bci), Some(to_bci)) = (from_bc_index, to_bc_index) {
            if to_bci < from_bci {
                self.may_have_loops = true;
            }
        }
        let ext = self.arena[from].bytecode_mut().expect("add_successor on a non-bytecode builder");
        if is_fall_through {
            ext.fall_through_builder = Some(to);
        } else {
            ext.successor_builders.push(to);
        }
        if let Some(bci) = to_bc_index {
            self.enqueue_bytecode_index(bci);
        }
        Ok(actual_target)
    }

    fn route_vm_state(&mut self, to: BuilderId, current: Option<VmStateHandle>) -> Result<BuilderId, BuildError> {
        let Some(current) = current else { return Ok(to) };
        let existing = self.arena[to].bytecode().and_then(|e| e.initial_state);
        match existing {
            None => {
                let copy = self.vm_states.copy_of(current);
                let ext = self.arena[to].bytecode_mut().expect("route_vm_state on a non-bytecode builder");
                ext.initial_state = Some(copy);
                ext.current_state = Some(copy);
                Ok(to)
            }
            Some(existing) => {
                debug!("route_vm_state: inserting synchronization builder for merge into {to}");
                let incoming = self.vm_states.get(current).copy();
                let target_state = self.vm_states.get(existing).copy();
                let sync = self.orphan_builder();
                {
                    let mut il = IlBuilder::new(self, sync);
                    incoming.merge(target_state.as_ref(), &mut il)?;
                }
                self.goto(sync, to)?;
                Ok(sync)
            }
        }
    }

    // ---- bytecode worklist (spec.md §4.4) ----------------------------------

    pub fn enqueue_bytecode_index(&mut self, bci: i32) {
        if self.bytecode_ever_queued.insert(bci) {
            trace!("enqueue_bytecode_index: {bci}");
            self.bytecode_pending.insert(bci);
        }
    }

    pub fn get_next_bytecode_from_worklist(&mut self) -> Option<i32> {
        let next = *self.bytecode_pending.iter().next()?;
        self.bytecode_pending.remove(&next);
        trace!("get_next_bytecode_from_worklist: popped {next}");
        Some(next)
    }

    pub(crate) fn enqueue_block_count(&mut self, b: BuilderId) {
        if self.arena[b].count.is_none() {
            self.block_count_worklist.push_back(b);
        }
    }

    pub(crate) fn enqueue_tree_connect(&mut self, b: BuilderId) {
        self.tree_connect_worklist.push_back(b);
    }

    // ---- flattening (spec.md §4.4 "flatten", §9 lazy one-shot) -------------

    pub fn count_blocks(&mut self, b: BuilderId) -> u32 {
        if let Some(count) = self.arena[b].count {
            return count;
        }
        self.arena[b].count = Some(0);
        let entries = self.arena[b].sequence.clone();
        let mut count = 0u32;
        for entry in &entries {
            match entry {
                SequenceEntry::Block(_) => count += 1,
                SequenceEntry::Nested(child) => count += self.count_blocks(*child),
            }
        }
        if !self.arena[b].is_method_root {
            count += 1; // exit block
        }
        self.arena[b].count = Some(count);

        if let Some(ext) = self.arena[b].bytecode() {
            let successors: smallvec::SmallVec<[BuilderId; 4]> = ext.successor_builders.clone();
            let fall_through = ext.fall_through_builder;
            if let Some(fb) = fall_through {
                self.enqueue_block_count(fb);
            }
            for s in successors {
                self.enqueue_block_count(s);
            }
        }
        count
    }

    pub fn connect_trees(&mut self, b: BuilderId) -> Result<(), BuildError> {
        if self.arena[b].connected_trees {
            return Ok(());
        }
        self.arena[b].connected_trees = true;
        let entries = self.arena[b].sequence.clone();
        let mut last_block: Option<BlockId> = None;
        for entry in &entries {
            match entry {
                SequenceEntry::Block(block) => last_block = Some(*block),
                SequenceEntry::Nested(child) => {
                    self.connect_trees(*child)?;
                    last_block = Some(self.arena[*child].exit_block);
                }
            }
        }
        if !self.arena[b].is_method_root {
            if self.arena[b].comes_back {
                if let Some(last) = last_block {
                    let exit = self.arena[b].exit_block;
                    self.cfg.add_edge(last, exit);
                }
            }
            let exit = self.arena[b].exit_block;
            self.arena[b].sequence.push(SequenceEntry::Block(exit));
        }

        if let Some(ext) = self.arena[b].bytecode() {
            let fall_through = ext.fall_through_builder;
            let successors: smallvec::SmallVec<[BuilderId; 4]> = ext.successor_builders.clone();
            if let Some(fb) = fall_through {
                self.enqueue_tree_connect(fb);
            }
            for s in successors {
                self.enqueue_tree_connect(s);
            }
        }
        Ok(())
    }

    /// Drives block counting and tree connection to a fixpoint across every
    /// builder reachable from the root, directly or through bytecode
    /// successor/fall-through edges (spec.md §4.4's worklist protocol).
    pub fn finalize(&mut self) -> Result<(), BuildError> {
        debug!("finalize: counting blocks and connecting trees for `{}`", self.name);
        self.count_blocks(self.root);
        while let Some(b) = self.block_count_worklist.pop_front() {
            if self.arena[b].count.is_none() {
                self.count_blocks(b);
            }
        }
        self.connect_trees(self.root)?;
        while let Some(b) = self.tree_connect_worklist.pop_front() {
            if !self.arena[b].connected_trees {
                self.connect_trees(b)?;
            }
        }
        self.types.notify_compilation_done();
        Ok(())
    }
}
