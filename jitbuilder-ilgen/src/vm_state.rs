//! Abstract virtual-machine state attached to bytecode builders (spec.md
//! §4.6 / §3 "VirtualMachineState").
//!
//! The core only needs two operations from a host-supplied state: `copy`
//! and `merge`. A typical implementation models an operand stack as named
//! locals, so merging reduces to emitting `Store(target_slot,
//! Load(source_slot))` pairs into the target builder for every mismatched
//! stack position — exactly the comment in spec.md §4.6.

use crate::error::BuildError;
use crate::il_builder::IlBuilder;
use jitbuilder_entity::{entity_impl, PrimaryMap};
use std::fmt::Debug;

/// Implemented by the host's abstract machine state (e.g. an operand
/// stack). `Send`-free and single-threaded, matching spec.md §5's
/// cooperative, non-reentrant scheduling model.
pub trait VirtualMachineState: Debug {
    /// Produces an equivalent, independent copy of this state.
    fn copy(&self) -> Box<dyn VirtualMachineState>;

    /// Emits whatever loads/stores/moves into `into_builder` are necessary
    /// so that, after `into_builder`'s code runs, this state is
    /// indistinguishable from `other`.
    fn merge(&self, other: &dyn VirtualMachineState, into_builder: &mut IlBuilder<'_>) -> Result<(), BuildError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmStateHandle(u32);
entity_impl!(VmStateHandle);

/// Arena of live VM states, owned by the `MethodBuilder`. Stored out of line
/// from `BytecodeExt` (which only holds `VmStateHandle`s) so that merging
/// can borrow two states immutably while mutating a third builder's
/// sequence.
#[derive(Debug, Default)]
pub struct VmStateArena {
    states: PrimaryMap<VmStateHandle, Box<dyn VirtualMachineState>>,
}

impl VmStateArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: Box<dyn VirtualMachineState>) -> VmStateHandle {
        self.states.push(state)
    }

    pub fn get(&self, handle: VmStateHandle) -> &dyn VirtualMachineState {
        self.states[handle].as_ref()
    }

    pub fn copy_of(&mut self, handle: VmStateHandle) -> VmStateHandle {
        let copy = self.states[handle].copy();
        self.insert(copy)
    }
}
