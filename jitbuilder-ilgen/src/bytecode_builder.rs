//! `BytecodeBuilder`: an `IlBuilder` addressed by a bytecode index, carrying
//! VM-state propagation across fall-through and successor edges (spec.md
//! §4.2, §4.6). Wraps `IlBuilder` via `Deref`/`DerefMut` rather than
//! duplicating its API, mirroring the original's `BytecodeBuilder extends
//! IlBuilder` relationship without the inheritance.

use crate::builder::BuilderId;
use crate::error::BuildError;
use crate::il_builder::IlBuilder;
use crate::method_builder::MethodBuilder;
use crate::vm_state::VirtualMachineState;
use std::ops::{Deref, DerefMut};

pub struct BytecodeBuilder<'a> {
    inner: IlBuilder<'a>,
}

impl<'a> BytecodeBuilder<'a> {
    pub fn new(mb: &'a mut MethodBuilder, id: BuilderId) -> Self {
        BytecodeBuilder { inner: IlBuilder::new(mb, id) }
    }

    pub fn bc_index(&self) -> i32 {
        self.inner
            .method_builder_ref()
            .bc_index_of(self.inner.id())
            .expect("BytecodeBuilder always wraps a bytecode-kind BuilderCore")
    }

    pub fn set_initial_vm_state(&mut self, state: Box<dyn VirtualMachineState>) {
        let id = self.inner.id();
        self.inner.method_builder().set_initial_vm_state(id, state);
    }

    pub fn vm_state(&self) -> Option<&dyn VirtualMachineState> {
        self.inner.method_builder_ref().vm_state(self.inner.id())
    }

    /// Declares `target` the fall-through successor, propagates VM state,
    /// and returns the builder id the host should actually transfer control
    /// to (may be a synchronization builder).
    pub fn add_fall_through_builder(&mut self, target: BuilderId) -> Result<BuilderId, BuildError> {
        let id = self.inner.id();
        self.inner.method_builder().add_successor(id, target, true)
    }

    /// Declares `targets` explicit successors (e.g. both arms of a branch),
    /// propagates VM state into each, and returns the corresponding
    /// actually-branch-to builder ids in the same order.
    pub fn add_successor_builders(&mut self, targets: &[BuilderId]) -> Result<Vec<BuilderId>, BuildError> {
        let id = self.inner.id();
        targets
            .iter()
            .map(|&target| self.inner.method_builder().add_successor(id, target, false))
            .collect()
    }

    pub fn append_exception_handler(&mut self, catch_type: u32) -> BuilderId {
        self.inner.method_builder().append_exception_handler(catch_type)
    }
}

impl<'a> Deref for BytecodeBuilder<'a> {
    type Target = IlBuilder<'a>;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a> DerefMut for BytecodeBuilder<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
