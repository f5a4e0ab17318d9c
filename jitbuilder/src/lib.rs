//! Umbrella crate: the single dependency a host embeds to describe method
//! bodies for a JIT (spec.md §1 OVERVIEW). Re-exports the construction core
//! (`jitbuilder-ilgen`), the type system (`jitbuilder-types`), and the
//! recorder/replay sidecar (`jitbuilder-recorder`) under one namespace, the
//! way `wasmtime`'s top-level crate re-exports `wasmtime-environ` and
//! friends for downstream embedders.

pub use jitbuilder_types::{FieldSymbolRef, PrimitiveType, Triple, TypeDictionary, TypeError, TypeId};

pub use jitbuilder_ilgen::{
    builder::BuilderId,
    bytecode_builder::BytecodeBuilder,
    error::BuildError,
    il_builder::IlBuilder,
    ir::{ArithOp, CompareOp, Value},
    method_builder::{MethodBuilder, RequestFunctionHook},
    symbols::FunctionDescriptor,
    vm_state::{VirtualMachineState, VmStateHandle},
};

pub use jitbuilder_recorder::{replay, Recorder, Token, TranscriptError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexported_surface_builds_a_trivial_method() {
        let mut mb = MethodBuilder::new("noop", "lib.rs", "0", TypeDictionary::new());
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let mut il = IlBuilder::new(&mut mb, root);
        il.return_void();
        mb.finalize().unwrap();
        assert_eq!(mb.count_blocks(mb.root()), 1);
    }
}
