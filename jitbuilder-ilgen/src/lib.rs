//! The IL construction core: `IlBuilder`, `BytecodeBuilder`, and the
//! `MethodBuilder` that owns every arena they index into. See spec.md §3-4
//! for the object model and SPEC_FULL.md for how the ambient stack
//! (logging, errors) fits around it.

pub mod builder;
pub mod bytecode_builder;
pub mod error;
pub mod il_builder;
pub mod ir;
pub mod method_builder;
pub mod symbols;
pub mod vm_state;

pub use builder::BuilderId;
pub use bytecode_builder::BytecodeBuilder;
pub use error::BuildError;
pub use il_builder::IlBuilder;
pub use ir::{ArithOp, CompareOp, Value};
pub use method_builder::MethodBuilder;
pub use symbols::FunctionDescriptor;
pub use vm_state::VirtualMachineState;

#[cfg(test)]
mod tests {
    use super::*;
    use jitbuilder_types::{PrimitiveType, TypeDictionary};

    fn fresh() -> MethodBuilder {
        MethodBuilder::new("test", "test.rs", "0", TypeDictionary::new())
    }

    #[test]
    fn identity_method_returns_its_parameter() {
        let mut mb = fresh();
        mb.define_parameter("x", PrimitiveType::Int32);
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let mut il = IlBuilder::new(&mut mb, root);
        let x = il.load("x").unwrap();
        il.return_value(x);
        mb.finalize().unwrap();
        assert_eq!(mb.count_blocks(mb.root()), 1);
    }

    #[test]
    fn if_then_creates_a_merge_block_reachable_from_both_paths() {
        let mut mb = fresh();
        mb.define_parameter("x", PrimitiveType::Int32);
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let then_builder = mb.orphan_builder();

        let mut il = IlBuilder::new(&mut mb, root);
        let x = il.load("x").unwrap();
        let zero = il.const_int32(0);
        let cond = il.greater_than(x, zero).unwrap();
        il.if_then(cond, then_builder).unwrap();

        {
            let mut then_il = IlBuilder::new(&mut mb, then_builder);
            let one = then_il.const_int32(1);
            then_il.store("x", one).unwrap();
        }

        let root = mb.root();
        let mut il = IlBuilder::new(&mut mb, root);
        let x = il.load("x").unwrap();
        il.return_value(x);

        mb.finalize().unwrap();
        assert!(mb.count_blocks(mb.root()) >= 3);
    }

    #[test]
    fn redeclaring_a_local_with_a_different_type_is_an_error() {
        let mut mb = fresh();
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let mut il = IlBuilder::new(&mut mb, root);
        let v = il.const_int32(1);
        il.store("counter", v).unwrap();
        let d = il.const_double(1.0);
        let err = il.store("counter", d).unwrap_err();
        assert!(matches!(err, BuildError::InconsistentLocalType { .. }));
    }

    #[test]
    fn duplicate_append_of_the_same_builder_is_rejected() {
        let mut mb = fresh();
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let child = mb.orphan_builder();
        mb.append_builder(root, child).unwrap();
        let err = mb.append_builder(root, child).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateAppend(_)));
    }

    #[test]
    fn mismatched_arithmetic_operand_types_are_rejected() {
        let mut mb = fresh();
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let mut il = IlBuilder::new(&mut mb, root);
        let i = il.const_int32(1);
        let d = il.const_double(1.0);
        let err = il.add(i, d).unwrap_err();
        assert!(matches!(err, BuildError::TypeMismatch { .. }));
    }

    #[test]
    fn for_loop_up_produces_a_backward_edge_into_the_condition_builder() {
        let mut mb = fresh();
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let zero = mb.const_op(root, PrimitiveType::Int32, crate::ir::Op::Const(crate::ir::Literal::Int(0)));
        let ten = mb.const_op(root, PrimitiveType::Int32, crate::ir::Op::Const(crate::ir::Literal::Int(10)));
        let one = mb.const_op(root, PrimitiveType::Int32, crate::ir::Op::Const(crate::ir::Literal::Int(1)));
        mb.for_loop_up(root, "i", zero, ten, one, |_mb, _body| Ok(())).unwrap();
        mb.finalize().unwrap();
        assert!(mb.may_have_loops);
    }

    #[test]
    fn switch_rejects_a_non_int32_selector() {
        let mut mb = fresh();
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let mut il = IlBuilder::new(&mut mb, root);
        let selector = il.const_int64(1);
        let default = il.method_builder().orphan_builder();
        let err = il.switch(selector, &[], default).unwrap_err();
        assert!(matches!(err, BuildError::InvalidSwitchSelector(PrimitiveType::Int64)));
    }

    #[test]
    fn vector_load_and_store_round_trip_a_vector_local() {
        let mut mb = fresh();
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let mut il = IlBuilder::new(&mut mb, root);
        let base = il.create_local_array(4, PrimitiveType::VectorFloat);
        let loaded = il.vector_load_at(PrimitiveType::VectorFloat, base, 4).unwrap();
        assert_eq!(loaded.ty(), PrimitiveType::VectorFloat);
        il.vector_store_at(base, loaded, 4).unwrap();
    }

    #[test]
    fn vector_load_rejects_a_scalar_type() {
        let mut mb = fresh();
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let mut il = IlBuilder::new(&mut mb, root);
        let base = il.create_local_array(4, PrimitiveType::Int32);
        let err = il.vector_load_at(PrimitiveType::Int32, base, 4).unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedOperandType { op: "VectorLoad", .. }));
    }

    #[test]
    fn atomic_add_is_rejected_on_a_platform_without_support() {
        let mut mb = fresh();
        mb.all_locals_have_been_defined().unwrap();
        mb.set_supports_atomic_add(false);
        let root = mb.root();
        let mut il = IlBuilder::new(&mut mb, root);
        let base = il.create_local_array(1, PrimitiveType::Int32);
        let one = il.const_int32(1);
        let err = il.atomic_add(base, one).unwrap_err();
        assert!(matches!(err, BuildError::AtomicsUnsupported));
    }

    #[test]
    fn atomic_add_rejects_a_non_integer_delta() {
        let mut mb = fresh();
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let mut il = IlBuilder::new(&mut mb, root);
        let base = il.create_local_array(1, PrimitiveType::Double);
        let one = il.const_double(1.0);
        let err = il.atomic_add(base, one).unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedOperandType { op: "AtomicAdd", .. }));
    }

    #[test]
    fn transaction_is_rejected_without_a_tm_evaluator() {
        let mut mb = fresh();
        mb.all_locals_have_been_defined().unwrap();
        mb.set_has_tm_evaluator(false);
        let root = mb.root();
        let (persist, transient, body) = (mb.orphan_builder(), mb.orphan_builder(), mb.orphan_builder());
        let mut il = IlBuilder::new(&mut mb, root);
        let err = il.transaction(persist, transient, body).unwrap_err();
        assert!(matches!(err, BuildError::TransactionsUnsupported));
    }

    #[test]
    fn transaction_degrades_to_a_branch_to_persist_fail_without_tm_support() {
        let mut mb = fresh();
        mb.all_locals_have_been_defined().unwrap();
        mb.set_supports_tm(false);
        let root = mb.root();
        let (persist, transient, body) = (mb.orphan_builder(), mb.orphan_builder(), mb.orphan_builder());
        let mut il = IlBuilder::new(&mut mb, root);
        il.transaction(persist, transient, body).unwrap();
        mb.finalize().unwrap();
        assert!(mb.count_blocks(mb.root()) >= 4);
    }

    #[test]
    fn add_with_unsigned_overflow_adds_an_exception_edge_to_its_handler() {
        let mut mb = fresh();
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let handler = mb.orphan_builder();
        let mut il = IlBuilder::new(&mut mb, root);
        let a = il.const_int32(1);
        let b = il.const_int32(2);
        il.add_with_unsigned_overflow(a, b, handler).unwrap();
        mb.finalize().unwrap();
        assert!(mb.count_blocks(mb.root()) >= 2);
    }

    #[test]
    fn index_at_records_the_64_bit_word_type_on_a_64_bit_target() {
        use jitbuilder_types::Triple;
        let dict = TypeDictionary::for_triple(&"x86_64-unknown-linux-gnu".parse::<Triple>().unwrap());
        let mut mb = MethodBuilder::new("test", "test.rs", "0", dict);
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let mut il = IlBuilder::new(&mut mb, root);
        let base = il.create_local_array(4, PrimitiveType::Int32);
        let index = il.const_int32(1);
        let elem = il.index_at(PrimitiveType::Int32, base, index).unwrap();
        assert_eq!(elem.ty(), PrimitiveType::Address);
        let block = mb.arena[root].entry_block;
        match mb.cfg().blocks[block].stmts.last().unwrap() {
            crate::ir::Stmt::Eval { op: crate::ir::Op::IndexAt { word_ty, .. }, .. } => {
                assert_eq!(*word_ty, PrimitiveType::Int64);
            }
            other => panic!("expected Eval(IndexAt), got {other:?}"),
        }
    }

    #[test]
    fn index_at_records_the_32_bit_word_type_on_a_32_bit_target() {
        use jitbuilder_types::Triple;
        let dict = TypeDictionary::for_triple(&"i686-unknown-linux-gnu".parse::<Triple>().unwrap());
        let mut mb = MethodBuilder::new("test", "test.rs", "0", dict);
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let mut il = IlBuilder::new(&mut mb, root);
        let base = il.create_local_array(4, PrimitiveType::Int32);
        let index = il.const_int32(1);
        let elem = il.index_at(PrimitiveType::Int32, base, index).unwrap();
        assert_eq!(elem.ty(), PrimitiveType::Address);
        let block = mb.arena[root].entry_block;
        match mb.cfg().blocks[block].stmts.last().unwrap() {
            crate::ir::Stmt::Eval { op: crate::ir::Op::IndexAt { word_ty, .. }, .. } => {
                assert_eq!(*word_ty, PrimitiveType::Int32);
            }
            other => panic!("expected Eval(IndexAt), got {other:?}"),
        }
    }

    #[test]
    fn transaction_branches_to_all_three_builders_with_tm_support() {
        let mut mb = fresh();
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let (persist, transient, body) = (mb.orphan_builder(), mb.orphan_builder(), mb.orphan_builder());
        let mut il = IlBuilder::new(&mut mb, root);
        il.transaction(persist, transient, body).unwrap();
        mb.finalize().unwrap();
        assert!(mb.count_blocks(mb.root()) >= 4);
    }
}
