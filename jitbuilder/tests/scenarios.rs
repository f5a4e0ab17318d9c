//! Integration tests for the worked scenarios in spec.md §8, driven purely
//! through the umbrella crate's public surface (the way an external host
//! embeds this library). Since native code generation is out of scope
//! (spec.md §1 Non-goals), these check structural invariants that are
//! testable without a code generator: block counts, the loop-detection
//! heuristic, error taxonomy, and record/replay token equivalence.

use jitbuilder::{
    BuildError, IlBuilder, MethodBuilder, PrimitiveType, Recorder, TranscriptError, TypeDictionary,
};

fn fresh(name: &str) -> MethodBuilder {
    MethodBuilder::new(name, "tests/scenarios.rs", "0", TypeDictionary::new())
}

/// Scenario 1 — Identity method: `increment(value: Int32) -> Int32` is
/// `Return(Add(Load("value"), Const(1)))`. One basic block, no branches.
#[test]
fn scenario_1_identity_method() {
    let mut mb = fresh("increment");
    mb.define_parameter("value", PrimitiveType::Int32);
    mb.define_return_type(PrimitiveType::Int32);
    mb.all_locals_have_been_defined().unwrap();

    let root = mb.root();
    let mut il = IlBuilder::new(&mut mb, root);
    let value = il.load("value").unwrap();
    let one = il.const_int32(1);
    let sum = il.add(value, one).unwrap();
    il.return_value(sum);

    mb.finalize().unwrap();
    assert_eq!(mb.count_blocks(mb.root()), 1);
    assert!(!mb.may_have_loops());
}

fn build_iterative_fib() -> MethodBuilder {
    let mut mb = fresh("fib");
    mb.define_parameter("n", PrimitiveType::Int32);
    mb.define_return_type(PrimitiveType::Int32);
    mb.all_locals_have_been_defined().unwrap();

    let root = mb.root();
    let return_small_n = mb.orphan_builder();
    {
        let mut il = IlBuilder::new(&mut mb, root);
        let n = il.load("n").unwrap();
        let two = il.const_int32(2);
        let small = il.less_than(n, two).unwrap();
        il.if_then(small, return_small_n).unwrap();
    }
    {
        let mut il = IlBuilder::new(&mut mb, return_small_n);
        let n = il.load("n").unwrap();
        il.return_value(n);
    }
    {
        let mut il = IlBuilder::new(&mut mb, root);
        let zero = il.const_int32(0);
        let one = il.const_int32(1);
        il.store("last", zero).unwrap();
        il.store("sum", one).unwrap();

        let start = il.const_int32(1);
        let n = il.load("n").unwrap();
        let step = il.const_int32(1);
        il.for_loop_up("i", start, n, step, |body: &mut IlBuilder| -> Result<(), BuildError> {
            let sum = body.load("sum")?;
            let last = body.load("last")?;
            let tmp = body.add(sum, last)?;
            body.store("last", sum)?;
            body.store("sum", tmp)?;
            Ok(())
        })
        .unwrap();

        let sum = il.load("sum").unwrap();
        il.return_value(sum);
    }
    mb.finalize().unwrap();
    mb
}

/// Scenario 2 — Iterative Fibonacci: an early-return guard plus a
/// `ForLoopUp` should mark the method as loop-containing and produce more
/// than one basic block.
#[test]
fn scenario_2_iterative_fibonacci_structure() {
    let mb = build_iterative_fib();
    assert!(mb.may_have_loops());
    assert!(mb.count_blocks(mb.root()) > 3);
}

fn build_recursive_fib() -> MethodBuilder {
    let mut mb = fresh("fib");
    mb.define_parameter("n", PrimitiveType::Int32);
    mb.define_return_type(PrimitiveType::Int32);
    mb.all_locals_have_been_defined().unwrap();

    let root = mb.root();
    let then_builder = mb.orphan_builder();
    let else_builder = mb.orphan_builder();
    {
        let mut il = IlBuilder::new(&mut mb, root);
        let n = il.load("n").unwrap();
        let two = il.const_int32(2);
        let small = il.less_than(n, two).unwrap();
        il.if_then_else(small, then_builder, else_builder).unwrap();
    }
    {
        let mut il = IlBuilder::new(&mut mb, then_builder);
        let n = il.load("n").unwrap();
        il.store("result", n).unwrap();
    }
    {
        let mut il = IlBuilder::new(&mut mb, else_builder);
        let n = il.load("n").unwrap();
        let one = il.const_int32(1);
        let n_minus_1 = il.sub(n, one).unwrap();
        let fib_n_minus_1 = il.call("fib", &[n_minus_1]).unwrap();

        let n = il.load("n").unwrap();
        let two = il.const_int32(2);
        let n_minus_2 = il.sub(n, two).unwrap();
        let fib_n_minus_2 = il.call("fib", &[n_minus_2]).unwrap();

        let result = il.add(fib_n_minus_1, fib_n_minus_2).unwrap();
        il.store("result", result).unwrap();
    }
    {
        let mut il = IlBuilder::new(&mut mb, root);
        let result = il.load("result").unwrap();
        il.return_value(result);
    }
    mb.finalize().unwrap();
    mb
}

/// Scenario 3 — Recursive Fibonacci: same signature, built with
/// `IfThenElse` and two recursive `Call("fib", ...)`s. The method must be
/// able to resolve a call to its own name before `buildIL` finishes, which
/// is what `define_return_type`'s bookkeeping of the self function-table
/// entry exists for.
#[test]
fn scenario_3_recursive_fibonacci_resolves_self_call() {
    let mb = build_recursive_fib();
    assert!(!mb.may_have_loops());
    assert!(mb.count_blocks(mb.root()) >= 4);
}

/// Scenario 4 — Record-then-replay equivalence: recording Scenario 1 and
/// replaying it into a fresh method builder must reproduce the same block
/// count, and re-recording the replayed method must reproduce the same
/// token stream (spec.md §8 invariant 6, "token-equivalent up to ID
/// renumbering" — here the two recorders allocate ids in the same order, so
/// equivalence is exact).
#[test]
fn scenario_4_record_then_replay_equivalence() {
    let original = {
        let mut mb = fresh("increment");
        mb.define_parameter("value", PrimitiveType::Int32);
        mb.define_return_type(PrimitiveType::Int32);
        mb.all_locals_have_been_defined().unwrap();
        let root = mb.root();
        let mut il = IlBuilder::new(&mut mb, root);
        let value = il.load("value").unwrap();
        let one = il.const_int32(1);
        let sum = il.add(value, one).unwrap();
        il.return_value(sum);
        mb.finalize().unwrap();
        mb
    };

    let recorder = Recorder::capture(&original).unwrap();

    let mut replayed = fresh("increment");
    jitbuilder::replay(&mut replayed, recorder.tokens()).unwrap();
    replayed.finalize().unwrap();

    assert_eq!(replayed.count_blocks(replayed.root()), original.count_blocks(original.root()));

    let rerecorded = Recorder::capture(&replayed).unwrap();
    assert_eq!(format!("{:?}", rerecorded.tokens()), format!("{:?}", recorder.tokens()));
}

/// Scenario 5 — VM-state merge: two predecessors delivering different
/// operand-stack shapes to the same successor must each get their own
/// synchronization builder, and both paths must observe the reconciled
/// stack.
#[test]
fn scenario_5_vm_state_merge_inserts_one_sync_builder_per_mismatch() {
    use jitbuilder::VirtualMachineState;

    #[derive(Debug, Clone)]
    struct StackState {
        slots: Vec<&'static str>,
    }

    impl VirtualMachineState for StackState {
        fn copy(&self) -> Box<dyn VirtualMachineState> {
            Box::new(self.clone())
        }

        fn merge(
            &self,
            other: &dyn VirtualMachineState,
            into_builder: &mut IlBuilder<'_>,
        ) -> Result<(), BuildError> {
            let _ = other;
            for &slot in &self.slots {
                let v = into_builder.load(slot)?;
                into_builder.store(slot, v)?;
            }
            Ok(())
        }
    }

    let mut mb = fresh("merge_demo");
    mb.define_local("a", PrimitiveType::Int32).unwrap();
    mb.define_local("b", PrimitiveType::Int32).unwrap();
    mb.all_locals_have_been_defined().unwrap();

    let pred_10 = mb.orphan_bytecode_builder(10, Some("bci10".into()));
    let pred_20 = mb.orphan_bytecode_builder(20, Some("bci20".into()));
    let succ_30 = mb.orphan_bytecode_builder(30, Some("bci30".into()));

    mb.set_initial_vm_state(pred_10, Box::new(StackState { slots: vec!["a", "b"] }));
    mb.set_initial_vm_state(pred_20, Box::new(StackState { slots: vec!["b", "a"] }));

    let routed_from_10 = mb.add_successor(pred_10, succ_30, false).unwrap();
    let routed_from_20 = mb.add_successor(pred_20, succ_30, false).unwrap();

    // The first predecessor reaching an unset initial state binds directly;
    // the second, mismatched one is rerouted through a synchronization
    // builder rather than handed `succ_30` itself.
    assert_eq!(routed_from_10, succ_30);
    assert_ne!(routed_from_20, succ_30);
    assert!(mb.vm_state(succ_30).is_some());
}

/// Scenario 6 — Closed-struct rejection: adding a field after `CloseStruct`
/// is a usage error (the explicit-rejection branch spec.md §9's Open
/// Question calls acceptable; DESIGN.md records the choice), and the
/// struct's size is unchanged.
#[test]
fn scenario_6_closed_struct_rejects_further_fields() {
    let mut types = TypeDictionary::new();
    let pair = types.define_struct("Pair");
    let i32_t = types.primitive(PrimitiveType::Int32);
    types.add_field(pair, "a", i32_t).unwrap();
    types.add_field(pair, "b", i32_t).unwrap();
    types.close_struct_at(pair, 8).unwrap();

    let err = types.add_field(pair, "c", i32_t).unwrap_err();
    assert!(matches!(err, jitbuilder::TypeError::StructClosed(ref name) if name == "Pair"));
    assert_eq!(types.size_of(pair), 8);
}

/// `IfCmpGreaterThan`/its unsigned sibling take a `BuilderId`, not an
/// optional/nullable handle, so the source's asymmetric
/// `TR_ASSERT(target != NULL, ...)` omission (spec.md §9 Open Question) has
/// no counterpart to reproduce: the type system rejects a null target
/// uniformly across every `IfCmp*`, by construction. What they still share
/// with `Goto` is the ability to branch back to a builder already in the
/// sequence — e.g. a loop header — without tripping `DuplicateAppend`,
/// since `IfCmp` never splices its target (spec.md §4.1's "Control" group:
/// raw branch, not append).
#[test]
fn if_cmp_greater_than_branches_back_to_an_already_sequenced_loop_header() {
    let mut mb = fresh("loop_header_backedge");
    mb.all_locals_have_been_defined().unwrap();
    let root = mb.root();
    let header = mb.orphan_builder();
    mb.append_builder(root, header).unwrap();

    let mut il = IlBuilder::new(&mut mb, header);
    let a = il.const_int32(1);
    let b = il.const_int32(2);
    il.if_cmp_greater_than(a, b, header).unwrap();
}

/// A bytecode successor edge pointing at a strictly smaller bytecode index
/// marks the method as possibly containing loops (spec.md §3
/// "BytecodeBuilder", §8 invariant 3) — independent of the structured
/// `ForLoopUp`/`WhileDoLoop`/`DoWhileLoop` helpers, which set the same flag
/// for their own back-edges.
#[test]
fn backward_bytecode_successor_edge_sets_may_have_loops() {
    let mut mb = fresh("backedge_demo");
    mb.all_locals_have_been_defined().unwrap();

    let bci_10 = mb.orphan_bytecode_builder(10, None);
    let bci_5 = mb.orphan_bytecode_builder(5, None);

    assert!(!mb.may_have_loops());
    mb.add_successor(bci_10, bci_5, false).unwrap();
    assert!(mb.may_have_loops());
}

/// spec.md §4.1 Transaction group: a platform lacking a TM evaluator
/// entirely can't express `Transaction` at all (host-contract error), one
/// with an evaluator but no running-processor TM support silently degrades
/// to a branch into `persist_fail`, and a fully-capable platform wires all
/// three builders as reachable successors of the `tstart` dispatch.
#[test]
fn scenario_7_transaction_degrades_without_processor_tm_support() {
    let mut mb = fresh("transacted_increment");
    mb.all_locals_have_been_defined().unwrap();
    mb.set_supports_tm(false);

    let root = mb.root();
    let (persist_fail, transient_fail, body) = (mb.orphan_builder(), mb.orphan_builder(), mb.orphan_builder());
    let mut il = IlBuilder::new(&mut mb, root);
    il.transaction(persist_fail, transient_fail, body).unwrap();

    mb.finalize().unwrap();
    assert!(mb.count_blocks(mb.root()) >= 4);
}

#[test]
fn transaction_is_a_host_contract_error_without_a_tm_evaluator() {
    let mut mb = fresh("no_tm_evaluator");
    mb.all_locals_have_been_defined().unwrap();
    mb.set_has_tm_evaluator(false);

    let root = mb.root();
    let (persist_fail, transient_fail, body) = (mb.orphan_builder(), mb.orphan_builder(), mb.orphan_builder());
    let mut il = IlBuilder::new(&mut mb, root);
    let err = il.transaction(persist_fail, transient_fail, body).unwrap_err();
    assert!(matches!(err, BuildError::TransactionsUnsupported));
}

/// A dangling value reference in a transcript is a recoverable parse-time
/// error (spec.md §7 "Transcript error"), not a panic.
#[test]
fn transcript_replay_rejects_a_dangling_value_reference() {
    use jitbuilder::Token;

    let mut mb = fresh("bad_transcript");
    let tokens = vec![Token::Store { builder: 0, name: "x".into(), value: 0 }];
    let err = jitbuilder::replay(&mut mb, &tokens).unwrap_err();
    assert!(matches!(err, TranscriptError::UnknownValue(0)));
}
