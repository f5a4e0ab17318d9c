//! Scenario 3 from spec.md §8: the same `fib(n: Int32) -> Int32` signature
//! as `iterative_fib`, built recursively via `IfThenElse` and a self-`Call`.
//! Exercises `MethodBuilder::define_return_type`'s effect on the method's
//! own function-table entry (spec.md §9 Design Notes), which is what lets a
//! body call its own name before the method has finished building.

use jitbuilder::{IlBuilder, MethodBuilder, PrimitiveType, TypeDictionary};

fn main() {
    env_logger::init();

    let mut mb = MethodBuilder::new("fib", "demos/recursive_fib.rs", "1", TypeDictionary::new());
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
    println!(
        "fib(Int32) -> Int32 (recursive): {} basic block(s), may_have_loops = {}",
        mb.count_blocks(mb.root()),
        mb.may_have_loops(),
    );
}
