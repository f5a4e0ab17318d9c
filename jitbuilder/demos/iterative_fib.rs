//! Scenario 2 from spec.md §8: `fib(n: Int32) -> Int32` built iteratively
//! with an early-return guard and a `ForLoopUp`. As with the other demos,
//! this builds IL and reports structural facts rather than executing
//! compiled code, since code generation is out of scope for this crate.

use jitbuilder::{BuildError, IlBuilder, MethodBuilder, PrimitiveType, TypeDictionary};

fn main() {
    env_logger::init();

    let mut mb = MethodBuilder::new("fib", "demos/iterative_fib.rs", "1", TypeDictionary::new());
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

        let one = il.const_int32(1);
        let n = il.load("n").unwrap();
        let step = il.const_int32(1);
        il.for_loop_up("i", one, n, step, |body: &mut IlBuilder| -> Result<(), BuildError> {
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
    println!(
        "fib(Int32) -> Int32: {} basic block(s), may_have_loops = {}",
        mb.count_blocks(mb.root()),
        mb.may_have_loops(),
    );
}
