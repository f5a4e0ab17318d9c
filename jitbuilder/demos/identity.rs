//! Scenario 1 from spec.md §8: `increment(value: Int32) -> Int32` whose body
//! is `Return(Add(Load("value"), Const(1)))`. Native code generation is out
//! of scope for this crate, so this sample builds the method and reports the
//! resulting block count instead of invoking compiled machine code.

use jitbuilder::{IlBuilder, MethodBuilder, PrimitiveType, TypeDictionary};

fn main() {
    env_logger::init();

    let mut mb = MethodBuilder::new("increment", "demos/identity.rs", "1", TypeDictionary::new());
    mb.define_parameter("value", PrimitiveType::Int32);
    mb.all_locals_have_been_defined().unwrap();

    let root = mb.root();
    let mut il = IlBuilder::new(&mut mb, root);
    let value = il.load("value").unwrap();
    let one = il.const_int32(1);
    let sum = il.add(value, one).unwrap();
    il.return_value(sum);

    mb.finalize().unwrap();
    println!(
        "increment(Int32) -> Int32: {} basic block(s), may_have_loops = {}",
        mb.count_blocks(mb.root()),
        mb.may_have_loops(),
    );
}
