//! `IlBuilder`: the host-facing handle for a plain (non-bytecode) scope.
//! Each call is `(&mut MethodBuilder, BuilderId)` borrowed together for one
//! method invocation, so the arena stays the single owner (spec.md §3
//! "IlBuilder", §9 Design Notes "cross-references between builders are
//! indices, not pointers").

use crate::error::BuildError;
use crate::ir::{ArithOp, CompareOp, Literal, Value};
use crate::method_builder::MethodBuilder;
use crate::builder::BuilderId;
use jitbuilder_types::{PrimitiveType, TypeId};

pub struct IlBuilder<'a> {
    mb: &'a mut MethodBuilder,
    id: BuilderId,
}

impl<'a> IlBuilder<'a> {
    pub fn new(mb: &'a mut MethodBuilder, id: BuilderId) -> Self {
        IlBuilder { mb, id }
    }

    pub fn id(&self) -> BuilderId {
        self.id
    }

    pub fn method_builder(&mut self) -> &mut MethodBuilder {
        self.mb
    }

    pub fn method_builder_ref(&self) -> &MethodBuilder {
        self.mb
    }

    // ---- constants --------------------------------------------------------

    pub fn const_int8(&mut self, v: i8) -> Value {
        self.mb.const_op(self.id, PrimitiveType::Int8, crate::ir::Op::Const(Literal::Int(v as i64)))
    }
    pub fn const_int16(&mut self, v: i16) -> Value {
        self.mb.const_op(self.id, PrimitiveType::Int16, crate::ir::Op::Const(Literal::Int(v as i64)))
    }
    pub fn const_int32(&mut self, v: i32) -> Value {
        self.mb.const_op(self.id, PrimitiveType::Int32, crate::ir::Op::Const(Literal::Int(v as i64)))
    }
    pub fn const_int64(&mut self, v: i64) -> Value {
        self.mb.const_op(self.id, PrimitiveType::Int64, crate::ir::Op::Const(Literal::Int(v)))
    }
    pub fn const_float(&mut self, v: f32) -> Value {
        self.mb.const_op(self.id, PrimitiveType::Float, crate::ir::Op::Const(Literal::Float(v)))
    }
    pub fn const_double(&mut self, v: f64) -> Value {
        self.mb.const_op(self.id, PrimitiveType::Double, crate::ir::Op::Const(Literal::Double(v)))
    }
    pub fn const_address(&mut self, v: u64) -> Value {
        self.mb.const_op(self.id, PrimitiveType::Address, crate::ir::Op::Const(Literal::Address(v)))
    }
    pub fn null_address(&mut self) -> Value {
        self.mb.const_op(self.id, PrimitiveType::Address, crate::ir::Op::NullAddress)
    }

    // ---- locals -------------------------------------------------------------

    pub fn define_local(&mut self, name: &str, ty: PrimitiveType) -> Result<(), BuildError> {
        self.mb.define_local(name, ty)
    }

    pub fn load(&mut self, name: &str) -> Result<Value, BuildError> {
        self.mb.load(self.id, name)
    }

    pub fn store(&mut self, name: &str, value: Value) -> Result<(), BuildError> {
        self.mb.store(self.id, name, value)
    }

    pub fn store_over(&mut self, dest: Value, value: Value) -> Result<(), BuildError> {
        self.mb.store_over(self.id, dest, value)
    }

    // ---- arithmetic -----------------------------------------------------

    pub fn add(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.arith(self.id, ArithOp::Add, "Add", lhs, rhs)
    }
    pub fn sub(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.arith(self.id, ArithOp::Sub, "Sub", lhs, rhs)
    }
    pub fn mul(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.arith(self.id, ArithOp::Mul, "Mul", lhs, rhs)
    }
    pub fn div(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.arith(self.id, ArithOp::Div, "Div", lhs, rhs)
    }
    pub fn and(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.arith(self.id, ArithOp::And, "And", lhs, rhs)
    }
    pub fn or(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.arith(self.id, ArithOp::Or, "Or", lhs, rhs)
    }
    pub fn xor(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.arith(self.id, ArithOp::Xor, "Xor", lhs, rhs)
    }
    pub fn shift_left(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.arith(self.id, ArithOp::ShiftL, "ShiftL", lhs, rhs)
    }
    pub fn shift_right(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.arith(self.id, ArithOp::ShiftR, "ShiftR", lhs, rhs)
    }
    pub fn unsigned_shift_right(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.arith(self.id, ArithOp::UnsignedShiftR, "UnsignedShiftR", lhs, rhs)
    }

    pub fn add_with_overflow(&mut self, lhs: Value, rhs: Value, handler: BuilderId) -> Result<Value, BuildError> {
        self.mb.checked_arith(self.id, ArithOp::Add, "AddWithOverflow", lhs, rhs, handler, false)
    }
    pub fn add_with_unsigned_overflow(&mut self, lhs: Value, rhs: Value, handler: BuilderId) -> Result<Value, BuildError> {
        self.mb.checked_arith(self.id, ArithOp::Add, "AddWithUnsignedOverflow", lhs, rhs, handler, true)
    }
    pub fn sub_with_overflow(&mut self, lhs: Value, rhs: Value, handler: BuilderId) -> Result<Value, BuildError> {
        self.mb.checked_arith(self.id, ArithOp::Sub, "SubWithOverflow", lhs, rhs, handler, false)
    }
    pub fn sub_with_unsigned_overflow(&mut self, lhs: Value, rhs: Value, handler: BuilderId) -> Result<Value, BuildError> {
        self.mb.checked_arith(self.id, ArithOp::Sub, "SubWithUnsignedOverflow", lhs, rhs, handler, true)
    }
    pub fn mul_with_overflow(&mut self, lhs: Value, rhs: Value, handler: BuilderId) -> Result<Value, BuildError> {
        self.mb.checked_arith(self.id, ArithOp::Mul, "MulWithOverflow", lhs, rhs, handler, false)
    }

    // ---- compare ----------------------------------------------------------

    pub fn equal_to(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.compare(self.id, CompareOp::Eq, lhs, rhs)
    }
    pub fn not_equal_to(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.compare(self.id, CompareOp::Ne, lhs, rhs)
    }
    pub fn less_than(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.compare(self.id, CompareOp::Lt, lhs, rhs)
    }
    pub fn less_or_equal_to(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.compare(self.id, CompareOp::Le, lhs, rhs)
    }
    pub fn greater_than(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.compare(self.id, CompareOp::Gt, lhs, rhs)
    }
    pub fn greater_or_equal_to(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.compare(self.id, CompareOp::Ge, lhs, rhs)
    }
    pub fn unsigned_less_than(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.compare(self.id, CompareOp::UnsignedLt, lhs, rhs)
    }
    pub fn unsigned_greater_than(&mut self, lhs: Value, rhs: Value) -> Result<Value, BuildError> {
        self.mb.compare(self.id, CompareOp::UnsignedGt, lhs, rhs)
    }

    pub fn convert_to(&mut self, to: PrimitiveType, value: Value) -> Result<Value, BuildError> {
        self.mb.convert_to(self.id, to, value, false)
    }
    pub fn unsigned_convert_to(&mut self, to: PrimitiveType, value: Value) -> Result<Value, BuildError> {
        self.mb.convert_to(self.id, to, value, true)
    }

    // ---- memory -------------------------------------------------------------

    pub fn load_at(&mut self, ty: PrimitiveType, address: Value) -> Result<Value, BuildError> {
        self.mb.load_at(self.id, ty, address)
    }
    pub fn store_at(&mut self, address: Value, value: Value) -> Result<(), BuildError> {
        self.mb.store_at(self.id, address, value)
    }
    pub fn vector_load_at(&mut self, ty: PrimitiveType, address: Value, lanes: u32) -> Result<Value, BuildError> {
        self.mb.vector_load_at(self.id, ty, address, lanes)
    }
    pub fn vector_store_at(&mut self, address: Value, value: Value, lanes: u32) -> Result<(), BuildError> {
        self.mb.vector_store_at(self.id, address, value, lanes)
    }
    pub fn index_at(&mut self, elem_ty: PrimitiveType, base: Value, index: Value) -> Result<Value, BuildError> {
        self.mb.index_at(self.id, elem_ty, base, index)
    }
    pub fn load_indirect(&mut self, struct_ty: TypeId, field: &str, object: Value) -> Result<Value, BuildError> {
        self.mb.load_indirect(self.id, struct_ty, field, object)
    }
    pub fn store_indirect(&mut self, struct_ty: TypeId, field: &str, object: Value, value: Value) -> Result<(), BuildError> {
        self.mb.store_indirect(self.id, struct_ty, field, object, value)
    }
    pub fn create_local_array(&mut self, count: u32, elem_ty: PrimitiveType) -> Value {
        self.mb.create_local_array(self.id, count, elem_ty)
    }
    pub fn create_local_struct(&mut self, struct_ty: TypeId) -> Value {
        self.mb.create_local_struct(self.id, struct_ty)
    }

    // ---- calls ----------------------------------------------------------

    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, BuildError> {
        self.mb.call(self.id, name, args)
    }
    pub fn computed_call(&mut self, target: Value, return_type: PrimitiveType, args: &[Value]) -> Result<Value, BuildError> {
        self.mb.computed_call(self.id, target, return_type, args)
    }

    // ---- atomics / transactions ------------------------------------------

    pub fn atomic_add(&mut self, address: Value, delta: Value) -> Result<Value, BuildError> {
        self.mb.atomic_add(self.id, address, delta, None)
    }
    pub fn atomic_add_at_offset(&mut self, address: Value, offset: Value, delta: Value) -> Result<Value, BuildError> {
        self.mb.atomic_add(self.id, address, delta, Some(offset))
    }
    pub fn transaction_abort(&mut self) {
        self.mb.transaction_abort(self.id)
    }
    pub fn transaction(&mut self, persist_fail: BuilderId, transient_fail: BuilderId, body: BuilderId) -> Result<(), BuildError> {
        self.mb.transaction(self.id, persist_fail, transient_fail, body)
    }

    // ---- control flow -----------------------------------------------------

    pub fn append_builder(&mut self, child: BuilderId) -> Result<(), BuildError> {
        self.mb.append_builder(self.id, child)
    }

    pub fn goto(&mut self, target: BuilderId) -> Result<(), BuildError> {
        self.mb.goto(self.id, target)
    }

    pub fn return_void(&mut self) {
        self.mb.return_void(self.id)
    }
    pub fn return_value(&mut self, value: Value) {
        self.mb.return_value(self.id, value)
    }

    pub fn if_then(&mut self, cond: Value, then_builder: BuilderId) -> Result<(), BuildError> {
        self.mb.if_then(self.id, cond, then_builder)
    }
    pub fn if_then_else(&mut self, cond: Value, then_builder: BuilderId, else_builder: BuilderId) -> Result<(), BuildError> {
        self.mb.if_then_else(self.id, cond, then_builder, else_builder)
    }
    pub fn if_and(&mut self, conds: &[Value], then_builder: BuilderId, else_builder: BuilderId) -> Result<(), BuildError> {
        self.mb.if_and(self.id, conds, then_builder, else_builder)
    }
    pub fn if_or(&mut self, conds: &[Value], then_builder: BuilderId, else_builder: BuilderId) -> Result<(), BuildError> {
        self.mb.if_or(self.id, conds, then_builder, else_builder)
    }
    pub fn switch(&mut self, selector: Value, cases: &[(i32, BuilderId)], default: BuilderId) -> Result<(), BuildError> {
        self.mb.switch(self.id, selector, cases, default)
    }

    pub fn if_cmp_equal(&mut self, lhs: Value, rhs: Value, target: BuilderId) -> Result<(), BuildError> {
        self.mb.if_cmp(self.id, CompareOp::Eq, lhs, rhs, target)
    }
    pub fn if_cmp_not_equal(&mut self, lhs: Value, rhs: Value, target: BuilderId) -> Result<(), BuildError> {
        self.mb.if_cmp(self.id, CompareOp::Ne, lhs, rhs, target)
    }
    pub fn if_cmp_less_than(&mut self, lhs: Value, rhs: Value, target: BuilderId) -> Result<(), BuildError> {
        self.mb.if_cmp(self.id, CompareOp::Lt, lhs, rhs, target)
    }
    pub fn if_cmp_less_or_equal(&mut self, lhs: Value, rhs: Value, target: BuilderId) -> Result<(), BuildError> {
        self.mb.if_cmp(self.id, CompareOp::Le, lhs, rhs, target)
    }
    pub fn if_cmp_greater_than(&mut self, lhs: Value, rhs: Value, target: BuilderId) -> Result<(), BuildError> {
        self.mb.if_cmp(self.id, CompareOp::Gt, lhs, rhs, target)
    }
    pub fn if_cmp_greater_or_equal(&mut self, lhs: Value, rhs: Value, target: BuilderId) -> Result<(), BuildError> {
        self.mb.if_cmp(self.id, CompareOp::Ge, lhs, rhs, target)
    }

    pub fn for_loop_up(
        &mut self,
        var: &str,
        initial: Value,
        end: Value,
        increment: Value,
        body: impl FnOnce(&mut IlBuilder) -> Result<(), BuildError>,
    ) -> Result<(), BuildError> {
        let id = self.id;
        self.mb.for_loop_up(id, var, initial, end, increment, |mb, b| body(&mut IlBuilder::new(mb, b)))
    }

    pub fn while_do_loop(
        &mut self,
        cond_fn: impl FnOnce(&mut IlBuilder) -> Result<Value, BuildError>,
        body: impl FnOnce(&mut IlBuilder) -> Result<(), BuildError>,
    ) -> Result<(), BuildError> {
        let id = self.id;
        self.mb.while_do_loop(id, |mb, b| cond_fn(&mut IlBuilder::new(mb, b)), |mb, b| body(&mut IlBuilder::new(mb, b)))
    }

    pub fn do_while_loop(
        &mut self,
        body: impl FnOnce(&mut IlBuilder) -> Result<(), BuildError>,
        cond_fn: impl FnOnce(&mut IlBuilder) -> Result<Value, BuildError>,
    ) -> Result<(), BuildError> {
        let id = self.id;
        self.mb.do_while_loop(id, |mb, b| body(&mut IlBuilder::new(mb, b)), |mb, b| cond_fn(&mut IlBuilder::new(mb, b)))
    }

    /// Allows holding a second live handle onto a different builder ID
    /// within the same method without re-borrowing the whole `MethodBuilder`
    /// from a caller that only has `&mut IlBuilder`.
    pub fn sibling(&mut self, other: BuilderId) -> IlBuilder<'_> {
        IlBuilder { mb: &mut *self.mb, id: other }
    }
}
