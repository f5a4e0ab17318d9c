//! The type dictionary: primitives, pointers, structs and unions (spec.md
//! §3 "Type").
//!
//! This crate owns only the *shape* of types — sizes, alignments, field
//! layout — and hands out opaque [`FieldSymbolRef`] handles the downstream
//! IR surface is expected to interpret; it never constructs IR nodes itself
//! (§2's "IR Surface (iface)" collaborator stays external).

mod primitive;

pub use primitive::PrimitiveType;

use jitbuilder_entity::{entity_impl, PrimaryMap};
use log::trace;
use std::cell::Cell;
use std::collections::HashMap;
pub use target_lexicon::Triple;
use target_lexicon::PointerWidth;
use thiserror::Error;

/// A stable handle into a [`TypeDictionary`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);
entity_impl!(TypeId);

/// Opaque handle to a lazily-created symbol reference for a struct/union
/// field. The actual symbol reference machinery belongs to the IR surface
/// (out of scope for this crate); this is just the cache key/value the
/// dictionary hands back so a `Load`/`Store` service can reuse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSymbolRef(pub u64);

#[derive(Debug, Clone)]
struct Field {
    name: String,
    ty: TypeId,
    offset: usize,
    symbol_ref: Cell<Option<FieldSymbolRef>>,
}

impl Field {
    fn new(name: &str, ty: TypeId, offset: usize) -> Self {
        Field {
            name: name.to_string(),
            ty,
            offset,
            symbol_ref: Cell::new(None),
        }
    }
}

#[derive(Debug, Clone)]
struct AggregateLayout {
    fields: Vec<Field>,
    size: usize,
    closed: bool,
    is_union: bool,
}

impl AggregateLayout {
    fn find(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
enum TypeKind {
    Primitive(PrimitiveType),
    Pointer { base: TypeId },
    Aggregate(AggregateLayout),
}

#[derive(Debug, Clone)]
struct TypeData {
    name: String,
    kind: TypeKind,
}

/// Errors raised while shaping types (§7's "usage error" family).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("struct `{0}` is closed and cannot accept new fields")]
    StructClosed(String),
    #[error("union `{0}` is closed and cannot accept new fields")]
    UnionClosed(String),
    #[error(
        "offset {offset} of field `{type_name}::{field_name}` is less than the aggregate's current size {current_size}"
    )]
    InvalidFieldOffset {
        type_name: String,
        field_name: String,
        offset: usize,
        current_size: usize,
    },
    #[error("closing struct `{name}` at size {requested} would be smaller than its current size {current}")]
    CloseSizeTooSmall {
        name: String,
        requested: usize,
        current: usize,
    },
    #[error("no struct named `{0}`")]
    UnknownStruct(String),
    #[error("no union named `{0}`")]
    UnknownUnion(String),
    #[error("type `{type_name}` has no field named `{field_name}`")]
    UnknownField { type_name: String, field_name: String },
    #[error("`{0}` does not name a struct or union")]
    NotAnAggregate(TypeId),
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// The struct/union/pointer/primitive type universe for one compilation.
///
/// Corresponds to `OMR::TypeDictionary`. Primitive and pointer-to-primitive
/// types are pre-populated in the constructor exactly as in
/// `TypeDictionary::TypeDictionary()`; structs and unions are added on
/// demand via [`TypeDictionary::define_struct`]/[`TypeDictionary::define_union`].
pub struct TypeDictionary {
    types: PrimaryMap<TypeId, TypeData>,
    primitives: HashMap<PrimitiveType, TypeId>,
    pointers_to_primitives: HashMap<PrimitiveType, TypeId>,
    structs_by_name: HashMap<String, TypeId>,
    unions_by_name: HashMap<String, TypeId>,
    address_size: u8,
    word_primitive: PrimitiveType,
}

impl TypeDictionary {
    /// Builds a dictionary targeting the host triple's pointer width,
    /// mirroring `TR::Compiler->target.is64Bit()` in the constructor.
    pub fn new() -> Self {
        Self::for_triple(&Triple::host())
    }

    pub fn for_triple(triple: &Triple) -> Self {
        let address_size = match triple.pointer_width() {
            Ok(PointerWidth::U64) => 8,
            Ok(PointerWidth::U32) => 4,
            Ok(PointerWidth::U16) => 2,
            Err(_) => 8,
        };
        let word_primitive = if address_size >= 8 {
            PrimitiveType::Int64
        } else {
            PrimitiveType::Int32
        };

        let mut dict = TypeDictionary {
            types: PrimaryMap::new(),
            primitives: HashMap::new(),
            pointers_to_primitives: HashMap::new(),
            structs_by_name: HashMap::new(),
            unions_by_name: HashMap::new(),
            address_size,
            word_primitive,
        };

        for &prim in PrimitiveType::ALL.iter() {
            let id = dict.types.push(TypeData {
                name: prim.name().to_string(),
                kind: TypeKind::Primitive(prim),
            });
            dict.primitives.insert(prim, id);
        }
        for &prim in PrimitiveType::ALL.iter() {
            let base = dict.primitives[&prim];
            let pid = dict.make_pointer(base);
            dict.pointers_to_primitives.insert(prim, pid);
        }

        dict
    }

    fn make_pointer(&mut self, base: TypeId) -> TypeId {
        let base_name = self.types[base].name.clone();
        self.types.push(TypeData {
            name: format!("L{};", base_name),
            kind: TypeKind::Pointer { base },
        })
    }

    pub fn primitive(&self, prim: PrimitiveType) -> TypeId {
        self.primitives[&prim]
    }

    pub fn pointer_to_primitive(&self, prim: PrimitiveType) -> TypeId {
        self.pointers_to_primitives[&prim]
    }

    /// The target's natural word type (`Word` in `MethodBuilder.hpp`): Int64
    /// on 64-bit targets, Int32 otherwise.
    pub fn word_type(&self) -> TypeId {
        self.primitives[&self.word_primitive]
    }

    pub fn word_pointer_type(&self) -> TypeId {
        self.pointers_to_primitives[&self.word_primitive]
    }

    pub fn address_size(&self) -> u8 {
        self.address_size
    }

    /// Builds a new pointer type to `base`. Matches `PointerTo`'s behavior
    /// of always allocating a fresh `PointerType` rather than interning.
    pub fn pointer_to(&mut self, base: TypeId) -> TypeId {
        self.make_pointer(base)
    }

    pub fn kind_of(&self, id: TypeId) -> PrimitiveType {
        match &self.types[id].kind {
            TypeKind::Primitive(p) => *p,
            TypeKind::Pointer { .. } => PrimitiveType::Address,
            TypeKind::Aggregate(a) if a.is_union => PrimitiveType::Address,
            TypeKind::Aggregate(_) => PrimitiveType::Address,
        }
    }

    pub fn name_of(&self, id: TypeId) -> &str {
        &self.types[id].name
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.types[id].kind, TypeKind::Pointer { .. })
    }

    pub fn pointer_base(&self, id: TypeId) -> Option<TypeId> {
        match self.types[id].kind {
            TypeKind::Pointer { base } => Some(base),
            _ => None,
        }
    }

    pub fn size_of(&self, id: TypeId) -> usize {
        match &self.types[id].kind {
            TypeKind::Primitive(p) => p.size(self.address_size),
            TypeKind::Pointer { .. } => self.address_size as usize,
            TypeKind::Aggregate(a) => a.size,
        }
    }

    pub fn alignment_of(&self, id: TypeId) -> usize {
        match &self.types[id].kind {
            TypeKind::Primitive(p) => p.alignment(self.address_size),
            TypeKind::Pointer { .. } => self.address_size as usize,
            TypeKind::Aggregate(_) => self.address_size as usize,
        }
    }

    // --- structs -----------------------------------------------------

    pub fn lookup_struct(&self, name: &str) -> Option<TypeId> {
        self.structs_by_name.get(name).copied()
    }

    /// Re-defining a struct name allocates a fresh, empty type and replaces
    /// the name binding, matching `DefineStruct`'s hash-table overwrite
    /// (the previous allocation simply becomes unreachable by name).
    pub fn define_struct(&mut self, name: &str) -> TypeId {
        let id = self.types.push(TypeData {
            name: name.to_string(),
            kind: TypeKind::Aggregate(AggregateLayout {
                fields: Vec::new(),
                size: 0,
                closed: false,
                is_union: false,
            }),
        });
        self.structs_by_name.insert(name.to_string(), id);
        id
    }

    /// Adds a field at an explicit offset (`StructType::AddField(name, type,
    /// offset)`): the offset must not be smaller than the struct's current
    /// size.
    pub fn add_field_at(
        &mut self,
        id: TypeId,
        field_name: &str,
        field_type: TypeId,
        offset: usize,
    ) -> Result<(), TypeError> {
        let field_size = self.size_of(field_type);
        let agg = self.aggregate_mut(id)?;
        if agg.closed {
            return Err(TypeError::StructClosed(self.types[id].name.clone()));
        }
        if offset < agg.size {
            return Err(TypeError::InvalidFieldOffset {
                type_name: self.types[id].name.clone(),
                field_name: field_name.to_string(),
                offset,
                current_size: agg.size,
            });
        }
        agg.fields.push(Field::new(field_name, field_type, offset));
        agg.size = offset + field_size;
        trace!("add_field_at: {}::{field_name} @ {offset}", self.types[id].name);
        Ok(())
    }

    /// Adds a field at an automatically-aligned offset
    /// (`StructType::AddField(name, type)`).
    pub fn add_field(
        &mut self,
        id: TypeId,
        field_name: &str,
        field_type: TypeId,
    ) -> Result<(), TypeError> {
        let align = self.alignment_of(field_type);
        let field_size = self.size_of(field_type);
        let agg = self.aggregate_mut(id)?;
        if agg.closed {
            return Err(TypeError::StructClosed(self.types[id].name.clone()));
        }
        let offset = (agg.size + align - 1) & !(align - 1);
        agg.fields.push(Field::new(field_name, field_type, offset));
        agg.size = offset + field_size;
        Ok(())
    }

    /// Closes a struct at an explicit final size.
    pub fn close_struct_at(&mut self, id: TypeId, final_size: usize) -> Result<(), TypeError> {
        let name = self.types[id].name.clone();
        let agg = self.aggregate_mut(id)?;
        if agg.closed {
            // Idempotent: closing an already-closed struct is a no-op,
            // matching the source's silent-ignore behavior.
            return Ok(());
        }
        if final_size < agg.size {
            return Err(TypeError::CloseSizeTooSmall {
                name,
                requested: final_size,
                current: agg.size,
            });
        }
        agg.size = final_size;
        agg.closed = true;
        trace!("close_struct_at: `{name}` closed at size {final_size}");
        Ok(())
    }

    pub fn close_struct(&mut self, id: TypeId) -> Result<(), TypeError> {
        let agg = self.aggregate_mut(id)?;
        agg.closed = true;
        Ok(())
    }

    pub fn field_type(&self, id: TypeId, field_name: &str) -> Result<TypeId, TypeError> {
        let agg = self.aggregate(id)?;
        agg.find(field_name)
            .map(|f| f.ty)
            .ok_or_else(|| TypeError::UnknownField {
                type_name: self.types[id].name.clone(),
                field_name: field_name.to_string(),
            })
    }

    pub fn field_offset(&self, id: TypeId, field_name: &str) -> Result<usize, TypeError> {
        let agg = self.aggregate(id)?;
        agg.find(field_name)
            .map(|f| f.offset)
            .ok_or_else(|| TypeError::UnknownField {
                type_name: self.types[id].name.clone(),
                field_name: field_name.to_string(),
            })
    }

    /// Returns the cached symbol reference for a field, computing and
    /// caching it via `make` on first access — mirrors
    /// `StructType::getFieldSymRef`'s lazy-symref pattern.
    pub fn field_symbol_ref(
        &self,
        id: TypeId,
        field_name: &str,
        make: impl FnOnce(usize, TypeId) -> FieldSymbolRef,
    ) -> Result<FieldSymbolRef, TypeError> {
        let agg = self.aggregate(id)?;
        let field = agg.find(field_name).ok_or_else(|| TypeError::UnknownField {
            type_name: self.types[id].name.clone(),
            field_name: field_name.to_string(),
        })?;
        if let Some(cached) = field.symbol_ref.get() {
            return Ok(cached);
        }
        let computed = make(field.offset, field.ty);
        field.symbol_ref.set(Some(computed));
        Ok(computed)
    }

    // --- unions --------------------------------------------------------

    pub fn lookup_union(&self, name: &str) -> Option<TypeId> {
        self.unions_by_name.get(name).copied()
    }

    pub fn define_union(&mut self, name: &str) -> TypeId {
        let id = self.types.push(TypeData {
            name: name.to_string(),
            kind: TypeKind::Aggregate(AggregateLayout {
                fields: Vec::new(),
                size: 0,
                closed: false,
                is_union: true,
            }),
        });
        self.unions_by_name.insert(name.to_string(), id);
        id
    }

    /// Every union field sits at offset 0; the union's size is the max
    /// field size, per `UnionType::AddField`.
    pub fn union_add_field(
        &mut self,
        id: TypeId,
        field_name: &str,
        field_type: TypeId,
    ) -> Result<(), TypeError> {
        let field_size = self.size_of(field_type);
        let agg = self.aggregate_mut(id)?;
        if agg.closed {
            return Err(TypeError::UnionClosed(self.types[id].name.clone()));
        }
        agg.fields.push(Field::new(field_name, field_type, 0));
        if field_size > agg.size {
            agg.size = field_size;
        }
        Ok(())
    }

    pub fn close_union(&mut self, id: TypeId) -> Result<(), TypeError> {
        let agg = self.aggregate_mut(id)?;
        agg.closed = true;
        Ok(())
    }

    /// Invalidates every cached field symbol reference. Must be called at
    /// the end of a compilation (spec.md §3's Type invariant on caches).
    pub fn notify_compilation_done(&mut self) {
        for data in self.types.values_mut() {
            if let TypeKind::Aggregate(agg) = &mut data.kind {
                for field in &mut agg.fields {
                    field.symbol_ref.set(None);
                }
            }
        }
    }

    fn aggregate(&self, id: TypeId) -> Result<&AggregateLayout, TypeError> {
        match &self.types[id].kind {
            TypeKind::Aggregate(a) => Ok(a),
            _ => Err(TypeError::NotAnAggregate(id)),
        }
    }

    fn aggregate_mut(&mut self, id: TypeId) -> Result<&mut AggregateLayout, TypeError> {
        match &mut self.types[id].kind {
            TypeKind::Aggregate(a) => Ok(a),
            _ => Err(TypeError::NotAnAggregate(id)),
        }
    }
}

impl Default for TypeDictionary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_sizes_are_distinct_and_known() {
        let dict = TypeDictionary::new();
        let i32_t = dict.primitive(PrimitiveType::Int32);
        let i64_t = dict.primitive(PrimitiveType::Int64);
        assert_eq!(dict.size_of(i32_t), 4);
        assert_eq!(dict.size_of(i64_t), 8);
    }

    #[test]
    fn struct_field_auto_alignment() {
        let mut dict = TypeDictionary::new();
        let pair = dict.define_struct("Pair");
        let i8_t = dict.primitive(PrimitiveType::Int8);
        let i32_t = dict.primitive(PrimitiveType::Int32);
        dict.add_field(pair, "flag", i8_t).unwrap();
        dict.add_field(pair, "value", i32_t).unwrap();
        assert_eq!(dict.field_offset(pair, "flag").unwrap(), 0);
        assert_eq!(dict.field_offset(pair, "value").unwrap(), 4);
        assert_eq!(dict.size_of(pair), 8);
    }

    #[test]
    fn closed_struct_rejects_add_field() {
        let mut dict = TypeDictionary::new();
        let pair = dict.define_struct("Pair");
        let i32_t = dict.primitive(PrimitiveType::Int32);
        dict.add_field(pair, "a", i32_t).unwrap();
        dict.add_field(pair, "b", i32_t).unwrap();
        dict.close_struct_at(pair, 8).unwrap();
        assert_eq!(dict.size_of(pair), 8);

        let err = dict.add_field(pair, "c", i32_t).unwrap_err();
        assert_eq!(err, TypeError::StructClosed("Pair".to_string()));
        assert_eq!(dict.size_of(pair), 8);
    }

    #[test]
    fn reclosing_is_idempotent() {
        let mut dict = TypeDictionary::new();
        let pair = dict.define_struct("Pair");
        let i32_t = dict.primitive(PrimitiveType::Int32);
        dict.add_field(pair, "a", i32_t).unwrap();
        dict.close_struct_at(pair, 4).unwrap();
        dict.close_struct_at(pair, 4).unwrap();
    }

    #[test]
    fn union_fields_share_offset_zero() {
        let mut dict = TypeDictionary::new();
        let u = dict.define_union("U");
        let i32_t = dict.primitive(PrimitiveType::Int32);
        let i64_t = dict.primitive(PrimitiveType::Int64);
        dict.union_add_field(u, "i", i32_t).unwrap();
        dict.union_add_field(u, "l", i64_t).unwrap();
        assert_eq!(dict.field_offset(u, "i").unwrap(), 0);
        assert_eq!(dict.field_offset(u, "l").unwrap(), 0);
        assert_eq!(dict.size_of(u), 8);
    }

    #[test]
    fn pointer_round_trips_base_type() {
        let mut dict = TypeDictionary::new();
        let i32_t = dict.primitive(PrimitiveType::Int32);
        let p = dict.pointer_to(i32_t);
        assert!(dict.is_pointer(p));
        assert_eq!(dict.pointer_base(p), Some(i32_t));
    }

    #[test]
    fn field_symbol_ref_is_cached() {
        let mut dict = TypeDictionary::new();
        let pair = dict.define_struct("Pair");
        let i32_t = dict.primitive(PrimitiveType::Int32);
        dict.add_field(pair, "a", i32_t).unwrap();

        let calls = Cell::new(0);
        let make = |_offset: usize, _ty: TypeId| {
            calls.set(calls.get() + 1);
            FieldSymbolRef(42)
        };
        let first = dict.field_symbol_ref(pair, "a", make).unwrap();
        let second = dict.field_symbol_ref(pair, "a", make).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);

        dict.notify_compilation_done();
        let third = dict.field_symbol_ref(pair, "a", make).unwrap();
        assert_eq!(third, FieldSymbolRef(42));
        assert_eq!(calls.get(), 2);
    }
}
