//! Structural type descriptors.
//!
//! Every type lives in the [`TypeCache`] arena and is addressed by a [`TypeId`].
//! Open types (the ones built from syntax) are hash-consed: two structurally
//! identical candidates register to the same id. Resolving deferred names may
//! produce self-referential types; those are tied into real cycles as closed,
//! non-interned copies (see `resolve.rs`).

mod display;
mod layout;
mod resolve;
#[cfg(test)]
mod tests;

use bitflags::bitflags;
use std::collections::HashMap;
use strum::{Display, FromRepr};
use crate::vm::strings::{StrId, StringPool};

pub use resolve::DeferTarget;

const FNV_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

fn hash_mix(a: u64, b: u64) -> u64 {
    a ^ (b
        .wrapping_add(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(a << 6)
        .wrapping_add(a >> 2))
}

fn hash_name(name: Option<StrId>) -> u64 {
    let mut hash = FNV_BASIS;
    if let Some(id) = name {
        for byte in id.0.to_le_bytes() {
            hash = (hash ^ byte as u64).wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    pub fn to_bits(self) -> u64 {
        self.0 as u64
    }

    pub fn from_bits(bits: u64) -> Self {
        TypeId(bits as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum TypeKind {
    Void,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Pointer,
    Struct,
    Function,
    Type,
    Varargs,
    Deferred,
    Parent,
}

impl TypeKind {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            TypeKind::Int8 | TypeKind::Int16 | TypeKind::Int32 | TypeKind::Int64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeKind::Float32 | TypeKind::Float64)
    }

    pub fn is_number(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// 변수 하나가 차지하는 바이트 수
    pub fn value_size(self) -> u64 {
        match self {
            TypeKind::Void => 0,
            TypeKind::Int8 => 1,
            TypeKind::Int16 => 2,
            TypeKind::Int32 | TypeKind::Float32 => 4,
            _ => 8,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u8 {
        const CONST = 1 << 0;
        const UNSIGNED = 1 << 1;
        const LVALUE_RETURN = 1 << 2;
        /// Part of a resolved cycle; never interned.
        const CLOSED = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPlacement {
    Auto,
    Absolute(u64),
    Relative(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: Option<StrId>,
    pub ty: TypeId,
    pub offset: u64,
    pub placement: FieldPlacement,
    pub value: u64,
    pub inline: Option<u64>,
}

impl Field {
    pub fn new(name: Option<StrId>, ty: TypeId) -> Self {
        Field {
            name,
            ty,
            offset: 0,
            placement: FieldPlacement::Auto,
            value: 0,
            inline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Option<StrId>,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeData {
    Primitive,
    Pointer { base: TypeId },
    Struct { fields: Vec<Field> },
    Function { ret: TypeId, params: Vec<Param> },
    Deferred { name: StrId },
    Parent { depth: u32 },
}

#[derive(Debug, Clone)]
pub struct Type {
    pub kind: TypeKind,
    pub flags: TypeFlags,
    pub hash: u64,
    pub size: u64,
    pub alignment: u64,
    pub data: TypeData,
    /// Whether a `Parent` marker appears anywhere below this type.
    pub contains_parent: bool,
}

impl Type {
    fn new(kind: TypeKind, data: TypeData) -> Self {
        Type {
            kind,
            flags: TypeFlags::empty(),
            hash: 0,
            size: 8,
            alignment: 8,
            data,
            contains_parent: false,
        }
    }

    pub fn is_const(&self) -> bool {
        self.flags.contains(TypeFlags::CONST)
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags.contains(TypeFlags::UNSIGNED)
    }

    pub fn lvalue_return(&self) -> bool {
        self.flags.contains(TypeFlags::LVALUE_RETURN)
    }

    pub fn value_size(&self) -> u64 {
        self.kind.value_size()
    }

    /// 부호 확장이 필요한 정수인지
    pub fn is_signed_integer(&self) -> bool {
        self.kind.is_integer() && !self.is_unsigned()
    }

    pub fn fields(&self) -> &[Field] {
        match &self.data {
            TypeData::Struct { fields } => fields,
            _ => &[],
        }
    }

    pub fn params(&self) -> &[Param] {
        match &self.data {
            TypeData::Function { params, .. } => params,
            _ => &[],
        }
    }

    pub fn pointer_base(&self) -> Option<TypeId> {
        match self.data {
            TypeData::Pointer { base } => Some(base),
            _ => None,
        }
    }

    pub fn return_type(&self) -> Option<TypeId> {
        match self.data {
            TypeData::Function { ret, .. } => Some(ret),
            _ => None,
        }
    }
}

/// 타입 생성/해석 실패. 이름은 문자열 풀을 거쳐 `describe`에서 풀어 쓴다.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeError {
    DuplicateField(StrId),
    MethodNotFunction(StrId),
    MethodTakesParameters(StrId),
    DeferRecurses(StrId),
    DeferNotFound(StrId),
    DeferNotAType(StrId),
    InlineRecurses(Option<StrId>),
    InlineNotComposite(Option<StrId>),
    InlinePointerUnnamed,
}

impl TypeError {
    pub fn describe(&self, strings: &StringPool) -> String {
        let name = |id: &StrId| strings.resolve(*id).to_string();
        let opt = |id: &Option<StrId>| match id {
            Some(id) => strings.resolve(*id).to_string(),
            None => "<anonymous>".to_string(),
        };
        match self {
            TypeError::DuplicateField(n) => format!("Duplicate field names found: '{}'", name(n)),
            TypeError::MethodNotFunction(n) => format!("Field '{}' must be a function", name(n)),
            TypeError::MethodTakesParameters(n) => {
                format!("Field '{}' cannot take any parameters", name(n))
            }
            TypeError::DeferRecurses(n) => {
                format!("Cannot resolve defers: Defer '{}' recurses", name(n))
            }
            TypeError::DeferNotFound(n) => {
                format!("Cannot resolve defers: Variable '{}' not found", name(n))
            }
            TypeError::DeferNotAType(n) => {
                format!("Cannot resolve defers: Variable '{}' is not a type", name(n))
            }
            TypeError::InlineRecurses(n) => {
                format!("Cannot resolve defers: Inline field '{}' recurses", opt(n))
            }
            TypeError::InlineNotComposite(n) => {
                format!("Inline field '{}' is not a struct or pointer type", opt(n))
            }
            TypeError::InlinePointerUnnamed => {
                "Inline field is a pointer but has no identifier".to_string()
            }
        }
    }
}

pub type TypeResult<T> = Result<T, TypeError>;

/// 타입 아레나 + 해시 인터닝 테이블
#[derive(Debug)]
pub struct TypeCache {
    types: Vec<Type>,
    interned: HashMap<u64, TypeId>,
    closed: HashMap<TypeId, TypeId>,
    closed_variants: HashMap<(TypeId, u8), TypeId>,
    primitives: HashMap<TypeKind, TypeId>,
}

impl Default for TypeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeCache {
    pub fn new() -> Self {
        let mut cache = TypeCache {
            types: Vec::new(),
            interned: HashMap::new(),
            closed: HashMap::new(),
            closed_variants: HashMap::new(),
            primitives: HashMap::new(),
        };
        for kind in [
            TypeKind::Void,
            TypeKind::Int8,
            TypeKind::Int16,
            TypeKind::Int32,
            TypeKind::Int64,
            TypeKind::Float32,
            TypeKind::Float64,
            TypeKind::Type,
            TypeKind::Varargs,
        ] {
            let id = cache.build_primitive(kind);
            cache.primitives.insert(kind, id);
        }
        cache
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn kind(&self, id: TypeId) -> TypeKind {
        self.get(id).kind
    }

    fn compute_hash(&self, ty: &Type) -> u64 {
        let mut hash = FNV_BASIS;
        hash = hash_mix(hash, ty.kind as u64);
        hash = hash_mix(hash, ty.is_const() as u64);
        hash = hash_mix(hash, ty.is_unsigned() as u64);
        hash = hash_mix(hash, ty.lvalue_return() as u64);
        match &ty.data {
            TypeData::Primitive => {}
            TypeData::Pointer { base } => hash = hash_mix(hash, base.to_bits()),
            TypeData::Struct { fields } => {
                hash = hash_mix(hash, fields.len() as u64);
                for field in fields {
                    hash = hash_mix(hash, field.value);
                    hash = hash_mix(hash, hash_name(field.name));
                    hash = hash_mix(hash, field.ty.to_bits());
                    hash = hash_mix(hash, field.inline.map_or(u64::MAX, |n| n));
                    hash = hash_mix(hash, field.offset);
                }
            }
            TypeData::Function { ret, params } => {
                hash = hash_mix(hash, ret.to_bits());
                hash = hash_mix(hash, params.len() as u64);
                for param in params {
                    hash = hash_mix(hash, hash_name(param.name));
                    hash = hash_mix(hash, param.ty.to_bits());
                }
            }
            TypeData::Deferred { name } => hash = hash_mix(hash, hash_name(Some(*name))),
            TypeData::Parent { depth } => hash = hash_mix(hash, *depth as u64),
        }
        hash
    }

    fn children_contain_parent(&self, data: &TypeData) -> bool {
        match data {
            TypeData::Primitive | TypeData::Deferred { .. } => false,
            TypeData::Parent { .. } => true,
            TypeData::Pointer { base } => self.get(*base).contains_parent,
            TypeData::Struct { fields } => fields.iter().any(|f| self.get(f.ty).contains_parent),
            TypeData::Function { ret, params } => {
                self.get(*ret).contains_parent
                    || params.iter().any(|p| self.get(p.ty).contains_parent)
            }
        }
    }

    /// 후보 타입을 등록한다. 같은 해시가 이미 있으면 기존 인스턴스를 돌려준다.
    pub fn register(&mut self, mut candidate: Type) -> TypeId {
        candidate.hash = self.compute_hash(&candidate);
        if let Some(&id) = self.interned.get(&candidate.hash) {
            return id;
        }
        candidate.contains_parent = self.children_contain_parent(&candidate.data);
        let id = TypeId(self.types.len() as u32);
        self.interned.insert(candidate.hash, id);
        self.types.push(candidate);
        id
    }

    fn build_primitive(&mut self, kind: TypeKind) -> TypeId {
        let mut ty = Type::new(kind, TypeData::Primitive);
        let size = match kind {
            TypeKind::Int8 => 1,
            TypeKind::Int16 => 2,
            TypeKind::Int32 | TypeKind::Float32 => 4,
            _ => 8,
        };
        ty.size = size;
        ty.alignment = size;
        self.register(ty)
    }

    pub fn primitive(&mut self, kind: TypeKind) -> TypeId {
        match self.primitives.get(&kind) {
            Some(&id) => id,
            None => self.build_primitive(kind),
        }
    }

    pub fn void(&self) -> TypeId {
        self.primitives[&TypeKind::Void]
    }

    pub fn type_type(&self) -> TypeId {
        self.primitives[&TypeKind::Type]
    }

    pub fn unsign(&mut self, id: TypeId) -> TypeId {
        let mut ty = self.get(id).clone();
        if ty.flags.contains(TypeFlags::CLOSED) {
            return id;
        }
        ty.flags |= TypeFlags::UNSIGNED;
        self.register(ty)
    }

    pub fn constant(&mut self, id: TypeId) -> TypeId {
        let mut ty = self.get(id).clone();
        if ty.flags.contains(TypeFlags::CLOSED) {
            return self.closed_variant(id, TypeFlags::CONST);
        }
        ty.flags |= TypeFlags::CONST;
        self.register(ty)
    }

    /// const를 뗀 버전
    pub fn mutable(&mut self, id: TypeId) -> TypeId {
        let ty = self.get(id);
        if !ty.is_const() || ty.flags.contains(TypeFlags::CLOSED) {
            return id;
        }
        let mut ty = ty.clone();
        ty.flags.remove(TypeFlags::CONST);
        self.register(ty)
    }

    pub fn pointer(&mut self, base: TypeId) -> TypeId {
        self.register(Type::new(TypeKind::Pointer, TypeData::Pointer { base }))
    }

    pub fn function(&mut self, ret: TypeId, params: Vec<Param>, lvalue_return: bool) -> TypeId {
        let mut ty = Type::new(TypeKind::Function, TypeData::Function { ret, params });
        if lvalue_return {
            ty.flags |= TypeFlags::LVALUE_RETURN;
        }
        self.register(ty)
    }

    pub fn deferred(&mut self, name: StrId) -> TypeId {
        self.register(Type::new(TypeKind::Deferred, TypeData::Deferred { name }))
    }

    pub fn parent_ref(&mut self, depth: u32) -> TypeId {
        let mut ty = Type::new(TypeKind::Parent, TypeData::Parent { depth });
        ty.size = 0;
        ty.alignment = 1;
        self.register(ty)
    }

    /// 구조체 타입 생성. `base`가 있으면 오프셋 0에 `super` 인라인 필드를 둔다.
    pub fn structure(&mut self, mut fields: Vec<Field>, base: Option<TypeId>) -> TypeResult<TypeId> {
        if let Some(base) = base {
            let mut sup = Field::new(Some(StrId::SUPER), base);
            sup.inline = Some(1);
            sup.placement = FieldPlacement::Absolute(0);
            fields.insert(0, sup);
        }
        self.check_fields(&fields)?;
        let mut ty = Type::new(TypeKind::Struct, TypeData::Struct { fields });
        self.build_layout(&mut ty);
        Ok(self.register(ty))
    }

    /// 닫힌 타입은 인터닝되지 않으므로 플래그 변형도 별도 사본으로 만든다.
    fn closed_variant(&mut self, id: TypeId, flag: TypeFlags) -> TypeId {
        if let Some(&found) = self.closed_variants.get(&(id, flag.bits())) {
            return found;
        }
        let mut ty = self.get(id).clone();
        ty.flags |= flag;
        ty.hash = hash_mix(ty.hash, flag.bits() as u64);
        let new_id = TypeId(self.types.len() as u32);
        self.types.push(ty);
        self.closed_variants.insert((id, flag.bits()), new_id);
        new_id
    }

    /// 부호 없는 정수 / 포인터 여부
    pub fn is_unsigned_like(&self, id: TypeId) -> bool {
        let ty = self.get(id);
        ty.is_unsigned() || ty.kind == TypeKind::Pointer
    }

    /// 이름으로 필드 찾기
    pub fn field(&self, id: TypeId, name: StrId) -> Option<&Field> {
        self.get(id).fields().iter().find(|f| f.name == Some(name))
    }

    pub fn param(&self, id: TypeId, name: StrId) -> Option<&Param> {
        self.get(id).params().iter().find(|p| p.name == Some(name))
    }

    /// 가변 인자 표시자로 끝나는 함수 타입인지
    pub fn is_variadic(&self, id: TypeId) -> bool {
        self.get(id)
            .params()
            .last()
            .is_some_and(|p| self.kind(p.ty) == TypeKind::Varargs)
    }
}
