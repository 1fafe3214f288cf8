use super::*;
use pretty_assertions::assert_eq;
use std::collections::HashMap;

fn setup() -> (TypeCache, StringPool) {
    (TypeCache::new(), StringPool::new())
}

fn named(strings: &mut StringPool, name: &str, ty: TypeId) -> Field {
    Field::new(Some(strings.intern(name)), ty)
}

// ========== 인터닝 테스트 ==========

#[test]
fn test_structural_interning() {
    let (mut types, mut strings) = setup();
    let s32 = types.primitive(TypeKind::Int32);
    let f64_ = types.primitive(TypeKind::Float64);

    let a = types
        .structure(vec![named(&mut strings, "x", s32), named(&mut strings, "y", f64_)], None)
        .unwrap();
    let b = types
        .structure(vec![named(&mut strings, "x", s32), named(&mut strings, "y", f64_)], None)
        .unwrap();
    assert_eq!(a, b);

    let p1 = types.pointer(a);
    let p2 = types.pointer(b);
    assert_eq!(p1, p2);
}

#[test]
fn test_const_and_unsigned_are_distinct() {
    let (mut types, _) = setup();
    let s8 = types.primitive(TypeKind::Int8);
    let c = types.constant(s8);
    let u = types.unsign(s8);
    assert_ne!(c, s8);
    assert_ne!(u, s8);
    assert_ne!(c, u);
    assert_eq!(types.constant(s8), c);
    assert!(types.get(c).is_const());
    assert_eq!(types.mutable(c), s8);
}

#[test]
fn test_function_types_intern() {
    let (mut types, mut strings) = setup();
    let s32 = types.primitive(TypeKind::Int32);
    let a = strings.intern("a");
    let f1 = types.function(s32, vec![Param { name: Some(a), ty: s32 }], false);
    let f2 = types.function(s32, vec![Param { name: Some(a), ty: s32 }], false);
    let f3 = types.function(s32, vec![Param { name: Some(a), ty: s32 }], true);
    assert_eq!(f1, f2);
    assert_ne!(f1, f3);
}

// ========== 레이아웃 테스트 ==========

#[test]
fn test_auto_layout_aligns_fields() {
    let (mut types, mut strings) = setup();
    let s8 = types.primitive(TypeKind::Int8);
    let s32 = types.primitive(TypeKind::Int32);
    let s16 = types.primitive(TypeKind::Int16);
    let id = types
        .structure(
            vec![
                named(&mut strings, "a", s8),
                named(&mut strings, "b", s32),
                named(&mut strings, "c", s16),
            ],
            None,
        )
        .unwrap();
    let ty = types.get(id);
    let offsets: Vec<u64> = ty.fields().iter().map(|f| f.offset).collect();
    assert_eq!(offsets, vec![0, 4, 8]);
    assert_eq!(ty.size, 12);
    assert_eq!(ty.alignment, 4);
}

#[test]
fn test_explicit_placement() {
    let (mut types, mut strings) = setup();
    let s32 = types.primitive(TypeKind::Int32);
    let mut a = named(&mut strings, "a", s32);
    a.placement = FieldPlacement::Absolute(16);
    let mut b = named(&mut strings, "b", s32);
    b.placement = FieldPlacement::Relative(4);
    let id = types.structure(vec![a, b], None).unwrap();
    let ty = types.get(id);
    assert_eq!(ty.fields()[0].offset, 16);
    assert_eq!(ty.fields()[1].offset, 24);
    assert_eq!(ty.size, 28);
}

#[test]
fn test_inline_array_and_base() {
    let (mut types, mut strings) = setup();
    let f32_ = types.primitive(TypeKind::Float32);
    let vec2 = types
        .structure(vec![named(&mut strings, "x", f32_), named(&mut strings, "y", f32_)], None)
        .unwrap();
    assert_eq!(types.get(vec2).size, 8);

    let mut points = named(&mut strings, "points", vec2);
    points.inline = Some(3);
    let poly = types.structure(vec![points], Some(vec2)).unwrap();
    let ty = types.get(poly);
    assert_eq!(ty.fields()[0].name, Some(StrId::SUPER));
    assert_eq!(ty.fields()[0].offset, 0);
    assert_eq!(ty.fields()[1].offset, 8);
    assert_eq!(ty.size, 32);
}

#[test]
fn test_duplicate_field_names() {
    let (mut types, mut strings) = setup();
    let s32 = types.primitive(TypeKind::Int32);
    let err = types
        .structure(vec![named(&mut strings, "a", s32), named(&mut strings, "a", s32)], None)
        .unwrap_err();
    assert_eq!(err.describe(&strings), "Duplicate field names found: 'a'");
}

#[test]
fn test_new_field_must_be_parameterless_function() {
    let (mut types, mut strings) = setup();
    let s32 = types.primitive(TypeKind::Int32);
    let void = types.void();

    let err = types.structure(vec![Field::new(Some(StrId::NEW), s32)], None).unwrap_err();
    assert_eq!(err.describe(&strings), "Field 'new' must be a function");

    let x = strings.intern("x");
    let takes = types.function(void, vec![Param { name: Some(x), ty: s32 }], false);
    let err = types.structure(vec![Field::new(Some(StrId::DELETE), takes)], None).unwrap_err();
    assert_eq!(err.describe(&strings), "Field 'delete' cannot take any parameters");
}

// ========== defer 해석 테스트 ==========

fn lookup_in(map: &HashMap<StrId, TypeId>) -> impl FnMut(StrId) -> DeferTarget + '_ {
    move |name| match map.get(&name) {
        Some(&ty) => DeferTarget::Type(ty),
        None => DeferTarget::Missing,
    }
}

#[test]
fn test_self_referential_struct_forms_cycle() {
    let (mut types, mut strings) = setup();
    let s32 = types.primitive(TypeKind::Int32);
    let node_name = strings.intern("Node");
    let deferred = types.deferred(node_name);
    let next_ty = types.pointer(deferred);
    let node = types
        .structure(vec![named(&mut strings, "value", s32), named(&mut strings, "next", next_ty)], None)
        .unwrap();

    let mut scope = HashMap::new();
    scope.insert(node_name, node);
    let resolved = types.resolve_defers(node, &mut lookup_in(&scope)).unwrap();

    let next = types.get(resolved).fields()[1].ty;
    let pointee = types.get(next).pointer_base().unwrap();
    assert_eq!(pointee, resolved);
    assert!(types.get(resolved).flags.contains(TypeFlags::CLOSED));

    // resolving again hits the cache
    let again = types.resolve_defers(node, &mut lookup_in(&scope)).unwrap();
    assert_eq!(again, resolved);
    assert_eq!(types.resolve_defers(resolved, &mut lookup_in(&scope)).unwrap(), resolved);
}

#[test]
fn test_resolve_plain_defer() {
    let (mut types, mut strings) = setup();
    let s64 = types.primitive(TypeKind::Int64);
    let name = strings.intern("T");
    let deferred = types.deferred(name);
    let ptr = types.pointer(deferred);

    let mut scope = HashMap::new();
    scope.insert(name, s64);
    let resolved = types.resolve_defers(ptr, &mut lookup_in(&scope)).unwrap();
    assert_eq!(resolved, types.pointer(s64));
}

#[test]
fn test_defer_errors() {
    let (mut types, mut strings) = setup();
    let a = strings.intern("A");
    let missing = types.deferred(a);
    let err = types.resolve_defers(missing, &mut |_| DeferTarget::Missing).unwrap_err();
    assert_eq!(err.describe(&strings), "Cannot resolve defers: Variable 'A' not found");

    let err = types.resolve_defers(missing, &mut |_| DeferTarget::NotAType).unwrap_err();
    assert_eq!(err.describe(&strings), "Cannot resolve defers: Variable 'A' is not a type");

    let err = types
        .resolve_defers(missing, &mut |_| DeferTarget::Type(missing))
        .unwrap_err();
    assert_eq!(err.describe(&strings), "Cannot resolve defers: Defer 'A' recurses");
}

#[test]
fn test_inline_self_reference_is_rejected() {
    let (mut types, mut strings) = setup();
    let name = strings.intern("Bad");
    let deferred = types.deferred(name);
    let mut inner = named(&mut strings, "inner", deferred);
    inner.inline = Some(1);
    let bad = types.structure(vec![inner], None).unwrap();

    let mut scope = HashMap::new();
    scope.insert(name, bad);
    let err = types.resolve_defers(bad, &mut lookup_in(&scope)).unwrap_err();
    assert_eq!(err.describe(&strings), "Cannot resolve defers: Inline field 'inner' recurses");
}

#[test]
fn test_sibling_inline_fields_of_same_type() {
    let (mut types, mut strings) = setup();
    let f32_ = types.primitive(TypeKind::Float32);
    let vec2 = types.structure(vec![named(&mut strings, "x", f32_)], None).unwrap();
    let mut a = named(&mut strings, "a", vec2);
    a.inline = Some(1);
    let mut b = named(&mut strings, "b", vec2);
    b.inline = Some(1);
    let pair = types.structure(vec![a, b], None).unwrap();
    assert!(types.resolve_defers(pair, &mut |_| DeferTarget::Missing).is_ok());
}

// ========== 출력 테스트 ==========

#[test]
fn test_display() {
    let (mut types, mut strings) = setup();
    let s32 = types.primitive(TypeKind::Int32);
    let u8_ = {
        let s8 = types.primitive(TypeKind::Int8);
        types.unsign(s8)
    };
    let cstr = {
        let s8 = types.primitive(TypeKind::Int8);
        let c = types.constant(s8);
        types.pointer(c)
    };
    assert_eq!(types.display(u8_, &strings), "u8");
    assert_eq!(types.display(cstr, &strings), "const s8#");

    let a = strings.intern("a");
    let varargs = types.primitive(TypeKind::Varargs);
    let func = types.function(
        s32,
        vec![Param { name: Some(a), ty: s32 }, Param { name: None, ty: varargs }],
        false,
    );
    assert_eq!(types.display(func, &strings), "s32<-(s32 a, ...)");

    let node_name = strings.intern("Node");
    let deferred = types.deferred(node_name);
    assert_eq!(types.display(deferred, &strings), "(defer Node)");
    let next = types.pointer(deferred);
    let node = types.structure(vec![named(&mut strings, "next", next)], None).unwrap();
    let mut scope = HashMap::new();
    scope.insert(node_name, node);
    let resolved = types.resolve_defers(node, &mut lookup_in(&scope)).unwrap();
    assert_eq!(types.display(resolved, &strings), "struct S1 { S1# next @ 0; }");
}
