//! End-to-end resolution of a small multi-file package

use pretty_assertions::assert_eq;
use ridl_core::arena::{Arena, AstId, TypeId};
use ridl_core::fqname::FqName;
use ridl_core::scalar::ScalarKind;
use ridl_core::types::TypeKind;
use ridl_fixtures::demo_package;

fn parse_demo() -> (Arena, AstId) {
    let mut arena = Arena::new();
    let ast = demo_package()
        .parse(&mut arena, "demo.graphics@1.0::IComposer")
        .expect("demo package parses");
    (arena, ast)
}

fn ast_named(arena: &Arena, name: &str) -> AstId {
    let fq = FqName::parse(name).unwrap();
    arena
        .ast_ids()
        .find(|id| *arena.ast(*id).fqname() == fq)
        .expect("file was parsed")
}

fn type_named(arena: &Arena, ast: AstId, name: &str) -> TypeId {
    arena
        .find_defined_type(ast, &FqName::parse(name).unwrap())
        .map(|(id, _)| id)
        .expect("type is defined")
}

fn enum_values(arena: &Arena, id: TypeId) -> Vec<(String, u64, ScalarKind, bool)> {
    let TypeKind::Enum(data) = &arena.ty(id).kind else {
        panic!("not an enum");
    };
    data.values
        .iter()
        .map(|v| {
            let eval = arena.expr(v.expr.expect("resolved enum value")).evaluated();
            (v.name.clone(), eval.value, eval.kind, v.auto)
        })
        .collect()
}

#[test]
fn test_enum_values_autofill_and_evaluate() {
    let (arena, ast) = parse_demo();
    let types = ast_named(&arena, "demo.graphics@1.0::types");
    let format = type_named(&arena, types, "PixelFormat");

    assert_eq!(
        enum_values(&arena, format),
        vec![
            ("UNKNOWN".to_string(), 0, ScalarKind::UInt32, true),
            ("RGBA".to_string(), 1, ScalarKind::Int32, false),
            ("BGRA".to_string(), 2, ScalarKind::UInt32, true),
            ("YCBCR".to_string(), 16, ScalarKind::Int32, false),
        ]
    );
    assert_eq!(ast, ast_named(&arena, "demo.graphics@1.0::IComposer"));
}

#[test]
fn test_struct_layout() {
    let (arena, _) = parse_demo();
    let types = ast_named(&arena, "demo.graphics@1.0::types");

    let rect = arena.compound_layout(type_named(&arena, types, "Rect"));
    assert_eq!(rect.field_offsets, vec![0, 4, 8, 12]);
    assert_eq!(rect.overall.size, 16);
    assert_eq!(rect.overall.align, 4);

    let frame = arena.compound_layout(type_named(&arena, types, "Frame"));
    assert_eq!(frame.field_offsets, vec![0, 16, 24]);
    assert_eq!(frame.overall.size, 48);
    assert_eq!(frame.overall.align, 8);
}

#[test]
fn test_bitfield_has_its_enum_storage_layout() {
    let (arena, _) = parse_demo();
    let types = ast_named(&arena, "demo.graphics@1.0::types");
    let usage = arena.compound_layout(type_named(&arena, types, "Usage"));
    assert_eq!(usage.overall.size, 4);
    assert_eq!(usage.overall.align, 4);
}

#[test]
fn test_interface_method_serials() {
    let (arena, ast) = parse_demo();
    let composer = type_named(&arena, ast, "IComposer");
    let TypeKind::Interface(data) = &arena.ty(composer).kind else {
        panic!("not an interface");
    };

    let serials: Vec<(&str, Option<u32>, bool)> = data
        .methods
        .iter()
        .map(|m| (m.name.as_str(), m.serial, m.oneway))
        .collect();
    assert_eq!(
        serials,
        vec![
            ("getCapabilities", Some(1), false),
            ("present", Some(2), false),
            ("invalidate", Some(3), true),
        ]
    );
}

#[test]
fn test_cross_file_reference_resolves() {
    let (arena, ast) = parse_demo();
    let types = ast_named(&arena, "demo.graphics@1.0::types");
    let composer = type_named(&arena, ast, "IComposer");
    let TypeKind::Interface(data) = &arena.ty(composer).kind else {
        panic!("not an interface");
    };

    let frame_arg = &data.methods[1].args[0];
    assert_eq!(frame_arg.name, "frame");
    let target = arena.type_ref(frame_arg.ty).target().expect("resolved");
    assert_eq!(target, type_named(&arena, types, "Frame"));
    assert_eq!(
        arena.ty(target).fqname().unwrap().to_string(),
        "demo.graphics@1.0::Frame"
    );
}

#[test]
fn test_nested_enum_gets_scoped_name() {
    let (arena, ast) = parse_demo();
    let capability = type_named(&arena, ast, "IComposer.Capability");
    assert_eq!(
        arena.ty(capability).fqname().unwrap().to_string(),
        "demo.graphics@1.0::IComposer.Capability"
    );
    assert_eq!(
        enum_values(&arena, capability),
        vec![
            ("NONE".to_string(), 0, ScalarKind::UInt8, true),
            ("SIDEBAND".to_string(), 1, ScalarKind::Int32, true),
        ]
    );
}

#[test]
fn test_referenced_types_are_gathered() {
    let (arena, ast) = parse_demo();
    let referenced = arena.ast(ast).referenced_types();
    assert!(referenced.contains(&FqName::parse("demo.graphics@1.0::Frame").unwrap()));
    assert!(referenced.contains(&FqName::parse("ridl.base@1.0::IBase").unwrap()));
}

#[test]
fn test_post_parse_is_idempotent_on_a_completed_file() {
    let (mut arena, ast) = parse_demo();
    let types = ast_named(&arena, "demo.graphics@1.0::types");
    let format = type_named(&arena, types, "PixelFormat");
    let before = enum_values(&arena, format);

    arena.post_parse(ast).expect("second run is a no-op");
    arena.post_parse(types).expect("second run is a no-op");

    assert_eq!(enum_values(&arena, format), before);
}

#[test]
fn test_file_hash_is_recorded() {
    let (arena, ast) = parse_demo();
    let hash = arena.ast(ast).file_hash().expect("hashed");
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_super_interface_is_the_base() {
    let (arena, ast) = parse_demo();
    let composer = type_named(&arena, ast, "IComposer");
    let chain = arena.interface_chain(composer);
    assert_eq!(chain.len(), 2);
    assert_eq!(
        arena.ty(chain[1]).fqname().unwrap().to_string(),
        "ridl.base@1.0::IBase"
    );
    assert!(arena.is_root_interface(chain[1]));
}
