use super::*;
use crate::types::TypeKind;
use crate::vm::bytecode::{AllocForm, BytecodeReader, Chunk};
use pretty_assertions::assert_eq;

fn compile_str(source: &str) -> (Vec<u8>, StringPool) {
    let mut strings = StringPool::new();
    let bytes = compile(source, "test.paw", &mut strings).unwrap();
    (bytes, strings)
}

fn compile_err(source: &str) -> SyntaxError {
    let mut strings = StringPool::new();
    compile(source, "test.paw", &mut strings).unwrap_err()
}

/// Reader positioned after the file name header.
fn reader(bytes: Vec<u8>) -> BytecodeReader {
    let mut r = BytecodeReader::new(Chunk::new(bytes));
    r.str();
    r
}

/// Opcode of the next node, skipping its position.
fn node(r: &mut BytecodeReader) -> Opcode {
    let op = r.opcode();
    if op != Opcode::End {
        r.i32();
        r.i32();
    }
    op
}

// ========== 식 테스트 ==========

#[test]
fn test_empty_program() {
    let (bytes, strings) = compile_str("");
    let mut expected = BytecodeWriter::new();
    expected.str(strings.get("test.paw").unwrap()).end();
    assert_eq!(bytes, expected.into_bytes());
}

#[test]
fn test_precedence_to_postfix() {
    let (bytes, strings) = compile_str("3 + 4 * 2;");
    let mut expected = BytecodeWriter::new();
    expected.str(strings.get("test.paw").unwrap());
    expected.op(Opcode::Expr, 1, 1);
    expected.op(Opcode::Integer, 1, 1).u64(3);
    expected.op(Opcode::Integer, 1, 5).u64(4);
    expected.op(Opcode::Integer, 1, 9).u64(2);
    expected.op(Opcode::Multiplication, 1, 7);
    expected.op(Opcode::Addition, 1, 3);
    expected.end();
    expected.end();
    assert_eq!(bytes, expected.into_bytes());
}

#[test]
fn test_left_associativity() {
    let (bytes, _) = compile_str("10 - 4 - 3;");
    let mut r = reader(bytes);
    assert_eq!(node(&mut r), Opcode::Expr);
    assert_eq!(node(&mut r), Opcode::Integer);
    r.u64();
    assert_eq!(node(&mut r), Opcode::Integer);
    r.u64();
    assert_eq!(node(&mut r), Opcode::Subtraction);
    assert_eq!(node(&mut r), Opcode::Integer);
    r.u64();
    assert_eq!(node(&mut r), Opcode::Subtraction);
    assert_eq!(node(&mut r), Opcode::End);
}

#[test]
fn test_assignment_is_right_associative() {
    let (bytes, strings) = compile_str("a = b = 1;");
    let mut r = reader(bytes);
    assert_eq!(node(&mut r), Opcode::Expr);
    assert_eq!(node(&mut r), Opcode::Variable);
    assert_eq!(strings.resolve(r.str()), "a");
    assert_eq!(node(&mut r), Opcode::Variable);
    assert_eq!(strings.resolve(r.str()), "b");
    assert_eq!(node(&mut r), Opcode::Integer);
    assert_eq!(r.u64(), 1);
    assert_eq!(node(&mut r), Opcode::Assign);
    assert_eq!(node(&mut r), Opcode::Assign);
    assert_eq!(node(&mut r), Opcode::End);
}

#[test]
fn test_prefix_operators_follow_operand() {
    let (bytes, _) = compile_str("-!x++;");
    let mut r = reader(bytes);
    assert_eq!(node(&mut r), Opcode::Expr);
    assert_eq!(node(&mut r), Opcode::Variable);
    r.str();
    assert_eq!(node(&mut r), Opcode::SuffixIncrement);
    assert_eq!(node(&mut r), Opcode::LogicNegate);
    assert_eq!(node(&mut r), Opcode::ArithNegate);
    assert_eq!(node(&mut r), Opcode::End);
}

#[test]
fn test_declaration_with_initializer() {
    let (bytes, strings) = compile_str("u64 count = 5;");
    let mut r = reader(bytes);
    assert_eq!(node(&mut r), Opcode::Expr);
    assert_eq!(node(&mut r), Opcode::Type);
    assert!(!r.bool());
    assert_eq!(r.u8(), TypeKind::Int64 as u8);
    assert!(r.bool());
    assert_eq!(node(&mut r), Opcode::Decl);
    assert!(!r.bool());
    assert_eq!(strings.resolve(r.str()), "count");
    assert!(!r.bool(), "no generic parameters");
    assert!(!r.bool(), "no body");
    assert_eq!(node(&mut r), Opcode::Integer);
    assert_eq!(r.u64(), 5);
    assert_eq!(node(&mut r), Opcode::Assign);
    assert_eq!(node(&mut r), Opcode::End);
}

#[test]
fn test_function_declaration_needs_no_semicolon() {
    let (bytes, _) = compile_str("s32 <- (s32 a, ...) f { return a; } f(1);");
    let mut r = reader(bytes);
    assert_eq!(node(&mut r), Opcode::Expr);
    assert_eq!(node(&mut r), Opcode::Type);
    r.bool();
    r.u8();
    r.bool();
    assert_eq!(node(&mut r), Opcode::Function);
    assert!(!r.bool(), "returns by value");
    // s32 a
    assert_eq!(node(&mut r), Opcode::Type);
    r.bool();
    r.u8();
    r.bool();
    assert_eq!(node(&mut r), Opcode::End);
    assert!(r.bool());
    r.str();
    // ...
    assert_eq!(node(&mut r), Opcode::Type);
    r.bool();
    assert_eq!(r.u8(), TypeKind::Varargs as u8);
    r.bool();
    assert_eq!(node(&mut r), Opcode::End);
    assert!(!r.bool());
    assert_eq!(node(&mut r), Opcode::End);
    assert_eq!(node(&mut r), Opcode::Decl);
    assert!(!r.bool());
    r.str();
    assert!(!r.bool());
    assert!(r.bool(), "has body");
    assert_eq!(r.capture_mode(), CaptureMode::None);
    let mut body = r.enter();
    assert_eq!(node(&mut body), Opcode::Return);
    assert_eq!(node(&mut r), Opcode::End);
    assert_eq!(node(&mut r), Opcode::Expr);
}

#[test]
fn test_new_forms() {
    let (bytes, _) = compile_str("new scoped [s32](4){1, 2};");
    let mut r = reader(bytes);
    assert_eq!(node(&mut r), Opcode::Expr);
    assert_eq!(node(&mut r), Opcode::New);
    assert!(r.bool(), "scoped");
    assert_eq!(node(&mut r), Opcode::Type);
    r.bool();
    r.u8();
    r.bool();
    assert_eq!(node(&mut r), Opcode::End);
    assert_eq!(r.alloc_form(), AllocForm::Array);

    let (bytes, _) = compile_str("new [Point]{.x = 1, .y = 2};");
    let mut r = reader(bytes);
    node(&mut r);
    assert_eq!(node(&mut r), Opcode::New);
    assert!(!r.bool());
    assert_eq!(node(&mut r), Opcode::Variable);
    r.str();
    assert_eq!(node(&mut r), Opcode::End);
    assert_eq!(r.alloc_form(), AllocForm::Struct);
}

// ========== 문장 테스트 ==========

#[test]
fn test_for_bounds_default_inclusive() {
    let (bytes, _) = compile_str("for s32 i: 1 => 5 {}");
    let mut r = reader(bytes);
    assert_eq!(node(&mut r), Opcode::For);
    assert_eq!(node(&mut r), Opcode::Type);
    r.bool();
    r.u8();
    r.bool();
    assert_eq!(node(&mut r), Opcode::End);
    r.str();
    assert_eq!(node(&mut r), Opcode::Integer);
    r.u64();
    assert_eq!(node(&mut r), Opcode::End);
    assert!(!r.bool(), "lower bound inclusive");
    assert_eq!(node(&mut r), Opcode::Integer);
    r.u64();
    assert_eq!(node(&mut r), Opcode::End);
    assert!(!r.bool(), "upper bound inclusive");
    assert!(!r.bool(), "no step");
}

#[test]
fn test_for_exclusive_upper_bound_and_step() {
    let (bytes, _) = compile_str("for s32 i: 5 => 1 excl step -1 {}");
    let mut r = reader(bytes);
    node(&mut r);
    node(&mut r);
    r.bool();
    r.u8();
    r.bool();
    node(&mut r);
    r.str();
    node(&mut r);
    r.u64();
    node(&mut r);
    assert!(!r.bool());
    node(&mut r);
    r.u64();
    node(&mut r);
    assert!(r.bool(), "upper bound exclusive");
    assert!(r.bool(), "has step");
}

#[test]
fn test_else_if_chain_nests() {
    let (bytes, _) = compile_str("if a {} else if b {} else {}");
    let mut r = reader(bytes);
    assert_eq!(node(&mut r), Opcode::If);
    assert_eq!(node(&mut r), Opcode::Variable);
    r.str();
    assert_eq!(node(&mut r), Opcode::End);
    r.skip();
    assert!(r.bool());
    let mut else_block = r.enter();
    assert_eq!(node(&mut else_block), Opcode::If);
    assert_eq!(node(&mut r), Opcode::End);
}

#[test]
fn test_try_catch_silently() {
    let (bytes, _) = compile_str("try { throw 1; } catch silently;");
    let mut r = reader(bytes);
    assert_eq!(node(&mut r), Opcode::Try);
    let mut body = r.enter();
    assert_eq!(node(&mut body), Opcode::Throw);
    assert!(r.bool(), "has catch");
    assert!(r.bool(), "silently");
    assert!(!r.bool(), "no binding");
    let mut handler = r.enter();
    assert_eq!(node(&mut handler), Opcode::End);
}

// ========== 에러 테스트 ==========

#[test]
fn test_syntax_errors() {
    let cases = [
        ("s32 x = ;", "Expected expression"),
        ("(1;", "Expected ')'"),
        ("extern 5;", "Unexpected 'extern'"),
        ("x::foo;", "Expected 'size', 'length' or 'scope'"),
        ("const;", "Expected base type"),
        ("f(1 2);", "Expected ',' or ')'"),
        ("x = 1", "Expected ';'"),
        ("struct { s32 };", "Expected 'new', 'delete' or identifier"),
        ("struct { inline(2) Vec };", "Expected identifier"),
        ("struct { void<-() new; };", "Expected '{' or '=>'"),
        ("struct { inline Vec v = 1; };", "Cannot pre-assign to an inline field"),
        ("s32 <- () f [x] {}", "Expected '=', `~` or '$'"),
        ("include 5;", "Expected a string literal"),
        ("for s32 i 1 => 2 {}", "Expected ':'"),
        ("new [s32]{.x = 1; .y = 2};", "Expected ',' or '}'"),
    ];
    for (source, message) in cases {
        assert_eq!(compile_err(source).message, message, "source: {}", source);
    }
}

#[test]
fn test_error_position() {
    let err = compile_err("s32 x = 1;\nx = (2;");
    assert_eq!(err.message, "Expected ')'");
    assert_eq!((err.row, err.col), (2, 7));
    assert_eq!(err.file, "test.paw");
}
