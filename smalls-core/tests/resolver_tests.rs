//! 名称解析与类型检查测试
//!
//! 通过运行时装载源码，检查报告给宿主的诊断

mod common;
use common::{compile_errors, load};
use smalls_core::{Runtime, RuntimeError, Severity};

fn assert_error(src: &str, needle: &str) {
    let errs = compile_errors(src);
    assert!(
        errs.iter().any(|e| e.contains(needle)),
        "expected an error containing {:?}, got {:?}",
        needle,
        errs
    );
}

// ===== 类型检查 =====

#[test]
fn test_type_mismatch() {
    assert_error(
        "fn f() { var s: string = 5; }",
        "type mismatch: expected string, got int",
    );
}

#[test]
fn test_no_implicit_numeric_conversion() {
    assert_error(
        "fn f(): float { var x = 1; return x + 2.0; }",
        "operator '+' cannot be applied to int and float",
    );
}

#[test]
fn test_unknown_identifier() {
    let errs = compile_errors("fn f(): int { return missing; }");
    assert_eq!(errs.len(), 1, "{:?}", errs);
}

#[test]
fn test_missing_return() {
    assert_error(
        "fn f(x: int): int { if (x > 0) { return 1; } }",
        "does not return a value on every path",
    );
    assert!(compile_errors("fn f(): int { for { } }").is_empty());
}

#[test]
fn test_switch_must_be_exhaustive() {
    assert_error(
        "type R = Ok(int) | Err | Pending;\n\
         fn f(r: R): int { switch (r) { case Ok(v): return v; case Err: return -1; } return 0; }",
        "switch is not exhaustive: missing Pending",
    );
}

#[test]
fn test_argument_count() {
    assert_error("fn g(x: int) {}\nfn f() { g(1, 2); }", "expects 1 argument(s), got 2");
}

#[test]
fn test_constants_cannot_be_assigned() {
    assert_error("const K = 1;\nfn f() { K = 2; }", "cannot assign to constant 'K'");
}

#[test]
fn test_invalid_cast() {
    assert_error("fn f(): bool { return \"x\" as bool; }", "invalid cast from string to bool");
}

#[test]
fn test_propset_requires_annotation() {
    assert_error(
        "type S { n: int; }\nfn f(o: object) { get_propset!(S)(o); }",
        "not a [[propset]] struct",
    );
}

// ===== 诊断 =====

#[test]
fn test_compile_error_carries_module_and_position() {
    let mut rt = Runtime::new();
    let err = rt
        .load_module_from_source("game.bad", "fn f() {\n  var s: string = 5;\n}")
        .unwrap_err();
    match &err {
        RuntimeError::Compile { module, diagnostics } => {
            assert_eq!(module, "game.bad");
            assert_eq!(diagnostics[0].range.start.line, 2);
            assert_eq!(diagnostics[0].severity, Severity::Error);
        }
        other => panic!("expected a compile error, got {:?}", other),
    }
    assert!(err.to_string().starts_with("game.bad: "));
    assert!(rt.module_id("game.bad").is_none());
}

#[test]
fn test_parse_errors_are_reported() {
    let errs = compile_errors("fn f( { }");
    assert!(!errs.is_empty());
}

#[test]
fn test_deprecated_use_is_a_warning() {
    let mut rt = Runtime::new();
    let id = load(
        &mut rt,
        "test",
        "[[deprecated]] fn old() {}\nfn f() { old(); }",
    );
    let script = rt.script(id).unwrap();
    assert_eq!(
        script
            .diagnostics()
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count(),
        1
    );
}

// ===== 泛型 =====

#[test]
fn test_generic_function_instances() {
    let mut rt = Runtime::new();
    let id = load(
        &mut rt,
        "test",
        "fn first(xs: $T[]): $T { return xs[0]; }\n\
         fn a(): int { return first({1, 2}); }\n\
         fn b(): string { return first({\"x\", \"y\"}); }",
    );
    assert_eq!(rt.execute_script(id, "a", &[], 0).value.as_int(), Some(1));
    let b = rt.execute_script(id, "b", &[], 0);
    assert_eq!(rt.get_string(&b.value), Some("x"));
}

#[test]
fn test_generic_struct() {
    let mut rt = Runtime::new();
    let id = load(
        &mut rt,
        "test",
        "type Pair!($A, $B) { first: $A; second: $B; }\n\
         fn f(): int { var p: Pair!(int, string) = { first = 4, second = \"s\" }; return p.first; }",
    );
    assert_eq!(rt.execute_script(id, "f", &[], 0).value.as_int(), Some(4));
}

#[test]
fn test_return_only_generic_is_not_inferred() {
    assert_error(
        "fn mk(): $T { var x: $T; return x; }\nfn main(): int { return mk(); }",
        "could not infer type $T for call to 'mk'",
    );
}

// ===== 映射键 =====

#[test]
fn test_struct_key_needs_hash_and_eq() {
    assert_error(
        "type K { a: int; }\nfn f(): int { var m = map!(K, int)(); return map_len(m); }",
        "K cannot be used as a map key",
    );
    assert_error(
        "type K { a: int; }\n\
         [[operator(eq)]] fn keq(x: K, y: K): bool { return x.a == y.a; }\n\
         fn f(): int { var m = map!(K, int)(); return map_len(m); }",
        "K cannot be used as a map key",
    );
}

#[test]
fn test_newtype_over_object_is_not_a_key() {
    assert_error(
        "type H(object);\nfn f(): int { var m = map!(H, int)(); return map_len(m); }",
        "H cannot be used as a map key",
    );
    assert_error(
        "fn f(): int { var m = map!(object, int)(); return map_len(m); }",
        "type object cannot be used as a map key",
    );
}

#[test]
fn test_hashable_keys_are_accepted() {
    let src = "type Id(int);\n\
         fn f(k: Key): int { var m = map!(Key, int)(); var n = map!(Id, int)(); return map_len(m) + map_len(n); }\n\
         type Key { a: int; }\n\
         [[operator(hash)]] fn khash(k: Key): int { return k.a; }\n\
         [[operator(eq)]] fn keq(x: Key, y: Key): bool { return x.a == y.a; }";
    let errs = compile_errors(src);
    assert!(errs.is_empty(), "{:?}", errs);
}
