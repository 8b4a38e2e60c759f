use std::rc::Rc;

use smalls_config::CompilerConfig;

use super::compile_module;
use crate::compiler::parser::parse;
use crate::compiler::resolver::test_env::{messages, EmptyEnv};
use crate::compiler::resolver::{resolve_module, ModuleId};
use crate::compiler::types::TypeTable;
use crate::kit::Context;
use crate::runtime::bytecode::{
    decode_op, verify_module, BytecodeModule, CompiledFunction, OpCode, UpvalueDescriptor,
};

fn compile_with(src: &str, config: &CompilerConfig) -> BytecodeModule {
    let parsed = parse(src, "test");
    assert!(!parsed.has_errors(), "parse errors: {:?}", parsed.parser_errors);
    let ast = Rc::new(parsed.ast);
    let mut types = TypeTable::new();
    let mut ctx = Context::new("test", Default::default());
    let env = EmptyEnv;
    let resolved = resolve_module(&env, &mut types, &mut ctx, ModuleId(0), "test", ast.clone());
    assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
    let module = compile_module(&resolved, ast, &mut types, &env, config, 250)
        .expect("codegen should succeed");
    verify_module(&module, resolved.globals.len() as u32).expect("bytecode should verify");
    module
}

fn compile(src: &str) -> BytecodeModule {
    compile_with(src, &CompilerConfig::default())
}

fn function<'m>(module: &'m BytecodeModule, name: &str) -> &'m CompiledFunction {
    module
        .functions
        .iter()
        .find(|f| f.name == name)
        .unwrap_or_else(|| panic!("no function named {}", name))
}

fn ops(f: &CompiledFunction) -> Vec<OpCode> {
    f.instructions
        .iter()
        .map(|w| decode_op(*w).expect("valid opcode"))
        .collect()
}

#[test]
fn test_arithmetic_function() {
    let m = compile("fn add(a: int, b: int): int { return a + b; }");
    let f = function(&m, "add");
    assert_eq!(f.param_count, 2);
    let ops = ops(f);
    assert!(ops.contains(&OpCode::Add));
    assert_eq!(ops.last(), Some(&OpCode::Ret));
    assert!(f.debug_line_map.is_some());
}

#[test]
fn test_void_function_gets_implicit_return() {
    let m = compile("fn f() { var x = 1; x = x + 2; }");
    assert_eq!(ops(function(&m, "f")).last(), Some(&OpCode::RetVoid));
}

#[test]
fn test_tail_call_can_be_disabled() {
    let src = "fn down(n: int): int { if (n == 0) { return 0; } return down(n - 1); }";
    let m = compile(src);
    assert!(ops(function(&m, "down")).contains(&OpCode::TailCall));

    let config = CompilerConfig {
        enable_tail_calls: false,
        ..CompilerConfig::default()
    };
    let m = compile_with(src, &config);
    let ops = ops(function(&m, "down"));
    assert!(!ops.contains(&OpCode::TailCall));
    assert!(ops.contains(&OpCode::Call));
}

#[test]
fn test_primitive_condition_uses_skip_compare() {
    let m = compile("fn f(a: int, b: int): int { if (a < b) { return 1; } return 2; }");
    let ops = ops(function(&m, "f"));
    assert!(ops.contains(&OpCode::IsLt));
    assert!(!ops.contains(&OpCode::Lt));
}

#[test]
fn test_foreach_over_array() {
    let m = compile(
        "fn sum(xs: int[]): int { var t = 0; for (x in xs) { t = t + x; } return t; }",
    );
    let ops = ops(function(&m, "sum"));
    for op in [OpCode::Len, OpCode::IsLt, OpCode::GetIndex, OpCode::Add] {
        assert!(ops.contains(&op), "missing {:?}", op);
    }
}

#[test]
fn test_switch_on_sum_type() {
    let m = compile(
        "type Shape = Circle(float) | Rect(float, float);\n\
         fn area(s: Shape): float {\n\
           switch (s) { case Circle(r): return r * r; case Rect(w, h): return w * h; }\n\
         }",
    );
    let ops = ops(function(&m, "area"));
    assert!(ops.contains(&OpCode::SumTag));
    assert!(ops.contains(&OpCode::IsEq));
    assert_eq!(ops.iter().filter(|o| **o == OpCode::SumPayload).count(), 2);
    assert!(ops.contains(&OpCode::GetField));
}

#[test]
fn test_closure_upvalues() {
    let m = compile(
        "fn counter(): fn(): int {\n\
           var n = 0;\n\
           return fn(): int { n = n + 1; return n; };\n\
         }",
    );
    let outer = function(&m, "counter");
    assert!(ops(outer).contains(&OpCode::Closure));
    let closure = m
        .functions
        .iter()
        .find(|f| f.name.ends_with("$closure"))
        .expect("closure function");
    assert_eq!(closure.upvalue_descriptors, vec![UpvalueDescriptor::Local(0)]);
    let inner = ops(closure);
    assert!(inner.contains(&OpCode::GetUpval));
    assert!(inner.contains(&OpCode::SetUpval));
}

#[test]
fn test_global_initializer() {
    let m = compile("var g: int = 3;\nvar h: string;\nfn get(): int { return g; }");
    let init = m.init.expect("module has an initializer") as usize;
    let init = &m.functions[init];
    assert_eq!(init.name, "__init");
    let ops = ops(init);
    assert_eq!(ops.iter().filter(|o| **o == OpCode::SetGlobal).count(), 2);
    assert!(ops.contains(&OpCode::LoadNil));
    assert!(self::ops(function(&m, "get")).contains(&OpCode::GetGlobal));
}

#[test]
fn test_line_map_can_be_dropped() {
    let config = CompilerConfig {
        emit_line_map: false,
        ..CompilerConfig::default()
    };
    let m = compile_with("fn f(): int { return 1; }", &config);
    assert!(function(&m, "f").debug_line_map.is_none());
}

#[test]
fn test_loop_break_and_continue() {
    let m = compile(
        "fn f(): int {\n\
           var n = 0;\n\
           for (var i = 0; i < 10; i = i + 1) { if (i == 3) { continue; } if (i == 7) { break; } n = n + i; }\n\
           return n;\n\
         }",
    );
    let ops = ops(function(&m, "f"));
    assert!(ops.iter().filter(|o| **o == OpCode::Jmp).count() >= 3);
}
