//! API 层端到端测试：编译、执行、错误报告

use smalls_api::{
    compile_with_config, execute_with_config, new_runtime, run, Phase, RunConfig, SmallsError,
};

fn config() -> RunConfig {
    RunConfig {
        capture_output: true,
        ..RunConfig::default()
    }
}

#[test]
fn test_run_captures_output() {
    let src = r#"
        fn main(): string {
            println("hello");
            print(1 + 2);
            return "done";
        }
    "#;
    let out = run(src, &config()).unwrap();
    assert_eq!(out.stdout, "hello\n3");
    assert_eq!(out.display, "done");
}

#[test]
fn test_custom_entry_and_module() {
    let cfg = RunConfig {
        module: "game.start".to_string(),
        entry: "boot".to_string(),
        ..config()
    };
    let out = run("fn boot(): int { return 7; }", &cfg).unwrap();
    assert_eq!(out.value.as_int(), Some(7));
}

#[test]
fn test_compile_then_execute_twice() {
    let cfg = config();
    let mut rt = new_runtime(&cfg).unwrap();
    let compiled = compile_with_config(
        &mut rt,
        "var n = 0;\nfn main(): int { n = n + 1; return n; }",
        &cfg,
    )
    .unwrap();
    assert!(compiled.warnings.is_empty());
    assert!(compiled.bytecode.disassemble().contains("main"));

    let first = execute_with_config(&mut rt, &compiled, &cfg).unwrap();
    let second = execute_with_config(&mut rt, &compiled, &cfg).unwrap();
    assert_eq!(first.value.as_int(), Some(1));
    assert_eq!(second.value.as_int(), Some(2));
}

#[test]
fn test_compile_error_report() {
    let err = run("fn main() {\n  var s: string = 5;\n}", &config()).unwrap_err();
    assert!(matches!(err, SmallsError::Compile { .. }));
    assert_eq!(err.line(), Some(2));
    assert_eq!(err.phase(), Phase::Resolver);
    let report = err.to_report();
    assert_eq!(report.module.as_deref(), Some("main"));
    assert!(report.message.contains("type mismatch"), "{}", report.message);
}

#[test]
fn test_syntax_error_phase() {
    let err = run("fn main( {", &config()).unwrap_err();
    assert_eq!(err.phase(), Phase::Parser);
    assert_eq!(err.to_report().error_kind, "SyntaxError");
}

#[test]
fn test_runtime_error_report() {
    let src = "fn inner(d: int): int {\n  return 1 / d;\n}\nfn main(): int {\n  var r = inner(0);\n  return r;\n}";
    let err = run(src, &config()).unwrap_err();
    match &err {
        SmallsError::Runtime {
            stack_trace,
            module,
            line,
            ..
        } => {
            assert_eq!(stack_trace.len(), 2);
            assert_eq!(module.as_deref(), Some("main"));
            assert_eq!(*line, Some(2));
        }
        other => panic!("expected a runtime error, got {:?}", other),
    }
    let json: serde_json::Value = serde_json::from_str(&err.to_report().to_json()).unwrap();
    assert_eq!(json["phase"], "vm");
    assert_eq!(json["line"], 2);
    assert_eq!(json["notes"][0], "inner (main:2)");
    assert_eq!(json["notes"][1], "main (main:5)");
}

#[test]
fn test_invalid_utf8_source_is_lexical_error() {
    let src: &[u8] = b"fn main(): int {\n  var s = \"\xff\";\n  return 1;\n}";
    let err = run(src, &config()).unwrap_err();
    assert_eq!(err.phase(), Phase::Lexer);
    assert_eq!(err.line(), Some(2));
    let report = err.to_report();
    assert_eq!(report.error_kind, "LexicalError");
    assert_eq!(report.message, "invalid UTF-8 in source");
}

#[test]
fn test_gas_limit_from_config() {
    let mut cfg = config();
    cfg.runtime.limits.gas_limit = 500;
    let err = run("fn main() { for {} }", &cfg).unwrap_err();
    assert_eq!(err.to_report().message, "Script exceeded execution limit");
}

#[test]
fn test_missing_entry_is_runtime_failure() {
    let cfg = RunConfig {
        entry: "nope".to_string(),
        ..config()
    };
    let err = run("fn main() {}", &cfg).unwrap_err();
    assert!(err.to_report().message.contains("has no function 'nope'"));
}

#[test]
fn test_unknown_user_prelude() {
    let cfg = RunConfig {
        user_prelude: Some("no.such.prelude".to_string()),
        ..config()
    };
    let err = new_runtime(&cfg).err().unwrap();
    assert!(matches!(err, SmallsError::Load(_)));
    assert_eq!(err.to_report().error_kind, "ModuleNotFound");
}
