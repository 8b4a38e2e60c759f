//! 多模块测试
//!
//! 导入、导出、循环依赖、模块初始化顺序、源码加载器

mod common;
use common::{capture_output, load};
use smalls_core::runtime::ExportKind;
use smalls_core::{
    DebugLevel, DiagnosticConfig, MemoryLoader, Runtime, RuntimeConfig, RuntimeError, ScriptState,
};

fn runtime_with(files: &[(&str, &str)]) -> Runtime {
    let mut rt = Runtime::new();
    rt.add_loader(MemoryLoader::with_files(files.iter().copied()));
    rt
}

// ===== 导入 =====

#[test]
fn test_aliased_import() {
    let mut rt = runtime_with(&[(
        "util.math",
        "fn square(x: int): int { return x * x; }",
    )]);
    let id = load(
        &mut rt,
        "main",
        "import util.math as m;\nfn main(): int { return m.square(7); }",
    );
    assert_eq!(rt.execute_script(id, "main", &[], 0).value.as_int(), Some(49));
}

#[test]
fn test_selective_import_of_types_and_functions() {
    let mut rt = runtime_with(&[(
        "geo",
        "type Point { x, y: int; }\nfn origin(): Point { return { x = 0, y = 0 }; }",
    )]);
    let id = load(
        &mut rt,
        "main",
        "from geo import { Point, origin };\n\
         fn main(): int { var p: Point = origin(); p.x = 3; return p.x + p.y; }",
    );
    assert_eq!(rt.execute_script(id, "main", &[], 0).value.as_int(), Some(3));
}

#[test]
fn test_underscore_names_are_private() {
    let mut rt = runtime_with(&[("lib", "fn _secret(): int { return 1; }\nfn open(): int { return _secret(); }")]);
    let err = rt
        .load_module_from_source("main", "from lib import { _secret };")
        .unwrap_err();
    assert!(err.to_string().contains("module 'lib' has no export '_secret'"), "{}", err);

    let lib = rt.module_id("lib").unwrap();
    let exports = rt.script(lib).unwrap().exports();
    assert_eq!(exports, vec![("open".to_string(), ExportKind::Function)]);
}

#[test]
fn test_unknown_module() {
    let mut rt = Runtime::new();
    let err = rt
        .load_module_from_source("main", "import nowhere.at.all as x;")
        .unwrap_err();
    assert!(err.to_string().contains("unknown module 'nowhere.at.all'"), "{}", err);
    assert_eq!(
        rt.load_module("nowhere.at.all").unwrap_err(),
        RuntimeError::ModuleNotFound("nowhere.at.all".to_string())
    );
}

#[test]
fn test_circular_import() {
    let mut rt = runtime_with(&[
        ("a", "import b as b;\nfn fa(): int { return 1; }"),
        ("b", "import a as a;\nfn fb(): int { return 2; }"),
    ]);
    let err = rt.load_module("a").unwrap_err();
    assert_eq!(
        err,
        RuntimeError::CircularImport(vec!["a".into(), "b".into(), "a".into()])
    );
    assert_eq!(err.to_string(), "circular import: a -> b -> a");
    // 失败的加载不缓存
    assert!(rt.module_id("a").is_none());
    assert!(rt.module_id("b").is_none());
}

#[test]
fn test_modules_are_cached() {
    let mut rt = runtime_with(&[("lib", "fn f(): int { return 1; }")]);
    let a = rt.load_module("lib").unwrap();
    let b = rt.load_module("lib").unwrap();
    assert_eq!(a, b);
}

// ===== 初始化 =====

#[test]
fn test_dependencies_initialize_first() {
    let mut rt = runtime_with(&[
        ("config", "var scale = 10;\nfn get_scale(): int { return scale; }"),
        (
            "game",
            "import config as c;\nvar base = c.get_scale() * 4;\nfn value(): int { return base + 2; }",
        ),
    ]);
    let id = rt.load_module("game").unwrap();
    assert_eq!(rt.execute_script(id, "value", &[], 0).value.as_int(), Some(42));
    let config = rt.module_id("config").unwrap();
    assert_eq!(rt.script(config).unwrap().state(), ScriptState::Ready);
}

#[test]
fn test_failing_init_marks_module_failed() {
    let mut rt = runtime_with(&[(
        "broken",
        "var zero = 0;\nvar bad = 10 / zero;\nfn f(): int { return bad; }",
    )]);
    let id = rt.load_module("broken").unwrap();
    let first = rt.execute_script(id, "f", &[], 0);
    assert!(first.failed);
    assert_eq!(rt.script(id).unwrap().state(), ScriptState::Failed);
    let second = rt.execute_script(id, "f", &[], 0);
    assert!(second.failed);
    assert_eq!(first.error_message, second.error_message);
}

#[test]
fn test_init_output_runs_once() {
    let mut rt = runtime_with(&[("noisy", "var x = announce();\nfn announce(): int { print(\"init\"); return 1; }\nfn f(): int { return x; }")]);
    let out = capture_output(&mut rt);
    let id = rt.load_module("noisy").unwrap();
    rt.execute_script(id, "f", &[], 0);
    rt.execute_script(id, "f", &[], 0);
    assert_eq!(out.borrow().as_str(), "init");
}

// ===== prelude =====

#[test]
fn test_user_prelude() {
    let mut rt = runtime_with(&[("game.prelude", "fn double(x: int): int { return x * 2; }")]);
    rt.set_user_prelude("game.prelude").unwrap();
    let id = load(&mut rt, "main", "fn main(): int { return double(21); }");
    assert_eq!(rt.execute_script(id, "main", &[], 0).value.as_int(), Some(42));
}

#[test]
fn test_core_modules_are_importable() {
    let mut rt = Runtime::new();
    let id = load(
        &mut rt,
        "main",
        "import core.math as math;\nfn main(): float { return math.floor(math.PI); }",
    );
    assert_eq!(rt.execute_script(id, "main", &[], 0).value.as_float(), Some(3.0));
}

// ===== 替换与调试级别 =====

#[test]
fn test_reloading_from_source_replaces_module() {
    let mut rt = Runtime::new();
    let v1 = load(&mut rt, "hot", "fn version(): int { return 1; }");
    let v2 = load(&mut rt, "hot", "fn version(): int { return 2; }");
    assert_ne!(v1, v2);
    assert_eq!(rt.module_id("hot"), Some(v2));
    assert_eq!(rt.execute_script(v2, "version", &[], 0).value.as_int(), Some(2));
}

#[test]
fn test_debug_level_drops_ast_and_source() {
    let config = RuntimeConfig {
        diagnostics: DiagnosticConfig {
            debug_level: DebugLevel::None,
            ..DiagnosticConfig::default()
        },
        ..RuntimeConfig::default()
    };
    let mut rt = Runtime::with_config(config);
    let id = load(&mut rt, "lean", "fn f(): int { return 1; }");
    assert!(rt.script(id).unwrap().source().is_some());
    rt.execute_script(id, "f", &[], 0);
    let script = rt.script(id).unwrap();
    assert!(script.ast_discarded());
    assert!(script.source().is_none());
    assert!(script.bytecode().is_some());
}

#[test]
fn test_generic_exports_survive_source_map_level() {
    let mut rt = runtime_with(&[("gen", "fn id(x: $T): $T { return x; }\nfn warm(): int { return id(1); }")]);
    let gen = rt.load_module("gen").unwrap();
    rt.execute_script(gen, "warm", &[], 0);
    assert!(rt.script(gen).unwrap().source().is_some());
    let id = load(&mut rt, "main", "from gen import { id };\nfn main(): string { return id(\"late\"); }");
    let res = rt.execute_script(id, "main", &[], 0);
    assert_eq!(rt.get_string(&res.value), Some("late"));
}

// ===== 文件系统 =====

#[test]
fn test_filesystem_loader() {
    let dir = std::env::temp_dir().join(format!("smalls-module-test-{}", std::process::id()));
    std::fs::create_dir_all(dir.join("pkg")).unwrap();
    std::fs::write(dir.join("pkg").join("tools.smalls"), "fn seven(): int { return 7; }").unwrap();

    let mut rt = Runtime::new();
    rt.add_module_path(&dir);
    let res = rt.execute_path("pkg.tools", "seven", &[], 0);
    assert_eq!(res.value.as_int(), Some(7));
    let id = rt.module_id("pkg.tools").unwrap();
    assert!(rt.script(id).unwrap().origin().ends_with("tools.smalls"));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_filesystem_invalid_utf8_is_lexical_error() {
    let dir = std::env::temp_dir().join(format!("smalls-utf8-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("bad.smalls"), b"fn main() {\n  var s = \"\xff\";\n}\n").unwrap();

    let mut rt = Runtime::new();
    rt.add_module_path(&dir);
    let err = rt.load_module("bad").unwrap_err();
    std::fs::remove_dir_all(&dir).ok();

    let RuntimeError::Compile { diagnostics, .. } = err else {
        panic!("expected compile error, got {:?}", err);
    };
    assert_eq!(diagnostics.len(), 1, "{:?}", diagnostics);
    assert_eq!(diagnostics[0].kind, smalls_core::kit::DiagnosticKind::Lexical);
    assert_eq!(diagnostics[0].message, "invalid UTF-8 in source");
    assert_eq!(diagnostics[0].range.start.line, 2);
}
