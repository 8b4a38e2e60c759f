//! Smalls API - Execution orchestration layer
//!
//! Provides unified execution interface, including:
//! - Execution flow orchestration
//! - Configuration abstraction (RunConfig)
//! - Unified error handling (SmallsError)
//!
//! For CLI convenience, this crate provides a global singleton API.
//! For library use, prefer the explicit `run(source, &config)` API.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use tracing::{debug, info};

use smalls_core::Runtime;

// Re-export config
pub mod config;
pub use config::{config as get_config, init as init_config, is_initialized, RunConfig};

// Re-export config types from smalls_config
pub use smalls_config::{
    CompilerConfig, DebugLevel, DiagnosticConfig, LimitConfig, Phase, RuntimeConfig,
};

// Re-export error and types
pub mod error;
pub mod types;
pub use error::{ErrorReport, SmallsError};
pub use types::{CompileOutput, ExecuteOutput};

// Re-export core types
pub use smalls_config;
pub use smalls_core;
pub use smalls_core::{Diagnostic, Severity, Value};

/// Execute with explicit configuration
///
/// This is the recommended API for library users.
pub fn run(source: impl AsRef<[u8]>, config: &RunConfig) -> Result<ExecuteOutput, SmallsError> {
    info!(target: "smalls::runtime", module = %config.module, entry = %config.entry, "starting execution");

    let mut rt = new_runtime(config)?;
    let compiled = compile_with_config(&mut rt, source, config)?;

    if config.dump_bytecode {
        debug!(target: "smalls::compiler", "\n{}", compiled.bytecode.disassemble());
    }

    let output = execute_with_config(&mut rt, &compiled, config)?;

    info!(target: "smalls::runtime", instructions = output.instructions, "execution completed");
    Ok(output)
}

/// 按配置创建运行时：搜索路径、用户 prelude、输出去向
pub fn new_runtime(config: &RunConfig) -> Result<Runtime, SmallsError> {
    let mut rt = Runtime::with_config(config.runtime.clone());
    if !config.capture_output {
        rt.set_output(|text| {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        });
    }
    if let Some(prelude) = &config.user_prelude {
        rt.set_user_prelude(prelude)?;
    }
    Ok(rt)
}

/// Compile with explicit configuration
///
/// 源码注册为 `config.module`；返回校验过的字节码和警告。
/// 源码可以是未解码的字节，非法 UTF-8 按词法错误报告
pub fn compile_with_config(
    rt: &mut Runtime,
    source: impl AsRef<[u8]>,
    config: &RunConfig,
) -> Result<CompileOutput, SmallsError> {
    let module = rt.load_module_from_bytes(&config.module, source.as_ref())?;
    let bytecode = rt.compile_script(module)?;
    let warnings = rt
        .script(module)
        .map(|s| s.diagnostics().to_vec())
        .unwrap_or_default();

    debug!(
        target: "smalls::compiler",
        module = %config.module,
        functions = bytecode.functions.len(),
        constants = bytecode.constants.len(),
        warnings = warnings.len(),
        "compilation completed"
    );

    Ok(CompileOutput {
        module,
        path: config.module.clone(),
        bytecode,
        warnings,
    })
}

/// Execute with explicit configuration
///
/// 调用 `config.entry`；额度取 `config.runtime.limits.gas_limit`
pub fn execute_with_config(
    rt: &mut Runtime,
    compiled: &CompileOutput,
    config: &RunConfig,
) -> Result<ExecuteOutput, SmallsError> {
    let captured = config.capture_output.then(|| {
        let buffer = Rc::new(RefCell::new(String::new()));
        let sink = buffer.clone();
        rt.set_output(move |text| sink.borrow_mut().push_str(text));
        buffer
    });

    let before = rt.stats().instructions_executed;
    let result = rt.execute_script(compiled.module, &config.entry, &[], config.gas());
    let instructions = rt.stats().instructions_executed - before;

    if result.failed {
        return Err(SmallsError::Runtime {
            message: result.error_message,
            stack_trace: result.stack_trace,
            module: result.error_module,
            line: result.error_line,
            snippet: result.error_snippet,
        });
    }

    let stdout = captured
        .map(|b| b.borrow().clone())
        .unwrap_or_default();
    Ok(ExecuteOutput {
        value: result.value,
        display: rt.display(&result.value),
        stdout,
        instructions,
    })
}

// ==================== Global config API ====================

/// Compile and run (uses global config)
pub fn compile_and_run(source: &str) -> Result<ExecuteOutput, SmallsError> {
    run(source, get_config())
}

/// Quick run with default config (auto-initializes if needed)
pub fn quick_run(source: &str) -> Result<ExecuteOutput, SmallsError> {
    if !is_initialized() {
        // 并发初始化时另一方先设置也无妨
        let _ = init_config(RunConfig::default());
    }
    compile_and_run(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured() -> RunConfig {
        RunConfig {
            capture_output: true,
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_run_with_explicit_config() {
        let out = run("fn main(): int { return 42; }", &captured()).unwrap();
        assert_eq!(out.value.as_int(), Some(42));
        assert_eq!(out.display, "42");
        assert!(out.instructions > 0);
    }

    #[test]
    fn test_quick_run() {
        let result = quick_run("fn main(): int { return 6 * 7; }");
        assert!(result.is_ok());
    }
}
