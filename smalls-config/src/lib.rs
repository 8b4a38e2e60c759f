//! Smalls Config - Pure configuration data structures
//!
//! This crate contains only data structures, no logic or global state.
//! It serves as the shared configuration vocabulary across all Smalls crates.

use serde::{Deserialize, Serialize};

/// 编译后保留多少调试状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugLevel {
    /// 保留源码和 AST
    Full,
    /// 丢弃 AST，仅为导出类型的模块保留源码
    #[default]
    SourceMap,
    /// 编译后丢弃 AST 和源码
    None,
}

impl DebugLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebugLevel::Full => "full",
            DebugLevel::SourceMap => "source_map",
            DebugLevel::None => "none",
        }
    }
}

/// Configuration for compiler behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Whether to record instruction -> source line maps
    pub emit_line_map: bool,
    /// Emit TAILCALL for calls in tail position
    pub enable_tail_calls: bool,
}

/// Configuration for execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Instruction budget per top-level execution (0 = unlimited)
    pub gas_limit: u64,
    /// Maximum call depth
    pub max_call_depth: usize,
    /// Registers available to a single function frame
    pub max_registers: usize,
    /// Live-heap estimate that triggers a collection
    pub gc_threshold_bytes: usize,
}

/// Diagnostics and debug retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticConfig {
    pub debug_level: DebugLevel,
    /// Stop collecting after this many errors per script (0 = no cap)
    pub max_errors: usize,
    pub warnings_as_errors: bool,
}

/// Everything a runtime instance needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub compiler: CompilerConfig,
    pub limits: LimitConfig,
    pub diagnostics: DiagnosticConfig,
    /// Directories searched for `import a.b.c`
    pub module_paths: Vec<String>,
}

/// Execution phase enum for phase-specific configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lexer,
    Parser,
    Resolver,
    Compiler,
    Vm,
    Gc,
    Runtime,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Lexer,
        Phase::Parser,
        Phase::Resolver,
        Phase::Compiler,
        Phase::Vm,
        Phase::Gc,
        Phase::Runtime,
    ];

    /// Get the string name of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Lexer => "lexer",
            Phase::Parser => "parser",
            Phase::Resolver => "resolver",
            Phase::Compiler => "compiler",
            Phase::Vm => "vm",
            Phase::Gc => "gc",
            Phase::Runtime => "runtime",
        }
    }

    /// Get the log target name for this phase
    pub fn target(&self) -> String {
        format!("smalls::{}", self.as_str())
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            emit_line_map: true,
            enable_tail_calls: true,
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            gas_limit: 100_000,
            max_call_depth: 1024,
            max_registers: 250,
            gc_threshold_bytes: 1024 * 1024,
        }
    }
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            debug_level: DebugLevel::SourceMap,
            max_errors: 0,
            warnings_as_errors: false,
        }
    }
}

/// 从 JSON 文本解析任意配置段
pub fn from_json<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_compiler_config() {
        let cfg = CompilerConfig::default();
        assert!(cfg.emit_line_map);
        assert!(cfg.enable_tail_calls);
    }

    #[test]
    fn test_default_limit_config() {
        let cfg = LimitConfig::default();
        assert_eq!(cfg.gas_limit, 100_000);
        assert_eq!(cfg.max_call_depth, 1024);
    }

    #[test]
    fn test_phase_as_str() {
        assert_eq!(Phase::Lexer.as_str(), "lexer");
        assert_eq!(Phase::Vm.target(), "smalls::vm");
        assert_eq!(Phase::ALL.len(), 7);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: LimitConfig = from_json(r#"{ "gas_limit": 0 }"#).unwrap();
        assert_eq!(cfg.gas_limit, 0);
        assert_eq!(cfg.max_call_depth, 1024);

        let diag: DiagnosticConfig = from_json(r#"{ "debug_level": "none" }"#).unwrap();
        assert_eq!(diag.debug_level, DebugLevel::None);
        assert_eq!(diag.debug_level.as_str(), "none");
    }

    #[test]
    fn test_nested_runtime_config() {
        let cfg: RuntimeConfig =
            from_json(r#"{ "limits": { "max_call_depth": 64 }, "module_paths": ["scripts"] }"#)
                .unwrap();
        assert_eq!(cfg.limits.max_call_depth, 64);
        assert_eq!(cfg.limits.gas_limit, 100_000);
        assert!(cfg.compiler.enable_tail_calls);
        assert_eq!(cfg.module_paths, vec!["scripts".to_string()]);
    }
}
