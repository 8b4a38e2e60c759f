//! API 错误类型
//!
//! 提供统一的错误类型和结构化错误报告。

use serde::Serialize;
use thiserror::Error;

use smalls_config::Phase;
use smalls_core::kit::DiagnosticKind;
use smalls_core::{Diagnostic, RuntimeError, Severity};

/// Smalls 错误类型
#[derive(Error, Debug, Clone)]
pub enum SmallsError {
    /// 词法、语法、类型错误
    #[error("{}", compile_message(.module, .diagnostics))]
    Compile {
        module: String,
        diagnostics: Vec<Diagnostic>,
    },

    /// 脚本执行失败
    #[error("Runtime error: {message}")]
    Runtime {
        message: String,
        stack_trace: Vec<String>,
        module: Option<String>,
        line: Option<u32>,
        snippet: Option<String>,
    },

    /// 配置读取或转换失败
    #[error("Config error: {0}")]
    Config(String),

    /// 模块加载、链接、校验失败
    #[error("{0}")]
    Load(RuntimeError),
}

fn compile_message(module: &str, diagnostics: &[Diagnostic]) -> String {
    match first_error(diagnostics) {
        Some(d) => format!("{}:{}: {}", module, d.range, d.message),
        None => format!("{}: compilation failed", module),
    }
}

fn first_error(diagnostics: &[Diagnostic]) -> Option<&Diagnostic> {
    diagnostics
        .iter()
        .find(|d| d.severity == Severity::Error)
        .or_else(|| diagnostics.first())
}

impl From<RuntimeError> for SmallsError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::Compile {
                module,
                diagnostics,
            } => SmallsError::Compile {
                module,
                diagnostics,
            },
            RuntimeError::Execution {
                message,
                stack_trace,
            } => SmallsError::Runtime {
                message,
                stack_trace,
                module: None,
                line: None,
                snippet: None,
            },
            RuntimeError::Config { .. } | RuntimeError::Layout { .. } => {
                SmallsError::Config(e.to_string())
            }
            other => SmallsError::Load(other),
        }
    }
}

impl SmallsError {
    /// 获取错误行号（如果有）
    pub fn line(&self) -> Option<u32> {
        match self {
            SmallsError::Compile { diagnostics, .. } => {
                first_error(diagnostics).map(|d| d.range.start.line)
            }
            SmallsError::Runtime { line, .. } => *line,
            _ => None,
        }
    }

    /// 获取错误列号（如果有）
    pub fn column(&self) -> Option<u32> {
        match self {
            SmallsError::Compile { diagnostics, .. } => {
                first_error(diagnostics).map(|d| d.range.start.column)
            }
            _ => None,
        }
    }

    /// 出错的模块路径
    pub fn module(&self) -> Option<&str> {
        match self {
            SmallsError::Compile { module, .. } => Some(module),
            SmallsError::Runtime { module, .. } => module.as_deref(),
            _ => None,
        }
    }

    /// 获取错误阶段
    pub fn phase(&self) -> Phase {
        match self {
            SmallsError::Compile { diagnostics, .. } => match first_error(diagnostics).map(|d| d.kind) {
                Some(DiagnosticKind::Lexical) => Phase::Lexer,
                Some(DiagnosticKind::Syntactic) => Phase::Parser,
                Some(DiagnosticKind::Linking) => Phase::Compiler,
                Some(DiagnosticKind::Semantic) | None => Phase::Resolver,
            },
            SmallsError::Runtime { .. } => Phase::Vm,
            SmallsError::Config(_) | SmallsError::Load(_) => Phase::Runtime,
        }
    }

    /// 转换为结构化错误报告
    ///
    /// CLI 直接打印，上层应用可以序列化为 JSON。
    pub fn to_report(&self) -> ErrorReport {
        let (error_kind, message, notes) = match self {
            SmallsError::Compile { diagnostics, .. } => {
                let first = first_error(diagnostics);
                let kind = match first.map(|d| d.kind) {
                    Some(DiagnosticKind::Lexical) => "LexicalError",
                    Some(DiagnosticKind::Syntactic) => "SyntaxError",
                    Some(DiagnosticKind::Linking) => "LinkingError",
                    Some(DiagnosticKind::Semantic) | None => "SemanticError",
                };
                let message = first
                    .map(|d| d.message.clone())
                    .unwrap_or_else(|| "compilation failed".to_string());
                let mut notes: Vec<String> = first.map(|d| d.notes.clone()).unwrap_or_default();
                let others = diagnostics
                    .iter()
                    .filter(|d| d.severity == Severity::Error)
                    .count()
                    .saturating_sub(1);
                if others > 0 {
                    notes.push(format!("{} more error(s)", others));
                }
                (kind, message, notes)
            }
            SmallsError::Runtime {
                message,
                stack_trace,
                ..
            } => ("RuntimeError", message.clone(), stack_trace.clone()),
            SmallsError::Config(msg) => ("ConfigError", msg.clone(), Vec::new()),
            SmallsError::Load(e) => {
                let kind = match e {
                    RuntimeError::ModuleNotFound(_) => "ModuleNotFound",
                    RuntimeError::CircularImport(_) => "CircularImport",
                    RuntimeError::MissingEntry { .. } => "MissingEntry",
                    RuntimeError::Linking { .. } => "LinkingError",
                    RuntimeError::Verify { .. } => "VerifyError",
                    RuntimeError::Io { .. } => "IoError",
                    _ => "LoadError",
                };
                (kind, e.to_string(), Vec::new())
            }
        };
        ErrorReport {
            phase: self.phase().as_str(),
            module: self.module().map(str::to_string),
            line: self.line(),
            column: self.column(),
            error_kind: error_kind.to_string(),
            message,
            notes,
        }
    }
}

/// 结构化错误报告
///
/// 上层应用（CLI、Web、LSP）可以根据自己的需求格式化。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    /// 错误阶段: lexer, parser, resolver, compiler, vm, runtime
    pub phase: &'static str,
    pub module: Option<String>,
    /// 错误行号（1-based，如果有）
    pub line: Option<u32>,
    /// 错误列号（1-based，如果有）
    pub column: Option<u32>,
    /// 错误类型（可用于程序化处理）
    pub error_kind: String,
    /// 人类可读的错误消息
    pub message: String,
    /// 附注；运行时错误为调用栈
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl std::fmt::Display for ErrorReport {
    /// 默认的 CLI 友好格式
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(col)) => {
                write!(f, "[{}:{}] {} error: {}", line, col, self.phase, self.message)
            }
            (Some(line), None) => write!(f, "[{}] {} error: {}", line, self.phase, self.message),
            _ => write!(f, "{} error: {}", self.phase, self.message),
        }
    }
}

impl ErrorReport {
    /// 转换为 JSON 格式（Web API 使用）
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"phase":"{}","message":"{}"}}"#, self.phase, e)
        })
    }

    /// 简洁格式（适合终端）
    pub fn to_short(&self) -> String {
        format!("{}: {}", self.phase, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smalls_core::{SourcePosition, SourceRange};

    fn diag(kind: DiagnosticKind, line: u32, column: u32, message: &str) -> Diagnostic {
        let pos = SourcePosition::new(line, column, 0);
        Diagnostic::error(kind, SourceRange::new(pos, pos), message)
    }

    fn compile_error(diagnostics: Vec<Diagnostic>) -> SmallsError {
        SmallsError::Compile {
            module: "main".to_string(),
            diagnostics,
        }
    }

    #[test]
    fn test_compile_error_line_column() {
        let err = compile_error(vec![diag(DiagnosticKind::Syntactic, 3, 7, "expected ')'")]);
        assert_eq!(err.line(), Some(3));
        assert_eq!(err.column(), Some(7));
        assert_eq!(err.phase(), Phase::Parser);
        assert_eq!(err.to_string(), "main:3:7: expected ')'");
    }

    #[test]
    fn test_compile_error_skips_leading_warnings() {
        let mut warning = diag(DiagnosticKind::Semantic, 1, 1, "deprecated");
        warning.severity = Severity::Warning;
        let err = compile_error(vec![
            warning,
            diag(DiagnosticKind::Lexical, 4, 2, "unterminated string"),
        ]);
        assert_eq!(err.line(), Some(4));
        assert_eq!(err.phase(), Phase::Lexer);
        assert_eq!(err.to_report().error_kind, "LexicalError");
    }

    #[test]
    fn test_compile_report_counts_other_errors() {
        let err = compile_error(vec![
            diag(DiagnosticKind::Semantic, 2, 5, "type mismatch: expected string, got int"),
            diag(DiagnosticKind::Semantic, 6, 1, "unknown identifier 'x'"),
            diag(DiagnosticKind::Semantic, 7, 1, "unknown identifier 'y'"),
        ]);
        let report = err.to_report();
        assert_eq!(report.phase, "resolver");
        assert_eq!(report.module.as_deref(), Some("main"));
        assert_eq!(report.error_kind, "SemanticError");
        assert_eq!(report.notes, vec!["2 more error(s)".to_string()]);
        assert_eq!(
            report.to_string(),
            "[2:5] resolver error: type mismatch: expected string, got int"
        );
    }

    #[test]
    fn test_runtime_error_report() {
        let err = SmallsError::Runtime {
            message: "division by zero".to_string(),
            stack_trace: vec!["inner (main:2)".to_string(), "main (main:5)".to_string()],
            module: Some("main".to_string()),
            line: Some(2),
            snippet: None,
        };
        assert_eq!(err.phase(), Phase::Vm);
        assert_eq!(err.line(), Some(2));
        assert_eq!(err.column(), None);
        let report = err.to_report();
        assert_eq!(report.notes.len(), 2);
        assert_eq!(report.to_string(), "[2] vm error: division by zero");
        assert_eq!(report.to_short(), "vm: division by zero");
    }

    #[test]
    fn test_from_runtime_error() {
        let err: SmallsError = RuntimeError::ModuleNotFound("a.b".to_string()).into();
        assert!(matches!(err, SmallsError::Load(_)));
        assert_eq!(err.to_report().error_kind, "ModuleNotFound");
        assert_eq!(err.phase(), Phase::Runtime);

        let err: SmallsError = RuntimeError::Config {
            name: "npc".to_string(),
            message: "missing field".to_string(),
        }
        .into();
        assert!(matches!(err, SmallsError::Config(_)));

        let err: SmallsError = RuntimeError::Execution {
            message: "stack overflow".to_string(),
            stack_trace: Vec::new(),
        }
        .into();
        assert_eq!(err.to_string(), "Runtime error: stack overflow");
    }

    #[test]
    fn test_report_to_json() {
        let report = ErrorReport {
            phase: "parser",
            module: None,
            line: Some(1),
            column: Some(5),
            error_kind: "SyntaxError".to_string(),
            message: "unexpected \"}\"".to_string(),
            notes: Vec::new(),
        };
        let value: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(value["phase"], "parser");
        assert_eq!(value["line"], 1);
        assert_eq!(value["module"], serde_json::Value::Null);
        assert_eq!(value["message"], "unexpected \"}\"");
        assert!(value.get("notes").is_none());
    }
}
