//! 运行时层面的错误

use thiserror::Error;

use crate::kit::Diagnostic;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    #[error("module '{0}' not found")]
    ModuleNotFound(String),

    #[error("circular import: {}", .0.join(" -> "))]
    CircularImport(Vec<String>),

    #[error("{}", compile_summary(.module, .diagnostics))]
    Compile {
        module: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("module '{module}' has no function '{name}'")]
    MissingEntry { module: String, name: String },

    #[error("{message}")]
    InvalidArguments { message: String },

    #[error("linking module '{module}' failed: {message}")]
    Linking { module: String, message: String },

    #[error("layout mismatch for '{name}': {message}")]
    Layout { name: String, message: String },

    #[error("config '{name}': {message}")]
    Config { name: String, message: String },

    #[error("code generation failed in '{module}': {message}")]
    Codegen { module: String, message: String },

    #[error("bytecode verification failed in '{module}': {message}")]
    Verify { module: String, message: String },

    #[error("{message}")]
    Execution {
        message: String,
        stack_trace: Vec<String>,
    },

    #[error("cannot read '{path}': {message}")]
    Io { path: String, message: String },
}

fn compile_summary(module: &str, diagnostics: &[Diagnostic]) -> String {
    match diagnostics.first() {
        Some(first) if diagnostics.len() > 1 => format!(
            "{}: {} (and {} more)",
            module,
            first,
            diagnostics.len() - 1
        ),
        Some(first) => format!("{}: {}", module, first),
        None => format!("{}: compilation failed", module),
    }
}

impl RuntimeError {
    /// 编译错误的诊断列表
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            RuntimeError::Compile { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}
