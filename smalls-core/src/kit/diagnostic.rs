//! 结构化诊断信息与收集器

use super::position::SourceRange;
use serde::Serialize;
use smalls_config::DiagnosticConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// 诊断来源阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Lexical,
    Syntactic,
    Semantic,
    Linking,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::Lexical => "lexical",
            DiagnosticKind::Syntactic => "syntax",
            DiagnosticKind::Semantic => "semantic",
            DiagnosticKind::Linking => "linking",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub range: SourceRange,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, range: SourceRange, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            range,
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        write!(
            f,
            "[{}] {} {}: {}",
            self.range,
            self.kind.as_str(),
            severity,
            self.message
        )?;
        for note in &self.notes {
            write!(f, "\n    note: {}", note)?;
        }
        Ok(())
    }
}

/// 每个脚本一个诊断收集器
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub file: String,
    pub config: DiagnosticConfig,
    diagnostics: Vec<Diagnostic>,
    errors: usize,
    warnings: usize,
}

impl Context {
    pub fn new(file: impl Into<String>, config: DiagnosticConfig) -> Self {
        Self {
            file: file.into(),
            config,
            ..Default::default()
        }
    }

    pub fn lexical_diagnostic(&mut self, range: SourceRange, message: impl Into<String>) {
        self.push(Diagnostic::error(DiagnosticKind::Lexical, range, message));
    }

    pub fn syntactic_diagnostic(&mut self, range: SourceRange, message: impl Into<String>) {
        self.push(Diagnostic::error(DiagnosticKind::Syntactic, range, message));
    }

    pub fn semantic_diagnostic(&mut self, range: SourceRange, message: impl Into<String>) {
        self.push(Diagnostic::error(DiagnosticKind::Semantic, range, message));
    }

    pub fn linking_diagnostic(&mut self, range: SourceRange, message: impl Into<String>) {
        self.push(Diagnostic::error(DiagnosticKind::Linking, range, message));
    }

    pub fn warning(&mut self, kind: DiagnosticKind, range: SourceRange, message: impl Into<String>) {
        let mut diag = Diagnostic::error(kind, range, message);
        diag.severity = Severity::Warning;
        self.push(diag);
    }

    /// 记录一条诊断；完全相同的诊断只记录一次
    pub fn push(&mut self, mut diag: Diagnostic) {
        if diag.severity == Severity::Warning && self.config.warnings_as_errors {
            diag.severity = Severity::Error;
        }
        if self.diagnostics.iter().any(|d| d == &diag) {
            return;
        }
        if diag.severity == Severity::Error
            && self.config.max_errors > 0
            && self.errors >= self.config.max_errors
        {
            return;
        }
        tracing::debug!(target: "smalls::resolver", file = %self.file, "{}", diag);
        match diag.severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Note => {}
        }
        self.diagnostics.push(diag);
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn warnings(&self) -> usize {
        self.warnings
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// 第一条错误
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.diagnostics
            .iter()
            .find(|d| d.severity == Severity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kit::position::SourcePosition;

    fn range(line: u32) -> SourceRange {
        SourceRange::at(SourcePosition::new(line, 1, 0))
    }

    #[test]
    fn test_duplicate_diagnostics_counted_once() {
        let mut ctx = Context::new("test", DiagnosticConfig::default());
        ctx.semantic_diagnostic(range(1), "unknown identifier 'x'");
        ctx.semantic_diagnostic(range(1), "unknown identifier 'x'");
        ctx.semantic_diagnostic(range(2), "unknown identifier 'x'");
        assert_eq!(ctx.errors(), 2);
    }

    #[test]
    fn test_max_errors_cap() {
        let config = DiagnosticConfig {
            max_errors: 1,
            ..Default::default()
        };
        let mut ctx = Context::new("test", config);
        ctx.syntactic_diagnostic(range(1), "a");
        ctx.syntactic_diagnostic(range(2), "b");
        assert_eq!(ctx.errors(), 1);
    }

    #[test]
    fn test_display_includes_notes() {
        let diag = Diagnostic::error(DiagnosticKind::Semantic, range(3), "bad")
            .with_note("argument 1: expected int, got float");
        let text = diag.to_string();
        assert!(text.contains("3:1"));
        assert!(text.contains("expected int, got float"));
    }
}
