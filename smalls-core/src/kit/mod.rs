//! 编译器各阶段共用的基础设施

pub mod diagnostic;
pub mod position;

pub use diagnostic::{Context, Diagnostic, DiagnosticKind, Severity};
pub use position::{SourcePosition, SourceRange};
