//! 已加载的脚本模块

use std::rc::Rc;

use serde::Serialize;

use crate::compiler::ast::Ast;
use crate::compiler::resolver::{ModuleId, ResolvedModule, Symbol};
use crate::kit::Diagnostic;
use crate::runtime::bytecode::BytecodeModule;
use crate::runtime::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptState {
    /// 解析完成，尚未生成字节码
    Resolved,
    Compiling,
    /// `__init` 正在运行
    Initializing,
    Ready,
    Failed,
}

/// 导出符号的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Function,
    Generic,
    Native,
    Global,
    Const,
    Type,
    Variant,
    Module,
}

impl ExportKind {
    fn of(symbol: &Symbol) -> Self {
        match symbol {
            Symbol::Function { .. } => ExportKind::Function,
            Symbol::Template { .. } => ExportKind::Generic,
            Symbol::Native { .. } => ExportKind::Native,
            Symbol::Global { .. } => ExportKind::Global,
            Symbol::Const { .. } | Symbol::PendingConst { .. } => ExportKind::Const,
            Symbol::Type(_)
            | Symbol::TypeTemplate { .. }
            | Symbol::PendingAlias { .. } => ExportKind::Type,
            Symbol::Variant { .. } | Symbol::VariantTemplate { .. } => ExportKind::Variant,
            Symbol::Module(_) => ExportKind::Module,
        }
    }
}

pub struct Script {
    pub(crate) id: ModuleId,
    pub(crate) path: String,
    /// 文件路径或 `<memory>/...`
    pub(crate) origin: String,
    pub(crate) source: Option<Rc<str>>,
    pub(crate) ast: Option<Rc<Ast>>,
    pub(crate) imports: Vec<String>,
    pub(crate) resolved: Option<ResolvedModule>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) bytecode: Option<Rc<BytecodeModule>>,
    pub(crate) state: ScriptState,
    pub(crate) failure: Option<RuntimeError>,
}

impl Script {
    pub(crate) fn new(id: ModuleId, path: &str, origin: String, source: Rc<str>) -> Self {
        Self {
            id,
            path: path.to_string(),
            origin,
            source: Some(source),
            ast: None,
            imports: Vec::new(),
            resolved: None,
            diagnostics: Vec::new(),
            bytecode: None,
            state: ScriptState::Resolved,
            failure: None,
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn errors(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == crate::kit::Severity::Error)
            .count()
    }

    pub fn state(&self) -> ScriptState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ScriptState::Ready
    }

    /// AST 是否已按调试级别丢弃
    pub fn ast_discarded(&self) -> bool {
        self.ast.is_none()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn bytecode(&self) -> Option<&BytecodeModule> {
        self.bytecode.as_deref()
    }

    /// 导出表：名字 -> 种类，按名字排序
    pub fn exports(&self) -> Vec<(String, ExportKind)> {
        let Some(resolved) = &self.resolved else {
            return Vec::new();
        };
        let mut out: Vec<(String, ExportKind)> = resolved
            .exports
            .iter()
            .map(|(name, sym)| (name.clone(), ExportKind::of(sym)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// 被导入的模块路径
    pub fn imports(&self) -> &[String] {
        &self.imports
    }
}

/// AST 中所有 `import` 的模块路径，保持声明顺序
pub(crate) fn import_paths_of(ast: &Ast) -> Vec<String> {
    use crate::compiler::ast::DeclKind;
    let mut out: Vec<String> = Vec::new();
    for &item in &ast.items {
        let path = match &ast.decl(item).kind {
            DeclKind::AliasedImport { path, .. } | DeclKind::SelectiveImport { path, .. } => {
                path.join(".")
            }
            _ => continue,
        };
        if !out.contains(&path) {
            out.push(path);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse;

    #[test]
    fn test_import_paths_are_deduplicated() {
        let src = "import core.math as m;\nfrom core.math import { sqrt };\nimport game.rules as r;";
        let parsed = parse(src, "t");
        assert!(!parsed.has_errors());
        assert_eq!(
            import_paths_of(&parsed.ast),
            vec!["core.math".to_string(), "game.rules".to_string()]
        );
    }
}
