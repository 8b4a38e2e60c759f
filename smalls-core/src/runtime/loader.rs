//! 源码加载
//!
//! 模块路径 `a.b.c` 对应相对路径 `a/b/c.smalls`。[`FileSystemLoader`] 依次在
//! 搜索路径下查找，[`MemoryLoader`] 从内存表中取，测试与宿主内嵌脚本都用它。

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

use crate::compiler::lexer::{decode_source, LexerError};

pub const SOURCE_EXTENSION: &str = "smalls";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    #[error("invalid module path '{0}'")]
    InvalidPath(String),
    #[error("cannot read '{path}': {message}")]
    Io { path: String, message: String },
}

/// 读到的源文件
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// 文件路径或其他来源描述，用于报错
    pub origin: String,
    pub text: String,
    /// 解码时发现的非法 UTF-8，按词法错误报告
    pub encoding_errors: Vec<LexerError>,
}

impl SourceFile {
    pub fn new(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            text: text.into(),
            encoding_errors: Vec::new(),
        }
    }

    /// 从原始字节构造；非法 UTF-8 不会中断读取
    pub fn from_bytes(origin: impl Into<String>, bytes: &[u8]) -> Self {
        let (text, encoding_errors) = decode_source(bytes);
        Self {
            origin: origin.into(),
            text,
            encoding_errors,
        }
    }
}

pub trait SourceLoader {
    /// 读取模块源码；不存在时返回 `Ok(None)`
    fn read(&self, module: &str) -> Result<Option<SourceFile>, LoadError>;

    fn exists(&self, module: &str) -> bool;
}

/// `a.b.c` -> `a/b/c.smalls`
pub fn module_to_relative(module: &str) -> Result<PathBuf, LoadError> {
    let mut path = PathBuf::new();
    for part in module.split('.') {
        if part.is_empty() || part.contains(['/', '\\']) {
            return Err(LoadError::InvalidPath(module.to_string()));
        }
        path.push(part);
    }
    path.set_extension(SOURCE_EXTENSION);
    Ok(path)
}

/// 文件路径或 `a/b/c.smalls` 形式的名字规范化为模块路径
pub fn normalize_module_name(name: &str) -> String {
    let trimmed = name
        .strip_suffix(&format!(".{}", SOURCE_EXTENSION))
        .unwrap_or(name);
    trimmed
        .trim_start_matches("./")
        .replace(['/', '\\'], ".")
}

/// 把磁盘上的脚本文件映射回模块路径：相对于包含它的搜索路径
pub fn path_to_module_name(file: &Path, search_paths: &[PathBuf]) -> String {
    for root in search_paths {
        if let Ok(rel) = file.strip_prefix(root) {
            return normalize_module_name(&rel.to_string_lossy());
        }
    }
    file.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ===== 文件系统 =====

#[derive(Debug, Clone, Default)]
pub struct FileSystemLoader {
    paths: Vec<PathBuf>,
}

impl FileSystemLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    fn locate(&self, module: &str) -> Result<Option<PathBuf>, LoadError> {
        let rel = module_to_relative(module)?;
        Ok(self.paths.iter().map(|root| root.join(&rel)).find(|p| p.is_file()))
    }
}

impl SourceLoader for FileSystemLoader {
    fn read(&self, module: &str) -> Result<Option<SourceFile>, LoadError> {
        let Some(path) = self.locate(module)? else {
            return Ok(None);
        };
        let bytes = fs::read(&path).map_err(|e| LoadError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(SourceFile::from_bytes(path.display().to_string(), &bytes)))
    }

    fn exists(&self, module: &str) -> bool {
        matches!(self.locate(module), Ok(Some(_)))
    }
}

// ===== 内存 =====

/// 内存中的模块表；克隆共享同一张表
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<I, K, V>(files: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let loader = Self::new();
        for (module, text) in files {
            loader.insert(module.as_ref(), text);
        }
        loader
    }

    pub fn insert(&self, module: &str, text: impl Into<String>) {
        self.files
            .borrow_mut()
            .insert(normalize_module_name(module), text.into());
    }

    pub fn remove(&self, module: &str) -> bool {
        self.files
            .borrow_mut()
            .remove(&normalize_module_name(module))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.files.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.borrow().is_empty()
    }
}

impl SourceLoader for MemoryLoader {
    fn read(&self, module: &str) -> Result<Option<SourceFile>, LoadError> {
        Ok(self
            .files
            .borrow()
            .get(module)
            .map(|text| SourceFile::new(format!("<memory>/{}", module), text.clone())))
    }

    fn exists(&self, module: &str) -> bool {
        self.files.borrow().contains_key(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_to_relative() {
        let p = module_to_relative("core.math.vector").unwrap();
        assert_eq!(p, PathBuf::from("core/math/vector.smalls"));
        assert!(module_to_relative("a..b").is_err());
        assert!(module_to_relative("").is_err());
    }

    #[test]
    fn test_normalize_module_name() {
        assert_eq!(normalize_module_name("a/b/c.smalls"), "a.b.c");
        assert_eq!(normalize_module_name("./main.smalls"), "main");
        assert_eq!(normalize_module_name("core.prelude"), "core.prelude");
    }

    #[test]
    fn test_path_to_module_name() {
        let roots = vec![PathBuf::from("/scripts")];
        assert_eq!(
            path_to_module_name(Path::new("/scripts/game/rules.smalls"), &roots),
            "game.rules"
        );
        assert_eq!(path_to_module_name(Path::new("/tmp/x.smalls"), &roots), "x");
    }

    #[test]
    fn test_memory_loader_shares_table() {
        let loader = MemoryLoader::new();
        let handle = loader.clone();
        handle.insert("game/rules.smalls", "fn f() {}");
        assert!(loader.exists("game.rules"));
        let file = loader.read("game.rules").unwrap().unwrap();
        assert_eq!(file.text, "fn f() {}");
        assert_eq!(loader.read("missing").unwrap(), None);
        assert!(handle.remove("game.rules"));
        assert!(loader.is_empty());
    }

    #[test]
    fn test_file_system_loader_keeps_invalid_utf8() {
        let root = std::env::temp_dir().join(format!("smalls-loader-{}", std::process::id()));
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("broken.smalls"), b"fn f() {}\n// \xc3\x28\n").unwrap();

        let mut loader = FileSystemLoader::new();
        loader.add_path(&root);
        let file = loader.read("broken").unwrap().unwrap();
        fs::remove_dir_all(&root).unwrap();

        assert!(file.text.starts_with("fn f() {}\n// "));
        assert_eq!(file.encoding_errors.len(), 1);
        assert_eq!(file.encoding_errors[0].line(), 2);
    }

    #[test]
    fn test_file_system_loader_missing_module() {
        let mut loader = FileSystemLoader::new();
        loader.add_path("/nonexistent-smalls-root");
        assert_eq!(loader.read("a.b").unwrap(), None);
        assert!(!loader.exists("a.b"));
    }
}
