//! Smalls Core - lexer, parser, resolver, bytecode compiler and VM
//!
//! Scripts are loaded as modules, resolved against a shared type table and
//! compiled to register bytecode on first use. Host code talks to scripts
//! through [`Runtime`]: registering native modules and types, executing
//! entry points and reading back values.
//!
//! Configuration is passed explicitly via [`RuntimeConfig`], not via global state.

pub mod compiler;
pub mod kit;
pub mod runtime;

pub use compiler::resolver::ModuleId;
pub use compiler::types::{TypeId, TypeKind};
pub use kit::{Diagnostic, Severity, SourcePosition, SourceRange};
pub use runtime::config_loader::load_config;
pub use runtime::loader::{FileSystemLoader, MemoryLoader, SourceLoader};
pub use runtime::value::Value;
pub use runtime::{ExecutionResult, Runtime, RuntimeError, RuntimeStats, ScriptState};

pub use smalls_config::{
    CompilerConfig, DebugLevel, DiagnosticConfig, LimitConfig, Phase, RuntimeConfig,
};
