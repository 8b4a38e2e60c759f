//! Smalls 运行时
//!
//! [`Runtime`] 拥有类型表、堆、句柄表、模块缓存和 VM 状态。脚本的生命周期：
//!
//! 1. `load_module` 读源码、解析、加载依赖、名字解析与类型检查
//! 2. 第一次执行时生成字节码、校验，并运行模块的 `__init`
//! 3. `execute_script` 调用入口函数，返回 [`ExecutionResult`]
//!
//! 运行时不是线程安全的；原生函数可以在同一线程上再次进入 VM。

pub mod bytecode;
pub mod compiler;
pub mod config_loader;
pub mod error;
pub mod handles;
pub mod heap;
pub mod loader;
pub mod native;
pub mod propset;
pub mod script;
pub mod stdlib;
pub mod value;
pub(crate) mod vm;

pub use error::RuntimeError;
pub use script::{ExportKind, Script, ScriptState};

use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use smalls_config::{DebugLevel, DiagnosticConfig, RuntimeConfig};

use crate::compiler::ast::Ast;
use crate::compiler::parser::parse;
use crate::compiler::resolver::{
    key_operators, resolve_module, KeyOperators, ModuleEnv, ModuleId, OperatorEntry,
    ResolvedModule, Symbol,
};
use crate::compiler::types::{TypeDef, TypeId, TypeKind, TypeTable};
use crate::kit::{Context, Diagnostic};
use crate::runtime::bytecode::{verify_module, BytecodeModule};
use crate::runtime::handles::{HandleRegistry, OwnershipMode, TypedHandle};
use crate::runtime::heap::{GcReport, GcStats, Heap, HeapObject};
use crate::runtime::loader::{
    normalize_module_name, FileSystemLoader, LoadError, SourceFile, SourceLoader,
};
use crate::runtime::native::{
    ModuleBuilder, NativeRegistry, NativeSignature, NativeStructLayout,
};
use crate::runtime::propset::PropsetTable;
use crate::runtime::script::import_paths_of;
use crate::runtime::value::{HeapPtr, ObjectHandle, Value};
use crate::runtime::vm::VmState;

pub const CORE_PRELUDE: &str = "core.prelude";

/// 脚本输出（`print` / `println`）的去向
pub type OutputSink = Rc<dyn Fn(&str)>;

// ===== 执行结果 =====

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    #[serde(skip)]
    pub value: Value,
    pub failed: bool,
    pub error_message: String,
    /// `function (module:line)`，最内层在前
    pub stack_trace: Vec<String>,
    pub error_module: Option<String>,
    pub error_line: Option<u32>,
    /// 出错行的源码（源码仍保留时）
    pub error_snippet: Option<String>,
}

impl ExecutionResult {
    fn success(value: Value) -> Self {
        Self {
            value,
            failed: false,
            error_message: String::new(),
            stack_trace: Vec::new(),
            error_module: None,
            error_line: None,
            error_snippet: None,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            value: Value::VOID,
            failed: true,
            error_message: message.into(),
            stack_trace: Vec::new(),
            error_module: None,
            error_line: None,
            error_snippet: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        !self.failed
    }

    pub fn into_result(self) -> Result<Value, RuntimeError> {
        if self.failed {
            Err(RuntimeError::Execution {
                message: self.error_message,
                stack_trace: self.stack_trace,
            })
        } else {
            Ok(self.value)
        }
    }
}

/// 运行时概况
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeStats {
    pub modules: usize,
    pub ready_modules: usize,
    pub functions: usize,
    pub generic_templates: usize,
    pub generic_instances: usize,
    pub types: usize,
    pub native_functions: usize,
    pub globals: usize,
    pub heap_objects: usize,
    pub heap_bytes: usize,
    pub gc_threshold: usize,
    pub gc: GcStats,
    pub handles: usize,
    pub propsets: usize,
    pub interned_strings: usize,
    pub instructions_executed: u64,
}

/// `core.test` 的累计结果
#[derive(Debug, Clone, Default)]
pub(crate) struct TestLog {
    pub count: u32,
    pub failures: u32,
}

// ===== 运行时 =====

pub struct Runtime {
    pub(crate) config: RuntimeConfig,
    pub(crate) types: TypeTable,
    pub(crate) natives: NativeRegistry,
    pub(crate) heap: Heap,
    pub(crate) handles: HandleRegistry,
    pub(crate) propsets: PropsetTable,
    pub(crate) scripts: Vec<Script>,
    pub(crate) by_path: HashMap<String, ModuleId>,
    pub(crate) globals: Vec<Value>,
    pub(crate) interned: HashMap<String, HeapPtr>,
    pub(crate) vm: VmState,
    pub(crate) tests: TestLog,
    pub(crate) output: OutputSink,
    /// 正在加载的模块链，用于发现循环导入
    loading: Vec<String>,
    loaders: Vec<Box<dyn SourceLoader>>,
    files: FileSystemLoader,
    core_prelude: Vec<ModuleId>,
    user_prelude: Option<ModuleId>,
    /// 最近一次失败的错误信息，`reset_error` 清除
    last_error: Option<String>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// 按配置创建运行时：注册核心原生模块并加载 `core.prelude`
    pub fn with_config(config: RuntimeConfig) -> Self {
        let mut files = FileSystemLoader::new();
        for path in &config.module_paths {
            files.add_path(path);
        }
        let mut rt = Self {
            heap: Heap::new(config.limits.gc_threshold_bytes),
            config,
            types: TypeTable::new(),
            natives: NativeRegistry::new(),
            handles: HandleRegistry::new(),
            propsets: PropsetTable::new(),
            scripts: Vec::new(),
            by_path: HashMap::new(),
            globals: Vec::new(),
            interned: HashMap::new(),
            vm: VmState::default(),
            tests: TestLog::default(),
            output: Rc::new(|text: &str| {
                info!(target: "smalls::runtime", "[smalls] {}", text.trim_end_matches('\n'))
            }),
            loading: Vec::new(),
            loaders: Vec::new(),
            files,
            core_prelude: Vec::new(),
            user_prelude: None,
            last_error: None,
        };
        if let Err(e) = stdlib::register(&mut rt) {
            error!(target: "smalls::runtime", error = %e, "failed to register core natives");
        }
        match rt.load_module(CORE_PRELUDE) {
            Ok(id) => rt.core_prelude.push(id),
            Err(e) => error!(target: "smalls::runtime", error = %e, "failed to load core prelude"),
        }
        rt
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn diagnostic_config(&self) -> &DiagnosticConfig {
        &self.config.diagnostics
    }

    pub fn set_diagnostic_config(&mut self, config: DiagnosticConfig) {
        self.config.diagnostics = config;
    }

    /// 替换 `print` / `println` 的输出去向
    pub fn set_output<F>(&mut self, sink: F)
    where
        F: Fn(&str) + 'static,
    {
        self.output = Rc::new(sink);
    }

    pub(crate) fn write_output(&self, text: &str) {
        let sink = self.output.clone();
        sink(text);
    }

    // ===== 模块加载 =====

    pub fn add_module_path(&mut self, path: impl Into<std::path::PathBuf>) {
        self.files.add_path(path);
    }

    /// 追加源码加载器，优先于搜索路径
    pub fn add_loader(&mut self, loader: impl SourceLoader + 'static) {
        self.loaders.push(Box::new(loader));
    }

    /// 之后加载的脚本都能不加限定地使用该模块的导出
    pub fn set_user_prelude(&mut self, module: &str) -> Result<ModuleId, RuntimeError> {
        let id = self.load_module(module)?;
        self.user_prelude = Some(id);
        Ok(id)
    }

    pub fn script(&self, id: ModuleId) -> Option<&Script> {
        self.scripts.get(id.index())
    }

    pub fn module_id(&self, path: &str) -> Option<ModuleId> {
        self.by_path.get(&normalize_module_name(path)).copied()
    }

    pub fn scripts(&self) -> impl Iterator<Item = &Script> {
        self.scripts.iter()
    }

    /// 按模块路径加载；已加载时直接返回缓存
    pub fn load_module(&mut self, path: &str) -> Result<ModuleId, RuntimeError> {
        let path = normalize_module_name(path);
        if let Some(id) = self.by_path.get(&path) {
            return Ok(*id);
        }
        if let Some(pos) = self.loading.iter().position(|p| *p == path) {
            let mut chain = self.loading[pos..].to_vec();
            chain.push(path);
            return Err(RuntimeError::CircularImport(chain));
        }
        let file = self
            .find_source(&path)?
            .ok_or_else(|| RuntimeError::ModuleNotFound(path.clone()))?;
        self.load_source(&path, file)
    }

    /// 从内存源码加载；同名模块已存在时替换它（已编译的依赖方仍指向旧模块）
    pub fn load_module_from_source(
        &mut self,
        path: &str,
        source: &str,
    ) -> Result<ModuleId, RuntimeError> {
        let path = normalize_module_name(path);
        let file = SourceFile::new(format!("<memory>/{}", path), source);
        self.load_source(&path, file)
    }

    /// 同 `load_module_from_source`，但接受未解码的字节；非法 UTF-8 报告为词法错误
    pub fn load_module_from_bytes(
        &mut self,
        path: &str,
        bytes: &[u8],
    ) -> Result<ModuleId, RuntimeError> {
        let path = normalize_module_name(path);
        let file = SourceFile::from_bytes(format!("<memory>/{}", path), bytes);
        self.load_source(&path, file)
    }

    fn find_source(&self, path: &str) -> Result<Option<SourceFile>, RuntimeError> {
        if let Some(text) = stdlib::core_source(path) {
            return Ok(Some(SourceFile::new(format!("<core>/{}", path), text)));
        }
        for loader in &self.loaders {
            if let Some(file) = loader.read(path).map_err(io_error)? {
                return Ok(Some(file));
            }
        }
        self.files.read(path).map_err(io_error)
    }

    fn load_source(&mut self, path: &str, file: SourceFile) -> Result<ModuleId, RuntimeError> {
        let source: Rc<str> = Rc::from(file.text.as_str());
        let mut ctx = Context::new(path, self.config.diagnostics.clone());
        let parsed = parse(&source, path);
        for e in file.encoding_errors.iter().chain(&parsed.lexer_errors) {
            ctx.lexical_diagnostic(e.range, e.message());
        }
        for e in &parsed.parser_errors {
            ctx.syntactic_diagnostic(e.range, e.message());
        }
        if ctx.errors() > 0 {
            return Err(compile_error(path, &ctx));
        }
        let ast = Rc::new(parsed.ast);
        let imports = import_paths_of(&ast);

        self.loading.push(path.to_string());
        let deps = self.load_imports(&imports);
        self.loading.pop();
        deps?;

        let id = ModuleId(self.scripts.len() as u32);
        let prelude = self.prelude_for(path);
        let resolved = {
            let env = Env {
                scripts: &self.scripts,
                by_path: &self.by_path,
                natives: &self.natives,
                globals: self.globals.len() as u32,
                prelude,
            };
            resolve_module(&env, &mut self.types, &mut ctx, id, path, ast.clone())
        };
        if ctx.errors() > 0 {
            warn!(
                target: "smalls::runtime",
                module = path,
                errors = ctx.errors(),
                "module failed to resolve"
            );
            return Err(compile_error(path, &ctx));
        }

        self.globals
            .resize(self.globals.len() + resolved.global_count() as usize, Value::VOID);
        let mut script = Script::new(id, path, file.origin, source);
        script.ast = Some(ast);
        script.imports = imports;
        script.diagnostics = ctx.diagnostics().to_vec();
        script.resolved = Some(resolved);
        self.scripts.push(script);
        if let Some(old) = self.by_path.insert(path.to_string(), id) {
            debug!(target: "smalls::runtime", module = path, old = old.0, "replaced module");
        }
        debug!(target: "smalls::runtime", module = path, id = id.0, "loaded module");
        Ok(id)
    }

    /// 找不到的模块留给解析器报告，其余错误直接返回
    fn load_imports(&mut self, imports: &[String]) -> Result<(), RuntimeError> {
        for dep in imports {
            match self.load_module(dep) {
                Ok(_) | Err(RuntimeError::ModuleNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn prelude_for(&self, path: &str) -> Vec<ModuleId> {
        let mut prelude = self.core_prelude.clone();
        if let Some(user) = self.user_prelude {
            if self.scripts.get(user.index()).map(|s| s.path.as_str()) != Some(path) {
                prelude.push(user);
            }
        }
        prelude
    }

    // ===== 编译与初始化 =====

    /// 生成并校验字节码，不运行 `__init`
    pub fn compile_script(&mut self, id: ModuleId) -> Result<Rc<BytecodeModule>, RuntimeError> {
        let script = self.script_ref(id)?;
        if let Some(code) = &script.bytecode {
            return Ok(code.clone());
        }
        if script.state == ScriptState::Failed {
            return Err(script_failure(script));
        }
        let path = script.path.clone();
        let ast = self.module_ast_of(id).ok_or_else(|| RuntimeError::Codegen {
            module: path.clone(),
            message: "source is no longer available".to_string(),
        })?;

        let result = {
            let env = Env {
                scripts: &self.scripts,
                by_path: &self.by_path,
                natives: &self.natives,
                globals: self.globals.len() as u32,
                prelude: Vec::new(),
            };
            match self.scripts[id.index()].resolved.as_ref() {
                Some(resolved) => compiler::compile_module(
                    resolved,
                    ast,
                    &mut self.types,
                    &env,
                    &self.config.compiler,
                    self.config.limits.max_registers,
                )
                .map_err(|e| RuntimeError::Codegen {
                    module: path.clone(),
                    message: e.to_string(),
                }),
                None => Err(RuntimeError::Codegen {
                    module: path.clone(),
                    message: "module was never resolved".to_string(),
                }),
            }
        };
        let module = match result {
            Ok(m) => m,
            Err(e) => return Err(self.fail_script(id, e)),
        };
        if let Err(e) = verify_module(&module, self.globals.len() as u32) {
            let err = RuntimeError::Verify {
                module: path,
                message: e.to_string(),
            };
            return Err(self.fail_script(id, err));
        }

        let code = Rc::new(module);
        let level = self.config.diagnostics.debug_level;
        let script = &mut self.scripts[id.index()];
        script.bytecode = Some(code.clone());
        // 其他模块实例化泛型时还要读这个模块的 AST
        let keep_source = script
            .resolved
            .as_ref()
            .map(|r| {
                r.exports_templates
                    || r
                        .exports
                        .values()
                        .any(|s| matches!(s, Symbol::Native { ty: None, .. }))
            })
            .unwrap_or(false);
        match level {
            DebugLevel::Full => {}
            DebugLevel::SourceMap => {
                script.ast = None;
                if !keep_source {
                    script.source = None;
                }
            }
            DebugLevel::None => {
                script.ast = None;
                script.source = None;
            }
        }
        debug!(
            target: "smalls::runtime",
            module = %script.path,
            functions = code.functions.len(),
            debug_level = level.as_str(),
            "module compiled"
        );
        Ok(code)
    }

    /// 编译模块及其依赖，并运行各自的 `__init`
    pub(crate) fn ensure_ready(&mut self, id: ModuleId) -> Result<(), RuntimeError> {
        let script = self.script_ref(id)?;
        match script.state {
            ScriptState::Ready | ScriptState::Compiling | ScriptState::Initializing => {
                return Ok(())
            }
            ScriptState::Failed => return Err(script_failure(script)),
            ScriptState::Resolved => {}
        }
        let deps = script
            .resolved
            .as_ref()
            .map(|r| r.dependencies.clone())
            .unwrap_or_default();
        self.scripts[id.index()].state = ScriptState::Compiling;
        for dep in deps {
            if let Err(e) = self.ensure_ready(dep) {
                return Err(self.fail_script(id, e));
            }
        }
        let code = self.compile_script(id)?;
        if let Some(init) = code.init {
            self.scripts[id.index()].state = ScriptState::Initializing;
            if let Err(e) = self.run_init(id, init) {
                return Err(self.fail_script(id, e));
            }
        }
        self.scripts[id.index()].state = ScriptState::Ready;
        Ok(())
    }

    /// `__init` 使用配置的预算，与调用方的预算互不影响
    fn run_init(&mut self, id: ModuleId, init: u32) -> Result<(), RuntimeError> {
        let saved_gas = self.vm.gas;
        let saved_trace = self.vm.trace.take();
        let saved_fault = self.vm.fault.take();
        self.vm.gas = match self.config.limits.gas_limit {
            0 => None,
            n => Some(n),
        };
        let result = vm::invoke(self, id, init, None, &[]);
        let trace = self.vm.trace.take().unwrap_or_default();
        self.vm.trace = saved_trace;
        self.vm.fault = saved_fault;
        self.vm.gas = saved_gas;
        result.map(|_| ()).map_err(|message| RuntimeError::Execution {
            message,
            stack_trace: trace,
        })
    }

    pub(crate) fn ready_bytecode(&mut self, id: ModuleId) -> Result<Rc<BytecodeModule>, RuntimeError> {
        self.ensure_ready(id)?;
        self.compile_script(id)
    }

    fn fail_script(&mut self, id: ModuleId, err: RuntimeError) -> RuntimeError {
        if let Some(script) = self.scripts.get_mut(id.index()) {
            script.state = ScriptState::Failed;
            script.failure = Some(err.clone());
            warn!(target: "smalls::runtime", module = %script.path, error = %err, "module failed");
        }
        err
    }

    fn script_ref(&self, id: ModuleId) -> Result<&Script, RuntimeError> {
        self.scripts
            .get(id.index())
            .ok_or_else(|| RuntimeError::ModuleNotFound(format!("#{}", id.0)))
    }

    fn module_ast_of(&self, id: ModuleId) -> Option<Rc<Ast>> {
        let script = self.scripts.get(id.index())?;
        reparse(script)
    }

    // ===== 执行 =====

    /// 调用模块中的函数；`gas` 为 0 表示不限
    pub fn execute_script(
        &mut self,
        module: ModuleId,
        entry: &str,
        args: &[Value],
        gas: u64,
    ) -> ExecutionResult {
        let callee = match self.entry_point(module, entry, args) {
            Ok(c) => c,
            Err(e) => {
                self.last_error = Some(e.to_string());
                return ExecutionResult::failure(e.to_string());
            }
        };
        let nested = !self.vm.frames.is_empty();
        let saved_gas = self.vm.gas;
        let saved_trace = self.vm.trace.take();
        let saved_fault = self.vm.fault.take();
        let budget = (gas > 0).then_some(gas);
        self.vm.gas = match (saved_gas, budget) {
            (Some(outer), Some(inner)) => Some(outer.min(inner)),
            (outer, inner) => outer.or(inner),
        };
        let start = self.vm.instructions;

        let result = vm::invoke(self, callee.module, callee.index, None, args);

        let used = self.vm.instructions - start;
        let trace = self.vm.trace.take().unwrap_or_default();
        let fault = self.vm.fault.take();
        self.vm.trace = saved_trace;
        self.vm.fault = saved_fault;
        self.vm.gas = saved_gas.map(|g| g.saturating_sub(used));
        if !nested {
            self.vm.pins.clear();
        }

        match result {
            Ok(value) => ExecutionResult::success(value),
            Err(message) => {
                warn!(
                    target: "smalls::runtime",
                    module = %self.module_path(module),
                    entry,
                    error = %message,
                    "script failed"
                );
                self.last_error = Some(message.clone());
                let mut res = ExecutionResult::failure(message);
                res.stack_trace = trace;
                if let Some((module, line)) = fault {
                    res.error_snippet = self.source_line(&module, line);
                    res.error_module = Some(module);
                    res.error_line = Some(line);
                }
                res
            }
        }
    }

    /// 按模块路径加载并执行
    pub fn execute_path(
        &mut self,
        path: &str,
        entry: &str,
        args: &[Value],
        gas: u64,
    ) -> ExecutionResult {
        match self.load_module(path) {
            Ok(id) => self.execute_script(id, entry, args, gas),
            Err(e) => {
                self.last_error = Some(e.to_string());
                ExecutionResult::failure(e.to_string())
            }
        }
    }

    fn entry_point(
        &mut self,
        module: ModuleId,
        entry: &str,
        args: &[Value],
    ) -> Result<crate::compiler::resolver::CalleeRef, RuntimeError> {
        self.ensure_ready(module)?;
        let script = self.script_ref(module)?;
        let missing = || RuntimeError::MissingEntry {
            module: script.path.clone(),
            name: entry.to_string(),
        };
        let resolved = script.resolved.as_ref().ok_or_else(missing)?;
        let callee = match resolved.symbols.get(entry) {
            Some(Symbol::Function { callee, .. }) if callee.module == module => *callee,
            _ => return Err(missing()),
        };
        let f = resolved
            .functions
            .get(callee.index as usize)
            .ok_or_else(missing)?;
        if f.params.len() != args.len() {
            return Err(RuntimeError::InvalidArguments {
                message: format!(
                    "'{}' expects {} argument(s), got {}",
                    entry,
                    f.params.len(),
                    args.len()
                ),
            });
        }
        for (i, (param, arg)) in f.params.iter().zip(args).enumerate() {
            if *param != arg.type_id && !self.types.native_compatible(*param, arg.type_id) {
                return Err(RuntimeError::InvalidArguments {
                    message: format!(
                        "'{}' argument {}: expected {}, got {}",
                        entry,
                        i + 1,
                        self.types.name(*param),
                        self.types.name(arg.type_id)
                    ),
                });
            }
        }
        Ok(callee)
    }

    fn source_line(&self, module: &str, line: u32) -> Option<String> {
        let id = self.by_path.get(module)?;
        let source = self.scripts.get(id.index())?.source.as_deref()?;
        source
            .lines()
            .nth(line.checked_sub(1)? as usize)
            .map(|l| l.to_string())
    }

    /// 调用闭包值（原生函数回调脚本时使用）
    pub fn call_value(&mut self, f: Value, args: &[Value]) -> Result<Value, String> {
        vm::call_value(self, f, args)
    }

    /// 最近一次失败的错误信息
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// 清除错误状态，VM 回到可运行状态
    pub fn reset_error(&mut self) {
        self.last_error = None;
        self.vm.trace = None;
        self.vm.fault = None;
        if self.vm.frames.is_empty() {
            self.vm.pins.clear();
            self.vm.open_upvalues.clear();
        }
    }

    // ===== 类型 =====

    /// 宿主登记类型；同名类型已定义为相同结构时返回已有 id
    pub fn register_type(&mut self, name: &str, kind: TypeKind) -> Result<TypeId, RuntimeError> {
        match kind {
            TypeKind::Array(elem) => return Ok(self.types.array_of(elem)),
            TypeKind::FixedArray { elem, len } => return Ok(self.types.fixed_array_of(elem, len)),
            TypeKind::Map { key, value } => return Ok(self.types.map_of(key, value)),
            TypeKind::Tuple(items) => return Ok(self.types.tuple_of(items)),
            TypeKind::Function { params, ret } => return Ok(self.types.function_of(params, ret)),
            _ => {}
        }
        let id = self.types.reserve(name);
        let existing = self.types.kind(id).clone();
        if existing != TypeKind::Pending {
            if existing == kind {
                return Ok(id);
            }
            return Err(RuntimeError::Layout {
                name: name.to_string(),
                message: "already defined with a different shape".to_string(),
            });
        }
        match kind {
            TypeKind::Struct(def) => self.types.define_struct(
                id,
                def.fields.into_iter().map(|f| (f.name, f.ty)).collect(),
            ),
            TypeKind::Newtype(inner) => self.types.define_newtype(id, inner),
            TypeKind::Sum(def) => self.types.define_sum(
                id,
                def.variants.into_iter().map(|v| (v.name, v.payload)).collect(),
            ),
            TypeKind::Opaque => self.types.define_opaque(id, 8, 8),
            TypeKind::Handle { tag } => {
                self.types.define_handle(id, tag);
                self.natives.register_handle_type(tag, id);
            }
            other => {
                return Err(RuntimeError::Layout {
                    name: name.to_string(),
                    message: format!("cannot register a type of kind {:?}", other),
                })
            }
        }
        Ok(id)
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.types.lookup(name)
    }

    pub fn type_name(&self, id: TypeId) -> &str {
        self.types.name(id)
    }

    pub fn get_type(&self, id: TypeId) -> Option<&TypeDef> {
        self.types.try_get(id)
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    // ===== 原生模块 =====

    /// 开始注册一个宿主模块
    pub fn module(&mut self, name: &str) -> ModuleBuilder<'_> {
        ModuleBuilder::new(self, &normalize_module_name(name))
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    // ===== 句柄 =====

    /// 句柄对应的脚本值；同一句柄总是得到同一个对象
    pub fn intern_handle(
        &mut self,
        handle: TypedHandle,
        mode: OwnershipMode,
    ) -> Result<Value, RuntimeError> {
        let ty = self
            .natives
            .handle_type(handle.type_tag)
            .ok_or_else(|| RuntimeError::Linking {
                module: String::new(),
                message: format!("handle tag {} is not registered", handle.type_tag),
            })?;
        if let Some(entry) = self.handles.lookup(&handle) {
            return Ok(Value::heap(ty, entry.ptr));
        }
        let ptr = self.heap.alloc(ty, HeapObject::Handle(handle));
        self.handles.insert(handle, ptr, mode);
        Ok(Value::heap(ty, ptr))
    }

    pub fn lookup_handle(&self, handle: &TypedHandle) -> Option<Value> {
        let entry = self.handles.lookup(handle)?;
        let ty = self.natives.handle_type(handle.type_tag)?;
        Some(Value::heap(ty, entry.ptr))
    }

    /// 由宿主翻转所有权；VM 从不自行提升
    pub fn set_handle_ownership(&mut self, handle: &TypedHandle, mode: OwnershipMode) -> bool {
        self.handles.set_ownership(handle, mode)
    }

    pub fn register_handle_destructor<F>(&mut self, type_tag: u32, destructor: F)
    where
        F: Fn(TypedHandle) + 'static,
    {
        self.handles.register_destructor(type_tag, Rc::new(destructor));
    }

    /// 句柄值背后的 `TypedHandle`
    pub fn handle_of(&self, v: &Value) -> Option<TypedHandle> {
        match self.heap.get(v.as_heap()?)? {
            HeapObject::Handle(h) => Some(*h),
            _ => None,
        }
    }

    /// 对象销毁：清除它的所有 propset
    pub fn destroy_object(&mut self, obj: ObjectHandle) -> usize {
        self.propsets.destroy_object(obj)
    }

    // ===== 值与字符串 =====

    /// 驻留字符串：相同内容得到同一个堆对象
    pub fn intern(&mut self, text: &str) -> Value {
        if let Some(p) = self.interned.get(text) {
            return Value::heap(TypeId::STRING, *p);
        }
        let p = self
            .heap
            .alloc(TypeId::STRING, HeapObject::String(text.to_string()));
        self.interned.insert(text.to_string(), p);
        Value::heap(TypeId::STRING, p)
    }

    pub fn alloc_string(&mut self, text: String) -> Value {
        let p = self.heap.alloc(TypeId::STRING, HeapObject::String(text));
        Value::heap(TypeId::STRING, p)
    }

    pub fn get_string(&self, v: &Value) -> Option<&str> {
        if v.type_id != TypeId::STRING {
            return None;
        }
        self.heap.string(v.as_heap()?)
    }

    /// 新建 `elem[]` 数组
    pub fn new_array(&mut self, elem: TypeId, items: Vec<Value>) -> Value {
        let ty = self.types.array_of(elem);
        let p = self.heap.alloc(
            ty,
            HeapObject::Array(heap::ArrayObject {
                elem,
                items,
                fixed: false,
            }),
        );
        Value::heap(ty, p)
    }

    pub fn array_items(&self, v: &Value) -> Option<&[Value]> {
        self.heap.array(v.as_heap()?).map(|a| a.items.as_slice())
    }

    /// 结构体字段（按声明顺序）
    pub fn struct_fields(&self, v: &Value) -> Option<&[Value]> {
        self.heap.fields(v.as_heap()?)
    }

    /// 与 `string(x)` 相同的文本形式
    pub fn display(&self, v: &Value) -> String {
        vm::display_value(self, v)
    }

    /// 原生函数执行期间固定一个值，调用返回后自动释放
    pub fn pin(&mut self, v: Value) {
        self.vm.pins.push(v);
    }

    /// 映射键类型声明的 `hash`/`eq`；没有时按结构比较
    pub(crate) fn key_operators(&self, key: TypeId) -> Option<KeyOperators> {
        if self.types.is_primitive(key) {
            return None;
        }
        let entries = self
            .scripts
            .iter()
            .filter_map(|s| s.resolved.as_ref())
            .flat_map(|r| r.operators.iter());
        key_operators(entries, key)
    }

    pub(crate) fn function_name(&self, module: u32, function: u32) -> String {
        self.scripts
            .get(module as usize)
            .and_then(|s| s.bytecode.as_ref())
            .and_then(|b| b.function(function))
            .map(|f| f.name.clone())
            .unwrap_or_else(|| format!("#{}", function))
    }

    fn module_path(&self, id: ModuleId) -> String {
        self.scripts
            .get(id.index())
            .map(|s| s.path.clone())
            .unwrap_or_default()
    }

    /// 读取模块全局变量
    pub fn global(&self, module: ModuleId, name: &str) -> Option<Value> {
        let resolved = self.scripts.get(module.index())?.resolved.as_ref()?;
        let pos = resolved.globals.iter().position(|g| g.name == name)?;
        self.globals
            .get(resolved.global_base as usize + pos)
            .copied()
    }

    // ===== GC 与统计 =====

    /// 立即做一次完整回收
    pub fn collect_garbage(&mut self) -> GcReport {
        vm::collect_garbage(self, true)
    }

    pub fn stats(&self) -> RuntimeStats {
        let resolved = || self.scripts.iter().filter_map(|s| s.resolved.as_ref());
        RuntimeStats {
            modules: self.scripts.len(),
            ready_modules: self.scripts.iter().filter(|s| s.is_ready()).count(),
            functions: resolved().map(|r| r.functions.len()).sum(),
            generic_templates: resolved().map(|r| r.template_count).sum(),
            generic_instances: self.types.instance_count(),
            types: self.types.len(),
            native_functions: self.natives.len(),
            globals: self.globals.len(),
            heap_objects: self.heap.live_objects(),
            heap_bytes: self.heap.allocated_bytes(),
            gc_threshold: self.heap.threshold(),
            gc: self.heap.stats().clone(),
            handles: self.handles.len(),
            propsets: self.propsets.len(),
            interned_strings: self.interned.len(),
            instructions_executed: self.vm.instructions,
        }
    }

    /// 所有诊断，按模块加载顺序
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.scripts
            .iter()
            .flat_map(|s| s.diagnostics.iter().cloned())
            .collect()
    }
}

fn io_error(e: LoadError) -> RuntimeError {
    match e {
        LoadError::InvalidPath(path) => RuntimeError::ModuleNotFound(path),
        LoadError::Io { path, message } => RuntimeError::Io { path, message },
    }
}

fn compile_error(path: &str, ctx: &Context) -> RuntimeError {
    RuntimeError::Compile {
        module: path.to_string(),
        diagnostics: ctx
            .diagnostics()
            .iter()
            .filter(|d| d.severity == crate::kit::Severity::Error)
            .cloned()
            .collect(),
    }
}

fn script_failure(script: &Script) -> RuntimeError {
    script.failure.clone().unwrap_or_else(|| RuntimeError::Codegen {
        module: script.path.clone(),
        message: "module failed earlier".to_string(),
    })
}

/// 取 AST；已丢弃时从保留的源码重新解析
fn reparse(script: &Script) -> Option<Rc<Ast>> {
    if let Some(ast) = &script.ast {
        return Some(ast.clone());
    }
    let source = script.source.as_deref()?;
    debug!(target: "smalls::runtime", module = %script.path, "re-parsing discarded AST");
    Some(Rc::new(parse(source, &script.path).ast))
}

// ===== 解析器视图 =====

struct Env<'a> {
    scripts: &'a [Script],
    by_path: &'a HashMap<String, ModuleId>,
    natives: &'a NativeRegistry,
    globals: u32,
    prelude: Vec<ModuleId>,
}

impl ModuleEnv for Env<'_> {
    fn module_path(&self, id: ModuleId) -> String {
        self.scripts
            .get(id.index())
            .map(|s| s.path.clone())
            .unwrap_or_default()
    }

    fn module_by_path(&self, path: &str) -> Option<ModuleId> {
        self.by_path.get(path).copied()
    }

    fn resolved(&self, id: ModuleId) -> Option<&ResolvedModule> {
        self.scripts.get(id.index())?.resolved.as_ref()
    }

    fn module_ast(&self, id: ModuleId) -> Option<Rc<Ast>> {
        reparse(self.scripts.get(id.index())?)
    }

    fn prelude_modules(&self) -> Vec<ModuleId> {
        self.prelude.clone()
    }

    fn operators(&self) -> Vec<OperatorEntry> {
        self.scripts
            .iter()
            .filter_map(|s| s.resolved.as_ref())
            .flat_map(|r| r.operators.iter().cloned())
            .collect()
    }

    fn global_count(&self) -> u32 {
        self.globals
    }

    fn native_function(&self, module: &str, name: &str) -> Option<NativeSignature> {
        self.natives.signature(module, name)
    }

    fn native_struct(&self, qualified: &str) -> Option<NativeStructLayout> {
        self.natives.struct_layout(qualified).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_prelude_is_loaded() {
        let rt = Runtime::new();
        let id = rt.module_id(CORE_PRELUDE).expect("prelude loaded");
        let exports = rt.script(id).unwrap().exports();
        assert!(exports.iter().any(|(n, k)| n == "println" && *k == ExportKind::Native));
    }

    #[test]
    fn test_intern_returns_same_object() {
        let mut rt = Runtime::new();
        let a = rt.intern("hello");
        let b = rt.intern("hello");
        let c = rt.alloc_string("hello".to_string());
        assert_eq!(a, b);
        assert_ne!(a.as_heap(), c.as_heap());
        assert_eq!(rt.get_string(&c), Some("hello"));
    }

    #[test]
    fn test_missing_entry() {
        let mut rt = Runtime::new();
        let id = rt
            .load_module_from_source("m", "fn f(): int { return 1; }")
            .unwrap();
        let res = rt.execute_script(id, "g", &[], 0);
        assert!(res.failed);
        assert!(res.error_message.contains("has no function 'g'"));
        assert_eq!(rt.last_error(), Some(res.error_message.as_str()));
        rt.reset_error();
        assert_eq!(rt.last_error(), None);
    }

    #[test]
    fn test_argument_type_check() {
        let mut rt = Runtime::new();
        let id = rt
            .load_module_from_source("m", "fn f(x: int): int { return x; }")
            .unwrap();
        let res = rt.execute_script(id, "f", &[Value::float(1.0)], 0);
        assert!(res.failed);
        assert!(res.error_message.contains("expected int, got float"));
    }

    #[test]
    fn test_circular_import_is_reported() {
        let mut rt = Runtime::new();
        let files = loader::MemoryLoader::with_files([
            ("a", "import b;\nfn fa(): int { return 1; }"),
            ("b", "import a;\nfn fb(): int { return 2; }"),
        ]);
        rt.add_loader(files);
        let err = rt.load_module("a").unwrap_err();
        assert_eq!(
            err,
            RuntimeError::CircularImport(vec!["a".into(), "b".into(), "a".into()])
        );
    }

    #[test]
    fn test_register_type_is_idempotent() {
        let mut rt = Runtime::new();
        let a = rt.register_type("host.Id", TypeKind::Newtype(TypeId::INT)).unwrap();
        let b = rt.register_type("host.Id", TypeKind::Newtype(TypeId::INT)).unwrap();
        assert_eq!(a, b);
        assert_eq!(rt.type_name(a), "host.Id");
        let err = rt
            .register_type("host.Id", TypeKind::Newtype(TypeId::FLOAT))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Layout { .. }));
    }

    #[test]
    fn test_stats_count_modules() {
        let mut rt = Runtime::new();
        let before = rt.stats();
        rt.load_module_from_source("m", "fn f(): int { return 1; }")
            .unwrap();
        let after = rt.stats();
        assert_eq!(after.modules, before.modules + 1);
        assert!(after.functions > before.functions);
    }
}
