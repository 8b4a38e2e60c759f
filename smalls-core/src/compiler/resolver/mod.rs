//! 名字解析与类型检查
//!
//! 每个模块两遍：
//! 1. 收集顶层声明：导入、类型、函数签名、全局变量、运算符
//! 2. 逐个函数体做类型检查，结果写入 [`TypeInfo`] 侧表，供代码生成使用
//!
//! 泛型函数是模板，只在实例化时按实参检查函数体；实例编译进发起调用的模块。

mod const_eval;
mod expr;
mod generics;
mod operators;
mod stmt;
mod symbols;
mod type_expr;

pub use const_eval::ConstValue;
pub use operators::{key_operators, KeyOperators, OperatorEntry, OperatorKind};

use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use serde::Serialize;

use crate::compiler::ast::{Ast, DeclId, ExprId, FnId, StmtId};
use crate::compiler::types::{TypeId, TypeTable};
use crate::kit::{Context, SourceRange};
use crate::runtime::native::{NativeId, NativeSignature, NativeStructLayout};

// ===== 标识 =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleId(pub u32);

impl ModuleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

/// 某个模块中的某个函数实例
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CalleeRef {
    pub module: ModuleId,
    pub index: u32,
}

/// 模块原生函数表中的一项；泛型原生函数按返回类型区分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NativeRef {
    pub native: NativeId,
    pub ret: TypeId,
}

// ===== 符号 =====

#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Function { callee: CalleeRef, ty: TypeId },
    /// 泛型函数模板
    Template { module: ModuleId, fn_id: FnId },
    /// `ty` 为 None 表示签名含泛型参数
    Native {
        module: ModuleId,
        fn_id: FnId,
        native: NativeId,
        ty: Option<TypeId>,
    },
    Global {
        index: u32,
        ty: Option<TypeId>,
        mutable: bool,
    },
    Const { value: ConstValue, ty: TypeId },
    /// 尚未求值的顶层常量
    PendingConst { decl: DeclId, index: usize },
    Type(TypeId),
    /// 泛型类型模板（struct / sum / newtype / alias）
    TypeTemplate { module: ModuleId, decl: DeclId },
    /// 尚未展开的类型别名
    PendingAlias { decl: DeclId },
    Variant { sum: TypeId, index: u32 },
    VariantTemplate {
        module: ModuleId,
        decl: DeclId,
        index: u32,
    },
    Module(ModuleId),
}

// ===== 检查结果 =====

/// 名字绑定到什么
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Local(LocalId),
    Global { index: u32 },
    Function(CalleeRef),
    Const(ConstValue),
    /// 无载荷的变体作为值
    Variant { sum: TypeId, tag: u32 },
    /// `base.field`
    Field { index: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallKind {
    Direct(CalleeRef),
    /// 模块原生函数表下标
    Native { index: u32 },
    /// 调用函数类型的值
    Closure,
    Variant { sum: TypeId, tag: u32 },
    Newtype(TypeId),
    /// `array!(T)()` / `map!(K, V)()`
    EmptyContainer(TypeId),
    /// `get_propset!(T)(obj)`
    Propset(TypeId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorImpl {
    Primitive,
    /// 调用用户运算符；`swap` 交换操作数，`negate` 对结果取反
    Call {
        callee: CalleeRef,
        swap: bool,
        negate: bool,
    },
    /// `a <= b` 合成为 `(a < b) || (a == b)`
    LessOrEqual {
        lt: CalleeRef,
        eq: CalleeRef,
        swap: bool,
    },
    /// 结构体、和类型、元组的逐字段相等
    Structural { negate: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LabelInfo {
    Variant { tag: u32, bindings: Vec<LocalId> },
    Equal { value: ConstValue, op: OperatorImpl },
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForEachKind {
    Array,
    Map,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForEachInfo {
    pub kind: ForEachKind,
    pub first: LocalId,
    pub second: Option<LocalId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCheckKind {
    Variant(u32),
    Type(TypeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalInfo {
    pub name: String,
    pub ty: TypeId,
    /// 声明它的函数实例
    pub function: u32,
    pub captured: bool,
    pub mutable: bool,
}

/// 局部变量的声明位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteKey {
    Param(FnId, usize),
    Var(DeclId, usize),
}

/// 一个根实例（及其闭包）的检查结果
#[derive(Debug, Clone, Default)]
pub struct TypeInfo {
    pub expr_types: HashMap<ExprId, TypeId>,
    pub bindings: HashMap<ExprId, Binding>,
    pub calls: HashMap<ExprId, CallKind>,
    pub operators: HashMap<ExprId, OperatorImpl>,
    pub type_checks: HashMap<ExprId, TypeCheckKind>,
    /// 元组下标等已知常量
    pub const_values: HashMap<ExprId, ConstValue>,
    pub labels: HashMap<StmtId, LabelInfo>,
    pub foreach: HashMap<StmtId, ForEachInfo>,
    pub locals: Vec<LocalInfo>,
    pub sites: HashMap<SiteKey, LocalId>,
    /// 闭包表达式对应的实例
    pub closures: HashMap<FnId, u32>,
    /// 局部常量声明的值，按声明与名字位置
    pub local_consts: HashMap<(DeclId, usize), ConstValue>,
}

impl TypeInfo {
    pub fn type_of(&self, id: ExprId) -> TypeId {
        self.expr_types.get(&id).copied().unwrap_or(TypeId::ERROR)
    }

    pub fn local(&self, id: LocalId) -> &LocalInfo {
        &self.locals[id.0 as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceKind {
    Function(FnId),
    Closure { fn_id: FnId, parent: u32 },
    /// 全局变量初始化
    Init,
}

#[derive(Debug, Clone)]
pub struct FunctionInstance {
    pub name: String,
    /// 函数体所在的模块
    pub owner: ModuleId,
    pub kind: InstanceKind,
    /// `ResolvedModule::infos` 下标
    pub info: u32,
    pub params: Vec<TypeId>,
    pub ret: TypeId,
    /// 闭包捕获的外层局部变量，顺序即 upvalue 下标
    pub captures: Vec<LocalId>,
    pub range: SourceRange,
}

#[derive(Debug, Clone)]
pub struct GlobalInfo {
    pub name: String,
    pub ty: Option<TypeId>,
    pub decl: DeclId,
    pub range: SourceRange,
}

/// 一个模块的解析结果
#[derive(Debug, Clone)]
pub struct ResolvedModule {
    pub id: ModuleId,
    pub path: String,
    pub symbols: HashMap<String, Symbol>,
    pub exports: HashMap<String, Symbol>,
    pub functions: Vec<FunctionInstance>,
    pub infos: Vec<TypeInfo>,
    pub globals: Vec<GlobalInfo>,
    /// 全局变量在运行时全局表中的起始下标
    pub global_base: u32,
    pub natives: Vec<NativeRef>,
    pub operators: Vec<OperatorEntry>,
    pub dependencies: Vec<ModuleId>,
    pub init: Option<u32>,
    pub deprecated: HashSet<String>,
    pub template_count: usize,
    /// 是否导出了其他模块实例化时要读取 AST 的模板
    pub exports_templates: bool,
}

impl ResolvedModule {
    pub fn new(id: ModuleId, path: &str, global_base: u32) -> Self {
        Self {
            id,
            path: path.to_string(),
            symbols: HashMap::new(),
            exports: HashMap::new(),
            functions: Vec::new(),
            infos: Vec::new(),
            globals: Vec::new(),
            global_base,
            natives: Vec::new(),
            operators: Vec::new(),
            dependencies: Vec::new(),
            init: None,
            deprecated: HashSet::new(),
            template_count: 0,
            exports_templates: false,
        }
    }

    /// 按名字找已导出的非泛型函数
    pub fn exported_function(&self, name: &str) -> Option<CalleeRef> {
        match self.exports.get(name)? {
            Symbol::Function { callee, .. } => Some(*callee),
            _ => None,
        }
    }

    pub fn global_count(&self) -> u32 {
        self.globals.len() as u32
    }
}

/// 解析器对运行时其余部分的视图
pub trait ModuleEnv {
    fn module_path(&self, id: ModuleId) -> String;
    fn module_by_path(&self, path: &str) -> Option<ModuleId>;
    fn resolved(&self, id: ModuleId) -> Option<&ResolvedModule>;
    /// 取模块 AST；已丢弃时由实现方重新解析
    fn module_ast(&self, id: ModuleId) -> Option<Rc<Ast>>;
    /// 自动可见的模块（核心 prelude 与用户 prelude）
    fn prelude_modules(&self) -> Vec<ModuleId>;
    /// 其他模块已登记的运算符
    fn operators(&self) -> Vec<OperatorEntry>;
    fn global_count(&self) -> u32;
    fn native_function(&self, module: &str, name: &str) -> Option<NativeSignature>;
    fn native_struct(&self, qualified: &str) -> Option<NativeStructLayout>;
}

#[derive(Debug, Clone, PartialEq)]
enum ScopeEntry {
    Local(LocalId),
    Const(ConstValue, TypeId),
}

#[derive(Debug, Clone)]
struct Frame {
    instance: u32,
    ret: TypeId,
    loops: usize,
    switches: usize,
}

/// 正在检查的函数体
#[derive(Debug, Clone)]
struct Body {
    owner: ModuleId,
    ast: Rc<Ast>,
    info: TypeInfo,
    subst: HashMap<String, TypeId>,
    scopes: Vec<HashMap<String, ScopeEntry>>,
    frames: Vec<Frame>,
}

impl Body {
    fn new(owner: ModuleId, ast: Rc<Ast>, subst: HashMap<String, TypeId>) -> Self {
        Self {
            owner,
            ast,
            info: TypeInfo::default(),
            subst,
            scopes: Vec::new(),
            frames: Vec::new(),
        }
    }
}

/// 待检查的函数体
#[derive(Debug, Clone)]
struct PendingBody {
    instance: u32,
    owner: ModuleId,
    fn_id: FnId,
    subst: HashMap<String, TypeId>,
    trail: Vec<String>,
}

pub struct Resolver<'a> {
    env: &'a dyn ModuleEnv,
    types: &'a mut TypeTable,
    ctx: &'a mut Context,
    module: ModuleId,
    ast: Rc<Ast>,
    out: ResolvedModule,
    /// 其他模块的 AST 缓存
    asts: HashMap<ModuleId, Rc<Ast>>,
    /// 泛型实例缓存：`owner.name!(args)` -> 实例下标
    instances: HashMap<String, u32>,
    queue: VecDeque<PendingBody>,
    /// 正在求值的常量与别名，用于发现循环
    evaluating: Vec<DeclId>,
    /// 本模块声明的名字（导入不参与导出）
    local_names: HashSet<String>,
    body: Body,
    /// 泛型实例化链，用于诊断
    trail: Vec<String>,
    /// 正在解析原生签名，允许通配类型
    native_signature: bool,
    /// 等运算符声明齐全后再检查的映射键类型
    map_keys: Vec<(TypeId, SourceRange)>,
}

/// 解析一个模块
pub fn resolve_module(
    env: &dyn ModuleEnv,
    types: &mut TypeTable,
    ctx: &mut Context,
    module: ModuleId,
    path: &str,
    ast: Rc<Ast>,
) -> ResolvedModule {
    let global_base = env.global_count();
    let mut resolver = Resolver {
        env,
        types,
        ctx,
        module,
        ast: ast.clone(),
        out: ResolvedModule::new(module, path, global_base),
        asts: HashMap::new(),
        instances: HashMap::new(),
        queue: VecDeque::new(),
        evaluating: Vec::new(),
        local_names: HashSet::new(),
        body: Body::new(module, ast, HashMap::new()),
        trail: Vec::new(),
        native_signature: false,
        map_keys: Vec::new(),
    };
    resolver.run();
    tracing::debug!(
        target: "smalls::resolver",
        module = path,
        functions = resolver.out.functions.len(),
        globals = resolver.out.globals.len(),
        errors = resolver.ctx.errors(),
        "resolved module"
    );
    resolver.out
}

impl<'a> Resolver<'a> {
    fn run(&mut self) {
        // 第一遍
        self.collect_declarations();
        self.check_global_initializers();

        // 第二遍
        let count = self.out.functions.len();
        for idx in 0..count {
            if let InstanceKind::Function(fn_id) = self.out.functions[idx].kind {
                let pending = PendingBody {
                    instance: idx as u32,
                    owner: self.module,
                    fn_id,
                    subst: HashMap::new(),
                    trail: Vec::new(),
                };
                self.check_function_body(pending);
            }
        }
        while let Some(pending) = self.queue.pop_front() {
            self.check_function_body(pending);
        }
        self.check_pending_map_keys();
        self.collect_exports();
    }

    fn collect_exports(&mut self) {
        let mut exports = HashMap::new();
        for (name, sym) in &self.out.symbols {
            if name.starts_with('_') || !self.local_names.contains(name) {
                continue;
            }
            if matches!(sym, Symbol::Template { .. } | Symbol::TypeTemplate { .. }) {
                self.out.exports_templates = true;
            }
            exports.insert(name.clone(), sym.clone());
        }
        self.out.exports = exports;
    }

    // ===== 诊断 =====

    fn error(&mut self, range: SourceRange, message: impl Into<String>) {
        let mut diag = crate::kit::Diagnostic::error(
            crate::kit::DiagnosticKind::Semantic,
            range,
            message,
        );
        for step in self.trail.iter().rev() {
            diag = diag.with_note(step.clone());
        }
        self.ctx.push(diag);
    }

    fn error_with_notes(&mut self, range: SourceRange, message: impl Into<String>, notes: Vec<String>) {
        let mut diag = crate::kit::Diagnostic::error(
            crate::kit::DiagnosticKind::Semantic,
            range,
            message,
        );
        for n in notes {
            diag = diag.with_note(n);
        }
        for step in self.trail.iter().rev() {
            diag = diag.with_note(step.clone());
        }
        self.ctx.push(diag);
    }

    fn linking_error(&mut self, range: SourceRange, message: impl Into<String>) {
        self.ctx.linking_diagnostic(range, message);
    }

    fn warning(&mut self, range: SourceRange, message: impl Into<String>) {
        self.ctx
            .warning(crate::kit::DiagnosticKind::Semantic, range, message);
    }

    fn mismatch(&mut self, range: SourceRange, expected: TypeId, got: TypeId) {
        if expected.is_error() || got.is_error() {
            return;
        }
        let msg = format!(
            "type mismatch: expected {}, got {}",
            self.types.name(expected),
            self.types.name(got)
        );
        self.error(range, msg);
    }

    fn type_name(&self, id: TypeId) -> String {
        self.types.name(id).to_string()
    }

    // ===== 模块视图 =====

    fn module_path_of(&self, module: ModuleId) -> String {
        if module == self.module {
            self.out.path.clone()
        } else {
            self.env.module_path(module)
        }
    }

    fn ast_of(&mut self, module: ModuleId) -> Option<Rc<Ast>> {
        if module == self.module {
            return Some(self.ast.clone());
        }
        if let Some(ast) = self.asts.get(&module) {
            return Some(ast.clone());
        }
        let ast = self.env.module_ast(module)?;
        self.asts.insert(module, ast.clone());
        Some(ast)
    }

    fn module_symbol(&self, module: ModuleId, name: &str) -> Option<Symbol> {
        if module == self.module {
            self.out.symbols.get(name).cloned()
        } else {
            self.env.resolved(module)?.symbols.get(name).cloned()
        }
    }

    fn module_export(&self, module: ModuleId, name: &str) -> Option<Symbol> {
        if module == self.module {
            return self.out.symbols.get(name).cloned();
        }
        self.env.resolved(module)?.exports.get(name).cloned()
    }

    fn is_deprecated(&self, module: ModuleId, name: &str) -> bool {
        if module == self.module {
            self.out.deprecated.contains(name)
        } else {
            self.env
                .resolved(module)
                .map(|m| m.deprecated.contains(name))
                .unwrap_or(false)
        }
    }

    /// 顶层名字查找：所在模块，然后 prelude
    fn lookup_top(&mut self, module: ModuleId, name: &str) -> Option<(Symbol, ModuleId)> {
        if let Some(sym) = self.module_symbol(module, name) {
            return Some((sym, module));
        }
        for p in self.env.prelude_modules() {
            if p == module {
                continue;
            }
            if let Some(sym) = self.module_export(p, name) {
                return Some((sym, p));
            }
        }
        None
    }

    /// 当前模块中的函数实例
    fn push_instance(&mut self, instance: FunctionInstance) -> u32 {
        self.out.functions.push(instance);
        (self.out.functions.len() - 1) as u32
    }

    fn new_info(&mut self) -> u32 {
        self.out.infos.push(TypeInfo::default());
        (self.out.infos.len() - 1) as u32
    }

    /// 登记到本模块原生函数表
    fn native_ref(&mut self, native: NativeId, ret: TypeId) -> u32 {
        let r = NativeRef { native, ret };
        if let Some(i) = self.out.natives.iter().position(|n| *n == r) {
            return i as u32;
        }
        self.out.natives.push(r);
        (self.out.natives.len() - 1) as u32
    }

    fn add_dependency(&mut self, module: ModuleId) {
        if module != self.module && !self.out.dependencies.contains(&module) {
            self.out.dependencies.push(module);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_env {
    use super::*;

    /// 没有其他模块的环境
    #[derive(Default)]
    pub struct EmptyEnv;

    impl ModuleEnv for EmptyEnv {
        fn module_path(&self, _id: ModuleId) -> String {
            String::new()
        }
        fn module_by_path(&self, _path: &str) -> Option<ModuleId> {
            None
        }
        fn resolved(&self, _id: ModuleId) -> Option<&ResolvedModule> {
            None
        }
        fn module_ast(&self, _id: ModuleId) -> Option<Rc<Ast>> {
            None
        }
        fn prelude_modules(&self) -> Vec<ModuleId> {
            Vec::new()
        }
        fn operators(&self) -> Vec<OperatorEntry> {
            Vec::new()
        }
        fn global_count(&self) -> u32 {
            0
        }
        fn native_function(&self, _module: &str, _name: &str) -> Option<NativeSignature> {
            None
        }
        fn native_struct(&self, _qualified: &str) -> Option<NativeStructLayout> {
            None
        }
    }

    /// 解析一段源码，返回结果与诊断
    pub fn resolve_source(source: &str) -> (ResolvedModule, Context, TypeTable) {
        let parsed = crate::compiler::parser::parse(source, "test");
        assert!(!parsed.has_errors(), "parse errors: {:?}", parsed.parser_errors);
        let mut types = TypeTable::new();
        let mut ctx = Context::new("test", Default::default());
        let env = EmptyEnv;
        let resolved = resolve_module(
            &env,
            &mut types,
            &mut ctx,
            ModuleId(0),
            "test",
            Rc::new(parsed.ast),
        );
        (resolved, ctx, types)
    }

    pub fn messages(ctx: &Context) -> Vec<String> {
        ctx.diagnostics().iter().map(|d| d.message.clone()).collect()
    }
}
