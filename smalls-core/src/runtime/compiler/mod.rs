//! 字节码生成
//!
//! 输入解析结果与 AST，输出 [`BytecodeModule`]。函数实例按解析结果中的顺序
//! 生成，闭包在外层函数遇到闭包表达式时嵌套生成。

mod context;
mod expr;
mod stmt;
mod var;

use std::collections::HashMap;
use std::mem;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::compiler::ast::{Ast, DeclKind, FnId};
use crate::compiler::resolver::{
    InstanceKind, ModuleEnv, ModuleId, ResolvedModule, SiteKey, TypeInfo,
};
use crate::compiler::types::{TypeId, TypeTable};
use crate::kit::SourceRange;
use crate::runtime::bytecode::{
    decode_op, BytecodeModule, CompiledFunction, ExternalRef, OpCode, MAX_A,
};
use smalls_config::CompilerConfig;

use context::{ConstKey, FunctionState};

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{function}: {message}")]
pub struct CodegenError {
    pub function: String,
    pub message: String,
    pub range: SourceRange,
}

pub(super) type CgResult<T> = Result<T, CodegenError>;

pub(crate) struct Codegen<'a> {
    resolved: &'a ResolvedModule,
    types: &'a mut TypeTable,
    env: &'a dyn ModuleEnv,
    config: &'a CompilerConfig,
    max_registers: u16,
    module: BytecodeModule,
    strings: HashMap<String, u32>,
    constants: HashMap<ConstKey, u32>,
    externals: HashMap<ExternalRef, u32>,
    functions: Vec<Option<CompiledFunction>>,
    asts: HashMap<ModuleId, Rc<Ast>>,
    /// 当前根实例的 AST 与检查结果
    ast: Rc<Ast>,
    info: &'a TypeInfo,
    cur: FunctionState,
    /// 外层函数（生成闭包时）
    outer: Vec<FunctionState>,
}

/// 生成一个模块的字节码
pub fn compile_module(
    resolved: &ResolvedModule,
    ast: Rc<Ast>,
    types: &mut TypeTable,
    env: &dyn ModuleEnv,
    config: &CompilerConfig,
    max_registers: usize,
) -> Result<BytecodeModule, CodegenError> {
    let empty = TypeInfo::default();
    let mut module = BytecodeModule::new(resolved.path.clone());
    module.natives = resolved.natives.clone();
    module.init = resolved.init;
    let mut asts = HashMap::new();
    asts.insert(resolved.id, ast.clone());
    let mut cg = Codegen {
        resolved,
        types,
        env,
        config,
        max_registers: max_registers.clamp(1, MAX_A as usize + 1) as u16,
        module,
        strings: HashMap::new(),
        constants: HashMap::new(),
        externals: HashMap::new(),
        functions: vec![None; resolved.functions.len()],
        asts,
        ast,
        info: &empty,
        cur: FunctionState::new("", Vec::new()),
        outer: Vec::new(),
    };
    cg.run()?;
    debug!(
        target: "smalls::compiler",
        module = %resolved.path,
        functions = cg.module.functions.len(),
        constants = cg.module.constants.len(),
        instructions = cg.module.instruction_count(),
        "compiled module"
    );
    Ok(cg.module)
}

impl<'a> Codegen<'a> {
    fn run(&mut self) -> CgResult<()> {
        let resolved = self.resolved;
        for (index, inst) in resolved.functions.iter().enumerate() {
            if matches!(inst.kind, InstanceKind::Closure { .. }) {
                continue;
            }
            let Some(info) = resolved.infos.get(inst.info as usize) else {
                return self.fail(inst.range, format!("missing type info for '{}'", inst.name));
            };
            self.info = info;
            self.ast = self.ast_of(inst.owner, inst.range)?;
            let f = self.compile_instance(index as u32)?;
            self.functions[index] = Some(f);
        }
        let mut functions = Vec::with_capacity(self.functions.len());
        for (index, slot) in mem::take(&mut self.functions).into_iter().enumerate() {
            match slot {
                Some(f) => functions.push(f),
                None => {
                    let inst = &resolved.functions[index];
                    return self.fail(inst.range, format!("'{}' was never generated", inst.name));
                }
            }
        }
        self.module.functions = functions;
        Ok(())
    }

    fn ast_of(&mut self, module: ModuleId, range: SourceRange) -> CgResult<Rc<Ast>> {
        if let Some(ast) = self.asts.get(&module) {
            return Ok(ast.clone());
        }
        match self.env.module_ast(module) {
            Some(ast) => {
                self.asts.insert(module, ast.clone());
                Ok(ast)
            }
            None => self.fail(
                range,
                format!("source of module '{}' is no longer available", self.env.module_path(module)),
            ),
        }
    }

    /// 生成一个函数实例；闭包在外层函数的状态之上嵌套生成
    fn compile_instance(&mut self, index: u32) -> CgResult<CompiledFunction> {
        let resolved = self.resolved;
        let inst = &resolved.functions[index as usize];
        trace!(target: "smalls::compiler", function = %inst.name, "generating");
        let state = FunctionState::new(&inst.name, inst.captures.clone());
        let parent = mem::replace(&mut self.cur, state);
        self.outer.push(parent);
        self.cur.line = inst.range.line();

        let result = match inst.kind {
            InstanceKind::Function(fn_id) | InstanceKind::Closure { fn_id, .. } => {
                self.function_body(fn_id)
            }
            InstanceKind::Init => self.init_body(),
        };

        let parent = self.outer.pop().unwrap_or_else(|| FunctionState::new("", Vec::new()));
        let state = mem::replace(&mut self.cur, parent);
        result?;
        self.finish(index, state)
    }

    fn function_body(&mut self, fn_id: FnId) -> CgResult<()> {
        let ast = self.ast.clone();
        let f = ast.function(fn_id);
        let Some(body) = f.body else {
            return self.fail(f.range, format!("function '{}' has no body", f.name.name));
        };
        self.push_scope();
        let first = self.reserve_locals(f.params.len())?;
        for i in 0..f.params.len() {
            let Some(local) = self.info.sites.get(&SiteKey::Param(fn_id, i)).copied() else {
                return self.fail(f.params[i].name.range, "parameter was not resolved");
            };
            self.bind_local(local, first + i as u8);
        }
        self.stmt(body)?;
        self.pop_scope();
        Ok(())
    }

    /// `__init`：按声明顺序给有初始值的全局变量赋值
    fn init_body(&mut self) -> CgResult<()> {
        let ast = self.ast.clone();
        for &decl in &ast.items {
            let DeclKind::Var(var) = &ast.decl(decl).kind else {
                continue;
            };
            if var.is_const {
                continue;
            }
            self.cur.line = ast.decl(decl).range.line();
            let mut slots = Vec::with_capacity(var.names.len());
            let mut types = Vec::with_capacity(var.names.len());
            for name in &var.names {
                let Some(pos) = self
                    .resolved
                    .globals
                    .iter()
                    .position(|g| g.decl == decl && g.name == name.name)
                else {
                    return self.fail(name.range, format!("global '{}' was not resolved", name.name));
                };
                slots.push(self.resolved.global_base + pos as u32);
                types.push(self.resolved.globals[pos].ty.unwrap_or(TypeId::ERROR));
            }
            if var.inits.is_empty() {
                // 未初始化的全局变量取零值
                for (slot, ty) in slots.iter().zip(types) {
                    let t = self.alloc()?;
                    self.emit_abx(OpCode::LoadNil, t, ty.0)?;
                    self.emit_abx(OpCode::SetGlobal, t, *slot)?;
                    self.reset_temps();
                }
            } else if var.inits.len() == var.names.len() {
                for (init, slot) in var.inits.iter().zip(&slots) {
                    let t = self.alloc()?;
                    self.expr_owned(*init, t)?;
                    self.emit_abx(OpCode::SetGlobal, t, *slot)?;
                    self.reset_temps();
                }
            } else {
                let t = self.alloc()?;
                self.expr_to(var.inits[0], t)?;
                for (i, slot) in slots.iter().enumerate() {
                    let u = self.alloc()?;
                    self.emit_abc(OpCode::GetField, u, t as u32, i as u32);
                    self.emit_abx(OpCode::SetGlobal, u, *slot)?;
                    self.free_to(u as u16);
                }
                self.reset_temps();
            }
        }
        Ok(())
    }

    /// 补齐结尾并组装成品
    fn finish(&mut self, index: u32, mut state: FunctionState) -> CgResult<CompiledFunction> {
        let len = state.code.len();
        let jumps_to_end = state.code.iter().enumerate().any(|(pc, w)| {
            matches!(
                decode_op(*w),
                Ok(OpCode::Jmp | OpCode::JmpF | OpCode::JmpT)
            ) && pc as i64 + 1 + crate::runtime::bytecode::arg_sbx(*w) as i64 == len as i64
        });
        let terminated = state
            .code
            .last()
            .and_then(|w| decode_op(*w).ok())
            .map(|op| op.is_terminator())
            .unwrap_or(false);
        if !terminated || jumps_to_end {
            state.code.push(crate::runtime::bytecode::encode_abc(OpCode::RetVoid, 0, 0, 0));
            state.lines.push(state.line);
        }

        let resolved = self.resolved;
        let inst = &resolved.functions[index as usize];
        let signature = self.types.function_of(inst.params.clone(), inst.ret);
        Ok(CompiledFunction {
            name: inst.name.clone(),
            param_count: inst.params.len() as u8,
            register_count: state.max_reg.max(1),
            return_type: inst.ret,
            signature,
            instructions: state.code,
            upvalue_descriptors: Vec::new(),
            debug_line_map: self.config.emit_line_map.then_some(state.lines),
        })
    }

    /// 外部函数表下标
    fn external(&mut self, module: ModuleId, function: u32) -> u32 {
        let key = ExternalRef { module, function };
        if let Some(i) = self.externals.get(&key) {
            return *i;
        }
        let i = self.module.externals.len() as u32;
        self.module.externals.push(key);
        self.externals.insert(key, i);
        i
    }

    fn is_value_type(&self, ty: TypeId) -> bool {
        self.types.has_value_semantics(ty)
    }
}

#[cfg(test)]
mod tests;
