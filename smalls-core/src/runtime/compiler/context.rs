//! 函数级编译状态：寄存器分配、作用域、跳转回填、常量池

use std::collections::HashMap;

use crate::compiler::resolver::LocalId;
use crate::kit::SourceRange;
use crate::runtime::bytecode::{
    encode_abc, encode_abx, encode_asbx, Constant, OpCode, MAX_BX, MAX_SBX, MIN_SBX,
};

use super::{CgResult, Codegen};

/// 块作用域
#[derive(Debug, Clone)]
pub(super) struct Scope {
    /// 进入时的局部变量上界
    pub base: u16,
    /// 作用域内有被闭包捕获的局部变量
    pub captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BreakKind {
    Loop,
    Switch,
}

/// 可被 break / continue 的结构
#[derive(Debug, Clone)]
pub(super) struct Breakable {
    pub kind: BreakKind,
    /// 进入时的作用域深度
    pub depth: usize,
    pub breaks: Vec<usize>,
    pub continues: Vec<usize>,
}

/// 正在编译的函数实例
#[derive(Debug, Clone)]
pub(super) struct FunctionState {
    pub name: String,
    pub code: Vec<u32>,
    pub lines: Vec<u32>,
    pub line: u32,
    /// 第一个空闲寄存器
    pub next_reg: u16,
    /// 活跃局部变量之上的第一个寄存器，语句结束时临时寄存器回落到这里
    pub local_top: u16,
    pub max_reg: u16,
    pub regs: HashMap<LocalId, u8>,
    pub scopes: Vec<Scope>,
    pub breakables: Vec<Breakable>,
    /// 闭包捕获表，顺序即 upvalue 下标
    pub captures: Vec<LocalId>,
}

impl FunctionState {
    pub fn new(name: &str, captures: Vec<LocalId>) -> Self {
        Self {
            name: name.to_string(),
            code: Vec::new(),
            lines: Vec::new(),
            line: 0,
            next_reg: 0,
            local_top: 0,
            max_reg: 0,
            regs: HashMap::new(),
            scopes: Vec::new(),
            breakables: Vec::new(),
            captures,
        }
    }
}

impl<'a> Codegen<'a> {
    // ===== 诊断 =====

    pub(super) fn fail<T>(&self, range: SourceRange, message: impl Into<String>) -> CgResult<T> {
        Err(super::CodegenError {
            function: self.cur.name.clone(),
            message: message.into(),
            range,
        })
    }

    // ===== 指令 =====

    pub(super) fn pc(&self) -> usize {
        self.cur.code.len()
    }

    pub(super) fn emit(&mut self, word: u32) -> usize {
        let pc = self.cur.code.len();
        self.cur.code.push(word);
        self.cur.lines.push(self.cur.line);
        pc
    }

    pub(super) fn emit_abc(&mut self, op: OpCode, a: u8, b: u32, c: u32) -> usize {
        self.emit(encode_abc(op, a as u32, b, c))
    }

    pub(super) fn emit_abx(&mut self, op: OpCode, a: u8, bx: u32) -> CgResult<usize> {
        if bx > MAX_BX {
            return self.fail(
                SourceRange::default(),
                format!("{} operand {} exceeds the instruction limit", op.name(), bx),
            );
        }
        Ok(self.emit(encode_abx(op, a as u32, bx)))
    }

    pub(super) fn emit_move(&mut self, dst: u8, src: u8) {
        if dst != src {
            self.emit_abc(OpCode::Move, dst, src as u32, 0);
        }
    }

    /// 写入跳转指令 (占位，稍后 patch)
    pub(super) fn emit_jump(&mut self, op: OpCode, a: u8) -> usize {
        self.emit(encode_asbx(op, a as u32, 0))
    }

    /// 把 `at` 处的跳转指向 `target`
    pub(super) fn patch_jump_to(&mut self, at: usize, target: usize) -> CgResult<()> {
        let offset = target as i64 - (at as i64 + 1);
        if offset < MIN_SBX as i64 || offset > MAX_SBX as i64 {
            return self.fail(SourceRange::default(), "jump distance too large");
        }
        let word = self.cur.code[at];
        let op = crate::runtime::bytecode::decode_op(word).unwrap_or(OpCode::Jmp);
        let a = crate::runtime::bytecode::arg_a(word);
        self.cur.code[at] = encode_asbx(op, a, offset as i32);
        Ok(())
    }

    /// 修补跳转到当前位置
    pub(super) fn patch_jump(&mut self, at: usize) -> CgResult<()> {
        let here = self.pc();
        self.patch_jump_to(at, here)
    }

    /// 写入循环跳转 (负向跳转)
    pub(super) fn emit_loop(&mut self, target: usize) -> CgResult<()> {
        let at = self.emit_jump(OpCode::Jmp, 0);
        self.patch_jump_to(at, target)
    }

    // ===== 寄存器 =====

    pub(super) fn alloc(&mut self) -> CgResult<u8> {
        self.alloc_n(1)
    }

    /// 分配连续 n 个寄存器，返回第一个
    pub(super) fn alloc_n(&mut self, n: usize) -> CgResult<u8> {
        let first = self.cur.next_reg;
        let end = first as usize + n;
        if end > self.max_registers as usize {
            return self.fail(
                SourceRange::default(),
                format!(
                    "function '{}' needs more than {} registers",
                    self.cur.name, self.max_registers
                ),
            );
        }
        self.cur.next_reg = end as u16;
        self.cur.max_reg = self.cur.max_reg.max(end as u16);
        Ok(first as u8)
    }

    pub(super) fn free_to(&mut self, reg: u16) {
        self.cur.next_reg = reg.max(self.cur.local_top);
    }

    /// 语句边界：释放全部临时寄存器
    pub(super) fn reset_temps(&mut self) {
        self.cur.next_reg = self.cur.local_top;
    }

    /// 在局部变量区顶端保留 n 个寄存器；调用时不能有活跃的临时寄存器
    pub(super) fn reserve_locals(&mut self, n: usize) -> CgResult<u8> {
        self.reset_temps();
        let first = self.alloc_n(n)?;
        self.cur.local_top = self.cur.next_reg;
        Ok(first)
    }

    /// 把局部变量绑定到寄存器
    pub(super) fn bind_local(&mut self, id: LocalId, reg: u8) {
        self.cur.regs.insert(id, reg);
        if self.info.local(id).captured {
            if let Some(scope) = self.cur.scopes.last_mut() {
                scope.captured = true;
            }
        }
    }

    // ===== 作用域 =====

    pub(super) fn push_scope(&mut self) {
        self.cur.scopes.push(Scope {
            base: self.cur.local_top,
            captured: false,
        });
    }

    pub(super) fn pop_scope(&mut self) {
        let Some(scope) = self.cur.scopes.pop() else {
            return;
        };
        if scope.captured {
            self.emit_abc(OpCode::CloseUpvals, scope.base as u8, 0, 0);
        }
        self.cur.local_top = scope.base;
        self.cur.next_reg = scope.base;
    }

    /// 离开 `depth` 及更深的作用域前需要关闭的最低寄存器
    pub(super) fn close_from(&self, depth: usize) -> Option<u16> {
        let inner = self.cur.scopes.get(depth..)?;
        if inner.iter().any(|s| s.captured) {
            inner.first().map(|s| s.base)
        } else {
            None
        }
    }

    pub(super) fn push_breakable(&mut self, kind: BreakKind) {
        self.cur.breakables.push(Breakable {
            kind,
            depth: self.cur.scopes.len(),
            breaks: Vec::new(),
            continues: Vec::new(),
        });
    }

    /// 弹出并把其中的 break 回填到当前位置
    pub(super) fn pop_breakable(&mut self) -> CgResult<Vec<usize>> {
        let Some(b) = self.cur.breakables.pop() else {
            return Ok(Vec::new());
        };
        for at in b.breaks {
            self.patch_jump(at)?;
        }
        Ok(b.continues)
    }

    /// 把当前循环里的 continue 回填到当前位置
    pub(super) fn patch_continues(&mut self) -> CgResult<()> {
        let pending = match self.cur.breakables.last_mut() {
            Some(b) => std::mem::take(&mut b.continues),
            None => Vec::new(),
        };
        for at in pending {
            self.patch_jump(at)?;
        }
        Ok(())
    }

    // ===== 常量池 =====

    pub(super) fn string_index(&mut self, s: &str) -> u32 {
        if let Some(i) = self.strings.get(s) {
            return *i;
        }
        let i = self.module.string_pool.len() as u32;
        self.module.string_pool.push(s.to_string());
        self.strings.insert(s.to_string(), i);
        i
    }

    fn constant(&mut self, key: ConstKey, c: Constant) -> u32 {
        if let Some(i) = self.constants.get(&key) {
            return *i;
        }
        let i = self.module.constants.len() as u32;
        self.module.constants.push(c);
        self.constants.insert(key, i);
        i
    }

    pub(super) fn int_constant(&mut self, v: i32) -> u32 {
        self.constant(ConstKey::Int(v), Constant::Int(v))
    }

    pub(super) fn float_constant(&mut self, v: f32) -> u32 {
        self.constant(ConstKey::Float(v.to_bits()), Constant::Float(v))
    }

    pub(super) fn string_constant(&mut self, s: &str) -> u32 {
        let idx = self.string_index(s);
        self.constant(ConstKey::String(idx), Constant::String(idx))
    }
}

/// 常量池去重键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum ConstKey {
    Int(i32),
    Float(u32),
    String(u32),
}
