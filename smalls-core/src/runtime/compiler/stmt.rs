//! 语句代码生成

use crate::compiler::ast::{
    CompareOp, DeclId, DeclKind, ExprId, ExprKind, JumpKind, StmtId, StmtKind,
};
use crate::compiler::resolver::{CallKind, ForEachKind, LabelInfo, LocalId, SiteKey};
use crate::kit::SourceRange;
use crate::runtime::bytecode::OpCode;

use super::context::BreakKind;
use super::{CgResult, Codegen};

impl<'a> Codegen<'a> {
    pub(super) fn stmt(&mut self, id: StmtId) -> CgResult<()> {
        let ast = self.ast.clone();
        let stmt = ast.stmt(id);
        self.cur.line = stmt.range.line();
        match &stmt.kind {
            StmtKind::Block(stmts) => {
                self.push_scope();
                for s in stmts {
                    self.stmt(*s)?;
                }
                self.pop_scope();
            }
            StmtKind::Expr(e) => self.expr_effect(*e)?,
            StmtKind::Decl(decl) => self.local_decl(*decl, stmt.range)?,
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let misses = self.cond_false(*cond)?;
                self.reset_temps();
                self.scoped(*then)?;
                match otherwise {
                    Some(o) => {
                        let end = self.emit_jump(OpCode::Jmp, 0);
                        for j in misses {
                            self.patch_jump(j)?;
                        }
                        self.scoped(*o)?;
                        self.patch_jump(end)?;
                    }
                    None => {
                        for j in misses {
                            self.patch_jump(j)?;
                        }
                    }
                }
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => self.for_loop(*init, *cond, *step, *body)?,
            StmtKind::ForEach { iterable, body, .. } => {
                self.foreach(id, *iterable, *body, stmt.range)?
            }
            StmtKind::Switch { scrutinee, cases } => self.switch(*scrutinee, cases)?,
            StmtKind::Label { .. } => return self.fail(stmt.range, "label outside of a switch"),
            StmtKind::Jump(jump) => self.jump(jump, stmt.range)?,
            StmtKind::Empty => {}
        }
        self.reset_temps();
        Ok(())
    }

    fn scoped(&mut self, id: StmtId) -> CgResult<()> {
        self.push_scope();
        self.stmt(id)?;
        self.pop_scope();
        Ok(())
    }

    fn site_local(&self, decl: DeclId, index: usize, range: SourceRange) -> CgResult<LocalId> {
        match self.info.sites.get(&SiteKey::Var(decl, index)) {
            Some(local) => Ok(*local),
            None => self.fail(range, "variable was not resolved"),
        }
    }

    // ===== 声明 =====

    fn local_decl(&mut self, decl: DeclId, range: SourceRange) -> CgResult<()> {
        let ast = self.ast.clone();
        let DeclKind::Var(var) = &ast.decl(decl).kind else {
            return self.fail(range, "only variables can be declared inside a function");
        };
        // 局部常量在使用处内联
        if var.is_const {
            return Ok(());
        }
        let n = var.names.len();
        let locals = (0..n)
            .map(|i| self.site_local(decl, i, var.names[i].range))
            .collect::<CgResult<Vec<_>>>()?;
        let first = self.reserve_locals(n)?;

        if var.inits.is_empty() {
            for (i, local) in locals.iter().enumerate() {
                let ty = self.info.local(*local).ty;
                self.emit_abx(OpCode::LoadNil, first + i as u8, ty.0)?;
            }
        } else if var.inits.len() == n {
            for (i, init) in var.inits.iter().enumerate() {
                self.expr_owned(*init, first + i as u8)?;
                self.reset_temps();
            }
        } else {
            let t = self.alloc()?;
            self.expr_to(var.inits[0], t)?;
            for (i, local) in locals.iter().enumerate() {
                let r = first + i as u8;
                self.emit_abc(OpCode::GetField, r, t as u32, i as u32);
                let ty = self.info.local(*local).ty;
                self.copy_if_value(ty, r);
            }
            self.reset_temps();
        }

        for (i, local) in locals.into_iter().enumerate() {
            self.bind_local(local, first + i as u8);
        }
        Ok(())
    }

    // ===== 循环 =====

    fn for_loop(
        &mut self,
        init: Option<StmtId>,
        cond: Option<ExprId>,
        step: Option<ExprId>,
        body: StmtId,
    ) -> CgResult<()> {
        self.push_scope();
        if let Some(init) = init {
            self.stmt(init)?;
        }
        let start = self.pc();
        let exits = match cond {
            Some(c) => self.cond_false(c)?,
            None => Vec::new(),
        };
        self.reset_temps();

        self.push_breakable(BreakKind::Loop);
        self.scoped(body)?;
        self.patch_continues()?;
        if let Some(step) = step {
            self.expr_effect(step)?;
            self.reset_temps();
        }
        self.emit_loop(start)?;
        for j in exits {
            self.patch_jump(j)?;
        }
        self.pop_breakable()?;
        self.pop_scope();
        Ok(())
    }

    fn foreach(
        &mut self,
        id: StmtId,
        iterable: ExprId,
        body: StmtId,
        range: SourceRange,
    ) -> CgResult<()> {
        let Some(info) = self.info.foreach.get(&id).cloned() else {
            return self.fail(range, "loop was not resolved");
        };
        self.push_scope();
        // 隐藏的迭代对象与下标
        let it = self.reserve_locals(2)?;
        let idx = it + 1;
        self.expr_to(iterable, it)?;
        self.load_int(0, idx)?;
        self.reset_temps();

        let start = self.pc();
        let n = self.alloc()?;
        self.emit_abc(OpCode::Len, n, it as u32, 0);
        self.emit_abc(OpCode::IsLt, idx, n as u32, 0);
        let exit = self.emit_jump(OpCode::Jmp, 0);
        self.reset_temps();

        self.push_breakable(BreakKind::Loop);
        self.push_scope();
        let first_ty = self.info.local(info.first).ty;
        match (info.kind, info.second) {
            (ForEachKind::Array, None) => {
                let v = self.reserve_locals(1)?;
                self.emit_abc(OpCode::GetIndex, v, it as u32, idx as u32);
                self.copy_if_value(first_ty, v);
                self.bind_local(info.first, v);
            }
            (ForEachKind::Array, Some(second)) => {
                let r = self.reserve_locals(2)?;
                self.emit_move(r, idx);
                self.emit_abc(OpCode::GetIndex, r + 1, it as u32, idx as u32);
                let ty = self.info.local(second).ty;
                self.copy_if_value(ty, r + 1);
                self.bind_local(info.first, r);
                self.bind_local(second, r + 1);
            }
            (ForEachKind::Map, second) => {
                let r = self.reserve_locals(2)?;
                self.emit_abc(OpCode::MapEntry, r, it as u32, idx as u32);
                self.copy_if_value(first_ty, r);
                self.bind_local(info.first, r);
                if let Some(second) = second {
                    let ty = self.info.local(second).ty;
                    self.copy_if_value(ty, r + 1);
                    self.bind_local(second, r + 1);
                }
            }
        }
        self.stmt(body)?;
        self.pop_scope();

        self.patch_continues()?;
        let one = self.alloc()?;
        self.load_int(1, one)?;
        self.emit_abc(OpCode::Add, idx, idx as u32, one as u32);
        self.reset_temps();
        self.emit_loop(start)?;
        self.patch_jump(exit)?;
        self.pop_breakable()?;
        self.pop_scope();
        Ok(())
    }

    // ===== switch =====

    fn switch(&mut self, scrutinee: ExprId, cases: &[StmtId]) -> CgResult<()> {
        let ast = self.ast.clone();
        self.push_scope();
        let s = self.reserve_locals(1)?;
        self.expr_to(scrutinee, s)?;
        self.reset_temps();
        let st = self.info.type_of(scrutinee);

        self.push_breakable(BreakKind::Switch);
        let mut ends = Vec::new();
        let mut default = None;
        for &case in cases {
            let stmt = ast.stmt(case);
            let StmtKind::Label { guard, body, .. } = &stmt.kind else {
                return self.fail(stmt.range, "expected 'case' or 'default'");
            };
            let Some(label) = self.info.labels.get(&case).cloned() else {
                return self.fail(stmt.range, "case label was not resolved");
            };
            if matches!(label, LabelInfo::Default) {
                default = Some(body);
                continue;
            }
            self.cur.line = stmt.range.line();
            self.push_scope();
            let mut misses = Vec::new();
            match label {
                LabelInfo::Variant { tag, bindings } => {
                    let t = self.alloc()?;
                    self.emit_abc(OpCode::SumTag, t, s as u32, 0);
                    let k = self.alloc()?;
                    self.load_int(tag as i32, k)?;
                    self.emit_abc(OpCode::IsEq, t, k as u32, 0);
                    misses.push(self.emit_jump(OpCode::Jmp, 0));
                    self.reset_temps();
                    self.bind_payload(s, &bindings)?;
                }
                LabelInfo::Equal { value, op } => {
                    let k = self.alloc()?;
                    self.load_const(&value, k)?;
                    let b = self.alloc()?;
                    self.compare_with(&op, CompareOp::Eq, s, k, st, b)?;
                    misses.push(self.emit_jump(OpCode::JmpF, b));
                    self.reset_temps();
                }
                LabelInfo::Default => {}
            }
            if let Some(g) = guard {
                misses.extend(self.cond_false(*g)?);
                self.reset_temps();
            }
            for s in body {
                self.stmt(*s)?;
            }
            self.pop_scope();
            ends.push(self.emit_jump(OpCode::Jmp, 0));
            for j in misses {
                self.patch_jump(j)?;
            }
        }
        if let Some(body) = default {
            self.push_scope();
            for s in body {
                self.stmt(*s)?;
            }
            self.pop_scope();
        }
        for j in ends {
            self.patch_jump(j)?;
        }
        self.pop_breakable()?;
        self.pop_scope();
        Ok(())
    }

    /// 变体载荷绑定到新局部变量：一个名字绑定整个载荷，多个名字按元组拆开
    fn bind_payload(&mut self, sum: u8, bindings: &[LocalId]) -> CgResult<()> {
        match bindings {
            [] => {}
            [single] => {
                let r = self.reserve_locals(1)?;
                self.emit_abc(OpCode::SumPayload, r, sum as u32, 0);
                let ty = self.info.local(*single).ty;
                self.copy_if_value(ty, r);
                self.bind_local(*single, r);
            }
            many => {
                let first = self.reserve_locals(many.len())?;
                let t = self.alloc()?;
                self.emit_abc(OpCode::SumPayload, t, sum as u32, 0);
                for (i, local) in many.iter().enumerate() {
                    let r = first + i as u8;
                    self.emit_abc(OpCode::GetField, r, t as u32, i as u32);
                    let ty = self.info.local(*local).ty;
                    self.copy_if_value(ty, r);
                    self.bind_local(*local, r);
                }
                self.reset_temps();
            }
        }
        Ok(())
    }

    // ===== 跳转 =====

    fn jump(&mut self, jump: &JumpKind, range: SourceRange) -> CgResult<()> {
        match jump {
            JumpKind::Break => {
                let Some(depth) = self.cur.breakables.last().map(|b| b.depth) else {
                    return self.fail(range, "break outside loop or switch");
                };
                if let Some(base) = self.close_from(depth) {
                    self.emit_abc(OpCode::CloseUpvals, base as u8, 0, 0);
                }
                let j = self.emit_jump(OpCode::Jmp, 0);
                if let Some(b) = self.cur.breakables.last_mut() {
                    b.breaks.push(j);
                }
            }
            JumpKind::Continue => {
                let Some(pos) = self
                    .cur
                    .breakables
                    .iter()
                    .rposition(|b| b.kind == BreakKind::Loop)
                else {
                    return self.fail(range, "continue outside loop");
                };
                let depth = self.cur.breakables[pos].depth;
                if let Some(base) = self.close_from(depth) {
                    self.emit_abc(OpCode::CloseUpvals, base as u8, 0, 0);
                }
                let j = self.emit_jump(OpCode::Jmp, 0);
                self.cur.breakables[pos].continues.push(j);
            }
            JumpKind::Return(values) => self.ret(values)?,
        }
        Ok(())
    }

    fn ret(&mut self, values: &[ExprId]) -> CgResult<()> {
        match values {
            [] => {
                self.emit_abc(OpCode::RetVoid, 0, 0, 0);
            }
            [value] => {
                if self.try_tail_call(*value)? {
                    return Ok(());
                }
                let r = self.alloc()?;
                self.expr_owned(*value, r)?;
                self.emit_abc(OpCode::Ret, r, 0, 0);
            }
            many => {
                let r = self.alloc()?;
                self.tuple(many, r)?;
                self.emit_abc(OpCode::Ret, r, 0, 0);
            }
        }
        Ok(())
    }

    /// `return f(...)` 且 f 是本模块中静态已知的函数
    fn try_tail_call(&mut self, value: ExprId) -> CgResult<bool> {
        if !self.config.enable_tail_calls {
            return Ok(false);
        }
        let ast = self.ast.clone();
        let value = ast.strip_grouping(value);
        let ExprKind::Call { args, .. } = &ast.expr(value).kind else {
            return Ok(false);
        };
        let Some(CallKind::Direct(callee)) = self.info.calls.get(&value).cloned() else {
            return Ok(false);
        };
        if callee.module != self.resolved.id {
            return Ok(false);
        }
        let base = self.alloc_n(args.len().max(1))?;
        for (i, a) in args.iter().enumerate() {
            self.expr_owned(*a, base + i as u8)?;
        }
        self.emit_abx(OpCode::TailCall, base, callee.index)?;
        Ok(true)
    }
}
