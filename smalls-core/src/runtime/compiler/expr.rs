//! 表达式代码生成
//!
//! `expr_to` 把结果写进指定寄存器，`expr_any` 返回任一持有结果的寄存器
//! （当前函数自己的局部变量直接返回其寄存器）。临时寄存器在表达式结束时释放。

use crate::compiler::ast::{
    BinaryOp, BraceInitKind, BraceItem, BraceKey, CompareOp, ExprId, ExprKind, FStringPart,
    FnId, Literal, LogicalOp, UnaryOp,
};
use crate::compiler::resolver::{Binding, CallKind, CalleeRef, OperatorImpl, TypeCheckKind};
use crate::compiler::types::{TypeId, TypeKind};
use crate::kit::SourceRange;
use crate::runtime::bytecode::{OpCode, UpvalueDescriptor, NO_REG};

use super::var::Place;
use super::{CgResult, Codegen};

impl<'a> Codegen<'a> {
    // ===== 入口 =====

    pub(super) fn expr_any(&mut self, id: ExprId) -> CgResult<u8> {
        let id = self.ast.strip_grouping(id);
        if let ExprKind::Identifier(_) = &self.ast.expr(id).kind {
            if let Some(Binding::Local(local)) = self.info.bindings.get(&id) {
                if let Some(reg) = self.cur.regs.get(local) {
                    return Ok(*reg);
                }
            }
        }
        let r = self.alloc()?;
        self.expr_to(id, r)?;
        Ok(r)
    }

    /// 求值并在值类型来自已有存储位置时复制一份
    pub(super) fn expr_owned(&mut self, id: ExprId, dst: u8) -> CgResult<()> {
        self.expr_to(id, dst)?;
        let ty = self.info.type_of(id);
        if self.is_value_type(ty) && self.is_place(id) {
            self.emit_abc(OpCode::Copy, dst, dst as u32, 0);
        }
        Ok(())
    }

    fn is_place(&self, id: ExprId) -> bool {
        let id = self.ast.strip_grouping(id);
        match &self.ast.expr(id).kind {
            ExprKind::Identifier(_) | ExprKind::Path { .. } => matches!(
                self.info.bindings.get(&id),
                Some(Binding::Local(_) | Binding::Global { .. } | Binding::Field { .. })
            ),
            ExprKind::Index { .. } => true,
            _ => false,
        }
    }

    /// 只要副作用的表达式（表达式语句）
    pub(super) fn expr_effect(&mut self, id: ExprId) -> CgResult<()> {
        let ast = self.ast.clone();
        let id = ast.strip_grouping(id);
        let expr = ast.expr(id);
        match &expr.kind {
            ExprKind::Assign { op, target, value } => {
                self.assign(id, *op, *target, *value, expr.range)
            }
            _ => {
                let save = self.cur.next_reg;
                let r = self.alloc()?;
                self.expr_to(id, r)?;
                self.free_to(save);
                Ok(())
            }
        }
    }

    pub(super) fn expr_to(&mut self, id: ExprId, dst: u8) -> CgResult<()> {
        let ast = self.ast.clone();
        let expr = ast.expr(id);
        let range = expr.range;
        let save = self.cur.next_reg;
        match &expr.kind {
            ExprKind::Literal(lit) => match lit {
                Literal::Int(v) => self.load_int(*v, dst)?,
                Literal::Float(v) => {
                    let k = self.float_constant(*v);
                    self.emit_abx(OpCode::LoadK, dst, k)?;
                }
                Literal::Bool(b) => {
                    self.emit_abc(OpCode::LoadB, dst, *b as u32, 0);
                }
                Literal::String(s) => self.load_string(s, dst)?,
            },
            ExprKind::Identifier(_) | ExprKind::Path { .. } | ExprKind::GenericInst { .. } => {
                self.name_to(id, dst, range)?
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.expr_any(*lhs)?;
                let r = self.expr_any(*rhs)?;
                self.apply_binary(id, *op, dst, l, r, range)?;
            }
            ExprKind::Logical { op, lhs, rhs } => {
                self.expr_to(*lhs, dst)?;
                let jump = match op {
                    LogicalOp::And => OpCode::JmpF,
                    LogicalOp::Or => OpCode::JmpT,
                };
                let j = self.emit_jump(jump, dst);
                self.free_to(save);
                self.expr_to(*rhs, dst)?;
                self.patch_jump(j)?;
            }
            ExprKind::Comparison { op, lhs, rhs } => {
                let l = self.expr_any(*lhs)?;
                let r = self.expr_any(*rhs)?;
                let Some(imp) = self.info.operators.get(&id).cloned() else {
                    return self.fail(range, "comparison was not resolved");
                };
                let lt = self.info.type_of(*lhs);
                self.compare_with(&imp, *op, l, r, lt, dst)?;
            }
            ExprKind::Unary { op, operand } => {
                let r = self.expr_any(*operand)?;
                self.apply_unary(id, *op, dst, r, range)?;
            }
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let misses = self.cond_false(*cond)?;
                self.expr_owned(*then, dst)?;
                self.free_to(save);
                let end = self.emit_jump(OpCode::Jmp, 0);
                for j in misses {
                    self.patch_jump(j)?;
                }
                self.expr_owned(*otherwise, dst)?;
                self.patch_jump(end)?;
            }
            ExprKind::Assign { op, target, value } => {
                self.assign(id, *op, *target, *value, range)?;
            }
            ExprKind::Call { callee, args } => self.call(id, *callee, args, dst, range)?,
            ExprKind::Index { target, index } => {
                let tt = self.info.type_of(*target);
                let obj = self.expr_any(*target)?;
                if matches!(self.types.kind(tt), TypeKind::Tuple(_)) {
                    let Some(i) = self.info.const_values.get(index).and_then(|v| v.as_int()) else {
                        return self.fail(range, "tuple index is not a constant");
                    };
                    self.emit_abc(OpCode::GetField, dst, obj as u32, i as u32);
                } else {
                    let key = self.expr_any(*index)?;
                    self.emit_abc(OpCode::GetIndex, dst, obj as u32, key as u32);
                }
            }
            ExprKind::Grouping(inner) => self.expr_to(*inner, dst)?,
            ExprKind::BraceInit { kind, items, .. } => {
                let ty = self.info.type_of(id);
                self.brace(ty, *kind, items, dst, range)?;
            }
            ExprKind::Tuple(items) => self.tuple(items, dst)?,
            ExprKind::FString(parts) => self.fstring(parts, dst)?,
            ExprKind::Cast { expr: inner, .. } => {
                self.expr_to(*inner, dst)?;
                let src = self.info.type_of(*inner);
                let target = self.info.type_of(id);
                if src != target {
                    self.emit_abx(OpCode::Cast, dst, target.0)?;
                }
            }
            ExprKind::TypeCheck { expr: inner, .. } => match self.info.type_checks.get(&id).copied() {
                Some(TypeCheckKind::Variant(tag)) => {
                    let r = self.expr_any(*inner)?;
                    self.emit_abc(OpCode::SumTag, dst, r as u32, 0);
                    let k = self.alloc()?;
                    self.load_int(tag as i32, k)?;
                    self.emit_abc(OpCode::Eq, dst, dst as u32, k as u32);
                }
                Some(TypeCheckKind::Type(t)) => {
                    self.expr_to(*inner, dst)?;
                    self.emit_abx(OpCode::Is, dst, t.0)?;
                }
                None => return self.fail(range, "type check was not resolved"),
            },
            ExprKind::Closure(fn_id) => self.closure(*fn_id, dst, range)?,
            ExprKind::Error => return self.fail(range, "cannot compile an erroneous expression"),
        }
        self.free_to(save);
        Ok(())
    }

    // ===== 名字 =====

    fn name_to(&mut self, id: ExprId, dst: u8, range: SourceRange) -> CgResult<()> {
        let Some(binding) = self.info.bindings.get(&id).cloned() else {
            return self.fail(range, "name was not resolved");
        };
        match binding {
            Binding::Local(local) => {
                let place = self.local_place(local, range)?;
                self.load_place(place, dst);
            }
            Binding::Global { index } => self.load_place(Place::Global(index), dst),
            Binding::Function(callee) => self.load_function(callee, dst)?,
            Binding::Const(value) => self.load_const(&value, dst)?,
            Binding::Variant { sum, tag } => self.load_variant(sum, tag, dst)?,
            Binding::Field { index } => {
                let ExprKind::Path { base, .. } = &self.ast.expr(id).kind else {
                    return self.fail(range, "field access without a base");
                };
                let base = *base;
                let save = self.cur.next_reg;
                let obj = self.expr_any(base)?;
                self.emit_abc(OpCode::GetField, dst, obj as u32, index);
                self.free_to(save);
            }
        }
        Ok(())
    }

    /// 求出赋值目标；对象和键放在临时寄存器里
    pub(super) fn place(&mut self, target: ExprId) -> CgResult<Place> {
        let ast = self.ast.clone();
        let target = ast.strip_grouping(target);
        let expr = ast.expr(target);
        match &expr.kind {
            ExprKind::Identifier(_) | ExprKind::Path { .. } => {
                match self.info.bindings.get(&target).cloned() {
                    Some(Binding::Local(local)) => self.local_place(local, expr.range),
                    Some(Binding::Global { index }) => Ok(Place::Global(index)),
                    Some(Binding::Field { index }) => {
                        let ExprKind::Path { base, .. } = &expr.kind else {
                            return self.fail(expr.range, "field access without a base");
                        };
                        let obj = self.expr_any(*base)?;
                        Ok(Place::Field { obj, index })
                    }
                    _ => self.fail(expr.range, "invalid assignment target"),
                }
            }
            ExprKind::Index { target: base, index } => {
                let obj = self.expr_any(*base)?;
                let key = self.expr_any(*index)?;
                Ok(Place::Index { obj, key })
            }
            _ => self.fail(expr.range, "invalid assignment target"),
        }
    }

    // ===== 赋值 =====

    fn assign(
        &mut self,
        id: ExprId,
        op: Option<BinaryOp>,
        target: ExprId,
        value: ExprId,
        range: SourceRange,
    ) -> CgResult<()> {
        let ast = self.ast.clone();
        let save = self.cur.next_reg;
        let target = ast.strip_grouping(target);
        if let ExprKind::Tuple(targets) = &ast.expr(target).kind {
            let v = self.alloc()?;
            self.expr_to(value, v)?;
            for (i, t) in targets.iter().enumerate() {
                let inner = self.cur.next_reg;
                let place = self.place(*t)?;
                let u = self.alloc()?;
                self.emit_abc(OpCode::GetField, u, v as u32, i as u32);
                let ty = self.info.type_of(*t);
                self.copy_if_value(ty, u);
                self.store_place(place, u);
                self.free_to(inner);
            }
            self.free_to(save);
            return Ok(());
        }

        let place = self.place(target)?;
        match op {
            None => {
                let v = self.alloc()?;
                self.expr_owned(value, v)?;
                self.store_place(place, v);
            }
            Some(op) => {
                let cur = self.alloc()?;
                self.load_place(place, cur);
                let r = self.expr_any(value)?;
                self.apply_binary(id, op, cur, cur, r, range)?;
                self.store_place(place, cur);
            }
        }
        self.free_to(save);
        Ok(())
    }

    // ===== 运算符 =====

    /// 在新窗口里调用用户函数，结果写入 `dst`
    fn call_with(&mut self, callee: CalleeRef, args: &[u8], dst: u8) -> CgResult<()> {
        let save = self.cur.next_reg;
        let base = self.alloc_n(args.len().max(1))?;
        for (i, a) in args.iter().enumerate() {
            self.emit_move(base + i as u8, *a);
        }
        self.emit_direct_call(callee, base)?;
        self.emit_move(dst, base);
        self.free_to(save);
        Ok(())
    }

    pub(super) fn apply_binary(
        &mut self,
        op_id: ExprId,
        op: BinaryOp,
        dst: u8,
        l: u8,
        r: u8,
        range: SourceRange,
    ) -> CgResult<()> {
        match self.info.operators.get(&op_id).cloned() {
            Some(OperatorImpl::Primitive) => {
                let code = match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Div => OpCode::Div,
                    BinaryOp::Mod => OpCode::Mod,
                    BinaryOp::BitAnd => OpCode::BAnd,
                    BinaryOp::BitOr => OpCode::BOr,
                    BinaryOp::BitXor => OpCode::BXor,
                    BinaryOp::Shl => OpCode::Shl,
                    BinaryOp::Shr => OpCode::Shr,
                };
                self.emit_abc(code, dst, l as u32, r as u32);
                Ok(())
            }
            Some(OperatorImpl::Call { callee, swap, .. }) => {
                let args = if swap { [r, l] } else { [l, r] };
                self.call_with(callee, &args, dst)
            }
            _ => self.fail(range, format!("operator '{}' was not resolved", op.symbol())),
        }
    }

    fn apply_unary(
        &mut self,
        op_id: ExprId,
        op: UnaryOp,
        dst: u8,
        r: u8,
        range: SourceRange,
    ) -> CgResult<()> {
        match self.info.operators.get(&op_id).cloned() {
            Some(OperatorImpl::Primitive) => {
                let code = match op {
                    UnaryOp::Neg => OpCode::Neg,
                    UnaryOp::Not => OpCode::Not,
                    UnaryOp::BitNot => OpCode::BNot,
                };
                self.emit_abc(code, dst, r as u32, 0);
                Ok(())
            }
            Some(OperatorImpl::Call { callee, .. }) => self.call_with(callee, &[r], dst),
            _ => self.fail(range, "unary operator was not resolved"),
        }
    }

    /// 比较，结果为 bool 写入 `dst`
    pub(super) fn compare_with(
        &mut self,
        imp: &OperatorImpl,
        op: CompareOp,
        l: u8,
        r: u8,
        lhs_ty: TypeId,
        dst: u8,
    ) -> CgResult<()> {
        match imp {
            OperatorImpl::Primitive => {
                let (code, a, b) = match op {
                    CompareOp::Eq | CompareOp::Ne => (OpCode::Eq, l, r),
                    CompareOp::Lt => (OpCode::Lt, l, r),
                    CompareOp::Le => (OpCode::Le, l, r),
                    CompareOp::Gt => (OpCode::Lt, r, l),
                    CompareOp::Ge => (OpCode::Le, r, l),
                };
                self.emit_abc(code, dst, a as u32, b as u32);
                if op == CompareOp::Ne {
                    self.emit_abc(OpCode::Not, dst, dst as u32, 0);
                }
            }
            OperatorImpl::Call {
                callee,
                swap,
                negate,
            } => {
                let args = if *swap { [r, l] } else { [l, r] };
                self.call_with(*callee, &args, dst)?;
                if *negate {
                    self.emit_abc(OpCode::Not, dst, dst as u32, 0);
                }
            }
            OperatorImpl::LessOrEqual { lt, eq, swap } => {
                let args = if *swap { [r, l] } else { [l, r] };
                self.call_with(*lt, &args, dst)?;
                let done = self.emit_jump(OpCode::JmpT, dst);
                let eq_swap = self.callee_params(*eq).first().copied() != Some(lhs_ty);
                let args = if eq_swap { [r, l] } else { [l, r] };
                self.call_with(*eq, &args, dst)?;
                self.patch_jump(done)?;
            }
            OperatorImpl::Structural { negate } => {
                self.emit_abc(OpCode::Eq, dst, l as u32, r as u32);
                if *negate {
                    self.emit_abc(OpCode::Not, dst, dst as u32, 0);
                }
            }
        }
        Ok(())
    }

    /// 条件为假时跳走；返回待回填的跳转
    pub(super) fn cond_false(&mut self, id: ExprId) -> CgResult<Vec<usize>> {
        let ast = self.ast.clone();
        let id = ast.strip_grouping(id);
        let save = self.cur.next_reg;
        match &ast.expr(id).kind {
            ExprKind::Comparison { op, lhs, rhs }
                if self.info.operators.get(&id) == Some(&OperatorImpl::Primitive) =>
            {
                let l = self.expr_any(*lhs)?;
                let r = self.expr_any(*rhs)?;
                let (code, a, b, k) = match op {
                    CompareOp::Eq => (OpCode::IsEq, l, r, 0),
                    CompareOp::Ne => (OpCode::IsEq, l, r, 1),
                    CompareOp::Lt => (OpCode::IsLt, l, r, 0),
                    CompareOp::Gt => (OpCode::IsLt, r, l, 0),
                    CompareOp::Le => (OpCode::IsLe, l, r, 0),
                    CompareOp::Ge => (OpCode::IsLe, r, l, 0),
                };
                self.emit_abc(code, a, b as u32, k);
                let j = self.emit_jump(OpCode::Jmp, 0);
                self.free_to(save);
                Ok(vec![j])
            }
            ExprKind::Logical {
                op: LogicalOp::And,
                lhs,
                rhs,
            } => {
                let mut misses = self.cond_false(*lhs)?;
                misses.extend(self.cond_false(*rhs)?);
                Ok(misses)
            }
            _ => {
                let r = self.expr_any(id)?;
                let j = self.emit_jump(OpCode::JmpF, r);
                self.free_to(save);
                Ok(vec![j])
            }
        }
    }

    // ===== 调用 =====

    /// 参数窗口；`dst` 恰好是栈顶临时寄存器时直接复用
    fn args_window(&mut self, args: &[ExprId], dst: u8) -> CgResult<u8> {
        let n = args.len();
        let reuse = dst as u16 + 1 == self.cur.next_reg && dst as u16 >= self.cur.local_top;
        let base = if reuse {
            if n > 1 {
                self.alloc_n(n - 1)?;
            }
            dst
        } else {
            self.alloc_n(n.max(1))?
        };
        for (i, a) in args.iter().enumerate() {
            self.expr_owned(*a, base + i as u8)?;
        }
        Ok(base)
    }

    fn call(
        &mut self,
        id: ExprId,
        callee: ExprId,
        args: &[ExprId],
        dst: u8,
        range: SourceRange,
    ) -> CgResult<()> {
        let Some(kind) = self.info.calls.get(&id).cloned() else {
            return self.fail(range, "call was not resolved");
        };
        let save = self.cur.next_reg;
        match kind {
            CallKind::Direct(target) => {
                let base = self.args_window(args, dst)?;
                self.emit_direct_call(target, base)?;
                self.emit_move(dst, base);
            }
            CallKind::Native { index } => {
                let base = self.args_window(args, dst)?;
                self.emit_abc(OpCode::NativeCall, base, index, args.len() as u32);
                self.emit_move(dst, base);
            }
            CallKind::Closure => {
                let f = self.expr_any(callee)?;
                let base = self.args_window(args, dst)?;
                self.emit_abc(OpCode::CallClosure, base, f as u32, args.len() as u32);
                self.emit_move(dst, base);
            }
            CallKind::Variant { sum, tag } => {
                let payload = match args.len() {
                    0 => NO_REG,
                    1 => {
                        let r = self.alloc()?;
                        self.expr_owned(args[0], r)?;
                        r as u32
                    }
                    n => {
                        let base = self.alloc_n(n)?;
                        for (i, a) in args.iter().enumerate() {
                            self.expr_owned(*a, base + i as u8)?;
                        }
                        let r = self.alloc()?;
                        self.emit_abc(OpCode::NewTuple, r, n as u32, base as u32);
                        r as u32
                    }
                };
                self.emit_abx(OpCode::NewSum, dst, sum.0)?;
                self.emit_abc(OpCode::SumInit, dst, tag, payload);
            }
            CallKind::Newtype(t) => {
                let Some(arg) = args.first() else {
                    return self.fail(range, "newtype construction needs a value");
                };
                self.expr_owned(*arg, dst)?;
                self.emit_abx(OpCode::Cast, dst, t.0)?;
            }
            CallKind::EmptyContainer(t) => {
                let code = match self.types.kind(t) {
                    TypeKind::Map { .. } => OpCode::NewMap,
                    _ => OpCode::NewArray,
                };
                self.emit_abx(code, dst, t.0)?;
            }
            CallKind::Propset(t) => {
                let Some(arg) = args.first() else {
                    return self.fail(range, "get_propset needs an object");
                };
                self.expr_to(*arg, dst)?;
                self.emit_abx(OpCode::Propset, dst, t.0)?;
            }
        }
        self.free_to(save);
        Ok(())
    }

    // ===== 构造 =====

    pub(super) fn tuple(&mut self, items: &[ExprId], dst: u8) -> CgResult<()> {
        let save = self.cur.next_reg;
        let base = self.alloc_n(items.len().max(1))?;
        for (i, item) in items.iter().enumerate() {
            self.expr_owned(*item, base + i as u8)?;
        }
        self.emit_abc(OpCode::NewTuple, dst, items.len() as u32, base as u32);
        self.free_to(save);
        Ok(())
    }

    fn brace(
        &mut self,
        ty: TypeId,
        kind: BraceInitKind,
        items: &[BraceItem],
        dst: u8,
        range: SourceRange,
    ) -> CgResult<()> {
        let save = self.cur.next_reg;
        match self.types.kind(ty).clone() {
            TypeKind::Struct(def) => {
                self.emit_abx(OpCode::NewStruct, dst, ty.0)?;
                let v = self.alloc()?;
                for (i, item) in items.iter().enumerate() {
                    let index = match (&item.key, kind) {
                        (Some(BraceKey::Field(name)), BraceInitKind::Field) => {
                            match def.field_index(&name.name) {
                                Some(index) => index,
                                None => return self.fail(name.range, "unknown field"),
                            }
                        }
                        _ => i,
                    };
                    self.expr_owned(item.value, v)?;
                    self.emit_abc(OpCode::SetField, dst, index as u32, v as u32);
                }
            }
            TypeKind::Array(_) => {
                self.emit_abx(OpCode::NewArray, dst, ty.0)?;
                let v = self.alloc()?;
                for item in items {
                    self.expr_owned(item.value, v)?;
                    self.emit_abc(OpCode::Append, dst, v as u32, 0);
                }
            }
            TypeKind::FixedArray { .. } => {
                self.emit_abx(OpCode::NewArray, dst, ty.0)?;
                let k = self.alloc()?;
                let v = self.alloc()?;
                for (i, item) in items.iter().enumerate() {
                    self.load_int(i as i32, k)?;
                    self.expr_owned(item.value, v)?;
                    self.emit_abc(OpCode::SetIndex, dst, k as u32, v as u32);
                }
            }
            TypeKind::Map { .. } => {
                self.emit_abx(OpCode::NewMap, dst, ty.0)?;
                let k = self.alloc()?;
                let v = self.alloc()?;
                for item in items {
                    let Some(BraceKey::Expr(key)) = &item.key else {
                        return self.fail(range, "map initializer item without a key");
                    };
                    self.expr_owned(*key, k)?;
                    self.expr_owned(item.value, v)?;
                    self.emit_abc(OpCode::SetIndex, dst, k as u32, v as u32);
                }
            }
            TypeKind::Tuple(_) => {
                let values: Vec<ExprId> = items.iter().map(|i| i.value).collect();
                self.tuple(&values, dst)?;
            }
            _ => {
                return self.fail(
                    range,
                    format!("type {} cannot be brace-initialized", self.types.name(ty)),
                )
            }
        }
        self.free_to(save);
        Ok(())
    }

    fn fstring(&mut self, parts: &[FStringPart], dst: u8) -> CgResult<()> {
        if parts.is_empty() {
            return self.load_string("", dst);
        }
        let save = self.cur.next_reg;
        let t = self.alloc()?;
        for (i, part) in parts.iter().enumerate() {
            let target = if i == 0 { dst } else { t };
            match part {
                FStringPart::Text(s) => self.load_string(s, target)?,
                FStringPart::Expr(e) => {
                    if self.info.type_of(*e) == TypeId::STRING {
                        self.expr_to(*e, target)?;
                    } else {
                        let r = self.expr_any(*e)?;
                        self.emit_abc(OpCode::ToString, target, r as u32, 0);
                    }
                }
            }
            if i > 0 {
                self.emit_abc(OpCode::Add, dst, dst as u32, t as u32);
            }
            self.free_to(t as u16 + 1);
        }
        self.free_to(save);
        Ok(())
    }

    // ===== 闭包 =====

    fn closure(&mut self, fn_id: FnId, dst: u8, range: SourceRange) -> CgResult<()> {
        let Some(index) = self.info.closures.get(&fn_id).copied() else {
            return self.fail(range, "closure was not resolved");
        };
        let mut function = self.compile_instance(index)?;
        let captures = self.resolved.functions[index as usize].captures.clone();
        let mut descriptors = Vec::with_capacity(captures.len());
        for local in captures {
            let d = match self.local_place(local, range)? {
                Place::Reg(r) => UpvalueDescriptor::Local(r),
                Place::Upval(i) => UpvalueDescriptor::Upvalue(i),
                _ => return self.fail(range, "captured variable is not a local"),
            };
            descriptors.push(d);
        }
        function.upvalue_descriptors = descriptors;
        self.functions[index as usize] = Some(function);
        self.emit_abx(OpCode::Closure, dst, index)?;
        Ok(())
    }
}
