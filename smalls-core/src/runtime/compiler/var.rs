//! 变量存取、常量物化、函数值

use crate::compiler::resolver::{CalleeRef, ConstValue, LocalId};
use crate::compiler::types::{TypeId, TypeKind};
use crate::kit::SourceRange;
use crate::runtime::bytecode::{OpCode, MAX_SBX, MIN_SBX, NO_REG};

use super::{CgResult, Codegen};

/// 赋值目标；对象与键已求值到寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Place {
    Reg(u8),
    Upval(u8),
    Global(u32),
    Field { obj: u8, index: u32 },
    Index { obj: u8, key: u8 },
}

impl<'a> Codegen<'a> {
    // ===== 局部变量 =====

    /// 局部变量在当前函数中的位置：自己的寄存器或 upvalue
    pub(super) fn local_place(&self, id: LocalId, range: SourceRange) -> CgResult<Place> {
        if let Some(reg) = self.cur.regs.get(&id) {
            return Ok(Place::Reg(*reg));
        }
        match self.cur.captures.iter().position(|c| *c == id) {
            Some(i) => Ok(Place::Upval(i as u8)),
            None => self.fail(
                range,
                format!("local '{}' is not visible here", self.info.local(id).name),
            ),
        }
    }

    pub(super) fn load_place(&mut self, place: Place, dst: u8) {
        match place {
            Place::Reg(r) => self.emit_move(dst, r),
            Place::Upval(i) => {
                self.emit_abc(OpCode::GetUpval, dst, i as u32, 0);
            }
            Place::Global(g) => {
                self.emit(crate::runtime::bytecode::encode_abx(OpCode::GetGlobal, dst as u32, g));
            }
            Place::Field { obj, index } => {
                self.emit_abc(OpCode::GetField, dst, obj as u32, index);
            }
            Place::Index { obj, key } => {
                self.emit_abc(OpCode::GetIndex, dst, obj as u32, key as u32);
            }
        }
    }

    pub(super) fn store_place(&mut self, place: Place, src: u8) {
        match place {
            Place::Reg(r) => self.emit_move(r, src),
            Place::Upval(i) => {
                self.emit_abc(OpCode::SetUpval, src, i as u32, 0);
            }
            Place::Global(g) => {
                self.emit(crate::runtime::bytecode::encode_abx(OpCode::SetGlobal, src as u32, g));
            }
            Place::Field { obj, index } => {
                self.emit_abc(OpCode::SetField, obj, index, src as u32);
            }
            Place::Index { obj, key } => {
                self.emit_abc(OpCode::SetIndex, obj, key as u32, src as u32);
            }
        }
    }

    /// 值类型在绑定、赋值、传参时复制
    pub(super) fn copy_if_value(&mut self, ty: TypeId, reg: u8) {
        if self.is_value_type(ty) {
            self.emit_abc(OpCode::Copy, reg, reg as u32, 0);
        }
    }

    // ===== 常量 =====

    pub(super) fn load_int(&mut self, v: i32, dst: u8) -> CgResult<()> {
        if (MIN_SBX..=MAX_SBX).contains(&v) {
            self.emit(crate::runtime::bytecode::encode_asbx(OpCode::LoadI, dst as u32, v));
            Ok(())
        } else {
            let k = self.int_constant(v);
            self.emit_abx(OpCode::LoadK, dst, k).map(|_| ())
        }
    }

    pub(super) fn load_string(&mut self, s: &str, dst: u8) -> CgResult<()> {
        let k = self.string_constant(s);
        self.emit_abx(OpCode::LoadK, dst, k).map(|_| ())
    }

    /// 把编译期常量物化到 `dst`；聚合常量每次求值都新建对象
    pub(super) fn load_const(&mut self, value: &ConstValue, dst: u8) -> CgResult<()> {
        let save = self.cur.next_reg;
        match value {
            ConstValue::Int(v) => self.load_int(*v, dst)?,
            ConstValue::Float(v) => {
                let k = self.float_constant(*v);
                self.emit_abx(OpCode::LoadK, dst, k)?;
            }
            ConstValue::Bool(b) => {
                self.emit_abc(OpCode::LoadB, dst, *b as u32, 0);
            }
            ConstValue::String(s) => self.load_string(s, dst)?,
            ConstValue::Newtype { ty, inner } => {
                self.load_const(inner, dst)?;
                self.emit_abx(OpCode::Cast, dst, ty.0)?;
            }
            ConstValue::Array { ty, items } => {
                self.emit_abx(OpCode::NewArray, dst, ty.0)?;
                let fixed = matches!(self.types.kind(*ty), TypeKind::FixedArray { .. });
                let v = self.alloc()?;
                let k = if fixed { self.alloc()? } else { 0 };
                for (i, item) in items.iter().enumerate() {
                    self.load_const(item, v)?;
                    if fixed {
                        self.load_int(i as i32, k)?;
                        self.emit_abc(OpCode::SetIndex, dst, k as u32, v as u32);
                    } else {
                        self.emit_abc(OpCode::Append, dst, v as u32, 0);
                    }
                }
            }
            ConstValue::Tuple { items, .. } => {
                let base = self.alloc_n(items.len())?;
                for (i, item) in items.iter().enumerate() {
                    self.load_const(item, base + i as u8)?;
                }
                self.emit_abc(OpCode::NewTuple, dst, items.len() as u32, base as u32);
            }
            ConstValue::Struct { ty, fields } => {
                self.emit_abx(OpCode::NewStruct, dst, ty.0)?;
                let v = self.alloc()?;
                for (i, field) in fields.iter().enumerate() {
                    self.load_const(field, v)?;
                    self.emit_abc(OpCode::SetField, dst, i as u32, v as u32);
                }
            }
            ConstValue::Map { ty, entries } => {
                self.emit_abx(OpCode::NewMap, dst, ty.0)?;
                let k = self.alloc()?;
                let v = self.alloc()?;
                for (key, value) in entries {
                    self.load_const(key, k)?;
                    self.load_const(value, v)?;
                    self.emit_abc(OpCode::SetIndex, dst, k as u32, v as u32);
                }
            }
            ConstValue::Sum { ty, tag, payload } => {
                let p = match payload {
                    Some(p) => {
                        let r = self.alloc()?;
                        self.load_const(p, r)?;
                        r as u32
                    }
                    None => NO_REG,
                };
                self.emit_abx(OpCode::NewSum, dst, ty.0)?;
                self.emit_abc(OpCode::SumInit, dst, *tag, p);
            }
        }
        self.free_to(save);
        Ok(())
    }

    /// 无载荷变体
    pub(super) fn load_variant(&mut self, sum: TypeId, tag: u32, dst: u8) -> CgResult<()> {
        self.emit_abx(OpCode::NewSum, dst, sum.0)?;
        self.emit_abc(OpCode::SumInit, dst, tag, NO_REG);
        Ok(())
    }

    // ===== 函数 =====

    /// 函数作为值
    pub(super) fn load_function(&mut self, callee: CalleeRef, dst: u8) -> CgResult<()> {
        if callee.module == self.resolved.id {
            self.emit_abx(OpCode::Closure, dst, callee.index)?;
        } else {
            let ext = self.external(callee.module, callee.index);
            self.emit_abx(OpCode::ExtFunc, dst, ext)?;
        }
        Ok(())
    }

    /// 直接调用：参数已在 `base..`，结果写回 `base`
    pub(super) fn emit_direct_call(&mut self, callee: CalleeRef, base: u8) -> CgResult<()> {
        if callee.module == self.resolved.id {
            self.emit_abx(OpCode::Call, base, callee.index)?;
        } else {
            let ext = self.external(callee.module, callee.index);
            self.emit_abx(OpCode::CallExt, base, ext)?;
        }
        Ok(())
    }

    /// 被调函数的参数类型
    pub(super) fn callee_params(&self, callee: CalleeRef) -> Vec<TypeId> {
        let module = if callee.module == self.resolved.id {
            Some(self.resolved)
        } else {
            self.env.resolved(callee.module)
        };
        module
            .and_then(|m| m.functions.get(callee.index as usize))
            .map(|f| f.params.clone())
            .unwrap_or_default()
    }
}
