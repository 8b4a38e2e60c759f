//! 指令解释循环

use std::rc::Rc;

use tracing::warn;

use super::call::{self, capture_upvalue, close_upvalues, push_frame};
use super::{index, operators, zero_value};
use crate::compiler::resolver::ModuleId;
use crate::compiler::types::TypeId;
use crate::runtime::bytecode::{
    arg_a, arg_b, arg_bx, arg_c, arg_sbx, decode_op, BytecodeModule, Constant, OpCode,
    UpvalueDescriptor, NO_REG,
};
use crate::runtime::heap::{ClosureObject, HeapObject};
use crate::runtime::value::Value;
use crate::runtime::Runtime;

pub(crate) const GAS_EXHAUSTED: &str = "Script exceeded execution limit";

/// 执行直到 `stop` 之上的第一帧返回；出错时记录调用栈
pub(super) fn run(rt: &mut Runtime, stop: usize) -> Result<Value, String> {
    match run_loop(rt, stop) {
        Ok(v) => Ok(v),
        Err(e) => {
            call::capture_trace(rt);
            Err(e)
        }
    }
}

#[inline]
fn reg(rt: &Runtime, i: usize) -> Value {
    rt.vm.registers.get(i).copied().unwrap_or_default()
}

#[inline]
fn set(rt: &mut Runtime, i: usize, v: Value) {
    if let Some(slot) = rt.vm.registers.get_mut(i) {
        *slot = v;
    }
}

fn frame_info(rt: &Runtime) -> Result<(Rc<BytecodeModule>, ModuleId, usize), String> {
    let f = rt
        .vm
        .frames
        .last()
        .ok_or_else(|| "no active frame".to_string())?;
    Ok((f.code.clone(), f.module, f.base))
}

fn jump(rt: &mut Runtime, offset: i32) {
    if let Some(f) = rt.vm.frames.last_mut() {
        f.pc = (f.pc as i64 + offset as i64) as usize;
    }
}

fn constant(rt: &mut Runtime, code: &BytecodeModule, index: u32) -> Result<Value, String> {
    match code.constants.get(index as usize) {
        Some(Constant::Int(i)) => Ok(Value::int(*i)),
        Some(Constant::Float(f)) => Ok(Value::float(*f)),
        Some(Constant::String(s)) => {
            let text = code
                .string_pool
                .get(*s as usize)
                .ok_or_else(|| format!("string #{} missing from pool", s))?;
            Ok(rt.intern(text))
        }
        None => Err(format!("constant #{} out of range", index)),
    }
}

/// 目标模块与本帧相同就复用本帧的代码
fn module_code(
    rt: &mut Runtime,
    current: &Rc<BytecodeModule>,
    here: ModuleId,
    target: ModuleId,
) -> Result<Rc<BytecodeModule>, String> {
    if target == here {
        return Ok(current.clone());
    }
    rt.ready_bytecode(target).map_err(|e| e.to_string())
}

fn run_loop(rt: &mut Runtime, stop: usize) -> Result<Value, String> {
    loop {
        if let Some(gas) = rt.vm.gas.as_mut() {
            if *gas == 0 {
                warn!(target: "smalls::vm", "instruction budget exhausted");
                return Err(GAS_EXHAUSTED.to_string());
            }
            *gas -= 1;
        }
        rt.vm.instructions += 1;

        let (word, base) = {
            let frame = rt
                .vm
                .frames
                .last_mut()
                .ok_or_else(|| "no active frame".to_string())?;
            let function = frame
                .code
                .function(frame.function)
                .ok_or_else(|| format!("function #{} not found", frame.function))?;
            let word = *function.instructions.get(frame.pc).ok_or_else(|| {
                format!("'{}' ran past its last instruction", function.name)
            })?;
            frame.pc += 1;
            (word, frame.base)
        };
        let op = decode_op(word).map_err(|raw| format!("invalid opcode 0x{:02x}", raw))?;

        #[cfg(feature = "trace_execution")]
        tracing::trace!(
            target: "smalls::vm",
            "{:>6}  {}",
            base,
            crate::runtime::bytecode::format_instruction(word)
        );

        let a = base + arg_a(word) as usize;
        let b = arg_b(word);
        let c = arg_c(word);

        match op {
            // ===== 加载与传送 =====
            OpCode::Move => {
                let v = reg(rt, base + b as usize);
                set(rt, a, v);
            }
            OpCode::LoadI => set(rt, a, Value::int(arg_sbx(word))),
            OpCode::LoadB => set(rt, a, Value::bool(b != 0)),
            OpCode::LoadK => {
                let (code, _, _) = frame_info(rt)?;
                let v = constant(rt, &code, arg_bx(word))?;
                set(rt, a, v);
            }
            OpCode::LoadNil => {
                let v = zero_value(rt, TypeId(arg_bx(word)));
                set(rt, a, v);
            }
            OpCode::GetGlobal => {
                let slot = arg_bx(word) as usize;
                let v = rt
                    .globals
                    .get(slot)
                    .copied()
                    .ok_or_else(|| format!("global #{} out of range", slot))?;
                set(rt, a, v);
            }
            OpCode::SetGlobal => {
                let slot = arg_bx(word) as usize;
                let v = reg(rt, a);
                let g = rt
                    .globals
                    .get_mut(slot)
                    .ok_or_else(|| format!("global #{} out of range", slot))?;
                *g = v;
            }

            // ===== 算术与比较 =====
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::BAnd
            | OpCode::BOr
            | OpCode::BXor
            | OpCode::Shl
            | OpCode::Shr => {
                let l = reg(rt, base + b as usize);
                let r = reg(rt, base + c as usize);
                let v = operators::arith(rt, op, l, r)?;
                set(rt, a, v);
            }
            OpCode::Neg | OpCode::Not | OpCode::BNot => {
                let v = operators::unary(rt, op, reg(rt, base + b as usize))?;
                set(rt, a, v);
            }
            OpCode::Eq => {
                let l = reg(rt, base + b as usize);
                let r = reg(rt, base + c as usize);
                let v = rt.heap.values_equal(&l, &r);
                set(rt, a, Value::bool(v));
            }
            OpCode::Lt | OpCode::Le => {
                let l = reg(rt, base + b as usize);
                let r = reg(rt, base + c as usize);
                let v = operators::less(rt, &l, &r, op == OpCode::Le)?;
                set(rt, a, Value::bool(v));
            }
            OpCode::IsEq | OpCode::IsLt | OpCode::IsLe => {
                let l = reg(rt, a);
                let r = reg(rt, base + b as usize);
                let holds = match op {
                    OpCode::IsEq => rt.heap.values_equal(&l, &r),
                    OpCode::IsLt => operators::less(rt, &l, &r, false)?,
                    _ => operators::less(rt, &l, &r, true)?,
                };
                if holds != (c != 0) {
                    jump(rt, 1);
                }
            }

            // ===== 跳转 =====
            OpCode::Jmp => jump(rt, arg_sbx(word)),
            OpCode::JmpF => {
                if !reg(rt, a).is_truthy() {
                    jump(rt, arg_sbx(word));
                }
            }
            OpCode::JmpT => {
                if reg(rt, a).is_truthy() {
                    jump(rt, arg_sbx(word));
                }
            }

            // ===== 调用 =====
            OpCode::Call => {
                let (code, module, _) = frame_info(rt)?;
                push_frame(rt, code, module, arg_bx(word), None, a, Some(a))?;
            }
            OpCode::CallExt => {
                let (code, _, _) = frame_info(rt)?;
                let ext = *code
                    .externals
                    .get(arg_bx(word) as usize)
                    .ok_or_else(|| format!("external #{} out of range", arg_bx(word)))?;
                let target = rt.ready_bytecode(ext.module).map_err(|e| e.to_string())?;
                push_frame(rt, target, ext.module, ext.function, None, a, Some(a))?;
            }
            OpCode::TailCall => tail_call(rt, a, arg_bx(word))?,
            OpCode::CallClosure => {
                let f = reg(rt, base + b as usize);
                let (target_module, function, ptr) = call::closure_target(rt, &f)?;
                let (code, module, _) = frame_info(rt)?;
                let target = module_code(rt, &code, module, target_module)?;
                let params = target
                    .function(function)
                    .map(|f| f.param_count as u32)
                    .unwrap_or(0);
                if params != c {
                    return Err(format!(
                        "closure expects {} argument(s), got {}",
                        params, c
                    ));
                }
                push_frame(rt, target, target_module, function, Some(ptr), a, Some(a))?;
            }
            OpCode::NativeCall => {
                let (code, _, _) = frame_info(rt)?;
                let end = (a + c as usize).min(rt.vm.registers.len());
                let args = rt.vm.registers[a..end].to_vec();
                let v = call::native_call(rt, &code, b, args)?;
                set(rt, a, v);
            }
            OpCode::Ret | OpCode::RetVoid => {
                let value = if op == OpCode::Ret {
                    reg(rt, a)
                } else {
                    Value::VOID
                };
                let frame = rt
                    .vm
                    .frames
                    .pop()
                    .ok_or_else(|| "return without a frame".to_string())?;
                close_upvalues(rt, frame.base);
                match frame.ret_slot {
                    Some(slot) if rt.vm.frames.len() > stop => set(rt, slot, value),
                    _ => return Ok(value),
                }
            }

            // ===== 闭包与上值 =====
            OpCode::Closure => {
                let (code, module, _) = frame_info(rt)?;
                let function = arg_bx(word);
                let f = code
                    .function(function)
                    .ok_or_else(|| format!("function #{} not found", function))?;
                let signature = f.signature;
                let parent = rt.vm.frames.last().and_then(|f| f.closure);
                let mut upvalues = Vec::with_capacity(f.upvalue_descriptors.len());
                for desc in &f.upvalue_descriptors {
                    let p = match *desc {
                        UpvalueDescriptor::Local(r) => capture_upvalue(rt, base + r as usize),
                        UpvalueDescriptor::Upvalue(i) => parent
                            .and_then(|p| rt.heap.closure(p))
                            .and_then(|c| c.upvalues.get(i as usize).copied())
                            .ok_or_else(|| format!("upvalue #{} not found in enclosing closure", i))?,
                    };
                    upvalues.push(p);
                }
                let p = rt.heap.alloc(
                    signature,
                    HeapObject::Closure(ClosureObject {
                        module: module.0,
                        function,
                        upvalues,
                    }),
                );
                set(rt, a, Value::heap(signature, p));
            }
            OpCode::ExtFunc => {
                let (code, _, _) = frame_info(rt)?;
                let ext = *code
                    .externals
                    .get(arg_bx(word) as usize)
                    .ok_or_else(|| format!("external #{} out of range", arg_bx(word)))?;
                let target = rt.ready_bytecode(ext.module).map_err(|e| e.to_string())?;
                let signature = target
                    .function(ext.function)
                    .map(|f| f.signature)
                    .ok_or_else(|| format!("function #{} not found in '{}'", ext.function, target.name))?;
                let p = rt.heap.alloc(
                    signature,
                    HeapObject::Closure(ClosureObject {
                        module: ext.module.0,
                        function: ext.function,
                        upvalues: Vec::new(),
                    }),
                );
                set(rt, a, Value::heap(signature, p));
            }
            OpCode::GetUpval => {
                let p = current_upvalue(rt, b)?;
                let v = call::read_upvalue(rt, p)?;
                set(rt, a, v);
            }
            OpCode::SetUpval => {
                let p = current_upvalue(rt, b)?;
                call::write_upvalue(rt, p, reg(rt, a))?;
            }
            OpCode::CloseUpvals => close_upvalues(rt, a),

            // ===== 聚合 =====
            OpCode::NewTuple => {
                let start = base + c as usize;
                let end = (start + b as usize).min(rt.vm.registers.len());
                let items = rt.vm.registers[start..end].to_vec();
                let v = index::new_tuple(rt, items);
                set(rt, a, v);
            }
            OpCode::NewArray => {
                let v = index::new_array(rt, TypeId(arg_bx(word)))?;
                set(rt, a, v);
            }
            OpCode::Append => index::append(rt, reg(rt, a), reg(rt, base + b as usize))?,
            OpCode::NewMap => {
                let v = index::new_map(rt, TypeId(arg_bx(word)))?;
                set(rt, a, v);
            }
            OpCode::NewStruct => {
                let v = zero_value(rt, TypeId(arg_bx(word)));
                set(rt, a, v);
            }
            OpCode::NewSum => {
                let v = index::new_sum(rt, TypeId(arg_bx(word)));
                set(rt, a, v);
            }
            OpCode::SumInit => {
                let payload = (c != NO_REG).then(|| reg(rt, base + c as usize));
                index::sum_init(rt, reg(rt, a), b, payload)?;
            }
            OpCode::SumTag => {
                let tag = index::sum_tag(rt, reg(rt, base + b as usize))?;
                set(rt, a, Value::int(tag as i32));
            }
            OpCode::SumPayload => {
                let v = index::sum_payload(rt, reg(rt, base + b as usize))?;
                set(rt, a, v);
            }
            OpCode::GetField => {
                let v = index::get_field(rt, reg(rt, base + b as usize), c)?;
                set(rt, a, v);
            }
            OpCode::SetField => {
                index::set_field(rt, reg(rt, a), b, reg(rt, base + c as usize))?;
            }
            OpCode::GetIndex => {
                let v = index::get_index(rt, reg(rt, base + b as usize), reg(rt, base + c as usize))?;
                set(rt, a, v);
            }
            OpCode::SetIndex => {
                index::set_index(
                    rt,
                    reg(rt, a),
                    reg(rt, base + b as usize),
                    reg(rt, base + c as usize),
                )?;
            }
            OpCode::Len => {
                let n = index::len(rt, reg(rt, base + b as usize))?;
                set(rt, a, Value::int(n as i32));
            }
            OpCode::MapEntry => {
                let (k, v) =
                    index::map_entry(rt, reg(rt, base + b as usize), reg(rt, base + c as usize))?;
                set(rt, a, k);
                set(rt, a + 1, v);
            }
            OpCode::Propset => {
                let v = index::propset(rt, TypeId(arg_bx(word)), reg(rt, a))?;
                set(rt, a, v);
            }

            // ===== 类型 =====
            OpCode::Cast => {
                let v = operators::cast(rt, reg(rt, a), TypeId(arg_bx(word)))?;
                set(rt, a, v);
            }
            OpCode::Is => {
                let v = operators::is_type(rt, &reg(rt, a), TypeId(arg_bx(word)));
                set(rt, a, Value::bool(v));
            }
            OpCode::Copy => {
                let v = super::deep_copy(rt, reg(rt, base + b as usize));
                set(rt, a, v);
            }
            OpCode::ToString => {
                let v = reg(rt, base + b as usize);
                let text = operators::display_value(rt, &v);
                let s = rt.alloc_string(text);
                set(rt, a, s);
            }
        }

        if op.allocates() && rt.heap.collection_requested() {
            let full = rt.heap.wants_full_collection();
            call::collect_garbage(rt, full);
        }
    }
}

fn current_upvalue(rt: &Runtime, index: u32) -> Result<crate::runtime::value::HeapPtr, String> {
    rt.vm
        .frames
        .last()
        .and_then(|f| f.closure)
        .and_then(|p| rt.heap.closure(p))
        .and_then(|c| c.upvalues.get(index as usize).copied())
        .ok_or_else(|| format!("upvalue #{} not available", index))
}

/// 复用当前帧：参数移到帧底，pc 归零
fn tail_call(rt: &mut Runtime, args: usize, function: u32) -> Result<(), String> {
    let (code, _, base) = frame_info(rt)?;
    let target = code
        .function(function)
        .ok_or_else(|| format!("function #{} not found", function))?;
    let argc = target.param_count as usize;
    let top = base + target.register_count as usize;
    close_upvalues(rt, base);
    for i in 0..argc {
        let v = reg(rt, args + i);
        set(rt, base + i, v);
    }
    rt.vm.reserve(top);
    if let Some(frame) = rt.vm.frames.last_mut() {
        frame.function = function;
        frame.closure = None;
        frame.pc = 0;
        frame.top = top;
    }
    Ok(())
}
