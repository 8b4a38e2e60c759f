//! 调用帧、上值、原生调用与垃圾回收入口

use std::rc::Rc;

use tracing::{debug, trace};

use super::{execution, Frame};
use crate::compiler::resolver::ModuleId;
use crate::compiler::types::TypeId;
use crate::runtime::bytecode::BytecodeModule;
use crate::runtime::heap::{GcReport, HeapObject, UpvalueState};
use crate::runtime::native::NativeCall;
use crate::runtime::value::{HeapPtr, Value};
use crate::runtime::Runtime;

// ===== 调用 =====

/// 从宿主或原生函数进入 VM：在当前栈顶开新帧，执行到它返回
pub(crate) fn invoke(
    rt: &mut Runtime,
    module: ModuleId,
    function: u32,
    closure: Option<HeapPtr>,
    args: &[Value],
) -> Result<Value, String> {
    let code = rt.ready_bytecode(module).map_err(|e| e.to_string())?;
    let f = code
        .function(function)
        .ok_or_else(|| format!("function #{} not found in module '{}'", function, code.name))?;
    if f.param_count as usize != args.len() {
        return Err(format!(
            "'{}' expects {} argument(s), got {}",
            f.name,
            f.param_count,
            args.len()
        ));
    }
    let base = rt.vm.stack_top();
    let stop = rt.vm.frames.len();
    push_frame(rt, code, module, function, closure, base, None)?;
    for (i, arg) in args.iter().enumerate() {
        rt.vm.registers[base + i] = *arg;
    }
    let result = execution::run(rt, stop);
    if result.is_err() {
        rt.vm.frames.truncate(stop);
        close_upvalues(rt, base);
    }
    result
}

/// 调用一个闭包值
pub(crate) fn call_value(rt: &mut Runtime, f: Value, args: &[Value]) -> Result<Value, String> {
    let (module, function, ptr) = closure_target(rt, &f)?;
    invoke(rt, module, function, Some(ptr), args)
}

pub(super) fn closure_target(rt: &Runtime, f: &Value) -> Result<(ModuleId, u32, HeapPtr), String> {
    let ptr = f
        .as_heap()
        .ok_or_else(|| format!("{} is not callable", rt.types.name(f.type_id)))?;
    let c = rt
        .heap
        .closure(ptr)
        .ok_or_else(|| format!("{} is not callable", rt.types.name(f.type_id)))?;
    Ok((ModuleId(c.module), c.function, ptr))
}

/// 压入新帧；参数已经（或随后）写在 `base` 起的寄存器里
pub(super) fn push_frame(
    rt: &mut Runtime,
    code: Rc<BytecodeModule>,
    module: ModuleId,
    function: u32,
    closure: Option<HeapPtr>,
    base: usize,
    ret_slot: Option<usize>,
) -> Result<(), String> {
    if rt.vm.frames.len() >= rt.config.limits.max_call_depth {
        return Err("stack overflow".to_string());
    }
    let f = code
        .function(function)
        .ok_or_else(|| format!("function #{} not found in module '{}'", function, code.name))?;
    let top = base + f.register_count as usize;
    rt.vm.reserve(top);
    rt.vm.frames.push(Frame {
        code,
        module,
        function,
        closure,
        pc: 0,
        base,
        top,
        ret_slot,
    });
    Ok(())
}

// ===== 上值 =====

/// 捕获栈槽；同一个槽位只对应一个打开的上值
pub(super) fn capture_upvalue(rt: &mut Runtime, slot: usize) -> HeapPtr {
    match rt
        .vm
        .open_upvalues
        .binary_search_by_key(&slot, |(s, _)| *s)
    {
        Ok(i) => rt.vm.open_upvalues[i].1,
        Err(i) => {
            let p = rt
                .heap
                .alloc(TypeId::VOID, HeapObject::Upvalue(UpvalueState::Open(slot)));
            rt.vm.open_upvalues.insert(i, (slot, p));
            p
        }
    }
}

/// 关闭所有指向 `from` 及以上栈槽的上值
pub(super) fn close_upvalues(rt: &mut Runtime, from: usize) {
    let split = rt.vm.open_upvalues.partition_point(|(s, _)| *s < from);
    let closing: Vec<(usize, HeapPtr)> = rt.vm.open_upvalues.drain(split..).collect();
    for (slot, p) in closing {
        let v = rt.vm.registers.get(slot).copied().unwrap_or_default();
        if let Some(HeapObject::Upvalue(state)) = rt.heap.get_mut(p) {
            *state = UpvalueState::Closed(v);
        }
    }
}

pub(super) fn read_upvalue(rt: &Runtime, p: HeapPtr) -> Result<Value, String> {
    match rt.heap.get(p) {
        Some(HeapObject::Upvalue(UpvalueState::Open(slot))) => {
            Ok(rt.vm.registers.get(*slot).copied().unwrap_or_default())
        }
        Some(HeapObject::Upvalue(UpvalueState::Closed(v))) => Ok(*v),
        _ => Err("dangling upvalue".to_string()),
    }
}

pub(super) fn write_upvalue(rt: &mut Runtime, p: HeapPtr, v: Value) -> Result<(), String> {
    let open = match rt.heap.get_mut(p) {
        Some(HeapObject::Upvalue(UpvalueState::Open(slot))) => *slot,
        Some(HeapObject::Upvalue(UpvalueState::Closed(cell))) => {
            *cell = v;
            return Ok(());
        }
        _ => return Err("dangling upvalue".to_string()),
    };
    if let Some(r) = rt.vm.registers.get_mut(open) {
        *r = v;
    }
    Ok(())
}

// ===== 原生调用 =====

pub(super) fn native_call(
    rt: &mut Runtime,
    code: &BytecodeModule,
    index: u32,
    args: Vec<Value>,
) -> Result<Value, String> {
    let nref = *code
        .natives
        .get(index as usize)
        .ok_or_else(|| format!("native #{} not found in module '{}'", index, code.name))?;
    let (func, name) = {
        let entry = rt
            .natives
            .entry(nref.native)
            .ok_or_else(|| format!("native #{} is not registered", nref.native.0))?;
        (entry.func.clone(), format!("{}.{}", entry.module, entry.name))
    };
    let call = NativeCall::new(name, args, nref.ret);
    let pins = rt.vm.pins.len();
    let result = func(rt, &call);
    rt.vm.pins.truncate(pins);
    let value = result?;
    check_native_return(rt, &call, value)
}

fn check_native_return(rt: &Runtime, call: &NativeCall, value: Value) -> Result<Value, String> {
    if call.ret == TypeId::VOID {
        return Ok(Value::VOID);
    }
    if value.type_id == call.ret
        || rt.types.native_compatible(call.ret, value.type_id)
        || rt.types.newtype_inner(call.ret) == Some(value.type_id)
    {
        return Ok(value.with_type(call.ret));
    }
    if rt.types.native_compatible(value.type_id, call.ret) {
        // any 形参实例化后的返回值
        return Ok(value);
    }
    Err(format!(
        "native function '{}' returned {}, expected {}",
        call.name,
        rt.types.name(value.type_id),
        rt.types.name(call.ret)
    ))
}

// ===== 调用栈 =====

/// 第一次出错时记录调用栈，最内层在前
pub(super) fn capture_trace(rt: &mut Runtime) {
    if rt.vm.trace.is_some() {
        return;
    }
    let mut fault = None;
    let mut trace = Vec::with_capacity(rt.vm.frames.len());
    for frame in rt.vm.frames.iter().rev() {
        let (name, line) = match frame.code.function(frame.function) {
            Some(f) => (f.name.as_str(), f.line_at(frame.pc.saturating_sub(1))),
            None => ("<unknown>", 0),
        };
        if fault.is_none() {
            fault = Some((frame.code.name.clone(), line));
        }
        trace.push(format!("{} ({}:{})", name, frame.code.name, line));
    }
    rt.vm.trace = Some(trace);
    rt.vm.fault = fault;
}

// ===== GC =====

/// 从所有根出发回收，随后对被回收的句柄执行析构
pub(crate) fn collect_garbage(rt: &mut Runtime, full: bool) -> GcReport {
    let roots = gather_roots(rt);
    let report = rt.heap.collect(&roots, full);
    rt.handles.finalize(&report.finalized);
    debug!(
        target: "smalls::gc",
        full = report.full,
        freed = report.freed_objects,
        live = report.live_objects,
        "collection finished"
    );
    report
}

fn gather_roots(rt: &Runtime) -> Vec<HeapPtr> {
    let live = rt.vm.stack_top().min(rt.vm.registers.len());
    let mut roots: Vec<HeapPtr> = rt.vm.registers[..live]
        .iter()
        .filter_map(Value::as_heap)
        .collect();
    roots.extend(rt.globals.iter().filter_map(Value::as_heap));
    roots.extend(rt.vm.pins.iter().filter_map(Value::as_heap));
    roots.extend(rt.vm.frames.iter().filter_map(|f| f.closure));
    roots.extend(rt.vm.open_upvalues.iter().map(|(_, p)| *p));
    roots.extend(rt.handles.roots());
    roots.extend(rt.propsets.roots());
    roots.extend(rt.interned.values().copied());
    trace!(target: "smalls::gc", roots = roots.len(), "gathered roots");
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_reuses_open_upvalue() {
        let mut rt = Runtime::new();
        rt.vm.reserve(8);
        let a = capture_upvalue(&mut rt, 3);
        let b = capture_upvalue(&mut rt, 1);
        let c = capture_upvalue(&mut rt, 3);
        assert_eq!(a, c);
        assert_ne!(a, b);
        let slots: Vec<usize> = rt.vm.open_upvalues.iter().map(|(s, _)| *s).collect();
        assert_eq!(slots, vec![1, 3]);
    }

    #[test]
    fn test_close_upvalues_snapshots_register() {
        let mut rt = Runtime::new();
        rt.vm.reserve(8);
        let low = capture_upvalue(&mut rt, 1);
        let high = capture_upvalue(&mut rt, 5);
        rt.vm.registers[5] = Value::int(42);

        close_upvalues(&mut rt, 4);
        assert_eq!(rt.vm.open_upvalues.len(), 1);
        rt.vm.registers[5] = Value::int(0);
        assert_eq!(read_upvalue(&rt, high), Ok(Value::int(42)));

        rt.vm.registers[1] = Value::int(7);
        assert_eq!(read_upvalue(&rt, low), Ok(Value::int(7)));
        write_upvalue(&mut rt, low, Value::int(8)).unwrap();
        assert_eq!(rt.vm.registers[1], Value::int(8));
    }
}
