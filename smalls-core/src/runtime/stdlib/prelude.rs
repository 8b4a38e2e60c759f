//! `core.prelude` 的原生实现

use crate::compiler::types::TypeId;
use crate::runtime::error::RuntimeError;
use crate::runtime::native::NativeCall;
use crate::runtime::value::{Value, ValueData};
use crate::runtime::vm;
use crate::runtime::Runtime;

use super::{alloc_array, array_arg, str_arg};

pub(super) fn register(rt: &mut Runtime) -> Result<(), RuntimeError> {
    const ANY: TypeId = TypeId::ANY;
    const ARR: TypeId = TypeId::ANY_ARRAY;
    const MAP: TypeId = TypeId::ANY_MAP;
    const INT: TypeId = TypeId::INT;
    const FLOAT: TypeId = TypeId::FLOAT;
    const BOOL: TypeId = TypeId::BOOL;
    const STR: TypeId = TypeId::STRING;
    const VOID: TypeId = TypeId::VOID;
    let strings = rt.types.array_of(STR);

    rt.module("core.prelude")
        // ===== 核心函数 =====
        .function("print", &[ANY], VOID, print_fn)
        .function("println", &[ANY], VOID, println_fn)
        .function("assert", &[BOOL], VOID, assert_fn)
        .function("error", &[STR], VOID, error_fn)
        .function("panic", &[STR], VOID, panic_fn)
        .function("gc_collect", &[], VOID, gc_collect_fn)
        // ===== 数组 =====
        .function("array_push", &[ARR, ANY], VOID, array_push_fn)
        .function("array_pop", &[ARR], ANY, array_pop_fn)
        .function("array_len", &[ARR], INT, array_len_fn)
        .function("array_get", &[ARR, INT], ANY, array_get_fn)
        .function("array_set", &[ARR, INT, ANY], VOID, array_set_fn)
        .function("array_clear", &[ARR], VOID, array_clear_fn)
        // ===== 映射 =====
        .function("map_get", &[MAP, ANY], ANY, map_get_fn)
        .function("map_set", &[MAP, ANY, ANY], VOID, map_set_fn)
        .function("map_remove", &[MAP, ANY], BOOL, map_remove_fn)
        .function("map_len", &[MAP], INT, map_len_fn)
        .function("map_clear", &[MAP], VOID, map_clear_fn)
        // ===== 字符串 =====
        .function("string_len", &[STR], INT, string_len_fn)
        .function("string_substr", &[STR, INT, INT], STR, string_substr_fn)
        .function("string_find", &[STR, STR], INT, string_find_fn)
        .function("string_split", &[STR, STR], strings, string_split_fn)
        .function("string_join", &[strings, STR], STR, string_join_fn)
        .function("string_to_upper", &[STR], STR, |rt, call| {
            let s = str_arg(rt, call, 0)?;
            Ok(rt.alloc_string(s.to_uppercase()))
        })
        .function("string_to_lower", &[STR], STR, |rt, call| {
            let s = str_arg(rt, call, 0)?;
            Ok(rt.alloc_string(s.to_lowercase()))
        })
        .function("string_contains", &[STR, STR], BOOL, |rt, call| {
            let s = str_arg(rt, call, 0)?;
            Ok(Value::bool(s.contains(str_arg(rt, call, 1)?.as_str())))
        })
        .function("string_starts_with", &[STR, STR], BOOL, |rt, call| {
            let s = str_arg(rt, call, 0)?;
            Ok(Value::bool(s.starts_with(str_arg(rt, call, 1)?.as_str())))
        })
        .function("string_ends_with", &[STR, STR], BOOL, |rt, call| {
            let s = str_arg(rt, call, 0)?;
            Ok(Value::bool(s.ends_with(str_arg(rt, call, 1)?.as_str())))
        })
        .function("string_replace", &[STR, STR, STR], STR, string_replace_fn)
        .function("string_to_int", &[STR], INT, string_to_int_fn)
        .function("string_to_float", &[STR], FLOAT, string_to_float_fn)
        .function("int_to_string", &[INT], STR, |rt, call| {
            let n = call.int(0)?;
            Ok(rt.alloc_string(n.to_string()))
        })
        .function("float_to_string", &[FLOAT], STR, |rt, call| {
            let f = call.float(0)?;
            Ok(rt.alloc_string(vm::format_float(f)))
        })
        // ===== 数值 =====
        .function("abs", &[ANY], ANY, abs_fn)
        .function("min", &[ANY, ANY], ANY, |rt, call| pick(rt, call, true))
        .function("max", &[ANY, ANY], ANY, |rt, call| pick(rt, call, false))
        .function("clamp", &[ANY, ANY, ANY], ANY, clamp_fn)
        .finalize()?;
    Ok(())
}

// ===== 核心函数实现 =====

fn print_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let text = rt.display(&call.arg(0)?);
    rt.write_output(&text);
    Ok(Value::VOID)
}

fn println_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let mut text = rt.display(&call.arg(0)?);
    text.push('\n');
    rt.write_output(&text);
    Ok(Value::VOID)
}

fn assert_fn(_rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    if !call.bool(0)? {
        return Err("Assertion failed".to_string());
    }
    Ok(Value::VOID)
}

fn error_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    Err(str_arg(rt, call, 0)?)
}

fn panic_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    Err(format!("panic: {}", str_arg(rt, call, 0)?))
}

fn gc_collect_fn(rt: &mut Runtime, _call: &NativeCall) -> Result<Value, String> {
    vm::collect_garbage(rt, true);
    Ok(Value::VOID)
}

// ===== 数组 =====

fn index_of(call: &NativeCall, i: usize, len: usize) -> Result<usize, String> {
    let idx = call.int(i)?;
    if idx < 0 || idx as usize >= len {
        return Err(format!("index {} out of bounds for length {}", idx, len));
    }
    Ok(idx as usize)
}

pub(super) fn array_push_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let p = call.heap(0)?;
    let v = call.arg(1)?;
    match rt.heap.array_mut(p) {
        Some(a) if a.fixed => Err("cannot push to a fixed-size array".to_string()),
        Some(a) => {
            a.items.push(v);
            Ok(Value::VOID)
        }
        None => Err(format!("{}: argument 1 is not an array", call.name)),
    }
}

fn array_pop_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let p = call.heap(0)?;
    match rt.heap.array_mut(p) {
        Some(a) if a.fixed => Err("cannot pop from a fixed-size array".to_string()),
        Some(a) => a
            .items
            .pop()
            .ok_or_else(|| "pop from an empty array".to_string()),
        None => Err(format!("{}: argument 1 is not an array", call.name)),
    }
}

pub(super) fn array_len_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let items = array_arg(rt, call, 0)?;
    Ok(Value::int(items.len() as i32))
}

pub(super) fn array_get_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let items = array_arg(rt, call, 0)?;
    let i = index_of(call, 1, items.len())?;
    Ok(items[i])
}

pub(super) fn array_set_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let p = call.heap(0)?;
    let v = call.arg(2)?;
    let len = rt.heap.array(p).map(|a| a.items.len()).unwrap_or(0);
    let i = index_of(call, 1, len)?;
    if let Some(a) = rt.heap.array_mut(p) {
        a.items[i] = v;
    }
    Ok(Value::VOID)
}

fn array_clear_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let p = call.heap(0)?;
    match rt.heap.array_mut(p) {
        Some(a) if a.fixed => Err("cannot clear a fixed-size array".to_string()),
        Some(a) => {
            a.items.clear();
            Ok(Value::VOID)
        }
        None => Err(format!("{}: argument 1 is not an array", call.name)),
    }
}

// ===== 映射 =====

/// 键在映射中的条目下标
pub(super) fn map_find(rt: &mut Runtime, call: &NativeCall, key: &Value) -> Result<Option<usize>, String> {
    let p = call.heap(0)?;
    if rt.heap.map(p).is_none() {
        return Err(format!("{}: argument 1 is not a map", call.name));
    }
    Ok(vm::map_lookup(rt, p, *key)?.1)
}

fn map_get_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let key = call.arg(1)?;
    let idx = map_find(rt, call, &key)?.ok_or_else(|| {
        format!("key {} not found in map", vm::display_value(rt, &key))
    })?;
    rt.heap
        .map(call.heap(0)?)
        .and_then(|m| m.entry(idx))
        .map(|e| e.value)
        .ok_or_else(|| "map entry vanished".to_string())
}

fn map_set_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let key = call.arg(1)?;
    let value = call.arg(2)?;
    let p = call.heap(0)?;
    if rt.heap.map(p).is_none() {
        return Err(format!("{}: argument 1 is not a map", call.name));
    }
    vm::map_store(rt, p, key, value)?;
    Ok(Value::VOID)
}

fn map_remove_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let key = call.arg(1)?;
    let Some(idx) = map_find(rt, call, &key)? else {
        return Ok(Value::bool(false));
    };
    let removed = rt
        .heap
        .map_mut(call.heap(0)?)
        .and_then(|m| m.remove_at(idx))
        .is_some();
    Ok(Value::bool(removed))
}

fn map_len_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let m = rt
        .heap
        .map(call.heap(0)?)
        .ok_or_else(|| format!("{}: argument 1 is not a map", call.name))?;
    Ok(Value::int(m.len() as i32))
}

fn map_clear_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    if let Some(m) = rt.heap.map_mut(call.heap(0)?) {
        m.clear();
    }
    Ok(Value::VOID)
}

// ===== 字符串 =====

fn string_len_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let s = str_arg(rt, call, 0)?;
    Ok(Value::int(s.chars().count() as i32))
}

/// 按字符截取；越界部分截断
fn string_substr_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let s = str_arg(rt, call, 0)?;
    let start = call.int(1)?.max(0) as usize;
    let len = call.int(2)?.max(0) as usize;
    let out: String = s.chars().skip(start).take(len).collect();
    Ok(rt.alloc_string(out))
}

/// 字符下标；找不到返回 -1
fn string_find_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let s = str_arg(rt, call, 0)?;
    let needle = str_arg(rt, call, 1)?;
    let idx = s
        .find(needle.as_str())
        .map(|b| s[..b].chars().count() as i32)
        .unwrap_or(-1);
    Ok(Value::int(idx))
}

fn string_split_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let s = str_arg(rt, call, 0)?;
    let sep = str_arg(rt, call, 1)?;
    let parts: Vec<String> = if sep.is_empty() {
        s.chars().map(|c| c.to_string()).collect()
    } else {
        s.split(sep.as_str()).map(str::to_string).collect()
    };
    let items: Vec<Value> = parts.into_iter().map(|p| rt.alloc_string(p)).collect();
    let ty = rt.types.array_of(TypeId::STRING);
    Ok(alloc_array(rt, ty, items))
}

fn string_join_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let items = array_arg(rt, call, 0)?;
    let sep = str_arg(rt, call, 1)?;
    let parts: Vec<String> = items
        .iter()
        .map(|v| {
            v.as_heap()
                .and_then(|p| rt.heap.string(p))
                .map(str::to_string)
                .unwrap_or_default()
        })
        .collect();
    Ok(rt.alloc_string(parts.join(&sep)))
}

fn string_replace_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let s = str_arg(rt, call, 0)?;
    let pattern = str_arg(rt, call, 1)?;
    let with = str_arg(rt, call, 2)?;
    if pattern.is_empty() {
        return Ok(rt.alloc_string(s));
    }
    Ok(rt.alloc_string(s.replace(pattern.as_str(), &with)))
}

fn string_to_int_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let s = str_arg(rt, call, 0)?;
    s.trim()
        .parse::<i32>()
        .map(Value::int)
        .map_err(|_| format!("cannot parse '{}' as int", s))
}

fn string_to_float_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let s = str_arg(rt, call, 0)?;
    s.trim()
        .parse::<f32>()
        .map(Value::float)
        .map_err(|_| format!("cannot parse '{}' as float", s))
}

// ===== 数值 =====

fn abs_fn(_rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let v = call.arg(0)?;
    match v.data {
        ValueData::Int(i) => Ok(Value::int(i.wrapping_abs()).with_type(v.type_id)),
        ValueData::Float(f) => Ok(Value::float(f.abs()).with_type(v.type_id)),
        _ => Err(format!("{}: expected a number", call.name)),
    }
}

fn pick(rt: &mut Runtime, call: &NativeCall, smaller: bool) -> Result<Value, String> {
    let a = call.arg(0)?;
    let b = call.arg(1)?;
    let ord = vm::compare_values(rt, &a, &b)
        .ok_or_else(|| format!("{}: values are not comparable", call.name))?;
    let a_first = if smaller { ord.is_le() } else { ord.is_ge() };
    Ok(if a_first { a } else { b })
}

fn clamp_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let x = call.arg(0)?;
    let lo = call.arg(1)?;
    let hi = call.arg(2)?;
    let cmp = |a: &Value, b: &Value| {
        vm::compare_values(rt, a, b)
            .ok_or_else(|| format!("{}: values are not comparable", call.name))
    };
    if cmp(&lo, &hi)?.is_gt() {
        return Err(format!("{}: lower bound is greater than upper bound", call.name));
    }
    if cmp(&x, &lo)?.is_lt() {
        return Ok(lo);
    }
    if cmp(&x, &hi)?.is_gt() {
        return Ok(hi);
    }
    Ok(x)
}
