//! `core.array`：高阶数组操作
//!
//! 回调通过 [`Runtime::call_value`] 再次进入 VM；回调期间可能触发回收，
//! 所以中间结果都先固定住。

use crate::compiler::types::TypeId;
use crate::runtime::error::RuntimeError;
use crate::runtime::native::NativeCall;
use crate::runtime::value::Value;
use crate::runtime::Runtime;

use super::prelude::{array_get_fn, array_len_fn, array_push_fn, array_set_fn};
use super::{alloc_array, array_arg, call_predicate};

pub(super) fn register(rt: &mut Runtime) -> Result<(), RuntimeError> {
    const ANY: TypeId = TypeId::ANY;
    const ARR: TypeId = TypeId::ANY_ARRAY;
    const INT: TypeId = TypeId::INT;
    const VOID: TypeId = TypeId::VOID;

    rt.module("core.array")
        .function("map", &[ARR, ANY], ARR, map_fn)
        .function("filter", &[ARR, ANY], ARR, filter_fn)
        .function("reduce", &[ARR, ANY, ANY], ANY, reduce_fn)
        .function("sort", &[ARR, ANY], VOID, sort_fn)
        .function("find", &[ARR, ANY], INT, find_fn)
        .function("reverse", &[ARR], VOID, reverse_fn)
        .function("slice", &[ARR, INT, INT], ARR, slice_fn)
        .function("push", &[ARR, ANY], VOID, array_push_fn)
        .function("get", &[ARR, INT], ANY, array_get_fn)
        .function("set", &[ARR, INT, ANY], VOID, array_set_fn)
        .function("len", &[ARR], INT, array_len_fn)
        .finalize()?;
    Ok(())
}

fn map_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let items = array_arg(rt, call, 0)?;
    let f = call.arg(1)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let v = rt.call_value(f, &[item])?;
        rt.pin(v);
        out.push(v);
    }
    Ok(alloc_array(rt, call.ret, out))
}

fn filter_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let items = array_arg(rt, call, 0)?;
    let f = call.arg(1)?;
    let mut out = Vec::new();
    for item in items {
        if call_predicate(rt, f, &[item], &call.name)? {
            out.push(item);
        }
    }
    Ok(alloc_array(rt, call.ret, out))
}

fn reduce_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let items = array_arg(rt, call, 0)?;
    let mut acc = call.arg(1)?;
    let f = call.arg(2)?;
    for item in items {
        acc = rt.call_value(f, &[acc, item])?;
        rt.pin(acc);
    }
    Ok(acc)
}

/// 稳定归并排序；`less` 出错时中止
fn sort_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let p = call.heap(0)?;
    let items = array_arg(rt, call, 0)?;
    let less = call.arg(1)?;
    let sorted = merge_sort(rt, items, less, &call.name)?;
    if let Some(a) = rt.heap.array_mut(p) {
        a.items = sorted;
    }
    Ok(Value::VOID)
}

fn merge_sort(
    rt: &mut Runtime,
    items: Vec<Value>,
    less: Value,
    name: &str,
) -> Result<Vec<Value>, String> {
    let mut src = items;
    let n = src.len();
    let mut width = 1;
    while width < n {
        let mut dst = Vec::with_capacity(n);
        let mut lo = 0;
        while lo < n {
            let mid = (lo + width).min(n);
            let hi = (lo + 2 * width).min(n);
            let (mut i, mut j) = (lo, mid);
            while i < mid && j < hi {
                // 右边严格更小时才先取右边，相等元素保持原顺序
                if call_predicate(rt, less, &[src[j], src[i]], name)? {
                    dst.push(src[j]);
                    j += 1;
                } else {
                    dst.push(src[i]);
                    i += 1;
                }
            }
            dst.extend_from_slice(&src[i..mid]);
            dst.extend_from_slice(&src[j..hi]);
            lo = hi;
        }
        src = dst;
        width *= 2;
    }
    Ok(src)
}

fn find_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let items = array_arg(rt, call, 0)?;
    let f = call.arg(1)?;
    for (i, item) in items.into_iter().enumerate() {
        if call_predicate(rt, f, &[item], &call.name)? {
            return Ok(Value::int(i as i32));
        }
    }
    Ok(Value::int(-1))
}

fn reverse_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let p = call.heap(0)?;
    match rt.heap.array_mut(p) {
        Some(a) => {
            a.items.reverse();
            Ok(Value::VOID)
        }
        None => Err(format!("{}: argument 1 is not an array", call.name)),
    }
}

/// 负下标从末尾数；越界截断
fn slice_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let items = array_arg(rt, call, 0)?;
    let len = items.len() as i32;
    let clamp = |i: i32| {
        let i = if i < 0 { (len + i).max(0) } else { i };
        i.min(len) as usize
    };
    let start = clamp(call.int(1)?);
    let end = clamp(call.int(2)?);
    let out = if start < end {
        items[start..end].to_vec()
    } else {
        Vec::new()
    };
    Ok(alloc_array(rt, call.ret, out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_items(rt: &Runtime, v: Value) -> Vec<i32> {
        rt.array_items(&v)
            .unwrap()
            .iter()
            .map(|x| x.as_int().unwrap())
            .collect()
    }

    #[test]
    fn test_slice_clamps() {
        let mut rt = Runtime::new();
        let xs: Vec<Value> = (1..=5).map(Value::int).collect();
        let arr = rt.new_array(TypeId::INT, xs);
        let ty = arr.type_id;
        let call = NativeCall::new("core.array.slice", vec![arr, Value::int(-2), Value::int(99)], ty);
        let out = slice_fn(&mut rt, &call).unwrap();
        assert_eq!(int_items(&rt, out), vec![4, 5]);

        let call = NativeCall::new("core.array.slice", vec![arr, Value::int(3), Value::int(1)], ty);
        let out = slice_fn(&mut rt, &call).unwrap();
        assert!(int_items(&rt, out).is_empty());
    }

    #[test]
    fn test_reverse_in_place() {
        let mut rt = Runtime::new();
        let arr = rt.new_array(TypeId::INT, vec![Value::int(1), Value::int(2), Value::int(3)]);
        let call = NativeCall::new("core.array.reverse", vec![arr], TypeId::VOID);
        reverse_fn(&mut rt, &call).unwrap();
        assert_eq!(int_items(&rt, arr), vec![3, 2, 1]);
    }
}
