//! `core.map`

use crate::compiler::types::TypeId;
use crate::runtime::error::RuntimeError;
use crate::runtime::heap::MapEntry;
use crate::runtime::native::NativeCall;
use crate::runtime::value::Value;
use crate::runtime::Runtime;

use super::alloc_array;
use super::prelude::map_find;

pub(super) fn register(rt: &mut Runtime) -> Result<(), RuntimeError> {
    const ANY: TypeId = TypeId::ANY;
    const MAP: TypeId = TypeId::ANY_MAP;
    const ARR: TypeId = TypeId::ANY_ARRAY;

    rt.module("core.map")
        .function("has_key", &[MAP, ANY], TypeId::BOOL, has_key_fn)
        .function("keys", &[MAP], ARR, |rt, call| {
            let items = entries(rt, call)?.iter().map(|e| e.key).collect();
            Ok(alloc_array(rt, call.ret, items))
        })
        .function("values", &[MAP], ARR, |rt, call| {
            let items = entries(rt, call)?.iter().map(|e| e.value).collect();
            Ok(alloc_array(rt, call.ret, items))
        })
        .function("get", &[MAP, ANY, ANY], ANY, get_fn)
        .finalize()?;
    Ok(())
}

/// 按插入顺序的条目
fn entries(rt: &Runtime, call: &NativeCall) -> Result<Vec<MapEntry>, String> {
    rt.heap
        .map(call.heap(0)?)
        .map(|m| m.entries().to_vec())
        .ok_or_else(|| format!("{}: argument 1 is not a map", call.name))
}

fn has_key_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let key = call.arg(1)?;
    Ok(Value::bool(map_find(rt, call, &key)?.is_some()))
}

/// 缺失的键返回调用方给的默认值
fn get_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let key = call.arg(1)?;
    let Some(idx) = map_find(rt, call, &key)? else {
        return call.arg(2);
    };
    rt.heap
        .map(call.heap(0)?)
        .and_then(|m| m.entry(idx))
        .map(|e| e.value)
        .ok_or_else(|| "map entry vanished".to_string())
}
