//! 聚合对象：零值、复制、字段与下标访问

use crate::compiler::types::{TypeId, TypeKind};
use crate::runtime::heap::{ArrayObject, HeapObject, MapObject};
use crate::runtime::value::{HeapPtr, ObjectHandle, Value, ValueData};
use crate::runtime::Runtime;

use super::call;

const MAX_ZERO_DEPTH: usize = 64;

// ===== 零值与复制 =====

/// 类型的零值；容器为空，结构体逐字段取零值，和类型优先取无载荷的变体
pub(crate) fn zero_value(rt: &mut Runtime, ty: TypeId) -> Value {
    zero_at(rt, ty, 0)
}

fn zero_at(rt: &mut Runtime, ty: TypeId, depth: usize) -> Value {
    if ty == TypeId::VOID {
        return Value::VOID;
    }
    if depth > MAX_ZERO_DEPTH {
        return Value::VOID.with_type(ty);
    }
    let kind = rt.types.kind(ty).clone();
    match kind {
        TypeKind::Int => Value::int(0),
        TypeKind::Float => Value::float(0.0),
        TypeKind::Bool => Value::bool(false),
        TypeKind::String => rt.intern(""),
        TypeKind::Object => Value::object(ObjectHandle::INVALID),
        TypeKind::Array(elem) => alloc(
            rt,
            ty,
            HeapObject::Array(ArrayObject {
                elem,
                items: Vec::new(),
                fixed: false,
            }),
        ),
        TypeKind::FixedArray { elem, len } => {
            let items = (0..len).map(|_| zero_at(rt, elem, depth + 1)).collect();
            alloc(
                rt,
                ty,
                HeapObject::Array(ArrayObject {
                    elem,
                    items,
                    fixed: true,
                }),
            )
        }
        TypeKind::Map { key, value } => alloc(rt, ty, HeapObject::Map(MapObject::new(key, value))),
        TypeKind::Tuple(items) => {
            let items = items.iter().map(|t| zero_at(rt, *t, depth + 1)).collect();
            alloc(rt, ty, HeapObject::Tuple(items))
        }
        TypeKind::Struct(def) => {
            let fields = def
                .fields
                .iter()
                .map(|f| zero_at(rt, f.ty, depth + 1))
                .collect();
            alloc(rt, ty, HeapObject::Struct(fields))
        }
        TypeKind::Newtype(inner) => zero_at(rt, inner, depth + 1).with_type(ty),
        TypeKind::Sum(def) => {
            let variant = def
                .variants
                .iter()
                .find(|v| v.payload.is_none())
                .or_else(|| def.variants.first())
                .cloned();
            let (tag, payload) = match variant {
                Some(v) => (v.tag, v.payload.map(|p| zero_at(rt, p, depth + 1))),
                None => (0, None),
            };
            alloc(rt, ty, HeapObject::Sum { tag, payload })
        }
        _ => Value::VOID.with_type(ty),
    }
}

fn alloc(rt: &mut Runtime, ty: TypeId, obj: HeapObject) -> Value {
    Value::heap(ty, rt.heap.alloc(ty, obj))
}

/// 值类型（定长数组、`[[value_type]]` 结构体）做深复制，其余原样返回
pub(crate) fn deep_copy(rt: &mut Runtime, v: Value) -> Value {
    let Some(p) = v.as_heap() else {
        return v;
    };
    if !rt.types.has_value_semantics(v.type_id) {
        return v;
    }
    let Some(obj) = rt.heap.get(p).cloned() else {
        return v;
    };
    let obj = match obj {
        HeapObject::Struct(fields) => {
            HeapObject::Struct(fields.into_iter().map(|f| deep_copy(rt, f)).collect())
        }
        HeapObject::Array(mut a) => {
            a.items = a.items.into_iter().map(|x| deep_copy(rt, x)).collect();
            HeapObject::Array(a)
        }
        other => other,
    };
    alloc(rt, v.type_id, obj)
}

// ===== 构造 =====

pub(super) fn new_array(rt: &mut Runtime, ty: TypeId) -> Result<Value, String> {
    match rt.types.kind(ty) {
        TypeKind::Array(_) | TypeKind::FixedArray { .. } => Ok(zero_value(rt, ty)),
        _ => Err(format!("cannot build an array of type {}", rt.types.name(ty))),
    }
}

pub(super) fn new_map(rt: &mut Runtime, ty: TypeId) -> Result<Value, String> {
    match rt.types.kind(ty) {
        TypeKind::Map { .. } => Ok(zero_value(rt, ty)),
        _ => Err(format!("cannot build a map of type {}", rt.types.name(ty))),
    }
}

pub(super) fn new_tuple(rt: &mut Runtime, items: Vec<Value>) -> Value {
    let ty = rt.types.tuple_of(items.iter().map(|v| v.type_id).collect());
    alloc(rt, ty, HeapObject::Tuple(items))
}

/// `NEWSUM` 先分配，`SUMINIT` 再写入变体
pub(super) fn new_sum(rt: &mut Runtime, ty: TypeId) -> Value {
    alloc(rt, ty, HeapObject::Sum { tag: 0, payload: None })
}

pub(super) fn sum_init(
    rt: &mut Runtime,
    target: Value,
    tag: u32,
    payload: Option<Value>,
) -> Result<(), String> {
    let p = heap_ptr(&target, "sum")?;
    match rt.heap.get_mut(p) {
        Some(HeapObject::Sum { tag: t, payload: slot }) => {
            *t = tag;
            *slot = payload;
            Ok(())
        }
        _ => Err("SUMINIT on a non-sum value".to_string()),
    }
}

pub(super) fn sum_tag(rt: &Runtime, v: Value) -> Result<u32, String> {
    match v.as_heap().and_then(|p| rt.heap.get(p)) {
        Some(HeapObject::Sum { tag, .. }) => Ok(*tag),
        _ => Err(format!("{} is not a sum type", rt.types.name(v.type_id))),
    }
}

pub(super) fn sum_payload(rt: &Runtime, v: Value) -> Result<Value, String> {
    match v.as_heap().and_then(|p| rt.heap.get(p)) {
        Some(HeapObject::Sum { payload, .. }) => Ok(payload.unwrap_or(Value::VOID)),
        _ => Err(format!("{} is not a sum type", rt.types.name(v.type_id))),
    }
}

// ===== 字段 =====

fn heap_ptr(v: &Value, what: &str) -> Result<HeapPtr, String> {
    match v.data {
        ValueData::Heap(p) => Ok(p),
        _ => Err(format!("expected a {} value", what)),
    }
}

pub(super) fn get_field(rt: &Runtime, obj: Value, index: u32) -> Result<Value, String> {
    let p = heap_ptr(&obj, "struct")?;
    rt.heap
        .fields(p)
        .and_then(|f| f.get(index as usize).copied())
        .ok_or_else(|| {
            format!(
                "field #{} out of range for {}",
                index,
                rt.types.name(obj.type_id)
            )
        })
}

pub(super) fn set_field(rt: &mut Runtime, obj: Value, index: u32, v: Value) -> Result<(), String> {
    let p = heap_ptr(&obj, "struct")?;
    let name = rt.types.name(obj.type_id).to_string();
    let slot = rt
        .heap
        .fields_mut(p)
        .and_then(|f| f.get_mut(index as usize))
        .ok_or_else(|| format!("field #{} out of range for {}", index, name))?;
    *slot = v;
    Ok(())
}

// ===== 下标 =====

fn array_index(key: &Value, len: usize) -> Result<usize, String> {
    let i = key
        .as_int()
        .ok_or_else(|| "array index must be an int".to_string())?;
    if i < 0 || i as usize >= len {
        return Err(format!("index {} out of bounds for length {}", i, len));
    }
    Ok(i as usize)
}

pub(super) fn get_index(rt: &mut Runtime, obj: Value, key: Value) -> Result<Value, String> {
    let p = heap_ptr(&obj, "container")?;
    match rt.heap.get(p) {
        Some(HeapObject::Array(a)) => {
            let i = array_index(&key, a.items.len())?;
            Ok(a.items[i])
        }
        Some(HeapObject::Map(_)) => {
            let (_, found) = map_lookup(rt, p, key)?;
            found
                .and_then(|i| rt.heap.map(p)?.entry(i))
                .map(|e| e.value)
                .ok_or_else(|| "key not found in map".to_string())
        }
        _ => Err(format!("cannot index {}", rt.types.name(obj.type_id))),
    }
}

pub(super) fn set_index(rt: &mut Runtime, obj: Value, key: Value, v: Value) -> Result<(), String> {
    let p = heap_ptr(&obj, "container")?;
    match rt.heap.get(p) {
        Some(HeapObject::Array(a)) => {
            let i = array_index(&key, a.items.len())?;
            if let Some(a) = rt.heap.array_mut(p) {
                a.items[i] = v;
            }
            Ok(())
        }
        Some(HeapObject::Map(_)) => map_store(rt, p, key, v),
        _ => Err(format!("cannot index {}", rt.types.name(obj.type_id))),
    }
}

// ===== 映射键 =====

/// 查找映射中的键，返回键的哈希与条目下标
///
/// 键类型声明了 `[[operator(hash)]]` 与 `[[operator(eq)]]` 时调用它们，
/// 否则按结构哈希、结构相等。用户运算符可能触发回收，映射和键都要已被根引用。
pub(crate) fn map_lookup(rt: &mut Runtime, map: HeapPtr, key: Value) -> Result<(u64, Option<usize>), String> {
    let key_type = rt
        .heap
        .map(map)
        .map(|m| m.key_type)
        .ok_or_else(|| "value is not a map".to_string())?;
    let Some(ops) = rt.key_operators(key_type) else {
        let heap = &rt.heap;
        let hash = heap.hash_value(&key);
        let found = heap
            .map(map)
            .and_then(|m| m.find(hash, |k| heap.values_equal(k, &key)));
        return Ok((hash, found));
    };

    let h = call::invoke(rt, ops.hash.module, ops.hash.index, None, &[key])?;
    let hash = h
        .as_int()
        .ok_or_else(|| "operator 'hash' must return int".to_string())? as i64 as u64;
    let candidates = rt.heap.map(map).map(|m| m.candidates(hash)).unwrap_or_default();
    for idx in candidates {
        let Some(stored) = rt.heap.map(map).and_then(|m| m.entry(idx)).map(|e| e.key) else {
            continue;
        };
        let same = call::invoke(rt, ops.eq.module, ops.eq.index, None, &[stored, key])?;
        if same.as_bool() == Some(true) {
            return Ok((hash, Some(idx)));
        }
    }
    Ok((hash, None))
}

/// 写入映射：已有的键覆盖值，否则按插入顺序追加
pub(crate) fn map_store(rt: &mut Runtime, map: HeapPtr, key: Value, v: Value) -> Result<(), String> {
    let (hash, found) = map_lookup(rt, map, key)?;
    if let Some(m) = rt.heap.map_mut(map) {
        match found {
            Some(i) => m.set_value_at(i, v),
            None => {
                m.insert_new(hash, key, v);
            }
        }
    }
    Ok(())
}

pub(super) fn append(rt: &mut Runtime, arr: Value, v: Value) -> Result<(), String> {
    let p = heap_ptr(&arr, "array")?;
    match rt.heap.array_mut(p) {
        Some(a) if a.fixed => Err("cannot append to a fixed-size array".to_string()),
        Some(a) => {
            a.items.push(v);
            Ok(())
        }
        None => Err(format!("cannot append to {}", rt.types.name(arr.type_id))),
    }
}

pub(super) fn len(rt: &Runtime, v: Value) -> Result<usize, String> {
    let p = heap_ptr(&v, "container")?;
    match rt.heap.get(p) {
        Some(HeapObject::Array(a)) => Ok(a.items.len()),
        Some(HeapObject::Map(m)) => Ok(m.len()),
        Some(HeapObject::String(s)) => Ok(s.chars().count()),
        _ => Err(format!("{} has no length", rt.types.name(v.type_id))),
    }
}

/// 按插入顺序取第 `index` 个映射条目
pub(super) fn map_entry(rt: &Runtime, map: Value, index: Value) -> Result<(Value, Value), String> {
    let p = heap_ptr(&map, "map")?;
    let i = index
        .as_int()
        .ok_or_else(|| "map entry index must be an int".to_string())?;
    rt.heap
        .map(p)
        .and_then(|m| m.entry(i as usize))
        .map(|e| (e.key, e.value))
        .ok_or_else(|| format!("map entry {} out of range", i))
}

// ===== propset =====

/// 取对象在 propset 侧表中的结构体，首次访问时按零值创建
pub(super) fn propset(rt: &mut Runtime, ty: TypeId, obj: Value) -> Result<Value, String> {
    let handle = obj
        .as_object()
        .ok_or_else(|| format!("propset {} needs an object", rt.types.name(ty)))?;
    if !handle.is_valid() {
        return Err("propset access on an invalid object".to_string());
    }
    if let Some(p) = rt.propsets.get(ty, handle) {
        return Ok(Value::heap(ty, p));
    }
    let v = zero_value(rt, ty);
    let p = heap_ptr(&v, "propset")?;
    rt.propsets.insert(ty, handle, p);
    Ok(v)
}
