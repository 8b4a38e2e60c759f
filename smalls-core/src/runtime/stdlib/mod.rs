//! 核心库
//!
//! 每个 `core.*` 模块由两部分组成：`core/*.smalls` 中的脚本声明，以及这里
//! 注册的同名原生函数。脚本用 `extern fn` 声明签名，解析器按模块路径把它们
//! 绑定到宿主实现。
//!
//! - `core.prelude`：每个脚本默认可见，输出、断言、错误与容器内建函数
//! - `core.array` / `core.map`：高阶数组操作、映射查询
//! - `core.string`：填充、查找、修剪与 `format`
//! - `core.math`：浮点数学函数
//! - `core.test`：脚本测试结果统计

mod array;
mod map;
mod math;
mod prelude;
mod string;
mod test;

use crate::compiler::types::{TypeId, TypeKind};
use crate::runtime::error::RuntimeError;
use crate::runtime::heap::{ArrayObject, HeapObject};
use crate::runtime::native::NativeCall;
use crate::runtime::value::Value;
use crate::runtime::Runtime;

/// 内置模块的脚本源码
pub fn core_source(path: &str) -> Option<&'static str> {
    let text = match path {
        "core.prelude" => include_str!("core/prelude.smalls"),
        "core.array" => include_str!("core/array.smalls"),
        "core.map" => include_str!("core/map.smalls"),
        "core.string" => include_str!("core/string.smalls"),
        "core.math" => include_str!("core/math.smalls"),
        "core.test" => include_str!("core/test.smalls"),
        _ => return None,
    };
    Some(text)
}

/// 所有内置模块的路径
pub const CORE_MODULES: &[&str] = &[
    "core.prelude",
    "core.array",
    "core.map",
    "core.string",
    "core.math",
    "core.test",
];

/// 注册全部核心原生函数
pub(crate) fn register(rt: &mut Runtime) -> Result<(), RuntimeError> {
    prelude::register(rt)?;
    array::register(rt)?;
    map::register(rt)?;
    string::register(rt)?;
    math::register(rt)?;
    test::register(rt)?;
    Ok(())
}

// ===== 参数辅助 =====

pub(crate) fn str_arg(rt: &Runtime, call: &NativeCall, i: usize) -> Result<String, String> {
    let p = call.heap(i)?;
    rt.heap
        .string(p)
        .map(str::to_string)
        .ok_or_else(|| format!("{}: argument {} is not a string", call.name, i + 1))
}

pub(crate) fn array_arg(rt: &Runtime, call: &NativeCall, i: usize) -> Result<Vec<Value>, String> {
    let p = call.heap(i)?;
    rt.heap
        .array(p)
        .map(|a| a.items.clone())
        .ok_or_else(|| format!("{}: argument {} is not an array", call.name, i + 1))
}

/// 数组类型的元素类型
pub(crate) fn elem_type(rt: &Runtime, ty: TypeId) -> TypeId {
    match rt.types.kind(ty) {
        TypeKind::Array(elem) | TypeKind::FixedArray { elem, .. } => *elem,
        _ => TypeId::ANY,
    }
}

/// 按调用点的返回类型分配数组
pub(crate) fn alloc_array(rt: &mut Runtime, ty: TypeId, items: Vec<Value>) -> Value {
    let ty = match rt.types.kind(ty) {
        TypeKind::Array(_) => ty,
        TypeKind::FixedArray { elem, .. } => {
            let elem = *elem;
            rt.types.array_of(elem)
        }
        _ => rt.types.array_of(TypeId::ANY),
    };
    let elem = elem_type(rt, ty);
    let p = rt.heap.alloc(
        ty,
        HeapObject::Array(ArrayObject {
            elem,
            items,
            fixed: false,
        }),
    );
    Value::heap(ty, p)
}

/// 调用回调并要求返回 bool
pub(crate) fn call_predicate(
    rt: &mut Runtime,
    f: Value,
    args: &[Value],
    name: &str,
) -> Result<bool, String> {
    rt.call_value(f, args)?
        .as_bool()
        .ok_or_else(|| format!("{}: callback must return bool", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse;

    #[test]
    fn test_core_sources_parse() {
        for path in CORE_MODULES {
            let src = core_source(path).unwrap();
            let parsed = parse(src, path);
            assert!(!parsed.has_errors(), "{}: {:?}", path, parsed.parser_errors);
        }
        assert_eq!(core_source("core.missing"), None);
    }

    #[test]
    fn test_core_modules_load() {
        let mut rt = Runtime::new();
        for path in CORE_MODULES {
            rt.load_module(path)
                .unwrap_or_else(|e| panic!("{} failed to load: {}", path, e));
        }
    }
}
