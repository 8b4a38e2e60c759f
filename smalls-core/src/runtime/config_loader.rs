//! 用脚本表达式写配置
//!
//! 配置文件只是一个表达式，例如 `{ name = "goblin", hp = 12 }`。加载时把它包进
//! 一个临时模块，类型模块的导出全部可见：
//!
//! ```text
//! from game.types import { Monster, Rank };
//! var __config: Monster = { name = "goblin", hp = 12 };
//! ```
//!
//! 模块初始化后读出 `__config`，转成 JSON 再反序列化为宿主类型。

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value as Json};
use tracing::debug;

use crate::compiler::types::TypeId;
use crate::runtime::heap::HeapObject;
use crate::runtime::value::{Value, ValueData};
use crate::runtime::{ExportKind, Runtime, RuntimeError};

const MAX_DEPTH: usize = 64;

/// 编译 `expr` 并反序列化为 `T`；`module` 为提供 `type_name` 的模块，None 时依赖 prelude
pub fn load_config<T: DeserializeOwned>(
    rt: &mut Runtime,
    name: &str,
    type_name: &str,
    expr: &str,
    module: Option<&str>,
) -> Result<T, RuntimeError> {
    let config_error = |message: String| RuntimeError::Config {
        name: name.to_string(),
        message,
    };
    let mut source = String::new();
    if let Some(module) = module {
        let names = exported_names(rt, module)?;
        if !names.is_empty() {
            source.push_str(&format!("from {} import {{ {} }};\n", module, names.join(", ")));
        }
    }
    let expr = expr.trim().trim_end_matches(';');
    source.push_str(&format!("var __config: {} = {};\n", type_name, expr));

    let path = format!("__config.{}", name);
    let id = rt.load_module_from_source(&path, &source)?;
    rt.ensure_ready(id).map_err(|e| config_error(e.to_string()))?;
    let value = rt
        .global(id, "__config")
        .ok_or_else(|| config_error("configuration produced no value".to_string()))?;

    check_layout(rt, value.type_id)?;
    let json = value_to_json(rt, &value, 0).map_err(config_error)?;
    debug!(target: "smalls::runtime", config = name, "configuration loaded");
    serde_json::from_value(json).map_err(|e| config_error(e.to_string()))
}

/// 配置表达式可以直接使用类型模块的全部导出（变体、常量等）
fn exported_names(rt: &mut Runtime, module: &str) -> Result<Vec<String>, RuntimeError> {
    let id = rt.load_module(module)?;
    Ok(rt
        .script(id)
        .map(|s| {
            s.exports()
                .into_iter()
                .filter(|(_, kind)| *kind != ExportKind::Module)
                .map(|(name, _)| name)
                .collect()
        })
        .unwrap_or_default())
}

/// 宿主登记过同名原生结构体时，字段必须一一对应
fn check_layout(rt: &Runtime, ty: TypeId) -> Result<(), RuntimeError> {
    let type_name = rt.types.name(ty).to_string();
    let Some(layout) = rt.natives.layout_for_type(&type_name) else {
        return Ok(());
    };
    let Some(def) = rt.types.struct_def(ty) else {
        return Err(RuntimeError::Layout {
            name: type_name,
            message: "registered as a native struct but is not a struct".to_string(),
        });
    };
    if def.fields.len() != layout.fields.len() {
        return Err(RuntimeError::Layout {
            name: type_name,
            message: format!(
                "script declares {} field(s), host declares {}",
                def.fields.len(),
                layout.fields.len()
            ),
        });
    }
    for (script, host) in def.fields.iter().zip(&layout.fields) {
        if script.name != host.name || script.ty != host.ty {
            return Err(RuntimeError::Layout {
                name: type_name,
                message: format!(
                    "field '{}' does not match host field '{}'",
                    script.name, host.name
                ),
            });
        }
    }
    Ok(())
}

/// 脚本值转 JSON：结构体为对象，和类型按 serde 的外部标签形式
pub fn value_to_json(rt: &Runtime, v: &Value, depth: usize) -> Result<Json, String> {
    if depth > MAX_DEPTH {
        return Err("configuration value is nested too deeply".to_string());
    }
    let p = match v.data {
        ValueData::Void => return Ok(Json::Null),
        ValueData::Int(i) => return Ok(Json::from(i)),
        ValueData::Float(f) => {
            return Number::from_f64(f as f64)
                .map(Json::Number)
                .ok_or_else(|| format!("float {} has no JSON form", f))
        }
        ValueData::Bool(b) => return Ok(Json::Bool(b)),
        ValueData::Object(_) => return Err("object handles cannot be serialized".to_string()),
        ValueData::Heap(p) => p,
    };
    let obj = rt
        .heap
        .get(p)
        .ok_or_else(|| "dangling heap reference".to_string())?;
    let ty = underlying(rt, v.type_id);
    match obj {
        HeapObject::String(s) => Ok(Json::String(s.clone())),
        HeapObject::Array(a) => a
            .items
            .iter()
            .map(|x| value_to_json(rt, x, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Json::Array),
        HeapObject::Tuple(items) => items
            .iter()
            .map(|x| value_to_json(rt, x, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Json::Array),
        HeapObject::Map(m) => {
            let mut out = Map::new();
            for e in m.entries() {
                out.insert(rt.display(&e.key), value_to_json(rt, &e.value, depth + 1)?);
            }
            Ok(Json::Object(out))
        }
        HeapObject::Struct(fields) => {
            let def = rt
                .types
                .struct_def(ty)
                .ok_or_else(|| format!("{} is not a struct", rt.types.name(ty)))?;
            let mut out = Map::new();
            for (f, x) in def.fields.iter().zip(fields) {
                out.insert(f.name.clone(), value_to_json(rt, x, depth + 1)?);
            }
            Ok(Json::Object(out))
        }
        HeapObject::Sum { tag, payload } => {
            let variant = rt
                .types
                .sum_def(ty)
                .and_then(|d| d.variants.iter().find(|x| x.tag == *tag))
                .ok_or_else(|| format!("{} has no variant #{}", rt.types.name(ty), tag))?;
            match payload {
                None => Ok(Json::String(variant.name.clone())),
                Some(x) => {
                    let mut out = Map::new();
                    out.insert(variant.name.clone(), value_to_json(rt, x, depth + 1)?);
                    Ok(Json::Object(out))
                }
            }
        }
        other => Err(format!("{} values cannot be serialized", other.kind_name())),
    }
}

fn underlying(rt: &Runtime, mut ty: TypeId) -> TypeId {
    while let Some(inner) = rt.types.newtype_inner(ty) {
        if inner == ty {
            break;
        }
        ty = inner;
    }
    ty
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Monster {
        name: String,
        hp: i32,
        tags: Vec<String>,
    }

    #[test]
    fn test_struct_config() {
        let mut rt = Runtime::new();
        rt.load_module_from_source(
            "game.types",
            "type Monster { name: string; hp: int; tags: string[]; }",
        )
        .unwrap();
        let m: Monster = load_config(
            &mut rt,
            "goblin",
            "Monster",
            "{ name = \"goblin\", hp = 12, tags = {\"small\", \"green\"} };",
            Some("game.types"),
        )
        .unwrap();
        assert_eq!(
            m,
            Monster {
                name: "goblin".into(),
                hp: 12,
                tags: vec!["small".into(), "green".into()],
            }
        );
    }

    #[test]
    fn test_primitive_config() {
        let mut rt = Runtime::new();
        let n: f32 = load_config(&mut rt, "speed", "float", "1.5", None).unwrap();
        assert_eq!(n, 1.5);
    }

    #[test]
    fn test_bad_expression_is_an_error() {
        let mut rt = Runtime::new();
        let err = load_config::<i32>(&mut rt, "bad", "int", "\"text\"", None).unwrap_err();
        assert!(matches!(err, RuntimeError::Compile { .. }));
    }

    #[test]
    fn test_deserialize_mismatch_is_a_config_error() {
        let mut rt = Runtime::new();
        let err = load_config::<String>(&mut rt, "n", "int", "3", None).unwrap_err();
        assert!(matches!(err, RuntimeError::Config { .. }));
    }
}
