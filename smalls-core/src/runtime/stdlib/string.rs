//! `core.string`

use crate::compiler::types::TypeId;
use crate::runtime::error::RuntimeError;
use crate::runtime::native::NativeCall;
use crate::runtime::value::Value;
use crate::runtime::Runtime;

use super::{array_arg, str_arg};

pub(super) fn register(rt: &mut Runtime) -> Result<(), RuntimeError> {
    const STR: TypeId = TypeId::STRING;
    const INT: TypeId = TypeId::INT;

    rt.module("core.string")
        .function("pad_left", &[STR, INT, STR], STR, |rt, call| pad(rt, call, true))
        .function("pad_right", &[STR, INT, STR], STR, |rt, call| pad(rt, call, false))
        .function("last_index_of", &[STR, STR], INT, last_index_of_fn)
        .function("count", &[STR, STR], INT, count_fn)
        .function("trim_start", &[STR], STR, |rt, call| {
            let s = str_arg(rt, call, 0)?;
            Ok(rt.alloc_string(s.trim_start().to_string()))
        })
        .function("trim_end", &[STR], STR, |rt, call| {
            let s = str_arg(rt, call, 0)?;
            Ok(rt.alloc_string(s.trim_end().to_string()))
        })
        .function("trim", &[STR], STR, |rt, call| {
            let s = str_arg(rt, call, 0)?;
            Ok(rt.alloc_string(s.trim().to_string()))
        })
        .function("format", &[STR, TypeId::ANY_ARRAY], STR, format_fn)
        .finalize()?;
    Ok(())
}

/// 用 `fill` 循环填充到 `width` 个字符
fn pad(rt: &mut Runtime, call: &NativeCall, left: bool) -> Result<Value, String> {
    let s = str_arg(rt, call, 0)?;
    let width = call.int(1)?;
    let fill: Vec<char> = str_arg(rt, call, 2)?.chars().collect();
    let len = s.chars().count();
    if width <= len as i32 || fill.is_empty() {
        return Ok(rt.alloc_string(s));
    }
    let padding: String = (0..width as usize - len)
        .map(|i| fill[i % fill.len()])
        .collect();
    let out = if left { padding + &s } else { s + &padding };
    Ok(rt.alloc_string(out))
}

/// 字符下标；空串返回长度，找不到返回 -1
fn last_index_of_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let s = str_arg(rt, call, 0)?;
    let needle = str_arg(rt, call, 1)?;
    let idx = match s.rfind(needle.as_str()) {
        Some(b) => s[..b].chars().count() as i32,
        None => -1,
    };
    Ok(Value::int(idx))
}

/// 不重叠出现次数
fn count_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let s = str_arg(rt, call, 0)?;
    let needle = str_arg(rt, call, 1)?;
    if needle.is_empty() {
        return Ok(Value::int(0));
    }
    Ok(Value::int(s.matches(needle.as_str()).count() as i32))
}

fn format_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let fmt = str_arg(rt, call, 0)?;
    let args: Vec<String> = array_arg(rt, call, 1)?
        .iter()
        .map(|v| rt.display(v))
        .collect();
    Ok(rt.alloc_string(format_with(&fmt, &args)))
}

/// `{}` 依次取参数，`{{` `}}` 转义；参数用完后 `{}` 原样保留
pub(crate) fn format_with(fmt: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(fmt.len());
    let mut next = 0;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('{', Some('{')) => {
                chars.next();
                out.push('{');
            }
            ('}', Some('}')) => {
                chars.next();
                out.push('}');
            }
            ('{', Some('}')) => {
                chars.next();
                match args.get(next) {
                    Some(a) => out.push_str(a),
                    None => out.push_str("{}"),
                }
                next += 1;
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_format_placeholders() {
        assert_eq!(
            format_with("Point({}, {})", &strings(&["10", "20"])),
            "Point(10, 20)"
        );
        assert_eq!(format_with("{{}} {}", &strings(&["x"])), "{} x");
        assert_eq!(format_with("{} and {}", &strings(&["a"])), "a and {}");
        assert_eq!(format_with("no args", &[]), "no args");
    }

    #[test]
    fn test_pad_cycles_fill() {
        let mut rt = Runtime::new();
        let s = rt.alloc_string("7".to_string());
        let fill = rt.alloc_string("ab".to_string());
        let call = NativeCall::new(
            "core.string.pad_left",
            vec![s, Value::int(4), fill],
            TypeId::STRING,
        );
        let out = pad(&mut rt, &call, true).unwrap();
        assert_eq!(rt.get_string(&out), Some("aba7"));
    }
}
