//! 算术、比较、类型转换与值的文本形式

use std::cmp::Ordering;
use std::fmt::Write as _;

use crate::compiler::types::{TypeId, TypeKind};
use crate::runtime::bytecode::OpCode;
use crate::runtime::heap::HeapObject;
use crate::runtime::value::{Value, ValueData};
use crate::runtime::Runtime;

// ===== 算术 =====

pub(super) fn arith(rt: &mut Runtime, op: OpCode, l: Value, r: Value) -> Result<Value, String> {
    match (l.data, r.data) {
        (ValueData::Int(a), ValueData::Int(b)) => int_arith(op, a, b).map(Value::int),
        (ValueData::Float(a), ValueData::Float(b)) => float_arith(op, a, b).map(Value::float),
        (ValueData::Heap(a), ValueData::Heap(b)) if op == OpCode::Add => {
            match (rt.heap.string(a), rt.heap.string(b)) {
                (Some(x), Some(y)) => {
                    let joined = format!("{}{}", x, y);
                    Ok(rt.alloc_string(joined))
                }
                _ => Err(operand_error(rt, op, &l, &r)),
            }
        }
        _ => Err(operand_error(rt, op, &l, &r)),
    }
}

fn operand_error(rt: &Runtime, op: OpCode, l: &Value, r: &Value) -> String {
    format!(
        "cannot apply {} to {} and {}",
        op.name(),
        rt.types.name(l.type_id),
        rt.types.name(r.type_id)
    )
}

fn int_arith(op: OpCode, a: i32, b: i32) -> Result<i32, String> {
    Ok(match op {
        OpCode::Add => a.wrapping_add(b),
        OpCode::Sub => a.wrapping_sub(b),
        OpCode::Mul => a.wrapping_mul(b),
        OpCode::Div => {
            if b == 0 {
                return Err("division by zero".to_string());
            }
            a.wrapping_div(b)
        }
        OpCode::Mod => {
            if b == 0 {
                return Err("modulo by zero".to_string());
            }
            a.wrapping_rem(b)
        }
        OpCode::BAnd => a & b,
        OpCode::BOr => a | b,
        OpCode::BXor => a ^ b,
        OpCode::Shl => a.wrapping_shl(b as u32),
        OpCode::Shr => a.wrapping_shr(b as u32),
        _ => return Err(format!("{} is not an integer operation", op.name())),
    })
}

fn float_arith(op: OpCode, a: f32, b: f32) -> Result<f32, String> {
    Ok(match op {
        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => {
            if b == 0.0 {
                return Err("float division by zero".to_string());
            }
            a / b
        }
        OpCode::Mod => {
            if b == 0.0 {
                return Err("modulo by zero".to_string());
            }
            a % b
        }
        _ => return Err(format!("{} is not a float operation", op.name())),
    })
}

pub(super) fn unary(rt: &Runtime, op: OpCode, v: Value) -> Result<Value, String> {
    match (op, v.data) {
        (OpCode::Neg, ValueData::Int(i)) => Ok(Value::int(i.wrapping_neg())),
        (OpCode::Neg, ValueData::Float(f)) => Ok(Value::float(-f)),
        (OpCode::Not, ValueData::Bool(b)) => Ok(Value::bool(!b)),
        (OpCode::BNot, ValueData::Int(i)) => Ok(Value::int(!i)),
        _ => Err(format!(
            "cannot apply {} to {}",
            op.name(),
            rt.types.name(v.type_id)
        )),
    }
}

// ===== 比较 =====

/// 有序比较；不可比较时返回 None
pub(crate) fn compare_values(rt: &Runtime, l: &Value, r: &Value) -> Option<Ordering> {
    match (l.data, r.data) {
        (ValueData::Int(a), ValueData::Int(b)) => Some(a.cmp(&b)),
        (ValueData::Float(a), ValueData::Float(b)) => a.partial_cmp(&b),
        (ValueData::Bool(a), ValueData::Bool(b)) => Some(a.cmp(&b)),
        (ValueData::Heap(a), ValueData::Heap(b)) => {
            let x = rt.heap.string(a)?;
            let y = rt.heap.string(b)?;
            Some(x.cmp(y))
        }
        _ => None,
    }
}

pub(super) fn less(rt: &Runtime, l: &Value, r: &Value, or_equal: bool) -> Result<bool, String> {
    match compare_values(rt, l, r) {
        Some(Ordering::Less) => Ok(true),
        Some(Ordering::Equal) => Ok(or_equal),
        Some(Ordering::Greater) => Ok(false),
        // NaN
        None if matches!((l.data, r.data), (ValueData::Float(_), ValueData::Float(_))) => {
            Ok(false)
        }
        None => Err(format!(
            "cannot compare {} with {}",
            rt.types.name(l.type_id),
            rt.types.name(r.type_id)
        )),
    }
}

// ===== 类型转换 =====

pub(super) fn cast(rt: &mut Runtime, v: Value, target: TypeId) -> Result<Value, String> {
    if v.type_id == target || target == TypeId::ANY {
        return Ok(v);
    }
    let kind = rt.types.kind(target).clone();
    match (kind, v.data) {
        (TypeKind::Float, ValueData::Int(i)) => return Ok(Value::float(i as f32)),
        (TypeKind::Int, ValueData::Float(f)) => return Ok(Value::int(f as i32)),
        (TypeKind::String, ValueData::Int(_) | ValueData::Float(_) | ValueData::Bool(_)) => {
            let text = display_value(rt, &v);
            return Ok(rt.alloc_string(text));
        }
        (TypeKind::Newtype(inner), _) if inner == v.type_id => return Ok(v.with_type(target)),
        _ => {}
    }
    if rt.types.newtype_inner(v.type_id) == Some(target) {
        return Ok(v.with_type(target));
    }
    if is_type(rt, &v, target) {
        return Ok(v);
    }
    Err(format!(
        "invalid cast from {} to {}",
        rt.types.name(v.type_id),
        rt.types.name(target)
    ))
}

/// `is` 检查；`any`、`any_array`、`any_map` 作通配
pub(super) fn is_type(rt: &Runtime, v: &Value, ty: TypeId) -> bool {
    if ty == TypeId::ANY || ty == v.type_id {
        return true;
    }
    match rt.types.kind(ty) {
        TypeKind::AnyArray => matches!(
            rt.types.kind(v.type_id),
            TypeKind::Array(_) | TypeKind::FixedArray { .. }
        ),
        TypeKind::AnyMap => matches!(rt.types.kind(v.type_id), TypeKind::Map { .. }),
        _ => false,
    }
}

// ===== 文本形式 =====

/// 值的显示形式；嵌套在容器中的字符串带引号
pub(crate) fn display_value(rt: &Runtime, v: &Value) -> String {
    let mut out = String::new();
    write_value(rt, v, &mut out, false, 0);
    out
}

pub(crate) fn format_float(f: f32) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn short_name(name: &str) -> &str {
    let head = name.split('!').next().unwrap_or(name);
    match head.rfind('.') {
        Some(i) => &name[i + 1..],
        None => name,
    }
}

/// 剥掉 newtype 外壳
fn underlying(rt: &Runtime, mut ty: TypeId) -> TypeId {
    for _ in 0..16 {
        match rt.types.newtype_inner(ty) {
            Some(inner) => ty = inner,
            None => break,
        }
    }
    ty
}

fn write_list(rt: &Runtime, items: &[Value], out: &mut String, depth: usize) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_value(rt, item, out, true, depth + 1);
    }
}

fn write_value(rt: &Runtime, v: &Value, out: &mut String, nested: bool, depth: usize) {
    if depth > 32 {
        out.push_str("...");
        return;
    }
    match v.data {
        ValueData::Void => out.push_str("void"),
        ValueData::Int(i) => {
            let _ = write!(out, "{}", i);
        }
        ValueData::Float(f) => out.push_str(&format_float(f)),
        ValueData::Bool(b) => out.push_str(if b { "true" } else { "false" }),
        ValueData::Object(h) => {
            if h.is_valid() {
                let _ = write!(out, "<object {}>", h.id);
            } else {
                out.push_str("<object invalid>");
            }
        }
        ValueData::Heap(p) => {
            let Some(obj) = rt.heap.get(p) else {
                out.push_str("<freed>");
                return;
            };
            match obj {
                HeapObject::String(s) => {
                    if nested {
                        let _ = write!(out, "{:?}", s);
                    } else {
                        out.push_str(s);
                    }
                }
                HeapObject::Array(a) => {
                    out.push('[');
                    write_list(rt, &a.items, out, depth);
                    out.push(']');
                }
                HeapObject::Map(m) => {
                    out.push('{');
                    for (i, e) in m.entries().iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        write_value(rt, &e.key, out, true, depth + 1);
                        out.push_str(": ");
                        write_value(rt, &e.value, out, true, depth + 1);
                    }
                    out.push('}');
                }
                HeapObject::Tuple(items) => {
                    out.push('(');
                    write_list(rt, items, out, depth);
                    out.push(')');
                }
                HeapObject::Struct(fields) => {
                    out.push_str(short_name(rt.types.name(v.type_id)));
                    let def = rt.types.struct_def(underlying(rt, v.type_id));
                    out.push_str(" { ");
                    for (i, f) in fields.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        if let Some(field) = def.and_then(|d| d.fields.get(i)) {
                            out.push_str(&field.name);
                            out.push_str(": ");
                        }
                        write_value(rt, f, out, true, depth + 1);
                    }
                    out.push_str(" }");
                }
                HeapObject::Sum { tag, payload } => {
                    let def = rt.types.sum_def(underlying(rt, v.type_id));
                    match def.and_then(|d| d.variants.iter().find(|var| var.tag == *tag)) {
                        Some(variant) => out.push_str(&variant.name),
                        None => {
                            let _ = write!(out, "#{}", tag);
                        }
                    }
                    if let Some(payload) = payload {
                        let tuple = payload
                            .as_heap()
                            .and_then(|p| rt.heap.get(p))
                            .and_then(|o| match o {
                                HeapObject::Tuple(items) => Some(items),
                                _ => None,
                            });
                        out.push('(');
                        match tuple {
                            Some(items) => write_list(rt, items, out, depth),
                            None => write_value(rt, payload, out, true, depth + 1),
                        }
                        out.push(')');
                    }
                }
                HeapObject::Closure(c) => {
                    let name = rt.function_name(c.module, c.function);
                    let _ = write!(out, "<fn {}>", name);
                }
                HeapObject::Upvalue(_) => out.push_str("<upvalue>"),
                HeapObject::Handle(h) => {
                    let _ = write!(out, "<handle {}:{}>", h.type_tag, h.id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_wraps() {
        assert_eq!(int_arith(OpCode::Add, i32::MAX, 1), Ok(i32::MIN));
        assert_eq!(int_arith(OpCode::Mul, i32::MAX, 2), Ok(-2));
        assert_eq!(int_arith(OpCode::Div, i32::MIN, -1), Ok(i32::MIN));
    }

    #[test]
    fn test_division_errors() {
        assert_eq!(int_arith(OpCode::Div, 10, 0), Err("division by zero".to_string()));
        assert_eq!(int_arith(OpCode::Mod, 10, 0), Err("modulo by zero".to_string()));
        assert!(float_arith(OpCode::Div, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_shifts() {
        assert_eq!(int_arith(OpCode::Shl, 1, 4), Ok(16));
        assert_eq!(int_arith(OpCode::Shr, -16, 2), Ok(-4));
    }

    #[test]
    fn test_float_format() {
        assert_eq!(format_float(2.0), "2.0");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(-0.25), "-0.25");
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("geo.Point"), "Point");
        assert_eq!(short_name("Point"), "Point");
        assert_eq!(short_name("util.Box!(int)"), "Box!(int)");
    }
}
