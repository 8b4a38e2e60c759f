//! `core.math`

use crate::compiler::types::TypeId;
use crate::runtime::error::RuntimeError;
use crate::runtime::native::NativeCall;
use crate::runtime::value::Value;
use crate::runtime::Runtime;

fn unary(f: fn(f32) -> f32) -> impl Fn(&mut Runtime, &NativeCall) -> Result<Value, String> {
    move |_rt: &mut Runtime, call: &NativeCall| Ok(Value::float(f(call.float(0)?)))
}

fn binary(f: fn(f32, f32) -> f32) -> impl Fn(&mut Runtime, &NativeCall) -> Result<Value, String> {
    move |_rt: &mut Runtime, call: &NativeCall| Ok(Value::float(f(call.float(0)?, call.float(1)?)))
}

pub(super) fn register(rt: &mut Runtime) -> Result<(), RuntimeError> {
    const F: TypeId = TypeId::FLOAT;

    rt.module("core.math")
        .function("sin", &[F], F, unary(f32::sin))
        .function("cos", &[F], F, unary(f32::cos))
        .function("sqrt", &[F], F, unary(f32::sqrt))
        .function("log", &[F], F, unary(f32::ln))
        .function("exp", &[F], F, unary(f32::exp))
        .function("ceil", &[F], F, unary(f32::ceil))
        .function("floor", &[F], F, unary(f32::floor))
        .function("round", &[F], F, unary(f32::round))
        .function("pow", &[F, F], F, binary(f32::powf))
        .function("atan2", &[F, F], F, binary(f32::atan2))
        .finalize()?;
    Ok(())
}
