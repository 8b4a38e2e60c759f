//! `core.test`：脚本测试的计数

use tracing::info;

use crate::compiler::types::TypeId;
use crate::runtime::error::RuntimeError;
use crate::runtime::native::NativeCall;
use crate::runtime::value::Value;
use crate::runtime::Runtime;

use super::str_arg;

pub(super) fn register(rt: &mut Runtime) -> Result<(), RuntimeError> {
    rt.module("core.test")
        .function("test", &[TypeId::STRING, TypeId::BOOL], TypeId::VOID, test_fn)
        .function("reset", &[], TypeId::VOID, |rt, _| {
            rt.tests = Default::default();
            Ok(Value::VOID)
        })
        .function("summary", &[], TypeId::STRING, summary_fn)
        .function("failures", &[], TypeId::INT, |rt, _| {
            Ok(Value::int(rt.tests.failures as i32))
        })
        .function("count", &[], TypeId::INT, |rt, _| Ok(Value::int(rt.tests.count as i32)))
        .finalize()?;
    Ok(())
}

fn test_fn(rt: &mut Runtime, call: &NativeCall) -> Result<Value, String> {
    let name = str_arg(rt, call, 0)?;
    let passed = call.bool(1)?;
    rt.tests.count += 1;
    if passed {
        rt.write_output(&format!("  PASS: {}\n", name));
    } else {
        rt.tests.failures += 1;
        rt.write_output(&format!("  FAIL: {}\n", name));
    }
    Ok(Value::VOID)
}

fn summary_fn(rt: &mut Runtime, _call: &NativeCall) -> Result<Value, String> {
    let log = rt.tests.clone();
    let text = format!(
        "Tests: {} passed, {} failed, {} total",
        log.count - log.failures,
        log.failures,
        log.count
    );
    info!(target: "smalls::runtime", passed = log.count - log.failures, failed = log.failures, "{}", text);
    Ok(rt.alloc_string(text))
}
