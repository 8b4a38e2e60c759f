//! 测试辅助工具
//!
//! 提供端到端测试的辅助函数：装载脚本、调用入口、读取返回值

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use smalls_core::{ExecutionResult, LimitConfig, ModuleId, Runtime, RuntimeError, Value};

/// 测试脚本使用的模块路径
pub const TEST_MODULE: &str = "test";

/// 一次执行的运行时与结果；读取字符串等堆值需要运行时
pub struct Run {
    pub rt: Runtime,
    pub result: ExecutionResult,
}

impl Run {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Value {
        self.result.value
    }

    pub fn error(&self) -> &str {
        &self.result.error_message
    }

    pub fn int(&self) -> Option<i32> {
        self.assert_ok();
        self.result.value.as_int()
    }

    pub fn float(&self) -> Option<f32> {
        self.assert_ok();
        self.result.value.as_float()
    }

    pub fn bool(&self) -> Option<bool> {
        self.assert_ok();
        self.result.value.as_bool()
    }

    pub fn string(&self) -> Option<String> {
        self.assert_ok();
        self.rt.get_string(&self.result.value).map(|s| s.to_string())
    }

    pub fn ints(&self) -> Option<Vec<i32>> {
        self.assert_ok();
        self.rt
            .array_items(&self.result.value)?
            .iter()
            .map(|v| v.as_int())
            .collect()
    }

    fn assert_ok(&self) {
        assert!(
            self.result.is_ok(),
            "script failed: {}",
            self.result.error_message
        );
    }
}

/// 装载源码，编译失败时带着诊断信息 panic
pub fn load(rt: &mut Runtime, path: &str, src: &str) -> ModuleId {
    match rt.load_module_from_source(path, src) {
        Ok(id) => id,
        Err(e) => panic!("{} failed to load: {}\n{:#?}", path, e, e.diagnostics()),
    }
}

/// 执行 `main()`
///
/// # Example
/// ```ignore
/// let run = run_code("fn main(): int { return 5; }");
/// assert_eq!(run.int(), Some(5));
/// ```
pub fn run_code(src: &str) -> Run {
    run_fn(src, "main", &[])
}

/// 执行任意入口，使用默认执行额度
pub fn run_fn(src: &str, entry: &str, args: &[Value]) -> Run {
    let gas = LimitConfig::default().gas_limit;
    run_entry(src, entry, args, gas)
}

/// 指定执行额度执行 `main()`
pub fn run_with_gas(src: &str, gas: u64) -> Run {
    run_entry(src, "main", &[], gas)
}

fn run_entry(src: &str, entry: &str, args: &[Value], gas: u64) -> Run {
    let mut rt = Runtime::new();
    let id = load(&mut rt, TEST_MODULE, src);
    let result = rt.execute_script(id, entry, args, gas);
    Run { rt, result }
}

/// 编译错误的消息列表；编译成功时为空
pub fn compile_errors(src: &str) -> Vec<String> {
    let mut rt = Runtime::new();
    match rt.load_module_from_source(TEST_MODULE, src) {
        Ok(_) => Vec::new(),
        Err(e) => e.diagnostics().iter().map(|d| d.message.clone()).collect(),
    }
}

/// 截获 `print` 输出
pub fn capture_output(rt: &mut Runtime) -> Rc<RefCell<String>> {
    let buf = Rc::new(RefCell::new(String::new()));
    let sink = buf.clone();
    rt.set_output(move |text| sink.borrow_mut().push_str(text));
    buf
}

/// 错误信息文本
pub fn error_text(e: &RuntimeError) -> String {
    e.to_string()
}
