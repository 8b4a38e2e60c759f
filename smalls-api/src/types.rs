//! API 类型定义
//!
//! 编译和执行的输入输出类型。

use std::rc::Rc;

use smalls_core::runtime::bytecode::BytecodeModule;
use smalls_core::{Diagnostic, ModuleId, Value};

/// 编译输出
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// 注册到运行时的模块
    pub module: ModuleId,
    pub path: String,
    /// 已通过校验的字节码
    pub bytecode: Rc<BytecodeModule>,
    /// 编译成功时仍可能有警告
    pub warnings: Vec<Diagnostic>,
}

/// 执行输出
#[derive(Debug, Clone)]
pub struct ExecuteOutput {
    /// 返回值；堆上的值只在产生它的运行时内有效
    pub value: Value,
    /// 返回值的显示形式
    pub display: String,
    /// 标准输出捕获（`capture_output` 开启时）
    pub stdout: String,
    /// 本次执行消耗的指令数
    pub instructions: u64,
}
