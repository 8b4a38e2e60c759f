//! 寄存器虚拟机
//!
//! 所有帧共用一条寄存器栈；每帧占用 `[base, top)` 的窗口。
//! 指令解释在 [`execution`]，调用与上值在 [`call`]，
//! 算术与比较在 [`operators`]，聚合对象的构造和访问在 [`index`]。

mod call;
mod execution;
mod index;
mod operators;

pub(crate) use call::{call_value, collect_garbage, invoke};
pub(crate) use index::{deep_copy, map_lookup, map_store, zero_value};
pub(crate) use operators::{compare_values, display_value, format_float};

use std::rc::Rc;

use crate::compiler::resolver::ModuleId;
use crate::runtime::bytecode::BytecodeModule;
use crate::runtime::value::{HeapPtr, Value};

/// 调用帧
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub code: Rc<BytecodeModule>,
    pub module: ModuleId,
    pub function: u32,
    /// 闭包调用时的闭包对象，上值从这里取
    pub closure: Option<HeapPtr>,
    pub pc: usize,
    pub base: usize,
    /// 窗口上界（不含）
    pub top: usize,
    /// 返回值写回的绝对寄存器；由宿主或原生函数发起的调用为 None
    pub ret_slot: Option<usize>,
}

/// VM 的可变状态
#[derive(Debug, Default)]
pub(crate) struct VmState {
    pub registers: Vec<Value>,
    pub frames: Vec<Frame>,
    /// 打开的上值 `(绝对栈槽, 上值对象)`，按栈槽升序
    pub open_upvalues: Vec<(usize, HeapPtr)>,
    /// 剩余指令预算；None 表示不限
    pub gas: Option<u64>,
    /// 第一个错误发生时捕获的调用栈
    pub trace: Option<Vec<String>>,
    /// 出错位置：最内层帧的模块与行号
    pub fault: Option<(String, u32)>,
    /// 原生函数执行期间临时固定的值
    pub pins: Vec<Value>,
    pub instructions: u64,
}

impl VmState {
    /// 下一帧可用的寄存器起点
    pub fn stack_top(&self) -> usize {
        self.frames.last().map(|f| f.top).unwrap_or(0)
    }

    /// 确保寄存器栈至少有 `len` 个槽位
    pub fn reserve(&mut self, len: usize) {
        if self.registers.len() < len {
            self.registers.resize(len, Value::VOID);
        }
    }
}
