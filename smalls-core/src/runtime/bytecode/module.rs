//! 编译产物：函数、常量池、外部引用与反汇编

use std::fmt::Write as _;

use thiserror::Error;

use super::{decode_op, format_instruction, Format, OpCode, Operand};
use super::{arg_a, arg_bx, arg_sbx};
use crate::compiler::resolver::{ModuleId, NativeRef};
use crate::compiler::types::TypeId;

/// 常量池条目
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Int(i32),
    Float(f32),
    /// 字符串池下标
    String(u32),
}

/// 闭包创建时每个上值从哪里来
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueDescriptor {
    /// 外层函数的寄存器
    Local(u8),
    /// 外层函数自己的上值
    Upvalue(u8),
}

/// 其他模块中的函数实例
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalRef {
    pub module: ModuleId,
    pub function: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub name: String,
    pub param_count: u8,
    pub register_count: u16,
    pub return_type: TypeId,
    /// 函数类型，闭包值以此为类型
    pub signature: TypeId,
    pub instructions: Vec<u32>,
    pub upvalue_descriptors: Vec<UpvalueDescriptor>,
    /// 与指令一一对应的源码行
    pub debug_line_map: Option<Vec<u32>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),
    #[error("function name is not valid UTF-8")]
    InvalidName,
    #[error("unknown upvalue descriptor kind {0}")]
    InvalidDescriptor(u8),
    #[error("line map has {lines} entries for {instructions} instructions")]
    LineMapMismatch { lines: usize, instructions: usize },
    #[error("{0} trailing byte(s) after function")]
    TrailingBytes(usize),
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(DecodeError::UnexpectedEnd(self.pos));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

impl CompiledFunction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_count: 0,
            register_count: 0,
            return_type: TypeId::VOID,
            signature: TypeId::VOID,
            instructions: Vec::new(),
            upvalue_descriptors: Vec::new(),
            debug_line_map: None,
        }
    }

    /// 指令所在源码行，没有行表时为 0
    pub fn line_at(&self, pc: usize) -> u32 {
        self.debug_line_map
            .as_ref()
            .and_then(|m| m.get(pc).copied())
            .unwrap_or(0)
    }

    /// 序列化（小端）：
    /// `[name_len u16][name][param_count u8][register_count u16][return_type u32]`
    /// `[signature u32][count u32][instr u32 * count][upvalue_count u8]`
    /// `[(kind u8, index u8) * upvalue_count][has_lines u8][line u32 * count]`
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.instructions.len() * 8);
        out.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        out.extend_from_slice(self.name.as_bytes());
        out.push(self.param_count);
        out.extend_from_slice(&self.register_count.to_le_bytes());
        out.extend_from_slice(&self.return_type.0.to_le_bytes());
        out.extend_from_slice(&self.signature.0.to_le_bytes());
        out.extend_from_slice(&(self.instructions.len() as u32).to_le_bytes());
        for word in &self.instructions {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.push(self.upvalue_descriptors.len() as u8);
        for d in &self.upvalue_descriptors {
            match d {
                UpvalueDescriptor::Local(r) => out.extend_from_slice(&[0, *r]),
                UpvalueDescriptor::Upvalue(i) => out.extend_from_slice(&[1, *i]),
            }
        }
        match &self.debug_line_map {
            Some(lines) => {
                out.push(1);
                for line in lines {
                    out.extend_from_slice(&line.to_le_bytes());
                }
            }
            None => out.push(0),
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader { bytes, pos: 0 };
        let name_len = r.u16()? as usize;
        let name = std::str::from_utf8(r.take(name_len)?)
            .map_err(|_| DecodeError::InvalidName)?
            .to_string();
        let param_count = r.u8()?;
        let register_count = r.u16()?;
        let return_type = TypeId(r.u32()?);
        let signature = TypeId(r.u32()?);
        let count = r.u32()? as usize;
        let mut instructions = Vec::with_capacity(count.min(bytes.len() / 4));
        for _ in 0..count {
            instructions.push(r.u32()?);
        }
        let upvalue_count = r.u8()?;
        let mut upvalue_descriptors = Vec::with_capacity(upvalue_count as usize);
        for _ in 0..upvalue_count {
            let kind = r.u8()?;
            let index = r.u8()?;
            upvalue_descriptors.push(match kind {
                0 => UpvalueDescriptor::Local(index),
                1 => UpvalueDescriptor::Upvalue(index),
                other => return Err(DecodeError::InvalidDescriptor(other)),
            });
        }
        let debug_line_map = if r.u8()? != 0 {
            let mut lines = Vec::with_capacity(count);
            for _ in 0..count {
                lines.push(r.u32()?);
            }
            Some(lines)
        } else {
            None
        };
        if r.pos != bytes.len() {
            return Err(DecodeError::TrailingBytes(bytes.len() - r.pos));
        }
        Ok(Self {
            name,
            param_count,
            register_count,
            return_type,
            signature,
            instructions,
            upvalue_descriptors,
            debug_line_map,
        })
    }
}

/// 一个模块的全部字节码；`functions` 下标与解析结果的函数实例一一对应
#[derive(Debug, Clone, Default)]
pub struct BytecodeModule {
    pub name: String,
    pub string_pool: Vec<String>,
    pub constants: Vec<Constant>,
    pub functions: Vec<CompiledFunction>,
    pub externals: Vec<ExternalRef>,
    pub natives: Vec<NativeRef>,
    /// `__init` 的函数下标
    pub init: Option<u32>,
}

impl BytecodeModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn function(&self, index: u32) -> Option<&CompiledFunction> {
        self.functions.get(index as usize)
    }

    pub fn find_function(&self, name: &str) -> Option<u32> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| i as u32)
    }

    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(|f| f.instructions.len()).sum()
    }

    fn describe_constant(&self, c: &Constant) -> String {
        match c {
            Constant::Int(v) => format!("int {}", v),
            Constant::Float(v) => format!("float {:?}", v),
            Constant::String(i) => match self.string_pool.get(*i as usize) {
                Some(s) => format!("string {:?}", s),
                None => format!("string #{}", i),
            },
        }
    }

    /// 人类可读的清单
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "module {}", self.name);
        if !self.constants.is_empty() {
            let _ = writeln!(out, "constants:");
            for (i, c) in self.constants.iter().enumerate() {
                let _ = writeln!(out, "  [{}] {}", i, self.describe_constant(c));
            }
        }
        if !self.externals.is_empty() {
            let _ = writeln!(out, "externals:");
            for (i, e) in self.externals.iter().enumerate() {
                let _ = writeln!(out, "  [{}] module #{} function {}", i, e.module.0, e.function);
            }
        }
        if !self.natives.is_empty() {
            let _ = writeln!(out, "natives:");
            for (i, n) in self.natives.iter().enumerate() {
                let _ = writeln!(out, "  [{}] native #{} -> type #{}", i, n.native.0, n.ret.0);
            }
        }
        for (index, f) in self.functions.iter().enumerate() {
            let _ = writeln!(
                out,
                "\nfunction {} #{} (params {}, registers {}, upvalues {})",
                f.name,
                index,
                f.param_count,
                f.register_count,
                f.upvalue_descriptors.len()
            );
            for (pc, word) in f.instructions.iter().enumerate() {
                let _ = write!(out, "  {:04}  [{:>4}] {}", pc, f.line_at(pc), format_instruction(*word));
                if let Some(note) = self.annotate(*word, pc) {
                    let _ = write!(out, "    ; {}", note);
                }
                out.push('\n');
            }
        }
        out
    }

    /// 反汇编时附带的注释：常量值、跳转目标、被调函数名
    fn annotate(&self, word: u32, pc: usize) -> Option<String> {
        let op = decode_op(word).ok()?;
        match op.format() {
            Format::ABx(_, Operand::Const) => self
                .constants
                .get(arg_bx(word) as usize)
                .map(|c| self.describe_constant(c)),
            Format::ABx(_, Operand::Func) => self
                .function(arg_bx(word))
                .map(|f| f.name.clone()),
            Format::AsBx(_, Operand::Jump) => {
                Some(format!("-> {}", pc as i64 + 1 + arg_sbx(word) as i64))
            }
            _ if op == OpCode::CloseUpvals => Some(format!(">= r{}", arg_a(word))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{encode_abc, encode_abx, encode_asbx};
    use super::*;

    fn sample() -> CompiledFunction {
        CompiledFunction {
            name: "add".to_string(),
            param_count: 2,
            register_count: 3,
            return_type: TypeId::INT,
            signature: TypeId(12),
            instructions: vec![
                encode_abc(OpCode::Add, 2, 0, 1),
                encode_abc(OpCode::Ret, 2, 0, 0),
            ],
            upvalue_descriptors: vec![UpvalueDescriptor::Local(1), UpvalueDescriptor::Upvalue(0)],
            debug_line_map: Some(vec![1, 1]),
        }
    }

    #[test]
    fn test_encode_decode() {
        let f = sample();
        let bytes = f.encode();
        assert_eq!(&bytes[0..2], &3u16.to_le_bytes());
        assert_eq!(CompiledFunction::decode(&bytes), Ok(f));
    }

    #[test]
    fn test_decode_without_line_map() {
        let mut f = sample();
        f.debug_line_map = None;
        let decoded = CompiledFunction::decode(&f.encode()).unwrap();
        assert!(decoded.debug_line_map.is_none());
        assert_eq!(decoded.line_at(0), 0);
    }

    #[test]
    fn test_decode_truncated() {
        let bytes = sample().encode();
        let err = CompiledFunction::decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEnd(_)));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = sample().encode();
        bytes.push(0);
        assert_eq!(CompiledFunction::decode(&bytes), Err(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn test_disassemble() {
        let mut m = BytecodeModule::new("main");
        m.string_pool.push("hi".to_string());
        m.constants.push(Constant::String(0));
        let mut f = CompiledFunction::new("main");
        f.register_count = 1;
        f.instructions = vec![
            encode_abx(OpCode::LoadK, 0, 0),
            encode_asbx(OpCode::Jmp, 0, 0),
            encode_abc(OpCode::RetVoid, 0, 0, 0),
        ];
        m.functions.push(f);
        let text = m.disassemble();
        assert!(text.contains("module main"));
        assert!(text.contains("[0] string \"hi\""));
        assert!(text.contains("LOADK"));
        assert!(text.contains("; -> 2"));
        assert!(text.contains("RETVOID"));
    }
}
