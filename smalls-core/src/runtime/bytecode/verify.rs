//! 加载前的字节码校验
//!
//! 逐条检查操作数是否落在寄存器、常量池、函数表等范围内，
//! 跳转目标是否在函数内部，以及函数末尾不会落空。

use thiserror::Error;

use super::module::{BytecodeModule, CompiledFunction};
use super::{arg_a, arg_b, arg_bx, arg_c, arg_sbx, decode_op, Format, OpCode, Operand, NO_REG};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{function}@{pc}: {message}")]
pub struct VerifyError {
    pub function: String,
    pub pc: usize,
    pub message: String,
}

struct Checker<'a> {
    module: &'a BytecodeModule,
    function: &'a CompiledFunction,
    global_limit: u32,
    pc: usize,
}

impl<'a> Checker<'a> {
    fn fail(&self, message: impl Into<String>) -> VerifyError {
        VerifyError {
            function: self.function.name.clone(),
            pc: self.pc,
            message: message.into(),
        }
    }

    fn check(&self, kind: Operand, value: i64) -> Result<(), VerifyError> {
        let regs = self.function.register_count as i64;
        let within = |limit: usize| value >= 0 && value < limit as i64;
        let ok = match kind {
            Operand::Unused | Operand::Imm => true,
            Operand::Reg => value < regs,
            Operand::RegBase => value <= regs,
            Operand::OptReg => value == NO_REG as i64 || value < regs,
            Operand::Const => within(self.module.constants.len()),
            Operand::Global => value < self.global_limit as i64,
            Operand::Func => within(self.module.functions.len()),
            Operand::External => within(self.module.externals.len()),
            Operand::Native => within(self.module.natives.len()),
            Operand::Type => true,
            Operand::Upval => within(self.function.upvalue_descriptors.len()),
            Operand::Jump => {
                let target = self.pc as i64 + 1 + value;
                target >= 0 && target < self.function.instructions.len() as i64
            }
        };
        if ok {
            Ok(())
        } else {
            Err(self.fail(format!("{:?} operand {} out of range", kind, value)))
        }
    }

    fn instruction(&self, word: u32) -> Result<(), VerifyError> {
        let op = decode_op(word).map_err(|raw| self.fail(format!("invalid opcode 0x{:02x}", raw)))?;
        match op.format() {
            Format::Abc(a, b, c) => {
                self.check(a, arg_a(word) as i64)?;
                self.check(b, arg_b(word) as i64)?;
                self.check(c, arg_c(word) as i64)?;
            }
            Format::ABx(a, bx) => {
                self.check(a, arg_a(word) as i64)?;
                self.check(bx, arg_bx(word) as i64)?;
            }
            Format::AsBx(a, sbx) => {
                self.check(a, arg_a(word) as i64)?;
                self.check(sbx, arg_sbx(word) as i64)?;
            }
            Format::None => {}
        }
        let regs = self.function.register_count as u32;
        match op {
            OpCode::NewTuple if arg_c(word) + arg_b(word) > regs => {
                Err(self.fail("tuple items exceed the register window"))
            }
            OpCode::MapEntry if arg_a(word) + 1 >= regs => {
                Err(self.fail("map entry needs two registers"))
            }
            OpCode::CallClosure | OpCode::NativeCall if arg_a(word) + arg_c(word) > regs.max(1) => {
                Err(self.fail("call arguments exceed the register window"))
            }
            OpCode::Call | OpCode::TailCall => {
                let argc = self
                    .module
                    .function(arg_bx(word))
                    .map(|f| f.param_count as u32)
                    .unwrap_or(0);
                if arg_a(word) + argc > regs.max(1) {
                    Err(self.fail("call arguments exceed the register window"))
                } else {
                    Ok(())
                }
            }
            OpCode::Closure => {
                let captured = self
                    .module
                    .function(arg_bx(word))
                    .map(|f| f.upvalue_descriptors.as_slice())
                    .unwrap_or(&[]);
                for d in captured {
                    let ok = match d {
                        super::UpvalueDescriptor::Local(r) => (*r as u32) < regs,
                        super::UpvalueDescriptor::Upvalue(i) => {
                            (*i as usize) < self.function.upvalue_descriptors.len()
                        }
                    };
                    if !ok {
                        return Err(self.fail(format!("closure captures invalid slot {:?}", d)));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// 校验整个模块；`global_limit` 为加载完成后的全局变量总数
pub fn verify_module(module: &BytecodeModule, global_limit: u32) -> Result<(), VerifyError> {
    for function in &module.functions {
        let mut checker = Checker {
            module,
            function,
            global_limit,
            pc: 0,
        };
        if (function.param_count as u16) > function.register_count {
            return Err(checker.fail("more parameters than registers"));
        }
        if let Some(lines) = &function.debug_line_map {
            if lines.len() != function.instructions.len() {
                return Err(checker.fail("line map length differs from instruction count"));
            }
        }
        for (pc, word) in function.instructions.iter().enumerate() {
            checker.pc = pc;
            checker.instruction(*word)?;
        }
        let last = function.instructions.last().and_then(|w| decode_op(*w).ok());
        if !last.map(|op| op.is_terminator()).unwrap_or(false) {
            checker.pc = function.instructions.len();
            return Err(checker.fail("control falls off the end of the function"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::{encode_abc, encode_abx, encode_asbx, CompiledFunction, Constant};
    use super::*;

    fn module_with(instructions: Vec<u32>, registers: u16) -> BytecodeModule {
        let mut m = BytecodeModule::new("t");
        m.constants.push(Constant::Int(1));
        let mut f = CompiledFunction::new("f");
        f.register_count = registers;
        f.instructions = instructions;
        m.functions.push(f);
        m
    }

    #[test]
    fn test_accepts_valid_function() {
        let m = module_with(
            vec![
                encode_abx(OpCode::LoadK, 0, 0),
                encode_abc(OpCode::Ret, 0, 0, 0),
            ],
            1,
        );
        assert_eq!(verify_module(&m, 0), Ok(()));
    }

    #[test]
    fn test_rejects_register_out_of_range() {
        let m = module_with(
            vec![
                encode_abc(OpCode::Move, 0, 5, 0),
                encode_abc(OpCode::RetVoid, 0, 0, 0),
            ],
            2,
        );
        let err = verify_module(&m, 0).unwrap_err();
        assert_eq!(err.pc, 0);
        assert!(err.message.contains("Reg"));
    }

    #[test]
    fn test_rejects_bad_constant_and_jump() {
        let m = module_with(
            vec![
                encode_abx(OpCode::LoadK, 0, 3),
                encode_abc(OpCode::RetVoid, 0, 0, 0),
            ],
            1,
        );
        assert!(verify_module(&m, 0).is_err());

        let m = module_with(
            vec![
                encode_asbx(OpCode::Jmp, 0, 10),
                encode_abc(OpCode::RetVoid, 0, 0, 0),
            ],
            1,
        );
        assert!(verify_module(&m, 0).unwrap_err().message.contains("Jump"));
    }

    #[test]
    fn test_rejects_fall_through() {
        let m = module_with(vec![encode_abx(OpCode::LoadK, 0, 0)], 1);
        let err = verify_module(&m, 0).unwrap_err();
        assert!(err.message.contains("falls off"));
    }

    #[test]
    fn test_rejects_unknown_global() {
        let m = module_with(
            vec![
                encode_abx(OpCode::GetGlobal, 0, 4),
                encode_abc(OpCode::RetVoid, 0, 0, 0),
            ],
            1,
        );
        assert!(verify_module(&m, 4).is_err());
        assert!(verify_module(&m, 5).is_ok());
    }
}
