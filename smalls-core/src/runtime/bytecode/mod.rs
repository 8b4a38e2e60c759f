//! 字节码定义
//!
//! 32 位定长指令：`op:6 | A:8 | B:9 | C:9`，或 `op:6 | A:8 | Bx:18`
//! （`sBx` 为有符号 18 位）。跳转偏移相对下一条指令。

pub mod module;
pub mod verify;

pub use module::{
    BytecodeModule, CompiledFunction, Constant, DecodeError, ExternalRef, UpvalueDescriptor,
};
pub use verify::{verify_module, VerifyError};

/// 操作码定义
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // ===== 加载 (0x00-0x06) =====
    Move = 0x00, // R[A] = R[B]
    LoadI,       // R[A] = sBx
    LoadB,       // R[A] = B != 0
    LoadK,       // R[A] = K[Bx]
    LoadNil,     // R[A] = 类型 Bx 的零值
    GetGlobal,   // R[A] = G[Bx]
    SetGlobal,   // G[Bx] = R[A]

    // ===== 算术 (0x07-0x13) =====
    Add = 0x07, // 字符串时为拼接
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Not,
    BNot,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,

    // ===== 比较 (0x14-0x19) =====
    Eq = 0x14, // R[A] = R[B] == R[C]（结构相等）
    Lt,
    Le,
    IsEq, // if (R[A] == R[B]) != C then pc++
    IsLt,
    IsLe,

    // ===== 跳转 (0x1A-0x1C) =====
    Jmp = 0x1A,
    JmpF, // if !R[A] then pc += sBx
    JmpT,

    // ===== 调用 (0x1D-0x23) =====
    Call = 0x1D,  // 参数位于 R[A..]，结果写回 R[A]
    CallExt,      // 外部函数表 Bx
    TailCall,     // 复用当前帧
    CallClosure,  // 闭包 R[B]，C 个参数
    NativeCall,   // 原生表 B，C 个参数
    Ret,          // 返回 R[A]
    RetVoid,

    // ===== 闭包 (0x24-0x28) =====
    Closure = 0x24, // R[A] = 本模块函数 Bx 的闭包
    ExtFunc,        // R[A] = 外部函数 Bx 的函数值
    GetUpval,       // R[A] = U[B]
    SetUpval,       // U[B] = R[A]
    CloseUpvals,    // 关闭 >= R[A] 的上值

    // ===== 聚合构造 (0x29-0x31) =====
    NewTuple = 0x29, // R[A] = (R[C] .. R[C+B])
    NewArray,        // R[A] = 类型 Bx 的数组
    Append,          // R[A].push(R[B])
    NewMap,
    NewStruct, // 字段取零值
    NewSum,
    SumInit,    // R[A].tag = B, payload = R[C]（C == NO_REG 时无载荷）
    SumTag,     // R[A] = R[B].tag
    SumPayload, // R[A] = R[B].payload

    // ===== 访问 (0x32-0x35) =====
    GetField = 0x32, // R[A] = R[B].fields[C]
    SetField,        // R[A].fields[B] = R[C]
    GetIndex,        // R[A] = R[B][R[C]]
    SetIndex,        // R[A][R[B]] = R[C]

    // ===== 类型与杂项 (0x36-0x3C) =====
    Cast = 0x36, // R[A] = R[A] as Bx
    Is,          // R[A] = type_of(R[A]) == Bx
    Copy,        // R[A] = 深拷贝(R[B])
    ToString,
    Len,
    MapEntry, // R[A], R[A+1] = R[B].entries[R[C]]
    Propset,  // R[A] = 属性集(Bx, R[A])
}

/// 操作数的含义，供反汇编与校验使用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Unused,
    Reg,
    /// 寄存器下界，允许等于寄存器数
    RegBase,
    /// 寄存器或 `NO_REG`
    OptReg,
    Imm,
    Const,
    Global,
    Func,
    External,
    Native,
    Type,
    Upval,
    Jump,
}

/// 指令格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Abc(Operand, Operand, Operand),
    ABx(Operand, Operand),
    AsBx(Operand, Operand),
    None,
}

pub const OPCODE_COUNT: usize = OpCode::Propset as usize + 1;

const ALL_OPCODES: [OpCode; OPCODE_COUNT] = [
    OpCode::Move,
    OpCode::LoadI,
    OpCode::LoadB,
    OpCode::LoadK,
    OpCode::LoadNil,
    OpCode::GetGlobal,
    OpCode::SetGlobal,
    OpCode::Add,
    OpCode::Sub,
    OpCode::Mul,
    OpCode::Div,
    OpCode::Mod,
    OpCode::Neg,
    OpCode::Not,
    OpCode::BNot,
    OpCode::BAnd,
    OpCode::BOr,
    OpCode::BXor,
    OpCode::Shl,
    OpCode::Shr,
    OpCode::Eq,
    OpCode::Lt,
    OpCode::Le,
    OpCode::IsEq,
    OpCode::IsLt,
    OpCode::IsLe,
    OpCode::Jmp,
    OpCode::JmpF,
    OpCode::JmpT,
    OpCode::Call,
    OpCode::CallExt,
    OpCode::TailCall,
    OpCode::CallClosure,
    OpCode::NativeCall,
    OpCode::Ret,
    OpCode::RetVoid,
    OpCode::Closure,
    OpCode::ExtFunc,
    OpCode::GetUpval,
    OpCode::SetUpval,
    OpCode::CloseUpvals,
    OpCode::NewTuple,
    OpCode::NewArray,
    OpCode::Append,
    OpCode::NewMap,
    OpCode::NewStruct,
    OpCode::NewSum,
    OpCode::SumInit,
    OpCode::SumTag,
    OpCode::SumPayload,
    OpCode::GetField,
    OpCode::SetField,
    OpCode::GetIndex,
    OpCode::SetIndex,
    OpCode::Cast,
    OpCode::Is,
    OpCode::Copy,
    OpCode::ToString,
    OpCode::Len,
    OpCode::MapEntry,
    OpCode::Propset,
];

impl OpCode {
    /// 获取操作码名称
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Move => "MOVE",
            OpCode::LoadI => "LOADI",
            OpCode::LoadB => "LOADB",
            OpCode::LoadK => "LOADK",
            OpCode::LoadNil => "LOADNIL",
            OpCode::GetGlobal => "GETGLOBAL",
            OpCode::SetGlobal => "SETGLOBAL",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Mod => "MOD",
            OpCode::Neg => "NEG",
            OpCode::Not => "NOT",
            OpCode::BNot => "BNOT",
            OpCode::BAnd => "BAND",
            OpCode::BOr => "BOR",
            OpCode::BXor => "BXOR",
            OpCode::Shl => "SHL",
            OpCode::Shr => "SHR",
            OpCode::Eq => "EQ",
            OpCode::Lt => "LT",
            OpCode::Le => "LE",
            OpCode::IsEq => "ISEQ",
            OpCode::IsLt => "ISLT",
            OpCode::IsLe => "ISLE",
            OpCode::Jmp => "JMP",
            OpCode::JmpF => "JMPF",
            OpCode::JmpT => "JMPT",
            OpCode::Call => "CALL",
            OpCode::CallExt => "CALLEXT",
            OpCode::TailCall => "TAILCALL",
            OpCode::CallClosure => "CALLCLOSURE",
            OpCode::NativeCall => "NATIVECALL",
            OpCode::Ret => "RET",
            OpCode::RetVoid => "RETVOID",
            OpCode::Closure => "CLOSURE",
            OpCode::ExtFunc => "EXTFUNC",
            OpCode::GetUpval => "GETUPVAL",
            OpCode::SetUpval => "SETUPVAL",
            OpCode::CloseUpvals => "CLOSEUPVALS",
            OpCode::NewTuple => "NEWTUPLE",
            OpCode::NewArray => "NEWARRAY",
            OpCode::Append => "APPEND",
            OpCode::NewMap => "NEWMAP",
            OpCode::NewStruct => "NEWSTRUCT",
            OpCode::NewSum => "NEWSUM",
            OpCode::SumInit => "SUMINIT",
            OpCode::SumTag => "SUMTAG",
            OpCode::SumPayload => "SUMPAYLOAD",
            OpCode::GetField => "GETFIELD",
            OpCode::SetField => "SETFIELD",
            OpCode::GetIndex => "GETINDEX",
            OpCode::SetIndex => "SETINDEX",
            OpCode::Cast => "CAST",
            OpCode::Is => "IS",
            OpCode::Copy => "COPY",
            OpCode::ToString => "TOSTRING",
            OpCode::Len => "LEN",
            OpCode::MapEntry => "MAPENTRY",
            OpCode::Propset => "PROPSET",
        }
    }

    /// 操作数布局
    pub fn format(&self) -> Format {
        use Operand::*;
        match self {
            OpCode::Move | OpCode::Neg | OpCode::Not | OpCode::BNot => Format::Abc(Reg, Reg, Unused),
            OpCode::Copy | OpCode::ToString | OpCode::Len => Format::Abc(Reg, Reg, Unused),
            OpCode::SumTag | OpCode::SumPayload | OpCode::Append => Format::Abc(Reg, Reg, Unused),
            OpCode::LoadI => Format::AsBx(Reg, Imm),
            OpCode::LoadB => Format::Abc(Reg, Imm, Unused),
            OpCode::LoadK => Format::ABx(Reg, Const),
            OpCode::LoadNil
            | OpCode::NewArray
            | OpCode::NewMap
            | OpCode::NewStruct
            | OpCode::NewSum
            | OpCode::Cast
            | OpCode::Is
            | OpCode::Propset => Format::ABx(Reg, Type),
            OpCode::GetGlobal | OpCode::SetGlobal => Format::ABx(Reg, Global),
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::BAnd
            | OpCode::BOr
            | OpCode::BXor
            | OpCode::Shl
            | OpCode::Shr
            | OpCode::Eq
            | OpCode::Lt
            | OpCode::Le
            | OpCode::GetIndex
            | OpCode::SetIndex
            | OpCode::MapEntry => Format::Abc(Reg, Reg, Reg),
            OpCode::IsEq | OpCode::IsLt | OpCode::IsLe => Format::Abc(Reg, Reg, Imm),
            OpCode::Jmp => Format::AsBx(Unused, Jump),
            OpCode::JmpF | OpCode::JmpT => Format::AsBx(Reg, Jump),
            OpCode::Call | OpCode::TailCall | OpCode::Closure => Format::ABx(Reg, Func),
            OpCode::CallExt | OpCode::ExtFunc => Format::ABx(Reg, External),
            OpCode::CallClosure => Format::Abc(Reg, Reg, Imm),
            OpCode::NativeCall => Format::Abc(Reg, Native, Imm),
            OpCode::Ret => Format::Abc(Reg, Unused, Unused),
            OpCode::RetVoid => Format::None,
            OpCode::GetUpval | OpCode::SetUpval => Format::Abc(Reg, Upval, Unused),
            OpCode::CloseUpvals => Format::Abc(RegBase, Unused, Unused),
            OpCode::NewTuple => Format::Abc(Reg, Imm, RegBase),
            OpCode::SumInit => Format::Abc(Reg, Imm, OptReg),
            OpCode::GetField => Format::Abc(Reg, Reg, Imm),
            OpCode::SetField => Format::Abc(Reg, Imm, Reg),
        }
    }

    /// 执行后不会落到下一条指令
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            OpCode::Ret | OpCode::RetVoid | OpCode::TailCall | OpCode::Jmp
        )
    }

    /// 可能分配堆对象，之后是 GC 安全点
    pub fn allocates(&self) -> bool {
        matches!(
            self,
            OpCode::Add
                | OpCode::Closure
                | OpCode::ExtFunc
                | OpCode::NewTuple
                | OpCode::NewArray
                | OpCode::Append
                | OpCode::NewMap
                | OpCode::NewStruct
                | OpCode::NewSum
                | OpCode::SetIndex
                | OpCode::Cast
                | OpCode::Copy
                | OpCode::ToString
                | OpCode::Propset
                | OpCode::LoadNil
        )
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ALL_OPCODES.get(value as usize).copied().ok_or(value)
    }
}

// ==================== 指令编码 ====================

pub const MAX_A: u32 = 0xFF;
pub const MAX_B: u32 = 0x1FF;
pub const MAX_C: u32 = 0x1FF;
pub const MAX_BX: u32 = (1 << 18) - 1;
pub const MAX_SBX: i32 = (1 << 17) - 1;
pub const MIN_SBX: i32 = -(1 << 17);
/// `SUMINIT` 无载荷
pub const NO_REG: u32 = MAX_C;

pub fn encode_abc(op: OpCode, a: u32, b: u32, c: u32) -> u32 {
    debug_assert!(a <= MAX_A && b <= MAX_B && c <= MAX_C);
    ((op as u32) << 26) | ((a & MAX_A) << 18) | ((b & MAX_B) << 9) | (c & MAX_C)
}

pub fn encode_abx(op: OpCode, a: u32, bx: u32) -> u32 {
    debug_assert!(a <= MAX_A && bx <= MAX_BX);
    ((op as u32) << 26) | ((a & MAX_A) << 18) | (bx & MAX_BX)
}

pub fn encode_asbx(op: OpCode, a: u32, sbx: i32) -> u32 {
    debug_assert!((MIN_SBX..=MAX_SBX).contains(&sbx));
    encode_abx(op, a, (sbx as u32) & MAX_BX)
}

pub fn decode_op(word: u32) -> Result<OpCode, u8> {
    OpCode::try_from((word >> 26) as u8)
}

#[inline]
pub fn arg_a(word: u32) -> u32 {
    (word >> 18) & MAX_A
}

#[inline]
pub fn arg_b(word: u32) -> u32 {
    (word >> 9) & MAX_B
}

#[inline]
pub fn arg_c(word: u32) -> u32 {
    word & MAX_C
}

#[inline]
pub fn arg_bx(word: u32) -> u32 {
    word & MAX_BX
}

/// 18 位补码符号扩展
#[inline]
pub fn arg_sbx(word: u32) -> i32 {
    ((arg_bx(word) << 14) as i32) >> 14
}

/// 单条指令的文本形式，如 `ADD 2 0 1`
pub fn format_instruction(word: u32) -> String {
    let op = match decode_op(word) {
        Ok(op) => op,
        Err(raw) => return format!("<invalid opcode 0x{:02x}>", raw),
    };
    match op.format() {
        Format::Abc(_, b, c) => {
            let mut s = format!("{:<12}{}", op.name(), arg_a(word));
            if b != Operand::Unused {
                s.push_str(&format!(" {}", arg_b(word)));
            }
            if c != Operand::Unused {
                s.push_str(&format!(" {}", arg_c(word)));
            }
            s
        }
        Format::ABx(_, _) => format!("{:<12}{} {}", op.name(), arg_a(word), arg_bx(word)),
        Format::AsBx(Operand::Unused, _) => format!("{:<12}{}", op.name(), arg_sbx(word)),
        Format::AsBx(_, _) => format!("{:<12}{} {}", op.name(), arg_a(word), arg_sbx(word)),
        Format::None => op.name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_name() {
        assert_eq!(OpCode::Add.name(), "ADD");
        assert_eq!(OpCode::LoadK.name(), "LOADK");
        assert_eq!(OpCode::RetVoid.name(), "RETVOID");
    }

    #[test]
    fn test_from_u8() {
        assert_eq!(OpCode::try_from(0x07), Ok(OpCode::Add));
        assert_eq!(OpCode::try_from(0x00), Ok(OpCode::Move));
        assert_eq!(OpCode::try_from(OpCode::Propset as u8), Ok(OpCode::Propset));
        assert_eq!(OpCode::try_from(0x3F), Err(0x3F));
    }

    #[test]
    fn test_table_matches_discriminants() {
        for (i, op) in ALL_OPCODES.iter().enumerate() {
            assert_eq!(*op as usize, i, "{}", op.name());
        }
    }

    #[test]
    fn test_field_extraction() {
        let w = encode_abc(OpCode::Add, 200, 511, 7);
        assert_eq!(decode_op(w), Ok(OpCode::Add));
        assert_eq!(arg_a(w), 200);
        assert_eq!(arg_b(w), 511);
        assert_eq!(arg_c(w), 7);

        let w = encode_abx(OpCode::LoadK, 3, MAX_BX);
        assert_eq!(arg_a(w), 3);
        assert_eq!(arg_bx(w), MAX_BX);
    }

    #[test]
    fn test_signed_offsets() {
        for v in [0, 1, -1, MAX_SBX, MIN_SBX, -1234] {
            let w = encode_asbx(OpCode::Jmp, 0, v);
            assert_eq!(arg_sbx(w), v);
        }
    }

    #[test]
    fn test_format_instruction() {
        assert_eq!(format_instruction(encode_abc(OpCode::Add, 2, 0, 1)), "ADD         2 0 1");
        assert_eq!(format_instruction(encode_asbx(OpCode::Jmp, 0, -3)), "JMP         -3");
        assert_eq!(format_instruction(encode_abc(OpCode::RetVoid, 0, 0, 0)), "RETVOID");
    }
}
