//! 指令表
//!
//! 普通指令按 5 位操作码索引, 操作码 0 表示特殊指令,
//! 此时由 b 字段在第二张表中选择真正的操作。

use hw_trait::Register;

use super::Processor;
use super::operand::Operand;
use crate::machine::exception::ProcessorError;

pub const MASK_OPCODE: u16 = 0x1f;
pub const SHIFT_B: u16 = 5;
pub const MASK_B: u16 = 0x1f;
pub const SHIFT_A: u16 = 10;
pub const MASK_A: u16 = 0x3f;

/// 拆出 (opcode, b, a) 三个字段
#[inline(always)]
pub fn split_word(word: u16) -> (u16, u16, u16) {
    (
        word & MASK_OPCODE,
        (word >> SHIFT_B) & MASK_B,
        (word >> SHIFT_A) & MASK_A,
    )
}

#[derive(Debug, Clone, Copy)]
pub struct BasicInstruction {
    pub opcode: u16,
    pub name: &'static str,
    /// 条件指令失败时置跳过标志, 被跳过时也会延续跳过链
    pub conditional: bool,
    pub execute: fn(cpu: &mut Processor, b: Operand, a: Operand) -> Result<(), ProcessorError>,
}

#[derive(Debug, Clone, Copy)]
pub struct SpecialInstruction {
    pub opcode: u16,
    pub name: &'static str,
    pub execute: fn(cpu: &mut Processor, a: Operand) -> Result<(), ProcessorError>,
}

#[derive(Debug, Clone, Copy)]
pub enum Decoded {
    Basic(&'static BasicInstruction),
    Special(&'static SpecialInstruction),
}

impl Decoded {
    pub fn name(&self) -> &'static str {
        match self {
            Decoded::Basic(inst) => inst.name,
            Decoded::Special(inst) => inst.name,
        }
    }
}

#[inline(always)]
fn signed(value: u16) -> i32 {
    value as i16 as i32
}

pub const BASIC: &[BasicInstruction] = &[
    BasicInstruction {
        opcode: 0x01,
        name: "SET",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let value = cpu.read(a);
            cpu.write(b, value);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x02,
        name: "ADD",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let res = cpu.read(b) as u32 + cpu.read(a) as u32;
            cpu.write(b, res as u16);
            cpu.state.ex = if res > 0xffff { 0x0001 } else { 0 };
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x03,
        name: "SUB",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let res = cpu.read(b) as i32 - cpu.read(a) as i32;
            cpu.write(b, res as u16);
            cpu.state.ex = if res < 0 { 0xffff } else { 0 };
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x04,
        name: "MUL",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let res = cpu.read(b) as u32 * cpu.read(a) as u32;
            cpu.write(b, res as u16);
            cpu.state.ex = (res >> 16) as u16;
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x05,
        name: "MLI",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let res = signed(cpu.read(b)) * signed(cpu.read(a));
            cpu.write(b, res as u16);
            cpu.state.ex = (res >> 16) as u16;
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x06,
        name: "DIV",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let rhs = cpu.read(a) as u32;
            let lhs = cpu.read(b) as u32;
            if rhs == 0 {
                cpu.write(b, 0);
                cpu.state.ex = 0;
            } else {
                cpu.write(b, (lhs / rhs) as u16);
                cpu.state.ex = ((lhs << 16) / rhs) as u16;
            }
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x07,
        name: "DVI",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let rhs = signed(cpu.read(a));
            let lhs = signed(cpu.read(b));
            if rhs == 0 {
                cpu.write(b, 0);
                cpu.state.ex = 0;
            } else {
                // 向 0 取整
                cpu.write(b, (lhs / rhs) as u16);
                cpu.state.ex = (lhs << 16).wrapping_div(rhs) as u16;
            }
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x08,
        name: "MOD",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let rhs = cpu.read(a);
            let lhs = cpu.read(b);
            cpu.write(b, lhs.checked_rem(rhs).unwrap_or(0));
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x09,
        name: "MDI",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let rhs = signed(cpu.read(a));
            let lhs = signed(cpu.read(b));
            // 余数符号与被除数一致: MDI -7, 16 == -7
            let res = if rhs == 0 { 0 } else { lhs % rhs };
            cpu.write(b, res as u16);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x0a,
        name: "AND",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let res = cpu.read(b) & cpu.read(a);
            cpu.write(b, res);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x0b,
        name: "BOR",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let res = cpu.read(b) | cpu.read(a);
            cpu.write(b, res);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x0c,
        name: "XOR",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let res = cpu.read(b) ^ cpu.read(a);
            cpu.write(b, res);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x0d,
        name: "SHR",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let shamt = cpu.read(a) as u32;
            let lhs = cpu.read(b) as u32;
            cpu.write(b, lhs.checked_shr(shamt).unwrap_or(0) as u16);
            cpu.state.ex = (lhs << 16).checked_shr(shamt).unwrap_or(0) as u16;
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x0e,
        name: "ASR",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            // 移位量超过 31 时结果只剩符号位
            let shamt = (cpu.read(a) as u32).min(31);
            let lhs = signed(cpu.read(b));
            cpu.write(b, (lhs >> shamt) as u16);
            cpu.state.ex = ((lhs << 16) >> shamt) as u16;
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x0f,
        name: "SHL",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let shamt = cpu.read(a) as u32;
            let res = (cpu.read(b) as u64).checked_shl(shamt).unwrap_or(0);
            cpu.write(b, res as u16);
            cpu.state.ex = (res >> 16) as u16;
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x10,
        name: "IFB",
        conditional: true,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let cond = cpu.read(b) & cpu.read(a) != 0;
            cpu.skip_unless(cond);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x11,
        name: "IFC",
        conditional: true,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let cond = cpu.read(b) & cpu.read(a) == 0;
            cpu.skip_unless(cond);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x12,
        name: "IFE",
        conditional: true,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let cond = cpu.read(b) == cpu.read(a);
            cpu.skip_unless(cond);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x13,
        name: "IFN",
        conditional: true,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let cond = cpu.read(b) != cpu.read(a);
            cpu.skip_unless(cond);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x14,
        name: "IFG",
        conditional: true,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let cond = cpu.read(b) > cpu.read(a);
            cpu.skip_unless(cond);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x15,
        name: "IFA",
        conditional: true,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let cond = signed(cpu.read(b)) > signed(cpu.read(a));
            cpu.skip_unless(cond);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x16,
        name: "IFL",
        conditional: true,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let cond = cpu.read(b) < cpu.read(a);
            cpu.skip_unless(cond);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x17,
        name: "IFU",
        conditional: true,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let cond = signed(cpu.read(b)) < signed(cpu.read(a));
            cpu.skip_unless(cond);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x1a,
        name: "ADX",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let res = cpu.read(b) as u32 + cpu.read(a) as u32 + cpu.state.ex as u32;
            cpu.write(b, res as u16);
            cpu.state.ex = if res > 0xffff { 0x0001 } else { 0 };
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x1b,
        name: "SBX",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            // 按有符号 16 位计数: 减法后越界记 -1, 加 EX 后越界记 +1
            let mut overflow = 0i8;
            let mut res = signed(cpu.read(b)) - signed(cpu.read(a));
            if i16::try_from(res).is_err() {
                overflow -= 1;
            }
            res += signed(cpu.state.ex);
            if i16::try_from(res).is_err() {
                overflow += 1;
            }
            cpu.write(b, res as u16);
            cpu.state.ex = match overflow {
                o if o < 0 => 0xffff,
                o if o > 0 => 0x0001,
                _ => 0,
            };
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x1e,
        name: "STI",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let value = cpu.read(a);
            cpu.write(b, value);
            cpu.state.inc_register(Register::I);
            cpu.state.inc_register(Register::J);
            Ok(())
        },
    },
    BasicInstruction {
        opcode: 0x1f,
        name: "STD",
        conditional: false,
        execute: |cpu: &mut Processor, b: Operand, a: Operand| {
            let value = cpu.read(a);
            cpu.write(b, value);
            cpu.state.dec_register(Register::I);
            cpu.state.dec_register(Register::J);
            Ok(())
        },
    },
];

pub const SPECIAL: &[SpecialInstruction] = &[
    SpecialInstruction {
        opcode: 0x01,
        name: "JSR",
        execute: |cpu: &mut Processor, a: Operand| {
            let target = cpu.read(a);
            let ret = cpu.state.pc;
            cpu.push_word(ret);
            cpu.state.pc = target;
            Ok(())
        },
    },
    SpecialInstruction {
        opcode: 0x08,
        name: "INT",
        execute: |cpu: &mut Processor, a: Operand| {
            let message = cpu.read(a);
            if cpu.queue_forced && cpu.interrupts_queuing {
                cpu.queue.push(message)?;
            } else {
                cpu.deliver_interrupt(message);
            }
            Ok(())
        },
    },
    SpecialInstruction {
        opcode: 0x09,
        name: "IAG",
        execute: |cpu: &mut Processor, a: Operand| {
            let ia = cpu.state.ia;
            cpu.write(a, ia);
            Ok(())
        },
    },
    SpecialInstruction {
        opcode: 0x0a,
        name: "IAS",
        execute: |cpu: &mut Processor, a: Operand| {
            cpu.state.ia = cpu.read(a);
            Ok(())
        },
    },
    SpecialInstruction {
        opcode: 0x0b,
        name: "RFI",
        execute: |cpu: &mut Processor, _a: Operand| {
            cpu.interrupts_queuing = false;
            let saved_a = cpu.pop_word();
            cpu.state.write_register(Register::A, saved_a);
            cpu.state.pc = cpu.pop_word();
            Ok(())
        },
    },
    SpecialInstruction {
        opcode: 0x0c,
        name: "IAQ",
        execute: |cpu: &mut Processor, a: Operand| {
            cpu.queue_forced = cpu.read(a) != 0;
            Ok(())
        },
    },
    SpecialInstruction {
        opcode: 0x10,
        name: "HWN",
        execute: |cpu: &mut Processor, a: Operand| {
            let count = cpu.hardware.count_word();
            cpu.write(a, count);
            Ok(())
        },
    },
    SpecialInstruction {
        opcode: 0x11,
        name: "HWQ",
        execute: |cpu: &mut Processor, a: Operand| {
            let index = cpu.read(a);
            let info = cpu.hardware.device(index)?.info();
            let state = &mut cpu.state;
            state.write_register(Register::A, info.id as u16);
            state.write_register(Register::B, (info.id >> 16) as u16);
            state.write_register(Register::C, info.version);
            state.write_register(Register::X, info.manufacturer as u16);
            state.write_register(Register::Y, (info.manufacturer >> 16) as u16);
            Ok(())
        },
    },
    SpecialInstruction {
        opcode: 0x12,
        name: "HWI",
        execute: |cpu: &mut Processor, a: Operand| {
            let index = cpu.read(a);
            let device = cpu.hardware.device_mut(index)?;
            tracing::trace!("HWI -> 设备 {} ({})", index, device.name());
            device.interrupt(&mut cpu.state);
            Ok(())
        },
    },
];

pub fn find_basic(opcode: u16) -> Option<&'static BasicInstruction> {
    BASIC.iter().find(|inst| inst.opcode == opcode)
}

pub fn find_special(opcode: u16) -> Option<&'static SpecialInstruction> {
    SPECIAL.iter().find(|inst| inst.opcode == opcode)
}

/// 按操作码直接索引的译码器
pub struct InstDecoder {
    basic: [Option<&'static BasicInstruction>; 32],
    special: [Option<&'static SpecialInstruction>; 32],
}

impl InstDecoder {
    pub fn new() -> Self {
        let mut basic = [None; 32];
        let mut special = [None; 32];
        for inst in BASIC {
            basic[inst.opcode as usize] = Some(inst);
        }
        for inst in SPECIAL {
            special[inst.opcode as usize] = Some(inst);
        }
        Self { basic, special }
    }

    /// 查表, 未定义的编码返回 `None`
    #[inline(always)]
    pub fn lookup(&self, word: u16) -> Option<Decoded> {
        let (opcode, b, _) = split_word(word);
        if opcode == 0 {
            self.special[b as usize].map(Decoded::Special)
        } else {
            self.basic[opcode as usize].map(Decoded::Basic)
        }
    }

    #[inline(always)]
    pub fn decode(&self, word: u16, pc: u16) -> Result<Decoded, ProcessorError> {
        self.lookup(word).ok_or_else(|| {
            let (opcode, b, _) = split_word(word);
            if opcode == 0 {
                ProcessorError::UnsupportedSpecialOperation {
                    opcode: b,
                    word,
                    pc,
                }
            } else {
                ProcessorError::UnsupportedOperation { opcode, word, pc }
            }
        })
    }
}

impl Default for InstDecoder {
    fn default() -> Self {
        Self::new()
    }
}
