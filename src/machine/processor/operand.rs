//! 操作数解析
//!
//! 操作数在解析时就完成取下一字与栈指针调整, 之后的读写只是
//! 对解析结果的访问, 不会再次修改 pc 或 sp。

use hw_trait::{ProcessorState, Register, WordMemory};

/// 一次指令执行中的操作数句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(Register),
    /// 内存单元 (直接、寄存器间接、偏移、下一字地址)
    Memory(u16),
    /// PUSH, 地址为递减后的 sp
    Push(u16),
    /// POP, 地址为递增前的 sp
    Pop(u16),
    /// [SP]
    Peek(u16),
    Sp,
    Pc,
    Ex,
    /// 内联或下一字字面量, 写入被忽略
    Literal(u16),
}

/// 取 pc 处的下一字并推进 pc
#[inline(always)]
pub fn next_word(state: &mut ProcessorState, memory: &dyn WordMemory) -> u16 {
    let word = memory.read_word(state.pc);
    state.pc = state.pc.wrapping_add(1);
    word
}

/// 按 6 位操作数编码解析
///
/// `is_a` 区分 0x18 的 POP (a) 与 PUSH (b)。b 操作数只有 5 位,
/// 不会出现内联字面量编码。
pub fn resolve(
    code: u16,
    is_a: bool,
    state: &mut ProcessorState,
    memory: &dyn WordMemory,
) -> Operand {
    match code {
        0x00..=0x07 => Operand::Register(Register::from_index(code)),
        0x08..=0x0f => Operand::Memory(state.read_register(Register::from_index(code))),
        0x10..=0x17 => {
            let offset = next_word(state, memory);
            Operand::Memory(
                state
                    .read_register(Register::from_index(code))
                    .wrapping_add(offset),
            )
        }
        0x18 if is_a => {
            let addr = state.sp;
            state.sp = state.sp.wrapping_add(1);
            Operand::Pop(addr)
        }
        0x18 => {
            state.sp = state.sp.wrapping_sub(1);
            Operand::Push(state.sp)
        }
        0x19 => Operand::Peek(state.sp),
        0x1a => {
            let offset = next_word(state, memory);
            Operand::Memory(state.sp.wrapping_add(offset))
        }
        0x1b => Operand::Sp,
        0x1c => Operand::Pc,
        0x1d => Operand::Ex,
        0x1e => Operand::Memory(next_word(state, memory)),
        0x1f => Operand::Literal(next_word(state, memory)),
        // 0x20..=0x3f: -1..=30
        _ => Operand::Literal((code & 0x3f).wrapping_sub(0x21)),
    }
}

/// 操作数消耗的下一字个数, 跳过指令时用于推进 pc
#[inline(always)]
pub fn operand_length(code: u16) -> u16 {
    match code {
        0x10..=0x17 | 0x1a | 0x1e | 0x1f => 1,
        _ => 0,
    }
}

#[inline(always)]
pub fn read(operand: Operand, state: &ProcessorState, memory: &dyn WordMemory) -> u16 {
    match operand {
        Operand::Register(reg) => state.read_register(reg),
        Operand::Memory(addr) | Operand::Push(addr) | Operand::Pop(addr) | Operand::Peek(addr) => {
            memory.read_word(addr)
        }
        Operand::Sp => state.sp,
        Operand::Pc => state.pc,
        Operand::Ex => state.ex,
        Operand::Literal(value) => value,
    }
}

#[inline(always)]
pub fn write(operand: Operand, value: u16, state: &mut ProcessorState, memory: &dyn WordMemory) {
    match operand {
        Operand::Register(reg) => state.write_register(reg, value),
        Operand::Memory(addr) | Operand::Push(addr) | Operand::Pop(addr) | Operand::Peek(addr) => {
            memory.write_word(addr, value)
        }
        Operand::Sp => state.sp = value,
        Operand::Pc => state.pc = value,
        Operand::Ex => state.ex = value,
        Operand::Literal(_) => {}
    }
}
