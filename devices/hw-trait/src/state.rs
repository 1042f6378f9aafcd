//! CPU状态

use std::fmt;

/// 8 个通用寄存器, 顺序即操作数编码顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    A = 0,
    B = 1,
    C = 2,
    X = 3,
    Y = 4,
    Z = 5,
    I = 6,
    J = 7,
}

impl Register {
    pub const ALL: [Register; 8] = [
        Register::A,
        Register::B,
        Register::C,
        Register::X,
        Register::Y,
        Register::Z,
        Register::I,
        Register::J,
    ];

    /// 按编码取寄存器, 只看低 3 位
    #[inline(always)]
    pub fn from_index(index: u16) -> Register {
        Self::ALL[(index & 0x7) as usize]
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::A => "A",
            Register::B => "B",
            Register::C => "C",
            Register::X => "X",
            Register::Y => "Y",
            Register::Z => "Z",
            Register::I => "I",
            Register::J => "J",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// CPU状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorState {
    // 通用寄存器
    pub registers: [u16; 8],
    // 程序计数器
    pub pc: u16,
    // 栈指针
    pub sp: u16,
    // 溢出/额外寄存器
    pub ex: u16,
    // 中断地址, 0 表示关闭中断
    pub ia: u16,
    // 条件失败后的跳过标志
    pub skipping: bool,
}

impl ProcessorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部清零
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline(always)]
    pub fn read_register(&self, reg: Register) -> u16 {
        self.registers[reg.index()]
    }

    #[inline(always)]
    pub fn write_register(&mut self, reg: Register, value: u16) {
        self.registers[reg.index()] = value;
    }

    #[inline(always)]
    pub fn inc_register(&mut self, reg: Register) {
        let value = self.read_register(reg).wrapping_add(1);
        self.write_register(reg, value);
    }

    #[inline(always)]
    pub fn dec_register(&mut self, reg: Register) {
        let value = self.read_register(reg).wrapping_sub(1);
        self.write_register(reg, value);
    }
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== CPU State ===")?;
        writeln!(
            f,
            "PC: {:04x}  SP: {:04x}  IA: {:04x}  EX: {:04x}{}",
            self.pc,
            self.sp,
            self.ia,
            self.ex,
            if self.skipping { "  (skipping)" } else { "" }
        )?;
        for row in Register::ALL.chunks(3) {
            let line: Vec<String> = row
                .iter()
                .map(|&reg| format!("{}: {:04x}", reg, self.read_register(reg)))
                .collect();
            writeln!(f, "{}", line.join("  "))?;
        }
        Ok(())
    }
}
