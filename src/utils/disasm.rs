//! 单条指令反汇编

use hw_trait::Register;

use crate::machine::processor::instructions::{find_basic, find_special, split_word};

/// 反汇编结果: 文本与指令占用的全部字
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disassembly {
    pub text: String,
    pub words: Vec<u16>,
}

impl Disassembly {
    pub fn len(&self) -> u16 {
        self.words.len() as u16
    }
}

struct Cursor<F> {
    fetch: F,
    next: u16,
    words: Vec<u16>,
}

impl<F: Fn(u16) -> u16> Cursor<F> {
    fn next_word(&mut self) -> u16 {
        let word = (self.fetch)(self.next);
        self.next = self.next.wrapping_add(1);
        self.words.push(word);
        word
    }

    fn operand(&mut self, code: u16, is_a: bool) -> String {
        match code {
            0x00..=0x07 => Register::from_index(code).to_string(),
            0x08..=0x0f => format!("[{}]", Register::from_index(code)),
            0x10..=0x17 => {
                let offset = self.next_word();
                format!("[{}+{:#06x}]", Register::from_index(code), offset)
            }
            0x18 if is_a => "POP".to_string(),
            0x18 => "PUSH".to_string(),
            0x19 => "PEEK".to_string(),
            0x1a => format!("PICK {:#06x}", self.next_word()),
            0x1b => "SP".to_string(),
            0x1c => "PC".to_string(),
            0x1d => "EX".to_string(),
            0x1e => format!("[{:#06x}]", self.next_word()),
            0x1f => format!("{:#06x}", self.next_word()),
            _ => format!("{:#06x}", (code & 0x3f).wrapping_sub(0x21)),
        }
    }
}

/// 反汇编 `pc` 处的一条指令, `fetch` 按地址取字
///
/// 未定义的编码输出为 `DAT 0x....`, 只占一个字。
pub fn disassemble(fetch: impl Fn(u16) -> u16, pc: u16) -> Disassembly {
    let word = fetch(pc);
    let mut cursor = Cursor {
        fetch,
        next: pc.wrapping_add(1),
        words: vec![word],
    };
    let (opcode, b, a) = split_word(word);

    let text = if opcode == 0 {
        match find_special(b) {
            Some(inst) => {
                let a = cursor.operand(a, true);
                format!("{} {}", inst.name, a)
            }
            None => format!("DAT {:#06x}", word),
        }
    } else {
        match find_basic(opcode) {
            // a 的下一字在 b 之前
            Some(inst) => {
                let a = cursor.operand(a, true);
                let b = cursor.operand(b, false);
                format!("{} {}, {}", inst.name, b, a)
            }
            None => format!("DAT {:#06x}", word),
        }
    };

    Disassembly {
        text,
        words: cursor.words,
    }
}
