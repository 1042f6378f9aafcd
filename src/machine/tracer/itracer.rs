use std::collections::VecDeque;

use super::TracerTrace;
use crate::machine::processor::Processor;
use crate::utils::disassemble;

/// 一条已执行的指令
#[derive(Debug, Clone, PartialEq, Eq)]
struct Instruction {
    pc: u16,
    words: Vec<u16>,
    text: String,
}

/// 指令追踪器, 只保留最近的若干条
pub struct ITracer {
    instructions: VecDeque<Instruction>,
    capacity: usize,
}

impl ITracer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ITracer {
            instructions: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push_overwrite(&mut self, inst: Instruction) {
        if self.instructions.len() == self.capacity {
            self.instructions.pop_front();
        }
        self.instructions.push_back(inst);
    }
}

impl TracerTrace for ITracer {
    fn name(&self) -> &'static str {
        "ITracer"
    }

    fn trace(&mut self, cpu: &Processor) {
        let pc = cpu.last_pc();
        let memory = cpu.memory();
        let disasm = disassemble(|addr| memory.read_word(addr), pc);
        self.push_overwrite(Instruction {
            pc,
            words: disasm.words,
            text: disasm.text,
        });
    }

    fn get_instructions_log(&self) -> String {
        let mut log = String::new();
        for inst in &self.instructions {
            let words: Vec<String> = inst.words.iter().map(|w| format!("{:04x}", w)).collect();
            log += &format!("{:04x}: {}  {}\n", inst.pc, words.join(" "), inst.text);
        }
        log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pc: u16) -> Instruction {
        Instruction {
            pc,
            words: vec![0x8781],
            text: "SET PC, 0x0000".to_string(),
        }
    }

    #[test]
    fn test_keeps_latest_entries() {
        let mut tracer = ITracer::new(2);
        tracer.push_overwrite(entry(1));
        tracer.push_overwrite(entry(2));
        tracer.push_overwrite(entry(3));
        let log = tracer.get_instructions_log();
        assert_eq!(log, "0002: 8781  SET PC, 0x0000\n0003: 8781  SET PC, 0x0000\n");
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut tracer = ITracer::new(0);
        tracer.push_overwrite(entry(1));
        tracer.push_overwrite(entry(2));
        assert_eq!(tracer.instructions.len(), 1);
    }
}
