//! 处理器核心: 取指、译码、执行与中断投递

pub mod instructions;
pub mod operand;

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hw_trait::{InterruptionBus, MemoryBus, ProcessorState, Register, WordMemory};

use self::instructions::{Decoded, InstDecoder, split_word};
use self::operand::Operand;
use super::exception::ProcessorError;
use super::hardware::HardwareBus;
use super::interrupt::{InterruptError, InterruptQueue};
use super::memory::Memory;

/// 每个周期结束后被调用的观察者
///
/// 返回 `ControlFlow::Break(())` 请求处理器在下一次取指前停止。
pub trait Observer: Send {
    fn on_cycle(&mut self, cpu: &Processor) -> ControlFlow<()>;
}

impl<F> Observer for F
where
    F: FnMut(&Processor) -> ControlFlow<()> + Send,
{
    fn on_cycle(&mut self, cpu: &Processor) -> ControlFlow<()> {
        self(cpu)
    }
}

/// 协作式停止标志, 可跨线程克隆
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 执行满 `limit` 个周期后请求停止
#[derive(Debug, Clone, Copy)]
pub struct CycleLimit {
    limit: u64,
}

impl CycleLimit {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }
}

impl Observer for CycleLimit {
    fn on_cycle(&mut self, cpu: &Processor) -> ControlFlow<()> {
        if cpu.cycles() >= self.limit {
            tracing::info!("已达到周期上限 {}", self.limit);
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

pub struct Processor {
    state: ProcessorState,
    /// 处于中断处理程序中, 硬件中断只入队不投递
    interrupts_queuing: bool,
    /// IAQ 强制排队
    queue_forced: bool,
    memory: MemoryBus,
    hardware: HardwareBus,
    queue: Arc<InterruptQueue>,
    observers: Vec<Box<dyn Observer>>,
    stop: StopHandle,
    decoder: InstDecoder,
    cycles: u64,
    last_pc: u16,
}

impl Processor {
    /// 创建处理器, 默认挂一块独立的 65536 字内存, 没有设备
    pub fn new() -> Self {
        Self {
            state: ProcessorState::new(),
            interrupts_queuing: false,
            queue_forced: false,
            memory: MemoryBus::new(Arc::new(Memory::new())),
            hardware: HardwareBus::default(),
            queue: Arc::new(InterruptQueue::new()),
            observers: Vec::new(),
            stop: StopHandle::new(),
            decoder: InstDecoder::new(),
            cycles: 0,
            last_pc: 0,
        }
    }

    pub fn attach_memory(&mut self, memory: MemoryBus) {
        self.memory = memory;
    }

    pub fn attach_hardware(&mut self, hardware: HardwareBus) {
        self.hardware = hardware;
    }

    /// 取回硬件总线, 处理器上留下空总线
    pub fn take_hardware(&mut self) -> HardwareBus {
        std::mem::take(&mut self.hardware)
    }

    /// 设备用来发起硬件中断的总线
    pub fn interruption_bus(&self) -> InterruptionBus {
        InterruptionBus::new(self.queue.clone())
    }

    pub fn interrupt_queue(&self) -> &InterruptQueue {
        &self.queue
    }

    /// 从外部发起一次硬件中断
    pub fn interrupt(&self, code: u16) -> Result<(), InterruptError> {
        self.queue.push(code)
    }

    pub fn attach_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn detach_observers(&mut self) {
        self.observers.clear();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// 请求在当前周期结束后停止
    pub fn stop(&self) {
        self.stop.request();
    }

    /// 复位后运行, 直到停止或出错
    pub fn start(&mut self) -> Result<(), ProcessorError> {
        self.reset();
        self.run()
    }

    /// 寄存器清零, sp 置为内存大小, 清空中断队列与停止请求
    pub fn reset(&mut self) {
        self.state.reset();
        self.state.sp = self.memory.memory().size_in_words();
        self.interrupts_queuing = false;
        self.queue_forced = false;
        self.queue.clear();
        self.stop.clear();
        self.cycles = 0;
        self.last_pc = 0;
    }

    pub fn run(&mut self) -> Result<(), ProcessorError> {
        tracing::debug!("处理器开始运行, sp = {:#06x}", self.state.sp);
        while !self.stop.is_requested() {
            self.step()?;
        }
        tracing::info!("处理器已停止, 共执行 {} 个周期", self.cycles);
        Ok(())
    }

    /// 执行一个周期
    pub fn step(&mut self) -> Result<(), ProcessorError> {
        if self.queue.is_overloaded() {
            return Err(ProcessorError::DeviceOverload {
                capacity: self.queue.capacity(),
            });
        }

        if !self.state.skipping && !self.interrupts_queuing && !self.queue_forced {
            if let Some(message) = self.queue.pop() {
                self.deliver_interrupt(message);
            }
        }

        let pc = self.state.pc;
        self.last_pc = pc;
        let word = operand::next_word(&mut self.state, self.memory.memory());
        let (_, b_code, a_code) = split_word(word);

        // 跳过时同样拒绝未定义的编码
        match self.decoder.decode(word, pc)? {
            Decoded::Basic(inst) => {
                if self.state.skipping {
                    self.skip_operands(operand::operand_length(a_code) + operand::operand_length(b_code));
                    self.state.skipping = inst.conditional;
                } else {
                    let a = operand::resolve(a_code, true, &mut self.state, self.memory.memory());
                    let b = operand::resolve(b_code, false, &mut self.state, self.memory.memory());
                    (inst.execute)(self, b, a)?;
                }
            }
            Decoded::Special(inst) => {
                if self.state.skipping {
                    self.skip_operands(operand::operand_length(a_code));
                    self.state.skipping = false;
                } else {
                    let a = operand::resolve(a_code, true, &mut self.state, self.memory.memory());
                    (inst.execute)(self, a)?;
                }
            }
        }

        self.cycles += 1;
        self.notify_observers();
        Ok(())
    }

    fn notify_observers(&mut self) {
        if self.observers.is_empty() {
            return;
        }
        let mut observers = std::mem::take(&mut self.observers);
        for observer in observers.iter_mut() {
            if observer.on_cycle(self).is_break() {
                tracing::debug!("观察者请求停止, pc = {:#06x}", self.state.pc);
                self.stop.request();
            }
        }
        self.observers = observers;
    }

    #[inline(always)]
    fn skip_operands(&mut self, words: u16) {
        self.state.pc = self.state.pc.wrapping_add(words);
    }

    /// 投递一条中断消息, IA 为 0 时丢弃
    fn deliver_interrupt(&mut self, message: u16) {
        if self.state.ia == 0 {
            tracing::trace!("IA 为 0, 丢弃中断 {:#06x}", message);
            return;
        }
        tracing::trace!("投递中断 {:#06x} -> {:#06x}", message, self.state.ia);
        self.interrupts_queuing = true;
        let pc = self.state.pc;
        self.push_word(pc);
        let a = self.state.read_register(Register::A);
        self.push_word(a);
        self.state.write_register(Register::A, message);
        self.state.pc = self.state.ia;
    }

    #[inline(always)]
    fn read(&self, operand: Operand) -> u16 {
        operand::read(operand, &self.state, self.memory.memory())
    }

    #[inline(always)]
    fn write(&mut self, operand: Operand, value: u16) {
        operand::write(operand, value, &mut self.state, self.memory.memory())
    }

    fn push_word(&mut self, value: u16) {
        self.state.sp = self.state.sp.wrapping_sub(1);
        self.memory.memory().write_word(self.state.sp, value);
    }

    fn pop_word(&mut self) -> u16 {
        let value = self.memory.memory().read_word(self.state.sp);
        self.state.sp = self.state.sp.wrapping_add(1);
        value
    }

    #[inline(always)]
    fn skip_unless(&mut self, cond: bool) {
        if !cond {
            self.state.skipping = true;
        }
    }

    pub fn state(&self) -> &ProcessorState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ProcessorState {
        &mut self.state
    }

    pub fn memory(&self) -> &dyn WordMemory {
        self.memory.memory()
    }

    pub fn memory_bus(&self) -> &MemoryBus {
        &self.memory
    }

    pub fn hardware(&self) -> &HardwareBus {
        &self.hardware
    }

    /// 已执行的周期数
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// 最近一次取指的地址
    pub fn last_pc(&self) -> u16 {
        self.last_pc
    }

    pub fn is_interrupt_queuing(&self) -> bool {
        self.interrupts_queuing
    }

    pub fn is_queue_forced(&self) -> bool {
        self.queue_forced
    }
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("state", &self.state)
            .field("interrupts_queuing", &self.interrupts_queuing)
            .field("queue_forced", &self.queue_forced)
            .field("devices", &self.hardware.device_count())
            .field("pending", &self.queue.len())
            .field("cycles", &self.cycles)
            .finish()
    }
}
