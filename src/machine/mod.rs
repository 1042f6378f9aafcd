//! 机器: 把处理器、内存与设备接到一起并驱动运行

pub mod device_manager;
pub mod exception;
pub mod hardware;
pub mod interrupt;
pub mod memory;
pub mod processor;
#[cfg(feature = "tracer")] // 条件编译追踪器模块
pub mod tracer;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use hw_trait::{Device, DeviceBus, MemoryBus};

pub use exception::{MachineError, ProcessorError};
pub use hardware::HardwareBus;
pub use interrupt::{InterruptError, InterruptQueue};
pub use memory::Memory;
pub use processor::{Observer, Processor, StopHandle};

/// 机器
///
/// 持有处理器、内存与设备; 启动时绑定总线, 设备初始化后把程序
/// 装入地址 0 并运行处理器。无论正常停止还是失败, 所有设备都会被关闭。
#[derive(Default)]
pub struct Machine {
    processor: Option<Processor>,
    memory: Option<Arc<Memory>>,
    devices: Option<Vec<Box<dyn Device>>>,
    program: Vec<u16>,
}

impl Machine {
    /// 创建空机器, 处理器与内存需要另行设置
    pub fn new() -> Self {
        Self::default()
    }

    /// 默认处理器与 65536 字内存
    pub fn with_defaults() -> Self {
        Self {
            processor: Some(Processor::new()),
            memory: Some(Arc::new(Memory::new())),
            devices: None,
            program: Vec::new(),
        }
    }

    pub fn set_processor(&mut self, processor: Processor) {
        self.processor = Some(processor);
    }

    pub fn set_memory(&mut self, memory: Arc<Memory>) {
        self.memory = Some(memory);
    }

    /// 设备顺序即 HWQ/HWI 使用的索引
    pub fn set_devices(&mut self, devices: Vec<Box<dyn Device>>) {
        self.devices = Some(devices);
    }

    pub fn set_program(&mut self, program: Vec<u16>) {
        self.program = program;
    }

    pub fn processor(&self) -> Option<&Processor> {
        self.processor.as_ref()
    }

    pub fn processor_mut(&mut self) -> Option<&mut Processor> {
        self.processor.as_mut()
    }

    pub fn memory(&self) -> Option<&Arc<Memory>> {
        self.memory.as_ref()
    }

    pub fn devices(&self) -> &[Box<dyn Device>] {
        self.devices.as_deref().unwrap_or_default()
    }

    /// 停止句柄, 可在其他线程请求停止
    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.processor.as_ref().map(Processor::stop_handle)
    }

    /// 启动机器并阻塞直到处理器停止
    pub fn start(&mut self) -> Result<(), MachineError> {
        let processor = self.processor.as_mut().ok_or(MachineError::MissingProcessor)?;
        let memory = self.memory.clone().ok_or(MachineError::MissingMemory)?;

        let memory_bus = MemoryBus::new(memory.clone());
        processor.attach_memory(memory_bus.clone());
        // 先复位, 设备在 init 中发出的中断留到第一个周期处理
        processor.reset();

        let mut hardware = HardwareBus::new(self.devices.take().unwrap_or_default());
        let bus = DeviceBus {
            memory: memory_bus,
            interrupts: processor.interruption_bus(),
        };
        if let Err(e) = hardware.init_all(&bus) {
            self.devices = Some(hardware.into_devices());
            return Err(e);
        }

        let loaded = memory.bulk_set(0, &self.program);
        if loaded < self.program.len() {
            tracing::warn!(
                "程序长度 {} 超出内存, 只装入 {} 个字",
                self.program.len(),
                loaded
            );
        }

        processor.attach_hardware(hardware);
        tracing::info!(
            program_words = loaded,
            memory_words = memory.len(),
            devices = processor.hardware().device_count(),
            "机器启动"
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| processor.run()));

        let mut hardware = processor.take_hardware();
        hardware.shutdown_all();
        self.devices = Some(hardware.into_devices());

        match result {
            Ok(Ok(())) => {
                tracing::info!("机器已停止");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!("机器执行失败: {}\n{}", e, processor.state());
                Err(MachineError::Execution(e))
            }
            Err(payload) => {
                let message = panic_message(payload);
                tracing::error!("机器执行期间发生 panic: {}\n{}", message, processor.state());
                Err(MachineError::Panicked(message))
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hw_trait::{DeviceError, HardwareInfo, InterruptionBus, ProcessorState, Register};
    use std::ops::ControlFlow;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// HWI 时写 C 并回发一次硬件中断
    struct EchoDevice {
        bus: Option<InterruptionBus>,
        shutdowns: Arc<AtomicUsize>,
    }

    impl EchoDevice {
        fn boxed(shutdowns: &Arc<AtomicUsize>) -> Box<dyn Device> {
            Box::new(EchoDevice {
                bus: None,
                shutdowns: shutdowns.clone(),
            })
        }
    }

    impl Device for EchoDevice {
        fn info(&self) -> HardwareInfo {
            HardwareInfo::new(0x4fd5_24c5, 1, 0x1eb3_7e91)
        }

        fn name(&self) -> &str {
            "echo"
        }

        fn init(&mut self, bus: &DeviceBus) -> Result<(), DeviceError> {
            self.bus = Some(bus.interrupts.clone());
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), DeviceError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn interrupt(&mut self, state: &mut ProcessorState) {
            state.write_register(Register::C, 0xabcd);
            if let Some(bus) = &self.bus {
                bus.interrupt(0x1234);
            }
        }
    }

    struct PanicDevice;

    impl Device for PanicDevice {
        fn info(&self) -> HardwareInfo {
            HardwareInfo::default()
        }

        fn interrupt(&mut self, _state: &mut ProcessorState) {
            panic!("device fault");
        }
    }

    struct BrokenDevice;

    impl Device for BrokenDevice {
        fn info(&self) -> HardwareInfo {
            HardwareInfo::default()
        }

        fn init(&mut self, _bus: &DeviceBus) -> Result<(), DeviceError> {
            Err(DeviceError::Access("no medium".to_string()))
        }
    }

    /// init 时发出 `count` 个硬件中断
    struct FloodDevice {
        count: u16,
    }

    impl Device for FloodDevice {
        fn info(&self) -> HardwareInfo {
            HardwareInfo::default()
        }

        fn init(&mut self, bus: &DeviceBus) -> Result<(), DeviceError> {
            for i in 0..self.count {
                bus.interrupts.interrupt(i);
            }
            Ok(())
        }
    }

    /// pc 到达 `pc` 时记下状态并停止
    fn capture_at(machine: &mut Machine, pc: u16) -> Arc<Mutex<Option<ProcessorState>>> {
        let captured = Arc::new(Mutex::new(None));
        let slot = captured.clone();
        machine
            .processor_mut()
            .unwrap()
            .attach_observer(Box::new(move |cpu: &Processor| {
                if cpu.state().pc == pc {
                    *slot.lock().unwrap() = Some(cpu.state().clone());
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }));
        captured
    }

    fn limit_cycles(machine: &mut Machine, limit: u64) {
        machine
            .processor_mut()
            .unwrap()
            .attach_observer(Box::new(move |cpu: &Processor| {
                if cpu.cycles() >= limit {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }));
    }

    #[test]
    fn test_hardware_interrupts() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut machine = Machine::with_defaults();
        machine.set_devices(vec![EchoDevice::boxed(&shutdowns)]);
        machine.set_program(vec![
            0x7d40, 0x000d, // IAS 0x000d
            0x7c01, 0xb00b, // SET A, 0xb00b
            0x7e40, 0x0000, // HWI 0
            0xacc1, // SET I, 10
            0x88c3, // SUB I, 1
            0x84d4, // IFG I, 0
            0x7f81, 0x000b, // SET PC, 0x000b
            0x7f81, 0x000b, // SET PC, 0x000b
            0x0021, // 中断处理: SET B, A
            0x1960, // RFI
        ]);
        let captured = capture_at(&mut machine, 0x000b);

        machine.start().unwrap();

        let state = captured.lock().unwrap().clone().unwrap();
        assert_eq!(state.ia, 0x000d);
        assert_eq!(state.read_register(Register::A), 0xb00b);
        assert_eq!(state.read_register(Register::B), 0x1234);
        assert_eq!(state.read_register(Register::C), 0xabcd);
        assert_eq!(state.sp, 0);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(machine.devices().len(), 1);
    }

    #[test]
    fn test_software_interrupts() {
        let mut machine = Machine::with_defaults();
        machine.set_program(vec![
            0x7d40, 0x0008, // IAS 0x0008
            0x7c01, 0x1234, // SET A, 0x1234
            0x7d00, 0xbabe, // INT 0xbabe
            0x7f81, 0x0006, // SET PC, 0x0006
            0x7c21, 0xbeef, // SET B, 0xbeef
            0x0041, // SET C, A
            0x1960, // RFI
        ]);
        let captured = capture_at(&mut machine, 0x0006);

        machine.start().unwrap();

        let state = captured.lock().unwrap().clone().unwrap();
        assert_eq!(state.read_register(Register::A), 0x1234);
        assert_eq!(state.read_register(Register::B), 0xbeef);
        assert_eq!(state.read_register(Register::C), 0xbabe);
    }

    #[test]
    fn test_literal_set_end_to_end() {
        let mut machine = Machine::with_defaults();
        machine.set_program(vec![0x7c01, 0x0030]);
        limit_cycles(&mut machine, 1);
        machine.start().unwrap();
        let cpu = machine.processor().unwrap();
        assert_eq!(cpu.state().read_register(Register::A), 0x0030);
        assert_eq!(cpu.cycles(), 1);
    }

    #[test]
    fn test_missing_parts() {
        let mut machine = Machine::new();
        assert!(matches!(machine.start(), Err(MachineError::MissingProcessor)));
        machine.set_processor(Processor::new());
        assert!(matches!(machine.start(), Err(MachineError::MissingMemory)));
    }

    #[test]
    fn test_failure_shuts_down_devices() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut machine = Machine::with_defaults();
        machine.set_devices(vec![EchoDevice::boxed(&shutdowns), EchoDevice::boxed(&shutdowns)]);
        // 0x0018 不是合法指令
        machine.set_program(vec![0x7c01, 0x0030, 0x0018]);

        let err = machine.start().unwrap_err();
        assert!(matches!(
            err,
            MachineError::Execution(ProcessorError::UnsupportedOperation { pc: 2, .. })
        ));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
        assert_eq!(machine.devices().len(), 2);
    }

    #[test]
    fn test_missing_device_is_machine_error() {
        let mut machine = Machine::with_defaults();
        // HWQ 0, 没有设备
        machine.set_program(vec![0x8620]);
        assert!(matches!(
            machine.start(),
            Err(MachineError::Execution(ProcessorError::NoSuchDevice { index: 0, count: 0 }))
        ));
    }

    #[test]
    fn test_device_panic_is_caught() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut machine = Machine::with_defaults();
        machine.set_devices(vec![EchoDevice::boxed(&shutdowns), Box::new(PanicDevice)]);
        // HWI 1
        machine.set_program(vec![0x8a40]);

        match machine.start() {
            Err(MachineError::Panicked(message)) => assert!(message.contains("device fault")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_device_init_failure() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut machine = Machine::with_defaults();
        machine.set_devices(vec![EchoDevice::boxed(&shutdowns), Box::new(BrokenDevice)]);
        machine.set_program(vec![0x7c01, 0x0030]);

        assert!(matches!(
            machine.start(),
            Err(MachineError::DeviceInit { .. })
        ));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(machine.devices().len(), 2);
        // 程序没有被装入
        assert_eq!(machine.memory().unwrap().read(0), 0);
    }

    #[test]
    fn test_interrupts_raised_during_init_are_kept() {
        let mut machine = Machine::with_defaults();
        machine.set_devices(vec![Box::new(FloodDevice { count: 3 })]);
        // SET PC, 0
        machine.set_program(vec![0x8781]);
        let pending = Arc::new(Mutex::new(Vec::new()));
        let slot = pending.clone();
        machine
            .processor_mut()
            .unwrap()
            .attach_observer(Box::new(move |cpu: &Processor| {
                slot.lock().unwrap().push(cpu.interrupt_queue().len());
                if cpu.cycles() >= 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }));
        machine.start().unwrap();
        // IA 为 0, 每个周期取出并丢弃一个
        assert_eq!(*pending.lock().unwrap(), vec![2, 1, 0]);

        let mut machine = Machine::with_defaults();
        machine.set_devices(vec![Box::new(FloodDevice { count: 257 })]);
        machine.set_program(vec![0x8781]);
        assert!(matches!(
            machine.start(),
            Err(MachineError::Execution(ProcessorError::DeviceOverload { capacity: 256 }))
        ));
    }

    #[test]
    fn test_program_truncated_to_small_memory() {
        let mut machine = Machine::with_defaults();
        machine.set_memory(Arc::new(Memory::with_size(4)));
        // SET A, 1 / SET B, 2 / SET C, 3 / SET X, 4 / SET Y, 5
        machine.set_program(vec![0x8801, 0x8c21, 0x9041, 0x9461, 0x9881]);
        limit_cycles(&mut machine, 4);
        machine.start().unwrap();
        let cpu = machine.processor().unwrap();
        assert_eq!(cpu.state().read_register(Register::X), 4);
        assert_eq!(cpu.state().read_register(Register::Y), 0);
        assert_eq!(cpu.state().sp, 4);
        assert_eq!(machine.memory().unwrap().snapshot(0, 4), vec![0x8801, 0x8c21, 0x9041, 0x9461]);
    }

    #[test]
    fn test_stop_from_another_thread() {
        let mut machine = Machine::with_defaults();
        // SET PC, 0
        machine.set_program(vec![0x8781]);
        let handle = machine.stop_handle().unwrap();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            handle.request();
        });
        machine.start().unwrap();
        stopper.join().unwrap();
    }
}
