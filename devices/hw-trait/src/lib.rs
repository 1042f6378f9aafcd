//! 硬件总线契约
//!
//! 处理器核心与外设之间的全部接口: 设备 trait、设备元信息、
//! 处理器状态, 以及设备访问内存/发起中断所用的总线句柄。

mod state;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use state::{ProcessorState, Register};

/// 设备错误类型
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("设备访问错误: {0}")]
    Access(String),
    #[error("设备不支持的操作: {0}")]
    Unsupported(String),
    #[error("设备内部错误: {0}")]
    Internal(String),
}

/// 设备元信息, 通过 HWQ 读出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardwareInfo {
    /// 32 位硬件 id
    pub id: u32,
    /// 16 位版本号
    pub version: u16,
    /// 32 位制造商 id
    pub manufacturer: u32,
}

impl HardwareInfo {
    pub const fn new(id: u32, version: u16, manufacturer: u32) -> Self {
        Self {
            id,
            version,
            manufacturer,
        }
    }
}

impl fmt::Display for HardwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={:#010x} version={:#06x} manufacturer={:#010x}",
            self.id, self.version, self.manufacturer
        )
    }
}

/// 按字寻址的内存
///
/// 地址按内存大小取模回绕, 单字读写不会撕裂。
/// 实现必须允许多个线程并发访问。
pub trait WordMemory: Send + Sync {
    fn read_word(&self, addr: u16) -> u16;

    fn write_word(&self, addr: u16, value: u16);

    /// 以字为单位的内存大小, 截断为 16 位 (65536 字返回 0)
    fn size_in_words(&self) -> u16;
}

/// 中断接收端, 由处理器的中断队列实现
pub trait InterruptSink: Send + Sync {
    /// 发起一次硬件中断, 可在任意线程调用
    fn interrupt(&self, code: u16);
}

/// 内存总线: 处理器与设备共享同一块内存, 不转移所有权
#[derive(Clone)]
pub struct MemoryBus {
    memory: Arc<dyn WordMemory>,
}

impl MemoryBus {
    pub fn new(memory: Arc<dyn WordMemory>) -> Self {
        Self { memory }
    }

    #[inline(always)]
    pub fn memory(&self) -> &dyn WordMemory {
        self.memory.as_ref()
    }
}

impl fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBus")
            .field("size_in_words", &self.memory.size_in_words())
            .finish()
    }
}

/// 中断总线: 设备 -> 处理器
#[derive(Clone)]
pub struct InterruptionBus {
    sink: Arc<dyn InterruptSink>,
}

impl InterruptionBus {
    pub fn new(sink: Arc<dyn InterruptSink>) -> Self {
        Self { sink }
    }

    pub fn interrupt(&self, code: u16) {
        self.sink.interrupt(code);
    }
}

impl fmt::Debug for InterruptionBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InterruptionBus")
    }
}

/// 机器启动时交给设备的总线集合
#[derive(Debug, Clone)]
pub struct DeviceBus {
    pub memory: MemoryBus,
    pub interrupts: InterruptionBus,
}

/// 外设 trait
/// 所有挂在硬件总线上的设备都必须实现此 trait
pub trait Device: Send {
    /// 设备元信息 (id / 版本 / 制造商), 对同一实例保持不变
    fn info(&self) -> HardwareInfo;

    /// 获取设备名称（用于日志）
    fn name(&self) -> &str {
        "unknown"
    }

    /// 机器启动时调用一次
    ///
    /// 设备若需要访问内存或发起中断, 应在这里保存总线句柄。
    fn init(&mut self, _bus: &DeviceBus) -> Result<(), DeviceError> {
        Ok(())
    }

    /// 机器停止或失败时调用一次, 设备在此结束自己的后台线程
    fn shutdown(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// HWI 同步调用的中断处理
    ///
    /// 可以读写任意寄存器, 也可以经中断总线再发起硬件中断。
    /// 设备内部故障由设备自行处理, 不得阻塞过久。
    fn interrupt(&mut self, _state: &mut ProcessorState) {}

    fn device_id(&self) -> u32 {
        self.info().id
    }

    fn manufacturer(&self) -> u32 {
        self.info().manufacturer
    }

    fn version(&self) -> u16 {
        self.info().version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        codes: Mutex<Vec<u16>>,
    }

    impl InterruptSink for Recorder {
        fn interrupt(&self, code: u16) {
            self.codes.lock().unwrap().push(code);
        }
    }

    struct Dummy;

    impl Device for Dummy {
        fn info(&self) -> HardwareInfo {
            HardwareInfo::new(0x1234_5678, 3, 0x9abc_def0)
        }
    }

    #[test]
    fn test_device_metadata_defaults() {
        let dev = Dummy;
        assert_eq!(dev.device_id(), 0x1234_5678);
        assert_eq!(dev.version(), 3);
        assert_eq!(dev.manufacturer(), 0x9abc_def0);
        assert_eq!(dev.name(), "unknown");
    }

    #[test]
    fn test_interruption_bus_forwards() {
        let recorder = Arc::new(Recorder {
            codes: Mutex::new(Vec::new()),
        });
        let bus = InterruptionBus::new(recorder.clone());
        bus.interrupt(7);
        bus.clone().interrupt(9);
        assert_eq!(*recorder.codes.lock().unwrap(), vec![7, 9]);
    }

    #[test]
    fn test_hardware_info_display() {
        let info = HardwareInfo::new(0x12d0b402, 1, 0);
        assert_eq!(
            info.to_string(),
            "id=0x12d0b402 version=0x0001 manufacturer=0x00000000"
        );
    }
}
