//! 异常处理模块

use hw_trait::DeviceError;
use thiserror::Error;

/// 执行循环中的致命错误, 一律终止机器
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("不支持的操作: 操作码 {opcode:#04x}, 指令 {word:#06x} at {pc:#06x}")]
    UnsupportedOperation { opcode: u16, word: u16, pc: u16 },

    #[error("不支持的特殊操作: 操作码 {opcode:#04x}, 指令 {word:#06x} at {pc:#06x}")]
    UnsupportedSpecialOperation { opcode: u16, word: u16, pc: u16 },

    #[error("设备过载: 待处理中断超过 {capacity} 个")]
    DeviceOverload { capacity: usize },

    #[error("不存在的设备: 索引 {index}, 共 {count} 个设备")]
    NoSuchDevice { index: u16, count: usize },
}

/// 机器级错误, 向调用方只暴露这一层
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("机器缺少处理器")]
    MissingProcessor,

    #[error("机器缺少内存")]
    MissingMemory,

    #[error("设备 {name} 初始化失败")]
    DeviceInit {
        name: String,
        #[source]
        source: DeviceError,
    },

    #[error("处理器执行失败")]
    Execution(#[from] ProcessorError),

    #[error("处理器执行期间发生 panic: {0}")]
    Panicked(String),
}
