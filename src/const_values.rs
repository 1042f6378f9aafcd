use anyhow::{self, Context};
use serde::Deserialize;
use std::path::Path;

use crate::utils::{ByteOrder, ImageFormat};

/// 内存字数 (地址空间 16 位)
pub const MEMORY_WORDS: usize = 0x10000;
/// 待处理中断上限, 超出即视为设备过载
pub const INTERRUPT_QUEUE_CAPACITY: usize = 256;
/// 指令追踪默认保留条数
pub const INSTRUCTION_TRACER_LIST_SIZE: usize = 64;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_words")]
    pub words: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            words: MEMORY_WORDS,
        }
    }
}

fn default_memory_words() -> usize {
    MEMORY_WORDS
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramConfig {
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub format: ImageFormat,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DebugConfig {
    #[serde(default)]
    pub trace: bool,
    #[serde(default = "default_trace_list_size")]
    pub trace_list_size: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            trace: false,
            trace_list_size: INSTRUCTION_TRACER_LIST_SIZE,
        }
    }
}

fn default_trace_list_size() -> usize {
    INSTRUCTION_TRACER_LIST_SIZE
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// 机器配置（profile/machine.toml）
///
/// 设备按出现顺序挂到硬件总线, 顺序即 HWQ/HWI 使用的索引。
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineConfig {
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub program: ProgramConfig,
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl MachineConfig {
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<MachineConfig> {
        let toml_str = std::fs::read_to_string(&path)
            .with_context(|| format!("无法读取机器配置文件: {:?}", &path.as_ref().as_os_str()))?;
        Self::from_toml(&toml_str)
            .with_context(|| format!("无法解析机器配置文件: {:?}", &path.as_ref().as_os_str()))
    }

    pub fn from_toml(toml_str: &str) -> anyhow::Result<MachineConfig> {
        let config: MachineConfig = toml::from_str(toml_str)?;
        anyhow::Ok(config)
    }
}
