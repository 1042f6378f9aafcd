//! 设备管理模块
//! 负责根据配置文件创建设备, 配置中的顺序即硬件总线上的索引

use hw_trait::Device;

use crate::const_values::DeviceConfig;

/// 设备工厂错误
#[derive(Debug, thiserror::Error)]
pub enum DeviceFactoryError {
    #[error("未知设备类型: {0}")]
    UnknownDeviceType(String),
}

/// 设备工厂
pub struct DeviceFactory;

impl DeviceFactory {
    /// 根据配置创建设备
    pub fn create_device(config: &DeviceConfig) -> Result<Box<dyn Device>, DeviceFactoryError> {
        match config.device_type.as_str() {
            "clock" => Ok(Box::new(clock::GenericClock::new(config.name.clone()))),
            _ => Err(DeviceFactoryError::UnknownDeviceType(config.device_type.clone())),
        }
    }
}

/// 设备管理器
pub struct DeviceManager;

impl DeviceManager {
    /// 按配置列表依次创建所有启用的设备
    pub fn create_devices(configs: &[DeviceConfig]) -> anyhow::Result<Vec<Box<dyn Device>>> {
        let mut devices = Vec::with_capacity(configs.len());
        for config in configs {
            if !config.enabled {
                tracing::info!("跳过禁用的设备: {}", config.name);
                continue;
            }

            tracing::info!(
                "创建设备: {} (类型: {}, 索引: {})",
                config.name,
                config.device_type,
                devices.len()
            );
            let device = DeviceFactory::create_device(config)
                .map_err(|e| anyhow::anyhow!("创建设备 {} 失败: {}", config.name, e))?;
            devices.push(device);
        }
        Ok(devices)
    }
}
