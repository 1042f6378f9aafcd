//! 硬件总线
//!
//! 按挂载顺序保存设备, 索引即 HWQ/HWI 中的设备号。

use hw_trait::{Device, DeviceBus, DeviceError};

use super::exception::{MachineError, ProcessorError};

#[derive(Default)]
pub struct HardwareBus {
    devices: Vec<Box<dyn Device>>,
}

impl HardwareBus {
    pub fn new(devices: Vec<Box<dyn Device>>) -> Self {
        Self { devices }
    }

    #[inline(always)]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// HWN 读出的设备数, 超过 16 位时截断
    pub fn count_word(&self) -> u16 {
        self.devices.len() as u16
    }

    fn missing(&self, index: u16) -> ProcessorError {
        ProcessorError::NoSuchDevice {
            index,
            count: self.devices.len(),
        }
    }

    pub fn device(&self, index: u16) -> Result<&dyn Device, ProcessorError> {
        self.devices
            .get(index as usize)
            .map(|d| d.as_ref())
            .ok_or_else(|| self.missing(index))
    }

    pub fn device_mut(&mut self, index: u16) -> Result<&mut (dyn Device + 'static), ProcessorError> {
        let count = self.devices.len();
        self.devices
            .get_mut(index as usize)
            .map(|d| d.as_mut())
            .ok_or(ProcessorError::NoSuchDevice { index, count })
    }

    /// 依次初始化所有设备
    ///
    /// 任一设备失败时, 已初始化的设备会被关闭, 错误带上失败设备的名称。
    pub fn init_all(&mut self, bus: &DeviceBus) -> Result<(), MachineError> {
        for i in 0..self.devices.len() {
            let device = &mut self.devices[i];
            tracing::info!("初始化设备 {}: {} ({})", i, device.name(), device.info());
            if let Err(source) = device.init(bus) {
                let name = device.name().to_string();
                tracing::error!("设备 {} 初始化失败: {}", name, source);
                for inited in self.devices[..i].iter_mut() {
                    shutdown_one(inited.as_mut());
                }
                return Err(MachineError::DeviceInit { name, source });
            }
        }
        Ok(())
    }

    /// 关闭所有设备, 单个设备的失败只记录日志
    pub fn shutdown_all(&mut self) {
        for device in self.devices.iter_mut() {
            shutdown_one(device.as_mut());
        }
    }

    pub fn into_devices(self) -> Vec<Box<dyn Device>> {
        self.devices
    }
}

fn shutdown_one(device: &mut dyn Device) {
    let result: Result<(), DeviceError> = device.shutdown();
    match result {
        Ok(()) => tracing::debug!("设备 {} 已关闭", device.name()),
        Err(e) => tracing::warn!("设备 {} 关闭失败: {}", device.name(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hw_trait::{HardwareInfo, InterruptSink, InterruptionBus, MemoryBus, ProcessorState, Register};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::machine::memory::Memory;

    struct Nop;

    impl InterruptSink for Nop {
        fn interrupt(&self, _code: u16) {}
    }

    struct Probe {
        name: String,
        fail_init: bool,
        shutdowns: Arc<AtomicUsize>,
    }

    impl Device for Probe {
        fn info(&self) -> HardwareInfo {
            HardwareInfo::new(0xdead_beef, 2, 0x1c6c_8b36)
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn init(&mut self, _bus: &DeviceBus) -> Result<(), DeviceError> {
            if self.fail_init {
                Err(DeviceError::Internal("boom".to_string()))
            } else {
                Ok(())
            }
        }

        fn shutdown(&mut self) -> Result<(), DeviceError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn interrupt(&mut self, state: &mut ProcessorState) {
            state.write_register(Register::C, 0x4242);
        }
    }

    fn probe(name: &str, fail_init: bool, shutdowns: &Arc<AtomicUsize>) -> Box<dyn Device> {
        Box::new(Probe {
            name: name.to_string(),
            fail_init,
            shutdowns: shutdowns.clone(),
        })
    }

    fn device_bus() -> DeviceBus {
        DeviceBus {
            memory: MemoryBus::new(Arc::new(Memory::with_size(16))),
            interrupts: InterruptionBus::new(Arc::new(Nop)),
        }
    }

    #[test]
    fn test_lookup_by_index() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut bus = HardwareBus::new(vec![probe("p0", false, &shutdowns)]);
        assert_eq!(bus.count_word(), 1);
        assert_eq!(bus.device(0).unwrap().device_id(), 0xdead_beef);
        assert!(matches!(
            bus.device(1),
            Err(ProcessorError::NoSuchDevice { index: 1, count: 1 })
        ));

        let mut state = ProcessorState::new();
        bus.device_mut(0).unwrap().interrupt(&mut state);
        assert_eq!(state.read_register(Register::C), 0x4242);
        assert!(bus.device_mut(7).is_err());
    }

    #[test]
    fn test_init_failure_shuts_down_earlier_devices() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut bus = HardwareBus::new(vec![
            probe("ok0", false, &shutdowns),
            probe("ok1", false, &shutdowns),
            probe("bad", true, &shutdowns),
            probe("never", false, &shutdowns),
        ]);
        let err = bus.init_all(&device_bus()).unwrap_err();
        match err {
            MachineError::DeviceInit { name, .. } => assert_eq!(name, "bad"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_shutdown_all() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut bus = HardwareBus::new(vec![
            probe("a", false, &shutdowns),
            probe("b", false, &shutdowns),
        ]);
        bus.init_all(&device_bus()).unwrap();
        bus.shutdown_all();
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
        assert_eq!(bus.into_devices().len(), 2);
    }

    #[test]
    fn test_empty_bus() {
        let bus = HardwareBus::default();
        assert_eq!(bus.device_count(), 0);
        assert!(bus.device(0).is_err());
    }
}
