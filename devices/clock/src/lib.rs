//! Generic Clock 设备
//!
//! HWI 时按寄存器 A 选择操作:
//! - 0: B 为 0 时关闭时钟, 否则以每秒 60/B 次的频率计时并清零计数
//! - 1: 把上次设置频率以来的计数写入 C
//! - 2: B 非 0 时每次计时都以消息 B 发起中断, B 为 0 时关闭中断
use hw_trait::{Device, DeviceBus, DeviceError, HardwareInfo, InterruptionBus, ProcessorState, Register};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const SET_FREQUENCY: u16 = 0;
const READ_TICKS: u16 = 1;
const SET_INTERRUPT_MESSAGE: u16 = 2;

pub const CLOCK_INFO: HardwareInfo = HardwareInfo::new(0x12d0_b402, 0x0001, 0x0000_0000);

/// 计时线程与设备共享的计数
#[derive(Default)]
struct Shared {
    ticks: AtomicU16,
    message: AtomicU16,
}

/// 后台计时线程
struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// 每 `divider` 个 1/60 秒计时一次
fn tick_period(divider: u16) -> Duration {
    Duration::from_micros(u64::from(divider) * 1_000_000 / 60)
}

pub struct GenericClock {
    name: String,
    shared: Arc<Shared>,
    interrupts: Option<InterruptionBus>,
    worker: Option<Worker>,
}

impl GenericClock {
    pub fn new(name: String) -> Self {
        Self {
            name,
            shared: Arc::new(Shared::default()),
            interrupts: None,
            worker: None,
        }
    }

    pub fn ticks(&self) -> u16 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    fn stop_worker(&mut self) -> Result<(), DeviceError> {
        if let Some(worker) = self.worker.take() {
            // 线程可能已退出, 发送失败无妨
            let _ = worker.stop.send(());
            worker
                .handle
                .join()
                .map_err(|_| DeviceError::Internal(format!("{} 计时线程异常退出", self.name)))?;
            tracing::debug!(device = %self.name, "计时线程已停止");
        }
        Ok(())
    }

    fn start_worker(&mut self, divider: u16) -> Result<(), DeviceError> {
        self.stop_worker()?;
        self.shared.ticks.store(0, Ordering::Relaxed);

        let period = tick_period(divider);
        let shared = self.shared.clone();
        let interrupts = self.interrupts.clone();
        let (stop, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(format!("{}-tick", self.name))
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        shared.ticks.fetch_add(1, Ordering::Relaxed);
                        let message = shared.message.load(Ordering::Relaxed);
                        if message != 0 {
                            if let Some(bus) = &interrupts {
                                bus.interrupt(message);
                            }
                        }
                    }
                    _ => break,
                }
            })
            .map_err(|e| DeviceError::Internal(format!("无法创建计时线程: {}", e)))?;

        tracing::debug!(device = %self.name, period_us = period.as_micros() as u64, "时钟开始计时");
        self.worker = Some(Worker { stop, handle });
        Ok(())
    }
}

impl Default for GenericClock {
    fn default() -> Self {
        Self::new("clock".to_string())
    }
}

impl Device for GenericClock {
    fn info(&self) -> HardwareInfo {
        CLOCK_INFO
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, bus: &DeviceBus) -> Result<(), DeviceError> {
        self.interrupts = Some(bus.interrupts.clone());
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), DeviceError> {
        self.stop_worker()
    }

    fn interrupt(&mut self, state: &mut ProcessorState) {
        let b = state.read_register(Register::B);
        match state.read_register(Register::A) {
            SET_FREQUENCY => {
                let result = if b == 0 {
                    self.stop_worker()
                } else {
                    self.start_worker(b)
                };
                // 故障不上抛给处理器核心
                if let Err(e) = result {
                    tracing::warn!(device = %self.name, error = %e, "时钟设置失败");
                }
            }
            READ_TICKS => state.write_register(Register::C, self.ticks()),
            SET_INTERRUPT_MESSAGE => self.shared.message.store(b, Ordering::Relaxed),
            _ => {}
        }
    }
}

impl Drop for GenericClock {
    fn drop(&mut self) {
        let _ = self.stop_worker();
    }
}
