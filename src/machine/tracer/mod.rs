mod itracer;

pub use itracer::ITracer;

use clap::Args;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};

use super::processor::{Observer, Processor};

#[derive(Args, Debug, Clone, Default)]
pub struct TracerArgs {
    /// 启用指令追踪器
    #[arg(long = "trace", default_value_t = false)]
    pub enable_itracer: bool,
}

pub(crate) trait TracerTrace: Send {
    /// 追踪器名称
    fn name(&self) -> &'static str;

    /// 追踪一条刚执行完的指令
    fn trace(&mut self, cpu: &Processor);

    /// 打印Log
    fn get_instructions_log(&self) -> String;
}

/// 统一的追踪器入口
pub struct Tracer {
    tracers: Vec<Box<dyn TracerTrace>>,
}

impl Tracer {
    pub fn new() -> Self {
        Tracer {
            tracers: Vec::new(),
        }
    }

    pub fn add_tracers(&mut self, args: &TracerArgs, list_size: usize) {
        if args.enable_itracer {
            self.tracers.push(Box::new(ITracer::new(list_size)));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracers.is_empty()
    }

    /// 统一的trace入口
    pub fn trace(&mut self, cpu: &Processor) {
        for tracer in &mut self.tracers {
            tracer.trace(cpu);
        }
    }

    pub fn print_log(&self) -> String {
        let mut log = String::new();
        for tracer in &self.tracers {
            log += &format!("Tracer: {}\n", tracer.name());
            log += &tracer.get_instructions_log();
        }
        log
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

/// 追踪器的共享句柄
///
/// 一份挂到处理器上作为观察者, 另一份留给调用方在停止后读取日志。
#[derive(Clone, Default)]
pub struct SharedTracer(Arc<Mutex<Tracer>>);

impl SharedTracer {
    pub fn new(tracer: Tracer) -> Self {
        Self(Arc::new(Mutex::new(tracer)))
    }

    pub fn log(&self) -> String {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .print_log()
    }
}

impl Observer for SharedTracer {
    fn on_cycle(&mut self, cpu: &Processor) -> ControlFlow<()> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .trace(cpu);
        ControlFlow::Continue(())
    }
}
