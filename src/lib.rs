//! DCPU-16 虚拟机库
pub mod const_values;
pub mod machine;
pub mod utils;

pub use hw_trait;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use const_values::MachineConfig;
use machine::device_manager::DeviceManager;
use machine::processor::CycleLimit;
use machine::{Machine, Memory, Processor};
use utils::{ByteOrder, ImageFormat, load_program};

#[cfg(feature = "tracer")]
use machine::tracer::{SharedTracer, Tracer, TracerArgs};

/// DCPU-16 虚拟机
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// 程序镜像路径
    #[arg(short, long)]
    pub program: PathBuf,

    /// 机器配置文件路径, 缺省时使用默认配置
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 字节序, 覆盖配置文件中的设置
    #[arg(long, value_enum)]
    pub byte_order: Option<ByteOrder>,

    /// 镜像格式, 覆盖配置文件中的设置
    #[arg(long, value_enum)]
    pub format: Option<ImageFormat>,

    /// 执行指定周期数后停止
    #[arg(long)]
    pub max_cycles: Option<u64>,

    /// 追踪器参数
    #[cfg(feature = "tracer")]
    #[command(flatten)]
    pub tracer: TracerArgs,
}

pub fn build_machine_run_blocking(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "加载机器配置");
            MachineConfig::new(path)?
        }
        None => MachineConfig::default(),
    };

    let byte_order = args.byte_order.unwrap_or(config.program.byte_order);
    let format = args.format.unwrap_or(config.program.format);
    let program = load_program(&args.program, format, byte_order)?;
    let devices = DeviceManager::create_devices(&config.devices)?;

    let mut processor = Processor::new();
    if let Some(limit) = args.max_cycles {
        processor.attach_observer(Box::new(CycleLimit::new(limit)));
    }

    #[cfg(feature = "tracer")]
    let tracer = {
        let mut tracer_args = args.tracer.clone();
        tracer_args.enable_itracer |= config.debug.trace;
        let mut tracer = Tracer::new();
        tracer.add_tracers(&tracer_args, config.debug.trace_list_size);
        if tracer.is_empty() {
            None
        } else {
            let shared = SharedTracer::new(tracer);
            processor.attach_observer(Box::new(shared.clone()));
            Some(shared)
        }
    };

    let mut machine = Machine::new();
    machine.set_processor(processor);
    machine.set_memory(Arc::new(Memory::with_size(config.memory.words)));
    machine.set_devices(devices);
    machine.set_program(program);

    let result = machine.start();

    #[cfg(feature = "tracer")]
    if let Some(tracer) = &tracer {
        info!("最近执行的指令:\n{}", tracer.log());
    }

    result.with_context(|| format!("程序 '{}' 运行失败", args.program.display()))
}
