//! 中断队列
//!
//! 设备线程通过中断总线入队, 执行线程每个周期至多出队一个,
//! 两端共用同一把锁。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use hw_trait::InterruptSink;
use thiserror::Error;

use super::exception::ProcessorError;
use crate::const_values::INTERRUPT_QUEUE_CAPACITY;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterruptError {
    #[error("中断队列已满: 容量 {capacity}")]
    QueueFull { capacity: usize },
}

impl From<InterruptError> for ProcessorError {
    fn from(err: InterruptError) -> Self {
        match err {
            InterruptError::QueueFull { capacity } => ProcessorError::DeviceOverload { capacity },
        }
    }
}

/// 定长环形缓冲
#[derive(Debug)]
struct Ring {
    buf: [u16; INTERRUPT_QUEUE_CAPACITY],
    read: usize,
    len: usize,
}

impl Ring {
    fn push(&mut self, message: u16) -> Result<(), InterruptError> {
        if self.len == self.buf.len() {
            return Err(InterruptError::QueueFull {
                capacity: self.buf.len(),
            });
        }
        let write = (self.read + self.len) % self.buf.len();
        self.buf[write] = message;
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<u16> {
        if self.len == 0 {
            return None;
        }
        let message = self.buf[self.read];
        self.read = (self.read + 1) % self.buf.len();
        self.len -= 1;
        Some(message)
    }
}

/// 线程安全的有界 FIFO 中断队列
#[derive(Debug)]
pub struct InterruptQueue {
    ring: Mutex<Ring>,
    /// 任意一次入队溢出后置位, 执行线程在周期开始时检查
    overloaded: AtomicBool,
}

impl InterruptQueue {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(Ring {
                buf: [0; INTERRUPT_QUEUE_CAPACITY],
                read: 0,
                len: 0,
            }),
            overloaded: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 入队一条中断消息, 队列已满时返回错误并标记过载
    pub fn push(&self, message: u16) -> Result<(), InterruptError> {
        let result = self.lock().push(message);
        if let Err(ref e) = result {
            self.overloaded.store(true, Ordering::Release);
            tracing::error!("{}, 丢弃中断 {:#06x}", e, message);
        }
        result
    }

    pub fn pop(&self) -> Option<u16> {
        self.lock().pop()
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        INTERRUPT_QUEUE_CAPACITY
    }

    #[inline(always)]
    pub fn is_overloaded(&self) -> bool {
        self.overloaded.load(Ordering::Acquire)
    }

    /// 清空队列与过载标记 (处理器复位时调用)
    pub fn clear(&self) {
        let mut ring = self.lock();
        ring.read = 0;
        ring.len = 0;
        self.overloaded.store(false, Ordering::Release);
    }
}

impl Default for InterruptQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptSink for InterruptQueue {
    fn interrupt(&self, code: u16) {
        // 溢出已记录在过载标记中, 由执行线程终止机器
        let _ = self.push(code);
    }
}
