//! 内存管理模块

use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};

use hw_trait::WordMemory;

use crate::const_values::MEMORY_WORDS;

/// 按字寻址的平坦内存
///
/// 每个字是一个独立的原子量, 执行线程与设备后台线程可以并发读写,
/// 不同地址之间互不加锁。跨字的原子性不作保证。
pub struct Memory {
    /// 内存数据
    data: Box<[AtomicU16]>,
}

impl Memory {
    /// 创建 65536 字的内存
    pub fn new() -> Self {
        Self::with_size(MEMORY_WORDS)
    }

    /// 指定字数创建内存, 超出 1..=65536 的参数被截断
    pub fn with_size(words: usize) -> Self {
        let words = words.clamp(1, MEMORY_WORDS);
        Self {
            data: (0..words).map(|_| AtomicU16::new(0)).collect(),
        }
    }

    #[inline(always)]
    fn index(&self, addr: u16) -> usize {
        addr as usize % self.data.len()
    }

    /// 读取一个字, 地址回绕
    #[inline(always)]
    pub fn read(&self, addr: u16) -> u16 {
        self.data[self.index(addr)].load(Ordering::Relaxed)
    }

    /// 写入一个字, 地址回绕
    #[inline(always)]
    pub fn write(&self, addr: u16, value: u16) {
        self.data[self.index(addr)].store(value, Ordering::Relaxed);
    }

    /// 从 `offset` 起复制尽可能多的字, 超出内存末尾的部分被丢弃
    ///
    /// 返回实际写入的字数。
    pub fn bulk_set(&self, offset: u16, words: &[u16]) -> usize {
        let start = offset as usize;
        if start >= self.data.len() {
            return 0;
        }
        let count = words.len().min(self.data.len() - start);
        for (cell, &word) in self.data[start..start + count].iter().zip(words) {
            cell.store(word, Ordering::Relaxed);
        }
        count
    }

    /// 用 `value` 填充 [from, to), 末尾截断到内存大小
    pub fn fill(&self, from: u16, to: u16, value: u16) {
        let start = from as usize;
        let end = (to as usize).min(self.data.len());
        if start < end {
            for cell in &self.data[start..end] {
                cell.store(value, Ordering::Relaxed);
            }
        }
    }

    /// 复制一段连续内存 (地址回绕), 用于调试输出
    pub fn snapshot(&self, addr: u16, len: usize) -> Vec<u16> {
        (0..len)
            .map(|i| self.read(addr.wrapping_add(i as u16)))
            .collect()
    }

    /// 内存字数 (1..=65536)
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 以字为单位的大小, 截断为 16 位: 完整的 65536 字内存返回 0
    #[inline(always)]
    pub fn size_in_words(&self) -> u16 {
        self.data.len() as u16
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("words", &self.data.len())
            .finish()
    }
}

impl WordMemory for Memory {
    #[inline(always)]
    fn read_word(&self, addr: u16) -> u16 {
        self.read(addr)
    }

    #[inline(always)]
    fn write_word(&self, addr: u16, value: u16) {
        self.write(addr, value)
    }

    #[inline(always)]
    fn size_in_words(&self) -> u16 {
        Memory::size_in_words(self)
    }
}
