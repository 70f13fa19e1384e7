//! 内存块设备

use super::BlockDevice;
use crate::error::{Error, ErrorKind, Result};
use alloc::vec;
use alloc::vec::Vec;

/// 基于内存的块设备
///
/// 主要用于测试和嵌入式场景。可以注入写失败和刷新失败以模拟设备错误。
#[derive(Debug, Clone)]
pub struct MemDevice {
    sector_size: u32,
    storage: Vec<u8>,
    fail_writes: bool,
    /// 还能成功的刷新次数，None 表示不限
    flush_budget: Option<u64>,
    flushes: u64,
    opened: bool,
    discarded: u64,
}

impl MemDevice {
    /// 创建指定大小（字节）的设备，扇区大小 512
    ///
    /// 大小向下取整到扇区边界
    pub fn new(size: usize) -> Self {
        Self::with_sector_size(size, 512)
    }

    /// 创建指定扇区大小的设备
    pub fn with_sector_size(size: usize, sector_size: u32) -> Self {
        let size = size - size % sector_size as usize;
        Self {
            sector_size,
            storage: vec![0u8; size],
            fail_writes: false,
            flush_budget: None,
            flushes: 0,
            opened: false,
            discarded: 0,
        }
    }

    /// 设备原始内容
    pub fn data(&self) -> &[u8] {
        &self.storage
    }

    /// 设备原始内容（可变）
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }

    /// 之后的写入是否全部失败
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// 再成功 `n` 次刷新之后，之后的刷新全部失败；None 恢复正常
    pub fn fail_flushes_after(&mut self, n: Option<u64>) {
        self.flush_budget = n;
    }

    /// 累计成功的刷新次数
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// 设备是否处于打开状态
    pub fn is_open(&self) -> bool {
        self.opened
    }

    /// 累计收到的丢弃扇区数
    pub fn discarded_sectors(&self) -> u64 {
        self.discarded
    }

    fn range(&self, lba: u64, count: u32) -> Result<(usize, usize)> {
        let start = lba as usize * self.sector_size as usize;
        let len = count as usize * self.sector_size as usize;
        if start + len > self.storage.len() {
            return Err(Error::new(ErrorKind::Io, "Sector range beyond device"));
        }
        Ok((start, len))
    }
}

impl BlockDevice for MemDevice {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn total_sectors(&self) -> u64 {
        (self.storage.len() / self.sector_size as usize) as u64
    }

    fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        let (start, len) = self.range(lba, count)?;
        buf[..len].copy_from_slice(&self.storage[start..start + len]);
        Ok(len)
    }

    fn write_sectors(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
        if self.fail_writes {
            return Err(Error::new(ErrorKind::Io, "Injected write failure"));
        }
        let (start, len) = self.range(lba, count)?;
        self.storage[start..start + len].copy_from_slice(&buf[..len]);
        Ok(len)
    }

    fn flush(&mut self) -> Result<()> {
        match self.flush_budget {
            Some(0) => return Err(Error::new(ErrorKind::Io, "Injected flush failure")),
            Some(ref mut left) => *left -= 1,
            None => {}
        }
        self.flushes += 1;
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        Ok(())
    }

    fn discard(&mut self, lba: u64, count: u32) -> Result<()> {
        let (start, len) = self.range(lba, count)?;
        self.storage[start..start + len].fill(0);
        self.discarded += count as u64;
        Ok(())
    }
}
