//! 块设备核心类型

use crate::error::{Error, ErrorKind, Result};
use alloc::vec;

/// 块设备接口
///
/// 实现此 trait 以提供底层原始设备访问。缓存引擎不假设文件系统存在，
/// 只需要按扇区定位读写。
///
/// # 示例
///
/// ```rust,ignore
/// use nbd_cache_core::{BlockDevice, Result};
///
/// struct MyDevice {
///     // ...
/// }
///
/// impl BlockDevice for MyDevice {
///     fn sector_size(&self) -> u32 {
///         512
///     }
///
///     fn total_sectors(&self) -> u64 {
///         2 * 1024 * 1024
///     }
///
///     fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
///         // 实现扇区读取
///         Ok(count as usize * self.sector_size() as usize)
///     }
///
///     fn write_sectors(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
///         // 实现扇区写入
///         Ok(count as usize * self.sector_size() as usize)
///     }
/// }
/// ```
pub trait BlockDevice {
    /// 物理扇区大小（通常 512）
    fn sector_size(&self) -> u32;

    /// 总扇区数
    fn total_sectors(&self) -> u64;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号
    /// * `count` - 要读取的扇区数
    /// * `buf` - 目标缓冲区（大小至少为 count * sector_size）
    ///
    /// # 返回
    ///
    /// 成功返回实际读取的字节数
    fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize>;

    /// 写入扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号
    /// * `count` - 要写入的扇区数
    /// * `buf` - 源缓冲区（大小至少为 count * sector_size）
    ///
    /// # 返回
    ///
    /// 成功返回实际写入的字节数
    fn write_sectors(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize>;

    /// 刷新缓存
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// 丢弃扇区（TRIM 提示）
    ///
    /// 只是尽力而为的提示，默认实现什么都不做。
    fn discard(&mut self, _lba: u64, _count: u32) -> Result<()> {
        Ok(())
    }

    /// 是否只读
    fn is_read_only(&self) -> bool {
        false
    }

    /// 打开设备
    ///
    /// 在开始使用设备前调用，默认实现什么都不做。
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// 关闭设备
    ///
    /// 在停止使用设备后调用，默认实现什么都不做。
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 块设备包装器
///
/// 在扇区接口之上提供按字节偏移的定位读写，包含统计信息。
/// 非扇区对齐的写入会做读-改-写。
///
/// # 并发使用
///
/// BlockDev 本身不包含内部锁，调用者需要保证同一时刻只有一个操作在进行。
pub struct BlockDev<D> {
    /// 底层设备
    device: D,
    /// 设备大小（字节）
    size: u64,
    /// 逻辑读取次数
    read_count: u64,
    /// 逻辑写入次数
    write_count: u64,
    /// 物理读取次数（实际设备操作）
    physical_read_count: u64,
    /// 物理写入次数（实际设备操作）
    physical_write_count: u64,
}

impl<D: BlockDevice> BlockDev<D> {
    /// 创建新的块设备包装器
    pub fn new(device: D) -> Result<Self> {
        let sector_size = device.sector_size();
        if sector_size == 0 || !sector_size.is_power_of_two() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Sector size must be a non-zero power of two",
            ));
        }

        let size = device.total_sectors() * sector_size as u64;

        Ok(Self {
            device,
            size,
            read_count: 0,
            write_count: 0,
            physical_read_count: 0,
            physical_write_count: 0,
        })
    }

    /// 获取底层设备的引用
    pub fn device(&self) -> &D {
        &self.device
    }

    /// 获取底层设备的可变引用
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// 取回底层设备
    pub fn into_inner(self) -> D {
        self.device
    }

    /// 获取物理扇区大小
    pub fn sector_size(&self) -> u32 {
        self.device.sector_size()
    }

    /// 设备大小（字节）
    pub fn size(&self) -> u64 {
        self.size
    }

    /// 获取逻辑读取次数
    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    /// 获取逻辑写入次数
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    /// 获取物理读取次数（实际设备操作）
    pub fn physical_read_count(&self) -> u64 {
        self.physical_read_count
    }

    /// 获取物理写入次数（实际设备操作）
    pub fn physical_write_count(&self) -> u64 {
        self.physical_write_count
    }

    /// 检查访问范围
    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        let end = offset.checked_add(len as u64);
        match end {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::io("Access beyond end of device", offset, len)),
        }
    }

    /// 覆盖 `[offset, offset+len)` 的扇区范围：(起始扇区, 扇区数, 首扇区内偏移)
    fn sector_span(&self, offset: u64, len: usize) -> Result<(u64, u32, usize)> {
        let sector = self.device.sector_size() as u64;
        let first = offset / sector;
        let last = (offset + len as u64 + sector - 1) / sector;
        let count = u32::try_from(last - first)
            .map_err(|_| Error::io("Request spans too many sectors", offset, len))?;
        Ok((first, count, (offset % sector) as usize))
    }

    fn device_read(&mut self, lba: u64, count: u32, buf: &mut [u8], offset: u64) -> Result<()> {
        let expected = count as usize * self.device.sector_size() as usize;
        self.physical_read_count += 1;
        let n = self
            .device
            .read_sectors(lba, count, buf)
            .map_err(|e| e.at(offset, expected))?;
        if n < expected {
            log::error!("[BDEV] short read at {:#x}: {} of {} bytes", offset, n, expected);
            return Err(Error::io("Short read from device", offset, expected));
        }
        Ok(())
    }

    fn device_write(&mut self, lba: u64, count: u32, buf: &[u8], offset: u64) -> Result<()> {
        let expected = count as usize * self.device.sector_size() as usize;
        self.physical_write_count += 1;
        let n = self
            .device
            .write_sectors(lba, count, buf)
            .map_err(|e| e.at(offset, expected))?;
        if n < expected {
            log::error!("[BDEV] short write at {:#x}: {} of {} bytes", offset, n, expected);
            return Err(Error::io("Short write to device", offset, expected));
        }
        Ok(())
    }

    /// 按字节偏移读取
    ///
    /// # 参数
    ///
    /// * `offset` - 设备字节偏移
    /// * `buf` - 目标缓冲区，读取 `buf.len()` 字节
    pub fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        if len == 0 {
            return Ok(());
        }
        self.check_range(offset, len)?;
        self.read_count += 1;

        let (lba, count, head) = self.sector_span(offset, len)?;
        let span = count as usize * self.device.sector_size() as usize;

        // 对齐请求直接读入目标缓冲区
        if head == 0 && span == len {
            return self.device_read(lba, count, buf, offset);
        }

        let mut temp = vec![0u8; span];
        self.device_read(lba, count, &mut temp, offset)?;
        buf.copy_from_slice(&temp[head..head + len]);
        Ok(())
    }

    /// 按字节偏移写入
    ///
    /// 非对齐部分会先读出所在扇区再合并写回。
    pub fn write_bytes(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let len = buf.len();
        if len == 0 {
            return Ok(());
        }
        if self.device.is_read_only() {
            return Err(Error::io("Device is read-only", offset, len));
        }
        self.check_range(offset, len)?;
        self.write_count += 1;

        let sector = self.device.sector_size() as usize;
        let (lba, count, head) = self.sector_span(offset, len)?;
        let span = count as usize * sector;

        if head == 0 && span == len {
            return self.device_write(lba, count, buf, offset);
        }

        let mut temp = vec![0u8; span];

        // 只有首尾两个扇区可能是部分覆盖
        if head != 0 {
            self.device_read(lba, 1, &mut temp[..sector], offset)?;
        }
        let tail = (head + len) % sector;
        if tail != 0 && (count > 1 || head == 0) {
            let last = lba + count as u64 - 1;
            self.device_read(last, 1, &mut temp[span - sector..], offset)?;
        }

        temp[head..head + len].copy_from_slice(buf);
        self.device_write(lba, count, &temp, offset)
    }

    /// 丢弃字节范围内完整覆盖的扇区（TRIM 提示）
    ///
    /// # 返回
    ///
    /// 实际提示的扇区数
    pub fn discard_bytes(&mut self, offset: u64, len: u64) -> Result<u32> {
        let sector = self.device.sector_size() as u64;
        let first = (offset + sector - 1) / sector;
        let last = (offset + len) / sector;
        if last <= first {
            return Ok(0);
        }
        let count = u32::try_from(last - first).unwrap_or(u32::MAX);
        self.device
            .discard(first, count)
            .map_err(|e| e.at(offset, len as usize))?;
        Ok(count)
    }

    /// 刷新底层设备
    pub fn flush(&mut self) -> Result<()> {
        self.device.flush()
    }

    /// 打开底层设备
    pub fn open(&mut self) -> Result<()> {
        self.device.open()
    }

    /// 关闭底层设备
    ///
    /// 不做刷新，需要落盘时调用者先调用 [`BlockDev::flush`]。
    pub fn close(&mut self) -> Result<()> {
        self.device.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemDevice;

    #[test]
    fn test_unaligned_write_preserves_neighbours() {
        let mut bdev = BlockDev::new(MemDevice::new(8 * 512)).unwrap();
        bdev.write_bytes(0, &[0xAA; 2048]).unwrap();

        bdev.write_bytes(500, &[0x11; 30]).unwrap();

        let mut buf = [0u8; 40];
        bdev.read_bytes(495, &mut buf).unwrap();
        assert_eq!(&buf[..5], &[0xAA; 5]);
        assert_eq!(&buf[5..35], &[0x11; 30]);
        assert_eq!(&buf[35..], &[0xAA; 5]);
    }

    #[test]
    fn test_unaligned_head_only() {
        let mut bdev = BlockDev::new(MemDevice::new(4 * 512)).unwrap();
        bdev.write_bytes(0, &[0x55; 1024]).unwrap();

        // 从扇区中间开始，到扇区末尾结束
        bdev.write_bytes(100, &[0x22; 412]).unwrap();

        let mut buf = [0u8; 1024];
        bdev.read_bytes(0, &mut buf).unwrap();
        assert_eq!(&buf[..100], &[0x55; 100]);
        assert_eq!(&buf[100..512], &[0x22; 412]);
        assert_eq!(&buf[512..], &[0x55; 512]);
    }

    #[test]
    fn test_aligned_io_is_single_device_call() {
        let mut bdev = BlockDev::new(MemDevice::new(8 * 512)).unwrap();
        bdev.write_bytes(512, &[7u8; 1024]).unwrap();
        assert_eq!(bdev.physical_write_count(), 1);
        assert_eq!(bdev.physical_read_count(), 0);

        let mut buf = [0u8; 1024];
        bdev.read_bytes(512, &mut buf).unwrap();
        assert_eq!(buf, [7u8; 1024]);
        assert_eq!(bdev.physical_read_count(), 1);
    }

    #[test]
    fn test_out_of_range_has_context() {
        let mut bdev = BlockDev::new(MemDevice::new(2 * 512)).unwrap();
        let mut buf = [0u8; 16];
        let err = bdev.read_bytes(1020, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        let ctx = err.io_context().unwrap();
        assert_eq!(ctx.offset, 1020);
        assert_eq!(ctx.len, 16);
    }

    #[test]
    fn test_discard_only_whole_sectors() {
        let mut bdev = BlockDev::new(MemDevice::new(8 * 512)).unwrap();
        assert_eq!(bdev.discard_bytes(100, 1000).unwrap(), 1);
        assert_eq!(bdev.discard_bytes(0, 100).unwrap(), 0);
        assert_eq!(bdev.discard_bytes(512, 1024).unwrap(), 2);
    }
}
