//! 基于文件的块设备（需要 `std` 特性）

use super::BlockDevice;
use crate::error::{Error, ErrorKind, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// 基于 `std::fs::File` 的块设备
///
/// 可以打开普通文件或原始块设备节点。设备大小通过定位到末尾得到，
/// 因此对块设备节点同样有效。
#[derive(Debug)]
pub struct FileDevice {
    file: File,
    sector_size: u32,
    size: u64,
    read_only: bool,
}

impl FileDevice {
    /// 以读写方式打开设备
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file, 512, false)
    }

    /// 以只读方式打开设备
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::from_file(file, 512, true)
    }

    /// 包装已打开的文件
    pub fn from_file(mut file: File, sector_size: u32, read_only: bool) -> Result<Self> {
        let size = file.seek(SeekFrom::End(0))?;
        log::info!(
            "[FILEDEV] opened device: {}M, sector={}",
            size / 1024 / 1024,
            sector_size
        );
        Ok(Self {
            file,
            sector_size,
            size,
            read_only,
        })
    }
}

impl BlockDevice for FileDevice {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn total_sectors(&self) -> u64 {
        self.size / self.sector_size as u64
    }

    fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        let offset = lba * self.sector_size as u64;
        let len = count as usize * self.sector_size as usize;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::from(e).at(offset, len))?;
        self.file
            .read_exact(&mut buf[..len])
            .map_err(|e| Error::from(e).at(offset, len))?;
        Ok(len)
    }

    fn write_sectors(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
        if self.read_only {
            return Err(Error::new(ErrorKind::Io, "Device opened read-only"));
        }
        let offset = lba * self.sector_size as u64;
        let len = count as usize * self.sector_size as usize;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::from(e).at(offset, len))?;
        self.file
            .write_all(&buf[..len])
            .map_err(|e| Error::from(e).at(offset, len))?;
        Ok(len)
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
