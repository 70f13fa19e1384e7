//! 设备格式化

use super::Progress;
use crate::{
    block::{BlockDev, BlockDevice},
    consts::FORMAT_CHUNK_SIZE,
    error::Result,
    header::write_header,
    types::{CacheHeader, Geometry},
};
use alloc::vec;
use core::net::Ipv4Addr;

/// 格式化缓存设备
///
/// 清零整个设备（元数据区和数据区），然后写入带魔数、设备大小和主机列表的新头部。
/// 这是一个可能持续很久的破坏性操作，每写完 `interval` 个块调用一次 `progress`，
/// 结束时再调用一次。
///
/// # 错误
///
/// 任何写入失败都会中止格式化；主机过多时返回 `Config`
pub fn format_device<D: BlockDevice>(
    bdev: &mut BlockDev<D>,
    hosts: &[Ipv4Addr],
    interval: u64,
    progress: &mut dyn FnMut(Progress),
) -> Result<CacheHeader> {
    let total = bdev.size();
    let geometry = Geometry::from_device_size(total)?;
    let mut header = CacheHeader::new(total, hosts)?;

    log::info!("[FORMAT] formatting cache device ({}M)", total / 1024 / 1024);

    let zeros = vec![0u8; FORMAT_CHUNK_SIZE];
    let interval = interval.max(1);
    let mut done = 0u64;
    let mut chunks = 0u64;

    while done < total {
        let size = (total - done).min(FORMAT_CHUNK_SIZE as u64) as usize;
        bdev.write_bytes(done, &zeros[..size])?;
        done += size as u64;
        chunks += 1;
        if chunks % interval == 0 {
            progress(Progress { done, total });
        }
    }
    progress(Progress { done, total });

    write_header(bdev, &mut header)?;
    log::info!(
        "[FORMAT] cache initialised, ready for {} entries",
        geometry.cache_entries
    );
    Ok(header)
}
