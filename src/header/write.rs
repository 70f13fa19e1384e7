//! 缓存头部写入

use crate::{
    block::{BlockDev, BlockDevice},
    consts::HEADER_SIZE,
    error::Result,
    types::CacheHeader,
};
use alloc::vec;

/// 将头部写回块设备
///
/// 写入前会更新校验和。整个保留区（[`HEADER_SIZE`] 字节）都会被覆盖，
/// 编码之外的部分写零。
pub fn write_header<D: BlockDevice>(bdev: &mut BlockDev<D>, header: &mut CacheHeader) -> Result<()> {
    super::checksum::set_checksum(header);

    let mut buf = vec![0u8; HEADER_SIZE as usize];
    header.encode(&mut buf)?;
    bdev.write_bytes(0, &buf)?;

    log::trace!(
        "[HEADER] written: open={}, reindex={}",
        header.open,
        header.reindex
    );
    Ok(())
}
