//! 缓存头部读取和验证

use crate::{
    block::{BlockDev, BlockDevice},
    consts::HEADER_SIZE,
    error::{Error, ErrorKind, Result},
    types::CacheHeader,
};
use alloc::vec;

/// 从块设备读取缓存头部
///
/// # 错误
///
/// - `Format`: 魔数不匹配（设备未格式化或不是缓存设备）
/// - `Corrupted`: 头部校验和不匹配
pub fn read_header<D: BlockDevice>(bdev: &mut BlockDev<D>) -> Result<CacheHeader> {
    let mut buf = vec![0u8; HEADER_SIZE as usize];
    bdev.read_bytes(0, &mut buf)?;

    let header = CacheHeader::decode(&buf)?;

    // 验证魔数
    if !header.is_valid() {
        log::error!("[HEADER] bad magic in cache header - reformat this device");
        return Err(Error::new(
            ErrorKind::Format,
            "Bad magic in cache header",
        ));
    }

    if !super::checksum::verify_checksum(&header) {
        log::error!("[HEADER] cache header checksum mismatch");
        return Err(Error::new(
            ErrorKind::Corrupted,
            "Cache header checksum mismatch",
        ));
    }

    log::debug!(
        "[HEADER] device size {}M, {} hosts, open={}, reindex={}",
        header.device_bytes() / 1024 / 1024,
        header.host_count,
        header.open,
        header.reindex
    );
    Ok(header)
}
