//! 缓存头部校验和计算

use crate::{consts::HEADER_PACKED_SIZE, types::CacheHeader};

/// 计算头部的 CRC32 校验和
///
/// 覆盖范围：从魔数到 reindex 标志（checksum 字段之前的所有字段）
pub fn compute_checksum(header: &CacheHeader) -> u32 {
    let mut buf = [0u8; HEADER_PACKED_SIZE + 4];
    // 缓冲区长度固定满足编码要求
    let _ = header.encode(&mut buf);
    crc32fast::hash(&buf[..HEADER_PACKED_SIZE])
}

/// 验证头部校验和
///
/// # 返回
///
/// 校验和正确或未记录（为 0）时返回 `true`
pub fn verify_checksum(header: &CacheHeader) -> bool {
    header.checksum == 0 || header.checksum == compute_checksum(header)
}

/// 更新头部的校验和字段
pub fn set_checksum(header: &mut CacheHeader) {
    header.checksum = compute_checksum(header);
}
