//! 从元数据区加载索引

use super::{Rebuilder, Rebuilt};
use crate::{
    block::{BlockDev, BlockDevice},
    consts::{META_CHUNK_RECORDS, RECORD_SIZE},
    error::{Error, ErrorKind, Result},
    index::DirtyMask,
    types::{Geometry, SlotRecord},
};
use alloc::vec;

/// 一次扫描元数据区，重建索引和空闲链表
///
/// dirty 为 0 的槽位进入空闲链表，其余按 dirty 值进入 USED 或 DIRTY。
///
/// # 参数
///
/// * `template` - 打开时计算的全主机待同步掩码，用于校验记录
///
/// # 错误
///
/// - `Corrupted`: 元数据区超出设备、记录的脏位超出主机配置、同一块出现在多个槽位
/// - `Io`: 读取失败
pub fn load_index<D: BlockDevice>(
    bdev: &mut BlockDev<D>,
    geometry: &Geometry,
    template: DirtyMask,
) -> Result<Rebuilt> {
    if geometry.meta_offset(geometry.cache_entries) > bdev.size() {
        log::error!("[META] metadata region is wrong size for this device");
        return Err(Error::new(
            ErrorKind::Corrupted,
            "Metadata region exceeds device",
        ));
    }

    let mut rebuilder = Rebuilder::new(template);
    let entries = geometry.cache_entries;
    let mut buf = vec![0u8; META_CHUNK_RECORDS * RECORD_SIZE];
    let mut first = 0u32;

    while first < entries {
        let count = ((entries - first) as usize).min(META_CHUNK_RECORDS);
        let chunk = &mut buf[..count * RECORD_SIZE];
        bdev.read_bytes(geometry.meta_offset(first), chunk)?;

        for (i, raw) in chunk.chunks_exact(RECORD_SIZE).enumerate() {
            let rec = SlotRecord::decode(raw)?;
            rebuilder.push(first + i as u32, &rec)?;
        }
        first += count as u32;
    }

    Ok(rebuilder.finish())
}
