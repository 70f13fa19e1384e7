//! 扫描数据区重建索引

use super::{Progress, Rebuilder, Rebuilt};
use crate::{
    block::{BlockDev, BlockDevice},
    consts::{REINDEX_CHUNK_SLOTS, RECORD_SIZE, SLOT_SIZE},
    error::Result,
    index::DirtyMask,
    types::{Geometry, SlotRecord},
};
use alloc::vec;

/// 扫描数据区，按每个槽位的内联记录重建索引和空闲链表
///
/// 不依赖元数据区，用于上次会话未正常关闭或元数据区损坏的情况。
/// 需要读遍整个数据区，比 [`super::load_index`] 慢得多。
/// 每处理 `interval` 个槽位调用一次 `progress`，结束时再调用一次。
pub fn reindex_data<D: BlockDevice>(
    bdev: &mut BlockDev<D>,
    geometry: &Geometry,
    template: DirtyMask,
    interval: u64,
    progress: &mut dyn FnMut(Progress),
) -> Result<Rebuilt> {
    let entries = geometry.cache_entries;
    let total = entries as u64;
    let interval = interval.max(1);

    log::info!(
        "[REINDEX] rebuilding index for cache device ({}M, {} slots)",
        geometry.device_bytes / 1024 / 1024,
        entries
    );

    let mut rebuilder = Rebuilder::new(template);
    let mut buf = vec![0u8; REINDEX_CHUNK_SLOTS * SLOT_SIZE];
    let mut first = 0u32;

    while first < entries {
        let count = ((entries - first) as usize).min(REINDEX_CHUNK_SLOTS);
        let chunk = &mut buf[..count * SLOT_SIZE];
        bdev.read_bytes(geometry.slot_offset(first), chunk)?;

        for (i, raw) in chunk.chunks_exact(SLOT_SIZE).enumerate() {
            let slot = first + i as u32;
            let rec = SlotRecord::decode(&raw[..RECORD_SIZE])?;
            if !rec.is_free() {
                log::trace!(
                    "[REINDEX] slot={}, block={}, dirty={}, use={}",
                    slot,
                    rec.block,
                    rec.dirty,
                    rec.use_count
                );
            }
            rebuilder.push(slot, &rec)?;

            let done = slot as u64 + 1;
            if done % interval == 0 {
                progress(Progress { done, total });
            }
        }
        first += count as u32;
    }
    progress(Progress { done: total, total });

    Ok(rebuilder.finish())
}
