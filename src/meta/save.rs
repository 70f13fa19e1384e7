//! 索引保存

use super::SaveReport;
use crate::{
    block::{BlockDev, BlockDevice},
    consts::{META_CHUNK_RECORDS, RECORD_SIZE},
    error::{Error, ErrorKind, Result},
    index::{BlockIndex, Partition},
    types::{Geometry, SlotRecord},
};
use alloc::collections::BTreeMap;
use alloc::vec;

/// 把索引写入元数据区
///
/// 遍历 USED 和 DIRTY 两个分区，把每个条目的 `{block, use_count, dirty}`
/// 写到其槽位对应的元数据记录；没有条目的槽位写零记录（空闲）。
/// 元数据区按批写出，不需要一次性分配整个区域。
///
/// # 错误
///
/// 写入失败时中止；两个条目指向同一槽位时返回 `Corrupted`
pub fn save_index<D: BlockDevice>(
    bdev: &mut BlockDev<D>,
    geometry: &Geometry,
    index: &BlockIndex,
) -> Result<SaveReport> {
    let mut report = SaveReport::default();
    let mut owners: BTreeMap<u32, SlotRecord> = BTreeMap::new();

    let tagged = index
        .used()
        .map(|e| (Partition::Used, e))
        .chain(index.dirty().map(|e| (Partition::Dirty, e)));

    for (part, entry) in tagged {
        if owners.insert(entry.slot, entry.record()).is_some() {
            log::error!("[META] slot {} owned by more than one block", entry.slot);
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Slot owned by more than one block",
            ));
        }
        match part {
            Partition::Used => report.used += 1,
            Partition::Dirty => report.dirty += 1,
        }
    }

    let entries = geometry.cache_entries;
    let mut buf = vec![0u8; META_CHUNK_RECORDS * RECORD_SIZE];
    let mut first = 0u32;

    while first < entries {
        let count = ((entries - first) as usize).min(META_CHUNK_RECORDS);
        let last = first + count as u32;
        let chunk = &mut buf[..count * RECORD_SIZE];
        chunk.fill(0);

        for (&slot, rec) in owners.range(first..last) {
            let at = (slot - first) as usize * RECORD_SIZE;
            rec.encode(&mut chunk[at..at + RECORD_SIZE])?;
        }

        bdev.write_bytes(geometry.meta_offset(first), chunk)?;
        first = last;
    }

    log::info!(
        "[META] cache save :: {} used, {} dirty, meta={}K",
        report.used,
        report.dirty,
        geometry.meta_size() / 1024
    );
    Ok(report)
}
