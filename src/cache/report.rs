//! 只读诊断：列表、统计、一致性检查

use super::Cache;
use crate::{
    block::BlockDevice,
    consts::RECORD_SIZE,
    error::Result,
    index::{DirtyMask, IndexEntry, Partition},
    types::SlotRecord,
};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;

/// 列表中的一行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingRow {
    /// 槽位
    pub slot: u32,
    /// 逻辑块号
    pub block: u64,
    /// 脏位掩码
    pub dirty: DirtyMask,
    /// 使用计数
    pub use_count: u32,
    /// 所在分区
    pub partition: Partition,
}

/// 缓存内容列表，按槽位排序
///
/// `Display` 输出一张表，flags 列中 `D`/`U` 表示分区，
/// 后面每个主机一个字符：`*` 待同步，`-` 已同步。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheListing {
    /// 各行
    pub rows: Vec<ListingRow>,
    /// 主机数
    pub host_count: usize,
    /// 槽位总数
    pub cache_entries: u32,
    /// 空闲槽位数
    pub free: u64,
}

impl fmt::Display for CacheListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>10} {:>20} {:>8} {:>10}", "slot", "block", "flags", "use")?;
        for row in &self.rows {
            let mut flags = [b' '; 1 + crate::consts::MAX_HOSTS];
            flags[0] = match row.partition {
                Partition::Used => b'U',
                Partition::Dirty => b'D',
            };
            for host in 1..=self.host_count {
                let pending = DirtyMask::host(host).is_some_and(|bit| row.dirty.contains(bit));
                flags[host] = if pending { b'*' } else { b'-' };
            }
            let flags = core::str::from_utf8(&flags[..1 + self.host_count]).unwrap_or("?");
            writeln!(
                f,
                "{:>10} {:>20} {:>8} {:>10}",
                row.slot, row.block, flags, row.use_count
            )?;
        }
        write!(
            f,
            "{} cached, {} free, {} slots",
            self.rows.len(),
            self.free,
            self.cache_entries
        )
    }
}

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// 槽位总数
    pub cache_entries: u32,
    /// 干净块数
    pub used: usize,
    /// 脏块数
    pub dirty: usize,
    /// 空闲槽位数
    pub free: u64,
    /// 空闲段数
    pub free_runs: usize,
    /// 读命中次数
    pub hits: u64,
    /// 读未命中次数
    pub misses: u64,
    /// 写入次数
    pub writes: u64,
    /// 主机同步次数
    pub flushes: u64,
    /// 驱逐块数
    pub expired: u64,
    /// 负载缓冲中的块数
    pub buffered: usize,
    /// 负载缓冲命中次数
    pub buffer_hits: u64,
    /// 设备物理读次数
    pub device_reads: u64,
    /// 设备物理写次数
    pub device_writes: u64,
}

impl CacheStats {
    /// 读命中率
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// 已占用槽位比例
    pub fn fill_ratio(&self) -> f64 {
        if self.cache_entries == 0 {
            0.0
        } else {
            (self.used + self.dirty) as f64 / self.cache_entries as f64
        }
    }
}

/// 一致性检查结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// 检查的条目数
    pub checked: usize,
    /// 内联记录与索引不一致的槽位
    pub mismatched: Vec<u32>,
    /// 被多个条目占用的槽位
    pub shared_slots: Vec<u32>,
    /// 既在索引中又在空闲链表中的槽位
    pub free_and_used: Vec<u32>,
    /// 既不在索引也不在空闲链表中的槽位数
    pub unaccounted: u64,
    /// 脏位掩码与所在分区不符的槽位（缺少 USED，或 DIRTY 中的块已经干净）
    pub bad_masks: Vec<u32>,
}

impl VerifyReport {
    /// 是否没有发现问题
    pub fn is_ok(&self) -> bool {
        self.mismatched.is_empty()
            && self.shared_slots.is_empty()
            && self.free_and_used.is_empty()
            && self.unaccounted == 0
            && self.bad_masks.is_empty()
    }
}

impl<D: BlockDevice> Cache<D> {
    /// 列出所有缓存条目
    pub fn list(&self) -> Result<CacheListing> {
        self.require_open()?;

        let mut rows: Vec<ListingRow> = self
            .index
            .entries()
            .map(|e| ListingRow {
                slot: e.slot,
                block: e.block,
                dirty: e.dirty,
                use_count: e.use_count,
                partition: e.partition(),
            })
            .collect();
        rows.sort_unstable_by_key(|r| r.slot);

        Ok(CacheListing {
            rows,
            host_count: self.host_count(),
            cache_entries: self.geometry.cache_entries,
            free: self.free.free_count(),
        })
    }

    /// 统计信息
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cache_entries: self.geometry.cache_entries,
            used: self.index.used_len(),
            dirty: self.index.dirty_len(),
            free: self.free.free_count(),
            free_runs: self.free.run_count(),
            hits: self.counters.hits,
            misses: self.counters.misses,
            writes: self.counters.writes,
            flushes: self.counters.flushes,
            expired: self.counters.expired,
            buffered: self.buffer.len(),
            buffer_hits: self.buffer.hits(),
            device_reads: self.bdev.physical_read_count(),
            device_writes: self.bdev.physical_write_count(),
        }
    }

    /// 检查内存结构与数据区内联记录是否一致
    ///
    /// 读取每个已缓存槽位的内联记录并与索引比较，检查槽位独占和空闲链表不相交。
    pub fn verify(&mut self) -> Result<VerifyReport> {
        self.require_open()?;

        let mut report = VerifyReport::default();
        let mut owners: BTreeMap<u32, u64> = BTreeMap::new();
        let entries: Vec<_> = self.index.entries().copied().collect();
        let free_runs = merged_runs(self.free.runs());

        for entry in &entries {
            report.checked += 1;
            if owners.insert(entry.slot, entry.block).is_some() {
                report.shared_slots.push(entry.slot);
            }
            if in_runs(&free_runs, entry.slot) {
                report.free_and_used.push(entry.slot);
            }
            if !mask_fits(entry) {
                log::warn!(
                    "[VERIFY] slot {} block {} has mask {:#04x} in the wrong partition",
                    entry.slot,
                    entry.block,
                    entry.dirty.bits()
                );
                report.bad_masks.push(entry.slot);
            }

            let mut raw = [0u8; RECORD_SIZE];
            self.bdev
                .read_bytes(self.geometry.slot_offset(entry.slot), &mut raw)?;
            if SlotRecord::decode(&raw)? != entry.record() {
                log::warn!(
                    "[VERIFY] slot {} inline record differs from index (block {})",
                    entry.slot,
                    entry.block
                );
                report.mismatched.push(entry.slot);
            }
        }

        let accounted = owners.len() as u64 + self.free.free_count();
        report.unaccounted = (self.geometry.cache_entries as u64).saturating_sub(accounted);

        log::info!(
            "[VERIFY] {} entries checked, {} mismatched, {} shared, {} free+used, {} bad masks, {} unaccounted",
            report.checked,
            report.mismatched.len(),
            report.shared_slots.len(),
            report.free_and_used.len(),
            report.bad_masks.len(),
            report.unaccounted
        );
        Ok(report)
    }
}

/// USED 分区只放干净块，DIRTY 分区只放带 USED 且仍有待同步主机的块
fn mask_fits(entry: &IndexEntry) -> bool {
    if !entry.dirty.contains(DirtyMask::USED) {
        return false;
    }
    entry.dirty.is_clean() == (entry.partition() == Partition::Used)
}

/// 按起点排序并合并重叠的空闲段，得到 `(起点, 终点)` 半开区间
fn merged_runs(runs: impl Iterator<Item = (u32, u32)>) -> Vec<(u32, u32)> {
    let mut spans: Vec<(u32, u32)> = runs
        .filter(|&(_, len)| len > 0)
        .map(|(start, len)| (start, start.saturating_add(len)))
        .collect();
    spans.sort_unstable();

    let mut merged: Vec<(u32, u32)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn in_runs(runs: &[(u32, u32)], slot: u32) -> bool {
    let idx = runs.partition_point(|&(start, _)| start <= slot);
    idx > 0 && slot < runs[idx - 1].1
}
