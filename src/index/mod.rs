//! 块索引模块
//!
//! 把逻辑块号映射到缓存槽位，并跟踪使用计数和脏位。
//!
//! # 分区
//!
//! - **USED**: 干净块，可以驱逐；另有按使用计数排序的二级索引用于 LFU 驱逐
//! - **DIRTY**: 至少还有一个主机未同步的块
//!
//! 同一个块号在任意时刻最多出现在一个分区中。

mod entry;
mod lfu;

pub use entry::{DirtyMask, IndexEntry, Partition};

use crate::error::{Error, ErrorKind, Result};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use lfu::LfuOrder;

/// USED 分区中的条目，带二级索引序号
#[derive(Debug, Clone, Copy)]
struct Ranked {
    entry: IndexEntry,
    seq: u64,
}

/// 块索引
#[derive(Debug, Clone, Default)]
pub struct BlockIndex {
    used: BTreeMap<u64, Ranked>,
    dirty: BTreeMap<u64, IndexEntry>,
    lfu: LfuOrder,
}

impl BlockIndex {
    /// 创建空索引
    pub fn new() -> Self {
        Self {
            used: BTreeMap::new(),
            dirty: BTreeMap::new(),
            lfu: LfuOrder::new(),
        }
    }

    /// 查找块，先查 USED 再查 DIRTY
    pub fn lookup(&self, block: u64) -> Option<(Partition, &IndexEntry)> {
        if let Some(ranked) = self.used.get(&block) {
            return Some((Partition::Used, &ranked.entry));
        }
        self.dirty.get(&block).map(|e| (Partition::Dirty, e))
    }

    /// 块是否在索引中
    pub fn contains(&self, block: u64) -> bool {
        self.used.contains_key(&block) || self.dirty.contains_key(&block)
    }

    /// 记录一次访问（使用计数 +1）
    ///
    /// # 返回
    ///
    /// 更新后的条目，块不存在时返回 None
    pub fn record_access(&mut self, block: u64) -> Option<IndexEntry> {
        if let Some(ranked) = self.used.get_mut(&block) {
            self.lfu.remove(ranked.entry.use_count, ranked.seq);
            ranked.entry.use_count = ranked.entry.use_count.saturating_add(1);
            ranked.seq = self.lfu.insert(ranked.entry.use_count, block);
            return Some(ranked.entry);
        }
        let entry = self.dirty.get_mut(&block)?;
        entry.use_count = entry.use_count.saturating_add(1);
        Some(*entry)
    }

    /// 写入块：更新已有条目或插入新条目
    ///
    /// 已有条目保留原槽位（`slot` 参数被忽略），使用计数 +1；
    /// 新条目使用 `slot`，使用计数为 1。掩码不是 `USED` 时放入 DIRTY。
    pub fn insert_or_update(&mut self, block: u64, slot: u32, dirty: DirtyMask) -> IndexEntry {
        let entry = match self.take(block) {
            Some(mut existing) => {
                debug_assert_eq!(existing.slot, slot);
                existing.use_count = existing.use_count.saturating_add(1);
                existing.dirty = dirty;
                existing
            }
            None => IndexEntry {
                block,
                slot,
                use_count: 1,
                dirty,
            },
        };
        self.place(entry);
        entry
    }

    /// 插入从磁盘重建的条目
    ///
    /// # 错误
    ///
    /// 块号已存在时返回 `Corrupted`
    pub fn insert_loaded(&mut self, entry: IndexEntry) -> Result<()> {
        if self.contains(entry.block) {
            log::error!(
                "[INDEX] block {} recorded in more than one slot (slot {})",
                entry.block,
                entry.slot
            );
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Block recorded in more than one slot",
            ));
        }
        self.place(entry);
        Ok(())
    }

    /// 标记某主机已同步该块
    ///
    /// # 返回
    ///
    /// 掩码收缩为 `USED`、条目移入 USED 分区时返回 true
    ///
    /// # 错误
    ///
    /// - `InvalidHost`: `host` 不在 `1..=host_count` 内
    /// - `NotCached`: 块不在 DIRTY 分区
    pub fn mark_host_flushed(&mut self, block: u64, host: usize, host_count: usize) -> Result<bool> {
        let bit = match DirtyMask::host(host) {
            Some(bit) if host <= host_count => bit,
            _ => {
                log::error!("[INDEX] invalid host number ({}) in flush", host);
                return Err(Error::new(ErrorKind::InvalidHost, "Host number out of range"));
            }
        };

        let Some(entry) = self.dirty.get_mut(&block) else {
            log::error!("[INDEX] attempt to flush uncached block [{}]", block);
            return Err(Error::new(ErrorKind::NotCached, "Block not in dirty partition"));
        };

        if !entry.dirty.contains(bit) {
            log::debug!("[INDEX] block {} already flushed to host {}", block, host);
        }
        entry.dirty.remove(bit);

        if !entry.dirty.is_clean() {
            return Ok(false);
        }

        if let Some(entry) = self.dirty.remove(&block) {
            self.place(entry);
        }
        Ok(true)
    }

    /// 从 USED 分区移除块
    pub fn remove_used(&mut self, block: u64) -> Option<IndexEntry> {
        let ranked = self.used.remove(&block)?;
        self.lfu.remove(ranked.entry.use_count, ranked.seq);
        Some(ranked.entry)
    }

    /// 使用计数最小的 `n` 个 USED 条目
    pub fn eviction_candidates(&self, n: usize) -> Vec<IndexEntry> {
        self.used().take(n).copied().collect()
    }

    /// USED 分区，按使用计数升序
    pub fn used(&self) -> impl Iterator<Item = &IndexEntry> + '_ {
        self.lfu
            .iter()
            .filter_map(move |block| self.used.get(&block).map(|r| &r.entry))
    }

    /// DIRTY 分区，按块号升序
    pub fn dirty(&self) -> impl Iterator<Item = &IndexEntry> + '_ {
        self.dirty.values()
    }

    /// 所有条目
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> + '_ {
        self.used.values().map(|r| &r.entry).chain(self.dirty.values())
    }

    /// USED 条目数
    pub fn used_len(&self) -> usize {
        self.used.len()
    }

    /// DIRTY 条目数
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// 条目总数
    pub fn len(&self) -> usize {
        self.used.len() + self.dirty.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 清空
    pub fn clear(&mut self) {
        self.used.clear();
        self.dirty.clear();
        self.lfu.clear();
    }

    /// 从任一分区取出条目
    fn take(&mut self, block: u64) -> Option<IndexEntry> {
        if let Some(entry) = self.remove_used(block) {
            return Some(entry);
        }
        self.dirty.remove(&block)
    }

    /// 按掩码放入对应分区
    fn place(&mut self, entry: IndexEntry) {
        match entry.partition() {
            Partition::Used => {
                let seq = self.lfu.insert(entry.use_count, entry.block);
                self.used.insert(entry.block, Ranked { entry, seq });
            }
            Partition::Dirty => {
                self.dirty.insert(entry.block, entry);
            }
        }
        debug_assert_eq!(self.lfu.len(), self.used.len());
    }
}
