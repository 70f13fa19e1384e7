//! 空闲槽位分配模块
//!
//! 空闲槽位按连续段（run）管理，每个段以长度分桶：`buckets[n]` 保存所有长度为 `n`
//! 的段的起始槽位，按后进先出使用。
//!
//! 块设备负载通常有局部性，连续分配/释放的槽位大多相邻，按段长分桶让分配和释放
//! 都接近 O(1)，不需要维护全局有序的空闲集合。
//!
//! - [`FreeList::allocate`] 取最小的可满足段，剩余部分放回对应的桶
//! - [`FreeList::release`] 把相邻释放的槽位累积成待定段，遇到不相邻槽位或段满时入桶
//! - [`FreeList::end_batch`] 结束一批释放，把待定段入桶
//!
//! 释放必须按批次、升序提交，否则相邻槽位无法合并成段。

mod alloc;
mod free;

use crate::{consts::MAX_RUN, types::SlotRecord};
use ::alloc::vec;
use ::alloc::vec::Vec;

/// 正在累积的待定段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRun {
    start: u32,
    len: u32,
}

/// 单个桶的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// 段长度
    pub len: u32,
    /// 该长度的段数量
    pub runs: usize,
    /// 桶顶（下一次分配使用）的段起始槽位
    pub head: u32,
}

/// 空闲槽位分配器
#[derive(Debug, Clone)]
pub struct FreeList {
    /// 下标为段长度，`buckets[0]` 不使用
    buckets: Vec<Vec<u32>>,
    /// 桶中的空闲槽位总数
    bucketed: u64,
    /// 尚未入桶的待定段
    pending: Option<PendingRun>,
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeList {
    /// 创建空分配器
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); MAX_RUN + 1],
            bucketed: 0,
            pending: None,
        }
    }

    /// 从槽位记录重建分配器
    ///
    /// `records[i]` 是槽位 `i` 的记录，dirty 为 0 的槽位视为空闲。
    /// 产生的分桶结构与运行时逐个释放相同。
    pub fn load<I>(records: I) -> Self
    where
        I: IntoIterator<Item = SlotRecord>,
    {
        let mut list = Self::new();
        for (slot, rec) in records.into_iter().enumerate() {
            if rec.is_free() {
                list.release(slot as u32);
            }
        }
        list.end_batch();
        log::debug!(
            "[FREELIST] loaded {} free slots in {} runs",
            list.free_count(),
            list.run_count()
        );
        list
    }

    /// 把一个段放入对应长度的桶
    fn push_run(&mut self, start: u32, len: u32) {
        debug_assert!(len as usize >= 1 && len as usize <= MAX_RUN);
        self.buckets[len as usize].push(start);
        self.bucketed += len as u64;
    }

    /// 空闲槽位总数（包括待定段）
    pub fn free_count(&self) -> u64 {
        self.bucketed + self.pending.map_or(0, |p| p.len as u64)
    }

    /// 可立即分配的槽位数
    pub fn available(&self) -> u64 {
        self.bucketed
    }

    /// 桶中的段数量
    pub fn run_count(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// 是否没有任何空闲槽位
    pub fn is_empty(&self) -> bool {
        self.free_count() == 0
    }

    /// 每种段长度的统计，按长度升序
    pub fn histogram(&self) -> Vec<RunStats> {
        self.buckets
            .iter()
            .enumerate()
            .filter_map(|(len, runs)| {
                runs.last().map(|&head| RunStats {
                    len: len as u32,
                    runs: runs.len(),
                    head,
                })
            })
            .collect()
    }

    /// 所有空闲段 `(起始槽位, 长度)`，包括待定段
    pub fn runs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.buckets
            .iter()
            .enumerate()
            .flat_map(|(len, starts)| starts.iter().map(move |&s| (s, len as u32)))
            .chain(self.pending.map(|p| (p.start, p.len)))
    }

    /// 所有空闲槽位
    pub fn slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.runs().flat_map(|(start, len)| start..start + len)
    }

    /// 槽位是否空闲
    pub fn contains(&self, slot: u32) -> bool {
        self.runs()
            .any(|(start, len)| slot >= start && slot < start + len)
    }

    /// 清空
    pub fn clear(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
        self.bucketed = 0;
        self.pending = None;
    }
}
