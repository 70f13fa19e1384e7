//! 元数据持久化模块
//!
//! 在内存索引/空闲链表与磁盘布局之间转换：
//!
//! ```text
//! [Header][Metadata: cache_entries × SlotRecord][Data: cache_entries × (SlotRecord + payload)]
//! ```
//!
//! - [`format_device`] - 清零整个设备并写入新头部
//! - [`save_index`] - 把两个分区写入元数据区
//! - [`load_index`] - 一次扫描元数据区重建索引和空闲链表
//! - [`reindex_data`] - 元数据区不可信时，扫描数据区中每个槽位的内联记录重建
//!
//! `load_index` 和 `reindex_data` 共用同一个重建过程，对同一份记录产生相同的状态。

mod format;
mod load;
mod reindex;
mod save;

pub use format::format_device;
pub use load::load_index;
pub use reindex::reindex_data;
pub use save::save_index;

use crate::{
    error::{Error, ErrorKind, Result},
    freelist::FreeList,
    index::{BlockIndex, DirtyMask, IndexEntry, Partition},
    types::SlotRecord,
};

/// 长时间操作的进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// 已完成的单位数（字节或槽位）
    pub done: u64,
    /// 总单位数
    pub total: u64,
}

impl Progress {
    /// 完成百分比
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            100
        } else {
            (self.done.min(self.total) * 100 / self.total) as u32
        }
    }
}

/// 保存结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// 写入的干净条目数
    pub used: usize,
    /// 写入的脏条目数
    pub dirty: usize,
}

/// 加载/重建结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// 干净条目数
    pub used: usize,
    /// 脏条目数
    pub dirty: usize,
    /// 空闲槽位数
    pub free: u64,
}

/// 重建得到的内存状态
#[derive(Debug)]
pub struct Rebuilt {
    /// 块索引
    pub index: BlockIndex,
    /// 空闲链表
    pub free: FreeList,
    /// 统计
    pub report: LoadReport,
}

/// 按槽位顺序逐条消费记录的重建器
struct Rebuilder {
    index: BlockIndex,
    free: FreeList,
    template: DirtyMask,
    report: LoadReport,
}

impl Rebuilder {
    fn new(template: DirtyMask) -> Self {
        Self {
            index: BlockIndex::new(),
            free: FreeList::new(),
            template,
            report: LoadReport::default(),
        }
    }

    /// 处理槽位 `slot` 的记录；调用顺序必须是槽位升序
    fn push(&mut self, slot: u32, rec: &SlotRecord) -> Result<()> {
        if rec.is_free() {
            self.free.release(slot);
            self.report.free += 1;
            return Ok(());
        }

        let entry = IndexEntry::from_record(slot, rec);
        if !self.template.contains(entry.dirty) {
            log::error!(
                "[META] slot {} block {} has dirty bits {:#04x} outside host mask {:#04x}",
                slot,
                rec.block,
                rec.dirty,
                self.template.bits()
            );
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Slot record dirty bits exceed configured hosts",
            ));
        }

        if !entry.dirty.contains(DirtyMask::USED) {
            log::error!(
                "[META] slot {} block {} has dirty bits {:#04x} without USED",
                slot,
                rec.block,
                rec.dirty
            );
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Slot record is neither free nor marked used",
            ));
        }

        self.index.insert_loaded(entry)?;
        match entry.partition() {
            Partition::Used => self.report.used += 1,
            Partition::Dirty => self.report.dirty += 1,
        }
        Ok(())
    }

    fn finish(mut self) -> Rebuilt {
        self.free.end_batch();
        log::info!(
            "[META] loaded {} used, {} dirty, free list size = {}",
            self.report.used,
            self.report.dirty,
            self.report.free
        );
        Rebuilt {
            index: self.index,
            free: self.free,
            report: self.report,
        }
    }
}
