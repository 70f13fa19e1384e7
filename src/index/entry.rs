//! 索引条目与脏位掩码

use crate::{
    consts::{MAX_HOSTS, SLOT_USED},
    types::SlotRecord,
};
use bitflags::bitflags;

bitflags! {
    /// 脏位掩码
    ///
    /// 第 0 位是“已使用”标记，第 `i` 位（1..=6）表示主机 `i` 尚未收到该块。
    /// 只剩 `USED` 位时块是干净的；全零表示槽位空闲（只出现在磁盘记录中）。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirtyMask: u8 {
        /// 已使用（干净）标记
        const USED   = 0x01;
        /// 主机 1 待同步
        const HOST_1 = 0x02;
        /// 主机 2 待同步
        const HOST_2 = 0x04;
        /// 主机 3 待同步
        const HOST_3 = 0x08;
        /// 主机 4 待同步
        const HOST_4 = 0x10;
        /// 主机 5 待同步
        const HOST_5 = 0x20;
        /// 主机 6 待同步
        const HOST_6 = 0x40;
    }
}

impl DirtyMask {
    /// 所有主机都待同步的掩码：`(1 << (host_count + 1)) - 1`
    pub fn all_pending(host_count: usize) -> Self {
        let n = host_count.min(MAX_HOSTS) as u32;
        Self::from_bits_retain(((1u16 << (n + 1)) - 1) as u8)
    }

    /// 主机 `index`（从 1 开始）对应的位
    pub fn host(index: usize) -> Option<Self> {
        if (1..=MAX_HOSTS).contains(&index) {
            Some(Self::from_bits_retain(1 << index))
        } else {
            None
        }
    }

    /// 从磁盘记录的 dirty 字节构造
    pub fn from_disk(raw: u8) -> Self {
        Self::from_bits_retain(raw)
    }

    /// 是否只剩 `USED` 位
    pub fn is_clean(self) -> bool {
        self == Self::USED
    }

    /// 尚未同步的主机数
    pub fn pending_hosts(self) -> u32 {
        self.difference(Self::USED).bits().count_ones()
    }
}

/// 条目所在的分区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// 干净、可驱逐
    Used,
    /// 等待同步到远端主机
    Dirty,
}

/// 索引条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// 逻辑块号
    pub block: u64,
    /// 槽位
    pub slot: u32,
    /// 使用计数
    pub use_count: u32,
    /// 脏位掩码
    pub dirty: DirtyMask,
}

impl IndexEntry {
    /// 由槽位记录构造
    pub fn from_record(slot: u32, rec: &SlotRecord) -> Self {
        Self {
            block: rec.block,
            slot,
            use_count: rec.use_count,
            dirty: DirtyMask::from_disk(rec.dirty),
        }
    }

    /// 对应的磁盘记录
    pub fn record(&self) -> SlotRecord {
        SlotRecord {
            block: self.block,
            use_count: self.use_count,
            dirty: self.dirty.bits(),
        }
    }

    /// 根据掩码判断应在的分区
    pub fn partition(&self) -> Partition {
        if self.dirty.bits() == SLOT_USED {
            Partition::Used
        } else {
            Partition::Dirty
        }
    }
}
