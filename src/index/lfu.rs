//! 按使用计数排序的二级索引
//!
//! 键为 `(use_count, seq)`：使用计数相同的条目按进入该计数的先后排序。

use alloc::collections::BTreeMap;

/// LFU 排序
#[derive(Debug, Clone, Default)]
pub(crate) struct LfuOrder {
    order: BTreeMap<(u32, u64), u64>,
    next_seq: u64,
}

impl LfuOrder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 插入块，返回它的序号
    pub(crate) fn insert(&mut self, use_count: u32, block: u64) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert((use_count, seq), block);
        seq
    }

    pub(crate) fn remove(&mut self, use_count: u32, seq: u64) -> Option<u64> {
        self.order.remove(&(use_count, seq))
    }

    /// 按使用计数升序遍历块号
    pub(crate) fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.order.values().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.next_seq = 0;
    }
}
