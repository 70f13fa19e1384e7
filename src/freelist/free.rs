//! 槽位释放功能

use super::{FreeList, PendingRun};
use crate::consts::MAX_RUN;

impl FreeList {
    /// 释放单个槽位
    ///
    /// 与待定段相邻的槽位直接并入待定段；不相邻或待定段已达 [`MAX_RUN`] 时，
    /// 先把待定段放入桶，再以该槽位开始新的待定段。
    ///
    /// 释放的槽位在 [`FreeList::end_batch`] 之前可能仍处于待定段中，不能被分配。
    pub fn release(&mut self, slot: u32) {
        if let Some(run) = self.pending.as_mut() {
            let adjacent = run.start.checked_add(run.len) == Some(slot);
            if adjacent && (run.len as usize) < MAX_RUN {
                run.len += 1;
                return;
            }
        }
        self.flush_pending();
        self.pending = Some(PendingRun { start: slot, len: 1 });
    }

    /// 结束一批释放，把待定段放入桶
    pub fn end_batch(&mut self) {
        self.flush_pending();
    }

    fn flush_pending(&mut self) {
        if let Some(run) = self.pending.take() {
            self.push_run(run.start, run.len);
        }
    }
}
