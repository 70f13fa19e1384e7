//! LFU 驱逐

use super::Cache;
use crate::{
    block::BlockDevice,
    consts::BLOCK_SIZE,
    error::Result,
    types::SlotRecord,
};
use alloc::vec::Vec;

impl<D: BlockDevice> Cache<D> {
    /// 驱逐最多 `count` 个使用计数最小的干净块
    ///
    /// 脏块永远不会被驱逐。被驱逐槽位的内联记录清零，
    /// 槽位按升序一次性归还分配器，相邻槽位合并成段。
    ///
    /// # 返回
    ///
    /// 实际驱逐的块数，干净块不足时小于 `count`
    pub fn expire(&mut self, count: usize) -> Result<usize> {
        self.require_open()?;

        let victims = self.index.eviction_candidates(count);
        if victims.len() < count {
            log::warn!(
                "[EXPIRE] only {} clean blocks can be expired, {} requested ({} dirty)",
                victims.len(),
                count,
                self.index.dirty_len()
            );
        }

        let zero = SlotRecord::FREE.to_bytes();
        let mut slots = Vec::with_capacity(victims.len());
        let mut outcome = Ok(());

        for victim in &victims {
            let offset = self.geometry.slot_offset(victim.slot);
            if let Err(err) = self.bdev.write_bytes(offset, &zero) {
                log::error!("[EXPIRE] clearing slot {} failed: {}", victim.slot, err);
                outcome = Err(err);
                break;
            }
            self.index.remove_used(victim.block);
            self.buffer.invalidate(victim.slot);
            slots.push(victim.slot);
            log::trace!(
                "[EXPIRE] block={} slot={} use={}",
                victim.block,
                victim.slot,
                victim.use_count
            );
        }

        slots.sort_unstable();
        for &slot in &slots {
            self.free.release(slot);
        }
        self.free.end_batch();
        self.counters.expired += slots.len() as u64;
        outcome?;

        if self.config.discard_on_expire {
            for &slot in &slots {
                let offset = self.geometry.payload_offset(slot);
                if let Err(err) = self.bdev.discard_bytes(offset, BLOCK_SIZE as u64) {
                    log::debug!("[EXPIRE] discard for slot {} ignored: {}", slot, err);
                }
            }
        }

        log::debug!(
            "[EXPIRE] expired {} blocks, {} free slots",
            slots.len(),
            self.free.free_count()
        );
        Ok(slots.len())
    }
}
