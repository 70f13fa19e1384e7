//! 主机同步标记

use super::{Cache, FlushState};
use crate::{
    block::BlockDevice,
    error::{Error, ErrorKind, Result},
    index::DirtyMask,
};
use alloc::vec::Vec;

impl<D: BlockDevice> Cache<D> {
    /// 标记主机 `host`（从 1 开始）已收到块 `block`
    ///
    /// 清除该主机的脏位并写回内联记录。所有主机都同步后块移入 USED，可以被驱逐。
    ///
    /// # 错误
    ///
    /// - `InvalidHost`: `host` 不在 `1..=host_count` 内
    /// - `NotCached`: 块不在 DIRTY 分区（未缓存，或已经干净）
    pub fn flush(&mut self, block: u64, host: usize) -> Result<FlushState> {
        self.require_open()?;

        let host_count = self.host_count();
        let collapsed = self.index.mark_host_flushed(block, host, host_count)?;
        let Some((_, entry)) = self.index.lookup(block) else {
            return Err(Error::new(ErrorKind::NotCached, "Block vanished from index"));
        };
        let entry = *entry;
        self.persist_record(&entry)?;
        self.counters.flushes += 1;

        let state = if collapsed {
            FlushState::Clean
        } else {
            FlushState::Pending {
                remaining: entry.dirty.pending_hosts(),
            }
        };
        log::debug!("[FLUSH] block={} host={} -> {:?}", block, host, state);
        Ok(state)
    }

    /// 仍需同步到主机 `host` 的块，按块号升序
    pub fn pending_for(&self, host: usize) -> Result<Vec<u64>> {
        self.require_open()?;
        let bit = match DirtyMask::host(host) {
            Some(bit) if host <= self.host_count() => bit,
            _ => return Err(Error::new(ErrorKind::InvalidHost, "Host number out of range")),
        };
        Ok(self
            .index
            .dirty()
            .filter(|e| e.dirty.contains(bit))
            .map(|e| e.block)
            .collect())
    }
}
