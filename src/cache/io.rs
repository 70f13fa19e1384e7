//! 块读写

use super::Cache;
use crate::{
    block::BlockDevice,
    consts::{BLOCK_SIZE, RECORD_SIZE, SLOT_SIZE},
    error::{Error, ErrorKind, Result},
    index::IndexEntry,
    types::SlotRecord,
};
use alloc::vec;
use alloc::vec::Vec;

impl<D: BlockDevice> Cache<D> {
    /// 读取块
    ///
    /// 命中时返回负载，使用计数 +1 并写回内联记录。
    /// 未命中返回 `Ok(None)`：调用者应从远端取回数据后调用 [`Cache::write`]。
    ///
    /// # 错误
    ///
    /// - `Io`: 设备读写失败
    /// - `Corrupted`: 槽位的内联记录指向另一个块
    pub fn read(&mut self, block: u64) -> Result<Option<Vec<u8>>> {
        self.require_open()?;

        let Some((_, entry)) = self.index.lookup(block) else {
            self.counters.misses += 1;
            log::trace!("[CACHE] read block={} MISS", block);
            return Ok(None);
        };
        let slot = entry.slot;

        let data = match self.buffer.get(slot) {
            Some(data) => data.to_vec(),
            None => {
                let data = self.read_slot(block, slot)?;
                self.buffer.put(slot, &data);
                data
            }
        };

        let Some(entry) = self.index.record_access(block) else {
            return Err(Error::new(ErrorKind::NotCached, "Block vanished from index"));
        };
        self.persist_record(&entry)?;

        self.counters.hits += 1;
        log::trace!(
            "[CACHE] read block={} slot={} use={} HIT",
            block,
            slot,
            entry.use_count
        );
        Ok(Some(data))
    }

    /// 从数据区读取槽位负载，并校验内联记录
    fn read_slot(&mut self, block: u64, slot: u32) -> Result<Vec<u8>> {
        let mut raw = vec![0u8; SLOT_SIZE];
        self.bdev.read_bytes(self.geometry.slot_offset(slot), &mut raw)?;

        let rec = SlotRecord::decode(&raw)?;
        if rec.block != block || rec.is_free() {
            log::error!(
                "[CACHE] slot {} holds block {} (dirty={:#04x}), index says block {}",
                slot,
                rec.block,
                rec.dirty,
                block
            );
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Inline slot record does not match index",
            ));
        }

        raw.drain(..RECORD_SIZE);
        Ok(raw)
    }

    /// 写入块
    ///
    /// 已缓存的块复用原槽位，否则分配新槽位。条目的脏位设为所有主机待同步，
    /// 使用计数 +1。内联记录和负载在一次写入中落盘；新槽位写入失败时归还分配器。
    ///
    /// # 错误
    ///
    /// - `InvalidInput`: `data` 不是 [`BLOCK_SIZE`] 字节
    /// - `CacheFull`: 没有空闲槽位，调用者应先 [`Cache::expire`] 再重试
    /// - `Io`: 设备写入失败
    pub fn write(&mut self, block: u64, data: &[u8]) -> Result<IndexEntry> {
        self.require_open()?;
        if data.len() != BLOCK_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Block payload must be exactly one block",
            ));
        }

        let existing = self.index.lookup(block).map(|(_, e)| *e);
        let (slot, fresh) = match existing {
            Some(entry) => (entry.slot, false),
            None => (self.free.allocate_one()?, true),
        };

        let rec = SlotRecord {
            block,
            use_count: existing.map_or(1, |e| e.use_count.saturating_add(1)),
            dirty: self.template.bits(),
        };
        let mut raw = vec![0u8; SLOT_SIZE];
        rec.encode(&mut raw)?;
        raw[RECORD_SIZE..].copy_from_slice(data);

        if let Err(err) = self.bdev.write_bytes(self.geometry.slot_offset(slot), &raw) {
            log::error!("[CACHE] write block={} slot={} failed: {}", block, slot, err);
            if fresh {
                self.free.release(slot);
                self.free.end_batch();
            }
            self.buffer.invalidate(slot);
            return Err(err);
        }

        let entry = self.index.insert_or_update(block, slot, self.template);
        debug_assert_eq!(entry.use_count, rec.use_count);
        self.buffer.put(slot, data);
        self.counters.writes += 1;

        log::trace!(
            "[CACHE] write block={} slot={} use={} dirty={:#04x}{}",
            block,
            slot,
            entry.use_count,
            entry.dirty.bits(),
            if fresh { " (new)" } else { "" }
        );
        Ok(entry)
    }

    /// 按字节偏移读取连续的块
    ///
    /// `offset` 和 `buf.len()` 必须按 [`BLOCK_SIZE`] 对齐。命中的块拷贝进 `buf`，
    /// 未命中的块在 `buf` 中保持不变。
    ///
    /// # 返回
    ///
    /// 未命中的块号，全部命中时为空
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<Vec<u64>> {
        let first = block_span(offset, buf.len())?;
        let mut missing = Vec::new();

        for (i, chunk) in buf.chunks_exact_mut(BLOCK_SIZE).enumerate() {
            let block = first + i as u64;
            match self.read(block)? {
                Some(data) => chunk.copy_from_slice(&data),
                None => missing.push(block),
            }
        }
        Ok(missing)
    }

    /// 按字节偏移写入连续的块
    ///
    /// 拆分为逐块的 [`Cache::write`]。中途失败时，之前的块已经写入。
    ///
    /// # 返回
    ///
    /// 写入的块数
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        let first = block_span(offset, data.len())?;
        for (i, chunk) in data.chunks_exact(BLOCK_SIZE).enumerate() {
            self.write(first + i as u64, chunk)?;
        }
        Ok(data.len() / BLOCK_SIZE)
    }

    /// 写回条目的内联记录
    pub(super) fn persist_record(&mut self, entry: &IndexEntry) -> Result<()> {
        let rec = entry.record().to_bytes();
        self.bdev
            .write_bytes(self.geometry.slot_offset(entry.slot), &rec)
    }
}

/// 校验字节范围的块对齐，返回起始块号
fn block_span(offset: u64, len: usize) -> Result<u64> {
    if offset % BLOCK_SIZE as u64 != 0 || len % BLOCK_SIZE != 0 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "Offset and length must be block aligned",
        ));
    }
    Ok(offset / BLOCK_SIZE as u64)
}
