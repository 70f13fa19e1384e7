//! 槽位负载的内存缓冲
//!
//! 以槽位为键的 LRU 缓存，位于数据区读取之前。容量为 0 时不缓冲。
//! 缓冲只是设备内容的副本：写入时刷新，驱逐和重建时失效。

use alloc::vec::Vec;
use core::num::NonZeroUsize;
use lru::LruCache;

/// 负载缓冲
pub(crate) struct PayloadBuffer {
    cache: Option<LruCache<u32, Vec<u8>>>,
    hits: u64,
}

impl PayloadBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
            hits: 0,
        }
    }

    /// 查找槽位负载，命中时移到最近使用
    pub(crate) fn get(&mut self, slot: u32) -> Option<&[u8]> {
        let data = self.cache.as_mut()?.get(&slot)?;
        self.hits += 1;
        Some(data.as_slice())
    }

    /// 放入槽位负载，满时淘汰最久未用的项
    pub(crate) fn put(&mut self, slot: u32, data: &[u8]) {
        if let Some(cache) = self.cache.as_mut() {
            if let Some(old) = cache.get_mut(&slot) {
                old.clear();
                old.extend_from_slice(data);
            } else {
                cache.put(slot, data.to_vec());
            }
        }
    }

    pub(crate) fn invalidate(&mut self, slot: u32) {
        if let Some(cache) = self.cache.as_mut() {
            cache.pop(&slot);
        }
    }

    pub(crate) fn clear(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, LruCache::len)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.cap().get())
    }

    pub(crate) fn hits(&self) -> u64 {
        self.hits
    }
}
