//! 线程安全的缓存句柄

use super::{Cache, CacheStats, FlushState};
use crate::{
    block::BlockDevice,
    error::{Error, ErrorKind, Result},
    index::IndexEntry,
};
use alloc::vec::Vec;
use std::sync::{Arc, Mutex, MutexGuard};

/// 共享缓存
///
/// 一把互斥锁保护整个引擎，每个操作在持锁期间完整执行。
/// 克隆得到指向同一引擎的新句柄。
pub struct SharedCache<D: BlockDevice> {
    inner: Arc<Mutex<Cache<D>>>,
}

impl<D: BlockDevice> Clone for SharedCache<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: BlockDevice> SharedCache<D> {
    /// 包装缓存引擎
    pub fn new(cache: Cache<D>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    /// 获取锁
    ///
    /// # 错误
    ///
    /// 另一个线程持锁时 panic 导致锁中毒，返回 `InvalidState`
    pub fn lock(&self) -> Result<MutexGuard<'_, Cache<D>>> {
        self.inner.lock().map_err(|_| {
            log::error!("[CACHE] shared cache lock poisoned");
            Error::new(ErrorKind::InvalidState, "Cache lock poisoned")
        })
    }

    /// 持锁执行一个闭包
    pub fn with<R>(&self, f: impl FnOnce(&mut Cache<D>) -> Result<R>) -> Result<R> {
        let mut cache = self.lock()?;
        f(&mut cache)
    }

    /// 见 [`Cache::read`]
    pub fn read(&self, block: u64) -> Result<Option<Vec<u8>>> {
        self.with(|c| c.read(block))
    }

    /// 见 [`Cache::write`]
    pub fn write(&self, block: u64, data: &[u8]) -> Result<IndexEntry> {
        self.with(|c| c.write(block, data))
    }

    /// 见 [`Cache::flush`]
    pub fn flush(&self, block: u64, host: usize) -> Result<FlushState> {
        self.with(|c| c.flush(block, host))
    }

    /// 见 [`Cache::expire`]
    pub fn expire(&self, count: usize) -> Result<usize> {
        self.with(|c| c.expire(count))
    }

    /// 见 [`Cache::stats`]
    pub fn stats(&self) -> Result<CacheStats> {
        self.with(|c| Ok(c.stats()))
    }

    /// 见 [`Cache::close`]
    pub fn close(&self) -> Result<()> {
        self.with(|c| c.close())
    }
}
