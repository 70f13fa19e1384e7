//! 缓存引擎模块
//!
//! 把块设备组织成一个持久化的块级缓存：逻辑块号 → 槽位。
//! 每个块带有每主机一位的脏位掩码，记录哪些远端主机尚未收到它。
//!
//! # 主要组件
//!
//! - [`Cache`] - 缓存引擎，拥有设备、索引和空闲链表
//! - [`CacheConfig`] - 运行时配置
//! - [`CacheStats`] / [`CacheListing`] / [`VerifyReport`] - 只读诊断
//! - `SharedCache` - `std` 特性下的线程安全句柄
//!
//! # 生命周期
//!
//! ```text
//! Unopened --open()--> Open --close()--> Closed
//! ```
//!
//! `open` 失败时实例留在 Unopened，结构为空。Closed 是终态，重新打开需要新实例。
//! 在错误状态下调用操作返回 `InvalidState`。
//!
//! # 崩溃一致性
//!
//! 每次改变条目（写入、读取计数、同步、驱逐）都会立即写回该槽位在数据区的内联记录，
//! 元数据区只在 [`Cache::close`] / [`Cache::save`] 时整体写出。
//! 头部的 `open` 标志在会话期间保持置位，未正常关闭时下次打开会扫描数据区重建。
//!
//! # 使用示例
//!
//! ```rust,ignore
//! use nbd_cache_core::{Cache, CacheConfig, MemDevice, parse_hosts};
//!
//! let hosts = parse_hosts(&["10.0.0.1", "10.0.0.2"])?;
//! let mut cache = Cache::new(MemDevice::new(64 << 20), CacheConfig::default())?;
//! cache.format(&hosts)?;
//! cache.open(&hosts)?;
//!
//! cache.write(7, &[0u8; 4096])?;
//! cache.flush(7, 1)?;
//! let data = cache.read(7)?;
//!
//! cache.close()?;
//! ```

mod buffer;
mod engine;
mod expire;
mod flush;
mod io;
mod report;
#[cfg(feature = "std")]
mod shared;

#[cfg(test)]
mod tests;

pub use report::{CacheListing, CacheStats, ListingRow, VerifyReport};
#[cfg(feature = "std")]
pub use shared::SharedCache;

use crate::{
    block::{BlockDev, BlockDevice},
    error::{Error, ErrorKind, Result},
    freelist::FreeList,
    index::{BlockIndex, DirtyMask},
    types::{CacheHeader, Geometry},
};
use buffer::PayloadBuffer;

/// 默认负载缓冲容量（块）
pub const DEFAULT_BUFFER_BLOCKS: usize = 256;

/// 默认进度回调间隔（格式化按 32K 块计，重建按槽位计）
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 4096;

/// 缓存配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// 内存负载缓冲容量（块），0 表示不缓冲
    pub buffer_blocks: usize,
    /// 驱逐后向设备发送 discard 提示
    pub discard_on_expire: bool,
    /// 关闭时在写入干净头部之后再刷新一次设备
    pub sync_on_close: bool,
    /// 格式化/重建时进度回调的间隔
    pub progress_interval: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            buffer_blocks: DEFAULT_BUFFER_BLOCKS,
            discard_on_expire: false,
            sync_on_close: true,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// 引擎状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// 尚未打开
    Unopened,
    /// 已打开，可以读写
    Open,
    /// 已关闭（终态）
    Closed,
}

/// 打开时索引的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// 从元数据区加载
    Loaded,
    /// 扫描数据区重建
    Reindexed,
}

/// 同步一个主机后的块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// 所有主机都已同步，块移入 USED
    Clean,
    /// 仍有主机待同步
    Pending {
        /// 剩余待同步主机数
        remaining: u32,
    },
}

/// 运行计数
#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    writes: u64,
    flushes: u64,
    expired: u64,
}

/// 块级缓存引擎
///
/// 单一所有者：所有改变状态的操作都要求 `&mut self`，内部没有锁。
/// 需要跨线程共享时使用 `SharedCache`（`std` 特性）。
pub struct Cache<D: BlockDevice> {
    bdev: BlockDev<D>,
    config: CacheConfig,
    geometry: Geometry,
    state: CacheState,
    header: Option<CacheHeader>,
    /// 本次打开计算的全主机待同步掩码
    template: DirtyMask,
    index: BlockIndex,
    free: FreeList,
    buffer: PayloadBuffer,
    counters: Counters,
}

impl<D: BlockDevice> Cache<D> {
    /// 当前状态
    pub fn state(&self) -> CacheState {
        self.state
    }

    /// 设备几何
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// 配置
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// 打开时读取的头部
    pub fn header(&self) -> Option<&CacheHeader> {
        self.header.as_ref()
    }

    /// 配置的主机数
    pub fn host_count(&self) -> usize {
        self.header
            .as_ref()
            .map_or(0, |h| h.configured_hosts().len())
    }

    /// 块索引
    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    /// 空闲链表
    pub fn free_list(&self) -> &FreeList {
        &self.free
    }

    /// 底层设备
    pub fn device(&self) -> &D {
        self.bdev.device()
    }

    /// 底层设备（可变）
    pub fn device_mut(&mut self) -> &mut D {
        self.bdev.device_mut()
    }

    fn require_open(&self) -> Result<()> {
        if self.state != CacheState::Open {
            log::error!("[CACHE] operation requires an open cache (state={:?})", self.state);
            return Err(Error::new(ErrorKind::InvalidState, "Cache is not open"));
        }
        Ok(())
    }

    fn require_unopened(&self) -> Result<()> {
        if self.state != CacheState::Unopened {
            log::error!("[CACHE] operation requires an unopened cache (state={:?})", self.state);
            return Err(Error::new(ErrorKind::InvalidState, "Cache already opened"));
        }
        Ok(())
    }
}
