//! nbd_cache_core: 持久化块级缓存引擎
//!
//! 为 NBD 镜像栈提供本地缓存设备：把逻辑块号映射到缓存设备上的槽位，
//! 并为每个块记录哪些远端主机尚未收到它。
//!
//! - **no_std + alloc**，`std` 特性提供文件设备和线程安全句柄
//! - 崩溃一致：每次改变条目都会写回槽位的内联记录，未正常关闭时扫描数据区重建
//! - 空闲槽位按连续段分桶管理，驱逐按使用计数（LFU）选择干净块
//!
//! # 示例
//!
//! ```rust,ignore
//! use nbd_cache_core::{Cache, CacheConfig, FlushState, MemDevice, parse_hosts};
//!
//! let hosts = parse_hosts(&["10.0.0.1", "10.0.0.2"])?;
//! let mut cache = Cache::new(MemDevice::new(64 << 20), CacheConfig::default())?;
//! cache.format(&hosts)?;
//! cache.open(&hosts)?;
//!
//! // 读未命中：从远端取回后写入缓存
//! if cache.read(7)?.is_none() {
//!     cache.write(7, &fetched)?;
//! }
//!
//! // 镜像到两个主机后块变干净，可以被驱逐
//! cache.flush(7, 1)?;
//! assert_eq!(cache.flush(7, 2)?, FlushState::Clean);
//!
//! cache.close()?;
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块设备抽象和按字节偏移的 I/O
//! - [`consts`] - 磁盘格式常量
//! - [`types`] - 头部、槽位记录和设备几何
//! - [`header`] - 头部读写、校验和、主机列表
//! - [`freelist`] - 空闲槽位分配器
//! - [`index`] - 块索引（USED / DIRTY 分区）
//! - [`meta`] - 格式化、保存、加载、重建
//! - [`cache`] - 缓存引擎
//!
//! # 并发
//!
//! [`Cache`] 只有一个所有者，改变状态的操作都需要 `&mut self`。
//! 多线程共享时使用 `SharedCache`（`std` 特性），它用一把锁串行化整个操作。

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 块设备抽象
pub mod block;

/// 常量定义
pub mod consts;

/// 数据结构定义
pub mod types;

/// 缓存头部操作
pub mod header;

/// 空闲槽位分配
pub mod freelist;

/// 块索引
pub mod index;

/// 元数据持久化
pub mod meta;

/// 缓存引擎
pub mod cache;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, IoContext, Result};

// 块设备
pub use block::{BlockDev, BlockDevice, MemDevice};
#[cfg(feature = "std")]
pub use block::FileDevice;

// 磁盘格式
pub use types::{CacheHeader, Geometry, SlotRecord};
pub use header::{parse_hosts, read_header, write_header};

// 分配器与索引
pub use freelist::{FreeList, RunStats};
pub use index::{BlockIndex, DirtyMask, IndexEntry, Partition};

// 持久化
pub use meta::{LoadReport, Progress, SaveReport};

// 引擎
pub use cache::{
    Cache, CacheConfig, CacheListing, CacheState, CacheStats, FlushState, ListingRow, OpenMode,
    VerifyReport,
};
#[cfg(feature = "std")]
pub use cache::SharedCache;
