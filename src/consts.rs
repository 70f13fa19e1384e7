//! 缓存设备常量定义
//!
//! 这个模块包含了缓存设备的磁盘布局常量：
//! - 头部与槽位记录大小
//! - 数据块大小
//! - 空闲链表参数

//=============================================================================
// 基础常量
//=============================================================================

/// 头部大小计量单位（扇区，512 字节）
pub const SECTOR_SIZE: u64 = 512;

/// 缓存块负载大小（4096 字节）
pub const BLOCK_SIZE: usize = 4096;

//=============================================================================
// 头部相关
//=============================================================================

/// 缓存头部魔数
pub const CACHE_MAGIC: [u8; 8] = *b"NBDCACHE";

/// 头部在设备上保留的字节数（元数据区从这里开始）
pub const HEADER_SIZE: u64 = 512;

/// 头部紧凑编码长度（不含校验和）
pub const HEADER_PACKED_SIZE: usize = 43;

/// 头部校验和偏移
pub const HEADER_CHECKSUM_OFFSET: usize = HEADER_PACKED_SIZE;

/// 头部最多记录的远端主机数
pub const MAX_HOSTS: usize = 6;

//=============================================================================
// 槽位相关
//=============================================================================

/// 槽位记录大小：block(u64) + use_count(u32) + dirty(u8)
pub const RECORD_SIZE: usize = 13;

/// 数据区中一个槽位的大小（记录 + 负载）
pub const SLOT_SIZE: usize = RECORD_SIZE + BLOCK_SIZE;

/// 记录中 dirty 字节为 0 表示空闲槽位
pub const SLOT_FREE: u8 = 0;

/// 记录中 dirty 字节为 1 表示干净（已同步到所有主机）
pub const SLOT_USED: u8 = 1;

//=============================================================================
// 分配与批量 I/O
//=============================================================================

/// 空闲链表中单个连续段的最大长度
pub const MAX_RUN: usize = 255;

/// 格式化时每次写入的字节数
pub const FORMAT_CHUNK_SIZE: usize = 32768;

/// 保存/加载元数据区时每批处理的记录数
pub const META_CHUNK_RECORDS: usize = FORMAT_CHUNK_SIZE / RECORD_SIZE;

/// 重建索引时每批读取的槽位数
pub const REINDEX_CHUNK_SLOTS: usize = 8;
