//! 缓存设备数据结构定义
//!
//! 这个模块包含了直接对应磁盘格式的数据结构。
//!
//! ## 设计原则
//!
//! 1. **显式编解码** - 所有字段按小端序逐个读写，不依赖内存布局
//! 2. **固定长度** - 每种记录都有确定的编码长度（见 [`crate::consts`]）
//! 3. **辅助方法** - 提供偏移计算和状态判断

use crate::{
    consts::*,
    error::{Error, ErrorKind, Result},
};
use byteorder::{ByteOrder, LittleEndian};
use core::net::Ipv4Addr;

//=============================================================================
// 槽位记录
//=============================================================================

/// 槽位记录
///
/// 元数据区和数据区中每个槽位都带有一份相同格式的记录：
///
/// ```text
/// 0   block: u64
/// 8   use_count: u32
/// 12  dirty: u8     0 = 空闲, 1 = 干净, 其余 = 脏
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotRecord {
    /// 逻辑块号
    pub block: u64,
    /// 使用计数
    pub use_count: u32,
    /// 脏位掩码原始值
    pub dirty: u8,
}

impl SlotRecord {
    /// 空闲槽位记录（全零）
    pub const FREE: SlotRecord = SlotRecord {
        block: 0,
        use_count: 0,
        dirty: SLOT_FREE,
    };

    /// 从字节解码
    ///
    /// `buf` 至少需要 [`RECORD_SIZE`] 字节
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RECORD_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Buffer too small for slot record",
            ));
        }
        Ok(Self {
            block: LittleEndian::read_u64(&buf[0..8]),
            use_count: LittleEndian::read_u32(&buf[8..12]),
            dirty: buf[12],
        })
    }

    /// 编码到字节
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < RECORD_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Buffer too small for slot record",
            ));
        }
        LittleEndian::write_u64(&mut buf[0..8], self.block);
        LittleEndian::write_u32(&mut buf[8..12], self.use_count);
        buf[12] = self.dirty;
        Ok(())
    }

    /// 编码为定长数组
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        LittleEndian::write_u64(&mut out[0..8], self.block);
        LittleEndian::write_u32(&mut out[8..12], self.use_count);
        out[12] = self.dirty;
        out
    }

    /// 槽位是否空闲
    pub fn is_free(&self) -> bool {
        self.dirty == SLOT_FREE
    }
}

//=============================================================================
// 缓存头部
//=============================================================================

/// 缓存头部
///
/// 位于设备偏移 0，占用 [`HEADER_SIZE`] 字节：
///
/// ```text
/// 0   magic[8]       "NBDCACHE"
/// 8   size: u64      设备大小（512 字节扇区数）
/// 16  host_count: u8
/// 17  hosts[6]       每个 4 字节 IPv4 地址（网络序）
/// 41  open: u8
/// 42  reindex: u8
/// 43  checksum: u32  前 43 字节的 CRC32（0 表示未记录）
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHeader {
    /// 魔数
    pub magic: [u8; 8],
    /// 设备大小（扇区）
    pub size: u64,
    /// 主机数量
    pub host_count: u8,
    /// 主机地址
    pub hosts: [Ipv4Addr; MAX_HOSTS],
    /// 会话打开标志（非零表示上次未正常关闭）
    pub open: u8,
    /// 重建索引请求标志
    pub reindex: u8,
    /// 头部校验和
    pub checksum: u32,
}

impl CacheHeader {
    /// 为指定设备大小和主机列表创建新头部
    pub fn new(device_bytes: u64, hosts: &[Ipv4Addr]) -> Result<Self> {
        if hosts.len() > MAX_HOSTS {
            return Err(Error::new(
                ErrorKind::Config,
                "Too many hosts for cache header",
            ));
        }
        let mut table = [Ipv4Addr::UNSPECIFIED; MAX_HOSTS];
        table[..hosts.len()].copy_from_slice(hosts);
        Ok(Self {
            magic: CACHE_MAGIC,
            size: device_bytes / SECTOR_SIZE,
            host_count: hosts.len() as u8,
            hosts: table,
            open: 0,
            reindex: 0,
            checksum: 0,
        })
    }

    /// 从字节解码（不做校验）
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_PACKED_SIZE + 4 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Buffer too small for cache header",
            ));
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[0..8]);

        let mut hosts = [Ipv4Addr::UNSPECIFIED; MAX_HOSTS];
        for (i, host) in hosts.iter_mut().enumerate() {
            let off = 17 + i * 4;
            *host = Ipv4Addr::new(buf[off], buf[off + 1], buf[off + 2], buf[off + 3]);
        }

        Ok(Self {
            magic,
            size: LittleEndian::read_u64(&buf[8..16]),
            host_count: buf[16],
            hosts,
            open: buf[41],
            reindex: buf[42],
            checksum: LittleEndian::read_u32(
                &buf[HEADER_CHECKSUM_OFFSET..HEADER_CHECKSUM_OFFSET + 4],
            ),
        })
    }

    /// 编码到字节（包含当前 checksum 字段）
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < HEADER_PACKED_SIZE + 4 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Buffer too small for cache header",
            ));
        }
        buf[0..8].copy_from_slice(&self.magic);
        LittleEndian::write_u64(&mut buf[8..16], self.size);
        buf[16] = self.host_count;
        for (i, host) in self.hosts.iter().enumerate() {
            let off = 17 + i * 4;
            buf[off..off + 4].copy_from_slice(&host.octets());
        }
        buf[41] = self.open;
        buf[42] = self.reindex;
        LittleEndian::write_u32(
            &mut buf[HEADER_CHECKSUM_OFFSET..HEADER_CHECKSUM_OFFSET + 4],
            self.checksum,
        );
        Ok(())
    }

    /// 魔数是否有效
    pub fn is_valid(&self) -> bool {
        self.magic == CACHE_MAGIC
    }

    /// 已配置的主机
    pub fn configured_hosts(&self) -> &[Ipv4Addr] {
        let n = (self.host_count as usize).min(MAX_HOSTS);
        &self.hosts[..n]
    }

    /// 设备大小（字节）
    pub fn device_bytes(&self) -> u64 {
        self.size * SECTOR_SIZE
    }

    /// 上次会话是否未正常关闭
    pub fn is_open(&self) -> bool {
        self.open != 0
    }

    /// 是否请求了重建索引
    pub fn reindex_requested(&self) -> bool {
        self.reindex != 0
    }
}

//=============================================================================
// 设备几何
//=============================================================================

/// 缓存设备几何
///
/// 打开时根据设备大小计算一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// 设备大小（字节）
    pub device_bytes: u64,
    /// 槽位数
    pub cache_entries: u32,
    /// 数据区起始偏移
    pub data_offset: u64,
}

impl Geometry {
    /// 由设备大小计算几何
    ///
    /// `cache_entries = (device_bytes - HEADER_SIZE) / (BLOCK_SIZE + 2 * RECORD_SIZE)`
    pub fn from_device_size(device_bytes: u64) -> Result<Self> {
        let per_slot = (BLOCK_SIZE + 2 * RECORD_SIZE) as u64;
        let entries = device_bytes.saturating_sub(HEADER_SIZE) / per_slot;

        if entries == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Device too small to hold a single cache slot",
            ));
        }
        if entries > u32::MAX as u64 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Device too large for 32-bit slot indices",
            ));
        }

        Ok(Self {
            device_bytes,
            cache_entries: entries as u32,
            data_offset: HEADER_SIZE + entries * RECORD_SIZE as u64,
        })
    }

    /// 元数据区大小（字节）
    pub fn meta_size(&self) -> u64 {
        self.cache_entries as u64 * RECORD_SIZE as u64
    }

    /// 元数据区中槽位记录的偏移
    pub fn meta_offset(&self, slot: u32) -> u64 {
        HEADER_SIZE + slot as u64 * RECORD_SIZE as u64
    }

    /// 数据区中槽位的偏移（记录起始处）
    pub fn slot_offset(&self, slot: u32) -> u64 {
        self.data_offset + slot as u64 * SLOT_SIZE as u64
    }

    /// 数据区中槽位负载的偏移
    pub fn payload_offset(&self, slot: u32) -> u64 {
        self.slot_offset(slot) + RECORD_SIZE as u64
    }
}
