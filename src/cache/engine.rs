//! 引擎生命周期：创建、格式化、打开、重建、保存、关闭

use super::{buffer::PayloadBuffer, Cache, CacheConfig, CacheState, Counters, OpenMode};
use crate::{
    block::{BlockDev, BlockDevice},
    error::{Error, ErrorKind, Result},
    freelist::FreeList,
    header::{read_header, write_header},
    index::{BlockIndex, DirtyMask},
    meta::{self, LoadReport, Progress, Rebuilt, SaveReport},
    types::{CacheHeader, Geometry},
};
use core::net::Ipv4Addr;

impl<D: BlockDevice> Cache<D> {
    /// 包装设备，计算几何
    ///
    /// # 错误
    ///
    /// 设备连一个槽位都放不下时返回 `InvalidInput`
    pub fn new(device: D, config: CacheConfig) -> Result<Self> {
        let bdev = BlockDev::new(device)?;
        let geometry = Geometry::from_device_size(bdev.size())?;

        log::debug!(
            "[CACHE] device {}M, {} slots, data offset {:#x}",
            geometry.device_bytes / 1024 / 1024,
            geometry.cache_entries,
            geometry.data_offset
        );

        Ok(Self {
            bdev,
            config,
            geometry,
            state: CacheState::Unopened,
            header: None,
            template: DirtyMask::USED,
            index: BlockIndex::new(),
            free: FreeList::new(),
            buffer: PayloadBuffer::new(config.buffer_blocks),
            counters: Counters::default(),
        })
    }

    /// 格式化设备
    ///
    /// 只能在打开之前调用。清除设备上已有的全部缓存内容。
    pub fn format(&mut self, hosts: &[Ipv4Addr]) -> Result<CacheHeader> {
        self.format_with_progress(hosts, &mut |p| {
            log::info!("[FORMAT] {}% complete", p.percent());
        })
    }

    /// 格式化设备，并通过回调报告进度
    pub fn format_with_progress(
        &mut self,
        hosts: &[Ipv4Addr],
        progress: &mut dyn FnMut(Progress),
    ) -> Result<CacheHeader> {
        self.require_unopened()?;
        meta::format_device(&mut self.bdev, hosts, self.config.progress_interval, progress)
    }

    /// 打开缓存
    ///
    /// 依次执行：
    /// 1. 读取并校验头部（魔数不符返回 `Format`，设备大小不符返回 `Corrupted`）
    /// 2. 校验主机列表（不符返回 `Config`）
    /// 3. 计算本次打开的脏位模板
    /// 4. 上次未正常关闭或有重建请求时扫描数据区，否则加载元数据区；
    ///    元数据区损坏时退回扫描数据区
    /// 5. 在磁盘上置位 `open` 标志
    ///
    /// 失败时实例保持 Unopened，结构为空。
    pub fn open(&mut self, hosts: &[Ipv4Addr]) -> Result<OpenMode> {
        self.require_unopened()?;
        self.bdev.open()?;

        match self.try_open(hosts) {
            Ok(mode) => {
                self.state = CacheState::Open;
                log::info!(
                    "[CACHE] opened ({:?}): {} used, {} dirty, {} free",
                    mode,
                    self.index.used_len(),
                    self.index.dirty_len(),
                    self.free.free_count()
                );
                Ok(mode)
            }
            Err(err) => {
                log::error!("[CACHE] open failed: {}", err);
                self.reset();
                if let Err(close_err) = self.bdev.close() {
                    log::warn!("[CACHE] closing device after failed open: {}", close_err);
                }
                Err(err)
            }
        }
    }

    fn try_open(&mut self, hosts: &[Ipv4Addr]) -> Result<OpenMode> {
        let mut header = read_header(&mut self.bdev)?;

        if header.device_bytes() != self.geometry.device_bytes {
            log::error!(
                "[CACHE] cache is wrong size for this device (header {} bytes, device {} bytes)",
                header.device_bytes(),
                self.geometry.device_bytes
            );
            return Err(Error::new(
                ErrorKind::Corrupted,
                "Header size does not match device",
            ));
        }

        header.matches_hosts(hosts)?;
        let template = DirtyMask::all_pending(hosts.len());

        let (rebuilt, mode) = if header.is_open() || header.reindex_requested() {
            if header.is_open() {
                log::warn!("[CACHE] cache was not closed cleanly, re-indexing");
            } else {
                log::info!("[CACHE] re-index requested");
            }
            (self.scan(template)?, OpenMode::Reindexed)
        } else {
            match meta::load_index(&mut self.bdev, &self.geometry, template) {
                Ok(rebuilt) => (rebuilt, OpenMode::Loaded),
                Err(err) if err.kind() == ErrorKind::Corrupted => {
                    log::warn!("[CACHE] metadata region unusable ({}), re-indexing", err);
                    (self.scan(template)?, OpenMode::Reindexed)
                }
                Err(err) => return Err(err),
            }
        };

        header.open = 1;
        if mode == OpenMode::Reindexed {
            header.reindex = 0;
        }
        write_header(&mut self.bdev, &mut header)?;

        self.template = template;
        self.header = Some(header);
        self.install(rebuilt);
        Ok(mode)
    }

    fn scan(&mut self, template: DirtyMask) -> Result<Rebuilt> {
        meta::reindex_data(
            &mut self.bdev,
            &self.geometry,
            template,
            self.config.progress_interval,
            &mut |p| log::info!("[REINDEX] {}% complete", p.percent()),
        )
    }

    fn install(&mut self, rebuilt: Rebuilt) {
        self.index = rebuilt.index;
        self.free = rebuilt.free;
        self.buffer.clear();
    }

    /// 扫描数据区重建索引和空闲链表
    ///
    /// 完成后清除头部的重建请求标志。
    pub fn reindex(&mut self) -> Result<LoadReport> {
        self.reindex_with_progress(&mut |p| {
            log::info!("[REINDEX] {}% complete", p.percent());
        })
    }

    /// 重建，并通过回调报告进度
    pub fn reindex_with_progress(&mut self, progress: &mut dyn FnMut(Progress)) -> Result<LoadReport> {
        self.require_open()?;
        let rebuilt = meta::reindex_data(
            &mut self.bdev,
            &self.geometry,
            self.template,
            self.config.progress_interval,
            progress,
        )?;
        let report = rebuilt.report;
        self.install(rebuilt);

        if let Some(header) = self.header.as_mut() {
            if header.reindex_requested() {
                header.reindex = 0;
                write_header(&mut self.bdev, header)?;
            }
        }
        Ok(report)
    }

    /// 把索引写入元数据区
    pub fn save(&mut self) -> Result<SaveReport> {
        self.require_open()?;
        meta::save_index(&mut self.bdev, &self.geometry, &self.index)
    }

    /// 在磁盘头部设置重建请求，下次打开时扫描数据区
    ///
    /// 打开前后都可以调用。
    pub fn request_reindex(&mut self) -> Result<()> {
        let mut header = match (self.state, self.header.take()) {
            (CacheState::Open, Some(header)) => header,
            (CacheState::Unopened, _) => read_header(&mut self.bdev)?,
            (_, header) => {
                self.header = header;
                return Err(Error::new(ErrorKind::InvalidState, "Cache is closed"));
            }
        };

        header.reindex = 1;
        let result = write_header(&mut self.bdev, &mut header);
        if self.state == CacheState::Open {
            self.header = Some(header);
        }
        result?;

        log::info!("[CACHE] re-index requested for next open");
        Ok(())
    }

    /// 关闭缓存
    ///
    /// 保存元数据区并刷新设备，之后才在头部清除 `open` 标志，最后按配置再刷新一次。
    /// 重复调用是无操作。
    ///
    /// 任何一步失败时保持 Open，可以重试；如果 `open` 标志已经被清除，
    /// 会先把它恢复到磁盘上，保证之后的崩溃仍然会触发重建。
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            CacheState::Closed => return Ok(()),
            CacheState::Unopened => {
                self.state = CacheState::Closed;
                return Ok(());
            }
            CacheState::Open => {}
        }

        meta::save_index(&mut self.bdev, &self.geometry, &self.index)?;
        // 元数据区落盘前不能清除 open 标志
        self.bdev.flush()?;

        if let Err(err) = self.mark_clean() {
            log::error!("[CACHE] close failed after clearing open flag: {}", err);
            self.restore_open_flag();
            return Err(err);
        }

        log::info!(
            "[CACHE] closed: {} hits, {} misses, {} writes",
            self.counters.hits,
            self.counters.misses,
            self.counters.writes
        );
        self.reset();
        self.state = CacheState::Closed;
        Ok(())
    }

    fn mark_clean(&mut self) -> Result<()> {
        if let Some(header) = self.header.as_mut() {
            header.open = 0;
            write_header(&mut self.bdev, header)?;
        }
        if self.config.sync_on_close {
            self.bdev.flush()?;
        }
        self.bdev.close()
    }

    fn restore_open_flag(&mut self) {
        if let Some(header) = self.header.as_mut() {
            header.open = 1;
            if let Err(err) = write_header(&mut self.bdev, header) {
                log::error!("[CACHE] could not restore open flag: {}", err);
                return;
            }
        }
        if let Err(err) = self.bdev.flush() {
            log::warn!("[CACHE] flush after restoring open flag failed: {}", err);
        }
    }

    /// 不保存直接释放设备
    ///
    /// 头部的 `open` 标志保持置位，下次打开会扫描数据区。
    pub fn into_device(self) -> D {
        if self.state == CacheState::Open {
            log::warn!("[CACHE] device released without close");
        }
        self.bdev.into_inner()
    }

    fn reset(&mut self) {
        self.index.clear();
        self.free.clear();
        self.buffer.clear();
        self.header = None;
        self.template = DirtyMask::USED;
    }
}
