//! 引擎场景测试

use super::*;
use crate::{
    block::MemDevice,
    consts::{BLOCK_SIZE, HEADER_SIZE, RECORD_SIZE},
    header::parse_hosts,
    index::{DirtyMask, IndexEntry, Partition},
    types::{CacheHeader, SlotRecord},
};
use alloc::vec;
use alloc::vec::Vec;
use core::net::Ipv4Addr;

fn hosts() -> Vec<Ipv4Addr> {
    parse_hosts(&["10.0.0.1", "10.0.0.2"]).unwrap()
}

/// 恰好容纳 `slots` 个槽位的设备
fn device_for(slots: u64) -> MemDevice {
    let bytes = HEADER_SIZE + slots * (BLOCK_SIZE + 2 * RECORD_SIZE) as u64;
    MemDevice::new((bytes.div_ceil(512) * 512) as usize)
}

fn unbuffered() -> CacheConfig {
    CacheConfig {
        buffer_blocks: 0,
        ..CacheConfig::default()
    }
}

fn formatted(slots: u64, config: CacheConfig) -> Cache<MemDevice> {
    let mut cache = Cache::new(device_for(slots), config).unwrap();
    cache.format_with_progress(&hosts(), &mut |_| {}).unwrap();
    cache
}

fn opened(slots: u64, config: CacheConfig) -> Cache<MemDevice> {
    let mut cache = formatted(slots, config);
    assert_eq!(cache.open(&hosts()).unwrap(), OpenMode::Loaded);
    cache
}

fn reopen(cache: Cache<MemDevice>) -> (Cache<MemDevice>, OpenMode) {
    let config = *cache.config();
    let mut cache = Cache::new(cache.into_device(), config).unwrap();
    let mode = cache.open(&hosts()).unwrap();
    (cache, mode)
}

fn payload(fill: u8) -> Vec<u8> {
    vec![fill; BLOCK_SIZE]
}

fn free_slots(cache: &Cache<MemDevice>) -> Vec<u32> {
    let mut slots: Vec<u32> = cache.free_list().slots().collect();
    slots.sort_unstable();
    slots
}

fn flush_all(cache: &mut Cache<MemDevice>, block: u64) {
    cache.flush(block, 1).unwrap();
    assert_eq!(cache.flush(block, 2).unwrap(), FlushState::Clean);
}

#[test]
fn test_write_then_read() {
    let mut cache = opened(8, unbuffered());

    let entry = cache.write(42, &payload(0xAB)).unwrap();
    assert_eq!(entry.use_count, 1);
    assert_eq!(entry.dirty, DirtyMask::all_pending(2));

    let data = cache.read(42).unwrap().unwrap();
    assert_eq!(data, payload(0xAB));

    let (part, entry) = cache.index().lookup(42).unwrap();
    assert_eq!(part, Partition::Dirty);
    assert_eq!(entry.use_count, 2);

    assert!(cache.read(43).unwrap().is_none());
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.writes), (1, 1, 1));
}

#[test]
fn test_rewrite_keeps_slot_and_redirties() {
    let mut cache = opened(8, CacheConfig::default());
    let first = cache.write(5, &payload(1)).unwrap();
    flush_all(&mut cache, 5);

    let second = cache.write(5, &payload(2)).unwrap();
    assert_eq!(second.slot, first.slot);
    assert_eq!(second.use_count, 2);
    assert_eq!(cache.index().lookup(5).unwrap().0, Partition::Dirty);
    assert_eq!(cache.read(5).unwrap().unwrap(), payload(2));
    assert_eq!(cache.free_list().free_count(), 7);
}

#[test]
fn test_buffered_read_uses_buffer() {
    let mut cache = opened(8, CacheConfig::default());
    cache.write(1, &payload(9)).unwrap();

    assert_eq!(cache.read(1).unwrap().unwrap(), payload(9));
    let stats = cache.stats();
    assert_eq!(stats.buffer_hits, 1);
    assert_eq!(stats.buffered, 1);

    // 驱逐后缓冲失效
    flush_all(&mut cache, 1);
    cache.expire(1).unwrap();
    assert_eq!(cache.stats().buffered, 0);
    assert!(cache.read(1).unwrap().is_none());
}

#[test]
fn test_write_rejects_short_payload() {
    let mut cache = opened(4, unbuffered());
    let err = cache.write(1, &[0u8; 100]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(cache.index().is_empty());
}

#[test]
fn test_unformatted_device_fails_open() {
    let mut cache = Cache::new(device_for(4), unbuffered()).unwrap();
    let err = cache.open(&hosts()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert_eq!(cache.state(), CacheState::Unopened);
    assert!(!cache.device().is_open());

    // 失败后可以格式化再打开
    cache.format_with_progress(&hosts(), &mut |_| {}).unwrap();
    assert_eq!(cache.open(&hosts()).unwrap(), OpenMode::Loaded);
    assert!(cache.device().is_open());
    cache.close().unwrap();
    assert!(!cache.device().is_open());
}

#[test]
fn test_host_mismatch_fails_open() {
    let mut cache = formatted(4, unbuffered());

    let err = cache.open(&hosts()[..1]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(cache.state(), CacheState::Unopened);

    let other = parse_hosts(&["10.0.0.1", "10.0.0.9"]).unwrap();
    assert_eq!(cache.open(&other).unwrap_err().kind(), ErrorKind::Config);

    assert_eq!(cache.open(&hosts()).unwrap(), OpenMode::Loaded);
}

#[test]
fn test_header_size_mismatch_is_corrupt() {
    let small = formatted(4, unbuffered()).into_device();
    let mut big = device_for(8);
    big.data_mut()[..small.data().len()].copy_from_slice(small.data());

    let mut cache = Cache::new(big, unbuffered()).unwrap();
    let err = cache.open(&hosts()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corrupted);
}

#[test]
fn test_lifecycle_state_checks() {
    let mut cache = formatted(4, unbuffered());
    assert_eq!(cache.read(1).unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(cache.expire(1).unwrap_err().kind(), ErrorKind::InvalidState);
    assert!(cache.list().is_err());

    cache.open(&hosts()).unwrap();
    assert_eq!(cache.open(&hosts()).unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(
        cache.format_with_progress(&hosts(), &mut |_| {}).unwrap_err().kind(),
        ErrorKind::InvalidState
    );

    cache.close().unwrap();
    cache.close().unwrap();
    assert_eq!(cache.state(), CacheState::Closed);
    assert_eq!(cache.write(1, &payload(0)).unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(cache.open(&hosts()).unwrap_err().kind(), ErrorKind::InvalidState);
    assert!(cache.index().is_empty());
}

#[test]
fn test_close_clears_open_flag() {
    let mut cache = opened(4, unbuffered());
    assert!(cache.header().unwrap().is_open());
    cache.close().unwrap();

    let dev = cache.into_device();
    let header = crate::types::CacheHeader::decode(&dev.data()[..HEADER_SIZE as usize]).unwrap();
    assert!(!header.is_open());
}

#[test]
fn test_second_close_leaves_disk_unchanged() {
    let mut cache = opened(8, unbuffered());
    cache.write(1, &payload(1)).unwrap();
    cache.write(2, &payload(2)).unwrap();
    cache.flush(2, 1).unwrap();

    cache.close().unwrap();
    let after_first = cache.device().data().to_vec();
    let writes = cache.stats().device_writes;

    cache.close().unwrap();
    assert_eq!(cache.device().data(), &after_first[..]);
    assert_eq!(cache.stats().device_writes, writes);
}

fn disk_header(dev: &MemDevice) -> CacheHeader {
    CacheHeader::decode(&dev.data()[..HEADER_SIZE as usize]).unwrap()
}

#[test]
fn test_close_flushes_before_clearing_open_flag() {
    let mut cache = opened(8, unbuffered());
    cache.write(1, &payload(1)).unwrap();
    let before = cache.device().flush_count();
    cache.close().unwrap();
    assert_eq!(cache.device().flush_count(), before + 2);
    assert!(!disk_header(cache.device()).is_open());
}

#[test]
fn test_failed_flush_keeps_cache_open() {
    let mut cache = opened(8, unbuffered());
    cache.write(1, &payload(1)).unwrap();
    cache.device_mut().fail_flushes_after(Some(0));

    assert_eq!(cache.close().unwrap_err().kind(), ErrorKind::Io);
    assert_eq!(cache.state(), CacheState::Open);
    assert!(cache.header().unwrap().is_open());
    assert!(disk_header(cache.device()).is_open());

    // 仍可继续写入；崩溃后重建能找回全部块
    cache.write(2, &payload(2)).unwrap();
    let (cache, mode) = reopen(cache);
    assert_eq!(mode, OpenMode::Reindexed);
    assert!(cache.index().contains(1));
    assert!(cache.index().contains(2));
}

#[test]
fn test_failed_final_flush_restores_open_flag() {
    let mut cache = opened(8, unbuffered());
    cache.write(1, &payload(1)).unwrap();
    cache.device_mut().fail_flushes_after(Some(1));

    assert_eq!(cache.close().unwrap_err().kind(), ErrorKind::Io);
    assert_eq!(cache.state(), CacheState::Open);
    assert!(cache.header().unwrap().is_open());
    assert!(disk_header(cache.device()).is_open());

    // 设备恢复后可以重试
    cache.device_mut().fail_flushes_after(None);
    cache.write(2, &payload(2)).unwrap();
    cache.close().unwrap();
    assert_eq!(cache.state(), CacheState::Closed);

    let (cache, mode) = reopen(cache);
    assert_eq!(mode, OpenMode::Loaded);
    assert!(cache.index().contains(1));
    assert!(cache.index().contains(2));
}

#[test]
fn test_flush_collapses_dirty_mask() {
    let mut cache = opened(4, unbuffered());
    cache.write(100, &payload(1)).unwrap();

    assert_eq!(cache.flush(100, 1).unwrap(), FlushState::Pending { remaining: 1 });
    assert_eq!(cache.pending_for(1).unwrap(), Vec::<u64>::new());
    assert_eq!(cache.pending_for(2).unwrap(), [100]);

    assert_eq!(cache.flush(100, 2).unwrap(), FlushState::Clean);
    assert_eq!(cache.index().lookup(100).unwrap().0, Partition::Used);
    assert_eq!(cache.flush(100, 1).unwrap_err().kind(), ErrorKind::NotCached);
}

#[test]
fn test_flush_errors() {
    let mut cache = opened(4, unbuffered());
    cache.write(1, &payload(1)).unwrap();

    for host in [0, 3, 6] {
        assert_eq!(cache.flush(1, host).unwrap_err().kind(), ErrorKind::InvalidHost);
    }
    assert_eq!(cache.flush(2, 1).unwrap_err().kind(), ErrorKind::NotCached);
    assert_eq!(cache.pending_for(3).unwrap_err().kind(), ErrorKind::InvalidHost);
}

#[test]
fn test_cache_full_expire_and_reuse() {
    let mut cache = opened(4, unbuffered());
    let slots = cache.geometry().cache_entries as u64;
    assert_eq!(slots, 4);

    for block in 0..slots {
        cache.write(block, &payload(block as u8)).unwrap();
    }
    let err = cache.write(99, &payload(0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CacheFull);

    // 全是脏块，无法驱逐
    assert_eq!(cache.expire(2).unwrap(), 0);

    flush_all(&mut cache, 1);
    flush_all(&mut cache, 2);
    cache.read(2).unwrap();

    // 块 1 的使用计数更小，先被驱逐
    assert_eq!(cache.expire(1).unwrap(), 1);
    assert!(!cache.index().contains(1));
    assert!(cache.index().contains(2));

    let entry = cache.write(99, &payload(7)).unwrap();
    assert_eq!(entry.use_count, 1);
    assert_eq!(cache.read(99).unwrap().unwrap(), payload(7));
    assert_eq!(cache.stats().expired, 1);
}

#[test]
fn test_expire_returns_ascending_run() {
    let mut cache = opened(8, unbuffered());
    for block in 0..8 {
        cache.write(block, &payload(0)).unwrap();
        flush_all(&mut cache, block);
    }
    assert_eq!(cache.free_list().free_count(), 0);

    assert_eq!(cache.expire(8).unwrap(), 8);
    let runs: Vec<(u32, u32)> = cache.free_list().runs().collect();
    assert_eq!(runs, [(0, 8)]);
}

#[test]
fn test_expire_zeroes_inline_record() {
    let mut cache = opened(4, unbuffered());
    let entry = cache.write(3, &payload(3)).unwrap();
    flush_all(&mut cache, 3);
    cache.expire(1).unwrap();

    let offset = cache.geometry().slot_offset(entry.slot) as usize;
    let rec = SlotRecord::decode(&cache.device().data()[offset..]).unwrap();
    assert!(rec.is_free());
}

#[test]
fn test_expire_discard_hint() {
    let config = CacheConfig {
        discard_on_expire: true,
        ..unbuffered()
    };
    let mut cache = opened(4, config);
    cache.write(1, &payload(0xFF)).unwrap();
    flush_all(&mut cache, 1);

    cache.expire(1).unwrap();
    assert!(cache.device().discarded_sectors() > 0);
}

#[test]
fn test_failed_write_returns_slot() {
    let mut cache = opened(4, unbuffered());
    let free = cache.free_list().free_count();

    cache.device_mut().set_fail_writes(true);
    let err = cache.write(10, &payload(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(err.io_context().is_some());
    assert!(!cache.index().contains(10));
    assert_eq!(cache.free_list().free_count(), free);

    cache.device_mut().set_fail_writes(false);
    cache.write(10, &payload(1)).unwrap();
    assert_eq!(cache.free_list().free_count(), free - 1);
}

#[test]
fn test_save_load_round_trip() {
    let mut cache = opened(16, unbuffered());
    for block in [10, 20, 30, 40] {
        cache.write(block, &payload(block as u8)).unwrap();
    }
    flush_all(&mut cache, 20);
    cache.flush(30, 2).unwrap();
    cache.read(20).unwrap();

    let rows = cache.list().unwrap().rows;
    let free = free_slots(&cache);
    cache.close().unwrap();

    let (mut cache, mode) = reopen(cache);
    assert_eq!(mode, OpenMode::Loaded);
    assert_eq!(cache.list().unwrap().rows, rows);
    assert_eq!(free_slots(&cache), free);
    assert_eq!(cache.read(40).unwrap().unwrap(), payload(40));
}

#[test]
fn test_unclean_shutdown_reindexes() {
    let mut cache = opened(16, unbuffered());
    for block in 0..6 {
        cache.write(block, &payload(block as u8)).unwrap();
    }
    flush_all(&mut cache, 1);
    flush_all(&mut cache, 2);
    cache.expire(1).unwrap();
    cache.read(3).unwrap();

    let rows = cache.list().unwrap().rows;
    let free = free_slots(&cache);

    // 不关闭直接释放设备，元数据区从未写出
    let (mut cache, mode) = reopen(cache);
    assert_eq!(mode, OpenMode::Reindexed);
    assert_eq!(cache.list().unwrap().rows, rows);
    assert_eq!(free_slots(&cache), free);

    // 重建后正常关闭，下次从元数据区加载
    cache.close().unwrap();
    let (cache, mode) = reopen(cache);
    assert_eq!(mode, OpenMode::Loaded);
    assert_eq!(cache.list().unwrap().rows, rows);
}

#[test]
fn test_reindex_matches_live_state() {
    let mut cache = opened(16, unbuffered());
    for block in [7, 3, 11, 5] {
        cache.write(block, &payload(1)).unwrap();
    }
    flush_all(&mut cache, 3);
    flush_all(&mut cache, 5);
    cache.read(5).unwrap();
    cache.expire(1).unwrap();
    cache.write(8, &payload(2)).unwrap();

    let rows = cache.list().unwrap().rows;
    let free = free_slots(&cache);
    let mut seen = 0;
    let report = cache.reindex_with_progress(&mut |_| seen += 1).unwrap();

    assert!(seen > 0);
    assert_eq!(report.used + report.dirty, rows.len());
    assert_eq!(cache.list().unwrap().rows, rows);
    assert_eq!(free_slots(&cache), free);
}

#[test]
fn test_corrupt_metadata_falls_back_to_reindex() {
    let mut cache = opened(8, unbuffered());
    cache.write(1, &payload(1)).unwrap();
    cache.write(2, &payload(2)).unwrap();
    let rows = cache.list().unwrap().rows;
    let geometry = *cache.geometry();
    cache.close().unwrap();

    // 元数据区中两个槽位记录同一个块
    let mut dev = cache.into_device();
    let dup = SlotRecord { block: 1, use_count: 1, dirty: 0b111 }.to_bytes();
    for slot in [5, 6] {
        let off = geometry.meta_offset(slot) as usize;
        dev.data_mut()[off..off + RECORD_SIZE].copy_from_slice(&dup);
    }

    let mut cache = Cache::new(dev, unbuffered()).unwrap();
    assert_eq!(cache.open(&hosts()).unwrap(), OpenMode::Reindexed);
    assert_eq!(cache.list().unwrap().rows, rows);
}

#[test]
fn test_metadata_record_without_used_bit_reindexes() {
    let mut cache = opened(8, unbuffered());
    let entry = cache.write(1, &payload(1)).unwrap();
    let geometry = *cache.geometry();
    cache.close().unwrap();

    let mut dev = cache.into_device();
    let bad = SlotRecord { block: 1, use_count: 1, dirty: 0b110 }.to_bytes();
    let off = geometry.meta_offset(entry.slot) as usize;
    dev.data_mut()[off..off + RECORD_SIZE].copy_from_slice(&bad);

    let mut cache = Cache::new(dev, unbuffered()).unwrap();
    assert_eq!(cache.open(&hosts()).unwrap(), OpenMode::Reindexed);
    let (partition, loaded) = cache.index().lookup(1).unwrap();
    assert_eq!(partition, Partition::Dirty);
    assert_eq!(loaded.dirty, DirtyMask::all_pending(2));

    flush_all(&mut cache, 1);
    assert!(cache.verify().unwrap().is_ok());
}

#[test]
fn test_verify_flags_mask_without_used_bit() {
    let mut cache = opened(8, unbuffered());
    cache.write(1, &payload(1)).unwrap();
    assert!(cache.verify().unwrap().bad_masks.is_empty());

    let slot = cache.free.allocate_one().unwrap();
    cache
        .index
        .insert_loaded(IndexEntry {
            block: 77,
            slot,
            use_count: 1,
            dirty: DirtyMask::from_disk(0b110),
        })
        .unwrap();

    let report = cache.verify().unwrap();
    assert_eq!(report.bad_masks, [slot]);
    assert!(report.free_and_used.is_empty());
    assert!(!report.is_ok());
}

#[test]
fn test_request_reindex() {
    let mut cache = opened(4, unbuffered());
    cache.write(1, &payload(1)).unwrap();
    cache.request_reindex().unwrap();
    assert!(cache.header().unwrap().reindex_requested());
    cache.close().unwrap();

    let (mut cache, mode) = reopen(cache);
    assert_eq!(mode, OpenMode::Reindexed);
    assert!(!cache.header().unwrap().reindex_requested());
    assert!(cache.index().contains(1));
    cache.close().unwrap();

    let (_, mode) = reopen(cache);
    assert_eq!(mode, OpenMode::Loaded);
}

#[test]
fn test_request_reindex_before_open() {
    let mut cache = formatted(4, unbuffered());
    cache.request_reindex().unwrap();
    assert_eq!(cache.open(&hosts()).unwrap(), OpenMode::Reindexed);
}

#[test]
fn test_read_detects_foreign_inline_record() {
    let mut cache = opened(4, unbuffered());
    let entry = cache.write(9, &payload(9)).unwrap();

    let offset = cache.geometry().slot_offset(entry.slot) as usize;
    let foreign = SlotRecord { block: 1234, use_count: 1, dirty: 0b111 }.to_bytes();
    cache.device_mut().data_mut()[offset..offset + RECORD_SIZE].copy_from_slice(&foreign);

    assert_eq!(cache.read(9).unwrap_err().kind(), ErrorKind::Corrupted);
    let report = cache.verify().unwrap();
    assert_eq!(report.mismatched, [entry.slot]);
    assert!(!report.is_ok());
}

#[test]
fn test_verify_after_mixed_operations() {
    let mut cache = opened(16, CacheConfig::default());
    for block in 0..12 {
        cache.write(block * 3, &payload(block as u8)).unwrap();
        if block % 2 == 0 {
            flush_all(&mut cache, block * 3);
        }
    }
    cache.expire(4).unwrap();
    cache.write(100, &payload(1)).unwrap();
    cache.read(9).unwrap();

    let report = cache.verify().unwrap();
    assert!(report.is_ok(), "{:?}", report);
    assert_eq!(report.checked, cache.index().len());

    // 槽位和分区互斥
    let mut slots: Vec<u32> = cache.index().entries().map(|e| e.slot).collect();
    slots.sort_unstable();
    slots.dedup();
    assert_eq!(slots.len(), cache.index().len());
    for e in cache.index().entries() {
        assert!(!cache.free_list().contains(e.slot));
    }
}

#[test]
fn test_byte_offset_io() {
    let mut cache = opened(8, unbuffered());
    let mut data = payload(1);
    data.extend_from_slice(&payload(2));
    assert_eq!(cache.write_at(4 * BLOCK_SIZE as u64, &data).unwrap(), 2);

    let mut buf = vec![0u8; 3 * BLOCK_SIZE];
    let missing = cache.read_at(3 * BLOCK_SIZE as u64, &mut buf).unwrap();
    assert_eq!(missing, [3]);
    assert!(buf[..BLOCK_SIZE].iter().all(|&b| b == 0));
    assert_eq!(&buf[BLOCK_SIZE..], &data[..]);

    let err = cache.write_at(100, &data).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    let err = cache.read_at(0, &mut buf[..10]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_listing_display() {
    let mut cache = opened(4, unbuffered());
    cache.write(77, &payload(0)).unwrap();
    cache.flush(77, 1).unwrap();
    cache.write(88, &payload(0)).unwrap();
    flush_all(&mut cache, 88);

    let listing = cache.list().unwrap();
    assert_eq!(listing.rows.len(), 2);
    assert_eq!(listing.free, 2);

    let text = alloc::format!("{}", listing);
    assert!(text.contains("D-*"));
    assert!(text.contains("U--"));
    assert!(text.ends_with("2 cached, 2 free, 4 slots"));
}

#[test]
fn test_zero_hosts_writes_are_clean() {
    let mut cache = Cache::new(device_for(4), unbuffered()).unwrap();
    cache.format_with_progress(&[], &mut |_| {}).unwrap();
    cache.open(&[]).unwrap();

    cache.write(1, &payload(1)).unwrap();
    assert_eq!(cache.index().lookup(1).unwrap().0, Partition::Used);
    assert_eq!(cache.expire(1).unwrap(), 1);
}
