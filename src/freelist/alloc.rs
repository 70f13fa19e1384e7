//! 槽位分配功能

use super::FreeList;
use crate::{
    consts::MAX_RUN,
    error::{Error, ErrorKind, Result},
};

impl FreeList {
    /// 分配一段连续槽位
    ///
    /// 先从 `requested` 向上查找第一个非空桶；找不到时从 `requested - 1`
    /// 向下查找。找到的段比请求长时，只交出前 `requested` 个槽位，
    /// 剩余部分放回对应长度的桶。
    ///
    /// # 返回
    ///
    /// `(起始槽位, 实际分配数)`，向下查找命中时实际分配数小于请求数
    ///
    /// # 错误
    ///
    /// - `InvalidInput`: `requested` 为 0 或超过 [`MAX_RUN`]
    /// - `CacheFull`: 没有任何可分配的槽位
    pub fn allocate(&mut self, requested: usize) -> Result<(u32, u32)> {
        if requested == 0 || requested > MAX_RUN {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Requested run length out of range",
            ));
        }

        let bucket = (requested..=MAX_RUN)
            .find(|&len| !self.buckets[len].is_empty())
            .or_else(|| (1..requested).rev().find(|&len| !self.buckets[len].is_empty()));

        let Some(len) = bucket else {
            log::warn!(
                "[FREELIST] cache exhausted: requested {}, {} slots pending release",
                requested,
                self.free_count()
            );
            return Err(Error::new(ErrorKind::CacheFull, "No free cache slots"));
        };

        let Some(start) = self.buckets[len].pop() else {
            return Err(Error::new(ErrorKind::CacheFull, "No free cache slots"));
        };
        self.bucketed -= len as u64;

        let granted = len.min(requested);
        if len > granted {
            self.push_run(start + granted as u32, (len - granted) as u32);
        }

        log::trace!(
            "[FREELIST] allocate {} -> start={} granted={} (from run of {})",
            requested,
            start,
            granted,
            len
        );
        Ok((start, granted as u32))
    }

    /// 分配单个槽位
    pub fn allocate_one(&mut self) -> Result<u32> {
        self.allocate(1).map(|(slot, _)| slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::alloc::vec::Vec;

    fn list_with_runs(runs: &[(u32, u32)]) -> FreeList {
        let mut list = FreeList::new();
        for &(start, len) in runs {
            for slot in start..start + len {
                list.release(slot);
            }
            list.end_batch();
        }
        list
    }

    #[test]
    fn test_allocate_exact_run() {
        let mut list = list_with_runs(&[(10, 4)]);
        assert_eq!(list.allocate(4).unwrap(), (10, 4));
        assert!(list.is_empty());
    }

    #[test]
    fn test_allocate_splits_remainder() {
        let mut list = list_with_runs(&[(0, 8)]);
        assert_eq!(list.allocate(3).unwrap(), (0, 3));
        assert_eq!(list.free_count(), 5);

        let runs: Vec<(u32, u32)> = list.runs().collect();
        assert_eq!(runs, [(3, 5)]);

        // 剩余段按顺序继续分配
        assert_eq!(list.allocate_one().unwrap(), 3);
        assert_eq!(list.allocate_one().unwrap(), 4);
    }

    #[test]
    fn test_allocate_prefers_smallest_fitting_run() {
        let mut list = list_with_runs(&[(0, 6), (20, 2), (40, 3)]);
        assert_eq!(list.allocate(2).unwrap(), (20, 2));
        assert_eq!(list.allocate(2).unwrap(), (40, 2));
        assert_eq!(list.free_count(), 7);
    }

    #[test]
    fn test_allocate_falls_back_to_shorter_run() {
        let mut list = list_with_runs(&[(5, 2), (30, 1)]);
        // 没有长度 >= 4 的段，取最长的较短段
        assert_eq!(list.allocate(4).unwrap(), (5, 2));
        assert_eq!(list.allocate(4).unwrap(), (30, 1));
        assert!(list.is_empty());
    }

    #[test]
    fn test_allocate_empty_is_cache_full() {
        let mut list = FreeList::new();
        let err = list.allocate_one().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CacheFull);
    }

    #[test]
    fn test_pending_run_is_not_allocatable() {
        let mut list = FreeList::new();
        list.release(7);
        assert_eq!(list.allocate_one().unwrap_err().kind(), ErrorKind::CacheFull);
        list.end_batch();
        assert_eq!(list.allocate_one().unwrap(), 7);
    }

    #[test]
    fn test_allocate_rejects_bad_lengths() {
        let mut list = list_with_runs(&[(0, 4)]);
        assert_eq!(list.allocate(0).unwrap_err().kind(), ErrorKind::InvalidInput);
        assert_eq!(
            list.allocate(MAX_RUN + 1).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(list.free_count(), 4);
    }
}
