use crate::config::RingInfo;
use crate::error::{InitError, Resource};
use std::cell::UnsafeCell;
use std::ops::Range;

/// Bounded, non-owning view of one arena entry.
///
/// Handed to callers that must not receive an unbounded pointer: it names the
/// entry's byte offset inside the arena together with its length and capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySlice {
    /// Byte offset of the entry inside the arena.
    pub offset: usize,
    /// Readable/writable length in bytes.
    pub len: usize,
    /// Capacity in bytes (always equal to the entry size).
    pub cap: usize,
}

impl EntrySlice {
    /// Byte range of the entry inside the arena.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Flat pre-allocated byte region holding entry payloads.
///
/// The arena has no structure of its own. Exclusive access to the bytes of a
/// sequence range is implied by ownership of the batch descriptor that was
/// assigned that range, so the bytes live in `UnsafeCell`s and every accessor
/// that hands out a slice is `unsafe`.
pub(crate) struct DataArena {
    bytes: Box<[UnsafeCell<u8>]>,
    entry_size: usize,
    data_mask: u64,
}

// Safety: concurrent access to disjoint entries is coordinated by the batch
// ownership protocol; the arena itself never hands out overlapping slices.
unsafe impl Send for DataArena {}
unsafe impl Sync for DataArena {}

impl DataArena {
    /// Allocates and zeroes `info.total_arena_bytes()` bytes.
    pub(crate) fn new(info: &RingInfo) -> Result<Self, InitError> {
        let total = info.total_arena_bytes();
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(total)
            .map_err(|_| InitError::alloc(Resource::Arena))?;
        bytes.resize_with(total, || UnsafeCell::new(0));

        Ok(Self {
            bytes: bytes.into_boxed_slice(),
            entry_size: info.entry_size(),
            data_mask: info.data_mask() as u64,
        })
    }

    /// Byte offset of the entry addressed by `seq_num`.
    #[inline]
    pub(crate) fn offset(&self, seq_num: u64) -> usize {
        ((seq_num & self.data_mask) as usize) * self.entry_size
    }

    /// Byte range of the entry addressed by `seq_num`.
    #[inline]
    pub(crate) fn entry_range(&self, seq_num: u64) -> Range<usize> {
        let offset = self.offset(seq_num);
        offset..offset + self.entry_size
    }

    /// Bounded view of the entry addressed by `seq_num`.
    #[inline]
    pub(crate) fn entry_slice(&self, seq_num: u64) -> EntrySlice {
        EntrySlice {
            offset: self.offset(seq_num),
            len: self.entry_size,
            cap: self.entry_size,
        }
    }

    #[inline]
    fn entry_ptr(&self, seq_num: u64) -> *mut u8 {
        let offset = self.offset(seq_num);
        debug_assert!(offset + self.entry_size <= self.bytes.len());
        UnsafeCell::raw_get(self.bytes[offset..].as_ptr())
    }

    /// Shared view of one entry.
    ///
    /// # Safety
    ///
    /// No thread may hold a mutable view of the same entry for the lifetime of
    /// the returned slice (the batch covering `seq_num` must be published and
    /// not yet released).
    #[inline]
    pub(crate) unsafe fn entry(&self, seq_num: u64) -> &[u8] {
        std::slice::from_raw_parts(self.entry_ptr(seq_num), self.entry_size)
    }

    /// Mutable view of one entry.
    ///
    /// # Safety
    ///
    /// The caller must own the batch covering `seq_num` in the Writing state
    /// and must not create a second view of the same entry.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn entry_mut(&self, seq_num: u64) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.entry_ptr(seq_num), self.entry_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn arena(data: usize, entry: usize) -> DataArena {
        DataArena::new(&RingInfo::new(&Config::new(4, data, entry)).unwrap()).unwrap()
    }

    #[test]
    fn test_offsets_wrap_by_mask() {
        let a = arena(8, 16);
        assert_eq!(a.offset(0), 0);
        assert_eq!(a.offset(3), 48);
        assert_eq!(a.offset(8), 0);
        assert_eq!(a.offset(11), 48);
        assert_eq!(a.entry_range(9), 16..32);
    }

    #[test]
    fn test_entry_slice_is_bounded() {
        let a = arena(8, 16);
        let s = a.entry_slice(13);
        assert_eq!(s, EntrySlice { offset: 80, len: 16, cap: 16 });
        assert_eq!(s.range(), 80..96);
    }

    #[test]
    fn test_entries_are_disjoint() {
        let a = arena(4, 8);
        unsafe {
            a.entry_mut(0).fill(1);
            a.entry_mut(1).fill(2);
            assert!(a.entry(0).iter().all(|&b| b == 1));
            assert!(a.entry(1).iter().all(|&b| b == 2));
            assert!(a.entry(2).iter().all(|&b| b == 0));
            // seq 5 aliases seq 1
            assert!(a.entry(5).iter().all(|&b| b == 2));
        }
    }
}
