use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared progress counters, each on its own cache line.
///
/// Batch cursors:
/// - `write`: next batch index handed out by a claim
/// - `read`: frontier, every batch below it is published or canceled
/// - `barrier`: every batch below it has been released
///
/// Arena cursors:
/// - `write_seq`: next arena sequence assigned to a claim
/// - `barrier_seq`: every entry below it belongs to a released batch
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct Cursors {
    pub(crate) write: CachePadded<AtomicU64>,
    pub(crate) read: CachePadded<AtomicU64>,
    pub(crate) barrier: CachePadded<AtomicU64>,
    pub(crate) write_seq: CachePadded<AtomicU64>,
    pub(crate) barrier_seq: CachePadded<AtomicU64>,
}

/// Point-in-time copy of the cursors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CursorSnapshot {
    pub(crate) barrier: u64,
    pub(crate) read: u64,
    pub(crate) write: u64,
    pub(crate) barrier_seq: u64,
    pub(crate) write_seq: u64,
}

impl Cursors {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn write(&self) -> u64 {
        self.write.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn read(&self) -> u64 {
        self.read.load(Ordering::SeqCst)
    }

    /// Reads `read` with a read-modify-write, so the caller's earlier stores
    /// are ordered against whichever thread moves the frontier next.
    #[inline]
    pub(crate) fn read_handoff(&self) -> u64 {
        self.read.fetch_add(0, Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn barrier(&self) -> u64 {
        self.barrier.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn write_seq(&self) -> u64 {
        self.write_seq.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn barrier_seq(&self) -> u64 {
        self.barrier_seq.load(Ordering::SeqCst)
    }

    /// Loads in barrier → read → write order so the snapshot is ordered even
    /// while other threads advance the cursors.
    pub(crate) fn snapshot(&self) -> CursorSnapshot {
        let barrier_seq = self.barrier_seq();
        let barrier = self.barrier();
        let read = self.read();
        let write = self.write();
        let write_seq = self.write_seq();
        CursorSnapshot {
            barrier,
            read,
            write,
            barrier_seq,
            write_seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursors_live_on_separate_lines() {
        let c = Cursors::new();
        let write = std::ptr::addr_of!(c.write) as usize;
        let read = std::ptr::addr_of!(c.read) as usize;
        let barrier = std::ptr::addr_of!(c.barrier) as usize;
        assert!(read - write >= 64);
        assert!(barrier - read >= 64);
    }

    #[test]
    fn test_snapshot_starts_zeroed() {
        assert_eq!(Cursors::new().snapshot(), CursorSnapshot::default());
    }
}
