use crate::arena::EntrySlice;
use crate::descriptor::ReleaseNotice;
use crate::error::EntryError;
use crate::ring::Shared;

/// Exclusive producer handle for a claimed batch.
///
/// The producer writes entries through the handle, then calls
/// [`publish`](Self::publish). Dropping the handle without publishing cancels
/// the batch: readers never see it, and its place in the sequence is closed so
/// later batches are not held back.
///
/// # Example
///
/// ```
/// use ringbatch_rs::{CancelToken, RingBuffer};
///
/// let ring = RingBuffer::with_capacity(8, 64, 32).unwrap();
/// let mut batch = ring.claim(2, &CancelToken::new()).unwrap();
/// batch.write_entry(0, b"first").unwrap();
/// batch.write_entry(1, b"second").unwrap();
/// let batch_num = batch.publish();
/// assert_eq!(ring.read_batch_num(), batch_num + 1);
/// ```
pub struct Batch<'a> {
    shared: &'a Shared,
    batch_num: u64,
    seq_num: u64,
    len: usize,
    finished: bool,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(shared: &'a Shared, batch_num: u64, seq_num: u64, len: usize) -> Self {
        Self {
            shared,
            batch_num,
            seq_num,
            len,
            finished: false,
        }
    }

    /// Identity of the batch (position in publish order).
    #[inline]
    pub fn batch_num(&self) -> u64 {
        self.batch_num
    }

    /// Arena sequence of the first entry.
    #[inline]
    pub fn seq_num(&self) -> u64 {
        self.seq_num
    }

    /// Number of entries claimed.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: claims of zero entries are rejected.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes per entry.
    #[inline]
    pub fn entry_size(&self) -> usize {
        self.shared.info.entry_size()
    }

    /// Bounded view of entry `index` inside the arena.
    pub fn entry_slice(&self, index: usize) -> Result<EntrySlice, EntryError> {
        self.check(index)?;
        Ok(self.shared.arena.entry_slice(self.seq_num + index as u64))
    }

    /// Mutable bytes of entry `index`.
    pub fn entry_mut(&mut self, index: usize) -> Result<&mut [u8], EntryError> {
        self.check(index)?;
        // SAFETY: the batch is Writing and owned by this handle; its arena
        // range is not shared with any live batch, and `&mut self` prevents a
        // second view of the same entry.
        Ok(unsafe { self.shared.arena.entry_mut(self.seq_num + index as u64) })
    }

    /// Copies `payload` into entry `index`; remaining bytes are zeroed.
    pub fn write_entry(&mut self, index: usize, payload: &[u8]) -> Result<(), EntryError> {
        let entry_size = self.entry_size();
        if payload.len() > entry_size {
            return Err(EntryError::TooLarge {
                len: payload.len(),
                entry_size,
            });
        }
        let entry = self.entry_mut(index)?;
        let (head, tail) = entry.split_at_mut(payload.len());
        head.copy_from_slice(payload);
        tail.fill(0);
        Ok(())
    }

    /// Returns a notice that is set once the batch has been released.
    ///
    /// Calling this again replaces the previously attached notice.
    pub fn release_notice(&self) -> ReleaseNotice {
        let notice = ReleaseNotice::new();
        self.shared.pool.slot(self.batch_num).attach_notice(&notice);
        notice
    }

    /// Makes the batch visible to readers (once every earlier batch is).
    ///
    /// Returns the batch number.
    pub fn publish(mut self) -> u64 {
        self.finished = true;
        self.shared.publish(self.batch_num);
        self.batch_num
    }

    /// Abandons the batch without making it visible.
    pub fn cancel(mut self) {
        self.finished = true;
        self.shared.cancel(self.batch_num);
    }

    fn check(&self, index: usize) -> Result<(), EntryError> {
        if index < self.len {
            Ok(())
        } else {
            Err(EntryError::OutOfRange {
                index,
                len: self.len,
            })
        }
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.cancel(self.batch_num);
        }
    }
}

impl std::fmt::Debug for Batch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("batch_num", &self.batch_num)
            .field("seq_num", &self.seq_num)
            .field("len", &self.len)
            .finish()
    }
}
