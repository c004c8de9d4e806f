use crate::config::RingInfo;
use crate::error::{InitError, Resource};
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Marks a descriptor field as not yet assigned.
pub const SENTINEL: u64 = u64::MAX;

/// Maximum number of reader groups (one bit each in `group_flags`).
pub const MAX_GROUPS: usize = 16;

/// Maximum members per reader group (one bit each in a `reader_flags` byte).
pub const MAX_MEMBERS: usize = 8;

/// Cache line size the descriptor is padded to.
pub const CACHE_LINE: usize = 64;

/// Every member bit of a group acknowledged.
pub(crate) const ALL_MEMBERS: u8 = u8::MAX;

// Layout of the `pending` word.
const GROUP_BITS: u32 = 0xFFFF;
/// Cleared by the thread that moves the frontier past the batch.
pub(crate) const FRONTIER_HOLD: u32 = 1 << 16;
/// Cleared by the publisher once it has dropped departed groups.
pub(crate) const PUBLISH_HOLD: u32 = 1 << 17;
const TAG_SHIFT: u32 = 18;
const TAG_MASK: u32 = (1 << (32 - TAG_SHIFT)) - 1;

/// Lifecycle state of a batch descriptor.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Free, or released and waiting to be reclaimed.
    Available = 1,
    /// Owned by a producer that is writing entries.
    Writing = 2,
    /// Abandoned by its producer; never shown to readers.
    Canceled = 3,
    /// Complete and (once the frontier passes it) visible to readers.
    Published = 4,
    /// Being reset by exactly one releasing thread.
    Releasing = 5,
}

impl BatchState {
    #[inline]
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Available,
            2 => Self::Writing,
            3 => Self::Canceled,
            4 => Self::Published,
            5 => Self::Releasing,
            _ => unreachable!("invalid batch state {v}"),
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Available => "AVAILABLE",
            Self::Writing => "WRITING",
            Self::Canceled => "CANCELED",
            Self::Published => "PUBLISHED",
            Self::Releasing => "RELEASING",
        };
        f.write_str(name)
    }
}

/// Lets a producer observe when its batch has been recycled.
#[derive(Debug, Clone)]
pub struct ReleaseNotice {
    flag: Arc<AtomicBool>,
}

impl ReleaseNotice {
    pub(crate) fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once every reader group has acknowledged the batch and it was
    /// released (or, for a canceled batch, once it was reset).
    #[inline]
    pub fn is_released(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// One batch slot, padded to exactly one cache line so neighbouring
/// descriptors owned by unrelated threads never share a line.
///
/// `batch_size` is the ownership flag: 0 means free, and it only moves away
/// from 0 through a compare-and-swap. `batch_num` keeps the identity of the
/// last batch held by the slot after release, which is how barrier scans
/// recognise a released slot.
///
/// `pending` packs the groups that still have to acknowledge, two holds and
/// the lap tag of the batch it was armed for. Every bit is cleared with a
/// tagged compare-and-swap, and the thread whose clear leaves no bit set is
/// the one that releases the batch.
#[repr(C, align(64))]
pub(crate) struct Descriptor {
    batch_num: AtomicU64,
    batch_size: AtomicUsize,
    seq_num: AtomicU64,
    /// Arena sequence one past this batch's last entry.
    seq_end: AtomicU64,
    release_notice: AtomicPtr<AtomicBool>,
    /// Per group: bit set = member acknowledged (or was not a member at publish).
    reader_flags: [AtomicU8; MAX_GROUPS],
    /// Bits 0..16: groups that have not yet acknowledged. Bits 16..18: holds.
    /// Bits 18..32: lap tag.
    pending: AtomicU32,
    state: AtomicU8,
}

const _: () = assert!(std::mem::size_of::<Descriptor>() == CACHE_LINE);

impl Descriptor {
    fn new() -> Self {
        Self {
            batch_num: AtomicU64::new(SENTINEL),
            batch_size: AtomicUsize::new(0),
            seq_num: AtomicU64::new(SENTINEL),
            seq_end: AtomicU64::new(0),
            release_notice: AtomicPtr::new(ptr::null_mut()),
            reader_flags: std::array::from_fn(|_| AtomicU8::new(0)),
            pending: AtomicU32::new(0),
            state: AtomicU8::new(BatchState::Available as u8),
        }
    }

    // ---------------------------------------------------------------------
    // ACCESSORS
    // ---------------------------------------------------------------------

    #[inline]
    pub(crate) fn batch_num(&self) -> u64 {
        self.batch_num.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn seq_num(&self) -> u64 {
        self.seq_num.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn seq_end(&self) -> u64 {
        self.seq_end.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn state(&self) -> BatchState {
        BatchState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Groups that still have to acknowledge.
    #[inline]
    pub(crate) fn group_flags(&self) -> u16 {
        (self.pending.load(Ordering::SeqCst) & GROUP_BITS) as u16
    }

    /// Pending groups and holds, without the tag.
    #[inline]
    pub(crate) fn pending(&self) -> u32 {
        self.pending.load(Ordering::SeqCst) & !(TAG_MASK << TAG_SHIFT)
    }

    #[inline]
    pub(crate) fn reader_flags(&self, group: usize) -> u8 {
        self.reader_flags[group].load(Ordering::SeqCst)
    }

    /// The slot currently holds batch `index` and it counts toward the frontier.
    #[inline]
    pub(crate) fn is_closed_at(&self, index: u64) -> bool {
        // batch_num first: `begin_writing` stores the state before the number,
        // so a matching number guarantees the state belongs to `index` or later.
        self.batch_num() == index
            && matches!(
                self.state(),
                BatchState::Published | BatchState::Canceled | BatchState::Releasing
            )
    }

    /// Batch `index` has been released from this slot.
    #[inline]
    pub(crate) fn is_released_at(&self, index: u64) -> bool {
        self.batch_num() == index && self.state() == BatchState::Available
    }

    /// Whether the slot may host batch `index` (its previous occupant, if any,
    /// was batch `index - capacity` and has been released).
    #[inline]
    pub(crate) fn accepts(&self, index: u64, capacity: u64) -> bool {
        let last = self.batch_num();
        if index < capacity {
            last == SENTINEL
        } else {
            last == index - capacity
        }
    }

    // ---------------------------------------------------------------------
    // PRODUCER TRANSITIONS
    // ---------------------------------------------------------------------

    /// CAS `batch_size` from 0 to `count`.
    #[inline]
    pub(crate) fn try_own(&self, count: usize) -> bool {
        self.batch_size
            .compare_exchange(0, count, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Gives back a slot won by a stale or canceled claim before it was used.
    #[inline]
    pub(crate) fn disown(&self) {
        self.batch_size.store(0, Ordering::SeqCst);
    }

    /// Available → Writing for batch `batch_num` with arena range starting at `seq_num`.
    pub(crate) fn begin_writing(&self, batch_num: u64, seq_num: u64, count: usize) {
        self.state.store(BatchState::Writing as u8, Ordering::SeqCst);
        self.seq_num.store(seq_num, Ordering::SeqCst);
        self.seq_end.store(seq_num + count as u64, Ordering::SeqCst);
        self.batch_num.store(batch_num, Ordering::SeqCst);
    }

    /// Records which groups (and which members of each) must acknowledge,
    /// and sets both holds.
    ///
    /// `members(g)` returns the member mask of group `g`; bits of non-members
    /// are pre-set so a group completes when its byte reaches `ALL_MEMBERS`.
    pub(crate) fn arm_flags(
        &self,
        tag: u32,
        groups: u16,
        mut members: impl FnMut(usize) -> u8,
    ) {
        for (g, flags) in self.reader_flags.iter().enumerate() {
            let value = if groups & (1 << g) != 0 { !members(g) } else { 0 };
            flags.store(value, Ordering::SeqCst);
        }
        let word = (tag << TAG_SHIFT) | PUBLISH_HOLD | FRONTIER_HOLD | u32::from(groups);
        self.pending.store(word, Ordering::SeqCst);
    }

    /// Writing → Published. Single writer: no CAS needed.
    #[inline]
    pub(crate) fn mark_published(&self) {
        self.state.store(BatchState::Published as u8, Ordering::SeqCst);
    }

    /// Writing → Canceled. No group has to acknowledge a canceled batch.
    #[inline]
    pub(crate) fn mark_canceled(&self, tag: u32) {
        self.pending.store(tag << TAG_SHIFT, Ordering::SeqCst);
        self.state.store(BatchState::Canceled as u8, Ordering::SeqCst);
    }

    /// Installs a release notice, replacing any previous one.
    pub(crate) fn attach_notice(&self, notice: &ReleaseNotice) {
        let raw = Arc::into_raw(Arc::clone(&notice.flag)).cast_mut();
        let old = self.release_notice.swap(raw, Ordering::SeqCst);
        if !old.is_null() {
            // SAFETY: every non-null pointer stored here came from Arc::into_raw.
            drop(unsafe { Arc::from_raw(old) });
        }
    }

    // ---------------------------------------------------------------------
    // CONSUMER TRANSITIONS
    // ---------------------------------------------------------------------

    /// Sets member bit `member` of group `group`; returns the previous byte.
    #[inline]
    pub(crate) fn ack_member(&self, group: usize, member: usize) -> u8 {
        self.reader_flags[group].fetch_or(1 << member, Ordering::SeqCst)
    }

    /// Clears `bits` of `pending` if the slot is still armed for `tag`.
    ///
    /// Returns the previous pending bits (tag stripped), or `None` when the
    /// slot has moved on to another batch.
    pub(crate) fn clear_pending(&self, tag: u32, bits: u32) -> Option<u32> {
        let tag_bits = tag << TAG_SHIFT;
        let mut current = self.pending.load(Ordering::SeqCst);
        loop {
            if current & !(GROUP_BITS | FRONTIER_HOLD | PUBLISH_HOLD) != tag_bits {
                return None;
            }
            match self.pending.compare_exchange_weak(
                current,
                current & !bits,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(prev) => return Some(prev & !tag_bits),
                Err(actual) => current = actual,
            }
        }
    }

    /// Grants exclusive reset rights: `from` → Releasing.
    #[inline]
    pub(crate) fn try_begin_release(&self, from: BatchState) -> bool {
        self.state
            .compare_exchange(
                from as u8,
                BatchState::Releasing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Undoes [`try_begin_release`](Self::try_begin_release) when the slot
    /// turned out to hold a different batch.
    #[inline]
    pub(crate) fn abort_release(&self, to: BatchState) {
        self.state.store(to as u8, Ordering::SeqCst);
    }

    /// Releasing → Available. Clears flags, fires the release notice, sets the
    /// sequence sentinel and frees the slot (`batch_size = 0`).
    pub(crate) fn reset(&self) {
        debug_assert_eq!(self.state(), BatchState::Releasing);
        let notice = self.release_notice.swap(ptr::null_mut(), Ordering::SeqCst);
        if !notice.is_null() {
            // SAFETY: every non-null pointer stored here came from Arc::into_raw.
            let flag = unsafe { Arc::from_raw(notice) };
            flag.store(true, Ordering::Release);
        }
        for flags in &self.reader_flags {
            flags.store(0, Ordering::SeqCst);
        }
        self.pending.store(0, Ordering::SeqCst);
        self.seq_num.store(SENTINEL, Ordering::SeqCst);
        self.batch_size.store(0, Ordering::SeqCst);
        self.state.store(BatchState::Available as u8, Ordering::SeqCst);
    }
}

impl Drop for Descriptor {
    fn drop(&mut self) {
        let notice = *self.release_notice.get_mut();
        if !notice.is_null() {
            // SAFETY: every non-null pointer stored here came from Arc::into_raw.
            drop(unsafe { Arc::from_raw(notice) });
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("batch_num", &self.batch_num())
            .field("batch_size", &self.batch_size())
            .field("seq_num", &self.seq_num())
            .field("state", &self.state())
            .field("pending", &format_args!("{:#07x}", self.pending()))
            .finish_non_exhaustive()
    }
}

/// Fixed array of descriptors, addressed by `batch_num & batch_mask`.
pub(crate) struct BatchPool {
    slots: Box<[Descriptor]>,
    mask: u64,
    lap_shift: u32,
}

impl BatchPool {
    pub(crate) fn new(info: &RingInfo) -> Result<Self, InitError> {
        let capacity = info.batch_capacity();
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| InitError::alloc(Resource::DescriptorPool))?;
        slots.resize_with(capacity, Descriptor::new);

        Ok(Self {
            slots: slots.into_boxed_slice(),
            mask: info.batch_mask() as u64,
            lap_shift: capacity.trailing_zeros(),
        })
    }

    #[inline]
    pub(crate) fn slot(&self, batch_num: u64) -> &Descriptor {
        &self.slots[(batch_num & self.mask) as usize]
    }

    /// Lap tag of `batch_num`: consecutive occupants of a slot differ.
    #[inline]
    pub(crate) fn tag(&self, batch_num: u64) -> u32 {
        ((batch_num >> self.lap_shift) as u32) & TAG_MASK
    }

    #[inline]
    pub(crate) fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.slots.iter()
    }
}
