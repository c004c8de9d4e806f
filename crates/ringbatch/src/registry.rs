use crate::arena::EntrySlice;
use crate::cursors::Cursors;
use crate::descriptor::{BatchState, ALL_MEMBERS, MAX_GROUPS, MAX_MEMBERS};
use crate::error::{AckError, EntryError, InitError, Resource, SubscribeError};
use crate::ring::Shared;
use crate::stats::GroupStats;
use crate::Backoff;
use crossbeam_utils::CachePadded;
use std::cell::Cell;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Result of a successful acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Other members of this group still have to acknowledge.
    Pending,
    /// This group is done. The batch is released by whichever thread
    /// completes it last, which was not this call.
    GroupComplete,
    /// This acknowledgement completed the batch: the caller must release it.
    Consumed,
}

#[derive(Debug, Default)]
struct GroupCounters {
    acks: AtomicU64,
    completed: AtomicU64,
}

/// Reader-group bookkeeping.
///
/// Group `g` owns bit `g` of every descriptor's `group_flags` and byte `g` of
/// its `reader_flags`; member `m` owns bit `m` of that byte. A bit freed by a
/// departing reader is retired until the barrier passes the write cursor
/// observed at departure, so no in-flight batch can still carry the old
/// owner's flag when the bit is handed out again.
///
/// Publishers only read `active` and `members`. Subscribe and unsubscribe are
/// serialized by a topology token (see [`Registry::lock`]).
pub(crate) struct Registry {
    token: AtomicBool,
    active: AtomicU16,
    members: [AtomicU8; MAX_GROUPS],
    ids: [AtomicU32; MAX_GROUPS],
    group_retired_at: [AtomicU64; MAX_GROUPS],
    member_retired_at: [[AtomicU64; MAX_MEMBERS]; MAX_GROUPS],
    counters: Box<[CachePadded<GroupCounters>]>,
}

impl Registry {
    pub(crate) fn new() -> Result<Self, InitError> {
        let mut counters = Vec::new();
        counters
            .try_reserve_exact(MAX_GROUPS)
            .map_err(|_| InitError::alloc(Resource::Stats))?;
        counters.resize_with(MAX_GROUPS, CachePadded::default);

        Ok(Self {
            token: AtomicBool::new(false),
            active: AtomicU16::new(0),
            members: std::array::from_fn(|_| AtomicU8::new(0)),
            ids: std::array::from_fn(|_| AtomicU32::new(0)),
            group_retired_at: std::array::from_fn(|_| AtomicU64::new(0)),
            member_retired_at: std::array::from_fn(|_| {
                std::array::from_fn(|_| AtomicU64::new(0))
            }),
            counters: counters.into_boxed_slice(),
        })
    }

    /// Groups that must acknowledge batches published from now on.
    #[inline]
    pub(crate) fn active(&self) -> u16 {
        self.active.load(Ordering::SeqCst)
    }

    /// Member mask of group `group`.
    #[inline]
    pub(crate) fn members(&self, group: usize) -> u8 {
        self.members[group].load(Ordering::SeqCst)
    }

    /// Acquires the topology token, spinning while another thread holds it.
    pub(crate) fn lock(&self) -> Topology<'_> {
        let mut backoff = Backoff::new();
        while self
            .token
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }
        Topology { registry: self }
    }

    fn record_ack(&self, group: usize) {
        self.counters[group].acks.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completion(&self, group: usize) {
        self.counters[group].completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn group_stats(&self) -> Vec<GroupStats> {
        (0..MAX_GROUPS)
            .filter_map(|g| {
                let members = self.members(g);
                (members != 0).then(|| GroupStats {
                    group: g as u8,
                    group_id: self.ids[g].load(Ordering::Relaxed),
                    members: members.count_ones(),
                    acks: self.counters[g].acks.load(Ordering::Relaxed),
                    completed: self.counters[g].completed.load(Ordering::Relaxed),
                })
            })
            .collect()
    }
}

/// Exclusive right to change the reader-group topology.
pub(crate) struct Topology<'a> {
    registry: &'a Registry,
}

impl Topology<'_> {
    /// Adds a member to `group_id` (creating the group if needed).
    ///
    /// Returns `(group, member, start)` where `start` is the first batch the
    /// reader will consider.
    pub(crate) fn join(
        &self,
        group_id: u32,
        cursors: &Cursors,
    ) -> Result<(usize, usize, u64), SubscribeError> {
        let r = self.registry;
        let barrier = cursors.barrier();

        let existing = (0..MAX_GROUPS)
            .find(|&g| r.members(g) != 0 && r.ids[g].load(Ordering::Relaxed) == group_id);

        if let Some(group) = existing {
            let mask = r.members(group);
            let member = (0..MAX_MEMBERS)
                .find(|&m| {
                    mask & (1 << m) == 0
                        && r.member_retired_at[group][m].load(Ordering::Relaxed) <= barrier
                })
                .ok_or(SubscribeError::GroupFull { max: MAX_MEMBERS })?;

            // The start is taken before the bit becomes visible to publishers.
            let start = cursors.read();
            r.members[group].fetch_or(1 << member, Ordering::SeqCst);
            return Ok((group, member, start));
        }

        let group = (0..MAX_GROUPS)
            .find(|&g| {
                r.members(g) == 0 && r.group_retired_at[g].load(Ordering::Relaxed) <= barrier
            })
            .ok_or(SubscribeError::TooManyGroups { max: MAX_GROUPS })?;

        r.ids[group].store(group_id, Ordering::Relaxed);
        for retired_at in &r.member_retired_at[group] {
            retired_at.store(0, Ordering::Relaxed);
        }
        r.counters[group].acks.store(0, Ordering::Relaxed);
        r.counters[group].completed.store(0, Ordering::Relaxed);

        let start = cursors.read();
        r.members[group].store(1, Ordering::SeqCst);
        r.active.fetch_or(1 << group, Ordering::SeqCst);
        Ok((group, 0, start))
    }

    /// Removes a member; removes the group as well when it was the last one.
    ///
    /// Returns the members left in the group (0 = the group is gone).
    pub(crate) fn leave(&self, group: usize, member: usize, write: u64) -> u8 {
        let r = self.registry;
        let mbit = 1u8 << member;

        let remaining = r.members[group].fetch_and(!mbit, Ordering::SeqCst) & !mbit;
        r.member_retired_at[group][member].store(write, Ordering::Relaxed);

        if remaining == 0 {
            r.group_retired_at[group].store(write, Ordering::Relaxed);
            r.active.fetch_and(!(1 << group), Ordering::SeqCst);
        }
        remaining
    }
}

impl Drop for Topology<'_> {
    fn drop(&mut self) {
        self.registry.token.store(false, Ordering::Release);
    }
}

/// A subscribed reader: one member of one reader group.
///
/// Each handle tracks its own position, so readers never contend on a shared
/// consumption cursor. Dropping the handle unsubscribes it.
pub struct ReaderHandle {
    shared: Arc<Shared>,
    group_id: u32,
    group: usize,
    member: usize,
    cursor: Cell<u64>,
}

impl ReaderHandle {
    pub(crate) fn new(
        shared: Arc<Shared>,
        group_id: u32,
        group: usize,
        member: usize,
        start: u64,
    ) -> Self {
        Self {
            shared,
            group_id,
            group,
            member,
            cursor: Cell::new(start),
        }
    }

    /// The caller-chosen group identifier.
    #[inline]
    pub fn group_id(&self) -> u32 {
        self.group_id
    }

    /// Bit position of the group in `group_flags`.
    #[inline]
    pub fn group_bit(&self) -> usize {
        self.group
    }

    /// Bit position of this member in the group's `reader_flags`.
    #[inline]
    pub fn member_bit(&self) -> usize {
        self.member
    }

    /// Next batch number this reader will look at.
    #[inline]
    pub fn position(&self) -> u64 {
        self.cursor.get()
    }

    /// Returns the next visible batch this reader has to acknowledge.
    ///
    /// Canceled batches, batches published before the reader joined and
    /// batches already recycled are skipped. `None` means nothing is visible
    /// yet; waiting is up to the caller.
    pub fn poll(&self) -> Option<BatchView<'_>> {
        let shared = &*self.shared;
        let gbit = 1u16 << self.group;
        let mbit = 1u8 << self.member;

        loop {
            let batch_num = self.cursor.get();
            if batch_num >= shared.cursors.read() {
                return None;
            }
            let barrier = shared.cursors.barrier();
            if batch_num < barrier {
                self.cursor.set(barrier);
                continue;
            }

            let slot = shared.pool.slot(batch_num);
            if slot.batch_num() != batch_num {
                self.cursor.set(batch_num + 1);
                continue;
            }
            // Releasing: every group is done with it.
            if slot.state() != BatchState::Published {
                self.cursor.set(batch_num + 1);
                continue;
            }

            let seq_num = slot.seq_num();
            let len = slot.batch_size();
            let required =
                slot.group_flags() & gbit != 0 && slot.reader_flags(self.group) & mbit == 0;
            // Flags read from a reclaimed slot belong to another batch.
            let current = slot.batch_num() == batch_num;

            self.cursor.set(batch_num + 1);
            if required && current {
                return Some(BatchView {
                    reader: self,
                    batch_num,
                    seq_num,
                    len,
                });
            }
        }
    }

    /// Acknowledges a batch for this member.
    ///
    /// Once every member of the group acknowledged, the group's bit is
    /// cleared. If that clear completes the batch the outcome is
    /// [`AckOutcome::Consumed`] and the caller releases it; at most one
    /// thread ever sees a batch complete.
    pub fn ack(&self, view: BatchView<'_>) -> Result<AckOutcome, AckError> {
        if !ptr::eq(view.reader, self) {
            return Err(AckError::NotSubscribed);
        }

        let shared = &*self.shared;
        let slot = shared.pool.slot(view.batch_num);
        if slot.batch_num() != view.batch_num {
            return Err(AckError::Stale {
                batch_num: view.batch_num,
            });
        }

        let mbit = 1u8 << self.member;
        let prev = slot.ack_member(self.group, self.member);
        if prev & mbit != 0 {
            return Err(AckError::Duplicate {
                batch_num: view.batch_num,
            });
        }

        shared.registry.record_ack(self.group);
        if let Some(m) = shared.metrics() {
            m.add_acks(1);
        }

        let members = shared.registry.members(self.group);
        if prev | mbit | !members != ALL_MEMBERS {
            return Ok(AckOutcome::Pending);
        }

        let gbit = 1u32 << self.group;
        let tag = shared.pool.tag(view.batch_num);
        match slot.clear_pending(tag, gbit) {
            Some(prev) if prev & gbit != 0 => {
                shared.registry.record_completion(self.group);
                if prev == gbit {
                    Ok(AckOutcome::Consumed)
                } else {
                    Ok(AckOutcome::GroupComplete)
                }
            }
            // An unsubscribe sweep already completed the group.
            _ => Ok(AckOutcome::GroupComplete),
        }
    }

    /// Leaves the group. Batches that were only waiting on this reader are
    /// completed, and released when no other group is pending.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.shared.unsubscribe(self.group, self.member);
    }
}

impl fmt::Debug for ReaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderHandle")
            .field("group_id", &self.group_id)
            .field("group", &self.group)
            .field("member", &self.member)
            .field("position", &self.cursor.get())
            .finish()
    }
}

/// Read-only view of a visible batch, handed out by [`ReaderHandle::poll`].
///
/// Entries stay valid until the view is passed to [`ReaderHandle::ack`]: the
/// batch cannot be recycled while this member has not acknowledged it.
pub struct BatchView<'a> {
    reader: &'a ReaderHandle,
    batch_num: u64,
    seq_num: u64,
    len: usize,
}

impl BatchView<'_> {
    #[inline]
    pub fn batch_num(&self) -> u64 {
        self.batch_num
    }

    /// Arena sequence of the first entry.
    #[inline]
    pub fn seq_num(&self) -> u64 {
        self.seq_num
    }

    /// Number of entries in the batch.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bounded view of entry `index` inside the arena.
    pub fn entry_slice(&self, index: usize) -> Result<EntrySlice, EntryError> {
        self.check(index)?;
        Ok(self
            .reader
            .shared
            .arena
            .entry_slice(self.seq_num + index as u64))
    }

    /// Bytes of entry `index`.
    pub fn entry(&self, index: usize) -> Result<&[u8], EntryError> {
        self.check(index)?;
        // SAFETY: the batch is published and this member has not acknowledged
        // it, so it cannot be released and no producer writes these entries.
        Ok(unsafe { self.reader.shared.arena.entry(self.seq_num + index as u64) })
    }

    /// Iterates over the batch's entries in order.
    pub fn entries(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let arena = &self.reader.shared.arena;
        // SAFETY: see `entry`.
        (0..self.len as u64).map(move |i| unsafe { arena.entry(self.seq_num + i) })
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

impl fmt::Debug for BatchView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchView")
            .field("batch_num", &self.batch_num)
            .field("seq_num", &self.seq_num)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptor::BatchState;
    use crate::{AckError, AckOutcome, CancelToken, OverflowReason, RingBuffer, SubscribeError};

    fn publish(ring: &RingBuffer, payload: &[u8]) -> u64 {
        let mut batch = ring.claim(1, &CancelToken::new()).unwrap();
        batch.write_entry(0, payload).unwrap();
        batch.publish()
    }

    #[test]
    fn test_group_bits_are_assigned_in_order() {
        let ring = RingBuffer::with_capacity(4, 8, 16).unwrap();
        let a0 = ring.subscribe(10).unwrap();
        let a1 = ring.subscribe(10).unwrap();
        let b0 = ring.subscribe(20).unwrap();

        assert_eq!((a0.group_bit(), a0.member_bit()), (0, 0));
        assert_eq!((a1.group_bit(), a1.member_bit()), (0, 1));
        assert_eq!((b0.group_bit(), b0.member_bit()), (1, 0));
        assert_eq!(ring.stats().groups.len(), 2);
    }

    #[test]
    fn test_limits() {
        let ring = RingBuffer::with_capacity(4, 8, 16).unwrap();
        let members: Vec<_> = (0..8).map(|_| ring.subscribe(1).unwrap()).collect();
        assert_eq!(
            ring.subscribe(1).unwrap_err(),
            SubscribeError::GroupFull { max: 8 }
        );

        let groups: Vec<_> = (2..17).map(|id| ring.subscribe(id).unwrap()).collect();
        assert_eq!(
            ring.subscribe(99).unwrap_err(),
            SubscribeError::TooManyGroups { max: 16 }
        );
        drop(members);
        drop(groups);
        assert!(ring.subscribe(99).is_ok());
    }

    #[test]
    fn test_every_member_must_ack() {
        let ring = RingBuffer::with_capacity(4, 8, 16).unwrap();
        let r0 = ring.subscribe(1).unwrap();
        let r1 = ring.subscribe(1).unwrap();
        let batch_num = publish(&ring, b"hello");

        let v0 = r0.poll().unwrap();
        assert_eq!(&v0.entry(0).unwrap()[..5], b"hello");
        assert_eq!(r0.ack(v0), Ok(AckOutcome::Pending));
        assert!(ring.release(batch_num).is_err());

        let v1 = r1.poll().unwrap();
        assert_eq!(r1.ack(v1), Ok(AckOutcome::Consumed));
        ring.release(batch_num).unwrap();
    }

    #[test]
    fn test_ack_rejects_foreign_view() {
        let ring = RingBuffer::with_capacity(4, 8, 16).unwrap();
        let r0 = ring.subscribe(1).unwrap();
        let r1 = ring.subscribe(2).unwrap();
        publish(&ring, b"x");

        let view = r0.poll().unwrap();
        assert_eq!(r1.ack(view), Err(AckError::NotSubscribed));
    }

    #[test]
    fn test_late_reader_skips_earlier_batches() {
        let ring = RingBuffer::with_capacity(4, 8, 16).unwrap();
        let early = ring.subscribe(1).unwrap();
        publish(&ring, b"a");

        let late = ring.subscribe(2).unwrap();
        assert_eq!(late.position(), 1);
        assert!(late.poll().is_none());

        publish(&ring, b"b");
        let view = late.poll().unwrap();
        assert_eq!(view.batch_num(), 1);
        drop(view);
        drop(early);
    }

    #[test]
    fn test_new_member_sees_batches_published_after_joining() {
        let ring = RingBuffer::with_capacity(4, 8, 16).unwrap();
        let first = ring.subscribe(1).unwrap();
        let token = CancelToken::new();
        let b0 = ring.claim(1, &token).unwrap();
        let b1 = ring.claim(1, &token).unwrap();
        b1.publish();

        let second = ring.subscribe(1).unwrap();
        b0.publish();
        assert_eq!(ring.read_batch_num(), 2);

        let seen: Vec<u64> = std::iter::from_fn(|| second.poll().map(|v| v.batch_num())).collect();
        assert_eq!(seen, vec![0]);
        let seen: Vec<u64> = std::iter::from_fn(|| first.poll().map(|v| v.batch_num())).collect();
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn test_unsubscribe_completes_pending_batches() {
        let ring = RingBuffer::with_capacity(4, 8, 16).unwrap();
        let a = ring.subscribe(1).unwrap();
        let b = ring.subscribe(2).unwrap();
        let batch_num = publish(&ring, b"x");

        let view = a.poll().unwrap();
        assert_eq!(a.ack(view), Ok(AckOutcome::GroupComplete));
        assert_eq!(
            ring.release(batch_num).unwrap_err().reason(),
            OverflowReason::Pending { groups: 0b10 }
        );

        b.unsubscribe();
        assert_eq!(ring.barrier_batch_num(), 1);
        assert_eq!(ring.stats().groups.len(), 1);
    }

    #[test]
    fn test_departed_member_no_longer_blocks_group() {
        let ring = RingBuffer::with_capacity(4, 8, 16).unwrap();
        let stay = ring.subscribe(1).unwrap();
        let leave = ring.subscribe(1).unwrap();
        publish(&ring, b"x");

        let view = stay.poll().unwrap();
        assert_eq!(stay.ack(view), Ok(AckOutcome::Pending));
        leave.unsubscribe();
        assert_eq!(ring.barrier_batch_num(), 1);
    }

    #[test]
    fn test_ack_after_unsubscribe_sweep_consumes() {
        let ring = RingBuffer::with_capacity(4, 8, 16).unwrap();
        let a = ring.subscribe(1).unwrap();
        let b = ring.subscribe(2).unwrap();
        let batch_num = publish(&ring, b"x");

        let view = a.poll().unwrap();
        // Group 1 still holds the batch, so the sweep does not release it.
        b.unsubscribe();
        assert_eq!(ring.barrier_batch_num(), 0);
        assert_eq!(a.ack(view), Ok(AckOutcome::Consumed));
        ring.release(batch_num).unwrap();
        assert_eq!(ring.barrier_batch_num(), 1);
    }

    #[test]
    fn test_sweep_after_group_complete_releases_once() {
        let ring = RingBuffer::with_capacity(4, 8, 16).unwrap();
        let a = ring.subscribe(1).unwrap();
        let b = ring.subscribe(2).unwrap();
        let batch_num = publish(&ring, b"x");

        let view = a.poll().unwrap();
        assert_eq!(a.ack(view), Ok(AckOutcome::GroupComplete));
        b.unsubscribe();
        assert_eq!(ring.barrier_batch_num(), 1);
        assert_eq!(
            ring.release(batch_num).unwrap_err().reason(),
            OverflowReason::Stale
        );
    }

    #[test]
    fn test_group_that_left_before_publish_is_not_awaited() {
        let ring = RingBuffer::with_capacity(4, 8, 16).unwrap();
        let stay = ring.subscribe(1).unwrap();
        let leave = ring.subscribe(2).unwrap();
        let batch = ring.claim(1, &CancelToken::new()).unwrap();

        leave.unsubscribe();
        let batch_num = batch.publish();
        let view = stay.poll().unwrap();
        assert_eq!(stay.ack(view), Ok(AckOutcome::Consumed));
        ring.release(batch_num).unwrap();
    }

    #[test]
    fn test_poll_skips_slot_being_released() {
        let ring = RingBuffer::with_capacity(4, 8, 16).unwrap();
        let reader = ring.subscribe(1).unwrap();
        publish(&ring, b"a");
        publish(&ring, b"b");

        let slot = reader.shared.pool.slot(0);
        assert!(slot.try_begin_release(BatchState::Published));
        let view = reader.poll().unwrap();
        assert_eq!(view.batch_num(), 1);
        assert_eq!(reader.position(), 2);
        drop(view);
        slot.abort_release(BatchState::Published);
    }
}
