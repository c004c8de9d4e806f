use crate::arena::{DataArena, EntrySlice};
use crate::batch::Batch;
use crate::cursors::Cursors;
use crate::descriptor::{
    BatchPool, BatchState, ALL_MEMBERS, FRONTIER_HOLD, MAX_GROUPS, PUBLISH_HOLD, SENTINEL,
};
use crate::invariants::{
    debug_assert_arena_bounded, debug_assert_claimed_index, debug_assert_cursor_order,
    debug_assert_monotonic, debug_assert_outstanding,
};
use crate::registry::{ReaderHandle, Registry};
use crate::stats::RingStats;
use crate::{
    Backoff, CancelToken, ClaimError, Config, InitError, Metrics, MetricsSnapshot, OverflowReason,
    ReleaseError, RingInfo, SubscribeError,
};
use std::ops::Range;
use std::sync::atomic::Ordering;
use std::sync::Arc;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// Many producers and many readers share one descriptor pool, one arena and
// five cursors. Every protocol atomic uses SeqCst: the frontier and barrier
// scans reason about the relative order of stores to *different* locations
// (a slot's state and the shared cursor), which Acquire/Release alone does
// not order.
//
// ## Batch Numbers (ABA Prevention)
//
// Batch numbers and arena sequences are unbounded u64 values; slots and arena
// offsets are computed with `& mask` only on access. A descriptor keeps the
// number of the last batch it held, so a slot accepts batch `k` only when it
// still carries `k - capacity` (or the first-lap sentinel).
//
// ## Claim
//
// 1. Load `write` (candidate index). Wait while `index ≥ barrier + capacity`.
// 2. CAS the slot's `batch_size` 0 → count, then re-check the generation: a
//    stale candidate may win the CAS on a slot that already moved on. Losers
//    roll back with `batch_size = 0` and leave no other trace.
// 3. The winner is the only thread that can move `write` from `index`, so it
//    also owns `write_seq`: it waits for arena space, assigns
//    `seq_num = write_seq`, stores `write_seq + count`, then increments
//    `write`. Arena ranges are therefore assigned in batch order.
//
// ## Publish / Cancel (read frontier)
//
// The owner stores `Published` (or `Canceled`) and then reads `read` with a
// read-modify-write. Only a thread that finds `read == batch_num` scans
// forward over closed slots and CASes `read`. After a successful CAS it scans
// again from the new frontier: a concurrent publisher whose RMW on `read` was
// ordered before our CAS made its state visible to us, so that rescan is the
// one that picks it up. Publishers ordered after our CAS see the new frontier
// themselves.
//
// ## Completion
//
// A published batch carries a `pending` word: the groups that must still
// acknowledge, a publish hold and a frontier hold. The publisher drops groups
// that left while it armed the flags, then its hold. The thread that moves
// the frontier past the batch drops the frontier hold. Acks and unsubscribe
// sweeps drop group bits. Every clear is a CAS tagged with the batch's lap,
// so exactly one thread sees the word become empty. A reader whose ack does
// it gets `Consumed` and releases; otherwise the publisher, frontier mover or
// sweep that did it releases the batch itself.
//
// ## Release (barrier)
//
// A release CASes the slot's state Published → Releasing, resets it and leaves
// `state = Available` with `batch_num` unchanged (the released marker). The
// barrier scan moves `barrier` over contiguous released markers below `read`
// using the same scan-and-CAS loop, resetting canceled slots on the way, and
// raises `barrier_seq` to the arena end of the last batch it passed.
//
// ## Arena Ownership
//
// Entry bytes are not atomic. A producer writes entries only between claim
// and publish; readers access them only between the frontier passing the
// batch and their group's acknowledgement. The SeqCst store of `Published`
// and the SeqCst load in the reader's poll order those accesses.
//
// =============================================================================

/// State shared by every handle of one ring.
pub(crate) struct Shared {
    pub(crate) info: RingInfo,
    pub(crate) config: Config,
    pub(crate) cursors: Cursors,
    pub(crate) pool: BatchPool,
    pub(crate) arena: DataArena,
    pub(crate) registry: Registry,
    pub(crate) metrics: Metrics,
}

impl Shared {
    fn new(config: Config) -> Result<Self, InitError> {
        let info = RingInfo::new(&config)?;
        // Each step drops what the previous ones allocated if it fails.
        let pool = BatchPool::new(&info)?;
        let arena = DataArena::new(&info)?;
        let registry = Registry::new()?;

        Ok(Self {
            info,
            config,
            cursors: Cursors::new(),
            pool,
            arena,
            registry,
            metrics: Metrics::new(),
        })
    }

    #[inline]
    pub(crate) fn metrics(&self) -> Option<&Metrics> {
        self.config.enable_metrics.then_some(&self.metrics)
    }

    // ---------------------------------------------------------------------
    // PRODUCER SIDE
    // ---------------------------------------------------------------------

    /// Reserves a descriptor and `count` arena entries.
    ///
    /// Returns `(batch_num, seq_num)`.
    pub(crate) fn claim(
        &self,
        count: usize,
        cancel: &CancelToken,
    ) -> Result<(u64, u64), ClaimError> {
        let max = self.info.data_capacity();
        if count == 0 || count > max {
            trace_warn!(count, max, "claim rejected");
            return Err(ClaimError::Panic {
                requested: count,
                max,
            });
        }

        let capacity = self.pool.capacity();
        let mut backoff = Backoff::with_policy(self.config.backoff);
        let mut spins = 0u64;
        let mut index = self.cursors.write();

        let result = loop {
            if index < self.cursors.barrier() + capacity {
                let slot = self.pool.slot(index);
                if slot.accepts(index, capacity) && slot.try_own(count) {
                    if slot.accepts(index, capacity) {
                        match self.reserve_arena(count, cancel, &mut backoff, &mut spins) {
                            Ok(seq_num) => {
                                slot.begin_writing(index, seq_num, count);
                                self.commit_claim(index, seq_num, count);
                                break Ok((index, seq_num));
                            }
                            Err(err) => {
                                slot.disown();
                                break Err(err);
                            }
                        }
                    }
                    // Won a slot that already moved past `index`.
                    slot.disown();
                }
            }

            backoff.snooze();
            spins += 1;
            if cancel.is_canceled() {
                break Err(ClaimError::Canceled);
            }

            let write = self.cursors.write();
            if write > index {
                index = write;
                backoff.reset();
            }
        };

        if let Some(m) = self.metrics() {
            m.add_claim_spins(spins);
            if result.is_ok() {
                m.add_claims(1);
            }
        }
        if result.is_err() {
            trace_debug!(count, spins, "claim canceled");
        }
        result
    }

    /// Waits until `count` entries past `write_seq` are free.
    ///
    /// Only the winner of the current write index calls this, so `write_seq`
    /// cannot move underneath it.
    fn reserve_arena(
        &self,
        count: usize,
        cancel: &CancelToken,
        backoff: &mut Backoff,
        spins: &mut u64,
    ) -> Result<u64, ClaimError> {
        let seq_num = self.cursors.write_seq();
        let end = seq_num + count as u64;
        let capacity = self.info.data_capacity() as u64;

        backoff.reset();
        while end - self.cursors.barrier_seq() > capacity {
            backoff.snooze();
            *spins += 1;
            if cancel.is_canceled() {
                return Err(ClaimError::Canceled);
            }
        }
        Ok(seq_num)
    }

    fn commit_claim(&self, index: u64, seq_num: u64, count: usize) {
        let end = seq_num + count as u64;
        self.cursors.write_seq.store(end, Ordering::SeqCst);
        let prev = self.cursors.write.fetch_add(1, Ordering::SeqCst);

        debug_assert_claimed_index!(index, prev);
        debug_assert_outstanding!(prev + 1, self.cursors.barrier(), self.pool.capacity());
        debug_assert_arena_bounded!(
            end,
            self.cursors.barrier_seq(),
            self.info.data_capacity() as u64
        );
    }

    /// Writing → Published, then tries to move the frontier.
    pub(crate) fn publish(&self, batch_num: u64) {
        let slot = self.pool.slot(batch_num);
        let tag = self.pool.tag(batch_num);
        let groups = self.registry.active();
        slot.arm_flags(tag, groups, |g| self.registry.members(g));
        slot.mark_published();

        // A group that left before the slot was published was not swept here.
        let departed = groups & !self.registry.active();
        for group in (0..MAX_GROUPS).filter(|g| departed & (1 << g) != 0) {
            slot.clear_pending(tag, 1 << group);
        }

        if let Some(m) = self.metrics() {
            m.add_publishes(1);
        }
        if slot.clear_pending(tag, PUBLISH_HOLD) == Some(PUBLISH_HOLD) {
            self.release_completed(batch_num);
        }
        self.advance_frontier(batch_num);
    }

    /// Writing → Canceled. The batch still closes its place in the frontier.
    pub(crate) fn cancel(&self, batch_num: u64) {
        self.pool
            .slot(batch_num)
            .mark_canceled(self.pool.tag(batch_num));

        if let Some(m) = self.metrics() {
            m.add_cancels(1);
        }
        trace_debug!(batch_num, "batch canceled");
        self.advance_frontier(batch_num);
    }

    /// Moves `read` forward over contiguous closed batches, starting at
    /// `batch_num` if it is the current frontier.
    fn advance_frontier(&self, batch_num: u64) {
        let mut start = batch_num;
        if self.cursors.read_handoff() != start {
            return;
        }

        let mut advanced = false;
        loop {
            let mut end = start;
            while self.pool.slot(end).is_closed_at(end) {
                end += 1;
            }
            if end == start {
                break;
            }

            match self
                .cursors
                .read
                .compare_exchange(start, end, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    debug_assert_monotonic!("read", start, end);
                    if end - start > 1 {
                        trace_debug!(from = start, to = end, "frontier closed a gap");
                    }
                    if let Some(m) = self.metrics() {
                        m.add_frontier_advances(1);
                    }
                    self.pass_frontier(start..end);
                    advanced = true;
                    start = end;
                }
                Err(actual) => start = actual,
            }
        }

        if advanced {
            self.advance_barrier();
        }
    }

    /// Drops the frontier hold of batches that just became visible, releasing
    /// the ones nothing else is waiting for.
    ///
    /// Canceled batches carry no hold; the barrier scan resets them.
    fn pass_frontier(&self, batches: Range<u64>) {
        for batch_num in batches {
            let slot = self.pool.slot(batch_num);
            if slot.clear_pending(self.pool.tag(batch_num), FRONTIER_HOLD) == Some(FRONTIER_HOLD)
            {
                self.try_release_completed(batch_num);
            }
        }
    }

    /// Releases a batch whose `pending` word this thread emptied, then moves
    /// the barrier.
    fn release_completed(&self, batch_num: u64) {
        if self.try_release_completed(batch_num) {
            self.advance_barrier();
        }
    }

    fn try_release_completed(&self, batch_num: u64) -> bool {
        match self.try_release(batch_num) {
            Ok(()) => true,
            Err(_err) => {
                trace_warn!(batch_num, error = %_err, "completed batch was not released");
                false
            }
        }
    }

    // ---------------------------------------------------------------------
    // CONSUMER SIDE
    // ---------------------------------------------------------------------

    /// Releases a batch and moves the barrier.
    pub(crate) fn release(&self, batch_num: u64) -> Result<(), ReleaseError> {
        self.try_release(batch_num)?;
        self.advance_barrier();
        Ok(())
    }

    /// Checks the release preconditions and resets the descriptor. Leaves the
    /// cursors alone.
    fn try_release(&self, batch_num: u64) -> Result<(), ReleaseError> {
        let overflow = |reason| {
            trace_warn!(batch_num, %reason, "release overflow");
            ReleaseError::overflow(batch_num, reason)
        };

        let slot = self.pool.slot(batch_num);
        if slot.batch_num() != batch_num {
            return Err(overflow(OverflowReason::Stale));
        }
        match slot.state() {
            BatchState::Published => {}
            BatchState::Writing | BatchState::Canceled => {
                return Err(overflow(OverflowReason::NotPublished))
            }
            BatchState::Available | BatchState::Releasing => {
                return Err(overflow(OverflowReason::Stale))
            }
        }
        if batch_num >= self.cursors.read() {
            return Err(overflow(OverflowReason::NotVisible));
        }
        let pending = slot.pending();
        if pending & (PUBLISH_HOLD | FRONTIER_HOLD) != 0 {
            return Err(overflow(OverflowReason::NotVisible));
        }
        if pending != 0 {
            return Err(overflow(OverflowReason::Pending {
                groups: pending as u16,
            }));
        }

        if !slot.try_begin_release(BatchState::Published) {
            return Err(overflow(OverflowReason::Stale));
        }
        // A slot in Published/Releasing cannot be reclaimed, so this check is
        // final once the CAS has succeeded.
        if slot.batch_num() != batch_num {
            slot.abort_release(BatchState::Published);
            return Err(overflow(OverflowReason::Stale));
        }
        slot.reset();

        if let Some(m) = self.metrics() {
            m.add_releases(1);
        }
        Ok(())
    }

    /// Moves `barrier` forward over contiguous released batches below `read`,
    /// resetting canceled batches as it passes them.
    pub(crate) fn advance_barrier(&self) {
        loop {
            let start = self.cursors.barrier();
            let read = self.cursors.read();
            debug_assert_cursor_order!(start, read, self.cursors.write());

            let mut end = start;
            let mut seq_end = None;
            while end < read {
                let slot = self.pool.slot(end);
                if slot.batch_num() == end
                    && slot.state() == BatchState::Canceled
                    && slot.try_begin_release(BatchState::Canceled)
                {
                    if slot.batch_num() == end {
                        slot.reset();
                    } else {
                        slot.abort_release(BatchState::Canceled);
                    }
                }
                if !slot.is_released_at(end) {
                    break;
                }
                seq_end = Some(slot.seq_end());
                end += 1;
            }
            if end == start {
                return;
            }

            if self
                .cursors
                .barrier
                .compare_exchange(start, end, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                debug_assert_monotonic!("barrier", start, end);
                if let Some(seq_end) = seq_end {
                    self.cursors.barrier_seq.fetch_max(seq_end, Ordering::SeqCst);
                }
            }
        }
    }

    /// Removes a reader and completes the batches that were only waiting on it.
    pub(crate) fn unsubscribe(&self, group: usize, member: usize) {
        let topology = self.registry.lock();
        let remaining = topology.leave(group, member, self.cursors.write());
        trace_debug!(
            group,
            member,
            group_closed = remaining == 0,
            "reader unsubscribed"
        );

        let gbit = 1u16 << group;
        let mut released = false;
        for slot in self.pool.iter() {
            // batch_num first: a newer occupant fails the tag check below.
            let batch_num = slot.batch_num();
            if batch_num == SENTINEL
                || slot.state() != BatchState::Published
                || slot.group_flags() & gbit == 0
            {
                continue;
            }
            // The remaining members have all acknowledged.
            let done = remaining == 0
                || slot.reader_flags(group) | !remaining == ALL_MEMBERS;
            if done
                && slot.clear_pending(self.pool.tag(batch_num), u32::from(gbit))
                    == Some(u32::from(gbit))
            {
                released |= self.try_release_completed(batch_num);
            }
        }
        drop(topology);

        if released {
            self.advance_barrier();
        }
    }

    pub(crate) fn stats(&self) -> RingStats {
        let cursors = self.cursors.snapshot();
        RingStats::new(
            cursors,
            self.registry.group_stats(),
            self.metrics.snapshot(),
        )
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        trace_debug!(stats = %self.stats(), "ring buffer released");
    }
}

/// Lock-free multi-producer batch ring buffer.
///
/// Producers [`claim`](Self::claim) a batch of entries, write them and
/// publish. Batches become visible to readers strictly in batch order. Reader
/// groups [`subscribe`](Self::subscribe), poll and acknowledge; a batch is
/// recycled by [`release`](Self::release) once every group acknowledged it.
///
/// The handle is cheap to clone; clones share the same ring. The buffers are
/// freed when the last handle (including reader handles) is dropped.
#[derive(Clone)]
pub struct RingBuffer {
    shared: Arc<Shared>,
}

impl RingBuffer {
    /// Allocates the descriptor pool, the arena and the reader-group stats.
    ///
    /// Capacities are rounded up to powers of two.
    pub fn new(config: Config) -> Result<Self, InitError> {
        let shared = Shared::new(config)?;
        trace_debug!(info = %shared.info, "ring buffer initialized");
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Shorthand for [`new`](Self::new) with default backoff and no metrics.
    pub fn with_capacity(
        batch_capacity: usize,
        data_capacity: usize,
        entry_size: usize,
    ) -> Result<Self, InitError> {
        Self::new(Config::new(batch_capacity, data_capacity, entry_size))
    }

    // ---------------------------------------------------------------------
    // INTROSPECTION
    // ---------------------------------------------------------------------

    /// Sizing facts computed at construction.
    #[inline]
    pub fn info(&self) -> RingInfo {
        self.shared.info
    }

    /// The configuration the ring was built with.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Snapshot of the cursors, reader groups and metrics.
    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }

    /// Current metric counters (all zero unless metrics are enabled).
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Next batch number a claim will receive.
    #[inline]
    pub fn write_batch_num(&self) -> u64 {
        self.shared.cursors.write()
    }

    /// Frontier: every batch below it is visible to readers.
    #[inline]
    pub fn read_batch_num(&self) -> u64 {
        self.shared.cursors.read()
    }

    /// Every batch below it has been released.
    #[inline]
    pub fn barrier_batch_num(&self) -> u64 {
        self.shared.cursors.barrier()
    }

    /// State of `batch_num`, or `None` if its descriptor holds another batch.
    pub fn batch_state(&self, batch_num: u64) -> Option<BatchState> {
        let slot = self.shared.pool.slot(batch_num);
        let state = slot.state();
        (slot.batch_num() == batch_num).then_some(state)
    }

    // ---------------------------------------------------------------------
    // ARENA ADDRESSING
    // ---------------------------------------------------------------------

    /// Byte range of the entry addressed by `seq_num` inside the arena.
    ///
    /// Callers must stay within the entries their batch claimed.
    #[inline]
    pub fn entry_range(&self, seq_num: u64) -> Range<usize> {
        self.shared.arena.entry_range(seq_num)
    }

    /// Bounded view of the entry addressed by `seq_num`.
    #[inline]
    pub fn entry_slice(&self, seq_num: u64) -> EntrySlice {
        self.shared.arena.entry_slice(seq_num)
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Claims a batch of `count` entries.
    ///
    /// Spins (with the configured backoff) while another producer wins the
    /// candidate slot or while the ring is saturated, until it succeeds or
    /// `cancel` is set. There is no internal timeout.
    ///
    /// # Errors
    ///
    /// - [`ClaimError::Panic`] if `count` is zero or larger than the arena
    /// - [`ClaimError::Canceled`] if `cancel` was set while waiting
    pub fn claim(&self, count: usize, cancel: &CancelToken) -> Result<Batch<'_>, ClaimError> {
        let (batch_num, seq_num) = self.shared.claim(count, cancel)?;
        Ok(Batch::new(&self.shared, batch_num, seq_num, count))
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Registers a reader in group `group_id`, creating the group if needed.
    ///
    /// The reader sees every batch that becomes visible after it joined.
    pub fn subscribe(&self, group_id: u32) -> Result<ReaderHandle, SubscribeError> {
        let (group, member, start) = {
            let topology = self.shared.registry.lock();
            topology.join(group_id, &self.shared.cursors)?
        };
        trace_debug!(group_id, group, member, start, "reader subscribed");
        Ok(ReaderHandle::new(
            Arc::clone(&self.shared),
            group_id,
            group,
            member,
            start,
        ))
    }

    /// Returns a fully acknowledged batch to the pool and advances the barrier.
    ///
    /// # Errors
    ///
    /// [`ReleaseError::Overflow`] when the batch is not published, not yet
    /// visible, still pending in some group, or no longer held by its
    /// descriptor (already released). Cursors are unchanged on error.
    pub fn release(&self, batch_num: u64) -> Result<(), ReleaseError> {
        self.shared.release(batch_num)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("info", &self.shared.info)
            .field("cursors", &self.shared.cursors.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(batches: usize, data: usize) -> RingBuffer {
        RingBuffer::with_capacity(batches, data, 16).unwrap()
    }

    #[test]
    fn test_claim_publish_sequential() {
        let ring = ring(4, 8);
        let token = CancelToken::new();

        let b0 = ring.claim(2, &token).unwrap();
        assert_eq!(b0.batch_num(), 0);
        assert_eq!(b0.seq_num(), 0);
        let b1 = ring.claim(3, &token).unwrap();
        assert_eq!(b1.batch_num(), 1);
        assert_eq!(b1.seq_num(), 2);
        assert_eq!(ring.write_batch_num(), 2);
        assert_eq!(ring.stats().write_seq_num, 5);

        b0.publish();
        b1.publish();
        assert_eq!(ring.read_batch_num(), 2);
    }

    #[test]
    fn test_claim_rejects_bad_counts() {
        let ring = ring(4, 8);
        let token = CancelToken::new();
        assert_eq!(
            ring.claim(0, &token).unwrap_err(),
            ClaimError::Panic {
                requested: 0,
                max: 8
            }
        );
        assert!(matches!(
            ring.claim(9, &token),
            Err(ClaimError::Panic { requested: 9, .. })
        ));
        assert_eq!(ring.write_batch_num(), 0);
    }

    #[test]
    fn test_out_of_order_publish_closes_gap() {
        let ring = ring(4, 8);
        let _reader = ring.subscribe(1).unwrap();
        let token = CancelToken::new();

        let b0 = ring.claim(1, &token).unwrap();
        let b1 = ring.claim(1, &token).unwrap();
        let b2 = ring.claim(1, &token).unwrap();

        b2.publish();
        assert_eq!(ring.read_batch_num(), 0);
        b1.publish();
        assert_eq!(ring.read_batch_num(), 0);
        b0.publish();
        assert_eq!(ring.read_batch_num(), 3);
    }

    #[test]
    fn test_unread_batches_are_recycled() {
        // Without subscribers nobody has to acknowledge, so the frontier
        // releases batches as it passes them.
        let ring = ring(2, 4);
        let token = CancelToken::new();
        for i in 0..10u64 {
            let batch = ring.claim(3, &token).unwrap();
            assert_eq!(batch.batch_num(), i);
            batch.publish();
        }
        let stats = ring.stats();
        assert_eq!(stats.barrier_batch_num, 10);
        assert_eq!(stats.barrier_seq_num, 30);
    }

    #[test]
    fn test_cancel_skips_and_recycles() {
        let ring = ring(4, 8);
        let reader = ring.subscribe(7).unwrap();
        let token = CancelToken::new();

        let b0 = ring.claim(1, &token).unwrap();
        let b1 = ring.claim(1, &token).unwrap();
        b1.publish();
        b0.cancel();
        assert_eq!(ring.read_batch_num(), 2);

        let view = reader.poll().unwrap();
        assert_eq!(view.batch_num(), 1);
        assert!(reader.poll().is_none());
        reader.ack(view).unwrap();
        ring.release(1).unwrap();
        assert_eq!(ring.barrier_batch_num(), 2);
        assert_eq!(ring.batch_state(0), Some(BatchState::Available));
    }

    #[test]
    fn test_saturated_claim_honors_cancel() {
        let ring = ring(2, 8);
        let _reader = ring.subscribe(1).unwrap();
        let token = CancelToken::new();
        ring.claim(1, &token).unwrap().publish();
        ring.claim(1, &token).unwrap().publish();

        let canceled = CancelToken::new();
        canceled.cancel();
        assert_eq!(ring.claim(1, &canceled).unwrap_err(), ClaimError::Canceled);
        assert_eq!(ring.write_batch_num(), 2);
    }

    #[test]
    fn test_arena_exhaustion_honors_cancel() {
        let ring = ring(8, 4);
        let _reader = ring.subscribe(1).unwrap();
        let token = CancelToken::new();
        ring.claim(3, &token).unwrap().publish();

        let canceled = CancelToken::new();
        canceled.cancel();
        assert_eq!(ring.claim(2, &canceled).unwrap_err(), ClaimError::Canceled);
        // The rolled back claim left no trace.
        assert_eq!(ring.write_batch_num(), 1);
        assert_eq!(ring.stats().write_seq_num, 3);
        assert!(ring.claim(1, &token).is_ok());
    }

    #[test]
    fn test_metrics_are_opt_in() {
        let metered = RingBuffer::new(Config::new(4, 8, 16).with_metrics(true)).unwrap();
        let token = CancelToken::new();
        metered.claim(1, &token).unwrap().publish();
        metered.claim(1, &token).unwrap().cancel();

        let m = metered.metrics();
        assert_eq!(m.claims, 2);
        assert_eq!(m.publishes, 1);
        assert_eq!(m.cancels, 1);
        assert_eq!(m.releases, 1);

        let quiet = ring(4, 8);
        quiet.claim(1, &token).unwrap().publish();
        assert_eq!(quiet.metrics(), MetricsSnapshot::default());
    }
}
