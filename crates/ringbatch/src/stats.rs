use crate::cursors::CursorSnapshot;
use crate::MetricsSnapshot;
use std::fmt;

/// Per reader group counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GroupStats {
    /// Bit position in `group_flags`.
    pub group: u8,
    /// Caller-chosen identifier.
    pub group_id: u32,
    /// Subscribed members.
    pub members: u32,
    /// Member acknowledgements since the group was created.
    pub acks: u64,
    /// Batches this group finished.
    pub completed: u64,
}

/// Snapshot of the ring's progress.
///
/// Cursors are loaded barrier first, so `barrier ≤ read ≤ write` holds within
/// a snapshot even while other threads make progress.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RingStats {
    pub barrier_batch_num: u64,
    pub read_batch_num: u64,
    pub write_batch_num: u64,
    pub barrier_seq_num: u64,
    pub write_seq_num: u64,
    pub groups: Vec<GroupStats>,
    pub metrics: MetricsSnapshot,
}

impl RingStats {
    pub(crate) fn new(
        cursors: CursorSnapshot,
        groups: Vec<GroupStats>,
        metrics: MetricsSnapshot,
    ) -> Self {
        Self {
            barrier_batch_num: cursors.barrier,
            read_batch_num: cursors.read,
            write_batch_num: cursors.write,
            barrier_seq_num: cursors.barrier_seq,
            write_seq_num: cursors.write_seq,
            groups,
            metrics,
        }
    }

    /// Batches claimed but not yet released.
    #[inline]
    pub fn outstanding_batches(&self) -> u64 {
        self.write_batch_num - self.barrier_batch_num
    }

    /// Arena entries claimed but not yet released.
    #[inline]
    pub fn reserved_entries(&self) -> u64 {
        self.write_seq_num - self.barrier_seq_num
    }
}

impl fmt::Display for RingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats - Batch [ B {} | R {} | W {} ] Seq [ B {} | W {} ]",
            self.barrier_batch_num,
            self.read_batch_num,
            self.write_batch_num,
            self.barrier_seq_num,
            self.write_seq_num
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let stats = RingStats::new(
            CursorSnapshot {
                barrier: 1,
                read: 2,
                write: 3,
                barrier_seq: 4,
                write_seq: 9,
            },
            Vec::new(),
            MetricsSnapshot::default(),
        );
        assert_eq!(
            stats.to_string(),
            "Stats - Batch [ B 1 | R 2 | W 3 ] Seq [ B 4 | W 9 ]"
        );
        assert_eq!(stats.outstanding_batches(), 2);
        assert_eq!(stats.reserved_entries(), 5);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serializes_to_json() {
        let stats = RingStats::new(
            CursorSnapshot {
                barrier: 0,
                read: 1,
                write: 1,
                barrier_seq: 0,
                write_seq: 2,
            },
            Vec::new(),
            MetricsSnapshot::default(),
        );
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["read_batch_num"], 1);
        assert_eq!(json["write_seq_num"], 2);
        assert!(json["groups"].as_array().unwrap().is_empty());
    }
}
