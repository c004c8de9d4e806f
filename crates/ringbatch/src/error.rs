//! Error types for ring buffer operations.
//!
//! Every operation returns its own outcome. There is no shared error register.

use std::fmt;
use thiserror::Error;

/// Resource whose allocation failed during initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// The batch descriptor pool.
    DescriptorPool,
    /// The entry data arena.
    Arena,
    /// The reader-group statistics block.
    Stats,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DescriptorPool => "descriptor pool",
            Self::Arena => "data arena",
            Self::Stats => "stats block",
        };
        f.write_str(name)
    }
}

/// Errors returned while building a ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InitError {
    /// An allocation failed. Everything allocated before it has been freed.
    #[error("failed to allocate the {resource}")]
    Alloc {
        /// The resource that could not be allocated.
        resource: Resource,
    },
    /// The requested sizes cannot describe a ring.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: &'static str,
    },
}

impl InitError {
    #[cold]
    pub(crate) const fn alloc(resource: Resource) -> Self {
        Self::Alloc { resource }
    }

    #[cold]
    pub(crate) const fn invalid(reason: &'static str) -> Self {
        Self::InvalidConfig { reason }
    }
}

/// Errors returned by [`RingBuffer::claim`](crate::RingBuffer::claim).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClaimError {
    /// The requested count is zero or exceeds the arena capacity.
    #[error("cannot claim {requested} entries (must be in 1..={max})")]
    Panic {
        /// Number of entries requested.
        requested: usize,
        /// Arena capacity in entries.
        max: usize,
    },
    /// The cancellation token was set while the claim was waiting.
    #[error("claim canceled")]
    Canceled,
}

impl ClaimError {
    /// Claim failures are never transient: contention and saturation are
    /// retried inside the claim itself.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Which release precondition was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowReason {
    /// The descriptor no longer holds this batch (already released).
    Stale,
    /// The batch has not been published.
    NotPublished,
    /// The batch is not yet behind the read frontier.
    NotVisible,
    /// Subscribed groups have not acknowledged the batch yet.
    Pending {
        /// Bitset of groups still pending.
        groups: u16,
    },
}

impl fmt::Display for OverflowReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stale => f.write_str("batch already released"),
            Self::NotPublished => f.write_str("batch not published"),
            Self::NotVisible => f.write_str("batch not yet visible to readers"),
            Self::Pending { groups } => write!(f, "groups {:#06x} have not acknowledged", groups),
        }
    }
}

/// Errors returned by [`RingBuffer::release`](crate::RingBuffer::release).
///
/// A release failure is always a caller bug and leaves every cursor unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReleaseError {
    /// The batch cannot be recycled yet (RELEASE_OVERFLOW).
    #[error("release overflow on batch {batch_num}: {reason}")]
    Overflow {
        /// The batch the caller tried to release.
        batch_num: u64,
        /// The violated precondition.
        reason: OverflowReason,
    },
}

impl ReleaseError {
    #[cold]
    pub(crate) const fn overflow(batch_num: u64, reason: OverflowReason) -> Self {
        Self::Overflow { batch_num, reason }
    }

    /// Returns the violated precondition.
    pub fn reason(&self) -> OverflowReason {
        match self {
            Self::Overflow { reason, .. } => *reason,
        }
    }
}

/// Errors returned by [`RingBuffer::subscribe`](crate::RingBuffer::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubscribeError {
    /// Every group bit is in use (or still draining a departed group).
    #[error("too many reader groups (max: {max})")]
    TooManyGroups {
        /// Maximum number of groups.
        max: usize,
    },
    /// Every member bit of the group is in use.
    #[error("reader group is full (max members: {max})")]
    GroupFull {
        /// Maximum members per group.
        max: usize,
    },
}

/// Errors returned by [`ReaderHandle::ack`](crate::ReaderHandle::ack).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AckError {
    /// The view does not belong to this handle's ring or group.
    #[error("batch view was not produced by this reader")]
    NotSubscribed,
    /// The batch was already acknowledged by this member.
    #[error("batch {batch_num} already acknowledged")]
    Duplicate {
        /// The batch acknowledged twice.
        batch_num: u64,
    },
    /// The descriptor no longer holds the viewed batch.
    #[error("batch {batch_num} is no longer held by its descriptor")]
    Stale {
        /// The batch the view referred to.
        batch_num: u64,
    },
}

/// Errors returned when addressing entries through a batch handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EntryError {
    /// The entry index is outside the claimed count.
    #[error("entry {index} out of range for batch of {len}")]
    OutOfRange {
        /// Requested index.
        index: usize,
        /// Entries in the batch.
        len: usize,
    },
    /// The payload does not fit in one entry.
    #[error("payload of {len} bytes exceeds entry size {entry_size}")]
    TooLarge {
        /// Payload length.
        len: usize,
        /// Entry size in bytes.
        entry_size: usize,
    },
}
