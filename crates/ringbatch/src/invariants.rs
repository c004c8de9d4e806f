//! Debug assertion macros for ring buffer invariants.
//!
//! They are only active in debug builds (`#[cfg(debug_assertions)]`), so there
//! is zero overhead in release builds.

// =============================================================================
// Cursor ordering: barrier ≤ read ≤ write
// =============================================================================

/// Assert that the three batch cursors are ordered.
///
/// **Invariant**: `barrier ≤ read ≤ write`
///
/// The cursors are loaded one at a time, so callers must load them in
/// barrier → read → write order for the check to be sound under concurrency.
macro_rules! debug_assert_cursor_order {
    ($barrier:expr, $read:expr, $write:expr) => {
        debug_assert!(
            ($barrier) <= ($read) && ($read) <= ($write),
            "cursor order violated: barrier {} read {} write {}",
            $barrier,
            $read,
            $write
        )
    };
}

// =============================================================================
// Bounded outstanding batches
// =============================================================================

/// Assert that producers did not run more than one lap ahead of the barrier.
///
/// **Invariant**: `write - barrier ≤ batch_capacity`
///
/// Used in: `claim()` after advancing the write cursor
macro_rules! debug_assert_outstanding {
    ($write:expr, $barrier:expr, $capacity:expr) => {
        debug_assert!(
            ($write).saturating_sub($barrier) <= $capacity,
            "outstanding batches {} exceed capacity {}",
            ($write).saturating_sub($barrier),
            $capacity
        )
    };
}

/// Assert that reserved arena entries fit in the arena.
///
/// **Invariant**: `write_seq - barrier_seq ≤ data_capacity`
macro_rules! debug_assert_arena_bounded {
    ($write_seq:expr, $barrier_seq:expr, $capacity:expr) => {
        debug_assert!(
            ($write_seq).saturating_sub($barrier_seq) <= $capacity,
            "reserved entries {} exceed arena capacity {}",
            ($write_seq).saturating_sub($barrier_seq),
            $capacity
        )
    };
}

// =============================================================================
// Monotonic progress
// =============================================================================

/// Assert that a cursor only increases.
///
/// Used in: frontier and barrier advancement
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            ($new) >= ($old),
            "{} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// Exclusive claim
// =============================================================================

/// Assert that the winner of a slot CAS is the one that advanced the write
/// cursor from its own index.
///
/// Used in: `claim()` after `fetch_add` on the write cursor
macro_rules! debug_assert_claimed_index {
    ($expected:expr, $actual:expr) => {
        debug_assert_eq!(
            $expected, $actual,
            "write cursor moved under an owned slot: expected {}, found {}",
            $expected, $actual
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_arena_bounded;
pub(crate) use debug_assert_claimed_index;
pub(crate) use debug_assert_cursor_order;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_outstanding;
