use crate::error::InitError;
use std::fmt;
use std::time::Duration;

/// Cooperative wait policy used while a claim is contended or saturated.
///
/// A waiting producer spins with PAUSE hints (doubling up to `2^spin_limit`
/// spins), then yields to the OS until `yield_limit` steps have elapsed, and
/// from then on sleeps for `sleep` between attempts. The cancellation token is
/// checked after every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Steps spent spinning before the first yield (`2^spin_limit` max spins).
    pub spin_limit: u32,
    /// Step count after which each wait sleeps instead of yielding.
    pub yield_limit: u32,
    /// Sleep between attempts once the yield phase is exhausted.
    pub sleep: Duration,
}

impl BackoffPolicy {
    /// Creates a policy with explicit limits.
    pub const fn new(spin_limit: u32, yield_limit: u32, sleep: Duration) -> Self {
        Self {
            spin_limit,
            yield_limit,
            sleep,
        }
    }

    /// Spins longer and never sleeps for more than a few microseconds.
    pub const fn aggressive() -> Self {
        Self::new(8, 16, Duration::from_micros(5))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(6, 10, Duration::from_micros(50))
    }
}

/// Configuration for a [`RingBuffer`](crate::RingBuffer).
///
/// Capacities are requested values; they are rounded up to powers of two when
/// the ring is built (see [`RingInfo`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of batch descriptors in the pool.
    pub batch_capacity: usize,
    /// Number of entries in the data arena.
    pub data_capacity: usize,
    /// Bytes per entry.
    pub entry_size: usize,
    /// Wait policy for contended or saturated claims.
    pub backoff: BackoffPolicy,
    /// Enable metrics collection (slight overhead)
    pub enable_metrics: bool,
}

impl Config {
    /// Creates a new configuration with the default backoff and no metrics.
    pub const fn new(batch_capacity: usize, data_capacity: usize, entry_size: usize) -> Self {
        Self {
            batch_capacity,
            data_capacity,
            entry_size,
            backoff: BackoffPolicy::new(6, 10, Duration::from_micros(50)),
            enable_metrics: false,
        }
    }

    /// Sets the claim backoff policy.
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enables or disables metrics collection.
    pub const fn with_metrics(mut self, enable_metrics: bool) -> Self {
        self.enable_metrics = enable_metrics;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(1024, 64 * 1024, 64)
    }
}

/// Low latency configuration (256 batches, 4K cache-line entries)
pub const LOW_LATENCY_CONFIG: Config = Config::new(256, 4096, 64)
    .with_backoff(BackoffPolicy::aggressive());

/// High throughput configuration (64K batches, 1M entries of 128 bytes)
pub const HIGH_THROUGHPUT_CONFIG: Config = Config::new(64 * 1024, 1024 * 1024, 128);

/// Immutable sizing facts computed once at construction.
///
/// Both capacities are powers of two, so slot and arena indices are computed
/// with a bitwise AND against the corresponding mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RingInfo {
    batch_capacity: usize,
    batch_mask: usize,
    data_capacity: usize,
    data_mask: usize,
    entry_size: usize,
    total_arena_bytes: usize,
}

impl RingInfo {
    /// Rounds the requested capacities up to powers of two and derives masks.
    pub fn new(config: &Config) -> Result<Self, InitError> {
        if config.batch_capacity == 0 {
            return Err(InitError::invalid("batch capacity must be non-zero"));
        }
        if config.data_capacity == 0 {
            return Err(InitError::invalid("data capacity must be non-zero"));
        }
        if config.entry_size == 0 {
            return Err(InitError::invalid("entry size must be non-zero"));
        }

        let batch_capacity = config
            .batch_capacity
            .checked_next_power_of_two()
            .ok_or_else(|| InitError::invalid("batch capacity overflows when rounded"))?;
        let data_capacity = config
            .data_capacity
            .checked_next_power_of_two()
            .ok_or_else(|| InitError::invalid("data capacity overflows when rounded"))?;
        let total_arena_bytes = data_capacity
            .checked_mul(config.entry_size)
            .ok_or_else(|| InitError::invalid("arena size overflows usize"))?;

        Ok(Self {
            batch_capacity,
            batch_mask: batch_capacity - 1,
            data_capacity,
            data_mask: data_capacity - 1,
            entry_size: config.entry_size,
            total_arena_bytes,
        })
    }

    /// Number of batch descriptors.
    #[inline]
    pub const fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    /// Mask for descriptor slot wrapping.
    #[inline]
    pub const fn batch_mask(&self) -> usize {
        self.batch_mask
    }

    /// Number of entries in the arena.
    #[inline]
    pub const fn data_capacity(&self) -> usize {
        self.data_capacity
    }

    /// Mask for arena index wrapping.
    #[inline]
    pub const fn data_mask(&self) -> usize {
        self.data_mask
    }

    /// Bytes per entry.
    #[inline]
    pub const fn entry_size(&self) -> usize {
        self.entry_size
    }

    /// Total bytes allocated to the arena.
    #[inline]
    pub const fn total_arena_bytes(&self) -> usize {
        self.total_arena_bytes
    }
}

impl fmt::Display for RingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Info - Batch# [ {} ] Data# [ {} ] Entry# [ {} ] - Entry Buffer# [ {} ]",
            self.batch_capacity, self.data_capacity, self.entry_size, self.total_arena_bytes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacities_round_up() {
        let info = RingInfo::new(&Config::new(5, 9, 16)).unwrap();
        assert_eq!(info.batch_capacity(), 8);
        assert_eq!(info.batch_mask(), 7);
        assert_eq!(info.data_capacity(), 16);
        assert_eq!(info.data_mask(), 15);
        assert_eq!(info.total_arena_bytes(), 16 * 16);
    }

    #[test]
    fn test_exact_powers_are_kept() {
        let info = RingInfo::new(&Config::new(4, 8, 16)).unwrap();
        assert_eq!(info.batch_capacity(), 4);
        assert_eq!(info.data_capacity(), 8);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(matches!(
            RingInfo::new(&Config::new(0, 8, 16)),
            Err(InitError::InvalidConfig { .. })
        ));
        assert!(matches!(
            RingInfo::new(&Config::new(4, 0, 16)),
            Err(InitError::InvalidConfig { .. })
        ));
        assert!(matches!(
            RingInfo::new(&Config::new(4, 8, 0)),
            Err(InitError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_arena_overflow_rejected() {
        let config = Config::new(4, usize::MAX / 2, 4);
        assert!(matches!(
            RingInfo::new(&config),
            Err(InitError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(RingInfo::new(&LOW_LATENCY_CONFIG).is_ok());
        assert!(RingInfo::new(&HIGH_THROUGHPUT_CONFIG).is_ok());
        assert!(RingInfo::new(&Config::default()).is_ok());
    }
}
