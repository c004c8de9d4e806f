use std::sync::atomic::{AtomicU64, Ordering};

/// Optional metrics for monitoring ring activity.
///
/// Counters are relaxed atomics; they are only touched when
/// [`Config::enable_metrics`](crate::Config::enable_metrics) is set.
#[derive(Debug, Default)]
pub struct Metrics {
    claims: AtomicU64,
    claim_spins: AtomicU64,
    publishes: AtomicU64,
    cancels: AtomicU64,
    acks: AtomicU64,
    releases: AtomicU64,
    frontier_advances: AtomicU64,
}

macro_rules! counter {
    ($add:ident, $field:ident) => {
        #[inline]
        pub(crate) fn $add(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }
    };
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(add_claims, claims);
    counter!(add_claim_spins, claim_spins);
    counter!(add_publishes, publishes);
    counter!(add_cancels, cancels);
    counter!(add_acks, acks);
    counter!(add_releases, releases);
    counter!(add_frontier_advances, frontier_advances);

    /// Copies the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            claims: self.claims.load(Ordering::Relaxed),
            claim_spins: self.claim_spins.load(Ordering::Relaxed),
            publishes: self.publishes.load(Ordering::Relaxed),
            cancels: self.cancels.load(Ordering::Relaxed),
            acks: self.acks.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            frontier_advances: self.frontier_advances.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MetricsSnapshot {
    pub claims: u64,
    /// Backoff iterations spent inside claims (contention + saturation).
    pub claim_spins: u64,
    pub publishes: u64,
    pub cancels: u64,
    pub acks: u64,
    pub releases: u64,
    /// Successful CAS advances of the read frontier.
    pub frontier_advances: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let m = Metrics::new();
        m.add_claims(3);
        m.add_claim_spins(10);
        m.add_releases(1);

        let s = m.snapshot();
        assert_eq!(s.claims, 3);
        assert_eq!(s.claim_spins, 10);
        assert_eq!(s.releases, 1);
        assert_eq!(s.publishes, 0);
    }
}
