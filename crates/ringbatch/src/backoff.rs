use crate::config::BackoffPolicy;
use std::hint;
use std::thread;

/// Adaptive backoff strategy (Crossbeam-style).
///
/// Progressively increases wait time: spin with PAUSE → yield to OS → sleep.
/// Limits come from a [`BackoffPolicy`] instead of fixed constants.
#[derive(Debug)]
pub struct Backoff {
    step: u32,
    policy: BackoffPolicy,
}

impl Backoff {
    /// Creates a backoff with the default policy.
    #[inline]
    pub fn new() -> Self {
        Self::with_policy(BackoffPolicy::default())
    }

    /// Creates a backoff driven by `policy`.
    #[inline]
    pub fn with_policy(policy: BackoffPolicy) -> Self {
        Self { step: 0, policy }
    }

    /// Light spin with PAUSE hints.
    #[inline]
    pub fn spin(&mut self) {
        let spins = 1u64 << self.step.min(self.policy.spin_limit).min(63);
        for _ in 0..spins {
            hint::spin_loop();
        }
        if self.step <= self.policy.spin_limit {
            self.step += 1;
        }
    }

    /// Heavier backoff: spin, then yield, then sleep.
    ///
    /// Never gives up; callers bound the wait themselves.
    #[inline]
    pub fn snooze(&mut self) {
        if self.step <= self.policy.spin_limit {
            self.spin();
        } else if self.step <= self.policy.yield_limit {
            thread::yield_now();
            self.step += 1;
        } else {
            thread::sleep(self.policy.sleep);
        }
    }

    /// True once the spin and yield phases are exhausted.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.step > self.policy.yield_limit
    }

    /// Reset for next wait cycle.
    #[inline]
    pub fn reset(&mut self) {
        self.step = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_backoff_progression() {
        let mut b = Backoff::new();

        // Should start at step 0
        assert_eq!(b.step, 0);

        // Spin should increment
        b.spin();
        assert!(b.step > 0);

        // Should eventually complete
        while !b.is_completed() {
            b.snooze();
        }
        assert!(b.step > b.policy.yield_limit);

        // Sleeping phase keeps the step stable
        let step = b.step;
        b.snooze();
        assert_eq!(b.step, step);

        // Reset
        b.reset();
        assert_eq!(b.step, 0);
    }

    #[test]
    fn test_custom_policy_limits() {
        let mut b = Backoff::with_policy(BackoffPolicy::new(1, 3, Duration::from_nanos(1)));
        let mut iterations = 0;
        while !b.is_completed() {
            b.snooze();
            iterations += 1;
        }
        assert_eq!(iterations, 4);
    }
}
