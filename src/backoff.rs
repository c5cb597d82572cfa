//! Exponential backoff for the Worker's transient DB-write retries.
//!
//! Grounded in the same doubling-with-cap shape used for socket
//! reconnection elsewhere in this codebase, but simplified to a bounded
//! attempt counter rather than a deadline: the spec calls for "base 1s,
//! cap 60s, max 3 attempts", not an open-ended reconnect loop.

use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Default retry policy for `persist_report`: base 1s, cap 60s, 3
    /// attempts total.
    pub const fn worker_persist() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 3)
    }
}

/// Tracks how many attempts have been made and yields the delay before the
/// next one, or `None` once `max_attempts` is exhausted.
pub struct BackoffSequence {
    policy: BackoffPolicy,
    attempt: u32,
}

impl BackoffSequence {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Call after a failed attempt. Returns the delay to sleep before
    /// retrying, or `None` if attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let shift = self.attempt.saturating_sub(1).min(31);
        let scaled = self.policy.base.saturating_mul(1u32 << shift);
        Some(scaled.min(self.policy.cap))
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, Duration::from_secs(1))]
    #[case(2, Duration::from_secs(2))]
    #[case(3, Duration::from_secs(4))]
    #[case(4, Duration::from_secs(8))]
    fn doubles_up_to_the_requested_attempt(#[case] attempts: u32, #[case] expected: Duration) {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60), 10);
        let mut seq = BackoffSequence::new(policy);
        let mut delay = None;
        for _ in 0..attempts {
            delay = seq.next_delay();
        }
        assert_eq!(delay, Some(expected));
    }

    #[test]
    fn delay_is_capped_once_doubling_would_exceed_it() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(5), 10);
        let mut seq = BackoffSequence::new(policy);
        for _ in 0..2 {
            seq.next_delay();
        }
        assert_eq!(seq.next_delay(), Some(Duration::from_secs(4)));
        assert_eq!(seq.next_delay(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let policy = BackoffPolicy::worker_persist();
        let mut seq = BackoffSequence::new(policy);
        assert!(seq.next_delay().is_some());
        assert!(seq.next_delay().is_some());
        assert_eq!(seq.next_delay(), None);
        assert_eq!(seq.attempts_made(), 3);
    }
}
