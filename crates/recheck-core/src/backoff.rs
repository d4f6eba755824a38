//! Backoff schedule and injectable sleeping
//!
//! The schedule is a pure function of the attempt number so it can be
//! tested without a clock; the pause itself goes through [`Sleeper`].

use async_trait::async_trait;
use std::time::Duration;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    #[inline]
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before the call following failed call number `attempt` (1-based)
    ///
    /// `initial * 2^(attempt-1)`, capped at `max`. A server-requested
    /// delay wins when it is larger, but never past `max` either.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let scaled = self.initial.saturating_mul(1u32 << exp).min(self.max);
        match retry_after {
            Some(requested) => requested.min(self.max).max(scaled),
            None => scaled,
        }
    }

    /// Short linear delay between empty-reply re-requests
    #[must_use]
    pub fn empty_delay(retry: u32) -> Duration {
        Duration::from_secs(u64::from(retry.min(2)))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(20))
    }
}

/// Pauses execution between retries
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_caps() {
        let backoff = Backoff::default();
        let secs: Vec<u64> = (1..=7)
            .map(|a| backoff.delay_for(a, None).as_secs())
            .collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 20, 20]);
    }

    #[test]
    fn retry_after_only_when_larger() {
        let backoff = Backoff::default();
        assert_eq!(
            backoff.delay_for(1, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            backoff.delay_for(3, Some(Duration::from_secs(1))),
            Duration::from_secs(4)
        );
        // a day-long Retry-After still respects the cap
        assert_eq!(
            backoff.delay_for(1, Some(Duration::from_secs(86_400))),
            Duration::from_secs(20)
        );
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for(u32::MAX, None), Duration::from_secs(20));
    }

    #[test]
    fn empty_delay_is_linear_and_short() {
        assert_eq!(Backoff::empty_delay(1), Duration::from_secs(1));
        assert_eq!(Backoff::empty_delay(2), Duration::from_secs(2));
        assert_eq!(Backoff::empty_delay(9), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_sleeper_advances_clock() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_secs(3)).await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
