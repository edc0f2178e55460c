//! Retry policies.
//!
//! Every policy is stateless: the decision is a pure function of the retry
//! count and the elapsed time since the first attempt
//! ([`RetryPolicy::sleep_time_for`]). [`RetryPolicy::allow_retry`] turns that
//! decision into an actual sleep through a [`RetrySleeper`].

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tether_core::constants::MAX_RETRIES_LIMIT;

use crate::sleeper::RetrySleeper;

/// Decides whether a failed operation is attempted again.
#[async_trait]
pub trait RetryPolicy: Debug + Send + Sync {
    /// How long to sleep before retry number `retry_count` (0-based), or
    /// `None` to give up.
    fn sleep_time_for(&self, retry_count: u32, elapsed: Duration) -> Option<Duration>;

    /// Sleep and return true to make another attempt, or return false.
    ///
    /// A failing sleeper also refuses the retry.
    async fn allow_retry(&self, retry_count: u32, elapsed: Duration, sleeper: &dyn RetrySleeper) -> bool {
        match self.sleep_time_for(retry_count, elapsed) {
            Some(sleep) => sleeper.sleep_for(sleep).await.is_ok(),
            None => false,
        }
    }
}

/// Retries up to `n` times with a fixed sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryNTimes {
    n: u32,
    sleep_between_retries: Duration,
}

impl RetryNTimes {
    /// Allow `n` retries, sleeping `sleep_between_retries` before each.
    pub fn new(n: u32, sleep_between_retries: Duration) -> Self {
        Self {
            n,
            sleep_between_retries,
        }
    }
}

impl RetryPolicy for RetryNTimes {
    fn sleep_time_for(&self, retry_count: u32, _elapsed: Duration) -> Option<Duration> {
        (retry_count < self.n).then_some(self.sleep_between_retries)
    }
}

/// Retries exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOneTime(RetryNTimes);

impl RetryOneTime {
    /// Allow one retry after `sleep_between_retry`.
    pub fn new(sleep_between_retry: Duration) -> Self {
        Self(RetryNTimes::new(1, sleep_between_retry))
    }
}

impl RetryPolicy for RetryOneTime {
    fn sleep_time_for(&self, retry_count: u32, elapsed: Duration) -> Option<Duration> {
        self.0.sleep_time_for(retry_count, elapsed)
    }
}

/// Exclusive upper bound of the random backoff multiplier for `retry_count`.
///
/// Tiger Style: the shift is clamped to `MAX_RETRIES_LIMIT`, so it never
/// overflows.
#[inline]
pub fn backoff_multiplier_bound(retry_count: u32) -> u64 {
    1u64 << retry_count.min(MAX_RETRIES_LIMIT)
}

/// `base * multiplier`, capped at `max_sleep`.
#[inline]
pub fn backoff_sleep(base: Duration, multiplier: u64, max_sleep: Duration) -> Duration {
    let multiplier = u32::try_from(multiplier).unwrap_or(u32::MAX);
    base.checked_mul(multiplier).map_or(max_sleep, |sleep| sleep.min(max_sleep))
}

/// Retries a bounded number of times with randomized exponential backoff:
/// `base * uniform[0, 2^retry_count)`, never more than `max_sleep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoffRetry {
    base_sleep: Duration,
    max_retries: u32,
    max_sleep: Duration,
}

impl ExponentialBackoffRetry {
    /// `max_retries` is clamped to `MAX_RETRIES_LIMIT`.
    pub fn new(base_sleep: Duration, max_retries: u32, max_sleep: Duration) -> Self {
        Self {
            base_sleep,
            max_retries: max_retries.min(MAX_RETRIES_LIMIT),
            max_sleep,
        }
    }

    /// Effective retry count after clamping.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl RetryPolicy for ExponentialBackoffRetry {
    fn sleep_time_for(&self, retry_count: u32, _elapsed: Duration) -> Option<Duration> {
        if retry_count >= self.max_retries {
            return None;
        }
        let multiplier = rand::rng().random_range(0..backoff_multiplier_bound(retry_count));
        Some(backoff_sleep(self.base_sleep, multiplier, self.max_sleep))
    }
}

/// Retries with a fixed sleep until `max_elapsed` has passed since the first
/// attempt. The attempt count is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryUntilElapsed {
    max_elapsed: Duration,
    sleep_between_retries: Duration,
}

impl RetryUntilElapsed {
    /// Retry while less than `max_elapsed` has passed.
    pub fn new(max_elapsed: Duration, sleep_between_retries: Duration) -> Self {
        Self {
            max_elapsed,
            sleep_between_retries,
        }
    }
}

impl RetryPolicy for RetryUntilElapsed {
    fn sleep_time_for(&self, retry_count: u32, elapsed: Duration) -> Option<Duration> {
        if elapsed >= self.max_elapsed {
            return None;
        }
        RetryNTimes::new(u32::MAX, self.sleep_between_retries).sleep_time_for(retry_count, elapsed)
    }
}
