//! Retry policy configuration.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tether_core::constants::DEFAULT_BASE_SLEEP;
use tether_core::constants::DEFAULT_MAX_RETRIES;
use tether_core::constants::DEFAULT_MAX_SLEEP;

use crate::policy::ExponentialBackoffRetry;
use crate::policy::RetryNTimes;
use crate::policy::RetryOneTime;
use crate::policy::RetryPolicy;
use crate::policy::RetryUntilElapsed;

mod defaults {
    use super::*;

    pub fn base_sleep_ms() -> u64 { DEFAULT_BASE_SLEEP.as_millis() as u64 }
    pub fn max_retries() -> u32 { DEFAULT_MAX_RETRIES }
    pub fn max_sleep_ms() -> u64 { DEFAULT_MAX_SLEEP.as_millis() as u64 }
}

/// Serializable description of a retry policy. All durations are in
/// milliseconds.
///
/// ```toml
/// [retry]
/// kind = "exponential_backoff"
/// base_sleep_ms = 1000
/// max_retries = 3
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicyConfig {
    /// [`RetryNTimes`].
    NTimes {
        /// Number of retries.
        n: u32,
        /// Sleep between retries.
        sleep_ms: u64,
    },
    /// [`RetryOneTime`].
    OneTime {
        /// Sleep before the retry.
        sleep_ms: u64,
    },
    /// [`ExponentialBackoffRetry`].
    ExponentialBackoff {
        /// Base sleep multiplied by the random backoff factor.
        #[serde(default = "defaults::base_sleep_ms")]
        base_sleep_ms: u64,
        /// Retry count, clamped to `MAX_RETRIES_LIMIT`.
        #[serde(default = "defaults::max_retries")]
        max_retries: u32,
        /// Sleep ceiling.
        #[serde(default = "defaults::max_sleep_ms")]
        max_sleep_ms: u64,
    },
    /// [`RetryUntilElapsed`].
    UntilElapsed {
        /// Total time budget.
        max_elapsed_ms: u64,
        /// Sleep between retries.
        sleep_ms: u64,
    },
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        RetryPolicyConfig::ExponentialBackoff {
            base_sleep_ms: defaults::base_sleep_ms(),
            max_retries: defaults::max_retries(),
            max_sleep_ms: defaults::max_sleep_ms(),
        }
    }
}

impl RetryPolicyConfig {
    /// Build the configured policy.
    pub fn build(&self) -> Arc<dyn RetryPolicy> {
        match *self {
            RetryPolicyConfig::NTimes { n, sleep_ms } => Arc::new(RetryNTimes::new(n, Duration::from_millis(sleep_ms))),
            RetryPolicyConfig::OneTime { sleep_ms } => Arc::new(RetryOneTime::new(Duration::from_millis(sleep_ms))),
            RetryPolicyConfig::ExponentialBackoff {
                base_sleep_ms,
                max_retries,
                max_sleep_ms,
            } => Arc::new(ExponentialBackoffRetry::new(
                Duration::from_millis(base_sleep_ms),
                max_retries,
                Duration::from_millis(max_sleep_ms),
            )),
            RetryPolicyConfig::UntilElapsed {
                max_elapsed_ms,
                sleep_ms,
            } => Arc::new(RetryUntilElapsed::new(Duration::from_millis(max_elapsed_ms), Duration::from_millis(sleep_ms))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        retry: RetryPolicyConfig,
    }

    #[test]
    fn parses_tagged_policies() {
        let parsed: Wrapper = toml::from_str("[retry]\nkind = \"n_times\"\nn = 4\nsleep_ms = 20\n").unwrap();
        assert_eq!(parsed.retry, RetryPolicyConfig::NTimes { n: 4, sleep_ms: 20 });

        let parsed: Wrapper = toml::from_str("[retry]\nkind = \"exponential_backoff\"\nmax_retries = 7\n").unwrap();
        assert_eq!(
            parsed.retry,
            RetryPolicyConfig::ExponentialBackoff {
                base_sleep_ms: 1000,
                max_retries: 7,
                max_sleep_ms: 15_000,
            }
        );
    }

    #[test]
    fn builds_matching_policy() {
        let policy = RetryPolicyConfig::UntilElapsed {
            max_elapsed_ms: 100,
            sleep_ms: 10,
        }
        .build();
        assert_eq!(policy.sleep_time_for(0, Duration::from_millis(50)), Some(Duration::from_millis(10)));
        assert_eq!(policy.sleep_time_for(0, Duration::from_millis(100)), None);

        let policy = RetryPolicyConfig::OneTime { sleep_ms: 3 }.build();
        assert_eq!(policy.sleep_time_for(1, Duration::ZERO), None);
    }

    #[test]
    fn default_is_exponential_backoff() {
        assert!(matches!(RetryPolicyConfig::default(), RetryPolicyConfig::ExponentialBackoff { max_retries: 3, .. }));
    }
}
