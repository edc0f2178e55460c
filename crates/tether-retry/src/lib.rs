//! Retry orchestration for the Tether coordination client.
//!
//! - `RetryPolicy` - stateless decision: retry count and elapsed time in,
//!   sleep duration (or give up) out
//! - `RetryNTimes`, `RetryOneTime`, `ExponentialBackoffRetry`,
//!   `RetryUntilElapsed` - the stock policies
//! - `RetryLoop` - runs an operation until it succeeds or the policy refuses
//! - `RetrySleeper` - the sleep seam, so retry timing is testable
//!
//! ```ignore
//! let retry_loop = RetryLoop::new(Arc::new(RetryNTimes::new(3, Duration::from_millis(100))), tracer);
//! let stat = retry_loop.call_with_retry(|_| async { conn.set("/a", b"x", ANY_VERSION).await }).await?;
//! ```

mod config;
mod policy;
mod retry_loop;
mod sleeper;

pub use config::RetryPolicyConfig;
pub use policy::ExponentialBackoffRetry;
pub use policy::RetryNTimes;
pub use policy::RetryOneTime;
pub use policy::RetryPolicy;
pub use policy::RetryUntilElapsed;
pub use policy::backoff_multiplier_bound;
pub use policy::backoff_sleep;
pub use retry_loop::RETRIES_ALLOWED;
pub use retry_loop::RETRIES_DISALLOWED;
pub use retry_loop::RetryLoop;
pub use sleeper::RetrySleeper;
pub use sleeper::TokioSleeper;
