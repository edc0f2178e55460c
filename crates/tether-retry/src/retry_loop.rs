//! Policy-driven retry of remote operations.

use std::future::Future;
use std::sync::Arc;

use tether_core::CoordinationError;
use tether_core::Result;
use tether_core::TracerDriver;
use tokio::time::Instant;
use tracing::debug;

use crate::policy::RetryPolicy;
use crate::sleeper::RetrySleeper;
use crate::sleeper::TokioSleeper;

/// Trace counter for retries the policy allowed.
pub const RETRIES_ALLOWED: &str = "retries-allowed";

/// Trace counter for retries the policy refused.
pub const RETRIES_DISALLOWED: &str = "retries-disallowed";

/// Binds a retry policy to a tracer and a sleeper.
///
/// Each [`call_with_retry`](Self::call_with_retry) owns its own attempt count
/// and start instant, so one loop may serve concurrent calls.
#[derive(Clone)]
pub struct RetryLoop {
    policy: Arc<dyn RetryPolicy>,
    tracer: Arc<dyn TracerDriver>,
    sleeper: Arc<dyn RetrySleeper>,
}

impl std::fmt::Debug for RetryLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryLoop").field("policy", &self.policy).finish_non_exhaustive()
    }
}

impl RetryLoop {
    /// Loop sleeping on the tokio timer.
    pub fn new(policy: Arc<dyn RetryPolicy>, tracer: Arc<dyn TracerDriver>) -> Self {
        Self {
            policy,
            tracer,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn RetrySleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// The policy driving this loop.
    pub fn policy(&self) -> &Arc<dyn RetryPolicy> {
        &self.policy
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// policy refuses another attempt.
    ///
    /// `op` receives the 0-based attempt number, so callers can tell a first
    /// attempt from a retry. Only connectivity errors
    /// ([`CoordinationError::is_retryable`]) are retried; everything else is
    /// returned as-is. A dial failure the policy gives up on is returned as
    /// `ConnectionLoss`.
    pub async fn call_with_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() {
                return Err(err);
            }

            if self.policy.allow_retry(attempt, start.elapsed(), self.sleeper.as_ref()).await {
                self.tracer.add_count(RETRIES_ALLOWED, 1);
                debug!(attempt, error = %err, "retrying operation");
                attempt = attempt.saturating_add(1);
            } else {
                self.tracer.add_count(RETRIES_DISALLOWED, 1);
                debug!(attempt, error = %err, "retry policy gave up");
                // An ensemble that never answered a dial is a lost connection
                // to the caller.
                return match err {
                    CoordinationError::Dial { .. } => Err(CoordinationError::ConnectionLoss),
                    err => Err(err),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tether_core::DefaultTracerDriver;

    use super::*;
    use crate::policy::RetryNTimes;
    use crate::policy::RetryUntilElapsed;

    fn retry_loop(policy: impl RetryPolicy + 'static) -> (RetryLoop, Arc<DefaultTracerDriver>) {
        let tracer = Arc::new(DefaultTracerDriver::new());
        (RetryLoop::new(Arc::new(policy), tracer.clone()), tracer)
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let (retry_loop, tracer) = retry_loop(RetryNTimes::new(3, Duration::from_millis(10)));
        let calls = AtomicU32::new(0);
        let result = retry_loop
            .call_with_retry(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(CoordinationError::ConnectionLoss)
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(tracer.counter(RETRIES_ALLOWED), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_with_last_error() {
        let (retry_loop, tracer) = retry_loop(RetryNTimes::new(2, Duration::from_millis(10)));
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_loop
            .call_with_retry(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CoordinationError::OperationTimeout) }
            })
            .await;
        assert_eq!(result, Err(CoordinationError::OperationTimeout));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(tracer.counter(RETRIES_DISALLOWED), 1);
    }

    #[tokio::test]
    async fn protocol_errors_are_not_retried() {
        let (retry_loop, tracer) = retry_loop(RetryNTimes::new(5, Duration::ZERO));
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_loop
            .call_with_retry(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(CoordinationError::NodeExists {
                        path: "/a".to_string(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(CoordinationError::NodeExists { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracer.counter(RETRIES_ALLOWED) + tracer.counter(RETRIES_DISALLOWED), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dial_failures_are_retried_then_reported_as_connection_loss() {
        let (retry_loop, tracer) = retry_loop(RetryNTimes::new(1, Duration::from_millis(10)));
        let calls = AtomicU32::new(0);
        let dial_error = || CoordinationError::Dial {
            connection_string: "zk1:2181".to_string(),
            reason: "refused".to_string(),
        };

        let recovered = retry_loop
            .call_with_retry(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { if attempt == 0 { Err(dial_error()) } else { Ok(attempt) } }
            })
            .await;
        assert_eq!(recovered, Ok(1));

        let exhausted: Result<()> = retry_loop.call_with_retry(|_| async move { Err(dial_error()) }).await;
        assert_eq!(exhausted, Err(CoordinationError::ConnectionLoss));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(tracer.counter(RETRIES_ALLOWED), 2);
        assert_eq!(tracer.counter(RETRIES_DISALLOWED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn until_elapsed_stops_after_deadline() {
        let (retry_loop, _) = retry_loop(RetryUntilElapsed::new(Duration::from_secs(1), Duration::from_millis(300)));
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_loop
            .call_with_retry(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CoordinationError::ConnectionLoss) }
            })
            .await;
        assert_eq!(result, Err(CoordinationError::ConnectionLoss));
        // The attempt at 1200 ms is the last one; the deadline has passed by then.
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
