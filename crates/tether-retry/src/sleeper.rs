//! Sleep abstraction used between retry attempts.

use std::time::Duration;

use async_trait::async_trait;
use tether_core::Result;

/// Sleeps between retries. Exists so retry timing can be tested without real
/// delays.
#[async_trait]
pub trait RetrySleeper: Send + Sync {
    /// Sleep for `duration`. An error aborts the retry.
    async fn sleep_for(&self, duration: Duration) -> Result<()>;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl RetrySleeper for TokioSleeper {
    async fn sleep_for(&self, duration: Duration) -> Result<()> {
        tokio::time::sleep(duration).await;
        Ok(())
    }
}
