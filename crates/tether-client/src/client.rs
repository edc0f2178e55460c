//! Started/stopped wrapper around the connection handle.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tether_core::Connection;
use tether_core::CoordinationError;
use tether_core::EnsembleProvider;
use tether_core::Result;
use tether_core::TimeTrace;
use tether_core::TracerDriver;
use tether_retry::RetryLoop;
use tether_retry::RetryPolicy;
use tether_retry::RetrySleeper;
use tracing::debug;
use tracing::warn;

use crate::connection_state::ConnectionSettings;
use crate::connection_state::ConnectionState;
use crate::watcher::Watcher;

/// Trace timing for [`CoordinationClient::block_until_connected_or_timed_out`].
pub const BLOCK_UNTIL_CONNECTED_OR_TIMED_OUT: &str = "blockUntilConnectedOrTimedOut";

/// A connection handle with a lifecycle and a retry policy.
pub struct CoordinationClient {
    state: Arc<ConnectionState>,
    ensemble: Arc<dyn EnsembleProvider>,
    started: AtomicBool,
    tracer: Arc<dyn TracerDriver>,
    retry_policy: Arc<dyn RetryPolicy>,
    sleeper: Option<Arc<dyn RetrySleeper>>,
    session_timeout: Duration,
    connection_timeout: Duration,
}

impl CoordinationClient {
    /// Create a client. Nothing is dialed until [`start`](Self::start).
    pub fn new(settings: ConnectionSettings, retry_policy: Arc<dyn RetryPolicy>) -> Self {
        if settings.session_timeout < settings.connection_timeout {
            warn!(
                session_timeout_ms = settings.session_timeout.as_millis() as u64,
                connection_timeout_ms = settings.connection_timeout.as_millis() as u64,
                "session timeout is less than connection timeout"
            );
        }
        let ensemble = settings.ensemble.clone();
        let tracer = settings.tracer.clone();
        let session_timeout = settings.session_timeout;
        let connection_timeout = settings.connection_timeout;
        Self {
            state: ConnectionState::new(settings),
            ensemble,
            started: AtomicBool::new(false),
            tracer,
            retry_policy,
            sleeper: None,
            session_timeout,
            connection_timeout,
        }
    }

    /// Sleep between retries with `sleeper` instead of the tokio timer.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn RetrySleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Start the ensemble provider and dial. Fails the second time.
    pub async fn start(&self) -> Result<()> {
        if self.started.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(CoordinationError::AlreadyStarted);
        }
        debug!(connection_string = %self.ensemble.connection_string(), "starting client");
        self.state.start().await
    }

    /// Close the connection and the ensemble provider.
    pub async fn close(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.state.close().await;
    }

    /// Returns true between a successful `start` and `close`.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Returns true while the session reports connected.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// The ensemble provider's current connection string.
    pub fn current_connection_string(&self) -> String {
        self.ensemble.connection_string()
    }

    /// Incremented every time the connection is replaced.
    pub fn instance_index(&self) -> u64 {
        self.state.instance_index()
    }

    /// The live connection. See [`ConnectionState::conn`].
    pub async fn conn(&self) -> Result<Arc<dyn Connection>> {
        if !self.is_started() {
            return Err(CoordinationError::NotStarted);
        }
        self.state.conn().await
    }

    /// A retry loop bound to this client's policy and tracer.
    pub fn new_retry_loop(&self) -> RetryLoop {
        let retry_loop = RetryLoop::new(self.retry_policy.clone(), self.tracer.clone());
        match &self.sleeper {
            Some(sleeper) => retry_loop.with_sleeper(sleeper.clone()),
            None => retry_loop,
        }
    }

    /// The configured retry policy.
    pub fn retry_policy(&self) -> &Arc<dyn RetryPolicy> {
        &self.retry_policy
    }

    /// The tracer driver.
    pub fn tracer(&self) -> &Arc<dyn TracerDriver> {
        &self.tracer
    }

    /// Configured session timeout.
    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Configured connection timeout.
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Register a watcher for every raw notification.
    pub fn add_parent_watcher(&self, watcher: Arc<dyn Watcher>) -> bool {
        self.state.add_parent_watcher(watcher)
    }

    /// Deregister a parent watcher.
    pub fn remove_parent_watcher(&self, watcher: &Arc<dyn Watcher>) -> bool {
        self.state.remove_parent_watcher(watcher)
    }

    /// Queue an error for the next foreground call.
    pub fn queue_background_error(&self, err: CoordinationError) {
        self.state.queue_background_error(err);
    }

    /// Wait up to the connection timeout for the session to connect.
    pub async fn block_until_connected_or_timed_out(&self) -> Result<()> {
        if !self.is_started() {
            return Err(CoordinationError::NotStarted);
        }
        let trace = TimeTrace::new(BLOCK_UNTIL_CONNECTED_OR_TIMED_OUT, self.tracer.clone());
        let mut connected = self.state.subscribe_connected();
        let waited = tokio::time::timeout(self.connection_timeout, connected.wait_for(|c| *c)).await;
        trace.commit();

        if matches!(waited, Ok(Ok(_))) || self.is_connected() {
            return Ok(());
        }
        Err(CoordinationError::Timeout {
            operation: "connection".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use tether_core::DefaultTracerDriver;
    use tether_core::FixedEnsembleProvider;
    use tether_retry::RetryOneTime;
    use tether_testing::DeterministicDialer;
    use tether_testing::DeterministicEnsemble;

    use super::*;

    fn client(dialer: Arc<DeterministicDialer>) -> (CoordinationClient, Arc<DefaultTracerDriver>) {
        let tracer = Arc::new(DefaultTracerDriver::new());
        let settings = ConnectionSettings {
            dialer,
            ensemble: Arc::new(FixedEnsembleProvider::new("host:2181")),
            session_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(15),
            can_be_read_only: false,
            auth_infos: Vec::new(),
            tracer: tracer.clone(),
        };
        (CoordinationClient::new(settings, Arc::new(RetryOneTime::new(Duration::ZERO))), tracer)
    }

    #[tokio::test]
    async fn conn_requires_start() {
        let (client, _) = client(DeterministicDialer::new(DeterministicEnsemble::new()));
        assert!(matches!(client.conn().await, Err(CoordinationError::NotStarted)));
        assert!(matches!(client.block_until_connected_or_timed_out().await, Err(CoordinationError::NotStarted)));
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let (client, _) = client(DeterministicDialer::new(DeterministicEnsemble::new()));
        client.start().await.unwrap();
        assert!(matches!(client.start().await, Err(CoordinationError::AlreadyStarted)));
        assert_eq!(client.current_connection_string(), "host:2181");
    }

    #[tokio::test]
    async fn blocks_until_connected() {
        let (client, tracer) = client(DeterministicDialer::new(DeterministicEnsemble::new()));
        client.start().await.unwrap();
        client.block_until_connected_or_timed_out().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(tracer.time_samples(BLOCK_UNTIL_CONNECTED_OR_TIMED_OUT), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn block_times_out_when_session_never_connects() {
        let dialer = DeterministicDialer::new(DeterministicEnsemble::new());
        dialer.set_auto_connect(false);
        let (client, _) = client(dialer);
        client.start().await.unwrap();
        let err = client.block_until_connected_or_timed_out().await.unwrap_err();
        assert!(matches!(err, CoordinationError::Timeout { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn close_stops_the_client() {
        let (client, _) = client(DeterministicDialer::new(DeterministicEnsemble::new()));
        client.start().await.unwrap();
        client.close().await;
        assert!(!client.is_started());
        assert!(matches!(client.conn().await, Err(CoordinationError::NotStarted)));
    }
}
