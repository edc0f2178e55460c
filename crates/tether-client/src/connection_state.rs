//! Session bookkeeping around the handle holder.
//!
//! `ConnectionState` turns raw session notifications into a connected flag,
//! decides when a silent connection has timed out, redials on session expiry
//! or ensemble change, and fans every notification out to parent watchers.
//! Errors raised while reconnecting in the background are queued (bounded,
//! drop-oldest) and surfaced on the next `conn()` call.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::AuthInfo;
use tether_core::Connection;
use tether_core::CoordinationError;
use tether_core::Dialer;
use tether_core::EnsembleProvider;
use tether_core::EventType;
use tether_core::ListenerContainer;
use tether_core::Result;
use tether_core::SessionState;
use tether_core::TimeTrace;
use tether_core::TracerDriver;
use tether_core::WatchedEvent;
use tether_core::constants::MAX_BACKGROUND_ERRORS;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::handle::HandleHolder;
use crate::pure::TimeoutDecision;
use crate::pure::evaluate_timeout;
use crate::watcher::Watcher;

/// Trace counter: the ensemble connection string changed.
pub const CONNECTION_STRING_CHANGED: &str = "connection-string-changed";
/// Trace counter: a silent connection outlived the longer timeout.
pub const SESSION_TIMED_OUT: &str = "session-timed-out";
/// Trace counter: a silent connection outlived the shorter timeout.
pub const CONNECTIONS_TIMED_OUT: &str = "connections-timed-out";
/// Trace counter: the session expired.
pub const SESSION_EXPIRED: &str = "session-expired";
/// Trace counter: a session notification arrived from a replaced connection.
pub const STALE_SESSION_EVENT: &str = "stale-session-event";
/// Trace counter: the background error queue overflowed.
pub const DROP_BACKGROUND_ERROR: &str = "connection-drop-background-error";
/// Trace counter: a queued background error was surfaced.
pub const BACKGROUND_EXCEPTIONS: &str = "background-exceptions";
/// Trace timing: one parent watcher invocation.
pub const PARENT_PROCESS: &str = "connection-state-parent-process";

/// Settings for a [`ConnectionState`].
pub struct ConnectionSettings {
    /// Opens connections.
    pub dialer: Arc<dyn Dialer>,
    /// Supplies the connection string.
    pub ensemble: Arc<dyn EnsembleProvider>,
    /// Requested session timeout.
    pub session_timeout: Duration,
    /// How long a silent connection is trusted.
    pub connection_timeout: Duration,
    /// Accept read-only servers.
    pub can_be_read_only: bool,
    /// Applied to every new connection.
    pub auth_infos: Vec<AuthInfo>,
    /// Timing and counter sink.
    pub tracer: Arc<dyn TracerDriver>,
}

/// The connection handle: one live connection plus session bookkeeping.
pub struct ConnectionState {
    ensemble: Arc<dyn EnsembleProvider>,
    holder: HandleHolder,
    session_timeout: Duration,
    connection_timeout: Duration,
    tracer: Arc<dyn TracerDriver>,
    parent_watchers: ListenerContainer<dyn Watcher>,
    instance_index: AtomicU64,
    connection_start: Mutex<Instant>,
    connected: watch::Sender<bool>,
    background_errors: Mutex<VecDeque<CoordinationError>>,
    closed: AtomicBool,
}

impl ConnectionState {
    /// Create a handle. Nothing is dialed until [`start`](Self::start).
    pub fn new(settings: ConnectionSettings) -> Arc<Self> {
        let (connected, _) = watch::channel(false);
        Arc::new(Self {
            holder: HandleHolder::new(
                settings.dialer,
                settings.ensemble.clone(),
                settings.session_timeout,
                settings.can_be_read_only,
                settings.auth_infos,
            ),
            ensemble: settings.ensemble,
            session_timeout: settings.session_timeout,
            connection_timeout: settings.connection_timeout,
            tracer: settings.tracer,
            parent_watchers: ListenerContainer::new(),
            instance_index: AtomicU64::new(0),
            connection_start: Mutex::new(Instant::now()),
            connected,
            background_errors: Mutex::new(VecDeque::with_capacity(MAX_BACKGROUND_ERRORS)),
            closed: AtomicBool::new(false),
        })
    }

    /// Start the ensemble provider and dial.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.ensemble.start().await?;
        self.closed.store(false, Ordering::SeqCst);
        self.reset().await
    }

    /// Close the ensemble provider and the connection. Idempotent.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Err(err) = self.ensemble.close().await {
            warn!(error = %err, "failed to close ensemble provider");
        }
        self.holder.close_and_clear().await;
        self.connected.send_replace(false);
    }

    /// Returns true while the session reports connected.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Observe the connected flag.
    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Incremented on every reset.
    pub fn instance_index(&self) -> u64 {
        self.instance_index.load(Ordering::SeqCst)
    }

    /// Connection string of the live connection, if any.
    pub fn connection_string(&self) -> Option<String> {
        self.holder.connection_string()
    }

    /// Register a watcher for every raw notification.
    pub fn add_parent_watcher(&self, watcher: Arc<dyn Watcher>) -> bool {
        self.parent_watchers.add(watcher)
    }

    /// Deregister a parent watcher.
    pub fn remove_parent_watcher(&self, watcher: &Arc<dyn Watcher>) -> bool {
        self.parent_watchers.remove(watcher)
    }

    /// The live connection.
    ///
    /// Surfaces one queued background error first, then applies the timeout
    /// policy if the session is not connected, then dials if needed.
    pub async fn conn(self: &Arc<Self>) -> Result<Arc<dyn Connection>> {
        if let Some(err) = self.dequeue_background_error() {
            return Err(err);
        }
        if !self.is_connected() {
            self.check_timeout().await?;
        }
        self.acquire().await
    }

    async fn acquire(self: &Arc<Self>) -> Result<Arc<dyn Connection>> {
        let acquired = self.holder.get_connection().await?;
        if let Some(events) = acquired.events {
            self.spawn_event_pump(events);
        }
        Ok(acquired.connection)
    }

    async fn check_timeout(self: &Arc<Self>) -> Result<()> {
        let elapsed = self.connection_start.lock().elapsed();
        let decision = evaluate_timeout(
            elapsed,
            self.session_timeout,
            self.connection_timeout,
            self.holder.has_new_connection_string(),
        );
        match decision {
            TimeoutDecision::Wait => Ok(()),
            TimeoutDecision::ConnectionStringChanged => {
                self.handle_new_connection_string().await;
                Ok(())
            }
            TimeoutDecision::SessionTimedOut { max_timeout } => {
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    max_timeout_ms = max_timeout.as_millis() as u64,
                    "connection attempt unsuccessful past the max timeout, resetting"
                );
                self.tracer.add_count(SESSION_TIMED_OUT, 1);
                self.reset().await?;
                Err(CoordinationError::ConnectionLoss)
            }
            TimeoutDecision::ConnectionTimedOut => {
                warn!(
                    connection_string = ?self.holder.connection_string(),
                    connection_timeout_ms = self.connection_timeout.as_millis() as u64,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "connection timed out"
                );
                self.tracer.add_count(CONNECTIONS_TIMED_OUT, 1);
                Err(CoordinationError::ConnectionLoss)
            }
        }
    }

    /// Close the current connection and dial a new one.
    async fn reset(self: &Arc<Self>) -> Result<()> {
        self.instance_index.fetch_add(1, Ordering::SeqCst);
        self.connected.send_replace(false);
        *self.connection_start.lock() = Instant::now();
        self.holder.close_and_reset().await;
        self.acquire().await.map(|_| ())
    }

    fn spawn_event_pump(self: &Arc<Self>, mut events: mpsc::Receiver<WatchedEvent>) {
        let state = Arc::downgrade(self);
        let instance = self.instance_index();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(state) = Weak::upgrade(&state) else {
                    break;
                };
                if state.closed.load(Ordering::SeqCst) {
                    break;
                }
                state.process(event, instance).await;
            }
            debug!(instance, "session event stream ended");
        });
    }

    async fn process(self: &Arc<Self>, event: WatchedEvent, instance: u64) {
        let is_session = event.event_type == EventType::Session;
        if is_session && instance != self.instance_index() {
            debug!(instance, current = self.instance_index(), state = ?event.state, "ignoring stale session event");
            self.tracer.add_count(STALE_SESSION_EVENT, 1);
            return;
        }

        self.fan_out(&event);

        if is_session {
            let was_connected = self.is_connected();
            let now_connected = self.check_state(event.state).await;
            // A reset during bookkeeping already cleared the flag for the new
            // connection; its own session events take it from here.
            if instance != self.instance_index() {
                return;
            }
            if now_connected != was_connected {
                self.connected.send_replace(now_connected);
                *self.connection_start.lock() = Instant::now();
            }
        }
    }

    fn fan_out(&self, event: &WatchedEvent) {
        for watcher in self.parent_watchers.snapshot() {
            let tracer = self.tracer.clone();
            let event = event.clone();
            tokio::spawn(async move {
                let trace = TimeTrace::new(PARENT_PROCESS, tracer);
                watcher.process(&event);
                trace.commit();
            });
        }
    }

    async fn check_state(self: &Arc<Self>, state: SessionState) -> bool {
        let mut connected = state.is_connected();
        if state == SessionState::Expired {
            self.handle_expired_session().await;
            return false;
        }
        if self.holder.has_new_connection_string() {
            connected = false;
            self.handle_new_connection_string().await;
        }
        connected
    }

    async fn handle_new_connection_string(self: &Arc<Self>) {
        info!(connection_string = %self.ensemble.connection_string(), "connection string changed");
        self.tracer.add_count(CONNECTION_STRING_CHANGED, 1);
        if let Err(err) = self.reset().await {
            self.queue_background_error(err);
        }
    }

    async fn handle_expired_session(self: &Arc<Self>) {
        info!("session expired event received");
        self.tracer.add_count(SESSION_EXPIRED, 1);
        if let Err(err) = self.reset().await {
            self.queue_background_error(err);
        }
    }

    /// Queue an error for the next `conn()` call, dropping the oldest queued
    /// error when full.
    pub fn queue_background_error(&self, err: CoordinationError) {
        let mut queue = self.background_errors.lock();
        while queue.len() >= MAX_BACKGROUND_ERRORS {
            queue.pop_front();
            self.tracer.add_count(DROP_BACKGROUND_ERROR, 1);
        }
        debug!(error = %err, queued = queue.len(), "queued background error");
        queue.push_back(err);
    }

    fn dequeue_background_error(&self) -> Option<CoordinationError> {
        let err = self.background_errors.lock().pop_front()?;
        self.tracer.add_count(BACKGROUND_EXCEPTIONS, 1);
        Some(err)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tether_core::DefaultTracerDriver;
    use tether_core::FixedEnsembleProvider;
    use tether_testing::DeterministicDialer;
    use tether_testing::DeterministicEnsemble;
    use tether_testing::MutableEnsembleProvider;

    use super::*;

    struct Fixture {
        state: Arc<ConnectionState>,
        dialer: Arc<DeterministicDialer>,
        tracer: Arc<DefaultTracerDriver>,
    }

    fn fixture_with(ensemble: Arc<dyn EnsembleProvider>) -> Fixture {
        let _ = tracing_subscriber::fmt().with_env_filter("tether_client=debug").with_test_writer().try_init();
        let dialer = DeterministicDialer::new(DeterministicEnsemble::new());
        let tracer = Arc::new(DefaultTracerDriver::new());
        let state = ConnectionState::new(ConnectionSettings {
            dialer: dialer.clone(),
            ensemble,
            session_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(15),
            can_be_read_only: false,
            auth_infos: Vec::new(),
            tracer: tracer.clone(),
        });
        Fixture { state, dialer, tracer }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(FixedEnsembleProvider::new("host:2181")))
    }

    async fn wait_connected(state: &ConnectionState, expected: bool) {
        let mut rx = state.subscribe_connected();
        let _ = rx.wait_for(|connected| *connected == expected).await;
    }

    #[tokio::test]
    async fn start_dials_and_connects() {
        let f = fixture();
        f.state.start().await.unwrap();
        wait_connected(&f.state, true).await;
        assert_eq!(f.dialer.dial_count(), 1);
        assert_eq!(f.state.instance_index(), 1);
        assert!(f.state.conn().await.is_ok());
    }

    #[tokio::test]
    async fn background_errors_are_bounded_and_drop_oldest() {
        let f = fixture();
        f.state.start().await.unwrap();
        wait_connected(&f.state, true).await;
        for i in 0..(MAX_BACKGROUND_ERRORS + 2) {
            f.state.queue_background_error(CoordinationError::Api { reason: i.to_string() });
        }
        assert_eq!(f.tracer.counter(DROP_BACKGROUND_ERROR), 2);

        let mut surfaced = Vec::new();
        while let Err(CoordinationError::Api { reason }) = f.state.conn().await {
            surfaced.push(reason);
        }
        assert_eq!(surfaced.len(), MAX_BACKGROUND_ERRORS);
        assert_eq!(surfaced.first().map(String::as_str), Some("2"));
        assert_eq!(surfaced.last().map(String::as_str), Some("11"));
        assert_eq!(f.tracer.counter(BACKGROUND_EXCEPTIONS), MAX_BACKGROUND_ERRORS as i64);
    }

    #[tokio::test]
    async fn expired_session_resets() {
        let f = fixture();
        f.state.start().await.unwrap();
        wait_connected(&f.state, true).await;
        assert!(f.dialer.expire_latest_session().await);
        // The redial auto-connects the new session.
        let mut rx = f.state.subscribe_connected();
        let _ = rx.wait_for(|_| f.dialer.dial_count() == 2).await;
        wait_connected(&f.state, true).await;
        assert_eq!(f.tracer.counter(SESSION_EXPIRED), 1);
        assert_eq!(f.state.instance_index(), 2);
        assert!(f.dialer.connection(0).unwrap().is_closed());
    }

    #[tokio::test]
    async fn stale_session_events_are_ignored() {
        let f = fixture();
        f.state.start().await.unwrap();
        wait_connected(&f.state, true).await;
        f.dialer.expire_latest_session().await;
        let mut rx = f.state.subscribe_connected();
        let _ = rx.wait_for(|connected| *connected && f.dialer.dial_count() == 2).await;

        assert!(f.dialer.send_session_event_to(0, SessionState::Disconnected).await);
        for _ in 0..100 {
            if f.tracer.counter(STALE_SESSION_EVENT) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(f.tracer.counter(STALE_SESSION_EVENT), 1);
        assert!(f.state.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn connection_timeout_reports_loss_without_reset() {
        let f = fixture();
        f.dialer.set_auto_connect(false);
        f.state.start().await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(f.state.conn().await.err(), Some(CoordinationError::ConnectionLoss));
        assert_eq!(f.tracer.counter(CONNECTIONS_TIMED_OUT), 1);
        assert_eq!(f.dialer.dial_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn session_timeout_resets_and_reports_loss() {
        let f = fixture();
        f.dialer.set_auto_connect(false);
        f.state.start().await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(f.state.conn().await.err(), Some(CoordinationError::ConnectionLoss));
        assert_eq!(f.tracer.counter(SESSION_TIMED_OUT), 1);
        assert_eq!(f.dialer.dial_count(), 2);
        assert_eq!(f.state.instance_index(), 2);
        // The reset restarted the clock.
        assert!(f.state.conn().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn changed_connection_string_redials_without_error() {
        let provider = Arc::new(MutableEnsembleProvider::new("a:1"));
        let f = fixture_with(provider.clone());
        f.dialer.set_auto_connect(false);
        f.state.start().await.unwrap();
        provider.set_connection_string("b:2");
        tokio::time::advance(Duration::from_secs(16)).await;
        assert!(f.state.conn().await.is_ok());
        assert_eq!(f.tracer.counter(CONNECTION_STRING_CHANGED), 1);
        assert_eq!(f.dialer.dials()[1].connection_string, "b:2");
        assert_eq!(provider.starts(), 1);
    }

    #[tokio::test]
    async fn parent_watchers_receive_every_event() {
        let f = fixture();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let watcher: Arc<dyn Watcher> = Arc::new(move |_: &WatchedEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        f.state.add_parent_watcher(watcher.clone());
        f.state.start().await.unwrap();
        wait_connected(&f.state, true).await;
        f.dialer.send_session_event(SessionState::Disconnected).await;
        wait_connected(&f.state, false).await;
        for _ in 0..100 {
            if seen.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(f.state.remove_parent_watcher(&watcher));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let f = fixture();
        f.state.start().await.unwrap();
        f.state.close().await;
        f.state.close().await;
        assert!(!f.state.is_connected());
        assert!(matches!(f.state.conn().await, Err(CoordinationError::Closed)));
    }
}
