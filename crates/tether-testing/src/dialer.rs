//! Deterministic dialer backed by a [`DeterministicEnsemble`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_core::CoordinationError;
use tether_core::DialedConnection;
use tether_core::Dialer;
use tether_core::Result;
use tether_core::SessionState;
use tether_core::WatchedEvent;
use tokio::sync::mpsc;
use tracing::debug;

use crate::ensemble::DeterministicConnection;
use crate::ensemble::DeterministicEnsemble;

/// Capacity of each session event channel.
const SESSION_EVENT_CAPACITY: usize = 64;

/// Arguments of one `dial` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialRecord {
    /// Connection string that was dialed.
    pub connection_string: String,
    /// Requested session timeout.
    pub session_timeout: Duration,
    /// Read-only flag.
    pub can_be_read_only: bool,
}

struct Session {
    connection: Arc<DeterministicConnection>,
    events: mpsc::Sender<WatchedEvent>,
}

#[derive(Default)]
struct DialerState {
    dials: Vec<DialRecord>,
    failures: VecDeque<CoordinationError>,
    sessions: Vec<Session>,
}

/// Dials sessions against a shared [`DeterministicEnsemble`].
///
/// By default each new session immediately reports `SyncConnected`; tests
/// drive every later session transition by hand.
pub struct DeterministicDialer {
    ensemble: Arc<DeterministicEnsemble>,
    auto_connect: AtomicBool,
    state: Mutex<DialerState>,
}

impl DeterministicDialer {
    /// Dialer for `ensemble`, wrapped in Arc.
    pub fn new(ensemble: Arc<DeterministicEnsemble>) -> Arc<Self> {
        Arc::new(Self {
            ensemble,
            auto_connect: AtomicBool::new(true),
            state: Mutex::new(DialerState::default()),
        })
    }

    /// The ensemble sessions are opened against.
    pub fn ensemble(&self) -> &Arc<DeterministicEnsemble> {
        &self.ensemble
    }

    /// Whether new sessions report `SyncConnected` on their own.
    pub fn set_auto_connect(&self, auto_connect: bool) {
        self.auto_connect.store(auto_connect, Ordering::SeqCst);
    }

    /// Fail the next dial with `error`.
    pub fn fail_next_dial(&self, error: CoordinationError) {
        self.state.lock().failures.push_back(error);
    }

    /// Number of dial attempts, failed ones included.
    pub fn dial_count(&self) -> usize {
        self.state.lock().dials.len()
    }

    /// Arguments of every dial attempt.
    pub fn dials(&self) -> Vec<DialRecord> {
        self.state.lock().dials.clone()
    }

    /// Connection of session `index` (0-based, successful dials only).
    pub fn connection(&self, index: usize) -> Option<Arc<DeterministicConnection>> {
        self.state.lock().sessions.get(index).map(|session| session.connection.clone())
    }

    /// Connection of the most recent session.
    pub fn latest_connection(&self) -> Option<Arc<DeterministicConnection>> {
        self.state.lock().sessions.last().map(|session| session.connection.clone())
    }

    /// Deliver a session state notification on session `index`.
    pub async fn send_session_event_to(&self, index: usize, state: SessionState) -> bool {
        let sender = self.state.lock().sessions.get(index).map(|session| session.events.clone());
        match sender {
            Some(sender) => sender.send(WatchedEvent::session(state)).await.is_ok(),
            None => false,
        }
    }

    /// Deliver a session state notification on the most recent session.
    pub async fn send_session_event(&self, state: SessionState) -> bool {
        let sender = self.state.lock().sessions.last().map(|session| session.events.clone());
        match sender {
            Some(sender) => sender.send(WatchedEvent::session(state)).await.is_ok(),
            None => false,
        }
    }

    /// Expire the most recent session: its ephemerals vanish and it reports
    /// `Expired`.
    pub async fn expire_latest_session(&self) -> bool {
        let Some(connection) = self.latest_connection() else {
            return false;
        };
        self.ensemble.expire_session(connection.session_id());
        self.send_session_event(SessionState::Expired).await
    }
}

#[async_trait]
impl Dialer for DeterministicDialer {
    async fn dial(
        &self,
        connection_string: &str,
        session_timeout: Duration,
        can_be_read_only: bool,
    ) -> Result<DialedConnection> {
        let mut state = self.state.lock();
        state.dials.push(DialRecord {
            connection_string: connection_string.to_string(),
            session_timeout,
            can_be_read_only,
        });
        if let Some(error) = state.failures.pop_front() {
            debug!(connection_string, error = %error, "injected dial failure");
            return Err(error);
        }

        let session_id = i64::try_from(state.sessions.len()).unwrap_or(i64::MAX).saturating_add(1);
        let connection = self.ensemble.connect(session_id);
        let (tx, rx) = mpsc::channel(SESSION_EVENT_CAPACITY);
        if self.auto_connect.load(Ordering::SeqCst) {
            let _ = tx.try_send(WatchedEvent::session(SessionState::SyncConnected));
        }
        state.sessions.push(Session {
            connection: connection.clone(),
            events: tx,
        });
        debug!(connection_string, session_id, "dialed deterministic session");
        Ok(DialedConnection {
            connection,
            events: rx,
        })
    }
}
