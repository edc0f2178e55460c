//! Connection state machine and its listener dispatch.
//!
//! The connection layer reports raw session transitions; the manager turns
//! them into at most one notification per change and hands them to listeners
//! from a dedicated task, so a slow listener never stalls the connection
//! bookkeeping that produced the change.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::CoordinationError;
use tether_core::ListenerContainer;
use tether_core::Result;
use tether_core::TracerDriver;
use tether_core::constants::STATE_QUEUE_SIZE;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;

use crate::listener::ConnectionStateListener;

/// Trace counter bumped when a full queue drops its oldest state.
pub const DROP_STATE_CHANGE: &str = "connection-state-drop";

/// Framework-level view of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Nothing has been reported yet.
    Unknown,
    /// First successful connection.
    Connected,
    /// The connection was lost and may come back.
    Suspended,
    /// A suspended or lost connection came back.
    Reconnected,
    /// The session expired. Ephemeral nodes and watches are gone.
    Lost,
    /// Connected to a read-only server.
    ReadOnly,
}

impl ConnectionState {
    /// Returns true for the states in which operations can be issued.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Reconnected | Self::ReadOnly)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Connected => "CONNECTED",
            Self::Suspended => "SUSPENDED",
            Self::Reconnected => "RECONNECTED",
            Self::Lost => "LOST",
            Self::ReadOnly => "READ_ONLY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Latent,
    Started,
    Stopped,
}

struct ManagerState {
    lifecycle: Lifecycle,
    current: ConnectionState,
    initial_connect_sent: bool,
    queue: VecDeque<ConnectionState>,
}

/// Turns raw connect and disconnect signals into de-duplicated state
/// changes and delivers them to listeners in order.
///
/// # Tiger Style
///
/// - The delivery queue is bounded; a full queue drops the oldest entry.
/// - The state lock is never held while a listener runs.
pub struct ConnectionStateManager {
    listeners: ListenerContainer<dyn ConnectionStateListener>,
    state: Mutex<ManagerState>,
    notify: Arc<Notify>,
    queue_size: usize,
    tracer: Arc<dyn TracerDriver>,
}

impl std::fmt::Debug for ConnectionStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionStateManager")
            .field("lifecycle", &state.lifecycle)
            .field("current", &state.current)
            .field("queued", &state.queue.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ConnectionStateManager {
    /// Create a manager with the default queue size.
    pub fn new(tracer: Arc<dyn TracerDriver>) -> Arc<Self> {
        Self::with_queue_size(tracer, STATE_QUEUE_SIZE)
    }

    /// Create a manager whose delivery queue holds `queue_size` states.
    pub fn with_queue_size(tracer: Arc<dyn TracerDriver>, queue_size: usize) -> Arc<Self> {
        Arc::new(Self {
            listeners: ListenerContainer::new(),
            state: Mutex::new(ManagerState {
                lifecycle: Lifecycle::Latent,
                current: ConnectionState::Unknown,
                initial_connect_sent: false,
                queue: VecDeque::with_capacity(queue_size),
            }),
            notify: Arc::new(Notify::new()),
            queue_size: queue_size.max(1),
            tracer,
        })
    }

    /// Start the dispatch task. Fails the second time.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.lifecycle != Lifecycle::Latent {
                return Err(CoordinationError::AlreadyStarted);
            }
            state.lifecycle = Lifecycle::Started;
        }

        let manager = Arc::downgrade(self);
        let notify = self.notify.clone();
        tokio::spawn(dispatch(manager, notify));
        debug!("connection state manager started");
        Ok(())
    }

    /// Stop the dispatch task and drop every listener. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.lifecycle != Lifecycle::Started {
                return;
            }
            state.lifecycle = Lifecycle::Stopped;
            state.queue.clear();
        }
        self.notify.notify_one();
        self.listeners.clear();
        debug!("connection state manager closed");
    }

    /// Listener registry.
    pub fn listeners(&self) -> &ListenerContainer<dyn ConnectionStateListener> {
        &self.listeners
    }

    /// The last accepted state.
    pub fn current_state(&self) -> ConnectionState {
        self.state.lock().current
    }

    /// Returns true if the last accepted state is a connected one.
    pub fn is_connected(&self) -> bool {
        self.current_state().is_connected()
    }

    /// Move to `Suspended` unless already `Suspended` or `Lost`.
    ///
    /// Returns true if the change was queued.
    pub fn set_to_suspended(&self) -> bool {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Started {
            return false;
        }
        if matches!(state.current, ConnectionState::Lost | ConnectionState::Suspended) {
            return false;
        }
        state.current = ConnectionState::Suspended;
        self.post_state(&mut state, ConnectionState::Suspended);
        true
    }

    /// Record a state change. A change to the current state is ignored.
    ///
    /// The first connected-like state is reported as `Connected`, whatever
    /// was proposed. Returns true if the change was queued.
    pub fn add_state_change(&self, new_state: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Started {
            return false;
        }
        if state.current == new_state {
            return false;
        }
        state.current = new_state;

        let mut reported = new_state;
        if !matches!(new_state, ConnectionState::Lost | ConnectionState::Suspended | ConnectionState::ReadOnly)
            && !state.initial_connect_sent
        {
            state.initial_connect_sent = true;
            reported = ConnectionState::Connected;
        }
        self.post_state(&mut state, reported);
        true
    }

    fn post_state(&self, state: &mut ManagerState, new_state: ConnectionState) {
        while state.queue.len() >= self.queue_size {
            if let Some(dropped) = state.queue.pop_front() {
                self.tracer.add_count(DROP_STATE_CHANGE, 1);
                debug!(dropped = %dropped, "state queue full, dropping oldest state");
            }
        }
        trace!(state = %new_state, "posting connection state");
        state.queue.push_back(new_state);
        self.notify.notify_one();
    }

    /// Wait for a connected-like state.
    ///
    /// `None` or a zero duration waits indefinitely. Returns `Timeout` when
    /// `max_wait` elapses and `Closed` if the manager closes first.
    pub async fn block_until_connected(&self, max_wait: Option<Duration>) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if self.state.lock().lifecycle == Lifecycle::Stopped {
            return Err(CoordinationError::Closed);
        }

        let (tx, mut rx) = mpsc::channel::<ConnectionState>(1);
        let listener: Arc<dyn ConnectionStateListener> = Arc::new(move |new_state: ConnectionState| {
            if new_state.is_connected() {
                let _ = tx.try_send(new_state);
            }
        });
        // The registry owns the only strong reference, so clearing it on
        // close drops the sender and wakes the wait below.
        let registered = Arc::downgrade(&listener);
        self.listeners.add(listener);

        let outcome = if self.is_connected() {
            Ok(())
        } else {
            match max_wait.filter(|wait| !wait.is_zero()) {
                Some(wait) => match tokio::time::timeout(wait, rx.recv()).await {
                    Ok(Some(_)) => Ok(()),
                    Ok(None) => Err(CoordinationError::Closed),
                    Err(_) => Err(CoordinationError::Timeout {
                        operation: "connection state".to_string(),
                    }),
                },
                None => match rx.recv().await {
                    Some(_) => Ok(()),
                    None => Err(CoordinationError::Closed),
                },
            }
        };

        if let Some(listener) = registered.upgrade() {
            self.listeners.remove(&listener);
        }
        outcome
    }

    fn next_state(&self) -> Option<ConnectionState> {
        let mut state = self.state.lock();
        if state.lifecycle == Lifecycle::Stopped {
            return None;
        }
        state.queue.pop_front()
    }

    fn is_stopped(&self) -> bool {
        self.state.lock().lifecycle == Lifecycle::Stopped
    }
}

impl Drop for ConnectionStateManager {
    // Wakes the dispatch task so it sees the manager is gone and exits.
    fn drop(&mut self) {
        self.notify.notify_one();
    }
}

async fn dispatch(manager: Weak<ConnectionStateManager>, notify: Arc<Notify>) {
    loop {
        {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if manager.is_stopped() {
                return;
            }
            while let Some(new_state) = manager.next_state() {
                debug!(state = %new_state, "connection state changed");
                manager.listeners.for_each(|listener| listener.state_changed(new_state));
            }
        }
        notify.notified().await;
    }
}
