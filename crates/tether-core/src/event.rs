//! Raw notifications delivered by the transport.

use serde::Deserialize;
use serde::Serialize;

/// Kind of a raw notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Session state change; `path` is empty.
    Session,
    /// A watched node was created.
    NodeCreated,
    /// A watched node was deleted.
    NodeDeleted,
    /// A watched node's data changed.
    NodeDataChanged,
    /// A watched node's children changed.
    NodeChildrenChanged,
    /// The server stopped tracking a watch.
    NotWatching,
}

/// Session state carried by every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No connection to any server.
    Disconnected,
    /// Dialing a server.
    Connecting,
    /// Connected with a live session.
    SyncConnected,
    /// Connected to a read-only server.
    ConnectedReadOnly,
    /// The session expired.
    Expired,
    /// Authentication failed.
    AuthFailed,
    /// The connection was closed by the client.
    Closed,
}

impl SessionState {
    /// Returns true for states in which operations can be issued.
    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::SyncConnected | SessionState::ConnectedReadOnly)
    }
}

/// A session or watch notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedEvent {
    /// What happened.
    pub event_type: EventType,
    /// Session state at the time of the notification.
    pub state: SessionState,
    /// Affected node path, empty for session events.
    pub path: String,
}

impl WatchedEvent {
    /// A session state notification.
    pub fn session(state: SessionState) -> Self {
        Self {
            event_type: EventType::Session,
            state,
            path: String::new(),
        }
    }

    /// A node notification observed while connected.
    pub fn node(event_type: EventType, path: impl Into<String>) -> Self {
        Self {
            event_type,
            state: SessionState::SyncConnected,
            path: path.into(),
        }
    }

    /// Same notification with a different path.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            event_type: self.event_type,
            state: self.state,
            path: path.into(),
        }
    }
}
