//! Owner of the single live connection.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::AuthInfo;
use tether_core::Connection;
use tether_core::CoordinationError;
use tether_core::Dialer;
use tether_core::EnsembleProvider;
use tether_core::Result;
use tether_core::WatchedEvent;
use tokio::sync::mpsc;
use tracing::debug;

enum Helper {
    /// Closed, or never started.
    Empty,
    /// The previous connection is being closed.
    Resetting,
    /// The next `get_connection` dials.
    Factory,
    /// A dialed connection and the string it was dialed with.
    Cached {
        connection_string: String,
        connection: Arc<dyn Connection>,
    },
}

struct HolderState {
    helper: Helper,
    /// Bumped by every reset and clear, so a dial that started before one
    /// can tell it lost the race.
    generation: u64,
}

/// A connection handed out by the holder. `events` is set only when this
/// call dialed it.
pub(crate) struct Acquired {
    pub connection: Arc<dyn Connection>,
    pub events: Option<mpsc::Receiver<WatchedEvent>>,
}

/// Holds at most one live connection and dials lazily.
///
/// The lock is never held across a dial or a close. Replacement always closes
/// the old connection before a new one can be dialed.
pub(crate) struct HandleHolder {
    dialer: Arc<dyn Dialer>,
    ensemble: Arc<dyn EnsembleProvider>,
    session_timeout: Duration,
    can_be_read_only: bool,
    auth_infos: Vec<AuthInfo>,
    state: Mutex<HolderState>,
}

impl HandleHolder {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        ensemble: Arc<dyn EnsembleProvider>,
        session_timeout: Duration,
        can_be_read_only: bool,
        auth_infos: Vec<AuthInfo>,
    ) -> Self {
        Self {
            dialer,
            ensemble,
            session_timeout,
            can_be_read_only,
            auth_infos,
            state: Mutex::new(HolderState {
                helper: Helper::Empty,
                generation: 0,
            }),
        }
    }

    /// Connection string of the cached connection.
    pub fn connection_string(&self) -> Option<String> {
        match &self.state.lock().helper {
            Helper::Cached { connection_string, .. } => Some(connection_string.clone()),
            _ => None,
        }
    }

    /// Returns true if the ensemble reports a different string than the one
    /// the cached connection was dialed with.
    pub fn has_new_connection_string(&self) -> bool {
        match self.connection_string() {
            Some(current) => current != self.ensemble.connection_string(),
            None => false,
        }
    }

    /// The cached connection, dialing first if the holder was reset.
    pub async fn get_connection(&self) -> Result<Acquired> {
        let generation = {
            let state = self.state.lock();
            match &state.helper {
                Helper::Empty => return Err(CoordinationError::Closed),
                Helper::Resetting => return Err(CoordinationError::ConnectionLoss),
                Helper::Cached { connection, .. } => {
                    return Ok(Acquired {
                        connection: connection.clone(),
                        events: None,
                    });
                }
                Helper::Factory => state.generation,
            }
        };

        let connection_string = self.ensemble.connection_string();
        let dialed = self.dialer.dial(&connection_string, self.session_timeout, self.can_be_read_only).await?;
        if let Err(err) = self.authenticate(dialed.connection.as_ref()).await {
            dialed.connection.close().await;
            return Err(err);
        }

        let winner = {
            let mut state = self.state.lock();
            let current = state.generation == generation;
            let winner = match &state.helper {
                Helper::Factory if current => None,
                Helper::Cached { connection, .. } if current => Some(Ok(connection.clone())),
                _ => Some(Err(CoordinationError::ConnectionLoss)),
            };
            if winner.is_none() {
                state.helper = Helper::Cached {
                    connection_string: connection_string.clone(),
                    connection: dialed.connection.clone(),
                };
            }
            winner
        };

        match winner {
            None => {
                debug!(connection_string = %connection_string, "connection established");
                Ok(Acquired {
                    connection: dialed.connection,
                    events: Some(dialed.events),
                })
            }
            Some(winner) => {
                debug!(connection_string = %connection_string, "dial lost a race, closing the new connection");
                dialed.connection.close().await;
                winner.map(|connection| Acquired {
                    connection,
                    events: None,
                })
            }
        }
    }

    async fn authenticate(&self, connection: &dyn Connection) -> Result<()> {
        for info in &self.auth_infos {
            connection.add_auth(&info.scheme, &info.auth).await?;
        }
        Ok(())
    }

    /// Close the current connection and arm the holder to dial again.
    pub async fn close_and_reset(&self) {
        let (old, generation) = self.take(Helper::Resetting);
        if let Some(connection) = old {
            connection.close().await;
        }
        let mut state = self.state.lock();
        if state.generation == generation {
            state.helper = Helper::Factory;
        }
    }

    /// Close the current connection and stop dialing.
    pub async fn close_and_clear(&self) {
        let (old, _) = self.take(Helper::Empty);
        if let Some(connection) = old {
            connection.close().await;
        }
    }

    fn take(&self, next: Helper) -> (Option<Arc<dyn Connection>>, u64) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        let old = std::mem::replace(&mut state.helper, next);
        let connection = match old {
            Helper::Cached { connection, .. } => Some(connection),
            _ => None,
        };
        (connection, state.generation)
    }
}
