//! Listener capabilities.
//!
//! Each capability has one method. Closures of the matching shape implement
//! them directly, so `Arc::new(|state| ..)` can be registered as is.

use tether_core::CoordinationError;
use tether_core::Result;

use crate::event::FrameworkEvent;
use crate::state::ConnectionState;

/// Notified of every connection state change, in order, from the state
/// manager's dispatch task.
pub trait ConnectionStateListener: Send + Sync {
    /// Called once per accepted state change.
    fn state_changed(&self, new_state: ConnectionState);
}

impl<F> ConnectionStateListener for F
where
    F: Fn(ConnectionState) + Send + Sync,
{
    fn state_changed(&self, new_state: ConnectionState) {
        self(new_state)
    }
}

/// Receives background completions without a callback, watch notifications
/// and the closing event.
pub trait EventListener: Send + Sync {
    /// An error is handed to the unhandled-error listeners.
    fn event_received(&self, event: &FrameworkEvent) -> Result<()>;
}

impl<F> EventListener for F
where
    F: Fn(&FrameworkEvent) -> Result<()> + Send + Sync,
{
    fn event_received(&self, event: &FrameworkEvent) -> Result<()> {
        self(event)
    }
}

/// Receives errors raised where no caller can see them.
pub trait UnhandledErrorListener: Send + Sync {
    fn unhandled_error(&self, err: &CoordinationError);
}

impl<F> UnhandledErrorListener for F
where
    F: Fn(&CoordinationError) + Send + Sync,
{
    fn unhandled_error(&self, err: &CoordinationError) {
        self(err)
    }
}

/// Completion handler for a single background operation.
pub trait BackgroundCallback: Send + Sync {
    /// An error is handed to the unhandled-error listeners.
    fn process_result(&self, event: FrameworkEvent) -> Result<()>;
}

impl<F> BackgroundCallback for F
where
    F: Fn(FrameworkEvent) -> Result<()> + Send + Sync,
{
    fn process_result(&self, event: FrameworkEvent) -> Result<()> {
        self(event)
    }
}
