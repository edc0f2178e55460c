//! Watch notification sinks.

use tether_core::WatchedEvent;

/// Receives raw session and node notifications.
///
/// Invoked on its own task per notification; implementations should return
/// quickly.
pub trait Watcher: Send + Sync {
    /// Handle one notification.
    fn process(&self, event: &WatchedEvent);
}

impl<F> Watcher for F
where
    F: Fn(&WatchedEvent) + Send + Sync,
{
    fn process(&self, event: &WatchedEvent) {
        self(event)
    }
}
