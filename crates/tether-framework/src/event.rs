//! Events delivered to background callbacks and event listeners.

use std::any::Any;
use std::sync::Arc;

use tether_core::Acl;
use tether_core::CoordinationError;
use tether_core::Stat;
use tether_core::WatchedEvent;

use crate::transaction::TransactionResult;

/// Caller-supplied value handed back with a background completion.
pub type EventContext = Arc<dyn Any + Send + Sync>;

/// What produced a [`FrameworkEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameworkEventType {
    Create,
    Delete,
    Exists,
    GetData,
    SetData,
    Children,
    Sync,
    GetAcl,
    SetAcl,
    /// A watch fired.
    Watched,
    /// The framework is closing.
    Closing,
    Transaction,
}

/// Outcome of a background operation, a fired watch or the close
/// notification. Which fields are set depends on
/// [`event_type`](Self::event_type).
#[derive(Clone)]
pub struct FrameworkEvent {
    event_type: FrameworkEventType,
    path: Option<String>,
    name: Option<String>,
    error: Option<CoordinationError>,
    data: Option<Vec<u8>>,
    stat: Option<Stat>,
    children: Option<Vec<String>>,
    acl: Option<Vec<Acl>>,
    results: Option<Vec<TransactionResult>>,
    context: Option<EventContext>,
    watched_event: Option<WatchedEvent>,
}

impl std::fmt::Debug for FrameworkEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameworkEvent")
            .field("event_type", &self.event_type)
            .field("path", &self.path)
            .field("name", &self.name)
            .field("error", &self.error)
            .field("data_len", &self.data.as_ref().map(Vec::len))
            .field("stat", &self.stat)
            .field("children", &self.children)
            .field("has_context", &self.context.is_some())
            .field("watched_event", &self.watched_event)
            .finish()
    }
}

impl FrameworkEvent {
    pub(crate) fn new(event_type: FrameworkEventType) -> Self {
        Self {
            event_type,
            path: None,
            name: None,
            error: None,
            data: None,
            stat: None,
            children: None,
            acl: None,
            results: None,
            context: None,
            watched_event: None,
        }
    }

    pub(crate) fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub(crate) fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn with_error(mut self, error: CoordinationError) -> Self {
        self.error = Some(error);
        self
    }

    pub(crate) fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    pub(crate) fn with_stat(mut self, stat: Option<Stat>) -> Self {
        self.stat = stat;
        self
    }

    pub(crate) fn with_children(mut self, children: Vec<String>) -> Self {
        self.children = Some(children);
        self
    }

    pub(crate) fn with_acl(mut self, acl: Vec<Acl>) -> Self {
        self.acl = Some(acl);
        self
    }

    pub(crate) fn with_results(mut self, results: Vec<TransactionResult>) -> Self {
        self.results = Some(results);
        self
    }

    pub(crate) fn with_context(mut self, context: Option<EventContext>) -> Self {
        self.context = context;
        self
    }

    pub(crate) fn with_watched_event(mut self, event: WatchedEvent) -> Self {
        self.watched_event = Some(event);
        self
    }

    pub fn event_type(&self) -> FrameworkEventType {
        self.event_type
    }

    /// Caller path on failure, namespace-relative result path on success.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Final node name of the affected path.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Set when the operation failed.
    pub fn error(&self) -> Option<&CoordinationError> {
        self.error.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn stat(&self) -> Option<&Stat> {
        self.stat.as_ref()
    }

    pub fn children(&self) -> Option<&[String]> {
        self.children.as_deref()
    }

    pub fn acl(&self) -> Option<&[Acl]> {
        self.acl.as_deref()
    }

    /// Per-operation results of a committed transaction.
    pub fn results(&self) -> Option<&[TransactionResult]> {
        self.results.as_deref()
    }

    /// The value passed to `in_background_with_context`.
    pub fn context(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.context.as_deref()
    }

    /// The raw notification behind a `Watched` event.
    pub fn watched_event(&self) -> Option<&WatchedEvent> {
        self.watched_event.as_ref()
    }
}
