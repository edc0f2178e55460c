//! The framework handle, its namespace facades and the shared operation
//! plumbing used by every builder.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tether_client::ConnectionSettings;
use tether_client::CoordinationClient;
use tether_client::Watcher;
use tether_core::AclProvider;
use tether_core::CompressionProvider;
use tether_core::Connection;
use tether_core::CoordinationError;
use tether_core::EventType;
use tether_core::Executor;
use tether_core::ListenerContainer;
use tether_core::Result;
use tether_core::SessionState;
use tether_core::TimeTrace;
use tether_core::WatchReceiver;
use tether_core::WatchedEvent;
use tether_retry::RetryPolicy;
use tether_retry::RetrySleeper;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::builder::FrameworkBuilder;
use crate::event::FrameworkEvent;
use crate::event::FrameworkEventType;
use crate::listener::BackgroundCallback;
use crate::listener::ConnectionStateListener;
use crate::listener::EventListener;
use crate::listener::UnhandledErrorListener;
use crate::namespace::Namespace;
use crate::ops::Backgrounding;
use crate::ops::CreateBuilder;
use crate::ops::DeleteBuilder;
use crate::ops::ExistsBuilder;
use crate::ops::GetAclBuilder;
use crate::ops::GetChildrenBuilder;
use crate::ops::GetDataBuilder;
use crate::ops::SetAclBuilder;
use crate::ops::SetDataBuilder;
use crate::ops::SyncBuilder;
use crate::ops::Watching;
use crate::state::ConnectionState;
use crate::state::ConnectionStateManager;
use crate::transaction::Transaction;

/// Lifecycle of a [`Framework`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkState {
    /// `start` has not been called.
    Latent,
    /// `start` succeeded.
    Started,
    /// `close` has been called.
    Stopped,
}

impl FrameworkState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Latent,
            1 => Self::Started,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Latent => 0,
            Self::Started => 1,
            Self::Stopped => 2,
        }
    }
}

/// Everything the builder resolved, ready to assemble a framework.
pub(crate) struct FrameworkParts {
    pub settings: ConnectionSettings,
    pub retry_policy: Arc<dyn RetryPolicy>,
    pub retry_sleeper: Option<Arc<dyn RetrySleeper>>,
    pub namespace: String,
    pub default_data: Vec<u8>,
    pub compression: Arc<dyn CompressionProvider>,
    pub acl_provider: Arc<dyn AclProvider>,
    pub executor: Arc<dyn Executor>,
}

pub(crate) struct FrameworkInner {
    pub(crate) client: CoordinationClient,
    pub(crate) state_manager: Arc<ConnectionStateManager>,
    lifecycle: AtomicU8,
    event_listeners: ListenerContainer<dyn EventListener>,
    unhandled_error_listeners: ListenerContainer<dyn UnhandledErrorListener>,
    pub(crate) default_data: Vec<u8>,
    pub(crate) compression: Arc<dyn CompressionProvider>,
    pub(crate) acl_provider: Arc<dyn AclProvider>,
    executor: Arc<dyn Executor>,
    namespace: Arc<Namespace>,
    facades: Mutex<HashMap<String, Arc<NamespaceFacade>>>,
}

impl FrameworkInner {
    pub(crate) fn state(&self) -> FrameworkState {
        FrameworkState::from_u8(self.lifecycle.load(Ordering::SeqCst))
    }

    fn transition(&self, from: FrameworkState, to: FrameworkState) -> bool {
        self.lifecycle
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Run `op` under the retry loop against the live connection, creating
    /// the namespace node first if needed.
    pub(crate) async fn call_with_retry<T, F, Fut>(&self, namespace: &Namespace, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn Connection>, u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let op = &op;
        self.client
            .new_retry_loop()
            .call_with_retry(move |attempt| async move {
                let conn = self.client.conn().await?;
                namespace.ensure(conn.as_ref(), self.acl_provider.as_ref()).await?;
                op(conn, attempt).await
            })
            .await
    }

    /// Run `operation` on the executor and deliver the event it produces.
    pub(crate) fn submit<F>(self: &Arc<Self>, trace_name: &'static str, background: Backgrounding, operation: F)
    where
        F: Future<Output = FrameworkEvent> + Send + 'static,
    {
        let framework = self.clone();
        self.executor.execute(Box::pin(async move {
            let trace = TimeTrace::new(trace_name, framework.client.tracer().clone());
            let event = operation.await.with_context(background.context);
            trace.commit();
            framework.deliver(event, background.callback);
        }));
    }

    /// Run a fire-and-forget task on the executor.
    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.executor.execute(Box::pin(task));
    }

    fn deliver(&self, event: FrameworkEvent, callback: Option<Arc<dyn BackgroundCallback>>) {
        match callback {
            Some(callback) => {
                if let Err(err) = callback.process_result(event) {
                    self.report_unhandled(&err);
                }
            }
            None if !self.event_listeners.is_empty() => self.process_event(&event),
            None => debug!(
                event_type = ?event.event_type(),
                path = event.path().unwrap_or_default(),
                error = ?event.error(),
                "no callback or listener for background event"
            ),
        }
    }

    pub(crate) fn process_event(&self, event: &FrameworkEvent) {
        self.event_listeners.for_each(|listener| {
            if let Err(err) = listener.event_received(event) {
                self.report_unhandled(&err);
            }
        });
    }

    pub(crate) fn report_unhandled(&self, err: &CoordinationError) {
        if self.unhandled_error_listeners.is_empty() {
            error!(error = %err, "unhandled error");
            return;
        }
        self.unhandled_error_listeners.for_each(|listener| listener.unhandled_error(err));
    }

    /// Hand a watch registration to an executor task that delivers it when
    /// it fires.
    pub(crate) fn forward_watch(self: &Arc<Self>, namespace: Arc<Namespace>, watch: WatchReceiver, target: Watching) {
        let framework = Arc::downgrade(self);
        self.spawn(async move {
            // A dropped sender means the connection went away first.
            let Ok(event) = watch.await else {
                return;
            };
            let event = event.with_path(namespace.unfix(&event.path));
            match target {
                Watching::None => {}
                Watching::Watcher(watcher) => watcher.process(&event),
                Watching::Listeners => {
                    if let Some(framework) = framework.upgrade() {
                        let watched =
                            FrameworkEvent::new(FrameworkEventType::Watched).with_path(event.path.clone()).with_watched_event(event);
                        framework.process_event(&watched);
                    }
                }
            }
        });
    }

    fn process_watched_event(&self, event: &WatchedEvent) {
        if event.event_type == EventType::Session {
            self.validate_connection(event.state);
        }
        let mut watched = FrameworkEvent::new(FrameworkEventType::Watched);
        let event = if event.path.is_empty() {
            event.clone()
        } else {
            let path = self.namespace.unfix(&event.path);
            watched = watched.with_path(path.clone());
            event.with_path(path)
        };
        self.process_event(&watched.with_watched_event(event));
    }

    fn validate_connection(&self, state: SessionState) {
        match state {
            SessionState::Disconnected => {
                self.state_manager.set_to_suspended();
            }
            SessionState::Expired => {
                self.state_manager.add_state_change(ConnectionState::Lost);
            }
            SessionState::SyncConnected => {
                self.state_manager.add_state_change(ConnectionState::Reconnected);
            }
            SessionState::ConnectedReadOnly => {
                self.state_manager.add_state_change(ConnectionState::ReadOnly);
            }
            SessionState::Connecting | SessionState::AuthFailed | SessionState::Closed => {}
        }
    }

    fn facade(self: &Arc<Self>, namespace: &str) -> Result<Arc<NamespaceFacade>> {
        let mut facades = self.facades.lock();
        if let Some(facade) = facades.get(namespace) {
            return Ok(facade.clone());
        }
        let facade = Arc::new(NamespaceFacade {
            framework: Arc::downgrade(self),
            namespace: Arc::new(Namespace::new(namespace)?),
        });
        facades.insert(namespace.to_string(), facade.clone());
        Ok(facade)
    }
}

/// The target of a builder: which framework, under which namespace.
///
/// Holds the framework weakly, so a builder or facade outliving the
/// framework fails with `Closed` instead of keeping it alive.
#[derive(Clone)]
pub struct OperationScope {
    framework: Weak<FrameworkInner>,
    namespace: Arc<Namespace>,
}

impl OperationScope {
    /// The framework, if it is still alive and started.
    pub(crate) fn framework(&self) -> Result<Arc<FrameworkInner>> {
        let framework = self.framework.upgrade().ok_or(CoordinationError::Closed)?;
        match framework.state() {
            FrameworkState::Started => Ok(framework),
            FrameworkState::Latent => Err(CoordinationError::NotStarted),
            FrameworkState::Stopped => Err(CoordinationError::Closed),
        }
    }

    pub(crate) fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }
}

/// Builder factories shared by [`Framework`] and [`NamespaceFacade`].
pub trait FrameworkOps {
    /// Target of the builders created by this handle.
    fn scope(&self) -> OperationScope;

    /// Namespace applied to every path, empty for none.
    fn namespace(&self) -> String {
        self.scope().namespace.name().to_string()
    }

    fn create(&self) -> CreateBuilder {
        CreateBuilder::new(self.scope())
    }

    fn delete(&self) -> DeleteBuilder {
        DeleteBuilder::new(self.scope())
    }

    fn check_exists(&self) -> ExistsBuilder {
        ExistsBuilder::new(self.scope())
    }

    fn get_data(&self) -> GetDataBuilder {
        GetDataBuilder::new(self.scope())
    }

    fn set_data(&self) -> SetDataBuilder {
        SetDataBuilder::new(self.scope())
    }

    fn get_children(&self) -> GetChildrenBuilder {
        GetChildrenBuilder::new(self.scope())
    }

    fn get_acl(&self) -> GetAclBuilder {
        GetAclBuilder::new(self.scope())
    }

    fn set_acl(&self) -> SetAclBuilder {
        SetAclBuilder::new(self.scope())
    }

    fn sync(&self) -> SyncBuilder {
        SyncBuilder::new(self.scope())
    }

    /// Start an atomic multi-operation.
    fn in_transaction(&self) -> Transaction {
        Transaction::new(self.scope())
    }
}

/// A coordination client with connection state tracking, namespaces and
/// fluent operation builders.
///
/// ```ignore
/// let framework = Framework::builder().connect_string("zk1:2181").dialer(dialer).build()?;
/// framework.start().await?;
/// let path = framework.create().creating_parents_if_needed().for_path_with_data("/a/b", b"x".to_vec()).await?;
/// ```
pub struct Framework {
    inner: Arc<FrameworkInner>,
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("state", &self.inner.state())
            .field("namespace", &self.inner.namespace.name())
            .field("connection_state", &self.inner.state_manager.current_state())
            .finish()
    }
}

impl Framework {
    /// Start configuring a framework.
    pub fn builder() -> FrameworkBuilder {
        FrameworkBuilder::new()
    }

    pub(crate) fn from_parts(parts: FrameworkParts) -> Result<Self> {
        let namespace = Arc::new(Namespace::new(&parts.namespace)?);
        let tracer = parts.settings.tracer.clone();
        let mut client = CoordinationClient::new(parts.settings, parts.retry_policy);
        if let Some(sleeper) = parts.retry_sleeper {
            client = client.with_sleeper(sleeper);
        }

        let inner = Arc::new_cyclic(|weak: &Weak<FrameworkInner>| {
            let framework = weak.clone();
            let watcher: Arc<dyn Watcher> = Arc::new(move |event: &WatchedEvent| {
                if let Some(framework) = framework.upgrade() {
                    framework.process_watched_event(event);
                }
            });
            client.add_parent_watcher(watcher);

            FrameworkInner {
                client,
                state_manager: ConnectionStateManager::new(tracer),
                lifecycle: AtomicU8::new(FrameworkState::Latent.as_u8()),
                event_listeners: ListenerContainer::new(),
                unhandled_error_listeners: ListenerContainer::new(),
                default_data: parts.default_data,
                compression: parts.compression,
                acl_provider: parts.acl_provider,
                executor: parts.executor,
                namespace,
                facades: Mutex::new(HashMap::new()),
            }
        });
        Ok(Self { inner })
    }

    /// Start the state manager, then the client. Fails the second time.
    pub async fn start(&self) -> Result<()> {
        if !self.inner.transition(FrameworkState::Latent, FrameworkState::Started) {
            return Err(CoordinationError::AlreadyStarted);
        }
        info!(
            connection_string = %self.inner.client.current_connection_string(),
            namespace = %self.inner.namespace.name(),
            "starting framework"
        );
        self.inner.state_manager.start()?;
        self.inner.client.start().await
    }

    /// Deliver `Closing` to the event listeners, drop every listener, then
    /// close the state manager and the client. Does nothing unless started.
    pub async fn close(&self) {
        if !self.inner.transition(FrameworkState::Started, FrameworkState::Stopped) {
            return;
        }
        info!("closing framework");
        self.inner.process_event(&FrameworkEvent::new(FrameworkEventType::Closing));
        self.inner.event_listeners.clear();
        self.inner.unhandled_error_listeners.clear();
        self.inner.state_manager.close();
        self.inner.client.close().await;
    }

    pub fn state(&self) -> FrameworkState {
        self.inner.state()
    }

    /// Returns true between `start` and `close`.
    pub fn is_started(&self) -> bool {
        self.state() == FrameworkState::Started
    }

    /// The managed client.
    pub fn client(&self) -> &CoordinationClient {
        &self.inner.client
    }

    /// The last reported connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state_manager.current_state()
    }

    pub fn connection_state_listenable(&self) -> &ListenerContainer<dyn ConnectionStateListener> {
        self.inner.state_manager.listeners()
    }

    /// Listeners for background completions without a callback, watches
    /// set with `watched()` and the closing event.
    pub fn event_listenable(&self) -> &ListenerContainer<dyn EventListener> {
        &self.inner.event_listeners
    }

    pub fn unhandled_error_listenable(&self) -> &ListenerContainer<dyn UnhandledErrorListener> {
        &self.inner.unhandled_error_listeners
    }

    /// Wait for a connected state. `None` waits indefinitely.
    pub async fn block_until_connected(&self, max_wait: Option<Duration>) -> Result<()> {
        self.inner.state_manager.block_until_connected(max_wait).await
    }

    /// A facade applying `namespace` to every path. Facades are cached per
    /// namespace string.
    pub fn using_namespace(&self, namespace: &str) -> Result<Arc<NamespaceFacade>> {
        self.inner.facade(namespace)
    }
}

impl FrameworkOps for Framework {
    fn scope(&self) -> OperationScope {
        OperationScope {
            framework: Arc::downgrade(&self.inner),
            namespace: self.inner.namespace.clone(),
        }
    }
}

/// A view of a [`Framework`] with a different namespace.
///
/// It cannot start or close the framework and has no access to the event
/// listeners.
pub struct NamespaceFacade {
    framework: Weak<FrameworkInner>,
    namespace: Arc<Namespace>,
}

impl std::fmt::Debug for NamespaceFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceFacade").field("namespace", &self.namespace.name()).finish()
    }
}

impl NamespaceFacade {
    fn framework(&self) -> Result<Arc<FrameworkInner>> {
        self.framework.upgrade().ok_or(CoordinationError::Closed)
    }

    /// Always fails: the owning framework controls the lifecycle.
    pub fn start(&self) -> Result<()> {
        warn!(namespace = %self.namespace.name(), "start called on a namespace facade");
        Err(CoordinationError::Unsupported {
            operation: "start".to_string(),
        })
    }

    /// Always fails: the owning framework controls the lifecycle.
    pub fn close(&self) -> Result<()> {
        warn!(namespace = %self.namespace.name(), "close called on a namespace facade");
        Err(CoordinationError::Unsupported {
            operation: "close".to_string(),
        })
    }

    /// State of the owning framework; `Stopped` once it is gone.
    pub fn state(&self) -> FrameworkState {
        self.framework().map(|framework| framework.state()).unwrap_or(FrameworkState::Stopped)
    }

    pub fn is_started(&self) -> bool {
        self.state() == FrameworkState::Started
    }

    /// Another facade of the owning framework.
    pub fn using_namespace(&self, namespace: &str) -> Result<Arc<NamespaceFacade>> {
        self.framework()?.facade(namespace)
    }

    pub async fn block_until_connected(&self, max_wait: Option<Duration>) -> Result<()> {
        let framework = self.framework()?;
        framework.state_manager.block_until_connected(max_wait).await
    }
}

impl FrameworkOps for NamespaceFacade {
    fn scope(&self) -> OperationScope {
        OperationScope {
            framework: self.framework.clone(),
            namespace: self.namespace.clone(),
        }
    }
}
