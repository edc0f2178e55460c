//! Framework construction.

use std::sync::Arc;
use std::time::Duration;

use tether_client::ConnectionSettings;
use tether_core::AclProvider;
use tether_core::AuthInfo;
use tether_core::CompressionProvider;
use tether_core::CoordinationError;
use tether_core::DefaultAclProvider;
use tether_core::DefaultTracerDriver;
use tether_core::Dialer;
use tether_core::EnsembleProvider;
use tether_core::Executor;
use tether_core::FixedEnsembleProvider;
use tether_core::GzipCompressionProvider;
use tether_core::Result;
use tether_core::TokioExecutor;
use tether_core::TracerDriver;
use tether_core::constants::DEFAULT_BASE_SLEEP;
use tether_core::constants::DEFAULT_CONNECTION_TIMEOUT;
use tether_core::constants::DEFAULT_MAX_RETRIES;
use tether_core::constants::DEFAULT_MAX_SLEEP;
use tether_core::constants::DEFAULT_SESSION_TIMEOUT;
use tether_retry::ExponentialBackoffRetry;
use tether_retry::RetryPolicy;
use tether_retry::RetrySleeper;

use crate::config::FrameworkConfig;
use crate::framework::Framework;
use crate::framework::FrameworkParts;

/// Collects the settings for a [`Framework`].
///
/// Only the dialer and the ensemble (or connect string) are required.
/// Everything else has a default: 60 s session and 15 s connection timeouts,
/// exponential backoff (1 s base, 3 retries, 15 s ceiling), gzip
/// compression, an open ACL, tokio spawning and an in-memory tracer.
pub struct FrameworkBuilder {
    dialer: Option<Arc<dyn Dialer>>,
    ensemble: Option<Arc<dyn EnsembleProvider>>,
    namespace: String,
    session_timeout: Duration,
    connection_timeout: Duration,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    retry_sleeper: Option<Arc<dyn RetrySleeper>>,
    compression: Option<Arc<dyn CompressionProvider>>,
    acl_provider: Option<Arc<dyn AclProvider>>,
    default_data: Vec<u8>,
    auth_infos: Vec<AuthInfo>,
    can_be_read_only: bool,
    executor: Option<Arc<dyn Executor>>,
    tracer: Option<Arc<dyn TracerDriver>>,
}

impl Default for FrameworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameworkBuilder {
    pub fn new() -> Self {
        Self {
            dialer: None,
            ensemble: None,
            namespace: String::new(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            retry_policy: None,
            retry_sleeper: None,
            compression: None,
            acl_provider: None,
            default_data: Vec::new(),
            auth_infos: Vec::new(),
            can_be_read_only: false,
            executor: None,
            tracer: None,
        }
    }

    /// Apply a loaded configuration. Collaborators are left untouched.
    pub fn from_config(config: &FrameworkConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::new()
            .namespace(config.namespace.clone())
            .session_timeout(Duration::from_millis(config.session_timeout_ms))
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .can_be_read_only(config.can_be_read_only)
            .retry_policy(config.retry.build());
        if !config.connect_string.is_empty() {
            builder = builder.connect_string(config.connect_string.clone());
        }
        for info in config.auth_infos() {
            builder = builder.authorization(info.scheme, info.auth);
        }
        Ok(builder)
    }

    /// Connect to a fixed list of servers.
    pub fn connect_string(mut self, connect_string: impl Into<String>) -> Self {
        self.ensemble = Some(Arc::new(FixedEnsembleProvider::new(connect_string)));
        self
    }

    /// Discover servers through `ensemble`.
    pub fn ensemble_provider(mut self, ensemble: Arc<dyn EnsembleProvider>) -> Self {
        self.ensemble = Some(ensemble);
        self
    }

    /// The transport used to open sessions.
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Sleep between retries with `sleeper` instead of the tokio timer.
    pub fn retry_sleeper(mut self, sleeper: Arc<dyn RetrySleeper>) -> Self {
        self.retry_sleeper = Some(sleeper);
        self
    }

    pub fn compression_provider(mut self, provider: Arc<dyn CompressionProvider>) -> Self {
        self.compression = Some(provider);
        self
    }

    pub fn acl_provider(mut self, provider: Arc<dyn AclProvider>) -> Self {
        self.acl_provider = Some(provider);
        self
    }

    /// Payload used by `for_path` calls that supply none.
    pub fn default_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.default_data = data.into();
        self
    }

    /// Add credentials applied to every new session.
    pub fn authorization(mut self, scheme: impl Into<String>, auth: impl Into<Vec<u8>>) -> Self {
        self.auth_infos.push(AuthInfo::new(scheme, auth));
        self
    }

    pub fn can_be_read_only(mut self, can_be_read_only: bool) -> Self {
        self.can_be_read_only = can_be_read_only;
        self
    }

    /// Where background operations run.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn TracerDriver>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Assemble the framework. Nothing is dialed until `start`.
    pub fn build(self) -> Result<Framework> {
        let dialer = self.dialer.ok_or(CoordinationError::MissingDialer)?;
        let ensemble = self.ensemble.ok_or_else(|| CoordinationError::Config {
            reason: "a connect string or an ensemble provider is required".to_string(),
        })?;
        let tracer = self.tracer.unwrap_or_else(|| Arc::new(DefaultTracerDriver::new()));
        let retry_policy = self.retry_policy.unwrap_or_else(|| {
            Arc::new(ExponentialBackoffRetry::new(DEFAULT_BASE_SLEEP, DEFAULT_MAX_RETRIES, DEFAULT_MAX_SLEEP))
        });

        Framework::from_parts(FrameworkParts {
            settings: ConnectionSettings {
                dialer,
                ensemble,
                session_timeout: self.session_timeout,
                connection_timeout: self.connection_timeout,
                can_be_read_only: self.can_be_read_only,
                auth_infos: self.auth_infos,
                tracer,
            },
            retry_policy,
            retry_sleeper: self.retry_sleeper,
            namespace: self.namespace,
            default_data: self.default_data,
            compression: self.compression.unwrap_or_else(|| Arc::new(GzipCompressionProvider)),
            acl_provider: self.acl_provider.unwrap_or_else(|| Arc::new(DefaultAclProvider)),
            executor: self.executor.unwrap_or_else(|| Arc::new(TokioExecutor)),
        })
    }
}
