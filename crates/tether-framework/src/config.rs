//! Framework configuration loadable from TOML.

use serde::Deserialize;
use serde::Serialize;
use tether_core::AuthInfo;
use tether_core::CoordinationError;
use tether_core::Result;
use tether_core::constants::DEFAULT_CONNECTION_TIMEOUT;
use tether_core::constants::DEFAULT_SESSION_TIMEOUT;
use tether_core::paths::validate_namespace;
use tether_retry::RetryPolicyConfig;

mod defaults {
    use super::*;

    pub fn session_timeout_ms() -> u64 { DEFAULT_SESSION_TIMEOUT.as_millis() as u64 }
    pub fn connection_timeout_ms() -> u64 { DEFAULT_CONNECTION_TIMEOUT.as_millis() as u64 }
}

/// Credentials added to every new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Authentication scheme, such as `digest`.
    pub scheme: String,
    /// Scheme-specific credentials, such as `user:password`.
    pub auth: String,
}

impl From<&AuthConfig> for AuthInfo {
    fn from(config: &AuthConfig) -> Self {
        AuthInfo::new(config.scheme.clone(), config.auth.as_bytes().to_vec())
    }
}

/// Everything a [`FrameworkBuilder`](crate::FrameworkBuilder) can take from
/// a file. Durations are in milliseconds.
///
/// ```toml
/// connect_string = "zk1:2181,zk2:2181"
/// namespace = "app"
/// session_timeout_ms = 30000
///
/// [retry]
/// kind = "n_times"
/// n = 5
/// sleep_ms = 200
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    /// Comma-separated ensemble addresses.
    pub connect_string: String,
    /// Prefix applied to every path. Empty for none.
    pub namespace: String,
    /// Requested session timeout.
    pub session_timeout_ms: u64,
    /// How long a silent connection is trusted.
    pub connection_timeout_ms: u64,
    /// Accept read-only servers.
    pub can_be_read_only: bool,
    /// Retry policy for every operation.
    pub retry: RetryPolicyConfig,
    /// Session credentials.
    pub auth: Vec<AuthConfig>,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            connect_string: String::new(),
            namespace: String::new(),
            session_timeout_ms: defaults::session_timeout_ms(),
            connection_timeout_ms: defaults::connection_timeout_ms(),
            can_be_read_only: false,
            retry: RetryPolicyConfig::default(),
            auth: Vec::new(),
        }
    }
}

impl FrameworkConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|err| CoordinationError::Config {
            reason: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|err| CoordinationError::Config {
            reason: err.to_string(),
        })
    }

    /// Check the values a builder cannot fix up on its own.
    pub fn validate(&self) -> Result<()> {
        if self.session_timeout_ms == 0 {
            return Err(CoordinationError::Config {
                reason: "session_timeout_ms must be positive".to_string(),
            });
        }
        if self.connection_timeout_ms == 0 {
            return Err(CoordinationError::Config {
                reason: "connection_timeout_ms must be positive".to_string(),
            });
        }
        validate_namespace(&self.namespace)
    }

    pub(crate) fn auth_infos(&self) -> Vec<AuthInfo> {
        self.auth.iter().map(AuthInfo::from).collect()
    }
}
