//! Collaborator interfaces consumed by the framework.
//!
//! The transport (`Connection`, `Dialer`), ensemble discovery, compression and
//! ACL policy are all supplied from outside. The framework only depends on the
//! surfaces below, so every one of them can be replaced by the deterministic
//! implementations in `tether-testing`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::event::WatchedEvent;
use crate::multi::MultiOp;
use crate::multi::MultiResponse;
use crate::types::Acl;
use crate::types::CreateMode;
use crate::types::Stat;

/// One-shot watch registration returned by the `*_w` calls.
pub type WatchReceiver = oneshot::Receiver<WatchedEvent>;

/// An established connection to the coordination ensemble.
///
/// Every call is individually retryable; connectivity failures are reported as
/// `ConnectionLoss`, `OperationTimeout`, `SessionExpired` or `SessionMoved`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Add authentication credentials to the session.
    async fn add_auth(&self, scheme: &str, auth: &[u8]) -> Result<()>;

    /// Close the connection. Idempotent.
    async fn close(&self);

    /// Create a node and return its actual path (sequential nodes get a suffix).
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode, acl: &[Acl]) -> Result<String>;

    /// Node metadata, or `None` if the node does not exist.
    async fn exists(&self, path: &str) -> Result<Option<Stat>>;

    /// Like `exists`, also leaving a watch on the path.
    async fn exists_w(&self, path: &str) -> Result<(Option<Stat>, WatchReceiver)>;

    /// Delete a node, checking `version` unless it is `ANY_VERSION`.
    async fn delete(&self, path: &str, version: i32) -> Result<()>;

    /// Node payload and metadata.
    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)>;

    /// Like `get`, also leaving a watch on the node.
    async fn get_w(&self, path: &str) -> Result<(Vec<u8>, Stat, WatchReceiver)>;

    /// Replace a node's payload.
    async fn set(&self, path: &str, data: &[u8], version: i32) -> Result<Stat>;

    /// Child names (not full paths) and parent metadata.
    async fn children(&self, path: &str) -> Result<(Vec<String>, Stat)>;

    /// Like `children`, also leaving a child watch on the node.
    async fn children_w(&self, path: &str) -> Result<(Vec<String>, Stat, WatchReceiver)>;

    /// Node ACL list and metadata.
    async fn get_acl(&self, path: &str) -> Result<(Vec<Acl>, Stat)>;

    /// Replace a node's ACL list.
    async fn set_acl(&self, path: &str, acl: &[Acl], version: i32) -> Result<Stat>;

    /// Commit all operations atomically. On success the responses are in
    /// request order.
    async fn multi(&self, ops: Vec<MultiOp>) -> Result<Vec<MultiResponse>>;

    /// Flush the leader channel for `path` and return the synced path.
    async fn sync(&self, path: &str) -> Result<String>;
}

/// A freshly dialed connection and its session notification stream.
pub struct DialedConnection {
    /// The connection.
    pub connection: Arc<dyn Connection>,
    /// Session state notifications for this connection instance.
    pub events: mpsc::Receiver<WatchedEvent>,
}

impl std::fmt::Debug for DialedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialedConnection").finish_non_exhaustive()
    }
}

/// Opens connections to the ensemble.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dial `connection_string`.
    async fn dial(
        &self,
        connection_string: &str,
        session_timeout: Duration,
        can_be_read_only: bool,
    ) -> Result<DialedConnection>;
}

/// Supplies the current ensemble connection string.
///
/// The string may change over the client's lifetime; the connection handle
/// notices the change and redials.
#[async_trait]
pub trait EnsembleProvider: Send + Sync {
    /// Begin any background discovery.
    async fn start(&self) -> Result<()>;

    /// Stop background discovery.
    async fn close(&self) -> Result<()>;

    /// The current connection string.
    fn connection_string(&self) -> String;
}

#[async_trait]
impl<T: EnsembleProvider + ?Sized> EnsembleProvider for Arc<T> {
    async fn start(&self) -> Result<()> {
        (**self).start().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }

    fn connection_string(&self) -> String {
        (**self).connection_string()
    }
}

/// Compresses node payloads. The path is passed for per-path policies.
pub trait CompressionProvider: Send + Sync {
    /// Compress `data` destined for `path`.
    fn compress(&self, path: &str, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress `data` read from `path`.
    fn decompress(&self, path: &str, data: &[u8]) -> Result<Vec<u8>>;
}

impl<T: CompressionProvider + ?Sized> CompressionProvider for Arc<T> {
    fn compress(&self, path: &str, data: &[u8]) -> Result<Vec<u8>> {
        (**self).compress(path, data)
    }

    fn decompress(&self, path: &str, data: &[u8]) -> Result<Vec<u8>> {
        (**self).decompress(path, data)
    }
}

/// Source of ACLs for nodes created without an explicit ACL.
pub trait AclProvider: Send + Sync {
    /// ACL used when `acl_for_path` has no opinion.
    fn default_acl(&self) -> Vec<Acl>;

    /// ACL for a specific path; empty means "use the default".
    fn acl_for_path(&self, path: &str) -> Vec<Acl>;
}

impl<T: AclProvider + ?Sized> AclProvider for Arc<T> {
    fn default_acl(&self) -> Vec<Acl> {
        (**self).default_acl()
    }

    fn acl_for_path(&self, path: &str) -> Vec<Acl> {
        (**self).acl_for_path(path)
    }
}

/// Resolve the ACL for `path`: explicit list, else the provider's per-path
/// list, else its default.
pub fn resolve_acl(provider: &dyn AclProvider, explicit: Option<&[Acl]>, path: &str) -> Vec<Acl> {
    if let Some(acl) = explicit
        && !acl.is_empty()
    {
        return acl.to_vec();
    }
    let for_path = provider.acl_for_path(path);
    if for_path.is_empty() {
        provider.default_acl()
    } else {
        for_path
    }
}
