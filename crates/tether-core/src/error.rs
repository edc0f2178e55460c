//! Error taxonomy shared by every Tether crate.
//!
//! The same enum is returned by the transport collaborator and by the
//! framework itself so protocol errors reach callers verbatim. Variants fall
//! into five classes:
//!
//! - connectivity: retried by the retry loop, surfaced once the policy gives up
//! - protocol: returned verbatim (or used to drive create-parents,
//!   delete-children and protected-create)
//! - usage: programmer errors, reported immediately and never retried
//! - collaborator: compression and configuration failures
//! - waits: `Timeout`, distinct from connection loss

use snafu::Snafu;

/// Errors from coordination operations.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordinationError {
    /// The connection to the ensemble was lost or could not be confirmed.
    #[snafu(display("connection loss"))]
    ConnectionLoss,

    /// The server did not answer an operation in time.
    #[snafu(display("operation timed out"))]
    OperationTimeout,

    /// The session expired; ephemeral state is gone.
    #[snafu(display("session expired"))]
    SessionExpired,

    /// The session was moved to another server.
    #[snafu(display("session moved"))]
    SessionMoved,

    /// Dialing the ensemble failed.
    #[snafu(display("unable to connect to '{connection_string}': {reason}"))]
    Dial {
        /// Connection string that was dialed.
        connection_string: String,
        /// Transport-supplied reason.
        reason: String,
    },

    /// Node does not exist.
    #[snafu(display("node '{path}' does not exist"))]
    NoNode {
        /// Path of the missing node.
        path: String,
    },

    /// Node already exists.
    #[snafu(display("node '{path}' already exists"))]
    NodeExists {
        /// Path of the existing node.
        path: String,
    },

    /// Version check failed.
    #[snafu(display("bad version for node '{path}'"))]
    BadVersion {
        /// Path of the node.
        path: String,
    },

    /// Node has children and cannot be deleted.
    #[snafu(display("node '{path}' is not empty"))]
    NotEmpty {
        /// Path of the node.
        path: String,
    },

    /// Caller is not authorized for the node.
    #[snafu(display("not authorized for node '{path}'"))]
    NoAuth {
        /// Path of the node.
        path: String,
    },

    /// ACL list was rejected by the server.
    #[snafu(display("invalid ACL for node '{path}'"))]
    InvalidAcl {
        /// Path of the node.
        path: String,
    },

    /// Ephemeral nodes cannot have children.
    #[snafu(display("ephemeral node '{path}' cannot have children"))]
    NoChildrenForEphemerals {
        /// Path of the parent node.
        path: String,
    },

    /// Any other server-side API error.
    #[snafu(display("api error: {reason}"))]
    Api {
        /// Server-supplied reason.
        reason: String,
    },

    /// A node path failed validation.
    #[snafu(display("invalid path '{path}': {reason}"))]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A namespace failed validation.
    #[snafu(display("invalid namespace '{namespace}': {reason}"))]
    InvalidNamespace {
        /// The rejected namespace.
        namespace: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A mutator was called before `start()`.
    #[snafu(display("client is not started"))]
    NotStarted,

    /// `start()` was called more than once.
    #[snafu(display("cannot be started more than once"))]
    AlreadyStarted,

    /// The operation is not available on this handle.
    #[snafu(display("the requested operation is not supported: {operation}"))]
    Unsupported {
        /// Name of the operation.
        operation: String,
    },

    /// The framework was closed.
    #[snafu(display("framework is closed"))]
    Closed,

    /// No dialer was configured.
    #[snafu(display("no dialer configured"))]
    MissingDialer,

    /// Configuration could not be parsed or is inconsistent.
    #[snafu(display("invalid configuration: {reason}"))]
    Config {
        /// What is wrong with it.
        reason: String,
    },

    /// The compression provider failed.
    #[snafu(display("compression failed for '{path}': {reason}"))]
    Compression {
        /// Path whose payload was being (de)compressed.
        path: String,
        /// Provider-supplied reason.
        reason: String,
    },

    /// A blocking wait gave up.
    #[snafu(display("timed out waiting for {operation}"))]
    Timeout {
        /// What was being waited for.
        operation: String,
    },
}

impl CoordinationError {
    /// Returns true for the connectivity class: the operation may succeed if
    /// it is attempted again on a (possibly new) connection. A failed dial
    /// belongs here too, the next attempt dials again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinationError::ConnectionLoss
                | CoordinationError::OperationTimeout
                | CoordinationError::SessionExpired
                | CoordinationError::SessionMoved
                | CoordinationError::Dial { .. }
        )
    }

    /// Returns true for errors caused by misuse of the API.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            CoordinationError::InvalidPath { .. }
                | CoordinationError::InvalidNamespace { .. }
                | CoordinationError::NotStarted
                | CoordinationError::AlreadyStarted
                | CoordinationError::Unsupported { .. }
                | CoordinationError::MissingDialer
        )
    }
}

/// Result alias used across the workspace.
pub type Result<T, E = CoordinationError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors_are_retryable() {
        assert!(CoordinationError::ConnectionLoss.is_retryable());
        assert!(CoordinationError::OperationTimeout.is_retryable());
        assert!(CoordinationError::SessionExpired.is_retryable());
        assert!(CoordinationError::SessionMoved.is_retryable());
        assert!(
            CoordinationError::Dial {
                connection_string: "zk1:2181".to_string(),
                reason: "refused".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn protocol_errors_are_not_retryable() {
        let path = "/a".to_string();
        assert!(!CoordinationError::NoNode { path: path.clone() }.is_retryable());
        assert!(!CoordinationError::NodeExists { path: path.clone() }.is_retryable());
        assert!(!CoordinationError::BadVersion { path: path.clone() }.is_retryable());
        assert!(!CoordinationError::NotEmpty { path }.is_retryable());
    }

    #[test]
    fn timeout_is_distinct_from_connection_loss() {
        let err = CoordinationError::Timeout {
            operation: "connection".to_string(),
        };
        assert!(!err.is_retryable());
        assert_ne!(err, CoordinationError::ConnectionLoss);
        assert_eq!(err.to_string(), "timed out waiting for connection");
    }

    #[test]
    fn display_includes_path() {
        let err = CoordinationError::NoNode {
            path: "/parent".to_string(),
        };
        assert_eq!(err.to_string(), "node '/parent' does not exist");
    }

    #[test]
    fn usage_errors() {
        assert!(CoordinationError::NotStarted.is_usage_error());
        assert!(
            CoordinationError::InvalidPath {
                path: "x".to_string(),
                reason: "r".to_string()
            }
            .is_usage_error()
        );
        assert!(!CoordinationError::ConnectionLoss.is_usage_error());
    }
}
