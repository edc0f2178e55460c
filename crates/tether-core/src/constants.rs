//! Framework-wide constants.
//!
//! Tiger Style: every queue and retry count is bounded by a constant here.

use std::time::Duration;

/// Path separator for node paths.
pub const PATH_SEPARATOR: &str = "/";

/// Version sentinel meaning "any version" (no version check).
pub const ANY_VERSION: i32 = -1;

/// Default session timeout.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default connection timeout.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum number of queued background errors on a connection handle.
///
/// Tiger Style: the oldest error is dropped when the queue is full.
pub const MAX_BACKGROUND_ERRORS: usize = 10;

/// Default capacity of the connection state delivery queue.
pub const STATE_QUEUE_SIZE: usize = 25;

/// Hard ceiling on exponential backoff retries; `1 << 29` still fits the
/// random range without overflow.
pub const MAX_RETRIES_LIMIT: u32 = 29;

/// Default base sleep for the default exponential backoff policy.
pub const DEFAULT_BASE_SLEEP: Duration = Duration::from_secs(1);

/// Default retry count for the default exponential backoff policy.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default sleep ceiling for the default exponential backoff policy.
pub const DEFAULT_MAX_SLEEP: Duration = Duration::from_secs(15);

/// Prefix injected into protected node names.
pub const PROTECTED_PREFIX: &str = "_c_";

/// Separator between the protected id and the caller's node name.
pub const PROTECTED_SEPARATOR: &str = "-";

/// Maximum depth walked when recursively deleting children.
///
/// Tiger Style: bounds recursion on pathological trees.
pub const MAX_DELETE_DEPTH: u32 = 1024;

/// Pause between guaranteed-delete attempts when no connection is available.
pub const GUARANTEED_DELETE_RETRY_DELAY: Duration = Duration::from_secs(1);
