//! Connection lifecycle for the Tether coordination client.
//!
//! - `ConnectionState` - owns exactly one live connection, redials on session
//!   expiry, ensemble change or timeout, queues background errors and fans
//!   raw notifications out to parent watchers
//! - `CoordinationClient` - adds the started flag, the retry loop factory and
//!   `block_until_connected_or_timed_out`
//! - [`pure`] - the timeout decision, free of clocks and I/O

mod client;
mod connection_state;
mod handle;
pub mod pure;
mod watcher;

pub use client::BLOCK_UNTIL_CONNECTED_OR_TIMED_OUT;
pub use client::CoordinationClient;
pub use connection_state::BACKGROUND_EXCEPTIONS;
pub use connection_state::CONNECTION_STRING_CHANGED;
pub use connection_state::CONNECTIONS_TIMED_OUT;
pub use connection_state::ConnectionSettings;
pub use connection_state::ConnectionState;
pub use connection_state::DROP_BACKGROUND_ERROR;
pub use connection_state::PARENT_PROCESS;
pub use connection_state::SESSION_EXPIRED;
pub use connection_state::SESSION_TIMED_OUT;
pub use connection_state::STALE_SESSION_EVENT;
pub use watcher::Watcher;
