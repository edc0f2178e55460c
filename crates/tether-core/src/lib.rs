//! Core types and collaborator interfaces for the Tether coordination client.
//!
//! This crate has no runtime behavior of its own. It defines:
//!
//! - `CoordinationError` - the error taxonomy shared by every crate
//! - value types (`Stat`, `Acl`, `CreateMode`, `WatchedEvent`, `MultiOp`)
//! - the transport seam (`Connection`, `Dialer`) and the ensemble, compression
//!   and ACL collaborators
//! - the node path grammar and namespace rewriting helpers in [`paths`]
//! - `ListenerContainer`, `TracerDriver` and `Executor`
//!
//! The default collaborators (`FixedEnsembleProvider`,
//! `GzipCompressionProvider`, `DefaultAclProvider`, `TokioExecutor`,
//! `DefaultTracerDriver`) live here as well.

mod acl;
mod compression;
pub mod constants;
mod ensemble;
mod error;
mod event;
mod executor;
mod listener;
mod multi;
pub mod paths;
mod trace;
mod traits;
mod types;

pub use acl::DefaultAclProvider;
pub use compression::GzipCompressionProvider;
pub use ensemble::FixedEnsembleProvider;
pub use error::CoordinationError;
pub use error::Result;
pub use event::EventType;
pub use event::SessionState;
pub use event::WatchedEvent;
pub use executor::Executor;
pub use executor::TokioExecutor;
pub use listener::ListenerContainer;
pub use multi::MultiOp;
pub use multi::MultiResponse;
pub use trace::DefaultTracerDriver;
pub use trace::TimeTrace;
pub use trace::TracerDriver;
pub use traits::AclProvider;
pub use traits::CompressionProvider;
pub use traits::Connection;
pub use traits::DialedConnection;
pub use traits::Dialer;
pub use traits::EnsembleProvider;
pub use traits::WatchReceiver;
pub use traits::resolve_acl;
pub use types::Acl;
pub use types::AuthInfo;
pub use types::CreateMode;
pub use types::Perms;
pub use types::Stat;
