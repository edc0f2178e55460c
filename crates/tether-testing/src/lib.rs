//! Deterministic collaborators for testing Tether without a real ensemble.
//!
//! - `DeterministicEnsemble` - in-memory node tree with an operation log,
//!   watches and fault injection
//! - `DeterministicDialer` - opens sessions against an ensemble and lets tests
//!   inject session events and dial failures
//! - `MutableEnsembleProvider`, `RecordingSleeper`,
//!   `RecordingCompressionProvider`, `DeferredExecutor`

mod dialer;
mod ensemble;
mod providers;

pub use dialer::DeterministicDialer;
pub use dialer::DialRecord;
pub use ensemble::DeterministicConnection;
pub use ensemble::DeterministicEnsemble;
pub use ensemble::OpKind;
pub use ensemble::RecordedOp;
pub use providers::DeferredExecutor;
pub use providers::MutableEnsembleProvider;
pub use providers::RecordingCompressionProvider;
pub use providers::RecordingSleeper;
