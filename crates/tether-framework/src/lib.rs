//! Fluent coordination framework on top of `tether-client`.
//!
//! - [`Framework`] - owns the client, the connection state manager and the
//!   listener registries; hands out operation builders
//! - [`NamespaceFacade`] - the same framework with another path prefix
//! - [`ConnectionStateManager`] - turns session events into de-duplicated
//!   [`ConnectionState`] changes for listeners
//! - operation builders - create, delete, exists, get/set data, children,
//!   ACLs and sync, each runnable in the foreground or background
//! - [`Transaction`] - atomic multi-operations
//! - [`tree`] - recursive helpers shared by the builders and recipes
//!
//! ```ignore
//! let config = FrameworkConfig::from_toml_str(&text)?;
//! let framework = FrameworkBuilder::from_config(&config)?.dialer(dialer).build()?;
//! framework.start().await?;
//! framework.block_until_connected(Some(Duration::from_secs(5))).await?;
//! framework.create().creating_parents_if_needed().for_path_with_data("/app/config", b"v1".to_vec()).await?;
//! ```

mod builder;
mod config;
mod event;
mod framework;
mod listener;
mod namespace;
mod ops;
mod state;
mod transaction;
pub mod tree;

pub use builder::FrameworkBuilder;
pub use config::AuthConfig;
pub use config::FrameworkConfig;
pub use event::EventContext;
pub use event::FrameworkEvent;
pub use event::FrameworkEventType;
pub use framework::Framework;
pub use framework::FrameworkOps;
pub use framework::FrameworkState;
pub use framework::NamespaceFacade;
pub use framework::OperationScope;
pub use listener::BackgroundCallback;
pub use listener::ConnectionStateListener;
pub use listener::EventListener;
pub use listener::UnhandledErrorListener;
pub use ops::CHILDREN_BACKGROUND;
pub use ops::CREATE_BACKGROUND;
pub use ops::CreateBuilder;
pub use ops::DELETE_BACKGROUND;
pub use ops::DeleteBuilder;
pub use ops::EXISTS_BACKGROUND;
pub use ops::ExistsBuilder;
pub use ops::GET_ACL_BACKGROUND;
pub use ops::GET_DATA_BACKGROUND;
pub use ops::GetAclBuilder;
pub use ops::GetChildrenBuilder;
pub use ops::GetDataBuilder;
pub use ops::SET_ACL_BACKGROUND;
pub use ops::SET_DATA_BACKGROUND;
pub use ops::SYNC_BACKGROUND;
pub use ops::SetAclBuilder;
pub use ops::SetDataBuilder;
pub use ops::SyncBuilder;
pub use state::ConnectionState;
pub use state::ConnectionStateManager;
pub use state::DROP_STATE_CHANGE;
pub use transaction::OperationType;
pub use transaction::TRANSACTION_BACKGROUND;
pub use transaction::Transaction;
pub use transaction::TransactionCheckBuilder;
pub use transaction::TransactionCreateBuilder;
pub use transaction::TransactionDeleteBuilder;
pub use transaction::TransactionResult;
pub use transaction::TransactionSetDataBuilder;
