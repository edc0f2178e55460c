//! Fluent operation builders.
//!
//! Every builder follows the same pipeline: configure, then a terminal
//! `for_path*` call that compresses the payload, rewrites the path into the
//! namespace and either runs the call under the retry loop on the caller's
//! task or submits it to the framework's executor.

use std::any::Any;
use std::sync::Arc;

use tether_client::Watcher;

use crate::event::EventContext;
use crate::listener::BackgroundCallback;

/// Background settings shared by every builder.
#[derive(Clone, Default)]
pub(crate) struct Backgrounding {
    pub enabled: bool,
    pub context: Option<EventContext>,
    pub callback: Option<Arc<dyn BackgroundCallback>>,
}

impl Backgrounding {
    pub fn new(callback: Option<Arc<dyn BackgroundCallback>>, context: Option<EventContext>) -> Self {
        Self {
            enabled: true,
            context,
            callback,
        }
    }
}

pub(crate) fn context(value: impl Any + Send + Sync) -> Option<EventContext> {
    Some(Arc::new(value))
}

/// Where a watch set by a read builder is delivered.
#[derive(Clone, Default)]
pub(crate) enum Watching {
    #[default]
    None,
    /// To the framework's event listeners as a `Watched` event.
    Listeners,
    /// To one watcher, with the namespace stripped from the path.
    Watcher(Arc<dyn Watcher>),
}

impl Watching {
    pub fn is_set(&self) -> bool {
        !matches!(self, Self::None)
    }
}

macro_rules! backgroundable {
    ($builder:ty) => {
        impl $builder {
            /// Run in the background. The outcome goes to the event listeners.
            pub fn in_background(mut self) -> Self {
                self.background = $crate::ops::Backgrounding::new(None, None);
                self
            }

            /// Run in the background, handing `context` back with the outcome.
            pub fn in_background_with_context(mut self, context: impl std::any::Any + Send + Sync) -> Self {
                self.background = $crate::ops::Backgrounding::new(None, $crate::ops::context(context));
                self
            }

            /// Run in the background and deliver the outcome to `callback`.
            pub fn in_background_with_callback(
                mut self,
                callback: impl $crate::listener::BackgroundCallback + 'static,
            ) -> Self {
                self.background = $crate::ops::Backgrounding::new(Some(std::sync::Arc::new(callback)), None);
                self
            }

            /// Run in the background and deliver the outcome and `context` to
            /// `callback`.
            pub fn in_background_with_callback_and_context(
                mut self,
                callback: impl $crate::listener::BackgroundCallback + 'static,
                context: impl std::any::Any + Send + Sync,
            ) -> Self {
                self.background = $crate::ops::Backgrounding::new(
                    Some(std::sync::Arc::new(callback)),
                    $crate::ops::context(context),
                );
                self
            }
        }
    };
}

macro_rules! watchable {
    ($builder:ty) => {
        impl $builder {
            /// Leave a watch. It fires as a `Watched` event to the event
            /// listeners.
            pub fn watched(mut self) -> Self {
                self.watching = $crate::ops::Watching::Listeners;
                self
            }

            /// Leave a watch delivered to `watcher`.
            pub fn using_watcher(mut self, watcher: std::sync::Arc<dyn tether_client::Watcher>) -> Self {
                self.watching = $crate::ops::Watching::Watcher(watcher);
                self
            }
        }
    };
}

mod acl;
mod children;
mod create;
mod delete;
mod exists;
mod get_data;
mod set_data;
mod sync;

pub(crate) use backgroundable;

pub use acl::GET_ACL_BACKGROUND;
pub use acl::GetAclBuilder;
pub use acl::SET_ACL_BACKGROUND;
pub use acl::SetAclBuilder;
pub use children::CHILDREN_BACKGROUND;
pub use children::GetChildrenBuilder;
pub use create::CREATE_BACKGROUND;
pub use create::CreateBuilder;
pub use delete::DELETE_BACKGROUND;
pub use delete::DeleteBuilder;
pub use exists::EXISTS_BACKGROUND;
pub use exists::ExistsBuilder;
pub use get_data::GET_DATA_BACKGROUND;
pub use get_data::GetDataBuilder;
pub use set_data::SET_DATA_BACKGROUND;
pub use set_data::SetDataBuilder;
pub use sync::SYNC_BACKGROUND;
pub use sync::SyncBuilder;
