use std::sync::Arc;

use tether_core::CoordinationError;
use tether_core::Result;
use tether_core::constants::ANY_VERSION;
use tether_core::constants::GUARANTEED_DELETE_RETRY_DELAY;
use tether_core::paths::node_from_path;
use tether_core::paths::validate_path;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::event::FrameworkEvent;
use crate::event::FrameworkEventType;
use crate::framework::FrameworkInner;
use crate::framework::FrameworkState;
use crate::framework::OperationScope;
use crate::namespace::Namespace;
use crate::ops::Backgrounding;
use crate::tree::delete_children;

/// Trace timing for a background delete.
pub const DELETE_BACKGROUND: &str = "delete-builder-background";

/// Deletes a node.
#[must_use = "builders do nothing until for_path is called"]
pub struct DeleteBuilder {
    scope: OperationScope,
    version: i32,
    delete_children: bool,
    guaranteed: bool,
    quietly: bool,
    background: Backgrounding,
}

struct DeleteRequest {
    path: String,
    version: i32,
    delete_children: bool,
    quietly: bool,
}

impl DeleteBuilder {
    pub(crate) fn new(scope: OperationScope) -> Self {
        Self {
            scope,
            version: ANY_VERSION,
            delete_children: false,
            guaranteed: false,
            quietly: false,
            background: Backgrounding::default(),
        }
    }

    /// Only delete if the node is at `version`.
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Remove the node's descendants first if it is not empty.
    pub fn deleting_children_if_needed(mut self) -> Self {
        self.delete_children = true;
        self
    }

    /// Keep retrying in the background after a connection failure until the
    /// node is gone or the framework closes. The failure is still returned.
    pub fn guaranteed(mut self) -> Self {
        self.guaranteed = true;
        self
    }

    /// Treat a missing node as deleted.
    pub fn quietly(mut self) -> Self {
        self.quietly = true;
        self
    }

    pub async fn for_path(self, path: &str) -> Result<()> {
        let Self {
            scope,
            version,
            delete_children,
            guaranteed,
            quietly,
            background,
        } = self;
        let framework = scope.framework()?;
        validate_path(path)?;

        let namespace = scope.namespace().clone();
        let request = DeleteRequest {
            path: namespace.fix(path),
            version,
            delete_children,
            quietly,
        };

        if background.enabled {
            let runner = framework.clone();
            let caller_path = path.to_string();
            framework.submit(DELETE_BACKGROUND, background, async move {
                let result = delete_guarded(&runner, &namespace, request, guaranteed).await;
                let event = FrameworkEvent::new(FrameworkEventType::Delete)
                    .with_name(node_from_path(&caller_path))
                    .with_path(caller_path);
                match result {
                    Ok(()) => event,
                    Err(err) => event.with_error(err),
                }
            });
            return Ok(());
        }

        delete_guarded(&framework, &namespace, request, guaranteed).await
    }
}

crate::ops::backgroundable!(DeleteBuilder);

async fn delete_guarded(
    framework: &Arc<FrameworkInner>,
    namespace: &Arc<Namespace>,
    request: DeleteRequest,
    guaranteed: bool,
) -> Result<()> {
    match delete(framework, namespace, &request).await {
        Err(err) if guaranteed && err.is_retryable() => {
            warn!(path = %request.path, error = %err, "delete failed, retrying in the background");
            schedule_guaranteed_delete(framework, namespace.clone(), request);
            Err(err)
        }
        other => other,
    }
}

async fn delete(framework: &FrameworkInner, namespace: &Namespace, request: &DeleteRequest) -> Result<()> {
    framework
        .call_with_retry(namespace, move |conn, _| async move {
            match conn.delete(&request.path, request.version).await {
                Err(CoordinationError::NotEmpty { .. }) if request.delete_children => {
                    delete_children(conn.as_ref(), &request.path, true).await
                }
                Err(CoordinationError::NoNode { .. }) if request.quietly => Ok(()),
                other => other,
            }
        })
        .await
}

fn schedule_guaranteed_delete(framework: &Arc<FrameworkInner>, namespace: Arc<Namespace>, request: DeleteRequest) {
    let weak = Arc::downgrade(framework);
    framework.spawn(async move {
        let mut attempts: u64 = 0;
        loop {
            tokio::time::sleep(GUARANTEED_DELETE_RETRY_DELAY).await;
            let Some(framework) = weak.upgrade() else {
                return;
            };
            if framework.state() != FrameworkState::Started {
                debug!(path = %request.path, "framework stopped, abandoning guaranteed delete");
                return;
            }
            if !framework.state_manager.is_connected()
                && framework
                    .state_manager
                    .block_until_connected(Some(framework.client.connection_timeout()))
                    .await
                    .is_err()
            {
                continue;
            }

            attempts += 1;
            match delete(&framework, &namespace, &request).await {
                Ok(()) | Err(CoordinationError::NoNode { .. }) => {
                    info!(path = %request.path, attempts, "guaranteed delete completed");
                    return;
                }
                Err(err) if err.is_retryable() => {
                    debug!(path = %request.path, attempts, error = %err, "guaranteed delete still failing");
                }
                Err(err) => {
                    framework.report_unhandled(&err);
                    return;
                }
            }
        }
    });
}
