use tether_core::Result;
use tether_core::paths::node_from_path;
use tether_core::paths::validate_path;

use crate::event::FrameworkEvent;
use crate::event::FrameworkEventType;
use crate::framework::OperationScope;
use crate::ops::Backgrounding;

/// Trace timing for a background sync.
pub const SYNC_BACKGROUND: &str = "sync-builder-background";

/// Flushes the channel between this client and the leader for a path, so
/// a following read sees every write committed before the sync.
#[must_use = "builders do nothing until for_path is called"]
pub struct SyncBuilder {
    scope: OperationScope,
    background: Backgrounding,
}

impl SyncBuilder {
    pub(crate) fn new(scope: OperationScope) -> Self {
        Self {
            scope,
            background: Backgrounding::default(),
        }
    }

    /// Returns the synced path, relative to the namespace. In the
    /// background this returns an empty string.
    pub async fn for_path(self, path: &str) -> Result<String> {
        let framework = self.scope.framework()?;
        validate_path(path)?;
        let namespace = self.scope.namespace().clone();
        let adjusted = namespace.fix(path);

        if self.background.enabled {
            let runner = framework.clone();
            framework.submit(SYNC_BACKGROUND, self.background, async move {
                let result = runner
                    .call_with_retry(&namespace, |conn, _| {
                        let path = adjusted.as_str();
                        async move { conn.sync(path).await }
                    })
                    .await;
                let event = FrameworkEvent::new(FrameworkEventType::Sync);
                match result {
                    Ok(synced) => {
                        let synced = namespace.unfix(&synced);
                        event.with_name(node_from_path(&synced)).with_path(synced)
                    }
                    Err(err) => {
                        let path = namespace.unfix(&adjusted);
                        event.with_name(node_from_path(&path)).with_path(path).with_error(err)
                    }
                }
            });
            return Ok(String::new());
        }

        let path = adjusted.as_str();
        let synced = framework
            .call_with_retry(&namespace, move |conn, _| async move { conn.sync(path).await })
            .await?;
        Ok(namespace.unfix(&synced))
    }
}

crate::ops::backgroundable!(SyncBuilder);
