use std::sync::Arc;

use tether_core::Result;
use tether_core::Stat;
use tether_core::paths::node_from_path;
use tether_core::paths::validate_path;

use crate::event::FrameworkEvent;
use crate::event::FrameworkEventType;
use crate::framework::FrameworkInner;
use crate::framework::OperationScope;
use crate::namespace::Namespace;
use crate::ops::Backgrounding;
use crate::ops::Watching;

/// Trace timing for a background exists check.
pub const EXISTS_BACKGROUND: &str = "exists-builder-background";

/// Checks whether a node exists.
#[must_use = "builders do nothing until for_path is called"]
pub struct ExistsBuilder {
    scope: OperationScope,
    watching: Watching,
    background: Backgrounding,
}

impl ExistsBuilder {
    pub(crate) fn new(scope: OperationScope) -> Self {
        Self {
            scope,
            watching: Watching::default(),
            background: Backgrounding::default(),
        }
    }

    /// The node's metadata, or `None` if it does not exist. In the
    /// background this returns `None`.
    pub async fn for_path(self, path: &str) -> Result<Option<Stat>> {
        let framework = self.scope.framework()?;
        validate_path(path)?;
        let namespace = self.scope.namespace().clone();
        let adjusted = namespace.fix(path);

        if self.background.enabled {
            let runner = framework.clone();
            let watching = self.watching;
            framework.submit(EXISTS_BACKGROUND, self.background, async move {
                let result = exists(&runner, &namespace, &adjusted, watching).await;
                let path = namespace.unfix(&adjusted);
                let event = FrameworkEvent::new(FrameworkEventType::Exists).with_name(node_from_path(&path)).with_path(path);
                match result {
                    Ok(stat) => event.with_stat(stat),
                    Err(err) => event.with_error(err),
                }
            });
            return Ok(None);
        }

        exists(&framework, &namespace, &adjusted, self.watching).await
    }
}

crate::ops::backgroundable!(ExistsBuilder);
watchable!(ExistsBuilder);

async fn exists(
    framework: &Arc<FrameworkInner>,
    namespace: &Arc<Namespace>,
    path: &str,
    watching: Watching,
) -> Result<Option<Stat>> {
    let watched = watching.is_set();
    let (stat, watch) = framework
        .call_with_retry(namespace, move |conn, _| async move {
            if watched {
                conn.exists_w(path).await.map(|(stat, watch)| (stat, Some(watch)))
            } else {
                conn.exists(path).await.map(|stat| (stat, None))
            }
        })
        .await?;
    if let Some(watch) = watch {
        framework.forward_watch(namespace.clone(), watch, watching);
    }
    Ok(stat)
}
