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

/// Trace timing for a background child listing.
pub const CHILDREN_BACKGROUND: &str = "get-children-builder-background";

/// Lists a node's children.
#[must_use = "builders do nothing until for_path is called"]
pub struct GetChildrenBuilder {
    scope: OperationScope,
    watching: Watching,
    background: Backgrounding,
}

impl GetChildrenBuilder {
    pub(crate) fn new(scope: OperationScope) -> Self {
        Self {
            scope,
            watching: Watching::default(),
            background: Backgrounding::default(),
        }
    }

    /// Child names, not full paths. In the background this returns an empty
    /// list.
    pub async fn for_path(self, path: &str) -> Result<Vec<String>> {
        self.for_path_with_stat(path).await.map(|(children, _)| children)
    }

    /// Child names and the parent's metadata.
    pub async fn for_path_with_stat(self, path: &str) -> Result<(Vec<String>, Stat)> {
        let framework = self.scope.framework()?;
        validate_path(path)?;
        let namespace = self.scope.namespace().clone();
        let adjusted = namespace.fix(path);

        if self.background.enabled {
            let runner = framework.clone();
            let watching = self.watching;
            framework.submit(CHILDREN_BACKGROUND, self.background, async move {
                let result = children(&runner, &namespace, &adjusted, watching).await;
                let path = namespace.unfix(&adjusted);
                let event = FrameworkEvent::new(FrameworkEventType::Children).with_name(node_from_path(&path)).with_path(path);
                match result {
                    Ok((children, stat)) => event.with_children(children).with_stat(Some(stat)),
                    Err(err) => event.with_error(err),
                }
            });
            return Ok((Vec::new(), Stat::default()));
        }

        children(&framework, &namespace, &adjusted, self.watching).await
    }
}

crate::ops::backgroundable!(GetChildrenBuilder);
watchable!(GetChildrenBuilder);

async fn children(
    framework: &Arc<FrameworkInner>,
    namespace: &Arc<Namespace>,
    path: &str,
    watching: Watching,
) -> Result<(Vec<String>, Stat)> {
    let watched = watching.is_set();
    let (children, stat, watch) = framework
        .call_with_retry(namespace, move |conn, _| async move {
            if watched {
                conn.children_w(path).await.map(|(children, stat, watch)| (children, stat, Some(watch)))
            } else {
                conn.children(path).await.map(|(children, stat)| (children, stat, None))
            }
        })
        .await?;
    if let Some(watch) = watch {
        framework.forward_watch(namespace.clone(), watch, watching);
    }
    Ok((children, stat))
}
