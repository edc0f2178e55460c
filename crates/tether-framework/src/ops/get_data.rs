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

/// Trace timing for a background read.
pub const GET_DATA_BACKGROUND: &str = "get-data-builder-background";

/// Reads a node's payload.
#[must_use = "builders do nothing until for_path is called"]
pub struct GetDataBuilder {
    scope: OperationScope,
    decompress: bool,
    watching: Watching,
    background: Backgrounding,
}

impl GetDataBuilder {
    pub(crate) fn new(scope: OperationScope) -> Self {
        Self {
            scope,
            decompress: false,
            watching: Watching::default(),
            background: Backgrounding::default(),
        }
    }

    /// Decompress the payload with the framework's compression provider.
    pub fn decompressed(mut self) -> Self {
        self.decompress = true;
        self
    }

    /// The node's payload. In the background this returns an empty payload.
    pub async fn for_path(self, path: &str) -> Result<Vec<u8>> {
        self.for_path_with_stat(path).await.map(|(data, _)| data)
    }

    /// The node's payload and metadata.
    pub async fn for_path_with_stat(self, path: &str) -> Result<(Vec<u8>, Stat)> {
        let framework = self.scope.framework()?;
        validate_path(path)?;
        let namespace = self.scope.namespace().clone();
        let request = GetDataRequest {
            path: namespace.fix(path),
            caller_path: path.to_string(),
            decompress: self.decompress,
            watching: self.watching,
        };

        if self.background.enabled {
            let runner = framework.clone();
            framework.submit(GET_DATA_BACKGROUND, self.background, async move {
                let result = get_data(&runner, &namespace, &request).await;
                let path = namespace.unfix(&request.path);
                let event = FrameworkEvent::new(FrameworkEventType::GetData).with_name(node_from_path(&path)).with_path(path);
                match result {
                    Ok((data, stat)) => event.with_data(data).with_stat(Some(stat)),
                    Err(err) => event.with_error(err),
                }
            });
            return Ok((Vec::new(), Stat::default()));
        }

        get_data(&framework, &namespace, &request).await
    }
}

crate::ops::backgroundable!(GetDataBuilder);
watchable!(GetDataBuilder);

struct GetDataRequest {
    path: String,
    caller_path: String,
    decompress: bool,
    watching: Watching,
}

async fn get_data(
    framework: &Arc<FrameworkInner>,
    namespace: &Arc<Namespace>,
    request: &GetDataRequest,
) -> Result<(Vec<u8>, Stat)> {
    let watched = request.watching.is_set();
    let path = request.path.as_str();
    let (data, stat, watch) = framework
        .call_with_retry(namespace, move |conn, _| async move {
            if watched {
                conn.get_w(path).await.map(|(data, stat, watch)| (data, stat, Some(watch)))
            } else {
                conn.get(path).await.map(|(data, stat)| (data, stat, None))
            }
        })
        .await?;
    if let Some(watch) = watch {
        framework.forward_watch(namespace.clone(), watch, request.watching.clone());
    }

    if request.decompress {
        let data = framework.compression.decompress(&request.caller_path, &data)?;
        return Ok((data, stat));
    }
    Ok((data, stat))
}
