use tether_core::Result;
use tether_core::Stat;
use tether_core::constants::ANY_VERSION;
use tether_core::paths::node_from_path;
use tether_core::paths::validate_path;

use crate::event::FrameworkEvent;
use crate::event::FrameworkEventType;
use crate::framework::FrameworkInner;
use crate::framework::OperationScope;
use crate::namespace::Namespace;
use crate::ops::Backgrounding;

/// Trace timing for a background write.
pub const SET_DATA_BACKGROUND: &str = "set-data-builder-background";

/// Replaces a node's payload.
#[must_use = "builders do nothing until for_path is called"]
pub struct SetDataBuilder {
    scope: OperationScope,
    version: i32,
    compress: bool,
    background: Backgrounding,
}

impl SetDataBuilder {
    pub(crate) fn new(scope: OperationScope) -> Self {
        Self {
            scope,
            version: ANY_VERSION,
            compress: false,
            background: Backgrounding::default(),
        }
    }

    /// Only write if the node is at `version`.
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Compress the payload with the framework's compression provider.
    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    /// Write the framework's default payload.
    pub async fn for_path(self, path: &str) -> Result<Stat> {
        let data = self.scope.framework()?.default_data.clone();
        self.for_path_with_data(path, data).await
    }

    /// Write `data` and return the node's new metadata. In the background
    /// this returns a default `Stat`.
    pub async fn for_path_with_data(self, path: &str, data: impl Into<Vec<u8>>) -> Result<Stat> {
        let framework = self.scope.framework()?;
        validate_path(path)?;

        let mut data = data.into();
        if self.compress {
            data = framework.compression.compress(path, &data)?;
        }
        let namespace = self.scope.namespace().clone();
        let adjusted = namespace.fix(path);
        let version = self.version;

        if self.background.enabled {
            let runner = framework.clone();
            framework.submit(SET_DATA_BACKGROUND, self.background, async move {
                let result = set_data(&runner, &namespace, &adjusted, &data, version).await;
                let path = namespace.unfix(&adjusted);
                let event = FrameworkEvent::new(FrameworkEventType::SetData)
                    .with_name(node_from_path(&path))
                    .with_path(path)
                    .with_data(data);
                match result {
                    Ok(stat) => event.with_stat(Some(stat)),
                    Err(err) => event.with_error(err),
                }
            });
            return Ok(Stat::default());
        }

        set_data(&framework, &namespace, &adjusted, &data, version).await
    }
}

crate::ops::backgroundable!(SetDataBuilder);

async fn set_data(framework: &FrameworkInner, namespace: &Namespace, path: &str, data: &[u8], version: i32) -> Result<Stat> {
    framework
        .call_with_retry(namespace, move |conn, _| async move { conn.set(path, data, version).await })
        .await
}
