use std::sync::Arc;

use tether_core::Acl;
use tether_core::CoordinationError;
use tether_core::CreateMode;
use tether_core::Result;
use tether_core::paths::node_from_path;
use tether_core::paths::protected_path;
use tether_core::paths::validate_path;
use tether_core::resolve_acl;
use tracing::debug;
use uuid::Uuid;

use crate::event::FrameworkEvent;
use crate::event::FrameworkEventType;
use crate::framework::FrameworkInner;
use crate::framework::OperationScope;
use crate::namespace::Namespace;
use crate::ops::Backgrounding;
use crate::tree::find_protected_node;
use crate::tree::make_dirs;

/// Trace timing for a background create.
pub const CREATE_BACKGROUND: &str = "create-builder-background";

/// Creates a node.
///
/// With [`with_protection`](Self::with_protection) the node name carries a
/// random id, so a retry after a lost response finds the node the first
/// attempt created instead of creating a second one.
#[must_use = "builders do nothing until for_path is called"]
pub struct CreateBuilder {
    scope: OperationScope,
    mode: CreateMode,
    acl: Option<Vec<Acl>>,
    create_parents: bool,
    compress: bool,
    protected: bool,
    background: Backgrounding,
}

struct CreateRequest {
    path: String,
    data: Vec<u8>,
    mode: CreateMode,
    acl: Vec<Acl>,
    create_parents: bool,
    protected_id: Option<String>,
}

impl CreateBuilder {
    pub(crate) fn new(scope: OperationScope) -> Self {
        Self {
            scope,
            mode: CreateMode::Persistent,
            acl: None,
            create_parents: false,
            compress: false,
            protected: false,
            background: Backgrounding::default(),
        }
    }

    /// Defaults to `Persistent`.
    pub fn with_mode(mut self, mode: CreateMode) -> Self {
        self.mode = mode;
        self
    }

    /// Use `acl` instead of the ACL provider's choice.
    pub fn with_acl(mut self, acl: impl Into<Vec<Acl>>) -> Self {
        self.acl = Some(acl.into());
        self
    }

    /// Create missing ancestors when the parent does not exist.
    pub fn creating_parents_if_needed(mut self) -> Self {
        self.create_parents = true;
        self
    }

    /// Compress the payload with the framework's compression provider.
    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    /// Prefix the node name with a unique id and look for it before
    /// retrying.
    pub fn with_protection(mut self) -> Self {
        self.protected = true;
        self
    }

    /// Create `path` with the framework's default payload.
    pub async fn for_path(self, path: &str) -> Result<String> {
        let data = self.scope.framework()?.default_data.clone();
        self.for_path_with_data(path, data).await
    }

    /// Create `path` holding `data` and return the created path, relative to
    /// the namespace. In the background this returns an empty string.
    pub async fn for_path_with_data(self, path: &str, data: impl Into<Vec<u8>>) -> Result<String> {
        let Self {
            scope,
            mode,
            acl,
            create_parents,
            compress,
            protected,
            background,
        } = self;
        let framework = scope.framework()?;
        validate_path(path)?;

        let mut data = data.into();
        if compress {
            data = framework.compression.compress(path, &data)?;
        }

        let protected_id = protected.then(|| Uuid::new_v4().to_string());
        let given = match &protected_id {
            Some(id) => protected_path(path, id),
            None => path.to_string(),
        };
        let namespace = scope.namespace().clone();
        let adjusted = namespace.fix(&given);
        let request = CreateRequest {
            acl: resolve_acl(framework.acl_provider.as_ref(), acl.as_deref(), &adjusted),
            path: adjusted,
            data,
            mode,
            create_parents,
            protected_id,
        };

        if background.enabled {
            let runner = framework.clone();
            let caller_path = path.to_string();
            framework.submit(CREATE_BACKGROUND, background, async move {
                let result = create(&runner, &namespace, &request).await;
                let event = FrameworkEvent::new(FrameworkEventType::Create)
                    .with_data(request.data)
                    .with_acl(request.acl);
                match result {
                    Ok(created) => {
                        let created = namespace.unfix(&created);
                        event.with_name(node_from_path(&created)).with_path(created)
                    }
                    Err(err) => event.with_name(node_from_path(&caller_path)).with_path(caller_path).with_error(err),
                }
            });
            return Ok(String::new());
        }

        let created = create(&framework, &namespace, &request).await?;
        Ok(namespace.unfix(&created))
    }
}

crate::ops::backgroundable!(CreateBuilder);

async fn create(framework: &Arc<FrameworkInner>, namespace: &Namespace, request: &CreateRequest) -> Result<String> {
    let acl_provider = framework.acl_provider.as_ref();
    framework
        .call_with_retry(namespace, move |conn, attempt| async move {
            if attempt > 0
                && let Some(id) = request.protected_id.as_deref()
                && let Some(found) = find_protected_node(conn.as_ref(), &request.path, id).await?
            {
                debug!(path = %found, attempt, "found node from an earlier protected create");
                return Ok(found);
            }

            match conn.create(&request.path, &request.data, request.mode, &request.acl).await {
                Err(CoordinationError::NoNode { .. }) if request.create_parents => {
                    make_dirs(conn.as_ref(), &request.path, false, acl_provider).await?;
                    conn.create(&request.path, &request.data, request.mode, &request.acl).await
                }
                other => other,
            }
        })
        .await
}
