use tether_core::Acl;
use tether_core::Result;
use tether_core::Stat;
use tether_core::constants::ANY_VERSION;
use tether_core::paths::node_from_path;
use tether_core::paths::validate_path;
use tether_core::resolve_acl;

use crate::event::FrameworkEvent;
use crate::event::FrameworkEventType;
use crate::framework::OperationScope;
use crate::ops::Backgrounding;

/// Trace timing for a background ACL read.
pub const GET_ACL_BACKGROUND: &str = "get-acl-builder-background";
/// Trace timing for a background ACL write.
pub const SET_ACL_BACKGROUND: &str = "set-acl-builder-background";

/// Reads a node's ACL.
#[must_use = "builders do nothing until for_path is called"]
pub struct GetAclBuilder {
    scope: OperationScope,
    background: Backgrounding,
}

impl GetAclBuilder {
    pub(crate) fn new(scope: OperationScope) -> Self {
        Self {
            scope,
            background: Backgrounding::default(),
        }
    }

    /// The node's ACL and metadata. In the background this returns an empty
    /// ACL.
    pub async fn for_path(self, path: &str) -> Result<(Vec<Acl>, Stat)> {
        let framework = self.scope.framework()?;
        validate_path(path)?;
        let namespace = self.scope.namespace().clone();
        let adjusted = namespace.fix(path);

        if self.background.enabled {
            let runner = framework.clone();
            framework.submit(GET_ACL_BACKGROUND, self.background, async move {
                let result = runner
                    .call_with_retry(&namespace, |conn, _| {
                        let path = adjusted.as_str();
                        async move { conn.get_acl(path).await }
                    })
                    .await;
                let path = namespace.unfix(&adjusted);
                let event = FrameworkEvent::new(FrameworkEventType::GetAcl).with_name(node_from_path(&path)).with_path(path);
                match result {
                    Ok((acl, stat)) => event.with_acl(acl).with_stat(Some(stat)),
                    Err(err) => event.with_error(err),
                }
            });
            return Ok((Vec::new(), Stat::default()));
        }

        let path = adjusted.as_str();
        framework
            .call_with_retry(&namespace, move |conn, _| async move { conn.get_acl(path).await })
            .await
    }
}

crate::ops::backgroundable!(GetAclBuilder);

/// Replaces a node's ACL.
#[must_use = "builders do nothing until for_path is called"]
pub struct SetAclBuilder {
    scope: OperationScope,
    acl: Option<Vec<Acl>>,
    version: i32,
    background: Backgrounding,
}

impl SetAclBuilder {
    pub(crate) fn new(scope: OperationScope) -> Self {
        Self {
            scope,
            acl: None,
            version: ANY_VERSION,
            background: Backgrounding::default(),
        }
    }

    /// The new ACL. Without one the ACL provider's choice is applied.
    pub fn with_acl(mut self, acl: impl Into<Vec<Acl>>) -> Self {
        self.acl = Some(acl.into());
        self
    }

    /// Only write if the node's ACL is at `version`.
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Apply the ACL and return the node's new metadata. In the background
    /// this returns a default `Stat`.
    pub async fn for_path(self, path: &str) -> Result<Stat> {
        let framework = self.scope.framework()?;
        validate_path(path)?;
        let namespace = self.scope.namespace().clone();
        let adjusted = namespace.fix(path);
        let acl = resolve_acl(framework.acl_provider.as_ref(), self.acl.as_deref(), &adjusted);
        let version = self.version;

        if self.background.enabled {
            let runner = framework.clone();
            framework.submit(SET_ACL_BACKGROUND, self.background, async move {
                let result = runner
                    .call_with_retry(&namespace, |conn, _| {
                        let (path, acl) = (adjusted.as_str(), acl.as_slice());
                        async move { conn.set_acl(path, acl, version).await }
                    })
                    .await;
                let path = namespace.unfix(&adjusted);
                let event = FrameworkEvent::new(FrameworkEventType::SetAcl)
                    .with_name(node_from_path(&path))
                    .with_path(path)
                    .with_acl(acl);
                match result {
                    Ok(stat) => event.with_stat(Some(stat)),
                    Err(err) => event.with_error(err),
                }
            });
            return Ok(Stat::default());
        }

        let (path, acl) = (adjusted.as_str(), acl.as_slice());
        framework
            .call_with_retry(&namespace, move |conn, _| async move { conn.set_acl(path, acl, version).await })
            .await
    }
}

crate::ops::backgroundable!(SetAclBuilder);
