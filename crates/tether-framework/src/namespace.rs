//! Namespace rewriting.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tether_core::AclProvider;
use tether_core::Connection;
use tether_core::Result;
use tether_core::paths::fix_for_namespace;
use tether_core::paths::join_path;
use tether_core::paths::unfix_for_namespace;
use tether_core::paths::validate_namespace;
use tracing::debug;

use crate::tree::make_dirs;

/// A path prefix applied to every operation, plus a flag remembering
/// whether the prefix node is known to exist.
#[derive(Debug)]
pub(crate) struct Namespace {
    namespace: String,
    ensured: AtomicBool,
}

impl Namespace {
    /// An empty namespace disables rewriting.
    pub fn new(namespace: &str) -> Result<Self> {
        validate_namespace(namespace)?;
        let namespace = namespace.trim_matches('/').to_string();
        Ok(Self {
            ensured: AtomicBool::new(namespace.is_empty()),
            namespace,
        })
    }

    pub fn name(&self) -> &str {
        &self.namespace
    }

    /// Caller path to ensemble path.
    pub fn fix(&self, path: &str) -> String {
        fix_for_namespace(&self.namespace, path)
    }

    /// Ensemble path to caller path.
    pub fn unfix(&self, path: &str) -> String {
        unfix_for_namespace(&self.namespace, path)
    }

    /// Create the namespace node on first use.
    pub async fn ensure(&self, conn: &dyn Connection, acl_provider: &dyn AclProvider) -> Result<()> {
        if self.ensured.load(Ordering::Acquire) {
            return Ok(());
        }
        let root = join_path(&self.namespace, &[]);
        make_dirs(conn, &root, true, acl_provider).await?;
        if !self.ensured.swap(true, Ordering::AcqRel) {
            debug!(namespace = %self.namespace, "namespace node ensured");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tether_core::CoordinationError;
    use tether_core::DefaultAclProvider;
    use tether_testing::DeterministicEnsemble;
    use tether_testing::OpKind;

    use super::*;

    #[test]
    fn rewrites_paths() {
        let namespace = Namespace::new("parent").unwrap();
        assert_eq!(namespace.fix("/child"), "/parent/child");
        assert_eq!(namespace.unfix("/parent/child"), "/child");
        assert_eq!(namespace.unfix("/parent"), "/");
        assert_eq!(namespace.unfix("/parental"), "/parental");
    }

    #[test]
    fn empty_namespace_is_identity() {
        let namespace = Namespace::new("").unwrap();
        assert_eq!(namespace.fix("/a/b"), "/a/b");
        assert_eq!(namespace.unfix("/a/b"), "/a/b");
    }

    #[test]
    fn rejects_invalid_namespace() {
        assert!(matches!(Namespace::new("a//b"), Err(CoordinationError::InvalidNamespace { .. })));
    }

    #[tokio::test]
    async fn ensures_namespace_once() {
        let ensemble = DeterministicEnsemble::new();
        let conn = ensemble.connect(1);
        let namespace = Namespace::new("app/v1").unwrap();

        namespace.ensure(conn.as_ref(), &DefaultAclProvider).await.unwrap();
        namespace.ensure(conn.as_ref(), &DefaultAclProvider).await.unwrap();

        assert!(ensemble.contains("/app/v1"));
        assert_eq!(ensemble.operations_of(OpKind::Create).len(), 2);
        assert_eq!(ensemble.operations_of(OpKind::Exists).len(), 2);
    }
}
