//! Multi-node helpers: ancestor creation, subtree removal and protected
//! node lookup.

use futures::FutureExt;
use futures::future::BoxFuture;
use tether_core::AclProvider;
use tether_core::Connection;
use tether_core::CoordinationError;
use tether_core::CreateMode;
use tether_core::Result;
use tether_core::constants::ANY_VERSION;
use tether_core::constants::MAX_DELETE_DEPTH;
use tether_core::constants::PATH_SEPARATOR;
use tether_core::paths::find_protected_child;
use tether_core::paths::join_path;
use tether_core::paths::split_path;
use tether_core::paths::validate_path;
use tether_core::resolve_acl;
use tracing::debug;

/// Create every missing ancestor of `path`, and `path` itself when
/// `make_last_node` is set.
///
/// Each node gets the provider's ACL for its own path. A node created
/// concurrently by someone else is not an error.
pub async fn make_dirs(
    conn: &dyn Connection,
    path: &str,
    make_last_node: bool,
    acl_provider: &dyn AclProvider,
) -> Result<()> {
    validate_path(path)?;

    let mut sub_path = String::with_capacity(path.len());
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).filter(|s| !s.is_empty()).collect();
    let last = segments.len();
    for (idx, segment) in segments.into_iter().enumerate() {
        if idx + 1 == last && !make_last_node {
            break;
        }
        sub_path.push_str(PATH_SEPARATOR);
        sub_path.push_str(segment);

        if conn.exists(&sub_path).await?.is_some() {
            continue;
        }
        let acl = resolve_acl(acl_provider, None, &sub_path);
        match conn.create(&sub_path, &[], CreateMode::Persistent, &acl).await {
            Ok(_) => debug!(path = %sub_path, "created parent node"),
            Err(CoordinationError::NodeExists { .. }) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Remove every descendant of `path`, then `path` itself when
/// `delete_self` is set. A node that vanishes mid-walk is skipped.
pub async fn delete_children(conn: &dyn Connection, path: &str, delete_self: bool) -> Result<()> {
    validate_path(path)?;
    delete_tree(conn, path.to_string(), delete_self, 0).await
}

fn delete_tree(conn: &dyn Connection, path: String, delete_self: bool, depth: u32) -> BoxFuture<'_, Result<()>> {
    async move {
        if depth > MAX_DELETE_DEPTH {
            return Err(CoordinationError::Api {
                reason: format!("tree under {path} is deeper than {MAX_DELETE_DEPTH}"),
            });
        }

        let children = match conn.children(&path).await {
            Ok((children, _)) => children,
            Err(CoordinationError::NoNode { .. }) => return Ok(()),
            Err(err) => return Err(err),
        };
        for child in children {
            delete_tree(conn, join_path(&path, &[&child]), true, depth + 1).await?;
        }

        if delete_self {
            match conn.delete(&path, ANY_VERSION).await {
                Ok(()) | Err(CoordinationError::NoNode { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
    .boxed()
}

/// Full path of the child of `path`'s parent that carries `protected_id`,
/// if one exists. A missing parent means nothing was created.
pub async fn find_protected_node(conn: &dyn Connection, path: &str, protected_id: &str) -> Result<Option<String>> {
    let parent = split_path(path).path;
    let children = match conn.children(&parent).await {
        Ok((children, _)) => children,
        Err(CoordinationError::NoNode { .. }) => return Ok(None),
        Err(err) => return Err(err),
    };
    Ok(find_protected_child(&children, protected_id).map(|child| join_path(&parent, &[child])))
}

#[cfg(test)]
mod tests {
    use tether_core::Acl;
    use tether_core::DefaultAclProvider;
    use tether_core::paths::protected_prefix;
    use tether_testing::DeterministicEnsemble;
    use tether_testing::OpKind;
    use tether_testing::RecordedOp;

    use super::*;

    #[tokio::test]
    async fn make_dirs_creates_missing_ancestors_only() {
        let ensemble = DeterministicEnsemble::new();
        ensemble.seed("/a", b"").unwrap();
        let conn = ensemble.connect(1);

        make_dirs(conn.as_ref(), "/a/b/c/d", false, &DefaultAclProvider).await.unwrap();

        let created: Vec<_> = ensemble
            .operations_of(OpKind::Create)
            .into_iter()
            .map(|op| match op {
                RecordedOp::Create { path, acl, .. } => {
                    assert_eq!(acl, Acl::open_unsafe());
                    path
                }
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(created, vec!["/a/b".to_string(), "/a/b/c".to_string()]);
        assert!(!ensemble.contains("/a/b/c/d"));
    }

    #[tokio::test]
    async fn make_dirs_with_last_node() {
        let ensemble = DeterministicEnsemble::new();
        let conn = ensemble.connect(1);

        make_dirs(conn.as_ref(), "/ns", true, &DefaultAclProvider).await.unwrap();
        assert!(ensemble.contains("/ns"));
    }

    #[tokio::test]
    async fn make_dirs_tolerates_concurrent_create() {
        let ensemble = DeterministicEnsemble::new();
        let conn = ensemble.connect(1);
        ensemble.fail_next_after_apply(OpKind::Create, CoordinationError::NodeExists { path: "/a".to_string() });

        make_dirs(conn.as_ref(), "/a/b", true, &DefaultAclProvider).await.unwrap();
        assert!(ensemble.contains("/a/b"));
    }

    #[tokio::test]
    async fn delete_children_removes_subtree() {
        let ensemble = DeterministicEnsemble::new();
        for path in ["/root", "/root/a", "/root/a/x", "/root/b"] {
            ensemble.seed(path, b"").unwrap();
        }
        let conn = ensemble.connect(1);

        delete_children(conn.as_ref(), "/root", false).await.unwrap();
        assert!(ensemble.contains("/root"));
        assert!(ensemble.children("/root").is_empty());

        delete_children(conn.as_ref(), "/root", true).await.unwrap();
        assert!(!ensemble.contains("/root"));
    }

    #[tokio::test]
    async fn delete_children_of_missing_node_is_ok() {
        let ensemble = DeterministicEnsemble::new();
        let conn = ensemble.connect(1);
        delete_children(conn.as_ref(), "/missing", true).await.unwrap();
    }

    #[tokio::test]
    async fn finds_protected_node() {
        let ensemble = DeterministicEnsemble::new();
        ensemble.seed("/locks", b"").unwrap();
        let name = format!("{}lock", protected_prefix("abc"));
        ensemble.seed(&join_path("/locks", &[&name]), b"").unwrap();
        let conn = ensemble.connect(1);

        let found = find_protected_node(conn.as_ref(), "/locks/anything", "abc").await.unwrap();
        assert_eq!(found, Some(format!("/locks/{name}")));
        assert_eq!(find_protected_node(conn.as_ref(), "/locks/x", "other").await.unwrap(), None);
        assert_eq!(find_protected_node(conn.as_ref(), "/nope/x", "abc").await.unwrap(), None);
    }
}
