//! Node path grammar and pure path helpers.
//!
//! Everything here is deterministic and side-effect free, so namespace
//! rewriting and path validation can be property-tested without an ensemble.
//!
//! Grammar: a path starts with `/`, does not end with `/` (except the root
//! itself), has no empty segments, no `.` or `..` segments, and none of the
//! characters in [`is_invalid_char`].

use crate::constants::PATH_SEPARATOR;
use crate::constants::PROTECTED_PREFIX;
use crate::constants::PROTECTED_SEPARATOR;
use crate::error::CoordinationError;
use crate::error::Result;

/// A path split into its parent path and final node name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathAndNode {
    /// Parent path (`/` for top-level nodes).
    pub path: String,
    /// Final node name (empty for the root).
    pub node: String,
}

/// Characters that may never appear in a node path.
#[inline]
pub fn is_invalid_char(c: char) -> bool {
    matches!(c as u32, 0x0000..=0x001f | 0x007f..=0x009f | 0xd800..=0xf8ff | 0xfff0..=0xffff)
}

fn invalid(path: &str, reason: String) -> CoordinationError {
    CoordinationError::InvalidPath {
        path: path.to_string(),
        reason,
    }
}

/// Validate a node path against the grammar.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(invalid(path, "path cannot be empty".to_string()));
    }
    if !path.starts_with(PATH_SEPARATOR) {
        return Err(invalid(path, "path must start with / character".to_string()));
    }
    if path.len() == 1 {
        return Ok(());
    }
    if path.ends_with(PATH_SEPARATOR) {
        return Err(invalid(path, "path must not end with / character".to_string()));
    }

    for (index, segment) in path.split('/').enumerate().skip(1) {
        if segment.is_empty() {
            return Err(invalid(path, format!("empty node name in segment {index}")));
        }
        if segment == "." || segment == ".." {
            return Err(invalid(path, format!("relative paths not allowed in segment {index}")));
        }
        if let Some(c) = segment.chars().find(|c| *c == '\0') {
            return Err(invalid(path, format!("null character {c:?} not allowed in segment {index}")));
        }
        if let Some(c) = segment.chars().find(|c| is_invalid_char(*c)) {
            return Err(invalid(path, format!("invalid character {c:?} in segment {index}")));
        }
    }
    Ok(())
}

/// Validate a namespace. The empty namespace is allowed and means "none".
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Ok(());
    }
    let root = join_path(namespace, &[]);
    if root == PATH_SEPARATOR {
        return Err(CoordinationError::InvalidNamespace {
            namespace: namespace.to_string(),
            reason: "namespace cannot be the root".to_string(),
        });
    }
    validate_path(&root).map_err(|err| CoordinationError::InvalidNamespace {
        namespace: namespace.to_string(),
        reason: err.to_string(),
    })
}

/// Split a path into parent path and node name.
pub fn split_path(path: &str) -> PathAndNode {
    match path.rfind(PATH_SEPARATOR) {
        None => PathAndNode {
            path: path.to_string(),
            node: String::new(),
        },
        Some(0) => PathAndNode {
            path: PATH_SEPARATOR.to_string(),
            node: path[1..].to_string(),
        },
        Some(idx) => PathAndNode {
            path: path[..idx].to_string(),
            node: path[idx + 1..].to_string(),
        },
    }
}

/// Final node name of `path`.
pub fn node_from_path(path: &str) -> &str {
    match path.rfind(PATH_SEPARATOR) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Join a parent and child segments, normalizing leading and trailing
/// separators. Empty or `/` children are skipped.
pub fn join_path(parent: &str, children: &[&str]) -> String {
    let mut path = String::with_capacity(parent.len() + children.iter().map(|c| c.len() + 1).sum::<usize>() + 1);

    if !parent.is_empty() {
        if !parent.starts_with(PATH_SEPARATOR) {
            path.push_str(PATH_SEPARATOR);
        }
        path.push_str(parent.strip_suffix(PATH_SEPARATOR).unwrap_or(parent));
    }

    for child in children {
        if child.is_empty() || *child == PATH_SEPARATOR {
            if path.is_empty() {
                path.push_str(PATH_SEPARATOR);
            }
            continue;
        }
        path.push_str(PATH_SEPARATOR);
        let child = child.strip_prefix(PATH_SEPARATOR).unwrap_or(child);
        path.push_str(child.strip_suffix(PATH_SEPARATOR).unwrap_or(child));
    }

    if path.is_empty() {
        path.push_str(PATH_SEPARATOR);
    }
    path
}

/// Rewrite a caller path into ensemble space.
pub fn fix_for_namespace(namespace: &str, path: &str) -> String {
    if namespace.is_empty() {
        return path.to_string();
    }
    join_path(namespace, &[path])
}

/// Strip the namespace prefix from an ensemble path.
///
/// Paths outside the namespace are returned unchanged; the namespace root
/// itself maps to `/`.
pub fn unfix_for_namespace(namespace: &str, path: &str) -> String {
    if namespace.is_empty() {
        return path.to_string();
    }
    let prefix = join_path(namespace, &[]);
    match path.strip_prefix(prefix.as_str()) {
        Some("") => PATH_SEPARATOR.to_string(),
        Some(rest) if rest.starts_with(PATH_SEPARATOR) => rest.to_string(),
        _ => path.to_string(),
    }
}

/// Node-name prefix carrying a protected-create id: `_c_<id>-`.
pub fn protected_prefix(protected_id: &str) -> String {
    format!("{PROTECTED_PREFIX}{protected_id}{PROTECTED_SEPARATOR}")
}

/// Insert the protected prefix in front of the node name of `path`.
pub fn protected_path(path: &str, protected_id: &str) -> String {
    let split = split_path(path);
    join_path(&split.path, &[&format!("{}{}", protected_prefix(protected_id), split.node)])
}

/// First child whose name carries the protected id, if any.
pub fn find_protected_child<'a>(children: &'a [String], protected_id: &str) -> Option<&'a str> {
    let prefix = protected_prefix(protected_id);
    children.iter().map(String::as_str).find(|child| child.starts_with(&prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_well_formed_paths() {
        for path in ["/", "/a", "/a/b", "/a.b", "/.a", "/a/...", "/é"] {
            assert!(validate_path(path).is_ok(), "{path} should be valid");
        }
    }

    #[test]
    fn validate_rejects_malformed_paths() {
        for path in ["", "a", "/a/", "//", "/a//b", "/.", "/..", "/a/./b", "/a/../b", "/a\0b", "/a\u{1}", "/\u{7f}", "/\u{fff0}"] {
            assert!(
                matches!(validate_path(path), Err(CoordinationError::InvalidPath { .. })),
                "{path:?} should be invalid"
            );
        }
    }

    #[test]
    fn validate_namespace_rules() {
        assert!(validate_namespace("").is_ok());
        assert!(validate_namespace("parent").is_ok());
        assert!(validate_namespace("a/b").is_ok());
        assert!(matches!(validate_namespace("a//b"), Err(CoordinationError::InvalidNamespace { .. })));
        assert!(matches!(validate_namespace("/"), Err(CoordinationError::InvalidNamespace { .. })));
    }

    #[test]
    fn split_path_cases() {
        assert_eq!(split_path("/a/b").path, "/a");
        assert_eq!(split_path("/a/b").node, "b");
        assert_eq!(split_path("/a").path, "/");
        assert_eq!(split_path("/a").node, "a");
        assert_eq!(split_path("a").node, "");
    }

    #[test]
    fn join_path_normalizes_separators() {
        assert_eq!(join_path("", &[]), "/");
        assert_eq!(join_path("parent", &[]), "/parent");
        assert_eq!(join_path("/parent/", &["child"]), "/parent/child");
        assert_eq!(join_path("parent", &["/child/"]), "/parent/child");
        assert_eq!(join_path("", &["child"]), "/child");
        assert_eq!(join_path("/parent", &["/"]), "/parent");
        assert_eq!(join_path("/a", &["b", "c"]), "/a/b/c");
    }

    #[test]
    fn namespace_fix_and_unfix() {
        assert_eq!(fix_for_namespace("parent", "/child"), "/parent/child");
        assert_eq!(fix_for_namespace("", "/child"), "/child");
        assert_eq!(fix_for_namespace("parent", "/"), "/parent");
        assert_eq!(unfix_for_namespace("parent", "/parent/child"), "/child");
        assert_eq!(unfix_for_namespace("parent", "/parent"), "/");
        assert_eq!(unfix_for_namespace("parent", "/parents/x"), "/parents/x");
        assert_eq!(unfix_for_namespace("parent", "/other"), "/other");
    }

    #[test]
    fn node_from_path_returns_basename() {
        assert_eq!(node_from_path("/a/b"), "b");
        assert_eq!(node_from_path("/"), "");
    }

    #[test]
    fn protected_names() {
        assert_eq!(protected_path("/a/node", "id"), "/a/_c_id-node");
        assert_eq!(protected_path("/node", "id"), "/_c_id-node");
        let children = vec!["other".to_string(), "_c_id-node0000000001".to_string()];
        assert_eq!(find_protected_child(&children, "id"), Some("_c_id-node0000000001"));
        assert_eq!(find_protected_child(&children, "nope"), None);
    }
}

#[cfg(all(test, feature = "bolero"))]
mod property_tests {
    use super::*;
    use bolero::check;

    fn to_path(segments: &[String]) -> String {
        join_path("", &segments.iter().map(String::as_str).collect::<Vec<_>>())
    }

    #[test]
    fn prop_namespace_round_trip() {
        check!().with_type::<(String, Vec<String>)>().for_each(|(namespace, segments)| {
            let path = to_path(segments);
            if validate_path(&path).is_err() || validate_namespace(namespace).is_err() || namespace.is_empty() {
                return;
            }
            let fixed = fix_for_namespace(namespace, &path);
            assert_eq!(unfix_for_namespace(namespace, &fixed), path);
        });
    }

    #[test]
    fn prop_split_then_join_is_identity() {
        check!().with_type::<Vec<String>>().for_each(|segments| {
            let path = to_path(segments);
            if path == "/" || validate_path(&path).is_err() {
                return;
            }
            let split = split_path(&path);
            assert_eq!(join_path(&split.path, &[&split.node]), path);
        });
    }

    #[test]
    fn prop_validate_never_panics() {
        check!().with_type::<String>().for_each(|path| {
            let _ = validate_path(path);
        });
    }
}
