//! ACL providers.

use crate::traits::AclProvider;
use crate::types::Acl;

/// Grants every permission to everyone, for every path.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAclProvider;

impl AclProvider for DefaultAclProvider {
    fn default_acl(&self) -> Vec<Acl> {
        Acl::open_unsafe()
    }

    fn acl_for_path(&self, _path: &str) -> Vec<Acl> {
        Acl::open_unsafe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::resolve_acl;
    use crate::types::Perms;

    struct ReadOnlyUnder(&'static str);

    impl AclProvider for ReadOnlyUnder {
        fn default_acl(&self) -> Vec<Acl> {
            Acl::open_unsafe()
        }

        fn acl_for_path(&self, path: &str) -> Vec<Acl> {
            if path.starts_with(self.0) { Acl::world(Perms::READ) } else { Vec::new() }
        }
    }

    #[test]
    fn explicit_acl_wins() {
        let explicit = Acl::auth(Perms::ALL);
        assert_eq!(resolve_acl(&DefaultAclProvider, Some(&explicit), "/a"), explicit);
    }

    #[test]
    fn empty_path_acl_falls_back_to_default() {
        let provider = ReadOnlyUnder("/ro");
        assert_eq!(resolve_acl(&provider, None, "/ro/x"), Acl::world(Perms::READ));
        assert_eq!(resolve_acl(&provider, None, "/rw/x"), Acl::open_unsafe());
        assert_eq!(resolve_acl(&provider, Some(&[]), "/rw/x"), Acl::open_unsafe());
    }
}
