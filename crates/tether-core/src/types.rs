//! Value types passed through the framework unmodified.

use serde::Deserialize;
use serde::Serialize;

/// Flag bit for ephemeral nodes.
pub const FLAG_EPHEMERAL: i32 = 1;

/// Flag bit for sequential nodes.
pub const FLAG_SEQUENCE: i32 = 2;

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CreateMode {
    /// Survives the session that created it.
    #[default]
    Persistent,
    /// Persistent, with a server-assigned monotonic suffix.
    PersistentSequential,
    /// Deleted when the creating session ends.
    Ephemeral,
    /// Ephemeral, with a server-assigned monotonic suffix.
    EphemeralSequential,
}

impl CreateMode {
    /// Wire flags for this mode.
    pub fn flags(self) -> i32 {
        match self {
            CreateMode::Persistent => 0,
            CreateMode::PersistentSequential => FLAG_SEQUENCE,
            CreateMode::Ephemeral => FLAG_EPHEMERAL,
            CreateMode::EphemeralSequential => FLAG_EPHEMERAL | FLAG_SEQUENCE,
        }
    }

    /// Mode for the given wire flags, if valid.
    pub fn from_flags(flags: i32) -> Option<Self> {
        match flags {
            0 => Some(CreateMode::Persistent),
            FLAG_SEQUENCE => Some(CreateMode::PersistentSequential),
            FLAG_EPHEMERAL => Some(CreateMode::Ephemeral),
            f if f == FLAG_EPHEMERAL | FLAG_SEQUENCE => Some(CreateMode::EphemeralSequential),
            _ => None,
        }
    }

    /// Returns true if the server appends a sequence suffix.
    pub fn is_sequential(self) -> bool {
        self.flags() & FLAG_SEQUENCE == FLAG_SEQUENCE
    }

    /// Returns true if the node is tied to the session lifetime.
    pub fn is_ephemeral(self) -> bool {
        self.flags() & FLAG_EPHEMERAL == FLAG_EPHEMERAL
    }
}

/// Permission bit set of an ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Perms(pub u32);

impl Perms {
    /// Read data and list children.
    pub const READ: Perms = Perms(1);
    /// Set data.
    pub const WRITE: Perms = Perms(1 << 1);
    /// Create children.
    pub const CREATE: Perms = Perms(1 << 2);
    /// Delete children.
    pub const DELETE: Perms = Perms(1 << 3);
    /// Set the ACL.
    pub const ADMIN: Perms = Perms(1 << 4);
    /// Every permission.
    pub const ALL: Perms = Perms(0x1f);

    /// Returns true if every bit of `other` is set.
    pub fn contains(self, other: Perms) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Perms {
    type Output = Perms;

    fn bitor(self, rhs: Perms) -> Perms {
        Perms(self.0 | rhs.0)
    }
}

/// One ACL entry: a scheme-qualified identity and its permissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    /// Granted permissions.
    pub perms: Perms,
    /// Authentication scheme ("world", "auth", "digest", ...).
    pub scheme: String,
    /// Identity within the scheme.
    pub id: String,
}

impl Acl {
    /// Create an ACL entry.
    pub fn new(perms: Perms, scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            perms,
            scheme: scheme.into(),
            id: id.into(),
        }
    }

    /// ACL list granting `perms` to everyone.
    pub fn world(perms: Perms) -> Vec<Acl> {
        vec![Acl::new(perms, "world", "anyone")]
    }

    /// ACL list granting `perms` to the authenticated creator.
    pub fn auth(perms: Perms) -> Vec<Acl> {
        vec![Acl::new(perms, "auth", "")]
    }

    /// ACL list granting every permission to everyone.
    pub fn open_unsafe() -> Vec<Acl> {
        Acl::world(Perms::ALL)
    }
}

/// Node metadata as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stat {
    /// Transaction id of the create.
    pub czxid: i64,
    /// Transaction id of the last modification.
    pub mzxid: i64,
    /// Creation time (ms since epoch).
    pub ctime: i64,
    /// Last modification time (ms since epoch).
    pub mtime: i64,
    /// Data version.
    pub version: i32,
    /// Children version.
    pub cversion: i32,
    /// ACL version.
    pub aversion: i32,
    /// Session id of the owner for ephemeral nodes, 0 otherwise.
    pub ephemeral_owner: i64,
    /// Length of the data payload.
    pub data_length: i32,
    /// Number of children.
    pub num_children: i32,
    /// Transaction id of the last child change.
    pub pzxid: i64,
}

/// Authentication applied to every new connection right after dialing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    /// Authentication scheme.
    pub scheme: String,
    /// Scheme-specific credentials.
    pub auth: Vec<u8>,
}

impl AuthInfo {
    /// Create an auth info.
    pub fn new(scheme: impl Into<String>, auth: impl Into<Vec<u8>>) -> Self {
        Self {
            scheme: scheme.into(),
            auth: auth.into(),
        }
    }
}
