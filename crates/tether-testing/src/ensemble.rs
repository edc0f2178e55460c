//! Deterministic in-memory coordination ensemble.
//!
//! A single [`DeterministicEnsemble`] holds the node tree; every dialed
//! [`DeterministicConnection`] is a session against it. Every remote call is
//! appended to an operation log so tests can assert on exactly what the
//! framework sent, and failures can be injected per operation kind.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_core::Acl;
use tether_core::Connection;
use tether_core::CoordinationError;
use tether_core::CreateMode;
use tether_core::EventType;
use tether_core::MultiOp;
use tether_core::MultiResponse;
use tether_core::Result;
use tether_core::Stat;
use tether_core::WatchReceiver;
use tether_core::WatchedEvent;
use tether_core::constants::ANY_VERSION;
use tether_core::paths::split_path;
use tokio::sync::oneshot;
use tracing::debug;

/// Kind of a remote call, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// `add_auth`
    AddAuth,
    /// `create`
    Create,
    /// `exists` / `exists_w`
    Exists,
    /// `delete`
    Delete,
    /// `get` / `get_w`
    Get,
    /// `set`
    Set,
    /// `children` / `children_w`
    Children,
    /// `get_acl`
    GetAcl,
    /// `set_acl`
    SetAcl,
    /// `multi`
    Multi,
    /// `sync`
    Sync,
}

/// One remote call as received by the ensemble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedOp {
    /// `add_auth`
    AddAuth {
        /// Scheme.
        scheme: String,
        /// Credentials.
        auth: Vec<u8>,
    },
    /// `create`
    Create {
        /// Requested path.
        path: String,
        /// Payload.
        data: Vec<u8>,
        /// Create mode.
        mode: CreateMode,
        /// ACL list.
        acl: Vec<Acl>,
    },
    /// `exists`
    Exists {
        /// Path.
        path: String,
        /// Whether a watch was left.
        watch: bool,
    },
    /// `delete`
    Delete {
        /// Path.
        path: String,
        /// Expected version.
        version: i32,
    },
    /// `get`
    Get {
        /// Path.
        path: String,
        /// Whether a watch was left.
        watch: bool,
    },
    /// `set`
    Set {
        /// Path.
        path: String,
        /// Payload.
        data: Vec<u8>,
        /// Expected version.
        version: i32,
    },
    /// `children`
    Children {
        /// Path.
        path: String,
        /// Whether a watch was left.
        watch: bool,
    },
    /// `get_acl`
    GetAcl {
        /// Path.
        path: String,
    },
    /// `set_acl`
    SetAcl {
        /// Path.
        path: String,
        /// ACL list.
        acl: Vec<Acl>,
        /// Expected ACL version.
        version: i32,
    },
    /// `multi`
    Multi {
        /// Sub-operations.
        ops: Vec<MultiOp>,
    },
    /// `sync`
    Sync {
        /// Path.
        path: String,
    },
}

impl RecordedOp {
    /// Kind of the call.
    pub fn kind(&self) -> OpKind {
        match self {
            RecordedOp::AddAuth { .. } => OpKind::AddAuth,
            RecordedOp::Create { .. } => OpKind::Create,
            RecordedOp::Exists { .. } => OpKind::Exists,
            RecordedOp::Delete { .. } => OpKind::Delete,
            RecordedOp::Get { .. } => OpKind::Get,
            RecordedOp::Set { .. } => OpKind::Set,
            RecordedOp::Children { .. } => OpKind::Children,
            RecordedOp::GetAcl { .. } => OpKind::GetAcl,
            RecordedOp::SetAcl { .. } => OpKind::SetAcl,
            RecordedOp::Multi { .. } => OpKind::Multi,
            RecordedOp::Sync { .. } => OpKind::Sync,
        }
    }
}

struct Fault {
    kind: OpKind,
    error: CoordinationError,
    after_apply: bool,
}

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    acl: Vec<Acl>,
    stat: Stat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchKind {
    Exists,
    Data,
    Child,
}

struct Watch {
    path: String,
    kind: WatchKind,
    tx: oneshot::Sender<WatchedEvent>,
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    zxid: i64,
}

fn no_node(path: &str) -> CoordinationError {
    CoordinationError::NoNode { path: path.to_string() }
}

fn bad_version(path: &str) -> CoordinationError {
    CoordinationError::BadVersion { path: path.to_string() }
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node {
            data: Vec::new(),
            acl: Acl::open_unsafe(),
            stat: Stat::default(),
        });
        Self { nodes, zxid: 0 }
    }

    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.zxid
    }

    fn child_names(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" { "/".to_string() } else { format!("{path}/") };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn node(&self, path: &str) -> Result<&Node> {
        self.nodes.get(path).ok_or_else(|| no_node(path))
    }

    fn create(
        &mut self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        acl: &[Acl],
        owner: i64,
        fired: &mut Vec<(String, EventType)>,
    ) -> Result<String> {
        let parent_path = split_path(path).path;
        let parent = self.nodes.get(&parent_path).ok_or_else(|| no_node(path))?;
        if parent.stat.ephemeral_owner != 0 {
            return Err(CoordinationError::NoChildrenForEphemerals { path: parent_path });
        }
        if acl.is_empty() {
            return Err(CoordinationError::InvalidAcl { path: path.to_string() });
        }
        let actual = if mode.is_sequential() {
            format!("{path}{:010}", parent.stat.cversion)
        } else {
            path.to_string()
        };
        if self.nodes.contains_key(&actual) {
            return Err(CoordinationError::NodeExists { path: actual });
        }

        let zxid = self.next_zxid();
        self.nodes.insert(actual.clone(), Node {
            data: data.to_vec(),
            acl: acl.to_vec(),
            stat: Stat {
                czxid: zxid,
                mzxid: zxid,
                ctime: zxid,
                mtime: zxid,
                ephemeral_owner: if mode.is_ephemeral() { owner } else { 0 },
                data_length: data.len() as i32,
                pzxid: zxid,
                ..Stat::default()
            },
        });
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.stat.cversion += 1;
            parent.stat.num_children += 1;
            parent.stat.pzxid = zxid;
        }
        fired.push((actual.clone(), EventType::NodeCreated));
        fired.push((parent_path, EventType::NodeChildrenChanged));
        Ok(actual)
    }

    fn check(&self, path: &str, version: i32) -> Result<()> {
        let node = self.node(path)?;
        if version != ANY_VERSION && version != node.stat.version {
            return Err(bad_version(path));
        }
        Ok(())
    }

    fn delete(&mut self, path: &str, version: i32, fired: &mut Vec<(String, EventType)>) -> Result<()> {
        if path == "/" {
            return Err(CoordinationError::Api {
                reason: "cannot delete the root node".to_string(),
            });
        }
        self.check(path, version)?;
        if !self.child_names(path).is_empty() {
            return Err(CoordinationError::NotEmpty { path: path.to_string() });
        }
        self.nodes.remove(path);
        let zxid = self.next_zxid();
        let parent_path = split_path(path).path;
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.stat.cversion += 1;
            parent.stat.num_children -= 1;
            parent.stat.pzxid = zxid;
        }
        fired.push((path.to_string(), EventType::NodeDeleted));
        fired.push((parent_path, EventType::NodeChildrenChanged));
        Ok(())
    }

    fn set(&mut self, path: &str, data: &[u8], version: i32, fired: &mut Vec<(String, EventType)>) -> Result<Stat> {
        self.check(path, version)?;
        let zxid = self.next_zxid();
        let node = self.nodes.get_mut(path).ok_or_else(|| no_node(path))?;
        node.data = data.to_vec();
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        node.stat.mtime = zxid;
        node.stat.data_length = data.len() as i32;
        fired.push((path.to_string(), EventType::NodeDataChanged));
        Ok(node.stat)
    }

    fn set_acl(&mut self, path: &str, acl: &[Acl], version: i32) -> Result<Stat> {
        let node = self.nodes.get_mut(path).ok_or_else(|| no_node(path))?;
        if version != ANY_VERSION && version != node.stat.aversion {
            return Err(bad_version(path));
        }
        node.acl = acl.to_vec();
        node.stat.aversion += 1;
        Ok(node.stat)
    }

    fn remove_ephemerals(&mut self, owner: i64, fired: &mut Vec<(String, EventType)>) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.stat.ephemeral_owner == owner)
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            let _ = self.delete(&path, ANY_VERSION, fired);
        }
    }
}

struct EnsembleState {
    tree: Tree,
    log: Vec<RecordedOp>,
    faults: VecDeque<Fault>,
    watches: Vec<Watch>,
}

/// Shared in-memory node tree with an operation log and fault injection.
pub struct DeterministicEnsemble {
    state: Mutex<EnsembleState>,
}

impl Default for DeterministicEnsemble {
    fn default() -> Self {
        Self::new_inner()
    }
}

impl DeterministicEnsemble {
    /// Create an empty ensemble (only the root node exists) wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::new_inner())
    }

    fn new_inner() -> Self {
        Self {
            state: Mutex::new(EnsembleState {
                tree: Tree::new(),
                log: Vec::new(),
                faults: VecDeque::new(),
                watches: Vec::new(),
            }),
        }
    }

    /// Open a session against this ensemble.
    pub fn connect(self: &Arc<Self>, session_id: i64) -> Arc<DeterministicConnection> {
        Arc::new(DeterministicConnection {
            ensemble: self.clone(),
            session_id,
            closed: AtomicBool::new(false),
        })
    }

    /// Fail the next call of `kind` with `error` without applying it.
    pub fn fail_next(&self, kind: OpKind, error: CoordinationError) {
        self.state.lock().faults.push_back(Fault {
            kind,
            error,
            after_apply: false,
        });
    }

    /// Apply the next call of `kind`, then report `error` to the caller.
    ///
    /// Models a request that reached the server whose response was lost.
    pub fn fail_next_after_apply(&self, kind: OpKind, error: CoordinationError) {
        self.state.lock().faults.push_back(Fault {
            kind,
            error,
            after_apply: true,
        });
    }

    /// Every remote call received so far.
    pub fn operations(&self) -> Vec<RecordedOp> {
        self.state.lock().log.clone()
    }

    /// Calls of one kind received so far.
    pub fn operations_of(&self, kind: OpKind) -> Vec<RecordedOp> {
        self.state.lock().log.iter().filter(|op| op.kind() == kind).cloned().collect()
    }

    /// Forget the operation log.
    pub fn clear_operations(&self) {
        self.state.lock().log.clear();
    }

    /// Returns true if `path` exists.
    pub fn contains(&self, path: &str) -> bool {
        self.state.lock().tree.nodes.contains_key(path)
    }

    /// Payload of `path`.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().tree.nodes.get(path).map(|node| node.data.clone())
    }

    /// ACL of `path`.
    pub fn acl(&self, path: &str) -> Option<Vec<Acl>> {
        self.state.lock().tree.nodes.get(path).map(|node| node.acl.clone())
    }

    /// Sorted child names of `path`.
    pub fn children(&self, path: &str) -> Vec<String> {
        self.state.lock().tree.child_names(path)
    }

    /// Create a persistent node directly, bypassing the log. Parents must
    /// exist.
    pub fn seed(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut fired = Vec::new();
        let mut state = self.state.lock();
        state.tree.create(path, data, CreateMode::Persistent, &Acl::open_unsafe(), 0, &mut fired)?;
        Ok(())
    }

    /// Drop every ephemeral node owned by `session_id`.
    pub fn expire_session(&self, session_id: i64) {
        let mut fired = Vec::new();
        let mut state = self.state.lock();
        state.tree.remove_ephemerals(session_id, &mut fired);
        fire_watches(&mut state.watches, &fired);
    }

    fn record(&self, kind: OpKind, op: RecordedOp) -> Option<Fault> {
        let mut state = self.state.lock();
        state.log.push(op);
        let index = state.faults.iter().position(|fault| fault.kind == kind)?;
        state.faults.remove(index)
    }

    /// Record `op`, consult injected faults and run `apply` against the tree.
    fn execute<T>(
        &self,
        kind: OpKind,
        op: RecordedOp,
        apply: impl FnOnce(&mut Tree, &mut Vec<(String, EventType)>) -> Result<T>,
    ) -> Result<T> {
        let fault = self.record(kind, op);
        if let Some(fault) = &fault
            && !fault.after_apply
        {
            debug!(?kind, error = %fault.error, "injected fault");
            return Err(fault.error.clone());
        }

        let mut fired = Vec::new();
        let result = {
            let mut state = self.state.lock();
            let result = apply(&mut state.tree, &mut fired);
            fire_watches(&mut state.watches, &fired);
            result
        };

        match fault {
            Some(fault) => {
                debug!(?kind, error = %fault.error, "injected fault after apply");
                Err(fault.error)
            }
            None => result,
        }
    }

    fn add_watch(&self, path: &str, kind: WatchKind) -> WatchReceiver {
        let (tx, rx) = oneshot::channel();
        self.state.lock().watches.push(Watch {
            path: path.to_string(),
            kind,
            tx,
        });
        rx
    }
}

fn fire_watches(watches: &mut Vec<Watch>, fired: &[(String, EventType)]) {
    for (path, event_type) in fired {
        let kinds: &[WatchKind] = match event_type {
            EventType::NodeCreated => &[WatchKind::Exists],
            EventType::NodeDeleted => &[WatchKind::Exists, WatchKind::Data, WatchKind::Child],
            EventType::NodeDataChanged => &[WatchKind::Exists, WatchKind::Data],
            EventType::NodeChildrenChanged => &[WatchKind::Child],
            EventType::Session | EventType::NotWatching => &[],
        };
        let mut index = 0;
        while index < watches.len() {
            if watches[index].path == *path && kinds.contains(&watches[index].kind) {
                let watch = watches.swap_remove(index);
                let _ = watch.tx.send(WatchedEvent::node(*event_type, path.clone()));
            } else {
                index += 1;
            }
        }
    }
}

/// One session against a [`DeterministicEnsemble`].
pub struct DeterministicConnection {
    ensemble: Arc<DeterministicEnsemble>,
    session_id: i64,
    closed: AtomicBool,
}

impl DeterministicConnection {
    /// Session id used as the ephemeral owner.
    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    /// Returns true once `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CoordinationError::ConnectionLoss);
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for DeterministicConnection {
    async fn add_auth(&self, scheme: &str, auth: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let op = RecordedOp::AddAuth {
            scheme: scheme.to_string(),
            auth: auth.to_vec(),
        };
        self.ensemble.execute(OpKind::AddAuth, op, |_, _| Ok(()))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode, acl: &[Acl]) -> Result<String> {
        self.ensure_open()?;
        let op = RecordedOp::Create {
            path: path.to_string(),
            data: data.to_vec(),
            mode,
            acl: acl.to_vec(),
        };
        let owner = self.session_id;
        self.ensemble.execute(OpKind::Create, op, |tree, fired| tree.create(path, data, mode, acl, owner, fired))
    }

    async fn exists(&self, path: &str) -> Result<Option<Stat>> {
        self.ensure_open()?;
        let op = RecordedOp::Exists {
            path: path.to_string(),
            watch: false,
        };
        self.ensemble.execute(OpKind::Exists, op, |tree, _| Ok(tree.nodes.get(path).map(|node| node.stat)))
    }

    async fn exists_w(&self, path: &str) -> Result<(Option<Stat>, WatchReceiver)> {
        self.ensure_open()?;
        let op = RecordedOp::Exists {
            path: path.to_string(),
            watch: true,
        };
        let stat = self.ensemble.execute(OpKind::Exists, op, |tree, _| Ok(tree.nodes.get(path).map(|node| node.stat)))?;
        let kind = if stat.is_some() { WatchKind::Data } else { WatchKind::Exists };
        Ok((stat, self.ensemble.add_watch(path, kind)))
    }

    async fn delete(&self, path: &str, version: i32) -> Result<()> {
        self.ensure_open()?;
        let op = RecordedOp::Delete {
            path: path.to_string(),
            version,
        };
        self.ensemble.execute(OpKind::Delete, op, |tree, fired| tree.delete(path, version, fired))
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        self.ensure_open()?;
        let op = RecordedOp::Get {
            path: path.to_string(),
            watch: false,
        };
        self.ensemble.execute(OpKind::Get, op, |tree, _| tree.node(path).map(|node| (node.data.clone(), node.stat)))
    }

    async fn get_w(&self, path: &str) -> Result<(Vec<u8>, Stat, WatchReceiver)> {
        self.ensure_open()?;
        let op = RecordedOp::Get {
            path: path.to_string(),
            watch: true,
        };
        let (data, stat) =
            self.ensemble.execute(OpKind::Get, op, |tree, _| tree.node(path).map(|node| (node.data.clone(), node.stat)))?;
        Ok((data, stat, self.ensemble.add_watch(path, WatchKind::Data)))
    }

    async fn set(&self, path: &str, data: &[u8], version: i32) -> Result<Stat> {
        self.ensure_open()?;
        let op = RecordedOp::Set {
            path: path.to_string(),
            data: data.to_vec(),
            version,
        };
        self.ensemble.execute(OpKind::Set, op, |tree, fired| tree.set(path, data, version, fired))
    }

    async fn children(&self, path: &str) -> Result<(Vec<String>, Stat)> {
        self.ensure_open()?;
        let op = RecordedOp::Children {
            path: path.to_string(),
            watch: false,
        };
        self.ensemble.execute(OpKind::Children, op, |tree, _| {
            let stat = tree.node(path)?.stat;
            Ok((tree.child_names(path), stat))
        })
    }

    async fn children_w(&self, path: &str) -> Result<(Vec<String>, Stat, WatchReceiver)> {
        self.ensure_open()?;
        let op = RecordedOp::Children {
            path: path.to_string(),
            watch: true,
        };
        let (children, stat) = self.ensemble.execute(OpKind::Children, op, |tree, _| {
            let stat = tree.node(path)?.stat;
            Ok((tree.child_names(path), stat))
        })?;
        Ok((children, stat, self.ensemble.add_watch(path, WatchKind::Child)))
    }

    async fn get_acl(&self, path: &str) -> Result<(Vec<Acl>, Stat)> {
        self.ensure_open()?;
        let op = RecordedOp::GetAcl { path: path.to_string() };
        self.ensemble.execute(OpKind::GetAcl, op, |tree, _| tree.node(path).map(|node| (node.acl.clone(), node.stat)))
    }

    async fn set_acl(&self, path: &str, acl: &[Acl], version: i32) -> Result<Stat> {
        self.ensure_open()?;
        let op = RecordedOp::SetAcl {
            path: path.to_string(),
            acl: acl.to_vec(),
            version,
        };
        self.ensemble.execute(OpKind::SetAcl, op, |tree, _| tree.set_acl(path, acl, version))
    }

    async fn multi(&self, ops: Vec<MultiOp>) -> Result<Vec<MultiResponse>> {
        self.ensure_open()?;
        let owner = self.session_id;
        let record = RecordedOp::Multi { ops: ops.clone() };
        self.ensemble.execute(OpKind::Multi, record, |tree, fired| {
            // Apply to a scratch copy so a failing sub-operation leaves no trace.
            let mut scratch = tree.clone();
            let mut scratch_fired = Vec::new();
            let mut responses = Vec::with_capacity(ops.len());
            for op in &ops {
                let response = match op {
                    MultiOp::Create { path, data, acl, mode } => MultiResponse {
                        path: scratch.create(path, data, *mode, acl, owner, &mut scratch_fired)?,
                        stat: None,
                    },
                    MultiOp::Delete { path, version } => {
                        scratch.delete(path, *version, &mut scratch_fired)?;
                        MultiResponse::default()
                    }
                    MultiOp::SetData { path, data, version } => MultiResponse {
                        path: String::new(),
                        stat: Some(scratch.set(path, data, *version, &mut scratch_fired)?),
                    },
                    MultiOp::Check { path, version } => {
                        scratch.check(path, *version)?;
                        MultiResponse::default()
                    }
                };
                responses.push(response);
            }
            *tree = scratch;
            fired.extend(scratch_fired);
            Ok(responses)
        })
    }

    async fn sync(&self, path: &str) -> Result<String> {
        self.ensure_open()?;
        let op = RecordedOp::Sync { path: path.to_string() };
        self.ensemble.execute(OpKind::Sync, op, |_, _| Ok(path.to_string()))
    }
}
