//! Sub-operations of an atomic multi-operation call.

use serde::Deserialize;
use serde::Serialize;

use crate::types::Acl;
use crate::types::CreateMode;
use crate::types::Stat;

/// One sub-operation of a multi call. Paths are absolute ensemble paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiOp {
    /// Create a node.
    Create {
        /// Node path.
        path: String,
        /// Initial payload.
        data: Vec<u8>,
        /// ACL list.
        acl: Vec<Acl>,
        /// Create mode.
        mode: CreateMode,
    },
    /// Delete a node.
    Delete {
        /// Node path.
        path: String,
        /// Expected version or `ANY_VERSION`.
        version: i32,
    },
    /// Replace a node's payload.
    SetData {
        /// Node path.
        path: String,
        /// New payload.
        data: Vec<u8>,
        /// Expected version or `ANY_VERSION`.
        version: i32,
    },
    /// Assert a node's version without changing it.
    Check {
        /// Node path.
        path: String,
        /// Expected version.
        version: i32,
    },
}

impl MultiOp {
    /// Target path of the sub-operation.
    pub fn path(&self) -> &str {
        match self {
            MultiOp::Create { path, .. }
            | MultiOp::Delete { path, .. }
            | MultiOp::SetData { path, .. }
            | MultiOp::Check { path, .. } => path,
        }
    }
}

/// Per-operation server response of a successful multi call, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MultiResponse {
    /// Created path for create operations, empty otherwise.
    pub path: String,
    /// Resulting metadata for set-data operations.
    pub stat: Option<Stat>,
}
