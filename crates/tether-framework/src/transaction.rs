//! Atomic multi-operations.
//!
//! A [`Transaction`] collects create, delete, set-data and version-check
//! steps and commits them as one `multi` call. Either every step applies or
//! none does; the service guarantees that, this module only maps the flat
//! response back onto the steps.

use tether_core::Acl;
use tether_core::CoordinationError;
use tether_core::CreateMode;
use tether_core::MultiOp;
use tether_core::MultiResponse;
use tether_core::Result;
use tether_core::Stat;
use tether_core::constants::ANY_VERSION;
use tether_core::paths::validate_path;
use tether_core::resolve_acl;
use tracing::debug;

use crate::event::FrameworkEvent;
use crate::event::FrameworkEventType;
use crate::framework::FrameworkInner;
use crate::framework::OperationScope;
use crate::namespace::Namespace;
use crate::ops::Backgrounding;

/// Trace timing for a background commit.
pub const TRANSACTION_BACKGROUND: &str = "transaction-background";

/// Kind of a transaction step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Create,
    Delete,
    SetData,
    Check,
}

/// Outcome of one committed step, in the order the steps were added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    /// Kind of the step.
    pub op_type: OperationType,
    /// Path the step was sent for, inside the namespace.
    pub for_path: String,
    /// Created path relative to the namespace. Set for creates only.
    pub result_path: Option<String>,
    /// New node metadata. Set for set-data steps only.
    pub result_stat: Option<Stat>,
}

enum Step {
    Create {
        path: String,
        data: Option<Vec<u8>>,
        mode: CreateMode,
        acl: Option<Vec<Acl>>,
        compress: bool,
    },
    Delete {
        path: String,
        version: i32,
    },
    SetData {
        path: String,
        data: Option<Vec<u8>>,
        version: i32,
        compress: bool,
    },
    Check {
        path: String,
        version: i32,
    },
}

/// Steps of an atomic multi-operation.
///
/// ```ignore
/// let results = framework
///     .in_transaction()
///     .create().with_mode(CreateMode::PersistentSequential).for_path("/jobs/job-")
///     .delete().with_version(3).for_path("/queue/item")
///     .commit()
///     .await?;
/// ```
#[must_use = "transactions do nothing until commit is called"]
pub struct Transaction {
    scope: OperationScope,
    steps: Vec<Step>,
    background: Backgrounding,
}

impl Transaction {
    pub(crate) fn new(scope: OperationScope) -> Self {
        Self {
            scope,
            steps: Vec::new(),
            background: Backgrounding::default(),
        }
    }

    pub fn create(self) -> TransactionCreateBuilder {
        TransactionCreateBuilder {
            transaction: self,
            mode: CreateMode::Persistent,
            acl: None,
            compress: false,
        }
    }

    pub fn delete(self) -> TransactionDeleteBuilder {
        TransactionDeleteBuilder {
            transaction: self,
            version: ANY_VERSION,
        }
    }

    pub fn set_data(self) -> TransactionSetDataBuilder {
        TransactionSetDataBuilder {
            transaction: self,
            version: ANY_VERSION,
            compress: false,
        }
    }

    /// Assert a node's version without changing it.
    pub fn check(self) -> TransactionCheckBuilder {
        TransactionCheckBuilder {
            transaction: self,
            version: ANY_VERSION,
        }
    }

    /// Number of steps added so far.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn push(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Commit every step as one atomic call.
    ///
    /// Returns one result per step in order. In the background this returns
    /// an empty list and the results arrive in a `Transaction` event.
    pub async fn commit(self) -> Result<Vec<TransactionResult>> {
        let framework = self.scope.framework()?;
        let namespace = self.scope.namespace().clone();
        let ops = prepare(&framework, &namespace, self.steps)?;
        debug!(steps = ops.len(), namespace = %namespace.name(), "committing transaction");

        if self.background.enabled {
            let runner = framework.clone();
            framework.submit(TRANSACTION_BACKGROUND, self.background, async move {
                let event = FrameworkEvent::new(FrameworkEventType::Transaction);
                match commit(&runner, &namespace, ops).await {
                    Ok(results) => event.with_results(results),
                    Err(err) => event.with_error(err),
                }
            });
            return Ok(Vec::new());
        }

        commit(&framework, &namespace, ops).await
    }
}

crate::ops::backgroundable!(Transaction);

/// Create step of a [`Transaction`].
#[must_use = "the step is added by for_path"]
pub struct TransactionCreateBuilder {
    transaction: Transaction,
    mode: CreateMode,
    acl: Option<Vec<Acl>>,
    compress: bool,
}

impl TransactionCreateBuilder {
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

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    /// Create the node with the framework's default payload.
    pub fn for_path(self, path: &str) -> Transaction {
        self.push(path, None)
    }

    pub fn for_path_with_data(self, path: &str, data: impl Into<Vec<u8>>) -> Transaction {
        self.push(path, Some(data.into()))
    }

    fn push(self, path: &str, data: Option<Vec<u8>>) -> Transaction {
        self.transaction.push(Step::Create {
            path: path.to_string(),
            data,
            mode: self.mode,
            acl: self.acl,
            compress: self.compress,
        })
    }
}

/// Delete step of a [`Transaction`].
#[must_use = "the step is added by for_path"]
pub struct TransactionDeleteBuilder {
    transaction: Transaction,
    version: i32,
}

impl TransactionDeleteBuilder {
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    pub fn for_path(self, path: &str) -> Transaction {
        self.transaction.push(Step::Delete {
            path: path.to_string(),
            version: self.version,
        })
    }
}

/// Set-data step of a [`Transaction`].
#[must_use = "the step is added by for_path"]
pub struct TransactionSetDataBuilder {
    transaction: Transaction,
    version: i32,
    compress: bool,
}

impl TransactionSetDataBuilder {
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    /// Write the framework's default payload.
    pub fn for_path(self, path: &str) -> Transaction {
        self.push(path, None)
    }

    pub fn for_path_with_data(self, path: &str, data: impl Into<Vec<u8>>) -> Transaction {
        self.push(path, Some(data.into()))
    }

    fn push(self, path: &str, data: Option<Vec<u8>>) -> Transaction {
        self.transaction.push(Step::SetData {
            path: path.to_string(),
            data,
            version: self.version,
            compress: self.compress,
        })
    }
}

/// Version-check step of a [`Transaction`].
#[must_use = "the step is added by for_path"]
pub struct TransactionCheckBuilder {
    transaction: Transaction,
    version: i32,
}

impl TransactionCheckBuilder {
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    pub fn for_path(self, path: &str) -> Transaction {
        self.transaction.push(Step::Check {
            path: path.to_string(),
            version: self.version,
        })
    }
}

/// Validate, compress and rewrite every step into a wire operation.
fn prepare(framework: &FrameworkInner, namespace: &Namespace, steps: Vec<Step>) -> Result<Vec<MultiOp>> {
    let compress = |path: &str, data: Vec<u8>, enabled: bool| -> Result<Vec<u8>> {
        if enabled { framework.compression.compress(path, &data) } else { Ok(data) }
    };

    steps
        .into_iter()
        .map(|step| -> Result<MultiOp> {
            match step {
                Step::Create {
                    path,
                    data,
                    mode,
                    acl,
                    compress: enabled,
                } => {
                    validate_path(&path)?;
                    let data = data.unwrap_or_else(|| framework.default_data.clone());
                    let data = compress(&path, data, enabled)?;
                    let path = namespace.fix(&path);
                    let acl = resolve_acl(framework.acl_provider.as_ref(), acl.as_deref(), &path);
                    Ok(MultiOp::Create { path, data, acl, mode })
                }
                Step::Delete { path, version } => {
                    validate_path(&path)?;
                    Ok(MultiOp::Delete {
                        path: namespace.fix(&path),
                        version,
                    })
                }
                Step::SetData {
                    path,
                    data,
                    version,
                    compress: enabled,
                } => {
                    validate_path(&path)?;
                    let data = data.unwrap_or_else(|| framework.default_data.clone());
                    let data = compress(&path, data, enabled)?;
                    Ok(MultiOp::SetData {
                        path: namespace.fix(&path),
                        data,
                        version,
                    })
                }
                Step::Check { path, version } => {
                    validate_path(&path)?;
                    Ok(MultiOp::Check {
                        path: namespace.fix(&path),
                        version,
                    })
                }
            }
        })
        .collect()
}

async fn commit(framework: &FrameworkInner, namespace: &Namespace, ops: Vec<MultiOp>) -> Result<Vec<TransactionResult>> {
    let request = &ops;
    let responses = framework
        .call_with_retry(namespace, move |conn, _| async move { conn.multi(request.clone()).await })
        .await?;
    map_results(namespace, &ops, responses)
}

fn map_results(namespace: &Namespace, ops: &[MultiOp], responses: Vec<MultiResponse>) -> Result<Vec<TransactionResult>> {
    if responses.len() != ops.len() {
        return Err(CoordinationError::Api {
            reason: format!("multi returned {} responses for {} operations", responses.len(), ops.len()),
        });
    }

    Ok(ops
        .iter()
        .zip(responses)
        .map(|(op, response)| match op {
            MultiOp::Create { path, .. } => TransactionResult {
                op_type: OperationType::Create,
                for_path: path.clone(),
                result_path: Some(namespace.unfix(&response.path)),
                result_stat: None,
            },
            MultiOp::Delete { path, .. } => TransactionResult {
                op_type: OperationType::Delete,
                for_path: path.clone(),
                result_path: None,
                result_stat: None,
            },
            MultiOp::SetData { path, .. } => TransactionResult {
                op_type: OperationType::SetData,
                for_path: path.clone(),
                result_path: None,
                result_stat: response.stat,
            },
            MultiOp::Check { path, .. } => TransactionResult {
                op_type: OperationType::Check,
                for_path: path.clone(),
                result_path: None,
                result_stat: None,
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace() -> Namespace {
        Namespace::new("parent").unwrap()
    }

    #[test]
    fn results_follow_request_order() {
        let ops = vec![
            MultiOp::Create {
                path: "/parent/node1".to_string(),
                data: Vec::new(),
                acl: Acl::open_unsafe(),
                mode: CreateMode::PersistentSequential,
            },
            MultiOp::Delete {
                path: "/parent/node2".to_string(),
                version: 3,
            },
            MultiOp::SetData {
                path: "/parent/node3".to_string(),
                data: Vec::new(),
                version: 5,
            },
            MultiOp::Check {
                path: "/parent/node4".to_string(),
                version: 7,
            },
        ];
        let responses = vec![
            MultiResponse {
                path: "/parent/node10000000000".to_string(),
                stat: None,
            },
            MultiResponse::default(),
            MultiResponse {
                path: String::new(),
                stat: Some(Stat::default()),
            },
            MultiResponse::default(),
        ];

        let results = map_results(&namespace(), &ops, responses).unwrap();
        let types: Vec<_> = results.iter().map(|result| result.op_type).collect();
        assert_eq!(types, vec![
            OperationType::Create,
            OperationType::Delete,
            OperationType::SetData,
            OperationType::Check
        ]);
        assert_eq!(results[0].result_path.as_deref(), Some("/node10000000000"));
        assert_eq!(results[1].for_path, "/parent/node2");
        assert_eq!(results[2].result_stat, Some(Stat::default()));
        assert_eq!(results[3].result_path, None);
    }

    #[test]
    fn short_response_is_an_error() {
        let ops = vec![MultiOp::Check {
            path: "/parent/a".to_string(),
            version: 1,
        }];
        let err = map_results(&namespace(), &ops, Vec::new()).unwrap_err();
        assert!(matches!(err, CoordinationError::Api { .. }));
    }
}
