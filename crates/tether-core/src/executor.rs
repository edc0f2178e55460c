//! Task submission for background operations.

use futures::future::BoxFuture;

/// Runs background work. The default spawns on the current tokio runtime;
/// tests substitute an executor that holds tasks until told to run them.
pub trait Executor: Send + Sync {
    /// Submit `task` for execution. Must not block.
    fn execute(&self, task: BoxFuture<'static, ()>);
}

/// Spawns each task on the ambient tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

impl Executor for TokioExecutor {
    fn execute(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn tokio_executor_runs_task() {
        let (tx, rx) = oneshot::channel();
        TokioExecutor.execute(
            async move {
                let _ = tx.send(7);
            }
            .boxed(),
        );
        assert_eq!(rx.await.ok(), Some(7));
    }
}
