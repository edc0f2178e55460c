//! Ensemble providers.

use async_trait::async_trait;

use crate::error::Result;
use crate::traits::EnsembleProvider;

/// A connection string that never changes.
#[derive(Debug, Clone)]
pub struct FixedEnsembleProvider {
    connection_string: String,
}

impl FixedEnsembleProvider {
    /// Wrap `connection_string`.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
        }
    }
}

#[async_trait]
impl EnsembleProvider for FixedEnsembleProvider {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn connection_string(&self) -> String {
        self.connection_string.clone()
    }
}
