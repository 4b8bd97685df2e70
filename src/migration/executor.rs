//! SQL execution seam used by migration steps

use async_trait::async_trait;

/// Runs statements against a target database
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, database: &str, sql: &str) -> Result<(), ExecError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Statement failed: {0}")]
    Statement(String),
}
